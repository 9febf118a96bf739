//! INI persistence of run settings.

use std::path::{Path, PathBuf};

use ini::{EscapePolicy, Ini, ParseOption, Properties};

use crate::conf::{
    C_INI_SECTION_LEGACY, C_INI_SECTION_OUTPUT, C_INI_SECTION_SOURCE, C_INI_SECTION_TEMPLATE,
    EnumColumnIdentifier, N_HEADER_ROWS_DEFAULT,
};
use crate::spec::{EnumPdfEngine, SpecSplitOptions, SplitError};

/// Persisted run settings, one field per INI key.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecSplitConfig {
    /// `[template] template_path`: workbook every group is rendered into.
    pub template_path: String,
    /// `[template] header_rows`: rows kept above the data; must be at least 1.
    pub header_rows: u32,
    /// `[source] source_path`: workbook holding the rows to split.
    pub source_path: String,
    /// `[source] sheet_name`
    pub sheet_name: String,
    /// `[source] key_col`: header name, or a 1-based column index when all digits.
    /// The legacy layout spells it `key_column`.
    pub key_col: String,
    /// `[output] output_dir`: created when missing.
    pub output_dir: String,
    /// `[output] pdf_engine`: empty means [`EnumPdfEngine::default`].
    pub pdf_engine: EnumPdfEngine,
    /// `[output] libreoffice_path`: optional converter executable or install dir.
    pub libreoffice_path: String,
    /// `[output] prefix`: leading part of every output file name.
    pub prefix: String,
    /// `[output] suffix`: trailing part of every output file name.
    pub suffix: String,
}

impl Default for SpecSplitConfig {
    fn default() -> Self {
        Self {
            template_path: String::new(),
            header_rows: N_HEADER_ROWS_DEFAULT,
            source_path: String::new(),
            sheet_name: String::new(),
            key_col: String::new(),
            output_dir: String::new(),
            pdf_engine: EnumPdfEngine::default(),
            libreoffice_path: String::new(),
            prefix: String::new(),
            suffix: String::new(),
        }
    }
}

impl SpecSplitConfig {
    /// Convert into run options; path, sheet, key and output fields are required.
    pub fn to_options(&self) -> Result<SpecSplitOptions, SplitError> {
        for (c_key, c_value) in [
            ("source_path", &self.source_path),
            ("sheet_name", &self.sheet_name),
            ("key_col", &self.key_col),
            ("template_path", &self.template_path),
            ("output_dir", &self.output_dir),
        ] {
            if c_value.trim().is_empty() {
                return Err(SplitError::InvalidOption(format!("{c_key} is required.")));
            }
        }

        let mut options = SpecSplitOptions::new(
            PathBuf::from(self.source_path.trim()),
            self.sheet_name.trim(),
            EnumColumnIdentifier::parse(&self.key_col),
            PathBuf::from(self.template_path.trim()),
            PathBuf::from(self.output_dir.trim()),
        );
        options.header_rows = self.header_rows;
        options.rule_pdf_engine = self.pdf_engine;
        options.path_office = Some(self.libreoffice_path.trim())
            .filter(|c| !c.is_empty())
            .map(PathBuf::from);
        options.prefix = self.prefix.trim().to_string();
        options.suffix = self.suffix.trim().to_string();
        options.validate()?;
        Ok(options)
    }
}

fn derive_parse_option() -> ParseOption {
    // Windows paths carry backslashes that must stay literal.
    ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..ParseOption::default()
    }
}

/// Load settings from `path`; missing keys take their defaults.
pub fn load_split_config(path: &Path) -> Result<SpecSplitConfig, SplitError> {
    let ini = Ini::load_from_file_opt(path, derive_parse_option())
        .map_err(|err| SplitError::ConfigFormat(format!("{}: {err}", path.display())))?;
    derive_split_config(&ini)
}

/// Load settings from INI text.
pub fn parse_split_config(text: &str) -> Result<SpecSplitConfig, SplitError> {
    let ini = Ini::load_from_str_opt(text, derive_parse_option())
        .map_err(|err| SplitError::ConfigFormat(err.to_string()))?;
    derive_split_config(&ini)
}

fn derive_split_config(ini: &Ini) -> Result<SpecSplitConfig, SplitError> {
    let sec_legacy = ini.section(Some(C_INI_SECTION_LEGACY));
    let read = |section: &str, key: &str, key_legacy: &str| -> Option<String> {
        let from = |props: Option<&Properties>, k: &str| {
            props.and_then(|p| p.get(k)).map(|v| v.trim().to_string())
        };
        from(ini.section(Some(section)), key).or_else(|| from(sec_legacy, key_legacy))
    };
    let text = |section: &str, key: &str| read(section, key, key).unwrap_or_default();

    let header_rows = match read(C_INI_SECTION_TEMPLATE, "header_rows", "header_rows") {
        None => N_HEADER_ROWS_DEFAULT,
        Some(c_raw) => match c_raw.parse::<u32>() {
            Ok(n) if n >= 1 => n,
            _ => {
                return Err(SplitError::ConfigFormat(format!(
                    "header_rows must be a positive integer, got {c_raw:?}"
                )));
            }
        },
    };
    let pdf_engine = match read(C_INI_SECTION_OUTPUT, "pdf_engine", "pdf_engine") {
        Some(c_raw) if !c_raw.is_empty() => {
            EnumPdfEngine::parse(&c_raw).map_err(SplitError::ConfigFormat)?
        }
        _ => EnumPdfEngine::default(),
    };

    Ok(SpecSplitConfig {
        template_path: text(C_INI_SECTION_TEMPLATE, "template_path"),
        header_rows,
        source_path: text(C_INI_SECTION_SOURCE, "source_path"),
        sheet_name: text(C_INI_SECTION_SOURCE, "sheet_name"),
        key_col: read(C_INI_SECTION_SOURCE, "key_col", "key_column").unwrap_or_default(),
        output_dir: text(C_INI_SECTION_OUTPUT, "output_dir"),
        pdf_engine,
        libreoffice_path: text(C_INI_SECTION_OUTPUT, "libreoffice_path"),
        prefix: text(C_INI_SECTION_OUTPUT, "prefix"),
        suffix: text(C_INI_SECTION_OUTPUT, "suffix"),
    })
}

/// Build the INI document for `cfg` (sectioned layout).
pub fn create_split_ini(cfg: &SpecSplitConfig) -> Ini {
    let mut ini = Ini::new();
    ini.with_section(Some(C_INI_SECTION_TEMPLATE))
        .set("template_path", cfg.template_path.trim())
        .set("header_rows", cfg.header_rows.to_string());
    ini.with_section(Some(C_INI_SECTION_SOURCE))
        .set("source_path", cfg.source_path.trim())
        .set("sheet_name", cfg.sheet_name.trim())
        .set("key_col", cfg.key_col.trim());
    ini.with_section(Some(C_INI_SECTION_OUTPUT))
        .set("output_dir", cfg.output_dir.trim())
        .set("pdf_engine", cfg.pdf_engine.as_str())
        .set("libreoffice_path", cfg.libreoffice_path.trim())
        .set("prefix", cfg.prefix.trim())
        .set("suffix", cfg.suffix.trim());
    ini
}

/// Write every setting to `path`.
pub fn save_split_config(path: &Path, cfg: &SpecSplitConfig) -> Result<(), SplitError> {
    create_split_ini(cfg)
        .write_to_file_policy(path, EscapePolicy::Nothing)
        .map_err(|err| SplitError::OutputWrite {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestDir;
    use pretty_assertions::assert_eq;

    fn create_config() -> SpecSplitConfig {
        SpecSplitConfig {
            template_path: r"C:\tpl\invoice.xlsx".to_string(),
            header_rows: 2,
            source_path: "/data/source.xlsx".to_string(),
            sheet_name: "Data".to_string(),
            key_col: "ID".to_string(),
            output_dir: "/data/out".to_string(),
            pdf_engine: EnumPdfEngine::Office,
            libreoffice_path: r"C:\Program Files\LibreOffice".to_string(),
            prefix: "Invoice".to_string(),
            suffix: String::new(),
        }
    }

    #[test]
    fn save_then_load_keeps_every_value() {
        let tmp = TestDir::new();
        let path = tmp.path().join("split.ini");
        let cfg = create_config();
        save_split_config(&path, &cfg).expect("save");
        assert_eq!(load_split_config(&path).expect("load"), cfg);
    }

    #[test]
    fn missing_keys_take_defaults() {
        let cfg = parse_split_config("[source]\nsheet_name = Data\n").expect("parse");
        assert_eq!(cfg.header_rows, 5);
        assert_eq!(cfg.pdf_engine, EnumPdfEngine::Layout);
        assert_eq!(cfg.sheet_name, "Data");
        assert_eq!(cfg.template_path, "");
    }

    #[test]
    fn engine_aliases_and_legacy_section_are_accepted() {
        let cfg = parse_split_config(
            "[ExcelSplitter]\nsource_path = a.xlsx\nkey_column = 2\nheader_rows = 3\npdf_engine = reportlab\n",
        )
        .expect("parse");
        assert_eq!(cfg.source_path, "a.xlsx");
        assert_eq!(cfg.key_col, "2");
        assert_eq!(cfg.header_rows, 3);
        assert_eq!(cfg.pdf_engine, EnumPdfEngine::Layout);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for c_text in [
            "[template]\nheader_rows = abc\n",
            "[template]\nheader_rows = 0\n",
            "[output]\npdf_engine = ghostscript\n",
        ] {
            assert!(matches!(
                parse_split_config(c_text),
                Err(SplitError::ConfigFormat(_))
            ));
        }
    }

    #[test]
    fn to_options_requires_paths_and_parses_key() {
        let options = create_config().to_options().expect("options");
        assert_eq!(options.key_column, EnumColumnIdentifier::Name("ID".to_string()));
        assert_eq!(options.header_rows, 2);
        assert_eq!(
            options.path_office,
            Some(PathBuf::from(r"C:\Program Files\LibreOffice"))
        );

        let mut cfg = create_config();
        cfg.key_col = "3".to_string();
        assert_eq!(
            cfg.to_options().expect("options").key_column,
            EnumColumnIdentifier::Index(3)
        );
        cfg.output_dir = "  ".to_string();
        assert!(matches!(cfg.to_options(), Err(SplitError::InvalidOption(_))));
    }
}
