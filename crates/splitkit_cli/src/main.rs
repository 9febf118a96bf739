//! `splitkit` command line: split a source sheet into one templated workbook per key.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use splitkit_split::{
    EnumPdfEngine, EnumSplitEvent, SpecSplitConfig, derive_key_column_choices, list_sheet_names,
    load_split_config, probe_pdf_capabilities, read_source_headers, run_split, save_split_config,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const C_LOG_FILTER_DEFAULT: &str = "info";

#[derive(Parser, Debug)]
#[command(
    name = "splitkit",
    version,
    about = "Split a spreadsheet by key column into templated workbooks and optional PDFs."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a split from a config file and/or flags (flags win).
    Run {
        /// INI file holding saved settings.
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
        #[command(flatten)]
        settings: SettingArgs,
        /// Save the effective settings to this INI file before running.
        #[arg(long, value_name = "PATH")]
        save_config: Option<PathBuf>,
    },
    /// List the sheet names of a source workbook.
    Sheets {
        /// Source workbook.
        source: PathBuf,
    },
    /// List the header row of a source sheet with key-column choices.
    Headers {
        /// Source workbook.
        source: PathBuf,
        /// Sheet name.
        #[arg(long)]
        sheet: String,
    },
    /// Write an INI file from flags.
    InitConfig {
        /// Target INI file.
        path: PathBuf,
        #[command(flatten)]
        settings: SettingArgs,
    },
    /// Report which PDF engines can run here.
    Capabilities {
        /// Explicit LibreOffice executable or install directory.
        #[arg(long, value_name = "PATH")]
        libreoffice: Option<PathBuf>,
    },
}

/// Settings that override values loaded from a config file.
#[derive(Args, Debug, Default, Clone)]
struct SettingArgs {
    /// Source workbook.
    #[arg(long, value_name = "PATH")]
    source: Option<String>,
    /// Source sheet name.
    #[arg(long)]
    sheet: Option<String>,
    /// Key column: header name or 1-based index.
    #[arg(long)]
    key: Option<String>,
    /// Template workbook.
    #[arg(long, value_name = "PATH")]
    template: Option<String>,
    /// Template header row count.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    header_rows: Option<u32>,
    /// Output directory.
    #[arg(long, value_name = "DIR")]
    out: Option<String>,
    /// PDF engine: none, layout, libreoffice, excel.
    #[arg(long, value_parser = parse_pdf_engine)]
    pdf_engine: Option<EnumPdfEngine>,
    /// LibreOffice executable or install directory.
    #[arg(long, value_name = "PATH")]
    libreoffice: Option<String>,
    /// Output file name prefix.
    #[arg(long)]
    prefix: Option<String>,
    /// Output file name suffix.
    #[arg(long)]
    suffix: Option<String>,
}

impl SettingArgs {
    fn apply(&self, cfg: &mut SpecSplitConfig) {
        let set = |target: &mut String, value: &Option<String>| {
            if let Some(value) = value {
                *target = value.clone();
            }
        };
        set(&mut cfg.source_path, &self.source);
        set(&mut cfg.sheet_name, &self.sheet);
        set(&mut cfg.key_col, &self.key);
        set(&mut cfg.template_path, &self.template);
        set(&mut cfg.output_dir, &self.out);
        set(&mut cfg.libreoffice_path, &self.libreoffice);
        set(&mut cfg.prefix, &self.prefix);
        set(&mut cfg.suffix, &self.suffix);
        if let Some(n_rows) = self.header_rows {
            cfg.header_rows = n_rows;
        }
        if let Some(engine) = self.pdf_engine {
            cfg.pdf_engine = engine;
        }
    }
}

fn parse_pdf_engine(value: &str) -> Result<EnumPdfEngine, String> {
    EnumPdfEngine::parse(value)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(C_LOG_FILTER_DEFAULT)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Effective settings: config file (if any) overlaid with flags.
fn derive_run_config(config: Option<&Path>, settings: &SettingArgs) -> Result<SpecSplitConfig> {
    let mut cfg = match config {
        Some(path) => load_split_config(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => SpecSplitConfig::default(),
    };
    settings.apply(&mut cfg);
    Ok(cfg)
}

fn run_command(command: Command, out: &mut impl Write) -> Result<ExitCode> {
    match command {
        Command::Run {
            config,
            settings,
            save_config,
        } => {
            let cfg = derive_run_config(config.as_deref(), &settings)?;
            if let Some(path) = save_config.as_deref() {
                save_split_config(path, &cfg)
                    .with_context(|| format!("save config {}", path.display()))?;
            }
            let options = cfg.to_options()?;
            debug!(?options, "run options");

            let mut sink = |event: EnumSplitEvent| match event {
                EnumSplitEvent::Status(msg) => eprintln!("{msg}"),
                EnumSplitEvent::Progress { total, completed } if total > 0 => {
                    eprintln!("progress {completed}/{total}");
                }
                _ => {}
            };
            match run_split(&options, &mut sink) {
                Ok(report) => {
                    for path in report.files_xlsx.iter().chain(&report.files_pdf) {
                        writeln!(out, "{}", path.display())?;
                    }
                    for msg in &report.warnings {
                        eprintln!("warning: {msg}");
                    }
                    Ok(ExitCode::SUCCESS)
                }
                // The failure line was already printed by the status sink.
                Err(_) => Ok(ExitCode::FAILURE),
            }
        }
        Command::Sheets { source } => {
            for c_name in list_sheet_names(&source)? {
                writeln!(out, "{c_name}")?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Headers { source, sheet } => {
            let l_headers = read_source_headers(&source, &sheet)?;
            for c_choice in derive_key_column_choices(&l_headers) {
                writeln!(out, "{c_choice}")?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::InitConfig { path, settings } => {
            let mut cfg = SpecSplitConfig::default();
            settings.apply(&mut cfg);
            save_split_config(&path, &cfg)?;
            writeln!(out, "{}", path.display())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Capabilities { libreoffice } => {
            let caps = probe_pdf_capabilities(libreoffice.as_deref());
            writeln!(out, "none: available")?;
            writeln!(
                out,
                "layout: {}",
                if caps.if_layout_renderer { "available" } else { "not built" }
            )?;
            match &caps.path_office {
                Some(path) => writeln!(out, "libreoffice: {}", path.display())?,
                None => writeln!(out, "libreoffice: not found")?,
            }
            writeln!(
                out,
                "excel: {}",
                if caps.if_native_app { "available" } else { "not found" }
            )?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run_command(cli.command, &mut std::io::stdout().lock()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("splitkit").chain(args.iter().copied()))
            .expect("parse args")
    }

    #[test]
    fn run_flags_override_config_values() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_config = tmp.path().join("split.ini");
        std::fs::write(
            &path_config,
            "[source]\nsource_path = a.xlsx\nsheet_name = Data\nkey_col = ID\n[output]\nprefix = Old\n",
        )
        .expect("write config");

        let cli = parse(&[
            "run",
            "--config",
            path_config.to_str().expect("utf8"),
            "--prefix",
            "New",
            "--pdf-engine",
            "reportlab",
            "--header-rows",
            "3",
        ]);
        let Command::Run { config, settings, .. } = cli.command else {
            panic!("expected run command");
        };
        let cfg = derive_run_config(config.as_deref(), &settings).expect("config");
        assert_eq!(cfg.source_path, "a.xlsx");
        assert_eq!(cfg.key_col, "ID");
        assert_eq!(cfg.prefix, "New");
        assert_eq!(cfg.header_rows, 3);
        assert_eq!(cfg.pdf_engine, EnumPdfEngine::Layout);
    }

    #[test]
    fn invalid_engine_and_zero_header_rows_are_rejected() {
        let try_parse = |args: &[&str]| {
            Cli::try_parse_from(std::iter::once("splitkit").chain(args.iter().copied()))
        };
        assert!(try_parse(&["run", "--pdf-engine", "ghostscript"]).is_err());
        assert!(try_parse(&["run", "--header-rows", "0"]).is_err());
    }

    #[test]
    fn init_config_writes_loadable_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_config = tmp.path().join("new.ini");
        let cli = parse(&[
            "init-config",
            path_config.to_str().expect("utf8"),
            "--sheet",
            "Data",
            "--key",
            "2",
            "--pdf-engine",
            "none",
        ]);
        let mut l_out = Vec::new();
        run_command(cli.command, &mut l_out).expect("init");
        assert_eq!(String::from_utf8(l_out).expect("utf8").trim(), path_config.to_str().expect("utf8"));

        let cfg = load_split_config(&path_config).expect("load");
        assert_eq!(cfg.sheet_name, "Data");
        assert_eq!(cfg.key_col, "2");
        assert_eq!(cfg.pdf_engine, EnumPdfEngine::None);
        assert_eq!(cfg.header_rows, 5);
    }

    #[test]
    fn run_without_required_settings_is_an_error() {
        let cli = parse(&["run", "--sheet", "Data"]);
        let mut l_out = Vec::new();
        assert!(run_command(cli.command, &mut l_out).is_err());
    }
}
