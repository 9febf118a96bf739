//! Split specification models, run events, report and error types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use polars::prelude::DataFrame;

use crate::conf::{
    EnumColumnIdentifier, N_MARGIN_BOTTOM_IN_DEFAULT, N_MARGIN_LEFT_IN_DEFAULT,
    N_MARGIN_RIGHT_IN_DEFAULT, N_MARGIN_TOP_IN_DEFAULT, N_PAPER_SIZE_LETTER, N_PT_PER_INCH,
    TUP_PAGE_A4_PT, TUP_PAGE_LETTER_PT,
};

////////////////////////////////////////////////////////////////////////////////
// #region CellValues

/// Normalized scalar read from the source table.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumCellValue {
    /// Missing/blank value.
    None,
    /// Text value.
    String(String),
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Number(f64),
    /// Boolean value.
    Boolean(bool),
    /// Calendar date, with a time part when it is not midnight.
    DateTime(NaiveDateTime),
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Options

/// PDF rendition strategy selected for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumPdfEngine {
    /// Spreadsheet files only.
    None,
    /// In-process table layout.
    #[default]
    Layout,
    /// Headless office-suite conversion.
    Office,
    /// Native spreadsheet application automation.
    Native,
}

impl EnumPdfEngine {
    /// Parse an engine name, accepting legacy aliases.
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "layout" | "pure" | "reportlab" => Ok(Self::Layout),
            "libreoffice" | "soffice" | "office" => Ok(Self::Office),
            "excel" | "native" => Ok(Self::Native),
            other => Err(format!(
                "Invalid PDF engine: `{other}`. Expected one of: ['none', 'layout', 'libreoffice', 'excel']"
            )),
        }
    }

    /// Canonical engine name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Layout => "layout",
            Self::Office => "libreoffice",
            Self::Native => "excel",
        }
    }
}

impl fmt::Display for EnumPdfEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input options for `run_split`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecSplitOptions {
    /// Source workbook path.
    pub path_source: PathBuf,
    /// Source sheet name.
    pub sheet_name: String,
    /// Key column reference.
    pub key_column: EnumColumnIdentifier,
    /// Template workbook path.
    pub path_template: PathBuf,
    /// Number of header rows in the template (>= 1).
    pub header_rows: u32,
    /// Output directory; created when missing.
    pub dir_out: PathBuf,
    /// PDF engine.
    pub rule_pdf_engine: EnumPdfEngine,
    /// Explicit office converter path (executable or install directory).
    pub path_office: Option<PathBuf>,
    /// Output file name prefix.
    pub prefix: String,
    /// Output file name suffix.
    pub suffix: String,
}

impl SpecSplitOptions {
    /// Build options with defaults for everything but the required inputs.
    pub fn new(
        path_source: impl Into<PathBuf>,
        sheet_name: impl Into<String>,
        key_column: EnumColumnIdentifier,
        path_template: impl Into<PathBuf>,
        dir_out: impl Into<PathBuf>,
    ) -> Self {
        Self {
            path_source: path_source.into(),
            sheet_name: sheet_name.into(),
            key_column,
            path_template: path_template.into(),
            header_rows: crate::conf::N_HEADER_ROWS_DEFAULT,
            dir_out: dir_out.into(),
            rule_pdf_engine: EnumPdfEngine::default(),
            path_office: None,
            prefix: String::new(),
            suffix: String::new(),
        }
    }

    /// Validate argument shape. File existence is checked by the pipeline.
    pub fn validate(&self) -> Result<(), SplitError> {
        if self.header_rows == 0 {
            return Err(SplitError::InvalidOption(
                "header_rows must be >= 1.".to_string(),
            ));
        }
        if self.sheet_name.trim().is_empty() {
            return Err(SplitError::InvalidOption(
                "sheet_name must not be empty.".to_string(),
            ));
        }
        if self.dir_out.as_os_str().is_empty() {
            return Err(SplitError::InvalidOption(
                "dir_out must not be empty.".to_string(),
            ));
        }
        match &self.key_column {
            EnumColumnIdentifier::Name(name) if name.trim().is_empty() => Err(
                SplitError::InvalidOption("key_column must not be empty.".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region TemplateModels

/// One probed template header column.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecTemplateColumn {
    /// Header text, empty when blank.
    pub header: String,
    /// Column hidden flag.
    pub if_hidden: bool,
    /// Configured display width in character units.
    pub width: Option<f64>,
}

/// Ordered template header descriptor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecTemplateHeader {
    /// Scanned columns, left to right.
    pub columns: Vec<SpecTemplateColumn>,
}

impl SpecTemplateHeader {
    /// Header strings in column order.
    pub fn headers(&self) -> Vec<&str> {
        self.columns.iter().map(|col| col.header.as_str()).collect()
    }

    /// Whether any scanned column carries header text.
    pub fn has_header_text(&self) -> bool {
        self.columns.iter().any(|col| !col.header.is_empty())
    }

    /// Find a column by exact (case-sensitive) header text.
    pub fn find(&self, header: &str) -> Option<&SpecTemplateColumn> {
        self.columns.iter().find(|col| col.header == header)
    }
}

/// Page geometry read from the template sheet.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpecPageSetup {
    /// Paper size code.
    pub paper_size: Option<u32>,
    /// Landscape orientation.
    pub if_landscape: bool,
    /// Left margin in inches.
    pub margin_left: Option<f32>,
    /// Right margin in inches.
    pub margin_right: Option<f32>,
    /// Top margin in inches.
    pub margin_top: Option<f32>,
    /// Bottom margin in inches.
    pub margin_bottom: Option<f32>,
}

impl SpecPageSetup {
    /// Page `(width, height)` in points after orientation.
    pub fn page_size_pt(&self) -> (f32, f32) {
        let (w, h) = match self.paper_size {
            Some(N_PAPER_SIZE_LETTER) => TUP_PAGE_LETTER_PT,
            _ => TUP_PAGE_A4_PT,
        };
        if self.if_landscape { (h, w) } else { (w, h) }
    }

    /// Margins `(left, right, top, bottom)` in points; unset or zero falls back to defaults.
    pub fn margins_pt(&self) -> (f32, f32, f32, f32) {
        let derive = |value: Option<f32>, default: f32| {
            value.filter(|v| *v > 0.0).unwrap_or(default) * N_PT_PER_INCH
        };
        (
            derive(self.margin_left, N_MARGIN_LEFT_IN_DEFAULT),
            derive(self.margin_right, N_MARGIN_RIGHT_IN_DEFAULT),
            derive(self.margin_top, N_MARGIN_TOP_IN_DEFAULT),
            derive(self.margin_bottom, N_MARGIN_BOTTOM_IN_DEFAULT),
        )
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Grouping

/// Partitioning attempt applied to the key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumGroupingStrategy {
    /// Group on the key column as loaded.
    Direct,
    /// Cast every column to text, then group.
    AllColumnsText,
    /// Group on a text copy of the key column only.
    KeyColumnText,
}

impl EnumGroupingStrategy {
    /// Attempt order.
    pub const ORDER: [Self; 3] = [Self::Direct, Self::AllColumnsText, Self::KeyColumnText];
}

/// One partition of source rows sharing a key value.
#[derive(Debug, Clone)]
pub struct SpecGroup {
    /// Key value, including null.
    pub key: EnumCellValue,
    /// Rows of this group, restricted to output columns.
    pub df: DataFrame,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PdfModels

/// Result of the one-shot PDF capability probe.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecPdfCapabilities {
    /// In-process layout renderer compiled in.
    pub if_layout_renderer: bool,
    /// Located office converter executable.
    pub path_office: Option<PathBuf>,
    /// Native spreadsheet application detected.
    pub if_native_app: bool,
}

impl SpecPdfCapabilities {
    /// Whether `engine` can run with these capabilities.
    pub fn supports(&self, engine: EnumPdfEngine) -> bool {
        match engine {
            EnumPdfEngine::None => true,
            EnumPdfEngine::Layout => self.if_layout_renderer,
            EnumPdfEngine::Office => self.path_office.is_some(),
            EnumPdfEngine::Native => self.if_native_app,
        }
    }
}

/// One PDF export request.
#[derive(Debug, Clone, Copy)]
pub struct SpecPdfJob<'a> {
    /// Rendered workbook.
    pub path_xlsx: &'a Path,
    /// Template workbook the output was cloned from.
    pub path_template: &'a Path,
    /// Template header row count.
    pub header_rows: u32,
    /// Group rows as written into the workbook.
    pub df_group: &'a DataFrame,
}

impl SpecPdfJob<'_> {
    /// Target PDF path next to the workbook.
    pub fn path_pdf(&self) -> PathBuf {
        self.path_xlsx.with_extension(crate::conf::C_EXT_PDF)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RunEvents

/// Pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumSplitState {
    /// Not started.
    Idle,
    /// Loading the source table.
    Reading,
    /// Resolving the key column.
    Resolving,
    /// Matching source columns to the template header.
    Aligning,
    /// Building groups.
    Partitioning,
    /// Rendering group `i` (1-based) of `n`.
    Rendering(usize, usize),
    /// Exporting the PDF of group `i` (1-based) of `n`.
    ExportingPdf(usize, usize),
    /// All groups processed.
    Done,
    /// Run aborted.
    Failed,
}

/// Event emitted to the caller during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumSplitEvent {
    /// Human-readable status line.
    Status(String),
    /// Progress counter.
    Progress {
        /// Total groups.
        total: usize,
        /// Groups finished.
        completed: usize,
    },
    /// State transition.
    State(EnumSplitState),
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Report

/// Outcome of one completed run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReportSplit {
    /// Number of groups processed.
    pub cnt_groups: u64,
    /// Rendered workbooks in group order.
    pub files_xlsx: Vec<PathBuf>,
    /// Exported PDFs in group order.
    pub files_pdf: Vec<PathBuf>,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

impl ReportSplit {
    /// Add a warning message.
    pub fn warn(&mut self, msg: impl AsRef<str>) {
        self.warnings.push(msg.as_ref().to_string());
    }

    /// Machine-readable counters.
    pub fn to_dict(&self) -> BTreeMap<String, u64> {
        let mut dict_counts = BTreeMap::new();
        dict_counts.insert("cnt_groups".to_string(), self.cnt_groups);
        dict_counts.insert("cnt_xlsx".to_string(), self.files_xlsx.len() as u64);
        dict_counts.insert("cnt_pdf".to_string(), self.files_pdf.len() as u64);
        dict_counts.insert("cnt_warnings".to_string(), self.warnings.len() as u64);
        dict_counts
    }

    /// Human-readable one-line summary.
    pub fn format(&self, prefix: &str) -> String {
        let dict_counts = self.to_dict();
        format!(
            "{prefix} groups={} xlsx={} pdf={} warnings={}",
            dict_counts["cnt_groups"],
            dict_counts["cnt_xlsx"],
            dict_counts["cnt_pdf"],
            dict_counts["cnt_warnings"]
        )
    }
}

impl fmt::Display for ReportSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format("[SPLIT]"))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Errors

/// "Run failed" errors.
#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    /// Source workbook missing.
    #[error("Source workbook not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    /// Template workbook missing.
    #[error("Template workbook not found: {}", .0.display())]
    TemplateNotFound(PathBuf),
    /// File exists but cannot be opened or written.
    #[error("Permission denied: {}: {message}", path.display())]
    PermissionDenied {
        /// Offending path.
        path: PathBuf,
        /// Underlying error text.
        message: String,
    },
    /// Requested sheet is absent from the source workbook.
    #[error("Sheet {sheet:?} not found. Available sheets: {available:?}")]
    SheetNotFound {
        /// Requested sheet.
        sheet: String,
        /// Sheets present in the workbook.
        available: Vec<String>,
    },
    /// Source workbook or sheet could not be parsed.
    #[error("Cannot read source {}: {message}", path.display())]
    SourceUnreadable {
        /// Source path.
        path: PathBuf,
        /// Parser error text.
        message: String,
    },
    /// Template workbook could not be parsed.
    #[error("Cannot read template {}: {message}", path.display())]
    TemplateUnreadable {
        /// Template path.
        path: PathBuf,
        /// Parser error text.
        message: String,
    },
    /// Key column index out of range or name absent.
    #[error("{0}")]
    KeyResolution(String),
    /// Every grouping fallback failed.
    #[error("Grouping failed after text fallbacks: {0}")]
    GroupingType(String),
    /// Office converter executable not found.
    #[error("PDF converter not found: {0}")]
    BackendNotFound(String),
    /// Native spreadsheet application not detected.
    #[error("Spreadsheet application unavailable: {0}")]
    ApplicationUnavailable(String),
    /// In-process layout renderer not compiled in.
    #[error("PDF layout renderer unavailable: {0}")]
    RenderingBackendUnavailable(String),
    /// Converter process exited unsuccessfully.
    #[error("PDF conversion failed (exit status {}): {stderr}", status.map_or_else(|| "unknown".to_string(), |n| n.to_string()))]
    ConversionProcess {
        /// Exit code, when the process exited normally.
        status: Option<i32>,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Automation session failed to open, export or close.
    #[error("Spreadsheet automation failed: {0}")]
    Automation(String),
    /// In-process PDF rendering failed.
    #[error("PDF rendering failed: {0}")]
    PdfRender(String),
    /// Persisted configuration is malformed.
    #[error("Invalid configuration: {0}")]
    ConfigFormat(String),
    /// Invalid caller argument.
    #[error("{0}")]
    InvalidOption(String),
    /// Writing an output file failed.
    #[error("Failed to write {}: {message}", path.display())]
    OutputWrite {
        /// Output path.
        path: PathBuf,
        /// Underlying error text.
        message: String,
    },
    /// Table operation failed.
    #[error("Table operation failed: {0}")]
    Table(String),
    /// Worker thread could not start or panicked.
    #[error("Split worker failed: {0}")]
    Worker(String),
}

impl SplitError {
    /// User-actionable guidance for this failure.
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::SourceNotFound(_) | Self::TemplateNotFound(_) => {
                "Check the file path and try again."
            }
            Self::PermissionDenied { .. } => {
                "Close the file if another program has it open, then check file permissions."
            }
            Self::SheetNotFound { .. } => "Pick one of the listed sheets.",
            Self::SourceUnreadable { .. } | Self::TemplateUnreadable { .. } => {
                "Make sure the file is a valid, unencrypted spreadsheet."
            }
            Self::KeyResolution(_) => {
                "Use a header name from the source sheet or a 1-based column index."
            }
            Self::GroupingType(_) => "Clean mixed-type values in the key column.",
            Self::BackendNotFound(_) => {
                "Install LibreOffice, set LIBREOFFICE_PATH, or pass the soffice path explicitly."
            }
            Self::ApplicationUnavailable(_) => {
                "Install Microsoft Excel or select another PDF engine."
            }
            Self::RenderingBackendUnavailable(_) => {
                "Build with the `pdf-layout` feature or select another PDF engine."
            }
            Self::ConversionProcess { .. } => {
                "Close running LibreOffice windows and retry; check the converter output above."
            }
            Self::Automation(_) => {
                "Close open Excel windows, dismiss pending dialogs and retry."
            }
            Self::PdfRender(_) => "Retry, or select another PDF engine.",
            Self::ConfigFormat(_) => "Fix the configuration file or save a fresh one.",
            Self::InvalidOption(_) => "Fix the highlighted input.",
            Self::OutputWrite { .. } => {
                "Check that the output directory is writable and the file is not open elsewhere."
            }
            Self::Table(_) => "Check the source sheet for malformed data.",
            Self::Worker(_) => "Retry the run; report the failure if it repeats.",
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
