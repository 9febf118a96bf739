//! Split constants and default presets.

////////////////////////////////////////////////////////////////////////////////
// #region ProbeLimits

/// Hard cap on template header columns scanned (1-based, inclusive).
pub const N_COLS_PROBE_MAX: u32 = 500;
/// Consecutive valueless and widthless header cells that end a probe.
pub const N_COLS_PROBE_EMPTY_STREAK: usize = 5;

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region FileNaming

/// Characters replaced in output file name parts.
pub const TUP_FILENAME_ILLEGAL: [char; 11] =
    [':', '\\', '/', '?', '*', '[', ']', '<', '>', '|', '"'];
/// Replacement for illegal file name characters.
pub const C_FILENAME_REPLACE_TO: &str = "_";
/// File name part used when a sanitized key is empty.
pub const C_FILENAME_KEY_FALLBACK: &str = "Key";
/// Extension of rendered workbooks.
pub const C_EXT_XLSX: &str = "xlsx";
/// Extension of exported PDFs.
pub const C_EXT_PDF: &str = "pdf";

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SourceHeaders

/// Prefix for blank source header names (`Unnamed: <idx>`).
pub const C_HEADER_UNNAMED_PREFIX: &str = "Unnamed: ";
/// Temporary grouping column used by the key-as-text fallback.
pub const C_COL_KEY_TEXT_TEMP: &str = "__splitkit_key_text__";

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Dates

/// Excel serial (1900 system) of 1970-01-01.
pub const N_EXCEL_SERIAL_UNIX_EPOCH: f64 = 25_569.0;
/// First serial after the phantom 1900-02-29 (1900-03-01).
pub const N_EXCEL_SERIAL_LEAP_BUG_END: f64 = 61.0;
pub const N_MS_PER_DAY: f64 = 86_400_000.0;
/// Display text of a date without time part.
pub const C_DATE_TEXT_FORMAT: &str = "%Y-%m-%d";
/// Display text of a date with time part.
pub const C_DATETIME_TEXT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Number format given to date cells written over a `General` cell.
pub const C_NUMBER_FORMAT_DATE: &str = "yyyy-mm-dd";
/// Number format given to date-time cells written over a `General` cell.
pub const C_NUMBER_FORMAT_DATETIME: &str = "yyyy-mm-dd h:mm:ss";

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PageLayout

/// Template paper size code for US Letter.
pub const N_PAPER_SIZE_LETTER: u32 = 1;
/// A4 page size in points `(width, height)`.
pub const TUP_PAGE_A4_PT: (f32, f32) = (595.2756, 841.8898);
/// US Letter page size in points `(width, height)`.
pub const TUP_PAGE_LETTER_PT: (f32, f32) = (612.0, 792.0);
/// Points per inch.
pub const N_PT_PER_INCH: f32 = 72.0;
/// Default left margin in inches.
pub const N_MARGIN_LEFT_IN_DEFAULT: f32 = 0.7;
/// Default right margin in inches.
pub const N_MARGIN_RIGHT_IN_DEFAULT: f32 = 0.7;
/// Default top margin in inches.
pub const N_MARGIN_TOP_IN_DEFAULT: f32 = 0.75;
/// Default bottom margin in inches.
pub const N_MARGIN_BOTTOM_IN_DEFAULT: f32 = 0.75;
/// Character-width units to pixels.
pub const N_WIDTH_CHAR_TO_PX: f32 = 7.0;
/// Pixels to points.
pub const N_WIDTH_PX_TO_PT: f32 = 0.75;
/// Column width in points when the template sets none.
pub const N_WIDTH_COL_PT_DEFAULT: f32 = 50.0;

/// Table font size in points.
pub const N_TABLE_FONT_SIZE: f32 = 9.0;
/// Cell padding in points (left/right).
pub const N_TABLE_PAD_X: f32 = 6.0;
/// Cell padding in points (top/bottom).
pub const N_TABLE_PAD_Y: f32 = 3.0;
/// Grid line width.
pub const N_TABLE_GRID_WIDTH: f32 = 0.25;
/// Rule width drawn above the header row.
pub const N_TABLE_HEADER_RULE_WIDTH: f32 = 0.75;
/// Header fill gray level (`#F0F0F0`).
pub const N_TABLE_HEADER_FILL_GRAY: f32 = 240.0 / 255.0;

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Converters

/// Environment variable naming the office converter executable.
pub const C_ENV_OFFICE_PATH: &str = "LIBREOFFICE_PATH";
/// Converter executable name on Windows.
pub const C_OFFICE_EXE_WINDOWS: &str = "soffice.exe";
/// Converter executable name elsewhere.
pub const C_OFFICE_EXE_UNIX: &str = "soffice";

/// Well-known converter install locations, checked after env and `PATH`.
pub const TUP_OFFICE_COMMON_PATHS: [&str; 10] = [
    r"C:\Program Files\LibreOffice\program\soffice.exe",
    r"C:\Program Files (x86)\LibreOffice\program\soffice.exe",
    r"C:\PortableApps\LibreOfficePortable\App\libreoffice\program\soffice.exe",
    r"D:\Program Files\LibreOffice\program\soffice.exe",
    r"D:\Program Files (x86)\LibreOffice\program\soffice.exe",
    r"D:\PortableApps\LibreOfficePortable\App\libreoffice\program\soffice.exe",
    "/usr/bin/soffice",
    "/usr/local/bin/soffice",
    "/opt/libreoffice/program/soffice",
    "/Applications/LibreOffice.app/Contents/MacOS/soffice",
];

/// Automation ProgID of the native spreadsheet application.
pub const C_NATIVE_APP_PROG_ID: &str = "Excel.Application";

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ConfigDefaults

/// INI section holding template settings.
pub const C_INI_SECTION_TEMPLATE: &str = "template";
/// INI section holding source settings.
pub const C_INI_SECTION_SOURCE: &str = "source";
/// INI section holding output settings.
pub const C_INI_SECTION_OUTPUT: &str = "output";
/// Legacy single-section layout written by older front-ends.
pub const C_INI_SECTION_LEGACY: &str = "ExcelSplitter";
/// Default header row count.
pub const N_HEADER_ROWS_DEFAULT: u32 = 5;

// #endregion
////////////////////////////////////////////////////////////////////////////////

/// Column selector reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumColumnIdentifier {
    /// Select by column name.
    Name(String),
    /// Select by one-based column index.
    Index(usize),
}

impl EnumColumnIdentifier {
    /// Parse raw user input: pure ASCII digits (surrounding whitespace ignored)
    /// select by index, so a header made only of digits is reachable by position
    /// only. Anything else is a name, kept verbatim for exact matching.
    pub fn parse(raw: &str) -> Self {
        let c_digits = raw.trim();
        if !c_digits.is_empty()
            && c_digits.chars().all(|c| c.is_ascii_digit())
            && let Ok(n_idx) = c_digits.parse::<usize>()
        {
            return Self::Index(n_idx);
        }
        Self::Name(raw.to_string())
    }
}

impl std::fmt::Display for EnumColumnIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{name}"),
            Self::Index(idx) => write!(f, "{idx}"),
        }
    }
}
