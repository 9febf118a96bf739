//! Per-group template rendering.

use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};

use polars::prelude::DataFrame;
use tracing::{debug, warn};
use chrono::{NaiveDateTime, NaiveTime};
use umya_spreadsheet::{Cell, NumberingFormat, Spreadsheet, Worksheet};

use crate::conf::{C_EXT_XLSX, C_NUMBER_FORMAT_DATE, C_NUMBER_FORMAT_DATETIME};
use crate::package::{
    SpecXlsxPackage, apply_print_names, strip_defined_names, strip_drawings,
    strip_external_links, strip_hyperlinks,
};
use crate::spec::{EnumCellValue, ReportSplit, SpecGroup, SplitError};
use crate::template::{parse_template_book, read_template_bytes};
use crate::util::{
    cast_col_num, cast_row_num, convert_datetime_to_serial, derive_cell_value_from_any_value,
    derive_output_stem, derive_print_area_ref, derive_print_last_row, derive_print_titles_ref,
    format_cell_text,
};

type FnPackageStep = fn(&mut SpecXlsxPackage) -> Result<usize, String>;

/// Cleanup steps applied to every rendered package, in order.
const TUP_PACKAGE_STEPS: [(&str, FnPackageStep); 4] = [
    ("defined_names", strip_defined_names),
    ("external_links", strip_external_links),
    ("drawings", strip_drawings),
    ("hyperlinks", strip_hyperlinks),
];

/// Renders groups into copies of one template workbook.
///
/// The template is read from disk once; each group parses a fresh copy.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    path_template: PathBuf,
    bytes_template: Vec<u8>,
    header_rows: u32,
}

impl TemplateRenderer {
    /// Load the template bytes and verify they parse.
    pub fn new(path_template: &Path, header_rows: u32) -> Result<Self, SplitError> {
        let bytes_template = read_template_bytes(path_template)?;
        parse_template_book(path_template, &bytes_template)?;
        Ok(Self {
            path_template: path_template.to_path_buf(),
            bytes_template,
            header_rows,
        })
    }

    /// Output path for a group key.
    pub fn derive_output_path(
        dir_out: &Path,
        prefix: &str,
        key: &EnumCellValue,
        suffix: &str,
    ) -> PathBuf {
        let c_stem = derive_output_stem(prefix, &format_cell_text(key), suffix);
        dir_out.join(format!("{c_stem}.{C_EXT_XLSX}"))
    }

    /// Render `group` and save it under `dir_out`, overwriting.
    ///
    /// Package cleanup failures are recorded as warnings.
    pub fn render_group(
        &self,
        group: &SpecGroup,
        dir_out: &Path,
        prefix: &str,
        suffix: &str,
        report: &mut ReportSplit,
    ) -> Result<PathBuf, SplitError> {
        let path_out = Self::derive_output_path(dir_out, prefix, &group.key, suffix);
        let mut book = parse_template_book(&self.path_template, &self.bytes_template)?;

        let n_rows = cast_row_num(group.df.height()).map_err(SplitError::Table)?;
        let n_cols = cast_col_num(group.df.width()).map_err(SplitError::Table)?;
        let n_row_start = self.header_rows.saturating_add(1);
        let c_sheet = {
            let ws = first_sheet_mut(&mut book, &self.path_template)?;
            propagate_row_style(ws, n_row_start, n_rows, n_cols);
            write_group_rows(ws, &group.df, n_row_start)?;
            ws.get_name().to_string()
        };

        let mut buf = Cursor::new(Vec::new());
        umya_spreadsheet::writer::xlsx::write_writer(&book, &mut buf).map_err(|err| {
            SplitError::OutputWrite {
                path: path_out.clone(),
                message: err.to_string(),
            }
        })?;

        let n_row_last = derive_print_last_row(self.header_rows, n_rows);
        let bytes_out = match finalize_package(
            buf.get_ref(),
            &derive_print_titles_ref(&c_sheet, self.header_rows),
            &derive_print_area_ref(&c_sheet, n_cols, n_row_last),
        ) {
            Ok((bytes, l_warnings)) => {
                for c_msg in l_warnings {
                    warn!(path = %path_out.display(), "{c_msg}");
                    report.warn(format!("{}: {c_msg}", path_out.display()));
                }
                bytes
            }
            Err(c_msg) => {
                warn!(path = %path_out.display(), "package post-processing skipped: {c_msg}");
                report.warn(format!(
                    "{}: package post-processing skipped: {c_msg}",
                    path_out.display()
                ));
                buf.into_inner()
            }
        };

        std::fs::write(&path_out, bytes_out).map_err(|err| match err.kind() {
            ErrorKind::PermissionDenied => SplitError::PermissionDenied {
                path: path_out.clone(),
                message: err.to_string(),
            },
            _ => SplitError::OutputWrite {
                path: path_out.clone(),
                message: err.to_string(),
            },
        })?;
        debug!(path = %path_out.display(), rows = n_rows, cols = n_cols, "group rendered");
        Ok(path_out)
    }
}

fn first_sheet_mut<'a>(
    book: &'a mut Spreadsheet,
    path_template: &Path,
) -> Result<&'a mut Worksheet, SplitError> {
    book.get_sheet_mut(&0usize)
        .ok_or_else(|| SplitError::TemplateUnreadable {
            path: path_template.to_path_buf(),
            message: "template has no worksheet".to_string(),
        })
}

////////////////////////////////////////////////////////////////////////////////
// #region CellWrites

/// Write `df` from row `n_row_start` down, one source column per sheet column.
fn write_group_rows(
    ws: &mut Worksheet,
    df: &DataFrame,
    n_row_start: u32,
) -> Result<(), SplitError> {
    for (n_col_idx, column) in df.get_columns().iter().enumerate() {
        let n_col = cast_col_num(n_col_idx + 1).map_err(SplitError::Table)?;
        for n_row_idx in 0..df.height() {
            let value = column
                .get(n_row_idx)
                .map_err(|err| SplitError::Table(err.to_string()))?;
            let n_row = cast_row_num(n_row_idx)
                .ok()
                .and_then(|n_offset| n_row_start.checked_add(n_offset))
                .ok_or_else(|| SplitError::Table(format!("row index overflow: {n_row_idx}")))?;
            let cell = ws.get_cell_mut((n_col, n_row));
            match derive_cell_value_from_any_value(value) {
                EnumCellValue::None => {
                    cell.set_value_string("");
                }
                EnumCellValue::String(s) => {
                    cell.set_value_string(s);
                }
                EnumCellValue::Integer(n) => {
                    cell.set_value_number(n as f64);
                }
                EnumCellValue::Number(x) => {
                    cell.set_value_number(x);
                }
                EnumCellValue::Boolean(b) => {
                    cell.set_value_bool(b);
                }
                EnumCellValue::DateTime(ndt) => write_datetime(cell, &ndt),
            }
        }
    }
    Ok(())
}

/// Write a date as its serial number; a `General` cell gets a date format.
fn write_datetime(cell: &mut Cell, value: &NaiveDateTime) {
    cell.set_value_number(convert_datetime_to_serial(value));
    let if_general = cell
        .get_style()
        .get_number_format()
        .is_none_or(|fmt| fmt.get_format_code() == NumberingFormat::FORMAT_GENERAL);
    if if_general {
        let c_format = if value.time() == NaiveTime::MIN {
            C_NUMBER_FORMAT_DATE
        } else {
            C_NUMBER_FORMAT_DATETIME
        };
        cell.get_style_mut()
            .get_number_format_mut()
            .set_format_code(c_format);
    }
}

/// Copy each cell style of `n_row_start` onto the following `n_rows - 1` rows.
fn propagate_row_style(ws: &mut Worksheet, n_row_start: u32, n_rows: u32, n_cols: u32) {
    let l_styles: Vec<_> = (1..=n_cols)
        .map(|n_col| ws.get_cell((n_col, n_row_start)).map(|cell| cell.get_style().clone()))
        .collect();
    let n_row_end = n_row_start.saturating_add(n_rows);
    for n_row in n_row_start.saturating_add(1)..n_row_end {
        for (n_col, style) in (1u32..).zip(&l_styles) {
            if let Some(style) = style {
                ws.get_cell_mut((n_col, n_row)).set_style(style.clone());
            }
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Package

/// Run cleanup steps and write print names. Step failures become warnings.
fn finalize_package(
    bytes: &[u8],
    print_titles_ref: &str,
    print_area_ref: &str,
) -> Result<(Vec<u8>, Vec<String>), String> {
    let mut pkg = SpecXlsxPackage::from_bytes(bytes)?;
    let mut l_warnings = Vec::new();
    for (c_step, fn_step) in TUP_PACKAGE_STEPS {
        match fn_step(&mut pkg) {
            Ok(n_removed) => debug!(step = c_step, removed = n_removed, "package step"),
            Err(c_msg) => l_warnings.push(format!("cleanup step `{c_step}` skipped: {c_msg}")),
        }
    }
    if let Err(c_msg) = apply_print_names(&mut pkg, print_titles_ref, print_area_ref) {
        l_warnings.push(format!("print geometry skipped: {c_msg}"));
    }
    Ok((pkg.to_bytes()?, l_warnings))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
