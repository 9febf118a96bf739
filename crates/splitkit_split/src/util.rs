//! Stateless helper utilities shared by the split pipeline.

use chrono::{DateTime, NaiveDateTime, NaiveTime};
use polars::prelude::{AnyValue, TimeUnit};

use crate::conf::{
    C_DATETIME_TEXT_FORMAT, C_DATE_TEXT_FORMAT, C_FILENAME_KEY_FALLBACK, C_FILENAME_REPLACE_TO,
    N_EXCEL_SERIAL_LEAP_BUG_END, N_EXCEL_SERIAL_UNIX_EPOCH, N_MS_PER_DAY, N_WIDTH_CHAR_TO_PX,
    N_WIDTH_COL_PT_DEFAULT, N_WIDTH_PX_TO_PT, TUP_FILENAME_ILLEGAL,
};
use crate::spec::EnumCellValue;

////////////////////////////////////////////////////////////////////////////////
// #region CellValueConversion

/// Convert one polars value into the pipeline's scalar model.
pub fn derive_cell_value_from_any_value(value: AnyValue<'_>) -> EnumCellValue {
    match value {
        AnyValue::Null => EnumCellValue::None,
        AnyValue::String(val) => EnumCellValue::String(val.to_string()),
        AnyValue::StringOwned(val) => EnumCellValue::String(val.to_string()),
        AnyValue::Boolean(val) => EnumCellValue::Boolean(val),
        AnyValue::UInt8(val) => EnumCellValue::Integer(val as i64),
        AnyValue::UInt16(val) => EnumCellValue::Integer(val as i64),
        AnyValue::UInt32(val) => EnumCellValue::Integer(val as i64),
        AnyValue::UInt64(val) => match i64::try_from(val) {
            Ok(n) => EnumCellValue::Integer(n),
            Err(_) => EnumCellValue::Number(val as f64),
        },
        AnyValue::Int8(val) => EnumCellValue::Integer(val as i64),
        AnyValue::Int16(val) => EnumCellValue::Integer(val as i64),
        AnyValue::Int32(val) => EnumCellValue::Integer(val as i64),
        AnyValue::Int64(val) => EnumCellValue::Integer(val),
        AnyValue::Float32(val) => EnumCellValue::Number(val as f64),
        AnyValue::Float64(val) => EnumCellValue::Number(val),
        AnyValue::Datetime(val, unit, _) | AnyValue::DatetimeOwned(val, unit, _) => {
            match cast_timestamp_to_datetime(val, unit) {
                Some(ndt) => EnumCellValue::DateTime(ndt),
                None => EnumCellValue::Integer(val),
            }
        }
        _ => EnumCellValue::String(value.to_string()),
    }
}

fn cast_timestamp_to_datetime(value: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let dt = match unit {
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value)?,
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value)?,
        TimeUnit::Nanoseconds => DateTime::from_timestamp_nanos(value),
    };
    Some(dt.naive_utc())
}

/// Unix milliseconds of a naive (UTC) timestamp, as stored in datetime columns.
pub fn cast_datetime_to_millis(value: &NaiveDateTime) -> i64 {
    value.and_utc().timestamp_millis()
}

/// Excel serial number (1900 date system) of a timestamp.
pub fn convert_datetime_to_serial(value: &NaiveDateTime) -> f64 {
    let n_serial =
        N_EXCEL_SERIAL_UNIX_EPOCH + cast_datetime_to_millis(value) as f64 / N_MS_PER_DAY;
    // Serials before 1900-03-01 skip the phantom 1900-02-29.
    if n_serial < N_EXCEL_SERIAL_LEAP_BUG_END {
        n_serial - 1.0
    } else {
        n_serial
    }
}

/// `YYYY-MM-DD`, with ` HH:MM:SS` when the time is not midnight.
pub fn format_datetime_text(value: &NaiveDateTime) -> String {
    if value.time() == NaiveTime::MIN {
        value.format(C_DATE_TEXT_FORMAT).to_string()
    } else {
        value.format(C_DATETIME_TEXT_FORMAT).to_string()
    }
}

/// Display text of a float: integral values drop the decimal part.
pub fn format_number_text(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 9_007_199_254_740_992.0 {
        format!("{x:.0}")
    } else {
        x.to_string()
    }
}

/// Display text of a cell value; missing values render as empty text.
pub fn format_cell_text(value: &EnumCellValue) -> String {
    match value {
        EnumCellValue::None => String::new(),
        EnumCellValue::String(s) => s.clone(),
        EnumCellValue::Integer(n) => n.to_string(),
        EnumCellValue::Number(x) => format_number_text(*x),
        EnumCellValue::Boolean(b) => if *b { "True" } else { "False" }.to_string(),
        EnumCellValue::DateTime(ndt) => format_datetime_text(ndt),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region FileNaming

/// Replace reserved file name characters, trim, fall back to `Key` when empty.
pub fn sanitize_file_part(name: &str) -> String {
    let mut c_name = String::with_capacity(name.len());
    for ch in name.chars() {
        if TUP_FILENAME_ILLEGAL.contains(&ch) {
            c_name.push_str(C_FILENAME_REPLACE_TO);
        } else {
            c_name.push(ch);
        }
    }
    let c_name = c_name.trim();
    if c_name.is_empty() {
        C_FILENAME_KEY_FALLBACK.to_string()
    } else {
        c_name.to_string()
    }
}

/// Join `prefix`, sanitized key text and `suffix` with single spaces, skipping empty parts.
pub fn derive_output_stem(prefix: &str, key_text: &str, suffix: &str) -> String {
    let c_key = sanitize_file_part(key_text);
    [prefix.trim(), c_key.as_str(), suffix.trim()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetGeometry

/// Convert a 1-based column number into its letter reference (`1 -> A`, `27 -> AA`).
pub fn derive_column_letter(col_num: u32) -> String {
    let mut n_rest = col_num;
    let mut l_chars = Vec::new();
    while n_rest > 0 {
        let n_rem = (n_rest - 1) % 26;
        l_chars.push(char::from(b'A' + n_rem as u8));
        n_rest = (n_rest - 1) / 26;
    }
    l_chars.iter().rev().collect()
}

/// Quote a sheet name for use in a defined-name formula.
pub fn quote_sheet_name(sheet_name: &str) -> String {
    format!("'{}'", sheet_name.replace('\'', "''"))
}

/// Title rows reference covering rows `1..=header_rows`.
pub fn derive_print_titles_ref(sheet_name: &str, header_rows: u32) -> String {
    format!("{}!$1:${header_rows}", quote_sheet_name(sheet_name))
}

/// Last printed row: written rows below the header, at least one row past it.
pub fn derive_print_last_row(header_rows: u32, n_rows_written: u32) -> u32 {
    u32::max(
        header_rows.saturating_add(n_rows_written),
        header_rows.saturating_add(1),
    )
}

/// Print area reference from `A1` to the last written column and row.
pub fn derive_print_area_ref(sheet_name: &str, n_cols: u32, n_row_last: u32) -> String {
    let c_col_last = derive_column_letter(u32::max(n_cols, 1));
    format!(
        "{}!$A$1:${c_col_last}${n_row_last}",
        quote_sheet_name(sheet_name)
    )
}

/// Template column width (character units) to points.
pub fn convert_width_to_points(width: Option<f64>) -> f32 {
    match width {
        Some(w) if w > 0.0 => w as f32 * N_WIDTH_CHAR_TO_PX * N_WIDTH_PX_TO_PT,
        _ => N_WIDTH_COL_PT_DEFAULT,
    }
}

pub(crate) fn cast_row_num(value: usize) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("row index overflow: {value}"))
}

pub(crate) fn cast_col_num(value: usize) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("column index overflow: {value}"))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
