//! Source workbook loading: sheet listing, header listing and table load.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::Path;

use calamine::{Data, Range, Reader, open_workbook_auto};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use polars::prelude::{Column, DataFrame, DataType, PolarsResult, TimeUnit};
use tracing::debug;

use crate::conf::C_HEADER_UNNAMED_PREFIX;
use crate::spec::SplitError;
use crate::util::{cast_datetime_to_millis, format_datetime_text, format_number_text};

////////////////////////////////////////////////////////////////////////////////
// #region PublicApi

/// List sheet names of the source workbook in workbook order.
pub fn list_sheet_names(path_source: &Path) -> Result<Vec<String>, SplitError> {
    let workbook = open_source_workbook(path_source)?;
    Ok(workbook.sheet_names().to_vec())
}

/// Read the resolved column names of `sheet_name` (first row is the header).
pub fn read_source_headers(path_source: &Path, sheet_name: &str) -> Result<Vec<String>, SplitError> {
    let range = read_sheet_range(path_source, sheet_name)?;
    let (_, n_col_offset) = range.start().unwrap_or((0, 0));
    let Some(row_header) = range.rows().next() else {
        return Ok(vec![]);
    };
    Ok(derive_header_names(row_header, n_col_offset as usize))
}

/// Key column choices offered to front-ends: header names, then `1..=n` indices.
pub fn derive_key_column_choices(headers: &[String]) -> Vec<String> {
    headers
        .iter()
        .cloned()
        .chain((1..=headers.len()).map(|n_idx| n_idx.to_string()))
        .collect()
}

/// Load `sheet_name` into a table. The first row is the header.
///
/// Column types:
/// - every non-empty value integral → `Int64`
/// - every non-empty value numeric → `Float64`
/// - every non-empty value boolean → `Boolean`
/// - every non-empty value a calendar date → `Datetime[ms]`
/// - anything else → `String` (dates as `YYYY-MM-DD[ HH:MM:SS]`)
///
/// Empty cells become nulls. Serial dates follow the workbook's date system.
pub fn read_source_table(path_source: &Path, sheet_name: &str) -> Result<DataFrame, SplitError> {
    let range = read_sheet_range(path_source, sheet_name)?;
    let (_, n_col_offset) = range.start().unwrap_or((0, 0));
    let n_col_offset = n_col_offset as usize;

    let mut it_rows = range.rows();
    let Some(row_header) = it_rows.next() else {
        return Ok(DataFrame::empty());
    };
    let l_headers = derive_header_names(row_header, n_col_offset);
    let l_body: Vec<&[Data]> = it_rows.collect();

    let mut l_columns = Vec::with_capacity(l_headers.len());
    for (n_idx, c_name) in l_headers.iter().enumerate() {
        let l_cells: Vec<&Data> = l_body
            .iter()
            .map(|row| {
                n_idx
                    .checked_sub(n_col_offset)
                    .and_then(|n_rel| row.get(n_rel))
                    .unwrap_or(&Data::Empty)
            })
            .collect();
        l_columns.push(
            create_column(c_name, &l_cells).map_err(|err| SplitError::Table(err.to_string()))?,
        );
    }

    let df = DataFrame::new(l_columns).map_err(|err| SplitError::Table(err.to_string()))?;
    debug!(
        sheet = sheet_name,
        height = df.height(),
        width = df.width(),
        "source table loaded"
    );
    Ok(df)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WorkbookAccess

fn open_source_workbook(
    path_source: &Path,
) -> Result<calamine::Sheets<std::io::BufReader<std::fs::File>>, SplitError> {
    if let Err(err) = std::fs::File::open(path_source) {
        return Err(match err.kind() {
            ErrorKind::NotFound => SplitError::SourceNotFound(path_source.to_path_buf()),
            ErrorKind::PermissionDenied => SplitError::PermissionDenied {
                path: path_source.to_path_buf(),
                message: err.to_string(),
            },
            _ => SplitError::SourceUnreadable {
                path: path_source.to_path_buf(),
                message: err.to_string(),
            },
        });
    }

    open_workbook_auto(path_source).map_err(|err| SplitError::SourceUnreadable {
        path: path_source.to_path_buf(),
        message: err.to_string(),
    })
}

fn read_sheet_range(path_source: &Path, sheet_name: &str) -> Result<Range<Data>, SplitError> {
    let mut workbook = open_source_workbook(path_source)?;
    let l_sheets = workbook.sheet_names().to_vec();
    if !l_sheets.iter().any(|c_sheet| c_sheet == sheet_name) {
        return Err(SplitError::SheetNotFound {
            sheet: sheet_name.to_string(),
            available: l_sheets,
        });
    }

    workbook
        .worksheet_range(sheet_name)
        .map_err(|err| SplitError::SourceUnreadable {
            path: path_source.to_path_buf(),
            message: format!("sheet {sheet_name:?}: {err}"),
        })
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Headers

/// Resolve header names: blanks become `Unnamed: <idx>`, duplicates get `.1`, `.2`, ...
pub fn derive_header_names(row_header: &[Data], n_col_offset: usize) -> Vec<String> {
    let n_width = n_col_offset + row_header.len();
    let l_raw: Vec<String> = (0..n_width)
        .map(|n_idx| {
            let c_text = n_idx
                .checked_sub(n_col_offset)
                .and_then(|n_rel| row_header.get(n_rel))
                .map(derive_data_text)
                .unwrap_or_default();
            if c_text.is_empty() {
                format!("{C_HEADER_UNNAMED_PREFIX}{n_idx}")
            } else {
                c_text
            }
        })
        .collect();
    derive_unique_names(&l_raw)
}

/// Suffix repeated names with `.n` so every name is unique.
pub fn derive_unique_names(names: &[String]) -> Vec<String> {
    let mut set_seen: BTreeSet<String> = BTreeSet::new();
    let mut l_out = Vec::with_capacity(names.len());
    for c_name in names {
        let mut c_candidate = c_name.clone();
        let mut n_suffix = 0;
        while set_seen.contains(&c_candidate) {
            n_suffix += 1;
            c_candidate = format!("{c_name}.{n_suffix}");
        }
        set_seen.insert(c_candidate.clone());
        l_out.push(c_candidate);
    }
    l_out
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ColumnBuild

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnumColumnKind {
    Integer,
    Float,
    Boolean,
    DateTime,
    Text,
}

fn derive_column_kind(cells: &[&Data]) -> EnumColumnKind {
    let mut if_any = false;
    let mut if_all_integral = true;
    let mut if_all_numeric = true;
    let mut if_all_bool = true;
    let mut if_all_datetime = true;

    for cell in cells {
        match cell {
            Data::Empty => continue,
            Data::Int(_) => {
                if_all_bool = false;
                if_all_datetime = false;
            }
            Data::Float(x) => {
                if_all_bool = false;
                if_all_datetime = false;
                if !(x.is_finite() && x.fract() == 0.0 && x.abs() < 9.0e15) {
                    if_all_integral = false;
                }
            }
            Data::Bool(_) => {
                if_all_numeric = false;
                if_all_integral = false;
                if_all_datetime = false;
            }
            other => {
                if_all_numeric = false;
                if_all_integral = false;
                if_all_bool = false;
                if derive_data_datetime(other).is_none() {
                    if_all_datetime = false;
                }
            }
        }
        if_any = true;
    }

    if !if_any {
        EnumColumnKind::Text
    } else if if_all_numeric && if_all_integral {
        EnumColumnKind::Integer
    } else if if_all_numeric {
        EnumColumnKind::Float
    } else if if_all_bool {
        EnumColumnKind::Boolean
    } else if if_all_datetime {
        EnumColumnKind::DateTime
    } else {
        EnumColumnKind::Text
    }
}

fn create_column(name: &str, cells: &[&Data]) -> PolarsResult<Column> {
    let column = match derive_column_kind(cells) {
        EnumColumnKind::Integer => {
            let l_values: Vec<Option<i64>> = cells
                .iter()
                .map(|cell| match cell {
                    Data::Int(n) => Some(*n),
                    Data::Float(x) => Some(*x as i64),
                    _ => None,
                })
                .collect();
            Column::new(name.into(), l_values)
        }
        EnumColumnKind::Float => {
            let l_values: Vec<Option<f64>> = cells
                .iter()
                .map(|cell| match cell {
                    Data::Int(n) => Some(*n as f64),
                    Data::Float(x) => Some(*x),
                    _ => None,
                })
                .collect();
            Column::new(name.into(), l_values)
        }
        EnumColumnKind::Boolean => {
            let l_values: Vec<Option<bool>> = cells
                .iter()
                .map(|cell| match cell {
                    Data::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect();
            Column::new(name.into(), l_values)
        }
        EnumColumnKind::DateTime => {
            let l_millis: Vec<Option<i64>> = cells
                .iter()
                .map(|cell| derive_data_datetime(cell).map(|ndt| cast_datetime_to_millis(&ndt)))
                .collect();
            Column::new(name.into(), l_millis)
                .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
        }
        EnumColumnKind::Text => {
            let l_values: Vec<Option<String>> = cells
                .iter()
                .map(|cell| match cell {
                    Data::Empty => None,
                    other => Some(derive_data_text(other)),
                })
                .collect();
            Column::new(name.into(), l_values)
        }
    };
    Ok(column)
}

/// Calendar value of a date cell; durations and non-date cells yield `None`.
fn derive_data_datetime(value: &Data) -> Option<NaiveDateTime> {
    match value {
        Data::DateTime(dt) if dt.is_datetime() => dt.as_datetime(),
        Data::DateTimeIso(s) => s.parse::<NaiveDateTime>().ok().or_else(|| {
            s.parse::<NaiveDate>()
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN))
        }),
        _ => None,
    }
}

/// Display text of one workbook cell.
pub fn derive_data_text(value: &Data) -> String {
    match value {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(n) => n.to_string(),
        Data::Float(x) => format_number_text(*x),
        Data::Bool(b) => if *b { "True" } else { "False" }.to_string(),
        Data::DateTime(dt) => match derive_data_datetime(value) {
            Some(ndt) => format_datetime_text(&ndt),
            None => format_number_text(dt.as_f64()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(err) => err.to_string(),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::SpecXlsxPackage;
    use crate::spec::EnumCellValue;
    use crate::testing::{FixtureCell, TestDir, write_source_fixture};
    use crate::util::derive_cell_value_from_any_value;
    use pretty_assertions::assert_eq;

    fn create_datetime(y: i32, m: u32, d: u32, hh: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(hh, 0, 0))
            .expect("valid datetime")
    }

    fn write_basic_source(tmp: &TestDir) -> std::path::PathBuf {
        let path = tmp.path().join("source.xlsx");
        write_source_fixture(
            &path,
            "Data",
            &["ID", "Name", "Amount"],
            &[
                vec![FixtureCell::Number(1.0), FixtureCell::Text("A"), FixtureCell::Number(10.0)],
                vec![FixtureCell::Number(2.0), FixtureCell::Text("B"), FixtureCell::Number(20.5)],
                vec![FixtureCell::Number(1.0), FixtureCell::Text("C"), FixtureCell::Number(30.0)],
            ],
        );
        path
    }

    #[test]
    fn list_sheet_names_returns_workbook_order() {
        let tmp = TestDir::new();
        let path = write_basic_source(&tmp);
        assert_eq!(list_sheet_names(&path).expect("sheets"), vec!["Data".to_string()]);
    }

    #[test]
    fn read_source_table_infers_column_types() {
        let tmp = TestDir::new();
        let path = write_basic_source(&tmp);
        let df = read_source_table(&path, "Data").expect("table");

        assert_eq!(df.height(), 3);
        assert_eq!(
            df.get_column_names_str(),
            vec!["ID", "Name", "Amount"]
        );
        assert_eq!(df.column("ID").expect("ID").dtype(), &DataType::Int64);
        assert_eq!(df.column("Name").expect("Name").dtype(), &DataType::String);
        assert_eq!(df.column("Amount").expect("Amount").dtype(), &DataType::Float64);
    }

    #[test]
    fn read_source_table_keeps_dates_and_booleans_typed() {
        let tmp = TestDir::new();
        let path = tmp.path().join("typed.xlsx");
        write_source_fixture(
            &path,
            "Data",
            &["ID", "When", "Paid"],
            &[
                vec![FixtureCell::Number(1.0), FixtureCell::Date(45292.0), FixtureCell::Bool(true)],
                vec![FixtureCell::Number(2.0), FixtureCell::Date(45292.5), FixtureCell::Empty],
            ],
        );
        let df = read_source_table(&path, "Data").expect("table");

        assert_eq!(
            df.column("When").expect("When").dtype(),
            &DataType::Datetime(TimeUnit::Milliseconds, None)
        );
        assert_eq!(df.column("Paid").expect("Paid").dtype(), &DataType::Boolean);
        let value = |n_row: usize| {
            derive_cell_value_from_any_value(df.column("When").expect("When").get(n_row).expect("get"))
        };
        assert_eq!(value(0), EnumCellValue::DateTime(create_datetime(2024, 1, 1, 0)));
        assert_eq!(value(1), EnumCellValue::DateTime(create_datetime(2024, 1, 1, 12)));
    }

    #[test]
    fn read_source_table_honors_1904_date_system() {
        let tmp = TestDir::new();
        let path = tmp.path().join("dates1904.xlsx");
        write_source_fixture(
            &path,
            "Data",
            &["ID", "When"],
            &[vec![FixtureCell::Number(1.0), FixtureCell::Date(45292.0)]],
        );
        let mut pkg = SpecXlsxPackage::from_bytes(&std::fs::read(&path).expect("read"))
            .expect("package");
        let c_xml = String::from_utf8(pkg.get("xl/workbook.xml").expect("workbook").to_vec())
            .expect("utf8");
        assert!(c_xml.contains("<workbookPr"), "{c_xml}");
        let c_xml = c_xml.replacen("<workbookPr", r#"<workbookPr date1904="1""#, 1);
        pkg.set("xl/workbook.xml", c_xml.into_bytes());
        std::fs::write(&path, pkg.to_bytes().expect("zip")).expect("write");

        let df = read_source_table(&path, "Data").expect("table");
        let value = derive_cell_value_from_any_value(df.column("When").expect("When").get(0).expect("get"));
        assert_eq!(value, EnumCellValue::DateTime(create_datetime(2028, 1, 2, 0)));
    }

    #[test]
    fn read_source_headers_and_key_choices() {
        let tmp = TestDir::new();
        let path = write_basic_source(&tmp);
        let l_headers = read_source_headers(&path, "Data").expect("headers");
        assert_eq!(l_headers, vec!["ID", "Name", "Amount"]);
        assert_eq!(
            derive_key_column_choices(&l_headers),
            vec!["ID", "Name", "Amount", "1", "2", "3"]
        );
    }

    #[test]
    fn read_source_missing_file_and_sheet_are_distinct_errors() {
        let tmp = TestDir::new();
        let err = read_source_table(&tmp.path().join("nope.xlsx"), "Data").expect_err("missing");
        assert!(matches!(err, SplitError::SourceNotFound(_)));

        let path = write_basic_source(&tmp);
        let err = read_source_table(&path, "Other").expect_err("sheet");
        match err {
            SplitError::SheetNotFound { sheet, available } => {
                assert_eq!(sheet, "Other");
                assert_eq!(available, vec!["Data".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn read_source_garbage_file_is_unreadable() {
        let tmp = TestDir::new();
        let path = tmp.path().join("broken.xlsx");
        std::fs::write(&path, b"not a workbook").expect("write");
        let err = list_sheet_names(&path).expect_err("garbage");
        assert!(matches!(err, SplitError::SourceUnreadable { .. }));
    }

    #[test]
    fn derive_header_names_mangles_blank_and_duplicate_names() {
        let row = vec![
            Data::String("ID".to_string()),
            Data::Empty,
            Data::String("ID".to_string()),
            Data::String("ID".to_string()),
        ];
        assert_eq!(
            derive_header_names(&row, 1),
            vec!["Unnamed: 0", "ID", "Unnamed: 2", "ID.1", "ID.2"]
        );
    }

    #[test]
    fn mixed_columns_fall_back_to_text() {
        let cells = [
            &Data::Float(1.0),
            &Data::String("x".to_string()),
            &Data::Empty,
        ];
        let column = create_column("Mixed", &cells).expect("column");
        assert_eq!(column.dtype(), &DataType::String);
        assert_eq!(column.null_count(), 1);

        let cells = [
            &Data::DateTimeIso("2024-02-03".to_string()),
            &Data::String("later".to_string()),
        ];
        let column = create_column("When", &cells).expect("column");
        assert_eq!(column.dtype(), &DataType::String);
        assert_eq!(
            derive_cell_value_from_any_value(column.get(0).expect("get")),
            EnumCellValue::String("2024-02-03".to_string())
        );
    }
}
