//! Template probing (header descriptor, page setup) and column alignment.

use std::io::ErrorKind;
use std::path::Path;

use tracing::debug;
use umya_spreadsheet::{Spreadsheet, Worksheet};

use crate::conf::{N_COLS_PROBE_EMPTY_STREAK, N_COLS_PROBE_MAX};
use crate::package::{SpecXlsxPackage, read_page_setup};
use crate::spec::{SpecPageSetup, SpecTemplateColumn, SpecTemplateHeader, SplitError};

////////////////////////////////////////////////////////////////////////////////
// #region TemplateAccess

/// Read the template file, mapping IO failures to template errors.
pub fn read_template_bytes(path_template: &Path) -> Result<Vec<u8>, SplitError> {
    std::fs::read(path_template).map_err(|err| match err.kind() {
        ErrorKind::NotFound => SplitError::TemplateNotFound(path_template.to_path_buf()),
        ErrorKind::PermissionDenied => SplitError::PermissionDenied {
            path: path_template.to_path_buf(),
            message: err.to_string(),
        },
        _ => SplitError::TemplateUnreadable {
            path: path_template.to_path_buf(),
            message: err.to_string(),
        },
    })
}

/// Parse template bytes into a workbook.
pub fn parse_template_book(
    path_template: &Path,
    bytes: &[u8],
) -> Result<Spreadsheet, SplitError> {
    umya_spreadsheet::reader::xlsx::read_reader(std::io::Cursor::new(bytes), true).map_err(|err| {
        SplitError::TemplateUnreadable {
            path: path_template.to_path_buf(),
            message: err.to_string(),
        }
    })
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region HeaderProbe

/// Probe the header row (`header_rows`, 1-based) of the template's first sheet.
///
/// Returns `None` when no scanned column has header text.
pub fn probe_template_header(
    path_template: &Path,
    header_rows: u32,
) -> Result<Option<SpecTemplateHeader>, SplitError> {
    let header = probe_template_columns(path_template, header_rows)?;
    Ok(header.has_header_text().then_some(header))
}

/// Scanned template columns, kept even when every header cell is blank.
pub fn probe_template_columns(
    path_template: &Path,
    header_rows: u32,
) -> Result<SpecTemplateHeader, SplitError> {
    let bytes = read_template_bytes(path_template)?;
    let book = parse_template_book(path_template, &bytes)?;
    let ws = book
        .get_sheet(&0usize)
        .ok_or_else(|| SplitError::TemplateUnreadable {
            path: path_template.to_path_buf(),
            message: "template has no worksheet".to_string(),
        })?;
    Ok(derive_template_columns(ws, header_rows))
}

/// Scan `ws` row `header_rows` from column 1.
///
/// Stops after [`N_COLS_PROBE_EMPTY_STREAK`] consecutive cells without value and
/// width, and never past [`N_COLS_PROBE_MAX`].
pub fn derive_template_columns(ws: &Worksheet, header_rows: u32) -> SpecTemplateHeader {
    let mut l_columns = Vec::new();
    let mut n_streak = 0usize;

    for n_col in 1..=N_COLS_PROBE_MAX {
        if n_streak >= N_COLS_PROBE_EMPTY_STREAK {
            break;
        }
        let c_header = ws.get_value((n_col, header_rows)).trim().to_string();
        let (width, if_hidden) = match ws.get_column_dimension_by_number(&n_col) {
            Some(dim) => {
                let n_width = dim.get_width().to_owned();
                (
                    (n_width > 0.0).then_some(n_width),
                    dim.get_hidden().to_owned(),
                )
            }
            None => (None, false),
        };

        if c_header.is_empty() && width.is_none() {
            n_streak += 1;
        } else {
            n_streak = 0;
        }
        l_columns.push(SpecTemplateColumn {
            header: c_header,
            if_hidden,
            width,
        });
    }

    debug!(
        header_rows,
        scanned = l_columns.len(),
        "template header probed"
    );
    SpecTemplateHeader { columns: l_columns }
}

/// Read paper size, orientation and margins of the template's first sheet.
pub fn probe_page_setup(path_template: &Path) -> Result<SpecPageSetup, SplitError> {
    let bytes = read_template_bytes(path_template)?;
    let map_err = |message: String| SplitError::TemplateUnreadable {
        path: path_template.to_path_buf(),
        message,
    };
    let pkg = SpecXlsxPackage::from_bytes(&bytes).map_err(map_err)?;
    let c_part = pkg.first_sheet_part().map_err(map_err)?;
    let xml_sheet = pkg
        .get(&c_part)
        .ok_or_else(|| map_err(format!("missing part {c_part}")))?;
    read_page_setup(xml_sheet).map_err(map_err)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Alignment

/// Source columns in template order when any header matches; otherwise unchanged.
///
/// Repeated template headers select their column once.
pub fn align_columns(
    source_columns: &[String],
    header: Option<&SpecTemplateHeader>,
) -> Vec<String> {
    let Some(header) = header else {
        return source_columns.to_vec();
    };
    let mut l_aligned: Vec<String> = Vec::new();
    for c_header in header.headers() {
        if c_header.is_empty() || l_aligned.iter().any(|c| c == c_header) {
            continue;
        }
        if source_columns.iter().any(|c| c == c_header) {
            l_aligned.push(c_header.to_string());
        }
    }
    if l_aligned.is_empty() {
        source_columns.to_vec()
    } else {
        l_aligned
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TemplateFixture, TestDir};
    use pretty_assertions::assert_eq;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn probe_reads_headers_widths_and_hidden_flags() {
        let tmp = TestDir::new();
        let mut fixture = TemplateFixture::new(2, &["ID", "Name", "Amount"]);
        fixture.widths = vec![Some(10.0), None, Some(20.0)];
        fixture.hidden = vec![1];
        let path = fixture.write(&tmp.path().join("tpl.xlsx"));

        let header = probe_template_header(&path, 2)
            .expect("probe")
            .expect("header");
        assert_eq!(&header.headers()[..3], &["ID", "Name", "Amount"]);
        assert!(header.columns[0].width.is_some_and(|w| (w - 10.0).abs() < 1.0));
        assert!(header.columns[2].width.is_some_and(|w| (w - 20.0).abs() < 1.0));
        assert!(header.columns[1].if_hidden);
        assert!(!header.columns[0].if_hidden);
    }

    #[test]
    fn probe_without_header_text_is_absent() {
        let tmp = TestDir::new();
        let path = TemplateFixture::new(1, &[]).write(&tmp.path().join("tpl.xlsx"));
        assert_eq!(probe_template_header(&path, 1).expect("probe"), None);
    }

    #[test]
    fn blank_header_template_keeps_widths_and_hidden_flags() {
        let tmp = TestDir::new();
        let mut fixture = TemplateFixture::new(1, &["", "", ""]);
        fixture.widths = vec![Some(10.0), Some(30.0), Some(20.0)];
        fixture.hidden = vec![1];
        let path = fixture.write(&tmp.path().join("tpl.xlsx"));

        assert_eq!(probe_template_header(&path, 1).expect("probe"), None);
        let header = probe_template_columns(&path, 1).expect("columns");
        assert!(!header.has_header_text());
        assert!(header.columns[0].width.is_some_and(|w| (w - 10.0).abs() < 1.0));
        assert!(header.columns[1].if_hidden);
        assert!(header.columns[2].width.is_some_and(|w| (w - 20.0).abs() < 1.0));
    }

    #[test]
    fn probe_stops_after_five_empty_columns() {
        let tmp = TestDir::new();
        let path = TemplateFixture::new(1, &["A", "", "", "", "", "", "G"])
            .write(&tmp.path().join("tpl.xlsx"));
        let header = probe_template_header(&path, 1).expect("probe").expect("header");
        assert_eq!(header.columns.len(), 6);
        assert!(header.find("G").is_none());

        let path = TemplateFixture::new(1, &["A", "", "", "", "", "F"])
            .write(&tmp.path().join("tpl2.xlsx"));
        let header = probe_template_header(&path, 1).expect("probe").expect("header");
        assert!(header.find("F").is_some());
    }

    #[test]
    fn probe_never_scans_past_column_cap() {
        let tmp = TestDir::new();
        let mut fixture = TemplateFixture::new(1, &["A"]);
        fixture.widths = vec![Some(12.0); 600];
        let path = fixture.write(&tmp.path().join("tpl.xlsx"));
        let header = probe_template_header(&path, 1).expect("probe").expect("header");
        assert_eq!(header.columns.len(), N_COLS_PROBE_MAX as usize);
    }

    #[test]
    fn probe_missing_template_is_not_found() {
        let tmp = TestDir::new();
        let err = probe_template_header(&tmp.path().join("nope.xlsx"), 1).expect_err("missing");
        assert!(matches!(err, SplitError::TemplateNotFound(_)));
    }

    #[test]
    fn probe_page_setup_reads_template_geometry() {
        let tmp = TestDir::new();
        let mut fixture = TemplateFixture::new(1, &["A"]);
        fixture.paper_size = Some(1);
        fixture.if_landscape = true;
        fixture.margins = Some((0.5, 0.6, 1.0, 1.2));
        let path = fixture.write(&tmp.path().join("tpl.xlsx"));

        let cfg_page = probe_page_setup(&path).expect("page setup");
        assert_eq!(cfg_page.paper_size, Some(1));
        assert!(cfg_page.if_landscape);
        assert_eq!(cfg_page.margin_left, Some(0.5));
        assert_eq!(cfg_page.margin_bottom, Some(1.2));
        assert_eq!(cfg_page.page_size_pt(), (792.0, 612.0));
    }

    #[test]
    fn align_columns_follows_template_order() {
        let header = SpecTemplateHeader {
            columns: ["Amount", "", "Missing", "ID", "Amount"]
                .iter()
                .map(|h| SpecTemplateColumn {
                    header: h.to_string(),
                    if_hidden: false,
                    width: None,
                })
                .collect(),
        };
        let source = cols(&["ID", "Name", "Amount"]);
        assert_eq!(align_columns(&source, Some(&header)), cols(&["Amount", "ID"]));
    }

    #[test]
    fn align_columns_is_identity_without_overlap_or_header() {
        let source = cols(&["ID", "Name"]);
        assert_eq!(align_columns(&source, None), source);
        let header = SpecTemplateHeader {
            columns: vec![SpecTemplateColumn {
                header: "Other".to_string(),
                if_hidden: false,
                width: None,
            }],
        };
        assert_eq!(align_columns(&source, Some(&header)), source);
    }
}
