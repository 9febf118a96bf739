//! Test fixtures: temporary directories and generated workbooks.

use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Color, Format, Workbook};

/// Temporary directory removed on drop.
pub(crate) struct TestDir {
    inner: tempfile::TempDir,
}

impl TestDir {
    pub(crate) fn new() -> Self {
        Self {
            inner: tempfile::tempdir().expect("create temp dir"),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        self.inner.path()
    }
}

/// One fixture cell.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FixtureCell<'a> {
    Text(&'a str),
    Number(f64),
    Bool(bool),
    /// Excel serial shown with a `yyyy-mm-dd` number format.
    Date(f64),
    Empty,
}

/// Write a single-sheet source workbook: header row, then `rows`.
pub(crate) fn write_source_fixture(
    path: &Path,
    sheet_name: &str,
    headers: &[&str],
    rows: &[Vec<FixtureCell<'_>>],
) {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name).expect("sheet name");
    let fmt_date = Format::new().set_num_format("yyyy-mm-dd");
    for (n_col, c_header) in headers.iter().enumerate() {
        worksheet
            .write_string(0, n_col as u16, *c_header)
            .expect("write header");
    }
    for (n_row, row) in rows.iter().enumerate() {
        let n_row = n_row as u32 + 1;
        for (n_col, cell) in row.iter().enumerate() {
            let n_col = n_col as u16;
            match cell {
                FixtureCell::Text(s) => {
                    worksheet.write_string(n_row, n_col, *s).expect("write text");
                }
                FixtureCell::Number(x) => {
                    worksheet.write_number(n_row, n_col, *x).expect("write number");
                }
                FixtureCell::Bool(b) => {
                    worksheet.write_boolean(n_row, n_col, *b).expect("write bool");
                }
                FixtureCell::Date(x) => {
                    worksheet
                        .write_number_with_format(n_row, n_col, *x, &fmt_date)
                        .expect("write date");
                }
                FixtureCell::Empty => {}
            }
        }
    }
    workbook.save(path).expect("save source fixture");
}

/// Template workbook description.
#[derive(Debug, Clone)]
pub(crate) struct TemplateFixture<'a> {
    pub sheet_name: &'a str,
    pub header_rows: u32,
    pub headers: &'a [&'a str],
    pub widths: Vec<Option<f64>>,
    pub hidden: Vec<usize>,
    pub if_exemplar_fill: bool,
    pub paper_size: Option<u8>,
    pub if_landscape: bool,
    pub margins: Option<(f64, f64, f64, f64)>,
    pub hyperlink: Option<&'a str>,
    pub defined_name: Option<&'a str>,
}

impl<'a> TemplateFixture<'a> {
    pub(crate) fn new(header_rows: u32, headers: &'a [&'a str]) -> Self {
        Self {
            sheet_name: "Template",
            header_rows,
            headers,
            widths: vec![],
            hidden: vec![],
            if_exemplar_fill: false,
            paper_size: None,
            if_landscape: false,
            margins: None,
            hyperlink: None,
            defined_name: None,
        }
    }

    /// Title text in row 1 (when there is room), headers on the last header row.
    pub(crate) fn write(&self, path: &Path) -> PathBuf {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(self.sheet_name).expect("sheet name");

        if self.header_rows > 1 {
            worksheet.write_string(0, 0, "Report").expect("write title");
        }
        let n_row_header = self.header_rows - 1;
        let fmt_header = Format::new().set_bold();
        for (n_col, c_header) in self.headers.iter().enumerate() {
            if !c_header.is_empty() {
                worksheet
                    .write_string_with_format(n_row_header, n_col as u16, *c_header, &fmt_header)
                    .expect("write header");
            }
        }
        for (n_col, width) in self.widths.iter().enumerate() {
            if let Some(w) = width {
                worksheet
                    .set_column_width(n_col as u16, *w)
                    .expect("column width");
            }
        }
        for n_col in &self.hidden {
            worksheet
                .set_column_hidden(*n_col as u16)
                .expect("hidden column");
        }
        if self.if_exemplar_fill {
            let fmt_fill = Format::new().set_background_color(Color::RGB(0xFFFF00));
            for n_col in 0..self.headers.len() {
                worksheet
                    .write_blank(self.header_rows, n_col as u16, &fmt_fill)
                    .expect("write exemplar");
            }
        }
        if let Some(n_paper) = self.paper_size {
            worksheet.set_paper_size(n_paper);
        }
        if self.if_landscape {
            worksheet.set_landscape();
        }
        if let Some((l, r, t, b)) = self.margins {
            worksheet.set_margins(l, r, t, b, 0.3, 0.3);
        }
        if let Some(c_url) = self.hyperlink {
            worksheet
                .write_url(self.header_rows + 5, 0, c_url)
                .expect("write url");
        }
        if let Some(c_name) = self.defined_name {
            let c_formula = format!("={}!$A$1", self.sheet_name);
            workbook.define_name(c_name, &c_formula).expect("define name");
        }

        workbook.save(path).expect("save template fixture");
        path.to_path_buf()
    }
}
