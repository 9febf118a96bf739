//! In-process PDF table layout with `lopdf`.

use std::path::PathBuf;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use polars::prelude::DataFrame;
use tracing::debug;

use crate::conf::{
    N_TABLE_FONT_SIZE, N_TABLE_GRID_WIDTH, N_TABLE_HEADER_FILL_GRAY, N_TABLE_HEADER_RULE_WIDTH,
    N_TABLE_PAD_X, N_TABLE_PAD_Y,
};
use crate::pdf::PdfExporter;
use crate::spec::{EnumPdfEngine, SpecPageSetup, SpecPdfJob, SpecTemplateHeader, SplitError};
use crate::template::{align_columns, probe_page_setup, probe_template_columns};
use crate::util::{convert_width_to_points, derive_cell_value_from_any_value, format_cell_text};

/// Average Helvetica glyph advance per point of font size.
const N_GLYPH_WIDTH_REGULAR: f32 = 0.52;
const N_GLYPH_WIDTH_BOLD: f32 = 0.56;
const C_ELLIPSIS: &str = "...";

/// Table-layout exporter; reads the template and the group table, never the rendered workbook.
#[derive(Debug, Clone, Copy, Default)]
pub struct LayoutPdfExporter;

impl PdfExporter for LayoutPdfExporter {
    fn engine(&self) -> EnumPdfEngine {
        EnumPdfEngine::Layout
    }

    fn export(&mut self, job: &SpecPdfJob<'_>) -> Result<PathBuf, SplitError> {
        let header = probe_template_columns(job.path_template, job.header_rows)?;
        let cfg_page = probe_page_setup(job.path_template)?;
        let table = plan_table(job.df_group, &header)?;

        let path_pdf = job.path_pdf();
        let c_title = path_pdf
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = render_table_pdf(&table, &cfg_page, &c_title)?;
        std::fs::write(&path_pdf, bytes).map_err(|err| SplitError::OutputWrite {
            path: path_pdf.clone(),
            message: err.to_string(),
        })?;
        debug!(path = %path_pdf.display(), rows = table.rows.len(), "layout pdf written");
        Ok(path_pdf)
    }
}

////////////////////////////////////////////////////////////////////////////////
// #region TablePlan

/// Table content ready for layout.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecPdfTable {
    /// Header texts.
    pub headers: Vec<String>,
    /// Column widths in points, parallel to `headers`.
    pub widths_pt: Vec<f32>,
    /// Body cell texts.
    pub rows: Vec<Vec<String>>,
}

/// Align the group table to the template and drop hidden columns.
///
/// Without a header match, widths and hidden flags apply by position.
/// Hidden columns stay when dropping them would leave no column.
pub fn plan_table(
    df: &DataFrame,
    header: &SpecTemplateHeader,
) -> Result<SpecPdfTable, SplitError> {
    let l_source: Vec<String> = df
        .get_column_names_str()
        .iter()
        .map(|c| c.to_string())
        .collect();
    let header_named = header.has_header_text().then_some(header);
    let l_aligned = align_columns(&l_source, header_named);
    let if_matched = header_named.is_some_and(|h| l_aligned.iter().any(|c| h.find(c).is_some()));

    // (name, width, hidden) per output column.
    let l_meta: Vec<(String, Option<f64>, bool)> = l_aligned
        .iter()
        .enumerate()
        .map(|(n_idx, c_name)| {
            let col_tpl = if if_matched {
                header.find(c_name)
            } else {
                header.columns.get(n_idx)
            };
            (
                c_name.clone(),
                col_tpl.and_then(|col| col.width),
                col_tpl.is_some_and(|col| col.if_hidden),
            )
        })
        .collect();

    let mut l_keep: Vec<usize> = (0..l_meta.len()).filter(|n| !l_meta[*n].2).collect();
    if l_keep.is_empty() {
        l_keep = (0..l_meta.len()).collect();
    }

    let mut l_rows = vec![Vec::with_capacity(l_keep.len()); df.height()];
    for n_idx in &l_keep {
        let column = df
            .column(&l_meta[*n_idx].0)
            .map_err(|err| SplitError::Table(err.to_string()))?;
        for (n_row, row) in l_rows.iter_mut().enumerate() {
            let value = column
                .get(n_row)
                .map_err(|err| SplitError::Table(err.to_string()))?;
            row.push(format_cell_text(&derive_cell_value_from_any_value(value)));
        }
    }

    Ok(SpecPdfTable {
        headers: l_keep.iter().map(|n| l_meta[*n].0.clone()).collect(),
        widths_pt: l_keep
            .iter()
            .map(|n| convert_width_to_points(l_meta[*n].1))
            .collect(),
        rows: l_rows,
    })
}

/// Split `n_rows` body rows into page slices of at most `n_per_page` rows.
///
/// Always yields at least one (possibly empty) page so the header prints.
pub fn plan_pages(n_rows: usize, n_per_page: usize) -> Vec<std::ops::Range<usize>> {
    let n_per_page = n_per_page.max(1);
    if n_rows == 0 {
        return vec![0..0];
    }
    (0..n_rows)
        .step_by(n_per_page)
        .map(|n_start| n_start..usize::min(n_start + n_per_page, n_rows))
        .collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Drawing

/// Lay out `table` on pages sized by `cfg_page`; return PDF bytes.
pub fn render_table_pdf(
    table: &SpecPdfTable,
    cfg_page: &SpecPageSetup,
    title: &str,
) -> Result<Vec<u8>, SplitError> {
    let (n_page_w, n_page_h) = cfg_page.page_size_pt();
    let (n_margin_l, n_margin_r, n_margin_t, n_margin_b) = cfg_page.margins_pt();
    let n_frame_w = (n_page_w - n_margin_l - n_margin_r).max(1.0);
    let n_frame_h = (n_page_h - n_margin_t - n_margin_b).max(1.0);

    let n_total_w: f32 = table.widths_pt.iter().sum();
    let n_scale = if n_total_w > n_frame_w { n_frame_w / n_total_w } else { 1.0 };
    let l_widths: Vec<f32> = table.widths_pt.iter().map(|w| w * n_scale).collect();
    let n_table_w = n_total_w * n_scale;
    let n_x0 = n_margin_l + (n_frame_w - n_table_w) / 2.0;
    let n_y_top = n_page_h - n_margin_t;

    let n_row_h = N_TABLE_FONT_SIZE + 2.0 * N_TABLE_PAD_Y;
    let n_per_page = ((n_frame_h - n_row_h) / n_row_h).floor().max(1.0) as usize;

    let mut doc = Document::with_version("1.5");
    let id_pages = doc.new_object_id();
    let id_font_regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let id_font_bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let id_resources = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => id_font_regular,
            "F2" => id_font_bold,
        },
    });

    let mut l_page_ids: Vec<ObjectId> = Vec::new();
    for rng_rows in plan_pages(table.rows.len(), n_per_page) {
        let l_page_rows = &table.rows[rng_rows];
        let mut painter = TablePainter::new(n_x0, &l_widths, n_row_h);
        painter.draw_header_fill(n_y_top);
        painter.draw_grid(n_y_top, l_page_rows.len() + 1);
        painter.draw_header_rule(n_y_top);
        painter.draw_row(n_y_top, &table.headers, true);
        for (n_idx, row) in l_page_rows.iter().enumerate() {
            painter.draw_row(n_y_top - n_row_h * (n_idx + 1) as f32, row, false);
        }

        let bytes_content = painter
            .finish()
            .encode()
            .map_err(|err| SplitError::PdfRender(err.to_string()))?;
        let id_content = doc.add_object(Stream::new(Dictionary::new(), bytes_content));
        let id_page = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => id_pages,
            "MediaBox" => vec![0.into(), 0.into(), n_page_w.into(), n_page_h.into()],
            "Contents" => id_content,
            "Resources" => id_resources,
        });
        l_page_ids.push(id_page);
    }

    let n_pages = l_page_ids.len() as i64;
    doc.objects.insert(
        id_pages,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => l_page_ids.into_iter().map(Object::from).collect::<Vec<_>>(),
            "Count" => n_pages,
        }),
    );
    let id_catalog = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => id_pages,
    });
    let id_info = doc.add_object(dictionary! {
        "Title" => Object::string_literal(encode_win_ansi(title)),
    });
    doc.trailer.set("Root", id_catalog);
    doc.trailer.set("Info", id_info);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|err| SplitError::PdfRender(err.to_string()))?;
    Ok(bytes)
}

struct TablePainter<'a> {
    n_x0: f32,
    widths: &'a [f32],
    n_row_h: f32,
    content: Content,
}

impl<'a> TablePainter<'a> {
    fn new(n_x0: f32, widths: &'a [f32], n_row_h: f32) -> Self {
        Self {
            n_x0,
            widths,
            n_row_h,
            content: Content { operations: vec![] },
        }
    }

    fn push(&mut self, operator: &str, operands: Vec<Object>) {
        self.content.operations.push(Operation::new(operator, operands));
    }

    fn table_width(&self) -> f32 {
        self.widths.iter().sum()
    }

    fn draw_header_fill(&mut self, n_y_top: f32) {
        let n_gray = N_TABLE_HEADER_FILL_GRAY;
        self.push("rg", vec![n_gray.into(), n_gray.into(), n_gray.into()]);
        self.push(
            "re",
            vec![
                self.n_x0.into(),
                (n_y_top - self.n_row_h).into(),
                self.table_width().into(),
                self.n_row_h.into(),
            ],
        );
        self.push("f", vec![]);
    }

    fn draw_grid(&mut self, n_y_top: f32, n_rows: usize) {
        let n_x_end = self.n_x0 + self.table_width();
        let n_y_end = n_y_top - self.n_row_h * n_rows as f32;
        self.push("w", vec![N_TABLE_GRID_WIDTH.into()]);
        self.push("RG", vec![0.into(), 0.into(), 0.into()]);
        for n_line in 0..=n_rows {
            let n_y = n_y_top - self.n_row_h * n_line as f32;
            self.push("m", vec![self.n_x0.into(), n_y.into()]);
            self.push("l", vec![n_x_end.into(), n_y.into()]);
        }
        let mut n_x = self.n_x0;
        for n_idx in 0..=self.widths.len() {
            self.push("m", vec![n_x.into(), n_y_top.into()]);
            self.push("l", vec![n_x.into(), n_y_end.into()]);
            if let Some(w) = self.widths.get(n_idx) {
                n_x += w;
            }
        }
        self.push("S", vec![]);
    }

    fn draw_header_rule(&mut self, n_y_top: f32) {
        self.push("w", vec![N_TABLE_HEADER_RULE_WIDTH.into()]);
        self.push("m", vec![self.n_x0.into(), n_y_top.into()]);
        self.push("l", vec![(self.n_x0 + self.table_width()).into(), n_y_top.into()]);
        self.push("S", vec![]);
    }

    fn draw_row(&mut self, n_y_top: f32, cells: &[String], if_header: bool) {
        let c_font = if if_header { "F2" } else { "F1" };
        let n_baseline = n_y_top - self.n_row_h + N_TABLE_PAD_Y + N_TABLE_FONT_SIZE * 0.22;
        self.push("rg", vec![0.into(), 0.into(), 0.into()]);
        let mut n_x = self.n_x0;
        for (n_idx, c_text) in cells.iter().enumerate() {
            let Some(n_width) = self.widths.get(n_idx).copied() else {
                break;
            };
            let c_fit = truncate_to_width(c_text, n_width - 2.0 * N_TABLE_PAD_X, if_header);
            if !c_fit.is_empty() {
                self.push("BT", vec![]);
                self.push("Tf", vec![c_font.into(), N_TABLE_FONT_SIZE.into()]);
                self.push("Td", vec![(n_x + N_TABLE_PAD_X).into(), n_baseline.into()]);
                self.push("Tj", vec![Object::string_literal(encode_win_ansi(&c_fit))]);
                self.push("ET", vec![]);
            }
            n_x += n_width;
        }
    }

    fn finish(self) -> Content {
        self.content
    }
}

/// Approximate rendered width of `text` at the table font size.
fn estimate_text_width(text: &str, if_bold: bool) -> f32 {
    let n_factor = if if_bold { N_GLYPH_WIDTH_BOLD } else { N_GLYPH_WIDTH_REGULAR };
    text.chars().count() as f32 * N_TABLE_FONT_SIZE * n_factor
}

/// Cut `text` so it fits `n_avail` points, appending `...` when shortened.
fn truncate_to_width(text: &str, n_avail: f32, if_bold: bool) -> String {
    if estimate_text_width(text, if_bold) <= n_avail {
        return text.to_string();
    }
    let mut c_out = String::new();
    for ch in text.chars() {
        c_out.push(ch);
        let c_try = format!("{c_out}{C_ELLIPSIS}");
        if estimate_text_width(&c_try, if_bold) > n_avail {
            c_out.pop();
            break;
        }
    }
    if c_out.is_empty() {
        return String::new();
    }
    format!("{c_out}{C_ELLIPSIS}")
}

/// WinAnsi code points in 0x80..=0x9F that differ from Latin-1.
const TUP_WIN_ANSI_HIGH: [(char, u8); 27] = [
    ('\u{20AC}', 0x80),
    ('\u{201A}', 0x82),
    ('\u{0192}', 0x83),
    ('\u{201E}', 0x84),
    ('\u{2026}', 0x85),
    ('\u{2020}', 0x86),
    ('\u{2021}', 0x87),
    ('\u{02C6}', 0x88),
    ('\u{2030}', 0x89),
    ('\u{0160}', 0x8A),
    ('\u{2039}', 0x8B),
    ('\u{0152}', 0x8C),
    ('\u{017D}', 0x8E),
    ('\u{2018}', 0x91),
    ('\u{2019}', 0x92),
    ('\u{201C}', 0x93),
    ('\u{201D}', 0x94),
    ('\u{2022}', 0x95),
    ('\u{2013}', 0x96),
    ('\u{2014}', 0x97),
    ('\u{02DC}', 0x98),
    ('\u{2122}', 0x99),
    ('\u{0161}', 0x9A),
    ('\u{203A}', 0x9B),
    ('\u{0153}', 0x9C),
    ('\u{017E}', 0x9E),
    ('\u{0178}', 0x9F),
];

/// Encode for the built-in fonts' WinAnsiEncoding; unmapped characters become `?`.
fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars().map(encode_win_ansi_char).collect()
}

fn encode_win_ansi_char(ch: char) -> u8 {
    match u32::from(ch) {
        n @ (0x00..=0x7F | 0xA0..=0xFF) => n as u8,
        _ => TUP_WIN_ANSI_HIGH
            .iter()
            .find(|(c, _)| *c == ch)
            .map_or(b'?', |(_, n)| *n),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::SpecTemplateColumn;
    use crate::testing::{TemplateFixture, TestDir};
    use polars::prelude::Column;
    use pretty_assertions::assert_eq;

    fn create_df() -> DataFrame {
        DataFrame::new(vec![
            Column::new("ID".into(), vec![Some(1i64), Some(1)]),
            Column::new("Name".into(), vec![Some("A"), None]),
            Column::new("Amount".into(), vec![Some(10.0f64), Some(30.5)]),
        ])
        .expect("frame")
    }

    fn create_header(cols: &[(&str, Option<f64>, bool)]) -> SpecTemplateHeader {
        SpecTemplateHeader {
            columns: cols
                .iter()
                .map(|(h, w, hidden)| SpecTemplateColumn {
                    header: h.to_string(),
                    if_hidden: *hidden,
                    width: *w,
                })
                .collect(),
        }
    }

    #[test]
    fn plan_table_aligns_and_drops_hidden_columns() {
        let header = create_header(&[
            ("Amount", Some(10.0), false),
            ("Name", None, true),
            ("ID", Some(4.0), false),
        ]);
        let table = plan_table(&create_df(), &header).expect("plan");
        assert_eq!(table.headers, vec!["Amount", "ID"]);
        assert_eq!(table.rows, vec![vec!["10", "1"], vec!["30.5", "1"]]);
        assert!((table.widths_pt[0] - 52.5).abs() < 1e-3);
        assert!((table.widths_pt[1] - 21.0).abs() < 1e-3);
    }

    #[test]
    fn plan_table_keeps_hidden_columns_when_all_hidden() {
        let header = create_header(&[("Name", None, true)]);
        let table = plan_table(&create_df(), &header).expect("plan");
        assert_eq!(table.headers, vec!["Name"]);
        assert_eq!(table.rows, vec![vec!["A"], vec![""]]);
        assert_eq!(table.widths_pt, vec![50.0]);
    }

    #[test]
    fn plan_table_without_overlap_uses_positional_template_columns() {
        let header = create_header(&[("X", Some(10.0), false), ("Y", None, true)]);
        let table = plan_table(&create_df(), &header).expect("plan");
        assert_eq!(table.headers, vec!["ID", "Amount"]);
        assert!((table.widths_pt[0] - 52.5).abs() < 1e-3);
        assert_eq!(table.widths_pt[1], 50.0);
    }

    #[test]
    fn plan_table_applies_blank_header_widths_by_position() {
        let tmp = TestDir::new();
        let mut fixture = TemplateFixture::new(1, &["", "", ""]);
        fixture.widths = vec![Some(10.0), Some(30.0), Some(4.0)];
        fixture.hidden = vec![1];
        let path_template = fixture.write(&tmp.path().join("tpl.xlsx"));

        let header = probe_template_columns(&path_template, 1).expect("columns");
        let table = plan_table(&create_df(), &header).expect("plan");
        assert!(header.columns[1].if_hidden);
        assert_eq!(table.headers, vec!["ID", "Amount"]);
        assert_eq!(
            table.widths_pt,
            vec![
                convert_width_to_points(header.columns[0].width),
                convert_width_to_points(header.columns[2].width),
            ]
        );
        assert!(table.widths_pt[0] > 50.0);
        assert!(table.widths_pt[1] < 50.0);
    }

    #[test]
    fn plan_table_without_template_columns_uses_default_widths() {
        let table = plan_table(&create_df(), &SpecTemplateHeader::default()).expect("plan");
        assert_eq!(table.headers, vec!["ID", "Name", "Amount"]);
        assert_eq!(table.widths_pt, vec![50.0; 3]);
    }

    #[test]
    fn plan_pages_always_yields_a_page() {
        assert_eq!(plan_pages(0, 10), vec![0..0]);
        assert_eq!(plan_pages(25, 10), vec![0..10, 10..20, 20..25]);
        assert_eq!(plan_pages(3, 0), vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn truncate_to_width_appends_ellipsis() {
        assert_eq!(truncate_to_width("abc", 100.0, false), "abc");
        let c_cut = truncate_to_width(&"x".repeat(100), 40.0, false);
        assert!(c_cut.ends_with("..."));
        assert!(estimate_text_width(&c_cut, false) <= 40.0);
        assert_eq!(truncate_to_width("abcdef", 1.0, false), "");
    }

    #[test]
    fn encode_win_ansi_replaces_wide_chars() {
        assert_eq!(encode_win_ansi("Aé中"), vec![b'A', 0xE9, b'?']);
    }

    #[test]
    fn encode_win_ansi_uses_windows_table_for_high_range() {
        assert_eq!(
            encode_win_ansi("€ – “x” ™ Ÿ"),
            vec![0x80, b' ', 0x96, b' ', 0x93, b'x', 0x94, b' ', 0x99, b' ', 0x9F]
        );
        // C1 controls have no glyph in WinAnsi.
        assert_eq!(encode_win_ansi("\u{85}\u{9F}"), vec![b'?', b'?']);
    }

    #[test]
    fn render_table_pdf_writes_pdf_bytes() {
        let table = SpecPdfTable {
            headers: vec!["ID".to_string()],
            widths_pt: vec![50.0],
            rows: (0..120).map(|n| vec![n.to_string()]).collect(),
        };
        let bytes = render_table_pdf(&table, &SpecPageSetup::default(), "1").expect("pdf");
        assert!(bytes.starts_with(b"%PDF-1.5"));
    }

    #[test]
    fn export_writes_pdf_next_to_workbook() {
        let tmp = TestDir::new();
        let mut fixture = TemplateFixture::new(1, &["ID", "Name", "Amount"]);
        fixture.paper_size = Some(9);
        let path_template = fixture.write(&tmp.path().join("tpl.xlsx"));
        let path_xlsx = tmp.path().join("1.xlsx");
        let df = create_df();
        let job = SpecPdfJob {
            path_xlsx: &path_xlsx,
            path_template: &path_template,
            header_rows: 1,
            df_group: &df,
        };
        let path_pdf = LayoutPdfExporter.export(&job).expect("export");
        assert_eq!(path_pdf, tmp.path().join("1.pdf"));
        let bytes = std::fs::read(&path_pdf).expect("read pdf");
        assert!(bytes.starts_with(b"%PDF-"));
    }
}
