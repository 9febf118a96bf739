//! OOXML package post-processing for rendered workbooks.
//!
//! Each strip step is independent: it edits the in-memory package and reports
//! how many items it removed, or an error text the caller logs and skips.

use std::io::{Cursor, Read, Write};

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::spec::SpecPageSetup;

const C_PART_WORKBOOK: &str = "xl/workbook.xml";
const C_PART_WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";
const C_PART_CONTENT_TYPES: &str = "[Content_Types].xml";

/// `CT_Workbook` children that must follow `definedNames`.
const TUP_WORKBOOK_AFTER_DEFINED_NAMES: [&[u8]; 10] = [
    b"calcPr",
    b"oleSize",
    b"customWorkbookViews",
    b"pivotCaches",
    b"smartTagPr",
    b"smartTagTypes",
    b"webPublishing",
    b"fileRecoveryPr",
    b"webPublishObjects",
    b"extLst",
];

////////////////////////////////////////////////////////////////////////////////
// #region Package

/// In-memory zip package with ordered parts.
#[derive(Debug, Clone, Default)]
pub struct SpecXlsxPackage {
    parts: Vec<(String, Vec<u8>)>,
}

impl SpecXlsxPackage {
    /// Parse a package from raw `.xlsx` bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).map_err(|err| format!("parse zip archive: {err}"))?;
        let mut parts = Vec::with_capacity(archive.len());
        for idx in 0..archive.len() {
            let mut file = archive
                .by_index(idx)
                .map_err(|err| format!("read zip entry: {err}"))?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)
                .map_err(|err| format!("read part {name}: {err}"))?;
            parts.push((name, buf));
        }
        Ok(Self { parts })
    }

    /// Serialize the package back to `.xlsx` bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, String> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, bytes) in &self.parts {
            writer
                .start_file(name.as_str(), options)
                .map_err(|err| format!("write zip entry header {name}: {err}"))?;
            writer
                .write_all(bytes)
                .map_err(|err| format!("write zip entry {name}: {err}"))?;
        }
        let cursor = writer
            .finish()
            .map_err(|err| format!("finalize zip archive: {err}"))?;
        Ok(cursor.into_inner())
    }

    /// Raw bytes of a part.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|(c_name, _)| c_name == name)
            .map(|(_, bytes)| bytes.as_slice())
    }

    /// Replace an existing part or append a new one.
    pub fn set(&mut self, name: &str, bytes: Vec<u8>) {
        match self.parts.iter_mut().find(|(c_name, _)| c_name == name) {
            Some((_, slot)) => *slot = bytes,
            None => self.parts.push((name.to_string(), bytes)),
        }
    }

    /// Remove every part matching `predicate`; return the removed count.
    pub fn remove_parts(&mut self, predicate: impl Fn(&str) -> bool) -> usize {
        let n_before = self.parts.len();
        self.parts.retain(|(name, _)| !predicate(name));
        n_before - self.parts.len()
    }

    /// Worksheet part names (`xl/worksheets/*.xml`).
    pub fn worksheet_parts(&self) -> Vec<String> {
        self.parts
            .iter()
            .map(|(name, _)| name)
            .filter(|name| {
                name.starts_with("xl/worksheets/")
                    && name.ends_with(".xml")
                    && !name.contains("/_rels/")
            })
            .cloned()
            .collect()
    }

    /// Part name of the first sheet listed in the workbook.
    pub fn first_sheet_part(&self) -> Result<String, String> {
        let xml_workbook = self
            .get(C_PART_WORKBOOK)
            .ok_or_else(|| format!("missing part {C_PART_WORKBOOK}"))?;
        let c_rel_id = find_first_attribute(xml_workbook, b"sheet", b"id")?
            .ok_or_else(|| "workbook lists no sheets".to_string())?;

        let xml_rels = self
            .get(C_PART_WORKBOOK_RELS)
            .ok_or_else(|| format!("missing part {C_PART_WORKBOOK_RELS}"))?;
        let c_target = find_relationship_target(xml_rels, &c_rel_id)?
            .ok_or_else(|| format!("relationship {c_rel_id} not found"))?;
        Ok(resolve_part_target("xl", &c_target))
    }

    fn edit_part(
        &mut self,
        name: &str,
        edit: impl FnOnce(&[u8]) -> Result<(Vec<u8>, usize), String>,
    ) -> Result<usize, String> {
        let Some(bytes) = self.get(name) else {
            return Ok(0);
        };
        let (bytes_new, n_removed) = edit(bytes)?;
        if n_removed > 0 {
            self.set(name, bytes_new);
        }
        Ok(n_removed)
    }
}

/// Relationship part that belongs to `part` (`a/b.xml` -> `a/_rels/b.xml.rels`).
pub fn derive_rels_part(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

fn resolve_part_target(base_dir: &str, target: &str) -> String {
    if let Some(c_abs) = target.strip_prefix('/') {
        return c_abs.to_string();
    }
    let mut l_segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            ".." => {
                l_segments.pop();
            }
            "." | "" => {}
            other => l_segments.push(other),
        }
    }
    l_segments.join("/")
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region StripSteps

/// Remove workbook- and sheet-scoped named ranges.
pub fn strip_defined_names(pkg: &mut SpecXlsxPackage) -> Result<usize, String> {
    pkg.edit_part(C_PART_WORKBOOK, |xml| {
        retain_elements(xml, |el| el.local_name().as_ref() != b"definedNames")
    })
}

/// Remove external link parts, their workbook references and relationships.
pub fn strip_external_links(pkg: &mut SpecXlsxPackage) -> Result<usize, String> {
    let mut n_removed = pkg.edit_part(C_PART_WORKBOOK, |xml| {
        retain_elements(xml, |el| el.local_name().as_ref() != b"externalReferences")
    })?;
    n_removed += pkg.edit_part(C_PART_WORKBOOK_RELS, |xml| {
        retain_elements(xml, |el| !is_relationship_of_type(el, "externalLink"))
    })?;
    n_removed += pkg.edit_part(C_PART_CONTENT_TYPES, |xml| {
        retain_elements(xml, |el| !is_override_under(el, "/xl/externalLinks/"))
    })?;
    n_removed += pkg.remove_parts(|name| name.starts_with("xl/externalLinks/"));
    Ok(n_removed)
}

/// Remove sheet drawing objects (charts, shapes, pictures). Comment VML is kept.
pub fn strip_drawings(pkg: &mut SpecXlsxPackage) -> Result<usize, String> {
    let mut n_removed = 0;
    for c_sheet in pkg.worksheet_parts() {
        n_removed += pkg.edit_part(&c_sheet, |xml| {
            retain_elements(xml, |el| el.local_name().as_ref() != b"drawing")
        })?;
        n_removed += pkg.edit_part(&derive_rels_part(&c_sheet), |xml| {
            retain_elements(xml, |el| !is_relationship_of_type(el, "drawing"))
        })?;
    }
    n_removed += pkg.edit_part(C_PART_CONTENT_TYPES, |xml| {
        retain_elements(xml, |el| {
            !is_override_under(el, "/xl/drawings/drawing") && !is_override_under(el, "/xl/charts/")
        })
    })?;
    n_removed += pkg.remove_parts(|name| {
        name.starts_with("xl/drawings/drawing")
            || name.starts_with("xl/drawings/_rels/drawing")
            || name.starts_with("xl/charts/")
    });
    Ok(n_removed)
}

/// Remove cell hyperlinks; cell values stay.
pub fn strip_hyperlinks(pkg: &mut SpecXlsxPackage) -> Result<usize, String> {
    let mut n_removed = 0;
    for c_sheet in pkg.worksheet_parts() {
        n_removed += pkg.edit_part(&c_sheet, |xml| {
            retain_elements(xml, |el| el.local_name().as_ref() != b"hyperlinks")
        })?;
        n_removed += pkg.edit_part(&derive_rels_part(&c_sheet), |xml| {
            retain_elements(xml, |el| !is_relationship_of_type(el, "hyperlink"))
        })?;
    }
    Ok(n_removed)
}

fn is_relationship_of_type(el: &BytesStart<'_>, rel_type: &str) -> bool {
    if el.local_name().as_ref() != b"Relationship" {
        return false;
    }
    read_attribute(el, b"Type")
        .map(|c_type| c_type.rsplit('/').next() == Some(rel_type))
        .unwrap_or(false)
}

fn is_override_under(el: &BytesStart<'_>, prefix: &str) -> bool {
    el.local_name().as_ref() == b"Override"
        && read_attribute(el, b"PartName")
            .map(|c_part| c_part.starts_with(prefix))
            .unwrap_or(false)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PrintGeometry

/// Write `_xlnm.Print_Titles` and `_xlnm.Print_Area` for sheet 0.
///
/// Existing `definedNames` are replaced.
pub fn apply_print_names(
    pkg: &mut SpecXlsxPackage,
    print_titles_ref: &str,
    print_area_ref: &str,
) -> Result<(), String> {
    let xml_workbook = pkg
        .get(C_PART_WORKBOOK)
        .ok_or_else(|| format!("missing part {C_PART_WORKBOOK}"))?;
    let xml_new = insert_defined_names(
        xml_workbook,
        &[
            ("_xlnm.Print_Titles", print_titles_ref),
            ("_xlnm.Print_Area", print_area_ref),
        ],
    )?;
    pkg.set(C_PART_WORKBOOK, xml_new);
    Ok(())
}

fn insert_defined_names(xml: &[u8], names: &[(&str, &str)]) -> Result<Vec<u8>, String> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut n_depth_skip = 0usize;
    let mut n_depth = 0usize;
    let mut if_inserted = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|err| format!("parse workbook.xml: {err}"))?;
        if n_depth_skip > 0 {
            match event {
                Event::Start(_) => n_depth_skip += 1,
                Event::End(_) => n_depth_skip -= 1,
                Event::Eof => break,
                _ => {}
            }
            continue;
        }

        match &event {
            Event::Start(el) | Event::Empty(el) => {
                let c_local = el.local_name();
                if n_depth == 1 && c_local.as_ref() == b"definedNames" {
                    if matches!(event, Event::Start(_)) {
                        n_depth_skip = 1;
                    }
                    continue;
                }
                if n_depth == 1
                    && !if_inserted
                    && TUP_WORKBOOK_AFTER_DEFINED_NAMES.contains(&c_local.as_ref())
                {
                    write_defined_names(&mut writer, names)?;
                    if_inserted = true;
                }
                if matches!(event, Event::Start(_)) {
                    n_depth += 1;
                }
            }
            Event::End(_) => {
                if n_depth == 1 && !if_inserted {
                    write_defined_names(&mut writer, names)?;
                    if_inserted = true;
                }
                n_depth = n_depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
        writer
            .write_event(event)
            .map_err(|err| format!("write workbook.xml: {err}"))?;
    }

    if !if_inserted {
        return Err("workbook.xml has no root element".to_string());
    }
    Ok(writer.into_inner().into_inner())
}

fn write_defined_names(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    names: &[(&str, &str)],
) -> Result<(), String> {
    writer
        .write_event(Event::Start(BytesStart::new("definedNames")))
        .map_err(map_write_err)?;
    for (c_name, c_ref) in names {
        let mut el = BytesStart::new("definedName");
        el.push_attribute(("name", *c_name));
        el.push_attribute(("localSheetId", "0"));
        writer.write_event(Event::Start(el)).map_err(map_write_err)?;
        writer
            .write_event(Event::Text(BytesText::new(c_ref)))
            .map_err(map_write_err)?;
        writer
            .write_event(Event::End(BytesEnd::new("definedName")))
            .map_err(map_write_err)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("definedNames")))
        .map_err(map_write_err)?;
    Ok(())
}

fn map_write_err(err: impl std::fmt::Display) -> String {
    format!("write definedNames: {err}")
}

/// Read paper size, orientation and margins from a worksheet part.
pub fn read_page_setup(xml_sheet: &[u8]) -> Result<SpecPageSetup, String> {
    let mut cfg_page = SpecPageSetup::default();
    let mut reader = Reader::from_reader(xml_sheet);
    loop {
        match reader
            .read_event()
            .map_err(|err| format!("parse worksheet: {err}"))?
        {
            Event::Start(el) | Event::Empty(el) => match el.local_name().as_ref() {
                b"pageSetup" => {
                    cfg_page.paper_size = read_attribute(&el, b"paperSize")
                        .and_then(|c_val| c_val.trim().parse::<u32>().ok());
                    cfg_page.if_landscape = read_attribute(&el, b"orientation").as_deref()
                        == Some("landscape");
                }
                b"pageMargins" => {
                    let parse = |key: &[u8]| {
                        read_attribute(&el, key).and_then(|c_val| c_val.trim().parse::<f32>().ok())
                    };
                    cfg_page.margin_left = parse(b"left");
                    cfg_page.margin_right = parse(b"right");
                    cfg_page.margin_top = parse(b"top");
                    cfg_page.margin_bottom = parse(b"bottom");
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(cfg_page)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region XmlHelpers

/// Stream `xml`, dropping every element (with its subtree) rejected by `keep`.
fn retain_elements(
    xml: &[u8],
    keep: impl Fn(&BytesStart<'_>) -> bool,
) -> Result<(Vec<u8>, usize), String> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut n_depth_skip = 0usize;
    let mut n_removed = 0usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|err| format!("parse xml: {err}"))?;
        if n_depth_skip > 0 {
            match event {
                Event::Start(_) => n_depth_skip += 1,
                Event::End(_) => n_depth_skip -= 1,
                Event::Eof => break,
                _ => {}
            }
            continue;
        }
        match &event {
            Event::Start(el) if !keep(el) => {
                n_removed += 1;
                n_depth_skip = 1;
                continue;
            }
            Event::Empty(el) if !keep(el) => {
                n_removed += 1;
                continue;
            }
            Event::Eof => break,
            _ => {}
        }
        writer
            .write_event(event)
            .map_err(|err| format!("write xml: {err}"))?;
    }

    Ok((writer.into_inner().into_inner(), n_removed))
}

fn read_attribute(el: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    el.attributes().flatten().find_map(|attr| {
        if attr.key.local_name().as_ref() == key {
            std::str::from_utf8(&attr.value)
                .ok()
                .and_then(|raw| quick_xml::escape::unescape(raw).ok())
                .map(|value| value.into_owned())
        } else {
            None
        }
    })
}

fn find_first_attribute(xml: &[u8], element: &[u8], key: &[u8]) -> Result<Option<String>, String> {
    let mut reader = Reader::from_reader(xml);
    loop {
        match reader
            .read_event()
            .map_err(|err| format!("parse xml: {err}"))?
        {
            Event::Start(el) | Event::Empty(el) if el.local_name().as_ref() == element => {
                return Ok(read_attribute(&el, key));
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn find_relationship_target(xml_rels: &[u8], rel_id: &str) -> Result<Option<String>, String> {
    let mut reader = Reader::from_reader(xml_rels);
    loop {
        match reader
            .read_event()
            .map_err(|err| format!("parse rels: {err}"))?
        {
            Event::Start(el) | Event::Empty(el)
                if el.local_name().as_ref() == b"Relationship"
                    && read_attribute(&el, b"Id").as_deref() == Some(rel_id) =>
            {
                return Ok(read_attribute(&el, b"Target"));
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
