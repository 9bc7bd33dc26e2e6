//! In-place rendering into an xlsx template.
//!
//! The output is a copy of the template package in which only the cells the
//! renderer touched are rewritten. Merged ranges, column widths, number
//! formats, fonts and untouched formulas are copied through as-is.
//! Highlighted cells get a variant of their own cell format with a solid
//! fill appended to the stylesheet.

use crate::error::{ReconcileError, Result};
use crate::models::RawValue;
use crate::renderer::ReportSheet;
use crate::workbook::{Sheet, Workbook};

use super::writer::cell_index;

use quick_xml::escape::unescape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

type PatchResult<T> = std::result::Result<T, String>;

const CONTENT_TYPES: &str = "[Content_Types].xml";
const WORKBOOK: &str = "xl/workbook.xml";
const WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";
const STYLES: &str = "xl/styles.xml";
const CALC_CHAIN: &str = "calcChain.xml";

/// Workbook children that must follow `calcPr`
const AFTER_CALC_PR: &[&[u8]] = &[
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

/// New content for one cell
#[derive(Debug, Clone, PartialEq)]
pub struct CellPatch {
    /// Replacement value; `None` keeps the template cell content
    pub value: Option<RawValue>,
    pub highlight: bool,
}

/// Cell patches of one sheet by 0-based row, then column
pub type SheetPatch = BTreeMap<u32, BTreeMap<u16, CellPatch>>;

/// Only xlsx packages are patched; other template formats are rebuilt
pub fn supports(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("xlsx"))
}

/// Edited and highlighted cells of a rendered sheet
pub fn sheet_patch(sheet: &Sheet) -> PatchResult<SheetPatch> {
    let mut patch = SheetPatch::new();
    for &(row, col) in sheet.edits() {
        let (r, c) = cell_index(row, col)?;
        patch.entry(r).or_default().insert(
            c,
            CellPatch {
                value: Some(sheet.grid().get(row, col).clone()),
                highlight: sheet.is_highlighted(row, col),
            },
        );
    }
    for &(row, col) in sheet.highlights() {
        let (r, c) = cell_index(row, col)?;
        patch.entry(r).or_default().entry(c).or_insert(CellPatch {
            value: None,
            highlight: true,
        });
    }
    Ok(patch)
}

/// Write `workbook` to `output` as a patched copy of `template`
pub fn patch_template(
    template: &Path,
    output: &Path,
    workbook: &Workbook,
    highlight_rgb: u32,
) -> Result<()> {
    patch_package(template, output, workbook, highlight_rgb)
        .map_err(|e| ReconcileError::workbook(output, e))
}

fn patch_package(
    template: &Path,
    output: &Path,
    workbook: &Workbook,
    highlight_rgb: u32,
) -> PatchResult<()> {
    let file = File::open(template).map_err(|e| format!("{}: {}", template.display(), e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| format!("{}: {}", template.display(), e))?;

    let workbook_xml = read_zip_file(&mut archive, WORKBOOK)?;
    let rels_xml = read_zip_file(&mut archive, WORKBOOK_RELS)?;
    let parts = resolve_worksheet_paths(&workbook_xml, &rels_xml)?;
    let styles_xml = read_zip_file(&mut archive, STYLES)?;
    let mut styles = HighlightStyles::load(&styles_xml, highlight_rgb)?;

    let mut replaced: HashMap<String, Vec<u8>> = HashMap::new();
    for sheet in workbook.sheets() {
        let patch = sheet_patch(sheet)?;
        if patch.is_empty() {
            continue;
        }
        let part = parts
            .get(sheet.name())
            .ok_or_else(|| format!("sheet '{}' has no worksheet part", sheet.name()))?;
        let xml = read_zip_file(&mut archive, part)?;
        replaced.insert(part.clone(), patch_sheet(&xml, &patch, &mut styles)?);
        debug!("Patched {} rows of sheet '{}'", patch.len(), sheet.name());
    }

    if !styles.variants.is_empty() {
        replaced.insert(STYLES.to_string(), styles.patch(&styles_xml)?);
    }
    replaced.insert(WORKBOOK.to_string(), force_recalc(&workbook_xml)?);

    // Overwritten formula cells would leave a stale calculation chain
    let calc_chain = format!("xl/{}", CALC_CHAIN);
    let has_calc_chain = archive.index_for_name(&calc_chain).is_some();
    if has_calc_chain {
        let content_types = read_zip_file(&mut archive, CONTENT_TYPES)?;
        replaced.insert(
            CONTENT_TYPES.to_string(),
            drop_calc_chain(&content_types, b"Override", b"PartName")?,
        );
        replaced.insert(
            WORKBOOK_RELS.to_string(),
            drop_calc_chain(&rels_xml, b"Relationship", b"Target")?,
        );
    }

    let out = File::create(output).map_err(|e| e.to_string())?;
    let mut writer = ZipWriter::new(out);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| e.to_string())?;
        let name = entry.name().to_string();
        if entry.is_dir() || (has_calc_chain && name == calc_chain) {
            continue;
        }

        let data = match replaced.remove(&name) {
            Some(bytes) => bytes,
            None => {
                let mut bytes = Vec::new();
                entry
                    .read_to_end(&mut bytes)
                    .map_err(|e| format!("{}: {}", name, e))?;
                bytes
            }
        };
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| format!("{}: {}", name, e))?;
        writer
            .write_all(&data)
            .map_err(|e| format!("{}: {}", name, e))?;
    }
    writer.finish().map_err(|e| e.to_string())?;
    Ok(())
}

fn read_zip_file<R: Read + Seek>(archive: &mut ZipArchive<R>, path: &str) -> PatchResult<String> {
    let mut file = archive
        .by_name(path)
        .map_err(|e| format!("part '{}' not found: {}", path, e))?;
    let mut content = String::new();
    file.read_to_string(&mut content)
        .map_err(|e| format!("failed to read '{}': {}", path, e))?;
    Ok(content)
}

/// Map each sheet name to its worksheet part through the workbook relationships
fn resolve_worksheet_paths(
    workbook_xml: &str,
    rels_xml: &str,
) -> PatchResult<HashMap<String, String>> {
    let mut targets = HashMap::new();
    let mut reader = Reader::from_str(rels_xml);
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) | Event::Empty(e) if named(&e, b"Relationship") => {
                if let (Some(id), Some(target)) = (attr(&e, b"Id")?, attr(&e, b"Target")?) {
                    targets.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let mut parts = HashMap::new();
    let mut reader = Reader::from_str(workbook_xml);
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) | Event::Empty(e) if named(&e, b"sheet") => {
                let name = attr(&e, b"name")?;
                let target = attr(&e, b"id")?.and_then(|id| targets.get(&id));
                if let (Some(name), Some(target)) = (name, target) {
                    let part = match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{}", target),
                    };
                    parts.insert(name, part);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(parts)
}

/// Parse a cell reference like "B5" into (row, col) = (4, 1)
fn parse_cell_ref(r: &str) -> Option<(u32, u16)> {
    let split = r.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = r.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let mut col: u32 = 0;
    for ch in letters.chars() {
        col = col * 26 + (ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }
    let row: u32 = digits.parse().ok()?;
    Some((row.checked_sub(1)?, u16::try_from(col - 1).ok()?))
}

/// Format (row, col) = (4, 1) as "B5"
fn cell_ref(row: u32, col: u16) -> String {
    let mut letters = Vec::new();
    let mut n = u32::from(col) + 1;
    while n > 0 {
        letters.push(b'A' + ((n - 1) % 26) as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    format!("{}{}", String::from_utf8_lossy(&letters), row + 1)
}

fn named(e: &BytesStart, local: &[u8]) -> bool {
    e.local_name().as_ref() == local
}

fn ends(e: &BytesEnd, local: &[u8]) -> bool {
    e.local_name().as_ref() == local
}

fn prefix_of(name: QName) -> String {
    name.prefix()
        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned())
        .unwrap_or_default()
}

fn qualified(prefix: &str, local: &str) -> String {
    if prefix.is_empty() {
        local.to_string()
    } else {
        format!("{}:{}", prefix, local)
    }
}

/// Unescaped value of the attribute with local name `key`
fn attr(e: &BytesStart, key: &[u8]) -> PatchResult<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        if attr.key.as_namespace_binding().is_some() || attr.key.local_name().as_ref() != key {
            continue;
        }
        let raw = std::str::from_utf8(&attr.value).map_err(|e| e.to_string())?;
        return Ok(Some(unescape(raw).map_err(|e| e.to_string())?.into_owned()));
    }
    Ok(None)
}

/// Copy of `e` with attribute `key` set to `value`
fn with_attr(e: &BytesStart, key: &str, value: &str) -> PatchResult<BytesStart<'static>> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        if attr.key.as_ref() != key.as_bytes() {
            out.push_attribute(attr);
        }
    }
    out.push_attribute((key, value));
    Ok(out)
}

fn write_event<'a>(writer: &mut Writer<Vec<u8>>, event: impl Into<Event<'a>>) -> PatchResult<()> {
    writer.write_event(event).map_err(|e| e.to_string())
}

/// Highlighted variants of the template's cell formats
#[derive(Debug)]
struct HighlightStyles {
    rgb: u32,
    fill_count: u32,
    xf_count: u32,
    /// Base cell format -> highlighted cell format
    variants: BTreeMap<u32, u32>,
}

impl HighlightStyles {
    fn load(xml: &str, rgb: u32) -> PatchResult<Self> {
        let mut reader = Reader::from_str(xml);
        let mut fill_count = None;
        let mut xf_count = 0;
        let mut in_fills = false;
        let mut in_cell_xfs = false;

        loop {
            match reader.read_event().map_err(|e| e.to_string())? {
                Event::Start(e) if named(&e, b"fills") => {
                    in_fills = true;
                    fill_count = Some(0);
                }
                Event::Start(e) if named(&e, b"cellXfs") => in_cell_xfs = true,
                Event::End(e) if ends(&e, b"fills") => in_fills = false,
                Event::End(e) if ends(&e, b"cellXfs") => in_cell_xfs = false,
                Event::Start(e) | Event::Empty(e) => {
                    if in_fills && named(&e, b"fill") {
                        fill_count = fill_count.map(|n| n + 1);
                    } else if in_cell_xfs && named(&e, b"xf") {
                        xf_count += 1;
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let fill_count = fill_count.ok_or("stylesheet has no fills")?;
        Ok(Self {
            rgb,
            fill_count,
            xf_count,
            variants: BTreeMap::new(),
        })
    }

    /// Cell format index for `base` with the highlight fill
    fn highlighted(&mut self, base: u32) -> u32 {
        let base = if base < self.xf_count { base } else { 0 };
        let next = self.xf_count + self.variants.len() as u32;
        *self.variants.entry(base).or_insert(next)
    }

    /// Stylesheet with the highlight fill and format variants appended
    fn patch(&self, xml: &str) -> PatchResult<Vec<u8>> {
        let mut reader = Reader::from_str(xml);
        let mut writer = Writer::new(Vec::new());
        let mut base_xfs: Vec<Vec<Event>> = Vec::new();
        let mut current: Option<Vec<Event>> = None;
        let mut in_cell_xfs = false;

        loop {
            let event = reader.read_event().map_err(|e| e.to_string())?;
            match &event {
                Event::Eof => break,
                Event::Start(e) if named(e, b"fills") => {
                    let count = (self.fill_count + 1).to_string();
                    write_event(&mut writer, Event::Start(with_attr(e, "count", &count)?))?;
                    continue;
                }
                Event::End(e) if ends(e, b"fills") => {
                    self.write_fill(&mut writer, &prefix_of(e.name()))?;
                }
                Event::Start(e) if named(e, b"cellXfs") => {
                    in_cell_xfs = true;
                    let count = (self.xf_count + self.variants.len() as u32).to_string();
                    write_event(&mut writer, Event::Start(with_attr(e, "count", &count)?))?;
                    continue;
                }
                Event::End(e) if ends(e, b"cellXfs") => {
                    in_cell_xfs = false;
                    self.write_variants(&mut writer, &base_xfs, &prefix_of(e.name()))?;
                }
                Event::Start(e) if in_cell_xfs && named(e, b"xf") => current = Some(Vec::new()),
                Event::Empty(e) if in_cell_xfs && named(e, b"xf") => {
                    base_xfs.push(vec![event.clone()]);
                }
                _ => {}
            }

            if let Some(xf) = current.as_mut() {
                xf.push(event.clone());
                if matches!(&event, Event::End(e) if ends(e, b"xf")) {
                    base_xfs.push(current.take().unwrap_or_default());
                }
            }
            write_event(&mut writer, event)?;
        }
        Ok(writer.into_inner())
    }

    fn write_fill(&self, writer: &mut Writer<Vec<u8>>, prefix: &str) -> PatchResult<()> {
        let fill = qualified(prefix, "fill");
        let pattern = qualified(prefix, "patternFill");

        write_event(writer, Event::Start(BytesStart::new(fill.as_str())))?;
        let mut start = BytesStart::new(pattern.as_str());
        start.push_attribute(("patternType", "solid"));
        write_event(writer, Event::Start(start))?;

        let mut fg = BytesStart::new(qualified(prefix, "fgColor"));
        fg.push_attribute(("rgb", format!("FF{:06X}", self.rgb & 0xFF_FFFF).as_str()));
        write_event(writer, Event::Empty(fg))?;
        let mut bg = BytesStart::new(qualified(prefix, "bgColor"));
        bg.push_attribute(("indexed", "64"));
        write_event(writer, Event::Empty(bg))?;

        write_event(writer, Event::End(BytesEnd::new(pattern)))?;
        write_event(writer, Event::End(BytesEnd::new(fill)))
    }

    fn write_variants(
        &self,
        writer: &mut Writer<Vec<u8>>,
        base_xfs: &[Vec<Event>],
        prefix: &str,
    ) -> PatchResult<()> {
        let mut order: Vec<(u32, u32)> = self.variants.iter().map(|(&b, &v)| (b, v)).collect();
        order.sort_by_key(|&(_, variant)| variant);
        let fill_id = self.fill_count.to_string();

        for (base, _) in order {
            match base_xfs.get(base as usize).and_then(|xf| xf.split_first()) {
                Some((Event::Start(e), rest)) => {
                    let start = with_attr(&with_attr(e, "fillId", &fill_id)?, "applyFill", "1")?;
                    write_event(writer, Event::Start(start))?;
                    for event in rest {
                        write_event(writer, event.clone())?;
                    }
                }
                Some((Event::Empty(e), _)) => {
                    let start = with_attr(&with_attr(e, "fillId", &fill_id)?, "applyFill", "1")?;
                    write_event(writer, Event::Empty(start))?;
                }
                _ => {
                    let mut xf = BytesStart::new(qualified(prefix, "xf"));
                    for (key, value) in [
                        ("numFmtId", "0"),
                        ("fontId", "0"),
                        ("fillId", fill_id.as_str()),
                        ("borderId", "0"),
                        ("xfId", "0"),
                        ("applyFill", "1"),
                    ] {
                        xf.push_attribute((key, value));
                    }
                    write_event(writer, Event::Empty(xf))?;
                }
            }
        }
        Ok(())
    }
}

/// Worksheet writer that merges patched cells into the template rows
struct SheetWriter<'s> {
    writer: Writer<Vec<u8>>,
    styles: &'s mut HighlightStyles,
    prefix: String,
}

impl SheetWriter<'_> {
    fn write<'a>(&mut self, event: impl Into<Event<'a>>) -> PatchResult<()> {
        write_event(&mut self.writer, event)
    }

    /// A row the template does not have
    fn new_row(&mut self, row: u32, cells: BTreeMap<u16, CellPatch>) -> PatchResult<()> {
        let name = qualified(&self.prefix, "row");
        let mut start = BytesStart::new(name.as_str());
        start.push_attribute(("r", (row + 1).to_string().as_str()));
        self.write(Event::Start(start))?;
        for (col, patch) in cells {
            self.new_cell(row, col, None, &patch)?;
        }
        self.write(Event::End(BytesEnd::new(name)))
    }

    /// A cell with patched content, keeping the template format `base`
    fn new_cell(&mut self, row: u32, col: u16, base: Option<u32>, patch: &CellPatch) -> PatchResult<()> {
        let style = if patch.highlight {
            Some(self.styles.highlighted(base.unwrap_or(0)))
        } else {
            base
        };

        let name = qualified(&self.prefix, "c");
        let mut start = BytesStart::new(name.as_str());
        start.push_attribute(("r", cell_ref(row, col).as_str()));
        if let Some(style) = style {
            start.push_attribute(("s", style.to_string().as_str()));
        }

        let content = match &patch.value {
            Some(RawValue::Number(n)) if n.is_nan() => None,
            Some(RawValue::Number(n)) if n.is_finite() => Some((false, n.to_string())),
            Some(RawValue::Number(n)) => Some((true, n.to_string())),
            Some(RawValue::Text(text)) => Some((true, text.clone())),
            Some(RawValue::Empty) | None => None,
        };

        match content {
            None => self.write(Event::Empty(start)),
            Some((false, number)) => {
                self.write(Event::Start(start))?;
                self.text_element("v", &number)?;
                self.write(Event::End(BytesEnd::new(name)))
            }
            Some((true, text)) => {
                start.push_attribute(("t", "inlineStr"));
                self.write(Event::Start(start))?;
                let inline = qualified(&self.prefix, "is");
                self.write(Event::Start(BytesStart::new(inline.as_str())))?;
                self.text_element("t", &text)?;
                self.write(Event::End(BytesEnd::new(inline)))?;
                self.write(Event::End(BytesEnd::new(name)))
            }
        }
    }

    fn text_element(&mut self, local: &str, text: &str) -> PatchResult<()> {
        let name = qualified(&self.prefix, local);
        let mut start = BytesStart::new(name.as_str());
        if text.trim() != text {
            start.push_attribute(("xml:space", "preserve"));
        }
        self.write(Event::Start(start))?;
        self.write(Event::Text(BytesText::new(text)))?;
        self.write(Event::End(BytesEnd::new(name)))
    }

    /// Handle a template cell; returns true when its children must be skipped
    fn template_cell(
        &mut self,
        e: &BytesStart,
        empty: bool,
        row: u32,
        next_col: &mut u16,
        cells: &mut BTreeMap<u16, CellPatch>,
    ) -> PatchResult<bool> {
        let col = match attr(e, b"r")? {
            Some(r) => parse_cell_ref(&r)
                .map(|(_, c)| c)
                .ok_or_else(|| format!("bad cell reference '{}'", r))?,
            None => *next_col,
        };
        *next_col = col.saturating_add(1);

        for (c, patch) in take_before(cells, &col) {
            self.new_cell(row, c, None, &patch)?;
        }

        let Some(patch) = cells.remove(&col) else {
            let original = e.borrow();
            return if empty {
                self.write(Event::Empty(original)).map(|_| false)
            } else {
                self.write(Event::Start(original)).map(|_| false)
            };
        };

        let base = attr(e, b"s")?.and_then(|s| s.parse().ok());
        if patch.value.is_some() || empty {
            self.new_cell(row, col, base, &patch)?;
            return Ok(!empty);
        }

        // Highlight only: keep the template content under the new format
        let style = self.styles.highlighted(base.unwrap_or(0)).to_string();
        self.write(Event::Start(with_attr(e, "s", &style)?))?;
        Ok(false)
    }
}

/// Split off and return the entries of `map` ordered before `key`
fn take_before<K: Ord, V>(map: &mut BTreeMap<K, V>, key: &K) -> BTreeMap<K, V> {
    let later = map.split_off(key);
    std::mem::replace(map, later)
}

fn row_number(e: &BytesStart, next_row: u32) -> PatchResult<u32> {
    match attr(e, b"r")? {
        Some(r) => r
            .parse::<u32>()
            .ok()
            .and_then(|r| r.checked_sub(1))
            .ok_or_else(|| format!("bad row number '{}'", r)),
        None => Ok(next_row),
    }
}

/// Merge `patch` into a worksheet part
fn patch_sheet(xml: &str, patch: &SheetPatch, styles: &mut HighlightStyles) -> PatchResult<Vec<u8>> {
    let mut reader = Reader::from_str(xml);
    let mut out = SheetWriter {
        writer: Writer::new(Vec::new()),
        styles,
        prefix: String::new(),
    };
    let mut rows = patch.clone();
    let mut open_row: Option<(u32, BTreeMap<u16, CellPatch>)> = None;
    let mut next_row = 0;
    let mut next_col = 0;
    let mut skipping = false;

    loop {
        let event = reader.read_event().map_err(|e| e.to_string())?;
        if skipping {
            if matches!(&event, Event::End(e) if ends(e, b"c")) {
                skipping = false;
            }
            continue;
        }

        match &event {
            Event::Eof => break,
            Event::Start(e) if named(e, b"sheetData") => {
                out.prefix = prefix_of(e.name());
            }
            Event::Empty(e) if named(e, b"sheetData") => {
                out.prefix = prefix_of(e.name());
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                out.write(Event::Start(e.borrow()))?;
                for (row, cells) in std::mem::take(&mut rows) {
                    out.new_row(row, cells)?;
                }
                out.write(Event::End(BytesEnd::new(name)))?;
                continue;
            }
            Event::End(e) if ends(e, b"sheetData") => {
                for (row, cells) in std::mem::take(&mut rows) {
                    out.new_row(row, cells)?;
                }
            }
            Event::Start(e) if named(e, b"row") => {
                let row = row_number(e, next_row)?;
                next_row = row + 1;
                next_col = 0;
                for (r, cells) in take_before(&mut rows, &row) {
                    out.new_row(r, cells)?;
                }
                open_row = Some((row, rows.remove(&row).unwrap_or_default()));
            }
            Event::Empty(e) if named(e, b"row") => {
                let row = row_number(e, next_row)?;
                next_row = row + 1;
                for (r, cells) in take_before(&mut rows, &row) {
                    out.new_row(r, cells)?;
                }
                if let Some(cells) = rows.remove(&row) {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    out.write(Event::Start(e.borrow()))?;
                    for (col, patch) in cells {
                        out.new_cell(row, col, None, &patch)?;
                    }
                    out.write(Event::End(BytesEnd::new(name)))?;
                    continue;
                }
            }
            Event::End(e) if ends(e, b"row") => {
                if let Some((row, cells)) = open_row.take() {
                    for (col, patch) in cells {
                        out.new_cell(row, col, None, &patch)?;
                    }
                }
            }
            Event::Start(e) | Event::Empty(e) if named(e, b"c") => {
                if let Some((row, cells)) = open_row.as_mut() {
                    let empty = matches!(&event, Event::Empty(_));
                    skipping = out.template_cell(e, empty, *row, &mut next_col, cells)?;
                    continue;
                }
            }
            _ => {}
        }
        out.write(event)?;
    }
    Ok(out.writer.into_inner())
}

/// Ask spreadsheet applications to recalculate formulas on open
fn force_recalc(xml: &str) -> PatchResult<Vec<u8>> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    let mut prefix = String::new();
    let mut done = false;

    let calc_pr = |prefix: &str| {
        let mut e = BytesStart::new(qualified(prefix, "calcPr"));
        e.push_attribute(("fullCalcOnLoad", "1"));
        Event::Empty(e)
    };

    loop {
        let event = reader.read_event().map_err(|e| e.to_string())?;
        match &event {
            Event::Eof => break,
            Event::Start(e) if named(e, b"workbook") => prefix = prefix_of(e.name()),
            Event::Empty(e) if named(e, b"calcPr") => {
                done = true;
                write_event(&mut writer, Event::Empty(with_attr(e, "fullCalcOnLoad", "1")?))?;
                continue;
            }
            Event::Start(e) if named(e, b"calcPr") => {
                done = true;
                write_event(&mut writer, Event::Start(with_attr(e, "fullCalcOnLoad", "1")?))?;
                continue;
            }
            Event::Start(e) | Event::Empty(e)
                if !done && AFTER_CALC_PR.contains(&e.local_name().as_ref()) =>
            {
                done = true;
                write_event(&mut writer, calc_pr(&prefix))?;
            }
            Event::End(e) if !done && ends(e, b"workbook") => {
                done = true;
                write_event(&mut writer, calc_pr(&prefix))?;
            }
            _ => {}
        }
        write_event(&mut writer, event)?;
    }
    Ok(writer.into_inner())
}

/// Drop the `element` entries whose `key` attribute points at the calculation chain
fn drop_calc_chain(xml: &str, element: &[u8], key: &[u8]) -> PatchResult<Vec<u8>> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());

    loop {
        let event = reader.read_event().map_err(|e| e.to_string())?;
        match &event {
            Event::Eof => break,
            Event::Empty(e) if named(e, element) => {
                if attr(e, key)?.is_some_and(|v| v.ends_with(CALC_CHAIN)) {
                    continue;
                }
            }
            _ => {}
        }
        write_event(&mut writer, event)?;
    }
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::ReportSheet;
    use rust_xlsxwriter::{Format, Workbook as XlsxWorkbook};
    use tempfile::TempDir;

    /// Template with a bold merged title, a wide column, a number format and a formula
    fn write_formatted_template(path: &Path) {
        let bold = Format::new().set_bold();
        let percent = Format::new().set_num_format("0.00%");

        let mut xlsx = XlsxWorkbook::new();
        let sheet = xlsx.add_worksheet().set_name("HTRB 100%").unwrap();
        sheet.merge_range(0, 0, 0, 3, "HTRB report", &bold).unwrap();
        sheet.set_column_width(1, 30).unwrap();
        sheet.write_number_with_format(2, 1, 0.5, &percent).unwrap();
        sheet.write_formula(39, 2, "=SUM(B18:B20)").unwrap();
        sheet.write_string(17, 1, "placeholder").unwrap();
        xlsx.add_worksheet().set_name("AC").unwrap();
        xlsx.save(path).unwrap();
    }

    fn read_part(path: &Path, name: &str) -> String {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        read_zip_file(&mut archive, name).unwrap()
    }

    /// Opening tag of the cell at `r` in a worksheet part
    fn cell_tag<'a>(xml: &'a str, r: &str) -> Option<&'a str> {
        let start = xml.find(&format!("<c r=\"{}\"", r))?;
        let end = start + xml[start..].find('>')?;
        Some(&xml[start..=end])
    }

    fn style_of(tag: &str) -> Option<u32> {
        let start = tag.find(" s=\"")? + 4;
        let end = start + tag[start..].find('"')?;
        tag[start..end].parse().ok()
    }

    #[test]
    fn test_cell_refs() {
        assert_eq!(parse_cell_ref("B5"), Some((4, 1)));
        assert_eq!(parse_cell_ref("AA10"), Some((9, 26)));
        assert_eq!(parse_cell_ref("5"), None);
        assert_eq!(cell_ref(4, 1), "B5");
        assert_eq!(cell_ref(9, 26), "AA10");
        assert_eq!(cell_ref(0, 701), "ZZ1");
    }

    #[test]
    fn test_template_formatting_survives() {
        let temp_dir = TempDir::new().unwrap();
        let template = temp_dir.path().join("template.xlsx");
        let output = temp_dir.path().join("processed_lot.xlsx");
        write_formatted_template(&template);

        let mut workbook = Workbook::open(&template).unwrap();
        let sheet = workbook.sheet_mut(0).unwrap();
        sheet.set_value(17, 1, RawValue::Number(620.0));
        sheet.highlight(17, 1);
        sheet.set_value(18, 1, RawValue::from("Over"));
        sheet.set_value(7, 2, RawValue::from("BVDSS & HVIDSS"));
        sheet.highlight(20, 4);

        patch_template(&template, &output, &workbook, 0xFFFF00).unwrap();

        let before = read_part(&template, "xl/worksheets/sheet1.xml");
        let after = read_part(&output, "xl/worksheets/sheet1.xml");
        assert!(after.contains("<mergeCell ref=\"A1:D1\"/>"));
        assert!(after.contains("customWidth=\"1\""));
        assert!(after.contains("<f>SUM(B18:B20)</f>"));
        assert_eq!(cell_tag(&after, "A1"), cell_tag(&before, "A1"));
        assert_eq!(cell_tag(&after, "B3"), cell_tag(&before, "B3"));

        let styles_before = read_part(&template, "xl/styles.xml");
        let styles_after = read_part(&output, "xl/styles.xml");
        assert!(styles_after.contains("rgb=\"FFFFFF00\""));
        assert!(styles_after.len() > styles_before.len());
        let highlighted = style_of(cell_tag(&after, "B18").unwrap()).unwrap();
        assert_eq!(style_of(cell_tag(&after, "E21").unwrap()), Some(highlighted));
        assert!(style_of(cell_tag(&before, "B3").unwrap()).unwrap() < highlighted);

        let workbook_xml = read_part(&output, "xl/workbook.xml");
        assert!(workbook_xml.contains("fullCalcOnLoad=\"1\""));

        let reloaded = Workbook::open(&output).unwrap();
        assert_eq!(reloaded.sheet_names(), vec!["HTRB 100%", "AC"]);
        let grid = reloaded.sheet(0).unwrap().grid();
        assert_eq!(grid.get(17, 1), &RawValue::Number(620.0));
        assert_eq!(grid.get(18, 1), &RawValue::from("Over"));
        assert_eq!(grid.get(7, 2), &RawValue::from("BVDSS & HVIDSS"));
        assert_eq!(grid.get(0, 0), &RawValue::from("HTRB report"));
        assert_eq!(grid.get(2, 1), &RawValue::Number(0.5));
    }

    #[test]
    fn test_untouched_sheet_copied_verbatim() {
        let temp_dir = TempDir::new().unwrap();
        let template = temp_dir.path().join("template.xlsx");
        let output = temp_dir.path().join("out.xlsx");
        write_formatted_template(&template);

        let mut workbook = Workbook::open(&template).unwrap();
        workbook
            .sheet_mut(1)
            .unwrap()
            .set_value(0, 0, RawValue::Number(3.0));
        patch_template(&template, &output, &workbook, 0xFFFF00).unwrap();

        assert_eq!(
            read_part(&output, "xl/worksheets/sheet1.xml"),
            read_part(&template, "xl/worksheets/sheet1.xml")
        );
        assert_eq!(
            read_part(&output, "xl/styles.xml"),
            read_part(&template, "xl/styles.xml")
        );
        let ac = read_part(&output, "xl/worksheets/sheet2.xml");
        assert!(ac.contains("<c r=\"A1\"><v>3</v></c>"));
    }

    #[test]
    fn test_non_xlsx_templates_not_patched() {
        assert!(supports(Path::new("templates/report.xlsx")));
        assert!(supports(Path::new("REPORT.XLSX")));
        assert!(!supports(Path::new("report.xls")));
        assert!(!supports(Path::new("report.ods")));
    }
}
