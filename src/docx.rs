//! Word (.docx) templates.
//!
//! A `.docx` file is a zip package; the body lives in `word/document.xml`.
//! Every top-level `w:tbl` in the body becomes a [`Table`], each `w:tr` a
//! [`Row`] and each `w:tc` a [`Cell`]. Cell text follows Word's plain-text
//! view: the cell's own paragraphs joined by `\n`, `w:tab` as `\t`,
//! `w:br`/`w:cr` as `\n`. Text inside nested tables, content controls and
//! text boxes does not belong to the enclosing cell.
//!
//! Saving rewrites only the cells whose text changed. A rewritten cell keeps
//! its `w:tcPr`, the `w:pPr` of its first paragraph and the `w:rPr` of that
//! paragraph's first run; the rest of its content becomes a single run.
//! Every other package part is written back untouched.

use crate::error::{Result, TemplateFillError};
use crate::schema::{Cell, Row, Table, TemplateDocument};
use crate::store::DocumentStore;
use log::{debug, info, warn};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use std::fmt::Display;
use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const DOCUMENT_PART: &str = "word/document.xml";

const TBL: &[u8] = b"w:tbl";
const TR: &[u8] = b"w:tr";
const TC: &[u8] = b"w:tc";
const TC_PR: &[u8] = b"w:tcPr";
const P: &[u8] = b"w:p";
const P_PR: &[u8] = b"w:pPr";
const R: &[u8] = b"w:r";
const R_PR: &[u8] = b"w:rPr";
const T: &[u8] = b"w:t";
const TAB: &[u8] = b"w:tab";
const BR: &[u8] = b"w:br";
const CR: &[u8] = b"w:cr";

type XmlResult<T> = std::result::Result<T, String>;

fn xml_err(e: impl Display) -> String {
    e.to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocxStore;

impl DocxStore {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentStore for DocxStore {
    type Document = DocxTemplate;

    fn load_template(&self, path: &Path) -> Result<DocxTemplate> {
        let file = File::open(path).map_err(|e| TemplateFillError::load(path, e))?;
        let template = DocxTemplate::read(file).map_err(|e| TemplateFillError::load(path, e))?;
        debug!(
            "Loaded {} with {} package parts and {} tables",
            path.display(),
            template.parts.len(),
            template.document.tables.len()
        );
        Ok(template)
    }

    fn save_document(&self, document: &DocxTemplate, path: &Path) -> Result<()> {
        let bytes = document
            .encode()
            .map_err(|e| TemplateFillError::save(path, e))?;
        std::fs::write(path, bytes).map_err(|e| TemplateFillError::save(path, e))
    }
}

#[derive(Debug, Clone)]
struct PackagePart {
    name: String,
    data: Vec<u8>,
    is_dir: bool,
}

/// A loaded `.docx` package together with the tables of its body.
#[derive(Debug, Clone)]
pub struct DocxTemplate {
    parts: Vec<PackagePart>,
    loaded: TemplateDocument,
    document: TemplateDocument,
}

impl DocxTemplate {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::read(Cursor::new(bytes)).map_err(TemplateFillError::InvalidDocument)
    }

    fn read<R: Read + Seek>(reader: R) -> XmlResult<Self> {
        let mut archive =
            ZipArchive::new(reader).map_err(|e| format!("not a docx package: {}", e))?;
        let mut parts = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(xml_err)?;
            let name = entry.name().to_string();
            let is_dir = entry.is_dir();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).map_err(xml_err)?;
            parts.push(PackagePart { name, data, is_dir });
        }

        let body = parts
            .iter()
            .find(|p| p.name == DOCUMENT_PART)
            .ok_or_else(|| format!("package has no {}", DOCUMENT_PART))?;
        let document = TemplateDocument::new(read_tables(&body.data)?);

        Ok(Self {
            parts,
            loaded: document.clone(),
            document,
        })
    }

    pub fn tables(&self) -> &TemplateDocument {
        &self.document
    }

    pub fn into_tables(self) -> TemplateDocument {
        self.document
    }

    /// Serializes the package with changed cells written into the body.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.encode().map_err(TemplateFillError::InvalidDocument)
    }

    fn encode(&self) -> XmlResult<Vec<u8>> {
        let edits = changed_cells(&self.loaded, &self.document)?;
        if !edits.is_empty() {
            info!("Rewriting {} table cells in {}", edits.len(), DOCUMENT_PART);
        }

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        for part in &self.parts {
            if part.is_dir {
                zip.add_directory(part.name.as_str(), stored).map_err(xml_err)?;
                continue;
            }
            let options = if part.name.starts_with("word/media/") {
                stored
            } else {
                deflated
            };
            zip.start_file(part.name.as_str(), options).map_err(xml_err)?;
            if part.name == DOCUMENT_PART && !edits.is_empty() {
                let body = rewrite_cells(&part.data, &edits)?;
                zip.write_all(&body).map_err(xml_err)?;
            } else {
                zip.write_all(&part.data).map_err(xml_err)?;
            }
        }

        let cursor = zip.finish().map_err(xml_err)?;
        Ok(cursor.into_inner())
    }
}

impl AsRef<TemplateDocument> for DocxTemplate {
    fn as_ref(&self) -> &TemplateDocument {
        &self.document
    }
}

impl AsMut<TemplateDocument> for DocxTemplate {
    fn as_mut(&mut self) -> &mut TemplateDocument {
        &mut self.document
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CellPos {
    table: usize,
    row: usize,
    cell: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    OpenTable,
    OpenRow,
    OpenCell(CellPos),
    CloseTable,
    CloseRow,
    CloseCell,
    Other,
}

/// Position relative to the top-level tables of a body being streamed.
#[derive(Debug, Default)]
struct TableCursor {
    depth: usize,
    table: Option<usize>,
    row: Option<usize>,
    cell: Option<usize>,
    tables_seen: usize,
    rows_seen: usize,
    cells_seen: usize,
}

impl TableCursor {
    fn open(&mut self, name: &[u8]) -> Step {
        match name {
            TBL => {
                self.depth += 1;
                if self.depth > 1 {
                    return Step::Other;
                }
                self.table = Some(self.tables_seen);
                self.tables_seen += 1;
                self.rows_seen = 0;
                Step::OpenTable
            }
            TR if self.depth == 1 => {
                self.row = Some(self.rows_seen);
                self.rows_seen += 1;
                self.cells_seen = 0;
                Step::OpenRow
            }
            TC if self.depth == 1 => match (self.table, self.row) {
                (Some(table), Some(row)) => {
                    let cell = self.cells_seen;
                    self.cells_seen += 1;
                    self.cell = Some(cell);
                    Step::OpenCell(CellPos { table, row, cell })
                }
                _ => Step::Other,
            },
            _ => Step::Other,
        }
    }

    fn close(&mut self, name: &[u8]) -> Step {
        match name {
            TBL => {
                self.depth = self.depth.saturating_sub(1);
                if self.depth > 0 {
                    return Step::Other;
                }
                self.table = None;
                self.row = None;
                self.cell = None;
                Step::CloseTable
            }
            TR if self.depth == 1 && self.row.is_some() => {
                self.row = None;
                self.cell = None;
                Step::CloseRow
            }
            TC if self.depth == 1 && self.cell.is_some() => {
                self.cell = None;
                Step::CloseCell
            }
            _ => Step::Other,
        }
    }

    /// True while directly inside a top-level cell (not in a nested table).
    fn in_cell(&self) -> bool {
        self.depth == 1 && self.cell.is_some()
    }
}

/// Text of one top-level cell, taken from its direct child paragraphs only.
///
/// Paragraphs inside content controls (`w:sdt`) or text boxes are skipped.
#[derive(Debug, Default)]
struct CellText {
    depth: usize,
    paragraphs: usize,
    in_paragraph: bool,
    nested_paragraphs: usize,
    in_run: bool,
    in_text: bool,
}

impl CellText {
    fn begin_paragraph(&mut self, out: &mut String) {
        if self.paragraphs > 0 {
            out.push('\n');
        }
        self.paragraphs += 1;
    }

    fn collecting(&self) -> bool {
        self.in_paragraph && self.nested_paragraphs == 0
    }

    fn accepts_text(&self) -> bool {
        self.collecting() && self.in_text
    }

    fn open(&mut self, name: &[u8], out: &mut String) {
        match name {
            P if self.depth == 0 => {
                self.begin_paragraph(out);
                self.in_paragraph = true;
            }
            P if self.in_paragraph => self.nested_paragraphs += 1,
            R if self.collecting() => self.in_run = true,
            T if self.collecting() && self.in_run => self.in_text = true,
            _ => {}
        }
        self.depth += 1;
    }

    fn empty(&mut self, name: &[u8], out: &mut String) {
        match name {
            P if self.depth == 0 => self.begin_paragraph(out),
            TAB if self.collecting() && self.in_run => out.push('\t'),
            BR | CR if self.collecting() && self.in_run => out.push('\n'),
            _ => {}
        }
    }

    fn close(&mut self, name: &[u8]) {
        self.depth = self.depth.saturating_sub(1);
        match name {
            P if self.depth == 0 => self.in_paragraph = false,
            P if self.nested_paragraphs > 0 => self.nested_paragraphs -= 1,
            R if self.collecting() => self.in_run = false,
            T if self.collecting() => self.in_text = false,
            _ => {}
        }
    }
}

fn last_cell(tables: &mut [Table]) -> Option<&mut Cell> {
    tables.last_mut()?.rows.last_mut()?.cells.last_mut()
}

fn read_tables(xml: &[u8]) -> XmlResult<Vec<Table>> {
    let mut reader = Reader::from_reader(xml);
    let mut cursor = TableCursor::default();
    let mut tables: Vec<Table> = Vec::new();
    let mut text = CellText::default();
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            format!(
                "malformed {} near byte {}: {}",
                DOCUMENT_PART,
                reader.buffer_position(),
                e
            )
        })?;

        match event {
            Event::Start(e) => {
                let name = e.name();
                match cursor.open(name.as_ref()) {
                    Step::OpenTable => tables.push(Table::default()),
                    Step::OpenRow => {
                        if let Some(table) = tables.last_mut() {
                            table.rows.push(Row::default());
                        }
                    }
                    Step::OpenCell(_) => {
                        if let Some(row) = tables.last_mut().and_then(|t| t.rows.last_mut()) {
                            row.cells.push(Cell::default());
                        }
                        text = CellText::default();
                    }
                    _ if cursor.in_cell() => {
                        if let Some(cell) = last_cell(&mut tables) {
                            text.open(name.as_ref(), &mut cell.text);
                        }
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                let name = e.name();
                match cursor.open(name.as_ref()) {
                    Step::OpenTable => tables.push(Table::default()),
                    Step::OpenRow => {
                        if let Some(table) = tables.last_mut() {
                            table.rows.push(Row::default());
                        }
                    }
                    Step::OpenCell(_) => {
                        if let Some(row) = tables.last_mut().and_then(|t| t.rows.last_mut()) {
                            row.cells.push(Cell::default());
                        }
                    }
                    _ if cursor.in_cell() => {
                        if let Some(cell) = last_cell(&mut tables) {
                            text.empty(name.as_ref(), &mut cell.text);
                        }
                    }
                    _ => {}
                }
                cursor.close(name.as_ref());
            }
            Event::Text(e) => {
                if cursor.in_cell() && text.accepts_text() {
                    let unescaped = e.unescape().map_err(xml_err)?;
                    if let Some(cell) = last_cell(&mut tables) {
                        cell.text.push_str(&unescaped);
                    }
                }
            }
            Event::CData(e) => {
                if cursor.in_cell() && text.accepts_text() {
                    if let Some(cell) = last_cell(&mut tables) {
                        cell.text.push_str(&String::from_utf8_lossy(&e));
                    }
                }
            }
            Event::End(e) => {
                let name = e.name();
                if cursor.in_cell() {
                    text.close(name.as_ref());
                }
                cursor.close(name.as_ref());
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if cursor.depth != 0 {
        return Err(format!("{} ends inside a table", DOCUMENT_PART));
    }
    Ok(tables)
}

fn changed_cells<'a>(
    loaded: &TemplateDocument,
    current: &'a TemplateDocument,
) -> XmlResult<HashMap<CellPos, &'a str>> {
    let layout_error = || "table layout no longer matches the loaded template".to_string();

    if loaded.tables.len() != current.tables.len() {
        return Err(layout_error());
    }

    let mut edits = HashMap::new();
    for (t, (before, after)) in loaded.tables.iter().zip(&current.tables).enumerate() {
        if before.rows.len() != after.rows.len() {
            return Err(layout_error());
        }
        for (r, (row_before, row_after)) in before.rows.iter().zip(&after.rows).enumerate() {
            if row_before.cells.len() != row_after.cells.len() {
                return Err(layout_error());
            }
            for (c, (old, new)) in row_before.cells.iter().zip(&row_after.cells).enumerate() {
                if old.text != new.text {
                    let pos = CellPos { table: t, row: r, cell: c };
                    edits.insert(pos, new.text.as_str());
                }
            }
        }
    }
    Ok(edits)
}

#[derive(Debug, Clone, Copy)]
enum Sink {
    Output,
    ParagraphProps,
    RunProps,
}

/// Streams the content of one `w:tc` whose text is being replaced.
///
/// Events are dropped unless they belong to the cell properties (copied to
/// the output) or to the first paragraph's / first run's properties
/// (buffered for the replacement paragraph).
struct CellRewrite<'t> {
    text: &'t str,
    depth: usize,
    capture: Option<(Sink, usize)>,
    seen_paragraph: bool,
    in_first_paragraph: bool,
    seen_run: bool,
    in_first_run: bool,
    paragraph_props: Writer<Vec<u8>>,
    run_props: Writer<Vec<u8>>,
}

impl<'t> CellRewrite<'t> {
    fn new(text: &'t str) -> Self {
        Self {
            text,
            depth: 0,
            capture: None,
            seen_paragraph: false,
            in_first_paragraph: false,
            seen_run: false,
            in_first_run: false,
            paragraph_props: Writer::new(Vec::new()),
            run_props: Writer::new(Vec::new()),
        }
    }

    fn closes_cell(&self, event: &Event<'_>) -> bool {
        self.depth == 0 && matches!(event, Event::End(_))
    }

    fn classify(&mut self, name: &[u8], opens: bool) -> Option<Sink> {
        match (self.depth, name) {
            (0, TC_PR) => Some(Sink::Output),
            (0, P) => {
                if !self.seen_paragraph {
                    self.seen_paragraph = true;
                    self.in_first_paragraph = opens;
                }
                None
            }
            (1, P_PR) if self.in_first_paragraph => Some(Sink::ParagraphProps),
            (1, R) if self.in_first_paragraph => {
                if !self.seen_run {
                    self.seen_run = true;
                    self.in_first_run = opens;
                }
                None
            }
            (2, R_PR) if self.in_first_run => Some(Sink::RunProps),
            _ => None,
        }
    }

    fn sink<'w>(
        &'w mut self,
        sink: Sink,
        out: &'w mut Writer<Vec<u8>>,
    ) -> &'w mut Writer<Vec<u8>> {
        match sink {
            Sink::Output => out,
            Sink::ParagraphProps => &mut self.paragraph_props,
            Sink::RunProps => &mut self.run_props,
        }
    }

    fn emit(&mut self, event: Event<'_>, out: &mut Writer<Vec<u8>>) -> XmlResult<()> {
        let capture = self.capture;
        match capture {
            Some((sink, _)) => self.sink(sink, out).write_event(event).map_err(xml_err),
            None => Ok(()),
        }
    }

    fn absorb(&mut self, event: Event<'_>, out: &mut Writer<Vec<u8>>) -> XmlResult<()> {
        match event {
            Event::Start(e) => {
                if self.capture.is_none() {
                    if let Some(sink) = self.classify(e.name().as_ref(), true) {
                        self.capture = Some((sink, self.depth));
                    }
                }
                self.depth += 1;
                self.emit(Event::Start(e), out)
            }
            Event::Empty(e) => {
                if self.capture.is_some() {
                    return self.emit(Event::Empty(e), out);
                }
                match self.classify(e.name().as_ref(), false) {
                    Some(sink) => self
                        .sink(sink, out)
                        .write_event(Event::Empty(e))
                        .map_err(xml_err),
                    None => Ok(()),
                }
            }
            Event::End(e) => {
                self.depth = self.depth.saturating_sub(1);
                let closes_run = self.depth == 1 && e.name().as_ref() == R;
                let closes_paragraph = self.depth == 0 && e.name().as_ref() == P;
                self.emit(Event::End(e), out)?;

                if matches!(self.capture, Some((_, depth)) if depth == self.depth) {
                    self.capture = None;
                }
                if closes_run {
                    self.in_first_run = false;
                }
                if closes_paragraph {
                    self.in_first_paragraph = false;
                }
                Ok(())
            }
            other => self.emit(other, out),
        }
    }

    fn write_replacement(&self, out: &mut Writer<Vec<u8>>) -> XmlResult<()> {
        out.write_event(Event::Start(BytesStart::new("w:p")))
            .map_err(xml_err)?;
        out.get_mut()
            .extend_from_slice(self.paragraph_props.get_ref());
        out.write_event(Event::Start(BytesStart::new("w:r")))
            .map_err(xml_err)?;
        out.get_mut().extend_from_slice(self.run_props.get_ref());
        write_run_text(out, self.text)?;
        out.write_event(Event::End(BytesEnd::new("w:r")))
            .map_err(xml_err)?;
        out.write_event(Event::End(BytesEnd::new("w:p")))
            .map_err(xml_err)
    }
}

fn flush_text(out: &mut Writer<Vec<u8>>, segment: &mut String) -> XmlResult<()> {
    if segment.is_empty() {
        return Ok(());
    }
    let start = BytesStart::new("w:t").with_attributes([("xml:space", "preserve")]);
    out.write_event(Event::Start(start)).map_err(xml_err)?;
    out.write_event(Event::Text(BytesText::new(segment)))
        .map_err(xml_err)?;
    out.write_event(Event::End(BytesEnd::new("w:t")))
        .map_err(xml_err)?;
    segment.clear();
    Ok(())
}

/// Characters XML 1.0 allows in text, apart from tab and line breaks.
fn is_xml_text_char(c: char) -> bool {
    matches!(c, '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}')
}

/// Run content for `text`: tabs become `w:tab`, line breaks `w:br`.
///
/// Vertical tab and form feed are also written as `w:br`. Any other
/// character XML 1.0 forbids is dropped.
fn write_run_text(out: &mut Writer<Vec<u8>>, text: &str) -> XmlResult<()> {
    let mut segment = String::new();
    let mut dropped = 0usize;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\t' => {
                flush_text(out, &mut segment)?;
                out.write_event(Event::Empty(BytesStart::new("w:tab")))
                    .map_err(xml_err)?;
            }
            '\r' | '\n' | '\u{000B}' | '\u{000C}' => {
                if c == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                flush_text(out, &mut segment)?;
                out.write_event(Event::Empty(BytesStart::new("w:br")))
                    .map_err(xml_err)?;
            }
            c if is_xml_text_char(c) => segment.push(c),
            _ => dropped += 1,
        }
    }
    if dropped > 0 {
        warn!("Dropped {} characters not allowed in XML from a cell value", dropped);
    }
    flush_text(out, &mut segment)
}

fn rewrite_cells(xml: &[u8], edits: &HashMap<CellPos, &str>) -> XmlResult<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut cursor = TableCursor::default();
    let mut rewrite: Option<CellRewrite> = None;
    let mut applied = 0usize;
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            format!(
                "malformed {} near byte {}: {}",
                DOCUMENT_PART,
                reader.buffer_position(),
                e
            )
        })?;
        if matches!(event, Event::Eof) {
            break;
        }

        if let Some(active) = rewrite.as_mut() {
            if active.closes_cell(&event) {
                active.write_replacement(&mut writer)?;
                writer.write_event(event).map_err(xml_err)?;
                cursor.close(TC);
                rewrite = None;
                applied += 1;
            } else {
                active.absorb(event, &mut writer)?;
            }
            buf.clear();
            continue;
        }

        match event {
            Event::Start(e) => {
                let edit = match cursor.open(e.name().as_ref()) {
                    Step::OpenCell(pos) => edits.get(&pos).copied(),
                    _ => None,
                };
                writer.write_event(Event::Start(e)).map_err(xml_err)?;
                if let Some(text) = edit {
                    rewrite = Some(CellRewrite::new(text));
                }
            }
            Event::Empty(e) => {
                let name = e.name().as_ref().to_vec();
                let edit = match cursor.open(&name) {
                    Step::OpenCell(pos) => edits.get(&pos).copied(),
                    _ => None,
                };
                match edit {
                    Some(text) => {
                        writer.write_event(Event::Start(e)).map_err(xml_err)?;
                        CellRewrite::new(text).write_replacement(&mut writer)?;
                        writer
                            .write_event(Event::End(BytesEnd::new("w:tc")))
                            .map_err(xml_err)?;
                        applied += 1;
                    }
                    None => writer.write_event(Event::Empty(e)).map_err(xml_err)?,
                }
                cursor.close(&name);
            }
            Event::End(e) => {
                cursor.close(e.name().as_ref());
                writer.write_event(Event::End(e)).map_err(xml_err)?;
            }
            other => writer.write_event(other).map_err(xml_err)?,
        }
        buf.clear();
    }

    if rewrite.is_some() {
        return Err(format!("{} ends inside a table cell", DOCUMENT_PART));
    }
    if applied != edits.len() {
        return Err(format!(
            "only {} of {} changed cells were found in {}",
            applied,
            edits.len(),
            DOCUMENT_PART
        ));
    }
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;

    fn body(content: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document {}><w:body>{}<w:sectPr/></w:body></w:document>"#,
            NS, content
        )
    }

    fn package(document_xml: &str) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        zip.start_file("[Content_Types].xml", options).unwrap();
        zip.write_all(b"<Types/>").unwrap();
        zip.start_file(DOCUMENT_PART, options).unwrap();
        zip.write_all(document_xml.as_bytes()).unwrap();
        zip.start_file("word/styles.xml", options).unwrap();
        zip.write_all(b"<w:styles/>").unwrap();
        zip.finish().unwrap().into_inner()
    }

    fn part(bytes: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut text = String::new();
        entry.read_to_string(&mut text).unwrap();
        text
    }

    fn cell(text: &str) -> String {
        format!("<w:tc><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:tc>", text)
    }

    fn row(label: &str, value: &str) -> String {
        format!("<w:tr>{}{}</w:tr>", cell(label), cell(value))
    }

    #[test]
    fn test_reads_tables_rows_and_cells() {
        let xml = body(&format!(
            "<w:p><w:r><w:t>Intro</w:t></w:r></w:p><w:tbl>{}{}</w:tbl><w:tbl>{}</w:tbl>",
            row("Protocol Title:", ""),
            "<w:tr><w:tc><w:p><w:r><w:t>Overview</w:t></w:r></w:p></w:tc></w:tr>",
            row("Sponsor &amp; Partner", "TBD"),
        ));

        let template = DocxTemplate::from_bytes(&package(&xml)).unwrap();
        let tables = &template.tables().tables;

        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].rows.len(), 2);
        assert_eq!(tables[0].rows[0].label(), Some("Protocol Title:"));
        assert_eq!(tables[0].rows[0].value(), Some(""));
        assert_eq!(tables[0].rows[1].cells.len(), 1);
        assert_eq!(tables[1].rows[0].label(), Some("Sponsor & Partner"));
        assert_eq!(tables[1].rows[0].value(), Some("TBD"));
    }

    #[test]
    fn test_cell_text_follows_word_text_model() {
        let label = concat!(
            "<w:tc>",
            r#"<w:p><w:pPr><w:tabs><w:tab w:val="left" w:pos="720"/></w:tabs></w:pPr>"#,
            "<w:r><w:t>Trial</w:t></w:r><w:r><w:tab/><w:t xml:space=\"preserve\">Start </w:t></w:r></w:p>",
            "<w:p><w:r><w:t>Date</w:t><w:br/><w:t>(planned)</w:t></w:r></w:p>",
            "<w:p/>",
            "</w:tc>"
        );
        let xml = body(&format!("<w:tbl><w:tr>{}{}</w:tr></w:tbl>", label, cell("")));

        let template = DocxTemplate::from_bytes(&package(&xml)).unwrap();
        assert_eq!(
            template.tables().tables[0].rows[0].label(),
            Some("Trial\tStart \nDate\n(planned)\n")
        );
    }

    #[test]
    fn test_nested_table_text_is_not_part_of_cell() {
        let nested = format!("<w:tbl>{}</w:tbl>", row("inner label", "inner value"));
        let outer_cell = format!(
            "<w:tc><w:p><w:r><w:t>Outer</w:t></w:r></w:p>{}<w:p/></w:tc>",
            nested
        );
        let xml = body(&format!(
            "<w:tbl><w:tr>{}{}</w:tr>{}</w:tbl>",
            outer_cell,
            cell("v"),
            row("Next", "")
        ));

        let template = DocxTemplate::from_bytes(&package(&xml)).unwrap();
        let tables = &template.tables().tables;
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows.len(), 2);
        assert_eq!(tables[0].rows[0].label(), Some("Outer\n"));
        assert_eq!(tables[0].rows[1].label(), Some("Next"));
    }

    #[test]
    fn test_missing_body_part_is_rejected() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("word/styles.xml", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"<w:styles/>").unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        match DocxTemplate::from_bytes(&bytes).unwrap_err() {
            TemplateFillError::InvalidDocument(reason) => assert!(reason.contains(DOCUMENT_PART)),
            other => panic!("expected invalid document, got {:?}", other),
        }
    }

    #[test]
    fn test_non_zip_input_is_rejected() {
        assert!(matches!(
            DocxTemplate::from_bytes(b"plain text, not a package"),
            Err(TemplateFillError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_malformed_xml_is_rejected() {
        let xml = body("<w:tbl><w:tr><w:tc><w:p></w:tc></w:tr></w:tbl>");
        assert!(DocxTemplate::from_bytes(&package(&xml)).is_err());
    }

    #[test]
    fn test_unchanged_document_round_trips_parts() {
        let xml = body(&format!("<w:tbl>{}</w:tbl>", row("Title", "x")));
        let template = DocxTemplate::from_bytes(&package(&xml)).unwrap();

        let bytes = template.to_bytes().unwrap();
        assert_eq!(part(&bytes, DOCUMENT_PART), xml);
        assert_eq!(part(&bytes, "word/styles.xml"), "<w:styles/>");
    }

    #[test]
    fn test_rewrite_keeps_cell_paragraph_and_run_properties() {
        let value_cell = concat!(
            r#"<w:tc><w:tcPr><w:tcW w:w="4000" w:type="dxa"/></w:tcPr>"#,
            r#"<w:p><w:pPr><w:jc w:val="center"/></w:pPr>"#,
            r#"<w:r><w:rPr><w:b/></w:rPr><w:t>old</w:t></w:r><w:r><w:t> text</w:t></w:r></w:p>"#,
            r#"<w:p><w:r><w:t>second paragraph</w:t></w:r></w:p>"#,
            "</w:tc>"
        );
        let xml = body(&format!(
            "<w:tbl><w:tr>{}{}</w:tr>{}</w:tbl>",
            cell("Protocol Title"),
            value_cell,
            row("Other", "untouched")
        ));
        let mut template = DocxTemplate::from_bytes(&package(&xml)).unwrap();
        template.as_mut().tables[0].rows[0].cells[1].text = "A & B\tC\nD".to_string();

        let bytes = template.to_bytes().unwrap();
        let rewritten = part(&bytes, DOCUMENT_PART);

        let expected_cell = concat!(
            r#"<w:tc><w:tcPr><w:tcW w:w="4000" w:type="dxa"/></w:tcPr>"#,
            r#"<w:p><w:pPr><w:jc w:val="center"/></w:pPr>"#,
            r#"<w:r><w:rPr><w:b/></w:rPr>"#,
            r#"<w:t xml:space="preserve">A &amp; B</w:t><w:tab/>"#,
            r#"<w:t xml:space="preserve">C</w:t><w:br/>"#,
            r#"<w:t xml:space="preserve">D</w:t></w:r></w:p></w:tc>"#
        );
        assert!(rewritten.contains(expected_cell), "got {}", rewritten);
        assert!(rewritten.contains(&row("Other", "untouched")));
        assert!(!rewritten.contains("second paragraph"));

        let reloaded = DocxTemplate::from_bytes(&bytes).unwrap();
        assert_eq!(reloaded.tables(), template.tables());
    }

    #[test]
    fn test_rewrite_of_empty_cell_element() {
        let xml = body(&format!(
            "<w:tbl><w:tr>{}<w:tc/></w:tr></w:tbl>",
            cell("Phase")
        ));
        let mut template = DocxTemplate::from_bytes(&package(&xml)).unwrap();
        assert_eq!(template.tables().tables[0].rows[0].value(), Some(""));

        template.as_mut().tables[0].rows[0].cells[1].text = "III".to_string();
        let bytes = template.to_bytes().unwrap();

        let reloaded = DocxTemplate::from_bytes(&bytes).unwrap();
        assert_eq!(reloaded.tables().tables[0].rows[0].value(), Some("III"));
    }

    #[test]
    fn test_rewrite_drops_nested_table_in_replaced_cell() {
        let nested = format!("<w:tbl>{}</w:tbl>", row("n1", "n2"));
        let value_cell = format!("<w:tc><w:p/>{}<w:p/></w:tc>", nested);
        let xml = body(&format!(
            "<w:tbl><w:tr>{}{}</w:tr>{}</w:tbl><w:tbl>{}</w:tbl>",
            cell("Arms"),
            value_cell,
            row("Sites", ""),
            row("Phase", "")
        ));
        let mut template = DocxTemplate::from_bytes(&package(&xml)).unwrap();
        template.as_mut().tables[0].rows[0].cells[1].text = "2".to_string();
        template.as_mut().tables[1].rows[0].cells[1].text = "III".to_string();

        let bytes = template.to_bytes().unwrap();
        let rewritten = part(&bytes, DOCUMENT_PART);
        assert!(!rewritten.contains("n1"));

        let reloaded = DocxTemplate::from_bytes(&bytes).unwrap();
        let tables = &reloaded.tables().tables;
        assert_eq!(tables[0].rows[0].value(), Some("2"));
        assert_eq!(tables[0].rows[1].value(), Some(""));
        assert_eq!(tables[1].rows[0].value(), Some("III"));
    }

    #[test]
    fn test_layout_change_is_rejected() {
        let xml = body(&format!("<w:tbl>{}</w:tbl>", row("Title", "")));
        let mut template = DocxTemplate::from_bytes(&package(&xml)).unwrap();
        template.as_mut().tables[0].rows.push(Row::new(["Extra", "row"]));

        match template.to_bytes().unwrap_err() {
            TemplateFillError::InvalidDocument(reason) => assert!(reason.contains("layout")),
            other => panic!("expected invalid document, got {:?}", other),
        }
    }

    #[test]
    fn test_layout_change_is_save_error_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.docx");
        let xml = body(&format!("<w:tbl>{}</w:tbl>", row("Title", "")));
        let mut template = DocxTemplate::from_bytes(&package(&xml)).unwrap();
        template.as_mut().tables[0].rows.clear();

        let err = DocxStore::new().save_document(&template, &path).unwrap_err();
        assert!(matches!(err, TemplateFillError::Save { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_rewrite_never_writes_characters_forbidden_in_xml() {
        let xml = body(&format!("<w:tbl>{}</w:tbl>", row("Title", "")));
        let mut template = DocxTemplate::from_bytes(&package(&xml)).unwrap();
        template.as_mut().tables[0].rows[0].cells[1].text =
            "line1\u{000B}line2\u{0001}\u{FFFF}end\u{000C}é😀".to_string();

        let bytes = template.to_bytes().unwrap();
        let rewritten = part(&bytes, DOCUMENT_PART);

        assert!(rewritten.contains(concat!(
            r#"<w:t xml:space="preserve">line1</w:t><w:br/>"#,
            r#"<w:t xml:space="preserve">line2end</w:t><w:br/>"#,
            r#"<w:t xml:space="preserve">é😀</w:t>"#
        )));
        assert!(!rewritten
            .chars()
            .any(|c| c != '\t' && c != '\n' && c != '\r' && !is_xml_text_char(c)));

        let reloaded = DocxTemplate::from_bytes(&bytes).unwrap();
        assert_eq!(
            reloaded.tables().tables[0].rows[0].value(),
            Some("line1\nline2end\né😀")
        );
    }

    #[test]
    fn test_content_control_and_text_box_paragraphs_are_not_cell_text() {
        let label = concat!(
            "<w:tc>",
            "<w:p><w:r><w:t>Visit</w:t></w:r>",
            "<w:r><w:pict><w:txbxContent><w:p><w:r><w:t>box</w:t></w:r></w:p>",
            "<w:p/></w:txbxContent></w:pict></w:r>",
            r#"<w:r><w:t xml:space="preserve"> Date</w:t></w:r></w:p>"#,
            "<w:sdt><w:sdtContent><w:p><w:r><w:t>control</w:t></w:r></w:p>",
            "</w:sdtContent></w:sdt>",
            "</w:tc>"
        );
        let xml = body(&format!("<w:tbl><w:tr>{}{}</w:tr></w:tbl>", label, cell("")));

        let template = DocxTemplate::from_bytes(&package(&xml)).unwrap();
        let row = &template.tables().tables[0].rows[0];
        assert_eq!(row.label(), Some("Visit Date"));
        assert_eq!(row.value(), Some(""));
    }

    #[test]
    fn test_cursor_ignores_nested_tables() {
        let mut cursor = TableCursor::default();
        assert_eq!(cursor.open(TBL), Step::OpenTable);
        assert_eq!(cursor.open(TR), Step::OpenRow);
        assert_eq!(
            cursor.open(TC),
            Step::OpenCell(CellPos { table: 0, row: 0, cell: 0 })
        );
        assert!(cursor.in_cell());
        assert_eq!(cursor.open(TBL), Step::Other);
        assert!(!cursor.in_cell());
        assert_eq!(cursor.open(TR), Step::Other);
        assert_eq!(cursor.close(TR), Step::Other);
        assert_eq!(cursor.close(TBL), Step::Other);
        assert!(cursor.in_cell());
        assert_eq!(cursor.close(TC), Step::CloseCell);
        assert_eq!(
            cursor.open(TC),
            Step::OpenCell(CellPos { table: 0, row: 0, cell: 1 })
        );
        assert_eq!(cursor.close(TC), Step::CloseCell);
        assert_eq!(cursor.close(TR), Step::CloseRow);
        assert_eq!(cursor.close(TBL), Step::CloseTable);
        assert_eq!(cursor.open(TBL), Step::OpenTable);
        assert_eq!(cursor.open(TR), Step::OpenRow);
        assert_eq!(
            cursor.open(TC),
            Step::OpenCell(CellPos { table: 1, row: 0, cell: 0 })
        );
    }
}
