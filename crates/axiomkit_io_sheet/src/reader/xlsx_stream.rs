//! Streaming traversal of `.xlsx` worksheets with a pull XML parser.
//!
//! The selected worksheet part is spooled into an anonymous temp file and
//! parsed event by event; only the shared string table is held in memory.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use zip::ZipArchive;

use crate::error::{Result, SheetError};
use crate::package::{
    C_PART_SHARED_STRINGS, C_REL_TYPE_SHARED_STRINGS_SUFFIX, read_attribute,
    read_zip_part_optional, resolve_part_by_type, resolve_sheet_part,
};
use crate::util::parse_cell_reference;
use crate::value::render_number;

use super::{RowSource, SpecSheetRow};

////////////////////////////////////////////////////////////////////////////////
// #region SharedStrings

/// Plain text of every `<si>` entry; phonetic runs are skipped.
fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut l_strings = Vec::new();
    let mut c_current = String::new();
    let mut if_in_t = false;
    let mut n_depth_phonetic = 0usize;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => c_current.clear(),
                b"t" => if_in_t = true,
                b"rPh" => n_depth_phonetic += 1,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => l_strings.push(String::new()),
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => l_strings.push(std::mem::take(&mut c_current)),
                b"t" => if_in_t = false,
                b"rPh" => n_depth_phonetic = n_depth_phonetic.saturating_sub(1),
                _ => {}
            },
            Event::Text(e) if if_in_t && n_depth_phonetic == 0 => {
                c_current.push_str(&e.unescape()?);
            }
            Event::CData(e) if if_in_t && n_depth_phonetic == 0 => {
                c_current.push_str(&String::from_utf8_lossy(&e));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(l_strings)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RowSource

#[derive(Debug, Default)]
struct SpecPendingCell {
    col_idx: usize,
    c_type: Option<String>,
    c_value: String,
    if_has_value: bool,
}

/// Forward-only row source over one `.xlsx` worksheet; sheets resolve by index.
pub struct XlsxStreamRowSource {
    reader: Reader<BufReader<File>>,
    buf: Vec<u8>,
    l_shared_strings: Vec<String>,
    n_row_current: Option<usize>,
    n_row_last: Option<usize>,
    n_col_last: Option<usize>,
    cells: BTreeMap<usize, String>,
    cell: Option<SpecPendingCell>,
    if_in_value: bool,
    if_done: bool,
}

impl XlsxStreamRowSource {
    /// Open the `n_idx_sheet`-th worksheet of the package.
    pub fn open<R: Read + Seek>(reader: R, n_idx_sheet: usize) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;

        let (c_part_sheet, dict_rels) = resolve_sheet_part(&mut archive, n_idx_sheet)?;
        let c_part_strings = resolve_part_by_type(
            &dict_rels,
            C_REL_TYPE_SHARED_STRINGS_SUFFIX,
            C_PART_SHARED_STRINGS,
        );
        let l_shared_strings = match read_zip_part_optional(&mut archive, &c_part_strings)? {
            Some(v_xml) => parse_shared_strings(&v_xml)?,
            None => Vec::new(),
        };

        let mut file_spool = tempfile::tempfile()?;
        {
            let mut part = archive.by_name(&c_part_sheet)?;
            std::io::copy(&mut part, &mut file_spool)?;
        }
        file_spool.seek(SeekFrom::Start(0))?;

        log::debug!(
            "Streaming worksheet part {c_part_sheet} ({} shared string(s)).",
            l_shared_strings.len()
        );
        Ok(Self {
            reader: Reader::from_reader(BufReader::new(file_spool)),
            buf: Vec::new(),
            l_shared_strings,
            n_row_current: None,
            n_row_last: None,
            n_col_last: None,
            cells: BTreeMap::new(),
            cell: None,
            if_in_value: false,
            if_done: false,
        })
    }

    fn begin_row(&mut self, e: &BytesStart<'_>) -> Result<()> {
        let n_row = match read_attribute(e, b"r")? {
            Some(c_row) => c_row
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .ok_or_else(|| SheetError::codec(format!("invalid row number {c_row:?}")))?,
            None => self.n_row_last.map_or(0, |n| n + 1),
        };
        self.n_row_current = Some(n_row);
        self.n_col_last = None;
        self.cells.clear();
        Ok(())
    }

    fn begin_cell(&mut self, e: &BytesStart<'_>) -> Result<()> {
        let col_idx = match read_attribute(e, b"r")? {
            Some(c_ref) => parse_cell_reference(&c_ref)
                .map(|(_, col_idx)| col_idx)
                .ok_or_else(|| SheetError::codec(format!("invalid cell reference {c_ref:?}")))?,
            None => self.n_col_last.map_or(0, |n| n + 1),
        };
        self.n_col_last = Some(col_idx);
        self.cell = Some(SpecPendingCell {
            col_idx,
            c_type: read_attribute(e, b"t")?,
            ..Default::default()
        });
        Ok(())
    }

    fn end_cell(&mut self) -> Result<()> {
        let Some(cell) = self.cell.take() else {
            return Ok(());
        };
        if !cell.if_has_value {
            return Ok(());
        }
        if let Some(c_text) = self.render_cell(&cell)?
            && !c_text.is_empty()
        {
            self.cells.insert(cell.col_idx, c_text);
        }
        Ok(())
    }

    fn render_cell(&self, cell: &SpecPendingCell) -> Result<Option<String>> {
        let c_value = cell.c_value.as_str();
        let c_text = match cell.c_type.as_deref() {
            Some("s") => {
                let n_idx = c_value.trim().parse::<usize>().map_err(|_| {
                    SheetError::codec(format!("invalid shared string index {c_value:?}"))
                })?;
                let c_shared = self.l_shared_strings.get(n_idx).ok_or_else(|| {
                    SheetError::codec(format!("shared string index {n_idx} out of range"))
                })?;
                Some(c_shared.clone())
            }
            Some("b") => Some((c_value.trim() == "1").to_string()),
            Some("e") => None,
            Some("inlineStr") | Some("str") | Some("d") => Some(c_value.to_string()),
            _ => match c_value.trim().parse::<f64>() {
                Ok(n) => Some(render_number(n)),
                Err(_) => Some(c_value.to_string()),
            },
        };
        Ok(c_text)
    }

    fn end_row(&mut self) -> Option<SpecSheetRow> {
        let n_row = self.n_row_current.take()?;
        self.n_row_last = Some(n_row);
        if self.cells.is_empty() {
            return None;
        }
        Some(SpecSheetRow {
            row_index: n_row,
            cells: std::mem::take(&mut self.cells),
        })
    }
}

impl RowSource for XlsxStreamRowSource {
    fn next_row(&mut self) -> Result<Option<SpecSheetRow>> {
        if self.if_done {
            return Ok(None);
        }
        loop {
            self.buf.clear();
            let event = self.reader.read_event_into(&mut self.buf)?.into_owned();
            match event {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"row" => self.begin_row(&e)?,
                    b"c" => self.begin_cell(&e)?,
                    b"v" | b"t" if self.cell.is_some() => self.if_in_value = true,
                    _ => {}
                },
                Event::Empty(e) => match e.local_name().as_ref() {
                    b"row" => {
                        self.begin_row(&e)?;
                        self.end_row();
                    }
                    b"c" => {
                        self.begin_cell(&e)?;
                        self.end_cell()?;
                    }
                    _ => {}
                },
                Event::Text(e) if self.if_in_value => {
                    if let Some(cell) = self.cell.as_mut() {
                        cell.c_value.push_str(&e.unescape()?);
                        cell.if_has_value = true;
                    }
                }
                Event::CData(e) if self.if_in_value => {
                    if let Some(cell) = self.cell.as_mut() {
                        cell.c_value.push_str(&String::from_utf8_lossy(&e));
                        cell.if_has_value = true;
                    }
                }
                Event::End(e) => match e.local_name().as_ref() {
                    b"v" | b"t" => self.if_in_value = false,
                    b"c" => self.end_cell()?,
                    b"row" => {
                        if let Some(row) = self.end_row() {
                            return Ok(Some(row));
                        }
                    }
                    b"sheetData" => {
                        self.if_done = true;
                        return Ok(None);
                    }
                    _ => {}
                },
                Event::Eof => {
                    self.if_done = true;
                    return Ok(None);
                }
                _ => {}
            }
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::package::{C_PART_WORKBOOK, C_PART_WORKBOOK_RELS};

    fn derive_package(sheet_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        let l_parts = [
            (
                C_PART_WORKBOOK,
                r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="A" sheetId="1" r:id="rId1"/><sheet name="B" sheetId="2" r:id="rId2"/></sheets></workbook>"#,
            ),
            (
                C_PART_WORKBOOK_RELS,
                r#"<Relationships><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="/xl/worksheets/sheet2.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/></Relationships>"#,
            ),
            (
                C_PART_SHARED_STRINGS,
                r#"<sst><si><t>id</t></si><si><r><t>ri</t></r><r><t>ch</t></r><rPh><t>x</t></rPh></si><si><t></t></si></sst>"#,
            ),
            ("xl/worksheets/sheet1.xml", sheet_xml),
            (
                "xl/worksheets/sheet2.xml",
                r#"<worksheet><sheetData><row r="1"><c r="A1"><v>9</v></c></row></sheetData></worksheet>"#,
            ),
        ];
        for (c_name, c_xml) in l_parts {
            writer.start_file(c_name, options).expect("start");
            writer.write_all(c_xml.as_bytes()).expect("write");
        }
        writer.finish().expect("finish").into_inner()
    }

    #[test]
    fn streams_rows_with_typed_cells() {
        let v_package = derive_package(
            r#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
            <row r="3"><c r="A3"><v>20.0</v></c><c r="B3" t="b"><v>1</v></c><c r="C3" t="e"><v>#N/A</v></c><c r="D3" t="inlineStr"><is><t>in &amp; out</t></is></c></row>
            <row r="4"><c r="A4" t="s"><v>2</v></c><c r="B4" s="1"/></row>
            </sheetData></worksheet>"#,
        );
        let mut source = XlsxStreamRowSource::open(Cursor::new(v_package), 0).expect("open");

        let row = source.next_row().expect("row").expect("some");
        assert_eq!(row.row_index, 0);
        assert_eq!(row.cells.get(&1).map(String::as_str), Some("rich"));

        let row = source.next_row().expect("row").expect("some");
        assert_eq!(row.row_index, 2);
        assert_eq!(row.cells.get(&0).map(String::as_str), Some("20"));
        assert_eq!(row.cells.get(&1).map(String::as_str), Some("true"));
        assert!(!row.cells.contains_key(&2));
        assert_eq!(row.cells.get(&3).map(String::as_str), Some("in & out"));

        // Row 4 holds only an empty string and a styled blank.
        assert!(source.next_row().expect("end").is_none());
    }

    #[test]
    fn selects_sheet_by_index_through_relationships() {
        let v_package = derive_package("<worksheet><sheetData/></worksheet>");
        let mut source =
            XlsxStreamRowSource::open(Cursor::new(v_package.clone()), 1).expect("open");
        let row = source.next_row().expect("row").expect("some");
        assert_eq!(row.cells.get(&0).map(String::as_str), Some("9"));

        assert!(XlsxStreamRowSource::open(Cursor::new(v_package), 2).is_err());
    }
}
