//! Streaming traversal of `.xls` worksheets over raw BIFF8 records.
//!
//! The workbook stream is copied out of the compound file into an anonymous
//! temp file; globals are parsed once and cell records of the selected sheet
//! are then pulled one record at a time.

use std::fs::File;
use std::io::{BufReader, Read, Seek};

use crate::biff::globals::{open_workbook_stream, read_globals, validate_bof};
use crate::biff::records::{
    BiffRecord, BiffRecordReader, ByteCursor, RECORD_BOF, RECORD_BOOLERR, RECORD_EOF,
    RECORD_FORMULA, RECORD_LABEL, RECORD_LABELSST, RECORD_MULRK, RECORD_NUMBER, RECORD_RK,
    RECORD_STRING, decode_rk,
};
use crate::error::{Result, SheetError};
use crate::value::render_number;

use super::{RowSource, SpecSheetRow};

const N_FORMULA_RESULT_SPECIAL: u16 = 0xFFFF;

type CellUpdate = (usize, usize, Option<String>);

/// Forward-only row source over one `.xls` worksheet; sheets resolve by index.
pub struct BiffStreamRowSource {
    records: BiffRecordReader<BufReader<File>>,
    l_shared_strings: Vec<String>,
    current: Option<SpecSheetRow>,
    formula_pending: Option<(usize, usize)>,
    if_done: bool,
}

impl BiffStreamRowSource {
    /// Open the `n_idx_sheet`-th worksheet of a BIFF8 workbook.
    pub fn open<R: Read + Seek>(reader: R, n_idx_sheet: usize) -> Result<Self> {
        let file_stream = open_workbook_stream(reader)?;
        let mut records = BiffRecordReader::new(BufReader::new(file_stream));
        let globals = read_globals(&mut records)?;
        let sheet = globals.select_worksheet(n_idx_sheet)?;

        records.seek_to(u64::from(sheet.n_offset))?;
        validate_bof(records.next_record()?.as_ref(), "worksheet")?;
        log::debug!(
            "Streaming legacy sheet {:?} at offset {} ({} shared string(s)).",
            sheet.c_name,
            sheet.n_offset,
            globals.l_shared_strings.len()
        );

        Ok(Self {
            records,
            l_shared_strings: globals.l_shared_strings,
            current: None,
            formula_pending: None,
            if_done: false,
        })
    }

    fn take_current(&mut self) -> Option<SpecSheetRow> {
        self.current.take().filter(|row| !row.cells.is_empty())
    }

    /// Place one cell; returns the previous row when the row number changes.
    fn place_cell(
        &mut self,
        row_idx: usize,
        col_idx: usize,
        text: Option<String>,
    ) -> Option<SpecSheetRow> {
        let if_same_row = self
            .current
            .as_ref()
            .is_some_and(|row| row.row_index == row_idx);
        let row_done = if if_same_row {
            None
        } else {
            self.current
                .replace(SpecSheetRow {
                    row_index: row_idx,
                    ..Default::default()
                })
                .filter(|row| !row.cells.is_empty())
        };
        if let (Some(c_text), Some(row)) = (text, self.current.as_mut())
            && !c_text.is_empty()
        {
            row.cells.insert(col_idx, c_text);
        }
        row_done
    }

    fn decode_cells(&mut self, record: &BiffRecord) -> Result<Vec<CellUpdate>> {
        let formula_pending = self.formula_pending.take();
        let mut cursor = ByteCursor::new(&record.data);
        let l_cells = match record.record_id {
            RECORD_NUMBER => {
                let (row_idx, col_idx) = read_cell_header(&mut cursor)?;
                vec![(row_idx, col_idx, Some(render_number(cursor.read_f64()?)))]
            }
            RECORD_RK => {
                let (row_idx, col_idx) = read_cell_header(&mut cursor)?;
                let n = decode_rk(cursor.read_u32()?);
                vec![(row_idx, col_idx, Some(render_number(n)))]
            }
            RECORD_MULRK => {
                let row_idx = cursor.read_u16()? as usize;
                let col_idx_first = cursor.read_u16()? as usize;
                let n_cells = cursor.remaining().saturating_sub(2) / 6;
                let mut l_cells = Vec::with_capacity(n_cells);
                for n_offset in 0..n_cells {
                    let _n_xf = cursor.read_u16()?;
                    let n = decode_rk(cursor.read_u32()?);
                    l_cells.push((row_idx, col_idx_first + n_offset, Some(render_number(n))));
                }
                l_cells
            }
            RECORD_LABEL => {
                let (row_idx, col_idx) = read_cell_header(&mut cursor)?;
                vec![(row_idx, col_idx, Some(cursor.read_unicode_string()?))]
            }
            RECORD_LABELSST => {
                let (row_idx, col_idx) = read_cell_header(&mut cursor)?;
                let n_idx = cursor.read_u32()? as usize;
                let c_text = self.l_shared_strings.get(n_idx).cloned().ok_or_else(|| {
                    SheetError::codec(format!("shared string index {n_idx} out of range"))
                })?;
                vec![(row_idx, col_idx, Some(c_text))]
            }
            RECORD_BOOLERR => {
                let (row_idx, col_idx) = read_cell_header(&mut cursor)?;
                let n_value = cursor.read_u8()?;
                let if_error = cursor.read_u8()? != 0;
                let text = (!if_error).then(|| (n_value != 0).to_string());
                vec![(row_idx, col_idx, text)]
            }
            RECORD_FORMULA => {
                let (row_idx, col_idx) = read_cell_header(&mut cursor)?;
                let v_result = cursor.take(8)?;
                let n_marker = u16::from_le_bytes([v_result[6], v_result[7]]);
                if n_marker != N_FORMULA_RESULT_SPECIAL {
                    let mut v_arr = [0u8; 8];
                    v_arr.copy_from_slice(v_result);
                    vec![(row_idx, col_idx, Some(render_number(f64::from_le_bytes(v_arr))))]
                } else {
                    match v_result[0] {
                        // String result follows in a STRING record.
                        0x00 => {
                            self.formula_pending = Some((row_idx, col_idx));
                            Vec::new()
                        }
                        0x01 => vec![(row_idx, col_idx, Some((v_result[2] != 0).to_string()))],
                        _ => Vec::new(),
                    }
                }
            }
            RECORD_STRING => match formula_pending {
                Some((row_idx, col_idx)) => {
                    vec![(row_idx, col_idx, Some(cursor.read_unicode_string()?))]
                }
                None => Vec::new(),
            },
            _ => Vec::new(),
        };
        Ok(l_cells)
    }
}

fn read_cell_header(cursor: &mut ByteCursor<'_>) -> Result<(usize, usize)> {
    let row_idx = cursor.read_u16()? as usize;
    let col_idx = cursor.read_u16()? as usize;
    let _n_xf = cursor.read_u16()?;
    Ok((row_idx, col_idx))
}

impl RowSource for BiffStreamRowSource {
    fn next_row(&mut self) -> Result<Option<SpecSheetRow>> {
        while !self.if_done {
            let Some(record) = self.records.next_record()? else {
                self.if_done = true;
                break;
            };
            if record.record_id == RECORD_EOF || record.record_id == RECORD_BOF {
                self.if_done = true;
                break;
            }
            let mut row_done = None;
            for (row_idx, col_idx, text) in self.decode_cells(&record)? {
                if let Some(row) = self.place_cell(row_idx, col_idx, text) {
                    row_done = Some(row);
                }
            }
            if row_done.is_some() {
                return Ok(row_done);
            }
        }
        Ok(self.take_current())
    }
}
