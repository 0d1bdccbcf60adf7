//! Cell formats, merged regions and column widths of an `.xls` template.

use std::io::{BufReader, Read, Seek};

use crate::biff::globals::{open_workbook_stream, read_globals, validate_bof};
use crate::biff::records::{
    BiffRecordReader, ByteCursor, RECORD_BLANK, RECORD_BOF, RECORD_BOOLERR, RECORD_COLINFO,
    RECORD_EOF, RECORD_FORMULA, RECORD_LABEL, RECORD_LABELSST, RECORD_MERGEDCELLS,
    RECORD_MULBLANK, RECORD_MULRK, RECORD_NUMBER, RECORD_RK,
};
use crate::conf::N_NCOLS_XLS_MAX;
use crate::error::Result;
use crate::spec::SpecMergedRange;

use super::SpecTemplateLayout;

pub(super) fn read_template_layout<R: Read + Seek>(reader: R) -> Result<SpecTemplateLayout> {
    let file_stream = open_workbook_stream(reader)?;
    let mut records = BiffRecordReader::new(BufReader::new(file_stream));
    let globals = read_globals(&mut records)?;
    let n_offset = globals.select_worksheet(0)?.n_offset;
    records.seek_to(u64::from(n_offset))?;
    validate_bof(records.next_record()?.as_ref(), "template worksheet")?;

    let mut layout = SpecTemplateLayout::default();
    while let Some(record) = records.next_record()? {
        let mut cursor = ByteCursor::new(&record.data);
        match record.record_id {
            RECORD_EOF | RECORD_BOF => break,
            RECORD_BLANK | RECORD_NUMBER | RECORD_RK | RECORD_LABEL | RECORD_LABELSST
            | RECORD_BOOLERR | RECORD_FORMULA => {
                let row_idx = cursor.read_u16()? as usize;
                let col_idx = cursor.read_u16()? as usize;
                let n_xf = cursor.read_u16()?;
                layout.place_format(row_idx, col_idx, globals.derive_cell_format(n_xf));
            }
            RECORD_MULBLANK | RECORD_MULRK => {
                let n_stride = if record.record_id == RECORD_MULRK { 6 } else { 2 };
                let row_idx = cursor.read_u16()? as usize;
                let col_idx_first = cursor.read_u16()? as usize;
                let n_cells = cursor.remaining().saturating_sub(2) / n_stride;
                for n_offset_col in 0..n_cells {
                    let n_xf = cursor.read_u16()?;
                    cursor.take(n_stride - 2)?;
                    layout.place_format(
                        row_idx,
                        col_idx_first + n_offset_col,
                        globals.derive_cell_format(n_xf),
                    );
                }
            }
            RECORD_MERGEDCELLS => {
                let n_ranges = cursor.read_u16()?;
                for _ in 0..n_ranges {
                    layout.merges.push(SpecMergedRange {
                        row_idx_first: cursor.read_u16()? as usize,
                        row_idx_last: cursor.read_u16()? as usize,
                        col_idx_first: cursor.read_u16()? as usize,
                        col_idx_last: cursor.read_u16()? as usize,
                    });
                }
            }
            RECORD_COLINFO => {
                let n_col_first = cursor.read_u16()? as usize;
                let n_col_last = (cursor.read_u16()? as usize).min(N_NCOLS_XLS_MAX - 1);
                let width = f64::from(cursor.read_u16()?) / 256.0;
                for col_idx in n_col_first..=n_col_last {
                    layout.column_widths.insert(col_idx, width);
                }
            }
            _ => {}
        }
    }
    Ok(layout)
}
