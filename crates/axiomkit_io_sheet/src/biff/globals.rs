//! Workbook globals of a BIFF8 stream: sheet directory, shared strings and
//! the FONT/FORMAT/XF/PALETTE tables behind cell formats.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use crate::conf::TUP_NUM_FORMAT_BUILTIN;
use crate::error::{Result, SheetError};
use crate::spec::SpecCellFormat;

use super::records::{
    BOF_VERSION_BIFF8, BiffRecord, BiffRecordReader, ByteCursor, RECORD_BOF, RECORD_BOF_BIFF5,
    RECORD_BOUNDSHEET, RECORD_CONTINUE, RECORD_EOF, RECORD_FONT, RECORD_FORMAT, RECORD_PALETTE,
    RECORD_SST, RECORD_XF,
};
use super::sst::decode_sst;
use super::workbook::{
    C_STREAM_WORKBOOK, N_FONT_BUILTIN_COUNT, N_PALETTE_FIRST_INDEX, N_XF_CELL_DEFAULT,
    TUP_PALETTE_DEFAULT,
};

/// Stream name used by Excel 5/95 era writers.
const C_STREAM_BOOK: &str = "Book";
const N_SHEET_TYPE_WORKSHEET: u8 = 0x00;
const N_FONT_WEIGHT_BOLD: u16 = 700;
const N_FONT_FLAG_ITALIC: u16 = 0x0002;
const N_XF_FLAG_STYLE: u16 = 0x0004;
const N_FILL_PATTERN_SOLID: u32 = 1;
const N_VALIGN_BOTTOM: u8 = 2;

/// One BOUNDSHEET entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SpecBoundSheet {
    pub n_offset: u32,
    pub n_type: u8,
    pub c_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SpecFontRecord {
    pub c_name: String,
    pub n_height: u16,
    pub if_bold: bool,
    pub if_italic: bool,
    pub n_color: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct SpecXfRecord {
    pub n_font: u16,
    pub n_num_format: u16,
    pub if_style: bool,
    pub n_align: u8,
    pub n_border1: u32,
    pub n_border2: u32,
    pub n_fill: u16,
}

/// Globals parsed up to their EOF.
#[derive(Debug, Clone, Default)]
pub(crate) struct SpecBiffGlobals {
    pub l_sheets: Vec<SpecBoundSheet>,
    pub l_shared_strings: Vec<String>,
    pub l_fonts: Vec<SpecFontRecord>,
    pub dict_num_formats: HashMap<u16, String>,
    pub l_xfs: Vec<SpecXfRecord>,
    pub l_palette: Option<Vec<u32>>,
}

////////////////////////////////////////////////////////////////////////////////
// #region StreamAccess

/// Copy the workbook stream out of the compound file into a temp file.
pub(crate) fn open_workbook_stream<R: Read + Seek>(reader: R) -> Result<File> {
    let mut compound = cfb::CompoundFile::open(reader)?;
    let c_stream = [C_STREAM_WORKBOOK, C_STREAM_BOOK]
        .into_iter()
        .find(|c_name| compound.is_stream(c_name))
        .ok_or_else(|| SheetError::codec("compound file holds no Workbook stream"))?;

    let mut file_spool = tempfile::tempfile()?;
    {
        let mut stream = compound.open_stream(c_stream)?;
        std::io::copy(&mut stream, &mut file_spool)?;
    }
    file_spool.seek(SeekFrom::Start(0))?;
    Ok(file_spool)
}

pub(crate) fn validate_bof(record: Option<&BiffRecord>, c_context: &str) -> Result<()> {
    let Some(record) = record else {
        return Err(SheetError::codec(format!("{c_context}: stream is empty")));
    };
    if record.record_id == RECORD_BOF_BIFF5 {
        return Err(SheetError::codec(format!(
            "{c_context}: pre-BIFF8 workbooks are not supported"
        )));
    }
    if record.record_id != RECORD_BOF {
        return Err(SheetError::codec(format!(
            "{c_context}: expected BOF, found record 0x{:04X}",
            record.record_id
        )));
    }
    let n_version = ByteCursor::new(&record.data).read_u16()?;
    if n_version != BOF_VERSION_BIFF8 {
        return Err(SheetError::codec(format!(
            "{c_context}: BIFF version 0x{n_version:04X} is not supported, only BIFF8"
        )));
    }
    Ok(())
}

/// Parse globals up to their EOF.
pub(crate) fn read_globals<R: Read>(records: &mut BiffRecordReader<R>) -> Result<SpecBiffGlobals> {
    validate_bof(records.next_record()?.as_ref(), "workbook globals")?;

    let mut globals = SpecBiffGlobals::default();
    let mut l_sst_fragments: Vec<Vec<u8>> = Vec::new();
    let mut if_in_sst = false;
    while let Some(record) = records.next_record()? {
        if record.record_id == RECORD_CONTINUE && if_in_sst {
            l_sst_fragments.push(record.data);
            continue;
        }
        if_in_sst = false;
        let mut cursor = ByteCursor::new(&record.data);
        match record.record_id {
            RECORD_EOF => break,
            RECORD_BOUNDSHEET => {
                let n_offset = cursor.read_u32()?;
                let _n_state = cursor.read_u8()?;
                let n_type = cursor.read_u8()?;
                let c_name = cursor.read_short_unicode_string()?;
                globals.l_sheets.push(SpecBoundSheet {
                    n_offset,
                    n_type,
                    c_name,
                });
            }
            RECORD_SST => {
                l_sst_fragments.clear();
                l_sst_fragments.push(record.data);
                if_in_sst = true;
            }
            RECORD_FONT => {
                let n_height = cursor.read_u16()?;
                let n_flags = cursor.read_u16()?;
                let n_color = cursor.read_u16()?;
                let n_weight = cursor.read_u16()?;
                cursor.take(6)?; // escapement, underline, family, charset, reserved
                let c_name = cursor.read_short_unicode_string()?;
                globals.l_fonts.push(SpecFontRecord {
                    c_name,
                    n_height,
                    if_bold: n_weight >= N_FONT_WEIGHT_BOLD,
                    if_italic: n_flags & N_FONT_FLAG_ITALIC != 0,
                    n_color,
                });
            }
            RECORD_FORMAT => {
                let n_id = cursor.read_u16()?;
                let c_code = cursor.read_unicode_string()?;
                globals.dict_num_formats.insert(n_id, c_code);
            }
            RECORD_XF => {
                let n_font = cursor.read_u16()?;
                let n_num_format = cursor.read_u16()?;
                let n_flags = cursor.read_u16()?;
                let n_align = cursor.read_u8()?;
                cursor.take(3)?; // rotation, indent, used attributes
                let n_border1 = cursor.read_u32()?;
                let n_border2 = cursor.read_u32()?;
                let n_fill = cursor.read_u16()?;
                globals.l_xfs.push(SpecXfRecord {
                    n_font,
                    n_num_format,
                    if_style: n_flags & N_XF_FLAG_STYLE != 0,
                    n_align,
                    n_border1,
                    n_border2,
                    n_fill,
                });
            }
            RECORD_PALETTE => {
                let n_colors = cursor.read_u16()? as usize;
                let mut l_colors = Vec::with_capacity(n_colors);
                for _ in 0..n_colors {
                    let v_rgb = cursor.take(4)?;
                    l_colors.push(
                        (u32::from(v_rgb[0]) << 16) | (u32::from(v_rgb[1]) << 8) | u32::from(v_rgb[2]),
                    );
                }
                globals.l_palette = Some(l_colors);
            }
            _ => {}
        }
    }

    if !l_sst_fragments.is_empty() {
        globals.l_shared_strings = decode_sst(&l_sst_fragments)?;
    }
    Ok(globals)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CellFormats

impl SpecBiffGlobals {
    /// Worksheet entry at `n_idx_sheet`; chart and macro sheets are skipped.
    pub(crate) fn select_worksheet(&self, n_idx_sheet: usize) -> Result<&SpecBoundSheet> {
        let l_worksheets: Vec<&SpecBoundSheet> = self
            .l_sheets
            .iter()
            .filter(|sheet| sheet.n_type == N_SHEET_TYPE_WORKSHEET)
            .collect();
        l_worksheets.get(n_idx_sheet).copied().ok_or_else(|| {
            SheetError::codec(format!(
                "sheet index {n_idx_sheet} out of range ({} sheet(s))",
                l_worksheets.len()
            ))
        })
    }

    /// Format of cell XF `n_xf`; `None` when it matches the sheet default.
    pub(crate) fn derive_cell_format(&self, n_xf: u16) -> Option<SpecCellFormat> {
        if n_xf == N_XF_CELL_DEFAULT {
            return None;
        }
        let xf = self.l_xfs.get(n_xf as usize)?;
        if xf.if_style {
            return None;
        }

        let mut format = SpecCellFormat::default();
        self.apply_font(&mut format, xf.n_font);
        format.num_format = self.derive_num_format(xf.n_num_format);

        let n_align_h = xf.n_align & 0x07;
        let n_align_v = (xf.n_align >> 4) & 0x07;
        format.align = derive_align_name(n_align_h).map(str::to_string);
        if n_align_v != N_VALIGN_BOTTOM {
            format.valign = derive_valign_name(n_align_v).map(str::to_string);
        }
        if xf.n_align & 0x08 != 0 {
            format.text_wrap = Some(true);
        }

        let n_left = (xf.n_border1 & 0x0F) as i64;
        let n_right = ((xf.n_border1 >> 4) & 0x0F) as i64;
        let n_top = ((xf.n_border1 >> 8) & 0x0F) as i64;
        let n_bottom = ((xf.n_border1 >> 12) & 0x0F) as i64;
        assign_border_sides(&mut format, [n_top, n_bottom, n_left, n_right]);

        if (xf.n_border2 >> 26) & 0x3F == N_FILL_PATTERN_SOLID {
            format.bg_color = self.derive_color(xf.n_fill & 0x7F);
        }

        (format != SpecCellFormat::default()).then_some(format)
    }

    fn apply_font(&self, format: &mut SpecCellFormat, n_font: u16) {
        // Index 4 is never stored, so later fonts shift down by one.
        let n_idx = if n_font >= N_FONT_BUILTIN_COUNT {
            n_font - 1
        } else {
            n_font
        };
        let (Some(font_default), Some(font)) =
            (self.l_fonts.first(), self.l_fonts.get(n_idx as usize))
        else {
            return;
        };
        if font.c_name != font_default.c_name {
            format.font_name = Some(font.c_name.clone());
        }
        if font.n_height != font_default.n_height {
            format.font_size = Some(i64::from((font.n_height + 10) / 20));
        }
        if font.if_bold {
            format.bold = Some(true);
        }
        if font.if_italic {
            format.italic = Some(true);
        }
        format.font_color = self.derive_color(font.n_color);
    }

    fn derive_num_format(&self, n_id: u16) -> Option<String> {
        if n_id == 0 {
            return None;
        }
        self.dict_num_formats.get(&n_id).cloned().or_else(|| {
            TUP_NUM_FORMAT_BUILTIN
                .iter()
                .find(|(_, n)| *n == n_id)
                .map(|(c_code, _)| c_code.to_string())
        })
    }

    /// `#RRGGBB` for a palette index; system and automatic colors yield `None`.
    fn derive_color(&self, n_icv: u16) -> Option<String> {
        let n_rgb = if n_icv < N_PALETTE_FIRST_INDEX {
            *TUP_PALETTE_DEFAULT.get(n_icv as usize)?
        } else {
            let n_slot = (n_icv - N_PALETTE_FIRST_INDEX) as usize;
            match &self.l_palette {
                Some(l_colors) => *l_colors.get(n_slot)?,
                None => *TUP_PALETTE_DEFAULT.get(n_slot)?,
            }
        };
        Some(format!("#{n_rgb:06X}"))
    }
}

fn derive_align_name(n_code: u8) -> Option<&'static str> {
    match n_code {
        1 => Some("left"),
        2 => Some("center"),
        3 => Some("right"),
        4 => Some("fill"),
        5 => Some("justify"),
        6 => Some("center_across"),
        7 => Some("distributed"),
        _ => None,
    }
}

fn derive_valign_name(n_code: u8) -> Option<&'static str> {
    match n_code {
        0 => Some("top"),
        1 => Some("vcenter"),
        3 => Some("vjustify"),
        4 => Some("vdistributed"),
        _ => None,
    }
}

/// Fold per-side border styles (`top`, `bottom`, `left`, `right`) into a format.
pub(crate) fn assign_border_sides(format: &mut SpecCellFormat, sides: [i64; 4]) {
    let [n_top, n_bottom, n_left, n_right] = sides;
    if sides.iter().all(|n| *n == n_top) {
        if n_top != 0 {
            format.border = Some(n_top);
        }
        return;
    }
    let derive_side = |n: i64| (n != 0).then_some(n);
    format.top = derive_side(n_top);
    format.bottom = derive_side(n_bottom);
    format.left = derive_side(n_left);
    format.right = derive_side(n_right);
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
