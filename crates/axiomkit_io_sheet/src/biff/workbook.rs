//! Single-sheet BIFF8 workbook serializer.
//!
//! Cells are buffered sparsely and emitted in row-major order when the
//! workbook is serialized into a `Workbook` stream of an OLE compound file.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Write};

use crate::conf::{
    N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_XLS_MAX, N_NROWS_XLS_MAX, TUP_NUM_FORMAT_BUILTIN,
};
use crate::error::{Result, SheetError};
use crate::spec::{SpecCellFormat, SpecMergedRange};
use crate::style::StyleId;

use super::records::{
    BOF_DT_WORKBOOK_GLOBALS, BOF_DT_WORKSHEET, RECORD_BLANK, RECORD_BOF, RECORD_BOUNDSHEET,
    RECORD_CODEPAGE, RECORD_COLINFO, RECORD_DIMENSIONS, RECORD_EOF, RECORD_FONT, RECORD_FORMAT,
    RECORD_LABELSST, RECORD_MERGEDCELLS, RECORD_NUMBER, RECORD_PALETTE, RECORD_STYLE,
    RECORD_WINDOW1, RECORD_WINDOW2, RECORD_XF, encode_bof, push_record,
    write_short_unicode_string, write_unicode_string,
};
use super::sst::encode_sst;

/// Stream name Excel 97+ readers look for first.
pub(crate) const C_STREAM_WORKBOOK: &str = "Workbook";

const N_CODEPAGE_UTF16: u16 = 1200;
const N_XF_STYLE_COUNT: u16 = 15;
pub(crate) const N_XF_CELL_DEFAULT: u16 = 15;
const N_XF_CELL_FIRST_CUSTOM: u16 = 16;
pub(crate) const N_FONT_BUILTIN_COUNT: u16 = 4;
const N_FORMAT_ID_FIRST_CUSTOM: u16 = 164;
const N_MERGED_PER_RECORD_MAX: usize = 1_027;

const ICV_AUTOMATIC_FONT: u16 = 0x7FFF;
pub(crate) const ICV_SYSTEM_FOREGROUND: u16 = 0x40;
const ICV_SYSTEM_BACKGROUND: u16 = 0x41;

const C_FONT_NAME_DEFAULT: &str = "Arial";
const N_FONT_HEIGHT_DEFAULT: u16 = 200;

/// Built-in colors of palette slots 8..=63.
pub(crate) const TUP_PALETTE_DEFAULT: [u32; 56] = [
    0x000000, 0xFFFFFF, 0xFF0000, 0x00FF00, 0x0000FF, 0xFFFF00, 0xFF00FF, 0x00FFFF, 0x800000,
    0x008000, 0x000080, 0x808000, 0x800080, 0x008080, 0xC0C0C0, 0x808080, 0x9999FF, 0x993366,
    0xFFFFCC, 0xCCFFFF, 0x660066, 0xFF8080, 0x0066CC, 0xCCCCFF, 0x000080, 0xFF00FF, 0xFFFF00,
    0x00FFFF, 0x800080, 0x800000, 0x008080, 0x0000FF, 0x00CCFF, 0xCCFFFF, 0xCCFFCC, 0xFFFF99,
    0x99CCFF, 0xFF99CC, 0xCC99FF, 0xFFCC99, 0x3366FF, 0x33CCCC, 0x99CC00, 0xFFCC00, 0xFF9900,
    0xFF6600, 0x666699, 0x969696, 0x003366, 0x339966, 0x003300, 0x333300, 0x993300, 0x993366,
    0x333399, 0x333333,
];
pub(crate) const N_PALETTE_FIRST_INDEX: u16 = 8;

#[derive(Debug, Clone, PartialEq)]
enum EnumBiffCell {
    Blank,
    Number(f64),
    Shared(u32),
}

#[derive(Debug, Clone, PartialEq)]
struct SpecBiffCell {
    value: EnumBiffCell,
    style: Option<StyleId>,
}

/// In-memory single-sheet workbook.
#[derive(Debug, Clone)]
pub struct BiffWorkbook {
    c_sheet_name: String,
    dict_cells: BTreeMap<(u16, u16), SpecBiffCell>,
    l_strings: Vec<String>,
    dict_idx_by_string: HashMap<String, u32>,
    l_merged: Vec<[u16; 4]>,
    dict_width_by_col: BTreeMap<u16, f64>,
}

impl BiffWorkbook {
    /// Empty workbook holding one sheet named `sheet_name`.
    pub fn new(sheet_name: &str) -> Result<Self> {
        let n_len = sheet_name.chars().count();
        if n_len == 0 || n_len > N_LEN_EXCEL_SHEET_NAME_MAX {
            return Err(SheetError::codec(format!(
                "invalid sheet name {sheet_name:?}: length must be 1..={N_LEN_EXCEL_SHEET_NAME_MAX}"
            )));
        }
        Ok(Self {
            c_sheet_name: sheet_name.to_string(),
            dict_cells: BTreeMap::new(),
            l_strings: Vec::new(),
            dict_idx_by_string: HashMap::new(),
            l_merged: Vec::new(),
            dict_width_by_col: BTreeMap::new(),
        })
    }

    /// Put a formatted empty cell.
    pub fn put_blank(
        &mut self,
        row_idx: usize,
        col_idx: usize,
        style: Option<StyleId>,
    ) -> Result<()> {
        self.put_cell(row_idx, col_idx, EnumBiffCell::Blank, style)
    }

    /// Put a numeric cell.
    pub fn put_number(
        &mut self,
        row_idx: usize,
        col_idx: usize,
        value: f64,
        style: Option<StyleId>,
    ) -> Result<()> {
        self.put_cell(row_idx, col_idx, EnumBiffCell::Number(value), style)
    }

    /// Put a text cell backed by the shared string table.
    pub fn put_string(
        &mut self,
        row_idx: usize,
        col_idx: usize,
        text: &str,
        style: Option<StyleId>,
    ) -> Result<()> {
        let n_idx_sst = match self.dict_idx_by_string.get(text) {
            Some(n_idx) => *n_idx,
            None => {
                let n_idx = u32::try_from(self.l_strings.len())
                    .map_err(|_| SheetError::codec("shared string table too large"))?;
                self.l_strings.push(text.to_string());
                self.dict_idx_by_string.insert(text.to_string(), n_idx);
                n_idx
            }
        };
        self.put_cell(row_idx, col_idx, EnumBiffCell::Shared(n_idx_sst), style)
    }

    /// Record a merged rectangle.
    pub fn add_merged_range(&mut self, range: &SpecMergedRange) -> Result<()> {
        let (n_row_first, n_col_first) = cast_biff_cell(range.row_idx_first, range.col_idx_first)?;
        let (n_row_last, n_col_last) = cast_biff_cell(range.row_idx_last, range.col_idx_last)?;
        self.l_merged
            .push([n_row_first, n_row_last, n_col_first, n_col_last]);
        Ok(())
    }

    /// Set a column width in character units.
    pub fn set_column_width(&mut self, col_idx: usize, width: f64) -> Result<()> {
        let (_, n_col) = cast_biff_cell(0, col_idx)?;
        self.dict_width_by_col.insert(n_col, width);
        Ok(())
    }

    fn put_cell(
        &mut self,
        row_idx: usize,
        col_idx: usize,
        value: EnumBiffCell,
        style: Option<StyleId>,
    ) -> Result<()> {
        let key = cast_biff_cell(row_idx, col_idx)?;
        self.dict_cells.insert(key, SpecBiffCell { value, style });
        Ok(())
    }

    /// Serialize into an OLE compound file; `formats[i]` backs `StyleId` `i`.
    pub fn serialize(&self, formats: &[SpecCellFormat]) -> Result<Vec<u8>> {
        let v_stream = self.encode_workbook_stream(formats)?;

        // Version 3 keeps 512-byte sectors, which legacy readers require.
        let mut compound =
            cfb::CompoundFile::create_with_version(cfb::Version::V3, Cursor::new(Vec::new()))?;
        {
            let mut stream = compound.create_stream(C_STREAM_WORKBOOK)?;
            stream.write_all(&v_stream)?;
            stream.flush()?;
        }
        Ok(compound.into_inner().into_inner())
    }

    fn encode_workbook_stream(&self, formats: &[SpecCellFormat]) -> Result<Vec<u8>> {
        let tables = BiffStyleTables::plan(formats);

        let mut globals = Vec::new();
        push_record(&mut globals, RECORD_BOF, &encode_bof(BOF_DT_WORKBOOK_GLOBALS))?;
        push_record(&mut globals, RECORD_CODEPAGE, &N_CODEPAGE_UTF16.to_le_bytes())?;
        push_record(&mut globals, RECORD_WINDOW1, &encode_window1())?;

        let font_default = SpecBiffFont::default();
        for _ in 0..N_FONT_BUILTIN_COUNT {
            push_record(&mut globals, RECORD_FONT, &font_default.encode()?)?;
        }
        for font in &tables.l_fonts {
            push_record(&mut globals, RECORD_FONT, &font.encode()?)?;
        }
        for (n_id, c_code) in &tables.l_num_formats {
            let mut v_data = n_id.to_le_bytes().to_vec();
            write_unicode_string(&mut v_data, c_code)?;
            push_record(&mut globals, RECORD_FORMAT, &v_data)?;
        }
        for n_idx in 0..N_XF_STYLE_COUNT {
            push_record(&mut globals, RECORD_XF, &encode_style_xf(n_idx == 0))?;
        }
        push_record(&mut globals, RECORD_XF, &SpecBiffXf::default().encode(false))?;
        for xf in &tables.l_xfs {
            push_record(&mut globals, RECORD_XF, &xf.encode(false))?;
        }
        // Built-in "Normal" style bound to XF 0.
        push_record(&mut globals, RECORD_STYLE, &[0x00, 0x80, 0x00, 0xFF])?;
        push_record(&mut globals, RECORD_PALETTE, &tables.palette.encode())?;

        let n_pos_boundsheet = globals.len() + 4;
        let mut v_boundsheet = Vec::new();
        v_boundsheet.extend_from_slice(&0u32.to_le_bytes()); // patched below
        v_boundsheet.extend_from_slice(&0u16.to_le_bytes()); // visible worksheet
        write_short_unicode_string(&mut v_boundsheet, &self.c_sheet_name)?;
        push_record(&mut globals, RECORD_BOUNDSHEET, &v_boundsheet)?;

        let n_refs_total = self
            .dict_cells
            .values()
            .filter(|cell| matches!(cell.value, EnumBiffCell::Shared(_)))
            .count();
        encode_sst(
            &mut globals,
            &self.l_strings,
            u32::try_from(n_refs_total).unwrap_or(u32::MAX),
        )?;
        push_record(&mut globals, RECORD_EOF, &[])?;

        let n_offset_sheet = u32::try_from(globals.len())
            .map_err(|_| SheetError::codec("workbook globals exceed 4 GiB"))?;
        globals[n_pos_boundsheet..n_pos_boundsheet + 4]
            .copy_from_slice(&n_offset_sheet.to_le_bytes());

        let v_sheet = self.encode_sheet_stream(&tables)?;
        globals.extend_from_slice(&v_sheet);
        Ok(globals)
    }

    fn encode_sheet_stream(&self, tables: &BiffStyleTables) -> Result<Vec<u8>> {
        let mut sheet = Vec::new();
        push_record(&mut sheet, RECORD_BOF, &encode_bof(BOF_DT_WORKSHEET))?;

        for (n_col, width) in &self.dict_width_by_col {
            let n_width = (width.clamp(0.0, 255.0) * 256.0).round() as u16;
            let mut v_data = Vec::with_capacity(12);
            v_data.extend_from_slice(&n_col.to_le_bytes());
            v_data.extend_from_slice(&n_col.to_le_bytes());
            v_data.extend_from_slice(&n_width.to_le_bytes());
            v_data.extend_from_slice(&N_XF_CELL_DEFAULT.to_le_bytes());
            v_data.extend_from_slice(&0u16.to_le_bytes()); // options
            v_data.extend_from_slice(&0u16.to_le_bytes()); // reserved
            push_record(&mut sheet, RECORD_COLINFO, &v_data)?;
        }

        push_record(&mut sheet, RECORD_DIMENSIONS, &self.encode_dimensions())?;

        for ((n_row, n_col), cell) in &self.dict_cells {
            let n_xf = tables.derive_xf_index(cell.style);
            let mut v_data = Vec::with_capacity(14);
            v_data.extend_from_slice(&n_row.to_le_bytes());
            v_data.extend_from_slice(&n_col.to_le_bytes());
            v_data.extend_from_slice(&n_xf.to_le_bytes());
            let record_id = match cell.value {
                EnumBiffCell::Blank => RECORD_BLANK,
                EnumBiffCell::Number(val) => {
                    v_data.extend_from_slice(&val.to_le_bytes());
                    RECORD_NUMBER
                }
                EnumBiffCell::Shared(n_idx_sst) => {
                    v_data.extend_from_slice(&n_idx_sst.to_le_bytes());
                    RECORD_LABELSST
                }
            };
            push_record(&mut sheet, record_id, &v_data)?;
        }

        push_record(&mut sheet, RECORD_WINDOW2, &encode_window2())?;

        for l_chunk in self.l_merged.chunks(N_MERGED_PER_RECORD_MAX) {
            let mut v_data = Vec::with_capacity(2 + l_chunk.len() * 8);
            v_data.extend_from_slice(&(l_chunk.len() as u16).to_le_bytes());
            for l_bounds in l_chunk {
                for n_bound in l_bounds {
                    v_data.extend_from_slice(&n_bound.to_le_bytes());
                }
            }
            push_record(&mut sheet, RECORD_MERGEDCELLS, &v_data)?;
        }

        push_record(&mut sheet, RECORD_EOF, &[])?;
        Ok(sheet)
    }

    fn encode_dimensions(&self) -> [u8; 14] {
        let mut out = [0u8; 14];
        let (Some(((n_row_first, _), _)), Some(((n_row_last, _), _))) =
            (self.dict_cells.first_key_value(), self.dict_cells.last_key_value())
        else {
            return out;
        };
        let n_col_first = self.dict_cells.keys().map(|(_, col)| *col).min().unwrap_or(0);
        let n_col_last = self.dict_cells.keys().map(|(_, col)| *col).max().unwrap_or(0);
        out[0..4].copy_from_slice(&u32::from(*n_row_first).to_le_bytes());
        out[4..8].copy_from_slice(&(u32::from(*n_row_last) + 1).to_le_bytes());
        out[8..10].copy_from_slice(&n_col_first.to_le_bytes());
        out[10..12].copy_from_slice(&(n_col_last + 1).to_le_bytes());
        out
    }
}

fn cast_biff_cell(row_idx: usize, col_idx: usize) -> Result<(u16, u16)> {
    if row_idx >= N_NROWS_XLS_MAX || col_idx >= N_NCOLS_XLS_MAX {
        return Err(SheetError::codec(format!(
            "cell ({row_idx}, {col_idx}) is outside the legacy sheet limits \
             ({N_NROWS_XLS_MAX} rows x {N_NCOLS_XLS_MAX} columns)"
        )));
    }
    Ok((row_idx as u16, col_idx as u16))
}

fn encode_window1() -> [u8; 18] {
    let mut out = [0u8; 18];
    out[4..6].copy_from_slice(&0x3A5Cu16.to_le_bytes()); // width
    out[6..8].copy_from_slice(&0x23BEu16.to_le_bytes()); // height
    out[8..10].copy_from_slice(&0x0038u16.to_le_bytes()); // show tabs + scrollbars
    out[14..16].copy_from_slice(&1u16.to_le_bytes()); // selected tabs
    out[16..18].copy_from_slice(&600u16.to_le_bytes()); // tab ratio
    out
}

fn encode_window2() -> [u8; 18] {
    let mut out = [0u8; 18];
    out[0..2].copy_from_slice(&0x06B6u16.to_le_bytes());
    out[6..8].copy_from_slice(&ICV_SYSTEM_FOREGROUND.to_le_bytes()); // gridline color
    out
}

fn encode_style_xf(if_normal: bool) -> [u8; 20] {
    let mut xf = SpecBiffXf::default().encode(true);
    if !if_normal {
        // Non-Normal style XFs leave every attribute group to the parent.
        xf[9] = 0xF4;
    }
    xf
}

////////////////////////////////////////////////////////////////////////////////
// #region StyleTables

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SpecBiffFont {
    c_name: String,
    n_height: u16,
    if_bold: bool,
    if_italic: bool,
    n_color: u16,
}

impl Default for SpecBiffFont {
    fn default() -> Self {
        Self {
            c_name: C_FONT_NAME_DEFAULT.to_string(),
            n_height: N_FONT_HEIGHT_DEFAULT,
            if_bold: false,
            if_italic: false,
            n_color: ICV_AUTOMATIC_FONT,
        }
    }
}

impl SpecBiffFont {
    fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(16 + self.c_name.len() * 2);
        out.extend_from_slice(&self.n_height.to_le_bytes());
        let n_flags: u16 = if self.if_italic { 0x0002 } else { 0 };
        out.extend_from_slice(&n_flags.to_le_bytes());
        out.extend_from_slice(&self.n_color.to_le_bytes());
        let n_weight: u16 = if self.if_bold { 700 } else { 400 };
        out.extend_from_slice(&n_weight.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // escapement
        out.push(0); // underline
        out.push(0); // family
        out.push(0); // charset
        out.push(0); // reserved
        write_short_unicode_string(&mut out, &self.c_name)?;
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SpecBiffXf {
    n_font: u16,
    n_num_format: u16,
    n_align_h: u8,
    n_align_v: u8,
    if_wrap: bool,
    borders: [u8; 4],
    n_fill: Option<u16>,
}

impl Default for SpecBiffXf {
    fn default() -> Self {
        Self {
            n_font: 0,
            n_num_format: 0,
            n_align_h: 0,
            n_align_v: 2,
            if_wrap: false,
            borders: [0; 4],
            n_fill: None,
        }
    }
}

impl SpecBiffXf {
    fn encode(&self, if_style: bool) -> [u8; 20] {
        let mut out = [0u8; 20];
        out[0..2].copy_from_slice(&self.n_font.to_le_bytes());
        out[2..4].copy_from_slice(&self.n_num_format.to_le_bytes());
        // locked; style XFs carry parent 0xFFF
        let n_flags: u16 = if if_style { 0xFFF5 } else { 0x0001 };
        out[4..6].copy_from_slice(&n_flags.to_le_bytes());
        out[6] = (self.n_align_h & 0x07)
            | (u8::from(self.if_wrap) << 3)
            | ((self.n_align_v & 0x07) << 4);
        out[9] = if if_style { 0x00 } else { 0xFC };

        let [n_top, n_bottom, n_left, n_right] = self.borders.map(u32::from);
        let icv_line = |n_style: u32| {
            if n_style == 0 {
                0
            } else {
                u32::from(ICV_SYSTEM_FOREGROUND)
            }
        };
        let n_border1 = n_left
            | (n_right << 4)
            | (n_top << 8)
            | (n_bottom << 12)
            | (icv_line(n_left) << 16)
            | (icv_line(n_right) << 23);
        let (n_pattern, n_fore) = match self.n_fill {
            Some(n_icv) => (1u32, n_icv),
            None => (0u32, ICV_SYSTEM_FOREGROUND),
        };
        let n_border2 = icv_line(n_top) | (icv_line(n_bottom) << 7) | (n_pattern << 26);
        out[10..14].copy_from_slice(&n_border1.to_le_bytes());
        out[14..18].copy_from_slice(&n_border2.to_le_bytes());
        let n_fill_colors: u16 = (n_fore & 0x7F) | ((ICV_SYSTEM_BACKGROUND & 0x7F) << 7);
        out[18..20].copy_from_slice(&n_fill_colors.to_le_bytes());
        out
    }
}

/// Palette slots 8..=63, default colors overwritten on demand.
#[derive(Debug, Clone)]
struct BiffPalette {
    l_colors: [u32; 56],
    l_if_claimed: [bool; 56],
}

impl BiffPalette {
    fn new() -> Self {
        Self {
            l_colors: TUP_PALETTE_DEFAULT,
            l_if_claimed: [false; 56],
        }
    }

    /// Palette index for a `#RRGGBB` color, `None` when unparseable.
    fn resolve(&mut self, color: &str) -> Option<u16> {
        let n_rgb = parse_rgb_hex(color)?;

        if let Some(n_slot) = self.l_colors.iter().position(|c| *c == n_rgb) {
            self.l_if_claimed[n_slot] = true;
            return Some(N_PALETTE_FIRST_INDEX + n_slot as u16);
        }
        if let Some(n_slot) = self.l_if_claimed.iter().rposition(|if_claimed| !if_claimed) {
            self.l_colors[n_slot] = n_rgb;
            self.l_if_claimed[n_slot] = true;
            return Some(N_PALETTE_FIRST_INDEX + n_slot as u16);
        }

        let n_slot = (0..self.l_colors.len())
            .min_by_key(|n_slot| derive_color_distance(self.l_colors[*n_slot], n_rgb))
            .unwrap_or(0);
        log::warn!(
            "Legacy palette is full; color {color} mapped to nearest #{:06X}.",
            self.l_colors[n_slot]
        );
        Some(N_PALETTE_FIRST_INDEX + n_slot as u16)
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + 56 * 4);
        out.extend_from_slice(&(self.l_colors.len() as u16).to_le_bytes());
        for n_rgb in self.l_colors {
            out.push((n_rgb >> 16) as u8);
            out.push((n_rgb >> 8) as u8);
            out.push(n_rgb as u8);
            out.push(0);
        }
        out
    }
}

fn parse_rgb_hex(color: &str) -> Option<u32> {
    let c_hex = color.trim().trim_start_matches('#');
    if c_hex.len() != 6 {
        return None;
    }
    u32::from_str_radix(c_hex, 16).ok()
}

fn derive_color_distance(lhs: u32, rhs: u32) -> u32 {
    [16, 8, 0]
        .iter()
        .map(|n_shift| {
            let n_l = ((lhs >> n_shift) & 0xFF) as i32;
            let n_r = ((rhs >> n_shift) & 0xFF) as i32;
            ((n_l - n_r) * (n_l - n_r)) as u32
        })
        .sum()
}

/// FONT/FORMAT/XF/PALETTE tables derived from the registered formats.
#[derive(Debug, Clone)]
struct BiffStyleTables {
    l_fonts: Vec<SpecBiffFont>,
    l_num_formats: Vec<(u16, String)>,
    l_xfs: Vec<SpecBiffXf>,
    palette: BiffPalette,
}

impl BiffStyleTables {
    fn plan(formats: &[SpecCellFormat]) -> Self {
        let mut tables = Self {
            l_fonts: Vec::new(),
            l_num_formats: Vec::new(),
            l_xfs: Vec::with_capacity(formats.len()),
            palette: BiffPalette::new(),
        };
        let mut dict_font_idx: HashMap<SpecBiffFont, u16> = HashMap::new();
        let mut dict_format_id: HashMap<String, u16> = HashMap::new();

        for format in formats {
            let n_font = match tables.derive_font(format) {
                None => 0,
                Some(font) => *dict_font_idx.entry(font.clone()).or_insert_with(|| {
                    tables.l_fonts.push(font);
                    // Index 4 is reserved, so custom fonts start at 5.
                    N_FONT_BUILTIN_COUNT + tables.l_fonts.len() as u16
                }),
            };

            let n_num_format = match format.num_format.as_deref() {
                None => 0,
                Some(c_code) => match TUP_NUM_FORMAT_BUILTIN.iter().find(|(c, _)| *c == c_code) {
                    Some((_, n_id)) => *n_id,
                    None => *dict_format_id.entry(c_code.to_string()).or_insert_with(|| {
                        let n_id = N_FORMAT_ID_FIRST_CUSTOM + tables.l_num_formats.len() as u16;
                        tables.l_num_formats.push((n_id, c_code.to_string()));
                        n_id
                    }),
                },
            };

            let (n_align_h, n_align_v) = derive_alignment(format);
            let borders = format
                .derive_border_sides()
                .map(|n_style| n_style.clamp(0, 13) as u8);
            let n_fill = format
                .bg_color
                .as_deref()
                .and_then(|color| tables.palette.resolve(color));

            tables.l_xfs.push(SpecBiffXf {
                n_font,
                n_num_format,
                n_align_h,
                n_align_v,
                if_wrap: format.text_wrap.unwrap_or(false),
                borders,
                n_fill,
            });
        }
        tables
    }

    fn derive_font(&mut self, format: &SpecCellFormat) -> Option<SpecBiffFont> {
        if format.font_name.is_none()
            && format.font_size.is_none()
            && format.bold.is_none()
            && format.italic.is_none()
            && format.font_color.is_none()
        {
            return None;
        }
        let n_color = format
            .font_color
            .as_deref()
            .and_then(|color| self.palette.resolve(color))
            .unwrap_or(ICV_AUTOMATIC_FONT);
        Some(SpecBiffFont {
            c_name: format
                .font_name
                .clone()
                .unwrap_or_else(|| C_FONT_NAME_DEFAULT.to_string()),
            n_height: format
                .font_size
                .map(|n_pt| (n_pt.clamp(1, 409) * 20) as u16)
                .unwrap_or(N_FONT_HEIGHT_DEFAULT),
            if_bold: format.bold.unwrap_or(false),
            if_italic: format.italic.unwrap_or(false),
            n_color,
        })
    }

    fn derive_xf_index(&self, style: Option<StyleId>) -> u16 {
        match style {
            Some(style) if style.index() < self.l_xfs.len() => {
                N_XF_CELL_FIRST_CUSTOM + style.index() as u16
            }
            _ => N_XF_CELL_DEFAULT,
        }
    }
}

fn derive_alignment(format: &SpecCellFormat) -> (u8, u8) {
    let mut n_align_h = 0u8;
    let mut n_align_v = 2u8;
    for c_align in [&format.align, &format.valign].into_iter().flatten() {
        match c_align.trim().to_ascii_lowercase().as_str() {
            "general" => n_align_h = 0,
            "left" => n_align_h = 1,
            "center" => n_align_h = 2,
            "right" => n_align_h = 3,
            "fill" => n_align_h = 4,
            "justify" => n_align_h = 5,
            "center_across" => n_align_h = 6,
            "distributed" => n_align_h = 7,
            "top" => n_align_v = 0,
            "vcenter" | "vertical_center" => n_align_v = 1,
            "bottom" => n_align_v = 2,
            "vjustify" | "vertical_justify" => n_align_v = 3,
            "vdistributed" | "vertical_distributed" => n_align_v = 4,
            _ => {}
        }
    }
    (n_align_h, n_align_v)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use calamine::{Data, Reader, Xls, open_workbook_from_rs};

    use super::*;
    use crate::biff::records::{BiffRecordReader, RECORD_SST};
    use crate::style::{StyleRegistry, StyleTable};

    fn derive_record_ids(v_stream: &[u8]) -> Vec<u16> {
        let mut reader = BiffRecordReader::new(Cursor::new(v_stream.to_vec()));
        let mut l_ids = Vec::new();
        while let Some(record) = reader.next_record().expect("read") {
            l_ids.push(record.record_id);
        }
        l_ids
    }

    #[test]
    fn workbook_stream_orders_globals_then_sheet() {
        let mut workbook = BiffWorkbook::new("Data").expect("workbook");
        workbook.put_string(1, 0, "b", None).expect("put");
        workbook.put_number(0, 1, 2.0, None).expect("put");
        workbook.put_string(0, 0, "a", None).expect("put");

        let v_stream = workbook.encode_workbook_stream(&[]).expect("encode");
        let l_ids = derive_record_ids(&v_stream);
        assert_eq!(l_ids.first(), Some(&RECORD_BOF));
        assert_eq!(l_ids.iter().filter(|id| **id == RECORD_BOF).count(), 2);
        assert!(l_ids.contains(&RECORD_SST));

        // Cells come out row-major regardless of insertion order.
        let l_cells: Vec<u16> = l_ids
            .iter()
            .copied()
            .filter(|id| *id == RECORD_LABELSST || *id == RECORD_NUMBER)
            .collect();
        assert_eq!(l_cells, vec![RECORD_LABELSST, RECORD_NUMBER, RECORD_LABELSST]);
        assert_eq!(l_ids.last(), Some(&RECORD_EOF));
    }

    #[test]
    fn cells_outside_legacy_limits_are_rejected() {
        let mut workbook = BiffWorkbook::new("Data").expect("workbook");
        assert!(workbook.put_number(N_NROWS_XLS_MAX, 0, 1.0, None).is_err());
        assert!(workbook.put_number(0, N_NCOLS_XLS_MAX, 1.0, None).is_err());
        assert!(BiffWorkbook::new("").is_err());
    }

    #[test]
    fn palette_reuses_defaults_then_claims_free_slots() {
        let mut palette = BiffPalette::new();
        assert_eq!(palette.resolve("#FF0000"), Some(10));
        assert_eq!(palette.resolve("#D9D9D9"), Some(63));
        assert_eq!(palette.resolve("#D9D9D9"), Some(63));
        assert_eq!(palette.resolve("#FCE4EC"), Some(62));
        assert_eq!(palette.resolve("red"), None);
    }

    #[test]
    fn style_tables_share_fonts_and_skip_reserved_index() {
        let fmt_bold = SpecCellFormat {
            bold: Some(true),
            ..Default::default()
        };
        let fmt_fill = SpecCellFormat {
            bold: Some(true),
            bg_color: Some("#D9D9D9".to_string()),
            num_format: Some("0.000".to_string()),
            ..Default::default()
        };
        let mut styles = StyleTable::new();
        styles.register_format(fmt_bold);
        let style_fill = styles.register_format(fmt_fill);
        styles.register_format(SpecCellFormat::default());
        let tables = BiffStyleTables::plan(styles.formats());
        assert_eq!(tables.l_fonts.len(), 1);
        assert_eq!(tables.l_xfs[0].n_font, 5);
        assert_eq!(tables.l_xfs[1].n_font, 5);
        assert_eq!(tables.l_xfs[2].n_font, 0);
        assert_eq!(tables.l_xfs[1].n_num_format, 164);
        assert_eq!(tables.l_xfs[1].n_fill, Some(63));
        assert_eq!(tables.derive_xf_index(Some(style_fill)), 17);
        assert_eq!(tables.derive_xf_index(None), 15);
    }

    #[test]
    fn serialized_workbook_is_an_ole_container() {
        let mut workbook = BiffWorkbook::new("卡密").expect("workbook");
        workbook.put_string(0, 0, "id", None).expect("put");
        workbook
            .add_merged_range(&SpecMergedRange::row_span(0, 0, 3))
            .expect("merge");
        workbook.set_column_width(0, 12.0).expect("width");
        let v_bytes = workbook.serialize(&[]).expect("serialize");
        assert!(v_bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]));
        // Major version 3 of the compound file header.
        assert_eq!(&v_bytes[0x1A..0x1C], &[3, 0]);
    }

    #[test]
    fn large_workbook_reads_back_through_calamine() {
        let c_long = "x😀".repeat(3_000);
        let mut workbook = BiffWorkbook::new("Data").expect("workbook");
        for n_row in 0..300usize {
            workbook
                .put_string(n_row, 0, &format!("卡密-{n_row}-😀"), None)
                .expect("put");
            workbook.put_number(n_row, 1, n_row as f64, None).expect("put");
        }
        workbook
            .put_string(300, 0, &format!("a{}", "😀".repeat(3_000)), None)
            .expect("put");
        workbook.put_string(301, 0, &c_long, None).expect("put");
        workbook
            .add_merged_range(&SpecMergedRange {
                row_idx_first: 302,
                row_idx_last: 303,
                col_idx_first: 0,
                col_idx_last: 2,
            })
            .expect("merge");
        let v_bytes = workbook.serialize(&[]).expect("serialize");
        assert!(v_bytes.len() > 4_096);

        let mut xls: Xls<_> = open_workbook_from_rs(Cursor::new(v_bytes)).expect("open");
        let range = xls.worksheet_range("Data").expect("range");
        assert_eq!(
            range.get_value((0, 0)),
            Some(&Data::String("卡密-0-😀".to_string()))
        );
        assert_eq!(range.get_value((299, 1)), Some(&Data::Float(299.0)));
        assert_eq!(
            range.get_value((300, 0)),
            Some(&Data::String(format!("a{}", "😀".repeat(3_000))))
        );
        assert_eq!(range.get_value((301, 0)), Some(&Data::String(c_long)));

        let l_merges = xls.worksheet_merge_cells("Data").expect("merges");
        assert_eq!(l_merges.len(), 1);
        assert_eq!(l_merges[0].start, (302, 0));
        assert_eq!(l_merges[0].end, (303, 2));
    }
}
