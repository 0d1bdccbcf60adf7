//! Cell formats, merged regions and column widths of an `.xlsx` template.

use std::collections::HashMap;
use std::io::{Read, Seek};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use zip::ZipArchive;

use crate::biff::globals::assign_border_sides;
use crate::conf::{N_NCOLS_EXCEL_MAX, TUP_NUM_FORMAT_BUILTIN};
use crate::error::{Result, SheetError};
use crate::package::{
    C_PART_STYLES, C_REL_TYPE_STYLES_SUFFIX, read_attribute, read_zip_part,
    read_zip_part_optional, resolve_part_by_type, resolve_sheet_part,
};
use crate::spec::{SpecCellFormat, SpecMergedRange};
use crate::util::parse_cell_reference;

use super::SpecTemplateLayout;

/// Border style names in the order of their numeric codes, starting at 1.
const TUP_BORDER_STYLE_NAMES: [&str; 13] = [
    "thin",
    "medium",
    "dashed",
    "dotted",
    "thick",
    "double",
    "hair",
    "mediumDashed",
    "dashDot",
    "mediumDashDot",
    "dashDotDot",
    "mediumDashDotDot",
    "slantDashDot",
];

const N_PIXELS_DIGIT: f64 = 7.0;
const N_PIXELS_PADDING: f64 = 5.0;

pub(super) fn read_template_layout<R: Read + Seek>(reader: R) -> Result<SpecTemplateLayout> {
    let mut archive = ZipArchive::new(reader)?;
    let (c_part_sheet, dict_rels) = resolve_sheet_part(&mut archive, 0)?;
    let c_part_styles = resolve_part_by_type(&dict_rels, C_REL_TYPE_STYLES_SUFFIX, C_PART_STYLES);
    let l_formats = match read_zip_part_optional(&mut archive, &c_part_styles)? {
        Some(v_xml) => parse_cell_formats(&v_xml)?,
        None => Vec::new(),
    };
    parse_sheet_layout(&read_zip_part(&mut archive, &c_part_sheet)?, &l_formats)
}

////////////////////////////////////////////////////////////////////////////////
// #region Stylesheet

#[derive(Debug, Clone, Default, PartialEq)]
struct SpecXmlFont {
    c_name: Option<String>,
    n_size: Option<f64>,
    if_bold: bool,
    if_italic: bool,
    c_color: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct SpecXmlXf {
    n_num_format: usize,
    n_font: usize,
    n_fill: usize,
    n_border: usize,
    c_align: Option<String>,
    c_valign: Option<String>,
    if_wrap: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnumStyleSection {
    Other,
    NumFmts,
    Fonts,
    Fills,
    Borders,
    CellXfs,
}

#[derive(Debug, Default)]
struct StylesheetParser {
    dict_num_formats: HashMap<usize, String>,
    l_fonts: Vec<SpecXmlFont>,
    l_fills: Vec<Option<String>>,
    l_borders: Vec<[i64; 4]>,
    l_xfs: Vec<SpecXmlXf>,
    font: Option<SpecXmlFont>,
    fill: Option<Option<String>>,
    if_fill_solid: bool,
    border: Option<[i64; 4]>,
    xf: Option<SpecXmlXf>,
}

fn read_usize_attribute(e: &BytesStart<'_>, local_name: &[u8]) -> Result<usize> {
    Ok(read_attribute(e, local_name)?
        .and_then(|c_val| c_val.trim().parse::<usize>().ok())
        .unwrap_or(0))
}

/// `val` of a toggle element such as `<b/>`; absent means on.
fn read_toggle(e: &BytesStart<'_>) -> Result<bool> {
    Ok(match read_attribute(e, b"val")? {
        Some(c_val) => !matches!(c_val.trim(), "0" | "false"),
        None => true,
    })
}

/// `#RRGGBB` from an `AARRGGBB` or `RRGGBB` attribute.
fn derive_rgb_color(c_argb: &str) -> Option<String> {
    let c_hex = c_argb.trim();
    let c_rgb = match c_hex.len() {
        8 => &c_hex[2..],
        6 => c_hex,
        _ => return None,
    };
    u32::from_str_radix(c_rgb, 16).ok()?;
    Some(format!("#{}", c_rgb.to_ascii_uppercase()))
}

fn derive_border_code(c_style: &str) -> i64 {
    TUP_BORDER_STYLE_NAMES
        .iter()
        .position(|c_name| *c_name == c_style)
        .map_or(0, |n_idx| n_idx as i64 + 1)
}

impl StylesheetParser {
    /// Handle an opening or self-closing element inside `section`.
    fn open(&mut self, section: EnumStyleSection, e: &BytesStart<'_>) -> Result<()> {
        match (section, e.local_name().as_ref()) {
            (EnumStyleSection::NumFmts, b"numFmt") => {
                let n_id = read_usize_attribute(e, b"numFmtId")?;
                if let Some(c_code) = read_attribute(e, b"formatCode")? {
                    self.dict_num_formats.insert(n_id, c_code);
                }
            }
            (EnumStyleSection::Fonts, b"font") => self.font = Some(SpecXmlFont::default()),
            (EnumStyleSection::Fonts, c_tag) => {
                if let Some(font) = self.font.as_mut() {
                    match c_tag {
                        b"b" => font.if_bold = read_toggle(e)?,
                        b"i" => font.if_italic = read_toggle(e)?,
                        b"sz" => {
                            font.n_size = read_attribute(e, b"val")?
                                .and_then(|c_val| c_val.trim().parse::<f64>().ok());
                        }
                        b"name" => font.c_name = read_attribute(e, b"val")?,
                        b"color" => {
                            font.c_color =
                                read_attribute(e, b"rgb")?.and_then(|c| derive_rgb_color(&c));
                        }
                        _ => {}
                    }
                }
            }
            (EnumStyleSection::Fills, b"fill") => {
                self.fill = Some(None);
                self.if_fill_solid = false;
            }
            (EnumStyleSection::Fills, b"patternFill") => {
                self.if_fill_solid = read_attribute(e, b"patternType")?.as_deref() == Some("solid");
            }
            (EnumStyleSection::Fills, b"fgColor") if self.if_fill_solid => {
                if let Some(fill) = self.fill.as_mut() {
                    *fill = read_attribute(e, b"rgb")?.and_then(|c| derive_rgb_color(&c));
                }
            }
            (EnumStyleSection::Borders, b"border") => self.border = Some([0; 4]),
            (EnumStyleSection::Borders, c_side @ (b"top" | b"bottom" | b"left" | b"right")) => {
                let n_slot = match c_side {
                    b"top" => 0,
                    b"bottom" => 1,
                    b"left" => 2,
                    _ => 3,
                };
                let n_code = read_attribute(e, b"style")?
                    .map_or(0, |c_style| derive_border_code(c_style.trim()));
                if let Some(border) = self.border.as_mut() {
                    border[n_slot] = n_code;
                }
            }
            (EnumStyleSection::CellXfs, b"xf") => {
                self.xf = Some(SpecXmlXf {
                    n_num_format: read_usize_attribute(e, b"numFmtId")?,
                    n_font: read_usize_attribute(e, b"fontId")?,
                    n_fill: read_usize_attribute(e, b"fillId")?,
                    n_border: read_usize_attribute(e, b"borderId")?,
                    ..Default::default()
                });
            }
            (EnumStyleSection::CellXfs, b"alignment") => {
                if let Some(xf) = self.xf.as_mut() {
                    xf.c_align = read_attribute(e, b"horizontal")?;
                    xf.c_valign = read_attribute(e, b"vertical")?;
                    xf.if_wrap = read_attribute(e, b"wrapText")?
                        .is_some_and(|c_val| matches!(c_val.trim(), "1" | "true"));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Handle the end of an element inside `section`.
    fn close(&mut self, section: EnumStyleSection, local_name: &[u8]) {
        match (section, local_name) {
            (EnumStyleSection::Fonts, b"font") => {
                if let Some(font) = self.font.take() {
                    self.l_fonts.push(font);
                }
            }
            (EnumStyleSection::Fills, b"fill") => {
                if let Some(fill) = self.fill.take() {
                    self.l_fills.push(fill);
                }
            }
            (EnumStyleSection::Borders, b"border") => {
                if let Some(border) = self.border.take() {
                    self.l_borders.push(border);
                }
            }
            (EnumStyleSection::CellXfs, b"xf") => {
                if let Some(xf) = self.xf.take() {
                    self.l_xfs.push(xf);
                }
            }
            _ => {}
        }
    }

    fn derive_format(&self, xf: &SpecXmlXf) -> Option<SpecCellFormat> {
        let mut format = SpecCellFormat::default();

        if let (Some(font_default), Some(font)) = (self.l_fonts.first(), self.l_fonts.get(xf.n_font))
        {
            if font.c_name != font_default.c_name {
                format.font_name = font.c_name.clone();
            }
            if font.n_size != font_default.n_size {
                format.font_size = font.n_size.map(|n_pt| n_pt.round() as i64);
            }
            if font.if_bold {
                format.bold = Some(true);
            }
            if font.if_italic {
                format.italic = Some(true);
            }
            if font.c_color != font_default.c_color {
                format.font_color = font.c_color.clone();
            }
        }

        if xf.n_num_format != 0 {
            format.num_format = self
                .dict_num_formats
                .get(&xf.n_num_format)
                .cloned()
                .or_else(|| {
                    TUP_NUM_FORMAT_BUILTIN
                        .iter()
                        .find(|(_, n_id)| usize::from(*n_id) == xf.n_num_format)
                        .map(|(c_code, _)| c_code.to_string())
                });
        }

        format.align = xf.c_align.as_deref().and_then(|c_align| match c_align {
            "left" | "center" | "right" | "fill" | "justify" | "distributed" => {
                Some(c_align.to_string())
            }
            "centerContinuous" => Some("center_across".to_string()),
            _ => None,
        });
        format.valign = xf.c_valign.as_deref().and_then(|c_valign| match c_valign {
            "top" => Some("top".to_string()),
            "center" => Some("vcenter".to_string()),
            "justify" => Some("vjustify".to_string()),
            "distributed" => Some("vdistributed".to_string()),
            _ => None,
        });
        if xf.if_wrap {
            format.text_wrap = Some(true);
        }

        if let Some(sides) = self.l_borders.get(xf.n_border) {
            assign_border_sides(&mut format, *sides);
        }
        format.bg_color = self.l_fills.get(xf.n_fill).cloned().flatten();

        (format != SpecCellFormat::default()).then_some(format)
    }
}

/// Formats of every `cellXfs` entry; `None` where the entry is the default.
fn parse_cell_formats(xml: &[u8]) -> Result<Vec<Option<SpecCellFormat>>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut parser = StylesheetParser::default();
    let mut section = EnumStyleSection::Other;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"numFmts" => section = EnumStyleSection::NumFmts,
                b"fonts" => section = EnumStyleSection::Fonts,
                b"fills" => section = EnumStyleSection::Fills,
                b"borders" => section = EnumStyleSection::Borders,
                b"cellXfs" => section = EnumStyleSection::CellXfs,
                b"cellStyleXfs" | b"cellStyles" | b"dxfs" => section = EnumStyleSection::Other,
                _ => parser.open(section, &e)?,
            },
            Event::Empty(e) => {
                parser.open(section, &e)?;
                parser.close(section, e.local_name().as_ref());
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"numFmts" | b"fonts" | b"fills" | b"borders" | b"cellXfs" | b"cellStyleXfs"
                | b"cellStyles" | b"dxfs" => section = EnumStyleSection::Other,
                c_tag => parser.close(section, c_tag),
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(parser
        .l_xfs
        .iter()
        .enumerate()
        .map(|(n_idx, xf)| if n_idx == 0 { None } else { parser.derive_format(xf) })
        .collect())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WorksheetLayout

/// Character width written by `rust_xlsxwriter` and Excel, minus cell padding.
fn derive_width_from_xml(width: f64) -> f64 {
    let n_pixels = (width * N_PIXELS_DIGIT).round();
    if n_pixels >= N_PIXELS_DIGIT + N_PIXELS_PADDING {
        (n_pixels - N_PIXELS_PADDING) / N_PIXELS_DIGIT
    } else {
        n_pixels / (N_PIXELS_DIGIT + N_PIXELS_PADDING)
    }
}

fn parse_merge_reference(c_ref: &str) -> Option<SpecMergedRange> {
    let (c_first, c_last) = c_ref.split_once(':').unwrap_or((c_ref, c_ref));
    let (row_idx_a, col_idx_a) = parse_cell_reference(c_first.trim())?;
    let (row_idx_b, col_idx_b) = parse_cell_reference(c_last.trim())?;
    Some(SpecMergedRange {
        row_idx_first: row_idx_a.min(row_idx_b),
        row_idx_last: row_idx_a.max(row_idx_b),
        col_idx_first: col_idx_a.min(col_idx_b),
        col_idx_last: col_idx_a.max(col_idx_b),
    })
}

#[derive(Debug, Default)]
struct SheetLayoutParser {
    layout: SpecTemplateLayout,
    n_row_current: usize,
    n_row_last: Option<usize>,
    n_col_last: Option<usize>,
}

impl SheetLayoutParser {
    fn open(&mut self, e: &BytesStart<'_>, l_formats: &[Option<SpecCellFormat>]) -> Result<()> {
        match e.local_name().as_ref() {
            b"col" => {
                let if_custom = read_attribute(e, b"customWidth")?
                    .is_some_and(|c_val| matches!(c_val.trim(), "1" | "true"));
                let width = read_attribute(e, b"width")?
                    .and_then(|c_val| c_val.trim().parse::<f64>().ok());
                let n_min = read_usize_attribute(e, b"min")?;
                let n_max = read_usize_attribute(e, b"max")?.min(N_NCOLS_EXCEL_MAX);
                if let (true, Some(width)) = (if_custom, width)
                    && n_min >= 1
                {
                    for col_idx in n_min - 1..n_max {
                        self.layout
                            .column_widths
                            .insert(col_idx, derive_width_from_xml(width));
                    }
                }
            }
            b"row" => {
                self.n_row_current = match read_attribute(e, b"r")? {
                    Some(c_row) => c_row
                        .trim()
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| n.checked_sub(1))
                        .ok_or_else(|| SheetError::codec(format!("invalid row number {c_row:?}")))?,
                    None => self.n_row_last.map_or(0, |n| n + 1),
                };
                self.n_row_last = Some(self.n_row_current);
                self.n_col_last = None;
            }
            b"c" => {
                let (row_idx, col_idx) = match read_attribute(e, b"r")? {
                    Some(c_ref) => parse_cell_reference(&c_ref).ok_or_else(|| {
                        SheetError::codec(format!("invalid cell reference {c_ref:?}"))
                    })?,
                    None => (self.n_row_current, self.n_col_last.map_or(0, |n| n + 1)),
                };
                self.n_col_last = Some(col_idx);
                let n_xf = read_usize_attribute(e, b"s")?;
                let format = l_formats.get(n_xf).cloned().flatten();
                self.layout.place_format(row_idx, col_idx, format);
            }
            b"mergeCell" => {
                if let Some(range) = read_attribute(e, b"ref")?
                    .as_deref()
                    .and_then(parse_merge_reference)
                {
                    self.layout.merges.push(range);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn parse_sheet_layout(
    xml: &[u8],
    l_formats: &[Option<SpecCellFormat>],
) -> Result<SpecTemplateLayout> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut parser = SheetLayoutParser::default();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => parser.open(&e, l_formats)?,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(parser.layout)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
