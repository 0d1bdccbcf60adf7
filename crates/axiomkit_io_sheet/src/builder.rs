//! Document-builder capability shared by both containers.
//!
//! The writer lays out cells through [`SheetBuilder`]; each container
//! translates registered [`SpecCellFormat`]s into its own style objects.

use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Workbook, Worksheet};

use crate::biff::BiffWorkbook;
use crate::error::{Result, SheetError};
use crate::spec::{EnumDocumentFormat, SpecCellFormat, SpecMergedRange};
use crate::style::{StyleId, StyleRegistry, StyleTable};
use crate::util::{cast_col_num, cast_row_num};

/// Single-sheet document under construction.
pub trait SheetBuilder: StyleRegistry {
    /// Container produced by [`Self::finish`].
    fn format(&self) -> EnumDocumentFormat;

    /// Write a styled empty cell; unstyled blanks are no-ops.
    fn write_blank(&mut self, row_idx: usize, col_idx: usize, style: Option<StyleId>)
    -> Result<()>;

    /// Write a text cell.
    fn write_string(
        &mut self,
        row_idx: usize,
        col_idx: usize,
        text: &str,
        style: Option<StyleId>,
    ) -> Result<()>;

    /// Write a numeric cell.
    fn write_number(
        &mut self,
        row_idx: usize,
        col_idx: usize,
        value: f64,
        style: Option<StyleId>,
    ) -> Result<()>;

    /// Merge `range` and put `text` in its top-left anchor; every covered
    /// cell takes `style`.
    fn merge_range(
        &mut self,
        range: &SpecMergedRange,
        text: &str,
        style: Option<StyleId>,
    ) -> Result<()>;

    /// Set a column width in character units.
    fn set_column_width(&mut self, col_idx: usize, width: f64) -> Result<()>;

    /// Serialize the document.
    fn finish(self) -> Result<Vec<u8>>;
}

////////////////////////////////////////////////////////////////////////////////
// #region XmlZipBuilder

/// `.xlsx` builder backed by `rust_xlsxwriter`.
pub struct XlsxSheetBuilder {
    workbook: Workbook,
    worksheet: Worksheet,
    styles: StyleTable,
    l_formats: Vec<Format>,
    fmt_plain: Format,
}

impl XlsxSheetBuilder {
    /// Create a workbook with one sheet named `sheet_name`.
    pub fn new(sheet_name: &str) -> Result<Self> {
        let mut worksheet = Worksheet::new();
        worksheet.set_name(sheet_name)?;
        Ok(Self {
            workbook: Workbook::new(),
            worksheet,
            styles: StyleTable::new(),
            l_formats: Vec::new(),
            fmt_plain: Format::new(),
        })
    }
}

fn validate_merged_range(range: &SpecMergedRange) -> Result<()> {
    if range.row_idx_last < range.row_idx_first || range.col_idx_last < range.col_idx_first {
        return Err(SheetError::codec(format!(
            "invalid merge range: rows {}..={}, columns {}..={}",
            range.row_idx_first, range.row_idx_last, range.col_idx_first, range.col_idx_last
        )));
    }
    Ok(())
}

fn select_format<'a>(
    l_formats: &'a [Format],
    fmt_plain: &'a Format,
    style: Option<StyleId>,
) -> &'a Format {
    style
        .and_then(|style| l_formats.get(style.index()))
        .unwrap_or(fmt_plain)
}

impl StyleRegistry for XlsxSheetBuilder {
    fn register_format(&mut self, format: SpecCellFormat) -> StyleId {
        let style = self.styles.register_format(format);
        while self.l_formats.len() < self.styles.len() {
            let n_idx = self.l_formats.len();
            let fmt = self
                .styles
                .formats()
                .get(n_idx)
                .map(derive_rust_xlsx_format)
                .unwrap_or_else(Format::new);
            self.l_formats.push(fmt);
        }
        style
    }
}

impl SheetBuilder for XlsxSheetBuilder {
    fn format(&self) -> EnumDocumentFormat {
        EnumDocumentFormat::XmlZip
    }

    fn write_blank(
        &mut self,
        row_idx: usize,
        col_idx: usize,
        style: Option<StyleId>,
    ) -> Result<()> {
        let Some(style) = style else {
            return Ok(());
        };
        let fmt = select_format(&self.l_formats, &self.fmt_plain, Some(style));
        self.worksheet
            .write_blank(cast_row_num(row_idx)?, cast_col_num(col_idx)?, fmt)?;
        Ok(())
    }

    fn write_string(
        &mut self,
        row_idx: usize,
        col_idx: usize,
        text: &str,
        style: Option<StyleId>,
    ) -> Result<()> {
        let fmt = select_format(&self.l_formats, &self.fmt_plain, style);
        self.worksheet.write_string_with_format(
            cast_row_num(row_idx)?,
            cast_col_num(col_idx)?,
            text,
            fmt,
        )?;
        Ok(())
    }

    fn write_number(
        &mut self,
        row_idx: usize,
        col_idx: usize,
        value: f64,
        style: Option<StyleId>,
    ) -> Result<()> {
        let fmt = select_format(&self.l_formats, &self.fmt_plain, style);
        self.worksheet.write_number_with_format(
            cast_row_num(row_idx)?,
            cast_col_num(col_idx)?,
            value,
            fmt,
        )?;
        Ok(())
    }

    fn merge_range(
        &mut self,
        range: &SpecMergedRange,
        text: &str,
        style: Option<StyleId>,
    ) -> Result<()> {
        validate_merged_range(range)?;
        if range.is_single_cell() {
            return self.write_string(range.row_idx_first, range.col_idx_first, text, style);
        }
        let fmt = select_format(&self.l_formats, &self.fmt_plain, style);
        self.worksheet.merge_range(
            cast_row_num(range.row_idx_first)?,
            cast_col_num(range.col_idx_first)?,
            cast_row_num(range.row_idx_last)?,
            cast_col_num(range.col_idx_last)?,
            text,
            fmt,
        )?;
        Ok(())
    }

    fn set_column_width(&mut self, col_idx: usize, width: f64) -> Result<()> {
        self.worksheet
            .set_column_width(cast_col_num(col_idx)?, width)?;
        Ok(())
    }

    fn finish(self) -> Result<Vec<u8>> {
        let Self {
            mut workbook,
            worksheet,
            ..
        } = self;
        workbook.push_worksheet(worksheet);
        Ok(workbook.save_to_buffer()?)
    }
}

fn derive_rust_xlsx_format(spec: &SpecCellFormat) -> Format {
    let mut format = Format::new();

    if let Some(val) = &spec.font_name {
        format = format.set_font_name(val.as_str());
    }
    if let Some(val) = spec.font_size {
        format = format.set_font_size(val as f64);
    }
    if spec.bold.unwrap_or(false) {
        format = format.set_bold();
    }
    if spec.italic.unwrap_or(false) {
        format = format.set_italic();
    }

    for c_align in [&spec.align, &spec.valign].into_iter().flatten() {
        if let Some(align) = derive_format_align(c_align) {
            format = format.set_align(align);
        }
    }

    if let Some(val) = &spec.num_format {
        format = format.set_num_format(val.as_str());
    }
    if let Some(val) = &spec.bg_color {
        format = format.set_background_color(val.as_str());
    }
    if let Some(val) = &spec.font_color {
        format = format.set_font_color(val.as_str());
    }

    let [n_top, n_bottom, n_left, n_right] = spec.derive_border_sides();
    if n_top != 0 {
        format = format.set_border_top(derive_format_border(n_top));
    }
    if n_bottom != 0 {
        format = format.set_border_bottom(derive_format_border(n_bottom));
    }
    if n_left != 0 {
        format = format.set_border_left(derive_format_border(n_left));
    }
    if n_right != 0 {
        format = format.set_border_right(derive_format_border(n_right));
    }

    if spec.text_wrap.unwrap_or(false) {
        format = format.set_text_wrap();
    }

    format
}

fn derive_format_border(border: i64) -> FormatBorder {
    match border {
        1 => FormatBorder::Thin,
        2 => FormatBorder::Medium,
        3 => FormatBorder::Dashed,
        4 => FormatBorder::Dotted,
        5 => FormatBorder::Thick,
        6 => FormatBorder::Double,
        7 => FormatBorder::Hair,
        8 => FormatBorder::MediumDashed,
        9 => FormatBorder::DashDot,
        10 => FormatBorder::MediumDashDot,
        11 => FormatBorder::DashDotDot,
        12 => FormatBorder::MediumDashDotDot,
        13 => FormatBorder::SlantDashDot,
        _ => FormatBorder::None,
    }
}

fn derive_format_align(align: &str) -> Option<FormatAlign> {
    match align.trim().to_ascii_lowercase().as_str() {
        "general" => Some(FormatAlign::General),
        "left" => Some(FormatAlign::Left),
        "center" => Some(FormatAlign::Center),
        "right" => Some(FormatAlign::Right),
        "fill" => Some(FormatAlign::Fill),
        "justify" => Some(FormatAlign::Justify),
        "center_across" => Some(FormatAlign::CenterAcross),
        "distributed" => Some(FormatAlign::Distributed),
        "top" => Some(FormatAlign::Top),
        "bottom" => Some(FormatAlign::Bottom),
        "vcenter" | "vertical_center" => Some(FormatAlign::VerticalCenter),
        "vjustify" | "vertical_justify" => Some(FormatAlign::VerticalJustify),
        "vdistributed" | "vertical_distributed" => Some(FormatAlign::VerticalDistributed),
        _ => None,
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region LegacyBinaryBuilder

/// `.xls` builder backed by the in-crate BIFF8 serializer.
pub struct BiffSheetBuilder {
    workbook: BiffWorkbook,
    styles: StyleTable,
}

impl BiffSheetBuilder {
    /// Create a workbook with one sheet named `sheet_name`.
    pub fn new(sheet_name: &str) -> Result<Self> {
        Ok(Self {
            workbook: BiffWorkbook::new(sheet_name)?,
            styles: StyleTable::new(),
        })
    }
}

impl StyleRegistry for BiffSheetBuilder {
    fn register_format(&mut self, format: SpecCellFormat) -> StyleId {
        self.styles.register_format(format)
    }
}

impl SheetBuilder for BiffSheetBuilder {
    fn format(&self) -> EnumDocumentFormat {
        EnumDocumentFormat::LegacyBinary
    }

    fn write_blank(
        &mut self,
        row_idx: usize,
        col_idx: usize,
        style: Option<StyleId>,
    ) -> Result<()> {
        if style.is_none() {
            return Ok(());
        }
        self.workbook.put_blank(row_idx, col_idx, style)
    }

    fn write_string(
        &mut self,
        row_idx: usize,
        col_idx: usize,
        text: &str,
        style: Option<StyleId>,
    ) -> Result<()> {
        self.workbook.put_string(row_idx, col_idx, text, style)
    }

    fn write_number(
        &mut self,
        row_idx: usize,
        col_idx: usize,
        value: f64,
        style: Option<StyleId>,
    ) -> Result<()> {
        self.workbook.put_number(row_idx, col_idx, value, style)
    }

    fn merge_range(
        &mut self,
        range: &SpecMergedRange,
        text: &str,
        style: Option<StyleId>,
    ) -> Result<()> {
        validate_merged_range(range)?;
        if style.is_some() {
            for row_idx in range.row_idx_first..=range.row_idx_last {
                for col_idx in range.col_idx_first..=range.col_idx_last {
                    self.workbook.put_blank(row_idx, col_idx, style)?;
                }
            }
        }
        self.workbook
            .put_string(range.row_idx_first, range.col_idx_first, text, style)?;
        if range.is_single_cell() {
            return Ok(());
        }
        self.workbook.add_merged_range(range)
    }

    fn set_column_width(&mut self, col_idx: usize, width: f64) -> Result<()> {
        self.workbook.set_column_width(col_idx, width)
    }

    fn finish(self) -> Result<Vec<u8>> {
        self.workbook.serialize(self.styles.formats())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xlsx_builder_reuses_formats_for_equal_specs() {
        let mut builder = XlsxSheetBuilder::new("Data").expect("builder");
        let fmt = SpecCellFormat {
            bold: Some(true),
            ..Default::default()
        };
        let style_a = builder.register_format(fmt.clone());
        let style_b = builder.register_format(fmt);
        assert_eq!(style_a, style_b);
        assert_eq!(builder.l_formats.len(), 1);
    }

    #[test]
    fn xlsx_builder_produces_zip_container() {
        let mut builder = XlsxSheetBuilder::new("Data").expect("builder");
        builder.write_string(0, 0, "id", None).expect("write");
        builder.write_number(1, 0, 7.0, None).expect("write");
        let v_bytes = builder.finish().expect("finish");
        assert_eq!(
            EnumDocumentFormat::from_magic(&v_bytes),
            Some(EnumDocumentFormat::XmlZip)
        );
    }

    #[test]
    fn biff_builder_produces_compound_file() {
        let mut builder = BiffSheetBuilder::new("Data").expect("builder");
        let style = builder.register_format(SpecCellFormat::default());
        builder
            .merge_range(&SpecMergedRange::row_span(0, 0, 2), "title", Some(style))
            .expect("merge");
        builder.write_number(1, 0, 1.5, None).expect("write");
        let v_bytes = builder.finish().expect("finish");
        assert_eq!(
            EnumDocumentFormat::from_magic(&v_bytes),
            Some(EnumDocumentFormat::LegacyBinary)
        );
    }

    #[test]
    fn merges_cover_rectangles_and_reject_inverted_bounds() {
        let range = SpecMergedRange {
            row_idx_first: 0,
            row_idx_last: 1,
            col_idx_first: 0,
            col_idx_last: 2,
        };
        let mut builder = XlsxSheetBuilder::new("Data").expect("builder");
        builder.merge_range(&range, "title", None).expect("merge");
        builder
            .merge_range(&SpecMergedRange::row_span(3, 1, 1), "solo", None)
            .expect("single cell");
        assert!(builder.finish().is_ok());

        let mut builder = BiffSheetBuilder::new("Data").expect("builder");
        builder.merge_range(&range, "title", None).expect("merge");
        let inverted = SpecMergedRange::row_span(2, 3, 1);
        assert!(builder.merge_range(&inverted, "x", None).is_err());
    }

    #[test]
    fn border_and_align_names_map_to_xlsx_enums() {
        assert_eq!(derive_format_border(1), FormatBorder::Thin);
        assert_eq!(derive_format_border(99), FormatBorder::None);
        assert_eq!(derive_format_align(" VCenter "), Some(FormatAlign::VerticalCenter));
        assert_eq!(derive_format_align("sideways"), None);
    }
}
