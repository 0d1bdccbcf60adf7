//! Export kernel that turns a record sequence into one formatted sheet.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::builder::{BiffSheetBuilder, SheetBuilder, XlsxSheetBuilder};
use crate::conf::{
    derive_default_column_format, derive_default_header_format, derive_default_title_format,
};
use crate::error::{Result, SheetError};
use crate::schema::{SheetRecord, SpecRecordSchema, resolve_record_schema};
use crate::spec::{
    EnumCellValue, EnumDocumentFormat, SpecCellFormat, SpecExportReport, SpecMergedRange,
    SpecTemplateCell, SpecTemplateSheet, SpecWriteLayout, SpecWriteOptions,
};
use crate::style::{StyleFactory, StyleId, StyleRegistry, select_row_style};
use crate::util::{ColumnWidthTracker, sanitize_sheet_name, validate_policy_autofit};
use crate::template::load_template;
use crate::value::derive_cell_value;

////////////////////////////////////////////////////////////////////////////////
// #region ExportedDocument

/// Serialized workbook produced by one export call.
#[derive(Debug, Clone)]
pub struct SpecExportedDocument {
    format: EnumDocumentFormat,
    v_bytes: Vec<u8>,
    report: SpecExportReport,
}

impl SpecExportedDocument {
    /// Container of the document.
    pub fn format(&self) -> EnumDocumentFormat {
        self.format
    }

    /// MIME type for download responses.
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    /// File extension without the dot.
    pub fn file_extension(&self) -> &'static str {
        self.format.file_extension()
    }

    /// Layout and warnings of the export.
    pub fn report(&self) -> &SpecExportReport {
        &self.report
    }

    /// Serialized bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.v_bytes
    }

    /// Consume the document and return its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.v_bytes
    }

    /// Write the bytes to `sink`, flush once and release it.
    pub fn write_to<W: Write>(&self, mut sink: W) -> Result<()> {
        sink.write_all(&self.v_bytes)?;
        sink.flush()?;
        Ok(())
    }

    /// Create (or truncate) `path` and write the document into it.
    pub fn write_as_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        self.write_to(BufWriter::new(file))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ExportEntry

/// Export `records` as one sheet and keep the serialized document in memory.
///
/// The record type's schema drives columns; a configured template replaces the
/// title/header rows and decides the output container.
pub fn export_records<T: SheetRecord>(
    records: &[T],
    options: &SpecWriteOptions,
) -> Result<SpecExportedDocument> {
    if records.is_empty() {
        return Err(SheetError::EmptyInput);
    }
    let schema = resolve_record_schema::<T>()?;

    let template = match options.path_template.as_deref() {
        Some(path) => Some(load_template(path)?),
        None => None,
    };
    let format = template.as_ref().map_or(options.format, |sheet| sheet.format);
    let c_sheet_name = match &template {
        Some(sheet) => sheet.sheet_name.clone(),
        None => sanitize_sheet_name(options.derive_sheet_name(), "_"),
    };

    let (v_bytes, report) = match format {
        EnumDocumentFormat::XmlZip => build_document(
            XlsxSheetBuilder::new(&c_sheet_name)?,
            records,
            &schema,
            options,
            template.as_ref(),
            &c_sheet_name,
        )?,
        EnumDocumentFormat::LegacyBinary => build_document(
            BiffSheetBuilder::new(&c_sheet_name)?,
            records,
            &schema,
            options,
            template.as_ref(),
            &c_sheet_name,
        )?,
    };

    log::info!(
        "Exported {} record(s) to sheet {:?} ({}, {} bytes).",
        report.n_rows_body,
        report.sheet_name,
        format.file_extension(),
        v_bytes.len()
    );
    for c_warning in &report.warnings {
        log::warn!("{c_warning}");
    }

    Ok(SpecExportedDocument {
        format,
        v_bytes,
        report,
    })
}

/// Export `records` straight into `sink`; the sink is flushed once and dropped.
///
/// Nothing reaches the sink when any step before serialization fails.
pub fn export_records_to<T: SheetRecord, W: Write>(
    records: &[T],
    options: &SpecWriteOptions,
    sink: W,
) -> Result<SpecExportReport> {
    let document = export_records(records, options)?;
    document.write_to(sink)?;
    Ok(document.report)
}

fn build_document<T, B: SheetBuilder>(
    mut builder: B,
    records: &[T],
    schema: &SpecRecordSchema<T>,
    options: &SpecWriteOptions,
    template: Option<&SpecTemplateSheet>,
    sheet_name: &str,
) -> Result<(Vec<u8>, SpecExportReport)> {
    let report = populate_sheet(&mut builder, records, schema, options, template, sheet_name)?;
    Ok((builder.finish()?, report))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Layout

/// Plan title/header/body rows of one export.
///
/// With a template nothing but the body is written and it starts at
/// `start_row`. Otherwise a title takes row 0 and pushes the header and the
/// body down by one row.
pub fn plan_write_layout(
    col_idx_max: usize,
    title: Option<&str>,
    start_row: usize,
    if_template: bool,
) -> SpecWriteLayout {
    if if_template {
        return SpecWriteLayout {
            if_title_row: false,
            row_idx_header: None,
            row_idx_body_start: start_row,
            col_idx_max,
        };
    }
    let if_title_row = title.is_some();
    let n_shift = usize::from(if_title_row);
    SpecWriteLayout {
        if_title_row,
        row_idx_header: Some(n_shift),
        row_idx_body_start: start_row + n_shift,
        col_idx_max,
    }
}

fn validate_layout_limits(
    layout: &SpecWriteLayout,
    n_records: usize,
    format: EnumDocumentFormat,
) -> Result<()> {
    if layout.col_idx_max >= format.n_cols_max() {
        return Err(SheetError::codec(format!(
            "column index {} exceeds the {} column limit of {}.",
            layout.col_idx_max,
            format.file_extension(),
            format.n_cols_max()
        )));
    }
    let n_row_end = layout.row_idx_body_start + n_records;
    if n_row_end > format.n_rows_max() {
        return Err(SheetError::codec(format!(
            "{n_records} record(s) starting at row {} exceed the {} row limit of {}.",
            layout.row_idx_body_start,
            format.file_extension(),
            format.n_rows_max()
        )));
    }
    Ok(())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Template

/// Copy merges, cells and column widths of `template` into `builder`.
///
/// A merge takes the text and format of its anchor cell.
fn write_template_cells<B: SheetBuilder>(
    builder: &mut B,
    template: &SpecTemplateSheet,
) -> Result<()> {
    let dict_cells: HashMap<(usize, usize), &SpecTemplateCell> = template
        .cells
        .iter()
        .map(|cell| ((cell.row_index, cell.column_index), cell))
        .collect();

    let mut l_anchors_written: Vec<(usize, usize)> = Vec::new();
    for range in &template.merges {
        let key_anchor = (range.row_idx_first, range.col_idx_first);
        let anchor = dict_cells.get(&key_anchor);
        let style = anchor
            .and_then(|cell| cell.format.clone())
            .map(|format| builder.register_format(format));
        let c_text = match anchor.map(|cell| &cell.value) {
            Some(EnumCellValue::String(c_text)) => {
                l_anchors_written.push(key_anchor);
                c_text.as_str()
            }
            _ => "",
        };
        builder.merge_range(range, c_text, style)?;
    }

    for cell in &template.cells {
        if l_anchors_written.contains(&(cell.row_index, cell.column_index)) {
            continue;
        }
        let style = cell
            .format
            .clone()
            .map(|format| builder.register_format(format));
        write_cell_value(builder, cell.row_index, cell.column_index, &cell.value, style)?;
    }

    for (col_idx, width) in &template.column_widths {
        builder.set_column_width(*col_idx, *width)?;
    }
    Ok(())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetPopulation

struct SpecResolvedStyles {
    style_title: Option<StyleId>,
    style_header: Option<StyleId>,
    style_column: StyleId,
    styles_rules: Vec<StyleId>,
}

fn resolve_style(
    factory: Option<&dyn StyleFactory>,
    registry: &mut dyn StyleRegistry,
    fmt_default: impl FnOnce() -> SpecCellFormat,
) -> StyleId {
    match factory {
        Some(factory) => factory.create_style(registry),
        None => registry.register_format(fmt_default()),
    }
}

fn resolve_styles(
    registry: &mut dyn StyleRegistry,
    options: &SpecWriteOptions,
    layout: &SpecWriteLayout,
) -> SpecResolvedStyles {
    let style_title = layout.if_title_row.then(|| {
        resolve_style(
            options.style_title.as_deref(),
            registry,
            derive_default_title_format,
        )
    });
    let style_header = layout.row_idx_header.map(|_| {
        resolve_style(
            options.style_header.as_deref(),
            registry,
            derive_default_header_format,
        )
    });
    let style_column = resolve_style(
        options.style_column.as_deref(),
        registry,
        derive_default_column_format,
    );
    let styles_rules = options
        .rules_special_row
        .iter()
        .map(|rule| rule.style.create_style(registry))
        .collect();
    SpecResolvedStyles {
        style_title,
        style_header,
        style_column,
        styles_rules,
    }
}

fn write_cell_value<B: SheetBuilder>(
    builder: &mut B,
    row_idx: usize,
    col_idx: usize,
    value: &EnumCellValue,
    style: Option<StyleId>,
) -> Result<()> {
    match value {
        EnumCellValue::None => builder.write_blank(row_idx, col_idx, style),
        EnumCellValue::String(val) => builder.write_string(row_idx, col_idx, val, style),
        EnumCellValue::Number(val) => builder.write_number(row_idx, col_idx, *val, style),
    }
}

/// Write title, header and body of one export into `builder`.
///
/// Style factories run once against the builder before any cell is written.
/// Each body row takes the style of the first matching rule for every cell,
/// falling back to the column style.
pub fn populate_sheet<T, B: SheetBuilder>(
    builder: &mut B,
    records: &[T],
    schema: &SpecRecordSchema<T>,
    options: &SpecWriteOptions,
    template: Option<&SpecTemplateSheet>,
    sheet_name: &str,
) -> Result<SpecExportReport> {
    validate_policy_autofit(&options.policy_autofit)?;

    let layout = plan_write_layout(
        schema.col_idx_max(),
        options.title.as_deref(),
        options.start_row,
        template.is_some(),
    );
    validate_layout_limits(&layout, records.len(), builder.format())?;
    log::debug!("Planned write layout for sheet {sheet_name:?}: {layout:?}.");

    let mut report = SpecExportReport {
        sheet_name: sheet_name.to_string(),
        layout,
        n_rows_body: 0,
        warnings: vec![],
    };
    if template.is_some() && options.title.is_some() {
        report.warn("Title is ignored when a template is used.");
    }
    if let Some(row_idx_header) = layout.row_idx_header
        && layout.row_idx_body_start <= row_idx_header
    {
        report.warn(format!(
            "Body starts at row {} and overwrites the header at row {row_idx_header}.",
            layout.row_idx_body_start
        ));
    }

    let styles = {
        let registry: &mut dyn StyleRegistry = &mut *builder;
        resolve_styles(registry, options, &layout)
    };

    if let Some(template) = template {
        write_template_cells(builder, template)?;
    }

    if let (Some(c_title), Some(style_title)) = (options.title.as_deref(), styles.style_title) {
        if layout.col_idx_max == 0 {
            builder.write_string(0, 0, c_title, Some(style_title))?;
        } else {
            let range = SpecMergedRange::row_span(0, 0, layout.col_idx_max);
            builder.merge_range(&range, c_title, Some(style_title))?;
        }
    }

    let mut tracker = ColumnWidthTracker::new(layout.col_idx_max);
    if let Some(row_idx_header) = layout.row_idx_header {
        for mapping in schema.mappings() {
            builder.write_string(
                row_idx_header,
                mapping.column_index,
                &mapping.column_name,
                styles.style_header,
            )?;
            tracker.observe_header(mapping.column_index, &mapping.column_name);
        }
    }

    for (n_idx_record, record) in records.iter().enumerate() {
        let row_idx = layout.row_idx_body_start + n_idx_record;
        let l_texts = schema.render_row(record);
        let l_values: Vec<Option<&str>> = l_texts.iter().map(Option::as_deref).collect();
        let style_row = select_row_style(
            &l_values,
            &options.rules_special_row,
            &styles.styles_rules,
            Some(styles.style_column),
        );

        for (mapping, c_text) in schema.mappings().iter().zip(&l_values) {
            let value = derive_cell_value(*c_text);
            write_cell_value(builder, row_idx, mapping.column_index, &value, style_row)?;
            if let Some(c_text) = c_text {
                tracker.observe_body(mapping.column_index, c_text);
            }
        }
        report.n_rows_body += 1;
    }

    for col_idx in schema.column_indices() {
        if template.is_some_and(|sheet| sheet.column_widths.contains_key(&col_idx)) {
            continue;
        }
        if let Some(width) = tracker.derive_width(col_idx, &options.policy_autofit) {
            builder.set_column_width(col_idx, width)?;
        }
    }

    Ok(report)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::schema::{RecordDescriptor, SpecColumn};
    use crate::spec::SpecCellFormat;
    use crate::style::{SpecStyleRule, StyleTable};

    #[derive(Debug, Default, Clone)]
    struct Item {
        id: i64,
        name: String,
        note: Option<String>,
    }

    impl SheetRecord for Item {
        fn describe(desc: &mut RecordDescriptor<Self>) {
            desc.field(SpecColumn::at(0, "id"), |r| &r.id, |r| &mut r.id)
                .field(SpecColumn::at(1, "name"), |r| &r.name, |r| &mut r.name)
                .field(SpecColumn::at(3, "note"), |r| &r.note, |r| &mut r.note);
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum EnumRecorded {
        Blank,
        Text(String),
        Number(f64),
    }

    #[derive(Default)]
    struct RecordingBuilder {
        styles: StyleTable,
        dict_cells: BTreeMap<(usize, usize), (EnumRecorded, Option<StyleId>)>,
        l_merges: Vec<SpecMergedRange>,
        dict_widths: BTreeMap<usize, f64>,
    }

    impl StyleRegistry for RecordingBuilder {
        fn register_format(&mut self, format: SpecCellFormat) -> StyleId {
            self.styles.register_format(format)
        }
    }

    impl SheetBuilder for RecordingBuilder {
        fn format(&self) -> EnumDocumentFormat {
            EnumDocumentFormat::XmlZip
        }

        fn write_blank(&mut self, row: usize, col: usize, style: Option<StyleId>) -> Result<()> {
            self.dict_cells.insert((row, col), (EnumRecorded::Blank, style));
            Ok(())
        }

        fn write_string(
            &mut self,
            row: usize,
            col: usize,
            text: &str,
            style: Option<StyleId>,
        ) -> Result<()> {
            self.dict_cells
                .insert((row, col), (EnumRecorded::Text(text.to_string()), style));
            Ok(())
        }

        fn write_number(
            &mut self,
            row: usize,
            col: usize,
            value: f64,
            style: Option<StyleId>,
        ) -> Result<()> {
            self.dict_cells
                .insert((row, col), (EnumRecorded::Number(value), style));
            Ok(())
        }

        fn merge_range(
            &mut self,
            range: &SpecMergedRange,
            text: &str,
            style: Option<StyleId>,
        ) -> Result<()> {
            self.write_string(range.row_idx_first, range.col_idx_first, text, style)?;
            self.l_merges.push(*range);
            Ok(())
        }

        fn set_column_width(&mut self, col: usize, width: f64) -> Result<()> {
            self.dict_widths.insert(col, width);
            Ok(())
        }

        fn finish(self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn derive_items() -> Vec<Item> {
        vec![
            Item {
                id: 1,
                name: "alpha".to_string(),
                note: None,
            },
            Item {
                id: 2,
                name: "007".to_string(),
                note: Some("x".to_string()),
            },
        ]
    }

    #[test]
    fn layout_shifts_rows_for_title_only_without_template() {
        let layout = plan_write_layout(3, Some("T"), 1, false);
        assert!(layout.if_title_row);
        assert_eq!(layout.row_idx_header, Some(1));
        assert_eq!(layout.row_idx_body_start, 2);

        let layout = plan_write_layout(3, None, 1, false);
        assert_eq!(layout.row_idx_header, Some(0));
        assert_eq!(layout.row_idx_body_start, 1);

        let layout = plan_write_layout(3, Some("T"), 4, true);
        assert!(!layout.if_title_row);
        assert_eq!(layout.row_idx_header, None);
        assert_eq!(layout.row_idx_body_start, 4);
    }

    #[test]
    fn populate_writes_title_header_and_typed_body() {
        let schema = resolve_record_schema::<Item>().expect("schema");
        let options = SpecWriteOptions {
            title: Some("Items".to_string()),
            ..Default::default()
        };
        let mut builder = RecordingBuilder::default();
        let report = populate_sheet(&mut builder, &derive_items(), &schema, &options, None, "S")
            .expect("populate");

        assert_eq!(report.n_rows_body, 2);
        assert!(report.warnings.is_empty());
        assert_eq!(builder.l_merges, vec![SpecMergedRange::row_span(0, 0, 3)]);
        assert_eq!(
            builder.dict_cells[&(1, 1)].0,
            EnumRecorded::Text("name".to_string())
        );
        assert_eq!(builder.dict_cells[&(2, 0)].0, EnumRecorded::Number(1.0));
        assert_eq!(builder.dict_cells[&(2, 3)].0, EnumRecorded::Blank);
        // Lexical inference: "007" is written as a number.
        assert_eq!(builder.dict_cells[&(3, 1)].0, EnumRecorded::Number(7.0));
        assert!(!builder.dict_cells.contains_key(&(2, 2)));
        assert_eq!(builder.dict_widths.get(&1), Some(&8.0));
    }

    #[test]
    fn single_column_title_is_not_merged() {
        #[derive(Debug, Default)]
        struct Only {
            code: String,
        }
        impl SheetRecord for Only {
            fn describe(desc: &mut RecordDescriptor<Self>) {
                desc.field(SpecColumn::at(0, "code"), |r| &r.code, |r| &mut r.code);
            }
        }

        let schema = resolve_record_schema::<Only>().expect("schema");
        let options = SpecWriteOptions {
            title: Some("Codes".to_string()),
            ..Default::default()
        };
        let mut builder = RecordingBuilder::default();
        let records = vec![Only {
            code: "c".to_string(),
        }];
        populate_sheet(&mut builder, &records, &schema, &options, None, "S").expect("populate");
        assert!(builder.l_merges.is_empty());
        assert_eq!(
            builder.dict_cells[&(0, 0)].0,
            EnumRecorded::Text("Codes".to_string())
        );
    }

    #[test]
    fn first_matching_rule_styles_every_cell_of_the_row() {
        let schema = resolve_record_schema::<Item>().expect("schema");
        let fmt_hit = SpecCellFormat {
            bg_color: Some("#FFEBEE".to_string()),
            ..Default::default()
        };
        let options = SpecWriteOptions {
            rules_special_row: vec![SpecStyleRule::new(|val| val == "x", fmt_hit.clone())],
            ..Default::default()
        };
        let mut builder = RecordingBuilder::default();
        populate_sheet(&mut builder, &derive_items(), &schema, &options, None, "S")
            .expect("populate");

        let style_hit = builder.styles.register_format(fmt_hit);
        for col_idx in [0, 1, 3] {
            assert_eq!(builder.dict_cells[&(2, col_idx)].1, Some(style_hit));
            assert_ne!(builder.dict_cells[&(1, col_idx)].1, Some(style_hit));
        }
    }

    fn derive_template() -> SpecTemplateSheet {
        let fmt_banner = SpecCellFormat {
            bold: Some(true),
            align: Some("center".to_string()),
            ..Default::default()
        };
        SpecTemplateSheet {
            format: EnumDocumentFormat::XmlZip,
            sheet_name: "Tpl".to_string(),
            cells: vec![
                SpecTemplateCell {
                    row_index: 0,
                    column_index: 0,
                    value: EnumCellValue::String("Custom header".to_string()),
                    format: Some(fmt_banner.clone()),
                },
                SpecTemplateCell {
                    row_index: 0,
                    column_index: 1,
                    value: EnumCellValue::None,
                    format: Some(fmt_banner),
                },
                SpecTemplateCell {
                    row_index: 1,
                    column_index: 1,
                    value: EnumCellValue::Number(3.0),
                    format: None,
                },
            ],
            merges: vec![SpecMergedRange::row_span(0, 0, 3)],
            column_widths: BTreeMap::from([(1, 30.0)]),
        }
    }

    #[test]
    fn template_skips_title_and_header() {
        let schema = resolve_record_schema::<Item>().expect("schema");
        let options = SpecWriteOptions {
            title: Some("ignored".to_string()),
            start_row: 2,
            ..Default::default()
        };
        let mut builder = RecordingBuilder::default();
        let report = populate_sheet(
            &mut builder,
            &derive_items(),
            &schema,
            &options,
            Some(&derive_template()),
            "Tpl",
        )
        .expect("populate");

        assert_eq!(report.warnings.len(), 1);
        assert_eq!(
            builder.dict_cells[&(0, 0)].0,
            EnumRecorded::Text("Custom header".to_string())
        );
        assert!(!builder.dict_cells.contains_key(&(1, 0)));
        assert_eq!(builder.dict_cells[&(2, 0)].0, EnumRecorded::Number(1.0));
    }

    #[test]
    fn template_merges_formats_and_widths_are_copied() {
        let schema = resolve_record_schema::<Item>().expect("schema");
        let options = SpecWriteOptions {
            start_row: 2,
            ..Default::default()
        };
        let mut builder = RecordingBuilder::default();
        populate_sheet(
            &mut builder,
            &derive_items(),
            &schema,
            &options,
            Some(&derive_template()),
            "Tpl",
        )
        .expect("populate");

        assert_eq!(builder.l_merges, vec![SpecMergedRange::row_span(0, 0, 3)]);
        let style_banner = builder.dict_cells[&(0, 0)].1.expect("anchor style");
        assert_eq!(builder.styles.get(style_banner).and_then(|f| f.bold), Some(true));
        assert_eq!(
            builder.dict_cells[&(0, 1)],
            (EnumRecorded::Blank, Some(style_banner))
        );
        assert_eq!(builder.dict_cells[&(1, 1)], (EnumRecorded::Number(3.0), None));
        // The template width wins over autofit for column 1 only.
        assert_eq!(builder.dict_widths.get(&1), Some(&30.0));
        assert!(builder.dict_widths.contains_key(&0));
    }

    #[test]
    fn template_body_still_takes_rules_and_column_style() {
        let schema = resolve_record_schema::<Item>().expect("schema");
        let fmt_column = SpecCellFormat {
            border: Some(2),
            ..Default::default()
        };
        let fmt_hit = SpecCellFormat {
            bg_color: Some("#FFEBEE".to_string()),
            ..Default::default()
        };
        let options = SpecWriteOptions {
            start_row: 2,
            style_column: Some(Box::new(fmt_column.clone())),
            rules_special_row: vec![SpecStyleRule::new(|val| val == "x", fmt_hit.clone())],
            ..Default::default()
        };
        let mut builder = RecordingBuilder::default();
        populate_sheet(
            &mut builder,
            &derive_items(),
            &schema,
            &options,
            Some(&derive_template()),
            "Tpl",
        )
        .expect("populate");

        let style_column = builder.styles.register_format(fmt_column);
        let style_hit = builder.styles.register_format(fmt_hit);
        for col_idx in [0, 1, 3] {
            assert_eq!(builder.dict_cells[&(2, col_idx)].1, Some(style_column));
            assert_eq!(builder.dict_cells[&(3, col_idx)].1, Some(style_hit));
        }
    }

    #[test]
    fn two_rules_style_their_rows_and_others_fall_back() {
        #[derive(Debug, Default, Clone)]
        struct Card {
            card_type: i32,
            card_secret: String,
            amount: i64,
            if_active: bool,
        }
        impl SheetRecord for Card {
            fn describe(desc: &mut RecordDescriptor<Self>) {
                desc.field(SpecColumn::at(0, "卡类型"), |r| &r.card_type, |r| &mut r.card_type)
                    .field(SpecColumn::at(1, "卡密"), |r| &r.card_secret, |r| &mut r.card_secret)
                    .field(SpecColumn::at(2, "面额"), |r| &r.amount, |r| &mut r.amount)
                    .field(SpecColumn::at(3, "启用"), |r| &r.if_active, |r| &mut r.if_active);
            }
        }

        let records: Vec<Card> = ["A", "B", "C", "D"]
            .iter()
            .enumerate()
            .map(|(n_idx, c_secret)| Card {
                card_type: n_idx as i32 + 1,
                card_secret: c_secret.to_string(),
                amount: 100,
                if_active: n_idx % 2 == 0,
            })
            .collect();
        let schema = resolve_record_schema::<Card>().expect("schema");
        let fmt_a = SpecCellFormat {
            bg_color: Some("#FFEBEE".to_string()),
            ..Default::default()
        };
        let fmt_b = SpecCellFormat {
            font_color: Some("#1565C0".to_string()),
            ..Default::default()
        };
        let options = SpecWriteOptions {
            rules_special_row: vec![
                SpecStyleRule::new(|val| val == "A", fmt_a.clone()),
                SpecStyleRule::new(|val| val == "B", fmt_b.clone()),
            ],
            ..Default::default()
        };
        let mut builder = RecordingBuilder::default();
        populate_sheet(&mut builder, &records, &schema, &options, None, "S").expect("populate");

        let style_a = builder.styles.register_format(fmt_a);
        let style_b = builder.styles.register_format(fmt_b);
        let style_column = builder
            .styles
            .register_format(derive_default_column_format());
        let l_expected = [style_a, style_b, style_column, style_column];
        for (n_idx, style_expected) in l_expected.into_iter().enumerate() {
            for col_idx in 0..4 {
                assert_eq!(
                    builder.dict_cells[&(1 + n_idx, col_idx)].1,
                    Some(style_expected),
                    "row {n_idx}, column {col_idx}"
                );
            }
        }
        assert_ne!(style_a, style_b);
        assert_ne!(style_b, style_column);
    }

    #[test]
    fn body_over_header_is_reported() {
        let schema = resolve_record_schema::<Item>().expect("schema");
        let options = SpecWriteOptions {
            start_row: 0,
            ..Default::default()
        };
        let mut builder = RecordingBuilder::default();
        let report = populate_sheet(&mut builder, &derive_items(), &schema, &options, None, "S")
            .expect("populate");
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn empty_input_is_rejected_before_any_output() {
        let mut v_sink: Vec<u8> = Vec::new();
        let err = export_records_to::<Item, _>(&[], &SpecWriteOptions::default(), &mut v_sink)
            .expect_err("empty");
        assert!(matches!(err, SheetError::EmptyInput));
        assert!(v_sink.is_empty());
    }

    #[test]
    fn missing_template_is_a_template_error() {
        let options = SpecWriteOptions {
            path_template: Some("/nonexistent/tpl.xlsx".into()),
            ..Default::default()
        };
        let err = export_records(&derive_items(), &options).expect_err("template");
        assert!(matches!(err, SheetError::Template { .. }));
    }

    #[test]
    fn legacy_row_limit_is_enforced() {
        let layout = plan_write_layout(2, None, 1, false);
        assert!(validate_layout_limits(&layout, 65_535, EnumDocumentFormat::LegacyBinary).is_ok());
        assert!(validate_layout_limits(&layout, 65_536, EnumDocumentFormat::LegacyBinary).is_err());
        assert!(validate_layout_limits(&layout, 65_536, EnumDocumentFormat::XmlZip).is_ok());
    }
}
