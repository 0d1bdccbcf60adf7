//! Template documents: values, cell formats, merged regions and column widths
//! of the first sheet.
//!
//! Values come through calamine; formats, merges and widths are read from the
//! container itself (`styles.xml` plus the worksheet part for `.xlsx`, the
//! FONT/FORMAT/XF globals plus the sheet records for `.xls`).

mod biff;
mod xlsx;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use calamine::{Reader, open_workbook_auto};

use crate::error::{BoxError, Result, SheetError};
use crate::spec::{
    EnumCellValue, EnumDocumentFormat, SpecCellFormat, SpecMergedRange, SpecTemplateCell,
    SpecTemplateSheet,
};
use crate::value::derive_cell_value_from_data;

/// Formats, merges and widths of one sheet, keyed by absolute position.
#[derive(Debug, Clone, Default, PartialEq)]
struct SpecTemplateLayout {
    dict_formats: BTreeMap<(usize, usize), SpecCellFormat>,
    merges: Vec<SpecMergedRange>,
    column_widths: BTreeMap<usize, f64>,
}

impl SpecTemplateLayout {
    fn place_format(&mut self, row_idx: usize, col_idx: usize, format: Option<SpecCellFormat>) {
        match format {
            Some(format) => {
                self.dict_formats.insert((row_idx, col_idx), format);
            }
            None => {
                self.dict_formats.remove(&(row_idx, col_idx));
            }
        }
    }
}

/// Read the first sheet of a template document.
///
/// Each kept cell carries its value and its format; formatted blanks are kept
/// too. Row heights, theme colors and conditional formats are not read.
pub fn load_template(path: &Path) -> Result<SpecTemplateSheet> {
    let derive_template_error = |message: &str, source: Option<BoxError>| SheetError::Template {
        path: path.to_path_buf(),
        message: message.to_string(),
        source,
    };

    if !path.is_file() {
        return Err(derive_template_error("template file not found", None));
    }
    let mut workbook = open_workbook_auto(path)
        .map_err(|err| derive_template_error("template cannot be opened", Some(Box::new(err))))?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| derive_template_error("template has no sheet", None))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| derive_template_error("template has no sheet", None))?
        .map_err(|err| {
            derive_template_error("template sheet cannot be read", Some(Box::new(err)))
        })?;

    let format = EnumDocumentFormat::from_path(path);
    let file = File::open(path)?;
    let layout = match format {
        EnumDocumentFormat::XmlZip => xlsx::read_template_layout(BufReader::new(file)),
        EnumDocumentFormat::LegacyBinary => biff::read_template_layout(BufReader::new(file)),
    }
    .map_err(|err| derive_template_error("template layout cannot be read", Some(Box::new(err))))?;

    let (n_row_offset, n_col_offset) = range.start().unwrap_or((0, 0));
    let mut dict_values: BTreeMap<(usize, usize), EnumCellValue> = range
        .used_cells()
        .map(|(row_idx, col_idx, data)| {
            (
                (
                    n_row_offset as usize + row_idx,
                    n_col_offset as usize + col_idx,
                ),
                derive_cell_value_from_data(data),
            )
        })
        .filter(|(_, value)| *value != EnumCellValue::None)
        .collect();

    let SpecTemplateLayout {
        mut dict_formats,
        merges,
        column_widths,
    } = layout;
    let mut l_keys: Vec<(usize, usize)> = dict_values.keys().copied().collect();
    l_keys.extend(dict_formats.keys().copied());
    l_keys.sort_unstable();
    l_keys.dedup();
    let cells: Vec<SpecTemplateCell> = l_keys
        .into_iter()
        .map(|(row_idx, col_idx)| SpecTemplateCell {
            row_index: row_idx,
            column_index: col_idx,
            value: dict_values
                .remove(&(row_idx, col_idx))
                .unwrap_or(EnumCellValue::None),
            format: dict_formats.remove(&(row_idx, col_idx)),
        })
        .collect();

    log::debug!(
        "Loaded template {} (sheet {sheet_name:?}, {} cell(s), {} merge(s), {} width(s)).",
        path.display(),
        cells.len(),
        merges.len(),
        column_widths.len()
    );
    Ok(SpecTemplateSheet {
        format,
        sheet_name,
        cells,
        merges,
        column_widths,
    })
}
