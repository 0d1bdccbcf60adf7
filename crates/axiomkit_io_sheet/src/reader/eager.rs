//! Eager traversal: the selected sheet is materialized through `calamine`.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use calamine::{Data, Range, Reader, Sheets, open_workbook_auto_from_rs};

use crate::error::{Result, SheetError};
use crate::spec::SpecReadOptions;
use crate::value::render_data_text;

use super::{RowSource, SpecSheetRow};

/// Row source over a fully parsed sheet; sheets resolve by name or index.
pub struct EagerRowSource {
    sheet_name: String,
    l_rows: std::vec::IntoIter<SpecSheetRow>,
}

impl EagerRowSource {
    /// Parse the document and materialize the sheet selected by `options`.
    ///
    /// A configured sheet name wins over the index.
    pub fn open<R: Read>(reader: R, options: &SpecReadOptions) -> Result<Self> {
        let mut workbook = open_workbook_from(reader)?;
        let l_sheet_names = workbook.sheet_names();

        let sheet_name = match options.sheet_name.as_deref() {
            Some(c_name) => l_sheet_names
                .iter()
                .find(|c_sheet| c_sheet.as_str() == c_name)
                .cloned()
                .ok_or_else(|| SheetError::codec(format!("sheet {c_name:?} not found")))?,
            None => {
                let n_idx_sheet = options.derive_sheet_index();
                l_sheet_names.get(n_idx_sheet).cloned().ok_or_else(|| {
                    SheetError::codec(format!(
                        "sheet index {n_idx_sheet} out of range ({} sheet(s))",
                        l_sheet_names.len()
                    ))
                })?
            }
        };

        let range = workbook.worksheet_range(&sheet_name)?;
        let l_rows = collect_sheet_rows(&range);
        log::debug!(
            "Materialized sheet {sheet_name:?}: {} non-empty row(s).",
            l_rows.len()
        );
        Ok(Self {
            sheet_name,
            l_rows: l_rows.into_iter(),
        })
    }

    /// Name of the materialized sheet.
    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    /// Sheet names of a document, in workbook order.
    pub fn list_sheet_names<R: Read>(reader: R) -> Result<Vec<String>> {
        Ok(open_workbook_from(reader)?.sheet_names())
    }
}

impl RowSource for EagerRowSource {
    fn next_row(&mut self) -> Result<Option<SpecSheetRow>> {
        Ok(self.l_rows.next())
    }
}

fn open_workbook_from<R: Read>(mut reader: R) -> Result<Sheets<Cursor<Vec<u8>>>> {
    let mut v_bytes = Vec::new();
    reader.read_to_end(&mut v_bytes)?;
    Ok(open_workbook_auto_from_rs(Cursor::new(v_bytes))?)
}

fn collect_sheet_rows(range: &Range<Data>) -> Vec<SpecSheetRow> {
    let (n_row_offset, n_col_offset) = range.start().unwrap_or((0, 0));
    let mut dict_rows: BTreeMap<usize, BTreeMap<usize, String>> = BTreeMap::new();
    for (row_idx, col_idx, data) in range.used_cells() {
        if let Some(c_text) = render_data_text(data) {
            dict_rows
                .entry(n_row_offset as usize + row_idx)
                .or_default()
                .insert(n_col_offset as usize + col_idx, c_text);
        }
    }
    dict_rows
        .into_iter()
        .map(|(row_index, cells)| SpecSheetRow { row_index, cells })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{SheetBuilder, XlsxSheetBuilder};

    fn derive_document() -> Vec<u8> {
        let mut builder = XlsxSheetBuilder::new("Data").expect("builder");
        builder.write_string(0, 0, "id", None).expect("write");
        builder.write_number(2, 0, 7.0, None).expect("write");
        builder.write_string(2, 2, "", None).expect("write");
        builder.write_string(3, 2, "z", None).expect("write");
        builder.finish().expect("finish")
    }

    #[test]
    fn eager_source_yields_non_empty_rows_with_absolute_indices() {
        let options = SpecReadOptions::default();
        let mut source = EagerRowSource::open(Cursor::new(derive_document()), &options)
            .expect("open");
        assert_eq!(source.sheet_name(), "Data");

        let row = source.next_row().expect("row").expect("some");
        assert_eq!(row.row_index, 0);
        let row = source.next_row().expect("row").expect("some");
        assert_eq!(row.row_index, 2);
        assert_eq!(row.cells.get(&0).map(String::as_str), Some("7"));
        assert!(!row.cells.contains_key(&2));
        let row = source.next_row().expect("row").expect("some");
        assert_eq!((row.row_index, row.cells.len()), (3, 1));
        assert!(source.next_row().expect("end").is_none());
    }

    #[test]
    fn eager_source_resolves_sheets_by_name() {
        let options = SpecReadOptions {
            sheet_name: Some("Missing".to_string()),
            ..Default::default()
        };
        assert!(EagerRowSource::open(Cursor::new(derive_document()), &options).is_err());

        let names = EagerRowSource::list_sheet_names(Cursor::new(derive_document()))
            .expect("names");
        assert_eq!(names, vec!["Data".to_string()]);
    }
}
