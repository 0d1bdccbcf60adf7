//! Record description, column-mapping resolution and row assembly.
//!
//! A record type lists its exported fields once in [`SheetRecord::describe`];
//! every export/import call resolves a fresh [`SpecRecordSchema`] from it.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, SheetError};
use crate::spec::SpecRawRow;
use crate::value::CellText;

type FnRender<T> = Box<dyn Fn(&T) -> Option<String>>;
type FnAssign<T> = Box<dyn Fn(&mut T, &str) -> std::result::Result<(), String>>;

////////////////////////////////////////////////////////////////////////////////
// #region RecordDescription

/// Per-field export metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecColumn {
    /// Zero-based sheet column.
    pub column_index: usize,
    /// Header text.
    pub column_name: String,
    /// Whether the field takes part in export/import.
    pub if_included: bool,
}

impl SpecColumn {
    /// Included column at `column_index` titled `column_name`.
    pub fn at(column_index: usize, column_name: impl Into<String>) -> Self {
        Self {
            column_index,
            column_name: column_name.into(),
            if_included: true,
        }
    }

    /// Keep the declaration but leave the field out of the sheet.
    pub fn excluded(mut self) -> Self {
        self.if_included = false;
        self
    }
}

/// A record type that can be written to and read from sheet rows.
pub trait SheetRecord: Default + 'static {
    /// Declare the exported fields of this type.
    fn describe(desc: &mut RecordDescriptor<Self>);
}

struct SpecFieldDescriptor<T> {
    column: SpecColumn,
    render: FnRender<T>,
    assign: FnAssign<T>,
}

/// Field declarations collected from [`SheetRecord::describe`].
pub struct RecordDescriptor<T> {
    l_fields: Vec<SpecFieldDescriptor<T>>,
}

impl<T: 'static> RecordDescriptor<T> {
    fn new() -> Self {
        Self {
            l_fields: Vec::new(),
        }
    }

    /// Declare a field through shared/mutable accessors; conversion uses [`CellText`].
    pub fn field<V, G, S>(&mut self, column: SpecColumn, get: G, get_mut: S) -> &mut Self
    where
        V: CellText + 'static,
        G: Fn(&T) -> &V + 'static,
        S: Fn(&mut T) -> &mut V + 'static,
    {
        self.l_fields.push(SpecFieldDescriptor {
            column,
            render: Box::new(move |record: &T| get(record).to_cell_text()),
            assign: Box::new(move |record: &mut T, text: &str| {
                *get_mut(record) = V::from_cell_text(text)?;
                Ok(())
            }),
        });
        self
    }

    /// Declare a field with hand-written conversions.
    pub fn field_with<R, A>(&mut self, column: SpecColumn, render: R, assign: A) -> &mut Self
    where
        R: Fn(&T) -> Option<String> + 'static,
        A: Fn(&mut T, &str) -> std::result::Result<(), String> + 'static,
    {
        self.l_fields.push(SpecFieldDescriptor {
            column,
            render: Box::new(render),
            assign: Box::new(assign),
        });
        self
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SchemaResolution

/// One resolved field <-> column mapping.
pub struct SpecFieldMapping<T> {
    /// Zero-based sheet column.
    pub column_index: usize,
    /// Header text.
    pub column_name: String,
    render: FnRender<T>,
    assign: FnAssign<T>,
}

impl<T> SpecFieldMapping<T> {
    /// Render the field of `record` as cell text.
    pub fn render(&self, record: &T) -> Option<String> {
        (self.render)(record)
    }

    /// Parse `text` into the field of `record`.
    pub fn assign(&self, record: &mut T, text: &str) -> std::result::Result<(), String> {
        (self.assign)(record, text)
    }
}

impl<T> fmt::Debug for SpecFieldMapping<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecFieldMapping")
            .field("column_index", &self.column_index)
            .field("column_name", &self.column_name)
            .finish_non_exhaustive()
    }
}

/// Ordered column mapping of one record type, built per call.
#[derive(Debug)]
pub struct SpecRecordSchema<T> {
    l_mappings: Vec<SpecFieldMapping<T>>,
}

/// Resolve the column mapping of `T`.
///
/// Mappings are sorted by ascending column index. Excluded fields are dropped;
/// an empty result or a column index claimed twice is a schema error.
pub fn resolve_record_schema<T: SheetRecord>() -> Result<SpecRecordSchema<T>> {
    let mut desc = RecordDescriptor::<T>::new();
    T::describe(&mut desc);

    let mut l_mappings: Vec<SpecFieldMapping<T>> = desc
        .l_fields
        .into_iter()
        .filter(|field| field.column.if_included)
        .map(|field| SpecFieldMapping {
            column_index: field.column.column_index,
            column_name: field.column.column_name,
            render: field.render,
            assign: field.assign,
        })
        .collect();

    if l_mappings.is_empty() {
        return Err(SheetError::Schema(format!(
            "Record type `{}` declares no exportable fields.",
            std::any::type_name::<T>()
        )));
    }

    l_mappings.sort_by_key(|mapping| mapping.column_index);

    let mut dict_name_by_idx: BTreeMap<usize, &str> = BTreeMap::new();
    for mapping in &l_mappings {
        if let Some(c_name_prev) =
            dict_name_by_idx.insert(mapping.column_index, mapping.column_name.as_str())
        {
            return Err(SheetError::Schema(format!(
                "Record type `{}` maps both {c_name_prev:?} and {:?} to column {}.",
                std::any::type_name::<T>(),
                mapping.column_name,
                mapping.column_index
            )));
        }
    }

    log::debug!(
        "Resolved schema for `{}`: {} column(s).",
        std::any::type_name::<T>(),
        l_mappings.len()
    );
    Ok(SpecRecordSchema { l_mappings })
}

impl<T> SpecRecordSchema<T> {
    /// Mappings in column order.
    pub fn mappings(&self) -> &[SpecFieldMapping<T>] {
        &self.l_mappings
    }

    /// Mapped column indices in column order.
    pub fn column_indices(&self) -> Vec<usize> {
        self.l_mappings
            .iter()
            .map(|mapping| mapping.column_index)
            .collect()
    }

    /// Largest mapped column index.
    pub fn col_idx_max(&self) -> usize {
        self.l_mappings
            .iter()
            .map(|mapping| mapping.column_index)
            .max()
            .unwrap_or(0)
    }

    /// Render every mapped field of `record`, in column order.
    pub fn render_row(&self, record: &T) -> Vec<Option<String>> {
        self.l_mappings
            .iter()
            .map(|mapping| mapping.render(record))
            .collect()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RecordAssembly

impl<T: Default> SpecRecordSchema<T> {
    /// Build one record from a traversed row.
    ///
    /// Blank columns keep the field default, so an all-blank row still yields
    /// a default record.
    pub fn assemble(&self, row: &SpecRawRow) -> Result<T> {
        let mut record = T::default();
        for mapping in &self.l_mappings {
            let Some(c_text) = row.get(mapping.column_index) else {
                continue;
            };
            mapping
                .assign(&mut record, c_text)
                .map_err(|message| SheetError::Conversion {
                    row_index: row.row_index,
                    column_index: mapping.column_index,
                    column_name: mapping.column_name.clone(),
                    message,
                })?;
        }
        Ok(record)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Sample {
        id: i32,
        code: String,
        amount: f64,
        note: Option<String>,
        internal: u8,
    }

    impl SheetRecord for Sample {
        fn describe(desc: &mut RecordDescriptor<Self>) {
            desc.field(SpecColumn::at(2, "amount"), |r| &r.amount, |r| &mut r.amount)
                .field(SpecColumn::at(0, "id"), |r| &r.id, |r| &mut r.id)
                .field(SpecColumn::at(5, "note"), |r| &r.note, |r| &mut r.note)
                .field(SpecColumn::at(1, "code"), |r| &r.code, |r| &mut r.code)
                .field(
                    SpecColumn::at(3, "internal").excluded(),
                    |r| &r.internal,
                    |r| &mut r.internal,
                );
        }
    }

    #[derive(Debug, Default)]
    struct NoColumns;

    impl SheetRecord for NoColumns {
        fn describe(_desc: &mut RecordDescriptor<Self>) {}
    }

    #[derive(Debug, Default)]
    struct Clash {
        a: i32,
        b: i32,
    }

    impl SheetRecord for Clash {
        fn describe(desc: &mut RecordDescriptor<Self>) {
            desc.field(SpecColumn::at(1, "a"), |r| &r.a, |r| &mut r.a)
                .field(SpecColumn::at(1, "b"), |r| &r.b, |r| &mut r.b);
        }
    }

    fn derive_row(row_index: usize, cells: &[(usize, Option<&str>)]) -> SpecRawRow {
        SpecRawRow {
            row_index,
            values: cells
                .iter()
                .map(|(col, val)| (*col, val.map(str::to_string)))
                .collect(),
        }
    }

    #[test]
    fn schema_orders_by_column_and_skips_excluded() {
        let schema = resolve_record_schema::<Sample>().expect("schema");
        assert_eq!(schema.column_indices(), vec![0, 1, 2, 5]);
        let l_names: Vec<&str> = schema
            .mappings()
            .iter()
            .map(|mapping| mapping.column_name.as_str())
            .collect();
        assert_eq!(l_names, vec!["id", "code", "amount", "note"]);
        assert_eq!(schema.col_idx_max(), 5);
    }

    #[test]
    fn empty_and_clashing_schemas_are_rejected() {
        assert!(matches!(
            resolve_record_schema::<NoColumns>(),
            Err(SheetError::Schema(_))
        ));
        let err = resolve_record_schema::<Clash>().expect_err("clash");
        assert!(err.to_string().contains("column 1"));
    }

    #[test]
    fn render_row_follows_column_order() {
        let schema = resolve_record_schema::<Sample>().expect("schema");
        let record = Sample {
            id: 7,
            code: "X".to_string(),
            amount: 2.5,
            note: None,
            internal: 9,
        };
        assert_eq!(
            schema.render_row(&record),
            vec![
                Some("7".to_string()),
                Some("X".to_string()),
                Some("2.5".to_string()),
                None
            ]
        );
    }

    #[test]
    fn assemble_fills_present_columns_and_keeps_defaults() {
        let schema = resolve_record_schema::<Sample>().expect("schema");
        let row = derive_row(
            3,
            &[(0, Some("7")), (1, Some("X")), (2, None), (3, Some("99")), (5, Some("n"))],
        );
        let record = schema.assemble(&row).expect("assemble");
        assert_eq!(
            record,
            Sample {
                id: 7,
                code: "X".to_string(),
                amount: 0.0,
                note: Some("n".to_string()),
                internal: 0,
            }
        );

        let blank = schema.assemble(&derive_row(4, &[(0, None)])).expect("blank");
        assert_eq!(blank, Sample::default());
    }

    #[test]
    fn assemble_reports_conversion_context() {
        let schema = resolve_record_schema::<Sample>().expect("schema");
        let err = schema
            .assemble(&derive_row(6, &[(0, Some("seven"))]))
            .expect_err("bad id");
        match err {
            SheetError::Conversion {
                row_index,
                column_index,
                column_name,
                ..
            } => {
                assert_eq!((row_index, column_index), (6, 0));
                assert_eq!(column_name, "id");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
