//! `axiomkit_io_sheet` v1:
//! Typed record exchange with XLS / XLSX spreadsheets.
//!
//! Module layout:
//! - `conf`    : constants and default presets
//! - `spec`    : specs/models/options
//! - `error`   : crate error type
//! - `schema`  : record descriptors and column mapping
//! - `value`   : cell text conversion
//! - `style`   : style registry and row rules
//! - `util`    : pure helper functions
//! - `builder` : per-format sheet builders
//! - `biff`    : legacy binary container
//! - `package` : zip package part lookup
//! - `template`: template formats, merges and widths
//! - `writer`  : record export
//! - `reader`  : eager and streaming record import
pub mod biff;
pub mod builder;
pub mod conf;
pub mod error;
mod package;
pub mod reader;
pub mod schema;
pub mod spec;
pub mod style;
pub mod template;
pub mod util;
pub mod value;
pub mod writer;

pub use builder::{BiffSheetBuilder, SheetBuilder, XlsxSheetBuilder};
pub use conf::{
    C_SHEET_NAME_DEFAULT, N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NCOLS_XLS_MAX,
    N_NROWS_EXCEL_MAX, N_NROWS_XLS_MAX, N_ROW_START_DEFAULT, TUP_EXCEL_ILLEGAL,
};
pub use error::{Result, SheetError};
pub use reader::{
    RawRowIter, RecordIter, RowSource, SheetSource, SpecSheetRow, list_sheet_names,
    open_row_source, read_raw_rows, read_records, read_records_from, sniff_document_format,
};
pub use schema::{RecordDescriptor, SheetRecord, SpecColumn, resolve_record_schema};
pub use spec::{
    EnumAutofitColumnsRule, EnumCellValue, EnumDocumentFormat, EnumParseMode,
    SpecAutofitCellsPolicy, SpecCellFormat, SpecExportReport, SpecMergedRange, SpecRawRow,
    SpecReadOptions, SpecTemplateCell, SpecTemplateSheet, SpecWriteLayout, SpecWriteOptions,
};
pub use style::{SpecStyleRule, StyleFactory, StyleId, StyleRegistry};
pub use template::load_template;
pub use util::sanitize_sheet_name;
pub use value::CellText;
pub use writer::{SpecExportedDocument, export_records, export_records_to, plan_write_layout};
