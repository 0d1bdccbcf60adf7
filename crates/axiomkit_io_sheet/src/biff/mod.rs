//! Legacy binary (`.xls`) container support.
//!
//! Only the BIFF8 subset needed for one flat table is covered: the writer
//! emits a single sheet with shared strings, numbers, blanks, merges, column
//! widths and cell formats; the readers walk globals and the cell records of
//! one sheet.

pub(crate) mod globals;
pub(crate) mod records;
pub(crate) mod sst;
mod workbook;

pub use workbook::BiffWorkbook;
