//! Import kernel: row sources, row alignment and the lazy record sequence.
//!
//! Every traversal strategy implements [`RowSource`] and yields the rows that
//! hold at least one non-empty cell. [`RowAligner`] turns that sparse stream
//! into the dense [`SpecRawRow`] sequence, so eager and streaming reads of the
//! same sheet produce identical rows.

mod biff_stream;
mod eager;
mod xlsx_stream;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Result, SheetError};
use crate::schema::{SheetRecord, SpecRecordSchema, resolve_record_schema};
use crate::spec::{EnumDocumentFormat, EnumParseMode, SpecRawRow, SpecReadOptions};

pub use biff_stream::BiffStreamRowSource;
pub use eager::EagerRowSource;
pub use xlsx_stream::XlsxStreamRowSource;

/// Owned, seekable document handle consumed by a read.
pub trait SheetSource: Read + Seek + 'static {}

impl<R: Read + Seek + 'static> SheetSource for R {}

////////////////////////////////////////////////////////////////////////////////
// #region RowSource

/// One sheet row holding at least one non-empty cell.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecSheetRow {
    /// Zero-based sheet row index.
    pub row_index: usize,
    /// Column index to non-empty cell text.
    pub cells: BTreeMap<usize, String>,
}

/// Forward-only producer of non-empty sheet rows in ascending row order.
pub trait RowSource {
    /// Next row, `None` after the last one.
    fn next_row(&mut self) -> Result<Option<SpecSheetRow>>;
}

/// Sniff the container from the first bytes of `reader` and rewind it.
pub fn sniff_document_format<R: Read + Seek>(reader: &mut R) -> Result<EnumDocumentFormat> {
    let mut v_head = [0u8; 8];
    let mut n_read = 0;
    while n_read < v_head.len() {
        let n = reader.read(&mut v_head[n_read..])?;
        if n == 0 {
            break;
        }
        n_read += n;
    }
    reader.seek(SeekFrom::Start(0))?;
    EnumDocumentFormat::from_magic(&v_head[..n_read])
        .ok_or_else(|| SheetError::codec("unrecognized spreadsheet container"))
}

/// Open the row source selected by `options.parse_mode`.
pub fn open_row_source<R: SheetSource>(
    mut reader: R,
    options: &SpecReadOptions,
) -> Result<Box<dyn RowSource>> {
    let format = sniff_document_format(&mut reader)?;
    log::debug!(
        "Opening {:?} row source over a {} document.",
        options.parse_mode,
        format.file_extension()
    );
    match options.parse_mode {
        EnumParseMode::Eager => Ok(Box::new(EagerRowSource::open(reader, options)?)),
        EnumParseMode::Streaming => {
            if options.sheet_index.is_none() && options.sheet_name.is_some() {
                return Err(SheetError::codec(
                    "streaming reads select sheets by index only; set sheet_index",
                ));
            }
            let n_idx_sheet = options.derive_sheet_index();
            match format {
                EnumDocumentFormat::XmlZip => {
                    Ok(Box::new(XlsxStreamRowSource::open(reader, n_idx_sheet)?))
                }
                EnumDocumentFormat::LegacyBinary => {
                    Ok(Box::new(BiffStreamRowSource::open(reader, n_idx_sheet)?))
                }
            }
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RowAlignment

/// Dense, schema-restricted view over a [`RowSource`].
///
/// Rows start at `start_row_index`; gaps between non-empty rows come out as
/// all-blank rows and the sequence ends after the last non-empty row.
pub struct RowAligner {
    source: Box<dyn RowSource>,
    l_col_idx: Vec<usize>,
    n_row_start: usize,
    n_row_next: usize,
    pending: Option<SpecSheetRow>,
}

impl RowAligner {
    /// Align `source` to `column_indices`, starting at `start_row_index`.
    pub fn new(
        source: Box<dyn RowSource>,
        column_indices: &[usize],
        start_row_index: usize,
    ) -> Self {
        Self {
            source,
            l_col_idx: column_indices.to_vec(),
            n_row_start: start_row_index,
            n_row_next: start_row_index,
            pending: None,
        }
    }

    fn pull_pending(&mut self) -> Result<Option<&SpecSheetRow>> {
        while self.pending.is_none() {
            let Some(row) = self.source.next_row()? else {
                return Ok(None);
            };
            if row.row_index >= self.n_row_next {
                self.pending = Some(row);
            } else if row.row_index >= self.n_row_start {
                log::warn!("Dropping out-of-order row {}.", row.row_index);
            }
        }
        Ok(self.pending.as_ref())
    }

    fn derive_raw_row(
        &self,
        row_index: usize,
        cells: Option<&BTreeMap<usize, String>>,
    ) -> SpecRawRow {
        SpecRawRow {
            row_index,
            values: self
                .l_col_idx
                .iter()
                .map(|col_idx| {
                    let c_text = cells.and_then(|cells| cells.get(col_idx)).cloned();
                    (*col_idx, c_text)
                })
                .collect(),
        }
    }

    /// Next dense row, `None` after the last non-empty row.
    pub fn next_raw_row(&mut self) -> Result<Option<SpecRawRow>> {
        let n_row_pending = match self.pull_pending()? {
            Some(row) => row.row_index,
            None => return Ok(None),
        };
        let n_row = self.n_row_next;
        self.n_row_next += 1;
        if n_row < n_row_pending {
            return Ok(Some(self.derive_raw_row(n_row, None)));
        }
        let row = self.pending.take();
        Ok(Some(self.derive_raw_row(n_row, row.as_ref().map(|row| &row.cells))))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region LazySequences

/// Lazy, single-pass sequence of raw rows.
///
/// The source is released when the sequence is exhausted, fails, is closed or
/// is dropped.
pub struct RawRowIter {
    aligner: Option<RowAligner>,
}

impl RawRowIter {
    /// Release the source; later pulls yield `None`.
    pub fn close(&mut self) {
        self.aligner = None;
    }
}

impl Iterator for RawRowIter {
    type Item = Result<SpecRawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        let aligner = self.aligner.as_mut()?;
        match aligner.next_raw_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.aligner = None;
                None
            }
            Err(err) => {
                self.aligner = None;
                Some(Err(err))
            }
        }
    }
}

/// Lazy, single-pass sequence of records assembled from sheet rows.
///
/// Conversion and container failures surface at the row being pulled; the
/// sequence then ends and the source is released.
pub struct RecordIter<T> {
    schema: SpecRecordSchema<T>,
    rows: RawRowIter,
}

impl<T> RecordIter<T> {
    /// Release the source; later pulls yield `None`.
    pub fn close(&mut self) {
        self.rows.close();
    }
}

impl<T: SheetRecord> Iterator for RecordIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.rows.next()? {
            Ok(row) => row,
            Err(err) => return Some(Err(err)),
        };
        let record = self.schema.assemble(&row);
        if record.is_err() {
            self.rows.close();
        }
        Some(record)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReadEntry

/// Read dense rows of the columns in `column_indices` from `reader`.
pub fn read_raw_rows<R: SheetSource>(
    reader: R,
    column_indices: &[usize],
    options: &SpecReadOptions,
) -> Result<RawRowIter> {
    let source = open_row_source(reader, options)?;
    Ok(RawRowIter {
        aligner: Some(RowAligner::new(source, column_indices, options.start_row_index)),
    })
}

/// Read records of type `T` from any seekable handle.
pub fn read_records_from<T: SheetRecord, R: SheetSource>(
    reader: R,
    options: &SpecReadOptions,
) -> Result<RecordIter<T>> {
    let schema = resolve_record_schema::<T>()?;
    let rows = read_raw_rows(reader, &schema.column_indices(), options)?;
    Ok(RecordIter { schema, rows })
}

/// Read records of type `T` from a document on disk.
pub fn read_records<T: SheetRecord>(
    path: impl AsRef<Path>,
    options: &SpecReadOptions,
) -> Result<RecordIter<T>> {
    let file = File::open(path.as_ref())?;
    read_records_from(BufReader::new(file), options)
}

/// Sheet names of a document, in workbook order.
pub fn list_sheet_names<R: SheetSource>(reader: R) -> Result<Vec<String>> {
    EagerRowSource::list_sheet_names(reader)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    struct VecRowSource {
        l_rows: std::vec::IntoIter<SpecSheetRow>,
        if_fail_at_end: bool,
    }

    impl RowSource for VecRowSource {
        fn next_row(&mut self) -> Result<Option<SpecSheetRow>> {
            match self.l_rows.next() {
                Some(row) => Ok(Some(row)),
                None if self.if_fail_at_end => Err(SheetError::codec("truncated")),
                None => Ok(None),
            }
        }
    }

    fn derive_row(row_index: usize, cells: &[(usize, &str)]) -> SpecSheetRow {
        SpecSheetRow {
            row_index,
            cells: cells
                .iter()
                .map(|(col, val)| (*col, val.to_string()))
                .collect(),
        }
    }

    fn derive_source(l_rows: Vec<SpecSheetRow>, if_fail_at_end: bool) -> Box<dyn RowSource> {
        Box::new(VecRowSource {
            l_rows: l_rows.into_iter(),
            if_fail_at_end,
        })
    }

    #[test]
    fn aligner_fills_gaps_and_restricts_columns() {
        let source = derive_source(
            vec![
                derive_row(0, &[(0, "id"), (1, "name")]),
                derive_row(1, &[(0, "1"), (1, "a"), (7, "extra")]),
                derive_row(3, &[(1, "c")]),
            ],
            false,
        );
        let mut aligner = RowAligner::new(source, &[0, 1], 1);

        let row = aligner.next_raw_row().expect("row").expect("some");
        assert_eq!(row.row_index, 1);
        assert_eq!(row.get(0), Some("1"));
        assert_eq!(row.values.len(), 2);

        let row = aligner.next_raw_row().expect("row").expect("some");
        assert_eq!(row.row_index, 2);
        assert!(row.is_blank());

        let row = aligner.next_raw_row().expect("row").expect("some");
        assert_eq!((row.row_index, row.get(0), row.get(1)), (3, None, Some("c")));

        assert!(aligner.next_raw_row().expect("end").is_none());
    }

    #[test]
    fn rows_outside_schema_columns_still_extend_the_sequence() {
        let source = derive_source(vec![derive_row(2, &[(9, "note")])], false);
        let mut iter = RawRowIter {
            aligner: Some(RowAligner::new(source, &[0], 1)),
        };
        let l_rows: Vec<SpecRawRow> = iter.by_ref().map(|row| row.expect("row")).collect();
        assert_eq!(l_rows.len(), 2);
        assert!(l_rows.iter().all(SpecRawRow::is_blank));
    }

    #[test]
    fn out_of_order_rows_are_dropped() {
        let source = derive_source(
            vec![derive_row(2, &[(0, "b")]), derive_row(1, &[(0, "a")])],
            false,
        );
        let mut aligner = RowAligner::new(source, &[0], 1);
        let row = aligner.next_raw_row().expect("row").expect("some");
        assert!(row.is_blank());
        let row = aligner.next_raw_row().expect("row").expect("some");
        assert_eq!(row.get(0), Some("b"));
        assert!(aligner.next_raw_row().expect("end").is_none());
    }

    #[test]
    fn failure_surfaces_at_pull_and_releases_source() {
        let source = derive_source(vec![derive_row(1, &[(0, "a")])], true);
        let mut iter = RawRowIter {
            aligner: Some(RowAligner::new(source, &[0], 1)),
        };
        assert!(iter.next().expect("first").is_ok());
        assert!(iter.next().expect("second").is_err());
        assert!(iter.aligner.is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn unknown_container_is_a_codec_error() {
        let err = read_raw_rows(
            std::io::Cursor::new(b"id,name\n1,a\n".to_vec()),
            &[0],
            &SpecReadOptions::default(),
        )
        .err()
        .expect("codec");
        assert!(matches!(err, SheetError::Codec { .. }));
    }
}
