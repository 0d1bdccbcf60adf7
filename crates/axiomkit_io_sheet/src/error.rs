//! Error taxonomy shared by the export and import pipelines.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed underlying cause carried by codec failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level failure of one export or import call.
#[derive(Debug, Error)]
pub enum SheetError {
    /// Export was called with zero records.
    #[error("Export record sequence is empty.")]
    EmptyInput,

    /// Record type has no usable column mapping.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Template document could not be located or opened.
    #[error("Template error ({}): {message}", path.display())]
    Template {
        /// Configured template path.
        path: PathBuf,
        /// Failure description.
        message: String,
        /// Underlying cause, when one exists.
        #[source]
        source: Option<BoxError>,
    },

    /// Container failed to parse or serialize.
    #[error("Codec error: {message}")]
    Codec {
        /// Failure description.
        message: String,
        /// Underlying cause, when one exists.
        #[source]
        source: Option<BoxError>,
    },

    /// Cell text could not be converted into the target field type.
    #[error(
        "Conversion error at row {row_index}, column {column_index} ({column_name:?}): {message}"
    )]
    Conversion {
        /// Zero-based sheet row index.
        row_index: usize,
        /// Zero-based sheet column index.
        column_index: usize,
        /// Declared column header name.
        column_name: String,
        /// Parser message.
        message: String,
    },

    /// Source/sink acquisition or read/write failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SheetError>;

impl SheetError {
    /// Codec failure without an underlying cause.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
            source: None,
        }
    }

    /// Codec failure wrapping an underlying cause.
    pub fn codec_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Codec {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

impl From<rust_xlsxwriter::XlsxError> for SheetError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        Self::codec_with(format!("xlsx write error: {err}"), err)
    }
}

impl From<calamine::Error> for SheetError {
    fn from(err: calamine::Error) -> Self {
        Self::codec_with(format!("workbook parse error: {err}"), err)
    }
}

impl From<zip::result::ZipError> for SheetError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::codec_with(format!("zip container error: {err}"), err)
    }
}

impl From<quick_xml::Error> for SheetError {
    fn from(err: quick_xml::Error) -> Self {
        Self::codec_with(format!("xml parse error: {err}"), err)
    }
}

impl From<quick_xml::events::attributes::AttrError> for SheetError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::codec_with(format!("xml attribute error: {err}"), err)
    }
}

#[cfg(test)]
mod tests {
    use super::SheetError;

    #[test]
    fn codec_error_keeps_source_chain() {
        let io = std::io::Error::other("disk gone");
        let err = SheetError::codec_with("serialize failed", io);
        assert_eq!(err.to_string(), "Codec error: serialize failed");
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "disk gone");
    }

    #[test]
    fn io_error_converts_with_question_mark() {
        fn fail() -> super::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"))?;
            Ok(())
        }
        assert!(matches!(fail(), Err(SheetError::Io(_))));
    }
}
