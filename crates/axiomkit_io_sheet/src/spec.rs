//! Shared specification models: formats, options, layouts and rows.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::conf::{C_SHEET_NAME_DEFAULT, N_ROW_START_DEFAULT};
use crate::style::{SpecStyleRule, StyleFactory};

////////////////////////////////////////////////////////////////////////////////
// #region CellFormatSpecification

/// Declarative cell format; builders translate it into container styles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SpecCellFormat {
    /// Font family name.
    pub font_name: Option<String>,
    /// Font size in points.
    pub font_size: Option<i64>,
    /// Bold style.
    pub bold: Option<bool>,
    /// Italic style.
    pub italic: Option<bool>,

    /// Horizontal alignment.
    pub align: Option<String>,
    /// Vertical alignment.
    pub valign: Option<String>,
    /// Border style for all sides.
    pub border: Option<i64>,
    /// Text wrap.
    pub text_wrap: Option<bool>,

    /// Top border override.
    pub top: Option<i64>,
    /// Bottom border override.
    pub bottom: Option<i64>,
    /// Left border override.
    pub left: Option<i64>,
    /// Right border override.
    pub right: Option<i64>,

    /// Number format code.
    pub num_format: Option<String>,
    /// Background fill color (`#RRGGBB`).
    pub bg_color: Option<String>,
    /// Font color (`#RRGGBB`).
    pub font_color: Option<String>,
}

impl SpecCellFormat {
    /// Return a new format by overlaying `patch` onto `self`.
    pub fn with_(&self, patch: SpecCellFormat) -> SpecCellFormat {
        self.merge(&patch)
    }

    /// Merge two formats with right-side non-`None` overwrite semantics.
    pub fn merge(&self, other: &SpecCellFormat) -> SpecCellFormat {
        SpecCellFormat {
            font_name: other.font_name.clone().or_else(|| self.font_name.clone()),
            font_size: other.font_size.or(self.font_size),
            bold: other.bold.or(self.bold),
            italic: other.italic.or(self.italic),
            align: other.align.clone().or_else(|| self.align.clone()),
            valign: other.valign.clone().or_else(|| self.valign.clone()),
            border: other.border.or(self.border),
            text_wrap: other.text_wrap.or(self.text_wrap),
            top: other.top.or(self.top),
            bottom: other.bottom.or(self.bottom),
            left: other.left.or(self.left),
            right: other.right.or(self.right),
            num_format: other.num_format.clone().or_else(|| self.num_format.clone()),
            bg_color: other.bg_color.clone().or_else(|| self.bg_color.clone()),
            font_color: other.font_color.clone().or_else(|| self.font_color.clone()),
        }
    }

    /// Effective border style per side (`top`, `bottom`, `left`, `right`).
    pub fn derive_border_sides(&self) -> [i64; 4] {
        let n_all = self.border.unwrap_or(0);
        [
            self.top.unwrap_or(n_all),
            self.bottom.unwrap_or(n_all),
            self.left.unwrap_or(n_all),
            self.right.unwrap_or(n_all),
        ]
    }
}

/// Normalized cell value during the write pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumCellValue {
    /// Missing/blank value.
    None,
    /// Text value.
    String(String),
    /// Numeric value.
    Number(f64),
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ContainerAndModes

/// Spreadsheet container variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EnumDocumentFormat {
    /// Legacy binary workbook (BIFF8 inside an OLE compound file, `.xls`).
    #[default]
    LegacyBinary,
    /// Zip-packaged SpreadsheetML (`.xlsx`).
    XmlZip,
}

impl EnumDocumentFormat {
    /// Conventional file extension without the dot.
    pub fn file_extension(self) -> &'static str {
        match self {
            Self::LegacyBinary => "xls",
            Self::XmlZip => "xlsx",
        }
    }

    /// MIME type used when the document is served as a download.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::LegacyBinary => "application/vnd.ms-excel",
            Self::XmlZip => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        }
    }

    /// Guess the container from a file name (`.xls` is legacy, anything else XML).
    pub fn from_path(path: &std::path::Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("xls") => Self::LegacyBinary,
            _ => Self::XmlZip,
        }
    }

    /// Sniff the container from the first bytes of a document.
    pub fn from_magic(head: &[u8]) -> Option<Self> {
        if head.starts_with(b"PK\x03\x04") {
            Some(Self::XmlZip)
        } else if head.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]) {
            Some(Self::LegacyBinary)
        } else {
            None
        }
    }

    /// Maximum number of rows per worksheet.
    pub fn n_rows_max(self) -> usize {
        match self {
            Self::LegacyBinary => crate::conf::N_NROWS_XLS_MAX,
            Self::XmlZip => crate::conf::N_NROWS_EXCEL_MAX,
        }
    }

    /// Maximum number of columns per worksheet.
    pub fn n_cols_max(self) -> usize {
        match self {
            Self::LegacyBinary => crate::conf::N_NCOLS_XLS_MAX,
            Self::XmlZip => crate::conf::N_NCOLS_EXCEL_MAX,
        }
    }
}

/// Document traversal strategy used by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EnumParseMode {
    /// Materialize the selected sheet before the first row is returned.
    #[default]
    Eager,
    /// Pull rows from low-level parse events; sheet selection by index only.
    Streaming,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region AutofitPolicy

/// Autofit rule for column width inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumAutofitColumnsRule {
    /// Disable autofit.
    None,
    /// Infer width from header cells only.
    Header,
    /// Infer width from body cells only.
    Body,
    /// Infer width from both header and body cells (default).
    #[default]
    All,
}

/// Autofit policy for one export call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecAutofitCellsPolicy {
    /// Autofit width inference rule.
    pub rule_columns: EnumAutofitColumnsRule,
    /// Minimum final width.
    pub width_cell_min: usize,
    /// Maximum final width.
    pub width_cell_max: usize,
    /// Width padding added after inference.
    pub width_cell_padding: usize,
}

impl Default for SpecAutofitCellsPolicy {
    fn default() -> Self {
        Self {
            rule_columns: EnumAutofitColumnsRule::All,
            width_cell_min: 8,
            width_cell_max: 60,
            width_cell_padding: 2,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WriteOptions

/// Options for one export call.
pub struct SpecWriteOptions {
    /// Container of a freshly created document (ignored with a template).
    pub format: EnumDocumentFormat,
    /// Sheet name; defaults to [`C_SHEET_NAME_DEFAULT`].
    pub sheet_name: Option<String>,
    /// Title text merged across the first row.
    pub title: Option<String>,
    /// Template whose first sheet receives the body rows.
    pub path_template: Option<PathBuf>,
    /// First body row (before the title shift).
    pub start_row: usize,
    /// Title style provider.
    pub style_title: Option<Box<dyn StyleFactory>>,
    /// Header style provider.
    pub style_header: Option<Box<dyn StyleFactory>>,
    /// Default body cell style provider.
    pub style_column: Option<Box<dyn StyleFactory>>,
    /// Ordered conditional row styles; the first hit styles the whole row.
    pub rules_special_row: Vec<SpecStyleRule>,
    /// Column width inference.
    pub policy_autofit: SpecAutofitCellsPolicy,
}

impl Default for SpecWriteOptions {
    fn default() -> Self {
        Self {
            format: EnumDocumentFormat::default(),
            sheet_name: None,
            title: None,
            path_template: None,
            start_row: N_ROW_START_DEFAULT,
            style_title: None,
            style_header: None,
            style_column: None,
            rules_special_row: Vec::new(),
            policy_autofit: SpecAutofitCellsPolicy::default(),
        }
    }
}

impl fmt::Debug for SpecWriteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecWriteOptions")
            .field("format", &self.format)
            .field("sheet_name", &self.sheet_name)
            .field("title", &self.title)
            .field("path_template", &self.path_template)
            .field("start_row", &self.start_row)
            .field("style_title", &self.style_title.is_some())
            .field("style_header", &self.style_header.is_some())
            .field("style_column", &self.style_column.is_some())
            .field("rules_special_row", &self.rules_special_row.len())
            .field("policy_autofit", &self.policy_autofit)
            .finish()
    }
}

impl SpecWriteOptions {
    /// Sheet name to create when no template is used.
    pub fn derive_sheet_name(&self) -> &str {
        self.sheet_name.as_deref().unwrap_or(C_SHEET_NAME_DEFAULT)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReadOptions

/// Options for one import call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecReadOptions {
    /// Traversal strategy.
    pub parse_mode: EnumParseMode,
    /// Sheet selected by name (eager only).
    pub sheet_name: Option<String>,
    /// Sheet selected by zero-based index; the first sheet when unset.
    pub sheet_index: Option<usize>,
    /// First data row (zero-based).
    pub start_row_index: usize,
}

impl Default for SpecReadOptions {
    fn default() -> Self {
        Self {
            parse_mode: EnumParseMode::Eager,
            sheet_name: None,
            sheet_index: None,
            start_row_index: N_ROW_START_DEFAULT,
        }
    }
}

impl SpecReadOptions {
    /// Index of the selected sheet when no name lookup applies.
    pub fn derive_sheet_index(&self) -> usize {
        self.sheet_index.unwrap_or(0)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region LayoutAndRows

/// Row/column layout of one export call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecWriteLayout {
    /// Whether row 0 carries a merged title.
    pub if_title_row: bool,
    /// Header row, `None` when a template supplies it.
    pub row_idx_header: Option<usize>,
    /// First body row.
    pub row_idx_body_start: usize,
    /// Largest mapped column index.
    pub col_idx_max: usize,
}

/// One traversed row restricted to schema columns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecRawRow {
    /// Zero-based sheet row index.
    pub row_index: usize,
    /// Column index to cell text; blank cells map to `None`.
    pub values: BTreeMap<usize, Option<String>>,
}

impl SpecRawRow {
    /// Text of one column, `None` when blank or unmapped.
    pub fn get(&self, col_idx: usize) -> Option<&str> {
        self.values.get(&col_idx).and_then(|val| val.as_deref())
    }

    /// Whether every column is blank.
    pub fn is_blank(&self) -> bool {
        self.values.values().all(Option::is_none)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region TemplateSpecification

/// Inclusive cell rectangle merged into one display cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpecMergedRange {
    pub row_idx_first: usize,
    pub row_idx_last: usize,
    pub col_idx_first: usize,
    pub col_idx_last: usize,
}

impl SpecMergedRange {
    /// Range covering `col_idx_first..=col_idx_last` of one row.
    pub fn row_span(row_idx: usize, col_idx_first: usize, col_idx_last: usize) -> Self {
        Self {
            row_idx_first: row_idx,
            row_idx_last: row_idx,
            col_idx_first,
            col_idx_last,
        }
    }

    /// Whether the range covers a single cell.
    pub fn is_single_cell(&self) -> bool {
        self.row_idx_first == self.row_idx_last && self.col_idx_first == self.col_idx_last
    }
}

/// One cell copied from a template sheet: a value, a format, or both.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecTemplateCell {
    /// Zero-based sheet row index.
    pub row_index: usize,
    /// Zero-based sheet column index.
    pub column_index: usize,
    /// Cell content; `EnumCellValue::None` for a styled blank.
    pub value: EnumCellValue,
    /// Cell format; `None` when the cell uses the sheet default.
    pub format: Option<SpecCellFormat>,
}

/// First sheet of a template document.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecTemplateSheet {
    /// Container of the template, reused for the output.
    pub format: EnumDocumentFormat,
    /// Name of the template's first sheet.
    pub sheet_name: String,
    /// Valued or styled cells in row-major order.
    pub cells: Vec<SpecTemplateCell>,
    /// Merged regions.
    pub merges: Vec<SpecMergedRange>,
    /// Explicit column widths in character units, keyed by column index.
    pub column_widths: BTreeMap<usize, f64>,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReportSpecification

/// Per-export report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecExportReport {
    /// Sheet that received the rows.
    pub sheet_name: String,
    /// Applied layout.
    pub layout: SpecWriteLayout,
    /// Number of body rows written.
    pub n_rows_body: usize,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

impl SpecExportReport {
    /// Add a warning message.
    pub fn warn(&mut self, msg: impl AsRef<str>) {
        self.warnings.push(msg.as_ref().to_string());
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
