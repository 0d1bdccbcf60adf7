//! Sheet IO constants and default preset factories.

use crate::spec::SpecCellFormat;

/// XLSX worksheet maximum row count.
pub const N_NROWS_EXCEL_MAX: usize = 1_048_576;
/// XLSX worksheet maximum column count.
pub const N_NCOLS_EXCEL_MAX: usize = 16_384;
/// XLS (BIFF8) worksheet maximum row count.
pub const N_NROWS_XLS_MAX: usize = 65_536;
/// XLS (BIFF8) worksheet maximum column count.
pub const N_NCOLS_XLS_MAX: usize = 256;
/// Excel sheet name maximum length.
pub const N_LEN_EXCEL_SHEET_NAME_MAX: usize = 31;
/// Characters not allowed in sheet names.
pub const TUP_EXCEL_ILLEGAL: [&str; 7] = ["*", ":", "?", "/", "\\", "[", "]"];

/// Built-in number format ids shared by both containers, keyed by format code.
pub(crate) const TUP_NUM_FORMAT_BUILTIN: [(&str, u16); 12] = [
    ("General", 0),
    ("0", 1),
    ("0.00", 2),
    ("#,##0", 3),
    ("#,##0.00", 4),
    ("0%", 9),
    ("0.00%", 10),
    ("0.00E+00", 11),
    ("m/d/yy", 14),
    ("h:mm", 20),
    ("h:mm:ss", 21),
    ("@", 49),
];

/// Sheet name used when none is configured.
pub const C_SHEET_NAME_DEFAULT: &str = "Sheet1";
/// Default first body row on write and first data row on read.
pub const N_ROW_START_DEFAULT: usize = 1;

fn derive_base_format() -> SpecCellFormat {
    SpecCellFormat {
        font_name: Some("Times New Roman".to_string()),
        font_size: Some(11),
        align: Some("left".to_string()),
        valign: Some("vcenter".to_string()),
        ..Default::default()
    }
}

/// Built-in title style: large bold text centered across the merge.
pub fn derive_default_title_format() -> SpecCellFormat {
    derive_base_format().with_(SpecCellFormat {
        font_size: Some(14),
        bold: Some(true),
        align: Some("center".to_string()),
        ..Default::default()
    })
}

/// Built-in header style.
pub fn derive_default_header_format() -> SpecCellFormat {
    derive_base_format().with_(SpecCellFormat {
        bold: Some(true),
        align: Some("center".to_string()),
        border: Some(1),
        bg_color: Some("#D9D9D9".to_string()),
        ..Default::default()
    })
}

/// Built-in body cell style.
pub fn derive_default_column_format() -> SpecCellFormat {
    derive_base_format().with_(SpecCellFormat {
        border: Some(1),
        ..Default::default()
    })
}
