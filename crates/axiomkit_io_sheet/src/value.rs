//! Field value <-> cell text coercion.
//!
//! Writing renders every field to text first and then picks the cell type
//! lexically; reading parses text back into the declared field type.

use std::sync::LazyLock;

use calamine::Data;
use regex::Regex;

use crate::spec::EnumCellValue;

/// Plain decimal grammar: optional sign, digits, optional fraction.
static RE_NUMERIC_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)$").expect("numeric grammar regex is valid")
});

/// Largest magnitude rendered as an integer literal when reading numbers back.
const N_ABS_INTEGRAL_RENDER_MAX: f64 = 1e15;

////////////////////////////////////////////////////////////////////////////////
// #region CellTextTrait

/// Conversion between a field type and its cell text form.
pub trait CellText: Sized {
    /// Render the value; `None` means the cell is left blank.
    fn to_cell_text(&self) -> Option<String>;

    /// Parse cell text back into the value.
    fn from_cell_text(text: &str) -> Result<Self, String>;
}

macro_rules! impl_cell_text_integer {
    ($($ty:ty),* $(,)?) => {
        $(
            impl CellText for $ty {
                fn to_cell_text(&self) -> Option<String> {
                    Some(self.to_string())
                }

                fn from_cell_text(text: &str) -> Result<Self, String> {
                    let c_text = text.trim();
                    if let Ok(val) = c_text.parse::<$ty>() {
                        return Ok(val);
                    }
                    // Numeric cells may come back as integral decimals, e.g. `20.0`.
                    match c_text.parse::<f64>() {
                        Ok(n) if n.is_finite() && n.fract() == 0.0 => {
                            let val = n as $ty;
                            if val as f64 == n {
                                Ok(val)
                            } else {
                                Err(format!(
                                    "{c_text:?} is out of range for {}",
                                    stringify!($ty)
                                ))
                            }
                        }
                        _ => Err(format!("{c_text:?} is not a valid {}", stringify!($ty))),
                    }
                }
            }
        )*
    };
}

impl_cell_text_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! impl_cell_text_float {
    ($($ty:ty),* $(,)?) => {
        $(
            impl CellText for $ty {
                fn to_cell_text(&self) -> Option<String> {
                    if self.is_finite() {
                        Some(self.to_string())
                    } else {
                        None
                    }
                }

                fn from_cell_text(text: &str) -> Result<Self, String> {
                    text.trim().parse::<$ty>().map_err(|err| {
                        format!("{text:?} is not a valid {}: {err}", stringify!($ty))
                    })
                }
            }
        )*
    };
}

impl_cell_text_float!(f32, f64);

impl CellText for bool {
    fn to_cell_text(&self) -> Option<String> {
        Some(self.to_string())
    }

    fn from_cell_text(text: &str) -> Result<Self, String> {
        let c_text = text.trim();
        if c_text.eq_ignore_ascii_case("true") || c_text == "1" {
            Ok(true)
        } else if c_text.eq_ignore_ascii_case("false") || c_text == "0" {
            Ok(false)
        } else {
            Err(format!("{c_text:?} is not a valid bool"))
        }
    }
}

impl CellText for char {
    fn to_cell_text(&self) -> Option<String> {
        Some(self.to_string())
    }

    fn from_cell_text(text: &str) -> Result<Self, String> {
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(chr), None) => Ok(chr),
            _ => Err(format!("{text:?} is not a single character")),
        }
    }
}

impl CellText for String {
    fn to_cell_text(&self) -> Option<String> {
        Some(self.clone())
    }

    fn from_cell_text(text: &str) -> Result<Self, String> {
        Ok(text.to_string())
    }
}

impl<V: CellText> CellText for Option<V> {
    fn to_cell_text(&self) -> Option<String> {
        self.as_ref().and_then(CellText::to_cell_text)
    }

    fn from_cell_text(text: &str) -> Result<Self, String> {
        V::from_cell_text(text).map(Some)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CellTypeInference

/// Return whether `text` lexically parses as a plain decimal real number.
pub fn is_numeric_text(text: &str) -> bool {
    RE_NUMERIC_TEXT.is_match(text)
}

/// Decide the written cell kind for one rendered field value.
///
/// Never looks at the declared field type; `"007"` becomes the number 7.
pub fn derive_cell_value(text: Option<&str>) -> EnumCellValue {
    let Some(c_text) = text else {
        return EnumCellValue::None;
    };
    if is_numeric_text(c_text)
        && let Ok(n) = c_text.parse::<f64>()
        && n.is_finite()
    {
        return EnumCellValue::Number(n);
    }
    EnumCellValue::String(c_text.to_string())
}

/// Render a numeric cell as text the way both traversal strategies report it.
pub fn render_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < N_ABS_INTEGRAL_RENDER_MAX {
        // `-0.0` renders as `0`.
        return format!("{}", n as i64);
    }
    n.to_string()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ParsedCells

/// Text of a parsed workbook cell; blank, error and empty-text cells are absent.
pub fn render_data_text(data: &Data) -> Option<String> {
    match data {
        Data::Empty | Data::Error(_) => None,
        Data::String(val) | Data::DateTimeIso(val) | Data::DurationIso(val) => {
            if val.is_empty() {
                None
            } else {
                Some(val.clone())
            }
        }
        Data::Float(val) => Some(render_number(*val)),
        Data::Int(val) => Some(val.to_string()),
        Data::Bool(val) => Some(val.to_string()),
        // Serial day number; no date formatting is applied.
        Data::DateTime(val) => Some(render_number(val.as_f64())),
    }
}

/// Cell kind of a parsed workbook cell when it is copied into a new document.
pub fn derive_cell_value_from_data(data: &Data) -> EnumCellValue {
    match data {
        Data::Float(val) => EnumCellValue::Number(*val),
        Data::Int(val) => EnumCellValue::Number(*val as f64),
        Data::DateTime(val) => EnumCellValue::Number(val.as_f64()),
        _ => match render_data_text(data) {
            Some(c_text) => EnumCellValue::String(c_text),
            None => EnumCellValue::None,
        },
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
