//! Stateless helper utilities shared by the writer and reader kernels.

use crate::conf::{N_LEN_EXCEL_SHEET_NAME_MAX, TUP_EXCEL_ILLEGAL};
use crate::error::{Result, SheetError};
use crate::spec::{EnumAutofitColumnsRule, SpecAutofitCellsPolicy};

////////////////////////////////////////////////////////////////////////////////
// #region SheetNormalization

/// Replace invalid chars and trim to valid Excel sheet name.
pub fn sanitize_sheet_name(name: &str, replace_to: &str) -> String {
    let mut c_name = name.to_string();
    for c_illegal in TUP_EXCEL_ILLEGAL {
        c_name = c_name.replace(c_illegal, replace_to);
    }
    c_name = c_name.trim().to_string();
    if c_name.is_empty() {
        c_name = "Sheet".to_string();
    }

    c_name.chars().take(N_LEN_EXCEL_SHEET_NAME_MAX).collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ColumnWidth

/// Estimate displayed width units of a text; non-ASCII glyphs count wider.
pub fn estimate_unicode_string_width(s: &str) -> usize {
    let n_ascii = s.chars().filter(|chr| chr.is_ascii()).count();
    let n_non_ascii = s.chars().count().saturating_sub(n_ascii);
    n_ascii + (n_non_ascii as f64 * 1.6).round() as usize
}

/// Per-column width tracker fed by header and body cells.
#[derive(Debug, Clone)]
pub struct ColumnWidthTracker {
    l_width_header: Vec<usize>,
    l_width_body: Vec<usize>,
}

impl ColumnWidthTracker {
    /// Tracker covering columns `0..=col_idx_max`.
    pub fn new(col_idx_max: usize) -> Self {
        Self {
            l_width_header: vec![0; col_idx_max + 1],
            l_width_body: vec![0; col_idx_max + 1],
        }
    }

    /// Record one header cell.
    pub fn observe_header(&mut self, col_idx: usize, text: &str) {
        if let Some(n_width) = self.l_width_header.get_mut(col_idx) {
            *n_width = usize::max(*n_width, estimate_unicode_string_width(text));
        }
    }

    /// Record one body cell.
    pub fn observe_body(&mut self, col_idx: usize, text: &str) {
        if let Some(n_width) = self.l_width_body.get_mut(col_idx) {
            *n_width = usize::max(*n_width, estimate_unicode_string_width(text));
        }
    }

    /// Final width of `col_idx`, `None` when autofit is disabled.
    pub fn derive_width(&self, col_idx: usize, policy: &SpecAutofitCellsPolicy) -> Option<f64> {
        let n_header = self.l_width_header.get(col_idx).copied().unwrap_or(0);
        let n_body = self.l_width_body.get(col_idx).copied().unwrap_or(0);
        let n_width_recorded = match policy.rule_columns {
            EnumAutofitColumnsRule::None => return None,
            EnumAutofitColumnsRule::Header => n_header,
            EnumAutofitColumnsRule::Body => n_body,
            EnumAutofitColumnsRule::All => usize::max(n_header, n_body),
        };
        let n_min = usize::max(1, policy.width_cell_min);
        let n_max = usize::min(255, usize::max(n_min, policy.width_cell_max));
        let n_width_final = usize::min(
            n_max,
            usize::max(n_min, n_width_recorded + policy.width_cell_padding),
        );
        Some(n_width_final as f64)
    }
}

/// Validate autofit bounds before any cell is written.
pub fn validate_policy_autofit(policy_autofit: &SpecAutofitCellsPolicy) -> Result<()> {
    if policy_autofit.width_cell_min == 0 {
        return Err(SheetError::codec(
            "policy_autofit.width_cell_min must be >= 1.",
        ));
    }
    if policy_autofit.width_cell_max < policy_autofit.width_cell_min {
        return Err(SheetError::codec(
            "policy_autofit.width_cell_max must be >= policy_autofit.width_cell_min.",
        ));
    }
    Ok(())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region IndexCasts

/// Cast a row index to the XLSX writer's row type.
pub fn cast_row_num(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| SheetError::codec(format!("row index overflow: {value}")))
}

/// Cast a column index to the writer's column type.
pub fn cast_col_num(value: usize) -> Result<u16> {
    u16::try_from(value).map_err(|_| SheetError::codec(format!("column index overflow: {value}")))
}

/// Parse an A1-style reference (`"BC12"`) into zero-based `(row, col)`.
pub fn parse_cell_reference(reference: &str) -> Option<(usize, usize)> {
    let n_split = reference.find(|chr: char| chr.is_ascii_digit())?;
    let (c_letters, c_digits) = reference.split_at(n_split);
    if c_letters.is_empty() {
        return None;
    }

    let mut n_col = 0usize;
    for chr in c_letters.chars() {
        if !chr.is_ascii_alphabetic() {
            return None;
        }
        n_col = n_col
            .checked_mul(26)?
            .checked_add((chr.to_ascii_uppercase() as u8 - b'A') as usize + 1)?;
    }
    let n_row = c_digits.parse::<usize>().ok()?.checked_sub(1)?;
    Some((n_row, n_col - 1))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_sheet_name_replaces_illegal_chars() {
        assert_eq!(sanitize_sheet_name("a/b:c", "_"), "a_b_c");
        assert_eq!(sanitize_sheet_name("   ", "_"), "Sheet");
        assert_eq!(sanitize_sheet_name(&"x".repeat(40), "_").len(), 31);
    }

    #[test]
    fn test_width_tracker_applies_policy_bounds() {
        let mut tracker = ColumnWidthTracker::new(2);
        tracker.observe_header(0, "id");
        tracker.observe_body(0, "1234567890123");
        tracker.observe_header(2, "卡密");
        tracker.observe_body(5, "ignored");

        let policy = SpecAutofitCellsPolicy::default();
        assert_eq!(tracker.derive_width(0, &policy), Some(15.0));
        assert_eq!(tracker.derive_width(1, &policy), Some(8.0));
        assert_eq!(tracker.derive_width(2, &policy), Some(8.0));

        let policy_header = SpecAutofitCellsPolicy {
            rule_columns: EnumAutofitColumnsRule::Header,
            width_cell_min: 1,
            width_cell_padding: 0,
            ..Default::default()
        };
        assert_eq!(tracker.derive_width(0, &policy_header), Some(2.0));
        assert_eq!(tracker.derive_width(2, &policy_header), Some(3.0));

        let policy_none = SpecAutofitCellsPolicy {
            rule_columns: EnumAutofitColumnsRule::None,
            ..Default::default()
        };
        assert_eq!(tracker.derive_width(0, &policy_none), None);
    }

    #[test]
    fn test_validate_policy_autofit_rejects_inverted_bounds() {
        let policy = SpecAutofitCellsPolicy {
            width_cell_min: 10,
            width_cell_max: 5,
            ..Default::default()
        };
        assert!(validate_policy_autofit(&policy).is_err());
        assert!(validate_policy_autofit(&SpecAutofitCellsPolicy::default()).is_ok());
    }

    #[test]
    fn test_parse_cell_reference() {
        assert_eq!(parse_cell_reference("A1"), Some((0, 0)));
        assert_eq!(parse_cell_reference("c7"), Some((6, 2)));
        assert_eq!(parse_cell_reference("AA10"), Some((9, 26)));
        assert_eq!(parse_cell_reference("10"), None);
        assert_eq!(parse_cell_reference("A0"), None);
        assert_eq!(parse_cell_reference("A"), None);
    }
}
