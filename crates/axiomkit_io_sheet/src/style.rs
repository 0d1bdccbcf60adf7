//! Style handles, style providers and the conditional row-style rule engine.

use std::collections::HashMap;
use std::fmt;

use crate::spec::SpecCellFormat;

////////////////////////////////////////////////////////////////////////////////
// #region StyleHandles

/// Opaque style handle issued by a document builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StyleId(usize);

impl StyleId {
    /// Position of the style in its registry.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Document-side style registry handed to [`StyleFactory`] implementations.
pub trait StyleRegistry {
    /// Register a format and return its handle; equal formats share a handle.
    fn register_format(&mut self, format: SpecCellFormat) -> StyleId;
}

/// Style provider evaluated once per export against the live document.
pub trait StyleFactory {
    /// Create (or look up) the style in `registry`.
    fn create_style(&self, registry: &mut dyn StyleRegistry) -> StyleId;
}

impl<F> StyleFactory for F
where
    F: Fn(&mut dyn StyleRegistry) -> StyleId,
{
    fn create_style(&self, registry: &mut dyn StyleRegistry) -> StyleId {
        self(registry)
    }
}

impl StyleFactory for SpecCellFormat {
    fn create_style(&self, registry: &mut dyn StyleRegistry) -> StyleId {
        registry.register_format(self.clone())
    }
}

/// Call-scoped format table shared by both container builders.
#[derive(Debug, Clone, Default)]
pub struct StyleTable {
    l_formats: Vec<SpecCellFormat>,
    dict_idx_by_format: HashMap<SpecCellFormat, StyleId>,
}

impl StyleTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the format behind a handle.
    pub fn get(&self, style: StyleId) -> Option<&SpecCellFormat> {
        self.l_formats.get(style.0)
    }

    /// Registered formats in handle order.
    pub fn formats(&self) -> &[SpecCellFormat] {
        &self.l_formats
    }

    /// Number of distinct formats.
    pub fn len(&self) -> usize {
        self.l_formats.len()
    }

    /// Whether no format has been registered.
    pub fn is_empty(&self) -> bool {
        self.l_formats.is_empty()
    }
}

impl StyleRegistry for StyleTable {
    fn register_format(&mut self, format: SpecCellFormat) -> StyleId {
        if let Some(style) = self.dict_idx_by_format.get(&format) {
            return *style;
        }
        let style = StyleId(self.l_formats.len());
        self.l_formats.push(format.clone());
        self.dict_idx_by_format.insert(format, style);
        style
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RowStyleRules

/// Conditional row style: when `predicate` accepts any cell text of a row,
/// the whole row takes `style`.
pub struct SpecStyleRule {
    /// Test applied to rendered cell text.
    pub predicate: Box<dyn Fn(&str) -> bool>,
    /// Style applied to the whole matching row.
    pub style: Box<dyn StyleFactory>,
}

impl SpecStyleRule {
    /// Build a rule from a predicate and a style provider.
    pub fn new(
        predicate: impl Fn(&str) -> bool + 'static,
        style: impl StyleFactory + 'static,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            style: Box::new(style),
        }
    }
}

impl fmt::Debug for SpecStyleRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecStyleRule").finish_non_exhaustive()
    }
}

/// Return the index of the first rule hit, scanning columns outermost.
///
/// Columns are visited in schema order and, per column, rules in declaration
/// order. Blank cells are never offered to predicates.
pub fn select_row_rule(values: &[Option<&str>], rules: &[SpecStyleRule]) -> Option<usize> {
    if rules.is_empty() {
        return None;
    }
    for c_text in values.iter().flatten().copied() {
        if let Some(n_idx_rule) = rules.iter().position(|rule| (rule.predicate)(c_text)) {
            return Some(n_idx_rule);
        }
    }
    None
}

/// Resolve the style of every cell in one body row.
///
/// `styles_rules[i]` is the handle created for `rules[i]`.
pub fn select_row_style(
    values: &[Option<&str>],
    rules: &[SpecStyleRule],
    styles_rules: &[StyleId],
    style_default: Option<StyleId>,
) -> Option<StyleId> {
    select_row_rule(values, rules)
        .and_then(|n_idx_rule| styles_rules.get(n_idx_rule).copied())
        .or(style_default)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
