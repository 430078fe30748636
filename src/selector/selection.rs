//! Vocabulary pruning and top-N selection.

use serde::{Deserialize, Serialize};

use crate::error::{DeluneError, Result};

/// How many scored terms to keep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    /// Keep this many terms (clamped to what is available).
    Count(usize),
    /// Keep this share of the scored terms, rounded up.
    Fraction(f64),
}

impl Selection {
    /// Number of terms to keep out of `available`.
    pub fn target(&self, available: usize) -> Result<usize> {
        match *self {
            Selection::Count(count) => Ok(count.min(available)),
            Selection::Fraction(fraction) if fraction > 0.0 && fraction <= 1.0 => {
                Ok(((available as f64 * fraction).ceil() as usize).min(available))
            }
            Selection::Fraction(fraction) => Err(DeluneError::invalid_argument(format!(
                "selection fraction {fraction} outside (0, 1]"
            ))),
        }
    }
}

impl Default for Selection {
    fn default() -> Self {
        Selection::Fraction(1.0)
    }
}

/// Pruning bounds and selection size for one feature-selection pass.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Keep only terms with a document frequency above this.
    pub min_df: u32,
    /// Keep only terms with a document frequency at most this; 0 is unbounded.
    pub max_df: u32,
    pub selection: Selection,
}

impl SelectionConfig {
    /// Whether a term with document frequency `df` survives pruning.
    pub fn admits(&self, df: u64) -> bool {
        df > self.min_df as u64 && (self.max_df == 0 || df <= self.max_df as u64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_df != 0 && self.max_df <= self.min_df {
            return Err(DeluneError::invalid_argument(format!(
                "max_df {} does not exceed min_df {}",
                self.max_df, self.min_df
            )));
        }
        self.selection.target(0).map(|_| ())
    }
}

/// Sort `(term, score)` pairs by descending score and keep the selection.
///
/// The sort is stable, so equal scores keep their input order.
pub fn select_top<T>(mut scored: Vec<(T, f64)>, selection: Selection) -> Result<Vec<(T, f64)>> {
    let keep = selection.target(scored.len())?;
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(keep);
    Ok(scored)
}
