//! Feature scoring methods.
//!
//! Every method is a pure function of one pool's 2x2 contingency table
//! for a term (plus the pool's term-frequency totals for the tf-based
//! methods):
//!
//! ```text
//!              in pool   not in pool
//! has term        A          B
//! lacks term      C          D
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DeluneError, Result};

/// Smoothing constant of the relevancy score.
const RS_SMOOTHING: f64 = 0.1;

/// Smoothing added to every cell of the odds ratio.
const OR_SMOOTHING: f64 = 0.5;

/// One pool's view of one term.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Contingency {
    /// Pool documents containing the term.
    pub a: f64,
    /// Other documents containing the term.
    pub b: f64,
    /// Pool documents lacking the term.
    pub c: f64,
    /// Other documents lacking the term.
    pub d: f64,
    /// Corpus size.
    pub n: f64,
    /// Term frequency of the term inside the pool.
    pub tf: f64,
    /// Total term frequency of the pool.
    pub pool_tf: f64,
    /// Vocabulary size.
    pub vocab: f64,
}

impl Contingency {
    /// Build the table from counts. Cells that would go negative (documents
    /// carrying several labels) are clamped to zero.
    pub fn new(term_pool_df: u64, term_df: u64, pool_df: u64, n: u64) -> Self {
        let a = term_pool_df as f64;
        let b = (term_df as f64 - a).max(0.0);
        let c = (pool_df as f64 - a).max(0.0);
        let n = n as f64;
        let d = (n - a - b - c).max(0.0);
        Contingency {
            a,
            b,
            c,
            d,
            n,
            ..Contingency::default()
        }
    }

    /// Attach term-frequency totals.
    pub fn with_frequencies(mut self, tf: u64, pool_tf: u64, vocab: usize) -> Self {
        self.tf = tf as f64;
        self.pool_tf = pool_tf as f64;
        self.vocab = vocab as f64;
        self
    }

    /// Number of documents containing the term.
    pub fn term_df(&self) -> f64 {
        self.a + self.b
    }

    fn cross(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    fn margins(&self) -> f64 {
        (self.a + self.c) * (self.b + self.d) * (self.a + self.b) * (self.c + self.d)
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 { 0.0 } else { numerator / denominator }
}

/// How a term is scored against one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMethod {
    /// Chi-square statistic.
    #[default]
    Chi2,
    /// Galavotti-Sebastiani-Simi coefficient.
    Gss,
    /// Document frequency inside the pool.
    Df,
    /// Smoothed class frequency `P(t | c)`.
    Cf,
    /// Ng-Goh-Low correlation coefficient.
    Ngl,
    /// Pointwise mutual information.
    Mi,
    /// In-pool term frequency weighted by IDF.
    Tfidf,
    /// Information gain.
    Ig,
    /// Odds ratio.
    Or,
    /// Relevancy score.
    Rs,
    /// Log odds ratio.
    Lor,
    /// Cosine between term and pool document sets.
    Cos,
    /// Phi coefficient.
    Pphi,
    /// Yule's Q.
    Yule,
    /// Normalized pointwise mutual information.
    Rmi,
}

impl ScoringMethod {
    pub const ALL: [ScoringMethod; 15] = [
        ScoringMethod::Chi2,
        ScoringMethod::Gss,
        ScoringMethod::Df,
        ScoringMethod::Cf,
        ScoringMethod::Ngl,
        ScoringMethod::Mi,
        ScoringMethod::Tfidf,
        ScoringMethod::Ig,
        ScoringMethod::Or,
        ScoringMethod::Rs,
        ScoringMethod::Lor,
        ScoringMethod::Cos,
        ScoringMethod::Pphi,
        ScoringMethod::Yule,
        ScoringMethod::Rmi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringMethod::Chi2 => "chi2",
            ScoringMethod::Gss => "gss",
            ScoringMethod::Df => "df",
            ScoringMethod::Cf => "cf",
            ScoringMethod::Ngl => "ngl",
            ScoringMethod::Mi => "mi",
            ScoringMethod::Tfidf => "tfidf",
            ScoringMethod::Ig => "ig",
            ScoringMethod::Or => "or",
            ScoringMethod::Rs => "rs",
            ScoringMethod::Lor => "lor",
            ScoringMethod::Cos => "cos",
            ScoringMethod::Pphi => "pphi",
            ScoringMethod::Yule => "yule",
            ScoringMethod::Rmi => "rmi",
        }
    }

    /// Score one pool's table.
    pub fn score(&self, t: &Contingency) -> f64 {
        let score = match self {
            ScoringMethod::Chi2 => ratio(t.n * t.cross().powi(2), t.margins()),
            ScoringMethod::Gss => ratio(t.cross(), t.n * t.n),
            ScoringMethod::Df => t.a,
            ScoringMethod::Cf => ratio(t.tf + 1.0, t.pool_tf + t.vocab),
            ScoringMethod::Ngl => ratio(t.n.sqrt() * t.cross(), t.margins().sqrt()),
            ScoringMethod::Mi => {
                if t.a == 0.0 {
                    0.0
                } else {
                    ratio(t.a * t.n, (t.a + t.c) * (t.a + t.b)).ln()
                }
            }
            ScoringMethod::Tfidf => {
                let df = t.term_df();
                if df == 0.0 { 0.0 } else { t.tf * (t.n / df).ln() }
            }
            ScoringMethod::Ig => information_gain(t),
            ScoringMethod::Or => odds_ratio(t),
            ScoringMethod::Rs => {
                let in_pool = ratio(t.a, t.a + t.c);
                let outside = ratio(t.b, t.b + t.d);
                ((in_pool + RS_SMOOTHING) / (outside + RS_SMOOTHING)).ln()
            }
            ScoringMethod::Lor => odds_ratio(t).ln(),
            ScoringMethod::Cos => ratio(t.a, ((t.a + t.b) * (t.a + t.c)).sqrt()),
            ScoringMethod::Pphi => ratio(t.cross(), t.margins().sqrt()),
            ScoringMethod::Yule => ratio(t.cross(), t.a * t.d + t.b * t.c),
            ScoringMethod::Rmi => normalized_pmi(t),
        };
        if score.is_finite() { score } else { 0.0 }
    }
}

fn odds_ratio(t: &Contingency) -> f64 {
    ((t.a + OR_SMOOTHING) * (t.d + OR_SMOOTHING))
        / ((t.b + OR_SMOOTHING) * (t.c + OR_SMOOTHING))
}

/// Mutual information between "has term" and "in pool".
fn information_gain(t: &Contingency) -> f64 {
    if t.n == 0.0 {
        return 0.0;
    }
    let cells = [
        (t.a, t.a + t.b, t.a + t.c),
        (t.b, t.a + t.b, t.b + t.d),
        (t.c, t.c + t.d, t.a + t.c),
        (t.d, t.c + t.d, t.b + t.d),
    ];
    cells
        .iter()
        .filter(|(cell, row, col)| *cell > 0.0 && *row > 0.0 && *col > 0.0)
        .map(|(cell, row, col)| cell / t.n * (cell * t.n / (row * col)).ln())
        .sum()
}

fn normalized_pmi(t: &Contingency) -> f64 {
    if t.n == 0.0 {
        return 0.0;
    }
    if t.a == 0.0 {
        return -1.0;
    }
    let joint = t.a / t.n;
    if joint >= 1.0 {
        return 1.0;
    }
    let pmi = (joint / (((t.a + t.b) / t.n) * ((t.a + t.c) / t.n))).ln();
    pmi / -joint.ln()
}

impl fmt::Display for ScoringMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScoringMethod {
    type Err = DeluneError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        let name = if name == "chi" { "chi2" } else { name.as_str() };
        ScoringMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == name)
            .ok_or_else(|| DeluneError::invalid_argument(format!("unknown scoring method '{s}'")))
    }
}

/// How per-pool scores combine into one term score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    #[default]
    Max,
    /// Plain mean over pools.
    Avg,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Max => "max",
            Aggregation::Avg => "avg",
        }
    }

    /// Combine per-pool scores. An empty slice scores 0.
    pub fn combine(&self, scores: &[f64]) -> f64 {
        if scores.is_empty() {
            return 0.0;
        }
        match self {
            Aggregation::Sum => scores.iter().sum(),
            Aggregation::Max => scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregation::Avg => scores.iter().sum::<f64>() / scores.len() as f64,
        }
    }
}

impl FromStr for Aggregation {
    type Err = DeluneError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Aggregation::Sum),
            "max" => Ok(Aggregation::Max),
            "avg" | "mean" => Ok(Aggregation::Avg),
            _ => Err(DeluneError::invalid_argument(format!("unknown aggregation '{s}'"))),
        }
    }
}

/// A scoring method together with its aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub method: ScoringMethod,
    pub aggregation: Aggregation,
}
