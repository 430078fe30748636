//! Per-pass feature scorer.

use std::marker::PhantomData;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{DeluneError, Result};
use crate::selector::method::{Contingency, ScoringConfig};

/// Document and term-frequency counts of a term (or a whole pool) in one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub df: u64,
    pub tf: u64,
}

impl PoolStats {
    pub fn new(df: u64, tf: u64) -> Self {
        PoolStats { df, tf }
    }
}

/// Scores terms against the pools of one corpus.
///
/// Built once per scoring pass, seeded with the corpus-level pool totals,
/// then fed one term at a time. The scorer keeps per-pass scratch state and
/// is neither `Send` nor `Sync`; [`FeatureScorer::close`] ends the pass.
#[derive(Debug)]
pub struct FeatureScorer {
    config: ScoringConfig,
    pool_count: usize,
    n: u64,
    vocab_size: usize,
    pools: Vec<PoolStats>,
    per_pool: Vec<f64>,
    scored: usize,
    _local: PhantomData<Rc<()>>,
}

impl FeatureScorer {
    pub fn new(config: ScoringConfig, pool_count: usize, n: u64, vocab_size: usize) -> Result<Self> {
        if pool_count == 0 || n == 0 {
            return Err(DeluneError::invalid_argument(format!(
                "feature scorer needs pools and documents (pools: {pool_count}, N: {n})"
            )));
        }
        Ok(FeatureScorer {
            config,
            pool_count,
            n,
            vocab_size,
            pools: Vec::new(),
            per_pool: Vec::with_capacity(pool_count),
            scored: 0,
            _local: PhantomData,
        })
    }

    /// Seed the pool-level totals, in pool-number order.
    pub fn add_corpus(&mut self, pools: &[PoolStats]) -> Result<()> {
        self.check_len(pools.len(), "corpus")?;
        self.pools = pools.to_vec();
        Ok(())
    }

    /// Score one term from its per-pool statistics.
    pub fn add(&mut self, term: &[PoolStats]) -> Result<f64> {
        if self.pools.is_empty() {
            return Err(DeluneError::invalid_argument(
                "feature scorer used before add_corpus",
            ));
        }
        self.check_len(term.len(), "term")?;

        let term_df: u64 = term.iter().map(|s| s.df).sum();
        self.per_pool.clear();
        for (stats, pool) in term.iter().zip(&self.pools) {
            let table = Contingency::new(stats.df, term_df, pool.df, self.n).with_frequencies(
                stats.tf,
                pool.tf,
                self.vocab_size,
            );
            self.per_pool.push(self.config.method.score(&table));
        }

        self.scored += 1;
        Ok(self.config.aggregation.combine(&self.per_pool))
    }

    /// Number of terms scored in this pass.
    pub fn scored(&self) -> usize {
        self.scored
    }

    /// End the pass and release its scratch state.
    pub fn close(self) {
        log::debug!(
            "feature scorer closed after {} terms ({} / {})",
            self.scored,
            self.config.method,
            self.config.aggregation.as_str()
        );
    }

    fn check_len(&self, len: usize, what: &str) -> Result<()> {
        if len != self.pool_count {
            return Err(DeluneError::invalid_argument(format!(
                "{what} statistics cover {len} pools, scorer has {}",
                self.pool_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::method::{Aggregation, ScoringMethod};

    fn scorer(method: ScoringMethod, aggregation: Aggregation) -> FeatureScorer {
        let mut scorer = FeatureScorer::new(
            ScoringConfig {
                method,
                aggregation,
            },
            2,
            100,
            50,
        )
        .unwrap();
        scorer
            .add_corpus(&[PoolStats::new(40, 400), PoolStats::new(60, 600)])
            .unwrap();
        scorer
    }

    #[test]
    fn test_df_aggregations() {
        let dog = [PoolStats::new(10, 15), PoolStats::new(5, 5)];
        assert_eq!(scorer(ScoringMethod::Df, Aggregation::Sum).add(&dog).unwrap(), 15.0);
        assert_eq!(scorer(ScoringMethod::Df, Aggregation::Max).add(&dog).unwrap(), 10.0);
        assert_eq!(scorer(ScoringMethod::Df, Aggregation::Avg).add(&dog).unwrap(), 7.5);
    }

    #[test]
    fn test_discriminative_term_scores_higher() {
        let mut s = scorer(ScoringMethod::Chi2, Aggregation::Max);
        let skewed = s.add(&[PoolStats::new(30, 40), PoolStats::new(1, 1)]).unwrap();
        let even = s.add(&[PoolStats::new(12, 12), PoolStats::new(18, 18)]).unwrap();
        assert!(skewed > even);
        assert_eq!(s.scored(), 2);
        s.close();
    }

    #[test]
    fn test_shape_errors() {
        assert!(FeatureScorer::new(ScoringConfig::default(), 0, 10, 1).is_err());

        let mut s = FeatureScorer::new(ScoringConfig::default(), 2, 10, 1).unwrap();
        assert!(s.add(&[PoolStats::default(); 2]).is_err());
        assert!(s.add_corpus(&[PoolStats::default()]).is_err());

        let mut s = scorer(ScoringMethod::Gss, Aggregation::Sum);
        assert!(s.add(&[PoolStats::default(); 3]).is_err());
    }
}
