use std::collections::BTreeSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use delune::config::{DeluneConfig, MemoryPoolConfig, SegmentConfig};
use delune::error::{DeluneError, Result};
use delune::memory::{MemHandle, MemoryPool};
use delune::segment::{
    ComposedSegmentReader, SegmentBuilder, SegmentKind, SegmentReader, SegmentRegistry,
};
use delune::selector::ScoringConfig;
use delune::storage::{FileStorage, MemoryStorage, Storage, StorageConfig};
use delune::training::{Corpus, SegmentWriter};

fn handle() -> Result<MemHandle> {
    MemoryPool::new(MemoryPoolConfig::default())?.acquire(0)
}

/// Build a document segment from `docs`, scan it, and commit a training
/// generation with co-occurrence. Returns the corpus and training generation.
fn train(
    storage: &Arc<dyn Storage>,
    mem: &mut MemHandle,
    docs: &[Vec<&str>],
) -> Result<(Corpus, u64)> {
    let mut registry = SegmentRegistry::load(Arc::clone(storage))?;
    let mut builder = SegmentBuilder::new(Arc::clone(storage), SegmentConfig::default());
    for (doc, terms) in docs.iter().enumerate() {
        let terms: Vec<(&str, u32)> = terms.iter().map(|t| (*t, 1)).collect();
        builder.add_document(doc as u32, &terms, &["all"])?;
    }
    let source = builder.commit(&mut registry)?.unwrap();

    let reader = SegmentReader::open(Arc::clone(storage), source)?;
    let corpus = Corpus::scan(&reader, mem, &SegmentConfig::default(), 0)?;
    reader.close()?;

    let mut config = DeluneConfig::default();
    config.writer.progress_interval = 2;
    let mut writer = SegmentWriter::open(&registry, source, &config)?;
    writer.mark_dirty();
    let generation = writer.commit(mem, &corpus, &mut registry)?.unwrap();
    Ok((corpus, generation))
}

#[test]
fn test_shared_and_disjoint_pairs() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path(), StorageConfig::default())?);
    let mut mem = handle()?;

    let docs = vec![vec!["a", "c"], vec!["a", "c"], vec!["b"], vec!["a"]];
    let (corpus, generation) = train(&storage, &mut mem, &docs)?;
    assert_eq!(corpus.terms(), &["a", "b", "c"]);

    let reader = SegmentReader::open(Arc::clone(&storage), generation)?;
    assert!(reader.has_cooccurrence());
    assert_eq!(reader.get_co_occurrence(&mut mem, 0, 2)?, 2);
    assert_eq!(reader.get_co_occurrence(&mut mem, 2, 0)?, 2);
    assert_eq!(reader.get_co_occurrence(&mut mem, 0, 1)?, 0);
    assert_eq!(reader.get_co_occurrence(&mut mem, 1, 2)?, 0);

    assert!(matches!(
        reader.get_co_occurrence(&mut mem, 0, 3),
        Err(DeluneError::NotFound(_))
    ));
    assert!(matches!(
        reader.get_co_occurrence(&mut mem, 1, 1),
        Err(DeluneError::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn test_random_pairs_are_symmetric_and_exact() -> Result<()> {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let mut mem = handle()?;
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let vocabulary = ["ant", "bee", "cow", "doe", "eel", "fox", "gnu", "hen"];
    let docs: Vec<Vec<&str>> = (0..60)
        .map(|_| {
            let mut terms: Vec<&str> = vocabulary
                .iter()
                .copied()
                .filter(|_| rng.random_bool(0.3))
                .collect();
            if terms.is_empty() {
                terms.push(vocabulary[rng.random_range(0..vocabulary.len())]);
            }
            terms
        })
        .collect();
    let (corpus, _) = train(&storage, &mut mem, &docs)?;

    let sets: Vec<BTreeSet<&str>> = docs
        .iter()
        .map(|d| d.iter().copied().collect())
        .collect();
    let registry = SegmentRegistry::load(Arc::clone(&storage))?;
    let reader = ComposedSegmentReader::from_registry(
        &registry,
        SegmentKind::Training,
        0,
        ScoringConfig::default(),
    )?;

    let terms = corpus.terms();
    for (a, left) in terms.iter().enumerate() {
        for (b, right) in terms.iter().enumerate() {
            if a == b {
                continue;
            }
            let expected = sets
                .iter()
                .filter(|s| s.contains(left.as_str()) && s.contains(right.as_str()))
                .count() as u32;
            let forward = reader.get_co_occurrence(&mut mem, a as u32, b as u32)?;
            let backward = reader.get_co_occurrence(&mut mem, b as u32, a as u32)?;
            assert_eq!(forward, backward, "{left} x {right}");
            // Rows follow vocabulary order, so a row shifted by one would
            // report another pair's count here.
            assert_eq!(forward, expected, "{left} x {right}");
        }
    }
    Ok(())
}

#[test]
fn test_training_without_cooccurrence() -> Result<()> {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let mut mem = handle()?;
    let mut registry = SegmentRegistry::load(Arc::clone(&storage))?;

    let mut builder = SegmentBuilder::new(Arc::clone(&storage), SegmentConfig::default());
    builder.add_document(0, &[("a", 1), ("b", 1)], &["all"])?;
    let source = builder.commit(&mut registry)?.unwrap();

    let reader = SegmentReader::open(Arc::clone(&storage), source)?;
    let corpus = Corpus::scan(&reader, &mut mem, &SegmentConfig::default(), 0)?;

    let mut config = DeluneConfig::default();
    config.writer.with_cooccurrence = false;
    let mut writer = SegmentWriter::open(&registry, source, &config)?;
    writer.mark_dirty();
    let generation = writer.commit(&mut mem, &corpus, &mut registry)?.unwrap();

    assert!(!registry.get(generation).unwrap().has_cooccurrence);
    let training = SegmentReader::open(Arc::clone(&storage), generation)?;
    assert!(!training.has_cooccurrence());
    assert!(training.get_co_occurrence(&mut mem, 0, 1).unwrap_err().is_not_found());
    Ok(())
}
