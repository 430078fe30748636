use std::sync::Arc;

use delune::config::{DeluneConfig, MemoryPoolConfig, SegmentConfig};
use delune::error::Result;
use delune::memory::MemoryPool;
use delune::segment::{SegmentBuilder, SegmentKind, SegmentReader, SegmentRegistry};
use delune::storage::{MemoryStorage, Storage};
use delune::training::{Corpus, SegmentWriter};

fn setup(memory: &MemoryStorage) -> Result<(SegmentRegistry, u64)> {
    let storage: Arc<dyn Storage> = Arc::new(memory.clone());
    let mut registry = SegmentRegistry::load(Arc::clone(&storage))?;
    let mut builder = SegmentBuilder::new(storage, SegmentConfig::default());
    builder.add_document(0, &[("a", 1), ("b", 2)], &["x"])?;
    builder.add_document(1, &[("a", 3)], &["y"])?;
    builder.add_document(2, &[("b", 1), ("c", 1)], &["x", "y"])?;
    let source = builder.commit(&mut registry)?.unwrap();
    Ok((registry, source))
}

fn assert_discarded(memory: &MemoryStorage, generation: u64) {
    for ext in ["fis", "fii", "cfq", "cof", "coi", "cfi", "cps"] {
        let name = format!("{generation}.{ext}");
        assert!(!memory.file_exists(&name), "{name} survived the abort");
    }
}

#[test]
fn test_failed_commit_discards_generation() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    for failing in [".fis", ".cof", ".cfi", ".cps"] {
        let memory = MemoryStorage::new();
        let (mut registry, source) = setup(&memory)?;
        let mut mem = MemoryPool::new(MemoryPoolConfig::default())?.acquire(0)?;

        let reader = SegmentReader::open(Arc::clone(registry.storage()), source)?;
        let corpus = Corpus::scan(&reader, &mut mem, &SegmentConfig::default(), 0)?;
        reader.close()?;

        let mut writer = SegmentWriter::open(&registry, source, &DeluneConfig::default())?;
        writer.mark_dirty();

        memory.fail_outputs_ending_with(failing);
        let err = writer
            .commit(&mut mem, &corpus, &mut registry)
            .expect_err(failing);
        assert!(err.to_string().contains("generation 2"), "{err}");
        assert!(writer.is_dirty());
        assert!(registry.latest(SegmentKind::Training).is_none());
        assert_discarded(&memory, 2);

        // The abandoned number is never handed out again.
        memory.clear_failures();
        assert_eq!(writer.commit(&mut mem, &corpus, &mut registry)?, Some(3));
        assert!(!writer.is_dirty());

        let reloaded = SegmentRegistry::load(Arc::clone(registry.storage()))?;
        let generations: Vec<u64> = reloaded.segments().iter().map(|s| s.generation).collect();
        assert_eq!(generations, vec![1, 3]);
    }
    Ok(())
}

#[test]
fn test_registry_failure_allocates_nothing() -> Result<()> {
    let memory = MemoryStorage::new();
    let (mut registry, source) = setup(&memory)?;
    let mut mem = MemoryPool::new(MemoryPoolConfig::default())?.acquire(0)?;
    let mut corpus = Corpus::new();
    corpus.add_pool("x");
    corpus.add_document(&[0], 3)?;
    corpus.add_term("a");

    let mut writer = SegmentWriter::open(&registry, source, &DeluneConfig::default())?;
    writer.mark_dirty();

    // The registry cannot be rewritten, so no generation is allocated.
    memory.fail_outputs_ending_with(".json.tmp");
    assert!(writer.commit(&mut mem, &corpus, &mut registry).is_err());
    assert_discarded(&memory, 2);
    memory.clear_failures();

    assert_eq!(writer.commit(&mut mem, &corpus, &mut registry)?, Some(2));
    assert!(memory.file_exists("2.cps"));
    assert_eq!(registry.latest(SegmentKind::Training).map(|s| s.numvoca), Some(1));
    Ok(())
}

#[test]
fn test_writers_with_separate_registries_keep_both_commits() -> Result<()> {
    let memory = MemoryStorage::new();
    let (registry, source) = setup(&memory)?;
    let pool = MemoryPool::new(MemoryPoolConfig::default())?;
    let mut mem = pool.acquire(0)?;

    let reader = SegmentReader::open(Arc::clone(registry.storage()), source)?;
    let corpus = Corpus::scan(&reader, &mut mem, &SegmentConfig::default(), 0)?;
    reader.close()?;

    // Two writers, each with a registry loaded before either commits.
    let mut registry_a = SegmentRegistry::load(Arc::clone(registry.storage()))?;
    let mut registry_b = SegmentRegistry::load(Arc::clone(registry.storage()))?;
    let mut writer_a = SegmentWriter::open(&registry_a, source, &DeluneConfig::default())?;
    let mut writer_b = SegmentWriter::open(&registry_b, source, &DeluneConfig::default())?;
    writer_a.mark_dirty();
    writer_b.mark_dirty();

    let from_a = writer_a.commit(&mut mem, &corpus, &mut registry_a)?.unwrap();
    let from_b = writer_b.commit(&mut mem, &corpus, &mut registry_b)?.unwrap();
    assert_ne!(from_a, from_b);
    assert_eq!(registry_b.segments_of(SegmentKind::Training).len(), 2);

    let reloaded = SegmentRegistry::load(Arc::clone(registry.storage()))?;
    let generations: Vec<u64> = reloaded.segments().iter().map(|s| s.generation).collect();
    assert_eq!(generations, vec![source, from_a, from_b]);
    for generation in [from_a, from_b] {
        SegmentReader::open(Arc::clone(registry.storage()), generation)?.close()?;
    }
    Ok(())
}
