use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use delune::codec::ReadFlags;
use delune::config::{DeluneConfig, MemoryPoolConfig, SegmentConfig};
use delune::error::{DeluneError, Result};
use delune::memory::MemoryPool;
use delune::segment::{
    ComposedSegmentReader, SegmentBuilder, SegmentKind, SegmentReader, SegmentRegistry,
};
use delune::selector::{PoolStats, ScoringConfig};
use delune::storage::{FileStorage, Storage, StorageConfig};
use delune::training::{Corpus, SegmentWriter};

const THREADS: usize = 4;
const ROUNDS: usize = 25;

/// 100 documents: 0..40 are "pos", 40..100 are "neg". "dog" occurs in
/// documents 0..10 and 40..45, "cat" in every fourth document.
fn build_documents(storage: &Arc<dyn Storage>, registry: &mut SegmentRegistry) -> Result<u64> {
    let mut builder = SegmentBuilder::new(Arc::clone(storage), SegmentConfig::default());
    for doc in 0..100u32 {
        let mut terms = vec![("filler", 3)];
        if matches!(doc, 0..10 | 40..45) {
            terms.push(("dog", 1 + (doc < 5) as u32));
        }
        if doc % 4 == 0 {
            terms.push(("cat", 1));
        }
        let label = if doc < 40 { "pos" } else { "neg" };
        builder.add_document(doc, &terms, &[label])?;
    }
    Ok(builder.commit(registry)?.unwrap())
}

fn corpus(pools: &[&str]) -> Corpus {
    let mut corpus = Corpus::new();
    for pool in pools {
        corpus.add_pool(pool);
    }
    for doc in 0..100 {
        let label = if doc < 40 { "pos" } else { "neg" };
        let member: Vec<u32> = corpus.poolno(label).into_iter().collect();
        corpus.add_document(&member, 4).unwrap();
    }
    corpus.add_term("dog");
    corpus.add_term("cat");
    corpus
}

fn train(
    registry: &mut SegmentRegistry,
    pool: &MemoryPool,
    source: u64,
    corpus: &Corpus,
) -> Result<u64> {
    let mut mem = pool.acquire(0)?;
    let mut writer = SegmentWriter::open(registry, source, &DeluneConfig::default())?;
    writer.mark_dirty();
    let generation = writer.commit(&mut mem, corpus, registry)?;
    generation.ok_or_else(|| DeluneError::invalid_argument("nothing committed"))
}

fn training_reader(registry: &SegmentRegistry) -> Result<ComposedSegmentReader> {
    ComposedSegmentReader::from_registry(registry, SegmentKind::Training, 0, ScoringConfig::default())
}

#[test]
fn test_threads_share_readers_with_own_handles() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path(), StorageConfig::default())?);
    let mut registry = SegmentRegistry::load(Arc::clone(&storage))?;
    let pool = MemoryPool::new(MemoryPoolConfig::default())?;

    let source = build_documents(&storage, &mut registry)?;
    let corpus = corpus(&["pos", "neg"]);
    let generation = train(&mut registry, &pool, source, &corpus)?;

    let documents = SegmentReader::open(Arc::clone(&storage), source)?;
    let training = training_reader(&registry)?;
    let cooccurring = SegmentReader::open(Arc::clone(&storage), generation)?;
    let (cat, dog) = (
        corpus.term_index("cat").unwrap(),
        corpus.term_index("dog").unwrap(),
    );
    let terms = [("dog", 2), ("cat", 1), ("filler", 5)];

    // Answers from a single thread before any sharing.
    let (dog_ids, features) = {
        let mut mem = pool.acquire(0)?;
        let dog_info = documents.get_term_info(&mut mem, &"dog".into(), 0)?;
        let ids: Vec<u32> = documents
            .read_posting(&mut mem, &dog_info, None, ReadFlags::DOCS_ONLY)?
            .iter()
            .map(|p| p.id)
            .collect();
        (ids, training.get_features(&mut mem, &terms, corpus.vocabulary_size(), 2)?)
    };
    assert_eq!(dog_ids.len(), 15);
    assert_eq!(pool.in_use(), 0);

    thread::scope(|scope| -> Result<()> {
        let workers: Vec<_> = (0..THREADS)
            .map(|slot| {
                let (pool, documents, training, cooccurring) =
                    (&pool, &documents, &training, &cooccurring);
                let (dog_ids, features, terms) = (&dog_ids, &features, &terms);
                scope.spawn(move || -> Result<()> {
                    let mut mem = pool.acquire(slot)?;
                    for _ in 0..ROUNDS {
                        let info = documents.get_term_info(&mut mem, &"dog".into(), 0)?;
                        let ids = documents.read_posting(&mut mem, &info, None, ReadFlags::DOCS_ONLY)?;
                        assert!(ids.iter().map(|p| p.id).eq(dog_ids.iter().copied()));

                        assert_eq!(training.get_df(&mut mem, "dog")?, 15);
                        assert_eq!(
                            training.get_term_pools(&mut mem, "dog")?,
                            Some(vec![PoolStats::new(10, 15), PoolStats::new(5, 5)])
                        );
                        assert_eq!(
                            &training.get_features(&mut mem, terms, 2, 2)?,
                            features
                        );
                        assert_eq!(cooccurring.get_co_occurrence(&mut mem, dog, cat)?, 5);
                    }
                    Ok(())
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap()?;
        }
        Ok(())
    })?;

    assert_eq!(pool.in_use(), 0);
    assert!(matches!(pool.acquire(THREADS + 4), Err(DeluneError::InvalidArgument(_))));
    documents.close()?;
    cooccurring.close()?;
    training.close()
}

#[test]
fn test_reader_keeps_its_generation_after_a_newer_commit() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path(), StorageConfig::default())?);
    let mut registry = SegmentRegistry::load(Arc::clone(&storage))?;
    let pool = MemoryPool::new(MemoryPoolConfig::default())?;

    let source = build_documents(&storage, &mut registry)?;
    let older = train(&mut registry, &pool, source, &corpus(&["pos", "neg"]))?;
    let old_reader = training_reader(&registry)?;
    assert_eq!(old_reader.last_info().generation, older);

    // The newer generation only knows the "pos" pool.
    let newer = train(&mut registry, &pool, source, &corpus(&["pos"]))?;
    assert!(newer > older);
    let new_reader = training_reader(&registry)?;
    assert_eq!(new_reader.last_info().generation, newer);

    thread::scope(|scope| {
        let old_side = scope.spawn(|| -> Result<()> {
            let mut mem = pool.acquire(1)?;
            for _ in 0..ROUNDS {
                assert_eq!(old_reader.get_df(&mut mem, "dog")?, 15);
                assert_eq!(
                    old_reader.get_term_pools(&mut mem, "dog")?,
                    Some(vec![PoolStats::new(10, 15), PoolStats::new(5, 5)])
                );
            }
            Ok(())
        });
        let new_side = scope.spawn(|| -> Result<()> {
            let mut mem = pool.acquire(2)?;
            for _ in 0..ROUNDS {
                assert_eq!(new_reader.get_df(&mut mem, "dog")?, 10);
                assert_eq!(
                    new_reader.get_term_pools(&mut mem, "dog")?,
                    Some(vec![PoolStats::new(10, 15)])
                );
            }
            Ok(())
        });
        old_side.join().unwrap()?;
        new_side.join().unwrap()
    })?;

    assert_eq!(old_reader.corpus_size(), 100);
    old_reader.close()?;
    new_reader.close()
}
