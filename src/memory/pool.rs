//! Fixed-capacity pool of scratch handles.
//!
//! A [`MemHandle`] bundles a read buffer, the decoded posting list of the
//! last read, and a small stack of saved lists used when two postings must
//! be held at once (intersection). One logical operation (a query, a
//! training pass) owns one handle for its whole duration; dropping the
//! handle returns its buffers to the pool.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::posting::Posting;
use crate::config::MemoryPoolConfig;
use crate::error::{DeluneError, Result};

/// Reusable buffers owned by one handle.
#[derive(Debug, Default)]
struct Scratch {
    buffer: Vec<u8>,
    postings: Vec<Posting>,
    stack: Vec<Vec<Posting>>,
    spare: Vec<Vec<Posting>>,
}

#[derive(Debug)]
struct PoolState {
    in_use: Vec<bool>,
    checked_out: usize,
    free: Vec<Scratch>,
}

#[derive(Debug)]
struct PoolInner {
    config: MemoryPoolConfig,
    state: Mutex<PoolState>,
}

/// A pool of scratch handles, sized once at construction.
#[derive(Debug, Clone)]
pub struct MemoryPool {
    inner: Arc<PoolInner>,
}

impl MemoryPool {
    /// Create a pool with `config.max_handles` preallocated handles.
    pub fn new(config: MemoryPoolConfig) -> Result<Self> {
        if config.max_handles == 0 || config.slot_count == 0 {
            return Err(DeluneError::invalid_argument(
                "memory pool needs at least one handle and one slot",
            ));
        }

        let free = (0..config.max_handles)
            .map(|_| Scratch {
                buffer: Vec::with_capacity(config.buffer_bytes),
                ..Scratch::default()
            })
            .collect();
        let state = PoolState {
            in_use: vec![false; config.slot_count],
            checked_out: 0,
            free,
        };

        Ok(MemoryPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
            }),
        })
    }

    /// Check out the handle for `slot`.
    pub fn acquire(&self, slot: usize) -> Result<MemHandle> {
        let mut state = self.inner.state.lock();

        let Some(taken) = state.in_use.get(slot).copied() else {
            return Err(DeluneError::invalid_argument(format!(
                "slot {slot} out of range, pool has {} slots",
                self.inner.config.slot_count
            )));
        };
        if taken {
            return Err(DeluneError::HandleInUse(slot));
        }
        let scratch = state.free.pop().ok_or_else(|| {
            DeluneError::pool_exhausted(format!(
                "all {} handles checked out (requested by slot {slot})",
                self.inner.config.max_handles
            ))
        })?;

        state.in_use[slot] = true;
        state.checked_out += 1;
        Ok(MemHandle {
            slot,
            scratch,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Return a handle. Equivalent to dropping it.
    pub fn release(&self, handle: MemHandle) {
        drop(handle);
    }

    /// Number of handles currently checked out.
    pub fn in_use(&self) -> usize {
        self.inner.state.lock().checked_out
    }

    /// The sizing this pool was built with.
    pub fn config(&self) -> &MemoryPoolConfig {
        &self.inner.config
    }
}

/// An exclusive scratch handle bound to one thread slot.
#[derive(Debug)]
pub struct MemHandle {
    slot: usize,
    scratch: Scratch,
    pool: Arc<PoolInner>,
}

impl MemHandle {
    /// The slot this handle is bound to.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// A zeroed-on-growth read buffer of exactly `len` bytes.
    ///
    /// The buffer keeps its capacity between calls, so repeated reads of
    /// similar sizes do not allocate.
    pub fn read_buffer(&mut self, len: usize) -> &mut [u8] {
        let buffer = &mut self.scratch.buffer;
        buffer.resize(len, 0);
        &mut buffer[..]
    }

    /// The decoded postings of the last read.
    pub fn postings(&self) -> &[Posting] {
        &self.scratch.postings
    }

    /// The read buffer and the posting list, borrowed together for decoding.
    pub(crate) fn decode_parts(&mut self) -> (&[u8], &mut Vec<Posting>) {
        let scratch = &mut self.scratch;
        (&scratch.buffer, &mut scratch.postings)
    }

    /// Save the current postings on the stack, leaving an empty current list.
    pub fn push(&mut self) {
        let scratch = &mut self.scratch;
        let mut next = scratch.spare.pop().unwrap_or_default();
        next.clear();
        let current = std::mem::replace(&mut scratch.postings, next);
        scratch.stack.push(current);
    }

    /// Restore the most recently saved postings as the current list.
    ///
    /// Returns `false` when nothing was saved.
    pub fn pop(&mut self) -> bool {
        let scratch = &mut self.scratch;
        match scratch.stack.pop() {
            Some(saved) => {
                let old = std::mem::replace(&mut scratch.postings, saved);
                scratch.spare.push(old);
                true
            }
            None => false,
        }
    }

    /// The most recently saved postings.
    pub fn saved(&self) -> Option<&[Posting]> {
        self.scratch.stack.last().map(Vec::as_slice)
    }

    /// The saved list on top of the stack together with the current list.
    pub fn saved_and_current(&self) -> Option<(&[Posting], &[Posting])> {
        let scratch = &self.scratch;
        scratch
            .stack
            .last()
            .map(|saved| (saved.as_slice(), scratch.postings.as_slice()))
    }

    /// Drop every saved list.
    pub fn clear_saved(&mut self) {
        let scratch = &mut self.scratch;
        while let Some(mut saved) = scratch.stack.pop() {
            saved.clear();
            scratch.spare.push(saved);
        }
    }
}

impl Drop for MemHandle {
    fn drop(&mut self) {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.postings.clear();
        while let Some(mut saved) = scratch.stack.pop() {
            saved.clear();
            scratch.spare.push(saved);
        }
        scratch.buffer.clear();
        scratch.buffer.shrink_to(self.pool.config.buffer_bytes);

        let mut state = self.pool.state.lock();
        state.in_use[self.slot] = false;
        state.checked_out -= 1;
        state.free.push(scratch);
    }
}
