//! Victim cache for base-array buffers
//!
//! Array workloads free and re-malloc buffers of identical sizes across
//! batch iterations. The victim cache holds the last `capacity` freed
//! buffers and serves later allocations whose byte size matches exactly,
//! which removes the allocator from the steady-state hot path.

use crate::error::{EngineError, Result};
use std::collections::VecDeque;
use tracing::debug;
use vexel_core::{BaseArena, BaseHandle};

/// Allocation counters, observable for conservation checks
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VCacheStats {
    /// `malloc_base` calls that had to realize a buffer
    pub requests: u64,
    /// Requests served by recycling a cached buffer
    pub hits: u64,
    /// Requests that fell through to the allocator
    pub misses: u64,
    /// Buffers returned through `free_base`
    pub frees: u64,
    /// Cached buffers dropped because the cache was full
    pub evictions: u64,
}

/// Bounded FIFO of `(size_in_bytes, buffer)` entries
#[derive(Debug)]
pub struct VCache {
    entries: VecDeque<(usize, Vec<u8>)>,
    capacity: usize,
    stats: VCacheStats,
}

impl VCache {
    /// `capacity == 0` disables recycling: frees release immediately.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            stats: VCacheStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> VCacheStats {
        self.stats
    }

    /// Realize the buffer of `handle` if absent: exact-size cache hit or
    /// fresh allocation.
    pub fn malloc_base(&mut self, arena: &mut BaseArena, handle: BaseHandle) -> Result<()> {
        let base = arena.get_mut(handle)?;
        if base.is_realized() {
            return Ok(());
        }
        let size = base.size_bytes();
        self.stats.requests += 1;

        if let Some(pos) = self.entries.iter().position(|(s, _)| *s == size) {
            let (_, buf) = self.entries.remove(pos).expect("position is in range");
            self.stats.hits += 1;
            debug!(base = %handle, size, "vcache hit");
            base.attach(buf);
            return Ok(());
        }

        self.stats.misses += 1;
        let mut buf = Vec::new();
        if buf.try_reserve_exact(size).is_err() {
            return Err(EngineError::OutOfMemory(size));
        }
        buf.resize(size, 0);
        base.attach(buf);
        Ok(())
    }

    /// Detach the buffer of `handle` and cache it; evicts the oldest entry
    /// when full. Freeing an unrealized base is a no-op (the batch never
    /// materialized it).
    pub fn free_base(&mut self, arena: &mut BaseArena, handle: BaseHandle) -> Result<()> {
        let base = arena.get_mut(handle)?;
        let Some(buf) = base.detach() else {
            return Ok(());
        };
        self.stats.frees += 1;

        if self.capacity == 0 {
            drop(buf);
            return Ok(());
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.stats.evictions += 1;
        }
        self.entries.push_back((buf.len(), buf));
        Ok(())
    }

    /// Release every cached buffer (shutdown path)
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
