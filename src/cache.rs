//! Set-associative cache levels with LRU replacement, and the controller that
//! sequences L1 -> L2 -> main memory.

use std::fmt;

use log::{debug, info, warn};

use crate::constants::*;
use crate::error::{SimError, SimResult};
use crate::memory::PhysicalAllocator;

/// Kind of memory access. No write policy is modeled; the kind is carried for
/// logging and for the MMU's dirty tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

impl AccessKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "r" | "read" => Some(AccessKind::Read),
            "w" | "write" => Some(AccessKind::Write),
            _ => None,
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Read => write!(f, "read"),
            AccessKind::Write => write!(f, "write"),
        }
    }
}

/// Capacity, line size and ways of one cache level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGeometry {
    pub size: u64,
    pub block_size: u64,
    pub associativity: u64,
}

impl CacheGeometry {
    pub fn new(size: u64, block_size: u64, associativity: u64) -> Self {
        CacheGeometry { size, block_size, associativity }
    }

    /// The second level: same line size and ways, `L2_SIZE_MULTIPLIER` times the capacity.
    pub fn l2_for(l1: &CacheGeometry) -> SimResult<Self> {
        let size = l1.size.checked_mul(L2_SIZE_MULTIPLIER).ok_or_else(|| {
            SimError::ConfigurationError(format!(
                "L2 size {} x {} does not fit in 64 bits",
                l1.size, L2_SIZE_MULTIPLIER
            ))
        })?;
        Ok(CacheGeometry { size, ..*l1 })
    }

    /// Check the geometry and return the number of sets.
    pub fn validate(&self) -> SimResult<u64> {
        if self.size == 0 || self.block_size == 0 || self.associativity == 0 {
            return Err(SimError::ConfigurationError(format!(
                "cache size, block size and associativity must be positive (got {}/{}/{})",
                self.size, self.block_size, self.associativity
            )));
        }
        if !self.block_size.is_power_of_two() {
            return Err(SimError::ConfigurationError(format!(
                "block size {} is not a power of two",
                self.block_size
            )));
        }
        let set_bytes = self.block_size.checked_mul(self.associativity).ok_or_else(|| {
            SimError::ConfigurationError(format!(
                "block size {} x associativity {} does not fit in 64 bits",
                self.block_size, self.associativity
            ))
        })?;
        if self.size % set_bytes != 0 {
            return Err(SimError::ConfigurationError(format!(
                "cache size {} is not a multiple of block size * associativity ({})",
                self.size, set_bytes
            )));
        }
        let num_sets = self.size / set_bytes;
        if !num_sets.is_power_of_two() {
            return Err(SimError::ConfigurationError(format!(
                "number of sets {} is not a power of two",
                num_sets
            )));
        }
        let lines = self.size / self.block_size;
        if lines > MAX_CACHE_LINES {
            return Err(SimError::ConfigurationError(format!(
                "cache of {} lines exceeds the limit of {}",
                lines, MAX_CACHE_LINES
            )));
        }
        Ok(num_sets)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheLine {
    pub valid: bool,
    pub tag: u64,
    pub last_access: u64,
}

/// Hit/miss counters of one level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelStats {
    pub level: u8,
    pub hits: u64,
    pub misses: u64,
}

impl LevelStats {
    /// Hit rate in percent; `None` before the first access.
    pub fn hit_rate(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        (total > 0).then(|| self.hits as f64 / total as f64 * 100.0)
    }
}

impl fmt::Display for LevelStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{} Stats: Hits: {}, Misses: {}", self.level, self.hits, self.misses)?;
        if let Some(rate) = self.hit_rate() {
            write!(f, ", Hit Rate: {:.2}%", rate)?;
        }
        Ok(())
    }
}

/// One set-associative cache level.
///
/// Addresses split into `tag | index | offset` with `offset_bits =
/// log2(block_size)` and `index_bits = log2(num_sets)`. Every touch
/// (lookup or line allocation) advances the level's own access counter,
/// which timestamps lines for LRU.
#[derive(Debug, Clone)]
pub struct CacheLevel {
    level: u8,
    geometry: CacheGeometry,
    num_sets: u64,
    offset_bits: u32,
    index_bits: u32,
    sets: Vec<Vec<CacheLine>>,
    hits: u64,
    misses: u64,
    access_counter: u64,
}

impl CacheLevel {
    pub fn new(level: u8, geometry: CacheGeometry) -> SimResult<Self> {
        let num_sets = geometry.validate()?;
        let ways = geometry.associativity as usize;

        debug!(
            "L{}: {} bytes, {} sets x {} ways, {}-byte lines",
            level, geometry.size, num_sets, ways, geometry.block_size
        );

        Ok(CacheLevel {
            level,
            geometry,
            num_sets,
            offset_bits: geometry.block_size.trailing_zeros(),
            index_bits: num_sets.trailing_zeros(),
            sets: vec![vec![CacheLine::default(); ways]; num_sets as usize],
            hits: 0,
            misses: 0,
            access_counter: 0,
        })
    }

    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }

    #[inline]
    pub fn geometry(&self) -> CacheGeometry {
        self.geometry
    }

    #[inline]
    pub fn num_sets(&self) -> u64 {
        self.num_sets
    }

    #[inline]
    fn index_of(&self, address: u64) -> usize {
        ((address >> self.offset_bits) & (self.num_sets - 1)) as usize
    }

    #[inline]
    fn tag_of(&self, address: u64) -> u64 {
        address >> (self.offset_bits + self.index_bits)
    }

    /// Split an address into `(tag, set index)`.
    pub fn decompose(&self, address: u64) -> (u64, usize) {
        (self.tag_of(address), self.index_of(address))
    }

    fn way_of(&self, index: usize, tag: u64) -> Option<usize> {
        self.sets[index]
            .iter()
            .position(|line| line.valid && line.tag == tag)
    }

    fn tick(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }

    /// Probe for `address`. A hit refreshes the line's timestamp; a miss
    /// changes nothing but the miss counter.
    pub fn lookup(&mut self, address: u64) -> bool {
        let now = self.tick();
        let (tag, index) = self.decompose(address);

        match self.way_of(index, tag) {
            Some(way) => {
                self.sets[index][way].last_access = now;
                self.hits += 1;
                true
            }
            None => {
                self.misses += 1;
                false
            }
        }
    }

    /// Residency check with no side effects at all.
    pub fn probe(&self, address: u64) -> bool {
        let (tag, index) = self.decompose(address);
        self.way_of(index, tag).is_some()
    }

    /// Timestamp of the line holding `address`, if resident.
    pub fn line_timestamp(&self, address: u64) -> Option<u64> {
        let (tag, index) = self.decompose(address);
        self.way_of(index, tag)
            .map(|way| self.sets[index][way].last_access)
    }

    /// Install the line for `address`. If already resident only its timestamp
    /// is refreshed; otherwise the first invalid way is used, or the least
    /// recently used line is replaced.
    pub fn allocate_line(&mut self, address: u64) {
        let now = self.tick();
        let (tag, index) = self.decompose(address);

        if let Some(way) = self.way_of(index, tag) {
            self.sets[index][way].last_access = now;
            return;
        }

        let set = &mut self.sets[index];
        let victim = match set.iter().position(|line| !line.valid) {
            Some(way) => way,
            None => {
                // Ties keep the lowest way.
                let mut lru = 0;
                for (way, line) in set.iter().enumerate() {
                    if line.last_access < set[lru].last_access {
                        lru = way;
                    }
                }
                debug!(
                    "L{}: set {} evicts tag {:#x} for tag {:#x}",
                    self.level, index, set[lru].tag, tag
                );
                lru
            }
        };

        set[victim] = CacheLine {
            valid: true,
            tag,
            last_access: now,
        };
    }

    pub fn stats(&self) -> LevelStats {
        LevelStats {
            level: self.level,
            hits: self.hits,
            misses: self.misses,
        }
    }

    /// Clear hit/miss counters; resident lines are kept.
    pub fn reset_stats(&mut self) {
        self.hits = 0;
        self.misses = 0;
    }

    /// Drop every line whose block overlaps `[start, start + size)`.
    /// Returns how many lines were dropped.
    pub fn invalidate_range(&mut self, start: u64, size: u64) -> usize {
        if size == 0 {
            return 0;
        }
        let end = start.saturating_add(size);
        let (offset_bits, index_bits) = (self.offset_bits, self.index_bits);

        let mut dropped = 0;
        for (index, set) in self.sets.iter_mut().enumerate() {
            for line in set.iter_mut().filter(|line| line.valid) {
                let block = ((line.tag << index_bits) | index as u64) << offset_bits;
                let block_end = block.saturating_add(1 << offset_bits);
                if block < end && block_end > start {
                    line.valid = false;
                    dropped += 1;
                }
            }
        }
        dropped
    }
}

/// Result of one physical access through the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    L1Hit,
    L2Hit,
    /// Missed every level; the line was fetched and cached.
    MemoryFetch,
    /// Missed every level and the address is not allocated. Nothing cached.
    Fault,
}

impl CacheOutcome {
    /// Fault outcomes as the error they stand for.
    pub fn into_result(self, address: u64) -> SimResult<CacheOutcome> {
        match self {
            CacheOutcome::Fault => Err(SimError::SegmentationFault { address }),
            other => Ok(other),
        }
    }
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheOutcome::L1Hit => write!(f, "L1 HIT"),
            CacheOutcome::L2Hit => write!(f, "L2 HIT"),
            CacheOutcome::MemoryFetch => write!(f, "MEMORY FETCH"),
            CacheOutcome::Fault => write!(f, "SEGMENTATION FAULT"),
        }
    }
}

/// Owns L1 and the optional L2 and sequences accesses through them.
#[derive(Debug, Clone)]
pub struct CacheController {
    l1: CacheLevel,
    l2: Option<CacheLevel>,
}

impl CacheController {
    /// Build L1 from `l1` and L2 at `L2_SIZE_MULTIPLIER` times its capacity.
    pub fn new(l1: CacheGeometry) -> SimResult<Self> {
        let l2 = CacheLevel::new(L2_LEVEL_ID, CacheGeometry::l2_for(&l1)?)?;
        let l1 = CacheLevel::new(L1_LEVEL_ID, l1)?;
        info!(
            "cache initialized (L1: {}B, L2: {}B)",
            l1.geometry().size,
            l2.geometry().size
        );
        Ok(Self::with_levels(l1, Some(l2)))
    }

    pub fn with_levels(l1: CacheLevel, l2: Option<CacheLevel>) -> Self {
        CacheController { l1, l2 }
    }

    pub fn l1(&self) -> &CacheLevel {
        &self.l1
    }

    pub fn l2(&self) -> Option<&CacheLevel> {
        self.l2.as_ref()
    }

    /// Run one physical access through L1, L2 and main memory.
    ///
    /// `memory` validates addresses that miss every level; without it every
    /// such access faults.
    pub fn access(
        &mut self,
        address: u64,
        kind: AccessKind,
        memory: Option<&PhysicalAllocator>,
    ) -> CacheOutcome {
        if self.l1.lookup(address) {
            debug!("{} {}: L1 hit", kind, address);
            return CacheOutcome::L1Hit;
        }

        if let Some(l2) = self.l2.as_mut() {
            if l2.lookup(address) {
                debug!("{} {}: L2 hit, promoting to L1", kind, address);
                self.l1.allocate_line(address);
                return CacheOutcome::L2Hit;
            }
        }

        if !memory.is_some_and(|m| m.is_allocated(address)) {
            warn!("{} {}: segmentation fault, address not allocated", kind, address);
            return CacheOutcome::Fault;
        }

        info!("{} {}: cache miss, fetching from main memory", kind, address);
        if let Some(l2) = self.l2.as_mut() {
            l2.allocate_line(address);
        }
        self.l1.allocate_line(address);
        CacheOutcome::MemoryFetch
    }

    /// Per-level counters, L1 first
    pub fn dump_stats(&self) -> Vec<LevelStats> {
        std::iter::once(&self.l1)
            .chain(self.l2.as_ref())
            .map(CacheLevel::stats)
            .collect()
    }

    pub fn reset_stats(&mut self) {
        self.l1.reset_stats();
        if let Some(l2) = self.l2.as_mut() {
            l2.reset_stats();
        }
    }

    /// Forget every cached line of `[start, start + size)` in all levels.
    /// Called whenever that range stops being backed by an allocation.
    pub fn invalidate_range(&mut self, start: u64, size: u64) {
        let mut dropped = self.l1.invalidate_range(start, size);
        if let Some(l2) = self.l2.as_mut() {
            dropped += l2.invalidate_range(start, size);
        }
        if dropped > 0 {
            debug!("invalidated {} line(s) of [{}, {})", dropped, start, start.saturating_add(size));
        }
    }
}
