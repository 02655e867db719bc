use std::fmt;

use log::{debug, info, warn};

use crate::constants::*;
use crate::error::{SimError, SimResult};

/// One contiguous span of physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: u64,
    pub size: u64,
    pub free: bool,
    /// Allocation id; `None` while the region is free.
    pub id: Option<u64>,
}

impl Region {
    fn free_span(start: u64, size: u64) -> Self {
        Region { start, size, free: true, id: None }
    }

    /// One past the last address of the region
    #[inline]
    pub fn end(&self) -> u64 {
        self.start + self.size
    }

    #[inline]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} - {}] ", self.start, self.end() - 1)?;
        match self.id {
            Some(id) if !self.free => write!(f, "USED (ID={})", id),
            _ => write!(f, "FREE"),
        }
    }
}

/// Placement policy used by [`PhysicalAllocator::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    FirstFit,
    BestFit,
    WorstFit,
}

impl Strategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            STRATEGY_FIRST => Some(Strategy::FirstFit),
            STRATEGY_BEST => Some(Strategy::BestFit),
            STRATEGY_WORST => Some(Strategy::WorstFit),
            _ => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::FirstFit => STRATEGY_FIRST,
            Strategy::BestFit => STRATEGY_BEST,
            Strategy::WorstFit => STRATEGY_WORST,
        };
        write!(f, "{}-fit", name)
    }
}

/// Snapshot of allocator usage counters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocatorStats {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub largest_free: u64,
    /// Percentage of total memory in use
    pub used_pct: f64,
    /// `1 - largest_free / free` as a percentage, 0 when nothing is free
    pub ext_frag_pct: f64,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
}

/// Variable-size region allocator over `[0, total_size)`.
///
/// Regions are kept in a vector ordered by start address; adjacency in the
/// vector is adjacency in memory. The regions always cover the whole space
/// with no gaps or overlaps, and no two neighbours are both free once a free
/// has completed.
#[derive(Debug, Clone)]
pub struct PhysicalAllocator {
    regions: Vec<Region>,
    total_size: u64,
    next_id: u64,
    strategy: Strategy,
    requests: u64,
    successes: u64,
    failures: u64,
}

impl PhysicalAllocator {
    /// Create an allocator with a single free region spanning `total_size` bytes
    pub fn new(total_size: u64) -> SimResult<Self> {
        if total_size == 0 {
            return Err(SimError::ConfigurationError(
                "memory size must be positive".to_string(),
            ));
        }
        info!("physical memory initialized: {} bytes", total_size);
        Ok(PhysicalAllocator {
            regions: vec![Region::free_span(0, total_size)],
            total_size,
            next_id: 1,
            strategy: Strategy::default(),
            requests: 0,
            successes: 0,
            failures: 0,
        })
    }

    #[inline]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    #[inline]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Only affects subsequent allocations.
    pub fn set_strategy(&mut self, strategy: Strategy) {
        info!("allocation strategy set to {}", strategy);
        self.strategy = strategy;
    }

    /// Index of the free region the current strategy picks for `size` bytes.
    fn find_fit(&self, size: u64) -> Option<usize> {
        let mut candidates = self
            .regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.free && r.size >= size);

        match self.strategy {
            Strategy::FirstFit => candidates.next().map(|(i, _)| i),
            // Strict comparisons keep the first-encountered region on ties.
            Strategy::BestFit => candidates
                .fold(None, |best: Option<(usize, &Region)>, (i, r)| match best {
                    Some((_, b)) if b.size <= r.size => best,
                    _ => Some((i, r)),
                })
                .map(|(i, _)| i),
            Strategy::WorstFit => candidates
                .fold(None, |best: Option<(usize, &Region)>, (i, r)| match best {
                    Some((_, b)) if b.size >= r.size => best,
                    _ => Some((i, r)),
                })
                .map(|(i, _)| i),
        }
    }

    /// Allocate `size` bytes and return the start address of the new region.
    pub fn allocate(&mut self, size: u64) -> SimResult<u64> {
        self.requests += 1;

        if size == 0 {
            self.failures += 1;
            warn!("allocation of 0 bytes rejected");
            return Err(SimError::InvalidSize { size });
        }

        let Some(index) = self.find_fit(size) else {
            self.failures += 1;
            warn!("allocation failed: no free region fits {} bytes ({})", size, self.strategy);
            return Err(SimError::OutOfMemory { requested: size });
        };

        let chosen = self.regions[index];
        if chosen.size > size {
            let remainder = Region::free_span(chosen.start + size, chosen.size - size);
            self.regions.insert(index + 1, remainder);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.successes += 1;

        let region = &mut self.regions[index];
        region.size = size;
        region.free = false;
        region.id = Some(id);

        info!("allocated {} bytes at {} (ID = {})", size, region.start, id);
        Ok(region.start)
    }

    /// Free the allocated region starting exactly at `address`.
    pub fn free(&mut self, address: u64) -> SimResult<()> {
        let Some(region) = self
            .regions
            .iter_mut()
            .find(|r| !r.free && r.start == address)
        else {
            warn!("invalid free of address {}", address);
            return Err(SimError::InvalidFree { address });
        };

        region.free = true;
        region.id = None;
        info!("block at address {} freed", address);

        self.coalesce();
        Ok(())
    }

    /// Merge every run of adjacent free regions into one.
    fn coalesce(&mut self) {
        let before = self.regions.len();
        let mut merged: Vec<Region> = Vec::with_capacity(before);
        for region in self.regions.drain(..) {
            match merged.last_mut() {
                Some(prev) if prev.free && region.free => prev.size += region.size,
                _ => merged.push(region),
            }
        }
        self.regions = merged;

        if self.regions.len() != before {
            debug!("coalesced {} free regions", before - self.regions.len());
        }
    }

    /// True iff `address` lies inside an allocated region.
    pub fn is_allocated(&self, address: u64) -> bool {
        self.regions
            .iter()
            .find(|r| r.contains(address))
            .is_some_and(|r| !r.free)
    }

    /// Regions in address order
    pub fn dump(&self) -> &[Region] {
        &self.regions
    }

    pub fn stats(&self) -> AllocatorStats {
        let mut used = 0;
        let mut free = 0;
        let mut largest_free = 0;

        for region in &self.regions {
            if region.free {
                free += region.size;
                largest_free = largest_free.max(region.size);
            } else {
                used += region.size;
            }
        }

        let ext_frag_pct = if free > 0 {
            (1.0 - largest_free as f64 / free as f64) * 100.0
        } else {
            0.0
        };

        AllocatorStats {
            total: self.total_size,
            used,
            free,
            largest_free,
            used_pct: used as f64 / self.total_size as f64 * 100.0,
            ext_frag_pct,
            requests: self.requests,
            successes: self.successes,
            failures: self.failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Regions partition [0, total) with no gaps or overlaps.
    fn assert_coverage(alloc: &PhysicalAllocator) {
        let mut expected_start = 0;
        for region in alloc.dump() {
            assert_eq!(region.start, expected_start, "gap or overlap at {}", region.start);
            assert!(region.size > 0);
            expected_start = region.end();
        }
        assert_eq!(expected_start, alloc.total_size());
    }

    fn assert_no_adjacent_free(alloc: &PhysicalAllocator) {
        for pair in alloc.dump().windows(2) {
            assert!(!(pair[0].free && pair[1].free), "adjacent free regions {:?}", pair);
        }
    }

    /// Free regions of sizes [50, 10, 30] at increasing addresses, separated
    /// by allocated 5-byte regions.
    fn setup_fragmented() -> PhysicalAllocator {
        let mut alloc = PhysicalAllocator::new(105).unwrap();
        let a = alloc.allocate(50).unwrap(); // 0
        alloc.allocate(5).unwrap(); // 50
        let b = alloc.allocate(10).unwrap(); // 55
        alloc.allocate(5).unwrap(); // 65
        let c = alloc.allocate(30).unwrap(); // 70
        alloc.allocate(5).unwrap(); // 100
        alloc.free(a).unwrap();
        alloc.free(b).unwrap();
        alloc.free(c).unwrap();
        assert_coverage(&alloc);
        alloc
    }

    #[test]
    fn test_new_allocator_is_one_free_region() {
        let alloc = PhysicalAllocator::new(1024).unwrap();
        assert_eq!(alloc.dump(), &[Region::free_span(0, 1024)]);
        assert_eq!(alloc.strategy(), Strategy::FirstFit);
    }

    #[test]
    fn test_zero_size_memory_rejected() {
        assert!(matches!(
            PhysicalAllocator::new(0),
            Err(SimError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_allocate_splits_region() {
        let mut alloc = PhysicalAllocator::new(100).unwrap();
        assert_eq!(alloc.allocate(30), Ok(0));
        assert_eq!(alloc.allocate(20), Ok(30));

        let regions = alloc.dump();
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0].id, Some(1));
        assert_eq!(regions[1].id, Some(2));
        assert!(regions[2].free);
        assert_eq!(regions[2].size, 50);
        assert_coverage(&alloc);
    }

    #[test]
    fn test_exact_fit_does_not_split() {
        let mut alloc = PhysicalAllocator::new(64).unwrap();
        assert_eq!(alloc.allocate(64), Ok(0));
        assert_eq!(alloc.dump().len(), 1);
        assert_eq!(alloc.allocate(1), Err(SimError::OutOfMemory { requested: 1 }));
    }

    #[test]
    fn test_first_fit_picks_first() {
        let mut alloc = setup_fragmented();
        alloc.set_strategy(Strategy::FirstFit);
        assert_eq!(alloc.allocate(10), Ok(0));
        // 50 split into 10 used + 40 free
        assert_eq!(alloc.dump()[1], Region::free_span(10, 40));
        assert_coverage(&alloc);
    }

    #[test]
    fn test_best_fit_picks_exact_match() {
        let mut alloc = setup_fragmented();
        alloc.set_strategy(Strategy::BestFit);
        let regions_before = alloc.dump().len();
        assert_eq!(alloc.allocate(10), Ok(55));
        assert_eq!(alloc.dump().len(), regions_before);
        assert_coverage(&alloc);
    }

    #[test]
    fn test_worst_fit_picks_largest() {
        let mut alloc = setup_fragmented();
        alloc.set_strategy(Strategy::WorstFit);
        assert_eq!(alloc.allocate(10), Ok(0));
        assert_coverage(&alloc);
    }

    #[test]
    fn test_best_fit_tie_goes_to_first() {
        let mut alloc = PhysicalAllocator::new(50).unwrap();
        let a = alloc.allocate(20).unwrap();
        alloc.allocate(5).unwrap();
        let b = alloc.allocate(20).unwrap();
        alloc.allocate(5).unwrap();
        alloc.free(a).unwrap();
        alloc.free(b).unwrap();

        alloc.set_strategy(Strategy::BestFit);
        assert_eq!(alloc.allocate(20), Ok(a));
    }

    #[test]
    fn test_free_coalesces_neighbours() {
        let mut alloc = PhysicalAllocator::new(100).unwrap();
        let a = alloc.allocate(25).unwrap();
        let b = alloc.allocate(25).unwrap();
        let c = alloc.allocate(25).unwrap();

        alloc.free(a).unwrap();
        alloc.free(c).unwrap();
        assert_no_adjacent_free(&alloc);
        alloc.free(b).unwrap();
        assert_no_adjacent_free(&alloc);

        assert_eq!(alloc.dump(), &[Region::free_span(0, 100)]);
    }

    #[test]
    fn test_free_interior_address_fails() {
        let mut alloc = PhysicalAllocator::new(100).unwrap();
        alloc.allocate(40).unwrap();
        let before = alloc.dump().to_vec();

        assert_eq!(alloc.free(10), Err(SimError::InvalidFree { address: 10 }));
        assert_eq!(alloc.dump(), before.as_slice());
    }

    #[test]
    fn test_double_free_fails() {
        let mut alloc = PhysicalAllocator::new(100).unwrap();
        let a = alloc.allocate(40).unwrap();
        alloc.free(a).unwrap();
        assert_eq!(alloc.free(a), Err(SimError::InvalidFree { address: a }));
    }

    #[test]
    fn test_is_allocated() {
        let mut alloc = PhysicalAllocator::new(100).unwrap();
        alloc.allocate(40).unwrap();

        assert!(alloc.is_allocated(0));
        assert!(alloc.is_allocated(39));
        assert!(!alloc.is_allocated(40)); // free region
        assert!(!alloc.is_allocated(500)); // out of range

        // Repeated queries agree
        for _ in 0..3 {
            assert!(alloc.is_allocated(20));
        }
    }

    #[test]
    fn test_ids_are_monotonic_across_frees() {
        let mut alloc = PhysicalAllocator::new(100).unwrap();
        let a = alloc.allocate(10).unwrap();
        alloc.free(a).unwrap();
        alloc.allocate(10).unwrap();
        assert_eq!(alloc.dump()[0].id, Some(2));
    }

    #[test]
    fn test_stats() {
        let mut alloc = PhysicalAllocator::new(100).unwrap();
        let a = alloc.allocate(20).unwrap();
        alloc.allocate(30).unwrap();
        alloc.free(a).unwrap();
        assert!(alloc.allocate(500).is_err());

        let stats = alloc.stats();
        assert_eq!(stats.total, 100);
        assert_eq!(stats.used, 30);
        assert_eq!(stats.free, 70);
        assert_eq!(stats.largest_free, 50);
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.successes, 2);
        assert_eq!(stats.failures, 1);
        // 1 - 50/70
        assert!((stats.ext_frag_pct - 28.571).abs() < 0.01);
        assert!((stats.used_pct - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fragmentation_zero_when_full() {
        let mut alloc = PhysicalAllocator::new(10).unwrap();
        alloc.allocate(10).unwrap();
        assert_eq!(alloc.stats().ext_frag_pct, 0.0);
    }

    #[test]
    fn test_zero_byte_request_counts_as_failure() {
        let mut alloc = PhysicalAllocator::new(10).unwrap();
        assert_eq!(alloc.allocate(0), Err(SimError::InvalidSize { size: 0 }));
        assert_eq!(alloc.stats().failures, 1);
        assert_eq!(alloc.dump().len(), 1);
    }

    #[test]
    fn test_coverage_under_churn() {
        let mut alloc = PhysicalAllocator::new(256).unwrap();
        let mut live = Vec::new();
        for (step, size) in [16, 7, 33, 1, 64, 12, 9, 40].into_iter().enumerate() {
            if let Ok(addr) = alloc.allocate(size) {
                live.push(addr);
            }
            if step % 3 == 2 {
                let addr = live.remove(0);
                alloc.free(addr).unwrap();
                assert_no_adjacent_free(&alloc);
            }
            assert_coverage(&alloc);
        }
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(Strategy::from_name("best"), Some(Strategy::BestFit));
        assert_eq!(Strategy::from_name("buddy"), None);
        assert_eq!(Strategy::WorstFit.to_string(), "worst-fit");
    }

    #[test]
    fn test_region_display() {
        let mut alloc = PhysicalAllocator::new(100).unwrap();
        alloc.allocate(40).unwrap();
        assert_eq!(alloc.dump()[0].to_string(), "[0 - 39] USED (ID=1)");
        assert_eq!(alloc.dump()[1].to_string(), "[40 - 99] FREE");
    }
}
