use log::{info, warn};

use crate::cache::{AccessKind, CacheController, CacheGeometry, CacheOutcome, LevelStats};
use crate::error::{SimError, SimResult};
use crate::memory::{AllocatorStats, PhysicalAllocator, Region, Strategy};
use crate::translation::{Mmu, MmuAccess, PageTableRow};

/// What one `access` went through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessReport {
    /// MMU active: the address was virtual.
    Virtual(MmuAccess),
    /// No MMU: the address went straight to the cache.
    Physical {
        address: u64,
        kind: AccessKind,
        outcome: CacheOutcome,
    },
}

/// Subsystems discarded by a memory re-initialization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetNotice {
    pub cache_reset: bool,
    pub mmu_reset: bool,
}

/// Owns the allocator, the cache controller and the MMU.
///
/// The MMU and cache never hold references into each other or into the
/// allocator; the manager lends them what they need for each call. Replacing
/// the allocator drops the cache and MMU since their frame and line mappings
/// refer to the old address space.
#[derive(Debug, Default)]
pub struct VMManager {
    memory: Option<PhysicalAllocator>,
    cache: Option<CacheController>,
    mmu: Option<Mmu>,
}

impl VMManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> Option<&PhysicalAllocator> {
        self.memory.as_ref()
    }

    pub fn cache(&self) -> Option<&CacheController> {
        self.cache.as_ref()
    }

    pub fn mmu(&self) -> Option<&Mmu> {
        self.mmu.as_ref()
    }

    fn memory_mut(&mut self) -> SimResult<&mut PhysicalAllocator> {
        self.memory.as_mut().ok_or(SimError::NotInitialized("memory"))
    }

    fn require_memory(&self) -> SimResult<&PhysicalAllocator> {
        self.memory.as_ref().ok_or(SimError::NotInitialized("memory"))
    }

    /// Replace physical memory, discarding the cache and MMU built on the old one.
    pub fn init_memory(&mut self, size: u64) -> SimResult<ResetNotice> {
        let memory = PhysicalAllocator::new(size)?;

        let notice = ResetNotice {
            cache_reset: self.cache.take().is_some(),
            mmu_reset: self.mmu.take().is_some(),
        };
        if notice.cache_reset {
            info!("cache reset due to memory change");
        }
        if notice.mmu_reset {
            info!("MMU reset due to memory change");
        }

        self.memory = Some(memory);
        Ok(notice)
    }

    /// Build L1 with the given geometry and L2 at eight times its size.
    ///
    /// Returns whether memory is present to validate misses against.
    pub fn init_cache(&mut self, size: u64, block_size: u64, associativity: u64) -> SimResult<bool> {
        let cache = CacheController::new(CacheGeometry::new(size, block_size, associativity))?;
        self.cache = Some(cache);

        let linked = self.memory.is_some();
        if !linked {
            warn!("cache initialized with no memory; every miss will fault");
        }
        Ok(linked)
    }

    /// Enable virtual addressing. Requires memory.
    pub fn init_mmu(&mut self, page_size: u64) -> SimResult<()> {
        self.require_memory()?;
        self.mmu = Some(Mmu::new(page_size)?);
        Ok(())
    }

    /// Route an access through the MMU if active, otherwise straight to the cache.
    pub fn access(&mut self, address: u64, kind: AccessKind) -> SimResult<AccessReport> {
        if let Some(mmu) = self.mmu.as_mut() {
            let memory = self.memory.as_mut().ok_or(SimError::NotInitialized("memory"))?;
            return Ok(AccessReport::Virtual(mmu.access(
                address,
                kind,
                memory,
                self.cache.as_mut(),
            )));
        }

        let cache = self
            .cache
            .as_mut()
            .ok_or(SimError::NotInitialized("MMU or cache"))?;
        let outcome = cache.access(address, kind, self.memory.as_ref());
        Ok(AccessReport::Physical { address, kind, outcome })
    }

    pub fn malloc(&mut self, size: u64) -> SimResult<u64> {
        self.memory_mut()?.allocate(size)
    }

    /// Free a region by start address. Frames backing resident pages are refused.
    ///
    /// Cached lines of the freed region are invalidated.
    pub fn free(&mut self, address: u64) -> SimResult<()> {
        if let Some(vpn) = self.mmu.as_ref().and_then(|mmu| mmu.page_for_frame(address)) {
            warn!("refusing to free frame {} of resident page {}", address, vpn);
            return Err(SimError::FrameInUse { address, vpn });
        }

        let memory = self.memory_mut()?;
        let size = memory
            .dump()
            .iter()
            .find(|region| !region.free && region.start == address)
            .map(|region| region.size);
        memory.free(address)?;

        if let (Some(cache), Some(size)) = (self.cache.as_mut(), size) {
            cache.invalidate_range(address, size);
        }
        Ok(())
    }

    pub fn set_strategy(&mut self, strategy: Strategy) -> SimResult<()> {
        self.memory_mut()?.set_strategy(strategy);
        Ok(())
    }

    pub fn regions(&self) -> SimResult<&[Region]> {
        Ok(self.require_memory()?.dump())
    }

    pub fn memory_stats(&self) -> SimResult<AllocatorStats> {
        Ok(self.require_memory()?.stats())
    }

    pub fn cache_stats(&self) -> SimResult<Vec<LevelStats>> {
        self.cache
            .as_ref()
            .map(CacheController::dump_stats)
            .ok_or(SimError::NotInitialized("cache"))
    }

    pub fn reset_cache_stats(&mut self) -> SimResult<()> {
        self.cache
            .as_mut()
            .map(CacheController::reset_stats)
            .ok_or(SimError::NotInitialized("cache"))
    }

    pub fn page_table(&self) -> SimResult<Vec<PageTableRow>> {
        self.mmu
            .as_ref()
            .map(Mmu::dump_page_table)
            .ok_or(SimError::NotInitialized("MMU"))
    }
}
