use std::collections::BTreeMap;
use std::fmt;

use log::{error, info, warn};

use crate::cache::{AccessKind, CacheController, CacheOutcome};
use crate::error::{SimError, SimResult};
use crate::memory::PhysicalAllocator;

/// Represents the decomposed components of a Virtual Address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualAddress {
    pub va: u64,
    pub vpn: u64,
    pub offset: u64,
}

impl VirtualAddress {
    /// Decompose a raw VA for the given page size
    pub fn from_raw(va: u64, page_size: u64) -> Self {
        VirtualAddress {
            va,
            vpn: va / page_size,
            offset: va % page_size,
        }
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA({}) = (vpn={}, offset={})", self.va, self.vpn, self.offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    pub valid: bool,
    pub frame_start: u64,
    pub dirty: bool,
    pub last_access: u64,
    /// Order in which the page became resident; breaks LRU ties.
    load_seq: u64,
}

/// Something that happened while servicing one access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    PageFault { vpn: u64 },
    /// Physical memory had no room; a victim is about to be chosen.
    MemoryFull,
    Evicted { vpn: u64, frame_start: u64 },
    /// The evicted page was dirty. Simulated, no I/O happens.
    WriteBack { vpn: u64 },
    /// Eviction was requested with no resident pages.
    NothingToEvict,
    FrameLoaded { vpn: u64, frame_start: u64 },
}

impl fmt::Display for PageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageEvent::PageFault { vpn } => write!(f, "page fault: VPN {} not in memory", vpn),
            PageEvent::MemoryFull => write!(f, "physical memory full, evicting a victim page"),
            PageEvent::Evicted { vpn, frame_start } => {
                write!(f, "evicted page {} (frame {} freed)", vpn, frame_start)
            }
            PageEvent::WriteBack { vpn } => write!(f, "saving dirty page {} to disk", vpn),
            PageEvent::NothingToEvict => write!(f, "no resident page to evict"),
            PageEvent::FrameLoaded { vpn, frame_start } => {
                write!(f, "page {} loaded into frame at {}", vpn, frame_start)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmuOutcome {
    /// Translation succeeded. `cache` is `None` when no controller is attached.
    Translated {
        physical_address: u64,
        cache: Option<CacheOutcome>,
    },
    /// No frame could be found even after evicting; the page table is untouched.
    PageFaultUnresolved,
}

/// Full record of one virtual access
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmuAccess {
    pub address: VirtualAddress,
    pub kind: AccessKind,
    pub events: Vec<PageEvent>,
    pub outcome: MmuOutcome,
}

impl MmuAccess {
    fn unresolved(address: VirtualAddress, kind: AccessKind, events: Vec<PageEvent>) -> Self {
        MmuAccess {
            address,
            kind,
            events,
            outcome: MmuOutcome::PageFaultUnresolved,
        }
    }

    pub fn physical_address(&self) -> Option<u64> {
        match self.outcome {
            MmuOutcome::Translated { physical_address, .. } => Some(physical_address),
            MmuOutcome::PageFaultUnresolved => None,
        }
    }

    pub fn page_faulted(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, PageEvent::PageFault { .. }))
    }

    /// Unresolved faults as the error they stand for.
    pub fn to_result(&self) -> SimResult<u64> {
        self.physical_address().ok_or(SimError::PageFaultUnresolved {
            vpn: self.address.vpn,
        })
    }
}

/// One row of the page table dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableRow {
    pub vpn: u64,
    pub valid: bool,
    pub frame: u64,
    pub dirty: bool,
    pub last_access: u64,
}

impl fmt::Display for PageTableRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>5} | {:>5} | {:>5} | {:>5} | {:>8}",
            self.vpn, self.valid as u8, self.frame, self.dirty as u8, self.last_access
        )
    }
}

/// Virtual memory unit with demand paging and LRU page replacement.
///
/// Frames come from the [`PhysicalAllocator`] in `page_size` units. The set
/// of resident pages is exactly the set of valid entries in the page table;
/// there is no separate list to keep in sync. Victim selection scans the
/// valid entries, which is linear in the number of resident pages.
#[derive(Debug, Clone)]
pub struct Mmu {
    page_size: u64,
    timer: u64,
    next_load_seq: u64,
    page_table: BTreeMap<u64, PageTableEntry>,
}

impl Mmu {
    pub fn new(page_size: u64) -> SimResult<Self> {
        if page_size == 0 {
            return Err(SimError::ConfigurationError(
                "page size must be positive".to_string(),
            ));
        }
        info!("MMU initialized with page size {} bytes", page_size);
        Ok(Mmu {
            page_size,
            timer: 0,
            next_load_seq: 0,
            page_table: BTreeMap::new(),
        })
    }

    #[inline]
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn entry(&self, vpn: u64) -> Option<&PageTableEntry> {
        self.page_table.get(&vpn).filter(|e| e.valid)
    }

    /// Resident VPNs in the order they were loaded
    pub fn resident_pages(&self) -> Vec<u64> {
        let mut resident: Vec<(u64, u64)> = self
            .page_table
            .iter()
            .filter(|(_, e)| e.valid)
            .map(|(&vpn, e)| (e.load_seq, vpn))
            .collect();
        resident.sort_unstable();
        resident.into_iter().map(|(_, vpn)| vpn).collect()
    }

    /// The resident page whose frame starts at `frame_start`, if any.
    pub fn page_for_frame(&self, frame_start: u64) -> Option<u64> {
        self.page_table
            .iter()
            .find(|(_, e)| e.valid && e.frame_start == frame_start)
            .map(|(&vpn, _)| vpn)
    }

    /// Translate `virtual_address`, loading its page on a fault, and forward
    /// the physical access to `cache` when one is attached.
    pub fn access(
        &mut self,
        virtual_address: u64,
        kind: AccessKind,
        memory: &mut PhysicalAllocator,
        mut cache: Option<&mut CacheController>,
    ) -> MmuAccess {
        self.timer += 1;
        let address = VirtualAddress::from_raw(virtual_address, self.page_size);
        let mut events = Vec::new();

        if self.entry(address.vpn).is_none() {
            events.push(PageEvent::PageFault { vpn: address.vpn });
            info!("page fault: VPN {} not in memory", address.vpn);

            if let Err(e) =
                self.handle_page_fault(address.vpn, memory, cache.as_deref_mut(), &mut events)
            {
                error!("cannot resolve page fault for {}: {}", address, e);
                return MmuAccess::unresolved(address, kind, events);
            }
        }

        let timer = self.timer;
        let Some(entry) = self
            .page_table
            .get_mut(&address.vpn)
            .filter(|e| e.valid)
        else {
            return MmuAccess::unresolved(address, kind, events);
        };
        entry.last_access = timer;
        if kind == AccessKind::Write {
            entry.dirty = true;
        }
        let physical_address = entry.frame_start + address.offset;

        info!("VA {} -> VPN {} -> PA {}", virtual_address, address.vpn, physical_address);

        let cache = match cache {
            Some(cache) => Some(cache.access(physical_address, kind, Some(&*memory))),
            None => {
                warn!("no cache connected, translation only");
                None
            }
        };

        MmuAccess {
            address,
            kind,
            events,
            outcome: MmuOutcome::Translated { physical_address, cache },
        }
    }

    /// Find a frame for `vpn`, evicting at most once.
    fn handle_page_fault(
        &mut self,
        vpn: u64,
        memory: &mut PhysicalAllocator,
        cache: Option<&mut CacheController>,
        events: &mut Vec<PageEvent>,
    ) -> SimResult<()> {
        let frame_start = match memory.allocate(self.page_size) {
            Ok(frame) => frame,
            Err(_) => {
                events.push(PageEvent::MemoryFull);
                info!("physical memory full, evicting a victim page");
                self.evict_victim(memory, cache, events)?;
                memory
                    .allocate(self.page_size)
                    .map_err(|_| SimError::PageFaultUnresolved { vpn })?
            }
        };

        self.page_table.insert(
            vpn,
            PageTableEntry {
                valid: true,
                frame_start,
                dirty: false,
                last_access: self.timer,
                load_seq: self.next_load_seq,
            },
        );
        self.next_load_seq += 1;

        events.push(PageEvent::FrameLoaded { vpn, frame_start });
        info!("page {} loaded into frame at {}", vpn, frame_start);
        Ok(())
    }

    /// Evict the least recently used resident page.
    ///
    /// With no resident pages this only records [`PageEvent::NothingToEvict`].
    /// If the allocator refuses to free the frame the entry stays valid.
    /// Lines of the freed frame are dropped from `cache`.
    pub fn evict_victim(
        &mut self,
        memory: &mut PhysicalAllocator,
        cache: Option<&mut CacheController>,
        events: &mut Vec<PageEvent>,
    ) -> SimResult<()> {
        let victim = self
            .page_table
            .iter()
            .filter(|(_, e)| e.valid)
            .min_by_key(|(_, e)| (e.last_access, e.load_seq))
            .map(|(&vpn, e)| (vpn, *e));

        let Some((vpn, entry)) = victim else {
            events.push(PageEvent::NothingToEvict);
            warn!("eviction requested but no page is resident");
            return Ok(());
        };

        memory.free(entry.frame_start)?;
        if let Some(cache) = cache {
            cache.invalidate_range(entry.frame_start, self.page_size);
        }

        if entry.dirty {
            events.push(PageEvent::WriteBack { vpn });
            info!("saving dirty page {} to disk", vpn);
        }
        if let Some(e) = self.page_table.get_mut(&vpn) {
            e.valid = false;
            e.dirty = false;
        }

        events.push(PageEvent::Evicted { vpn, frame_start: entry.frame_start });
        info!("evicted page {} (frame {} freed)", vpn, entry.frame_start);
        Ok(())
    }

    /// Valid entries in VPN order
    pub fn dump_page_table(&self) -> Vec<PageTableRow> {
        self.page_table
            .iter()
            .filter(|(_, e)| e.valid)
            .map(|(&vpn, e)| PageTableRow {
                vpn,
                valid: e.valid,
                frame: e.frame_start,
                dirty: e.dirty,
                last_access: e.last_access,
            })
            .collect()
    }
}
