//! End-to-end accesses through the memory manager: MMU -> cache -> allocator.

use rust_memory_hierarchy::io::Command;
use rust_memory_hierarchy::translation::{MmuAccess, PageEvent};
use rust_memory_hierarchy::{
    AccessKind, AccessReport, CacheOutcome, MmuOutcome, SimError, Strategy, VMManager,
};

fn virtual_access(vm: &mut VMManager, address: u64, kind: AccessKind) -> MmuAccess {
    match vm.access(address, kind).unwrap() {
        AccessReport::Virtual(access) => access,
        other => panic!("expected a virtual access, got {:?}", other),
    }
}

/// Drive the manager with command lines, the way the front end does.
fn run_script(vm: &mut VMManager, script: &str) {
    for line in script.lines() {
        match Command::parse(line).unwrap() {
            Some(Command::InitMemory { size }) => {
                vm.init_memory(size).unwrap();
            }
            Some(Command::InitCache { size, block_size, associativity }) => {
                vm.init_cache(size, block_size, associativity).unwrap();
            }
            Some(Command::InitMmu { page_size }) => vm.init_mmu(page_size).unwrap(),
            Some(Command::Malloc { size }) => {
                vm.malloc(size).unwrap();
            }
            Some(Command::SetStrategy(strategy)) => vm.set_strategy(strategy).unwrap(),
            Some(other) => panic!("unexpected command in setup: {:?}", other),
            None => {}
        }
    }
}

#[test]
fn page_fault_round_trip_reaches_cache() {
    let mut vm = VMManager::new();
    run_script(
        &mut vm,
        "init standard 1024
         init_cache 64 16 1
         init_mmu 64",
    );

    let access = virtual_access(&mut vm, 70, AccessKind::Read);
    assert_eq!(access.address.vpn, 1);
    assert_eq!(access.address.offset, 6);
    assert_eq!(
        access.events,
        vec![
            PageEvent::PageFault { vpn: 1 },
            PageEvent::FrameLoaded { vpn: 1, frame_start: 0 },
        ]
    );
    assert_eq!(
        access.outcome,
        MmuOutcome::Translated {
            physical_address: 6,
            cache: Some(CacheOutcome::MemoryFetch),
        }
    );

    // Same page, same line: no fault, L1 hit
    let access = virtual_access(&mut vm, 71, AccessKind::Read);
    assert!(access.events.is_empty());
    assert_eq!(
        access.outcome,
        MmuOutcome::Translated {
            physical_address: 7,
            cache: Some(CacheOutcome::L1Hit),
        }
    );
}

#[test]
fn eviction_under_memory_pressure_keeps_invariants() {
    let mut vm = VMManager::new();
    run_script(
        &mut vm,
        "init standard 256
         init_cache 64 16 2
         init_mmu 64
         malloc 64  # one frame's worth held outside the MMU",
    );

    // Three frames left for pages; touch five pages with reuse
    let pattern = [0, 64, 128, 0, 192, 256, 0, 64];
    let mut evictions = 0;
    for (i, &va) in pattern.iter().enumerate() {
        let kind = if i % 2 == 0 { AccessKind::Write } else { AccessKind::Read };
        let access = virtual_access(&mut vm, va, kind);
        assert!(access.physical_address().is_some(), "access {} unresolved", va);
        evictions += access
            .events
            .iter()
            .filter(|e| matches!(e, PageEvent::Evicted { .. }))
            .count();

        let memory = vm.memory().unwrap();
        let rows = vm.page_table().unwrap();
        assert!(rows.len() <= 3);
        for row in &rows {
            assert!(memory.is_allocated(row.frame));
            assert_eq!(row.frame % 64, 0);
        }
        assert_eq!(memory.stats().used, 64 + 64 * rows.len() as u64);
    }
    assert!(evictions >= 2);
}

#[test]
fn unresolved_fault_reports_and_changes_nothing() {
    let mut vm = VMManager::new();
    run_script(
        &mut vm,
        "init standard 100
         init_mmu 64
         malloc 50",
    );

    let access = virtual_access(&mut vm, 10, AccessKind::Read);
    assert_eq!(access.outcome, MmuOutcome::PageFaultUnresolved);
    assert_eq!(access.to_result(), Err(SimError::PageFaultUnresolved { vpn: 0 }));
    assert!(vm.page_table().unwrap().is_empty());
    assert_eq!(vm.memory_stats().unwrap().used, 50);
}

#[test]
fn physical_fault_never_pollutes_cache() {
    let mut vm = VMManager::new();
    run_script(
        &mut vm,
        "init standard 1024
         init_cache 64 16 1
         malloc 100",
    );

    for _ in 0..3 {
        let report = vm.access(500, AccessKind::Write).unwrap();
        assert!(matches!(
            report,
            AccessReport::Physical { outcome: CacheOutcome::Fault, .. }
        ));
    }
    let cache = vm.cache().unwrap();
    assert!(!cache.l1().probe(500));
    assert!(!cache.l2().unwrap().probe(500));
    assert_eq!(cache.l1().stats().misses, 3);
}

#[test]
fn best_fit_allocation_through_manager() {
    let mut vm = VMManager::new();
    run_script(
        &mut vm,
        "init standard 105
         malloc 50
         malloc 5
         malloc 10
         malloc 5
         malloc 30
         malloc 5",
    );
    for address in [0, 55, 70] {
        vm.free(address).unwrap();
    }

    vm.set_strategy(Strategy::BestFit).unwrap();
    assert_eq!(vm.malloc(10), Ok(55));
    vm.set_strategy(Strategy::WorstFit).unwrap();
    assert_eq!(vm.malloc(10), Ok(0));
    vm.set_strategy(Strategy::FirstFit).unwrap();
    assert_eq!(vm.malloc(10), Ok(10));

    assert_eq!(vm.free(12), Err(SimError::InvalidFree { address: 12 }));
}
