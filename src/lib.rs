pub mod cache;
pub mod constants;
pub mod error;
pub mod io;
pub mod logging;
pub mod memory;
pub mod translation;
pub mod vm_manager;

// Re-export commonly used items for convenience
pub use cache::{AccessKind, CacheController, CacheGeometry, CacheOutcome};
pub use error::{SimError, SimResult};
pub use memory::{PhysicalAllocator, Strategy};
pub use translation::{Mmu, MmuOutcome, PageEvent, VirtualAddress};
pub use vm_manager::{AccessReport, VMManager};
