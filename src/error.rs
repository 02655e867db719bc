use std::fmt;

/// Every recoverable condition the simulator can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// No free region is large enough for the request.
    OutOfMemory { requested: u64 },
    /// No allocated region starts exactly at the address.
    InvalidFree { address: u64 },
    /// Bad geometry or non-positive size at construction time.
    ConfigurationError(String),
    /// Allocation failed even after one eviction attempt.
    PageFaultUnresolved { vpn: u64 },
    /// Access to an address not backed by a live allocation.
    SegmentationFault { address: u64 },
    /// Zero-byte allocation request.
    InvalidSize { size: u64 },
    /// The frame backs a resident page and cannot be freed directly.
    FrameInUse { address: u64, vpn: u64 },
    /// A subsystem the command needs has not been initialized.
    NotInitialized(&'static str),
}

pub type SimResult<T> = Result<T, SimError>;

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::OutOfMemory { requested } => {
                write!(f, "out of memory: no free region fits {} bytes", requested)
            }
            SimError::InvalidFree { address } => {
                write!(f, "invalid free: no allocated region starts at {}", address)
            }
            SimError::ConfigurationError(msg) => write!(f, "configuration error: {}", msg),
            SimError::PageFaultUnresolved { vpn } => {
                write!(f, "page fault unresolved: no frame available for VPN {}", vpn)
            }
            SimError::SegmentationFault { address } => {
                write!(f, "segmentation fault: address {} is not allocated", address)
            }
            SimError::InvalidSize { size } => write!(f, "invalid allocation size {}", size),
            SimError::FrameInUse { address, vpn } => {
                write!(f, "frame at {} backs resident page VPN {}", address, vpn)
            }
            SimError::NotInitialized(what) => write!(f, "{} not initialized", what),
        }
    }
}

impl std::error::Error for SimError {}
