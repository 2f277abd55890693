use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiskError>;

/// Unified error type for bootdisk device operations.
///
/// Transient firmware failures never show up here: they are absorbed by the transfer engine's
/// retry ladder. Only terminal outcomes are surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiskError {
    #[error("unaligned buffer length {len} (expected multiple of {alignment})")]
    UnalignedLength { len: usize, alignment: usize },

    #[error("out of bounds: sector={sector} count={count} capacity={capacity}")]
    OutOfBounds {
        sector: u64,
        count: u64,
        capacity: u64,
    },

    #[error("integer overflow while computing sector offsets")]
    OffsetOverflow,

    /// The initial probe of a device never succeeded.
    #[error("device {0} is unreachable")]
    DeviceUnreachable(String),

    /// A read failed after the whole degradation ladder was exhausted.
    #[error("{0} read error")]
    ReadError(String),

    /// A write failed after the whole degradation ladder was exhausted.
    #[error("{0} write error")]
    WriteError(String),

    /// The requested sector cannot be addressed by the device's current addressing mode.
    #[error("sector {sector} is out of range for {device}")]
    OutOfRange { device: String, sector: u64 },

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("invalid device: {0}")]
    BadDevice(String),

    #[error("{0} is read-only")]
    ReadOnly(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Generic I/O failure from a host-side backend.
    #[error("io error: {0}")]
    Io(String),
}
