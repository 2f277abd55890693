//! Sector-addressed disk abstractions shared by the bootdisk backends.
//!
//! Boot-time disk code talks to media through narrow firmware calls, but everything above that
//! layer (partition tables, RAID assembly, filesystems) wants one uniform contract. This crate
//! provides:
//!
//! - [`BlockDevice`]: sector-oriented read/write interface with a byte-offset read helper
//! - [`MemDisk`]: sparse in-memory block device (unwritten sectors read back as zeros)
//! - [`DiskBackend`]: a pluggable, name-addressed disk driver (`hd0`, `fd0`, `boot`, ...)
//! - [`DiskRegistry`]: ordered collection of backends that routes `open`/`read`/`write`
//! - [`DiskReader`]: adapts an opened [`Disk`] handle back into a [`BlockDevice`]

mod device;
mod error;
mod registry;
pub mod util;

pub use device::{BlockDevice, MemDisk};
pub use error::{DiskError, Result};
pub use registry::{Disk, DiskBackend, DiskReader, DiskRegistry};

/// Native sector size of every block device handled here.
pub const SECTOR_SIZE: usize = 512;

/// Sentinel `total_sectors` for media whose size cannot be queried (e.g. optical drives).
pub const UNKNOWN_TOTAL_SECTORS: u64 = u64::MAX;
