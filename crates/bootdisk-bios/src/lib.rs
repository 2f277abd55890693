//! Legacy BIOS (INT 13h) disk backend.
//!
//! Layering
//! --------
//! - [`firmware::DiskFirmware`] is the raw I/O primitive: one INT 13h service call per method.
//!   Segment:offset addressing stays behind this trait; everything above it works on sector
//!   counts and byte slices of the [`ScratchBuffer`].
//! - [`geometry`] probes a drive once and caches a [`GeometryRecord`] in a [`GeometryTable`].
//! - [`transfer`] moves one sector range, degrading transfer size and addressing mode when the
//!   firmware refuses a request. Degradation is written back into the shared record so later
//!   calls start from the learned limits.
//! - [`BiosDisk`] enumerates and opens `hdN` / `fdN` / `boot` and implements
//!   [`bootdisk_storage::DiskBackend`].
//!
//! Everything here is single-threaded and blocking. Sharing a [`BiosDisk`] between threads
//! requires wrapping it in a mutex, since transfers mutate the geometry records.

mod biosdisk;
mod config;
pub mod emulated;
pub mod firmware;
pub mod geometry;
mod scratch;
pub mod transfer;

pub use biosdisk::{drive_name, parse_drive_name, BiosDisk, BIOSDISK_BACKEND_NAME};
pub use config::BiosDiskConfig;
pub use firmware::{Direction, DiskFirmware, Int13Status};
pub use geometry::{AddressingMode, GeometryFlags, GeometryRecord, GeometryTable};
pub use scratch::ScratchBuffer;

/// Protocol maximum for a single transfer. One below 128 so the packet that follows the data in
/// the scratch area stays inside the same 64 KiB window.
pub const MAX_SECTORS: u32 = 0x7f;

/// Transfer cap assigned before LBA support is known.
pub const DEFAULT_MAX_SECTORS: u32 = 63;

/// Transfer cap (in native sectors) used for the optical drive.
pub const OPTICAL_MAX_SECTORS: u32 = 32;

/// Highest sector reachable through CHS addressing (1024 cylinders, 256 heads, 63 sectors).
pub const CHS_SECTOR_LIMIT: u64 = 1024 * 256 * 63;

/// First fixed-disk drive number.
pub const FIXED_DISK_BASE: u8 = 0x80;

#[cfg(test)]
mod proptests;
