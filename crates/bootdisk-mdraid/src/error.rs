use bootdisk_storage::DiskError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RaidError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RaidError {
    /// No MD metadata on the device. A normal negative answer.
    #[error("not raid")]
    NotRaid,

    #[error("unsupported RAID version: {major}.{minor}")]
    UnsupportedVersion { major: u32, minor: u32 },

    #[error("unsupported RAID level: {0}")]
    UnsupportedLevel(i32),

    #[error(transparent)]
    Disk(#[from] DiskError),
}
