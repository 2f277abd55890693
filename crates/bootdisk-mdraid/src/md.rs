use bootdisk_storage::{BlockDevice, UNKNOWN_TOTAL_SECTORS};
use tracing::debug;

use crate::superblock::{
    SuperblockV090, SuperblockV1, V090_RESERVED_SECTORS, V090_SIZE, V1_HEADER_SIZE,
};
use crate::{
    normalize_level, ArrayDescriptor, RaidDetector, RaidError, Result, MD_MAGIC,
    SUPPORTED_LEVELS,
};

pub const MDRAID_NAME: &str = "mdraid";

/// Smallest device that can hold a v1.x superblock at its end.
const V1_MIN_SECTORS: u64 = 24;

/// The Linux MD detector, trying v1.x metadata before v0.90.
#[derive(Debug, Clone, Copy, Default)]
pub struct MdRaid;

impl RaidDetector for MdRaid {
    fn name(&self) -> &'static str {
        MDRAID_NAME
    }

    fn detect(&self, device: &mut dyn BlockDevice) -> Result<ArrayDescriptor> {
        detect(device)
    }
}

/// Reads MD metadata from `device`.
///
/// Returns [`RaidError::NotRaid`] when no metadata is present and propagates any read error.
pub fn detect<D: BlockDevice + ?Sized>(device: &mut D) -> Result<ArrayDescriptor> {
    let size = device.total_sectors();
    if size == UNKNOWN_TOTAL_SECTORS {
        debug!("device size unknown; cannot locate MD metadata");
        return Err(RaidError::NotRaid);
    }

    if let Some(sb) = find_v1(device, size)? {
        debug!(
            super_offset = sb.super_offset,
            ctime = sb.ctime_seconds(),
            "found MD v1.x superblock"
        );
        return Ok(sb.descriptor());
    }

    detect_v090(device, size)
}

/// v1.0 stores the superblock near the end, v1.1 at sector 0 and v1.2 at sector 8.
fn v1_candidates(size: u64) -> [u64; 3] {
    [(size - 16) & !7, 0, 8]
}

fn find_v1<D: BlockDevice + ?Sized>(device: &mut D, size: u64) -> Result<Option<SuperblockV1>> {
    if size < V1_MIN_SECTORS {
        return Ok(None);
    }

    let mut best: Option<SuperblockV1> = None;
    let mut raw = [0u8; V1_HEADER_SIZE];
    for sector in v1_candidates(size) {
        device.read_at(sector, 0, &mut raw)?;
        let Some(sb) = SuperblockV1::parse(&raw) else {
            continue;
        };
        if !sb.is_valid_at(sector) {
            continue;
        }
        // Equal creation times keep the copy found first, i.e. the one at the end.
        let newer = match &best {
            Some(current) => sb.ctime > current.ctime,
            None => true,
        };
        if newer {
            best = Some(sb);
        }
    }
    Ok(best)
}

fn detect_v090<D: BlockDevice + ?Sized>(device: &mut D, size: u64) -> Result<ArrayDescriptor> {
    let sector = (size & !(V090_RESERVED_SECTORS - 1))
        .checked_sub(V090_RESERVED_SECTORS)
        .ok_or(RaidError::NotRaid)?;

    let mut raw = vec![0u8; V090_SIZE];
    device.read_sectors(sector, &mut raw)?;
    let sb = SuperblockV090::parse(&raw).ok_or(RaidError::NotRaid)?;

    if sb.magic != MD_MAGIC {
        return Err(RaidError::NotRaid);
    }
    if sb.major_version != 0 || sb.minor_version != 90 {
        return Err(RaidError::UnsupportedVersion {
            major: sb.major_version,
            minor: sb.minor_version,
        });
    }
    let level = normalize_level(sb.level);
    if !SUPPORTED_LEVELS.contains(&level) {
        return Err(RaidError::UnsupportedLevel(level));
    }

    debug!(sector, level, md_minor = sb.md_minor, "found MD v0.90 superblock");
    Ok(sb.descriptor(sector, level))
}
