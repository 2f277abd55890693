use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bootdisk_storage::util::{checked_range, sector_count};
use bootdisk_storage::{BlockDevice, DiskError, Result, SECTOR_SIZE};

/// Raw disk image opened read-only.
///
/// A trailing partial sector is exposed as a full sector padded with zeros.
pub struct FileDisk {
    file: File,
    path: PathBuf,
    len: u64,
}

impl FileDisk {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
        })
    }

    fn io_error(&self, err: std::io::Error) -> DiskError {
        DiskError::Io(format!("{}: {err}", self.path.display()))
    }
}

impl BlockDevice for FileDisk {
    fn total_sectors(&self) -> u64 {
        self.len.div_ceil(SECTOR_SIZE as u64)
    }

    fn read_sectors(&mut self, sector: u64, buf: &mut [u8]) -> Result<()> {
        let count = sector_count(buf.len())?;
        checked_range(sector, count, self.total_sectors())?;
        let offset = sector
            .checked_mul(SECTOR_SIZE as u64)
            .ok_or(DiskError::OffsetOverflow)?;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| self.io_error(e))?;

        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(self.io_error(e)),
            }
        }
        buf[filled..].fill(0);
        Ok(())
    }

    fn write_sectors(&mut self, _sector: u64, _buf: &[u8]) -> Result<()> {
        Err(DiskError::ReadOnly(self.path.display().to_string()))
    }
}
