//! Append-only block and undo file segments.
//!
//! Blocks are stored in numbered segment files of at most
//! `MAX_BLOCKFILE_SIZE` bytes, paired with undo segments. Each record is a
//! length-prefixed blob; the [`DiskPosition`] stored in the block index
//! points straight at the record.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use zenith_chain::parameters::MAX_BLOCKFILE_SIZE;

use crate::block_index::DiskPosition;
use crate::BoxError;

/// One family of append-only segments (`blk*.dat` or `rev*.dat`).
pub struct SegmentWriter {
    dir: PathBuf,
    prefix: &'static str,
    current_file: u32,
    current_len: u64,
}

impl SegmentWriter {
    /// Open (or resume) the segment family under `dir`.
    pub fn open(dir: &Path, prefix: &'static str) -> Result<SegmentWriter, BoxError> {
        std::fs::create_dir_all(dir)?;
        // resume at the highest existing segment
        let mut current_file = 0;
        while dir.join(segment_name(prefix, current_file + 1)).exists() {
            current_file += 1;
        }
        let current_len = std::fs::metadata(dir.join(segment_name(prefix, current_file)))
            .map(|meta| meta.len())
            .unwrap_or(0);
        Ok(SegmentWriter {
            dir: dir.to_path_buf(),
            prefix,
            current_file,
            current_len,
        })
    }

    /// Append one record, rolling to a new segment when the current one is
    /// full. Returns where the record landed.
    pub fn append(&mut self, record: &[u8]) -> Result<DiskPosition, BoxError> {
        let record_len = 8 + record.len() as u64;
        if self.current_len + record_len > MAX_BLOCKFILE_SIZE && self.current_len > 0 {
            self.current_file += 1;
            self.current_len = 0;
        }

        let path = self.dir.join(segment_name(self.prefix, self.current_file));
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        let position = DiskPosition {
            file: self.current_file,
            offset: self.current_len,
        };
        file.write_all(&(record.len() as u64).to_le_bytes())?;
        file.write_all(record)?;
        file.sync_data()?;
        self.current_len += record_len;
        Ok(position)
    }

    /// Read back the record at `position`.
    pub fn read(&self, position: DiskPosition) -> Result<Vec<u8>, BoxError> {
        let path = self.dir.join(segment_name(self.prefix, position.file));
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(position.offset))?;
        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);
        if len > MAX_BLOCKFILE_SIZE {
            return Err("corrupt record length".into());
        }
        let mut record = vec![0u8; len as usize];
        file.read_exact(&mut record)?;
        Ok(record)
    }
}

fn segment_name(prefix: &str, file: u32) -> String {
    format!("{}{:05}.dat", prefix, file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back() {
        let dir = std::env::temp_dir().join(format!("zenith-segments-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let mut writer = SegmentWriter::open(&dir, "blk").unwrap();
        let first = writer.append(b"first record").unwrap();
        let second = writer.append(b"second record").unwrap();

        assert_eq!(writer.read(first).unwrap(), b"first record");
        assert_eq!(writer.read(second).unwrap(), b"second record");
        assert_eq!(first.file, second.file);
        assert!(second.offset > first.offset);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
