use crate::buffer::page::Lsn;
use crate::error::{Error, Result};
use crate::io::{DiskFile, FileIo, MemFile};
use crate::log::block::{block_floor, LOG_BLOCK_SIZE};
use std::path::Path;
use std::sync::Arc;

/// Header area at start of each log file.
/// First file of first group also holds two checkpoint slots in it.
pub const LOG_FILE_HDR_SIZE: u64 = 2048;
pub const LOG_CHECKPOINT_1: u64 = 512;
pub const LOG_CHECKPOINT_2: u64 = 1536;

const LOG_FILE_MAGIC: u32 = 0x4B4C_4F47;
const LOG_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    /// Log writer is appending to this group.
    Current,
    /// Holds records not yet covered by checkpoint.
    Active,
    /// Content is not needed and can be overwritten.
    Inactive,
}

pub struct LogGroup {
    pub id: u32,
    files: Vec<Arc<dyn FileIo>>,
    /// LSN mapped to the first data byte of the first file.
    pub base_lsn: Lsn,
    pub status: GroupStatus,
}

/// Log groups used in a ring.
///
/// Each group maps a contiguous LSN range of its capacity, starting
/// from its base LSN. When current group is full, the next group is
/// reused once checkpoint has passed its old content.
pub struct LogGroups {
    groups: Vec<LogGroup>,
    current: usize,
    file_size: u64,
}

impl LogGroups {
    #[inline]
    pub fn new(files: Vec<Vec<Arc<dyn FileIo>>>, file_size: u64) -> Result<Self> {
        if files.len() < 2 || files.iter().any(|g| g.is_empty()) {
            return Err(Error::InvalidConfig("at least two non-empty log groups required"));
        }
        let n_files = files[0].len();
        if files.iter().any(|g| g.len() != n_files) {
            return Err(Error::InvalidConfig("log groups must have same number of files"));
        }
        if file_size <= LOG_FILE_HDR_SIZE || file_size % LOG_BLOCK_SIZE as u64 != 0 {
            return Err(Error::InvalidConfig("invalid log file size"));
        }
        let groups = files
            .into_iter()
            .enumerate()
            .map(|(id, files)| LogGroup {
                id: id as u32,
                files,
                base_lsn: 0,
                status: GroupStatus::Inactive,
            })
            .collect();
        Ok(LogGroups {
            groups,
            current: 0,
            file_size,
        })
    }

    #[inline]
    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    #[inline]
    pub fn group(&self, idx: usize) -> &LogGroup {
        &self.groups[idx]
    }

    #[inline]
    pub fn current_idx(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn current(&self) -> &LogGroup {
        &self.groups[self.current]
    }

    #[inline]
    pub fn next_idx(&self, idx: usize) -> usize {
        (idx + 1) % self.groups.len()
    }

    /// Data bytes of each file.
    #[inline]
    pub fn file_data_size(&self) -> u64 {
        self.file_size - LOG_FILE_HDR_SIZE
    }

    /// LSN span of one group.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.file_data_size() * self.groups[0].files.len() as u64
    }

    /// LSN span of all groups.
    #[inline]
    pub fn total_capacity(&self) -> u64 {
        self.capacity() * self.groups.len() as u64
    }

    #[inline]
    pub fn group_end(&self, idx: usize) -> Lsn {
        self.groups[idx].base_lsn + self.capacity()
    }

    /// Returns file, offset in file and LSN where the file ends,
    /// for an LSN inside given group.
    #[inline]
    pub fn locate(&self, idx: usize, lsn: Lsn) -> (Arc<dyn FileIo>, u64, Lsn) {
        let group = &self.groups[idx];
        debug_assert!(lsn >= group.base_lsn && lsn < self.group_end(idx));
        let rel = lsn - group.base_lsn;
        let data_size = self.file_data_size();
        let file_no = (rel / data_size) as usize;
        let in_file = rel % data_size;
        let file_end = lsn - in_file + data_size;
        (
            Arc::clone(&group.files[file_no]),
            LOG_FILE_HDR_SIZE + in_file,
            file_end,
        )
    }

    /// Byte offset of an LSN within its group, counting file headers.
    #[inline]
    pub fn group_offset(&self, idx: usize, lsn: Lsn) -> u64 {
        let rel = lsn - self.groups[idx].base_lsn;
        let data_size = self.file_data_size();
        (rel / data_size) * self.file_size + LOG_FILE_HDR_SIZE + rel % data_size
    }

    /// Inverse of `group_offset`: base LSN of the group.
    #[inline]
    pub fn base_from_offset(&self, lsn: Lsn, offset: u64) -> Result<Lsn> {
        let file_no = offset / self.file_size;
        let in_file = offset % self.file_size;
        if in_file < LOG_FILE_HDR_SIZE || file_no >= self.groups[0].files.len() as u64 {
            return Err(Error::LogFileCorrupted);
        }
        let rel = file_no * self.file_data_size() + in_file - LOG_FILE_HDR_SIZE;
        if rel > lsn || block_floor(lsn - rel) != lsn - rel {
            return Err(Error::LogFileCorrupted);
        }
        Ok(lsn - rel)
    }

    /// Initialize mapping of a freshly created log.
    #[inline]
    pub fn init_fresh(&mut self, start_lsn: Lsn) {
        for g in &mut self.groups {
            g.base_lsn = 0;
            g.status = GroupStatus::Inactive;
        }
        self.current = 0;
        self.groups[0].base_lsn = block_floor(start_lsn);
        self.groups[0].status = GroupStatus::Current;
    }

    /// Restore mapping from checkpoint group and its base LSN.
    /// Groups after it are assumed to continue the LSN sequence, which
    /// is verified block by block while scanning.
    #[inline]
    pub fn init_from_checkpoint(&mut self, ckpt_group: usize, base_lsn: Lsn) {
        let n = self.groups.len();
        let cap = self.capacity();
        for k in 0..n {
            let idx = (ckpt_group + k) % n;
            self.groups[idx].base_lsn = base_lsn + k as u64 * cap;
            self.groups[idx].status = GroupStatus::Inactive;
        }
        self.current = ckpt_group;
        self.groups[ckpt_group].status = GroupStatus::Current;
    }

    /// Index of group holding `lsn` according to current mapping.
    #[inline]
    pub fn group_of(&self, lsn: Lsn) -> Option<usize> {
        (0..self.groups.len()).find(|idx| {
            let g = &self.groups[*idx];
            g.base_lsn <= lsn && lsn < g.base_lsn + self.capacity()
        })
    }

    /// Finish restore after scan found end of log.
    #[inline]
    pub fn set_end(&mut self, end_lsn: Lsn) -> Result<()> {
        let idx = self.group_of(end_lsn).ok_or(Error::LogFileCorrupted)?;
        let ckpt_group = self.current;
        let mut cur = ckpt_group;
        while cur != idx {
            self.groups[cur].status = GroupStatus::Active;
            cur = self.next_idx(cur);
        }
        self.groups[idx].status = GroupStatus::Current;
        self.current = idx;
        Ok(())
    }

    /// Whether next group can be reused for writing.
    #[inline]
    pub fn can_rotate(&self) -> bool {
        self.groups[self.next_idx(self.current)].status == GroupStatus::Inactive
    }

    /// LSN checkpoint must reach before next group can be reused.
    #[inline]
    pub fn rotate_required_lsn(&self) -> Lsn {
        let next = self.next_idx(self.current);
        match self.groups[next].status {
            GroupStatus::Inactive => 0,
            _ => self.group_end(next),
        }
    }

    /// Switch writing to next group.
    #[inline]
    pub fn rotate(&mut self) {
        debug_assert!(self.can_rotate());
        let next = self.next_idx(self.current);
        let base = self.group_end(self.current);
        self.groups[self.current].status = GroupStatus::Active;
        self.groups[next].base_lsn = base;
        self.groups[next].status = GroupStatus::Current;
        self.current = next;
    }

    /// Release groups whose content is entirely before checkpoint.
    #[inline]
    pub fn on_checkpoint(&mut self, checkpoint_lsn: Lsn) {
        let cap = self.capacity();
        for g in &mut self.groups {
            if g.status == GroupStatus::Active && g.base_lsn + cap <= checkpoint_lsn {
                g.status = GroupStatus::Inactive;
            }
        }
    }

    /// All files of given groups.
    #[inline]
    pub fn files_of(&self, idxs: impl IntoIterator<Item = usize>) -> Vec<Arc<dyn FileIo>> {
        idxs.into_iter()
            .flat_map(|idx| self.groups[idx].files.iter().cloned())
            .collect()
    }

    /// File holding checkpoint slots.
    #[inline]
    pub fn checkpoint_file(&self) -> Arc<dyn FileIo> {
        Arc::clone(&self.groups[0].files[0])
    }

    /// Write header of every file and set file length.
    pub fn format(&self) -> Result<()> {
        for g in &self.groups {
            for (file_no, file) in g.files.iter().enumerate() {
                file.set_len(self.file_size)?;
                let hdr = file_header(g.id, file_no as u32, self.file_size);
                file.write_at(0, &hdr)?;
                file.sync_all()?;
            }
        }
        Ok(())
    }

    /// Verify header of every file.
    pub fn verify(&self) -> Result<()> {
        for g in &self.groups {
            for (file_no, file) in g.files.iter().enumerate() {
                let mut hdr = [0u8; LOG_BLOCK_SIZE];
                file.read_at(0, &mut hdr)?;
                if hdr != file_header(g.id, file_no as u32, self.file_size) {
                    log::error!(
                        "header of log file {} in group {} mismatch",
                        file_no,
                        g.id
                    );
                    return Err(Error::LogFileCorrupted);
                }
            }
        }
        Ok(())
    }
}

#[inline]
fn file_header(group_id: u32, file_no: u32, file_size: u64) -> [u8; LOG_BLOCK_SIZE] {
    let mut hdr = [0u8; LOG_BLOCK_SIZE];
    hdr[0..4].copy_from_slice(&LOG_FILE_MAGIC.to_le_bytes());
    hdr[4..8].copy_from_slice(&LOG_FORMAT_VERSION.to_le_bytes());
    hdr[8..12].copy_from_slice(&group_id.to_le_bytes());
    hdr[12..16].copy_from_slice(&file_no.to_le_bytes());
    hdr[16..24].copy_from_slice(&file_size.to_le_bytes());
    let checksum = crc32fast::hash(&hdr[..LOG_BLOCK_SIZE - 4]);
    hdr[LOG_BLOCK_SIZE - 4..].copy_from_slice(&checksum.to_le_bytes());
    hdr
}

/// Files of all log groups, indexed by group then file number.
pub struct LogFiles {
    pub files: Vec<Vec<Arc<dyn FileIo>>>,
    /// Whether files are newly created and need format.
    pub created: bool,
}

impl LogFiles {
    /// Create log files in memory.
    #[inline]
    pub fn in_memory(groups: usize, files_per_group: usize) -> Self {
        let files = (0..groups)
            .map(|_| {
                (0..files_per_group)
                    .map(|_| Arc::new(MemFile::new()) as Arc<dyn FileIo>)
                    .collect()
            })
            .collect();
        LogFiles {
            files,
            created: true,
        }
    }

    /// Open log files in a directory, creating them if none exists.
    /// The complete file name pattern is:
    /// <file-prefix>.<group>.<file-no>, e.g. redo.log.0.1
    pub fn on_disk(
        dir: impl AsRef<Path>,
        file_prefix: &str,
        groups: usize,
        files_per_group: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let pattern = format!("{}/{}.*.*", dir.to_string_lossy(), file_prefix);
        let mut existing = vec![];
        for entry in glob::glob(&pattern)? {
            existing.push(entry?);
        }
        let created = existing.is_empty();
        if !created && existing.len() != groups * files_per_group {
            log::error!(
                "found {} log files, expect {}",
                existing.len(),
                groups * files_per_group
            );
            return Err(Error::LogFileCorrupted);
        }
        let mut files = Vec::with_capacity(groups);
        for g in 0..groups {
            let mut group = Vec::with_capacity(files_per_group);
            for f in 0..files_per_group {
                let path = dir.join(format!("{}.{}.{}", file_prefix, g, f));
                let file = if created {
                    log::info!("create log file {:?}", path);
                    DiskFile::create(&path)?
                } else {
                    DiskFile::open(&path).map_err(|e| {
                        log::error!("open log file {:?} failed: {}", path, e);
                        Error::LogFileCorrupted
                    })?
                };
                group.push(Arc::new(file) as Arc<dyn FileIo>);
            }
            files.push(group);
        }
        Ok(LogFiles { files, created })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::block::LOG_START_LSN;
    use tempfile::TempDir;

    fn new_groups(n: usize, files: usize) -> LogGroups {
        let lf = LogFiles::in_memory(n, files);
        LogGroups::new(lf.files, LOG_FILE_HDR_SIZE + 4096).unwrap()
    }

    #[test]
    fn test_log_groups_locate() {
        let mut groups = new_groups(2, 2);
        assert_eq!(groups.capacity(), 8192);
        groups.init_fresh(LOG_START_LSN + 12);
        let base = LOG_START_LSN;
        let (_, off, file_end) = groups.locate(0, base + 100);
        assert_eq!(off, LOG_FILE_HDR_SIZE + 100);
        assert_eq!(file_end, base + 4096);
        let (_, off, file_end) = groups.locate(0, base + 5000);
        assert_eq!(off, LOG_FILE_HDR_SIZE + 904);
        assert_eq!(file_end, base + 8192);
        let offset = groups.group_offset(0, base + 5120);
        assert_eq!(groups.base_from_offset(base + 5120, offset).unwrap(), base);
    }

    #[test]
    fn test_log_groups_rotate() {
        let mut groups = new_groups(3, 1);
        groups.init_fresh(LOG_START_LSN + 12);
        assert!(groups.can_rotate());
        groups.rotate();
        groups.rotate();
        assert_eq!(groups.current_idx(), 2);
        assert_eq!(groups.group(2).base_lsn, LOG_START_LSN + 8192);
        // group 0 still has records needed
        assert!(!groups.can_rotate());
        assert_eq!(groups.rotate_required_lsn(), LOG_START_LSN + 4096);
        groups.on_checkpoint(LOG_START_LSN + 4096);
        assert_eq!(groups.group(0).status, GroupStatus::Inactive);
        assert_eq!(groups.group(1).status, GroupStatus::Active);
        assert!(groups.can_rotate());
        groups.rotate();
        assert_eq!(groups.current_idx(), 0);
        assert_eq!(groups.group(0).base_lsn, LOG_START_LSN + 3 * 4096);
    }

    #[test]
    fn test_log_groups_restore() {
        let mut groups = new_groups(3, 1);
        groups.init_from_checkpoint(1, 20480);
        assert_eq!(groups.group(2).base_lsn, 20480 + 4096);
        assert_eq!(groups.group(0).base_lsn, 20480 + 8192);
        groups.set_end(20480 + 4096 + 100).unwrap();
        assert_eq!(groups.current_idx(), 2);
        assert_eq!(groups.group(1).status, GroupStatus::Active);
        assert_eq!(groups.group(0).status, GroupStatus::Inactive);
    }

    #[test]
    fn test_log_files_on_disk() {
        let dir = TempDir::new().unwrap();
        let files = LogFiles::on_disk(dir.path(), "redo.log", 2, 2).unwrap();
        assert!(files.created);
        let groups = LogGroups::new(files.files, LOG_FILE_HDR_SIZE + 4096).unwrap();
        groups.format().unwrap();
        let files = LogFiles::on_disk(dir.path(), "redo.log", 2, 2).unwrap();
        assert!(!files.created);
        let groups = LogGroups::new(files.files, LOG_FILE_HDR_SIZE + 4096).unwrap();
        groups.verify().unwrap();
        // mismatched layout is rejected
        assert!(LogFiles::on_disk(dir.path(), "redo.log", 3, 2).is_err());
        let groups = LogGroups::new(
            LogFiles::on_disk(dir.path(), "redo.log", 2, 2).unwrap().files,
            LOG_FILE_HDR_SIZE + 8192,
        )
        .unwrap();
        assert_eq!(groups.verify(), Err(Error::LogFileCorrupted));
    }
}
