use crate::buffer::page::{PageId, PageNo, SpaceId, PAGE_SIZE};
use crate::error::{Error, Result};
use crate::io::{DiskFile, FileIo, MemFile};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

const SPACE_FILE_PREFIX: &str = "space_";
const SPACE_FILE_SUFFIX: &str = ".dat";

/// Tablespace collaborator of buffer pool.
///
/// Each tablespace is an array of fixed-size pages addressed by page number.
pub trait Tablespaces: Send + Sync {
    fn exists(&self, space: SpaceId) -> bool;

    /// Returns current size of the tablespace in pages.
    fn size_in_pages(&self, space: SpaceId) -> Result<PageNo>;

    /// Extend the tablespace to hold at least `n_pages` pages.
    fn extend(&self, space: SpaceId, n_pages: PageNo) -> Result<()>;

    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()>;

    fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<()>;

    fn sync(&self, space: SpaceId) -> Result<()>;

    /// Sync every tablespace.
    fn sync_all(&self) -> Result<()>;
}

struct SpaceFile {
    file: Arc<dyn FileIo>,
    n_pages: Mutex<PageNo>,
}

/// Tablespaces backed by one file per space, either in a directory
/// on disk or purely in memory.
pub struct FileSpaces {
    dir: Option<PathBuf>,
    spaces: RwLock<HashMap<SpaceId, Arc<SpaceFile>>>,
}

impl FileSpaces {
    /// Create tablespaces in memory.
    #[inline]
    pub fn in_memory() -> Self {
        FileSpaces {
            dir: None,
            spaces: RwLock::new(HashMap::new()),
        }
    }

    /// Open tablespaces in given directory.
    /// Existing space files are discovered and attached.
    pub fn on_disk(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let pattern = format!(
            "{}/{}*{}",
            dir.to_string_lossy(),
            SPACE_FILE_PREFIX,
            SPACE_FILE_SUFFIX
        );
        let mut spaces = HashMap::new();
        for entry in glob::glob(&pattern)? {
            let path = entry?;
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(id) = parse_space_file_name(name) else {
                log::warn!("skip unrecognized space file {:?}", path);
                continue;
            };
            let file = DiskFile::open(&path)?;
            let n_pages = (file.len()? / PAGE_SIZE as u64) as PageNo;
            log::info!("attach tablespace {} with {} pages", id, n_pages);
            spaces.insert(
                id,
                Arc::new(SpaceFile {
                    file: Arc::new(file),
                    n_pages: Mutex::new(n_pages),
                }),
            );
        }
        Ok(FileSpaces {
            dir: Some(dir),
            spaces: RwLock::new(spaces),
        })
    }

    /// Create a new empty tablespace.
    pub fn create_space(&self, space: SpaceId) -> Result<()> {
        let mut g = self.spaces.write();
        if g.contains_key(&space) {
            return Err(Error::InvalidArgument);
        }
        let file: Arc<dyn FileIo> = match &self.dir {
            Some(dir) => Arc::new(DiskFile::create(dir.join(space_file_name(space)))?),
            None => Arc::new(MemFile::new()),
        };
        g.insert(
            space,
            Arc::new(SpaceFile {
                file,
                n_pages: Mutex::new(0),
            }),
        );
        log::debug!("tablespace {} created", space);
        Ok(())
    }

    /// Attach an existing file as tablespace.
    pub fn attach_space(&self, space: SpaceId, file: Arc<dyn FileIo>) -> Result<()> {
        let n_pages = (file.len()? / PAGE_SIZE as u64) as PageNo;
        let mut g = self.spaces.write();
        if g.contains_key(&space) {
            return Err(Error::InvalidArgument);
        }
        g.insert(
            space,
            Arc::new(SpaceFile {
                file,
                n_pages: Mutex::new(n_pages),
            }),
        );
        Ok(())
    }

    /// Drop a tablespace.
    /// Cached pages of this space are not touched here. Buffer pool
    /// discards them when flushing, or all at once by
    /// `BufferPool::discard_space`.
    pub fn drop_space(&self, space: SpaceId) -> Result<()> {
        let removed = self.spaces.write().remove(&space);
        if removed.is_none() {
            return Err(Error::SpaceDeleted(space));
        }
        if let Some(dir) = &self.dir {
            std::fs::remove_file(dir.join(space_file_name(space)))?;
        }
        log::debug!("tablespace {} dropped", space);
        Ok(())
    }

    #[inline]
    fn space(&self, space: SpaceId) -> Result<Arc<SpaceFile>> {
        self.spaces
            .read()
            .get(&space)
            .cloned()
            .ok_or(Error::SpaceDeleted(space))
    }
}

impl Tablespaces for FileSpaces {
    #[inline]
    fn exists(&self, space: SpaceId) -> bool {
        self.spaces.read().contains_key(&space)
    }

    #[inline]
    fn size_in_pages(&self, space: SpaceId) -> Result<PageNo> {
        let sf = self.space(space)?;
        let n = *sf.n_pages.lock();
        Ok(n)
    }

    fn extend(&self, space: SpaceId, n_pages: PageNo) -> Result<()> {
        let sf = self.space(space)?;
        let mut g = sf.n_pages.lock();
        if *g >= n_pages {
            return Ok(());
        }
        sf.file.set_len(n_pages as u64 * PAGE_SIZE as u64)?;
        *g = n_pages;
        Ok(())
    }

    #[inline]
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let sf = self.space(page_id.space)?;
        sf.file
            .read_at(page_id.page_no as u64 * PAGE_SIZE as u64, buf)?;
        Ok(())
    }

    #[inline]
    fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let sf = self.space(page_id.space)?;
        sf.file
            .write_at(page_id.page_no as u64 * PAGE_SIZE as u64, buf)?;
        let mut g = sf.n_pages.lock();
        if *g <= page_id.page_no {
            *g = page_id.page_no + 1;
        }
        Ok(())
    }

    #[inline]
    fn sync(&self, space: SpaceId) -> Result<()> {
        let sf = self.space(space)?;
        sf.file.sync_data()?;
        Ok(())
    }

    #[inline]
    fn sync_all(&self) -> Result<()> {
        let files: Vec<_> = self.spaces.read().values().cloned().collect();
        for sf in files {
            sf.file.sync_data()?;
        }
        Ok(())
    }
}

#[inline]
fn space_file_name(space: SpaceId) -> String {
    format!("{}{:08}{}", SPACE_FILE_PREFIX, space, SPACE_FILE_SUFFIX)
}

#[inline]
fn parse_space_file_name(name: &str) -> Option<SpaceId> {
    name.strip_prefix(SPACE_FILE_PREFIX)?
        .strip_suffix(SPACE_FILE_SUFFIX)?
        .parse()
        .ok()
}
