//! Random access adapter for zip containers (`.cbz`, `.zip`)

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::debug;

use super::shared_file::SharedFile;
use super::{Access, Archive, ArchiveError, ArchiveResult, Member, capacity_hint};

type Zip = ::zip::ZipArchive<SharedFile>;

pub struct ZipArchive {
    path: PathBuf,
    members: Vec<Member>,
    comment: String,
    // Template handle; every read works on its own clone.
    handle: Mutex<Option<Zip>>,
}

impl ZipArchive {
    pub fn open(path: &Path) -> ArchiveResult<Self> {
        let file = File::open(path).map_err(|e| ArchiveError::corrupt(path, e))?;
        let reader = SharedFile::new(file).map_err(|e| ArchiveError::corrupt(path, e))?;
        let mut zip = Zip::new(reader).map_err(|e| ArchiveError::corrupt(path, e))?;

        let comment = String::from_utf8_lossy(zip.comment()).into_owned();
        let mut members = Vec::with_capacity(zip.len());
        for index in 0..zip.len() {
            let entry = zip
                .by_index_raw(index)
                .map_err(|e| ArchiveError::corrupt(path, e))?;
            if entry.is_dir() {
                continue;
            }
            members.push(Member::new(index, entry.name(), entry.comment()));
        }

        debug!("Opened zip {path:?} with {} entries", members.len());

        Ok(Self {
            path: path.to_path_buf(),
            members,
            comment,
            handle: Mutex::new(Some(zip)),
        })
    }

    fn checkout(&self) -> ArchiveResult<Zip> {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .cloned()
            .ok_or(ArchiveError::Closed)
    }
}

impl Archive for ZipArchive {
    fn members(&self) -> &[Member] {
        &self.members
    }

    fn read_member(&self, member: &Member) -> ArchiveResult<Vec<u8>> {
        let mut zip = self.checkout()?;
        let mut entry = zip
            .by_index(member.position)
            .map_err(|e| ArchiveError::read_member(&member.name, e))?;

        let mut buf = Vec::with_capacity(capacity_hint(entry.size()));
        entry
            .read_to_end(&mut buf)
            .map_err(|e| ArchiveError::read_member(&member.name, e))?;
        Ok(buf)
    }

    fn comment(&self) -> &str {
        &self.comment
    }

    fn access(&self) -> Access {
        Access::RandomAccess
    }

    fn close(&self) -> ArchiveResult<()> {
        if self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            debug!("Closed zip {:?}", self.path);
        }
        Ok(())
    }
}
