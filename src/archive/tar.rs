//! Sequential-only adapter for tar containers (`.cbt`, `.tar`, `.tar.gz`)
//!
//! Tar has no index: the only way to reach an entry is to read every entry
//! before it. Listing therefore costs one full pass at open time, and each
//! member read rewinds the file and scans forward again. All scans go through
//! the same file handle behind one mutex, so concurrent readers queue up
//! instead of running redundant passes in parallel.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use flate2::read::GzDecoder;
use log::debug;

use super::{Access, Archive, ArchiveError, ArchiveResult, Member, capacity_hint};

/// Stream wrapping applied to the tar payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TarCompression {
    None,
    Gzip,
}

pub struct TarArchive {
    path: PathBuf,
    compression: TarCompression,
    members: Vec<Member>,
    handle: Mutex<Option<File>>,
    scans: AtomicUsize,
}

impl TarArchive {
    pub fn open(path: &Path, compression: TarCompression) -> ArchiveResult<Self> {
        let mut file = File::open(path).map_err(|e| ArchiveError::corrupt(path, e))?;
        let members =
            list_members(&mut file, compression).map_err(|e| ArchiveError::corrupt(path, e))?;

        debug!(
            "Listed tar {path:?} ({compression:?}) in one pass: {} entries",
            members.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            compression,
            members,
            handle: Mutex::new(Some(file)),
            scans: AtomicUsize::new(1),
        })
    }

    /// Number of linear passes made over the container so far, listing included.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }
}

impl Archive for TarArchive {
    fn members(&self) -> &[Member] {
        &self.members
    }

    fn read_member(&self, member: &Member) -> ArchiveResult<Vec<u8>> {
        let mut guard = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        let file = guard.as_mut().ok_or(ArchiveError::Closed)?;

        self.scans.fetch_add(1, Ordering::Relaxed);
        let found = find_and_read(file, self.compression, member)
            .map_err(|e| ArchiveError::read_member(&member.name, e))?;

        found.ok_or_else(|| ArchiveError::InternalInconsistency {
            name: member.name.clone(),
        })
    }

    fn comment(&self) -> &str {
        ""
    }

    fn access(&self) -> Access {
        Access::Sequential
    }

    fn close(&self) -> ArchiveResult<()> {
        if self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            debug!("Closed tar {:?}", self.path);
        }
        Ok(())
    }
}

fn rewind(
    file: &mut File,
    compression: TarCompression,
) -> io::Result<tar::Archive<Box<dyn Read + '_>>> {
    file.seek(SeekFrom::Start(0))?;
    let reader: Box<dyn Read + '_> = match compression {
        TarCompression::None => Box::new(BufReader::new(file)),
        TarCompression::Gzip => Box::new(GzDecoder::new(BufReader::new(file))),
    };
    Ok(tar::Archive::new(reader))
}

fn list_members(file: &mut File, compression: TarCompression) -> io::Result<Vec<Member>> {
    let mut archive = rewind(file, compression)?;
    let mut members = Vec::new();

    for (position, entry) in archive.entries()?.enumerate() {
        let entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        members.push(Member::new(position, name, ""));
    }

    Ok(members)
}

/// Scan from the start until `member` is reached. `Ok(None)` means the scan
/// ran off the end without seeing it.
fn find_and_read(
    file: &mut File,
    compression: TarCompression,
    member: &Member,
) -> io::Result<Option<Vec<u8>>> {
    let mut archive = rewind(file, compression)?;

    for (position, entry) in archive.entries()?.enumerate() {
        let mut entry = entry?;
        let matches = position == member.position
            && String::from_utf8_lossy(&entry.path_bytes()) == member.name.as_str();
        if !matches {
            continue;
        }
        let mut buf = Vec::with_capacity(capacity_hint(entry.size()));
        entry.read_to_end(&mut buf)?;
        return Ok(Some(buf));
    }

    Ok(None)
}
