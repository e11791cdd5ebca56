//! Sequential-only adapter for RAR containers (`.cbr`, `.rar`)
//!
//! The unrar cursor only moves forward and is tied to one open pass, so
//! every member read reopens the archive and walks the headers from the
//! first one. Reads are serialized behind one mutex, which also records
//! whether the archive has been closed.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use log::debug;

use super::{Access, Archive, ArchiveError, ArchiveResult, Member};

pub struct RarArchive {
    path: PathBuf,
    members: Vec<Member>,
    open: Mutex<bool>,
    scans: AtomicUsize,
}

impl RarArchive {
    pub fn open(path: &Path) -> ArchiveResult<Self> {
        let members = list_members(path).map_err(|e| ArchiveError::corrupt(path, e))?;
        debug!("Listed rar {path:?} in one pass: {} entries", members.len());

        Ok(Self {
            path: path.to_path_buf(),
            members,
            open: Mutex::new(true),
            scans: AtomicUsize::new(1),
        })
    }

    /// Number of linear passes made over the container so far, listing included.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }
}

impl Archive for RarArchive {
    fn members(&self) -> &[Member] {
        &self.members
    }

    fn read_member(&self, member: &Member) -> ArchiveResult<Vec<u8>> {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            return Err(ArchiveError::Closed);
        }

        self.scans.fetch_add(1, Ordering::Relaxed);
        let found = find_and_read(&self.path, member)
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
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if std::mem::replace(&mut *open, false) {
            debug!("Closed rar {:?}", self.path);
        }
        Ok(())
    }
}

fn list_members(path: &Path) -> io::Result<Vec<Member>> {
    let listing = unrar::Archive::new(path)
        .open_for_listing()
        .map_err(io::Error::other)?;

    let mut members = Vec::new();
    for (position, header) in listing.enumerate() {
        let header = header.map_err(io::Error::other)?;
        if header.is_directory() {
            continue;
        }
        members.push(Member::new(position, header.filename.to_string_lossy(), ""));
    }
    Ok(members)
}

/// Reopen and walk headers until `member` is reached. `Ok(None)` means the
/// walk ran off the end without seeing it.
fn find_and_read(path: &Path, member: &Member) -> io::Result<Option<Vec<u8>>> {
    let mut cursor = unrar::Archive::new(path)
        .open_for_processing()
        .map_err(io::Error::other)?;

    let mut position = 0;
    while let Some(header) = cursor.read_header().map_err(io::Error::other)? {
        let matches = position == member.position
            && header.entry().filename.to_string_lossy() == member.name.as_str();
        if matches {
            let (bytes, _) = header.read().map_err(io::Error::other)?;
            return Ok(Some(bytes));
        }
        cursor = header.skip().map_err(io::Error::other)?;
        position += 1;
    }

    Ok(None)
}
