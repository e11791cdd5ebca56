//! Format-agnostic view over page containers
//!
//! Every supported container is exposed through the [`Archive`] trait as an
//! ordered list of [`Member`]s that can be opened by descriptor. The
//! implementations differ sharply in cost, and that difference is part of
//! the contract rather than an implementation detail:
//!
//! - [`ZipArchive`] has a central directory. Listing is cheap and opening any
//!   member is O(1) in the member's position. Distinct members can be opened
//!   concurrently.
//! - [`TarArchive`], and `RarArchive` with the `cbr` feature, have no index.
//!   Listing drains one full pass at open time, and every open rescans from
//!   the start of the container (O(k) for the k-th member). Opens are
//!   serialized inside the adapter.
//!
//! Check [`Archive::access`] before assuming cheap random access.

mod error;
#[cfg(feature = "cbr")]
mod rar;
mod registry;
mod shared_file;
mod tar;
mod zip;

use std::io::{Cursor, Read};
use std::path::Path;

pub use error::{ArchiveError, ArchiveResult};
#[cfg(feature = "cbr")]
pub use self::rar::RarArchive;
pub use registry::{ArchiveConstructor, FormatRegistry};
pub use self::tar::{TarArchive, TarCompression};
pub use self::zip::ZipArchive;

/// Name suffixes that qualify a member as a page image.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// Most buffer space reserved up front from a member size declared in an
/// archive header. Bigger members still read, the buffer grows as bytes arrive.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Initial buffer capacity for a member whose header claims `declared` bytes.
pub(crate) fn capacity_hint(declared: u64) -> usize {
    declared.min(MAX_PREALLOC) as usize
}

/// How members of an archive can be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Indexed container; opening a member is independent of its position.
    RandomAccess,
    /// Stream-order container; opening a member rescans from the beginning.
    Sequential,
}

impl Access {
    pub fn as_str(&self) -> &'static str {
        match self {
            Access::RandomAccess => "random access",
            Access::Sequential => "sequential",
        }
    }
}

/// One entry of an archive, in archive order
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Member {
    /// Position of the entry in the archive's own ordering
    pub position: usize,
    pub name: String,
    pub comment: String,
}

impl Member {
    pub fn new(position: usize, name: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            position,
            name: name.into(),
            comment: comment.into(),
        }
    }

    /// True when the member name carries one of [`IMAGE_EXTENSIONS`].
    pub fn is_image(&self) -> bool {
        is_image_name(&self.name)
    }
}

pub fn is_image_name(name: &str) -> bool {
    if name.ends_with('/') {
        return false;
    }
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// An opened container of members
///
/// Implementations must keep [`Archive::members`] stable for the lifetime of
/// the handle.
pub trait Archive: Send + Sync {
    /// Members in archive order.
    fn members(&self) -> &[Member];

    /// Read the whole member into memory.
    ///
    /// Cost depends on [`Archive::access`]: constant for random access
    /// containers, a rescan up to the member for sequential ones.
    fn read_member(&self, member: &Member) -> ArchiveResult<Vec<u8>>;

    /// Free-form archive comment, empty when the format has none.
    fn comment(&self) -> &str;

    fn access(&self) -> Access;

    /// Release the underlying file handle. Calling it again is a no-op.
    fn close(&self) -> ArchiveResult<()>;

    /// Open a member as a byte stream. Dropping the stream releases it.
    fn open_member(&self, member: &Member) -> ArchiveResult<Box<dyn Read + Send>> {
        let bytes = self.read_member(member)?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn find_member(&self, name: &str) -> Option<&Member> {
        self.members().iter().find(|member| member.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_names_are_matched_case_insensitively() {
        assert!(is_image_name("001.jpg"));
        assert!(is_image_name("chapter1/002.JPEG"));
        assert!(is_image_name("cover.Png"));
        assert!(is_image_name("anim.gif"));
    }

    #[test]
    fn declared_sizes_do_not_drive_allocation() {
        assert_eq!(capacity_hint(0), 0);
        assert_eq!(capacity_hint(4096), 4096);
        assert_eq!(capacity_hint(0xFFFF_FFFE), MAX_PREALLOC as usize);
        assert_eq!(capacity_hint(u64::MAX), MAX_PREALLOC as usize);
    }

    #[test]
    fn non_image_names_are_ignored() {
        assert!(!is_image_name("ComicInfo.xml"));
        assert!(!is_image_name("readme"));
        assert!(!is_image_name("images.jpg/"));
        assert!(!is_image_name("page.webp"));
        assert!(!is_image_name("jpg"));
    }
}
