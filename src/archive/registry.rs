use std::path::Path;
use std::sync::Arc;

use log::debug;

use super::tar::{TarArchive, TarCompression};
use super::zip::ZipArchive;
use super::{Archive, ArchiveError, ArchiveResult};

/// Opens a container at the given path.
pub type ArchiveConstructor = fn(&Path) -> ArchiveResult<Arc<dyn Archive>>;

/// Maps file name suffixes to archive constructors
///
/// Built once and handed to whoever opens books. Matching is done on the end
/// of the file name, case-insensitively, and the longest matching suffix
/// wins so `.tar.gz` is not mistaken for something registered as `.gz`.
/// There is no content sniffing: an unknown suffix is an error.
#[derive(Clone)]
pub struct FormatRegistry {
    formats: Vec<(String, ArchiveConstructor)>,
}

impl FormatRegistry {
    /// An empty registry. See [`FormatRegistry::default`] for the built-in formats.
    pub fn new() -> Self {
        Self {
            formats: Vec::new(),
        }
    }

    /// Register `constructor` for file names ending in `suffix`. A later
    /// registration of the same suffix replaces the earlier one.
    pub fn register(&mut self, suffix: &str, constructor: ArchiveConstructor) -> &mut Self {
        let suffix = normalize_suffix(suffix);
        self.formats.retain(|(existing, _)| *existing != suffix);
        self.formats.push((suffix, constructor));
        self
    }

    pub fn resolve(&self, path: &Path) -> ArchiveResult<ArchiveConstructor> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        self.formats
            .iter()
            .filter(|(suffix, _)| file_name.ends_with(suffix.as_str()))
            .max_by_key(|(suffix, _)| suffix.len())
            .map(|(_, constructor)| *constructor)
            .ok_or_else(|| ArchiveError::UnsupportedFormat {
                path: path.to_path_buf(),
            })
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.resolve(path).is_ok()
    }

    pub fn open(&self, path: &Path) -> ArchiveResult<Arc<dyn Archive>> {
        let constructor = self.resolve(path)?;
        debug!("Opening archive {path:?}");
        constructor(path)
    }

    pub fn supported_suffixes(&self) -> impl Iterator<Item = &str> {
        self.formats.iter().map(|(suffix, _)| suffix.as_str())
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry
            .register(".cbz", open_zip)
            .register(".zip", open_zip)
            .register(".cbt", open_tar)
            .register(".tar", open_tar)
            .register(".tgz", open_tar_gz)
            .register(".tar.gz", open_tar_gz)
            .register(".cbt.gz", open_tar_gz);
        #[cfg(feature = "cbr")]
        registry
            .register(".cbr", open_rar)
            .register(".rar", open_rar);
        registry
    }
}

fn normalize_suffix(suffix: &str) -> String {
    let suffix = suffix.to_lowercase();
    if suffix.starts_with('.') {
        suffix
    } else {
        format!(".{suffix}")
    }
}

fn open_zip(path: &Path) -> ArchiveResult<Arc<dyn Archive>> {
    Ok(Arc::new(ZipArchive::open(path)?))
}

#[cfg(feature = "cbr")]
fn open_rar(path: &Path) -> ArchiveResult<Arc<dyn Archive>> {
    Ok(Arc::new(super::rar::RarArchive::open(path)?))
}

fn open_tar(path: &Path) -> ArchiveResult<Arc<dyn Archive>> {
    Ok(Arc::new(TarArchive::open(path, TarCompression::None)?))
}

fn open_tar_gz(path: &Path) -> ArchiveResult<Arc<dyn Archive>> {
    Ok(Arc::new(TarArchive::open(path, TarCompression::Gzip)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Access, Member};
    use std::path::PathBuf;

    struct Labelled(&'static str);

    impl Archive for Labelled {
        fn members(&self) -> &[Member] {
            &[]
        }

        fn read_member(&self, member: &Member) -> ArchiveResult<Vec<u8>> {
            Err(ArchiveError::InternalInconsistency {
                name: member.name.clone(),
            })
        }

        fn comment(&self) -> &str {
            self.0
        }

        fn access(&self) -> Access {
            Access::RandomAccess
        }

        fn close(&self) -> ArchiveResult<()> {
            Ok(())
        }
    }

    fn short(_: &Path) -> ArchiveResult<Arc<dyn Archive>> {
        Ok(Arc::new(Labelled("gz")))
    }

    fn long(_: &Path) -> ArchiveResult<Arc<dyn Archive>> {
        Ok(Arc::new(Labelled("tar.gz")))
    }

    #[test]
    fn longest_suffix_wins() {
        let mut registry = FormatRegistry::new();
        registry.register("gz", short).register(".tar.gz", long);

        let archive = registry.open(Path::new("book.tar.gz")).unwrap();
        assert_eq!(archive.comment(), "tar.gz");

        let archive = registry.open(Path::new("book.gz")).unwrap();
        assert_eq!(archive.comment(), "gz");
    }

    #[test]
    fn suffix_match_ignores_case() {
        let registry = FormatRegistry::default();
        assert!(registry.supports(Path::new("/comics/Issue 01.CBZ")));
        assert!(registry.supports(Path::new("issue.Tar.Gz")));
    }

    #[test]
    fn unknown_suffix_is_rejected_without_touching_the_file() {
        let registry = FormatRegistry::default();
        let path = PathBuf::from("/definitely/not/here/issue.cb7");

        match registry.open(&path) {
            Err(ArchiveError::UnsupportedFormat { path: reported }) => assert_eq!(reported, path),
            Err(other) => panic!("expected UnsupportedFormat, got {other}"),
            Ok(_) => panic!("expected UnsupportedFormat, got an archive"),
        }
    }

    #[test]
    fn missing_file_with_known_suffix_is_corrupt() {
        let registry = FormatRegistry::default();
        let result = registry.open(Path::new("/definitely/not/here/issue.cbz"));
        assert!(matches!(result, Err(ArchiveError::CorruptArchive { .. })));
    }

    #[test]
    fn reregistering_replaces_constructor() {
        let mut registry = FormatRegistry::new();
        registry.register(".cbz", short).register(".CBZ", long);

        assert_eq!(registry.supported_suffixes().count(), 1);
        let archive = registry.open(Path::new("a.cbz")).unwrap();
        assert_eq!(archive.comment(), "tar.gz");
    }

    #[cfg(feature = "cbr")]
    #[test]
    fn rar_suffixes_resolve_when_enabled() {
        let registry = FormatRegistry::default();
        assert!(registry.supports(Path::new("issue.cbr")));
        assert!(registry.supports(Path::new("issue.RAR")));
    }

    #[cfg(not(feature = "cbr"))]
    #[test]
    fn rar_suffixes_need_the_cbr_feature() {
        let registry = FormatRegistry::default();
        assert!(!registry.supports(Path::new("issue.cbr")));
    }
}
