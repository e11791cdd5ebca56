use std::io;
use std::path::PathBuf;

/// Alias for `Result<T, ArchiveError>`.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Errors raised while opening an archive or reading one of its members
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// No registered format matches the file name suffix.
    #[error("unsupported archive format: {path:?}")]
    UnsupportedFormat { path: PathBuf },

    /// The container could not be opened or its entry list could not be parsed.
    #[error("corrupt archive {path:?}: {source}")]
    CorruptArchive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A sequential rescan did not find a member that the listing pass produced.
    #[error("internal inconsistency: member `{name}` vanished from archive between scans")]
    InternalInconsistency { name: String },

    /// The member exists but reading its bytes failed.
    #[error("cannot read member `{name}`: {source}")]
    ReadMember {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("archive is closed")]
    Closed,
}

impl ArchiveError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, source: impl Into<io::Error>) -> Self {
        Self::CorruptArchive {
            path: path.into(),
            source: source.into(),
        }
    }

    pub(crate) fn read_member(name: &str, source: impl Into<io::Error>) -> Self {
        Self::ReadMember {
            name: name.to_string(),
            source: source.into(),
        }
    }
}
