// Export modules for use in tests
pub mod archive;
pub mod book;
pub mod config;
pub mod images;
pub mod page;
pub mod panic_handler;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the reader-facing API
pub use archive::{Access, Archive, ArchiveError, FormatRegistry, Member};
pub use book::{Book, BookError, BookOptions};
pub use images::{ResizeFilter, Viewport};
pub use page::{Page, PageError, PageState, Raster};
