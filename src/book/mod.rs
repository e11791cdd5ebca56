//! Book navigation and the sliding-window page cache
//!
//! A [`Book`] keeps every page of an archive, but only pages within
//! `prefetch_radius` of the current index hold rasters. Each navigation or
//! viewport change runs a refill pass:
//!
//! 1. the current page is decoded and sized synchronously, so the next
//!    redraw always has content;
//! 2. pages inside the window that are not yet sized for the viewport are
//!    warmed on the worker pool, nearest first;
//! 3. pages outside the window that still hold rasters are cleared on the
//!    worker pool.
//!
//! Background tasks are fire-and-forget. A superseded task runs to
//! completion; it re-reads the position when it starts and again when it
//! finishes, and backs off if its page has left the window. Eviction
//! decisions are taken under the page lock (page lock first, then the book
//! lock) so a clear can never land on a page a newer refill pass already
//! counted as warm.
//!
//! The refill pass itself only ever waits on the current page. Window
//! bookkeeping reads each page's published state, so a neighbour stuck in a
//! slow archive read does not hold up navigation.

mod tasks;

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, warn};

use crate::archive::{Access, Archive, ArchiveError, FormatRegistry};
use crate::images::{ResizeFilter, Viewport};
use crate::page::{Page, PageError, Raster};
use tasks::TaskTracker;

pub const DEFAULT_PREFETCH_RADIUS: usize = 5;

/// Errors that prevent a book from opening
#[derive(Debug, thiserror::Error)]
pub enum BookError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("no images found in {path:?}")]
    NoImagesFound { path: PathBuf },

    #[error("failed to start page workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Tuning knobs for a [`Book`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookOptions {
    /// Pages within this distance of the current one are kept warm
    pub prefetch_radius: usize,
    /// Size of the background worker pool, 0 picks one per CPU
    pub worker_threads: usize,
    pub resize_filter: ResizeFilter,
    /// Viewport used until the first `set_viewport`
    pub viewport: Viewport,
}

impl Default for BookOptions {
    fn default() -> Self {
        Self {
            prefetch_radius: DEFAULT_PREFETCH_RADIUS,
            worker_threads: 0,
            resize_filter: ResizeFilter::default(),
            viewport: Viewport::UNBOUNDED,
        }
    }
}

impl BookOptions {
    pub fn with_radius(mut self, radius: usize) -> Self {
        self.prefetch_radius = radius;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.worker_threads = workers;
        self
    }

    pub fn with_filter(mut self, filter: ResizeFilter) -> Self {
        self.resize_filter = filter;
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }
}

struct Position {
    index: usize,
    viewport: Viewport,
}

struct Shared {
    path: PathBuf,
    archive: Arc<dyn Archive>,
    pages: Vec<Arc<Page>>,
    radius: usize,
    // Held only to read or write the two fields, never across I/O.
    position: Mutex<Position>,
    tasks: Arc<TaskTracker>,
    pool: rayon::ThreadPool,
}

pub struct Book {
    shared: Arc<Shared>,
}

impl Book {
    /// Open `path` with the built-in formats and default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BookError> {
        Self::open_with(path, &FormatRegistry::default(), BookOptions::default())
    }

    pub fn open_with(
        path: impl AsRef<Path>,
        registry: &FormatRegistry,
        options: BookOptions,
    ) -> Result<Self, BookError> {
        let path = path.as_ref();
        let archive = registry.open(path)?;
        Self::from_archive(path, archive, options)
    }

    /// Build a book over an archive that is already open. `path` is only
    /// used for reporting. The book takes over closing the archive.
    pub fn from_archive(
        path: impl AsRef<Path>,
        archive: Arc<dyn Archive>,
        options: BookOptions,
    ) -> Result<Self, BookError> {
        let path = path.as_ref();
        let pages: Vec<Arc<Page>> = archive
            .members()
            .iter()
            .filter(|member| member.is_image())
            .enumerate()
            .map(|(index, member)| {
                Arc::new(Page::new(
                    index,
                    member.clone(),
                    Arc::clone(&archive),
                    options.resize_filter,
                ))
            })
            .collect();

        if pages.is_empty() {
            if let Err(e) = archive.close() {
                warn!("Failed to close {path:?}: {e}");
            }
            return Err(BookError::NoImagesFound {
                path: path.to_path_buf(),
            });
        }

        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("comicrat-page-{i}"))
            .panic_handler(|payload| {
                error!("Page worker panicked: {}", panic_message(payload.as_ref()));
            });
        if options.worker_threads > 0 {
            builder = builder.num_threads(options.worker_threads);
        }
        let pool = builder.build()?;

        info!(
            "Opened {path:?}: {} pages out of {} members, {} access, prefetch radius {}",
            pages.len(),
            archive.members().len(),
            archive.access().as_str(),
            options.prefetch_radius
        );
        if archive.access() == Access::Sequential {
            debug!("Member reads on {path:?} rescan the container and are serialized");
        }

        Ok(Self {
            shared: Arc::new(Shared {
                path: path.to_path_buf(),
                archive,
                pages,
                radius: options.prefetch_radius,
                position: Mutex::new(Position {
                    index: 0,
                    viewport: options.viewport,
                }),
                tasks: Arc::new(TaskTracker::default()),
                pool,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn len(&self) -> usize {
        self.shared.pages.len()
    }

    /// Always false: a book without pages fails to open.
    pub fn is_empty(&self) -> bool {
        self.shared.pages.is_empty()
    }

    pub fn pages(&self) -> &[Arc<Page>] {
        &self.shared.pages
    }

    pub fn page(&self, index: usize) -> Option<&Arc<Page>> {
        self.shared.pages.get(index)
    }

    pub fn current_index(&self) -> usize {
        self.shared.position().index
    }

    pub fn current(&self) -> &Arc<Page> {
        &self.shared.pages[self.current_index()]
    }

    /// The current page's raster, if it is sized for the current viewport.
    pub fn current_raster(&self) -> Option<Raster> {
        let (index, viewport) = self.shared.snapshot();
        self.shared.pages[index].resized_for(viewport)
    }

    pub fn viewport(&self) -> Viewport {
        self.shared.position().viewport
    }

    pub fn radius(&self) -> usize {
        self.shared.radius
    }

    pub fn comment(&self) -> &str {
        self.shared.archive.comment()
    }

    pub fn access(&self) -> Access {
        self.shared.archive.access()
    }

    pub fn archive(&self) -> &Arc<dyn Archive> {
        &self.shared.archive
    }

    /// Advance one page; a no-op on the last page. Runs a refill pass and
    /// returns the current page's raster or its error.
    pub fn next_page(&self) -> Result<Raster, PageError> {
        self.move_to(|index| index.saturating_add(1))
    }

    /// Go back one page; a no-op on the first page. Runs a refill pass.
    pub fn prev_page(&self) -> Result<Raster, PageError> {
        self.move_to(|index| index.saturating_sub(1))
    }

    /// Jump to `index`, clamped to the last page. Runs a refill pass.
    pub fn go_to(&self, index: usize) -> Result<Raster, PageError> {
        self.move_to(|_| index)
    }

    /// Record a new viewport and refill in the background.
    pub fn set_viewport(&self, width: u32, height: u32) {
        let viewport = Viewport::new(width, height);
        {
            let mut position = self.shared.position();
            position.viewport = viewport;
        }
        debug!("Viewport set to {viewport}");

        let shared = Arc::clone(&self.shared);
        let guard = self.shared.tasks.begin();
        self.shared.pool.spawn_fifo(move || {
            let _guard = guard;
            // Failures are already logged by the refill pass.
            let _ = shared.refill();
        });
    }

    /// Run a refill pass for the current position.
    pub fn refill(&self) -> Result<Raster, PageError> {
        self.shared.refill()
    }

    /// Block until all background warm and clear tasks have finished.
    pub fn wait_for_background(&self) {
        self.shared.tasks.wait_idle();
    }

    pub fn background_tasks(&self) -> usize {
        self.shared.tasks.in_flight()
    }

    /// Indices of pages currently holding any raster.
    pub fn warm_pages(&self) -> Vec<usize> {
        self.shared
            .pages
            .iter()
            .filter(|page| !page.is_empty())
            .map(|page| page.index())
            .collect()
    }

    /// Let background work finish, then release the archive.
    pub fn close(self) -> Result<(), ArchiveError> {
        self.shared.tasks.wait_idle();
        self.shared.archive.close()?;
        info!("Closed {:?}", self.shared.path);
        Ok(())
    }

    fn move_to(&self, target: impl FnOnce(usize) -> usize) -> Result<Raster, PageError> {
        {
            let mut position = self.shared.position();
            let last = self.shared.pages.len() - 1;
            position.index = target(position.index).min(last);
        }
        self.shared.refill()
    }
}

impl Shared {
    fn position(&self) -> MutexGuard<'_, Position> {
        self.position.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> (usize, Viewport) {
        let position = self.position();
        (position.index, position.viewport)
    }

    fn in_window(&self, index: usize, current: usize) -> bool {
        index.abs_diff(current) <= self.radius
    }

    /// Window neighbours of `current`, nearest first, alternating forward and back.
    fn window_order(&self, current: usize) -> Vec<usize> {
        let count = self.pages.len();
        let mut order = Vec::with_capacity(self.radius * 2);
        for offset in 1..=self.radius {
            if current + offset < count {
                order.push(current + offset);
            }
            if current >= offset {
                order.push(current - offset);
            }
        }
        order
    }

    fn refill(self: &Arc<Self>) -> Result<Raster, PageError> {
        let (current, viewport) = self.snapshot();
        let page = &self.pages[current];

        let result = page.ensure_resized(viewport);
        if let Err(e) = &result {
            warn!("Page {current} ({}) unavailable: {e}", page.name());
        }

        let mut warming = 0;
        for index in self.window_order(current) {
            if self.pages[index].is_warm_for(viewport) {
                continue;
            }
            self.spawn_warm(index);
            warming += 1;
        }

        // A page still decoding reads as empty here; its warm task evicts it
        // on completion if it has left the window by then.
        let mut clearing = 0;
        for (index, page) in self.pages.iter().enumerate() {
            if self.in_window(index, current) || page.is_empty() {
                continue;
            }
            self.spawn_clear(index);
            clearing += 1;
        }

        debug!("Refill at page {current} for {viewport}: warming {warming}, clearing {clearing}");
        result
    }

    fn spawn_warm(self: &Arc<Self>, index: usize) {
        let shared = Arc::clone(self);
        let guard = self.tasks.begin();
        self.pool.spawn_fifo(move || {
            let _guard = guard;
            let (current, viewport) = shared.snapshot();
            if !shared.in_window(index, current) {
                debug!("Skipping prefetch of page {index}, no longer near page {current}");
                return;
            }

            let page = &shared.pages[index];
            if let Err(e) = page.ensure_resized(viewport) {
                warn!("Failed to prefetch page {index} ({}): {e}", page.name());
                return;
            }

            // The reader may have moved on while this page was decoding.
            page.clear_if(|| !shared.in_window(index, shared.snapshot().0));
        });
    }

    fn spawn_clear(self: &Arc<Self>, index: usize) {
        let shared = Arc::clone(self);
        let guard = self.tasks.begin();
        self.pool.spawn_fifo(move || {
            let _guard = guard;
            shared.pages[index].clear_if(|| !shared.in_window(index, shared.snapshot().0));
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_helpers::{ArchiveFixture, png_bytes};

    fn open_fixture(pages: usize, radius: usize) -> (tempfile::TempDir, Book) {
        let fixture = ArchiveFixture::new().with_pages(pages, 120, 90);
        let (dir, path) = fixture.write_cbz("window.cbz");
        let book = Book::open_with(
            &path,
            &FormatRegistry::default(),
            BookOptions::default().with_radius(radius).with_workers(2),
        )
        .unwrap();
        (dir, book)
    }

    #[test]
    fn window_order_is_nearest_first() {
        let (_dir, book) = open_fixture(10, 2);
        assert_eq!(book.shared.window_order(0), vec![1, 2]);
        assert_eq!(book.shared.window_order(5), vec![6, 4, 7, 3]);
        assert_eq!(book.shared.window_order(9), vec![8, 7]);
    }

    #[test]
    fn navigation_is_clamped() {
        let (_dir, book) = open_fixture(3, 1);
        book.prev_page().unwrap();
        assert_eq!(book.current_index(), 0);

        book.next_page().unwrap();
        book.next_page().unwrap();
        book.next_page().unwrap();
        assert_eq!(book.current_index(), 2);

        book.go_to(100).unwrap();
        assert_eq!(book.current_index(), 2);
        book.wait_for_background();
    }

    #[test]
    fn zero_radius_keeps_only_current_page() {
        let (_dir, book) = open_fixture(4, 0);
        book.refill().unwrap();
        book.next_page().unwrap();
        book.wait_for_background();
        assert_eq!(book.warm_pages(), vec![1]);
    }

    #[test]
    fn archive_without_images_fails_to_open() {
        let fixture = ArchiveFixture::new()
            .with_entry("ComicInfo.xml", b"<ComicInfo/>".to_vec())
            .with_entry("notes.txt", b"hello".to_vec());
        let (_dir, path) = fixture.write_cbz("empty.cbz");

        match Book::open(&path) {
            Err(BookError::NoImagesFound { path: reported }) => assert_eq!(reported, path),
            Err(other) => panic!("expected NoImagesFound, got {other}"),
            Ok(_) => panic!("expected NoImagesFound, got a book"),
        }
    }

    #[test]
    fn non_image_members_are_skipped() {
        let fixture = ArchiveFixture::new()
            .with_entry("ComicInfo.xml", b"<ComicInfo/>".to_vec())
            .with_entry("001.png", png_bytes(10, 10, 1))
            .with_entry("credits.txt", b"art".to_vec())
            .with_entry("002.PNG", png_bytes(10, 10, 2));
        let (_dir, path) = fixture.write_cbz("mixed.cbz");

        let book = Book::open(&path).unwrap();
        let names: Vec<_> = book.pages().iter().map(|page| page.name()).collect();
        assert_eq!(names, vec!["001.png", "002.PNG"]);
        assert_eq!(book.page(1).unwrap().index(), 1);
        assert_eq!(book.page(1).unwrap().member().position, 3);
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
    }
}
