//! One page of a book: an image member with lazily computed rasters
//!
//! A page moves through `Empty -> Decoded -> Resized` as it is warmed and
//! drops back to `Empty` when evicted. All transitions happen under the
//! page's own lock, so decode and resize of one page are sequential while
//! different pages never wait on each other.
//!
//! The raster lock is held across archive reads and decodes. Each transition
//! also publishes a small [`PageState`] snapshot behind a separate lock that
//! is never held across I/O, and the status queries (`state`, `is_empty`,
//! `is_warm_for`, `sized_for`) read only that snapshot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use image::DynamicImage;
use log::debug;

use crate::archive::{Archive, ArchiveError, Member};
use crate::images::{self, ResizeFilter, Viewport};

/// Shared handle to a decoded or resized image.
pub type Raster = Arc<DynamicImage>;

/// Failures local to a single page
///
/// None of these are cached: the page stays `Empty` and the next access
/// tries again.
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("could not decode {name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl PageError {
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, PageError::Decode { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageState {
    #[default]
    Empty,
    Decoded,
    Resized,
}

/// Work counters, mostly useful to check that the cache is doing its job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageStats {
    pub decodes: usize,
    pub resizes: usize,
    pub clears: usize,
}

#[derive(Default)]
struct Rasters {
    decoded: Option<Raster>,
    resized: Option<Raster>,
    sized_for: Viewport,
}

impl Rasters {
    fn status(&self) -> Status {
        let state = match (&self.decoded, &self.resized) {
            (_, Some(_)) => PageState::Resized,
            (Some(_), None) => PageState::Decoded,
            (None, None) => PageState::Empty,
        };
        Status {
            state,
            sized_for: self.sized_for,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Status {
    state: PageState,
    sized_for: Viewport,
}

pub struct Page {
    index: usize,
    member: Member,
    archive: Arc<dyn Archive>,
    filter: ResizeFilter,
    rasters: Mutex<Rasters>,
    status: Mutex<Status>,
    decodes: AtomicUsize,
    resizes: AtomicUsize,
    clears: AtomicUsize,
}

impl Page {
    pub fn new(
        index: usize,
        member: Member,
        archive: Arc<dyn Archive>,
        filter: ResizeFilter,
    ) -> Self {
        Self {
            index,
            member,
            archive,
            filter,
            rasters: Mutex::new(Rasters::default()),
            status: Mutex::new(Status::default()),
            decodes: AtomicUsize::new(0),
            resizes: AtomicUsize::new(0),
            clears: AtomicUsize::new(0),
        }
    }

    /// Position of the page within its book.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.member.name
    }

    pub fn member(&self) -> &Member {
        &self.member
    }

    /// Decode the member unless a decoded raster is already held.
    pub fn ensure_image(&self) -> Result<Raster, PageError> {
        let mut rasters = self.lock();
        self.decode_locked(&mut rasters)
    }

    /// Make sure a raster sized for `viewport` is held and return it.
    ///
    /// Decodes first when needed. A cached raster computed for the same
    /// viewport is returned untouched; any other viewport forces a resize.
    pub fn ensure_resized(&self, viewport: Viewport) -> Result<Raster, PageError> {
        let mut rasters = self.lock();
        let decoded = self.decode_locked(&mut rasters)?;

        if let Some(resized) = &rasters.resized {
            if rasters.sized_for == viewport {
                return Ok(Arc::clone(resized));
            }
        }

        let started = Instant::now();
        let resized = match images::shrink_to_fit(&decoded, viewport, self.filter) {
            Some(image) => Arc::new(image),
            None => decoded,
        };
        self.resizes.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Sized page {} ({}) for {viewport} in {:?}",
            self.index,
            self.member.name,
            started.elapsed()
        );

        rasters.resized = Some(Arc::clone(&resized));
        rasters.sized_for = viewport;
        self.publish(&rasters);
        Ok(resized)
    }

    /// Drop both rasters. The next access decodes from scratch.
    pub fn clear(&self) {
        self.clear_if(|| true);
    }

    /// Clear the page if `evict` says so. `evict` runs while the page lock
    /// is held, so no decode or resize of this page can interleave with the
    /// decision. Returns whether rasters were dropped.
    pub fn clear_if(&self, evict: impl FnOnce() -> bool) -> bool {
        let mut rasters = self.lock();
        if rasters.decoded.is_none() && rasters.resized.is_none() {
            return false;
        }
        if !evict() {
            return false;
        }
        *rasters = Rasters::default();
        self.publish(&rasters);
        self.clears.fetch_add(1, Ordering::Relaxed);
        debug!("Evicted page {} ({})", self.index, self.member.name);
        true
    }

    pub fn decoded(&self) -> Option<Raster> {
        self.lock().decoded.clone()
    }

    /// The last resized raster, whatever viewport it was computed for.
    pub fn resized(&self) -> Option<Raster> {
        self.lock().resized.clone()
    }

    /// The resized raster, only if it was computed for `viewport`.
    pub fn resized_for(&self, viewport: Viewport) -> Option<Raster> {
        let rasters = self.lock();
        match &rasters.resized {
            Some(resized) if rasters.sized_for == viewport => Some(Arc::clone(resized)),
            _ => None,
        }
    }

    pub fn sized_for(&self) -> Option<Viewport> {
        let status = self.status();
        (status.state == PageState::Resized).then_some(status.sized_for)
    }

    /// Never waits on a decode or resize in progress.
    pub fn state(&self) -> PageState {
        self.status().state
    }

    pub fn is_warm_for(&self, viewport: Viewport) -> bool {
        let status = self.status();
        status.state == PageState::Resized && status.sized_for == viewport
    }

    pub fn is_empty(&self) -> bool {
        self.state() == PageState::Empty
    }

    pub fn stats(&self) -> PageStats {
        PageStats {
            decodes: self.decodes.load(Ordering::Relaxed),
            resizes: self.resizes.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
        }
    }

    fn decode_locked(&self, rasters: &mut Rasters) -> Result<Raster, PageError> {
        if let Some(decoded) = &rasters.decoded {
            return Ok(Arc::clone(decoded));
        }

        let started = Instant::now();
        let bytes = self.archive.read_member(&self.member)?;
        let image = images::decode(&bytes).map_err(|source| PageError::Decode {
            name: self.member.name.clone(),
            source,
        })?;
        self.decodes.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Decoded page {} ({}, {}x{}) in {:?}",
            self.index,
            self.member.name,
            image.width(),
            image.height(),
            started.elapsed()
        );

        let decoded = Arc::new(image);
        rasters.decoded = Some(Arc::clone(&decoded));
        self.publish(rasters);
        Ok(decoded)
    }

    fn lock(&self) -> MutexGuard<'_, Rasters> {
        self.rasters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Called with the raster lock held, so snapshots are published in order.
    fn publish(&self, rasters: &Rasters) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = rasters.status();
    }

    fn status(&self) -> Status {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("index", &self.index)
            .field("name", &self.member.name)
            .field("state", &self.state())
            .finish()
    }
}
