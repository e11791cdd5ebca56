//! Raster collaborators: codec decoding and viewport-fitting resize

pub mod raster;

pub use raster::{ResizeFilter, Viewport, decode, shrink_to_fit};
