//! Decode and shrink-to-fit helpers for page rasters

use std::num::NonZeroU32;

use fast_image_resize as fr;
use image::{DynamicImage, GenericImageView, ImageBuffer, ImageResult};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Target bounding box for resized pages, in pixels
///
/// A zero width or height means the box is unbounded and images keep their
/// decoded size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const UNBOUNDED: Viewport = Viewport {
        width: 0,
        height: 0,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_unbounded(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Size of a `width` x `height` image shrunk to fit inside this viewport.
    ///
    /// Aspect ratio is preserved, images already inside the box are left
    /// alone, and neither side drops below one pixel.
    pub fn fit(&self, width: u32, height: u32) -> (u32, u32) {
        if self.is_unbounded() || width == 0 || height == 0 {
            return (width, height);
        }
        if width <= self.width && height <= self.height {
            return (width, height);
        }

        let (w, h) = (u64::from(width), u64::from(height));
        let (max_w, max_h) = (u64::from(self.width), u64::from(self.height));

        if w * max_h > h * max_w {
            let scaled = (h * max_w / w).max(1);
            (self.width, scaled as u32)
        } else {
            let scaled = (w * max_h / h).max(1);
            (scaled as u32, self.height)
        }
    }
}

impl std::fmt::Display for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Sampling filter used when shrinking pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    #[default]
    Bilinear,
    CatmullRom,
    Lanczos3,
}

impl ResizeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResizeFilter::Nearest => "nearest",
            ResizeFilter::Bilinear => "bilinear",
            ResizeFilter::CatmullRom => "catmull_rom",
            ResizeFilter::Lanczos3 => "lanczos3",
        }
    }

    fn algorithm(self) -> fr::ResizeAlg {
        match self {
            ResizeFilter::Nearest => fr::ResizeAlg::Nearest,
            ResizeFilter::Bilinear => fr::ResizeAlg::Convolution(fr::FilterType::Bilinear),
            ResizeFilter::CatmullRom => fr::ResizeAlg::Convolution(fr::FilterType::CatmullRom),
            ResizeFilter::Lanczos3 => fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3),
        }
    }

    fn fallback(self) -> image::imageops::FilterType {
        match self {
            ResizeFilter::Nearest => image::imageops::FilterType::Nearest,
            ResizeFilter::Bilinear => image::imageops::FilterType::Triangle,
            ResizeFilter::CatmullRom => image::imageops::FilterType::CatmullRom,
            ResizeFilter::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

impl std::str::FromStr for ResizeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(ResizeFilter::Nearest),
            "bilinear" => Ok(ResizeFilter::Bilinear),
            "catmull_rom" | "catmullrom" => Ok(ResizeFilter::CatmullRom),
            "lanczos3" | "lanczos" => Ok(ResizeFilter::Lanczos3),
            other => Err(format!("unknown resize filter `{other}`")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ResizeError {
    #[error("image has a zero dimension")]
    EmptyImage,
    #[error("{0}")]
    Backend(String),
}

/// Decode a member's bytes, guessing the codec from its magic number.
pub fn decode(bytes: &[u8]) -> ImageResult<DynamicImage> {
    image::load_from_memory(bytes)
}

/// Shrink `image` to fit `viewport`.
///
/// Returns `None` when the image already fits and should be shown as is.
pub fn shrink_to_fit(
    image: &DynamicImage,
    viewport: Viewport,
    filter: ResizeFilter,
) -> Option<DynamicImage> {
    let (width, height) = image.dimensions();
    let (new_width, new_height) = viewport.fit(width, height);
    if (new_width, new_height) == (width, height) {
        return None;
    }

    debug!("Resizing {width}x{height} to {new_width}x{new_height} ({})", filter.as_str());

    let resized = match fast_resize(image, new_width, new_height, filter) {
        Ok(resized) => resized,
        Err(e) => {
            warn!("Fast resize failed: {e}, falling back to slow resize");
            image.resize_exact(new_width, new_height, filter.fallback())
        }
    };
    Some(resized)
}

fn fast_resize(
    src_image: &DynamicImage,
    new_width: u32,
    new_height: u32,
    filter: ResizeFilter,
) -> Result<DynamicImage, ResizeError> {
    let src_rgba = src_image.to_rgba8();
    let (src_width, src_height) = src_rgba.dimensions();

    let src_view = fr::Image::from_vec_u8(
        NonZeroU32::new(src_width).ok_or(ResizeError::EmptyImage)?,
        NonZeroU32::new(src_height).ok_or(ResizeError::EmptyImage)?,
        src_rgba.into_raw(),
        fr::PixelType::U8x4,
    )
    .map_err(|e| ResizeError::Backend(e.to_string()))?;

    let dst_width = NonZeroU32::new(new_width).ok_or(ResizeError::EmptyImage)?;
    let dst_height = NonZeroU32::new(new_height).ok_or(ResizeError::EmptyImage)?;
    let mut dst_image = fr::Image::new(dst_width, dst_height, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new(filter.algorithm());
    resizer
        .resize(&src_view.view(), &mut dst_image.view_mut())
        .map_err(|e| ResizeError::Backend(e.to_string()))?;

    let buffer = ImageBuffer::from_raw(new_width, new_height, dst_image.into_vec())
        .ok_or_else(|| ResizeError::Backend("resized buffer has the wrong length".into()))?;

    Ok(DynamicImage::ImageRgba8(buffer))
}
