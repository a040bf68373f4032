//! RGBA images delivered to filters and extraction listeners.

use crate::error::{CoreError, Result};
use ::image::imageops::{self, FilterType};
use ::image::{Rgba, RgbaImage};

/// A decoded video frame as top-left-origin RGBA pixels.
#[derive(Clone, PartialEq)]
pub struct Image {
    pixels: RgbaImage,
}

impl Image {
    /// Wrap tightly packed RGBA bytes.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = rgba_len(width, height);
        if data.len() != expected {
            return Err(CoreError::invalid_image(format!(
                "{}x{} RGBA needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        RgbaImage::from_raw(width, height, data)
            .map(|pixels| Self { pixels })
            .ok_or_else(|| CoreError::invalid_image("pixel buffer rejected"))
    }

    /// Convert NV12 (BT.601, limited range) back to RGBA.
    pub fn from_nv12(width: u32, height: u32, data: &[u8]) -> Result<Self> {
        let expected = nv12_len(width, height);
        if data.len() != expected {
            return Err(CoreError::invalid_image(format!(
                "{}x{} NV12 needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        let (w, h) = (width as usize, height as usize);
        let chroma_w = w.div_ceil(2);
        let (luma, chroma) = data.split_at(w * h);

        let mut rgba = Vec::with_capacity(rgba_len(width, height));
        for y in 0..h {
            for x in 0..w {
                let at = ((y / 2) * chroma_w + x / 2) * 2;
                let c = 298 * (luma[y * w + x] as i32 - 16);
                let d = chroma[at] as i32 - 128;
                let e = chroma[at + 1] as i32 - 128;
                rgba.extend_from_slice(&[
                    ((c + 409 * e + 128) >> 8).clamp(0, 255) as u8,
                    ((c - 100 * d - 208 * e + 128) >> 8).clamp(0, 255) as u8,
                    ((c + 516 * d + 128) >> 8).clamp(0, 255) as u8,
                    255,
                ]);
            }
        }
        Self::from_rgba(width, height, rgba)
    }

    /// Wrap RGBA bytes whose first row is the bottom of the picture, as read
    /// back from a GL framebuffer.
    pub fn from_rgba_bottom_up(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let mut image = Self::from_rgba(width, height, data)?;
        image.flip_vertical();
        Ok(image)
    }

    /// An image filled with one color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self {
            pixels: RgbaImage::from_pixel(width, height, Rgba(rgba)),
        }
    }

    /// Get width in pixels.
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Get height in pixels.
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Get `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// RGBA value at `(x, y)`; panics when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels.get_pixel(x, y).0
    }

    /// Packed RGBA bytes, top row first.
    pub fn as_raw(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    /// Take the packed RGBA bytes.
    pub fn into_raw(self) -> Vec<u8> {
        self.pixels.into_raw()
    }

    /// Borrow as an `image` crate buffer.
    pub fn as_rgba_image(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Mirror top to bottom in place.
    pub fn flip_vertical(&mut self) {
        imageops::flip_vertical_in_place(&mut self.pixels);
    }

    /// Scale to the given size.
    pub fn resized(&self, width: u32, height: u32) -> Image {
        if self.dimensions() == (width, height) {
            return self.clone();
        }
        Image {
            pixels: imageops::resize(&self.pixels, width, height, FilterType::Triangle),
        }
    }

    /// Alpha-composite `top` over this image.
    ///
    /// `top` is scaled to this image's size first.
    pub fn overlaid_with(&self, top: &Image) -> Image {
        let top = top.resized(self.width(), self.height());
        let mut base = self.pixels.clone();
        imageops::overlay(&mut base, &top.pixels, 0, 0);
        Image { pixels: base }
    }

    /// Convert to NV12 (BT.601, limited range).
    ///
    /// Odd dimensions round the chroma plane up.
    pub fn to_nv12(&self) -> Vec<u8> {
        let (width, height) = (self.width() as usize, self.height() as usize);
        let (chroma_w, chroma_h) = (width.div_ceil(2), height.div_ceil(2));
        let mut out = vec![0u8; width * height + 2 * chroma_w * chroma_h];
        let (luma, chroma) = out.split_at_mut(width * height);

        for (i, px) in self.pixels.pixels().enumerate() {
            let [r, g, b, _] = px.0;
            let (r, g, b) = (r as i32, g as i32, b as i32);
            luma[i] = (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255) as u8;
        }

        for cy in 0..chroma_h {
            for cx in 0..chroma_w {
                let (mut r, mut g, mut b, mut n) = (0i32, 0i32, 0i32, 0i32);
                for y in (cy * 2)..((cy * 2 + 2).min(height)) {
                    for x in (cx * 2)..((cx * 2 + 2).min(width)) {
                        let [pr, pg, pb, _] = self.pixels.get_pixel(x as u32, y as u32).0;
                        r += pr as i32;
                        g += pg as i32;
                        b += pb as i32;
                        n += 1;
                    }
                }
                let (r, g, b) = (r / n, g / n, b / n);
                let u = (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(0, 255);
                let v = (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(0, 255);
                let at = (cy * chroma_w + cx) * 2;
                chroma[at] = u as u8;
                chroma[at + 1] = v as u8;
            }
        }
        out
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

fn rgba_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// Size of a `width`x`height` NV12 picture.
pub fn nv12_len(width: u32, height: u32) -> usize {
    let (width, height) = (width as usize, height as usize);
    width * height + 2 * width.div_ceil(2) * height.div_ceil(2)
}
