//! Decoder output surface.
//!
//! A video decoder renders into an [`OutputSurface`]; the engine turns each
//! rendered frame into an [`Image`]. Drawing and read-back live on
//! [`AttachedSurface`], which only exists while the surface's context is
//! current, so they cannot be reached from a detached surface.

use crate::backend::{RenderSurface, SurfaceHandle};
use crate::error::Result;
use reel_core::Image;
use std::time::Duration;
use tracing::warn;

/// Offscreen surface sized to the decoded (display) frame size.
pub struct OutputSurface {
    surface: Box<dyn RenderSurface>,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl OutputSurface {
    /// Wrap a backend surface of the given frame size.
    pub fn new(surface: Box<dyn RenderSurface>, width: u32, height: u32) -> Self {
        Self {
            surface,
            width,
            height,
            pixels: Vec::new(),
        }
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Handle to configure the decoder with.
    pub fn input(&self) -> SurfaceHandle {
        self.surface.input()
    }

    /// Make the surface's context current on this thread.
    ///
    /// The context is released when the returned guard drops.
    pub fn attach(&mut self) -> Result<AttachedSurface<'_>> {
        self.surface.make_current()?;
        Ok(AttachedSurface { owner: self })
    }
}

/// An [`OutputSurface`] whose context is current on this thread.
pub struct AttachedSurface<'a> {
    owner: &'a mut OutputSurface,
}

impl AttachedSurface<'_> {
    /// Wait for the decoder's next frame and draw it.
    pub fn draw_frame(&mut self, timeout: Duration) -> Result<()> {
        self.owner.surface.await_new_image(timeout)?;
        self.owner.surface.draw_image()
    }

    /// Read the drawn frame back as a top-left-origin image.
    pub fn read_image(&mut self) -> Result<Image> {
        let OutputSurface {
            surface,
            width,
            height,
            pixels,
        } = &mut *self.owner;
        pixels.resize(*width as usize * *height as usize * 4, 0);
        surface.read_pixels(pixels)?;
        Ok(Image::from_rgba_bottom_up(*width, *height, pixels.clone())?)
    }
}

impl Drop for AttachedSurface<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.owner.surface.release_current() {
            warn!("Failed to release output surface: {}", e);
        }
    }
}
