//! Memory-backed render surface.

use crate::backend::{FrameProducer, RenderSurface, SurfaceHandle};
use crate::error::{CodecError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Surface that keeps its framebuffer in memory, bottom row first like GL.
#[derive(Clone)]
pub struct SoftwareSurface {
    shared: Arc<SurfaceState>,
}

struct SurfaceState {
    width: u32,
    height: u32,
    pending: Mutex<Option<Vec<u8>>>,
    frame_ready: Condvar,
    latched: Mutex<Option<Vec<u8>>>,
    framebuffer: Mutex<Vec<u8>>,
    current: AtomicBool,
}

impl SoftwareSurface {
    /// Surface for `width`x`height` frames.
    pub fn new(width: u32, height: u32) -> Self {
        let size = frame_len(width, height);
        Self {
            shared: Arc::new(SurfaceState {
                width,
                height,
                pending: Mutex::new(None),
                frame_ready: Condvar::new(),
                latched: Mutex::new(None),
                framebuffer: Mutex::new(vec![0; size]),
                current: AtomicBool::new(false),
            }),
        }
    }

    /// Whether the surface's context is current.
    pub fn is_current(&self) -> bool {
        self.shared.current.load(Ordering::Acquire)
    }

    fn require_current(&self) -> Result<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(CodecError::SurfaceNotAttached)
        }
    }
}

impl FrameProducer for SurfaceState {
    fn queue_frame(&self, rgba: &[u8], _timestamp_us: i64) -> Result<()> {
        if rgba.len() != frame_len(self.width, self.height) {
            return Err(CodecError::surface(format!(
                "frame of {} bytes does not fit a {}x{} surface",
                rgba.len(),
                self.width,
                self.height
            )));
        }
        *self.pending.lock() = Some(rgba.to_vec());
        self.frame_ready.notify_all();
        Ok(())
    }
}

impl RenderSurface for SoftwareSurface {
    fn input(&self) -> SurfaceHandle {
        SurfaceHandle::new(self.shared.clone())
    }

    fn make_current(&mut self) -> Result<()> {
        if self.shared.current.swap(true, Ordering::AcqRel) {
            return Err(CodecError::surface("context already current"));
        }
        Ok(())
    }

    fn release_current(&mut self) -> Result<()> {
        self.shared.current.store(false, Ordering::Release);
        Ok(())
    }

    fn await_new_image(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut pending = self.shared.pending.lock();
        while pending.is_none() {
            if self
                .shared
                .frame_ready
                .wait_until(&mut pending, deadline)
                .timed_out()
            {
                break;
            }
        }
        match pending.take() {
            Some(frame) => {
                *self.shared.latched.lock() = Some(frame);
                Ok(())
            }
            None => Err(CodecError::Timeout("decoded frame".into())),
        }
    }

    fn draw_image(&mut self) -> Result<()> {
        self.require_current()?;
        let frame = self
            .shared
            .latched
            .lock()
            .take()
            .ok_or_else(|| CodecError::surface("no frame latched"))?;

        let stride = self.shared.width as usize * 4;
        let mut framebuffer = self.shared.framebuffer.lock();
        for (dst, src) in framebuffer
            .chunks_exact_mut(stride)
            .zip(frame.chunks_exact(stride).rev())
        {
            dst.copy_from_slice(src);
        }
        Ok(())
    }

    fn read_pixels(&mut self, out: &mut [u8]) -> Result<()> {
        self.require_current()?;
        let framebuffer = self.shared.framebuffer.lock();
        if out.len() != framebuffer.len() {
            return Err(CodecError::surface(format!(
                "read-back buffer of {} bytes, framebuffer is {}",
                out.len(),
                framebuffer.len()
            )));
        }
        out.copy_from_slice(&framebuffer);
        Ok(())
    }
}

fn frame_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_requires_current_context() {
        let mut surface = SoftwareSurface::new(1, 1);
        surface.input().queue_frame(&[1, 2, 3, 4], 0).unwrap();
        surface.await_new_image(Duration::from_millis(10)).unwrap();
        assert!(matches!(
            surface.draw_image(),
            Err(CodecError::SurfaceNotAttached)
        ));

        surface.make_current().unwrap();
        surface.draw_image().unwrap();
        let mut out = [0u8; 4];
        surface.read_pixels(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_rejects_mis_sized_frame() {
        let surface = SoftwareSurface::new(2, 2);
        assert!(surface.input().queue_frame(&[0; 4], 0).is_err());
    }

    #[test]
    fn test_frame_from_other_thread_wakes_waiter() {
        let mut surface = SoftwareSurface::new(1, 1);
        let input = surface.input();
        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            input.queue_frame(&[9, 9, 9, 9], 0).unwrap();
        });
        surface.await_new_image(Duration::from_secs(2)).unwrap();
        producer.join().unwrap();
    }
}
