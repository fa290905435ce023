//! The 2D drawing surface is owned by the host. The bridge only forwards to
//! it, and every call is a no-op while no surface is installed.

use parking_lot::RwLock;

use crate::framework::prelude::*;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Bytes of RGBA pixel data covering the rect.
    pub fn rgba_len(&self) -> usize {
        self.w as usize * self.h as usize * 4
    }
}

pub trait DrawingSurface: Send + Sync {
    fn clear(&self);

    fn stroke_line(&self, x0: i32, y0: i32, x1: i32, y1: i32);

    fn stroke_rect(&self, rect: Rect);

    fn fill_rect(&self, rect: Rect);

    /// Width in pixels of `text` in the current font.
    fn measure_text(&self, text: &str) -> u32;

    /// RGBA pixels of `rect`, row major.
    fn get_pixels(&self, rect: Rect) -> Vec<u8>;

    fn put_pixels(&self, rect: Rect, rgba: &[u8]);
}

#[derive(Default)]
pub struct SurfaceSlot {
    surface: RwLock<Option<Box<dyn DrawingSurface>>>,
}

impl SurfaceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, surface: Box<dyn DrawingSurface>) {
        debug!("Drawing surface installed");
        *self.surface.write() = Some(surface);
    }

    pub fn remove(&self) -> Option<Box<dyn DrawingSurface>> {
        self.surface.write().take()
    }

    pub fn is_available(&self) -> bool {
        self.surface.read().is_some()
    }

    fn with<T>(&self, f: impl FnOnce(&dyn DrawingSurface) -> T) -> Option<T> {
        let surface = self.surface.read();
        match surface.as_deref() {
            Some(surface) => Some(f(surface)),
            None => {
                debug_once!("no drawing surface installed; drawing is a no-op");
                None
            }
        }
    }

    pub fn clear(&self) {
        self.with(|s| s.clear());
    }

    pub fn stroke_line(&self, x0: i32, y0: i32, x1: i32, y1: i32) {
        self.with(|s| s.stroke_line(x0, y0, x1, y1));
    }

    pub fn stroke_rect(&self, rect: Rect) {
        self.with(|s| s.stroke_rect(rect));
    }

    pub fn fill_rect(&self, rect: Rect) {
        self.with(|s| s.fill_rect(rect));
    }

    pub fn measure_text(&self, text: &str) -> u32 {
        self.with(|s| s.measure_text(text)).unwrap_or(0)
    }

    /// Transparent black when no surface is installed.
    pub fn get_pixels(&self, rect: Rect) -> Vec<u8> {
        self.with(|s| s.get_pixels(rect))
            .unwrap_or_else(|| vec![0; rect.rgba_len()])
    }

    /// Ignored unless `rgba` covers the whole rect.
    pub fn put_pixels(&self, rect: Rect, rgba: &[u8]) {
        if rgba.len() < rect.rgba_len() {
            warn!(
                "put_pixels given {} bytes for a {}x{} rect",
                rgba.len(),
                rect.w,
                rect.h
            );
            return;
        }
        self.with(|s| s.put_pixels(rect, rgba));
    }
}
