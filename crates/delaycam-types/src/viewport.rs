use serde::{Deserialize, Serialize};

pub const MIN_ZOOM: f32 = 1.0;
pub const MAX_ZOOM: f32 = 8.0;

/// Pixel rectangle within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Zoom and pan state used when reviewing the delayed frame.
///
/// The view center is kept in normalised frame coordinates (`0.0..=1.0` on both
/// axes) and is always clamped so the visible window stays inside the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    zoom: f32,
    center_x: f32,
    center_y: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            zoom: MIN_ZOOM,
            center_x: 0.5,
            center_y: 0.5,
        }
    }
}

impl Viewport {
    pub fn with_zoom(zoom: f32) -> Self {
        let mut viewport = Self::default();
        viewport.set_zoom(zoom);
        viewport
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn center(&self) -> (f32, f32) {
        (self.center_x, self.center_y)
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = clamp_zoom(zoom);
        self.clamp_center();
    }

    /// Scales the zoom by `scale`, keeping the point under `focus` fixed.
    /// `focus` is given in view coordinates, `(0.5, 0.5)` being the middle.
    pub fn pinch(&mut self, scale: f32, focus: (f32, f32)) {
        if !scale.is_finite() || scale <= 0.0 {
            return;
        }
        let before = self.zoom;
        let after = clamp_zoom(before * scale);
        let span_delta = 1.0 / before - 1.0 / after;
        self.center_x += (focus.0.clamp(0.0, 1.0) - 0.5) * span_delta;
        self.center_y += (focus.1.clamp(0.0, 1.0) - 0.5) * span_delta;
        self.zoom = after;
        self.clamp_center();
    }

    /// Moves the view by a fraction of the visible window.
    pub fn pan(&mut self, dx: f32, dy: f32) {
        if !dx.is_finite() || !dy.is_finite() {
            return;
        }
        self.center_x += dx / self.zoom;
        self.center_y += dy / self.zoom;
        self.clamp_center();
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_identity(&self) -> bool {
        self.zoom <= MIN_ZOOM
    }

    /// Visible region of a `width` x `height` frame.
    pub fn crop_rect(&self, width: u32, height: u32) -> CropRect {
        let (x, crop_w) = axis_window(width, self.zoom, self.center_x);
        let (y, crop_h) = axis_window(height, self.zoom, self.center_y);
        CropRect {
            x,
            y,
            width: crop_w,
            height: crop_h,
        }
    }

    fn clamp_center(&mut self) {
        let half = 0.5 / self.zoom;
        self.center_x = self.center_x.clamp(half, 1.0 - half);
        self.center_y = self.center_y.clamp(half, 1.0 - half);
    }
}

fn clamp_zoom(zoom: f32) -> f32 {
    if zoom.is_finite() {
        zoom.clamp(MIN_ZOOM, MAX_ZOOM)
    } else {
        MIN_ZOOM
    }
}

fn axis_window(extent: u32, zoom: f32, center: f32) -> (u32, u32) {
    if extent == 0 {
        return (0, 0);
    }
    let span = ((extent as f32 / zoom).round() as u32).clamp(1, extent);
    let start = (center * extent as f32 - span as f32 / 2.0).round();
    let max_start = (extent - span) as f32;
    (start.clamp(0.0, max_start) as u32, span)
}
