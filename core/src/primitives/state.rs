//! Producer-side draw state
//!
//! Camera, clip and color are applied when a primitive is built, so culled
//! draws never reach the command buffer.

use glam::IVec2;

use crate::host::{BlendMode, Color, Rect, TextureHandle};

#[derive(Debug, Clone)]
pub(crate) struct DrawState {
    pub target: Option<TextureHandle>,
    pub auto_cls: bool,
    pub cls_color: Color,
    pub blend: BlendMode,
    pub camera: Option<IVec2>,
    pub clip: Option<Rect>,
    pub color: Color,
    /// Canvas extent used for culling, refreshed on every commit
    pub cull: Option<IVec2>,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            target: None,
            auto_cls: true,
            cls_color: Color::BLACK,
            blend: BlendMode::default(),
            camera: None,
            clip: None,
            color: Color::WHITE,
            cull: None,
        }
    }
}

impl DrawState {
    /// Moves a point from world space to canvas space
    pub fn translated(&self, p: IVec2) -> IVec2 {
        match self.camera {
            Some(camera) => p.saturating_sub(camera),
            None => p,
        }
    }

    /// Whether a canvas-space bounding box falls entirely off the canvas.
    ///
    /// Nothing is culled before the host reported a canvas size.
    pub fn culled(&self, bounds: &Rect) -> bool {
        match self.cull {
            Some(size) => !Rect::new(0, 0, size.x, size.y).intersects(bounds),
            None => false,
        }
    }

    /// Whether the inclusive box spanning `points` falls entirely off the
    /// canvas. Compares corners only, so extreme coordinates cannot overflow.
    pub fn culled_span(&self, points: &[IVec2]) -> bool {
        let (Some(size), Some(first)) = (self.cull, points.first()) else {
            return false;
        };
        let (min, max) = points
            .iter()
            .fold((*first, *first), |(min, max), p| (min.min(*p), max.max(*p)));
        max.x < 0 || max.y < 0 || min.x >= size.x || min.y >= size.y
    }

    pub fn color_or_active(&self, color: Option<Color>) -> Color {
        color.unwrap_or(self.color)
    }

    pub fn blend_changed(&self) -> bool {
        self.blend != BlendMode::default()
    }
}
