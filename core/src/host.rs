//! Host-side sinks and resources
//!
//! Commands are finally applied against a [`Host`], which hands out the
//! renderer, the optional audio device and the input device. Indexed
//! resources that scripts can read back (palettes, tile maps) live in a
//! [`Resource`], which keeps the host-owned copy next to the producer's
//! shadow copy.

use std::fmt;
use std::sync::{Arc, Mutex};

use glam::IVec2;

use crate::lock;

/// Number of independent sound effect channels
pub const SFX_CHANNEL_COUNT: usize = 4;

/// Opaque handle to a host texture
pub type TextureHandle = u32;
/// Opaque handle to a host font
pub type FontHandle = u32;
/// Opaque handle to a host sprite
pub type SpriteHandle = u32;
/// Opaque handle to a host sound effect
pub type SfxHandle = u32;
/// Opaque handle to a host music track
pub type MusicHandle = u32;

/// RGBA color, 8 bits per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const GREEN: Color = Color::rgb(0, 255, 0);
    pub const BLUE: Color = Color::rgb(0, 0, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }
}

/// Axis-aligned integer rectangle (position and size)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Whether two rectangles overlap by at least one pixel
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x.saturating_add(other.w)
            && other.x < self.x.saturating_add(self.w)
            && self.y < other.y.saturating_add(other.h)
            && other.y < self.y.saturating_add(self.h)
    }
}

/// Blend mode applied to subsequent draws
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    None,
    #[default]
    Blend,
    Add,
    Mod,
    Mul,
}

/// Renderer sink
///
/// Draw calls arrive already translated by the camera; `clip` is set before
/// a clipped draw and reset to `None` right after it.
pub trait Renderer {
    fn set_target(&mut self, target: Option<TextureHandle>);
    fn set_blend(&mut self, mode: BlendMode);
    /// Blend mode used when drawing a specific texture
    fn set_texture_blend(&mut self, texture: TextureHandle, mode: BlendMode);
    fn set_font(&mut self, font: Option<FontHandle>);
    fn set_clip(&mut self, clip: Option<Rect>);
    fn clear(&mut self, color: Color);
    fn plot(&mut self, pos: IVec2, color: Color);
    fn line(&mut self, from: IVec2, to: IVec2, color: Color);
    fn circle(&mut self, center: IVec2, radius: i32, fill: bool, color: Color);
    fn ellipse(&mut self, center: IVec2, radii: IVec2, fill: bool, color: Color);
    fn rect(&mut self, a: IVec2, b: IVec2, fill: bool, radius: Option<i32>, color: Color);
    fn triangle(&mut self, points: [IVec2; 3], fill: bool, color: Color);
    fn text(&mut self, text: &str, pos: IVec2, color: Color, margin: i32);
    fn texture(&mut self, draw: &TextureDraw);
    fn sprite(&mut self, draw: &SpriteDraw);
    fn map(&mut self, map: &TileMap, pos: IVec2, color: Option<Color>);
}

/// Parameters of a texture blit
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDraw {
    pub texture: TextureHandle,
    pub dst: Rect,
    pub src: Option<Rect>,
    /// Rotation in degrees around the destination center
    pub rotation: f32,
    pub color: Option<Color>,
}

/// Parameters of a sprite draw
#[derive(Debug, Clone, PartialEq)]
pub struct SpriteDraw {
    pub sprite: SpriteHandle,
    pub pos: IVec2,
    pub size: Option<IVec2>,
    pub rotation: f32,
    /// Animation time step, `None` uses the frame delta
    pub delta: Option<f64>,
    pub color: Option<Color>,
}

/// Audio sink
pub trait Audio {
    fn set_volume(&mut self, sfx: [f32; SFX_CHANNEL_COUNT], music: f32);
    fn play_sfx(&mut self, sfx: SfxHandle, looping: bool, fade_in_ms: Option<u32>, channel: Option<usize>);
    fn play_music(&mut self, music: MusicHandle, looping: bool, fade_in_ms: Option<u32>);
    fn stop_sfx(&mut self, channel: Option<usize>, fade_out_ms: Option<u32>);
    fn stop_music(&mut self, fade_out_ms: Option<u32>);
}

/// Input device sink
pub trait Input {
    fn rumble(&mut self, gamepad: usize, strength: u16, duration_ms: u32);
    fn set_cursor(&mut self, image: Option<TextureHandle>, hotspot: IVec2);
}

/// Bundle of host sinks commands are applied against
pub trait Host: Send {
    fn renderer(&mut self) -> &mut dyn Renderer;

    /// Audio device, if the host was opened with audio
    fn audio(&mut self) -> Option<&mut dyn Audio> {
        None
    }

    fn input(&mut self) -> &mut dyn Input;
}

// ============================================================================
// Shadowed resources
// ============================================================================

/// Palette of indexed colors
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Palette {
    colors: Vec<Color>,
}

impl Palette {
    pub fn new(colors: Vec<Color>) -> Self {
        Self { colors }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Color> {
        self.colors.get(index).copied()
    }

    /// Writes an entry, ignoring out-of-range indices
    pub fn set(&mut self, index: usize, color: Color) -> bool {
        match self.colors.get_mut(index) {
            Some(slot) => {
                *slot = color;
                true
            }
            None => false,
        }
    }
}

/// Grid of tile indices
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TileMap {
    width: i32,
    height: i32,
    cells: Vec<i32>,
}

impl TileMap {
    /// Value returned for reads outside the map
    pub const INVALID: i32 = -1;

    pub fn new(width: i32, height: i32) -> Self {
        let width = width.max(0);
        let height = height.max(0);
        Self {
            width,
            height,
            cells: vec![0; (width as usize).saturating_mul(height as usize)],
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    pub fn get(&self, x: i32, y: i32) -> i32 {
        self.index(x, y).map_or(Self::INVALID, |i| self.cells[i])
    }

    pub fn set(&mut self, x: i32, y: i32, cel: i32) -> bool {
        match self.index(x, y) {
            Some(i) => {
                self.cells[i] = cel;
                true
            }
            None => false,
        }
    }
}

/// Host-owned value plus the producer's optimistic shadow of it.
///
/// The host copy is only written when a queued command is consumed. The
/// shadow is cloned from the host copy on the first producer write and then
/// answers every producer read.
pub struct Resource<T> {
    host: Mutex<T>,
    shadow: Mutex<Option<T>>,
}

/// Shared handle to a shadowed resource
pub type SharedResource<T> = Arc<Resource<T>>;

impl<T: Clone> Resource<T> {
    pub fn new(value: T) -> SharedResource<T> {
        Arc::new(Self {
            host: Mutex::new(value),
            shadow: Mutex::new(None),
        })
    }

    /// Reads through the shadow if one exists, otherwise the host copy
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let shadow = lock(&self.shadow);
        match shadow.as_ref() {
            Some(value) => f(value),
            None => {
                drop(shadow);
                f(&lock(&self.host))
            }
        }
    }

    /// Reads the host copy, ignoring any shadow
    pub fn read_host<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&lock(&self.host))
    }

    /// Writes the shadow, cloning it from the host copy first if needed
    pub fn write_shadow<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut shadow = lock(&self.shadow);
        let value = shadow.get_or_insert_with(|| lock(&self.host).clone());
        f(value)
    }

    /// Writes the host copy
    pub fn write_host<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut lock(&self.host))
    }

    pub fn has_shadow(&self) -> bool {
        lock(&self.shadow).is_some()
    }

    /// Drops the shadow so reads fall back to the host copy
    pub fn discard_shadow(&self) {
        lock(&self.shadow).take();
    }
}

impl<T: fmt::Debug> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("host", &self.host)
            .field("shadow", &self.shadow)
            .finish()
    }
}
