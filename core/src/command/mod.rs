//! Primitive commands and the cross-thread command buffer
//!
//! Every drawing, audio and input primitive a script calls becomes one
//! [`Command`]. Commands are queued on the script thread and applied against
//! the [`Host`] by the frame driver, in queue order, exactly once.

use std::fmt;

use glam::IVec2;
use tracing::trace;

use crate::host::{
    BlendMode, Color, FontHandle, Host, MusicHandle, Palette, Rect, Renderer, SFX_CHANNEL_COUNT,
    SfxHandle, SharedResource, SpriteDraw, TextureDraw, TextureHandle, TileMap,
};

mod buffer;


pub use buffer::CommandBuffer;

/// Ordered batch of commands; insertion order is execution order
pub type CommandQueue = Vec<Command>;

/// Closure queued by a script to run on the host thread
pub struct HostCallback(Box<dyn FnOnce(&mut dyn Host) + Send>);

impl HostCallback {
    pub fn new(f: impl FnOnce(&mut dyn Host) + Send + 'static) -> Self {
        Self(Box::new(f))
    }
}

impl fmt::Debug for HostCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostCallback(..)")
    }
}

/// Value produced by an immediate read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readback {
    Color(Color),
    Cell(i32),
}

/// A single primitive operation, owning everything needed to replay it.
#[derive(Debug)]
pub enum Command {
    /// Switch the render target (`None` = back to the canvas)
    Target(Option<TextureHandle>),
    /// Clear the current target
    Clear(Color),
    /// Change the blend mode, optionally only for one texture
    Blend {
        texture: Option<TextureHandle>,
        mode: BlendMode,
    },
    Plot {
        pos: IVec2,
        color: Color,
        clip: Option<Rect>,
    },
    Line {
        from: IVec2,
        to: IVec2,
        color: Color,
        clip: Option<Rect>,
    },
    Circle {
        center: IVec2,
        radius: i32,
        fill: bool,
        color: Color,
        clip: Option<Rect>,
    },
    Ellipse {
        center: IVec2,
        radii: IVec2,
        fill: bool,
        color: Color,
        clip: Option<Rect>,
    },
    Rect {
        a: IVec2,
        b: IVec2,
        fill: bool,
        /// Corner radius for rounded rectangles
        radius: Option<i32>,
        color: Color,
        clip: Option<Rect>,
    },
    Triangle {
        points: [IVec2; 3],
        fill: bool,
        color: Color,
        clip: Option<Rect>,
    },
    SetFont(Option<FontHandle>),
    Text {
        text: String,
        pos: IVec2,
        color: Color,
        margin: i32,
        clip: Option<Rect>,
    },
    Texture {
        draw: TextureDraw,
        clip: Option<Rect>,
    },
    Sprite {
        draw: SpriteDraw,
        clip: Option<Rect>,
    },
    Map {
        map: SharedResource<TileMap>,
        pos: IVec2,
        color: Option<Color>,
        clip: Option<Rect>,
    },
    /// Immediate read of a palette entry; never queued
    PaletteGet {
        palette: SharedResource<Palette>,
        index: usize,
    },
    /// Palette write, applied to the shadow by `wait` and to the host by `run`
    PaletteSet {
        palette: SharedResource<Palette>,
        index: usize,
        color: Color,
    },
    /// Immediate read of a map cell; never queued
    MapGet {
        map: SharedResource<TileMap>,
        x: i32,
        y: i32,
    },
    /// Map write, applied to the shadow by `wait` and to the host by `run`
    MapSet {
        map: SharedResource<TileMap>,
        x: i32,
        y: i32,
        cel: i32,
    },
    Volume {
        sfx: [f32; SFX_CHANNEL_COUNT],
        music: f32,
    },
    PlaySfx {
        sfx: SfxHandle,
        looping: bool,
        fade_in_ms: Option<u32>,
        channel: Option<usize>,
    },
    PlayMusic {
        music: MusicHandle,
        looping: bool,
        fade_in_ms: Option<u32>,
    },
    StopSfx {
        channel: Option<usize>,
        fade_out_ms: Option<u32>,
    },
    StopMusic {
        fade_out_ms: Option<u32>,
    },
    Rumble {
        gamepad: usize,
        strength: u16,
        duration_ms: u32,
    },
    Cursor {
        image: Option<TextureHandle>,
        hotspot: IVec2,
    },
    Callback(HostCallback),
}

impl Command {
    /// Short name of the command kind, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Target(_) => "target",
            Self::Clear(_) => "clear",
            Self::Blend { .. } => "blend",
            Self::Plot { .. } => "plot",
            Self::Line { .. } => "line",
            Self::Circle { .. } => "circle",
            Self::Ellipse { .. } => "ellipse",
            Self::Rect { .. } => "rect",
            Self::Triangle { .. } => "triangle",
            Self::SetFont(_) => "font",
            Self::Text { .. } => "text",
            Self::Texture { .. } => "texture",
            Self::Sprite { .. } => "sprite",
            Self::Map { .. } => "map",
            Self::PaletteGet { .. } => "pget",
            Self::PaletteSet { .. } => "pset",
            Self::MapGet { .. } => "mget",
            Self::MapSet { .. } => "mset",
            Self::Volume { .. } => "volume",
            Self::PlaySfx { .. } => "play_sfx",
            Self::PlayMusic { .. } => "play_music",
            Self::StopSfx { .. } => "stop_sfx",
            Self::StopMusic { .. } => "stop_music",
            Self::Rumble { .. } => "rumble",
            Self::Cursor { .. } => "cursor",
            Self::Callback(_) => "callback",
        }
    }

    /// Producer-side half of a command.
    ///
    /// Reads answer from the shadow-or-host value, writes go to the shadow
    /// so later reads in the same window observe them. Every other kind
    /// has nothing to do here and returns `None`.
    pub fn wait(&self) -> Option<Readback> {
        match self {
            Self::PaletteGet { palette, index } => {
                let color = palette.read(|p| p.get(*index)).unwrap_or_default();
                Some(Readback::Color(color))
            }
            Self::PaletteSet {
                palette,
                index,
                color,
            } => {
                palette.write_shadow(|p| p.set(*index, *color));
                None
            }
            Self::MapGet { map, x, y } => Some(Readback::Cell(map.read(|m| m.get(*x, *y)))),
            Self::MapSet { map, x, y, cel } => {
                map.write_shadow(|m| m.set(*x, *y, *cel));
                None
            }
            _ => None,
        }
    }

    /// Applies the command against the host, consuming it.
    ///
    /// Commands targeting a missing sink (no audio device) are skipped.
    pub fn run(self, host: &mut dyn Host, delta: f64) {
        match self {
            Self::Target(target) => host.renderer().set_target(target),
            Self::Clear(color) => host.renderer().clear(color),
            Self::Blend { texture, mode } => match texture {
                Some(texture) => host.renderer().set_texture_blend(texture, mode),
                None => host.renderer().set_blend(mode),
            },
            Self::Plot { pos, color, clip } => {
                clipped(host, clip, |r| r.plot(pos, color));
            }
            Self::Line {
                from,
                to,
                color,
                clip,
            } => {
                clipped(host, clip, |r| r.line(from, to, color));
            }
            Self::Circle {
                center,
                radius,
                fill,
                color,
                clip,
            } => {
                clipped(host, clip, |r| r.circle(center, radius, fill, color));
            }
            Self::Ellipse {
                center,
                radii,
                fill,
                color,
                clip,
            } => {
                clipped(host, clip, |r| r.ellipse(center, radii, fill, color));
            }
            Self::Rect {
                a,
                b,
                fill,
                radius,
                color,
                clip,
            } => {
                clipped(host, clip, |r| r.rect(a, b, fill, radius, color));
            }
            Self::Triangle {
                points,
                fill,
                color,
                clip,
            } => {
                clipped(host, clip, |r| r.triangle(points, fill, color));
            }
            Self::SetFont(font) => host.renderer().set_font(font),
            Self::Text {
                text,
                pos,
                color,
                margin,
                clip,
            } => {
                clipped(host, clip, |r| r.text(&text, pos, color, margin));
            }
            Self::Texture { draw, clip } => {
                clipped(host, clip, |r| r.texture(&draw));
            }
            Self::Sprite { mut draw, clip } => {
                draw.delta.get_or_insert(delta);
                clipped(host, clip, |r| r.sprite(&draw));
            }
            Self::Map {
                map,
                pos,
                color,
                clip,
            } => {
                map.read_host(|m| clipped(host, clip, |r| r.map(m, pos, color)));
            }
            // Reads are answered by `wait` and never reach the host
            Self::PaletteGet { .. } | Self::MapGet { .. } => {}
            Self::PaletteSet {
                palette,
                index,
                color,
            } => {
                if !palette.write_host(|p| p.set(index, color)) {
                    trace!("pset index {} out of range, skipped", index);
                }
            }
            Self::MapSet { map, x, y, cel } => {
                if !map.write_host(|m| m.set(x, y, cel)) {
                    trace!("mset ({}, {}) out of range, skipped", x, y);
                }
            }
            Self::Volume { sfx, music } => {
                if let Some(audio) = host.audio() {
                    audio.set_volume(sfx, music);
                }
            }
            Self::PlaySfx {
                sfx,
                looping,
                fade_in_ms,
                channel,
            } => {
                if let Some(audio) = host.audio() {
                    audio.play_sfx(sfx, looping, fade_in_ms, channel);
                }
            }
            Self::PlayMusic {
                music,
                looping,
                fade_in_ms,
            } => {
                if let Some(audio) = host.audio() {
                    audio.play_music(music, looping, fade_in_ms);
                }
            }
            Self::StopSfx {
                channel,
                fade_out_ms,
            } => {
                if let Some(audio) = host.audio() {
                    audio.stop_sfx(channel, fade_out_ms);
                }
            }
            Self::StopMusic { fade_out_ms } => {
                if let Some(audio) = host.audio() {
                    audio.stop_music(fade_out_ms);
                }
            }
            Self::Rumble {
                gamepad,
                strength,
                duration_ms,
            } => host.input().rumble(gamepad, strength, duration_ms),
            Self::Cursor { image, hotspot } => host.input().set_cursor(image, hotspot),
            Self::Callback(HostCallback(f)) => f(host),
        }
    }
}

/// Runs a draw with the clip rectangle applied, then resets the clip
fn clipped(
    host: &mut dyn Host,
    clip: Option<Rect>,
    draw: impl FnOnce(&mut dyn Renderer),
) {
    let renderer = host.renderer();
    if clip.is_some() {
        renderer.set_clip(clip);
    }
    draw(&mut *renderer);
    if clip.is_some() {
        renderer.set_clip(None);
    }
}

/// Runs every command of a queue in order, returns how many ran
pub fn run_queue(queue: CommandQueue, host: &mut dyn Host, delta: f64) -> usize {
    let count = queue.len();
    for command in queue {
        command.run(host, delta);
    }
    count
}
