//! Script-facing primitives and the per-frame driver
//!
//! [`Primitives`] is shared between the script thread, which builds and
//! queues commands, and the host thread, which calls [`Primitives::update`]
//! once per presentation frame to execute the committed batch.
//!
//! In single-threaded mode (see [`Primitives::immediate`]) commands run
//! against the host as soon as they are built and `commit`/`sync` only
//! report how many ran.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use glam::IVec2;
use tracing::debug;

use crate::command::{Command, CommandBuffer, HostCallback, Readback, run_queue};
use crate::host::{
    BlendMode, Color, FontHandle, Host, MusicHandle, Palette, Rect, SFX_CHANNEL_COUNT, SfxHandle,
    SharedResource, SpriteDraw, TextureDraw, TextureHandle, TileMap,
};
use crate::lock;

mod state;


use state::DrawState;

/// Drawing, audio and input primitives exposed to scripts
pub struct Primitives {
    buffer: CommandBuffer,
    host: Mutex<Box<dyn Host>>,
    threaded: bool,
    state: Mutex<DrawState>,
    /// Canvas size reported by the host on its last update
    canvas: Mutex<Option<IVec2>>,
    /// Frame delta of the host, used by sprite animation in immediate mode
    delta: Mutex<f64>,
    /// Commands run since the last commit (immediate mode)
    committed: AtomicUsize,
    /// Commands executed by the last frame
    commands: AtomicUsize,
}

impl Primitives {
    /// Creates buffered primitives; the host is driven through [`update`](Self::update)
    pub fn threaded(host: Box<dyn Host>) -> Arc<Self> {
        Self::with_buffer(host, CommandBuffer::new(), true)
    }

    /// Creates buffered primitives whose `sync` re-checks its flags at least
    /// this often
    pub fn threaded_with_interval(host: Box<dyn Host>, sync_interval: Duration) -> Arc<Self> {
        Self::with_buffer(host, CommandBuffer::with_sync_interval(sync_interval), true)
    }

    /// Creates single-threaded primitives that run every command immediately
    pub fn immediate(host: Box<dyn Host>) -> Arc<Self> {
        Self::with_buffer(host, CommandBuffer::new(), false)
    }

    fn with_buffer(host: Box<dyn Host>, buffer: CommandBuffer, threaded: bool) -> Arc<Self> {
        Arc::new(Self {
            buffer,
            host: Mutex::new(host),
            threaded,
            state: Mutex::new(DrawState::default()),
            canvas: Mutex::new(None),
            delta: Mutex::new(0.0),
            committed: AtomicUsize::new(0),
            commands: AtomicUsize::new(0),
        })
    }

    pub fn is_threaded(&self) -> bool {
        self.threaded
    }

    /// Number of commands executed by the last frame
    pub fn commands(&self) -> usize {
        self.commands.load(Ordering::Relaxed)
    }

    fn submit(&self, cmd: Command, block: bool) {
        if self.threaded {
            self.buffer.add_blocking(cmd, block);
        } else {
            let delta = *lock(&self.delta);
            let mut host = lock(&self.host);
            cmd.run(host.as_mut(), delta);
            self.committed.fetch_add(1, Ordering::Relaxed);
            self.commands.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn queue(&self, cmd: Command) {
        self.submit(cmd, false);
    }

    fn queue_blocking(&self, cmd: Command) {
        self.submit(cmd, true);
    }

    // ========================================================================
    // Frame driver
    // ========================================================================

    /// Queues the per-frame prologue and returns how many commands it added.
    ///
    /// Re-targets the active render target, clears with the cls color when
    /// auto-clear is on and re-applies a non-default blend mode.
    pub fn new_frame(&self) -> usize {
        let state = lock(&self.state).clone();
        let mut count = 0;

        if state.target.is_some() {
            self.queue_blocking(Command::Target(state.target));
            count += 1;
        }
        if state.auto_cls {
            self.queue(Command::Clear(state.cls_color));
            count += 1;
        }
        if state.blend_changed() {
            self.queue_blocking(Command::Blend {
                texture: None,
                mode: state.blend,
            });
            count += 1;
        }

        count
    }

    /// Publishes this frame's commands. Called by the script loop once per cycle.
    pub fn commit(&self) -> usize {
        let canvas = *lock(&self.canvas);
        lock(&self.state).cull = canvas;

        if self.threaded {
            self.buffer.commit()
        } else {
            self.commands.store(0, Ordering::Relaxed);
            self.committed.swap(0, Ordering::Relaxed)
        }
    }

    /// Publishes pending commands and waits until the host executed them
    pub fn sync(&self) -> usize {
        if self.threaded {
            self.buffer.sync()
        } else {
            self.committed.load(Ordering::Relaxed)
        }
    }

    /// Host side: executes the committed batch against the host.
    ///
    /// Records the canvas size used for culling on the next commit and
    /// returns the number of commands executed.
    pub fn update(&self, canvas: IVec2, delta: f64) -> usize {
        *lock(&self.canvas) = Some(canvas);
        *lock(&self.delta) = delta;

        if !self.threaded {
            return 0;
        }

        let count = self.buffer.drain(|queue| {
            let mut host = lock(&self.host);
            run_queue(queue, host.as_mut(), delta)
        });
        self.commands.store(count, Ordering::Relaxed);
        count
    }

    /// Releases any blocked `sync` for good. Called before tearing down the host loop.
    pub fn forbid(&self) {
        debug!("primitives forbidden");
        self.buffer.forbid();
    }

    /// Back to a blank slate, keeping the host
    pub fn reset(&self) {
        self.buffer.reset();
        *lock(&self.state) = DrawState::default();
        self.committed.store(0, Ordering::Relaxed);
        self.commands.store(0, Ordering::Relaxed);
    }

    /// Runs a closure against the host directly, bypassing the queue
    pub fn with_host<R>(&self, f: impl FnOnce(&mut dyn Host) -> R) -> R {
        let mut host = lock(&self.host);
        f(host.as_mut())
    }

    // ========================================================================
    // Render state
    // ========================================================================

    pub fn target(&self) -> Option<TextureHandle> {
        lock(&self.state).target
    }

    /// Switches the render target; the switch is visible to the next statement
    pub fn set_target(&self, target: Option<TextureHandle>) {
        lock(&self.state).target = target;
        self.queue_blocking(Command::Target(target));
    }

    pub fn auto_cls(&self) -> bool {
        lock(&self.state).auto_cls
    }

    pub fn set_auto_cls(&self, auto_cls: bool) {
        lock(&self.state).auto_cls = auto_cls;
    }

    /// Clears the canvas, optionally changing the cls color; returns the previous color
    pub fn cls(&self, color: Option<Color>) -> Color {
        let (old, current, auto_cls) = {
            let mut state = lock(&self.state);
            let old = state.cls_color;
            if let Some(color) = color {
                state.cls_color = color;
            }
            (old, state.cls_color, state.auto_cls)
        };
        self.submit(Command::Clear(current), !auto_cls);
        old
    }

    pub fn blend(&self, mode: BlendMode) {
        lock(&self.state).blend = mode;
        self.queue_blocking(Command::Blend {
            texture: None,
            mode,
        });
    }

    pub fn blend_texture(&self, texture: TextureHandle, mode: BlendMode) {
        self.queue_blocking(Command::Blend {
            texture: Some(texture),
            mode,
        });
    }

    /// Sets or resets the camera offset; returns the previous one
    pub fn camera(&self, camera: Option<IVec2>) -> Option<IVec2> {
        std::mem::replace(&mut lock(&self.state).camera, camera)
    }

    /// Sets or resets the clip rectangle; returns the previous one
    pub fn clip(&self, clip: Option<Rect>) -> Option<Rect> {
        std::mem::replace(&mut lock(&self.state).clip, clip)
    }

    /// Sets the active draw color; returns the previous one
    pub fn color(&self, color: Color) -> Color {
        std::mem::replace(&mut lock(&self.state).color, color)
    }

    // ========================================================================
    // Shapes
    // ========================================================================

    pub fn plot(&self, x: i32, y: i32, color: Option<Color>) {
        let cmd = {
            let state = lock(&self.state);
            let pos = state.translated(IVec2::new(x, y));
            if state.culled(&Rect::new(pos.x, pos.y, 1, 1)) {
                return;
            }
            Command::Plot {
                pos,
                color: state.color_or_active(color),
                clip: state.clip,
            }
        };
        self.queue(cmd);
    }

    pub fn line(&self, x0: i32, y0: i32, x1: i32, y1: i32, color: Option<Color>) {
        let cmd = {
            let state = lock(&self.state);
            let from = state.translated(IVec2::new(x0, y0));
            let to = state.translated(IVec2::new(x1, y1));
            if state.culled_span(&[from, to]) {
                return;
            }
            Command::Line {
                from,
                to,
                color: state.color_or_active(color),
                clip: state.clip,
            }
        };
        self.queue(cmd);
    }

    pub fn circ(&self, x: i32, y: i32, radius: i32, fill: bool, color: Option<Color>) {
        let cmd = {
            let state = lock(&self.state);
            let center = state.translated(IVec2::new(x, y));
            let r = IVec2::splat(radius.saturating_abs());
            if state.culled_span(&[center.saturating_sub(r), center.saturating_add(r)]) {
                return;
            }
            Command::Circle {
                center,
                radius,
                fill,
                color: state.color_or_active(color),
                clip: state.clip,
            }
        };
        self.queue(cmd);
    }

    pub fn ellipse(&self, x: i32, y: i32, rx: i32, ry: i32, fill: bool, color: Option<Color>) {
        let cmd = {
            let state = lock(&self.state);
            let center = state.translated(IVec2::new(x, y));
            let radii = IVec2::new(rx, ry);
            let extent = IVec2::new(rx.saturating_abs(), ry.saturating_abs());
            if state.culled_span(&[center.saturating_sub(extent), center.saturating_add(extent)]) {
                return;
            }
            Command::Ellipse {
                center,
                radii,
                fill,
                color: state.color_or_active(color),
                clip: state.clip,
            }
        };
        self.queue(cmd);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn rect(
        &self,
        x0: i32,
        y0: i32,
        x1: i32,
        y1: i32,
        fill: bool,
        color: Option<Color>,
        radius: Option<i32>,
    ) {
        let cmd = {
            let state = lock(&self.state);
            let a = state.translated(IVec2::new(x0, y0));
            let b = state.translated(IVec2::new(x1, y1));
            if state.culled_span(&[a, b]) {
                return;
            }
            Command::Rect {
                a,
                b,
                fill,
                radius,
                color: state.color_or_active(color),
                clip: state.clip,
            }
        };
        self.queue(cmd);
    }

    pub fn tri(&self, points: [IVec2; 3], fill: bool, color: Option<Color>) {
        let cmd = {
            let state = lock(&self.state);
            let points = points.map(|p| state.translated(p));
            if state.culled_span(&points) {
                return;
            }
            Command::Triangle {
                points,
                fill,
                color: state.color_or_active(color),
                clip: state.clip,
            }
        };
        self.queue(cmd);
    }

    // ========================================================================
    // Text, textures, sprites and maps
    // ========================================================================

    pub fn font(&self, font: Option<FontHandle>) {
        self.queue_blocking(Command::SetFont(font));
    }

    /// Queues a text draw. Text is never culled: glyph metrics live on the host.
    pub fn text(&self, text: impl Into<String>, x: i32, y: i32, color: Option<Color>, margin: i32) {
        let cmd = {
            let state = lock(&self.state);
            Command::Text {
                text: text.into(),
                pos: state.translated(IVec2::new(x, y)),
                color: state.color_or_active(color),
                margin,
                clip: state.clip,
            }
        };
        self.queue(cmd);
    }

    /// Queues a texture blit; unrotated, sized blits are culled
    pub fn tex(&self, mut draw: TextureDraw) {
        let cmd = {
            let state = lock(&self.state);
            let pos = state.translated(IVec2::new(draw.dst.x, draw.dst.y));
            draw.dst.x = pos.x;
            draw.dst.y = pos.y;
            let cullable = draw.rotation == 0.0 && draw.dst.w != 0 && draw.dst.h != 0;
            if cullable && state.culled(&draw.dst) {
                return;
            }
            Command::Texture {
                draw,
                clip: state.clip,
            }
        };
        self.queue(cmd);
    }

    /// Queues a sprite draw; unrotated sprites of known size are culled
    pub fn spr(&self, mut draw: SpriteDraw) {
        let cmd = {
            let state = lock(&self.state);
            draw.pos = state.translated(draw.pos);
            if let Some(size) = draw.size
                && draw.rotation == 0.0
                && state.culled(&Rect::new(draw.pos.x, draw.pos.y, size.x, size.y))
            {
                return;
            }
            Command::Sprite {
                draw,
                clip: state.clip,
            }
        };
        self.queue(cmd);
    }

    pub fn map(&self, map: &SharedResource<TileMap>, x: i32, y: i32, color: Option<Color>) {
        let cmd = {
            let state = lock(&self.state);
            Command::Map {
                map: Arc::clone(map),
                pos: state.translated(IVec2::new(x, y)),
                color,
                clip: state.clip,
            }
        };
        self.queue(cmd);
    }

    // ========================================================================
    // Palette and map access
    // ========================================================================

    /// Reads a palette entry, observing this producer's unflushed writes
    pub fn pget(&self, palette: &SharedResource<Palette>, index: usize) -> Color {
        let cmd = Command::PaletteGet {
            palette: Arc::clone(palette),
            index,
        };
        match cmd.wait() {
            Some(Readback::Color(color)) => color,
            _ => Color::default(),
        }
    }

    /// Writes a palette entry now (shadow) and on the host later
    pub fn pset(&self, palette: &SharedResource<Palette>, index: usize, color: Color) {
        let cmd = Command::PaletteSet {
            palette: Arc::clone(palette),
            index,
            color,
        };
        cmd.wait();
        self.queue_blocking(cmd);
    }

    /// Reads a map cell, observing this producer's unflushed writes
    pub fn mget(&self, map: &SharedResource<TileMap>, x: i32, y: i32) -> i32 {
        let cmd = Command::MapGet {
            map: Arc::clone(map),
            x,
            y,
        };
        match cmd.wait() {
            Some(Readback::Cell(cel)) => cel,
            _ => TileMap::INVALID,
        }
    }

    /// Writes a map cell now (shadow) and on the host later
    pub fn mset(&self, map: &SharedResource<TileMap>, x: i32, y: i32, cel: i32) {
        let cmd = Command::MapSet {
            map: Arc::clone(map),
            x,
            y,
            cel,
        };
        cmd.wait();
        self.queue_blocking(cmd);
    }

    // ========================================================================
    // Audio and input
    // ========================================================================

    /// Sets channel volumes, each clamped to at most 1.0
    pub fn volume(&self, sfx: [f32; SFX_CHANNEL_COUNT], music: f32) {
        self.queue_blocking(Command::Volume {
            sfx: sfx.map(|v| v.min(1.0)),
            music: music.min(1.0),
        });
    }

    pub fn play_sfx(&self, sfx: SfxHandle, looping: bool, fade_in_ms: Option<u32>, channel: Option<usize>) {
        self.queue_blocking(Command::PlaySfx {
            sfx,
            looping,
            fade_in_ms,
            channel,
        });
    }

    pub fn play_music(&self, music: MusicHandle, looping: bool, fade_in_ms: Option<u32>) {
        self.queue_blocking(Command::PlayMusic {
            music,
            looping,
            fade_in_ms,
        });
    }

    pub fn stop_sfx(&self, channel: Option<usize>, fade_out_ms: Option<u32>) {
        self.queue_blocking(Command::StopSfx {
            channel,
            fade_out_ms,
        });
    }

    pub fn stop_music(&self, fade_out_ms: Option<u32>) {
        self.queue_blocking(Command::StopMusic { fade_out_ms });
    }

    pub fn rumble(&self, gamepad: usize, strength: u16, duration_ms: u32) {
        self.queue_blocking(Command::Rumble {
            gamepad,
            strength,
            duration_ms,
        });
    }

    pub fn cursor(&self, image: Option<TextureHandle>, hotspot: IVec2) {
        self.queue_blocking(Command::Cursor { image, hotspot });
    }

    /// Queues a closure to run on the host thread
    pub fn function(&self, f: impl FnOnce(&mut dyn Host) + Send + 'static, block: bool) {
        self.submit(Command::Callback(HostCallback::new(f)), block);
    }
}
