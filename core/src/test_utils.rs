//! Shared test utilities for unit and integration tests

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use glam::IVec2;
use hashbrown::HashMap;

use crate::error::ScriptError;
use crate::host::{
    Audio, BlendMode, Color, FontHandle, Host, Input, MusicHandle, Rect, Renderer, SFX_CHANNEL_COUNT, SfxHandle,
    SpriteDraw, TextureDraw, TextureHandle, TileMap,
};
use crate::lock;
use crate::observer::Observer;
use crate::require::Modules;
use crate::vm::{Binding, FrameInfo, FrameKind, Hook, HookEvent, HookMask, Introspect, ScriptVm, Value};

/// Routes engine logs to the test output; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Test Host
// ============================================================================

/// Call received by [`TestHost`]
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    Target(Option<TextureHandle>),
    Blend(BlendMode),
    TextureBlend(TextureHandle, BlendMode),
    Font(Option<FontHandle>),
    Clip(Option<Rect>),
    Clear(Color),
    Plot(IVec2, Color),
    Line(IVec2, IVec2, Color),
    Circle { center: IVec2, radius: i32, fill: bool, color: Color },
    Ellipse { center: IVec2, radii: IVec2, fill: bool, color: Color },
    Rect { a: IVec2, b: IVec2, fill: bool, color: Color },
    Triangle([IVec2; 3], bool, Color),
    Text(String, IVec2, Color),
    Texture(TextureDraw),
    Sprite(SpriteDraw),
    Map(IVec2),
    Volume([f32; SFX_CHANNEL_COUNT], f32),
    PlaySfx(SfxHandle),
    PlayMusic(MusicHandle),
    StopSfx(Option<usize>),
    StopMusic,
    Rumble(usize),
    Cursor(Option<TextureHandle>),
}

/// Host that records every call; clones share one log
#[derive(Debug, Clone)]
pub struct TestHost {
    calls: Arc<Mutex<Vec<HostCall>>>,
    blend: Arc<Mutex<Option<BlendMode>>>,
    audio: bool,
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHost {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            blend: Arc::new(Mutex::new(None)),
            audio: true,
        }
    }

    /// Host opened without an audio device
    pub fn without_audio() -> Self {
        Self {
            audio: false,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<HostCall> {
        lock(&self.calls).clone()
    }

    pub fn take_calls(&self) -> Vec<HostCall> {
        std::mem::take(&mut *lock(&self.calls))
    }

    /// Blend mode last applied to the renderer
    pub fn current_blend(&self) -> Option<BlendMode> {
        *lock(&self.blend)
    }

    fn record(&self, call: HostCall) {
        lock(&self.calls).push(call);
    }
}

impl Renderer for TestHost {
    fn set_target(&mut self, target: Option<TextureHandle>) {
        self.record(HostCall::Target(target));
    }
    fn set_blend(&mut self, mode: BlendMode) {
        *lock(&self.blend) = Some(mode);
        self.record(HostCall::Blend(mode));
    }
    fn set_texture_blend(&mut self, texture: TextureHandle, mode: BlendMode) {
        self.record(HostCall::TextureBlend(texture, mode));
    }
    fn set_font(&mut self, font: Option<FontHandle>) {
        self.record(HostCall::Font(font));
    }
    fn set_clip(&mut self, clip: Option<Rect>) {
        self.record(HostCall::Clip(clip));
    }
    fn clear(&mut self, color: Color) {
        self.record(HostCall::Clear(color));
    }
    fn plot(&mut self, pos: IVec2, color: Color) {
        self.record(HostCall::Plot(pos, color));
    }
    fn line(&mut self, from: IVec2, to: IVec2, color: Color) {
        self.record(HostCall::Line(from, to, color));
    }
    fn circle(&mut self, center: IVec2, radius: i32, fill: bool, color: Color) {
        self.record(HostCall::Circle {
            center,
            radius,
            fill,
            color,
        });
    }
    fn ellipse(&mut self, center: IVec2, radii: IVec2, fill: bool, color: Color) {
        self.record(HostCall::Ellipse {
            center,
            radii,
            fill,
            color,
        });
    }
    fn rect(&mut self, a: IVec2, b: IVec2, fill: bool, _radius: Option<i32>, color: Color) {
        self.record(HostCall::Rect { a, b, fill, color });
    }
    fn triangle(&mut self, points: [IVec2; 3], fill: bool, color: Color) {
        self.record(HostCall::Triangle(points, fill, color));
    }
    fn text(&mut self, text: &str, pos: IVec2, color: Color, _margin: i32) {
        self.record(HostCall::Text(text.to_string(), pos, color));
    }
    fn texture(&mut self, draw: &TextureDraw) {
        self.record(HostCall::Texture(draw.clone()));
    }
    fn sprite(&mut self, draw: &SpriteDraw) {
        self.record(HostCall::Sprite(draw.clone()));
    }
    fn map(&mut self, _map: &TileMap, pos: IVec2, _color: Option<Color>) {
        self.record(HostCall::Map(pos));
    }
}

impl Audio for TestHost {
    fn set_volume(&mut self, sfx: [f32; SFX_CHANNEL_COUNT], music: f32) {
        self.record(HostCall::Volume(sfx, music));
    }
    fn play_sfx(&mut self, sfx: SfxHandle, _looping: bool, _fade_in_ms: Option<u32>, _channel: Option<usize>) {
        self.record(HostCall::PlaySfx(sfx));
    }
    fn play_music(&mut self, music: MusicHandle, _looping: bool, _fade_in_ms: Option<u32>) {
        self.record(HostCall::PlayMusic(music));
    }
    fn stop_sfx(&mut self, channel: Option<usize>, _fade_out_ms: Option<u32>) {
        self.record(HostCall::StopSfx(channel));
    }
    fn stop_music(&mut self, _fade_out_ms: Option<u32>) {
        self.record(HostCall::StopMusic);
    }
}

impl Input for TestHost {
    fn rumble(&mut self, gamepad: usize, _strength: u16, _duration_ms: u32) {
        self.record(HostCall::Rumble(gamepad));
    }
    fn set_cursor(&mut self, image: Option<TextureHandle>, _hotspot: IVec2) {
        self.record(HostCall::Cursor(image));
    }
}

impl Host for TestHost {
    fn renderer(&mut self) -> &mut dyn Renderer {
        self
    }

    fn audio(&mut self) -> Option<&mut dyn Audio> {
        if self.audio { Some(self) } else { None }
    }

    fn input(&mut self) -> &mut dyn Input {
        self
    }
}

// ============================================================================
// Test Observer
// ============================================================================

/// Notification received by [`TestObserver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    Print(String),
    Warn(String),
    Error(String),
    Focus(String, i32),
    Stop,
}

/// Observer that records every notification; clones share one log
#[derive(Debug, Clone, Default)]
pub struct TestObserver {
    events: Arc<Mutex<Vec<ObserverEvent>>>,
}

impl TestObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObserverEvent> {
        lock(&self.events).clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ObserverEvent::Error(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    pub fn stops(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| **event == ObserverEvent::Stop)
            .count()
    }

    fn push(&self, event: ObserverEvent) {
        lock(&self.events).push(event);
    }
}

impl Observer for TestObserver {
    fn print(&self, msg: &str) {
        self.push(ObserverEvent::Print(msg.to_string()));
    }

    fn warn(&self, msg: &str) {
        self.push(ObserverEvent::Warn(msg.to_string()));
    }

    fn error(&self, msg: &str) {
        self.push(ObserverEvent::Error(msg.to_string()));
    }

    fn focus(&self, source: &str, line: i32) {
        self.push(ObserverEvent::Focus(source.to_string(), line));
    }

    fn stop(&self) {
        self.push(ObserverEvent::Stop);
    }
}

// ============================================================================
// Test VM
// ============================================================================

/// Globals shared between a [`TestVm`] and the test driving it
pub type SharedGlobals = Arc<Mutex<HashMap<String, Value>>>;

/// Host function callable from test scripts with `native NAME`
pub type NativeFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
enum Statement {
    Nop,
    Function(String),
    End,
    Local(String, Value),
    Upvalue(String, Value),
    Temp(Value),
    Global(String, Value),
    Incr(String),
    Call(String),
    Native(String),
    Spin,
    Sleep(u64),
    Error(String),
    Require(String),
    Return(usize),
}

#[derive(Debug, Clone)]
struct FunctionDef {
    source: String,
    line_defined: i32,
    params: Vec<String>,
    body: Vec<(i32, Statement)>,
}

#[derive(Debug, Clone)]
struct Frame {
    source: String,
    line: i32,
    line_defined: i32,
    name: Option<String>,
    kind: FrameKind,
    locals: Vec<Binding>,
    upvalues: Vec<Binding>,
}

impl Frame {
    fn info(&self) -> FrameInfo {
        FrameInfo {
            source: self.source.clone(),
            line: self.line,
            line_defined: self.line_defined,
            name: self.name.clone(),
            kind: self.kind,
        }
    }
}

/// Minimal line-oriented script VM with full hook support.
///
/// One statement per line:
///
/// ```text
/// function NAME [PARAM...]   -- body runs until a line reading `end`
/// local NAME VALUE            -- also: upvalue NAME VALUE, temp VALUE
/// global NAME VALUE
/// incr NAME                   -- add 1 to an integer global
/// call NAME                   -- also: native NAME
/// spin                        -- loop on this line forever
/// sleep MS
/// error MESSAGE
/// require NAME
/// return COUNT                -- main chunk returns COUNT values
/// ```
///
/// Values are `nil`, `true`, `false`, integers, floats, `"strings"`,
/// `{...}` tables or `fn` functions.
pub struct TestVm {
    functions: HashMap<String, FunctionDef>,
    natives: HashMap<String, NativeFn>,
    globals: SharedGlobals,
    stack: Vec<Frame>,
    hook: Option<(Arc<dyn Hook>, HookMask)>,
    modules: Option<Arc<Modules>>,
}

impl Default for TestVm {
    fn default() -> Self {
        Self::new()
    }
}

impl TestVm {
    pub fn new() -> Self {
        Self::with_globals(Arc::new(Mutex::new(HashMap::new())))
    }

    pub fn with_globals(globals: SharedGlobals) -> Self {
        Self {
            functions: HashMap::new(),
            natives: HashMap::new(),
            globals,
            stack: Vec::new(),
            hook: None,
            modules: None,
        }
    }

    pub fn with_native(mut self, name: &str, f: NativeFn) -> Self {
        self.natives.insert(name.to_string(), f);
        self
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        lock(&self.globals).get(name).cloned()
    }

    fn parse(chunk_name: &str, code: &str) -> Result<Vec<(i32, Statement)>, ScriptError> {
        let compile_error = |line: usize, message: String| ScriptError::Compile {
            source_name: chunk_name.to_string(),
            message: format!("{}: {}", line, message),
        };

        let mut statements = Vec::new();
        for (index, raw) in code.lines().enumerate() {
            let line = index + 1;
            let text = raw.trim();
            let (word, rest) = text.split_once(' ').unwrap_or((text, ""));
            let rest = rest.trim();
            let arg = |rest: &str| -> Result<(String, Value), ScriptError> {
                let (name, value) = rest
                    .split_once(' ')
                    .ok_or_else(|| compile_error(line, format!("'{}' expects a name and a value", word)))?;
                Ok((name.to_string(), parse_value(value.trim())))
            };
            let stmt = match word {
                "" => Statement::Nop,
                "end" => Statement::End,
                w if w.starts_with("--") => Statement::Nop,
                "function" => Statement::Function(rest.to_string()),
                "local" => {
                    let (name, value) = arg(rest)?;
                    Statement::Local(name, value)
                }
                "upvalue" => {
                    let (name, value) = arg(rest)?;
                    Statement::Upvalue(name, value)
                }
                "temp" => Statement::Temp(parse_value(rest)),
                "global" => {
                    let (name, value) = arg(rest)?;
                    Statement::Global(name, value)
                }
                "incr" => Statement::Incr(rest.to_string()),
                "call" => Statement::Call(rest.to_string()),
                "native" => Statement::Native(rest.to_string()),
                "spin" => Statement::Spin,
                "sleep" => Statement::Sleep(
                    rest.parse()
                        .map_err(|_| compile_error(line, "malformed number".into()))?,
                ),
                "error" => Statement::Error(rest.to_string()),
                "require" => Statement::Require(rest.to_string()),
                "return" => Statement::Return(
                    rest.parse()
                        .map_err(|_| compile_error(line, "malformed number".into()))?,
                ),
                other => return Err(compile_error(line, format!("unexpected symbol near '{}'", other))),
            };
            statements.push((line as i32, stmt));
        }
        Ok(statements)
    }

    /// Splits a parsed chunk into its top level and the bodies of the
    /// functions it defines
    fn split_functions(
        chunk_name: &str,
        statements: Vec<(i32, Statement)>,
    ) -> (Vec<(i32, Statement)>, Vec<(String, FunctionDef)>) {
        let mut top = Vec::new();
        let mut functions = Vec::new();
        let mut current: Option<(String, FunctionDef)> = None;

        for (line, stmt) in statements {
            if let Some((_, def)) = current.as_mut() {
                match stmt {
                    Statement::End => functions.extend(current.take()),
                    Statement::Nop => {}
                    stmt => def.body.push((line, stmt)),
                }
                continue;
            }
            match stmt {
                Statement::Function(header) => {
                    let mut words = header.split_whitespace();
                    let name = words.next().unwrap_or_default().to_string();
                    let def = FunctionDef {
                        source: chunk_name.to_string(),
                        line_defined: line,
                        params: words.map(str::to_string).collect(),
                        body: Vec::new(),
                    };
                    top.push((line, Statement::Function(name.clone())));
                    current = Some((name, def));
                }
                Statement::Nop | Statement::End => {}
                stmt => top.push((line, stmt)),
            }
        }
        (top, functions)
    }

    fn fire(&mut self, event: HookEvent) -> Result<(), ScriptError> {
        if let Some((hook, mask)) = self.hook.clone()
            && mask.contains(event.mask())
        {
            hook.on_event(event, self)?;
        }
        Ok(())
    }

    fn top(&mut self) -> &mut Frame {
        let index = self.stack.len() - 1;
        &mut self.stack[index]
    }

    fn exec(&mut self, body: &[(i32, Statement)], pending: &mut Vec<(String, FunctionDef)>) -> Result<usize, ScriptError> {
        for (line, stmt) in body {
            self.top().line = *line;
            self.fire(HookEvent::Line)?;
            match stmt {
                Statement::Nop | Statement::End => {}
                Statement::Function(name) => {
                    if let Some(index) = pending.iter().position(|(n, _)| n == name) {
                        let (name, def) = pending.remove(index);
                        self.functions.insert(name, def);
                    }
                }
                Statement::Local(name, value) => set_binding(&mut self.top().locals, name, value.clone()),
                Statement::Upvalue(name, value) => set_binding(&mut self.top().upvalues, name, value.clone()),
                Statement::Temp(value) => self.top().locals.push(Binding::new("(temporary)", value.clone())),
                Statement::Global(name, value) => {
                    lock(&self.globals).insert(name.clone(), value.clone());
                }
                Statement::Incr(name) => {
                    let mut globals = lock(&self.globals);
                    let next = match globals.get(name) {
                        Some(Value::Integer(i)) => i + 1,
                        _ => 1,
                    };
                    globals.insert(name.clone(), Value::Integer(next));
                }
                Statement::Call(name) => self.call(name, &[])?,
                Statement::Native(name) => self.call_native(name)?,
                Statement::Spin => loop {
                    self.fire(HookEvent::Line)?;
                    thread::yield_now();
                },
                Statement::Sleep(ms) => thread::sleep(Duration::from_millis(*ms)),
                Statement::Error(msg) => {
                    let source = self.top().source.clone();
                    return Err(ScriptError::Runtime(format!(
                        "{}:{}: {}",
                        crate::debug::strip_source_prefix(&source),
                        line,
                        msg
                    )));
                }
                Statement::Require(name) => {
                    let modules = self
                        .modules
                        .clone()
                        .ok_or_else(|| ScriptError::Runtime("require is not available".into()))?;
                    modules.require(self, name)?;
                }
                Statement::Return(count) => return Ok(*count),
            }
        }
        Ok(0)
    }

    fn call_native(&mut self, name: &str) -> Result<(), ScriptError> {
        let f = self
            .natives
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::Runtime(format!("attempt to call a nil value (native '{}')", name)))?;
        self.stack.push(Frame {
            source: "=[C]".into(),
            line: -1,
            line_defined: -1,
            name: Some(name.to_string()),
            kind: FrameKind::Native,
            locals: Vec::new(),
            upvalues: Vec::new(),
        });
        let depth = self.stack.len();
        let result = self.fire(HookEvent::Call).and_then(|_| {
            f();
            self.fire(HookEvent::Return)
        });
        self.stack.truncate(depth - 1);
        result
    }

    /// Pushes a frame, runs `body` between call and return events and pops
    /// the frame again, also when the body raised
    fn enter(
        &mut self,
        frame: Frame,
        body: &[(i32, Statement)],
        pending: &mut Vec<(String, FunctionDef)>,
    ) -> Result<usize, ScriptError> {
        self.stack.push(frame);
        let depth = self.stack.len();
        let result = self.run_frame(body, pending);
        self.stack.truncate(depth - 1);
        result
    }

    fn run_frame(
        &mut self,
        body: &[(i32, Statement)],
        pending: &mut Vec<(String, FunctionDef)>,
    ) -> Result<usize, ScriptError> {
        self.fire(HookEvent::Call)?;
        let count = self.exec(body, pending)?;
        // Return fires with the frame still on its last line
        self.fire(HookEvent::Return)?;
        Ok(count)
    }
}

fn set_binding(bindings: &mut Vec<Binding>, name: &str, value: Value) {
    match bindings.iter_mut().find(|b| b.name == name) {
        Some(binding) => binding.value = value,
        None => bindings.push(Binding::new(name, value)),
    }
}

fn parse_value(text: &str) -> Value {
    match text {
        "nil" => Value::Nil,
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        "fn" => Value::Opaque {
            type_name: "function".into(),
            repr: "function: builtin".into(),
        },
        t if t.starts_with('{') => Value::Opaque {
            type_name: "table".into(),
            repr: t.to_string(),
        },
        t if t.len() >= 2 && t.starts_with('"') && t.ends_with('"') => {
            Value::String(t[1..t.len() - 1].replace("\\n", "\n").replace("\\t", "\t"))
        }
        t => t
            .parse::<i64>()
            .map(Value::Integer)
            .or_else(|_| t.parse::<f64>().map(Value::Number))
            .unwrap_or_else(|_| Value::String(t.to_string())),
    }
}

impl Introspect for TestVm {
    fn frame(&self, level: usize) -> Option<FrameInfo> {
        let index = self.stack.len().checked_sub(level + 1)?;
        Some(self.stack[index].info())
    }

    fn locals(&self, level: usize) -> Vec<Binding> {
        self.stack
            .len()
            .checked_sub(level + 1)
            .map(|index| self.stack[index].locals.clone())
            .unwrap_or_default()
    }

    fn upvalues(&self, level: usize) -> Vec<Binding> {
        self.stack
            .len()
            .checked_sub(level + 1)
            .map(|index| self.stack[index].upvalues.clone())
            .unwrap_or_default()
    }

    fn set_local(&mut self, level: usize, name: &str, value: Value) -> bool {
        let Some(index) = self.stack.len().checked_sub(level + 1) else {
            return false;
        };
        match self.stack[index].locals.iter_mut().find(|b| b.name == name) {
            Some(binding) => {
                binding.value = value;
                true
            }
            None => false,
        }
    }

    fn set_global(&mut self, name: &str, value: Value) {
        lock(&self.globals).insert(name.to_string(), value);
    }

    fn set_hook(&mut self, hook: Option<Arc<dyn Hook>>, mask: HookMask) {
        self.hook = hook.map(|hook| (hook, mask));
    }
}

impl ScriptVm for TestVm {
    fn load(&mut self, chunk_name: &str, code: &str) -> Result<usize, ScriptError> {
        let statements = Self::parse(chunk_name, code)?;
        let (top, mut pending) = Self::split_functions(chunk_name, statements);
        let frame = Frame {
            source: chunk_name.to_string(),
            line: -1,
            line_defined: 0,
            name: None,
            kind: FrameKind::Main,
            locals: Vec::new(),
            upvalues: Vec::new(),
        };
        self.enter(frame, &top, &mut pending)
    }

    fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    fn call(&mut self, name: &str, args: &[Value]) -> Result<(), ScriptError> {
        let def = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::Runtime(format!("attempt to call a nil value (global '{}')", name)))?;
        let locals = def
            .params
            .iter()
            .zip(args.iter().cloned().chain(std::iter::repeat(Value::Nil)))
            .map(|(param, value)| Binding::new(param.clone(), value))
            .collect();
        let frame = Frame {
            source: def.source.clone(),
            line: def.line_defined,
            line_defined: def.line_defined,
            name: Some(name.to_string()),
            kind: FrameKind::Script,
            locals,
            upvalues: Vec::new(),
        };
        self.enter(frame, &def.body, &mut Vec::new()).map(|_| ())
    }

    fn set_modules(&mut self, modules: Arc<Modules>) {
        self.modules = Some(modules);
    }
}
