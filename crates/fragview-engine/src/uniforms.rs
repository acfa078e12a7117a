//! The uniform-binding and live-state-synchronization engine.
//!
//! [`Uniforms`] reconciles every independently-evolving input (shader
//! reloads, textures, streams, buffers, camera, lights, textual commands)
//! into one consistent uniform set fed to a shader program each frame,
//! while tracking changes so the render loop can skip frames that would
//! draw the exact same image.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::path::Path;

use crate::buffers::{Buffer, PingPong, Pyramid};
use crate::camera::{Camera, Mat3, Mat4};
use crate::commands::to_float;
use crate::error::EngineError;
use crate::light::{Light, LightKind};
use crate::stream::TextureStream;
use crate::texture::{Cubemap, TextureHandle};

/// Four numeric slots cover scalar through vec4; `UniformData::size` says
/// how many are semantically valid.
pub type UniformValue = [f32; 4];

/// The contract a shader program object must satisfy for the binding
/// pass. Implemented over glow by the CLI and by a recording mock in
/// tests.
pub trait Shader {
    /// Upload 1..=4 float components under `name`.
    fn set_uniform(&mut self, name: &str, values: &[f32]);
    fn set_int(&mut self, name: &str, value: i32);
    fn set_mat3(&mut self, name: &str, m: &Mat3);
    fn set_mat4(&mut self, name: &str, m: &Mat4);
    /// Upload an array of vec3 (used for the 9 SH coefficients).
    fn set_vec3_array(&mut self, name: &str, values: &[[f32; 3]]);
    fn set_texture(&mut self, name: &str, texture: TextureHandle, slot: usize);
    fn set_depth_texture(&mut self, name: &str, texture: TextureHandle, slot: usize);
    fn set_cubemap(&mut self, name: &str, texture: TextureHandle);
    /// Dense, monotonically increasing texture-slot allocator. The caller
    /// resets it once per draw; the binding pass pulls one slot per
    /// texture binding.
    fn next_texture_slot(&mut self) -> usize;
}

/// One user-defined uniform: the committed value plus a FIFO of pending
/// updates produced by rapid successive assignments between frames.
#[derive(Debug, Default, Clone)]
pub struct UniformData {
    pub value: UniformValue,
    pub queue: VecDeque<UniformValue>,
    pub size: usize,
    pub is_int: bool,
    pub change: bool,
}

impl UniformData {
    /// Assign a new value. When no change is pending the value is
    /// overwritten directly (latency-optimized path); when one is, the
    /// update is queued so rapid assignments keep their arrival order
    /// across frames.
    pub fn set(&mut self, value: UniformValue, size: usize, is_int: bool) {
        self.is_int = is_int;
        self.size = size.clamp(1, 4);

        if self.change {
            self.queue.push_back(value);
        } else {
            self.value = value;
        }
        self.change = true;
    }

    /// Assign from command-line tokens starting at `start`. Up to four
    /// tokens are converted permissively (non-numeric becomes 0) and the
    /// value is tagged int, matching numeric console assignments.
    pub fn parse(&mut self, tokens: &[&str], start: usize) {
        let mut candidate: UniformValue = [0.0; 4];
        for (slot, token) in tokens.iter().skip(start).take(4).enumerate() {
            candidate[slot] = to_float(token);
        }
        self.set(candidate, tokens.len().saturating_sub(start), true);
    }

    /// Per-frame settle step: promote at most one queued value. Returns
    /// whether this uniform still reports a pending change. The backlog
    /// drains over multiple frames and never drops entries.
    pub fn check(&mut self) -> bool {
        match self.queue.pop_front() {
            Some(next) => {
                self.value = next;
                self.change = true;
            }
            None => self.change = false,
        }
        self.change
    }

    /// GLSL type name for diagnostics ("float", "ivec3", ...).
    pub fn glsl_type(&self) -> String {
        if self.size <= 1 {
            if self.is_int { "int".into() } else { "float".into() }
        } else if self.is_int {
            format!("ivec{}", self.size)
        } else {
            format!("vec{}", self.size)
        }
    }
}

type AssignFn = fn(&Uniforms, &mut dyn Shader);
type PrintFn = fn(&Uniforms) -> String;

/// A native (engine-computed) uniform registration: a GLSL type tag for
/// introspection, an optional binding callback over live engine state, an
/// optional debug printer, and whether the current shader references it.
pub struct NativeUniform {
    pub glsl_type: &'static str,
    assign: Option<AssignFn>,
    print: Option<PrintFn>,
    pub present: bool,
}

/// Per-frame values maintained by the render loop and read by the native
/// uniform callbacks.
#[derive(Debug, Clone, Default)]
pub struct FrameState {
    pub time: f32,
    pub delta: f32,
    /// Year, month, day, seconds-since-midnight.
    pub date: [f32; 4],
    pub mouse: [f32; 2],
    pub resolution: [f32; 2],
}

/// Render targets of the scene pre-passes, exposed to postprocess shaders
/// as `u_scene` / `u_sceneDepth` / `u_sceneNormal` / `u_scenePosition`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SceneTextures {
    pub color: Option<TextureHandle>,
    pub depth: Option<TextureHandle>,
    pub normal: Option<TextureHandle>,
    pub position: Option<TextureHandle>,
}

/// One keyframe of an externally-recorded camera path.
#[derive(Debug, Clone, Copy)]
pub struct CameraFrame {
    pub projection: Mat4,
    pub transform: Mat4,
}

/// Scene helper uniforms skipped when the binding pass runs with lighting
/// disabled (reload/shadow passes).
const SCENE_HELPERS: [&str; 4] = ["u_scene", "u_sceneDepth", "u_sceneNormal", "u_scenePosition"];

/// The owned uniform context: every registry plus the change-flag engine.
///
/// One instance is owned by the render loop; worker threads never touch
/// it directly, they post events instead.
pub struct Uniforms {
    /// Native uniforms, registered once at construction. Only `present`
    /// mutates afterwards.
    pub functions: BTreeMap<String, NativeUniform>,
    /// User-defined uniforms, created on first reference by name.
    pub data: BTreeMap<String, UniformData>,
    pub textures: BTreeMap<String, TextureHandle>,
    pub streams: BTreeMap<String, Box<dyn TextureStream>>,
    pub buffers: Vec<Buffer>,
    pub double_buffers: Vec<PingPong>,
    pub pyramids: Vec<Pyramid>,
    pub lights: BTreeMap<String, Light>,
    pub active_camera: Option<Camera>,
    pub active_cubemap: Option<Cubemap>,
    pub scene: SceneTextures,
    pub camera_path: Vec<CameraFrame>,
    pub frame: FrameState,
    change: bool,
}

impl Default for Uniforms {
    fn default() -> Self {
        Self::new()
    }
}

impl Uniforms {
    pub fn new() -> Self {
        let mut u = Self {
            functions: BTreeMap::new(),
            data: BTreeMap::new(),
            textures: BTreeMap::new(),
            streams: BTreeMap::new(),
            buffers: Vec::new(),
            double_buffers: Vec::new(),
            pyramids: Vec::new(),
            lights: BTreeMap::new(),
            active_camera: None,
            active_cubemap: None,
            scene: SceneTextures::default(),
            camera_path: Vec::new(),
            frame: FrameState::default(),
            change: false,
        };
        u.register_natives();
        u
    }

    fn register(
        &mut self,
        name: &str,
        glsl_type: &'static str,
        assign: Option<AssignFn>,
        print: Option<PrintFn>,
    ) {
        self.functions.insert(
            name.to_string(),
            NativeUniform { glsl_type, assign, print, present: false },
        );
    }

    fn register_natives(&mut self) {
        // Frame state
        self.register(
            "u_time",
            "float",
            Some(|u, s| s.set_uniform("u_time", &[u.frame.time])),
            Some(|u| format!("{}", u.frame.time)),
        );
        self.register(
            "u_delta",
            "float",
            Some(|u, s| s.set_uniform("u_delta", &[u.frame.delta])),
            Some(|u| format!("{}", u.frame.delta)),
        );
        self.register(
            "u_date",
            "vec4",
            Some(|u, s| s.set_uniform("u_date", &u.frame.date)),
            Some(|u| {
                let d = u.frame.date;
                format!("{},{},{},{}", d[0], d[1], d[2], d[3])
            }),
        );
        self.register(
            "u_mouse",
            "vec2",
            Some(|u, s| s.set_uniform("u_mouse", &u.frame.mouse)),
            Some(|u| format!("{},{}", u.frame.mouse[0], u.frame.mouse[1])),
        );
        self.register(
            "u_resolution",
            "vec2",
            Some(|u, s| s.set_uniform("u_resolution", &u.frame.resolution)),
            Some(|u| format!("{},{}", u.frame.resolution[0], u.frame.resolution[1])),
        );

        // IBL
        self.register(
            "u_iblLuminance",
            "float",
            Some(|u, s| {
                if let Some(cam) = &u.active_camera {
                    s.set_uniform("u_iblLuminance", &[30_000.0 * cam.exposure]);
                }
            }),
            Some(|u| {
                u.active_camera
                    .as_ref()
                    .map(|c| format!("{}", 30_000.0 * c.exposure))
                    .unwrap_or_default()
            }),
        );

        // Camera
        self.register(
            "u_camera",
            "vec3",
            Some(|u, s| {
                if let Some(cam) = &u.active_camera {
                    let p = cam.position;
                    s.set_uniform("u_camera", &[-p[0], -p[1], -p[2]]);
                }
            }),
            Some(|u| {
                u.active_camera
                    .as_ref()
                    .map(|c| format!("{},{},{}", -c.position[0], -c.position[1], -c.position[2]))
                    .unwrap_or_default()
            }),
        );
        self.register(
            "u_cameraDistance",
            "float",
            Some(|u, s| {
                if let Some(cam) = &u.active_camera {
                    s.set_uniform("u_cameraDistance", &[cam.distance]);
                }
            }),
            Some(|u| u.active_camera.as_ref().map(|c| format!("{}", c.distance)).unwrap_or_default()),
        );
        self.register(
            "u_cameraNearClip",
            "float",
            Some(|u, s| {
                if let Some(cam) = &u.active_camera {
                    s.set_uniform("u_cameraNearClip", &[cam.near_clip]);
                }
            }),
            Some(|u| u.active_camera.as_ref().map(|c| format!("{}", c.near_clip)).unwrap_or_default()),
        );
        self.register(
            "u_cameraFarClip",
            "float",
            Some(|u, s| {
                if let Some(cam) = &u.active_camera {
                    s.set_uniform("u_cameraFarClip", &[cam.far_clip]);
                }
            }),
            Some(|u| u.active_camera.as_ref().map(|c| format!("{}", c.far_clip)).unwrap_or_default()),
        );
        self.register(
            "u_cameraEv100",
            "float",
            Some(|u, s| {
                if let Some(cam) = &u.active_camera {
                    s.set_uniform("u_cameraEv100", &[cam.ev100]);
                }
            }),
            Some(|u| u.active_camera.as_ref().map(|c| format!("{}", c.ev100)).unwrap_or_default()),
        );
        self.register(
            "u_cameraExposure",
            "float",
            Some(|u, s| {
                if let Some(cam) = &u.active_camera {
                    s.set_uniform("u_cameraExposure", &[cam.exposure]);
                }
            }),
            Some(|u| u.active_camera.as_ref().map(|c| format!("{}", c.exposure)).unwrap_or_default()),
        );
        self.register(
            "u_cameraAperture",
            "float",
            Some(|u, s| {
                if let Some(cam) = &u.active_camera {
                    s.set_uniform("u_cameraAperture", &[cam.aperture]);
                }
            }),
            Some(|u| u.active_camera.as_ref().map(|c| format!("{}", c.aperture)).unwrap_or_default()),
        );
        self.register(
            "u_cameraShutterSpeed",
            "float",
            Some(|u, s| {
                if let Some(cam) = &u.active_camera {
                    s.set_uniform("u_cameraShutterSpeed", &[cam.shutter_speed]);
                }
            }),
            Some(|u| {
                u.active_camera
                    .as_ref()
                    .map(|c| format!("{}", c.shutter_speed))
                    .unwrap_or_default()
            }),
        );
        self.register(
            "u_cameraSensitivity",
            "float",
            Some(|u, s| {
                if let Some(cam) = &u.active_camera {
                    s.set_uniform("u_cameraSensitivity", &[cam.sensitivity]);
                }
            }),
            Some(|u| u.active_camera.as_ref().map(|c| format!("{}", c.sensitivity)).unwrap_or_default()),
        );
        self.register(
            "u_cameraChange",
            "bool",
            Some(|u, s| {
                if let Some(cam) = &u.active_camera {
                    s.set_int("u_cameraChange", cam.changed as i32);
                }
            }),
            None,
        );
        self.register(
            "u_normalMatrix",
            "mat3",
            Some(|u, s| {
                if let Some(cam) = &u.active_camera {
                    s.set_mat3("u_normalMatrix", &cam.normal_matrix);
                }
            }),
            None,
        );
        self.register(
            "u_viewMatrix",
            "mat4",
            Some(|u, s| {
                if let Some(cam) = &u.active_camera {
                    s.set_mat4("u_viewMatrix", &cam.view_matrix);
                }
            }),
            None,
        );
        self.register(
            "u_inverseViewMatrix",
            "mat4",
            Some(|u, s| {
                if let Some(cam) = &u.active_camera {
                    s.set_mat4("u_inverseViewMatrix", &cam.inverse_view_matrix);
                }
            }),
            None,
        );
        self.register(
            "u_projectionMatrix",
            "mat4",
            Some(|u, s| {
                if let Some(cam) = &u.active_camera {
                    s.set_mat4("u_projectionMatrix", &cam.projection_matrix);
                }
            }),
            None,
        );
        self.register(
            "u_inverseProjectionMatrix",
            "mat4",
            Some(|u, s| {
                if let Some(cam) = &u.active_camera {
                    s.set_mat4("u_inverseProjectionMatrix", &cam.inverse_projection_matrix);
                }
            }),
            None,
        );

        // Scene pre-pass targets (postprocess helpers)
        self.register(
            "u_scene",
            "sampler2D",
            Some(|u, s| {
                if let Some(tex) = u.scene.color {
                    let slot = s.next_texture_slot();
                    s.set_texture("u_scene", tex, slot);
                }
            }),
            None,
        );
        self.register(
            "u_sceneDepth",
            "sampler2D",
            Some(|u, s| {
                if let Some(tex) = u.scene.depth {
                    let slot = s.next_texture_slot();
                    s.set_depth_texture("u_sceneDepth", tex, slot);
                }
            }),
            None,
        );
        self.register(
            "u_sceneNormal",
            "sampler2D",
            Some(|u, s| {
                if let Some(tex) = u.scene.normal {
                    let slot = s.next_texture_slot();
                    s.set_texture("u_sceneNormal", tex, slot);
                }
            }),
            None,
        );
        self.register(
            "u_scenePosition",
            "sampler2D",
            Some(|u, s| {
                if let Some(tex) = u.scene.position {
                    let slot = s.next_texture_slot();
                    s.set_texture("u_scenePosition", tex, slot);
                }
            }),
            None,
        );
    }

    // ---------------------------------------------------------------
    // Ingest
    // ---------------------------------------------------------------

    /// Upsert a user uniform by name. Unknown names are created on
    /// demand; there is no "unknown uniform" error class, to keep
    /// live-coding friction at zero.
    pub fn set(&mut self, name: &str, values: &[f32]) {
        let mut value: UniformValue = [0.0; 4];
        for (slot, v) in values.iter().take(4).enumerate() {
            value[slot] = *v;
        }
        self.data
            .entry(name.to_string())
            .or_default()
            .set(value, values.len(), false);
        self.change = true;
    }

    /// Generic fallback for command lines nothing else claimed:
    /// `name,v0[,v1,v2,v3]`. A line without a comma is a no-op.
    pub fn parse_line(&mut self, line: &str) -> bool {
        let values: Vec<&str> = line.split(',').collect();
        if values.len() > 1 {
            self.data.entry(values[0].to_string()).or_default().parse(&values, 1);
            self.change = true;
            return true;
        }
        false
    }

    // ---------------------------------------------------------------
    // Presence scan
    // ---------------------------------------------------------------

    /// Recompute `present` for every native uniform against freshly
    /// loaded shader sources. Presence is a substring test for `name;`
    /// or `name[` in either source, deliberately cheap and
    /// over-approximate (a comment can create a false positive, which
    /// only costs a wasted upload). The one forbidden failure mode is a
    /// false negative, so the patterns stay exactly these two.
    pub fn check_uniforms(&mut self, vert_src: &str, frag_src: &str) {
        for (name, f) in self.functions.iter_mut() {
            let stmt = format!("{name};");
            let array = format!("{name}[");
            let present = vert_src.contains(&stmt)
                || frag_src.contains(&stmt)
                || vert_src.contains(&array)
                || frag_src.contains(&array);
            if f.present != present {
                f.present = present;
                self.change = true;
            }
        }
    }

    // ---------------------------------------------------------------
    // Change-flag engine
    // ---------------------------------------------------------------

    /// Force everything to report "changed" so the next frame
    /// re-synchronizes the full uniform set (used after reloads and
    /// define edits).
    pub fn flag_change(&mut self) {
        self.change = true;
        if let Some(cam) = &mut self.active_camera {
            cam.changed = true;
        }
        for d in self.data.values_mut() {
            d.change = true;
        }
    }

    /// Per-frame settle step. Promotes at most one queued value per user
    /// uniform and re-accumulates the store-level dirty bit as the
    /// logical OR of the individual results: if any uniform still has a
    /// backlog, the engine keeps reporting change-pending next poll.
    /// Camera and light change flags are cleared unconditionally.
    pub fn unflag_change(&mut self) {
        if self.change {
            self.change = false;
            for d in self.data.values_mut() {
                if d.check() {
                    self.change = true;
                }
            }
        }

        for light in self.lights.values_mut() {
            light.changed = false;
        }
        if let Some(cam) = &mut self.active_camera {
            cam.changed = false;
        }
    }

    /// Whether the next frame could look different from the last one.
    /// False permits the render loop to sleep instead of redrawing.
    pub fn have_change(&self) -> bool {
        if let Some(cam) = &self.active_camera {
            if cam.changed {
                return true;
            }
        }

        for name in ["u_time", "u_date", "u_delta", "u_mouse"] {
            if self.functions.get(name).is_some_and(|f| f.present) {
                return true;
            }
        }

        if self.lights.values().any(|l| l.changed) {
            return true;
        }

        // Streams are assumed to produce a new frame every poll.
        self.change || !self.streams.is_empty()
    }

    // ---------------------------------------------------------------
    // Binding pass
    // ---------------------------------------------------------------

    /// Perform the minimal set of uniform uploads into `shader`.
    ///
    /// `lights` and `buffers` let reload/shadow passes disable whole
    /// binding groups. Returns whether any user-data upload happened
    /// (caller-side metrics only).
    pub fn feed_to(&self, shader: &mut dyn Shader, lights: bool, buffers: bool) -> bool {
        let mut updated = false;

        // Native uniforms referenced by the shader.
        for (name, f) in &self.functions {
            if !lights && SCENE_HELPERS.contains(&name.as_str()) {
                continue;
            }
            if f.present {
                if let Some(assign) = f.assign {
                    assign(self, shader);
                }
            }
        }

        // User-defined uniforms, only the changed ones.
        if self.change {
            for (name, d) in &self.data {
                if d.change {
                    shader.set_uniform(name, &d.value[..d.size.clamp(1, 4)]);
                    updated = true;
                }
            }
        }

        // Textures, each with its implicit resolution companion.
        for (name, tex) in &self.textures {
            let slot = shader.next_texture_slot();
            shader.set_texture(name, *tex, slot);
            shader.set_uniform(
                &format!("{name}Resolution"),
                &[tex.width as f32, tex.height as f32],
            );
        }

        // Streams: current frame, previous-frame ring, and the five
        // scalar companions (always uploaded together).
        for (name, stream) in &self.streams {
            let current = stream.texture();
            let slot = shader.next_texture_slot();
            shader.set_texture(name, current, slot);
            shader.set_uniform(
                &format!("{name}Resolution"),
                &[current.width as f32, current.height as f32],
            );

            for i in 0..stream.prev_textures_total() {
                if let Some(prev) = stream.prev_texture(i) {
                    let slot = shader.next_texture_slot();
                    shader.set_texture(&format!("{name}Prev[{i}]"), prev, slot);
                }
            }

            shader.set_uniform(&format!("{name}Time"), &[stream.time()]);
            shader.set_uniform(&format!("{name}Fps"), &[stream.fps()]);
            shader.set_uniform(&format!("{name}Duration"), &[stream.duration()]);
            shader.set_uniform(&format!("{name}CurrentFrame"), &[stream.current_frame() as f32]);
            shader.set_uniform(&format!("{name}TotalFrames"), &[stream.total_frames() as f32]);
        }

        // Buffers. Index order is registration order and stable across
        // frames; shader authors depend on the correspondence.
        if buffers {
            for (i, buffer) in self.buffers.iter().enumerate() {
                let slot = shader.next_texture_slot();
                shader.set_texture(&format!("u_buffer{i}"), buffer.texture, slot);
            }
            for (i, pp) in self.double_buffers.iter().enumerate() {
                let slot = shader.next_texture_slot();
                shader.set_texture(&format!("u_doubleBuffer{i}"), pp.src().texture, slot);
            }
            for (i, pyramid) in self.pyramids.iter().enumerate() {
                if let Some(result) = pyramid.result() {
                    let slot = shader.next_texture_slot();
                    shader.set_texture(&format!("u_pyramid{i}"), result, slot);
                }
            }
        }

        if lights {
            if self.lights.len() == 1 {
                // Single-light scenes bind the unprefixed u_light* names.
                let light = self.lights.values().next().unwrap();
                Self::feed_light(light, "u_light", shader);
            } else {
                for (name, light) in &self.lights {
                    Self::feed_light(light, &format!("u_{name}"), shader);
                }
            }

            if let Some(cubemap) = &self.active_cubemap {
                shader.set_cubemap("u_cubeMap", cubemap.texture);
                shader.set_vec3_array("u_SH", &cubemap.sh);
            }
        }

        updated
    }

    /// Bind one light. The position uniform is the bare prefix itself
    /// ("u_light" for the single-light case, "u_<name>" otherwise).
    fn feed_light(light: &Light, prefix: &str, shader: &mut dyn Shader) {
        shader.set_uniform(&format!("{prefix}Color"), &light.color);
        shader.set_uniform(&format!("{prefix}Intensity"), &[light.intensity]);
        if light.kind != LightKind::Directional {
            shader.set_uniform(prefix, &light.position);
        }
        if matches!(light.kind, LightKind::Directional | LightKind::Spot) {
            shader.set_uniform(&format!("{prefix}Direction"), &light.direction);
        }
        if light.falloff > 0.0 {
            shader.set_uniform(&format!("{prefix}Falloff"), &[light.falloff]);
        }
        shader.set_mat4(&format!("{prefix}Matrix"), &light.bias_mvp);
        if let Some(shadow_map) = light.shadow_map {
            let slot = shader.next_texture_slot();
            shader.set_depth_texture(&format!("{prefix}ShadowMap"), shadow_map, slot);
        }
    }

    // ---------------------------------------------------------------
    // Streams
    // ---------------------------------------------------------------

    /// Poll every stream for a newer frame.
    pub fn update_streams(&mut self) {
        for stream in self.streams.values_mut() {
            stream.update();
        }
    }

    /// Rewind every stream to its first frame.
    pub fn restart_streams(&mut self) {
        for stream in self.streams.values_mut() {
            stream.restart();
        }
    }

    // ---------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------

    /// Native uniforms as GLSL declarations, with current values where a
    /// printer exists. `non_active` includes the ones the shader does
    /// not reference.
    pub fn available_uniforms(&self, non_active: bool) -> String {
        let mut out = String::new();
        for (name, f) in &self.functions {
            if !non_active && !f.present {
                continue;
            }
            let _ = write!(out, "uniform {} {name};", f.glsl_type);
            if let Some(print) = f.print {
                let _ = write!(out, " // {}", print(self));
            }
            out.push('\n');
        }
        out
    }

    /// User-defined uniforms, either as GLSL declarations with values or
    /// as plain CSV lines.
    pub fn defined_uniforms(&self, csv: bool) -> String {
        let mut out = String::new();
        for (name, d) in &self.data {
            if csv {
                let _ = write!(out, "{name}");
                for i in 0..d.size {
                    let _ = write!(out, ",{}", d.value[i]);
                }
            } else {
                let _ = write!(out, "uniform {}  {name};", d.glsl_type());
                for i in 0..d.size {
                    let _ = write!(out, "{}{}", if i == 0 { " // " } else { "," }, d.value[i]);
                }
            }
            out.push('\n');
        }
        out
    }

    /// Samplable buffer uniforms as GLSL declarations.
    pub fn buffers_summary(&self) -> String {
        let mut out = String::new();
        for i in 0..self.buffers.len() {
            let _ = writeln!(out, "uniform sampler2D u_buffer{i};");
        }
        for i in 0..self.double_buffers.len() {
            let _ = writeln!(out, "uniform sampler2D u_doubleBuffer{i};");
        }
        for i in 0..self.pyramids.len() {
            let _ = writeln!(out, "uniform sampler2D u_pyramid{i};");
        }
        for name in SCENE_HELPERS {
            if self.functions.get(name).is_some_and(|f| f.present) {
                let _ = writeln!(out, "uniform sampler2D {name};");
            }
        }
        out
    }

    // ---------------------------------------------------------------
    // Clearing
    // ---------------------------------------------------------------

    /// Drop all user uniforms and presence flags (shader reload/scene
    /// clear). Individual entries are never destroyed outside of this.
    pub fn clear_uniforms(&mut self) {
        self.data.clear();
        for f in self.functions.values_mut() {
            f.present = false;
        }
    }

    pub fn clear_buffers(&mut self) {
        self.buffers.clear();
        self.double_buffers.clear();
        self.pyramids.clear();
    }

    pub fn clear(&mut self) {
        self.clear_uniforms();
        self.clear_buffers();
        self.textures.clear();
        self.streams.clear();
        self.lights.clear();
        self.active_cubemap = None;
    }

    // ---------------------------------------------------------------
    // Camera path
    // ---------------------------------------------------------------

    /// Load a camera path file: `#`-prefixed comments skipped, each data
    /// line 15 comma-separated floats (focal length, principal point
    /// x/y, then 12 transform components) building one keyframe.
    /// Returns the number of frames loaded.
    pub fn add_camera_path(&mut self, path: &Path) -> Result<usize, EngineError> {
        let src = std::fs::read_to_string(path).map_err(|e| EngineError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let (near, far) = self
            .active_camera
            .as_ref()
            .map(|c| (c.near_clip, c.far_clip))
            .unwrap_or((0.0, 1000.0));

        self.camera_path.clear();

        for (line_no, line) in src.lines().enumerate() {
            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }

            let p: Vec<f32> = line.split(',').map(to_float).collect();
            if p.len() < 15 {
                return Err(EngineError::CameraPath {
                    path: path.to_path_buf(),
                    msg: format!("line {}: expected 15 values, got {}", line_no + 1, p.len()),
                });
            }

            let (f_l, cx, cy) = (p[0], p[1], p[2]);
            let delta = far - near;
            let w = cx * 2.0;
            let h = cy * 2.0;

            let projection: Mat4 = [
                2.0 * f_l / w,
                0.0,
                0.0,
                0.0,
                0.0,
                -2.0 * f_l / h,
                0.0,
                0.0,
                (w - 2.0 * cx) / w,
                (h - 2.0 * cy) / h,
                (-far - near) / delta,
                -1.0,
                0.0,
                0.0,
                -2.0 * far * near / delta,
                0.0,
            ];

            let transform: Mat4 = [
                p[3], p[4], p[5], 0.0, //
                p[6], -p[7], p[8], 0.0, //
                p[9], p[10], p[11], 0.0, //
                p[12], p[13], -p[14], 1.0,
            ];

            self.camera_path.push(CameraFrame { projection, transform });
        }

        Ok(self.camera_path.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    /// Records every upload so tests can assert on what the binding pass
    /// actually did.
    #[derive(Default)]
    struct RecordingShader {
        floats: Vec<(String, Vec<f32>)>,
        ints: Vec<(String, i32)>,
        mats: Vec<String>,
        textures: Vec<(String, u32, usize)>,
        depth_textures: Vec<(String, u32, usize)>,
        cubemaps: Vec<String>,
        vec3_arrays: Vec<(String, usize)>,
        slot: usize,
    }

    impl RecordingShader {
        fn uploaded(&self, name: &str) -> bool {
            self.floats.iter().any(|(n, _)| n == name)
                || self.ints.iter().any(|(n, _)| n == name)
                || self.mats.iter().any(|n| n == name)
                || self.textures.iter().any(|(n, _, _)| n == name)
                || self.depth_textures.iter().any(|(n, _, _)| n == name)
                || self.cubemaps.iter().any(|n| n == name)
                || self.vec3_arrays.iter().any(|(n, _)| n == name)
        }

        fn texture_for(&self, name: &str) -> Option<u32> {
            self.textures
                .iter()
                .find(|(n, _, _)| n == name)
                .map(|(_, id, _)| *id)
        }
    }

    impl Shader for RecordingShader {
        fn set_uniform(&mut self, name: &str, values: &[f32]) {
            self.floats.push((name.to_string(), values.to_vec()));
        }
        fn set_int(&mut self, name: &str, value: i32) {
            self.ints.push((name.to_string(), value));
        }
        fn set_mat3(&mut self, name: &str, _m: &Mat3) {
            self.mats.push(name.to_string());
        }
        fn set_mat4(&mut self, name: &str, _m: &Mat4) {
            self.mats.push(name.to_string());
        }
        fn set_vec3_array(&mut self, name: &str, values: &[[f32; 3]]) {
            self.vec3_arrays.push((name.to_string(), values.len()));
        }
        fn set_texture(&mut self, name: &str, texture: TextureHandle, slot: usize) {
            self.textures.push((name.to_string(), texture.id, slot));
        }
        fn set_depth_texture(&mut self, name: &str, texture: TextureHandle, slot: usize) {
            self.depth_textures.push((name.to_string(), texture.id, slot));
        }
        fn set_cubemap(&mut self, name: &str, _texture: TextureHandle) {
            self.cubemaps.push(name.to_string());
        }
        fn next_texture_slot(&mut self) -> usize {
            let slot = self.slot;
            self.slot += 1;
            slot
        }
    }

    struct FakeStream {
        frames_seen: usize,
        retained: usize,
    }

    impl TextureStream for FakeStream {
        fn texture(&self) -> TextureHandle {
            TextureHandle::new(100, 320, 240)
        }
        fn prev_texture(&self, index: usize) -> Option<TextureHandle> {
            (index < self.prev_textures_total())
                .then(|| TextureHandle::new(101 + index as u32, 320, 240))
        }
        fn prev_textures_total(&self) -> usize {
            self.retained.min(self.frames_seen.saturating_sub(1))
        }
        fn time(&self) -> f32 {
            self.frames_seen as f32 / 24.0
        }
        fn fps(&self) -> f32 {
            24.0
        }
        fn duration(&self) -> f32 {
            10.0
        }
        fn current_frame(&self) -> usize {
            self.frames_seen
        }
        fn total_frames(&self) -> usize {
            240
        }
        fn update(&mut self) -> bool {
            self.frames_seen += 1;
            true
        }
        fn restart(&mut self) {
            self.frames_seen = 0;
        }
    }

    fn buffer(id: u32) -> Buffer {
        Buffer {
            fbo: id,
            texture: TextureHandle::new(id, 64, 64),
        }
    }

    #[test]
    fn rapid_sets_keep_fifo_order_until_drained() {
        let mut d = UniformData::default();
        d.set([1.0, 0.0, 0.0, 0.0], 1, false);
        assert_eq!(d.value[0], 1.0);
        assert!(d.change);

        // Change already pending: these enqueue instead of overwriting.
        d.set([2.0, 0.0, 0.0, 0.0], 1, false);
        d.set([3.0, 0.0, 0.0, 0.0], 1, false);
        assert_eq!(d.value[0], 1.0);
        assert_eq!(d.queue.len(), 2);

        // One promotion per check; change stays true until fully drained.
        assert!(d.check());
        assert_eq!(d.value[0], 2.0);
        assert!(d.check());
        assert_eq!(d.value[0], 3.0);
        assert!(!d.check());
        assert!(!d.change);
        assert_eq!(d.value[0], 3.0);
    }

    #[test]
    fn parse_coerces_and_tags_int() {
        let mut d = UniformData::default();
        d.parse(&["u_x", "1", "nope", "3.5"], 1);
        assert_eq!(d.value[0], 1.0);
        assert_eq!(d.value[1], 0.0);
        assert_eq!(d.value[2], 3.5);
        assert_eq!(d.size, 3);
        assert!(d.is_int);
        assert_eq!(d.glsl_type(), "ivec3");
    }

    #[test]
    fn parse_clamps_size_to_four() {
        let mut d = UniformData::default();
        d.parse(&["u_x", "1", "2", "3", "4", "5", "6"], 1);
        assert_eq!(d.size, 4);
        assert_eq!(d.value, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn presence_scan_matches_statement_and_array_forms() {
        let mut u = Uniforms::new();
        let vert = "void main() { mat4 m = u_viewMatrix; gl_Position = vec4(0.); }";
        // "uniform float u_time;" only appears in a comment: a documented
        // false positive, still reported present.
        let frag = "// uses u_time; somewhere\nvoid main() { float d = u_date[3]; }";
        u.check_uniforms(vert, frag);

        assert!(u.functions["u_viewMatrix"].present);
        assert!(u.functions["u_time"].present);
        assert!(u.functions["u_date"].present);
        assert!(!u.functions["u_delta"].present);
        assert!(!u.functions["u_mouse"].present);
    }

    #[test]
    fn presence_flip_marks_store_dirty() {
        let mut u = Uniforms::new();
        u.check_uniforms("", "uniform float u_time; void main() { float t = u_time; }");
        assert!(u.have_change()); // u_time present drives redraws by itself
        u.check_uniforms("", "void main() {}");
        assert!(!u.functions["u_time"].present);
    }

    #[test]
    fn change_flags_settle_over_frames() {
        let mut u = Uniforms::new();
        assert!(!u.have_change());

        u.flag_change();
        assert!(u.have_change());
        u.unflag_change();
        assert!(!u.have_change());

        // Two rapid assignments: the backlog keeps the engine dirty for
        // exactly one extra settle pass.
        u.set("u_speed", &[1.0]);
        u.set("u_speed", &[2.0]);
        assert!(u.have_change());
        u.unflag_change();
        assert!(u.have_change());
        u.unflag_change();
        assert!(!u.have_change());
        assert_eq!(u.data["u_speed"].value[0], 2.0);
    }

    #[test]
    fn unflag_clears_camera_and_lights() {
        let mut u = Uniforms::new();
        u.active_camera = Some(Camera::default());
        u.lights.insert("key".into(), Light::default());
        assert!(u.have_change());

        u.unflag_change();
        assert!(!u.have_change());
        assert!(!u.active_camera.as_ref().unwrap().changed);
    }

    #[test]
    fn registered_stream_always_reports_change() {
        let mut u = Uniforms::new();
        u.unflag_change();
        u.streams.insert(
            "u_video".into(),
            Box::new(FakeStream { frames_seen: 0, retained: 0 }),
        );
        assert!(u.have_change());
    }

    #[test]
    fn feed_skips_unchanged_user_uniforms() {
        let mut u = Uniforms::new();
        u.set("u_a", &[1.0]);
        u.set("u_b", &[2.0]);
        u.unflag_change();

        // Only u_a changes afterwards.
        u.set("u_a", &[9.0]);

        let mut shader = RecordingShader::default();
        // Settle pass first cleared u_b's change bit.
        assert!(u.feed_to(&mut shader, true, true));
        assert!(shader.uploaded("u_a"));
        assert!(!shader.uploaded("u_b"));
    }

    #[test]
    fn feed_truncates_to_declared_size() {
        let mut u = Uniforms::new();
        u.set("u_pos", &[1.0, 2.0]);
        let mut shader = RecordingShader::default();
        u.feed_to(&mut shader, true, true);
        let (_, values) = shader.floats.iter().find(|(n, _)| n == "u_pos").unwrap();
        assert_eq!(values.as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn lights_disabled_never_touches_scene_or_light_uniforms() {
        let mut u = Uniforms::new();
        u.scene.color = Some(TextureHandle::new(10, 64, 64));
        u.scene.depth = Some(TextureHandle::new(11, 64, 64));
        u.scene.normal = Some(TextureHandle::new(12, 64, 64));
        u.scene.position = Some(TextureHandle::new(13, 64, 64));
        for name in SCENE_HELPERS {
            u.functions.get_mut(name).unwrap().present = true;
        }
        u.lights.insert("key".into(), Light::default());
        u.active_cubemap = Some(Cubemap {
            texture: TextureHandle::new(20, 64, 64),
            sh: [[0.0; 3]; 9],
        });

        let mut shader = RecordingShader::default();
        u.feed_to(&mut shader, false, true);

        for name in [
            "u_scene",
            "u_sceneDepth",
            "u_sceneNormal",
            "u_scenePosition",
            "u_lightColor",
            "u_lightIntensity",
            "u_lightMatrix",
            "u_cubeMap",
            "u_SH",
        ] {
            assert!(!shader.uploaded(name), "{name} must not be uploaded");
        }
    }

    #[test]
    fn single_light_binds_unprefixed_names() {
        let mut u = Uniforms::new();
        u.lights.insert(
            "key".into(),
            Light {
                kind: LightKind::Point,
                falloff: 0.5,
                shadow_map: Some(TextureHandle::new(30, 512, 512)),
                ..Light::default()
            },
        );

        let mut shader = RecordingShader::default();
        u.feed_to(&mut shader, true, true);

        assert!(shader.uploaded("u_lightColor"));
        assert!(shader.uploaded("u_lightIntensity"));
        assert!(shader.uploaded("u_light")); // point light position
        assert!(shader.uploaded("u_lightFalloff"));
        assert!(shader.uploaded("u_lightMatrix"));
        assert!(shader.depth_textures.iter().any(|(n, _, _)| n == "u_lightShadowMap"));
        assert!(!shader.uploaded("u_lightDirection")); // not for point lights
        assert!(!shader.uploaded("u_keyColor"));
    }

    #[test]
    fn two_lights_bind_prefixed_names_only() {
        let mut u = Uniforms::new();
        u.lights.insert(
            "key".into(),
            Light { kind: LightKind::Directional, ..Light::default() },
        );
        u.lights.insert(
            "fill".into(),
            Light { kind: LightKind::Spot, ..Light::default() },
        );

        let mut shader = RecordingShader::default();
        u.feed_to(&mut shader, true, true);

        for name in ["u_keyColor", "u_keyIntensity", "u_fillColor", "u_fillIntensity"] {
            assert!(shader.uploaded(name), "{name} missing");
        }
        assert!(!shader.uploaded("u_lightColor"));
        assert!(!shader.uploaded("u_lightIntensity"));

        // Directional lights get a direction but no position; spot lights
        // get both.
        assert!(shader.uploaded("u_keyDirection"));
        assert!(!shader.uploaded("u_key"));
        assert!(shader.uploaded("u_fillDirection"));
        assert!(shader.uploaded("u_fill"));
    }

    #[test]
    fn textures_carry_implicit_resolution_companion() {
        let mut u = Uniforms::new();
        u.textures.insert("u_tex0".into(), TextureHandle::new(7, 256, 128));

        let mut shader = RecordingShader::default();
        u.feed_to(&mut shader, true, true);

        assert!(shader.uploaded("u_tex0"));
        let (_, res) = shader
            .floats
            .iter()
            .find(|(n, _)| n == "u_tex0Resolution")
            .expect("resolution companion");
        assert_eq!(res.as_slice(), &[256.0, 128.0]);
    }

    #[test]
    fn stream_binds_ring_and_all_five_companions() {
        let mut u = Uniforms::new();
        let mut stream = FakeStream { frames_seen: 0, retained: 3 };
        for _ in 0..5 {
            stream.update();
        }
        u.streams.insert("u_video".into(), Box::new(stream));

        let mut shader = RecordingShader::default();
        u.feed_to(&mut shader, true, true);

        assert!(shader.uploaded("u_video"));
        assert!(shader.uploaded("u_videoPrev[0]"));
        assert!(shader.uploaded("u_videoPrev[1]"));
        assert!(shader.uploaded("u_videoPrev[2]"));
        assert!(!shader.uploaded("u_videoPrev[3]"));
        for name in [
            "u_videoTime",
            "u_videoFps",
            "u_videoDuration",
            "u_videoCurrentFrame",
            "u_videoTotalFrames",
        ] {
            assert!(shader.uploaded(name), "{name} missing");
        }
    }

    #[test]
    fn buffer_indices_are_stable_across_frames() {
        let mut u = Uniforms::new();
        u.buffers.push(buffer(40));
        u.buffers.push(buffer(41));
        u.buffers.push(buffer(42));

        let mut first = RecordingShader::default();
        u.feed_to(&mut first, true, true);
        let mut second = RecordingShader::default();
        u.feed_to(&mut second, true, true);

        for i in 0..3 {
            let name = format!("u_buffer{i}");
            assert_eq!(first.texture_for(&name), Some(40 + i as u32));
            assert_eq!(first.texture_for(&name), second.texture_for(&name));
        }
    }

    #[test]
    fn double_buffer_binds_current_src_side() {
        let mut u = Uniforms::new();
        u.double_buffers.push(PingPong::new(buffer(50), buffer(51)));

        let mut shader = RecordingShader::default();
        u.feed_to(&mut shader, true, true);
        assert_eq!(shader.texture_for("u_doubleBuffer0"), Some(50));

        u.double_buffers[0].swap();
        let mut shader = RecordingShader::default();
        u.feed_to(&mut shader, true, true);
        assert_eq!(shader.texture_for("u_doubleBuffer0"), Some(51));
    }

    #[test]
    fn buffers_disabled_skips_buffer_group() {
        let mut u = Uniforms::new();
        u.buffers.push(buffer(40));
        u.double_buffers.push(PingPong::new(buffer(50), buffer(51)));
        u.pyramids.push(Pyramid::new(vec![buffer(60)], vec![buffer(61)]));

        let mut shader = RecordingShader::default();
        u.feed_to(&mut shader, true, false);
        assert!(!shader.uploaded("u_buffer0"));
        assert!(!shader.uploaded("u_doubleBuffer0"));
        assert!(!shader.uploaded("u_pyramid0"));
    }

    #[test]
    fn texture_slots_are_dense_and_monotonic() {
        let mut u = Uniforms::new();
        u.textures.insert("u_tex0".into(), TextureHandle::new(1, 8, 8));
        u.textures.insert("u_tex1".into(), TextureHandle::new(2, 8, 8));
        u.buffers.push(buffer(3));

        let mut shader = RecordingShader::default();
        u.feed_to(&mut shader, true, true);

        let slots: Vec<usize> = shader.textures.iter().map(|(_, _, s)| *s).collect();
        assert_eq!(slots, vec![0, 1, 2]);
    }

    #[test]
    fn cubemap_binds_nine_sh_coefficients() {
        let mut u = Uniforms::new();
        u.active_cubemap = Some(Cubemap {
            texture: TextureHandle::new(70, 64, 64),
            sh: [[0.1; 3]; 9],
        });

        let mut shader = RecordingShader::default();
        u.feed_to(&mut shader, true, true);

        assert!(shader.cubemaps.iter().any(|n| n == "u_cubeMap"));
        assert_eq!(
            shader.vec3_arrays.iter().find(|(n, _)| n == "u_SH").map(|(_, len)| *len),
            Some(9)
        );
    }

    #[test]
    fn parse_line_upserts_and_single_token_is_noop() {
        let mut u = Uniforms::new();
        assert!(!u.parse_line("u_orphan"));
        assert!(u.parse_line("u_color,1,0,0.5"));
        let d = &u.data["u_color"];
        assert_eq!(d.size, 3);
        assert_eq!(d.value[2], 0.5);
    }

    #[test]
    fn clear_uniforms_drops_data_and_presence() {
        let mut u = Uniforms::new();
        u.set("u_x", &[1.0]);
        u.check_uniforms("", "void main() { float t = u_time; } // u_time;");
        assert!(u.functions["u_time"].present);

        u.clear_uniforms();
        assert!(u.data.is_empty());
        assert!(!u.functions["u_time"].present);
    }

    #[test]
    fn camera_path_parses_keyframes_and_skips_comments() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("camera.path");
        let mut f = std::fs::File::create(&path).expect("create");
        writeln!(f, "# focal,cx,cy,transform...").expect("write");
        writeln!(
            f,
            "500,320,240,1,0,0,0,1,0,0,0,1,0,0,5"
        )
        .expect("write");
        writeln!(f, "500,320,240,1,0,0,0,1,0,0,0,1,0,0,6").expect("write");

        let mut u = Uniforms::new();
        let frames = u.add_camera_path(&path).expect("load path");
        assert_eq!(frames, 2);

        let frame = &u.camera_path[0];
        // 2*fL/w with w = 2*cx
        assert!((frame.projection[0] - 500.0 / 320.0).abs() < 1e-6);
        // Z translation is negated on import.
        assert_eq!(frame.transform[14], -5.0);
        // Y basis row sign flip.
        assert_eq!(frame.transform[5], -1.0);
    }

    #[test]
    fn camera_path_missing_file_is_an_error() {
        let mut u = Uniforms::new();
        assert!(u.add_camera_path(Path::new("/nonexistent/camera.path")).is_err());
    }

    #[test]
    fn camera_path_short_line_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.path");
        std::fs::write(&path, "1,2,3\n").expect("write");

        let mut u = Uniforms::new();
        assert!(u.add_camera_path(&path).is_err());
    }

    #[test]
    fn introspection_lists_declarations() {
        let mut u = Uniforms::new();
        u.check_uniforms("", "void main() { float t = u_time; } // u_time;");
        u.set("u_speed", &[2.0]);
        u.buffers.push(buffer(1));

        let active = u.available_uniforms(false);
        assert!(active.contains("uniform float u_time;"));
        assert!(!active.contains("u_delta"));

        let all = u.available_uniforms(true);
        assert!(all.contains("u_delta"));

        let defined = u.defined_uniforms(false);
        assert!(defined.contains("uniform float  u_speed;"));
        let csv = u.defined_uniforms(true);
        assert!(csv.contains("u_speed,2"));

        assert!(u.buffers_summary().contains("uniform sampler2D u_buffer0;"));
    }
}
