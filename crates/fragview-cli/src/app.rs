//! Render-thread application state.
//!
//! `App` owns the GL handles and the engine's `Uniforms` context. All
//! mutation happens on the render thread: worker threads only post
//! events, command handlers run between frames via the dispatcher.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use glow::HasContext;

use fragview_engine::buffers::{Buffer, PingPong, Pyramid};
use fragview_engine::commands::CommandHelp;
use fragview_engine::events::{WatchFile, WatchedKind};
use fragview_engine::texture::TextureHandle;
use fragview_engine::uniforms::{Shader as _, Uniforms};

use crate::assets;
use crate::gl::{
    create_render_target, native_framebuffer, native_texture, read_target_pixels,
    resize_render_target, try_compile_program, GlProgram, RenderTarget, VERT_SRC,
};
use crate::record::{save_screenshot, RecordSession};
use crate::{loge, logi, logw};

// Shown when fragview is started without a fragment shader (textures or
// streams only): pass the first texture through, or a uv gradient.
pub const DEFAULT_FRAG_SRC: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 frag_color;
uniform sampler2D u_tex0;
uniform vec2 u_tex0Resolution;
void main() {
    if (u_tex0Resolution.x > 0.0) {
        frag_color = texture(u_tex0, v_uv);
    } else {
        frag_color = vec4(v_uv, 0.0, 1.0);
    }
}"#;

// Internal convolution-pyramid passes: a 3x3 tent downsample and an
// upsample that folds the matching downsample level back in.
const PYRAMID_DOWN_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 frag_color;
uniform sampler2D u_tex;
uniform vec2 u_pixel;
void main() {
    vec4 sum = vec4(0.0);
    for (int y = -1; y <= 1; y++)
    for (int x = -1; x <= 1; x++) {
        float w = (x == 0 ? 2.0 : 1.0) * (y == 0 ? 2.0 : 1.0);
        sum += w * texture(u_tex, v_uv + vec2(x, y) * u_pixel);
    }
    frag_color = sum / 16.0;
}"#;

const PYRAMID_UP_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 frag_color;
uniform sampler2D u_tex;
uniform sampler2D u_tex1;
uniform vec2 u_pixel;
void main() {
    vec4 coarse = vec4(0.0);
    for (int y = -1; y <= 1; y++)
    for (int x = -1; x <= 1; x++) {
        float w = (x == 0 ? 2.0 : 1.0) * (y == 0 ? 2.0 : 1.0);
        coarse += w * texture(u_tex, v_uv + vec2(x, y) * u_pixel);
    }
    frag_color = mix(coarse / 16.0, texture(u_tex1, v_uv), 0.5);
}"#;

pub struct App {
    pub gl: Arc<glow::Context>,
    pub uniforms: Uniforms,

    pub files: Vec<WatchFile>,
    pub frag_index: Option<usize>,
    pub vert_index: Option<usize>,
    /// File index -> uniform name, for reloading textures in place.
    pub file_uniform_names: HashMap<usize, String>,
    pub include_dirs: Vec<PathBuf>,
    pub defines: Vec<(String, Option<String>)>,
    pub vflip_textures: bool,

    pub frag_src: String,
    pub vert_src: String,
    pub program: Option<glow::NativeProgram>,
    pub buffer_programs: Vec<glow::NativeProgram>,
    pub double_buffer_programs: Vec<glow::NativeProgram>,
    pub pyramid_down_program: Option<glow::NativeProgram>,
    pub pyramid_up_program: Option<glow::NativeProgram>,
    pub present_program: glow::NativeProgram,
    pub vao: glow::NativeVertexArray,
    pub rt: RenderTarget,

    pub catalog: Vec<CommandHelp>,

    pub keep_running: bool,
    /// Quit once pending screenshot/record work has flushed.
    pub terminate: bool,
    pub full_fps: bool,
    pub fps_target: f32,
    pub verbose: bool,
    pub headless: bool,

    pub screenshot_file: Option<PathBuf>,
    pub record: Option<RecordSession>,

    pub start_time: Instant,
    pub time_offset: f32,
    pub last_frame_at: Instant,
    pub measured_fps: f32,

    pub win_width: i32,
    pub win_height: i32,
    pub pixel_density: f32,
    pub screen_width: i32,
    pub screen_height: i32,
}

impl App {
    // ---------------------------------------------------------------
    // Shader sources
    // ---------------------------------------------------------------

    /// Read a shader file, expanding `#include "file"` lines against the
    /// file's own directory and the `-I` include folders.
    pub fn resolve_source(&self, path: &Path, depth: usize) -> anyhow::Result<String> {
        if depth > 8 {
            anyhow::bail!("#include nesting deeper than 8 at {}", path.display());
        }
        let src = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;

        let dir = path.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| PathBuf::from("."));

        let mut out = String::new();
        for line in src.lines() {
            let trimmed = line.trim_start();
            if let Some(rest) = trimmed.strip_prefix("#include") {
                let name = rest.trim().trim_matches('"');
                let found = std::iter::once(&dir)
                    .chain(self.include_dirs.iter())
                    .map(|base| base.join(name))
                    .find(|candidate| candidate.exists());
                match found {
                    Some(include) => out.push_str(&self.resolve_source(&include, depth + 1)?),
                    None => logw!("SHADER", "include not found: {name}"),
                }
            } else {
                out.push_str(line);
                out.push('\n');
            }
        }
        Ok(out)
    }

    /// Inject the active `#define` block (plus an optional per-pass
    /// define) right after the `#version` line.
    fn with_defines(&self, src: &str, extra: Option<&str>) -> String {
        let mut block = String::new();
        for (key, value) in &self.defines {
            match value {
                Some(v) => block.push_str(&format!("#define {key} {v}\n")),
                None => block.push_str(&format!("#define {key}\n")),
            }
        }
        if let Some(extra) = extra {
            block.push_str(&format!("#define {extra}\n"));
        }
        if block.is_empty() {
            return src.to_string();
        }

        match src.find('\n') {
            Some(nl) if src.starts_with("#version") => {
                format!("{}\n{}{}", &src[..nl], block, &src[nl + 1..])
            }
            _ => format!("{block}{src}"),
        }
    }

    pub fn add_define(&mut self, key: &str, value: Option<&str>) {
        let value = value.map(|v| v.to_string());
        if let Some(existing) = self.defines.iter_mut().find(|(k, _)| k == key) {
            existing.1 = value;
        } else {
            self.defines.push((key.to_string(), value));
        }
    }

    pub fn del_define(&mut self, key: &str) -> bool {
        let before = self.defines.len();
        self.defines.retain(|(k, _)| k != key);
        self.defines.len() != before
    }

    pub fn defines_summary(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.defines {
            match value {
                Some(v) => out.push_str(&format!("#define {key} {v}\n")),
                None => out.push_str(&format!("#define {key}\n")),
            }
        }
        out
    }

    // ---------------------------------------------------------------
    // Reload
    // ---------------------------------------------------------------

    /// Re-read sources, recompile every pass, rescan uniform presence and
    /// rebuild the buffer registries. A failed compile keeps the previous
    /// program running.
    pub fn reload_shaders(&mut self) {
        let frag = match self.frag_index {
            Some(i) => {
                let path = self.files[i].path.clone();
                match self.resolve_source(&path, 0) {
                    Ok(src) => src,
                    Err(e) => {
                        loge!("SHADER", "{e}");
                        return;
                    }
                }
            }
            None => DEFAULT_FRAG_SRC.to_string(),
        };
        let vert = match self.vert_index {
            Some(i) => {
                let path = self.files[i].path.clone();
                match self.resolve_source(&path, 0) {
                    Ok(src) => src,
                    Err(e) => {
                        loge!("SHADER", "{e}");
                        return;
                    }
                }
            }
            None => VERT_SRC.to_string(),
        };

        let gl = self.gl.clone();
        let vert_full = self.with_defines(&vert, None);
        let frag_full = self.with_defines(&frag, None);

        match unsafe { try_compile_program(&gl, &vert_full, &frag_full) } {
            Ok(program) => {
                if let Some(old) = self.program.take() {
                    unsafe { gl.delete_program(old) };
                }
                self.program = Some(program);
                self.frag_src = frag;
                self.vert_src = vert;
                logi!("SHADER", "compiled ok");
            }
            Err(e) => {
                loge!("SHADER", "{e}");
                return;
            }
        }

        self.uniforms.check_uniforms(&self.vert_src, &self.frag_src);
        self.rebuild_buffers();
        self.uniforms.flag_change();
    }

    /// How many `prefix<N>` uniforms the fragment source references,
    /// counting up from 0 until the first gap.
    fn count_buffer_refs(&self, prefix: &str) -> usize {
        let mut n = 0;
        while self.frag_src.contains(&format!("{prefix}{n}")) {
            n += 1;
        }
        n
    }

    /// Recreate buffer/double-buffer/pyramid targets and their per-pass
    /// programs from the current fragment source. Each pass compiles the
    /// same source with its own `BUFFER_<i>` / `DOUBLE_BUFFER_<i>`
    /// define so shader authors can branch per pass.
    pub fn rebuild_buffers(&mut self) {
        let gl = self.gl.clone();

        for buffer in self.uniforms.buffers.drain(..) {
            unsafe { delete_buffer_target(&gl, &buffer) };
        }
        for pp in self.uniforms.double_buffers.drain(..) {
            unsafe {
                delete_buffer_target(&gl, pp.src());
                delete_buffer_target(&gl, pp.dst());
            }
        }
        for pyramid in self.uniforms.pyramids.drain(..) {
            for level in pyramid.down.iter().chain(pyramid.up.iter()) {
                unsafe { delete_buffer_target(&gl, level) };
            }
        }
        for program in self.buffer_programs.drain(..) {
            unsafe { gl.delete_program(program) };
        }
        for program in self.double_buffer_programs.drain(..) {
            unsafe { gl.delete_program(program) };
        }

        let (w, h) = (self.win_width.max(1), self.win_height.max(1));
        let vert = self.vert_src.clone();
        let frag = self.frag_src.clone();

        let n_buffers = self.count_buffer_refs("u_buffer");
        for i in 0..n_buffers {
            match unsafe { create_buffer_target(&gl, w, h) } {
                Ok(buffer) => self.uniforms.buffers.push(buffer),
                Err(e) => {
                    loge!("SHADER", "buffer {i}: {e}");
                    break;
                }
            }
            let src = self.with_defines(&frag, Some(&format!("BUFFER_{i}")));
            match unsafe { try_compile_program(&gl, &self.with_defines(&vert, None), &src) } {
                Ok(p) => self.buffer_programs.push(p),
                Err(e) => loge!("SHADER", "buffer {i}: {e}"),
            }
        }

        let n_double = self.count_buffer_refs("u_doubleBuffer");
        for i in 0..n_double {
            let pair = unsafe {
                create_buffer_target(&gl, w, h)
                    .and_then(|a| create_buffer_target(&gl, w, h).map(|b| (a, b)))
            };
            match pair {
                Ok((a, b)) => self.uniforms.double_buffers.push(PingPong::new(a, b)),
                Err(e) => {
                    loge!("SHADER", "doubleBuffer {i}: {e}");
                    break;
                }
            }
            let src = self.with_defines(&frag, Some(&format!("DOUBLE_BUFFER_{i}")));
            match unsafe { try_compile_program(&gl, &self.with_defines(&vert, None), &src) } {
                Ok(p) => self.double_buffer_programs.push(p),
                Err(e) => loge!("SHADER", "doubleBuffer {i}: {e}"),
            }
        }

        let n_pyramids = self.count_buffer_refs("u_pyramid");
        if n_pyramids > 0 && self.pyramid_down_program.is_none() {
            unsafe {
                match try_compile_program(&gl, VERT_SRC, PYRAMID_DOWN_FRAG) {
                    Ok(p) => self.pyramid_down_program = Some(p),
                    Err(e) => loge!("SHADER", "pyramid down pass: {e}"),
                }
                match try_compile_program(&gl, VERT_SRC, PYRAMID_UP_FRAG) {
                    Ok(p) => self.pyramid_up_program = Some(p),
                    Err(e) => loge!("SHADER", "pyramid up pass: {e}"),
                }
            }
        }
        for i in 0..n_pyramids {
            match unsafe { create_pyramid(&gl, w, h) } {
                Ok(pyramid) => self.uniforms.pyramids.push(pyramid),
                Err(e) => {
                    loge!("SHADER", "pyramid {i}: {e}");
                    break;
                }
            }
        }

        if self.verbose && (n_buffers > 0 || n_double > 0 || n_pyramids > 0) {
            logi!(
                "SHADER",
                "passes: {n_buffers} buffers, {n_double} double buffers, {n_pyramids} pyramids"
            );
        }
    }

    /// React to a watched-file change notification.
    pub fn on_file_changed(&mut self, index: usize) {
        let Some(file) = self.files.get(index) else { return };
        let kind = file.kind;
        let path = file.path.clone();
        if self.verbose {
            logi!("WATCH", "{} changed: {}", kind.as_str(), path.display());
        }

        match kind {
            WatchedKind::FragShader | WatchedKind::VertShader => self.reload_shaders(),
            WatchedKind::Image => {
                let Some(name) = self.file_uniform_names.get(&index).cloned() else { return };
                match assets::load_texture(&self.gl, &path, self.vflip_textures) {
                    Ok(handle) => {
                        self.uniforms.textures.insert(name, handle);
                        self.uniforms.flag_change();
                    }
                    Err(e) => loge!("WATCH", "{e}"),
                }
            }
            WatchedKind::Cubemap => match assets::load_cubemap(&self.gl, &path) {
                Ok(cubemap) => {
                    self.uniforms.active_cubemap = Some(cubemap);
                    self.uniforms.flag_change();
                }
                Err(e) => loge!("WATCH", "{e}"),
            },
        }
    }

    // ---------------------------------------------------------------
    // Per-frame state
    // ---------------------------------------------------------------

    /// Advance the clock uniforms. A running capture session overrides
    /// wall time with its own deterministic step.
    pub fn update_clock(&mut self) {
        let now = Instant::now();
        let delta = now.duration_since(self.last_frame_at).as_secs_f32();
        self.last_frame_at = now;

        self.uniforms.frame.delta = delta;
        self.uniforms.frame.time = match &self.record {
            Some(session) => session.frame_time(),
            None => now.duration_since(self.start_time).as_secs_f32() + self.time_offset,
        };

        let local = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
        self.uniforms.frame.date = [
            local.year() as f32,
            local.month() as u8 as f32,
            local.day() as f32,
            local.hour() as f32 * 3600.0
                + local.minute() as f32 * 60.0
                + local.second() as f32
                + local.millisecond() as f32 / 1000.0,
        ];

        self.uniforms.frame.resolution = [self.rt.w as f32, self.rt.h as f32];

        if delta > 0.0 {
            self.measured_fps = self.measured_fps * 0.95 + (1.0 / delta) * 0.05;
        }
    }

    pub fn resize(&mut self, w: i32, h: i32) {
        if w <= 0 || h <= 0 || (w == self.win_width && h == self.win_height) {
            return;
        }
        self.win_width = w;
        self.win_height = h;
        let gl = self.gl.clone();
        unsafe { resize_render_target(&gl, &mut self.rt, w, h) };
        self.rebuild_buffers();
        self.uniforms.flag_change();
    }

    // ---------------------------------------------------------------
    // Rendering
    // ---------------------------------------------------------------

    /// Render one frame: buffer passes, double-buffer passes, pyramid
    /// chains, the main pass into the offscreen target, then present.
    pub fn render(&mut self) {
        let Some(program) = self.program else { return };
        let gl = self.gl.clone();

        unsafe { gl.bind_vertex_array(Some(self.vao)) };

        // Ordered passes: buffers first so the main pass can sample them
        // this frame. Lighting is disabled for prepasses.
        for i in 0..self.uniforms.buffers.len().min(self.buffer_programs.len()) {
            let target = self.uniforms.buffers[i];
            let pass = self.buffer_programs[i];
            unsafe {
                gl.bind_framebuffer(glow::FRAMEBUFFER, native_framebuffer(target.fbo));
                gl.viewport(0, 0, target.texture.width as i32, target.texture.height as i32);
                gl.use_program(Some(pass));
            }
            let mut shader = GlProgram::new(&gl, pass);
            self.uniforms.feed_to(&mut shader, false, true);
            unsafe { gl.draw_arrays(glow::TRIANGLES, 0, 3) };
        }

        for i in 0..self.uniforms.double_buffers.len().min(self.double_buffer_programs.len()) {
            let dst = *self.uniforms.double_buffers[i].dst();
            let pass = self.double_buffer_programs[i];
            unsafe {
                gl.bind_framebuffer(glow::FRAMEBUFFER, native_framebuffer(dst.fbo));
                gl.viewport(0, 0, dst.texture.width as i32, dst.texture.height as i32);
                gl.use_program(Some(pass));
            }
            let mut shader = GlProgram::new(&gl, pass);
            self.uniforms.feed_to(&mut shader, false, true);
            unsafe { gl.draw_arrays(glow::TRIANGLES, 0, 3) };
            // Roles swap each evaluation; contents persist.
            self.uniforms.double_buffers[i].swap();
        }

        self.render_pyramids();

        // Main pass into the offscreen target (the source of truth for
        // present, screenshots and capture).
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.rt.fbo));
            gl.viewport(0, 0, self.rt.w, self.rt.h);
            gl.clear_color(0.0, 0.0, 0.0, 1.0);
            gl.clear(glow::COLOR_BUFFER_BIT);
            gl.use_program(Some(program));
        }
        let mut shader = GlProgram::new(&gl, program);
        self.uniforms.feed_to(&mut shader, true, true);
        unsafe { gl.draw_arrays(glow::TRIANGLES, 0, 3) };

        // The scene target doubles as the postprocess input next frame.
        self.uniforms.scene.color = Some(self.rt.handle());

        if !self.headless {
            unsafe {
                gl.bind_framebuffer(glow::FRAMEBUFFER, None);
                gl.viewport(0, 0, self.win_width, self.win_height);
                gl.clear_color(0.02, 0.02, 0.02, 1.0);
                gl.clear(glow::COLOR_BUFFER_BIT);
                gl.use_program(Some(self.present_program));
            }
            let mut present = GlProgram::new(&gl, self.present_program);
            let slot = present.next_texture_slot();
            present.set_texture("u_tex", self.rt.handle(), slot);
            unsafe { gl.draw_arrays(glow::TRIANGLES, 0, 3) };
        }

        unsafe {
            gl.bind_vertex_array(None);
            gl.use_program(None);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }

        self.flush_captures();
    }

    fn render_pyramids(&mut self) {
        if self.uniforms.pyramids.is_empty() {
            return;
        }
        let (Some(down_prog), Some(up_prog)) = (self.pyramid_down_program, self.pyramid_up_program)
        else {
            return;
        };
        let gl = self.gl.clone();
        let source = self.rt.handle();

        for pyramid in &self.uniforms.pyramids {
            let mut input = source;

            for level in &pyramid.down {
                unsafe {
                    gl.bind_framebuffer(glow::FRAMEBUFFER, native_framebuffer(level.fbo));
                    gl.viewport(0, 0, level.texture.width as i32, level.texture.height as i32);
                    gl.use_program(Some(down_prog));
                }
                let mut shader = GlProgram::new(&gl, down_prog);
                bind_pyramid_inputs(&mut shader, input, None);
                unsafe { gl.draw_arrays(glow::TRIANGLES, 0, 3) };
                input = level.texture;
            }

            let depth = pyramid.down.len();
            for (j, level) in pyramid.up.iter().enumerate() {
                // Fold the matching (finer) downsample level back in.
                let fine = depth
                    .checked_sub(2 + j)
                    .and_then(|idx| pyramid.down.get(idx))
                    .map(|b| b.texture)
                    .unwrap_or(source);
                unsafe {
                    gl.bind_framebuffer(glow::FRAMEBUFFER, native_framebuffer(level.fbo));
                    gl.viewport(0, 0, level.texture.width as i32, level.texture.height as i32);
                    gl.use_program(Some(up_prog));
                }
                let mut shader = GlProgram::new(&gl, up_prog);
                bind_pyramid_inputs(&mut shader, input, Some(fine));
                unsafe { gl.draw_arrays(glow::TRIANGLES, 0, 3) };
                input = level.texture;
            }
        }
    }

    /// Screenshot and capture readback, after the main pass has landed
    /// in the offscreen target.
    fn flush_captures(&mut self) {
        let gl = self.gl.clone();

        if let Some(path) = self.screenshot_file.take() {
            let pixels = unsafe { read_target_pixels(&gl, &self.rt) };
            match save_screenshot(&path, self.rt.w as u32, self.rt.h as u32, &pixels) {
                Ok(()) => logi!("RECORD", "screenshot saved: {}", path.display()),
                Err(e) => loge!("RECORD", "{e}"),
            }
            if self.terminate {
                self.keep_running = false;
            }
        }

        if let Some(session) = &mut self.record {
            let pixels = unsafe { read_target_pixels(&gl, &self.rt) };
            let (w, h) = (self.rt.w as usize, self.rt.h as usize);
            session.push_frame(w, h, &pixels);

            let pct = session.progress();
            if session.done() {
                if let Some(session) = self.record.take() {
                    session.finish();
                }
                logi!("RECORD", "capture finished");
                if self.terminate {
                    self.keep_running = false;
                }
            } else if self.verbose {
                logi!("RECORD", "{:3.0}%", pct * 100.0);
            }
        }
    }
}

fn bind_pyramid_inputs(
    shader: &mut GlProgram<'_>,
    input: TextureHandle,
    fine: Option<TextureHandle>,
) {
    let slot = shader.next_texture_slot();
    shader.set_texture("u_tex", input, slot);
    shader.set_uniform(
        "u_pixel",
        &[1.0 / input.width.max(1) as f32, 1.0 / input.height.max(1) as f32],
    );
    if let Some(fine) = fine {
        let slot = shader.next_texture_slot();
        shader.set_texture("u_tex1", fine, slot);
    }
}

unsafe fn create_buffer_target(gl: &glow::Context, w: i32, h: i32) -> anyhow::Result<Buffer> {
    let rt = create_render_target(gl, w, h)?;
    Ok(Buffer { fbo: rt.fbo.0.get(), texture: rt.handle() })
}

unsafe fn delete_buffer_target(gl: &glow::Context, buffer: &Buffer) {
    if let Some(fbo) = native_framebuffer(buffer.fbo) {
        gl.delete_framebuffer(fbo);
    }
    if let Some(tex) = native_texture(buffer.texture.id) {
        gl.delete_texture(tex);
    }
}

/// Halving chain down to 8px, mirrored back up. Depth is bounded so tiny
/// windows still get at least one level.
unsafe fn create_pyramid(gl: &glow::Context, w: i32, h: i32) -> anyhow::Result<Pyramid> {
    let mut down = Vec::new();
    let mut up = Vec::new();

    let mut lw = w.max(2) / 2;
    let mut lh = h.max(2) / 2;
    while lw >= 8 && lh >= 8 && down.len() < 8 {
        down.push(create_buffer_target(gl, lw, lh)?);
        lw /= 2;
        lh /= 2;
    }
    if down.is_empty() {
        down.push(create_buffer_target(gl, w.max(2) / 2, h.max(2) / 2)?);
    }

    for level in down.iter().rev().skip(1) {
        up.push(create_buffer_target(
            gl,
            level.texture.width as i32,
            level.texture.height as i32,
        )?);
    }
    up.push(create_buffer_target(gl, w.max(1), h.max(1))?);

    Ok(Pyramid::new(down, up))
}
