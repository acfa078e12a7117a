//! GL plumbing: program compilation, FBO render targets, texture upload,
//! and the glow-backed implementation of the engine's `Shader` trait.

use std::num::NonZeroU32;

use glow::HasContext;

use fragview_engine::camera::{Mat3, Mat4};
use fragview_engine::texture::TextureHandle;
use fragview_engine::uniforms::Shader;

// Fullscreen triangle vertex shader
pub const VERT_SRC: &str = r#"#version 330 core
out vec2 v_uv;
void main() {
    vec2 pos;
    if (gl_VertexID == 0) pos = vec2(-1.0, -1.0);
    else if (gl_VertexID == 1) pos = vec2( 3.0, -1.0);
    else pos = vec2(-1.0,  3.0);
    v_uv = pos * 0.5 + 0.5;
    gl_Position = vec4(pos, 0.0, 1.0);
}"#;

// Blit of the offscreen render target into the window.
pub const PRESENT_FRAG_SRC: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 frag_color;
uniform sampler2D u_tex;
void main() {
    frag_color = texture(u_tex, v_uv);
}"#;

pub unsafe fn try_compile_program(
    gl: &glow::Context,
    vert_src: &str,
    frag_src: &str,
) -> anyhow::Result<glow::NativeProgram> {
    let vs = gl
        .create_shader(glow::VERTEX_SHADER)
        .map_err(|e| anyhow::anyhow!("create vertex shader: {e}"))?;
    gl.shader_source(vs, vert_src);
    gl.compile_shader(vs);
    if !gl.get_shader_compile_status(vs) {
        let log = gl.get_shader_info_log(vs);
        gl.delete_shader(vs);
        return Err(anyhow::anyhow!("Vertex shader compile error:\n{log}"));
    }

    let fs = gl
        .create_shader(glow::FRAGMENT_SHADER)
        .map_err(|e| anyhow::anyhow!("create fragment shader: {e}"))?;
    gl.shader_source(fs, frag_src);
    gl.compile_shader(fs);
    if !gl.get_shader_compile_status(fs) {
        let log = gl.get_shader_info_log(fs);
        gl.delete_shader(vs);
        gl.delete_shader(fs);
        return Err(anyhow::anyhow!("Fragment shader compile error:\n{log}"));
    }

    let program = gl
        .create_program()
        .map_err(|e| anyhow::anyhow!("create program: {e}"))?;
    gl.attach_shader(program, vs);
    gl.attach_shader(program, fs);
    gl.link_program(program);

    if !gl.get_program_link_status(program) {
        let log = gl.get_program_info_log(program);
        gl.detach_shader(program, vs);
        gl.detach_shader(program, fs);
        gl.delete_shader(vs);
        gl.delete_shader(fs);
        gl.delete_program(program);
        return Err(anyhow::anyhow!("Program link error:\n{log}"));
    }

    gl.detach_shader(program, vs);
    gl.detach_shader(program, fs);
    gl.delete_shader(vs);
    gl.delete_shader(fs);

    Ok(program)
}

/// FBO render target.
#[derive(Debug, Clone, Copy)]
pub struct RenderTarget {
    pub fbo: glow::NativeFramebuffer,
    pub tex: glow::NativeTexture,
    pub w: i32,
    pub h: i32,
}

impl RenderTarget {
    pub fn handle(&self) -> TextureHandle {
        TextureHandle::new(tex_id(self.tex), self.w.max(0) as u32, self.h.max(0) as u32)
    }
}

pub unsafe fn create_render_target(
    gl: &glow::Context,
    w: i32,
    h: i32,
) -> anyhow::Result<RenderTarget> {
    let tex = gl
        .create_texture()
        .map_err(|e| anyhow::anyhow!("create_texture: {e}"))?;
    gl.bind_texture(glow::TEXTURE_2D, Some(tex));
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
    gl.tex_image_2d(
        glow::TEXTURE_2D,
        0,
        glow::RGBA as i32,
        w,
        h,
        0,
        glow::RGBA,
        glow::UNSIGNED_BYTE,
        glow::PixelUnpackData::Slice(None),
    );
    gl.bind_texture(glow::TEXTURE_2D, None);

    let fbo = gl
        .create_framebuffer()
        .map_err(|e| anyhow::anyhow!("create_framebuffer: {e}"))?;
    gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
    gl.framebuffer_texture_2d(
        glow::FRAMEBUFFER,
        glow::COLOR_ATTACHMENT0,
        glow::TEXTURE_2D,
        Some(tex),
        0,
    );

    let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
    gl.bind_framebuffer(glow::FRAMEBUFFER, None);
    if status != glow::FRAMEBUFFER_COMPLETE {
        return Err(anyhow::anyhow!("FBO incomplete: 0x{status:x}"));
    }

    Ok(RenderTarget { fbo, tex, w, h })
}

pub unsafe fn resize_render_target(gl: &glow::Context, rt: &mut RenderTarget, w: i32, h: i32) {
    if w == rt.w && h == rt.h {
        return;
    }
    rt.w = w;
    rt.h = h;

    gl.bind_texture(glow::TEXTURE_2D, Some(rt.tex));
    gl.tex_image_2d(
        glow::TEXTURE_2D,
        0,
        glow::RGBA as i32,
        w,
        h,
        0,
        glow::RGBA,
        glow::UNSIGNED_BYTE,
        glow::PixelUnpackData::Slice(None),
    );
    gl.bind_texture(glow::TEXTURE_2D, None);
}

// Convert glow::NativeTexture <-> OpenGL texture name (u32)
pub fn tex_id(tex: glow::NativeTexture) -> u32 {
    tex.0.get()
}

pub fn native_texture(id: u32) -> Option<glow::NativeTexture> {
    NonZeroU32::new(id).map(glow::NativeTexture)
}

pub fn native_framebuffer(id: u32) -> Option<glow::NativeFramebuffer> {
    NonZeroU32::new(id).map(glow::NativeFramebuffer)
}

/// Allocate an RGBA8 texture, optionally filled with pixel data.
pub unsafe fn create_texture_rgba(
    gl: &glow::Context,
    w: i32,
    h: i32,
    pixels: Option<&[u8]>,
) -> anyhow::Result<glow::NativeTexture> {
    let tex = gl
        .create_texture()
        .map_err(|e| anyhow::anyhow!("create_texture: {e}"))?;
    gl.bind_texture(glow::TEXTURE_2D, Some(tex));
    gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::REPEAT as i32);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::REPEAT as i32);
    gl.tex_image_2d(
        glow::TEXTURE_2D,
        0,
        glow::RGBA as i32,
        w,
        h,
        0,
        glow::RGBA,
        glow::UNSIGNED_BYTE,
        glow::PixelUnpackData::Slice(pixels),
    );
    gl.bind_texture(glow::TEXTURE_2D, None);
    Ok(tex)
}

/// Replace the full contents of an RGBA8 texture.
pub unsafe fn update_texture_rgba(
    gl: &glow::Context,
    tex: glow::NativeTexture,
    w: i32,
    h: i32,
    pixels: &[u8],
) {
    gl.bind_texture(glow::TEXTURE_2D, Some(tex));
    gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
    gl.tex_sub_image_2d(
        glow::TEXTURE_2D,
        0,
        0,
        0,
        w,
        h,
        glow::RGBA,
        glow::UNSIGNED_BYTE,
        glow::PixelUnpackData::Slice(Some(pixels)),
    );
    gl.bind_texture(glow::TEXTURE_2D, None);
}

/// Read back the color attachment of a render target as tightly packed
/// RGBA8 rows (bottom-up, as GL delivers them).
pub unsafe fn read_target_pixels(gl: &glow::Context, rt: &RenderTarget) -> Vec<u8> {
    let mut pixels = vec![0u8; (rt.w.max(0) as usize) * (rt.h.max(0) as usize) * 4];
    gl.bind_framebuffer(glow::FRAMEBUFFER, Some(rt.fbo));
    gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
    gl.read_pixels(
        0,
        0,
        rt.w,
        rt.h,
        glow::RGBA,
        glow::UNSIGNED_BYTE,
        glow::PixelPackData::Slice(Some(&mut pixels)),
    );
    gl.bind_framebuffer(glow::FRAMEBUFFER, None);
    pixels
}

/// The engine's shader-binding target, wrapping one compiled program.
///
/// glow uniform calls are unsafe; this wrapper keeps all of them in one
/// place and carries the per-draw texture-slot counter the binding pass
/// increments.
pub struct GlProgram<'a> {
    gl: &'a glow::Context,
    program: glow::NativeProgram,
    texture_index: usize,
}

impl<'a> GlProgram<'a> {
    pub fn new(gl: &'a glow::Context, program: glow::NativeProgram) -> Self {
        Self { gl, program, texture_index: 0 }
    }

    fn location(&self, name: &str) -> Option<glow::NativeUniformLocation> {
        unsafe { self.gl.get_uniform_location(self.program, name) }
    }

    fn bind_texture_2d(&mut self, name: &str, texture: TextureHandle, slot: usize) {
        let Some(tex) = native_texture(texture.id) else { return };
        unsafe {
            if let Some(loc) = self.location(name) {
                self.gl.active_texture(glow::TEXTURE0 + slot as u32);
                self.gl.bind_texture(glow::TEXTURE_2D, Some(tex));
                self.gl.uniform_1_i32(Some(&loc), slot as i32);
            }
        }
    }
}

impl Shader for GlProgram<'_> {
    fn set_uniform(&mut self, name: &str, values: &[f32]) {
        unsafe {
            if let Some(loc) = self.location(name) {
                match values {
                    [x] => self.gl.uniform_1_f32(Some(&loc), *x),
                    [x, y] => self.gl.uniform_2_f32(Some(&loc), *x, *y),
                    [x, y, z] => self.gl.uniform_3_f32(Some(&loc), *x, *y, *z),
                    [x, y, z, w] => self.gl.uniform_4_f32(Some(&loc), *x, *y, *z, *w),
                    _ => {}
                }
            }
        }
    }

    fn set_int(&mut self, name: &str, value: i32) {
        unsafe {
            if let Some(loc) = self.location(name) {
                self.gl.uniform_1_i32(Some(&loc), value);
            }
        }
    }

    fn set_mat3(&mut self, name: &str, m: &Mat3) {
        unsafe {
            if let Some(loc) = self.location(name) {
                self.gl.uniform_matrix_3_f32_slice(Some(&loc), false, m);
            }
        }
    }

    fn set_mat4(&mut self, name: &str, m: &Mat4) {
        unsafe {
            if let Some(loc) = self.location(name) {
                self.gl.uniform_matrix_4_f32_slice(Some(&loc), false, m);
            }
        }
    }

    fn set_vec3_array(&mut self, name: &str, values: &[[f32; 3]]) {
        let flat: Vec<f32> = values.iter().flatten().copied().collect();
        unsafe {
            // Both "name" and "name[0]" resolve depending on driver.
            let loc = self
                .location(name)
                .or_else(|| self.location(&format!("{name}[0]")));
            if let Some(loc) = loc {
                self.gl.uniform_3_f32_slice(Some(&loc), &flat);
            }
        }
    }

    fn set_texture(&mut self, name: &str, texture: TextureHandle, slot: usize) {
        self.bind_texture_2d(name, texture, slot);
    }

    fn set_depth_texture(&mut self, name: &str, texture: TextureHandle, slot: usize) {
        // Depth attachments are sampled as regular 2D textures here.
        self.bind_texture_2d(name, texture, slot);
    }

    fn set_cubemap(&mut self, name: &str, texture: TextureHandle) {
        let Some(tex) = native_texture(texture.id) else { return };
        let slot = self.next_texture_slot();
        unsafe {
            if let Some(loc) = self.location(name) {
                self.gl.active_texture(glow::TEXTURE0 + slot as u32);
                self.gl.bind_texture(glow::TEXTURE_CUBE_MAP, Some(tex));
                self.gl.uniform_1_i32(Some(&loc), slot as i32);
            }
        }
    }

    fn next_texture_slot(&mut self) -> usize {
        let slot = self.texture_index;
        self.texture_index += 1;
        slot
    }
}
