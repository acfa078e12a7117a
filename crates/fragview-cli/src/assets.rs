//! Static asset loading: image textures and environment cubemaps.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use glow::HasContext;

use fragview_engine::texture::{Cubemap, TextureHandle};

use crate::gl::{create_texture_rgba, tex_id};

/// Load an image file into a GL texture, optionally flipped vertically.
pub fn load_texture(gl: &glow::Context, path: &Path, vflip: bool) -> anyhow::Result<TextureHandle> {
    let img = image::open(path).with_context(|| format!("loading {}", path.display()))?;
    let img = if vflip { img.flipv() } else { img };
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();

    let tex = unsafe { create_texture_rgba(gl, w as i32, h as i32, Some(rgba.as_raw()))? };
    Ok(TextureHandle::new(tex_id(tex), w, h))
}

const CUBE_FACE_SIZE: u32 = 64;

/// Load an equirectangular environment map as a cubemap plus its 9
/// spherical-harmonics irradiance coefficients (bound as `u_SH`).
pub fn load_cubemap(gl: &Arc<glow::Context>, path: &Path) -> anyhow::Result<Cubemap> {
    let img = image::open(path).with_context(|| format!("loading {}", path.display()))?;
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    let pixels = rgba.as_raw();

    let sample = |dir: [f32; 3]| -> [f32; 3] {
        let u = 0.5 + dir[0].atan2(-dir[2]) / (2.0 * std::f32::consts::PI);
        let v = 0.5 - dir[1].asin() / std::f32::consts::PI;
        let x = ((u * w as f32) as u32).min(w - 1);
        let y = ((v * h as f32) as u32).min(h - 1);
        let o = ((y * w + x) * 4) as usize;
        [
            pixels[o] as f32 / 255.0,
            pixels[o + 1] as f32 / 255.0,
            pixels[o + 2] as f32 / 255.0,
        ]
    };

    let tex = unsafe {
        let tex = gl
            .create_texture()
            .map_err(|e| anyhow::anyhow!("create_texture: {e}"))?;
        gl.bind_texture(glow::TEXTURE_CUBE_MAP, Some(tex));
        for p in [
            glow::TEXTURE_MIN_FILTER,
            glow::TEXTURE_MAG_FILTER,
        ] {
            gl.tex_parameter_i32(glow::TEXTURE_CUBE_MAP, p, glow::LINEAR as i32);
        }
        for p in [
            glow::TEXTURE_WRAP_S,
            glow::TEXTURE_WRAP_T,
            glow::TEXTURE_WRAP_R,
        ] {
            gl.tex_parameter_i32(glow::TEXTURE_CUBE_MAP, p, glow::CLAMP_TO_EDGE as i32);
        }

        let n = CUBE_FACE_SIZE;
        for face in 0..6u32 {
            let mut data = Vec::with_capacity((n * n * 4) as usize);
            for y in 0..n {
                for x in 0..n {
                    // Face texel -> [-1,1] square -> direction.
                    let a = 2.0 * (x as f32 + 0.5) / n as f32 - 1.0;
                    let b = 2.0 * (y as f32 + 0.5) / n as f32 - 1.0;
                    let dir = match face {
                        0 => [1.0, -b, -a],  // +X
                        1 => [-1.0, -b, a],  // -X
                        2 => [a, 1.0, b],    // +Y
                        3 => [a, -1.0, -b],  // -Y
                        4 => [a, -b, 1.0],   // +Z
                        _ => [-a, -b, -1.0], // -Z
                    };
                    let c = sample(normalize(dir));
                    data.push((c[0] * 255.0) as u8);
                    data.push((c[1] * 255.0) as u8);
                    data.push((c[2] * 255.0) as u8);
                    data.push(255);
                }
            }
            gl.tex_image_2d(
                glow::TEXTURE_CUBE_MAP_POSITIVE_X + face,
                0,
                glow::RGBA as i32,
                n as i32,
                n as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(Some(&data)),
            );
        }
        gl.bind_texture(glow::TEXTURE_CUBE_MAP, None);
        tex
    };

    let sh = project_sh(w, h, &sample);

    Ok(Cubemap {
        texture: TextureHandle::new(tex_id(tex), CUBE_FACE_SIZE, CUBE_FACE_SIZE),
        sh,
    })
}

/// Project the equirect map onto the first 9 SH basis functions,
/// weighting each pixel by its solid angle.
fn project_sh(w: u32, h: u32, sample: &dyn Fn([f32; 3]) -> [f32; 3]) -> [[f32; 3]; 9] {
    // Work on a decimated grid; irradiance is low-frequency by nature.
    let sw = w.min(128);
    let sh_h = h.min(64);

    let mut coeffs = [[0.0f32; 3]; 9];
    let mut weight_sum = 0.0f32;

    for y in 0..sh_h {
        let v = (y as f32 + 0.5) / sh_h as f32;
        let theta = v * std::f32::consts::PI;
        let sin_theta = theta.sin();
        for x in 0..sw {
            let u = (x as f32 + 0.5) / sw as f32;
            let phi = (u - 0.5) * 2.0 * std::f32::consts::PI;

            let dir = [
                sin_theta * phi.sin(),
                theta.cos(),
                -sin_theta * phi.cos(),
            ];
            let color = sample(dir);
            let basis = sh_basis(dir);
            let weight = sin_theta;

            for (i, b) in basis.iter().enumerate() {
                for c in 0..3 {
                    coeffs[i][c] += color[c] * b * weight;
                }
            }
            weight_sum += weight;
        }
    }

    if weight_sum > 0.0 {
        let norm = 4.0 * std::f32::consts::PI / weight_sum;
        for coeff in &mut coeffs {
            for c in coeff.iter_mut() {
                *c *= norm;
            }
        }
    }

    coeffs
}

/// First 9 real SH basis functions evaluated at a unit direction.
fn sh_basis(d: [f32; 3]) -> [f32; 9] {
    let (x, y, z) = (d[0], d[1], d[2]);
    [
        0.282095,
        0.488603 * y,
        0.488603 * z,
        0.488603 * x,
        1.092548 * x * y,
        1.092548 * y * z,
        0.315392 * (3.0 * z * z - 1.0),
        1.092548 * x * z,
        0.546274 * (x * x - y * y),
    ]
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len > 0.0 {
        [v[0] / len, v[1] / len, v[2] / len]
    } else {
        v
    }
}
