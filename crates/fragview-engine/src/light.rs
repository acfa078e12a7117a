use crate::camera::{Mat4, MAT4_IDENTITY};
use crate::texture::TextureHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    Directional,
    Point,
    Spot,
}

/// A light source as the binding pass sees it.
///
/// Position is bound for non-directional lights, direction only for
/// directional/spot ones, falloff only when positive.
#[derive(Debug, Clone)]
pub struct Light {
    pub kind: LightKind,
    pub color: [f32; 3],
    pub intensity: f32,
    pub position: [f32; 3],
    pub direction: [f32; 3],
    pub falloff: f32,
    pub bias_mvp: Mat4,
    pub shadow_map: Option<TextureHandle>,

    /// Set by whoever moves the light, cleared by `Uniforms::unflag_change`.
    pub changed: bool,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            kind: LightKind::Point,
            color: [1.0, 1.0, 1.0],
            intensity: 1.0,
            position: [0.0, 10.0, 6.0],
            direction: [0.0, -1.0, 0.0],
            falloff: 0.0,
            bias_mvp: MAT4_IDENTITY,
            shadow_map: None,
            changed: true,
        }
    }
}
