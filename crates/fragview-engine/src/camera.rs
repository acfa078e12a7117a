/// Column-major 3x3 matrix, plain floats (no math crate in this stack).
pub type Mat3 = [f32; 9];
/// Column-major 4x4 matrix.
pub type Mat4 = [f32; 16];

pub const MAT3_IDENTITY: Mat3 = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
pub const MAT4_IDENTITY: Mat4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Live camera state consumed by the native uniform registry.
///
/// The matrices are maintained by whoever drives the camera (CLI, camera
/// path playback); the engine only reads them and clears `changed` during
/// the per-frame settle pass.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: [f32; 3],
    pub distance: f32,
    pub near_clip: f32,
    pub far_clip: f32,

    pub exposure: f32,
    pub aperture: f32,
    pub shutter_speed: f32,
    pub sensitivity: f32,
    pub ev100: f32,

    pub view_matrix: Mat4,
    pub inverse_view_matrix: Mat4,
    pub projection_matrix: Mat4,
    pub inverse_projection_matrix: Mat4,
    pub normal_matrix: Mat3,

    /// Set by input/animation, cleared by `Uniforms::unflag_change`.
    pub changed: bool,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, -3.0],
            distance: 3.0,
            near_clip: 0.1,
            far_clip: 1000.0,
            exposure: 1.0,
            aperture: 16.0,
            shutter_speed: 1.0 / 125.0,
            sensitivity: 100.0,
            ev100: 14.97,
            view_matrix: MAT4_IDENTITY,
            inverse_view_matrix: MAT4_IDENTITY,
            projection_matrix: MAT4_IDENTITY,
            inverse_projection_matrix: MAT4_IDENTITY,
            normal_matrix: MAT3_IDENTITY,
            changed: true,
        }
    }
}
