use crate::texture::TextureHandle;

/// A texture source fed by ongoing decode (video file, capture device,
/// network URL) rather than a static image.
///
/// The engine never blocks on a stream: `update` polls for the latest
/// decoded frame and a stale frame is an expected state, not an error.
/// The previous-frame ring is owned by the stream; index 0 is always the
/// most recent prior frame and `prev_textures_total` never exceeds the
/// number of frames actually retained.
pub trait TextureStream {
    /// Latest decoded frame.
    fn texture(&self) -> TextureHandle;

    /// Previous frame `index` steps back (0 = most recent prior frame).
    fn prev_texture(&self, index: usize) -> Option<TextureHandle>;

    /// How many previous frames are currently available.
    fn prev_textures_total(&self) -> usize;

    /// Playback position in seconds.
    fn time(&self) -> f32;

    fn fps(&self) -> f32;

    /// Total duration in seconds (0 for live sources).
    fn duration(&self) -> f32;

    fn current_frame(&self) -> usize;

    /// Total frame count (0 for live sources).
    fn total_frames(&self) -> usize;

    /// Poll for a newer frame. Returns true when a new frame was adopted.
    fn update(&mut self) -> bool;

    /// Rewind playback to the first frame.
    fn restart(&mut self);
}
