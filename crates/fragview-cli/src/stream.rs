//! Video streams decoded by an external ffmpeg process.
//!
//! Decoding stays out of process: ffmpeg writes raw RGBA frames to a
//! pipe, a reader thread chunks them into a small bounded channel, and
//! the render thread adopts the latest available frame during its
//! per-frame `update` poll. The render thread never blocks on decode;
//! a stale frame is an expected state.
//!
//! A ring of GL textures retains the last N adopted frames so shaders
//! can sample `<name>Prev[i]` for temporal effects.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use anyhow::{anyhow, Context as _};
use crossbeam_channel::{bounded, Receiver};
use glow::HasContext;

use fragview_engine::stream::TextureStream;
use fragview_engine::texture::TextureHandle;

use crate::gl::{create_texture_rgba, tex_id, update_texture_rgba};
use crate::logw;

/// Stream metadata probed up front. Zeroed fields mean "unknown/live".
#[derive(Debug, Clone)]
struct StreamInfo {
    width: i32,
    height: i32,
    fps: f32,
    duration: f32,
    total_frames: usize,
}

pub struct PipeStream {
    gl: Arc<glow::Context>,
    source: String,
    info: StreamInfo,

    /// Frame ring, newest at `head`. Length = retained prev frames + 1.
    textures: Vec<glow::NativeTexture>,
    head: usize,
    frames_adopted: usize,

    rx: Receiver<Vec<u8>>,
    child: Child,
}

impl PipeStream {
    /// Open a video file, capture device or network URL. `prev_frames`
    /// is how many previous frames to retain for `<name>Prev[i]`.
    pub fn open(gl: Arc<glow::Context>, source: &str, prev_frames: usize) -> anyhow::Result<Self> {
        let info = probe(source)?;

        let mut textures = Vec::with_capacity(prev_frames + 1);
        for _ in 0..prev_frames + 1 {
            let tex = unsafe { create_texture_rgba(&gl, info.width, info.height, None)? };
            textures.push(tex);
        }

        let (child, rx) = spawn_decoder(source, &info)?;

        Ok(Self {
            gl,
            source: source.to_string(),
            info,
            textures,
            head: 0,
            frames_adopted: 0,
            rx,
            child,
        })
    }

    pub fn width(&self) -> i32 {
        self.info.width
    }

    pub fn height(&self) -> i32 {
        self.info.height
    }

    fn stop_child(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for PipeStream {
    fn drop(&mut self) {
        self.stop_child();
        for tex in self.textures.drain(..) {
            unsafe { self.gl.delete_texture(tex) };
        }
    }
}

impl TextureStream for PipeStream {
    fn texture(&self) -> TextureHandle {
        TextureHandle::new(
            tex_id(self.textures[self.head]),
            self.info.width as u32,
            self.info.height as u32,
        )
    }

    fn prev_texture(&self, index: usize) -> Option<TextureHandle> {
        if index >= self.prev_textures_total() {
            return None;
        }
        let len = self.textures.len();
        let slot = (self.head + len - 1 - index) % len;
        Some(TextureHandle::new(
            tex_id(self.textures[slot]),
            self.info.width as u32,
            self.info.height as u32,
        ))
    }

    fn prev_textures_total(&self) -> usize {
        // Never report more than was actually decoded and retained.
        (self.textures.len() - 1).min(self.frames_adopted.saturating_sub(1))
    }

    fn time(&self) -> f32 {
        if self.info.fps > 0.0 {
            self.frames_adopted as f32 / self.info.fps
        } else {
            0.0
        }
    }

    fn fps(&self) -> f32 {
        self.info.fps
    }

    fn duration(&self) -> f32 {
        self.info.duration
    }

    fn current_frame(&self) -> usize {
        self.frames_adopted
    }

    fn total_frames(&self) -> usize {
        self.info.total_frames
    }

    fn update(&mut self) -> bool {
        // Adopt only the newest queued frame; anything older is stale.
        let mut newest = None;
        while let Ok(frame) = self.rx.try_recv() {
            newest = Some(frame);
        }

        let Some(frame) = newest else { return false };

        self.head = (self.head + 1) % self.textures.len();
        unsafe {
            update_texture_rgba(
                &self.gl,
                self.textures[self.head],
                self.info.width,
                self.info.height,
                &frame,
            );
        }
        self.frames_adopted += 1;
        true
    }

    fn restart(&mut self) {
        self.stop_child();
        match spawn_decoder(&self.source, &self.info) {
            Ok((child, rx)) => {
                self.child = child;
                self.rx = rx;
                self.head = 0;
                self.frames_adopted = 0;
            }
            Err(e) => logw!("STREAM", "restart of {} failed: {e}", self.source),
        }
    }
}

/// Ask ffprobe for dimensions, frame rate, duration and frame count.
fn probe(source: &str) -> anyhow::Result<StreamInfo> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate,duration,nb_frames",
            "-of",
            "csv=p=0",
            source,
        ])
        .output()
        .context("running ffprobe (is ffmpeg installed?)")?;

    if !output.status.success() {
        return Err(anyhow!(
            "ffprobe failed for {source}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().next().unwrap_or_default();
    let fields: Vec<&str> = line.trim().split(',').collect();
    if fields.len() < 3 {
        return Err(anyhow!("ffprobe returned no video stream for {source}"));
    }

    let width: i32 = fields[0].parse().unwrap_or(0);
    let height: i32 = fields[1].parse().unwrap_or(0);
    if width <= 0 || height <= 0 {
        return Err(anyhow!("{source}: could not determine stream dimensions"));
    }

    Ok(StreamInfo {
        width,
        height,
        fps: parse_rate(fields.get(2).copied().unwrap_or("0")),
        duration: fields.get(3).and_then(|s| s.parse().ok()).unwrap_or(0.0),
        total_frames: fields.get(4).and_then(|s| s.parse().ok()).unwrap_or(0),
    })
}

/// Parse ffprobe rates like "30000/1001" or "25/1".
fn parse_rate(s: &str) -> f32 {
    match s.split_once('/') {
        Some((num, den)) => {
            let num: f32 = num.parse().unwrap_or(0.0);
            let den: f32 = den.parse().unwrap_or(1.0);
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        }
        None => s.parse().unwrap_or(0.0),
    }
}

/// Spawn `ffmpeg` decoding to raw RGBA on stdout plus the reader thread
/// chunking frames into a bounded channel. `-re` paces file playback at
/// its native rate; the channel bound keeps memory flat if the render
/// loop falls behind.
fn spawn_decoder(source: &str, info: &StreamInfo) -> anyhow::Result<(Child, Receiver<Vec<u8>>)> {
    let mut child = Command::new("ffmpeg")
        .args([
            "-v", "error", "-re", "-i", source, "-f", "rawvideo", "-pix_fmt", "rgba", "-an",
            "pipe:1",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .context("spawning ffmpeg (is it on PATH?)")?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("ffmpeg stdout unavailable"))?;

    let frame_bytes = (info.width as usize) * (info.height as usize) * 4;
    let (tx, rx) = bounded::<Vec<u8>>(2);

    let _ = std::thread::Builder::new()
        .name("stream-decode".to_string())
        .spawn(move || {
            loop {
                let mut frame = vec![0u8; frame_bytes];
                if stdout.read_exact(&mut frame).is_err() {
                    break; // EOF or process gone
                }
                if tx.send(frame).is_err() {
                    break; // stream dropped
                }
            }
        });

    Ok((child, rx))
}
