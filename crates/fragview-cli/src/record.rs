//! Screenshots and offline capture (FFmpeg worker).
//!
//! Capture does not chase the wall clock: while a session is active the
//! render loop steps `u_time` deterministically from `from` to `to` at
//! the requested fps, reads back every frame and hands it to a writer
//! thread feeding an FFmpeg process over stdin. The channel is bounded
//! so memory stays flat; sends block, which simply paces rendering to
//! the encoder. Extension picks the output: `.mp4` encodes video,
//! anything else becomes a numbered PNG sequence.

use std::io::Write as _;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::thread::JoinHandle;

use anyhow::{anyhow, Context as _};

/// Save one RGBA readback (bottom-up GL rows) as a PNG.
pub fn save_screenshot(path: &Path, w: u32, h: u32, pixels: &[u8]) -> anyhow::Result<()> {
    let flipped = vflip(pixels, w as usize, h as usize);
    image::save_buffer(path, &flipped, w, h, image::ColorType::Rgba8)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn vflip(pixels: &[u8], w: usize, h: usize) -> Vec<u8> {
    let stride = w * 4;
    let mut out = Vec::with_capacity(pixels.len());
    for row in (0..h).rev() {
        out.extend_from_slice(&pixels[row * stride..(row + 1) * stride]);
    }
    out
}

/// One offline capture session driving the render loop's clock.
pub struct RecordSession {
    from: f32,
    fps: f32,
    frame: usize,
    total: usize,

    tx: Option<SyncSender<Vec<u8>>>,
    join: Option<JoinHandle<()>>,
    child: Option<Child>,
}

impl RecordSession {
    /// `target` is an output file (`out.mp4`) or a PNG sequence pattern;
    /// a bare name without `%` gets `_%05d.png` appended.
    pub fn start(
        target: &str,
        from: f32,
        to: f32,
        fps: f32,
        width: i32,
        height: i32,
    ) -> anyhow::Result<Self> {
        if to <= from {
            return Err(anyhow!("record range must be ascending (got {from}..{to})"));
        }
        if fps <= 0.0 {
            return Err(anyhow!("fps must be positive"));
        }

        let total = ((to - from) * fps).ceil() as usize;
        let (mut child, stdin) = spawn_ffmpeg(target, fps, width, height)?;

        let (tx, rx) = sync_channel::<Vec<u8>>(3);
        let join = std::thread::Builder::new()
            .name("record".to_string())
            .spawn(move || writer_thread(rx, stdin))
            .expect("spawn record thread");

        // Drain encoder chatter so the pipe never backs up.
        if let Some(err) = child.stderr.take() {
            let _ = std::thread::Builder::new().name("record-err".to_string()).spawn(move || {
                use std::io::Read;
                let mut sink = err;
                let mut buf = [0u8; 1024];
                while matches!(sink.read(&mut buf), Ok(n) if n > 0) {}
            });
        }

        Ok(Self {
            from,
            fps,
            frame: 0,
            total,
            tx: Some(tx),
            join: Some(join),
            child: Some(child),
        })
    }

    /// The shader time of the frame about to be rendered.
    pub fn frame_time(&self) -> f32 {
        self.from + self.frame as f32 / self.fps
    }

    pub fn done(&self) -> bool {
        self.frame >= self.total
    }

    pub fn progress(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.frame as f32 / self.total as f32
        }
    }

    /// Submit the readback of the frame just rendered. Blocking: the
    /// session is offline-paced, every frame must reach the encoder.
    pub fn push_frame(&mut self, width: usize, height: usize, pixels: &[u8]) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(vflip(pixels, width, height));
        }
        self.frame += 1;
    }

    /// Close the pipe and wait for FFmpeg to finalize the file.
    pub fn finish(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.tx.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        if let Some(mut child) = self.child.take() {
            if child.wait().is_err() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

impl Drop for RecordSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn writer_thread(rx: std::sync::mpsc::Receiver<Vec<u8>>, mut stdin: ChildStdin) {
    while let Ok(frame) = rx.recv() {
        if stdin.write_all(&frame).is_err() {
            break;
        }
    }
    // Closing stdin signals ffmpeg to finalize the output.
    drop(stdin);
}

fn spawn_ffmpeg(
    target: &str,
    fps: f32,
    width: i32,
    height: i32,
) -> anyhow::Result<(Child, ChildStdin)> {
    let size = format!("{}x{}", width.max(2), height.max(2));
    let fps_s = format!("{fps}");

    let mut cmd = Command::new("ffmpeg");
    cmd.stdin(Stdio::piped()).stdout(Stdio::null()).stderr(Stdio::piped());

    // raw RGBA frames in
    cmd.args([
        "-y", "-f", "rawvideo", "-pix_fmt", "rgba", "-video_size", &size, "-r", &fps_s, "-i",
        "pipe:0", "-an",
    ]);

    let lower = target.to_lowercase();
    if lower.ends_with(".mp4") {
        cmd.args([
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-crf",
            "18",
            "-pix_fmt",
            "yuv420p",
            target,
        ]);
    } else {
        // PNG sequence; accept an explicit %-pattern or derive one.
        let pattern = if target.contains('%') {
            target.to_string()
        } else {
            let stem = target.trim_end_matches(".png");
            format!("{stem}_%05d.png")
        };
        cmd.args(["-f", "image2", &pattern]);
    }

    let mut child = cmd.spawn().context("spawning ffmpeg (is it on PATH?)")?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("ffmpeg stdin unavailable"))?;
    Ok((child, stdin))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vflip_reverses_row_order() {
        // 2x2 RGBA, distinct first byte per row.
        let pixels = [
            1, 0, 0, 255, 1, 0, 0, 255, //
            2, 0, 0, 255, 2, 0, 0, 255,
        ];
        let flipped = vflip(&pixels, 2, 2);
        assert_eq!(flipped[0], 2);
        assert_eq!(flipped[8], 1);
    }

    #[test]
    fn session_math_counts_frames() {
        // Pure arithmetic; no ffmpeg involved.
        let total = ((2.0f32 - 0.5) * 24.0).ceil() as usize;
        assert_eq!(total, 36);
    }
}
