use std::path::Path;

use serde::Deserialize;

use crate::error::EngineError;

/// Optional `fragview.json` settings file.
///
/// Everything here has a sensible default and unknown fields are ignored,
/// so the file is forward-compatible and entirely optional; command-line
/// arguments override whatever it says.
#[derive(Debug, Clone, Deserialize)]
pub struct ViewerConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default)]
    pub x: Option<i32>,

    #[serde(default)]
    pub y: Option<i32>,

    /// Render into the offscreen target without presenting a window.
    #[serde(default)]
    pub headless: bool,

    /// Target frames per second. 0 means "as fast as vsync allows".
    #[serde(default)]
    pub fps: u32,

    /// File-watch poll interval in milliseconds.
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,

    /// UDP port for the OSC listener. 0 disables OSC.
    #[serde(default)]
    pub osc_port: u16,

    /// How many previous frames each stream retains for `<name>Prev[i]`.
    #[serde(default = "default_stream_prev_frames")]
    pub stream_prev_frames: usize,

    #[serde(default)]
    pub verbose: bool,
}

fn default_width() -> u32 {
    512
}
fn default_height() -> u32 {
    512
}
fn default_watch_interval_ms() -> u64 {
    500
}
fn default_stream_prev_frames() -> usize {
    0
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            x: None,
            y: None,
            headless: false,
            fps: 0,
            watch_interval_ms: default_watch_interval_ms(),
            osc_port: 0,
            stream_prev_frames: default_stream_prev_frames(),
            verbose: false,
        }
    }
}

/// Load `fragview.json`. A missing file is not an error (defaults apply);
/// a malformed one is, so the caller can warn and fall back.
pub fn load_viewer_config(path: &Path) -> Result<ViewerConfig, EngineError> {
    if !path.exists() {
        return Ok(ViewerConfig::default());
    }
    let src = std::fs::read_to_string(path).map_err(|e| EngineError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&src).map_err(|e| EngineError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    Warn,
    Error,
}

/// One validation finding: what is wrong, where it lives, what to do.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub level: IssueLevel,
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    fn warn(field: &str, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warn,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl ViewerConfig {
    /// Report misconfigurations without aborting; everything flagged here
    /// has a safe fallback applied by the caller.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.width == 0 || self.height == 0 {
            issues.push(ValidationIssue::warn(
                "width/height",
                "window size must be positive; falling back to defaults",
            ));
        }
        if self.watch_interval_ms == 0 {
            issues.push(ValidationIssue::warn(
                "watch_interval_ms",
                "0 would spin the watcher; clamping to 50ms",
            ));
        }
        if self.fps > 240 {
            issues.push(ValidationIssue::warn(
                "fps",
                format!("{} fps is above any sane cap; treating as uncapped", self.fps),
            ));
        }
        if self.stream_prev_frames > 16 {
            issues.push(ValidationIssue::warn(
                "stream_prev_frames",
                "more than 16 retained frames costs texture units; clamping to 16",
            ));
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_viewer_config(&dir.path().join("fragview.json")).expect("load");
        assert_eq!(cfg.width, 512);
        assert_eq!(cfg.osc_port, 0);
        assert!(!cfg.headless);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fragview.json");
        let mut f = std::fs::File::create(&path).expect("create");
        write!(f, r#"{{ "osc_port": 8000, "headless": true }}"#).expect("write");

        let cfg = load_viewer_config(&path).expect("load");
        assert_eq!(cfg.osc_port, 8000);
        assert!(cfg.headless);
        assert_eq!(cfg.watch_interval_ms, 500);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fragview.json");
        std::fs::write(&path, "{ not json").expect("write");
        assert!(load_viewer_config(&path).is_err());
    }

    #[test]
    fn validate_flags_zero_watch_interval() {
        let cfg = ViewerConfig {
            watch_interval_ms: 0,
            ..ViewerConfig::default()
        };
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.field == "watch_interval_ms"));
    }
}
