use std::path::PathBuf;

/// What kind of file a watch entry points at. The render thread uses this
/// to decide how to react to a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedKind {
    FragShader,
    VertShader,
    Image,
    Cubemap,
}

impl WatchedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WatchedKind::FragShader => "frag",
            WatchedKind::VertShader => "vert",
            WatchedKind::Image => "image",
            WatchedKind::Cubemap => "cubemap",
        }
    }
}

/// One entry of the watched-file list. Index within the list is the id
/// carried by [`AppEvent::FileChanged`].
#[derive(Debug, Clone)]
pub struct WatchFile {
    pub kind: WatchedKind,
    pub path: PathBuf,
}

/// Which transport produced a command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSource {
    Console,
    Osc,
    Startup,
}

/// The single event type consumed by the render thread.
///
/// Watcher, stdin and OSC threads all post onto one channel; the render
/// thread drains it once per loop iteration, which serializes every
/// state mutation and makes ordering explicit.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// A watched file changed on disk (index into the watch-file list).
    FileChanged(usize),
    /// A textual command line arrived from stdin, OSC or startup args.
    Command { line: String, source: CommandSource },
}
