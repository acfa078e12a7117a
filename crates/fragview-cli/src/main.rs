//! # fragview (single-binary runner)
//!
//! ## Mental model
//! - **Render target**: every frame renders into an offscreen FBO. That
//!   texture is the source of truth for preview, screenshots and capture.
//! - **Preview**: the window only presents the render texture; headless
//!   mode simply skips presentation.
//! - **Uniforms**: one `Uniforms` context owns every registry (native,
//!   user, textures, streams, buffers, lights, camera) and decides per
//!   frame whether anything observable changed. No change, no redraw.
//! - **Commands**: a line-oriented textual protocol (`trigger[,arg]*`)
//!   arrives over stdin and OSC. Both transports post onto one event
//!   channel drained by the render thread, which serializes execution.
//!
//! ## Threads
//! - **Render thread** (main): owns the GL context; drains events,
//!   dispatches commands, reloads shaders, draws.
//! - **Watcher thread**: posts `FileChanged` events for edited files.
//! - **Console thread**: blocking stdin reads, posts `Command` events.
//! - **OSC thread**: UDP listener, posts `Command` events.
//! - **Decode/record workers**: ffmpeg pipes on their own threads.

mod app;
mod assets;
mod commands_setup;
mod console;
mod gl;
mod logging;
mod osc;
mod record;
mod stream;
mod watcher;

use std::collections::BTreeSet;
use std::ffi::CString;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glow::HasContext;

use glutin::config::ConfigTemplateBuilder;
use glutin::context::{ContextApi, ContextAttributesBuilder, NotCurrentContext, Version};
use glutin::display::GetGlDisplay;
use glutin::prelude::*;
use glutin::surface::{SurfaceAttributesBuilder, SwapInterval, WindowSurface};
use glutin_winit::DisplayBuilder;

use raw_window_handle::HasRawWindowHandle;

use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};

use fragview_engine::config::{load_viewer_config, IssueLevel, ViewerConfig};
use fragview_engine::events::{AppEvent, CommandSource, WatchFile, WatchedKind};
use fragview_engine::stream::TextureStream as _;
use fragview_engine::uniforms::Uniforms;

use crate::app::App;
use crate::gl::{create_render_target, try_compile_program, PRESENT_FRAG_SRC, VERT_SRC};
use crate::stream::PipeStream;

const IMAGE_EXTS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];
const VIDEO_EXTS: [&str; 6] = ["mp4", "mov", "avi", "mkv", "webm", "gif"];

#[derive(Default)]
struct CliArgs {
    frag: Option<PathBuf>,
    vert: Option<PathBuf>,
    /// (uniform name or None for auto u_tex<N>, path)
    textures: Vec<(Option<String>, PathBuf)>,
    /// (uniform name or None, ffmpeg source)
    streams: Vec<(Option<String>, String)>,
    cubemap: Option<PathBuf>,

    width: Option<u32>,
    height: Option<u32>,
    x: Option<i32>,
    y: Option<i32>,
    headless: bool,
    fps: Option<f32>,
    osc_port: Option<u16>,
    verbose: bool,
    vflip: bool,

    defines: Vec<(String, Option<String>)>,
    include_dirs: Vec<PathBuf>,
    startup_commands: Vec<String>,
    exit_after_commands: bool,
    log_file: Option<PathBuf>,
    show_help: bool,
}

fn ext_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

fn is_stream_source(s: &str) -> bool {
    if s.starts_with("rtsp://") || s.starts_with("rtmp://") || s.starts_with("http") {
        return true;
    }
    VIDEO_EXTS.contains(&ext_of(Path::new(s)).as_str())
}

fn next_arg(it: &mut impl Iterator<Item = String>, arg: &str, what: &str) -> Option<String> {
    let v = it.next();
    if v.is_none() {
        logw!("INIT", "argument '{arg}' should be followed by {what}; skipping");
    }
    v
}

fn parse_args() -> CliArgs {
    let mut out = CliArgs::default();
    let mut it = std::env::args().skip(1);

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--help" => out.show_help = true,
            "-w" | "--width" => {
                if let Some(v) = next_arg(&mut it, &arg, "<pixels>") {
                    out.width = v.parse().ok();
                }
            }
            "-h" | "--height" => {
                if let Some(v) = next_arg(&mut it, &arg, "<pixels>") {
                    out.height = v.parse().ok();
                }
            }
            "-x" => {
                if let Some(v) = next_arg(&mut it, &arg, "<pixels>") {
                    out.x = v.parse().ok();
                }
            }
            "-y" => {
                if let Some(v) = next_arg(&mut it, &arg, "<pixels>") {
                    out.y = v.parse().ok();
                }
            }
            "--headless" => out.headless = true,
            "--fps" => {
                if let Some(v) = next_arg(&mut it, &arg, "<fps>") {
                    out.fps = v.parse().ok();
                }
            }
            "-p" => {
                if let Some(v) = next_arg(&mut it, &arg, "<osc_port>") {
                    out.osc_port = v.parse().ok();
                }
            }
            "--verbose" => out.verbose = true,
            "-vFlip" => out.vflip = !out.vflip,
            "--video" => {
                if let Some(v) = next_arg(&mut it, &arg, "<device_id>") {
                    out.streams.push((None, format!("/dev/video{v}")));
                }
            }
            "-C" => {
                if let Some(v) = next_arg(&mut it, &arg, "<cubemap_file>") {
                    out.cubemap = Some(PathBuf::from(v));
                }
            }
            "-e" => {
                if let Some(v) = next_arg(&mut it, &arg, "<command>") {
                    out.startup_commands.push(v);
                }
            }
            "-E" => {
                if let Some(v) = next_arg(&mut it, &arg, "<command>") {
                    out.startup_commands.push(v);
                    out.exit_after_commands = true;
                }
            }
            "--log-file" => {
                if let Some(v) = next_arg(&mut it, &arg, "<path>") {
                    out.log_file = Some(PathBuf::from(v));
                }
            }
            _ => {
                if let Some(rest) = arg.strip_prefix("-D") {
                    if !rest.is_empty() {
                        match rest.split_once('=') {
                            Some((k, v)) => out.defines.push((k.to_string(), Some(v.to_string()))),
                            None => out.defines.push((rest.to_string(), None)),
                        }
                        continue;
                    }
                }
                if let Some(rest) = arg.strip_prefix("-I") {
                    if !rest.is_empty() {
                        out.include_dirs.push(PathBuf::from(rest));
                        continue;
                    }
                }
                if let Some(name) = arg.strip_prefix('-') {
                    // "-u_myTex file.png": texture/stream with a custom name
                    if let Some(v) = it.next() {
                        if is_stream_source(&v) {
                            out.streams.push((Some(name.to_string()), v));
                        } else {
                            out.textures.push((Some(name.to_string()), PathBuf::from(v)));
                        }
                    } else {
                        logw!("INIT", "argument '{arg}' should be followed by a file; skipping");
                    }
                    continue;
                }

                // Positional: classify by extension.
                let ext = ext_of(Path::new(&arg));
                if ext == "frag" || ext == "fs" || ext == "glsl" {
                    out.frag = Some(PathBuf::from(arg));
                } else if ext == "vert" || ext == "vs" {
                    out.vert = Some(PathBuf::from(arg));
                } else if IMAGE_EXTS.contains(&ext.as_str()) {
                    out.textures.push((None, PathBuf::from(arg)));
                } else if is_stream_source(&arg) {
                    out.streams.push((None, arg));
                } else {
                    logw!("INIT", "unrecognized argument: {arg}");
                }
            }
        }
    }
    out
}

fn print_usage(executable: &str) {
    eprintln!("fragview {} - console-driven GLSL shader viewer\n", env!("CARGO_PKG_VERSION"));
    eprintln!("A live shader sandbox without a UI: drive it over standard input or OSC.\n");
    eprintln!("Usage:");
    eprintln!("          {executable} <shader>.frag [<shader>.vert] [options]\n");
    eprintln!("Optional arguments:\n");
    eprintln!("      <texture>.(png/jpg/bmp)        # load texture as uniform u_tex<N>");
    eprintln!("      <video>.(mp4/mov/...)|rtsp://  # open a video stream as u_tex<N>");
    eprintln!("      -<uniform_name> <file>         # load a texture/stream with a custom name");
    eprintln!("      --video <device_number>        # open a capture device");
    eprintln!("      -C <environment_map>           # load an env map as cubemap + SH");
    eprintln!("      -vFlip                         # flip textures loaded after this flag");
    eprintln!("      -x/-y <pixels>                 # window position");
    eprintln!("      -w/--width, -h/--height        # window size");
    eprintln!("      --headless                     # render without presenting a window");
    eprintln!("      --fps <fps>                    # cap the frame rate");
    eprintln!("      -I<include_folder>             # add an #include search folder");
    eprintln!("      -D<define>[=<value>]           # add a #define to the shaders");
    eprintln!("      -p <osc_port>                  # open an OSC listening port");
    eprintln!("      -e/-E <command>                # run command at start (-E exits after)");
    eprintln!("      --log-file <path>              # append logs to a file");
    eprintln!("      --verbose                      # verbose logging");
    eprintln!("      --help                         # this message");
}

fn main() {
    let args = parse_args();
    if args.show_help {
        let exe = std::env::args().next().unwrap_or_else(|| "fragview".into());
        print_usage(&exe);
        return;
    }

    let log_file = args.log_file.clone().or_else(|| {
        std::env::var("FRAGVIEW_LOG_FILE").ok().filter(|p| !p.trim().is_empty()).map(PathBuf::from)
    });
    logging::init(log_file);

    // fragview.json (optional) provides defaults; CLI args override.
    let config_path = PathBuf::from("fragview.json");
    let mut cfg = match load_viewer_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            logw!("CONFIG", "{e}; using defaults");
            ViewerConfig::default()
        }
    };
    for issue in cfg.validate() {
        match issue.level {
            IssueLevel::Warn => logw!("CONFIG", "{}: {}", issue.field, issue.message),
            IssueLevel::Error => loge!("CONFIG", "{}: {}", issue.field, issue.message),
        }
    }
    if let Some(w) = args.width {
        cfg.width = w;
    }
    if let Some(h) = args.height {
        cfg.height = h;
    }
    if args.x.is_some() {
        cfg.x = args.x;
    }
    if args.y.is_some() {
        cfg.y = args.y;
    }
    if args.headless {
        cfg.headless = true;
    }
    if let Some(fps) = args.fps {
        cfg.fps = fps as u32;
    }
    if let Some(port) = args.osc_port {
        cfg.osc_port = port;
    }
    if args.verbose {
        cfg.verbose = true;
    }
    if cfg.width == 0 || cfg.height == 0 {
        cfg.width = 512;
        cfg.height = 512;
    }

    // ---------------------------------------------------------------
    // Window + GL context
    // ---------------------------------------------------------------
    let event_loop = EventLoop::new().expect("EventLoop::new failed");

    let mut window_builder = winit::window::WindowBuilder::new()
        .with_title("fragview")
        .with_visible(!cfg.headless)
        .with_inner_size(PhysicalSize::new(cfg.width, cfg.height));
    if let (Some(x), Some(y)) = (cfg.x, cfg.y) {
        window_builder = window_builder.with_position(PhysicalPosition::new(x, y));
    }

    let template = ConfigTemplateBuilder::new().with_alpha_size(8).with_depth_size(0);
    let display_builder = DisplayBuilder::new().with_window_builder(Some(window_builder));

    let (window, gl_config) = display_builder
        .build(&event_loop, template, |configs| {
            configs
                .reduce(|a, b| if a.num_samples() > b.num_samples() { a } else { b })
                .unwrap()
        })
        .expect("Failed to build display");
    let window = window.expect("No window created");

    let raw_window_handle = window.raw_window_handle();
    let gl_display = gl_config.display();

    let context_attributes = ContextAttributesBuilder::new()
        .with_context_api(ContextApi::OpenGl(Some(Version::new(3, 3))))
        .build(Some(raw_window_handle));

    let not_current_gl_context: NotCurrentContext = unsafe {
        gl_display
            .create_context(&gl_config, &context_attributes)
            .expect("create_context failed")
    };

    let attrs = SurfaceAttributesBuilder::<WindowSurface>::new().build(
        raw_window_handle,
        NonZeroU32::new(cfg.width.max(1)).unwrap(),
        NonZeroU32::new(cfg.height.max(1)).unwrap(),
    );

    let gl_surface = unsafe {
        gl_display
            .create_window_surface(&gl_config, &attrs)
            .expect("create_window_surface failed")
    };

    let gl_context = not_current_gl_context
        .make_current(&gl_surface)
        .expect("make_current failed");

    gl_surface
        .set_swap_interval(&gl_context, SwapInterval::Wait(NonZeroU32::new(1).unwrap()))
        .ok();

    let gl = Arc::new(unsafe {
        glow::Context::from_loader_function(|s| {
            gl_display.get_proc_address(&CString::new(s).unwrap()) as *const _
        })
    });

    let size = window.inner_size();
    let (win_w, win_h) = (size.width.max(1) as i32, size.height.max(1) as i32);

    let vao = unsafe { gl.create_vertex_array().expect("create_vertex_array failed") };
    let rt = unsafe { create_render_target(&gl, win_w, win_h).expect("render target") };
    let present_program =
        unsafe { try_compile_program(&gl, VERT_SRC, PRESENT_FRAG_SRC).expect("present shader") };

    let (screen_w, screen_h) = window
        .current_monitor()
        .map(|m| (m.size().width as i32, m.size().height as i32))
        .unwrap_or((win_w, win_h));

    // ---------------------------------------------------------------
    // File list + uniform context
    // ---------------------------------------------------------------
    let mut files: Vec<WatchFile> = Vec::new();
    let mut file_uniform_names = std::collections::HashMap::new();

    let frag_index = args.frag.as_ref().map(|p| {
        files.push(WatchFile { kind: WatchedKind::FragShader, path: p.clone() });
        files.len() - 1
    });
    let vert_index = args.vert.as_ref().map(|p| {
        files.push(WatchFile { kind: WatchedKind::VertShader, path: p.clone() });
        files.len() - 1
    });

    let mut uniforms = Uniforms::new();
    let mut tex_counter = 0usize;
    let auto_name = |counter: &mut usize| {
        let name = format!("u_tex{counter}");
        *counter += 1;
        name
    };

    for (name, path) in &args.textures {
        let name = name.clone().unwrap_or_else(|| auto_name(&mut tex_counter));
        match assets::load_texture(&gl, path, args.vflip) {
            Ok(handle) => {
                logi!("INIT", "texture {name}: {} ({}x{})", path.display(), handle.width, handle.height);
                uniforms.textures.insert(name.clone(), handle);
                files.push(WatchFile { kind: WatchedKind::Image, path: path.clone() });
                file_uniform_names.insert(files.len() - 1, name);
            }
            Err(e) => loge!("INIT", "{e}"),
        }
    }

    for (name, source) in &args.streams {
        let name = name.clone().unwrap_or_else(|| auto_name(&mut tex_counter));
        match PipeStream::open(gl.clone(), source, cfg.stream_prev_frames.min(16)) {
            Ok(stream) => {
                logi!(
                    "STREAM",
                    "{name}: {source} ({}x{} @ {:.1} fps)",
                    stream.width(),
                    stream.height(),
                    stream.fps()
                );
                uniforms.streams.insert(name, Box::new(stream));
            }
            Err(e) => loge!("STREAM", "{e}"),
        }
    }

    if let Some(path) = &args.cubemap {
        match assets::load_cubemap(&gl, path) {
            Ok(cubemap) => {
                logi!("INIT", "cubemap: {}", path.display());
                uniforms.active_cubemap = Some(cubemap);
                files.push(WatchFile { kind: WatchedKind::Cubemap, path: path.clone() });
            }
            Err(e) => loge!("INIT", "{e}"),
        }
    }

    let mut app = App {
        gl: gl.clone(),
        uniforms,
        files,
        frag_index,
        vert_index,
        file_uniform_names,
        include_dirs: args.include_dirs.clone(),
        defines: args.defines.clone(),
        vflip_textures: args.vflip,
        frag_src: String::new(),
        vert_src: String::new(),
        program: None,
        buffer_programs: Vec::new(),
        double_buffer_programs: Vec::new(),
        pyramid_down_program: None,
        pyramid_up_program: None,
        present_program,
        vao,
        rt,
        catalog: Vec::new(),
        keep_running: true,
        terminate: false,
        full_fps: false,
        fps_target: cfg.fps as f32,
        verbose: cfg.verbose,
        headless: cfg.headless,
        screenshot_file: None,
        record: None,
        start_time: Instant::now(),
        time_offset: 0.0,
        last_frame_at: Instant::now(),
        measured_fps: 0.0,
        win_width: win_w,
        win_height: win_h,
        pixel_density: window.scale_factor() as f32,
        screen_width: screen_w,
        screen_height: screen_h,
    };

    logi!("INIT", "fragview {}", env!("CARGO_PKG_VERSION"));
    if app.verbose {
        unsafe {
            logi!("INIT", "renderer: {}", gl.get_parameter_string(glow::RENDERER));
            logi!("INIT", "GL version: {}", gl.get_parameter_string(glow::VERSION));
        }
    }

    app.reload_shaders();

    // ---------------------------------------------------------------
    // Command registry + input threads
    // ---------------------------------------------------------------
    let mut registry = commands_setup::build();
    app.catalog = registry.catalog();

    let (tx, rx) = crossbeam_channel::unbounded::<AppEvent>();

    let _watcher = match watcher::FileWatcher::start(&app.files, tx.clone(), cfg.watch_interval_ms) {
        Ok(w) => Some(w),
        Err(e) => {
            logw!("WATCH", "file watching disabled: {e}");
            None
        }
    };

    console::spawn(tx.clone());

    let _osc = if cfg.osc_port > 0 { osc::listen(cfg.osc_port, tx.clone()) } else { None };

    for line in &args.startup_commands {
        let _ = tx.send(AppEvent::Command { line: clean_startup_line(line), source: CommandSource::Startup });
    }
    if args.exit_after_commands {
        let _ = tx.send(AppEvent::Command { line: "quit".into(), source: CommandSource::Startup });
    }

    // ---------------------------------------------------------------
    // Render loop
    // ---------------------------------------------------------------
    event_loop
        .run(move |event, target| {
            target.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => {
                        app.keep_running = false;
                        target.exit();
                    }

                    WindowEvent::KeyboardInput { event, .. } => {
                        if event.state.is_pressed() {
                            if let PhysicalKey::Code(KeyCode::KeyQ | KeyCode::Escape) =
                                event.physical_key
                            {
                                app.keep_running = false;
                            }
                        }
                    }

                    WindowEvent::CursorMoved { position, .. } => {
                        app.uniforms.frame.mouse =
                            [position.x as f32, app.win_height as f32 - position.y as f32];
                    }

                    WindowEvent::Resized(new_size) => {
                        let (w, h) = (new_size.width.max(1), new_size.height.max(1));
                        gl_surface.resize(
                            &gl_context,
                            NonZeroU32::new(w).unwrap(),
                            NonZeroU32::new(h).unwrap(),
                        );
                        app.resize(w as i32, h as i32);
                    }

                    WindowEvent::RedrawRequested => {
                        let frame_started = Instant::now();

                        // Drain the event queue: commands in arrival
                        // order, file changes deduplicated (editor save
                        // bursts coalesce into one reload).
                        let mut changed: BTreeSet<usize> = BTreeSet::new();
                        while let Ok(app_event) = rx.try_recv() {
                            match app_event {
                                AppEvent::FileChanged(index) => {
                                    changed.insert(index);
                                }
                                AppEvent::Command { line, source } => {
                                    commands_setup::run_line(&mut registry, &mut app, &line, source);
                                }
                            }
                        }
                        for index in changed {
                            app.on_file_changed(index);
                        }

                        app.uniforms.update_streams();

                        let recording = app.record.is_some();
                        let draw = recording
                            || app.full_fps
                            || app.screenshot_file.is_some()
                            || app.uniforms.have_change();

                        if draw {
                            app.update_clock();
                            app.render();
                            app.uniforms.unflag_change();

                            if !app.headless {
                                let _ = gl_surface.swap_buffers(&gl_context);
                            }

                            // Frame-rate cap (vsync already paces the
                            // presented path; this matters headless and
                            // with an explicit --fps).
                            if app.fps_target > 0.0 && !recording {
                                let budget = Duration::from_secs_f32(1.0 / app.fps_target);
                                let elapsed = frame_started.elapsed();
                                if elapsed < budget {
                                    std::thread::sleep(budget - elapsed);
                                }
                            }
                        } else {
                            // Provably identical output: sleep instead
                            // of redrawing.
                            let rest = if app.fps_target > 0.0 {
                                Duration::from_secs_f32(1.0 / app.fps_target)
                            } else {
                                Duration::from_millis(16)
                            };
                            std::thread::sleep(rest);
                        }

                        if app.terminate && app.screenshot_file.is_none() && app.record.is_none() {
                            app.keep_running = false;
                        }
                        if !app.keep_running {
                            target.exit();
                        }
                    }

                    _ => {}
                },

                Event::AboutToWait => {
                    window.request_redraw();
                }

                _ => {}
            }
        })
        .expect("Event loop failed");
}

/// Startup commands may arrive shell-quoted; strip one layer of quotes.
fn clean_startup_line(line: &str) -> String {
    line.trim().trim_matches('"').trim_matches('\'').to_string()
}
