//! The command table of the textual protocol.
//!
//! Every command answers on stdout, which is the protocol reply
//! channel for both stdin and OSC controllers. Handlers run on the
//! render thread between frames, so they can mutate `App` freely.

use fragview_engine::commands::{split_line, to_float, to_int, Command, CommandRegistry};
use fragview_engine::events::CommandSource;

use crate::app::App;
use crate::record::RecordSession;
use crate::{loge, logi};

const ABOUT: &str = concat!(
    "fragview ",
    env!("CARGO_PKG_VERSION"),
    " - console-driven GLSL shader viewer"
);

pub fn build() -> CommandRegistry<App> {
    let mut reg: CommandRegistry<App> = CommandRegistry::new();

    reg.push(Command::new(
        "help",
        "help[,<command>]",
        "print help for one or all commands",
        |app: &mut App, line| {
            if line == "help" {
                println!("Use:\n        help,<one_of_the_following_commands>");
                let mut column = 0;
                for c in &app.catalog {
                    if c.trigger == "help" {
                        continue;
                    }
                    if column % 4 == 0 {
                        println!();
                    }
                    print!("{:<16} ", c.trigger);
                    column += 1;
                }
                println!();
                return true;
            }
            let values = split_line(line);
            if values.len() == 2 {
                for c in &app.catalog {
                    if c.trigger == values[1] {
                        println!("{:<28} {}", c.usage, c.description);
                    }
                }
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "version",
        "version",
        "return fragview version",
        |_: &mut App, line| {
            if line == "version" {
                println!("{}", env!("CARGO_PKG_VERSION"));
                return true;
            }
            false
        },
    ));

    reg.push(Command::new("about", "about", "about fragview", |_: &mut App, line| {
        if line == "about" {
            println!("{ABOUT}");
            return true;
        }
        false
    }));

    reg.push(Command::new(
        "window_width",
        "window_width",
        "return the width of the window",
        |app: &mut App, line| {
            if line == "window_width" {
                println!("{}", app.win_width);
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "window_height",
        "window_height",
        "return the height of the window",
        |app: &mut App, line| {
            if line == "window_height" {
                println!("{}", app.win_height);
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "pixel_density",
        "pixel_density",
        "return the pixel density",
        |app: &mut App, line| {
            if line == "pixel_density" {
                println!("{}", app.pixel_density);
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "screen_size",
        "screen_size",
        "return the screen size",
        |app: &mut App, line| {
            if line == "screen_size" {
                println!("{},{}", app.screen_width, app.screen_height);
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "viewport",
        "viewport",
        "return the viewport size",
        |app: &mut App, line| {
            if line == "viewport" {
                println!("0,0,{},{}", app.rt.w, app.rt.h);
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "mouse",
        "mouse",
        "return the mouse position",
        |app: &mut App, line| {
            if line == "mouse" {
                let m = app.uniforms.frame.mouse;
                println!("{},{}", m[0], m[1]);
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "fps",
        "fps[,<target>]",
        "return or set the frames per second",
        |app: &mut App, line| {
            let values = split_line(line);
            if values[0] != "fps" {
                return false;
            }
            if values.len() == 2 {
                app.fps_target = to_float(values[1]);
                return true;
            }
            println!("{:.6}", app.measured_fps);
            true
        },
    ));

    reg.push(Command::new(
        "delta",
        "delta",
        "return u_delta, the secs between frames",
        |app: &mut App, line| {
            if line == "delta" {
                println!("{:.6}", app.uniforms.frame.delta);
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "date",
        "date",
        "return u_date as YYYY, M, D and secs",
        |app: &mut App, line| {
            if line == "date" {
                let d = app.uniforms.frame.date;
                println!("{},{},{},{}", d[0], d[1], d[2], d[3]);
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "time",
        "time[,<sec>]",
        "return or set u_time",
        |app: &mut App, line| {
            let values = split_line(line);
            if values[0] != "time" {
                return false;
            }
            if values.len() == 2 {
                let target = to_float(values[1]);
                let elapsed = app.last_frame_at.duration_since(app.start_time).as_secs_f32();
                app.time_offset = target - elapsed;
                app.uniforms.flag_change();
                return true;
            }
            println!("{:.6}", app.uniforms.frame.time);
            true
        },
    ));

    reg.push(Command::new(
        "files",
        "files",
        "return a list of watched files",
        |app: &mut App, line| {
            if line == "files" {
                for (i, f) in app.files.iter().enumerate() {
                    println!("{i:>2},{:>8},{}", f.kind.as_str(), f.path.display());
                }
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "buffers",
        "buffers",
        "return the list of buffer uniforms",
        |app: &mut App, line| {
            if line == "buffers" {
                print!("{}", app.uniforms.buffers_summary());
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "defines",
        "defines",
        "return the list of active defines",
        |app: &mut App, line| {
            if line == "defines" {
                print!("{}", app.defines_summary());
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "define",
        "define,<KEYWORD>[,<VALUE>]",
        "add a define to the shader",
        |app: &mut App, line| {
            let values = split_line(line);
            let changed = match values.len() {
                // "define,KEY VALUE" (space-separated pair in one token)
                2 => {
                    let pair: Vec<&str> = values[1].splitn(2, ' ').collect();
                    if pair.len() == 2 {
                        app.add_define(pair[0], Some(pair[1]));
                    } else {
                        app.add_define(pair[0], None);
                    }
                    true
                }
                3 => {
                    app.add_define(values[1], Some(values[2]));
                    true
                }
                _ => false,
            };
            if changed {
                app.reload_shaders();
            }
            changed
        },
    ));

    reg.push(Command::new(
        "undefine",
        "undefine,<KEYWORD>",
        "remove a define from the shader",
        |app: &mut App, line| {
            let values = split_line(line);
            if values.len() == 2 {
                app.del_define(values[1]);
                app.reload_shaders();
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "uniforms",
        "uniforms[,all|,csv]",
        "return the defined uniforms and the active native ones",
        |app: &mut App, line| match line {
            "uniforms" => {
                print!("{}", app.uniforms.defined_uniforms(false));
                print!("{}", app.uniforms.available_uniforms(false));
                true
            }
            "uniforms,all" => {
                print!("{}", app.uniforms.available_uniforms(true));
                true
            }
            "uniforms,csv" => {
                print!("{}", app.uniforms.defined_uniforms(true));
                true
            }
            _ => false,
        },
    ));

    reg.push(Command::new(
        "streams",
        "streams",
        "return the list of streams",
        |app: &mut App, line| {
            if line == "streams" {
                for (name, s) in &app.uniforms.streams {
                    println!(
                        "{name},{:.3},{:.3},{:.1},{},{}",
                        s.time(),
                        s.duration(),
                        s.fps(),
                        s.current_frame(),
                        s.total_frames()
                    );
                }
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "restart",
        "restart",
        "restart all streams from their first frame",
        |app: &mut App, line| {
            if line == "restart" {
                app.uniforms.restart_streams();
                app.uniforms.flag_change();
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "reload",
        "reload[,<filename>]",
        "reload one or all files",
        |app: &mut App, line| {
            if line == "reload" || line == "reload,all" {
                for i in 0..app.files.len() {
                    app.on_file_changed(i);
                }
                return true;
            }
            let values = split_line(line);
            if values.len() == 2 {
                if let Some(i) = app.files.iter().position(|f| f.path.to_string_lossy() == values[1]) {
                    app.on_file_changed(i);
                    return true;
                }
            }
            false
        },
    ));

    reg.push(Command::new(
        "frag",
        "frag[,<filename>|,<line_number>]",
        "return or save the fragment shader source",
        |app: &mut App, line| {
            let src = app.frag_src.clone();
            source_command("frag", &src, line)
        },
    ));

    reg.push(Command::new(
        "vert",
        "vert[,<filename>|,<line_number>]",
        "return or save the vertex shader source",
        |app: &mut App, line| {
            let src = app.vert_src.clone();
            source_command("vert", &src, line)
        },
    ));

    reg.push(Command::new(
        "update",
        "update",
        "force all uniforms to be updated",
        |app: &mut App, line| {
            if line == "update" {
                app.uniforms.flag_change();
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "wait",
        "wait,<seconds>",
        "wait before executing the next command",
        |_: &mut App, line| {
            let values = split_line(line);
            if values.len() == 2 {
                let amount = to_float(values[1]);
                let duration = match values[0] {
                    "wait_sec" => std::time::Duration::from_secs(to_int(values[1]).max(0) as u64),
                    "wait_ms" => std::time::Duration::from_millis(to_int(values[1]).max(0) as u64),
                    "wait_us" => std::time::Duration::from_micros(to_int(values[1]).max(0) as u64),
                    _ => std::time::Duration::from_secs_f32(amount.max(0.0)),
                };
                std::thread::sleep(duration);
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "fullFps",
        "fullFps[,on|off]",
        "render at full speed even without changes",
        |app: &mut App, line| {
            if line == "fullFps" {
                println!("{}", if app.full_fps { "on" } else { "off" });
                return true;
            }
            let values = split_line(line);
            if values.len() == 2 {
                app.full_fps = values[1] == "on";
                app.fps_target = 0.0;
            }
            false
        },
    ));

    reg.push(Command::new(
        "camera_path",
        "camera_path,<file>",
        "load a camera path file",
        |app: &mut App, line| {
            let values = split_line(line);
            if values.len() == 2 {
                match app.uniforms.add_camera_path(std::path::Path::new(values[1])) {
                    Ok(frames) => println!("// Added {frames} camera frames"),
                    Err(e) => loge!("CONSOLE", "{e}"),
                }
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "screenshot",
        "screenshot,<filename>",
        "save a screenshot to a file",
        |app: &mut App, line| {
            let values = split_line(line);
            if values.len() == 2 {
                app.screenshot_file = Some(std::path::PathBuf::from(values[1]));
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "sequence",
        "sequence,<from_sec>,<to_sec>[,<fps>]",
        "save a PNG sequence between two times",
        |app: &mut App, line| {
            let values = split_line(line);
            if values.len() >= 3 {
                let mut from = to_float(values[1]);
                let to = to_float(values[2]);
                let fps = values.get(3).map(|v| to_float(v)).unwrap_or(24.0);
                if from >= to {
                    from = 0.0;
                }
                start_capture(app, "%05d.png", from, to, fps);
                return true;
            }
            false
        },
    ));

    reg.push(Command::new(
        "record",
        "record,<file>,<A>,<B>[,<fps>]",
        "record a video from second A to second B",
        |app: &mut App, line| {
            let values = split_line(line);
            if values.len() >= 4 {
                let target = values[1].to_string();
                let mut from = to_float(values[2]);
                let to = to_float(values[3]);
                let fps = values.get(4).map(|v| to_float(v)).unwrap_or(24.0);
                if from >= to {
                    from = 0.0;
                }
                start_capture(app, &target, from, to, fps);
                return true;
            }
            false
        },
    ));

    reg.push(Command::new("q", "q", "close fragview", |app: &mut App, line| {
        if line == "q" {
            app.keep_running = false;
            return true;
        }
        false
    }));

    // Unlike `q`, `quit`/`exit` let pending screenshot/capture work
    // flush before the loop stops.
    reg.push(Command::new("quit", "quit", "close fragview", |app: &mut App, line| {
        if line == "quit" {
            app.terminate = true;
            return true;
        }
        false
    }));

    reg.push(Command::new("exit", "exit", "close fragview", |app: &mut App, line| {
        if line == "exit" {
            app.terminate = true;
            return true;
        }
        false
    }));

    reg
}

/// Shared body of the `frag` / `vert` commands: dump the source, print
/// numbered lines, or write it to a file.
fn source_command(trigger: &str, src: &str, line: &str) -> bool {
    if line == trigger {
        println!("{src}");
        return true;
    }
    let values = split_line(line);
    if values.len() == 2 {
        let arg = values[1];
        if arg.chars().all(|c| c.is_ascii_digit()) && !arg.is_empty() {
            let number = to_int(arg).max(1) as usize;
            if let Some(text) = src.lines().nth(number - 1) {
                println!("{number} {text}");
            }
        } else if let Err(e) = std::fs::write(arg, src) {
            loge!("CONSOLE", "writing {arg}: {e}");
        }
        return true;
    }
    if values.len() > 2 {
        // Several line numbers at once.
        for arg in &values[1..] {
            let number = to_int(arg).max(1) as usize;
            if let Some(text) = src.lines().nth(number - 1) {
                println!("{number} {text}");
            }
        }
        return true;
    }
    false
}

fn start_capture(app: &mut App, target: &str, from: f32, to: f32, fps: f32) {
    if app.record.is_some() {
        loge!("RECORD", "a capture is already running");
        return;
    }
    if from == 0.0 {
        app.uniforms.restart_streams();
    }
    match RecordSession::start(target, from, to, fps, app.rt.w, app.rt.h) {
        Ok(session) => {
            logi!("RECORD", "capturing {target} from {from}s to {to}s at {fps} fps");
            app.record = Some(session);
        }
        Err(e) => loge!("RECORD", "{e}"),
    }
}

/// Dispatch one protocol line: first-match-wins over the registry, then
/// the generic user-uniform assignment fallback.
pub fn run_line(registry: &mut CommandRegistry<App>, app: &mut App, line: &str, source: CommandSource) {
    if app.verbose && source == CommandSource::Osc {
        logi!("OSC", "{line}");
    }
    if !registry.dispatch(app, line) {
        app.uniforms.parse_line(line);
    }
}
