//! Command input over standard input.
//!
//! One thread blocks on `read_line` and forwards every line onto the
//! shared event channel. The thread is detached rather than joined:
//! a blocking stdin read has no portable cancellation, so shutdown just
//! lets process exit reclaim it.

use std::io::{BufRead, Write};

use crossbeam_channel::Sender;

use fragview_engine::events::{AppEvent, CommandSource};

pub fn spawn(tx: Sender<AppEvent>) {
    let _ = std::thread::Builder::new().name("console".to_string()).spawn(move || {
        let stdin = std::io::stdin();
        let mut lines = stdin.lock().lines();

        prompt();
        while let Some(Ok(line)) = lines.next() {
            let line = line.trim().to_string();
            if !line.is_empty()
                && tx
                    .send(AppEvent::Command { line, source: CommandSource::Console })
                    .is_err()
            {
                break;
            }
            prompt();
        }
    });
}

fn prompt() {
    print!("// > ");
    let _ = std::io::stdout().flush();
}
