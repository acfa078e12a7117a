//! OSC input (UDP).
//!
//! The OSC transport speaks the same textual protocol as stdin: an
//! incoming message `/frag/u_speed 0.5` becomes the command line
//! `frag,u_speed,0.5` and goes onto the shared event queue like any
//! typed line. One parser serves both transports; replies go to stdout.

use std::net::UdpSocket;
use std::time::Duration;

use crossbeam_channel::Sender;
use rosc::{OscPacket, OscType};

use fragview_engine::events::{AppEvent, CommandSource};

use crate::{logi, logw};

pub struct OscHandle {
    stop_tx: crossbeam_channel::Sender<()>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl Drop for OscHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

pub fn listen(port: u16, tx: Sender<AppEvent>) -> Option<OscHandle> {
    let bind = format!("0.0.0.0:{port}");
    let sock = match UdpSocket::bind(&bind) {
        Ok(s) => s,
        Err(e) => {
            logw!("OSC", "failed to bind {bind}: {e}");
            return None;
        }
    };
    let _ = sock.set_nonblocking(true);

    logi!("OSC", "listening for commands on {bind}");

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

    let join = std::thread::Builder::new()
        .name("osc".to_string())
        .spawn(move || {
            let mut buf = [0u8; 2048];
            loop {
                if stop_rx.try_recv().is_ok() {
                    break;
                }

                match sock.recv_from(&mut buf) {
                    Ok((size, _from)) => {
                        let Ok((_rest, packet)) = rosc::decoder::decode_udp(&buf[..size]) else {
                            continue;
                        };
                        handle_packet(packet, &tx);
                    }
                    Err(_) => {
                        // no data
                        std::thread::sleep(Duration::from_millis(2));
                    }
                }
            }
            logi!("OSC", "stopped");
        })
        .expect("spawn osc thread");

    Some(OscHandle { stop_tx, join: Some(join) })
}

fn handle_packet(packet: OscPacket, tx: &Sender<AppEvent>) {
    match packet {
        OscPacket::Message(msg) => {
            let mut line = msg
                .addr
                .split('/')
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(",");

            for arg in &msg.args {
                let token = match arg {
                    OscType::String(s) => s.clone(),
                    OscType::Int(i) => i.to_string(),
                    OscType::Long(l) => l.to_string(),
                    OscType::Float(f) => f.to_string(),
                    OscType::Double(d) => d.to_string(),
                    OscType::Bool(b) => (*b as i32).to_string(),
                    _ => continue,
                };
                line.push(',');
                line.push_str(&token);
            }

            if !line.is_empty() {
                let _ = tx.send(AppEvent::Command { line, source: CommandSource::Osc });
            }
        }
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                handle_packet(inner, tx);
            }
        }
    }
}
