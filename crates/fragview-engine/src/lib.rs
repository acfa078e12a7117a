//! fragview-engine: the GL-free core of fragview.
//!
//! Everything in this crate is plain data + logic: the uniform stores and
//! their change tracking, the shader-binding pass, the command registry,
//! and the stream/buffer registries. The GL context, window, threads and
//! transports live in the CLI crate and talk to this one through the
//! [`uniforms::Shader`] trait and the [`events::AppEvent`] queue.

pub mod buffers;
pub mod camera;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod light;
pub mod stream;
pub mod texture;
pub mod uniforms;
