//! MirrorKV Daemon - RESP proxy in front of a locally mirrored store

pub mod handler;
pub mod resp;
pub mod server;

pub use handler::CommandHandler;
pub use resp::{Frame, ProtocolError};
pub use server::{bind, serve};
