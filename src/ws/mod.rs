//! WebSocket battle stream

pub mod handler;
pub mod protocol;
