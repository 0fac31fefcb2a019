//! WebSocket ingress: accepts transport sessions and binds them to
//! registry connections.

mod handler;
mod message;

pub use handler::ws_handler;
pub use message::{ClientMessage, ServerMessage};
