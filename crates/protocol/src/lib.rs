//! The framed JSON wire protocol between client and server.
//!
//! Every frame is one UTF-8 JSON value per WebSocket message:
//! `{ id, type, payload? }`. The channel is bidirectional and ordered;
//! the server never reorders frames.

mod frame;

pub use frame::*;
