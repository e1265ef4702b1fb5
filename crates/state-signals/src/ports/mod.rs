//! Ports (trait seams) of the protocol.

pub mod handler;

pub use handler::{handler_fn, ChannelHandler, FnHandler, SignalHandler};
