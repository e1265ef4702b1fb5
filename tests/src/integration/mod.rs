//! Cross-component session tests.

mod handshake;
mod properties;
mod rounds;
mod shutdown;
