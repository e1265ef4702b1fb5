//! # State Signals Test Suite
//!
//! End-to-end sessions between exporters and responders sharing one
//! in-memory bus.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs       # Scripted responders and session helpers
//! └── integration/
//!     ├── handshake.rs  # initialization, registration, initialize_and_wait
//!     ├── rounds.rs     # publish_signal response collection
//!     ├── shutdown.rs   # shutdown semantics and races
//!     └── properties.rs # property-based lifecycle checks
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p signal-tests
//!
//! # By area
//! cargo test -p signal-tests integration::rounds::
//! ```

pub mod integration;
