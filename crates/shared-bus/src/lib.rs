//! # Shared Bus - Channel-Addressed Message Bus
//!
//! The transport underneath the state signal protocol. Publishers push opaque
//! byte messages onto named channels; subscribers receive every message
//! published to a channel after they subscribed.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │  Exporter    │                    │  Responder   │
//! │              │ publish(channel)   │              │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │ Message Bus  │          │
//!                  │              │ ─────────┘
//!                  └──────────────┘ subscribe(channel)
//! ```
//!
//! ## Delivery Guarantees
//!
//! - Fire-and-forget: publishing to a channel nobody listens on succeeds
//!   and reaches zero receivers
//! - At-most-once: slow subscribers that fall behind lose messages and are
//!   told so through [`SubscriptionError::Lagged`]
//! - No replay: a subscription only sees messages published after it exists

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use publisher::{BusError, InMemoryMessageBus, MessageBus};
pub use subscriber::{MessageStream, Subscription, SubscriptionError};

/// Maximum messages to buffer per channel before slow subscribers lag.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
