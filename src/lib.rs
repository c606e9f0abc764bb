//! # muckard-events
//!
//! Dual-transport event routing and consumption for the muckard trading
//! platform. Events are either durable facts published to a
//! log-structured stream transport (audit, analytics) or imperative
//! commands published to an acknowledged queue transport (real-time bot
//! control and status), with one router deciding per event type.
//!
//! ## Architecture
//!
//! ```text
//! Producers (any service action)
//!     │
//!     ├── EventRouter (router/) ── event type → transport binding
//!     │       ├── StreamProducer (transport/stream) ── buffered, fire-and-forget
//!     │       └── QueueClient    (transport/queue)  ── lazy connection, durable queues
//!     │
//!     ├── StreamConsumer (consumer/stream) ── poll, filter, auto-commit
//!     ├── QueueConsumer  (consumer/queue)  ── ack/nack, backoff reconnect
//!     │
//!     ├── BotStatusService (service/) ── state transitions + fan-out
//!     └── StatusStore (storage/) ── PostgreSQL or in-memory
//! ```
//!
//! The broker boundaries are trait seams ([`transport::StreamBroker`],
//! [`transport::QueueBroker`]); the in-process implementations in
//! [`transport::memory`] back tests and database-less standalone runs.

pub mod config;
pub mod consumer;
pub mod domain;
pub mod error;
pub mod router;
pub mod service;
pub mod storage;
pub mod transport;
