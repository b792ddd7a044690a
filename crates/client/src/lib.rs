//! Realtime client for cozy instances.
//!
//! One WebSocket per [`RealtimeClient`], shared by every subscription:
//!
//! ```text
//!  subscribe / unsubscribe
//!            │
//!            ▼
//! ┌──────────────────────┐  replay on open  ┌───────────────────┐
//! │ SubscriptionRegistry │◀─────────────────│ ConnectionManager │◀── socket
//! └──────────────────────┘                  └───────────────────┘
//!            ▲                                        │ text frames
//!            │ handle(key, event, doc)                ▼
//!            └───────────────────────────────── MessageRouter ──▶ errors()
//! ```
//!
//! The socket authenticates with the application token, re-sends one
//! `SUBSCRIBE` frame per live key after every (re)connection and reconnects
//! with exponential backoff after unexpected closes.

pub mod client;
pub mod config;
pub mod connection;
pub mod registry;
pub mod router;
pub mod validator;

pub use client::{Change, Listener, RealtimeClient};
pub use config::{ConnectionOptions, Endpoint, RealtimeConfig};
pub use connection::{ConnectionState, ReconnectConfig};
pub use registry::{Handler, SubscriptionRegistry};
pub use router::{Inbound, MessageRouter};

pub use cozy_realtime_shared::{
    ClientFrame, EntityRef, EventName, RealtimeError, Result, ServerError, SUBPROTOCOL,
};
