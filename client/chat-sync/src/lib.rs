//! Real-time chat and notification synchronization for the tuition-center
//! dashboards.
//!
//! The crate keeps a client-side copy of the conversation and the
//! notification feed in step with the backend, over REST plus one live
//! socket:
//!
//! - [`transport`]: the socket, its status, reconnects and the event bus
//! - [`store`]: the ordered, deduplicated conversation
//! - [`services`]: pagination, presence and typing, unread ledger, resync
//! - [`session`]: one user's state, driven by events and commands
//! - [`state`]: shared wiring handed to the UI layer

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod session;
pub mod state;
pub mod storage;
pub mod store;
pub mod transport;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use session::{ChatSession, SessionCommand, SyncUpdate};
pub use state::SyncContext;
