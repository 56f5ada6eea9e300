//! Dashboard AI core: gateway client, connection state, chat sessions, and config store.
//!
//! Features that use the gateway go through [`fallback`] so that any failure degrades to
//! locally computed output instead of reaching the UI.

pub mod config;
pub mod connection;
pub mod error;
pub mod fallback;
pub mod gateway;
pub mod session;

pub use config::{is_valid, ConfigStore, GatewayConfig, PartialConfig};
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus};
pub use error::{ErrorKind, ServiceError};
pub use gateway::{ChatOptions, GatewayClient, HealthStatus, Message, Role};
pub use session::{ChatSession, SessionMessage, SessionOptions};
