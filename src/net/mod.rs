//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → http server (HTTP/1.1, upgrade detection)
//!     → protocol switch
//!     → ws.rs (WebSocket transport over the upgraded IO)
//!     → socket::attach (bound to a facade)
//!
//! memory.rs provides the same Transport contract without a socket.
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Transports speak a small event vocabulary (transport.rs) so the facade
//!   never sees tungstenite types
//! - Connection IDs are assigned at registration, not at accept

pub mod connection;
pub mod listener;
pub mod memory;
pub mod transport;
pub mod ws;

pub use connection::ConnectionId;
pub use memory::{MemoryPeer, MemoryTransport};
pub use transport::{close_code, CloseFrame, Message, ReadyState, Transport, TransportError, TransportEvent};
pub use ws::WsTransport;
