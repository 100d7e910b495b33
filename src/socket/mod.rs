//! Facade socket subsystem.
//!
//! # Data Flow
//! ```text
//! upgrade() ──▶ facade.rs (Connecting, usable immediately)
//!                  │  close() before attach → remembered
//!                  ▼
//! attach.rs ◀── transport handle (after the protocol switch)
//!     → bind once, fire Open, replay deferred close
//!     → forward Text/Binary/Error/Close as SocketEvents
//! ```
//!
//! # Design Decisions
//! - Sending before attachment is a usage error; closing is not
//! - The binding is invisible to the facade's public surface

pub mod attach;
pub mod event;
pub mod facade;

pub use attach::{attach, AttachError};
pub use event::{BinaryType, MessageData, SocketEvent, SocketState};
pub use facade::{FacadeSocket, SocketError, SocketId};
