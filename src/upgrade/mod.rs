//! Upgrade subsystem.
//!
//! # Data Flow
//! ```text
//! Raw upgrade event (raw.rs: HyperUpgrade or any RawUpgrade)
//!     → correlator.rs: admission pre-check
//!     → context.rs: UpgradeContext installed (extensions + task-local)
//!     → pipeline (axum Router)
//!           handler calls upgrade() / Upgrade extractor
//!           → FacadeSocket + UpgradeMarker, binding recorded
//!     → marker.rs: UpgradeVerdict
//!           Ordinary → response written verbatim
//!           Upgrade  → switch → socket::attach → manager.register
//! ```
//!
//! # Design Decisions
//! - The marker is a tagged 101 response, recognized by its extension
//! - Bindings for markers that never come back are discarded with the context

pub mod context;
pub mod correlator;
pub mod error;
pub mod handshake;
pub mod marker;
pub mod raw;

pub use context::{upgrade, upgrade_with, Upgrade, UpgradeContext, UpgradeRequired};
pub use correlator::{remote_key, Correlator, UpgradeOutcome};
pub use error::UpgradeError;
pub use handshake::{accept_key, is_upgrade_request, switching_protocols};
pub use marker::{is_upgrade, MarkerId, UpgradeMarker, UpgradeVerdict};
pub use raw::{HyperUpgrade, RawUpgrade};
