//! # Chat-Platform Boundary
//!
//! Error surface of the chat-platform client and the adapter that runs its
//! calls under the reliability coordinator.

pub mod errors;
pub mod resilient;

pub use errors::PlatformError;
pub use resilient::{resilient, ReliabilityHandle, ResilientCallWrapper};
