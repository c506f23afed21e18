//! Host-side byte access: sources, the key registry and the engine callbacks.

pub mod bridge;
pub mod registry;
pub mod source;

pub use bridge::{BridgeInput, CallbackBridge};
pub use registry::{SharedSource, SourceRegistry};
pub use source::{ByteSource, Sequential, SourceKey};
