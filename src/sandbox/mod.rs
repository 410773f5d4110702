//! The sandbox side of the channel: the embedded document and the injection
//! engine that replaces its head/body content on host command.

pub mod document;
pub mod engine;
mod inject;

pub use document::SandboxDocument;
pub use engine::{InjectionEngine, SandboxConfig};
