//! JavaScript support for the sandbox document: the QuickJS evaluation
//! engine and the external-script loader.

mod engine;
mod loader;

pub use engine::QuickJsEngine;
pub use loader::{resolve_url, HttpScriptLoader, ScriptLoader};
