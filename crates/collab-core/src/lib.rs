//! Collaboration engine for independently invoked commands.
//!
//! Commands declare what they need and produce in manifests; the engine keeps
//! their artifacts in a shared workspace, resolves dependencies before a
//! command runs, fans out notifications after it stores output, and advises
//! on execution order for a set of commands.

pub mod config;
pub mod engine;
pub mod error;
pub mod io;
pub mod knowledge;
pub mod manifest;
pub mod notify;
pub mod paths;
pub mod recommend;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod store;
pub mod types;
pub mod workspace;

pub use engine::{ArtifactOptions, Engine, StoreOutcome};
pub use error::{CollabError, Result};
