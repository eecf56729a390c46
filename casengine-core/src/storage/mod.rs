//! Storage backends for casengine
//!
//! Provides the local directory engine and the read-only template engine.

pub mod dir_engine;
pub mod local;
pub mod template_engine;

pub use dir_engine::DirEngine;
pub use template_engine::TemplateEngine;
