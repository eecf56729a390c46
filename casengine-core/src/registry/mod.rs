pub mod factory;

pub use factory::{EngineBuilder, SUPPORTED_PROTOCOLS, TEMPLATE_PROTOCOL};
