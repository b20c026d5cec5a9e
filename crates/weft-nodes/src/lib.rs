//! Built-in node kinds and the registry that wires them to shared services.

pub mod kinds;
pub mod registry;
pub mod services;

pub use registry::builtin_registry;
pub use services::{Provider, Services};
