pub mod config;
pub mod console;
pub mod error;
pub mod state;
pub mod template;
pub mod text;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use console::{Console, MemoryConsole, NullConsole, StdoutConsole};
pub use error::{ErrorCategory, Result, WeftError};
pub use state::State;
pub use text::{SharedText, TextData};
pub use traits::{EmbeddingProvider, LlmClient, NodeContext, NodeKind};
pub use types::*;
