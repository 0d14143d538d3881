pub mod config;
pub mod context_builder;
pub mod conversation;
pub mod copilot;
pub mod error;
pub mod execution;
pub mod execution_loop;
pub mod generator;
pub mod llm;
pub mod reference_resolver;
pub mod sanitizer;
pub mod schema;
pub mod statement;

pub use config::CopilotConfig;
pub use copilot::Copilot;
pub use error::{CopilotError, Result};
pub use execution_loop::{HealingLoop, HealingOutcome, HealingReport};
