pub mod error_classifier;
pub mod error_recovery;
pub mod healing_loop;

pub use error_classifier::*;
pub use error_recovery::*;
pub use healing_loop::*;
