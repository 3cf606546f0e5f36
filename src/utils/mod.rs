//! Utility modules
//!
//! - `error`: crate error type and result alias
//! - `logging`: tracing setup and progress loggers
//! - `render`: turning tensors into PNG artifacts

pub mod error;
pub mod logging;
pub mod render;

pub use error::{PixelShiftError, Result, ResultExt};
pub use logging::{init_logging, LogConfig, LogLevel};
