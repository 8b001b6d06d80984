pub mod error;
pub mod types;

pub use error::{EvCacheError, Result};
pub use types::*;
