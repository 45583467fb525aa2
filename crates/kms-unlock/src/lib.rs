//! The unlock-context manager: brings a user's Master Secret and MKEK
//! live in worker memory for a bounded window, and tears it down again.

pub mod error;
pub mod manager;
pub mod model;

pub use error::{Error, Result, UnlockError};
pub use manager::UnlockContextManager;
pub use model::{UnlockContext, DEFAULT_TTL_MINUTES, HARD_CAP_HOURS};
