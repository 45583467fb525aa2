//! In-process RPC surface over the KMS core crates: request/response
//! framing, per-method param DTOs, the error code enum, and the
//! [`Dispatcher`] that routes a [`Request`] to a handler and returns a
//! [`Response`].

mod dispatcher;
mod error_code;
mod kiak;
mod params;
mod protocol;

pub use dispatcher::Dispatcher;
pub use error_code::{ErrorCode, IntoErrorCode};
pub use params::{bad_params, parse};
pub use protocol::{Request, Response, RpcError};
