//! Delegated, hash-chained audit log. Entries are signed by one of three
//! key classes (UAK/LAK/KIAK) and link via `chainHash`; `verify_chain`
//! walks the whole log and pinpoints the first broken link.

pub mod chain;
pub mod error;
pub mod model;
pub mod signer;

pub use chain::{AppendRequest, AuditChain};
pub use error::{AuditError, Result};
pub use model::{AuditCounter, AuditDelegationCert, AuditEntry, ChainVerification, Signer};
pub use signer::{generate_signing_key, sign, verify, verifying_key_bytes, UakRotationState};
