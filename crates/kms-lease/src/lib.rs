//! The lease engine: short-lived, SessionKEK-wrapped VAPID credentials
//! with per-lease quota enforcement and LAK-signed JWT issuance.

pub mod cert;
pub mod engine;
pub mod error;
pub mod model;
pub mod quota;

pub use engine::{LeaseCreated, LeaseEngine, SignedJwt};
pub use error::{Error, LeaseError, Result};
pub use model::{JwtPayload, LeaseRecord, LeaseStatus, LeaseVerification, QuotaConfig, MAX_TTL_HOURS};
pub use quota::LeaseQuota;
