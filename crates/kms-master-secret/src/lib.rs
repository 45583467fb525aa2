//! Master Secret lifecycle: multi-method enrollment, unlock, rewrap on
//! add/remove, PBKDF2 recalibration-triggered rewrap, and reset.

pub mod capability;
pub mod error;
pub mod manager;
pub mod model;

pub use capability::EnrollmentCapability;
pub use error::{Error, MasterSecretError, Result};
pub use manager::{MasterSecretManager, SetupOutcome};
pub use model::{
    EnrollmentMethod, EnrollmentRecord, GateUnwrap, NotImplementedGateUnwrap, PassphraseParams, PasskeyGateParams,
    PasskeyPrfParams, Secret,
};
