//! Wrapped-key storage, VAPID key generation/rotation, and push
//! subscription endpoint validation.

pub mod audit_key;
pub mod error;
pub mod manager;
pub mod model;
pub mod push_subscription;
pub mod vapid;
pub mod wrap;

pub use audit_key::{generate_uak, load_uak};
pub use error::{KeysError, Result};
pub use manager::KeyManager;
pub use model::{KeyAlg, Purpose, PublicKeyRaw, StoredPushSubscription, WrappedKey};
pub use push_subscription::validate_subscription;
pub use vapid::{generate_vapid, regenerate_vapid, sign_with_vapid_key};
pub use wrap::{unwrap_private_key, wrap_private_key};
