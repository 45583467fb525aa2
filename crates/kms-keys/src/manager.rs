//! Key Manager: persistence-backed operations over wrapped keys.

use std::sync::Arc;

use chrono::Utc;
use ed25519_dalek::SigningKey;
use kms_store::{LogicalStore, ObjectStore};

use crate::audit_key::{generate_uak, load_uak};
use crate::error::{KeysError, Result};
use crate::model::{Purpose, PublicKeyRaw, StoredPushSubscription, WrappedKey};
use crate::push_subscription::validate_subscription;
use crate::vapid::generate_vapid;

pub struct KeyManager {
    store: Arc<dyn ObjectStore>,
}

impl KeyManager {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Generate a VAPID key, persist it wrapped, and return its public half.
    pub fn generate_and_store_vapid(&self, mkek: &[u8; 32]) -> Result<PublicKeyRaw> {
        let (wrapped, public) = generate_vapid(mkek, Utc::now())?;
        self.put_wrapped(&wrapped)?;
        Ok(public)
    }

    /// Atomically rotate the VAPID key: generate and persist the new one.
    /// The caller is responsible for invalidating leases bound to the
    /// prior `kid` and recording the audit entry, since both cross into
    /// crates this one doesn't depend on.
    pub fn regenerate_and_store_vapid(&self, mkek: &[u8; 32]) -> Result<(PublicKeyRaw, Option<String>)> {
        let prior_kid = self
            .list_keys(Some(Purpose::Vapid))?
            .into_iter()
            .max_by_key(|k| k.created_at)
            .map(|k| k.kid);
        let public = self.generate_and_store_vapid(mkek)?;
        Ok((public, prior_kid))
    }

    /// Generate the UAK, persist it wrapped under MKEK. Called once, at
    /// the first `setupX` — there is exactly one UAK per store, the same
    /// invariant as the Master Secret itself.
    pub fn generate_and_store_uak(&self, mkek: &[u8; 32]) -> Result<SigningKey> {
        let (wrapped, signing_key) = generate_uak(mkek, Utc::now())?;
        self.put_wrapped(&wrapped)?;
        Ok(signing_key)
    }

    /// Load the store's UAK, unwrapped under the live MKEK. Errors if no
    /// UAK has been generated yet (store predates first setup, or setup
    /// is still in flight).
    pub fn load_uak(&self, mkek: &[u8; 32]) -> Result<SigningKey> {
        let wrapped = self
            .list_keys(Some(Purpose::AuditUser))?
            .into_iter()
            .next()
            .ok_or_else(|| KeysError::KeyNotFound("uak".to_string()))?;
        load_uak(mkek, &wrapped)
    }

    fn put_wrapped(&self, wrapped: &WrappedKey) -> Result<()> {
        let bytes = serde_json::to_vec(wrapped)?;
        self.store
            .put(LogicalStore::WrappedKeys, &wrapped.kid, &bytes, &[("purpose", wrapped.purpose.as_str())])?;
        Ok(())
    }

    pub fn get_wrapped(&self, kid: &str) -> Result<WrappedKey> {
        let bytes = self
            .store
            .get(LogicalStore::WrappedKeys, kid)?
            .ok_or_else(|| KeysError::KeyNotFound(kid.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn get_public_key(&self, kid: &str) -> Result<PublicKeyRaw> {
        let wrapped = self.get_wrapped(kid)?;
        Ok(PublicKeyRaw { kid: wrapped.kid, raw: wrapped.public_raw })
    }

    pub fn list_keys(&self, purpose: Option<Purpose>) -> Result<Vec<WrappedKey>> {
        let records = match purpose {
            Some(p) => self.store.scan_by_index(LogicalStore::WrappedKeys, "purpose", p.as_str())?,
            None => self.store.scan_all(LogicalStore::WrappedKeys)?,
        };
        records.iter().map(|bytes| serde_json::from_slice(bytes).map_err(Into::into)).collect()
    }

    /// Validate and attach a push subscription to a VAPID key, replacing
    /// any prior one for that `kid`.
    pub fn set_push_subscription(
        &self,
        kid: &str,
        endpoint: &str,
        expiration_time: Option<chrono::DateTime<Utc>>,
        p256dh: Vec<u8>,
        auth: Vec<u8>,
        eid: String,
    ) -> Result<()> {
        let mut wrapped = self.get_wrapped(kid)?;
        let subscription = validate_subscription(endpoint, expiration_time, p256dh, auth, eid)?;
        wrapped.subscription = Some(subscription);
        self.put_wrapped(&wrapped)
    }

    pub fn get_push_subscription(&self, kid: &str) -> Result<Option<StoredPushSubscription>> {
        Ok(self.get_wrapped(kid)?.subscription)
    }
}
