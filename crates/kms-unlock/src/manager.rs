//! `UnlockContextManager`: the single authority for bringing a user's MS
//! live in memory and tearing it down again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use kms_kdf::derive_mkek;
use kms_keys::KeyManager;
use kms_master_secret::{MasterSecretManager, Secret};

use crate::error::{Result, UnlockError};
use crate::model::UnlockContext;

pub struct UnlockContextManager {
    master_secret: Arc<MasterSecretManager>,
    key_manager: Arc<KeyManager>,
    contexts: Mutex<HashMap<String, UnlockContext>>,
}

impl UnlockContextManager {
    pub fn new(master_secret: Arc<MasterSecretManager>, key_manager: Arc<KeyManager>) -> Self {
        Self { master_secret, key_manager, contexts: Mutex::new(HashMap::new()) }
    }

    /// `unlock`: decrypt MS via the matching enrollment, derive MKEK, load
    /// (or, on this store's very first unlock, generate) the UAK, and
    /// install a fresh context, replacing any existing one for this user.
    pub fn unlock(&self, user_id: &str, secret: &Secret, now: DateTime<Utc>) -> Result<()> {
        let ms = self.master_secret.unlock(secret)?;
        let mkek = derive_mkek(&ms)?;

        let uak_signing_key = match self.key_manager.load_uak(&mkek) {
            Ok(key) => key,
            Err(kms_keys::KeysError::KeyNotFound(_)) => self.key_manager.generate_and_store_uak(&mkek)?,
            Err(other) => return Err(other.into()),
        };

        let context = UnlockContext::new(user_id.to_string(), ms, mkek, uak_signing_key, now);
        self.contexts.lock().unwrap().insert(user_id.to_string(), context);
        Ok(())
    }

    /// Run `f` against the live context for `user_id`, touching its TTL
    /// window first. Fails `NOT_UNLOCKED` if absent, `Expired` (and drops
    /// the context, zeroizing its key material) if the TTL has lapsed.
    pub fn with_unlocked<R>(&self, user_id: &str, now: DateTime<Utc>, f: impl FnOnce(&UnlockContext) -> R) -> Result<R> {
        let mut contexts = self.contexts.lock().unwrap();
        let expired = contexts.get(user_id).map(|ctx| ctx.is_expired(now)).unwrap_or(false);
        if expired {
            contexts.remove(user_id);
        }
        let ctx = contexts.get_mut(user_id).ok_or_else(|| UnlockError::NotUnlocked(user_id.to_string()))?;
        ctx.touch(now);
        Ok(f(ctx))
    }

    pub fn is_unlocked(&self, user_id: &str, now: DateTime<Utc>) -> bool {
        self.contexts.lock().unwrap().get(user_id).map(|ctx| !ctx.is_expired(now)).unwrap_or(false)
    }

    /// Explicit lock: zeroizes and drops the context immediately.
    pub fn lock(&self, user_id: &str) {
        self.contexts.lock().unwrap().remove(user_id);
    }

    /// Drops every live context. Used by `resetKMS`, which tears down the
    /// whole in-memory session state alongside the persisted store.
    pub fn lock_all(&self) {
        self.contexts.lock().unwrap().clear();
    }
}
