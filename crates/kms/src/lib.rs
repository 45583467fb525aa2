//! Unified facade over the KMS core: configuration, object-store wiring,
//! and the RPC dispatcher a host process sends [`Request`]s through. A
//! consumer that only needs the wire types and the dispatcher can depend
//! on `kms-rpc` directly; this crate exists for the common case of
//! bootstrapping a whole instance from a [`KmsConfig`] in one call.

mod config;
mod error;
mod identity;

pub use config::{KmsConfig, StoreBackend};
pub use error::{KmsError, Result};
pub use identity::{CodeIdentity, CodeIdentityProvider, UnverifiedCodeIdentity};

pub use kms_master_secret::{GateUnwrap, NotImplementedGateUnwrap};
pub use kms_rpc::{Dispatcher, ErrorCode, Request, Response, RpcError};

use std::sync::Arc;

use kms_codec::{Clock, SystemClock};
use kms_store::{InMemoryStore, ObjectStore, SqliteStore};

/// One running instance: a dispatcher wired to a concrete store, clock,
/// and the two collaborators the core never implements itself.
pub struct Kms {
    dispatcher: Dispatcher,
}

impl Kms {
    /// Open (or create) the configured store and assemble every layer
    /// underneath the dispatcher in the leaves-first order the workspace
    /// builds in: store, then key/master-secret/audit/lease managers,
    /// then the dispatcher itself.
    pub fn bootstrap(config: &KmsConfig, identity: Arc<dyn CodeIdentityProvider>, gate: Arc<dyn GateUnwrap>) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match &config.store {
            StoreBackend::InMemory => Arc::new(InMemoryStore::new()),
            StoreBackend::Sqlite { path } => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let path_str = path.to_str().ok_or_else(|| KmsError::InvalidStorePath(path.clone()))?;
                Arc::new(SqliteStore::open(path_str)?)
            }
        };
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let code_identity = identity.identity();
        let dispatcher = Dispatcher::new(store, clock, config.instance_id.clone(), code_identity.code_hash, code_identity.manifest_hash, gate);
        Ok(Self { dispatcher })
    }

    pub async fn dispatch(&self, req: Request) -> Response {
        self.dispatcher.dispatch(req).await
    }
}

/// Installs a `tracing` subscriber honoring `RUST_LOG`, defaulting to
/// `info`. Call once at process start; harmless to call from tests, where
/// a second call is simply ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use kms_master_secret::NotImplementedGateUnwrap;

    fn harness() -> Kms {
        let config = KmsConfig::in_memory("test-instance");
        Kms::bootstrap(&config, Arc::new(UnverifiedCodeIdentity), Arc::new(NotImplementedGateUnwrap)).unwrap()
    }

    #[tokio::test]
    async fn is_setup_reports_false_before_any_setup() {
        let kms = harness();
        let req = Request { id: "1".to_string(), method: "isSetup".to_string(), params: None };
        let resp = kms.dispatch(req).await;
        match resp {
            Response::Ok { result, .. } => assert_eq!(result["isSetup"], false),
            Response::Err { .. } => panic!("expected ok response"),
        }
    }

    #[tokio::test]
    async fn unknown_method_is_invalid_method() {
        let kms = harness();
        let req = Request { id: "1".to_string(), method: "doesNotExist".to_string(), params: None };
        let resp = kms.dispatch(req).await;
        match resp {
            Response::Err { error, .. } => assert_eq!(error.code, ErrorCode::InvalidMethod),
            Response::Ok { .. } => panic!("expected error response"),
        }
    }
}
