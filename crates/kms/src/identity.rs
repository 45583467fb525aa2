//! The code-identity collaborator. The core never computes or attests to
//! its own build identity — it only binds delegation certs to whatever
//! `codeHash`/`manifestHash` the embedding host supplies, the same way
//! `kms_master_secret::GateUnwrap` keeps pepper custody outside the core.

/// The hash of the running code plus the hash of its manifest (the bundle
/// identity a delegation cert's `scope` is meaningless without).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeIdentity {
    pub code_hash: [u8; 32],
    pub manifest_hash: [u8; 32],
}

pub trait CodeIdentityProvider: Send + Sync {
    fn identity(&self) -> CodeIdentity;
}

/// Binds every delegation cert to an all-zero identity. Fine for tests and
/// local development; a real deployment must supply its own provider
/// backed by the host's build pipeline.
pub struct UnverifiedCodeIdentity;

impl CodeIdentityProvider for UnverifiedCodeIdentity {
    fn identity(&self) -> CodeIdentity {
        CodeIdentity { code_hash: [0u8; 32], manifest_hash: [0u8; 32] }
    }
}
