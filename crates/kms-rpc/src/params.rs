//! Per-method parameter DTOs. Each is deserialized from `Request.params`
//! with `serde_json::from_value`; a shape mismatch becomes `INVALID_PARAMS`
//! before any handler runs, per the one/two/three classification.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error_code::ErrorCode;

pub fn parse<T: for<'de> Deserialize<'de>>(params: Option<Value>) -> Result<T, (ErrorCode, String)> {
    let value = params.unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| (ErrorCode::InvalidParams, format!("bad params: {e}")))
}

pub fn bad_params(message: impl Into<String>) -> (ErrorCode, String) {
    (ErrorCode::InvalidParams, message.into())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdParams {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPassphraseParams {
    pub user_id: String,
    pub passphrase: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPasskeyPrfParams {
    pub user_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub rp_id: String,
    pub credential_id: String,
    pub prf_output: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPasskeyGateParams {
    pub user_id: String,
    pub rp_id: String,
    pub credential_id: String,
}

/// The credential fields a caller proves possession of, for `unlock`,
/// `addEnrollment`'s `currentCredentials`, and `removeEnrollment`'s
/// `currentCredentials`. Only the fields matching `method` are read.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsDto {
    pub method: String,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default)]
    pub prf_output: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockParams {
    pub user_id: String,
    pub credentials: CredentialsDto,
}

/// The method/params of a brand new enrollment being added via
/// `addEnrollment`. `credentialId` is absent for `passphrase`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMethodDto {
    pub method: String,
    #[serde(default)]
    pub rp_id: Option<String>,
    #[serde(default)]
    pub credential_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddEnrollmentParams {
    pub current_credentials: CredentialsDto,
    pub new_method: NewMethodDto,
    pub new_credentials: CredentialsDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveEnrollmentParams {
    pub current_credentials: CredentialsDto,
    pub enrollment_id: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListKeysParams {
    #[serde(default)]
    pub purpose: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscriptionKeysDto {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscriptionDto {
    pub endpoint: String,
    #[serde(default)]
    pub expiration_time: Option<DateTime<Utc>>,
    pub keys: PushSubscriptionKeysDto,
    pub eid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPushSubscriptionParams {
    pub kid: String,
    pub subscription: PushSubscriptionDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPushSubscriptionParams {
    pub kid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseSubDto {
    pub aud: String,
    pub eid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLeaseParams {
    pub user_id: String,
    #[serde(default)]
    pub subs: Vec<LeaseSubDto>,
    pub ttl_hours: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseIdParams {
    pub lease_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendLeaseParams {
    pub lease_id: String,
    pub additional_hours: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtPayloadDto {
    pub aud: String,
    pub sub: String,
    pub exp: i64,
    pub jti: String,
    #[serde(default)]
    pub eid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignJwtParams {
    pub lease_id: String,
    pub payload: JwtPayloadDto,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GetAuditLogParams {
    #[serde(default)]
    pub since_seq: Option<u64>,
    #[serde(default)]
    pub limit: Option<usize>,
}
