//! Push subscription endpoint whitelist validation.

use chrono::Utc;
use url::Url;

use crate::error::{KeysError, Result};
use crate::model::StoredPushSubscription;

/// Exact-origin push services that don't need wildcard matching.
const ALLOWED_ORIGINS: &[&str] = &[
    "https://fcm.googleapis.com",
    "https://updates.push.services.mozilla.com",
    "https://api.push.apple.com",
    "https://api.sandbox.push.apple.com",
];

/// Windows Notification Service hosts live under a wildcard subdomain.
const WNS_SUFFIX: &str = ".notify.windows.com";

fn origin_allowed(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    if url.scheme() != "https" {
        return false;
    }
    if host.ends_with(WNS_SUFFIX) {
        return true;
    }
    let origin = format!("{}://{}", url.scheme(), host);
    ALLOWED_ORIGINS.contains(&origin.as_str())
}

/// Validate and construct a `StoredPushSubscription`. Rejects any endpoint
/// outside the push-service whitelist with `ENDPOINT_NOT_ALLOWED`. `eid` is
/// the caller-supplied opaque per-recipient id used to key per-eid quota
/// windows; it is carried through unvalidated.
pub fn validate_subscription(
    endpoint: &str,
    expiration_time: Option<chrono::DateTime<Utc>>,
    p256dh: Vec<u8>,
    auth: Vec<u8>,
    eid: String,
) -> Result<StoredPushSubscription> {
    let url = Url::parse(endpoint).map_err(|_| KeysError::MalformedEndpoint(endpoint.to_string()))?;
    if !origin_allowed(&url) {
        return Err(KeysError::EndpointNotAllowed(endpoint.to_string()));
    }
    Ok(StoredPushSubscription {
        endpoint: endpoint.to_string(),
        expiration_time,
        p256dh,
        auth,
        eid,
        created_at: Utc::now(),
    })
}
