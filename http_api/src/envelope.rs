use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use protector::Check;
use serde::{Deserialize, Serialize};
use types::{
    containers::AttestationData,
    primitives::{PublicKeyBytes, Slot, UnixSeconds, H256},
};
use xxhash_rust::xxh64::Xxh64;

use crate::error::Error;

/// Sentinel for "fingerprint not computed". Clients treat it as invalid.
pub const FINGERPRINT_NOT_COMPUTED: u64 = 0;

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CheckProposalRequest {
    pub timestamp: UnixSeconds,
    pub pub_key: PublicKeyBytes,
    pub signing_root: H256,
    // The field is literally named `block` on the wire but carries the slot
    // number. Renaming it would break existing clients.
    #[serde(rename = "block")]
    pub slot: Slot,
}

impl CheckProposalRequest {
    /// Canonical 64-bit fingerprint of the request. Not cryptographic:
    /// it detects transport corruption and cross-wired responses.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Xxh64::new(0);
        update_u64(&mut hasher, unsigned(self.timestamp));
        hasher.update(self.pub_key.as_bytes());
        hasher.update(self.signing_root.as_bytes());
        update_u64(&mut hasher, self.slot);
        hasher.digest()
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CheckAttestationRequest {
    pub timestamp: UnixSeconds,
    pub pub_key: PublicKeyBytes,
    pub signing_root: H256,
    #[serde(rename = "attestation")]
    pub data: AttestationData,
}

impl CheckAttestationRequest {
    /// Like [`CheckProposalRequest::fingerprint`], but fails when the
    /// attestation is missing its source or target checkpoint.
    pub fn fingerprint(&self) -> Result<u64, Error> {
        let source = self.data.source.ok_or(Error::MissingCheckpoints)?;
        let target = self.data.target.ok_or(Error::MissingCheckpoints)?;

        let mut hasher = Xxh64::new(0);
        update_u64(&mut hasher, unsigned(self.timestamp));
        hasher.update(self.pub_key.as_bytes());
        hasher.update(self.signing_root.as_bytes());
        update_u64(&mut hasher, self.data.slot);
        update_u64(&mut hasher, self.data.index);
        hasher.update(self.data.beacon_block_root.as_bytes());
        hasher.update(source.root.as_bytes());
        update_u64(&mut hasher, source.epoch);
        hasher.update(target.root.as_bytes());
        update_u64(&mut hasher, target.epoch);

        Ok(hasher.digest())
    }
}

fn update_u64(hasher: &mut Xxh64, value: u64) {
    hasher.update(&value.to_le_bytes());
}

#[expect(clippy::cast_sign_loss)]
const fn unsigned(value: UnixSeconds) -> u64 {
    value as u64
}

/// The envelope every check endpoint responds with. `hash` echoes the
/// request fingerprint so the client can bind the verdict to the request it
/// actually sent.
#[derive(Default, Debug, Deserialize, Serialize)]
pub struct CheckResponse {
    pub hash: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<Check>,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResponse {
    #[must_use]
    pub const fn success(hash: u64, check: Check) -> Self {
        Self {
            hash,
            check: Some(check),
            status_code: 0,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(hash: u64, status_code: StatusCode, error: impl Into<String>) -> Self {
        Self {
            hash,
            check: None,
            status_code: status_code.as_u16(),
            error: Some(error.into()),
        }
    }
}

impl IntoResponse for CheckResponse {
    fn into_response(self) -> Response {
        let status_code = match self.status_code {
            0 => StatusCode::OK,
            other => StatusCode::from_u16(other).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        };

        (status_code, Json(self)).into_response()
    }
}
