use std::time::{SystemTime, UNIX_EPOCH};

use protector::Check;
use reqwest::{Client as HttpClient, Url};
use thiserror::Error;
use types::{
    containers::AttestationData,
    primitives::{PublicKeyBytes, Slot, UnixSeconds, H256},
};

use crate::envelope::{
    CheckAttestationRequest, CheckProposalRequest, CheckResponse, FINGERPRINT_NOT_COMPUTED,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("attestation source and target are required")]
    MissingCheckpoints,
    #[error("invalid endpoint URL")]
    Url(#[from] url::ParseError),
    #[error("failed to reach the server")]
    Transport(#[from] reqwest::Error),
    #[error("server reported an error (status code {status_code}): {message}")]
    Server { status_code: u16, message: String },
    #[error(
        "response fingerprint {actual:#018x} does not match \
         the request fingerprint {expected:#018x}"
    )]
    FingerprintMismatch { expected: u64, actual: u64 },
    #[error("response does not contain a verdict")]
    MissingCheck,
}

/// A client for the slashing-protector HTTP API.
///
/// Every response's fingerprint is compared against the one computed
/// locally; a verdict is never returned on a mismatch.
pub struct Client {
    http: HttpClient,
    base_url: Url,
}

impl Client {
    #[must_use]
    pub const fn new(http: HttpClient, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub async fn check_attestation(
        &self,
        network: &str,
        pub_key: PublicKeyBytes,
        signing_root: H256,
        data: &AttestationData,
    ) -> Result<Check, ClientError> {
        let request = CheckAttestationRequest {
            timestamp: unix_timestamp(),
            pub_key,
            signing_root,
            data: *data,
        };

        let expected = request
            .fingerprint()
            .map_err(|_invalid| ClientError::MissingCheckpoints)?;

        let url = self
            .base_url
            .join(&format!("/v1/{network}/slashable/attestation"))?;

        let response = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        verify_response(expected, response)
    }

    pub async fn check_proposal(
        &self,
        network: &str,
        pub_key: PublicKeyBytes,
        signing_root: H256,
        slot: Slot,
    ) -> Result<Check, ClientError> {
        let request = CheckProposalRequest {
            timestamp: unix_timestamp(),
            pub_key,
            signing_root,
            slot,
        };

        let expected = request.fingerprint();

        let url = self
            .base_url
            .join(&format!("/v1/{network}/slashable/proposal"))?;

        let response = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        verify_response(expected, response)
    }
}

fn verify_response(expected: u64, response: CheckResponse) -> Result<Check, ClientError> {
    if response.status_code != 0 {
        return Err(ClientError::Server {
            status_code: response.status_code,
            message: response.error.unwrap_or_default(),
        });
    }

    if response.hash == FINGERPRINT_NOT_COMPUTED || response.hash != expected {
        return Err(ClientError::FingerprintMismatch {
            expected,
            actual: response.hash,
        });
    }

    response.check.ok_or(ClientError::MissingCheck)
}

fn unix_timestamp() -> UnixSeconds {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| UnixSeconds::try_from(duration.as_secs()).ok())
        .unwrap_or_default()
}
