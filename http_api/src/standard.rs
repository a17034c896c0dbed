use std::time::Instant;

use anyhow::Result as AnyhowResult;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hex::FromHex as _;
use log::debug;
use protector::{Check, History};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinError;
use types::primitives::{Epoch, PublicKeyBytes, Slot, H256};

use crate::{
    envelope::{CheckAttestationRequest, CheckProposalRequest, CheckResponse},
    error::Error,
    extractors::ApiJson,
    routing::ServerState,
};

pub async fn check_proposal(
    State(state): State<ServerState>,
    Path(network): Path<String>,
    ApiJson(request): ApiJson<CheckProposalRequest>,
) -> Response {
    let started = Instant::now();
    let hash = request.fingerprint();

    if request.slot == 0 {
        let error = Error::GenesisSlotProposal;
        return CheckResponse::failure(hash, error.status_code(), error.format_sources())
            .into_response();
    }

    let CheckProposalRequest {
        pub_key,
        signing_root,
        slot,
        ..
    } = request;

    // Spawning decouples the check from the request future. A client
    // disconnect must not abort a write that has already begun.
    let outcome = {
        let protector = state.protector.clone();
        let network = network.clone();

        tokio::spawn(
            async move { protector.check_proposal(&network, pub_key, signing_root, slot).await },
        )
        .await
    };

    let response = check_response(hash, outcome);

    debug!(
        "CheckProposal (network: {network}, pub_key: {pub_key:?}, slot: {slot}, \
         check: {:?}, error: {:?}, took: {:?})",
        response.check,
        response.error,
        started.elapsed(),
    );

    response.into_response()
}

pub async fn check_attestation(
    State(state): State<ServerState>,
    Path(network): Path<String>,
    ApiJson(request): ApiJson<CheckAttestationRequest>,
) -> Response {
    let started = Instant::now();

    let hash = match request.fingerprint() {
        Ok(hash) => hash,
        Err(error) => return error.into_response(),
    };

    let CheckAttestationRequest {
        pub_key,
        signing_root,
        data,
        ..
    } = request;

    let outcome = {
        let protector = state.protector.clone();
        let network = network.clone();

        tokio::spawn(async move {
            protector
                .check_attestation(&network, pub_key, signing_root, &data)
                .await
        })
        .await
    };

    let response = check_response(hash, outcome);

    debug!(
        "CheckAttestation (network: {network}, pub_key: {pub_key:?}, data: {data:?}, \
         check: {:?}, error: {:?}, took: {:?})",
        response.check,
        response.error,
        started.elapsed(),
    );

    response.into_response()
}

pub async fn history(
    State(state): State<ServerState>,
    Path((network, pub_key)): Path<(String, String)>,
) -> Result<Json<HistoryResponse>, Error> {
    let pub_key = parse_pub_key(&pub_key)?;

    let history = state
        .protector
        .history(&network, pub_key)
        .await
        .map_err(Error::Internal)?;

    Ok(Json(HistoryResponse::from(history)))
}

pub async fn metrics(State(state): State<ServerState>) -> Result<Json<Value>, Error> {
    let pool = state
        .pool_introspection
        .ok_or(Error::PoolIntrospectionUnsupported)?;

    Ok(Json(json!({ "acquired_conns": pool.acquired_conns() })))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct HistoryResponse {
    pub proposals: Vec<ProposalEntry>,
    pub attestations: Vec<AttestationEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ProposalEntry {
    pub signing_root: H256,
    pub slot: Slot,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AttestationEntry {
    pub signing_root: H256,
    pub source: Epoch,
    pub target: Epoch,
}

impl From<History> for HistoryResponse {
    fn from(history: History) -> Self {
        let proposals = history
            .proposals
            .into_iter()
            .map(|record| ProposalEntry {
                signing_root: record.signing_root,
                slot: record.slot,
            })
            .collect();

        let attestations = history
            .attestations
            .into_iter()
            .map(|record| AttestationEntry {
                signing_root: record.signing_root,
                source: record.source_epoch,
                target: record.target_epoch,
            })
            .collect();

        Self {
            proposals,
            attestations,
        }
    }
}

fn check_response(hash: u64, outcome: Result<AnyhowResult<Check>, JoinError>) -> CheckResponse {
    match outcome {
        Ok(Ok(check)) => CheckResponse::success(hash, check),
        Ok(Err(error)) => {
            let status_code = if error.downcast_ref::<protector::Error>().is_some() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };

            CheckResponse::failure(hash, status_code, format!("{error:#}"))
        }
        Err(join_error) => CheckResponse::failure(
            hash,
            StatusCode::INTERNAL_SERVER_ERROR,
            join_error.to_string(),
        ),
    }
}

fn parse_pub_key(string: &str) -> Result<PublicKeyBytes, Error> {
    let digits = string.strip_prefix("0x").unwrap_or(string);

    PublicKeyBytes::from_hex(digits)
        .map_err(anyhow::Error::new)
        .map_err(Error::InvalidPubKey)
}
