pub use crate::{
    client::{Client, ClientError},
    envelope::{CheckAttestationRequest, CheckProposalRequest, CheckResponse},
    error::Error,
    http_api_config::HttpApiConfig,
    standard::{AttestationEntry, HistoryResponse, ProposalEntry},
    task::HttpApi,
};

mod client;
mod envelope;
mod error;
mod extractors;
mod http_api_config;
mod routing;
mod standard;
mod task;
