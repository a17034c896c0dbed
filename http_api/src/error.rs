use anyhow::Error as AnyhowError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::envelope::{CheckResponse, FINGERPRINT_NOT_COMPUTED};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot propose at genesis slot")]
    GenesisSlotProposal,
    #[error("invalid JSON body")]
    InvalidJsonBody(#[source] AnyhowError),
    #[error("invalid public key")]
    InvalidPubKey(#[source] AnyhowError),
    #[error("attestation source and target are required")]
    MissingCheckpoints,
    #[error("internal error")]
    Internal(#[from] AnyhowError),
    #[error("pool introspection is not supported")]
    PoolIntrospectionUnsupported,
}

impl Error {
    pub(crate) const fn status_code(&self) -> StatusCode {
        match self {
            Self::GenesisSlotProposal
            | Self::InvalidJsonBody(_)
            | Self::InvalidPubKey(_)
            | Self::MissingCheckpoints => StatusCode::BAD_REQUEST,
            Self::Internal(_) | Self::PoolIntrospectionUnsupported => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub(crate) fn format_sources(&self) -> String {
        use core::fmt::Write as _;

        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);

        while let Some(error) = source {
            let _ = write!(message, ": {error}");
            source = error.source();
        }

        message
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        CheckResponse::failure(
            FINGERPRINT_NOT_COMPUTED,
            self.status_code(),
            self.format_sources(),
        )
        .into_response()
    }
}
