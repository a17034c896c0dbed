//! A `Json` extractor that reports failures in the response envelope.
//!
//! The extractor provided by `axum` rejects malformed bodies with plain
//! text. Check endpoints must answer with the JSON envelope and status
//! code 400 instead.

use anyhow::Error as AnyhowError;
use async_trait::async_trait;
use axum::{
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::Error;

pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::from_request(request, state)
            .await
            .map(|Json(value)| Self(value))
            .map_err(AnyhowError::new)
            .map_err(Error::InvalidJsonBody)
    }
}
