use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use protector::{PoolIntrospection, Protector};

use crate::standard::{check_attestation, check_proposal, history, metrics};

#[derive(Clone)]
pub struct ServerState {
    pub protector: Arc<dyn Protector>,
    pub pool_introspection: Option<Arc<dyn PoolIntrospection>>,
}

pub fn routes(state: ServerState) -> Router {
    Router::new()
        .route("/v1/:network/slashable/proposal", post(check_proposal))
        .route("/v1/:network/slashable/attestation", post(check_attestation))
        .route("/v1/:network/history/:pub_key", get(history))
        .route("/metrics", get(metrics))
        .with_state(state)
}
