use core::future::IntoFuture as _;
use std::sync::Arc;

use anyhow::{Error as AnyhowError, Result};
use axum::{error_handling::HandleErrorLayer, http::StatusCode};
use log::info;
use protector::{PoolIntrospection, Protector};
use tokio::net::TcpListener;
use tower::ServiceBuilder;

use crate::{
    http_api_config::HttpApiConfig,
    routing::{self, ServerState},
};

pub struct HttpApi {
    pub protector: Arc<dyn Protector>,
    pub pool_introspection: Option<Arc<dyn PoolIntrospection>>,
    pub http_api_config: HttpApiConfig,
}

impl HttpApi {
    pub async fn run(self) -> Result<()> {
        let listener = self.http_api_config.listener().await?;
        self.run_with_listener(listener).await
    }

    // Passing in the listener achieves 2 things:
    // - It ensures that the socket is bound and listening by the time
    //   requests are submitted.
    // - It allows the caller to extract the port assigned by binding to
    //   port 0.
    pub async fn run_with_listener(self, listener: TcpListener) -> Result<()> {
        let Self {
            protector,
            pool_introspection,
            http_api_config,
        } = self;

        let state = ServerState {
            protector,
            pool_introspection,
        };

        let mut router = routing::routes(state);

        if let Some(timeout) = http_api_config.timeout {
            router = router.layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(|_| async {
                        StatusCode::REQUEST_TIMEOUT
                    }))
                    .timeout(timeout),
            );
        }

        info!("HTTP server listening on {}", http_api_config.address);

        axum::serve(listener, router.into_make_service())
            .into_future()
            .await
            .map_err(AnyhowError::new)
    }
}
