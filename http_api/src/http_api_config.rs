use core::time::Duration;
use std::net::{IpAddr, SocketAddr};

use anyhow::Result;
use tokio::net::TcpListener;

#[derive(Clone, Debug)]
pub struct HttpApiConfig {
    pub address: SocketAddr,
    // `timeout` is optional to prevent timeouts in tests.
    pub timeout: Option<Duration>,
}

impl HttpApiConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    #[must_use]
    pub fn with_address(ip_address: impl Into<IpAddr>, port: u16) -> Self {
        Self {
            address: (ip_address, port).into(),
            timeout: Some(Self::DEFAULT_TIMEOUT),
        }
    }

    pub(crate) async fn listener(&self) -> Result<TcpListener> {
        TcpListener::bind(&self.address).await.map_err(Into::into)
    }
}

impl From<SocketAddr> for HttpApiConfig {
    fn from(address: SocketAddr) -> Self {
        Self {
            address,
            timeout: Some(Self::DEFAULT_TIMEOUT),
        }
    }
}
