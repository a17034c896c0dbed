use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Slashing protection service for Ethereum 2.0 validators
#[derive(Parser)]
#[clap(verbatim_doc_comment, version)]
pub struct ProtectorArgs {
    /// Path to the database directory
    #[clap(long, env = "DB_PATH", default_value = "/slashing-protector-data")]
    pub db_path: PathBuf,

    /// Address to listen on
    #[clap(long, env = "ADDR", default_value = "0.0.0.0:9369")]
    pub addr: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        let args = ProtectorArgs::try_parse_from(["slashing_protector"])
            .expect("parsing without arguments should succeed");

        assert_eq!(args.db_path, PathBuf::from("/slashing-protector-data"));
        assert_eq!(args.addr, "0.0.0.0:9369".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn flags_override_defaults() {
        let args = ProtectorArgs::try_parse_from([
            "slashing_protector",
            "--db-path",
            "/tmp/protector",
            "--addr",
            "127.0.0.1:8080",
        ])
        .expect("parsing with flags should succeed");

        assert_eq!(args.db_path, PathBuf::from("/tmp/protector"));
        assert_eq!(args.addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
    }
}
