use std::{process::ExitCode, sync::Arc};

use anyhow::Result;
use clap::{Error as ClapError, Parser as _};
use http_api::{HttpApi, HttpApiConfig};
use log::{error, info};
use protector::KvProtector;
use tokio::{runtime::Builder, select};

use crate::protector_args::ProtectorArgs;

mod logging;
mod protector_args;

fn main() -> ExitCode {
    if let Err(error) = try_main() {
        error.downcast_ref().map(ClapError::exit);
        error!("{error:?}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn try_main() -> Result<()> {
    logging::initialize_logger()?;

    let args = ProtectorArgs::try_parse()?;

    run(args)
}

fn run(args: ProtectorArgs) -> Result<()> {
    let ProtectorArgs { db_path, addr } = args;

    // Display the configuration. Don't expose sensitive attributes!
    info!(
        "starting slashing-protector (db_path: {}, addr: {addr})",
        db_path.display(),
    );

    let runtime = Builder::new_multi_thread().enable_all().build()?;

    runtime.block_on(async move {
        let protector = Arc::new(KvProtector::new(db_path));

        let http_api = HttpApi {
            protector: protector.clone(),
            pool_introspection: Some(protector.clone()),
            http_api_config: HttpApiConfig::from(addr),
        };

        select! {
            result = http_api.run() => result,
            result = wait_for_shutdown_signal() => {
                info!("shutting down");
                protector.close();
                result
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }

    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await.map_err(Into::into)
}
