// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present Pluribus Contributors

use clap::Parser;
use pluribus::{CliArgs, HypervisorConfig, PluribusError, SwitchController};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), PluribusError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = CliArgs::parse();
    let config = HypervisorConfig::from_cli(args)?;
    info!(
        strategy = %config.strategy,
        principals = config.principals.len(),
        "loaded configuration"
    );

    let listener = TcpListener::bind(&config.listen_address).await?;
    info!(address = %config.listen_address, "waiting for the physical switch");

    let (stream, peer) = listener.accept().await?;
    info!(%peer, "physical switch connected");

    SwitchController::new(config, stream).run().await
}
