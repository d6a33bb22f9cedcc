use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use sshmnt::cli::{Args, Commands};
use sshmnt::config::SshConfig;
use sshmnt::docker::{plugin, Driver, DriverConfig};
use sshmnt::error::{Result, SshmntError};
use sshmnt::fs::{debug, MountSession};
use sshmnt::sftp::SftpClient;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("SSHMNT_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Mount {
            mountpoint,
            address,
            username,
            password,
            key,
            root,
            debug_address,
        } => mount(mountpoint, address, username, password, key, root, debug_address).await,
        Commands::Docker {
            mountpoint,
            address,
            username,
            password,
            key,
            root,
            socket,
        } => docker(mountpoint, address, username, password, key, root, socket).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn mount(
    mountpoint: PathBuf,
    address: String,
    username: String,
    password: Option<String>,
    key: Option<PathBuf>,
    root: String,
    debug_address: Option<SocketAddr>,
) -> Result<i32> {
    let config = SshConfig::new(username, password, key);
    tracing::info!(address = %address, "creating FUSE client for SSH server");

    let sftp = Arc::new(SftpClient::connect(&config, &address).await?);
    let session = Arc::new(MountSession::new(sftp, &mountpoint, root));

    if let Some(addr) = debug_address {
        let tree = Arc::clone(session.tree());
        tokio::spawn(async move {
            if let Err(e) = debug::serve(tree, addr).await {
                tracing::error!("debug inspector failed: {}", e);
            }
        });
    }

    let signal_session = Arc::clone(&session);
    tokio::spawn(async move {
        wait_for_shutdown().await;
        tracing::info!("stopping");
        match tokio::task::spawn_blocking(move || signal_session.unmount()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("could not unmount cleanly: {}", e),
            Err(e) => tracing::error!("unmount task failed: {}", e),
        }
    });

    let serve_session = Arc::clone(&session);
    tokio::task::spawn_blocking(move || serve_session.mount())
        .await
        .map_err(|e| SshmntError::Mount(e.to_string()))??;

    Ok(0)
}

#[allow(clippy::too_many_arguments)]
async fn docker(
    local_root: PathBuf,
    address: String,
    username: String,
    password: Option<String>,
    key: Option<PathBuf>,
    root: String,
    socket: PathBuf,
) -> Result<i32> {
    let config = DriverConfig {
        remote_root: root,
        local_root,
        ssh_server: address.clone(),
        ssh_config: SshConfig::new(username, password, key),
    };

    tracing::info!(address = %address, socket = %socket.display(), "starting plugin server");
    let driver = Arc::new(Driver::connect(config).await?);

    let stop_driver = Arc::clone(&driver);
    tokio::spawn(async move {
        wait_for_shutdown().await;
        tracing::info!("stopping");
        let errors = tokio::task::spawn_blocking(move || stop_driver.stop())
            .await
            .unwrap_or_default();
        for e in errors {
            tracing::error!("error stopping driver: {}", e);
        }
        std::process::exit(0);
    });

    plugin::serve(driver, &socket).await?;
    Ok(0)
}

async fn wait_for_shutdown() {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
