use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sshmnt")]
#[command(about = "Mount a remote directory tree over SSH/SFTP as a local filesystem")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Mount a remote directory at the specified mountpoint")]
    Mount {
        #[arg(help = "Local mountpoint")]
        mountpoint: PathBuf,

        #[arg(short, long, default_value = "127.0.0.1:22", help = "ssh server address")]
        address: String,

        #[arg(short, long, default_value = "root", help = "ssh username")]
        username: String,

        #[arg(short, long, help = "ssh password")]
        password: Option<String>,

        #[arg(short, long, help = "ssh private key file")]
        key: Option<PathBuf>,

        #[arg(short, long, default_value = "/opt", help = "remote root directory")]
        root: String,

        #[arg(long, help = "Serve the registry inspector at this address")]
        debug_address: Option<SocketAddr>,
    },
    #[command(about = "Serve the Docker volume plugin, mounting volumes under the specified root")]
    Docker {
        #[arg(help = "Local directory volume mountpoints are created under")]
        mountpoint: PathBuf,

        #[arg(short, long, default_value = "127.0.0.1:22", help = "ssh server address")]
        address: String,

        #[arg(short, long, default_value = "root", help = "ssh username")]
        username: String,

        #[arg(short, long, help = "ssh password")]
        password: Option<String>,

        #[arg(short, long, help = "ssh private key file")]
        key: Option<PathBuf>,

        #[arg(short, long, default_value = "/tmp", help = "remote root directory")]
        root: String,

        #[arg(
            short,
            long,
            default_value = "/run/docker/plugins/ssh.sock",
            help = "socket address to communicate with docker"
        )]
        socket: PathBuf,
    },
}
