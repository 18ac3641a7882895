#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

use std::{
    net::IpAddr,
    path::{Path, PathBuf},
};

use clap::Parser;
use waymark::{config::Config, controller::Controller};

/// An SMTP receiver whose every protocol decision is made by hooks
#[derive(Parser, Debug)]
#[command(name = "waymark")]
#[command(version)]
struct Cli {
    /// Configuration file; see below for where it is looked for otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(short, long)]
    listen: Option<IpAddr>,

    /// Port to listen on, overriding the configuration
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match find_config_file(cli.config)? {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    if let Some(address) = cli.listen {
        config.listen.set_ip(address);
    }
    if let Some(port) = cli.port {
        config.listen.set_port(port);
    }
    config.validate()?;

    Controller::new(config).run().await
}

/// Find the configuration file using the following precedence:
/// 1. `--config`
/// 2. `WAYMARK_CONFIG` environment variable
/// 3. ./waymark.toml (current working directory)
/// 4. /etc/waymark/waymark.toml (system-wide config)
///
/// With none of them present the built-in defaults are used.
fn find_config_file(explicit: Option<PathBuf>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        return Ok(Some(path));
    }

    if let Ok(env_path) = std::env::var("WAYMARK_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        anyhow::bail!(
            "WAYMARK_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    Ok(["./waymark.toml", "/etc/waymark/waymark.toml"]
        .into_iter()
        .map(Path::new)
        .find(|path| path.exists())
        .map(Path::to_path_buf))
}
