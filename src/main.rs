use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

mod cli;
mod config;
mod detect;
mod media;
mod net;
mod sign;
#[cfg(test)]
mod testutil;
mod utils;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: cli::Command,
}

fn get_config_path(args: &Args) -> Option<String> {
    if let Some(path) = &args.config {
        return Some(path.clone());
    }

    if let Ok(path) = std::env::var("CONFIG_FILE") {
        return Some(path);
    }

    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        let config_path = format!("{}/vidgrab/config.toml", xdg_config_home);
        if std::path::Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let config_path = format!("{}/.config/vidgrab/config.toml", home.display());
        if std::path::Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    None
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let config_path = get_config_path(&args);
    let config = match &config_path {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::default(),
    };

    if config.get_logging_format() == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match &config_path {
        Some(path) => info!("Loaded config from: {}", path),
        None => info!("No config file found, using built-in defaults"),
    }
    for name in config.unknown_platforms() {
        warn!("Ignoring config for unknown platform: {}", name);
    }

    cli::run(args.command, config).await
}
