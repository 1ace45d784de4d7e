#[macro_use]
extern crate log;

mod cli;

use anyhow::Context;
use clap::Parser;
use relay_command_lib::{
    config::{Config, FileConfig},
    logging::setup_logging,
};
use relay_lib::server::Server;

use crate::cli::{Args, SubCmd};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.cmd {
        SubCmd::Start {
            config,
            listen,
            target,
        } => start(&config, listen, target),
        SubCmd::CheckConfig { config } => check_config(&config),
    }
}

fn load_config(path: &str, listen: Option<String>, target: Option<String>) -> anyhow::Result<Config> {
    let mut file_config = FileConfig::load_from_path(path)
        .with_context(|| format!("could not load configuration from {path}"))?;
    if listen.is_some() {
        file_config.listen_address = listen;
    }
    if target.is_some() {
        file_config.target = target;
    }
    file_config
        .into_config()
        .with_context(|| format!("invalid configuration in {path}"))
}

fn start(path: &str, listen: Option<String>, target: Option<String>) -> anyhow::Result<()> {
    let config = load_config(path, listen, target)?;
    setup_logging(&config.log_target, &config.log_level, "RELAY")
        .context("could not set up logging")?;
    info!("starting relay with configuration from {}", path);

    let mut server = Server::new(config).context("could not create the relay")?;
    server.run().context("relay event loop failure")?;
    info!("relay stopped");
    Ok(())
}

fn check_config(path: &str) -> anyhow::Result<()> {
    let config = load_config(path, None, None)?;
    println!("{config:#?}");
    Ok(())
}
