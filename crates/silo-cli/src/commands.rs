use std::sync::Arc;

use anyhow::Context;
use silo_agent::{AgentConfig, AgentListener};
use silo_server::{Server, ServerConfig};
use silo_store::FsStore;

use crate::cli::{AgentArgs, Cli, Command, ServeArgs};

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => cmd_serve(args).await,
        Command::Agent(args) => cmd_agent(args).await,
    }
}

async fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(root) = args.root {
        config.repository_root = root;
    }

    let store = FsStore::open(&config.repository_root)
        .with_context(|| format!("opening repository at {}", config.repository_root.display()))?;
    Server::new(config, Arc::new(store)).serve().await?;
    Ok(())
}

async fn cmd_agent(args: AgentArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => AgentConfig::from_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => AgentConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(key) = args.public_key {
        config.public_key_hex = key;
    }
    // Fail on a malformed key before binding the socket.
    config.public_key()?;

    AgentListener::new(config).serve().await?;
    Ok(())
}
