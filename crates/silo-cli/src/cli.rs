use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "silo", about = "Silo deduplicating repository server", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the repository server
    Serve(ServeArgs),
    /// Run the agent control-plane listener
    Agent(AgentArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// TOML configuration file; flags below override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub bind: Option<std::net::SocketAddr>,
    /// Directory holding chunks, objects, indexes and the lock slot
    #[arg(long)]
    pub root: Option<PathBuf>,
}

#[derive(Args)]
pub struct AgentArgs {
    /// TOML configuration file; flags below override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub bind: Option<std::net::SocketAddr>,
    /// Hex-encoded public key to present in identify replies
    #[arg(long)]
    pub public_key: Option<String>,
}
