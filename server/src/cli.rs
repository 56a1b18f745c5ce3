use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(about = "Episodic course platform server.")]
pub struct Cli {
    #[arg(env = "EPISODIC_DATABASE_URL", short, long)]
    pub database_url: String,
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the HTTP API.
    Http {
        #[arg(env = "EPISODIC_SERVER_ADDRESS")]
        address: std::net::SocketAddr,
    },
    Db(DbCommand),
}

#[derive(Debug, Parser)]
pub struct DbCommand {
    #[command(subcommand)]
    pub cmd: DbSubCommand,
}

#[derive(Debug, Subcommand)]
pub enum DbSubCommand {
    Reset,
    Migrate,
}
