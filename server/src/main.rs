use clap::Parser;
use cli::{Cli, Command};

mod auth;
mod cli;
mod config;
mod courses;
mod db;
mod email;
mod error;
mod multipart;
mod progress;
mod retry;
mod server;
mod storage;
mod uploads;
mod webhooks;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Cli::parse();

    match args.cmd {
        Command::Http { address } => server::run(address, &args.database_url).await?,
        Command::Db(db_cmd) => match db_cmd.cmd {
            cli::DbSubCommand::Migrate => db::migrate(&args.database_url).await?,
            cli::DbSubCommand::Reset => db::reset(&args.database_url).await?,
        },
    }
    Ok(())
}
