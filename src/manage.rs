//! Operator maintenance commands, run against the database file directly.
#![allow(dead_code)]

use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;

#[macro_use]
mod utils;
#[macro_use]
mod error;
mod api;
mod context;
mod database;
mod date_format;
mod media;
mod messages;
mod users;
mod validators;

use messages::Message;
use users::User;

#[derive(Parser)]
#[clap(version, about = "Maintenance commands for the chat database")]
struct Opts {
    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Create the database file and apply pending migrations.
    Init,
    /// Hard-delete messages older than the retention window.
    CleanupMessages(CleanupMessages),
    /// Remove users not seen for a long time.
    CleanupUsers(CleanupUsers),
    /// Print room totals and the most active authors.
    Stats,
}

#[derive(Args)]
struct CleanupMessages {
    #[clap(long, default_value_t = 90)]
    days: i64,
}

#[derive(Args)]
struct CleanupUsers {
    #[clap(long, default_value_t = 30)]
    days: i64,
}

fn main() -> Result<(), anyhow::Error> {
    dotenv::dotenv().ok();
    let opts: Opts = Opts::parse();

    let path = context::database_path();
    let conn = Connection::open(path)?;
    database::migrate(&conn)?;

    match opts.subcmd {
        SubCommand::Init => {
            println!("Database ready at {}", path);
        }
        SubCommand::CleanupMessages(CleanupMessages { days }) => {
            let removed = Message::cleanup_old(&conn, days)?;
            println!("Removed {} messages older than {} days", removed, days);
        }
        SubCommand::CleanupUsers(CleanupUsers { days }) => {
            let removed = User::cleanup_inactive(&conn, days)?;
            println!("Removed {} users not seen for {} days", removed, days);
        }
        SubCommand::Stats => {
            let users = User::all(&conn)?;
            let stats = Message::stats(&conn)?;
            println!("Users: {}", users.len());
            println!("Messages: {}", stats.total_messages);
            println!("Most active:");
            for author in stats.top_users {
                println!("  {:<32} {}", author.username, author.count);
            }
        }
    }
    Ok(())
}
