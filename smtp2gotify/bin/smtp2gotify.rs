#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::io::BufRead;

use clap::{Parser, Subcommand};
use smtp2gotify::controller::Relay;
use smtp2gotify_common::{config::Config, logging};

/// Relay mail submitted over SMTP to a Gotify server
#[derive(Parser, Debug)]
#[command(name = "smtp2gotify")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relay (the default)
    Serve,
    /// Print an Argon2id hash of a password, for `smtp.password_hash`
    HashPassword {
        /// Password to hash, read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            logging::init();
            Relay::new(Config::load()?).run().await
        }
        Commands::HashPassword { password } => {
            let password = match password {
                Some(password) => password,
                None => {
                    let mut line = String::new();
                    std::io::stdin().lock().read_line(&mut line)?;
                    line.trim_end_matches(['\r', '\n']).to_string()
                }
            };

            anyhow::ensure!(!password.is_empty(), "Refusing to hash an empty password");

            println!("{}", smtp2gotify_smtp::auth::hash_password(&password)?);
            Ok(())
        }
    }
}
