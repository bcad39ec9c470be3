//! Sends a test message through a running relay.

use clap::Parser;
use smtp2gotify::send::{SendArgs, send_test_message};
use smtp2gotify_common::logging;

/// Send a test message to smtp2gotify
#[derive(Parser, Debug)]
#[command(name = "smtp2gotify-send")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    send: SendArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cli = Cli::parse();
    send_test_message(&cli.send).await?;

    println!("Message sent successfully!");
    Ok(())
}
