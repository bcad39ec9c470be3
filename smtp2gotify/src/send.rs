//! Sends the test message used to check that the relay works.

use clap::Args;

use crate::client::{Result, SmtpClient};

pub const TEST_SUBJECT: &str = "smtp2gotify Test Message";

const TEST_BODY: &str = "This is a test message sent to smtp2gotify via SMTP and then relayed \
    to Gotify. If you're seeing this, that means things are working!";

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct SendArgs {
    /// Sender email address
    #[arg(long, default_value = "someone@example.com")]
    pub from: String,

    /// Recipient email address
    #[arg(long, default_value = "someone-else@example.com")]
    pub to: String,

    /// SMTP host address
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// SMTP port
    #[arg(long, default_value_t = 25)]
    pub port: u16,

    /// SMTP username
    #[arg(long, default_value = "admin")]
    pub username: String,

    /// SMTP password
    #[arg(long, default_value = "test123")]
    pub password: String,
}

/// The message sent by [`send_test_message`].
#[must_use]
pub fn test_message(from: &str, to: &str) -> String {
    format!("From: {from}\r\nTo: {to}\r\nSubject: {TEST_SUBJECT}\r\n\r\n{TEST_BODY}\r\n")
}

/// The notification body Gotify should end up showing for the test message.
#[must_use]
pub fn expected_body() -> String {
    format!("{TEST_BODY}\r\n")
}

///
/// Submit the test message through the relay at `args.host:args.port`
///
/// # Errors
/// If the connection fails or the relay refuses any step
///
#[tracing::instrument(level = tracing::Level::TRACE, skip_all, fields(host = %args.host, port = args.port), err)]
pub async fn send_test_message(args: &SendArgs) -> Result<()> {
    let mut client = SmtpClient::connect(&format!("{}:{}", args.host, args.port)).await?;

    client.ehlo("localhost").await?;
    client.auth_plain(&args.username, &args.password).await?;
    client.mail_from(&args.from).await?;
    client.rcpt_to(&args.to).await?;
    client.data(&test_message(&args.from, &args.to)).await?;
    client.quit().await?;

    Ok(())
}
