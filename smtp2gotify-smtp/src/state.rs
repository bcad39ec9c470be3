//! Command sequencing for a connection.
//!
//! [`Phase`] tracks where the client is in the SMTP dialogue and decides
//! whether a command may be issued at all. Whether the session then accepts it
//! (authentication, limits) is a separate question answered by the
//! [`Session`](crate::session::Session).

use core::fmt::{self, Display, Formatter};

use smtp2gotify_common::traits::fsm::FiniteStateMachine;

use crate::command::{Command, HeloVariant};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Connected, greeting not yet received.
    #[default]
    Connect,
    /// HELO/EHLO done, no transaction open.
    Greeted,
    /// `MAIL` accepted.
    Mail,
    /// At least one `RCPT` accepted.
    Rcpt,
    Closed,
}

/// Something the session accepted, moving the dialogue along.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Greet(HeloVariant),
    Mail,
    Rcpt,
    /// The message was read and handed off.
    Delivered,
    /// The transaction was abandoned (`RSET`, or a failed `DATA`).
    Reset,
    Quit,
}

/// What the client told us about itself.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub client: String,
    pub extended: bool,
}

impl Display for Phase {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::Connect => "Connect",
            Self::Greeted => "Greeted",
            Self::Mail => "MAIL",
            Self::Rcpt => "RCPT",
            Self::Closed => "Closed",
        })
    }
}

impl Phase {
    ///
    /// Whether `command` is allowed at this point of the dialogue
    ///
    /// # Errors
    /// The text of the `503` reply when it isn't
    ///
    pub fn permits(self, command: &Command) -> Result<(), &'static str> {
        match (self, command) {
            (Self::Closed, _) => Err("Connection is closing"),
            (Self::Connect, Command::Auth { .. } | Command::MailFrom(..)) => {
                Err("Send HELO/EHLO first")
            }
            (Self::Mail | Self::Rcpt, Command::Auth { .. }) => {
                Err("AUTH not permitted during a mail transaction")
            }
            (Self::Mail | Self::Rcpt, Command::MailFrom(..)) => Err("Nested MAIL command"),
            (Self::Connect | Self::Greeted, Command::RcptTo(_)) => Err("Need MAIL before RCPT"),
            (Self::Connect | Self::Greeted | Self::Mail, Command::Data) => {
                Err("Need RCPT before DATA")
            }
            _ => Ok(()),
        }
    }
}

impl FiniteStateMachine for Phase {
    type Input = Step;
    type Context = Greeting;

    fn transition(self, input: Step, context: &mut Greeting) -> Self {
        match (self, input) {
            (Self::Closed, _) | (_, Step::Quit) => Self::Closed,
            (_, Step::Greet(variant)) => {
                context.extended = matches!(variant, HeloVariant::Ehlo(_));
                context.client = match variant {
                    HeloVariant::Ehlo(id) | HeloVariant::Helo(id) => id,
                };
                Self::Greeted
            }
            (Self::Greeted, Step::Mail) => Self::Mail,
            (Self::Mail | Self::Rcpt, Step::Rcpt) => Self::Rcpt,
            (Self::Rcpt, Step::Delivered) | (Self::Mail | Self::Rcpt, Step::Reset) => {
                Self::Greeted
            }
            (phase, _) => phase,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
