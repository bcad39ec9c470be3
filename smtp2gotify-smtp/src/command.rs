use core::fmt::{self, Display, Formatter};

use ahash::AHashMap;
use mailparse::MailAddr;

/// ESMTP parameters on `MAIL FROM` (RFC 5321 Section 3.3), e.g. `SIZE=1234`
/// or `BODY=8BITMIME`. Keys are stored upper-cased.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct MailParameters {
    params: AHashMap<String, Option<String>>,
}

impl MailParameters {
    /// Parses parameter tokens in the form `KEY=VALUE` or `FLAG`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A parameter appears multiple times
    /// - SIZE parameter has an invalid value (non-numeric or zero)
    pub fn from_params_str(params_str: &str) -> Result<Self, String> {
        let mut params = Self::default();

        for token in params_str.split_whitespace() {
            let (key, value) = match token.split_once('=') {
                Some((key, value)) => (key.to_ascii_uppercase(), Some(value.to_string())),
                None => (token.to_ascii_uppercase(), None),
            };

            if params.params.contains_key(&key) {
                return Err(format!("Duplicate parameter '{key}' not allowed"));
            }

            if key == "SIZE" {
                match value.as_deref().map(str::parse::<usize>) {
                    Some(Ok(0)) => return Err(String::from("SIZE=0 is not allowed")),
                    Some(Ok(_)) => {}
                    _ => {
                        return Err(format!(
                            "Invalid SIZE value: {}",
                            value.as_deref().unwrap_or_default()
                        ));
                    }
                }
            }

            params.params.insert(key, value);
        }

        Ok(params)
    }

    /// Gets a parameter value by key (case-insensitive).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(&key.to_ascii_uppercase())?.as_deref()
    }

    /// The size the client declared for its message, if it did.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        self.get("SIZE")?.parse().ok()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl Display for MailParameters {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.params {
            if !first {
                f.write_str(" ")?;
            }
            first = false;

            match v {
                None => f.write_str(k)?,
                Some(val) => write!(f, "{k}={val}")?,
            }
        }
        Ok(())
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum HeloVariant {
    Ehlo(String),
    Helo(String),
}

impl HeloVariant {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Ehlo(id) | Self::Helo(id) => id,
        }
    }
}

impl Display for HeloVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ehlo(_) => "EHLO",
            Self::Helo(_) => "HELO",
        })
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Command {
    Helo(HeloVariant),
    /// `AUTH <mechanism> [initial-response]`. The mechanism is upper-cased.
    Auth {
        mechanism: String,
        initial: Option<String>,
    },
    /// An empty sender is the null reverse-path (`MAIL FROM:<>`).
    MailFrom(String, MailParameters),
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Help,
    Quit,
    /// A known command with bad arguments.
    Invalid(String),
    /// Not a command this server knows.
    Unrecognised(String),
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(v) => write!(fmt, "{v} {}", v.id()),
            // The initial response carries the password
            Self::Auth { mechanism, .. } => write!(fmt, "AUTH {mechanism}"),
            Self::MailFrom(sender, params) if params.is_empty() => {
                write!(fmt, "MAIL FROM:<{sender}>")
            }
            Self::MailFrom(sender, params) => write!(fmt, "MAIL FROM:<{sender}> {params}"),
            Self::RcptTo(rcpt) => write!(fmt, "RCPT TO:<{rcpt}>"),
            Self::Data => fmt.write_str("DATA"),
            Self::Rset => fmt.write_str("RSET"),
            Self::Noop => fmt.write_str("NOOP"),
            Self::Help => fmt.write_str("HELP"),
            Self::Quit => fmt.write_str("QUIT"),
            Self::Invalid(s) | Self::Unrecognised(s) => fmt.write_str(s),
        }
    }
}

/// The single mailbox in `addr`, e.g. `<user@example.com>` or `user@example.com`.
fn mailbox(addr: &str) -> Result<String, Command> {
    let parsed = mailparse::addrparse(addr).map_err(|err| Command::Invalid(err.to_string()))?;

    match parsed.iter().next() {
        Some(MailAddr::Single(single)) if parsed.len() == 1 => Ok(single.addr.clone()),
        _ => Err(Command::Invalid(format!("Expected a single mailbox in {addr}"))),
    }
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &line[prefix.len()..])
}

impl TryFrom<&str> for Command {
    type Error = Self;

    fn try_from(command: &str) -> Result<Self, Self::Error> {
        let trimmed = command.trim();

        if let Some(rest) = strip_prefix_ignore_case(trimmed, "MAIL FROM:") {
            // Format: MAIL FROM:<addr> [param1=value1] [param2=value2] ...
            let rest = rest.trim();
            let (addr, params) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));

            if addr.is_empty() {
                return Err(Self::Invalid(String::from("Expected a sender address")));
            }

            let params = MailParameters::from_params_str(params).map_err(Self::Invalid)?;

            // mailparse rejects the null sender
            if addr == "<>" {
                return Ok(Self::MailFrom(String::new(), params));
            }

            Ok(Self::MailFrom(mailbox(addr)?, params))
        } else if let Some(rest) = strip_prefix_ignore_case(trimmed, "RCPT TO:") {
            let rest = rest.trim();
            let addr = rest.split_whitespace().next().unwrap_or_default();

            if addr.is_empty() {
                return Err(Self::Invalid(String::from("Expected a recipient address")));
            }

            Ok(Self::RcptTo(mailbox(addr)?))
        } else {
            let (verb, argument) = trimmed
                .split_once(char::is_whitespace)
                .map_or((trimmed, ""), |(verb, argument)| (verb, argument.trim()));

            match verb.to_ascii_uppercase().as_str() {
                "EHLO" | "HELO" if argument.is_empty() => {
                    Err(Self::Invalid(format!("Expected hostname in {trimmed}")))
                }
                "EHLO" => Ok(Self::Helo(HeloVariant::Ehlo(argument.to_string()))),
                "HELO" => Ok(Self::Helo(HeloVariant::Helo(argument.to_string()))),
                "AUTH" => {
                    let mut parts = argument.split_whitespace();
                    match (parts.next(), parts.next(), parts.next()) {
                        (Some(mechanism), initial, None) => Ok(Self::Auth {
                            mechanism: mechanism.to_ascii_uppercase(),
                            initial: initial.map(String::from),
                        }),
                        _ => Err(Self::Invalid(String::from(
                            "Expected AUTH <mechanism> [initial-response]",
                        ))),
                    }
                }
                "DATA" => Ok(Self::Data),
                "RSET" => Ok(Self::Rset),
                "NOOP" => Ok(Self::Noop),
                "HELP" => Ok(Self::Help),
                "QUIT" => Ok(Self::Quit),
                _ => Err(Self::Unrecognised(trimmed.to_string())),
            }
        }
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = Self;

    fn try_from(command: &[u8]) -> Result<Self, Self::Error> {
        std::str::from_utf8(command).map_or_else(
            |_| Err(Self::Invalid("Unable to interpret command".to_string())),
            Self::try_from,
        )
    }
}

impl TryFrom<String> for Command {
    type Error = Self;

    fn try_from(command: String) -> Result<Self, Self::Error> {
        Self::try_from(command.as_str())
    }
}
