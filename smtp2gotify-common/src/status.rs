use core::fmt::{self, Display, Formatter};

macro_rules! statuses {
    ($($name:ident = $code:literal),+ $(,)?) => {
        /// SMTP reply codes used by the relay (RFC 5321 Section 4.2, RFC 4954).
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
        pub enum Status {
            $($name,)+
            Unknown(u32),
        }

        impl From<u32> for Status {
            fn from(value: u32) -> Self {
                match value {
                    $($code => Self::$name,)+
                    _ => Self::Unknown(value),
                }
            }
        }

        impl From<Status> for u32 {
            fn from(value: Status) -> Self {
                match value {
                    $(Status::$name => $code,)+
                    Status::Unknown(v) => v,
                }
            }
        }
    };
}

statuses! {
    HelpMessage = 214,
    ServiceReady = 220,
    GoodBye = 221,
    AuthSucceeded = 235,
    Ok = 250,
    AuthContinue = 334,
    StartMailInput = 354,
    Unavailable = 421,
    InsufficientStorage = 452,
    SyntaxError = 500,
    ParameterError = 501,
    NotImplemented = 502,
    InvalidCommandSequence = 503,
    ParameterNotImplemented = 504,
    AuthRequired = 530,
    AuthFailed = 535,
    ExceededStorage = 552,
    TransactionFailed = 554,
}

impl Status {
    /// Checks if the status is a permanent rejection
    #[must_use]
    pub fn is_permanent(self) -> bool {
        u32::from(self) >= 500
    }

    /// Checks if the status is a temporary rejection
    #[must_use]
    pub fn is_temporary(self) -> bool {
        (400..500).contains(&u32::from(self))
    }

    /// Checks if the status asks the client to continue (3yz)
    #[must_use]
    pub fn is_intermediate(self) -> bool {
        (300..400).contains(&u32::from(self))
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", u32::from(*self))
    }
}

#[cfg(test)]
mod test {
    use super::Status;

    #[test]
    fn status() {
        assert!(Status::AuthFailed.is_permanent());
        assert!(!Status::AuthFailed.is_temporary());

        assert!(Status::Unavailable.is_temporary());
        assert!(!Status::Unavailable.is_permanent());

        assert!(Status::AuthContinue.is_intermediate());
        assert!(Status::StartMailInput.is_intermediate());
        assert!(!Status::Ok.is_intermediate());

        assert_eq!(Status::from(530), Status::AuthRequired);
        assert_eq!(u32::from(Status::TransactionFailed), 554);
        assert_eq!(Status::from(299), Status::Unknown(299));
        assert_eq!(Status::AuthSucceeded.to_string(), "235");
    }
}
