//! Credential checks for `AUTH PLAIN`.

use argon2::{
    Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{self, SaltString, rand_core::OsRng},
};
use smtp2gotify_common::config::HashScheme;
use thiserror::Error;

/// Mechanisms offered in the EHLO reply and accepted by `AUTH`.
pub const MECHANISMS: [&str; 1] = ["PLAIN"];

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid password hash: {0}")]
pub struct InvalidHash(String);

/// The single account allowed to submit mail.
///
/// Only a hash of the password is kept, either an Argon2 PHC string or a
/// bcrypt hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password_hash: String,
    scheme: HashScheme,
}

impl Credentials {
    ///
    /// # Errors
    /// If `password_hash` is neither a PHC string nor a bcrypt hash
    ///
    pub fn new(
        username: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Result<Self, InvalidHash> {
        let password_hash = password_hash.into();
        let scheme = HashScheme::detect(&password_hash).map_err(InvalidHash)?;

        Ok(Self {
            username: username.into(),
            password_hash,
            scheme,
        })
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub const fn scheme(&self) -> HashScheme {
        self.scheme
    }

    /// Check a username and password pair.
    ///
    /// The password is always run through the hash, whether or not the
    /// username matches, so both kinds of failure cost the same. This is
    /// slow on purpose; async callers should move it off the runtime.
    #[must_use]
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let password_ok = match self.scheme {
            HashScheme::Argon2 => PasswordHash::new(&self.password_hash).is_ok_and(|hash| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &hash)
                    .is_ok()
            }),
            HashScheme::Bcrypt => bcrypt::verify(password, &self.password_hash).unwrap_or(false),
        };

        let username_ok = self.username == username;

        password_ok & username_ok
    }
}

///
/// Hash a password with the default Argon2id parameters
///
/// # Errors
/// If hashing fails
///
pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    hash_password_with(password, Params::default())
}

///
/// Hash a password with explicit Argon2id parameters
///
/// # Errors
/// If the parameters are rejected or hashing fails
///
pub fn hash_password_with(password: &str, params: Params) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    Ok(argon2.hash_password(password.as_bytes(), &salt)?.to_string())
}
