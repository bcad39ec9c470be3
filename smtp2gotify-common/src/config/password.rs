//! Recognising the stored password hash.
//!
//! Two formats are accepted: Argon2 PHC strings, as printed by
//! `smtp2gotify hash-password`, and bcrypt hashes in modular crypt format
//! (`$2a$`, `$2b$` or `$2y$`), which existing deployments configured through
//! `SMTP_PASSWORD` carry.

use argon2::PasswordHash;

const BCRYPT_PREFIXES: [&str; 3] = ["$2a$", "$2b$", "$2y$"];

/// bcrypt's own base64 alphabet.
const BCRYPT_ALPHABET: &[u8] = b"./ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// 22 characters of salt followed by 31 of digest.
const BCRYPT_DIGEST_LEN: usize = 53;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    Argon2,
    Bcrypt,
}

impl HashScheme {
    ///
    /// Work out which scheme produced `hash`
    ///
    /// # Errors
    /// A description of the problem, if `hash` is neither a PHC string nor a
    /// well formed bcrypt hash
    ///
    pub fn detect(hash: &str) -> Result<Self, String> {
        if BCRYPT_PREFIXES.iter().any(|prefix| hash.starts_with(prefix)) {
            return check_bcrypt(&hash[4..]).map(|()| Self::Bcrypt);
        }

        PasswordHash::new(hash)
            .map(|_| Self::Argon2)
            .map_err(|err| err.to_string())
    }
}

/// Check the `NN$<salt><digest>` part of a bcrypt hash.
fn check_bcrypt(rest: &str) -> Result<(), String> {
    let Some((cost, digest)) = rest.split_once('$') else {
        return Err(String::from("bcrypt hash has no cost"));
    };

    if cost.len() != 2 || !cost.parse::<u32>().is_ok_and(|cost| (4..=31).contains(&cost)) {
        return Err(format!("invalid bcrypt cost {cost:?}"));
    }

    if digest.len() != BCRYPT_DIGEST_LEN || !digest.bytes().all(|b| BCRYPT_ALPHABET.contains(&b)) {
        return Err(format!(
            "bcrypt salt and digest must be {BCRYPT_DIGEST_LEN} characters"
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const BCRYPT: &str = "$2a$10$N9qo8uLOickgx2ZMRZoMyeIjZAgcfl7p92ldGxad68LJZdL17lhWy";

    #[test]
    fn detects_schemes() {
        assert_eq!(
            HashScheme::detect(
                "$argon2id$v=19$m=8,t=1,p=1$c29tZXNhbHQ$4LiG5O9ypNPj1zO6Lc6trsjWk9Cw8tqgyL7lbOjF0zE"
            ),
            Ok(HashScheme::Argon2)
        );
        assert_eq!(HashScheme::detect(BCRYPT), Ok(HashScheme::Bcrypt));
        assert_eq!(
            HashScheme::detect(&BCRYPT.replacen("$2a$", "$2y$", 1)),
            Ok(HashScheme::Bcrypt)
        );
    }

    #[test]
    fn rejects_malformed_bcrypt() {
        assert!(HashScheme::detect("$2a$10$tooshort").is_err());
        assert!(HashScheme::detect(&BCRYPT.replacen("$10$", "$99$", 1)).is_err());
        assert!(HashScheme::detect(&BCRYPT.replacen("$10$", "$1$", 1)).is_err());
        assert!(HashScheme::detect(&BCRYPT.replacen('N', "!", 1)).is_err());
        assert!(HashScheme::detect("$2a$").is_err());
        assert!(HashScheme::detect("test123").is_err());
    }
}
