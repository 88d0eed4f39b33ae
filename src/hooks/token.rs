//! Token generation shared by the hook service, the HTTP layer and the
//! `admin-token` CLI command.
//!
//! Format: `<hex unix nanos>-<hex 16 random bytes>`.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::error;

use crate::logging::targets;
/// Number of random bytes in a token.
pub const TOKEN_RANDOM_BYTES: usize = 16;

/// Generate a new secret token from the OS random source.
pub fn generate_token() -> String {
    generate_token_with(|buf| getrandom::fill(buf))
}

/// Generate a token with a caller-supplied random source.
///
/// If the source fails, the random half falls back to the hex-encoded
/// zero-padded timestamp. The token is weaker but still unique per call.
pub fn generate_token_with<F>(fill: F) -> String
where
    F: FnOnce(&mut [u8]) -> Result<(), getrandom::Error>,
{
    let timestamp = unix_nanos();

    let mut random = vec![0u8; TOKEN_RANDOM_BYTES];
    if let Err(e) = fill(&mut random) {
        error!(target: targets::HOOKS, error = %e, "failed to generate random bytes for token");
        random = format!("{:016x}", timestamp).into_bytes();
    }

    format!("{:x}-{}", timestamp, hex::encode(random))
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_format() {
        let token = generate_token();
        let (ts, random) = token.split_once('-').unwrap();
        assert!(u128::from_str_radix(ts, 16).is_ok());
        assert_eq!(random.len(), TOKEN_RANDOM_BYTES * 2);
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_differ() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn test_fallback_when_random_source_fails() {
        let token = generate_token_with(|_| Err(getrandom::Error::UNSUPPORTED));
        let (ts, random) = token.split_once('-').unwrap();
        // Fallback is the hex encoding of the ASCII timestamp digits
        let decoded = String::from_utf8(hex::decode(random).unwrap()).unwrap();
        let expected = format!("{:016x}", u128::from_str_radix(ts, 16).unwrap());
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_uses_supplied_random_bytes() {
        let token = generate_token_with(|buf| {
            buf.fill(0xab);
            Ok(())
        });
        assert!(token.ends_with(&"ab".repeat(TOKEN_RANDOM_BYTES)));
    }
}
