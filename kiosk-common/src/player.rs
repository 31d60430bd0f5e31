//! Player identity sanitizing
//!
//! Player names end up on game command lines and in save-file names, so only
//! a conservative character set survives.

use crate::{Error, Result};

/// Maximum length of a sanitized player name
pub const MAX_PLAYER_NAME_LEN: usize = 20;

/// Sanitize a raw player name into a safe identity string
///
/// - Leading/trailing whitespace is trimmed
/// - Inner whitespace becomes `_`
/// - Anything outside `[A-Za-z0-9_-]` is dropped
/// - Result is truncated to [`MAX_PLAYER_NAME_LEN`] characters
///
/// Returns `Error::InvalidInput` if nothing usable remains.
pub fn sanitize_player_name(raw: &str) -> Result<String> {
    let sanitized: String = raw
        .trim()
        .chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                Some(c)
            } else if c.is_whitespace() {
                Some('_')
            } else {
                None
            }
        })
        .take(MAX_PLAYER_NAME_LEN)
        .collect();

    if sanitized.is_empty() {
        return Err(Error::InvalidInput(format!(
            "player name {:?} has no usable characters",
            raw
        )));
    }

    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name_unchanged() {
        assert_eq!(sanitize_player_name("Ada").unwrap(), "Ada");
        assert_eq!(sanitize_player_name("player_1-x").unwrap(), "player_1-x");
    }

    #[test]
    fn test_whitespace_and_symbols() {
        assert_eq!(sanitize_player_name("  Ada Lovelace ").unwrap(), "Ada_Lovelace");
        assert_eq!(sanitize_player_name("../../etc/passwd").unwrap(), "etcpasswd");
        assert_eq!(sanitize_player_name("rm -rf; $(x)").unwrap(), "rm_-rf_x");
    }

    #[test]
    fn test_truncated_to_max_len() {
        let long = "a".repeat(64);
        let name = sanitize_player_name(&long).unwrap();
        assert_eq!(name.len(), MAX_PLAYER_NAME_LEN);
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(sanitize_player_name(""), Err(Error::InvalidInput(_))));
        assert!(matches!(sanitize_player_name("   "), Err(Error::InvalidInput(_))));
        assert!(matches!(sanitize_player_name("!!!"), Err(Error::InvalidInput(_))));
    }
}
