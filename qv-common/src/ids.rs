//! Identifier, token and timestamp utilities

use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use std::fmt::Write;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a sortable row identifier: `<prefix>-<unix_millis><6 base36 chars>`
///
/// ```
/// let id = qv_common::ids::generate_id("proj");
/// assert!(id.starts_with("proj-"));
/// ```
pub fn generate_id(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{}-{}{}", prefix, millis, suffix)
}

/// Generate an opaque secret token: `<prefix>_<64 hex chars>` (32 random bytes)
pub fn generate_token(prefix: &str) -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    let mut token = String::with_capacity(prefix.len() + 1 + 64);
    token.push_str(prefix);
    token.push('_');
    for b in bytes {
        // Writing to a String cannot fail
        let _ = write!(token, "{:02x}", b);
    }
    token
}

/// Current UTC time
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp the way it is stored in the database (RFC 3339, millis, `Z`)
pub fn to_db_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time formatted for storage
pub fn now_db() -> String {
    to_db_timestamp(now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_shape() {
        let id = generate_id("msg");
        let rest = id.strip_prefix("msg-").unwrap();
        assert!(rest.len() >= 13 + 6);
        assert!(rest.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_generate_id_unique() {
        let a = generate_id("proj");
        let b = generate_id("proj");
        assert_ne!(a, b);
    }

    #[test]
    fn test_generate_token_shape() {
        let token = generate_token("qvs");
        assert_eq!(token.len(), 4 + 64);
        assert!(token[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_db_timestamps_sort_lexicographically() {
        let earlier = to_db_timestamp(Utc::now());
        std::thread::sleep(std::time::Duration::from_millis(5));
        let later = now_db();
        assert!(later > earlier);
        assert!(later.ends_with('Z'));
    }
}
