//! Ping messages exchanged by the echo tools
//!
//! The client opens with `uid:<id> time:<unix secs> no:1`; every echo that
//! comes back is answered with the same message, its counter bumped.

/// Opening message of a client session
pub fn first_ping(uid: u32, unix_secs: u64) -> String {
    format!("uid:{} time:{} no:1", uid, unix_secs)
}

/// Reply to an echoed ping, or `None` if it is not one
pub fn next_ping(echo: &str) -> Option<String> {
    let (head, last) = echo.rsplit_once(' ').unwrap_or(("", echo));
    let no: u64 = last.strip_prefix("no:")?.parse().ok()?;
    let next = format!("no:{}", no.checked_add(1)?);
    if head.is_empty() {
        Some(next)
    } else {
        Some(format!("{} {}", head, next))
    }
}

/// Counter carried by a ping
pub fn ping_number(message: &str) -> Option<u64> {
    message.rsplit(' ').next()?.strip_prefix("no:")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_sequence() {
        let first = first_ping(12345, 1_700_000_000);
        assert_eq!(first, "uid:12345 time:1700000000 no:1");
        assert_eq!(ping_number(&first), Some(1));

        let second = next_ping(&first).unwrap();
        assert_eq!(second, "uid:12345 time:1700000000 no:2");
    }

    #[test]
    fn test_bare_counter() {
        assert_eq!(next_ping("no:9").as_deref(), Some("no:10"));
    }

    #[test]
    fn test_not_a_ping() {
        assert_eq!(next_ping("hello world"), None);
        assert_eq!(next_ping("no:abc"), None);
        assert_eq!(ping_number(""), None);
    }
}
