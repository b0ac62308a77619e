//! UUIDv7 utilities for time-ordered identifiers.
//!
//! UUIDv7 embeds a millisecond-precision timestamp in the first 48 bits,
//! so ids generated later sort lexicographically after earlier ones. Job,
//! object, and chunk rows all use v7 ids.

use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_v7_is_version_7() {
        let id = new_v7();
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn test_new_v7_is_time_ordered() {
        let a = new_v7();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_v7();
        assert!(a < b);
    }
}
