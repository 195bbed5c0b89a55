// src/utils/ids.rs
//! Run identity generation

use rand::Rng;

/// Fresh run uid: 128 random bits rendered as 32 lowercase hex characters.
pub fn new_uid() -> String {
    let bits: u128 = rand::thread_rng().gen();
    format!("{:032x}", bits)
}

/// Fresh event id, sortable by creation time.
pub fn new_event_id() -> String {
    ulid::Ulid::new().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uid_shape() {
        let uid = new_uid();
        assert_eq!(uid.len(), 32);
        assert!(uid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_ten_thousand_uids_are_distinct() {
        let ids: HashSet<String> = (0..10_000).map(|_| new_uid()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_event_ids_differ() {
        assert_ne!(new_event_id(), new_event_id());
    }
}
