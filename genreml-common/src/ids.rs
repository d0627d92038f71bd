//! Identifier utilities

use uuid::Uuid;

/// Generate a work item uid (UUIDv4, 32 hex chars without dashes)
pub fn new_uid() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generate a batch id (hyphenated UUIDv4)
pub fn new_batch_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_has_no_dashes() {
        let uid = new_uid();
        assert_eq!(uid.len(), 32);
        assert!(!uid.contains('-'));
    }

    #[test]
    fn test_uids_are_unique() {
        assert_ne!(new_uid(), new_uid());
        assert_ne!(new_batch_id(), new_batch_id());
    }

    #[test]
    fn test_batch_id_parses_as_uuid() {
        assert!(Uuid::parse_str(&new_batch_id()).is_ok());
    }
}
