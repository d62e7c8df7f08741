//! Room key derivation.
//!
//! The relay routes presence and content by room, keyed on organization and
//! note. The same derivation runs on the client and the server, so the format
//! must stay in lockstep on both sides.

/// Derive the canonical room key for a note within an organization.
///
/// Collision-free as long as ids cannot contain the separator characters.
pub fn room_key(org_id: &str, note_id: &str) -> String {
    format!("org-{}:note-{}", org_id, note_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_stable_key() {
        assert_eq!(room_key("alpha", "1"), "org-alpha:note-1");
        assert_eq!(room_key("alpha", "1"), room_key("alpha", "1"));
    }

    #[test]
    fn distinct_ids_produce_distinct_keys() {
        assert_ne!(room_key("alpha", "1"), room_key("alpha", "2"));
        assert_ne!(room_key("alpha", "1"), room_key("beta", "1"));
    }
}
