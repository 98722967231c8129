//! Session ids are UUIDs with the dashes stripped.

/// Generate a fresh session id (32 lowercase hex chars).
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Accept ids between 32 and 40 lowercase hex chars so journals written
/// by either id width replay.
pub fn is_valid_session_id(id: &str) -> bool {
    (32..=40).contains(&id.len()) && id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}
