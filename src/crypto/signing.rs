//! Signing string construction for revocation lists.
//!
//! The signed message is a deterministic text block, independent of how the
//! surrounding JSON document is formatted. Each revoked id sits on its own
//! line after an explicit count:
//! ```text
//! tierwarden-revocation-list
//! sequence: 12
//! count: 2
//! cus_1
//! LIC-0042
//! ```
//!
//! Ids must be non-empty and free of control characters (see
//! [`is_valid_revocation_id`]); otherwise two different lists could share a
//! signing string.

/// Leading line identifying the message type.
pub const REVOCATION_CONTEXT: &str = "tierwarden-revocation-list";

/// Whether `id` may appear in a signed revocation list.
pub fn is_valid_revocation_id(id: &str) -> bool {
    !id.is_empty() && !id.chars().any(char::is_control)
}

/// Build the signing string for a revocation list.
///
/// Entries are signed in the order given; no trailing newline. Callers must
/// reject ids failing [`is_valid_revocation_id`] before relying on the result.
pub fn build_revocation_signing_string(sequence: u64, revoked: &[String]) -> String {
    let mut signing = format!(
        "{}\nsequence: {}\ncount: {}",
        REVOCATION_CONTEXT,
        sequence,
        revoked.len()
    );
    for id in revoked {
        signing.push('\n');
        signing.push_str(id);
    }
    signing
}
