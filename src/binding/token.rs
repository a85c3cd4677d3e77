// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Correlation tokens carried in the contact-way `state` parameter.
//!
//! The state parameter is capped at 30 characters, too short for a dashed
//! UUID with a prefix. A UUID's 16 bytes are base64url-encoded instead:
//!
//! ```text
//! abcdef12-3456-7890-abcd-ef1234567890  ──►  mdy:q83vEjRWeJCrze8SNFZ4kA
//!                                            └┬─┘└────────┬───────────┘
//!                                          prefix   22 chars, no padding
//! ```
//!
//! Input that is not a UUID passes through behind the prefix, and decoding
//! never fails.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use uuid::Uuid;

/// Marks a state value as ours.
pub const STATE_PREFIX: &str = "mdy:";

/// Hard ceiling on the state parameter.
pub const MAX_STATE_LEN: usize = 30;

/// Encode `raw` into a prefixed state value.
#[must_use]
pub fn encode(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| *c != '-').collect();
    match Uuid::try_parse(&compact) {
        Ok(id) if compact.len() == 32 => format!("{STATE_PREFIX}{}", URL_SAFE_NO_PAD.encode(id.as_bytes())),
        _ => format!("{STATE_PREFIX}{raw}"),
    }
}

/// Recover the raw identifier from a state value. A 16-byte payload becomes a
/// dashed lowercase UUID; anything else comes back as given, minus the prefix.
#[must_use]
pub fn decode(token: &str) -> String {
    let payload = token.strip_prefix(STATE_PREFIX).unwrap_or(token);
    match URL_SAFE_NO_PAD.decode(payload) {
        Ok(bytes) => match Uuid::from_slice(&bytes) {
            Ok(id) => id.hyphenated().to_string(),
            Err(_) => payload.to_string(),
        },
        Err(_) => payload.to_string(),
    }
}

/// Whether a state value was issued by this crate.
#[must_use]
pub fn is_correlation_state(state: &str) -> bool {
    state.starts_with(STATE_PREFIX)
}
