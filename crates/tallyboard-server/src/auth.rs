//! The session gate in front of protected operations.
//!
//! The core never stores credentials. Handlers ask an [`AccessPolicy`]
//! for a yes/no decision per request and act on that alone.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use tallyboard_types::Settings;

/// Header carrying the plain-text passcode on protected requests.
pub const PASSCODE_HEADER: &str = "x-tally-passcode";

/// Decides whether a caller may use protected operations.
pub trait AccessPolicy: Send + Sync {
    /// Whether the request with these headers is authorized, given the
    /// current settings.
    fn is_authorized(&self, headers: &HeaderMap, settings: &Settings) -> bool;
}

/// Authorizes callers whose [`PASSCODE_HEADER`] hashes to the stored
/// passcode hash. Before a passcode is set, everyone is authorized so
/// the first user can finish setup.
#[derive(Debug, Clone, Copy, Default)]
pub struct PasscodeHeader;

impl AccessPolicy for PasscodeHeader {
    fn is_authorized(&self, headers: &HeaderMap, settings: &Settings) -> bool {
        let Some(expected) = settings.passcode_hash.as_deref() else {
            return true;
        };
        headers
            .get(PASSCODE_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|passcode| hash_passcode(passcode) == expected)
    }
}

/// Authorizes everyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn is_authorized(&self, _headers: &HeaderMap, _settings: &Settings) -> bool {
        true
    }
}

/// Authorizes no one.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl AccessPolicy for DenyAll {
    fn is_authorized(&self, _headers: &HeaderMap, _settings: &Settings) -> bool {
        false
    }
}

/// Lowercase hex SHA-256 of a passcode, as stored in [`Settings`].
pub fn hash_passcode(passcode: &str) -> String {
    format!("{:x}", Sha256::digest(passcode.as_bytes()))
}
