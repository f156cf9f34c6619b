//! Profile identifiers, records, and the parsing seam.

pub mod voyager;

use std::fmt;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::error::ErrorRecord;

pub use voyager::VoyagerProfileParser;

const MIN_ID_LEN: usize = 3;
const MAX_ID_LEN: usize = 100;

/// Validated public profile identifier (the `alice` in `/in/alice`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProfileId(String);

impl ProfileId {
    /// Accepts a bare identifier or a profile URL containing `/in/<id>`.
    pub fn parse(input: &str) -> Result<Self, ErrorRecord> {
        let trimmed = input.trim();
        let candidate = match trimmed.find("/in/") {
            Some(idx) => trimmed[idx + 4..]
                .split(['/', '?', '#'])
                .next()
                .unwrap_or_default(),
            None => trimmed,
        };

        let len = candidate.chars().count();
        if !(MIN_ID_LEN..=MAX_ID_LEN).contains(&len) {
            return Err(ErrorRecord::validation(format!(
                "profile identifier must be {MIN_ID_LEN}-{MAX_ID_LEN} characters, got {len}"
            )));
        }
        if let Some(bad) = candidate
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '%')))
        {
            return Err(ErrorRecord::validation(format!(
                "profile identifier contains invalid character {bad:?}"
            )));
        }
        check_escapes(candidate)?;
        if candidate.starts_with('-') || candidate.ends_with('-') {
            return Err(ErrorRecord::validation(
                "profile identifier may not start or end with '-'",
            ));
        }
        Ok(Self(candidate.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Percent escapes must be well formed and may only stand for bytes that are
/// not path syntax: encoded ASCII has to be alphanumeric, `-` or `_`.
fn check_escapes(candidate: &str) -> Result<(), ErrorRecord> {
    let bytes = candidate.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            i += 1;
            continue;
        }
        let decoded = candidate
            .get(i + 1..i + 3)
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .ok_or_else(|| {
                ErrorRecord::validation("profile identifier has a malformed percent escape")
            })?;
        let allowed =
            !decoded.is_ascii() || decoded.is_ascii_alphanumeric() || matches!(decoded, b'-' | b'_');
        if !allowed {
            return Err(ErrorRecord::validation(format!(
                "profile identifier encodes forbidden character {:?}",
                decoded as char
            )));
        }
        i += 3;
    }
    Ok(())
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structured profile produced by a [`ProfileParser`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileRecord {
    pub public_id: String,
    pub full_name: String,
    pub summary: String,
    pub experience: String,
    pub education: String,
    pub honors: String,
    pub certifications: String,
    pub projects: String,
    pub publications: String,
    pub volunteer: String,
    pub skills: String,
    pub languages: String,
    pub posts: String,
    /// `urn:li:fs_miniProfile:…`, needed to look up the member's posts.
    #[serde(skip)]
    pub profile_urn: Option<String>,
    /// `urn:li:member:…`, the actor URN on the member's own posts.
    #[serde(skip)]
    pub member_urn: Option<String>,
    pub raw: RawData,
}

/// Upstream documents a record was built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawData {
    pub profile: Value,
    pub posts: Option<Value>,
}

/// Turns raw upstream payloads into a [`ProfileRecord`].
pub trait ProfileParser: Send + Sync {
    fn parse_profile(&self, id: &ProfileId, raw: &Bytes) -> Result<ProfileRecord, ErrorRecord>;

    /// Renders the member's posts into `record.posts`. Parsers without posts
    /// support leave the record untouched.
    fn attach_posts(&self, _record: &mut ProfileRecord, _raw: &Bytes) -> Result<(), ErrorRecord> {
        Ok(())
    }
}
