//! Citizen identity hashing
//!
//! Raw national ids and licence numbers never leave this module. Profiles are
//! keyed by a SHA-256 digest scoped to the owning government, plus a four
//! character hint used by the partial-match verification stub.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum_macros::{Display, EnumString};

use crate::error::{CoreError, CoreResult};
use crate::profile::ContactInfo;

/// Number of trailing characters kept as an identifier hint
const HINT_LEN: usize = 4;

/// Which identifier a profile is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    NationalId,
    DriverLicense,
}

/// Identity presented by a caller when resolving a profile
///
/// Holds the raw identifier only for the duration of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitizenIdentity {
    pub kind: IdentityKind,
    raw: String,
    pub contact: ContactInfo,
}

impl CitizenIdentity {
    pub fn new(kind: IdentityKind, raw: impl Into<String>) -> CoreResult<Self> {
        let raw = raw.into();
        if normalize(&raw).is_empty() {
            return Err(CoreError::EmptyIdentifier);
        }
        Ok(Self {
            kind,
            raw,
            contact: ContactInfo::default(),
        })
    }

    pub fn national_id(raw: impl Into<String>) -> CoreResult<Self> {
        Self::new(IdentityKind::NationalId, raw)
    }

    pub fn driver_license(raw: impl Into<String>) -> CoreResult<Self> {
        Self::new(IdentityKind::DriverLicense, raw)
    }

    pub fn with_contact(mut self, contact: ContactInfo) -> Self {
        self.contact = contact;
        self
    }

    /// Digest used as the profile key within `government_id`
    pub fn hash_for(&self, government_id: &str) -> String {
        hash_identifier(government_id, self.kind, &self.raw)
    }

    /// Trailing characters of the normalised identifier
    pub fn hint(&self) -> String {
        let normalized = normalize(&self.raw);
        let start = normalized.len().saturating_sub(HINT_LEN);
        normalized[start..].to_string()
    }
}

/// Uppercase, alphanumeric-only form of an identifier
fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Hash an identifier for storage.
///
/// Normalisation makes `"AB-12 345"` and `"ab12345"` resolve to the same profile.
pub fn hash_identifier(government_id: &str, kind: IdentityKind, raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(government_id.as_bytes());
    hasher.update(b":");
    hasher.update(kind.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(normalize(raw).as_bytes());
    hex::encode(hasher.finalize())
}

/// Partial-match verification stub.
///
/// Compares the trailing characters a citizen supplies against the stored hint.
/// This is not identity proofing.
pub fn verify_partial_identifier(stored_hint: &str, supplied_suffix: &str) -> bool {
    let supplied = normalize(supplied_suffix);
    !supplied.is_empty() && supplied.len() <= stored_hint.len() && stored_hint.ends_with(&supplied)
}
