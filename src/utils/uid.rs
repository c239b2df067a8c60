use rand::Rng;

use crate::error::ConfigError;

/// Root of UUID-derived UIDs (PS3.5 B.2): `2.25.<128-bit integer>`.
pub const UUID_DERIVED_ROOT: &str = "2.25";

/// Maximum length of a UI value.
pub const MAX_UID_LEN: usize = 64;

/// Generates DICOM unique identifiers under a fixed root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidGenerator {
    root: String,
}

impl Default for UidGenerator {
    fn default() -> Self {
        Self {
            root: UUID_DERIVED_ROOT.to_string(),
        }
    }
}

impl UidGenerator {
    pub fn new(root: &str) -> Result<Self, ConfigError> {
        let root = root.trim().trim_end_matches('.');
        validate_root(root)?;
        Ok(Self {
            root: root.to_string(),
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Fresh UID: root, a dot, then the decimal form of a random 128-bit
    /// integer, cut to the 64 character limit.
    pub fn generate(&self) -> String {
        let value: u128 = rand::rng().random();
        let mut uid = format!("{}.{}", self.root, value);
        uid.truncate(MAX_UID_LEN);
        uid
    }

    /// Fresh UID that differs from every value in `taken`.
    pub fn generate_distinct(&self, taken: &[&str]) -> String {
        loop {
            let uid = self.generate();
            if !taken.contains(&uid.as_str()) {
                return uid;
            }
        }
    }
}

fn validate_root(root: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidUidRoot {
        root: root.to_string(),
        reason,
    };

    if root.is_empty() {
        return Err(invalid("root is empty"));
    }
    // root + '.' + at least 8 random digits
    if root.len() > MAX_UID_LEN - 9 {
        return Err(invalid("root leaves too little room for a unique suffix"));
    }
    for component in root.split('.') {
        if component.is_empty() {
            return Err(invalid("empty component"));
        }
        if !component.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("components must be decimal digits"));
        }
        if component.len() > 1 && component.starts_with('0') {
            return Err(invalid("components must not have leading zeros"));
        }
    }
    Ok(())
}
