//! Identifier and principal types shared across the crate.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a caller-supplied batch identifier.
pub const MAX_BATCH_ID_LEN: usize = 64;

/// Globally unique batch identifier (e.g. `VC-1718000000000-3fa2`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate an identifier of the form `{prefix}-{unix_millis}-{4 hex}`.
    pub fn generate(prefix: &str) -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let suffix: u16 = rand::thread_rng().gen();
        Self(format!("{prefix}-{millis}-{suffix:04x}"))
    }

    /// Returns true if `s` is usable as a batch identifier.
    pub fn is_well_formed(s: &str) -> bool {
        !s.is_empty()
            && s.len() <= MAX_BATCH_ID_LEN
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BatchId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Hex length of a generated QR token.
pub const QR_TOKEN_LEN: usize = 32;

/// Opaque public lookup token printed on the product QR label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QrCode(pub String);

impl QrCode {
    /// 16 random bytes, hex encoded.
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self(hex::encode(bytes))
    }

    /// True if `s` has the shape of a generated token. Batch ids never do.
    pub fn is_token_shaped(s: &str) -> bool {
        s.len() == QR_TOKEN_LEN && s.chars().all(|c| c.is_ascii_hexdigit())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for QrCode {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of an authenticated principal, as issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Supply-chain role carried by a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Farmer,
    Admin,
    Manufacturer,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Farmer, Role::Admin, Role::Manufacturer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Farmer => "farmer",
            Role::Admin => "admin",
            Role::Manufacturer => "manufacturer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "farmer" => Ok(Role::Farmer),
            "admin" => Ok(Role::Admin),
            "manufacturer" => Ok(Role::Manufacturer),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Authenticated actor attached to every request. Trusted as already authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: PrincipalId::new(id),
            role,
        }
    }

    pub fn farmer(id: impl Into<String>) -> Self {
        Self::new(id, Role::Farmer)
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn manufacturer(id: impl Into<String>) -> Self {
        Self::new(id, Role::Manufacturer)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_batch_ids_are_well_formed() {
        let id = BatchId::generate("VC");
        assert!(id.as_str().starts_with("VC-"));
        assert!(BatchId::is_well_formed(id.as_str()));
    }

    #[test]
    fn batch_id_rejects_bad_characters() {
        assert!(!BatchId::is_well_formed(""));
        assert!(!BatchId::is_well_formed("VC 1"));
        assert!(!BatchId::is_well_formed(&"x".repeat(MAX_BATCH_ID_LEN + 1)));
        assert!(BatchId::is_well_formed("VC-1_a"));
    }

    #[test]
    fn qr_codes_are_32_hex_chars() {
        let qr = QrCode::generate();
        assert_eq!(qr.as_str().len(), 32);
        assert!(hex::decode(qr.as_str()).is_ok());
        assert_ne!(qr, QrCode::generate());
        assert!(QrCode::is_token_shaped(qr.as_str()));
    }

    #[test]
    fn generated_ids_never_look_like_qr_tokens() {
        assert!(!QrCode::is_token_shaped(BatchId::generate("VC").as_str()));
        assert!(!QrCode::is_token_shaped("VC-1"));
        assert!(!QrCode::is_token_shaped(&"a".repeat(QR_TOKEN_LEN + 1)));
        assert!(QrCode::is_token_shaped(&"A0".repeat(QR_TOKEN_LEN / 2)));
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert!("consumer".parse::<Role>().is_err());
    }
}
