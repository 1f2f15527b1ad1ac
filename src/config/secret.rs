//! Credential values held in configuration
//!
//! bulkfetch carries four secrets: `server.client_secret`,
//! `fhir_store.access_token`, `gcs.access_token` and
//! `postgresql.connection_string`. Each is a [`SecretString`]: redacted in
//! `Debug`, zeroed on drop, and only readable through
//! [`secrecy::ExposeSecret`].
//!
//! Values usually arrive through `${VAR}` substitution or `BULKFETCH_*`
//! overrides, often from a command such as `gcloud auth print-access-token`,
//! so a trailing line break is stripped when a secret is created.
//!
//! ```rust
//! use bulkfetch::config::secret_string;
//! use secrecy::ExposeSecret;
//!
//! let token = secret_string("ya29.token\n".to_string());
//! assert_eq!(token.expose_secret().as_str(), "ya29.token");
//! assert!(!format!("{token:?}").contains("ya29"));
//! ```

use secrecy::{CloneableSecret, DebugSecret, Secret, SerializableSecret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ops::Deref;
use zeroize::Zeroize;

/// Secret text, zeroed on drop
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SecretValue(String);

impl CloneableSecret for SecretValue {}
impl DebugSecret for SecretValue {}
impl SerializableSecret for SecretValue {}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl SecretValue {
    /// The secret text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SecretValue {
    fn from(mut value: String) -> Self {
        let len = value.trim_end_matches(['\r', '\n']).len();
        value.truncate(len);
        SecretValue(value)
    }
}

impl Deref for SecretValue {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for SecretValue {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl Serialize for SecretValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SecretValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(SecretValue::from)
    }
}

/// A configuration secret
pub type SecretString = Secret<SecretValue>;

/// Wrap `value` as a [`SecretString`]
pub fn secret_string(value: String) -> SecretString {
    Secret::new(SecretValue::from(value))
}
