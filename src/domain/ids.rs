//! Domain identifier types with validation
//!
//! Newtype wrappers for the identifiers that flow through a bulk export run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// FHIR resource type newtype wrapper
///
/// Names a resource type requested from, and returned by, a bulk export job
/// (e.g. `Patient`, `ExplanationOfBenefit`). Ordered so that result files can be
/// visited deterministically.
///
/// # Examples
///
/// ```
/// use bulkfetch::domain::ids::ResourceType;
/// use std::str::FromStr;
///
/// let resource_type = ResourceType::from_str("Patient").unwrap();
/// assert_eq!(resource_type.as_str(), "Patient");
/// assert!(ResourceType::from_str("not a type").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceType(String);

impl ResourceType {
    /// Creates a new ResourceType from a string
    ///
    /// Resource types are non-empty ASCII alphanumeric names.
    pub fn new(name: impl Into<String>) -> Result<Self, String> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err("Resource type cannot be empty".to_string());
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(format!(
                "Invalid resource type '{name}': only ASCII letters and digits are allowed"
            ));
        }
        Ok(Self(name))
    }

    /// Returns the resource type as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes self and returns the inner String
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ResourceType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ResourceType> for String {
    fn from(value: ResourceType) -> Self {
        value.0
    }
}

impl AsRef<str> for ResourceType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The patient group a bulk export runs against
///
/// `All` maps to the server's "all patients" group.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExportGroup {
    /// Every patient the client is authorized for
    #[default]
    All,
    /// A named group id
    Named(String),
}

impl ExportGroup {
    /// Group id as used in the `/Group/{id}/$export` path
    pub fn as_str(&self) -> &str {
        match self {
            Self::All => "all",
            Self::Named(id) => id,
        }
    }
}

impl FromStr for ExportGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Export group cannot be empty".to_string());
        }
        if s.eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            Ok(Self::Named(s.to_string()))
        }
    }
}

impl fmt::Display for ExportGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parse a list of resource type names, failing on the first invalid entry
pub fn parse_resource_types<S: AsRef<str>>(names: &[S]) -> Result<Vec<ResourceType>, String> {
    names.iter().map(|n| ResourceType::new(n.as_ref())).collect()
}
