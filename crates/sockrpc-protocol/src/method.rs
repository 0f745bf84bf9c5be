//! Fully qualified method names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A method addressed as `package.Service.Method`.
///
/// The leading dot used by descriptor full names (`.package.Service.Method`)
/// is accepted. Everything before the last dot is the service name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MethodName {
    service: String,
    method: String,
}

impl MethodName {
    /// Build a method name from its parts
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }

    /// Fully qualified service name, e.g. `package.Service`
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Bare method name, e.g. `Method`
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl FromStr for MethodName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.strip_prefix('.').unwrap_or(s);
        let (service, method) = name
            .rsplit_once('.')
            .ok_or_else(|| ProtocolError::InvalidMethodName(format!("'{s}' has no service")))?;

        if service.is_empty() || method.is_empty() {
            return Err(ProtocolError::InvalidMethodName(format!(
                "'{s}' has an empty service or method"
            )));
        }
        if service.split('.').any(str::is_empty) {
            return Err(ProtocolError::InvalidMethodName(format!(
                "'{s}' has an empty package segment"
            )));
        }

        Ok(Self::new(service, method))
    }
}

impl TryFrom<String> for MethodName {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MethodName> for String {
    fn from(name: MethodName) -> Self {
        name.to_string()
    }
}

impl fmt::Display for MethodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.method)
    }
}
