//! Type-safe identifiers for proxy groups and workloads.

use crate::error::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Proxy Group Name
// ============================================================================

/// Name of a proxy group.
///
/// Proxies subscribe to the discovery server with this name as their node
/// id, so it doubles as the snapshot cache key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupName(String);

impl GroupName {
    /// Creates a GroupName without validation.
    ///
    /// The registry trusts its callers; use [`GroupName::parse`] for input
    /// arriving from outside the process.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Validates and creates a GroupName from untrusted input.
    ///
    /// Rejects empty and whitespace-only names.
    pub fn parse(name: &str) -> DomainResult<Self> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid("group", name, "a non-empty name"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for GroupName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for GroupName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for GroupName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Workload Identity
// ============================================================================

/// Unique identity of a workload instance (e.g. a pod name).
///
/// Senders and receivers are tracked by identity, so redelivered lifecycle
/// events for the same workload are idempotent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkloadId(String);

impl WorkloadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Validates and creates a WorkloadId from untrusted input.
    pub fn parse(id: &str) -> DomainResult<Self> {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid("workload", id, "a non-empty identity"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkloadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkloadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for WorkloadId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_name_parse_trims() {
        let name = GroupName::parse("  edge ").unwrap();
        assert_eq!(name.as_str(), "edge");
    }

    #[test]
    fn test_group_name_parse_rejects_blank() {
        assert!(GroupName::parse("").is_err());
        assert!(GroupName::parse("   ").is_err());
    }

    #[test]
    fn test_workload_id_parse_rejects_blank() {
        let err = WorkloadId::parse("").unwrap_err();
        assert!(err.to_string().contains("workload"));
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&GroupName::new("edge")).unwrap();
        assert_eq!(json, "\"edge\"");

        let id: WorkloadId = serde_json::from_str("\"pod-1\"").unwrap();
        assert_eq!(id, WorkloadId::new("pod-1"));
    }

    #[test]
    fn test_workload_ordering() {
        let mut ids = vec![WorkloadId::new("pod-2"), WorkloadId::new("pod-1")];
        ids.sort();
        assert_eq!(ids.first().map(WorkloadId::as_str), Some("pod-1"));
    }
}
