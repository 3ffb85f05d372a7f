//! Workload annotations that opt a workload into a proxy group.
//!
//! A receiver carries `udpfleet.dev/receiver: "<group>:<port>"`; a sender
//! carries `udpfleet.dev/sender: "<group>"`. The reconcile layer parses these
//! with the types below before it calls into the registry.

use std::str::FromStr;

use crate::error::{DomainError, DomainResult};
use crate::id::GroupName;

/// Annotation marking a workload as a receiver of proxied traffic.
pub const RECEIVER_ANNOTATION: &str = "udpfleet.dev/receiver";

/// Annotation marking a workload as a sender through a proxy group.
pub const SENDER_ANNOTATION: &str = "udpfleet.dev/sender";

/// Parsed value of a receiver annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverAnnotation {
    pub group: GroupName,
    pub port: u16,
}

impl ReceiverAnnotation {
    /// Parses `"<group>:<port>"`.
    pub fn parse(value: &str) -> DomainResult<Self> {
        let mut parts = value.split(':');
        let (group, port) = match (parts.next(), parts.next(), parts.next()) {
            (Some(group), Some(port), None) => (group, port),
            _ => {
                return Err(DomainError::parse(
                    "receiver annotation",
                    format!("'{value}' is not a group:port pair"),
                ))
            }
        };

        let group = GroupName::parse(group)?;
        let port = port.trim().parse::<u16>().map_err(|_| {
            DomainError::parse("receiver annotation", format!("'{port}' is not a valid port"))
        })?;
        if port == 0 {
            return Err(DomainError::parse(
                "receiver annotation",
                "port 0 is not a valid port",
            ));
        }

        Ok(Self { group, port })
    }
}

impl FromStr for ReceiverAnnotation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_annotation() {
        let parsed = ReceiverAnnotation::parse("edge:7000").unwrap();
        assert_eq!(parsed.group, GroupName::new("edge"));
        assert_eq!(parsed.port, 7000);
    }

    #[test]
    fn test_parse_rejects_missing_port() {
        assert!(ReceiverAnnotation::parse("edge").is_err());
        assert!(ReceiverAnnotation::parse("edge:").is_err());
    }

    #[test]
    fn test_parse_rejects_extra_segments() {
        let err = ReceiverAnnotation::parse("edge:7000:1").unwrap_err();
        assert!(matches!(err, DomainError::ParseError { .. }));
    }

    #[test]
    fn test_parse_rejects_bad_ports() {
        assert!(ReceiverAnnotation::parse("edge:0").is_err());
        assert!(ReceiverAnnotation::parse("edge:70000").is_err());
        assert!(ReceiverAnnotation::parse("edge:udp").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_group() {
        assert!(ReceiverAnnotation::parse(":7000").is_err());
    }

    #[test]
    fn test_from_str() {
        let parsed: ReceiverAnnotation = "relay:9000".parse().unwrap();
        assert_eq!(parsed.group.as_str(), "relay");
    }
}
