// SPDX-License-Identifier: MIT

//! Workflow topics
//!
//! `[root/]operations/{target}/{operation}/{request}/{identity}`
//!
//! The category of a message is `{operation}/{request}` and the trailing
//! segment is the workflow identity.

use crate::machine::error::MachineError;

/// Subscription filter for external update workflows, relative to the topic root
pub const UPDATE_REQUESTS: &str = "operations/+/external/update/+";

/// Category handled by the external updater
pub const EXTERNAL_UPDATE: &str = "external/update";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowTopic {
    pub target: String,
    pub operation: String,
    pub request: String,
    pub identity: String,
}

impl WorkflowTopic {
    /// Parse `topic`, stripping `root` first when it is not empty
    pub fn parse(root: &str, topic: &str) -> Result<Self, MachineError> {
        let malformed = || MachineError::MalformedTopic(topic.to_string());

        let relative = if root.is_empty() {
            topic
        } else {
            topic
                .strip_prefix(root)
                .and_then(|rest| rest.strip_prefix('/'))
                .ok_or_else(malformed)?
        };

        let parts: Vec<&str> = relative.split('/').collect();
        match parts.as_slice() {
            ["operations", target, operation, request, identity]
                if [target, operation, request, identity]
                    .iter()
                    .all(|s| !s.is_empty()) =>
            {
                Ok(Self {
                    target: target.to_string(),
                    operation: operation.to_string(),
                    request: request.to_string(),
                    identity: identity.to_string(),
                })
            }
            _ => Err(malformed()),
        }
    }

    /// The message category, `{operation}/{request}`
    pub fn category(&self) -> String {
        format!("{}/{}", self.operation, self.request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_without_root() {
        let topic = WorkflowTopic::parse("", "operations/main/external/update/op-1").unwrap();
        assert_eq!(topic.target, "main");
        assert_eq!(topic.identity, "op-1");
        assert_eq!(topic.category(), EXTERNAL_UPDATE);
    }

    #[test]
    fn test_parse_with_root() {
        let topic =
            WorkflowTopic::parse("tedge", "tedge/operations/child-1/external/update/42").unwrap();
        assert_eq!(topic.target, "child-1");
        assert_eq!(topic.identity, "42");
    }

    #[test]
    fn test_rejects_other_shapes() {
        for topic in [
            "operations/main/external/update",
            "operations/main/external/update/op-1/extra",
            "events/main/external/update/op-1",
            "operations/main/external/update/",
            "tedge/operations/main/external/update/op-1",
        ] {
            let parsed = WorkflowTopic::parse("", topic);
            assert!(
                matches!(parsed, Err(MachineError::MalformedTopic(_))),
                "{topic} should be rejected"
            );
        }
        assert!(WorkflowTopic::parse("tedge", "tedgex/operations/a/b/c/d").is_err());
    }
}
