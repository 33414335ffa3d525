//! Strongly-typed identifiers for domain entities.
//!
//! Two families of ids exist:
//!
//! - Generated ids (runs, jobs, prompts, workflow requests) wrap a ULID and
//!   display with a short type prefix.
//! - Authored keys (workspaces, tasks, workflows, agents, tools) are chosen by
//!   whoever writes the workspace definition; the only constraint is that
//!   they are non-empty.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to generate a strongly-typed ID wrapper around ULID.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Creates a new ID with a randomly generated ULID.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Returns the prefix used for display formatting.
            #[must_use]
            pub const fn prefix() -> &'static str {
                $prefix
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let prefix_with_underscore = concat!($prefix, "_");
                let ulid_str = s.strip_prefix(prefix_with_underscore).unwrap_or(s);

                Ulid::from_str(ulid_str)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        reason: e.to_string(),
                    })
            }
        }
    };
}

/// Macro to generate a strongly-typed, externally-authored string key.
macro_rules! define_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a key, rejecting empty or whitespace-only values.
            ///
            /// # Errors
            ///
            /// Returns an error if the value is blank.
            pub fn new(value: impl Into<String>) -> Result<Self, ParseIdError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(ParseIdError {
                        id_type: stringify!($name),
                        reason: "must not be empty".to_string(),
                    });
                }
                Ok(Self(value))
            }

            /// Returns the key as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseIdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(key: $name) -> Self {
                key.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(
    /// Unique identifier for a single orchestrator run.
    RunId,
    "run"
);

define_id!(
    /// Unique identifier for a queued trigger job.
    JobId,
    "job"
);

define_id!(
    /// Unique identifier for a pending interactive prompt.
    PromptId,
    "prm"
);

define_id!(
    /// Correlates a `run_workflow` request with its `workflow_result` reply.
    WorkflowRequestId,
    "wfr"
);

define_key!(
    /// Identifier of a workspace.
    WorkspaceId
);

define_key!(
    /// Identifier of a task within a workspace.
    TaskId
);

define_key!(
    /// Identifier of a reusable workflow (node-graph pipeline).
    WorkflowId
);

define_key!(
    /// Identifier of a configured agent.
    AgentId
);

define_key!(
    /// Identifier of an external (MCP) tool.
    ToolId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_display_format() {
        let id = RunId::new();
        assert!(id.to_string().starts_with("run_"));
    }

    #[test]
    fn parse_with_and_without_prefix() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);

        let raw: JobId = id.as_ulid().to_string().parse().expect("should parse");
        assert_eq!(id, raw);
    }

    #[test]
    fn parse_invalid_ulid() {
        let err = "not_a_ulid".parse::<PromptId>().unwrap_err();
        assert_eq!(err.id_type, "PromptId");
    }

    #[test]
    fn key_rejects_blank() {
        assert!(TaskId::new("  ").is_err());
        assert_eq!(TaskId::new("A").expect("valid").as_str(), "A");
    }

    #[test]
    fn key_serde_is_a_plain_string() {
        let id = WorkspaceId::new("ws-1").expect("valid");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"ws-1\"");

        let parsed: WorkspaceId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, id);

        let empty: Result<WorkspaceId, _> = serde_json::from_str("\"\"");
        assert!(empty.is_err());
    }

    #[test]
    fn generated_id_serde_roundtrip() {
        let id = RunId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        let parsed: RunId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, parsed);
    }
}
