//! Label selector parsing and matching
//!
//! Supports the equality-based subset of the Kubernetes selector grammar:
//! `key=value`, `key==value`, `key!=value` and comma-separated conjunctions.
//! Set-based expressions and bare-key existence checks are rejected with a
//! 400.

use serde_json::Value;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Requirement {
    key: String,
    op: Op,
    value: String,
}

/// A parsed label selector: a conjunction of equality requirements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Parse a `labelSelector` query value. An empty string selects
    /// everything.
    pub fn parse(input: &str) -> Result<Self, ApiError> {
        let mut requirements = Vec::new();
        for term in input.split(',') {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }

            let (key, op, value) = if let Some((k, v)) = term.split_once("!=") {
                (k, Op::Ne, v)
            } else if let Some((k, v)) = term.split_once("==") {
                (k, Op::Eq, v)
            } else if let Some((k, v)) = term.split_once('=') {
                (k, Op::Eq, v)
            } else {
                return Err(ApiError::BadRequest(format!(
                    "unable to parse selector \"{}\": unsupported operator in \"{}\"",
                    input, term
                )));
            };

            let key = key.trim();
            if key.is_empty() {
                return Err(ApiError::BadRequest(format!(
                    "unable to parse selector \"{}\": empty label key",
                    input
                )));
            }

            requirements.push(Requirement {
                key: key.to_string(),
                op,
                value: value.trim().to_string(),
            });
        }
        Ok(Selector { requirements })
    }

    /// Whether a `metadata.labels` object (possibly absent) satisfies every
    /// requirement.
    pub fn matches(&self, labels: &Value) -> bool {
        self.requirements.iter().all(|req| {
            let actual = labels.get(&req.key).and_then(Value::as_str);
            match req.op {
                Op::Eq => actual == Some(req.value.as_str()),
                Op::Ne => actual != Some(req.value.as_str()),
            }
        })
    }

    /// True when the selector has no requirements
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}
