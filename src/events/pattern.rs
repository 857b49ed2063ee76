//! Event pattern matching and input paths.
//!
//! Patterns follow the event bus rules used by the stack:
//! - every key of a pattern object must be present in the event;
//! - an object value recurses into the event's object;
//! - an array value matches when any of its entries matches, where an entry
//!   is a scalar compared for equality (against the field, or any element
//!   when the field is an array) or a `{"prefix": ..}` / `{"exists": ..}`
//!   matcher.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A pattern document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventPattern(Value);

impl EventPattern {
    /// Wraps a pattern document; it must be a JSON object.
    pub fn new(pattern: Value) -> Result<Self> {
        if !pattern.is_object() {
            return Err(Error::Event(format!(
                "event pattern must be an object, got {}",
                pattern
            )));
        }
        Ok(Self(pattern))
    }

    /// The underlying document.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Returns true if `event` matches the pattern.
    pub fn matches(&self, event: &Value) -> bool {
        match (&self.0, event) {
            (Value::Object(pattern), Value::Object(event)) => match_object(pattern, event),
            _ => false,
        }
    }
}

fn match_object(pattern: &Map<String, Value>, event: &Map<String, Value>) -> bool {
    pattern
        .iter()
        .all(|(key, expected)| match_field(expected, event.get(key)))
}

fn match_field(expected: &Value, actual: Option<&Value>) -> bool {
    match expected {
        Value::Object(nested) => match actual {
            Some(Value::Object(inner)) => match_object(nested, inner),
            _ => false,
        },
        Value::Array(alternatives) => alternatives.iter().any(|alt| match_entry(alt, actual)),
        scalar => actual.map_or(false, |value| scalar_matches(scalar, value)),
    }
}

fn match_entry(entry: &Value, actual: Option<&Value>) -> bool {
    if let Value::Object(matcher) = entry {
        if let Some(Value::Bool(should_exist)) = matcher.get("exists") {
            return actual.is_some() == *should_exist;
        }
        if let Some(Value::String(prefix)) = matcher.get("prefix") {
            return actual.map_or(false, |value| {
                any_scalar(value, |v| v.as_str().map_or(false, |s| s.starts_with(prefix.as_str())))
            });
        }
        return false;
    }
    actual.map_or(false, |value| scalar_matches(entry, value))
}

fn scalar_matches(expected: &Value, actual: &Value) -> bool {
    any_scalar(actual, |v| v == expected)
}

fn any_scalar(value: &Value, predicate: impl Fn(&Value) -> bool) -> bool {
    match value {
        Value::Array(items) => items.iter().any(predicate),
        other => predicate(other),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A `$.a.b[0]` style path into an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Parses a path. `$` alone selects the whole event.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || Error::Event(format!("invalid input path '{}'", raw));

        let rest = raw.strip_prefix('$').ok_or_else(invalid)?;
        let mut segments = Vec::new();
        if rest.is_empty() {
            return Ok(Self {
                raw: raw.to_string(),
                segments,
            });
        }

        let rest = rest.strip_prefix('.').ok_or_else(invalid)?;
        for part in rest.split('.') {
            let (key, mut tail) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };
            if key.is_empty() {
                return Err(invalid());
            }
            segments.push(Segment::Key(key.to_string()));

            while !tail.is_empty() {
                let close = tail.find(']').ok_or_else(invalid)?;
                let index = tail[1..close].parse::<usize>().map_err(|_| invalid())?;
                segments.push(Segment::Index(index));
                tail = &tail[close + 1..];
                if !tail.is_empty() && !tail.starts_with('[') {
                    return Err(invalid());
                }
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The path as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Resolves the path against `event`; `None` when any step is missing.
    pub fn resolve<'a>(&self, event: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(event, |current, segment| match segment {
                Segment::Key(key) => current.get(key.as_str()),
                Segment::Index(index) => current.get(*index),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pr_event() -> Value {
        json!({
            "source": "aws.codecommit",
            "resources": ["arn:aws:codecommit:eu-west-1:123456789012:codechecker-demo"],
            "detail": {
                "event": "pullRequestCreated",
                "destinationReference": "refs/heads/main",
                "repositoryNames": ["codechecker-demo"],
                "pullRequestId": "12"
            }
        })
    }

    #[test]
    fn pattern_must_be_object() {
        assert!(EventPattern::new(json!(["aws.codecommit"])).is_err());
    }

    #[test]
    fn array_matches_any_value() {
        let pattern = EventPattern::new(json!({
            "source": ["aws.codecommit"],
            "detail": {
                "event": ["pullRequestSourceBranchUpdated", "pullRequestCreated"]
            }
        }))
        .unwrap();
        assert!(pattern.matches(&pr_event()));
    }

    #[test]
    fn array_event_field_matches_any_element() {
        let pattern = EventPattern::new(json!({
            "resources": ["arn:aws:codecommit:eu-west-1:123456789012:codechecker-demo"]
        }))
        .unwrap();
        assert!(pattern.matches(&pr_event()));

        let other = EventPattern::new(json!({
            "resources": ["arn:aws:codecommit:eu-west-1:123456789012:other"]
        }))
        .unwrap();
        assert!(!other.matches(&pr_event()));
    }

    #[test]
    fn every_key_must_match() {
        let pattern = EventPattern::new(json!({
            "source": ["aws.codecommit"],
            "detail": { "destinationReference": ["refs/heads/develop"] }
        }))
        .unwrap();
        assert!(!pattern.matches(&pr_event()));
    }

    #[test]
    fn missing_field_does_not_match() {
        let pattern = EventPattern::new(json!({ "detail-type": ["CodeBuild Build State Change"] }))
            .unwrap();
        assert!(!pattern.matches(&pr_event()));
    }

    #[test]
    fn prefix_and_exists_matchers() {
        let prefix = EventPattern::new(json!({
            "detail": { "destinationReference": [{ "prefix": "refs/heads/" }] }
        }))
        .unwrap();
        assert!(prefix.matches(&pr_event()));

        let absent = EventPattern::new(json!({
            "detail": { "mergeOption": [{ "exists": false }] }
        }))
        .unwrap();
        assert!(absent.matches(&pr_event()));

        let present = EventPattern::new(json!({
            "detail": { "pullRequestId": [{ "exists": true }] }
        }))
        .unwrap();
        assert!(present.matches(&pr_event()));
    }

    #[test]
    fn path_resolves_keys_and_indexes() {
        let event = pr_event();
        let path = JsonPath::parse("$.detail.repositoryNames[0]").unwrap();
        assert_eq!(path.resolve(&event), Some(&json!("codechecker-demo")));

        let missing = JsonPath::parse("$.detail.repositoryNames[3]").unwrap();
        assert_eq!(missing.resolve(&event), None);

        let root = JsonPath::parse("$").unwrap();
        assert_eq!(root.resolve(&event), Some(&event));
    }

    #[test]
    fn malformed_paths_are_rejected() {
        for raw in ["detail.x", "$detail", "$.", "$.a[x]", "$.a[0", "$.a[0]b"] {
            assert!(JsonPath::parse(raw).is_err(), "{} should be rejected", raw);
        }
    }
}
