//! Event rules binding repository and build events to their targets.
//!
//! Each protected branch gets three rules:
//! - pull request created or source updated -> start the branch's build with
//!   the pull request context as environment overrides;
//! - any build state change of the branch's project -> result publisher;
//! - a failed build of the branch's project -> notification topic.

pub mod pattern;
pub mod router;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::gate::{
    DESTINATION_COMMIT_ID_VAR, PULL_REQUEST_ID_VAR, REPOSITORY_NAME_VAR, SOURCE_COMMIT_ID_VAR,
};
use crate::stack::template::Resource;

pub use pattern::{EventPattern, JsonPath};
pub use router::{Dispatch, EventRouter};

/// Event source of repository events.
pub const CODECOMMIT_SOURCE: &str = "aws.codecommit";
/// Event source of build events.
pub const CODEBUILD_SOURCE: &str = "aws.codebuild";
/// Detail type of build state changes.
pub const BUILD_STATE_CHANGE: &str = "CodeBuild Build State Change";
/// Pull request events that start a check.
pub const PULL_REQUEST_EVENTS: [&str; 2] = ["pullRequestCreated", "pullRequestSourceBranchUpdated"];

/// What a rule target is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// A build project, started with the rendered input.
    Build,
    /// A function, invoked with the rendered input.
    Function,
    /// A notification topic, published to with the rendered input.
    Topic,
}

/// Input rewriting from event fields into a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputTransformer {
    /// Placeholder name -> path into the event.
    pub paths: BTreeMap<String, String>,
    /// JSON template with `<name>` placeholders.
    pub template: String,
}

impl InputTransformer {
    /// Renders the template against `event`.
    ///
    /// String values are substituted JSON-escaped without quotes, so
    /// placeholders are written inside quotes in the template. Other values
    /// are substituted as JSON. A path that does not resolve substitutes an
    /// empty string.
    pub fn render(&self, event: &Value) -> Result<Value> {
        let mut values = BTreeMap::new();
        for (name, raw) in &self.paths {
            let path = JsonPath::parse(raw)?;
            let text = match path.resolve(event) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => escape(s)?,
                Some(other) => serde_json::to_string(other)?,
            };
            values.insert(name.as_str(), text);
        }

        let mut rendered = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(open) = rest.find('<') {
            rendered.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('>').map(|close| (&after[..close], close)) {
                Some((name, close)) if values.contains_key(name) => {
                    rendered.push_str(&values[name]);
                    rest = &after[close + 1..];
                }
                _ => {
                    rendered.push('<');
                    rest = after;
                }
            }
        }
        rendered.push_str(rest);

        serde_json::from_str(&rendered).map_err(|e| {
            Error::Event(format!("input template did not render to JSON: {}", e))
        })
    }

    fn to_properties(&self) -> Value {
        json!({
            "InputPathsMap": self.paths,
            "InputTemplate": self.template,
        })
    }
}

fn escape(s: &str) -> Result<String> {
    let quoted = serde_json::to_string(s)?;
    Ok(quoted[1..quoted.len() - 1].to_string())
}

/// Input handed to a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetInput {
    /// The matched event, unchanged.
    Event,
    /// The event rewritten through a transformer.
    Transformer(InputTransformer),
}

impl TargetInput {
    /// Input the target receives for `event`.
    pub fn render(&self, event: &Value) -> Result<Value> {
        match self {
            TargetInput::Event => Ok(event.clone()),
            TargetInput::Transformer(transformer) => transformer.render(event),
        }
    }
}

/// A rule target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTarget {
    pub id: String,
    pub kind: TargetKind,
    pub arn: String,
    /// Role the bus assumes to reach the target, when it needs one.
    pub role_arn: Option<String>,
    pub input: TargetInput,
}

/// A pattern bound to its targets.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRule {
    pub name: String,
    pub description: String,
    pub pattern: EventPattern,
    pub targets: Vec<RuleTarget>,
}

impl EventRule {
    /// Returns true if the rule fires for `event`.
    pub fn matches(&self, event: &Value) -> bool {
        self.pattern.matches(event)
    }

    /// Renders the rule as a template resource.
    pub fn to_resource(&self) -> Resource {
        let targets: Vec<Value> = self
            .targets
            .iter()
            .map(|target| {
                let mut rendered = json!({
                    "Id": target.id,
                    "Arn": target.arn,
                });
                if let Some(role) = &target.role_arn {
                    rendered["RoleArn"] = json!(role);
                }
                if let TargetInput::Transformer(transformer) = &target.input {
                    rendered["InputTransformer"] = transformer.to_properties();
                }
                rendered
            })
            .collect();

        Resource::new(
            "AWS::Events::Rule",
            json!({
                "Name": self.name,
                "Description": self.description,
                "EventPattern": self.pattern.as_value(),
                "State": "ENABLED",
                "Targets": targets,
            }),
        )
    }
}

/// Pull request rule for `branch`: starts the build with the pull request
/// context as environment overrides.
///
/// The pattern is narrowed to pull requests targeting `branch`, so each pull
/// request starts exactly one check.
pub fn pull_request_rule(
    name: &str,
    repository_arn: &str,
    branch: &str,
    project_arn: &str,
    role_arn: &str,
) -> Result<EventRule> {
    let pattern = EventPattern::new(json!({
        "source": [CODECOMMIT_SOURCE],
        "resources": [repository_arn],
        "detail": {
            "event": PULL_REQUEST_EVENTS,
            "destinationReference": [format!("refs/heads/{}", branch)],
        },
    }))?;

    let mut paths = BTreeMap::new();
    paths.insert("sourceCommit".to_string(), "$.detail.sourceCommit".to_string());
    paths.insert(
        "destinationCommit".to_string(),
        "$.detail.destinationCommit".to_string(),
    );
    paths.insert("pullRequestId".to_string(), "$.detail.pullRequestId".to_string());
    paths.insert(
        "repositoryName".to_string(),
        "$.detail.repositoryNames[0]".to_string(),
    );

    let overrides = [
        (DESTINATION_COMMIT_ID_VAR, "destinationCommit"),
        (PULL_REQUEST_ID_VAR, "pullRequestId"),
        (SOURCE_COMMIT_ID_VAR, "sourceCommit"),
        (REPOSITORY_NAME_VAR, "repositoryName"),
    ]
    .iter()
    .map(|(var, placeholder)| {
        format!(
            r#"{{"name":"{}","type":"PLAINTEXT","value":"<{}>"}}"#,
            var, placeholder
        )
    })
    .collect::<Vec<_>>()
    .join(",");
    let template = format!(
        r#"{{"sourceVersion":"<sourceCommit>","environmentVariablesOverride":[{}]}}"#,
        overrides
    );

    Ok(EventRule {
        name: name.to_string(),
        description: format!("Start the {} pull request check", branch),
        pattern,
        targets: vec![RuleTarget {
            id: "StartPullRequestCheck".to_string(),
            kind: TargetKind::Build,
            arn: project_arn.to_string(),
            role_arn: Some(role_arn.to_string()),
            input: TargetInput::Transformer(InputTransformer { paths, template }),
        }],
    })
}

fn build_pattern(project_name: &str, failed_only: bool) -> Result<EventPattern> {
    let mut detail = json!({ "project-name": [project_name] });
    if failed_only {
        detail["build-status"] = json!(["FAILED"]);
    }
    EventPattern::new(json!({
        "source": [CODEBUILD_SOURCE],
        "detail-type": [BUILD_STATE_CHANGE],
        "detail": detail,
    }))
}

/// Build state change rule: forwards every state change to the publisher.
pub fn build_state_rule(name: &str, project_name: &str, function_arn: &str) -> Result<EventRule> {
    Ok(EventRule {
        name: name.to_string(),
        description: format!("Publish {} build results", project_name),
        pattern: build_pattern(project_name, false)?,
        targets: vec![RuleTarget {
            id: "PublishBuildResult".to_string(),
            kind: TargetKind::Function,
            arn: function_arn.to_string(),
            role_arn: None,
            input: TargetInput::Event,
        }],
    })
}

/// Build failure rule: forwards failed builds to the notification topic.
pub fn build_failure_rule(name: &str, project_name: &str, topic_arn: &str) -> Result<EventRule> {
    Ok(EventRule {
        name: name.to_string(),
        description: format!("Notify on failed {} builds", project_name),
        pattern: build_pattern(project_name, true)?,
        targets: vec![RuleTarget {
            id: "NotifyBuildFailure".to_string(),
            kind: TargetKind::Topic,
            arn: topic_arn.to_string(),
            role_arn: None,
            input: TargetInput::Event,
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPO_ARN: &str = "arn:aws:codecommit:eu-west-1:123456789012:codechecker-demo";

    fn pr_rule() -> EventRule {
        pull_request_rule(
            "cc-main-pull-request",
            REPO_ARN,
            "main",
            "arn:aws:codebuild:eu-west-1:123456789012:project/cc-pr-check-main",
            "arn:aws:iam::123456789012:role/cc-main-start-build",
        )
        .unwrap()
    }

    fn pr_event(event: &str, destination: &str) -> Value {
        json!({
            "source": "aws.codecommit",
            "detail-type": "CodeCommit Pull Request State Change",
            "resources": [REPO_ARN],
            "detail": {
                "event": event,
                "destinationReference": destination,
                "repositoryNames": ["codechecker-demo"],
                "pullRequestId": "12",
                "sourceCommit": "abc",
                "destinationCommit": "def"
            }
        })
    }

    #[test]
    fn pull_request_rule_matches_target_branch_only() {
        let rule = pr_rule();
        assert!(rule.matches(&pr_event("pullRequestCreated", "refs/heads/main")));
        assert!(rule.matches(&pr_event("pullRequestSourceBranchUpdated", "refs/heads/main")));
        assert!(!rule.matches(&pr_event("pullRequestMergeStatusUpdated", "refs/heads/main")));
        assert!(!rule.matches(&pr_event("pullRequestCreated", "refs/heads/develop")));
    }

    #[test]
    fn transformer_renders_build_overrides() {
        let rule = pr_rule();
        let input = rule.targets[0]
            .input
            .render(&pr_event("pullRequestCreated", "refs/heads/main"))
            .unwrap();

        assert_eq!(input["sourceVersion"], "abc");
        let overrides = input["environmentVariablesOverride"].as_array().unwrap();
        assert_eq!(overrides.len(), 4);
        assert_eq!(
            overrides[0],
            json!({"name": "DESTINATION_COMMIT_ID", "type": "PLAINTEXT", "value": "def"})
        );
        assert_eq!(overrides[1]["value"], "12");
        assert_eq!(overrides[2]["value"], "abc");
        assert_eq!(overrides[3]["value"], "codechecker-demo");
    }

    #[test]
    fn transformer_escapes_and_defaults_missing_fields() {
        let mut paths = BTreeMap::new();
        paths.insert("title".to_string(), "$.detail.title".to_string());
        paths.insert("missing".to_string(), "$.detail.nothing".to_string());
        paths.insert("count".to_string(), "$.detail.count".to_string());
        let transformer = InputTransformer {
            paths,
            template: r#"{"t":"<title>","m":"<missing>","c":<count>,"raw":"<other>"}"#
                .to_string(),
        };

        let event = json!({"detail": {"title": "say \"hi\"", "count": 3}});
        let rendered = transformer.render(&event).unwrap();
        assert_eq!(rendered["t"], "say \"hi\"");
        assert_eq!(rendered["m"], "");
        assert_eq!(rendered["c"], 3);
        assert_eq!(rendered["raw"], "<other>");
    }

    #[test]
    fn transformer_rejects_non_json_output() {
        let transformer = InputTransformer {
            paths: BTreeMap::new(),
            template: "not json".to_string(),
        };
        assert!(transformer.render(&json!({})).is_err());
    }

    #[test]
    fn failure_rule_requires_failed_status() {
        let rule = build_failure_rule(
            "cc-main-build-failed",
            "cc-pr-check-main",
            "arn:aws:sns:eu-west-1:123456789012:cc-build-failures",
        )
        .unwrap();
        let event = |status: &str| {
            json!({
                "source": "aws.codebuild",
                "detail-type": "CodeBuild Build State Change",
                "detail": {"project-name": "cc-pr-check-main", "build-status": status}
            })
        };
        assert!(rule.matches(&event("FAILED")));
        assert!(!rule.matches(&event("SUCCEEDED")));
        assert!(!rule.matches(&event("IN_PROGRESS")));
    }

    #[test]
    fn state_rule_matches_every_status_of_its_project() {
        let rule = build_state_rule(
            "cc-main-build-state",
            "cc-pr-check-main",
            "arn:aws:lambda:eu-west-1:123456789012:function:cc-publish-build-result",
        )
        .unwrap();
        let event = |project: &str| {
            json!({
                "source": "aws.codebuild",
                "detail-type": "CodeBuild Build State Change",
                "detail": {"project-name": project, "build-status": "SUCCEEDED"}
            })
        };
        assert!(rule.matches(&event("cc-pr-check-main")));
        assert!(!rule.matches(&event("cc-pr-check-develop")));
    }

    #[test]
    fn resource_carries_pattern_and_transformer() {
        let resource = pr_rule().to_resource();
        assert_eq!(resource.resource_type, "AWS::Events::Rule");
        let props = &resource.properties;
        assert_eq!(props["State"], "ENABLED");
        assert_eq!(props["EventPattern"]["source"][0], "aws.codecommit");
        let target = &props["Targets"][0];
        assert_eq!(
            target["RoleArn"],
            "arn:aws:iam::123456789012:role/cc-main-start-build"
        );
        assert_eq!(
            target["InputTransformer"]["InputPathsMap"]["repositoryName"],
            "$.detail.repositoryNames[0]"
        );
    }
}
