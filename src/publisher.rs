//! Posts build results back to the pull request that triggered the build.
//!
//! The publisher receives every build state change of the pull request
//! checks. The pull request context travels with the build as environment
//! overrides, so the event alone is enough to find the pull request and the
//! commits the comment is attached to.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::codecommit::{CodeCommit, PullRequestComment};
use crate::error::{Error, Result};
use crate::gate::PullRequestContext;

/// Status of a build, as reported in state change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    InProgress,
    Succeeded,
    Failed,
    Stopped,
}

impl BuildStatus {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "IN_PROGRESS" => Ok(BuildStatus::InProgress),
            "SUCCEEDED" => Ok(BuildStatus::Succeeded),
            "FAILED" => Ok(BuildStatus::Failed),
            "STOPPED" => Ok(BuildStatus::Stopped),
            other => Err(Error::Event(format!("unknown build status '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::InProgress => "IN_PROGRESS",
            BuildStatus::Succeeded => "SUCCEEDED",
            BuildStatus::Failed => "FAILED",
            BuildStatus::Stopped => "STOPPED",
        }
    }

    fn headline(&self) -> &'static str {
        match self {
            BuildStatus::InProgress => "Pull request check started",
            BuildStatus::Succeeded => "Pull request check passed",
            BuildStatus::Failed => "Pull request check failed",
            BuildStatus::Stopped => "Pull request check was stopped",
        }
    }
}

/// The parts of a build state change event the publisher uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStateChange {
    pub project_name: String,
    pub build_id: String,
    pub status: BuildStatus,
    pub region: Option<String>,
    /// Environment variables the build ran with, by name.
    pub environment: BTreeMap<String, String>,
}

impl BuildStateChange {
    /// Parses a `CodeBuild Build State Change` event.
    pub fn from_event(event: &Value) -> Result<Self> {
        let detail = event
            .get("detail")
            .ok_or_else(|| Error::Event("event has no detail".to_string()))?;
        let field = |name: &str| -> Result<String> {
            detail
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::Event(format!("detail.{} is missing", name)))
        };

        let environment = detail
            .pointer("/additional-information/environment/environment-variables")
            .and_then(Value::as_array)
            .map(|vars| {
                vars.iter()
                    .filter_map(|var| {
                        let name = var.get("name")?.as_str()?;
                        let value = var.get("value")?.as_str()?;
                        Some((name.to_string(), value.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            project_name: field("project-name")?,
            build_id: field("build-id")?,
            status: BuildStatus::parse(&field("build-status")?)?,
            region: event.get("region").and_then(Value::as_str).map(str::to_string),
            environment,
        })
    }

    /// Pull request the build ran for, when it was started by a pull request.
    pub fn pull_request(&self) -> Option<PullRequestContext> {
        let vars: HashMap<String, String> = self
            .environment
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        PullRequestContext::from_vars(&vars).ok()
    }

    /// Console link to the build's logs.
    pub fn console_url(&self) -> Option<String> {
        let region = self.region.as_deref()?;
        let build = self.build_id.rsplit('/').next()?;
        Some(format!(
            "https://{region}.console.aws.amazon.com/codesuite/codebuild/projects/{project}/build/{build}/?region={region}",
            region = region,
            project = self.project_name,
            build = build.replace(':', "%3A"),
        ))
    }

    /// Idempotency token: identical for redeliveries of the same event.
    pub fn client_request_token(&self) -> String {
        let name = format!("{}:{}", self.build_id, self.status.as_str());
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    /// Comment body posted on the pull request.
    pub fn comment(&self, context: &PullRequestContext) -> String {
        let mut body = format!(
            "**{}** for commit `{}` ({}).",
            self.status.headline(),
            context.source_commit_id,
            self.project_name
        );
        if let Some(url) = self.console_url() {
            body.push_str(&format!("\n\n[View build logs]({})", url));
        }
        body
    }
}

/// What the publisher did with an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum PublishOutcome {
    /// A comment was posted or an earlier post of the same event was found.
    Posted {
        pull_request_id: String,
        comment_id: String,
        /// Whether this call posted the comment; absent when the client
        /// cannot tell a replayed token apart.
        #[serde(skip_serializing_if = "Option::is_none")]
        created: Option<bool>,
    },
    /// The build was not started by a pull request.
    Skipped { build_id: String },
}

/// Posts build results as pull request comments.
pub struct ResultPublisher<C: CodeCommit> {
    client: C,
}

impl<C: CodeCommit> ResultPublisher<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Handles one build state change event.
    pub async fn publish(&self, event: &Value) -> Result<PublishOutcome> {
        let change = BuildStateChange::from_event(event)?;

        let Some(context) = change.pull_request() else {
            tracing::warn!(
                build_id = %change.build_id,
                project = %change.project_name,
                "build has no pull request context, skipping"
            );
            return Ok(PublishOutcome::Skipped {
                build_id: change.build_id,
            });
        };

        let comment = PullRequestComment {
            pull_request_id: context.pull_request_id.clone(),
            repository_name: context.repository_name.clone(),
            before_commit_id: context.destination_commit_id.clone(),
            after_commit_id: context.source_commit_id.clone(),
            content: change.comment(&context),
            client_request_token: change.client_request_token(),
        };
        let posted = self.client.post_comment_for_pull_request(&comment).await?;

        tracing::info!(
            pull_request_id = %context.pull_request_id,
            build_id = %change.build_id,
            status = change.status.as_str(),
            comment_id = %posted.comment_id,
            created = ?posted.created,
            "build result published"
        );

        Ok(PublishOutcome::Posted {
            pull_request_id: context.pull_request_id,
            comment_id: posted.comment_id,
            created: posted.created,
        })
    }
}
