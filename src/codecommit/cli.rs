//! CodeCommit client backed by the `aws` CLI.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use super::{ApprovalState, CodeCommit, CommentPosted, PullRequest, PullRequestComment};
use crate::error::{Error, Result};

/// Runs `aws codecommit <operation>` for every call.
#[derive(Debug, Clone)]
pub struct AwsCliCodeCommit {
    program: String,
    region: Option<String>,
}

impl AwsCliCodeCommit {
    /// Creates a client using `aws` from `PATH` and the CLI's default region.
    pub fn new() -> Self {
        Self {
            program: "aws".to_string(),
            region: None,
        }
    }

    /// Pins the region passed to every call.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Uses a different executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Full argument list for an operation.
    fn args(&self, operation: &str, params: &[(&str, &str)]) -> Vec<String> {
        let mut args = vec!["codecommit".to_string(), operation.to_string()];
        for (flag, value) in params {
            args.push(format!("--{}", flag));
            args.push((*value).to_string());
        }
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        args.push("--output".to_string());
        args.push("json".to_string());
        args
    }

    async fn run(&self, operation: &str, params: &[(&str, &str)]) -> Result<Value> {
        let args = self.args(operation, params);
        tracing::debug!(operation, program = %self.program, "invoking aws cli");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|e| Error::CodeCommit(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::CodeCommit(format!(
                "{} failed: {}",
                operation,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&stdout)
            .map_err(|e| Error::CodeCommit(format!("failed to parse {} output: {}", operation, e)))
    }
}

impl Default for AwsCliCodeCommit {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetPullRequestOutput {
    pull_request: PullRequest,
}

#[async_trait]
impl CodeCommit for AwsCliCodeCommit {
    async fn get_pull_request(&self, pull_request_id: &str) -> Result<PullRequest> {
        let value = self
            .run("get-pull-request", &[("pull-request-id", pull_request_id)])
            .await?;
        let output: GetPullRequestOutput = serde_json::from_value(value).map_err(|e| {
            Error::CodeCommit(format!("unexpected get-pull-request output: {}", e))
        })?;
        Ok(output.pull_request)
    }

    async fn update_pull_request_approval_state(
        &self,
        pull_request_id: &str,
        revision_id: &str,
        state: ApprovalState,
    ) -> Result<()> {
        self.run(
            "update-pull-request-approval-state",
            &[
                ("pull-request-id", pull_request_id),
                ("revision-id", revision_id),
                ("approval-state", state.as_str()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn post_comment_for_pull_request(
        &self,
        comment: &PullRequestComment,
    ) -> Result<CommentPosted> {
        let value = self
            .run(
                "post-comment-for-pull-request",
                &[
                    ("pull-request-id", comment.pull_request_id.as_str()),
                    ("repository-name", comment.repository_name.as_str()),
                    ("before-commit-id", comment.before_commit_id.as_str()),
                    ("after-commit-id", comment.after_commit_id.as_str()),
                    ("content", comment.content.as_str()),
                    ("client-request-token", comment.client_request_token.as_str()),
                ],
            )
            .await?;

        // The CLI returns the same document for a replayed token.
        let comment_id = value["comment"]["commentId"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        Ok(CommentPosted {
            comment_id,
            created: None,
        })
    }

    async fn create_approval_rule_template(
        &self,
        name: &str,
        description: &str,
        content: &str,
    ) -> Result<()> {
        self.run(
            "create-approval-rule-template",
            &[
                ("approval-rule-template-name", name),
                ("approval-rule-template-description", description),
                ("approval-rule-template-content", content),
            ],
        )
        .await?;
        Ok(())
    }

    async fn update_approval_rule_template_content(
        &self,
        name: &str,
        content: &str,
    ) -> Result<()> {
        self.run(
            "update-approval-rule-template-content",
            &[
                ("approval-rule-template-name", name),
                ("new-rule-content", content),
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_approval_rule_template(&self, name: &str) -> Result<()> {
        self.run(
            "delete-approval-rule-template",
            &[("approval-rule-template-name", name)],
        )
        .await?;
        Ok(())
    }

    async fn associate_approval_rule_template_with_repository(
        &self,
        name: &str,
        repository: &str,
    ) -> Result<()> {
        self.run(
            "associate-approval-rule-template-with-repository",
            &[
                ("approval-rule-template-name", name),
                ("repository-name", repository),
            ],
        )
        .await?;
        Ok(())
    }

    async fn disassociate_approval_rule_template_from_repository(
        &self,
        name: &str,
        repository: &str,
    ) -> Result<()> {
        self.run(
            "disassociate-approval-rule-template-from-repository",
            &[
                ("approval-rule-template-name", name),
                ("repository-name", repository),
            ],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_include_region_and_json_output() {
        let client = AwsCliCodeCommit::new().with_region("eu-west-1");
        let args = client.args(
            "update-pull-request-approval-state",
            &[("pull-request-id", "12"), ("approval-state", "APPROVE")],
        );

        assert_eq!(
            args,
            vec![
                "codecommit",
                "update-pull-request-approval-state",
                "--pull-request-id",
                "12",
                "--approval-state",
                "APPROVE",
                "--region",
                "eu-west-1",
                "--output",
                "json",
            ]
        );
    }

    #[test]
    fn args_without_region() {
        let client = AwsCliCodeCommit::new();
        let args = client.args("get-pull-request", &[("pull-request-id", "7")]);
        assert!(!args.contains(&"--region".to_string()));
    }

    #[tokio::test]
    async fn missing_program_is_a_codecommit_error() {
        let client = AwsCliCodeCommit::new().with_program("/nonexistent/aws-cli-binary");
        let err = client.get_pull_request("12").await.unwrap_err();
        assert!(matches!(err, Error::CodeCommit(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn get_pull_request_parses_cli_output() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("aws");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '{\"pullRequest\": {\"pullRequestId\": \"12\", \"revisionId\": \"rev-9\"}}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let client = AwsCliCodeCommit::new().with_program(script.to_string_lossy());
        let pr = client.get_pull_request("12").await.unwrap();
        assert_eq!(pr.pull_request_id, "12");
        assert_eq!(pr.revision_id, "rev-9");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn posted_comment_does_not_claim_creation() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("aws");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '{\"comment\": {\"commentId\": \"c-1\", \"content\": \"x\"}}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let client = AwsCliCodeCommit::new().with_program(script.to_string_lossy());
        let comment = PullRequestComment {
            pull_request_id: "12".to_string(),
            repository_name: "repo".to_string(),
            before_commit_id: "def".to_string(),
            after_commit_id: "abc".to_string(),
            content: "x".to_string(),
            client_request_token: "token".to_string(),
        };
        for _ in 0..2 {
            let posted = client.post_comment_for_pull_request(&comment).await.unwrap();
            assert_eq!(posted.comment_id, "c-1");
            assert_eq!(posted.created, None);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_cli_surfaces_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("aws");
        std::fs::write(
            &script,
            "#!/bin/sh\necho 'RevisionNotCurrentException' >&2\nexit 254\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let client = AwsCliCodeCommit::new().with_program(script.to_string_lossy());
        let err = client
            .update_pull_request_approval_state("12", "stale", ApprovalState::Approve)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("RevisionNotCurrentException"));
    }
}
