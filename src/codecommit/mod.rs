//! Source-control service client.
//!
//! The [`CodeCommit`] trait covers the calls the gate, the result publisher
//! and the approval template lifecycle make. [`AwsCliCodeCommit`] drives the
//! `aws` CLI available inside build containers and functions;
//! [`InMemoryCodeCommit`] mirrors the service's behavior for tests and dry
//! runs.

mod cli;
mod memory;

pub use cli::AwsCliCodeCommit;
pub use memory::{InMemoryCodeCommit, RecordedApproval};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Approval state submitted for a pull request revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApprovalState {
    /// The caller approves the revision.
    Approve,
    /// The caller withdraws a previous approval.
    Revoke,
}

impl ApprovalState {
    /// Wire value accepted by `update-pull-request-approval-state`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalState::Approve => "APPROVE",
            ApprovalState::Revoke => "REVOKE",
        }
    }
}

impl std::fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source/destination pair of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestTarget {
    pub repository_name: String,
    #[serde(default)]
    pub source_reference: Option<String>,
    #[serde(default)]
    pub destination_reference: Option<String>,
    #[serde(default)]
    pub source_commit: Option<String>,
    #[serde(default)]
    pub destination_commit: Option<String>,
}

/// Pull request as returned by `get-pull-request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub pull_request_id: String,
    /// Current revision; approvals are recorded against it.
    pub revision_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub pull_request_status: Option<String>,
    #[serde(default)]
    pub pull_request_targets: Vec<PullRequestTarget>,
}

/// A comment to post on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestComment {
    pub pull_request_id: String,
    pub repository_name: String,
    /// Destination commit the comment is anchored against.
    pub before_commit_id: String,
    /// Source commit the comment is anchored against.
    pub after_commit_id: String,
    pub content: String,
    /// Idempotency token; repeating a token does not post twice.
    pub client_request_token: String,
}

/// Result of posting a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentPosted {
    pub comment_id: String,
    /// `Some(false)` when the token had already been used and nothing new
    /// was posted. `None` when the client cannot tell a replay apart.
    pub created: Option<bool>,
}

/// Calls made against the source-control service.
#[async_trait]
pub trait CodeCommit: Send + Sync {
    /// Looks up a pull request, including its current revision id.
    async fn get_pull_request(&self, pull_request_id: &str) -> Result<PullRequest>;

    /// Sets the caller's approval state on a pull request revision.
    async fn update_pull_request_approval_state(
        &self,
        pull_request_id: &str,
        revision_id: &str,
        state: ApprovalState,
    ) -> Result<()>;

    /// Posts a general comment on a pull request.
    async fn post_comment_for_pull_request(
        &self,
        comment: &PullRequestComment,
    ) -> Result<CommentPosted>;

    /// Creates a named approval rule template.
    async fn create_approval_rule_template(
        &self,
        name: &str,
        description: &str,
        content: &str,
    ) -> Result<()>;

    /// Replaces the content of an existing template.
    async fn update_approval_rule_template_content(&self, name: &str, content: &str)
        -> Result<()>;

    /// Deletes a template.
    async fn delete_approval_rule_template(&self, name: &str) -> Result<()>;

    /// Associates a template with a repository.
    async fn associate_approval_rule_template_with_repository(
        &self,
        name: &str,
        repository: &str,
    ) -> Result<()>;

    /// Removes the association between a template and a repository.
    async fn disassociate_approval_rule_template_from_repository(
        &self,
        name: &str,
        repository: &str,
    ) -> Result<()>;
}

#[async_trait]
impl<T: CodeCommit + ?Sized> CodeCommit for Arc<T> {
    async fn get_pull_request(&self, pull_request_id: &str) -> Result<PullRequest> {
        (**self).get_pull_request(pull_request_id).await
    }

    async fn update_pull_request_approval_state(
        &self,
        pull_request_id: &str,
        revision_id: &str,
        state: ApprovalState,
    ) -> Result<()> {
        (**self)
            .update_pull_request_approval_state(pull_request_id, revision_id, state)
            .await
    }

    async fn post_comment_for_pull_request(
        &self,
        comment: &PullRequestComment,
    ) -> Result<CommentPosted> {
        (**self).post_comment_for_pull_request(comment).await
    }

    async fn create_approval_rule_template(
        &self,
        name: &str,
        description: &str,
        content: &str,
    ) -> Result<()> {
        (**self)
            .create_approval_rule_template(name, description, content)
            .await
    }

    async fn update_approval_rule_template_content(
        &self,
        name: &str,
        content: &str,
    ) -> Result<()> {
        (**self)
            .update_approval_rule_template_content(name, content)
            .await
    }

    async fn delete_approval_rule_template(&self, name: &str) -> Result<()> {
        (**self).delete_approval_rule_template(name).await
    }

    async fn associate_approval_rule_template_with_repository(
        &self,
        name: &str,
        repository: &str,
    ) -> Result<()> {
        (**self)
            .associate_approval_rule_template_with_repository(name, repository)
            .await
    }

    async fn disassociate_approval_rule_template_from_repository(
        &self,
        name: &str,
        repository: &str,
    ) -> Result<()> {
        (**self)
            .disassociate_approval_rule_template_from_repository(name, repository)
            .await
    }
}
