//! In-memory CodeCommit used by tests and dry runs.
//!
//! Mirrors the service rules the handlers depend on: template names are
//! unique, an associated template cannot be deleted, approvals must target
//! the current revision and comment tokens are idempotent.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{ApprovalState, CodeCommit, CommentPosted, PullRequest, PullRequestComment};
use crate::error::{Error, Result};

/// An approval state update the fake received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedApproval {
    pub pull_request_id: String,
    pub revision_id: String,
    pub state: ApprovalState,
}

#[derive(Debug, Clone)]
struct StoredTemplate {
    description: String,
    content: String,
}

#[derive(Debug, Default)]
struct State {
    pull_requests: HashMap<String, PullRequest>,
    approvals: Vec<RecordedApproval>,
    comments: Vec<PullRequestComment>,
    comment_tokens: HashMap<String, String>,
    templates: BTreeMap<String, StoredTemplate>,
    associations: BTreeSet<(String, String)>,
    calls: Vec<String>,
    failing: BTreeSet<String>,
}

/// Thread-safe in-memory implementation of [`CodeCommit`].
#[derive(Debug, Default)]
pub struct InMemoryCodeCommit {
    state: Mutex<State>,
}

impl InMemoryCodeCommit {
    /// Creates an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a pull request.
    pub fn add_pull_request(&self, pull_request: PullRequest) {
        self.state()
            .pull_requests
            .insert(pull_request.pull_request_id.clone(), pull_request);
    }

    /// Makes every later call of `operation` fail.
    pub fn fail_on(&self, operation: &str) {
        self.state().failing.insert(operation.to_string());
    }

    /// Operations invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Approval updates received so far.
    pub fn approvals(&self) -> Vec<RecordedApproval> {
        self.state().approvals.clone()
    }

    /// Comments posted so far.
    pub fn comments(&self) -> Vec<PullRequestComment> {
        self.state().comments.clone()
    }

    /// Names of existing templates.
    pub fn template_names(&self) -> Vec<String> {
        self.state().templates.keys().cloned().collect()
    }

    /// Content of a template, if it exists.
    pub fn template_content(&self, name: &str) -> Option<String> {
        self.state().templates.get(name).map(|t| t.content.clone())
    }

    /// Description of a template, if it exists.
    pub fn template_description(&self, name: &str) -> Option<String> {
        self.state()
            .templates
            .get(name)
            .map(|t| t.description.clone())
    }

    /// Returns true if the template is associated with the repository.
    pub fn is_associated(&self, name: &str, repository: &str) -> bool {
        self.state()
            .associations
            .contains(&(name.to_string(), repository.to_string()))
    }

    fn begin(&self, operation: &str) -> Result<MutexGuard<'_, State>> {
        let mut state = self.state();
        state.calls.push(operation.to_string());
        if state.failing.contains(operation) {
            return Err(Error::CodeCommit(format!(
                "{} failed: injected failure",
                operation
            )));
        }
        Ok(state)
    }
}

#[async_trait]
impl CodeCommit for InMemoryCodeCommit {
    async fn get_pull_request(&self, pull_request_id: &str) -> Result<PullRequest> {
        let state = self.begin("get-pull-request")?;
        state
            .pull_requests
            .get(pull_request_id)
            .cloned()
            .ok_or_else(|| {
                Error::CodeCommit(format!(
                    "PullRequestDoesNotExistException: {}",
                    pull_request_id
                ))
            })
    }

    async fn update_pull_request_approval_state(
        &self,
        pull_request_id: &str,
        revision_id: &str,
        state: ApprovalState,
    ) -> Result<()> {
        let mut guard = self.begin("update-pull-request-approval-state")?;
        let current = guard
            .pull_requests
            .get(pull_request_id)
            .map(|pr| pr.revision_id.clone())
            .ok_or_else(|| {
                Error::CodeCommit(format!(
                    "PullRequestDoesNotExistException: {}",
                    pull_request_id
                ))
            })?;

        if current != revision_id {
            return Err(Error::CodeCommit(format!(
                "RevisionNotCurrentException: {} is not the current revision of {}",
                revision_id, pull_request_id
            )));
        }

        guard.approvals.push(RecordedApproval {
            pull_request_id: pull_request_id.to_string(),
            revision_id: revision_id.to_string(),
            state,
        });
        Ok(())
    }

    async fn post_comment_for_pull_request(
        &self,
        comment: &PullRequestComment,
    ) -> Result<CommentPosted> {
        let mut state = self.begin("post-comment-for-pull-request")?;
        if !state.pull_requests.contains_key(&comment.pull_request_id) {
            return Err(Error::CodeCommit(format!(
                "PullRequestDoesNotExistException: {}",
                comment.pull_request_id
            )));
        }

        if let Some(existing) = state.comment_tokens.get(&comment.client_request_token) {
            return Ok(CommentPosted {
                comment_id: existing.clone(),
                created: Some(false),
            });
        }

        let comment_id = format!("comment-{}", state.comments.len() + 1);
        state
            .comment_tokens
            .insert(comment.client_request_token.clone(), comment_id.clone());
        state.comments.push(comment.clone());
        Ok(CommentPosted {
            comment_id,
            created: Some(true),
        })
    }

    async fn create_approval_rule_template(
        &self,
        name: &str,
        description: &str,
        content: &str,
    ) -> Result<()> {
        let mut state = self.begin("create-approval-rule-template")?;
        if state.templates.contains_key(name) {
            return Err(Error::CodeCommit(format!(
                "ApprovalRuleTemplateNameAlreadyExistsException: {}",
                name
            )));
        }
        state.templates.insert(
            name.to_string(),
            StoredTemplate {
                description: description.to_string(),
                content: content.to_string(),
            },
        );
        Ok(())
    }

    async fn update_approval_rule_template_content(
        &self,
        name: &str,
        content: &str,
    ) -> Result<()> {
        let mut state = self.begin("update-approval-rule-template-content")?;
        match state.templates.get_mut(name) {
            Some(template) => {
                template.content = content.to_string();
                Ok(())
            }
            None => Err(Error::CodeCommit(format!(
                "ApprovalRuleTemplateDoesNotExistException: {}",
                name
            ))),
        }
    }

    async fn delete_approval_rule_template(&self, name: &str) -> Result<()> {
        let mut state = self.begin("delete-approval-rule-template")?;
        if state.associations.iter().any(|(t, _)| t == name) {
            return Err(Error::CodeCommit(format!(
                "ApprovalRuleTemplateInUseException: {}",
                name
            )));
        }
        // Deleting a missing template is not an error for the service.
        state.templates.remove(name);
        Ok(())
    }

    async fn associate_approval_rule_template_with_repository(
        &self,
        name: &str,
        repository: &str,
    ) -> Result<()> {
        let mut state = self.begin("associate-approval-rule-template-with-repository")?;
        if !state.templates.contains_key(name) {
            return Err(Error::CodeCommit(format!(
                "ApprovalRuleTemplateDoesNotExistException: {}",
                name
            )));
        }
        state
            .associations
            .insert((name.to_string(), repository.to_string()));
        Ok(())
    }

    async fn disassociate_approval_rule_template_from_repository(
        &self,
        name: &str,
        repository: &str,
    ) -> Result<()> {
        let mut state = self.begin("disassociate-approval-rule-template-from-repository")?;
        state
            .associations
            .remove(&(name.to_string(), repository.to_string()));
        Ok(())
    }
}
