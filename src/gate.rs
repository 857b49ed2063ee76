//! Pull request approval gate.
//!
//! Runs at the end of a pull request check: detects the test outcome from
//! the captured text output, maps it to an approval state and submits that
//! state against the pull request's current revision.
//!
//! Outcome detection is a case-insensitive search for `passed` in the raw
//! output, matching the shell lines in the build specification. A failing
//! run whose output mentions "passed" anywhere (e.g. "1 failed, 3 passed")
//! is therefore reported as passed; the check relies on the test command
//! failing the build in that case.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codecommit::{ApprovalState, CodeCommit};
use crate::error::{Error, Result};

/// Environment variable carrying the pull request id.
pub const PULL_REQUEST_ID_VAR: &str = "PULL_REQUEST_ID";
/// Environment variable carrying the source commit.
pub const SOURCE_COMMIT_ID_VAR: &str = "SOURCE_COMMIT_ID";
/// Environment variable carrying the destination commit.
pub const DESTINATION_COMMIT_ID_VAR: &str = "DESTINATION_COMMIT_ID";
/// Environment variable carrying the repository name.
pub const REPOSITORY_NAME_VAR: &str = "REPOSITORY_NAME";

/// Outcome of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestOutcome {
    Passed,
    Failed,
}

impl TestOutcome {
    /// Detects the outcome from captured test output.
    pub fn detect(output: &str) -> Self {
        if output.to_lowercase().contains("passed") {
            TestOutcome::Passed
        } else {
            TestOutcome::Failed
        }
    }

    /// Label used in logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            TestOutcome::Passed => "PASSED",
            TestOutcome::Failed => "FAILED",
        }
    }
}

impl From<TestOutcome> for ApprovalState {
    fn from(outcome: TestOutcome) -> Self {
        match outcome {
            TestOutcome::Passed => ApprovalState::Approve,
            TestOutcome::Failed => ApprovalState::Revoke,
        }
    }
}

/// Pull request under test, as handed to the build by the event rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestContext {
    pub pull_request_id: String,
    pub source_commit_id: String,
    pub destination_commit_id: String,
    pub repository_name: String,
}

impl PullRequestContext {
    /// Reads the context from the process environment.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Reads the context from the given variables.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let get = |name: &str| -> Result<String> {
            vars.get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| Error::Config(format!("{} is not set", name)))
        };

        Ok(Self {
            pull_request_id: get(PULL_REQUEST_ID_VAR)?,
            source_commit_id: get(SOURCE_COMMIT_ID_VAR)?,
            destination_commit_id: get(DESTINATION_COMMIT_ID_VAR)?,
            repository_name: get(REPOSITORY_NAME_VAR)?,
        })
    }
}

/// What the gate decided and submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReport {
    pub pull_request_id: String,
    pub revision_id: String,
    pub outcome: TestOutcome,
    pub decision: ApprovalState,
}

/// Submits approval states derived from test output.
pub struct Gatekeeper<C: CodeCommit> {
    client: C,
}

impl<C: CodeCommit> Gatekeeper<C> {
    /// Creates a gatekeeper using the given client.
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Decides on `output` and submits the decision for the pull request.
    ///
    /// Any failure, including a stale revision, is returned and fails the
    /// build; nothing is retried.
    pub async fn evaluate(&self, context: &PullRequestContext, output: &str) -> Result<GateReport> {
        let outcome = TestOutcome::detect(output);
        let decision = ApprovalState::from(outcome);
        tracing::info!(
            pull_request_id = %context.pull_request_id,
            outcome = outcome.as_str(),
            decision = %decision,
            "test outcome detected"
        );

        let pull_request = self
            .client
            .get_pull_request(&context.pull_request_id)
            .await?;
        if pull_request.revision_id.is_empty() {
            return Err(Error::CodeCommit(format!(
                "pull request {} has no revision id",
                context.pull_request_id
            )));
        }

        self.client
            .update_pull_request_approval_state(
                &context.pull_request_id,
                &pull_request.revision_id,
                decision,
            )
            .await?;

        tracing::info!(
            pull_request_id = %context.pull_request_id,
            revision_id = %pull_request.revision_id,
            decision = %decision,
            "approval state submitted"
        );

        Ok(GateReport {
            pull_request_id: context.pull_request_id.clone(),
            revision_id: pull_request.revision_id,
            outcome,
            decision,
        })
    }

    /// Reads the captured output from `path` and evaluates it.
    pub async fn evaluate_file(
        &self,
        context: &PullRequestContext,
        path: &Path,
    ) -> Result<GateReport> {
        let output = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!(
                "cannot read test output '{}': {}",
                path.display(),
                e
            ))
        })?;
        self.evaluate(context, &output).await
    }
}
