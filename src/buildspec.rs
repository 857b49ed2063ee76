//! Build specification for the per-branch pull request check.
//!
//! The post_build phase runs the tests and turns their output into an
//! approval state on the pull request, using the build's own role. By
//! default the decision lines are the shell rendering of [`crate::gate`]: a
//! case-insensitive `passed` anywhere in the captured output approves,
//! anything else revokes. With `gate_binary` configured the phase calls
//! `codechecker gate` instead.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::BuildConfig;
use crate::error::{Error, Result};

/// Build specification version.
pub const BUILDSPEC_VERSION: &str = "0.2";

/// Name of the JUnit report group.
pub const REPORT_GROUP: &str = "pytest_reports";

/// Environment section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildEnv {
    #[serde(rename = "git-credential-helper")]
    pub git_credential_helper: String,
}

/// A phase: an ordered list of shell commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phase {
    pub commands: Vec<String>,
}

/// The three phases run by every pull request check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phases {
    pub install: Phase,
    pub build: Phase,
    pub post_build: Phase,
}

/// A report group published from the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportGroup {
    pub files: Vec<String>,
    #[serde(rename = "base-directory")]
    pub base_directory: String,
    #[serde(rename = "file-format")]
    pub file_format: String,
}

/// Complete build specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildSpec {
    pub version: String,
    pub env: BuildEnv,
    pub phases: Phases,
    pub reports: BTreeMap<String, ReportGroup>,
}

impl BuildSpec {
    /// Specification for the pull request check described by `build`.
    pub fn for_pull_requests(build: &BuildConfig) -> Self {
        let mut post_build = vec![build.test_command.clone()];
        match &build.gate_binary {
            Some(binary) => post_build.push(gate_command(binary, &build.test_output)),
            None => post_build.extend(decision_commands(&build.test_output)),
        }

        let mut reports = BTreeMap::new();
        reports.insert(
            REPORT_GROUP.to_string(),
            ReportGroup {
                files: vec![build.report_file.clone()],
                base_directory: build.report_dir.clone(),
                file_format: "JUNITXML".to_string(),
            },
        );

        Self {
            version: BUILDSPEC_VERSION.to_string(),
            env: BuildEnv {
                git_credential_helper: "yes".to_string(),
            },
            phases: Phases {
                install: Phase {
                    commands: build.install_commands.clone(),
                },
                build: Phase {
                    commands: build.build_commands.clone(),
                },
                post_build: Phase {
                    commands: post_build,
                },
            },
            reports,
        }
    }

    /// Renders the specification as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::Serialization(format!("failed to render buildspec: {}", e)))
    }
}

/// Shell lines that map the captured test output to an approval state and
/// submit it against the pull request's current revision.
pub fn decision_commands(test_output: &str) -> Vec<String> {
    vec![
        format!(
            r#"if grep -i "passed" {}; then PYTEST_RESULT="PASSED"; else PYTEST_RESULT="FAILED"; fi"#,
            test_output
        ),
        r#"if [ $PYTEST_RESULT != "PASSED" ]; then PR_STATUS="REVOKE"; else PR_STATUS="APPROVE"; fi"#
            .to_string(),
        "echo $PR_STATUS".to_string(),
        "REVISION_ID=$(aws codecommit get-pull-request --pull-request-id $PULL_REQUEST_ID | jq -r '.pullRequest.revisionId')"
            .to_string(),
        "aws codecommit update-pull-request-approval-state --pull-request-id $PULL_REQUEST_ID --revision-id $REVISION_ID --approval-state $PR_STATUS --region $AWS_REGION"
            .to_string(),
    ]
}

/// Runs the decision through the `gate` subcommand.
pub fn gate_command(binary: &str, test_output: &str) -> String {
    format!("{} gate --output {}", binary, test_output)
}
