//! Stack configuration and validation.
//!
//! The configuration surface is a TOML document mapping protected branches to
//! their required approval counts, plus optional caller-supplied resources
//! (repository, notification topic, isolated network). Account and region
//! fall back to the `CDK_DEFAULT_ACCOUNT` / `CDK_DEFAULT_REGION` environment
//! variables so existing deployment pipelines keep working.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::stack::naming;

/// Environment variable consulted when `account` is not configured.
pub const ACCOUNT_ENV: &str = "CDK_DEFAULT_ACCOUNT";

/// Environment variable consulted when `region` is not configured.
pub const REGION_ENV: &str = "CDK_DEFAULT_REGION";

/// IAM role names are limited to 64 characters.
const MAX_ROLE_NAME_LEN: usize = 64;

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Adds an error to the result.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Adds a warning to the result.
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

/// An existing repository to gate instead of creating one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Repository name.
    pub name: String,
}

/// An existing notification topic to publish build failures to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// ARN of the topic.
    pub topic_arn: String,
}

/// Network boundary for every network-attached resource.
///
/// When present, the build projects and both functions are placed in the
/// given isolated subnets behind a shared security group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// VPC identifier.
    pub vpc_id: String,
    /// Isolated subnet identifiers.
    #[serde(default)]
    pub subnet_ids: Vec<String>,
}

/// Build job settings shared by every branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Build image.
    #[serde(default = "default_image")]
    pub image: String,
    /// Compute type for the build container.
    #[serde(default = "default_compute_type")]
    pub compute_type: String,
    /// Tooling and dependency setup.
    #[serde(default = "default_install_commands")]
    pub install_commands: Vec<String>,
    /// Synthesis step.
    #[serde(default = "default_build_commands")]
    pub build_commands: Vec<String>,
    /// Test command; must write its text output to `test_output`.
    #[serde(default = "default_test_command")]
    pub test_command: String,
    /// File the test command's text output is captured in.
    #[serde(default = "default_test_output")]
    pub test_output: String,
    /// Directory holding the JUnit-XML report.
    #[serde(default = "default_report_dir")]
    pub report_dir: String,
    /// JUnit-XML report file name, relative to `report_dir`.
    #[serde(default = "default_report_file")]
    pub report_file: String,
    /// `codechecker` executable installed in the build image. When set, the
    /// decision runs `codechecker gate` instead of the shell lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_binary: Option<String>,
}

fn default_image() -> String {
    "aws/codebuild/standard:7.0".to_string()
}

fn default_compute_type() -> String {
    "BUILD_GENERAL1_SMALL".to_string()
}

fn default_install_commands() -> Vec<String> {
    vec![
        "npm install -g aws-cdk".to_string(),
        "pip install git-remote-codecommit".to_string(),
        "pip install -r requirements.txt".to_string(),
    ]
}

fn default_build_commands() -> Vec<String> {
    vec!["cdk synth".to_string()]
}

fn default_test_command() -> String {
    "pytest --junitxml=reports/codechecker-pytest.xml > pytest-output.txt".to_string()
}

fn default_test_output() -> String {
    "pytest-output.txt".to_string()
}

fn default_report_dir() -> String {
    "reports".to_string()
}

fn default_report_file() -> String {
    "codechecker-pytest.xml".to_string()
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            compute_type: default_compute_type(),
            install_commands: default_install_commands(),
            build_commands: default_build_commands(),
            test_command: default_test_command(),
            test_output: default_test_output(),
            report_dir: default_report_dir(),
            report_file: default_report_file(),
            gate_binary: None,
        }
    }
}

/// Deployment package of a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionConfig {
    /// Lambda runtime identifier.
    pub runtime: String,
    /// Handler entry point.
    pub handler: String,
    /// Bucket holding the code asset.
    pub code_bucket: String,
    /// Key of the code asset.
    pub code_key: String,
}

impl FunctionConfig {
    /// Defaults for the result-publisher function.
    pub fn publisher_defaults() -> Self {
        Self {
            runtime: "python3.12".to_string(),
            handler: "publish_codebuild_result.lambda_handler".to_string(),
            code_bucket: "codechecker-assets".to_string(),
            code_key: "assets/publish_codebuild_result.zip".to_string(),
        }
    }

    /// Defaults for the approval template custom-resource provider.
    pub fn provider_defaults() -> Self {
        Self {
            runtime: "provided.al2023".to_string(),
            handler: "bootstrap".to_string(),
            code_bucket: "codechecker-assets".to_string(),
            code_key: "assets/approval_template_provider.zip".to_string(),
        }
    }
}

fn default_publisher() -> FunctionConfig {
    FunctionConfig::publisher_defaults()
}

fn default_provider() -> FunctionConfig {
    FunctionConfig::provider_defaults()
}

fn default_stack_name() -> String {
    "codechecker-dev".to_string()
}

fn default_partition() -> String {
    "aws".to_string()
}

fn default_approver_role() -> String {
    "aacb-developer".to_string()
}

/// Top-level stack configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackConfig {
    /// Stack name; prefixes every named resource.
    #[serde(default = "default_stack_name")]
    pub stack_name: String,
    /// Target account id.
    #[serde(default)]
    pub account: Option<String>,
    /// Target region.
    #[serde(default)]
    pub region: Option<String>,
    /// ARN partition.
    #[serde(default = "default_partition")]
    pub partition: String,
    /// Administrative role allowed to approve pull requests.
    #[serde(default = "default_approver_role")]
    pub approver_role: String,
    /// Protected branch -> required approval count.
    #[serde(default)]
    pub approvals_per_branch: BTreeMap<String, u32>,
    /// Existing repository; one is created when absent.
    #[serde(default)]
    pub repository: Option<RepositoryConfig>,
    /// Existing notification topic; one is created when absent.
    #[serde(default)]
    pub notifications: Option<NotificationConfig>,
    /// Isolated network placement.
    #[serde(default)]
    pub network: Option<NetworkConfig>,
    /// Build job settings.
    #[serde(default)]
    pub build: BuildConfig,
    /// Result-publisher function package.
    #[serde(default = "default_publisher")]
    pub publisher: FunctionConfig,
    /// Custom-resource provider function package.
    #[serde(default = "default_provider")]
    pub provider: FunctionConfig,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack_name: default_stack_name(),
            account: None,
            region: None,
            partition: default_partition(),
            approver_role: default_approver_role(),
            approvals_per_branch: BTreeMap::new(),
            repository: None,
            notifications: None,
            network: None,
            build: BuildConfig::default(),
            publisher: default_publisher(),
            provider: default_provider(),
        }
    }
}

/// Resolved deployment target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Account id.
    pub account: String,
    /// Region.
    pub region: String,
    /// ARN partition.
    pub partition: String,
}

impl StackConfig {
    /// Creates a configuration for the given account and region.
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            region: Some(region.into()),
            ..Default::default()
        }
    }

    /// Adds a protected branch.
    pub fn with_branch(mut self, branch: impl Into<String>, required_approvals: u32) -> Self {
        self.approvals_per_branch
            .insert(branch.into(), required_approvals);
        self
    }

    /// Uses an existing repository instead of creating one.
    pub fn with_repository(mut self, name: impl Into<String>) -> Self {
        self.repository = Some(RepositoryConfig { name: name.into() });
        self
    }

    /// Uses an existing notification topic instead of creating one.
    pub fn with_topic(mut self, topic_arn: impl Into<String>) -> Self {
        self.notifications = Some(NotificationConfig {
            topic_arn: topic_arn.into(),
        });
        self
    }

    /// Places network-attached resources in the given isolated subnets.
    pub fn with_network(mut self, vpc_id: impl Into<String>, subnet_ids: Vec<String>) -> Self {
        self.network = Some(NetworkConfig {
            vpc_id: vpc_id.into(),
            subnet_ids,
        });
        self
    }

    /// Parses a configuration from TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("invalid stack config: {}", e)))
    }

    /// Loads a configuration file and fills account/region from the process
    /// environment when the file leaves them out.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        let vars: HashMap<String, String> = std::env::vars().collect();
        Ok(Self::from_toml_str(&content)?.with_environment_defaults(&vars))
    }

    /// Fills missing account/region from the given variables.
    pub fn with_environment_defaults(mut self, vars: &HashMap<String, String>) -> Self {
        if self.account.is_none() {
            self.account = vars.get(ACCOUNT_ENV).filter(|v| !v.is_empty()).cloned();
        }
        if self.region.is_none() {
            self.region = vars.get(REGION_ENV).filter(|v| !v.is_empty()).cloned();
        }
        self
    }

    /// Returns the resolved deployment target.
    pub fn environment(&self) -> Result<Environment> {
        let account = self
            .account
            .clone()
            .ok_or_else(|| Error::Config(format!("account not set (or {})", ACCOUNT_ENV)))?;
        let region = self
            .region
            .clone()
            .ok_or_else(|| Error::Config(format!("region not set (or {})", REGION_ENV)))?;
        Ok(Environment {
            account,
            region,
            partition: self.partition.clone(),
        })
    }
}

impl Validate for StackConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.stack_name.trim().is_empty() {
            result.add_error("stack_name cannot be empty");
        }

        if self.account.as_deref().map_or(true, str::is_empty) {
            result.add_error(format!("account must be set in config or {}", ACCOUNT_ENV));
        }

        if self.region.as_deref().map_or(true, str::is_empty) {
            result.add_error(format!("region must be set in config or {}", REGION_ENV));
        }

        if self.approver_role.trim().is_empty() {
            result.add_error("approver_role cannot be empty");
        }

        if self.approvals_per_branch.is_empty() {
            result.add_warning("approvals_per_branch is empty - no branch will be gated");
        }

        let mut logical_ids: HashMap<String, &str> = HashMap::new();
        for (branch, required) in &self.approvals_per_branch {
            if branch.trim().is_empty() {
                result.add_error("branch names cannot be empty");
                continue;
            }

            let logical = naming::logical_id_fragment(branch);
            if logical.is_empty() {
                result.add_error(format!(
                    "branch '{}' has no alphanumeric characters to build resource ids from",
                    branch
                ));
            } else if let Some(other) = logical_ids.insert(logical, branch) {
                result.add_error(format!(
                    "branches '{}' and '{}' map to the same resource ids",
                    other, branch
                ));
            }

            let role = naming::build_role_name(&self.stack_name, branch);
            if role.len() > MAX_ROLE_NAME_LEN {
                result.add_error(format!(
                    "build role name '{}' exceeds {} characters - shorten stack_name or branch",
                    role, MAX_ROLE_NAME_LEN
                ));
            }

            if *required == 0 {
                result.add_warning(format!(
                    "branch '{}' requires 0 approvals - its rule will never block a merge",
                    branch
                ));
            }
        }

        if let Some(repository) = &self.repository {
            if repository.name.trim().is_empty() {
                result.add_error("repository.name cannot be empty");
            }
        }

        if let Some(notifications) = &self.notifications {
            if !notifications.topic_arn.starts_with("arn:") {
                result.add_error(format!(
                    "notifications.topic_arn '{}' is not an ARN",
                    notifications.topic_arn
                ));
            }
        }

        if let Some(network) = &self.network {
            if network.subnet_ids.is_empty() {
                result.add_error("network.subnet_ids cannot be empty when network is set");
            }
        }

        if !self.build.test_command.contains(&self.build.test_output) {
            result.add_warning(format!(
                "build.test_command does not mention '{}' - the gate may never see passing output",
                self.build.test_output
            ));
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> StackConfig {
        StackConfig::new("123456789012", "eu-west-1").with_branch("main", 2)
    }

    #[test]
    fn defaults_match_reference_stack() {
        let config = StackConfig::default();
        assert_eq!(config.stack_name, "codechecker-dev");
        assert_eq!(config.partition, "aws");
        assert_eq!(config.approver_role, "aacb-developer");
        assert_eq!(config.build.image, "aws/codebuild/standard:7.0");
        assert_eq!(config.build.install_commands.len(), 3);
        assert_eq!(config.publisher.runtime, "python3.12");
        assert!(config.repository.is_none());
        assert!(config.notifications.is_none());
        assert!(config.network.is_none());
    }

    #[test]
    fn valid_config_passes() {
        let result = valid_config().validate();
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn missing_account_fails() {
        let config = StackConfig {
            account: None,
            ..valid_config()
        };
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains(ACCOUNT_ENV)));
    }

    #[test]
    fn empty_branch_map_warns() {
        let config = StackConfig::new("123456789012", "eu-west-1");
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("no branch")));
    }

    #[test]
    fn zero_approvals_warns() {
        let result = valid_config().with_branch("develop", 0).validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("develop")));
    }

    #[test]
    fn colliding_branches_fail() {
        let result = valid_config()
            .with_branch("release/1", 1)
            .with_branch("release-1", 1)
            .validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("same resource")));
    }

    #[test]
    fn colliding_branches_report_one_error() {
        let result = valid_config()
            .with_branch("release/1", 1)
            .with_branch("release_1", 1)
            .validate();
        assert_eq!(result.errors.len(), 1, "{:?}", result.errors);
        assert!(result.errors[0].contains("'release/1'"));
        assert!(result.errors[0].contains("'release_1'"));
    }

    #[test]
    fn long_role_name_fails() {
        let config = StackConfig {
            stack_name: "a-very-long-stack-name-for-the-codechecker-deployment".to_string(),
            ..valid_config()
        }
        .with_branch("feature/some-long-branch-name", 1);
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("64")));
    }

    #[test]
    fn network_without_subnets_fails() {
        let result = valid_config().with_network("vpc-1", vec![]).validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("subnet_ids")));
    }

    #[test]
    fn topic_must_be_an_arn() {
        let result = valid_config().with_topic("my-topic").validate();
        assert!(!result.is_valid());
    }

    #[test]
    fn deserializes_from_toml() {
        let toml = r#"
            stack_name = "codechecker-prod"
            account = "111111111111"
            region = "us-east-1"

            [approvals_per_branch]
            main = 2
            develop = 1

            [repository]
            name = "payments"

            [network]
            vpc_id = "vpc-123"
            subnet_ids = ["subnet-a", "subnet-b"]

            [build]
            image = "aws/codebuild/standard:6.0"
        "#;

        let config = StackConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.stack_name, "codechecker-prod");
        assert_eq!(config.approvals_per_branch.get("main"), Some(&2));
        assert_eq!(config.approvals_per_branch.get("develop"), Some(&1));
        assert_eq!(config.repository.unwrap().name, "payments");
        assert_eq!(config.network.unwrap().subnet_ids.len(), 2);
        assert_eq!(config.build.image, "aws/codebuild/standard:6.0");
        // Untouched build settings keep their defaults
        assert_eq!(config.build.test_output, "pytest-output.txt");
    }

    #[test]
    fn rejects_negative_approval_count() {
        let toml = r#"
            [approvals_per_branch]
            main = -1
        "#;
        assert!(StackConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn environment_defaults_fill_missing_values() {
        let mut vars = HashMap::new();
        vars.insert(ACCOUNT_ENV.to_string(), "222222222222".to_string());
        vars.insert(REGION_ENV.to_string(), "eu-central-1".to_string());

        let config = StackConfig::default().with_environment_defaults(&vars);
        let env = config.environment().unwrap();
        assert_eq!(env.account, "222222222222");
        assert_eq!(env.region, "eu-central-1");
        assert_eq!(env.partition, "aws");
    }

    #[test]
    fn environment_defaults_do_not_override_file() {
        let mut vars = HashMap::new();
        vars.insert(ACCOUNT_ENV.to_string(), "222222222222".to_string());

        let config = valid_config().with_environment_defaults(&vars);
        assert_eq!(config.account.as_deref(), Some("123456789012"));
    }

    #[test]
    fn environment_requires_region() {
        let config = StackConfig {
            region: None,
            ..valid_config()
        };
        assert!(config.environment().is_err());
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "account = \"123456789012\"\nregion = \"eu-west-1\"\n[approvals_per_branch]\nmain = 3"
        )
        .unwrap();

        let config = StackConfig::load(file.path()).unwrap();
        assert_eq!(config.approvals_per_branch.get("main"), Some(&3));
    }

    #[test]
    fn load_missing_file_fails() {
        let err = StackConfig::load(Path::new("/nonexistent/codechecker.toml")).unwrap_err();
        assert!(err.to_string().contains("cannot read config"));
    }

    #[test]
    fn validation_result_into_result_err_on_invalid() {
        let mut result = ValidationResult::default();
        result.add_error("fatal error");
        result.add_warning("warning");
        assert!(result.into_result().is_err());
    }
}
