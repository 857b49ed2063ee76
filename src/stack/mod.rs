//! Stack synthesis.
//!
//! [`CodeCheckerStack::synthesize`] turns a [`StackConfig`] into the full
//! resource graph: shared resources (repository, topic, publisher and
//! custom-resource provider functions) plus, for every protected branch, a
//! build project with its role, an approval rule template, its repository
//! association and three event rules.
//!
//! Every resource gets an explicit name and a concrete ARN derived from the
//! account, region and partition, so event rules and policies reference
//! literal values and the synthesized rules can be evaluated in process.

pub mod arn;
pub mod naming;
pub mod template;

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::approval::{assumed_role_member, BranchApprovalPolicy, CallProperties};
use crate::buildspec::BuildSpec;
use crate::config::{Environment, FunctionConfig, StackConfig, Validate};
use crate::error::Result;
use crate::events::{self, EventRouter, EventRule};
use template::{get_att, Resource, Template};

/// Custom resource type of approval rule templates.
pub const TEMPLATE_RESOURCE_TYPE: &str = "Custom::ApprovalRuleTemplate";
/// Custom resource type of template associations.
pub const ASSOCIATION_RESOURCE_TYPE: &str = "Custom::ApprovalRuleTemplateAssociation";

const REPOSITORY_ID: &str = "Repository";
const TOPIC_ID: &str = "NotificationTopic";
const TOPIC_POLICY_ID: &str = "NotificationTopicPolicy";
const SECURITY_GROUP_ID: &str = "FunctionSecurityGroup";
const PUBLISHER_ROLE_ID: &str = "PublisherRole";
const PUBLISHER_ID: &str = "PullRequestPublishCodeBuildResult";
const PROVIDER_ROLE_ID: &str = "ApprovalTemplateProviderRole";
const PROVIDER_ID: &str = "ApprovalTemplateProvider";

const TEMPLATE_ACTIONS: [&str; 5] = [
    "codecommit:CreateApprovalRuleTemplate",
    "codecommit:UpdateApprovalRuleTemplateContent",
    "codecommit:DeleteApprovalRuleTemplate",
    "codecommit:AssociateApprovalRuleTemplateWithRepository",
    "codecommit:DisassociateApprovalRuleTemplateFromRepository",
];

const BUILD_PULL_REQUEST_ACTIONS: [&str; 4] = [
    "codecommit:CreatePullRequestApprovalRule",
    "codecommit:GetPullRequest",
    "codecommit:PostCommentForPullRequest",
    "codecommit:UpdatePullRequestApprovalState",
];

const PUBLISHER_ACTIONS: [&str; 2] = [
    "codecommit:PostCommentReply",
    "codecommit:PostCommentForPullRequest",
];

const REPORT_ACTIONS: [&str; 5] = [
    "codebuild:CreateReportGroup",
    "codebuild:CreateReport",
    "codebuild:UpdateReport",
    "codebuild:BatchPutTestCases",
    "codebuild:BatchPutCodeCoverages",
];

const LOG_ACTIONS: [&str; 3] = [
    "logs:CreateLogGroup",
    "logs:CreateLogStream",
    "logs:PutLogEvents",
];

const NETWORK_ACTIONS: [&str; 7] = [
    "ec2:CreateNetworkInterface",
    "ec2:DescribeDhcpOptions",
    "ec2:DescribeNetworkInterfaces",
    "ec2:DeleteNetworkInterface",
    "ec2:DescribeSubnets",
    "ec2:DescribeSecurityGroups",
    "ec2:DescribeVpcs",
];

/// Everything synthesized for one protected branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchResources {
    pub branch: String,
    pub policy: BranchApprovalPolicy,
    pub project_name: String,
    pub project_arn: String,
    pub build_role_name: String,
    pub project_logical_id: String,
    pub template_logical_id: String,
    pub association_logical_id: String,
}

/// The synthesized stack.
#[derive(Debug, Clone)]
pub struct CodeCheckerStack {
    stack_name: String,
    environment: Environment,
    repository_name: String,
    repository_arn: String,
    topic_arn: String,
    publisher_arn: String,
    branches: Vec<BranchResources>,
    rules: Vec<EventRule>,
    custom_resources: BTreeMap<String, CallProperties>,
    template: Template,
}

impl CodeCheckerStack {
    /// Validates `config` and builds the resource graph.
    pub fn synthesize(config: &StackConfig) -> Result<Self> {
        let warnings = config.validate().into_result()?;
        for warning in &warnings {
            tracing::warn!(stack = %config.stack_name, "{}", warning);
        }

        let mut synth = Synthesizer::new(config)?;
        synth.shared_resources()?;
        for (branch, required) in &config.approvals_per_branch {
            synth.branch(branch, *required)?;
        }
        let stack = synth.finish()?;

        tracing::info!(
            stack = %stack.stack_name,
            branches = stack.branches.len(),
            resources = stack.template.len(),
            "stack synthesized"
        );
        Ok(stack)
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn repository_name(&self) -> &str {
        &self.repository_name
    }

    pub fn repository_arn(&self) -> &str {
        &self.repository_arn
    }

    pub fn topic_arn(&self) -> &str {
        &self.topic_arn
    }

    pub fn publisher_arn(&self) -> &str {
        &self.publisher_arn
    }

    /// Per-branch resources, ordered by branch name.
    pub fn branches(&self) -> &[BranchResources] {
        &self.branches
    }

    /// Resources for one branch.
    pub fn branch(&self, name: &str) -> Option<&BranchResources> {
        self.branches.iter().find(|b| b.branch == name)
    }

    /// Every event rule in the stack.
    pub fn rules(&self) -> &[EventRule] {
        &self.rules
    }

    /// A router over the stack's event rules.
    pub fn router(&self) -> EventRouter {
        EventRouter::new(self.rules.clone())
    }

    /// Properties of every custom resource, by logical id.
    pub fn custom_resources(&self) -> &BTreeMap<String, CallProperties> {
        &self.custom_resources
    }

    /// The template document model.
    pub fn template(&self) -> &Template {
        &self.template
    }

    /// The rendered template document.
    pub fn to_json_string(&self) -> Result<String> {
        self.template.to_json_string()
    }
}

struct Synthesizer<'a> {
    config: &'a StackConfig,
    env: Environment,
    template: Template,
    repository_name: String,
    repository_arn: String,
    repository_id: Option<&'static str>,
    topic_arn: String,
    topic_policy_id: Option<&'static str>,
    security_group_id: Option<&'static str>,
    publisher_arn: String,
    provider_arn: String,
    buildspec: String,
    branches: Vec<BranchResources>,
    rules: Vec<EventRule>,
    custom_resources: BTreeMap<String, CallProperties>,
}

impl<'a> Synthesizer<'a> {
    fn new(config: &'a StackConfig) -> Result<Self> {
        let env = config.environment()?;
        let stack = &config.stack_name;

        let (repository_name, repository_id) = match &config.repository {
            Some(existing) => (existing.name.clone(), None),
            None => (naming::DEFAULT_REPOSITORY_NAME.to_string(), Some(REPOSITORY_ID)),
        };
        let (topic_arn, topic_policy_id) = match &config.notifications {
            Some(existing) => (existing.topic_arn.clone(), None),
            None => (arn::topic(&env, &naming::topic_name(stack)), Some(TOPIC_POLICY_ID)),
        };

        Ok(Self {
            config,
            repository_arn: arn::repository(&env, &repository_name),
            publisher_arn: arn::function(&env, &naming::publisher_function_name(stack)),
            provider_arn: arn::function(&env, &naming::provider_function_name(stack)),
            buildspec: BuildSpec::for_pull_requests(&config.build).to_yaml()?,
            template: Template::new(format!(
                "Pull request checks and approval rules for {}",
                repository_name
            )),
            security_group_id: config.network.as_ref().map(|_| SECURITY_GROUP_ID),
            repository_name,
            repository_id,
            topic_arn,
            topic_policy_id,
            env,
            branches: Vec::new(),
            rules: Vec::new(),
            custom_resources: BTreeMap::new(),
        })
    }

    fn shared_resources(&mut self) -> Result<()> {
        let stack = self.config.stack_name.clone();

        if let Some(id) = self.repository_id {
            self.template.add(
                id,
                Resource::new(
                    "AWS::CodeCommit::Repository",
                    json!({ "RepositoryName": self.repository_name }),
                ),
            )?;
        }

        if let Some(policy_id) = self.topic_policy_id {
            self.template.add(
                TOPIC_ID,
                Resource::new(
                    "AWS::SNS::Topic",
                    json!({ "TopicName": naming::topic_name(&stack) }),
                ),
            )?;
            self.template.add(
                policy_id,
                Resource::new(
                    "AWS::SNS::TopicPolicy",
                    json!({
                        "Topics": [self.topic_arn],
                        "PolicyDocument": policy_document(vec![json!({
                            "Effect": "Allow",
                            "Principal": { "Service": "events.amazonaws.com" },
                            "Action": "sns:Publish",
                            "Resource": self.topic_arn,
                        })]),
                    }),
                )
                .depends_on(TOPIC_ID),
            )?;
        }

        if let (Some(id), Some(network)) = (self.security_group_id, &self.config.network) {
            self.template.add(
                id,
                Resource::new(
                    "AWS::EC2::SecurityGroup",
                    json!({
                        "GroupDescription": format!("{} pull request checks", stack),
                        "VpcId": network.vpc_id,
                    }),
                ),
            )?;
        }

        let publisher_name = naming::publisher_function_name(&stack);
        let publisher_role = self
            .function_role(
                &publisher_name,
                vec![statement(&PUBLISHER_ACTIONS, vec![self.repository_arn.clone()])],
            )
            .depends_on_opt(self.repository_id);
        let publisher = self
            .function(&publisher_name, &self.config.publisher, PUBLISHER_ROLE_ID)
            .depends_on(PUBLISHER_ROLE_ID);
        self.template.add(PUBLISHER_ROLE_ID, publisher_role)?;
        self.template.add(PUBLISHER_ID, publisher)?;

        let provider_name = naming::provider_function_name(&stack);
        let provider_role = self.function_role(
            &provider_name,
            vec![statement(&TEMPLATE_ACTIONS, vec!["*".to_string()])],
        );
        let provider = self
            .function(&provider_name, &self.config.provider, PROVIDER_ROLE_ID)
            .depends_on(PROVIDER_ROLE_ID);
        self.template.add(PROVIDER_ROLE_ID, provider_role)?;
        self.template.add(PROVIDER_ID, provider)?;

        self.template.add_output(
            "RepositoryName",
            "Repository guarded by the pull request checks",
            json!(self.repository_name),
        );
        self.template.add_output(
            "RepositoryCloneUrlHttp",
            "HTTPS clone URL",
            json!(arn::clone_url_http(&self.env, &self.repository_name)),
        );
        self.template.add_output(
            "NotificationTopicArn",
            "Topic receiving failed build notifications",
            json!(self.topic_arn),
        );

        Ok(())
    }

    fn branch(&mut self, branch: &str, required_approvals: u32) -> Result<()> {
        let stack = self.config.stack_name.clone();
        let fragment = naming::logical_id_fragment(branch);
        let project_name = naming::build_project_name(&stack, branch);
        let project_arn = arn::project(&self.env, &project_name);
        let build_role_name = naming::build_role_name(&stack, branch);

        let project_id = format!("PullRequestCheckFor{}", fragment);
        let build_role_id = format!("{}Role", project_id);
        let events_role_id = format!("{}EventsRole", project_id);
        let template_id = format!("CreateApprovalTemplateFor{}", fragment);
        let association_id = format!("AssociateApprovalTemplateFor{}", fragment);
        let pull_request_rule_id = format!("OnPullRequest{}EventRule", fragment);
        let state_rule_id = format!("{}StateChange", project_id);
        let failure_rule_id = format!("{}BuildFailed", project_id);
        let permission_id = format!("{}PublisherPermission", project_id);

        // Build role and project.
        let mut statements = vec![
            statement(&LOG_ACTIONS, vec![arn::build_logs(&self.env, &project_name)]),
            statement(&["codecommit:GitPull"], vec![self.repository_arn.clone()]),
            statement(&REPORT_ACTIONS, vec![arn::report_groups(&self.env, &project_name)]),
            statement(&BUILD_PULL_REQUEST_ACTIONS, vec![self.repository_arn.clone()]),
        ];
        if self.config.network.is_some() {
            statements.push(statement(&NETWORK_ACTIONS, vec!["*".to_string()]));
            statements.push(statement(
                &["ec2:CreateNetworkInterfacePermission"],
                vec![format!(
                    "arn:{}:ec2:{}:{}:network-interface/*",
                    self.env.partition, self.env.region, self.env.account
                )],
            ));
        }
        self.template.add(
            build_role_id.clone(),
            Resource::new(
                "AWS::IAM::Role",
                json!({
                    "RoleName": build_role_name,
                    "AssumeRolePolicyDocument": assume_role("codebuild.amazonaws.com"),
                    "Policies": [{
                        "PolicyName": "pull-request-check",
                        "PolicyDocument": policy_document(statements),
                    }],
                }),
            )
            .depends_on_opt(self.repository_id),
        )?;

        let mut project = json!({
            "Name": project_name,
            "ServiceRole": get_att(&build_role_id, "Arn"),
            "Source": {
                "Type": "CODECOMMIT",
                "Location": arn::clone_url_http(&self.env, &self.repository_name),
                "BuildSpec": self.buildspec,
            },
            "Artifacts": { "Type": "NO_ARTIFACTS" },
            "Environment": {
                "Type": "LINUX_CONTAINER",
                "Image": self.config.build.image,
                "ComputeType": self.config.build.compute_type,
                "ImagePullCredentialsType": "CODEBUILD",
            },
        });
        if let Some(vpc) = self.vpc_config() {
            project["VpcConfig"] = vpc;
        }
        self.template.add(
            project_id.clone(),
            Resource::new("AWS::CodeBuild::Project", project)
                .depends_on(build_role_id.clone())
                .depends_on_opt(self.repository_id)
                .depends_on_opt(self.security_group_id),
        )?;

        // Approval rule template and association.
        let pool = vec![
            assumed_role_member(&self.env.partition, &self.env.account, &self.config.approver_role),
            assumed_role_member(&self.env.partition, &self.env.account, &build_role_name),
        ];
        let policy =
            BranchApprovalPolicy::new(branch, required_approvals, &self.repository_name, pool);

        let template_props = CallProperties::from_calls(
            Some(self.provider_arn.clone()),
            Some(&policy.create_call()?),
            Some(&policy.update_call()?),
            Some(&policy.delete_call()),
        )?;
        self.template.add(
            template_id.clone(),
            Resource::new(TEMPLATE_RESOURCE_TYPE, serde_json::to_value(&template_props)?)
                .depends_on(project_id.clone())
                .depends_on(PROVIDER_ID),
        )?;
        self.custom_resources
            .insert(template_id.clone(), template_props);

        let association_props = CallProperties::from_calls(
            Some(self.provider_arn.clone()),
            Some(&policy.associate_call()),
            None,
            Some(&policy.disassociate_call()),
        )?;
        self.template.add(
            association_id.clone(),
            Resource::new(
                ASSOCIATION_RESOURCE_TYPE,
                serde_json::to_value(&association_props)?,
            )
            .depends_on(template_id.clone()),
        )?;
        self.custom_resources
            .insert(association_id.clone(), association_props);

        // Event rules.
        let events_role_name = naming::events_role_name(&stack, branch);
        self.template.add(
            events_role_id.clone(),
            Resource::new(
                "AWS::IAM::Role",
                json!({
                    "RoleName": events_role_name,
                    "AssumeRolePolicyDocument": assume_role("events.amazonaws.com"),
                    "Policies": [{
                        "PolicyName": "start-pull-request-check",
                        "PolicyDocument": policy_document(vec![
                            statement(&["codebuild:StartBuild"], vec![project_arn.clone()]),
                        ]),
                    }],
                }),
            ),
        )?;

        let pull_request_rule = events::pull_request_rule(
            &naming::rule_name(&stack, branch, "pull-request"),
            &self.repository_arn,
            branch,
            &project_arn,
            &arn::role(&self.env, &events_role_name),
        )?;
        self.template.add(
            pull_request_rule_id,
            pull_request_rule
                .to_resource()
                .depends_on(project_id.clone())
                .depends_on(events_role_id)
                .depends_on_opt(self.repository_id),
        )?;

        let state_rule = events::build_state_rule(
            &naming::rule_name(&stack, branch, "build-state"),
            &project_name,
            &self.publisher_arn,
        )?;
        self.template.add(
            state_rule_id.clone(),
            state_rule
                .to_resource()
                .depends_on(project_id.clone())
                .depends_on(PUBLISHER_ID),
        )?;
        self.template.add(
            permission_id,
            Resource::new(
                "AWS::Lambda::Permission",
                json!({
                    "Action": "lambda:InvokeFunction",
                    "FunctionName": self.publisher_arn,
                    "Principal": "events.amazonaws.com",
                    "SourceArn": arn::rule(&self.env, &state_rule.name),
                }),
            )
            .depends_on(PUBLISHER_ID)
            .depends_on(state_rule_id),
        )?;

        let failure_rule = events::build_failure_rule(
            &naming::rule_name(&stack, branch, "build-failed"),
            &project_name,
            &self.topic_arn,
        )?;
        self.template.add(
            failure_rule_id,
            failure_rule
                .to_resource()
                .depends_on(project_id.clone())
                .depends_on_opt(self.topic_policy_id),
        )?;

        self.template.add_output(
            format!("ApprovalTemplateFor{}", fragment),
            &format!("Approval rule template guarding {}", branch),
            json!(policy.template_name()),
        );

        tracing::debug!(
            branch = %branch,
            required_approvals,
            template = %policy.template_name(),
            project = %project_name,
            "branch synthesized"
        );

        self.rules
            .extend([pull_request_rule, state_rule, failure_rule]);
        self.branches.push(BranchResources {
            branch: branch.to_string(),
            policy,
            project_name,
            project_arn,
            build_role_name,
            project_logical_id: project_id,
            template_logical_id: template_id,
            association_logical_id: association_id,
        });
        Ok(())
    }

    fn finish(self) -> Result<CodeCheckerStack> {
        // Surfaces dangling dependencies and cycles at synthesis time.
        self.template.creation_order()?;

        Ok(CodeCheckerStack {
            stack_name: self.config.stack_name.clone(),
            environment: self.env,
            repository_name: self.repository_name,
            repository_arn: self.repository_arn,
            topic_arn: self.topic_arn,
            publisher_arn: self.publisher_arn,
            branches: self.branches,
            rules: self.rules,
            custom_resources: self.custom_resources,
            template: self.template,
        })
    }

    fn vpc_config(&self) -> Option<Value> {
        let network = self.config.network.as_ref()?;
        let group = self.security_group_id?;
        Some(json!({
            "VpcId": network.vpc_id,
            "Subnets": network.subnet_ids,
            "SecurityGroupIds": [get_att(group, "GroupId")],
        }))
    }

    fn function_role(&self, role_name: &str, statements: Vec<Value>) -> Resource {
        let mut managed = vec![arn::managed_policy(&self.env, "AWSLambdaBasicExecutionRole")];
        if self.config.network.is_some() {
            managed.push(arn::managed_policy(
                &self.env,
                "AWSLambdaVPCAccessExecutionRole",
            ));
        }
        Resource::new(
            "AWS::IAM::Role",
            json!({
                "RoleName": role_name,
                "AssumeRolePolicyDocument": assume_role("lambda.amazonaws.com"),
                "ManagedPolicyArns": managed,
                "Policies": [{
                    "PolicyName": "codecommit",
                    "PolicyDocument": policy_document(statements),
                }],
            }),
        )
    }

    fn function(
        &self,
        name: &str,
        package: &FunctionConfig,
        role_id: &str,
    ) -> Resource {
        let mut properties = json!({
            "FunctionName": name,
            "Runtime": package.runtime,
            "Handler": package.handler,
            "Code": {
                "S3Bucket": package.code_bucket,
                "S3Key": package.code_key,
            },
            "Role": get_att(role_id, "Arn"),
        });
        if let Some(vpc) = self.vpc_config() {
            properties["VpcConfig"] = json!({
                "SubnetIds": vpc["Subnets"],
                "SecurityGroupIds": vpc["SecurityGroupIds"],
            });
        }
        Resource::new("AWS::Lambda::Function", properties).depends_on_opt(self.security_group_id)
    }
}

fn policy_document(statements: Vec<Value>) -> Value {
    json!({ "Version": "2012-10-17", "Statement": statements })
}

fn statement(actions: &[&str], resources: Vec<String>) -> Value {
    json!({ "Effect": "Allow", "Action": actions, "Resource": resources })
}

fn assume_role(service: &str) -> Value {
    policy_document(vec![json!({
        "Effect": "Allow",
        "Principal": { "Service": service },
        "Action": "sts:AssumeRole",
    })])
}
