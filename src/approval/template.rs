//! Approval rule templates and the per-branch policy they enforce.

use serde::{Deserialize, Serialize};

use super::lifecycle::SdkCall;
use crate::error::Result;
use crate::stack::naming;

/// Content schema version accepted by the service.
pub const TEMPLATE_VERSION: &str = "2018-11-08";

/// A statement inside an approval rule template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApprovalStatement {
    #[serde(rename = "Type")]
    pub statement_type: String,
    pub number_of_approvals_needed: u32,
    pub approval_pool_members: Vec<String>,
}

/// JSON document stored as the template's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApprovalRuleTemplateContent {
    pub version: String,
    pub destination_references: Vec<String>,
    pub statements: Vec<ApprovalStatement>,
}

impl ApprovalRuleTemplateContent {
    /// Content requiring `required_approvals` from `pool` on pull requests into `branch`.
    pub fn for_branch(branch: &str, required_approvals: u32, pool: Vec<String>) -> Self {
        Self {
            version: TEMPLATE_VERSION.to_string(),
            destination_references: vec![format!("refs/heads/{}", branch)],
            statements: vec![ApprovalStatement {
                statement_type: "Approvers".to_string(),
                number_of_approvals_needed: required_approvals,
                approval_pool_members: pool,
            }],
        }
    }

    /// Serialized form sent to the service.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Pool member matching every session of an assumed role.
pub fn assumed_role_member(partition: &str, account: &str, role_name: &str) -> String {
    format!(
        "arn:{}:sts::{}:assumed-role/{}/*",
        partition, account, role_name
    )
}

/// Approval policy for one protected branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchApprovalPolicy {
    pub branch: String,
    pub required_approvals: u32,
    pub repository: String,
    pub content: ApprovalRuleTemplateContent,
}

impl BranchApprovalPolicy {
    /// Policy for `branch` whose pool is the administrative role plus the
    /// branch's build role.
    pub fn new(
        branch: &str,
        required_approvals: u32,
        repository: &str,
        pool: Vec<String>,
    ) -> Self {
        Self {
            branch: branch.to_string(),
            required_approvals,
            repository: repository.to_string(),
            content: ApprovalRuleTemplateContent::for_branch(branch, required_approvals, pool),
        }
    }

    /// Deterministic template name.
    pub fn template_name(&self) -> String {
        naming::approval_template_name(self.required_approvals, &self.repository, &self.branch)
    }

    /// Physical id of the repository association.
    pub fn association_id(&self) -> String {
        naming::association_id(&self.template_name())
    }

    /// Human-readable template description.
    pub fn description(&self) -> String {
        format!(
            "Requires {} approvals from the team to approve the pull request",
            self.required_approvals
        )
    }

    /// Call creating the template.
    pub fn create_call(&self) -> Result<SdkCall> {
        Ok(SdkCall::new("createApprovalRuleTemplate")
            .param("approvalRuleTemplateName", self.template_name())
            .param("approvalRuleTemplateDescription", self.description())
            .param("approvalRuleTemplateContent", self.content.to_json_string()?)
            .with_physical_id(self.template_name()))
    }

    /// Call replacing the template's content.
    pub fn update_call(&self) -> Result<SdkCall> {
        Ok(SdkCall::new("updateApprovalRuleTemplateContent")
            .param("approvalRuleTemplateName", self.template_name())
            .param("newRuleContent", self.content.to_json_string()?))
    }

    /// Call deleting the template.
    pub fn delete_call(&self) -> SdkCall {
        SdkCall::new("deleteApprovalRuleTemplate")
            .param("approvalRuleTemplateName", self.template_name())
    }

    /// Call associating the template with the repository.
    pub fn associate_call(&self) -> SdkCall {
        SdkCall::new("associateApprovalRuleTemplateWithRepository")
            .param("approvalRuleTemplateName", self.template_name())
            .param("repositoryName", self.repository.clone())
            .with_physical_id(self.association_id())
    }

    /// Call removing the association.
    pub fn disassociate_call(&self) -> SdkCall {
        SdkCall::new("disassociateApprovalRuleTemplateFromRepository")
            .param("approvalRuleTemplateName", self.template_name())
            .param("repositoryName", self.repository.clone())
    }
}
