//! Custom-resource handler for approval rule templates and their
//! repository associations.
//!
//! Neither resource has native declarative support, so each is declared as
//! a custom resource whose properties carry the service calls to make on
//! create, update and delete. The provisioning engine invokes the handler
//! with one request per lifecycle event.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codecommit::CodeCommit;
use crate::error::{Error, Result};

/// Service name accepted in [`SdkCall::service`].
pub const SERVICE: &str = "CodeCommit";

/// Prefix of the physical id reported when a create fails. A resource with
/// such an id owns nothing in the service.
pub const CREATE_FAILED_PREFIX: &str = "CREATE_FAILED:";

/// A single service call declared on a custom resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkCall {
    pub service: String,
    pub action: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Physical id the resource takes after this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
}

impl SdkCall {
    /// Creates a CodeCommit call with no parameters.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            service: SERVICE.to_string(),
            action: action.into(),
            parameters: BTreeMap::new(),
            physical_resource_id: None,
        }
    }

    /// Adds a parameter.
    pub fn param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }

    /// Declares the physical id.
    pub fn with_physical_id(mut self, id: impl Into<String>) -> Self {
        self.physical_resource_id = Some(id.into());
        self
    }

    /// Returns a required parameter.
    pub fn parameter(&self, name: &str) -> Result<&str> {
        self.parameters.get(name).map(String::as_str).ok_or_else(|| {
            Error::CustomResource(format!("{} is missing parameter '{}'", self.action, name))
        })
    }
}

/// Lifecycle event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

/// Custom resource properties: one serialized call per lifecycle event.
///
/// Calls are stored as JSON strings so that a changed call shows up as a
/// changed property and an unchanged one produces no diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
}

impl CallProperties {
    /// Serializes the given calls.
    pub fn from_calls(
        service_token: Option<String>,
        create: Option<&SdkCall>,
        update: Option<&SdkCall>,
        delete: Option<&SdkCall>,
    ) -> Result<Self> {
        let encode = |call: Option<&SdkCall>| -> Result<Option<String>> {
            call.map(serde_json::to_string)
                .transpose()
                .map_err(Error::from)
        };
        Ok(Self {
            service_token,
            create: encode(create)?,
            update: encode(update)?,
            delete: encode(delete)?,
        })
    }

    fn decode(raw: &Option<String>, event: &str) -> Result<Option<SdkCall>> {
        raw.as_deref()
            .map(|s| {
                serde_json::from_str(s).map_err(|e| {
                    Error::CustomResource(format!("invalid {} call: {}", event, e))
                })
            })
            .transpose()
    }

    /// Decoded create call.
    pub fn create_call(&self) -> Result<Option<SdkCall>> {
        Self::decode(&self.create, "Create")
    }

    /// Decoded update call.
    pub fn update_call(&self) -> Result<Option<SdkCall>> {
        Self::decode(&self.update, "Update")
    }

    /// Decoded delete call.
    pub fn delete_call(&self) -> Result<Option<SdkCall>> {
        Self::decode(&self.delete, "Delete")
    }
}

/// Request sent by the provisioning engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceRequest {
    pub request_type: RequestType,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub stack_id: String,
    #[serde(default)]
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    #[serde(default, rename = "ResponseURL", skip_serializing_if = "Option::is_none")]
    pub response_url: Option<String>,
    #[serde(default)]
    pub resource_properties: CallProperties,
}

impl CustomResourceRequest {
    /// Builds a request for the given resource.
    pub fn new(
        request_type: RequestType,
        logical_resource_id: impl Into<String>,
        properties: CallProperties,
    ) -> Self {
        let logical_resource_id = logical_resource_id.into();
        Self {
            request_type,
            request_id: format!("{:?}-{}", request_type, logical_resource_id).to_lowercase(),
            stack_id: String::new(),
            logical_resource_id,
            physical_resource_id: None,
            response_url: None,
            resource_properties: properties,
        }
    }

    /// Sets the physical id of an existing resource.
    pub fn with_physical_id(mut self, id: impl Into<String>) -> Self {
        self.physical_resource_id = Some(id.into());
        self
    }
}

/// Outcome reported back to the provisioning engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Success,
    Failed,
}

/// Response document for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
}

impl CustomResourceResponse {
    fn for_request(
        request: &CustomResourceRequest,
        status: ResponseStatus,
        physical_resource_id: String,
        reason: Option<String>,
    ) -> Self {
        Self {
            status,
            reason,
            physical_resource_id,
            stack_id: request.stack_id.clone(),
            request_id: request.request_id.clone(),
            logical_resource_id: request.logical_resource_id.clone(),
        }
    }

    /// Returns true if the request succeeded.
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// Applies custom resource requests against CodeCommit.
pub struct CustomResourceHandler<C: CodeCommit> {
    client: C,
}

impl<C: CodeCommit> CustomResourceHandler<C> {
    /// Creates a handler using the given client.
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Handles one request. Failures are reported in the response rather
    /// than returned, so the engine can fail the stack operation.
    pub async fn handle(&self, request: &CustomResourceRequest) -> CustomResourceResponse {
        match self.apply(request).await {
            Ok(physical_id) => {
                tracing::info!(
                    request_type = ?request.request_type,
                    logical_id = %request.logical_resource_id,
                    physical_id = %physical_id,
                    "custom resource request succeeded"
                );
                CustomResourceResponse::for_request(
                    request,
                    ResponseStatus::Success,
                    physical_id,
                    None,
                )
            }
            Err(e) => {
                tracing::error!(
                    request_type = ?request.request_type,
                    logical_id = %request.logical_resource_id,
                    error = %e,
                    "custom resource request failed"
                );
                CustomResourceResponse::for_request(
                    request,
                    ResponseStatus::Failed,
                    fallback_physical_id(request),
                    Some(e.to_string()),
                )
            }
        }
    }

    async fn apply(&self, request: &CustomResourceRequest) -> Result<String> {
        let props = &request.resource_properties;
        match request.request_type {
            RequestType::Create => {
                let call = props.create_call()?.ok_or_else(|| {
                    Error::CustomResource("resource declares no Create call".to_string())
                })?;
                self.execute(&call).await?;
                Ok(call
                    .physical_resource_id
                    .unwrap_or_else(|| request.request_id.clone()))
            }
            RequestType::Update => {
                let current = request.physical_resource_id.clone().ok_or_else(|| {
                    Error::CustomResource("update request has no physical id".to_string())
                })?;

                // A changed declared id means the resource is being replaced;
                // the engine deletes the old one once this succeeds.
                if let Some(create) = props.create_call()? {
                    if let Some(declared) = &create.physical_resource_id {
                        if *declared != current {
                            tracing::info!(
                                old = %current,
                                new = %declared,
                                "replacing custom resource"
                            );
                            self.execute(&create).await?;
                            return Ok(declared.clone());
                        }
                    }
                }

                if let Some(update) = props.update_call()? {
                    self.execute(&update).await?;
                }
                Ok(current)
            }
            RequestType::Delete => {
                if !owns_declared_resource(request)? {
                    tracing::warn!(
                        logical_id = %request.logical_resource_id,
                        physical_id = ?request.physical_resource_id,
                        "resource was never created here, skipping delete call"
                    );
                    return Ok(fallback_physical_id(request));
                }
                if let Some(delete) = props.delete_call()? {
                    self.execute(&delete).await?;
                }
                Ok(fallback_physical_id(request))
            }
        }
    }

    async fn execute(&self, call: &SdkCall) -> Result<()> {
        if call.service != SERVICE {
            return Err(Error::CustomResource(format!(
                "unsupported service '{}'",
                call.service
            )));
        }

        tracing::debug!(action = %call.action, "executing custom resource call");

        match call.action.as_str() {
            "createApprovalRuleTemplate" => {
                self.client
                    .create_approval_rule_template(
                        call.parameter("approvalRuleTemplateName")?,
                        call.parameter("approvalRuleTemplateDescription")?,
                        call.parameter("approvalRuleTemplateContent")?,
                    )
                    .await
            }
            "updateApprovalRuleTemplateContent" => {
                self.client
                    .update_approval_rule_template_content(
                        call.parameter("approvalRuleTemplateName")?,
                        call.parameter("newRuleContent")?,
                    )
                    .await
            }
            "deleteApprovalRuleTemplate" => {
                self.client
                    .delete_approval_rule_template(call.parameter("approvalRuleTemplateName")?)
                    .await
            }
            "associateApprovalRuleTemplateWithRepository" => {
                self.client
                    .associate_approval_rule_template_with_repository(
                        call.parameter("approvalRuleTemplateName")?,
                        call.parameter("repositoryName")?,
                    )
                    .await
            }
            "disassociateApprovalRuleTemplateFromRepository" => {
                self.client
                    .disassociate_approval_rule_template_from_repository(
                        call.parameter("approvalRuleTemplateName")?,
                        call.parameter("repositoryName")?,
                    )
                    .await
            }
            other => Err(Error::CustomResource(format!(
                "unsupported action '{}'",
                other
            ))),
        }
    }
}

/// Physical id to report when no call determined one. A failed create gets
/// a sentinel so the rollback delete cannot reach a same-named resource
/// owned by someone else.
fn fallback_physical_id(request: &CustomResourceRequest) -> String {
    match &request.physical_resource_id {
        Some(id) => id.clone(),
        None if request.request_type == RequestType::Create => {
            format!("{}{}", CREATE_FAILED_PREFIX, request.request_id)
        }
        None => request.logical_resource_id.clone(),
    }
}

/// Whether the physical id on a delete names the resource this request's
/// create call declares.
fn owns_declared_resource(request: &CustomResourceRequest) -> Result<bool> {
    let Some(physical) = request.physical_resource_id.as_deref() else {
        return Ok(true);
    };
    if physical.starts_with(CREATE_FAILED_PREFIX) {
        return Ok(false);
    }
    let declared = request
        .resource_properties
        .create_call()?
        .and_then(|call| call.physical_resource_id);
    Ok(declared.map_or(true, |declared| declared == physical))
}
