//! Approval rule templates: content, naming and the custom-resource
//! lifecycle that creates, updates and deletes them.

pub mod lifecycle;
pub mod template;

pub use lifecycle::{
    CallProperties, CustomResourceHandler, CustomResourceRequest, CustomResourceResponse,
    RequestType, ResponseStatus, SdkCall,
};
pub use template::{
    assumed_role_member, ApprovalRuleTemplateContent, ApprovalStatement, BranchApprovalPolicy,
};
