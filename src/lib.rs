//! codechecker - automated pull request gatekeeping for CodeCommit repositories
//!
//! This library synthesizes the stack that runs a build-and-test check on every
//! pull request into a protected branch, and implements the handlers that stack
//! wires together: the post-build approval gate, the approval rule template
//! custom resource, and the build result publisher.

pub mod approval;
pub mod buildspec;
pub mod codecommit;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod publisher;
pub mod stack;

pub use error::{Error, Result};

pub use approval::{
    BranchApprovalPolicy, CallProperties, CustomResourceHandler, CustomResourceRequest,
    CustomResourceResponse, RequestType, ResponseStatus, SdkCall,
};
pub use buildspec::BuildSpec;
pub use codecommit::{ApprovalState, AwsCliCodeCommit, CodeCommit, InMemoryCodeCommit};
pub use config::{StackConfig, Validate, ValidationResult};
pub use events::{Dispatch, EventRouter, EventRule, TargetKind};
pub use gate::{GateReport, Gatekeeper, PullRequestContext, TestOutcome};
pub use publisher::{BuildStateChange, PublishOutcome, ResultPublisher};
pub use stack::{BranchResources, CodeCheckerStack};
