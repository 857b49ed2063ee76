//! Integration tests for stack synthesis and the approval template lifecycle.
//!
//! Deployments are simulated by driving the custom resource handler against
//! the in-memory CodeCommit fake in the template's creation and teardown
//! orders.

use std::collections::BTreeMap;
use std::sync::Arc;

use tempfile::TempDir;

use codechecker::stack::{ASSOCIATION_RESOURCE_TYPE, TEMPLATE_RESOURCE_TYPE};
use codechecker::{
    CodeCheckerStack, CustomResourceHandler, CustomResourceRequest, InMemoryCodeCommit,
    RequestType, StackConfig,
};

fn config(branches: &[(&str, u32)]) -> StackConfig {
    let mut config = StackConfig::new("123456789012", "eu-west-1");
    config.stack_name = "codechecker-test".to_string();
    for (branch, required) in branches {
        config = config.with_branch(*branch, *required);
    }
    config
}

/// Creates every custom resource in creation order; returns physical ids.
async fn deploy(
    stack: &CodeCheckerStack,
    handler: &CustomResourceHandler<Arc<InMemoryCodeCommit>>,
) -> BTreeMap<String, String> {
    let mut physical_ids = BTreeMap::new();
    for logical_id in stack.template().creation_order().unwrap() {
        if let Some(props) = stack.custom_resources().get(&logical_id) {
            let request = CustomResourceRequest::new(RequestType::Create, &logical_id, props.clone());
            let response = handler.handle(&request).await;
            assert!(response.is_success(), "{:?}", response.reason);
            physical_ids.insert(logical_id, response.physical_resource_id);
        }
    }
    physical_ids
}

/// Deletes every custom resource in teardown order.
async fn teardown(
    stack: &CodeCheckerStack,
    handler: &CustomResourceHandler<Arc<InMemoryCodeCommit>>,
    physical_ids: &BTreeMap<String, String>,
) {
    for logical_id in stack.template().teardown_order().unwrap() {
        if let Some(props) = stack.custom_resources().get(&logical_id) {
            let request = CustomResourceRequest::new(RequestType::Delete, &logical_id, props.clone())
                .with_physical_id(&physical_ids[&logical_id]);
            let response = handler.handle(&request).await;
            assert!(response.is_success(), "{:?}", response.reason);
        }
    }
}

#[test]
fn one_template_and_association_per_branch() {
    let stack =
        CodeCheckerStack::synthesize(&config(&[("main", 2), ("develop", 1), ("release/1.x", 3)]))
            .unwrap();
    let template = stack.template();

    assert_eq!(template.logical_ids_of_type(TEMPLATE_RESOURCE_TYPE).len(), 3);
    assert_eq!(template.logical_ids_of_type(ASSOCIATION_RESOURCE_TYPE).len(), 3);
    assert_eq!(template.logical_ids_of_type("AWS::CodeBuild::Project").len(), 3);
    assert_eq!(template.logical_ids_of_type("AWS::Events::Rule").len(), 9);

    let release = stack.branch("release/1.x").unwrap();
    assert_eq!(
        release.policy.template_name(),
        "3-approval-for-codechecker-demo-release/1.x"
    );
    assert_eq!(release.project_name, "codechecker-test-pr-check-release-1-x");
}

#[test]
fn resynthesis_is_identical() {
    let config = config(&[("main", 2), ("develop", 1)]);
    let first = CodeCheckerStack::synthesize(&config).unwrap();
    let second = CodeCheckerStack::synthesize(&config).unwrap();

    assert_eq!(
        first.to_json_string().unwrap(),
        second.to_json_string().unwrap()
    );
}

#[test]
fn branch_insertion_order_does_not_matter() {
    let a = CodeCheckerStack::synthesize(&config(&[("main", 2), ("develop", 1)])).unwrap();
    let b = CodeCheckerStack::synthesize(&config(&[("develop", 1), ("main", 2)])).unwrap();
    assert_eq!(a.to_json_string().unwrap(), b.to_json_string().unwrap());
}

#[test]
fn synth_from_toml_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("codechecker.toml");
    std::fs::write(
        &path,
        r#"
stack_name = "from-file"
account = "123456789012"
region = "us-east-1"

[approvals_per_branch]
main = 2

[repository]
name = "service-repo"
"#,
    )
    .unwrap();

    let stack = CodeCheckerStack::synthesize(&StackConfig::load(&path).unwrap()).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&stack.to_json_string().unwrap()).unwrap();

    assert_eq!(doc["AWSTemplateFormatVersion"], "2010-09-09");
    assert!(doc["Resources"].get("Repository").is_none());
    assert_eq!(
        doc["Outputs"]["ApprovalTemplateFormain"]["Value"],
        "2-approval-for-service-repo-main"
    );
    assert_eq!(
        stack.repository_arn(),
        "arn:aws:codecommit:us-east-1:123456789012:service-repo"
    );
}

#[test]
fn association_is_created_after_its_template() {
    let stack = CodeCheckerStack::synthesize(&config(&[("main", 2), ("develop", 1)])).unwrap();
    let order = stack.template().creation_order().unwrap();
    let position = |id: &str| order.iter().position(|o| o == id).unwrap();

    for branch in stack.branches() {
        assert!(position(&branch.project_logical_id) < position(&branch.template_logical_id));
        assert!(position(&branch.template_logical_id) < position(&branch.association_logical_id));
    }
}

#[tokio::test]
async fn deploy_creates_and_associates_every_template() {
    let stack = CodeCheckerStack::synthesize(&config(&[("main", 2), ("develop", 1)])).unwrap();
    let service = Arc::new(InMemoryCodeCommit::new());
    let handler = CustomResourceHandler::new(Arc::clone(&service));

    let physical_ids = deploy(&stack, &handler).await;

    assert_eq!(physical_ids.len(), 4);
    assert_eq!(
        service.template_names(),
        vec![
            "1-approval-for-codechecker-demo-develop",
            "2-approval-for-codechecker-demo-main"
        ]
    );
    for branch in stack.branches() {
        let name = branch.policy.template_name();
        assert!(service.is_associated(&name, "codechecker-demo"));
        assert_eq!(physical_ids[&branch.template_logical_id], name);
        assert_eq!(
            physical_ids[&branch.association_logical_id],
            branch.policy.association_id()
        );
    }
}

async fn assert_teardown_disassociates_first(branches: &[(&str, u32)]) {
    let stack = CodeCheckerStack::synthesize(&config(branches)).unwrap();
    let order = stack.template().teardown_order().unwrap();
    let position = |id: &str| order.iter().position(|o| o == id).unwrap();
    for branch in stack.branches() {
        assert!(position(&branch.association_logical_id) < position(&branch.template_logical_id));
    }

    // The fake rejects deleting a template that is still associated, so a
    // clean teardown proves the order against the service too.
    let service = Arc::new(InMemoryCodeCommit::new());
    let handler = CustomResourceHandler::new(Arc::clone(&service));
    let physical_ids = deploy(&stack, &handler).await;
    teardown(&stack, &handler, &physical_ids).await;

    assert!(service.template_names().is_empty());
    let calls = service.calls();
    let count = |op: &str| calls.iter().filter(|c| *c == op).count();
    assert_eq!(count("disassociate-approval-rule-template-from-repository"), branches.len());
    assert_eq!(count("delete-approval-rule-template"), branches.len());
}

#[tokio::test]
async fn teardown_with_no_branches() {
    assert_teardown_disassociates_first(&[]).await;
}

#[tokio::test]
async fn teardown_with_one_branch() {
    assert_teardown_disassociates_first(&[("main", 2)]).await;
}

#[tokio::test]
async fn teardown_with_many_branches() {
    assert_teardown_disassociates_first(&[("main", 2), ("develop", 1), ("release", 3), ("qa", 0)])
        .await;
}

#[tokio::test]
async fn redeploy_with_identical_config_keeps_physical_ids() {
    let config = config(&[("main", 2)]);
    let stack = CodeCheckerStack::synthesize(&config).unwrap();
    let service = Arc::new(InMemoryCodeCommit::new());
    let handler = CustomResourceHandler::new(Arc::clone(&service));
    let physical_ids = deploy(&stack, &handler).await;

    let again = CodeCheckerStack::synthesize(&config).unwrap();
    for (logical_id, props) in again.custom_resources() {
        let request = CustomResourceRequest::new(RequestType::Update, logical_id, props.clone())
            .with_physical_id(&physical_ids[logical_id]);
        let response = handler.handle(&request).await;
        assert!(response.is_success(), "{:?}", response.reason);
        assert_eq!(response.physical_resource_id, physical_ids[logical_id]);
    }
    assert_eq!(service.template_names().len(), 1);
}

#[tokio::test]
async fn changed_approval_count_replaces_template() {
    let service = Arc::new(InMemoryCodeCommit::new());
    let handler = CustomResourceHandler::new(Arc::clone(&service));
    let before = CodeCheckerStack::synthesize(&config(&[("main", 2)])).unwrap();
    let physical_ids = deploy(&before, &handler).await;

    let after = CodeCheckerStack::synthesize(&config(&[("main", 3)])).unwrap();
    let branch = after.branch("main").unwrap();

    // Update in creation order: template, then association.
    for logical_id in [&branch.template_logical_id, &branch.association_logical_id] {
        let props = after.custom_resources()[logical_id.as_str()].clone();
        let request = CustomResourceRequest::new(RequestType::Update, logical_id.as_str(), props)
            .with_physical_id(&physical_ids[logical_id.as_str()]);
        let response = handler.handle(&request).await;
        assert!(response.is_success(), "{:?}", response.reason);
    }
    assert!(service.is_associated("3-approval-for-codechecker-demo-main", "codechecker-demo"));

    // The engine then deletes the replaced resources with their old properties.
    let old = before.branch("main").unwrap();
    for logical_id in [&old.association_logical_id, &old.template_logical_id] {
        let props = before.custom_resources()[logical_id.as_str()].clone();
        let request = CustomResourceRequest::new(RequestType::Delete, logical_id.as_str(), props)
            .with_physical_id(&physical_ids[logical_id.as_str()]);
        assert!(handler.handle(&request).await.is_success());
    }

    assert_eq!(
        service.template_names(),
        vec!["3-approval-for-codechecker-demo-main"]
    );
}
