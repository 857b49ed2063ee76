//! Deterministic resource names.
//!
//! Every name is derived from the stack name, the branch and (for approval
//! templates) the repository and required approval count, so synthesizing
//! the same configuration twice yields identical names.

/// Repository created when the caller does not supply one.
pub const DEFAULT_REPOSITORY_NAME: &str = "codechecker-demo";

/// Branch name reduced to the characters allowed in a logical id.
pub fn logical_id_fragment(branch: &str) -> String {
    branch.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Branch name with every character outside `[A-Za-z0-9_-]` replaced by `-`.
pub fn resource_name_fragment(branch: &str) -> String {
    branch
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Name of the per-branch build project.
pub fn build_project_name(stack_name: &str, branch: &str) -> String {
    format!("{}-pr-check-{}", stack_name, resource_name_fragment(branch))
}

/// Name of the per-branch build execution role.
pub fn build_role_name(stack_name: &str, branch: &str) -> String {
    format!("{}-{}-pr-check", stack_name, resource_name_fragment(branch))
}

/// Name of the role event rules assume to start a branch's build.
pub fn events_role_name(stack_name: &str, branch: &str) -> String {
    format!("{}-{}-start-build", stack_name, resource_name_fragment(branch))
}

/// Name of the result-publisher function.
pub fn publisher_function_name(stack_name: &str) -> String {
    format!("{}-publish-build-result", stack_name)
}

/// Name of the approval template custom-resource provider function.
pub fn provider_function_name(stack_name: &str) -> String {
    format!("{}-approval-template-provider", stack_name)
}

/// Name of the notification topic created when none is supplied.
pub fn topic_name(stack_name: &str) -> String {
    format!("{}-build-failures", stack_name)
}

/// Name of a per-branch event rule, e.g. `{stack}-main-build-failed`.
pub fn rule_name(stack_name: &str, branch: &str, purpose: &str) -> String {
    format!(
        "{}-{}-{}",
        stack_name,
        resource_name_fragment(branch),
        purpose
    )
}

/// Approval rule template name: `{count}-approval-for-{repository}-{branch}`.
pub fn approval_template_name(required_approvals: u32, repository: &str, branch: &str) -> String {
    format!(
        "{}-approval-for-{}-{}",
        required_approvals, repository, branch
    )
}

/// Physical id of the association between a template and the repository.
pub fn association_id(template_name: &str) -> String {
    format!("{}-association", template_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_fragment_drops_punctuation() {
        assert_eq!(logical_id_fragment("main"), "main");
        assert_eq!(logical_id_fragment("release/2.0"), "release20");
        assert_eq!(logical_id_fragment("---"), "");
    }

    #[test]
    fn resource_fragment_replaces_separators() {
        assert_eq!(resource_name_fragment("feature/login"), "feature-login");
        assert_eq!(resource_name_fragment("hot_fix-1"), "hot_fix-1");
    }

    #[test]
    fn approval_template_name_is_deterministic() {
        assert_eq!(
            approval_template_name(2, "codechecker-demo", "main"),
            "2-approval-for-codechecker-demo-main"
        );
        assert_eq!(
            association_id("2-approval-for-codechecker-demo-main"),
            "2-approval-for-codechecker-demo-main-association"
        );
    }

    #[test]
    fn per_branch_names_differ() {
        assert_ne!(
            build_project_name("cc", "main"),
            build_project_name("cc", "develop")
        );
        assert_eq!(build_role_name("cc", "feature/x"), "cc-feature-x-pr-check");
    }
}
