//! Concrete ARNs for the resources the stack names explicitly.

use crate::config::Environment;

pub fn repository(env: &Environment, name: &str) -> String {
    format!(
        "arn:{}:codecommit:{}:{}:{}",
        env.partition, env.region, env.account, name
    )
}

pub fn topic(env: &Environment, name: &str) -> String {
    format!("arn:{}:sns:{}:{}:{}", env.partition, env.region, env.account, name)
}

pub fn function(env: &Environment, name: &str) -> String {
    format!(
        "arn:{}:lambda:{}:{}:function:{}",
        env.partition, env.region, env.account, name
    )
}

pub fn project(env: &Environment, name: &str) -> String {
    format!(
        "arn:{}:codebuild:{}:{}:project/{}",
        env.partition, env.region, env.account, name
    )
}

/// Report groups a project creates are named `{project}-{group}`.
pub fn report_groups(env: &Environment, project_name: &str) -> String {
    format!(
        "arn:{}:codebuild:{}:{}:report-group/{}-*",
        env.partition, env.region, env.account, project_name
    )
}

pub fn role(env: &Environment, name: &str) -> String {
    format!("arn:{}:iam::{}:role/{}", env.partition, env.account, name)
}

pub fn rule(env: &Environment, name: &str) -> String {
    format!(
        "arn:{}:events:{}:{}:rule/{}",
        env.partition, env.region, env.account, name
    )
}

/// Log streams of a build project.
pub fn build_logs(env: &Environment, project_name: &str) -> String {
    format!(
        "arn:{}:logs:{}:{}:log-group:/aws/codebuild/{}:*",
        env.partition, env.region, env.account, project_name
    )
}

/// Managed policy published by the provider.
pub fn managed_policy(env: &Environment, name: &str) -> String {
    format!("arn:{}:iam::aws:policy/service-role/{}", env.partition, name)
}

/// HTTPS clone URL of a repository.
pub fn clone_url_http(env: &Environment, name: &str) -> String {
    format!(
        "https://git-codecommit.{}.amazonaws.com/v1/repos/{}",
        env.region, name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment {
            account: "123456789012".to_string(),
            region: "eu-west-1".to_string(),
            partition: "aws".to_string(),
        }
    }

    #[test]
    fn arns_embed_partition_region_and_account() {
        let env = env();
        assert_eq!(
            repository(&env, "codechecker-demo"),
            "arn:aws:codecommit:eu-west-1:123456789012:codechecker-demo"
        );
        assert_eq!(
            function(&env, "publisher"),
            "arn:aws:lambda:eu-west-1:123456789012:function:publisher"
        );
        assert_eq!(role(&env, "r"), "arn:aws:iam::123456789012:role/r");
        assert_eq!(
            project(&env, "p"),
            "arn:aws:codebuild:eu-west-1:123456789012:project/p"
        );
    }

    #[test]
    fn partition_is_respected() {
        let env = Environment {
            partition: "aws-cn".to_string(),
            region: "cn-north-1".to_string(),
            ..env()
        };
        assert!(topic(&env, "t").starts_with("arn:aws-cn:sns:cn-north-1:"));
        assert_eq!(
            managed_policy(&env, "AWSLambdaBasicExecutionRole"),
            "arn:aws-cn:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole"
        );
    }
}
