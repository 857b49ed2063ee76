//! codechecker CLI
//!
//! - `synth`: render the stack template
//! - `gate`: submit the approval state for the pull request under test
//! - `handle-resource`: run an approval rule template lifecycle request
//! - `publish-result`: comment a build result on its pull request
//! - `route`: show which targets an event reaches

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;

use codechecker::error::{Error, Result};
use codechecker::{
    AwsCliCodeCommit, CodeCheckerStack, CustomResourceHandler, CustomResourceRequest, Gatekeeper,
    PullRequestContext, ResultPublisher, StackConfig,
};

#[derive(Parser)]
#[command(name = "codechecker")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pull request checks and approval rules for CodeCommit", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the stack template
    Synth {
        /// Stack configuration (TOML); defaults to a single `main` branch
        /// requiring 2 approvals
        #[arg(short, long, env = "CODECHECKER_CONFIG")]
        config: Option<PathBuf>,

        /// Write the template here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Submit APPROVE or REVOKE for the pull request under test
    Gate {
        /// File holding the captured test output
        #[arg(short, long, default_value = "pytest-output.txt")]
        output: PathBuf,

        /// Region of the repository
        #[arg(long, env = "AWS_REGION")]
        region: Option<String>,
    },

    /// Handle an approval rule template custom resource request
    HandleResource {
        /// Request document, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        request: String,

        /// Region of the repository
        #[arg(long, env = "AWS_REGION")]
        region: Option<String>,
    },

    /// Comment a build state change on its pull request
    PublishResult {
        /// Event document, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        event: String,

        /// Region of the repository
        #[arg(long, env = "AWS_REGION")]
        region: Option<String>,
    },

    /// Evaluate an event against the synthesized rules
    Route {
        /// Stack configuration (TOML)
        #[arg(short, long, env = "CODECHECKER_CONFIG")]
        config: Option<PathBuf>,

        /// Event document, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        event: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Synth { config, out } => {
            let stack = CodeCheckerStack::synthesize(&load_config(config.as_deref())?)?;
            let document = stack.to_json_string()?;
            match out {
                Some(path) => {
                    std::fs::write(&path, document)?;
                    tracing::info!(path = %path.display(), "template written");
                }
                None => println!("{}", document),
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Gate { output, region } => {
            let context = PullRequestContext::from_env()?;
            let gate = Gatekeeper::new(client(region));
            let report = gate.evaluate_file(&context, &output).await?;
            println!("{}", report.decision);
            Ok(ExitCode::SUCCESS)
        }

        Commands::HandleResource { request, region } => {
            let request: CustomResourceRequest = serde_json::from_str(&read_input(&request)?)?;
            let handler = CustomResourceHandler::new(client(region));
            let response = handler.handle(&request).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(if response.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Commands::PublishResult { event, region } => {
            let event: Value = serde_json::from_str(&read_input(&event)?)?;
            let publisher = ResultPublisher::new(client(region));
            let outcome = publisher.publish(&event).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Route { config, event } => {
            let stack = CodeCheckerStack::synthesize(&load_config(config.as_deref())?)?;
            let event: Value = serde_json::from_str(&read_input(&event)?)?;
            let dispatches = stack.router().route(&event)?;
            println!("{}", serde_json::to_string_pretty(&dispatches)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn client(region: Option<String>) -> AwsCliCodeCommit {
    match region {
        Some(region) => AwsCliCodeCommit::new().with_region(region),
        None => AwsCliCodeCommit::new(),
    }
}

fn load_config(path: Option<&Path>) -> Result<StackConfig> {
    match path {
        Some(path) => StackConfig::load(path),
        None => {
            let vars: HashMap<String, String> = std::env::vars().collect();
            Ok(StackConfig::default()
                .with_branch("main", 2)
                .with_environment_defaults(&vars))
        }
    }
}

fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(source)
            .map_err(|e| Error::Config(format!("cannot read '{}': {}", source, e)))
    }
}
