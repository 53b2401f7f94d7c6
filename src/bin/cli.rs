//! CodeCell CLI
//!
//! Command-line front end over the execution engine. Results are printed
//! to stdout as JSON; logs go to stderr.

use clap::{Args, Parser, Subcommand};
use codecell::config::{validate_config, Config};
use codecell::database::{init_pool, migrations};
use codecell::sandbox::select_backend;
use codecell::{
    Error, ExecuteCodeRequest, ExecutionEngine, FileRequest, WriteFileRequest, VERSION,
};
use console::style;
use serde::Serialize;
use std::io::Read;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "codecell",
    version = VERSION,
    about = "CodeCell - Multi-tenant code execution engine",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Workspace selection shared by every file and execution command
#[derive(Args, Clone)]
struct Scope {
    /// Organization (tenant) id
    #[arg(long = "org", env = "CODECELL_ORG_ID")]
    organization_id: Option<String>,
    /// Agent id
    #[arg(long = "agent", env = "CODECELL_AGENT_ID")]
    agent_id: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute code in the caller's workspace
    Run {
        /// Language: shell, python or typescript
        language: String,
        /// Code to execute ("-" reads stdin)
        code: String,
        /// Timeout in seconds (clamped server-side)
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Allow outbound network access
        #[arg(long)]
        network: bool,
        /// Provider credentials to inject (repeatable)
        #[arg(long = "inject")]
        inject: Vec<String>,
        #[command(flatten)]
        scope: Scope,
    },

    /// Write a file into the workspace
    Write {
        /// Relative path
        path: String,
        /// Content (stdin when omitted)
        content: Option<String>,
        #[command(flatten)]
        scope: Scope,
    },

    /// Read a file from the workspace
    Read {
        path: String,
        #[command(flatten)]
        scope: Scope,
    },

    /// List a workspace directory
    Ls {
        /// Relative directory (workspace root when omitted)
        path: Option<String>,
        #[command(flatten)]
        scope: Scope,
    },

    /// Delete a file from the workspace
    Rm {
        path: String,
        #[command(flatten)]
        scope: Scope,
    },

    /// Show storage usage for a workspace
    Usage {
        #[command(flatten)]
        scope: Scope,
    },

    /// Validate configuration and check the execution backend
    Doctor,

    /// Run database migrations
    Migrate,
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env().add_directive(
        "codecell=info"
            .parse()
            .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into()),
    );

    let json = std::env::var("CODECELL_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();

    match dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            let message = match e.downcast_ref::<Error>() {
                Some(err) => err.public_message(),
                None => e.to_string(),
            };
            eprintln!("{} {}", style("error:").red().bold(), message);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Run {
            language,
            code,
            timeout,
            network,
            inject,
            scope,
        } => {
            let code = if code == "-" { read_stdin()? } else { code };
            let engine = engine().await?;
            let result = engine
                .execute_code(ExecuteCodeRequest {
                    language,
                    code,
                    timeout_seconds: timeout,
                    agent_id: scope.agent_id,
                    organization_id: scope.organization_id,
                    network_access: network,
                    inject_credentials: inject,
                })
                .await?;
            print_json(&result)?;
            Ok(if result.success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Write {
            path,
            content,
            scope,
        } => {
            let content = match content {
                Some(c) => c,
                None => read_stdin()?,
            };
            let engine = engine().await?;
            let written = engine
                .write_file(WriteFileRequest {
                    path,
                    content,
                    agent_id: scope.agent_id,
                    organization_id: scope.organization_id,
                })
                .await?;
            print_json(&written)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Read { path, scope } => {
            let engine = engine().await?;
            print_json(&engine.read_file(file_request(path, scope)).await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Ls { path, scope } => {
            let engine = engine().await?;
            let listing = engine
                .list_files(file_request(path.unwrap_or_default(), scope))
                .await?;
            print_json(&listing)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Rm { path, scope } => {
            let engine = engine().await?;
            print_json(&engine.delete_file(file_request(path, scope)).await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Usage { scope } => {
            let engine = engine().await?;
            let usage = engine
                .storage_usage(scope.organization_id.as_deref(), scope.agent_id.as_deref())
                .await?;
            print_json(&usage)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Doctor => doctor().await,
        Commands::Migrate => {
            run_migrations().await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn engine() -> anyhow::Result<ExecutionEngine> {
    let config = Config::from_env()?;
    Ok(ExecutionEngine::from_config(&config).await?)
}

fn file_request(path: String, scope: Scope) -> FileRequest {
    FileRequest {
        path,
        agent_id: scope.agent_id,
        organization_id: scope.organization_id,
    }
}

fn read_stdin() -> anyhow::Result<String> {
    let mut buffer = String::new();
    std::io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Check configuration, storage and backend availability
async fn doctor() -> anyhow::Result<ExitCode> {
    println!("{}\n", style("CodeCell doctor").bold());

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            println!("{} Configuration: {}", style("✗").red(), e);
            return Ok(ExitCode::FAILURE);
        }
    };

    let validation = validate_config(&config);
    for issue in &validation.errors {
        println!("{} {}: {}", style("✗").red(), issue.path, issue.message);
        if let Some(suggestion) = &issue.suggestion {
            println!("    {}", style(suggestion).dim());
        }
    }
    for issue in &validation.warnings {
        println!("{} {}: {}", style("!").yellow(), issue.path, issue.message);
        if let Some(suggestion) = &issue.suggestion {
            println!("    {}", style(suggestion).dim());
        }
    }
    if validation.valid {
        println!("{} Configuration valid", style("✓").green());
    }

    println!("  Workspace root: {}", config.workspace.root.display());
    println!("  Posture: {}", config.sandbox.posture);

    let mut healthy = validation.valid;

    match &config.storage.postgres {
        Some(pg) => match init_pool(pg).await {
            Ok(_) => println!("{} PostgreSQL connected", style("✓").green()),
            Err(e) => {
                healthy = false;
                println!("{} PostgreSQL: {}", style("✗").red(), e);
            }
        },
        None => println!("{} PostgreSQL not configured (in-memory usage)", style("!").yellow()),
    }

    match select_backend(&config.sandbox).await {
        Ok(backend) => println!(
            "{} Execution backend: {} ({})",
            style("✓").green(),
            backend.name(),
            backend.mode()
        ),
        Err(e) => {
            healthy = false;
            println!("{} Execution backend: {}", style("✗").red(), e);
        }
    }

    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Run database migrations
async fn run_migrations() -> anyhow::Result<()> {
    eprintln!("Running database migrations...");

    let config = Config::from_env()?;
    let postgres = config
        .storage
        .postgres
        .as_ref()
        .ok_or_else(|| Error::Config("PostgreSQL not configured for migrations".into()))?;
    let pool = init_pool(postgres).await?;
    migrations::run(&pool).await?;

    eprintln!("{} Migrations complete", style("✓").green());
    Ok(())
}
