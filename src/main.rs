//! CLI entry point for `toolbelt`.

use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use serde_json::Value;

use toolbelt::config::Config;
use toolbelt::logging;
use toolbelt::process::{CommandSpec, Deadline, ForegroundRunner, parse_env};
use toolbelt::serve::serve;
use toolbelt::tools::{ToolContext, ToolRegistry, ToolRegistryBuilder};

#[derive(Parser, Debug)]
#[command(
    name = "toolbelt",
    author,
    version,
    about = "Run and supervise processes and MCP servers as agent tools"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Workspace directory tools run in
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List configured tools
    Tools,
    /// Call one tool with JSON arguments (read from stdin when omitted)
    Call {
        tool: String,
        arguments: Option<String>,
    },
    /// Run a command in the foreground in the workspace
    Exec(ExecArgs),
    /// Answer JSON tool requests on stdin, one per line
    Serve,
}

#[derive(Args, Debug)]
struct ExecArgs {
    /// Deadline in seconds (0 = 30s default, -1 = none)
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    timeout: i64,
    /// Extra environment variable
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,
    /// Command and arguments to run
    #[arg(required = true, trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    logging::set_verbose(cli.verbose);

    let config = Config::load(cli.config.clone())?;
    let workspace = config.resolve_workspace(cli.workspace.clone())?;

    match cli.command {
        Commands::Exec(args) => run_exec(args, &workspace).await,
        Commands::Tools => {
            let registry = build_registry(&config, &workspace)?;
            list_tools(&registry)
        }
        Commands::Call { tool, arguments } => {
            let registry = build_registry(&config, &workspace)?;
            let outcome = call_tool(&registry, &tool, arguments).await;
            registry.shutdown().await;
            outcome
        }
        Commands::Serve => {
            let registry = build_registry(&config, &workspace)?;
            logging::info(format!(
                "Serving {} tool(s) from {}",
                registry.len(),
                workspace.display()
            ));
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            serve(&registry, stdin, tokio::io::stdout()).await
        }
    }
}

fn build_registry(config: &Config, workspace: &Path) -> Result<ToolRegistry> {
    ToolRegistryBuilder::new()
        .with_process_tools(&config.tools, workspace)?
        .with_mcp_tools(&config.mcp, workspace)?
        .build(ToolContext::new(workspace))
}

fn list_tools(registry: &ToolRegistry) -> Result<()> {
    if registry.is_empty() {
        println!("No tools configured.");
        return Ok(());
    }
    for tool in registry.all() {
        println!("{:<20} {}", tool.name(), tool.description());
    }
    Ok(())
}

async fn call_tool(registry: &ToolRegistry, tool: &str, arguments: Option<String>) -> Result<()> {
    let raw = match arguments {
        Some(raw) => raw,
        None if std::io::stdin().is_terminal() => String::new(),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read arguments from stdin")?;
            buf
        }
    };
    let input: Value = if raw.trim().is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(&raw).context("Tool arguments must be a JSON object")?
    };

    let result = registry
        .execute(tool, input)
        .await
        .with_context(|| format!("Tool '{tool}' failed"))?;
    println!("{}", result.content);
    if !result.success {
        bail!("Tool '{tool}' reported failure");
    }
    Ok(())
}

async fn run_exec(args: ExecArgs, workspace: &Path) -> Result<()> {
    let env = parse_env(&args.env)?;
    let Some((program, rest)) = args.command.split_first() else {
        bail!("No command given");
    };
    let spec = CommandSpec::new(program, workspace)
        .args(rest.iter().cloned())
        .envs(env);

    let result = ForegroundRunner::new()
        .run(&spec, Deadline::from_seconds(args.timeout))
        .await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.is_success() {
        logging::warn(format!("`{}` finished with status {}", spec.display(), result.status));
        std::process::exit(result.exit_code.filter(|code| *code != 0).unwrap_or(1));
    }
    Ok(())
}
