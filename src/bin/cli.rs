//! execbox CLI
//!
//! Run code in a sandbox, screen code offline, reap leftover sandboxes and
//! manage the configuration file.

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use execbox::config::{config_path, save_config, validate_config, Config};
use execbox::sandbox::create_manager;
use execbox::telemetry::init_tracing;
use execbox::tools::ToolDispatcher;
use execbox::{
    CodeValidator, ExecutionOrchestrator, ExecutionRequest, Language, ValidationResult, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "execbox",
    version = VERSION,
    about = "execbox - Sandboxed code execution",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where the code comes from
#[derive(clap::Args)]
struct CodeSource {
    /// Inline code
    #[arg(conflicts_with = "file")]
    code: Option<String>,

    /// Read code from a file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Language (javascript, typescript)
    #[arg(short, long, default_value = "typescript")]
    language: String,
}

impl CodeSource {
    fn load(&self) -> anyhow::Result<(String, Language)> {
        let language: Language = self.language.parse()?;
        let code = match (&self.code, &self.file) {
            (Some(code), _) => code.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
            (None, None) => anyhow::bail!("Provide code inline or with --file"),
        };
        Ok((code, language))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Execute code in a fresh sandbox
    Run {
        #[command(flatten)]
        source: CodeSource,

        /// User the execution is attributed to
        #[arg(short, long, default_value = "cli")]
        user: String,

        /// Token handed to in-sandbox tool calls
        #[arg(long, env = "EXECBOX_TOKEN", default_value = "", hide_env_values = true)]
        token: String,

        /// Sandbox lifetime in milliseconds
        #[arg(long, default_value_t = execbox::core::DEFAULT_TIMEOUT_MS)]
        timeout_ms: u64,

        /// Memory limit in MiB
        #[arg(long, default_value_t = execbox::core::DEFAULT_MAX_MEMORY_MB)]
        memory_mb: u64,

        /// Share of one CPU
        #[arg(long, default_value_t = execbox::core::DEFAULT_MAX_CPU_FRACTION)]
        cpu: f64,
    },
    /// Screen code without running it
    Validate {
        #[command(flatten)]
        source: CodeSource,
    },
    /// Remove sandboxes left behind by a previous process
    Reap,
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Check the effective configuration
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Run {
            source,
            user,
            token,
            timeout_ms,
            memory_mb,
            cpu,
        } => {
            let (code, language) = source.load()?;
            let request = ExecutionRequest::new(code, language, user, token)
                .with_timeout_ms(timeout_ms)
                .with_max_memory_mb(memory_mb)
                .with_max_cpu_fraction(cpu);
            run_code(&config, request).await
        }
        Commands::Validate { source } => validate_code(&config, &source),
        Commands::Reap => reap(&config).await,
        Commands::Config { action } => manage_config(&config, action),
    }
}

async fn run_code(config: &Config, request: ExecutionRequest) -> anyhow::Result<()> {
    let manager = create_manager(&config.sandbox).await?;
    let orchestrator = ExecutionOrchestrator::new(
        manager,
        build_validator(config)?,
        Arc::new(execbox::AuditLog::new(config.audit.capacity)),
        Arc::new(ToolDispatcher::new()),
    )?;

    println!("{} {} code...\n", style("▶").cyan(), request.language);

    let result = orchestrator.execute(request).await;

    if !result.output.is_empty() {
        println!("{}\n{}", style("Output:").bold(), result.output);
    }
    match &result.error {
        Some(error) => println!("{} {}", style("✗").red(), error),
        None => println!("{} Success", style("✓").green()),
    }

    println!(
        "\n{}",
        style(format!("Time: {}ms", result.execution_time_ms)).dim()
    );
    if let Some(usage) = result.resources_used {
        println!(
            "{}",
            style(format!(
                "CPU: {:.1}%  Memory: {:.1} MiB  Disk I/O: {:.1} MiB",
                usage.cpu_percent, usage.memory_mb, usage.disk_io_mb
            ))
            .dim()
        );
    }

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

fn build_validator(config: &Config) -> anyhow::Result<CodeValidator> {
    let rules = execbox::validator::RuleSet::with_extensions(
        &config.validator.extra_rules,
        &config.validator.extra_allowed_imports,
    )?;
    Ok(CodeValidator::new(rules))
}

fn print_validation(label: &str, result: &ValidationResult) -> bool {
    if result.valid {
        println!("   {} {}", style("✓").green(), label);
        return true;
    }

    println!(
        "   {} {}: {}",
        style("✗").red(),
        label,
        result.reason.as_deref().unwrap_or("invalid")
    );
    for violation in &result.violations {
        println!("      └─ {}", violation);
    }
    false
}

fn validate_code(config: &Config, source: &CodeSource) -> anyhow::Result<()> {
    let (code, language) = source.load()?;
    let validator = build_validator(config)?;
    let sanitized = validator.sanitize(&code);

    println!("\n{}", style(format!("Screening {} code", language)).cyan().bold());

    let size_ok = print_validation("Size", &validator.validate_size(&sanitized));
    let security_ok = print_validation("Security", &validator.validate(&sanitized, language));

    if !(size_ok && security_ok) {
        std::process::exit(1);
    }
    Ok(())
}

async fn reap(config: &Config) -> anyhow::Result<()> {
    let manager = create_manager(&config.sandbox).await?;
    let removed = manager.reap_orphans().await?;
    println!(
        "{} Removed {} orphaned sandbox(es)",
        style("✓").green(),
        removed
    );
    Ok(())
}

fn manage_config(config: &Config, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let path = config_path();
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            save_config(&Config::default(), &path)?;
            println!("{} Wrote {}", style("✓").green(), path.display());
        }
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigAction::Validate => {
            let result = validate_config(config);
            for issue in &result.errors {
                println!("   {} {}", style("✗").red(), issue);
            }
            for issue in &result.warnings {
                println!("   {} {}", style("⚠").yellow(), issue);
            }
            if !result.valid {
                std::process::exit(1);
            }
            println!("   {} Configuration is valid", style("✓").green());
        }
    }
    Ok(())
}
