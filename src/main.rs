//! Converge - Output-Quality Feedback Loop
//!
//! Command-line entry point: run the loop, analyze a single document, and
//! inspect or clear persisted loop state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use converge::r#loop::{ConsoleObserver, TracingObserver};
use converge::{
    AnalysisPolicy, AnalyzerRegistry, ConvergeConfig, ConvergeError, FeedbackLoopManager,
    LoopDependencies, LoopStatePersistence, LoopStatus, LoopTask, ProgressObserver, Severity,
    TemplateLibrary,
};

#[derive(Parser)]
#[command(name = "converge")]
#[command(version)]
#[command(about = "Drive generated documents to match their templates: submit, analyze, fix, redeploy, retest", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Settings file (defaults to <project>/.converge/settings.json)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the feedback loop for one service until it passes, fails or suspends
    Run {
        /// Service whose frontend receives the form
        service: String,

        /// Template the generated document must match
        #[arg(short, long)]
        template: String,

        /// Task id used to resume a previous run (defaults to the service name)
        #[arg(long)]
        task_id: Option<String>,

        /// Form payload as JSON, or @path to a JSON file
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,

        /// Maximum iterations (overrides settings)
        #[arg(short, long)]
        max_iterations: Option<u32>,

        /// Ask the operator to approve a passing result
        #[arg(long)]
        require_approval: bool,
    },

    /// Analyze one document against a template
    Analyze {
        /// Document to analyze (.pptx, .xlsx, .docx, .pdf, .html)
        file: PathBuf,

        /// Template name
        #[arg(short, long)]
        template: String,

        /// Output the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show persisted loop state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete persisted loop state
    Clear,

    /// List loaded templates
    Templates {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default = if verbose {
        "converge=debug,info"
    } else {
        "converge=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    // Resolve project path
    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());
    if !project_path.exists() {
        eprintln!(
            "{} Project directory does not exist: {}",
            "Error:".red().bold(),
            project_path.display()
        );
        std::process::exit(1);
    }

    let code = match execute(cli, &project_path).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn execute(cli: Cli, project_path: &Path) -> converge::Result<i32> {
    let mut config = ConvergeConfig::load(project_path, cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            service,
            template,
            task_id,
            payload,
            max_iterations,
            require_approval,
        } => {
            if let Some(max) = max_iterations {
                config.loop_settings.max_iterations = max;
            }
            if require_approval {
                config.loop_settings.require_approval = true;
            }

            let mut task = LoopTask::new(service, template, parse_payload(payload.as_deref())?);
            if let Some(id) = task_id {
                task = task.with_task_id(id);
            }

            let observer: Arc<dyn ProgressObserver> = match cli.log_format {
                LogFormat::Text => Arc::new(ConsoleObserver),
                LogFormat::Json => Arc::new(TracingObserver),
            };
            let deps = LoopDependencies::real(&config)?;
            let manager = FeedbackLoopManager::new(config, deps)?.with_observer(observer);

            println!(
                "{} {} against template '{}' (task {})",
                "Converging".cyan().bold(),
                task.service_name,
                task.template,
                task.task_id
            );
            let outcome = manager.run(&task).await?;

            let status = match outcome.status {
                LoopStatus::Completed => outcome.status.to_string().green().bold(),
                LoopStatus::Suspended => outcome.status.to_string().yellow().bold(),
                LoopStatus::Failed | LoopStatus::Timeout => outcome.status.to_string().red().bold(),
            };
            println!();
            println!(
                "{} after {} iteration(s) in {}, {} PR(s) merged",
                status,
                outcome.iterations,
                format_elapsed(outcome.elapsed),
                outcome.prs_merged
            );
            println!("   {}", outcome.summary);
            if outcome.status == LoopStatus::Suspended {
                println!(
                    "   Run again with task id '{}' to resume.",
                    task.task_id
                );
            }
            Ok(outcome.exit_code())
        }

        Commands::Analyze {
            file,
            template,
            json,
        } => {
            let templates = TemplateLibrary::load_dir(&config.templates_dir)?;
            let registry = AnalyzerRegistry::with_defaults(templates, &AnalysisPolicy::from_config(&config));
            let file = if file.is_relative() { project_path.join(file) } else { file };
            let result = registry.analyze_output(&file, &template)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let headline = if result.passed {
                    result.headline().green().bold()
                } else {
                    result.headline().red().bold()
                };
                println!("{headline}");
                for discrepancy in &result.discrepancies {
                    let severity = match discrepancy.severity() {
                        Severity::Critical => "critical".red().bold(),
                        Severity::High => "high".red(),
                        Severity::Medium => "medium".yellow(),
                        Severity::Low => "low".dimmed(),
                    };
                    println!("  - [{}] {}", severity, discrepancy);
                }
            }
            Ok(if result.passed { 0 } else { 1 })
        }

        Commands::Status { json } => {
            let persistence = LoopStatePersistence::new(&config.state_file)
                .with_history_capacity(config.loop_settings.history_capacity);
            let Some(state) = persistence.load()? else {
                if json {
                    println!("null");
                } else {
                    println!("No loop state at {}", persistence.path().display());
                }
                return Ok(0);
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
                return Ok(0);
            }

            let (done, total) = state.cycle.progress();
            println!("\n{} {}", "Loop state:".cyan().bold(), persistence.path().display());
            println!("{}", "─".repeat(40));
            println!("   Service:     {}", state.service_name);
            println!("   Task:        {}", state.task_id.as_deref().unwrap_or("-"));
            println!("   Phase:       {}", state.state);
            println!("   Iteration:   {} ({}/{} steps)", state.iteration, done, total);
            println!("   PRs merged:  {}", state.prs_merged);
            println!("   Issue sets:  {}", state.issues.tracker().len());
            if let Some(saved) = state.last_saved_at {
                println!("   Saved at:    {}", saved.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            if let Some(pr) = state.pending.pr_number {
                println!("   Open PR:     #{pr}");
            }
            if let Some(ref error) = state.last_error {
                println!("   Last error:  {}", error.yellow());
            }
            Ok(0)
        }

        Commands::Clear => {
            let persistence = LoopStatePersistence::new(&config.state_file);
            if persistence.clear() {
                println!("{} Cleared {}", "OK".green().bold(), persistence.path().display());
            } else {
                println!("No loop state at {}", persistence.path().display());
            }
            Ok(0)
        }

        Commands::Templates { json } => {
            let templates = TemplateLibrary::load_dir(&config.templates_dir)?;
            if json {
                let all: Vec<_> = templates.iter().collect();
                println!("{}", serde_json::to_string_pretty(&all)?);
            } else if templates.is_empty() {
                println!("No templates in {}", config.templates_dir.display());
            } else {
                println!("\n{} {}", "Templates:".cyan().bold(), config.templates_dir.display());
                for template in templates.iter() {
                    if template.description.is_empty() {
                        println!("   {}", template.name);
                    } else {
                        println!("   {} - {}", template.name, template.description);
                    }
                }
            }
            Ok(0)
        }
    }
}

/// `None` is an empty object; `@path` reads a file.
fn parse_payload(raw: Option<&str>) -> converge::Result<serde_json::Value> {
    let Some(raw) = raw else {
        return Ok(serde_json::json!({}));
    };
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text)
        .map_err(|e| ConvergeError::invalid_config("--payload", format!("not valid JSON: {e}")))
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", elapsed.as_secs_f64())
    }
}
