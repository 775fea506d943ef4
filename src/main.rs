//! volley CLI - Sequential load-test orchestrator.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use volley::config::{self, PauseSetting, SchedulerConfig};
use volley::discovery::TestDiscovery;
use volley::orchestrator::Orchestrator;
use volley::report::{ConsoleReporter, ManifestReporter, MultiReporter};
use volley::scheduler;
use volley::supervisor::listen_for_shutdown;

#[derive(Parser)]
#[command(name = "volley")]
#[command(about = "Sequential load-test orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "volley.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the load tests
    Run {
        /// Override the test files directory
        #[arg(long)]
        test_dir: Option<PathBuf>,

        /// Override include patterns (repeatable)
        #[arg(long)]
        include: Vec<String>,

        /// Override exclude patterns (repeatable)
        #[arg(long)]
        exclude: Vec<String>,

        /// Override the pause between tests, in seconds
        #[arg(long)]
        pause: Option<i64>,
    },

    /// Discover tests without running them
    Collect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init {
        /// Scheduler type (none, command)
        #[arg(short, long, default_value = "none")]
        scheduler: String,
    },
}

struct RunOverrides {
    test_dir: Option<PathBuf>,
    include: Vec<String>,
    exclude: Vec<String>,
    pause: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            test_dir,
            include,
            exclude,
            pause,
        } => {
            run_tests(
                &cli.config,
                RunOverrides {
                    test_dir,
                    include,
                    exclude,
                    pause,
                },
            )
            .await
        }
        Commands::Collect { format } => collect_tests(&cli.config, &format),
        Commands::Validate => validate_config(&cli.config),
        Commands::Init { scheduler } => init_config(&scheduler),
    }
}

async fn run_tests(config_path: &Path, overrides: RunOverrides) -> Result<()> {
    let mut config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    if let Some(dir) = overrides.test_dir {
        config.run.test_files_directory = Some(dir);
    }
    if !overrides.include.is_empty() {
        config.run.include = overrides.include;
    }
    if !overrides.exclude.is_empty() {
        config.run.exclude = overrides.exclude;
    }
    if let Some(pause) = overrides.pause {
        config.run.post_test_pause_secs = PauseSetting::Seconds(pause);
    }

    info!("Loaded configuration from {}", config_path.display());

    match config.run.test_files_directory() {
        Some(dir) if dir.is_dir() => {}
        Some(dir) => {
            info!(
                "Test files directory {} does not exist, skipping load tests",
                dir.display()
            );
            return Ok(());
        }
        None => {
            info!("No test files directory configured, skipping load tests");
            return Ok(());
        }
    }

    let scheduler = scheduler::from_config(&config.scheduler)
        .await
        .context("Failed to set up event scheduler")?;
    if let Some(scheduler) = &scheduler {
        info!("Using event scheduler: {}", scheduler.name());
    }

    let reporter = create_reporter(&config);
    let orchestrator = Orchestrator::new(config, reporter).with_scheduler(scheduler);
    let _signals = listen_for_shutdown(orchestrator.host_interrupt());

    let report = orchestrator.run().await.context("Load test run failed")?;

    if report.interrupted {
        info!("Run interrupted after {} tests", report.executions.len());
    }
    std::process::exit(report.exit_code());
}

fn create_reporter(config: &config::Config) -> MultiReporter {
    let mut multi = MultiReporter::new().with_reporter(ConsoleReporter::new());

    if config.report.manifest {
        multi = multi.with_reporter(ManifestReporter::in_results_dir(
            &config.engine.results_dir(),
        ));
    }

    multi
}

fn collect_tests(config_path: &Path, format: &str) -> Result<()> {
    let config = config::load_config(config_path)?;
    let listing = TestDiscovery::from_settings(&config.run)?.describe();

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&listing)?;
            println!("{}", json);
        }
        _ => print!("{}", listing),
    }

    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    match config::load_config(config_path) {
        Ok(config) => {
            if let Err(e) = TestDiscovery::from_settings(&config.run) {
                eprintln!("Configuration error: {}", e);
                std::process::exit(1);
            }

            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            match config.run.test_files_directory() {
                Some(dir) => println!("  Test directory: {}", dir.display()),
                None => println!("  Test directory: <not configured>"),
            }
            println!("  Include: {}", config.run.include_patterns().join(", "));
            println!("  Pause: {}s", config.run.post_test_pause().as_secs());
            println!("  Engine: {}", config.engine.program);
            println!("  Results: {}", config.engine.results_dir().display());
            println!("  Remote servers: {}", config.remote.servers.len());

            let scheduler_name = match &config.scheduler {
                SchedulerConfig::None => "none",
                SchedulerConfig::Command(_) => "command",
            };
            println!("  Scheduler: {}", scheduler_name);

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_config(scheduler: &str) -> Result<()> {
    let scheduler_config = match scheduler {
        "none" => {
            r#"[scheduler]
type = "none""#
        }
        "command" => {
            r#"[scheduler]
type = "command"
# Each command runs via `sh -c` with VOLLEY_SESSION_ID in its environment
start_command = "./scripts/session.sh start"
stop_command = "./scripts/session.sh stop"
abort_command = "./scripts/session.sh abort"
# First stdout line becomes the run id
# run_id_command = "./scripts/session.sh run-id"
# Stdout lines `kill|abort|stop [message]` cancel the running test
# watch_command = "./scripts/session.sh watch"
timeout_secs = 120"#
        }
        _ => {
            eprintln!("Unknown scheduler: {}. Use: none, command", scheduler);
            std::process::exit(1);
        }
    };

    let config = format!(
        r#"# volley configuration file

[run]
test_files_directory = "src/test/jmeter"
include = ["**/*.jmx"]
exclude = []
post_test_pause_secs = 0
on_scheduler_cancel = "continue"

[engine]
program = "java"
runtime_args = ["-Xms512m", "-Xmx2g"]
runtime_jar = "target/jmeter/bin/ApacheJMeter.jar"
arguments = ["-n", "-t", "{{test}}", "-l", "{{results}}"]
results_dir = "target/jmeter/results"
results_format = "jtl"
tolerate_force_kill = false

[remote]
servers = []
start_servers_before_tests = false
stop_servers_after_tests = false
start_and_stop_servers_for_each_test = false

[report]
generate_reports = false
output_dir = "target/jmeter/reports"

{}
"#,
        scheduler_config
    );

    let path = PathBuf::from("volley.toml");
    if path.exists() {
        eprintln!("volley.toml already exists. Remove it first or edit manually.");
        std::process::exit(1);
    }

    std::fs::write(&path, config)?;
    println!("Created volley.toml");
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  volley run");

    Ok(())
}
