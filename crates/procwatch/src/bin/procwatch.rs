use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use procwatch::{kill_tree, resolve, ProcessConfig, ProcessHandle, Redirect};
use tracing_subscriber::EnvFilter;

/// Launch and supervise detached processes
#[derive(Parser)]
#[command(name = "procwatch")]
#[command(about = "Launch, watch and tree-kill detached processes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a command detached and stream its output until it exits
    Run {
        /// Write stdout here instead of a captured temp file
        #[arg(long)]
        stdout: Option<PathBuf>,

        /// Write stderr here instead of a captured temp file
        #[arg(long)]
        stderr: Option<PathBuf>,

        /// Load the launch configuration from a TOML file
        #[arg(short, long, conflicts_with = "argv")]
        config: Option<PathBuf>,

        /// Grace period between kill escalation steps on Ctrl-C
        #[arg(long, default_value_t = 100)]
        grace_ms: u64,

        /// Command and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        argv: Vec<String>,
    },
    /// Print the pid of the process carrying a token
    Find {
        token: String,

        /// Accept any token carrier, not only the launched wrapper
        #[arg(long)]
        descendants: bool,
    },
    /// Run the tree-kill protocol against the process carrying a token
    Kill {
        token: String,

        #[arg(long, default_value_t = 100)]
        grace_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            stdout,
            stderr,
            config,
            grace_ms,
            argv,
        } => {
            let mut config = match config {
                Some(path) => {
                    let source = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    ProcessConfig::from_toml_str(&source)?
                }
                None => {
                    let Some((command, args)) = argv.split_first() else {
                        bail!("No command given");
                    };
                    ProcessConfig::new(command.clone())
                        .args(args.iter().cloned())
                        .stdout(Redirect::AutoCapture)
                        .stderr(Redirect::AutoCapture)
                }
            };
            if let Some(path) = stdout {
                config.stdout = Redirect::Path(path);
            }
            if let Some(path) = stderr {
                config.stderr = Redirect::Path(path);
            }

            let code = run(config, Duration::from_millis(grace_ms)).await?;
            std::process::exit(code);
        }
        Commands::Find { token, descendants } => match resolve(&token, descendants) {
            Some(pid) => println!("{}", pid),
            None => bail!("No process carries token {}", token),
        },
        Commands::Kill { token, grace_ms } => match resolve(&token, false) {
            Some(pid) => {
                let report = kill_tree(pid, &token, Duration::from_millis(grace_ms)).await;
                println!(
                    "killed {} ({} descendants, {} signals)",
                    report.pid,
                    report.descendants.len(),
                    report.delivered
                );
            }
            None => println!("no process carries token {}", token),
        },
    }

    Ok(())
}

async fn run(config: ProcessConfig, grace: Duration) -> anyhow::Result<i32> {
    let poll = config.poll_interval;
    let mut handle = ProcessHandle::new(config)?;
    eprintln!("token {}", handle.token());

    loop {
        for line in handle.read_output_lines() {
            println!("{}", line);
        }
        for line in handle.read_error_lines() {
            eprintln!("{}", line);
        }
        if handle.is_eof_output() && handle.is_eof_error() {
            break;
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                handle.kill(grace).await;
            }
            _ = tokio::time::sleep(poll) => {}
        }
    }

    handle.wait().await?;
    Ok(handle.exit_status().unwrap_or(-1))
}
