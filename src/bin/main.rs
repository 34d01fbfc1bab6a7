use clap::Parser;
use feedguide::{Error, FeedGuide, RunResult, Runner, RunnerConfig, StepStatus};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "feedguide")]
#[command(about = "Run a feed guide: navigate a site and download its files")]
#[command(version)]
struct Cli {
    /// Feed guide file (JSON or YAML)
    guide: PathBuf,

    /// Directory to save downloads into
    #[arg(long, value_name = "DIR")]
    download_dir: Option<PathBuf>,

    /// Run the browser headless
    #[arg(long, conflicts_with = "headed")]
    headless: bool,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Automation engine to launch
    #[arg(long, value_name = "NAME")]
    browser: Option<String>,

    /// Timeout for each browser wait, in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Runner options file (YAML); FEEDGUIDE_* env vars apply when absent
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Validate the guide without running it
    #[arg(long)]
    check: bool,

    /// Print the run result as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> feedguide::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let guide = FeedGuide::load(&cli.guide)?;

    if cli.check {
        println!("Guide valid: {}", guide.feed_name);
        println!("  Steps: {}", guide.steps.len());
        for (i, entry) in guide.steps.iter().enumerate() {
            let flag = if entry.continue_on_error {
                " (continue on error)"
            } else {
                ""
            };
            println!("    {}. {}{}", i + 1, entry.step.name(), flag);
        }
        return Ok(());
    }

    let mut config = match cli.config {
        Some(ref path) => RunnerConfig::load(path)?,
        None => RunnerConfig::from_env()?,
    };
    if let Some(dir) = cli.download_dir {
        config.download_dir = dir;
    }
    if cli.headless {
        config.headless = true;
    }
    if cli.headed {
        config.headless = false;
    }
    if let Some(browser) = cli.browser {
        config.browser_name = browser;
    }
    if let Some(ms) = cli.timeout_ms {
        config.step_timeout_ms = ms;
    }

    println!("Running: {}", guide.feed_name);

    let mut runner = Runner::new(&config).await?;
    let outcome = runner.run(&guide).await;
    runner.close().await;

    match outcome {
        Ok(result) => {
            report(&result, cli.json)?;
            Ok(())
        }
        Err(Error::Aborted {
            step,
            message,
            partial,
            ..
        }) => {
            report(&partial, cli.json)?;
            eprintln!();
            eprintln!("✗ Aborted at step {}", step);
            eprintln!("  Error: {}", message);
            std::process::exit(1);
        }
        Err(e) => Err(e),
    }
}

fn report(result: &RunResult, json: bool) -> feedguide::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!();
    for step in &result.steps {
        let mark = match step.status {
            StepStatus::Ok => "✓",
            StepStatus::Error => "✗",
        };
        let detail = step
            .error
            .as_deref()
            .or(step.info.as_deref())
            .unwrap_or_default();
        println!("{} {}. {} - {}", mark, step.index, step.action, detail);
    }
    println!("  Steps: {}", result.steps.len());
    println!("  Failed: {}", result.failed_steps());
    for path in &result.downloads {
        println!("  Downloaded: {}", path.display());
    }
    Ok(())
}
