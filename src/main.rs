use std::path::PathBuf;
use std::process::ExitCode;

use superelixier::config::Config;
use superelixier::instance_lock::InstanceLock;
use superelixier::runner::{self, RunOptions};
use superelixier::status::print_error;

const HELP: &str = "\
Superelixier Updater

USAGE:
    superelixier [--config <path>] [--no-history] [--check-only]

OPTIONS:
    --config <path>   Configuration file (default: superelixier.toml next to the executable)
    --no-history      Do not keep replaced files in .superelixier-history
    --check-only      Only report update status, do not download anything
    --version         Print version
    help, --help      Print this message";

/// 명령줄 인자
#[derive(Debug, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    no_history: bool,
    check_only: bool,
    version: bool,
    help: bool,
}

fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let mut parsed = CliArgs::default();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--no-history" => parsed.no_history = true,
            "--check-only" => parsed.check_only = true,
            "--version" | "-V" => parsed.version = true,
            "help" | "--help" | "-h" => parsed.help = true,
            other => anyhow::bail!("Unknown argument '{}'\n\n{}", other, HELP),
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> ExitCode {
    // 상태 출력(stdout)과 섞이지 않도록 로그는 stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };

    if cli.help {
        println!("{}", HELP);
        return ExitCode::SUCCESS;
    }
    if cli.version {
        println!("superelixier {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: CliArgs) -> anyhow::Result<()> {
    // 가드가 살아 있는 동안만 잠금 유지, 어떤 경로로 빠져나가도 해제됨
    let _lock = InstanceLock::acquire()?;

    let config = Config::load(cli.config.as_deref())?;
    config.ensure_eula()?;

    let options = RunOptions {
        check_only: cli.check_only,
        keep_history: cli.no_history.then_some(false),
    };

    tracing::info!("Superelixier Updater {} starting", env!("CARGO_PKG_VERSION"));
    let summary = runner::run(&config, &options).await?;
    tracing::info!(
        "Checked {} app(s): {} updated, {} installed, {} deferred, {} failed",
        summary.checked,
        summary.updated,
        summary.installed,
        summary.deferred,
        summary.failed
    );
    Ok(())
}
