mod cli;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use strata_core::kernel::constants::{PLATFORM_NAME, PLATFORM_VERSION};
use strata_core::Kernel;
use tracing_subscriber::EnvFilter;

/// Strata: a service platform kernel host
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Print "pong" and exit
    #[arg(long)]
    ping: bool,

    /// Log filter (overrides RUST_LOG), e.g. "info,strata_core=debug"
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start services (all registered ones by default) and run until Ctrl-C
    Start {
        /// Configuration file (json, yaml or toml); repeat to layer several
        #[arg(short, long)]
        config: Vec<PathBuf>,
        /// Stop after this many milliseconds instead of waiting for Ctrl-C
        #[arg(long)]
        run_for_ms: Option<u64>,
        /// Print the startup report as JSON
        #[arg(long)]
        json: bool,
        services: Vec<String>,
    },
    /// Show the resolved start order without starting anything
    Plan { services: Vec<String> },
    /// List registered services
    List,
}

fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    if args.ping {
        println!("pong");
        return ExitCode::SUCCESS;
    }

    init_logging(args.log.as_deref());
    log::info!("{} v{}", PLATFORM_NAME, PLATFORM_VERSION);

    let registry = match cli::registry() {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Failed to register services: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let kernel = Kernel::new(registry);

    match args.command {
        None | Some(Commands::List) => {
            cli::list(&kernel);
            ExitCode::SUCCESS
        }
        Some(Commands::Plan { services }) => match cli::plan(&kernel, &services) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
        Some(Commands::Start {
            config,
            run_for_ms,
            json,
            services,
        }) => {
            let configuration = match cli::load_configuration(&config) {
                Ok(configuration) => configuration,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            let options = cli::StartOptions {
                services,
                run_for: run_for_ms.map(Duration::from_millis),
                json,
            };
            match cli::start(&kernel, &configuration, options).await {
                Ok(true) => ExitCode::SUCCESS,
                Ok(false) => ExitCode::from(2),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    if e.is_timeout() {
                        eprintln!("Hint: raise platform.lifecycle.startup_timeout_ms or phase_timeout_ms");
                    }
                    ExitCode::FAILURE
                }
            }
        }
    }
}
