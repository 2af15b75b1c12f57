//! Tremorwire daemon entry point.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use tremorwire::config::Config;
use tremorwire::error::FatalError;
use tremorwire::{Coords, Magnitude, Pipeline, Report, Status};

#[derive(Parser)]
#[command(name = "tremorwire", about = "Real-time earthquake alert correlator")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, env = "TREMORWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose (debug) logging.
    #[arg(short, long)]
    verbose: bool,

    /// Errors only.
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline (default).
    Run,
    /// Run the pipeline with a simulated event injected at startup.
    Simulate {
        /// Epicenter latitude.
        #[arg(long)]
        lat: f64,
        /// Epicenter longitude.
        #[arg(long)]
        lon: f64,
        /// Magnitude of the simulated event.
        #[arg(long, default_value_t = 5.5)]
        mag: f64,
        /// Also inject a crowd swarm around the epicenter.
        #[arg(long)]
        swarm: bool,
    },
    /// Print the effective configuration and exit.
    CheckConfig,
}

fn init_tracing(verbose: bool, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Fatal pipeline conditions get the software-error exit code so
            // the host supervisor restarts the process.
            let code = if e.downcast_ref::<FatalError>().is_some() {
                error!("{e:#}");
                ExitCode::from(70)
            } else {
                error!("{e:#}");
                ExitCode::FAILURE
            };
            eprintln!("Error: {e:#}");
            code
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref());

    let runtime = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::CheckConfig => {
            let rendered = toml::to_string_pretty(&config)?;
            println!("{rendered}");
            Ok(())
        }
        Command::Run => runtime.block_on(async {
            let pipeline = Pipeline::build(&config)?;
            info!(sources = config.sources.len(), "starting pipeline");
            pipeline.run().await.map_err(anyhow::Error::from)
        }),
        Command::Simulate {
            lat,
            lon,
            mag,
            swarm,
        } => runtime.block_on(async {
            let pipeline = Pipeline::build(&config)?;
            let injector = pipeline.reports_sender_for_simulation();

            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                info!(lat, lon, mag, "injecting simulated event");

                let coords = Coords::new(lat, lon, -10.0).with_radius(20.0);
                let mut report = Report::new(
                    coords,
                    chrono::Utc::now() - chrono::Duration::seconds(5),
                    Magnitude::new(mag, Some("Mw")),
                );
                report.status = Status::Reported;
                report.sources = vec!["SIMULATION".to_string()];
                let _ = injector.send((report, "simulation".to_string())).await;

                if swarm {
                    use rand_distr::{Distribution, Normal};
                    let jitter = Normal::new(0.0, 0.6).unwrap_or_else(|_| {
                        Normal::new(0.0, 0.1).expect("normal distribution")
                    });
                    for i in 0..40 {
                        let jittered_mag = {
                            let mut rng = rand::thread_rng();
                            (mag + jitter.sample(&mut rng)).max(2.5)
                        };
                        let mut crowd = Report::new(
                            coords,
                            chrono::Utc::now() - chrono::Duration::seconds(5),
                            Magnitude::new(jittered_mag, Some("(guessing)")),
                        );
                        crowd.status = Status::Guessed;
                        crowd.score = 0.3;
                        crowd.text = Some(format!("EARTHQUAKE!! (simulated witness {i})"));
                        crowd.user = Some(format!("sim_user_{i}"));
                        crowd.keywords = vec!["earthquake".to_string()];
                        let _ = injector.send((crowd, "simulation".to_string())).await;
                        tokio::time::sleep(std::time::Duration::from_secs(4)).await;
                    }
                }
            });

            pipeline.run().await.map_err(anyhow::Error::from)
        }),
    }
}
