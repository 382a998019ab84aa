//! Command-line entry point for a Bode sweep.
use anyhow::{bail, Context, Result};
use bode_sweep::adapters::{self, SimulatedBench};
use bode_sweep::config::{
    BodeConfig, ConfigOverrides, InstrumentOverrides, ResourceOverride, StorageOverrides,
    SweepOverrides, TuningOverrides, DEFAULT_CONFIG_PATH,
};
use bode_sweep::data::{ConsoleSink, CsvWriter, FanoutSink};
use bode_sweep::error::BodeError;
use bode_sweep::instrument::{ScopeController, StimulusController};
use bode_sweep::sweep::{cancel_pair, relay_interrupts, SweepEngine, TerminationReason};
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bode_sweep")]
#[command(about = "Gain/phase sweep with a SCPI signal generator and oscilloscope", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Start frequency in Hz
    #[arg(long)]
    start: Option<f64>,
    /// Frequency multiplier per step (> 1)
    #[arg(long)]
    multiplier: Option<f64>,
    /// Extra settle time per step in seconds
    #[arg(long)]
    settle: Option<f64>,
    /// Stop once the next frequency exceeds this, in Hz
    #[arg(long)]
    stop_freq: Option<f64>,
    /// Stop once Vout falls below this, in V
    #[arg(long)]
    stop_vout: Option<f64>,
    /// Generator resource string
    #[arg(long)]
    generator: Option<String>,
    /// Oscilloscope resource string
    #[arg(long)]
    scope: Option<String>,
    /// Directory for the CSV output
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Leave the scope's vertical scales alone
    #[arg(long)]
    no_auto_range: bool,
    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,
    /// Run against a simulated RC low-pass instead of real instruments
    #[arg(long)]
    simulate: bool,
    /// List VISA resources and exit
    #[arg(long)]
    list_resources: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let resource = |value: &Option<String>| {
            value.clone().map(|resource| ResourceOverride { resource })
        };
        ConfigOverrides {
            instruments: InstrumentOverrides {
                generator: resource(&self.generator),
                scope: resource(&self.scope),
            },
            sweep: SweepOverrides {
                start_frequency_hz: self.start,
                frequency_multiplier: self.multiplier,
                settle_time_secs: self.settle,
                stop_frequency_hz: self.stop_freq,
                stop_vout_volts: self.stop_vout,
            },
            tuning: TuningOverrides {
                auto_range_enabled: self.no_auto_range.then_some(false),
            },
            storage: StorageOverrides {
                output_dir: self.output_dir.clone(),
            },
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = BodeConfig::load_from(&args.config, &args.overrides())
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.application.log_level)),
        )
        .init();

    if args.list_resources {
        let resources = adapters::discover().await?;
        if resources.is_empty() {
            println!("No VISA resources found.");
        }
        for resource in resources {
            println!("{}", resource);
        }
        return Ok(());
    }

    if !args.simulate {
        config.require_instruments()?;
    }

    if !args.yes {
        confirm(&config, args.simulate).await?;
    }

    let (mut stimulus, mut scope) = connect(&config, args.simulate).await?;
    let generator_id = stimulus.identify().await?;
    info!("Generator: {}", generator_id);
    let scope_id = scope.identify().await?;
    info!("Scope: {}", scope_id);

    let mut sink = FanoutSink::new();
    match CsvWriter::create(&config.storage.output_dir) {
        Ok(writer) => {
            info!("Writing {}", writer.path().display());
            sink = sink.with_sink(Box::new(writer));
        }
        Err(BodeError::FeatureNotEnabled(feature)) => {
            warn!("CSV output disabled ({} not compiled in)", feature);
        }
        Err(e) => return Err(e).context("Failed to create CSV output"),
    }
    sink = sink.with_sink(Box::new(
        ConsoleSink::new().context("Failed to write console header")?,
    ));

    let (cancel, signal) = cancel_pair();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        let interrupts = move || {
            let watcher = watcher.clone();
            async move {
                let result = tokio::signal::ctrl_c().await;
                if result.is_ok() && !watcher.is_cancelled() {
                    warn!("Interrupt received, stopping after the current step (Ctrl-C again to abort)");
                }
                result
            }
        };
        match relay_interrupts(&cancel, interrupts).await {
            Ok(()) => {
                error!("Second interrupt, aborting mid-step");
                std::process::exit(130);
            }
            Err(e) => warn!("Ctrl-C handler unavailable: {}", e),
        }
    });

    let engine = SweepEngine::new(
        config.sweep.clone(),
        config.tuning.clone(),
        config.channels,
        &mut stimulus,
        &mut scope,
        Box::new(sink),
        signal,
    )?;
    let report = engine.run().await;

    if let Err(e) = stimulus.close().await {
        warn!("{}", e);
    }
    if let Err(e) = scope.close().await {
        warn!("{}", e);
    }

    info!(
        "{:?}: {} records, last frequency {}",
        report.reason,
        report.records_emitted,
        report
            .last_frequency_hz
            .map_or_else(|| "n/a".to_string(), |hz| format!("{} Hz", hz))
    );

    match (report.reason, report.fault) {
        (TerminationReason::Fault, Some(e)) => {
            error!("Sweep aborted: {}", e);
            Err(e.into())
        }
        (TerminationReason::Fault, None) => bail!("Sweep aborted"),
        _ => Ok(()),
    }
}

/// Block until the operator presses Enter.
async fn confirm(config: &BodeConfig, simulate: bool) -> Result<()> {
    if simulate {
        println!("Simulated bench: no instruments will be contacted.");
    } else {
        println!("Generator: {}", config.instruments.generator.resource);
        println!("Scope:     {}", config.instruments.scope.resource);
        println!(
            "Connect the DUT input to CH{} and its output to CH{}.",
            config.channels.vin, config.channels.vout
        );
    }
    println!("Press Enter to start the sweep (Ctrl-C to abort)...");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read confirmation from stdin")?;
    Ok(())
}

async fn connect(
    config: &BodeConfig,
    simulate: bool,
) -> Result<(StimulusController, ScopeController)> {
    let source = config.channels.source;
    if simulate {
        let bench = SimulatedBench::new().with_channels(config.channels.vin, config.channels.vout);
        return Ok((
            StimulusController::new("generator", source, Box::new(bench.generator())),
            ScopeController::new("scope", Box::new(bench.scope())),
        ));
    }

    let generator = &config.instruments.generator;
    let scope = &config.instruments.scope;
    let generator_adapter = adapters::open(&generator.resource, generator.timeout()).await?;
    let scope_adapter = adapters::open(&scope.resource, scope.timeout()).await?;
    Ok((
        StimulusController::new(generator.resource.clone(), source, generator_adapter),
        ScopeController::new(scope.resource.clone(), scope_adapter),
    ))
}
