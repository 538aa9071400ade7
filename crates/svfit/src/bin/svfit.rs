use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;
use svfit::{fit_event, IntegrandConfig, MeasuredEvent, PlainMonteCarlo, SvfitResult};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "svfit", version, about = "Reconstruct the mass of a tau pair")]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    /// Event in JSON form; the built-in reference event is used if omitted
    #[arg(long)]
    input: Option<PathBuf>,

    /// Constrain the pair mass to this value (GeV)
    #[arg(long)]
    mass_constraint: Option<f64>,

    /// Power p of the 1/M^p regularisation
    #[arg(long, default_value_t = 6.0, conflicts_with = "no_log_m")]
    log_m_power: f64,

    /// Disable the 1/M^p regularisation
    #[arg(long)]
    no_log_m: bool,

    /// Use decay vertices to constrain the flight length
    #[arg(long)]
    flight_length: bool,

    /// Number of Monte-Carlo calls
    #[arg(long, default_value_t = 100_000)]
    n_calls: usize,

    /// Seed of the Monte-Carlo generator
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Verbosity of the integrand (0, 1 or 2)
    #[arg(long, default_value_t = 0)]
    verbosity: u8,

    /// Write the result here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct Report<'a> {
    event: &'a MeasuredEvent,
    visible_mass: f64,
    #[serde(flatten)]
    fit: svfit::EventFit,
}

fn main() -> SvfitResult<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .init();

    let event = match &cli.input {
        Some(path) => MeasuredEvent::from_json(&std::fs::read_to_string(path)?)?,
        None => svfit::test_event(),
    };
    info!("{}", event);

    let mut config = IntegrandConfig::default()
        .with_tau_flight_length(cli.flight_length)
        .with_verbosity(cli.verbosity);
    config = if cli.no_log_m {
        config.without_log_m()
    } else {
        config.with_log_m(cli.log_m_power)
    };
    if let Some(mass) = cli.mass_constraint {
        config = config.with_di_tau_mass_constraint(mass);
    }

    let integrator = PlainMonteCarlo::new(cli.n_calls).with_seed(cli.seed);
    let fit = fit_event(&event, &config, &integrator);
    if !fit.error_codes.is_empty() {
        warn!(codes = %fit.error_codes, "event failed setup");
    }
    match &fit.masses {
        Some(m) => info!(
            mass = m.mass,
            mass_err = m.mass_err,
            transverse_mass = m.transverse_mass,
            transverse_mass_err = m.transverse_mass_err,
            "fit finished"
        ),
        None => warn!("no point was accepted"),
    }

    let report = serde_json::to_string_pretty(&Report {
        event: &event,
        visible_mass: event.visible_mass(),
        fit,
    })?;
    match &cli.output {
        Some(path) => std::fs::write(path, report)?,
        None => println!("{report}"),
    }
    Ok(())
}
