//! Dump normalizer CLI.
//!
//! Normalizes one analysis dump and prints the encounter identity, record
//! counts and summaries as JSON on stdout. Logs go to stderr.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//! - `ENCOUNTER_*`: Kernel settings, see [`encounter_kernel::KernelConfig::from_env`]
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin normalize_dump -- dump.json [skill]
//! ```
//!
//! `skill` selects the damage summary: a skill name, `condi`, `power`
//! (default) or `shielded`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use encounter_kernel::{
    summarize_damage, summarize_events, AttributeFilter, DumpNormalizer, IdentityResolver,
    KernelConfig, POWER_SKILL, SHIELDED_SKILL,
};

#[derive(Debug, Parser)]
#[command(name = "normalize_dump")]
#[command(about = "Normalize a raid encounter dump and print its identity and summaries", long_about = None)]
struct Args {
    /// Analysis dump (JSON) to normalize
    dump: PathBuf,

    /// Damage summary to print: a skill name, `condi`, `power` or `shielded`
    #[arg(default_value = POWER_SKILL)]
    skill: String,
}

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "normalize_dump=info,encounter_kernel=info".into());

    if log_format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .init();
    }
}

fn run(path: &Path, skill: &str) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let config = KernelConfig::from_env();
    config.validate()?;

    let bytes = std::fs::read(path)?;
    let normalizer = DumpNormalizer::new(config.normalizer.clone());
    let normalized = normalizer.normalize(&encounter_kernel::Dump::from_slice(&bytes)?)?;

    let resolver = IdentityResolver::new(config.identity.clone());
    let identity = resolver.resolve(normalized.account_ids(), normalized.instance.started_at());

    let attributes = &normalized.attributes;
    let everyone = AttributeFilter::new().target(config.normalizer.aggregate_actor.as_str());
    let damage = summarize_damage(attributes.damage(&everyone), skill, skill == SHIELDED_SKILL);
    let events = summarize_events(attributes.events(&AttributeFilter::new()));

    info!(
        boss = %normalized.instance.boss,
        records = attributes.len(),
        fingerprint = %identity.fingerprint,
        "Dump normalized"
    );

    Ok(json!({
        "instance": normalized.instance,
        "duration": normalized.instance.duration(),
        "identity": identity,
        "counts": attributes.counts(),
        "digest": attributes.digest()?,
        "damage": { "skill": skill, "summary": damage },
        "events": { "summary": events, "inactive_time": events.inactive_time() },
    }))
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    match run(&args.dump, &args.skill) {
        Ok(report) => {
            println!("{report:#}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(path = %args.dump.display(), error = %e, "Normalization failed");
            ExitCode::FAILURE
        }
    }
}
