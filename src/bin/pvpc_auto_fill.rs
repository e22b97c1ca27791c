use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use clap::Parser;
use pvpc::{
    esios_api_key_from_env, init_logging, log_app_failure, log_app_finish, log_app_start,
    logging_config_from_env, run_sync, EsiosClient, EsiosConfig, GeoTimezones, SyncConfig,
    SyncError, DEFAULT_GEOS,
};

const COMPONENT: &str = "pvpc_auto_fill";
const EXIT_USAGE: u8 = 2;
const EXIT_FAILURE: u8 = 1;

/// Fetch PVPC prices from ESIOS into monthly JSON archives.
///
/// Without --from the range is planned from gaps in the current and previous
/// month, always ending tomorrow.
#[derive(Debug, Parser)]
#[command(name = "pvpc_auto_fill", version)]
struct Args {
    /// Output root directory.
    #[arg(long, default_value = "data/pvpc")]
    out_dir: PathBuf,

    /// Geo IDs to sync.
    #[arg(long, num_args = 1.., default_values_t = DEFAULT_GEOS)]
    geos: Vec<u32>,

    /// Start date (YYYY-MM-DD). Auto-detected when omitted.
    #[arg(long = "from")]
    from_date: Option<NaiveDate>,

    /// End date (YYYY-MM-DD). Defaults to today in the geo's timezone.
    #[arg(long = "to")]
    to_date: Option<NaiveDate>,

    /// Seconds to sleep between requests.
    #[arg(long, default_value_t = 0.0)]
    sleep: f64,

    /// HTTP timeout in seconds.
    #[arg(long, default_value_t = 60)]
    timeout: u64,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let logging_cfg = logging_config_from_env();
    if let Err(err) = init_logging(&logging_cfg) {
        eprintln!("ERROR: {err}");
        return ExitCode::from(EXIT_FAILURE);
    }
    log_app_start(COMPONENT, &logging_cfg);

    let Some(api_key) = esios_api_key_from_env() else {
        log_app_failure(COMPONENT, "missing ESIOS_API_KEY", EXIT_USAGE);
        eprintln!("ERROR: ESIOS_API_KEY environment variable is missing.");
        return ExitCode::from(EXIT_USAGE);
    };

    let request_delay = match Duration::try_from_secs_f64(args.sleep) {
        Ok(delay) => delay,
        Err(err) => {
            log_app_failure(COMPONENT, "invalid --sleep", EXIT_USAGE);
            eprintln!("ERROR: invalid --sleep {}: {err}", args.sleep);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let client = match EsiosClient::new(EsiosConfig {
        timeout_ms: args.timeout.saturating_mul(1_000),
        ..EsiosConfig::new(api_key)
    }) {
        Ok(client) => client,
        Err(err) => {
            log_app_failure(COMPONENT, "http client", EXIT_FAILURE);
            eprintln!("ERROR: {err}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let cfg = SyncConfig {
        out_dir: args.out_dir,
        geos: args.geos,
        from: args.from_date,
        to: args.to_date,
        request_delay,
        timezones: GeoTimezones::default(),
    };

    let started = Instant::now();
    match run_sync(&cfg, &client, Utc::now()) {
        Ok(report) => {
            for geo in &report.geos {
                println!(
                    "geo {} ({}): {} -> {} | months={} days={} warnings={}",
                    geo.geo_id,
                    geo.timezone,
                    geo.start,
                    geo.end,
                    geo.months_written.len(),
                    geo.days_fetched,
                    geo.warnings
                );
            }
            println!("Done: {}", report.root_index_path.display());
            log_app_finish(
                COMPONENT,
                report.geos.len(),
                started.elapsed().as_millis() as u64,
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            let code = match err {
                SyncError::InvalidRange { .. } => EXIT_USAGE,
                _ => EXIT_FAILURE,
            };
            log_app_failure(COMPONENT, &err.to_string(), code);
            eprintln!("ERROR: {err}");
            ExitCode::from(code)
        }
    }
}
