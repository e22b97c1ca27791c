use std::path::PathBuf;

use chrono::Utc;
use clap::Parser;
use pvpc::{
    geo_dir, init_logging, log_app_start, logging_config_from_env, plan_fetch_range, today_in,
    GeoTimezones, DEFAULT_GEOS,
};

const COMPONENT: &str = "pvpc_gap_audit";

/// Report missing days in the local PVPC archives. Reads files only.
#[derive(Debug, Parser)]
#[command(name = "pvpc_gap_audit", version)]
struct Args {
    /// Archive root directory.
    #[arg(long, default_value = "data/pvpc")]
    out_dir: PathBuf,

    /// Geo IDs to audit.
    #[arg(long, num_args = 1.., default_values_t = DEFAULT_GEOS)]
    geos: Vec<u32>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(COMPONENT, &logging_cfg);

    let timezones = GeoTimezones::default();
    let now = Utc::now();
    let mut total_missing = 0usize;

    println!(
        "PVPC gap audit | out_dir={} geos={:?}",
        args.out_dir.display(),
        args.geos
    );

    for geo_id in args.geos {
        let tz = timezones.tz_for(geo_id);
        let dir = geo_dir(&args.out_dir, geo_id);
        let today = today_in(tz, now);

        let plan = plan_fetch_range(&dir, today);
        total_missing += plan.missing.len();

        println!(
            "geo {} ({}) today={} missing={} planned={} -> {}",
            geo_id,
            tz.name(),
            today,
            plan.missing.len(),
            plan.start,
            plan.end
        );
        for day in &plan.missing {
            println!("  missing {day}");
        }
    }

    if total_missing == 0 {
        println!("RESULT: no gaps in current and previous month archives.");
    } else {
        println!("RESULT: {total_missing} missing days across all geos.");
    }
    Ok(())
}
