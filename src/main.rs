//! SalesForge: sales analysis CLI
//!
//! Loads the transaction CSV, runs the selected reports, prints their tables
//! and renders their charts.

use anyhow::{Context, Result};
use clap::Parser;
use salesforge::viz::chart_path;
use salesforge::{load_table, render_chart, run_reports, AnalysisConfig, Args, Report};
use std::fs;
use std::time::Instant;

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = args.resolve_config()?;
    let kinds = args.selected_reports();

    // show whole top-N tables rather than polars' truncated preview
    if std::env::var_os("POLARS_FMT_MAX_ROWS").is_none() {
        std::env::set_var("POLARS_FMT_MAX_ROWS", "100");
    }

    let start_time = Instant::now();
    log::info!("Loading transactions from: {}", args.input.display());
    let table = load_table(&args.input)
        .with_context(|| format!("Failed to load {}", args.input.display()))?;
    log::info!(
        "Loaded {} transactions in {:.2}s",
        table.height(),
        start_time.elapsed().as_secs_f64()
    );

    let outcomes = run_reports(&kinds, &table, &config);
    let mut failed = 0;
    for (kind, outcome) in &outcomes {
        match outcome {
            Ok(report) => {
                println!("{report}");
                if config.charts {
                    if let Err(e) = save_charts(report, &config) {
                        log::error!("charts for {kind} failed: {e:#}");
                        failed += 1;
                    }
                }
            }
            Err(_) => failed += 1,
        }
    }

    log::info!(
        "Finished {} reports in {:.2}s",
        outcomes.len(),
        start_time.elapsed().as_secs_f64()
    );
    if failed > 0 {
        anyhow::bail!("{failed} of {} reports failed", outcomes.len());
    }
    Ok(())
}

fn save_charts(report: &Report, config: &AnalysisConfig) -> Result<()> {
    if report.charts.is_empty() {
        return Ok(());
    }
    fs::create_dir_all(&config.output_dir).with_context(|| {
        format!("Failed to create output directory {:?}", config.output_dir)
    })?;

    for chart in &report.charts {
        let path = chart_path(&config.output_dir, report.kind.name(), &chart.spec.file_stem);
        render_chart(chart, &path)
            .with_context(|| format!("Failed to render {}", path.display()))?;
        log::info!("Chart saved to: {}", path.display());
    }
    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
