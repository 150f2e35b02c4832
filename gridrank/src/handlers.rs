use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use clap::ArgMatches;
use colored::Colorize;
use gridrank_core::config::{CONFIG_FILE_NAME, DATABASE_FILE_NAME};
use gridrank_core::report::{
    ReportFormat, generate_json_report, generate_text_report, save_report,
};
use gridrank_core::{
    CreateScanRequest, Database, EngineConfig, Envelope, Frequency, LogFilter, LogLevel,
    Orchestrator, RunSummary, Scan, ScanDetails, ScanService, ScanStatus, ScanUpdate, Scheduler,
    ShapeKind,
};
use gridrank_scanner::{GeoPoint, ProxyCandidate, ProxyStatus};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Resolved locations inside the data directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DataDir {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub db_path: PathBuf,
}

impl DataDir {
    pub fn resolve(path: &str) -> Self {
        let expanded = shellexpand::tilde(path);
        let root = PathBuf::from(expanded.as_ref());
        Self {
            config_path: root.join(CONFIG_FILE_NAME),
            db_path: root.join(DATABASE_FILE_NAME),
            root,
        }
    }
}

/// Open the database and build the service from `config.json`.
pub fn open_service(dir: &DataDir) -> Result<ScanService> {
    fs::create_dir_all(&dir.root)
        .with_context(|| format!("Failed to create data directory {}", dir.root.display()))?;
    let config = EngineConfig::load(&dir.config_path)
        .with_context(|| format!("Failed to load {}", dir.config_path.display()))?;
    let db = Database::new(&dir.db_path)
        .with_context(|| format!("Failed to open database {}", dir.db_path.display()))?;
    debug!("Opened database at {}", dir.db_path.display());
    let orchestrator = Orchestrator::from_config(Arc::new(db), config)?;
    Ok(ScanService::new(Arc::new(orchestrator)))
}

// Input loading

/// Load proxies from a JSON array of candidates or from `host:port[:user:pass]` lines.
pub fn load_proxies_from_file(path: &Path) -> Result<Vec<ProxyCandidate>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read proxy file {}: {}", path.display(), e))?;

    let proxies: Vec<ProxyCandidate> = if content.trim_start().starts_with('[') {
        serde_json::from_str(&content)
            .map_err(|e| format!("Invalid proxy JSON in {}: {}", path.display(), e))?
    } else {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty() && !line.trim().starts_with('#'))
            .filter_map(|(n, line)| {
                let parsed = ProxyCandidate::parse_line(format!("proxy-{}", n + 1), line);
                if parsed.is_none() {
                    eprintln!("⚠️  Skipping invalid proxy '{}'", line.trim());
                }
                parsed
            })
            .collect()
    };

    if proxies.is_empty() {
        return Err(format!("No valid proxies found in {}", path.display()));
    }

    Ok(proxies)
}

/// Parse `lat,lng` into a point, rejecting out-of-range coordinates.
pub fn parse_point_line(line: &str) -> Option<GeoPoint> {
    let (lat, lng) = line.trim().split_once(',')?;
    let point = GeoPoint::new(lat.trim().parse().ok()?, lng.trim().parse().ok()?);
    let in_range = point.is_finite() && point.lat.abs() <= 90.0 && point.lng.abs() <= 180.0;
    in_range.then_some(point)
}

/// Load custom sample points from a JSON array of `{"lat", "lng"}` or from `lat,lng` lines.
pub fn load_points_from_file(path: &Path) -> Result<Vec<GeoPoint>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read points file {}: {}", path.display(), e))?;

    let points: Vec<GeoPoint> = if content.trim_start().starts_with('[') {
        serde_json::from_str(&content)
            .map_err(|e| format!("Invalid points JSON in {}: {}", path.display(), e))?
    } else {
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let parsed = parse_point_line(line);
                if parsed.is_none() {
                    eprintln!("⚠️  Skipping invalid point '{}'", line.trim());
                }
                parsed
            })
            .collect()
    };

    if points.is_empty() {
        return Err(format!("No valid points found in {}", path.display()));
    }

    Ok(points)
}

fn string_value(args: &ArgMatches, id: &str) -> Option<serde_json::Value> {
    args.get_one::<String>(id)
        .map(|s| serde_json::Value::String(s.clone()))
}

pub fn build_create_request(args: &ArgMatches) -> Result<CreateScanRequest> {
    let custom_points = match args.get_one::<PathBuf>("points-file") {
        Some(path) => Some(load_points_from_file(path).map_err(|e| anyhow!(e))?),
        None => None,
    };

    Ok(CreateScanRequest {
        keyword: args
            .get_one::<String>("keyword")
            .cloned()
            .unwrap_or_default(),
        business_name: args.get_one::<String>("business").cloned(),
        radius: string_value(args, "radius"),
        grid_size: string_value(args, "grid-size"),
        shape: args.get_one::<String>("shape").cloned(),
        frequency: args.get_one::<String>("frequency").cloned(),
        custom_points,
        lat: string_value(args, "lat"),
        lng: string_value(args, "lng"),
    })
}

pub fn build_update(args: &ArgMatches) -> Result<ScanUpdate> {
    let custom_points = if args.get_flag("clear-points") {
        Some(None)
    } else {
        match args.get_one::<PathBuf>("points-file") {
            Some(path) => Some(Some(load_points_from_file(path).map_err(|e| anyhow!(e))?)),
            None => None,
        }
    };

    Ok(ScanUpdate {
        keyword: args.get_one::<String>("keyword").cloned(),
        business_name: args.get_one::<String>("business").cloned().map(Some),
        center_lat: args.get_one::<f64>("lat").copied(),
        center_lng: args.get_one::<f64>("lng").copied(),
        radius: args.get_one::<f64>("radius").copied(),
        grid_size: args.get_one::<i64>("grid-size").copied(),
        shape: args
            .get_one::<String>("shape")
            .map(|s| ShapeKind::parse_lenient(s)),
        custom_points,
        frequency: args
            .get_one::<String>("frequency")
            .map(|s| Frequency::parse_lenient(s)),
        status: None,
    })
}

// Output formatting

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> io::Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

fn colored_status(status: ScanStatus) -> String {
    let label = format!("{:<9}", status.as_str());
    match status {
        ScanStatus::Pending => label.blue().to_string(),
        ScanStatus::Running => label.cyan().bold().to_string(),
        ScanStatus::Completed => label.green().to_string(),
        ScanStatus::Failed => label.red().bold().to_string(),
        ScanStatus::Stopped => label.yellow().to_string(),
    }
}

/// One line per scan, newest first as listed.
pub fn format_scan_table(scans: &[Scan]) -> String {
    if scans.is_empty() {
        return "No scans yet. Create one with `gridrank create -k <KEYWORD>`.\n".to_string();
    }

    let mut table = String::new();
    table.push_str(&format!(
        "{:<36}  {:<9}  {:<8}  {:<9}  {}\n",
        "ID", "STATUS", "GRID", "FREQUENCY", "KEYWORD"
    ));
    for scan in scans {
        let grid = match scan.custom_points {
            Some(ref points) if !points.is_empty() => format!("{} pts", points.len()),
            _ if scan.shape == ShapeKind::Smart => "smart".to_string(),
            _ => format!("{}x{}", scan.grid_size, scan.grid_size),
        };
        table.push_str(&format!(
            "{:<36}  {}  {:<8}  {:<9}  {}\n",
            scan.id,
            colored_status(scan.status),
            grid,
            scan.frequency.as_str(),
            scan.keyword
        ));
    }
    table
}

pub fn format_proxy_report(statuses: &[ProxyStatus]) -> String {
    let reachable = statuses.iter().filter(|s| s.success).count();
    let mut report = String::new();
    for status in statuses {
        if status.success {
            report.push_str(&format!(
                "  {} {}:{} {}\n",
                "✓".green().bold(),
                status.host,
                status.port,
                format!("{}ms", status.latency_ms.unwrap_or_default()).cyan()
            ));
        } else {
            report.push_str(&format!(
                "  {} {}:{} {}\n",
                "✗".red().bold(),
                status.host,
                status.port,
                status.error.as_deref().unwrap_or("unreachable").red()
            ));
        }
    }
    report.push_str(&format!(
        "\n{} of {} proxies reachable\n",
        reachable,
        statuses.len()
    ));
    report
}

pub fn render_details(details: &ScanDetails, format: ReportFormat) -> Result<String> {
    Ok(match format {
        ReportFormat::Text => generate_text_report(details),
        ReportFormat::Json => generate_json_report(details)?,
    })
}

fn report_format(args: &ArgMatches) -> ReportFormat {
    args.get_one::<String>("format")
        .and_then(|f| ReportFormat::from_str(f))
        .unwrap_or(ReportFormat::Text)
}

/// Print `data` as an envelope in JSON mode, or through `render` otherwise.
fn emit<T: Serialize>(
    json: bool,
    result: gridrank_core::Result<T>,
    render: impl FnOnce(&T) -> String,
) -> Result<()> {
    if json {
        let envelope: Envelope<T> = result.into();
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        return match envelope.error {
            Some(e) => Err(anyhow!(e)),
            None => Ok(()),
        };
    }
    let data = result?;
    print!("{}", render(&data));
    Ok(())
}

fn spinner(quiet: bool, message: String) -> Result<ProgressBar> {
    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(message);
    Ok(spinner)
}

async fn await_run(
    run: JoinHandle<Option<RunSummary>>,
    quiet: bool,
    scan: &Scan,
) -> Result<Option<RunSummary>> {
    let spinner = spinner(
        quiet,
        format!("Probing \"{}\" around {:.4}, {:.4}", scan.keyword, scan.center_lat, scan.center_lng),
    )?;
    let summary = run.await.context("Scan run task failed")?;
    match summary {
        Some(ref summary) => spinner.finish_with_message(format!(
            "{} {} points probed, {} listed, {} failed",
            "✓".green().bold(),
            summary.probed,
            summary.found,
            summary.failed
        )),
        None => spinner.finish_with_message(format!(
            "{} Scan did not run (already running or not pending)",
            "⚠".yellow().bold()
        )),
    }
    Ok(summary)
}

// Handlers

pub fn handle_init(dir: &DataDir, force: bool) -> Result<()> {
    print_divider();
    println!("{}", "  GRIDRANK INITIALIZATION".bright_white().bold());
    print_divider();
    println!();
    println!(
        "{} Target: {}",
        "→".blue(),
        dir.root.display().to_string().bright_white()
    );
    println!();

    let config_exists = dir.config_path.exists();
    let db_exists = Database::exists(&dir.db_path);

    if (config_exists || db_exists) && !force {
        println!("{}", "⚠ WARNING".yellow().bold());
        println!("Existing gridrank files found:");
        if config_exists {
            println!(
                "  {} {}",
                "•".yellow(),
                dir.config_path.display().to_string().bright_white()
            );
        }
        if db_exists {
            println!(
                "  {} {}",
                "•".yellow(),
                dir.db_path.display().to_string().bright_white()
            );
        }
        println!();
        println!(
            "{}",
            "This operation will overwrite them, deleting every scan.".yellow()
        );

        let response = print_prompt("Do you want to continue? [y/N]:")?;
        println!();

        if response != "y" && response != "yes" {
            println!("{} Initialization cancelled.", "✗".red().bold());
            return Ok(());
        }
    }

    initialize_data_dir(dir)?;

    println!();
    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!();
    println!(
        "{} Config: {}",
        "✓".green().bold(),
        dir.config_path.display().to_string().bright_white()
    );
    println!(
        "{} Database: {}",
        "✓".green().bold(),
        dir.db_path.display().to_string().bright_white()
    );
    println!();
    Ok(())
}

/// Write a default config and an empty database, replacing whatever is there.
pub fn initialize_data_dir(dir: &DataDir) -> Result<()> {
    fs::create_dir_all(&dir.root)
        .with_context(|| format!("Failed to create {}", dir.root.display()))?;

    EngineConfig::default().save(&dir.config_path)?;
    println!("{} Default config written", "✓".green());

    if Database::exists(&dir.db_path) {
        Database::drop(&dir.db_path)
            .with_context(|| format!("Failed to remove {}", dir.db_path.display()))?;
        println!("{} Existing database removed", "✓".green());
    }
    Database::new(&dir.db_path)?;
    println!("{} Database initialized", "✓".green());
    Ok(())
}

pub async fn handle_create(
    service: &ScanService,
    args: &ArgMatches,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let request = build_create_request(args)?;

    if args.get_flag("no-run") {
        return emit(json, service.insert(&request), |scan| {
            format!("{} Created scan {}\n", "✓".green().bold(), scan.id.bright_white())
        });
    }

    let launched = match service.create(&request) {
        Ok(launched) => launched,
        Err(e) => return emit::<ScanDetails>(json, Err(e), |_| String::new()),
    };
    if !quiet && !json {
        println!(
            "{} Created scan {}",
            "✓".green().bold(),
            launched.scan.id.bright_white()
        );
    }
    await_run(launched.run, quiet || json, &launched.scan).await?;

    let format = report_format(args);
    emit(json, service.get(&launched.scan.id), |details| {
        render_details(details, format).unwrap_or_else(|e| format!("✗ {}\n", e))
    })
}

pub fn handle_show(service: &ScanService, args: &ArgMatches, json: bool) -> Result<()> {
    let scan_id = args
        .get_one::<String>("SCAN_ID")
        .ok_or_else(|| anyhow!("SCAN_ID is required"))?;
    let format = report_format(args);

    if let Some(path) = args.get_one::<PathBuf>("output") {
        let details = service.get(scan_id)?;
        let report = render_details(&details, format)?;
        save_report(&report, path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!(
            "{} Report saved to {}",
            "✓".green().bold(),
            path.display().to_string().bright_white()
        );
        return Ok(());
    }

    emit(json, service.get(scan_id), |details| {
        render_details(details, format).unwrap_or_else(|e| format!("✗ {}\n", e))
    })
}

pub fn handle_list(service: &ScanService, json: bool) -> Result<()> {
    emit(json, service.list(), |scans| format_scan_table(scans))
}

pub fn handle_update(service: &ScanService, args: &ArgMatches, json: bool) -> Result<()> {
    let scan_id = args
        .get_one::<String>("SCAN_ID")
        .ok_or_else(|| anyhow!("SCAN_ID is required"))?;
    let update = build_update(args)?;
    if update.is_empty() {
        bail!("Nothing to update; pass at least one field");
    }

    emit(json, service.update(scan_id, &update), |scan| {
        format!("{} Updated scan {}\n", "✓".green().bold(), scan.id.bright_white())
    })
}

pub fn handle_delete(service: &ScanService, args: &ArgMatches, json: bool) -> Result<()> {
    let scan_id = args
        .get_one::<String>("SCAN_ID")
        .ok_or_else(|| anyhow!("SCAN_ID is required"))?;
    emit(json, service.delete(scan_id), |_| {
        format!("{} Deleted scan {}\n", "✓".green().bold(), scan_id.bright_white())
    })
}

pub async fn handle_rerun(
    service: &ScanService,
    args: &ArgMatches,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let scan_id = args
        .get_one::<String>("SCAN_ID")
        .ok_or_else(|| anyhow!("SCAN_ID is required"))?;

    let launched = match service.rerun(scan_id) {
        Ok(launched) => launched,
        Err(e) => return emit::<ScanDetails>(json, Err(e), |_| String::new()),
    };
    if !quiet && !json {
        println!("{} Results cleared, running again", "✓".green().bold());
    }
    await_run(launched.run, quiet || json, &launched.scan).await?;

    let format = report_format(args);
    emit(json, service.get(scan_id), |details| {
        render_details(details, format).unwrap_or_else(|e| format!("✗ {}\n", e))
    })
}

pub fn handle_stop(service: &ScanService, args: &ArgMatches, json: bool) -> Result<()> {
    let scan_id = args
        .get_one::<String>("SCAN_ID")
        .ok_or_else(|| anyhow!("SCAN_ID is required"))?;
    emit(json, service.stop(scan_id), |scan| {
        format!(
            "{} Scan {} is {}\n",
            "✓".green().bold(),
            scan.id.bright_white(),
            scan.status.as_str()
        )
    })
}

/// Run every due scan once and wait for all of them.
pub async fn handle_run_due(service: &ScanService, json: bool, quiet: bool) -> Result<()> {
    let scheduler = Scheduler::new(service.orchestrator().clone());
    let handles = scheduler.tick(Utc::now())?;
    if handles.is_empty() {
        return emit(json, Ok(Vec::<RunSummary>::new()), |_| {
            "No scans are due.\n".to_string()
        });
    }

    let spinner = spinner(
        quiet || json,
        format!("Running {} due scan(s)", handles.len()),
    )?;
    let mut summaries = Vec::new();
    for handle in handles {
        if let Some(summary) = handle.await.context("Scan run task failed")? {
            summaries.push(summary);
        }
    }
    spinner.finish_and_clear();

    emit(json, Ok(summaries), |summaries| {
        summaries
            .iter()
            .map(|s| {
                format!(
                    "{} {}  {} listed of {}, {} alert(s)\n",
                    "✓".green().bold(),
                    s.scan_id.bright_white(),
                    s.found,
                    s.probed,
                    s.alerts
                )
            })
            .collect()
    })
}

pub async fn handle_serve(service: &ScanService, interval: Option<u64>) -> Result<()> {
    let mut scheduler = Scheduler::new(service.orchestrator().clone());
    if let Some(seconds) = interval {
        scheduler = scheduler.with_interval(Duration::from_secs(seconds.max(1)));
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    println!(
        "{} Scheduler running every {}s, press Ctrl-C to stop",
        "→".blue(),
        scheduler.interval().as_secs()
    );
    scheduler.run(shutdown).await;
    println!("{} Scheduler stopped", "✓".green().bold());
    Ok(())
}

pub fn handle_logs(service: &ScanService, args: &ArgMatches, json: bool) -> Result<()> {
    if args.get_flag("clear") {
        return emit(json, service.clear_logs(), |cleared| {
            format!("{} Cleared {} log entries\n", "✓".green().bold(), cleared)
        });
    }

    let filter = LogFilter {
        level: args
            .get_one::<String>("level")
            .and_then(|l| LogLevel::parse(l)),
        source: args.get_one::<String>("source").cloned(),
        limit: args.get_one::<usize>("limit").copied(),
    };

    emit(json, service.logs(&filter), |entries| {
        entries
            .iter()
            .map(|entry| {
                let level = format!("{:<5}", entry.level.as_str());
                let level = match entry.level {
                    LogLevel::Error => level.red().bold(),
                    LogLevel::Warn => level.yellow(),
                    LogLevel::Info => level.green(),
                    LogLevel::Debug => level.dimmed(),
                };
                format!(
                    "{} {} [{}] {}\n",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    level,
                    entry.source.cyan(),
                    entry.message
                )
            })
            .collect()
    })
}

pub async fn handle_proxies_validate(
    service: &ScanService,
    args: &ArgMatches,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let candidates = match args.get_one::<PathBuf>("file") {
        Some(path) => load_proxies_from_file(path).map_err(|e| anyhow!(e))?,
        None => service.orchestrator().config().proxies.clone(),
    };
    if candidates.is_empty() {
        bail!("No proxies to validate; pass --file or add proxies to {}", CONFIG_FILE_NAME);
    }
    let threads = args.get_one::<usize>("threads").copied().unwrap_or(10);

    let spinner = spinner(
        quiet || json,
        format!("Validating {} proxies with {} workers", candidates.len(), threads),
    )?;
    let statuses = service.validate_proxies(candidates, threads).await;
    spinner.finish_and_clear();

    emit(json, Ok(statuses), |statuses| format_proxy_report(statuses))
}
