//! Ravel CLI - runs JSON/YAML API test scripts.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use ravel::config::parse_binding;
use ravel::{ApiCall, Runtime, RuntimeConfig};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Ravel - declarative API test script runner.
#[derive(Parser, Debug)]
#[command(name = "ravel", version, about)]
struct Cli {
    /// Script sources: file paths or http(s) URLs, run in order.
    #[arg(required = true)]
    sources: Vec<String>,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Default language for `if` conditions and expression assertions.
    #[arg(long = "script-language", env = "RAVEL_SCRIPT_LANGUAGE")]
    script_language: Option<String>,

    /// Timeout in seconds per request.
    #[arg(short = 't', long = "timeout", env = "RAVEL_TIMEOUT")]
    timeout: Option<u64>,

    /// Bind a variable before running (NAME=VALUE, VALUE parsed as JSON
    /// when possible). May be repeated.
    #[arg(short = 'D', long = "define", value_name = "NAME=VALUE")]
    bindings: Vec<String>,

    /// Directory to save the run report to.
    #[arg(short = 'r', long = "report-dir")]
    report_dir: Option<String>,

    /// Report output format.
    #[arg(long = "report-format", default_value = "json")]
    report_format: ReportFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
enum ReportFormat {
    Json,
    Yaml,
    Text,
}

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    sources: &'a [String],
    failures: usize,
    failed_assertion_count: u64,
    cancelled: bool,
    duration_ms: u64,
    timestamp: String,
    calls: &'a [ApiCall],
}

fn init_tracing(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_none() {
        let level = if verbose { "debug" } else { "info" };
        std::env::set_var("RUST_LOG", level);
    }

    if tracing::dispatcher::has_been_set() {
        return;
    }

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

fn build_config(args: &Cli) -> Result<RuntimeConfig> {
    let mut config = RuntimeConfig::default();
    if let Some(language) = &args.script_language {
        config.script_language = language.clone();
    }
    if let Some(timeout) = args.timeout {
        config.timeout = timeout;
    }
    for binding in &args.bindings {
        let (name, value) = parse_binding(binding)?;
        debug!("Binding {} from command line", name);
        config = config.with_binding(name, value);
    }
    Ok(config)
}

fn print_call(call: &ApiCall) {
    let status = if call.passed() {
        "\x1b[32mPASS\x1b[0m"
    } else {
        "\x1b[31mFAIL\x1b[0m"
    };
    let target = call
        .request()
        .map(|r| format!("{} {}", r.method.as_str(), r.url))
        .unwrap_or_else(|| "(no request)".to_string());
    info!(
        "{} {} {} ({} ms)",
        status,
        call.script().label(),
        target,
        call.duration_ms()
    );
    for failure in call.failed_assertions() {
        error!(
            "     \x1b[31m{}: {}\x1b[0m",
            failure.assertion, failure.message
        );
    }
}

fn save_report(report: &RunReport<'_>, report_dir: &Path, format: ReportFormat) -> Result<PathBuf> {
    if !report_dir.exists() {
        fs::create_dir_all(report_dir)?;
    }

    let timestamp = Utc::now().timestamp();
    let (filename, content) = match format {
        ReportFormat::Json => (
            format!("ravel-{timestamp}.json"),
            serde_json::to_string_pretty(report)?,
        ),
        ReportFormat::Yaml => (
            format!("ravel-{timestamp}.yaml"),
            serde_yaml::to_string(report)?,
        ),
        ReportFormat::Text => {
            let mut content = String::new();
            content.push_str(&format!("Sources: {}\n", report.sources.join(", ")));
            content.push_str(&format!(
                "Status: {}\n",
                if report.failures == 0 { "PASS" } else { "FAIL" }
            ));
            if report.cancelled {
                content.push_str("Cancelled: yes\n");
            }
            content.push_str(&format!("Duration: {} ms\n\n", report.duration_ms));
            content.push_str("Calls:\n");
            for (i, call) in report.calls.iter().enumerate() {
                content.push_str(&format!(
                    "  {}. {} ({})\n",
                    i + 1,
                    call.script().label(),
                    if call.passed() { "PASS" } else { "FAIL" }
                ));
                for failure in call.failed_assertions() {
                    content.push_str(&format!(
                        "     {}: {}\n",
                        failure.assertion, failure.message
                    ));
                }
            }
            (format!("ravel-{timestamp}.txt"), content)
        }
    };

    let file_path = report_dir.join(filename);
    let mut file = File::create(&file_path)
        .context(format!("Failed to create report file {}", file_path.display()))?;
    file.write_all(content.as_bytes())?;

    Ok(file_path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.verbose);

    let config = build_config(&args)?;
    let mut runtime = Runtime::new(config)?;

    let start = Instant::now();
    info!("Running {} source(s)...", args.sources.len());

    let cancel = runtime.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current script");
            cancel.cancel();
        }
    });

    let failed = match runtime.execute_sources(args.sources.as_slice()).await {
        Ok(()) => false,
        Err(e) => {
            error!("\x1b[31mRun aborted: {}\x1b[0m", e);
            true
        }
    };

    for call in runtime.api_calls() {
        print_call(call);
    }

    let failures = runtime.report();
    let report = RunReport {
        sources: &args.sources,
        failures,
        failed_assertion_count: runtime.failed_assertion_count(),
        cancelled: runtime.is_cancelled(),
        duration_ms: start.elapsed().as_millis() as u64,
        timestamp: Utc::now().to_rfc3339(),
        calls: runtime.api_calls(),
    };
    info!(
        "Summary:\n  Calls: {}\n  \x1b[31mFailures: {}\x1b[0m\n  Duration: {} ms",
        report.calls.len(),
        report.failures,
        report.duration_ms
    );

    if let Some(dir) = &args.report_dir {
        match save_report(&report, Path::new(dir), args.report_format) {
            Ok(path) => info!("Report saved: {}", path.display()),
            Err(e) => error!("Failed to save report: {}", e),
        }
    }

    let code = if failed { failures.max(1) } else { failures };
    exit(code.min(255) as i32);
}
