//! Terminal output formatting for management responses

use std::io::Write;

use chrono::{Local, TimeZone};
use colored::Colorize;
use serde_json::Value;
use tabwriter::TabWriter;

pub fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

fn colorize_state(state: &str) -> String {
    match state {
        "running" => state.green().to_string(),
        "failed" => state.red().bold().to_string(),
        "unhealthy" | "restarting" | "reloading" => state.yellow().to_string(),
        "starting" => state.cyan().to_string(),
        _ => state.dimmed().to_string(),
    }
}

pub fn format_uptime(ms: u64) -> String {
    let seconds = ms / 1000;
    if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else if seconds < 86_400 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else {
        format!("{}d {}h", seconds / 86_400, (seconds % 86_400) / 3600)
    }
}

/// `ps` output: one row per worker.
pub fn print_workers(status: &Value) {
    let workers = status
        .get("workers")
        .and_then(|w| w.as_array())
        .cloned()
        .unwrap_or_default();

    let mut tw = TabWriter::new(std::io::stdout());
    let _ = writeln!(tw, "APPLICATION\tREPLICA\tSTATE\tPID\tUPTIME\tRESTARTS");
    for worker in &workers {
        let state = worker["state"].as_str().unwrap_or("?");
        let pid = worker["pid"]
            .as_u64()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let uptime = worker["uptime_ms"]
            .as_u64()
            .map(format_uptime)
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}\t{}",
            worker["application"].as_str().unwrap_or("?"),
            worker["replica"],
            colorize_state(state),
            pid,
            uptime,
            worker["restarts"]
        );
    }
    let _ = tw.flush();
}

/// `applications` output: the resolved graph in start order.
pub fn print_applications(applications: &Value) {
    let rows = applications.as_array().cloned().unwrap_or_default();
    let mut tw = TabWriter::new(std::io::stdout());
    let _ = writeln!(tw, "ID\tWORKERS\tDEPENDENCIES\tENTRYPOINT\tWATCH\tADDRESS");
    for app in &rows {
        let dependencies = app["dependencies"]
            .as_array()
            .map(|deps| {
                deps.iter()
                    .filter_map(|d| d.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}\t{}",
            app["id"].as_str().unwrap_or("?"),
            app["workers"],
            dependencies,
            if app["entrypoint"].as_bool().unwrap_or(false) { "yes" } else { "" },
            if app["watch"].as_bool().unwrap_or(false) { "yes" } else { "" },
            app["address"].as_str().unwrap_or("-"),
        );
    }
    let _ = tw.flush();
}

/// One streamed log record.
pub fn print_log_record(record: &Value) {
    let timestamp = record["timestamp_ms"]
        .as_i64()
        .and_then(|ms| Local.timestamp_millis_opt(ms).single())
        .map(|t| t.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    let level = record["level"].as_str().unwrap_or("info");
    let colored_level = match level {
        "error" | "fatal" => level.red().bold().to_string(),
        "warn" => level.yellow().to_string(),
        "debug" | "trace" => level.dimmed().to_string(),
        _ => level.normal().to_string(),
    };
    println!(
        "{} {} [{}:{}] {}",
        timestamp.dimmed(),
        colored_level,
        record["application"].as_str().unwrap_or("?"),
        record["replica"],
        record["message"].as_str().unwrap_or("")
    );
}

/// `metrics` output: latest sample per replica.
pub fn print_metrics(metrics: &Value) {
    let rows = metrics.as_array().cloned().unwrap_or_default();
    let mut tw = TabWriter::new(std::io::stdout());
    let _ = writeln!(tw, "REPLICA\tELU\tHEAP USED\tHEAP TOTAL\tUNHEALTHY CHECKS");
    for row in &rows {
        let _ = writeln!(
            tw,
            "{}\t{:.2}\t{}\t{}\t{}",
            row["replica"],
            row["elu"].as_f64().unwrap_or(0.0),
            format_bytes(row["heap_used"].as_u64().unwrap_or(0)),
            format_bytes(row["heap_total"].as_u64().unwrap_or(0)),
            row["unhealthy_checks"]
        );
    }
    let _ = tw.flush();
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
