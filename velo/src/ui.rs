//! User-facing status lines for the cached task flow.
//!
//! One header per task, one hit/miss line per outcome. Diagnostics that
//! only matter for debugging go through `tracing` instead.

use std::time::Duration;

use console::style;

fn prefix() -> String {
    style("[velo]").cyan().bold().to_string()
}

pub fn task_header(node_id: &str) {
    println!("{} {}", prefix(), style(format!("Task {node_id}")).white());
}

pub fn cache_hit(scope: &str, elapsed: Duration, saved: Option<Duration>) {
    let saved_suffix = match saved {
        Some(saved) if !saved.is_zero() => style(format!(" (saved {})", human_duration(saved)))
            .dim()
            .to_string(),
        _ => String::new(),
    };
    println!(
        "{} {} in {}{}",
        prefix(),
        style(format!("CACHE HIT ({scope})")).green().bold(),
        human_duration(elapsed),
        saved_suffix,
    );
}

pub fn cache_miss_executing(command: &str) {
    println!(
        "{} {} Executing {command:?}...",
        prefix(),
        style("CACHE MISS.").yellow().bold(),
    );
}

pub fn cache_stored(key: &str, elapsed: Duration, saved: Option<Duration>) {
    let savings = match saved {
        Some(saved) if !saved.is_zero() => {
            style(format!(" (future savings ~{})", human_duration(saved)))
                .dim()
                .to_string()
        }
        _ => String::new(),
    };
    println!(
        "{} {} Stored cache {key:?} in {}.{}",
        prefix(),
        style("CACHE MISS.").yellow().bold(),
        human_duration(elapsed),
        savings,
    );
}

pub fn command_failed(command: &str, exit_code: i32) {
    eprintln!(
        "{} {} while executing {command:?} (exit code {exit_code})",
        prefix(),
        style("COMMAND FAILED.").red().bold(),
    );
}

pub fn warn(message: &str) {
    eprintln!("{} {} {message}", prefix(), style("WARN").magenta().bold());
}

pub fn info(message: &str) {
    println!("{} {message}", prefix());
}

/// Compact duration formatting for status lines.
pub fn human_duration(d: Duration) -> String {
    if d < Duration::from_millis(1) {
        return "0s".to_string();
    }
    if d < Duration::from_secs(1) {
        return format!("{}ms", d.as_millis());
    }
    if d < Duration::from_secs(60) {
        return format!("{:.1}s", d.as_secs_f64());
    }
    let total_secs = d.as_secs();
    let minutes = total_secs / 60;
    let seconds = total_secs % 60;
    if minutes >= 60 {
        return format!("{}h {}m", minutes / 60, minutes % 60);
    }
    if seconds == 0 {
        return format!("{minutes}m");
    }
    format!("{minutes}m {seconds}s")
}
