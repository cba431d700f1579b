//! Terminal rendering for the public display board, the controller board
//! and the counter list. Pure functions of the cache plus a clock.

use std::fmt::Write as _;

use chrono::{DateTime, Local};
use colored::*;

use crate::models::{Counter, QueueEntry};
use crate::reconciler::{CounterView, Reconciler};

const RULE_WIDTH: usize = 60;

fn rule() -> ColoredString {
    "=".repeat(RULE_WIDTH).bright_blue()
}

fn priority_tag(entry: &QueueEntry) -> ColoredString {
    if entry.priority {
        " [PRIORITY]".bright_red().bold()
    } else {
        "".normal()
    }
}

/// `width` characters of `text` scrolled left by `offset`, wrapping around.
pub fn ticker_frame(text: &str, offset: usize, width: usize) -> String {
    if text.is_empty() || width == 0 {
        return String::new();
    }
    let looped: Vec<char> = text.chars().chain("   ".chars()).collect();
    (0..width).map(|i| looped[(offset + i) % looped.len()]).collect()
}

fn serving_line(view: &CounterView) -> String {
    let label = format!("{:<18}", view.display_name());
    match &view.current_serving {
        Some(slot) if !slot.is_next => format!(
            "{} {} {} {}{}",
            label.bright_white().bold(),
            "NOW SERVING".bright_green(),
            slot.entry.number.bright_cyan().bold(),
            slot.entry.name,
            priority_tag(&slot.entry)
        ),
        Some(slot) => format!(
            "{} {} {} {}{}",
            label.bright_white().bold(),
            "NEXT       ".bright_yellow(),
            slot.entry.number.bright_cyan(),
            slot.entry.name,
            priority_tag(&slot.entry)
        ),
        None => format!("{} {}", label.bright_white().bold(), "-".dimmed()),
    }
}

/// The public board: clock, per-counter tiles, waiting list, recently served, ticker.
pub fn render_display(reconciler: &Reconciler, now: DateTime<Local>, ticker: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", rule());
    let _ = writeln!(
        out,
        "{}  {}",
        "QUEUE BOARD".bright_cyan().bold(),
        now.format("%A %d %B %Y  %H:%M:%S").to_string().bright_white()
    );
    let _ = writeln!(out, "{}", rule());

    let active: Vec<&CounterView> = reconciler.views().filter(|v| v.meta.active).collect();
    if active.is_empty() {
        let _ = writeln!(out, "{}", "No counters open".dimmed());
    }
    for view in &active {
        let _ = writeln!(out, "{}", serving_line(view));
    }

    let _ = writeln!(out, "\n{}", "Waiting".bright_yellow().bold());
    let waiting = reconciler.all_waiting_customers();
    if waiting.is_empty() {
        let _ = writeln!(out, "  {}", "Nobody waiting".dimmed());
    }
    for row in &waiting {
        let counter = reconciler
            .view(&row.entry.counter_id)
            .map(CounterView::display_name)
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "  {:>3}. {:<8} {:<20} {}{}",
            row.position,
            row.entry.number,
            row.entry.name,
            counter.dimmed(),
            priority_tag(&row.entry)
        );
    }

    let _ = writeln!(out, "\n{}", "Recently served".bright_magenta().bold());
    for entry in reconciler.all_recently_served() {
        let counter = reconciler
            .view(&entry.counter_id)
            .map(CounterView::display_name)
            .unwrap_or_default();
        let _ = writeln!(out, "  {:<8} {:<20} {}", entry.number, entry.name, counter.dimmed());
    }

    let _ = writeln!(out, "{}", rule());
    if !ticker.is_empty() {
        let _ = writeln!(out, "{}", ticker.bright_white());
    }
    out
}

/// The operator's view of one counter.
pub fn render_controller(view: Option<&CounterView>, preview: &str) -> String {
    let mut out = String::new();
    let Some(view) = view else {
        let _ = writeln!(out, "{}", "Counter not loaded yet".dimmed());
        return out;
    };

    let _ = writeln!(out, "{}", rule());
    let state = if view.meta.active { "open".bright_green() } else { "closed".bright_red() };
    let _ = writeln!(out, "{} ({})", view.display_name().bright_cyan().bold(), state);
    let _ = writeln!(out, "{}", serving_line(view));

    let _ = writeln!(out, "\n{} ({})", "Waiting".bright_yellow().bold(), view.waiting_display().len());
    for (i, entry) in view.waiting_display().iter().enumerate() {
        let _ = writeln!(
            out,
            "  {:>3}. {:<8} {:<20} {}{}",
            i + 1,
            entry.number,
            entry.name,
            format!("id {}", entry.id).dimmed(),
            priority_tag(entry)
        );
    }

    let _ = writeln!(out, "\n{}", "Completed".bright_magenta().bold());
    for entry in view.recently_served.iter().take(10) {
        let _ = writeln!(out, "  {:<8} {:<20} {}", entry.number, entry.name, format!("id {}", entry.id).dimmed());
    }
    let _ = writeln!(out, "\nNext ticket: {}", preview.bright_white().bold());
    let _ = writeln!(out, "{}", rule());
    out
}

pub fn render_counters(counters: &[Counter]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}",
        format!("{:<6} {:<20} {:<6} {:<8} {:>7} {:>7}", "ID", "NAME", "PREFIX", "STATUS", "WAITING", "SERVING")
            .bright_yellow()
    );
    for c in counters {
        let status = if c.active { "active".green() } else { "inactive".red() };
        let _ = writeln!(
            out,
            "{:<6} {:<20} {:<6} {:<8} {:>7} {:>7}",
            c.id.as_str(),
            c.name,
            c.prefix,
            status,
            c.waiting_count,
            c.serving_count
        );
    }
    out
}
