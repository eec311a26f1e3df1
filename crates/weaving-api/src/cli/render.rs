//! Styled terminal output for runs and their logs.

use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use weaving_types::run::{LogStatus, RunLogEntry, RunRecord, RunStatus};

pub fn short_id(id: &str) -> &str {
    &id[..8.min(id.len())]
}

pub fn styled_status(status: RunStatus) -> String {
    match status {
        RunStatus::Running => style(status).yellow().to_string(),
        RunStatus::Completed => style(status).green().to_string(),
        RunStatus::Error => style(status).red().to_string(),
        RunStatus::Stopped => style(status).dim().to_string(),
    }
}

fn log_color(status: LogStatus) -> Color {
    match status {
        LogStatus::Running => Color::Yellow,
        LogStatus::Completed => Color::Green,
        LogStatus::Error => Color::Red,
        LogStatus::Stopped => Color::Grey,
    }
}

/// One line per entry, used while following a run.
pub fn log_line(entry: &RunLogEntry) -> String {
    let marker = match entry.status {
        LogStatus::Running => style(">").yellow(),
        LogStatus::Completed => style("*").green(),
        LogStatus::Error => style("x").red(),
        LogStatus::Stopped => style("-").dim(),
    };
    format!(
        "  {} {} {} {}",
        style(entry.timestamp.format("%H:%M:%S")).dim(),
        marker,
        style(format!("[{}]", entry.node_type)).cyan(),
        entry.message
    )
}

/// Log entries as a table, oldest first.
pub fn log_table(logs: &[RunLogEntry]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Time").fg(Color::Cyan),
            Cell::new("Node"),
            Cell::new("Type"),
            Cell::new("Status"),
            Cell::new("Message"),
        ]);

    for entry in logs.iter().rev() {
        let node = entry.node_name.as_deref().unwrap_or(&entry.node_id);
        let message: String = entry.message.chars().take(80).collect();
        table.add_row(vec![
            Cell::new(entry.timestamp.format("%H:%M:%S").to_string()),
            Cell::new(node),
            Cell::new(&entry.node_type),
            Cell::new(entry.status).fg(log_color(entry.status)),
            Cell::new(message),
        ]);
    }
    table
}

pub fn print_record(record: &RunRecord) {
    println!();
    println!(
        "  Run {} of '{}'",
        style(short_id(&record.instance_id.to_string())).cyan(),
        style(&record.workflow_id).bold()
    );
    println!("  Status:  {}", styled_status(record.status));
    println!("  Started: {}", record.start_time.format("%Y-%m-%d %H:%M:%S"));
    if let Some(end) = record.end_time {
        let elapsed = end - record.start_time;
        println!(
            "  Ended:   {} ({}.{:03}s)",
            end.format("%Y-%m-%d %H:%M:%S"),
            elapsed.num_seconds(),
            elapsed.num_milliseconds().rem_euclid(1000)
        );
    }
    if let Some(error) = &record.error {
        println!("  Error:   {}", style(error).red());
    }
    if let Some(result) = &record.result {
        println!("  Result:  {result}");
    }
    if !record.logs.is_empty() {
        println!();
        println!("{}", log_table(&record.logs));
    }
    println!();
}
