//! Terminal output: status lines, key/value detail, tables, and JSON.

use colored::{Color, Colorize};
use serde::Serialize;
use stakeops_types::{KeyOpsError, KeyOpsResult, KeyStatus, StoreLifecycle};
use tabled::{settings::Style, Table, Tabled};

pub struct OutputFormatter {
    colored: bool,
    pub json_mode: bool,
}

impl OutputFormatter {
    pub fn new(colored: bool, json_mode: bool) -> Self {
        Self { colored, json_mode }
    }

    fn mark(&self, symbol: &str, color: Color) -> String {
        if self.colored {
            symbol.color(color).bold().to_string()
        } else {
            symbol.to_string()
        }
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", self.mark("✓", Color::Green), message);
    }

    /// Errors go to stderr so JSON output stays parseable.
    pub fn error(&self, message: &str) {
        eprintln!("{} {}", self.mark("✗", Color::Red), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", self.mark("!", Color::Yellow), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", self.mark("·", Color::Blue), message);
    }

    pub fn header(&self, title: &str) {
        if self.colored {
            println!("\n{}", title.bold());
        } else {
            println!("\n{}", title);
        }
    }

    /// Indented `label: value` line with the labels padded into a column.
    pub fn kv(&self, key: &str, value: &str) {
        let label = format!("{:<20}", format!("{}:", key));
        if self.colored {
            println!("  {} {}", label.bold(), value);
        } else {
            println!("  {} {}", label, value);
        }
    }

    pub fn json<T: Serialize>(&self, data: &T) -> KeyOpsResult<()> {
        let rendered = serde_json::to_string_pretty(data)
            .map_err(|e| KeyOpsError::Serialization(e.to_string()))?;
        println!("{}", rendered);
        Ok(())
    }

    pub fn table<T: Tabled>(&self, rows: Vec<T>) {
        if rows.is_empty() {
            self.info("Nothing to show");
            return;
        }
        let mut table = Table::new(rows);
        table.with(Style::sharp());
        println!("\n{}", table);
    }

    pub fn output<T: Serialize + Tabled>(&self, rows: Vec<T>) -> KeyOpsResult<()> {
        if self.json_mode {
            self.json(&rows)
        } else {
            self.table(rows);
            Ok(())
        }
    }

    pub fn format_status(&self, status: KeyStatus) -> String {
        let text = status.to_string();
        if !self.colored {
            return text;
        }
        let color = match status {
            KeyStatus::Unused => Color::Yellow,
            KeyStatus::Active => Color::Green,
            KeyStatus::Retired => Color::Red,
        };
        text.color(color).to_string()
    }

    pub fn format_lifecycle(&self, lifecycle: StoreLifecycle) -> String {
        let text = lifecycle.to_string();
        if !self.colored {
            return text;
        }
        let color = match lifecycle {
            StoreLifecycle::Present => Color::Green,
            StoreLifecycle::SoftDeleted => Color::Yellow,
            StoreLifecycle::Destroyed => Color::Red,
        };
        text.color(color).to_string()
    }

    pub fn format_bool(&self, value: bool) -> String {
        if !self.colored {
            return value.to_string();
        }
        if value {
            "true".green().to_string()
        } else {
            "false".red().to_string()
        }
    }

    /// Operator-facing short form of a public key.
    pub fn short_key(&self, public_key: &str) -> String {
        if public_key.len() > 16 {
            format!("0x{}...", &public_key[..16])
        } else {
            format!("0x{}", public_key)
        }
    }

    /// Absolute timestamp with a coarse age suffix.
    pub fn format_timestamp(&self, timestamp: &chrono::DateTime<chrono::Utc>) -> String {
        let age = chrono::Utc::now().signed_duration_since(*timestamp);
        let relative = if age.num_days() >= 1 {
            format!("{}d ago", age.num_days())
        } else if age.num_hours() >= 1 {
            format!("{}h ago", age.num_hours())
        } else if age.num_minutes() >= 1 {
            format!("{}m ago", age.num_minutes())
        } else {
            "just now".to_string()
        };
        format!("{} ({})", timestamp.format("%Y-%m-%d %H:%M UTC"), relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_key() {
        let formatter = OutputFormatter::new(false, false);
        let key = "ab".repeat(48);
        assert_eq!(formatter.short_key(&key), format!("0x{}...", &key[..16]));
        assert_eq!(formatter.short_key("abcd"), "0xabcd");
    }

    #[test]
    fn test_plain_status_formatting() {
        let formatter = OutputFormatter::new(false, false);
        assert_eq!(formatter.format_status(KeyStatus::Active), "active");
        assert_eq!(
            formatter.format_lifecycle(StoreLifecycle::SoftDeleted),
            "soft_deleted"
        );
        assert_eq!(formatter.format_bool(true), "true");
    }

    #[test]
    fn test_timestamp_includes_age() {
        let formatter = OutputFormatter::new(false, false);
        let ts = chrono::Utc::now() - chrono::Duration::hours(3);
        let rendered = formatter.format_timestamp(&ts);
        assert!(rendered.contains("3h ago"), "got: {}", rendered);
    }
}
