use chrono::{Duration, NaiveDate};
use skillevo_core::types::now;
use skillevo_core::{EventAction, Paths, Result, Timestamp, UsageEvent};
use std::fs::OpenOptions;
use std::io::Write;
use tracing::warn;

/// Append-only, date-partitioned usage log. One JSONL file per day, keyed by
/// the event's own timestamp. This store exclusively owns the log; everything
/// else only reads.
pub struct EventStore {
    paths: Paths,
}

impl EventStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    /// Validate and append one event. A malformed event is rejected whole;
    /// nothing is partially written.
    pub fn append(&self, event: &UsageEvent) -> Result<()> {
        event.validate()?;

        let log_file = self.paths.event_file(&event.partition());
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)?;
        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }

    /// Read all events recorded under one date partition. Malformed lines
    /// are skipped with a warning rather than failing the whole read.
    pub fn read_date(&self, date: &str) -> Result<Vec<UsageEvent>> {
        let log_file = self.paths.event_file(date);
        if !log_file.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&log_file)?;
        let mut events = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<UsageEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(error = %e, date = %date, "Skipping malformed event line");
                }
            }
        }

        Ok(events)
    }

    /// Load every event whose timestamp falls within [from, to].
    pub fn load_window(&self, from: Timestamp, to: Timestamp) -> Result<Vec<UsageEvent>> {
        let mut events = Vec::new();
        let mut date = from.date_naive();
        let last = to.date_naive();

        while date <= last {
            let partition = date.format("%Y-%m-%d").to_string();
            for event in self.read_date(&partition)? {
                if event.timestamp >= from && event.timestamp <= to {
                    events.push(event);
                }
            }
            date = next_day(date);
        }

        Ok(events)
    }

    /// Convenience window ending now.
    pub fn load_recent(&self, days: i64) -> Result<Vec<UsageEvent>> {
        let to = now();
        let from = to - Duration::days(days);
        self.load_window(from, to)
    }

    /// Idempotence key check: has an event with this action already been
    /// recorded under the given date partition? Replaces sentinel marker
    /// files; the log itself is the source of truth.
    pub fn has_action_on(&self, date: &str, action: EventAction) -> Result<bool> {
        Ok(self.read_date(date)?.iter().any(|e| e.action == action))
    }
}

fn next_day(date: NaiveDate) -> NaiveDate {
    date.succ_opt().unwrap_or(date)
}
