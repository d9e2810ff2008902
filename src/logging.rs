use serde::{Deserialize, Serialize};

/// Severity of a report entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }

    fn log_level(self) -> log::Level {
        match self {
            Severity::Error => log::Level::Error,
            Severity::Warning => log::Level::Warn,
            Severity::Info => log::Level::Info,
        }
    }
}

/// A single user-facing report produced during import or export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

/// Report sink handed to every conversion entry point.
///
/// Entries are kept for the caller and mirrored to the `log` facade, so a
/// host that only installs a logger still sees them.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReportList {
    entries: Vec<Report>,
}

impl ReportList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, severity: Severity, code: &str, message: impl Into<String>) {
        let message = message.into();
        log::log!(target: "skelbridge", severity.log_level(), "[{code}] {message}");
        self.entries.push(Report {
            severity,
            code: code.to_string(),
            message,
        });
    }

    pub fn warning(&mut self, code: &str, message: impl Into<String>) {
        self.report(Severity::Warning, code, message);
    }

    pub fn info(&mut self, code: &str, message: impl Into<String>) {
        self.report(Severity::Info, code, message);
    }

    pub fn entries(&self) -> &[Report] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.entries.iter().any(|entry| entry.code == code)
    }

    pub fn warning_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.severity == Severity::Warning)
            .count()
    }
}

/// Diagnostic-only logging that never reaches the report sink.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        ::log::debug!(target: "skelbridge", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        ::log::info!(target: "skelbridge", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        ::log::warn!(target: "skelbridge", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        ::log::error!(target: "skelbridge", $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_reports_when_counting_then_only_warnings_are_counted() {
        let mut reports = ReportList::new();
        reports.warning("A", "first");
        reports.info("B", "second");
        reports.report(Severity::Error, "C", "third");

        assert_eq!(reports.warning_count(), 1);
        assert!(reports.has_code("B"));
        assert!(!reports.has_code("D"));
        assert_eq!(reports.entries().len(), 3);
    }
}
