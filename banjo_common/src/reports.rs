//! Diagnostic report handling for the Banjo compiler
//!
//! Reports accumulate across a whole compilation run so that a single
//! invocation surfaces as many diagnostics as possible. A report carries a
//! primary span and may carry a secondary note span (e.g. the location of a
//! conflicting prior definition).

use crate::{BanjoError, Span};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity level for diagnostic reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// A secondary location attached to a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportNote {
    pub message: String,
    pub span: Span,
}

/// A diagnostic report with location and severity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
    pub note: Option<ReportNote>,
}

impl Report {
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            span,
            note: None,
        }
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            span,
            note: None,
        }
    }

    pub fn with_note(mut self, message: impl Into<String>, span: Span) -> Self {
        self.note = Some(ReportNote { message: message.into(), span });
        self
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} at {}", self.severity, self.message, self.span)?;

        if let Some(note) = &self.note {
            write!(f, "\n  note: {} at {}", note.message, note.span)?;
        }

        Ok(())
    }
}

/// Collection of diagnostic reports for a compilation run
#[derive(Debug, Clone, Default)]
pub struct Reports {
    pub reports: Vec<Report>,
}

impl Reports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, report: Report) {
        self.reports.push(report);
    }

    pub fn error(&mut self, message: impl Into<String>, span: Span) {
        self.add(Report::error(message, span));
    }

    pub fn warning(&mut self, message: impl Into<String>, span: Span) {
        self.add(Report::warning(message, span));
    }

    /// Whether the compilation may proceed to backend stages.
    pub fn is_valid(&self) -> bool {
        !self.has_errors()
    }

    pub fn has_errors(&self) -> bool {
        self.reports.iter().any(|r| r.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.reports.iter().filter(|r| r.severity == Severity::Error).count()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn clear(&mut self) {
        self.reports.clear();
    }

    pub fn extend(&mut self, other: Reports) {
        self.reports.extend(other.reports);
    }

    pub fn errors(&self) -> impl Iterator<Item = &Report> {
        self.reports.iter().filter(|r| r.severity == Severity::Error)
    }
}

impl From<BanjoError> for Report {
    fn from(error: BanjoError) -> Self {
        Report::error(error.to_string(), Span::synthetic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Position;

    fn span() -> Span {
        Span::single(Position::start(), 0)
    }

    #[test]
    fn test_error_invalidates() {
        let mut reports = Reports::new();
        assert!(reports.is_valid());
        reports.warning("unused variable", span());
        assert!(reports.is_valid());
        reports.error("type mismatch", span());
        assert!(!reports.is_valid());
        assert_eq!(reports.error_count(), 1);
    }

    #[test]
    fn test_note_rendering() {
        let report = Report::error("redefinition of 'x'", span())
            .with_note("previously defined here", span());
        let rendered = report.to_string();
        assert!(rendered.contains("redefinition"));
        assert!(rendered.contains("previously defined here"));
    }
}
