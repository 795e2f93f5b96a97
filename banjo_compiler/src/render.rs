//! Diagnostic rendering

use banjo_common::{Report, Reports, Severity};

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

pub fn print_reports(reports: &Reports, colors: bool) {
    for report in &reports.reports {
        print_report(report, colors);
    }

    let errors = reports.error_count();
    if errors > 0 {
        eprintln!("{} error(s) generated", errors);
    }
}

fn print_report(report: &Report, colors: bool) {
    let severity = match (report.severity, colors) {
        (Severity::Error, true) => format!("{}{}error{}", BOLD, RED, RESET),
        (Severity::Warning, true) => format!("{}{}warning{}", BOLD, YELLOW, RESET),
        (Severity::Note, true) => format!("{}note{}", BOLD, RESET),
        (severity, false) => severity.to_string(),
    };

    eprintln!(
        "{}:{}: {}: {}",
        report.span.start.line, report.span.start.column, severity, report.message
    );

    if let Some(note) = &report.note {
        eprintln!(
            "{}:{}: note: {}",
            note.span.start.line, note.span.start.column, note.message
        );
    }
}
