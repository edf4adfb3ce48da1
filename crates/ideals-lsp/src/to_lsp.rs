use ideals_engine::{Finding, Severity, TextSnapshot};
use lsp_types::{Diagnostic, DiagnosticSeverity};

/// Value of `Diagnostic.source` for everything this server publishes.
pub(crate) const DIAGNOSTIC_SOURCE: &str = "ideals";

pub(crate) fn to_lsp_severity(severity: &Severity) -> DiagnosticSeverity {
    match severity {
        Severity::Error => DiagnosticSeverity::ERROR,
        Severity::Warning => DiagnosticSeverity::WARNING,
        Severity::Information => DiagnosticSeverity::INFORMATION,
        Severity::WeakWarning | Severity::Custom(_) => DiagnosticSeverity::HINT,
    }
}

/// `None` for findings without a message.
pub(crate) fn to_lsp_diagnostic(finding: &Finding, text: &TextSnapshot) -> Option<Diagnostic> {
    let message = finding.message.as_ref()?;
    Some(Diagnostic {
        range: text.range(finding.range).into(),
        severity: Some(to_lsp_severity(&finding.severity)),
        source: Some(DIAGNOSTIC_SOURCE.to_string()),
        message: message.clone(),
        ..Diagnostic::default()
    })
}
