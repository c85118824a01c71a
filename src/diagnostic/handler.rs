use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::diagnostic::{Diagnostic, DiagnosticKind, SuppressionContainer};
use crate::{Error, Result};

/// Receives every diagnostic that survives suppression.
pub trait DiagnosticHandler: Send + Sync {
    fn handle(&self, diagnostic: &Diagnostic) -> Result<()>;
}

/// Fails on the first error-kind diagnostic; warnings are logged.
#[derive(Debug, Default)]
pub struct ThrowingDiagnosticHandler;

impl DiagnosticHandler for ThrowingDiagnosticHandler {
    fn handle(&self, diagnostic: &Diagnostic) -> Result<()> {
        match diagnostic.kind() {
            DiagnosticKind::Error => Err(Error::Diagnostic(diagnostic.to_string())),
            DiagnosticKind::Warning => {
                warn!(id = diagnostic.id(), "{diagnostic}");
                Ok(())
            }
        }
    }
}

/// Logs every diagnostic through `tracing`.
#[derive(Debug, Default)]
pub struct LoggingDiagnosticHandler;

impl DiagnosticHandler for LoggingDiagnosticHandler {
    fn handle(&self, diagnostic: &Diagnostic) -> Result<()> {
        match diagnostic.kind() {
            DiagnosticKind::Error => error!(id = diagnostic.id(), "{diagnostic}"),
            DiagnosticKind::Warning => warn!(id = diagnostic.id(), "{diagnostic}"),
        }
        Ok(())
    }
}

/// Keeps every diagnostic for later reporting.
#[derive(Debug, Default)]
pub struct CollectingDiagnosticHandler {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl CollectingDiagnosticHandler {
    pub fn new() -> Self {
        CollectingDiagnosticHandler::default()
    }

    /// Collected diagnostics, ordered by location and message so output is stable
    /// regardless of the order worker threads reported them in.
    pub fn take(&self) -> Vec<Diagnostic> {
        let mut diagnostics = std::mem::take(&mut *self.diagnostics.lock());
        diagnostics.sort_by_key(|diagnostic| (diagnostic.location.to_string(), diagnostic.to_string()));
        diagnostics
    }

    pub fn len(&self) -> usize {
        self.diagnostics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.lock().is_empty()
    }
}

impl DiagnosticHandler for CollectingDiagnosticHandler {
    fn handle(&self, diagnostic: &Diagnostic) -> Result<()> {
        self.diagnostics.lock().push(diagnostic.clone());
        Ok(())
    }
}

/// Applies suppression rules, counts what gets through, and forwards it.
pub struct InternalDiagnosticHandlerWrapper<'a> {
    handler: &'a dyn DiagnosticHandler,
    suppressions: &'a SuppressionContainer,
    errors: AtomicUsize,
    warnings: AtomicUsize,
    suppressed: AtomicUsize,
}

impl<'a> InternalDiagnosticHandlerWrapper<'a> {
    pub fn new(handler: &'a dyn DiagnosticHandler, suppressions: &'a SuppressionContainer) -> Self {
        InternalDiagnosticHandlerWrapper {
            handler,
            suppressions,
            errors: AtomicUsize::new(0),
            warnings: AtomicUsize::new(0),
            suppressed: AtomicUsize::new(0),
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::Acquire)
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.load(Ordering::Acquire)
    }

    pub fn suppressed_count(&self) -> usize {
        self.suppressed.load(Ordering::Acquire)
    }

    fn is_suppressed(&self, diagnostic: &Diagnostic) -> bool {
        self.suppressions
            .get_diagnostic_list(&diagnostic.location, diagnostic.id())
            .iter()
            .any(|rule| rule.matches(&diagnostic.parameters))
    }
}

impl DiagnosticHandler for InternalDiagnosticHandlerWrapper<'_> {
    fn handle(&self, diagnostic: &Diagnostic) -> Result<()> {
        if self.is_suppressed(diagnostic) {
            self.suppressed.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        }
        match diagnostic.kind() {
            DiagnosticKind::Error => self.errors.fetch_add(1, Ordering::AcqRel),
            DiagnosticKind::Warning => self.warnings.fetch_add(1, Ordering::AcqRel),
        };
        self.handler.handle(diagnostic)
    }
}
