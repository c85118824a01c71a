//! Typed, located diagnostics and their suppression.

pub mod basic;
mod handler;
mod location;
mod suppression;

use std::fmt;

pub use handler::{
    CollectingDiagnosticHandler, DiagnosticHandler, InternalDiagnosticHandlerWrapper,
    LoggingDiagnosticHandler, ThrowingDiagnosticHandler,
};
pub use location::Location;
pub use suppression::{
    SuppressingDiagnostic, SuppressingLocation, SuppressingValue, SuppressionContainer,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    Warning,
    Error,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::Warning => f.write_str("warning"),
            DiagnosticKind::Error => f.write_str("error"),
        }
    }
}

/// Declared type of one diagnostic parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    String,
    Int,
    OptionalString,
}

/// A parameter value carried by a [`Diagnostic`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DiagnosticValue {
    String(String),
    Int(i64),
    Absent,
}

impl DiagnosticValue {
    fn conforms_to(&self, value_type: ValueType) -> bool {
        matches!(
            (self, value_type),
            (DiagnosticValue::String(_), ValueType::String | ValueType::OptionalString)
                | (DiagnosticValue::Int(_), ValueType::Int)
                | (DiagnosticValue::Absent, ValueType::OptionalString)
        )
    }
}

impl fmt::Display for DiagnosticValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticValue::String(value) => f.write_str(value),
            DiagnosticValue::Int(value) => write!(f, "{value}"),
            DiagnosticValue::Absent => Ok(()),
        }
    }
}

impl From<&str> for DiagnosticValue {
    fn from(value: &str) -> Self {
        DiagnosticValue::String(value.to_string())
    }
}

impl From<String> for DiagnosticValue {
    fn from(value: String) -> Self {
        DiagnosticValue::String(value)
    }
}

impl From<Option<String>> for DiagnosticValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(DiagnosticValue::Absent, DiagnosticValue::String)
    }
}

/// A kind of diagnostic: stable id, severity, parameter shape and message renderer.
#[derive(Debug)]
pub struct DiagnosticType {
    pub id: &'static str,
    pub kind: DiagnosticKind,
    pub parameters: &'static [ValueType],
    pub render: fn(&[DiagnosticValue]) -> String,
}

/// One reported problem.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub diagnostic_type: &'static DiagnosticType,
    pub location: Location,
    pub parameters: Vec<DiagnosticValue>,
}

impl Diagnostic {
    pub fn new(
        diagnostic_type: &'static DiagnosticType,
        location: Location,
        parameters: Vec<DiagnosticValue>,
    ) -> Self {
        debug_assert_eq!(parameters.len(), diagnostic_type.parameters.len());
        debug_assert!(
            parameters
                .iter()
                .zip(diagnostic_type.parameters)
                .all(|(value, value_type)| value.conforms_to(*value_type))
        );
        Diagnostic {
            diagnostic_type,
            location,
            parameters,
        }
    }

    pub fn id(&self) -> &'static str {
        self.diagnostic_type.id
    }

    pub fn kind(&self) -> DiagnosticKind {
        self.diagnostic_type.kind
    }

    pub fn message(&self) -> String {
        (self.diagnostic_type.render)(&self.parameters)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.kind(), self.id(), self.message())?;
        if self.location != Location::None {
            write!(f, " {}", self.location)?;
        }
        Ok(())
    }
}
