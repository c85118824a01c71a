//! Diagnostics reported by the reader and the reachability engine.

use crate::diagnostic::{
    Diagnostic, DiagnosticKind, DiagnosticType, DiagnosticValue, Location, ValueType,
};
use crate::reference::{
    ClassReference, FieldReference, MethodReference, PartialFieldReference,
    PartialMethodReference, RecordFieldReference, TypelessMethodReference,
};

pub static UNRESOLVABLE_CLASS: DiagnosticType = DiagnosticType {
    id: "UNRESOLVABLE_CLASS",
    kind: DiagnosticKind::Error,
    parameters: &[ValueType::String],
    render: |values| format!("the class '{}' not found", values[0]),
};

pub static UNRESOLVABLE_FIELD: DiagnosticType = DiagnosticType {
    id: "UNRESOLVABLE_FIELD",
    kind: DiagnosticKind::Error,
    parameters: &[ValueType::String, ValueType::String, ValueType::OptionalString],
    render: |values| {
        format!(
            "the field '{}.{}{}' not found",
            values[0],
            values[1],
            descriptor_suffix(&values[2])
        )
    },
};

pub static UNRESOLVABLE_METHOD: DiagnosticType = DiagnosticType {
    id: "UNRESOLVABLE_METHOD",
    kind: DiagnosticKind::Error,
    parameters: &[ValueType::String, ValueType::String, ValueType::OptionalString],
    render: |values| {
        format!(
            "the method '{}.{}{}' not found",
            values[0],
            values[1],
            descriptor_suffix(&values[2])
        )
    },
};

pub static UNRESOLVABLE_REFLECTION_CLASS: DiagnosticType = DiagnosticType {
    id: "UNRESOLVABLE_REFLECTION_CLASS",
    kind: DiagnosticKind::Warning,
    parameters: &[],
    render: |_| "Unresolvable reflection call for class found.".to_string(),
};

pub static UNRESOLVABLE_REFLECTION_FIELD: DiagnosticType = DiagnosticType {
    id: "UNRESOLVABLE_REFLECTION_FIELD",
    kind: DiagnosticKind::Warning,
    parameters: &[],
    render: |_| "Unresolvable reflection call for field found.".to_string(),
};

pub static UNRESOLVABLE_REFLECTION_METHOD: DiagnosticType = DiagnosticType {
    id: "UNRESOLVABLE_REFLECTION_METHOD",
    kind: DiagnosticKind::Warning,
    parameters: &[],
    render: |_| "Unresolvable reflection call for method found.".to_string(),
};

pub static UNRESOLVABLE_INNER_CLASS: DiagnosticType = DiagnosticType {
    id: "UNRESOLVABLE_INNER_CLASS",
    kind: DiagnosticKind::Warning,
    parameters: &[ValueType::String, ValueType::String],
    render: |values| {
        format!(
            "the internal name of '{}.{}' not found.",
            values[0], values[1]
        )
    },
};

pub static UNSUPPORTED_ATTRIBUTE: DiagnosticType = DiagnosticType {
    id: "UNSUPPORTED_ATTRIBUTE",
    kind: DiagnosticKind::Warning,
    parameters: &[ValueType::String],
    render: |values| format!("the attribute '{}' is not supported and will be dropped", values[0]),
};

fn descriptor_suffix(value: &DiagnosticValue) -> String {
    match value {
        DiagnosticValue::Absent => String::new(),
        other => format!(":{other}"),
    }
}

pub fn unresolvable_class(class: &ClassReference, location: Location) -> Diagnostic {
    Diagnostic::new(
        &UNRESOLVABLE_CLASS,
        location,
        vec![class.name().into()],
    )
}

pub fn unresolvable_field(field: &FieldReference, location: Location) -> Diagnostic {
    member_diagnostic(
        &UNRESOLVABLE_FIELD,
        &field.owner,
        &field.name,
        Some(field.descriptor.to_string()),
        location,
    )
}

pub fn unresolvable_partial_field(field: &PartialFieldReference, location: Location) -> Diagnostic {
    member_diagnostic(&UNRESOLVABLE_FIELD, &field.owner, &field.name, None, location)
}

pub fn unresolvable_record_field(field: &RecordFieldReference, location: Location) -> Diagnostic {
    member_diagnostic(
        &UNRESOLVABLE_FIELD,
        &field.owner,
        &field.name,
        Some(field.descriptor.to_string()),
        location,
    )
}

pub fn unresolvable_method(method: &MethodReference, location: Location) -> Diagnostic {
    member_diagnostic(
        &UNRESOLVABLE_METHOD,
        &method.owner,
        &method.name,
        Some(method.descriptor.to_string()),
        location,
    )
}

pub fn unresolvable_partial_method(
    method: &PartialMethodReference,
    location: Location,
) -> Diagnostic {
    member_diagnostic(
        &UNRESOLVABLE_METHOD,
        &method.owner,
        &method.name,
        Some(method.descriptor.to_string()),
        location,
    )
}

pub fn unresolvable_typeless_method(
    method: &TypelessMethodReference,
    location: Location,
) -> Diagnostic {
    member_diagnostic(&UNRESOLVABLE_METHOD, &method.owner, &method.name, None, location)
}

fn member_diagnostic(
    diagnostic_type: &'static DiagnosticType,
    owner: &ClassReference,
    name: &str,
    descriptor: Option<String>,
    location: Location,
) -> Diagnostic {
    Diagnostic::new(
        diagnostic_type,
        location,
        vec![owner.name().into(), name.into(), descriptor.into()],
    )
}

pub fn unresolvable_reflection_class(location: Location) -> Diagnostic {
    Diagnostic::new(&UNRESOLVABLE_REFLECTION_CLASS, location, Vec::new())
}

pub fn unresolvable_reflection_field(location: Location) -> Diagnostic {
    Diagnostic::new(&UNRESOLVABLE_REFLECTION_FIELD, location, Vec::new())
}

pub fn unresolvable_reflection_method(location: Location) -> Diagnostic {
    Diagnostic::new(&UNRESOLVABLE_REFLECTION_METHOD, location, Vec::new())
}

pub fn unresolvable_inner_class(outer: &str, inner: &str, location: Location) -> Diagnostic {
    Diagnostic::new(
        &UNRESOLVABLE_INNER_CLASS,
        location,
        vec![outer.into(), inner.into()],
    )
}

pub fn unsupported_attribute(name: &str, location: Location) -> Diagnostic {
    Diagnostic::new(&UNSUPPORTED_ATTRIBUTE, location, vec![name.into()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticKind;
    use crate::types::MethodDescriptor;

    #[test]
    fn renders_member_messages_with_optional_descriptor() {
        let owner = ClassReference::new("a/A");
        let method = MethodReference::new(
            owner.clone(),
            "run",
            MethodDescriptor::parse("()V").expect("parse descriptor"),
        );
        let full = unresolvable_method(&method, Location::None);
        assert_eq!(full.message(), "the method 'a/A.run:()V' not found");
        assert_eq!(full.kind(), DiagnosticKind::Error);

        let typeless = unresolvable_typeless_method(
            &TypelessMethodReference::new(owner, "run"),
            Location::None,
        );
        assert_eq!(typeless.message(), "the method 'a/A.run' not found");
    }

    #[test]
    fn display_includes_id_and_location() {
        let diagnostic = unresolvable_class(
            &ClassReference::new("b/B"),
            Location::class(&ClassReference::new("a/A")),
        );
        assert_eq!(
            diagnostic.to_string(),
            "error[UNRESOLVABLE_CLASS]: the class 'b/B' not found at class a/A"
        );
    }
}
