use std::fmt;

use crate::reference::{ClassReference, FieldReference, MethodReference, RecordFieldReference};
use crate::types::{MethodDescriptor, TypeDescriptor};

/// Where a diagnostic was found.
///
/// Locations nest: a member location belongs to its class location and a
/// method-local location belongs to its method.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Location {
    None,
    Class {
        name: String,
    },
    Method {
        owner: String,
        name: String,
        descriptor: MethodDescriptor,
    },
    Field {
        owner: String,
        name: String,
        descriptor: TypeDescriptor,
    },
    RecordField {
        owner: String,
        name: String,
        descriptor: TypeDescriptor,
    },
    MethodLocal {
        owner: String,
        method: String,
        descriptor: MethodDescriptor,
        index: u16,
        name: String,
    },
}

impl Location {
    pub fn class(class: &ClassReference) -> Self {
        Location::Class {
            name: class.name().to_string(),
        }
    }

    pub fn method(method: &MethodReference) -> Self {
        Location::Method {
            owner: method.owner.name().to_string(),
            name: method.name.to_string(),
            descriptor: method.descriptor.clone(),
        }
    }

    pub fn field(field: &FieldReference) -> Self {
        Location::Field {
            owner: field.owner.name().to_string(),
            name: field.name.to_string(),
            descriptor: field.descriptor.clone(),
        }
    }

    pub fn record_field(field: &RecordFieldReference) -> Self {
        Location::RecordField {
            owner: field.owner.name().to_string(),
            name: field.name.to_string(),
            descriptor: field.descriptor.clone(),
        }
    }

    /// Internal name of the class this location is in.
    pub fn class_name(&self) -> Option<&str> {
        match self {
            Location::None => None,
            Location::Class { name } => Some(name),
            Location::Method { owner, .. }
            | Location::Field { owner, .. }
            | Location::RecordField { owner, .. }
            | Location::MethodLocal { owner, .. } => Some(owner),
        }
    }

    /// The enclosing location one level up.
    pub fn parent(&self) -> Location {
        match self {
            Location::None | Location::Class { .. } => Location::None,
            Location::Method { owner, .. }
            | Location::Field { owner, .. }
            | Location::RecordField { owner, .. } => Location::Class {
                name: owner.clone(),
            },
            Location::MethodLocal {
                owner,
                method,
                descriptor,
                ..
            } => Location::Method {
                owner: owner.clone(),
                name: method.clone(),
                descriptor: descriptor.clone(),
            },
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::None => Ok(()),
            Location::Class { name } => write!(f, "at class {name}"),
            Location::Method {
                owner,
                name,
                descriptor,
            } => write!(f, "at method {owner}.{name}:{descriptor}"),
            Location::Field {
                owner,
                name,
                descriptor,
            } => write!(f, "at field {owner}.{name}:{descriptor}"),
            Location::RecordField {
                owner,
                name,
                descriptor,
            } => write!(f, "at record field {owner}.{name}:{descriptor}"),
            Location::MethodLocal {
                owner,
                method,
                descriptor,
                index,
                name,
            } => write!(
                f,
                "at local variable {index}({name}) in method {owner}.{method}:{descriptor}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_walks_up_one_level() {
        let local = Location::MethodLocal {
            owner: "a/A".to_string(),
            method: "run".to_string(),
            descriptor: MethodDescriptor::parse("()V").expect("parse descriptor"),
            index: 1,
            name: "x".to_string(),
        };
        let method = local.parent();
        assert!(matches!(method, Location::Method { .. }));
        assert_eq!(
            method.parent(),
            Location::Class {
                name: "a/A".to_string()
            }
        );
        assert_eq!(method.parent().parent(), Location::None);
        assert_eq!(local.class_name(), Some("a/A"));
    }
}
