//! Structural references to classes and members.
//!
//! References compare by value only. Where a reference was first discovered is
//! tracked by the reachability context, never by the reference itself.

use std::fmt;
use std::sync::Arc;

use crate::types::{MethodDescriptor, PartialMethodDescriptor, TypeDescriptor, TypeKind};

/// A class by internal name, or an array class by its descriptor (`[Ljava/lang/String;`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassReference {
    name: Arc<str>,
}

impl ClassReference {
    /// Build from an internal or binary name; dots become slashes.
    pub fn new(name: &str) -> Self {
        if name.contains('.') {
            ClassReference {
                name: Arc::from(name.replace('.', "/")),
            }
        } else {
            ClassReference {
                name: Arc::from(name),
            }
        }
    }

    /// The class a non-primitive type names; `None` for primitives.
    pub fn from_type(descriptor: &TypeDescriptor) -> Option<Self> {
        match descriptor.kind() {
            TypeKind::Primitive(_) => None,
            TypeKind::Array => Some(ClassReference::new(descriptor.as_str())),
            TypeKind::Class => descriptor.class_name().map(ClassReference::new),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_array(&self) -> bool {
        self.name.starts_with('[')
    }

    /// Field descriptor naming this class.
    pub fn descriptor(&self) -> TypeDescriptor {
        if self.is_array() {
            // array names are descriptors already
            TypeDescriptor::parse(&self.name).unwrap_or_else(|_| TypeDescriptor::object(&self.name))
        } else {
            TypeDescriptor::object(&self.name)
        }
    }

    /// Innermost element class of an array, or `None` for primitive arrays and plain classes.
    pub fn array_element(&self) -> Option<ClassReference> {
        if !self.is_array() {
            return None;
        }
        ClassReference::from_type(&self.descriptor().element_type())
    }

    /// Package part of the internal name, empty for the default package.
    pub fn package(&self) -> &str {
        match self.name.rfind('/') {
            Some(index) => &self.name[..index],
            None => "",
        }
    }
}

impl fmt::Display for ClassReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A method identified by owner, name and full descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodReference {
    pub owner: ClassReference,
    pub name: Arc<str>,
    pub descriptor: MethodDescriptor,
}

impl MethodReference {
    pub fn new(owner: ClassReference, name: &str, descriptor: MethodDescriptor) -> Self {
        MethodReference {
            owner,
            name: Arc::from(name),
            descriptor,
        }
    }

    pub fn is_constructor(&self) -> bool {
        &*self.name == "<init>"
    }

    pub fn is_static_initializer(&self) -> bool {
        &*self.name == "<clinit>"
    }
}

impl fmt::Display for MethodReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.owner, self.name, self.descriptor)
    }
}

/// A field identified by owner, name and type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldReference {
    pub owner: ClassReference,
    pub name: Arc<str>,
    pub descriptor: TypeDescriptor,
}

impl FieldReference {
    pub fn new(owner: ClassReference, name: &str, descriptor: TypeDescriptor) -> Self {
        FieldReference {
            owner,
            name: Arc::from(name),
            descriptor,
        }
    }
}

impl fmt::Display for FieldReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.owner, self.name, self.descriptor)
    }
}

/// A component of a record class.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordFieldReference {
    pub owner: ClassReference,
    pub name: Arc<str>,
    pub descriptor: TypeDescriptor,
}

impl RecordFieldReference {
    pub fn new(owner: ClassReference, name: &str, descriptor: TypeDescriptor) -> Self {
        RecordFieldReference {
            owner,
            name: Arc::from(name),
            descriptor,
        }
    }
}

impl fmt::Display for RecordFieldReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record {}.{}:{}", self.owner, self.name, self.descriptor)
    }
}

/// A method known by its argument types only, as produced by `getMethod(name, types...)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartialMethodReference {
    pub owner: ClassReference,
    pub name: Arc<str>,
    pub descriptor: PartialMethodDescriptor,
}

impl PartialMethodReference {
    pub fn new(owner: ClassReference, name: &str, descriptor: PartialMethodDescriptor) -> Self {
        PartialMethodReference {
            owner,
            name: Arc::from(name),
            descriptor,
        }
    }

    pub fn matches(&self, method: &MethodReference) -> bool {
        self.name == method.name && self.descriptor.matches(&method.descriptor)
    }
}

impl fmt::Display for PartialMethodReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.owner, self.name, self.descriptor)
    }
}

/// A method known by name only; matches every overload.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypelessMethodReference {
    pub owner: ClassReference,
    pub name: Arc<str>,
}

impl TypelessMethodReference {
    pub fn new(owner: ClassReference, name: &str) -> Self {
        TypelessMethodReference {
            owner,
            name: Arc::from(name),
        }
    }
}

impl fmt::Display for TypelessMethodReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

/// A field known by name only, as produced by `getField(name)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartialFieldReference {
    pub owner: ClassReference,
    pub name: Arc<str>,
}

impl PartialFieldReference {
    pub fn new(owner: ClassReference, name: &str) -> Self {
        PartialFieldReference {
            owner,
            name: Arc::from(name),
        }
    }
}

impl fmt::Display for PartialFieldReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

/// Anything the reachability engine can mark.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reference {
    Class(ClassReference),
    Method(MethodReference),
    Field(FieldReference),
    RecordField(RecordFieldReference),
    PartialMethod(PartialMethodReference),
    TypelessMethod(TypelessMethodReference),
    PartialField(PartialFieldReference),
}

impl Reference {
    /// Class that must be resolved before this reference can be.
    pub fn owner(&self) -> &ClassReference {
        match self {
            Reference::Class(class) => class,
            Reference::Method(method) => &method.owner,
            Reference::Field(field) => &field.owner,
            Reference::RecordField(field) => &field.owner,
            Reference::PartialMethod(method) => &method.owner,
            Reference::TypelessMethod(method) => &method.owner,
            Reference::PartialField(field) => &field.owner,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Class(class) => write!(f, "class {class}"),
            Reference::Method(method) => write!(f, "method {method}"),
            Reference::Field(field) => write!(f, "field {field}"),
            Reference::RecordField(field) => write!(f, "{field}"),
            Reference::PartialMethod(method) => write!(f, "method {method}"),
            Reference::TypelessMethod(method) => write!(f, "method {method}"),
            Reference::PartialField(field) => write!(f, "field {field}"),
        }
    }
}

impl From<ClassReference> for Reference {
    fn from(value: ClassReference) -> Self {
        Reference::Class(value)
    }
}

impl From<MethodReference> for Reference {
    fn from(value: MethodReference) -> Self {
        Reference::Method(value)
    }
}

impl From<FieldReference> for Reference {
    fn from(value: FieldReference) -> Self {
        Reference::Field(value)
    }
}

impl From<RecordFieldReference> for Reference {
    fn from(value: RecordFieldReference) -> Self {
        Reference::RecordField(value)
    }
}

impl From<PartialMethodReference> for Reference {
    fn from(value: PartialMethodReference) -> Self {
        Reference::PartialMethod(value)
    }
}

impl From<TypelessMethodReference> for Reference {
    fn from(value: TypelessMethodReference) -> Self {
        Reference::TypelessMethod(value)
    }
}

impl From<PartialFieldReference> for Reference {
    fn from(value: PartialFieldReference) -> Self {
        Reference::PartialField(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn class_reference_normalizes_dots() {
        assert_eq!(
            ClassReference::new("com.acme.Foo"),
            ClassReference::new("com/acme/Foo")
        );
        assert_eq!(ClassReference::new("com/acme/Foo").package(), "com/acme");
        assert_eq!(ClassReference::new("Foo").package(), "");
    }

    #[test]
    fn references_compare_structurally() {
        let descriptor = MethodDescriptor::parse("()V").expect("parse descriptor");
        let first = MethodReference::new(ClassReference::new("a/A"), "run", descriptor.clone());
        let second = MethodReference::new(ClassReference::new("a.A"), "run", descriptor);
        let mut set = HashSet::new();
        set.insert(Reference::from(first));
        assert!(set.contains(&Reference::from(second)));
    }

    #[test]
    fn array_references_expose_element_class() {
        let descriptor = TypeDescriptor::parse("[[Lcom/acme/Foo;").expect("parse array");
        let array = ClassReference::from_type(&descriptor).expect("array class");
        assert!(array.is_array());
        assert_eq!(
            array.array_element(),
            Some(ClassReference::new("com/acme/Foo"))
        );
        assert_eq!(ClassReference::from_type(&TypeDescriptor::INT), None);
        let primitive_array = ClassReference::new("[I");
        assert_eq!(primitive_array.array_element(), None);
    }

    #[test]
    fn partial_method_reference_matches_overloads_by_prefix() {
        let owner = ClassReference::new("a/A");
        let partial = PartialMethodReference::new(
            owner.clone(),
            "run",
            PartialMethodDescriptor::parse("(I)").expect("parse partial"),
        );
        let method = MethodReference::new(
            owner,
            "run",
            MethodDescriptor::parse("(I)Ljava/lang/String;").expect("parse descriptor"),
        );
        assert!(partial.matches(&method));
    }
}
