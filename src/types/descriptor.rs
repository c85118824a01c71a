use std::fmt;
use std::sync::Arc;

use crate::{Error, Result};

/// JVM primitive types, including `void` for return positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Primitive {
    Void,
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl Primitive {
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'V' => Primitive::Void,
            'Z' => Primitive::Boolean,
            'B' => Primitive::Byte,
            'C' => Primitive::Char,
            'S' => Primitive::Short,
            'I' => Primitive::Int,
            'J' => Primitive::Long,
            'F' => Primitive::Float,
            'D' => Primitive::Double,
            _ => return None,
        })
    }

    pub fn descriptor(self) -> &'static str {
        match self {
            Primitive::Void => "V",
            Primitive::Boolean => "Z",
            Primitive::Byte => "B",
            Primitive::Char => "C",
            Primitive::Short => "S",
            Primitive::Int => "I",
            Primitive::Long => "J",
            Primitive::Float => "F",
            Primitive::Double => "D",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Repr {
    Primitive(Primitive),
    Reference(Arc<str>),
}

/// A field descriptor such as `I`, `Ljava/lang/String;` or `[[J`.
///
/// Primitive descriptors are the associated constants ([`TypeDescriptor::INT`] and
/// friends) and never allocate. Reference descriptors keep their text in an `Arc<str>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeDescriptor(Repr);

/// Shape of a [`TypeDescriptor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Primitive(Primitive),
    Class,
    Array,
}

impl TypeDescriptor {
    pub const VOID: TypeDescriptor = TypeDescriptor(Repr::Primitive(Primitive::Void));
    pub const BOOLEAN: TypeDescriptor = TypeDescriptor(Repr::Primitive(Primitive::Boolean));
    pub const BYTE: TypeDescriptor = TypeDescriptor(Repr::Primitive(Primitive::Byte));
    pub const CHAR: TypeDescriptor = TypeDescriptor(Repr::Primitive(Primitive::Char));
    pub const SHORT: TypeDescriptor = TypeDescriptor(Repr::Primitive(Primitive::Short));
    pub const INT: TypeDescriptor = TypeDescriptor(Repr::Primitive(Primitive::Int));
    pub const LONG: TypeDescriptor = TypeDescriptor(Repr::Primitive(Primitive::Long));
    pub const FLOAT: TypeDescriptor = TypeDescriptor(Repr::Primitive(Primitive::Float));
    pub const DOUBLE: TypeDescriptor = TypeDescriptor(Repr::Primitive(Primitive::Double));

    /// Parse a complete field descriptor. `V` is accepted for return positions.
    pub fn parse(text: &str) -> Result<Self> {
        let (descriptor, end) = parse_type_at(text, 0)?;
        if end != text.len() {
            return Err(invalid(text, "trailing characters after type"));
        }
        Ok(descriptor)
    }

    pub fn primitive(primitive: Primitive) -> Self {
        TypeDescriptor(Repr::Primitive(primitive))
    }

    /// Descriptor of a class given its internal or binary name.
    pub fn object(class_name: &str) -> Self {
        let name = class_name.replace('.', "/");
        TypeDescriptor(Repr::Reference(Arc::from(format!("L{name};"))))
    }

    /// Descriptor of `dimensions` nested arrays of `self`.
    pub fn array_of(&self, dimensions: usize) -> Self {
        let text = format!("{}{}", "[".repeat(dimensions), self.as_str());
        TypeDescriptor(Repr::Reference(Arc::from(text)))
    }

    pub fn as_str(&self) -> &str {
        match &self.0 {
            Repr::Primitive(primitive) => primitive.descriptor(),
            Repr::Reference(text) => text,
        }
    }

    pub fn kind(&self) -> TypeKind {
        match &self.0 {
            Repr::Primitive(primitive) => TypeKind::Primitive(*primitive),
            Repr::Reference(text) if text.starts_with('[') => TypeKind::Array,
            Repr::Reference(_) => TypeKind::Class,
        }
    }

    pub fn as_primitive(&self) -> Option<Primitive> {
        match &self.0 {
            Repr::Primitive(primitive) => Some(*primitive),
            Repr::Reference(_) => None,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self.0, Repr::Primitive(_))
    }

    pub fn is_array(&self) -> bool {
        self.kind() == TypeKind::Array
    }

    /// Long and double take two local variable slots.
    pub fn is_wide(&self) -> bool {
        matches!(self.0, Repr::Primitive(Primitive::Long | Primitive::Double))
    }

    pub fn array_dimensions(&self) -> usize {
        self.as_str().bytes().take_while(|b| *b == b'[').count()
    }

    /// The type with every array dimension stripped.
    pub fn element_type(&self) -> TypeDescriptor {
        let dimensions = self.array_dimensions();
        if dimensions == 0 {
            return self.clone();
        }
        // validated at construction
        TypeDescriptor::from_validated(&self.as_str()[dimensions..])
    }

    /// The type with one array dimension stripped, if this is an array.
    pub fn component_type(&self) -> Option<TypeDescriptor> {
        if !self.is_array() {
            return None;
        }
        Some(TypeDescriptor::from_validated(&self.as_str()[1..]))
    }

    /// Internal name of a class type (`java/lang/String` for `Ljava/lang/String;`).
    pub fn class_name(&self) -> Option<&str> {
        match &self.0 {
            Repr::Reference(text) if text.starts_with('L') => Some(&text[1..text.len() - 1]),
            _ => None,
        }
    }

    fn from_validated(text: &str) -> TypeDescriptor {
        let mut chars = text.chars();
        match (chars.next().and_then(Primitive::from_char), chars.next()) {
            (Some(primitive), None) => TypeDescriptor(Repr::Primitive(primitive)),
            _ => TypeDescriptor(Repr::Reference(Arc::from(text))),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A method descriptor such as `(ILjava/lang/String;)V`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodDescriptor {
    text: Arc<str>,
    arguments: Arc<[TypeDescriptor]>,
    return_type: TypeDescriptor,
}

impl MethodDescriptor {
    pub fn parse(text: &str) -> Result<Self> {
        let (arguments, end) = parse_arguments(text)?;
        let (return_type, end) = parse_type_at(text, end)?;
        if end != text.len() {
            return Err(invalid(text, "trailing characters after return type"));
        }
        Ok(MethodDescriptor {
            text: Arc::from(text),
            arguments: Arc::from(arguments),
            return_type,
        })
    }

    pub fn new(return_type: TypeDescriptor, arguments: Vec<TypeDescriptor>) -> Self {
        let mut text = String::from("(");
        for argument in &arguments {
            text.push_str(argument.as_str());
        }
        text.push(')');
        text.push_str(return_type.as_str());
        MethodDescriptor {
            text: Arc::from(text),
            arguments: Arc::from(arguments),
            return_type,
        }
    }

    pub fn arguments(&self) -> &[TypeDescriptor] {
        &self.arguments
    }

    pub fn return_type(&self) -> &TypeDescriptor {
        &self.return_type
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Local variable slots taken by the arguments, not counting `this`.
    pub fn argument_slots(&self) -> usize {
        self.arguments
            .iter()
            .map(|argument| if argument.is_wide() { 2 } else { 1 })
            .sum()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// The argument part of a method descriptor, `(I[J)`, matching any return type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartialMethodDescriptor {
    text: Arc<str>,
}

impl PartialMethodDescriptor {
    pub fn parse(text: &str) -> Result<Self> {
        let (_, end) = parse_arguments(text)?;
        if end != text.len() {
            return Err(invalid(text, "partial descriptor must end after ')'"));
        }
        Ok(PartialMethodDescriptor {
            text: Arc::from(text),
        })
    }

    pub fn from_arguments(arguments: &[TypeDescriptor]) -> Self {
        let mut text = String::from("(");
        for argument in arguments {
            text.push_str(argument.as_str());
        }
        text.push(')');
        PartialMethodDescriptor {
            text: Arc::from(text),
        }
    }

    pub fn matches(&self, descriptor: &MethodDescriptor) -> bool {
        descriptor.as_str().starts_with(&*self.text)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for PartialMethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

pub(crate) fn invalid(text: &str, reason: &str) -> Error {
    Error::InvalidDescriptor {
        text: text.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_arguments(text: &str) -> Result<(Vec<TypeDescriptor>, usize)> {
    if !text.starts_with('(') {
        return Err(invalid(text, "method descriptor must start with '('"));
    }
    let mut arguments = Vec::new();
    let mut pos = 1;
    loop {
        match text.as_bytes().get(pos) {
            Some(b')') => return Ok((arguments, pos + 1)),
            Some(_) => {
                let (argument, end) = parse_type_at(text, pos)?;
                if argument == TypeDescriptor::VOID {
                    return Err(invalid(text, "void is not a valid argument type"));
                }
                arguments.push(argument);
                pos = end;
            }
            None => return Err(invalid(text, "unterminated argument list")),
        }
    }
}

/// Parse one field type starting at `pos`; returns the type and the end offset.
pub(crate) fn parse_type_at(text: &str, pos: usize) -> Result<(TypeDescriptor, usize)> {
    let bytes = text.as_bytes();
    let mut cursor = pos;
    while bytes.get(cursor) == Some(&b'[') {
        cursor += 1;
    }
    let dimensions = cursor - pos;
    if dimensions > 255 {
        return Err(invalid(text, "more than 255 array dimensions"));
    }
    let end = match bytes.get(cursor) {
        Some(b'L') => {
            let Some(semicolon) = text[cursor..].find(';') else {
                return Err(invalid(text, "unterminated class type"));
            };
            let name = &text[cursor + 1..cursor + semicolon];
            if name.is_empty() || name.contains(['.', '[', '<', '>']) {
                return Err(invalid(text, "invalid class name"));
            }
            cursor + semicolon + 1
        }
        Some(&c) => match Primitive::from_char(c as char) {
            Some(Primitive::Void) if dimensions > 0 => {
                return Err(invalid(text, "array of void"));
            }
            Some(primitive) if dimensions == 0 => {
                return Ok((TypeDescriptor::primitive(primitive), cursor + 1));
            }
            Some(_) => cursor + 1,
            None => return Err(invalid(text, "unknown type character")),
        },
        None => return Err(invalid(text, "unexpected end of descriptor")),
    };
    let descriptor = TypeDescriptor(Repr::Reference(Arc::from(&text[pos..end])));
    Ok((descriptor, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_descriptors_are_interned() {
        let parsed = TypeDescriptor::parse("I").expect("parse int");
        assert_eq!(parsed, TypeDescriptor::INT);
        assert!(parsed.is_primitive());
        assert_eq!(parsed.as_primitive(), Some(Primitive::Int));
    }

    #[test]
    fn type_descriptor_round_trips() {
        for text in ["Z", "Ljava/lang/String;", "[[J", "[Lcom/acme/Foo;", "V"] {
            let parsed = TypeDescriptor::parse(text).expect("parse descriptor");
            assert_eq!(parsed.to_string(), text);
        }
    }

    #[test]
    fn method_descriptor_round_trips_and_exposes_parts() {
        let parsed = MethodDescriptor::parse("(I[JLjava/lang/Object;)V").expect("parse method");
        assert_eq!(parsed.to_string(), "(I[JLjava/lang/Object;)V");
        assert_eq!(parsed.arguments().len(), 3);
        assert_eq!(parsed.return_type(), &TypeDescriptor::VOID);
        assert_eq!(parsed.argument_slots(), 3);

        let built = MethodDescriptor::new(
            TypeDescriptor::VOID,
            vec![
                TypeDescriptor::INT,
                TypeDescriptor::LONG.array_of(1),
                TypeDescriptor::object("java.lang.Object"),
            ],
        );
        assert_eq!(parsed, built);
    }

    #[test]
    fn rejects_malformed_descriptors() {
        for text in ["", "L;", "Ljava/lang/String", "[V", "X", "II", "(V)V", "(I", "(I)"] {
            assert!(TypeDescriptor::parse(text).is_err() || MethodDescriptor::parse(text).is_err());
        }
        assert!(MethodDescriptor::parse("(V)V").is_err());
        assert!(TypeDescriptor::parse("Lfoo.Bar;").is_err());
    }

    #[test]
    fn array_helpers_strip_dimensions() {
        let array = TypeDescriptor::parse("[[Lcom/acme/Foo;").expect("parse array");
        assert_eq!(array.array_dimensions(), 2);
        assert_eq!(array.element_type().class_name(), Some("com/acme/Foo"));
        assert_eq!(
            array.component_type().expect("component").as_str(),
            "[Lcom/acme/Foo;"
        );
        assert_eq!(
            TypeDescriptor::parse("[I")
                .expect("parse int array")
                .element_type(),
            TypeDescriptor::INT
        );
    }

    #[test]
    fn partial_descriptor_matches_by_prefix() {
        let partial = PartialMethodDescriptor::parse("(Ljava/lang/String;)").expect("parse partial");
        let full = MethodDescriptor::parse("(Ljava/lang/String;)I").expect("parse full");
        let other = MethodDescriptor::parse("(Ljava/lang/String;I)I").expect("parse other");
        assert!(partial.matches(&full));
        assert!(!partial.matches(&other));
    }
}
