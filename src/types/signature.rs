//! Generic signature grammars from the `Signature` attribute.
//!
//! Every type parses from and renders back to the exact class file text, so
//! `parse(s).to_string() == s` for any valid signature.

use std::fmt;

use crate::Result;
use crate::types::descriptor::{Primitive, invalid};

/// A Java type signature: primitive, class, type variable, or array.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeSignature {
    Primitive(Primitive),
    Class(ClassTypeSignature),
    TypeVariable(String),
    Array(Box<TypeSignature>),
}

/// `Lpkg/Outer<args>.Inner<args>;`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClassTypeSignature {
    /// Internal name of the outermost class.
    pub name: String,
    pub arguments: Vec<TypeArgument>,
    /// Simple names of nested classes after `.`, with their own arguments.
    pub inner: Vec<InnerClassSignature>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InnerClassSignature {
    pub name: String,
    pub arguments: Vec<TypeArgument>,
}

/// Wildcard indicator of a type argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeVariant {
    /// `? extends T`, written `+`
    Covariant,
    /// `? super T`, written `-`
    Contravariant,
    Invariant,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeArgument {
    /// The unbounded wildcard `*`.
    Star,
    Bounded {
        variant: TypeVariant,
        signature: TypeSignature,
    },
}

/// `T:Ljava/lang/Object;:Ljava/lang/Comparable<TT;>;`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeParameter {
    pub name: String,
    pub class_bound: Option<TypeSignature>,
    pub interface_bounds: Vec<TypeSignature>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClassSignature {
    pub type_parameters: Vec<TypeParameter>,
    pub superclass: TypeSignature,
    pub interfaces: Vec<TypeSignature>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub type_parameters: Vec<TypeParameter>,
    pub parameters: Vec<TypeSignature>,
    pub return_type: TypeSignature,
    pub throws: Vec<TypeSignature>,
}

impl TypeSignature {
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = SignatureParser::new(text);
        let signature = parser.java_type(true)?;
        parser.finish()?;
        Ok(signature)
    }

    /// A raw class type with no arguments.
    pub fn class(name: &str) -> Self {
        TypeSignature::Class(ClassTypeSignature {
            name: name.replace('.', "/"),
            arguments: Vec::new(),
            inner: Vec::new(),
        })
    }

    pub fn type_variable(name: &str) -> Self {
        TypeSignature::TypeVariable(name.to_string())
    }

    pub fn array_of(self) -> Self {
        TypeSignature::Array(Box::new(self))
    }

    /// Attach type arguments to the innermost class segment.
    pub fn with_arguments(self, arguments: Vec<TypeArgument>) -> Self {
        match self {
            TypeSignature::Class(mut class) => {
                match class.inner.last_mut() {
                    Some(inner) => inner.arguments = arguments,
                    None => class.arguments = arguments,
                }
                TypeSignature::Class(class)
            }
            other => other,
        }
    }

    /// Append a nested class segment (`Outer<..>.Inner`).
    pub fn with_inner(self, name: &str) -> Self {
        match self {
            TypeSignature::Class(mut class) => {
                class.inner.push(InnerClassSignature {
                    name: name.to_string(),
                    arguments: Vec::new(),
                });
                TypeSignature::Class(class)
            }
            other => other,
        }
    }
}

impl TypeArgument {
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = SignatureParser::new(text);
        let argument = parser.type_argument()?;
        parser.finish()?;
        Ok(argument)
    }

    pub fn invariant(signature: TypeSignature) -> Self {
        TypeArgument::Bounded {
            variant: TypeVariant::Invariant,
            signature,
        }
    }
}

impl TypeParameter {
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = SignatureParser::new(text);
        let parameter = parser.type_parameter()?;
        parser.finish()?;
        Ok(parameter)
    }
}

impl ClassSignature {
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = SignatureParser::new(text);
        let type_parameters = parser.type_parameters()?;
        let superclass = parser.class_type()?;
        let mut interfaces = Vec::new();
        while !parser.at_end() {
            interfaces.push(parser.class_type()?);
        }
        Ok(ClassSignature {
            type_parameters,
            superclass,
            interfaces,
        })
    }
}

impl MethodSignature {
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = SignatureParser::new(text);
        let type_parameters = parser.type_parameters()?;
        parser.expect(b'(')?;
        let mut parameters = Vec::new();
        while parser.peek() != Some(b')') {
            parameters.push(parser.java_type(false)?);
        }
        parser.expect(b')')?;
        let return_type = parser.java_type(true)?;
        let mut throws = Vec::new();
        while parser.peek() == Some(b'^') {
            parser.bump();
            let thrown = parser.reference_type()?;
            if matches!(thrown, TypeSignature::Array(_)) {
                return Err(parser.error("throws clause cannot be an array"));
            }
            throws.push(thrown);
        }
        parser.finish()?;
        Ok(MethodSignature {
            type_parameters,
            parameters,
            return_type,
            throws,
        })
    }
}

struct SignatureParser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> SignatureParser<'a> {
    fn new(text: &'a str) -> Self {
        SignatureParser { text, pos: 0 }
    }

    fn error(&self, reason: &str) -> crate::Error {
        invalid(self.text, &format!("{reason} at offset {}", self.pos))
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn expect(&mut self, expected: u8) -> Result<()> {
        if self.peek() != Some(expected) {
            return Err(self.error(&format!("expected '{}'", expected as char)));
        }
        self.bump();
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        if !self.at_end() {
            return Err(self.error("trailing characters"));
        }
        Ok(())
    }

    fn identifier(&mut self, stops: &[u8]) -> Result<&'a str> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if stops.contains(&c) {
                break;
            }
            self.bump();
        }
        if self.pos == start {
            return Err(self.error("expected identifier"));
        }
        Ok(&self.text[start..self.pos])
    }

    fn java_type(&mut self, allow_void: bool) -> Result<TypeSignature> {
        match self.peek() {
            Some(b'L' | b'T' | b'[') => self.reference_type(),
            Some(c) => match Primitive::from_char(c as char) {
                Some(Primitive::Void) if !allow_void => Err(self.error("void is not allowed here")),
                Some(primitive) => {
                    self.bump();
                    Ok(TypeSignature::Primitive(primitive))
                }
                None => Err(self.error("unknown type character")),
            },
            None => Err(self.error("unexpected end of signature")),
        }
    }

    fn reference_type(&mut self) -> Result<TypeSignature> {
        match self.peek() {
            Some(b'L') => self.class_type(),
            Some(b'T') => {
                self.bump();
                let name = self.identifier(b";<>.:/[")?.to_string();
                self.expect(b';')?;
                Ok(TypeSignature::TypeVariable(name))
            }
            Some(b'[') => {
                self.bump();
                Ok(TypeSignature::Array(Box::new(self.java_type(false)?)))
            }
            _ => Err(self.error("expected reference type")),
        }
    }

    fn class_type(&mut self) -> Result<TypeSignature> {
        self.expect(b'L')?;
        let name = self.identifier(b";<.")?.to_string();
        let arguments = self.type_arguments()?;
        let mut inner = Vec::new();
        while self.peek() == Some(b'.') {
            self.bump();
            let name = self.identifier(b";<.")?.to_string();
            let arguments = self.type_arguments()?;
            inner.push(InnerClassSignature { name, arguments });
        }
        self.expect(b';')?;
        Ok(TypeSignature::Class(ClassTypeSignature {
            name,
            arguments,
            inner,
        }))
    }

    fn type_arguments(&mut self) -> Result<Vec<TypeArgument>> {
        let mut arguments = Vec::new();
        if self.peek() != Some(b'<') {
            return Ok(arguments);
        }
        self.bump();
        while self.peek() != Some(b'>') {
            arguments.push(self.type_argument()?);
        }
        self.bump();
        if arguments.is_empty() {
            return Err(self.error("empty type argument list"));
        }
        Ok(arguments)
    }

    fn type_argument(&mut self) -> Result<TypeArgument> {
        let variant = match self.peek() {
            Some(b'*') => {
                self.bump();
                return Ok(TypeArgument::Star);
            }
            Some(b'+') => {
                self.bump();
                TypeVariant::Covariant
            }
            Some(b'-') => {
                self.bump();
                TypeVariant::Contravariant
            }
            _ => TypeVariant::Invariant,
        };
        let signature = self.reference_type()?;
        Ok(TypeArgument::Bounded { variant, signature })
    }

    fn type_parameters(&mut self) -> Result<Vec<TypeParameter>> {
        let mut parameters = Vec::new();
        if self.peek() != Some(b'<') {
            return Ok(parameters);
        }
        self.bump();
        while self.peek() != Some(b'>') {
            parameters.push(self.type_parameter()?);
        }
        self.bump();
        if parameters.is_empty() {
            return Err(self.error("empty type parameter list"));
        }
        Ok(parameters)
    }

    fn type_parameter(&mut self) -> Result<TypeParameter> {
        let name = self.identifier(b":;<>./[")?.to_string();
        self.expect(b':')?;
        let class_bound = match self.peek() {
            Some(b'L' | b'T' | b'[') => Some(self.reference_type()?),
            _ => None,
        };
        let mut interface_bounds = Vec::new();
        while self.peek() == Some(b':') {
            self.bump();
            interface_bounds.push(self.reference_type()?);
        }
        Ok(TypeParameter {
            name,
            class_bound,
            interface_bounds,
        })
    }
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSignature::Primitive(primitive) => f.write_str(primitive.descriptor()),
            TypeSignature::Class(class) => write!(f, "{}", class),
            TypeSignature::TypeVariable(name) => write!(f, "T{name};"),
            TypeSignature::Array(element) => write!(f, "[{element}"),
        }
    }
}

impl fmt::Display for ClassTypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.name)?;
        write_arguments(f, &self.arguments)?;
        for inner in &self.inner {
            write!(f, ".{}", inner.name)?;
            write_arguments(f, &inner.arguments)?;
        }
        f.write_str(";")
    }
}

fn write_arguments(f: &mut fmt::Formatter<'_>, arguments: &[TypeArgument]) -> fmt::Result {
    if arguments.is_empty() {
        return Ok(());
    }
    f.write_str("<")?;
    for argument in arguments {
        write!(f, "{}", argument)?;
    }
    f.write_str(">")
}

impl fmt::Display for TypeArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeArgument::Star => f.write_str("*"),
            TypeArgument::Bounded { variant, signature } => {
                match variant {
                    TypeVariant::Covariant => f.write_str("+")?,
                    TypeVariant::Contravariant => f.write_str("-")?,
                    TypeVariant::Invariant => {}
                }
                write!(f, "{}", signature)
            }
        }
    }
}

impl fmt::Display for TypeParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.name)?;
        if let Some(bound) = &self.class_bound {
            write!(f, "{}", bound)?;
        }
        for bound in &self.interface_bounds {
            write!(f, ":{bound}")?;
        }
        Ok(())
    }
}

fn write_type_parameters(f: &mut fmt::Formatter<'_>, parameters: &[TypeParameter]) -> fmt::Result {
    if parameters.is_empty() {
        return Ok(());
    }
    f.write_str("<")?;
    for parameter in parameters {
        write!(f, "{}", parameter)?;
    }
    f.write_str(">")
}

impl fmt::Display for ClassSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_type_parameters(f, &self.type_parameters)?;
        write!(f, "{}", self.superclass)?;
        for interface in &self.interfaces {
            write!(f, "{}", interface)?;
        }
        Ok(())
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_type_parameters(f, &self.type_parameters)?;
        f.write_str("(")?;
        for parameter in &self.parameters {
            write!(f, "{}", parameter)?;
        }
        f.write_str(")")?;
        write!(f, "{}", self.return_type)?;
        for thrown in &self.throws {
            write!(f, "^{thrown}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_signatures_round_trip() {
        let samples = [
            "Ljava/lang/Object;",
            "<T:Ljava/lang/Object;>Ljava/lang/Object;Ljava/lang/Comparable<TT;>;",
            "<K:Ljava/lang/Object;V::Ljava/lang/Runnable;>Ljava/util/AbstractMap<TK;TV;>;",
            "Ljava/lang/Enum<Lcom/acme/Color;>;",
        ];
        for text in samples {
            let parsed = ClassSignature::parse(text).expect("parse class signature");
            assert_eq!(parsed.to_string(), text);
        }
    }

    #[test]
    fn method_signatures_round_trip() {
        let samples = [
            "()V",
            "<T:Ljava/lang/Object;>(TT;[TT;)Ljava/util/List<+TT;>;",
            "(Ljava/util/Map<-Ljava/lang/String;*>;)I^Ljava/io/IOException;^TE;",
            "(Lcom/acme/Outer<TT;>.Inner<Ljava/lang/String;>.Deep;)V",
        ];
        for text in samples {
            let parsed = MethodSignature::parse(text).expect("parse method signature");
            assert_eq!(parsed.to_string(), text);
        }
    }

    #[test]
    fn parsed_signature_matches_builder() {
        let parsed = TypeSignature::parse("Ljava/util/Map<Ljava/lang/String;+[TV;>;")
            .expect("parse type signature");
        let built = TypeSignature::class("java.util.Map").with_arguments(vec![
            TypeArgument::invariant(TypeSignature::class("java/lang/String")),
            TypeArgument::Bounded {
                variant: TypeVariant::Covariant,
                signature: TypeSignature::type_variable("V").array_of(),
            },
        ]);
        assert_eq!(parsed, built);
    }

    #[test]
    fn type_parameter_and_argument_round_trip() {
        let parameter = TypeParameter::parse("E:Ljava/lang/Enum<TE;>;:Ljava/io/Serializable;")
            .expect("parse type parameter");
        assert_eq!(parameter.interface_bounds.len(), 1);
        assert_eq!(
            parameter.to_string(),
            "E:Ljava/lang/Enum<TE;>;:Ljava/io/Serializable;"
        );
        assert_eq!(TypeArgument::parse("*").expect("parse star"), TypeArgument::Star);
        assert_eq!(
            TypeArgument::parse("-Ljava/lang/Number;")
                .expect("parse contravariant")
                .to_string(),
            "-Ljava/lang/Number;"
        );
    }

    #[test]
    fn rejects_malformed_signatures() {
        assert!(TypeSignature::parse("Ljava/util/List<>;").is_err());
        assert!(TypeSignature::parse("TT").is_err());
        assert!(MethodSignature::parse("(V)V").is_err());
        assert!(ClassSignature::parse("<>Ljava/lang/Object;").is_err());
    }
}
