//! Reflective lookups: which calls and fields yield a class, field or method,
//! and the forward interpretation that recovers their arguments from bytecode.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::diagnostic::{DiagnosticHandler, Location, basic};
use crate::ir::{
    CodeLabel, Constant, FieldOp, Insn, InsnNode, InvokeOp, JumpOp, SimpleInsn, TypeOp, TypedOp,
    VarOp, VmType,
};
use crate::reference::{
    ClassReference, FieldReference, MethodReference, PartialFieldReference,
    PartialMethodReference, Reference, TypelessMethodReference,
};
use crate::types::{
    MethodDescriptor, PartialMethodDescriptor, Primitive, TypeDescriptor, TypeKind,
};
use crate::{Error, Result};

const STRING: &str = "Ljava/lang/String;";
const CLASS: &str = "Ljava/lang/Class;";
const CLASS_ARRAY: &str = "[Ljava/lang/Class;";
const METHOD_TYPE: &str = "Ljava/lang/invoke/MethodType;";

/// Types a `Class` instance can be returned as.
const CLASS_TYPES: &[&str] = &[
    "Ljava/lang/Class;",
    "Ljava/lang/Object;",
    "Ljava/io/Serializable;",
    "Ljava/lang/constant/Constable;",
    "Ljava/lang/invoke/TypeDescriptor;",
    "Ljava/lang/invoke/TypeDescriptor$OfField;",
    "Ljava/lang/reflect/AnnotatedElement;",
    "Ljava/lang/reflect/GenericDeclaration;",
    "Ljava/lang/reflect/Type;",
];

/// Types a `Field` instance can be returned as.
const FIELD_TYPES: &[&str] = &[
    "Ljava/lang/reflect/Field;",
    "Ljava/lang/reflect/AccessibleObject;",
    "Ljava/lang/Object;",
    "Ljava/lang/reflect/AnnotatedElement;",
    "Ljava/lang/reflect/Member;",
];

/// Types a `Method` or `Constructor` instance can be returned as.
const METHOD_TYPES: &[&str] = &[
    "Ljava/lang/reflect/Method;",
    "Ljava/lang/reflect/Constructor;",
    "Ljava/lang/reflect/Executable;",
    "Ljava/lang/reflect/AccessibleObject;",
    "Ljava/lang/Object;",
    "Ljava/lang/reflect/AnnotatedElement;",
    "Ljava/lang/reflect/GenericDeclaration;",
    "Ljava/lang/reflect/Member;",
];

/// Largest array the interpreter tracks element by element.
const MAX_TRACKED_ARRAY: i32 = 100;

/// A value passed to a mapped call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Param {
    /// The receiver of an instance call or field read.
    Receiver,
    /// A call argument by position, receiver excluded.
    Argument(u16),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StringRef {
    Param(Param),
    Constant(String),
    /// Concatenation of every part; unknown if any part is.
    Joined(Vec<StringRef>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassRef {
    /// A binary or internal class name, as taken by `Class.forName`.
    Named(StringRef),
    /// A field descriptor.
    Descriptor(StringRef),
    /// A `Class` instance.
    Param(Param),
}

impl ClassRef {
    pub fn primitive(primitive: Primitive) -> Self {
        ClassRef::Descriptor(StringRef::Constant(primitive.descriptor().to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MethodTypeRef {
    /// Argument part of a descriptor: `(I)`.
    PartialDescriptor(StringRef),
    FullDescriptor(StringRef),
    /// A `Class[]` of argument types.
    ParameterTypes(Param),
    /// A `Class[]` of argument types and the return type.
    ParameterAndReturnTypes(Param, ClassRef),
    /// A `MethodType` instance.
    Param(Param),
}

/// What a mapped call or field yields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemberRef {
    Class(ClassRef),
    Field {
        owner: ClassRef,
        name: StringRef,
        ty: Option<ClassRef>,
    },
    Method {
        owner: ClassRef,
        name: StringRef,
        ty: Option<MethodTypeRef>,
    },
}

/// A method or field a mapping is attached to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MappingKey {
    Method(MethodReference),
    Field(FieldReference),
}

impl From<MethodReference> for MappingKey {
    fn from(value: MethodReference) -> Self {
        MappingKey::Method(value)
    }
}

impl From<FieldReference> for MappingKey {
    fn from(value: FieldReference) -> Self {
        MappingKey::Field(value)
    }
}

impl MappingKey {
    fn result_type(&self) -> &TypeDescriptor {
        match self {
            MappingKey::Method(method) => method.descriptor.return_type(),
            MappingKey::Field(field) => &field.descriptor,
        }
    }

    fn parameter_type(&self, param: Param) -> Option<TypeDescriptor> {
        match (self, param) {
            (MappingKey::Method(method), Param::Receiver) => Some(method.owner.descriptor()),
            (MappingKey::Field(field), Param::Receiver) => Some(field.owner.descriptor()),
            (MappingKey::Method(method), Param::Argument(index)) => {
                method.descriptor.arguments().get(index as usize).cloned()
            }
            (MappingKey::Field(_), Param::Argument(_)) => None,
        }
    }

    fn require(&self, param: Param, expected: &str) -> Result<()> {
        let actual = self.parameter_type(param);
        if actual.as_ref().map(TypeDescriptor::as_str) == Some(expected) {
            return Ok(());
        }
        let what = match param {
            Param::Receiver => "receiver".to_string(),
            Param::Argument(index) => format!("argument {index}"),
        };
        Err(Error::InvalidReflectionMapping(format!(
            "{what} of {self:?} must be {expected}, found {}",
            actual.map_or_else(|| "nothing".to_string(), |ty| ty.to_string())
        )))
    }
}

impl StringRef {
    fn check(&self, key: &MappingKey) -> Result<()> {
        match self {
            StringRef::Param(param) => key.require(*param, STRING),
            StringRef::Constant(_) => Ok(()),
            StringRef::Joined(parts) => parts.iter().try_for_each(|part| part.check(key)),
        }
    }

    fn resolve(&self, args: &Arguments<'_>) -> Option<String> {
        match self {
            StringRef::Param(param) => match args.get(*param)? {
                Value::String(value) => Some(value.clone()),
                _ => None,
            },
            StringRef::Constant(value) => Some(value.clone()),
            StringRef::Joined(parts) => parts.iter().map(|part| part.resolve(args)).collect(),
        }
    }
}

impl ClassRef {
    fn check(&self, key: &MappingKey) -> Result<()> {
        match self {
            ClassRef::Named(name) | ClassRef::Descriptor(name) => name.check(key),
            ClassRef::Param(param) => key.require(*param, CLASS),
        }
    }

    fn resolve(&self, args: &Arguments<'_>) -> Option<TypeDescriptor> {
        match self {
            ClassRef::Named(name) => {
                let class = ClassReference::new(&name.resolve(args)?);
                if class.is_array() {
                    TypeDescriptor::parse(class.name()).ok()
                } else {
                    Some(TypeDescriptor::object(class.name()))
                }
            }
            ClassRef::Descriptor(descriptor) => {
                TypeDescriptor::parse(&descriptor.resolve(args)?.replace('.', "/")).ok()
            }
            ClassRef::Param(param) => match args.get(*param)? {
                Value::Class(descriptor) => Some(descriptor.clone()),
                _ => None,
            },
        }
    }
}

/// A resolved method type: argument types only, or a full descriptor.
enum MethodType {
    Partial(PartialMethodDescriptor),
    Full(MethodDescriptor),
}

impl MethodTypeRef {
    fn check(&self, key: &MappingKey) -> Result<()> {
        match self {
            MethodTypeRef::PartialDescriptor(text) | MethodTypeRef::FullDescriptor(text) => {
                text.check(key)
            }
            MethodTypeRef::ParameterTypes(param) => key.require(*param, CLASS_ARRAY),
            MethodTypeRef::ParameterAndReturnTypes(param, returns) => {
                key.require(*param, CLASS_ARRAY)?;
                returns.check(key)
            }
            MethodTypeRef::Param(param) => key.require(*param, METHOD_TYPE),
        }
    }

    fn resolve(&self, args: &Arguments<'_>) -> Option<MethodType> {
        match self {
            MethodTypeRef::PartialDescriptor(text) => {
                PartialMethodDescriptor::parse(&text.resolve(args)?)
                    .ok()
                    .map(MethodType::Partial)
            }
            MethodTypeRef::FullDescriptor(text) => MethodDescriptor::parse(&text.resolve(args)?)
                .ok()
                .map(MethodType::Full),
            MethodTypeRef::ParameterTypes(param) => {
                let arguments = args.class_array(*param)?;
                Some(MethodType::Partial(PartialMethodDescriptor::from_arguments(
                    &arguments,
                )))
            }
            MethodTypeRef::ParameterAndReturnTypes(param, returns) => {
                let arguments = args.class_array(*param)?;
                let returns = returns.resolve(args)?;
                Some(MethodType::Full(MethodDescriptor::new(returns, arguments)))
            }
            MethodTypeRef::Param(param) => match args.get(*param)? {
                Value::MethodType(descriptor) => Some(MethodType::Full(descriptor.clone())),
                _ => None,
            },
        }
    }
}

/// What resolving a [`MemberRef`] against known arguments produced.
enum Resolved {
    Class(TypeDescriptor),
    Member(Reference),
}

impl MemberRef {
    fn check(&self, key: &MappingKey) -> Result<()> {
        match self {
            MemberRef::Class(class) => class.check(key),
            MemberRef::Field { owner, name, ty } => {
                owner.check(key)?;
                name.check(key)?;
                ty.as_ref().map_or(Ok(()), |ty| ty.check(key))
            }
            MemberRef::Method { owner, name, ty } => {
                owner.check(key)?;
                name.check(key)?;
                ty.as_ref().map_or(Ok(()), |ty| ty.check(key))
            }
        }
    }

    fn resolve(&self, args: &Arguments<'_>) -> Option<Resolved> {
        match self {
            MemberRef::Class(class) => class.resolve(args).map(Resolved::Class),
            MemberRef::Field { owner, name, ty } => {
                let owner = class_owner(owner.resolve(args)?)?;
                let name = name.resolve(args)?;
                let reference = match ty {
                    None => PartialFieldReference::new(owner, &name).into(),
                    Some(ty) => FieldReference::new(owner, &name, ty.resolve(args)?).into(),
                };
                Some(Resolved::Member(reference))
            }
            MemberRef::Method { owner, name, ty } => {
                let owner = class_owner(owner.resolve(args)?)?;
                let name = name.resolve(args)?;
                let reference = match ty {
                    None => TypelessMethodReference::new(owner, &name).into(),
                    Some(ty) => match ty.resolve(args)? {
                        MethodType::Partial(descriptor) => {
                            PartialMethodReference::new(owner, &name, descriptor).into()
                        }
                        MethodType::Full(descriptor) => {
                            MethodReference::new(owner, &name, descriptor).into()
                        }
                    },
                };
                Some(Resolved::Member(reference))
            }
        }
    }

    fn unresolvable(&self, location: Location) -> crate::diagnostic::Diagnostic {
        match self {
            MemberRef::Class(_) => basic::unresolvable_reflection_class(location),
            MemberRef::Field { .. } => basic::unresolvable_reflection_field(location),
            MemberRef::Method { .. } => basic::unresolvable_reflection_method(location),
        }
    }
}

/// Members can only be looked up on plain classes.
fn class_owner(descriptor: TypeDescriptor) -> Option<ClassReference> {
    match descriptor.kind() {
        TypeKind::Class => ClassReference::from_type(&descriptor),
        TypeKind::Primitive(_) | TypeKind::Array => None,
    }
}

/// Calls and fields whose result names a class or member.
#[derive(Clone, Debug, Default)]
pub struct ReflectionMapping {
    methods: HashMap<MethodReference, MemberRef>,
    fields: HashMap<FieldReference, MemberRef>,
}

impl ReflectionMapping {
    /// An empty mapping.
    pub fn new() -> Self {
        ReflectionMapping::default()
    }

    /// The JDK entry points: `Class.forName`, `ClassLoader.loadClass`, the
    /// `Class.get*Field`/`get*Method`/`get*Constructor` family and the boxed
    /// primitive `TYPE` fields.
    pub fn with_defaults() -> Self {
        let mut mapping = ReflectionMapping::new();
        let string = TypeDescriptor::object("java/lang/String");
        let class = TypeDescriptor::object("java/lang/Class");
        let classes = class.array_of(1);
        let class_loader = TypeDescriptor::object("java/lang/ClassLoader");
        let module = TypeDescriptor::object("java/lang/Module");
        let field = TypeDescriptor::object("java/lang/reflect/Field");
        let method = TypeDescriptor::object("java/lang/reflect/Method");
        let constructor = TypeDescriptor::object("java/lang/reflect/Constructor");

        let named = |index| MemberRef::Class(ClassRef::Named(StringRef::Param(Param::Argument(index))));
        let lookups: [(&str, &str, Vec<TypeDescriptor>, &TypeDescriptor, MemberRef); 5] = [
            ("java/lang/ClassLoader", "loadClass", vec![string.clone()], &class, named(0)),
            (
                "java/lang/ClassLoader",
                "loadClass",
                vec![string.clone(), TypeDescriptor::BOOLEAN],
                &class,
                named(0),
            ),
            ("java/lang/Class", "forName", vec![module, string.clone()], &class, named(1)),
            ("java/lang/Class", "forName", vec![string.clone()], &class, named(0)),
            (
                "java/lang/Class",
                "forName",
                vec![string.clone(), TypeDescriptor::BOOLEAN, class_loader],
                &class,
                named(0),
            ),
        ];
        for (owner, name, arguments, returns, member) in lookups {
            mapping
                .methods
                .insert(method_ref(owner, name, arguments, returns), member);
        }

        for name in ["getField", "getDeclaredField"] {
            mapping.methods.insert(
                method_ref("java/lang/Class", name, vec![string.clone()], &field),
                MemberRef::Field {
                    owner: ClassRef::Param(Param::Receiver),
                    name: StringRef::Param(Param::Argument(0)),
                    ty: None,
                },
            );
        }
        for name in ["getMethod", "getDeclaredMethod"] {
            mapping.methods.insert(
                method_ref(
                    "java/lang/Class",
                    name,
                    vec![string.clone(), classes.clone()],
                    &method,
                ),
                MemberRef::Method {
                    owner: ClassRef::Param(Param::Receiver),
                    name: StringRef::Param(Param::Argument(0)),
                    ty: Some(MethodTypeRef::ParameterTypes(Param::Argument(1))),
                },
            );
        }
        for name in ["getConstructor", "getDeclaredConstructor"] {
            mapping.methods.insert(
                method_ref("java/lang/Class", name, vec![classes.clone()], &constructor),
                MemberRef::Method {
                    owner: ClassRef::Param(Param::Receiver),
                    name: StringRef::Constant("<init>".to_string()),
                    ty: Some(MethodTypeRef::ParameterTypes(Param::Argument(0))),
                },
            );
        }

        let boxes = [
            ("java/lang/Void", Primitive::Void),
            ("java/lang/Integer", Primitive::Int),
            ("java/lang/Long", Primitive::Long),
            ("java/lang/Float", Primitive::Float),
            ("java/lang/Double", Primitive::Double),
            ("java/lang/Byte", Primitive::Byte),
            ("java/lang/Character", Primitive::Char),
            ("java/lang/Short", Primitive::Short),
            ("java/lang/Boolean", Primitive::Boolean),
        ];
        for (owner, primitive) in boxes {
            mapping.fields.insert(
                FieldReference::new(ClassReference::new(owner), "TYPE", class.clone()),
                MemberRef::Class(ClassRef::primitive(primitive)),
            );
        }
        mapping
    }

    /// Map `key` to a class. The key must return or hold a `Class`.
    pub fn add_class(&mut self, key: impl Into<MappingKey>, class: ClassRef) -> Result<()> {
        self.insert(key.into(), MemberRef::Class(class), CLASS_TYPES, "class")
    }

    /// Map `key` to a field. The key must return or hold a `Field`.
    pub fn add_field(
        &mut self,
        key: impl Into<MappingKey>,
        owner: ClassRef,
        name: StringRef,
        ty: Option<ClassRef>,
    ) -> Result<()> {
        self.insert(key.into(), MemberRef::Field { owner, name, ty }, FIELD_TYPES, "field")
    }

    /// Map `key` to a method or constructor.
    pub fn add_method(
        &mut self,
        key: impl Into<MappingKey>,
        owner: ClassRef,
        name: StringRef,
        ty: Option<MethodTypeRef>,
    ) -> Result<()> {
        self.insert(key.into(), MemberRef::Method { owner, name, ty }, METHOD_TYPES, "method")
    }

    fn insert(
        &mut self,
        key: MappingKey,
        member: MemberRef,
        result_types: &[&str],
        what: &str,
    ) -> Result<()> {
        if !result_types.contains(&key.result_type().as_str()) {
            return Err(Error::InvalidReflectionMapping(format!(
                "{key:?} never yields a {what}"
            )));
        }
        member.check(&key)?;
        match key {
            MappingKey::Method(method) => self.methods.insert(method, member),
            MappingKey::Field(field) => self.fields.insert(field, member),
        };
        Ok(())
    }

    pub fn method(&self, method: &MethodReference) -> Option<&MemberRef> {
        self.methods.get(method)
    }

    pub fn field(&self, field: &FieldReference) -> Option<&MemberRef> {
        self.fields.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.fields.is_empty()
    }
}

fn method_ref(
    owner: &str,
    name: &str,
    arguments: Vec<TypeDescriptor>,
    returns: &TypeDescriptor,
) -> MethodReference {
    MethodReference::new(
        ClassReference::new(owner),
        name,
        MethodDescriptor::new(returns.clone(), arguments),
    )
}

/// Operand stack slots a value takes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Word {
    Single,
    Wide,
}

impl Word {
    fn of(descriptor: &TypeDescriptor) -> Option<Word> {
        match descriptor.as_primitive() {
            Some(Primitive::Void) => None,
            Some(Primitive::Long | Primitive::Double) => Some(Word::Wide),
            _ => Some(Word::Single),
        }
    }

    fn of_vm(ty: VmType) -> Word {
        match ty {
            VmType::Long | VmType::Double => Word::Wide,
            _ => Word::Single,
        }
    }
}

/// An abstract value: a known constant, a tracked array, or an unknown of some size.
#[derive(Clone, Debug, PartialEq)]
enum Value {
    Unknown(Word),
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Class(TypeDescriptor),
    MethodType(MethodDescriptor),
    /// Index into the interpreter's array arena.
    Array(usize),
}

impl Value {
    fn word(&self) -> Word {
        match self {
            Value::Unknown(word) => *word,
            Value::Long(_) | Value::Double(_) => Word::Wide,
            _ => Word::Single,
        }
    }

    fn unknown(&self) -> Value {
        Value::Unknown(self.word())
    }

    fn zero(primitive: Primitive) -> Value {
        match primitive {
            Primitive::Long => Value::Long(0),
            Primitive::Float => Value::Float(0.0),
            Primitive::Double => Value::Double(0.0),
            _ => Value::Int(0),
        }
    }
}

#[derive(Clone, Debug)]
struct Frame {
    /// `None` is a slot with no usable value.
    locals: Vec<Option<Value>>,
    stack: Vec<Value>,
}

impl Frame {
    fn entry(is_static: bool, descriptor: &MethodDescriptor, max_locals: u16) -> Frame {
        let mut locals = Vec::with_capacity(max_locals as usize);
        if !is_static {
            locals.push(Some(Value::Unknown(Word::Single)));
        }
        for argument in descriptor.arguments() {
            let word = Word::of(argument).unwrap_or(Word::Single);
            locals.push(Some(Value::Unknown(word)));
            if word == Word::Wide {
                locals.push(None);
            }
        }
        if locals.len() < max_locals as usize {
            locals.resize(max_locals as usize, None);
        }
        Frame {
            locals,
            stack: Vec::new(),
        }
    }

    /// Entry of an exception handler: the thrown value and nothing known about locals.
    fn handler(max_locals: u16) -> Frame {
        Frame {
            locals: vec![None; max_locals as usize],
            stack: vec![Value::Unknown(Word::Single)],
        }
    }

    /// Forget every known value, keeping only sizes.
    fn widen(&mut self) {
        for local in self.locals.iter_mut().flatten() {
            *local = local.unknown();
        }
        for value in &mut self.stack {
            *value = value.unknown();
        }
    }
}

/// Arguments of one mapped call as seen by the interpreter.
struct Arguments<'a> {
    receiver: Option<&'a Value>,
    arguments: &'a [Value],
    arrays: &'a [Vec<Value>],
}

impl<'a> Arguments<'a> {
    fn get(&self, param: Param) -> Option<&'a Value> {
        match param {
            Param::Receiver => self.receiver,
            Param::Argument(index) => self.arguments.get(index as usize),
        }
    }

    fn class_array(&self, param: Param) -> Option<Vec<TypeDescriptor>> {
        let Value::Array(index) = self.get(param)? else {
            return None;
        };
        self.arrays
            .get(*index)?
            .iter()
            .map(|value| match value {
                Value::Class(descriptor) => Some(descriptor.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Inputs of one reflective scan.
pub(crate) struct ReflectiveScan<'a> {
    pub mapping: &'a ReflectionMapping,
    pub handler: &'a dyn DiagnosticHandler,
    pub location: &'a Location,
    pub is_static: bool,
    pub descriptor: &'a MethodDescriptor,
    pub max_locals: u16,
    /// Labels starting exception handlers.
    pub handlers: &'a [CodeLabel],
}

/// Abstract interpretation of one method body that resolves mapped reflective calls.
struct Interpreter<'a> {
    scan: &'a ReflectiveScan<'a>,
    frame: Option<Frame>,
    frames_at: HashMap<CodeLabel, Frame>,
    back_jump_targets: HashSet<CodeLabel>,
    arrays: Vec<Vec<Value>>,
    found: Vec<Reference>,
}

impl ReflectiveScan<'_> {
    /// References named by reflective calls in `insns`. Calls whose arguments are
    /// not known are reported as warnings and contribute nothing.
    pub(crate) fn run(&self, insns: &[InsnNode]) -> Result<Vec<Reference>> {
        if !self.calls_mapped_member(insns) {
            return Ok(Vec::new());
        }
        let mut interpreter = Interpreter {
            scan: self,
            frame: Some(Frame::entry(self.is_static, self.descriptor, self.max_locals)),
            frames_at: HashMap::new(),
            back_jump_targets: back_jump_targets(insns),
            arrays: Vec::new(),
            found: Vec::new(),
        };
        for node in insns {
            if !interpreter.enter(node) {
                trace!(location = %self.location, "stack shapes disagree, reflective scan stopped");
                break;
            }
            if interpreter.frame.is_some() {
                interpreter.execute(&node.insn)?;
            }
        }
        Ok(interpreter.found)
    }

    fn calls_mapped_member(&self, insns: &[InsnNode]) -> bool {
        insns.iter().any(|node| match &node.insn {
            Insn::Method(call) => self.mapping.method(call.method()).is_some(),
            Insn::Field { field, .. } => self.mapping.field(field).is_some(),
            _ => false,
        })
    }
}

/// Labels some later instruction jumps back to.
fn back_jump_targets(insns: &[InsnNode]) -> HashSet<CodeLabel> {
    let mut defined = HashSet::new();
    let mut targets = HashSet::new();
    for node in insns {
        defined.extend(node.labels().iter().cloned());
        for target in node.insn.jump_targets() {
            if defined.contains(target) {
                targets.insert(target.clone());
            }
        }
    }
    targets
}

impl Interpreter<'_> {
    /// Merge the frames recorded for the labels on `node`. False when they cannot be merged.
    fn enter(&mut self, node: &InsnNode) -> bool {
        for label in node.labels() {
            if let Some(recorded) = self.frames_at.remove(label) {
                let merged = match self.frame.take() {
                    None => Some(recorded),
                    Some(current) => merge(current, &recorded),
                };
                let Some(merged) = merged else {
                    return false;
                };
                self.frame = Some(merged);
            }
            if self.frame.is_none() && self.scan.handlers.contains(label) {
                self.frame = Some(Frame::handler(self.scan.max_locals));
            }
        }
        if node
            .labels()
            .iter()
            .any(|label| self.back_jump_targets.contains(label))
        {
            if let Some(frame) = &mut self.frame {
                frame.widen();
            }
        }
        true
    }

    fn stack(&mut self) -> &mut Vec<Value> {
        &mut self
            .frame
            .get_or_insert_with(|| Frame {
                locals: Vec::new(),
                stack: Vec::new(),
            })
            .stack
    }

    fn push(&mut self, value: Value) {
        self.stack().push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack().pop().unwrap_or(Value::Unknown(Word::Single))
    }

    fn pop_n(&mut self, count: usize) -> Vec<Value> {
        let mut values: Vec<Value> = (0..count).map(|_| self.pop()).collect();
        values.reverse();
        values
    }

    /// One wide value or two narrow ones, top of stack first.
    fn pop_two_words(&mut self) -> Vec<Value> {
        let top = self.pop();
        if top.word() == Word::Wide {
            vec![top]
        } else {
            vec![top, self.pop()]
        }
    }

    fn push_words(&mut self, values: &[Value]) {
        for value in values.iter().rev() {
            self.push(value.clone());
        }
    }

    fn local(&self, index: u16) -> Option<Value> {
        self.frame
            .as_ref()?
            .locals
            .get(index as usize)
            .cloned()
            .flatten()
    }

    fn set_local(&mut self, index: u16, value: Option<Value>) {
        let Some(frame) = &mut self.frame else {
            return;
        };
        let index = index as usize;
        let wide = value.as_ref().is_some_and(|value| value.word() == Word::Wide);
        let needed = index + if wide { 2 } else { 1 };
        if frame.locals.len() < needed {
            frame.locals.resize(needed, None);
        }
        frame.locals[index] = value;
        if wide {
            frame.locals[index + 1] = None;
        }
    }

    /// Record the current frame as flowing into `label`.
    fn flow_to(&mut self, label: &CodeLabel) -> Result<()> {
        let Some(frame) = self.frame.clone() else {
            return Ok(());
        };
        let snapshot = self.snapshot(&frame);
        let merged = match self.frames_at.remove(label) {
            None => Some(snapshot),
            Some(recorded) => merge(recorded, &snapshot),
        };
        match merged {
            Some(merged) => {
                self.frames_at.insert(label.clone(), merged);
            }
            None => {
                // unmergeable shapes: whatever arrives at the label is unknown
                self.frames_at.remove(label);
            }
        }
        Ok(())
    }

    /// Copy of `frame` with its own arrays, so later stores on this path do not leak into it.
    fn snapshot(&mut self, frame: &Frame) -> Frame {
        let mut copies = HashMap::new();
        let locals = frame
            .locals
            .iter()
            .map(|local| local.as_ref().map(|value| self.copy_value(value, &mut copies)))
            .collect();
        let stack = frame
            .stack
            .iter()
            .map(|value| self.copy_value(value, &mut copies))
            .collect();
        Frame { locals, stack }
    }

    fn copy_value(&mut self, value: &Value, copies: &mut HashMap<usize, usize>) -> Value {
        let Value::Array(index) = value else {
            return value.clone();
        };
        if let Some(copy) = copies.get(index) {
            return Value::Array(*copy);
        }
        let copy = self.arrays.len();
        copies.insert(*index, copy);
        self.arrays.push(Vec::new());
        let elements = self.arrays.get(*index).cloned().unwrap_or_default();
        let elements = elements
            .iter()
            .map(|element| self.copy_value(element, copies))
            .collect();
        self.arrays[copy] = elements;
        Value::Array(copy)
    }

    fn new_array(&mut self, count: Value, element: Value) -> Value {
        match count {
            Value::Int(count) if (0..=MAX_TRACKED_ARRAY).contains(&count) => {
                self.arrays.push(vec![element; count as usize]);
                Value::Array(self.arrays.len() - 1)
            }
            _ => Value::Unknown(Word::Single),
        }
    }

    fn execute(&mut self, insn: &Insn) -> Result<()> {
        match insn {
            Insn::Simple(simple) => self.simple(*simple),
            Insn::Constant(constant) => {
                let value = match constant {
                    Constant::Int(value) => Value::Int(*value),
                    Constant::Long(value) => Value::Long(*value),
                    Constant::Float(value) => Value::Float(*value),
                    Constant::Double(value) => Value::Double(*value),
                    Constant::String(value) => Value::String(value.clone()),
                    Constant::Class(class) => Value::Class(class.descriptor()),
                    Constant::MethodType(descriptor) => Value::MethodType(descriptor.clone()),
                    Constant::MethodHandle(_) => Value::Unknown(Word::Single),
                    Constant::Dynamic(dynamic) => {
                        Value::Unknown(Word::of(&dynamic.descriptor).unwrap_or(Word::Single))
                    }
                };
                self.push(value);
            }
            Insn::Typed(typed) => {
                let word = Word::of_vm(typed.ty());
                match typed.op() {
                    TypedOp::ArrayLoad => {
                        let index = self.pop();
                        let array = self.pop();
                        let loaded = match (&array, &index) {
                            (Value::Array(array), Value::Int(index)) => self
                                .arrays
                                .get(*array)
                                .and_then(|elements| elements.get(usize::try_from(*index).ok()?))
                                .cloned(),
                            _ => None,
                        };
                        self.push(loaded.unwrap_or(Value::Unknown(word)));
                    }
                    TypedOp::ArrayStore => {
                        let value = self.pop();
                        let index = self.pop();
                        let array = self.pop();
                        if let (Value::Array(array), Value::Int(index)) = (array, index) {
                            if let Some(slot) = usize::try_from(index)
                                .ok()
                                .and_then(|index| self.arrays.get_mut(array)?.get_mut(index))
                            {
                                *slot = value;
                            }
                        }
                    }
                    TypedOp::Neg => {
                        self.pop();
                        self.push(Value::Unknown(word));
                    }
                    TypedOp::Return => self.frame = None,
                    TypedOp::Compare | TypedOp::CompareL | TypedOp::CompareG => {
                        self.pop_n(2);
                        self.push(Value::Unknown(Word::Single));
                    }
                    _ => {
                        self.pop_n(2);
                        self.push(Value::Unknown(word));
                    }
                }
            }
            Insn::Cast(cast) => {
                self.pop();
                self.push(Value::Unknown(Word::of_vm(cast.to())));
            }
            Insn::Var(var) => match var.op() {
                VarOp::Load => {
                    let value = self
                        .local(var.index())
                        .unwrap_or(Value::Unknown(Word::of_vm(var.ty())));
                    self.push(value);
                }
                VarOp::Store => {
                    let value = self.pop();
                    self.set_local(var.index(), Some(value));
                }
            },
            Insn::Ret(_) => self.frame = None,
            Insn::Iinc(iinc) => self.set_local(iinc.index(), Some(Value::Unknown(Word::Single))),
            Insn::Jump { op, target } => {
                self.pop_n(op.operands());
                if *op == JumpOp::Jsr {
                    self.push(Value::Unknown(Word::Single));
                }
                self.flow_to(target)?;
                if matches!(op, JumpOp::Goto | JumpOp::Jsr) {
                    self.frame = None;
                }
            }
            Insn::TableSwitch(_) | Insn::LookupSwitch(_) => {
                self.pop();
                for target in insn.jump_targets() {
                    self.flow_to(target)?;
                }
                self.frame = None;
            }
            Insn::Field { op, field } => match op {
                FieldOp::PutStatic => {
                    self.pop();
                }
                FieldOp::PutField => {
                    self.pop_n(2);
                }
                FieldOp::GetStatic | FieldOp::GetField => {
                    let receiver = (*op == FieldOp::GetField).then(|| self.pop());
                    let fallback =
                        Value::Unknown(Word::of(&field.descriptor).unwrap_or(Word::Single));
                    let value = match self.scan.mapping.field(field) {
                        Some(member) => self.resolve(member, receiver.as_ref(), &[])?,
                        None => None,
                    };
                    self.push(value.unwrap_or(fallback));
                }
            },
            Insn::Method(call) => {
                let method = call.method();
                let arguments = self.pop_n(method.descriptor.arguments().len());
                let receiver = (call.op() != InvokeOp::Static).then(|| self.pop());
                let value = match self.scan.mapping.method(method) {
                    Some(member) => self.resolve(member, receiver.as_ref(), &arguments)?,
                    None => None,
                };
                if let Some(word) = Word::of(method.descriptor.return_type()) {
                    self.push(value.unwrap_or(Value::Unknown(word)));
                }
            }
            Insn::InvokeDynamic(dynamic) => {
                self.pop_n(dynamic.descriptor.arguments().len());
                if let Some(word) = Word::of(dynamic.descriptor.return_type()) {
                    self.push(Value::Unknown(word));
                }
            }
            Insn::Type(type_insn) => match type_insn.op() {
                TypeOp::New => self.push(Value::Unknown(Word::Single)),
                TypeOp::ANewArray => {
                    let count = self.pop();
                    let array = self.new_array(count, Value::Null);
                    self.push(array);
                }
                TypeOp::CheckCast => {}
                TypeOp::InstanceOf => {
                    self.pop();
                    self.push(Value::Unknown(Word::Single));
                }
            },
            Insn::NewArray(primitive) => {
                let count = self.pop();
                let array = self.new_array(count, Value::zero(*primitive));
                self.push(array);
            }
            Insn::MultiANewArray(multi) => {
                self.pop_n(multi.dimensions() as usize);
                self.push(Value::Unknown(Word::Single));
            }
        }
        Ok(())
    }

    fn simple(&mut self, simple: SimpleInsn) {
        match simple {
            SimpleInsn::Nop => {}
            SimpleInsn::AconstNull => self.push(Value::Null),
            SimpleInsn::ArrayLength => {
                self.pop();
                self.push(Value::Unknown(Word::Single));
            }
            SimpleInsn::AThrow | SimpleInsn::Return => self.frame = None,
            SimpleInsn::MonitorEnter | SimpleInsn::MonitorExit | SimpleInsn::Pop => {
                self.pop();
            }
            SimpleInsn::Pop2 => {
                self.pop_two_words();
            }
            SimpleInsn::Dup => {
                let value = self.pop();
                self.push(value.clone());
                self.push(value);
            }
            SimpleInsn::DupX1 => {
                let first = self.pop();
                let second = self.pop();
                self.push(first.clone());
                self.push(second);
                self.push(first);
            }
            SimpleInsn::DupX2 => {
                let first = self.pop();
                let below = self.pop_two_words();
                self.push(first.clone());
                self.push_words(&below);
                self.push(first);
            }
            SimpleInsn::Dup2 => {
                let top = self.pop_two_words();
                self.push_words(&top);
                self.push_words(&top);
            }
            SimpleInsn::Dup2X1 => {
                let top = self.pop_two_words();
                let below = self.pop();
                self.push_words(&top);
                self.push(below);
                self.push_words(&top);
            }
            SimpleInsn::Dup2X2 => {
                let top = self.pop_two_words();
                let below = self.pop_two_words();
                self.push_words(&top);
                self.push_words(&below);
                self.push_words(&top);
            }
            SimpleInsn::Swap => {
                let first = self.pop();
                let second = self.pop();
                self.push(first);
                self.push(second);
            }
        }
    }

    /// Resolve a mapped call, recording what it names. Returns the value it produces, if known.
    fn resolve(
        &mut self,
        member: &MemberRef,
        receiver: Option<&Value>,
        arguments: &[Value],
    ) -> Result<Option<Value>> {
        let args = Arguments {
            receiver,
            arguments,
            arrays: &self.arrays,
        };
        match member.resolve(&args) {
            None => {
                self.scan
                    .handler
                    .handle(&member.unresolvable(self.scan.location.clone()))?;
                Ok(None)
            }
            Some(Resolved::Class(descriptor)) => {
                if let Some(class) = ClassReference::from_type(&descriptor) {
                    self.found.push(class.into());
                }
                Ok(Some(Value::Class(descriptor)))
            }
            Some(Resolved::Member(reference)) => {
                self.found.push(reference);
                Ok(None)
            }
        }
    }
}

/// Join two frames reaching the same point. `None` when their stacks disagree in shape.
fn merge(mut into: Frame, other: &Frame) -> Option<Frame> {
    if into.stack.len() != other.stack.len() {
        return None;
    }
    for (value, incoming) in into.stack.iter_mut().zip(&other.stack) {
        if value != incoming {
            if value.word() != incoming.word() {
                return None;
            }
            *value = value.unknown();
        }
    }
    if into.locals.len() < other.locals.len() {
        into.locals.resize(other.locals.len(), None);
    }
    for (index, local) in into.locals.iter_mut().enumerate() {
        let incoming = other.locals.get(index).cloned().flatten();
        *local = match (local.take(), incoming) {
            (Some(value), Some(incoming)) if value == incoming => Some(value),
            (Some(value), Some(incoming)) if value.word() == incoming.word() => {
                Some(value.unknown())
            }
            _ => None,
        };
    }
    Some(into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::CollectingDiagnosticHandler;
    use crate::ir::{MethodInsn, TypeInsn, TypedInsn, VarInsn};

    fn descriptor(text: &str) -> MethodDescriptor {
        MethodDescriptor::parse(text).expect("parse descriptor")
    }

    fn call(op: InvokeOp, owner: &str, name: &str, desc: &str) -> InsnNode {
        let method = MethodReference::new(ClassReference::new(owner), name, descriptor(desc));
        InsnNode::new(Insn::Method(
            MethodInsn::new(op, method, false).expect("build call"),
        ))
    }

    fn ldc_string(value: &str) -> InsnNode {
        InsnNode::new(Insn::Constant(Constant::String(value.to_string())))
    }

    fn ldc_class(name: &str) -> InsnNode {
        InsnNode::new(Insn::Constant(Constant::Class(ClassReference::new(name))))
    }

    fn int(value: i32) -> InsnNode {
        InsnNode::new(Insn::Constant(Constant::Int(value)))
    }

    fn simple(insn: SimpleInsn) -> InsnNode {
        InsnNode::new(Insn::Simple(insn))
    }

    fn scan(insns: &[InsnNode], handler: &CollectingDiagnosticHandler) -> Vec<Reference> {
        let mapping = ReflectionMapping::with_defaults();
        let location = Location::None;
        let method_descriptor = descriptor("()V");
        let scan = ReflectiveScan {
            mapping: &mapping,
            handler,
            location: &location,
            is_static: true,
            descriptor: &method_descriptor,
            max_locals: 4,
            handlers: &[],
        };
        scan.run(insns).expect("scan")
    }

    const FOR_NAME: &str = "(Ljava/lang/String;)Ljava/lang/Class;";

    #[test]
    fn for_name_with_constant_string_names_class() {
        let handler = CollectingDiagnosticHandler::new();
        let found = scan(
            &[
                ldc_string("com.acme.Plugin"),
                call(InvokeOp::Static, "java/lang/Class", "forName", FOR_NAME),
                simple(SimpleInsn::Pop),
                simple(SimpleInsn::Return),
            ],
            &handler,
        );
        assert_eq!(found, vec![Reference::from(ClassReference::new("com/acme/Plugin"))]);
        assert!(handler.is_empty());
    }

    #[test]
    fn strings_survive_local_variables() {
        let handler = CollectingDiagnosticHandler::new();
        let store = VarInsn::new(VarOp::Store, VmType::Reference, 1).expect("store");
        let load = VarInsn::new(VarOp::Load, VmType::Reference, 1).expect("load");
        let found = scan(
            &[
                ldc_string("a.B"),
                InsnNode::new(Insn::Var(store)),
                InsnNode::new(Insn::Var(load)),
                call(InvokeOp::Static, "java/lang/Class", "forName", FOR_NAME),
                simple(SimpleInsn::Pop),
                simple(SimpleInsn::Return),
            ],
            &handler,
        );
        assert_eq!(found, vec![Reference::from(ClassReference::new("a/B"))]);
    }

    #[test]
    fn unknown_argument_reports_warning_and_adds_nothing() {
        let handler = CollectingDiagnosticHandler::new();
        let load = VarInsn::new(VarOp::Load, VmType::Reference, 0).expect("load");
        let found = scan(
            &[
                InsnNode::new(Insn::Var(load)),
                call(InvokeOp::Static, "java/lang/Class", "forName", FOR_NAME),
                simple(SimpleInsn::Pop),
                simple(SimpleInsn::Return),
            ],
            &handler,
        );
        assert!(found.is_empty());
        let diagnostics = handler.take();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].id(), "UNRESOLVABLE_REFLECTION_CLASS");
    }

    #[test]
    fn get_method_with_constant_class_array_names_partial_method() {
        let handler = CollectingDiagnosticHandler::new();
        let array = TypeInsn::new(TypeOp::ANewArray, ClassReference::new("java/lang/Class"))
            .expect("anewarray");
        let store = TypedInsn::new(TypedOp::ArrayStore, VmType::Reference).expect("aastore");
        let found = scan(
            &[
                ldc_class("a/Target"),
                ldc_string("run"),
                int(1),
                InsnNode::new(Insn::Type(array)),
                simple(SimpleInsn::Dup),
                int(0),
                InsnNode::new(Insn::Field {
                    op: FieldOp::GetStatic,
                    field: FieldReference::new(
                        ClassReference::new("java/lang/Integer"),
                        "TYPE",
                        TypeDescriptor::object("java/lang/Class"),
                    ),
                }),
                InsnNode::new(Insn::Typed(store)),
                call(
                    InvokeOp::Virtual,
                    "java/lang/Class",
                    "getMethod",
                    "(Ljava/lang/String;[Ljava/lang/Class;)Ljava/lang/reflect/Method;",
                ),
                simple(SimpleInsn::Pop),
                simple(SimpleInsn::Return),
            ],
            &handler,
        );
        assert!(handler.is_empty(), "{:?}", handler.take());
        assert_eq!(
            found,
            vec![Reference::from(PartialMethodReference::new(
                ClassReference::new("a/Target"),
                "run",
                PartialMethodDescriptor::parse("(I)").expect("parse partial"),
            ))]
        );
    }

    #[test]
    fn get_field_on_class_constant_names_partial_field() {
        let handler = CollectingDiagnosticHandler::new();
        let found = scan(
            &[
                ldc_class("a/Target"),
                ldc_string("count"),
                call(
                    InvokeOp::Virtual,
                    "java/lang/Class",
                    "getDeclaredField",
                    "(Ljava/lang/String;)Ljava/lang/reflect/Field;",
                ),
                simple(SimpleInsn::Pop),
                simple(SimpleInsn::Return),
            ],
            &handler,
        );
        assert_eq!(
            found,
            vec![Reference::from(PartialFieldReference::new(
                ClassReference::new("a/Target"),
                "count"
            ))]
        );
    }

    #[test]
    fn values_are_forgotten_at_back_jump_targets() {
        let handler = CollectingDiagnosticHandler::new();
        let head = CodeLabel::new();
        let store = VarInsn::new(VarOp::Store, VmType::Reference, 1).expect("store");
        let load = VarInsn::new(VarOp::Load, VmType::Reference, 1).expect("load");
        let mut loop_head = InsnNode::new(Insn::Var(load));
        loop_head.add_label(&head).expect("bind");
        let found = scan(
            &[
                ldc_string("a.B"),
                InsnNode::new(Insn::Var(store)),
                loop_head,
                call(InvokeOp::Static, "java/lang/Class", "forName", FOR_NAME),
                simple(SimpleInsn::Pop),
                InsnNode::new(Insn::Jump {
                    op: JumpOp::Goto,
                    target: head.clone(),
                }),
            ],
            &handler,
        );
        assert!(found.is_empty());
        assert_eq!(handler.len(), 1);
    }

    #[test]
    fn forward_branches_merge_equal_constants() {
        let handler = CollectingDiagnosticHandler::new();
        let join = CodeLabel::new();
        let mut joined = call(InvokeOp::Static, "java/lang/Class", "forName", FOR_NAME);
        joined.add_label(&join).expect("bind");
        let found = scan(
            &[
                int(0),
                ldc_string("a.B"),
                simple(SimpleInsn::Swap),
                InsnNode::new(Insn::Jump {
                    op: JumpOp::IfEq,
                    target: join.clone(),
                }),
                joined,
                simple(SimpleInsn::Pop),
                simple(SimpleInsn::Return),
            ],
            &handler,
        );
        assert_eq!(found, vec![Reference::from(ClassReference::new("a/B"))]);
    }

    #[test]
    fn mappings_reject_mistyped_parameters() {
        let mut mapping = ReflectionMapping::new();
        let lookup = MethodReference::new(
            ClassReference::new("a/Registry"),
            "lookup",
            descriptor("(I)Ljava/lang/Class;"),
        );
        assert!(matches!(
            mapping.add_class(
                lookup.clone(),
                ClassRef::Named(StringRef::Param(Param::Argument(0)))
            ),
            Err(Error::InvalidReflectionMapping(_))
        ));
        assert!(
            mapping
                .add_class(lookup.clone(), ClassRef::Named(StringRef::Constant("a.B".to_string())))
                .is_ok()
        );
        assert!(mapping.method(&lookup).is_some());

        let not_a_field = MethodReference::new(
            ClassReference::new("a/Registry"),
            "field",
            descriptor("(Ljava/lang/String;)Ljava/lang/String;"),
        );
        assert!(
            mapping
                .add_field(
                    not_a_field,
                    ClassRef::Param(Param::Receiver),
                    StringRef::Param(Param::Argument(0)),
                    None
                )
                .is_err()
        );
    }

    #[test]
    fn defaults_cover_declared_lookups_and_boxed_types() {
        let mapping = ReflectionMapping::with_defaults();
        let declared = MethodReference::new(
            ClassReference::new("java/lang/Class"),
            "getDeclaredConstructor",
            descriptor("([Ljava/lang/Class;)Ljava/lang/reflect/Constructor;"),
        );
        assert!(mapping.method(&declared).is_some());
        let boolean_type = FieldReference::new(
            ClassReference::new("java/lang/Boolean"),
            "TYPE",
            TypeDescriptor::object("java/lang/Class"),
        );
        assert_eq!(
            mapping.field(&boolean_type),
            Some(&MemberRef::Class(ClassRef::primitive(Primitive::Boolean)))
        );
    }
}
