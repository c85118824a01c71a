//! Instruction sum type.
//!
//! Each variant carries only the operands of its opcode family. Variants whose
//! operands have cross-field constraints wrap a struct with private fields and a
//! checked constructor, so an invalid instruction cannot be built.

use crate::ir::code::CodeLabel;
use crate::ir::constant::{Constant, ConstantMethodHandle};
use crate::reference::{ClassReference, FieldReference, MethodReference};
use crate::types::{MethodDescriptor, Primitive};
use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub enum Insn {
    Simple(SimpleInsn),
    /// `iconst_*`, `bipush`, `sipush`, `lconst_*`, `fconst_*`, `dconst_*`, `ldc*`.
    Constant(Constant),
    Typed(TypedInsn),
    Cast(CastInsn),
    Var(VarInsn),
    Ret(VarIndex),
    Iinc(IincInsn),
    Jump { op: JumpOp, target: CodeLabel },
    TableSwitch(TableSwitchInsn),
    LookupSwitch(LookupSwitchInsn),
    Field { op: FieldOp, field: FieldReference },
    Method(MethodInsn),
    InvokeDynamic(InvokeDynamicInsn),
    Type(TypeInsn),
    NewArray(Primitive),
    MultiANewArray(MultiANewArrayInsn),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimpleInsn {
    Nop,
    AconstNull,
    ArrayLength,
    AThrow,
    MonitorEnter,
    MonitorExit,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    Return,
}

/// Computational types named by typed opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VmType {
    Int,
    Long,
    Float,
    Double,
    Reference,
    Byte,
    Char,
    Short,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypedOp {
    ArrayLoad,
    ArrayStore,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    Shl,
    Shr,
    Ushr,
    And,
    Or,
    Xor,
    Return,
    /// `lcmp`
    Compare,
    /// `fcmpl`, `dcmpl`
    CompareL,
    /// `fcmpg`, `dcmpg`
    CompareG,
}

impl TypedOp {
    fn allows(self, ty: VmType) -> bool {
        use VmType::*;
        match self {
            TypedOp::ArrayLoad | TypedOp::ArrayStore => true,
            TypedOp::Add
            | TypedOp::Sub
            | TypedOp::Mul
            | TypedOp::Div
            | TypedOp::Rem
            | TypedOp::Neg => matches!(ty, Int | Long | Float | Double),
            TypedOp::Shl
            | TypedOp::Shr
            | TypedOp::Ushr
            | TypedOp::And
            | TypedOp::Or
            | TypedOp::Xor => matches!(ty, Int | Long),
            TypedOp::Return => matches!(ty, Int | Long | Float | Double | Reference),
            TypedOp::Compare => ty == Long,
            TypedOp::CompareL | TypedOp::CompareG => matches!(ty, Float | Double),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypedInsn {
    op: TypedOp,
    ty: VmType,
}

impl TypedInsn {
    pub fn new(op: TypedOp, ty: VmType) -> Result<Self> {
        if !op.allows(ty) {
            return Err(Error::InvalidInsn(format!("{op:?} does not take {ty:?}")));
        }
        Ok(TypedInsn { op, ty })
    }

    pub fn op(&self) -> TypedOp {
        self.op
    }

    pub fn ty(&self) -> VmType {
        self.ty
    }
}

/// `x2y` conversions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CastInsn {
    from: VmType,
    to: VmType,
}

impl CastInsn {
    pub fn new(from: VmType, to: VmType) -> Result<Self> {
        use VmType::*;
        let valid = matches!(
            (from, to),
            (Int, Long | Float | Double | Byte | Char | Short)
                | (Long, Int | Float | Double)
                | (Float, Int | Long | Double)
                | (Double, Int | Long | Float)
        );
        if !valid {
            return Err(Error::InvalidInsn(format!(
                "no conversion from {from:?} to {to:?}"
            )));
        }
        Ok(CastInsn { from, to })
    }

    pub fn from(&self) -> VmType {
        self.from
    }

    pub fn to(&self) -> VmType {
        self.to
    }
}

/// A local variable slot, always within `0..=65535`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarIndex(u16);

impl VarIndex {
    pub fn new(index: u32) -> Result<Self> {
        u16::try_from(index)
            .map(VarIndex)
            .map_err(|_| Error::InvalidInsn(format!("variable index {index} out of range")))
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarOp {
    Load,
    Store,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VarInsn {
    op: VarOp,
    ty: VmType,
    index: VarIndex,
}

impl VarInsn {
    pub fn new(op: VarOp, ty: VmType, index: u32) -> Result<Self> {
        if !matches!(
            ty,
            VmType::Int | VmType::Long | VmType::Float | VmType::Double | VmType::Reference
        ) {
            return Err(Error::InvalidInsn(format!("{op:?} does not take {ty:?}")));
        }
        Ok(VarInsn {
            op,
            ty,
            index: VarIndex::new(index)?,
        })
    }

    pub fn op(&self) -> VarOp {
        self.op
    }

    pub fn ty(&self) -> VmType {
        self.ty
    }

    pub fn index(&self) -> u16 {
        self.index.get()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IincInsn {
    index: VarIndex,
    value: i16,
}

impl IincInsn {
    pub fn new(index: u32, value: i32) -> Result<Self> {
        let value = i16::try_from(value)
            .map_err(|_| Error::InvalidInsn(format!("iinc value {value} out of range")))?;
        Ok(IincInsn {
            index: VarIndex::new(index)?,
            value,
        })
    }

    pub fn index(&self) -> u16 {
        self.index.get()
    }

    pub fn value(&self) -> i16 {
        self.value
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JumpOp {
    IfEq,
    IfNe,
    IfLt,
    IfGe,
    IfGt,
    IfLe,
    IfICmpEq,
    IfICmpNe,
    IfICmpLt,
    IfICmpGe,
    IfICmpGt,
    IfICmpLe,
    IfACmpEq,
    IfACmpNe,
    Goto,
    Jsr,
    IfNull,
    IfNonNull,
}

impl JumpOp {
    /// Operand stack values consumed by the comparison.
    pub fn operands(self) -> usize {
        match self {
            JumpOp::Goto | JumpOp::Jsr => 0,
            JumpOp::IfEq
            | JumpOp::IfNe
            | JumpOp::IfLt
            | JumpOp::IfGe
            | JumpOp::IfGt
            | JumpOp::IfLe
            | JumpOp::IfNull
            | JumpOp::IfNonNull => 1,
            _ => 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableSwitchInsn {
    pub min: i32,
    pub max: i32,
    pub default: CodeLabel,
    pub labels: Vec<CodeLabel>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LookupSwitchInsn {
    pub default: CodeLabel,
    pub pairs: Vec<(i32, CodeLabel)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldOp {
    GetStatic,
    PutStatic,
    GetField,
    PutField,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvokeOp {
    Virtual,
    Special,
    Static,
    Interface,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodInsn {
    op: InvokeOp,
    method: MethodReference,
    is_interface: bool,
}

impl MethodInsn {
    pub fn new(op: InvokeOp, method: MethodReference, is_interface: bool) -> Result<Self> {
        check_invocation(op, &method, is_interface)?;
        Ok(MethodInsn {
            op,
            method,
            is_interface,
        })
    }

    pub fn op(&self) -> InvokeOp {
        self.op
    }

    pub fn method(&self) -> &MethodReference {
        &self.method
    }

    pub fn is_interface(&self) -> bool {
        self.is_interface
    }

    /// Replace the target, re-checking the invocation rules.
    pub fn set_method(&mut self, method: MethodReference) -> Result<()> {
        check_invocation(self.op, &method, self.is_interface)?;
        self.method = method;
        Ok(())
    }
}

fn check_invocation(op: InvokeOp, method: &MethodReference, is_interface: bool) -> Result<()> {
    if method.is_static_initializer() {
        return Err(Error::InvalidInsn(format!("{method} cannot be invoked")));
    }
    if method.is_constructor() {
        if op != InvokeOp::Special {
            return Err(Error::InvalidInsn(format!(
                "{method} can only be invoked with invokespecial"
            )));
        }
        if method.owner.is_array() || is_interface {
            return Err(Error::InvalidInsn(format!(
                "{method} is not a constructor of a class"
            )));
        }
    }
    if op == InvokeOp::Interface && !is_interface {
        return Err(Error::InvalidInsn(format!(
            "invokeinterface requires an interface method, found {method}"
        )));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
pub struct InvokeDynamicInsn {
    pub name: String,
    pub descriptor: MethodDescriptor,
    pub bootstrap: ConstantMethodHandle,
    pub arguments: Vec<Constant>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeOp {
    New,
    ANewArray,
    CheckCast,
    InstanceOf,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeInsn {
    op: TypeOp,
    class: ClassReference,
}

impl TypeInsn {
    pub fn new(op: TypeOp, class: ClassReference) -> Result<Self> {
        check_type_insn(op, &class)?;
        Ok(TypeInsn { op, class })
    }

    pub fn op(&self) -> TypeOp {
        self.op
    }

    pub fn class(&self) -> &ClassReference {
        &self.class
    }

    pub fn set_class(&mut self, class: ClassReference) -> Result<()> {
        check_type_insn(self.op, &class)?;
        self.class = class;
        Ok(())
    }
}

fn check_type_insn(op: TypeOp, class: &ClassReference) -> Result<()> {
    if op == TypeOp::New && class.is_array() {
        return Err(Error::InvalidInsn(format!("cannot create array {class} with new")));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
pub struct MultiANewArrayInsn {
    class: ClassReference,
    dimensions: u8,
}

impl MultiANewArrayInsn {
    pub fn new(class: ClassReference, dimensions: u32) -> Result<Self> {
        check_multi_array(&class, dimensions)?;
        Ok(MultiANewArrayInsn {
            class,
            dimensions: dimensions as u8,
        })
    }

    pub fn class(&self) -> &ClassReference {
        &self.class
    }

    pub fn dimensions(&self) -> u8 {
        self.dimensions
    }

    pub fn set_class(&mut self, class: ClassReference) -> Result<()> {
        check_multi_array(&class, u32::from(self.dimensions))?;
        self.class = class;
        Ok(())
    }
}

fn check_multi_array(class: &ClassReference, dimensions: u32) -> Result<()> {
    if !(1..=255).contains(&dimensions) {
        return Err(Error::InvalidInsn(format!(
            "multianewarray dimensions {dimensions} out of range"
        )));
    }
    let depth = class.descriptor().array_dimensions();
    if depth < dimensions as usize {
        return Err(Error::InvalidInsn(format!(
            "{class} has fewer than {dimensions} dimensions"
        )));
    }
    Ok(())
}

impl Insn {
    /// True when execution never falls through to the next instruction.
    pub fn ends_flow(&self) -> bool {
        match self {
            Insn::Simple(SimpleInsn::AThrow | SimpleInsn::Return) => true,
            Insn::Typed(typed) => typed.op() == TypedOp::Return,
            Insn::Jump { op, .. } => *op == JumpOp::Goto,
            Insn::Ret(_) | Insn::TableSwitch(_) | Insn::LookupSwitch(_) => true,
            _ => false,
        }
    }

    /// Labels this instruction may transfer control to.
    pub fn jump_targets(&self) -> Vec<&CodeLabel> {
        match self {
            Insn::Jump { target, .. } => vec![target],
            Insn::TableSwitch(switch) => std::iter::once(&switch.default)
                .chain(switch.labels.iter())
                .collect(),
            Insn::LookupSwitch(switch) => std::iter::once(&switch.default)
                .chain(switch.pairs.iter().map(|(_, label)| label))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Element type of a `newarray` operand.
pub fn primitive_for_array_type(code: u8) -> Option<Primitive> {
    Some(match code {
        4 => Primitive::Boolean,
        5 => Primitive::Char,
        6 => Primitive::Float,
        7 => Primitive::Double,
        8 => Primitive::Byte,
        9 => Primitive::Short,
        10 => Primitive::Int,
        11 => Primitive::Long,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(owner: &str, name: &str) -> MethodReference {
        MethodReference::new(
            ClassReference::new(owner),
            name,
            MethodDescriptor::parse("()V").expect("parse descriptor"),
        )
    }

    #[test]
    fn var_index_must_fit_u16() {
        assert!(VarInsn::new(VarOp::Load, VmType::Int, 65_535).is_ok());
        assert!(VarInsn::new(VarOp::Load, VmType::Int, 65_536).is_err());
        assert!(VarInsn::new(VarOp::Store, VmType::Byte, 1).is_err());
    }

    #[test]
    fn iinc_value_must_fit_i16() {
        assert!(IincInsn::new(3, -32_768).is_ok());
        assert!(IincInsn::new(3, 32_768).is_err());
    }

    #[test]
    fn typed_and_cast_insns_check_type_sets() {
        assert!(TypedInsn::new(TypedOp::Shl, VmType::Int).is_ok());
        assert!(TypedInsn::new(TypedOp::Shl, VmType::Float).is_err());
        assert!(TypedInsn::new(TypedOp::Compare, VmType::Double).is_err());
        assert!(CastInsn::new(VmType::Int, VmType::Char).is_ok());
        assert!(CastInsn::new(VmType::Long, VmType::Byte).is_err());
        assert!(CastInsn::new(VmType::Int, VmType::Int).is_err());
    }

    #[test]
    fn constructors_only_via_invokespecial_on_classes() {
        assert!(MethodInsn::new(InvokeOp::Special, method("a/A", "<init>"), false).is_ok());
        assert!(MethodInsn::new(InvokeOp::Virtual, method("a/A", "<init>"), false).is_err());
        assert!(MethodInsn::new(InvokeOp::Special, method("[La/A;", "<init>"), false).is_err());
        assert!(MethodInsn::new(InvokeOp::Special, method("a/I", "<init>"), true).is_err());
        assert!(MethodInsn::new(InvokeOp::Static, method("a/A", "<clinit>"), false).is_err());
    }

    #[test]
    fn invokeinterface_requires_interface_method() {
        assert!(MethodInsn::new(InvokeOp::Interface, method("a/I", "run"), true).is_ok());
        assert!(MethodInsn::new(InvokeOp::Interface, method("a/A", "run"), false).is_err());
    }

    #[test]
    fn set_method_rechecks_rules() {
        let mut insn =
            MethodInsn::new(InvokeOp::Virtual, method("a/A", "run"), false).expect("build");
        assert!(insn.set_method(method("a/A", "<init>")).is_err());
        assert_eq!(&*insn.method().name, "run");
    }

    #[test]
    fn new_rejects_arrays_and_multianewarray_checks_depth() {
        assert!(TypeInsn::new(TypeOp::New, ClassReference::new("[I")).is_err());
        assert!(TypeInsn::new(TypeOp::ANewArray, ClassReference::new("[I")).is_ok());
        assert!(MultiANewArrayInsn::new(ClassReference::new("[[I"), 2).is_ok());
        assert!(MultiANewArrayInsn::new(ClassReference::new("[[I"), 3).is_err());
        assert!(MultiANewArrayInsn::new(ClassReference::new("[[I"), 0).is_err());
    }
}
