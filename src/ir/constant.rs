use crate::reference::{ClassReference, FieldReference, MethodReference};
use crate::types::{MethodDescriptor, TypeDescriptor};
use crate::{Error, Result};

/// A loadable constant: `ldc` operands, bootstrap arguments and `ConstantValue`s.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Class(ClassReference),
    MethodType(MethodDescriptor),
    MethodHandle(ConstantMethodHandle),
    Dynamic(ConstantDynamic),
}

/// Field access kinds of `CONSTANT_MethodHandle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldHandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
}

/// Method invocation kinds of `CONSTANT_MethodHandle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MethodHandleKind {
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConstantMethodHandle {
    Field {
        kind: FieldHandleKind,
        field: FieldReference,
    },
    Method {
        kind: MethodHandleKind,
        method: MethodReference,
        is_interface: bool,
    },
}

impl ConstantMethodHandle {
    pub fn field(kind: FieldHandleKind, field: FieldReference) -> Self {
        ConstantMethodHandle::Field { kind, field }
    }

    pub fn method(kind: MethodHandleKind, method: MethodReference, is_interface: bool) -> Result<Self> {
        if method.is_static_initializer() {
            return Err(Error::InvalidInsn(format!(
                "method handle cannot refer to {method}"
            )));
        }
        match kind {
            MethodHandleKind::NewInvokeSpecial => {
                if !method.is_constructor() || is_interface || method.owner.is_array() {
                    return Err(Error::InvalidInsn(format!(
                        "newInvokeSpecial handle must refer to a class constructor, found {method}"
                    )));
                }
            }
            _ if method.is_constructor() => {
                return Err(Error::InvalidInsn(format!(
                    "only newInvokeSpecial handles may refer to {method}"
                )));
            }
            MethodHandleKind::InvokeVirtual if is_interface => {
                return Err(Error::InvalidInsn(format!(
                    "invokeVirtual handle cannot refer to interface method {method}"
                )));
            }
            MethodHandleKind::InvokeInterface if !is_interface => {
                return Err(Error::InvalidInsn(format!(
                    "invokeInterface handle requires an interface method, found {method}"
                )));
            }
            _ => {}
        }
        Ok(ConstantMethodHandle::Method {
            kind,
            method,
            is_interface,
        })
    }

    /// The `reference_kind` byte of the class file encoding.
    pub fn reference_kind(&self) -> u8 {
        match self {
            ConstantMethodHandle::Field { kind, .. } => match kind {
                FieldHandleKind::GetField => 1,
                FieldHandleKind::GetStatic => 2,
                FieldHandleKind::PutField => 3,
                FieldHandleKind::PutStatic => 4,
            },
            ConstantMethodHandle::Method { kind, .. } => match kind {
                MethodHandleKind::InvokeVirtual => 5,
                MethodHandleKind::InvokeStatic => 6,
                MethodHandleKind::InvokeSpecial => 7,
                MethodHandleKind::NewInvokeSpecial => 8,
                MethodHandleKind::InvokeInterface => 9,
            },
        }
    }
}

/// `CONSTANT_Dynamic`: a constant computed by a bootstrap method.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstantDynamic {
    pub name: String,
    pub descriptor: TypeDescriptor,
    pub bootstrap: ConstantMethodHandle,
    pub arguments: Vec<Constant>,
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
    fn constructor_handles_need_new_invoke_special() {
        assert!(
            ConstantMethodHandle::method(
                MethodHandleKind::NewInvokeSpecial,
                method("a/A", "<init>"),
                false
            )
            .is_ok()
        );
        assert!(
            ConstantMethodHandle::method(
                MethodHandleKind::InvokeSpecial,
                method("a/A", "<init>"),
                false
            )
            .is_err()
        );
        assert!(
            ConstantMethodHandle::method(
                MethodHandleKind::NewInvokeSpecial,
                method("a/A", "run"),
                false
            )
            .is_err()
        );
    }

    #[test]
    fn interface_kind_must_match_handle_kind() {
        assert!(
            ConstantMethodHandle::method(
                MethodHandleKind::InvokeInterface,
                method("a/I", "run"),
                false
            )
            .is_err()
        );
        assert!(
            ConstantMethodHandle::method(
                MethodHandleKind::InvokeVirtual,
                method("a/I", "run"),
                true
            )
            .is_err()
        );
        assert!(
            ConstantMethodHandle::method(
                MethodHandleKind::InvokeStatic,
                method("a/A", "<clinit>"),
                false
            )
            .is_err()
        );
    }
}
