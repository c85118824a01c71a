//! Mutable intermediate representation of class files.
//!
//! A [`ClassFile`] owns its members directly. Method bodies are shared handles
//! ([`ClassCode`], [`InsnList`]) guarded by ownership claims so one body can
//! never sit in two methods at once.

pub mod annotation;
pub mod code;
pub mod constant;
pub mod insn;
pub mod owner;

use std::sync::Arc;

pub use annotation::{AnnotationPair, AnnotationValue, ClassAnnotation, ClassTypeAnnotation, TypePath, TypeReference};
pub use code::{
    AppendedLocals, ChopCount, ClassCode, ClassLocalVariableAnnotation, CodeBody, CodeFrame,
    CodeLabel, FrameElement, InsnList, InsnNode, LocalVariable, LocalVariableRange, TryCatchBlock,
};
pub use constant::{Constant, ConstantDynamic, ConstantMethodHandle, FieldHandleKind, MethodHandleKind};
pub use insn::{
    CastInsn, FieldOp, IincInsn, Insn, InvokeDynamicInsn, InvokeOp, JumpOp, LookupSwitchInsn,
    MethodInsn, MultiANewArrayInsn, SimpleInsn, TableSwitchInsn, TypeInsn, TypeOp, TypedInsn,
    TypedOp, VarIndex, VarInsn, VarOp, VmType,
};
pub use owner::{Claim, NodeId};

use crate::Result;
use crate::reference::{ClassReference, FieldReference, MethodReference, RecordFieldReference};
use crate::types::{ClassSignature, MethodDescriptor, MethodSignature, TypeDescriptor, TypeSignature};

/// Access flag bits shared by classes, fields and methods.
pub mod access {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SUPER: u16 = 0x0020;
    pub const SYNCHRONIZED: u16 = 0x0020;
    pub const VOLATILE: u16 = 0x0040;
    pub const BRIDGE: u16 = 0x0040;
    pub const TRANSIENT: u16 = 0x0080;
    pub const VARARGS: u16 = 0x0080;
    pub const NATIVE: u16 = 0x0100;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
    pub const STRICT: u16 = 0x0800;
    pub const SYNTHETIC: u16 = 0x1000;
    pub const ANNOTATION: u16 = 0x2000;
    pub const ENUM: u16 = 0x4000;
    pub const MODULE: u16 = 0x8000;
}

/// An attribute the reader kept no structure for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownAttribute {
    pub name: String,
    /// `None` for class attributes, otherwise `name + descriptor` of the member.
    pub member: Option<(String, String)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InnerClass {
    pub inner: ClassReference,
    pub outer: Option<ClassReference>,
    pub simple_name: Option<String>,
    pub access: u16,
}

/// `EnclosingMethod`: the class and, for local classes, the method around this class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnclosingMethod {
    pub owner: ClassReference,
    pub method: Option<(String, MethodDescriptor)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodParameter {
    pub name: Option<String>,
    pub access: u16,
}

/// One class and everything it declares.
#[derive(Debug)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub access: u16,
    pub name: ClassReference,
    pub super_class: Option<ClassReference>,
    pub interfaces: Vec<ClassReference>,
    pub signature: Option<ClassSignature>,
    pub source_file: Option<String>,
    pub source_debug: Option<String>,
    pub enclosing_method: Option<EnclosingMethod>,
    pub nest_host: Option<ClassReference>,
    pub nest_members: Vec<ClassReference>,
    pub permitted_subclasses: Vec<ClassReference>,
    pub inner_classes: Vec<InnerClass>,
    pub visible_annotations: Vec<ClassAnnotation>,
    pub invisible_annotations: Vec<ClassAnnotation>,
    pub visible_type_annotations: Vec<ClassTypeAnnotation>,
    pub invisible_type_annotations: Vec<ClassTypeAnnotation>,
    pub methods: Vec<ClassMethod>,
    pub fields: Vec<ClassField>,
    /// Present when the class carries a `Record` attribute.
    pub record_fields: Option<Vec<ClassRecordField>>,
    pub unknown_attributes: Vec<UnknownAttribute>,
}

impl ClassFile {
    pub fn new(name: ClassReference, super_class: Option<ClassReference>) -> Self {
        ClassFile {
            minor_version: 0,
            major_version: 52,
            access: access::PUBLIC | access::SUPER,
            name,
            super_class,
            interfaces: Vec::new(),
            signature: None,
            source_file: None,
            source_debug: None,
            enclosing_method: None,
            nest_host: None,
            nest_members: Vec::new(),
            permitted_subclasses: Vec::new(),
            inner_classes: Vec::new(),
            visible_annotations: Vec::new(),
            invisible_annotations: Vec::new(),
            visible_type_annotations: Vec::new(),
            invisible_type_annotations: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            record_fields: None,
            unknown_attributes: Vec::new(),
        }
    }

    pub fn is_interface(&self) -> bool {
        self.access & access::INTERFACE != 0
    }

    pub fn is_record(&self) -> bool {
        self.record_fields.is_some()
    }

    pub fn find_method(&self, name: &str, descriptor: &MethodDescriptor) -> Option<&ClassMethod> {
        self.methods
            .iter()
            .find(|method| method.name == name && &method.descriptor == descriptor)
    }

    pub fn find_field(&self, name: &str, descriptor: &TypeDescriptor) -> Option<&ClassField> {
        self.fields
            .iter()
            .find(|field| field.name == name && &field.descriptor == descriptor)
    }

    pub fn method_reference(&self, method: &ClassMethod) -> MethodReference {
        MethodReference::new(self.name.clone(), &method.name, method.descriptor.clone())
    }

    pub fn field_reference(&self, field: &ClassField) -> FieldReference {
        FieldReference::new(self.name.clone(), &field.name, field.descriptor.clone())
    }

    pub fn record_field_reference(&self, field: &ClassRecordField) -> RecordFieldReference {
        RecordFieldReference::new(self.name.clone(), &field.name, field.descriptor.clone())
    }
}

/// A method and its optional body.
#[derive(Debug)]
pub struct ClassMethod {
    id: NodeId,
    pub access: u16,
    pub name: String,
    pub descriptor: MethodDescriptor,
    pub signature: Option<MethodSignature>,
    pub exceptions: Vec<ClassReference>,
    pub annotation_default: Option<AnnotationValue>,
    pub parameters: Vec<MethodParameter>,
    pub visible_annotations: Vec<ClassAnnotation>,
    pub invisible_annotations: Vec<ClassAnnotation>,
    pub visible_parameter_annotations: Vec<Vec<ClassAnnotation>>,
    pub invisible_parameter_annotations: Vec<Vec<ClassAnnotation>>,
    pub visible_type_annotations: Vec<ClassTypeAnnotation>,
    pub invisible_type_annotations: Vec<ClassTypeAnnotation>,
    code: Option<Arc<ClassCode>>,
}

impl ClassMethod {
    pub fn new(access: u16, name: &str, descriptor: MethodDescriptor) -> Self {
        ClassMethod {
            id: NodeId::fresh(),
            access,
            name: name.to_string(),
            descriptor,
            signature: None,
            exceptions: Vec::new(),
            annotation_default: None,
            parameters: Vec::new(),
            visible_annotations: Vec::new(),
            invisible_annotations: Vec::new(),
            visible_parameter_annotations: Vec::new(),
            invisible_parameter_annotations: Vec::new(),
            visible_type_annotations: Vec::new(),
            invisible_type_annotations: Vec::new(),
            code: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn code(&self) -> Option<&Arc<ClassCode>> {
        self.code.as_ref()
    }

    /// Attach `code`, detaching the current body. Fails if `code` belongs to another method.
    pub fn set_code(&mut self, code: Arc<ClassCode>) -> Result<()> {
        code.claim().claim(self.id)?;
        if let Some(previous) = self.code.replace(code) {
            previous.claim().release(self.id)?;
        }
        Ok(())
    }

    pub fn take_code(&mut self) -> Result<Option<Arc<ClassCode>>> {
        let previous = self.code.take();
        if let Some(previous) = &previous {
            previous.claim().release(self.id)?;
        }
        Ok(previous)
    }

    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    pub fn is_private(&self) -> bool {
        self.access & access::PRIVATE != 0
    }
}

#[derive(Debug)]
pub struct ClassField {
    id: NodeId,
    pub access: u16,
    pub name: String,
    pub descriptor: TypeDescriptor,
    pub signature: Option<TypeSignature>,
    pub value: Option<Constant>,
    pub visible_annotations: Vec<ClassAnnotation>,
    pub invisible_annotations: Vec<ClassAnnotation>,
    pub visible_type_annotations: Vec<ClassTypeAnnotation>,
    pub invisible_type_annotations: Vec<ClassTypeAnnotation>,
}

impl ClassField {
    pub fn new(access: u16, name: &str, descriptor: TypeDescriptor) -> Self {
        ClassField {
            id: NodeId::fresh(),
            access,
            name: name.to_string(),
            descriptor,
            signature: None,
            value: None,
            visible_annotations: Vec::new(),
            invisible_annotations: Vec::new(),
            visible_type_annotations: Vec::new(),
            invisible_type_annotations: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }
}

/// A `Record` attribute component.
#[derive(Debug)]
pub struct ClassRecordField {
    id: NodeId,
    pub name: String,
    pub descriptor: TypeDescriptor,
    pub signature: Option<TypeSignature>,
    pub visible_annotations: Vec<ClassAnnotation>,
    pub invisible_annotations: Vec<ClassAnnotation>,
    pub visible_type_annotations: Vec<ClassTypeAnnotation>,
    pub invisible_type_annotations: Vec<ClassTypeAnnotation>,
}

impl ClassRecordField {
    pub fn new(name: &str, descriptor: TypeDescriptor) -> Self {
        ClassRecordField {
            id: NodeId::fresh(),
            name: name.to_string(),
            descriptor,
            signature: None,
            visible_annotations: Vec::new(),
            invisible_annotations: Vec::new(),
            visible_type_annotations: Vec::new(),
            invisible_type_annotations: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn code_attaches_to_one_method_only() {
        let descriptor = MethodDescriptor::parse("()V").expect("parse descriptor");
        let mut first = ClassMethod::new(access::PUBLIC, "a", descriptor.clone());
        let mut second = ClassMethod::new(access::PUBLIC, "b", descriptor);
        let code = ClassCode::new(0, 1);

        first.set_code(code.clone()).expect("attach");
        assert!(matches!(
            second.set_code(code.clone()),
            Err(Error::AlreadyOwned { .. })
        ));
        assert_eq!(code.owner(), Some(first.id()));

        let taken = first.take_code().expect("detach").expect("code");
        second.set_code(taken).expect("reattach");
        assert_eq!(code.owner(), Some(second.id()));
    }
}
