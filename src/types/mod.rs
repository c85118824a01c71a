//! Descriptor and generic signature value types.

mod descriptor;
mod signature;

pub use descriptor::{MethodDescriptor, PartialMethodDescriptor, Primitive, TypeDescriptor, TypeKind};
pub use signature::{
    ClassSignature, ClassTypeSignature, InnerClassSignature, MethodSignature, TypeArgument,
    TypeParameter, TypeSignature, TypeVariant,
};
