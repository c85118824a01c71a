use crate::ir::{AnnotationPair, AnnotationValue, ClassAnnotation, ClassTypeAnnotation, TypePath, TypeReference};
use crate::reader::{Bytes, ConstantPool};
use crate::reference::ClassReference;
use crate::types::TypeDescriptor;
use crate::Result;

pub(crate) fn read_annotations(input: &mut Bytes<'_>, pool: &ConstantPool) -> Result<Vec<ClassAnnotation>> {
    let count = input.u16()?;
    let mut annotations = Vec::with_capacity(count as usize);
    for _ in 0..count {
        annotations.push(read_annotation(input, pool)?);
    }
    Ok(annotations)
}

pub(crate) fn read_parameter_annotations(
    input: &mut Bytes<'_>,
    pool: &ConstantPool,
) -> Result<Vec<Vec<ClassAnnotation>>> {
    let count = input.u8()?;
    let mut parameters = Vec::with_capacity(count as usize);
    for _ in 0..count {
        parameters.push(read_annotations(input, pool)?);
    }
    Ok(parameters)
}

fn read_annotation(input: &mut Bytes<'_>, pool: &ConstantPool) -> Result<ClassAnnotation> {
    let annotation_class = class_of_descriptor(pool.utf8(input.u16()?)?)?;
    let count = input.u16()?;
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = pool.utf8(input.u16()?)?.to_string();
        let value = read_element_value(input, pool)?;
        values.push(AnnotationPair { name, value });
    }
    Ok(ClassAnnotation::with_values(annotation_class, values))
}

pub(crate) fn read_element_value(input: &mut Bytes<'_>, pool: &ConstantPool) -> Result<AnnotationValue> {
    let tag = input.u8()?;
    Ok(match tag {
        b'B' => AnnotationValue::Byte(pool.integer(input.u16()?)? as i8),
        b'C' => AnnotationValue::Char(pool.integer(input.u16()?)? as u16),
        b'S' => AnnotationValue::Short(pool.integer(input.u16()?)? as i16),
        b'Z' => AnnotationValue::Boolean(pool.integer(input.u16()?)? != 0),
        b'I' => AnnotationValue::Int(pool.integer(input.u16()?)?),
        b'J' | b'F' | b'D' => match pool.constant(input.u16()?)? {
            crate::ir::Constant::Long(value) if tag == b'J' => AnnotationValue::Long(value),
            crate::ir::Constant::Float(value) if tag == b'F' => AnnotationValue::Float(value),
            crate::ir::Constant::Double(value) if tag == b'D' => AnnotationValue::Double(value),
            other => {
                return Err(malformed_error!(
                    "element value tag '{}' does not match {other:?}",
                    tag as char
                ));
            }
        },
        b's' => AnnotationValue::String(pool.utf8(input.u16()?)?.to_string()),
        b'e' => {
            let owner = class_of_descriptor(pool.utf8(input.u16()?)?)?;
            let name = pool.utf8(input.u16()?)?.to_string();
            AnnotationValue::Enum { owner, name }
        }
        b'c' => AnnotationValue::Class(TypeDescriptor::parse(pool.utf8(input.u16()?)?)?),
        b'@' => AnnotationValue::Annotation(read_annotation(input, pool)?),
        b'[' => {
            let count = input.u16()?;
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                values.push(read_element_value(input, pool)?);
            }
            AnnotationValue::Array(values)
        }
        other => return Err(malformed_error!("unknown element value tag {other:#04x}")),
    })
}

fn class_of_descriptor(descriptor: &str) -> Result<ClassReference> {
    ClassReference::from_type(&TypeDescriptor::parse(descriptor)?)
        .ok_or_else(|| malformed_error!("annotation type {descriptor} is not a class"))
}

/// Where a type annotation read from a `Code` attribute applies.
pub(crate) enum CodeTarget {
    /// `instanceof`, `new`, casts, method references and type arguments: the insn at the offset.
    Insn(u32),
    /// A catch clause, by exception table index.
    TryCatch(u16),
    /// Local or resource variable live ranges: `(start_pc, length, index)`.
    LocalVariable(Vec<(u16, u16, u16)>),
}

/// Type annotations of a class, field, method or record component. Code targets
/// never appear here and are rejected.
pub(crate) fn read_member_type_annotations(
    input: &mut Bytes<'_>,
    pool: &ConstantPool,
) -> Result<Vec<ClassTypeAnnotation>> {
    let count = input.u16()?;
    let mut annotations = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (annotation, target) = read_type_annotation(input, pool)?;
        if target.is_some() {
            return Err(malformed_error!(
                "code type annotation target {:#04x} outside Code",
                annotation.type_ref.target_type()
            ));
        }
        annotations.push(annotation);
    }
    Ok(annotations)
}

pub(crate) fn read_code_type_annotations(
    input: &mut Bytes<'_>,
    pool: &ConstantPool,
) -> Result<Vec<(ClassTypeAnnotation, CodeTarget)>> {
    let count = input.u16()?;
    let mut annotations = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (annotation, target) = read_type_annotation(input, pool)?;
        let target = target.ok_or_else(|| {
            malformed_error!(
                "type annotation target {:#04x} is not allowed in Code",
                annotation.type_ref.target_type()
            )
        })?;
        annotations.push((annotation, target));
    }
    Ok(annotations)
}

fn read_type_annotation(
    input: &mut Bytes<'_>,
    pool: &ConstantPool,
) -> Result<(ClassTypeAnnotation, Option<CodeTarget>)> {
    let target_type = input.u8()?;
    let sort = u32::from(target_type) << 24;
    let (type_ref, target) = match target_type {
        // type parameter of a class or method
        0x00 | 0x01 => (sort | u32::from(input.u8()?) << 16, None),
        // supertype
        0x10 => (sort | u32::from(input.u16()?) << 8, None),
        // type parameter bound
        0x11 | 0x12 => {
            let parameter = u32::from(input.u8()?);
            let bound = u32::from(input.u8()?);
            (sort | parameter << 16 | bound << 8, None)
        }
        // field, return type, receiver
        0x13..=0x15 => (sort, None),
        // formal parameter
        0x16 => (sort | u32::from(input.u8()?) << 16, None),
        // throws
        0x17 => (sort | u32::from(input.u16()?) << 8, None),
        0x40 | 0x41 => {
            let count = input.u16()?;
            let mut ranges = Vec::with_capacity(count as usize);
            for _ in 0..count {
                ranges.push((input.u16()?, input.u16()?, input.u16()?));
            }
            (sort, Some(CodeTarget::LocalVariable(ranges)))
        }
        0x42 => {
            let index = input.u16()?;
            (sort | u32::from(index) << 8, Some(CodeTarget::TryCatch(index)))
        }
        0x43..=0x46 => (sort, Some(CodeTarget::Insn(u32::from(input.u16()?)))),
        0x47..=0x4B => {
            let offset = u32::from(input.u16()?);
            (sort | u32::from(input.u8()?), Some(CodeTarget::Insn(offset)))
        }
        other => return Err(malformed_error!("unknown type annotation target {other:#04x}")),
    };
    let path_length = input.u8()?;
    let mut steps = Vec::with_capacity(path_length as usize);
    for _ in 0..path_length {
        steps.push((input.u8()?, input.u8()?));
    }
    let annotation = read_annotation(input, pool)?;
    Ok((
        ClassTypeAnnotation {
            type_ref: TypeReference(type_ref),
            type_path: TypePath(steps),
            annotation,
        },
        target,
    ))
}
