//! Class file decoding into the [`crate::ir`] model.
//!
//! The reader walks the raw class bytes once for the constant pool and the
//! member tables, then decodes attributes. `BootstrapMethods` sits at the end
//! of the class attributes but is needed by `invokedynamic` and dynamic
//! constants, so member attributes are decoded after the class attributes have
//! been collected.

mod annotation;
mod code;
#[cfg(test)]
pub(crate) mod fixture;

use std::cell::OnceCell;

use crate::ir::{
    ClassField, ClassFile, ClassMethod, ClassRecordField, Constant, ConstantDynamic,
    ConstantMethodHandle, EnclosingMethod, FieldHandleKind, InnerClass, InvokeDynamicInsn,
    MethodHandleKind, MethodParameter, UnknownAttribute,
};
use crate::reference::{ClassReference, FieldReference, MethodReference};
use crate::types::{ClassSignature, MethodDescriptor, MethodSignature, TypeDescriptor, TypeSignature};
use crate::Result;

const MAGIC: u32 = 0xCAFE_BABE;

/// Bound on nested dynamic constants; the class file format allows cycles only in malformed input.
const MAX_DYNAMIC_DEPTH: usize = 32;

/// Decode one class file.
pub fn read_class(bytes: &[u8]) -> Result<ClassFile> {
    let mut input = Bytes::new(bytes);
    let magic = input.u32()?;
    if magic != MAGIC {
        return Err(malformed_error!("bad magic number {magic:#010x}"));
    }
    let minor_version = input.u16()?;
    let major_version = input.u16()?;
    let pool = ConstantPool::read(&mut input)?;

    let access = input.u16()?;
    let name = pool.class(input.u16()?)?;
    let super_class = pool.optional_class(input.u16()?)?;
    let interface_count = input.u16()?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        interfaces.push(pool.class(input.u16()?)?);
    }

    let raw_fields = read_members(&mut input, &pool)?;
    let raw_methods = read_members(&mut input, &pool)?;
    let class_attributes = read_attributes(&mut input, &pool)?;
    if !input.is_empty() {
        return Err(malformed_error!(
            "{} trailing bytes after class attributes",
            input.remaining()
        ));
    }

    if let Some(attribute) = class_attributes
        .iter()
        .find(|attribute| attribute.name == "BootstrapMethods")
    {
        pool.read_bootstrap_methods(attribute.data)?;
    }

    let mut class = ClassFile::new(name, super_class);
    class.minor_version = minor_version;
    class.major_version = major_version;
    class.access = access;
    class.interfaces = interfaces;

    for attribute in &class_attributes {
        read_class_attribute(&mut class, attribute, &pool)?;
    }
    for raw in &raw_fields {
        let field = read_field(raw, &pool, &mut class.unknown_attributes)?;
        class.fields.push(field);
    }
    for raw in &raw_methods {
        let method = read_method(raw, &pool, &mut class.unknown_attributes)?;
        class.methods.push(method);
    }
    Ok(class)
}

/// Big-endian cursor over class file bytes.
pub(crate) struct Bytes<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Bytes<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Bytes { data, pos: 0 }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub(crate) fn skip(&mut self, count: usize) -> Result<()> {
        self.take(count).map(|_| ())
    }

    pub(crate) fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                malformed_error!(
                    "unexpected end of data: need {count} bytes at offset {}",
                    self.pos
                )
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn i16(&mut self) -> Result<i16> {
        Ok(self.u16()? as i16)
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }

    pub(crate) fn i64(&mut self) -> Result<i64> {
        let high = u64::from(self.u32()?);
        let low = u64::from(self.u32()?);
        Ok(((high << 32) | low) as i64)
    }
}

/// An attribute whose body has not been decoded yet.
pub(crate) struct RawAttribute<'a> {
    pub(crate) name: &'a str,
    pub(crate) data: &'a [u8],
}

pub(crate) fn read_attributes<'a>(
    input: &mut Bytes<'a>,
    pool: &'a ConstantPool,
) -> Result<Vec<RawAttribute<'a>>> {
    let count = input.u16()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = pool.utf8(input.u16()?)?;
        let length = input.u32()? as usize;
        let data = input.take(length)?;
        attributes.push(RawAttribute { name, data });
    }
    Ok(attributes)
}

struct RawMember<'a> {
    access: u16,
    name: &'a str,
    descriptor: &'a str,
    attributes: Vec<RawAttribute<'a>>,
}

fn read_members<'a>(input: &mut Bytes<'a>, pool: &'a ConstantPool) -> Result<Vec<RawMember<'a>>> {
    let count = input.u16()?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let access = input.u16()?;
        let name = pool.utf8(input.u16()?)?;
        let descriptor = pool.utf8(input.u16()?)?;
        let attributes = read_attributes(input, pool)?;
        members.push(RawMember {
            access,
            name,
            descriptor,
            attributes,
        });
    }
    Ok(members)
}

fn read_class_attribute(
    class: &mut ClassFile,
    attribute: &RawAttribute<'_>,
    pool: &ConstantPool,
) -> Result<()> {
    let mut input = Bytes::new(attribute.data);
    match attribute.name {
        "SourceFile" => class.source_file = Some(pool.utf8(input.u16()?)?.to_string()),
        "SourceDebugExtension" => class.source_debug = Some(decode_modified_utf8(attribute.data)?),
        "Signature" => class.signature = Some(ClassSignature::parse(pool.utf8(input.u16()?)?)?),
        "EnclosingMethod" => {
            let owner = pool.class(input.u16()?)?;
            let method = match input.u16()? {
                0 => None,
                index => {
                    let (name, descriptor) = pool.name_and_type(index)?;
                    Some((name.to_string(), MethodDescriptor::parse(descriptor)?))
                }
            };
            class.enclosing_method = Some(EnclosingMethod { owner, method });
        }
        "NestHost" => class.nest_host = Some(pool.class(input.u16()?)?),
        "NestMembers" => class.nest_members = read_class_list(&mut input, pool)?,
        "PermittedSubclasses" => class.permitted_subclasses = read_class_list(&mut input, pool)?,
        "InnerClasses" => {
            let count = input.u16()?;
            for _ in 0..count {
                let inner = pool.class(input.u16()?)?;
                let outer = pool.optional_class(input.u16()?)?;
                let simple_name = match input.u16()? {
                    0 => None,
                    index => Some(pool.utf8(index)?.to_string()),
                };
                let access = input.u16()?;
                class.inner_classes.push(InnerClass {
                    inner,
                    outer,
                    simple_name,
                    access,
                });
            }
        }
        "RuntimeVisibleAnnotations" => {
            class.visible_annotations = annotation::read_annotations(&mut input, pool)?
        }
        "RuntimeInvisibleAnnotations" => {
            class.invisible_annotations = annotation::read_annotations(&mut input, pool)?
        }
        "RuntimeVisibleTypeAnnotations" => {
            class.visible_type_annotations = annotation::read_member_type_annotations(&mut input, pool)?
        }
        "RuntimeInvisibleTypeAnnotations" => {
            class.invisible_type_annotations =
                annotation::read_member_type_annotations(&mut input, pool)?
        }
        "Record" => {
            let count = input.u16()?;
            let mut components = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let name = pool.utf8(input.u16()?)?;
                let descriptor = TypeDescriptor::parse(pool.utf8(input.u16()?)?)?;
                let mut component = ClassRecordField::new(name, descriptor);
                for attribute in read_attributes(&mut input, pool)? {
                    read_record_attribute(
                        &mut component,
                        &attribute,
                        pool,
                        &mut class.unknown_attributes,
                    )?;
                }
                components.push(component);
            }
            class.record_fields = Some(components);
        }
        "BootstrapMethods" | "Deprecated" | "Synthetic" => {}
        other => class.unknown_attributes.push(UnknownAttribute {
            name: other.to_string(),
            member: None,
        }),
    }
    Ok(())
}

fn read_record_attribute(
    component: &mut ClassRecordField,
    attribute: &RawAttribute<'_>,
    pool: &ConstantPool,
    unknown: &mut Vec<UnknownAttribute>,
) -> Result<()> {
    let mut input = Bytes::new(attribute.data);
    match attribute.name {
        "Signature" => component.signature = Some(TypeSignature::parse(pool.utf8(input.u16()?)?)?),
        "RuntimeVisibleAnnotations" => {
            component.visible_annotations = annotation::read_annotations(&mut input, pool)?
        }
        "RuntimeInvisibleAnnotations" => {
            component.invisible_annotations = annotation::read_annotations(&mut input, pool)?
        }
        "RuntimeVisibleTypeAnnotations" => {
            component.visible_type_annotations =
                annotation::read_member_type_annotations(&mut input, pool)?
        }
        "RuntimeInvisibleTypeAnnotations" => {
            component.invisible_type_annotations =
                annotation::read_member_type_annotations(&mut input, pool)?
        }
        other => unknown.push(UnknownAttribute {
            name: other.to_string(),
            member: Some((
                component.name.clone(),
                component.descriptor.as_str().to_string(),
            )),
        }),
    }
    Ok(())
}

fn read_field(
    raw: &RawMember<'_>,
    pool: &ConstantPool,
    unknown: &mut Vec<UnknownAttribute>,
) -> Result<ClassField> {
    let mut field = ClassField::new(raw.access, raw.name, TypeDescriptor::parse(raw.descriptor)?);
    for attribute in &raw.attributes {
        let mut input = Bytes::new(attribute.data);
        match attribute.name {
            "ConstantValue" => field.value = Some(pool.constant(input.u16()?)?),
            "Signature" => field.signature = Some(TypeSignature::parse(pool.utf8(input.u16()?)?)?),
            "RuntimeVisibleAnnotations" => {
                field.visible_annotations = annotation::read_annotations(&mut input, pool)?
            }
            "RuntimeInvisibleAnnotations" => {
                field.invisible_annotations = annotation::read_annotations(&mut input, pool)?
            }
            "RuntimeVisibleTypeAnnotations" => {
                field.visible_type_annotations =
                    annotation::read_member_type_annotations(&mut input, pool)?
            }
            "RuntimeInvisibleTypeAnnotations" => {
                field.invisible_type_annotations =
                    annotation::read_member_type_annotations(&mut input, pool)?
            }
            "Deprecated" | "Synthetic" => {}
            other => unknown.push(UnknownAttribute {
                name: other.to_string(),
                member: Some((raw.name.to_string(), raw.descriptor.to_string())),
            }),
        }
    }
    Ok(field)
}

fn read_method(
    raw: &RawMember<'_>,
    pool: &ConstantPool,
    unknown: &mut Vec<UnknownAttribute>,
) -> Result<ClassMethod> {
    let mut method = ClassMethod::new(raw.access, raw.name, MethodDescriptor::parse(raw.descriptor)?);
    for attribute in &raw.attributes {
        let mut input = Bytes::new(attribute.data);
        match attribute.name {
            "Code" => {
                let code = code::read_code(attribute.data, pool, (raw.name, raw.descriptor), unknown)?;
                method.set_code(code)?;
            }
            "Exceptions" => method.exceptions = read_class_list(&mut input, pool)?,
            "Signature" => {
                method.signature = Some(MethodSignature::parse(pool.utf8(input.u16()?)?)?)
            }
            "AnnotationDefault" => {
                method.annotation_default = Some(annotation::read_element_value(&mut input, pool)?)
            }
            "MethodParameters" => {
                let count = input.u8()?;
                for _ in 0..count {
                    let name = match input.u16()? {
                        0 => None,
                        index => Some(pool.utf8(index)?.to_string()),
                    };
                    let access = input.u16()?;
                    method.parameters.push(MethodParameter { name, access });
                }
            }
            "RuntimeVisibleAnnotations" => {
                method.visible_annotations = annotation::read_annotations(&mut input, pool)?
            }
            "RuntimeInvisibleAnnotations" => {
                method.invisible_annotations = annotation::read_annotations(&mut input, pool)?
            }
            "RuntimeVisibleParameterAnnotations" => {
                method.visible_parameter_annotations =
                    annotation::read_parameter_annotations(&mut input, pool)?
            }
            "RuntimeInvisibleParameterAnnotations" => {
                method.invisible_parameter_annotations =
                    annotation::read_parameter_annotations(&mut input, pool)?
            }
            "RuntimeVisibleTypeAnnotations" => {
                method.visible_type_annotations =
                    annotation::read_member_type_annotations(&mut input, pool)?
            }
            "RuntimeInvisibleTypeAnnotations" => {
                method.invisible_type_annotations =
                    annotation::read_member_type_annotations(&mut input, pool)?
            }
            "Deprecated" | "Synthetic" => {}
            other => unknown.push(UnknownAttribute {
                name: other.to_string(),
                member: Some((raw.name.to_string(), raw.descriptor.to_string())),
            }),
        }
    }
    Ok(method)
}

fn read_class_list(input: &mut Bytes<'_>, pool: &ConstantPool) -> Result<Vec<ClassReference>> {
    let count = input.u16()?;
    let mut classes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        classes.push(pool.class(input.u16()?)?);
    }
    Ok(classes)
}

#[derive(Debug)]
enum PoolEntry {
    /// Index 0 and the slot after a long or double.
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    Field(u16, u16),
    Method(u16, u16),
    InterfaceMethod(u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    Dynamic(u16, u16),
    InvokeDynamic(u16, u16),
    Module(u16),
    Package(u16),
}

struct BootstrapMethod {
    handle: u16,
    arguments: Vec<u16>,
}

/// The constant pool plus the `BootstrapMethods` table it indexes into.
///
/// The bootstrap table is filled once, after the member tables have been
/// sliced out of the pool-borrowing input.
pub(crate) struct ConstantPool {
    entries: Vec<PoolEntry>,
    bootstrap_methods: OnceCell<Vec<BootstrapMethod>>,
}

impl ConstantPool {
    fn read(input: &mut Bytes<'_>) -> Result<Self> {
        let count = input.u16()? as usize;
        let mut entries = Vec::with_capacity(count);
        entries.push(PoolEntry::Unusable);
        while entries.len() < count {
            let tag = input.u8()?;
            let entry = match tag {
                1 => {
                    let length = input.u16()? as usize;
                    PoolEntry::Utf8(decode_modified_utf8(input.take(length)?)?)
                }
                3 => PoolEntry::Integer(input.i32()?),
                4 => PoolEntry::Float(f32::from_bits(input.u32()?)),
                5 => PoolEntry::Long(input.i64()?),
                6 => PoolEntry::Double(f64::from_bits(input.i64()? as u64)),
                7 => PoolEntry::Class(input.u16()?),
                8 => PoolEntry::String(input.u16()?),
                9 => PoolEntry::Field(input.u16()?, input.u16()?),
                10 => PoolEntry::Method(input.u16()?, input.u16()?),
                11 => PoolEntry::InterfaceMethod(input.u16()?, input.u16()?),
                12 => PoolEntry::NameAndType(input.u16()?, input.u16()?),
                15 => PoolEntry::MethodHandle(input.u8()?, input.u16()?),
                16 => PoolEntry::MethodType(input.u16()?),
                17 => PoolEntry::Dynamic(input.u16()?, input.u16()?),
                18 => PoolEntry::InvokeDynamic(input.u16()?, input.u16()?),
                19 => PoolEntry::Module(input.u16()?),
                20 => PoolEntry::Package(input.u16()?),
                other => {
                    return Err(malformed_error!(
                        "unknown constant pool tag {other} at index {}",
                        entries.len()
                    ));
                }
            };
            let wide = matches!(entry, PoolEntry::Long(_) | PoolEntry::Double(_));
            entries.push(entry);
            if wide {
                entries.push(PoolEntry::Unusable);
            }
        }
        if entries.len() != count {
            return Err(malformed_error!("constant pool overflows its declared size {count}"));
        }
        Ok(ConstantPool {
            entries,
            bootstrap_methods: OnceCell::new(),
        })
    }

    fn read_bootstrap_methods(&self, data: &[u8]) -> Result<()> {
        let mut input = Bytes::new(data);
        let count = input.u16()?;
        let mut methods = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let handle = input.u16()?;
            let argument_count = input.u16()?;
            let mut arguments = Vec::with_capacity(argument_count as usize);
            for _ in 0..argument_count {
                arguments.push(input.u16()?);
            }
            methods.push(BootstrapMethod { handle, arguments });
        }
        self.bootstrap_methods
            .set(methods)
            .map_err(|_| malformed_error!("duplicate BootstrapMethods attribute"))
    }

    fn entry(&self, index: u16) -> Result<&PoolEntry> {
        self.entries
            .get(index as usize)
            .ok_or_else(|| malformed_error!("constant pool index {index} out of range"))
    }

    pub(crate) fn utf8(&self, index: u16) -> Result<&str> {
        match self.entry(index)? {
            PoolEntry::Utf8(text) => Ok(text),
            other => Err(malformed_error!("expected Utf8 at {index}, found {other:?}")),
        }
    }

    pub(crate) fn integer(&self, index: u16) -> Result<i32> {
        match self.entry(index)? {
            PoolEntry::Integer(value) => Ok(*value),
            other => Err(malformed_error!("expected Integer at {index}, found {other:?}")),
        }
    }

    pub(crate) fn class(&self, index: u16) -> Result<ClassReference> {
        match self.entry(index)? {
            PoolEntry::Class(name) => Ok(ClassReference::new(self.utf8(*name)?)),
            other => Err(malformed_error!("expected Class at {index}, found {other:?}")),
        }
    }

    /// `0` means absent.
    pub(crate) fn optional_class(&self, index: u16) -> Result<Option<ClassReference>> {
        match index {
            0 => Ok(None),
            index => self.class(index).map(Some),
        }
    }

    pub(crate) fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.entry(index)? {
            PoolEntry::NameAndType(name, descriptor) => Ok((self.utf8(*name)?, self.utf8(*descriptor)?)),
            other => Err(malformed_error!("expected NameAndType at {index}, found {other:?}")),
        }
    }

    pub(crate) fn field(&self, index: u16) -> Result<FieldReference> {
        match self.entry(index)? {
            PoolEntry::Field(owner, name_and_type) => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok(FieldReference::new(
                    self.class(*owner)?,
                    name,
                    TypeDescriptor::parse(descriptor)?,
                ))
            }
            other => Err(malformed_error!("expected Fieldref at {index}, found {other:?}")),
        }
    }

    /// A method reference and whether it names an interface method.
    pub(crate) fn method(&self, index: u16) -> Result<(MethodReference, bool)> {
        let (owner, name_and_type, is_interface) = match self.entry(index)? {
            PoolEntry::Method(owner, name_and_type) => (*owner, *name_and_type, false),
            PoolEntry::InterfaceMethod(owner, name_and_type) => (*owner, *name_and_type, true),
            other => {
                return Err(malformed_error!("expected Methodref at {index}, found {other:?}"));
            }
        };
        let (name, descriptor) = self.name_and_type(name_and_type)?;
        Ok((
            MethodReference::new(self.class(owner)?, name, MethodDescriptor::parse(descriptor)?),
            is_interface,
        ))
    }

    pub(crate) fn method_handle(&self, index: u16) -> Result<ConstantMethodHandle> {
        let PoolEntry::MethodHandle(kind, reference) = self.entry(index)? else {
            return Err(malformed_error!("expected MethodHandle at {index}"));
        };
        let field_kind = match kind {
            1 => Some(FieldHandleKind::GetField),
            2 => Some(FieldHandleKind::GetStatic),
            3 => Some(FieldHandleKind::PutField),
            4 => Some(FieldHandleKind::PutStatic),
            _ => None,
        };
        if let Some(field_kind) = field_kind {
            return Ok(ConstantMethodHandle::field(field_kind, self.field(*reference)?));
        }
        let method_kind = match kind {
            5 => MethodHandleKind::InvokeVirtual,
            6 => MethodHandleKind::InvokeStatic,
            7 => MethodHandleKind::InvokeSpecial,
            8 => MethodHandleKind::NewInvokeSpecial,
            9 => MethodHandleKind::InvokeInterface,
            other => return Err(malformed_error!("bad method handle kind {other} at {index}")),
        };
        let (method, is_interface) = self.method(*reference)?;
        ConstantMethodHandle::method(method_kind, method, is_interface)
    }

    /// A loadable constant: `ldc` operands, `ConstantValue`s and bootstrap arguments.
    pub(crate) fn constant(&self, index: u16) -> Result<Constant> {
        self.constant_at_depth(index, 0)
    }

    fn constant_at_depth(&self, index: u16, depth: usize) -> Result<Constant> {
        Ok(match self.entry(index)? {
            PoolEntry::Integer(value) => Constant::Int(*value),
            PoolEntry::Float(value) => Constant::Float(*value),
            PoolEntry::Long(value) => Constant::Long(*value),
            PoolEntry::Double(value) => Constant::Double(*value),
            PoolEntry::String(text) => Constant::String(self.utf8(*text)?.to_string()),
            PoolEntry::Class(_) => Constant::Class(self.class(index)?),
            PoolEntry::MethodType(descriptor) => {
                Constant::MethodType(MethodDescriptor::parse(self.utf8(*descriptor)?)?)
            }
            PoolEntry::MethodHandle(..) => Constant::MethodHandle(self.method_handle(index)?),
            PoolEntry::Dynamic(bootstrap, name_and_type) => {
                if depth >= MAX_DYNAMIC_DEPTH {
                    return Err(malformed_error!("dynamic constant nesting too deep at {index}"));
                }
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                let (bootstrap, arguments) = self.bootstrap(*bootstrap, depth + 1)?;
                Constant::Dynamic(ConstantDynamic {
                    name: name.to_string(),
                    descriptor: TypeDescriptor::parse(descriptor)?,
                    bootstrap,
                    arguments,
                })
            }
            other => return Err(malformed_error!("constant at {index} is not loadable: {other:?}")),
        })
    }

    fn bootstrap(&self, index: u16, depth: usize) -> Result<(ConstantMethodHandle, Vec<Constant>)> {
        let method = self
            .bootstrap_methods
            .get()
            .and_then(|methods| methods.get(index as usize))
            .ok_or_else(|| malformed_error!("bootstrap method {index} out of range"))?;
        let handle = self.method_handle(method.handle)?;
        let arguments = method
            .arguments
            .iter()
            .map(|argument| self.constant_at_depth(*argument, depth))
            .collect::<Result<Vec<_>>>()?;
        Ok((handle, arguments))
    }

    pub(crate) fn invoke_dynamic(&self, index: u16) -> Result<InvokeDynamicInsn> {
        let PoolEntry::InvokeDynamic(bootstrap, name_and_type) = self.entry(index)? else {
            return Err(malformed_error!("expected InvokeDynamic at {index}"));
        };
        let (name, descriptor) = self.name_and_type(*name_and_type)?;
        let (bootstrap, arguments) = self.bootstrap(*bootstrap, 0)?;
        Ok(InvokeDynamicInsn {
            name: name.to_string(),
            descriptor: MethodDescriptor::parse(descriptor)?,
            bootstrap,
            arguments,
        })
    }
}

/// Decode the modified UTF-8 used by `CONSTANT_Utf8`: `C0 80` for NUL and
/// surrogate pairs encoded as two three-byte sequences.
pub(crate) fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    if bytes.iter().all(|byte| *byte != 0 && *byte < 0x80) {
        return String::from_utf8(bytes.to_vec()).map_err(|err| malformed_error!("{err}"));
    }
    let mut units = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        let first = bytes[index];
        let continuation = |offset: usize| -> Result<u16> {
            match bytes.get(index + offset) {
                Some(byte) if byte & 0xC0 == 0x80 => Ok(u16::from(byte & 0x3F)),
                _ => Err(malformed_error!("bad modified UTF-8 sequence at byte {index}")),
            }
        };
        if first & 0x80 == 0 {
            units.push(u16::from(first));
            index += 1;
        } else if first & 0xE0 == 0xC0 {
            units.push((u16::from(first & 0x1F) << 6) | continuation(1)?);
            index += 2;
        } else if first & 0xF0 == 0xE0 {
            units.push((u16::from(first & 0x0F) << 12) | (continuation(1)? << 6) | continuation(2)?);
            index += 3;
        } else {
            return Err(malformed_error!("bad modified UTF-8 lead byte {first:#04x} at {index}"));
        }
    }
    Ok(String::from_utf16_lossy(&units))
}

#[cfg(test)]
mod tests {
    use super::fixture::ClassBuilder;
    use super::*;
    use crate::ir::access;
    use crate::ir::{AnnotationValue, Insn, InvokeOp};
    use crate::Error;

    #[test]
    fn modified_utf8_handles_nul_and_supplementary_characters() {
        assert_eq!(decode_modified_utf8(b"plain").expect("ascii"), "plain");
        assert_eq!(decode_modified_utf8(&[0x61, 0xC0, 0x80]).expect("nul"), "a\0");
        // U+1F600 as a CESU-8 surrogate pair
        let smile = [0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80];
        assert_eq!(decode_modified_utf8(&smile).expect("pair"), "\u{1F600}");
        assert!(decode_modified_utf8(&[0xE0, 0x80]).is_err());
    }

    #[test]
    fn rejects_bad_magic_and_truncated_input() {
        assert!(matches!(
            read_class(&[0, 0, 0, 0]),
            Err(Error::Malformed { .. })
        ));
        let bytes = ClassBuilder::new("a/A", Some("java/lang/Object")).build();
        assert!(matches!(
            read_class(&bytes[..bytes.len() - 3]),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn reads_header_members_and_attributes() {
        let mut builder = ClassBuilder::new("a/A", Some("java/lang/Object"));
        builder.interface("java/lang/Runnable");
        let source = builder.utf8("A.java");
        builder.attribute("SourceFile", source.to_be_bytes().to_vec());
        builder.attribute("Vendor", vec![1, 2, 3]);
        let value = builder.integer(42);
        builder.field(
            access::STATIC | access::FINAL,
            "ANSWER",
            "I",
            vec![("ConstantValue", value.to_be_bytes().to_vec())],
        );
        let object = builder.class("java/lang/Object");
        let exceptions = [&[0u8, 1][..], &object.to_be_bytes()[..]].concat();
        builder.method(access::PUBLIC, "run", "()V", vec![("Exceptions", exceptions)]);

        let class = read_class(&builder.build()).expect("read class");
        assert_eq!(class.name.name(), "a/A");
        assert_eq!(class.super_class.as_ref().map(|c| c.name()), Some("java/lang/Object"));
        assert_eq!(class.interfaces, vec![ClassReference::new("java/lang/Runnable")]);
        assert_eq!(class.source_file.as_deref(), Some("A.java"));
        assert_eq!(class.fields[0].value, Some(Constant::Int(42)));
        assert_eq!(class.methods[0].exceptions, vec![ClassReference::new("java/lang/Object")]);
        assert_eq!(class.unknown_attributes.len(), 1);
        assert_eq!(class.unknown_attributes[0].name, "Vendor");
        assert_eq!(class.unknown_attributes[0].member, None);
    }

    #[test]
    fn reads_code_with_branches_and_calls() {
        let mut builder = ClassBuilder::new("a/A", Some("java/lang/Object"));
        let init = builder.method_ref("java/lang/Object", "<init>", "()V");
        let hello = builder.string("hello");
        let out = builder.field_ref("java/lang/System", "out", "Ljava/io/PrintStream;");
        let [init_hi, init_lo] = init.to_be_bytes();
        let [out_hi, out_lo] = out.to_be_bytes();
        let code = vec![
            0x2a, // aload_0
            0xb7, init_hi, init_lo, // invokespecial Object.<init>
            0x1b, // iload_1
            0x99, 0x00, 0x0a, // ifeq +10 -> return
            0xb2, out_hi, out_lo, // getstatic System.out
            0x12, hello as u8, // ldc "hello"
            0x57, // pop
            0x57, // pop
            0xb1, // return
        ];
        let body = builder.code(2, 2, &code, &[], Vec::new());
        builder.method(access::PUBLIC, "<init>", "(Z)V", vec![("Code", body)]);

        let class = read_class(&builder.build()).expect("read class");
        let method = &class.methods[0];
        let code = method.code().expect("code");
        assert_eq!(code.owner(), Some(method.id()));
        let list = code.insns().expect("insns");
        let nodes = list.read();
        assert_eq!(nodes.len(), 9);
        match &nodes[1].insn {
            Insn::Method(call) => {
                assert_eq!(call.op(), InvokeOp::Special);
                assert!(call.method().is_constructor());
            }
            other => panic!("unexpected {other:?}"),
        }
        let Insn::Jump { target, .. } = &nodes[3].insn else {
            panic!("expected jump");
        };
        assert_eq!(target.target(), Some(nodes[8].id()));
        assert_eq!(nodes[5].insn, Insn::Constant(Constant::String("hello".into())));
    }

    #[test]
    fn reads_annotations_and_records() {
        let mut builder = ClassBuilder::new("a/R", Some("java/lang/Record"));
        let annotation_type = builder.utf8("La/Marker;");
        let element = builder.utf8("value");
        let number = builder.integer(7);
        let mut annotations = vec![0, 1];
        annotations.extend(annotation_type.to_be_bytes());
        annotations.extend([0, 1]);
        annotations.extend(element.to_be_bytes());
        annotations.push(b'I');
        annotations.extend(number.to_be_bytes());
        builder.attribute("RuntimeInvisibleAnnotations", annotations);

        let name = builder.utf8("x");
        let descriptor = builder.utf8("J");
        let mut record = vec![0, 1];
        record.extend(name.to_be_bytes());
        record.extend(descriptor.to_be_bytes());
        record.extend([0, 0]);
        builder.attribute("Record", record);

        let class = read_class(&builder.build()).expect("read class");
        assert!(class.is_record());
        let components = class.record_fields.as_ref().expect("components");
        assert_eq!(components[0].name, "x");
        assert_eq!(components[0].descriptor, TypeDescriptor::LONG);
        let marker = &class.invisible_annotations[0];
        assert_eq!(marker.annotation_class.name(), "a/Marker");
        assert_eq!(marker.values[0].value, AnnotationValue::Int(7));
    }
}
