//! Hand assembly of class files for tests.

use std::collections::HashMap;

use crate::ir::access;

/// Builds class file bytes one constant and member at a time.
pub(crate) struct ClassBuilder {
    pool: Vec<u8>,
    pool_count: u16,
    cache: HashMap<(u8, String), u16>,
    access: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<u8>,
    field_count: u16,
    methods: Vec<u8>,
    method_count: u16,
    attributes: Vec<u8>,
    attribute_count: u16,
}

impl ClassBuilder {
    pub(crate) fn new(name: &str, super_name: Option<&str>) -> Self {
        let mut builder = ClassBuilder {
            pool: Vec::new(),
            pool_count: 1,
            cache: HashMap::new(),
            access: access::PUBLIC | access::SUPER,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            field_count: 0,
            methods: Vec::new(),
            method_count: 0,
            attributes: Vec::new(),
            attribute_count: 0,
        };
        let this_class = builder.class(name);
        let super_class = match super_name {
            Some(super_name) => builder.class(super_name),
            None => 0,
        };
        builder.this_class = this_class;
        builder.super_class = super_class;
        builder
    }

    pub(crate) fn access(&mut self, access: u16) -> &mut Self {
        self.access = access;
        self
    }

    fn push(&mut self, tag: u8, key: String, body: &[u8]) -> u16 {
        if let Some(index) = self.cache.get(&(tag, key.clone())) {
            return *index;
        }
        let index = self.pool_count;
        self.pool.push(tag);
        self.pool.extend_from_slice(body);
        self.pool_count += if matches!(tag, 5 | 6) { 2 } else { 1 };
        self.cache.insert((tag, key), index);
        index
    }

    /// ASCII only; tests never need the modified UTF-8 escapes.
    pub(crate) fn utf8(&mut self, text: &str) -> u16 {
        let mut body = (text.len() as u16).to_be_bytes().to_vec();
        body.extend_from_slice(text.as_bytes());
        self.push(1, text.to_string(), &body)
    }

    pub(crate) fn integer(&mut self, value: i32) -> u16 {
        self.push(3, value.to_string(), &value.to_be_bytes())
    }

    pub(crate) fn class(&mut self, name: &str) -> u16 {
        let utf8 = self.utf8(name);
        self.push(7, name.to_string(), &utf8.to_be_bytes())
    }

    pub(crate) fn string(&mut self, text: &str) -> u16 {
        let utf8 = self.utf8(text);
        self.push(8, text.to_string(), &utf8.to_be_bytes())
    }

    pub(crate) fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let body = [name_index.to_be_bytes(), descriptor_index.to_be_bytes()].concat();
        self.push(12, format!("{name}:{descriptor}"), &body)
    }

    fn member_ref(&mut self, tag: u8, owner: &str, name: &str, descriptor: &str) -> u16 {
        let owner_index = self.class(owner);
        let name_and_type = self.name_and_type(name, descriptor);
        let body = [owner_index.to_be_bytes(), name_and_type.to_be_bytes()].concat();
        self.push(tag, format!("{owner}.{name}:{descriptor}"), &body)
    }

    pub(crate) fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(9, owner, name, descriptor)
    }

    pub(crate) fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(10, owner, name, descriptor)
    }

    pub(crate) fn interface_method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(11, owner, name, descriptor)
    }

    pub(crate) fn interface(&mut self, name: &str) -> &mut Self {
        let index = self.class(name);
        self.interfaces.push(index);
        self
    }

    fn encode_attributes(&mut self, attributes: Vec<(&str, Vec<u8>)>) -> Vec<u8> {
        let mut out = (attributes.len() as u16).to_be_bytes().to_vec();
        for (name, data) in attributes {
            out.extend(self.utf8(name).to_be_bytes());
            out.extend((data.len() as u32).to_be_bytes());
            out.extend(data);
        }
        out
    }

    fn member(&mut self, access: u16, name: &str, descriptor: &str, attributes: Vec<(&str, Vec<u8>)>) -> Vec<u8> {
        let mut out = access.to_be_bytes().to_vec();
        out.extend(self.utf8(name).to_be_bytes());
        out.extend(self.utf8(descriptor).to_be_bytes());
        out.extend(self.encode_attributes(attributes));
        out
    }

    pub(crate) fn field(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        attributes: Vec<(&str, Vec<u8>)>,
    ) -> &mut Self {
        let bytes = self.member(access, name, descriptor, attributes);
        self.fields.extend(bytes);
        self.field_count += 1;
        self
    }

    pub(crate) fn method(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        attributes: Vec<(&str, Vec<u8>)>,
    ) -> &mut Self {
        let bytes = self.member(access, name, descriptor, attributes);
        self.methods.extend(bytes);
        self.method_count += 1;
        self
    }

    pub(crate) fn attribute(&mut self, name: &str, data: Vec<u8>) -> &mut Self {
        let name_index = self.utf8(name);
        self.attributes.extend(name_index.to_be_bytes());
        self.attributes.extend((data.len() as u32).to_be_bytes());
        self.attributes.extend(data);
        self.attribute_count += 1;
        self
    }

    /// Body of a `Code` attribute; exception entries are `(start, end, handler, catch_type)`.
    pub(crate) fn code(
        &mut self,
        max_stack: u16,
        max_locals: u16,
        code: &[u8],
        exception_table: &[(u16, u16, u16, u16)],
        attributes: Vec<(&str, Vec<u8>)>,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(max_stack.to_be_bytes());
        out.extend(max_locals.to_be_bytes());
        out.extend((code.len() as u32).to_be_bytes());
        out.extend_from_slice(code);
        out.extend((exception_table.len() as u16).to_be_bytes());
        for (start, end, handler, catch_type) in exception_table {
            for value in [start, end, handler, catch_type] {
                out.extend(value.to_be_bytes());
            }
        }
        out.extend(self.encode_attributes(attributes));
        out
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(0xCAFE_BABEu32.to_be_bytes());
        out.extend(0u16.to_be_bytes());
        out.extend(52u16.to_be_bytes());
        out.extend(self.pool_count.to_be_bytes());
        out.extend(&self.pool);
        out.extend(self.access.to_be_bytes());
        out.extend(self.this_class.to_be_bytes());
        out.extend(self.super_class.to_be_bytes());
        out.extend((self.interfaces.len() as u16).to_be_bytes());
        for interface in &self.interfaces {
            out.extend(interface.to_be_bytes());
        }
        out.extend(self.field_count.to_be_bytes());
        out.extend(&self.fields);
        out.extend(self.method_count.to_be_bytes());
        out.extend(&self.methods);
        out.extend(self.attribute_count.to_be_bytes());
        out.extend(&self.attributes);
        out
    }
}

/// Two-byte big-endian operand.
pub(crate) fn u2(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// A class with a default constructor calling its superclass constructor.
pub(crate) fn class_with_constructor(name: &str, super_name: &str) -> ClassBuilder {
    let mut builder = ClassBuilder::new(name, Some(super_name));
    let init = builder.method_ref(super_name, "<init>", "()V");
    let [hi, lo] = u2(init);
    let body = builder.code(1, 1, &[0x2a, 0xb7, hi, lo, 0xb1], &[], Vec::new());
    builder.method(access::PUBLIC, "<init>", "()V", vec![("Code", body)]);
    builder
}
