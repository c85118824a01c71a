//! Longest-prefix relocation of class names and everything that embeds them.
//!
//! Every `map_*` function returns `None` when nothing inside the value changed,
//! so callers can keep the original value without comparing structures.

use std::any::{Any, TypeId};
use std::fmt;

use dashmap::DashMap;

use crate::ir::{
    ClassAnnotation, Constant, ConstantDynamic, ConstantMethodHandle, FrameElement,
};
use crate::reference::{ClassReference, FieldReference, MethodReference, RecordFieldReference};
use crate::types::{
    ClassSignature, ClassTypeSignature, InnerClassSignature, MethodDescriptor, MethodSignature,
    TypeArgument, TypeDescriptor, TypeKind, TypeParameter, TypeSignature,
};
use crate::{Error, Result};

/// Values the mapper relocates as a unit and that may be excluded by identity.
pub trait RelocationPrimitive: Any + Clone + PartialEq + Send + Sync {}

impl RelocationPrimitive for ClassReference {}
impl RelocationPrimitive for MethodReference {}
impl RelocationPrimitive for FieldReference {}
impl RelocationPrimitive for RecordFieldReference {}
impl RelocationPrimitive for TypeDescriptor {}
impl RelocationPrimitive for MethodDescriptor {}
impl RelocationPrimitive for TypeSignature {}
impl RelocationPrimitive for TypeArgument {}
impl RelocationPrimitive for TypeParameter {}
impl RelocationPrimitive for ClassSignature {}
impl RelocationPrimitive for MethodSignature {}

/// Address and concrete type of an excluded instance.
type ExcludeKey = (usize, TypeId);

/// Copy of the excluded value; a slot that now holds a different value no longer matches.
struct Snapshot(Box<dyn Any + Send + Sync>);

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Snapshot")
    }
}

/// An ordered prefix rename table plus a per-run identity exclude set.
#[derive(Debug, Default)]
pub struct RelocationMapping {
    entries: Vec<(String, String)>,
    excluded: DashMap<ExcludeKey, Snapshot>,
}

impl RelocationMapping {
    /// Build from `(from, to)` pairs. Dots become slashes and surrounding slashes
    /// are dropped; an empty or repeated `from` is rejected.
    pub fn new<I, F, T>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (F, T)>,
        F: AsRef<str>,
        T: AsRef<str>,
    {
        let mut normalized: Vec<(String, String)> = Vec::new();
        for (from, to) in entries {
            let raw = from.as_ref();
            let from = normalize(raw);
            if from.is_empty() {
                return Err(Error::EmptyMapping(raw.to_string()));
            }
            let to = normalize(to.as_ref());
            if normalized.iter().any(|(existing, _)| *existing == from) {
                return Err(Error::DuplicateMapping(from));
            }
            normalized.push((from, to));
        }
        normalized.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Ok(RelocationMapping {
            entries: normalized,
            excluded: DashMap::new(),
        })
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Opt this exact instance out of relocation for the rest of the run.
    pub fn exclude<T: RelocationPrimitive>(&self, value: &T) {
        self.excluded.insert(
            (address(value), TypeId::of::<T>()),
            Snapshot(Box::new(value.clone())),
        );
    }

    /// Dynamic form of [`RelocationMapping::exclude`]; rejects anything that is not
    /// a relocation primitive.
    pub fn exclude_any(&self, value: &dyn Any) -> Result<()> {
        let snapshot = snapshot::<ClassReference>(value)
            .or_else(|| snapshot::<MethodReference>(value))
            .or_else(|| snapshot::<FieldReference>(value))
            .or_else(|| snapshot::<RecordFieldReference>(value))
            .or_else(|| snapshot::<TypeDescriptor>(value))
            .or_else(|| snapshot::<MethodDescriptor>(value))
            .or_else(|| snapshot::<TypeSignature>(value))
            .or_else(|| snapshot::<TypeArgument>(value))
            .or_else(|| snapshot::<TypeParameter>(value))
            .or_else(|| snapshot::<ClassSignature>(value))
            .or_else(|| snapshot::<MethodSignature>(value));
        let type_id = Any::type_id(value);
        let Some(snapshot) = snapshot else {
            return Err(Error::NotRelocationPrimitive(format!("{type_id:?}")));
        };
        let address = value as *const dyn Any as *const () as usize;
        self.excluded.insert((address, type_id), snapshot);
        Ok(())
    }

    pub fn is_excluded<T: RelocationPrimitive>(&self, value: &T) -> bool {
        if self.excluded.is_empty() {
            return false;
        }
        self.excluded
            .get(&(address(value), TypeId::of::<T>()))
            .is_some_and(|entry| entry.value().0.downcast_ref::<T>() == Some(value))
    }

    /// New internal name for `name`, matching the longest entry that is equal to
    /// it or a `/`-delimited prefix of it.
    pub fn map_class(&self, name: &str) -> Option<String> {
        self.map_file_path(name)
    }

    /// Prefix mapping on a slash-delimited path, e.g. a resource or source path.
    pub fn map_file_path(&self, path: &str) -> Option<String> {
        for (from, to) in &self.entries {
            if path == from {
                return (to != path).then(|| to.clone());
            }
            if path.len() > from.len()
                && path.starts_with(from.as_str())
                && path.as_bytes()[from.len()] == b'/'
            {
                let mapped = format!("{to}{}", &path[from.len()..]);
                return (mapped != path).then_some(mapped);
            }
        }
        None
    }

    pub fn map_class_ref(&self, reference: &ClassReference) -> Option<ClassReference> {
        if self.is_excluded(reference) {
            return None;
        }
        if reference.is_array() {
            let descriptor = reference.descriptor();
            return self
                .map_type_descriptor(&descriptor)
                .map(|mapped| ClassReference::new(mapped.as_str()));
        }
        self.map_class(reference.name())
            .map(|mapped| ClassReference::new(&mapped))
    }

    pub fn map_type_descriptor(&self, descriptor: &TypeDescriptor) -> Option<TypeDescriptor> {
        if self.is_excluded(descriptor) {
            return None;
        }
        match descriptor.kind() {
            TypeKind::Primitive(_) => None,
            TypeKind::Array => {
                let element = descriptor.element_type();
                self.map_type_descriptor(&element)
                    .map(|mapped| mapped.array_of(descriptor.array_dimensions()))
            }
            TypeKind::Class => descriptor
                .class_name()
                .and_then(|name| self.map_class(name))
                .map(|mapped| TypeDescriptor::object(&mapped)),
        }
    }

    pub fn map_method_descriptor(&self, descriptor: &MethodDescriptor) -> Option<MethodDescriptor> {
        if self.is_excluded(descriptor) {
            return None;
        }
        let mapped_return = self.map_type_descriptor(descriptor.return_type());
        let mapped_arguments = map_list(descriptor.arguments(), |argument| {
            self.map_type_descriptor(argument)
        });
        if mapped_return.is_none() && mapped_arguments.is_none() {
            return None;
        }
        Some(MethodDescriptor::new(
            mapped_return.unwrap_or_else(|| descriptor.return_type().clone()),
            mapped_arguments.unwrap_or_else(|| descriptor.arguments().to_vec()),
        ))
    }

    pub fn map_field_ref(&self, reference: &FieldReference) -> Option<FieldReference> {
        if self.is_excluded(reference) {
            return None;
        }
        let owner = self.map_class_ref(&reference.owner);
        let descriptor = self.map_type_descriptor(&reference.descriptor);
        if owner.is_none() && descriptor.is_none() {
            return None;
        }
        Some(FieldReference {
            owner: owner.unwrap_or_else(|| reference.owner.clone()),
            name: reference.name.clone(),
            descriptor: descriptor.unwrap_or_else(|| reference.descriptor.clone()),
        })
    }

    pub fn map_record_field_ref(&self, reference: &RecordFieldReference) -> Option<RecordFieldReference> {
        if self.is_excluded(reference) {
            return None;
        }
        let owner = self.map_class_ref(&reference.owner);
        let descriptor = self.map_type_descriptor(&reference.descriptor);
        if owner.is_none() && descriptor.is_none() {
            return None;
        }
        Some(RecordFieldReference {
            owner: owner.unwrap_or_else(|| reference.owner.clone()),
            name: reference.name.clone(),
            descriptor: descriptor.unwrap_or_else(|| reference.descriptor.clone()),
        })
    }

    pub fn map_method_ref(&self, reference: &MethodReference) -> Option<MethodReference> {
        if self.is_excluded(reference) {
            return None;
        }
        let owner = self.map_class_ref(&reference.owner);
        let descriptor = self.map_method_descriptor(&reference.descriptor);
        if owner.is_none() && descriptor.is_none() {
            return None;
        }
        Some(MethodReference {
            owner: owner.unwrap_or_else(|| reference.owner.clone()),
            name: reference.name.clone(),
            descriptor: descriptor.unwrap_or_else(|| reference.descriptor.clone()),
        })
    }

    pub fn map_type_signature(&self, signature: &TypeSignature) -> Option<TypeSignature> {
        if self.is_excluded(signature) {
            return None;
        }
        match signature {
            TypeSignature::Primitive(_) | TypeSignature::TypeVariable(_) => None,
            TypeSignature::Array(element) => self
                .map_type_signature(element)
                .map(|mapped| TypeSignature::Array(Box::new(mapped))),
            TypeSignature::Class(class) => self.map_class_type_signature(class).map(TypeSignature::Class),
        }
    }

    fn map_class_type_signature(&self, class: &ClassTypeSignature) -> Option<ClassTypeSignature> {
        let name = self.map_class(&class.name);
        let arguments = map_list(&class.arguments, |argument| self.map_type_argument(argument));
        let inner = map_list(&class.inner, |inner| {
            map_list(&inner.arguments, |argument| self.map_type_argument(argument)).map(
                |arguments| InnerClassSignature {
                    name: inner.name.clone(),
                    arguments,
                },
            )
        });
        if name.is_none() && arguments.is_none() && inner.is_none() {
            return None;
        }
        Some(ClassTypeSignature {
            name: name.unwrap_or_else(|| class.name.clone()),
            arguments: arguments.unwrap_or_else(|| class.arguments.clone()),
            inner: inner.unwrap_or_else(|| class.inner.clone()),
        })
    }

    pub fn map_type_argument(&self, argument: &TypeArgument) -> Option<TypeArgument> {
        if self.is_excluded(argument) {
            return None;
        }
        match argument {
            TypeArgument::Star => None,
            TypeArgument::Bounded { variant, signature } => {
                self.map_type_signature(signature)
                    .map(|signature| TypeArgument::Bounded {
                        variant: *variant,
                        signature,
                    })
            }
        }
    }

    pub fn map_type_parameter(&self, parameter: &TypeParameter) -> Option<TypeParameter> {
        if self.is_excluded(parameter) {
            return None;
        }
        let class_bound = parameter
            .class_bound
            .as_ref()
            .and_then(|bound| self.map_type_signature(bound));
        let interface_bounds = map_list(&parameter.interface_bounds, |bound| {
            self.map_type_signature(bound)
        });
        if class_bound.is_none() && interface_bounds.is_none() {
            return None;
        }
        Some(TypeParameter {
            name: parameter.name.clone(),
            class_bound: class_bound.or_else(|| parameter.class_bound.clone()),
            interface_bounds: interface_bounds.unwrap_or_else(|| parameter.interface_bounds.clone()),
        })
    }

    pub fn map_class_signature(&self, signature: &ClassSignature) -> Option<ClassSignature> {
        if self.is_excluded(signature) {
            return None;
        }
        let type_parameters = map_list(&signature.type_parameters, |parameter| {
            self.map_type_parameter(parameter)
        });
        let superclass = self.map_type_signature(&signature.superclass);
        let interfaces = map_list(&signature.interfaces, |interface| {
            self.map_type_signature(interface)
        });
        if type_parameters.is_none() && superclass.is_none() && interfaces.is_none() {
            return None;
        }
        Some(ClassSignature {
            type_parameters: type_parameters.unwrap_or_else(|| signature.type_parameters.clone()),
            superclass: superclass.unwrap_or_else(|| signature.superclass.clone()),
            interfaces: interfaces.unwrap_or_else(|| signature.interfaces.clone()),
        })
    }

    pub fn map_method_signature(&self, signature: &MethodSignature) -> Option<MethodSignature> {
        if self.is_excluded(signature) {
            return None;
        }
        let type_parameters = map_list(&signature.type_parameters, |parameter| {
            self.map_type_parameter(parameter)
        });
        let parameters = map_list(&signature.parameters, |parameter| {
            self.map_type_signature(parameter)
        });
        let return_type = self.map_type_signature(&signature.return_type);
        let throws = map_list(&signature.throws, |thrown| self.map_type_signature(thrown));
        if type_parameters.is_none() && parameters.is_none() && return_type.is_none() && throws.is_none() {
            return None;
        }
        Some(MethodSignature {
            type_parameters: type_parameters.unwrap_or_else(|| signature.type_parameters.clone()),
            parameters: parameters.unwrap_or_else(|| signature.parameters.clone()),
            return_type: return_type.unwrap_or_else(|| signature.return_type.clone()),
            throws: throws.unwrap_or_else(|| signature.throws.clone()),
        })
    }

    /// Class, method type, handle and dynamic constants; numbers and strings are unchanged.
    pub fn map_constant(&self, constant: &Constant) -> Option<Constant> {
        match constant {
            Constant::Int(_)
            | Constant::Long(_)
            | Constant::Float(_)
            | Constant::Double(_)
            | Constant::String(_) => None,
            Constant::Class(class) => self.map_class_ref(class).map(Constant::Class),
            Constant::MethodType(descriptor) => self
                .map_method_descriptor(descriptor)
                .map(Constant::MethodType),
            Constant::MethodHandle(handle) => self.map_method_handle(handle).map(Constant::MethodHandle),
            Constant::Dynamic(dynamic) => self.map_constant_dynamic(dynamic).map(Constant::Dynamic),
        }
    }

    pub fn map_method_handle(&self, handle: &ConstantMethodHandle) -> Option<ConstantMethodHandle> {
        match handle {
            ConstantMethodHandle::Field { kind, field } => {
                self.map_field_ref(field)
                    .map(|field| ConstantMethodHandle::Field { kind: *kind, field })
            }
            ConstantMethodHandle::Method {
                kind,
                method,
                is_interface,
            } => self
                .map_method_ref(method)
                .map(|method| ConstantMethodHandle::Method {
                    kind: *kind,
                    method,
                    is_interface: *is_interface,
                }),
        }
    }

    pub fn map_constant_dynamic(&self, dynamic: &ConstantDynamic) -> Option<ConstantDynamic> {
        let descriptor = self.map_type_descriptor(&dynamic.descriptor);
        let bootstrap = self.map_method_handle(&dynamic.bootstrap);
        let arguments = map_list(&dynamic.arguments, |argument| self.map_constant(argument));
        if descriptor.is_none() && bootstrap.is_none() && arguments.is_none() {
            return None;
        }
        Some(ConstantDynamic {
            name: dynamic.name.clone(),
            descriptor: descriptor.unwrap_or_else(|| dynamic.descriptor.clone()),
            bootstrap: bootstrap.unwrap_or_else(|| dynamic.bootstrap.clone()),
            arguments: arguments.unwrap_or_else(|| dynamic.arguments.clone()),
        })
    }

    pub fn map_frame_element(&self, element: &FrameElement) -> Option<FrameElement> {
        match element {
            FrameElement::Object(class) => self.map_class_ref(class).map(FrameElement::Object),
            FrameElement::Top
            | FrameElement::Integer
            | FrameElement::Float
            | FrameElement::Long
            | FrameElement::Double
            | FrameElement::Null
            | FrameElement::UninitializedThis
            | FrameElement::Uninitialized(_) => None,
        }
    }

    /// Rewrite an annotation in place; returns whether anything changed.
    pub fn relocate_annotation(&self, annotation: &mut ClassAnnotation) -> bool {
        let mut changed = false;
        if let Some(mapped) = self.map_class_ref(&annotation.annotation_class) {
            annotation.annotation_class = mapped;
            changed = true;
        }
        for pair in &mut annotation.values {
            changed |= self.relocate_annotation_value(&mut pair.value);
        }
        changed
    }

    /// Rewrite an element value in place; returns whether anything changed.
    pub fn relocate_annotation_value(&self, value: &mut crate::ir::AnnotationValue) -> bool {
        use crate::ir::AnnotationValue;
        match value {
            AnnotationValue::Enum { owner, .. } => match self.map_class_ref(owner) {
                Some(mapped) => {
                    *owner = mapped;
                    true
                }
                None => false,
            },
            AnnotationValue::Class(descriptor) => match self.map_type_descriptor(descriptor) {
                Some(mapped) => {
                    *descriptor = mapped;
                    true
                }
                None => false,
            },
            AnnotationValue::Annotation(nested) => self.relocate_annotation(nested),
            AnnotationValue::Array(values) => {
                let mut changed = false;
                for value in values {
                    changed |= self.relocate_annotation_value(value);
                }
                changed
            }
            AnnotationValue::Byte(_)
            | AnnotationValue::Char(_)
            | AnnotationValue::Double(_)
            | AnnotationValue::Float(_)
            | AnnotationValue::Int(_)
            | AnnotationValue::Long(_)
            | AnnotationValue::Short(_)
            | AnnotationValue::Boolean(_)
            | AnnotationValue::String(_) => false,
        }
    }
}

fn normalize(name: &str) -> String {
    name.replace('.', "/").trim_matches('/').to_string()
}

fn address<T>(value: &T) -> usize {
    value as *const T as *const () as usize
}

fn snapshot<T: RelocationPrimitive>(value: &dyn Any) -> Option<Snapshot> {
    value
        .downcast_ref::<T>()
        .map(|value| Snapshot(Box::new(value.clone())))
}

/// Map each element; `None` when no element changed.
fn map_list<T: Clone>(values: &[T], mut map: impl FnMut(&T) -> Option<T>) -> Option<Vec<T>> {
    let mut result: Option<Vec<T>> = None;
    for (index, value) in values.iter().enumerate() {
        if let Some(mapped) = map(value) {
            let list = result.get_or_insert_with(|| values[..index].to_vec());
            list.push(mapped);
        } else if let Some(list) = &mut result {
            list.push(value.clone());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mapping(entries: &[(&str, &str)]) -> RelocationMapping {
        RelocationMapping::new(entries.iter().copied()).expect("build mapping")
    }

    #[test]
    fn longest_prefix_wins() {
        let mapping = mapping(&[("a", "y"), ("a/b", "x")]);
        assert_eq!(mapping.map_class("a/b/C").as_deref(), Some("x/C"));
        assert_eq!(mapping.map_class("a/C").as_deref(), Some("y/C"));
        assert_eq!(mapping.map_class("a/b").as_deref(), Some("x"));
        assert_eq!(mapping.map_class("ab/C"), None);
    }

    #[test]
    fn entries_are_normalized_and_sorted() {
        let mapping = mapping(&[("com.acme", "shaded.acme"), ("/a/", "b"), ("zz/y", "q")]);
        let froms: Vec<&str> = mapping.entries().iter().map(|(from, _)| from.as_str()).collect();
        assert_eq!(froms, vec!["com/acme", "zz/y", "a"]);
        assert_eq!(mapping.entries()[0].1, "shaded/acme");
    }

    #[test]
    fn duplicate_entries_are_rejected() {
        let result = RelocationMapping::new([("com/acme", "x"), ("com.acme", "y")]);
        assert!(matches!(result, Err(Error::DuplicateMapping(name)) if name == "com/acme"));
    }

    #[test]
    fn empty_prefixes_are_rejected() {
        for from in ["/", "", ".", "//"] {
            let result = RelocationMapping::new([(from, "shaded")]);
            assert!(
                matches!(&result, Err(Error::EmptyMapping(raw)) if raw == from),
                "{from:?}: {result:?}"
            );
        }
    }

    #[test]
    fn method_descriptor_mapping_reports_unchanged() {
        let mapping = mapping(&[("com/acme", "shaded/acme")]);
        let descriptor = MethodDescriptor::parse("(Lcom/acme/Foo;)V").expect("parse descriptor");
        assert_eq!(
            mapping
                .map_method_descriptor(&descriptor)
                .expect("mapped")
                .to_string(),
            "(Lshaded/acme/Foo;)V"
        );
        let untouched = MethodDescriptor::parse("(Ljava/lang/String;)V").expect("parse descriptor");
        assert_eq!(mapping.map_method_descriptor(&untouched), None);
    }

    #[test]
    fn arrays_and_references_map_recursively() {
        let mapping = mapping(&[("com/acme", "shaded/acme")]);
        let array = ClassReference::new("[[Lcom/acme/Foo;");
        assert_eq!(
            mapping.map_class_ref(&array).expect("mapped").name(),
            "[[Lshaded/acme/Foo;"
        );
        assert_eq!(mapping.map_class_ref(&ClassReference::new("[I")), None);

        let field = FieldReference::new(
            ClassReference::new("a/A"),
            "foo",
            TypeDescriptor::parse("Lcom/acme/Foo;").expect("parse descriptor"),
        );
        let mapped = mapping.map_field_ref(&field).expect("mapped");
        assert_eq!(mapped.owner.name(), "a/A");
        assert_eq!(mapped.descriptor.as_str(), "Lshaded/acme/Foo;");
    }

    #[test]
    fn signatures_map_nested_arguments() {
        let mapping = mapping(&[("com/acme", "shaded/acme")]);
        let signature = MethodSignature::parse(
            "<T:Lcom/acme/Base;>(Ljava/util/List<+Lcom/acme/Foo;>;TT;)V^Lcom/acme/Oops;",
        )
        .expect("parse signature");
        assert_eq!(
            mapping
                .map_method_signature(&signature)
                .expect("mapped")
                .to_string(),
            "<T:Lshaded/acme/Base;>(Ljava/util/List<+Lshaded/acme/Foo;>;TT;)V^Lshaded/acme/Oops;"
        );
        let untouched = TypeSignature::parse("Ljava/util/Map<TK;*>;").expect("parse signature");
        assert_eq!(mapping.map_type_signature(&untouched), None);
        assert_eq!(
            mapping.map_type_signature(&TypeSignature::type_variable("T")),
            None
        );
    }

    #[test]
    fn excluded_instances_are_left_alone() {
        let mapping = mapping(&[("com/acme", "shaded/acme")]);
        let kept = ClassReference::new("com/acme/Foo");
        let other = ClassReference::new("com/acme/Foo");
        mapping.exclude(&kept);
        assert_eq!(mapping.map_class_ref(&kept), None);
        assert!(mapping.map_class_ref(&other).is_some());
    }

    #[test]
    fn exclusion_does_not_follow_a_reused_slot() {
        let mapping = mapping(&[("com/acme", "shaded/acme")]);
        let mut slot = ClassReference::new("com/acme/Foo");
        mapping.exclude(&slot);
        assert_eq!(mapping.map_class_ref(&slot), None);

        slot = ClassReference::new("com/acme/Bar");
        assert_eq!(
            mapping.map_class_ref(&slot),
            Some(ClassReference::new("shaded/acme/Bar"))
        );
    }

    #[test]
    fn excluding_a_member_leaves_its_owner_alone() {
        let mapping = mapping(&[("com/acme", "shaded/acme")]);
        let method = MethodReference::new(
            ClassReference::new("com/acme/Foo"),
            "run",
            MethodDescriptor::parse("()V").expect("parse descriptor"),
        );
        mapping.exclude(&method);
        assert_eq!(mapping.map_method_ref(&method), None);
        assert_eq!(
            mapping.map_class_ref(&method.owner),
            Some(ClassReference::new("shaded/acme/Foo"))
        );
    }

    #[test]
    fn excluding_non_primitive_fails_fast() {
        let mapping = mapping(&[]);
        let not_primitive = String::from("com/acme/Foo");
        assert!(matches!(
            mapping.exclude_any(&not_primitive),
            Err(Error::NotRelocationPrimitive(_))
        ));
        let descriptor = TypeDescriptor::parse("Lcom/acme/Foo;").expect("parse descriptor");
        mapping.exclude_any(&descriptor).expect("exclude descriptor");
        assert!(mapping.is_excluded(&descriptor));
    }

    #[test]
    fn constants_map_handles_and_classes() {
        let mapping = mapping(&[("com/acme", "shaded/acme")]);
        let constant = Constant::Class(ClassReference::new("com/acme/Foo"));
        assert_eq!(
            mapping.map_constant(&constant),
            Some(Constant::Class(ClassReference::new("shaded/acme/Foo")))
        );
        assert_eq!(
            mapping.map_constant(&Constant::String("com/acme/Foo".to_string())),
            None
        );
    }

    fn segment() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["a", "b", "c"]).prop_map(str::to_string)
    }

    fn path() -> impl Strategy<Value = String> {
        prop::collection::vec(segment(), 1..5).prop_map(|segments| segments.join("/"))
    }

    proptest! {
        #[test]
        fn chosen_entry_is_longest_matching_prefix(
            froms in prop::collection::btree_set(path(), 1..6),
            name in path(),
        ) {
            let entries: Vec<(String, String)> = froms
                .iter()
                .enumerate()
                .map(|(index, from)| (from.clone(), format!("target{index}")))
                .collect();
            let mapping = RelocationMapping::new(entries.clone()).expect("build mapping");
            let longest = entries
                .iter()
                .filter(|(from, _)| name == *from || name.starts_with(&format!("{from}/")))
                .max_by_key(|(from, _)| from.len());
            let expected = longest.map(|(from, to)| format!("{to}{}", &name[from.len()..]));
            prop_assert_eq!(mapping.map_class(&name), expected);
        }
    }
}
