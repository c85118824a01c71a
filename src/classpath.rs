//! Layered class lookup: root classes, embeddable classes and reference-only classes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::Result;
use crate::ir::{ClassFile, access};
use crate::reader::read_class;
use crate::reference::{
    ClassReference, FieldReference, MethodReference, PartialFieldReference,
    PartialMethodReference, RecordFieldReference, TypelessMethodReference,
};
use crate::types::MethodDescriptor;

const OBJECT: &str = "java/lang/Object";
const POLYMORPHIC_OWNERS: [&str; 2] = ["java/lang/invoke/MethodHandle", "java/lang/invoke/VarHandle"];
const POLYMORPHIC_DESCRIPTOR: &str = "([Ljava/lang/Object;)Ljava/lang/Object;";

/// Somewhere class bytes can be loaded from.
pub trait ClassSource: Send + Sync {
    /// Bytes of the class with the given internal name, if this source has it.
    fn resolve(&self, internal_name: &str) -> Result<Option<Vec<u8>>>;

    /// Internal names of every class in this source.
    fn list_entries(&self) -> Result<Vec<String>>;
}

/// Class bytes held in memory, keyed by internal name.
#[derive(Debug, Default)]
pub struct MemorySource {
    classes: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        MemorySource::default()
    }

    pub fn insert(&mut self, internal_name: &str, bytes: Vec<u8>) {
        self.classes.insert(internal_name.replace('.', "/"), bytes);
    }
}

impl ClassSource for MemorySource {
    fn resolve(&self, internal_name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.classes.get(internal_name).cloned())
    }

    fn list_entries(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.classes.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Which role a layer plays in a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerKind {
    /// Always kept; seeds the reachability walk.
    Root,
    /// Kept and relocated when reachable.
    Embed,
    /// Resolved against but never emitted.
    Refer,
}

/// One layer of the classpath with its own parsed-class cache.
pub struct ClassPathLayer {
    kind: LayerKind,
    sources: Vec<Box<dyn ClassSource>>,
    classes: DashMap<ClassReference, Arc<ClassFile>>,
}

impl ClassPathLayer {
    pub fn new(kind: LayerKind, sources: Vec<Box<dyn ClassSource>>) -> Self {
        ClassPathLayer {
            kind,
            sources,
            classes: DashMap::new(),
        }
    }

    /// A layer made of classes that are already parsed.
    pub fn with_classes(kind: LayerKind, classes: Vec<ClassFile>) -> Self {
        let layer = ClassPathLayer::new(kind, Vec::new());
        for class in classes {
            layer.add_class(class);
        }
        layer
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn add_class(&self, class: ClassFile) {
        self.classes.insert(class.name.clone(), Arc::new(class));
    }

    /// Parse every class the sources list. Returns the number of classes in the layer.
    pub fn load_all(&self) -> Result<usize> {
        let mut names = Vec::new();
        for source in &self.sources {
            names.extend(source.list_entries()?);
        }
        names.retain(|name| !name.ends_with("module-info"));
        names
            .par_iter()
            .map(|name| self.find_class(&ClassReference::new(name)).map(|_| ()))
            .collect::<Result<Vec<()>>>()?;
        debug!(layer = ?self.kind, classes = self.classes.len(), "loaded classpath layer");
        Ok(self.classes.len())
    }

    pub fn find_class(&self, name: &ClassReference) -> Result<Option<Arc<ClassFile>>> {
        if let Some(class) = self.classes.get(name) {
            return Ok(Some(class.clone()));
        }
        for source in &self.sources {
            let Some(bytes) = source.resolve(name.name())? else {
                continue;
            };
            trace!(class = %name, layer = ?self.kind, "parsing class");
            let class = read_class(&bytes)?;
            let stored = self
                .classes
                .entry(name.clone())
                .or_insert_with(|| Arc::new(class))
                .clone();
            return Ok(Some(stored));
        }
        Ok(None)
    }

    /// Every class parsed so far, ordered by name.
    pub fn classes(&self) -> Vec<Arc<ClassFile>> {
        let mut classes: Vec<Arc<ClassFile>> = self
            .classes
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        classes
    }

    /// Drop the cached handle to `name`, returning it.
    pub fn take_class(&self, name: &ClassReference) -> Option<Arc<ClassFile>> {
        self.classes.remove(name).map(|(_, class)| class)
    }
}

/// A class found on the combined classpath together with its layer.
#[derive(Clone, Debug)]
pub struct LoadedClass {
    pub layer: LayerKind,
    pub class: Arc<ClassFile>,
}

/// Root, embed and refer layers searched in that order.
pub struct CombinedClassPath {
    root: ClassPathLayer,
    embed: ClassPathLayer,
    refer: ClassPathLayer,
}

impl CombinedClassPath {
    pub fn new(root: ClassPathLayer, embed: ClassPathLayer, refer: ClassPathLayer) -> Self {
        CombinedClassPath { root, embed, refer }
    }

    pub fn layer(&self, kind: LayerKind) -> &ClassPathLayer {
        match kind {
            LayerKind::Root => &self.root,
            LayerKind::Embed => &self.embed,
            LayerKind::Refer => &self.refer,
        }
    }

    fn layers(&self) -> [&ClassPathLayer; 3] {
        [&self.root, &self.embed, &self.refer]
    }

    pub fn find_class(&self, name: &ClassReference) -> Result<Option<LoadedClass>> {
        for layer in self.layers() {
            if let Some(class) = layer.find_class(name)? {
                return Ok(Some(LoadedClass {
                    layer: layer.kind(),
                    class,
                }));
            }
        }
        Ok(None)
    }

    /// Direct supertypes of `class` that can be found, superclass first.
    pub fn super_types(&self, class: &ClassFile) -> Result<Vec<LoadedClass>> {
        let mut found = Vec::new();
        for name in class.super_class.iter().chain(class.interfaces.iter()) {
            if let Some(loaded) = self.find_class(name)? {
                found.push(loaded);
            }
        }
        Ok(found)
    }

    /// `owner` followed by its superclass chain, then superinterfaces, each once.
    fn hierarchy(&self, owner: &ClassReference) -> Result<Vec<Arc<ClassFile>>> {
        let owner = if owner.is_array() {
            ClassReference::new(OBJECT)
        } else {
            owner.clone()
        };
        let mut visited = HashSet::new();
        let mut pending = vec![owner];
        let mut classes = Vec::new();
        while let Some(name) = pending.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let Some(loaded) = self.find_class(&name)? else {
                continue;
            };
            pending.extend(loaded.class.interfaces.iter().rev().cloned());
            if let Some(super_class) = &loaded.class.super_class {
                pending.push(super_class.clone());
            }
            classes.push(loaded.class);
        }
        Ok(classes)
    }

    /// The declaration `method` resolves to.
    pub fn find_method(&self, method: &MethodReference) -> Result<Option<MethodReference>> {
        for class in self.hierarchy(&method.owner)? {
            if let Some(found) = class.find_method(&method.name, &method.descriptor) {
                return Ok(Some(class.method_reference(found)));
            }
        }
        self.find_polymorphic_method(method)
    }

    /// `MethodHandle.invoke` and friends accept any descriptor.
    fn find_polymorphic_method(&self, method: &MethodReference) -> Result<Option<MethodReference>> {
        if !POLYMORPHIC_OWNERS.contains(&method.owner.name()) {
            return Ok(None);
        }
        let Some(loaded) = self.find_class(&method.owner)? else {
            return Ok(None);
        };
        let descriptor = MethodDescriptor::parse(POLYMORPHIC_DESCRIPTOR)?;
        let flags = access::VARARGS | access::NATIVE;
        Ok(loaded
            .class
            .find_method(&method.name, &descriptor)
            .filter(|found| found.access & flags == flags)
            .map(|found| loaded.class.method_reference(found)))
    }

    pub fn find_methods(&self, method: &PartialMethodReference) -> Result<Vec<MethodReference>> {
        let mut found = Vec::new();
        for class in self.hierarchy(&method.owner)? {
            for candidate in &class.methods {
                let reference = class.method_reference(candidate);
                if method.matches(&reference) {
                    found.push(reference);
                }
            }
        }
        Ok(found)
    }

    pub fn find_typeless_methods(&self, method: &TypelessMethodReference) -> Result<Vec<MethodReference>> {
        let mut found = Vec::new();
        for class in self.hierarchy(&method.owner)? {
            for candidate in &class.methods {
                if *candidate.name == *method.name {
                    found.push(class.method_reference(candidate));
                }
            }
        }
        Ok(found)
    }

    pub fn find_field(&self, field: &FieldReference) -> Result<Option<FieldReference>> {
        for class in self.hierarchy(&field.owner)? {
            if let Some(found) = class.find_field(&field.name, &field.descriptor) {
                return Ok(Some(class.field_reference(found)));
            }
        }
        Ok(None)
    }

    pub fn find_fields(&self, field: &PartialFieldReference) -> Result<Vec<FieldReference>> {
        let mut found = Vec::new();
        for class in self.hierarchy(&field.owner)? {
            for candidate in &class.fields {
                if *candidate.name == *field.name {
                    found.push(class.field_reference(candidate));
                }
            }
        }
        Ok(found)
    }

    pub fn find_record_field(&self, field: &RecordFieldReference) -> Result<Option<RecordFieldReference>> {
        for class in self.hierarchy(&field.owner)? {
            let Some(components) = &class.record_fields else {
                continue;
            };
            if let Some(found) = components
                .iter()
                .find(|component| *component.name == *field.name && component.descriptor == field.descriptor)
            {
                return Ok(Some(class.record_field_reference(found)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ClassField, ClassMethod};
    use crate::types::{PartialMethodDescriptor, TypeDescriptor};

    fn class(name: &str, super_class: Option<&str>) -> ClassFile {
        ClassFile::new(ClassReference::new(name), super_class.map(ClassReference::new))
    }

    fn method(name: &str, descriptor: &str) -> ClassMethod {
        ClassMethod::new(
            access::PUBLIC,
            name,
            MethodDescriptor::parse(descriptor).expect("parse descriptor"),
        )
    }

    fn classpath() -> CombinedClassPath {
        let mut object = class(OBJECT, None);
        object.methods.push(method("hashCode", "()I"));
        object.methods.push(method("clone", "()Ljava/lang/Object;"));

        let mut runnable = class("java/lang/Runnable", Some(OBJECT));
        runnable.access |= access::INTERFACE;
        runnable.methods.push(method("run", "()V"));

        let mut base = class("a/Base", Some(OBJECT));
        base.interfaces.push(ClassReference::new("java/lang/Runnable"));
        base.methods.push(method("greet", "(Ljava/lang/String;)V"));
        base.methods.push(method("greet", "(I)V"));
        base.fields.push(ClassField::new(
            access::PUBLIC,
            "count",
            TypeDescriptor::parse("I").expect("parse descriptor"),
        ));

        let child = class("a/Child", Some("a/Base"));

        CombinedClassPath::new(
            ClassPathLayer::with_classes(LayerKind::Root, vec![child]),
            ClassPathLayer::with_classes(LayerKind::Embed, vec![base]),
            ClassPathLayer::with_classes(LayerKind::Refer, vec![object, runnable]),
        )
    }

    #[test]
    fn finds_classes_with_their_layer() {
        let classpath = classpath();
        let loaded = classpath
            .find_class(&ClassReference::new("a.Base"))
            .expect("lookup")
            .expect("found");
        assert_eq!(loaded.layer, LayerKind::Embed);
        assert!(
            classpath
                .find_class(&ClassReference::new("a/Missing"))
                .expect("lookup")
                .is_none()
        );
    }

    #[test]
    fn methods_resolve_through_superclasses_and_interfaces() {
        let classpath = classpath();
        let inherited = MethodReference::new(
            ClassReference::new("a/Child"),
            "run",
            MethodDescriptor::parse("()V").expect("parse descriptor"),
        );
        let found = classpath.find_method(&inherited).expect("lookup").expect("found");
        assert_eq!(found.owner.name(), "java/lang/Runnable");

        let overloads = classpath
            .find_typeless_methods(&TypelessMethodReference::new(ClassReference::new("a/Child"), "greet"))
            .expect("lookup");
        assert_eq!(overloads.len(), 2);

        let partial = PartialMethodReference::new(
            ClassReference::new("a/Child"),
            "greet",
            PartialMethodDescriptor::parse("(I)").expect("parse descriptor"),
        );
        let found = classpath.find_methods(&partial).expect("lookup");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].descriptor.to_string(), "(I)V");
    }

    #[test]
    fn array_methods_resolve_on_object() {
        let classpath = classpath();
        let clone = MethodReference::new(
            ClassReference::new("[La/Child;"),
            "clone",
            MethodDescriptor::parse("()Ljava/lang/Object;").expect("parse descriptor"),
        );
        let found = classpath.find_method(&clone).expect("lookup").expect("found");
        assert_eq!(found.owner.name(), OBJECT);
    }

    #[test]
    fn fields_resolve_by_name_or_descriptor() {
        let classpath = classpath();
        let field = FieldReference::new(
            ClassReference::new("a/Child"),
            "count",
            TypeDescriptor::parse("I").expect("parse descriptor"),
        );
        assert_eq!(
            classpath.find_field(&field).expect("lookup").expect("found").owner.name(),
            "a/Base"
        );
        let wrong_type = FieldReference::new(
            ClassReference::new("a/Child"),
            "count",
            TypeDescriptor::parse("J").expect("parse descriptor"),
        );
        assert!(classpath.find_field(&wrong_type).expect("lookup").is_none());
        assert_eq!(
            classpath
                .find_fields(&PartialFieldReference::new(ClassReference::new("a/Child"), "count"))
                .expect("lookup")
                .len(),
            1
        );
    }

    #[test]
    fn polymorphic_handle_methods_accept_any_descriptor() {
        let mut handle = class("java/lang/invoke/MethodHandle", Some(OBJECT));
        let mut invoke = method("invokeExact", POLYMORPHIC_DESCRIPTOR);
        invoke.access |= access::VARARGS | access::NATIVE;
        handle.methods.push(invoke);
        let classpath = CombinedClassPath::new(
            ClassPathLayer::with_classes(LayerKind::Root, Vec::new()),
            ClassPathLayer::with_classes(LayerKind::Embed, Vec::new()),
            ClassPathLayer::with_classes(LayerKind::Refer, vec![handle, class(OBJECT, None)]),
        );
        let call = MethodReference::new(
            ClassReference::new("java/lang/invoke/MethodHandle"),
            "invokeExact",
            MethodDescriptor::parse("(II)Ljava/lang/String;").expect("parse descriptor"),
        );
        let found = classpath.find_method(&call).expect("lookup").expect("found");
        assert_eq!(found.descriptor.to_string(), POLYMORPHIC_DESCRIPTOR);
    }

    #[test]
    fn memory_source_lists_sorted_entries() {
        let mut source = MemorySource::new();
        source.insert("b.B", vec![1]);
        source.insert("a/A", vec![2]);
        assert_eq!(source.list_entries().expect("list"), vec!["a/A", "b/B"]);
        assert_eq!(source.resolve("b/B").expect("resolve"), Some(vec![1]));
        assert_eq!(source.resolve("c/C").expect("resolve"), None);
    }
}
