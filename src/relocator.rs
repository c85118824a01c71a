//! One relocation run from class sources to relocated IR.

use std::sync::Arc;

use tracing::{debug, info, info_span};

use crate::classpath::{ClassPathLayer, ClassSource, CombinedClassPath, LayerKind};
use crate::diagnostic::{
    DiagnosticHandler, InternalDiagnosticHandlerWrapper, Location, SuppressingDiagnostic,
    SuppressionContainer, basic,
};
use crate::ir::{ClassFile, UnknownAttribute};
use crate::plugin::{ClassRelocatorPlugin, Pipeline, PluginSet, PrePluginContext};
use crate::reachability::reflect::ReflectionMapping;
use crate::reachability::{ComputeReferenceEnvironment, Reachability, ReachableSet, RootCollector};
use crate::reference::{ClassReference, FieldReference, MethodReference};
use crate::relocation::RelocationMapping;
use crate::types::{MethodDescriptor, TypeDescriptor};
use crate::{Error, Result};

/// What a successful run hands to the caller.
#[derive(Debug)]
pub struct RelocationOutput {
    /// Kept classes, relocated, root classes first and each layer ordered by original name.
    pub classes: Vec<ClassFile>,
    pub reachable: ReachableSet,
    pub error_count: usize,
    pub warning_count: usize,
}

/// Configuration of one run.
pub struct Relocator {
    root: Vec<Box<dyn ClassSource>>,
    embed: Vec<Box<dyn ClassSource>>,
    refer: Vec<Box<dyn ClassSource>>,
    relocations: Vec<(String, String)>,
    suppressions: SuppressionContainer,
    reflection: ReflectionMapping,
    keep_runtime_invisible_annotation: bool,
    plugins: PluginSet,
}

impl Default for Relocator {
    fn default() -> Self {
        Relocator::new()
    }
}

impl Relocator {
    /// A run with the default reflection mapping and nothing else.
    pub fn new() -> Self {
        Relocator {
            root: Vec::new(),
            embed: Vec::new(),
            refer: Vec::new(),
            relocations: Vec::new(),
            suppressions: SuppressionContainer::new(),
            reflection: ReflectionMapping::with_defaults(),
            keep_runtime_invisible_annotation: false,
            plugins: PluginSet::new(),
        }
    }

    pub fn add_root_source(&mut self, source: Box<dyn ClassSource>) -> &mut Self {
        self.root.push(source);
        self
    }

    pub fn add_embed_source(&mut self, source: Box<dyn ClassSource>) -> &mut Self {
        self.embed.push(source);
        self
    }

    pub fn add_refer_source(&mut self, source: Box<dyn ClassSource>) -> &mut Self {
        self.refer.push(source);
        self
    }

    /// Move every class under `from` (a package or class name) to `to`.
    pub fn add_relocation(&mut self, from: &str, to: &str) -> &mut Self {
        self.relocations.push((from.to_string(), to.to_string()));
        self
    }

    pub fn add_suppression(&mut self, suppression: SuppressingDiagnostic) -> &mut Self {
        self.suppressions.add(suppression);
        self
    }

    pub fn reflection_mapping_mut(&mut self) -> &mut ReflectionMapping {
        &mut self.reflection
    }

    pub fn keep_runtime_invisible_annotation(&mut self, keep: bool) -> &mut Self {
        self.keep_runtime_invisible_annotation = keep;
        self
    }

    pub fn add_plugin(&mut self, plugin: Box<dyn ClassRelocatorPlugin>) -> Result<&mut Self> {
        self.plugins.add(plugin)?;
        Ok(self)
    }

    /// Load, mark, prune and relocate. Diagnostics go to `handler` after suppression;
    /// unsuppressed errors fail the run once the phase reporting them is over.
    pub fn run(mut self, handler: &dyn DiagnosticHandler) -> Result<RelocationOutput> {
        let _span = info_span!("relocate").entered();
        let mapping = RelocationMapping::new(std::mem::take(&mut self.relocations))?;
        {
            let mut context = PrePluginContext::new(&mut self.reflection, &mut self.suppressions);
            self.plugins.pre_apply(&mut context)?;
        }

        let classpath = CombinedClassPath::new(
            ClassPathLayer::new(LayerKind::Root, std::mem::take(&mut self.root)),
            ClassPathLayer::new(LayerKind::Embed, std::mem::take(&mut self.embed)),
            ClassPathLayer::new(LayerKind::Refer, std::mem::take(&mut self.refer)),
        );
        let roots = classpath.layer(LayerKind::Root).load_all()?;
        let embeds = classpath.layer(LayerKind::Embed).load_all()?;
        info!(roots, embeds, "classpath loaded");

        let wrapper = InternalDiagnosticHandlerWrapper::new(handler, &self.suppressions);
        let reachability = {
            let env = ComputeReferenceEnvironment::new(&classpath, &self.reflection, &wrapper)
                .keep_runtime_invisible_annotation(self.keep_runtime_invisible_annotation);
            Reachability::compute(&env, &[&RootCollector])?
        };
        check_errors(&wrapper)?;
        let reachable = reachability.into_reachable();

        let mut classes = Vec::new();
        for kind in [LayerKind::Root, LayerKind::Embed] {
            classes.extend(take_kept_classes(classpath.layer(kind), kind, &reachable)?);
        }
        drop(classpath);
        for class in &mut classes {
            prune_members(class, &reachable);
            report_unknown_attributes(class, &wrapper)?;
        }
        info!(kept = classes.len(), "classes pruned");

        let classes = Pipeline::build(&self.plugins, &mapping, &wrapper)?.run(classes)?;
        check_errors(&wrapper)?;

        Ok(RelocationOutput {
            classes,
            reachable,
            error_count: wrapper.error_count(),
            warning_count: wrapper.warning_count(),
        })
    }
}

fn check_errors(wrapper: &InternalDiagnosticHandlerWrapper<'_>) -> Result<()> {
    match wrapper.error_count() {
        0 => Ok(()),
        errors => Err(Error::ErrorsFound { errors }),
    }
}

/// Move the kept classes of `layer` out of its cache. Root classes are always kept.
fn take_kept_classes(layer: &ClassPathLayer, kind: LayerKind, reachable: &ReachableSet) -> Result<Vec<ClassFile>> {
    let names: Vec<ClassReference> = layer.classes().iter().map(|class| class.name.clone()).collect();
    let mut kept = Vec::new();
    for name in names {
        if kind != LayerKind::Root && !reachable.contains_class(&name) {
            continue;
        }
        let Some(class) = layer.take_class(&name) else {
            continue;
        };
        let class = Arc::try_unwrap(class).map_err(|_| Error::SharedClass(name.to_string()))?;
        kept.push(class);
    }
    debug!(layer = ?kind, kept = kept.len(), "took kept classes");
    Ok(kept)
}

/// Drop methods and fields nothing reached. Record components stay with their class.
fn prune_members(class: &mut ClassFile, reachable: &ReachableSet) {
    let owner = class.name.clone();
    class.methods.retain(|method| {
        reachable.contains_method(&MethodReference::new(
            owner.clone(),
            &method.name,
            method.descriptor.clone(),
        ))
    });
    class.fields.retain(|field| {
        reachable.contains_field(&FieldReference::new(
            owner.clone(),
            &field.name,
            field.descriptor.clone(),
        ))
    });
}

fn report_unknown_attributes(class: &ClassFile, handler: &dyn DiagnosticHandler) -> Result<()> {
    for attribute in &class.unknown_attributes {
        handler.handle(&basic::unsupported_attribute(
            &attribute.name,
            attribute_location(&class.name, attribute),
        ))?;
    }
    Ok(())
}

fn attribute_location(owner: &ClassReference, attribute: &UnknownAttribute) -> Location {
    let Some((name, descriptor)) = &attribute.member else {
        return Location::class(owner);
    };
    if descriptor.starts_with('(') {
        if let Ok(descriptor) = MethodDescriptor::parse(descriptor) {
            return Location::method(&MethodReference::new(owner.clone(), name, descriptor));
        }
    } else if let Ok(descriptor) = TypeDescriptor::parse(descriptor) {
        return Location::field(&FieldReference::new(owner.clone(), name, descriptor));
    }
    Location::class(owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classpath::MemorySource;
    use crate::diagnostic::{CollectingDiagnosticHandler, SuppressingLocation};
    use crate::ir::access;
    use crate::reader::fixture::{ClassBuilder, class_with_constructor, u2};

    /// `app/Main` calls `com/lib/Util.help()`; `com/lib/Unused` is never referenced.
    fn sources() -> (MemorySource, MemorySource) {
        let mut main = class_with_constructor("app/Main", "java/lang/Object");
        let help = main.method_ref("com/lib/Util", "help", "()V");
        let [hi, lo] = u2(help);
        let body = main.code(0, 0, &[0xb8, hi, lo, 0xb1], &[], Vec::new());
        main.method(access::PUBLIC | access::STATIC, "run", "()V", vec![("Code", body)]);
        let mut root = MemorySource::new();
        root.insert("app/Main", main.build());

        let mut util = class_with_constructor("com/lib/Util", "java/lang/Object");
        let body = util.code(0, 0, &[0xb1], &[], Vec::new());
        util.method(access::PUBLIC | access::STATIC, "help", "()V", vec![("Code", body)]);
        let body = util.code(0, 0, &[0xb1], &[], Vec::new());
        util.method(access::PUBLIC | access::STATIC, "unused", "()V", vec![("Code", body)]);
        let unused = ClassBuilder::new("com/lib/Unused", Some("java/lang/Object"));
        let mut embed = MemorySource::new();
        embed.insert("com/lib/Util", util.build());
        embed.insert("com/lib/Unused", unused.build());
        (root, embed)
    }

    fn object_source() -> MemorySource {
        let mut object = ClassBuilder::new("java/lang/Object", None);
        let body = object.code(0, 1, &[0xb1], &[], Vec::new());
        object.method(access::PUBLIC, "<init>", "()V", vec![("Code", body)]);
        let mut refer = MemorySource::new();
        refer.insert("java/lang/Object", object.build());
        refer
    }

    #[test]
    fn keeps_reachable_classes_and_relocates_them() {
        let (root, embed) = sources();
        let mut relocator = Relocator::new();
        relocator
            .add_root_source(Box::new(root))
            .add_embed_source(Box::new(embed))
            .add_refer_source(Box::new(object_source()))
            .add_relocation("com.lib", "shaded.lib");
        let handler = CollectingDiagnosticHandler::new();

        let output = relocator.run(&handler).expect("run relocator");

        let names: Vec<_> = output.classes.iter().map(|class| class.name.name()).collect();
        assert_eq!(names, vec!["app/Main", "shaded/lib/Util"]);
        let util = &output.classes[1];
        let methods: Vec<_> = util.methods.iter().map(|method| method.name.as_str()).collect();
        assert_eq!(methods, vec!["help"]);
        assert!(output.reachable.contains_class(&ClassReference::new("com/lib/Util")));
        assert!(!output.reachable.contains_class(&ClassReference::new("com/lib/Unused")));
        assert_eq!(output.error_count, 0);
        assert!(handler.is_empty());
    }

    #[test]
    fn unresolved_reference_fails_the_run() {
        let (root, _) = sources();
        let mut relocator = Relocator::new();
        relocator
            .add_root_source(Box::new(root))
            .add_refer_source(Box::new(object_source()));
        let handler = CollectingDiagnosticHandler::new();

        let result = relocator.run(&handler);

        assert!(matches!(result, Err(Error::ErrorsFound { errors }) if errors >= 1));
        let diagnostics = handler.take();
        assert!(
            diagnostics
                .iter()
                .any(|diagnostic| diagnostic.id() == basic::UNRESOLVABLE_CLASS.id
                    || diagnostic.id() == basic::UNRESOLVABLE_METHOD.id)
        );
    }

    #[test]
    fn suppressed_errors_do_not_fail_the_run() {
        let (root, _) = sources();
        let mut relocator = Relocator::new();
        relocator
            .add_root_source(Box::new(root))
            .add_refer_source(Box::new(object_source()))
            .add_suppression(SuppressingDiagnostic::new(
                Some(SuppressingLocation::in_class("app/Main")),
                basic::UNRESOLVABLE_CLASS.id,
                Vec::new(),
            ))
            .add_suppression(SuppressingDiagnostic::new(
                Some(SuppressingLocation::in_class("app/Main")),
                basic::UNRESOLVABLE_METHOD.id,
                Vec::new(),
            ));
        let handler = CollectingDiagnosticHandler::new();

        let output = relocator.run(&handler).expect("run relocator");

        assert_eq!(output.error_count, 0);
        assert_eq!(output.classes.len(), 1);
    }

    #[test]
    fn bad_relocation_table_is_rejected_before_loading() {
        let mut relocator = Relocator::new();
        relocator
            .add_relocation("com.lib", "a")
            .add_relocation("com/lib/", "b");
        let handler = CollectingDiagnosticHandler::new();

        assert!(matches!(
            relocator.run(&handler),
            Err(Error::DuplicateMapping(name)) if name == "com/lib"
        ));
    }

    #[test]
    fn unknown_member_attribute_is_located_on_the_member() {
        let owner = ClassReference::new("a/A");
        let attribute = UnknownAttribute {
            name: "Custom".to_string(),
            member: Some(("run".to_string(), "()V".to_string())),
        };
        assert!(matches!(
            attribute_location(&owner, &attribute),
            Location::Method { name, .. } if name == "run"
        ));
        let attribute = UnknownAttribute {
            name: "Custom".to_string(),
            member: Some(("count".to_string(), "I".to_string())),
        };
        assert!(matches!(
            attribute_location(&owner, &attribute),
            Location::Field { name, .. } if name == "count"
        ));
    }
}
