//! Relocation passes, the plugins that register them, and the pipeline that runs them.
//!
//! Every pass is registered against a [`ClassRelocatorStep`]. The pipeline offers
//! each IR node to the passes of all stages in stage order, and within a stage in
//! registration order, until one of them answers [`RelocateResult::Finish`] or
//! [`RelocateResult::Remove`]. Classes are independent and run in parallel.

pub mod exclude;
pub mod simple;
pub mod strings;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info_span};

pub use exclude::{Excludable, ExcludePlugin, ExcludeSet};

use crate::diagnostic::{DiagnosticHandler, SuppressionContainer};
use crate::ir::{
    ClassAnnotation, ClassCode, ClassField, ClassFile, ClassLocalVariableAnnotation, ClassMethod,
    ClassRecordField, ClassTypeAnnotation, NodeId,
};
use crate::reachability::reflect::ReflectionMapping;
use crate::reference::{ClassReference, FieldReference, MethodReference, RecordFieldReference};
use crate::relocation::RelocationMapping;
use crate::{Error, Result};

/// Name reserved for the built-in exclude plugin.
pub const EXCLUDE_PLUGIN: &str = "exclude";

/// What a pass wants done with the node it was offered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelocateResult {
    /// Let the next pass see the node.
    Continue,
    /// Keep the node but stop offering it to later passes.
    Finish,
    /// Drop the node from the output.
    Remove,
}

/// The ordered stages passes are registered against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClassRelocatorStep {
    PreFiltering,
    LanguageProcessing,
    Finalizing,
}

impl ClassRelocatorStep {
    pub const ALL: [ClassRelocatorStep; 3] = [
        ClassRelocatorStep::PreFiltering,
        ClassRelocatorStep::LanguageProcessing,
        ClassRelocatorStep::Finalizing,
    ];

    fn index(self) -> usize {
        match self {
            ClassRelocatorStep::PreFiltering => 0,
            ClassRelocatorStep::LanguageProcessing => 1,
            ClassRelocatorStep::Finalizing => 2,
        }
    }
}

/// Where an annotation offered to a pass is attached.
#[derive(Clone, Copy, Debug)]
pub enum AnnotationLocation<'a> {
    Class(&'a ClassReference),
    Method(&'a MethodReference),
    Field(&'a FieldReference),
    RecordField(&'a RecordFieldReference),
    Parameter {
        method: &'a MethodReference,
        index: usize,
    },
    /// The annotation part of a type annotation.
    TypeAnnotation(&'a TypeAnnotationLocation<'a>),
    /// The annotation part of a local variable annotation in this method's code.
    LocalVariable(&'a MethodReference),
}

/// Where a type annotation offered to a pass is attached.
#[derive(Clone, Copy, Debug)]
pub enum TypeAnnotationLocation<'a> {
    Class(&'a ClassReference),
    Method(&'a MethodReference),
    Field(&'a FieldReference),
    RecordField(&'a RecordFieldReference),
    Insn {
        method: &'a MethodReference,
        insn: NodeId,
    },
    TryCatchBlock {
        method: &'a MethodReference,
        index: usize,
    },
}

/// A relocation pass. Every hook defaults to [`RelocateResult::Continue`].
///
/// Passes only mutate the node they are given, so one pass instance is shared by
/// all worker threads.
pub trait ClassRelocator: Send + Sync {
    fn relocate_class(&self, _class: &mut ClassFile) -> Result<RelocateResult> {
        Ok(RelocateResult::Continue)
    }

    fn relocate_method(&self, _owner: &ClassReference, _method: &mut ClassMethod) -> Result<RelocateResult> {
        Ok(RelocateResult::Continue)
    }

    fn relocate_field(&self, _owner: &ClassReference, _field: &mut ClassField) -> Result<RelocateResult> {
        Ok(RelocateResult::Continue)
    }

    fn relocate_record_field(
        &self,
        _owner: &ClassReference,
        _field: &mut ClassRecordField,
    ) -> Result<RelocateResult> {
        Ok(RelocateResult::Continue)
    }

    fn relocate_annotation(
        &self,
        _annotation: &mut ClassAnnotation,
        _visible: bool,
        _location: &AnnotationLocation<'_>,
    ) -> Result<RelocateResult> {
        Ok(RelocateResult::Continue)
    }

    /// Defaults to offering the inner annotation to [`ClassRelocator::relocate_annotation`].
    fn relocate_type_annotation(
        &self,
        annotation: &mut ClassTypeAnnotation,
        visible: bool,
        location: &TypeAnnotationLocation<'_>,
    ) -> Result<RelocateResult> {
        self.relocate_annotation(
            &mut annotation.annotation,
            visible,
            &AnnotationLocation::TypeAnnotation(location),
        )
    }

    /// Defaults to offering the inner annotation to [`ClassRelocator::relocate_annotation`].
    fn relocate_local_variable_annotation(
        &self,
        annotation: &mut ClassLocalVariableAnnotation,
        method: &MethodReference,
    ) -> Result<RelocateResult> {
        let visible = annotation.visible;
        self.relocate_annotation(
            &mut annotation.annotation,
            visible,
            &AnnotationLocation::LocalVariable(method),
        )
    }
}

/// Configuration a plugin may change before classes are loaded.
pub struct PrePluginContext<'p> {
    reflection: &'p mut ReflectionMapping,
    suppressions: &'p mut SuppressionContainer,
}

impl<'p> PrePluginContext<'p> {
    pub fn new(reflection: &'p mut ReflectionMapping, suppressions: &'p mut SuppressionContainer) -> Self {
        PrePluginContext {
            reflection,
            suppressions,
        }
    }

    pub fn reflection_mapping(&mut self) -> &mut ReflectionMapping {
        self.reflection
    }

    pub fn suppressions(&mut self) -> &mut SuppressionContainer {
        self.suppressions
    }
}

/// What a plugin sees while registering its passes.
///
/// Holds the built-in passes: the exclude filter first in
/// [`ClassRelocatorStep::PreFiltering`], the name relocator first in
/// [`ClassRelocatorStep::LanguageProcessing`] and the string relocator first in
/// [`ClassRelocatorStep::Finalizing`].
pub struct PluginContext<'a> {
    mapping: &'a RelocationMapping,
    handler: &'a dyn DiagnosticHandler,
    exclude: Arc<ExcludeSet>,
    stages: [Vec<Box<dyn ClassRelocator + 'a>>; 3],
}

impl<'a> PluginContext<'a> {
    pub fn new(mapping: &'a RelocationMapping, handler: &'a dyn DiagnosticHandler) -> Self {
        let excluded = Arc::new(ExcludeSet::new());
        let mut context = PluginContext {
            mapping,
            handler,
            exclude: excluded.clone(),
            stages: [Vec::new(), Vec::new(), Vec::new()],
        };
        context.add_class_relocator(
            ClassRelocatorStep::PreFiltering,
            Box::new(exclude::ExcludeClassRelocator::new(excluded)),
        );
        context.add_class_relocator(
            ClassRelocatorStep::LanguageProcessing,
            Box::new(simple::SimpleClassRelocator::new(mapping)),
        );
        context.add_class_relocator(
            ClassRelocatorStep::Finalizing,
            Box::new(strings::StringClassRelocator::new(mapping)),
        );
        context
    }

    pub fn relocation_mapping(&self) -> &'a RelocationMapping {
        self.mapping
    }

    pub fn diagnostic_handler(&self) -> &'a dyn DiagnosticHandler {
        self.handler
    }

    /// The exclude capability, to hand to passes at construction.
    pub fn exclude(&self) -> Arc<dyn ExcludePlugin> {
        self.exclude.clone()
    }

    pub fn add_class_relocator(&mut self, step: ClassRelocatorStep, relocator: Box<dyn ClassRelocator + 'a>) {
        self.stages[step.index()].push(relocator);
    }

    pub fn into_pipeline(self) -> Pipeline<'a> {
        let [pre_filtering, language_processing, finalizing] = self.stages;
        let passes = pre_filtering
            .into_iter()
            .chain(language_processing)
            .chain(finalizing)
            .collect();
        Pipeline {
            passes,
            exclude: self.exclude,
        }
    }
}

/// A named bundle of passes.
pub trait ClassRelocatorPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Plugins that must be applied before this one.
    fn dependencies(&self) -> &[&str] {
        &[]
    }

    fn pre_apply(&self, _context: &mut PrePluginContext<'_>) -> Result<()> {
        Ok(())
    }

    fn apply<'a>(&'a self, context: &mut PluginContext<'a>) -> Result<()>;
}

/// Registered plugins, unique by name.
#[derive(Default)]
pub struct PluginSet {
    plugins: Vec<Box<dyn ClassRelocatorPlugin>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Active,
    Done,
}

impl PluginSet {
    pub fn new() -> Self {
        PluginSet::default()
    }

    pub fn add(&mut self, plugin: Box<dyn ClassRelocatorPlugin>) -> Result<()> {
        let name = plugin.name();
        if name == EXCLUDE_PLUGIN || self.get(name).is_some() {
            return Err(Error::DuplicatePlugin(name.to_string()));
        }
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn ClassRelocatorPlugin> {
        self.plugins
            .iter()
            .find(|plugin| plugin.name() == name)
            .map(|plugin| plugin.as_ref())
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugins with every dependency ahead of its dependents; otherwise in
    /// registration order.
    pub fn ordered(&self) -> Result<Vec<&dyn ClassRelocatorPlugin>> {
        let mut state = HashMap::new();
        let mut order = Vec::with_capacity(self.plugins.len());
        for plugin in &self.plugins {
            self.visit(plugin.as_ref(), &mut state, &mut order)?;
        }
        Ok(order)
    }

    fn visit<'s>(
        &'s self,
        plugin: &'s dyn ClassRelocatorPlugin,
        state: &mut HashMap<&'s str, Visit>,
        order: &mut Vec<&'s dyn ClassRelocatorPlugin>,
    ) -> Result<()> {
        match state.get(plugin.name()) {
            Some(Visit::Done) => return Ok(()),
            Some(Visit::Active) => return Err(Error::PluginCycle(plugin.name().to_string())),
            None => {}
        }
        state.insert(plugin.name(), Visit::Active);
        for dependency in plugin.dependencies() {
            if *dependency == EXCLUDE_PLUGIN {
                continue;
            }
            let required = self
                .get(dependency)
                .ok_or_else(|| Error::UnknownPlugin(dependency.to_string()))?;
            self.visit(required, state, order)?;
        }
        state.insert(plugin.name(), Visit::Done);
        order.push(plugin);
        Ok(())
    }

    pub fn pre_apply(&self, context: &mut PrePluginContext<'_>) -> Result<()> {
        for plugin in self.ordered()? {
            plugin.pre_apply(context)?;
        }
        Ok(())
    }
}

/// Ordered passes ready to run over a class list.
pub struct Pipeline<'a> {
    passes: Vec<Box<dyn ClassRelocator + 'a>>,
    exclude: Arc<ExcludeSet>,
}

/// Nodes of one class a pass asked to remove.
#[derive(Default)]
struct Removals {
    class: bool,
    nodes: HashSet<NodeId>,
}

impl<'a> Pipeline<'a> {
    /// Apply every plugin in dependency order on top of the built-in passes.
    pub fn build(
        plugins: &'a PluginSet,
        mapping: &'a RelocationMapping,
        handler: &'a dyn DiagnosticHandler,
    ) -> Result<Self> {
        let mut context = PluginContext::new(mapping, handler);
        for plugin in plugins.ordered()? {
            debug!(plugin = plugin.name(), "applying plugin");
            plugin.apply(&mut context)?;
        }
        Ok(context.into_pipeline())
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Run every pass over `classes`. Removals, and nodes excluded while the
    /// passes ran, are dropped once all classes were traversed.
    pub fn run(&self, mut classes: Vec<ClassFile>) -> Result<Vec<ClassFile>> {
        let _span = info_span!("pipeline", classes = classes.len(), passes = self.passes.len()).entered();
        let removals = classes
            .par_iter_mut()
            .map(|class| self.relocate_class(class))
            .collect::<Result<Vec<_>>>()?;
        classes
            .par_iter_mut()
            .zip(removals.par_iter())
            .for_each(|(class, removals)| self.sweep(class, &removals.nodes));
        let mut removed = removals.iter().map(|removals| removals.class);
        classes.retain(|_| !removed.next().unwrap_or(false));
        debug!(kept = classes.len(), excluded = self.exclude.len(), "pipeline finished");
        Ok(classes)
    }

    /// Offer one node to the passes; `true` when a pass asked to remove it.
    fn offer(&self, mut relocate: impl FnMut(&dyn ClassRelocator) -> Result<RelocateResult>) -> Result<bool> {
        for pass in &self.passes {
            match relocate(pass.as_ref())? {
                RelocateResult::Continue => {}
                RelocateResult::Finish => return Ok(false),
                RelocateResult::Remove => return Ok(true),
            }
        }
        Ok(false)
    }

    fn relocate_class(&self, class: &mut ClassFile) -> Result<Removals> {
        let mut removals = Removals::default();
        if self.offer(|pass| pass.relocate_class(class))? {
            removals.class = true;
            return Ok(removals);
        }
        let owner = class.name.clone();
        let removed = &mut removals.nodes;

        for field in &mut class.fields {
            if self.offer(|pass| pass.relocate_field(&owner, field))? {
                removed.insert(field.id());
                continue;
            }
            let reference = FieldReference::new(owner.clone(), &field.name, field.descriptor.clone());
            let location = AnnotationLocation::Field(&reference);
            self.annotations(&mut field.visible_annotations, true, &location, removed)?;
            self.annotations(&mut field.invisible_annotations, false, &location, removed)?;
            let location = TypeAnnotationLocation::Field(&reference);
            self.type_annotations(&mut field.visible_type_annotations, true, &location, removed)?;
            self.type_annotations(&mut field.invisible_type_annotations, false, &location, removed)?;
        }

        for method in &mut class.methods {
            if self.offer(|pass| pass.relocate_method(&owner, method))? {
                removed.insert(method.id());
                continue;
            }
            let reference = MethodReference::new(owner.clone(), &method.name, method.descriptor.clone());
            let location = AnnotationLocation::Method(&reference);
            self.annotations(&mut method.visible_annotations, true, &location, removed)?;
            self.annotations(&mut method.invisible_annotations, false, &location, removed)?;
            let location = TypeAnnotationLocation::Method(&reference);
            self.type_annotations(&mut method.visible_type_annotations, true, &location, removed)?;
            self.type_annotations(&mut method.invisible_type_annotations, false, &location, removed)?;
            for (index, list) in method.visible_parameter_annotations.iter_mut().enumerate() {
                let location = AnnotationLocation::Parameter {
                    method: &reference,
                    index,
                };
                self.annotations(list, true, &location, removed)?;
            }
            for (index, list) in method.invisible_parameter_annotations.iter_mut().enumerate() {
                let location = AnnotationLocation::Parameter {
                    method: &reference,
                    index,
                };
                self.annotations(list, false, &location, removed)?;
            }
            if let Some(code) = method.code().cloned() {
                self.code(&code, &reference, removed)?;
            }
        }

        if let Some(record_fields) = &mut class.record_fields {
            for field in record_fields.iter_mut() {
                if self.offer(|pass| pass.relocate_record_field(&owner, field))? {
                    removed.insert(field.id());
                    continue;
                }
                let reference = RecordFieldReference::new(owner.clone(), &field.name, field.descriptor.clone());
                let location = AnnotationLocation::RecordField(&reference);
                self.annotations(&mut field.visible_annotations, true, &location, removed)?;
                self.annotations(&mut field.invisible_annotations, false, &location, removed)?;
                let location = TypeAnnotationLocation::RecordField(&reference);
                self.type_annotations(&mut field.visible_type_annotations, true, &location, removed)?;
                self.type_annotations(&mut field.invisible_type_annotations, false, &location, removed)?;
            }
        }

        let location = AnnotationLocation::Class(&owner);
        self.annotations(&mut class.visible_annotations, true, &location, removed)?;
        self.annotations(&mut class.invisible_annotations, false, &location, removed)?;
        let location = TypeAnnotationLocation::Class(&owner);
        self.type_annotations(&mut class.visible_type_annotations, true, &location, removed)?;
        self.type_annotations(&mut class.invisible_type_annotations, false, &location, removed)?;
        Ok(removals)
    }

    fn code(&self, code: &ClassCode, method: &MethodReference, removed: &mut HashSet<NodeId>) -> Result<()> {
        let mut body = code.write();
        if let Some(insns) = body.insns().cloned() {
            for node in insns.write().iter_mut() {
                let location = TypeAnnotationLocation::Insn {
                    method,
                    insn: node.id(),
                };
                self.type_annotations(&mut node.visible_annotations, true, &location, removed)?;
                self.type_annotations(&mut node.invisible_annotations, false, &location, removed)?;
            }
        }
        for (index, block) in body.try_catch_blocks.iter_mut().enumerate() {
            let location = TypeAnnotationLocation::TryCatchBlock { method, index };
            self.type_annotations(&mut block.visible_annotations, true, &location, removed)?;
            self.type_annotations(&mut block.invisible_annotations, false, &location, removed)?;
        }
        for annotation in body.local_variable_annotations.iter_mut() {
            if self.offer(|pass| pass.relocate_local_variable_annotation(annotation, method))? {
                removed.insert(annotation.annotation.id());
            }
        }
        Ok(())
    }

    fn annotations(
        &self,
        annotations: &mut [ClassAnnotation],
        visible: bool,
        location: &AnnotationLocation<'_>,
        removed: &mut HashSet<NodeId>,
    ) -> Result<()> {
        for annotation in annotations.iter_mut() {
            if self.offer(|pass| pass.relocate_annotation(annotation, visible, location))? {
                removed.insert(annotation.id());
            }
        }
        Ok(())
    }

    fn type_annotations(
        &self,
        annotations: &mut [ClassTypeAnnotation],
        visible: bool,
        location: &TypeAnnotationLocation<'_>,
        removed: &mut HashSet<NodeId>,
    ) -> Result<()> {
        for annotation in annotations.iter_mut() {
            if self.offer(|pass| pass.relocate_type_annotation(annotation, visible, location))? {
                removed.insert(annotation.annotation.id());
            }
        }
        Ok(())
    }

    fn sweep(&self, class: &mut ClassFile, removed: &HashSet<NodeId>) {
        let gone = |id: NodeId| removed.contains(&id) || self.exclude.contains(id);
        class.fields.retain(|field| !gone(field.id()));
        class.methods.retain(|method| !gone(method.id()));
        if let Some(record_fields) = &mut class.record_fields {
            record_fields.retain(|field| !gone(field.id()));
            for field in record_fields.iter_mut() {
                retain_annotations(&mut field.visible_annotations, &gone);
                retain_annotations(&mut field.invisible_annotations, &gone);
                retain_type_annotations(&mut field.visible_type_annotations, &gone);
                retain_type_annotations(&mut field.invisible_type_annotations, &gone);
            }
        }
        for field in &mut class.fields {
            retain_annotations(&mut field.visible_annotations, &gone);
            retain_annotations(&mut field.invisible_annotations, &gone);
            retain_type_annotations(&mut field.visible_type_annotations, &gone);
            retain_type_annotations(&mut field.invisible_type_annotations, &gone);
        }
        for method in &mut class.methods {
            retain_annotations(&mut method.visible_annotations, &gone);
            retain_annotations(&mut method.invisible_annotations, &gone);
            retain_type_annotations(&mut method.visible_type_annotations, &gone);
            retain_type_annotations(&mut method.invisible_type_annotations, &gone);
            for list in method
                .visible_parameter_annotations
                .iter_mut()
                .chain(method.invisible_parameter_annotations.iter_mut())
            {
                retain_annotations(list, &gone);
            }
            if let Some(code) = method.code() {
                let mut body = code.write();
                if let Some(insns) = body.insns().cloned() {
                    for node in insns.write().iter_mut() {
                        retain_type_annotations(&mut node.visible_annotations, &gone);
                        retain_type_annotations(&mut node.invisible_annotations, &gone);
                    }
                }
                for block in body.try_catch_blocks.iter_mut() {
                    retain_type_annotations(&mut block.visible_annotations, &gone);
                    retain_type_annotations(&mut block.invisible_annotations, &gone);
                }
                body.local_variable_annotations
                    .retain(|annotation| !gone(annotation.annotation.id()));
            }
        }
        retain_annotations(&mut class.visible_annotations, &gone);
        retain_annotations(&mut class.invisible_annotations, &gone);
        retain_type_annotations(&mut class.visible_type_annotations, &gone);
        retain_type_annotations(&mut class.invisible_type_annotations, &gone);
    }
}

fn retain_annotations(annotations: &mut Vec<ClassAnnotation>, gone: &impl Fn(NodeId) -> bool) {
    annotations.retain(|annotation| !gone(annotation.id()));
}

fn retain_type_annotations(annotations: &mut Vec<ClassTypeAnnotation>, gone: &impl Fn(NodeId) -> bool) {
    annotations.retain(|annotation| !gone(annotation.annotation.id()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::CollectingDiagnosticHandler;
    use crate::ir::access;
    use crate::types::{MethodDescriptor, TypeDescriptor};
    use parking_lot::Mutex;

    fn sample_class() -> ClassFile {
        let mut class = ClassFile::new(
            ClassReference::new("a/Sample"),
            Some(ClassReference::new("java/lang/Object")),
        );
        let descriptor = MethodDescriptor::parse("()V").expect("parse descriptor");
        class
            .methods
            .push(ClassMethod::new(access::PUBLIC, "first", descriptor.clone()));
        class
            .methods
            .push(ClassMethod::new(access::PUBLIC, "second", descriptor));
        class
            .fields
            .push(ClassField::new(access::PRIVATE, "secret", TypeDescriptor::INT));
        class
            .fields
            .push(ClassField::new(access::PRIVATE, "plain", TypeDescriptor::INT));
        class
            .visible_annotations
            .push(ClassAnnotation::new(ClassReference::new("java/lang/Deprecated")));
        class
            .invisible_annotations
            .push(ClassAnnotation::new(ClassReference::new("a/Internal")));
        class
    }

    /// Records the methods it is offered and answers with a fixed result for one name.
    struct Recorder {
        tag: &'static str,
        target: &'static str,
        result: RelocateResult,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl ClassRelocator for Recorder {
        fn relocate_method(&self, _owner: &ClassReference, method: &mut ClassMethod) -> Result<RelocateResult> {
            self.seen.lock().push(format!("{}:{}", self.tag, method.name));
            if method.name == self.target {
                Ok(self.result)
            } else {
                Ok(RelocateResult::Continue)
            }
        }
    }

    fn recorder(
        tag: &'static str,
        target: &'static str,
        result: RelocateResult,
        seen: &Arc<Mutex<Vec<String>>>,
    ) -> Box<Recorder> {
        Box::new(Recorder {
            tag,
            target,
            result,
            seen: seen.clone(),
        })
    }

    #[test]
    fn finish_hides_node_from_later_passes() {
        let mapping = RelocationMapping::default();
        let handler = CollectingDiagnosticHandler::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut context = PluginContext::new(&mapping, &handler);
        context.add_class_relocator(
            ClassRelocatorStep::LanguageProcessing,
            recorder("early", "first", RelocateResult::Finish, &seen),
        );
        context.add_class_relocator(
            ClassRelocatorStep::Finalizing,
            recorder("late", "", RelocateResult::Continue, &seen),
        );

        let classes = context
            .into_pipeline()
            .run(vec![sample_class()])
            .expect("run pipeline");

        assert_eq!(classes[0].methods.len(), 2);
        let seen = seen.lock().clone();
        assert_eq!(seen, vec!["early:first", "early:second", "late:second"]);
    }

    #[test]
    fn stages_run_in_order_regardless_of_registration() {
        let mapping = RelocationMapping::default();
        let handler = CollectingDiagnosticHandler::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut context = PluginContext::new(&mapping, &handler);
        context.add_class_relocator(
            ClassRelocatorStep::Finalizing,
            recorder("final", "", RelocateResult::Continue, &seen),
        );
        context.add_class_relocator(
            ClassRelocatorStep::PreFiltering,
            recorder("pre", "", RelocateResult::Continue, &seen),
        );

        context
            .into_pipeline()
            .run(vec![sample_class()])
            .expect("run pipeline");

        let seen = seen.lock().clone();
        assert_eq!(
            seen,
            vec!["pre:first", "final:first", "pre:second", "final:second"]
        );
    }

    #[test]
    fn removed_method_is_dropped() {
        let mapping = RelocationMapping::default();
        let handler = CollectingDiagnosticHandler::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut context = PluginContext::new(&mapping, &handler);
        context.add_class_relocator(
            ClassRelocatorStep::PreFiltering,
            recorder("pre", "second", RelocateResult::Remove, &seen),
        );
        context.add_class_relocator(
            ClassRelocatorStep::Finalizing,
            recorder("final", "", RelocateResult::Continue, &seen),
        );

        let classes = context
            .into_pipeline()
            .run(vec![sample_class()])
            .expect("run pipeline");

        let names: Vec<_> = classes[0].methods.iter().map(|method| method.name.as_str()).collect();
        assert_eq!(names, vec!["first"]);
        assert!(!seen.lock().contains(&"final:second".to_string()));
    }

    struct DropInvisible;

    impl ClassRelocator for DropInvisible {
        fn relocate_annotation(
            &self,
            _annotation: &mut ClassAnnotation,
            visible: bool,
            location: &AnnotationLocation<'_>,
        ) -> Result<RelocateResult> {
            match location {
                AnnotationLocation::Class(_) if !visible => Ok(RelocateResult::Remove),
                _ => Ok(RelocateResult::Continue),
            }
        }
    }

    #[test]
    fn removed_annotation_is_dropped() {
        let mapping = RelocationMapping::default();
        let handler = CollectingDiagnosticHandler::new();
        let mut context = PluginContext::new(&mapping, &handler);
        context.add_class_relocator(ClassRelocatorStep::PreFiltering, Box::new(DropInvisible));

        let classes = context
            .into_pipeline()
            .run(vec![sample_class()])
            .expect("run pipeline");

        assert!(classes[0].invisible_annotations.is_empty());
        assert_eq!(classes[0].visible_annotations.len(), 1);
    }

    /// Excludes a field by name through the injected capability and tags the
    /// class when it saw an excluded field.
    struct SecretHider {
        exclude: Arc<dyn ExcludePlugin>,
    }

    impl ClassRelocator for SecretHider {
        fn relocate_field(&self, _owner: &ClassReference, field: &mut ClassField) -> Result<RelocateResult> {
            if field.name == "secret" {
                self.exclude.exclude(&*field);
            }
            Ok(RelocateResult::Continue)
        }
    }

    struct ExcludedFieldAuditor {
        exclude: Arc<dyn ExcludePlugin>,
        excluded: Arc<Mutex<Vec<String>>>,
    }

    impl ClassRelocator for ExcludedFieldAuditor {
        fn relocate_field(&self, _owner: &ClassReference, field: &mut ClassField) -> Result<RelocateResult> {
            if self.exclude.is_excluded(&*field) {
                self.excluded.lock().push(field.name.clone());
            }
            Ok(RelocateResult::Continue)
        }
    }

    struct HidingPlugin;

    impl ClassRelocatorPlugin for HidingPlugin {
        fn name(&self) -> &str {
            "hide"
        }

        fn apply<'a>(&'a self, context: &mut PluginContext<'a>) -> Result<()> {
            let exclude = context.exclude();
            context.add_class_relocator(ClassRelocatorStep::LanguageProcessing, Box::new(SecretHider { exclude }));
            Ok(())
        }
    }

    struct AuditPlugin {
        excluded: Arc<Mutex<Vec<String>>>,
    }

    impl ClassRelocatorPlugin for AuditPlugin {
        fn name(&self) -> &str {
            "audit"
        }

        fn dependencies(&self) -> &[&str] {
            &["hide", EXCLUDE_PLUGIN]
        }

        fn apply<'a>(&'a self, context: &mut PluginContext<'a>) -> Result<()> {
            let auditor = ExcludedFieldAuditor {
                exclude: context.exclude(),
                excluded: self.excluded.clone(),
            };
            context.add_class_relocator(ClassRelocatorStep::Finalizing, Box::new(auditor));
            Ok(())
        }
    }

    #[test]
    fn excluded_nodes_are_visible_to_later_passes_and_omitted() {
        let mapping = RelocationMapping::default();
        let handler = CollectingDiagnosticHandler::new();
        let excluded = Arc::new(Mutex::new(Vec::new()));
        let mut plugins = PluginSet::new();
        plugins
            .add(Box::new(AuditPlugin {
                excluded: excluded.clone(),
            }))
            .expect("add audit");
        plugins.add(Box::new(HidingPlugin)).expect("add hide");

        let pipeline = Pipeline::build(&plugins, &mapping, &handler).expect("build pipeline");
        let classes = pipeline.run(vec![sample_class()]).expect("run pipeline");

        let fields: Vec<_> = classes[0].fields.iter().map(|field| field.name.as_str()).collect();
        assert_eq!(fields, vec!["plain"]);
        assert_eq!(excluded.lock().clone(), vec!["secret".to_string()]);
    }

    #[test]
    fn dependencies_are_applied_first() {
        let mut plugins = PluginSet::new();
        plugins
            .add(Box::new(AuditPlugin {
                excluded: Arc::default(),
            }))
            .expect("add audit");
        plugins.add(Box::new(HidingPlugin)).expect("add hide");

        let names: Vec<_> = plugins
            .ordered()
            .expect("order plugins")
            .iter()
            .map(|plugin| plugin.name().to_string())
            .collect();
        assert_eq!(names, vec!["hide", "audit"]);
    }

    #[test]
    fn plugin_registry_rejects_bad_names() {
        let mut plugins = PluginSet::new();
        plugins.add(Box::new(HidingPlugin)).expect("add hide");
        assert!(matches!(
            plugins.add(Box::new(HidingPlugin)),
            Err(Error::DuplicatePlugin(name)) if name == "hide"
        ));

        struct Named(&'static str);
        impl ClassRelocatorPlugin for Named {
            fn name(&self) -> &str {
                self.0
            }
            fn apply<'a>(&'a self, _context: &mut PluginContext<'a>) -> Result<()> {
                Ok(())
            }
        }
        assert!(matches!(
            plugins.add(Box::new(Named(EXCLUDE_PLUGIN))),
            Err(Error::DuplicatePlugin(_))
        ));

        let mut missing = PluginSet::new();
        missing
            .add(Box::new(AuditPlugin {
                excluded: Arc::default(),
            }))
            .expect("add audit");
        assert!(matches!(
            missing.ordered(),
            Err(Error::UnknownPlugin(name)) if name == "hide"
        ));
    }
}
