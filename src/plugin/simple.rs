//! Rewrites every class name the class file format stores structurally.

use crate::Result;
use crate::ir::{
    ClassAnnotation, ClassCode, ClassField, ClassFile, ClassMethod, ClassRecordField, CodeFrame,
    FrameElement, Insn,
};
use crate::plugin::{AnnotationLocation, ClassRelocator, RelocateResult};
use crate::reference::ClassReference;
use crate::relocation::RelocationMapping;

/// The built-in LanguageProcessing pass: names, descriptors, signatures, constants
/// and instruction operands.
pub struct SimpleClassRelocator<'m> {
    mapping: &'m RelocationMapping,
}

impl<'m> SimpleClassRelocator<'m> {
    pub fn new(mapping: &'m RelocationMapping) -> Self {
        SimpleClassRelocator { mapping }
    }

    fn relocate_code(&self, code: &ClassCode) -> Result<()> {
        let mapping = self.mapping;
        let mut body = code.write();
        if let Some(insns) = body.insns().cloned() {
            for node in insns.write().iter_mut() {
                if let Some(frame) = &mut node.frame {
                    self.relocate_frame(frame);
                }
                self.relocate_insn(&mut node.insn)?;
            }
        }
        for block in &mut body.try_catch_blocks {
            if let Some(catch_type) = &mut block.catch_type {
                update(catch_type, |class| mapping.map_class_ref(class));
            }
        }
        for variable in &mut body.local_variables {
            update(&mut variable.descriptor, |descriptor| mapping.map_type_descriptor(descriptor));
            if let Some(signature) = &mut variable.signature {
                update(signature, |signature| mapping.map_type_signature(signature));
            }
        }
        Ok(())
    }

    fn relocate_frame(&self, frame: &mut CodeFrame) {
        let mapping = self.mapping;
        let elements: Vec<&mut FrameElement> = match frame {
            CodeFrame::Full { locals, stack } => locals.iter_mut().chain(stack.iter_mut()).collect(),
            CodeFrame::Same1(element) => vec![element],
            CodeFrame::Append(locals) => locals.iter_mut().collect(),
            CodeFrame::Same | CodeFrame::Chop(_) => Vec::new(),
        };
        for element in elements {
            update(element, |element| mapping.map_frame_element(element));
        }
    }

    fn relocate_insn(&self, insn: &mut Insn) -> Result<()> {
        let mapping = self.mapping;
        match insn {
            Insn::Constant(constant) => update(constant, |constant| mapping.map_constant(constant)),
            Insn::Field { field, .. } => update(field, |field| mapping.map_field_ref(field)),
            Insn::Method(insn) => {
                if let Some(method) = mapping.map_method_ref(insn.method()) {
                    insn.set_method(method)?;
                }
            }
            Insn::InvokeDynamic(insn) => {
                update(&mut insn.descriptor, |descriptor| mapping.map_method_descriptor(descriptor));
                update(&mut insn.bootstrap, |handle| mapping.map_method_handle(handle));
                for argument in &mut insn.arguments {
                    update(argument, |argument| mapping.map_constant(argument));
                }
            }
            Insn::Type(insn) => {
                if let Some(class) = mapping.map_class_ref(insn.class()) {
                    insn.set_class(class)?;
                }
            }
            Insn::MultiANewArray(insn) => {
                if let Some(class) = mapping.map_class_ref(insn.class()) {
                    insn.set_class(class)?;
                }
            }
            Insn::Simple(_)
            | Insn::Typed(_)
            | Insn::Cast(_)
            | Insn::Var(_)
            | Insn::Ret(_)
            | Insn::Iinc(_)
            | Insn::Jump { .. }
            | Insn::TableSwitch(_)
            | Insn::LookupSwitch(_)
            | Insn::NewArray(_) => {}
        }
        Ok(())
    }
}

/// Replace `slot` when `map` reports a change.
fn update<T>(slot: &mut T, map: impl FnOnce(&T) -> Option<T>) {
    if let Some(mapped) = map(slot) {
        *slot = mapped;
    }
}

/// Map every line of a `SourceDebugExtension` that is a source path.
fn map_debug_paths(mapping: &RelocationMapping, debug: &str) -> Option<String> {
    let mut changed = false;
    let lines: Vec<String> = debug
        .split('\n')
        .map(|line| match mapping.map_file_path(line) {
            Some(mapped) => {
                changed = true;
                mapped
            }
            None => line.to_string(),
        })
        .collect();
    changed.then(|| lines.join("\n"))
}

impl ClassRelocator for SimpleClassRelocator<'_> {
    fn relocate_class(&self, class: &mut ClassFile) -> Result<RelocateResult> {
        let mapping = self.mapping;
        update(&mut class.name, |name| mapping.map_class_ref(name));
        if let Some(signature) = &mut class.signature {
            update(signature, |signature| mapping.map_class_signature(signature));
        }
        if let Some(source) = &mut class.source_file {
            update(source, |source| mapping.map_file_path(source));
        }
        if let Some(debug) = &mut class.source_debug {
            update(debug, |debug| map_debug_paths(mapping, debug));
        }
        if let Some(super_class) = &mut class.super_class {
            update(super_class, |class| mapping.map_class_ref(class));
        }
        for interface in &mut class.interfaces {
            update(interface, |class| mapping.map_class_ref(class));
        }
        if let Some(enclosing) = &mut class.enclosing_method {
            update(&mut enclosing.owner, |class| mapping.map_class_ref(class));
            if let Some((_, descriptor)) = &mut enclosing.method {
                update(descriptor, |descriptor| mapping.map_method_descriptor(descriptor));
            }
        }
        for inner in &mut class.inner_classes {
            update(&mut inner.inner, |class| mapping.map_class_ref(class));
            if let Some(outer) = &mut inner.outer {
                update(outer, |class| mapping.map_class_ref(class));
            }
        }
        if let Some(host) = &mut class.nest_host {
            update(host, |class| mapping.map_class_ref(class));
        }
        for member in class
            .nest_members
            .iter_mut()
            .chain(class.permitted_subclasses.iter_mut())
        {
            update(member, |class| mapping.map_class_ref(class));
        }
        Ok(RelocateResult::Continue)
    }

    fn relocate_method(&self, _owner: &ClassReference, method: &mut ClassMethod) -> Result<RelocateResult> {
        let mapping = self.mapping;
        update(&mut method.descriptor, |descriptor| mapping.map_method_descriptor(descriptor));
        if let Some(signature) = &mut method.signature {
            update(signature, |signature| mapping.map_method_signature(signature));
        }
        for exception in &mut method.exceptions {
            update(exception, |class| mapping.map_class_ref(class));
        }
        if let Some(default) = &mut method.annotation_default {
            mapping.relocate_annotation_value(default);
        }
        if let Some(code) = method.code() {
            self.relocate_code(code)?;
        }
        Ok(RelocateResult::Continue)
    }

    fn relocate_field(&self, _owner: &ClassReference, field: &mut ClassField) -> Result<RelocateResult> {
        let mapping = self.mapping;
        update(&mut field.descriptor, |descriptor| mapping.map_type_descriptor(descriptor));
        if let Some(signature) = &mut field.signature {
            update(signature, |signature| mapping.map_type_signature(signature));
        }
        if let Some(value) = &mut field.value {
            update(value, |value| mapping.map_constant(value));
        }
        Ok(RelocateResult::Continue)
    }

    fn relocate_record_field(
        &self,
        _owner: &ClassReference,
        field: &mut ClassRecordField,
    ) -> Result<RelocateResult> {
        let mapping = self.mapping;
        update(&mut field.descriptor, |descriptor| mapping.map_type_descriptor(descriptor));
        if let Some(signature) = &mut field.signature {
            update(signature, |signature| mapping.map_type_signature(signature));
        }
        Ok(RelocateResult::Continue)
    }

    fn relocate_annotation(
        &self,
        annotation: &mut ClassAnnotation,
        _visible: bool,
        _location: &AnnotationLocation<'_>,
    ) -> Result<RelocateResult> {
        self.mapping.relocate_annotation(annotation);
        Ok(RelocateResult::Continue)
    }
}
