//! Outgoing edges of one class or member.

use crate::Result;
use crate::diagnostic::{Location, basic};
use crate::ir::{
    AnnotationValue, ClassAnnotation, ClassField, ClassFile, ClassMethod, ClassRecordField,
    ClassTypeAnnotation, CodeFrame, Constant, ConstantMethodHandle, FrameElement, Insn, InsnNode,
};
use crate::reachability::ComputeReferenceEnvironment;
use crate::reachability::reflect::ReflectiveScan;
use crate::reference::{ClassReference, MethodReference, Reference};
use crate::types::{
    ClassTypeSignature, MethodDescriptor, TypeArgument, TypeDescriptor, TypeParameter,
    TypeSignature,
};

/// Collects the references one node needs, each with the location that needs it.
pub(crate) struct Edges<'e> {
    env: &'e ComputeReferenceEnvironment<'e>,
    found: Vec<(Reference, Location)>,
}

impl<'e> Edges<'e> {
    fn new(env: &'e ComputeReferenceEnvironment<'e>) -> Self {
        Edges {
            env,
            found: Vec::new(),
        }
    }

    pub(crate) fn of_class(
        env: &'e ComputeReferenceEnvironment<'e>,
        class: &ClassFile,
    ) -> Result<Vec<(Reference, Location)>> {
        let mut edges = Edges::new(env);
        let location = Location::class(&class.name);

        if let Some(signature) = &class.signature {
            edges.type_parameters(&signature.type_parameters, &location)?;
            edges.type_signature(&signature.superclass, &location)?;
            for interface in &signature.interfaces {
                edges.type_signature(interface, &location)?;
            }
        }
        if let Some(super_class) = &class.super_class {
            edges.add(super_class.clone(), &location);
        }
        for interface in &class.interfaces {
            edges.add(interface.clone(), &location);
        }
        if let Some(enclosing) = &class.enclosing_method {
            edges.add(enclosing.owner.clone(), &location);
            if let Some((name, descriptor)) = &enclosing.method {
                edges.add(
                    MethodReference::new(enclosing.owner.clone(), name, descriptor.clone()),
                    &location,
                );
            }
        }
        for inner in &class.inner_classes {
            if inner.inner == class.name {
                if let Some(outer) = &inner.outer {
                    edges.add(outer.clone(), &location);
                }
            }
        }
        if let Some(host) = &class.nest_host {
            edges.add(host.clone(), &location);
        }
        edges.annotations(&class.visible_annotations, &class.invisible_annotations, &location);
        edges.type_annotations(
            &class.visible_type_annotations,
            &class.invisible_type_annotations,
            &location,
        );

        let static_initializer = MethodDescriptor::new(TypeDescriptor::VOID, Vec::new());
        if class.find_method("<clinit>", &static_initializer).is_some() {
            edges.add(
                MethodReference::new(class.name.clone(), "<clinit>", static_initializer),
                &location,
            );
        }
        if let Some(components) = &class.record_fields {
            let mut arguments = Vec::with_capacity(components.len());
            for component in components {
                edges.add(class.record_field_reference(component), &location);
                arguments.push(component.descriptor.clone());
            }
            edges.add(
                MethodReference::new(
                    class.name.clone(),
                    "<init>",
                    MethodDescriptor::new(TypeDescriptor::VOID, arguments),
                ),
                &location,
            );
        }
        Ok(edges.found)
    }

    pub(crate) fn of_method(
        env: &'e ComputeReferenceEnvironment<'e>,
        class: &ClassFile,
        method: &ClassMethod,
    ) -> Result<Vec<(Reference, Location)>> {
        let mut edges = Edges::new(env);
        let reference = class.method_reference(method);
        let location = Location::method(&reference);

        edges.add(class.name.clone(), &location);
        edges.method_descriptor(&method.descriptor, &location);
        if let Some(signature) = &method.signature {
            edges.type_parameters(&signature.type_parameters, &location)?;
            for parameter in &signature.parameters {
                edges.type_signature(parameter, &location)?;
            }
            edges.type_signature(&signature.return_type, &location)?;
            for thrown in &signature.throws {
                edges.type_signature(thrown, &location)?;
            }
        }
        for exception in &method.exceptions {
            edges.add(exception.clone(), &location);
        }
        if let Some(default) = &method.annotation_default {
            edges.annotation_value(default, &location);
        }
        edges.annotations(&method.visible_annotations, &method.invisible_annotations, &location);
        for parameter in &method.visible_parameter_annotations {
            edges.annotations(parameter, &[], &location);
        }
        if env.keep_runtime_invisible_annotation {
            for parameter in &method.invisible_parameter_annotations {
                edges.annotations(parameter, &[], &location);
            }
        }
        edges.type_annotations(
            &method.visible_type_annotations,
            &method.invisible_type_annotations,
            &location,
        );
        edges.code(method, &reference, &location)?;
        Ok(edges.found)
    }

    pub(crate) fn of_field(
        env: &'e ComputeReferenceEnvironment<'e>,
        class: &ClassFile,
        field: &ClassField,
    ) -> Result<Vec<(Reference, Location)>> {
        let mut edges = Edges::new(env);
        let location = Location::field(&class.field_reference(field));

        edges.add(class.name.clone(), &location);
        edges.type_descriptor(&field.descriptor, &location);
        if let Some(signature) = &field.signature {
            edges.type_signature(signature, &location)?;
        }
        if let Some(value) = &field.value {
            edges.constant(value, &location);
        }
        edges.annotations(&field.visible_annotations, &field.invisible_annotations, &location);
        edges.type_annotations(
            &field.visible_type_annotations,
            &field.invisible_type_annotations,
            &location,
        );
        Ok(edges.found)
    }

    pub(crate) fn of_record_field(
        env: &'e ComputeReferenceEnvironment<'e>,
        class: &ClassFile,
        field: &ClassRecordField,
    ) -> Result<Vec<(Reference, Location)>> {
        let mut edges = Edges::new(env);
        let location = Location::record_field(&class.record_field_reference(field));

        edges.add(class.name.clone(), &location);
        edges.type_descriptor(&field.descriptor, &location);
        if let Some(signature) = &field.signature {
            edges.type_signature(signature, &location)?;
        }
        edges.annotations(&field.visible_annotations, &field.invisible_annotations, &location);
        edges.type_annotations(
            &field.visible_type_annotations,
            &field.invisible_type_annotations,
            &location,
        );
        let accessor = MethodDescriptor::new(field.descriptor.clone(), Vec::new());
        edges.add(
            MethodReference::new(class.name.clone(), &field.name, accessor),
            &location,
        );
        Ok(edges.found)
    }

    fn add(&mut self, reference: impl Into<Reference>, location: &Location) {
        self.found.push((reference.into(), location.clone()));
    }

    fn type_descriptor(&mut self, descriptor: &TypeDescriptor, location: &Location) {
        if let Some(class) = ClassReference::from_type(descriptor) {
            self.add(class, location);
        }
    }

    fn method_descriptor(&mut self, descriptor: &MethodDescriptor, location: &Location) {
        for argument in descriptor.arguments() {
            self.type_descriptor(argument, location);
        }
        self.type_descriptor(descriptor.return_type(), location);
    }

    fn annotations(
        &mut self,
        visible: &[ClassAnnotation],
        invisible: &[ClassAnnotation],
        location: &Location,
    ) {
        for annotation in visible {
            self.annotation(annotation, location);
        }
        if self.env.keep_runtime_invisible_annotation {
            for annotation in invisible {
                self.annotation(annotation, location);
            }
        }
    }

    fn type_annotations(
        &mut self,
        visible: &[ClassTypeAnnotation],
        invisible: &[ClassTypeAnnotation],
        location: &Location,
    ) {
        for annotation in visible {
            self.annotation(&annotation.annotation, location);
        }
        if self.env.keep_runtime_invisible_annotation {
            for annotation in invisible {
                self.annotation(&annotation.annotation, location);
            }
        }
    }

    fn annotation(&mut self, annotation: &ClassAnnotation, location: &Location) {
        self.add(annotation.annotation_class.clone(), location);
        for pair in &annotation.values {
            self.annotation_value(&pair.value, location);
        }
    }

    fn annotation_value(&mut self, value: &AnnotationValue, location: &Location) {
        match value {
            AnnotationValue::Enum { owner, .. } => self.add(owner.clone(), location),
            AnnotationValue::Class(descriptor) => self.type_descriptor(descriptor, location),
            AnnotationValue::Annotation(annotation) => self.annotation(annotation, location),
            AnnotationValue::Array(values) => {
                for value in values {
                    self.annotation_value(value, location);
                }
            }
            AnnotationValue::Byte(_)
            | AnnotationValue::Char(_)
            | AnnotationValue::Double(_)
            | AnnotationValue::Float(_)
            | AnnotationValue::Int(_)
            | AnnotationValue::Long(_)
            | AnnotationValue::Short(_)
            | AnnotationValue::Boolean(_)
            | AnnotationValue::String(_) => {}
        }
    }

    fn type_parameters(&mut self, parameters: &[TypeParameter], location: &Location) -> Result<()> {
        for parameter in parameters {
            if let Some(bound) = &parameter.class_bound {
                self.type_signature(bound, location)?;
            }
            for bound in &parameter.interface_bounds {
                self.type_signature(bound, location)?;
            }
        }
        Ok(())
    }

    fn type_signature(&mut self, signature: &TypeSignature, location: &Location) -> Result<()> {
        match signature {
            TypeSignature::Primitive(_) | TypeSignature::TypeVariable(_) => Ok(()),
            TypeSignature::Array(element) => self.type_signature(element, location),
            TypeSignature::Class(class) => self.class_type_signature(class, location),
        }
    }

    fn type_argument(&mut self, argument: &TypeArgument, location: &Location) -> Result<()> {
        match argument {
            TypeArgument::Star => Ok(()),
            TypeArgument::Bounded { signature, .. } => self.type_signature(signature, location),
        }
    }

    /// Nested segments name simple names, so `Outer<T>.Inner` is resolved through the
    /// `InnerClasses` entries of each enclosing class rather than by joining with `$`.
    fn class_type_signature(
        &mut self,
        signature: &ClassTypeSignature,
        location: &Location,
    ) -> Result<()> {
        for argument in &signature.arguments {
            self.type_argument(argument, location)?;
        }
        for inner in &signature.inner {
            for argument in &inner.arguments {
                self.type_argument(argument, location)?;
            }
        }

        let mut current = ClassReference::new(&signature.name);
        for inner in &signature.inner {
            let Some(loaded) = self.env.classpath.find_class(&current)? else {
                // reported as an unresolvable class once expanded
                self.add(current, location);
                return Ok(());
            };
            let nested = loaded.class.inner_classes.iter().find(|entry| {
                entry.outer.as_ref() == Some(&current)
                    && entry.simple_name.as_deref() == Some(inner.name.as_str())
            });
            match nested {
                Some(entry) => current = entry.inner.clone(),
                None => {
                    self.env.handler.handle(&basic::unresolvable_inner_class(
                        current.name(),
                        &inner.name,
                        location.clone(),
                    ))?;
                    return Ok(());
                }
            }
        }
        self.add(current, location);
        Ok(())
    }

    fn constant(&mut self, constant: &Constant, location: &Location) {
        match constant {
            Constant::Class(class) => self.add(class.clone(), location),
            Constant::MethodType(descriptor) => self.method_descriptor(descriptor, location),
            Constant::MethodHandle(handle) => self.method_handle(handle, location),
            Constant::Dynamic(dynamic) => {
                self.type_descriptor(&dynamic.descriptor, location);
                self.method_handle(&dynamic.bootstrap, location);
                for argument in &dynamic.arguments {
                    self.constant(argument, location);
                }
            }
            Constant::Int(_)
            | Constant::Long(_)
            | Constant::Float(_)
            | Constant::Double(_)
            | Constant::String(_) => {}
        }
    }

    fn method_handle(&mut self, handle: &ConstantMethodHandle, location: &Location) {
        match handle {
            ConstantMethodHandle::Field { field, .. } => self.add(field.clone(), location),
            ConstantMethodHandle::Method { method, .. } => self.add(method.clone(), location),
        }
    }

    fn code(
        &mut self,
        method: &ClassMethod,
        reference: &MethodReference,
        location: &Location,
    ) -> Result<()> {
        let Some(code) = method.code() else {
            return Ok(());
        };
        let body = code.read();

        for block in &body.try_catch_blocks {
            if let Some(catch_type) = &block.catch_type {
                self.add(catch_type.clone(), location);
            }
            self.type_annotations(
                &block.visible_annotations,
                &block.invisible_annotations,
                location,
            );
        }
        for local in &body.local_variables {
            let local_location = Location::MethodLocal {
                owner: reference.owner.name().to_string(),
                method: reference.name.to_string(),
                descriptor: reference.descriptor.clone(),
                index: local.index.get(),
                name: local.name.clone(),
            };
            self.type_descriptor(&local.descriptor, &local_location);
            if let Some(signature) = &local.signature {
                self.type_signature(signature, &local_location)?;
            }
        }
        for annotation in &body.local_variable_annotations {
            if annotation.visible || self.env.keep_runtime_invisible_annotation {
                self.annotation(&annotation.annotation, location);
            }
        }

        let Some(insns) = body.insns() else {
            return Ok(());
        };
        let insns = insns.read();
        for node in insns.iter() {
            self.insn(node, location);
        }

        let handlers: Vec<_> = body
            .try_catch_blocks
            .iter()
            .map(|block| block.handler.clone())
            .collect();
        let scan = ReflectiveScan {
            mapping: self.env.reflection,
            handler: self.env.handler,
            location,
            is_static: method.is_static(),
            descriptor: &method.descriptor,
            max_locals: body.max_locals,
            handlers: &handlers,
        };
        for reference in scan.run(&insns)? {
            self.add(reference, location);
        }
        Ok(())
    }

    fn insn(&mut self, node: &InsnNode, location: &Location) {
        match &node.insn {
            Insn::Constant(constant) => self.constant(constant, location),
            Insn::Field { field, .. } => self.add(field.clone(), location),
            Insn::Method(call) => self.add(call.method().clone(), location),
            Insn::InvokeDynamic(dynamic) => {
                self.method_descriptor(&dynamic.descriptor, location);
                self.method_handle(&dynamic.bootstrap, location);
                for argument in &dynamic.arguments {
                    self.constant(argument, location);
                }
            }
            Insn::Type(type_insn) => self.add(type_insn.class().clone(), location),
            Insn::MultiANewArray(multi) => self.add(multi.class().clone(), location),
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
        if let Some(frame) = &node.frame {
            self.frame(frame, location);
        }
        self.type_annotations(&node.visible_annotations, &node.invisible_annotations, location);
    }

    fn frame(&mut self, frame: &CodeFrame, location: &Location) {
        for element in frame.elements() {
            if let FrameElement::Object(class) = element {
                self.add(class.clone(), location);
            }
        }
    }
}
