//! Relocates string constants that spell a class name.
//!
//! A string is treated as a class name when it is an internal name
//! (`com/lib/Widget`), a binary name (`com.lib.Widget`) or an object or array
//! descriptor (`[Lcom/lib/Widget;`). Strings mixing `/` and `.`, or with empty
//! segments between separators, are left alone.

use crate::Result;
use crate::ir::{AnnotationValue, ClassAnnotation, ClassMethod, Constant, Insn};
use crate::plugin::{AnnotationLocation, ClassRelocator, RelocateResult};
use crate::reference::ClassReference;
use crate::relocation::RelocationMapping;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NameKind {
    NonClass,
    Slashed,
    Dotted,
}

/// The built-in Finalizing pass over `ldc` strings and annotation strings.
pub struct StringClassRelocator<'m> {
    mapping: &'m RelocationMapping,
}

impl<'m> StringClassRelocator<'m> {
    pub fn new(mapping: &'m RelocationMapping) -> Self {
        StringClassRelocator { mapping }
    }

    /// The relocated form of `text`, or `None` when it names no mapped class.
    pub fn map_string(&self, text: &str) -> Option<String> {
        let (prefix, name, suffix) = split_descriptor(text);
        let mapped = match name_kind(name) {
            NameKind::NonClass => None,
            NameKind::Slashed => self.mapping.map_class(name),
            NameKind::Dotted => self
                .mapping
                .map_class(&name.replace('.', "/"))
                .map(|mapped| mapped.replace('/', ".")),
        }?;
        Some(format!("{prefix}{mapped}{suffix}"))
    }

    fn relocate_constant(&self, constant: &mut Constant) {
        match constant {
            Constant::String(text) => {
                if let Some(mapped) = self.map_string(text) {
                    *text = mapped;
                }
            }
            Constant::Dynamic(dynamic) => {
                for argument in &mut dynamic.arguments {
                    self.relocate_constant(argument);
                }
            }
            Constant::Int(_)
            | Constant::Long(_)
            | Constant::Float(_)
            | Constant::Double(_)
            | Constant::Class(_)
            | Constant::MethodType(_)
            | Constant::MethodHandle(_) => {}
        }
    }

    fn relocate_value(&self, value: &mut AnnotationValue) {
        match value {
            AnnotationValue::String(text) => {
                if let Some(mapped) = self.map_string(text) {
                    *text = mapped;
                }
            }
            AnnotationValue::Annotation(annotation) => self.relocate_annotation_values(annotation),
            AnnotationValue::Array(values) => {
                for value in values {
                    self.relocate_value(value);
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
            | AnnotationValue::Enum { .. }
            | AnnotationValue::Class(_) => {}
        }
    }

    fn relocate_annotation_values(&self, annotation: &mut ClassAnnotation) {
        for pair in &mut annotation.values {
            self.relocate_value(&mut pair.value);
        }
    }
}

/// Split `[[Lname;` into `([[L, name, ;)`; anything else is all name.
fn split_descriptor(text: &str) -> (&str, &str, &str) {
    if let Some(body) = text.strip_suffix(';') {
        let dimensions = body.bytes().take_while(|byte| *byte == b'[').count();
        if body[dimensions..].starts_with('L') {
            let start = dimensions + 1;
            return (&text[..start], &body[start..], ";");
        }
    }
    ("", text, "")
}

fn name_kind(name: &str) -> NameKind {
    let mut kind = None;
    let mut after_separator = false;
    for c in name.chars() {
        let separator = match c {
            '/' => NameKind::Slashed,
            '.' => NameKind::Dotted,
            _ => {
                after_separator = false;
                continue;
            }
        };
        if after_separator || kind.is_some_and(|kind| kind != separator) {
            return NameKind::NonClass;
        }
        kind = Some(separator);
        after_separator = true;
    }
    kind.unwrap_or(NameKind::Slashed)
}

impl ClassRelocator for StringClassRelocator<'_> {
    fn relocate_method(&self, _owner: &ClassReference, method: &mut ClassMethod) -> Result<RelocateResult> {
        if let Some(default) = &mut method.annotation_default {
            self.relocate_value(default);
        }
        if let Some(insns) = method.code().and_then(|code| code.insns()) {
            for node in insns.write().iter_mut() {
                match &mut node.insn {
                    Insn::Constant(constant) => self.relocate_constant(constant),
                    Insn::InvokeDynamic(insn) => {
                        for argument in &mut insn.arguments {
                            self.relocate_constant(argument);
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
                    | Insn::Field { .. }
                    | Insn::Method(_)
                    | Insn::Type(_)
                    | Insn::NewArray(_)
                    | Insn::MultiANewArray(_) => {}
                }
            }
        }
        Ok(RelocateResult::Continue)
    }

    fn relocate_annotation(
        &self,
        annotation: &mut ClassAnnotation,
        _visible: bool,
        _location: &AnnotationLocation<'_>,
    ) -> Result<RelocateResult> {
        self.relocate_annotation_values(annotation);
        Ok(RelocateResult::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AnnotationPair, ClassCode, InsnList, InsnNode, access};
    use crate::types::MethodDescriptor;

    fn mapping() -> RelocationMapping {
        RelocationMapping::new([("com/lib", "shaded/lib")]).expect("build mapping")
    }

    #[test]
    fn maps_slashed_and_dotted_names() {
        let mapping = mapping();
        let relocator = StringClassRelocator::new(&mapping);

        assert_eq!(
            relocator.map_string("com/lib/Widget").as_deref(),
            Some("shaded/lib/Widget")
        );
        assert_eq!(
            relocator.map_string("com.lib.Widget").as_deref(),
            Some("shaded.lib.Widget")
        );
        assert_eq!(relocator.map_string("com.lib").as_deref(), Some("shaded.lib"));
        assert_eq!(relocator.map_string("org/other/Thing"), None);
    }

    #[test]
    fn maps_descriptors() {
        let mapping = mapping();
        let relocator = StringClassRelocator::new(&mapping);

        assert_eq!(
            relocator.map_string("Lcom/lib/Widget;").as_deref(),
            Some("Lshaded/lib/Widget;")
        );
        assert_eq!(
            relocator.map_string("[[Lcom/lib/Widget;").as_deref(),
            Some("[[Lshaded/lib/Widget;")
        );
    }

    #[test]
    fn leaves_non_class_strings_alone() {
        let mapping = mapping();
        let relocator = StringClassRelocator::new(&mapping);

        assert_eq!(relocator.map_string("com/lib.Widget"), None);
        assert_eq!(relocator.map_string("com//lib/Widget"), None);
        assert_eq!(relocator.map_string("com..lib"), None);
        assert_eq!(relocator.map_string("hello world"), None);
        assert_eq!(relocator.map_string(""), None);
    }

    #[test]
    fn relocates_ldc_and_annotation_strings() {
        let mapping = mapping();
        let relocator = StringClassRelocator::new(&mapping);
        let owner = ClassReference::new("app/Main");
        let mut method = ClassMethod::new(
            access::PUBLIC,
            "load",
            MethodDescriptor::parse("()V").expect("parse descriptor"),
        );
        let list = InsnList::from_nodes(vec![InsnNode::new(Insn::Constant(Constant::String(
            "com.lib.Plugin".to_string(),
        )))]);
        let code = ClassCode::new(1, 1);
        code.attach_insns(list).expect("attach insns");
        method.set_code(code).expect("attach code");

        relocator.relocate_method(&owner, &mut method).expect("relocate method");

        let insns = method
            .code()
            .and_then(|code| code.insns())
            .expect("code with insns");
        assert_eq!(
            insns.read()[0].insn,
            Insn::Constant(Constant::String("shaded.lib.Plugin".to_string()))
        );

        let mut annotation = ClassAnnotation::with_values(
            ClassReference::new("app/Uses"),
            vec![AnnotationPair {
                name: "value".to_string(),
                value: AnnotationValue::Array(vec![
                    AnnotationValue::String("com/lib/Widget".to_string()),
                    AnnotationValue::String("plain text".to_string()),
                ]),
            }],
        );
        relocator
            .relocate_annotation(&mut annotation, true, &AnnotationLocation::Class(&owner))
            .expect("relocate annotation");
        assert_eq!(
            annotation.values[0].value,
            AnnotationValue::Array(vec![
                AnnotationValue::String("shaded/lib/Widget".to_string()),
                AnnotationValue::String("plain text".to_string()),
            ])
        );
    }
}
