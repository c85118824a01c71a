use crate::ir::NodeId;
use crate::reference::ClassReference;
use crate::types::TypeDescriptor;

/// An annotation instance with its element values.
///
/// Each instance has its own [`NodeId`]; a clone is a new instance and equality
/// ignores identity.
#[derive(Debug)]
pub struct ClassAnnotation {
    id: NodeId,
    pub annotation_class: ClassReference,
    pub values: Vec<AnnotationPair>,
}

impl ClassAnnotation {
    pub fn new(annotation_class: ClassReference) -> Self {
        Self::with_values(annotation_class, Vec::new())
    }

    pub fn with_values(annotation_class: ClassReference, values: Vec<AnnotationPair>) -> Self {
        ClassAnnotation {
            id: NodeId::fresh(),
            annotation_class,
            values,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl Clone for ClassAnnotation {
    fn clone(&self) -> Self {
        Self::with_values(self.annotation_class.clone(), self.values.clone())
    }
}

impl PartialEq for ClassAnnotation {
    fn eq(&self, other: &Self) -> bool {
        self.annotation_class == other.annotation_class && self.values == other.values
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnnotationPair {
    pub name: String,
    pub value: AnnotationValue,
}

/// An `element_value`.
#[derive(Clone, Debug, PartialEq)]
pub enum AnnotationValue {
    Byte(i8),
    Char(u16),
    Double(f64),
    Float(f32),
    Int(i32),
    Long(i64),
    Short(i16),
    Boolean(bool),
    String(String),
    Enum { owner: ClassReference, name: String },
    /// A class literal; `V` stands for `void.class`.
    Class(TypeDescriptor),
    Annotation(ClassAnnotation),
    Array(Vec<AnnotationValue>),
}

/// `target_type` plus target info, packed like `TypeReference` in bytecode libraries:
/// the target type in the top byte and the target arguments below it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeReference(pub u32);

impl TypeReference {
    pub fn target_type(self) -> u8 {
        (self.0 >> 24) as u8
    }
}

/// Steps into nested, array, wildcard and type-argument positions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TypePath(pub Vec<(u8, u8)>);

/// A type annotation outside method bodies, or on an instruction or catch clause.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassTypeAnnotation {
    pub type_ref: TypeReference,
    pub type_path: TypePath,
    pub annotation: ClassAnnotation,
}
