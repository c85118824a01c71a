//! Identity-based exclusion of IR nodes from the output.

use std::sync::Arc;

use dashmap::DashSet;

use crate::ir::{
    ClassAnnotation, ClassField, ClassLocalVariableAnnotation, ClassMethod, ClassRecordField,
    ClassTypeAnnotation, NodeId,
};
use crate::plugin::{AnnotationLocation, ClassRelocator, RelocateResult};
use crate::reference::ClassReference;
use crate::Result;

/// IR nodes that can be excluded. Type and local variable annotations share the
/// identity of the annotation they wrap.
pub trait Excludable {
    fn node_id(&self) -> NodeId;
}

impl Excludable for ClassMethod {
    fn node_id(&self) -> NodeId {
        self.id()
    }
}

impl Excludable for ClassField {
    fn node_id(&self) -> NodeId {
        self.id()
    }
}

impl Excludable for ClassRecordField {
    fn node_id(&self) -> NodeId {
        self.id()
    }
}

impl Excludable for ClassAnnotation {
    fn node_id(&self) -> NodeId {
        self.id()
    }
}

impl Excludable for ClassTypeAnnotation {
    fn node_id(&self) -> NodeId {
        self.annotation.id()
    }
}

impl Excludable for ClassLocalVariableAnnotation {
    fn node_id(&self) -> NodeId {
        self.annotation.id()
    }
}

/// Marks nodes for omission from the output. Handed to passes when they are built.
pub trait ExcludePlugin: Send + Sync {
    fn exclude(&self, node: &dyn Excludable);

    fn is_excluded(&self, node: &dyn Excludable) -> bool;
}

/// The per-run set of excluded node ids.
#[derive(Debug, Default)]
pub struct ExcludeSet {
    excluded: DashSet<NodeId>,
}

impl ExcludeSet {
    pub fn new() -> Self {
        ExcludeSet::default()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.excluded.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.excluded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }
}

impl ExcludePlugin for ExcludeSet {
    fn exclude(&self, node: &dyn Excludable) {
        self.excluded.insert(node.node_id());
    }

    fn is_excluded(&self, node: &dyn Excludable) -> bool {
        self.contains(node.node_id())
    }
}

/// Drops nodes that were excluded before the pipeline reached them.
pub(crate) struct ExcludeClassRelocator {
    excluded: Arc<ExcludeSet>,
}

impl ExcludeClassRelocator {
    pub(crate) fn new(excluded: Arc<ExcludeSet>) -> Self {
        ExcludeClassRelocator { excluded }
    }

    fn check(&self, node: &dyn Excludable) -> RelocateResult {
        if self.excluded.is_excluded(node) {
            RelocateResult::Remove
        } else {
            RelocateResult::Continue
        }
    }
}

impl ClassRelocator for ExcludeClassRelocator {
    fn relocate_method(&self, _owner: &ClassReference, method: &mut ClassMethod) -> Result<RelocateResult> {
        Ok(self.check(&*method))
    }

    fn relocate_field(&self, _owner: &ClassReference, field: &mut ClassField) -> Result<RelocateResult> {
        Ok(self.check(&*field))
    }

    fn relocate_record_field(
        &self,
        _owner: &ClassReference,
        field: &mut ClassRecordField,
    ) -> Result<RelocateResult> {
        Ok(self.check(&*field))
    }

    fn relocate_annotation(
        &self,
        annotation: &mut ClassAnnotation,
        _visible: bool,
        _location: &AnnotationLocation<'_>,
    ) -> Result<RelocateResult> {
        Ok(self.check(&*annotation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{TypePath, TypeReference};
    use crate::types::TypeDescriptor;

    #[test]
    fn exclusion_follows_identity_not_value() {
        let set = ExcludeSet::new();
        let first = ClassField::new(0, "value", TypeDescriptor::INT);
        let second = ClassField::new(0, "value", TypeDescriptor::INT);

        set.exclude(&first);

        assert!(set.is_excluded(&first));
        assert!(!set.is_excluded(&second));
    }

    #[test]
    fn cloned_annotation_is_a_new_node() {
        let set = ExcludeSet::new();
        let annotation = ClassAnnotation::new(ClassReference::new("a/Marker"));
        let copy = annotation.clone();

        set.exclude(&annotation);

        assert_eq!(annotation, copy);
        assert!(!set.is_excluded(&copy));
    }

    #[test]
    fn type_annotation_shares_inner_identity() {
        let set = ExcludeSet::new();
        let annotation = ClassTypeAnnotation {
            type_ref: TypeReference(0x1300_0000),
            type_path: TypePath::default(),
            annotation: ClassAnnotation::new(ClassReference::new("a/NonNull")),
        };

        set.exclude(&annotation.annotation);

        assert!(set.is_excluded(&annotation));
    }

    #[test]
    fn filter_removes_excluded_members() {
        let set = Arc::new(ExcludeSet::new());
        let filter = ExcludeClassRelocator::new(set.clone());
        let owner = ClassReference::new("a/Owner");
        let mut kept = ClassField::new(0, "kept", TypeDescriptor::INT);
        let mut dropped = ClassField::new(0, "dropped", TypeDescriptor::INT);
        set.exclude(&dropped);

        assert_eq!(
            filter.relocate_field(&owner, &mut kept).expect("relocate kept"),
            RelocateResult::Continue
        );
        assert_eq!(
            filter.relocate_field(&owner, &mut dropped).expect("relocate dropped"),
            RelocateResult::Remove
        );
    }
}
