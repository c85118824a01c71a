//! Method bodies: instruction lists, labels, frames and debug tables.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::ir::annotation::{ClassAnnotation, ClassTypeAnnotation, TypePath, TypeReference};
use crate::ir::insn::{Insn, VarIndex};
use crate::ir::owner::{Claim, NodeId};
use crate::reference::ClassReference;
use crate::types::{TypeDescriptor, TypeSignature};
use crate::{Error, Result};

struct LabelInner {
    id: NodeId,
    target: Claim,
}

/// A position in an instruction list.
///
/// Labels are shared handles. Each one is bound at most once, to the instruction
/// it marks or to the end of a list.
#[derive(Clone)]
pub struct CodeLabel(Arc<LabelInner>);

impl CodeLabel {
    pub fn new() -> Self {
        CodeLabel(Arc::new(LabelInner {
            id: NodeId::fresh(),
            target: Claim::new("code label"),
        }))
    }

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    /// Node the label is bound to, if any.
    pub fn target(&self) -> Option<NodeId> {
        self.0.target.owner()
    }

    fn bind(&self, target: NodeId) -> Result<()> {
        self.0
            .target
            .claim(target)
            .map_err(|_| Error::LabelAlreadyBound)
    }

    fn unbind(&self, target: NodeId) -> Result<()> {
        self.0.target.release(target)
    }
}

impl Default for CodeLabel {
    fn default() -> Self {
        CodeLabel::new()
    }
}

impl PartialEq for CodeLabel {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for CodeLabel {}

impl Hash for CodeLabel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for CodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CodeLabel({:?} -> {:?})", self.0.id, self.target())
    }
}

/// An instruction together with the labels, line number, frame and type
/// annotations attached to its position.
#[derive(Debug)]
pub struct InsnNode {
    id: NodeId,
    pub insn: Insn,
    labels: Vec<CodeLabel>,
    line_number: i32,
    pub frame: Option<CodeFrame>,
    pub visible_annotations: Vec<ClassTypeAnnotation>,
    pub invisible_annotations: Vec<ClassTypeAnnotation>,
}

impl InsnNode {
    pub fn new(insn: Insn) -> Self {
        InsnNode {
            id: NodeId::fresh(),
            insn,
            labels: Vec::new(),
            line_number: -1,
            frame: None,
            visible_annotations: Vec::new(),
            invisible_annotations: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Labels marking this instruction.
    pub fn labels(&self) -> &[CodeLabel] {
        &self.labels
    }

    /// Bind `label` to this instruction. Adding a label already present is a no-op.
    pub fn add_label(&mut self, label: &CodeLabel) -> Result<()> {
        if self.labels.contains(label) {
            return Ok(());
        }
        label.bind(self.id)?;
        self.labels.push(label.clone());
        Ok(())
    }

    pub fn remove_label(&mut self, label: &CodeLabel) -> Result<()> {
        label.unbind(self.id)?;
        self.labels.retain(|existing| existing != label);
        Ok(())
    }

    pub fn line_number(&self) -> Option<u16> {
        u16::try_from(self.line_number).ok()
    }

    /// `-1` clears the line number.
    pub fn set_line_number(&mut self, line: i32) -> Result<()> {
        if line != -1 && !(0..=65_535).contains(&line) {
            return Err(Error::InvalidInsn(format!("line number {line} out of range")));
        }
        self.line_number = line;
        Ok(())
    }
}

/// The instruction sequence of one method body.
#[derive(Debug)]
pub struct InsnList {
    id: NodeId,
    owner: Claim,
    nodes: RwLock<Vec<InsnNode>>,
    end_labels: Mutex<Vec<CodeLabel>>,
}

impl InsnList {
    pub fn new() -> Arc<Self> {
        InsnList::from_nodes(Vec::new())
    }

    pub fn from_nodes(nodes: Vec<InsnNode>) -> Arc<Self> {
        Arc::new(InsnList {
            id: NodeId::fresh(),
            owner: Claim::new("instruction list"),
            nodes: RwLock::new(nodes),
            end_labels: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The code this list is attached to.
    pub fn owner(&self) -> Option<NodeId> {
        self.owner.owner()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<InsnNode>> {
        self.nodes.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<InsnNode>> {
        self.nodes.write()
    }

    pub fn push(&self, node: InsnNode) {
        self.nodes.write().push(node);
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Bind `label` to the position after the last instruction.
    pub fn bind_end_label(&self, label: &CodeLabel) -> Result<()> {
        let mut end_labels = self.end_labels.lock();
        if end_labels.contains(label) {
            return Ok(());
        }
        label.bind(self.id)?;
        end_labels.push(label.clone());
        Ok(())
    }

    pub fn end_labels(&self) -> Vec<CodeLabel> {
        self.end_labels.lock().clone()
    }
}

/// A `Code` attribute.
#[derive(Debug)]
pub struct ClassCode {
    id: NodeId,
    owner: Claim,
    body: RwLock<CodeBody>,
}

/// Mutable contents of a [`ClassCode`].
#[derive(Debug, Default)]
pub struct CodeBody {
    pub max_stack: u16,
    pub max_locals: u16,
    insns: Option<Arc<InsnList>>,
    pub try_catch_blocks: Vec<TryCatchBlock>,
    pub local_variables: Vec<LocalVariable>,
    pub local_variable_annotations: Vec<ClassLocalVariableAnnotation>,
}

impl CodeBody {
    pub fn insns(&self) -> Option<&Arc<InsnList>> {
        self.insns.as_ref()
    }
}

impl ClassCode {
    pub fn new(max_stack: u16, max_locals: u16) -> Arc<Self> {
        Arc::new(ClassCode {
            id: NodeId::fresh(),
            owner: Claim::new("method code"),
            body: RwLock::new(CodeBody {
                max_stack,
                max_locals,
                ..CodeBody::default()
            }),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The method this code is attached to.
    pub fn owner(&self) -> Option<NodeId> {
        self.owner.owner()
    }

    pub(crate) fn claim(&self) -> &Claim {
        &self.owner
    }

    pub fn read(&self) -> RwLockReadGuard<'_, CodeBody> {
        self.body.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, CodeBody> {
        self.body.write()
    }

    pub fn insns(&self) -> Option<Arc<InsnList>> {
        self.body.read().insns.clone()
    }

    /// Attach `list`, detaching the current one. Fails if `list` belongs to other code.
    pub fn attach_insns(&self, list: Arc<InsnList>) -> Result<()> {
        list.owner.claim(self.id)?;
        let previous = self.body.write().insns.replace(list);
        if let Some(previous) = previous {
            previous.owner.release(self.id)?;
        }
        Ok(())
    }

    pub fn detach_insns(&self) -> Result<Option<Arc<InsnList>>> {
        let previous = self.body.write().insns.take();
        if let Some(previous) = &previous {
            previous.owner.release(self.id)?;
        }
        Ok(previous)
    }
}

/// One exception table entry.
#[derive(Clone, Debug)]
pub struct TryCatchBlock {
    pub start: CodeLabel,
    pub end: CodeLabel,
    pub handler: CodeLabel,
    /// `None` catches everything (`finally`).
    pub catch_type: Option<ClassReference>,
    pub visible_annotations: Vec<ClassTypeAnnotation>,
    pub invisible_annotations: Vec<ClassTypeAnnotation>,
}

/// A merged `LocalVariableTable` / `LocalVariableTypeTable` entry.
#[derive(Clone, Debug)]
pub struct LocalVariable {
    pub name: String,
    pub descriptor: TypeDescriptor,
    pub signature: Option<TypeSignature>,
    pub start: CodeLabel,
    pub end: CodeLabel,
    pub index: VarIndex,
}

#[derive(Clone, Debug)]
pub struct LocalVariableRange {
    pub start: CodeLabel,
    pub end: CodeLabel,
    pub index: VarIndex,
}

/// A type annotation on a local variable or resource variable declaration.
#[derive(Clone, Debug)]
pub struct ClassLocalVariableAnnotation {
    pub type_ref: TypeReference,
    pub type_path: TypePath,
    pub annotation: ClassAnnotation,
    pub visible: bool,
    pub ranges: Vec<LocalVariableRange>,
}

/// A verification type in a stack map frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameElement {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    Object(ClassReference),
    /// Result of the `new` instruction at the label, before its constructor ran.
    Uninitialized(CodeLabel),
}

/// Locals added by an append frame; always 1 to 3 of them.
#[derive(Clone, Debug, PartialEq)]
pub struct AppendedLocals(Vec<FrameElement>);

impl AppendedLocals {
    pub fn new(locals: Vec<FrameElement>) -> Result<Self> {
        if !(1..=3).contains(&locals.len()) {
            return Err(Error::InvalidFrame(format!(
                "append frame needs 1 to 3 locals, got {}",
                locals.len()
            )));
        }
        Ok(AppendedLocals(locals))
    }

    pub fn as_slice(&self) -> &[FrameElement] {
        &self.0
    }

    /// Elements may be rewritten in place; the count is fixed.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, FrameElement> {
        self.0.iter_mut()
    }
}

/// Locals removed by a chop frame; always 1 to 3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChopCount(u8);

impl ChopCount {
    pub fn new(count: u8) -> Result<Self> {
        if !(1..=3).contains(&count) {
            return Err(Error::InvalidFrame(format!(
                "chop frame removes 1 to 3 locals, got {count}"
            )));
        }
        Ok(ChopCount(count))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

/// A stack map frame.
#[derive(Clone, Debug, PartialEq)]
pub enum CodeFrame {
    Full {
        locals: Vec<FrameElement>,
        stack: Vec<FrameElement>,
    },
    Same,
    Same1(FrameElement),
    Append(AppendedLocals),
    Chop(ChopCount),
}

impl CodeFrame {
    pub fn append(locals: Vec<FrameElement>) -> Result<Self> {
        AppendedLocals::new(locals).map(CodeFrame::Append)
    }

    pub fn chop(count: u8) -> Result<Self> {
        ChopCount::new(count).map(CodeFrame::Chop)
    }

    /// Every element named by this frame.
    pub fn elements(&self) -> Vec<&FrameElement> {
        match self {
            CodeFrame::Full { locals, stack } => locals.iter().chain(stack.iter()).collect(),
            CodeFrame::Same | CodeFrame::Chop(_) => Vec::new(),
            CodeFrame::Same1(element) => vec![element],
            CodeFrame::Append(locals) => locals.as_slice().iter().collect(),
        }
    }
}
