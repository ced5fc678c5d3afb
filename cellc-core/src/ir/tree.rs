use std::sync::Arc;

use super::code::IrCode;
use super::derive::TypeDeriveError;
use super::stack_type::StackType;
use crate::metadata::{FieldDef, MethodDef, TypeRef};

/// Synthetic variables are numbered from here so they never collide with
/// declared locals.
pub const SYNTHETIC_INDEX_BASE: u32 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    None,
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Field(Arc<FieldDef>),
    Method(Arc<MethodDef>),
    Type(TypeRef),
    String(String),
    Variable(VarId),
    Block(BlockId),
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Sequential {
        left: Option<Box<TreeNode>>,
        right: Option<Box<TreeNode>>,
    },
    Call {
        callee: Arc<MethodDef>,
        args: Vec<TreeNode>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TreeNode {
    pub code: IrCode,
    pub operand: Operand,
    pub stack_type: StackType,
    pub offset: u32,
    pub kind: NodeKind,
}

impl TreeNode {
    pub fn leaf(code: IrCode, operand: Operand, offset: u32) -> Self {
        Self::sequential(code, operand, offset, None, None)
    }

    pub fn unary(code: IrCode, operand: Operand, offset: u32, child: TreeNode) -> Self {
        Self::sequential(code, operand, offset, Some(child), None)
    }

    pub fn binary(
        code: IrCode,
        operand: Operand,
        offset: u32,
        left: TreeNode,
        right: TreeNode,
    ) -> Self {
        Self::sequential(code, operand, offset, Some(left), Some(right))
    }

    pub fn sequential(
        code: IrCode,
        operand: Operand,
        offset: u32,
        left: Option<TreeNode>,
        right: Option<TreeNode>,
    ) -> Self {
        Self {
            code,
            operand,
            stack_type: StackType::None,
            offset,
            kind: NodeKind::Sequential {
                left: left.map(Box::new),
                right: right.map(Box::new),
            },
        }
    }

    pub fn call(code: IrCode, callee: Arc<MethodDef>, offset: u32, args: Vec<TreeNode>) -> Self {
        Self {
            code,
            operand: Operand::Method(callee.clone()),
            stack_type: StackType::None,
            offset,
            kind: NodeKind::Call { callee, args },
        }
    }

    pub fn left(&self) -> Option<&TreeNode> {
        match &self.kind {
            NodeKind::Sequential { left, .. } => left.as_deref(),
            NodeKind::Call { args, .. } => args.first(),
        }
    }

    pub fn right(&self) -> Option<&TreeNode> {
        match &self.kind {
            NodeKind::Sequential { right, .. } => right.as_deref(),
            NodeKind::Call { args, .. } => args.get(1),
        }
    }

    pub fn children(&self) -> Vec<&TreeNode> {
        match &self.kind {
            NodeKind::Sequential { left, right } => {
                left.iter().chain(right.iter()).map(|c| &**c).collect()
            }
            NodeKind::Call { args, .. } => args.iter().collect(),
        }
    }

    pub fn child_count(&self) -> usize {
        match &self.kind {
            NodeKind::Sequential { left, right } => {
                usize::from(left.is_some()) + usize::from(right.is_some())
            }
            NodeKind::Call { args, .. } => args.len(),
        }
    }

    pub fn callee(&self) -> Option<&Arc<MethodDef>> {
        match &self.kind {
            NodeKind::Call { callee, .. } => Some(callee),
            NodeKind::Sequential { .. } => None,
        }
    }

    pub fn variable(&self) -> Option<VarId> {
        match self.operand {
            Operand::Variable(var) => Some(var),
            _ => None,
        }
    }

    pub fn target(&self) -> Option<BlockId> {
        match self.operand {
            Operand::Block(block) => Some(block),
            _ => None,
        }
    }

    /// Post-order visit of the whole subtree, children first.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a TreeNode)) {
        for child in self.children() {
            child.visit(f);
        }
        f(self);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BasicBlock {
    pub id: BlockId,
    pub offset: u32,
    pub roots: Vec<TreeNode>,
}

impl BasicBlock {
    pub fn new(id: BlockId, offset: u32) -> Self {
        Self {
            id,
            offset,
            roots: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariableKind {
    Argument,
    Local,
    Synthetic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Escapes {
    Unknown,
    Yes,
    No,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Storage {
    Unassigned,
    /// Virtual register number.
    Register(u32),
    /// Byte offset from the stack pointer.
    Frame(u32),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub id: VarId,
    pub kind: VariableKind,
    pub index: u32,
    pub declared: Option<TypeRef>,
    pub stack_type: Option<StackType>,
    pub escapes: Escapes,
    pub storage: Storage,
}

impl Variable {
    pub fn is_synthetic(&self) -> bool {
        self.kind == VariableKind::Synthetic
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VariableArena {
    vars: Vec<Variable>,
    synthetic_count: u32,
}

impl VariableArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_argument(&mut self, index: u32, ty: TypeRef) -> VarId {
        self.push(VariableKind::Argument, index, Some(ty))
    }

    pub fn add_local(&mut self, index: u32, ty: TypeRef) -> VarId {
        self.push(VariableKind::Local, index, Some(ty))
    }

    pub fn add_synthetic(&mut self) -> VarId {
        let index = SYNTHETIC_INDEX_BASE + self.synthetic_count;
        self.synthetic_count += 1;
        self.push(VariableKind::Synthetic, index, None)
    }

    fn push(&mut self, kind: VariableKind, index: u32, declared: Option<TypeRef>) -> VarId {
        let id = VarId(self.vars.len());
        let stack_type = declared.as_ref().map(StackType::from_type);
        self.vars.push(Variable {
            id,
            kind,
            index,
            declared,
            stack_type,
            escapes: Escapes::Unknown,
            storage: Storage::Unassigned,
        });
        id
    }

    pub fn get(&self, id: VarId) -> &Variable {
        &self.vars[id.0]
    }

    pub fn get_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.vars[id.0]
    }

    /// First assignment wins; a different later type is an error.
    pub fn set_stack_type(&mut self, id: VarId, ty: StackType) -> Result<(), TypeDeriveError> {
        let var = &mut self.vars[id.0];
        match &var.stack_type {
            None => {
                var.stack_type = Some(ty);
                Ok(())
            }
            Some(existing) if *existing == ty => Ok(()),
            Some(existing) => Err(TypeDeriveError::VariableRetyped {
                index: var.index,
                existing: existing.clone(),
                new: ty,
            }),
        }
    }

    pub fn mark_escaping(&mut self, id: VarId) {
        self.vars[id.0].escapes = Escapes::Yes;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter()
    }

    pub fn synthetics(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter().filter(|var| var.is_synthetic())
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Tree form of one routine.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodIr {
    pub method: Arc<MethodDef>,
    pub blocks: Vec<BasicBlock>,
    pub variables: VariableArena,
    pub arguments: Vec<VarId>,
    pub locals: Vec<VarId>,
}

impl MethodIr {
    pub fn name(&self) -> String {
        self.method.symbol()
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    pub fn block_at(&self, offset: u32) -> Option<&BasicBlock> {
        self.blocks.iter().find(|block| block.offset == offset)
    }

    pub fn roots(&self) -> impl Iterator<Item = &TreeNode> {
        self.blocks.iter().flat_map(|block| block.roots.iter())
    }
}
