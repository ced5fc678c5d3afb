use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use super::code::{ElementAccess, IrCode, PopBehaviour, PushBehaviour};
use super::derive::{TypeDeriveError, derive};
use super::stack_type::StackType;
use super::tree::{BasicBlock, BlockId, MethodIr, Operand, TreeNode, VarId, VariableArena};
use crate::il::{DecodeError, IlInstruction, IlOperand, IlReader};
use crate::logging::category_ir;
use crate::metadata::{MethodBody, MethodDef, TokenResolver, TypeRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    DepthMismatch {
        offset: u32,
        name: &'static str,
        target: u32,
        expected: usize,
        found: usize,
    },
    BackwardBranchWithoutStack {
        offset: u32,
        name: &'static str,
        target: u32,
    },
    Underflow {
        offset: u32,
        name: &'static str,
    },
    InvalidBranchTarget {
        offset: u32,
        name: &'static str,
        target: u32,
    },
    StackNotEmpty {
        offset: u32,
        name: &'static str,
        depth: usize,
    },
}

impl std::fmt::Display for StackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StackError::DepthMismatch {
                offset,
                name,
                target,
                expected,
                found,
            } => write!(
                f,
                "{name} at IL_{offset:04x} reaches IL_{target:04x} with stack depth {found}, expected {expected}"
            ),
            StackError::BackwardBranchWithoutStack {
                offset,
                name,
                target,
            } => write!(
                f,
                "{name} at IL_{offset:04x} branches back to IL_{target:04x} with values on the stack"
            ),
            StackError::Underflow { offset, name } => {
                write!(f, "{name} at IL_{offset:04x} pops an empty stack")
            }
            StackError::InvalidBranchTarget {
                offset,
                name,
                target,
            } => write!(
                f,
                "{name} at IL_{offset:04x} targets IL_{target:04x}, which is not an instruction start"
            ),
            StackError::StackNotEmpty {
                offset,
                name,
                depth,
            } => write!(
                f,
                "{name} at IL_{offset:04x} leaves {depth} values on the stack"
            ),
        }
    }
}

impl std::error::Error for StackError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    Decode(DecodeError),
    Stack(StackError),
    Type(TypeDeriveError),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::Decode(err) => write!(f, "decode error: {err}"),
            BuildError::Stack(err) => write!(f, "stack error: {err}"),
            BuildError::Type(err) => write!(f, "type error: {err}"),
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::Decode(err) => Some(err),
            BuildError::Stack(err) => Some(err),
            BuildError::Type(err) => Some(err),
        }
    }
}

impl From<DecodeError> for BuildError {
    fn from(err: DecodeError) -> Self {
        BuildError::Decode(err)
    }
}

impl From<StackError> for BuildError {
    fn from(err: StackError) -> Self {
        BuildError::Stack(err)
    }
}

impl From<TypeDeriveError> for BuildError {
    fn from(err: TypeDeriveError) -> Self {
        BuildError::Type(err)
    }
}

pub type BuildResult<T> = Result<T, BuildError>;

/// Values still on the evaluation stack: trees not yet consumed, stacked on
/// top of variables that carry values across a block boundary.
#[derive(Debug, Default)]
struct ParseStack {
    instructions: Vec<TreeNode>,
    variables: Vec<VarId>,
}

impl ParseStack {
    fn with_variables(variables: Vec<VarId>) -> Self {
        Self {
            instructions: Vec::new(),
            variables,
        }
    }

    fn depth(&self) -> usize {
        self.instructions.len() + self.variables.len()
    }
}

enum StackEntry {
    Variable(VarId),
    Tree(TreeNode),
}

pub struct IrBuilder<'a> {
    method: Arc<MethodDef>,
    body: &'a MethodBody,
    resolver: &'a dyn TokenResolver,
}

impl<'a> IrBuilder<'a> {
    pub fn new(
        method: Arc<MethodDef>,
        body: &'a MethodBody,
        resolver: &'a dyn TokenResolver,
    ) -> Self {
        Self {
            method,
            body,
            resolver,
        }
    }

    /// Offsets that start a basic block: 0, every branch target and every
    /// instruction following a branch.
    pub fn scan_boundaries(&self) -> BuildResult<BTreeSet<u32>> {
        let reader = IlReader::new(&self.method, self.body, self.resolver);
        let code_len = reader.code_len();
        let records = reader.read_all()?;
        let starts: HashSet<u32> = records.iter().map(|record| record.offset).collect();

        let mut boundaries = BTreeSet::from([0]);
        for record in records.iter().filter(|record| record.code.is_branch()) {
            let Some(target) = record.operand.as_target() else {
                continue;
            };
            if !starts.contains(&target) {
                return Err(StackError::InvalidBranchTarget {
                    offset: record.offset,
                    name: record.name,
                    target,
                }
                .into());
            }
            boundaries.insert(target);
            if record.end() < code_len {
                boundaries.insert(record.end());
            }
        }
        Ok(boundaries)
    }

    pub fn build(&self) -> BuildResult<MethodIr> {
        let boundaries = self.scan_boundaries()?;
        let mut reader = IlReader::new(&self.method, self.body, self.resolver);
        let mut state = BuildState::new(self.method.clone(), self.body, &boundaries, reader.code_len());
        while let Some(record) = reader.read()? {
            state.step(record)?;
        }
        let ir = state.finish();
        debug!(
            "{} {} blocks={} synthetic={}",
            category_ir(),
            ir.name(),
            ir.blocks.len(),
            ir.variables.synthetics().count()
        );
        Ok(ir)
    }
}

struct BuildState {
    method: Arc<MethodDef>,
    code_len: u32,
    block_ids: BTreeMap<u32, BlockId>,
    blocks: Vec<BasicBlock>,
    current: BlockId,
    stack: ParseStack,
    stacks: HashMap<u32, Vec<VarId>>,
    visited: HashSet<u32>,
    variables: VariableArena,
    arguments: Vec<VarId>,
    locals: Vec<VarId>,
    temporaries: HashMap<u16, VarId>,
}

impl BuildState {
    fn new(
        method: Arc<MethodDef>,
        body: &MethodBody,
        boundaries: &BTreeSet<u32>,
        code_len: u32,
    ) -> Self {
        let mut variables = VariableArena::new();
        let arguments = method
            .argument_types()
            .into_iter()
            .enumerate()
            .map(|(slot, ty)| variables.add_argument(slot as u32, ty))
            .collect();
        let locals = body
            .locals
            .iter()
            .enumerate()
            .map(|(index, ty)| variables.add_local(index as u32, ty.clone()))
            .collect();

        let mut block_ids = BTreeMap::new();
        let mut blocks = Vec::with_capacity(boundaries.len());
        for (index, offset) in boundaries.iter().enumerate() {
            block_ids.insert(*offset, BlockId(index));
            blocks.push(BasicBlock::new(BlockId(index), *offset));
        }

        Self {
            method,
            code_len,
            block_ids,
            blocks,
            current: BlockId(0),
            stack: ParseStack::default(),
            stacks: HashMap::new(),
            visited: HashSet::from([0]),
            variables,
            arguments,
            locals,
            temporaries: HashMap::new(),
        }
    }

    fn finish(self) -> MethodIr {
        MethodIr {
            method: self.method,
            blocks: self.blocks,
            variables: self.variables,
            arguments: self.arguments,
            locals: self.locals,
        }
    }

    fn current_offset(&self) -> u32 {
        self.blocks[self.current.0].offset
    }

    fn step(&mut self, record: IlInstruction) -> BuildResult<()> {
        if record.offset != self.current_offset()
            && let Some(&id) = self.block_ids.get(&record.offset)
        {
            self.enter(id);
        }

        let node = self.build_node(&record)?;
        let code = record.code;
        if code.is_branch() {
            return self.finish_branch(&record, node);
        }

        let produces_value = match code.pushes() {
            PushBehaviour::None => false,
            PushBehaviour::One | PushBehaviour::Two => true,
            PushBehaviour::Call => node.stack_type.is_value(),
        };
        if produces_value {
            self.stack.instructions.push(node);
        } else {
            if code == IrCode::Ret && self.stack.depth() > 0 {
                return Err(StackError::StackNotEmpty {
                    offset: record.offset,
                    name: record.name,
                    depth: self.stack.depth(),
                }
                .into());
            }
            self.flush_pending()?;
            self.root(node);
        }

        if code.ends_block_unconditionally() {
            self.stack = ParseStack::default();
            return Ok(());
        }
        let next = record.end();
        if record.size > 0 && next < self.code_len && self.block_ids.contains_key(&next) {
            let stores = self.spill(&record, next, None)?;
            for store in stores {
                self.root(store);
            }
        }
        Ok(())
    }

    fn enter(&mut self, id: BlockId) {
        let offset = self.blocks[id.0].offset;
        self.current = id;
        self.visited.insert(offset);
        let variables = self.stacks.get(&offset).cloned().unwrap_or_default();
        trace!(
            "{} enter IL_{offset:04x} with {} spilled values",
            category_ir(),
            variables.len()
        );
        self.stack = ParseStack::with_variables(variables);
    }

    fn root(&mut self, node: TreeNode) {
        self.blocks[self.current.0].roots.push(node);
    }

    fn finish_branch(&mut self, record: &IlInstruction, node: TreeNode) -> BuildResult<()> {
        let target = record
            .operand
            .as_target()
            .ok_or(StackError::InvalidBranchTarget {
                offset: record.offset,
                name: record.name,
                target: record.end(),
            })?;
        let mut stores = self.spill(record, target, None)?;
        let fall_through = record.end();
        if !record.code.ends_block_unconditionally() && fall_through < self.code_len {
            let target_vars = self.stacks.get(&target).cloned().unwrap_or_default();
            self.stack = ParseStack::with_variables(target_vars.clone());
            stores.extend(self.spill(record, fall_through, Some(target_vars))?);
        }
        for store in stores {
            self.root(store);
        }
        self.root(node);
        self.stack = ParseStack::default();
        Ok(())
    }

    /// Moves the whole stack into the variables recorded for `target`,
    /// allocating them on first arrival. Consumes the stack.
    fn spill(
        &mut self,
        record: &IlInstruction,
        target: u32,
        reuse: Option<Vec<VarId>>,
    ) -> BuildResult<Vec<TreeNode>> {
        let stack = std::mem::take(&mut self.stack);
        let depth = stack.depth();
        let vars = match self.stacks.get(&target) {
            Some(vars) if vars.len() == depth => vars.clone(),
            Some(vars) => {
                return Err(StackError::DepthMismatch {
                    offset: record.offset,
                    name: record.name,
                    target,
                    expected: vars.len(),
                    found: depth,
                }
                .into());
            }
            None if depth > 0 && self.visited.contains(&target) => {
                return Err(StackError::BackwardBranchWithoutStack {
                    offset: record.offset,
                    name: record.name,
                    target,
                }
                .into());
            }
            None => {
                let vars = match reuse {
                    Some(vars) if vars.len() == depth => vars,
                    _ => (0..depth).map(|_| self.variables.add_synthetic()).collect(),
                };
                self.stacks.insert(target, vars.clone());
                vars
            }
        };

        let entries = stack
            .variables
            .into_iter()
            .map(StackEntry::Variable)
            .chain(stack.instructions.into_iter().map(StackEntry::Tree));
        let mut stores = Vec::with_capacity(depth);
        for (entry, &var) in entries.zip(&vars) {
            let value = match entry {
                StackEntry::Variable(source) if source == var => continue,
                StackEntry::Variable(source) => self.load(source, record.offset)?,
                StackEntry::Tree(tree) => tree,
            };
            stores.push(self.store(var, value, record.offset)?);
        }
        Ok(stores)
    }

    /// Evaluates pending trees into temporaries before a statement-level
    /// node so side effects keep their order.
    fn flush_pending(&mut self) -> BuildResult<()> {
        let pending = std::mem::take(&mut self.stack.instructions);
        for tree in pending {
            let temp = self.variables.add_synthetic();
            let offset = tree.offset;
            let store = self.store(temp, tree, offset)?;
            self.root(store);
            self.stack.variables.push(temp);
        }
        Ok(())
    }

    fn load(&mut self, var: VarId, offset: u32) -> BuildResult<TreeNode> {
        let mut node = TreeNode::leaf(IrCode::Ldloc, Operand::Variable(var), offset);
        derive(&mut node, &mut self.variables)?;
        Ok(node)
    }

    fn store(&mut self, var: VarId, value: TreeNode, offset: u32) -> BuildResult<TreeNode> {
        let mut node = TreeNode::unary(IrCode::Stloc, Operand::Variable(var), offset, value);
        derive(&mut node, &mut self.variables)?;
        Ok(node)
    }

    fn pop(&mut self, record: &IlInstruction) -> BuildResult<TreeNode> {
        if let Some(tree) = self.stack.instructions.pop() {
            return Ok(tree);
        }
        match self.stack.variables.pop() {
            Some(var) => self.load(var, record.offset),
            None => Err(StackError::Underflow {
                offset: record.offset,
                name: record.name,
            }
            .into()),
        }
    }

    fn pop_many(&mut self, record: &IlInstruction, count: usize) -> BuildResult<Vec<TreeNode>> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.pop(record)?);
        }
        out.reverse();
        Ok(out)
    }

    fn build_node(&mut self, record: &IlInstruction) -> BuildResult<TreeNode> {
        if let Some(access) = record.code.element_access() {
            return self.build_element_access(record, access);
        }
        let operand = self.operand(record)?;
        let mut node = match record.code.pops() {
            PopBehaviour::Call => {
                let Operand::Method(callee) = &operand else {
                    return Err(TypeDeriveError::NotSupported {
                        offset: record.offset,
                        code: record.code,
                        detail: "call without a method operand".to_string(),
                    }
                    .into());
                };
                let callee = callee.clone();
                let mut count = callee.argument_count();
                if record.code == IrCode::Newobj && callee.has_this {
                    count -= 1;
                }
                let args = self.pop_many(record, count)?;
                TreeNode::call(record.code, callee, record.offset, args)
            }
            PopBehaviour::Return => {
                let value = if self.method.return_type == TypeRef::Void {
                    None
                } else {
                    Some(self.pop(record)?)
                };
                TreeNode::sequential(record.code, operand, record.offset, value, None)
            }
            PopBehaviour::Fixed(count) => {
                let mut children = self.pop_many(record, usize::from(count))?.into_iter();
                let left = children.next();
                let right = children.next();
                TreeNode::sequential(record.code, operand, record.offset, left, right)
            }
        };
        if matches!(record.code, IrCode::Ldloca | IrCode::Ldarga)
            && let Some(var) = node.variable()
        {
            self.variables.mark_escaping(var);
        }
        derive(&mut node, &mut self.variables)?;
        Ok(node)
    }

    /// `ldelem*`/`stelem*` become an element address feeding an indirect
    /// load or store.
    fn build_element_access(
        &mut self,
        record: &IlInstruction,
        access: ElementAccess,
    ) -> BuildResult<TreeNode> {
        let value = if access.is_store {
            Some(self.pop(record)?)
        } else {
            None
        };
        let index = self.pop(record)?;
        let array = self.pop(record)?;
        let element = match &record.operand {
            IlOperand::Type(ty) => ty.clone(),
            _ => element_type(access.indirect, &array.stack_type),
        };

        let mut address = TreeNode::binary(
            IrCode::Ldelema,
            Operand::Type(element.clone()),
            record.offset,
            array,
            index,
        );
        derive(&mut address, &mut self.variables)?;

        let operand = match access.indirect {
            IrCode::Ldobj | IrCode::Stobj => Operand::Type(element),
            _ => Operand::None,
        };
        let mut node = match value {
            Some(value) => {
                TreeNode::binary(access.indirect, operand, record.offset, address, value)
            }
            None => TreeNode::unary(access.indirect, operand, record.offset, address),
        };
        derive(&mut node, &mut self.variables)?;
        Ok(node)
    }

    fn operand(&mut self, record: &IlInstruction) -> BuildResult<Operand> {
        let operand = match &record.operand {
            IlOperand::None => Operand::None,
            IlOperand::Int32(value) => Operand::Int32(*value),
            IlOperand::Int64(value) => Operand::Int64(*value),
            IlOperand::Float32(value) => Operand::Float32(*value),
            IlOperand::Float64(value) => Operand::Float64(*value),
            IlOperand::Field(field) => Operand::Field(field.clone()),
            IlOperand::Method(method) => Operand::Method(method.clone()),
            IlOperand::Type(ty) => Operand::Type(ty.clone()),
            IlOperand::String(value) => Operand::String(value.clone()),
            IlOperand::Local(index) => Operand::Variable(self.locals[usize::from(*index)]),
            IlOperand::Argument(slot) => Operand::Variable(self.arguments[usize::from(*slot)]),
            IlOperand::Temporary(temp) => {
                let var = *self
                    .temporaries
                    .entry(*temp)
                    .or_insert_with(|| self.variables.add_synthetic());
                Operand::Variable(var)
            }
            IlOperand::Target(target) => {
                let block = self.block_ids.get(target).copied().ok_or(
                    StackError::InvalidBranchTarget {
                        offset: record.offset,
                        name: record.name,
                        target: *target,
                    },
                )?;
                Operand::Block(block)
            }
        };
        Ok(operand)
    }
}

fn element_type(indirect: IrCode, array: &StackType) -> TypeRef {
    match indirect {
        IrCode::LdindI1 | IrCode::StindI1 => TypeRef::I1,
        IrCode::LdindU1 => TypeRef::U1,
        IrCode::LdindI2 | IrCode::StindI2 => TypeRef::I2,
        IrCode::LdindU2 => TypeRef::U2,
        IrCode::LdindI4 | IrCode::StindI4 => TypeRef::I4,
        IrCode::LdindU4 => TypeRef::U4,
        IrCode::LdindI8 | IrCode::StindI8 => TypeRef::I8,
        IrCode::LdindI | IrCode::StindI => TypeRef::I,
        IrCode::LdindR4 | IrCode::StindR4 => TypeRef::R4,
        IrCode::LdindR8 | IrCode::StindR8 => TypeRef::R8,
        _ => match array {
            StackType::ObjectRef(TypeRef::Array(element)) => (**element).clone(),
            _ => TypeRef::Object,
        },
    }
}
