mod builder;
mod code;
mod derive;
mod stack_type;
mod tree;

pub use builder::{BuildError, BuildResult, IrBuilder, StackError};
pub use code::{ElementAccess, FlowControl, IrCode, PopBehaviour, PushBehaviour};
pub use derive::{DeriveResult, TypeDeriveError, derive};
pub use stack_type::StackType;
pub use tree::{
    BasicBlock, BlockId, Escapes, MethodIr, NodeKind, Operand, SYNTHETIC_INDEX_BASE, Storage,
    TreeNode, VarId, Variable, VariableArena, VariableKind,
};
