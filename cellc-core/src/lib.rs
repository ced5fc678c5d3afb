pub mod config;
pub mod il;
pub mod ir;
pub mod layout;
pub mod logging;
pub mod metadata;
pub mod pipeline;
pub mod spu;

pub use config::{CompileOptions, ConfigError};
pub use il::{AsmParseError, DecodeError, IlInstruction, IlOperand, IlReader, assemble};
pub use ir::{BuildError, IrBuilder, IrCode, MethodIr, StackError, StackType, TreeNode};
pub use layout::{LayoutError, ObjectArena, ObjectId, ProgramImage, layout};
pub use metadata::{
    FieldDef, Intrinsic, MetadataTable, MethodBody, MethodDef, ParameterInfo, TokenResolver,
    TypeDef, TypeRef,
};
pub use pipeline::{CompileError, CompileErrorKind, CompiledRoutine, ProgramBuilder};
pub use spu::{
    InstructionSelector, MapFn, Register, RegisterMap, SelectedRoutine, SelectionError,
    SelectionErrors, SpuInstruction, SpuOpCode,
};
