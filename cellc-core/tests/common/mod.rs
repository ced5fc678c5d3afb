#![allow(dead_code, unused_imports)]

use std::sync::Arc;

pub use cellc::config::{CompileOptions, ConfigError};
pub use cellc::il::{DecodeError, IlInstruction, IlOperand, IlReader, assemble};
pub use cellc::ir::{
    BuildError, BuildResult, Escapes, IrBuilder, IrCode, MethodIr, NodeKind, Operand,
    PopBehaviour, PushBehaviour, StackError, StackType, Storage, TreeNode, TypeDeriveError,
    VariableKind,
};
pub use cellc::layout::{
    LayoutError, ObjectArena, ObjectId, ObjectKind, PlacedObject, ProgramImage, layout,
};
pub use cellc::metadata::{
    FieldDef, Intrinsic, MetadataTable, MethodBody, MethodDef, ParameterInfo, TypeDef, TypeRef,
};
pub use cellc::pipeline::{CompileError, CompileErrorKind, ProgramBuilder};
pub use cellc::spu::{
    InstructionSelector, MapFn, Register, SelectedBlock, SelectedRoutine, SelectionErrors,
    SpuInstruction, SpuOpCode, Target, VirtualRegister, decode_i16_field, decode_i18_field,
};

/// `max(1, 5)` with one value carried across the join point.
pub const MAX_SOURCE: &str = "
    ldc.i4.1
    ldc.i4.5
    ble.s +3
    ldc.i4.1
    br.s +1
    ldc.i4.5
    ret
";

pub fn params(types: &[TypeRef]) -> Vec<ParameterInfo> {
    types
        .iter()
        .enumerate()
        .map(|(index, ty)| ParameterInfo::new(&format!("p{index}"), ty.clone()))
        .collect()
}

pub fn static_method(name: &str, args: &[TypeRef], ret: TypeRef) -> Arc<MethodDef> {
    Arc::new(MethodDef::new_static(name, params(args), ret))
}

pub fn body(source: &str, locals: Vec<TypeRef>) -> MethodBody {
    let code = assemble(source).expect("assembly should succeed");
    MethodBody::new(code, locals)
}

pub fn decode(
    method: &MethodDef,
    body: &MethodBody,
    table: &MetadataTable,
) -> Result<Vec<IlInstruction>, DecodeError> {
    IlReader::new(method, body, table).read_all()
}

pub fn try_build(
    method: Arc<MethodDef>,
    body: &MethodBody,
    table: &MetadataTable,
) -> BuildResult<MethodIr> {
    IrBuilder::new(method, body, table).build()
}

pub fn build(method: Arc<MethodDef>, body: &MethodBody, table: &MetadataTable) -> MethodIr {
    try_build(method, body, table).expect("tree building should succeed")
}

pub fn build_source(method: Arc<MethodDef>, source: &str, locals: Vec<TypeRef>) -> MethodIr {
    build(method, &body(source, locals), &MetadataTable::new())
}

/// Selects `ir` into a fresh arena holding its routine object and any
/// `declared` routines.
pub fn select(
    ir: &mut MethodIr,
    declared: &[&MethodDef],
) -> (ObjectArena, Result<SelectedRoutine, SelectionErrors>) {
    let mut arena = ObjectArena::new();
    for method in declared {
        arena
            .add_routine(&method.symbol())
            .expect("declaring a routine should succeed");
    }
    let routine = arena
        .add_routine(&ir.name())
        .expect("declaring the routine should succeed");
    let options = CompileOptions::default();
    let result = InstructionSelector::new(&mut arena, &options).select(ir, routine);
    (arena, result)
}

pub fn select_ok(ir: &mut MethodIr) -> (ObjectArena, SelectedRoutine) {
    let (arena, result) = select(ir, &[]);
    (arena, result.expect("selection should succeed"))
}

pub fn mnemonics(instructions: &[SpuInstruction]) -> Vec<&'static str> {
    instructions
        .iter()
        .map(|instruction| instruction.opcode.mnemonic())
        .collect()
}

pub fn body_mnemonics(selected: &SelectedRoutine) -> Vec<&'static str> {
    selected
        .blocks
        .iter()
        .flat_map(|block| mnemonics(&block.instructions))
        .collect()
}

fn spread_register(register: VirtualRegister) -> Option<u8> {
    Some(3 + (register.0 % 120) as u8)
}

/// Stand-in for an allocator: folds virtual registers onto `$3..$122`.
pub fn register_map() -> MapFn<fn(VirtualRegister) -> Option<u8>> {
    MapFn(spread_register as fn(VirtualRegister) -> Option<u8>)
}

pub fn all_nodes(ir: &MethodIr) -> Vec<&TreeNode> {
    let mut out = Vec::new();
    for root in ir.roots() {
        root.visit(&mut |node| out.push(node));
    }
    out
}
