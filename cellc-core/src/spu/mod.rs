mod instr;
mod opcode;
mod select;

pub use instr::{MapFn, Register, RegisterMap, SpuInstruction, Target, VirtualRegister};
pub use opcode::{
    EncodeError, Fields, Format, PatchKind, SpuOpCode, decode_i16_field, decode_i18_field, encode,
};
pub use select::{
    InstructionSelector, SelectedBlock, SelectedRoutine, SelectionError, SelectionErrors,
};
