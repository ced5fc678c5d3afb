mod assembler;
pub mod opcode;
mod reader;

pub use assembler::{AsmParseError, AssemblerError, IlArg, IlBuilder, assemble};
pub use opcode::{IlOpCode, Implied, OperandKind, registry};
pub use reader::{DecodeError, DecodeResult, IlInstruction, IlOperand, IlReader};
