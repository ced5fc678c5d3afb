use std::collections::VecDeque;
use std::sync::Arc;

use tracing::trace;

use super::opcode::{EXTENDED_PREFIX, IlOpCode, Implied, OperandKind, registry};
use crate::ir::IrCode;
use crate::logging::category_decode;
use crate::metadata::{FieldDef, MethodBody, MethodDef, TokenResolver, TypeRef};

#[derive(Clone, Debug, PartialEq)]
pub enum IlOperand {
    None,
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Field(Arc<FieldDef>),
    Method(Arc<MethodDef>),
    Type(TypeRef),
    String(String),
    Local(u16),
    /// Argument slot; slot 0 is the receiver when the routine has one.
    Argument(u16),
    /// Decoder-introduced temporary used by `dup` expansion.
    Temporary(u16),
    /// Absolute byte offset of a branch target.
    Target(u32),
}

impl IlOperand {
    pub fn as_target(&self) -> Option<u32> {
        match self {
            IlOperand::Target(target) => Some(*target),
            _ => None,
        }
    }
}

/// One decoded instruction. Macro forms are already folded into `code`.
#[derive(Clone, Debug, PartialEq)]
pub struct IlInstruction {
    pub code: IrCode,
    pub operand: IlOperand,
    pub offset: u32,
    pub size: u32,
    pub name: &'static str,
}

impl IlInstruction {
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    UnexpectedEnd {
        offset: u32,
    },
    UnknownOpcode {
        offset: u32,
        value: u16,
    },
    PrefixOpcode {
        offset: u32,
        name: &'static str,
    },
    UnsupportedOperand {
        offset: u32,
        name: &'static str,
    },
    UnresolvedToken {
        offset: u32,
        name: &'static str,
        token: u32,
    },
    LocalOutOfRange {
        offset: u32,
        name: &'static str,
        index: u16,
        count: usize,
    },
    ArgumentOutOfRange {
        offset: u32,
        name: &'static str,
        index: u16,
        count: usize,
    },
    BranchOutOfRange {
        offset: u32,
        name: &'static str,
        target: i64,
    },
    /// More `dup` instructions than temporary indices.
    TooManyTemporaries {
        offset: u32,
    },
}

impl DecodeError {
    pub fn offset(&self) -> u32 {
        match self {
            DecodeError::UnexpectedEnd { offset }
            | DecodeError::UnknownOpcode { offset, .. }
            | DecodeError::PrefixOpcode { offset, .. }
            | DecodeError::UnsupportedOperand { offset, .. }
            | DecodeError::UnresolvedToken { offset, .. }
            | DecodeError::LocalOutOfRange { offset, .. }
            | DecodeError::ArgumentOutOfRange { offset, .. }
            | DecodeError::BranchOutOfRange { offset, .. }
            | DecodeError::TooManyTemporaries { offset } => *offset,
        }
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::UnexpectedEnd { offset } => {
                write!(f, "unexpected end of code at IL_{offset:04x}")
            }
            DecodeError::UnknownOpcode { offset, value } => {
                write!(f, "unknown opcode {value:#06x} at IL_{offset:04x}")
            }
            DecodeError::PrefixOpcode { offset, name } => {
                write!(f, "prefix opcode {name} is not supported at IL_{offset:04x}")
            }
            DecodeError::UnsupportedOperand { offset, name } => {
                write!(f, "operand of {name} is not supported at IL_{offset:04x}")
            }
            DecodeError::UnresolvedToken {
                offset,
                name,
                token,
            } => write!(f, "{name} token {token:#010x} did not resolve at IL_{offset:04x}"),
            DecodeError::LocalOutOfRange {
                offset,
                name,
                index,
                count,
            } => write!(
                f,
                "{name} local {index} out of range ({count} declared) at IL_{offset:04x}"
            ),
            DecodeError::ArgumentOutOfRange {
                offset,
                name,
                index,
                count,
            } => write!(
                f,
                "{name} argument {index} out of range ({count} declared) at IL_{offset:04x}"
            ),
            DecodeError::BranchOutOfRange {
                offset,
                name,
                target,
            } => write!(f, "{name} target {target} out of range at IL_{offset:04x}"),
            DecodeError::TooManyTemporaries { offset } => {
                write!(f, "dup at IL_{offset:04x} exhausts the temporary indices")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Decodes one routine body. Each call to [`IlReader::read`] hands back an
/// owned record, so look-ahead and synthesized records never disturb the
/// cursor.
pub struct IlReader<'a> {
    code: &'a [u8],
    position: usize,
    resolver: &'a dyn TokenResolver,
    argument_count: usize,
    local_count: usize,
    pending: VecDeque<IlInstruction>,
    temporaries: u16,
}

impl<'a> IlReader<'a> {
    pub fn new(method: &MethodDef, body: &'a MethodBody, resolver: &'a dyn TokenResolver) -> Self {
        Self {
            code: body.instructions(),
            position: 0,
            resolver,
            argument_count: method.argument_count(),
            local_count: body.locals.len(),
            pending: VecDeque::new(),
            temporaries: 0,
        }
    }

    pub fn code_len(&self) -> u32 {
        self.code.len() as u32
    }

    /// Number of `dup` temporaries introduced so far.
    pub fn temporary_count(&self) -> u16 {
        self.temporaries
    }

    pub fn read(&mut self) -> DecodeResult<Option<IlInstruction>> {
        if let Some(record) = self.pending.pop_front() {
            return Ok(Some(record));
        }
        if self.position >= self.code.len() {
            return Ok(None);
        }
        let record = self.decode_next()?;
        trace!(
            "{} IL_{:04x} {} {:?}",
            category_decode(),
            record.offset,
            record.name,
            record.operand
        );
        if record.code == IrCode::Dup {
            return self.expand_dup(record).map(Some);
        }
        Ok(Some(record))
    }

    pub fn read_all(mut self) -> DecodeResult<Vec<IlInstruction>> {
        let mut out = Vec::new();
        while let Some(record) = self.read()? {
            out.push(record);
        }
        Ok(out)
    }

    fn expand_dup(&mut self, record: IlInstruction) -> DecodeResult<IlInstruction> {
        let temporary = self.temporaries;
        self.temporaries = temporary
            .checked_add(1)
            .ok_or(DecodeError::TooManyTemporaries {
                offset: record.offset,
            })?;
        let synthetic = |code, size| IlInstruction {
            code,
            operand: IlOperand::Temporary(temporary),
            offset: record.offset,
            size,
            name: record.name,
        };
        self.pending.push_back(synthetic(IrCode::Ldloc, 0));
        self.pending.push_back(synthetic(IrCode::Ldloc, record.size));
        Ok(synthetic(IrCode::Stloc, 0))
    }

    fn decode_next(&mut self) -> DecodeResult<IlInstruction> {
        let start = self.position as u32;
        let opcode = self.read_opcode(start)?;
        let Some(code) = opcode.code else {
            return Err(DecodeError::PrefixOpcode {
                offset: start,
                name: opcode.name,
            });
        };
        let operand = self.read_operand(opcode, code, start)?;
        let size = self.position as u32 - start;
        let operand = match operand {
            RawOperand::Displacement(displacement) => {
                IlOperand::Target(self.branch_target(opcode, start, size, displacement)?)
            }
            RawOperand::Ready(operand) => operand,
        };
        Ok(IlInstruction {
            code,
            operand,
            offset: start,
            size,
            name: opcode.name,
        })
    }

    fn read_opcode(&mut self, start: u32) -> DecodeResult<&'static IlOpCode> {
        let lead = self.read_u8(start)?;
        if lead == EXTENDED_PREFIX {
            let low = self.read_u8(start)?;
            return registry()
                .extended(low)
                .ok_or(DecodeError::UnknownOpcode {
                    offset: start,
                    value: u16::from_be_bytes([lead, low]),
                });
        }
        registry().single(lead).ok_or(DecodeError::UnknownOpcode {
            offset: start,
            value: u16::from(lead),
        })
    }

    fn read_operand(
        &mut self,
        opcode: &'static IlOpCode,
        code: IrCode,
        start: u32,
    ) -> DecodeResult<RawOperand> {
        let operand = match opcode.operand {
            OperandKind::None => match opcode.implied {
                Implied::None => IlOperand::None,
                Implied::Int(value) => IlOperand::Int32(value),
                Implied::Index(index) => self.variable(opcode, code, index, start)?,
            },
            OperandKind::ShortVar => {
                let index = u16::from(self.read_u8(start)?);
                self.variable(opcode, code, index, start)?
            }
            OperandKind::Var => {
                let index = u16::from_le_bytes(self.read_array::<2>(start)?);
                self.variable(opcode, code, index, start)?
            }
            OperandKind::ShortI => IlOperand::Int32(i32::from(self.read_u8(start)? as i8)),
            OperandKind::I => IlOperand::Int32(i32::from_le_bytes(self.read_array(start)?)),
            OperandKind::I8 => IlOperand::Int64(i64::from_le_bytes(self.read_array(start)?)),
            OperandKind::R4 => IlOperand::Float32(f32::from_le_bytes(self.read_array(start)?)),
            OperandKind::R => IlOperand::Float64(f64::from_le_bytes(self.read_array(start)?)),
            OperandKind::ShortBrTarget => {
                let displacement = i32::from(self.read_u8(start)? as i8);
                return Ok(RawOperand::Displacement(displacement));
            }
            OperandKind::BrTarget => {
                let displacement = i32::from_le_bytes(self.read_array(start)?);
                return Ok(RawOperand::Displacement(displacement));
            }
            OperandKind::Field => {
                let token = u32::from_le_bytes(self.read_array(start)?);
                let field = self.resolver.resolve_field(token);
                IlOperand::Field(field.ok_or(unresolved(opcode, start, token))?)
            }
            OperandKind::Method => {
                let token = u32::from_le_bytes(self.read_array(start)?);
                let method = self.resolver.resolve_method(token);
                IlOperand::Method(method.ok_or(unresolved(opcode, start, token))?)
            }
            OperandKind::Type => {
                let token = u32::from_le_bytes(self.read_array(start)?);
                let ty = self.resolver.resolve_type(token);
                IlOperand::Type(ty.ok_or(unresolved(opcode, start, token))?)
            }
            OperandKind::String => {
                let token = u32::from_le_bytes(self.read_array(start)?);
                let value = self.resolver.resolve_string(token);
                IlOperand::String(value.ok_or(unresolved(opcode, start, token))?)
            }
            OperandKind::Switch => {
                return Err(DecodeError::UnsupportedOperand {
                    offset: start,
                    name: opcode.name,
                });
            }
        };
        Ok(RawOperand::Ready(operand))
    }

    fn variable(
        &self,
        opcode: &'static IlOpCode,
        code: IrCode,
        index: u16,
        start: u32,
    ) -> DecodeResult<IlOperand> {
        match code {
            IrCode::Ldarg | IrCode::Ldarga | IrCode::Starg => {
                if usize::from(index) >= self.argument_count {
                    return Err(DecodeError::ArgumentOutOfRange {
                        offset: start,
                        name: opcode.name,
                        index,
                        count: self.argument_count,
                    });
                }
                Ok(IlOperand::Argument(index))
            }
            _ => {
                if usize::from(index) >= self.local_count {
                    return Err(DecodeError::LocalOutOfRange {
                        offset: start,
                        name: opcode.name,
                        index,
                        count: self.local_count,
                    });
                }
                Ok(IlOperand::Local(index))
            }
        }
    }

    /// Relative displacements count from the end of the branch itself.
    fn branch_target(
        &self,
        opcode: &'static IlOpCode,
        start: u32,
        size: u32,
        displacement: i32,
    ) -> DecodeResult<u32> {
        let target = i64::from(start) + i64::from(size) + i64::from(displacement);
        if target < 0 || target >= self.code.len() as i64 {
            return Err(DecodeError::BranchOutOfRange {
                offset: start,
                name: opcode.name,
                target,
            });
        }
        Ok(target as u32)
    }

    fn read_u8(&mut self, start: u32) -> DecodeResult<u8> {
        let value = self
            .code
            .get(self.position)
            .ok_or(DecodeError::UnexpectedEnd { offset: start })?;
        self.position += 1;
        Ok(*value)
    }

    fn read_array<const N: usize>(&mut self, start: u32) -> DecodeResult<[u8; N]> {
        let bytes = self
            .code
            .get(self.position..self.position + N)
            .ok_or(DecodeError::UnexpectedEnd { offset: start })?;
        self.position += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }
}

enum RawOperand {
    Ready(IlOperand),
    Displacement(i32),
}

fn unresolved(opcode: &'static IlOpCode, start: u32, token: u32) -> DecodeError {
    DecodeError::UnresolvedToken {
        offset: start,
        name: opcode.name,
        token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataTable;

    fn decode(code: Vec<u8>) -> DecodeResult<Vec<IlInstruction>> {
        let method = MethodDef::new_static("m", Vec::new(), TypeRef::Void);
        let body = MethodBody::new(code, vec![TypeRef::I4]);
        let table = MetadataTable::new();
        IlReader::new(&method, &body, &table).read_all()
    }

    #[test]
    fn branch_target_uses_instruction_end() {
        let records = decode(vec![0x2B, 0x00, 0x2A]).expect("decode should succeed");
        assert_eq!(records[0].operand, IlOperand::Target(2));
        assert_eq!(records[0].size, 2);
    }

    #[test]
    fn dup_expands_to_store_and_two_loads() {
        let records = decode(vec![0x17, 0x25, 0x58, 0x2A]).expect("decode should succeed");
        let codes: Vec<_> = records.iter().map(|r| r.code).collect();
        assert_eq!(
            codes,
            vec![
                IrCode::LdcI4,
                IrCode::Stloc,
                IrCode::Ldloc,
                IrCode::Ldloc,
                IrCode::Add,
                IrCode::Ret
            ]
        );
        assert!(records[1..4].iter().all(|r| r.offset == 1));
        assert_eq!(records[1..4].iter().map(|r| r.size).sum::<u32>(), 1);
        assert_eq!(records[3].operand, IlOperand::Temporary(0));
    }

    #[test]
    fn truncated_operand_is_reported_at_instruction_start() {
        let err = decode(vec![0x00, 0x20, 0x01]).expect_err("decode should fail");
        assert_eq!(err, DecodeError::UnexpectedEnd { offset: 1 });
    }
}
