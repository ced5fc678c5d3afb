use std::collections::HashMap;

use super::opcode::{EncodeError, Fields, SpuOpCode, encode};
use crate::ir::BlockId;
use crate::layout::ObjectId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualRegister(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Register {
    Hardware(u8),
    Virtual(VirtualRegister),
}

impl Register {
    pub const LR: Register = Register::Hardware(0);
    pub const SP: Register = Register::Hardware(1);

    pub fn virtual_register(self) -> Option<VirtualRegister> {
        match self {
            Register::Virtual(reg) => Some(reg),
            Register::Hardware(_) => None,
        }
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Register::Hardware(0) => f.write_str("$lr"),
            Register::Hardware(1) => f.write_str("$sp"),
            Register::Hardware(index) => write!(f, "${index}"),
            Register::Virtual(VirtualRegister(index)) => write!(f, "%{index}"),
        }
    }
}

/// Symbolic target. `Block` names an IR block of the routine being
/// selected and is replaced by `Object` before layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    Block(BlockId),
    Object(ObjectId),
}

/// Binds virtual registers to hardware registers for encoding.
pub trait RegisterMap {
    fn hardware(&self, register: VirtualRegister) -> Option<u8>;
}

impl RegisterMap for HashMap<VirtualRegister, u8> {
    fn hardware(&self, register: VirtualRegister) -> Option<u8> {
        self.get(&register).copied()
    }
}

/// Adapts a closure into a [`RegisterMap`].
pub struct MapFn<F>(pub F);

impl<F> RegisterMap for MapFn<F>
where
    F: Fn(VirtualRegister) -> Option<u8>,
{
    fn hardware(&self, register: VirtualRegister) -> Option<u8> {
        (self.0)(register)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpuInstruction {
    pub opcode: SpuOpCode,
    pub rt: Option<Register>,
    pub ra: Option<Register>,
    pub rb: Option<Register>,
    pub rc: Option<Register>,
    pub constant: i32,
    pub target: Option<Target>,
}

impl SpuInstruction {
    pub fn new(opcode: SpuOpCode) -> Self {
        Self {
            opcode,
            rt: None,
            ra: None,
            rb: None,
            rc: None,
            constant: 0,
            target: None,
        }
    }

    pub fn rr(opcode: SpuOpCode, rt: Register, ra: Register, rb: Register) -> Self {
        Self {
            rt: Some(rt),
            ra: Some(ra),
            rb: Some(rb),
            ..Self::new(opcode)
        }
    }

    pub fn rrr(opcode: SpuOpCode, rt: Register, ra: Register, rb: Register, rc: Register) -> Self {
        Self {
            rt: Some(rt),
            ra: Some(ra),
            rb: Some(rb),
            rc: Some(rc),
            ..Self::new(opcode)
        }
    }

    pub fn ri(opcode: SpuOpCode, rt: Register, ra: Register, constant: i32) -> Self {
        Self {
            rt: Some(rt),
            ra: Some(ra),
            constant,
            ..Self::new(opcode)
        }
    }

    pub fn imm(opcode: SpuOpCode, rt: Register, constant: i32) -> Self {
        Self {
            rt: Some(rt),
            constant,
            ..Self::new(opcode)
        }
    }

    pub fn with_target(opcode: SpuOpCode, rt: Option<Register>, target: Target) -> Self {
        Self {
            rt,
            target: Some(target),
            ..Self::new(opcode)
        }
    }

    pub fn registers(&self) -> impl Iterator<Item = Register> + '_ {
        [self.rt, self.ra, self.rb, self.rc].into_iter().flatten()
    }

    pub fn encode(&self, map: &dyn RegisterMap) -> Result<u32, EncodeError> {
        let mnemonic = self.opcode.mnemonic();
        let resolve = |register: Option<Register>| -> Result<u8, EncodeError> {
            match register {
                None => Ok(0),
                Some(Register::Hardware(index)) => Ok(index),
                Some(Register::Virtual(reg)) => {
                    map.hardware(reg).ok_or(EncodeError::UnmappedRegister {
                        mnemonic,
                        register: reg.0,
                    })
                }
            }
        };
        encode(
            self.opcode,
            Fields {
                rt: resolve(self.rt)?,
                ra: resolve(self.ra)?,
                rb: resolve(self.rb)?,
                rc: resolve(self.rc)?,
                immediate: self.constant,
            },
        )
    }
}

impl std::fmt::Display for SpuInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.opcode.mnemonic())?;
        let mut first = true;
        for register in self.registers() {
            let sep = if first { " " } else { "," };
            write!(f, "{sep}{register}")?;
            first = false;
        }
        match self.target {
            Some(Target::Block(BlockId(id))) => write!(f, " -> block{id}"),
            Some(Target::Object(ObjectId(id))) => write!(f, " -> object{id}"),
            None if self.constant != 0 => write!(f, ",{}", self.constant),
            None => Ok(()),
        }
    }
}
