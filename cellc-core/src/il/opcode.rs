use std::collections::HashMap;
use std::sync::OnceLock;

use crate::ir::IrCode;

/// Lead byte of the two-byte opcode space.
pub const EXTENDED_PREFIX: u8 = 0xFE;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperandKind {
    None,
    ShortVar,
    Var,
    ShortI,
    I,
    I8,
    R4,
    R,
    ShortBrTarget,
    BrTarget,
    Field,
    Method,
    Type,
    String,
    Switch,
}

impl OperandKind {
    /// Encoded byte width. `Switch` is variable-length and reports `None`.
    pub fn width(self) -> Option<usize> {
        match self {
            OperandKind::None => Some(0),
            OperandKind::ShortVar | OperandKind::ShortI | OperandKind::ShortBrTarget => Some(1),
            OperandKind::Var => Some(2),
            OperandKind::I
            | OperandKind::R4
            | OperandKind::BrTarget
            | OperandKind::Field
            | OperandKind::Method
            | OperandKind::Type
            | OperandKind::String => Some(4),
            OperandKind::I8 | OperandKind::R => Some(8),
            OperandKind::Switch => None,
        }
    }

    pub fn is_branch_target(self) -> bool {
        matches!(self, OperandKind::ShortBrTarget | OperandKind::BrTarget)
    }
}

/// Operand value carried by a fixed (macro) form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Implied {
    None,
    Int(i32),
    Index(u16),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IlOpCode {
    pub name: &'static str,
    pub value: u16,
    pub operand: OperandKind,
    /// Canonical form. `None` marks a prefix opcode.
    pub code: Option<IrCode>,
    pub implied: Implied,
}

impl IlOpCode {
    pub fn is_prefix(&self) -> bool {
        self.code.is_none()
    }

    pub fn is_extended(&self) -> bool {
        self.value > 0xFF
    }

    /// Bytes used by the opcode selector itself.
    pub fn selector_len(&self) -> usize {
        if self.is_extended() { 2 } else { 1 }
    }
}

const fn op(name: &'static str, value: u16, operand: OperandKind, code: IrCode) -> IlOpCode {
    IlOpCode {
        name,
        value,
        operand,
        code: Some(code),
        implied: Implied::None,
    }
}

const fn fixed(name: &'static str, value: u16, code: IrCode, implied: Implied) -> IlOpCode {
    IlOpCode {
        name,
        value,
        operand: OperandKind::None,
        code: Some(code),
        implied,
    }
}

const fn prefix(name: &'static str, value: u16, operand: OperandKind) -> IlOpCode {
    IlOpCode {
        name,
        value,
        operand,
        code: None,
        implied: Implied::None,
    }
}

use IrCode as C;
use OperandKind as K;

static OPCODES: &[IlOpCode] = &[
    op("nop", 0x00, K::None, C::Nop),
    op("break", 0x01, K::None, C::Break),
    fixed("ldarg.0", 0x02, C::Ldarg, Implied::Index(0)),
    fixed("ldarg.1", 0x03, C::Ldarg, Implied::Index(1)),
    fixed("ldarg.2", 0x04, C::Ldarg, Implied::Index(2)),
    fixed("ldarg.3", 0x05, C::Ldarg, Implied::Index(3)),
    fixed("ldloc.0", 0x06, C::Ldloc, Implied::Index(0)),
    fixed("ldloc.1", 0x07, C::Ldloc, Implied::Index(1)),
    fixed("ldloc.2", 0x08, C::Ldloc, Implied::Index(2)),
    fixed("ldloc.3", 0x09, C::Ldloc, Implied::Index(3)),
    fixed("stloc.0", 0x0A, C::Stloc, Implied::Index(0)),
    fixed("stloc.1", 0x0B, C::Stloc, Implied::Index(1)),
    fixed("stloc.2", 0x0C, C::Stloc, Implied::Index(2)),
    fixed("stloc.3", 0x0D, C::Stloc, Implied::Index(3)),
    op("ldarg.s", 0x0E, K::ShortVar, C::Ldarg),
    op("ldarga.s", 0x0F, K::ShortVar, C::Ldarga),
    op("starg.s", 0x10, K::ShortVar, C::Starg),
    op("ldloc.s", 0x11, K::ShortVar, C::Ldloc),
    op("ldloca.s", 0x12, K::ShortVar, C::Ldloca),
    op("stloc.s", 0x13, K::ShortVar, C::Stloc),
    op("ldnull", 0x14, K::None, C::Ldnull),
    fixed("ldc.i4.m1", 0x15, C::LdcI4, Implied::Int(-1)),
    fixed("ldc.i4.0", 0x16, C::LdcI4, Implied::Int(0)),
    fixed("ldc.i4.1", 0x17, C::LdcI4, Implied::Int(1)),
    fixed("ldc.i4.2", 0x18, C::LdcI4, Implied::Int(2)),
    fixed("ldc.i4.3", 0x19, C::LdcI4, Implied::Int(3)),
    fixed("ldc.i4.4", 0x1A, C::LdcI4, Implied::Int(4)),
    fixed("ldc.i4.5", 0x1B, C::LdcI4, Implied::Int(5)),
    fixed("ldc.i4.6", 0x1C, C::LdcI4, Implied::Int(6)),
    fixed("ldc.i4.7", 0x1D, C::LdcI4, Implied::Int(7)),
    fixed("ldc.i4.8", 0x1E, C::LdcI4, Implied::Int(8)),
    op("ldc.i4.s", 0x1F, K::ShortI, C::LdcI4),
    op("ldc.i4", 0x20, K::I, C::LdcI4),
    op("ldc.i8", 0x21, K::I8, C::LdcI8),
    op("ldc.r4", 0x22, K::R4, C::LdcR4),
    op("ldc.r8", 0x23, K::R, C::LdcR8),
    op("dup", 0x25, K::None, C::Dup),
    op("pop", 0x26, K::None, C::Pop),
    op("call", 0x28, K::Method, C::Call),
    op("ret", 0x2A, K::None, C::Ret),
    op("br.s", 0x2B, K::ShortBrTarget, C::Br),
    op("brfalse.s", 0x2C, K::ShortBrTarget, C::Brfalse),
    op("brtrue.s", 0x2D, K::ShortBrTarget, C::Brtrue),
    op("beq.s", 0x2E, K::ShortBrTarget, C::Beq),
    op("bge.s", 0x2F, K::ShortBrTarget, C::Bge),
    op("bgt.s", 0x30, K::ShortBrTarget, C::Bgt),
    op("ble.s", 0x31, K::ShortBrTarget, C::Ble),
    op("blt.s", 0x32, K::ShortBrTarget, C::Blt),
    op("bne.un.s", 0x33, K::ShortBrTarget, C::BneUn),
    op("bge.un.s", 0x34, K::ShortBrTarget, C::BgeUn),
    op("bgt.un.s", 0x35, K::ShortBrTarget, C::BgtUn),
    op("ble.un.s", 0x36, K::ShortBrTarget, C::BleUn),
    op("blt.un.s", 0x37, K::ShortBrTarget, C::BltUn),
    op("br", 0x38, K::BrTarget, C::Br),
    op("brfalse", 0x39, K::BrTarget, C::Brfalse),
    op("brtrue", 0x3A, K::BrTarget, C::Brtrue),
    op("beq", 0x3B, K::BrTarget, C::Beq),
    op("bge", 0x3C, K::BrTarget, C::Bge),
    op("bgt", 0x3D, K::BrTarget, C::Bgt),
    op("ble", 0x3E, K::BrTarget, C::Ble),
    op("blt", 0x3F, K::BrTarget, C::Blt),
    op("bne.un", 0x40, K::BrTarget, C::BneUn),
    op("bge.un", 0x41, K::BrTarget, C::BgeUn),
    op("bgt.un", 0x42, K::BrTarget, C::BgtUn),
    op("ble.un", 0x43, K::BrTarget, C::BleUn),
    op("blt.un", 0x44, K::BrTarget, C::BltUn),
    op("switch", 0x45, K::Switch, C::Switch),
    op("ldind.i1", 0x46, K::None, C::LdindI1),
    op("ldind.u1", 0x47, K::None, C::LdindU1),
    op("ldind.i2", 0x48, K::None, C::LdindI2),
    op("ldind.u2", 0x49, K::None, C::LdindU2),
    op("ldind.i4", 0x4A, K::None, C::LdindI4),
    op("ldind.u4", 0x4B, K::None, C::LdindU4),
    op("ldind.i8", 0x4C, K::None, C::LdindI8),
    op("ldind.i", 0x4D, K::None, C::LdindI),
    op("ldind.r4", 0x4E, K::None, C::LdindR4),
    op("ldind.r8", 0x4F, K::None, C::LdindR8),
    op("ldind.ref", 0x50, K::None, C::LdindRef),
    op("stind.ref", 0x51, K::None, C::StindRef),
    op("stind.i1", 0x52, K::None, C::StindI1),
    op("stind.i2", 0x53, K::None, C::StindI2),
    op("stind.i4", 0x54, K::None, C::StindI4),
    op("stind.i8", 0x55, K::None, C::StindI8),
    op("stind.r4", 0x56, K::None, C::StindR4),
    op("stind.r8", 0x57, K::None, C::StindR8),
    op("add", 0x58, K::None, C::Add),
    op("sub", 0x59, K::None, C::Sub),
    op("mul", 0x5A, K::None, C::Mul),
    op("div", 0x5B, K::None, C::Div),
    op("div.un", 0x5C, K::None, C::DivUn),
    op("rem", 0x5D, K::None, C::Rem),
    op("rem.un", 0x5E, K::None, C::RemUn),
    op("and", 0x5F, K::None, C::And),
    op("or", 0x60, K::None, C::Or),
    op("xor", 0x61, K::None, C::Xor),
    op("shl", 0x62, K::None, C::Shl),
    op("shr", 0x63, K::None, C::Shr),
    op("shr.un", 0x64, K::None, C::ShrUn),
    op("neg", 0x65, K::None, C::Neg),
    op("not", 0x66, K::None, C::Not),
    op("conv.i1", 0x67, K::None, C::ConvI1),
    op("conv.i2", 0x68, K::None, C::ConvI2),
    op("conv.i4", 0x69, K::None, C::ConvI4),
    op("conv.i8", 0x6A, K::None, C::ConvI8),
    op("conv.r4", 0x6B, K::None, C::ConvR4),
    op("conv.r8", 0x6C, K::None, C::ConvR8),
    op("conv.u4", 0x6D, K::None, C::ConvU4),
    op("conv.u8", 0x6E, K::None, C::ConvU8),
    op("callvirt", 0x6F, K::Method, C::Callvirt),
    op("ldobj", 0x71, K::Type, C::Ldobj),
    op("ldstr", 0x72, K::String, C::Ldstr),
    op("newobj", 0x73, K::Method, C::Newobj),
    op("castclass", 0x74, K::Type, C::Castclass),
    op("isinst", 0x75, K::Type, C::Isinst),
    op("conv.r.un", 0x76, K::None, C::ConvRUn),
    op("throw", 0x7A, K::None, C::Throw),
    op("ldfld", 0x7B, K::Field, C::Ldfld),
    op("ldflda", 0x7C, K::Field, C::Ldflda),
    op("stfld", 0x7D, K::Field, C::Stfld),
    op("ldsfld", 0x7E, K::Field, C::Ldsfld),
    op("ldsflda", 0x7F, K::Field, C::Ldsflda),
    op("stsfld", 0x80, K::Field, C::Stsfld),
    op("stobj", 0x81, K::Type, C::Stobj),
    op("conv.ovf.i1.un", 0x82, K::None, C::ConvOvfUn),
    op("conv.ovf.i2.un", 0x83, K::None, C::ConvOvfUn),
    op("conv.ovf.i4.un", 0x84, K::None, C::ConvOvfUn),
    op("conv.ovf.i8.un", 0x85, K::None, C::ConvOvfUn),
    op("conv.ovf.u1.un", 0x86, K::None, C::ConvOvfUn),
    op("conv.ovf.u2.un", 0x87, K::None, C::ConvOvfUn),
    op("conv.ovf.u4.un", 0x88, K::None, C::ConvOvfUn),
    op("conv.ovf.u8.un", 0x89, K::None, C::ConvOvfUn),
    op("conv.ovf.i.un", 0x8A, K::None, C::ConvOvfUn),
    op("conv.ovf.u.un", 0x8B, K::None, C::ConvOvfUn),
    op("box", 0x8C, K::Type, C::Box),
    op("newarr", 0x8D, K::Type, C::Newarr),
    op("ldlen", 0x8E, K::None, C::Ldlen),
    op("ldelema", 0x8F, K::Type, C::Ldelema),
    op("ldelem.i1", 0x90, K::None, C::LdelemI1),
    op("ldelem.u1", 0x91, K::None, C::LdelemU1),
    op("ldelem.i2", 0x92, K::None, C::LdelemI2),
    op("ldelem.u2", 0x93, K::None, C::LdelemU2),
    op("ldelem.i4", 0x94, K::None, C::LdelemI4),
    op("ldelem.u4", 0x95, K::None, C::LdelemU4),
    op("ldelem.i8", 0x96, K::None, C::LdelemI8),
    op("ldelem.i", 0x97, K::None, C::LdelemI),
    op("ldelem.r4", 0x98, K::None, C::LdelemR4),
    op("ldelem.r8", 0x99, K::None, C::LdelemR8),
    op("ldelem.ref", 0x9A, K::None, C::LdelemRef),
    op("stelem.i", 0x9B, K::None, C::StelemI),
    op("stelem.i1", 0x9C, K::None, C::StelemI1),
    op("stelem.i2", 0x9D, K::None, C::StelemI2),
    op("stelem.i4", 0x9E, K::None, C::StelemI4),
    op("stelem.i8", 0x9F, K::None, C::StelemI8),
    op("stelem.r4", 0xA0, K::None, C::StelemR4),
    op("stelem.r8", 0xA1, K::None, C::StelemR8),
    op("stelem.ref", 0xA2, K::None, C::StelemRef),
    op("ldelem", 0xA3, K::Type, C::Ldelem),
    op("stelem", 0xA4, K::Type, C::Stelem),
    op("unbox.any", 0xA5, K::Type, C::UnboxAny),
    op("conv.ovf.i1", 0xB3, K::None, C::ConvOvf),
    op("conv.ovf.u1", 0xB4, K::None, C::ConvOvf),
    op("conv.ovf.i2", 0xB5, K::None, C::ConvOvf),
    op("conv.ovf.u2", 0xB6, K::None, C::ConvOvf),
    op("conv.ovf.i4", 0xB7, K::None, C::ConvOvf),
    op("conv.ovf.u4", 0xB8, K::None, C::ConvOvf),
    op("conv.ovf.i8", 0xB9, K::None, C::ConvOvf),
    op("conv.ovf.u8", 0xBA, K::None, C::ConvOvf),
    op("ldtoken", 0xD0, K::Type, C::Ldtoken),
    op("conv.u2", 0xD1, K::None, C::ConvU2),
    op("conv.u1", 0xD2, K::None, C::ConvU1),
    op("conv.i", 0xD3, K::None, C::ConvI),
    op("conv.ovf.i", 0xD4, K::None, C::ConvOvf),
    op("conv.ovf.u", 0xD5, K::None, C::ConvOvf),
    op("leave", 0xDD, K::BrTarget, C::Leave),
    op("leave.s", 0xDE, K::ShortBrTarget, C::Leave),
    op("stind.i", 0xDF, K::None, C::StindI),
    op("conv.u", 0xE0, K::None, C::ConvU),
    op("ceq", 0xFE01, K::None, C::Ceq),
    op("cgt", 0xFE02, K::None, C::Cgt),
    op("cgt.un", 0xFE03, K::None, C::CgtUn),
    op("clt", 0xFE04, K::None, C::Clt),
    op("clt.un", 0xFE05, K::None, C::CltUn),
    op("ldarg", 0xFE09, K::Var, C::Ldarg),
    op("ldarga", 0xFE0A, K::Var, C::Ldarga),
    op("starg", 0xFE0B, K::Var, C::Starg),
    op("ldloc", 0xFE0C, K::Var, C::Ldloc),
    op("ldloca", 0xFE0D, K::Var, C::Ldloca),
    op("stloc", 0xFE0E, K::Var, C::Stloc),
    prefix("unaligned.", 0xFE12, K::ShortI),
    prefix("volatile.", 0xFE13, K::None),
    prefix("tail.", 0xFE14, K::None),
    op("initobj", 0xFE15, K::Type, C::Initobj),
    prefix("constrained.", 0xFE16, K::Type),
    op("sizeof", 0xFE1C, K::Type, C::Sizeof),
    prefix("readonly.", 0xFE1E, K::None),
];

pub struct OpCodeRegistry {
    single: [Option<&'static IlOpCode>; 256],
    extended: [Option<&'static IlOpCode>; 256],
    by_name: HashMap<&'static str, &'static IlOpCode>,
}

impl OpCodeRegistry {
    fn build() -> Self {
        let mut single = [None; 256];
        let mut extended = [None; 256];
        let mut by_name = HashMap::with_capacity(OPCODES.len());
        for opcode in OPCODES {
            let [lead, low] = opcode.value.to_be_bytes();
            if lead == EXTENDED_PREFIX {
                extended[low as usize] = Some(opcode);
            } else {
                single[low as usize] = Some(opcode);
            }
            by_name.insert(opcode.name, opcode);
        }
        Self {
            single,
            extended,
            by_name,
        }
    }

    pub fn single(&self, byte: u8) -> Option<&'static IlOpCode> {
        self.single[byte as usize]
    }

    pub fn extended(&self, byte: u8) -> Option<&'static IlOpCode> {
        self.extended[byte as usize]
    }

    pub fn by_value(&self, value: u16) -> Option<&'static IlOpCode> {
        let [lead, low] = value.to_be_bytes();
        match lead {
            0 => self.single(low),
            EXTENDED_PREFIX => self.extended(low),
            _ => None,
        }
    }

    pub fn by_name(&self, name: &str) -> Option<&'static IlOpCode> {
        self.by_name.get(name.to_ascii_lowercase().as_str()).copied()
    }

    pub fn all(&self) -> &'static [IlOpCode] {
        OPCODES
    }
}

static REGISTRY: OnceLock<OpCodeRegistry> = OnceLock::new();

pub fn registry() -> &'static OpCodeRegistry {
    REGISTRY.get_or_init(OpCodeRegistry::build)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodings_and_names_are_unique() {
        let mut values = std::collections::HashSet::new();
        let mut names = std::collections::HashSet::new();
        for opcode in OPCODES {
            assert!(values.insert(opcode.value), "duplicate {:#x}", opcode.value);
            assert!(names.insert(opcode.name), "duplicate {}", opcode.name);
        }
    }

    #[test]
    fn registry_resolves_both_opcode_spaces() {
        let ceq = registry().by_value(0xFE01).expect("ceq should be registered");
        assert_eq!(ceq.code, Some(IrCode::Ceq));
        assert_eq!(ceq.selector_len(), 2);

        let ble = registry().by_name("BLE.S").expect("ble.s should be registered");
        assert_eq!(ble.value, 0x31);
        assert_eq!(ble.code, Some(IrCode::Ble));
        assert!(registry().by_value(0xFE13).is_some_and(|op| op.is_prefix()));
        assert!(registry().single(0x24).is_none());
    }

    #[test]
    fn every_canonical_code_has_a_general_form() {
        for opcode in OPCODES.iter().filter(|op| op.implied != Implied::None) {
            let code = opcode.code.expect("fixed forms carry a canonical code");
            assert!(
                OPCODES
                    .iter()
                    .any(|other| other.code == Some(code) && other.implied == Implied::None),
                "{} has no general form",
                opcode.name
            );
        }
    }
}
