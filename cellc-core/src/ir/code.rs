#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowControl {
    Next,
    Branch,
    ConditionalBranch,
    Call,
    Return,
    Throw,
    Break,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PopBehaviour {
    Fixed(u8),
    /// Callee parameter count, plus the receiver unless constructing.
    Call,
    /// One value unless the routine returns void.
    Return,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushBehaviour {
    None,
    One,
    Two,
    /// Callee return value, if any.
    Call,
}

/// Canonical opcodes. Macro and short forms never reach this level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IrCode {
    Nop,
    Break,
    Ldarg,
    Ldarga,
    Starg,
    Ldloc,
    Ldloca,
    Stloc,
    Ldnull,
    LdcI4,
    LdcI8,
    LdcR4,
    LdcR8,
    Dup,
    Pop,
    Call,
    Callvirt,
    Newobj,
    Ret,
    Br,
    Brfalse,
    Brtrue,
    Beq,
    Bge,
    Bgt,
    Ble,
    Blt,
    BneUn,
    BgeUn,
    BgtUn,
    BleUn,
    BltUn,
    Switch,
    LdindI1,
    LdindU1,
    LdindI2,
    LdindU2,
    LdindI4,
    LdindU4,
    LdindI8,
    LdindI,
    LdindR4,
    LdindR8,
    LdindRef,
    StindRef,
    StindI1,
    StindI2,
    StindI4,
    StindI8,
    StindR4,
    StindR8,
    StindI,
    Add,
    Sub,
    Mul,
    Div,
    DivUn,
    Rem,
    RemUn,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrUn,
    Neg,
    Not,
    ConvI1,
    ConvI2,
    ConvI4,
    ConvI8,
    ConvR4,
    ConvR8,
    ConvU4,
    ConvU8,
    ConvU2,
    ConvU1,
    ConvI,
    ConvU,
    ConvRUn,
    Ldobj,
    Stobj,
    Ldstr,
    Newarr,
    Ldlen,
    Ldelema,
    LdelemI1,
    LdelemU1,
    LdelemI2,
    LdelemU2,
    LdelemI4,
    LdelemU4,
    LdelemI8,
    LdelemI,
    LdelemR4,
    LdelemR8,
    LdelemRef,
    Ldelem,
    StelemI,
    StelemI1,
    StelemI2,
    StelemI4,
    StelemI8,
    StelemR4,
    StelemR8,
    StelemRef,
    Stelem,
    Ldfld,
    Ldflda,
    Stfld,
    Ldsfld,
    Ldsflda,
    Stsfld,
    Throw,
    Ceq,
    Cgt,
    CgtUn,
    Clt,
    CltUn,
    Initobj,
    Sizeof,
    Box,
    UnboxAny,
    Castclass,
    Isinst,
    Ldtoken,
    ConvOvf,
    ConvOvfUn,
    Leave,
}

impl IrCode {
    pub fn mnemonic(self) -> &'static str {
        match self {
            IrCode::Nop => "nop",
            IrCode::Break => "break",
            IrCode::Ldarg => "ldarg",
            IrCode::Ldarga => "ldarga",
            IrCode::Starg => "starg",
            IrCode::Ldloc => "ldloc",
            IrCode::Ldloca => "ldloca",
            IrCode::Stloc => "stloc",
            IrCode::Ldnull => "ldnull",
            IrCode::LdcI4 => "ldc.i4",
            IrCode::LdcI8 => "ldc.i8",
            IrCode::LdcR4 => "ldc.r4",
            IrCode::LdcR8 => "ldc.r8",
            IrCode::Dup => "dup",
            IrCode::Pop => "pop",
            IrCode::Call => "call",
            IrCode::Callvirt => "callvirt",
            IrCode::Newobj => "newobj",
            IrCode::Ret => "ret",
            IrCode::Br => "br",
            IrCode::Brfalse => "brfalse",
            IrCode::Brtrue => "brtrue",
            IrCode::Beq => "beq",
            IrCode::Bge => "bge",
            IrCode::Bgt => "bgt",
            IrCode::Ble => "ble",
            IrCode::Blt => "blt",
            IrCode::BneUn => "bne.un",
            IrCode::BgeUn => "bge.un",
            IrCode::BgtUn => "bgt.un",
            IrCode::BleUn => "ble.un",
            IrCode::BltUn => "blt.un",
            IrCode::Switch => "switch",
            IrCode::LdindI1 => "ldind.i1",
            IrCode::LdindU1 => "ldind.u1",
            IrCode::LdindI2 => "ldind.i2",
            IrCode::LdindU2 => "ldind.u2",
            IrCode::LdindI4 => "ldind.i4",
            IrCode::LdindU4 => "ldind.u4",
            IrCode::LdindI8 => "ldind.i8",
            IrCode::LdindI => "ldind.i",
            IrCode::LdindR4 => "ldind.r4",
            IrCode::LdindR8 => "ldind.r8",
            IrCode::LdindRef => "ldind.ref",
            IrCode::StindRef => "stind.ref",
            IrCode::StindI1 => "stind.i1",
            IrCode::StindI2 => "stind.i2",
            IrCode::StindI4 => "stind.i4",
            IrCode::StindI8 => "stind.i8",
            IrCode::StindR4 => "stind.r4",
            IrCode::StindR8 => "stind.r8",
            IrCode::StindI => "stind.i",
            IrCode::Add => "add",
            IrCode::Sub => "sub",
            IrCode::Mul => "mul",
            IrCode::Div => "div",
            IrCode::DivUn => "div.un",
            IrCode::Rem => "rem",
            IrCode::RemUn => "rem.un",
            IrCode::And => "and",
            IrCode::Or => "or",
            IrCode::Xor => "xor",
            IrCode::Shl => "shl",
            IrCode::Shr => "shr",
            IrCode::ShrUn => "shr.un",
            IrCode::Neg => "neg",
            IrCode::Not => "not",
            IrCode::ConvI1 => "conv.i1",
            IrCode::ConvI2 => "conv.i2",
            IrCode::ConvI4 => "conv.i4",
            IrCode::ConvI8 => "conv.i8",
            IrCode::ConvR4 => "conv.r4",
            IrCode::ConvR8 => "conv.r8",
            IrCode::ConvU4 => "conv.u4",
            IrCode::ConvU8 => "conv.u8",
            IrCode::ConvU2 => "conv.u2",
            IrCode::ConvU1 => "conv.u1",
            IrCode::ConvI => "conv.i",
            IrCode::ConvU => "conv.u",
            IrCode::ConvRUn => "conv.r.un",
            IrCode::Ldobj => "ldobj",
            IrCode::Stobj => "stobj",
            IrCode::Ldstr => "ldstr",
            IrCode::Newarr => "newarr",
            IrCode::Ldlen => "ldlen",
            IrCode::Ldelema => "ldelema",
            IrCode::LdelemI1 => "ldelem.i1",
            IrCode::LdelemU1 => "ldelem.u1",
            IrCode::LdelemI2 => "ldelem.i2",
            IrCode::LdelemU2 => "ldelem.u2",
            IrCode::LdelemI4 => "ldelem.i4",
            IrCode::LdelemU4 => "ldelem.u4",
            IrCode::LdelemI8 => "ldelem.i8",
            IrCode::LdelemI => "ldelem.i",
            IrCode::LdelemR4 => "ldelem.r4",
            IrCode::LdelemR8 => "ldelem.r8",
            IrCode::LdelemRef => "ldelem.ref",
            IrCode::Ldelem => "ldelem",
            IrCode::StelemI => "stelem.i",
            IrCode::StelemI1 => "stelem.i1",
            IrCode::StelemI2 => "stelem.i2",
            IrCode::StelemI4 => "stelem.i4",
            IrCode::StelemI8 => "stelem.i8",
            IrCode::StelemR4 => "stelem.r4",
            IrCode::StelemR8 => "stelem.r8",
            IrCode::StelemRef => "stelem.ref",
            IrCode::Stelem => "stelem",
            IrCode::Ldfld => "ldfld",
            IrCode::Ldflda => "ldflda",
            IrCode::Stfld => "stfld",
            IrCode::Ldsfld => "ldsfld",
            IrCode::Ldsflda => "ldsflda",
            IrCode::Stsfld => "stsfld",
            IrCode::Throw => "throw",
            IrCode::Ceq => "ceq",
            IrCode::Cgt => "cgt",
            IrCode::CgtUn => "cgt.un",
            IrCode::Clt => "clt",
            IrCode::CltUn => "clt.un",
            IrCode::Initobj => "initobj",
            IrCode::Sizeof => "sizeof",
            IrCode::Box => "box",
            IrCode::UnboxAny => "unbox.any",
            IrCode::Castclass => "castclass",
            IrCode::Isinst => "isinst",
            IrCode::Ldtoken => "ldtoken",
            IrCode::ConvOvf => "conv.ovf",
            IrCode::ConvOvfUn => "conv.ovf.un",
            IrCode::Leave => "leave",
        }
    }

    pub fn flow(self) -> FlowControl {
        match self {
            IrCode::Break => FlowControl::Break,
            IrCode::Call | IrCode::Callvirt | IrCode::Newobj => FlowControl::Call,
            IrCode::Ret => FlowControl::Return,
            IrCode::Throw => FlowControl::Throw,
            IrCode::Br | IrCode::Leave => FlowControl::Branch,
            IrCode::Brfalse
            | IrCode::Brtrue
            | IrCode::Beq
            | IrCode::Bge
            | IrCode::Bgt
            | IrCode::Ble
            | IrCode::Blt
            | IrCode::BneUn
            | IrCode::BgeUn
            | IrCode::BgtUn
            | IrCode::BleUn
            | IrCode::BltUn
            | IrCode::Switch => FlowControl::ConditionalBranch,
            _ => FlowControl::Next,
        }
    }

    pub fn is_branch(self) -> bool {
        matches!(
            self.flow(),
            FlowControl::Branch | FlowControl::ConditionalBranch
        )
    }

    /// Control never falls through to the next instruction.
    pub fn ends_block_unconditionally(self) -> bool {
        matches!(
            self.flow(),
            FlowControl::Branch | FlowControl::Return | FlowControl::Throw
        )
    }

    pub fn pops(self) -> PopBehaviour {
        match self {
            IrCode::Call | IrCode::Callvirt | IrCode::Newobj => PopBehaviour::Call,
            IrCode::Ret => PopBehaviour::Return,
            IrCode::Nop
            | IrCode::Break
            | IrCode::Ldarg
            | IrCode::Ldarga
            | IrCode::Ldloc
            | IrCode::Ldloca
            | IrCode::Ldnull
            | IrCode::LdcI4
            | IrCode::LdcI8
            | IrCode::LdcR4
            | IrCode::LdcR8
            | IrCode::Ldstr
            | IrCode::Ldsfld
            | IrCode::Ldsflda
            | IrCode::Br
            | IrCode::Sizeof
            | IrCode::Ldtoken
            | IrCode::Leave => PopBehaviour::Fixed(0),
            IrCode::Starg
            | IrCode::Stloc
            | IrCode::Dup
            | IrCode::Pop
            | IrCode::Brfalse
            | IrCode::Brtrue
            | IrCode::Switch
            | IrCode::LdindI1
            | IrCode::LdindU1
            | IrCode::LdindI2
            | IrCode::LdindU2
            | IrCode::LdindI4
            | IrCode::LdindU4
            | IrCode::LdindI8
            | IrCode::LdindI
            | IrCode::LdindR4
            | IrCode::LdindR8
            | IrCode::LdindRef
            | IrCode::Neg
            | IrCode::Not
            | IrCode::ConvI1
            | IrCode::ConvI2
            | IrCode::ConvI4
            | IrCode::ConvI8
            | IrCode::ConvR4
            | IrCode::ConvR8
            | IrCode::ConvU4
            | IrCode::ConvU8
            | IrCode::ConvU2
            | IrCode::ConvU1
            | IrCode::ConvI
            | IrCode::ConvU
            | IrCode::ConvRUn
            | IrCode::Ldobj
            | IrCode::Newarr
            | IrCode::Ldlen
            | IrCode::Ldfld
            | IrCode::Ldflda
            | IrCode::Stsfld
            | IrCode::Throw
            | IrCode::Initobj
            | IrCode::Box
            | IrCode::UnboxAny
            | IrCode::Castclass
            | IrCode::Isinst
            | IrCode::ConvOvf
            | IrCode::ConvOvfUn => PopBehaviour::Fixed(1),
            IrCode::StelemI
            | IrCode::StelemI1
            | IrCode::StelemI2
            | IrCode::StelemI4
            | IrCode::StelemI8
            | IrCode::StelemR4
            | IrCode::StelemR8
            | IrCode::StelemRef
            | IrCode::Stelem => PopBehaviour::Fixed(3),
            _ => PopBehaviour::Fixed(2),
        }
    }

    pub fn pushes(self) -> PushBehaviour {
        match self {
            IrCode::Call | IrCode::Callvirt => PushBehaviour::Call,
            IrCode::Dup => PushBehaviour::Two,
            IrCode::Nop
            | IrCode::Break
            | IrCode::Starg
            | IrCode::Stloc
            | IrCode::Pop
            | IrCode::Ret
            | IrCode::Switch
            | IrCode::StindRef
            | IrCode::StindI1
            | IrCode::StindI2
            | IrCode::StindI4
            | IrCode::StindI8
            | IrCode::StindR4
            | IrCode::StindR8
            | IrCode::StindI
            | IrCode::Stobj
            | IrCode::StelemI
            | IrCode::StelemI1
            | IrCode::StelemI2
            | IrCode::StelemI4
            | IrCode::StelemI8
            | IrCode::StelemR4
            | IrCode::StelemR8
            | IrCode::StelemRef
            | IrCode::Stelem
            | IrCode::Stfld
            | IrCode::Stsfld
            | IrCode::Throw
            | IrCode::Initobj => PushBehaviour::None,
            code if code.is_branch() => PushBehaviour::None,
            _ => PushBehaviour::One,
        }
    }

    /// Element load/store forms that the tree builder rewrites into address
    /// computation plus an indirect access.
    pub fn element_access(self) -> Option<ElementAccess> {
        let access = match self {
            IrCode::LdelemI1 => ElementAccess::load(IrCode::LdindI1),
            IrCode::LdelemU1 => ElementAccess::load(IrCode::LdindU1),
            IrCode::LdelemI2 => ElementAccess::load(IrCode::LdindI2),
            IrCode::LdelemU2 => ElementAccess::load(IrCode::LdindU2),
            IrCode::LdelemI4 => ElementAccess::load(IrCode::LdindI4),
            IrCode::LdelemU4 => ElementAccess::load(IrCode::LdindU4),
            IrCode::LdelemI8 => ElementAccess::load(IrCode::LdindI8),
            IrCode::LdelemI => ElementAccess::load(IrCode::LdindI),
            IrCode::LdelemR4 => ElementAccess::load(IrCode::LdindR4),
            IrCode::LdelemR8 => ElementAccess::load(IrCode::LdindR8),
            IrCode::LdelemRef => ElementAccess::load(IrCode::LdindRef),
            IrCode::Ldelem => ElementAccess::load(IrCode::Ldobj),
            IrCode::StelemI => ElementAccess::store(IrCode::StindI),
            IrCode::StelemI1 => ElementAccess::store(IrCode::StindI1),
            IrCode::StelemI2 => ElementAccess::store(IrCode::StindI2),
            IrCode::StelemI4 => ElementAccess::store(IrCode::StindI4),
            IrCode::StelemI8 => ElementAccess::store(IrCode::StindI8),
            IrCode::StelemR4 => ElementAccess::store(IrCode::StindR4),
            IrCode::StelemR8 => ElementAccess::store(IrCode::StindR8),
            IrCode::StelemRef => ElementAccess::store(IrCode::StindRef),
            IrCode::Stelem => ElementAccess::store(IrCode::Stobj),
            _ => return None,
        };
        Some(access)
    }

    /// Byte width moved by an indirect load or store.
    pub fn access_size(self) -> Option<u32> {
        match self {
            IrCode::LdindI1 | IrCode::LdindU1 | IrCode::StindI1 => Some(1),
            IrCode::LdindI2 | IrCode::LdindU2 | IrCode::StindI2 => Some(2),
            IrCode::LdindI4
            | IrCode::LdindU4
            | IrCode::LdindI
            | IrCode::LdindR4
            | IrCode::LdindRef
            | IrCode::StindI4
            | IrCode::StindI
            | IrCode::StindR4
            | IrCode::StindRef => Some(4),
            IrCode::LdindI8 | IrCode::LdindR8 | IrCode::StindI8 | IrCode::StindR8 => Some(8),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElementAccess {
    pub indirect: IrCode,
    pub is_store: bool,
}

impl ElementAccess {
    fn load(indirect: IrCode) -> Self {
        Self {
            indirect,
            is_store: false,
        }
    }

    fn store(indirect: IrCode) -> Self {
        Self {
            indirect,
            is_store: true,
        }
    }
}
