/// Instruction word layouts. Field widths follow the opcode width in the name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// 11-bit opcode, rb, ra, rt.
    Rr,
    /// 4-bit opcode, rt, rb, ra, rc.
    Rrr,
    /// 11-bit opcode, signed 7-bit immediate, ra, rt.
    Ri7,
    /// 10-bit opcode, 8-bit immediate, ra, rt.
    Ri8,
    /// 8-bit opcode, signed 10-bit immediate, ra, rt.
    Ri10,
    /// 9-bit opcode, 16-bit immediate, rt.
    Ri16,
    /// 7-bit opcode, unsigned 18-bit immediate, rt.
    Ri18,
    /// 11-bit opcode, 14-bit signal.
    Stop,
    /// Not encodable; rewritten during layout.
    Pseudo,
}

/// How layout rewrites the immediate of an instruction with a symbolic target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchKind {
    /// `(target - source) >> 2` into the signed 16-bit field.
    RelativeWord,
    /// Target byte address into the unsigned 18-bit field.
    AbsoluteByte,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpuOpCode {
    A,
    Ah,
    Sf,
    And,
    Andc,
    Or,
    Xor,
    Nor,
    Mpy,
    Mpyu,
    Mpyh,
    Ceq,
    Cgt,
    Clgt,
    Shl,
    Rot,
    Rotm,
    Rotma,
    Rotqby,
    Rotqmby,
    Rotqmbi,
    Fa,
    Fs,
    Fm,
    Fceq,
    Fcgt,
    Frest,
    Fi,
    Dfa,
    Dfs,
    Dfm,
    Fesd,
    Frds,
    Xsbh,
    Xshw,
    Lqx,
    Stqx,
    Bi,
    Bisl,
    Rdch,
    Wrch,
    Rchcnt,
    Nop,
    Lnop,
    Stop,
    Selb,
    Shufb,
    Fma,
    Fnms,
    Fms,
    Shli,
    Rotmi,
    Rotmai,
    Rotqbyi,
    Cbd,
    Chd,
    Cwd,
    Cdd,
    Cflts,
    Cfltu,
    Csflt,
    Cuflt,
    Ai,
    Sfi,
    Andi,
    Ori,
    Xori,
    Mpyi,
    Ceqi,
    Cgti,
    Clgti,
    Lqd,
    Stqd,
    Il,
    Ilh,
    Ilhu,
    Iohl,
    Fsmbi,
    Br,
    Bra,
    Brsl,
    Brasl,
    Brnz,
    Brz,
    Brhnz,
    Brhz,
    Lqa,
    Lqr,
    Stqa,
    Stqr,
    Ila,
    /// Return from the routine; layout turns it into a branch to the epilogue.
    Ret,
}

impl SpuOpCode {
    fn info(self) -> (&'static str, Format, u32) {
        match self {
            SpuOpCode::A => ("a", Format::Rr, 0x0c0),
            SpuOpCode::Ah => ("ah", Format::Rr, 0x0c8),
            SpuOpCode::Sf => ("sf", Format::Rr, 0x040),
            SpuOpCode::And => ("and", Format::Rr, 0x0c1),
            SpuOpCode::Andc => ("andc", Format::Rr, 0x2c1),
            SpuOpCode::Or => ("or", Format::Rr, 0x041),
            SpuOpCode::Xor => ("xor", Format::Rr, 0x241),
            SpuOpCode::Nor => ("nor", Format::Rr, 0x049),
            SpuOpCode::Mpy => ("mpy", Format::Rr, 0x3c4),
            SpuOpCode::Mpyu => ("mpyu", Format::Rr, 0x3cc),
            SpuOpCode::Mpyh => ("mpyh", Format::Rr, 0x3c5),
            SpuOpCode::Ceq => ("ceq", Format::Rr, 0x3c0),
            SpuOpCode::Cgt => ("cgt", Format::Rr, 0x240),
            SpuOpCode::Clgt => ("clgt", Format::Rr, 0x2c0),
            SpuOpCode::Shl => ("shl", Format::Rr, 0x05b),
            SpuOpCode::Rot => ("rot", Format::Rr, 0x058),
            SpuOpCode::Rotm => ("rotm", Format::Rr, 0x059),
            SpuOpCode::Rotma => ("rotma", Format::Rr, 0x05a),
            SpuOpCode::Rotqby => ("rotqby", Format::Rr, 0x1dc),
            SpuOpCode::Rotqmby => ("rotqmby", Format::Rr, 0x1dd),
            SpuOpCode::Rotqmbi => ("rotqmbi", Format::Rr, 0x1d9),
            SpuOpCode::Fa => ("fa", Format::Rr, 0x2c4),
            SpuOpCode::Fs => ("fs", Format::Rr, 0x2c5),
            SpuOpCode::Fm => ("fm", Format::Rr, 0x2c6),
            SpuOpCode::Fceq => ("fceq", Format::Rr, 0x3c2),
            SpuOpCode::Fcgt => ("fcgt", Format::Rr, 0x2c2),
            SpuOpCode::Frest => ("frest", Format::Rr, 0x1b8),
            SpuOpCode::Fi => ("fi", Format::Rr, 0x3d4),
            SpuOpCode::Dfa => ("dfa", Format::Rr, 0x2cc),
            SpuOpCode::Dfs => ("dfs", Format::Rr, 0x2cd),
            SpuOpCode::Dfm => ("dfm", Format::Rr, 0x2ce),
            SpuOpCode::Fesd => ("fesd", Format::Rr, 0x3b8),
            SpuOpCode::Frds => ("frds", Format::Rr, 0x3b9),
            SpuOpCode::Xsbh => ("xsbh", Format::Rr, 0x2b6),
            SpuOpCode::Xshw => ("xshw", Format::Rr, 0x2ae),
            SpuOpCode::Lqx => ("lqx", Format::Rr, 0x1c4),
            SpuOpCode::Stqx => ("stqx", Format::Rr, 0x144),
            SpuOpCode::Bi => ("bi", Format::Rr, 0x1a8),
            SpuOpCode::Bisl => ("bisl", Format::Rr, 0x1a9),
            SpuOpCode::Rdch => ("rdch", Format::Rr, 0x00d),
            SpuOpCode::Wrch => ("wrch", Format::Rr, 0x10d),
            SpuOpCode::Rchcnt => ("rchcnt", Format::Rr, 0x00f),
            SpuOpCode::Nop => ("nop", Format::Rr, 0x201),
            SpuOpCode::Lnop => ("lnop", Format::Rr, 0x001),
            SpuOpCode::Stop => ("stop", Format::Stop, 0x000),
            SpuOpCode::Selb => ("selb", Format::Rrr, 0x8),
            SpuOpCode::Shufb => ("shufb", Format::Rrr, 0xb),
            SpuOpCode::Fma => ("fma", Format::Rrr, 0xe),
            SpuOpCode::Fnms => ("fnms", Format::Rrr, 0xd),
            SpuOpCode::Fms => ("fms", Format::Rrr, 0xf),
            SpuOpCode::Shli => ("shli", Format::Ri7, 0x07b),
            SpuOpCode::Rotmi => ("rotmi", Format::Ri7, 0x079),
            SpuOpCode::Rotmai => ("rotmai", Format::Ri7, 0x07a),
            SpuOpCode::Rotqbyi => ("rotqbyi", Format::Ri7, 0x1fc),
            SpuOpCode::Cbd => ("cbd", Format::Ri7, 0x1f4),
            SpuOpCode::Chd => ("chd", Format::Ri7, 0x1f5),
            SpuOpCode::Cwd => ("cwd", Format::Ri7, 0x1f6),
            SpuOpCode::Cdd => ("cdd", Format::Ri7, 0x1f7),
            SpuOpCode::Cflts => ("cflts", Format::Ri8, 0x1d8),
            SpuOpCode::Cfltu => ("cfltu", Format::Ri8, 0x1d9),
            SpuOpCode::Csflt => ("csflt", Format::Ri8, 0x1da),
            SpuOpCode::Cuflt => ("cuflt", Format::Ri8, 0x1db),
            SpuOpCode::Ai => ("ai", Format::Ri10, 0x1c),
            SpuOpCode::Sfi => ("sfi", Format::Ri10, 0x0c),
            SpuOpCode::Andi => ("andi", Format::Ri10, 0x14),
            SpuOpCode::Ori => ("ori", Format::Ri10, 0x04),
            SpuOpCode::Xori => ("xori", Format::Ri10, 0x44),
            SpuOpCode::Mpyi => ("mpyi", Format::Ri10, 0x74),
            SpuOpCode::Ceqi => ("ceqi", Format::Ri10, 0x7c),
            SpuOpCode::Cgti => ("cgti", Format::Ri10, 0x4c),
            SpuOpCode::Clgti => ("clgti", Format::Ri10, 0x5c),
            SpuOpCode::Lqd => ("lqd", Format::Ri10, 0x34),
            SpuOpCode::Stqd => ("stqd", Format::Ri10, 0x24),
            SpuOpCode::Il => ("il", Format::Ri16, 0x081),
            SpuOpCode::Ilh => ("ilh", Format::Ri16, 0x083),
            SpuOpCode::Ilhu => ("ilhu", Format::Ri16, 0x082),
            SpuOpCode::Iohl => ("iohl", Format::Ri16, 0x0c1),
            SpuOpCode::Fsmbi => ("fsmbi", Format::Ri16, 0x065),
            SpuOpCode::Br => ("br", Format::Ri16, 0x064),
            SpuOpCode::Bra => ("bra", Format::Ri16, 0x060),
            SpuOpCode::Brsl => ("brsl", Format::Ri16, 0x066),
            SpuOpCode::Brasl => ("brasl", Format::Ri16, 0x062),
            SpuOpCode::Brnz => ("brnz", Format::Ri16, 0x042),
            SpuOpCode::Brz => ("brz", Format::Ri16, 0x040),
            SpuOpCode::Brhnz => ("brhnz", Format::Ri16, 0x046),
            SpuOpCode::Brhz => ("brhz", Format::Ri16, 0x044),
            SpuOpCode::Lqa => ("lqa", Format::Ri16, 0x061),
            SpuOpCode::Lqr => ("lqr", Format::Ri16, 0x067),
            SpuOpCode::Stqa => ("stqa", Format::Ri16, 0x041),
            SpuOpCode::Stqr => ("stqr", Format::Ri16, 0x047),
            SpuOpCode::Ila => ("ila", Format::Ri18, 0x21),
            SpuOpCode::Ret => ("ret", Format::Pseudo, 0),
        }
    }

    pub fn mnemonic(self) -> &'static str {
        self.info().0
    }

    pub fn format(self) -> Format {
        self.info().1
    }

    pub fn opcode_bits(self) -> u32 {
        self.info().2
    }

    pub fn patch_kind(self) -> Option<PatchKind> {
        match self {
            SpuOpCode::Br
            | SpuOpCode::Brsl
            | SpuOpCode::Brnz
            | SpuOpCode::Brz
            | SpuOpCode::Brhnz
            | SpuOpCode::Brhz
            | SpuOpCode::Lqr
            | SpuOpCode::Stqr => Some(PatchKind::RelativeWord),
            SpuOpCode::Ila => Some(PatchKind::AbsoluteByte),
            _ => None,
        }
    }

    pub fn is_branch(self) -> bool {
        matches!(
            self,
            SpuOpCode::Br
                | SpuOpCode::Bra
                | SpuOpCode::Brsl
                | SpuOpCode::Brasl
                | SpuOpCode::Brnz
                | SpuOpCode::Brz
                | SpuOpCode::Brhnz
                | SpuOpCode::Brhz
                | SpuOpCode::Bi
                | SpuOpCode::Bisl
                | SpuOpCode::Ret
        )
    }

    /// Immediate range accepted by the encoder, inclusive.
    pub fn immediate_range(self) -> Option<(i64, i64)> {
        match self.format() {
            Format::Ri7 => Some((-64, 63)),
            Format::Ri8 => Some((0, 255)),
            Format::Ri10 => Some((-512, 511)),
            Format::Ri16 => match self {
                SpuOpCode::Ilhu | SpuOpCode::Iohl | SpuOpCode::Fsmbi | SpuOpCode::Ilh => {
                    Some((0, 0xFFFF))
                }
                _ => Some((-0x8000, 0x7FFF)),
            },
            Format::Ri18 => Some((0, 0x3FFFF)),
            Format::Stop => Some((0, 0x3FFF)),
            Format::Rr | Format::Rrr | Format::Pseudo => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    ImmediateOutOfRange {
        mnemonic: &'static str,
        value: i64,
    },
    RegisterOutOfRange {
        mnemonic: &'static str,
        register: u32,
    },
    UnmappedRegister {
        mnemonic: &'static str,
        register: u32,
    },
    Pseudo(&'static str),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeError::ImmediateOutOfRange { mnemonic, value } => {
                write!(f, "{mnemonic} immediate {value} out of range")
            }
            EncodeError::RegisterOutOfRange { mnemonic, register } => {
                write!(f, "{mnemonic} register ${register} out of range")
            }
            EncodeError::UnmappedRegister { mnemonic, register } => {
                write!(f, "{mnemonic} uses virtual register %{register} with no hardware register")
            }
            EncodeError::Pseudo(mnemonic) => write!(f, "{mnemonic} has no encoding"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Hardware register numbers for one instruction; unused fields are 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Fields {
    pub rt: u8,
    pub ra: u8,
    pub rb: u8,
    pub rc: u8,
    pub immediate: i32,
}

pub fn encode(opcode: SpuOpCode, fields: Fields) -> Result<u32, EncodeError> {
    let mnemonic = opcode.mnemonic();
    for register in [fields.rt, fields.ra, fields.rb, fields.rc] {
        if register > 127 {
            return Err(EncodeError::RegisterOutOfRange {
                mnemonic,
                register: u32::from(register),
            });
        }
    }
    if let Some((low, high)) = opcode.immediate_range() {
        let value = i64::from(fields.immediate);
        if value < low || value > high {
            return Err(EncodeError::ImmediateOutOfRange { mnemonic, value });
        }
    }

    let bits = opcode.opcode_bits();
    let rt = u32::from(fields.rt);
    let ra = u32::from(fields.ra);
    let rb = u32::from(fields.rb);
    let rc = u32::from(fields.rc);
    let imm = fields.immediate as u32;
    let word = match opcode.format() {
        Format::Rr => (bits << 21) | (rb << 14) | (ra << 7) | rt,
        Format::Rrr => (bits << 28) | (rt << 21) | (rb << 14) | (ra << 7) | rc,
        Format::Ri7 => (bits << 21) | ((imm & 0x7F) << 14) | (ra << 7) | rt,
        Format::Ri8 => (bits << 22) | ((imm & 0xFF) << 14) | (ra << 7) | rt,
        Format::Ri10 => (bits << 24) | ((imm & 0x3FF) << 14) | (ra << 7) | rt,
        Format::Ri16 => (bits << 23) | ((imm & 0xFFFF) << 7) | rt,
        Format::Ri18 => (bits << 25) | ((imm & 0x3FFFF) << 7) | rt,
        Format::Stop => (bits << 21) | (imm & 0x3FFF),
        Format::Pseudo => return Err(EncodeError::Pseudo(mnemonic)),
    };
    Ok(word)
}

/// Sign-extended 16-bit immediate of an encoded RI16 word.
pub fn decode_i16_field(word: u32) -> i32 {
    i32::from(((word >> 7) & 0xFFFF) as u16 as i16)
}

pub fn decode_i18_field(word: u32) -> u32 {
    (word >> 7) & 0x3FFFF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_known_words() {
        let a = encode(
            SpuOpCode::A,
            Fields {
                rt: 3,
                ra: 4,
                rb: 5,
                ..Fields::default()
            },
        )
        .expect("encode should succeed");
        assert_eq!(a, 0x1800_0000 | (5 << 14) | (4 << 7) | 3);

        let bi = encode(
            SpuOpCode::Bi,
            Fields {
                ra: 0,
                ..Fields::default()
            },
        )
        .expect("encode should succeed");
        assert_eq!(bi, 0x3500_0000);

        let il = encode(
            SpuOpCode::Il,
            Fields {
                rt: 3,
                immediate: -1,
                ..Fields::default()
            },
        )
        .expect("encode should succeed");
        assert_eq!(decode_i16_field(il), -1);
    }

    #[test]
    fn rejects_immediates_outside_the_field() {
        let err = encode(
            SpuOpCode::Ai,
            Fields {
                immediate: 600,
                ..Fields::default()
            },
        )
        .expect_err("encode should fail");
        assert_eq!(
            err,
            EncodeError::ImmediateOutOfRange {
                mnemonic: "ai",
                value: 600
            }
        );
        assert!(encode(SpuOpCode::Ret, Fields::default()).is_err());
    }
}
