use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use super::opcode::{IlOpCode, OperandKind, registry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblerError {
    UnknownOpcode(String),
    DuplicateLabel(String),
    UnknownLabel(String),
    OperandMismatch {
        name: &'static str,
        expected: OperandKind,
    },
    OperandOutOfRange {
        name: &'static str,
        value: i64,
    },
}

impl std::fmt::Display for AssemblerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssemblerError::UnknownOpcode(name) => write!(f, "unknown opcode '{name}'"),
            AssemblerError::DuplicateLabel(name) => write!(f, "duplicate label '{name}'"),
            AssemblerError::UnknownLabel(name) => write!(f, "unknown label '{name}'"),
            AssemblerError::OperandMismatch { name, expected } => {
                write!(f, "{name} expects a {expected:?} operand")
            }
            AssemblerError::OperandOutOfRange { name, value } => {
                write!(f, "operand {value} does not fit {name}")
            }
        }
    }
}

impl std::error::Error for AssemblerError {}

#[derive(Clone, Debug, PartialEq)]
pub enum IlArg {
    None,
    Int(i64),
    Float(f64),
    Token(u32),
    Label(String),
    /// Raw relative displacement, measured from the end of the branch.
    Displacement(i32),
}

struct Fixup {
    at: usize,
    end: usize,
    short: bool,
    label: String,
    name: &'static str,
}

/// Little-endian IL encoder with label fixups.
#[derive(Default)]
pub struct IlBuilder {
    code: Vec<u8>,
    labels: HashMap<String, u32>,
    fixups: Vec<Fixup>,
}

impl IlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn label(&mut self, name: &str) -> Result<(), AssemblerError> {
        if self.labels.contains_key(name) {
            return Err(AssemblerError::DuplicateLabel(name.to_string()));
        }
        self.labels.insert(name.to_string(), self.position());
        Ok(())
    }

    pub fn op(&mut self, name: &str) -> Result<&mut Self, AssemblerError> {
        self.emit(name, IlArg::None)
    }

    pub fn op_i(&mut self, name: &str, value: i64) -> Result<&mut Self, AssemblerError> {
        self.emit(name, IlArg::Int(value))
    }

    pub fn op_token(&mut self, name: &str, token: u32) -> Result<&mut Self, AssemblerError> {
        self.emit(name, IlArg::Token(token))
    }

    pub fn branch(&mut self, name: &str, label: &str) -> Result<&mut Self, AssemblerError> {
        self.emit(name, IlArg::Label(label.to_string()))
    }

    pub fn emit(&mut self, name: &str, arg: IlArg) -> Result<&mut Self, AssemblerError> {
        let opcode = registry()
            .by_name(name)
            .ok_or_else(|| AssemblerError::UnknownOpcode(name.to_string()))?;
        self.emit_opcode(opcode);
        self.emit_operand(opcode, arg)?;
        Ok(self)
    }

    pub fn finish(mut self) -> Result<Vec<u8>, AssemblerError> {
        for fixup in self.fixups.drain(..) {
            let target = self
                .labels
                .get(&fixup.label)
                .copied()
                .ok_or_else(|| AssemblerError::UnknownLabel(fixup.label.clone()))?;
            let displacement = i64::from(target) - fixup.end as i64;
            if fixup.short {
                let value = i8::try_from(displacement).map_err(|_| {
                    AssemblerError::OperandOutOfRange {
                        name: fixup.name,
                        value: displacement,
                    }
                })?;
                self.code[fixup.at] = value as u8;
            } else {
                let value = displacement as i32;
                self.code[fixup.at..fixup.at + 4].copy_from_slice(&value.to_le_bytes());
            }
        }
        Ok(self.code)
    }

    fn emit_opcode(&mut self, opcode: &IlOpCode) {
        let [lead, low] = opcode.value.to_be_bytes();
        if opcode.is_extended() {
            self.code.push(lead);
        }
        self.code.push(low);
    }

    fn emit_operand(&mut self, opcode: &'static IlOpCode, arg: IlArg) -> Result<(), AssemblerError> {
        let mismatch = AssemblerError::OperandMismatch {
            name: opcode.name,
            expected: opcode.operand,
        };
        let out_of_range = |value: i64| AssemblerError::OperandOutOfRange {
            name: opcode.name,
            value,
        };
        match (opcode.operand, arg) {
            (OperandKind::None, IlArg::None) => {}
            (OperandKind::ShortVar, IlArg::Int(value)) => {
                let byte = u8::try_from(value).map_err(|_| out_of_range(value))?;
                self.code.push(byte);
            }
            (OperandKind::Var, IlArg::Int(value)) => {
                let index = u16::try_from(value).map_err(|_| out_of_range(value))?;
                self.code.extend_from_slice(&index.to_le_bytes());
            }
            (OperandKind::ShortI, IlArg::Int(value)) => {
                let byte = i8::try_from(value).map_err(|_| out_of_range(value))?;
                self.code.push(byte as u8);
            }
            (OperandKind::I, IlArg::Int(value)) => {
                let word = i32::try_from(value).map_err(|_| out_of_range(value))?;
                self.code.extend_from_slice(&word.to_le_bytes());
            }
            (OperandKind::I8, IlArg::Int(value)) => {
                self.code.extend_from_slice(&value.to_le_bytes());
            }
            (OperandKind::R4, IlArg::Float(value)) => {
                self.code.extend_from_slice(&(value as f32).to_le_bytes());
            }
            (OperandKind::R, IlArg::Float(value)) => {
                self.code.extend_from_slice(&value.to_le_bytes());
            }
            (OperandKind::ShortBrTarget, IlArg::Displacement(value)) => {
                let byte = i8::try_from(value).map_err(|_| out_of_range(i64::from(value)))?;
                self.code.push(byte as u8);
            }
            (OperandKind::BrTarget, IlArg::Displacement(value)) => {
                self.code.extend_from_slice(&value.to_le_bytes());
            }
            (kind @ (OperandKind::ShortBrTarget | OperandKind::BrTarget), IlArg::Label(label)) => {
                let short = kind == OperandKind::ShortBrTarget;
                let at = self.code.len();
                let width = if short { 1 } else { 4 };
                self.code.resize(at + width, 0);
                self.fixups.push(Fixup {
                    at,
                    end: at + width,
                    short,
                    label,
                    name: opcode.name,
                });
            }
            (
                OperandKind::Field | OperandKind::Method | OperandKind::Type | OperandKind::String,
                IlArg::Token(token),
            ) => {
                self.code.extend_from_slice(&token.to_le_bytes());
            }
            _ => return Err(mismatch),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmParseError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for AsmParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for AsmParseError {}

fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<op>\.?[A-Za-z_][A-Za-z0-9_.]*)(?:\s+(?P<arg>\S+))?$")
            .expect("assembler line pattern should compile")
    })
}

/// Assembles one instruction per line, e.g. `ldc.i4.s 5`, `ble.s +3`,
/// `br.s done`, `.label done`, `call 0x06000001`. `#` and `//` start comments.
pub fn assemble(source: &str) -> Result<Vec<u8>, AsmParseError> {
    let mut builder = IlBuilder::new();
    for (line_idx, raw_line) in source.lines().enumerate() {
        let line_no = line_idx + 1;
        let line = strip_comments(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let captures = line_pattern().captures(line).ok_or_else(|| AsmParseError {
            line: line_no,
            message: format!("cannot parse '{line}'"),
        })?;
        let op = &captures["op"];
        let arg = captures.name("arg").map(|m| m.as_str());

        if op == ".label" {
            let name = arg.ok_or_else(|| AsmParseError {
                line: line_no,
                message: "missing label name".to_string(),
            })?;
            builder.label(name).map_err(|err| AsmParseError {
                line: line_no,
                message: err.to_string(),
            })?;
            continue;
        }

        let opcode = registry().by_name(op).ok_or_else(|| AsmParseError {
            line: line_no,
            message: format!("unknown opcode '{op}'"),
        })?;
        let arg = match arg {
            None => IlArg::None,
            Some(token) => parse_arg(opcode, token, line_no)?,
        };
        builder.emit(op, arg).map_err(|err| AsmParseError {
            line: line_no,
            message: err.to_string(),
        })?;
    }
    builder.finish().map_err(|err| AsmParseError {
        line: 0,
        message: err.to_string(),
    })
}

fn parse_arg(opcode: &IlOpCode, token: &str, line_no: usize) -> Result<IlArg, AsmParseError> {
    let invalid = || AsmParseError {
        line: line_no,
        message: format!("invalid operand '{token}' for {}", opcode.name),
    };
    match opcode.operand {
        OperandKind::ShortBrTarget | OperandKind::BrTarget => {
            if token.starts_with(['+', '-']) {
                let value = token.parse::<i32>().map_err(|_| invalid())?;
                Ok(IlArg::Displacement(value))
            } else {
                Ok(IlArg::Label(token.to_string()))
            }
        }
        OperandKind::R4 | OperandKind::R => token
            .parse::<f64>()
            .map(IlArg::Float)
            .map_err(|_| invalid()),
        OperandKind::Field | OperandKind::Method | OperandKind::Type | OperandKind::String => {
            parse_int(token).map(|v| IlArg::Token(v as u32)).ok_or_else(invalid)
        }
        _ => parse_int(token).map(IlArg::Int).ok_or_else(invalid),
    }
}

fn parse_int(token: &str) -> Option<i64> {
    let (negative, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let value = match digits.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -value } else { value })
}

fn strip_comments(line: &str) -> &str {
    let hash_idx = line.find('#');
    let slash_idx = line.find("//");
    match (hash_idx, slash_idx) {
        (Some(h), Some(s)) => &line[..h.min(s)],
        (Some(h), None) => &line[..h],
        (None, Some(s)) => &line[..s],
        (None, None) => line,
    }
}
