use tracing::{debug, trace};

use super::instr::{Register, SpuInstruction, Target, VirtualRegister};
use super::opcode::SpuOpCode;
use crate::config::CompileOptions;
use crate::ir::{
    BlockId, Escapes, IrCode, MethodIr, Operand, PopBehaviour, StackType, Storage, TreeNode,
    Variable,
};
use crate::layout::{ObjectArena, ObjectId};
use crate::logging::{category_select, routine_label};
use crate::metadata::{FieldDef, Intrinsic, TypeRef};

/// Signal used for `break`.
const BREAK_SIGNAL: i32 = 0x3FFF;
/// Elements start one quadword after the array header.
const ARRAY_HEADER_SIZE: i32 = 16;
/// Scale immediates that make the float/int conversions unscaled.
const CFLTS_UNSCALED: i32 = 173;
const CSFLT_UNSCALED: i32 = 155;
/// Upper halfword of 65536.0 in single precision.
const WORD_HALF_SCALE: i32 = 0x4780;
/// Biased exponent at which a double's mantissa is an integer.
const DOUBLE_UNIT_EXPONENT: i32 = 1075;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionError {
    pub offset: u32,
    pub code: IrCode,
    pub stack_type: StackType,
    pub reason: String,
}

impl std::fmt::Display for SelectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) at IL_{:04x}: {}",
            self.code.mnemonic(),
            self.stack_type,
            self.offset,
            self.reason
        )
    }
}

impl std::error::Error for SelectionError {}

/// Every unsupported construct found in one selection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionErrors {
    pub routine: String,
    pub errors: Vec<SelectionError>,
}

impl std::fmt::Display for SelectionErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} unsupported construct(s) in {}",
            self.errors.len(),
            self.routine
        )?;
        for err in &self.errors {
            write!(f, "\n  {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SelectionErrors {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedBlock {
    pub object: ObjectId,
    /// IR block this stream was lowered from; `None` for prologue/epilogue.
    pub source: Option<BlockId>,
    pub instructions: Vec<SpuInstruction>,
}

/// Per-block instruction streams of one routine, on virtual registers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedRoutine {
    pub name: String,
    pub routine: ObjectId,
    pub frame_size: u32,
    pub register_count: u32,
    pub prologue: SelectedBlock,
    pub blocks: Vec<SelectedBlock>,
    pub epilogue: SelectedBlock,
}

impl SelectedRoutine {
    pub fn all_blocks(&self) -> impl Iterator<Item = &SelectedBlock> {
        std::iter::once(&self.prologue)
            .chain(self.blocks.iter())
            .chain(std::iter::once(&self.epilogue))
    }

    pub fn instruction_count(&self) -> usize {
        self.all_blocks().map(|block| block.instructions.len()).sum()
    }

    pub fn instructions(&self) -> impl Iterator<Item = &SpuInstruction> {
        self.all_blocks().flat_map(|block| block.instructions.iter())
    }

    /// Moves the streams into their arena objects for layout.
    pub fn install(&self, arena: &mut ObjectArena) {
        for block in self.all_blocks() {
            arena.set_code(block.object, block.instructions.clone());
        }
        arena.set_epilogue(self.routine, self.epilogue.object);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ValueKind {
    Word,
    Long,
    Single,
    Double,
    Struct,
    Void,
}

fn value_kind(ty: &StackType) -> ValueKind {
    match ty {
        StackType::Int32
        | StackType::NativeInt
        | StackType::ObjectRef(_)
        | StackType::ManagedPointer(_) => ValueKind::Word,
        StackType::Int64 => ValueKind::Long,
        StackType::Float32 => ValueKind::Single,
        StackType::Float64 => ValueKind::Double,
        StackType::ValueType(_) => ValueKind::Struct,
        StackType::None => ValueKind::Void,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Comparison {
    Eq,
    Gt,
}

/// How a compare or compare-and-branch opcode maps onto an equality or
/// greater-than mask.
#[derive(Clone, Copy, Debug)]
struct CompareShape {
    comparison: Comparison,
    signed: bool,
    swap: bool,
    when_set: bool,
}

fn compare_shape(code: IrCode) -> Option<CompareShape> {
    let shape = |comparison, signed, swap, when_set| CompareShape {
        comparison,
        signed,
        swap,
        when_set,
    };
    Some(match code {
        IrCode::Ceq | IrCode::Beq => shape(Comparison::Eq, true, false, true),
        IrCode::BneUn => shape(Comparison::Eq, true, false, false),
        IrCode::Cgt | IrCode::Bgt => shape(Comparison::Gt, true, false, true),
        IrCode::CgtUn | IrCode::BgtUn => shape(Comparison::Gt, false, false, true),
        IrCode::Clt | IrCode::Blt => shape(Comparison::Gt, true, true, true),
        IrCode::CltUn | IrCode::BltUn => shape(Comparison::Gt, false, true, true),
        IrCode::Bge => shape(Comparison::Gt, true, true, false),
        IrCode::BgeUn => shape(Comparison::Gt, false, true, false),
        IrCode::Ble => shape(Comparison::Gt, true, false, false),
        IrCode::BleUn => shape(Comparison::Gt, false, false, false),
        _ => return None,
    })
}

/// Type used to size a variable's frame slot and memory accesses.
fn storage_type(var: &Variable) -> Option<TypeRef> {
    if let Some(ty) = &var.declared {
        return Some(ty.clone());
    }
    Some(match var.stack_type.as_ref()? {
        StackType::Int32 => TypeRef::I4,
        StackType::Int64 => TypeRef::I8,
        StackType::NativeInt => TypeRef::I,
        StackType::Float32 => TypeRef::R4,
        StackType::Float64 => TypeRef::R8,
        StackType::ObjectRef(ty) | StackType::ValueType(ty) => ty.clone(),
        StackType::ManagedPointer(ty) => TypeRef::by_ref(ty.clone()),
        StackType::None => return None,
    })
}

fn indirect_type(code: IrCode) -> Option<TypeRef> {
    Some(match code {
        IrCode::LdindI1 | IrCode::StindI1 => TypeRef::I1,
        IrCode::LdindU1 => TypeRef::U1,
        IrCode::LdindI2 | IrCode::StindI2 => TypeRef::I2,
        IrCode::LdindU2 => TypeRef::U2,
        IrCode::LdindI4 | IrCode::StindI4 => TypeRef::I4,
        IrCode::LdindU4 => TypeRef::U4,
        IrCode::LdindI8 | IrCode::StindI8 => TypeRef::I8,
        IrCode::LdindI | IrCode::StindI => TypeRef::I,
        IrCode::LdindR4 | IrCode::StindR4 => TypeRef::R4,
        IrCode::LdindR8 | IrCode::StindR8 => TypeRef::R8,
        IrCode::LdindRef | IrCode::StindRef => TypeRef::Object,
        _ => return None,
    })
}

pub struct InstructionSelector<'a> {
    arena: &'a mut ObjectArena,
    options: &'a CompileOptions,
    name: String,
    next_register: u32,
    current: Vec<SpuInstruction>,
    errors: Vec<SelectionError>,
    constants: u32,
}

impl<'a> InstructionSelector<'a> {
    pub fn new(arena: &'a mut ObjectArena, options: &'a CompileOptions) -> Self {
        Self {
            arena,
            options,
            name: String::new(),
            next_register: 0,
            current: Vec::new(),
            errors: Vec::new(),
            constants: 0,
        }
    }

    /// Lowers every block of `ir` into the routine object `routine`. Fills in
    /// variable storage. Unsupported constructs are gathered and reported
    /// together.
    pub fn select(
        mut self,
        ir: &mut MethodIr,
        routine: ObjectId,
    ) -> Result<SelectedRoutine, SelectionErrors> {
        self.name = ir.name();
        let mark = self.arena.len();
        let frame_size = self.assign_storage(ir);

        let objects = match self.allocate_blocks(ir, routine) {
            Ok(objects) => objects,
            Err(reason) => {
                self.arena.truncate(mark);
                return Err(SelectionErrors {
                    routine: self.name.clone(),
                    errors: vec![SelectionError {
                        offset: 0,
                        code: IrCode::Nop,
                        stack_type: StackType::None,
                        reason,
                    }],
                });
            }
        };
        let ir: &MethodIr = ir;

        self.emit_prologue(ir, frame_size);
        let prologue = self.take_block(objects.prologue, None);

        let mut blocks = Vec::with_capacity(ir.blocks.len());
        for (block, object) in ir.blocks.iter().zip(&objects.body) {
            for root in &block.roots {
                trace!(
                    "{} IL_{:04x} {}",
                    category_select(),
                    root.offset,
                    root.code.mnemonic()
                );
                self.lower(ir, root);
            }
            blocks.push(self.take_block(*object, Some(block.id)));
        }

        self.emit_epilogue(frame_size);
        let epilogue = self.take_block(objects.epilogue, None);

        for block in &mut blocks {
            for instruction in &mut block.instructions {
                if let Some(Target::Block(target)) = instruction.target {
                    instruction.target = Some(Target::Object(objects.body[target.0]));
                }
            }
        }

        if !self.errors.is_empty() {
            self.arena.truncate(mark);
            return Err(SelectionErrors {
                routine: self.name,
                errors: self.errors,
            });
        }

        let selected = SelectedRoutine {
            name: self.name,
            routine,
            frame_size,
            register_count: self.next_register,
            prologue,
            blocks,
            epilogue,
        };
        debug!(
            "{} {} frame={} registers={} instructions={}",
            category_select(),
            routine_label(&selected.name),
            selected.frame_size,
            selected.register_count,
            selected.instruction_count()
        );
        Ok(selected)
    }

    fn assign_storage(&mut self, ir: &mut MethodIr) -> u32 {
        let mut frame = self.options.link_area_size;
        let ids: Vec<_> = ir.variables.iter().map(|var| var.id).collect();
        for id in ids {
            let var = ir.variables.get(id);
            let ty = storage_type(var);
            let in_memory = var.escapes == Escapes::Yes
                || ty.as_ref().is_some_and(|ty| ty.is_value_type());
            let storage = if in_memory {
                let size = ty.as_ref().map_or(16, |ty| ty.size()).max(16);
                let slot = frame;
                frame += size.next_multiple_of(16);
                Storage::Frame(slot)
            } else {
                let register = self.next_register;
                self.next_register += 1;
                Storage::Register(register)
            };
            ir.variables.get_mut(id).storage = storage;
        }
        frame.next_multiple_of(16)
    }

    fn allocate_blocks(&mut self, ir: &MethodIr, routine: ObjectId) -> Result<BlockObjects, String> {
        let name = self.name.clone();
        let add = |arena: &mut ObjectArena, label: String| {
            arena
                .add_block(routine, &format!("{name}#{label}"))
                .map_err(|err| err.to_string())
        };
        let prologue = add(&mut *self.arena, "prologue".to_string())?;
        let body = ir
            .blocks
            .iter()
            .map(|block| add(&mut *self.arena, format!("IL_{:04x}", block.offset)))
            .collect::<Result<Vec<_>, _>>()?;
        let epilogue = add(&mut *self.arena, "epilogue".to_string())?;
        Ok(BlockObjects {
            prologue,
            body,
            epilogue,
        })
    }

    fn take_block(&mut self, object: ObjectId, source: Option<BlockId>) -> SelectedBlock {
        SelectedBlock {
            object,
            source,
            instructions: std::mem::take(&mut self.current),
        }
    }

    fn emit_prologue(&mut self, ir: &MethodIr, frame_size: u32) {
        let frame = frame_size as i32;
        self.emit(SpuInstruction::ri(SpuOpCode::Stqd, Register::LR, Register::SP, 1));
        if frame / 16 > 512 {
            self.fail(0, IrCode::Nop, StackType::None, "frame too large for a back chain store");
        }
        self.emit(SpuInstruction::ri(
            SpuOpCode::Stqd,
            Register::SP,
            Register::SP,
            -(frame / 16),
        ));
        self.adjust_stack(-frame);

        for (slot, id) in ir.arguments.iter().enumerate() {
            let var = ir.variables.get(*id);
            let Some(hardware) = self.options.argument_register(slot) else {
                self.fail(
                    0,
                    IrCode::Ldarg,
                    var.stack_type.clone().unwrap_or(StackType::None),
                    &format!("argument slot {slot} has no register"),
                );
                continue;
            };
            let incoming = Register::Hardware(hardware);
            match var.storage {
                Storage::Register(register) => self.move_to(virtual_reg(register), incoming),
                Storage::Frame(offset) => {
                    let Some(ty) = storage_type(var) else {
                        continue;
                    };
                    self.store_memory(Register::SP, offset as i32, incoming, &ty);
                }
                Storage::Unassigned => {}
            }
        }
    }

    fn emit_epilogue(&mut self, frame_size: u32) {
        self.adjust_stack(frame_size as i32);
        self.emit(SpuInstruction::ri(SpuOpCode::Lqd, Register::LR, Register::SP, 1));
        self.emit(SpuInstruction {
            ra: Some(Register::LR),
            ..SpuInstruction::new(SpuOpCode::Bi)
        });
    }

    fn adjust_stack(&mut self, delta: i32) {
        if (-512..=511).contains(&delta) {
            self.emit(SpuInstruction::ri(SpuOpCode::Ai, Register::SP, Register::SP, delta));
        } else {
            let amount = self.load_immediate(delta);
            self.emit(SpuInstruction::rr(SpuOpCode::A, Register::SP, Register::SP, amount));
        }
    }

    fn emit(&mut self, instruction: SpuInstruction) {
        self.current.push(instruction);
    }

    fn reg(&mut self) -> Register {
        let register = virtual_reg(self.next_register);
        self.next_register += 1;
        register
    }

    fn rr(&mut self, opcode: SpuOpCode, ra: Register, rb: Register) -> Register {
        let rt = self.reg();
        self.emit(SpuInstruction::rr(opcode, rt, ra, rb));
        rt
    }

    fn rrr(&mut self, opcode: SpuOpCode, ra: Register, rb: Register, rc: Register) -> Register {
        let rt = self.reg();
        self.emit(SpuInstruction::rrr(opcode, rt, ra, rb, rc));
        rt
    }

    fn ri(&mut self, opcode: SpuOpCode, ra: Register, constant: i32) -> Register {
        let rt = self.reg();
        self.emit(SpuInstruction::ri(opcode, rt, ra, constant));
        rt
    }

    fn imm(&mut self, opcode: SpuOpCode, constant: i32) -> Register {
        let rt = self.reg();
        self.emit(SpuInstruction::imm(opcode, rt, constant));
        rt
    }

    fn move_to(&mut self, dst: Register, src: Register) {
        self.emit(SpuInstruction::ri(SpuOpCode::Ori, dst, src, 0));
    }

    fn load_immediate(&mut self, value: i32) -> Register {
        if (-0x8000..=0x7FFF).contains(&value) {
            return self.imm(SpuOpCode::Il, value);
        }
        let bits = value as u32;
        let rt = self.imm(SpuOpCode::Ilhu, (bits >> 16) as i32);
        if bits & 0xFFFF != 0 {
            self.emit(SpuInstruction::imm(SpuOpCode::Iohl, rt, (bits & 0xFFFF) as i32));
        }
        rt
    }

    fn add_immediate(&mut self, base: Register, value: i32) -> Register {
        if value == 0 {
            return base;
        }
        if (-512..=511).contains(&value) {
            return self.ri(SpuOpCode::Ai, base, value);
        }
        let amount = self.load_immediate(value);
        self.rr(SpuOpCode::A, base, amount)
    }

    /// Sign bit of the first word only, for double-precision masks.
    fn double_sign_mask(&mut self) -> Register {
        let sign = self.imm(SpuOpCode::Ilhu, 0x8000);
        let first_word = self.imm(SpuOpCode::Fsmbi, 0xF000);
        self.rr(SpuOpCode::And, sign, first_word)
    }

    fn fail(&mut self, offset: u32, code: IrCode, stack_type: StackType, reason: &str) {
        self.errors.push(SelectionError {
            offset,
            code,
            stack_type,
            reason: reason.to_string(),
        });
    }

    fn unsupported(&mut self, node: &TreeNode, reason: &str) -> Option<Register> {
        self.fail(node.offset, node.code, node.stack_type.clone(), reason);
        None
    }

    fn value(&mut self, ir: &MethodIr, node: &TreeNode) -> Register {
        match self.lower(ir, node) {
            Some(register) => register,
            None => self.reg(),
        }
    }

    fn lower(&mut self, ir: &MethodIr, node: &TreeNode) -> Option<Register> {
        let children: Vec<Register> = node
            .children()
            .into_iter()
            .map(|child| self.value(ir, child))
            .collect();
        if let PopBehaviour::Fixed(expected) = node.code.pops()
            && usize::from(expected) != children.len()
        {
            return self.unsupported(
                node,
                &format!("expected {expected} operands, found {}", children.len()),
            );
        }

        let kind = value_kind(&node.stack_type);
        let operand_kind = node
            .left()
            .map_or(ValueKind::Void, |child| value_kind(&child.stack_type));
        match node.code {
            IrCode::Nop | IrCode::Pop => None,
            IrCode::Break => {
                self.emit(SpuInstruction {
                    constant: BREAK_SIGNAL,
                    ..SpuInstruction::new(SpuOpCode::Stop)
                });
                None
            }
            IrCode::Ldarg | IrCode::Ldloc => self.load_variable(ir, node),
            IrCode::Starg | IrCode::Stloc => {
                self.store_variable(ir, node, children[0]);
                None
            }
            IrCode::Ldarga | IrCode::Ldloca => {
                let var = ir.variables.get(node.variable()?);
                match var.storage {
                    Storage::Frame(offset) => Some(self.add_immediate(Register::SP, offset as i32)),
                    _ => self.unsupported(node, "address of a register variable"),
                }
            }
            IrCode::Ldnull => Some(self.imm(SpuOpCode::Il, 0)),
            IrCode::LdcI4 => match node.operand {
                Operand::Int32(value) => Some(self.load_immediate(value)),
                _ => self.unsupported(node, "missing constant"),
            },
            IrCode::LdcR4 => match node.operand {
                Operand::Float32(value) => Some(self.load_immediate(value.to_bits() as i32)),
                _ => self.unsupported(node, "missing constant"),
            },
            IrCode::LdcI8 => match node.operand {
                Operand::Int64(value) => self.load_doubleword(node, value.to_be_bytes()),
                _ => self.unsupported(node, "missing constant"),
            },
            IrCode::LdcR8 => match node.operand {
                Operand::Float64(value) => self.load_doubleword(node, value.to_be_bytes()),
                _ => self.unsupported(node, "missing constant"),
            },
            IrCode::Add => match kind {
                ValueKind::Word => Some(self.rr(SpuOpCode::A, children[0], children[1])),
                ValueKind::Single => Some(self.rr(SpuOpCode::Fa, children[0], children[1])),
                ValueKind::Double => Some(self.rr(SpuOpCode::Dfa, children[0], children[1])),
                _ => self.unsupported(node, "no add for this type"),
            },
            IrCode::Sub => match kind {
                ValueKind::Word => Some(self.rr(SpuOpCode::Sf, children[1], children[0])),
                ValueKind::Single => Some(self.rr(SpuOpCode::Fs, children[0], children[1])),
                ValueKind::Double => Some(self.rr(SpuOpCode::Dfs, children[0], children[1])),
                _ => self.unsupported(node, "no subtract for this type"),
            },
            IrCode::Mul => match kind {
                ValueKind::Word => Some(self.multiply_word(children[0], children[1])),
                ValueKind::Single => Some(self.rr(SpuOpCode::Fm, children[0], children[1])),
                ValueKind::Double => Some(self.rr(SpuOpCode::Dfm, children[0], children[1])),
                _ => self.unsupported(node, "no multiply for this type"),
            },
            IrCode::Div => match kind {
                ValueKind::Single => Some(self.divide_single(children[0], children[1])),
                _ => self.unsupported(node, "division is only available for float32"),
            },
            IrCode::DivUn | IrCode::Rem | IrCode::RemUn => {
                self.unsupported(node, "integer division has no hardware support")
            }
            IrCode::And | IrCode::Or | IrCode::Xor => {
                let opcode = match node.code {
                    IrCode::And => SpuOpCode::And,
                    IrCode::Or => SpuOpCode::Or,
                    _ => SpuOpCode::Xor,
                };
                match kind {
                    ValueKind::Word | ValueKind::Long => {
                        Some(self.rr(opcode, children[0], children[1]))
                    }
                    _ => self.unsupported(node, "bitwise operation on a non-integer"),
                }
            }
            IrCode::Shl | IrCode::Shr | IrCode::ShrUn => {
                if kind != ValueKind::Word {
                    return self.unsupported(node, "shifts are only available for 32-bit values");
                }
                Some(match node.code {
                    IrCode::Shl => self.rr(SpuOpCode::Shl, children[0], children[1]),
                    code => {
                        let count = self.ri(SpuOpCode::Sfi, children[1], 0);
                        let opcode = if code == IrCode::Shr {
                            SpuOpCode::Rotma
                        } else {
                            SpuOpCode::Rotm
                        };
                        self.rr(opcode, children[0], count)
                    }
                })
            }
            IrCode::Neg => match kind {
                ValueKind::Word => Some(self.ri(SpuOpCode::Sfi, children[0], 0)),
                ValueKind::Single => {
                    let sign = self.imm(SpuOpCode::Ilhu, 0x8000);
                    Some(self.rr(SpuOpCode::Xor, children[0], sign))
                }
                ValueKind::Double => {
                    let sign = self.double_sign_mask();
                    Some(self.rr(SpuOpCode::Xor, children[0], sign))
                }
                _ => self.unsupported(node, "no negate for this type"),
            },
            IrCode::Not => match kind {
                ValueKind::Word | ValueKind::Long => {
                    Some(self.rr(SpuOpCode::Nor, children[0], children[0]))
                }
                _ => self.unsupported(node, "complement of a non-integer"),
            },
            IrCode::ConvI1
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
            | IrCode::ConvRUn => self.convert(node, operand_kind, children[0]),
            IrCode::Ceq | IrCode::Cgt | IrCode::CgtUn | IrCode::Clt | IrCode::CltUn => {
                let shape = compare_shape(node.code)?;
                let mask = self.compare(node, operand_kind, shape, children[0], children[1])?;
                Some(self.ri(SpuOpCode::Andi, mask, 1))
            }
            IrCode::Br => {
                let target = self.block_target(node)?;
                self.emit(SpuInstruction::with_target(SpuOpCode::Br, None, target));
                None
            }
            IrCode::Brtrue | IrCode::Brfalse => {
                let target = self.block_target(node)?;
                let condition = if operand_kind == ValueKind::Long {
                    let low = self.ri(SpuOpCode::Rotqbyi, children[0], 4);
                    self.rr(SpuOpCode::Or, children[0], low)
                } else {
                    children[0]
                };
                let opcode = if node.code == IrCode::Brtrue {
                    SpuOpCode::Brnz
                } else {
                    SpuOpCode::Brz
                };
                self.emit(SpuInstruction::with_target(opcode, Some(condition), target));
                None
            }
            IrCode::Beq
            | IrCode::Bge
            | IrCode::Bgt
            | IrCode::Ble
            | IrCode::Blt
            | IrCode::BneUn
            | IrCode::BgeUn
            | IrCode::BgtUn
            | IrCode::BleUn
            | IrCode::BltUn => {
                let target = self.block_target(node)?;
                let shape = compare_shape(node.code)?;
                let mask = self.compare(node, operand_kind, shape, children[0], children[1])?;
                let opcode = if shape.when_set {
                    SpuOpCode::Brnz
                } else {
                    SpuOpCode::Brz
                };
                self.emit(SpuInstruction::with_target(opcode, Some(mask), target));
                None
            }
            IrCode::Ret => {
                if let Some(&value) = children.first() {
                    if operand_kind == ValueKind::Struct {
                        return self.unsupported(node, "returning a value type");
                    }
                    let result = Register::Hardware(self.options.return_register());
                    self.move_to(result, value);
                }
                self.emit(SpuInstruction::new(SpuOpCode::Ret));
                None
            }
            IrCode::Call | IrCode::Callvirt => self.call(node, &children),
            IrCode::Newobj => self.unsupported(node, "object allocation"),
            IrCode::Newarr => self.unsupported(node, "array allocation"),
            IrCode::Ldstr => self.unsupported(node, "string literals"),
            IrCode::Throw => self.unsupported(node, "exceptions"),
            IrCode::Ldlen => Some(self.load_memory(children[0], 0, &TypeRef::I4)),
            IrCode::Ldelema => {
                let Operand::Type(element) = &node.operand else {
                    return self.unsupported(node, "missing element type");
                };
                self.element_address(node, element.size(), children[0], children[1])
            }
            IrCode::LdindI1
            | IrCode::LdindU1
            | IrCode::LdindI2
            | IrCode::LdindU2
            | IrCode::LdindI4
            | IrCode::LdindU4
            | IrCode::LdindI8
            | IrCode::LdindI
            | IrCode::LdindR4
            | IrCode::LdindR8
            | IrCode::LdindRef => {
                let ty = indirect_type(node.code)?;
                Some(self.load_memory(children[0], 0, &ty))
            }
            IrCode::StindRef
            | IrCode::StindI1
            | IrCode::StindI2
            | IrCode::StindI4
            | IrCode::StindI8
            | IrCode::StindR4
            | IrCode::StindR8
            | IrCode::StindI => {
                let ty = indirect_type(node.code)?;
                self.store_memory(children[0], 0, children[1], &ty);
                None
            }
            IrCode::Ldobj => match &node.operand {
                Operand::Type(ty) => Some(self.load_memory(children[0], 0, ty)),
                _ => self.unsupported(node, "missing type operand"),
            },
            IrCode::Stobj => match &node.operand {
                Operand::Type(ty) => {
                    self.store_memory(children[0], 0, children[1], ty);
                    None
                }
                _ => self.unsupported(node, "missing type operand"),
            },
            IrCode::Ldfld | IrCode::Ldflda | IrCode::Stfld => {
                let Operand::Field(field) = &node.operand else {
                    return self.unsupported(node, "missing field operand");
                };
                let offset = field.offset as i32;
                match node.code {
                    IrCode::Ldfld => Some(self.load_memory(children[0], offset, &field.ty)),
                    IrCode::Ldflda => Some(self.add_immediate(children[0], offset)),
                    _ => {
                        self.store_memory(children[0], offset, children[1], &field.ty);
                        None
                    }
                }
            }
            IrCode::Ldsfld | IrCode::Ldsflda | IrCode::Stsfld => {
                let Operand::Field(field) = &node.operand else {
                    return self.unsupported(node, "missing field operand");
                };
                self.static_field(node, field, children.first().copied())
            }
            IrCode::Initobj => {
                let Operand::Type(ty) = &node.operand else {
                    return self.unsupported(node, "missing type operand");
                };
                let zero = self.imm(SpuOpCode::Il, 0);
                if ty.is_value_type() {
                    for quadword in 0..ty.size().div_ceil(16) as i32 {
                        self.emit(SpuInstruction::ri(SpuOpCode::Stqd, zero, children[0], quadword));
                    }
                } else {
                    self.store_memory(children[0], 0, zero, ty);
                }
                None
            }
            IrCode::Sizeof => match &node.operand {
                Operand::Type(ty) => Some(self.load_immediate(ty.size() as i32)),
                _ => self.unsupported(node, "missing type operand"),
            },
            IrCode::Dup
            | IrCode::Switch
            | IrCode::LdelemI1
            | IrCode::LdelemU1
            | IrCode::LdelemI2
            | IrCode::LdelemU2
            | IrCode::LdelemI4
            | IrCode::LdelemU4
            | IrCode::LdelemI8
            | IrCode::LdelemI
            | IrCode::LdelemR4
            | IrCode::LdelemR8
            | IrCode::LdelemRef
            | IrCode::Ldelem
            | IrCode::StelemI
            | IrCode::StelemI1
            | IrCode::StelemI2
            | IrCode::StelemI4
            | IrCode::StelemI8
            | IrCode::StelemR4
            | IrCode::StelemR8
            | IrCode::StelemRef
            | IrCode::Stelem
            | IrCode::Box
            | IrCode::UnboxAny
            | IrCode::Castclass
            | IrCode::Isinst
            | IrCode::Ldtoken
            | IrCode::ConvOvf
            | IrCode::ConvOvfUn
            | IrCode::Leave => self.unsupported(node, "opcode should not survive tree building"),
        }
    }

    fn block_target(&mut self, node: &TreeNode) -> Option<Target> {
        let Some(block) = node.target() else {
            self.unsupported(node, "branch without a target block");
            return None;
        };
        Some(Target::Block(block))
    }

    fn load_variable(&mut self, ir: &MethodIr, node: &TreeNode) -> Option<Register> {
        let var = ir.variables.get(node.variable()?);
        match var.storage {
            Storage::Register(register) => Some(virtual_reg(register)),
            Storage::Frame(offset) => {
                let ty = storage_type(var)?;
                Some(self.load_memory(Register::SP, offset as i32, &ty))
            }
            Storage::Unassigned => self.unsupported(node, "variable without storage"),
        }
    }

    fn store_variable(&mut self, ir: &MethodIr, node: &TreeNode, value: Register) {
        let Some(id) = node.variable() else {
            self.unsupported(node, "store without a variable");
            return;
        };
        let var = ir.variables.get(id);
        match var.storage {
            Storage::Register(register) => self.move_to(virtual_reg(register), value),
            Storage::Frame(offset) => {
                if let Some(ty) = storage_type(var) {
                    self.store_memory(Register::SP, offset as i32, value, &ty);
                }
            }
            Storage::Unassigned => {
                self.unsupported(node, "variable without storage");
            }
        }
    }

    /// Value types are represented by their address; scalars are rotated
    /// into the preferred slot of a fresh register.
    fn load_memory(&mut self, address: Register, offset: i32, ty: &TypeRef) -> Register {
        let ea = self.add_immediate(address, offset);
        if ty.is_value_type() {
            return ea;
        }
        let quadword = self.ri(SpuOpCode::Lqd, ea, 0);
        match ty.size() {
            1 => {
                let shift = self.ri(SpuOpCode::Ai, ea, -3);
                let value = self.rr(SpuOpCode::Rotqby, quadword, shift);
                self.extend(value, ty)
            }
            2 => {
                let shift = self.ri(SpuOpCode::Ai, ea, -2);
                let value = self.rr(SpuOpCode::Rotqby, quadword, shift);
                self.extend(value, ty)
            }
            _ => self.rr(SpuOpCode::Rotqby, quadword, ea),
        }
    }

    fn store_memory(&mut self, address: Register, offset: i32, value: Register, ty: &TypeRef) {
        let ea = self.add_immediate(address, offset);
        if ty.is_value_type() {
            self.copy_quadwords(ea, value, ty.size());
            return;
        }
        let insert = match ty.size() {
            1 => SpuOpCode::Cbd,
            2 => SpuOpCode::Chd,
            8 => SpuOpCode::Cdd,
            _ => SpuOpCode::Cwd,
        };
        let quadword = self.ri(SpuOpCode::Lqd, ea, 0);
        let mask = self.ri(insert, ea, 0);
        let merged = self.rrr(SpuOpCode::Shufb, value, quadword, mask);
        self.emit(SpuInstruction::ri(SpuOpCode::Stqd, merged, ea, 0));
    }

    fn copy_quadwords(&mut self, destination: Register, source: Register, size: u32) {
        for quadword in 0..size.div_ceil(16) as i32 {
            let value = self.ri(SpuOpCode::Lqd, source, quadword);
            self.emit(SpuInstruction::ri(SpuOpCode::Stqd, value, destination, quadword));
        }
    }

    /// Sign or zero extends a sub-word value sitting in the preferred slot.
    fn extend(&mut self, value: Register, ty: &TypeRef) -> Register {
        match ty {
            TypeRef::I1 => {
                let half = self.rr(SpuOpCode::Xsbh, value, value);
                self.rr(SpuOpCode::Xshw, half, half)
            }
            TypeRef::I2 => self.rr(SpuOpCode::Xshw, value, value),
            TypeRef::U1 | TypeRef::Bool => self.ri(SpuOpCode::Andi, value, 0xFF),
            _ => {
                let high = self.ri(SpuOpCode::Shli, value, 16);
                self.ri(SpuOpCode::Rotmi, high, -16)
            }
        }
    }

    fn load_doubleword(&mut self, node: &TreeNode, bytes: [u8; 8]) -> Option<Register> {
        let mut data = bytes.to_vec();
        data.resize(16, 0);
        let name = format!("{}#const{}", self.name, self.constants);
        self.constants += 1;
        match self.arena.add_data(&name, data) {
            Ok(object) => {
                let rt = self.reg();
                self.emit(SpuInstruction::with_target(
                    SpuOpCode::Lqr,
                    Some(rt),
                    Target::Object(object),
                ));
                Some(rt)
            }
            Err(err) => self.unsupported(node, &err.to_string()),
        }
    }

    /// `mpyh a,b` + `mpyh b,a` + `mpyu a,b`, summed.
    fn multiply_word(&mut self, left: Register, right: Register) -> Register {
        let high_left = self.rr(SpuOpCode::Mpyh, left, right);
        let high_right = self.rr(SpuOpCode::Mpyh, right, left);
        let low = self.rr(SpuOpCode::Mpyu, left, right);
        let high = self.rr(SpuOpCode::A, high_left, high_right);
        self.rr(SpuOpCode::A, high, low)
    }

    /// Reciprocal estimate refined once, then one Newton step on the quotient.
    fn divide_single(&mut self, dividend: Register, divisor: Register) -> Register {
        let estimate = self.rr(SpuOpCode::Frest, divisor, divisor);
        let reciprocal = self.rr(SpuOpCode::Fi, divisor, estimate);
        let quotient = self.rr(SpuOpCode::Fm, dividend, reciprocal);
        let residual = self.rrr(SpuOpCode::Fnms, quotient, divisor, dividend);
        self.rrr(SpuOpCode::Fma, residual, reciprocal, quotient)
    }

    /// All-ones mask in the preferred word when the comparison holds.
    fn compare(
        &mut self,
        node: &TreeNode,
        kind: ValueKind,
        shape: CompareShape,
        left: Register,
        right: Register,
    ) -> Option<Register> {
        let (a, b) = if shape.swap {
            (right, left)
        } else {
            (left, right)
        };
        match (kind, shape.comparison) {
            (ValueKind::Word, Comparison::Eq) => Some(self.rr(SpuOpCode::Ceq, a, b)),
            (ValueKind::Word, Comparison::Gt) => {
                let opcode = if shape.signed {
                    SpuOpCode::Cgt
                } else {
                    SpuOpCode::Clgt
                };
                Some(self.rr(opcode, a, b))
            }
            (ValueKind::Single, Comparison::Eq) => Some(self.rr(SpuOpCode::Fceq, a, b)),
            (ValueKind::Single, Comparison::Gt) => Some(self.rr(SpuOpCode::Fcgt, a, b)),
            (ValueKind::Long, comparison) => {
                Some(self.compare_doubleword(a, b, comparison, shape.signed))
            }
            (ValueKind::Double, Comparison::Eq) => {
                Some(self.compare_doubleword(a, b, Comparison::Eq, false))
            }
            (ValueKind::Double, Comparison::Gt) => {
                let a = self.ordered_key(a);
                let b = self.ordered_key(b);
                Some(self.compare_doubleword(a, b, Comparison::Gt, false))
            }
            _ => self.unsupported(node, "no comparison for these operands"),
        }
    }

    /// 64-bit compare from word compares: the high words decide unless they
    /// are equal, in which case the unsigned low-word compare does.
    fn compare_doubleword(
        &mut self,
        a: Register,
        b: Register,
        comparison: Comparison,
        signed: bool,
    ) -> Register {
        let equal = self.rr(SpuOpCode::Ceq, a, b);
        if comparison == Comparison::Eq {
            let low_equal = self.ri(SpuOpCode::Rotqbyi, equal, 4);
            return self.rr(SpuOpCode::And, equal, low_equal);
        }
        let high_opcode = if signed {
            SpuOpCode::Cgt
        } else {
            SpuOpCode::Clgt
        };
        let high_greater = self.rr(high_opcode, a, b);
        let greater = self.rr(SpuOpCode::Clgt, a, b);
        let low_greater = self.ri(SpuOpCode::Rotqbyi, greater, 4);
        let tie_break = self.rr(SpuOpCode::And, equal, low_greater);
        self.rr(SpuOpCode::Or, high_greater, tie_break)
    }

    /// Maps a double's bits onto an unsigned integer with the same order:
    /// negatives are complemented, positives get the sign bit set.
    fn ordered_key(&mut self, value: Register) -> Register {
        let sign_words = self.ri(SpuOpCode::Rotmai, value, -31);
        let pattern = self.imm(SpuOpCode::Ilhu, 0x0001);
        self.emit(SpuInstruction::imm(SpuOpCode::Iohl, pattern, 0x0203));
        let sign = self.rrr(SpuOpCode::Shufb, sign_words, sign_words, pattern);
        let sign_bit = self.double_sign_mask();
        let flip = self.rr(SpuOpCode::Or, sign, sign_bit);
        self.rr(SpuOpCode::Xor, value, flip)
    }

    fn convert(&mut self, node: &TreeNode, source: ValueKind, value: Register) -> Option<Register> {
        let code = node.code;
        match source {
            ValueKind::Word => match code {
                IrCode::ConvI8 | IrCode::ConvU8 => {
                    let high = if code == IrCode::ConvI8 {
                        self.ri(SpuOpCode::Rotmai, value, -31)
                    } else {
                        self.imm(SpuOpCode::Il, 0)
                    };
                    let low = self.ri(SpuOpCode::Rotqbyi, value, 12);
                    let second_word = self.imm(SpuOpCode::Fsmbi, 0x0F00);
                    Some(self.rrr(SpuOpCode::Selb, high, low, second_word))
                }
                IrCode::ConvR4 => Some(self.ri(SpuOpCode::Csflt, value, CSFLT_UNSCALED)),
                IrCode::ConvR8 => Some(self.word_to_double(value, true)),
                IrCode::ConvRUn => Some(self.word_to_double(value, false)),
                _ => Some(self.narrow(code, value)),
            },
            ValueKind::Long => match code {
                IrCode::ConvI8 | IrCode::ConvU8 => Some(value),
                IrCode::ConvR4 | IrCode::ConvR8 | IrCode::ConvRUn => {
                    self.unsupported(node, "64-bit integer to float")
                }
                _ => {
                    let low = self.ri(SpuOpCode::Rotqbyi, value, 4);
                    Some(self.narrow(code, low))
                }
            },
            ValueKind::Single => match code {
                IrCode::ConvR4 => Some(value),
                IrCode::ConvR8 | IrCode::ConvRUn => Some(self.rr(SpuOpCode::Fesd, value, value)),
                IrCode::ConvI8 | IrCode::ConvU8 => self.unsupported(node, "float to 64-bit integer"),
                IrCode::ConvU4 | IrCode::ConvU | IrCode::ConvU1 | IrCode::ConvU2 => {
                    let word = self.ri(SpuOpCode::Cfltu, value, CFLTS_UNSCALED);
                    Some(self.narrow(code, word))
                }
                _ => {
                    let word = self.ri(SpuOpCode::Cflts, value, CFLTS_UNSCALED);
                    Some(self.narrow(code, word))
                }
            },
            ValueKind::Double => match code {
                IrCode::ConvR8 | IrCode::ConvRUn => Some(value),
                IrCode::ConvR4 => Some(self.rr(SpuOpCode::Frds, value, value)),
                IrCode::ConvI8 | IrCode::ConvU8 => self.unsupported(node, "float to 64-bit integer"),
                _ => {
                    let signed = !matches!(
                        code,
                        IrCode::ConvU4 | IrCode::ConvU | IrCode::ConvU1 | IrCode::ConvU2
                    );
                    let word = self.double_to_word(value, signed);
                    Some(self.narrow(code, word))
                }
            },
            ValueKind::Struct | ValueKind::Void => self.unsupported(node, "conversion of a non-scalar"),
        }
    }

    /// Exact 32-bit integer to double: each 16-bit half converts exactly
    /// through single precision, then `high * 65536 + low` in double.
    fn word_to_double(&mut self, value: Register, signed: bool) -> Register {
        let high_shift = if signed { SpuOpCode::Rotmai } else { SpuOpCode::Rotmi };
        let high = self.ri(high_shift, value, -16);
        let shifted = self.ri(SpuOpCode::Shli, value, 16);
        let low = self.ri(SpuOpCode::Rotmi, shifted, -16);
        let high_single = self.ri(SpuOpCode::Csflt, high, CSFLT_UNSCALED);
        let low_single = self.ri(SpuOpCode::Csflt, low, CSFLT_UNSCALED);
        let high_double = self.rr(SpuOpCode::Fesd, high_single, high_single);
        let low_double = self.rr(SpuOpCode::Fesd, low_single, low_single);
        let scale_single = self.imm(SpuOpCode::Ilhu, WORD_HALF_SCALE);
        let scale = self.rr(SpuOpCode::Fesd, scale_single, scale_single);
        let scaled = self.rr(SpuOpCode::Dfm, high_double, scale);
        self.rr(SpuOpCode::Dfa, scaled, low_double)
    }

    /// Truncates a double to a 32-bit integer on its bits. The 53-bit
    /// mantissa in doubleword 0 is shifted right by `1075 - exponent` and
    /// the low word is kept. Magnitudes below one give zero. Out-of-range
    /// inputs give an unspecified word.
    fn double_to_word(&mut self, value: Register, signed: bool) -> Register {
        let biased = self.ri(SpuOpCode::Rotmi, value, -20);
        let exponent_mask = self.load_immediate(0x7FF);
        let exponent = self.rr(SpuOpCode::And, biased, exponent_mask);
        let bias = self.load_immediate(DOUBLE_UNIT_EXPONENT);
        let shift = self.rr(SpuOpCode::Sf, exponent, bias);

        let fraction_mask = self.load_immediate(0x000F_FFFF);
        let fraction = self.rr(SpuOpCode::And, value, fraction_mask);
        let implicit = self.imm(SpuOpCode::Ilhu, 0x0010);
        let high_word = self.rr(SpuOpCode::Or, fraction, implicit);
        let first_word = self.imm(SpuOpCode::Fsmbi, 0xF000);
        let mantissa = self.rrr(SpuOpCode::Selb, value, high_word, first_word);

        let bytes = self.ri(SpuOpCode::Rotmi, shift, -3);
        let byte_count = self.ri(SpuOpCode::Sfi, bytes, 0);
        let bits = self.ri(SpuOpCode::Andi, shift, 7);
        let bit_count = self.ri(SpuOpCode::Sfi, bits, 0);
        let by_bytes = self.rr(SpuOpCode::Rotqmby, mantissa, byte_count);
        let by_bits = self.rr(SpuOpCode::Rotqmbi, by_bytes, bit_count);
        let magnitude = self.ri(SpuOpCode::Rotqbyi, by_bits, 4);

        let truncated = if signed {
            let sign = self.ri(SpuOpCode::Rotmai, value, -31);
            let flipped = self.rr(SpuOpCode::Xor, magnitude, sign);
            self.rr(SpuOpCode::Sf, sign, flipped)
        } else {
            magnitude
        };
        let fractional = self.ri(SpuOpCode::Cgti, shift, 52);
        self.rr(SpuOpCode::Andc, truncated, fractional)
    }

    fn narrow(&mut self, code: IrCode, value: Register) -> Register {
        match code {
            IrCode::ConvI1 => self.extend(value, &TypeRef::I1),
            IrCode::ConvU1 => self.extend(value, &TypeRef::U1),
            IrCode::ConvI2 => self.extend(value, &TypeRef::I2),
            IrCode::ConvU2 => self.extend(value, &TypeRef::U2),
            _ => value,
        }
    }

    fn element_address(
        &mut self,
        node: &TreeNode,
        size: u32,
        array: Register,
        index: Register,
    ) -> Option<Register> {
        let scaled = if size == 1 {
            index
        } else if size.is_power_of_two() {
            self.ri(SpuOpCode::Shli, index, size.trailing_zeros() as i32)
        } else if size <= 511 {
            self.ri(SpuOpCode::Mpyi, index, size as i32)
        } else {
            return self.unsupported(node, "element too large to scale");
        };
        let element = self.rr(SpuOpCode::A, array, scaled);
        Some(self.ri(SpuOpCode::Ai, element, ARRAY_HEADER_SIZE))
    }

    fn static_field(
        &mut self,
        node: &TreeNode,
        field: &FieldDef,
        value: Option<Register>,
    ) -> Option<Register> {
        let Some(object) = self.arena.find(&field.symbol()) else {
            return self.unsupported(node, &format!("static field {} was not declared", field.symbol()));
        };
        let target = Target::Object(object);
        let by_address = node.code == IrCode::Ldsflda || field.ty.is_value_type();
        if by_address {
            let address = self.reg();
            self.emit(SpuInstruction::with_target(SpuOpCode::Ila, Some(address), target));
            return match node.code {
                IrCode::Stsfld => {
                    let value = value?;
                    self.store_memory(address, 0, value, &field.ty);
                    None
                }
                _ => Some(address),
            };
        }

        let quadword = self.reg();
        self.emit(SpuInstruction::with_target(SpuOpCode::Lqr, Some(quadword), target));
        if node.code == IrCode::Ldsfld {
            return Some(match field.ty.size() {
                1 => {
                    let value = self.ri(SpuOpCode::Rotqbyi, quadword, 13);
                    self.extend(value, &field.ty)
                }
                2 => {
                    let value = self.ri(SpuOpCode::Rotqbyi, quadword, 14);
                    self.extend(value, &field.ty)
                }
                _ => quadword,
            });
        }

        let value = value?;
        let insert = match field.ty.size() {
            1 => SpuOpCode::Cbd,
            2 => SpuOpCode::Chd,
            8 => SpuOpCode::Cdd,
            _ => SpuOpCode::Cwd,
        };
        let mask = self.ri(insert, Register::SP, 0);
        let merged = self.rrr(SpuOpCode::Shufb, value, quadword, mask);
        self.emit(SpuInstruction::with_target(SpuOpCode::Stqr, Some(merged), target));
        None
    }

    fn call(&mut self, node: &TreeNode, args: &[Register]) -> Option<Register> {
        let Some(callee) = node.callee().cloned() else {
            return self.unsupported(node, "call without a callee");
        };
        if let Some(intrinsic) = callee.intrinsic {
            return self.intrinsic(intrinsic, args);
        }
        let Some(object) = self.arena.find(&callee.symbol()) else {
            return self.unsupported(node, &format!("call to undeclared routine {}", callee.symbol()));
        };
        if args.len() > usize::from(self.options.argument_register_count) {
            return self.unsupported(node, "too many arguments for registers");
        }
        for (slot, arg) in args.iter().enumerate() {
            let hardware = self.options.first_argument_register + slot as u8;
            self.move_to(Register::Hardware(hardware), *arg);
        }
        self.emit(SpuInstruction::with_target(
            SpuOpCode::Brsl,
            Some(Register::LR),
            Target::Object(object),
        ));
        match value_kind(&node.stack_type) {
            ValueKind::Void => None,
            ValueKind::Struct => self.unsupported(node, "value type return"),
            _ => {
                let result = self.reg();
                self.move_to(result, Register::Hardware(self.options.return_register()));
                Some(result)
            }
        }
    }

    /// Channel numbers occupy the `ra` field.
    fn intrinsic(&mut self, intrinsic: Intrinsic, args: &[Register]) -> Option<Register> {
        match intrinsic {
            Intrinsic::Stop(signal) => {
                self.emit(SpuInstruction {
                    constant: i32::from(signal),
                    ..SpuInstruction::new(SpuOpCode::Stop)
                });
                None
            }
            Intrinsic::ReadChannel(channel) => {
                let rt = self.reg();
                self.emit(SpuInstruction {
                    rt: Some(rt),
                    ra: Some(Register::Hardware(channel)),
                    ..SpuInstruction::new(SpuOpCode::Rdch)
                });
                Some(rt)
            }
            Intrinsic::ChannelCount(channel) => {
                let rt = self.reg();
                self.emit(SpuInstruction {
                    rt: Some(rt),
                    ra: Some(Register::Hardware(channel)),
                    ..SpuInstruction::new(SpuOpCode::Rchcnt)
                });
                Some(rt)
            }
            Intrinsic::WriteChannel(channel) => {
                self.emit(SpuInstruction {
                    rt: args.first().copied(),
                    ra: Some(Register::Hardware(channel)),
                    ..SpuInstruction::new(SpuOpCode::Wrch)
                });
                None
            }
        }
    }
}

struct BlockObjects {
    prologue: ObjectId,
    body: Vec<ObjectId>,
    epilogue: ObjectId,
}

fn virtual_reg(index: u32) -> Register {
    Register::Virtual(VirtualRegister(index))
}
