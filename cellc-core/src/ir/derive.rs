use super::code::{FlowControl, IrCode};
use super::stack_type::StackType;
use super::tree::{NodeKind, Operand, TreeNode, VariableArena};
use crate::metadata::TypeRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDeriveError {
    NotSupported {
        offset: u32,
        code: IrCode,
        detail: String,
    },
    IncompatibleOperands {
        offset: u32,
        code: IrCode,
        left: StackType,
        right: StackType,
    },
    MissingChild {
        offset: u32,
        code: IrCode,
    },
    UntypedVariable {
        offset: u32,
        code: IrCode,
        index: u32,
    },
    VariableRetyped {
        index: u32,
        existing: StackType,
        new: StackType,
    },
}

impl std::fmt::Display for TypeDeriveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeDeriveError::NotSupported {
                offset,
                code,
                detail,
            } => write!(
                f,
                "cannot derive a type for {} at IL_{offset:04x}: {detail}",
                code.mnemonic()
            ),
            TypeDeriveError::IncompatibleOperands {
                offset,
                code,
                left,
                right,
            } => write!(
                f,
                "{} at IL_{offset:04x} cannot combine {left} and {right}",
                code.mnemonic()
            ),
            TypeDeriveError::MissingChild { offset, code } => {
                write!(f, "{} at IL_{offset:04x} is missing an operand", code.mnemonic())
            }
            TypeDeriveError::UntypedVariable {
                offset,
                code,
                index,
            } => write!(
                f,
                "{} at IL_{offset:04x} reads variable {index} before it has a type",
                code.mnemonic()
            ),
            TypeDeriveError::VariableRetyped {
                index,
                existing,
                new,
            } => write!(f, "variable {index} already has type {existing}, not {new}"),
        }
    }
}

impl std::error::Error for TypeDeriveError {}

pub type DeriveResult<T> = Result<T, TypeDeriveError>;

/// Assigns `node.stack_type` from the opcode, the operand and the types
/// already derived for its direct children. Never recurses.
pub fn derive(node: &mut TreeNode, vars: &mut VariableArena) -> DeriveResult<()> {
    node.stack_type = derive_type(node, vars)?;
    Ok(())
}

fn derive_type(node: &TreeNode, vars: &mut VariableArena) -> DeriveResult<StackType> {
    if node.code == IrCode::Leave {
        return Err(not_supported(node, "exception regions"));
    }
    match node.code.flow() {
        FlowControl::Branch | FlowControl::ConditionalBranch | FlowControl::Throw => {
            Ok(StackType::None)
        }
        FlowControl::Break => Ok(StackType::None),
        FlowControl::Return => Ok(node
            .left()
            .map(|child| child.stack_type.clone())
            .unwrap_or(StackType::None)),
        FlowControl::Call => derive_call(node),
        FlowControl::Next => derive_sequential(node, vars),
    }
}

fn derive_call(node: &TreeNode) -> DeriveResult<StackType> {
    let NodeKind::Call { callee, .. } = &node.kind else {
        return Err(not_supported(node, "call node without a callee"));
    };
    if node.code == IrCode::Newobj {
        return match &callee.declaring_type {
            Some(ty @ TypeRef::Struct(_)) => Ok(StackType::ValueType(ty.clone())),
            Some(ty) => Ok(StackType::ObjectRef(ty.clone())),
            None => Err(not_supported(node, "constructor without a declaring type")),
        };
    }
    Ok(StackType::from_type(&callee.return_type))
}

fn derive_sequential(node: &TreeNode, vars: &mut VariableArena) -> DeriveResult<StackType> {
    let ty = match node.code {
        IrCode::Nop
        | IrCode::Pop
        | IrCode::StindRef
        | IrCode::StindI1
        | IrCode::StindI2
        | IrCode::StindI4
        | IrCode::StindI8
        | IrCode::StindR4
        | IrCode::StindR8
        | IrCode::StindI
        | IrCode::Stobj
        | IrCode::Stfld
        | IrCode::Stsfld
        | IrCode::Initobj => StackType::None,
        IrCode::Stloc | IrCode::Starg => {
            let var = variable_of(node)?;
            let value = child(node, 0)?.stack_type.clone();
            if vars.get(var).is_synthetic() {
                vars.set_stack_type(var, value)?;
            }
            StackType::None
        }
        IrCode::Ldloc | IrCode::Ldarg => {
            let var = vars.get(variable_of(node)?);
            var.stack_type
                .clone()
                .ok_or(TypeDeriveError::UntypedVariable {
                    offset: node.offset,
                    code: node.code,
                    index: var.index,
                })?
        }
        IrCode::Ldloca | IrCode::Ldarga => {
            let var = vars.get(variable_of(node)?);
            match &var.declared {
                Some(ty) => StackType::ManagedPointer(ty.clone()),
                None => return Err(not_supported(node, "address of a synthetic variable")),
            }
        }
        IrCode::Ldnull => StackType::ObjectRef(TypeRef::Object),
        IrCode::LdcI4 | IrCode::Sizeof => StackType::Int32,
        IrCode::LdcI8 => StackType::Int64,
        IrCode::LdcR4 => StackType::Float32,
        IrCode::LdcR8 => StackType::Float64,
        IrCode::LdindI1
        | IrCode::LdindU1
        | IrCode::LdindI2
        | IrCode::LdindU2
        | IrCode::LdindI4
        | IrCode::LdindU4 => StackType::Int32,
        IrCode::LdindI8 => StackType::Int64,
        IrCode::LdindI => StackType::NativeInt,
        IrCode::LdindR4 => StackType::Float32,
        IrCode::LdindR8 => StackType::Float64,
        IrCode::LdindRef => match &child(node, 0)?.stack_type {
            StackType::ManagedPointer(pointee) if !pointee.is_value_type() => {
                StackType::from_type(pointee)
            }
            _ => StackType::ObjectRef(TypeRef::Object),
        },
        IrCode::Add | IrCode::Sub | IrCode::Mul | IrCode::Div | IrCode::Rem => {
            binary_numeric(node)?
        }
        IrCode::DivUn | IrCode::RemUn | IrCode::And | IrCode::Or | IrCode::Xor => {
            binary_integer(node)?
        }
        IrCode::Shl | IrCode::Shr | IrCode::ShrUn => shift(node)?,
        IrCode::Neg => {
            let operand = child(node, 0)?.stack_type.clone();
            if !operand.is_numeric() {
                return Err(not_supported(node, &format!("negating {operand}")));
            }
            operand
        }
        IrCode::Not => {
            let operand = child(node, 0)?.stack_type.clone();
            if !operand.is_integer() {
                return Err(not_supported(node, &format!("complementing {operand}")));
            }
            operand
        }
        IrCode::ConvI1
        | IrCode::ConvI2
        | IrCode::ConvI4
        | IrCode::ConvU1
        | IrCode::ConvU2
        | IrCode::ConvU4 => conversion(node, StackType::Int32)?,
        IrCode::ConvI8 | IrCode::ConvU8 => conversion(node, StackType::Int64)?,
        IrCode::ConvR4 => conversion(node, StackType::Float32)?,
        IrCode::ConvR8 | IrCode::ConvRUn => conversion(node, StackType::Float64)?,
        IrCode::ConvI | IrCode::ConvU => {
            let operand = &child(node, 0)?.stack_type;
            if !(operand.is_numeric() || operand.is_reference()) {
                return Err(not_supported(node, &format!("converting {operand}")));
            }
            StackType::NativeInt
        }
        IrCode::Ceq | IrCode::Cgt | IrCode::CgtUn | IrCode::Clt | IrCode::CltUn => {
            comparison(node)?;
            StackType::Int32
        }
        IrCode::Ldobj => StackType::from_type(type_operand(node)?),
        IrCode::Ldstr => StackType::ObjectRef(TypeRef::String),
        IrCode::Newarr => StackType::ObjectRef(TypeRef::array_of(type_operand(node)?.clone())),
        IrCode::Ldlen => StackType::NativeInt,
        IrCode::Ldelema => StackType::ManagedPointer(type_operand(node)?.clone()),
        IrCode::Ldfld | IrCode::Ldsfld => match &node.operand {
            Operand::Field(field) => StackType::from_type(&field.ty),
            _ => return Err(not_supported(node, "missing field operand")),
        },
        IrCode::Ldflda | IrCode::Ldsflda => match &node.operand {
            Operand::Field(field) => StackType::ManagedPointer(field.ty.clone()),
            _ => return Err(not_supported(node, "missing field operand")),
        },
        other => {
            return Err(not_supported(
                node,
                &format!("{} has no derivation rule", other.mnemonic()),
            ));
        }
    };
    Ok(ty)
}

fn binary_numeric(node: &TreeNode) -> DeriveResult<StackType> {
    let (left, right) = operands(node)?;
    let pointer_arithmetic = matches!(node.code, IrCode::Add | IrCode::Sub);
    match (left, right) {
        (l, r) if l == r && l.is_numeric() => Ok(l.clone()),
        (StackType::Int32, StackType::NativeInt) | (StackType::NativeInt, StackType::Int32) => {
            Ok(StackType::NativeInt)
        }
        (StackType::ManagedPointer(ty), StackType::Int32 | StackType::NativeInt)
            if pointer_arithmetic =>
        {
            Ok(StackType::ManagedPointer(ty.clone()))
        }
        (StackType::Int32 | StackType::NativeInt, StackType::ManagedPointer(ty))
            if node.code == IrCode::Add =>
        {
            Ok(StackType::ManagedPointer(ty.clone()))
        }
        _ => Err(incompatible(node, left, right)),
    }
}

fn binary_integer(node: &TreeNode) -> DeriveResult<StackType> {
    let (left, right) = operands(node)?;
    match (left, right) {
        (l, r) if l == r && l.is_integer() => Ok(l.clone()),
        (StackType::Int32, StackType::NativeInt) | (StackType::NativeInt, StackType::Int32) => {
            Ok(StackType::NativeInt)
        }
        _ => Err(incompatible(node, left, right)),
    }
}

fn shift(node: &TreeNode) -> DeriveResult<StackType> {
    let (value, amount) = operands(node)?;
    if value.is_integer() && matches!(amount, StackType::Int32 | StackType::NativeInt) {
        return Ok(value.clone());
    }
    Err(incompatible(node, value, amount))
}

fn comparison(node: &TreeNode) -> DeriveResult<()> {
    let (left, right) = operands(node)?;
    let compatible = match (left, right) {
        (l, r) if l == r => l.is_numeric(),
        (StackType::Int32, StackType::NativeInt) | (StackType::NativeInt, StackType::Int32) => {
            true
        }
        (l, r) => l.is_reference() && r.is_reference(),
    };
    if compatible {
        Ok(())
    } else {
        Err(incompatible(node, left, right))
    }
}

fn conversion(node: &TreeNode, result: StackType) -> DeriveResult<StackType> {
    let operand = &child(node, 0)?.stack_type;
    if !operand.is_numeric() {
        return Err(not_supported(node, &format!("converting {operand}")));
    }
    Ok(result)
}

fn operands(node: &TreeNode) -> DeriveResult<(&StackType, &StackType)> {
    Ok((&child(node, 0)?.stack_type, &child(node, 1)?.stack_type))
}

fn child(node: &TreeNode, index: usize) -> DeriveResult<&TreeNode> {
    let found = match index {
        0 => node.left(),
        1 => node.right(),
        _ => None,
    };
    found.ok_or(TypeDeriveError::MissingChild {
        offset: node.offset,
        code: node.code,
    })
}

fn variable_of(node: &TreeNode) -> DeriveResult<super::tree::VarId> {
    node.variable()
        .ok_or_else(|| not_supported(node, "missing variable operand"))
}

fn type_operand(node: &TreeNode) -> DeriveResult<&TypeRef> {
    match &node.operand {
        Operand::Type(ty) => Ok(ty),
        _ => Err(not_supported(node, "missing type operand")),
    }
}

fn not_supported(node: &TreeNode, detail: &str) -> TypeDeriveError {
    TypeDeriveError::NotSupported {
        offset: node.offset,
        code: node.code,
        detail: detail.to_string(),
    }
}

fn incompatible(node: &TreeNode, left: &StackType, right: &StackType) -> TypeDeriveError {
    TypeDeriveError::IncompatibleOperands {
        offset: node.offset,
        code: node.code,
        left: left.clone(),
        right: right.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(code: IrCode, ty: StackType) -> TreeNode {
        let mut node = TreeNode::leaf(code, Operand::None, 0);
        node.stack_type = ty;
        node
    }

    #[test]
    fn int32_with_native_int_promotes() {
        let mut vars = VariableArena::new();
        let mut node = TreeNode::binary(
            IrCode::Add,
            Operand::None,
            4,
            constant(IrCode::LdcI4, StackType::Int32),
            constant(IrCode::ConvI, StackType::NativeInt),
        );
        derive(&mut node, &mut vars).expect("derive should succeed");
        assert_eq!(node.stack_type, StackType::NativeInt);
    }

    #[test]
    fn int32_with_float_is_rejected() {
        let mut vars = VariableArena::new();
        let mut node = TreeNode::binary(
            IrCode::Mul,
            Operand::None,
            4,
            constant(IrCode::LdcI4, StackType::Int32),
            constant(IrCode::LdcR4, StackType::Float32),
        );
        let err = derive(&mut node, &mut vars).expect_err("derive should fail");
        assert!(matches!(err, TypeDeriveError::IncompatibleOperands { offset: 4, .. }));
    }

    #[test]
    fn stored_synthetic_takes_the_value_type_once() {
        let mut vars = VariableArena::new();
        let temp = vars.add_synthetic();
        let mut store = TreeNode::unary(
            IrCode::Stloc,
            Operand::Variable(temp),
            0,
            constant(IrCode::LdcI4, StackType::Int32),
        );
        derive(&mut store, &mut vars).expect("derive should succeed");
        assert_eq!(vars.get(temp).stack_type, Some(StackType::Int32));

        let mut other = TreeNode::unary(
            IrCode::Stloc,
            Operand::Variable(temp),
            2,
            constant(IrCode::LdcR8, StackType::Float64),
        );
        let err = derive(&mut other, &mut vars).expect_err("retyping should fail");
        assert!(matches!(err, TypeDeriveError::VariableRetyped { .. }));
    }
}
