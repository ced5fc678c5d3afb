use crate::metadata::TypeRef;

/// Abstract value category of an evaluation-stack slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StackType {
    None,
    Int32,
    Int64,
    NativeInt,
    Float32,
    Float64,
    ObjectRef(TypeRef),
    ValueType(TypeRef),
    ManagedPointer(TypeRef),
}

impl StackType {
    pub fn from_type(ty: &TypeRef) -> Self {
        match ty {
            TypeRef::Void => StackType::None,
            TypeRef::Bool
            | TypeRef::Char
            | TypeRef::I1
            | TypeRef::U1
            | TypeRef::I2
            | TypeRef::U2
            | TypeRef::I4
            | TypeRef::U4 => StackType::Int32,
            TypeRef::I8 | TypeRef::U8 => StackType::Int64,
            TypeRef::I | TypeRef::U => StackType::NativeInt,
            TypeRef::R4 => StackType::Float32,
            TypeRef::R8 => StackType::Float64,
            TypeRef::Object | TypeRef::String | TypeRef::Class(_) | TypeRef::Array(_) => {
                StackType::ObjectRef(ty.clone())
            }
            TypeRef::Struct(_) => StackType::ValueType(ty.clone()),
            TypeRef::ByRef(pointee) => StackType::ManagedPointer((**pointee).clone()),
        }
    }

    pub fn is_value(&self) -> bool {
        !matches!(self, StackType::None)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            StackType::Int32 | StackType::Int64 | StackType::NativeInt
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, StackType::Float32 | StackType::Float64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Fits a single 32-bit preferred slot: integers, addresses, references.
    pub fn is_word(&self) -> bool {
        matches!(
            self,
            StackType::Int32
                | StackType::NativeInt
                | StackType::ObjectRef(_)
                | StackType::ManagedPointer(_)
        )
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, StackType::ObjectRef(_) | StackType::ManagedPointer(_))
    }

    pub fn name(&self) -> String {
        match self {
            StackType::None => "none".to_string(),
            StackType::Int32 => "int32".to_string(),
            StackType::Int64 => "int64".to_string(),
            StackType::NativeInt => "native int".to_string(),
            StackType::Float32 => "float32".to_string(),
            StackType::Float64 => "float64".to_string(),
            StackType::ObjectRef(ty) => format!("ref {}", ty.name()),
            StackType::ValueType(ty) => format!("valuetype {}", ty.name()),
            StackType::ManagedPointer(ty) => format!("{}&", ty.name()),
        }
    }
}

impl std::fmt::Display for StackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}
