use std::collections::HashMap;
use std::sync::Arc;

/// Type handles supplied by the host metadata layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeRef {
    Void,
    Bool,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    I,
    U,
    R4,
    R8,
    Object,
    String,
    Class(Arc<TypeDef>),
    Struct(Arc<TypeDef>),
    Array(Box<TypeRef>),
    ByRef(Box<TypeRef>),
}

impl TypeRef {
    pub fn array_of(element: TypeRef) -> Self {
        TypeRef::Array(Box::new(element))
    }

    pub fn by_ref(pointee: TypeRef) -> Self {
        TypeRef::ByRef(Box::new(pointee))
    }

    /// Storage size in bytes. Reference types are 32-bit addresses.
    pub fn size(&self) -> u32 {
        match self {
            TypeRef::Void => 0,
            TypeRef::Bool | TypeRef::I1 | TypeRef::U1 => 1,
            TypeRef::Char | TypeRef::I2 | TypeRef::U2 => 2,
            TypeRef::I4 | TypeRef::U4 | TypeRef::R4 | TypeRef::I | TypeRef::U => 4,
            TypeRef::I8 | TypeRef::U8 | TypeRef::R8 => 8,
            TypeRef::Object
            | TypeRef::String
            | TypeRef::Class(_)
            | TypeRef::Array(_)
            | TypeRef::ByRef(_) => 4,
            TypeRef::Struct(def) => def.size,
        }
    }

    pub fn is_value_type(&self) -> bool {
        matches!(self, TypeRef::Struct(_))
    }

    pub fn name(&self) -> String {
        match self {
            TypeRef::Void => "void".to_string(),
            TypeRef::Bool => "bool".to_string(),
            TypeRef::Char => "char".to_string(),
            TypeRef::I1 => "int8".to_string(),
            TypeRef::U1 => "uint8".to_string(),
            TypeRef::I2 => "int16".to_string(),
            TypeRef::U2 => "uint16".to_string(),
            TypeRef::I4 => "int32".to_string(),
            TypeRef::U4 => "uint32".to_string(),
            TypeRef::I8 => "int64".to_string(),
            TypeRef::U8 => "uint64".to_string(),
            TypeRef::I => "native int".to_string(),
            TypeRef::U => "native uint".to_string(),
            TypeRef::R4 => "float32".to_string(),
            TypeRef::R8 => "float64".to_string(),
            TypeRef::Object => "object".to_string(),
            TypeRef::String => "string".to_string(),
            TypeRef::Class(def) | TypeRef::Struct(def) => def.name.clone(),
            TypeRef::Array(element) => format!("{}[]", element.name()),
            TypeRef::ByRef(pointee) => format!("{}&", pointee.name()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub size: u32,
}

impl TypeDef {
    /// Lays fields out in declaration order at their natural alignment and
    /// rounds the total up to a quadword.
    pub fn sequential(name: &str, fields: Vec<(&str, TypeRef)>) -> Self {
        let mut offset = 0u32;
        let mut laid_out = Vec::with_capacity(fields.len());
        for (field_name, ty) in fields {
            let align = ty.size().clamp(1, 16).next_power_of_two();
            offset = offset.next_multiple_of(align);
            let size = ty.size();
            laid_out.push(FieldDef {
                name: field_name.to_string(),
                declaring_type: name.to_string(),
                ty,
                offset,
                is_static: false,
            });
            offset += size;
        }
        Self {
            name: name.to_string(),
            fields: laid_out,
            size: offset.next_multiple_of(16).max(16),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub declaring_type: String,
    pub ty: TypeRef,
    pub offset: u32,
    pub is_static: bool,
}

impl FieldDef {
    pub fn new_static(declaring_type: &str, name: &str, ty: TypeRef) -> Self {
        Self {
            name: name.to_string(),
            declaring_type: declaring_type.to_string(),
            ty,
            offset: 0,
            is_static: true,
        }
    }

    /// Name of the addressable object that holds a static field.
    pub fn symbol(&self) -> String {
        format!("{}::{}", self.declaring_type, self.name)
    }
}

/// Hand-written substitutes that lower to dedicated SPU instructions instead
/// of a call sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intrinsic {
    Stop(u16),
    ReadChannel(u8),
    WriteChannel(u8),
    ChannelCount(u8),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterInfo {
    pub name: String,
    pub ty: TypeRef,
}

impl ParameterInfo {
    pub fn new(name: &str, ty: TypeRef) -> Self {
        Self {
            name: name.to_string(),
            ty,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDef {
    pub name: String,
    pub declaring_type: Option<TypeRef>,
    pub parameters: Vec<ParameterInfo>,
    pub has_this: bool,
    pub return_type: TypeRef,
    pub intrinsic: Option<Intrinsic>,
}

impl MethodDef {
    pub fn new_static(name: &str, parameters: Vec<ParameterInfo>, return_type: TypeRef) -> Self {
        Self {
            name: name.to_string(),
            declaring_type: None,
            parameters,
            has_this: false,
            return_type,
            intrinsic: None,
        }
    }

    pub fn new_instance(
        declaring_type: TypeRef,
        name: &str,
        parameters: Vec<ParameterInfo>,
        return_type: TypeRef,
    ) -> Self {
        Self {
            name: name.to_string(),
            declaring_type: Some(declaring_type),
            parameters,
            has_this: true,
            return_type,
            intrinsic: None,
        }
    }

    pub fn with_intrinsic(mut self, intrinsic: Intrinsic) -> Self {
        self.intrinsic = Some(intrinsic);
        self
    }

    /// Name of the addressable object that holds the routine.
    pub fn symbol(&self) -> String {
        match &self.declaring_type {
            Some(ty) => format!("{}::{}", ty.name(), self.name),
            None => self.name.clone(),
        }
    }

    /// Receiver type as seen by the callee: value types are passed by
    /// reference.
    pub fn this_type(&self) -> Option<TypeRef> {
        if !self.has_this {
            return None;
        }
        Some(match &self.declaring_type {
            Some(ty) if ty.is_value_type() => TypeRef::by_ref(ty.clone()),
            Some(ty) => ty.clone(),
            None => TypeRef::Object,
        })
    }

    /// Argument slot types including the implicit receiver at slot 0.
    pub fn argument_types(&self) -> Vec<TypeRef> {
        let mut out = Vec::with_capacity(self.parameters.len() + 1);
        out.extend(self.this_type());
        out.extend(self.parameters.iter().map(|param| param.ty.clone()));
        out
    }

    pub fn argument_count(&self) -> usize {
        self.parameters.len() + usize::from(self.has_this)
    }
}

/// Raw instruction bytes plus declared locals. `length` may be shorter than
/// the buffer when the host hands over padded storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodBody {
    pub code: Vec<u8>,
    pub length: usize,
    pub locals: Vec<TypeRef>,
}

impl MethodBody {
    pub fn new(code: Vec<u8>, locals: Vec<TypeRef>) -> Self {
        let length = code.len();
        Self {
            code,
            length,
            locals,
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length.min(self.code.len());
        self
    }

    pub fn instructions(&self) -> &[u8] {
        &self.code[..self.length]
    }
}

pub trait TokenResolver {
    fn resolve_field(&self, token: u32) -> Option<Arc<FieldDef>>;
    fn resolve_method(&self, token: u32) -> Option<Arc<MethodDef>>;
    fn resolve_type(&self, token: u32) -> Option<TypeRef>;
    fn resolve_string(&self, token: u32) -> Option<String>;
}

#[derive(Clone, Debug)]
enum TokenEntry {
    Field(Arc<FieldDef>),
    Method(Arc<MethodDef>),
    Type(TypeRef),
    String(String),
}

/// In-memory token table for hosts that pre-resolve metadata.
#[derive(Clone, Debug, Default)]
pub struct MetadataTable {
    entries: HashMap<u32, TokenEntry>,
}

impl MetadataTable {
    pub const FIELD_TABLE: u32 = 0x0400_0000;
    pub const METHOD_TABLE: u32 = 0x0600_0000;
    pub const TYPE_TABLE: u32 = 0x0200_0000;
    pub const STRING_HEAP: u32 = 0x7000_0000;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(&mut self, field: FieldDef) -> u32 {
        self.insert(Self::FIELD_TABLE, TokenEntry::Field(Arc::new(field)))
    }

    pub fn add_method(&mut self, method: MethodDef) -> u32 {
        self.insert(Self::METHOD_TABLE, TokenEntry::Method(Arc::new(method)))
    }

    pub fn add_type(&mut self, ty: TypeRef) -> u32 {
        self.insert(Self::TYPE_TABLE, TokenEntry::Type(ty))
    }

    pub fn add_string(&mut self, value: &str) -> u32 {
        self.insert(Self::STRING_HEAP, TokenEntry::String(value.to_string()))
    }

    pub fn method(&self, token: u32) -> Option<Arc<MethodDef>> {
        self.resolve_method(token)
    }

    fn insert(&mut self, table: u32, entry: TokenEntry) -> u32 {
        let row = self
            .entries
            .keys()
            .filter(|token| *token & 0xFF00_0000 == table)
            .count() as u32
            + 1;
        let token = table | row;
        self.entries.insert(token, entry);
        token
    }
}

impl TokenResolver for MetadataTable {
    fn resolve_field(&self, token: u32) -> Option<Arc<FieldDef>> {
        match self.entries.get(&token)? {
            TokenEntry::Field(field) => Some(field.clone()),
            _ => None,
        }
    }

    fn resolve_method(&self, token: u32) -> Option<Arc<MethodDef>> {
        match self.entries.get(&token)? {
            TokenEntry::Method(method) => Some(method.clone()),
            _ => None,
        }
    }

    fn resolve_type(&self, token: u32) -> Option<TypeRef> {
        match self.entries.get(&token)? {
            TokenEntry::Type(ty) => Some(ty.clone()),
            _ => None,
        }
    }

    fn resolve_string(&self, token: u32) -> Option<String> {
        match self.entries.get(&token)? {
            TokenEntry::String(value) => Some(value.clone()),
            _ => None,
        }
    }
}
