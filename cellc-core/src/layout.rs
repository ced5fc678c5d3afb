use std::collections::HashMap;

use tracing::{debug, trace};

use crate::logging::category_layout;
use crate::spu::{EncodeError, PatchKind, RegisterMap, SpuInstruction, SpuOpCode, Target};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Routine { epilogue: Option<ObjectId> },
    Block { routine: ObjectId },
    Data,
    /// Located at a fixed distance from another object.
    Derived { parent: ObjectId, delta: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressableObject {
    pub name: String,
    pub kind: ObjectKind,
    offset: Option<u32>,
    pub code: Vec<SpuInstruction>,
    pub data: Vec<u8>,
    /// Size promised by whoever produced the contents, checked by layout.
    pub declared_size: Option<u32>,
}

impl AddressableObject {
    fn new(name: &str, kind: ObjectKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            offset: None,
            code: Vec::new(),
            data: Vec::new(),
            declared_size: None,
        }
    }

    pub fn alignment(&self) -> u32 {
        match self.kind {
            ObjectKind::Block { .. } => 4,
            _ => 16,
        }
    }

    pub fn is_top_level(&self) -> bool {
        matches!(self.kind, ObjectKind::Routine { .. } | ObjectKind::Data)
    }

    pub fn assigned_offset(&self) -> Option<u32> {
        self.offset
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    DuplicateName(String),
    Unassigned(String),
    AlreadyAssigned {
        name: String,
        offset: u32,
    },
    Misaligned {
        name: String,
        offset: u32,
        alignment: u32,
    },
    SizeMismatch {
        name: String,
        declared: u32,
        actual: u32,
    },
    UnresolvedTarget {
        name: String,
        index: usize,
    },
    MissingEpilogue(String),
    /// A routine that was declared but never given any blocks.
    EmptyRoutine(String),
    DisplacementOutOfRange {
        name: String,
        index: usize,
        value: i64,
    },
    ImageTooLarge {
        size: u32,
        limit: u32,
    },
    Encode {
        name: String,
        index: usize,
        source: EncodeError,
    },
}

impl std::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutError::DuplicateName(name) => write!(f, "object '{name}' declared twice"),
            LayoutError::Unassigned(name) => {
                write!(f, "offset of '{name}' read before it was assigned")
            }
            LayoutError::AlreadyAssigned { name, offset } => {
                write!(f, "'{name}' already placed at {offset:#x}")
            }
            LayoutError::Misaligned {
                name,
                offset,
                alignment,
            } => write!(f, "'{name}' at {offset:#x} is not {alignment}-byte aligned"),
            LayoutError::SizeMismatch {
                name,
                declared,
                actual,
            } => write!(f, "'{name}' declared {declared} bytes but holds {actual}"),
            LayoutError::UnresolvedTarget { name, index } => {
                write!(f, "'{name}' instruction {index} still names an IR block")
            }
            LayoutError::MissingEpilogue(name) => {
                write!(f, "'{name}' returns but its routine has no epilogue")
            }
            LayoutError::EmptyRoutine(name) => {
                write!(f, "'{name}' has no code; it was declared but never compiled")
            }
            LayoutError::DisplacementOutOfRange { name, index, value } => write!(
                f,
                "'{name}' instruction {index} displacement {value} does not fit"
            ),
            LayoutError::ImageTooLarge { size, limit } => {
                write!(f, "image of {size:#x} bytes exceeds local store of {limit:#x}")
            }
            LayoutError::Encode {
                name,
                index,
                source,
            } => write!(f, "'{name}' instruction {index}: {source}"),
        }
    }
}

impl std::error::Error for LayoutError {}

pub type LayoutResult<T> = Result<T, LayoutError>;

/// Owns every addressable object of a program.
#[derive(Clone, Debug, Default)]
pub struct ObjectArena {
    objects: Vec<AddressableObject>,
    by_name: HashMap<String, ObjectId>,
}

impl ObjectArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_routine(&mut self, name: &str) -> LayoutResult<ObjectId> {
        self.insert(AddressableObject::new(
            name,
            ObjectKind::Routine { epilogue: None },
        ))
    }

    pub fn add_block(&mut self, routine: ObjectId, name: &str) -> LayoutResult<ObjectId> {
        self.insert(AddressableObject::new(name, ObjectKind::Block { routine }))
    }

    pub fn add_data(&mut self, name: &str, data: Vec<u8>) -> LayoutResult<ObjectId> {
        let mut object = AddressableObject::new(name, ObjectKind::Data);
        object.data = data;
        self.insert(object)
    }

    pub fn add_derived(&mut self, name: &str, parent: ObjectId, delta: u32) -> LayoutResult<ObjectId> {
        self.insert(AddressableObject::new(
            name,
            ObjectKind::Derived { parent, delta },
        ))
    }

    fn insert(&mut self, object: AddressableObject) -> LayoutResult<ObjectId> {
        if self.by_name.contains_key(&object.name) {
            return Err(LayoutError::DuplicateName(object.name));
        }
        let id = ObjectId(self.objects.len());
        self.by_name.insert(object.name.clone(), id);
        self.objects.push(object);
        Ok(id)
    }

    pub fn get(&self, id: ObjectId) -> &AddressableObject {
        &self.objects[id.0]
    }

    pub fn get_mut(&mut self, id: ObjectId) -> &mut AddressableObject {
        &mut self.objects[id.0]
    }

    pub fn find(&self, name: &str) -> Option<ObjectId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Drops every object created at or after `len`.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.objects.len() {
            return;
        }
        for object in self.objects.drain(len..) {
            self.by_name.remove(&object.name);
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> {
        (0..self.objects.len()).map(ObjectId)
    }

    /// Blocks of a routine in creation order.
    pub fn blocks_of(&self, routine: ObjectId) -> Vec<ObjectId> {
        self.ids()
            .filter(|id| matches!(self.get(*id).kind, ObjectKind::Block { routine: r } if r == routine))
            .collect()
    }

    pub fn set_code(&mut self, id: ObjectId, code: Vec<SpuInstruction>) {
        self.objects[id.0].code = code;
    }

    pub fn set_epilogue(&mut self, routine: ObjectId, epilogue: ObjectId) {
        if let ObjectKind::Routine { epilogue: slot } = &mut self.objects[routine.0].kind {
            *slot = Some(epilogue);
        }
    }

    pub fn set_offset(&mut self, id: ObjectId, offset: u32) -> LayoutResult<()> {
        let object = &mut self.objects[id.0];
        if let Some(existing) = object.offset {
            return Err(LayoutError::AlreadyAssigned {
                name: object.name.clone(),
                offset: existing,
            });
        }
        object.offset = Some(offset);
        Ok(())
    }

    pub fn offset(&self, id: ObjectId) -> LayoutResult<u32> {
        let object = self.get(id);
        if let ObjectKind::Derived { parent, delta } = object.kind {
            return Ok(self.offset(parent)? + delta);
        }
        object
            .offset
            .ok_or_else(|| LayoutError::Unassigned(object.name.clone()))
    }

    /// Byte size of the object's contents; a routine spans its blocks.
    pub fn size(&self, id: ObjectId) -> u32 {
        let object = self.get(id);
        match object.kind {
            ObjectKind::Routine { .. } => self.blocks_of(id).into_iter().map(|b| self.size(b)).sum(),
            ObjectKind::Block { .. } => object.code.len() as u32 * 4,
            ObjectKind::Data => object.data.len() as u32,
            ObjectKind::Derived { .. } => 0,
        }
    }
}

struct Patch {
    object: ObjectId,
    index: usize,
    source: u32,
    target: ObjectId,
    kind: PatchKind,
}

/// Assigns offsets to every routine, block and data object starting at
/// `base`, then rewrites each symbolic displacement.
pub fn layout(arena: &mut ObjectArena, base: u32, limit: u32) -> LayoutResult<ProgramImage> {
    let top_level: Vec<ObjectId> = arena
        .ids()
        .filter(|id| arena.get(*id).is_top_level())
        .collect();

    let mut cursor = base;
    let mut patches = Vec::new();
    for id in top_level {
        cursor = base + (cursor - base).next_multiple_of(16);
        arena.set_offset(id, cursor)?;
        let kind = arena.get(id).kind;
        match kind {
            ObjectKind::Routine { epilogue } => {
                let blocks = arena.blocks_of(id);
                if blocks.is_empty() {
                    return Err(LayoutError::EmptyRoutine(arena.get(id).name.clone()));
                }
                let start = cursor;
                for block in blocks {
                    arena.set_offset(block, cursor)?;
                    collect_patches(arena, block, cursor, epilogue, &mut patches)?;
                    cursor += arena.size(block);
                }
                check_size(arena, id, cursor - start)?;
            }
            _ => {
                cursor += arena.size(id);
                check_size(arena, id, arena.size(id))?;
            }
        }
        trace!(
            "{} {} at {:#x}",
            category_layout(),
            arena.get(id).name,
            arena.offset(id)?
        );
    }

    for id in arena.ids().collect::<Vec<_>>() {
        let offset = arena.offset(id)?;
        let object = arena.get(id);
        if offset % object.alignment() != 0 {
            return Err(LayoutError::Misaligned {
                name: object.name.clone(),
                offset,
                alignment: object.alignment(),
            });
        }
    }

    let size = cursor - base;
    if cursor > limit {
        return Err(LayoutError::ImageTooLarge { size: cursor, limit });
    }

    let patch_count = patches.len();
    for patch in patches {
        apply_patch(arena, &patch)?;
    }
    debug!(
        "{} placed {} objects, {} patches, {size:#x} bytes",
        category_layout(),
        arena.len(),
        patch_count
    );

    let objects = arena
        .ids()
        .filter_map(|id| {
            let offset = arena.offset(id).ok()?;
            let object = arena.get(id);
            Some(PlacedObject {
                id,
                name: object.name.clone(),
                kind: object.kind,
                offset,
                code: object.code.clone(),
                data: object.data.clone(),
            })
        })
        .collect();
    Ok(ProgramImage {
        base,
        size,
        objects,
    })
}

fn check_size(arena: &ObjectArena, id: ObjectId, actual: u32) -> LayoutResult<()> {
    let object = arena.get(id);
    match object.declared_size {
        Some(declared) if declared != actual => Err(LayoutError::SizeMismatch {
            name: object.name.clone(),
            declared,
            actual,
        }),
        _ => Ok(()),
    }
}

fn collect_patches(
    arena: &mut ObjectArena,
    block: ObjectId,
    start: u32,
    epilogue: Option<ObjectId>,
    patches: &mut Vec<Patch>,
) -> LayoutResult<()> {
    check_size(arena, block, arena.size(block))?;
    let object = arena.get_mut(block);
    for (index, instruction) in object.code.iter_mut().enumerate() {
        if instruction.opcode == SpuOpCode::Ret {
            let epilogue = epilogue.ok_or_else(|| LayoutError::MissingEpilogue(object.name.clone()))?;
            *instruction = SpuInstruction::with_target(SpuOpCode::Br, None, Target::Object(epilogue));
        }
        let target = match instruction.target {
            None => continue,
            Some(Target::Object(target)) => target,
            Some(Target::Block(_)) => {
                return Err(LayoutError::UnresolvedTarget {
                    name: object.name.clone(),
                    index,
                });
            }
        };
        let Some(kind) = instruction.opcode.patch_kind() else {
            continue;
        };
        patches.push(Patch {
            object: block,
            index,
            source: start + index as u32 * 4,
            target,
            kind,
        });
    }
    Ok(())
}

fn apply_patch(arena: &mut ObjectArena, patch: &Patch) -> LayoutResult<()> {
    let target = arena.offset(patch.target)?;
    let name = arena.get(patch.object).name.clone();
    let value = match patch.kind {
        PatchKind::RelativeWord => {
            let diff = i64::from(target) - i64::from(patch.source);
            if diff % 4 != 0 {
                return Err(LayoutError::Misaligned {
                    name: arena.get(patch.target).name.clone(),
                    offset: target,
                    alignment: 4,
                });
            }
            let words = diff >> 2;
            if !(-(1 << 15)..(1 << 15)).contains(&words) {
                return Err(LayoutError::DisplacementOutOfRange {
                    name,
                    index: patch.index,
                    value: words,
                });
            }
            words as i32
        }
        PatchKind::AbsoluteByte => {
            if target >= 1 << 18 {
                return Err(LayoutError::DisplacementOutOfRange {
                    name,
                    index: patch.index,
                    value: i64::from(target),
                });
            }
            target as i32
        }
    };
    arena.get_mut(patch.object).code[patch.index].constant = value;
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlacedObject {
    pub id: ObjectId,
    pub name: String,
    pub kind: ObjectKind,
    pub offset: u32,
    pub code: Vec<SpuInstruction>,
    pub data: Vec<u8>,
}

impl PlacedObject {
    /// Machine words of a code block.
    pub fn encode(&self, map: &dyn RegisterMap) -> LayoutResult<Vec<u32>> {
        self.code
            .iter()
            .enumerate()
            .map(|(index, instruction)| {
                instruction
                    .encode(map)
                    .map_err(|source| LayoutError::Encode {
                        name: self.name.clone(),
                        index,
                        source,
                    })
            })
            .collect()
    }
}

/// Laid-out program: every placed object with its final offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramImage {
    pub base: u32,
    pub size: u32,
    pub objects: Vec<PlacedObject>,
}

impl ProgramImage {
    pub fn object(&self, name: &str) -> Option<&PlacedObject> {
        self.objects.iter().find(|object| object.name == name)
    }

    /// Big-endian bytes of the whole image, from `base` to the end.
    pub fn to_bytes(&self, map: &dyn RegisterMap) -> LayoutResult<Vec<u8>> {
        let mut out = vec![0u8; self.size as usize];
        for object in &self.objects {
            let start = (object.offset - self.base) as usize;
            match object.kind {
                ObjectKind::Block { .. } => {
                    for (index, word) in object.encode(map)?.into_iter().enumerate() {
                        let at = start + index * 4;
                        out[at..at + 4].copy_from_slice(&word.to_be_bytes());
                    }
                }
                ObjectKind::Data => {
                    out[start..start + object.data.len()].copy_from_slice(&object.data);
                }
                ObjectKind::Routine { .. } | ObjectKind::Derived { .. } => {}
            }
        }
        Ok(out)
    }
}
