use std::sync::Arc;

use tracing::debug;

use crate::config::{CompileOptions, ConfigError};
use crate::ir::{BuildError, IrBuilder, MethodIr};
use crate::layout::{LayoutError, LayoutResult, ObjectArena, ObjectId, ProgramImage, layout};
use crate::logging::{category_layout, category_select, routine_label};
use crate::metadata::{FieldDef, MethodBody, MethodDef, TokenResolver};
use crate::spu::{InstructionSelector, SelectedRoutine, SelectionErrors};

#[derive(Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    Build(BuildError),
    Selection(SelectionErrors),
    Layout(LayoutError),
    AlreadyCompiled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub routine: String,
    pub kind: CompileErrorKind,
}

impl CompileError {
    fn new(routine: &str, kind: CompileErrorKind) -> Self {
        Self {
            routine: routine.to_string(),
            kind,
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            CompileErrorKind::Build(err) => write!(f, "{}: {err}", self.routine),
            CompileErrorKind::Selection(err) => write!(f, "{err}"),
            CompileErrorKind::Layout(err) => write!(f, "{}: {err}", self.routine),
            CompileErrorKind::AlreadyCompiled => {
                write!(f, "{} was already compiled", self.routine)
            }
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            CompileErrorKind::Build(err) => Some(err),
            CompileErrorKind::Selection(err) => Some(err),
            CompileErrorKind::Layout(err) => Some(err),
            CompileErrorKind::AlreadyCompiled => None,
        }
    }
}

/// One routine after tree building and instruction selection.
#[derive(Clone, Debug)]
pub struct CompiledRoutine {
    pub routine: ObjectId,
    pub ir: MethodIr,
    pub selected: SelectedRoutine,
}

/// Drives decode, tree building, selection and layout over a set of
/// routines that share one object arena.
///
/// Callees and static fields must be declared before a routine that
/// references them is compiled; declaration order is layout order.
pub struct ProgramBuilder {
    options: CompileOptions,
    arena: ObjectArena,
    routines: Vec<CompiledRoutine>,
}

impl ProgramBuilder {
    pub fn new(options: CompileOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self {
            options,
            arena: ObjectArena::new(),
            routines: Vec::new(),
        })
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn arena(&self) -> &ObjectArena {
        &self.arena
    }

    pub fn routines(&self) -> &[CompiledRoutine] {
        &self.routines
    }

    pub fn routine(&self, name: &str) -> Option<&CompiledRoutine> {
        self.routines
            .iter()
            .find(|compiled| compiled.selected.name == name)
    }

    pub fn declare_routine(&mut self, method: &MethodDef) -> LayoutResult<ObjectId> {
        let symbol = method.symbol();
        match self.arena.find(&symbol) {
            Some(id) => Ok(id),
            None => self.arena.add_routine(&symbol),
        }
    }

    /// Reserves zeroed storage for a static field, at least one quadword.
    pub fn declare_static_field(&mut self, field: &FieldDef) -> LayoutResult<ObjectId> {
        let symbol = field.symbol();
        if let Some(id) = self.arena.find(&symbol) {
            return Ok(id);
        }
        let size = field.ty.size().max(16).next_multiple_of(16);
        self.arena.add_data(&symbol, vec![0; size as usize])
    }

    pub fn compile(
        &mut self,
        method: Arc<MethodDef>,
        body: &MethodBody,
        resolver: &dyn TokenResolver,
    ) -> Result<&CompiledRoutine, CompileError> {
        let name = method.symbol();
        let fail = |kind| CompileError::new(&name, kind);

        let routine = self
            .declare_routine(&method)
            .map_err(|err| fail(CompileErrorKind::Layout(err)))?;
        if self.routines.iter().any(|compiled| compiled.routine == routine) {
            return Err(fail(CompileErrorKind::AlreadyCompiled));
        }

        let mut ir = IrBuilder::new(method, body, resolver)
            .build()
            .map_err(|err| fail(CompileErrorKind::Build(err)))?;
        let selected = InstructionSelector::new(&mut self.arena, &self.options)
            .select(&mut ir, routine)
            .map_err(|err| fail(CompileErrorKind::Selection(err)))?;
        selected.install(&mut self.arena);
        debug!(
            "{} {} {} blocks, {} instructions",
            category_select(),
            routine_label(&name),
            selected.blocks.len(),
            selected.instruction_count()
        );

        let index = self.routines.len();
        self.routines.push(CompiledRoutine {
            routine,
            ir,
            selected,
        });
        Ok(&self.routines[index])
    }

    /// Lays out every declared object and resolves all branch and address
    /// fields.
    pub fn finish(mut self) -> Result<ProgramImage, CompileError> {
        let image = layout(
            &mut self.arena,
            self.options.base_address,
            self.options.local_store_size,
        )
        .map_err(|err| {
            let routine = match &err {
                LayoutError::EmptyRoutine(name) => name.clone(),
                _ => "program".to_string(),
            };
            CompileError::new(&routine, CompileErrorKind::Layout(err))
        })?;
        debug!(
            "{} {} objects, {} bytes",
            category_layout(),
            image.objects.len(),
            image.size
        );
        Ok(image)
    }
}
