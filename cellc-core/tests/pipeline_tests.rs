mod common;
use common::*;

fn new_builder() -> ProgramBuilder {
    ProgramBuilder::new(CompileOptions::default()).expect("default options should be valid")
}

fn placed<'a>(image: &'a ProgramImage, name: &str) -> &'a PlacedObject {
    image.object(name).expect("object should be placed")
}

/// Byte address a patched relative instruction lands on.
fn relative_destination(image: &ProgramImage, block: &str, index: usize) -> i64 {
    let object = placed(image, block);
    let words = object
        .encode(&register_map())
        .expect("encoding should succeed");
    let source = i64::from(object.offset) + index as i64 * 4;
    source + i64::from(decode_i16_field(words[index])) * 4
}

#[test]
fn max_compiles_to_a_patched_image() {
    let mut builder = new_builder();
    let compiled = builder
        .compile(
            static_method("max", &[], TypeRef::I4),
            &body(MAX_SOURCE, Vec::new()),
            &MetadataTable::new(),
        )
        .expect("compilation should succeed");
    assert_eq!(compiled.ir.blocks.len(), 4);
    assert_eq!(compiled.selected.blocks.len(), 4);

    let image = builder.finish().expect("layout should succeed");

    let entry = placed(&image, "max#IL_0000");
    assert_eq!(entry.code[3].opcode, SpuOpCode::Brz);
    assert_eq!(
        relative_destination(&image, "max#IL_0000", 3),
        i64::from(placed(&image, "max#IL_0007").offset)
    );

    let taken = placed(&image, "max#IL_0004");
    assert_eq!(taken.code[2].opcode, SpuOpCode::Br);
    assert_eq!(
        relative_destination(&image, "max#IL_0004", 2),
        i64::from(placed(&image, "max#IL_0008").offset)
    );

    let exit = placed(&image, "max#IL_0008");
    assert_eq!(exit.code[1].opcode, SpuOpCode::Br);
    assert_eq!(
        relative_destination(&image, "max#IL_0008", 1),
        i64::from(placed(&image, "max#epilogue").offset)
    );

    assert_eq!(placed(&image, "max").offset, placed(&image, "max#prologue").offset);
    let bytes = image
        .to_bytes(&register_map())
        .expect("image should encode");
    assert_eq!(bytes.len() as u32, image.size);
    assert_eq!(image.size % 4, 0);
}

#[test]
fn calls_link_to_the_callee_routine() {
    let mut table = MetadataTable::new();
    let callee = MethodDef::new_static("sub", params(&[TypeRef::I4, TypeRef::I4]), TypeRef::I4);
    let token = table.add_method(callee.clone());

    let mut builder = new_builder();
    builder
        .declare_routine(&callee)
        .expect("declaring the callee should succeed");
    builder
        .compile(
            static_method("caller", &[TypeRef::I4], TypeRef::I4),
            &body(&format!("ldarg.0\nldc.i4.1\ncall {token:#x}\nret"), Vec::new()),
            &table,
        )
        .expect("caller should compile");
    builder
        .compile(
            std::sync::Arc::new(callee),
            &body("ldarg.0\nldarg.1\nsub\nret", Vec::new()),
            &table,
        )
        .expect("callee should compile");
    assert_eq!(builder.routines().len(), 2);
    assert!(builder.routine("sub").is_some());

    let image = builder.finish().expect("layout should succeed");
    assert!(placed(&image, "sub").offset < placed(&image, "caller").offset);

    let body = placed(&image, "caller#IL_0000");
    let index = body
        .code
        .iter()
        .position(|instruction| instruction.opcode == SpuOpCode::Brsl)
        .expect("caller should branch and link");
    assert_eq!(
        relative_destination(&image, "caller#IL_0000", index),
        i64::from(placed(&image, "sub").offset)
    );
}

#[test]
fn declared_routines_must_be_compiled_before_layout() {
    let mut table = MetadataTable::new();
    let callee = MethodDef::new_static("never", params(&[]), TypeRef::I4);
    let token = table.add_method(callee.clone());

    let mut builder = new_builder();
    builder
        .declare_routine(&callee)
        .expect("declaring the callee should succeed");
    builder
        .compile(
            static_method("caller", &[], TypeRef::I4),
            &body(&format!("call {token:#x}\nret"), Vec::new()),
            &table,
        )
        .expect("caller should compile");

    let err = builder.finish().expect_err("layout should fail");
    assert_eq!(err.routine, "never");
    assert_eq!(
        err.kind,
        CompileErrorKind::Layout(LayoutError::EmptyRoutine("never".to_string()))
    );
}

#[test]
fn static_fields_are_laid_out_as_data() {
    let mut table = MetadataTable::new();
    let field = FieldDef::new_static("Counter", "hits", TypeRef::I4);
    let token = table.add_field(field.clone());

    let mut builder = new_builder();
    builder
        .declare_static_field(&field)
        .expect("declaring the field should succeed");
    builder
        .compile(
            static_method("bump", &[], TypeRef::Void),
            &body(
                &format!("ldsfld {token:#x}\nldc.i4.1\nadd\nstsfld {token:#x}\nret"),
                Vec::new(),
            ),
            &table,
        )
        .expect("compilation should succeed");

    let image = builder.finish().expect("layout should succeed");
    let hits = placed(&image, "Counter::hits");
    assert_eq!(hits.data, vec![0; 16]);
    assert_eq!(hits.offset % 16, 0);
    assert_eq!(
        relative_destination(&image, "bump#IL_0000", 0),
        i64::from(hits.offset)
    );
}

#[test]
fn routines_compile_only_once() {
    let mut builder = new_builder();
    let table = MetadataTable::new();
    let source = body(MAX_SOURCE, Vec::new());
    builder
        .compile(static_method("max", &[], TypeRef::I4), &source, &table)
        .expect("first compilation should succeed");
    let err = builder
        .compile(static_method("max", &[], TypeRef::I4), &source, &table)
        .expect_err("second compilation should fail");
    assert_eq!(err.routine, "max");
    assert_eq!(err.kind, CompileErrorKind::AlreadyCompiled);
}

#[test]
fn build_errors_name_the_routine() {
    let mut builder = new_builder();
    let err = builder
        .compile(
            static_method("broken", &[], TypeRef::Void),
            &body("pop\nret", Vec::new()),
            &MetadataTable::new(),
        )
        .expect_err("compilation should fail");
    assert_eq!(err.routine, "broken");
    assert!(matches!(err.kind, CompileErrorKind::Build(_)));
    assert!(err.to_string().starts_with("broken: "));
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn selection_errors_surface_through_the_builder() {
    let mut builder = new_builder();
    let err = builder
        .compile(
            static_method("halve", &[TypeRef::I4], TypeRef::I4),
            &body("ldarg.0\nldc.i4.2\ndiv\nret", Vec::new()),
            &MetadataTable::new(),
        )
        .expect_err("compilation should fail");
    match err.kind {
        CompileErrorKind::Selection(errors) => {
            assert_eq!(errors.routine, "halve");
            assert_eq!(errors.errors.len(), 1);
            assert_eq!(errors.errors[0].code, IrCode::Div);
        }
        other => panic!("expected a selection error, got {other:?}"),
    }
}

#[test]
fn failed_selection_leaves_the_routine_free_to_retry() {
    let mut builder = new_builder();
    let table = MetadataTable::new();
    builder
        .compile(
            static_method("halve", &[TypeRef::I4], TypeRef::I4),
            &body("ldarg.0\nldc.i4.2\ndiv\nret", Vec::new()),
            &table,
        )
        .expect_err("compilation should fail");
    assert!(builder.arena().find("halve").is_some());
    assert!(builder.arena().find("halve#prologue").is_none());
    assert!(builder.arena().find("halve#IL_0000").is_none());
    assert!(builder.arena().find("halve#epilogue").is_none());

    builder
        .compile(
            static_method("halve", &[TypeRef::I4], TypeRef::I4),
            &body("ldarg.0\nldc.i4.1\nshr\nret", Vec::new()),
            &table,
        )
        .expect("retry should succeed");
    let image = builder.finish().expect("layout should succeed");
    assert_eq!(placed(&image, "halve").offset, placed(&image, "halve#prologue").offset);
}

#[test]
fn base_address_offsets_every_object() {
    let options = CompileOptions {
        base_address: 0x1000,
        ..CompileOptions::default()
    };
    let mut builder = ProgramBuilder::new(options).expect("options should be valid");
    builder
        .compile(
            static_method("max", &[], TypeRef::I4),
            &body(MAX_SOURCE, Vec::new()),
            &MetadataTable::new(),
        )
        .expect("compilation should succeed");
    let image = builder.finish().expect("layout should succeed");
    assert_eq!(image.base, 0x1000);
    assert_eq!(placed(&image, "max").offset, 0x1000);
    assert!(image.objects.iter().all(|object| object.offset >= 0x1000));
}

#[test]
fn options_round_trip_through_json() {
    let options = CompileOptions {
        base_address: 0x200,
        argument_register_count: 8,
        ..CompileOptions::default()
    };
    let text = options.to_json().expect("options should serialize");
    let parsed = CompileOptions::from_json(&text).expect("options should parse");
    assert_eq!(parsed, options);

    let defaults = CompileOptions::from_json("{}").expect("empty options should parse");
    assert_eq!(defaults, CompileOptions::default());
    assert_eq!(defaults.return_register(), 3);
    assert_eq!(defaults.argument_register(1), Some(4));
    assert_eq!(defaults.argument_register(72), None);
}

#[test]
fn invalid_options_are_rejected() {
    let misaligned = CompileOptions::from_json(r#"{"base_address": 8}"#)
        .expect_err("misaligned base should fail");
    assert!(matches!(misaligned, ConfigError::Invalid(_)));

    let reserved = CompileOptions::from_json(r#"{"first_argument_register": 2}"#)
        .expect_err("reserved register should fail");
    assert!(matches!(reserved, ConfigError::Invalid(_)));

    let garbage = CompileOptions::from_json("not json").expect_err("garbage should fail");
    assert!(matches!(garbage, ConfigError::Parse(_)));

    let options = CompileOptions {
        link_area_size: 8,
        ..CompileOptions::default()
    };
    assert!(ProgramBuilder::new(options).is_err());
}
