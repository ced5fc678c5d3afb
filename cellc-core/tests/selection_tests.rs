mod common;
use common::*;

fn select_source(
    name: &str,
    args: &[TypeRef],
    ret: TypeRef,
    source: &str,
) -> (ObjectArena, SelectedRoutine) {
    let mut ir = build_source(static_method(name, args, ret), source, Vec::new());
    select_ok(&mut ir)
}

fn virtual_reg(index: u32) -> Register {
    Register::Virtual(VirtualRegister(index))
}

#[test]
fn prologue_and_epilogue_frame_the_routine() {
    let (_, selected) = select_source(
        "sum",
        &[TypeRef::I4, TypeRef::I4],
        TypeRef::I4,
        "ldarg.0\nldarg.1\nadd\nret",
    );

    assert_eq!(selected.frame_size, 32);
    assert_eq!(
        mnemonics(&selected.prologue.instructions),
        vec!["stqd", "stqd", "ai", "ori", "ori"]
    );
    let prologue = &selected.prologue.instructions;
    assert_eq!(prologue[0].rt, Some(Register::LR));
    assert_eq!(prologue[0].constant, 1);
    assert_eq!(prologue[1].constant, -2);
    assert_eq!(prologue[2].constant, -32);
    assert_eq!(prologue[3].ra, Some(Register::Hardware(3)));
    assert_eq!(prologue[4].ra, Some(Register::Hardware(4)));

    assert_eq!(
        mnemonics(&selected.epilogue.instructions),
        vec!["ai", "lqd", "bi"]
    );
    assert_eq!(selected.epilogue.instructions[0].constant, 32);
    assert_eq!(selected.epilogue.instructions[2].ra, Some(Register::LR));
}

#[test]
fn word_multiply_sums_three_partial_products() {
    let (_, selected) = select_source(
        "product",
        &[TypeRef::I4, TypeRef::I4],
        TypeRef::I4,
        "ldarg.0\nldarg.1\nmul\nret",
    );

    assert_eq!(
        body_mnemonics(&selected),
        vec!["mpyh", "mpyh", "mpyu", "a", "a", "ori", "ret"]
    );
    let body = &selected.blocks[0].instructions;
    assert_eq!(body[0].ra, Some(virtual_reg(0)));
    assert_eq!(body[0].rb, Some(virtual_reg(1)));
    assert_eq!(body[1].ra, Some(virtual_reg(1)));
    assert_eq!(body[1].rb, Some(virtual_reg(0)));
    assert_eq!(body[2].ra, Some(virtual_reg(0)));
    assert_eq!(body[2].rb, Some(virtual_reg(1)));
    assert_eq!(body[3].ra, body[0].rt);
    assert_eq!(body[3].rb, body[1].rt);
    assert_eq!(body[4].ra, body[3].rt);
    assert_eq!(body[4].rb, body[2].rt);
    assert_eq!(body[5].rt, Some(Register::Hardware(3)));
    assert_eq!(body[5].ra, body[4].rt);
}

#[test]
fn float_compare_masks_down_to_one_bit() {
    let (_, selected) = select_source(
        "above",
        &[TypeRef::R4, TypeRef::R4],
        TypeRef::I4,
        "ldarg.0\nldarg.1\ncgt\nret",
    );
    assert_eq!(body_mnemonics(&selected), vec!["fcgt", "andi", "ori", "ret"]);
    assert_eq!(selected.blocks[0].instructions[1].constant, 1);
}

#[test]
fn less_than_swaps_the_operands() {
    let (_, selected) = select_source(
        "below",
        &[TypeRef::I4, TypeRef::I4],
        TypeRef::I4,
        "ldarg.0\nldarg.1\nclt\nret",
    );
    let compare = &selected.blocks[0].instructions[0];
    assert_eq!(compare.opcode, SpuOpCode::Cgt);
    assert_eq!(compare.ra, Some(virtual_reg(1)));
    assert_eq!(compare.rb, Some(virtual_reg(0)));
}

#[test]
fn int64_equality_needs_both_words() {
    let (_, selected) = select_source(
        "same",
        &[TypeRef::I8, TypeRef::I8],
        TypeRef::I4,
        "ldarg.0\nldarg.1\nceq\nret",
    );
    assert_eq!(
        body_mnemonics(&selected),
        vec!["ceq", "rotqbyi", "and", "andi", "ori", "ret"]
    );
    assert_eq!(selected.blocks[0].instructions[1].constant, 4);
}

#[test]
fn double_ordering_compares_sign_adjusted_keys() {
    let (_, selected) = select_source(
        "greater",
        &[TypeRef::R8, TypeRef::R8],
        TypeRef::I4,
        "ldarg.0\nldarg.1\ncgt\nret",
    );
    let ops = body_mnemonics(&selected);
    let count = |name: &str| ops.iter().filter(|op| **op == name).count();

    assert_eq!(count("rotmai"), 2);
    assert_eq!(count("shufb"), 2);
    assert_eq!(count("xor"), 2);
    assert_eq!(count("ceq"), 1);
    assert_eq!(count("clgt"), 2);
    assert_eq!(count("cgt"), 0);
    assert_eq!(&ops[ops.len() - 3..], &["andi", "ori", "ret"]);
}

#[test]
fn conditional_branches_target_block_objects() {
    let mut ir = build_source(static_method("max", &[], TypeRef::I4), MAX_SOURCE, Vec::new());
    let (arena, selected) = select_ok(&mut ir);

    assert_eq!(selected.blocks.len(), 4);
    let first = &selected.blocks[0].instructions;
    assert_eq!(mnemonics(first), vec!["il", "il", "cgt", "brz"]);
    assert_eq!(
        first[3].target,
        Some(Target::Object(
            arena.find("max#IL_0007").expect("block object should exist")
        ))
    );

    let second = &selected.blocks[1].instructions;
    assert_eq!(mnemonics(second), vec!["il", "ori", "br"]);
    assert_eq!(
        second[2].target,
        Some(Target::Object(
            arena.find("max#IL_0008").expect("block object should exist")
        ))
    );

    assert!(
        selected
            .instructions()
            .all(|instruction| !matches!(instruction.target, Some(Target::Block(_))))
    );
}

#[test]
fn unsupported_constructs_are_reported_together() {
    let mut ir = build_source(
        static_method("ratio", &[TypeRef::I4, TypeRef::I4], TypeRef::I4),
        "ldarg.0\nldarg.1\ndiv\nldarg.0\nldarg.1\nrem\nadd\nret",
        Vec::new(),
    );
    let (_, result) = select(&mut ir, &[]);
    let err = result.expect_err("selection should fail");

    assert_eq!(err.routine, "ratio");
    let found: Vec<(IrCode, u32)> = err
        .errors
        .iter()
        .map(|error| (error.code, error.offset))
        .collect();
    assert_eq!(found, vec![(IrCode::Div, 2), (IrCode::Rem, 5)]);
    assert!(err.to_string().contains("2 unsupported"));
}

#[test]
fn escaping_locals_live_in_the_frame() {
    let mut ir = build_source(
        static_method("poke", &[], TypeRef::I4),
        "ldloca.s 0\nldc.i4.5\nstind.i4\nldloc.0\nret",
        vec![TypeRef::I4, TypeRef::I4],
    );
    let (_, selected) = select_ok(&mut ir);

    assert_eq!(ir.variables.get(ir.locals[0]).storage, Storage::Frame(32));
    assert!(matches!(
        ir.variables.get(ir.locals[1]).storage,
        Storage::Register(_)
    ));
    assert_eq!(selected.frame_size, 48);
    assert_eq!(selected.prologue.instructions[1].constant, -3);
    assert_eq!(
        body_mnemonics(&selected),
        vec![
            "ai", "il", "lqd", "cwd", "shufb", "stqd", "ai", "lqd", "rotqby", "ori", "ret"
        ]
    );
    let address = &selected.blocks[0].instructions[0];
    assert_eq!(address.ra, Some(Register::SP));
    assert_eq!(address.constant, 32);
}

#[test]
fn calls_pass_arguments_in_abi_registers() {
    let mut table = MetadataTable::new();
    let callee = MethodDef::new_static("sub", params(&[TypeRef::I4, TypeRef::I4]), TypeRef::I4);
    let token = table.add_method(callee.clone());
    let mut ir = build(
        static_method("caller", &[TypeRef::I4], TypeRef::I4),
        &body(&format!("ldarg.0\nldc.i4.1\ncall {token:#x}\nret"), Vec::new()),
        &table,
    );
    let (arena, result) = select(&mut ir, &[&callee]);
    let selected = result.expect("selection should succeed");

    let body = &selected.blocks[0].instructions;
    assert_eq!(
        mnemonics(body),
        vec!["il", "ori", "ori", "brsl", "ori", "ori", "ret"]
    );
    assert_eq!(body[1].rt, Some(Register::Hardware(3)));
    assert_eq!(body[2].rt, Some(Register::Hardware(4)));
    assert_eq!(body[3].rt, Some(Register::LR));
    assert_eq!(
        body[3].target,
        Some(Target::Object(arena.find("sub").expect("callee should exist")))
    );
    assert_eq!(body[4].ra, Some(Register::Hardware(3)));
}

#[test]
fn calls_to_undeclared_routines_are_rejected() {
    let mut table = MetadataTable::new();
    let token = table.add_method(MethodDef::new_static("elsewhere", Vec::new(), TypeRef::Void));
    let mut ir = build(
        static_method("caller", &[], TypeRef::Void),
        &body(&format!("call {token:#x}\nret"), Vec::new()),
        &table,
    );
    let (_, result) = select(&mut ir, &[]);
    let err = result.expect_err("selection should fail");
    assert_eq!(err.errors.len(), 1);
    assert_eq!(err.errors[0].code, IrCode::Call);
    assert!(err.errors[0].reason.contains("elsewhere"));
}

#[test]
fn channel_intrinsics_lower_to_channel_instructions() {
    let mut table = MetadataTable::new();
    let read = table.add_method(
        MethodDef::new_static("read_mailbox", Vec::new(), TypeRef::U4)
            .with_intrinsic(Intrinsic::ReadChannel(29)),
    );
    let write = table.add_method(
        MethodDef::new_static("write_mailbox", params(&[TypeRef::U4]), TypeRef::Void)
            .with_intrinsic(Intrinsic::WriteChannel(28)),
    );
    let halt = table.add_method(
        MethodDef::new_static("halt", Vec::new(), TypeRef::Void)
            .with_intrinsic(Intrinsic::Stop(0x2000)),
    );
    let mut ir = build(
        static_method("echo", &[], TypeRef::Void),
        &body(
            &format!("call {read:#x}\ncall {write:#x}\ncall {halt:#x}\nret"),
            Vec::new(),
        ),
        &table,
    );
    let (_, selected) = select_ok(&mut ir);

    let ops = body_mnemonics(&selected);
    assert_eq!(ops, vec!["rdch", "wrch", "stop", "ret"]);
    let body: Vec<&SpuInstruction> = selected.instructions().collect();
    let rdch = body
        .iter()
        .find(|instruction| instruction.opcode == SpuOpCode::Rdch)
        .expect("rdch should be emitted");
    assert_eq!(rdch.ra, Some(Register::Hardware(29)));
    let wrch = body
        .iter()
        .find(|instruction| instruction.opcode == SpuOpCode::Wrch)
        .expect("wrch should be emitted");
    assert_eq!(wrch.ra, Some(Register::Hardware(28)));
    assert_eq!(wrch.rt, rdch.rt);
    let stop = body
        .iter()
        .find(|instruction| instruction.opcode == SpuOpCode::Stop)
        .expect("stop should be emitted");
    assert_eq!(stop.constant, 0x2000);
}

#[test]
fn wide_constants_use_ilhu_and_iohl() {
    let (_, selected) = select_source("wide", &[], TypeRef::I4, "ldc.i4 0x12345678\nret");
    let body = &selected.blocks[0].instructions;
    assert_eq!(mnemonics(body), vec!["ilhu", "iohl", "ori", "ret"]);
    assert_eq!(body[0].constant, 0x1234);
    assert_eq!(body[1].constant, 0x5678);
    assert_eq!(body[1].rt, body[0].rt);
}

#[test]
fn doubleword_constants_load_from_a_data_object() {
    let (arena, selected) = select_source(
        "big",
        &[],
        TypeRef::I8,
        "ldc.i8 0x0102030405060708\nret",
    );
    let body = &selected.blocks[0].instructions;
    assert_eq!(mnemonics(body), vec!["lqr", "ori", "ret"]);

    let data = arena.find("big#const0").expect("constant object should exist");
    assert_eq!(body[0].target, Some(Target::Object(data)));
    let object = arena.get(data);
    assert_eq!(object.kind, ObjectKind::Data);
    assert_eq!(object.data.len(), 16);
    assert_eq!(&object.data[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn static_fields_are_read_and_written_through_their_data_object() {
    let mut table = MetadataTable::new();
    let field = FieldDef::new_static("Counter", "hits", TypeRef::I4);
    let token = table.add_field(field.clone());
    let mut ir = build(
        static_method("bump", &[], TypeRef::Void),
        &body(
            &format!("ldsfld {token:#x}\nldc.i4.1\nadd\nstsfld {token:#x}\nret"),
            Vec::new(),
        ),
        &table,
    );

    let mut arena = ObjectArena::new();
    let hits = arena
        .add_data(&field.symbol(), vec![0; 16])
        .expect("declaring the field should succeed");
    let routine = arena
        .add_routine("bump")
        .expect("declaring the routine should succeed");
    let options = CompileOptions::default();
    let selected = InstructionSelector::new(&mut arena, &options)
        .select(&mut ir, routine)
        .expect("selection should succeed");

    let body = &selected.blocks[0].instructions;
    assert_eq!(
        mnemonics(body),
        vec!["lqr", "il", "a", "lqr", "cwd", "shufb", "stqr", "ret"]
    );
    assert_eq!(body[0].target, Some(Target::Object(hits)));
    assert_eq!(body[6].target, Some(Target::Object(hits)));
}

#[test]
fn int_to_long_sign_extends_into_the_high_word() {
    let (_, selected) = select_source(
        "widen",
        &[TypeRef::I4],
        TypeRef::I8,
        "ldarg.0\nconv.i8\nret",
    );
    assert_eq!(
        body_mnemonics(&selected),
        vec!["rotmai", "rotqbyi", "fsmbi", "selb", "ori", "ret"]
    );
    let body = &selected.blocks[0].instructions;
    assert_eq!(body[0].constant, -31);
    assert_eq!(body[1].constant, 12);
    assert_eq!(body[2].constant, 0x0F00);
}

#[test]
fn int_to_double_converts_each_half_exactly() {
    let (_, selected) = select_source(
        "widen",
        &[TypeRef::I4],
        TypeRef::R8,
        "ldarg.0\nconv.r8\nret",
    );
    assert_eq!(
        body_mnemonics(&selected),
        vec![
            "rotmai", "shli", "rotmi", "csflt", "csflt", "fesd", "fesd", "ilhu", "fesd", "dfm",
            "dfa", "ori", "ret"
        ]
    );
    let body = &selected.blocks[0].instructions;
    assert_eq!(body[0].constant, -16);
    assert_eq!(body[1].constant, 16);
    assert_eq!(body[2].constant, -16);
    assert_eq!(body[3].constant, 155);
    assert_eq!(f32::from_bits((body[7].constant as u32) << 16), 65536.0);
    assert_eq!(body[9].ra, body[5].rt);
    assert_eq!(body[10].rb, body[6].rt);
}

#[test]
fn unsigned_int_to_double_shifts_the_high_half_logically() {
    let (_, selected) = select_source(
        "widen",
        &[TypeRef::I4],
        TypeRef::R8,
        "ldarg.0\nconv.r.un\nret",
    );
    let names = body_mnemonics(&selected);
    assert_eq!(names[0], "rotmi");
    assert!(!names.contains(&"rotmai"));
    assert!(!names.contains(&"cuflt"));
}

#[test]
fn double_to_int_truncates_on_the_bit_pattern() {
    let (_, selected) = select_source(
        "narrow",
        &[TypeRef::R8],
        TypeRef::I4,
        "ldarg.0\nconv.i4\nret",
    );
    assert_eq!(
        body_mnemonics(&selected),
        vec![
            "rotmi", "il", "and", "il", "sf", "ilhu", "iohl", "and", "ilhu", "or", "fsmbi",
            "selb", "rotmi", "sfi", "andi", "sfi", "rotqmby", "rotqmbi", "rotqbyi", "rotmai",
            "xor", "sf", "cgti", "andc", "ori", "ret"
        ]
    );
    let body = &selected.blocks[0].instructions;
    assert_eq!(body[0].constant, -20);
    assert_eq!(body[1].constant, 0x7FF);
    assert_eq!(body[3].constant, 1075);
    assert_eq!(body[4].ra, body[2].rt);
    assert_eq!(body[4].rb, body[3].rt);
    assert_eq!(body[10].constant, 0xF000);
    assert_eq!(body[18].constant, 4);
    assert_eq!(body[22].constant, 52);
    assert_eq!(body[23].ra, body[21].rt);
    assert_eq!(body[23].rb, body[22].rt);
}

#[test]
fn double_to_unsigned_skips_the_sign() {
    let (_, selected) = select_source(
        "narrow",
        &[TypeRef::R8],
        TypeRef::I4,
        "ldarg.0\nconv.u2\nret",
    );
    let names = body_mnemonics(&selected);
    assert!(!names.contains(&"frds"));
    assert!(!names.contains(&"xor"));
    let tail: Vec<&str> = names[names.len() - 6..].to_vec();
    assert_eq!(tail, vec!["cgti", "andc", "shli", "rotmi", "ori", "ret"]);
}

#[test]
fn byte_loads_rotate_and_extend() {
    let (_, selected) = select_source(
        "peek",
        &[TypeRef::by_ref(TypeRef::I1)],
        TypeRef::I4,
        "ldarg.0\nldind.i1\nret",
    );
    assert_eq!(
        body_mnemonics(&selected),
        vec!["lqd", "ai", "rotqby", "xsbh", "xshw", "ori", "ret"]
    );
    assert_eq!(selected.blocks[0].instructions[1].constant, -3);
}

#[test]
fn installed_streams_land_in_the_arena() {
    let mut ir = build_source(static_method("max", &[], TypeRef::I4), MAX_SOURCE, Vec::new());
    let (mut arena, selected) = select_ok(&mut ir);
    selected.install(&mut arena);

    let routine = arena.find("max").expect("routine should exist");
    let blocks = arena.blocks_of(routine);
    assert_eq!(blocks.len(), 6);
    assert_eq!(
        arena.get(routine).kind,
        ObjectKind::Routine {
            epilogue: Some(selected.epilogue.object)
        }
    );
    let total: usize = blocks.iter().map(|id| arena.get(*id).code.len()).sum();
    assert_eq!(total, selected.instruction_count());
}
