mod common;
use common::*;

#[test]
fn record_sizes_cover_the_whole_body() {
    let method = static_method("scale", &[TypeRef::I4], TypeRef::I4);
    let body = body(
        "
        ldarg.0
        ldc.i4.s 100
        add
        ldc.i4 100000
        mul
        stloc.0
        ldloc.0
        ret
        ",
        vec![TypeRef::I4],
    );
    let records = decode(&method, &body, &MetadataTable::new()).expect("decode should succeed");

    assert_eq!(records.len(), 8);
    let total: u32 = records.iter().map(|record| record.size).sum();
    assert_eq!(total as usize, body.code.len());
    for pair in records.windows(2) {
        assert_eq!(pair[0].end(), pair[1].offset);
    }
}

#[test]
fn macro_forms_fold_to_general_opcodes() {
    let method = static_method("fold", &[TypeRef::I4, TypeRef::I4], TypeRef::Void);
    let body = body(
        "
        ldc.i4.5
        ldc.i4.s 5
        ldc.i4 5
        ldloc.1
        ldloc.s 1
        ldloc 1
        ldarg.1
        ldarg.s 1
        ",
        vec![TypeRef::I4, TypeRef::I4],
    );
    let records = decode(&method, &body, &MetadataTable::new()).expect("decode should succeed");

    for record in &records[0..3] {
        assert_eq!(record.code, IrCode::LdcI4);
        assert_eq!(record.operand, IlOperand::Int32(5));
    }
    for record in &records[3..6] {
        assert_eq!(record.code, IrCode::Ldloc);
        assert_eq!(record.operand, IlOperand::Local(1));
    }
    for record in &records[6..8] {
        assert_eq!(record.code, IrCode::Ldarg);
        assert_eq!(record.operand, IlOperand::Argument(1));
    }
    assert_eq!(records[0].name, "ldc.i4.5");
    assert_eq!(records[5].name, "ldloc");
}

#[test]
fn branch_targets_are_absolute_from_the_instruction_end() {
    let method = static_method("jump", &[], TypeRef::Void);
    let table = MetadataTable::new();

    let long = body("br +1\nnop\nret", Vec::new());
    let records = decode(&method, &long, &table).expect("decode should succeed");
    assert_eq!(records[0].code, IrCode::Br);
    assert_eq!(records[0].operand, IlOperand::Target(6));

    let short = body("br.s +1\nnop\nret", Vec::new());
    let records = decode(&method, &short, &table).expect("decode should succeed");
    assert_eq!(records[0].code, IrCode::Br);
    assert_eq!(records[0].operand, IlOperand::Target(3));
}

#[test]
fn branch_outside_the_body_is_rejected() {
    let method = static_method("jump", &[], TypeRef::Void);
    let body = body("br.s +10\nret", Vec::new());
    let err = decode(&method, &body, &MetadataTable::new()).expect_err("decode should fail");
    assert!(matches!(
        err,
        DecodeError::BranchOutOfRange {
            offset: 0,
            target: 12,
            ..
        }
    ));
}

#[test]
fn unknown_opcode_reports_its_offset() {
    let method = static_method("bad", &[], TypeRef::Void);
    let body = MethodBody::new(vec![0x00, 0xA6], Vec::new());
    let err = decode(&method, &body, &MetadataTable::new()).expect_err("decode should fail");
    assert_eq!(
        err,
        DecodeError::UnknownOpcode {
            offset: 1,
            value: 0xA6
        }
    );
    assert_eq!(err.offset(), 1);
}

#[test]
fn unresolved_tokens_are_decode_errors() {
    let method = static_method("caller", &[], TypeRef::Void);
    let body = body("call 0x06000009\nret", Vec::new());
    let err = decode(&method, &body, &MetadataTable::new()).expect_err("decode should fail");
    assert!(matches!(
        err,
        DecodeError::UnresolvedToken {
            token: 0x0600_0009,
            ..
        }
    ));
}

#[test]
fn tokens_resolve_through_the_metadata_table() {
    let mut table = MetadataTable::new();
    let token = table.add_method(MethodDef::new_static(
        "twice",
        params(&[TypeRef::I4]),
        TypeRef::I4,
    ));
    let method = static_method("caller", &[], TypeRef::I4);
    let body = body(&format!("ldc.i4.2\ncall {token:#x}\nret"), Vec::new());
    let records = decode(&method, &body, &table).expect("decode should succeed");

    match &records[1].operand {
        IlOperand::Method(callee) => assert_eq!(callee.name, "twice"),
        other => panic!("expected a method operand, got {other:?}"),
    }
}

#[test]
fn variable_indices_are_bounds_checked() {
    let table = MetadataTable::new();
    let method = static_method("locals", &[TypeRef::I4], TypeRef::Void);

    let local_body = body("ldloc.2\npop\nret", vec![TypeRef::I4]);
    let err = decode(&method, &local_body, &table).expect_err("decode should fail");
    assert!(matches!(
        err,
        DecodeError::LocalOutOfRange {
            index: 2,
            count: 1,
            ..
        }
    ));

    let argument_body = body("ldarg.1\npop\nret", Vec::new());
    let err = decode(&method, &argument_body, &table).expect_err("decode should fail");
    assert!(matches!(
        err,
        DecodeError::ArgumentOutOfRange {
            index: 1,
            count: 1,
            ..
        }
    ));
}

#[test]
fn receiver_shifts_declared_parameters() {
    let point = TypeRef::Class(std::sync::Arc::new(TypeDef::sequential(
        "Point",
        vec![("x", TypeRef::I4)],
    )));
    let method = MethodDef::new_instance(point, "get", params(&[TypeRef::I4]), TypeRef::I4);
    let body = body("ldarg.0\nldarg.1\npop\nret", Vec::new());
    let records = decode(&method, &body, &MetadataTable::new()).expect("decode should succeed");
    assert_eq!(records[0].operand, IlOperand::Argument(0));
    assert_eq!(records[1].operand, IlOperand::Argument(1));
}

#[test]
fn dup_becomes_a_temporary_store_and_two_loads() {
    let method = static_method("square", &[TypeRef::I4], TypeRef::I4);
    let body = body("ldarg.0\ndup\nmul\nret", Vec::new());
    let records = decode(&method, &body, &MetadataTable::new()).expect("decode should succeed");

    let codes: Vec<IrCode> = records.iter().map(|record| record.code).collect();
    assert_eq!(
        codes,
        vec![
            IrCode::Ldarg,
            IrCode::Stloc,
            IrCode::Ldloc,
            IrCode::Ldloc,
            IrCode::Mul,
            IrCode::Ret
        ]
    );
    for record in &records[1..4] {
        assert_eq!(record.operand, IlOperand::Temporary(0));
        assert_eq!(record.offset, 1);
    }
    let sizes: Vec<u32> = records[1..4].iter().map(|record| record.size).collect();
    assert_eq!(sizes, vec![0, 0, 1]);
    let total: u32 = records.iter().map(|record| record.size).sum();
    assert_eq!(total as usize, body.code.len());
}

#[test]
fn object_model_and_exception_opcodes_decode() {
    let mut table = MetadataTable::new();
    let boxed = table.add_type(TypeRef::I4);
    let point = table.add_type(TypeRef::Class(std::sync::Arc::new(TypeDef::sequential(
        "Point",
        vec![("x", TypeRef::I4)],
    ))));
    let method = static_method("wrap", &[TypeRef::I4], TypeRef::Void);
    let body = body(
        &format!(
            "ldarg.0\nbox {boxed:#x}\nisinst {point:#x}\npop\nldarg.0\nconv.ovf.u1.un\npop\nleave.s E\n.label E\nret"
        ),
        Vec::new(),
    );
    let records = decode(&method, &body, &table).expect("decode should succeed");

    let codes: Vec<IrCode> = records.iter().map(|record| record.code).collect();
    assert_eq!(
        codes,
        vec![
            IrCode::Ldarg,
            IrCode::Box,
            IrCode::Isinst,
            IrCode::Pop,
            IrCode::Ldarg,
            IrCode::ConvOvfUn,
            IrCode::Pop,
            IrCode::Leave,
            IrCode::Ret
        ]
    );
    assert_eq!(records[1].operand, IlOperand::Type(TypeRef::I4));
    assert_eq!(records[7].operand, IlOperand::Target(records[8].offset));
    assert_eq!(records[7].name, "leave.s");
}

#[test]
fn dup_temporaries_are_bounded() {
    let method = static_method("flood", &[], TypeRef::Void);
    let mut code = vec![0x16];
    code.extend(std::iter::repeat_n(0x25, 65536));
    let body = MethodBody::new(code, Vec::new());
    let err = decode(&method, &body, &MetadataTable::new()).expect_err("decode should fail");
    assert_eq!(err, DecodeError::TooManyTemporaries { offset: 65536 });
    assert!(err.to_string().contains("IL_10000"));
}

#[test]
fn padded_buffers_decode_only_the_declared_length() {
    let method = static_method("padded", &[], TypeRef::Void);
    let mut code = assemble("nop\nret").expect("assembly should succeed");
    code.extend([0xFF, 0xFF, 0xFF]);
    let body = MethodBody::new(code, Vec::new()).with_length(2);
    let records = decode(&method, &body, &MetadataTable::new()).expect("decode should succeed");
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].code, IrCode::Ret);
}
