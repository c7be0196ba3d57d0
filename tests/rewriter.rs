//! Integration tests for single-exit rewriting of complete method bodies.
//!
//! Every test starts from raw body bytes, lets [`BodyScanner`] describe them and checks the
//! exact output of the rewriter. [`assert_single_exit`] additionally decodes input and output
//! and checks that every jump still lands on the instruction it landed on before.

use cilwrap::{
    disassembler::{decode_code, FlowType, InstructionId},
    metadata::method::{
        BodyScanner, ExceptionHandler, ExceptionHandlerFlags, HeaderInfo, HeaderInfoProvider,
        MethodBody, MethodBodyFlags,
    },
    rewriter::{BodyRewriter, RewriterConfig},
    Error,
};

fn tiny_body(code: &[u8]) -> Vec<u8> {
    assert!(code.len() < 64);
    let mut body = vec![((code.len() as u8) << 2) | 0x2];
    body.extend_from_slice(code);
    body
}

fn fat_body(flags: u16, max_stack: u16, code: &[u8], local_var_sig_token: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(0x3003 | flags).to_le_bytes());
    body.extend_from_slice(&max_stack.to_le_bytes());
    body.extend_from_slice(&(code.len() as u32).to_le_bytes());
    body.extend_from_slice(&local_var_sig_token.to_le_bytes());
    body.extend_from_slice(code);
    body
}

fn rewrite_with(body: &[u8], config: &RewriterConfig) -> cilwrap::Result<Vec<u8>> {
    let info = BodyScanner.header_info(body)?;
    BodyRewriter::new(body, &info, config).rewrite()
}

fn rewrite(body: &[u8]) -> Vec<u8> {
    let _ = env_logger::builder().is_test(true).try_init();
    rewrite_with(body, &RewriterConfig::default()).unwrap()
}

fn code_of(body: &[u8]) -> Vec<u8> {
    let parsed = MethodBody::from(body).unwrap();
    body[parsed.code_range()].to_vec()
}

/// Instruction by instruction comparison of the code before and after rewriting.
///
/// Rewriting never adds or removes instructions, so the n-th instruction of the output stands
/// for the n-th instruction of the input, and arena ids of a fresh decode are positions.
fn assert_single_exit(original: &[u8], rewritten: &[u8]) {
    let before = decode_code(original).unwrap();
    let after = decode_code(rewritten).unwrap();
    assert!(after.all_valid());
    assert_eq!(before.len(), after.len());

    let last = before.len() - 1;
    for (index, (old, new)) in before.iter().zip(after.iter()).enumerate() {
        assert!(!new.is_return(), "ret left at {}", new);

        if index == last {
            assert!(old.is_return());
            assert_eq!(new.opcode().mnemonic, "nop");
        } else if old.is_return() {
            assert_eq!(new.opcode().flow, FlowType::UnconditionalBranch);
            assert_eq!(new.targets(), vec![Some(InstructionId(last))]);
        } else {
            assert_eq!(old.opcode().flow, new.opcode().flow);
            assert_eq!(old.targets(), new.targets(), "{} became {}", old, new);
        }
    }
}

#[test]
fn three_returns() {
    #[rustfmt::skip]
    let code = [
        0x2D, 0x01,                     // 0x00: brtrue.s 0x03
        0x2A,                           // 0x02: ret
        0x03,                           // 0x03: ldarg.1
        0x1F, 0x05,                     // 0x04: ldc.i4.s 5
        0x2F, 0x03,                     // 0x06: bge.s 0x0B
        0x17,                           // 0x08: ldc.i4.1
        0x26,                           // 0x09: pop
        0x2A,                           // 0x0A: ret
        0x20, 0x2A, 0x00, 0x00, 0x00,   // 0x0B: ldc.i4 42
        0x26,                           // 0x10: pop
        0x2A,                           // 0x11: ret
    ];
    let body = tiny_body(&code);
    let info = BodyScanner.header_info(&body).unwrap();
    assert_eq!(info.return_count, 3);

    let out = rewrite(&body);

    #[rustfmt::skip]
    let expected_code = [
        0x2D, 0x02,                     // 0x00: brtrue.s 0x04
        0x2B, 0x0F,                     // 0x02: br.s 0x13
        0x03,                           // 0x04: ldarg.1
        0x1F, 0x05,                     // 0x05: ldc.i4.s 5
        0x2F, 0x04,                     // 0x07: bge.s 0x0D
        0x17,                           // 0x09: ldc.i4.1
        0x26,                           // 0x0A: pop
        0x2B, 0x06,                     // 0x0B: br.s 0x13
        0x20, 0x2A, 0x00, 0x00, 0x00,   // 0x0D: ldc.i4 42
        0x26,                           // 0x12: pop
        0x00,                           // 0x13: nop
    ];
    assert_eq!(
        &out[..12],
        &[0x03, 0x30, 0x08, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
    );
    assert_eq!(&out[12..], &expected_code);
    assert_single_exit(&code, &code_of(&out));
}

#[test]
fn tiny_header_promotion() {
    let body = tiny_body(&[0x02, 0x2C, 0x01, 0x2A, 0x2A]);
    let out = rewrite(&body);

    let parsed = MethodBody::from(&out).unwrap();
    assert!(parsed.is_fat);
    assert_eq!(parsed.size_header, 12);
    assert_eq!(parsed.max_stack, 8);
    assert_eq!(parsed.local_var_sig_token, 0);
    assert!(!parsed.is_init_local);
    assert!(!parsed.flags.contains(MethodBodyFlags::MORE_SECTS));
    assert_eq!(parsed.size(), out.len());
}

#[test]
fn single_return_is_patched_in_place() {
    let code = [0x02, 0x03, 0x58, 0x2A]; // ldarg.0, ldarg.1, add, ret
    let body = fat_body(0x10, 2, &code, 0x1100_0002);
    let out = rewrite(&body);

    assert_eq!(out.len(), body.len());
    assert_eq!(&out[..15], &body[..15]);
    assert_eq!(out[15], 0x00);

    // Rewriting the result again changes nothing
    assert_eq!(rewrite(&out), out);
}

#[test]
fn no_returns_is_identity() {
    let body = tiny_body(&[0x14, 0x7A]); // ldnull, throw
    assert_eq!(rewrite(&body), body);
}

#[test]
fn exception_clauses_are_relocated() {
    #[rustfmt::skip]
    let code = [
        0x02,                           // 0x00: ldarg.0
        0x2C, 0x01,                     // 0x01: brfalse.s 0x04
        0x2A,                           // 0x03: ret
        0x00,                           // 0x04: nop            try start
        0xDE, 0x02,                     // 0x05: leave.s 0x09
        0x00,                           // 0x07: nop            finally start
        0xDC,                           // 0x08: endfinally
        0x2A,                           // 0x09: ret            finally end
    ];
    let mut body = fat_body(0x18, 1, &code, 0x1100_0001);
    body.extend_from_slice(&[0x00, 0x00]);
    #[rustfmt::skip]
    let section = [
        0x01, 0x10, 0x00, 0x00,         // small EH section, 16 bytes
        0x02, 0x00,                     // finally
        0x04, 0x00, 0x03,               // try 0x04, length 3
        0x07, 0x00, 0x02,               // handler 0x07, length 2
        0x00, 0x00, 0x00, 0x00,
    ];
    body.extend_from_slice(&section);

    let out = rewrite(&body);

    assert_eq!(out.len(), 52);
    assert_eq!(
        &out[..12],
        &[0x1B, 0x30, 0x01, 0x00, 0x0B, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x11]
    );
    assert_eq!(
        &out[12..23],
        &[0x02, 0x2C, 0x02, 0x2B, 0x05, 0x00, 0xDE, 0x02, 0x00, 0xDC, 0x00]
    );
    assert_eq!(out[23], 0x00);
    assert_eq!(&out[24..28], &[0x41, 0x1C, 0x00, 0x00]);

    let parsed = MethodBody::from(&out).unwrap();
    assert_eq!(
        parsed.exception_handlers,
        vec![ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_offset: 5,
            try_length: 3,
            handler_offset: 8,
            handler_length: 2,
            filter_offset: 0,
        }]
    );
    assert!(parsed.is_init_local);
    assert_single_exit(&code, &code_of(&out));
}

/// Two returns around a try block guarded by an exception filter.
fn filtered_body() -> (Vec<u8>, Vec<u8>) {
    #[rustfmt::skip]
    let code = vec![
        0x02,                           // 0x00: ldarg.0
        0x2C, 0x01,                     // 0x01: brfalse.s 0x04
        0x2A,                           // 0x03: ret
        0x00,                           // 0x04: nop            try start
        0xDE, 0x07,                     // 0x05: leave.s 0x0E
        0x26,                           // 0x07: pop            filter start
        0x17,                           // 0x08: ldc.i4.1
        0xFE, 0x11,                     // 0x09: endfilter
        0x26,                           // 0x0B: pop            handler start
        0xDE, 0x00,                     // 0x0C: leave.s 0x0E
        0x2A,                           // 0x0E: ret            handler end
    ];
    let mut body = fat_body(0x08, 2, &code, 0);
    body.push(0x00);

    let mut section = vec![0x41, 0x1C, 0x00, 0x00];
    for value in [0x01_u32, 0x04, 0x03, 0x0B, 0x03, 0x07] {
        section.extend_from_slice(&value.to_le_bytes());
    }
    body.extend_from_slice(&section);
    (code, body)
}

#[test]
fn filter_clauses_are_relocated() {
    let (code, body) = filtered_body();
    let out = rewrite(&body);

    assert_eq!(out.len(), 56);
    assert_eq!(
        &out[..12],
        &[0x0B, 0x30, 0x02, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
    );
    assert_eq!(
        code_of(&out),
        [0x02, 0x2C, 0x02, 0x2B, 0x0A, 0x00, 0xDE, 0x07, 0x26, 0x17, 0xFE, 0x11, 0x26, 0xDE, 0x00, 0x00]
    );

    let parsed = MethodBody::from(&out).unwrap();
    assert_eq!(
        parsed.exception_handlers,
        vec![ExceptionHandler {
            flags: ExceptionHandlerFlags::FILTER,
            try_offset: 5,
            try_length: 3,
            handler_offset: 0x0C,
            handler_length: 3,
            filter_offset: 8,
        }]
    );
    assert_single_exit(&code, &code_of(&out));
}

#[test]
fn large_methods_use_long_branches() {
    let mut code = vec![0x02, 0x2D, 0x01, 0x2A];
    code.extend(std::iter::repeat(0x00).take(130));
    code.push(0x2A);
    let body = fat_body(0x00, 2, &code, 0);

    let out = rewrite(&body);
    let new_code = code_of(&out);

    assert_eq!(new_code.len(), 142);
    assert_eq!(&out[4..8], &142_u32.to_le_bytes());
    assert_eq!(
        &new_code[..11],
        &[0x02, 0x3A, 0x05, 0x00, 0x00, 0x00, 0x38, 0x82, 0x00, 0x00, 0x00]
    );
    assert!(new_code[11..].iter().all(|byte| *byte == 0x00));
    assert_single_exit(&code, &new_code);
}

#[test]
fn short_branch_out_of_range_fails_cleanly() {
    // br.s to the final ret, which moves two bytes further away once both rets become br.s
    let mut code = vec![0x2B, 0x7F, 0x2A, 0x2A];
    code.extend(std::iter::repeat(0x00).take(125));
    code.push(0x2A);
    assert_eq!(code.len(), 130);
    let body = fat_body(0x00, 1, &code, 0);

    let never_long = RewriterConfig {
        long_branch_threshold: usize::MAX,
        ..RewriterConfig::default()
    };
    assert!(matches!(
        rewrite_with(&body, &never_long),
        Err(Error::InvalidInstructions(1))
    ));

    // The default heuristic widens everything for a method of this size
    let out = rewrite(&body);
    assert_single_exit(&code, &code_of(&out));
}

#[test]
fn switch_arms_follow_their_targets() {
    #[rustfmt::skip]
    let code = [
        0x02,                           // 0x00: ldarg.0
        0x45, 0x02, 0x00, 0x00, 0x00,   // 0x01: switch (0x0E, 0x10)
        0x00, 0x00, 0x00, 0x00,
        0x02, 0x00, 0x00, 0x00,
        0x2A,                           // 0x0E: ret
        0x00,                           // 0x0F: nop
        0x2A,                           // 0x10: ret
    ];
    let out = rewrite(&tiny_body(&code));

    assert_eq!(
        &out[12..],
        &[
            0x02, 0x45, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00,
            0x2B, 0x01, 0x00, 0x00,
        ]
    );
    assert_single_exit(&code, &code_of(&out));
}

#[test]
fn two_byte_opcodes_are_copied() {
    #[rustfmt::skip]
    let code = [
        0xFE, 0x0C, 0x00, 0x00,         // 0x00: ldloc 0
        0x2C, 0x01,                     // 0x04: brfalse.s 0x07
        0x2A,                           // 0x06: ret
        0x02,                           // 0x07: ldarg.0
        0x03,                           // 0x08: ldarg.1
        0xFE, 0x01,                     // 0x09: ceq
        0x26,                           // 0x0B: pop
        0x2A,                           // 0x0C: ret
    ];
    let out = rewrite(&fat_body(0x10, 2, &code, 0x1100_0003));
    let new_code = code_of(&out);

    assert_eq!(&new_code[..4], &code[..4]);
    assert_eq!(&new_code[10..12], &[0xFE, 0x01]);
    assert_single_exit(&code, &new_code);
}

#[test]
fn decode_failures_abort() {
    let config = RewriterConfig::default();
    let mut info = HeaderInfo::tiny(3);
    info.return_count = 2;

    // 0x24 is not an opcode
    let body = tiny_body(&[0x2A, 0x24, 0x2A]);
    assert!(matches!(
        BodyRewriter::new(&body, &info, &config).rewrite(),
        Err(Error::InvalidOpcode {
            offset: 1,
            opcode: 0x24
        })
    ));

    // ldc.i4 with a truncated operand swallows the final ret
    let body = tiny_body(&[0x2A, 0x20, 0x2A]);
    assert!(matches!(
        BodyRewriter::new(&body, &info, &config).rewrite(),
        Err(Error::OutOfBounds)
    ));
}

#[test]
fn inconsistent_header_info_is_rejected() {
    let body = tiny_body(&[0x00, 0x00]);
    let mut info = HeaderInfo::tiny(2);
    info.return_count = 2;

    let rewriter_config = RewriterConfig::default();
    let rewriter = BodyRewriter::new(&body, &info, &rewriter_config);
    assert!(matches!(rewriter.rewrite(), Err(Error::Malformed { .. })));
    assert!(rewriter.try_rewrite().is_none());
}

#[test]
fn tiny_info_for_fat_body_is_rejected() {
    let (_, body) = filtered_body();
    let mut info = BodyScanner.header_info(&body).unwrap();
    assert!(!info.is_tiny);
    info.is_tiny = true;

    let rewriter_config = RewriterConfig::default();
    let rewriter = BodyRewriter::new(&body, &info, &rewriter_config);
    assert!(matches!(rewriter.rewrite(), Err(Error::Malformed { .. })));
}

#[test]
fn unmapped_exception_boundary_is_rejected() {
    #[rustfmt::skip]
    let code = [
        0x20, 0x01, 0x00, 0x00, 0x00,   // 0x00: ldc.i4 1
        0x2D, 0x01,                     // 0x05: brtrue.s 0x08
        0x2A,                           // 0x07: ret
        0x2A,                           // 0x08: ret
    ];
    let mut body = fat_body(0x08, 1, &code, 0);
    body.extend_from_slice(&[0x00, 0x00, 0x00]);
    #[rustfmt::skip]
    let section = [
        0x01, 0x10, 0x00, 0x00,
        0x02, 0x00,
        0x02, 0x00, 0x03,               // try starts inside ldc.i4
        0x05, 0x00, 0x02,
        0x00, 0x00, 0x00, 0x00,
    ];
    body.extend_from_slice(&section);

    assert!(matches!(
        rewrite_with(&body, &RewriterConfig::default()),
        Err(Error::Malformed { .. })
    ));
}

#[test]
fn rewriting_is_thread_safe() {
    let bodies: Vec<Vec<u8>> = (0..16)
        .map(|n| {
            let mut code = vec![0x02, 0x2D, 0x01, 0x2A];
            code.extend(std::iter::repeat(0x00).take(n * 10));
            code.push(0x2A);
            fat_body(0x00, 1, &code, 0)
        })
        .collect();
    let expected: Vec<Vec<u8>> = bodies.iter().map(|body| rewrite(body)).collect();

    std::thread::scope(|scope| {
        let handles: Vec<_> = bodies
            .iter()
            .map(|body| scope.spawn(move || rewrite(body)))
            .collect();
        for (handle, expected) in handles.into_iter().zip(&expected) {
            assert_eq!(&handle.join().unwrap(), expected);
        }
    });
}
