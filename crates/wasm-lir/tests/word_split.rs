//! 64-bit arithmetic, shifts, rotates, bit counting and conversions on
//! 32-bit targets, where every operation is split into word pairs.

use wasm_lir::Target;
use wasm_lir::ir::{Function, FunctionBuilder, Opcode, Operand, Payload};
use wasm_lir::runtime::ErrorCode;
use wasm_lir::test_harness::execute;

fn targets32() -> Vec<Target> {
    vec![Target::w32_le(), Target::w32_x86()]
}

/// 64-bit operands in slots 0/1 and 2/3, result in 4/5.
fn binary64(opcode: Opcode) -> Function {
    let mut b = FunctionBuilder::new();
    b.push(
        opcode,
        &[Operand::Slot(0), Operand::Slot(2), Operand::Slot(4)],
        Payload::None,
    );
    b.finish()
}

/// Right operand supplied as a 64-bit constant.
fn binary64_imm(opcode: Opcode, rhs: u64) -> Function {
    let mut b = FunctionBuilder::new();
    let rhs = b.const64(rhs);
    b.push(
        opcode,
        &[Operand::Slot(0), Operand::Ref(rhs), Operand::Slot(4)],
        Payload::None,
    );
    b.finish()
}

fn unary64(opcode: Opcode) -> Function {
    let mut b = FunctionBuilder::new();
    b.push(opcode, &[Operand::Slot(0), Operand::Slot(2)], Payload::None);
    b.finish()
}

fn run_binary(func: &Function, target: &Target, a: u64, b: u64) -> u64 {
    let (machine, error) = execute(func, target, |m| {
        m.set_slot_u64(0, a);
        m.set_slot_u64(2, b);
    });
    assert_eq!(error, ErrorCode::NoError);
    machine.slot_u64(4)
}

// =============================================================================
// Simple binaries: carry/borrow chains and bitwise operations
// =============================================================================

#[test]
fn i64_add_carries_across_words() {
    for target in targets32() {
        let func = binary64(Opcode::I64Add);
        assert_eq!(run_binary(&func, &target, 0xffff_ffff, 1), 0x1_0000_0000);
        assert_eq!(run_binary(&func, &target, u64::MAX, 1), 0);
        assert_eq!(
            run_binary(&func, &target, 0x0123_4567_89ab_cdef, 0x1111_1111_1111_1111),
            0x1234_5678_9abc_df00
        );
    }
}

#[test]
fn i64_sub_borrows_across_words() {
    for target in targets32() {
        let func = binary64(Opcode::I64Sub);
        assert_eq!(
            run_binary(&func, &target, 0x1_0000_0000, 1),
            0xffff_ffff
        );
        assert_eq!(run_binary(&func, &target, 0, 1), u64::MAX);
    }
}

#[test]
fn i64_bitwise() {
    for target in targets32() {
        let a = 0xf0f0_f0f0_0f0f_0f0f;
        let b = 0xffff_0000_ffff_0000;
        assert_eq!(run_binary(&binary64(Opcode::I64And), &target, a, b), a & b);
        assert_eq!(run_binary(&binary64(Opcode::I64Or), &target, a, b), a | b);
        assert_eq!(run_binary(&binary64(Opcode::I64Xor), &target, a, b), a ^ b);
    }
}

#[test]
fn i64_add_with_immediate_operand() {
    for target in targets32() {
        let func = binary64_imm(Opcode::I64Add, 0xffff_ffff);
        let (machine, error) = execute(&func, &target, |m| m.set_slot_u64(0, 1));
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.slot_u64(4), 0x1_0000_0000);
    }
}

// =============================================================================
// Multiplication
// =============================================================================

#[test]
fn i64_mul_cross_products() {
    for target in targets32() {
        let func = binary64(Opcode::I64Mul);
        let cases: &[(u64, u64)] = &[
            (0xffff_ffff, 0xffff_ffff),
            (1 << 63, 2),
            (i64::MIN.cast_unsigned(), u64::MAX),
            (0x0123_4567_89ab_cdef, 0xfedc_ba98_7654_3210),
            (12345, 678_901),
        ];
        for &(a, b) in cases {
            assert_eq!(
                run_binary(&func, &target, a, b),
                a.wrapping_mul(b),
                "{a:#x} * {b:#x} on {target:?}"
            );
        }
    }
}

/// `i64.const 0x100000000; i64.const 3; i64.mul` leaves 0x300000000.
#[test]
fn scenario_constant_mul() {
    let mut b = FunctionBuilder::new();
    let lhs = b.const64(0x1_0000_0000);
    let rhs = b.const64(3);
    b.push(
        Opcode::I64Mul,
        &[Operand::Ref(lhs), Operand::Ref(rhs), Operand::Slot(0)],
        Payload::None,
    );
    let func = b.finish();

    for target in targets32() {
        let (machine, error) = execute(&func, &target, |_| {});
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.slot_u64(0), 0x3_0000_0000);
    }
}

// =============================================================================
// Shifts: immediate and register counts across the 32-bit boundary
// =============================================================================

#[test]
fn i64_shl_immediate_counts() {
    for target in targets32() {
        for count in [0u64, 1, 31, 32, 33, 63, 64, 65] {
            let func = binary64_imm(Opcode::I64Shl, count);
            let (machine, error) = execute(&func, &target, |m| m.set_slot_u64(0, 1));
            assert_eq!(error, ErrorCode::NoError);
            assert_eq!(
                machine.slot_u64(4),
                1u64.wrapping_shl(count as u32),
                "1 << {count} on {target:?}"
            );
        }
    }
}

#[test]
fn i64_shr_u_immediate_counts() {
    for target in targets32() {
        let func = binary64_imm(Opcode::I64ShrU, 32);
        let (machine, error) = execute(&func, &target, |m| m.set_slot_u64(0, 1 << 40));
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.slot_u64(4), 1 << 8);
    }
}

#[test]
fn i64_shr_s_keeps_sign() {
    for target in targets32() {
        let func = binary64_imm(Opcode::I64ShrS, 40);
        let (machine, error) = execute(&func, &target, |m| m.set_slot_i64(0, -1));
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.slot_i64(4), -1);

        let func = binary64_imm(Opcode::I64ShrS, 36);
        let (machine, error) = execute(&func, &target, |m| {
            m.set_slot_i64(0, i64::MIN);
        });
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.slot_i64(4), i64::MIN >> 36);
    }
}

#[test]
fn i64_shifts_with_register_count() {
    for target in targets32() {
        for opcode in [Opcode::I64Shl, Opcode::I64ShrU, Opcode::I64ShrS] {
            for count in [0u64, 5, 31, 32, 47, 63, 64, 97] {
                let func = binary64(opcode);
                let value = 0x8123_4567_89ab_cdef;
                let (machine, error) = execute(&func, &target, |m| {
                    m.set_slot_u64(0, value);
                    m.set_slot_u64(2, count);
                });
                assert_eq!(error, ErrorCode::NoError);
                let masked = (count & 0x3f) as u32;
                let expected = match opcode {
                    Opcode::I64Shl => value.wrapping_shl(masked),
                    Opcode::I64ShrU => value.wrapping_shr(masked),
                    _ => (value.cast_signed() >> masked).cast_unsigned(),
                };
                assert_eq!(
                    machine.slot_u64(4),
                    expected,
                    "{opcode:?} by {count} on {target:?}"
                );
            }
        }
    }
}

// =============================================================================
// Rotates
// =============================================================================

#[test]
fn i64_rotl_immediate() {
    for target in targets32() {
        for count in [0u64, 8, 31, 32, 40, 63] {
            let func = binary64_imm(Opcode::I64Rotl, count);
            let value = 0x0123_4567_89ab_cdef;
            let (machine, error) = execute(&func, &target, |m| m.set_slot_u64(0, value));
            assert_eq!(error, ErrorCode::NoError);
            assert_eq!(
                machine.slot_u64(4),
                value.rotate_left(count as u32),
                "rotl by {count} on {target:?}"
            );
        }
    }
}

#[test]
fn i64_rotates_with_register_count() {
    for target in targets32() {
        for opcode in [Opcode::I64Rotl, Opcode::I64Rotr] {
            for count in [0u64, 8, 32, 40, 63, 96] {
                let func = binary64(opcode);
                let value = 0xfedc_ba98_7654_3210;
                let (machine, error) = execute(&func, &target, |m| {
                    m.set_slot_u64(0, value);
                    m.set_slot_u64(2, count);
                });
                assert_eq!(error, ErrorCode::NoError);
                let masked = (count & 0x3f) as u32;
                let expected = if opcode == Opcode::I64Rotl {
                    value.rotate_left(masked)
                } else {
                    value.rotate_right(masked)
                };
                assert_eq!(
                    machine.slot_u64(4),
                    expected,
                    "{opcode:?} by {count} on {target:?}"
                );
            }
        }
    }
}

// =============================================================================
// Bit counting
// =============================================================================

#[test]
fn i64_count_zeroes() {
    for target in targets32() {
        let cases: &[(u64, u64, u64)] = &[
            // value, clz, ctz
            (0, 64, 64),
            (1, 63, 0),
            (1 << 33, 30, 33),
            (u64::MAX, 0, 0),
            (0x0000_0001_0000_0000, 31, 32),
        ];
        for &(value, clz, ctz) in cases {
            let (machine, _) = execute(&unary64(Opcode::I64Clz), &target, |m| {
                m.set_slot_u64(0, value);
            });
            assert_eq!(machine.slot_u64(2), clz, "clz({value:#x}) on {target:?}");

            let (machine, _) = execute(&unary64(Opcode::I64Ctz), &target, |m| {
                m.set_slot_u64(0, value);
            });
            assert_eq!(machine.slot_u64(2), ctz, "ctz({value:#x}) on {target:?}");
        }
    }
}

#[test]
fn i64_popcnt_sums_both_words() {
    for target in targets32() {
        let (machine, _) = execute(&unary64(Opcode::I64Popcnt), &target, |m| {
            m.set_slot_u64(0, 0xff00_0000_0000_00f1);
        });
        assert_eq!(machine.slot_u64(2), 13);
    }
}

#[test]
fn i32_bit_counts() {
    let mut b = FunctionBuilder::new();
    b.push(
        Opcode::I32Clz,
        &[Operand::Slot(0), Operand::Slot(1)],
        Payload::None,
    );
    b.push(
        Opcode::I32Ctz,
        &[Operand::Slot(0), Operand::Slot(2)],
        Payload::None,
    );
    b.push(
        Opcode::I32Popcnt,
        &[Operand::Slot(0), Operand::Slot(3)],
        Payload::None,
    );
    let func = b.finish();

    for target in [Target::w32_le(), Target::w64_le()] {
        let (machine, error) = execute(&func, &target, |m| m.set_slot_u32(0, 0x0001_0f00));
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.slot_u32(1), 15);
        assert_eq!(machine.slot_u32(2), 8);
        assert_eq!(machine.slot_u32(3), 5);
    }
}

// =============================================================================
// Sign extensions and width conversions
// =============================================================================

#[test]
fn i64_sign_extensions() {
    for target in targets32() {
        let (machine, _) = execute(&unary64(Opcode::I64Extend8S), &target, |m| {
            m.set_slot_u64(0, 0x80);
        });
        assert_eq!(machine.slot_i64(2), -128);

        let (machine, _) = execute(&unary64(Opcode::I64Extend16S), &target, |m| {
            m.set_slot_u64(0, 0xfffe);
        });
        assert_eq!(machine.slot_i64(2), -2);

        let (machine, _) = execute(&unary64(Opcode::I64Extend32S), &target, |m| {
            m.set_slot_u64(0, 0x8000_0000);
        });
        assert_eq!(machine.slot_i64(2), i64::from(i32::MIN));
    }
}

/// `i64.extend32_s` with the result in the source slot only rewrites the
/// high half.
#[test]
fn i64_extend32_s_in_place() {
    let mut b = FunctionBuilder::new();
    b.push(
        Opcode::I64Extend32S,
        &[Operand::Slot(0), Operand::Slot(0)],
        Payload::None,
    );
    let func = b.finish();

    for target in targets32() {
        let (machine, _) = execute(&func, &target, |m| m.set_slot_u64(0, 0xffff_ffff));
        assert_eq!(machine.slot_i64(0), -1, "{target:?}");
    }
}

#[test]
fn i32_sign_extensions() {
    for (opcode, input, expected) in [
        (Opcode::I32Extend8S, 0x80u32, -128i32),
        (Opcode::I32Extend16S, 0x8000, i32::from(i16::MIN)),
    ] {
        let mut b = FunctionBuilder::new();
        b.push(opcode, &[Operand::Slot(0), Operand::Slot(1)], Payload::None);
        let func = b.finish();

        for target in [Target::w32_le(), Target::w64_le()] {
            let (machine, _) = execute(&func, &target, |m| m.set_slot_u32(0, input));
            assert_eq!(machine.slot_i32(1), expected, "{opcode:?} on {target:?}");
        }
    }
}

#[test]
fn width_conversions() {
    for target in [Target::w32_le(), Target::w32_x86(), Target::w64_le()] {
        let mut b = FunctionBuilder::new();
        b.push(
            Opcode::I32WrapI64,
            &[Operand::Slot(0), Operand::Slot(2)],
            Payload::None,
        );
        let func = b.finish();
        let (machine, _) = execute(&func, &target, |m| {
            m.set_slot_u64(0, 0x1234_5678_9abc_def0);
        });
        assert_eq!(machine.slot_u32(2), 0x9abc_def0, "wrap on {target:?}");

        let mut b = FunctionBuilder::new();
        b.push(
            Opcode::I64ExtendI32S,
            &[Operand::Slot(0), Operand::Slot(2)],
            Payload::None,
        );
        let func = b.finish();
        let (machine, _) = execute(&func, &target, |m| m.set_slot_i32(0, -5));
        assert_eq!(machine.slot_i64(2), -5, "extend_s on {target:?}");

        let mut b = FunctionBuilder::new();
        b.push(
            Opcode::I64ExtendI32U,
            &[Operand::Slot(0), Operand::Slot(2)],
            Payload::None,
        );
        let func = b.finish();
        let (machine, _) = execute(&func, &target, |m| m.set_slot_u32(0, 0xdead_beef));
        assert_eq!(machine.slot_u64(2), 0xdead_beef, "extend_u on {target:?}");
    }
}

// =============================================================================
// 32-bit binary sanity, including wraparound
// =============================================================================

/// `i32.const 0xFFFFFFFE; i32.const 3; i32.add` wraps to 1 without a trap.
#[test]
fn scenario_i32_add_wraparound() {
    let mut b = FunctionBuilder::new();
    let lhs = b.const32(0xffff_fffe);
    let rhs = b.const32(3);
    b.push(
        Opcode::I32Add,
        &[Operand::Ref(lhs), Operand::Ref(rhs), Operand::Slot(0)],
        Payload::None,
    );
    let func = b.finish();

    for target in [Target::w32_le(), Target::w64_le()] {
        let (machine, error) = execute(&func, &target, |_| {});
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.slot_u32(0), 1, "{target:?}");
    }
}

#[test]
fn i32_shifts_mask_their_count() {
    let mut b = FunctionBuilder::new();
    b.push(
        Opcode::I32Shl,
        &[Operand::Slot(0), Operand::Slot(1), Operand::Slot(2)],
        Payload::None,
    );
    let func = b.finish();

    for target in [Target::w32_le(), Target::w64_le()] {
        let (machine, _) = execute(&func, &target, |m| {
            m.set_slot_u32(0, 1);
            m.set_slot_u32(1, 33);
        });
        assert_eq!(machine.slot_u32(2), 2, "{target:?}");
    }
}
