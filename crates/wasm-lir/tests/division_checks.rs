//! Division and remainder trap behavior.
//!
//! WebAssembly requires:
//! - division/remainder by zero traps
//! - signed division of INT_MIN / -1 traps (overflow)
//! - signed remainder with divisor -1 returns 0, never traps

use wasm_lir::Target;
use wasm_lir::ir::{Function, FunctionBuilder, Opcode, Operand, Payload};
use wasm_lir::runtime::ErrorCode;
use wasm_lir::test_harness::execute;

fn div32_targets() -> Vec<Target> {
    vec![Target::w32_le(), Target::w32_x86(), Target::w64_le()]
}

/// `slot0 op slot1 -> slot2`
fn binary32(opcode: Opcode) -> Function {
    let mut b = FunctionBuilder::new();
    b.push(
        opcode,
        &[Operand::Slot(0), Operand::Slot(1), Operand::Slot(2)],
        Payload::None,
    );
    b.finish()
}

/// `slot0 op imm -> slot2`
fn binary32_imm_divisor(opcode: Opcode, divisor: u32) -> Function {
    let mut b = FunctionBuilder::new();
    let divisor = b.const32(divisor);
    b.push(
        opcode,
        &[Operand::Slot(0), Operand::Ref(divisor), Operand::Slot(2)],
        Payload::None,
    );
    b.finish()
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

fn binary64_imm_divisor(opcode: Opcode, divisor: u64) -> Function {
    let mut b = FunctionBuilder::new();
    let divisor = b.const64(divisor);
    b.push(
        opcode,
        &[Operand::Slot(0), Operand::Ref(divisor), Operand::Slot(4)],
        Payload::None,
    );
    b.finish()
}

// =============================================================================
// i32 division by zero
// =============================================================================

#[test]
fn i32_division_by_zero_traps() {
    for opcode in [
        Opcode::I32DivS,
        Opcode::I32DivU,
        Opcode::I32RemS,
        Opcode::I32RemU,
    ] {
        for target in div32_targets() {
            let func = binary32(opcode);
            let (_, error) = execute(&func, &target, |m| {
                m.set_slot_i32(0, 7);
                m.set_slot_i32(1, 0);
            });
            assert_eq!(error, ErrorCode::DivideByZero, "{opcode:?} on {target:?}");
        }
    }
}

#[test]
fn i32_division_by_immediate_zero_traps() {
    for opcode in [Opcode::I32DivS, Opcode::I32RemU] {
        let func = binary32_imm_divisor(opcode, 0);
        let (_, error) = execute(&func, &Target::w32_le(), |m| m.set_slot_i32(0, 7));
        assert_eq!(error, ErrorCode::DivideByZero);
    }
}

// =============================================================================
// i32 signed overflow
// =============================================================================

#[test]
fn i32_div_s_int_min_by_minus_one_traps() {
    for target in div32_targets() {
        let func = binary32(Opcode::I32DivS);
        let (_, error) = execute(&func, &target, |m| {
            m.set_slot_i32(0, i32::MIN);
            m.set_slot_i32(1, -1);
        });
        assert_eq!(error, ErrorCode::IntegerOverflow, "{target:?}");
    }
}

#[test]
fn i32_div_s_int_min_by_immediate_minus_one_traps() {
    let func = binary32_imm_divisor(Opcode::I32DivS, u32::MAX);
    let (_, error) = execute(&func, &Target::w32_le(), |m| m.set_slot_i32(0, i32::MIN));
    assert_eq!(error, ErrorCode::IntegerOverflow);
}

#[test]
fn i32_rem_s_by_minus_one_is_zero() {
    for dividend in [i32::MIN, -7, 0, 1, i32::MAX] {
        for target in div32_targets() {
            let func = binary32(Opcode::I32RemS);
            let (machine, error) = execute(&func, &target, |m| {
                m.set_slot_i32(0, dividend);
                m.set_slot_i32(1, -1);
            });
            assert_eq!(error, ErrorCode::NoError);
            assert_eq!(machine.slot_i32(2), 0, "{dividend} rem -1 on {target:?}");
        }

        let func = binary32_imm_divisor(Opcode::I32RemS, u32::MAX);
        let (machine, error) = execute(&func, &Target::w32_le(), |m| {
            m.set_slot_i32(0, dividend);
        });
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.slot_i32(2), 0);
    }
}

// =============================================================================
// i32 quotients and remainders
// =============================================================================

#[test]
fn i32_division_results() {
    let cases: &[(Opcode, i32, i32, i32)] = &[
        (Opcode::I32DivS, 7, 2, 3),
        (Opcode::I32DivS, -7, 2, -3),
        (Opcode::I32DivS, i32::MIN, 2, i32::MIN / 2),
        (Opcode::I32DivU, -2, 3, ((u32::MAX - 1) / 3).cast_signed()),
        (Opcode::I32RemS, -7, 3, -1),
        (Opcode::I32RemU, 7, 3, 1),
    ];
    for &(opcode, a, b, expected) in cases {
        for target in div32_targets() {
            let func = binary32(opcode);
            let (machine, error) = execute(&func, &target, |m| {
                m.set_slot_i32(0, a);
                m.set_slot_i32(1, b);
            });
            assert_eq!(error, ErrorCode::NoError);
            assert_eq!(
                machine.slot_i32(2),
                expected,
                "{opcode:?}({a}, {b}) on {target:?}"
            );
        }
    }
}

#[test]
fn i32_division_by_safe_immediate() {
    let func = binary32_imm_divisor(Opcode::I32DivU, 3);
    let (machine, error) = execute(&func, &Target::w32_le(), |m| m.set_slot_u32(0, 10));
    assert_eq!(error, ErrorCode::NoError);
    assert_eq!(machine.slot_u32(2), 3);
}

// =============================================================================
// i64 division (helper calls on 32-bit targets)
// =============================================================================

#[test]
fn i64_division_by_zero_traps() {
    for opcode in [
        Opcode::I64DivS,
        Opcode::I64DivU,
        Opcode::I64RemS,
        Opcode::I64RemU,
    ] {
        for target in [Target::w32_le(), Target::w64_le()] {
            let func = binary64(opcode);
            let (_, error) = execute(&func, &target, |m| {
                m.set_slot_i64(0, 1234);
                m.set_slot_i64(2, 0);
            });
            assert_eq!(error, ErrorCode::DivideByZero, "{opcode:?} on {target:?}");
        }
    }
}

#[test]
fn i64_division_by_immediate_zero_traps() {
    let func = binary64_imm_divisor(Opcode::I64DivU, 0);
    let (_, error) = execute(&func, &Target::w32_le(), |m| m.set_slot_u64(0, 5));
    assert_eq!(error, ErrorCode::DivideByZero);
}

#[test]
fn i64_div_s_int_min_by_minus_one_traps() {
    for target in [Target::w32_le(), Target::w64_le()] {
        let func = binary64(Opcode::I64DivS);
        let (_, error) = execute(&func, &target, |m| {
            m.set_slot_i64(0, i64::MIN);
            m.set_slot_i64(2, -1);
        });
        assert_eq!(error, ErrorCode::IntegerOverflow, "{target:?}");
    }

    // The immediate -1 divisor is rerouted to the checked helper.
    let func = binary64_imm_divisor(Opcode::I64DivS, u64::MAX);
    let (_, error) = execute(&func, &Target::w32_le(), |m| m.set_slot_i64(0, i64::MIN));
    assert_eq!(error, ErrorCode::IntegerOverflow);
}

#[test]
fn i64_rem_s_by_minus_one_is_zero() {
    for target in [Target::w32_le(), Target::w64_le()] {
        let func = binary64(Opcode::I64RemS);
        let (machine, error) = execute(&func, &target, |m| {
            m.set_slot_i64(0, i64::MIN);
            m.set_slot_i64(2, -1);
        });
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.slot_i64(4), 0, "{target:?}");
    }
}

#[test]
fn i64_division_results() {
    let cases: &[(Opcode, i64, i64, i64)] = &[
        (Opcode::I64DivS, -1_000_000_000_123, 7, -1_000_000_000_123 / 7),
        (Opcode::I64DivU, -1, 1 << 33, (u64::MAX >> 33).cast_signed()),
        (Opcode::I64RemS, -1_000_000_000_123, 7, -1_000_000_000_123 % 7),
        (Opcode::I64RemU, (1 << 40) + 9, 1 << 20, 9),
    ];
    for &(opcode, a, b, expected) in cases {
        for target in [Target::w32_le(), Target::w32_x86(), Target::w64_le()] {
            let func = binary64(opcode);
            let (machine, error) = execute(&func, &target, |m| {
                m.set_slot_i64(0, a);
                m.set_slot_i64(2, b);
            });
            assert_eq!(error, ErrorCode::NoError);
            assert_eq!(
                machine.slot_i64(4),
                expected,
                "{opcode:?}({a}, {b}) on {target:?}"
            );
        }
    }
}

#[test]
fn i64_division_by_safe_immediate_skips_error_check() {
    let func = binary64_imm_divisor(Opcode::I64DivS, 3);
    let (machine, error) = execute(&func, &Target::w32_le(), |m| {
        m.set_slot_i64(0, -300_000_000_000);
    });
    assert_eq!(error, ErrorCode::NoError);
    assert_eq!(machine.slot_i64(4), -100_000_000_000);
}

// =============================================================================
// Constant instruction streams
// =============================================================================

/// `i32.const 7; i32.const 0; i32.div_s` traps with divide-by-zero.
#[test]
fn scenario_constant_divide_by_zero() {
    let mut b = FunctionBuilder::new();
    let dividend = b.const32(7);
    let divisor = b.const32(0);
    b.push(
        Opcode::I32DivS,
        &[Operand::Ref(dividend), Operand::Ref(divisor), Operand::Slot(0)],
        Payload::None,
    );
    let func = b.finish();

    let (_, error) = execute(&func, &Target::w32_le(), |_| {});
    assert_eq!(error, ErrorCode::DivideByZero);
}

/// `i32.const -2147483648; i32.const -1; i32.div_s` traps with overflow.
#[test]
fn scenario_constant_overflow() {
    let mut b = FunctionBuilder::new();
    let dividend = b.const32(i32::MIN.cast_unsigned());
    let divisor = b.const32(u32::MAX);
    b.push(
        Opcode::I32DivS,
        &[Operand::Ref(dividend), Operand::Ref(divisor), Operand::Slot(0)],
        Payload::None,
    );
    let func = b.finish();

    let (_, error) = execute(&func, &Target::w32_le(), |_| {});
    assert_eq!(error, ErrorCode::IntegerOverflow);
}
