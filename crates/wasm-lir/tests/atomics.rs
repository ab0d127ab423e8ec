//! Atomic loads, stores, read-modify-writes and compare-exchanges,
//! through both the native load-linked/store-conditional path and the
//! generic masked-CAS helpers used for 64-bit lanes on 32-bit targets.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use wasm_lir::Target;
use wasm_lir::ir::{Function, FunctionBuilder, Opcode, Operand, Payload};
use wasm_lir::runtime::{self, ErrorCode};
use wasm_lir::test_harness::execute;

fn all_targets() -> Vec<Target> {
    vec![Target::w32_le(), Target::w32_x86(), Target::w64_le()]
}

/// Atomic access at a constant address. Value operands (if any) come
/// from slots 4/5, the result goes to slot 0/1.
fn atomic_func(opcode: Opcode, addr: u32) -> Function {
    let mut b = FunctionBuilder::new();
    let addr = b.const32(addr);
    let operands: Vec<Operand> = match opcode.param_count() {
        1 if opcode.result_count() == 1 => vec![Operand::Ref(addr), Operand::Slot(0)],
        2 if opcode.result_count() == 0 => vec![Operand::Ref(addr), Operand::Slot(4)],
        2 => vec![Operand::Ref(addr), Operand::Slot(4), Operand::Slot(0)],
        _ => vec![
            Operand::Ref(addr),
            Operand::Slot(4),
            Operand::Slot(6),
            Operand::Slot(0),
        ],
    };
    b.push(opcode, &operands, Payload::MemAccess { offset: 0 });
    b.finish()
}

// =============================================================================
// Loads and stores
// =============================================================================

#[test]
fn i32_atomic_load_and_store() {
    for target in all_targets() {
        let func = atomic_func(Opcode::I32AtomicLoad, 0x10);
        let (machine, error) = execute(&func, &target, |m| {
            m.write_memory(0x10, &0x0102_0304u32.to_le_bytes());
        });
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.slot_u32(0), 0x0102_0304, "{target:?}");

        let func = atomic_func(Opcode::I32AtomicStore, 0x10);
        let (machine, error) = execute(&func, &target, |m| {
            m.set_slot_u32(4, 0xdead_beef);
        });
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.memory_u32(0x10), 0xdead_beef, "{target:?}");
    }
}

#[test]
fn i32_atomic_narrow_loads_zero_extend() {
    for target in all_targets() {
        let func = atomic_func(Opcode::I32AtomicLoad8U, 0x11);
        let (machine, _) = execute(&func, &target, |m| {
            m.write_memory(0x10, &[0x88, 0x99, 0xaa, 0xbb]);
        });
        assert_eq!(machine.slot_u32(0), 0x99, "{target:?}");

        let func = atomic_func(Opcode::I32AtomicLoad16U, 0x12);
        let (machine, _) = execute(&func, &target, |m| {
            m.write_memory(0x10, &[0x88, 0x99, 0xaa, 0xbb]);
        });
        assert_eq!(machine.slot_u32(0), 0xbbaa, "{target:?}");
    }
}

#[test]
fn i64_atomic_load_and_store() {
    let value = 0x0123_4567_89ab_cdefu64;
    for target in all_targets() {
        let func = atomic_func(Opcode::I64AtomicLoad, 0x20);
        let (machine, error) = execute(&func, &target, |m| {
            m.write_memory(0x20, &value.to_le_bytes());
        });
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.slot_u64(0), value, "{target:?}");

        let func = atomic_func(Opcode::I64AtomicStore, 0x20);
        let (machine, error) = execute(&func, &target, |m| {
            m.set_slot_u64(4, value);
        });
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.memory_u64(0x20), value, "{target:?}");
    }
}

/// `i64.atomic.store32` replaces only the low 32-bit lane.
#[test]
fn i64_atomic_store32_masks_lane() {
    for target in all_targets() {
        let func = atomic_func(Opcode::I64AtomicStore32, 0x20);
        let (machine, error) = execute(&func, &target, |m| {
            m.write_memory(0x20, &0x1122_3344_5566_7788u64.to_le_bytes());
            m.set_slot_u64(4, 0xaabb_ccdd);
        });
        assert_eq!(error, ErrorCode::NoError);
        // On 32-bit targets the helper masks the 64-bit container; on
        // 64-bit targets the native store writes the 4-byte lane.
        assert_eq!(machine.memory_u64(0x20), 0x1122_3344_aabb_ccdd, "{target:?}");
    }
}

#[test]
fn i64_atomic_narrow_load_masks() {
    for target in all_targets() {
        let func = atomic_func(Opcode::I64AtomicLoad8U, 0x20);
        let (machine, _) = execute(&func, &target, |m| {
            m.write_memory(0x20, &0xfff0_f1f2_f3f4_f5f6u64.to_le_bytes());
        });
        assert_eq!(machine.slot_u64(0), 0xf6, "{target:?}");
    }
}

// =============================================================================
// Read-modify-write
// =============================================================================

/// Memory word 0xAABBCCDD; `i32.atomic.rmw8.xor` at address 2 with 0xFF
/// yields old value 0xBB and leaves 0xAA44CCDD.
#[test]
fn scenario_rmw8_xor_masks_lane() {
    for target in all_targets() {
        let func = atomic_func(Opcode::I32AtomicRmw8XorU, 2);
        let (machine, error) = execute(&func, &target, |m| {
            m.write_memory(0, &0xaabb_ccddu32.to_le_bytes());
            m.set_slot_u32(4, 0xff);
        });
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.slot_u32(0), 0xbb, "old value on {target:?}");
        assert_eq!(machine.memory_u32(0), 0xaa44_ccdd, "{target:?}");
    }
}

#[test]
fn i32_atomic_rmw_operations() {
    let word = 0x0000_0100u32;
    let cases: &[(Opcode, u32, u32)] = &[
        (Opcode::I32AtomicRmwAdd, 0x20, 0x120),
        (Opcode::I32AtomicRmwSub, 0x20, 0xe0),
        (Opcode::I32AtomicRmwAnd, 0x320, 0x100),
        (Opcode::I32AtomicRmwOr, 0x021, 0x121),
        (Opcode::I32AtomicRmwXor, 0x120, 0x020),
        (Opcode::I32AtomicRmwXchg, 0x777, 0x777),
    ];
    for &(opcode, value, expected) in cases {
        for target in all_targets() {
            let func = atomic_func(opcode, 0x30);
            let (machine, error) = execute(&func, &target, |m| {
                m.write_memory(0x30, &word.to_le_bytes());
                m.set_slot_u32(4, value);
            });
            assert_eq!(error, ErrorCode::NoError);
            assert_eq!(machine.slot_u32(0), word, "old value for {opcode:?}");
            assert_eq!(machine.memory_u32(0x30), expected, "{opcode:?} on {target:?}");
        }
    }
}

#[test]
fn i64_atomic_rmw_full_width() {
    for target in all_targets() {
        let func = atomic_func(Opcode::I64AtomicRmwAdd, 0x40);
        let (machine, error) = execute(&func, &target, |m| {
            m.write_memory(0x40, &0xffff_ffffu64.to_le_bytes());
            m.set_slot_u64(4, 1);
        });
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.slot_u64(0), 0xffff_ffff, "old value on {target:?}");
        assert_eq!(machine.memory_u64(0x40), 0x1_0000_0000, "{target:?}");
    }
}

/// A 16-bit lane of an i64 rmw only disturbs its two bytes.
#[test]
fn i64_atomic_rmw16_masks_lane() {
    for target in all_targets() {
        let func = atomic_func(Opcode::I64AtomicRmw16AddU, 0x42);
        let (machine, error) = execute(&func, &target, |m| {
            m.write_memory(0x40, &0x1111_2222_ffff_4444u64.to_le_bytes());
            m.set_slot_u64(4, 1);
        });
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.slot_u64(0), 0xffff, "old lane on {target:?}");
        assert_eq!(machine.memory_u64(0x40), 0x1111_2222_0000_4444, "{target:?}");
    }
}

// =============================================================================
// Compare-exchange
// =============================================================================

#[test]
fn i32_atomic_cmpxchg_match_and_mismatch() {
    for target in all_targets() {
        let func = atomic_func(Opcode::I32AtomicRmwCmpxchg, 0x50);
        let (machine, error) = execute(&func, &target, |m| {
            m.write_memory(0x50, &7u32.to_le_bytes());
            m.set_slot_u32(4, 7);
            m.set_slot_u32(6, 99);
        });
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.slot_u32(0), 7, "witnessed on {target:?}");
        assert_eq!(machine.memory_u32(0x50), 99);

        let (machine, error) = execute(&func, &target, |m| {
            m.write_memory(0x50, &7u32.to_le_bytes());
            m.set_slot_u32(4, 8);
            m.set_slot_u32(6, 99);
        });
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.slot_u32(0), 7, "witnessed on {target:?}");
        assert_eq!(machine.memory_u32(0x50), 7, "mismatch leaves memory");
    }
}

#[test]
fn i64_atomic_cmpxchg() {
    let value = 0x0102_0304_0506_0708u64;
    for target in all_targets() {
        let func = atomic_func(Opcode::I64AtomicRmwCmpxchg, 0x58);
        let (machine, error) = execute(&func, &target, |m| {
            m.write_memory(0x58, &value.to_le_bytes());
            m.set_slot_u64(4, value);
            m.set_slot_u64(6, 1);
        });
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.slot_u64(0), value, "witnessed on {target:?}");
        assert_eq!(machine.memory_u64(0x58), 1);

        let (machine, _) = execute(&func, &target, |m| {
            m.write_memory(0x58, &value.to_le_bytes());
            m.set_slot_u64(4, 5);
            m.set_slot_u64(6, 1);
        });
        assert_eq!(machine.slot_u64(0), value);
        assert_eq!(machine.memory_u64(0x58), value, "mismatch leaves memory");
    }
}

#[test]
fn i64_atomic_cmpxchg8_compares_lane_only() {
    for target in all_targets() {
        let func = atomic_func(Opcode::I64AtomicRmw8CmpxchgU, 0x60);
        let (machine, error) = execute(&func, &target, |m| {
            m.write_memory(0x60, &0x1122_3344_5566_7788u64.to_le_bytes());
            m.set_slot_u64(4, 0x88);
            m.set_slot_u64(6, 0x11);
        });
        assert_eq!(error, ErrorCode::NoError);
        assert_eq!(machine.slot_u64(0), 0x88, "witnessed lane on {target:?}");
        if target.is_32bit() {
            // The helper rewrites only the masked byte of the container.
            assert_eq!(machine.memory_u64(0x60), 0x1122_3344_5566_7711);
        } else {
            assert_eq!(machine.memory_bytes(0x60, 1), &[0x11]);
        }
    }
}

// =============================================================================
// Helper linearizability
// =============================================================================

/// Two threads performing compare-exchange increments never lose an
/// update.
#[test]
fn cmpxchg_helper_is_linearizable() {
    const INCREMENTS: u64 = 100_000;
    let shared = Arc::new(AtomicU64::new(0));

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || {
                for _ in 0..INCREMENTS {
                    loop {
                        let current = shared.load(Ordering::SeqCst);
                        let witnessed = runtime::atomic_rmw_generic_cmpxchg64(
                            &shared,
                            current,
                            current + 1,
                            64,
                        );
                        if witnessed == current {
                            break;
                        }
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker finishes");
    }

    assert_eq!(shared.load(Ordering::SeqCst), 2 * INCREMENTS);
}

#[test]
fn rmw_helper_masks_modify_and_result() {
    let shared = AtomicU64::new(0xaabb_ccdd);
    let packed = (u64::from(wasm_lir::lir::AtomicOp::Add.as_u32()) << 32) | 16;
    let old = runtime::atomic_rmw_generic64(&shared, 0x10, packed);
    assert_eq!(old, 0xccdd);
    assert_eq!(shared.load(Ordering::SeqCst), 0xaabb_cced);
}
