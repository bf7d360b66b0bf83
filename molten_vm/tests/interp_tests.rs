//! End-to-end interpreter tests over hand-built modules.
//!
//! Each test constructs a decoded module the way the reader would produce
//! it, links it into a context, and drives the interpreter — covering the
//! whole pipeline except the bitstream decoding (which has its own suite).

use molten_core::{EngineConfig, EngineError};
use molten_ir::constant::ConstId;
use molten_ir::types::Type;
use molten_ir::{
    AtomicOrdering, BinOp, Block, Callee, Constant, Function, GlobalVariable, ICmpPred,
    Instruction, Module, Operand, RmwOp, TypeId, Value,
};
use molten_vm::interp::{Interpreter, VmError};
use molten_vm::link::link;
use std::sync::Arc;

// =============================================================================
// Construction Helpers
// =============================================================================

fn int_const(module: &mut Module, ty: TypeId, value: u64) -> Operand {
    let id = ConstId::new(module.constants.len() as u32);
    module.constants.push(Constant::Int { ty, value });
    Operand::Const(id)
}

fn push_const(module: &mut Module, constant: Constant) -> ConstId {
    let id = ConstId::new(module.constants.len() as u32);
    module.constants.push(constant);
    id
}

fn define(
    module: &mut Module,
    name: &str,
    ty: TypeId,
    blocks: Vec<Vec<Instruction>>,
) -> u32 {
    let index = module.functions.len() as u32;
    module.functions.push(Function {
        name: name.into(),
        ty,
        blocks: blocks
            .into_iter()
            .map(|insts| Block { insts })
            .collect(),
        is_declaration: false,
    });
    index
}

fn declare(module: &mut Module, name: &str, ty: TypeId) -> u32 {
    let index = module.functions.len() as u32;
    module.functions.push(Function {
        name: name.into(),
        ty,
        blocks: Vec::new(),
        is_declaration: true,
    });
    index
}

fn linked(mut module: Module) -> Arc<molten_vm::Context> {
    module.index_names();
    Arc::new(link(module, EngineConfig::with_stack_limit(128)).expect("link"))
}

fn call(
    ctx: &molten_vm::Context,
    index: u32,
    args: Vec<Value>,
) -> Result<Option<Value>, VmError> {
    Interpreter::new(ctx).call_function(index, args)
}

fn expect_trap(result: Result<Option<Value>, VmError>) -> molten_core::Trap {
    match result {
        Err(VmError::Trap(trap)) => trap,
        other => panic!("expected trap, got {:?}", other),
    }
}

// =============================================================================
// Constants & Control Flow
// =============================================================================

// A function computing a compile-time-constant return value returns
// exactly that constant.
#[test]
fn constant_return() {
    let mut module = Module::default();
    let i32t = module.types.int(32);
    let fnty = module.types.intern(Type::Function {
        ret: i32t,
        params: vec![],
        vararg: false,
    });
    let seven = int_const(&mut module, i32t, 7);
    let f = define(
        &mut module,
        "seven",
        fnty,
        vec![vec![Instruction::Ret { value: Some(seven) }]],
    );
    let ctx = linked(module);
    assert_eq!(call(&ctx, f, vec![]).unwrap(), Some(Value::I32(7)));
}

// A phi at a block with predecessors A and B selects A's value when A was
// the last executed predecessor, and B's when B was.
#[test]
fn phi_selects_by_executed_predecessor() {
    let mut module = Module::default();
    let i1 = module.types.int(1);
    let i32t = module.types.int(32);
    let fnty = module.types.intern(Type::Function {
        ret: i32t,
        params: vec![i1],
        vararg: false,
    });
    let ten = int_const(&mut module, i32t, 10);
    let twenty = int_const(&mut module, i32t, 20);
    let f = define(
        &mut module,
        "pick",
        fnty,
        vec![
            vec![Instruction::CondBr {
                cond: Operand::Local(0),
                on_true: 1,
                on_false: 2,
            }],
            vec![Instruction::Br { dest: 3 }],
            vec![Instruction::Br { dest: 3 }],
            vec![
                Instruction::Phi {
                    ty: i32t,
                    incoming: [(1, ten), (2, twenty)].into_iter().collect(),
                },
                Instruction::Ret {
                    value: Some(Operand::Local(1)),
                },
            ],
        ],
    );
    let ctx = linked(module);
    assert_eq!(
        call(&ctx, f, vec![Value::I1(true)]).unwrap(),
        Some(Value::I32(10))
    );
    assert_eq!(
        call(&ctx, f, vec![Value::I1(false)]).unwrap(),
        Some(Value::I32(20))
    );
}

// A counting loop: phis feed back across the loop edge (parallel copy must
// read both incoming values before writing either slot).
#[test]
fn loop_with_phi_backedge() {
    let mut module = Module::default();
    let i32t = module.types.int(32);
    let fnty = module.types.intern(Type::Function {
        ret: i32t,
        params: vec![i32t],
        vararg: false,
    });
    let zero = int_const(&mut module, i32t, 0);
    let one = int_const(&mut module, i32t, 1);
    // Locals: 0 = n, 1 = phi i, 2 = phi acc, 3 = next_i, 4 = next_acc,
    // 5 = continue?
    let f = define(
        &mut module,
        "sum_to",
        fnty,
        vec![
            vec![Instruction::Br { dest: 1 }],
            vec![
                Instruction::Phi {
                    ty: i32t,
                    incoming: [(0, one), (1, Operand::Local(3))].into_iter().collect(),
                },
                Instruction::Phi {
                    ty: i32t,
                    incoming: [(0, zero), (1, Operand::Local(4))].into_iter().collect(),
                },
                Instruction::Binary {
                    op: BinOp::Add,
                    ty: i32t,
                    lhs: Operand::Local(1),
                    rhs: one,
                },
                Instruction::Binary {
                    op: BinOp::Add,
                    ty: i32t,
                    lhs: Operand::Local(2),
                    rhs: Operand::Local(1),
                },
                Instruction::ICmp {
                    pred: ICmpPred::Sle,
                    lhs: Operand::Local(3),
                    rhs: Operand::Local(0),
                },
                Instruction::CondBr {
                    cond: Operand::Local(5),
                    on_true: 1,
                    on_false: 2,
                },
            ],
            vec![Instruction::Ret {
                value: Some(Operand::Local(4)),
            }],
        ],
    );
    let ctx = linked(module);
    // 1 + 2 + … + 5.
    assert_eq!(
        call(&ctx, f, vec![Value::I32(5)]).unwrap(),
        Some(Value::I32(15))
    );
    assert_eq!(
        call(&ctx, f, vec![Value::I32(100)]).unwrap(),
        Some(Value::I32(5050))
    );
}

// =============================================================================
// Memory
// =============================================================================

// Struct field addressing through alloca + GEP + store + load: the field
// offset must follow the fixed data layout (i8 then padding, i32 at 4).
#[test]
fn struct_field_store_load() {
    let mut module = Module::default();
    let i8t = module.types.int(8);
    let i32t = module.types.int(32);
    let i64t = module.types.int(64);
    let s = module.types.intern(Type::Struct {
        name: None,
        fields: vec![i8t, i32t],
        packed: false,
        opaque: false,
    });
    let fnty = module.types.intern(Type::Function {
        ret: i32t,
        params: vec![],
        vararg: false,
    });
    let zero64 = int_const(&mut module, i64t, 0);
    let one32 = int_const(&mut module, i32t, 1);
    let one_count = int_const(&mut module, i32t, 1);
    let seventy_seven = int_const(&mut module, i32t, 77);
    // Locals: 0 = alloca ptr, 1 = field ptr, 2 = loaded value.
    let f = define(
        &mut module,
        "field_roundtrip",
        fnty,
        vec![vec![
            Instruction::Alloca {
                elem_ty: s,
                count: one_count,
                align: 0,
            },
            Instruction::Gep {
                src_ty: s,
                ptr: Operand::Local(0),
                indices: [zero64, one32].into_iter().collect(),
                inbounds: true,
            },
            Instruction::Store {
                ptr: Operand::Local(1),
                value: seventy_seven,
                ty: i32t,
                align: 0,
                ordering: None,
            },
            Instruction::Load {
                ty: i32t,
                ptr: Operand::Local(1),
                align: 0,
                ordering: None,
            },
            Instruction::Ret {
                value: Some(Operand::Local(2)),
            },
        ]],
    );
    let ctx = linked(module);
    assert_eq!(call(&ctx, f, vec![]).unwrap(), Some(Value::I32(77)));
}

// Global variables are allocated and initialized at link time; loads see
// the initializer.
#[test]
fn global_initializer_visible() {
    let mut module = Module::default();
    let i64t = module.types.int(64);
    let init = push_const(&mut module, Constant::Int { ty: i64t, value: 99 });
    module.globals.push(GlobalVariable {
        name: "seed".into(),
        value_ty: i64t,
        init: Some(init),
        is_const: false,
        align: 8,
    });
    let fnty = module.types.intern(Type::Function {
        ret: i64t,
        params: vec![],
        vararg: false,
    });
    let f = define(
        &mut module,
        "read_seed",
        fnty,
        vec![vec![
            Instruction::Load {
                ty: i64t,
                ptr: Operand::Global(0),
                align: 0,
                ordering: None,
            },
            Instruction::Ret {
                value: Some(Operand::Local(0)),
            },
        ]],
    );
    let ctx = linked(module);
    assert_eq!(call(&ctx, f, vec![]).unwrap(), Some(Value::I64(99)));
}

// The heap builtins route into the managed memory: malloc, store, load,
// free, all bounds-checked.
#[test]
fn malloc_store_load_free() {
    let mut module = Module::default();
    let i8t = module.types.int(8);
    let i32t = module.types.int(32);
    let i64t = module.types.int(64);
    let p8 = module.types.pointer_to(i8t);
    let void = module.types.intern(Type::Void);
    let malloc_ty = module.types.intern(Type::Function {
        ret: p8,
        params: vec![i64t],
        vararg: false,
    });
    let free_ty = module.types.intern(Type::Function {
        ret: void,
        params: vec![p8],
        vararg: false,
    });
    let fnty = module.types.intern(Type::Function {
        ret: i32t,
        params: vec![],
        vararg: false,
    });
    let malloc_idx = declare(&mut module, "malloc", malloc_ty);
    let free_idx = declare(&mut module, "free", free_ty);
    let eight = int_const(&mut module, i64t, 8);
    let fortytwo = int_const(&mut module, i32t, 42);
    // Locals: 0 = malloc result, 1 = loaded value.
    let f = define(
        &mut module,
        "heap_roundtrip",
        fnty,
        vec![vec![
            Instruction::Call {
                callee: Callee::Direct(malloc_idx),
                sig: malloc_ty,
                args: [eight].into_iter().collect(),
            },
            Instruction::Store {
                ptr: Operand::Local(0),
                value: fortytwo,
                ty: i32t,
                align: 0,
                ordering: None,
            },
            Instruction::Load {
                ty: i32t,
                ptr: Operand::Local(0),
                align: 0,
                ordering: None,
            },
            Instruction::Call {
                callee: Callee::Direct(free_idx),
                sig: free_ty,
                args: [Operand::Local(0)].into_iter().collect(),
            },
            Instruction::Ret {
                value: Some(Operand::Local(1)),
            },
        ]],
    );
    let ctx = linked(module);
    assert_eq!(call(&ctx, f, vec![]).unwrap(), Some(Value::I32(42)));
}

// =============================================================================
// Traps
// =============================================================================

// Division by zero terminates the guest call chain and names the failing
// function in the diagnostic.
#[test]
fn division_by_zero_names_frame() {
    let mut module = Module::default();
    let i32t = module.types.int(32);
    let fnty = module.types.intern(Type::Function {
        ret: i32t,
        params: vec![i32t, i32t],
        vararg: false,
    });
    let f = define(
        &mut module,
        "divide",
        fnty,
        vec![vec![
            Instruction::Binary {
                op: BinOp::UDiv,
                ty: i32t,
                lhs: Operand::Local(0),
                rhs: Operand::Local(1),
            },
            Instruction::Ret {
                value: Some(Operand::Local(2)),
            },
        ]],
    );
    let ctx = linked(module);
    let trap = expect_trap(call(&ctx, f, vec![Value::I32(5), Value::I32(0)]));
    assert_eq!(trap.error, EngineError::DivisionByZero);
    assert_eq!(trap.frames[0].function, "divide");
}

#[test]
fn unreachable_traps() {
    let mut module = Module::default();
    let void = module.types.intern(Type::Void);
    let fnty = module.types.intern(Type::Function {
        ret: void,
        params: vec![],
        vararg: false,
    });
    let f = define(&mut module, "boom", fnty, vec![vec![Instruction::Unreachable]]);
    let ctx = linked(module);
    let trap = expect_trap(call(&ctx, f, vec![]));
    assert_eq!(trap.error, EngineError::UnreachableExecuted);
}

// Unbounded recursion hits the configured limit and unwinds cleanly.
#[test]
fn recursion_hits_stack_limit() {
    let mut module = Module::default();
    let void = module.types.intern(Type::Void);
    let fnty = module.types.intern(Type::Function {
        ret: void,
        params: vec![],
        vararg: false,
    });
    let f = define(
        &mut module,
        "forever",
        fnty,
        vec![vec![
            Instruction::Call {
                callee: Callee::Direct(0),
                sig: fnty,
                args: Default::default(),
            },
            Instruction::Ret { value: None },
        ]],
    );
    let ctx = linked(module);
    let trap = expect_trap(call(&ctx, f, vec![]));
    assert_eq!(trap.error, EngineError::StackOverflow { limit: 128 });
}

// Dereferencing past the end of an allocation traps; the same pointer
// arithmetic that stays in bounds succeeds.
#[test]
fn out_of_bounds_dereference_traps() {
    let mut module = Module::default();
    let i32t = module.types.int(32);
    let i64t = module.types.int(64);
    let fnty = module.types.intern(Type::Function {
        ret: i32t,
        params: vec![i64t],
        vararg: false,
    });
    let one = int_const(&mut module, i32t, 1);
    // Locals: 0 = index, 1 = alloca of [2 x i32], 2 = element ptr,
    // 3 = loaded.
    let arr = module.types.intern(Type::Array { elem: i32t, len: 2 });
    let count = int_const(&mut module, i32t, 1);
    let zero64 = int_const(&mut module, i64t, 0);
    let f = define(
        &mut module,
        "index_array",
        fnty,
        vec![vec![
            Instruction::Alloca {
                elem_ty: arr,
                count,
                align: 0,
            },
            Instruction::Gep {
                src_ty: arr,
                ptr: Operand::Local(1),
                indices: [zero64, Operand::Local(0)].into_iter().collect(),
                inbounds: true,
            },
            Instruction::Store {
                ptr: Operand::Local(2),
                value: one,
                ty: i32t,
                align: 0,
                ordering: None,
            },
            Instruction::Load {
                ty: i32t,
                ptr: Operand::Local(2),
                align: 0,
                ordering: None,
            },
            Instruction::Ret {
                value: Some(Operand::Local(3)),
            },
        ]],
    );
    let ctx = linked(module);
    // Indices 0 and 1 are in bounds.
    assert_eq!(
        call(&ctx, f, vec![Value::I64(1)]).unwrap(),
        Some(Value::I32(1))
    );
    // Index 2 is one past the end: representable, but a dereference trap.
    let trap = expect_trap(call(&ctx, f, vec![Value::I64(2)]));
    assert!(matches!(trap.error, EngineError::Memory(_)));
}

// =============================================================================
// Unwinding
// =============================================================================

// An invoke catches a guest-level unwind in its landing pad; the token
// reaches the pad intact.
#[test]
fn invoke_catches_resume() {
    let mut module = Module::default();
    let i8t = module.types.int(8);
    let i32t = module.types.int(32);
    let p8 = module.types.pointer_to(i8t);
    let void = module.types.intern(Type::Void);
    let token_ty = module.types.intern(Type::Struct {
        name: None,
        fields: vec![p8, i32t],
        packed: false,
        opaque: false,
    });
    let thrower_ty = module.types.intern(Type::Function {
        ret: void,
        params: vec![],
        vararg: false,
    });
    let catcher_ty = module.types.intern(Type::Function {
        ret: i32t,
        params: vec![],
        vararg: false,
    });

    let null_ptr = push_const(&mut module, Constant::Null(p8));
    let code = push_const(&mut module, Constant::Int { ty: i32t, value: 42 });
    let token = push_const(
        &mut module,
        Constant::Aggregate {
            ty: token_ty,
            elems: vec![null_ptr, code],
        },
    );

    let thrower = define(
        &mut module,
        "thrower",
        thrower_ty,
        vec![vec![Instruction::Resume {
            value: Operand::Const(token),
        }]],
    );
    let zero = int_const(&mut module, i32t, 0);
    // Locals in catcher: 0 = landing pad token, 1 = extracted code.
    let catcher = define(
        &mut module,
        "catcher",
        catcher_ty,
        vec![
            vec![Instruction::Invoke {
                callee: Callee::Direct(thrower),
                sig: thrower_ty,
                args: Default::default(),
                normal: 1,
                unwind: 2,
            }],
            vec![Instruction::Ret { value: Some(zero) }],
            vec![
                Instruction::LandingPad { ty: token_ty },
                Instruction::ExtractValue {
                    agg: Operand::Local(0),
                    indices: [1u32].into_iter().collect(),
                },
                Instruction::Ret {
                    value: Some(Operand::Local(1)),
                },
            ],
        ],
    );
    let ctx = linked(module);
    assert_eq!(call(&ctx, catcher, vec![]).unwrap(), Some(Value::I32(42)));
}

// =============================================================================
// Inline Assembly
// =============================================================================

// Assembly-derived nodes are indistinguishable from translated IR: a tied
// `incl` round-trips through the same slots.
#[test]
fn inline_asm_increment() {
    let mut module = Module::default();
    let i32t = module.types.int(32);
    let fnty = module.types.intern(Type::Function {
        ret: i32t,
        params: vec![i32t],
        vararg: false,
    });
    let f = define(
        &mut module,
        "asm_inc",
        fnty,
        vec![vec![
            Instruction::Call {
                callee: Callee::InlineAsm {
                    asm: "incl $0".into(),
                    constraints: "=r,0".into(),
                    side_effects: false,
                },
                sig: fnty,
                args: [Operand::Local(0)].into_iter().collect(),
            },
            Instruction::Ret {
                value: Some(Operand::Local(1)),
            },
        ]],
    );
    let ctx = linked(module);
    assert_eq!(
        call(&ctx, f, vec![Value::I32(41)]).unwrap(),
        Some(Value::I32(42))
    );
}

// An unsupported mnemonic fails at translation time — the load aborts and
// nothing runs.
#[test]
fn unsupported_assembly_fails_load() {
    let mut module = Module::default();
    let i32t = module.types.int(32);
    let fnty = module.types.intern(Type::Function {
        ret: i32t,
        params: vec![i32t],
        vararg: false,
    });
    define(
        &mut module,
        "vector_magic",
        fnty,
        vec![vec![
            Instruction::Call {
                callee: Callee::InlineAsm {
                    asm: "vfmadd231ps $0, $1, $1".into(),
                    constraints: "=r,0".into(),
                    side_effects: false,
                },
                sig: fnty,
                args: [Operand::Local(0)].into_iter().collect(),
            },
            Instruction::Ret {
                value: Some(Operand::Local(1)),
            },
        ]],
    );
    module.index_names();
    let err = link(module, EngineConfig::with_stack_limit(16)).unwrap_err();
    assert_eq!(
        err,
        EngineError::UnsupportedAssembly("vfmadd231ps".into())
    );
}

// =============================================================================
// Concurrency
// =============================================================================

// T guest threads × N seq-cst increments of a shared counter is exactly
// T × N.
#[test]
fn concurrent_atomic_increments() {
    let mut module = Module::default();
    let i64t = module.types.int(64);
    let fnty = module.types.intern(Type::Function {
        ret: i64t,
        params: vec![],
        vararg: false,
    });
    module.globals.push(GlobalVariable {
        name: "counter".into(),
        value_ty: i64t,
        init: None,
        is_const: false,
        align: 8,
    });
    let one = int_const(&mut module, i64t, 1);
    let bump = define(
        &mut module,
        "bump",
        fnty,
        vec![vec![
            Instruction::AtomicRmw {
                op: RmwOp::Add,
                ptr: Operand::Global(0),
                value: one,
                ty: i64t,
                ordering: AtomicOrdering::SeqCst,
            },
            Instruction::Ret {
                value: Some(Operand::Local(0)),
            },
        ]],
    );
    let ctx = linked(module);

    const THREADS: usize = 4;
    const PER_THREAD: usize = 250;
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            std::thread::spawn(move || {
                let mut interp = Interpreter::new(&ctx);
                for _ in 0..PER_THREAD {
                    interp.call_function(bump, vec![]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let counter = ctx
        .mem
        .load(
            &ctx.module.types,
            &ctx.module.layout,
            ctx.globals[0],
            i64t,
            0,
        )
        .unwrap();
    assert_eq!(counter, Value::I64((THREADS * PER_THREAD) as u64));
}

// Cancellation is an unwind delivered at a block boundary; a spinning
// guest thread stops and reports it.
#[test]
fn cancellation_stops_spinning_guest() {
    let mut module = Module::default();
    let void = module.types.intern(Type::Void);
    let fnty = module.types.intern(Type::Function {
        ret: void,
        params: vec![],
        vararg: false,
    });
    let spin = define(
        &mut module,
        "spin",
        fnty,
        vec![vec![Instruction::Br { dest: 0 }]],
    );
    let ctx = linked(module);

    let guest = molten_vm::thread::spawn(Arc::clone(&ctx), spin, vec![]);
    std::thread::sleep(std::time::Duration::from_millis(20));
    ctx.cancel();
    let trap = guest.join().unwrap_err();
    assert_eq!(trap.error, EngineError::Cancelled);
    assert_eq!(trap.frames[0].function, "spin");
}

// =============================================================================
// Foreign-Function Bridge
// =============================================================================

// A bridge call with a mismatched argument count fails with
// SignatureMismatch before any native code runs; the same symbol with the
// right arity goes through.
#[test]
fn ffi_arity_mismatch_is_signature_error() {
    let mut module = Module::default();
    let i64t = module.types.int(64);
    let labs_ty = module.types.intern(Type::Function {
        ret: i64t,
        params: vec![i64t],
        vararg: false,
    });
    let labs = declare(&mut module, "labs", labs_ty);
    let ctx = linked(module);

    let trap = expect_trap(call(&ctx, labs, vec![]));
    match trap.error {
        EngineError::SignatureMismatch { symbol, reason } => {
            assert_eq!(symbol, "labs");
            assert!(reason.contains("expected 1"));
        }
        other => panic!("expected SignatureMismatch, got {:?}", other),
    }

    // The correctly-shaped call reaches libc and computes |x|.
    assert_eq!(
        call(&ctx, labs, vec![Value::I64(-5i64 as u64)]).unwrap(),
        Some(Value::I64(5))
    );
}

// An undefined symbol that resolves nowhere is UnresolvedSymbol at first
// use.
#[test]
fn unresolved_symbol_at_first_use() {
    let mut module = Module::default();
    let i32t = module.types.int(32);
    let fnty = module.types.intern(Type::Function {
        ret: i32t,
        params: vec![],
        vararg: false,
    });
    let missing = declare(&mut module, "molten_definitely_missing_xyz", fnty);
    let ctx = linked(module);
    let trap = expect_trap(call(&ctx, missing, vec![]));
    assert_eq!(
        trap.error,
        EngineError::UnresolvedSymbol("molten_definitely_missing_xyz".into())
    );
}

// =============================================================================
// Indirect Calls
// =============================================================================

// Function pointers are first-class: taking a function's address and
// calling through it lands in the same function.
#[test]
fn indirect_call_through_function_pointer() {
    let mut module = Module::default();
    let i32t = module.types.int(32);
    let callee_ty = module.types.intern(Type::Function {
        ret: i32t,
        params: vec![],
        vararg: false,
    });
    let answer = int_const(&mut module, i32t, 123);
    let target = define(
        &mut module,
        "target",
        callee_ty,
        vec![vec![Instruction::Ret {
            value: Some(answer),
        }]],
    );
    let caller = define(
        &mut module,
        "caller",
        callee_ty,
        vec![vec![
            Instruction::Call {
                callee: Callee::Indirect(Operand::Func(target)),
                sig: callee_ty,
                args: Default::default(),
            },
            Instruction::Ret {
                value: Some(Operand::Local(0)),
            },
        ]],
    );
    let ctx = linked(module);
    assert_eq!(call(&ctx, caller, vec![]).unwrap(), Some(Value::I32(123)));
}
