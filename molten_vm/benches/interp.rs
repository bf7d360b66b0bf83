//! Interpreter hot-loop benchmark: a counting loop with phi back-edges,
//! the shape that dominates real guest execution time.

use criterion::{criterion_group, criterion_main, Criterion};
use molten_core::EngineConfig;
use molten_ir::constant::ConstId;
use molten_ir::types::Type;
use molten_ir::{BinOp, Block, Constant, Function, ICmpPred, Instruction, Module, Operand, Value};
use molten_vm::interp::Interpreter;
use molten_vm::link::link;

fn sum_module() -> (molten_vm::Context, u32) {
    let mut module = Module::default();
    let i32t = module.types.int(32);
    let fnty = module.types.intern(Type::Function {
        ret: i32t,
        params: vec![i32t],
        vararg: false,
    });
    let zero = ConstId::new(module.constants.len() as u32);
    module.constants.push(Constant::Int { ty: i32t, value: 0 });
    let one = ConstId::new(module.constants.len() as u32);
    module.constants.push(Constant::Int { ty: i32t, value: 1 });

    let blocks = vec![
        Block {
            insts: vec![Instruction::Br { dest: 1 }],
        },
        Block {
            insts: vec![
                Instruction::Phi {
                    ty: i32t,
                    incoming: [(0u32, Operand::Const(one)), (1u32, Operand::Local(3))]
                        .into_iter()
                        .collect(),
                },
                Instruction::Phi {
                    ty: i32t,
                    incoming: [(0u32, Operand::Const(zero)), (1u32, Operand::Local(4))]
                        .into_iter()
                        .collect(),
                },
                Instruction::Binary {
                    op: BinOp::Add,
                    ty: i32t,
                    lhs: Operand::Local(1),
                    rhs: Operand::Const(one),
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
        },
        Block {
            insts: vec![Instruction::Ret {
                value: Some(Operand::Local(4)),
            }],
        },
    ];
    module.functions.push(Function {
        name: "sum_to".into(),
        ty: fnty,
        blocks,
        is_declaration: false,
    });
    module.index_names();
    let ctx = link(module, EngineConfig::with_stack_limit(64)).expect("link");
    (ctx, 0)
}

fn bench_sum_loop(c: &mut Criterion) {
    let (ctx, index) = sum_module();
    c.bench_function("sum_loop_10k", |b| {
        b.iter(|| {
            let mut interp = Interpreter::new(&ctx);
            let result = interp
                .call_function(index, vec![Value::I32(10_000)])
                .unwrap();
            assert!(result.is_some());
        })
    });
}

criterion_group!(benches, bench_sum_loop);
criterion_main!(benches);
