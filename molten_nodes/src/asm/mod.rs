//! The inline-assembly sub-parser.
//!
//! Parses the bounded AT&T-syntax grammar embedded in call-like
//! instructions (a constraint string plus a statement template) and
//! compiles it into ordinary nodes spliced into the caller's block, so the
//! interpreter never distinguishes assembly-derived nodes from translated
//! IR. Register contents are tracked symbolically; memory operands become
//! checked loads and stores through the operand pointer.
//!
//! Anything outside the grammar fails translation with
//! `UnsupportedAssembly`, never at run time.

pub mod registers;

use crate::node::{IntrinsicOp, Node, NodeBlock, Src};
use crate::translate::Translator;
use molten_core::EngineError;
use molten_ir::{AtomicOrdering, BinOp, RmwOp, Value};
use registers::Gpr;
use rustc_hash::FxHashMap;
use smallvec::smallvec;

// =============================================================================
// Constraint String
// =============================================================================

/// One template operand, in `$N` numbering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperandSlot {
    /// Non-indirect output: becomes the call's return value.
    RetOutput,
    /// Indirect (`=*m`) output: the call passes its pointer as `arg`.
    MemOutput { arg: usize },
    /// Input operand taken from call argument `arg`.
    Input { arg: usize, memory: bool },
}

/// Parsed constraint string: the operand table plus tie-backs.
#[derive(Debug, Default)]
struct Constraints {
    slots: Vec<OperandSlot>,
    /// `(input slot, output slot)` ties from digit constraints.
    ties: Vec<(usize, usize)>,
}

fn parse_constraints(raw: &str) -> Result<Constraints, EngineError> {
    let mut parsed = Constraints::default();
    let mut next_arg = 0usize;
    for item in raw.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        if let Some(rest) = item.strip_prefix('~') {
            // Clobbers (~{memory}, ~{flags}, …) need no modeling: every
            // memory access is explicit and registers are symbolic.
            let _ = rest;
            continue;
        }
        if let Some(rest) = item.strip_prefix('=') {
            if rest.contains('*') {
                parsed.slots.push(OperandSlot::MemOutput { arg: next_arg });
                next_arg += 1;
            } else {
                parsed.slots.push(OperandSlot::RetOutput);
            }
            continue;
        }
        if item.chars().all(|c| c.is_ascii_digit()) {
            let target: usize = item
                .parse()
                .map_err(|_| EngineError::UnsupportedAssembly(item.to_string()))?;
            let slot = parsed.slots.len();
            parsed.slots.push(OperandSlot::Input {
                arg: next_arg,
                memory: false,
            });
            parsed.ties.push((slot, target));
            next_arg += 1;
            continue;
        }
        let memory = item.contains('m') && !item.contains('r');
        parsed.slots.push(OperandSlot::Input {
            arg: next_arg,
            memory,
        });
        next_arg += 1;
    }
    Ok(parsed)
}

// =============================================================================
// Template
// =============================================================================

/// One parsed operand of a statement.
#[derive(Debug, Clone, PartialEq)]
enum AsmArg {
    /// `$N` template operand reference.
    Param(usize),
    /// `$$imm` literal.
    Imm(i64),
    /// `%reg` register reference.
    Reg(Gpr, u32),
}

/// One parsed statement.
#[derive(Debug)]
struct Statement {
    mnemonic: String,
    args: Vec<AsmArg>,
}

fn parse_template(template: &str) -> Result<Vec<Statement>, EngineError> {
    let mut statements = Vec::new();
    for raw in template.split(|c| c == ';' || c == '\n') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let (mut mnemonic, mut rest) = match raw.split_once(char::is_whitespace) {
            Some((m, rest)) => (m, rest.trim()),
            None => (raw, ""),
        };
        // A `lock` prefix folds into the atomic lowering of what follows.
        if mnemonic.eq_ignore_ascii_case("lock") && !rest.is_empty() {
            (mnemonic, rest) = match rest.split_once(char::is_whitespace) {
                Some((m, tail)) => (m, tail.trim()),
                None => (rest, ""),
            };
        }
        let mut args = Vec::new();
        if !rest.is_empty() {
            for token in rest.split(',') {
                args.push(parse_operand(token.trim(), mnemonic)?);
            }
        }
        statements.push(Statement {
            mnemonic: mnemonic.to_ascii_lowercase(),
            args,
        });
    }
    Ok(statements)
}

fn parse_operand(token: &str, mnemonic: &str) -> Result<AsmArg, EngineError> {
    if let Some(rest) = token.strip_prefix("$$") {
        let value: i64 = rest
            .parse()
            .map_err(|_| EngineError::UnsupportedAssembly(mnemonic.to_string()))?;
        return Ok(AsmArg::Imm(value));
    }
    if let Some(rest) = token.strip_prefix('$') {
        let index: usize = rest
            .parse()
            .map_err(|_| EngineError::UnsupportedAssembly(mnemonic.to_string()))?;
        return Ok(AsmArg::Param(index));
    }
    if let Some(rest) = token.strip_prefix('%') {
        if let Some((reg, bits)) = Gpr::parse(rest) {
            return Ok(AsmArg::Reg(reg, bits));
        }
    }
    Err(EngineError::UnsupportedAssembly(mnemonic.to_string()))
}

// =============================================================================
// Translation
// =============================================================================

/// Compile an inline-assembly fragment into nodes appended to `out`.
///
/// `args` are the call's arguments in order; `dst` is the slot for the
/// call's return value, if its signature has one.
pub(crate) fn translate_inline_asm(
    tr: &mut Translator<'_>,
    template: &str,
    constraints: &str,
    _side_effects: bool,
    args: &[Src],
    dst: Option<u32>,
    out: &mut NodeBlock,
) -> Result<(), EngineError> {
    let parsed = parse_constraints(constraints)?;
    let statements = parse_template(template)?;

    // Seed the symbolic operand environment.
    let mut env: Vec<Src> = parsed
        .slots
        .iter()
        .map(|slot| match slot {
            OperandSlot::RetOutput => Src::Imm(Value::I64(0)),
            OperandSlot::MemOutput { arg } | OperandSlot::Input { arg, .. } => args
                .get(*arg)
                .cloned()
                .unwrap_or(Src::Imm(Value::I64(0))),
        })
        .collect();
    for (input, output) in &parsed.ties {
        if *output < env.len() && *input < env.len() {
            env[*output] = env[*input].clone();
        }
    }

    let mut ctx = AsmCtx {
        tr,
        slots: &parsed.slots,
        env,
        regs: FxHashMap::default(),
        out,
    };
    for statement in &statements {
        ctx.emit(statement)?;
    }

    // Bind the return value.
    if let Some(dst) = dst {
        let outputs: Vec<usize> = parsed
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == OperandSlot::RetOutput)
            .map(|(i, _)| i)
            .collect();
        match outputs.as_slice() {
            [] => ctx.out.nodes.push(Node::Move {
                dst,
                src: Src::Imm(Value::I64(0)),
            }),
            [single] => {
                let src = ctx.env[*single].clone();
                ctx.out.nodes.push(Node::Move { dst, src });
            }
            _ => {
                return Err(EngineError::UnsupportedAssembly(
                    "multiple output operands".into(),
                ));
            }
        }
    }
    Ok(())
}

struct AsmCtx<'t, 'a> {
    tr: &'t mut Translator<'a>,
    slots: &'t [OperandSlot],
    env: Vec<Src>,
    regs: FxHashMap<Gpr, Src>,
    out: &'t mut NodeBlock,
}

impl AsmCtx<'_, '_> {
    fn emit(&mut self, statement: &Statement) -> Result<(), EngineError> {
        let mnemonic = statement.mnemonic.as_str();
        if mnemonic == "lock" {
            // Bare `lock` with nothing to prefix.
            return Ok(());
        }
        let (base, bits) = split_width(mnemonic, &statement.args);
        let args = &statement.args;
        match base {
            "nop" | "pause" => Ok(()),
            "mfence" | "lfence" | "sfence" => {
                self.out.nodes.push(Node::Fence {
                    ordering: AtomicOrdering::SeqCst,
                });
                Ok(())
            }
            "rdtsc" => {
                // Deterministic timestamp: both halves read as zero.
                self.regs.insert(Gpr::Rax, Src::Imm(Value::I32(0)));
                self.regs.insert(Gpr::Rdx, Src::Imm(Value::I32(0)));
                Ok(())
            }
            "cpuid" => {
                for reg in [Gpr::Rax, Gpr::Rbx, Gpr::Rcx, Gpr::Rdx] {
                    self.regs.insert(reg, Src::Imm(Value::I32(0)));
                }
                Ok(())
            }
            "mov" => {
                let [src, dst] = two(args, mnemonic)?;
                let value = self.read(src, bits)?;
                self.write(dst, value, bits)
            }
            "add" | "sub" | "and" | "or" | "xor" => {
                let op = match base {
                    "add" => BinOp::Add,
                    "sub" => BinOp::Sub,
                    "and" => BinOp::And,
                    "or" => BinOp::Or,
                    _ => BinOp::Xor,
                };
                let [src, dst] = two(args, mnemonic)?;
                let a = self.read(dst, bits)?;
                let b = self.read(src, bits)?;
                let result = self.binary(op, a, b, bits)?;
                self.write(dst, result, bits)
            }
            "inc" | "dec" => {
                let [target] = one(args, mnemonic)?;
                let op = if base == "inc" { BinOp::Add } else { BinOp::Sub };
                let a = self.read(target, bits)?;
                let result = self.binary(op, a, Src::Imm(Value::int(bits, 1)), bits)?;
                self.write(target, result, bits)
            }
            "not" => {
                let [target] = one(args, mnemonic)?;
                let a = self.read(target, bits)?;
                let result = self.binary(BinOp::Xor, a, Src::Imm(Value::int(bits, u64::MAX)), bits)?;
                self.write(target, result, bits)
            }
            "neg" => {
                let [target] = one(args, mnemonic)?;
                let a = self.read(target, bits)?;
                let result = self.binary(BinOp::Sub, Src::Imm(Value::int(bits, 0)), a, bits)?;
                self.write(target, result, bits)
            }
            "bswap" => {
                let [target] = one(args, mnemonic)?;
                let a = self.read(target, bits)?;
                let slot = self.tr.alloc_slot();
                self.out.nodes.push(Node::Intrinsic {
                    dst: Some(slot),
                    op: IntrinsicOp::Bswap,
                    args: smallvec![a],
                });
                self.write(target, Src::Slot(slot), bits)
            }
            "xchg" => {
                let [src, dst] = two(args, mnemonic)?;
                if let Some(ptr) = self.memory_pointer(dst) {
                    let value = self.read(src, bits)?;
                    let old = self.tr.alloc_slot();
                    let ty = self.tr.int_ty(bits)?;
                    self.out.nodes.push(Node::AtomicRmw {
                        dst: old,
                        op: RmwOp::Xchg,
                        ptr,
                        value,
                        ty,
                        ordering: AtomicOrdering::SeqCst,
                    });
                    self.write(src, Src::Slot(old), bits)
                } else {
                    let a = self.read(src, bits)?;
                    let b = self.read(dst, bits)?;
                    self.write(src, b, bits)?;
                    self.write(dst, a, bits)
                }
            }
            "cmpxchg" => {
                let [src, dst] = two(args, mnemonic)?;
                let ptr = self
                    .memory_pointer(dst)
                    .ok_or_else(|| EngineError::UnsupportedAssembly(mnemonic.to_string()))?;
                let expected = self
                    .regs
                    .get(&Gpr::Rax)
                    .cloned()
                    .unwrap_or(Src::Imm(Value::int(bits, 0)));
                let replacement = self.read(src, bits)?;
                let old = self.tr.alloc_slot();
                let ty = self.tr.int_ty(bits)?;
                self.out.nodes.push(Node::CmpXchg {
                    dst: old,
                    ptr,
                    expected,
                    replacement,
                    ty,
                    success: AtomicOrdering::SeqCst,
                    failure: AtomicOrdering::SeqCst,
                    returns_pair: false,
                });
                // The accumulator always ends up holding the loaded value.
                self.regs.insert(Gpr::Rax, Src::Slot(old));
                Ok(())
            }
            other => Err(EngineError::UnsupportedAssembly(other.to_string())),
        }
    }

    /// Pointer source for an operand that names guest memory, if it does.
    fn memory_pointer(&self, arg: &AsmArg) -> Option<Src> {
        match arg {
            AsmArg::Param(n) => match self.slots.get(*n)? {
                OperandSlot::MemOutput { .. } | OperandSlot::Input { memory: true, .. } => {
                    Some(self.env[*n].clone())
                }
                _ => None,
            },
            _ => None,
        }
    }

    fn read(&mut self, arg: &AsmArg, bits: u32) -> Result<Src, EngineError> {
        match arg {
            AsmArg::Imm(v) => Ok(Src::Imm(Value::int(bits, *v as u64))),
            AsmArg::Reg(reg, _) => Ok(self
                .regs
                .get(reg)
                .cloned()
                .unwrap_or(Src::Imm(Value::int(bits, 0)))),
            AsmArg::Param(n) => {
                if let Some(ptr) = self.memory_pointer(arg) {
                    let slot = self.tr.alloc_slot();
                    let ty = self.tr.int_ty(bits)?;
                    self.out.nodes.push(Node::Load {
                        dst: slot,
                        ptr,
                        ty,
                        align: 1,
                        ordering: None,
                    });
                    Ok(Src::Slot(slot))
                } else {
                    self.env
                        .get(*n)
                        .cloned()
                        .ok_or_else(|| EngineError::UnsupportedAssembly(format!("${n}")))
                }
            }
        }
    }

    fn write(&mut self, arg: &AsmArg, value: Src, bits: u32) -> Result<(), EngineError> {
        match arg {
            AsmArg::Reg(reg, _) => {
                self.regs.insert(*reg, value);
                Ok(())
            }
            AsmArg::Param(n) => {
                if let Some(ptr) = self.memory_pointer(arg) {
                    let ty = self.tr.int_ty(bits)?;
                    self.out.nodes.push(Node::Store {
                        ptr,
                        value,
                        ty,
                        align: 1,
                        ordering: None,
                    });
                    Ok(())
                } else if *n < self.env.len() {
                    self.env[*n] = value;
                    Ok(())
                } else {
                    Err(EngineError::UnsupportedAssembly(format!("${n}")))
                }
            }
            AsmArg::Imm(_) => Err(EngineError::UnsupportedAssembly(
                "store to immediate".into(),
            )),
        }
    }

    fn binary(&mut self, op: BinOp, lhs: Src, rhs: Src, bits: u32) -> Result<Src, EngineError> {
        let slot = self.tr.alloc_slot();
        let ty = self.tr.int_ty(bits)?;
        self.out.nodes.push(Node::Binary {
            dst: slot,
            op,
            ty,
            lhs,
            rhs,
        });
        Ok(Src::Slot(slot))
    }
}

/// Split a width suffix off a mnemonic: `addl` → (`add`, 32). Without a
/// suffix, register operands decide; the fallback is 64 bits.
fn split_width<'m>(mnemonic: &'m str, args: &[AsmArg]) -> (&'m str, u32) {
    const SUFFIXED: &[&str] = &[
        "mov", "add", "sub", "and", "or", "xor", "inc", "dec", "not", "neg", "xchg", "cmpxchg",
        "bswap",
    ];
    if let Some(last) = mnemonic.chars().last() {
        let bits = match last {
            'b' => Some(8),
            'w' => Some(16),
            'l' => Some(32),
            'q' => Some(64),
            _ => None,
        };
        if let Some(bits) = bits {
            let base = &mnemonic[..mnemonic.len() - 1];
            if SUFFIXED.contains(&base) {
                return (base, bits);
            }
        }
    }
    let reg_bits = args.iter().find_map(|a| match a {
        AsmArg::Reg(_, bits) => Some(*bits),
        _ => None,
    });
    (mnemonic, reg_bits.unwrap_or(64))
}

fn one<'a>(args: &'a [AsmArg], mnemonic: &str) -> Result<[&'a AsmArg; 1], EngineError> {
    match args {
        [a] => Ok([a]),
        _ => Err(EngineError::UnsupportedAssembly(mnemonic.to_string())),
    }
}

fn two<'a>(args: &'a [AsmArg], mnemonic: &str) -> Result<[&'a AsmArg; 2], EngineError> {
    match args {
        [a, b] => Ok([a, b]),
        _ => Err(EngineError::UnsupportedAssembly(mnemonic.to_string())),
    }
}

// =============================================================================
// Tests
// =============================================================================
