//! Natively implemented guest-callable functions.
//!
//! The heap builtins route straight into the memory manager, so guest
//! `malloc`/`free` stay inside the managed address space with full
//! double-free and use-after-free detection. The `molten_*` entries are
//! the standard-library interop boundary: they convert between guest
//! values and host-managed polyglot values and are reachable only through
//! the foreign-function bridge.

use crate::interp::{Interpreter, VmError, VmResult};
use molten_core::error::MemoryErrorKind;
use molten_core::EngineError;
use molten_ir::{Pointer, Value};
use molten_memory::AllocationKind;
use std::io::Write;

/// Alignment of guest heap allocations, matching common `malloc` ABIs.
const HEAP_ALIGN: u64 = 16;

/// Dispatch a call to a builtin, if `name` names one.
pub fn dispatch(
    interp: &mut Interpreter<'_>,
    name: &str,
    args: &[Value],
) -> Option<VmResult<Option<Value>>> {
    Some(match name {
        "malloc" => malloc(interp, args),
        "calloc" => calloc(interp, args),
        "realloc" => realloc(interp, args),
        "free" => free(interp, args),
        "abort" => Err(EngineError::GuestAbort.into()),
        "exit" | "_exit" => exit(args),
        "puts" => puts(interp, args),
        "putchar" => putchar(args),
        "printf" => printf(interp, args),
        "fflush" => Ok(Some(Value::I32(0))),
        "strlen" => strlen(interp, args),
        "strcmp" => strcmp(interp, args),
        "strcpy" => strcpy(interp, args),
        "memcpy" | "memmove" => memcpy(interp, args),
        "memset" => memset(interp, args),
        "getenv" => Ok(Some(Value::Ptr(Pointer::NULL))),
        "molten_box_i64" => box_i64(interp, args),
        "molten_unbox_i64" => unbox_i64(interp, args),
        "molten_box_f64" => box_f64(interp, args),
        "molten_unbox_f64" => unbox_f64(interp, args),
        "molten_export" => export(interp, args),
        "molten_import" => import(interp, args),
        _ => return None,
    })
}

// =============================================================================
// Argument Helpers
// =============================================================================

fn int_arg(args: &[Value], i: usize) -> Result<u64, EngineError> {
    args.get(i)
        .and_then(|v| v.as_u64())
        .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))
}

fn ptr_arg(args: &[Value], i: usize) -> Result<Pointer, EngineError> {
    args.get(i)
        .and_then(|v| v.as_ptr())
        .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))
}

// =============================================================================
// Heap
// =============================================================================

fn malloc(interp: &Interpreter<'_>, args: &[Value]) -> VmResult<Option<Value>> {
    let size = int_arg(args, 0)?;
    let ptr = match interp
        .ctx
        .mem
        .allocate(AllocationKind::Heap, size, HEAP_ALIGN)
    {
        Ok(id) => Pointer::base(id),
        // Allocation failure is a null return, not a trap.
        Err(_) => Pointer::NULL,
    };
    Ok(Some(Value::Ptr(ptr)))
}

fn calloc(interp: &Interpreter<'_>, args: &[Value]) -> VmResult<Option<Value>> {
    let count = int_arg(args, 0)?;
    let size = int_arg(args, 1)?;
    let total = match count.checked_mul(size) {
        Some(total) => total,
        None => return Ok(Some(Value::Ptr(Pointer::NULL))),
    };
    // Fresh allocations are already zeroed.
    malloc(interp, &[Value::I64(total)])
}

fn realloc(interp: &Interpreter<'_>, args: &[Value]) -> VmResult<Option<Value>> {
    let old = ptr_arg(args, 0)?;
    let new_size = int_arg(args, 1)?;
    if old.is_null() {
        return malloc(interp, &[Value::I64(new_size)]);
    }
    let mem = &interp.ctx.mem;
    let old_size = mem.size_of_alloc(old.alloc)?;
    let new_id = match mem.allocate(AllocationKind::Heap, new_size, HEAP_ALIGN) {
        Ok(id) => id,
        Err(_) => return Ok(Some(Value::Ptr(Pointer::NULL))),
    };
    let keep = old_size.min(new_size);
    if keep > 0 {
        let bytes = mem.read_bytes(Pointer::base(old.alloc), keep)?;
        mem.write_bytes(Pointer::base(new_id), &bytes)?;
    }
    mem.free(old.alloc)?;
    Ok(Some(Value::Ptr(Pointer::base(new_id))))
}

fn free(interp: &Interpreter<'_>, args: &[Value]) -> VmResult<Option<Value>> {
    let ptr = ptr_arg(args, 0)?;
    if ptr.is_null() {
        return Ok(None);
    }
    if ptr.offset != 0 {
        // Freeing an interior pointer is heap corruption in native code;
        // here it is a detected error.
        return Err(EngineError::Memory(MemoryErrorKind::FreeOfNonHeap).into());
    }
    interp.ctx.mem.free(ptr.alloc)?;
    Ok(None)
}

// =============================================================================
// Process
// =============================================================================

fn exit(args: &[Value]) -> VmResult<Option<Value>> {
    let code = args.first().and_then(|v| v.as_i64()).unwrap_or(0);
    Err(VmError::Exit(code as i32))
}

// =============================================================================
// Output
// =============================================================================

fn puts(interp: &Interpreter<'_>, args: &[Value]) -> VmResult<Option<Value>> {
    let text = interp.ctx.mem.read_c_string(ptr_arg(args, 0)?)?;
    println!("{text}");
    Ok(Some(Value::I32(text.len() as u32 + 1)))
}

fn putchar(args: &[Value]) -> VmResult<Option<Value>> {
    let c = int_arg(args, 0)? as u8;
    let mut out = std::io::stdout();
    let _ = out.write_all(&[c]);
    Ok(Some(Value::I32(u32::from(c))))
}

fn printf(interp: &Interpreter<'_>, args: &[Value]) -> VmResult<Option<Value>> {
    let format = interp.ctx.mem.read_c_string(ptr_arg(args, 0)?)?;
    let rendered = format_printf(interp, &format, &args[1..])?;
    let mut out = std::io::stdout();
    let _ = out.write_all(rendered.as_bytes());
    let _ = out.flush();
    Ok(Some(Value::I32(rendered.len() as u32)))
}

/// The printf subset real test programs use: `%d %i %u %x %c %s %p %f %g`
/// with `l`/`ll`/`z` length modifiers and `%%`.
fn format_printf(
    interp: &Interpreter<'_>,
    format: &str,
    args: &[Value],
) -> Result<String, EngineError> {
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    let mut next = 0usize;
    let mut arg = |next: &mut usize| -> Result<Value, EngineError> {
        let value = args
            .get(*next)
            .cloned()
            .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
        *next += 1;
        Ok(value)
    };

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        // Length modifiers change nothing: values carry their width.
        while matches!(chars.peek(), Some('l' | 'z' | 'h')) {
            chars.next();
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('d' | 'i') => {
                let v = arg(&mut next)?;
                out.push_str(&v.as_i64().unwrap_or(0).to_string());
            }
            Some('u') => {
                let v = arg(&mut next)?;
                out.push_str(&v.as_u64().unwrap_or(0).to_string());
            }
            Some('x') => {
                let v = arg(&mut next)?;
                out.push_str(&format!("{:x}", v.as_u64().unwrap_or(0)));
            }
            Some('c') => {
                let v = arg(&mut next)?;
                out.push(v.as_u64().unwrap_or(0) as u8 as char);
            }
            Some('s') => {
                let v = arg(&mut next)?;
                let ptr = v
                    .as_ptr()
                    .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
                out.push_str(&interp.ctx.mem.read_c_string(ptr)?);
            }
            Some('p') => {
                let v = arg(&mut next)?;
                let token = match v {
                    Value::Ptr(p) => interp.ctx.mem.pointer_to_int(p),
                    other => other.as_u64().unwrap_or(0),
                };
                out.push_str(&format!("{token:#x}"));
            }
            Some('f' | 'g' | 'e') => {
                let v = arg(&mut next)?;
                let f = v.as_f64().unwrap_or(0.0);
                out.push_str(&format!("{f:.6}"));
            }
            _ => return Err(EngineError::Memory(MemoryErrorKind::TypeMismatch)),
        }
    }
    Ok(out)
}

// =============================================================================
// Strings & Memory
// =============================================================================

fn strlen(interp: &Interpreter<'_>, args: &[Value]) -> VmResult<Option<Value>> {
    let len = interp.ctx.mem.c_string_len(ptr_arg(args, 0)?)?;
    Ok(Some(Value::I64(len)))
}

fn strcmp(interp: &Interpreter<'_>, args: &[Value]) -> VmResult<Option<Value>> {
    let a = interp.ctx.mem.read_c_string(ptr_arg(args, 0)?)?;
    let b = interp.ctx.mem.read_c_string(ptr_arg(args, 1)?)?;
    let result = match a.cmp(&b) {
        std::cmp::Ordering::Less => -1i32,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    };
    Ok(Some(Value::I32(result as u32)))
}

fn strcpy(interp: &Interpreter<'_>, args: &[Value]) -> VmResult<Option<Value>> {
    let dst = ptr_arg(args, 0)?;
    let src = ptr_arg(args, 1)?;
    let mem = &interp.ctx.mem;
    let len = mem.c_string_len(src)?;
    let bytes = mem.read_bytes(src, len + 1)?;
    mem.write_bytes(dst, &bytes)?;
    Ok(Some(Value::Ptr(dst)))
}

fn memcpy(interp: &Interpreter<'_>, args: &[Value]) -> VmResult<Option<Value>> {
    let dst = ptr_arg(args, 0)?;
    let src = ptr_arg(args, 1)?;
    let len = int_arg(args, 2)?;
    interp.ctx.mem.copy_bytes(dst, src, len)?;
    Ok(Some(Value::Ptr(dst)))
}

fn memset(interp: &Interpreter<'_>, args: &[Value]) -> VmResult<Option<Value>> {
    let dst = ptr_arg(args, 0)?;
    let value = int_arg(args, 1)? as u8;
    let len = int_arg(args, 2)?;
    interp.ctx.mem.fill_bytes(dst, value, len)?;
    Ok(Some(Value::Ptr(dst)))
}

// =============================================================================
// Interop Boundary
// =============================================================================

fn box_i64(interp: &Interpreter<'_>, args: &[Value]) -> VmResult<Option<Value>> {
    let raw = args.first().and_then(|v| v.as_i64()).unwrap_or(0);
    let handle = interp.ctx.host_values.insert(Value::I64(raw as u64));
    Ok(Some(Value::Ptr(handle)))
}

fn unbox_i64(interp: &Interpreter<'_>, args: &[Value]) -> VmResult<Option<Value>> {
    let handle = ptr_arg(args, 0)?;
    let value = interp
        .ctx
        .host_values
        .get(handle)
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    Ok(Some(Value::I64(value)))
}

fn box_f64(interp: &Interpreter<'_>, args: &[Value]) -> VmResult<Option<Value>> {
    let raw = args.first().and_then(|v| v.as_f64()).unwrap_or(0.0);
    let handle = interp.ctx.host_values.insert(Value::F64(raw));
    Ok(Some(Value::Ptr(handle)))
}

fn unbox_f64(interp: &Interpreter<'_>, args: &[Value]) -> VmResult<Option<Value>> {
    let handle = ptr_arg(args, 0)?;
    let value = interp
        .ctx
        .host_values
        .get(handle)
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    Ok(Some(Value::F64(value)))
}

fn export(interp: &Interpreter<'_>, args: &[Value]) -> VmResult<Option<Value>> {
    let name = interp.ctx.mem.read_c_string(ptr_arg(args, 0)?)?;
    let handle = ptr_arg(args, 1)?;
    interp.ctx.host_values.export(name, handle);
    Ok(None)
}

fn import(interp: &Interpreter<'_>, args: &[Value]) -> VmResult<Option<Value>> {
    let name = interp.ctx.mem.read_c_string(ptr_arg(args, 0)?)?;
    let handle = interp
        .ctx
        .host_values
        .import(&name)
        .unwrap_or(Pointer::NULL);
    Ok(Some(Value::Ptr(handle)))
}
