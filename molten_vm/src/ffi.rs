//! The foreign-function bridge.
//!
//! Calls leaving the guest resolve in three steps: the builtin table (the
//! standard-library boundary implemented natively inside the engine), the
//! explicitly loaded shared objects, and finally the host process itself.
//! Argument count and class are verified against the declared signature
//! before any native code runs; a mismatch is `SignatureMismatch` and the
//! call never happens.
//!
//! Guest pointers never cross the boundary as raw addresses by default.
//! When a native signature demands a real address (every dlsym-resolved C
//! function does, since it will dereference), the bridge hands out a pinned,
//! bounds-fixed host copy of the allocation for the duration of the call
//! and copies it back afterwards.

use crate::builtins;
use crate::interp::{Interpreter, VmError, VmResult};
use molten_core::{EngineConfig, EngineError};
use molten_ir::types::{FloatKind, Type, TypeId};
use molten_ir::{Pointer, Value};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Native Libraries
// =============================================================================

/// One `dlopen`ed shared object.
#[derive(Debug)]
pub struct NativeLibrary {
    handle: *mut libc::c_void,
    path: PathBuf,
}

// The handle is process-global state guarded by the loader itself.
unsafe impl Send for NativeLibrary {}
unsafe impl Sync for NativeLibrary {}

impl NativeLibrary {
    /// Open a shared object.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let cpath = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|_| EngineError::UnresolvedSymbol(path.display().to_string()))?;
        let handle = unsafe { libc::dlopen(cpath.as_ptr(), libc::RTLD_NOW | libc::RTLD_GLOBAL) };
        if handle.is_null() {
            return Err(EngineError::UnresolvedSymbol(format!(
                "{}: {}",
                path.display(),
                dlerror_string()
            )));
        }
        Ok(NativeLibrary {
            handle,
            path: path.to_path_buf(),
        })
    }

    fn sym(&self, name: &CString) -> Option<usize> {
        let addr = unsafe { libc::dlsym(self.handle, name.as_ptr()) };
        if addr.is_null() {
            None
        } else {
            Some(addr as usize)
        }
    }
}

fn dlerror_string() -> String {
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        "unknown dlopen error".to_string()
    } else {
        unsafe { std::ffi::CStr::from_ptr(msg) }
            .to_string_lossy()
            .into_owned()
    }
}

// =============================================================================
// Bridge
// =============================================================================

/// Symbol resolution and marshaling state for one context.
pub struct Bridge {
    libs: Vec<NativeLibrary>,
    cache: Mutex<FxHashMap<Arc<str>, usize>>,
}

impl Bridge {
    /// Load the configured libraries: every `preload_libraries` entry,
    /// searched through `library_paths` when relative.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let mut libs = Vec::new();
        for name in &config.preload_libraries {
            let resolved = resolve_library_path(name, &config.library_paths);
            let lib = NativeLibrary::open(&resolved)?;
            debug!(path = %lib.path.display(), "loaded native library");
            libs.push(lib);
        }
        Ok(Bridge {
            libs,
            cache: Mutex::new(FxHashMap::default()),
        })
    }

    /// Resolve a native symbol: loaded libraries first, then the host
    /// process (`RTLD_DEFAULT`).
    pub fn resolve(&self, name: &str) -> Option<usize> {
        if let Some(&addr) = self.cache.lock().get(name) {
            return Some(addr);
        }
        let cname = CString::new(name).ok()?;
        let addr = self
            .libs
            .iter()
            .find_map(|lib| lib.sym(&cname))
            .or_else(|| {
                let addr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, cname.as_ptr()) };
                if addr.is_null() {
                    None
                } else {
                    Some(addr as usize)
                }
            })?;
        self.cache.lock().insert(name.into(), addr);
        Some(addr)
    }
}

/// Search `paths` for a relative library name.
fn resolve_library_path(name: &Path, paths: &[PathBuf]) -> PathBuf {
    if name.is_absolute() {
        return name.to_path_buf();
    }
    for dir in paths {
        let candidate = dir.join(name);
        if candidate.exists() {
            return candidate;
        }
    }
    name.to_path_buf()
}

// =============================================================================
// Call Entry
// =============================================================================

/// Call a declared-but-undefined function: builtin, or native via dlsym.
pub fn call_external(
    interp: &mut Interpreter<'_>,
    name: &str,
    sig: TypeId,
    args: &[Value],
) -> VmResult<Option<Value>> {
    if let Some(result) = builtins::dispatch(interp, name, args) {
        return result;
    }
    let ctx = interp.ctx;
    let addr = ctx
        .bridge
        .resolve(name)
        .ok_or_else(|| VmError::from(EngineError::UnresolvedSymbol(name.to_string())))?;

    let (ret, params, vararg) = ctx
        .module
        .types
        .signature(sig)
        .ok_or_else(|| VmError::from(EngineError::signature(name, "not a function type")))?;
    let params = params.to_vec();

    // Arity check happens before anything native runs.
    if args.len() < params.len() || (!vararg && args.len() != params.len()) {
        return Err(EngineError::signature(
            name,
            format!("expected {} arguments, found {}", params.len(), args.len()),
        )
        .into());
    }

    // Classify and marshal.
    let mut words: Vec<u64> = Vec::with_capacity(args.len());
    let mut doubles: Vec<f64> = Vec::with_capacity(args.len());
    let mut pins: Vec<Pinned> = Vec::new();

    for (i, arg) in args.iter().enumerate() {
        let declared = params.get(i).map(|ty| ctx.module.types.get(*ty));
        match (declared, arg) {
            (Some(Type::Float(FloatKind::Double | FloatKind::Float)), _)
            | (None, Value::F64(_) | Value::F32(_)) => {
                let f = arg.as_f64().ok_or_else(|| {
                    VmError::from(EngineError::signature(name, format!("argument {i} class")))
                })?;
                doubles.push(f);
            }
            (_, Value::Ptr(p)) => {
                words.push(pin_pointer(interp, &mut pins, *p)?);
            }
            (_, value) => {
                let raw = value.as_u64().ok_or_else(|| {
                    VmError::from(EngineError::signature(name, format!("argument {i} class")))
                })?;
                words.push(raw);
            }
        }
    }
    if !doubles.is_empty() && !words.is_empty() {
        return Err(EngineError::signature(name, "mixed float and integer arguments").into());
    }

    let ret_is_float = matches!(ctx.module.types.get(ret), Type::Float(_));
    if ret_is_float {
        // Float results live in a different return register, so they need
        // float-returning call shapes.
        let value = if doubles.is_empty() {
            unsafe { call_words_ret_double(addr, &words) }
        } else {
            unsafe { call_doubles(addr, &doubles) }
        }
        .map_err(|_| VmError::from(EngineError::signature(name, "unsupported arity")))?;
        unpin_all(interp, pins)?;
        return Ok(Some(match ctx.module.types.get(ret) {
            Type::Float(FloatKind::Float) => Value::F32(value as f32),
            _ => Value::F64(value),
        }));
    }
    if !doubles.is_empty() {
        return Err(EngineError::signature(name, "float arguments with integer return").into());
    }

    let raw_result = unsafe { call_words(addr, &words) }
        .map_err(|_| VmError::from(EngineError::signature(name, "unsupported arity")))?;
    unpin_all(interp, pins)?;

    Ok(match ctx.module.types.get(ret) {
        Type::Void => None,
        Type::Int { bits } => Some(Value::int(*bits, raw_result)),
        Type::Pointer { .. } => Some(Value::Ptr(if raw_result == 0 {
            Pointer::NULL
        } else {
            // Unknown native addresses stay opaque and non-dereferenceable.
            Pointer {
                alloc: molten_ir::AllocId::NULL,
                offset: raw_result,
            }
        })),
        _ => {
            return Err(EngineError::signature(name, "unsupported return class").into());
        }
    })
}

// =============================================================================
// Pinned Buffers
// =============================================================================

/// A guest allocation copied out for the duration of one native call.
struct Pinned {
    guest: Pointer,
    host: Box<[u8]>,
}

/// Produce the host address a pointer argument crosses the boundary as.
fn pin_pointer(
    interp: &Interpreter<'_>,
    pins: &mut Vec<Pinned>,
    ptr: Pointer,
) -> VmResult<u64> {
    if ptr.is_null() {
        return Ok(0);
    }
    if !ptr.alloc.is_valid() {
        // A raw integer the guest forged into a pointer: crosses unchanged.
        return Ok(ptr.offset);
    }
    let mem = &interp.ctx.mem;
    let size = mem.size_of_alloc(ptr.alloc)?;
    let base = Pointer::base(ptr.alloc);
    let bytes = mem.read_bytes(base, size)?.into_boxed_slice();
    // The boxed bytes never move while the pin list owns them.
    let host_addr = bytes.as_ptr() as u64;
    pins.push(Pinned {
        guest: base,
        host: bytes,
    });
    Ok(host_addr + ptr.offset)
}

/// Copy every pinned buffer back into guest memory after the call.
fn unpin_all(interp: &Interpreter<'_>, pins: Vec<Pinned>) -> VmResult<()> {
    for pin in pins {
        interp.ctx.mem.write_bytes(pin.guest, &pin.host)?;
    }
    Ok(())
}

// =============================================================================
// Raw Calls
// =============================================================================

/// Call a native address with up to eight word arguments.
///
/// # Safety
///
/// `addr` must be a function following the platform C ABI whose parameters
/// are all word-sized (integers or pointers).
unsafe fn call_words(addr: usize, words: &[u64]) -> Result<u64, ()> {
    use std::mem::transmute as t;
    Ok(match *words {
        [] => (t::<usize, extern "C" fn() -> u64>(addr))(),
        [a] => (t::<usize, extern "C" fn(u64) -> u64>(addr))(a),
        [a, b] => (t::<usize, extern "C" fn(u64, u64) -> u64>(addr))(a, b),
        [a, b, c] => (t::<usize, extern "C" fn(u64, u64, u64) -> u64>(addr))(a, b, c),
        [a, b, c, d] => (t::<usize, extern "C" fn(u64, u64, u64, u64) -> u64>(addr))(a, b, c, d),
        [a, b, c, d, e] => {
            (t::<usize, extern "C" fn(u64, u64, u64, u64, u64) -> u64>(addr))(a, b, c, d, e)
        }
        [a, b, c, d, e, f] => (t::<usize, extern "C" fn(u64, u64, u64, u64, u64, u64) -> u64>(
            addr,
        ))(a, b, c, d, e, f),
        [a, b, c, d, e, f, g] => (t::<
            usize,
            extern "C" fn(u64, u64, u64, u64, u64, u64, u64) -> u64,
        >(addr))(a, b, c, d, e, f, g),
        [a, b, c, d, e, f, g, h] => (t::<
            usize,
            extern "C" fn(u64, u64, u64, u64, u64, u64, u64, u64) -> u64,
        >(addr))(a, b, c, d, e, f, g, h),
        _ => return Err(()),
    })
}

/// Call a native address with word arguments and a double result.
///
/// # Safety
///
/// Same contract as [`call_words`], with a float-returning target.
unsafe fn call_words_ret_double(addr: usize, words: &[u64]) -> Result<f64, ()> {
    use std::mem::transmute as t;
    Ok(match *words {
        [] => (t::<usize, extern "C" fn() -> f64>(addr))(),
        [a] => (t::<usize, extern "C" fn(u64) -> f64>(addr))(a),
        [a, b] => (t::<usize, extern "C" fn(u64, u64) -> f64>(addr))(a, b),
        [a, b, c] => (t::<usize, extern "C" fn(u64, u64, u64) -> f64>(addr))(a, b, c),
        [a, b, c, d] => (t::<usize, extern "C" fn(u64, u64, u64, u64) -> f64>(addr))(a, b, c, d),
        _ => return Err(()),
    })
}

/// Call a native address whose parameters and result are all doubles.
///
/// # Safety
///
/// `addr` must follow the platform C ABI with the matching float arity.
unsafe fn call_doubles(addr: usize, doubles: &[f64]) -> Result<f64, ()> {
    match doubles {
        [] => Ok((std::mem::transmute::<usize, extern "C" fn() -> f64>(addr))()),
        [a] => Ok((std::mem::transmute::<usize, extern "C" fn(f64) -> f64>(addr))(*a)),
        [a, b] => Ok(
            (std::mem::transmute::<usize, extern "C" fn(f64, f64) -> f64>(addr))(*a, *b),
        ),
        [a, b, c] => Ok((std::mem::transmute::<
            usize,
            extern "C" fn(f64, f64, f64) -> f64,
        >(addr))(*a, *b, *c)),
        [a, b, c, d] => Ok((std::mem::transmute::<
            usize,
            extern "C" fn(f64, f64, f64, f64) -> f64,
        >(addr))(*a, *b, *c, *d)),
        _ => Err(()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_library_path_search_order() {
        let tmp = std::env::temp_dir();
        let absolute = tmp.join("libsomething.so");
        assert_eq!(
            resolve_library_path(&absolute, &[PathBuf::from("/nonexistent")]),
            absolute
        );
        // A relative name that exists nowhere falls through unchanged.
        assert_eq!(
            resolve_library_path(Path::new("libmissing.so"), &[PathBuf::from("/nonexistent")]),
            PathBuf::from("libmissing.so")
        );
    }

    #[test]
    fn test_bridge_resolves_host_symbols() {
        let bridge = Bridge::from_config(&EngineConfig {
            stack_limit: 10,
            library_paths: Vec::new(),
            preload_libraries: Vec::new(),
        })
        .unwrap();
        // strlen lives in the host process via libc.
        assert!(bridge.resolve("strlen").is_some());
        assert!(bridge.resolve("definitely_not_a_symbol_xyz").is_none());
    }

    #[test]
    fn test_call_words_strlen() {
        let bridge = Bridge::from_config(&EngineConfig {
            stack_limit: 10,
            library_paths: Vec::new(),
            preload_libraries: Vec::new(),
        })
        .unwrap();
        let addr = bridge.resolve("strlen").unwrap();
        let text = std::ffi::CString::new("molten").unwrap();
        let len = unsafe { call_words(addr, &[text.as_ptr() as u64]) }.unwrap();
        assert_eq!(len, 6);
    }

    #[test]
    fn test_open_missing_library_is_unresolved() {
        let err = NativeLibrary::open(Path::new("/definitely/missing.so")).unwrap_err();
        assert!(matches!(err, EngineError::UnresolvedSymbol(_)));
    }
}
