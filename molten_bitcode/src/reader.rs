//! Module-level container decoding.
//!
//! The reader walks the nested block structure of the stream, building the
//! type table, global/function prototypes and the constant pool, and hands
//! each function body to [`crate::function`]. Forward references (a global
//! initializer naming a later value) are recorded and resolved after the
//! module block closes; anything still dangling is a `LinkError`.

use crate::abbrev::{
    read_abbrev_def, read_abbreviated_record, read_unabbrev_record, Abbrev, Record,
};
use crate::bitstream::BitCursor;
use crate::codes::*;
use molten_core::EngineError;
use molten_ir::constant::ConstId;
use molten_ir::types::{FloatKind, Type, TypeId, TypeTable};
use molten_ir::{Constant, Function, GlobalVariable, Module, Operand};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Magic bytes of a raw bitcode stream: 'B', 'C', 0xC0, 0xDE.
const BITCODE_MAGIC: [u8; 4] = [0x42, 0x43, 0xC0, 0xDE];

/// First word of the Darwin wrapper header.
const WRAPPER_MAGIC: u32 = 0x0B17_C0DE;

/// The only module VERSION record value this reader accepts: the relative
/// value-id encoding introduced with LLVM 3.2.
const SUPPORTED_VERSION: u64 = 1;

// =============================================================================
// Entry Point
// =============================================================================

/// Decode a complete bitcode buffer into a module.
pub fn parse_module(bytes: &[u8]) -> Result<Module, EngineError> {
    let payload = strip_wrapper(bytes)?;
    if payload.len() < 4 || payload[..4] != BITCODE_MAGIC {
        return Err(EngineError::malformed(0, "bad magic header"));
    }
    let mut cursor = BitCursor::new(payload);
    cursor.skip_bits(32)?;

    let mut state = ReaderState::new(cursor);
    let mut module_seen = false;

    while state.cursor.bit_pos() + 32 <= state.cursor.bit_len() {
        let id = state.cursor.read(INITIAL_ABBREV_WIDTH)?;
        match id {
            ENTER_SUBBLOCK => {
                let block_id = state.cursor.read_vbr(8)?;
                match block_id {
                    MODULE_BLOCK if !module_seen => {
                        state.parse_module_block()?;
                        module_seen = true;
                    }
                    MODULE_BLOCK => {
                        return Err(state.cursor.malformed("multiple module blocks"));
                    }
                    _ => state.skip_block()?,
                }
            }
            other => {
                return Err(state
                    .cursor
                    .malformed(format!("unexpected top-level abbrev id {other}")));
            }
        }
    }

    if !module_seen {
        return Err(EngineError::malformed(
            state.cursor.byte_offset(),
            "stream contains no module block",
        ));
    }
    state.finish()
}

/// Strip the Darwin wrapper header, if present.
fn strip_wrapper(bytes: &[u8]) -> Result<&[u8], EngineError> {
    if bytes.len() >= 4 {
        let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if word == WRAPPER_MAGIC {
            if bytes.len() < 20 {
                return Err(EngineError::malformed(0, "truncated wrapper header"));
            }
            let offset =
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
            let size = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
            if offset.checked_add(size).map_or(true, |end| end > bytes.len()) {
                return Err(EngineError::malformed(
                    8,
                    "wrapper header range past end of file",
                ));
            }
            return Ok(&bytes[offset..offset + size]);
        }
    }
    Ok(bytes)
}

// =============================================================================
// Value List
// =============================================================================

/// One entry of the flat value list the container numbers its operands by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ModValue {
    /// Module global variable, by index.
    Global(u32),
    /// Module function, by index.
    Func(u32),
    /// Constant-pool entry.
    Const(ConstId),
    /// Function argument (function scope only).
    Arg(u32),
    /// Value-producing instruction result (function scope only).
    Inst(u32),
}

// =============================================================================
// Block Scope
// =============================================================================

/// Per-block decoding state: the abbrev id width and the abbreviations in
/// scope (BLOCKINFO-registered first, then block-local definitions).
pub(crate) struct BlockScope {
    pub abbrev_width: u32,
    pub abbrevs: Vec<Arc<Abbrev>>,
}

/// One step through a block's contents.
pub(crate) enum Entry {
    Record(Record),
    SubBlock(u64),
    EndBlock,
}

// =============================================================================
// Reader State
// =============================================================================

pub(crate) struct ReaderState<'a> {
    pub cursor: BitCursor<'a>,
    /// Abbreviations registered in the BLOCKINFO block, per target block id.
    blockinfo: FxHashMap<u64, Vec<Arc<Abbrev>>>,
    /// The module being built.
    pub module: Module,
    /// Flat value list; function bodies extend it and truncate on exit.
    pub values: Vec<ModValue>,
    /// Type of each value, parallel to `values`.
    pub value_types: Vec<TypeId>,
    /// Number of module-level values (prefix of `values` kept across
    /// function bodies).
    pub module_value_count: usize,
    /// True while a function body is being parsed.
    pub in_function: bool,
    /// Argument count of the function currently being parsed.
    pub cur_nargs: u32,
    /// Function-local constants parsed so far (for forward-ref numbering).
    pub cur_local_consts: u32,
    /// `(global index, initializer value id)` pairs resolved after the
    /// module block closes.
    pending_inits: Vec<(u32, u64)>,
    /// Module functions that are definitions, in body order.
    defined_funcs: VecDeque<u32>,
    /// Alias names applied after the symbol table has been read.
    pending_alias_names: Vec<(String, ModValue)>,
    version_seen: bool,
}

impl<'a> ReaderState<'a> {
    fn new(cursor: BitCursor<'a>) -> Self {
        ReaderState {
            cursor,
            blockinfo: FxHashMap::default(),
            module: Module::default(),
            values: Vec::new(),
            value_types: Vec::new(),
            module_value_count: 0,
            in_function: false,
            cur_nargs: 0,
            cur_local_consts: 0,
            pending_inits: Vec::new(),
            defined_funcs: VecDeque::new(),
            pending_alias_names: Vec::new(),
            version_seen: false,
        }
    }

    // =========================================================================
    // Block Framing
    // =========================================================================

    /// Read the header of a block whose ENTER_SUBBLOCK id has already been
    /// consumed, returning its scope.
    pub(crate) fn begin_block(&mut self, block_id: u64) -> Result<BlockScope, EngineError> {
        let width = self.cursor.read_vbr(4)? as u32;
        if width == 0 || width > 32 {
            return Err(self
                .cursor
                .malformed(format!("abbrev width {width} out of range")));
        }
        self.cursor.align32()?;
        // Word count; trusted only for skipping, not for parsing.
        let _len = self.cursor.read(32)?;
        Ok(BlockScope {
            abbrev_width: width,
            abbrevs: self.blockinfo.get(&block_id).cloned().unwrap_or_default(),
        })
    }

    /// Skip a block whose ENTER_SUBBLOCK id has already been consumed.
    pub(crate) fn skip_block(&mut self) -> Result<(), EngineError> {
        let _width = self.cursor.read_vbr(4)?;
        self.cursor.align32()?;
        let words = self.cursor.read(32)?;
        self.cursor.skip_bits((words as usize) * 32)
    }

    /// Next entry inside a block. DEFINE_ABBREV entries are folded into the
    /// scope transparently.
    pub(crate) fn next_entry(&mut self, scope: &mut BlockScope) -> Result<Entry, EngineError> {
        loop {
            let id = self.cursor.read(scope.abbrev_width)?;
            match id {
                END_BLOCK => {
                    self.cursor.align32()?;
                    return Ok(Entry::EndBlock);
                }
                ENTER_SUBBLOCK => {
                    let block_id = self.cursor.read_vbr(8)?;
                    return Ok(Entry::SubBlock(block_id));
                }
                DEFINE_ABBREV => {
                    let abbrev = read_abbrev_def(&mut self.cursor)?;
                    scope.abbrevs.push(abbrev);
                }
                UNABBREV_RECORD => {
                    return Ok(Entry::Record(read_unabbrev_record(&mut self.cursor)?));
                }
                abbrev_id => {
                    let idx = (abbrev_id - FIRST_APPLICATION_ABBREV) as usize;
                    let abbrev = scope.abbrevs.get(idx).cloned().ok_or_else(|| {
                        self.cursor
                            .malformed(format!("undefined abbreviation id {abbrev_id}"))
                    })?;
                    return Ok(Entry::Record(read_abbreviated_record(
                        &mut self.cursor,
                        &abbrev,
                    )?));
                }
            }
        }
    }

    // =========================================================================
    // Module Block
    // =========================================================================

    fn parse_module_block(&mut self) -> Result<(), EngineError> {
        let mut scope = self.begin_block(MODULE_BLOCK)?;
        loop {
            match self.next_entry(&mut scope)? {
                Entry::EndBlock => break,
                Entry::Record(record) => self.handle_module_record(record)?,
                Entry::SubBlock(BLOCKINFO_BLOCK) => self.parse_blockinfo()?,
                Entry::SubBlock(TYPE_BLOCK_NEW) => self.parse_type_block()?,
                Entry::SubBlock(CONSTANTS_BLOCK) => self.parse_constants_block()?,
                Entry::SubBlock(VALUE_SYMTAB_BLOCK) => self.parse_value_symtab()?,
                Entry::SubBlock(FUNCTION_BLOCK) => {
                    let func_idx = self.defined_funcs.pop_front().ok_or_else(|| {
                        self.cursor
                            .malformed("function body without matching prototype")
                    })?;
                    crate::function::parse_function_body(self, func_idx)?;
                }
                // Attribute, metadata and other auxiliary blocks are
                // tolerated and skipped; their absence never matters and
                // their structure is still length-validated.
                Entry::SubBlock(_) => self.skip_block()?,
            }
        }
        self.resolve_pending()
    }

    fn handle_module_record(&mut self, record: Record) -> Result<(), EngineError> {
        match record.code {
            MODULE_VERSION => {
                let version = record.field(0, &self.cursor)?;
                if version != SUPPORTED_VERSION {
                    return Err(self
                        .cursor
                        .malformed(format!("unsupported module version {version}")));
                }
                self.version_seen = true;
            }
            MODULE_TRIPLE => self.module.triple = record.string_from(0),
            MODULE_DATALAYOUT => self.module.layout_string = record.string_from(0),
            MODULE_GLOBALVAR => self.parse_global_record(&record)?,
            MODULE_FUNCTION => self.parse_function_record(&record)?,
            MODULE_ALIAS => self.parse_alias_record(&record)?,
            // Section names, gc names, deplibs, module asm: ignored.
            MODULE_ASM | MODULE_SECTIONNAME | MODULE_DEPLIB | MODULE_GCNAME => {}
            _ => {}
        }
        Ok(())
    }

    /// GLOBALVAR: [ty, isconst|flags, initid, linkage, align(log2+1), …].
    fn parse_global_record(&mut self, record: &Record) -> Result<(), EngineError> {
        let ty_id = self.type_by_id(record.field(0, &self.cursor)?)?;
        let raw_const = record.field(1, &self.cursor)?;
        let explicit_type = raw_const & 2 != 0;
        let is_const = raw_const & 1 != 0;
        let init_id = record.field(2, &self.cursor)?;
        let align_log2 = record.fields.get(4).copied().unwrap_or(0);

        let value_ty = if explicit_type {
            ty_id
        } else {
            self.module.types.pointee(ty_id).ok_or_else(|| {
                self.cursor
                    .malformed("global variable type is not a pointer")
            })?
        };

        let idx = self.module.globals.len() as u32;
        self.module.globals.push(GlobalVariable {
            name: "".into(),
            value_ty,
            init: None,
            is_const,
            align: decode_align(align_log2),
        });
        if init_id != 0 {
            self.pending_inits.push((idx, init_id - 1));
        }

        let addr_ty = self.module.types.pointer_to(value_ty);
        self.values.push(ModValue::Global(idx));
        self.value_types.push(addr_ty);
        self.module_value_count = self.values.len();
        Ok(())
    }

    /// FUNCTION: [ty, callingconv, isproto, linkage, …].
    fn parse_function_record(&mut self, record: &Record) -> Result<(), EngineError> {
        let mut ty_id = self.type_by_id(record.field(0, &self.cursor)?)?;
        // Old streams store the pointer-to-function type.
        if let Some(pointee) = self.module.types.pointee(ty_id) {
            ty_id = pointee;
        }
        if self.module.types.signature(ty_id).is_none() {
            return Err(self
                .cursor
                .malformed("function record type is not a function type"));
        }
        let is_proto = record.field(2, &self.cursor)? != 0;

        let idx = self.module.functions.len() as u32;
        self.module.functions.push(Function {
            name: "".into(),
            ty: ty_id,
            blocks: Vec::new(),
            is_declaration: is_proto,
        });
        if !is_proto {
            self.defined_funcs.push_back(idx);
        }

        let addr_ty = self.module.types.pointer_to(ty_id);
        self.values.push(ModValue::Func(idx));
        self.value_types.push(addr_ty);
        self.module_value_count = self.values.len();
        Ok(())
    }

    /// ALIAS: [ty, aliasee value id, linkage]. Only backward aliasees are
    /// representable; the alias becomes an extra name for its target.
    fn parse_alias_record(&mut self, record: &Record) -> Result<(), EngineError> {
        let ty_id = self.type_by_id(record.field(0, &self.cursor)?)?;
        let aliasee = record.field(1, &self.cursor)? as usize;
        let target = *self.values.get(aliasee).ok_or_else(|| {
            self.cursor
                .malformed("alias to a forward value is not supported")
        })?;
        self.values.push(target);
        self.value_types.push(ty_id);
        self.module_value_count = self.values.len();
        Ok(())
    }

    // =========================================================================
    // BLOCKINFO Block
    // =========================================================================

    fn parse_blockinfo(&mut self) -> Result<(), EngineError> {
        let scope = self.begin_block(BLOCKINFO_BLOCK)?;
        let mut target: Option<u64> = None;
        loop {
            let id = self.cursor.read(scope.abbrev_width)?;
            match id {
                END_BLOCK => {
                    self.cursor.align32()?;
                    return Ok(());
                }
                ENTER_SUBBLOCK => {
                    let _block_id = self.cursor.read_vbr(8)?;
                    self.skip_block()?;
                }
                DEFINE_ABBREV => {
                    let abbrev = read_abbrev_def(&mut self.cursor)?;
                    let bid = target
                        .ok_or_else(|| self.cursor.malformed("abbrev before SETBID"))?;
                    self.blockinfo.entry(bid).or_default().push(abbrev);
                }
                UNABBREV_RECORD => {
                    let record = read_unabbrev_record(&mut self.cursor)?;
                    if record.code == BLOCKINFO_SETBID {
                        target = Some(record.field(0, &self.cursor)?);
                    }
                }
                other => {
                    return Err(self
                        .cursor
                        .malformed(format!("unexpected abbrev id {other} in blockinfo")));
                }
            }
        }
    }

    // =========================================================================
    // Type Block
    // =========================================================================

    fn parse_type_block(&mut self) -> Result<(), EngineError> {
        let mut scope = self.begin_block(TYPE_BLOCK_NEW)?;
        let mut entries: Vec<Option<Type>> = Vec::new();
        let mut next = 0usize;
        let mut pending_name: Option<Arc<str>> = None;

        loop {
            let record = match self.next_entry(&mut scope)? {
                Entry::EndBlock => break,
                Entry::SubBlock(_) => {
                    self.skip_block()?;
                    continue;
                }
                Entry::Record(r) => r,
            };

            let ty = match record.code {
                TYPE_NUMENTRY => {
                    let count = record.field(0, &self.cursor)? as usize;
                    if count > (1 << 24) {
                        return Err(self.cursor.malformed("type table too large"));
                    }
                    entries.resize(count.max(entries.len()), None);
                    continue;
                }
                TYPE_STRUCT_NAME => {
                    pending_name = Some(record.string_from(0).into());
                    continue;
                }
                TYPE_VOID => Type::Void,
                TYPE_HALF => Type::Float(FloatKind::Half),
                TYPE_FLOAT => Type::Float(FloatKind::Float),
                TYPE_DOUBLE => Type::Float(FloatKind::Double),
                TYPE_X86_FP80 => Type::Float(FloatKind::X86Fp80),
                TYPE_FP128 => Type::Float(FloatKind::Fp128),
                TYPE_LABEL => Type::Label,
                TYPE_METADATA => Type::Metadata,
                TYPE_TOKEN => Type::Token,
                TYPE_INTEGER => {
                    let bits = record.field(0, &self.cursor)? as u32;
                    if bits == 0 || bits > 1 << 23 {
                        return Err(self.cursor.malformed("integer width out of range"));
                    }
                    Type::Int { bits }
                }
                TYPE_POINTER => Type::Pointer {
                    pointee: type_ref(&self.cursor, record.field(0, &self.cursor)?, &entries)?,
                },
                TYPE_ARRAY => Type::Array {
                    len: record.field(0, &self.cursor)?,
                    elem: type_ref(&self.cursor, record.field(1, &self.cursor)?, &entries)?,
                },
                TYPE_VECTOR => Type::Vector {
                    len: record.field(0, &self.cursor)? as u32,
                    elem: type_ref(&self.cursor, record.field(1, &self.cursor)?, &entries)?,
                },
                TYPE_OPAQUE => Type::Struct {
                    name: pending_name.take(),
                    fields: Vec::new(),
                    packed: false,
                    opaque: true,
                },
                TYPE_STRUCT_ANON | TYPE_STRUCT_NAMED => {
                    let packed = record.field(0, &self.cursor)? != 0;
                    let fields = record.fields[1..]
                        .iter()
                        .map(|&f| type_ref(&self.cursor, f, &entries))
                        .collect::<Result<Vec<_>, _>>()?;
                    Type::Struct {
                        name: if record.code == TYPE_STRUCT_NAMED {
                            pending_name.take()
                        } else {
                            None
                        },
                        fields,
                        packed,
                        opaque: false,
                    }
                }
                TYPE_FUNCTION | TYPE_FUNCTION_OLD => {
                    let vararg = record.field(0, &self.cursor)? != 0;
                    // The old encoding carries an ignored attribute field.
                    let from = if record.code == TYPE_FUNCTION_OLD { 2 } else { 1 };
                    let ret = type_ref(&self.cursor, record.field(from, &self.cursor)?, &entries)?;
                    let params = record.fields[from + 1..]
                        .iter()
                        .map(|&f| type_ref(&self.cursor, f, &entries))
                        .collect::<Result<Vec<_>, _>>()?;
                    Type::Function {
                        ret,
                        params,
                        vararg,
                    }
                }
                other => {
                    return Err(self
                        .cursor
                        .malformed(format!("unknown type record {other}")));
                }
            };

            if next >= entries.len() {
                return Err(self.cursor.malformed("more types than NUMENTRY declared"));
            }
            entries[next] = Some(ty);
            next += 1;
        }

        let types = entries
            .into_iter()
            .enumerate()
            .map(|(i, t)| {
                t.ok_or_else(|| {
                    self.cursor
                        .malformed(format!("type table entry {i} never defined"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = types.len(), "decoded type table");
        self.module.types = TypeTable::from_container(types);
        Ok(())
    }

    // =========================================================================
    // Constants Block
    // =========================================================================

    /// Parse a constants block at module or function scope; new constants
    /// append to the pool and to the value list.
    pub(crate) fn parse_constants_block(&mut self) -> Result<(), EngineError> {
        let in_function = self.in_function;
        let mut scope = self.begin_block(CONSTANTS_BLOCK)?;
        let mut cur_ty: Option<TypeId> = None;

        loop {
            let record = match self.next_entry(&mut scope)? {
                Entry::EndBlock => break,
                Entry::SubBlock(_) => {
                    self.skip_block()?;
                    continue;
                }
                Entry::Record(r) => r,
            };

            if record.code == CST_SETTYPE {
                cur_ty = Some(self.type_by_id(record.field(0, &self.cursor)?)?);
                continue;
            }
            let ty = cur_ty
                .ok_or_else(|| self.cursor.malformed("constant record before SETTYPE"))?;

            let constant = match record.code {
                CST_NULL => Constant::Null(ty),
                CST_UNDEF => Constant::Undef(ty),
                CST_INTEGER => Constant::Int {
                    ty,
                    value: crate::bitstream::decode_sign_rotated(record.field(0, &self.cursor)?)
                        as u64,
                },
                CST_WIDE_INTEGER => {
                    return Err(EngineError::UnsupportedInstruction(
                        "wide integer constant".into(),
                    ));
                }
                CST_FLOAT => Constant::Float {
                    ty,
                    bits: record.field(0, &self.cursor)?,
                },
                CST_AGGREGATE => {
                    let elems = record
                        .fields
                        .iter()
                        .map(|&vid| self.const_for(vid))
                        .collect::<Result<Vec<_>, _>>()?;
                    Constant::Aggregate { ty, elems }
                }
                CST_STRING | CST_CSTRING => {
                    let mut bytes: Vec<u8> = match &record.blob {
                        Some(blob) => blob.clone(),
                        None => record.fields.iter().map(|&c| c as u8).collect(),
                    };
                    if record.code == CST_CSTRING {
                        bytes.push(0);
                    }
                    Constant::Data { ty, bytes }
                }
                CST_DATA => {
                    let elem_bytes = self.data_element_width(ty)?;
                    let mut bytes = Vec::with_capacity(record.fields.len() * elem_bytes);
                    for &raw in &record.fields {
                        bytes.extend_from_slice(&raw.to_le_bytes()[..elem_bytes]);
                    }
                    Constant::Data { ty, bytes }
                }
                CST_CE_BINOP => {
                    let op = molten_ir::BinOp::from_code(record.field(0, &self.cursor)?)
                        .ok_or_else(|| self.cursor.malformed("bad constant binop code"))?;
                    Constant::Binary {
                        op,
                        ty,
                        lhs: self.const_for(record.field(1, &self.cursor)?)?,
                        rhs: self.const_for(record.field(2, &self.cursor)?)?,
                    }
                }
                CST_CE_CAST => {
                    let op = molten_ir::CastOp::from_code(record.field(0, &self.cursor)?)
                        .ok_or_else(|| self.cursor.malformed("bad constant cast code"))?;
                    let to = self.type_by_id(record.field(1, &self.cursor)?)?;
                    Constant::Cast {
                        op,
                        to,
                        value: self.const_for(record.field(2, &self.cursor)?)?,
                    }
                }
                CST_CE_GEP | CST_CE_INBOUNDS_GEP => {
                    self.parse_const_gep(&record, record.code == CST_CE_INBOUNDS_GEP)?
                }
                CST_INLINEASM | CST_INLINEASM_OLD => {
                    let flags = record.field(0, &self.cursor)?;
                    let asm_len = record.field(1, &self.cursor)? as usize;
                    let rest = &record.fields[2..];
                    if rest.len() < asm_len + 1 {
                        return Err(self.cursor.malformed("truncated inline asm record"));
                    }
                    let asm: String = rest[..asm_len].iter().map(|&c| c as u8 as char).collect();
                    let cons_len = rest[asm_len] as usize;
                    let cons: String = rest[asm_len + 1..]
                        .iter()
                        .take(cons_len)
                        .map(|&c| c as u8 as char)
                        .collect();
                    Constant::InlineAsm {
                        asm: asm.into(),
                        constraints: cons.into(),
                        side_effects: flags & 1 != 0,
                    }
                }
                CST_BLOCKADDRESS => {
                    return Err(EngineError::UnsupportedInstruction("blockaddress".into()));
                }
                other => {
                    return Err(self
                        .cursor
                        .malformed(format!("unknown constant record {other}")));
                }
            };

            let pool_id = self.push_constant(constant);
            self.values.push(ModValue::Const(pool_id));
            self.value_types.push(ty);
            if in_function {
                self.cur_local_consts += 1;
            } else {
                self.module_value_count = self.values.len();
            }
        }
        Ok(())
    }

    fn parse_const_gep(
        &mut self,
        record: &Record,
        inbounds: bool,
    ) -> Result<Constant, EngineError> {
        // Odd field count means an explicit source element type leads the
        // (type, value) pairs.
        let mut i = 0;
        let explicit_src = if record.fields.len() % 2 == 1 {
            i = 1;
            Some(self.type_by_id(record.field(0, &self.cursor)?)?)
        } else {
            None
        };
        let mut operands = Vec::new();
        while i + 1 < record.fields.len() {
            let _op_ty = record.fields[i];
            let vid = record.fields[i + 1];
            operands.push(self.const_for(vid)?);
            i += 2;
        }
        if operands.is_empty() {
            return Err(self.cursor.malformed("constant GEP with no operands"));
        }
        let base = operands.remove(0);
        let src_ty = match explicit_src {
            Some(ty) => ty,
            None => {
                let base_ty = self.const_type(base)?;
                self.module.types.pointee(base_ty).ok_or_else(|| {
                    self.cursor.malformed("constant GEP base is not a pointer")
                })?
            }
        };
        Ok(Constant::Gep {
            src_ty,
            base,
            indices: operands,
            inbounds,
        })
    }

    /// Byte width of one CST_DATA element for `ty` (an array or vector of
    /// integers or floats).
    fn data_element_width(&self, ty: TypeId) -> Result<usize, EngineError> {
        let elem = match self.module.types.get(ty) {
            Type::Array { elem, .. } => *elem,
            Type::Vector { elem, .. } => *elem,
            _ => return Err(self.cursor.malformed("CST_DATA on non-sequential type")),
        };
        match self.module.types.get(elem) {
            Type::Int { bits } => Ok((*bits as usize).div_ceil(8)),
            Type::Float(FloatKind::Float) => Ok(4),
            Type::Float(FloatKind::Double) => Ok(8),
            _ => Err(self.cursor.malformed("CST_DATA element type")),
        }
    }

    // =========================================================================
    // Value Symbol Table
    // =========================================================================

    fn parse_value_symtab(&mut self) -> Result<(), EngineError> {
        let mut scope = self.begin_block(VALUE_SYMTAB_BLOCK)?;
        loop {
            let record = match self.next_entry(&mut scope)? {
                Entry::EndBlock => break,
                Entry::SubBlock(_) => {
                    self.skip_block()?;
                    continue;
                }
                Entry::Record(r) => r,
            };
            match record.code {
                VST_ENTRY | VST_FNENTRY => {
                    let vid = record.field(0, &self.cursor)? as usize;
                    let name_from = if record.code == VST_FNENTRY { 2 } else { 1 };
                    let name = match &record.blob {
                        Some(blob) => String::from_utf8_lossy(blob).into_owned(),
                        None => record.string_from(name_from),
                    };
                    self.name_value(vid, name)?;
                }
                VST_BBENTRY => {}
                _ => {}
            }
        }
        Ok(())
    }

    fn name_value(&mut self, vid: usize, name: String) -> Result<(), EngineError> {
        let value = *self
            .values
            .get(vid)
            .ok_or_else(|| self.cursor.malformed(format!("symtab names value {vid}")))?;
        match value {
            ModValue::Global(g) => {
                let slot = &mut self.module.globals[g as usize];
                if slot.name.is_empty() {
                    slot.name = name.into();
                } else {
                    self.pending_alias_names.push((name, value));
                }
            }
            ModValue::Func(f) => {
                let slot = &mut self.module.functions[f as usize];
                if slot.name.is_empty() {
                    slot.name = name.into();
                } else {
                    self.pending_alias_names.push((name, value));
                }
            }
            // Constant and local names carry no semantics for execution.
            _ => {}
        }
        Ok(())
    }

    // =========================================================================
    // Shared Lookups
    // =========================================================================

    /// Resolve a type id from a record field.
    pub(crate) fn type_by_id(&self, raw: u64) -> Result<TypeId, EngineError> {
        if (raw as usize) < self.module.types.len() {
            Ok(TypeId::new(raw as u32))
        } else {
            Err(self
                .cursor
                .malformed(format!("type id {raw} out of range")))
        }
    }

    /// Append to the constant pool.
    pub(crate) fn push_constant(&mut self, constant: Constant) -> ConstId {
        let id = ConstId::new(self.module.constants.len() as u32);
        self.module.constants.push(constant);
        id
    }

    /// Resolve a value id to a constant-pool reference. Globals and
    /// functions intern address constants.
    pub(crate) fn const_for(&mut self, vid: u64) -> Result<ConstId, EngineError> {
        let value = *self
            .values
            .get(vid as usize)
            .ok_or_else(|| self.cursor.malformed(format!("forward constant reference {vid}")))?;
        match value {
            ModValue::Const(c) => Ok(c),
            ModValue::Global(g) => Ok(self.push_constant(Constant::GlobalAddr(g))),
            ModValue::Func(f) => Ok(self.push_constant(Constant::FuncAddr(f))),
            ModValue::Arg(_) | ModValue::Inst(_) => Err(self
                .cursor
                .malformed(format!("value {vid} is not a constant"))),
        }
    }

    /// Resolve a value id to an instruction operand.
    pub(crate) fn operand_for(&mut self, vid: u64) -> Result<Operand, EngineError> {
        match self.values.get(vid as usize) {
            Some(ModValue::Global(g)) => Ok(Operand::Global(*g)),
            Some(ModValue::Func(f)) => Ok(Operand::Func(*f)),
            Some(ModValue::Const(c)) => Ok(Operand::Const(*c)),
            Some(ModValue::Arg(i)) => Ok(Operand::Local(*i)),
            Some(ModValue::Inst(k)) => Ok(Operand::Local(self.cur_nargs + *k)),
            None => {
                // Forward reference inside a function body: every entry
                // between here and the target is an instruction result.
                let p = vid as usize;
                if p < self.module_value_count {
                    return Err(self
                        .cursor
                        .malformed(format!("module value {vid} out of range")));
                }
                let local = (p - self.module_value_count) as u32;
                let inst = local
                    .checked_sub(self.cur_nargs + self.cur_local_consts)
                    .ok_or_else(|| {
                        self.cursor
                            .malformed(format!("forward reference {vid} into constants"))
                    })?;
                Ok(Operand::Local(self.cur_nargs + inst))
            }
        }
    }

    /// Type of a known value id, if already recorded.
    pub(crate) fn type_of_value(&self, vid: u64) -> Option<TypeId> {
        self.value_types.get(vid as usize).copied()
    }

    /// Type of a constant-pool entry, following address references.
    pub(crate) fn const_type(&mut self, id: ConstId) -> Result<TypeId, EngineError> {
        match self.module.constants[id.as_usize()].clone() {
            Constant::GlobalAddr(g) => {
                let value_ty = self.module.globals[g as usize].value_ty;
                Ok(self.module.types.pointer_to(value_ty))
            }
            Constant::FuncAddr(f) => {
                let fn_ty = self.module.functions[f as usize].ty;
                Ok(self.module.types.pointer_to(fn_ty))
            }
            Constant::Gep {
                src_ty, indices, ..
            } => {
                let values: Vec<Option<u64>> = indices
                    .iter()
                    .map(|&c| self.const_int_value(c))
                    .collect();
                let elem = self.walk_gep_type(src_ty, &values)?;
                Ok(self.module.types.pointer_to(elem))
            }
            Constant::InlineAsm { .. } => {
                Err(self.cursor.malformed("constant type not directly recorded"))
            }
            other => other
                .recorded_type()
                .ok_or_else(|| self.cursor.malformed("constant without recorded type")),
        }
    }

    /// Integer value of a pool constant, if it is one.
    pub(crate) fn const_int_value(&self, id: ConstId) -> Option<u64> {
        match &self.module.constants[id.as_usize()] {
            Constant::Int { value, .. } => Some(*value),
            Constant::Null(_) | Constant::Undef(_) => Some(0),
            _ => None,
        }
    }

    /// The element type a GEP lands on: the first index steps over `src_ty`
    /// without changing it; each further index walks into the aggregate.
    /// Struct steps require a constant index value.
    pub(crate) fn walk_gep_type(
        &self,
        src_ty: TypeId,
        index_values: &[Option<u64>],
    ) -> Result<TypeId, EngineError> {
        let mut cur = src_ty;
        for value in index_values.iter().skip(1) {
            cur = match self.module.types.get(cur) {
                Type::Struct { fields, .. } => {
                    let i = value
                        .ok_or_else(|| self.cursor.malformed("struct GEP index not constant"))?
                        as usize;
                    *fields.get(i).ok_or_else(|| {
                        self.cursor.malformed("struct GEP index out of range")
                    })?
                }
                Type::Array { elem, .. } => *elem,
                Type::Vector { elem, .. } => *elem,
                _ => return Err(self.cursor.malformed("GEP steps into a non-aggregate")),
            };
        }
        Ok(cur)
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    fn resolve_pending(&mut self) -> Result<(), EngineError> {
        for (global_idx, init_vid) in std::mem::take(&mut self.pending_inits) {
            if init_vid as usize >= self.values.len() {
                let name = self.module.globals[global_idx as usize].name.clone();
                return Err(EngineError::link(if name.is_empty() {
                    format!("global #{global_idx} initializer")
                } else {
                    name.to_string()
                }));
            }
            let init = self.const_for(init_vid)?;
            self.module.globals[global_idx as usize].init = Some(init);
        }
        if !self.defined_funcs.is_empty() {
            let idx = self.defined_funcs[0];
            let name = self.module.functions[idx as usize].name.clone();
            return Err(EngineError::link(format!(
                "missing body for function `{}`",
                name
            )));
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Module, EngineError> {
        if !self.version_seen {
            return Err(EngineError::malformed(
                self.cursor.byte_offset(),
                "module has no version record",
            ));
        }
        self.module.index_names();
        for (name, value) in std::mem::take(&mut self.pending_alias_names) {
            match value {
                ModValue::Global(g) => {
                    self.module.global_names.insert(name.into(), g);
                }
                ModValue::Func(f) => {
                    self.module.function_names.insert(name.into(), f);
                }
                _ => {}
            }
        }
        debug!(
            functions = self.module.functions.len(),
            globals = self.module.globals.len(),
            "module decoded"
        );
        Ok(self.module)
    }
}

/// Decode the container's `log2 + 1` alignment encoding to bytes.
#[inline]
pub(crate) fn decode_align(raw: u64) -> u32 {
    if raw == 0 {
        0
    } else {
        1u32 << (raw - 1).min(29)
    }
}

/// Validate a type reference possibly pointing forward into the type table.
fn type_ref(
    cursor: &BitCursor<'_>,
    raw: u64,
    entries: &[Option<Type>],
) -> Result<TypeId, EngineError> {
    if (raw as usize) < entries.len() {
        Ok(TypeId::new(raw as u32))
    } else {
        Err(cursor.malformed(format!("type reference {raw} out of range")))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::testutil::BitWriter;

    /// Synthesize the smallest well-formed stream: magic plus a module
    /// block holding one VERSION record.
    fn minimal_module_bytes(version: u64) -> Vec<u8> {
        let mut w = BitWriter::new();
        for b in BITCODE_MAGIC {
            w.write(u64::from(b), 8);
        }
        // ENTER_SUBBLOCK(module), abbrev width 3.
        w.write(ENTER_SUBBLOCK, INITIAL_ABBREV_WIDTH);
        w.write_vbr(MODULE_BLOCK, 8);
        w.write_vbr(3, 4);
        w.align32();
        let len_pos = w.bit_len();
        w.write(0, 32); // patched below
        let body_start = w.bit_len();
        // UNABBREV_RECORD: VERSION [version].
        w.write(UNABBREV_RECORD, 3);
        w.write_vbr(MODULE_VERSION, 6);
        w.write_vbr(1, 6);
        w.write_vbr(version, 6);
        // END_BLOCK.
        w.write(END_BLOCK, 3);
        w.align32();
        let words = (w.bit_len() - body_start) / 32;
        w.patch_word(len_pos, words as u64);
        w.into_bytes()
    }

    #[test]
    fn test_minimal_module_parses() {
        let module = parse_module(&minimal_module_bytes(1)).unwrap();
        assert!(module.functions.is_empty());
        assert!(module.globals.is_empty());
        assert!(module.constants.is_empty());
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let err = parse_module(&minimal_module_bytes(0)).unwrap_err();
        match err {
            EngineError::MalformedBitcode { reason, .. } => {
                assert!(reason.contains("version"));
            }
            other => panic!("expected MalformedBitcode, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_module_block_names_offset() {
        let mut bytes = minimal_module_bytes(1);
        // Chop the stream mid-block.
        bytes.truncate(6);
        let err = parse_module(&bytes).unwrap_err();
        assert!(matches!(err, EngineError::MalformedBitcode { .. }));
    }

    #[test]
    fn test_rejects_bad_magic() {
        let err = parse_module(b"not bitcode").unwrap_err();
        match err {
            EngineError::MalformedBitcode { offset, .. } => assert_eq!(offset, 0),
            other => panic!("expected MalformedBitcode, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_corrupted_magic() {
        // Right length, wrong bytes.
        let err = parse_module(&[0x42, 0x43, 0xC0, 0xDD, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, EngineError::MalformedBitcode { offset: 0, .. }));
    }

    #[test]
    fn test_rejects_empty_buffer() {
        assert!(parse_module(&[]).is_err());
    }

    #[test]
    fn test_rejects_truncated_wrapper() {
        let mut bytes = WRAPPER_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 8]);
        assert!(parse_module(&bytes).is_err());
    }

    #[test]
    fn test_magic_only_stream_has_no_module() {
        let err = parse_module(&BITCODE_MAGIC).unwrap_err();
        match err {
            EngineError::MalformedBitcode { reason, .. } => {
                assert!(reason.contains("no module block"));
            }
            other => panic!("expected MalformedBitcode, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_align() {
        assert_eq!(decode_align(0), 0);
        assert_eq!(decode_align(1), 1);
        assert_eq!(decode_align(4), 8);
    }
}
