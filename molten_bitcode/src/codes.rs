//! Block ids and record codes of the bitcode container.
//!
//! Only the codes the reader actually interprets are listed; unknown blocks
//! are skipped structurally and unknown records inside known blocks are
//! either ignored or rejected, per block.

// =============================================================================
// Builtin Abbreviation IDs
// =============================================================================

pub const END_BLOCK: u64 = 0;
pub const ENTER_SUBBLOCK: u64 = 1;
pub const DEFINE_ABBREV: u64 = 2;
pub const UNABBREV_RECORD: u64 = 3;

/// First application-defined abbreviation id.
pub const FIRST_APPLICATION_ABBREV: u64 = 4;

/// Abbreviation id width at the top level of the stream.
pub const INITIAL_ABBREV_WIDTH: u32 = 2;

// =============================================================================
// Block IDs
// =============================================================================

pub const BLOCKINFO_BLOCK: u64 = 0;
pub const MODULE_BLOCK: u64 = 8;
pub const PARAMATTR_BLOCK: u64 = 9;
pub const PARAMATTR_GROUP_BLOCK: u64 = 10;
pub const CONSTANTS_BLOCK: u64 = 11;
pub const FUNCTION_BLOCK: u64 = 12;
pub const IDENTIFICATION_BLOCK: u64 = 13;
pub const VALUE_SYMTAB_BLOCK: u64 = 14;
pub const METADATA_BLOCK: u64 = 15;
pub const METADATA_ATTACHMENT_BLOCK: u64 = 16;
pub const TYPE_BLOCK_NEW: u64 = 17;
pub const USELIST_BLOCK: u64 = 18;
pub const OPERAND_BUNDLE_TAGS_BLOCK: u64 = 21;
pub const METADATA_KIND_BLOCK: u64 = 22;

// =============================================================================
// BLOCKINFO Records
// =============================================================================

pub const BLOCKINFO_SETBID: u64 = 1;

// =============================================================================
// MODULE Records
// =============================================================================

pub const MODULE_VERSION: u64 = 1;
pub const MODULE_TRIPLE: u64 = 2;
pub const MODULE_DATALAYOUT: u64 = 3;
pub const MODULE_ASM: u64 = 4;
pub const MODULE_SECTIONNAME: u64 = 5;
pub const MODULE_DEPLIB: u64 = 6;
pub const MODULE_GLOBALVAR: u64 = 7;
pub const MODULE_FUNCTION: u64 = 8;
pub const MODULE_ALIAS: u64 = 9;
pub const MODULE_GCNAME: u64 = 11;

// =============================================================================
// TYPE Records
// =============================================================================

pub const TYPE_NUMENTRY: u64 = 1;
pub const TYPE_VOID: u64 = 2;
pub const TYPE_FLOAT: u64 = 3;
pub const TYPE_DOUBLE: u64 = 4;
pub const TYPE_LABEL: u64 = 5;
pub const TYPE_OPAQUE: u64 = 6;
pub const TYPE_INTEGER: u64 = 7;
pub const TYPE_POINTER: u64 = 8;
pub const TYPE_FUNCTION_OLD: u64 = 9;
pub const TYPE_HALF: u64 = 10;
pub const TYPE_ARRAY: u64 = 11;
pub const TYPE_VECTOR: u64 = 12;
pub const TYPE_X86_FP80: u64 = 13;
pub const TYPE_FP128: u64 = 14;
pub const TYPE_METADATA: u64 = 16;
pub const TYPE_STRUCT_ANON: u64 = 18;
pub const TYPE_STRUCT_NAME: u64 = 19;
pub const TYPE_STRUCT_NAMED: u64 = 20;
pub const TYPE_FUNCTION: u64 = 21;
pub const TYPE_TOKEN: u64 = 22;

// =============================================================================
// CONSTANTS Records
// =============================================================================

pub const CST_SETTYPE: u64 = 1;
pub const CST_NULL: u64 = 2;
pub const CST_UNDEF: u64 = 3;
pub const CST_INTEGER: u64 = 4;
pub const CST_WIDE_INTEGER: u64 = 5;
pub const CST_FLOAT: u64 = 6;
pub const CST_AGGREGATE: u64 = 7;
pub const CST_STRING: u64 = 8;
pub const CST_CSTRING: u64 = 9;
pub const CST_CE_BINOP: u64 = 10;
pub const CST_CE_CAST: u64 = 11;
pub const CST_CE_GEP: u64 = 12;
pub const CST_CE_SELECT: u64 = 13;
pub const CST_CE_CMP: u64 = 17;
pub const CST_INLINEASM_OLD: u64 = 18;
pub const CST_CE_INBOUNDS_GEP: u64 = 20;
pub const CST_BLOCKADDRESS: u64 = 21;
pub const CST_DATA: u64 = 22;
pub const CST_INLINEASM: u64 = 23;

// =============================================================================
// VALUE_SYMTAB Records
// =============================================================================

pub const VST_ENTRY: u64 = 1;
pub const VST_BBENTRY: u64 = 2;
pub const VST_FNENTRY: u64 = 3;

// =============================================================================
// FUNCTION Records
// =============================================================================

pub const FUNC_DECLAREBLOCKS: u64 = 1;
pub const FUNC_INST_BINOP: u64 = 2;
pub const FUNC_INST_CAST: u64 = 3;
pub const FUNC_INST_GEP_OLD: u64 = 4;
pub const FUNC_INST_SELECT: u64 = 5;
pub const FUNC_INST_EXTRACTELT: u64 = 6;
pub const FUNC_INST_INSERTELT: u64 = 7;
pub const FUNC_INST_SHUFFLEVEC: u64 = 8;
pub const FUNC_INST_CMP: u64 = 9;
pub const FUNC_INST_RET: u64 = 10;
pub const FUNC_INST_BR: u64 = 11;
pub const FUNC_INST_SWITCH: u64 = 12;
pub const FUNC_INST_INVOKE: u64 = 13;
pub const FUNC_INST_UNREACHABLE: u64 = 15;
pub const FUNC_INST_PHI: u64 = 16;
pub const FUNC_INST_ALLOCA: u64 = 19;
pub const FUNC_INST_LOAD: u64 = 20;
pub const FUNC_INST_VAARG: u64 = 23;
pub const FUNC_INST_STORE_OLD: u64 = 24;
pub const FUNC_INST_EXTRACTVAL: u64 = 26;
pub const FUNC_INST_INSERTVAL: u64 = 27;
pub const FUNC_INST_CMP2: u64 = 28;
pub const FUNC_INST_VSELECT: u64 = 29;
pub const FUNC_INST_INBOUNDS_GEP_OLD: u64 = 30;
pub const FUNC_INST_INDIRECTBR: u64 = 31;
pub const FUNC_DEBUG_LOC_AGAIN: u64 = 33;
pub const FUNC_INST_CALL: u64 = 34;
pub const FUNC_DEBUG_LOC: u64 = 35;
pub const FUNC_INST_FENCE: u64 = 36;
pub const FUNC_INST_CMPXCHG_OLD: u64 = 37;
pub const FUNC_INST_ATOMICRMW: u64 = 38;
pub const FUNC_INST_RESUME: u64 = 39;
pub const FUNC_INST_LANDINGPAD_OLD: u64 = 40;
pub const FUNC_INST_LOADATOMIC: u64 = 41;
pub const FUNC_INST_STOREATOMIC_OLD: u64 = 42;
pub const FUNC_INST_GEP: u64 = 43;
pub const FUNC_INST_STORE: u64 = 44;
pub const FUNC_INST_STOREATOMIC: u64 = 45;
pub const FUNC_INST_CMPXCHG: u64 = 46;
pub const FUNC_INST_LANDINGPAD: u64 = 47;

/// Explicit-type marker bit in a call record's calling-convention field.
pub const CALL_EXPLICIT_TYPE: u64 = 1 << 15;

/// Explicit-type marker bit in an invoke record's calling-convention field.
pub const INVOKE_EXPLICIT_TYPE: u64 = 1 << 13;
