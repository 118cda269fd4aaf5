//! Numeric constants shared with the engine binary.

use std::ops::BitOr;

use serde::Deserialize;

/// Flags passed to `HAKO_Eval` and `HAKO_CompileToByteCode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvalFlags(pub u32);

impl EvalFlags {
    pub const GLOBAL: Self = Self(0);
    pub const MODULE: Self = Self(1);
    pub const STRICT: Self = Self(1 << 3);
    pub const COMPILE_ONLY: Self = Self(1 << 5);
    pub const DEBUGGER_NO_PERSIST_SCRIPT: Self = Self(1 << 6);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EvalFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Built-in feature groups enabled when a context is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intrinsics(pub u32);

impl Intrinsics {
    pub const BASE_OBJECTS: Self = Self(1 << 0);
    pub const DATE: Self = Self(1 << 1);
    pub const EVAL: Self = Self(1 << 2);
    pub const STRING_NORMALIZE: Self = Self(1 << 3);
    pub const REGEXP: Self = Self(1 << 4);
    pub const REGEXP_COMPILER: Self = Self(1 << 5);
    pub const JSON: Self = Self(1 << 6);
    pub const PROXY: Self = Self(1 << 7);
    pub const MAP_SET: Self = Self(1 << 8);
    pub const TYPED_ARRAYS: Self = Self(1 << 9);
    pub const PROMISE: Self = Self(1 << 10);
    pub const BIGINT: Self = Self(1 << 11);
    pub const BIGFLOAT: Self = Self(1 << 12);
    pub const BIGDECIMAL: Self = Self(1 << 13);
    pub const OPERATOR_OVERLOADING: Self = Self(1 << 14);
    pub const BIGNUM_EXT: Self = Self(1 << 15);
    pub const PERFORMANCE: Self = Self(1 << 16);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Looks up a feature group by its config name (`"MapSet"`, `"map_set"`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        let flag = match normalized.as_str() {
            "baseobjects" => Self::BASE_OBJECTS,
            "date" => Self::DATE,
            "eval" => Self::EVAL,
            "stringnormalize" => Self::STRING_NORMALIZE,
            "regexp" => Self::REGEXP,
            "regexpcompiler" => Self::REGEXP_COMPILER,
            "json" => Self::JSON,
            "proxy" => Self::PROXY,
            "mapset" => Self::MAP_SET,
            "typedarrays" => Self::TYPED_ARRAYS,
            "promise" => Self::PROMISE,
            "bigint" => Self::BIGINT,
            "bigfloat" => Self::BIGFLOAT,
            "bigdecimal" => Self::BIGDECIMAL,
            "operatoroverloading" => Self::OPERATOR_OVERLOADING,
            "bignumext" => Self::BIGNUM_EXT,
            "performance" => Self::PERFORMANCE,
            _ => return None,
        };
        Some(flag)
    }
}

impl Default for Intrinsics {
    fn default() -> Self {
        Self::BASE_OBJECTS
            | Self::DATE
            | Self::EVAL
            | Self::STRING_NORMALIZE
            | Self::REGEXP
            | Self::JSON
            | Self::PROXY
            | Self::MAP_SET
            | Self::TYPED_ARRAYS
            | Self::PROMISE
    }
}

impl BitOr for Intrinsics {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Filters for `HAKO_GetOwnPropertyNames`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyEnumFlags(pub i32);

impl PropertyEnumFlags {
    pub const STRING: Self = Self(1 << 0);
    pub const SYMBOL: Self = Self(1 << 1);
    pub const PRIVATE: Self = Self(1 << 2);
    pub const ENUMERABLE: Self = Self(1 << 4);
}

impl Default for PropertyEnumFlags {
    fn default() -> Self {
        Self::STRING | Self::ENUMERABLE
    }
}

impl BitOr for PropertyEnumFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum EqualOp {
    StrictEquals = 0,
    SameValue = 1,
    SameValueZero = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

impl PromiseState {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::Fulfilled,
            2 => Self::Rejected,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypedArrayType {
    Uint8,
    Uint8Clamped,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    BigInt64,
    BigUint64,
    Float16,
    Float32,
    Float64,
}

impl TypedArrayType {
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            1 => Self::Uint8,
            2 => Self::Uint8Clamped,
            3 => Self::Int8,
            4 => Self::Uint16,
            5 => Self::Int16,
            6 => Self::Uint32,
            7 => Self::Int32,
            8 => Self::BigInt64,
            9 => Self::BigUint64,
            10 => Self::Float16,
            11 => Self::Float32,
            12 => Self::Float64,
            _ => return None,
        })
    }

    pub fn element_size(self) -> usize {
        match self {
            Self::Uint8 | Self::Uint8Clamped | Self::Int8 => 1,
            Self::Uint16 | Self::Int16 | Self::Float16 => 2,
            Self::Uint32 | Self::Int32 | Self::Float32 => 4,
            Self::BigInt64 | Self::BigUint64 | Self::Float64 => 8,
        }
    }
}

/// What `HAKO_SetStripInfo` removes from compiled functions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct StripOptions {
    #[serde(default)]
    pub strip_source: bool,
    #[serde(default)]
    pub strip_debug: bool,
}

impl StripOptions {
    const SOURCE: i32 = 1;
    const DEBUG: i32 = 2;

    /// Stripping debug info always strips source too.
    pub fn to_flags(self) -> i32 {
        let mut flags = 0;
        if self.strip_source || self.strip_debug {
            flags |= Self::SOURCE;
        }
        if self.strip_debug {
            flags |= Self::DEBUG;
        }
        flags
    }

    pub fn from_flags(flags: i32) -> Self {
        Self {
            strip_source: flags & Self::SOURCE != 0,
            strip_debug: flags & Self::DEBUG != 0,
        }
    }
}

/// Tag of the 8-byte module source struct returned to the engine's loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ModuleSourceTag {
    String = 0,
    Precompiled = 1,
    Error = 2,
}

pub const MODULE_SOURCE_STRUCT_SIZE: u32 = 8;

/// Build flag bit set when the engine was compiled with bignum support.
pub const BUILD_FLAG_BIGNUM: u32 = 1 << 2;

/// Size of `HakoBuildInfo` on wasm32: eight 4-byte fields.
pub const BUILD_INFO_STRUCT_SIZE: usize = 32;
