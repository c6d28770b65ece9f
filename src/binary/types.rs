use num_derive::FromPrimitive;
use std::fmt;

/// Size of a linear memory page in bytes.
pub const PAGE_SIZE: u32 = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum ValueType {
    I32 = 0x7F,
    I64 = 0x7E,
    F32 = 0x7D,
    F64 = 0x7C,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum ElemType {
    FuncRef = 0x70,
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FuncRef => f.write_str("funcref"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum Mutability {
    Const = 0x00,
    Var = 0x01,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FuncType {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub elem_type: ElemType,
    pub limits: Limits,
}

/// Limits are counted in [`PAGE_SIZE`] pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    pub limits: Limits,
}

impl MemoryType {
    pub fn min_bytes(&self) -> u64 {
        u64::from(self.limits.min) * u64::from(PAGE_SIZE)
    }

    pub fn max_bytes(&self) -> Option<u64> {
        self.limits
            .max
            .map(|max| u64::from(max) * u64::from(PAGE_SIZE))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub value_type: ValueType,
    pub mutability: Mutability,
}
