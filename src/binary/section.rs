use super::{
    instruction::Instruction,
    types::{GlobalType, MemoryType, TableType, ValueType},
};
use num_derive::FromPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, FromPrimitive)]
pub enum SectionCode {
    Custom = 0x00,
    Type = 0x01,
    Import = 0x02,
    Function = 0x03,
    Table = 0x04,
    Memory = 0x05,
    Global = 0x06,
    Export = 0x07,
    Start = 0x08,
    Element = 0x09,
    Code = 0x0a,
    Data = 0x0b,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportDesc {
    /// Index into the type section.
    Func(u32),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub desc: ImportDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportDesc {
    Func(u32),
    Table(u32),
    Memory(u32),
    Global(u32),
}

impl ExportDesc {
    pub fn index(&self) -> u32 {
        match *self {
            Self::Func(idx) | Self::Table(idx) | Self::Memory(idx) | Self::Global(idx) => idx,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub desc: ExportDesc,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Function {
    pub type_idx: u32,
    pub locals: Vec<ValueType>,
    pub code: Vec<Instruction>,
    /// Bytes of the instruction sequence, excluding the locals vector.
    pub size: usize,
    /// Absolute offset of the first instruction.
    pub address: usize,
    pub name: String,
}

impl Function {
    pub fn new(type_idx: u32) -> Self {
        Self {
            type_idx,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub global_type: GlobalType,
    pub init: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Elem {
    pub table_idx: u32,
    pub offset: Vec<Instruction>,
    pub func_indices: Vec<u32>,
}
