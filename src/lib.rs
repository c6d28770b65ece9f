pub mod binary;
pub mod text;

pub use binary::{
    decoder::DecodeOptions,
    error::DecodeError,
    instruction::{Instruction, Operand, disassemble},
    module::Module,
};
