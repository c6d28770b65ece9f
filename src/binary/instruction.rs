use super::{
    error::{DecodeError, Result},
    opcode::{Opcode, OperandKind},
    reader::ByteReader,
    types::ValueType,
};
use num_traits::FromPrimitive as _;
use std::fmt;

/// Block type byte meaning "no result".
const EMPTY_BLOCK_TYPE: u32 = 0x40;

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    BlockType(Option<ValueType>),
    MemArg { align: u32, offset: u32 },
    Index(u32),
    IndexVector(Vec<u32>),
    /// Reserved byte that must be zero in this version of the format.
    Zero,
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Operand {
    /// Width in bytes of a numeric constant, `None` for every other operand.
    pub fn width(&self) -> Option<usize> {
        match self {
            Self::I32(_) | Self::F32(_) => Some(4),
            Self::I64(_) | Self::F64(_) => Some(8),
            _ => None,
        }
    }

    pub fn kind(&self) -> OperandKind {
        match self {
            Self::BlockType(_) => OperandKind::BlockType,
            Self::MemArg { .. } => OperandKind::MemArg,
            Self::Index(_) => OperandKind::Index,
            Self::IndexVector(_) => OperandKind::IndexVector,
            Self::Zero => OperandKind::Zero,
            Self::I32(_) => OperandKind::I32,
            Self::I64(_) => OperandKind::I64,
            Self::F32(_) => OperandKind::F32,
            Self::F64(_) => OperandKind::F64,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlockType(Some(ty)) => write!(f, "(result {ty})"),
            Self::BlockType(None) => Ok(()),
            Self::MemArg { align, offset } => {
                let mut parts = vec![];
                if *offset != 0 {
                    parts.push(format!("offset={offset}"));
                }
                if *align != 0 {
                    parts.push(format!("align={align}"));
                }
                f.write_str(&parts.join(" "))
            }
            Self::Index(idx) => write!(f, "{idx}"),
            Self::IndexVector(indices) => {
                let indices: Vec<String> = indices.iter().map(u32::to_string).collect();
                write!(f, "[{}]", indices.join(", "))
            }
            Self::Zero => f.write_str("0x0"),
            Self::I32(value) => write!(f, "{value}"),
            Self::I64(value) => write!(f, "{value}"),
            // `{:?}` keeps the fractional part: `0.0`, not `0`
            Self::F32(value) => write!(f, "{value:?}"),
            Self::F64(value) => write!(f, "{value:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    /// Encoded size: the opcode byte plus all operand bytes.
    pub size: usize,
}

impl Instruction {
    pub fn mnemonic(&self) -> &'static str {
        self.opcode.mnemonic()
    }

    pub fn starts_block(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::Block | Opcode::Loop | Opcode::If | Opcode::Else
        )
    }

    pub fn ends_block(&self) -> bool {
        matches!(self.opcode, Opcode::Else | Opcode::End)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())?;
        for (i, operand) in self.operands.iter().enumerate() {
            if i > 1 {
                f.write_str(",")?;
            }
            let text = operand.to_string();
            if !text.is_empty() {
                write!(f, " {text}")?;
            }
        }
        Ok(())
    }
}

fn decode_operand(reader: &mut ByteReader<'_>, kind: OperandKind) -> Result<Operand> {
    let operand = match kind {
        OperandKind::BlockType => {
            let offset = reader.tell();
            let byte = reader.uleb()?;
            if byte == EMPTY_BLOCK_TYPE {
                Operand::BlockType(None)
            } else {
                let ty = ValueType::from_u32(byte)
                    .ok_or(DecodeError::InvalidValueType { offset, byte })?;
                Operand::BlockType(Some(ty))
            }
        }
        OperandKind::MemArg => {
            let align = reader.uleb()?;
            let offset = reader.uleb()?;
            Operand::MemArg { align, offset }
        }
        OperandKind::Index => Operand::Index(reader.uleb()?),
        OperandKind::IndexVector => {
            let count = reader.uleb()?;
            let mut indices = vec![];
            for _ in 0..count {
                indices.push(reader.uleb()?);
            }
            Operand::IndexVector(indices)
        }
        OperandKind::Zero => {
            let offset = reader.tell();
            match reader.u8()? {
                0x00 => Operand::Zero,
                byte => return Err(DecodeError::InvalidReservedByte { offset, byte }),
            }
        }
        OperandKind::I32 => Operand::I32(reader.sleb32()?),
        OperandKind::I64 => Operand::I64(reader.sleb64()?),
        OperandKind::F32 => Operand::F32(reader.f32()?),
        OperandKind::F64 => Operand::F64(reader.f64()?),
    };
    Ok(operand)
}

/// Decodes one instruction at the reader's position.
pub fn decode_instruction(reader: &mut ByteReader<'_>) -> Result<Instruction> {
    let start = reader.tell();
    let opcode = Opcode::from_byte(reader.u8()?, start)?;

    let mut operands = Vec::with_capacity(opcode.operand_kinds().len());
    for kind in opcode.operand_kinds() {
        operands.push(decode_operand(reader, *kind)?);
    }

    Ok(Instruction {
        opcode,
        operands,
        size: reader.tell() - start,
    })
}

/// Disassembles the whole of `bytes`. `base` is the absolute offset of the
/// first byte and only affects reported error offsets.
pub fn disassemble(bytes: &[u8], base: usize) -> Result<Vec<Instruction>> {
    let mut reader = ByteReader::with_base(bytes, base);
    disassemble_all(&mut reader)
}

/// Disassembles everything left in `reader`.
pub fn disassemble_all(reader: &mut ByteReader<'_>) -> Result<Vec<Instruction>> {
    let mut instructions = vec![];
    while !reader.eos() {
        instructions.push(decode_instruction(reader)?);
    }
    Ok(instructions)
}
