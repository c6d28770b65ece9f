use super::{
    error::{DecodeError, Result},
    instruction::{Instruction, decode_instruction, disassemble_all},
    module::Module,
    opcode::Opcode,
    reader::ByteReader,
    section::{Elem, Export, ExportDesc, Function, Global, Import, ImportDesc, SectionCode},
    types::{
        ElemType, FuncType, GlobalType, Limits, MemoryType, Mutability, TableType, ValueType,
    },
};
use num_traits::FromPrimitive as _;
use std::collections::BTreeSet;
use tracing::{debug, trace, warn};

const MAGIC: &[u8] = b"\0asm";
const FUNC_TYPE_PREFIX: &[u8] = &[0x60];
const NAME_SECTION: &str = "name";
const FUNCTION_NAMES_SUBSECTION: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Reject non-custom sections that do not appear in strictly increasing
    /// id order.
    pub strict_section_order: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            strict_section_order: true,
        }
    }
}

/// Decodes a complete binary module.
pub fn decode_module(input: &[u8], options: &DecodeOptions) -> Result<Module> {
    let mut reader = ByteReader::new(input);
    reader.ensure(MAGIC)?;
    let version = reader.u32()?;

    let mut module = Module::with_version(version);
    let mut previous: Option<SectionCode> = None;
    let mut seen = BTreeSet::new();

    while !reader.eos() {
        let offset = reader.tell();
        let (code, size) = decode_section_header(&mut reader)?;
        debug!(section = ?code, size, offset, "decoding section");

        if code != SectionCode::Custom {
            if let Some(prev) = previous {
                if options.strict_section_order && code <= prev {
                    return Err(DecodeError::SectionOutOfOrder {
                        offset,
                        id: code as u8,
                        previous: prev as u8,
                    });
                }
            }
            // lenient order still allows each known section only once
            if !seen.insert(code) {
                return Err(DecodeError::DuplicateSection {
                    offset,
                    id: code as u8,
                });
            }
            previous = Some(code);
        }

        let mut section = reader.sub_reader(size)?;
        decode_section(code, &mut section, &mut module)?;

        if !section.eos() {
            return Err(DecodeError::SectionSizeMismatch {
                offset,
                id: code as u8,
                declared: size,
                consumed: size - section.remaining(),
            });
        }
    }

    Ok(module)
}

fn decode_section_header(reader: &mut ByteReader<'_>) -> Result<(SectionCode, usize)> {
    let offset = reader.tell();
    let id = reader.u8()?;
    let code = SectionCode::from_u8(id).ok_or(DecodeError::UnknownSectionId { offset, id })?;
    let size = reader.uleb()? as usize;
    Ok((code, size))
}

fn decode_section(
    code: SectionCode,
    section: &mut ByteReader<'_>,
    module: &mut Module,
) -> Result<()> {
    match code {
        SectionCode::Custom => decode_custom_section(section, module),
        SectionCode::Type => decode_type_section(section, module),
        SectionCode::Import => decode_import_section(section, module),
        SectionCode::Function => decode_function_section(section, module),
        SectionCode::Table => decode_table_section(section, module),
        SectionCode::Memory => decode_memory_section(section, module),
        SectionCode::Global => decode_global_section(section, module),
        SectionCode::Export => decode_export_section(section, module),
        SectionCode::Start => decode_start_section(section, module),
        SectionCode::Element => decode_element_section(section, module),
        SectionCode::Code => decode_code_section(section, module),
        SectionCode::Data => {
            // data segments are not modelled
            section.read_rest();
            Ok(())
        }
    }
}

fn decode_custom_section(section: &mut ByteReader<'_>, module: &mut Module) -> Result<()> {
    let name = section.name()?;
    if name != NAME_SECTION {
        trace!(name = %name, "skipping custom section");
        section.read_rest();
        return Ok(());
    }

    while !section.eos() {
        let id = section.u8()?;
        let size = section.uleb()? as usize;
        let mut subsection = section.sub_reader(size)?;
        if id == FUNCTION_NAMES_SUBSECTION {
            decode_function_names(&mut subsection, module)?;
        }
    }
    Ok(())
}

/// Applies a function name map. Map indices count imported functions first,
/// so they are shifted down onto the functions defined by this module.
fn decode_function_names(reader: &mut ByteReader<'_>, module: &mut Module) -> Result<()> {
    let imported = module.imported_function_count();
    let count = reader.uleb()?;
    for _ in 0..count {
        let func_idx = reader.uleb()? as usize;
        let name = reader.name()?;

        let Some(local_idx) = func_idx.checked_sub(imported) else {
            trace!(func_idx, name = %name, "name refers to an imported function");
            continue;
        };
        match module.functions_mut().get_mut(local_idx) {
            Some(func) => func.name = name,
            None => warn!(func_idx, name = %name, "name refers to an unknown function"),
        }
    }
    Ok(())
}

fn decode_type_section(section: &mut ByteReader<'_>, module: &mut Module) -> Result<()> {
    let count = section.uleb()?;
    for _ in 0..count {
        section.ensure(FUNC_TYPE_PREFIX)?;
        let params = decode_value_types(section)?;
        let results = decode_value_types(section)?;
        module.add_type(FuncType { params, results });
    }
    Ok(())
}

fn decode_import_section(section: &mut ByteReader<'_>, module: &mut Module) -> Result<()> {
    let count = section.uleb()?;
    for _ in 0..count {
        let module_name = section.name()?;
        let field = section.name()?;

        let offset = section.tell();
        let desc = match section.u8()? {
            0x00 => ImportDesc::Func(section.uleb()?),
            0x01 => ImportDesc::Table(decode_table_type(section)?),
            0x02 => ImportDesc::Memory(decode_memory_type(section)?),
            0x03 => ImportDesc::Global(decode_global_type(section)?),
            kind => return Err(DecodeError::UnknownImportKind { offset, kind }),
        };

        module.add_import(Import {
            module: module_name,
            field,
            desc,
        });
    }
    Ok(())
}

fn decode_function_section(section: &mut ByteReader<'_>, module: &mut Module) -> Result<()> {
    let count = section.uleb()?;
    for _ in 0..count {
        let type_idx = section.uleb()?;
        module.add_function(Function::new(type_idx));
    }
    Ok(())
}

fn decode_table_section(section: &mut ByteReader<'_>, module: &mut Module) -> Result<()> {
    let count = section.uleb()?;
    for _ in 0..count {
        let table = decode_table_type(section)?;
        module.add_table(table);
    }
    Ok(())
}

fn decode_memory_section(section: &mut ByteReader<'_>, module: &mut Module) -> Result<()> {
    let count = section.uleb()?;
    for _ in 0..count {
        let memory = decode_memory_type(section)?;
        module.add_memory(memory);
    }
    Ok(())
}

fn decode_global_section(section: &mut ByteReader<'_>, module: &mut Module) -> Result<()> {
    let count = section.uleb()?;
    for _ in 0..count {
        let global_type = decode_global_type(section)?;
        let init = decode_const_expr(section)?;
        module.add_global(Global { global_type, init });
    }
    Ok(())
}

fn decode_export_section(section: &mut ByteReader<'_>, module: &mut Module) -> Result<()> {
    let count = section.uleb()?;
    for _ in 0..count {
        let name = section.name()?;
        let offset = section.tell();
        let kind = section.u8()?;
        let idx = section.uleb()?;
        let desc = match kind {
            0x00 => ExportDesc::Func(idx),
            0x01 => ExportDesc::Table(idx),
            0x02 => ExportDesc::Memory(idx),
            0x03 => ExportDesc::Global(idx),
            _ => return Err(DecodeError::UnknownExportKind { offset, kind }),
        };
        module.add_export(Export { name, desc });
    }
    Ok(())
}

fn decode_start_section(section: &mut ByteReader<'_>, module: &mut Module) -> Result<()> {
    let func_idx = section.uleb()?;
    module.set_start(func_idx);
    Ok(())
}

fn decode_element_section(section: &mut ByteReader<'_>, module: &mut Module) -> Result<()> {
    let count = section.uleb()?;
    for _ in 0..count {
        let table_idx = section.uleb()?;
        let offset = decode_const_expr(section)?;
        let len = section.uleb()?;
        let mut func_indices = Vec::with_capacity(len.min(1024) as usize);
        for _ in 0..len {
            func_indices.push(section.uleb()?);
        }
        module.add_elem(Elem {
            table_idx,
            offset,
            func_indices,
        });
    }
    Ok(())
}

fn decode_code_section(section: &mut ByteReader<'_>, module: &mut Module) -> Result<()> {
    let offset = section.tell();
    let count = section.uleb()? as usize;
    let functions = module.functions().len();
    if count != functions {
        return Err(DecodeError::FunctionCountMismatch {
            offset,
            functions,
            bodies: count,
        });
    }

    for (i, func) in module.functions_mut().iter_mut().enumerate() {
        let size = section.uleb()? as usize;
        let mut body = section.sub_reader(size)?;
        decode_function_body(&mut body, func)?;
        if func.name.is_empty() {
            func.name = format!("(;{i};)");
        }
        trace!(
            index = i,
            address = func.address,
            size = func.size,
            instructions = func.code.len(),
            "decoded function body"
        );
    }
    Ok(())
}

/// Fills `func` from a code entry whose reader spans exactly the declared size.
fn decode_function_body(body: &mut ByteReader<'_>, func: &mut Function) -> Result<()> {
    let start = body.tell();
    let declared = body.remaining();

    let groups = body.uleb()?;
    for _ in 0..groups {
        let count = body.uleb()?;
        let value_type = decode_value_type(body)?;
        for _ in 0..count {
            func.locals.push(value_type);
        }
    }

    func.address = body.tell();
    func.size = declared - (func.address - start);
    func.code = disassemble_all(body)?;
    Ok(())
}

/// Decodes instructions up to and including the terminating `end`, which is
/// not kept. Operand bytes may equal the `end` opcode, so this cannot scan.
fn decode_const_expr(reader: &mut ByteReader<'_>) -> Result<Vec<Instruction>> {
    let mut expr = vec![];
    loop {
        let instr = decode_instruction(reader)?;
        if instr.opcode == Opcode::End {
            return Ok(expr);
        }
        expr.push(instr);
    }
}

fn decode_value_type(reader: &mut ByteReader<'_>) -> Result<ValueType> {
    let offset = reader.tell();
    let byte = reader.u8()?;
    ValueType::from_u8(byte).ok_or(DecodeError::InvalidValueType {
        offset,
        byte: byte.into(),
    })
}

fn decode_value_types(reader: &mut ByteReader<'_>) -> Result<Vec<ValueType>> {
    let count = reader.uleb()?;
    let mut types = vec![];
    for _ in 0..count {
        types.push(decode_value_type(reader)?);
    }
    Ok(types)
}

fn decode_limits(reader: &mut ByteReader<'_>) -> Result<Limits> {
    let offset = reader.tell();
    let flag = reader.u8()?;
    let min = reader.uleb()?;
    let max = match flag {
        0x00 => None,
        0x01 => Some(reader.uleb()?),
        _ => return Err(DecodeError::InvalidLimitsFlag { offset, flag }),
    };
    Ok(Limits { min, max })
}

fn decode_table_type(reader: &mut ByteReader<'_>) -> Result<TableType> {
    let offset = reader.tell();
    let byte = reader.u8()?;
    let elem_type = ElemType::from_u8(byte).ok_or(DecodeError::InvalidElemType { offset, byte })?;
    let limits = decode_limits(reader)?;
    Ok(TableType { elem_type, limits })
}

fn decode_memory_type(reader: &mut ByteReader<'_>) -> Result<MemoryType> {
    let limits = decode_limits(reader)?;
    Ok(MemoryType { limits })
}

fn decode_global_type(reader: &mut ByteReader<'_>) -> Result<GlobalType> {
    let value_type = decode_value_type(reader)?;
    let offset = reader.tell();
    let byte = reader.u8()?;
    let mutability =
        Mutability::from_u8(byte).ok_or(DecodeError::InvalidMutability { offset, byte })?;
    Ok(GlobalType {
        value_type,
        mutability,
    })
}

#[cfg(test)]
mod tests {
    use super::{DecodeOptions, decode_module};
    use crate::binary::{error::DecodeError, module::Module, types::ValueType};
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    const HEADER: &[u8] = b"\0asm\x01\x00\x00\x00";

    fn with_header(sections: &[u8]) -> Vec<u8> {
        let mut bytes = HEADER.to_vec();
        bytes.extend_from_slice(sections);
        bytes
    }

    fn decode(sections: &[u8]) -> Result<Module, DecodeError> {
        decode_module(&with_header(sections), &DecodeOptions::default())
    }

    #[test]
    fn decode_header_only() -> Result<()> {
        let module = decode(&[])?;
        assert_eq!(module, Module::default());
        assert_eq!(module.version(), 1);
        Ok(())
    }

    #[test]
    fn bad_magic() {
        assert_eq!(
            decode_module(b"\0wasm\x01\x00\x00", &DecodeOptions::default()),
            Err(DecodeError::MalformedHeader {
                offset: 0,
                expected: b"\0asm".to_vec(),
                found: b"\0was".to_vec(),
            })
        );
    }

    #[test]
    fn truncated_version() {
        assert_eq!(
            decode_module(b"\0asm\x01", &DecodeOptions::default()),
            Err(DecodeError::UnexpectedEndOfStream {
                offset: 4,
                needed: 3
            })
        );
    }

    #[test]
    fn unknown_section_id() {
        assert_eq!(
            decode(&[0x0C, 0x00]),
            Err(DecodeError::UnknownSectionId { offset: 8, id: 12 })
        );
    }

    #[test]
    fn bad_func_type_prefix() {
        assert_eq!(
            decode(&[0x01, 0x04, 0x01, 0x61, 0x00, 0x00]),
            Err(DecodeError::MalformedHeader {
                offset: 11,
                expected: vec![0x60],
                found: vec![0x61],
            })
        );
    }

    #[test]
    fn unknown_import_kind() {
        assert_eq!(
            decode(&[0x02, 0x06, 0x01, 0x01, b'a', 0x01, b'b', 0x04]),
            Err(DecodeError::UnknownImportKind {
                offset: 15,
                kind: 4
            })
        );
    }

    #[test]
    fn unknown_export_kind() {
        assert_eq!(
            decode(&[0x07, 0x05, 0x01, 0x01, b'a', 0x05, 0x00]),
            Err(DecodeError::UnknownExportKind {
                offset: 13,
                kind: 5
            })
        );
    }

    #[test]
    fn unknown_opcode_in_body() {
        #[rustfmt::skip]
        let sections = [
            0x01, 0x04, 0x01, 0x60, 0x00, 0x00, // type
            0x03, 0x02, 0x01, 0x00,             // function
            0x0A, 0x04, 0x01, 0x02, 0x00, 0x06, // code
        ];
        assert_eq!(
            decode(&sections),
            Err(DecodeError::UnknownOpcode {
                offset: 23,
                opcode: 0x06
            })
        );
    }

    #[test]
    fn body_overrunning_declared_size() {
        #[rustfmt::skip]
        let sections = [
            0x03, 0x02, 0x01, 0x00,
            // body declares 2 bytes but i32.const needs an immediate
            0x0A, 0x05, 0x01, 0x02, 0x00, 0x41, 0x00,
        ];
        assert!(matches!(
            decode(&sections),
            Err(DecodeError::UnexpectedEndOfStream { offset: 18, .. })
        ));
    }

    #[test]
    fn section_size_mismatch() {
        assert_eq!(
            decode(&[0x01, 0x03, 0x00, 0x00, 0x00]),
            Err(DecodeError::SectionSizeMismatch {
                offset: 8,
                id: 1,
                declared: 3,
                consumed: 1,
            })
        );
    }

    #[test]
    fn truncated_section_payload() {
        assert_eq!(
            decode(&[0x01, 0x05, 0x01, 0x60]),
            Err(DecodeError::UnexpectedEndOfStream {
                offset: 10,
                needed: 3
            })
        );
    }

    #[test]
    fn section_order() -> Result<()> {
        let sections = [0x03, 0x01, 0x00, 0x01, 0x01, 0x00];
        assert_eq!(
            decode(&sections),
            Err(DecodeError::SectionOutOfOrder {
                offset: 11,
                id: 1,
                previous: 3
            })
        );
        assert!(matches!(
            decode(&[0x01, 0x01, 0x00, 0x01, 0x01, 0x00]),
            Err(DecodeError::SectionOutOfOrder { .. })
        ));

        let lenient = DecodeOptions {
            strict_section_order: false,
        };
        decode_module(&with_header(&sections), &lenient)?;

        // custom sections may appear between any two sections
        decode(&[0x01, 0x01, 0x00, 0x00, 0x02, 0x01, b'a', 0x03, 0x01, 0x00])?;
        Ok(())
    }

    #[test]
    fn repeated_section_rejected_in_lenient_order() {
        let lenient = DecodeOptions {
            strict_section_order: false,
        };
        #[rustfmt::skip]
        let sections = [
            0x01, 0x04, 0x01, 0x60, 0x00, 0x00,       // type: () -> ()
            0x03, 0x02, 0x01, 0x00,                   // function: type 0
            0x0A, 0x06, 0x01, 0x04, 0x01, 0x01, 0x7F, 0x0B, // code: (local i32)
            0x0A, 0x06, 0x01, 0x04, 0x01, 0x01, 0x7F, 0x0B, // same code again
        ];
        assert_eq!(
            decode_module(&with_header(&sections), &lenient),
            Err(DecodeError::DuplicateSection { offset: 26, id: 10 })
        );
        let types_twice = [0x01, 0x01, 0x00, 0x03, 0x01, 0x00, 0x01, 0x01, 0x00];
        assert_eq!(
            decode_module(&with_header(&types_twice), &lenient),
            Err(DecodeError::DuplicateSection { offset: 14, id: 1 })
        );

        // the first code section alone decodes to the declared local
        let single = decode_module(&with_header(&sections[..18]), &lenient);
        assert_eq!(
            single.map(|module| module.functions()[0].locals.clone()),
            Ok(vec![ValueType::I32])
        );
    }

    #[test]
    fn function_count_mismatch() {
        assert_eq!(
            decode(&[0x03, 0x02, 0x01, 0x00, 0x0A, 0x01, 0x00]),
            Err(DecodeError::FunctionCountMismatch {
                offset: 14,
                functions: 1,
                bodies: 0
            })
        );
    }

    #[test]
    fn invalid_limits_flag() {
        assert_eq!(
            decode(&[0x05, 0x03, 0x01, 0x02, 0x00]),
            Err(DecodeError::InvalidLimitsFlag {
                offset: 11,
                flag: 2
            })
        );
    }

    #[test]
    fn invalid_mutability() {
        assert_eq!(
            decode(&[0x06, 0x06, 0x01, 0x7F, 0x02, 0x41, 0x00, 0x0B]),
            Err(DecodeError::InvalidMutability {
                offset: 12,
                byte: 2
            })
        );
    }

    #[test]
    fn invalid_elem_type() {
        assert_eq!(
            decode(&[0x04, 0x04, 0x01, 0x6F, 0x00, 0x01]),
            Err(DecodeError::InvalidElemType {
                offset: 11,
                byte: 0x6F
            })
        );
    }

    #[test]
    fn invalid_local_type() {
        #[rustfmt::skip]
        let sections = [
            0x03, 0x02, 0x01, 0x00,
            0x0A, 0x06, 0x01, 0x04, 0x01, 0x01, 0x7B, 0x0B,
        ];
        assert_eq!(
            decode(&sections),
            Err(DecodeError::InvalidValueType {
                offset: 18,
                byte: 0x7B
            })
        );
    }

    #[test]
    fn unterminated_const_expr() {
        assert_eq!(
            decode(&[0x06, 0x05, 0x01, 0x7F, 0x00, 0x41, 0x00]),
            Err(DecodeError::UnexpectedEndOfStream {
                offset: 15,
                needed: 1
            })
        );
    }

    #[test]
    fn const_expr_operand_equal_to_end_byte() -> Result<()> {
        // i32.const 11 encodes its operand as 0x0B
        #[rustfmt::skip]
        let sections = [
            0x06, 0x0B, 0x02,
            0x7F, 0x00, 0x41, 0x0B, 0x0B,
            0x7F, 0x00, 0x41, 0x01, 0x0B,
        ];
        let module = decode(&sections)?;
        let inits: Vec<String> = module
            .globals()
            .iter()
            .map(|global| global.init[0].to_string())
            .collect();
        assert_eq!(inits, vec!["i32.const 11", "i32.const 1"]);
        Ok(())
    }

    #[test]
    fn data_section_is_skipped() -> Result<()> {
        let module = decode(&[0x0B, 0x03, 0xDE, 0xAD, 0xBE])?;
        assert_eq!(module, Module::default());
        Ok(())
    }

    #[test]
    fn locals_and_address_accounting() -> Result<()> {
        #[rustfmt::skip]
        let sections = [
            0x03, 0x02, 0x01, 0x00,
            0x0A, 0x0A, 0x01,
            0x08,                   // body size
            0x02, 0x02, 0x7F, 0x01, 0x7C, // locals: 2 x i32, 1 x f64
            0x20, 0x00, 0x0B,       // local.get 0, end
        ];
        let module = decode(&sections)?;
        let func = &module.functions()[0];
        assert_eq!(func.locals.len(), 3);
        assert_eq!(func.address, 21);
        assert_eq!(func.size, 3);
        assert_eq!(func.code.iter().map(|i| i.size).sum::<usize>(), func.size);
        assert_eq!(func.name, "(;0;)");
        Ok(())
    }
}
