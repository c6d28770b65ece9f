//! WAT-like rendering of a decoded [`Module`].
//!
//! Only the parts a reader needs to follow the code are printed: types,
//! imports, functions, memories and exports.

use crate::binary::{
    instruction::Instruction,
    module::Module,
    opcode::Opcode,
    section::{ExportDesc, Function, ImportDesc},
    types::{FuncType, GlobalType, Limits, Mutability, ValueType},
};
use std::ops::{Deref, DerefMut};

const INDENT: &str = "  ";

#[derive(Debug, Default)]
pub struct TextWriter {
    buffer: String,
    depth: usize,
}

impl TextWriter {
    pub fn line(&mut self, text: &str) {
        self.line_at(0, text);
    }

    fn line_at(&mut self, extra: usize, text: &str) {
        for _ in 0..self.depth + extra {
            self.buffer.push_str(INDENT);
        }
        self.buffer.push_str(text);
        self.buffer.push('\n');
    }

    /// Indents every line written through the returned guard by one more
    /// level. The level is restored when the guard is dropped.
    pub fn indent(&mut self) -> Indent<'_> {
        self.depth += 1;
        Indent { writer: self }
    }

    pub fn finish(self) -> String {
        self.buffer
    }
}

pub struct Indent<'a> {
    writer: &'a mut TextWriter,
}

impl Deref for Indent<'_> {
    type Target = TextWriter;

    fn deref(&self) -> &Self::Target {
        self.writer
    }
}

impl DerefMut for Indent<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.writer
    }
}

impl Drop for Indent<'_> {
    fn drop(&mut self) {
        self.writer.depth -= 1;
    }
}

pub fn render(module: &Module) -> String {
    let mut w = TextWriter::default();
    w.line("(module");
    {
        let mut w = w.indent();
        for (i, ty) in module.types().iter().enumerate() {
            w.line(&format!("(type (;{i};) {})", func_type(ty)));
        }
        for (i, import) in module.imports().iter().enumerate() {
            let desc = match &import.desc {
                ImportDesc::Func(type_idx) => format!("(func (;{i};) (type {type_idx}))"),
                ImportDesc::Table(table) => format!(
                    "(table (;{i};) {} {})",
                    limits(&table.limits),
                    table.elem_type
                ),
                ImportDesc::Memory(memory) => {
                    format!("(memory (;{i};) {})", limits(&memory.limits))
                }
                ImportDesc::Global(global) => format!("(global (;{i};) {})", global_type(global)),
            };
            w.line(&format!(
                "(import \"{}\" \"{}\" {desc})",
                import.module, import.field
            ));
        }
        for func in module.functions() {
            write_function(&mut w, func);
        }
        for (i, memory) in module.memories().iter().enumerate() {
            w.line(&format!("(memory (;{i};) {})", limits(&memory.limits)));
        }
        for export in module.exports() {
            let desc = match export.desc {
                ExportDesc::Func(idx) => format!("(func {idx})"),
                ExportDesc::Table(idx) => format!("(table {idx})"),
                ExportDesc::Memory(idx) => format!("(memory {idx})"),
                ExportDesc::Global(idx) => format!("(global {idx})"),
            };
            w.line(&format!("(export \"{}\" {desc})", export.name));
        }
    }
    w.line(")");
    w.finish()
}

fn write_function(w: &mut TextWriter, func: &Function) {
    w.line(&format!("(func {} (type {})", func.name, func.type_idx));
    {
        let mut body = w.indent();
        if !func.locals.is_empty() {
            body.line(&format!("(local {})", value_types(&func.locals)));
        }
        write_instructions(&mut body, &func.code);
    }
    w.line(")");
}

/// Writes a body, nesting lines between block openers and closers. The final
/// `end` closes the function itself and is left out.
fn write_instructions(w: &mut TextWriter, code: &[Instruction]) {
    let code = match code.split_last() {
        Some((last, rest)) if last.opcode == Opcode::End => rest,
        _ => code,
    };

    let mut depth = 0usize;
    for instr in code {
        if instr.ends_block() {
            depth = depth.saturating_sub(1);
        }
        w.line_at(depth, &instr.to_string());
        if instr.starts_block() {
            depth += 1;
        }
    }
}

fn value_types(types: &[ValueType]) -> String {
    types
        .iter()
        .map(ValueType::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn func_type(ty: &FuncType) -> String {
    let mut text = String::from("(func");
    if !ty.params.is_empty() {
        text.push_str(&format!(" (param {})", value_types(&ty.params)));
    }
    if !ty.results.is_empty() {
        text.push_str(&format!(" (result {})", value_types(&ty.results)));
    }
    text.push(')');
    text
}

fn limits(limits: &Limits) -> String {
    match limits.max {
        Some(max) => format!("{} {max}", limits.min),
        None => limits.min.to_string(),
    }
}

fn global_type(global: &GlobalType) -> String {
    match global.mutability {
        Mutability::Const => global.value_type.to_string(),
        Mutability::Var => format!("(mut {})", global.value_type),
    }
}

#[cfg(test)]
mod tests {
    use super::{TextWriter, render};
    use crate::binary::module::Module;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    #[test]
    fn indent_guard_restores_depth() {
        let mut w = TextWriter::default();
        w.line("a");
        {
            let mut inner = w.indent();
            inner.line("b");
            {
                let mut innermost = inner.indent();
                innermost.line("c");
            }
            inner.line("d");
        }
        w.line("e");
        assert_eq!(w.finish(), "a\n  b\n    c\n  d\ne\n");
    }

    #[test]
    fn render_module() -> Result<()> {
        let wasm = wat::parse_str(
            r#"(module
                (import "env" "log" (func (param i32)))
                (import "env" "counter" (global (mut i64)))
                (memory 1 2)
                (func $run (param i32) (result i32) (local i64)
                    local.get 0
                    if (result i32)
                        block
                            nop
                        end
                        i32.const 1
                    else
                        i32.const 2
                    end)
                (export "run" (func $run)))"#,
        )?;
        let module = Module::new(&wasm)?;

        let expected = r#"(module
  (type (;0;) (func (param i32)))
  (type (;1;) (func (param i32) (result i32)))
  (import "env" "log" (func (;0;) (type 0)))
  (import "env" "counter" (global (;1;) (mut i64)))
  (func run (type 1)
    (local i64)
    local.get 0
    if (result i32)
      block
        nop
      end
      i32.const 1
    else
      i32.const 2
    end
  )
  (memory (;0;) 1 2)
  (export "run" (func 1))
)
"#;
        assert_eq!(render(&module), expected);
        Ok(())
    }
}
