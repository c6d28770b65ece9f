use super::{
    decoder::{DecodeOptions, decode_module},
    error::DecodeError,
    section::{Elem, Export, Function, Global, Import, ImportDesc},
    types::{FuncType, MemoryType, TableType},
};
use anyhow::Context as _;
use std::path::Path;

/// A decoded module.
///
/// Built by a single decode pass; afterwards it is only readable through the
/// accessors below.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    version: u32,
    types: Vec<FuncType>,
    imports: Vec<Import>,
    functions: Vec<Function>,
    tables: Vec<TableType>,
    memories: Vec<MemoryType>,
    globals: Vec<Global>,
    exports: Vec<Export>,
    start: Option<u32>,
    elems: Vec<Elem>,
}

impl Default for Module {
    fn default() -> Self {
        Self::with_version(1)
    }
}

impl Module {
    pub fn new(input: &[u8]) -> anyhow::Result<Module> {
        let module = Module::decode(input, &DecodeOptions::default())
            .map_err(|e| anyhow::anyhow!("failed to parse wasm: {}", e))?;
        Ok(module)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Module> {
        Module::from_file_with(path, &DecodeOptions::default())
    }

    pub fn from_file_with(
        path: impl AsRef<Path>,
        options: &DecodeOptions,
    ) -> anyhow::Result<Module> {
        let path = path.as_ref();
        let wasm =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        Module::decode(&wasm, options)
            .map_err(|e| anyhow::anyhow!("failed to parse wasm: {}", e))
            .with_context(|| format!("failed to decode {}", path.display()))
    }

    pub fn decode(input: &[u8], options: &DecodeOptions) -> Result<Module, DecodeError> {
        decode_module(input, options)
    }

    pub(crate) fn with_version(version: u32) -> Self {
        Self {
            version,
            types: vec![],
            imports: vec![],
            functions: vec![],
            tables: vec![],
            memories: vec![],
            globals: vec![],
            exports: vec![],
            start: None,
            elems: vec![],
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn types(&self) -> &[FuncType] {
        &self.types
    }

    pub fn type_at(&self, idx: u32) -> Option<&FuncType> {
        self.types.get(idx as usize)
    }

    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    /// Functions defined by this module, in code section order. Imported
    /// functions are not included.
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn function(&self, idx: u32) -> Option<&Function> {
        self.functions.get(idx as usize)
    }

    pub fn function_type(&self, func: &Function) -> Option<&FuncType> {
        self.type_at(func.type_idx)
    }

    pub fn imported_function_count(&self) -> usize {
        self.imports
            .iter()
            .filter(|import| matches!(import.desc, ImportDesc::Func(_)))
            .count()
    }

    pub fn tables(&self) -> &[TableType] {
        &self.tables
    }

    pub fn memories(&self) -> &[MemoryType] {
        &self.memories
    }

    pub fn globals(&self) -> &[Global] {
        &self.globals
    }

    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    pub fn start(&self) -> Option<u32> {
        self.start
    }

    pub fn elems(&self) -> &[Elem] {
        &self.elems
    }

    pub(crate) fn add_type(&mut self, func_type: FuncType) {
        self.types.push(func_type);
    }

    pub(crate) fn add_import(&mut self, import: Import) {
        self.imports.push(import);
    }

    pub(crate) fn add_function(&mut self, func: Function) {
        self.functions.push(func);
    }

    pub(crate) fn functions_mut(&mut self) -> &mut [Function] {
        &mut self.functions
    }

    pub(crate) fn add_table(&mut self, table: TableType) {
        self.tables.push(table);
    }

    pub(crate) fn add_memory(&mut self, memory: MemoryType) {
        self.memories.push(memory);
    }

    pub(crate) fn add_global(&mut self, global: Global) {
        self.globals.push(global);
    }

    pub(crate) fn add_export(&mut self, export: Export) {
        self.exports.push(export);
    }

    pub(crate) fn set_start(&mut self, func_idx: u32) {
        self.start = Some(func_idx);
    }

    pub(crate) fn add_elem(&mut self, elem: Elem) {
        self.elems.push(elem);
    }
}
