//! Bytecode modules
//!
//! A module is the unit the engine loads: one constant pool shared by a
//! table of functions. Its id keys everything the tier controller records
//! about those functions, so ids are never reused within a process.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::constant::ConstantPool;
use crate::error::{BytecodeError, Result};
use crate::function::Function;
use crate::instruction::Instruction;

static MODULE_IDS: AtomicU64 = AtomicU64::new(1);

fn fresh_module_id() -> u64 {
    MODULE_IDS.fetch_add(1, Ordering::Relaxed)
}

/// Loadable bytecode
#[derive(Debug, Serialize, Deserialize)]
pub struct Module {
    /// Process-unique; a deserialized module gets a new one
    #[serde(skip, default = "fresh_module_id")]
    pub module_id: u64,
    /// Where the source came from, for diagnostics
    pub source_url: String,
    /// Constants of every function in the module
    pub constants: ConstantPool,
    /// Function table, indexed by `FunctionIndex`
    pub functions: Vec<Arc<Function>>,
    /// Function run when the module is evaluated
    pub entry_point: u32,
}

impl Module {
    /// Start building a module
    pub fn builder(source_url: impl Into<String>) -> ModuleBuilder {
        ModuleBuilder {
            source_url: source_url.into(),
            constants: ConstantPool::new(),
            functions: Vec::new(),
            entry_point: 0,
        }
    }

    /// Function at `index`
    #[inline]
    pub fn function(&self, index: u32) -> Option<&Arc<Function>> {
        self.functions.get(index as usize)
    }

    /// Function run on evaluation
    pub fn entry_function(&self) -> Option<&Arc<Function>> {
        self.function(self.entry_point)
    }

    /// Check every function on its own, then every cross-reference into the
    /// constant pool and the function table
    pub fn validate(&self) -> Result<()> {
        let function_count = self.functions.len();
        if function_count > 0 && self.entry_point as usize >= function_count {
            return Err(BytecodeError::FunctionOutOfRange {
                index: self.entry_point,
                count: function_count,
            });
        }

        for (index, function) in self.functions.iter().enumerate() {
            function.validate()?;
            for (pc, insn) in function.instructions.iter().enumerate() {
                if let Some(constant) = insn.constant_operand()
                    && self.constants.get(constant.index()).is_none()
                {
                    return Err(BytecodeError::ConstantOutOfRange {
                        function: index as u32,
                        pc,
                        constant: constant.index(),
                        count: self.constants.len(),
                    });
                }
                if let Instruction::Closure { func, .. } = insn
                    && func.index() as usize >= function_count
                {
                    return Err(BytecodeError::FunctionOutOfRange {
                        index: func.index(),
                        count: function_count,
                    });
                }
            }
        }
        Ok(())
    }

    /// JSON form; profiling feedback is left out
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Load the JSON form, with fresh feedback and a fresh id
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Incremental construction of a [`Module`]
#[derive(Debug)]
pub struct ModuleBuilder {
    source_url: String,
    constants: ConstantPool,
    functions: Vec<Arc<Function>>,
    entry_point: u32,
}

impl ModuleBuilder {
    /// Pool to intern constants into before adding functions that use them
    pub fn constants_mut(&mut self) -> &mut ConstantPool {
        &mut self.constants
    }

    /// Append a function; returns its `FunctionIndex` value
    pub fn add_function(&mut self, function: Function) -> u32 {
        self.functions.push(Arc::new(function));
        self.functions.len() as u32 - 1
    }

    /// Choose the function run on evaluation
    pub fn entry_point(&mut self, index: u32) -> &mut Self {
        self.entry_point = index;
        self
    }

    /// Finish, rejecting malformed bytecode
    pub fn build(self) -> Result<Module> {
        let module = Module {
            module_id: fresh_module_id(),
            source_url: self.source_url,
            constants: self.constants,
            functions: self.functions,
            entry_point: self.entry_point,
        };
        module.validate()?;
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::{ConstantIndex, FunctionIndex, Register};

    fn load_constant(idx: u32) -> Function {
        Function::builder()
            .name("main")
            .register_count(1)
            .instruction(Instruction::LoadConst {
                dst: Register(0),
                idx: ConstantIndex(idx),
            })
            .instruction(Instruction::Return { src: Register(0) })
            .build()
    }

    fn sample() -> Module {
        let mut builder = Module::builder("sample.js");
        let name = builder.constants_mut().add_string("answer");
        let main = builder.add_function(load_constant(name));
        builder.entry_point(main);
        builder.build().unwrap()
    }

    #[test]
    fn ids_are_never_shared() {
        assert_ne!(sample().module_id, sample().module_id);
    }

    #[test]
    fn json_load_gets_a_fresh_id() {
        let module = sample();
        let loaded = Module::from_json(&module.to_json().unwrap()).unwrap();
        assert_ne!(loaded.module_id, module.module_id);
        assert_eq!(loaded.source_url, "sample.js");
        assert_eq!(loaded.entry_function().map(|f| f.display_name()), Some("main"));
        assert_eq!(loaded.constants.len(), 1);
    }

    #[test]
    fn register_errors_from_functions_surface() {
        let mut builder = Module::builder("bad.js");
        builder.add_function(
            Function::builder()
                .instruction(Instruction::Return { src: Register(4) })
                .build(),
        );
        assert!(matches!(builder.build(), Err(BytecodeError::RegisterOutOfRange { .. })));
    }

    #[test]
    fn dangling_constant_is_rejected() {
        let mut builder = Module::builder("bad.js");
        builder.add_function(load_constant(0));
        assert_eq!(
            builder.build().unwrap_err(),
            BytecodeError::ConstantOutOfRange {
                function: 0,
                pc: 0,
                constant: 0,
                count: 0,
            }
        );
    }

    #[test]
    fn dangling_closure_and_entry_point_are_rejected() {
        let mut builder = Module::builder("bad.js");
        builder.add_function(
            Function::builder()
                .register_count(1)
                .instruction(Instruction::Closure {
                    dst: Register(0),
                    func: FunctionIndex(3),
                })
                .instruction(Instruction::Return { src: Register(0) })
                .build(),
        );
        assert!(matches!(
            builder.build(),
            Err(BytecodeError::FunctionOutOfRange { index: 3, count: 1 })
        ));

        let mut builder = Module::builder("bad.js");
        builder.constants_mut().add_number(1.0);
        builder.add_function(load_constant(0));
        builder.entry_point(2);
        assert!(matches!(
            builder.build(),
            Err(BytecodeError::FunctionOutOfRange { index: 2, count: 1 })
        ));
    }
}
