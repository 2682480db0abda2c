// EmberCL Global Context
//
// The shared, read-mostly half of the runtime: symbol table, special-form
// ids and the primitive registry. Wrapped in an Arc by embedders that run
// several Processes; only the symbol table takes a lock.

use std::sync::RwLock;

use crate::eval::{EvalResult, SpecialForms};
use crate::fastmap;
use crate::process::Process;
use crate::symbol::{PackageId, SymbolId, SymbolTable, CL_PACKAGE};
use crate::types::NodeId;

/// Type of primitive functions. Argument nodes arrive already evaluated;
/// the slice is never mutated.
pub type PrimitiveFn = fn(&mut Process, &GlobalContext, &[NodeId]) -> EvalResult;

pub struct GlobalContext {
    pub symbols: RwLock<SymbolTable>,
    pub special_forms: SpecialForms,
    pub primitives: fastmap::HashMap<SymbolId, PrimitiveFn>,

    // Cached standard symbols
    pub t_sym: SymbolId,
    pub nil_sym: SymbolId,
}

impl GlobalContext {
    pub fn new() -> Self {
        let mut symbols = SymbolTable::new();
        let special_forms = SpecialForms::new(&mut symbols);

        let nil_sym = symbols.intern_in("NIL", CL_PACKAGE);
        let t_sym = symbols.intern_in("T", CL_PACKAGE);
        symbols.export_symbol(nil_sym);
        symbols.export_symbol(t_sym);

        Self {
            symbols: RwLock::new(symbols),
            special_forms,
            primitives: fastmap::HashMap::default(),
            t_sym,
            nil_sym,
        }
    }

    pub fn register_primitive(&mut self, name: &str, pkg: PackageId, func: PrimitiveFn) {
        let sym = {
            let mut symbols = self.symbols.write().unwrap();
            let sym = symbols.intern_in(name, pkg);
            symbols.export_symbol(sym);
            sym
        };
        self.primitives.insert(sym, func);
    }

    /// Look up a symbol's name for diagnostics.
    pub fn symbol_name(&self, sym: SymbolId) -> String {
        self.symbols
            .read()
            .unwrap()
            .symbol_name(sym)
            .unwrap_or("#<unknown>")
            .to_string()
    }
}

impl Default for GlobalContext {
    fn default() -> Self {
        Self::new()
    }
}
