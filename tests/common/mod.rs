// Shared test harness: a fresh runtime plus programmatic form builders.
// The reader lives outside the core, so tests construct forms directly
// through the Process constructors.

#![allow(dead_code)]

use embercl::context::GlobalContext;
use embercl::eval::{Environment, EvalResult, Interpreter};
use embercl::primitives::register_primitives;
use embercl::process::Process;
use embercl::symbol::SymbolId;
use embercl::types::{NodeId, Object};

pub fn new_runtime() -> (GlobalContext, Process) {
    let mut globals = GlobalContext::new();
    register_primitives(&mut globals);
    (globals, Process::new())
}

pub fn intern(globals: &GlobalContext, name: &str) -> SymbolId {
    globals.symbols.write().unwrap().intern(name)
}

/// A symbol node interned in the current package (inheriting CL exports).
pub fn sym(globals: &GlobalContext, proc: &mut Process, name: &str) -> NodeId {
    let s = intern(globals, name);
    proc.make_symbol_node(s)
}

pub fn kw(globals: &GlobalContext, proc: &mut Process, name: &str) -> NodeId {
    let s = globals.symbols.write().unwrap().intern_keyword(name);
    proc.make_symbol_node(s)
}

pub fn int(proc: &mut Process, n: i64) -> NodeId {
    proc.make_fixnum(n)
}

pub fn dbl(proc: &mut Process, f: f64) -> NodeId {
    proc.make_double_float(f)
}

pub fn string(proc: &mut Process, s: &str) -> NodeId {
    proc.make_string(s)
}

pub fn list(proc: &mut Process, items: &[NodeId]) -> NodeId {
    proc.make_list(items)
}

/// (quote form)
pub fn quoted(globals: &GlobalContext, proc: &mut Process, form: NodeId) -> NodeId {
    let q = sym(globals, proc, "QUOTE");
    proc.make_list(&[q, form])
}

pub fn eval(globals: &GlobalContext, proc: &mut Process, form: NodeId) -> EvalResult {
    Interpreter::new(proc, globals).eval(form, &Environment::new())
}

pub fn eval_ok(globals: &GlobalContext, proc: &mut Process, form: NodeId) -> NodeId {
    match eval(globals, proc, form) {
        Ok(node) => node,
        Err(e) => panic!("evaluation failed: {:?}", e),
    }
}

pub fn as_fixnum(proc: &Process, node: NodeId) -> i64 {
    match proc.heap.get_unchecked(node) {
        Object::Fixnum(n) => *n,
        other => panic!("expected fixnum, got {:?}", other),
    }
}

pub fn is_t(proc: &Process, globals: &GlobalContext, node: NodeId) -> bool {
    match proc.heap.get_unchecked(node) {
        Object::Symbol(s) => *s == globals.t_sym,
        _ => false,
    }
}
