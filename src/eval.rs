// EmberCL Evaluator - Special Forms and Core Evaluation
//
// The form dispatcher plus every special operator. Nonlocal exits travel as
// ControlSignal values through the Err channel of EvalResult; each BLOCK /
// TAGBODY / CATCH frame absorbs only signals carrying its own token and
// re-raises everything else.

use std::sync::{Arc, RwLock};

use smallvec::SmallVec;

use crate::conditions::LispError;
use crate::context::GlobalContext;
use crate::fastmap;
use crate::process::{BlockId, Process, TagbodyId};
use crate::symbol::{SymbolId, SymbolTable, CL_PACKAGE};
use crate::types::{NodeId, Object, TypeSpec};

/// Environment for lexical bindings: chained frames whose cells are shared
/// between clones, plus the declared-special set and the block/tag
/// registrations the control-flow operators consult.
#[derive(Debug, Clone)]
pub struct Environment {
    bindings: Arc<RwLock<fastmap::HashMap<SymbolId, NodeId>>>,
    specials: Arc<RwLock<fastmap::HashSet<SymbolId>>>,
    /// BLOCK label established by this frame
    block: Option<(SymbolId, BlockId)>,
    /// TAGBODY registration established by this frame
    tagbody: Option<(TagbodyId, Arc<Vec<TagKey>>)>,
    parent: Option<Box<Environment>>,
}

impl Environment {
    pub fn new() -> Self {
        Self {
            bindings: Arc::new(RwLock::new(fastmap::HashMap::default())),
            specials: Arc::new(RwLock::new(fastmap::HashSet::default())),
            block: None,
            tagbody: None,
            parent: None,
        }
    }

    pub fn with_parent(parent: Environment) -> Self {
        Self {
            bindings: Arc::new(RwLock::new(fastmap::HashMap::default())),
            specials: Arc::new(RwLock::new(fastmap::HashSet::default())),
            block: None,
            tagbody: None,
            parent: Some(Box::new(parent)),
        }
    }

    fn child_with_block(&self, name: SymbolId, id: BlockId) -> Self {
        let mut env = Environment::with_parent(self.clone());
        env.block = Some((name, id));
        env
    }

    fn child_with_tagbody(&self, id: TagbodyId, tags: Vec<TagKey>) -> Self {
        let mut env = Environment::with_parent(self.clone());
        env.tagbody = Some((id, Arc::new(tags)));
        env
    }

    pub fn bind(&self, sym: SymbolId, val: NodeId) {
        self.bindings.write().unwrap().insert(sym, val);
    }

    /// Assign to the nearest visible binding; false when nothing binds sym.
    pub fn set(&self, sym: SymbolId, val: NodeId) -> bool {
        {
            let mut guard = self.bindings.write().unwrap();
            if guard.contains_key(&sym) {
                guard.insert(sym, val);
                return true;
            }
        }
        match &self.parent {
            Some(parent) => parent.set(sym, val),
            None => false,
        }
    }

    pub fn lookup(&self, sym: SymbolId) -> Option<NodeId> {
        if let Some(val) = self.bindings.read().unwrap().get(&sym) {
            return Some(*val);
        }
        self.parent.as_ref().and_then(|p| p.lookup(sym))
    }

    pub fn declare_special(&self, sym: SymbolId) {
        self.specials.write().unwrap().insert(sym);
    }

    /// Declared special in any visible frame?
    pub fn is_special(&self, sym: SymbolId) -> bool {
        if self.specials.read().unwrap().contains(&sym) {
            return true;
        }
        self.parent.as_ref().map_or(false, |p| p.is_special(sym))
    }

    /// Innermost visible BLOCK label binding.
    pub fn lookup_block(&self, name: SymbolId) -> Option<BlockId> {
        match self.block {
            Some((n, id)) if n == name => Some(id),
            _ => self.parent.as_ref().and_then(|p| p.lookup_block(name)),
        }
    }

    /// Innermost visible TAGBODY registering this tag.
    pub fn lookup_tag(&self, tag: &TagKey) -> Option<TagbodyId> {
        if let Some((id, tags)) = &self.tagbody {
            if tags.contains(tag) {
                return Some(*id);
            }
        }
        self.parent.as_ref().and_then(|p| p.lookup_tag(tag))
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/// TAGBODY tags: symbols or integers.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum TagKey {
    Sym(SymbolId),
    Int(i64),
}

/// Control flow signals for non-local exits. Each carrier holds the token
/// of the frame meant to absorb it; every other frame re-propagates.
#[derive(Debug)]
pub enum ControlSignal {
    /// Jump to a tag of the identified tagbody
    Go { tagbody: TagbodyId, tag: TagKey },
    /// Return from the identified block
    ReturnFrom { block: BlockId, value: NodeId },
    /// Throw to the catch whose registered tag is EQ
    Throw { tag: NodeId, value: NodeId },
    /// Typed error (the only error channel)
    Error(LispError),
}

impl From<LispError> for ControlSignal {
    fn from(e: LispError) -> Self {
        ControlSignal::Error(e)
    }
}

/// Result of evaluation
pub type EvalResult = Result<NodeId, ControlSignal>;

// ---------------------------------------------------------------------
// Lambda lists and closures
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OptionalParam {
    pub var: SymbolId,
    pub init: Option<NodeId>,
    pub supplied: Option<SymbolId>,
}

#[derive(Debug, Clone)]
pub struct KeyParam {
    /// The keyword callers pass (interned in KEYWORD)
    pub keyword: SymbolId,
    pub var: SymbolId,
    pub init: Option<NodeId>,
    pub supplied: Option<SymbolId>,
}

#[derive(Debug, Clone, Default)]
pub struct LambdaList {
    pub required: Vec<SymbolId>,
    pub optional: Vec<OptionalParam>,
    pub rest: Option<SymbolId>,
    pub keys: Vec<KeyParam>,
    pub allow_other_keys: bool,
    pub aux: Vec<(SymbolId, Option<NodeId>)>,
}

/// A user function: lambda list, body forms, captured environment. DEFUN
/// records its name so the body gets the implicit BLOCK.
#[derive(Debug, Clone)]
pub struct Closure {
    pub name: Option<SymbolId>,
    pub lambda_list: LambdaList,
    pub body: Vec<NodeId>,
    /// Symbols declared special in the body's declarations
    pub specials: Vec<SymbolId>,
    pub env: Environment,
}

// ---------------------------------------------------------------------
// Special form ids
// ---------------------------------------------------------------------

pub struct SpecialForms {
    pub quote: SymbolId,
    pub r#if: SymbolId,
    pub progn: SymbolId,
    pub setq: SymbolId,
    pub r#let: SymbolId,
    pub let_star: SymbolId,
    pub lambda: SymbolId,
    pub function: SymbolId,
    pub defun: SymbolId,
    pub defmacro: SymbolId,
    pub defvar: SymbolId,
    pub defparameter: SymbolId,
    pub and: SymbolId,
    pub or: SymbolId,
    pub when: SymbolId,
    pub unless: SymbolId,
    pub block: SymbolId,
    pub return_from: SymbolId,
    pub tagbody: SymbolId,
    pub go: SymbolId,
    pub catch: SymbolId,
    pub throw: SymbolId,
    pub unwind_protect: SymbolId,
    pub multiple_value_bind: SymbolId,
    pub multiple_value_call: SymbolId,
    pub multiple_value_list: SymbolId,
    pub multiple_value_prog1: SymbolId,
    pub nth_value: SymbolId,
    pub progv: SymbolId,
    pub declare: SymbolId,
    pub special: SymbolId,
    pub amp_optional: SymbolId,
    pub amp_rest: SymbolId,
    pub amp_key: SymbolId,
    pub amp_aux: SymbolId,
    pub amp_allow_other_keys: SymbolId,
}

impl SpecialForms {
    pub fn new(symbols: &mut SymbolTable) -> Self {
        let mut intern_exported = |name: &str| {
            let sym = symbols.intern_in(name, CL_PACKAGE);
            symbols.export_symbol(sym);
            sym
        };

        Self {
            quote: intern_exported("QUOTE"),
            r#if: intern_exported("IF"),
            progn: intern_exported("PROGN"),
            setq: intern_exported("SETQ"),
            r#let: intern_exported("LET"),
            let_star: intern_exported("LET*"),
            lambda: intern_exported("LAMBDA"),
            function: intern_exported("FUNCTION"),
            defun: intern_exported("DEFUN"),
            defmacro: intern_exported("DEFMACRO"),
            defvar: intern_exported("DEFVAR"),
            defparameter: intern_exported("DEFPARAMETER"),
            and: intern_exported("AND"),
            or: intern_exported("OR"),
            when: intern_exported("WHEN"),
            unless: intern_exported("UNLESS"),
            block: intern_exported("BLOCK"),
            return_from: intern_exported("RETURN-FROM"),
            tagbody: intern_exported("TAGBODY"),
            go: intern_exported("GO"),
            catch: intern_exported("CATCH"),
            throw: intern_exported("THROW"),
            unwind_protect: intern_exported("UNWIND-PROTECT"),
            multiple_value_bind: intern_exported("MULTIPLE-VALUE-BIND"),
            multiple_value_call: intern_exported("MULTIPLE-VALUE-CALL"),
            multiple_value_list: intern_exported("MULTIPLE-VALUE-LIST"),
            multiple_value_prog1: intern_exported("MULTIPLE-VALUE-PROG1"),
            nth_value: intern_exported("NTH-VALUE"),
            progv: intern_exported("PROGV"),
            declare: intern_exported("DECLARE"),
            special: intern_exported("SPECIAL"),
            amp_optional: intern_exported("&OPTIONAL"),
            amp_rest: intern_exported("&REST"),
            amp_key: intern_exported("&KEY"),
            amp_aux: intern_exported("&AUX"),
            amp_allow_other_keys: intern_exported("&ALLOW-OTHER-KEYS"),
        }
    }
}

impl SpecialForms {
    /// Special operators may not be redefined as functions or macros.
    pub fn is_special_operator(&self, sym: SymbolId) -> bool {
        [
            self.quote,
            self.r#if,
            self.progn,
            self.setq,
            self.r#let,
            self.let_star,
            self.lambda,
            self.function,
            self.defun,
            self.defmacro,
            self.defvar,
            self.defparameter,
            self.and,
            self.or,
            self.when,
            self.unless,
            self.block,
            self.return_from,
            self.tagbody,
            self.go,
            self.catch,
            self.throw,
            self.unwind_protect,
            self.multiple_value_bind,
            self.multiple_value_call,
            self.multiple_value_list,
            self.multiple_value_prog1,
            self.nth_value,
            self.progv,
        ]
        .contains(&sym)
    }
}

enum LambdaListMode {
    Req,
    Opt,
    Rest,
    Key,
    Aux,
}

/// The EmberCL interpreter: borrows the current Process state and the
/// shared GlobalContext for the duration of an evaluation.
pub struct Interpreter<'a> {
    pub process: &'a mut Process,
    pub globals: &'a GlobalContext,
}

impl<'a> Interpreter<'a> {
    pub fn new(process: &'a mut Process, globals: &'a GlobalContext) -> Self {
        Self { process, globals }
    }

    // ------------------------------------------------------------------
    // Entry point
    // ------------------------------------------------------------------

    pub fn eval(&mut self, form: NodeId, env: &Environment) -> EvalResult {
        if self.process.eval_depth >= self.process.max_eval_depth {
            return Err(LispError::StackOverflow.into());
        }
        self.process.eval_depth += 1;
        let result = self.eval_form(form, env);
        self.process.eval_depth -= 1;
        result
    }

    fn eval_form(&mut self, form: NodeId, env: &Environment) -> EvalResult {
        match self.process.heap.get_unchecked(form) {
            Object::Symbol(sym) => {
                let sym = *sym;
                self.eval_symbol(sym, form, env)
            }
            Object::Cons(op, args) => {
                let (op, args) = (*op, *args);
                self.eval_application(op, args, env)
            }
            // Everything else self-evaluates (numbers, strings, characters,
            // vectors, NIL, functions)
            _ => Ok(form),
        }
    }

    fn eval_symbol(&mut self, sym: SymbolId, node: NodeId, env: &Environment) -> EvalResult {
        if sym == self.globals.nil_sym {
            return Ok(self.process.make_nil());
        }
        if sym == self.globals.t_sym {
            return Ok(node);
        }
        // Keywords self-evaluate
        if self.globals.symbols.read().unwrap().is_keyword(sym) {
            return Ok(node);
        }
        if self.symbol_is_special(sym, env) {
            return self
                .process
                .symbol_value(sym)
                .ok_or_else(|| LispError::UnboundVariable(sym).into());
        }
        if let Some(val) = env.lookup(sym) {
            return Ok(val);
        }
        // Global value slot (SETQ at top level)
        self.process
            .symbol_value(sym)
            .ok_or_else(|| LispError::UnboundVariable(sym).into())
    }

    fn symbol_is_special(&self, sym: SymbolId, env: &Environment) -> bool {
        env.is_special(sym) || self.globals.symbols.read().unwrap().is_special(sym)
    }

    // ------------------------------------------------------------------
    // Application dispatch
    // ------------------------------------------------------------------

    fn eval_application(&mut self, op: NodeId, args: NodeId, env: &Environment) -> EvalResult {
        if let Some(sym) = self.process.as_symbol(op) {
            let sf = &self.globals.special_forms;

            if sym == sf.quote {
                return self.eval_quote(args);
            }
            if sym == sf.r#if {
                return self.eval_if(args, env);
            }
            if sym == sf.progn {
                return self.eval_progn_list(args, env);
            }
            if sym == sf.setq {
                return self.eval_setq(args, env);
            }
            if sym == sf.r#let {
                return self.eval_let(args, env, false);
            }
            if sym == sf.let_star {
                return self.eval_let(args, env, true);
            }
            if sym == sf.lambda {
                return self.eval_lambda(args, env);
            }
            if sym == sf.function {
                return self.eval_function(args, env);
            }
            if sym == sf.defun {
                return self.eval_defun(args, env);
            }
            if sym == sf.defmacro {
                return self.eval_defmacro(args, env);
            }
            if sym == sf.defvar {
                return self.eval_defvar(args, env, false);
            }
            if sym == sf.defparameter {
                return self.eval_defvar(args, env, true);
            }
            if sym == sf.and {
                return self.eval_and(args, env);
            }
            if sym == sf.or {
                return self.eval_or(args, env);
            }
            if sym == sf.when {
                return self.eval_when_unless(args, env, true);
            }
            if sym == sf.unless {
                return self.eval_when_unless(args, env, false);
            }
            if sym == sf.block {
                return self.eval_block(args, env);
            }
            if sym == sf.return_from {
                return self.eval_return_from(args, env);
            }
            if sym == sf.tagbody {
                return self.eval_tagbody(args, env);
            }
            if sym == sf.go {
                return self.eval_go(args, env);
            }
            if sym == sf.catch {
                return self.eval_catch(args, env);
            }
            if sym == sf.throw {
                return self.eval_throw(args, env);
            }
            if sym == sf.unwind_protect {
                return self.eval_unwind_protect(args, env);
            }
            if sym == sf.multiple_value_bind {
                return self.eval_multiple_value_bind(args, env);
            }
            if sym == sf.multiple_value_call {
                return self.eval_multiple_value_call(args, env);
            }
            if sym == sf.multiple_value_list {
                return self.eval_multiple_value_list(args, env);
            }
            if sym == sf.multiple_value_prog1 {
                return self.eval_multiple_value_prog1(args, env);
            }
            if sym == sf.nth_value {
                return self.eval_nth_value(args, env);
            }
            if sym == sf.progv {
                return self.eval_progv(args, env);
            }
            if sym == sf.declare {
                return Err(LispError::Program(
                    "DECLARE is only allowed at the head of a body".to_string(),
                )
                .into());
            }

            // Macro call: expand one step, then re-dispatch on the expansion
            if let Some(&macro_idx) = self.process.macros.get(&sym) {
                let closure = match self.process.closures.get(macro_idx) {
                    Some(c) => c.clone(),
                    None => {
                        return Err(LispError::General("invalid macro closure".to_string()).into())
                    }
                };
                let arg_forms = self.process.list_to_vec(args)?;
                let expansion = self.apply_closure(&closure, &arg_forms)?;
                return self.eval(expansion, env);
            }

            // Primitive
            if let Some(&prim_fn) = self.globals.primitives.get(&sym) {
                let evaluated = self.eval_args(args, env)?;
                self.process.clear_values();
                return prim_fn(self.process, self.globals, &evaluated);
            }

            // Function slot
            if let Some(func) = self.process.get_function(sym) {
                let evaluated = self.eval_args(args, env)?;
                self.process.clear_values();
                return self.apply(func, &evaluated);
            }

            return Err(LispError::UndefinedFunction(sym).into());
        }

        // ((lambda ...) args...)
        if let Some((head, _)) = self.process.as_cons(op) {
            if self.process.as_symbol(head) == Some(self.globals.special_forms.lambda) {
                let func = self.eval(op, env)?;
                let evaluated = self.eval_args(args, env)?;
                self.process.clear_values();
                return self.apply(func, &evaluated);
            }
        }

        Err(LispError::Program("illegal function call".to_string()).into())
    }

    /// Evaluate an argument list left to right, clearing pending multiple
    /// values around each argument.
    fn eval_args(
        &mut self,
        args: NodeId,
        env: &Environment,
    ) -> Result<SmallVec<[NodeId; 8]>, ControlSignal> {
        let mut out: SmallVec<[NodeId; 8]> = SmallVec::new();
        let mut current = args;
        loop {
            match self.process.heap.get_unchecked(current) {
                Object::Nil => return Ok(out),
                Object::Cons(car, cdr) => {
                    let (car, cdr) = (*car, *cdr);
                    let val = self.eval(car, env)?;
                    self.process.clear_values();
                    out.push(val);
                    current = cdr;
                }
                _ => {
                    return Err(
                        LispError::Program("dotted argument list in call".to_string()).into(),
                    )
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // The uniform call protocol
    // ------------------------------------------------------------------

    /// Invoke any callable with already-evaluated arguments. The slice is
    /// never mutated; low arities stay on the stack via SmallVec at the
    /// call sites.
    pub fn apply(&mut self, func: NodeId, args: &[NodeId]) -> EvalResult {
        match self.process.heap.get_unchecked(func) {
            Object::Closure(idx) => {
                let idx = *idx as usize;
                let closure = match self.process.closures.get(idx) {
                    Some(c) => c.clone(),
                    None => {
                        return Err(LispError::General("invalid closure index".to_string()).into())
                    }
                };
                self.apply_closure(&closure, args)
            }
            Object::Primitive(sym) => {
                let sym = *sym;
                match self.globals.primitives.get(&sym) {
                    Some(&f) => {
                        self.process.clear_values();
                        f(self.process, self.globals, args)
                    }
                    None => Err(LispError::UndefinedFunction(sym).into()),
                }
            }
            // Function designator: a symbol names its global function
            Object::Symbol(sym) => {
                let sym = *sym;
                let func = self.resolve_function(sym)?;
                self.apply(func, args)
            }
            _ => Err(LispError::wrong_type(func, TypeSpec::Function).into()),
        }
    }

    pub fn funcall0(&mut self, func: NodeId) -> EvalResult {
        self.apply(func, &[])
    }

    pub fn funcall1(&mut self, func: NodeId, a: NodeId) -> EvalResult {
        self.apply(func, &[a])
    }

    pub fn funcall2(&mut self, func: NodeId, a: NodeId, b: NodeId) -> EvalResult {
        self.apply(func, &[a, b])
    }

    pub fn funcall3(&mut self, func: NodeId, a: NodeId, b: NodeId, c: NodeId) -> EvalResult {
        self.apply(func, &[a, b, c])
    }

    /// Resolve a function-designator symbol to a callable node.
    pub fn resolve_function(&mut self, sym: SymbolId) -> Result<NodeId, ControlSignal> {
        if let Some(func) = self.process.get_function(sym) {
            return Ok(func);
        }
        if self.globals.primitives.contains_key(&sym) {
            return Ok(self.process.heap.alloc(Object::Primitive(sym)));
        }
        Err(LispError::UndefinedFunction(sym).into())
    }

    fn apply_closure(&mut self, closure: &Closure, args: &[NodeId]) -> EvalResult {
        let new_env = Environment::with_parent(closure.env.clone());
        for &s in &closure.specials {
            new_env.declare_special(s);
        }

        let mark = self.process.mark_special_bindings();
        if let Err(e) = self.bind_lambda_list(closure, args, &new_env) {
            self.process.reset_special_bindings(mark);
            return Err(e);
        }
        self.process.clear_values();

        let result = match closure.name {
            Some(name) => {
                let block_id = self.process.next_block_id();
                let benv = new_env.child_with_block(name, block_id);
                match self.eval_body(&closure.body, &benv) {
                    Err(ControlSignal::ReturnFrom { block, value }) if block == block_id => {
                        Ok(value)
                    }
                    other => other,
                }
            }
            None => self.eval_body(&closure.body, &new_env),
        };

        self.process.reset_special_bindings(mark);
        result
    }

    /// Bind a full ordinary lambda list. Arguments arrive evaluated (for
    /// macros: the unevaluated forms); init expressions evaluate in the new
    /// environment as they are reached.
    fn bind_lambda_list(
        &mut self,
        closure: &Closure,
        args: &[NodeId],
        env: &Environment,
    ) -> Result<(), ControlSignal> {
        let ll = &closure.lambda_list;
        let name = closure
            .name
            .map(|n| self.globals.symbol_name(n))
            .unwrap_or_else(|| "#<lambda>".to_string());

        let mut i = 0;
        for &var in &ll.required {
            if i < args.len() {
                self.bind_var(env, var, args[i]);
                i += 1;
            } else {
                return Err(LispError::WrongNumberOfArguments {
                    name,
                    got: args.len(),
                }
                .into());
            }
        }

        for opt in &ll.optional {
            if i < args.len() {
                self.bind_var(env, opt.var, args[i]);
                i += 1;
                if let Some(s) = opt.supplied {
                    let t = self.process.make_bool(true, self.globals.t_sym);
                    self.bind_var(env, s, t);
                }
            } else {
                let val = match opt.init {
                    Some(init) => {
                        let v = self.eval(init, env)?;
                        self.process.clear_values();
                        v
                    }
                    None => self.process.make_nil(),
                };
                self.bind_var(env, opt.var, val);
                if let Some(s) = opt.supplied {
                    let nil = self.process.make_nil();
                    self.bind_var(env, s, nil);
                }
            }
        }

        let remaining = &args[i..];
        if let Some(rest_sym) = ll.rest {
            let rest_list = self.process.make_list(remaining);
            self.bind_var(env, rest_sym, rest_list);
        }

        if !ll.keys.is_empty() {
            if remaining.len() % 2 != 0 {
                return Err(
                    LispError::Program("odd number of keyword arguments".to_string()).into(),
                );
            }
            for key in &ll.keys {
                let mut found = None;
                let mut j = 0;
                while j + 1 < remaining.len() {
                    if self.process.as_symbol(remaining[j]) == Some(key.keyword) {
                        found = Some(remaining[j + 1]);
                        break;
                    }
                    j += 2;
                }
                match found {
                    Some(val) => {
                        self.bind_var(env, key.var, val);
                        if let Some(s) = key.supplied {
                            let t = self.process.make_bool(true, self.globals.t_sym);
                            self.bind_var(env, s, t);
                        }
                    }
                    None => {
                        let val = match key.init {
                            Some(init) => {
                                let v = self.eval(init, env)?;
                                self.process.clear_values();
                                v
                            }
                            None => self.process.make_nil(),
                        };
                        self.bind_var(env, key.var, val);
                        if let Some(s) = key.supplied {
                            let nil = self.process.make_nil();
                            self.bind_var(env, s, nil);
                        }
                    }
                }
            }
            if !ll.allow_other_keys {
                let mut j = 0;
                while j < remaining.len() {
                    match self.process.as_symbol(remaining[j]) {
                        Some(kw) if ll.keys.iter().any(|k| k.keyword == kw) => {}
                        _ => {
                            return Err(LispError::Program(
                                "unknown keyword argument".to_string(),
                            )
                            .into())
                        }
                    }
                    j += 2;
                }
            }
        } else if ll.rest.is_none() && i < args.len() {
            return Err(LispError::WrongNumberOfArguments {
                name,
                got: args.len(),
            }
            .into());
        }

        for &(var, init) in &ll.aux {
            let val = match init {
                Some(init) => {
                    let v = self.eval(init, env)?;
                    self.process.clear_values();
                    v
                }
                None => self.process.make_nil(),
            };
            self.bind_var(env, var, val);
        }

        Ok(())
    }

    /// Lexical bind, or dynamic rebind when the variable is special.
    fn bind_var(&mut self, env: &Environment, sym: SymbolId, val: NodeId) {
        if self.symbol_is_special(sym, env) {
            self.process.bind_special(sym, Some(val));
        } else {
            env.bind(sym, val);
        }
    }

    // ------------------------------------------------------------------
    // Macro expansion
    // ------------------------------------------------------------------

    /// One-step expansion; the bool reports whether anything expanded.
    pub fn macroexpand_1(&mut self, form: NodeId) -> Result<(NodeId, bool), ControlSignal> {
        if let Some((op, args)) = self.process.as_cons(form) {
            if let Some(sym) = self.process.as_symbol(op) {
                if let Some(&idx) = self.process.macros.get(&sym) {
                    let closure = match self.process.closures.get(idx) {
                        Some(c) => c.clone(),
                        None => {
                            return Err(
                                LispError::General("invalid macro closure".to_string()).into()
                            )
                        }
                    };
                    let arg_forms = self.process.list_to_vec(args)?;
                    let expansion = self.apply_closure(&closure, &arg_forms)?;
                    return Ok((expansion, true));
                }
            }
        }
        Ok((form, false))
    }

    /// Expansion to fixpoint.
    pub fn macroexpand(&mut self, form: NodeId) -> Result<(NodeId, bool), ControlSignal> {
        let mut current = form;
        let mut expanded_any = false;
        loop {
            let (next, expanded) = self.macroexpand_1(current)?;
            if !expanded {
                return Ok((current, expanded_any));
            }
            current = next;
            expanded_any = true;
        }
    }

    // ------------------------------------------------------------------
    // Body and sequence helpers
    // ------------------------------------------------------------------

    /// Implicit progn: non-final forms always clear the values slot; the
    /// final form's values become the sequence's values.
    pub fn eval_body(&mut self, forms: &[NodeId], env: &Environment) -> EvalResult {
        match forms.split_last() {
            None => {
                self.process.clear_values();
                Ok(self.process.make_nil())
            }
            Some((last, init)) => {
                for &form in init {
                    self.eval(form, env)?;
                    self.process.clear_values();
                }
                self.eval(*last, env)
            }
        }
    }

    fn eval_progn_list(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let forms = self.process.list_to_vec(args)?;
        self.eval_body(&forms, env)
    }

    /// Strip leading DECLARE forms from a body, collecting SPECIAL
    /// declarations.
    fn parse_body(&self, forms: &[NodeId]) -> Result<(Vec<SymbolId>, Vec<NodeId>), ControlSignal> {
        let sf = &self.globals.special_forms;
        let mut specials = Vec::new();
        let mut start = 0;
        for &form in forms {
            let is_declare = self
                .process
                .as_cons(form)
                .and_then(|(op, _)| self.process.as_symbol(op))
                == Some(sf.declare);
            if !is_declare {
                break;
            }
            let (_, clauses) = self.process.as_cons(form).unwrap();
            for clause in self.process.list_to_vec(clauses)? {
                if let Some((head, rest)) = self.process.as_cons(clause) {
                    if self.process.as_symbol(head) == Some(sf.special) {
                        for var in self.process.list_to_vec(rest)? {
                            match self.process.as_symbol(var) {
                                Some(sym) => specials.push(sym),
                                None => {
                                    return Err(LispError::Program(
                                        "SPECIAL declaration of a non-symbol".to_string(),
                                    )
                                    .into())
                                }
                            }
                        }
                    }
                    // other declarations are advisory; ignored
                }
            }
            start += 1;
        }
        Ok((specials, forms[start..].to_vec()))
    }

    // ------------------------------------------------------------------
    // Core special forms
    // ------------------------------------------------------------------

    fn eval_quote(&mut self, args: NodeId) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.len() != 1 {
            return Err(LispError::Program("QUOTE takes exactly one form".to_string()).into());
        }
        Ok(items[0])
    }

    fn eval_if(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.len() < 2 || items.len() > 3 {
            return Err(
                LispError::Program("IF syntax is (if test then [else])".to_string()).into(),
            );
        }
        let test = self.eval(items[0], env)?;
        self.process.clear_values();
        if !self.process.is_nil(test) {
            self.eval(items[1], env)
        } else if items.len() == 3 {
            self.eval(items[2], env)
        } else {
            Ok(self.process.make_nil())
        }
    }

    fn eval_setq(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.len() % 2 != 0 {
            return Err(LispError::Program("odd number of SETQ forms".to_string()).into());
        }
        let mut result = self.process.make_nil();
        for pair in items.chunks(2) {
            let sym = match self.process.as_symbol(pair[0]) {
                Some(s) => s,
                None => return Err(LispError::wrong_type(pair[0], TypeSpec::Symbol).into()),
            };
            let val = self.eval(pair[1], env)?;
            self.process.clear_values();
            if self.symbol_is_special(sym, env) {
                self.process.set_special(sym, val);
            } else if !env.set(sym, val) {
                self.process.set_value(sym, val);
            }
            result = val;
        }
        Ok(result)
    }

    fn eval_let(&mut self, args: NodeId, env: &Environment, sequential: bool) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.is_empty() {
            return Err(LispError::Program("LET requires a binding list".to_string()).into());
        }
        let binding_forms = self.process.list_to_vec(items[0])?;
        let (specials, body) = self.parse_body(&items[1..])?;

        let new_env = Environment::with_parent(env.clone());
        for &s in &specials {
            new_env.declare_special(s);
        }

        let mark = self.process.mark_special_bindings();
        let result = (|| {
            if sequential {
                // LET*: each init sees the previous bindings
                for &binding in &binding_forms {
                    let (sym, init) = self.parse_binding(binding)?;
                    let val = match init {
                        Some(form) => {
                            let v = self.eval(form, &new_env)?;
                            self.process.clear_values();
                            v
                        }
                        None => self.process.make_nil(),
                    };
                    self.bind_var(&new_env, sym, val);
                }
            } else {
                // LET: inits evaluate in the outer environment
                let mut pairs = Vec::with_capacity(binding_forms.len());
                for &binding in &binding_forms {
                    let (sym, init) = self.parse_binding(binding)?;
                    let val = match init {
                        Some(form) => {
                            let v = self.eval(form, env)?;
                            self.process.clear_values();
                            v
                        }
                        None => self.process.make_nil(),
                    };
                    pairs.push((sym, val));
                }
                for (sym, val) in pairs {
                    self.bind_var(&new_env, sym, val);
                }
            }
            self.eval_body(&body, &new_env)
        })();
        self.process.reset_special_bindings(mark);
        result
    }

    /// A LET binding: symbol, (symbol), or (symbol init).
    fn parse_binding(&self, binding: NodeId) -> Result<(SymbolId, Option<NodeId>), ControlSignal> {
        if let Some(sym) = self.process.as_symbol(binding) {
            return Ok((sym, None));
        }
        let parts = self.process.list_to_vec(binding)?;
        match parts.len() {
            1 | 2 => match self.process.as_symbol(parts[0]) {
                Some(sym) => Ok((sym, parts.get(1).copied())),
                None => Err(LispError::wrong_type(parts[0], TypeSpec::Symbol).into()),
            },
            _ => Err(LispError::Program("malformed LET binding".to_string()).into()),
        }
    }

    fn eval_lambda(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.is_empty() {
            return Err(LispError::Program("LAMBDA requires a lambda list".to_string()).into());
        }
        self.make_closure(None, items[0], &items[1..], env)
    }

    fn make_closure(
        &mut self,
        name: Option<SymbolId>,
        params: NodeId,
        body_forms: &[NodeId],
        env: &Environment,
    ) -> EvalResult {
        let lambda_list = self.parse_lambda_list(params)?;
        let (specials, body) = self.parse_body(body_forms)?;
        let closure = Closure {
            name,
            lambda_list,
            body,
            specials,
            env: env.clone(),
        };
        let idx = self.process.closures.len();
        self.process.closures.push(closure);
        Ok(self.process.heap.alloc(Object::Closure(idx as u32)))
    }

    fn eval_function(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.len() != 1 {
            return Err(LispError::Program("FUNCTION takes exactly one name".to_string()).into());
        }
        let designator = items[0];

        // #'(lambda ...) names the closure itself
        if let Some((head, _)) = self.process.as_cons(designator) {
            if self.process.as_symbol(head) == Some(self.globals.special_forms.lambda) {
                return self.eval(designator, env);
            }
            return Err(LispError::wrong_type(designator, TypeSpec::Function).into());
        }

        match self.process.as_symbol(designator) {
            Some(sym) => self.resolve_function(sym),
            None => Err(LispError::wrong_type(designator, TypeSpec::Function).into()),
        }
    }

    fn eval_defun(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.len() < 2 {
            return Err(
                LispError::Program("DEFUN syntax is (defun name (params) body...)".to_string())
                    .into(),
            );
        }
        let name = match self.process.as_symbol(items[0]) {
            Some(s) => s,
            None => return Err(LispError::wrong_type(items[0], TypeSpec::Symbol).into()),
        };
        if self.globals.special_forms.is_special_operator(name) {
            return Err(LispError::Program(format!(
                "cannot redefine special operator {}",
                self.globals.symbol_name(name)
            ))
            .into());
        }
        let func = self.make_closure(Some(name), items[1], &items[2..], env)?;
        self.process.set_function(name, func);
        Ok(items[0])
    }

    fn eval_defmacro(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.len() < 2 {
            return Err(LispError::Program(
                "DEFMACRO syntax is (defmacro name (params) body...)".to_string(),
            )
            .into());
        }
        let name = match self.process.as_symbol(items[0]) {
            Some(s) => s,
            None => return Err(LispError::wrong_type(items[0], TypeSpec::Symbol).into()),
        };
        if self.globals.special_forms.is_special_operator(name) {
            return Err(LispError::Program(format!(
                "cannot redefine special operator {}",
                self.globals.symbol_name(name)
            ))
            .into());
        }
        let func = self.make_closure(Some(name), items[1], &items[2..], env)?;
        let idx = match self.process.heap.get_unchecked(func) {
            Object::Closure(idx) => *idx as usize,
            _ => unreachable!("make_closure returns a closure node"),
        };
        self.process.macros.insert(name, idx);
        Ok(items[0])
    }

    fn eval_defvar(&mut self, args: NodeId, env: &Environment, always_set: bool) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.is_empty() || items.len() > 2 {
            return Err(LispError::Program("DEFVAR syntax is (defvar name [init])".to_string())
                .into());
        }
        let sym = match self.process.as_symbol(items[0]) {
            Some(s) => s,
            None => return Err(LispError::wrong_type(items[0], TypeSpec::Symbol).into()),
        };
        self.globals.symbols.write().unwrap().proclaim_special(sym);
        if let Some(&init) = items.get(1) {
            if always_set || self.process.get_value(sym).is_none() {
                let val = self.eval(init, env)?;
                self.process.clear_values();
                self.process.set_value(sym, val);
            }
        }
        Ok(items[0])
    }

    fn eval_and(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        match items.split_last() {
            None => {
                let t = self.process.make_bool(true, self.globals.t_sym);
                Ok(t)
            }
            Some((last, init)) => {
                for &form in init {
                    let val = self.eval(form, env)?;
                    self.process.clear_values();
                    if self.process.is_nil(val) {
                        return Ok(val);
                    }
                }
                self.eval(*last, env)
            }
        }
    }

    fn eval_or(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        match items.split_last() {
            None => Ok(self.process.make_nil()),
            Some((last, init)) => {
                for &form in init {
                    let val = self.eval(form, env)?;
                    self.process.clear_values();
                    if !self.process.is_nil(val) {
                        return Ok(val);
                    }
                }
                self.eval(*last, env)
            }
        }
    }

    fn eval_when_unless(&mut self, args: NodeId, env: &Environment, when: bool) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.is_empty() {
            return Err(LispError::Program("missing test form".to_string()).into());
        }
        let test = self.eval(items[0], env)?;
        self.process.clear_values();
        if self.process.is_nil(test) != when {
            self.eval_body(&items[1..], env)
        } else {
            Ok(self.process.make_nil())
        }
    }

    // ------------------------------------------------------------------
    // Nonlocal exits
    // ------------------------------------------------------------------

    /// (block name body*): establishes a fresh block token; absorbs only
    /// RETURN-FROM signals carrying that token.
    fn eval_block(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.is_empty() {
            return Err(LispError::Program("BLOCK requires a name".to_string()).into());
        }
        let name = match self.process.as_symbol(items[0]) {
            Some(s) => s,
            None => return Err(LispError::wrong_type(items[0], TypeSpec::Symbol).into()),
        };
        let block_id = self.process.next_block_id();
        let benv = env.child_with_block(name, block_id);
        match self.eval_body(&items[1..], &benv) {
            Err(ControlSignal::ReturnFrom { block, value }) if block == block_id => Ok(value),
            other => other,
        }
    }

    /// (return-from name [value]): resolving the block is a control error
    /// before any unwind happens.
    fn eval_return_from(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.is_empty() || items.len() > 2 {
            return Err(LispError::Program(
                "RETURN-FROM syntax is (return-from name [value])".to_string(),
            )
            .into());
        }
        let name = match self.process.as_symbol(items[0]) {
            Some(s) => s,
            None => return Err(LispError::wrong_type(items[0], TypeSpec::Symbol).into()),
        };
        let block = match env.lookup_block(name) {
            Some(id) => id,
            None => {
                return Err(LispError::Control(format!(
                    "no block named {} is visible",
                    self.globals.symbol_name(name)
                ))
                .into())
            }
        };
        let value = match items.get(1) {
            Some(&form) => self.eval(form, env)?,
            None => {
                self.process.clear_values();
                self.process.make_nil()
            }
        };
        Err(ControlSignal::ReturnFrom { block, value })
    }

    fn tag_of(&self, node: NodeId) -> Option<TagKey> {
        match self.process.heap.get_unchecked(node) {
            Object::Symbol(sym) => Some(TagKey::Sym(*sym)),
            Object::Fixnum(n) => Some(TagKey::Int(*n)),
            _ => None,
        }
    }

    /// (tagbody {tag | statement}*): tags are the non-cons elements; GO
    /// signals carrying this tagbody's token resume at the indexed point.
    fn eval_tagbody(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;

        let mut tags = Vec::new();
        let mut tag_index: fastmap::HashMap<TagKey, usize> = fastmap::HashMap::default();
        for (i, &item) in items.iter().enumerate() {
            if let Some(tag) = self.tag_of(item) {
                tag_index.entry(tag.clone()).or_insert(i);
                tags.push(tag);
            }
        }

        let tb_id = self.process.next_tagbody_id();
        let tenv = env.child_with_tagbody(tb_id, tags);

        let mut pc = 0;
        while pc < items.len() {
            let item = items[pc];
            if self.tag_of(item).is_some() {
                pc += 1;
                continue;
            }
            match self.eval(item, &tenv) {
                Ok(_) => {
                    self.process.clear_values();
                    pc += 1;
                }
                Err(ControlSignal::Go { tagbody, tag }) if tagbody == tb_id => {
                    pc = tag_index[&tag];
                }
                Err(e) => return Err(e),
            }
        }

        self.process.clear_values();
        Ok(self.process.make_nil())
    }

    /// (go tag): an unknown or out-of-scope tag is a control error raised
    /// before any unwind signal is thrown.
    fn eval_go(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.len() != 1 {
            return Err(LispError::Program("GO takes exactly one tag".to_string()).into());
        }
        let tag = match self.tag_of(items[0]) {
            Some(t) => t,
            None => {
                return Err(
                    LispError::Program("GO tag must be a symbol or integer".to_string()).into(),
                )
            }
        };
        match env.lookup_tag(&tag) {
            Some(tagbody) => Err(ControlSignal::Go { tagbody, tag }),
            None => Err(LispError::Control("no visible tag for GO".to_string()).into()),
        }
    }

    /// (catch tag-form body*): the tag is evaluated once and compared by
    /// EQ; the registration is popped on every exit path.
    fn eval_catch(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.is_empty() {
            return Err(LispError::Program("CATCH requires a tag form".to_string()).into());
        }
        let tag = self.eval(items[0], env)?;
        self.process.clear_values();

        self.process.catch_stack.push(tag);
        let result = self.eval_body(&items[1..], env);
        self.process.catch_stack.pop();

        match result {
            Err(ControlSignal::Throw { tag: thrown, value }) if self.process.eq(thrown, tag) => {
                Ok(value)
            }
            other => other,
        }
    }

    /// (throw tag-form result-form): both evaluate first; a throw with no
    /// matching catch is a control error raised in place.
    fn eval_throw(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.len() != 2 {
            return Err(
                LispError::Program("THROW syntax is (throw tag result)".to_string()).into(),
            );
        }
        let tag = self.eval(items[0], env)?;
        self.process.clear_values();
        let value = self.eval(items[1], env)?;
        if !self.process.catch_tag_active(tag) {
            return Err(LispError::Control("no catch for tag in THROW".to_string()).into());
        }
        Err(ControlSignal::Throw { tag, value })
    }

    /// (unwind-protect protected cleanup*): cleanups run on every exit
    /// path; the protected form's values survive them.
    fn eval_unwind_protect(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.is_empty() {
            return Err(LispError::Program("UNWIND-PROTECT requires a form".to_string()).into());
        }
        let result = self.eval(items[0], env);
        let saved_values = self.process.values.take();

        for &form in &items[1..] {
            match self.eval(form, env) {
                Ok(_) => self.process.clear_values(),
                // A nonlocal exit out of a cleanup supersedes the original
                Err(e) => return Err(e),
            }
        }

        self.process.values = saved_values;
        result
    }

    // ------------------------------------------------------------------
    // Multiple values
    // ------------------------------------------------------------------

    fn eval_multiple_value_bind(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.len() < 2 {
            return Err(LispError::Program(
                "MULTIPLE-VALUE-BIND syntax is (multiple-value-bind (vars) form body...)"
                    .to_string(),
            )
            .into());
        }
        let mut vars = Vec::new();
        for var in self.process.list_to_vec(items[0])? {
            match self.process.as_symbol(var) {
                Some(sym) => vars.push(sym),
                None => return Err(LispError::wrong_type(var, TypeSpec::Symbol).into()),
            }
        }

        let primary = self.eval(items[1], env)?;
        let vals = self.process.take_values(primary);

        let (specials, body) = self.parse_body(&items[2..])?;
        let new_env = Environment::with_parent(env.clone());
        for &s in &specials {
            new_env.declare_special(s);
        }

        let mark = self.process.mark_special_bindings();
        for (i, &var) in vars.iter().enumerate() {
            let val = vals.get(i).copied().unwrap_or_else(|| self.process.make_nil());
            self.bind_var(&new_env, var, val);
        }
        let result = self.eval_body(&body, &new_env);
        self.process.reset_special_bindings(mark);
        result
    }

    fn eval_multiple_value_call(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.is_empty() {
            return Err(LispError::Program(
                "MULTIPLE-VALUE-CALL requires a function form".to_string(),
            )
            .into());
        }
        let func = self.eval(items[0], env)?;
        self.process.clear_values();

        let mut all: SmallVec<[NodeId; 8]> = SmallVec::new();
        for &form in &items[1..] {
            let primary = self.eval(form, env)?;
            all.extend(self.process.take_values(primary));
        }
        self.apply(func, &all)
    }

    fn eval_multiple_value_list(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.len() != 1 {
            return Err(LispError::Program(
                "MULTIPLE-VALUE-LIST takes exactly one form".to_string(),
            )
            .into());
        }
        let primary = self.eval(items[0], env)?;
        let vals = self.process.take_values(primary);
        Ok(self.process.make_list(&vals))
    }

    fn eval_multiple_value_prog1(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.is_empty() {
            return Err(LispError::Program(
                "MULTIPLE-VALUE-PROG1 requires a form".to_string(),
            )
            .into());
        }
        let primary = self.eval(items[0], env)?;
        let saved = self.process.values.take();
        for &form in &items[1..] {
            self.eval(form, env)?;
            self.process.clear_values();
        }
        self.process.values = saved;
        Ok(primary)
    }

    fn eval_nth_value(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.len() != 2 {
            return Err(
                LispError::Program("NTH-VALUE syntax is (nth-value n form)".to_string()).into(),
            );
        }
        let n_node = self.eval(items[0], env)?;
        self.process.clear_values();
        let n = match self.process.heap.get_unchecked(n_node) {
            Object::Fixnum(n) if *n >= 0 => *n as usize,
            _ => return Err(LispError::wrong_type(n_node, TypeSpec::Integer).into()),
        };
        let primary = self.eval(items[1], env)?;
        let vals = self.process.take_values(primary);
        Ok(vals.get(n).copied().unwrap_or_else(|| self.process.make_nil()))
    }

    /// (progv symbols values body*): runtime-computed special bindings;
    /// symbols beyond the value list are bound with no value.
    fn eval_progv(&mut self, args: NodeId, env: &Environment) -> EvalResult {
        let items = self.process.list_to_vec(args)?;
        if items.len() < 2 {
            return Err(LispError::Program(
                "PROGV syntax is (progv symbols values body...)".to_string(),
            )
            .into());
        }
        let syms_node = self.eval(items[0], env)?;
        self.process.clear_values();
        let vals_node = self.eval(items[1], env)?;
        self.process.clear_values();

        let mut syms = Vec::new();
        for node in self.process.list_to_vec(syms_node)? {
            match self.process.as_symbol(node) {
                Some(sym) => syms.push(sym),
                None => return Err(LispError::wrong_type(node, TypeSpec::Symbol).into()),
            }
        }
        let vals = self.process.list_to_vec(vals_node)?;

        let mark = self.process.mark_special_bindings();
        for (i, &sym) in syms.iter().enumerate() {
            self.process.bind_special(sym, vals.get(i).copied());
        }
        let result = self.eval_body(&items[2..], env);
        self.process.reset_special_bindings(mark);
        result
    }

    // ------------------------------------------------------------------
    // Lambda list parsing
    // ------------------------------------------------------------------

    fn parse_lambda_list(&mut self, list: NodeId) -> Result<LambdaList, ControlSignal> {
        let sf = &self.globals.special_forms;
        let items = self.process.list_to_vec(list)?;
        let mut parsed = LambdaList::default();
        let mut mode = LambdaListMode::Req;

        for &item in &items {
            if let Some(sym) = self.process.as_symbol(item) {
                if sym == sf.amp_optional {
                    mode = LambdaListMode::Opt;
                    continue;
                }
                if sym == sf.amp_rest {
                    mode = LambdaListMode::Rest;
                    continue;
                }
                if sym == sf.amp_key {
                    mode = LambdaListMode::Key;
                    continue;
                }
                if sym == sf.amp_aux {
                    mode = LambdaListMode::Aux;
                    continue;
                }
                if sym == sf.amp_allow_other_keys {
                    if !matches!(mode, LambdaListMode::Key) {
                        return Err(LispError::Program(
                            "&ALLOW-OTHER-KEYS must follow &KEY".to_string(),
                        )
                        .into());
                    }
                    parsed.allow_other_keys = true;
                    continue;
                }
            }

            match mode {
                LambdaListMode::Req => match self.process.as_symbol(item) {
                    Some(sym) => parsed.required.push(sym),
                    None => {
                        return Err(LispError::Program(
                            "required parameter must be a symbol".to_string(),
                        )
                        .into())
                    }
                },
                LambdaListMode::Opt => {
                    let (var, init, supplied) = self.parse_param(item)?;
                    parsed.optional.push(OptionalParam {
                        var,
                        init,
                        supplied,
                    });
                }
                LambdaListMode::Rest => match self.process.as_symbol(item) {
                    Some(sym) => {
                        if parsed.rest.is_some() {
                            return Err(LispError::Program(
                                "more than one &REST parameter".to_string(),
                            )
                            .into());
                        }
                        parsed.rest = Some(sym);
                    }
                    None => {
                        return Err(
                            LispError::Program("&REST parameter must be a symbol".to_string())
                                .into(),
                        )
                    }
                },
                LambdaListMode::Key => {
                    let (var, init, supplied) = self.parse_param(item)?;
                    let keyword = {
                        let mut symbols = self.globals.symbols.write().unwrap();
                        let name = symbols.symbol_name(var).unwrap_or("").to_string();
                        symbols.intern_keyword(&name)
                    };
                    parsed.keys.push(KeyParam {
                        keyword,
                        var,
                        init,
                        supplied,
                    });
                }
                LambdaListMode::Aux => {
                    let (var, init, _) = self.parse_param(item)?;
                    parsed.aux.push((var, init));
                }
            }
        }

        Ok(parsed)
    }

    /// `var`, `(var)`, `(var init)` or `(var init supplied-p)`.
    fn parse_param(
        &self,
        item: NodeId,
    ) -> Result<(SymbolId, Option<NodeId>, Option<SymbolId>), ControlSignal> {
        if let Some(sym) = self.process.as_symbol(item) {
            return Ok((sym, None, None));
        }
        let parts = self.process.list_to_vec(item)?;
        if parts.is_empty() || parts.len() > 3 {
            return Err(LispError::Program("malformed parameter".to_string()).into());
        }
        let var = match self.process.as_symbol(parts[0]) {
            Some(sym) => sym,
            None => return Err(LispError::wrong_type(parts[0], TypeSpec::Symbol).into()),
        };
        let supplied = match parts.get(2) {
            Some(&node) => match self.process.as_symbol(node) {
                Some(sym) => Some(sym),
                None => return Err(LispError::wrong_type(node, TypeSpec::Symbol).into()),
            },
            None => None,
        };
        Ok((var, parts.get(1).copied(), supplied))
    }
}
