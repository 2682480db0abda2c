// EmberCL Process - Per-Context Evaluation State
//
// Everything the spec calls "thread-local" lives here explicitly and is
// threaded by &mut through the evaluator: the heap, the symbol dictionary
// (value/function/plist slots), the dynamic-binding shadow stack, the
// multiple-values slot and the catch-tag stack. One Process per host thread;
// the GlobalContext is the only shared piece.

use num_bigint::BigInt;

use crate::arrays::ArrayStore;
use crate::chars;
use crate::conditions::LispError;
use crate::fastmap;
use crate::heap::Heap;
use crate::numbers::Number;
use crate::streams::{StreamId, StreamManager};
use crate::symbol::SymbolId;
use crate::types::{NodeId, Object, TypeSpec};

/// Identity token of a live BLOCK entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u64);

/// Identity token of a live TAGBODY entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagbodyId(pub u64);

/// Symbol slots (per-context). `None` is "unbound": distinct from a slot
/// holding NIL.
#[derive(Debug, Clone, Default)]
pub struct SymbolBindings {
    pub value: Option<NodeId>,
    pub function: Option<NodeId>,
    pub plist: Option<NodeId>,
}

/// One entry on the dynamic-binding shadow stack. `value: None` is a
/// PROGV-style binding with no value: the symbol is rebound but unbound.
#[derive(Debug, Clone)]
pub struct SpecialBinding {
    pub symbol: SymbolId,
    pub value: Option<NodeId>,
}

pub struct Process {
    pub heap: Heap,
    /// Global (unshadowed) symbol slots
    pub dictionary: fastmap::HashMap<SymbolId, SymbolBindings>,
    /// Dynamic rebindings, innermost last; delimited by mark/reset
    special_stack: Vec<SpecialBinding>,
    /// Secondary values of the last form. None means "exactly one value".
    pub values: Option<Vec<NodeId>>,
    /// Tags of lexically active CATCH frames (EQ-compared)
    pub catch_stack: Vec<NodeId>,

    pub closures: Vec<crate::eval::Closure>,
    /// Macro functions: name -> closure index
    pub macros: fastmap::HashMap<SymbolId, usize>,

    pub arrays: ArrayStore,
    pub streams: StreamManager,

    pub eval_depth: usize,
    pub max_eval_depth: usize,

    next_block_id: u64,
    next_tagbody_id: u64,
    pub gensym_counter: u64,
}

impl Process {
    pub fn new() -> Self {
        Self {
            heap: Heap::new(),
            dictionary: fastmap::HashMap::default(),
            special_stack: Vec::new(),
            values: None,
            catch_stack: Vec::new(),
            closures: Vec::new(),
            macros: fastmap::HashMap::default(),
            arrays: ArrayStore::new(),
            streams: StreamManager::new(),
            eval_depth: 0,
            max_eval_depth: 10_000,
            next_block_id: 0,
            next_tagbody_id: 0,
            gensym_counter: 0,
        }
    }

    // ------------------------------------------------------------------
    // Node constructors
    // ------------------------------------------------------------------

    pub fn make_nil(&self) -> NodeId {
        self.heap.nil()
    }

    pub fn make_symbol_node(&mut self, sym: SymbolId) -> NodeId {
        self.heap.alloc(Object::Symbol(sym))
    }

    pub fn make_fixnum(&mut self, n: i64) -> NodeId {
        self.heap.make_fixnum(n)
    }

    pub fn make_integer(&mut self, n: BigInt) -> NodeId {
        self.heap.make_integer(n)
    }

    pub fn make_single_float(&mut self, f: f32) -> NodeId {
        self.heap.make_single_float(f)
    }

    pub fn make_double_float(&mut self, f: f64) -> NodeId {
        self.heap.make_double_float(f)
    }

    pub fn make_char(&mut self, c: char) -> NodeId {
        self.heap.alloc(Object::Character(c))
    }

    pub fn make_string(&mut self, s: &str) -> NodeId {
        self.heap.alloc(Object::Str(s.to_string()))
    }

    pub fn make_stream(&mut self, id: StreamId) -> NodeId {
        self.heap.alloc(Object::Stream(id))
    }

    pub fn make_cons(&mut self, car: NodeId, cdr: NodeId) -> NodeId {
        self.heap.alloc(Object::Cons(car, cdr))
    }

    pub fn make_list(&mut self, elements: &[NodeId]) -> NodeId {
        let mut result = self.make_nil();
        for &elem in elements.iter().rev() {
            result = self.make_cons(elem, result);
        }
        result
    }

    /// T or NIL from a Rust bool; T is the given symbol.
    pub fn make_bool(&mut self, b: bool, t_sym: SymbolId) -> NodeId {
        if b {
            self.make_symbol_node(t_sym)
        } else {
            self.make_nil()
        }
    }

    pub fn lower_number(&mut self, n: Number) -> NodeId {
        n.lower(&mut self.heap)
    }

    // ------------------------------------------------------------------
    // Structure accessors
    // ------------------------------------------------------------------

    pub fn is_nil(&self, node: NodeId) -> bool {
        matches!(self.heap.get_unchecked(node), Object::Nil)
    }

    pub fn car(&self, node: NodeId) -> Result<NodeId, LispError> {
        match self.heap.get_unchecked(node) {
            Object::Nil => Ok(self.heap.nil()),
            Object::Cons(car, _) => Ok(*car),
            _ => Err(LispError::wrong_type(node, TypeSpec::List)),
        }
    }

    pub fn cdr(&self, node: NodeId) -> Result<NodeId, LispError> {
        match self.heap.get_unchecked(node) {
            Object::Nil => Ok(self.heap.nil()),
            Object::Cons(_, cdr) => Ok(*cdr),
            _ => Err(LispError::wrong_type(node, TypeSpec::List)),
        }
    }

    pub fn as_cons(&self, node: NodeId) -> Option<(NodeId, NodeId)> {
        match self.heap.get_unchecked(node) {
            Object::Cons(car, cdr) => Some((*car, *cdr)),
            _ => None,
        }
    }

    pub fn as_symbol(&self, node: NodeId) -> Option<SymbolId> {
        match self.heap.get_unchecked(node) {
            Object::Symbol(sym) => Some(*sym),
            _ => None,
        }
    }

    /// Flatten a proper list; a dotted tail is a wrong-type error.
    pub fn list_to_vec(&self, list: NodeId) -> Result<Vec<NodeId>, LispError> {
        let mut v = Vec::new();
        let mut current = list;
        loop {
            match self.heap.get_unchecked(current) {
                Object::Nil => return Ok(v),
                Object::Cons(car, cdr) => {
                    v.push(*car);
                    current = *cdr;
                }
                _ => return Err(LispError::wrong_type(list, TypeSpec::List)),
            }
        }
    }

    // ------------------------------------------------------------------
    // Symbol slots
    // ------------------------------------------------------------------

    pub fn get_value(&self, sym: SymbolId) -> Option<NodeId> {
        self.dictionary.get(&sym).and_then(|b| b.value)
    }

    pub fn set_value(&mut self, sym: SymbolId, val: NodeId) {
        self.dictionary.entry(sym).or_default().value = Some(val);
    }

    pub fn unset_value(&mut self, sym: SymbolId) {
        if let Some(b) = self.dictionary.get_mut(&sym) {
            b.value = None;
        }
    }

    pub fn get_function(&self, sym: SymbolId) -> Option<NodeId> {
        self.dictionary.get(&sym).and_then(|b| b.function)
    }

    pub fn set_function(&mut self, sym: SymbolId, func: NodeId) {
        self.dictionary.entry(sym).or_default().function = Some(func);
    }

    pub fn unset_function(&mut self, sym: SymbolId) {
        if let Some(b) = self.dictionary.get_mut(&sym) {
            b.function = None;
        }
    }

    pub fn get_plist(&self, sym: SymbolId) -> Option<NodeId> {
        self.dictionary.get(&sym).and_then(|b| b.plist)
    }

    pub fn set_plist(&mut self, sym: SymbolId, plist: NodeId) {
        self.dictionary.entry(sym).or_default().plist = Some(plist);
    }

    // ------------------------------------------------------------------
    // Dynamic (special) bindings
    // ------------------------------------------------------------------

    pub fn bind_special(&mut self, symbol: SymbolId, value: Option<NodeId>) {
        self.special_stack.push(SpecialBinding { symbol, value });
    }

    /// Delimit dynamic extent: every binding form takes a mark before
    /// binding and resets to it on every exit path.
    pub fn mark_special_bindings(&self) -> usize {
        self.special_stack.len()
    }

    pub fn reset_special_bindings(&mut self, mark: usize) {
        self.special_stack.truncate(mark);
    }

    fn special_entry(&self, symbol: SymbolId) -> Option<&SpecialBinding> {
        self.special_stack
            .iter()
            .rev()
            .find(|b| b.symbol == symbol)
    }

    /// The shadowed state of a symbol: None = not shadowed at all,
    /// Some(None) = rebound but valueless, Some(Some(v)) = rebound to v.
    pub fn special_value(&self, symbol: SymbolId) -> Option<Option<NodeId>> {
        self.special_entry(symbol).map(|b| b.value)
    }

    /// Assign through the innermost shadow entry; falls back to the global
    /// slot when the symbol has no active dynamic rebinding.
    pub fn set_special(&mut self, symbol: SymbolId, value: NodeId) {
        if let Some(entry) = self
            .special_stack
            .iter_mut()
            .rev()
            .find(|b| b.symbol == symbol)
        {
            entry.value = Some(value);
        } else {
            self.set_value(symbol, value);
        }
    }

    /// MAKUNBOUND: the innermost dynamic rebinding loses its value; with no
    /// rebinding the global slot empties.
    pub fn makunbound(&mut self, symbol: SymbolId) {
        if let Some(entry) = self
            .special_stack
            .iter_mut()
            .rev()
            .find(|b| b.symbol == symbol)
        {
            entry.value = None;
        } else {
            self.unset_value(symbol);
        }
    }

    /// Current dynamic value: shadow stack first, then the global slot.
    pub fn symbol_value(&self, symbol: SymbolId) -> Option<NodeId> {
        match self.special_value(symbol) {
            Some(v) => v,
            None => self.get_value(symbol),
        }
    }

    /// BOUNDP: a valueless shadow entry hides any global value.
    pub fn symbol_boundp(&self, symbol: SymbolId) -> bool {
        match self.special_value(symbol) {
            Some(v) => v.is_some(),
            None => self.get_value(symbol).is_some(),
        }
    }

    // ------------------------------------------------------------------
    // Multiple values
    // ------------------------------------------------------------------

    pub fn clear_values(&mut self) {
        self.values = None;
    }

    pub fn set_values(&mut self, vals: Vec<NodeId>) {
        self.values = Some(vals);
    }

    /// All values of the last form given its primary value, consuming the
    /// slot.
    pub fn take_values(&mut self, primary: NodeId) -> Vec<NodeId> {
        match self.values.take() {
            Some(vals) => vals,
            None => vec![primary],
        }
    }

    // ------------------------------------------------------------------
    // Control-flow bookkeeping
    // ------------------------------------------------------------------

    pub fn next_block_id(&mut self) -> BlockId {
        self.next_block_id += 1;
        BlockId(self.next_block_id)
    }

    pub fn next_tagbody_id(&mut self) -> TagbodyId {
        self.next_tagbody_id += 1;
        TagbodyId(self.next_tagbody_id)
    }

    /// Whether some active CATCH registered this tag (EQ).
    pub fn catch_tag_active(&self, tag: NodeId) -> bool {
        self.catch_stack.iter().any(|&t| self.eq(t, tag))
    }

    // ------------------------------------------------------------------
    // Identity and equality ladder
    // ------------------------------------------------------------------

    /// EQ: handle identity, plus the immediates whose identity is their
    /// content (NIL, symbols).
    pub fn eq(&self, a: NodeId, b: NodeId) -> bool {
        if a == b {
            return true;
        }
        match (self.heap.get_unchecked(a), self.heap.get_unchecked(b)) {
            (Object::Nil, Object::Nil) => true,
            (Object::Symbol(x), Object::Symbol(y)) => x == y,
            _ => false,
        }
    }

    /// EQL: EQ plus same-type bitwise numeric and character equality. No
    /// tower coercion: (eql 1 1.0) is false, and 0.0/-0.0 differ by sign
    /// bit.
    pub fn eql(&self, a: NodeId, b: NodeId) -> bool {
        if self.eq(a, b) {
            return true;
        }
        match (self.heap.get_unchecked(a), self.heap.get_unchecked(b)) {
            (Object::Fixnum(x), Object::Fixnum(y)) => x == y,
            (Object::Bignum(x), Object::Bignum(y)) => x == y,
            (Object::Ratio(n1, d1), Object::Ratio(n2, d2)) => n1 == n2 && d1 == d2,
            (Object::SingleFloat(x), Object::SingleFloat(y)) => x.to_bits() == y.to_bits(),
            (Object::DoubleFloat(x), Object::DoubleFloat(y)) => x.to_bits() == y.to_bits(),
            (Object::Complex(r1, i1), Object::Complex(r2, i2)) => {
                self.eql(*r1, *r2) && self.eql(*i1, *i2)
            }
            (Object::Character(x), Object::Character(y)) => x == y,
            _ => false,
        }
    }

    /// EQUAL: EQL plus recursive structural comparison of conses and
    /// case-sensitive string comparison.
    pub fn equal(&self, a: NodeId, b: NodeId) -> bool {
        if self.eql(a, b) {
            return true;
        }
        match (self.heap.get_unchecked(a), self.heap.get_unchecked(b)) {
            (Object::Cons(a1, d1), Object::Cons(a2, d2)) => {
                self.equal(*a1, *a2) && self.equal(*d1, *d2)
            }
            (Object::Str(x), Object::Str(y)) => x == y,
            _ => false,
        }
    }

    /// EQUALP: EQUAL loosened with numeric-tower coercion and case folding
    /// for characters and strings; vectors compare elementwise.
    pub fn equalp(&self, a: NodeId, b: NodeId) -> bool {
        let oa = self.heap.get_unchecked(a);
        let ob = self.heap.get_unchecked(b);
        if oa.is_number() && ob.is_number() {
            match (
                Number::extract(&self.heap, a),
                Number::extract(&self.heap, b),
            ) {
                (Some(x), Some(y)) => return x.num_eq(&y),
                _ => return false,
            }
        }
        match (oa, ob) {
            (Object::Character(x), Object::Character(y)) => chars::char_equal_ci(*x, *y),
            (Object::Str(x), Object::Str(y)) => {
                x.len() == y.len()
                    && x.chars()
                        .zip(y.chars())
                        .all(|(cx, cy)| chars::char_equal_ci(cx, cy))
            }
            (Object::Cons(a1, d1), Object::Cons(a2, d2)) => {
                self.equalp(*a1, *a2) && self.equalp(*d1, *d2)
            }
            (Object::Vector(u), Object::Vector(v)) => {
                let lu = self.arrays.length(*u).unwrap_or(0);
                let lv = self.arrays.length(*v).unwrap_or(0);
                lu == lv
                    && (0..lu).all(|i| {
                        match (self.arrays.aref(*u, i), self.arrays.aref(*v, i)) {
                            (Ok(x), Ok(y)) => self.equalp(x, y),
                            _ => false,
                        }
                    })
            }
            _ => self.eq(a, b),
        }
    }
}

impl Default for Process {
    fn default() -> Self {
        Self::new()
    }
}
