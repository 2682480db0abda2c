// EmberCL Heap - Object Storage
//
// Slab storage for Objects with free-list reuse and canonical singletons.

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::types::{NodeId, Object};

enum Entry {
    Occupied(Object),
    Free { next: Option<u32> },
}

const FIXNUM_CACHE_LOW: i64 = -16;
const FIXNUM_CACHE_HIGH: i64 = 255;

/// Canonical nodes the constructors hand out instead of fresh allocations:
/// NIL, a small fixnum window, and 0/-0/1/-1 of each float width. Sharing
/// them makes identity (EQ) observable on those values, which the float
/// sharing policy requires.
struct Canon {
    nil: NodeId,
    fixnums: Vec<NodeId>,
    single_zero: NodeId,
    single_minus_zero: NodeId,
    single_one: NodeId,
    single_minus_one: NodeId,
    double_zero: NodeId,
    double_minus_zero: NodeId,
    double_one: NodeId,
    double_minus_one: NodeId,
}

pub struct Heap {
    nodes: Vec<Entry>,
    free_head: Option<u32>,
    canon: Canon,
}

impl Heap {
    pub fn new() -> Self {
        let mut nodes = Vec::with_capacity(1024);
        let mut push = |obj: Object| {
            let id = NodeId(nodes.len() as u32);
            nodes.push(Entry::Occupied(obj));
            id
        };

        let nil = push(Object::Nil);
        let mut fixnums = Vec::with_capacity((FIXNUM_CACHE_HIGH - FIXNUM_CACHE_LOW + 1) as usize);
        for n in FIXNUM_CACHE_LOW..=FIXNUM_CACHE_HIGH {
            fixnums.push(push(Object::Fixnum(n)));
        }
        let canon = Canon {
            nil,
            fixnums,
            single_zero: push(Object::SingleFloat(0.0)),
            single_minus_zero: push(Object::SingleFloat(-0.0)),
            single_one: push(Object::SingleFloat(1.0)),
            single_minus_one: push(Object::SingleFloat(-1.0)),
            double_zero: push(Object::DoubleFloat(0.0)),
            double_minus_zero: push(Object::DoubleFloat(-0.0)),
            double_one: push(Object::DoubleFloat(1.0)),
            double_minus_one: push(Object::DoubleFloat(-1.0)),
        };

        Self {
            nodes,
            free_head: None,
            canon,
        }
    }

    pub fn alloc(&mut self, obj: Object) -> NodeId {
        match self.free_head {
            Some(idx) => {
                let entry = &mut self.nodes[idx as usize];
                let next_free = match entry {
                    Entry::Free { next } => *next,
                    _ => panic!("Corrupt free list"),
                };
                self.free_head = next_free;
                *entry = Entry::Occupied(obj);
                NodeId(idx)
            }
            None => {
                let idx = self.nodes.len() as u32;
                self.nodes.push(Entry::Occupied(obj));
                NodeId(idx)
            }
        }
    }

    /// Replace a node in place. This is what RPLACA/RPLACD and vector slot
    /// mutation funnel through.
    pub fn overwrite(&mut self, id: NodeId, obj: Object) {
        let idx = id.0 as usize;
        if idx < self.nodes.len() {
            self.nodes[idx] = Entry::Occupied(obj);
        } else {
            panic!("Heap overwrite out of bounds");
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Object> {
        match self.nodes.get(id.0 as usize) {
            Some(Entry::Occupied(obj)) => Some(obj),
            _ => None,
        }
    }

    pub fn get_unchecked(&self, id: NodeId) -> &Object {
        match &self.nodes[id.0 as usize] {
            Entry::Occupied(obj) => obj,
            _ => panic!("Accessing freed node or out of bounds"),
        }
    }

    /// Return a node to the free list. The embedder owns reclamation policy;
    /// the core itself never calls this.
    pub fn release(&mut self, id: NodeId) {
        let idx = id.0 as usize;
        if idx < self.nodes.len() && matches!(self.nodes[idx], Entry::Occupied(_)) {
            self.nodes[idx] = Entry::Free {
                next: self.free_head,
            };
            self.free_head = Some(id.0);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // ------------------------------------------------------------------
    // Canonicalizing constructors
    // ------------------------------------------------------------------

    pub fn nil(&self) -> NodeId {
        self.canon.nil
    }

    pub fn make_fixnum(&mut self, n: i64) -> NodeId {
        if (FIXNUM_CACHE_LOW..=FIXNUM_CACHE_HIGH).contains(&n) {
            self.canon.fixnums[(n - FIXNUM_CACHE_LOW) as usize]
        } else {
            self.alloc(Object::Fixnum(n))
        }
    }

    /// Integer constructor that demotes to Fixnum when the value fits.
    pub fn make_integer(&mut self, n: BigInt) -> NodeId {
        match n.to_i64() {
            Some(v) => self.make_fixnum(v),
            None => self.alloc(Object::Bignum(n)),
        }
    }

    pub fn make_single_float(&mut self, f: f32) -> NodeId {
        match f.to_bits() {
            b if b == 0.0f32.to_bits() => self.canon.single_zero,
            b if b == (-0.0f32).to_bits() => self.canon.single_minus_zero,
            b if b == 1.0f32.to_bits() => self.canon.single_one,
            b if b == (-1.0f32).to_bits() => self.canon.single_minus_one,
            _ => self.alloc(Object::SingleFloat(f)),
        }
    }

    pub fn make_double_float(&mut self, f: f64) -> NodeId {
        match f.to_bits() {
            b if b == 0.0f64.to_bits() => self.canon.double_zero,
            b if b == (-0.0f64).to_bits() => self.canon.double_minus_zero,
            b if b == 1.0f64.to_bits() => self.canon.double_one,
            b if b == (-1.0f64).to_bits() => self.canon.double_minus_one,
            _ => self.alloc(Object::DoubleFloat(f)),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_is_canonical() {
        let heap = Heap::new();
        assert_eq!(heap.nil(), heap.nil());
        assert_eq!(heap.get_unchecked(heap.nil()), &Object::Nil);
    }

    #[test]
    fn test_float_singletons_shared() {
        let mut heap = Heap::new();
        let a = heap.make_double_float(0.0);
        let b = heap.make_double_float(0.0);
        assert_eq!(a, b);

        // -0.0 is a distinct canonical node
        let neg = heap.make_double_float(-0.0);
        assert_ne!(a, neg);

        let one = heap.make_single_float(1.0);
        assert_eq!(one, heap.make_single_float(1.0));
    }

    #[test]
    fn test_fixnum_window() {
        let mut heap = Heap::new();
        assert_eq!(heap.make_fixnum(0), heap.make_fixnum(0));
        assert_eq!(heap.make_fixnum(-16), heap.make_fixnum(-16));
        // Outside the window: fresh nodes
        assert_ne!(heap.make_fixnum(100_000), heap.make_fixnum(100_000));
    }

    #[test]
    fn test_release_reuses_slot() {
        let mut heap = Heap::new();
        let a = heap.alloc(Object::Fixnum(12345));
        heap.release(a);
        let b = heap.alloc(Object::Character('x'));
        assert_eq!(a, b);
        assert_eq!(heap.get_unchecked(b), &Object::Character('x'));
    }
}
