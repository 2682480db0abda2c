// EmberCL Arrays - Vector Storage
//
// Separate slab store so vector contents get O(1) indexing without going
// through heap nodes. Supports simple, fill-pointered, adjustable and
// displaced vectors.

use crate::conditions::LispError;
use crate::types::NodeId;

/// Handle to a vector (index into ArrayStore)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VectorId(pub u32);

#[derive(Debug, Clone)]
pub struct LispVector {
    /// Backing storage. Empty when displaced.
    pub data: Vec<NodeId>,
    /// Logical capacity (array total size).
    pub size: usize,
    /// Active length when present; push/pop operate on it.
    pub fill_pointer: Option<usize>,
    /// Whether VECTOR-PUSH-EXTEND may grow the storage.
    pub adjustable: bool,
    /// Displacement target and offset; element access indirects.
    pub displaced_to: Option<(VectorId, usize)>,
}

impl LispVector {
    /// Active element count: the fill pointer when there is one.
    pub fn length(&self) -> usize {
        self.fill_pointer.unwrap_or(self.size)
    }
}

pub struct ArrayStore {
    vectors: Vec<Option<LispVector>>,
    free_indices: Vec<u32>,
}

impl ArrayStore {
    pub fn new() -> Self {
        Self {
            vectors: Vec::new(),
            free_indices: Vec::new(),
        }
    }

    fn insert(&mut self, vec: LispVector) -> VectorId {
        if let Some(idx) = self.free_indices.pop() {
            self.vectors[idx as usize] = Some(vec);
            VectorId(idx)
        } else {
            let idx = self.vectors.len() as u32;
            self.vectors.push(Some(vec));
            VectorId(idx)
        }
    }

    /// MAKE-ARRAY for vectors: size slots filled with the initial element.
    pub fn alloc(
        &mut self,
        size: usize,
        initial_element: NodeId,
        fill_pointer: Option<usize>,
        adjustable: bool,
    ) -> VectorId {
        self.insert(LispVector {
            data: vec![initial_element; size],
            size,
            fill_pointer,
            adjustable,
            displaced_to: None,
        })
    }

    /// Build a simple vector from existing content.
    pub fn alloc_from_vec(&mut self, content: Vec<NodeId>) -> VectorId {
        let size = content.len();
        self.insert(LispVector {
            data: content,
            size,
            fill_pointer: None,
            adjustable: false,
            displaced_to: None,
        })
    }

    /// A vector displaced into `target` starting at `offset`.
    pub fn alloc_displaced(
        &mut self,
        size: usize,
        target: VectorId,
        offset: usize,
        fill_pointer: Option<usize>,
    ) -> VectorId {
        self.insert(LispVector {
            data: Vec::new(),
            size,
            fill_pointer,
            adjustable: false,
            displaced_to: Some((target, offset)),
        })
    }

    pub fn get(&self, id: VectorId) -> Option<&LispVector> {
        self.vectors.get(id.0 as usize).and_then(|v| v.as_ref())
    }

    pub fn get_mut(&mut self, id: VectorId) -> Option<&mut LispVector> {
        self.vectors.get_mut(id.0 as usize).and_then(|v| v.as_mut())
    }

    /// Resolve a (vector, index) pair through the displacement chain to the
    /// backing (vector, index) slot.
    fn resolve(&self, id: VectorId, index: usize) -> Option<(VectorId, usize)> {
        let mut id = id;
        let mut index = index;
        loop {
            let vec = self.get(id)?;
            match vec.displaced_to {
                Some((target, offset)) => {
                    id = target;
                    index += offset;
                }
                None => return Some((id, index)),
            }
        }
    }

    pub fn aref(&self, id: VectorId, index: usize) -> Result<NodeId, LispError> {
        let vec = self
            .get(id)
            .ok_or_else(|| LispError::General("invalid vector handle".to_string()))?;
        if index >= vec.length() {
            return Err(LispError::General(format!(
                "index {} out of bounds for vector of length {}",
                index,
                vec.length()
            )));
        }
        let (base, slot) = self
            .resolve(id, index)
            .ok_or_else(|| LispError::General("broken displacement chain".to_string()))?;
        let base_vec = self.get(base).unwrap();
        base_vec.data.get(slot).copied().ok_or_else(|| {
            LispError::General("displaced index out of bounds of target".to_string())
        })
    }

    pub fn aset(&mut self, id: VectorId, index: usize, value: NodeId) -> Result<(), LispError> {
        let len = self
            .get(id)
            .ok_or_else(|| LispError::General("invalid vector handle".to_string()))?
            .length();
        if index >= len {
            return Err(LispError::General(format!(
                "index {} out of bounds for vector of length {}",
                index, len
            )));
        }
        let (base, slot) = self
            .resolve(id, index)
            .ok_or_else(|| LispError::General("broken displacement chain".to_string()))?;
        let base_vec = self.get_mut(base).unwrap();
        if slot >= base_vec.data.len() {
            return Err(LispError::General(
                "displaced index out of bounds of target".to_string(),
            ));
        }
        base_vec.data[slot] = value;
        Ok(())
    }

    pub fn length(&self, id: VectorId) -> Option<usize> {
        self.get(id).map(|v| v.length())
    }

    pub fn fill_pointer(&self, id: VectorId) -> Option<usize> {
        self.get(id).and_then(|v| v.fill_pointer)
    }

    /// VECTOR-PUSH: store at the fill pointer and bump it. Returns the new
    /// element's index, or None when the vector is full (the primitive turns
    /// that into NIL: failing silently is the contract).
    pub fn vector_push(&mut self, id: VectorId, value: NodeId) -> Result<Option<usize>, LispError> {
        let fp = {
            let vec = self
                .get(id)
                .ok_or_else(|| LispError::General("invalid vector handle".to_string()))?;
            match vec.fill_pointer {
                Some(fp) => fp,
                None => {
                    return Err(LispError::General(
                        "vector has no fill pointer".to_string(),
                    ))
                }
            }
        };
        let capacity = self.get(id).unwrap().size;
        if fp >= capacity {
            return Ok(None);
        }
        let (base, slot) = self
            .resolve(id, fp)
            .ok_or_else(|| LispError::General("broken displacement chain".to_string()))?;
        self.get_mut(base).unwrap().data[slot] = value;
        self.get_mut(id).unwrap().fill_pointer = Some(fp + 1);
        Ok(Some(fp))
    }

    /// VECTOR-PUSH-EXTEND: like vector-push, but grows an adjustable vector
    /// instead of failing. Capacity doubles (minimum 8).
    pub fn vector_push_extend(&mut self, id: VectorId, value: NodeId) -> Result<usize, LispError> {
        if let Some(idx) = self.vector_push(id, value)? {
            return Ok(idx);
        }
        let vec = self.get_mut(id).unwrap();
        if !vec.adjustable || vec.displaced_to.is_some() {
            return Err(LispError::General(
                "vector is not adjustable; cannot extend".to_string(),
            ));
        }
        let new_size = (vec.size * 2).max(8);
        vec.data.resize(new_size, value);
        vec.size = new_size;
        let fp = vec.fill_pointer.unwrap();
        vec.data[fp] = value;
        vec.fill_pointer = Some(fp + 1);
        Ok(fp)
    }

    /// VECTOR-POP: decrement the fill pointer and return the element that
    /// was there. Popping an empty vector is an error.
    pub fn vector_pop(&mut self, id: VectorId) -> Result<NodeId, LispError> {
        let fp = {
            let vec = self
                .get(id)
                .ok_or_else(|| LispError::General("invalid vector handle".to_string()))?;
            match vec.fill_pointer {
                Some(fp) => fp,
                None => {
                    return Err(LispError::General(
                        "vector has no fill pointer".to_string(),
                    ))
                }
            }
        };
        if fp == 0 {
            return Err(LispError::General(
                "cannot pop an empty vector".to_string(),
            ));
        }
        let (base, slot) = self
            .resolve(id, fp - 1)
            .ok_or_else(|| LispError::General("broken displacement chain".to_string()))?;
        let value = self.get(base).unwrap().data[slot];
        self.get_mut(id).unwrap().fill_pointer = Some(fp - 1);
        Ok(value)
    }

    pub fn active_count(&self) -> usize {
        self.vectors.iter().filter(|v| v.is_some()).count()
    }
}

impl Default for ArrayStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_fails_silently_at_capacity() {
        let mut store = ArrayStore::new();
        let nil = NodeId(0);
        let v = store.alloc(2, nil, Some(0), false);

        assert_eq!(store.vector_push(v, NodeId(1)).unwrap(), Some(0));
        assert_eq!(store.vector_push(v, NodeId(2)).unwrap(), Some(1));
        assert_eq!(store.vector_push(v, NodeId(3)).unwrap(), None);
        assert_eq!(store.length(v), Some(2));
    }

    #[test]
    fn test_push_extend_grows() {
        let mut store = ArrayStore::new();
        let nil = NodeId(0);
        let v = store.alloc(1, nil, Some(0), true);

        assert_eq!(store.vector_push_extend(v, NodeId(1)).unwrap(), 0);
        assert_eq!(store.vector_push_extend(v, NodeId(2)).unwrap(), 1);
        assert_eq!(store.vector_push_extend(v, NodeId(3)).unwrap(), 2);
        assert_eq!(store.aref(v, 2).unwrap(), NodeId(3));
    }

    #[test]
    fn test_pop_empty_is_error() {
        let mut store = ArrayStore::new();
        let v = store.alloc(4, NodeId(0), Some(0), false);
        assert!(store.vector_pop(v).is_err());

        store.vector_push(v, NodeId(9)).unwrap();
        assert_eq!(store.vector_pop(v).unwrap(), NodeId(9));
        assert!(store.vector_pop(v).is_err());
    }

    #[test]
    fn test_displaced_access() {
        let mut store = ArrayStore::new();
        let target = store.alloc_from_vec(vec![NodeId(10), NodeId(11), NodeId(12), NodeId(13)]);
        let window = store.alloc_displaced(2, target, 1, None);

        assert_eq!(store.aref(window, 0).unwrap(), NodeId(11));
        assert_eq!(store.aref(window, 1).unwrap(), NodeId(12));

        // writes land in the target
        store.aset(window, 0, NodeId(99)).unwrap();
        assert_eq!(store.aref(target, 1).unwrap(), NodeId(99));
    }

    #[test]
    fn test_fill_pointer_bounds_visible_length() {
        let mut store = ArrayStore::new();
        let v = store.alloc(4, NodeId(0), Some(2), false);
        assert_eq!(store.length(v), Some(2));
        assert!(store.aref(v, 1).is_ok());
        assert!(store.aref(v, 2).is_err());
    }
}
