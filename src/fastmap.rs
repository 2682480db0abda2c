// EmberCL Fast Maps
//
// Symbol-keyed maps are on every hot path of the evaluator; use the FxHash
// family instead of SipHash.

pub type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;
pub type HashSet<K> = rustc_hash::FxHashSet<K>;
