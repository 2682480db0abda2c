// EmberCL: Embedded ANSI Common Lisp Core Runtime
//
// The core evaluator and numeric-object runtime: tagged value model,
// special-operator evaluator with nonlocal exits, and generic arithmetic
// over the fixnum/bignum/ratio/float/complex tower. The reader, compiler,
// CLOS and the full condition system live outside this crate.

pub mod arrays;
pub mod chars;
pub mod conditions;
pub mod context;
pub mod eval;
pub mod fastmap;
pub mod heap;
pub mod numbers;
pub mod primitives;
pub mod printer;
pub mod process;
pub mod streams;
pub mod symbol;
pub mod types;
