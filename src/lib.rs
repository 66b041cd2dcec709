//! A concurrent, in-memory approximate-nearest-neighbor index built on Locality-Sensitive
//! Hashing (LSH) with reservoir sampling per bucket.
//!
//! Callers supply item identifiers together with pre-computed hash-code vectors (one bucket
//! index per hash table); the index stores, for each table and bucket, a bounded random sample
//! of the item ids that have collided there. Given a query's hash-code vector, [`Index::top_k`]
//! estimates the most frequent colliding ids across the tables — the approximate nearest
//! neighbors.
//!
//! The hash function family that turns item vectors into hash codes, any vector-similarity
//! re-ranking of the result, persistence, and any RPC/CLI surface are all out of scope: this
//! crate only ever sees bucket indices and opaque `u32` ids.
//!
//! # Example
//!
//! ```
//! use lsh_index::Index;
//!
//! let index = Index::new(2, 2, 3).unwrap();
//! index.insert_one(7, &[1, 2]);
//!
//! let mut top = [0u32; 1];
//! index.top_k(&[1, 2], 1, &mut top);
//! assert_eq!(top, [7]);
//! ```

mod error;
mod index;
mod reservoir;

pub use error::LshError;
pub use index::Index;
pub use reservoir::{Reservoir, EMPTY};
