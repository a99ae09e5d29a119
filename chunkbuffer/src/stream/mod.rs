//! Stream plumbing shared by the writer and reader engines.
//!
//! Submodules:
//! - `shared`: growable buffer decoupling producer writes from chunk flushes
//! - `ordered`: reassembly of chunk data in part order
//! - `meter`: byte-counting wrappers around chunk handles
pub mod meter;
pub mod ordered;
pub mod shared;

pub use meter::{ReadMeter, WriteMeter};
pub use ordered::{OrderedReader, Slots, ordered};
pub use shared::{SharedBuffer, SharedReader};
