//! Segment and block bookkeeping: lookups by offset, overlap resolution and
//! the file totals derived from the block set.
pub mod aggregate;
pub mod block;
pub mod coverage;
pub mod index;

pub use aggregate::{FileAggregate, recompute_file_aggregate};
pub use block::{BlockBatch, BlockDesc, BlockRecord};
pub use coverage::{Resolution, WriteOutcome, resolve};
pub use index::SegmentPositions;
