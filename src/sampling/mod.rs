//! Sampling-capture pipeline.
//!
//! - `descriptor`: one configured counter request per (CPU, thread, event)
//! - `evlist`: opens every descriptor, with the cycles → cpu-clock fallback
//! - `ring`: per-counter mmapped ring buffers and the non-blocking drain
//! - `router`: raw record decode and dispatch to histogram or session

pub mod descriptor;
pub mod evlist;
pub mod ring;
pub mod router;

pub use descriptor::{EventDescriptor, SampleLayout};
pub use evlist::{EventList, OpenedCounter};
pub use ring::RingBuffer;
pub use router::Router;
