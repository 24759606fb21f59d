//! Core domain types shared across modules.

mod errors;
mod types;

pub use errors::ProfilerError;
pub use types::{CpuId, Pid, Tid};
