//! Structured error types for perftop
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Every fatal variant carries enough context to print a useful diagnostic;
//! decode errors never appear here because the drain path recovers from them
//! locally.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("frequency and count are zero; pass -F <hz> or -c <period>")]
    NoSamplingMode,

    #[error("mmap page count {0} is not a power of two")]
    BadPageCount(u32),

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("unknown sort key: {0} (expected period or symbol)")]
    UnknownSortKey(String),

    #[error(
        "permission to open performance counters was denied.\n\
         Consider lowering /proc/sys/kernel/perf_event_paranoid (<= 1) or \
         running with CAP_PERFMON"
    )]
    PermissionDenied,

    #[error("the {0} event is not supported by this kernel or hardware")]
    UnsupportedEvent(String),

    #[error(
        "perf_event_open() on {event} failed with {errno} ({msg}). \
         /bin/dmesg may provide additional information.\n\
         No CONFIG_PERF_EVENTS=y kernel support configured?"
    )]
    CounterOpen { event: String, errno: i32, msg: String },

    #[error("failed to mmap {bytes} bytes of ring buffer: {msg}")]
    RingMap { bytes: usize, msg: String },

    #[error("polling counter descriptors failed: {0}")]
    Poll(String),

    #[error("no online CPUs could be enumerated: {0}")]
    CpuEnumeration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProfilerError {
    /// Process exit code for this error, mirroring sysexits conventions:
    /// 77 for permission problems, 2 for unusable configuration, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            ProfilerError::PermissionDenied => 77,
            ProfilerError::NoSamplingMode
            | ProfilerError::BadPageCount(_)
            | ProfilerError::UnknownEvent(_)
            | ProfilerError::UnknownSortKey(_) => 2,
            _ => 1,
        }
    }
}
