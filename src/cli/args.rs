//! CLI argument definitions

use anyhow::Result;
use clap::Parser;

use crate::domain::ProfilerError;

#[derive(Parser, Debug)]
#[command(
    name = "perftop",
    about = "Live per-symbol CPU profile of the whole system or one process",
    after_help = "\
EXAMPLES:
    sudo perftop                         Sample cycles on every CPU at 1000 Hz
    sudo perftop -e cycles -e cache-misses   Track two event streams
    sudo perftop -p 1234 -F 250          Profile one process at 250 Hz
    sudo perftop -c 100000               Fixed period instead of a frequency"
)]
pub struct Args {
    /// Event period to sample (nonzero disables frequency-based sampling)
    #[arg(short = 'c', long = "count", default_value = "0")]
    pub count: u64,

    /// Event selector; may be given multiple times
    #[arg(short, long, default_value = "cycles")]
    pub event: Vec<String>,

    /// Profile at this frequency (Hz)
    #[arg(short = 'F', long, default_value = "1000")]
    pub freq: u64,

    /// Put the counters into a counter group
    #[arg(short, long)]
    pub group: bool,

    /// Child tasks inherit counters
    #[arg(short, long)]
    pub inherit: bool,

    /// Number of mmap data pages per counter (power of two)
    #[arg(short, long, default_value = "128")]
    pub mmap_pages: u32,

    /// Sort by key(s): period, symbol
    #[arg(short, long, default_value = "period")]
    pub sort: String,

    /// Profile this process instead of the whole system
    #[arg(short, long)]
    pub pid: Option<i32>,

    /// Be more verbose (repeat for more detail)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// One requested counter, resolved from its CLI name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSpec {
    /// Hardware cycle counter; falls back to `CpuClock` when the PMU
    /// is unavailable.
    Cycles,
    Instructions,
    CacheReferences,
    CacheMisses,
    BranchInstructions,
    BranchMisses,
    /// Software hrtimer clock, always available.
    CpuClock,
    TaskClock,
    PageFaults,
    ContextSwitches,
}

impl EventSpec {
    /// Canonical name, used in error messages and histogram headers.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            EventSpec::Cycles => "cycles",
            EventSpec::Instructions => "instructions",
            EventSpec::CacheReferences => "cache-references",
            EventSpec::CacheMisses => "cache-misses",
            EventSpec::BranchInstructions => "branches",
            EventSpec::BranchMisses => "branch-misses",
            EventSpec::CpuClock => "cpu-clock",
            EventSpec::TaskClock => "task-clock",
            EventSpec::PageFaults => "page-faults",
            EventSpec::ContextSwitches => "context-switches",
        }
    }
}

pub fn parse_event(name: &str) -> Result<EventSpec> {
    match name {
        "cycles" | "cpu-cycles" => Ok(EventSpec::Cycles),
        "instructions" => Ok(EventSpec::Instructions),
        "cache-references" => Ok(EventSpec::CacheReferences),
        "cache-misses" => Ok(EventSpec::CacheMisses),
        "branches" | "branch-instructions" => Ok(EventSpec::BranchInstructions),
        "branch-misses" => Ok(EventSpec::BranchMisses),
        "cpu-clock" => Ok(EventSpec::CpuClock),
        "task-clock" => Ok(EventSpec::TaskClock),
        "page-faults" | "faults" => Ok(EventSpec::PageFaults),
        "context-switches" | "cs" => Ok(EventSpec::ContextSwitches),
        _ => Err(ProfilerError::UnknownEvent(name.to_string()).into()),
    }
}

/// Histogram sort key, from the `-s` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Period,
    Symbol,
}

pub fn parse_sort_keys(list: &str) -> Result<Vec<SortKey>> {
    let mut keys = Vec::new();
    for key in list.split(',') {
        match key.trim() {
            "period" => keys.push(SortKey::Period),
            "symbol" => keys.push(SortKey::Symbol),
            other => return Err(ProfilerError::UnknownSortKey(other.to_string()).into()),
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_aliases_resolve() {
        assert_eq!(parse_event("cycles").unwrap(), EventSpec::Cycles);
        assert_eq!(parse_event("cpu-cycles").unwrap(), EventSpec::Cycles);
        assert_eq!(parse_event("cs").unwrap(), EventSpec::ContextSwitches);
        assert!(parse_event("tlb-shootdowns").is_err());
    }

    #[test]
    fn sort_key_list_parses_in_order() {
        let keys = parse_sort_keys("period,symbol").unwrap();
        assert_eq!(keys, vec![SortKey::Period, SortKey::Symbol]);
        assert!(parse_sort_keys("period,pid").is_err());
    }

    #[test]
    fn unknown_names_exit_as_usage_errors() {
        let err = parse_event("tlb-shootdowns").unwrap_err();
        let err = err.downcast::<ProfilerError>().unwrap();
        assert!(matches!(err, ProfilerError::UnknownEvent(_)));
        assert_eq!(err.exit_code(), 2);

        let err = parse_sort_keys("period,pid").unwrap_err();
        let err = err.downcast::<ProfilerError>().unwrap();
        assert!(matches!(err, ProfilerError::UnknownSortKey(_)));
        assert_eq!(err.exit_code(), 2);
    }
}
