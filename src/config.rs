//! Immutable run configuration.
//!
//! All process-wide tunables are resolved from the CLI once, validated, and
//! passed into every component by reference. Nothing mutates a `TopConfig`
//! after startup.

use anyhow::Result;

use crate::cli::{self, Args, EventSpec, SortKey};
use crate::domain::{Pid, ProfilerError};

/// Validated, immutable profiler configuration.
#[derive(Debug, Clone)]
pub struct TopConfig {
    /// Events to sample, in CLI order. One histogram stream per entry.
    pub events: Vec<EventSpec>,
    /// Fixed sample period; zero means frequency mode.
    pub period: u64,
    /// Target sample frequency in Hz; zero when a fixed period is set.
    pub freq: u64,
    pub inherit: bool,
    pub group: bool,
    /// Ring buffer data pages per counter. Always a power of two.
    pub mmap_pages: u32,
    pub sort_keys: Vec<SortKey>,
    /// Target process, or `None` for system-wide profiling.
    pub pid: Option<Pid>,
    pub verbose: u8,
}

impl TopConfig {
    /// Resolve CLI arguments into a validated configuration.
    ///
    /// An explicit nonzero period wins over the frequency; if neither is
    /// effectively nonzero, sampling cannot run at all.
    ///
    /// # Errors
    /// Returns `NoSamplingMode` when both period and frequency are zero,
    /// `BadPageCount` for a non-power-of-two page count, and parse errors
    /// for unknown event or sort names.
    pub fn from_args(args: &Args) -> Result<Self> {
        let events =
            args.event.iter().map(|name| cli::parse_event(name)).collect::<Result<Vec<_>>>()?;
        let sort_keys = cli::parse_sort_keys(&args.sort)?;

        let (period, freq) = if args.count > 0 {
            (args.count, 0)
        } else if args.freq > 0 {
            (0, args.freq)
        } else {
            return Err(ProfilerError::NoSamplingMode.into());
        };

        if !args.mmap_pages.is_power_of_two() {
            return Err(ProfilerError::BadPageCount(args.mmap_pages).into());
        }

        Ok(TopConfig {
            events,
            period,
            freq,
            inherit: args.inherit,
            group: args.group,
            mmap_pages: args.mmap_pages,
            sort_keys,
            pid: args.pid.map(Pid),
            verbose: args.verbose,
        })
    }

    /// True when sampling at a target frequency rather than a fixed period.
    #[must_use]
    pub fn freq_mode(&self) -> bool {
        self.freq > 0
    }

    /// Number of independent event streams (histograms).
    #[must_use]
    pub fn nr_streams(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(argv: &[&str]) -> Args {
        let mut full = vec!["perftop"];
        full.extend_from_slice(argv);
        Args::parse_from(full)
    }

    #[test]
    fn explicit_period_disables_frequency() {
        let cfg = TopConfig::from_args(&args(&["-c", "100000", "-F", "4000"])).unwrap();
        assert_eq!(cfg.period, 100_000);
        assert_eq!(cfg.freq, 0);
        assert!(!cfg.freq_mode());
    }

    #[test]
    fn default_is_frequency_mode() {
        let cfg = TopConfig::from_args(&args(&[])).unwrap();
        assert_eq!(cfg.period, 0);
        assert_eq!(cfg.freq, 1000);
        assert!(cfg.freq_mode());
    }

    #[test]
    fn zero_period_and_zero_freq_is_a_config_error() {
        let err = TopConfig::from_args(&args(&["-c", "0", "-F", "0"])).unwrap_err();
        let err = err.downcast::<ProfilerError>().unwrap();
        assert!(matches!(err, ProfilerError::NoSamplingMode));
    }

    #[test]
    fn page_count_must_be_a_power_of_two() {
        let err = TopConfig::from_args(&args(&["-m", "100"])).unwrap_err();
        let err = err.downcast::<ProfilerError>().unwrap();
        assert!(matches!(err, ProfilerError::BadPageCount(100)));
    }

    #[test]
    fn repeated_events_become_ordered_streams() {
        let cfg =
            TopConfig::from_args(&args(&["-e", "cycles", "-e", "cache-misses"])).unwrap();
        assert_eq!(cfg.nr_streams(), 2);
        assert_eq!(cfg.events[0].name(), "cycles");
        assert_eq!(cfg.events[1].name(), "cache-misses");
    }
}
