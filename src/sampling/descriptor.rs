//! Counter descriptor construction.
//!
//! An [`EventDescriptor`] is a configured request for one performance counter.
//! It owns everything that goes into the `perf_event_attr` except the
//! (cpu, thread) placement, which `evlist` supplies at open time.

use perf_event_open_sys::bindings as perf;

use crate::cli::EventSpec;
use crate::config::TopConfig;

/// Which optional fields SAMPLE record bodies carry, derived from the
/// configuration exactly as the attr sample mask is. Instruction pointer and
/// thread ids are always present; period is added in frequency mode and a
/// stream identifier once more than one event stream is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLayout {
    pub has_id: bool,
    pub has_period: bool,
}

impl SampleLayout {
    #[must_use]
    pub fn from_config(cfg: &TopConfig) -> Self {
        SampleLayout { has_id: cfg.nr_streams() > 1, has_period: cfg.freq_mode() }
    }

    fn sample_type(self) -> u64 {
        let mut mask = perf::PERF_SAMPLE_IP as u64 | perf::PERF_SAMPLE_TID as u64;
        if self.has_period {
            mask |= perf::PERF_SAMPLE_PERIOD as u64;
        }
        if self.has_id {
            mask |= perf::PERF_SAMPLE_ID as u64;
        }
        mask
    }
}

/// A configured request for one performance counter.
#[derive(Debug, Clone)]
pub struct EventDescriptor {
    spec: EventSpec,
    /// Histogram stream this descriptor feeds (index into the event list).
    stream: usize,
    type_: u32,
    config: u64,
    /// Set once `cpu_clock_fallback` has been taken; a downgraded
    /// descriptor is never downgraded again.
    downgraded: bool,
}

impl EventDescriptor {
    #[must_use]
    pub fn new(spec: EventSpec, stream: usize) -> Self {
        let (type_, config) = match spec {
            EventSpec::Cycles => {
                (perf::PERF_TYPE_HARDWARE, u64::from(perf::PERF_COUNT_HW_CPU_CYCLES))
            }
            EventSpec::Instructions => {
                (perf::PERF_TYPE_HARDWARE, u64::from(perf::PERF_COUNT_HW_INSTRUCTIONS))
            }
            EventSpec::CacheReferences => {
                (perf::PERF_TYPE_HARDWARE, u64::from(perf::PERF_COUNT_HW_CACHE_REFERENCES))
            }
            EventSpec::CacheMisses => {
                (perf::PERF_TYPE_HARDWARE, u64::from(perf::PERF_COUNT_HW_CACHE_MISSES))
            }
            EventSpec::BranchInstructions => {
                (perf::PERF_TYPE_HARDWARE, u64::from(perf::PERF_COUNT_HW_BRANCH_INSTRUCTIONS))
            }
            EventSpec::BranchMisses => {
                (perf::PERF_TYPE_HARDWARE, u64::from(perf::PERF_COUNT_HW_BRANCH_MISSES))
            }
            EventSpec::CpuClock => {
                (perf::PERF_TYPE_SOFTWARE, u64::from(perf::PERF_COUNT_SW_CPU_CLOCK))
            }
            EventSpec::TaskClock => {
                (perf::PERF_TYPE_SOFTWARE, u64::from(perf::PERF_COUNT_SW_TASK_CLOCK))
            }
            EventSpec::PageFaults => {
                (perf::PERF_TYPE_SOFTWARE, u64::from(perf::PERF_COUNT_SW_PAGE_FAULTS))
            }
            EventSpec::ContextSwitches => {
                (perf::PERF_TYPE_SOFTWARE, u64::from(perf::PERF_COUNT_SW_CONTEXT_SWITCHES))
            }
        };
        EventDescriptor { spec, stream, type_, config, downgraded: false }
    }

    #[must_use]
    pub fn spec(&self) -> EventSpec {
        self.spec
    }

    #[must_use]
    pub fn stream(&self) -> usize {
        self.stream
    }

    /// Display name; a downgraded descriptor still reports the event the
    /// user asked for.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.spec.name()
    }

    #[must_use]
    pub fn is_hw_cycles(&self) -> bool {
        self.type_ == perf::PERF_TYPE_HARDWARE
            && self.config == u64::from(perf::PERF_COUNT_HW_CPU_CYCLES)
    }

    /// The one permitted substitution: a hardware cycle counter that the
    /// kernel rejected becomes a software cpu-clock counter with identical
    /// period/frequency settings. Returns `None` for any other descriptor,
    /// and for a descriptor that has already been downgraded.
    #[must_use]
    pub fn cpu_clock_fallback(&self) -> Option<EventDescriptor> {
        if self.downgraded || !self.is_hw_cycles() {
            return None;
        }
        Some(EventDescriptor {
            spec: self.spec,
            stream: self.stream,
            type_: perf::PERF_TYPE_SOFTWARE,
            config: u64::from(perf::PERF_COUNT_SW_CPU_CLOCK),
            downgraded: true,
        })
    }

    /// Build the open-call attribute block for this descriptor.
    #[must_use]
    pub fn attr(&self, cfg: &TopConfig) -> perf::perf_event_attr {
        let mut attr = perf::perf_event_attr::default();
        attr.size = std::mem::size_of::<perf::perf_event_attr>() as u32;
        attr.type_ = self.type_;
        attr.config = self.config;
        attr.sample_type = SampleLayout::from_config(cfg).sample_type();

        if cfg.freq_mode() {
            attr.set_freq(1);
            attr.__bindgen_anon_1.sample_freq = cfg.freq;
        } else {
            attr.__bindgen_anon_1.sample_period = cfg.period;
        }

        if cfg.nr_streams() > 1 {
            attr.read_format |= u64::from(perf::PERF_FORMAT_ID);
        }

        attr.set_mmap(1);
        if cfg.inherit {
            attr.set_inherit(1);
        }

        attr
    }
}
