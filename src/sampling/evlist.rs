//! Event list construction and counter opening.
//!
//! `open_all` either returns a fully opened counter set or a terminal error;
//! a partial set is never handed back silently. Already-opened descriptors
//! are released by drop when an open fails partway through.

// perf_event_open and the ID ioctl are raw syscalls
#![allow(unsafe_code)]

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use log::{debug, warn};
use perf_event_open_sys as sys;
use perf_event_open_sys::bindings as perf;

use crate::config::TopConfig;
use crate::domain::{CpuId, ProfilerError};
use crate::sampling::descriptor::EventDescriptor;

/// One successfully opened counter: the owned fd plus the descriptor that
/// finally opened (after any cpu-clock fallback) and its placement.
pub struct OpenedCounter {
    fd: OwnedFd,
    descriptor: EventDescriptor,
    cpu: CpuId,
    /// Stream identifier reported by the kernel, used to resolve the owning
    /// event of a SAMPLE record when several streams are active. Zero when
    /// only one stream exists.
    id: u64,
}

impl OpenedCounter {
    #[must_use]
    pub fn raw_fd(&self) -> i32 {
        self.fd.as_raw_fd()
    }

    #[must_use]
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    #[must_use]
    pub fn stream(&self) -> usize {
        self.descriptor.stream()
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }
}

/// Ordered set of counter requests; insertion order is preserved through
/// opening so ring buffers drain in a stable round-robin order.
pub struct EventList {
    descriptors: Vec<EventDescriptor>,
}

impl EventList {
    #[must_use]
    pub fn from_config(cfg: &TopConfig) -> Self {
        let descriptors = cfg
            .events
            .iter()
            .enumerate()
            .map(|(stream, &spec)| EventDescriptor::new(spec, stream))
            .collect();
        EventList { descriptors }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Open every descriptor on every (cpu, thread) placement.
    ///
    /// System-wide profiling opens one counter per CPU with `pid = -1`;
    /// profiling a single process opens one counter per CPU scoped to that
    /// pid. When grouping is requested, the first counter opened per
    /// placement becomes the group leader for the rest.
    ///
    /// # Errors
    /// `PermissionDenied` aborts immediately. A hardware cycle counter that
    /// fails for any other reason is retried exactly once as a software
    /// cpu-clock counter; an unsupported event elsewhere is fatal and named;
    /// remaining errnos become `CounterOpen` with the raw code and an
    /// operational hint.
    pub fn open_all(&self, cfg: &TopConfig, cpus: &[CpuId]) -> Result<Vec<OpenedCounter>, ProfilerError> {
        let pid = cfg.pid.map_or(-1, |p| p.0);
        let mut opened = Vec::with_capacity(self.descriptors.len() * cpus.len());
        let want_id = cfg.nr_streams() > 1;

        for &cpu in cpus {
            let mut leader: i32 = -1;
            for desc in &self.descriptors {
                let (fd, final_desc) = open_counter(desc, cfg, pid, cpu, leader)?;
                if cfg.group && leader == -1 {
                    leader = fd.as_raw_fd();
                }
                let id = if want_id { counter_id(&fd)? } else { 0 };
                debug!("opened {} on {cpu} (fd {}, id {id})", final_desc.name(), fd.as_raw_fd());
                opened.push(OpenedCounter { fd, descriptor: final_desc, cpu, id });
            }
        }

        Ok(opened)
    }
}

/// What to do about one failed `perf_event_open` call.
#[derive(Debug)]
enum OpenFailure {
    /// EPERM/EACCES: fatal with the paranoid remediation hint, on the
    /// first attempt and on the fallback alike.
    Permission,
    /// Hardware cycles failed for a non-permission reason (ENOENT, ENODEV,
    /// EOPNOTSUPP, ...); retry once as software cpu-clock.
    RetryAs(EventDescriptor),
    Fatal(ProfilerError),
}

fn classify_open_failure(desc: &EventDescriptor, errno: i32) -> OpenFailure {
    if errno == libc::EPERM || errno == libc::EACCES {
        return OpenFailure::Permission;
    }
    if let Some(fallback) = desc.cpu_clock_fallback() {
        return OpenFailure::RetryAs(fallback);
    }
    if errno == libc::ENOENT {
        return OpenFailure::Fatal(ProfilerError::UnsupportedEvent(desc.name().to_string()));
    }
    OpenFailure::Fatal(counter_open_error(desc, errno))
}

fn open_counter(
    desc: &EventDescriptor,
    cfg: &TopConfig,
    pid: i32,
    cpu: CpuId,
    group_fd: i32,
) -> Result<(OwnedFd, EventDescriptor), ProfilerError> {
    let mut desc = desc.clone();
    loop {
        match try_open(&desc.attr(cfg), pid, cpu, group_fd) {
            Ok(fd) => return Ok((fd, desc)),
            Err(errno) => match classify_open_failure(&desc, errno) {
                OpenFailure::Permission => return Err(ProfilerError::PermissionDenied),
                OpenFailure::RetryAs(fallback) => {
                    warn!(
                        "{} event not usable (errno {errno}), trying to fall back to \
                         cpu-clock ticks",
                        desc.name()
                    );
                    desc = fallback;
                }
                OpenFailure::Fatal(err) => return Err(err),
            },
        }
    }
}

fn counter_open_error(desc: &EventDescriptor, errno: i32) -> ProfilerError {
    ProfilerError::CounterOpen {
        event: desc.name().to_string(),
        errno,
        msg: io::Error::from_raw_os_error(errno).to_string(),
    }
}

fn try_open(
    attr: &perf::perf_event_attr,
    pid: i32,
    cpu: CpuId,
    group_fd: i32,
) -> Result<OwnedFd, i32> {
    let mut attr = *attr;
    let fd = unsafe {
        sys::perf_event_open(
            &mut attr,
            pid,
            cpu.0 as i32,
            group_fd,
            perf::PERF_FLAG_FD_CLOEXEC as libc::c_ulong,
        )
    };
    if fd < 0 {
        Err(io::Error::last_os_error().raw_os_error().unwrap_or(0))
    } else {
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }
}

fn counter_id(fd: &OwnedFd) -> Result<u64, ProfilerError> {
    let mut id = 0u64;
    let rc = unsafe { sys::ioctls::ID(fd.as_raw_fd(), &mut id) };
    if rc < 0 {
        return Err(ProfilerError::Io(io::Error::last_os_error()));
    }
    Ok(id)
}

/// Enumerate online CPUs from sysfs.
///
/// # Errors
/// Fails when the sysfs file is missing or malformed.
pub fn online_cpus() -> Result<Vec<CpuId>, ProfilerError> {
    let content = std::fs::read_to_string("/sys/devices/system/cpu/online")
        .map_err(|e| ProfilerError::CpuEnumeration(e.to_string()))?;
    parse_cpu_list(content.trim())
}

/// Parse the kernel's CPU list format, e.g. `0-7` or `0-3,5,7-11`.
fn parse_cpu_list(list: &str) -> Result<Vec<CpuId>, ProfilerError> {
    let mut cpus = Vec::new();
    for part in list.split(',') {
        if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start
                .parse()
                .map_err(|_| ProfilerError::CpuEnumeration(format!("bad cpu range: {part}")))?;
            let end: u32 = end
                .parse()
                .map_err(|_| ProfilerError::CpuEnumeration(format!("bad cpu range: {part}")))?;
            cpus.extend((start..=end).map(CpuId));
        } else {
            let cpu: u32 = part
                .parse()
                .map_err(|_| ProfilerError::CpuEnumeration(format!("bad cpu id: {part}")))?;
            cpus.push(CpuId(cpu));
        }
    }
    Ok(cpus)
}
