//! Session bookkeeping for non-sample records.
//!
//! SAMPLE records feed the histograms; everything else lands here. We keep
//! just enough state to name threads and notice lost data: comm/fork/exit
//! counters, a tid-to-name map, and the one-time startup snapshot of
//! already-running threads from `/proc` (records only describe threads that
//! change after the counters open).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use perf_event_open_sys::bindings as perf;

use crate::domain::{Pid, Tid};
use crate::sampling::ring::RECORD_HEADER_SIZE;

#[derive(Default)]
pub struct Session {
    thread_names: HashMap<Tid, String>,
    comm_events: u64,
    fork_events: u64,
    exit_events: u64,
    lost_samples: u64,
    other_events: u64,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Session::default()
    }

    /// Seed the thread-name map from `/proc` before any records arrive.
    /// Scans one process's tasks when a pid is given, the whole table
    /// otherwise. Unreadable entries (raced exits) are skipped.
    pub fn snapshot_threads(&mut self, pid: Option<Pid>) -> usize {
        let before = self.thread_names.len();
        match pid {
            Some(pid) => self.scan_tasks(Path::new(&format!("/proc/{}/task", pid.0))),
            None => self.scan_tasks(Path::new("/proc")),
        }
        let found = self.thread_names.len() - before;
        info!("snapshot found {found} running threads");
        found
    }

    fn scan_tasks(&mut self, dir: &Path) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(tid) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            if let Ok(comm) = fs::read_to_string(entry.path().join("comm")) {
                self.thread_names.insert(Tid(tid), comm.trim_end().to_string());
            }
        }
    }

    /// Process one non-sample record.
    pub fn handle(&mut self, kind: u32, raw: &[u8]) {
        match kind {
            k if k == perf::PERF_RECORD_COMM => {
                self.comm_events += 1;
                if let Some((tid, name)) = parse_comm(raw) {
                    debug!("comm: {tid} is now {name:?}");
                    self.thread_names.insert(tid, name);
                }
            }
            k if k == perf::PERF_RECORD_FORK => {
                self.fork_events += 1;
            }
            k if k == perf::PERF_RECORD_EXIT => {
                self.exit_events += 1;
                if let Some(tid) = parse_tid(raw) {
                    self.thread_names.remove(&tid);
                }
            }
            k if k == perf::PERF_RECORD_LOST => {
                if let Some(lost) = parse_lost(raw) {
                    self.lost_samples += lost;
                    warn!("kernel dropped {lost} samples (ring buffer overrun)");
                }
            }
            _ => {
                self.other_events += 1;
            }
        }
    }

    #[must_use]
    pub fn thread_name(&self, tid: Tid) -> Option<&str> {
        self.thread_names.get(&tid).map(String::as_str)
    }

    #[must_use]
    pub fn lost_samples(&self) -> u64 {
        self.lost_samples
    }

    #[must_use]
    pub fn counts(&self) -> (u64, u64, u64, u64) {
        (self.comm_events, self.fork_events, self.exit_events, self.other_events)
    }
}

/// COMM body: pid u32, tid u32, then a null-padded name.
fn parse_comm(raw: &[u8]) -> Option<(Tid, String)> {
    let body = raw.get(RECORD_HEADER_SIZE..)?;
    let tid = u32::from_ne_bytes(body.get(4..8)?.try_into().ok()?);
    let comm = body.get(8..)?;
    let end = comm.iter().position(|&b| b == 0).unwrap_or(comm.len());
    Some((Tid(tid), String::from_utf8_lossy(&comm[..end]).into_owned()))
}

/// FORK/EXIT body starts: pid u32, ppid u32, tid u32, ptid u32.
fn parse_tid(raw: &[u8]) -> Option<Tid> {
    let body = raw.get(RECORD_HEADER_SIZE..)?;
    Some(Tid(u32::from_ne_bytes(body.get(8..12)?.try_into().ok()?)))
}

/// LOST body: stream id u64, lost count u64.
fn parse_lost(raw: &[u8]) -> Option<u64> {
    let body = raw.get(RECORD_HEADER_SIZE..)?;
    Some(u64::from_ne_bytes(body.get(8..16)?.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: u32, body: &[u8]) -> Vec<u8> {
        let mut raw = Vec::with_capacity(RECORD_HEADER_SIZE + body.len());
        raw.extend_from_slice(&kind.to_ne_bytes());
        raw.extend_from_slice(&0u16.to_ne_bytes());
        raw.extend_from_slice(&((RECORD_HEADER_SIZE + body.len()) as u16).to_ne_bytes());
        raw.extend_from_slice(body);
        raw
    }

    #[test]
    fn comm_record_names_a_thread() {
        let mut body = Vec::new();
        body.extend_from_slice(&100u32.to_ne_bytes());
        body.extend_from_slice(&101u32.to_ne_bytes());
        body.extend_from_slice(b"worker\0\0");

        let mut s = Session::new();
        s.handle(perf::PERF_RECORD_COMM, &record(perf::PERF_RECORD_COMM, &body));
        assert_eq!(s.thread_name(Tid(101)), Some("worker"));
        assert_eq!(s.counts().0, 1);
    }

    #[test]
    fn exit_record_forgets_the_thread() {
        let mut comm = Vec::new();
        comm.extend_from_slice(&100u32.to_ne_bytes());
        comm.extend_from_slice(&101u32.to_ne_bytes());
        comm.extend_from_slice(b"worker\0\0");

        let mut exit = Vec::new();
        exit.extend_from_slice(&100u32.to_ne_bytes());
        exit.extend_from_slice(&1u32.to_ne_bytes());
        exit.extend_from_slice(&101u32.to_ne_bytes());
        exit.extend_from_slice(&1u32.to_ne_bytes());

        let mut s = Session::new();
        s.handle(perf::PERF_RECORD_COMM, &record(perf::PERF_RECORD_COMM, &comm));
        s.handle(perf::PERF_RECORD_EXIT, &record(perf::PERF_RECORD_EXIT, &exit));
        assert_eq!(s.thread_name(Tid(101)), None);
    }

    #[test]
    fn lost_records_accumulate() {
        let mut body = Vec::new();
        body.extend_from_slice(&7u64.to_ne_bytes());
        body.extend_from_slice(&42u64.to_ne_bytes());

        let mut s = Session::new();
        s.handle(perf::PERF_RECORD_LOST, &record(perf::PERF_RECORD_LOST, &body));
        s.handle(perf::PERF_RECORD_LOST, &record(perf::PERF_RECORD_LOST, &body));
        assert_eq!(s.lost_samples(), 84);
    }

    #[test]
    fn truncated_bodies_are_ignored() {
        let mut s = Session::new();
        s.handle(perf::PERF_RECORD_COMM, &record(perf::PERF_RECORD_COMM, &[1, 2]));
        s.handle(perf::PERF_RECORD_LOST, &record(perf::PERF_RECORD_LOST, &[]));
        assert_eq!(s.lost_samples(), 0);
    }
}
