//! Record decode and dispatch.
//!
//! A drained record is raw bytes. The router decodes the header, pulls the
//! SAMPLE fields the configured mask promises, classifies the instruction
//! pointer, and charges the histogram, or hands non-sample kinds to the
//! session processor. Decode failures are counted and skipped; a bad record
//! never stops the drain.

use log::debug;
use perf_event_open_sys::bindings as perf;

use crate::hist::Hists;
use crate::sampling::descriptor::SampleLayout;
use crate::sampling::ring::RECORD_HEADER_SIZE;
use crate::session::Session;
use crate::symbols::KernelSymbols;

use std::collections::HashMap;

/// Decoded SAMPLE body; lives only for one routing call.
#[derive(Debug, PartialEq, Eq)]
struct SampleRecord {
    ip: u64,
    pid: u32,
    tid: u32,
    id: Option<u64>,
    period: Option<u64>,
}

pub struct Router {
    layout: SampleLayout,
    /// Kernel stream id to event-stream index, populated from the opened
    /// counters. Empty when a single stream runs without ids.
    id_to_stream: HashMap<u64, usize>,
    /// Weight to charge when the sample mask carries no period field.
    fixed_period: u64,
    decode_errors: u64,
}

impl Router {
    #[must_use]
    pub fn new(layout: SampleLayout, id_to_stream: HashMap<u64, usize>, fixed_period: u64) -> Self {
        Router { layout, id_to_stream, fixed_period, decode_errors: 0 }
    }

    /// Dispatch one raw record. `owner_stream` is the stream of the ring the
    /// record came from, used when the sample carries no id.
    pub fn route(
        &mut self,
        raw: &[u8],
        owner_stream: usize,
        symbols: &KernelSymbols,
        hists: &Hists,
        session: &mut Session,
    ) {
        let Some(kind) = record_kind(raw) else {
            self.decode_errors += 1;
            debug!("record shorter than its header, skipped");
            return;
        };

        if kind != perf::PERF_RECORD_SAMPLE {
            session.handle(kind, raw);
            return;
        }

        let Some(sample) = self.decode_sample(raw) else {
            self.decode_errors += 1;
            debug!("truncated sample record, skipped");
            return;
        };

        let stream = sample
            .id
            .and_then(|id| self.id_to_stream.get(&id).copied())
            .unwrap_or(owner_stream);

        let classified = symbols.classify(sample.ip);
        debug!(
            "sample ip {:#x} pid {} tid {} -> {}",
            sample.ip, sample.pid, sample.tid, classified.name
        );
        if classified.ignore {
            return;
        }
        hists.add(stream, classified.name, sample.period.unwrap_or(self.fixed_period));
    }

    /// Field order follows the sample mask: IP, TID (pid then tid), ID,
    /// PERIOD.
    fn decode_sample(&self, raw: &[u8]) -> Option<SampleRecord> {
        let mut cur = Cursor { buf: raw, pos: RECORD_HEADER_SIZE };
        let ip = cur.u64()?;
        let pid = cur.u32()?;
        let tid = cur.u32()?;
        let id = if self.layout.has_id { Some(cur.u64()?) } else { None };
        let period = if self.layout.has_period { Some(cur.u64()?) } else { None };
        Some(SampleRecord { ip, pid, tid, id, period })
    }

    #[must_use]
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }
}

fn record_kind(raw: &[u8]) -> Option<u32> {
    Some(u32::from_ne_bytes(raw.get(..4)?.try_into().ok()?))
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn u64(&mut self) -> Option<u64> {
        let v = u64::from_ne_bytes(self.buf.get(self.pos..self.pos + 8)?.try_into().ok()?);
        self.pos += 8;
        Some(v)
    }

    fn u32(&mut self) -> Option<u32> {
        let v = u32::from_ne_bytes(self.buf.get(self.pos..self.pos + 4)?.try_into().ok()?);
        self.pos += 4;
        Some(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::SortKey;
    use std::io::Cursor as IoCursor;

    fn sample_record(layout: SampleLayout, ip: u64, id: u64, period: u64) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&ip.to_ne_bytes());
        body.extend_from_slice(&100u32.to_ne_bytes());
        body.extend_from_slice(&101u32.to_ne_bytes());
        if layout.has_id {
            body.extend_from_slice(&id.to_ne_bytes());
        }
        if layout.has_period {
            body.extend_from_slice(&period.to_ne_bytes());
        }

        let mut raw = Vec::new();
        raw.extend_from_slice(&perf::PERF_RECORD_SAMPLE.to_ne_bytes());
        raw.extend_from_slice(&0u16.to_ne_bytes());
        raw.extend_from_slice(&((RECORD_HEADER_SIZE + body.len()) as u16).to_ne_bytes());
        raw.extend_from_slice(&body);
        raw
    }

    fn symbols() -> KernelSymbols {
        KernelSymbols::parse_reader(IoCursor::new(
            "ffffffff81001000 T vfs_read\n\
             ffffffff81002000 T default_idle\n",
        ))
        .unwrap()
    }

    #[test]
    fn sample_with_period_charges_the_histogram() {
        let layout = SampleLayout { has_id: false, has_period: true };
        let hists = Hists::new(vec!["cycles".into()], vec![SortKey::Period]);
        let mut session = Session::new();
        let mut router = Router::new(layout, HashMap::new(), 0);

        let raw = sample_record(layout, 0xffff_ffff_8100_1800, 0, 42);
        router.route(&raw, 0, &symbols(), &hists, &mut session);
        assert_eq!(hists.total_period(), 42);
    }

    #[test]
    fn fixed_period_mode_charges_the_configured_weight() {
        let layout = SampleLayout { has_id: false, has_period: false };
        let hists = Hists::new(vec!["cycles".into()], vec![SortKey::Period]);
        let mut session = Session::new();
        let mut router = Router::new(layout, HashMap::new(), 10_000);

        let raw = sample_record(layout, 0xffff_ffff_8100_1800, 0, 0);
        router.route(&raw, 0, &symbols(), &hists, &mut session);
        assert_eq!(hists.total_period(), 10_000);
    }

    #[test]
    fn stream_id_overrides_the_ring_owner() {
        let layout = SampleLayout { has_id: true, has_period: true };
        let hists =
            Hists::new(vec!["cycles".into(), "faults".into()], vec![SortKey::Period]);
        let mut session = Session::new();
        let mut router = Router::new(layout, HashMap::from([(7u64, 1usize)]), 0);

        let raw = sample_record(layout, 0xffff_ffff_8100_1800, 7, 5);
        router.route(&raw, 0, &symbols(), &hists, &mut session);
        let text = hists.collapse_and_format(1, 80, 10);
        assert!(text.contains("vfs_read"));
        assert_eq!(hists.collapse_and_format(0, 80, 10).lines().count(), 1);
    }

    #[test]
    fn idle_samples_are_dropped() {
        let layout = SampleLayout { has_id: false, has_period: true };
        let hists = Hists::new(vec!["cycles".into()], vec![SortKey::Period]);
        let mut session = Session::new();
        let mut router = Router::new(layout, HashMap::new(), 0);

        let raw = sample_record(layout, 0xffff_ffff_8100_2004, 0, 99);
        router.route(&raw, 0, &symbols(), &hists, &mut session);
        assert_eq!(hists.total_period(), 0);
    }

    #[test]
    fn truncated_sample_is_counted_not_fatal() {
        let layout = SampleLayout { has_id: false, has_period: true };
        let hists = Hists::new(vec!["cycles".into()], vec![SortKey::Period]);
        let mut session = Session::new();
        let mut router = Router::new(layout, HashMap::new(), 0);

        let mut raw = sample_record(layout, 0xffff_ffff_8100_1800, 0, 42);
        raw.truncate(RECORD_HEADER_SIZE + 4);
        router.route(&raw, 0, &symbols(), &hists, &mut session);
        assert_eq!(router.decode_errors(), 1);
        assert_eq!(hists.total_period(), 0);
    }

    #[test]
    fn non_sample_records_reach_the_session() {
        let layout = SampleLayout { has_id: false, has_period: true };
        let hists = Hists::new(vec!["cycles".into()], vec![SortKey::Period]);
        let mut session = Session::new();
        let mut router = Router::new(layout, HashMap::new(), 0);

        let mut raw = Vec::new();
        raw.extend_from_slice(&perf::PERF_RECORD_FORK.to_ne_bytes());
        raw.extend_from_slice(&0u16.to_ne_bytes());
        raw.extend_from_slice(&24u16.to_ne_bytes());
        raw.extend_from_slice(&[0u8; 16]);
        router.route(&raw, 0, &symbols(), &hists, &mut session);
        assert_eq!(session.counts().1, 1);
        assert_eq!(hists.total_period(), 0);
    }
}
