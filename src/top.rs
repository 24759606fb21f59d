//! Control loop: startup sequencing, the steady drain/poll cycle, and
//! teardown.
//!
//! Two threads run for the life of the session. This one opens the counters,
//! maps the rings, and drains them; the renderer owns the terminal. A shared
//! shutdown flag connects the two: whichever side finishes first flips it
//! and the other unwinds, so counters are closed, rings unmapped, and raw
//! mode restored no matter who initiated the exit.

#![allow(unsafe_code)]

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use log::{debug, info};

use crate::config::TopConfig;
use crate::display::{geometry, renderer};
use crate::domain::ProfilerError;
use crate::hist::Hists;
use crate::sampling::descriptor::SampleLayout;
use crate::sampling::evlist::{online_cpus, EventList, OpenedCounter};
use crate::sampling::ring::RingBuffer;
use crate::sampling::router::Router;
use crate::session::Session;
use crate::symbols::KernelSymbols;

/// Drain-idle poll timeout in milliseconds.
const POLL_TIMEOUT_MS: i32 = 100;

/// Run one profiling session to completion.
///
/// # Errors
/// Startup failures (permissions, unsupported events, mmap) abort before
/// any thread is spawned; steady-state poll failures stop the session and
/// propagate after the renderer has been joined.
pub fn run(cfg: &TopConfig) -> Result<()> {
    let cpus = online_cpus()?;
    info!("profiling {} event(s) on {} cpu(s)", cfg.nr_streams(), cpus.len());

    let symbols = KernelSymbols::load()?;
    let counters = EventList::from_config(cfg).open_all(cfg, &cpus)?;

    let mut rings = Vec::with_capacity(counters.len());
    for counter in &counters {
        rings.push(RingBuffer::map(counter.fd(), cfg.mmap_pages)?);
    }
    info!("mapped {} ring buffer(s) of {} pages", rings.len(), cfg.mmap_pages);

    let mut session = Session::new();
    session.snapshot_threads(cfg.pid);

    geometry::install();

    let id_to_stream: HashMap<u64, usize> = if cfg.nr_streams() > 1 {
        counters.iter().map(|c| (c.id(), c.stream())).collect()
    } else {
        HashMap::new()
    };
    let mut router = Router::new(SampleLayout::from_config(cfg), id_to_stream, cfg.period);

    let hists = Arc::new(Hists::new(
        cfg.events.iter().map(|e| e.name().to_string()).collect(),
        cfg.sort_keys.clone(),
    ));
    let shutdown = Arc::new(AtomicBool::new(false));

    let mut pollfds: Vec<libc::pollfd> = counters
        .iter()
        .map(|c| libc::pollfd { fd: c.raw_fd(), events: libc::POLLIN, revents: 0 })
        .collect();

    // Give the counters one interval to produce before the first paint.
    wait_for_events(&mut pollfds)?;
    drain_all(&mut rings, &counters, &mut router, &symbols, &hists, &mut session);

    // The renderer stays silent until the first keypress, so the hint goes
    // to stderr before the thread takes over the terminal.
    eprintln!("perftop: collecting samples, press any key to display ('q' quits)");

    let renderer_handle = {
        let hists = Arc::clone(&hists);
        let shutdown = Arc::clone(&shutdown);
        thread::Builder::new()
            .name("renderer".into())
            .spawn(move || renderer::run(&hists, &shutdown))?
    };

    let loop_result = steady_loop(
        &mut rings,
        &counters,
        &mut router,
        &symbols,
        &hists,
        &mut session,
        &mut pollfds,
        &shutdown,
    );

    shutdown.store(true, Ordering::Relaxed);
    let renderer_result = match renderer_handle.join() {
        Ok(res) => res,
        Err(_) => Err(anyhow::anyhow!("renderer thread panicked")),
    };

    info!(
        "session done: {} lost sample(s), {} undecodable record(s)",
        session.lost_samples(),
        router.decode_errors()
    );

    loop_result?;
    renderer_result
}

#[allow(clippy::too_many_arguments)]
fn steady_loop(
    rings: &mut [RingBuffer],
    counters: &[OpenedCounter],
    router: &mut Router,
    symbols: &KernelSymbols,
    hists: &Hists,
    session: &mut Session,
    pollfds: &mut [libc::pollfd],
    shutdown: &AtomicBool,
) -> Result<()> {
    while !shutdown.load(Ordering::Relaxed) {
        let before = hists.total_period();
        drain_all(rings, counters, router, symbols, hists, session);
        if hists.total_period() == before {
            wait_for_events(pollfds)?;
        }
    }
    Ok(())
}

/// One pass over every ring in registration order.
fn drain_all(
    rings: &mut [RingBuffer],
    counters: &[OpenedCounter],
    router: &mut Router,
    symbols: &KernelSymbols,
    hists: &Hists,
    session: &mut Session,
) {
    for (ring, counter) in rings.iter_mut().zip(counters) {
        ring.drain(|raw| router.route(raw, counter.stream(), symbols, hists, session));
    }
}

/// Block for up to the poll timeout waiting for any counter to signal data.
/// EINTR (a window resize, most likely) is not an error.
fn wait_for_events(pollfds: &mut [libc::pollfd]) -> Result<(), ProfilerError> {
    let rc = unsafe {
        libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, POLL_TIMEOUT_MS)
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            debug!("poll interrupted, continuing");
            return Ok(());
        }
        return Err(ProfilerError::Poll(err.to_string()));
    }
    Ok(())
}
