//! Live terminal renderer.
//!
//! Runs on its own thread, owns the terminal in raw mode, and alternates
//! between waiting for input and repainting histogram snapshots. Raw mode is
//! restored by a drop guard so every exit path, including errors, leaves the
//! terminal usable. Quitting with `q` flips the shared shutdown flag so the
//! control loop unwinds too.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::{cursor, execute, queue, style};
use log::info;

use crate::display::geometry;
use crate::hist::Hists;

/// Steady-state repaint interval.
const REFRESH: Duration = Duration::from_millis(2000);
/// Input poll slice; bounds the latency of noticing the shutdown flag.
const POLL_SLICE: Duration = Duration::from_millis(100);

struct RawModeGuard;

impl RawModeGuard {
    fn enter() -> Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawModeGuard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let _ = execute!(io::stdout(), cursor::Show);
    }
}

/// Renderer thread entry point. Returns after `q`, a terminal error, or
/// when the shutdown flag is set elsewhere; always flips the flag on the
/// way out.
pub fn run(hists: &Hists, shutdown: &AtomicBool) -> Result<()> {
    let result = run_inner(hists, shutdown);
    shutdown.store(true, Ordering::Relaxed);
    info!("renderer exiting");
    result
}

fn run_inner(hists: &Hists, shutdown: &AtomicBool) -> Result<()> {
    let _guard = RawModeGuard::enter()?;

    // Nothing is written to the terminal until the first keypress; the
    // screen keeps whatever was on it when we started.
    let gate = await_first_key(shutdown, |timeout| {
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                return Ok(Some(key));
            }
        }
        Ok(None)
    })?;
    if gate == Gate::Quit {
        return Ok(());
    }

    loop {
        render(hists)?;

        let mut waited = Duration::ZERO;
        while waited < REFRESH {
            if shutdown.load(Ordering::Relaxed) {
                return Ok(());
            }
            if event::poll(POLL_SLICE)? {
                match event::read()? {
                    Event::Key(key) if is_quit(&key) => return Ok(()),
                    // Any other key or a resize repaints immediately
                    Event::Key(_) | Event::Resize(..) => break,
                    _ => {}
                }
            } else {
                waited += POLL_SLICE;
            }
        }
    }
}

/// Outcome of the pre-render input gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Render,
    Quit,
}

/// Wait for the first keypress without touching the terminal. Bounded polls
/// keep the wait responsive to the shared shutdown flag; a quit key here
/// means the session ends before anything was ever painted.
fn await_first_key(
    shutdown: &AtomicBool,
    mut next_key: impl FnMut(Duration) -> Result<Option<KeyEvent>>,
) -> Result<Gate> {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return Ok(Gate::Quit);
        }
        if let Some(key) = next_key(POLL_SLICE)? {
            if is_quit(&key) {
                return Ok(Gate::Quit);
            }
            return Ok(Gate::Render);
        }
    }
}

fn is_quit(key: &KeyEvent) -> bool {
    matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
        || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
}

/// One full repaint: clear, then each stream's formatted histogram stacked
/// top to bottom within the current geometry.
fn render(hists: &Hists) -> Result<()> {
    let (rows, cols) = geometry::current();
    let mut out = io::stdout();

    queue!(out, Clear(ClearType::All), cursor::MoveTo(0, 0))?;

    let streams = hists.nr_streams().max(1);
    let per_stream = (rows as usize / streams).max(2);
    for stream in 0..hists.nr_streams() {
        let text = hists.collapse_and_format(stream, cols as usize, per_stream - 1);
        for line in text.lines() {
            queue!(out, style::Print(line), cursor::MoveToNextLine(1))?;
        }
        queue!(out, cursor::MoveToNextLine(1))?;
    }

    out.flush()?;
    Ok(())
}
