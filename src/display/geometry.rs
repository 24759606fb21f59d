//! Terminal geometry, kept current by a SIGWINCH handler.
//!
//! The handler is async-signal-safe by construction: one ioctl and two
//! relaxed atomic stores, no allocation, no locks. The renderer is the only
//! reader and simply sees whichever size was published last.

#![allow(unsafe_code)]

use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU16, Ordering};

static ROWS: AtomicU16 = AtomicU16::new(24);
static COLS: AtomicU16 = AtomicU16::new(80);

/// Query the terminal size once and keep it updated on window changes.
pub fn install() {
    query();

    let handler: extern "C" fn(libc::c_int) = on_winch;
    let mut sa: libc::sigaction = unsafe { mem::zeroed() };
    sa.sa_sigaction = handler as usize;
    sa.sa_flags = libc::SA_RESTART;
    unsafe {
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGWINCH, &sa, ptr::null_mut());
    }
}

/// Current (rows, cols). Falls back to 24x80 when the terminal never
/// answered the size query.
#[must_use]
pub fn current() -> (u16, u16) {
    (ROWS.load(Ordering::Relaxed), COLS.load(Ordering::Relaxed))
}

extern "C" fn on_winch(_: libc::c_int) {
    query();
}

fn query() {
    let mut ws: libc::winsize = unsafe { mem::zeroed() };
    let rc = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut ws) };
    if rc == 0 && ws.ws_row > 0 && ws.ws_col > 0 {
        ROWS.store(ws.ws_row, Ordering::Relaxed);
        COLS.store(ws.ws_col, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_always_reports_a_usable_size() {
        let (rows, cols) = current();
        assert!(rows > 0);
        assert!(cols > 0);
    }
}
