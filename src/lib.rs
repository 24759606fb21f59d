//! # perftop - Live Terminal CPU Sampling Profiler
//!
//! perftop samples instruction pointers through `perf_event_open(2)` and
//! shows a continuously refreshing ranked view of where the kernel is
//! spending its cycles, system-wide or for a single process.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Kernel (perf events)                    │
//! │   one counter per (CPU, event), one mmapped ring each       │
//! └───────────────────────┬─────────────────────────────────────┘
//!                         │ SAMPLE / COMM / LOST records
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  perftop (this crate)                       │
//! │                                                             │
//! │  ┌──────────┐   ┌────────┐   ┌─────────┐   ┌───────────┐  │
//! │  │ sampling │──▶│ router │──▶│  hist   │──▶│  display  │  │
//! │  │ (rings)  │   │        │   │(per     │   │ (renderer │  │
//! │  └──────────┘   └───┬────┘   │ stream) │   │  thread)  │  │
//! │                     │        └─────────┘   └───────────┘  │
//! │                     ▼                                       │
//! │              ┌─────────────┐   ┌─────────┐                 │
//! │              │   symbols   │   │ session │                 │
//! │              │ (kallsyms)  │   │ (comm)  │                 │
//! │              └─────────────┘   └─────────┘                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`sampling`]: counter descriptors, the open/fallback negotiation,
//!   per-counter ring buffers, and the record router
//! - [`hist`]: per-event-stream symbol histograms, shared between the
//!   control loop (writer) and the renderer (reader)
//! - [`symbols`]: `/proc/kallsyms` symbol table with the idle/boundary
//!   denylist
//! - [`session`]: bookkeeping for non-sample records and the startup
//!   thread snapshot
//! - [`display`]: terminal geometry tracking and the raw-mode renderer
//!   thread
//! - [`top`]: the control loop tying the above together
//! - [`cli`], [`config`]: argument parsing and the validated immutable
//!   run configuration
//! - [`domain`]: shared newtypes and the error enum
//!
//! ## Typical Usage
//!
//! ```bash
//! # Whole-system cycles profile at 1000 Hz
//! sudo perftop
//!
//! # Two event streams, sorted by symbol name
//! sudo perftop -e cycles -e cache-misses -s symbol
//!
//! # One process, fixed sample period
//! sudo perftop -p 1234 -c 100000
//! ```

pub mod cli;
pub mod config;
pub mod display;
pub mod domain;
pub mod hist;
pub mod sampling;
pub mod session;
pub mod symbols;
pub mod top;
