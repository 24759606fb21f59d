//! Kernel symbol resolution.
//!
//! The symbol table is loaded once at startup from `/proc/kallsyms`, sorted
//! by address, and shared read-only for the rest of the run. Lookup maps an
//! instruction pointer to the nearest preceding symbol.
//!
//! Idle routines and section boundary markers are filtered out at
//! accounting time so an idle machine does not drown the profile; the
//! tables below mirror the routines the kernel parks in.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{debug, info};

use crate::domain::ProfilerError;

/// Exact symbol names that never reach a histogram.
const SKIP_EXACT: &[&str] = &[
    "default_idle",
    "native_safe_halt",
    "cpu_idle",
    "enter_idle",
    "exit_idle",
    "mwait_idle",
    "mwait_idle_with_hints",
    "poll_idle",
    "ppc64_runlatch_off",
    "pseries_dedicated_idle_sleep",
    "_text",
    "_etext",
    "_sinittext",
];

/// Prefixes of module lifecycle entry points.
const SKIP_PREFIX: &[&str] = &["init_module", "cleanup_module"];

/// Substrings marking section boundary symbols.
const SKIP_SUBSTRING: &[&str] = &["_text_start", "_text_end"];

/// Result of classifying one instruction pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified<'a> {
    pub name: &'a str,
    /// True for idle and boundary symbols that must not be accounted.
    pub ignore: bool,
}

/// Address-sorted kernel symbol table.
pub struct KernelSymbols {
    /// (start address, display name), sorted by address.
    syms: Vec<(u64, String)>,
}

impl KernelSymbols {
    /// Load the running kernel's symbol table.
    ///
    /// # Errors
    /// Fails when `/proc/kallsyms` cannot be opened or parsed; an
    /// unreadable table (all-zero addresses under a restrictive
    /// `kptr_restrict`) still loads and resolves everything to the first
    /// entry, which the caller surfaces through `[unknown]` rates.
    pub fn load() -> Result<Self, ProfilerError> {
        let table = Self::parse_reader(BufReader::new(File::open(Path::new("/proc/kallsyms"))?))?;
        info!("loaded {} kernel symbols", table.syms.len());
        Ok(table)
    }

    /// Parse a kallsyms-format stream: `address type name [module]` per line.
    /// Non-function entries and malformed lines are skipped.
    ///
    /// # Errors
    /// Propagates read failures from the underlying stream.
    pub fn parse_reader<R: BufRead>(reader: R) -> Result<Self, ProfilerError> {
        let mut syms = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let mut fields = line.split_whitespace();
            let (Some(addr), Some(kind), Some(name)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            // Text symbols only
            if !matches!(kind, "t" | "T" | "w" | "W") {
                continue;
            }
            let Ok(addr) = u64::from_str_radix(addr, 16) else {
                debug!("skipping unparseable kallsyms line: {line}");
                continue;
            };
            syms.push((addr, normalize(name).to_string()));
        }
        syms.sort_unstable_by_key(|&(addr, _)| addr);
        syms.dedup_by(|a, b| a.0 == b.0);
        Ok(KernelSymbols { syms })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.syms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.syms.is_empty()
    }

    /// Classify an instruction pointer: nearest preceding symbol, or
    /// `[unknown]` when the address lies before the first symbol or the
    /// table is empty. The ignore flag is set for denylisted names.
    #[must_use]
    pub fn classify(&self, ip: u64) -> Classified<'_> {
        let idx = self.syms.partition_point(|&(addr, _)| addr <= ip);
        if idx == 0 {
            return Classified { name: "[unknown]", ignore: false };
        }
        let name = self.syms[idx - 1].1.as_str();
        Classified { name, ignore: is_skipped(name) }
    }
}

/// ppc64 function descriptors carry a leading dot; strip it so the
/// denylist and display names match across architectures.
fn normalize(name: &str) -> &str {
    name.strip_prefix('.').unwrap_or(name)
}

fn is_skipped(name: &str) -> bool {
    SKIP_EXACT.contains(&name)
        || SKIP_PREFIX.iter().any(|p| name.starts_with(p))
        || SKIP_SUBSTRING.iter().any(|s| name.contains(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn table(text: &str) -> KernelSymbols {
        KernelSymbols::parse_reader(Cursor::new(text)).unwrap()
    }

    #[test]
    fn lookup_finds_nearest_preceding_symbol() {
        let t = table(
            "ffffffff81000000 T _stext\n\
             ffffffff81001000 T do_sys_open\n\
             ffffffff81002000 t vfs_read\n",
        );
        assert_eq!(t.classify(0xffff_ffff_8100_1800).name, "do_sys_open");
        assert_eq!(t.classify(0xffff_ffff_8100_2000).name, "vfs_read");
        assert_eq!(t.classify(0xffff_ffff_8999_0000).name, "vfs_read");
    }

    #[test]
    fn address_before_first_symbol_is_unknown() {
        let t = table("ffffffff81001000 T do_sys_open\n");
        let c = t.classify(0x1000);
        assert_eq!(c.name, "[unknown]");
        assert!(!c.ignore);
    }

    #[test]
    fn idle_and_boundary_symbols_are_flagged() {
        let t = table(
            "ffffffff81000000 T _text\n\
             ffffffff81001000 T default_idle\n\
             ffffffff81002000 T init_module_foo\n\
             ffffffff81003000 T my_text_end_marker\n\
             ffffffff81004000 T schedule\n",
        );
        assert!(t.classify(0xffff_ffff_8100_0001).ignore);
        assert!(t.classify(0xffff_ffff_8100_1001).ignore);
        assert!(t.classify(0xffff_ffff_8100_2001).ignore);
        assert!(t.classify(0xffff_ffff_8100_3001).ignore);
        assert!(!t.classify(0xffff_ffff_8100_4001).ignore);
    }

    #[test]
    fn leading_dot_is_stripped_before_matching() {
        let t = table(
            "c000000000010000 T .default_idle\n\
             c000000000020000 T .schedule\n",
        );
        let c = t.classify(0xc000_0000_0001_0004);
        assert_eq!(c.name, "default_idle");
        assert!(c.ignore);
        assert!(!t.classify(0xc000_0000_0002_0004).ignore);
    }

    #[test]
    fn data_symbols_are_not_loaded() {
        let t = table(
            "ffffffff81001000 T do_sys_open\n\
             ffffffff82000000 D jiffies\n",
        );
        assert_eq!(t.len(), 1);
    }
}
