//! Per-counter sample ring buffers.
//!
//! Each counter fd gets one mmapped region: a header page the kernel and we
//! use for the head/tail handshake, followed by a power-of-two number of data
//! pages. The kernel advances `data_head` as it writes records; we consume up
//! to that point and publish our progress through `data_tail` so the kernel
//! can reuse the space.
//!
//! Record headers are 8 bytes and every record offset is 8-byte aligned, so
//! a header never straddles the wrap point. Bodies can, and are reassembled
//! into a scratch buffer before being handed to the consumer.

#![allow(unsafe_code)]

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};

use log::warn;
use perf_event_open_sys::bindings as perf;

use crate::domain::ProfilerError;

/// Size of the on-wire record header: type u32, misc u16, size u16.
pub const RECORD_HEADER_SIZE: usize = 8;

pub struct RingBuffer {
    /// Start of the header page (`perf_event_mmap_page`).
    base: *mut u8,
    /// First byte of the data pages.
    data: *mut u8,
    /// Total data bytes; always a power of two.
    data_size: u64,
    /// Full mapped length, zero when the region is caller-owned.
    mmap_len: usize,
    scratch: Vec<u8>,
}

impl RingBuffer {
    /// Map `page_count` data pages (plus the header page) over a counter fd.
    ///
    /// # Errors
    /// Returns `RingMap` when the kernel refuses the mapping, typically from
    /// an exceeded mlock budget.
    pub fn map(fd: BorrowedFd<'_>, page_count: u32) -> Result<Self, ProfilerError> {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let data_size = page_count as u64 * page_size as u64;
        let mmap_len = (page_count as usize + 1) * page_size;

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mmap_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(ProfilerError::RingMap {
                bytes: mmap_len,
                msg: io::Error::last_os_error().to_string(),
            });
        }

        let base = base.cast::<u8>();
        Ok(RingBuffer {
            base,
            data: unsafe { base.add(page_size) },
            data_size,
            mmap_len,
            scratch: Vec::new(),
        })
    }

    /// Build a ring over a caller-owned region, for exercising the drain
    /// protocol without a kernel producer.
    ///
    /// # Safety
    /// `header` must point to a zero-initialized `perf_event_mmap_page` and
    /// `data` to at least `data_size` bytes, both 8-byte aligned and outliving
    /// the returned ring. `data_size` must be a power of two.
    #[must_use]
    pub unsafe fn from_raw(header: *mut u8, data: *mut u8, data_size: u64) -> Self {
        RingBuffer { base: header, data, data_size, mmap_len: 0, scratch: Vec::new() }
    }

    fn head(&self) -> &AtomicU64 {
        let page = self.base.cast::<perf::perf_event_mmap_page>();
        unsafe { &*ptr::addr_of!((*page).data_head).cast::<AtomicU64>() }
    }

    fn tail(&self) -> &AtomicU64 {
        let page = self.base.cast::<perf::perf_event_mmap_page>();
        unsafe { &*ptr::addr_of!((*page).data_tail).cast::<AtomicU64>() }
    }

    /// Consume every complete record currently in the buffer, passing each
    /// one (header included) to `f` as a contiguous byte slice.
    ///
    /// The tail is published after each record, so an interrupted drain can
    /// be restarted without replaying anything. Draining an empty or
    /// kernel-quiet buffer is a no-op.
    pub fn drain(&mut self, mut f: impl FnMut(&[u8])) {
        let head = self.head().load(Ordering::Acquire);
        let mut tail = self.tail().load(Ordering::Relaxed);
        let mask = self.data_size - 1;

        while tail < head {
            let off = (tail & mask) as usize;
            let header = unsafe { &*self.data.add(off).cast::<perf::perf_event_header>() };
            let size = u64::from(header.size);
            if size == 0 || size > self.data_size {
                // Corrupt header; drop everything pending and resynchronize.
                warn!("bad record size {size} at ring offset {off}, discarding buffer");
                tail = head;
                break;
            }

            if off as u64 + size <= self.data_size {
                let record = unsafe { slice::from_raw_parts(self.data.add(off), size as usize) };
                f(record);
            } else {
                let first = (self.data_size - off as u64) as usize;
                self.scratch.clear();
                self.scratch.extend_from_slice(unsafe {
                    slice::from_raw_parts(self.data.add(off), first)
                });
                self.scratch.extend_from_slice(unsafe {
                    slice::from_raw_parts(self.data, size as usize - first)
                });
                f(&self.scratch);
            }

            tail += size;
            self.tail().store(tail, Ordering::Release);
        }

        self.tail().store(tail, Ordering::Release);
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        if self.mmap_len > 0 {
            unsafe {
                libc::munmap(self.base.cast(), self.mmap_len);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    /// Owns the backing store for a synthetic ring. u64 backing keeps the
    /// region 8-byte aligned.
    struct TestRegion {
        header: Box<perf::perf_event_mmap_page>,
        data: Vec<u64>,
    }

    impl TestRegion {
        fn new(data_bytes: usize) -> Self {
            assert!(data_bytes.is_power_of_two());
            TestRegion {
                header: Box::new(unsafe { mem::zeroed() }),
                data: vec![0u64; data_bytes / 8],
            }
        }

        fn ring(&mut self) -> RingBuffer {
            unsafe {
                RingBuffer::from_raw(
                    ptr::addr_of_mut!(*self.header).cast(),
                    self.data.as_mut_ptr().cast(),
                    (self.data.len() * 8) as u64,
                )
            }
        }

        fn bytes(&mut self) -> &mut [u8] {
            unsafe {
                slice::from_raw_parts_mut(self.data.as_mut_ptr().cast::<u8>(), self.data.len() * 8)
            }
        }

        /// Write a record at a logical offset, wrapping the body if needed.
        fn put_record(&mut self, offset: usize, kind: u32, body: &[u8]) {
            let size = (RECORD_HEADER_SIZE + body.len()) as u16;
            let len = self.data.len() * 8;
            let bytes = self.bytes();
            bytes[offset..offset + 4].copy_from_slice(&kind.to_ne_bytes());
            bytes[offset + 4..offset + 6].copy_from_slice(&0u16.to_ne_bytes());
            bytes[offset + 6..offset + 8].copy_from_slice(&size.to_ne_bytes());
            for (i, &b) in body.iter().enumerate() {
                bytes[(offset + RECORD_HEADER_SIZE + i) % len] = b;
            }
        }
    }

    #[test]
    fn drains_contiguous_records_once() {
        let mut region = TestRegion::new(256);
        region.put_record(0, 9, &[1u8; 16]);
        region.put_record(24, 2, &[2u8; 16]);
        region.header.data_head = 48;

        let mut ring = region.ring();
        let mut seen = Vec::new();
        ring.drain(|rec| seen.push(rec.to_vec()));

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].len(), 24);
        assert_eq!(seen[0][8..], [1u8; 16]);
        assert_eq!(seen[1][8..], [2u8; 16]);

        // Tail caught up with head; a second drain yields nothing.
        let mut again = 0;
        ring.drain(|_| again += 1);
        assert_eq!(again, 0);
        assert_eq!(region.header.data_tail, 48);
    }

    #[test]
    fn reassembles_a_wrap_split_body() {
        let mut region = TestRegion::new(64);
        let body: Vec<u8> = (0..16).collect();
        region.put_record(56, 9, &body);
        region.header.data_tail = 56;
        region.header.data_head = 80;

        let mut ring = region.ring();
        let mut seen = Vec::new();
        ring.drain(|rec| seen.push(rec.to_vec()));

        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].len(), 24);
        assert_eq!(seen[0][8..], body[..]);
        assert_eq!(region.header.data_tail, 80);
    }

    #[test]
    fn corrupt_size_discards_pending_data() {
        let mut region = TestRegion::new(64);
        region.put_record(0, 9, &[0u8; 8]);
        // Zero out the size field of the record header.
        region.bytes()[6..8].copy_from_slice(&0u16.to_ne_bytes());
        region.header.data_head = 16;

        let mut ring = region.ring();
        let mut seen = 0;
        ring.drain(|_| seen += 1);
        assert_eq!(seen, 0);
        assert_eq!(region.header.data_tail, 16);
    }
}
