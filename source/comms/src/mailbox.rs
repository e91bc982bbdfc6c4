//! Frame Mailbox
//!
//! A single slot, double buffered mailbox for handing serial frames from an
//! interrupt (the [`FrameProducer`]) to the bridge loop (the
//! [`FrameConsumer`]).
//!
//! The rules:
//!
//! * There are two buffers. At most one is `ready` (committed, not taken)
//!   and at most one is `reading` (claimed by the consumer).
//! * The producer only ever writes a buffer that is not `reading`, so the
//!   consumer can never observe a half written frame.
//! * If the producer commits while a frame is still `ready`, the old frame
//!   is dropped and counted as lost ("latest wins").
//! * The consumer clears `ready` in the same critical section that claims
//!   the buffer, before the bytes are read.
//!
//! State changes happen inside a [critical section][critical_section::with],
//! using only `load` and `store`, so this works on targets without CAS atomics.

use core::{
    future::Future,
    ptr::addr_of_mut,
    sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering},
    task::Poll,
};

use embassy_sync::waitqueue::AtomicWaker;
use futures::future::poll_fn;
use grounded::{const_init::ConstInit, uninit::GroundedArrayCell};

use crate::{Error, FrameSource, RawFrame, RAW_FRAME_LEN, SERIAL_FRAME_LEN};

const NONE: u8 = 0xFF;

#[repr(C)]
struct RawSlot {
    data: RawFrame,
}

impl ConstInit for RawSlot {
    const VAL: Self = RawSlot {
        data: [0u8; RAW_FRAME_LEN],
    };
}

/// Backing storage for the mailbox
///
/// Intended for static usage. Split it once with [`FrameMailbox::split()`]
/// into the interrupt facing and the loop facing halves.
pub struct FrameMailbox {
    bufs: GroundedArrayCell<RawSlot, 2>,
    ready: AtomicU8,
    reading: AtomicU8,
    lost: AtomicU16,
    waker: AtomicWaker,
    once: AtomicBool,
}

impl FrameMailbox {
    /// Create a new, empty mailbox
    pub const fn new() -> Self {
        Self {
            bufs: GroundedArrayCell::const_init(),
            ready: AtomicU8::new(NONE),
            reading: AtomicU8::new(NONE),
            lost: AtomicU16::new(0),
            waker: AtomicWaker::new(),
            once: AtomicBool::new(false),
        }
    }

    /// Attempt to split the mailbox into its producer and consumer halves
    ///
    /// The first call will return Some, all later calls will return None.
    pub fn split(&self) -> Option<(FrameProducer<'_>, FrameConsumer<'_>)> {
        critical_section::with(|_| {
            let old = self.once.load(Ordering::Acquire);
            self.once.store(true, Ordering::Release);
            !old
        })
        .then(|| {
            (
                FrameProducer {
                    mb: self,
                    partial: [0u8; SERIAL_FRAME_LEN],
                    fill: 0,
                },
                FrameConsumer { mb: self },
            )
        })
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) != NONE
    }

    /// ## Safety
    ///
    /// `idx` must be 0 or 1, and the caller must have exclusive access to
    /// that buffer according to the rules above.
    unsafe fn slot(&self, idx: u8) -> *mut RawFrame {
        let base: *mut RawSlot = self.bufs.as_mut_ptr();
        addr_of_mut!((*base.add(idx as usize)).data)
    }

    fn commit(&self, frame: &RawFrame) {
        let idx = critical_section::with(|_| {
            let ready = self.ready.load(Ordering::Acquire);
            if ready != NONE {
                // Nobody took the last frame, reuse its buffer
                self.ready.store(NONE, Ordering::Release);
                let lost = self.lost.load(Ordering::Relaxed);
                self.lost.store(lost.saturating_add(1), Ordering::Relaxed);
                ready
            } else if self.reading.load(Ordering::Acquire) == 0 {
                1
            } else {
                0
            }
        });

        // SAFETY: `idx` is neither ready nor reading, and only the
        // (unique) producer picks buffers to write.
        unsafe { self.slot(idx).write(*frame) };

        critical_section::with(|_| self.ready.store(idx, Ordering::Release));
        self.waker.wake();
    }

    fn take(&self) -> Result<Option<RawFrame>, Error> {
        let claimed = critical_section::with(|_| {
            let lost = self.lost.load(Ordering::Relaxed);
            if lost != 0 {
                self.lost.store(0, Ordering::Relaxed);
                return Err(Error::BufferOverrun { lost });
            }
            let ready = self.ready.load(Ordering::Acquire);
            if ready == NONE {
                return Ok(None);
            }
            self.ready.store(NONE, Ordering::Release);
            self.reading.store(ready, Ordering::Release);
            Ok(Some(ready))
        })?;

        let Some(idx) = claimed else {
            return Ok(None);
        };

        // SAFETY: `idx` is marked as reading, the producer won't touch it
        let frame = unsafe { self.slot(idx).read() };

        critical_section::with(|_| self.reading.store(NONE, Ordering::Release));
        Ok(Some(frame))
    }
}

impl Default for FrameMailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// The interrupt facing half of a [`FrameMailbox`]
pub struct FrameProducer<'a> {
    mb: &'a FrameMailbox,
    partial: [u8; SERIAL_FRAME_LEN],
    fill: usize,
}

impl<'a> FrameProducer<'a> {
    /// Commit a complete serial frame, as captured by a fixed length DMA
    /// transfer. The trailing terminator is ignored.
    pub fn push(&mut self, serial: &[u8; SERIAL_FRAME_LEN]) {
        let mut raw = [0u8; RAW_FRAME_LEN];
        raw.copy_from_slice(&serial[..RAW_FRAME_LEN]);
        self.mb.commit(&raw);
    }

    /// Commit the significant bytes of a frame
    pub fn push_raw(&mut self, raw: &RawFrame) {
        self.mb.commit(raw);
    }

    /// Feed a single received byte.
    ///
    /// Returns true when the byte completed a frame, which has then been
    /// committed.
    pub fn feed(&mut self, byte: u8) -> bool {
        self.partial[self.fill] = byte;
        self.fill += 1;
        if self.fill < SERIAL_FRAME_LEN {
            return false;
        }
        self.fill = 0;
        let serial = self.partial;
        self.push(&serial);
        true
    }

    /// Drop any partially fed frame, e.g. after a UART framing error
    pub fn reset(&mut self) {
        self.fill = 0;
    }

    /// Number of bytes of the partially fed frame
    pub fn pending_bytes(&self) -> usize {
        self.fill
    }
}

/// The loop facing half of a [`FrameMailbox`]
pub struct FrameConsumer<'a> {
    mb: &'a FrameMailbox,
}

impl<'a> FrameConsumer<'a> {
    /// Wait until a frame is ready
    pub fn wait(&self) -> impl Future<Output = ()> + 'a {
        let mb = self.mb;
        poll_fn(move |cx| {
            // Register first, so a commit between check and return still wakes us
            mb.waker.register(cx.waker());
            if mb.is_ready() {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
    }
}

impl<'a> FrameSource for FrameConsumer<'a> {
    fn frame_available(&self) -> bool {
        self.mb.is_ready()
    }

    fn take_frame(&mut self) -> Result<Option<RawFrame>, Error> {
        self.mb.take()
    }

    async fn wait_available(&mut self) {
        self.wait().await
    }
}
