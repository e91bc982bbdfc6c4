//! # LIN-2-USB Comms
//!
//! This is the core of a serial-to-LIN adapter. A host (usually a PC on the
//! other end of a USB-serial link) sends LIN payloads over a UART, and the
//! device answers LIN bus polls for those identifiers as a slave publisher.
//!
//! The hardware specific parts (UART + DMA, the LIN capable USART, clocks and
//! pins) live in a board crate. This crate only needs two abstract operations
//! from them, expressed as the [`FrameSource`] and [`BusResponder`] traits.
//!
//! ## Serial Framing
//!
//! Every frame on the serial link is exactly [`SERIAL_FRAME_LEN`] bytes:
//!
//! ```text
//! [ id | d0 | d1 | d2 | d3 | d4 | d5 | d6 | d7 | terminator ]
//! ```
//!
//! The receiver collects ten bytes (typically with a DMA transfer of fixed
//! length), then hands the first [`RAW_FRAME_LEN`] bytes to the core. The
//! terminator is never inspected, so payload bytes may take any value.
//!
//! The identifier byte is the raw 6-bit LIN frame identifier (`0..=63`), NOT
//! the protected identifier with parity bits. Bytes `0x40..=0xFF` are rejected
//! as [`Error::MalformedFrame`]. There is no checksum on the serial link.
//!
//! ## Data Flow
//!
//! ```text
//! UART ISR -> FrameMailbox -> parse -> IdCache -> Registry -> BusResponder
//! ```
//!
//! 1. The UART interrupt commits a completed frame into the
//!    [`FrameMailbox`][mailbox::FrameMailbox] and wakes the bridge.
//! 2. The [`Bridge`][bridge::Bridge] takes the frame, which clears the
//!    availability flag before the bytes are read.
//! 3. The frame is parsed into a [`LinId`] and a [`Payload`].
//! 4. The payload overwrites the [`IdCache`][cache::IdCache] slot for that id.
//! 5. The [`Registry`][registry::Registry] publishes the fresh payload to the
//!    bus responder, on EVERY update, not only the first time an id is seen.
//!
//! ## Publishing
//!
//! Responders are allowed to snapshot the payload at registration time (the
//! provided [`SnapshotResponder`][responder::SnapshotResponder] does). For
//! that reason the registry re-registers an identifier every time its cached
//! payload changes, reusing the slot it was assigned the first time. An
//! identifier never occupies more than one slot.
//!
//! ## Overruns
//!
//! The mailbox is double buffered, so the interrupt never writes the buffer
//! that the bridge is reading. If two frames complete before the bridge gets
//! around to taking the first, the newer frame replaces the older one, and the
//! next take reports [`Error::BufferOverrun`] with the number of frames lost.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![allow(async_fn_in_trait)]
#![warn(missing_docs)]

#[macro_use]
mod macros;

pub mod bridge;
pub mod cache;
pub mod frame;
pub mod mailbox;
pub mod registry;
pub mod responder;

pub use crate::bridge::{Bridge, BridgeCfg};

use crate::registry::ResponseDescriptor;

/// The number of LIN frame identifiers, and so the size of the cache
/// and of the default registry.
pub const MAX_IDS: usize = 64;

/// Data length of every published LIN response.
pub const PAYLOAD_LEN: usize = 8;

/// Number of significant bytes in a serial frame: one id byte and the payload.
pub const RAW_FRAME_LEN: usize = 1 + PAYLOAD_LEN;

/// Number of bytes the serial receiver collects per frame, including the
/// trailing terminator.
pub const SERIAL_FRAME_LEN: usize = RAW_FRAME_LEN + 1;

/// LIN slave node number used when none is configured.
pub const DEFAULT_NODE: u8 = 1;

/// LIN bit rate used when none is configured.
pub const DEFAULT_LIN_BAUD: u32 = 10_400;

/// The data of a single LIN response
pub type Payload = [u8; PAYLOAD_LEN];

/// The significant bytes of one serial frame, `[id, d0..d7]`
pub type RawFrame = [u8; RAW_FRAME_LEN];

/// A LIN frame identifier in the range `0..=63`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub struct LinId(u8);

impl LinId {
    /// The largest valid identifier
    pub const MAX: LinId = LinId((MAX_IDS - 1) as u8);

    /// Create an identifier, returning `None` if `id` is out of range
    pub const fn new(id: u8) -> Option<Self> {
        if (id as usize) < MAX_IDS {
            Some(LinId(id))
        } else {
            None
        }
    }

    /// The raw identifier value
    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// The identifier as a table index
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Iterate over every valid identifier, in ascending order
    pub fn all() -> impl Iterator<Item = LinId> {
        (0..MAX_IDS as u8).map(LinId)
    }
}

impl TryFrom<u8> for LinId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        LinId::new(value).ok_or(Error::MalformedFrame { id: value })
    }
}

impl From<LinId> for u8 {
    fn from(val: LinId) -> Self {
        val.0
    }
}

/// Errors of the bridge core
///
/// None of these are fatal. The bridge reports them, counts them, and goes
/// back to waiting for the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The identifier byte of a frame was outside of `0..=63`
    MalformedFrame {
        /// The offending identifier byte
        id: u8,
    },
    /// No registration slot is left for a new identifier
    CapacityExceeded,
    /// Frames were replaced in the receive mailbox before they were taken
    BufferOverrun {
        /// Number of frames that were lost
        lost: u16,
    },
    /// The bus responder refused the request for a reason other than capacity
    Responder,
}

/// An error reported by a [`BusResponder`]
#[derive(Debug, PartialEq)]
#[non_exhaustive]
pub enum PublishError<E> {
    /// The responder has no room for another descriptor
    CapacityExceeded,
    /// Some error with the underlying LIN peripheral
    Driver(E),
}

impl<E> From<E> for PublishError<E> {
    fn from(value: E) -> Self {
        Self::Driver(value)
    }
}

/// The receiving side of the serial link
///
/// Implementations deliver complete frames that were captured
/// asynchronously, typically from an interrupt.
pub trait FrameSource {
    /// Is a complete frame waiting to be taken?
    fn frame_available(&self) -> bool;

    /// Take the pending frame, if any.
    ///
    /// This MUST clear the availability flag before the frame bytes are
    /// read, so that a frame completing during processing is not missed.
    ///
    /// Returns `Ok(None)` when no frame is pending. Implementations that can
    /// detect lost frames report them with [`Error::BufferOverrun`], and
    /// leave the newest frame pending.
    fn take_frame(&mut self) -> Result<Option<RawFrame>, Error>;

    /// Wait until [`FrameSource::frame_available`] would return true.
    ///
    /// Returns immediately if a frame is already pending.
    async fn wait_available(&mut self);
}

/// The LIN side of the bridge
///
/// A responder answers the bus master's polls with the payload of the
/// descriptor registered for the polled identifier.
pub trait BusResponder {
    /// The error type of the underlying LIN peripheral
    type DriverError;

    /// Put the LIN peripheral into slave publish mode.
    fn init(&mut self, node: u8, baud: u32) -> Result<(), Self::DriverError>;

    /// Register (or re-register) `descriptor` in `slot`, publishing `payload`.
    ///
    /// After this returns `Ok`, every poll for `descriptor.id` MUST be
    /// answered with `payload` until the slot is registered again.
    fn register_publisher(
        &mut self,
        node: u8,
        slot: usize,
        descriptor: &ResponseDescriptor,
        payload: &Payload,
    ) -> Result<(), PublishError<Self::DriverError>>;
}
