//! Snapshot Responder
//!
//! A [`BusResponder`] that keeps its own copy of each registered payload.
//!
//! Board crates whose LIN peripheral needs the response bytes handed over at
//! the time a header is received can share one [`SnapshotResponder`] between
//! the bridge (which registers payloads) and the LIN interrupt (which calls
//! [`SnapshotResponder::poll()`] to fetch the answer for the polled id).
//!
//! Because the payload is copied at registration time, a payload change is
//! only ever visible on the bus after the identifier has been registered
//! again.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};

use crate::{
    registry::{ResponseDescriptor, ResponseKind},
    BusResponder, LinId, Payload, PublishError, MAX_IDS,
};

/// Errors reported by the [`SnapshotResponder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub enum SnapshotError {
    /// A descriptor was registered before [`BusResponder::init()`]
    NotStarted,
    /// A descriptor was registered for a node other than ours
    WrongNode,
    /// The identifier is already registered in another slot
    DuplicateId,
}

#[derive(Clone, Copy)]
struct Entry {
    descriptor: ResponseDescriptor,
    payload: Payload,
    served: u32,
}

struct Table<const N: usize> {
    node: Option<u8>,
    baud: u32,
    slots: [Option<Entry>; N],
}

/// Publishes payloads from copies taken at registration time
///
/// The table is behind a blocking mutex, so an interrupt handler can
/// [`poll()`][Self::poll] while the bridge registers. Use a
/// `CriticalSectionRawMutex` when that is the case.
pub struct SnapshotResponder<R: RawMutex, const N: usize = MAX_IDS> {
    inner: Mutex<R, RefCell<Table<N>>>,
}

impl<R: RawMutex, const N: usize> SnapshotResponder<R, N> {
    const EMPTY: Option<Entry> = None;

    /// Create a new, stopped responder
    ///
    /// Intended to be used to create a static.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Table {
                node: None,
                baud: 0,
                slots: [Self::EMPTY; N],
            })),
        }
    }

    /// Answer a poll from the bus master.
    ///
    /// Returns the payload registered for `id`, or `None` if the identifier
    /// is not ours to answer.
    pub fn poll(&self, id: LinId) -> Option<Payload> {
        self.inner.lock(|t| {
            let mut t = t.borrow_mut();
            t.slots
                .iter_mut()
                .flatten()
                .find(|e| e.descriptor.id == id && e.descriptor.kind == ResponseKind::Publish)
                .map(|e| {
                    e.served = e.served.wrapping_add(1);
                    e.payload
                })
        })
    }

    /// Number of times the descriptor for `id` has been answered
    /// since it was last registered
    pub fn served(&self, id: LinId) -> u32 {
        self.inner.lock(|t| {
            t.borrow()
                .slots
                .iter()
                .flatten()
                .find(|e| e.descriptor.id == id)
                .map_or(0, |e| e.served)
        })
    }

    /// The descriptor registered in `slot`
    pub fn descriptor(&self, slot: usize) -> Option<ResponseDescriptor> {
        self.inner.lock(|t| {
            t.borrow()
                .slots
                .get(slot)
                .copied()
                .flatten()
                .map(|e| e.descriptor)
        })
    }

    /// Node number and bit rate, once started
    pub fn config(&self) -> Option<(u8, u32)> {
        self.inner.lock(|t| {
            let t = t.borrow();
            t.node.map(|n| (n, t.baud))
        })
    }
}

impl<R: RawMutex, const N: usize> Default for SnapshotResponder<R, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RawMutex, const N: usize> BusResponder for &SnapshotResponder<R, N> {
    type DriverError = SnapshotError;

    fn init(&mut self, node: u8, baud: u32) -> Result<(), SnapshotError> {
        self.inner.lock(|t| {
            let mut t = t.borrow_mut();
            t.node = Some(node);
            t.baud = baud;
            t.slots = [SnapshotResponder::<R, N>::EMPTY; N];
        });
        Ok(())
    }

    fn register_publisher(
        &mut self,
        node: u8,
        slot: usize,
        descriptor: &ResponseDescriptor,
        payload: &Payload,
    ) -> Result<(), PublishError<SnapshotError>> {
        self.inner.lock(|t| -> Result<(), PublishError<SnapshotError>> {
            let mut t = t.borrow_mut();
            match t.node {
                None => return Err(SnapshotError::NotStarted.into()),
                Some(n) if n != node => return Err(SnapshotError::WrongNode.into()),
                Some(_) => {}
            }
            if slot >= N {
                return Err(PublishError::CapacityExceeded);
            }
            let elsewhere = t
                .slots
                .iter()
                .enumerate()
                .any(|(i, e)| i != slot && matches!(e, Some(e) if e.descriptor.id == descriptor.id));
            if elsewhere {
                return Err(SnapshotError::DuplicateId.into());
            }
            t.slots[slot] = Some(Entry {
                descriptor: *descriptor,
                payload: *payload,
                served: 0,
            });
            Ok(())
        })
    }
}
