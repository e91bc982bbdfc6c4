//! Responder Registry
//!
//! Keeps the table of [`ResponseDescriptor`]s that has been handed to the
//! [`BusResponder`], and decides which slot each identifier lives in.
//!
//! Slots are handed out in the order identifiers are first seen. An
//! identifier keeps its slot forever, and every publish after the first one
//! re-registers that same slot with the new payload. The responder is never
//! trusted to notice a payload change on its own.

use crate::{
    cache::IdCache, BusResponder, Error, LinId, Payload, PublishError, MAX_IDS, PAYLOAD_LEN,
};

fn publish_error<E>(e: PublishError<E>) -> Error {
    match e {
        PublishError::CapacityExceeded => Error::CapacityExceeded,
        PublishError::Driver(_) => Error::Responder,
    }
}

/// What the responder should do when its identifier is polled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
#[non_exhaustive]
pub enum ResponseKind {
    /// Transmit the registered payload
    Publish,
}

/// A single entry of the registration table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub struct ResponseDescriptor {
    /// The identifier this descriptor answers
    pub id: LinId,
    /// Number of data bytes in the response
    pub dlc: u8,
    /// Response kind
    pub kind: ResponseKind,
    /// Driver owned status byte, zero when (re)registered
    pub status: u8,
}

impl ResponseDescriptor {
    /// A publish descriptor for `id` with the full 8 byte payload
    pub const fn publish(id: LinId) -> Self {
        Self {
            id,
            dlc: PAYLOAD_LEN as u8,
            kind: ResponseKind::Publish,
            status: 0,
        }
    }
}

/// The outcome of a successful [`Registry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registered {
    /// Slot the descriptor lives in
    pub slot: usize,
    /// Was this the first time the identifier was registered?
    pub first_sight: bool,
}

/// Registration table, holding at most `N` identifiers
///
/// `N` can not be larger than [`MAX_IDS`], a larger table does not build:
///
/// ```compile_fail
/// use lin2usb_comms::registry::Registry;
///
/// let reg: Registry<65> = Registry::new();
/// ```
pub struct Registry<const N: usize = MAX_IDS> {
    slots: heapless::Vec<ResponseDescriptor, N>,
    by_id: [Option<u8>; MAX_IDS],
}

impl<const N: usize> Registry<N> {
    const FITS_ID_SPACE: () = assert!(N <= MAX_IDS, "more slots than identifiers");

    /// Create an empty registry
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::FITS_ID_SPACE;
        Self {
            slots: heapless::Vec::new(),
            by_id: [None; MAX_IDS],
        }
    }

    /// Publish `payload` for `id` through `responder`.
    ///
    /// The first call for an identifier takes the next free slot, every
    /// later call re-registers that slot. If the responder refuses, the
    /// table is left exactly as it was.
    pub fn register<B: BusResponder>(
        &mut self,
        responder: &mut B,
        node: u8,
        id: LinId,
        payload: &Payload,
    ) -> Result<Registered, Error> {
        let (slot, first_sight) = match self.by_id[id.index()] {
            Some(slot) => (slot as usize, false),
            None if self.slots.len() >= N => return Err(Error::CapacityExceeded),
            None => (self.slots.len(), true),
        };

        let descriptor = ResponseDescriptor::publish(id);
        responder
            .register_publisher(node, slot, &descriptor, payload)
            .map_err(publish_error)?;

        if first_sight {
            self.slots
                .push(descriptor)
                .map_err(|_| Error::CapacityExceeded)?;
            self.by_id[id.index()] = Some(slot as u8);
        } else {
            self.slots[slot] = descriptor;
        }

        Ok(Registered { slot, first_sight })
    }

    /// Register every known identifier again, in its own slot, with the
    /// payload currently held in `cache`.
    ///
    /// Needed after the responder lost its table, e.g. when it was
    /// initialised again. Every slot is attempted, the first error is
    /// returned.
    pub fn republish<B: BusResponder>(
        &self,
        responder: &mut B,
        node: u8,
        cache: &IdCache,
    ) -> Result<usize, Error> {
        let mut first_err = None;
        for (slot, descriptor) in self.slots.iter().enumerate() {
            let res = responder
                .register_publisher(node, slot, descriptor, cache.get(descriptor.id))
                .map_err(publish_error);
            if let Err(e) = res {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(self.slots.len()),
        }
    }

    /// Number of registered identifiers
    #[inline]
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    /// Maximum number of identifiers this registry can hold
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// The slot `id` is registered in, if any
    #[inline]
    pub fn slot_of(&self, id: LinId) -> Option<usize> {
        self.by_id[id.index()].map(usize::from)
    }

    /// The registration table, in slot order
    #[inline]
    pub fn descriptors(&self) -> &[ResponseDescriptor] {
        &self.slots
    }
}

impl<const N: usize> Default for Registry<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responder::SnapshotResponder;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    fn id(raw: u8) -> LinId {
        LinId::new(raw).unwrap()
    }

    fn started<const N: usize>() -> SnapshotResponder<CriticalSectionRawMutex, N> {
        let resp = SnapshotResponder::new();
        (&resp).init(1, 10_400).unwrap();
        resp
    }

    /// Records calls, refusing the next one if `fail` is set
    #[derive(Default)]
    struct Recorder {
        calls: Vec<(usize, u8, Payload)>,
        fail: Option<PublishError<()>>,
    }

    impl BusResponder for Recorder {
        type DriverError = ();

        fn init(&mut self, _node: u8, _baud: u32) -> Result<(), ()> {
            Ok(())
        }

        fn register_publisher(
            &mut self,
            _node: u8,
            slot: usize,
            descriptor: &ResponseDescriptor,
            payload: &Payload,
        ) -> Result<(), PublishError<()>> {
            if let Some(e) = self.fail.take() {
                return Err(e);
            }
            self.calls.push((slot, descriptor.id.get(), *payload));
            Ok(())
        }
    }

    #[test]
    fn first_sight_appends() {
        let mut reg: Registry = Registry::new();
        let mut rec = Recorder::default();
        let a = reg.register(&mut rec, 1, id(0x32), &[1; 8]).unwrap();
        let b = reg.register(&mut rec, 1, id(0x34), &[2; 8]).unwrap();
        assert_eq!(a, Registered { slot: 0, first_sight: true });
        assert_eq!(b, Registered { slot: 1, first_sight: true });
        assert_eq!(reg.count(), 2);
        assert_eq!(reg.descriptors()[1], ResponseDescriptor::publish(id(0x34)));
    }

    #[test]
    fn repeat_sight_republishes_same_slot() {
        let mut reg: Registry = Registry::new();
        let mut rec = Recorder::default();
        reg.register(&mut rec, 1, id(0x32), &[1; 8]).unwrap();
        reg.register(&mut rec, 1, id(0x36), &[3; 8]).unwrap();
        let again = reg.register(&mut rec, 1, id(0x32), &[9; 8]).unwrap();

        assert_eq!(again, Registered { slot: 0, first_sight: false });
        assert_eq!(reg.count(), 2);
        // The responder must have been called again with the new bytes
        assert_eq!(rec.calls.last(), Some(&(0, 0x32, [9; 8])));
        assert_eq!(rec.calls.len(), 3);
    }

    #[test]
    fn snapshot_responder_sees_every_update() {
        let mut reg: Registry = Registry::new();
        let resp = started::<MAX_IDS>();
        let mut r = &resp;
        reg.register(&mut r, 1, id(0x32), &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(resp.poll(id(0x32)), Some([1, 2, 3, 4, 5, 6, 7, 8]));
        reg.register(&mut r, 1, id(0x32), &[9; 8]).unwrap();
        assert_eq!(resp.poll(id(0x32)), Some([9; 8]));
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn full_identifier_space_fits() {
        let mut reg: Registry = Registry::new();
        let mut rec = Recorder::default();
        for i in LinId::all() {
            let r = reg.register(&mut rec, 1, i, &[i.get(); 8]).unwrap();
            assert_eq!(r.slot, i.index());
        }
        assert_eq!(reg.count(), MAX_IDS);
        assert!(LinId::all().all(|i| reg.slot_of(i) == Some(i.index())));
    }

    #[test]
    fn capacity_exceeded_leaves_table_untouched() {
        let mut reg: Registry<4> = Registry::new();
        let resp = started::<4>();
        let mut r = &resp;
        for raw in 10..14 {
            reg.register(&mut r, 1, id(raw), &[raw; 8]).unwrap();
        }
        assert_eq!(
            reg.register(&mut r, 1, id(20), &[20; 8]),
            Err(Error::CapacityExceeded)
        );
        assert_eq!(reg.count(), 4);
        assert_eq!(reg.slot_of(id(20)), None);
        assert_eq!(resp.poll(id(20)), None);
        for raw in 10..14 {
            assert_eq!(resp.poll(id(raw)), Some([raw; 8]));
        }
        // Known identifiers can still be updated when full
        reg.register(&mut r, 1, id(11), &[0xAA; 8]).unwrap();
        assert_eq!(resp.poll(id(11)), Some([0xAA; 8]));
    }

    #[test]
    fn republish_restores_wiped_responder() {
        let mut reg: Registry = Registry::new();
        let mut cache = IdCache::new();
        let resp = started::<MAX_IDS>();
        let mut r = &resp;
        for (raw, fill) in [(0x32, 1), (0x34, 2), (0x32, 3)] {
            reg.register(&mut r, 1, id(raw), &[fill; 8]).unwrap();
            cache.set(id(raw), &[fill; 8]);
        }

        r.init(1, 10_400).unwrap();
        assert_eq!(resp.poll(id(0x32)), None);

        assert_eq!(reg.republish(&mut r, 1, &cache), Ok(2));
        assert_eq!(resp.poll(id(0x32)), Some([3; 8]));
        assert_eq!(resp.poll(id(0x34)), Some([2; 8]));
        assert_eq!(resp.descriptor(0).map(|d| d.id), Some(id(0x32)));
        assert_eq!(resp.descriptor(1).map(|d| d.id), Some(id(0x34)));
    }

    #[test]
    fn republish_tries_every_slot() {
        let mut reg: Registry = Registry::new();
        let cache = IdCache::new();
        let mut rec = Recorder::default();
        reg.register(&mut rec, 1, id(1), &[0; 8]).unwrap();
        reg.register(&mut rec, 1, id(2), &[0; 8]).unwrap();

        rec.calls.clear();
        rec.fail = Some(PublishError::Driver(()));
        assert_eq!(reg.republish(&mut rec, 1, &cache), Err(Error::Responder));
        assert_eq!(rec.calls, [(1, 2, [0; 8])]);
        assert_eq!(reg.count(), 2);
    }

    #[test]
    fn responder_refusal_is_mapped() {
        let mut reg: Registry = Registry::new();
        let mut rec = Recorder {
            fail: Some(PublishError::CapacityExceeded),
            ..Default::default()
        };
        assert_eq!(
            reg.register(&mut rec, 1, id(1), &[0; 8]),
            Err(Error::CapacityExceeded)
        );
        assert_eq!(reg.count(), 0);

        rec.fail = Some(PublishError::Driver(()));
        assert_eq!(reg.register(&mut rec, 1, id(1), &[0; 8]), Err(Error::Responder));
        assert_eq!(reg.slot_of(id(1)), None);

        // Next attempt goes through and takes slot zero
        assert_eq!(reg.register(&mut rec, 1, id(1), &[0; 8]).unwrap().slot, 0);
    }
}
