//! Bridge Loop
//!
//! The [`Bridge`] drains frames from a [`FrameSource`], parses them, and
//! publishes them through a [`BusResponder`]. It owns the identifier cache and
//! the registry, there is no other global state.
//!
//! One step of the loop moves through these states:
//!
//! ```text
//! Idle -> FrameReady -> Processing -> Idle
//! ```
//!
//! Errors never stop the loop. A bad frame is logged, counted in
//! [`BridgeStats`], and the bridge goes back to [`BridgeState::Idle`]. An
//! overrun leaves the newest frame pending, so the bridge stays in
//! [`BridgeState::FrameReady`] until it is taken.

use crate::{
    cache::IdCache,
    frame,
    registry::Registry,
    BusResponder, Error, FrameSource, LinId, RawFrame, DEFAULT_LIN_BAUD, DEFAULT_NODE, MAX_IDS,
};

/// Metadata trait to contain relevant generics
pub trait BridgeCfg {
    /// Where serial frames come from
    type Source: FrameSource;

    /// Where payloads are published to
    type Responder: BusResponder;

    /// LIN slave node number
    const NODE: u8 = DEFAULT_NODE;

    /// LIN bit rate
    const LIN_BAUD: u32 = DEFAULT_LIN_BAUD;
}

/// Where the bridge is in handling a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub enum BridgeState {
    /// No frame pending
    Idle,
    /// A frame was signalled, but not taken yet. The bridge also stays here
    /// after an overrun was reported, as the newest frame is still pending.
    FrameReady,
    /// A frame was taken, and is being parsed and published
    Processing,
}

/// Running counters of the bridge
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    /// Frames taken from the source
    pub frames: u32,
    /// Frames successfully published
    pub published: u32,
    /// Frames rejected for an out of range identifier
    pub malformed: u32,
    /// Frames lost in the source before they could be taken
    pub overruns: u32,
    /// Frames rejected because no registration slot was left
    pub capacity: u32,
    /// Requests the responder refused for other reasons
    pub responder: u32,
}

/// The result of publishing one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ingested {
    /// The identifier that was published
    pub id: LinId,
    /// Registration slot of the identifier
    pub slot: usize,
    /// Was this the first frame seen for `id`?
    pub first_sight: bool,
}

/// The bridge between the serial link and the LIN bus
///
/// `N` is the number of registration slots, which defaults to the whole
/// identifier space.
pub struct Bridge<Cfg: BridgeCfg, const N: usize = MAX_IDS> {
    source: Cfg::Source,
    responder: Cfg::Responder,
    cache: IdCache,
    registry: Registry<N>,
    state: BridgeState,
    stats: BridgeStats,
}

impl<Cfg: BridgeCfg, const N: usize> Bridge<Cfg, N> {
    /// Create a new [Bridge].
    pub fn new(source: Cfg::Source, responder: Cfg::Responder) -> Self {
        Self {
            source,
            responder,
            cache: IdCache::new(),
            registry: Registry::new(),
            state: BridgeState::Idle,
            stats: BridgeStats::default(),
        }
    }

    /// Put the responder into slave publish mode
    ///
    /// May be called again, e.g. after a LIN fault. Initialising the
    /// responder can drop its table, so every identifier already registered
    /// is published again from the cache, in the slot it had before.
    pub fn start(&mut self) -> Result<(), Error> {
        lin_log!(
            info,
            "Set LIN to slave publish mode, node {=u8} @ {=u32} baud",
            Cfg::NODE,
            Cfg::LIN_BAUD
        );
        self.responder
            .init(Cfg::NODE, Cfg::LIN_BAUD)
            .map_err(|_| self.fail(Error::Responder))?;

        let restored = self
            .registry
            .republish(&mut self.responder, Cfg::NODE, &self.cache)
            .map_err(|e| self.fail(e))?;
        if restored != 0 {
            lin_log!(info, "Republished {=usize} ID(s)", restored);
        }
        Ok(())
    }

    /// Run forever, publishing frames as they arrive
    pub async fn run(&mut self) {
        loop {
            self.source.wait_available().await;
            // Errors are already logged and counted, just keep going
            let _ = self.poll();
        }
    }

    /// Handle at most one pending frame, without waiting.
    ///
    /// Returns `Ok(None)` if there was nothing to do.
    pub fn poll(&mut self) -> Result<Option<Ingested>, Error> {
        if !self.source.frame_available() {
            self.set_state(BridgeState::Idle);
            return Ok(None);
        }
        self.set_state(BridgeState::FrameReady);

        // Taking the frame clears the availability flag before the bytes
        // are used, so a frame that completes from here on is seen next time.
        let raw = match self.source.take_frame() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.set_state(BridgeState::Idle);
                return Ok(None);
            }
            Err(e) => {
                if !self.source.frame_available() {
                    self.set_state(BridgeState::Idle);
                }
                return Err(self.fail(e));
            }
        };

        self.set_state(BridgeState::Processing);
        let res = self.ingest(&raw);
        self.set_state(BridgeState::Idle);
        res.map(Some)
    }

    /// Parse one frame, publish it, and commit it to the cache.
    ///
    /// The cache is only updated once the responder has accepted the new
    /// payload, so the cache and the bus never disagree.
    pub fn ingest(&mut self, raw: &RawFrame) -> Result<Ingested, Error> {
        self.stats.frames = self.stats.frames.wrapping_add(1);

        let frame = match frame::parse(raw) {
            Ok(f) => f,
            Err(e) => return Err(self.fail(e)),
        };
        lin_log!(
            debug,
            "Received LIN frame ID: {=u8:#x}, data: {=[u8]}",
            frame.id.get(),
            &frame.payload[..]
        );

        let reg = match self.registry.register(
            &mut self.responder,
            Cfg::NODE,
            frame.id,
            &frame.payload,
        ) {
            Ok(reg) => reg,
            Err(e) => return Err(self.fail(e)),
        };
        self.cache.set(frame.id, &frame.payload);
        self.stats.published = self.stats.published.wrapping_add(1);

        if reg.first_sight {
            lin_log!(
                info,
                "Registered ID {=u8:#x} in slot {=usize}",
                frame.id.get(),
                reg.slot
            );
        }

        Ok(Ingested {
            id: frame.id,
            slot: reg.slot,
            first_sight: reg.first_sight,
        })
    }

    /// Current state of the loop
    #[inline]
    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Counters since creation
    #[inline]
    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// The identifier cache
    #[inline]
    pub fn cache(&self) -> &IdCache {
        &self.cache
    }

    /// The registration table
    #[inline]
    pub fn registry(&self) -> &Registry<N> {
        &self.registry
    }

    fn set_state(&mut self, state: BridgeState) {
        if self.state != state {
            lin_log!(trace, "{} -> {}", self.state, state);
        }
        self.state = state;
    }

    fn fail(&mut self, e: Error) -> Error {
        let s = &mut self.stats;
        match e {
            Error::MalformedFrame { id } => {
                lin_log!(warn, "Dropping frame with invalid ID {=u8:#x}", id);
                s.malformed = s.malformed.wrapping_add(1);
            }
            Error::BufferOverrun { lost } => {
                lin_log!(warn, "Serial overrun, {=u16} frame(s) lost", lost);
                s.overruns = s.overruns.wrapping_add(u32::from(lost));
            }
            Error::CapacityExceeded => {
                lin_log!(error, "No registration slot left");
                s.capacity = s.capacity.wrapping_add(1);
            }
            Error::Responder => {
                lin_log!(error, "Responder refused request");
                s.responder = s.responder.wrapping_add(1);
            }
        }
        e
    }
}
