//! # Logical connections
//!
//! A connection is a one-way channel between a source and a destination
//! address, bound to one or more timeslots of the schedule. Everything
//! about it is configured while the engine is stopped and frozen by
//! `setup()`; afterwards only the data path (send/receive) and the
//! statistics are reachable.

use crate::arq::{ArqRx, ArqTx};
use crate::concurrency::{CcaCfg, FallbackCfg};
use crate::error::{Error, Result};
use crate::frag::FragRx;
use crate::gain::GainLoop;
use crate::lqi::Lqi;
use crate::protocol::{Field, LinkProtocol};
use crate::radio::{Channel, ChipRepetition, FecRatio, Modulation};
use crate::schedule::TimeslotId;
use crate::stats::ConnectionStats;
use crate::xlayer::FrameQueue;
use crate::ConnectionId;

/// Highest connection priority value (0 is the most urgent).
pub const PRIORITY_MAX: u8 = 7;

/// Consecutive good receptions before the Connect event fires.
pub const CONNECT_STREAK: u16 = 5;

/// Consecutive misses before the Disconnect event fires.
pub const DISCONNECT_STREAK: u16 = 100;

/// Events surfaced through the event callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// The peer is heard again after a connect streak.
    Connect,
    /// The peer went silent for a disconnect streak.
    Disconnect,
    /// An operational error surfaced from interrupt context.
    Error(Error),
}

/// Data-path callback, invoked from the low-priority context.
pub type ConnCallback = fn(ConnectionId);

/// Event callback, invoked from the low-priority context.
pub type EventCallback = fn(ConnectionId, Event);

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Callbacks {
    pub tx_success: Option<ConnCallback>,
    pub tx_fail: Option<ConnCallback>,
    pub tx_dropped: Option<ConnCallback>,
    pub rx_success: Option<ConnCallback>,
    pub event: Option<EventCallback>,
}

/// Connection configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionCfg {
    pub name: &'static str,
    pub source_address: u8,
    pub destination_address: u8,
    /// Largest application payload, in bytes.
    pub max_payload_size: u16,
    /// Frames buffered per direction.
    pub queue_size: u16,
    pub timeslot_ids: heapless::Vec<TimeslotId, { crate::MAX_TIMESLOTS }>,
    pub chip_repetition: ChipRepetition,
}

impl ConnectionCfg {
    pub fn new(name: &'static str, source: u8, destination: u8) -> Self {
        Self {
            name,
            source_address: source,
            destination_address: destination,
            max_payload_size: 0,
            queue_size: 0,
            timeslot_ids: heapless::Vec::new(),
            chip_repetition: ChipRepetition::Repeat1,
        }
    }

    pub fn with_payload(mut self, max_payload_size: u16, queue_size: u16) -> Self {
        self.max_payload_size = max_payload_size;
        self.queue_size = queue_size;
        self
    }

    pub fn with_timeslots(mut self, ids: &[TimeslotId]) -> Self {
        self.timeslot_ids.clear();
        // Overflow is caught by validate().
        let _ = self.timeslot_ids.extend_from_slice(ids);
        self
    }

    pub fn with_chip_repetition(mut self, chip_repetition: ChipRepetition) -> Self {
        self.chip_repetition = chip_repetition;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::NullPtr);
        }
        if self.source_address == self.destination_address {
            return Err(Error::DestinationAddress);
        }
        if self.queue_size == 0 {
            return Err(Error::MinQueueSize);
        }
        if self.timeslot_ids.is_empty() {
            return Err(Error::ZeroTimeslotCount);
        }
        Ok(())
    }
}

/// Throttling credit accumulator: every allotted slot adds the active
/// ratio; the slot is used each time the account reaches one hundred.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct Throttle {
    pub enabled: bool,
    pub active_ratio: u8,
    account: u16,
}

impl Throttle {
    /// True when this allotted slot may carry a frame.
    pub fn take_slot(&mut self) -> bool {
        if !self.enabled || self.active_ratio >= 100 {
            return true;
        }
        self.account += self.active_ratio as u16;
        if self.account >= 100 {
            self.account -= 100;
            true
        } else {
            false
        }
    }
}

/// One configured connection with its runtime state.
pub struct Connection {
    pub(crate) cfg: ConnectionCfg,
    pub(crate) channels: heapless::Vec<Channel, { crate::MAX_CHANNELS }>,
    pub(crate) fallback: FallbackCfg,
    pub(crate) protocol: LinkProtocol,

    pub(crate) ack_enabled: bool,
    pub(crate) arq_enabled: bool,
    pub(crate) credit_flow_ctrl: bool,
    pub(crate) auto_sync: bool,
    pub(crate) fragmentation: bool,
    pub(crate) priority: u8,
    pub(crate) priority_enabled: bool,
    pub(crate) modulation: Modulation,
    pub(crate) fec_ratio: FecRatio,
    pub(crate) cca: CcaCfg,
    pub(crate) throttle: Throttle,

    pub(crate) arq_tx: ArqTx,
    pub(crate) arq_rx: ArqRx,
    pub(crate) frag_rx: FragRx,
    pub(crate) lqi: Lqi,
    pub(crate) gain_loop: GainLoop,
    pub(crate) stats: ConnectionStats,
    pub(crate) callbacks: Callbacks,

    /// Carved at setup; `None` for the unused direction.
    pub(crate) tx_queue: Option<FrameQueue>,
    pub(crate) rx_queue: Option<FrameQueue>,

    /// True when the local device is the source.
    pub(crate) is_tx: bool,
    /// Credit balance advertised by the peer, flow-controlled sends only.
    pub(crate) credit_available: u8,
    pub(crate) connected: bool,
    pub(crate) success_streak: u16,
    pub(crate) miss_streak: u16,
}

impl Connection {
    pub(crate) fn new(cfg: ConnectionCfg) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            channels: heapless::Vec::new(),
            fallback: FallbackCfg::default(),
            protocol: LinkProtocol::default(),
            ack_enabled: true,
            arq_enabled: false,
            credit_flow_ctrl: false,
            auto_sync: false,
            fragmentation: false,
            priority: 0,
            priority_enabled: false,
            modulation: Modulation::Iook,
            fec_ratio: FecRatio::Off,
            cca: CcaCfg::default(),
            throttle: Throttle::default(),
            arq_tx: ArqTx::default(),
            arq_rx: ArqRx::default(),
            frag_rx: FragRx::default(),
            lqi: Lqi::default(),
            gain_loop: GainLoop::default(),
            stats: ConnectionStats::default(),
            callbacks: Callbacks::default(),
            tx_queue: None,
            rx_queue: None,
            is_tx: false,
            credit_available: 1,
            connected: false,
            success_streak: 0,
            miss_streak: 0,
        })
    }

    pub fn name(&self) -> &'static str {
        self.cfg.name
    }

    /// True when every timeslot reference of this connection is auto-reply.
    pub(crate) fn auto_reply_only(&self) -> bool {
        self.cfg.timeslot_ids.iter().all(|id| id.is_auto())
    }

    /// Register the header fields this configuration needs.
    ///
    /// Field order is fixed network-wide: seq, connection id, RDO, credit.
    pub(crate) fn build_protocol(&mut self, conn_id_field: bool, rdo_field: bool) -> Result<()> {
        self.protocol = LinkProtocol::default();
        if self.ack_enabled || self.arq_enabled || self.fragmentation {
            self.protocol.add_field(Field::Seq)?;
        }
        if conn_id_field {
            self.protocol.add_field(Field::ConnectionId)?;
        }
        if rdo_field {
            self.protocol.add_field(Field::Rdo)?;
        }
        if self.credit_flow_ctrl {
            self.protocol.add_field(Field::Credit)?;
        }
        Ok(())
    }

    /// Streak bookkeeping shared by every received-or-missed outcome.
    /// Returns the edge event when one fires.
    pub(crate) fn track_link(&mut self, success: bool) -> Option<Event> {
        if success {
            self.miss_streak = 0;
            self.success_streak = self.success_streak.saturating_add(1);
            if !self.connected && self.success_streak >= CONNECT_STREAK {
                self.connected = true;
                return Some(Event::Connect);
            }
        } else {
            self.success_streak = 0;
            self.miss_streak = self.miss_streak.saturating_add(1);
            if self.connected && self.miss_streak >= DISCONNECT_STREAK {
                self.connected = false;
                return Some(Event::Disconnect);
            }
        }
        None
    }
}
