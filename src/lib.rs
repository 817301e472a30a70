//! # uwblink: TDMA wireless connection engine for UWB transceivers
//!
//! `uwblink` drives one or two impulse-radio UWB transceivers through a
//! fixed time-slotted schedule. The application creates a [`Stack`], gives
//! it a node identity and a set of logical [connections](connection), and
//! exchanges length-prefixed payloads; underneath the engine runs the full
//! PHY/MAC pipeline: slot scheduling, stop-and-wait ARQ, duplicate
//! suppression, fragmentation, credit flow control, clear-channel
//! assessment, rate fallback, link-quality tracking and desync concurrency
//! for co-located networks.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use uwblink::{Stack, StackCfg, ConcurrencyMode, ConnectionCfg, ChannelCfg};
//! use uwblink::node::{NodeCfg, NetworkRole};
//! use uwblink::radio::ChipRate;
//! use uwblink::schedule::TimeslotId;
//!
//! static mut ARENA: [u8; 4096] = [0; 4096];
//!
//! let cfg = StackCfg::new(&[500, 500], &[0, 1], ChipRate::Rate20M48);
//! let mut stack = Stack::new(hal, cfg, unsafe { &mut ARENA }).unwrap();
//! stack.node_init(NodeCfg {
//!     pan_id: 0x0ABC,
//!     local_address: 0x01,
//!     coordinator_address: 0x01,
//!     role: NetworkRole::Coordinator,
//! }).unwrap();
//! stack.radio_module_init(uwblink::RadioId::Radio1, true).unwrap();
//! let conn = stack.connection_init(
//!     ConnectionCfg::new("tx", 0x01, 0x02)
//!         .with_payload(64, 4)
//!         .with_timeslots(&[TimeslotId::main(0)]),
//! ).unwrap();
//! stack.connection_add_channel(conn, ChannelCfg::new(7987, 2, 5, 3, 2)).unwrap();
//! stack.setup().unwrap();
//! stack.connect().unwrap();
//! stack.send(conn, b"Hello, World!").unwrap();
//! ```
//!
//! The board wires four interrupt vectors to the entry points in [`isr`];
//! everything else is driven from those interrupts. Application callbacks
//! run from the low-priority context-switch interrupt, never from the
//! radio interrupt itself.

#![no_std]

pub mod arq;
pub mod cmd;
pub mod concurrency;
pub mod connection;
pub mod error;
pub mod frag;
pub mod gain;
pub mod hal;
pub mod isr;
pub mod lqi;
pub mod mac;
pub mod multi_radio;
pub mod node;
pub mod pairing;
pub mod phy;
pub mod protocol;
pub mod queue;
pub mod radio;
pub mod schedule;
pub mod stats;
pub mod status;
pub mod xlayer;

pub use connection::{ConnCallback, Connection, ConnectionCfg, Event, EventCallback};
pub use error::{Error, Result};
pub use hal::{RadioId, WirelessHal};
pub use stats::ConnectionStats;

use cmd::cmd_cfg::{
    pack_address, pack_cca, pack_freq, pack_phy, pack_pulse, pack_rx_tx_size, pack_timer_sleep,
};
use cmd::RadioCfg;
use concurrency::{CcaCfg, Ddcm, FallbackTier, Rdo};
use connection::Event as ConnEvent;
use embassy_time::Duration;
use mac::{handle_rx_frame, handle_rx_miss, handle_tx_outcome, pick_tx_conn};
use mac::{CallbackKind, MacCore};
use node::{Node, NodeCfg, BROADCAST_ADDRESS};
use phy::{FrameJob, Phy, PhyInput, PhyOutput, SlotRole, SpiJob};
use protocol::HeaderValues;
use radio::{actions, regs, Channel, ChipRate, FecRatio, IrqPolarity, Modulation, OutImped};
use radio::{Radio, SleepLevel, SpiMode};
use schedule::{classify, Schedule, SlotUse};
use status::IrqFlags;
use xlayer::{Arena, FrameOutcome, Region};

/// Capacity limits of the engine.
pub const MAX_CONNECTIONS: usize = 16;
pub const MAX_TIMESLOTS: usize = 32;
pub const MAX_CONN_PER_TIMESLOT: usize = 4;
pub const MAX_CHANNELS: usize = 8;
pub(crate) const MAX_CHANNEL_SEQ: usize = 16;
pub(crate) const MAX_QUEUE_FRAMES: usize = 32;
pub(crate) const MAX_FALLBACK_TIERS: usize = 4;

/// Sentinel queue slots for frames not backed by a connection queue.
const SYNC_QUEUE_SLOT: u16 = u16::MAX;
const OVERRUN_QUEUE_SLOT: u16 = u16::MAX - 1;
const MONITOR_QUEUE_SLOT: u16 = u16::MAX - 2;

/// Handle to a configured connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionId(pub(crate) u8);

impl ConnectionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Trade-off between coexistence features and per-slot processing cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConcurrencyMode {
    /// RDO and distributed desync enabled.
    HighPerf,
    /// Fixed timing, lowest processing cost.
    LowPerf,
}

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum StackState {
    /// Configurable; setup() has not validated the current configuration.
    Stopped,
    /// setup() passed, ready to connect.
    Configured,
    Connected,
}

/// Channel configuration handed to [`Stack::connection_add_channel`].
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelCfg {
    pub frequency_mhz: u16,
    pub tx_pulse_count: u8,
    pub tx_pulse_width: u8,
    pub tx_pulse_gain: u8,
    pub rx_pulse_count: u8,
}

impl ChannelCfg {
    pub fn new(
        frequency_mhz: u16,
        tx_pulse_count: u8,
        tx_pulse_width: u8,
        tx_pulse_gain: u8,
        rx_pulse_count: u8,
    ) -> Self {
        Self { frequency_mhz, tx_pulse_count, tx_pulse_width, tx_pulse_gain, rx_pulse_count }
    }
}

/// Global schedule and clocking configuration.
#[derive(Debug, Clone)]
pub struct StackCfg {
    timeslot_sequence_us: heapless::Vec<u32, MAX_TIMESLOTS>,
    channel_sequence: heapless::Vec<u8, MAX_CHANNEL_SEQ>,
    pub concurrency_mode: ConcurrencyMode,
    pub chip_rate: ChipRate,
}

impl StackCfg {
    pub fn new(timeslot_sequence_us: &[u32], channel_sequence: &[u8], chip_rate: ChipRate) -> Self {
        let mut ts = heapless::Vec::new();
        let _ = ts.extend_from_slice(timeslot_sequence_us);
        let mut cs = heapless::Vec::new();
        let _ = cs.extend_from_slice(channel_sequence);
        Self {
            timeslot_sequence_us: ts,
            channel_sequence: cs,
            concurrency_mode: ConcurrencyMode::LowPerf,
            chip_rate,
        }
    }

    pub fn with_concurrency_mode(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency_mode = mode;
        self
    }
}

/// Fallback observability snapshot.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FallbackInfo {
    pub tier_count: usize,
    pub cca_abort_count: u32,
    pub cca_force_count: u32,
}

/// The wireless connection engine.
///
/// Owns the HAL, the node identity, every connection and both PHY drivers.
/// All configuration happens while stopped; `setup()` freezes and
/// validates it, `connect()` starts the schedule. The stack must not be
/// moved while connected: the interrupt entry points hold a pointer to it
/// until `disconnect()` (or drop) uninstalls them.
pub struct Stack<'a, H: WirelessHal> {
    hal: H,
    cfg: StackCfg,
    state: StackState,
    reserved_unlocked: bool,
    node: Option<Node>,
    connections: heapless::Vec<Connection, MAX_CONNECTIONS>,
    mac: MacCore,
    phys: [Phy; 2],
    arena: Arena<'a>,
    /// Scratch frame slots carved at setup.
    sync_region: Region,
    ack_region: Region,
    overrun_region: Region,
    multi_radio: multi_radio::MultiRadio,
    timeslot_sleep_levels: heapless::Vec<SleepLevel, MAX_TIMESLOTS>,
    /// One transfer in flight per radio; written from the DMA interrupt,
    /// polled by `disconnect()`.
    spi_busy: [core::sync::atomic::AtomicBool; 2],
    /// Slot-start offset from the concurrency mechanisms, in PLL cycles.
    slot_offset_pll: i32,
}

impl<'a, H: WirelessHal> Stack<'a, H> {
    /// Create a stopped engine over the application-provided arena.
    pub fn new(hal: H, cfg: StackCfg, arena: &'a mut [u8]) -> Result<Self> {
        if cfg.timeslot_sequence_us.is_empty() {
            return Err(Error::ZeroTimeslotSeqLen);
        }
        if cfg.channel_sequence.is_empty() {
            return Err(Error::ZeroChanSeqLen);
        }
        let schedule = Schedule::new(
            &cfg.timeslot_sequence_us,
            &cfg.channel_sequence,
            cfg.chip_rate.hz(),
        )?;
        let radio_count = hal.radio_count();
        Ok(Self {
            hal,
            mac: MacCore::new(schedule, 0),
            cfg,
            state: StackState::Stopped,
            reserved_unlocked: false,
            node: None,
            connections: heapless::Vec::new(),
            phys: [Phy::new(), Phy::new()],
            arena: Arena::new(arena),
            sync_region: Region::default(),
            ack_region: Region::default(),
            overrun_region: Region::default(),
            multi_radio: multi_radio::MultiRadio::new(radio_count, 16),
            timeslot_sleep_levels: heapless::Vec::new(),
            spi_busy: [core::sync::atomic::AtomicBool::new(false), core::sync::atomic::AtomicBool::new(false)],
            slot_offset_pll: 0,
        })
    }

    // ------------------------------------------------------------------
    // Configuration surface (stopped only)
    // ------------------------------------------------------------------

    fn check_stopped(&self) -> Result<()> {
        match self.state {
            StackState::Connected => Err(Error::ChangingConfigWhileRunning),
            _ => Ok(()),
        }
    }

    /// Any accepted configuration change invalidates a previous setup().
    fn touch_config(&mut self) {
        if self.state == StackState::Configured {
            self.state = StackState::Stopped;
        }
    }

    /// Declare the local node identity.
    pub fn node_init(&mut self, cfg: NodeCfg) -> Result<()> {
        self.check_stopped()?;
        cfg.validate(self.reserved_unlocked)?;
        self.node = Some(Node::new(cfg));
        self.touch_config();
        Ok(())
    }

    /// Probe and register one radio module.
    pub fn radio_module_init(&mut self, radio_id: RadioId, calibrate: bool) -> Result<()> {
        self.check_stopped()?;
        let radio = Radio::probe(&mut self.hal, radio_id, calibrate)?;
        let node = self.node.as_mut().ok_or(Error::NotInitialized)?;
        node.radios.retain(|r| r.id != radio_id);
        node.radios.push(radio).map_err(|_| Error::InvalidParameter)?;
        self.touch_config();
        Ok(())
    }

    fn node_radio_mut(&mut self, radio_id: RadioId) -> Result<&mut Radio> {
        let node = self.node.as_mut().ok_or(Error::NotInitialized)?;
        node.radios
            .iter_mut()
            .find(|r| r.id == radio_id)
            .ok_or(Error::RadioNotFound)
    }

    pub fn set_radio_irq_polarity(&mut self, radio_id: RadioId, pol: IrqPolarity) -> Result<()> {
        self.check_stopped()?;
        self.node_radio_mut(radio_id)?.irq_polarity = pol;
        self.touch_config();
        Ok(())
    }

    pub fn set_radio_spi_mode(&mut self, radio_id: RadioId, mode: SpiMode) -> Result<()> {
        self.check_stopped()?;
        self.node_radio_mut(radio_id)?.spi_mode = mode;
        self.touch_config();
        Ok(())
    }

    pub fn set_radio_outimped(&mut self, radio_id: RadioId, outimped: OutImped) -> Result<()> {
        self.check_stopped()?;
        self.node_radio_mut(radio_id)?.outimped = outimped;
        self.touch_config();
        Ok(())
    }

    /// Sleep level applied between slots, for every radio of the node.
    pub fn set_sleep_level(&mut self, level: SleepLevel) -> Result<()> {
        self.check_stopped()?;
        let node = self.node.as_mut().ok_or(Error::NotInitialized)?;
        for radio in &mut node.radios {
            radio.sleep_level = level;
        }
        self.touch_config();
        Ok(())
    }

    /// Per-timeslot sleep level override; one entry per schedule slot.
    pub fn set_timeslot_sleep_levels(&mut self, levels: &[SleepLevel]) -> Result<()> {
        self.check_stopped()?;
        if levels.len() != self.cfg.timeslot_sequence_us.len() {
            return Err(Error::IncorrectTsSleepLevel);
        }
        self.timeslot_sleep_levels.clear();
        self.timeslot_sleep_levels
            .extend_from_slice(levels)
            .map_err(|_| Error::IncorrectTsSleepLevel)?;
        self.touch_config();
        Ok(())
    }

    /// Create a connection. Order of creation defines its identifier.
    pub fn connection_init(&mut self, cfg: ConnectionCfg) -> Result<ConnectionId> {
        self.check_stopped()?;
        let node = self.node.as_ref().ok_or(Error::NotInitialized)?;
        if !self.reserved_unlocked {
            if cfg.source_address == node::UNASSIGNED_ADDRESS {
                return Err(Error::SourceAddress);
            }
            if cfg.destination_address == node::UNASSIGNED_ADDRESS {
                return Err(Error::DestinationAddress);
            }
        }
        let local = node.cfg.local_address;
        if cfg.source_address != local
            && cfg.destination_address != local
            && cfg.destination_address != BROADCAST_ADDRESS
        {
            return Err(Error::ConnectionAddress);
        }
        for id in &cfg.timeslot_ids {
            if id.index() >= self.cfg.timeslot_sequence_us.len() {
                return Err(Error::InvalidParameter);
            }
        }
        let conn = Connection::new(cfg)?;
        let id = ConnectionId(self.connections.len() as u8);
        self.connections.push(conn).map_err(|_| Error::NotEnoughMemory)?;
        self.touch_config();
        Ok(id)
    }

    fn conn(&self, id: ConnectionId) -> Result<&Connection> {
        self.connections.get(id.index()).ok_or(Error::InvalidParameter)
    }

    fn conn_mut(&mut self, id: ConnectionId) -> Result<&mut Connection> {
        self.connections.get_mut(id.index()).ok_or(Error::InvalidParameter)
    }

    /// Add an RF channel to a connection's channel table.
    pub fn connection_add_channel(&mut self, id: ConnectionId, cfg: ChannelCfg) -> Result<()> {
        self.check_stopped()?;
        let chip_rate = self.cfg.chip_rate;
        let conn = self.conn_mut(id)?;
        if conn.auto_reply_only() {
            return Err(Error::AddChannelOnInvalidConnection);
        }
        let channel = Channel {
            frequency_mhz: cfg.frequency_mhz,
            tx_pulse_count: cfg.tx_pulse_count,
            tx_pulse_width: cfg.tx_pulse_width,
            tx_pulse_gain: cfg.tx_pulse_gain,
            rx_pulse_count: cfg.rx_pulse_count,
            integrator_gain: 0,
        };
        channel.validate(chip_rate)?;
        conn.channels.push(channel).map_err(|_| Error::InvalidParameter)?;
        self.touch_config();
        Ok(())
    }

    /// Add one payload-size fallback tier, strictly descending thresholds.
    pub fn connection_add_fallback_channel(
        &mut self,
        id: ConnectionId,
        tier: FallbackTier,
    ) -> Result<()> {
        self.check_stopped()?;
        self.conn_mut(id)?.fallback.add_tier(tier)?;
        self.touch_config();
        Ok(())
    }

    pub fn set_acknowledgement(&mut self, id: ConnectionId, enabled: bool) -> Result<()> {
        self.check_stopped()?;
        let conn = self.conn_mut(id)?;
        if enabled && conn.auto_reply_only() {
            return Err(Error::AckNotSupportedInAutoReplyConnection);
        }
        conn.ack_enabled = enabled;
        self.touch_config();
        Ok(())
    }

    /// Enable stop-and-wait retransmission; deadlines of zero are infinite.
    pub fn set_retransmission(
        &mut self,
        id: ConnectionId,
        enabled: bool,
        try_deadline: u32,
        time_deadline: Duration,
    ) -> Result<()> {
        self.check_stopped()?;
        let tick_hz = self.hal.tick_frequency_hz() as u64;
        let conn = self.conn_mut(id)?;
        if enabled && !conn.ack_enabled {
            return Err(Error::ArqWithAckDisabled);
        }
        conn.arq_enabled = enabled;
        conn.arq_tx.try_deadline = try_deadline;
        conn.arq_tx.time_deadline_ticks = time_deadline.as_micros() * tick_hz / 1_000_000;
        self.touch_config();
        Ok(())
    }

    pub fn set_credit_flow_ctrl(&mut self, id: ConnectionId, enabled: bool) -> Result<()> {
        self.check_stopped()?;
        let conn = self.conn_mut(id)?;
        if enabled && !conn.ack_enabled {
            return Err(Error::CreditFlowCtrlWithAckDisabled);
        }
        conn.credit_flow_ctrl = enabled;
        self.touch_config();
        Ok(())
    }

    pub fn set_fec_ratio(&mut self, id: ConnectionId, ratio: FecRatio) -> Result<()> {
        self.check_stopped()?;
        self.conn_mut(id)?.fec_ratio = ratio;
        self.touch_config();
        Ok(())
    }

    pub fn set_modulation(&mut self, id: ConnectionId, modulation: Modulation) -> Result<()> {
        self.check_stopped()?;
        self.conn_mut(id)?.modulation = modulation;
        self.touch_config();
        Ok(())
    }

    /// Enable slot throttling on a TX connection.
    pub fn set_throttling(&mut self, id: ConnectionId) -> Result<()> {
        self.check_stopped()?;
        let local = self.local_address()?;
        let conn = self.conn_mut(id)?;
        if conn.cfg.source_address != local {
            return Err(Error::ThrottlingOnRxConnection);
        }
        conn.throttle.enabled = true;
        conn.throttle.active_ratio = 100;
        self.touch_config();
        Ok(())
    }

    /// Percentage of allotted slots actually used, 0..=100.
    pub fn set_throttling_active_ratio(&mut self, id: ConnectionId, ratio: u8) -> Result<()> {
        self.check_stopped()?;
        if ratio > 100 {
            return Err(Error::InvalidParameter);
        }
        let conn = self.conn_mut(id)?;
        if !conn.throttle.enabled {
            return Err(Error::ThrottlingNotSupported);
        }
        conn.throttle.active_ratio = ratio;
        self.touch_config();
        Ok(())
    }

    /// Arbitration priority among connections sharing a timeslot; zero is
    /// the most urgent.
    pub fn set_connection_priority(&mut self, id: ConnectionId, priority: u8) -> Result<()> {
        self.check_stopped()?;
        if priority > connection::PRIORITY_MAX {
            return Err(Error::MaxConnPriority);
        }
        let conn = self.conn_mut(id)?;
        conn.priority = priority;
        conn.priority_enabled = true;
        self.touch_config();
        Ok(())
    }

    pub fn set_fragmentation(&mut self, id: ConnectionId) -> Result<()> {
        self.check_stopped()?;
        let conn = self.conn_mut(id)?;
        if conn.cfg.queue_size < 2 {
            return Err(Error::MinQueueSize);
        }
        conn.fragmentation = true;
        self.touch_config();
        Ok(())
    }

    /// Carry schedule synchronization on this connection even when idle.
    pub fn set_auto_sync(&mut self, id: ConnectionId, enabled: bool) -> Result<()> {
        self.check_stopped()?;
        self.conn_mut(id)?.auto_sync = enabled;
        self.touch_config();
        Ok(())
    }

    pub fn set_cca(&mut self, id: ConnectionId, cca: CcaCfg) -> Result<()> {
        self.check_stopped()?;
        cca.validate()?;
        self.conn_mut(id)?.cca = cca;
        self.touch_config();
        Ok(())
    }

    /// Random datarate offset parameters, network-wide.
    pub fn set_rdo(&mut self, rollover_pll: u16, step_pll: u16) -> Result<()> {
        self.check_stopped()?;
        if self.mac.certification {
            return Err(Error::InvalidParameter);
        }
        self.mac.rdo = Rdo::new(rollover_pll, step_pll);
        self.touch_config();
        Ok(())
    }

    /// Distributed desync parameters, network-wide.
    pub fn set_ddcm(&mut self, max_offset_pll: u16, sync_loss_pll: u32) -> Result<()> {
        self.check_stopped()?;
        if self.mac.certification {
            return Err(Error::InvalidParameter);
        }
        self.mac.ddcm = Ddcm::new(max_offset_pll, sync_loss_pll);
        self.touch_config();
        Ok(())
    }

    /// Walk the channel sequence in a shared pseudo-random order.
    pub fn set_random_channel_sequence(&mut self, enabled: bool) -> Result<()> {
        self.check_stopped()?;
        self.mac.random_channel = enabled;
        self.touch_config();
        Ok(())
    }

    /// Certification mode: fixed max-pulse transmit loop with emulated
    /// acknowledge; every timing-perturbing feature is forced off.
    pub fn set_certification_mode(&mut self, enabled: bool) -> Result<()> {
        self.check_stopped()?;
        self.mac.certification = enabled;
        if enabled {
            self.mac.rdo = Rdo::default();
            self.mac.ddcm = Ddcm::default();
            self.mac.random_channel = false;
        }
        self.touch_config();
        Ok(())
    }

    /// Shorten the initial sync acquisition. Incompatible with dual radio.
    pub fn set_fast_sync(&mut self, enabled: bool) -> Result<()> {
        self.check_stopped()?;
        if enabled && self.hal.radio_count() == 2 {
            return Err(Error::FastSyncWithDualRadio);
        }
        self.mac.fast_sync = enabled;
        self.touch_config();
        Ok(())
    }

    /// Multi-radio selection tuning.
    pub fn set_multi_radio_cfg(
        &mut self,
        mode: multi_radio::MultiRadioMode,
        avg_sample_count: u32,
        hysteresis_tenth_db: u16,
        rssi_threshold_tenth_db: u16,
    ) -> Result<()> {
        self.check_stopped()?;
        self.multi_radio.mode = mode;
        self.multi_radio.avg_sample_count = avg_sample_count;
        self.multi_radio.hysteresis_tenth_db = hysteresis_tenth_db;
        self.multi_radio.rssi_threshold_tenth_db = rssi_threshold_tenth_db;
        self.touch_config();
        Ok(())
    }

    /// Replying-radio override for bring-up.
    pub fn radio_select(&mut self, select: multi_radio::RadioSelect) {
        self.multi_radio.radio_select = select;
    }

    /// Lift the reserved-address lock for the pairing procedure.
    pub fn reserved_address_unlock(&mut self) {
        self.reserved_unlocked = true;
    }

    pub fn reserved_address_lock(&mut self) {
        self.reserved_unlocked = false;
    }

    pub fn on_tx_success(&mut self, id: ConnectionId, cb: ConnCallback) -> Result<()> {
        self.check_stopped()?;
        self.conn_mut(id)?.callbacks.tx_success = Some(cb);
        Ok(())
    }

    pub fn on_tx_fail(&mut self, id: ConnectionId, cb: ConnCallback) -> Result<()> {
        self.check_stopped()?;
        self.conn_mut(id)?.callbacks.tx_fail = Some(cb);
        Ok(())
    }

    pub fn on_tx_dropped(&mut self, id: ConnectionId, cb: ConnCallback) -> Result<()> {
        self.check_stopped()?;
        self.conn_mut(id)?.callbacks.tx_dropped = Some(cb);
        Ok(())
    }

    pub fn on_rx_success(&mut self, id: ConnectionId, cb: ConnCallback) -> Result<()> {
        self.check_stopped()?;
        self.conn_mut(id)?.callbacks.rx_success = Some(cb);
        Ok(())
    }

    pub fn on_event(&mut self, id: ConnectionId, cb: EventCallback) -> Result<()> {
        self.check_stopped()?;
        self.conn_mut(id)?.callbacks.event = Some(cb);
        Ok(())
    }

    fn local_address(&self) -> Result<u8> {
        Ok(self.node.as_ref().ok_or(Error::NotInitialized)?.cfg.local_address)
    }

    // ------------------------------------------------------------------
    // Setup & lifecycle
    // ------------------------------------------------------------------

    /// Validate the whole configuration and carve the arena.
    ///
    /// Pure over the current configuration: running it twice without a
    /// configuration change yields the same result.
    pub fn setup(&mut self) -> Result<()> {
        self.check_stopped()?;
        let node = self.node.as_ref().ok_or(Error::NotInitialized)?;
        if node.radios.is_empty() {
            return Err(Error::RadioNotFound);
        }
        if self.hal.radio_count() == 2 && node.radios.len() < 2 {
            return Err(Error::SecondRadioNotInit);
        }
        if self.mac.fast_sync && node.radios.len() == 2 {
            return Err(Error::FastSyncWithDualRadio);
        }
        let local = node.cfg.local_address;
        let pan_id = node.cfg.pan_id;

        // Rebuild the schedule bindings from scratch so setup is
        // idempotent.
        let mut schedule = Schedule::new(
            &self.cfg.timeslot_sequence_us,
            &self.cfg.channel_sequence,
            self.cfg.chip_rate.hz(),
        )?;

        let rdo_field = self.mac.rdo.enabled;
        let channel_seq_max = self.cfg.channel_sequence.iter().copied().max().unwrap_or(0);

        for (idx, conn) in self.connections.iter_mut().enumerate() {
            let is_tx = conn.cfg.source_address == local;
            let is_rx = conn.cfg.destination_address == local
                || conn.cfg.destination_address == BROADCAST_ADDRESS;
            if !is_tx && !is_rx {
                return Err(Error::ConnectionAddress);
            }
            conn.is_tx = is_tx;
            if !conn.auto_reply_only() {
                if conn.channels.is_empty() {
                    return Err(Error::NoChannelInit);
                }
                if channel_seq_max as usize >= conn.channels.len() {
                    return Err(Error::NoChannelInit);
                }
            }
            for id in &conn.cfg.timeslot_ids {
                schedule.bind_connection(*id, ConnectionId(idx as u8))?;
            }
        }

        // Per-slot agreement and classification.
        let conn_id_field = (0..schedule.timeslot_count())
            .any(|i| schedule.timeslot(i).main_conns.len() > 1);
        for conn in self.connections.iter_mut() {
            conn.build_protocol(conn_id_field, rdo_field)?;
        }
        for i in 0..schedule.timeslot_count() {
            let slot = schedule.timeslot(i);
            let mains = slot.main_conns.clone();
            let autos = slot.auto_conns.clone();
            if let Some(&first) = mains.first() {
                let first_conn = &self.connections[first.index()];
                let first_ack = first_conn.ack_enabled;
                let first_prio = first_conn.priority_enabled;
                let first_layout = first_conn.protocol.clone();
                for &other in mains.iter().skip(1) {
                    let other_conn = &self.connections[other.index()];
                    if other_conn.ack_enabled != first_ack
                        || !other_conn.protocol.layout_matches(&first_layout)
                    {
                        return Err(Error::NonMatchingSameTimeslotConnField);
                    }
                    if other_conn.priority_enabled != first_prio {
                        return Err(Error::PrioNotEnableOnAllConn);
                    }
                }
                if let Some(&auto) = autos.first() {
                    let auto_conn = &self.connections[auto.index()];
                    if auto_conn.credit_flow_ctrl != first_conn.credit_flow_ctrl {
                        return Err(Error::NonMatchingSameTimeslotConnField);
                    }
                }
                let main_pair =
                    (first_conn.cfg.source_address, first_conn.cfg.destination_address);
                let auto_pair = autos.first().map(|&a| {
                    let c = &self.connections[a.index()];
                    (c.cfg.source_address, c.cfg.destination_address)
                });
                let slot_use = classify(local, BROADCAST_ADDRESS, main_pair, auto_pair);
                schedule.timeslot_mut(i).slot_use = slot_use;
            }
            let node = self.node.as_ref().ok_or(Error::NotInitialized)?;
            let lightest = node
                .radios
                .iter()
                .map(|r| r.sleep_level)
                .min()
                .unwrap_or(SleepLevel::Idle);
            schedule.timeslot_mut(i).sleep_level = self
                .timeslot_sleep_levels
                .get(i)
                .copied()
                .unwrap_or(lightest)
                .min(lightest);
        }

        // Carve the arena: every queue, then the scratch frames.
        self.arena.reset();
        for conn in self.connections.iter_mut() {
            let header_size = conn.protocol.header_size();
            let queue = xlayer::FrameQueue::new(
                &mut self.arena,
                conn.cfg.queue_size,
                header_size,
                conn.cfg.max_payload_size,
            )?;
            if conn.is_tx {
                conn.tx_queue = Some(queue);
                conn.rx_queue = None;
            } else {
                conn.rx_queue = Some(queue);
                conn.tx_queue = None;
            }
        }
        let scratch = 2 + protocol::MAX_HEADER_SIZE as usize;
        self.sync_region = self.arena.carve(scratch)?;
        self.ack_region = self.arena.carve(scratch)?;
        self.overrun_region = self.arena.carve(phy::FRAME_BURST_MAX)?;

        let mut mac = MacCore::new(schedule, pan_id);
        mac.rdo = self.mac.rdo;
        mac.ddcm = self.mac.ddcm;
        mac.random_channel = self.mac.random_channel;
        mac.certification = self.mac.certification;
        mac.fast_sync = self.mac.fast_sync;
        if self.mac.fast_sync {
            mac.sync = schedule::TdmaSync::new(64, 4);
        }
        // High-performance concurrency turns the coexistence mechanisms on
        // with their default tuning unless they were configured explicitly.
        if self.cfg.concurrency_mode == ConcurrencyMode::HighPerf && !mac.certification {
            if !mac.rdo.enabled {
                mac.rdo = Rdo::new(96, 7);
            }
            if !mac.ddcm.enabled {
                let two_cycles = (mac.schedule.cycle_duration_pll() * 2) as u32;
                mac.ddcm = Ddcm::new(32, two_cycles);
            }
        }
        self.mac = mac;

        self.state = StackState::Configured;
        Ok(())
    }

    /// Total arena bytes the current configuration needs.
    pub fn allocated_bytes(&self) -> usize {
        self.arena.used()
    }

    /// True while the schedule is running.
    pub fn is_connected(&self) -> bool {
        self.state == StackState::Connected
    }

    const VTABLE: &'static isr::Vtable = &isr::Vtable {
        radio_irq: Self::radio_irq_trampoline,
        spi_complete: Self::spi_complete_trampoline,
        sync_timer: Self::sync_timer_trampoline,
        callbacks: Self::callbacks_trampoline,
    };

    unsafe fn radio_irq_trampoline(ctx: *mut (), radio: RadioId) {
        let stack = unsafe { &mut *(ctx as *mut Stack<'static, H>) };
        stack.radio_irq(radio);
    }

    unsafe fn spi_complete_trampoline(ctx: *mut (), radio: RadioId) {
        let stack = unsafe { &mut *(ctx as *mut Stack<'static, H>) };
        stack.spi_complete(radio);
    }

    unsafe fn sync_timer_trampoline(ctx: *mut ()) {
        let stack = unsafe { &mut *(ctx as *mut Stack<'static, H>) };
        stack.sync_timer();
    }

    unsafe fn callbacks_trampoline(ctx: *mut ()) {
        let stack = unsafe { &mut *(ctx as *mut Stack<'static, H>) };
        stack.process_callbacks();
    }

    /// Start the schedule and install the interrupt entry points.
    pub fn connect(&mut self) -> Result<()> {
        match self.state {
            StackState::Connected => return Err(Error::AlreadyConnected),
            StackState::Stopped => return Err(Error::NotInitialized),
            StackState::Configured => {}
        }
        for conn in self.connections.iter_mut() {
            conn.arq_tx.reset();
            conn.arq_rx.reset();
            conn.frag_rx.reset();
            conn.gain_loop.reset();
            conn.connected = false;
            conn.success_streak = 0;
            conn.miss_streak = 0;
            conn.credit_available = 1;
        }
        self.mac.schedule.restart();
        self.mac.callback_queue.clear();
        for busy in &self.spi_busy {
            busy.store(false, core::sync::atomic::Ordering::Relaxed);
        }
        unsafe { isr::install(self as *mut _ as *mut (), Self::VTABLE) };
        let radio_count = self.radio_count();
        for r in 0..radio_count {
            self.hal.enable_radio_irq(RadioId::from_index(r));
        }
        if radio_count == 2 {
            let period = self.mac.schedule.cycle_duration_pll() as u32;
            self.hal.multi_radio_timer_set_period(period);
            self.hal.multi_radio_timer_start();
        }
        self.state = StackState::Connected;
        self.prepare_current_slot();
        Ok(())
    }

    /// Stop the schedule, abort pending radio work, uninstall the
    /// interrupt entry points. Bounded by `timeout` on the tick source.
    pub fn disconnect(&mut self, timeout: Duration) -> Result<()> {
        if self.state != StackState::Connected {
            return Err(Error::NotConnected);
        }
        let radio_count = self.radio_count();
        for r in 0..radio_count {
            self.hal.disable_radio_irq(RadioId::from_index(r));
        }
        if radio_count == 2 {
            self.hal.multi_radio_timer_stop();
        }
        // Let any in-flight DMA land before tearing down.
        let tick_hz = self.hal.tick_frequency_hz() as u64;
        let deadline =
            self.hal.tick() + timeout.as_micros() * tick_hz / 1_000_000;
        while self.spi_busy.iter().any(|b| b.load(core::sync::atomic::Ordering::Acquire)) {
            if self.hal.tick() > deadline {
                isr::uninstall();
                self.state = StackState::Configured;
                return Err(Error::DisconnectTimeout);
            }
        }
        isr::uninstall();
        for phy in &mut self.phys {
            phy.abort();
        }
        for r in 0..radio_count {
            let node = self.node.as_ref().ok_or(Error::NotInitialized)?;
            if let Some(radio) = node.radios.get(r).cloned() {
                radio.flush(&mut self.hal)?;
                radio.sleep(&mut self.hal)?;
            }
        }
        self.mac.callback_queue.clear();
        self.state = StackState::Configured;
        Ok(())
    }

    /// Drop the node, the connections and the carved arena, and install a
    /// new schedule configuration. Used by the pairing procedure and by
    /// applications rebuilding their network after pairing.
    pub fn reconfigure(&mut self, cfg: StackCfg) -> Result<()> {
        self.check_stopped()?;
        if cfg.timeslot_sequence_us.is_empty() {
            return Err(Error::ZeroTimeslotSeqLen);
        }
        if cfg.channel_sequence.is_empty() {
            return Err(Error::ZeroChanSeqLen);
        }
        let schedule = Schedule::new(
            &cfg.timeslot_sequence_us,
            &cfg.channel_sequence,
            cfg.chip_rate.hz(),
        )?;
        self.cfg = cfg;
        self.node = None;
        self.connections.clear();
        self.timeslot_sleep_levels.clear();
        self.mac = MacCore::new(schedule, 0);
        self.arena.reset();
        self.state = StackState::Stopped;
        Ok(())
    }

    /// Free-running HAL tick, exposed for timeout bookkeeping.
    pub fn hal_tick(&self) -> u64 {
        self.hal.tick()
    }

    pub fn hal_tick_frequency_hz(&self) -> u32 {
        self.hal.tick_frequency_hz()
    }

    /// Release every arena carve. Only valid while disconnected.
    pub fn free_memory(&mut self) -> Result<()> {
        self.check_stopped()?;
        for conn in self.connections.iter_mut() {
            conn.tx_queue = None;
            conn.rx_queue = None;
        }
        self.arena.reset();
        self.state = StackState::Stopped;
        Ok(())
    }

    fn radio_count(&self) -> usize {
        self.node.as_ref().map_or(1, |n| n.radio_count().max(1))
    }

    // ------------------------------------------------------------------
    // Data path
    // ------------------------------------------------------------------

    fn check_running_conn(&self, id: ConnectionId) -> Result<()> {
        if self.state == StackState::Stopped {
            return Err(Error::NotInitialized);
        }
        self.conn(id).map(|_| ())
    }

    /// Queue one payload for transmission. Payloads larger than the
    /// connection MTU are fragmented when fragmentation is enabled.
    pub fn send(&mut self, id: ConnectionId, payload: &[u8]) -> Result<()> {
        self.check_running_conn(id)?;
        let conn = &mut self.connections[id.index()];
        if !conn.is_tx {
            return Err(Error::SendOnRxConn);
        }
        let mtu = conn.cfg.max_payload_size;
        let Some(queue) = conn.tx_queue.as_mut() else {
            return Err(Error::NotInitialized);
        };
        let size = payload.len() as u16;
        if !conn.fragmentation {
            if size > mtu {
                return Err(Error::SizeTooBig);
            }
            let frame = queue.free_frame(size)?;
            let region = frame.payload;
            self.arena.get_mut(Region {
                begin: region.begin,
                end: region.begin + size as u32,
            })
            .copy_from_slice(payload);
            queue.ring.producer().commit_enqueue();
            return Ok(());
        }
        let count = frag::fragment_count(size, mtu)?;
        if queue.ring.capacity() - queue.ring.len() < count {
            return Err(Error::SendQueueFull);
        }
        for index in 0..count {
            let (begin, end) = frag::fragment_span(index, size, mtu);
            let frame = queue.free_frame_at(index, end - begin)?;
            frame.frag_index = index as u8;
            frame.frag_last = index == count - 1;
            let dst = Region {
                begin: frame.payload.begin,
                end: frame.payload.begin + (end - begin) as u32,
            };
            self.arena.get_mut(dst).copy_from_slice(&payload[begin as usize..end as usize]);
        }
        let producer = queue.ring.producer();
        for _ in 0..count {
            producer.commit_enqueue();
        }
        Ok(())
    }

    /// Zero-copy transmit: reserve a slot, let `fill` build the payload in
    /// place, then queue it.
    pub fn with_tx_buffer(
        &mut self,
        id: ConnectionId,
        size: u16,
        fill: impl FnOnce(&mut [u8]),
    ) -> Result<()> {
        self.check_running_conn(id)?;
        let conn = &mut self.connections[id.index()];
        if !conn.is_tx {
            return Err(Error::SendOnRxConn);
        }
        if conn.fragmentation {
            return Err(Error::FragmentationNotSupported);
        }
        let Some(queue) = conn.tx_queue.as_mut() else {
            return Err(Error::NotInitialized);
        };
        let frame = queue.free_frame(size).map_err(|err| match err {
            Error::SendQueueFull => Error::NoBufferAvailable,
            other => other,
        })?;
        let region = Region {
            begin: frame.payload.begin,
            end: frame.payload.begin + size as u32,
        };
        fill(self.arena.get_mut(region));
        queue.ring.producer().commit_enqueue();
        Ok(())
    }

    /// Borrow the oldest received payload without releasing its slot.
    /// Call [`receive_complete`](Self::receive_complete) to release it.
    pub fn receive(&mut self, id: ConnectionId) -> Result<&[u8]> {
        self.check_running_conn(id)?;
        let conn = &self.connections[id.index()];
        if conn.fragmentation {
            return Err(Error::FragmentationNotSupported);
        }
        let queue = conn.rx_queue.as_ref().ok_or(Error::NoPayloadMemAllocOnRxConnection)?;
        let frame = queue.front().ok_or(Error::ReceiveQueueEmpty)?;
        let region = Region {
            begin: frame.payload.begin,
            end: frame.payload.begin + frame.size as u32,
        };
        Ok(self.arena.get(region))
    }

    /// Size of the oldest received payload.
    pub fn receive_payload_size(&self, id: ConnectionId) -> Result<u16> {
        let conn = self.conn(id)?;
        let queue = conn.rx_queue.as_ref().ok_or(Error::NoPayloadMemAllocOnRxConnection)?;
        Ok(queue.front().ok_or(Error::ReceiveQueueEmpty)?.size)
    }

    /// Release the oldest received payload slot.
    pub fn receive_complete(&mut self, id: ConnectionId) -> Result<()> {
        self.check_running_conn(id)?;
        let conn = &mut self.connections[id.index()];
        let queue = conn.rx_queue.as_mut().ok_or(Error::NoPayloadMemAllocOnRxConnection)?;
        if queue.ring.is_empty() {
            return Err(Error::ReceiveQueueEmpty);
        }
        queue.ring.consumer().commit_dequeue();
        Ok(())
    }

    /// Copy the oldest received message into `dst`, reassembling fragments.
    /// Returns the message size.
    pub fn receive_to_buffer(&mut self, id: ConnectionId, dst: &mut [u8]) -> Result<usize> {
        self.check_running_conn(id)?;
        let conn = &mut self.connections[id.index()];
        let queue = conn.rx_queue.as_mut().ok_or(Error::NoPayloadMemAllocOnRxConnection)?;
        let consumer_len = queue.ring.len();
        if consumer_len == 0 {
            return Err(Error::ReceiveQueueEmpty);
        }
        // Measure the message first so a short buffer leaves it queued.
        let mut total = 0usize;
        let mut frames = 0u16;
        loop {
            let Some(slot) = queue.ring.consumer().peek(frames) else {
                // The tail of a fragmented message has not arrived yet.
                return Err(Error::ReceiveQueueEmpty);
            };
            let frame = queue.frame(slot);
            total += frame.size as usize;
            frames += 1;
            if frame.frag_last {
                break;
            }
        }
        if dst.len() < total {
            return Err(Error::BufferSizeTooSmall);
        }
        let mut written = 0usize;
        for n in 0..frames {
            let slot = queue.ring.consumer().peek(n).ok_or(Error::Internal)?;
            let frame = *queue.frame(slot);
            let region = Region {
                begin: frame.payload.begin,
                end: frame.payload.begin + frame.size as u32,
            };
            dst[written..written + frame.size as usize]
                .copy_from_slice(self.arena.get(region));
            written += frame.size as usize;
        }
        let queue = self.connections[id.index()].rx_queue.as_mut().ok_or(Error::Internal)?;
        for _ in 0..frames {
            queue.ring.consumer().commit_dequeue();
        }
        Ok(total)
    }

    /// Frames currently queued for transmission.
    pub fn enqueued_count(&self, id: ConnectionId) -> Result<u16> {
        let conn = self.conn(id)?;
        Ok(conn.tx_queue.as_ref().map_or(0, |q| q.ring.len()))
    }

    /// Edge-tracked link status of the connection.
    pub fn connect_status(&self, id: ConnectionId) -> Result<bool> {
        Ok(self.conn(id)?.connected)
    }

    pub fn connection_stats(&self, id: ConnectionId) -> Result<ConnectionStats> {
        Ok(self.conn(id)?.stats)
    }

    pub fn reset_connection_stats(&mut self, id: ConnectionId) -> Result<()> {
        let tick = self.hal.tick();
        let conn = self.conn_mut(id)?;
        conn.stats.reset(tick);
        conn.lqi.reset(tick);
        Ok(())
    }

    pub fn fallback_info(&self, id: ConnectionId) -> Result<FallbackInfo> {
        let conn = self.conn(id)?;
        Ok(FallbackInfo {
            tier_count: conn.fallback.tier_count(),
            cca_abort_count: conn.stats.cca_abort_count,
            cca_force_count: conn.stats.cca_force_count,
        })
    }

    /// Averaged link quality of the connection.
    pub fn connection_lqi(&self, id: ConnectionId) -> Result<lqi::Lqi> {
        Ok(self.conn(id)?.lqi)
    }

    // ------------------------------------------------------------------
    // Slot engine (interrupt context)
    // ------------------------------------------------------------------

    pub(crate) fn radio_irq(&mut self, radio: RadioId) {
        self.pump_phy(radio.index(), PhyInput::RadioIrq);
    }

    pub(crate) fn spi_complete(&mut self, radio: RadioId) {
        self.spi_busy[radio.index()].store(false, core::sync::atomic::Ordering::Release);
        self.pump_phy(radio.index(), PhyInput::DmaComplete);
    }

    /// Dual-radio wakeup alignment tick: nudge the idle radio's sleep
    /// timer so both stay on the schedule clock.
    pub(crate) fn sync_timer(&mut self) {
        if self.radio_count() == 2 {
            let period = self.mac.schedule.cycle_duration_pll() as u32;
            self.hal.multi_radio_timer_set_period(period);
        }
    }

    /// Drain the callback queue into the application callbacks. Runs in
    /// the low-priority context-switch interrupt.
    pub(crate) fn process_callbacks(&mut self) {
        while let Some(entry) = self.mac.callback_queue.pop() {
            let Some(conn) = self.connections.get(entry.conn.index()) else {
                continue;
            };
            let callbacks = conn.callbacks;
            match entry.kind {
                CallbackKind::TxSuccess => {
                    if let Some(cb) = callbacks.tx_success {
                        cb(entry.conn);
                    }
                }
                CallbackKind::TxFail => {
                    if let Some(cb) = callbacks.tx_fail {
                        cb(entry.conn);
                    }
                }
                CallbackKind::TxDropped => {
                    if let Some(cb) = callbacks.tx_dropped {
                        cb(entry.conn);
                    }
                }
                CallbackKind::RxSuccess => {
                    if let Some(cb) = callbacks.rx_success {
                        cb(entry.conn);
                    }
                }
                CallbackKind::Event(event) => {
                    if let Some(cb) = callbacks.event {
                        cb(entry.conn, event);
                    }
                }
            }
        }
    }

    fn pump_phy(&mut self, radio: usize, input: PhyInput) {
        let output = self.phys[radio].process(input);
        self.run_spi_job(radio);
        self.handle_phy_output(radio, output);
    }

    fn run_spi_job(&mut self, radio: usize) {
        let Some(job) = self.phys[radio].take_spi_job() else {
            return;
        };
        let rid = RadioId::from_index(radio);
        self.spi_busy[radio].store(true, core::sync::atomic::Ordering::Release);
        match job {
            SpiJob::Cfg => {
                let (tx, rx) = self.phys[radio].cfg_buffers();
                self.hal.spi_transfer_dma(rid, tx, rx);
            }
            SpiJob::Events => {
                let (tx, rx) = self.phys[radio].events_buffers();
                self.hal.spi_transfer_dma(rid, tx, rx);
            }
            SpiJob::Info => {
                let (tx, rx) = self.phys[radio].info_buffers();
                self.hal.spi_transfer_dma(rid, tx, rx);
            }
            SpiJob::FrameWrite(region) => {
                let len = region.len();
                let tx = self.arena.get(region);
                let rx = self.phys[radio].frame_scratch(len);
                self.hal.spi_transfer_dma(rid, tx, rx);
            }
            SpiJob::FrameRead(region) => {
                let len = region.len();
                let scratch = self.phys[radio].frame_scratch(len);
                scratch.fill(0);
                let tx = &*scratch;
                let rx = self.arena.get_mut(region);
                self.hal.spi_transfer_dma(rid, tx, rx);
            }
        }
    }

    fn handle_phy_output(&mut self, radio: usize, output: PhyOutput) {
        match output {
            PhyOutput::None | PhyOutput::Processing | PhyOutput::Yield => {}
            PhyOutput::ConfigComplete => {
                if radio == self.processing_radio() {
                    self.end_of_slot();
                }
            }
            PhyOutput::FrameSentAck | PhyOutput::FrameSentNack | PhyOutput::FrameNotSent => {
                if radio == self.processing_radio() {
                    self.finish_tx_slot(radio);
                    self.end_of_slot();
                }
            }
            PhyOutput::FrameReceived => {
                self.finish_rx_slot(radio);
                if radio == self.processing_radio() {
                    self.end_of_slot();
                }
            }
            PhyOutput::FrameMissed | PhyOutput::FrameRejected => {
                if radio == self.processing_radio() {
                    self.finish_rx_miss(radio);
                    self.end_of_slot();
                }
            }
            PhyOutput::Error => {
                if let Some(job) = self.phys[radio].main_frame().copied()
                    && let Some(_conn) = self.connections.get(job.conn.index())
                {
                    self.mac
                        .callback_queue
                        .push(job.conn, CallbackKind::Event(ConnEvent::Error(Error::Internal)));
                }
                if radio == self.processing_radio() {
                    self.end_of_slot();
                }
            }
        }
    }

    fn processing_radio(&self) -> usize {
        if self.radio_count() == 2 {
            self.multi_radio.replying_radio() as usize
        } else {
            0
        }
    }

    fn finish_tx_slot(&mut self, radio: usize) {
        let tick = self.hal.tick();
        let Some(job) = self.phys[radio].main_frame().copied() else {
            return;
        };
        let outcome = self.phys[radio].main_outcome().unwrap_or(FrameOutcome::SentNack);
        let outcome = if self.mac.certification {
            // Certification emulates the acknowledge.
            FrameOutcome::SentAck
        } else {
            outcome
        };
        let info = self.phys[radio].last_info;
        if job.queue_slot != SYNC_QUEUE_SLOT {
            let conn = &mut self.connections[job.conn.index()];
            handle_tx_outcome(job.conn, conn, outcome, tick, &mut self.mac.callback_queue);
            conn.gain_loop.update(outcome, info.map_or(0, |i| i.rssi_code));
        }
        // Auto-reply payload piggybacked on the acknowledge.
        if outcome == FrameOutcome::SentAck
            && self.phys[radio].auto_outcome() == Some(FrameOutcome::Received)
            && let Some(auto_job) = self.phys[radio].auto_frame().copied()
            && auto_job.queue_slot < MONITOR_QUEUE_SLOT
        {
            let air_len = self.phys[radio].received_air_len();
            self.deliver_frame(auto_job, air_len, info, job.conn);
        }
    }

    fn finish_rx_slot(&mut self, radio: usize) {
        let Some(job) = self.phys[radio].main_frame().copied() else {
            return;
        };
        let info = self.phys[radio].last_info;
        let air_len = self.phys[radio].received_air_len();
        if self.radio_count() == 2 {
            let (rssi, rnsi) = info.map_or((0, 0), |i| (i.rssi_code, i.rnsi_code));
            self.multi_radio.radios_lqi[radio].record_received(rssi, rnsi);
        }
        match job.queue_slot {
            MONITOR_QUEUE_SLOT => {}
            OVERRUN_QUEUE_SLOT => {
                let conn = &mut self.connections[job.conn.index()];
                conn.stats.rx_overrun_count += 1;
                self.mac
                    .callback_queue
                    .push(job.conn, CallbackKind::Event(ConnEvent::Error(Error::RxOverrun)));
            }
            _ => {
                if radio == self.processing_radio() {
                    self.deliver_frame(job, air_len, info, job.conn);
                }
            }
        }
    }

    /// Decode the header of a frame sitting in the arena and hand it to
    /// the MAC. `credit_conn` names the connection whose flow-control
    /// credit the header refreshes.
    fn deliver_frame(
        &mut self,
        job: FrameJob,
        air_len: u8,
        info: Option<cmd::InfoImage>,
        credit_conn: ConnectionId,
    ) {
        let conn = &mut self.connections[job.conn.index()];
        let Some(queue) = conn.rx_queue.as_ref() else {
            return;
        };
        let header_size = queue.header_size();
        if air_len < 1 + header_size {
            conn.stats.rejected_count += 1;
            conn.lqi.record_rejected();
            return;
        }
        let payload_len = (air_len - 1 - header_size) as u16;
        let frame = *queue.frame(job.queue_slot);
        let header_region = Region {
            begin: frame.header.begin,
            end: frame.header.begin + header_size as u32,
        };
        let values = conn.protocol.decode(self.arena.get(header_region));
        let (rssi, rnsi) = info.map_or((0, 0), |i| (i.rssi_code, i.rnsi_code));

        // Schedule synchronization rides on any received frame of an
        // auto-sync connection on the node side.
        let is_node = self
            .node
            .as_ref()
            .is_some_and(|n| n.cfg.role == node::NetworkRole::Node);
        if is_node {
            if conn.auto_sync && let Some(i) = info {
                self.mac.on_sync_frame(i.rx_time_pll as i32);
            }
            self.mac.rdo.sync_from_peer(values.rdo);
        }

        handle_rx_frame(
            job.conn,
            conn,
            job.queue_slot,
            values,
            payload_len,
            rssi,
            rnsi,
            &mut self.mac.callback_queue,
        );
        if values.credit != 0 || conn.credit_flow_ctrl {
            let credit = values.credit;
            if let Some(peer) = self.connections.get_mut(credit_conn.index())
                && peer.credit_flow_ctrl
            {
                peer.credit_available = credit;
            }
        }
    }

    fn finish_rx_miss(&mut self, radio: usize) {
        let Some(job) = self.phys[radio].main_frame().copied() else {
            return;
        };
        let outcome = self.phys[radio].main_outcome().unwrap_or(FrameOutcome::Missed);
        if job.queue_slot < MONITOR_QUEUE_SLOT {
            let conn = &mut self.connections[job.conn.index()];
            handle_rx_miss(job.conn, conn, outcome, &mut self.mac.callback_queue);
            if conn.auto_sync {
                self.mac.sync.on_sync_missed();
            }
            conn.gain_loop.update(outcome, 0);
        }
    }

    fn end_of_slot(&mut self) {
        let pan_id = self.node.as_ref().map_or(0, |n| n.cfg.pan_id);
        // Multi-radio decision window at every cycle wrap.
        if self.radio_count() == 2 && self.mac.schedule.current_index() == 0 {
            let tick = self.hal.tick();
            self.multi_radio.update(tick);
        }
        self.slot_offset_pll = self.mac.advance_slot(pan_id);
        self.prepare_current_slot();
        if !self.mac.callback_queue.is_empty() {
            self.hal.trigger_context_switch();
        }
    }

    /// Stage the current slot on every radio and kick the config bursts.
    fn prepare_current_slot(&mut self) {
        let slot_index = self.mac.schedule.current_index() as usize;
        let slot = self.mac.schedule.timeslot(slot_index);
        let slot_use = slot.slot_use;
        let duration_pll = slot.duration_pll;
        let sleep_level = slot.sleep_level;
        let main_conns = slot.main_conns.clone();
        let auto_conns = slot.auto_conns.clone();

        let mut cfg = RadioCfg::default();
        let start_pll = (duration_pll as i64 + self.slot_offset_pll as i64).max(0) as u32;
        cfg.sleep_period = (start_pll & 0xFFFF) as u16;
        cfg.sleep_pwrup = (start_pll >> 16) as u16;
        cfg.timer_sleep_cfg = pack_timer_sleep(sleep_level, true);
        cfg.frame_proc = self.mac.schedule.current_index();

        let (role, processing) = if slot_use.tx_main {
            (self.stage_tx_slot(&mut cfg, &main_conns, &auto_conns, slot_use), true)
        } else if slot_use.rx_main {
            (self.stage_rx_slot(&mut cfg, &main_conns, &auto_conns, slot_use), true)
        } else {
            cfg.actions = actions::GO_SLEEP as u16;
            cfg.irq_mask = IrqFlags::WAKEUP;
            (SlotRole::Sleep, false)
        };

        let radio_count = self.radio_count();
        let processing_radio = self.processing_radio();
        for r in 0..radio_count {
            if r == processing_radio || !processing {
                self.phys[r].prepare_slot(role, &cfg);
            } else if slot_use.rx_main {
                // Idle radio listens for selection statistics only.
                let monitor = self.monitor_job(&main_conns);
                self.phys[r].set_auto_frame(None);
                self.phys[r].set_main_frame(monitor);
                self.phys[r].prepare_slot(SlotRole::RxMain, &cfg);
            } else {
                self.phys[r].prepare_none(&cfg);
            }
            self.run_spi_job(r);
        }
    }

    fn monitor_job(&self, main_conns: &[ConnectionId]) -> Option<FrameJob> {
        let conn_id = *main_conns.first()?;
        Some(FrameJob {
            conn: conn_id,
            queue_slot: MONITOR_QUEUE_SLOT,
            region: self.overrun_region,
            air_len: (phy::FRAME_BURST_MAX - 1) as u8,
        })
    }

    /// Stage a transmit slot: arbitration, header assembly, channel and
    /// fallback resolution, CCA plan.
    fn stage_tx_slot(
        &mut self,
        cfg: &mut RadioCfg,
        main_conns: &[ConnectionId],
        auto_conns: &[ConnectionId],
        slot_use: SlotUse,
    ) -> SlotRole {
        let slot_index = self.mac.schedule.current_index() as usize;
        let picked = {
            let slot = self.mac.schedule.timeslot(slot_index);
            pick_tx_conn(slot, &mut self.connections)
        };
        let node_cfg = match self.node.as_ref() {
            Some(node) => node.cfg,
            None => return SlotRole::Sleep,
        };
        let radio_idx = self.processing_radio();

        let Some(conn_id) = picked else {
            // Nothing to send: the coordinator still radiates sync frames
            // on auto-sync slots so nodes keep their clock.
            let sync_conn = main_conns
                .first()
                .filter(|&&id| self.connections[id.index()].auto_sync)
                .copied();
            if node_cfg.role == node::NetworkRole::Coordinator
                && let Some(conn_id) = sync_conn
            {
                return self.stage_sync_frame(cfg, conn_id, &node_cfg);
            }
            cfg.actions = actions::GO_SLEEP as u16;
            cfg.irq_mask = IrqFlags::WAKEUP;
            self.phys[radio_idx].set_main_frame(None);
            self.phys[radio_idx].set_auto_frame(None);
            return SlotRole::Sleep;
        };

        // Header assembly straight into the arena slot.
        let rdo_value = self.mac.rdo.value();
        let channel_index = self.mac.schedule.current_channel() as usize;
        let conn = &mut self.connections[conn_id.index()];
        let Some(queue) = conn.tx_queue.as_mut() else {
            return SlotRole::Sleep;
        };
        let Some(front_slot) = queue.ring.consumer().front() else {
            return SlotRole::Sleep;
        };
        let header_size = queue.header_size();
        let frame = *queue.frame(front_slot);
        let air_len = frame.air_size(header_size);
        let values = HeaderValues {
            seq: conn.arq_tx.seq(),
            frag_index: frame.frag_index,
            frag_last: frame.frag_last,
            connection_id: conn_id.0,
            rdo: rdo_value,
            credit: 0,
            ranging: 0,
        };
        let header_region = Region {
            begin: frame.header.begin,
            end: frame.header.begin + header_size as u32,
        };
        conn.protocol.encode(&values, self.arena.get_mut(header_region));
        let slot_region = frame.slot;
        {
            let bytes = self.arena.get_mut(Region {
                begin: slot_region.begin,
                end: slot_region.begin + 2,
            });
            bytes[0] = regs::FIFO | regs::WRITE_BIT;
            bytes[1] = air_len;
        }

        // Channel, fallback tier and CCA plan.
        let conn = &self.connections[conn_id.index()];
        let channel = conn.channels[channel_index % conn.channels.len()];
        let (pulse_count, pulse_width, pulse_gain, cca_tries) = if self.mac.certification {
            (radio::TX_PULSE_COUNT_MAX, 7, 7, 0)
        } else {
            match conn.fallback.select(frame.size) {
                Some((_, tier)) => (
                    tier.tx_pulse_count,
                    tier.tx_pulse_width,
                    tier.tx_pulse_gain,
                    tier.cca_try_count,
                ),
                None => (
                    channel.tx_pulse_count,
                    channel.tx_pulse_width,
                    channel.tx_pulse_gain,
                    conn.cca.try_count,
                ),
            }
        };
        let ack = conn.ack_enabled && !self.mac.certification;

        cfg.actions = actions::START_TX as u16;
        cfg.tx_address = pack_address(node_cfg.pan_id, conn.cfg.destination_address);
        cfg.rx_address = pack_address(node_cfg.pan_id, node_cfg.local_address);
        cfg.rx_tx_size = pack_rx_tx_size(u8::MAX, air_len);
        cfg.phy_0_1 = pack_phy(conn.modulation, conn.fec_ratio, conn.cfg.chip_repetition);
        if conn.cca.enabled && !self.mac.certification {
            cfg.cca_settings = pack_cca(conn.cca.threshold, cca_tries, conn.cca.retry_time_pll);
            cfg.cca_thres_gain = conn.cca.threshold as u16;
        }
        cfg.rf_gain = conn.gain_loop.gain_value() as u16;
        cfg.freq_cfg1 = pack_freq(channel.frequency_mhz);
        cfg.pulse_cfg = pack_pulse(pulse_count, pulse_width, pulse_gain);
        cfg.irq_mask = IrqFlags::TX_END
            | IrqFlags::CCA_FAIL
            | if ack { IrqFlags::RX_END | IrqFlags::RX_TIMEOUT } else { 0 };

        self.phys[radio_idx].set_main_frame(Some(FrameJob {
            conn: conn_id,
            queue_slot: front_slot,
            region: slot_region,
            air_len,
        }));

        // Reserve the landing slot for a piggybacked auto-reply payload.
        let auto_job = if slot_use.rx_auto {
            auto_conns.first().and_then(|&auto_id| self.reserve_rx_job(auto_id))
        } else {
            None
        };
        self.phys[radio_idx].set_auto_frame(auto_job);

        SlotRole::TxMain { ack }
    }

    /// Coordinator keep-alive: header-only frame from the sync scratch
    /// region, not backed by any queue.
    fn stage_sync_frame(
        &mut self,
        cfg: &mut RadioCfg,
        conn_id: ConnectionId,
        node_cfg: &NodeCfg,
    ) -> SlotRole {
        let radio_idx = self.processing_radio();
        let rdo_value = self.mac.rdo.value();
        let channel_index = self.mac.schedule.current_channel() as usize;
        let conn = &self.connections[conn_id.index()];
        let header_size = conn.protocol.header_size();
        let air_len = 1 + header_size;
        let values = HeaderValues {
            seq: conn.arq_tx.seq(),
            rdo: rdo_value,
            connection_id: conn_id.0,
            ..Default::default()
        };
        let header_region = Region {
            begin: self.sync_region.begin + 2,
            end: self.sync_region.begin + 2 + header_size as u32,
        };
        let protocol = conn.protocol.clone();
        protocol.encode(&values, self.arena.get_mut(header_region));
        let head = self.arena.get_mut(Region {
            begin: self.sync_region.begin,
            end: self.sync_region.begin + 2,
        });
        head[0] = regs::FIFO | regs::WRITE_BIT;
        head[1] = air_len;

        let conn = &self.connections[conn_id.index()];
        let channel = conn.channels[channel_index % conn.channels.len()];
        cfg.actions = actions::START_TX as u16;
        cfg.tx_address = pack_address(node_cfg.pan_id, conn.cfg.destination_address);
        cfg.rx_tx_size = pack_rx_tx_size(u8::MAX, air_len);
        cfg.phy_0_1 = pack_phy(conn.modulation, conn.fec_ratio, conn.cfg.chip_repetition);
        cfg.freq_cfg1 = pack_freq(channel.frequency_mhz);
        cfg.pulse_cfg =
            pack_pulse(channel.tx_pulse_count, channel.tx_pulse_width, channel.tx_pulse_gain);
        cfg.irq_mask = IrqFlags::TX_END;

        self.phys[radio_idx].set_main_frame(Some(FrameJob {
            conn: conn_id,
            queue_slot: SYNC_QUEUE_SLOT,
            region: Region {
                begin: self.sync_region.begin,
                end: self.sync_region.begin + 1 + air_len as u32,
            },
            air_len,
        }));
        self.phys[radio_idx].set_auto_frame(None);
        SlotRole::TxMain { ack: false }
    }

    /// Reserve the next RX queue slot of `conn_id` as a PHY frame job,
    /// falling back to the overrun scratch region when the queue is full.
    fn reserve_rx_job(&mut self, conn_id: ConnectionId) -> Option<FrameJob> {
        let conn = self.connections.get_mut(conn_id.index())?;
        let queue = conn.rx_queue.as_mut()?;
        let pending = conn.frag_rx.pending();
        let header_size = queue.header_size();
        let max_air = 1 + header_size as u16 + queue.max_payload();
        match queue.free_frame_at(pending, 0) {
            Ok(frame) => {
                let region = frame.slot;
                let slot = queue.ring.producer().free_slot_at(pending)?;
                Some(FrameJob {
                    conn: conn_id,
                    queue_slot: slot,
                    region,
                    air_len: max_air.min(255) as u8,
                })
            }
            Err(_) => Some(FrameJob {
                conn: conn_id,
                queue_slot: OVERRUN_QUEUE_SLOT,
                region: self.overrun_region,
                air_len: (phy::FRAME_BURST_MAX - 1) as u8,
            }),
        }
    }

    /// Stage a receive slot, loading the auto-reply frame when this side
    /// answers the peer in the same slot.
    fn stage_rx_slot(
        &mut self,
        cfg: &mut RadioCfg,
        main_conns: &[ConnectionId],
        auto_conns: &[ConnectionId],
        slot_use: SlotUse,
    ) -> SlotRole {
        let node_cfg = match self.node.as_ref() {
            Some(node) => node.cfg,
            None => return SlotRole::Sleep,
        };
        let radio_idx = self.processing_radio();
        let channel_index = self.mac.schedule.current_channel() as usize;
        let Some(&main_id) = main_conns.first() else {
            return SlotRole::Sleep;
        };
        let main_job = self.reserve_rx_job(main_id);
        self.phys[radio_idx].set_main_frame(main_job);

        // Load the auto-reply for the hardware to answer with.
        let auto_job = if slot_use.tx_auto {
            auto_conns
                .first()
                .and_then(|&auto_id| self.stage_auto_reply(auto_id, main_id, node_cfg.pan_id))
        } else {
            None
        };
        self.phys[radio_idx].set_auto_frame(auto_job);

        let conn = &self.connections[main_id.index()];
        let channel = conn.channels[channel_index % conn.channels.len()];
        cfg.actions = actions::START_RX as u16;
        cfg.rx_address = pack_address(node_cfg.pan_id, node_cfg.local_address);
        cfg.rx_tx_size = pack_rx_tx_size(u8::MAX, 0);
        cfg.phy_0_1 = pack_phy(conn.modulation, conn.fec_ratio, conn.cfg.chip_repetition);
        cfg.rf_gain = conn.gain_loop.gain_value() as u16;
        cfg.freq_cfg1 = pack_freq(channel.frequency_mhz);
        cfg.pulse_cfg = pack_pulse(channel.rx_pulse_count, 0, 0);
        cfg.irq_mask = IrqFlags::RX_END | IrqFlags::RX_TIMEOUT;
        if self.mac.sync.wide_window() {
            // Open the RX window wide until the schedule clock locks.
            cfg.time_limit = u16::MAX;
        }
        SlotRole::RxMain
    }

    /// Build the frame the radio auto-replies with: the front of the auto
    /// connection's TX queue when it has data, a header-only acknowledge
    /// otherwise. The credit field advertises the main RX queue's room.
    fn stage_auto_reply(
        &mut self,
        auto_id: ConnectionId,
        main_id: ConnectionId,
        _pan_id: u16,
    ) -> Option<FrameJob> {
        let credit = {
            let main = self.connections.get(main_id.index())?;
            main.rx_queue
                .as_ref()
                .map_or(0, |q| (q.ring.capacity() - q.ring.len()) as u8)
        };
        let conn = self.connections.get_mut(auto_id.index())?;
        if !conn.is_tx {
            return None;
        }
        let rdo_value = self.mac.rdo.value();
        match conn.tx_queue.as_mut().and_then(|q| {
            let slot = q.ring.consumer().front()?;
            Some((slot, *q.frame(slot), q.header_size()))
        }) {
            Some((queue_slot, frame, header_size)) => {
                let air_len = frame.air_size(header_size);
                let values = HeaderValues {
                    seq: conn.arq_tx.seq(),
                    frag_index: frame.frag_index,
                    frag_last: frame.frag_last,
                    connection_id: auto_id.0,
                    rdo: rdo_value,
                    credit,
                    ranging: 0,
                };
                let header_region = Region {
                    begin: frame.header.begin,
                    end: frame.header.begin + header_size as u32,
                };
                let protocol = conn.protocol.clone();
                protocol.encode(&values, self.arena.get_mut(header_region));
                let head = self.arena.get_mut(Region {
                    begin: frame.slot.begin,
                    end: frame.slot.begin + 2,
                });
                head[0] = regs::FIFO | regs::WRITE_BIT;
                head[1] = air_len;
                Some(FrameJob {
                    conn: auto_id,
                    queue_slot,
                    region: Region {
                        begin: frame.slot.begin,
                        end: frame.slot.begin + 1 + air_len as u32,
                    },
                    air_len,
                })
            }
            None => {
                // Header-only acknowledge from the scratch region.
                let header_size = conn.protocol.header_size();
                let air_len = 1 + header_size;
                let values = HeaderValues {
                    seq: conn.arq_tx.seq(),
                    connection_id: auto_id.0,
                    rdo: rdo_value,
                    credit,
                    ..Default::default()
                };
                let protocol = conn.protocol.clone();
                let header_region = Region {
                    begin: self.ack_region.begin + 2,
                    end: self.ack_region.begin + 2 + header_size as u32,
                };
                protocol.encode(&values, self.arena.get_mut(header_region));
                let head = self.arena.get_mut(Region {
                    begin: self.ack_region.begin,
                    end: self.ack_region.begin + 2,
                });
                head[0] = regs::FIFO | regs::WRITE_BIT;
                head[1] = air_len;
                Some(FrameJob {
                    conn: auto_id,
                    queue_slot: SYNC_QUEUE_SLOT,
                    region: Region {
                        begin: self.ack_region.begin,
                        end: self.ack_region.begin + 1 + air_len as u32,
                    },
                    air_len,
                })
            }
        }
    }
}

impl<H: WirelessHal> Drop for Stack<'_, H> {
    fn drop(&mut self) {
        if self.state == StackState::Connected {
            isr::uninstall();
        }
    }
}
