//! # TDMA schedule
//!
//! The schedule is an ordered array of timeslots iterated cyclically, plus
//! the channel sequence walked one step per slot. Each timeslot carries an
//! ordered list of main connections (the data direction) and an ordered
//! list of auto-reply connections (the piggyback direction). What a slot
//! means for the local device (transmit, receive, auto-reply, or sleep)
//! is computed once at setup from the connection addresses.

use crate::error::{Error, Result};
use crate::radio::SleepLevel;
use crate::ConnectionId;

/// Tag bit distinguishing auto-reply timeslot references from main ones.
const AUTO_REPLY_BIT: u8 = 0x80;

/// Reference to a schedule entry, as used in a connection configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimeslotId(u8);

impl TimeslotId {
    /// Main (data) use of timeslot `index`.
    pub const fn main(index: u8) -> Self {
        Self(index & !AUTO_REPLY_BIT)
    }

    /// Auto-reply (piggyback) use of timeslot `index`.
    pub const fn auto(index: u8) -> Self {
        Self(index | AUTO_REPLY_BIT)
    }

    pub const fn is_auto(self) -> bool {
        self.0 & AUTO_REPLY_BIT != 0
    }

    pub const fn index(self) -> usize {
        (self.0 & !AUTO_REPLY_BIT) as usize
    }
}

/// What the local device does with a timeslot, computed at setup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotUse {
    /// Local device transmits the main frame of this slot.
    pub tx_main: bool,
    /// Local device receives the main frame of this slot.
    pub rx_main: bool,
    /// Local device sends the auto-reply of this slot.
    pub tx_auto: bool,
    /// Local device receives the auto-reply of this slot.
    pub rx_auto: bool,
}

impl SlotUse {
    pub fn is_sleep(&self) -> bool {
        !(self.tx_main || self.rx_main || self.tx_auto || self.rx_auto)
    }
}

/// Classify one slot for the local address.
///
/// `main` is the (source, destination) of the first main connection,
/// `auto` of the first auto-reply connection when present.
pub fn classify(local: u8, broadcast: u8, main: (u8, u8), auto: Option<(u8, u8)>) -> SlotUse {
    let tx_main = local == main.0;
    let rx_main = local == main.1 || main.1 == broadcast;
    let mut slot_use = SlotUse { tx_main, rx_main: rx_main && !tx_main, ..Default::default() };
    if let Some((auto_src, auto_dst)) = auto {
        slot_use.tx_auto = slot_use.rx_main && auto_src == local;
        slot_use.rx_auto = slot_use.tx_main && (auto_dst == local || auto_dst == broadcast);
    }
    slot_use
}

/// One schedule entry.
#[derive(Debug, Clone)]
pub struct Timeslot {
    pub duration_pll: u32,
    pub sleep_level: SleepLevel,
    pub main_conns: heapless::Vec<ConnectionId, { crate::MAX_CONN_PER_TIMESLOT }>,
    pub auto_conns: heapless::Vec<ConnectionId, { crate::MAX_CONN_PER_TIMESLOT }>,
    pub slot_use: SlotUse,
}

impl Timeslot {
    fn new(duration_pll: u32) -> Self {
        Self {
            duration_pll,
            sleep_level: SleepLevel::Idle,
            main_conns: heapless::Vec::new(),
            auto_conns: heapless::Vec::new(),
            slot_use: SlotUse::default(),
        }
    }
}

/// Convert a slot duration to PLL cycles at the given chip rate.
pub fn us_to_pll(duration_us: u32, chip_rate_hz: u32) -> u32 {
    ((duration_us as u64 * chip_rate_hz as u64) / 1_000_000) as u32
}

/// Cyclic timeslot iterator plus channel-sequence walker.
#[derive(Debug)]
pub struct Schedule {
    timeslots: heapless::Vec<Timeslot, { crate::MAX_TIMESLOTS }>,
    channel_sequence: heapless::Vec<u8, { crate::MAX_CHANNEL_SEQ }>,
    current_slot: u16,
    current_channel: u16,
    /// Completed schedule cycles since connect.
    cycle_count: u32,
}

impl Schedule {
    pub fn new(durations_us: &[u32], channel_sequence: &[u8], chip_rate_hz: u32) -> Result<Self> {
        if durations_us.is_empty() {
            return Err(Error::ZeroTimeslotSeqLen);
        }
        if channel_sequence.is_empty() {
            return Err(Error::ZeroChanSeqLen);
        }
        let mut timeslots = heapless::Vec::new();
        for &us in durations_us {
            if us == 0 {
                return Err(Error::NullTimeslotDuration);
            }
            timeslots
                .push(Timeslot::new(us_to_pll(us, chip_rate_hz)))
                .map_err(|_| Error::InvalidParameter)?;
        }
        let mut seq = heapless::Vec::new();
        seq.extend_from_slice(channel_sequence).map_err(|_| Error::InvalidParameter)?;
        Ok(Self {
            timeslots,
            channel_sequence: seq,
            current_slot: 0,
            current_channel: 0,
            cycle_count: 0,
        })
    }

    pub fn timeslot_count(&self) -> usize {
        self.timeslots.len()
    }

    pub fn timeslot(&self, index: usize) -> &Timeslot {
        &self.timeslots[index]
    }

    pub fn timeslot_mut(&mut self, index: usize) -> &mut Timeslot {
        &mut self.timeslots[index]
    }

    pub fn current(&self) -> &Timeslot {
        &self.timeslots[self.current_slot as usize]
    }

    pub fn current_index(&self) -> u16 {
        self.current_slot
    }

    pub fn cycle_count(&self) -> u32 {
        self.cycle_count
    }

    /// Duration of one full cycle, in PLL cycles.
    pub fn cycle_duration_pll(&self) -> u64 {
        self.timeslots.iter().map(|ts| ts.duration_pll as u64).sum()
    }

    /// Channel-sequence entry for the current slot.
    pub fn current_channel(&self) -> u8 {
        self.channel_sequence[self.current_channel as usize]
    }

    pub fn channel_sequence_len(&self) -> u16 {
        self.channel_sequence.len() as u16
    }

    /// Override the channel-sequence position (random channel mode).
    pub fn set_channel_position(&mut self, position: u16) {
        self.current_channel = position % self.channel_sequence.len() as u16;
    }

    /// Move to the next slot and channel-sequence entry.
    pub fn advance(&mut self) {
        self.current_slot += 1;
        if self.current_slot as usize == self.timeslots.len() {
            self.current_slot = 0;
            self.cycle_count += 1;
        }
        self.current_channel = (self.current_channel + 1) % self.channel_sequence.len() as u16;
    }

    pub fn restart(&mut self) {
        self.current_slot = 0;
        self.current_channel = 0;
        self.cycle_count = 0;
    }

    /// Register a connection on the timeslot named by `id`.
    pub fn bind_connection(&mut self, id: TimeslotId, conn: ConnectionId) -> Result<()> {
        let slot = self.timeslots.get_mut(id.index()).ok_or(Error::InvalidParameter)?;
        let list = if id.is_auto() { &mut slot.auto_conns } else { &mut slot.main_conns };
        list.push(conn).map_err(|_| Error::TimeslotConnLimitReached)
    }
}

/// Drift correction against the coordinator clock.
///
/// Every received sync frame reports a phase offset; the correction for the
/// next wakeup is that offset clamped to the lock window. When no sync
/// frame has been seen for `loss_threshold` consecutive sync slots the
/// receiver opens a wider RX window until lock is reacquired.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TdmaSync {
    /// Clamp for one correction step, in PLL cycles.
    pub max_step_pll: u16,
    /// Consecutive missed sync slots before the window widens.
    pub loss_threshold: u16,
    correction_pll: i32,
    missed_count: u16,
    synced_once: bool,
}

impl TdmaSync {
    pub fn new(max_step_pll: u16, loss_threshold: u16) -> Self {
        Self {
            max_step_pll,
            loss_threshold,
            correction_pll: 0,
            missed_count: 0,
            synced_once: false,
        }
    }

    /// Phase offset measured on a received sync frame.
    pub fn on_sync_frame(&mut self, phase_offset_pll: i32) {
        let clamp = self.max_step_pll as i32;
        self.correction_pll = phase_offset_pll.clamp(-clamp, clamp);
        self.missed_count = 0;
        self.synced_once = true;
    }

    pub fn on_sync_missed(&mut self) {
        self.correction_pll = 0;
        self.missed_count = self.missed_count.saturating_add(1);
    }

    /// Correction to apply to the next wakeup, consumed on read.
    pub fn take_correction_pll(&mut self) -> i32 {
        core::mem::take(&mut self.correction_pll)
    }

    /// True when the receiver should listen with the widened window.
    pub fn wide_window(&self) -> bool {
        !self.synced_once || self.missed_count >= self.loss_threshold
    }

    pub fn reset(&mut self) {
        self.correction_pll = 0;
        self.missed_count = 0;
        self.synced_once = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 20_480_000;

    #[test]
    fn duration_conversion() {
        assert_eq!(us_to_pll(1000, RATE), 20_480);
        assert_eq!(us_to_pll(250, RATE), 5_120);
    }

    #[test]
    fn cycle_conserves_slot_durations() {
        let sched = Schedule::new(&[250, 250, 250, 250], &[0], RATE).unwrap();
        assert_eq!(sched.cycle_duration_pll(), 4 * us_to_pll(250, RATE) as u64);
    }

    #[test]
    fn advance_is_monotone_modulo_cycle() {
        let mut sched = Schedule::new(&[100, 100, 100], &[0, 1], RATE).unwrap();
        let mut expected = 0u16;
        for step in 0..10 {
            assert_eq!(sched.current_index(), expected);
            assert_eq!(sched.cycle_count(), step / 3);
            sched.advance();
            expected = (expected + 1) % 3;
        }
    }

    #[test]
    fn channel_walker_wraps_independently() {
        let mut sched = Schedule::new(&[100, 100], &[3, 5, 7], RATE).unwrap();
        let seen: [u8; 6] = core::array::from_fn(|_| {
            let ch = sched.current_channel();
            sched.advance();
            ch
        });
        assert_eq!(seen, [3, 5, 7, 3, 5, 7]);
    }

    #[test]
    fn empty_sequences_rejected() {
        assert_eq!(Schedule::new(&[], &[0], RATE).unwrap_err(), Error::ZeroTimeslotSeqLen);
        assert_eq!(Schedule::new(&[100], &[], RATE).unwrap_err(), Error::ZeroChanSeqLen);
        assert_eq!(
            Schedule::new(&[100, 0], &[0], RATE).unwrap_err(),
            Error::NullTimeslotDuration
        );
    }

    #[test]
    fn timeslot_id_tags() {
        assert!(!TimeslotId::main(3).is_auto());
        assert!(TimeslotId::auto(3).is_auto());
        assert_eq!(TimeslotId::auto(3).index(), 3);
        assert_eq!(TimeslotId::main(3).index(), 3);
    }

    #[test]
    fn classification_rules() {
        const BROADCAST: u8 = 0xFF;
        // Coordinator 0x01 sends to node 0x02, node replies in the same slot.
        let coord = classify(0x01, BROADCAST, (0x01, 0x02), Some((0x02, 0x01)));
        assert!(coord.tx_main && !coord.rx_main && coord.rx_auto && !coord.tx_auto);
        let node = classify(0x02, BROADCAST, (0x01, 0x02), Some((0x02, 0x01)));
        assert!(!node.tx_main && node.rx_main && node.tx_auto && !node.rx_auto);
        // A third device sleeps through the slot.
        let other = classify(0x03, BROADCAST, (0x01, 0x02), Some((0x02, 0x01)));
        assert!(other.is_sleep());
        // Broadcast destination receives everywhere.
        let bcast = classify(0x03, BROADCAST, (0x01, BROADCAST), None);
        assert!(bcast.rx_main);
    }

    #[test]
    fn conn_limit_enforced() {
        let mut sched = Schedule::new(&[100], &[0], RATE).unwrap();
        for i in 0..crate::MAX_CONN_PER_TIMESLOT {
            sched.bind_connection(TimeslotId::main(0), ConnectionId(i as u8)).unwrap();
        }
        assert_eq!(
            sched
                .bind_connection(TimeslotId::main(0), ConnectionId(9))
                .unwrap_err(),
            Error::TimeslotConnLimitReached
        );
    }

    #[test]
    fn sync_correction_clamped_and_consumed() {
        let mut sync = TdmaSync::new(16, 4);
        sync.on_sync_frame(100);
        assert_eq!(sync.take_correction_pll(), 16);
        assert_eq!(sync.take_correction_pll(), 0);
        sync.on_sync_frame(-5);
        assert_eq!(sync.take_correction_pll(), -5);
        assert!(!sync.wide_window());
        for _ in 0..4 {
            sync.on_sync_missed();
        }
        assert!(sync.wide_window());
        sync.on_sync_frame(0);
        assert!(!sync.wide_window());
    }
}
