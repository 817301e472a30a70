//! # Multi-radio coordinator
//!
//! Two radios on the same board run the schedule in parallel; one of them,
//! the replying radio, answers on behalf of the device. Selection runs at
//! every decision window from the averaged RSSI of the last
//! `avg_sample_count` frames of each radio:
//!
//! - **Mode 0** (dual processing): both radios accumulate samples; the
//!   leader only changes when another radio beats it by more than the
//!   hysteresis.
//! - **Mode 1** (single processing): only the leader accumulates; when its
//!   average drops below the threshold the lead rotates to the next radio.
//!
//! The swap happens strictly at decision boundaries, never while a
//! transfer is in flight.

use crate::lqi::Lqi;

pub const MAX_RADIO_COUNT: usize = 2;

/// Selection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MultiRadioMode {
    /// Dual radio processing with hysteresis comparison.
    Mode0,
    /// Single radio processing with threshold rotation.
    Mode1,
}

/// How radios are woken for transmission slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxWakeupMode {
    /// The MCU wakes both radios on every transmission. Always correct,
    /// costs the wakeup current on the idle radio.
    Manual,
    /// Each radio wakes itself on its sleep timer. Only correct when RX
    /// traffic dominates, otherwise the radios drift apart.
    Auto,
}

/// Replying-radio override for bring-up and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioSelect {
    /// Let the selection algorithm decide.
    Algo,
    Radio1,
    Radio2,
}

/// Multi-radio selection state.
#[derive(Debug, Clone)]
pub struct MultiRadio {
    pub mode: MultiRadioMode,
    pub tx_wakeup_mode: TxWakeupMode,
    pub radio_select: RadioSelect,
    pub radio_count: u8,
    /// Samples needed on every radio before a decision.
    pub avg_sample_count: u32,
    /// Mode 0: lead changes only beyond this margin, in tenth-dB.
    pub hysteresis_tenth_db: u16,
    /// Mode 1: lead rotates under this average, in tenth-dB.
    pub rssi_threshold_tenth_db: u16,
    pub radios_lqi: [Lqi; MAX_RADIO_COUNT],
    replying_radio: u8,
}

impl MultiRadio {
    pub fn new(radio_count: u8, avg_sample_count: u32) -> Self {
        Self {
            mode: MultiRadioMode::Mode0,
            tx_wakeup_mode: TxWakeupMode::Manual,
            radio_select: RadioSelect::Algo,
            radio_count,
            avg_sample_count,
            hysteresis_tenth_db: 20,
            rssi_threshold_tenth_db: 100,
            radios_lqi: [Lqi::default(); MAX_RADIO_COUNT],
            replying_radio: 0,
        }
    }

    /// Radio that answers for the device.
    pub fn replying_radio(&self) -> u8 {
        match self.radio_select {
            RadioSelect::Algo => self.replying_radio,
            RadioSelect::Radio1 => 0,
            RadioSelect::Radio2 => 1,
        }
    }

    /// Run one decision window.
    pub fn update(&mut self, tick: u64) {
        match self.mode {
            MultiRadioMode::Mode0 => self.update_mode_0(tick),
            MultiRadioMode::Mode1 => self.update_mode_1(tick),
        }
    }

    fn update_mode_0(&mut self, tick: u64) {
        let count = self.radio_count as usize;
        if self.radios_lqi[..count]
            .iter()
            .any(|lqi| lqi.total_count < self.avg_sample_count)
        {
            return;
        }
        let mut best_radio = self.replying_radio;
        let mut max_rssi_avg = 0u16;
        let mut replying_rssi_avg = 0u16;
        for i in 0..count {
            let rssi_avg = self.radios_lqi[i].avg_rssi_tenth_db();
            self.radios_lqi[i].reset(tick);
            if i as u8 == self.replying_radio {
                replying_rssi_avg = rssi_avg;
            }
            if rssi_avg > max_rssi_avg {
                max_rssi_avg = rssi_avg;
                best_radio = i as u8;
            }
        }
        if max_rssi_avg > replying_rssi_avg + self.hysteresis_tenth_db {
            self.replying_radio = best_radio;
        }
    }

    fn update_mode_1(&mut self, tick: u64) {
        let leader = self.replying_radio as usize;
        if self.radios_lqi[leader].total_count < self.avg_sample_count {
            return;
        }
        let rssi_avg = self.radios_lqi[leader].avg_rssi_tenth_db();
        for lqi in &mut self.radios_lqi[..self.radio_count as usize] {
            lqi.reset(tick);
        }
        if rssi_avg < self.rssi_threshold_tenth_db {
            self.replying_radio = (self.replying_radio + 1) % self.radio_count;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(mr: &mut MultiRadio, radio: usize, code: u8, n: u32) {
        for _ in 0..n {
            mr.radios_lqi[radio].record_received(code, 0);
        }
    }

    #[test]
    fn mode_0_waits_for_samples_on_every_radio() {
        let mut mr = MultiRadio::new(2, 4);
        feed(&mut mr, 0, 10, 4);
        feed(&mut mr, 1, 40, 3);
        mr.update(0);
        assert_eq!(mr.replying_radio(), 0);
        // Counters were not reset, one more sample completes the window.
        feed(&mut mr, 1, 40, 1);
        mr.update(0);
        assert_eq!(mr.replying_radio(), 1);
    }

    #[test]
    fn mode_0_respects_hysteresis() {
        let mut mr = MultiRadio::new(2, 2);
        mr.hysteresis_tenth_db = 1000;
        feed(&mut mr, 0, 10, 2);
        feed(&mut mr, 1, 40, 2);
        mr.update(0);
        // Radio 1 is better but not by a full hysteresis margin.
        assert_eq!(mr.replying_radio(), 0);
    }

    #[test]
    fn mode_0_resets_windows_after_decision() {
        let mut mr = MultiRadio::new(2, 2);
        feed(&mut mr, 0, 10, 2);
        feed(&mut mr, 1, 40, 2);
        mr.update(7);
        assert_eq!(mr.radios_lqi[0].total_count, 0);
        assert_eq!(mr.radios_lqi[1].total_count, 0);
        assert_eq!(mr.radios_lqi[0].reset_tick, 7);
    }

    #[test]
    fn mode_1_rotates_below_threshold() {
        let mut mr = MultiRadio::new(2, 3);
        mr.mode = MultiRadioMode::Mode1;
        mr.rssi_threshold_tenth_db = 200;
        feed(&mut mr, 0, 5, 3);
        mr.update(0);
        assert_eq!(mr.replying_radio(), 1);
        // Strong leader holds the lead.
        feed(&mut mr, 1, 45, 3);
        mr.update(0);
        assert_eq!(mr.replying_radio(), 1);
    }

    #[test]
    fn manual_select_overrides_algorithm() {
        let mut mr = MultiRadio::new(2, 1);
        mr.radio_select = RadioSelect::Radio2;
        assert_eq!(mr.replying_radio(), 1);
        mr.radio_select = RadioSelect::Radio1;
        assert_eq!(mr.replying_radio(), 0);
    }
}
