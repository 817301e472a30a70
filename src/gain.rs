//! # RX gain loop
//!
//! Keeps the received signal inside the linear window of the RX amplifier by
//! nudging the gain index after every frame: strong frames push the gain
//! down, weak frames pull it up, and a long run of missed frames slowly
//! opens the gain back up so a faded link can be reacquired.

use crate::xlayer::FrameOutcome;

/// Number of discrete gain settings of the RX chain.
pub const GAIN_STEP_COUNT: u8 = 24;

/// Raw strength codes delimiting the target window.
const STRENGTH_CODE_LOW: u8 = 12;
const STRENGTH_CODE_HIGH: u8 = 36;

/// Missed frames tolerated before the loop starts opening the gain.
const MISS_OPEN_THRESHOLD: u8 = 8;

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GainLoop {
    gain_index: u8,
    miss_streak: u8,
}

impl Default for GainLoop {
    fn default() -> Self {
        Self { gain_index: GAIN_STEP_COUNT / 2, miss_streak: 0 }
    }
}

impl GainLoop {
    /// Gain index to program for the next reception.
    pub fn gain_value(&self) -> u8 {
        self.gain_index
    }

    /// Feed one slot outcome and the raw RSSI code reported with it.
    pub fn update(&mut self, outcome: FrameOutcome, rssi_code: u8) {
        match outcome {
            FrameOutcome::Received | FrameOutcome::SentAck => {
                self.miss_streak = 0;
                if rssi_code > STRENGTH_CODE_HIGH {
                    self.gain_index = self.gain_index.saturating_sub(1);
                } else if rssi_code < STRENGTH_CODE_LOW {
                    self.gain_index = (self.gain_index + 1).min(GAIN_STEP_COUNT - 1);
                }
            }
            FrameOutcome::Missed | FrameOutcome::SentNack => {
                self.miss_streak = self.miss_streak.saturating_add(1);
                if self.miss_streak >= MISS_OPEN_THRESHOLD {
                    self.gain_index = (self.gain_index + 1).min(GAIN_STEP_COUNT - 1);
                    self.miss_streak = 0;
                }
            }
            FrameOutcome::Rejected | FrameOutcome::NotSent => {}
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_frames_reduce_gain() {
        let mut g = GainLoop::default();
        let start = g.gain_value();
        g.update(FrameOutcome::Received, STRENGTH_CODE_HIGH + 5);
        assert_eq!(g.gain_value(), start - 1);
    }

    #[test]
    fn weak_frames_raise_gain_up_to_the_limit() {
        let mut g = GainLoop::default();
        for _ in 0..GAIN_STEP_COUNT {
            g.update(FrameOutcome::Received, 0);
        }
        assert_eq!(g.gain_value(), GAIN_STEP_COUNT - 1);
    }

    #[test]
    fn in_window_frames_hold_gain() {
        let mut g = GainLoop::default();
        let start = g.gain_value();
        g.update(FrameOutcome::Received, (STRENGTH_CODE_LOW + STRENGTH_CODE_HIGH) / 2);
        assert_eq!(g.gain_value(), start);
    }

    #[test]
    fn miss_streak_opens_gain() {
        let mut g = GainLoop::default();
        let start = g.gain_value();
        for _ in 0..MISS_OPEN_THRESHOLD {
            g.update(FrameOutcome::Missed, 0);
        }
        assert_eq!(g.gain_value(), start + 1);
        // A reception resets the streak.
        g.update(FrameOutcome::Received, STRENGTH_CODE_LOW + 1);
        for _ in 0..MISS_OPEN_THRESHOLD - 1 {
            g.update(FrameOutcome::Missed, 0);
        }
        assert_eq!(g.gain_value(), start + 1);
    }
}
