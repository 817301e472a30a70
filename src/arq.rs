//! # Stop-and-Wait ARQ
//!
//! One-bit sequence number per connection. The front frame of the TX queue
//! is retransmitted until it is acknowledged, until its retry count reaches
//! the try deadline, or until its age reaches the time deadline (zero
//! disables either deadline). The receive side suppresses duplicates by
//! comparing against the last accepted sequence bit.

/// Verdict after an unacknowledged transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RetryVerdict {
    Retry,
    Drop,
}

/// Receive-side verdict for an incoming sequence bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxVerdict {
    Accept,
    Duplicate,
}

/// Transmit-side state.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ArqTx {
    seq: bool,
    try_count: u32,
    first_try_tick: u64,
    /// Max transmissions for one frame, 0 for infinite.
    pub try_deadline: u32,
    /// Max frame age in ticks, 0 for infinite.
    pub time_deadline_ticks: u64,
}

impl ArqTx {
    /// Sequence bit to encode in the next transmission.
    pub fn seq(&self) -> bool {
        self.seq
    }

    /// Record one transmission attempt of the front frame.
    pub fn record_attempt(&mut self, tick: u64) {
        if self.try_count == 0 {
            self.first_try_tick = tick;
        }
        self.try_count += 1;
    }

    /// The front frame got acknowledged: flip the sequence and rearm.
    pub fn acknowledge(&mut self) {
        self.seq = !self.seq;
        self.try_count = 0;
    }

    /// The front frame was dropped: flip the sequence so the receiver does
    /// not take the next frame for a retransmission, and rearm.
    pub fn abandon(&mut self) {
        self.seq = !self.seq;
        self.try_count = 0;
    }

    /// Decide whether the unacknowledged front frame gets another try.
    pub fn verdict(&self, tick: u64) -> RetryVerdict {
        if self.try_deadline != 0 && self.try_count >= self.try_deadline {
            return RetryVerdict::Drop;
        }
        if self.time_deadline_ticks != 0
            && tick.wrapping_sub(self.first_try_tick) >= self.time_deadline_ticks
        {
            return RetryVerdict::Drop;
        }
        RetryVerdict::Retry
    }

    pub fn reset(&mut self) {
        self.seq = false;
        self.try_count = 0;
        self.first_try_tick = 0;
    }
}

/// Receive-side duplicate suppression.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ArqRx {
    last_seq: Option<bool>,
}

impl ArqRx {
    /// Check an incoming sequence bit and remember it when accepted.
    pub fn check(&mut self, seq: bool) -> RxVerdict {
        if self.last_seq == Some(seq) {
            RxVerdict::Duplicate
        } else {
            self.last_seq = Some(seq);
            RxVerdict::Accept
        }
    }

    pub fn reset(&mut self) {
        self.last_seq = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_deadline_drops_after_n_attempts() {
        let mut arq = ArqTx { try_deadline: 5, ..Default::default() };
        for _ in 0..5 {
            assert_eq!(arq.verdict(0), RetryVerdict::Retry);
            arq.record_attempt(0);
        }
        assert_eq!(arq.verdict(0), RetryVerdict::Drop);
        arq.abandon();
        assert_eq!(arq.verdict(0), RetryVerdict::Retry);
    }

    #[test]
    fn zero_try_deadline_never_drops() {
        let mut arq = ArqTx::default();
        for _ in 0..10_000 {
            arq.record_attempt(0);
        }
        assert_eq!(arq.verdict(u64::MAX), RetryVerdict::Retry);
    }

    #[test]
    fn time_deadline_drops_by_age() {
        let mut arq = ArqTx { time_deadline_ticks: 100, ..Default::default() };
        arq.record_attempt(1000);
        assert_eq!(arq.verdict(1050), RetryVerdict::Retry);
        assert_eq!(arq.verdict(1100), RetryVerdict::Drop);
    }

    #[test]
    fn ack_flips_sequence_bit() {
        let mut arq = ArqTx::default();
        assert!(!arq.seq());
        arq.record_attempt(0);
        arq.acknowledge();
        assert!(arq.seq());
        arq.record_attempt(0);
        arq.acknowledge();
        assert!(!arq.seq());
    }

    #[test]
    fn receiver_suppresses_repeated_bit() {
        // Frames with bits (s, s, !s) must deliver exactly two payloads.
        let mut rx = ArqRx::default();
        assert_eq!(rx.check(true), RxVerdict::Accept);
        assert_eq!(rx.check(true), RxVerdict::Duplicate);
        assert_eq!(rx.check(false), RxVerdict::Accept);
    }

    #[test]
    fn first_frame_always_accepted() {
        let mut rx = ArqRx::default();
        assert_eq!(rx.check(false), RxVerdict::Accept);
        rx.reset();
        assert_eq!(rx.check(true), RxVerdict::Accept);
    }
}
