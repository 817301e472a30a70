//! # Connection statistics
//!
//! Cumulative per-connection counters, updated from interrupt context and
//! read from the application as a snapshot. Rates can be derived by pairing
//! a snapshot with the tick recorded at the last reset.

/// Cumulative counters of one connection.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionStats {
    /// Payloads acknowledged (or sent, when acknowledge is disabled).
    pub tx_success_count: u32,
    /// Transmissions that got no acknowledge.
    pub tx_fail_count: u32,
    /// Payloads dropped by the retry deadlines or a full queue policy.
    pub tx_dropped_count: u32,
    /// Transmissions cancelled by clear-channel assessment.
    pub cca_abort_count: u32,
    /// Transmissions forced despite a failed assessment.
    pub cca_force_count: u32,
    /// Payloads delivered to the RX queue.
    pub rx_success_count: u32,
    /// Payloads lost to a full RX queue.
    pub rx_overrun_count: u32,
    /// Frames discarded as duplicates.
    pub duplicate_count: u32,
    /// Frames rejected on CRC, address or size grounds.
    pub rejected_count: u32,
    /// Payload bytes acknowledged.
    pub tx_byte_count: u64,
    /// Payload bytes delivered.
    pub rx_byte_count: u64,
    /// Tick of the last reset.
    pub reset_tick: u64,
}

impl ConnectionStats {
    pub fn reset(&mut self, tick: u64) {
        *self = Self { reset_tick: tick, ..Self::default() };
    }

    /// Transmission attempts that reached a terminal outcome.
    pub fn tx_total(&self) -> u32 {
        self.tx_success_count + self.tx_fail_count + self.tx_dropped_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_zeroes_counts_and_stamps_tick() {
        let mut stats = ConnectionStats {
            tx_success_count: 4,
            rx_byte_count: 99,
            ..Default::default()
        };
        stats.reset(42);
        assert_eq!(stats.tx_success_count, 0);
        assert_eq!(stats.rx_byte_count, 0);
        assert_eq!(stats.reset_tick, 42);
    }

    #[test]
    fn tx_total_sums_terminal_outcomes() {
        let stats = ConnectionStats {
            tx_success_count: 5,
            tx_fail_count: 2,
            tx_dropped_count: 1,
            ..Default::default()
        };
        assert_eq!(stats.tx_total(), 8);
    }
}
