//! # Board support capability trait
//!
//! The engine never touches a GPIO, an SPI peripheral or a timer directly:
//! everything it needs from the board is expressed by [`WirelessHal`]. The
//! application implements this trait once per board and wires the four
//! interrupt entry points of [`isr`](crate::isr) to the matching vectors.
//!
//! Two SPI paths exist on purpose:
//! - [`spi`](WirelessHal::spi) gives blocking access through the
//!   `embedded-hal` [`SpiBus`], used only while the engine is stopped
//!   (radio probing, calibration, pairing bring-up).
//! - [`spi_transfer_dma`](WirelessHal::spi_transfer_dma) starts a full-duplex
//!   transfer that completes asynchronously. Completion must be reported by
//!   invoking [`isr::spi_complete_handler`](crate::isr::spi_complete_handler)
//!   from the DMA interrupt. The engine guarantees at most one transfer in
//!   flight per radio and keeps both buffers valid until the completion
//!   handler has run.

use embedded_hal::spi::SpiBus;

/// Radio selector for nodes with one or two transceivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioId {
    Radio1 = 0,
    Radio2 = 1,
}

impl RadioId {
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub(crate) fn from_index(idx: usize) -> Self {
        if idx == 0 { RadioId::Radio1 } else { RadioId::Radio2 }
    }
}

/// Capabilities the engine requires from the board.
pub trait WirelessHal {
    /// Blocking SPI bus used while the engine is stopped.
    type Spi: SpiBus<u8>;

    /// Blocking bus access for the given radio.
    fn spi(&mut self, radio: RadioId) -> &mut Self::Spi;

    /// Start a full-duplex transfer of `tx.len()` bytes.
    ///
    /// `tx.len() == rx.len()` always holds. The implementation reports
    /// completion through [`isr::spi_complete_handler`](crate::isr::spi_complete_handler);
    /// until then both buffers stay valid and untouched by the engine.
    fn spi_transfer_dma(&mut self, radio: RadioId, tx: &[u8], rx: &mut [u8]);

    /// Drive the radio reset line.
    fn radio_reset(&mut self, radio: RadioId, assert: bool);

    /// Free-running tick counter.
    fn tick(&self) -> u64;

    /// Frequency of the free-running tick counter in Hz.
    fn tick_frequency_hz(&self) -> u32;

    /// Pend the low-priority context-switch interrupt whose service routine
    /// calls [`isr::callbacks_processing_handler`](crate::isr::callbacks_processing_handler).
    fn trigger_context_switch(&mut self);

    /// Mask the radio IRQ line.
    fn disable_radio_irq(&mut self, radio: RadioId);

    /// Unmask the radio IRQ line.
    fn enable_radio_irq(&mut self, radio: RadioId);

    /// Number of radios wired on this board (1 or 2).
    fn radio_count(&self) -> u8 {
        1
    }

    /// Start the dual-radio synchronization timer. Single-radio boards keep
    /// the default no-op.
    fn multi_radio_timer_start(&mut self) {}

    /// Stop the dual-radio synchronization timer.
    fn multi_radio_timer_stop(&mut self) {}

    /// Program the dual-radio synchronization timer period, in PLL cycles.
    fn multi_radio_timer_set_period(&mut self, _pll_cycles: u32) {}
}
