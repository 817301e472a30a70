//! # Transceiver descriptor and register-level control
//!
//! One [`Radio`] value per physical transceiver: identity (serial number),
//! one-time calibration words, and the electrical settings the PHY needs to
//! program every slot. Register access here is blocking through the HAL's
//! [`SpiBus`](embedded_hal::spi::SpiBus) and is only used while the engine
//! is stopped (probing, power-up, calibration). Connected operation goes
//! through the DMA bursts built in [`cmd`](crate::cmd).
//!
//! ## Register map
//!
//! 8-bit addresses; bit 7 set selects a write. Multi-byte registers are
//! little-endian, the FIFO register auto-increments for burst access.

use embedded_hal::spi::SpiBus;

use crate::error::{Error, Result};
use crate::hal::{RadioId, WirelessHal};

/// Register addresses.
pub(crate) mod regs {
    pub const ACTIONS: u8 = 0x00;
    pub const RX_ADDRESS: u8 = 0x01;
    pub const TX_ADDRESS: u8 = 0x02;
    pub const RX_TX_SIZE: u8 = 0x03;
    pub const PHY_0_1: u8 = 0x04;
    pub const CCA_SETTINGS: u8 = 0x05;
    pub const CCA_THRES_GAIN: u8 = 0x06;
    pub const RF_GAIN: u8 = 0x07;
    pub const FREQ_CFG1: u8 = 0x08;
    pub const FREQ_CFG2_3: u8 = 0x09;
    pub const PULSE_CFG: u8 = 0x0A;
    pub const PULSE_POS: u8 = 0x0B;
    pub const SLEEP_PERIOD: u8 = 0x0C;
    pub const SLEEP_PWRUP: u8 = 0x0D;
    pub const TIME_LIMIT: u8 = 0x0E;
    pub const TIMER_SLEEP_CFG: u8 = 0x0F;
    pub const IRQ_MASK: u8 = 0x10;
    pub const FRAME_PROC: u8 = 0x11;
    pub const FIFO: u8 = 0x12;
    pub const PWR_STATUS: u8 = 0x13;
    pub const IRQ_FLAGS: u8 = 0x14;
    pub const FRAME_SIZE: u8 = 0x15;
    pub const RSSI_RNSI: u8 = 0x16;
    pub const RX_TIME: u8 = 0x17;
    pub const SERIAL_LO: u8 = 0x18;
    pub const SERIAL_HI: u8 = 0x19;
    pub const CALIB: u8 = 0x1A;

    pub const WRITE_BIT: u8 = 0x80;
}

/// Action register bits.
pub(crate) mod actions {
    pub const START_TX: u8 = 0x01;
    pub const START_RX: u8 = 0x02;
    pub const GO_SLEEP: u8 = 0x04;
    pub const FLUSH_TX: u8 = 0x08;
    pub const FLUSH_RX: u8 = 0x10;
    pub const CAL_START: u8 = 0x20;
}

/// How deeply the transceiver sleeps between slots. Deeper levels save more
/// power but need a longer power-up delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepLevel {
    /// Clocks kept running, immediate wakeup.
    Idle = 0,
    /// PLL stopped, crystal kept running.
    Shallow = 1,
    /// Everything but the sleep timer stopped.
    Deep = 2,
}

/// Transceiver PHY clock rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChipRate {
    Rate20M48,
    Rate27M30,
    Rate40M96,
}

impl ChipRate {
    pub fn hz(self) -> u32 {
        match self {
            ChipRate::Rate20M48 => 20_480_000,
            ChipRate::Rate27M30 => 27_300_000,
            ChipRate::Rate40M96 => 40_960_000,
        }
    }
}

/// Polarity of the radio IRQ line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IrqPolarity {
    ActiveHigh,
    ActiveLow,
}

/// SPI timing mode: standard sampling or half-cycle shifted for long lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiMode {
    Standard,
    Shifted,
}

/// Output driver impedance of the digital pads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutImped {
    Low = 0,
    MediumLow = 1,
    MediumHigh = 2,
    High = 3,
}

/// Pulse modulation scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Modulation {
    /// Inverted on-off keying.
    Iook,
    /// On-off keying (inverted keying with chip repetition bit clear).
    Ook,
    /// Two-pulse position modulation.
    Ppm,
}

/// Forward error correction expansion ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FecRatio {
    Off,
    Ratio133,
    Ratio166,
    Ratio200,
}

/// Chip repetition factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChipRepetition {
    Repeat1 = 1,
    Repeat2 = 2,
    Repeat3 = 3,
    Repeat4 = 4,
}

/// One RF channel: frequency plus pulse shaping for both directions.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Channel {
    /// Center frequency in MHz.
    pub frequency_mhz: u16,
    pub tx_pulse_count: u8,
    pub tx_pulse_width: u8,
    pub tx_pulse_gain: u8,
    pub rx_pulse_count: u8,
    /// RX integrator gain, 0 keeps the gain-loop value.
    pub integrator_gain: u8,
}

pub(crate) const TX_PULSE_COUNT_MAX: u8 = 8;
pub(crate) const TX_PULSE_WIDTH_MAX: u8 = 7;
pub(crate) const TX_PULSE_GAIN_MAX: u8 = 7;
pub(crate) const RX_PULSE_COUNT_MAX: u8 = 8;

impl Channel {
    pub fn validate(&self, chip_rate: ChipRate) -> Result<()> {
        if !(6000..=9000).contains(&self.frequency_mhz) {
            return Err(Error::InvalidParameter);
        }
        if self.tx_pulse_count == 0 || self.tx_pulse_count > TX_PULSE_COUNT_MAX {
            return Err(Error::TxPulseCount);
        }
        if self.tx_pulse_width > TX_PULSE_WIDTH_MAX {
            return Err(Error::TxPulseWidth);
        }
        if self.tx_pulse_gain > TX_PULSE_GAIN_MAX {
            return Err(Error::TxPulseGain);
        }
        if self.rx_pulse_count == 0 || self.rx_pulse_count > RX_PULSE_COUNT_MAX {
            return Err(Error::RxPulseCount);
        }
        // The 27.30 MHz grid cannot place the widest pulses of a burst
        // longer than six pulses.
        if chip_rate == ChipRate::Rate27M30
            && self.tx_pulse_count > 6
            && self.tx_pulse_width == TX_PULSE_WIDTH_MAX
        {
            return Err(Error::InvalidPulseConfig27M);
        }
        Ok(())
    }
}

/// Calibration words read from radio NVM at power-up.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    /// Oscillator trim.
    pub ro_code: u8,
    /// Bandgap reference trim.
    pub vref_tune: u8,
    /// Front-end DC offset words.
    pub dc_offset: [u8; 4],
}

/// One physical transceiver.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Radio {
    pub id: RadioId,
    pub serial_number: u64,
    pub calibration: Option<Calibration>,
    pub irq_polarity: IrqPolarity,
    pub spi_mode: SpiMode,
    pub outimped: OutImped,
    pub sleep_level: SleepLevel,
}

impl Radio {
    /// Probe the radio over blocking SPI: reset, read the serial number and
    /// optionally run the self-calibration sequence.
    pub fn probe<H: WirelessHal>(hal: &mut H, id: RadioId, calibrate: bool) -> Result<Self> {
        hal.radio_reset(id, true);
        hal.radio_reset(id, false);
        // The serial shifts out 16 bits per read, low word first.
        let mut serial_number = 0u64;
        for word in 0..4 {
            let reg = if word < 2 { regs::SERIAL_LO } else { regs::SERIAL_HI };
            serial_number |= (read_reg(hal, id, reg)? as u64) << (16 * word);
        }
        if serial_number == 0 || serial_number == u64::MAX {
            return Err(Error::RadioNotFound);
        }
        let calibration = if calibrate {
            Some(run_calibration(hal, id)?)
        } else {
            None
        };
        Ok(Self {
            id,
            serial_number,
            calibration,
            irq_polarity: IrqPolarity::ActiveHigh,
            spi_mode: SpiMode::Standard,
            outimped: OutImped::MediumLow,
            sleep_level: SleepLevel::Idle,
        })
    }

    /// Put the radio in its configured sleep level, blocking path.
    pub fn sleep<H: WirelessHal>(&self, hal: &mut H) -> Result<()> {
        write_reg(hal, self.id, regs::ACTIONS, actions::GO_SLEEP as u16)
    }

    /// Flush both frame FIFOs, blocking path.
    pub fn flush<H: WirelessHal>(&self, hal: &mut H) -> Result<()> {
        write_reg(
            hal,
            self.id,
            regs::ACTIONS,
            (actions::FLUSH_TX | actions::FLUSH_RX) as u16,
        )
    }
}

/// Blocking 16-bit register write.
pub(crate) fn write_reg<H: WirelessHal>(
    hal: &mut H,
    id: RadioId,
    reg: u8,
    value: u16,
) -> Result<()> {
    let [lo, hi] = value.to_le_bytes();
    let mut buf = [reg | regs::WRITE_BIT, lo, hi];
    hal.spi(id).transfer_in_place(&mut buf).map_err(|_| Error::Internal)
}

/// Blocking 16-bit register read.
pub(crate) fn read_reg<H: WirelessHal>(hal: &mut H, id: RadioId, reg: u8) -> Result<u16> {
    let mut buf = [reg, 0, 0];
    hal.spi(id).transfer_in_place(&mut buf).map_err(|_| Error::Internal)?;
    Ok(u16::from_le_bytes([buf[1], buf[2]]))
}

/// Run the on-chip calibration state machine and collect the trim words.
fn run_calibration<H: WirelessHal>(hal: &mut H, id: RadioId) -> Result<Calibration> {
    write_reg(hal, id, regs::ACTIONS, actions::CAL_START as u16)?;
    // Four words shift out of the calibration register once the state
    // machine settles.
    let trim = read_reg(hal, id, regs::CALIB)?;
    let dc01 = read_reg(hal, id, regs::CALIB)?;
    let dc23 = read_reg(hal, id, regs::CALIB)?;
    let [ro_code, vref_tune] = trim.to_le_bytes();
    let [dc0, dc1] = dc01.to_le_bytes();
    let [dc2, dc3] = dc23.to_le_bytes();
    Ok(Calibration { ro_code, vref_tune, dc_offset: [dc0, dc1, dc2, dc3] })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> Channel {
        Channel {
            frequency_mhz: 7987,
            tx_pulse_count: 2,
            tx_pulse_width: 5,
            tx_pulse_gain: 3,
            rx_pulse_count: 2,
            integrator_gain: 0,
        }
    }

    #[test]
    fn channel_validation_catches_each_field() {
        let rate = ChipRate::Rate20M48;
        assert!(channel().validate(rate).is_ok());
        let mut ch = channel();
        ch.frequency_mhz = 5000;
        assert_eq!(ch.validate(rate).unwrap_err(), Error::InvalidParameter);
        let mut ch = channel();
        ch.tx_pulse_count = 0;
        assert_eq!(ch.validate(rate).unwrap_err(), Error::TxPulseCount);
        let mut ch = channel();
        ch.tx_pulse_width = 8;
        assert_eq!(ch.validate(rate).unwrap_err(), Error::TxPulseWidth);
        let mut ch = channel();
        ch.tx_pulse_gain = 8;
        assert_eq!(ch.validate(rate).unwrap_err(), Error::TxPulseGain);
        let mut ch = channel();
        ch.rx_pulse_count = 9;
        assert_eq!(ch.validate(rate).unwrap_err(), Error::RxPulseCount);
    }

    #[test]
    fn wide_bursts_rejected_at_27m() {
        let mut ch = channel();
        ch.tx_pulse_count = 7;
        ch.tx_pulse_width = TX_PULSE_WIDTH_MAX;
        assert!(ch.validate(ChipRate::Rate20M48).is_ok());
        assert_eq!(
            ch.validate(ChipRate::Rate27M30).unwrap_err(),
            Error::InvalidPulseConfig27M
        );
    }

    #[test]
    fn sleep_levels_order_by_depth() {
        assert!(SleepLevel::Idle < SleepLevel::Shallow);
        assert!(SleepLevel::Shallow < SleepLevel::Deep);
    }
}
