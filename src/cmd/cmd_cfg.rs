// Slot configuration burst

use crate::radio::regs;
use crate::radio::{ChipRepetition, FecRatio, Modulation};

/// Number of (address, u16) entries in the configuration burst.
const ENTRY_COUNT: usize = 18;

/// Byte length of the configuration burst image.
pub const RADIO_CFG_LEN: usize = ENTRY_COUNT * 3;

/// Register values programmed at every slot boundary.
///
/// The MAC fills the typed fields through the packing helpers below; the
/// PHY serializes the lot with [`RadioCfg::burst`] and ships it in a single
/// DMA transfer while the radio sleeps between slots.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RadioCfg {
    pub actions: u16,
    pub rx_address: u16,
    pub tx_address: u16,
    pub rx_tx_size: u16,
    pub phy_0_1: u16,
    pub cca_settings: u16,
    pub cca_thres_gain: u16,
    pub rf_gain: u16,
    pub freq_cfg1: u16,
    pub freq_cfg2_3: u16,
    pub pulse_cfg: u16,
    pub pulse_pos: u16,
    pub sleep_period: u16,
    pub sleep_pwrup: u16,
    pub time_limit: u16,
    pub timer_sleep_cfg: u16,
    pub irq_mask: u16,
    pub frame_proc: u16,
}

impl RadioCfg {
    /// Serialize to the on-wire burst image.
    pub fn burst(&self) -> [u8; RADIO_CFG_LEN] {
        let entries: [(u8, u16); ENTRY_COUNT] = [
            (regs::ACTIONS, self.actions),
            (regs::RX_ADDRESS, self.rx_address),
            (regs::TX_ADDRESS, self.tx_address),
            (regs::RX_TX_SIZE, self.rx_tx_size),
            (regs::PHY_0_1, self.phy_0_1),
            (regs::CCA_SETTINGS, self.cca_settings),
            (regs::CCA_THRES_GAIN, self.cca_thres_gain),
            (regs::RF_GAIN, self.rf_gain),
            (regs::FREQ_CFG1, self.freq_cfg1),
            (regs::FREQ_CFG2_3, self.freq_cfg2_3),
            (regs::PULSE_CFG, self.pulse_cfg),
            (regs::PULSE_POS, self.pulse_pos),
            (regs::SLEEP_PERIOD, self.sleep_period),
            (regs::SLEEP_PWRUP, self.sleep_pwrup),
            (regs::TIME_LIMIT, self.time_limit),
            (regs::TIMER_SLEEP_CFG, self.timer_sleep_cfg),
            (regs::IRQ_MASK, self.irq_mask),
            (regs::FRAME_PROC, self.frame_proc),
        ];
        let mut image = [0u8; RADIO_CFG_LEN];
        for (i, (addr, value)) in entries.iter().enumerate() {
            let [lo, hi] = value.to_le_bytes();
            image[3 * i] = addr | regs::WRITE_BIT;
            image[3 * i + 1] = lo;
            image[3 * i + 2] = hi;
        }
        image
    }
}

/// Address filter value: network byte of the PAN id in the high byte,
/// device address in the low byte.
pub fn pack_address(pan_id: u16, device: u8) -> u16 {
    ((pan_id & 0x00FF) << 8) | device as u16
}

/// RX max size in the low byte, TX size in the high byte.
pub fn pack_rx_tx_size(rx_max: u8, tx_size: u8) -> u16 {
    rx_max as u16 | ((tx_size as u16) << 8)
}

/// PHY settings 0-1: modulation, FEC ratio and chip repetition.
pub fn pack_phy(modulation: Modulation, fec: FecRatio, chip_repet: ChipRepetition) -> u16 {
    let modu = match modulation {
        Modulation::Iook => 0b01,
        // OOK is inverted keying with the repetition LSB clear.
        Modulation::Ook => 0b00,
        Modulation::Ppm => 0b10,
    };
    let fec = match fec {
        FecRatio::Off => 0,
        FecRatio::Ratio133 => 1,
        FecRatio::Ratio166 => 2,
        FecRatio::Ratio200 => 3,
    };
    modu | (fec << 2) | ((chip_repet as u16 - 1) << 4)
}

/// CCA settings: raw threshold code, attempt count and spacing exponent.
pub fn pack_cca(threshold: u8, try_count: u8, retry_time_pll: u16) -> u16 {
    // Spacing is stored as a power-of-two exponent of PLL cycles.
    let exp = (16 - (retry_time_pll.max(1)).leading_zeros().min(15)) as u16;
    (threshold as u16 & 0x3F) | ((try_count as u16 & 0x07) << 6) | (exp << 9)
}

/// Frequency configuration word for the first RX band.
pub fn pack_freq(frequency_mhz: u16) -> u16 {
    // 4 MHz synthesizer grid.
    frequency_mhz / 4
}

/// Pulse shaping: count, width and gain for the TX burst.
pub fn pack_pulse(count: u8, width: u8, gain: u8) -> u16 {
    (count as u16 & 0x0F) | ((width as u16 & 0x07) << 4) | ((gain as u16 & 0x07) << 7)
}

/// Sleep timer configuration: sleep level bits plus timer-driven wakeup.
pub fn pack_timer_sleep(sleep_level: crate::radio::SleepLevel, auto_wake: bool) -> u16 {
    (sleep_level as u16) | ((auto_wake as u16) << 2)
}
