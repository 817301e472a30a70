// Frame information burst

use crate::radio::regs;

/// Byte length of the info burst: frame size, signal strengths, RX time.
pub const READ_INFO_LEN: usize = 9;

/// Build the info burst TX image, read after a reception event.
pub fn read_info_burst() -> [u8; READ_INFO_LEN] {
    [
        regs::FRAME_SIZE,
        0x00,
        0x00,
        regs::RSSI_RNSI,
        0x00,
        0x00,
        regs::RX_TIME,
        0x00,
        0x00,
    ]
}

/// Parsed info burst RX image.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InfoImage {
    /// On-air length byte of the received frame.
    pub frame_size: u8,
    /// Raw received signal strength code.
    pub rssi_code: u8,
    /// Raw received noise strength code.
    pub rnsi_code: u8,
    /// Frame start offset from the expected slot start, in PLL cycles.
    pub rx_time_pll: i16,
}

impl InfoImage {
    pub fn parse(rx: &[u8; READ_INFO_LEN]) -> Self {
        Self {
            frame_size: rx[1],
            rssi_code: rx[4] & 0x3F,
            rnsi_code: rx[5] & 0x3F,
            rx_time_pll: i16::from_le_bytes([rx[7], rx[8]]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_addresses_three_registers() {
        let image = read_info_burst();
        assert_eq!(image[0], regs::FRAME_SIZE);
        assert_eq!(image[3], regs::RSSI_RNSI);
        assert_eq!(image[6], regs::RX_TIME);
    }

    #[test]
    fn parse_masks_strength_codes_and_signs_rx_time() {
        let rx = [0, 42, 0, 0, 0xFF, 0x05, 0, 0xFE, 0xFF];
        let info = InfoImage::parse(&rx);
        assert_eq!(info.frame_size, 42);
        assert_eq!(info.rssi_code, 0x3F);
        assert_eq!(info.rnsi_code, 5);
        assert_eq!(info.rx_time_pll, -2);
    }
}
