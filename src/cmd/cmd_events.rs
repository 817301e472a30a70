// End-of-slot event burst

use crate::radio::{actions, regs};
use crate::status::{IrqFlags, PowerStatus};

/// Byte length of the event burst: power status read, action write, IRQ
/// flag read.
pub const READ_EVENTS_LEN: usize = 7;

/// Build the event burst TX image.
///
/// `set_actions` is written back in the same transfer, typically the sleep
/// request for the inter-slot gap. Reading the IRQ flag register clears it.
pub fn read_events_burst(set_actions: u8) -> [u8; READ_EVENTS_LEN] {
    [
        regs::PWR_STATUS,
        0x00,
        regs::ACTIONS | regs::WRITE_BIT,
        set_actions,
        regs::IRQ_FLAGS,
        0x00,
        0x00,
    ]
}

/// Action byte requesting sleep until the programmed wakeup.
pub fn sleep_action() -> u8 {
    actions::GO_SLEEP
}

/// Parsed event burst RX image.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventsImage {
    pub power_status: PowerStatus,
    pub irq_flags: IrqFlags,
}

impl EventsImage {
    pub fn parse(rx: &[u8; READ_EVENTS_LEN]) -> Self {
        Self {
            power_status: PowerStatus::from_raw(rx[1]),
            irq_flags: IrqFlags::from_raw(u16::from_le_bytes([rx[5], rx[6]])),
        }
    }
}
