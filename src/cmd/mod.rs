//! SPI burst images exchanged with the radio across slot boundaries.
//!
//! Each builder fills a fixed-size byte image the PHY hands to the DMA in
//! one transfer. Registers are addressed inline: every entry of a burst is
//! the register address (write bit included when writing) followed by the
//! 16-bit value, little-endian.

pub mod cmd_cfg;
pub mod cmd_events;
pub mod cmd_info;

pub use cmd_cfg::{RadioCfg, RADIO_CFG_LEN};
pub use cmd_events::{read_events_burst, EventsImage, READ_EVENTS_LEN};
pub use cmd_info::{read_info_burst, InfoImage, READ_INFO_LEN};
