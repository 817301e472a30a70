//! Shared test fixtures: a scripted board mock and a pseudo-random
//! payload generator with an embedded checksum.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use uwblink::hal::{RadioId, WirelessHal};

/// Blocking SPI stub: every read byte comes back as `0x5A`, which gives
/// radio probing a plausible non-zero serial number.
pub struct MockSpi;

impl embedded_hal::spi::ErrorType for MockSpi {
    type Error = core::convert::Infallible;
}

impl embedded_hal::spi::SpiBus<u8> for MockSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        words.fill(0x5A);
        Ok(())
    }

    fn write(&mut self, _words: &[u8]) -> Result<(), Self::Error> {
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], _write: &[u8]) -> Result<(), Self::Error> {
        read.fill(0x5A);
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        words.fill(0x5A);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MockState {
    /// Transfers started minus transfers completed.
    pub started: usize,
    pub completed: usize,
    pub tick: u64,
    pub context_switches: usize,
    /// First byte of every DMA burst, for sequencing assertions.
    pub burst_log: Vec<u8>,
    /// IRQ flag words served to event bursts, in order.
    pub events_script: VecDeque<u16>,
    /// (frame_size, rssi, rnsi) tuples served to info bursts.
    pub info_script: VecDeque<(u8, u8, u8)>,
    /// On-air images (length byte first) served to frame reads.
    pub frame_script: VecDeque<Vec<u8>>,
    /// Payload images captured from frame writes, prefix stripped.
    pub sent_frames: Vec<Vec<u8>>,
}

/// Scripted HAL: the test plans radio events, drives DMA completions and
/// radio interrupts explicitly, and inspects what went over the bus.
#[derive(Clone)]
pub struct MockHal {
    pub state: Rc<RefCell<MockState>>,
    spi: Rc<RefCell<MockSpi>>,
}

impl MockHal {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState::default())),
            spi: Rc::new(RefCell::new(MockSpi)),
        }
    }

    pub fn pending(&self) -> usize {
        let st = self.state.borrow();
        st.started - st.completed
    }

    pub fn complete_one(&self) {
        self.state.borrow_mut().completed += 1;
    }

    /// Complete outstanding transfers until the engine stops issuing new
    /// ones (it parks in Yield or ConfigComplete).
    pub fn drain(&self) {
        while self.pending() > 0 {
            self.complete_one();
            uwblink::isr::spi_complete_handler(RadioId::Radio1);
        }
    }
}

// The engine holds the HAL by value; tests keep a second handle through
// the shared state.
impl WirelessHal for MockHal {
    type Spi = MockSpi;

    fn spi(&mut self, _radio: RadioId) -> &mut MockSpi {
        // The stub is stateless; handing out a raw reborrow keeps the
        // trait signature without a lifetime dance in test code.
        unsafe { &mut *self.spi.as_ptr() }
    }

    fn spi_transfer_dma(&mut self, _radio: RadioId, tx: &[u8], rx: &mut [u8]) {
        let mut st = self.state.borrow_mut();
        st.started += 1;
        st.burst_log.push(tx[0]);
        match tx[0] {
            // Event burst: power status then IRQ flags.
            0x13 => {
                rx[1] = 0x03;
                let flags = st.events_script.pop_front().unwrap_or(0);
                rx[5] = flags as u8;
                rx[6] = (flags >> 8) as u8;
            }
            // Info burst: frame size, strengths, RX time.
            0x15 => {
                let (size, rssi, rnsi) = st.info_script.pop_front().unwrap_or((0, 0, 0));
                rx[1] = size;
                rx[4] = rssi;
                rx[5] = rnsi;
            }
            // Frame read: zeroed dummy-clock TX image.
            0x00 => {
                if let Some(frame) = st.frame_script.pop_front() {
                    rx[1..1 + frame.len()].copy_from_slice(&frame);
                }
            }
            // Frame write: capture the on-air image (skip the prefix).
            0x92 => st.sent_frames.push(tx[1..].to_vec()),
            _ => {}
        }
    }

    fn radio_reset(&mut self, _radio: RadioId, _assert: bool) {}

    fn tick(&self) -> u64 {
        let mut st = self.state.borrow_mut();
        st.tick += 100;
        st.tick
    }

    fn tick_frequency_hz(&self) -> u32 {
        1_000_000
    }

    fn trigger_context_switch(&mut self) {
        self.state.borrow_mut().context_switches += 1;
    }

    fn disable_radio_irq(&mut self, _radio: RadioId) {}

    fn enable_radio_irq(&mut self, _radio: RadioId) {}
}

/// Fill `data` with pseudo-random bytes derived from `seq_num`, with a
/// 16-bit checksum over the head in the last two bytes.
pub fn forge_pseudo(data: &mut [u8], seq_num: u8) {
    let mut state = 0x5Au8 ^ seq_num;
    let body = data.len().saturating_sub(2);
    for byte in data[..body].iter_mut() {
        state = state.wrapping_mul(31).wrapping_add(7);
        *byte = state;
    }
    let crc = pseudo_crc(&data[..body]);
    if data.len() >= 2 {
        data[body..].copy_from_slice(&crc.to_le_bytes());
    }
}

/// Validate a buffer produced by [`forge_pseudo`].
pub fn validate_pseudo(data: &[u8]) -> bool {
    if data.len() < 2 {
        return false;
    }
    let body = data.len() - 2;
    let expected = u16::from_le_bytes([data[body], data[body + 1]]);
    pseudo_crc(&data[..body]) == expected
}

fn pseudo_crc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0x8408;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
