//! # PHY driver
//!
//! One `Phy` per radio. At every slot boundary the MAC describes the slot
//! (role, register configuration, frames involved) and the PHY turns it
//! into a queue of state steps, each of which ships or fetches one SPI
//! burst. The queue drains on the two interrupt signals:
//!
//! - DMA complete: the previous burst finished, issue the next one.
//! - Radio IRQ: the radio reached end of frame processing, fetch the event
//!   and info bursts and classify the slot outcome.
//!
//! The PHY never calls the HAL itself: after feeding a signal with
//! [`Phy::process`], the owner collects the pending transfer with
//! [`Phy::take_spi_job`] and runs it. This keeps exactly one transfer in
//! flight per radio and keeps the PHY free of I/O concerns.

use crate::cmd::{
    read_events_burst, read_info_burst, EventsImage, InfoImage, RadioCfg, RADIO_CFG_LEN,
    READ_EVENTS_LEN, READ_INFO_LEN,
};
use crate::cmd::cmd_events::sleep_action;
use crate::status::IrqFlags;
use crate::xlayer::{FrameOutcome, Region};
use crate::ConnectionId;

/// Depth of the per-slot state-step queue.
const STATE_QUEUE_SIZE: usize = 10;

/// Largest frame burst: prefix byte plus a full-size on-air frame.
pub const FRAME_BURST_MAX: usize = 256;

/// Input signals fed by the interrupt entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PhyInput {
    RadioIrq,
    DmaComplete,
}

/// Output signals consumed by the MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PhyOutput {
    None,
    /// A transfer is pending or in flight.
    Processing,
    /// Waiting for the radio IRQ.
    Yield,
    /// Slot configuration reached the radio.
    ConfigComplete,
    FrameSentAck,
    FrameSentNack,
    FrameNotSent,
    FrameReceived,
    FrameMissed,
    FrameRejected,
    Error,
}

/// One SPI transfer the owner must run for the PHY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiJob {
    /// Ship the configuration burst from the PHY buffer.
    Cfg,
    /// Ship a frame from the arena (prefix byte included in the region).
    FrameWrite(Region),
    /// Ship the event burst and parse the reply.
    Events,
    /// Ship the info burst and parse the reply.
    Info,
    /// Read a received frame into the arena region.
    FrameRead(Region),
}

/// What the radio does with the slot being prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotRole {
    /// Transmit the main frame; `ack` selects the acknowledge window.
    TxMain { ack: bool },
    /// Receive the main frame; the radio auto-replies when a frame was
    /// loaded with [`Phy::set_auto_frame`].
    RxMain,
    /// Program the sleep timer only.
    Sleep,
}

/// Frame handed to the PHY for one slot.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameJob {
    pub conn: ConnectionId,
    /// Ring slot the frame lives in.
    pub queue_slot: u16,
    /// Whole arena slot, burst prefix included.
    pub region: Region,
    /// On-air length byte value (TX) or capacity bound (RX).
    pub air_len: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    SendCfg,
    SendMainFrame,
    SendAutoFrame,
    ReadEvents,
    ReadInfo,
    ReadMainFrame,
    ReadAutoFrame,
}

/// Per-radio PHY driver state.
pub struct Phy {
    steps: [Option<Step>; STATE_QUEUE_SIZE],
    step_read: usize,
    step_write: usize,
    role: SlotRole,
    output: PhyOutput,
    pending_job: Option<SpiJob>,
    /// Step whose transfer is in flight, parsed on DMA completion.
    completed_step: Option<Step>,

    cfg_tx: [u8; RADIO_CFG_LEN],
    cfg_rx: [u8; RADIO_CFG_LEN],
    events_tx: [u8; READ_EVENTS_LEN],
    events_rx: [u8; READ_EVENTS_LEN],
    info_tx: [u8; READ_INFO_LEN],
    info_rx: [u8; READ_INFO_LEN],
    /// Dump buffer for outgoing frame bursts and dummy-clock source for
    /// incoming ones.
    frame_scratch: [u8; FRAME_BURST_MAX],

    main_frame: Option<FrameJob>,
    auto_frame: Option<FrameJob>,
    main_outcome: Option<FrameOutcome>,
    auto_outcome: Option<FrameOutcome>,
    /// Size of the frame announced by the info burst, for RX jobs.
    received_air_len: u8,

    pub last_events: Option<EventsImage>,
    pub last_info: Option<InfoImage>,
}

impl Default for Phy {
    fn default() -> Self {
        Self::new()
    }
}

impl Phy {
    pub fn new() -> Self {
        Self {
            steps: [None; STATE_QUEUE_SIZE],
            step_read: 0,
            step_write: 0,
            role: SlotRole::Sleep,
            output: PhyOutput::None,
            pending_job: None,
            completed_step: None,
            cfg_tx: [0; RADIO_CFG_LEN],
            cfg_rx: [0; RADIO_CFG_LEN],
            events_tx: [0; READ_EVENTS_LEN],
            events_rx: [0; READ_EVENTS_LEN],
            info_tx: [0; READ_INFO_LEN],
            info_rx: [0; READ_INFO_LEN],
            frame_scratch: [0; FRAME_BURST_MAX],
            main_frame: None,
            auto_frame: None,
            main_outcome: None,
            auto_outcome: None,
            received_air_len: 0,
            last_events: None,
            last_info: None,
        }
    }

    fn push_step(&mut self, step: Step) {
        self.steps[self.step_write % STATE_QUEUE_SIZE] = Some(step);
        self.step_write += 1;
    }

    fn pop_step(&mut self) -> Option<Step> {
        if self.step_read == self.step_write {
            return None;
        }
        let step = self.steps[self.step_read % STATE_QUEUE_SIZE].take();
        self.step_read += 1;
        step
    }

    fn clear_steps(&mut self) {
        self.steps = [None; STATE_QUEUE_SIZE];
        self.step_read = 0;
        self.step_write = 0;
    }

    /// Prepare the next slot. The configuration burst starts immediately;
    /// frame bursts follow on DMA completion.
    pub fn prepare_slot(&mut self, role: SlotRole, cfg: &RadioCfg) {
        self.clear_steps();
        self.role = role;
        self.main_outcome = None;
        self.auto_outcome = None;
        self.received_air_len = 0;
        self.last_events = None;
        self.last_info = None;
        self.cfg_tx = cfg.burst();
        self.push_step(Step::SendCfg);
        match role {
            SlotRole::TxMain { .. } => {
                if self.main_frame.is_some() {
                    self.push_step(Step::SendMainFrame);
                }
            }
            SlotRole::RxMain => {
                if self.auto_frame.is_some() {
                    self.push_step(Step::SendAutoFrame);
                }
            }
            SlotRole::Sleep => {}
        }
        self.advance();
    }

    /// Keep the radio asleep through a slot processed by the other radio.
    pub fn prepare_none(&mut self, cfg: &RadioCfg) {
        self.prepare_slot(SlotRole::Sleep, cfg);
    }

    /// Main-direction frame for the coming slot.
    pub fn set_main_frame(&mut self, job: Option<FrameJob>) {
        self.main_frame = job;
    }

    /// Auto-reply frame loaded ahead of an RX slot.
    pub fn set_auto_frame(&mut self, job: Option<FrameJob>) {
        self.auto_frame = job;
    }

    pub fn main_frame(&self) -> Option<&FrameJob> {
        self.main_frame.as_ref()
    }

    pub fn auto_frame(&self) -> Option<&FrameJob> {
        self.auto_frame.as_ref()
    }

    /// Outcome of the main frame, stamped at end of slot.
    pub fn main_outcome(&self) -> Option<FrameOutcome> {
        self.main_outcome
    }

    /// Outcome of the auto-reply frame, stamped at end of slot.
    pub fn auto_outcome(&self) -> Option<FrameOutcome> {
        self.auto_outcome
    }

    /// Air length of the frame announced by the info burst.
    pub fn received_air_len(&self) -> u8 {
        self.received_air_len
    }

    /// Current output signal.
    pub fn output(&self) -> PhyOutput {
        self.output
    }

    /// Transfer the owner must run now, if any. Consumed on read.
    pub fn take_spi_job(&mut self) -> Option<SpiJob> {
        self.pending_job.take()
    }

    /// TX and RX buffers for the pending [`SpiJob::Cfg`] transfer.
    pub fn cfg_buffers(&mut self) -> (&[u8], &mut [u8]) {
        (&self.cfg_tx, &mut self.cfg_rx)
    }

    /// Scratch buffer paired with an arena slice in frame transfers: dump
    /// for writes, dummy-clock source (zeroed) for reads.
    pub fn frame_scratch(&mut self, len: usize) -> &mut [u8] {
        &mut self.frame_scratch[..len]
    }

    /// TX and RX buffers for the pending [`SpiJob::Events`] transfer.
    pub fn events_buffers(&mut self) -> (&[u8], &mut [u8]) {
        (&self.events_tx, &mut self.events_rx)
    }

    /// TX and RX buffers for the pending [`SpiJob::Info`] transfer.
    pub fn info_buffers(&mut self) -> (&[u8], &mut [u8]) {
        (&self.info_tx, &mut self.info_rx)
    }

    /// Feed one interrupt signal and return the resulting output signal.
    pub fn process(&mut self, input: PhyInput) -> PhyOutput {
        match input {
            PhyInput::DmaComplete => self.on_dma_complete(),
            PhyInput::RadioIrq => self.on_radio_irq(),
        }
        self.output
    }

    fn on_dma_complete(&mut self) {
        // Parse whatever the completed step brought back, then move on.
        match self.completed_step {
            Some(Step::ReadEvents) => {
                let events = EventsImage::parse(&self.events_rx);
                self.last_events = Some(events);
                self.classify(events.irq_flags);
            }
            Some(Step::ReadInfo) => {
                let info = InfoImage::parse(&self.info_rx);
                self.last_info = Some(info);
                self.queue_frame_read(info.frame_size);
            }
            Some(Step::ReadMainFrame) => {
                self.main_outcome = Some(FrameOutcome::Received);
                self.output = PhyOutput::FrameReceived;
                self.completed_step = None;
                return;
            }
            Some(Step::ReadAutoFrame) => {
                self.auto_outcome = Some(FrameOutcome::Received);
                // The main outcome was already stamped by classify().
                self.output = PhyOutput::FrameSentAck;
                self.completed_step = None;
                return;
            }
            _ => {}
        }
        self.completed_step = None;
        self.advance();
    }

    fn on_radio_irq(&mut self) {
        // End of frame processing: fetch the event burst.
        self.push_step(Step::ReadEvents);
        self.advance();
    }

    fn advance(&mut self) {
        let Some(step) = self.pop_step() else {
            // Queue drained. Without a classification the radio is
            // configured and the PHY yields until its IRQ; a terminal
            // output set by classify() stands.
            if matches!(self.output, PhyOutput::Processing | PhyOutput::None) {
                self.output = match self.role {
                    SlotRole::Sleep => PhyOutput::ConfigComplete,
                    _ => PhyOutput::Yield,
                };
            }
            return;
        };
        self.completed_step = Some(step);
        let job = match step {
            Step::SendCfg => Some(SpiJob::Cfg),
            Step::SendMainFrame => self
                .main_frame
                .as_ref()
                .map(|job| SpiJob::FrameWrite(frame_write_region(job))),
            Step::SendAutoFrame => self
                .auto_frame
                .as_ref()
                .map(|job| SpiJob::FrameWrite(frame_write_region(job))),
            Step::ReadEvents => {
                self.events_tx = read_events_burst(sleep_action());
                Some(SpiJob::Events)
            }
            Step::ReadInfo => {
                self.info_tx = read_info_burst();
                Some(SpiJob::Info)
            }
            Step::ReadMainFrame => self
                .main_frame
                .as_ref()
                .map(|job| SpiJob::FrameRead(frame_read_region(job, self.received_air_len))),
            Step::ReadAutoFrame => self
                .auto_frame
                .as_ref()
                .map(|job| SpiJob::FrameRead(frame_read_region(job, self.received_air_len))),
        };
        match job {
            Some(job) => {
                self.pending_job = Some(job);
                self.output = PhyOutput::Processing;
            }
            // A frame step without its frame is an internal fault.
            None => self.output = PhyOutput::Error,
        }
    }

    /// Classify the slot from the IRQ flags and queue follow-up reads.
    fn classify(&mut self, flags: IrqFlags) {
        match self.role {
            SlotRole::TxMain { ack } => {
                if flags.contains(IrqFlags::CCA_FAIL) && !flags.contains(IrqFlags::TX_END) {
                    self.main_outcome = Some(FrameOutcome::NotSent);
                    self.output = PhyOutput::FrameNotSent;
                } else if !flags.contains(IrqFlags::TX_END) {
                    self.main_outcome = Some(FrameOutcome::SentNack);
                    self.output = PhyOutput::Error;
                } else if !ack {
                    self.main_outcome = Some(FrameOutcome::SentAck);
                    self.output = PhyOutput::FrameSentAck;
                } else if flags.frame_ok() {
                    // The acknowledge landed; it may carry an auto-reply
                    // payload worth reading.
                    self.main_outcome = Some(FrameOutcome::SentAck);
                    if self.auto_frame.is_some() {
                        self.push_step(Step::ReadInfo);
                    } else {
                        self.output = PhyOutput::FrameSentAck;
                    }
                } else {
                    self.main_outcome = Some(FrameOutcome::SentNack);
                    self.output = PhyOutput::FrameSentNack;
                }
            }
            SlotRole::RxMain => {
                if flags.frame_ok() {
                    self.push_step(Step::ReadInfo);
                    if self.auto_frame.is_some() {
                        self.auto_outcome = Some(FrameOutcome::SentAck);
                    }
                } else if flags.frame_rejected() {
                    self.main_outcome = Some(FrameOutcome::Rejected);
                    self.output = PhyOutput::FrameRejected;
                } else {
                    self.main_outcome = Some(FrameOutcome::Missed);
                    self.output = PhyOutput::FrameMissed;
                }
            }
            SlotRole::Sleep => {
                self.output = PhyOutput::ConfigComplete;
            }
        }
    }

    /// After the info burst: bound-check the announced size and read the
    /// frame body, or reject it.
    fn queue_frame_read(&mut self, air_len: u8) {
        self.received_air_len = air_len;
        match self.role {
            SlotRole::RxMain => match self.main_frame.as_ref() {
                Some(job) if air_len > 0 && air_len <= job.air_len => {
                    self.push_step(Step::ReadMainFrame);
                }
                Some(_) => {
                    self.main_outcome = Some(FrameOutcome::Rejected);
                    self.output = PhyOutput::FrameRejected;
                }
                None => self.output = PhyOutput::Error,
            },
            SlotRole::TxMain { .. } => match self.auto_frame.as_ref() {
                Some(job) if air_len > 0 && air_len <= job.air_len => {
                    self.push_step(Step::ReadAutoFrame);
                }
                // Acknowledge without a usable payload.
                Some(_) => self.output = PhyOutput::FrameSentAck,
                None => self.output = PhyOutput::Error,
            },
            SlotRole::Sleep => self.output = PhyOutput::Error,
        }
    }

    /// Abort the slot in progress (disconnect path).
    pub fn abort(&mut self) {
        self.clear_steps();
        self.pending_job = None;
        self.completed_step = None;
        self.main_frame = None;
        self.auto_frame = None;
        self.output = PhyOutput::None;
    }
}

/// Region to ship for a TX frame: prefix, length byte and `air_len - 1`
/// on-air bytes.
fn frame_write_region(job: &FrameJob) -> Region {
    Region {
        begin: job.region.begin,
        end: job.region.begin + 1 + job.air_len as u32,
    }
}

/// Region to fill for an RX frame of `air_len` on-air bytes.
fn frame_read_region(job: &FrameJob, air_len: u8) -> Region {
    Region {
        begin: job.region.begin,
        end: job.region.begin + 1 + air_len as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(air_len: u8) -> FrameJob {
        FrameJob {
            conn: ConnectionId(0),
            queue_slot: 0,
            region: Region { begin: 0, end: 2 + air_len as u32 },
            air_len,
        }
    }

    fn drain_dma(phy: &mut Phy) -> PhyOutput {
        // Complete pending transfers until the PHY stops issuing new ones.
        let mut out = phy.output();
        while phy.take_spi_job().is_some() {
            out = phy.process(PhyInput::DmaComplete);
        }
        out
    }

    fn inject_events(phy: &mut Phy, flags: u16) {
        phy.events_rx = [0; READ_EVENTS_LEN];
        phy.events_rx[1] = 0x03;
        phy.events_rx[5] = flags as u8;
        phy.events_rx[6] = (flags >> 8) as u8;
    }

    fn inject_info(phy: &mut Phy, frame_size: u8) {
        phy.info_rx = [0; READ_INFO_LEN];
        phy.info_rx[1] = frame_size;
        phy.info_rx[4] = 20;
        phy.info_rx[5] = 4;
    }

    #[test]
    fn sleep_slot_completes_on_config() {
        let mut phy = Phy::new();
        phy.prepare_slot(SlotRole::Sleep, &RadioCfg::default());
        assert_eq!(phy.output(), PhyOutput::Processing);
        assert_eq!(phy.take_spi_job(), Some(SpiJob::Cfg));
        assert_eq!(phy.process(PhyInput::DmaComplete), PhyOutput::ConfigComplete);
    }

    #[test]
    fn tx_slot_ships_cfg_then_frame_then_yields() {
        let mut phy = Phy::new();
        phy.set_main_frame(Some(job(10)));
        phy.prepare_slot(SlotRole::TxMain { ack: true }, &RadioCfg::default());
        assert_eq!(phy.take_spi_job(), Some(SpiJob::Cfg));
        assert_eq!(phy.process(PhyInput::DmaComplete), PhyOutput::Processing);
        match phy.take_spi_job() {
            Some(SpiJob::FrameWrite(region)) => assert_eq!(region.len(), 11),
            other => panic!("expected frame write, got {other:?}"),
        }
        assert_eq!(phy.process(PhyInput::DmaComplete), PhyOutput::Yield);
    }

    #[test]
    fn tx_with_ack_classifies_sent_ack() {
        let mut phy = Phy::new();
        phy.set_main_frame(Some(job(10)));
        phy.prepare_slot(SlotRole::TxMain { ack: true }, &RadioCfg::default());
        drain_dma(&mut phy);
        phy.process(PhyInput::RadioIrq);
        assert_eq!(phy.take_spi_job(), Some(SpiJob::Events));
        inject_events(
            &mut phy,
            IrqFlags::TX_END | IrqFlags::RX_END | IrqFlags::CRC_PASS | IrqFlags::ADDR_MATCH,
        );
        assert_eq!(phy.process(PhyInput::DmaComplete), PhyOutput::FrameSentAck);
        assert_eq!(phy.main_outcome(), Some(FrameOutcome::SentAck));
    }

    #[test]
    fn tx_without_ack_window_counts_tx_end_as_success() {
        let mut phy = Phy::new();
        phy.set_main_frame(Some(job(10)));
        phy.prepare_slot(SlotRole::TxMain { ack: false }, &RadioCfg::default());
        drain_dma(&mut phy);
        phy.process(PhyInput::RadioIrq);
        phy.take_spi_job();
        inject_events(&mut phy, IrqFlags::TX_END);
        assert_eq!(phy.process(PhyInput::DmaComplete), PhyOutput::FrameSentAck);
    }

    #[test]
    fn tx_missing_ack_classifies_nack() {
        let mut phy = Phy::new();
        phy.set_main_frame(Some(job(10)));
        phy.prepare_slot(SlotRole::TxMain { ack: true }, &RadioCfg::default());
        drain_dma(&mut phy);
        phy.process(PhyInput::RadioIrq);
        phy.take_spi_job();
        inject_events(&mut phy, IrqFlags::TX_END | IrqFlags::RX_TIMEOUT);
        assert_eq!(phy.process(PhyInput::DmaComplete), PhyOutput::FrameSentNack);
        assert_eq!(phy.main_outcome(), Some(FrameOutcome::SentNack));
    }

    #[test]
    fn cca_fail_classifies_not_sent() {
        let mut phy = Phy::new();
        phy.set_main_frame(Some(job(10)));
        phy.prepare_slot(SlotRole::TxMain { ack: true }, &RadioCfg::default());
        drain_dma(&mut phy);
        phy.process(PhyInput::RadioIrq);
        phy.take_spi_job();
        inject_events(&mut phy, IrqFlags::CCA_FAIL);
        assert_eq!(phy.process(PhyInput::DmaComplete), PhyOutput::FrameNotSent);
        assert_eq!(phy.main_outcome(), Some(FrameOutcome::NotSent));
    }

    #[test]
    fn rx_good_frame_reads_info_then_body() {
        let mut phy = Phy::new();
        phy.set_main_frame(Some(job(64)));
        phy.prepare_slot(SlotRole::RxMain, &RadioCfg::default());
        drain_dma(&mut phy);
        phy.process(PhyInput::RadioIrq);
        assert_eq!(phy.take_spi_job(), Some(SpiJob::Events));
        inject_events(
            &mut phy,
            IrqFlags::RX_END | IrqFlags::CRC_PASS | IrqFlags::ADDR_MATCH,
        );
        assert_eq!(phy.process(PhyInput::DmaComplete), PhyOutput::Processing);
        assert_eq!(phy.take_spi_job(), Some(SpiJob::Info));
        inject_info(&mut phy, 20);
        assert_eq!(phy.process(PhyInput::DmaComplete), PhyOutput::Processing);
        match phy.take_spi_job() {
            Some(SpiJob::FrameRead(region)) => assert_eq!(region.len(), 21),
            other => panic!("expected frame read, got {other:?}"),
        }
        assert_eq!(phy.process(PhyInput::DmaComplete), PhyOutput::FrameReceived);
        assert_eq!(phy.main_outcome(), Some(FrameOutcome::Received));
        assert_eq!(phy.received_air_len(), 20);
    }

    #[test]
    fn rx_oversize_frame_rejected_without_read() {
        let mut phy = Phy::new();
        phy.set_main_frame(Some(job(16)));
        phy.prepare_slot(SlotRole::RxMain, &RadioCfg::default());
        drain_dma(&mut phy);
        phy.process(PhyInput::RadioIrq);
        phy.take_spi_job();
        inject_events(
            &mut phy,
            IrqFlags::RX_END | IrqFlags::CRC_PASS | IrqFlags::ADDR_MATCH,
        );
        phy.process(PhyInput::DmaComplete);
        phy.take_spi_job();
        inject_info(&mut phy, 200);
        assert_eq!(phy.process(PhyInput::DmaComplete), PhyOutput::FrameRejected);
        assert_eq!(phy.main_outcome(), Some(FrameOutcome::Rejected));
    }

    #[test]
    fn rx_silence_classifies_missed() {
        let mut phy = Phy::new();
        phy.set_main_frame(Some(job(16)));
        phy.prepare_slot(SlotRole::RxMain, &RadioCfg::default());
        drain_dma(&mut phy);
        phy.process(PhyInput::RadioIrq);
        phy.take_spi_job();
        inject_events(&mut phy, IrqFlags::RX_TIMEOUT);
        assert_eq!(phy.process(PhyInput::DmaComplete), PhyOutput::FrameMissed);
        assert_eq!(phy.main_outcome(), Some(FrameOutcome::Missed));
    }

    #[test]
    fn rx_foreign_frame_classifies_rejected() {
        let mut phy = Phy::new();
        phy.set_main_frame(Some(job(16)));
        phy.prepare_slot(SlotRole::RxMain, &RadioCfg::default());
        drain_dma(&mut phy);
        phy.process(PhyInput::RadioIrq);
        phy.take_spi_job();
        inject_events(&mut phy, IrqFlags::RX_END | IrqFlags::CRC_PASS);
        assert_eq!(phy.process(PhyInput::DmaComplete), PhyOutput::FrameRejected);
    }

    #[test]
    fn auto_reply_loaded_before_rx_slot() {
        let mut phy = Phy::new();
        phy.set_main_frame(Some(job(64)));
        phy.set_auto_frame(Some(job(8)));
        phy.prepare_slot(SlotRole::RxMain, &RadioCfg::default());
        assert_eq!(phy.take_spi_job(), Some(SpiJob::Cfg));
        phy.process(PhyInput::DmaComplete);
        match phy.take_spi_job() {
            Some(SpiJob::FrameWrite(region)) => assert_eq!(region.len(), 9),
            other => panic!("expected auto frame write, got {other:?}"),
        }
        assert_eq!(phy.process(PhyInput::DmaComplete), PhyOutput::Yield);
    }

    #[test]
    fn abort_clears_everything() {
        let mut phy = Phy::new();
        phy.set_main_frame(Some(job(10)));
        phy.prepare_slot(SlotRole::TxMain { ack: true }, &RadioCfg::default());
        phy.abort();
        assert_eq!(phy.take_spi_job(), None);
        assert_eq!(phy.output(), PhyOutput::None);
        assert!(phy.main_frame().is_none());
    }
}
