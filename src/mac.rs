//! # MAC / connection engine
//!
//! Glue between the schedule, the per-connection queues and the PHY. The
//! engine runs entirely in interrupt context: at each slot boundary it
//! arbitrates which connection owns the slot, stages the outgoing frame
//! (header fields, channel, fallback tier, CCA plan), and when the PHY
//! reports the slot outcome it advances ARQ, statistics, link tracking and
//! the user-facing callback queue. Callbacks never run here: they are
//! queued and drained by the low-priority context-switch handler.

use crate::arq::{RetryVerdict, RxVerdict};
use crate::concurrency::{CcaFailAction, ChannelLfsr, Ddcm, Rdo};
use crate::connection::{Connection, Event};
use crate::frag::FragRxAction;
use crate::protocol::HeaderValues;
use crate::queue::CircularQueue;
use crate::schedule::{Schedule, TdmaSync, Timeslot};
use crate::xlayer::FrameOutcome;
use crate::ConnectionId;

/// Depth of the callback queue shared by every connection.
pub(crate) const CALLBACK_QUEUE_SIZE: u16 = 32;

/// What the drained callback must invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CallbackKind {
    TxSuccess,
    TxFail,
    TxDropped,
    RxSuccess,
    Event(Event),
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CallbackEntry {
    pub conn: ConnectionId,
    pub kind: CallbackKind,
}

/// SPSC queue of pending application callbacks. Producer is the MAC in
/// interrupt context, consumer the low-priority drain handler.
pub(crate) struct CallbackQueue {
    ring: CircularQueue,
    entries: [CallbackEntry; CALLBACK_QUEUE_SIZE as usize],
    /// Entries lost to a full queue since connect.
    pub overrun_count: u32,
}

impl CallbackQueue {
    pub fn new() -> Self {
        Self {
            ring: CircularQueue::new(CALLBACK_QUEUE_SIZE),
            entries: [CallbackEntry { conn: ConnectionId(0), kind: CallbackKind::TxSuccess };
                CALLBACK_QUEUE_SIZE as usize],
            overrun_count: 0,
        }
    }

    pub fn push(&mut self, conn: ConnectionId, kind: CallbackKind) {
        match self.ring.producer().free_slot() {
            Some(slot) => {
                self.entries[slot as usize] = CallbackEntry { conn, kind };
                self.ring.producer().commit_enqueue();
            }
            None => self.overrun_count += 1,
        }
    }

    pub fn pop(&mut self) -> Option<CallbackEntry> {
        let slot = self.ring.consumer().front()?;
        let entry = self.entries[slot as usize];
        self.ring.consumer().commit_dequeue();
        Some(entry)
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }
}

/// Network-wide concurrency state owned by the MAC.
pub(crate) struct MacCore {
    pub schedule: Schedule,
    pub sync: TdmaSync,
    pub callback_queue: CallbackQueue,
    pub rdo: Rdo,
    pub ddcm: Ddcm,
    pub random_channel: bool,
    pub channel_lfsr: ChannelLfsr,
    pub certification: bool,
    pub fast_sync: bool,
    /// PLL cycles elapsed since the last received sync frame.
    pub pll_since_sync: u32,
}

impl MacCore {
    pub fn new(schedule: Schedule, pan_id: u16) -> Self {
        Self {
            schedule,
            sync: TdmaSync::new(16, 8),
            callback_queue: CallbackQueue::new(),
            rdo: Rdo::default(),
            ddcm: Ddcm::default(),
            random_channel: false,
            channel_lfsr: ChannelLfsr::new(pan_id, 0),
            certification: false,
            fast_sync: false,
            pll_since_sync: 0,
        }
    }

    /// Advance the schedule to the next slot, walking the concurrency
    /// mechanisms along. Returns the slot-start offset in PLL cycles.
    pub fn advance_slot(&mut self, pan_id: u16) -> i32 {
        let elapsed = self.schedule.current().duration_pll;
        self.pll_since_sync = self.pll_since_sync.saturating_add(elapsed);
        self.schedule.advance();
        if self.certification {
            return 0;
        }
        self.rdo.advance();
        if self.random_channel {
            if self.schedule.current_index() == 0 {
                self.channel_lfsr = ChannelLfsr::new(pan_id, self.schedule.cycle_count());
            }
            let position = self
                .channel_lfsr
                .next_index(self.schedule.channel_sequence_len());
            self.schedule.set_channel_position(position);
        }
        let mut offset = self.sync.take_correction_pll();
        offset += self.ddcm.offset(self.pll_since_sync) as i32;
        offset += self.rdo.value() as i32;
        offset
    }

    /// A sync frame landed with the given phase offset.
    pub fn on_sync_frame(&mut self, phase_offset_pll: i32) {
        self.sync.on_sync_frame(phase_offset_pll);
        self.pll_since_sync = 0;
    }
}

/// Pick the transmitting connection for a slot: highest priority (lowest
/// value) with a pending frame wins, list order breaks ties. Throttling
/// and flow-control credit gate each candidate.
pub(crate) fn pick_tx_conn(slot: &Timeslot, conns: &mut [Connection]) -> Option<ConnectionId> {
    let mut best: Option<(u8, ConnectionId)> = None;
    for &conn_id in &slot.main_conns {
        let conn = &mut conns[conn_id.0 as usize];
        if !conn.is_tx {
            continue;
        }
        let pending = conn.tx_queue.as_ref().is_some_and(|q| !q.ring.is_empty());
        if !pending {
            continue;
        }
        if conn.credit_flow_ctrl && conn.credit_available == 0 {
            continue;
        }
        let priority = if conn.priority_enabled { conn.priority } else { 0 };
        match best {
            Some((best_priority, _)) if best_priority <= priority => {}
            _ => best = Some((priority, conn_id)),
        }
    }
    let (_, conn_id) = best?;
    // The throttle account is charged only on the winning connection.
    if !conns[conn_id.0 as usize].throttle.take_slot() {
        return None;
    }
    Some(conn_id)
}

/// Apply a transmit outcome to the owning connection.
pub(crate) fn handle_tx_outcome(
    conn_id: ConnectionId,
    conn: &mut Connection,
    outcome: FrameOutcome,
    tick: u64,
    cbq: &mut CallbackQueue,
) {
    let Some(queue) = conn.tx_queue.as_mut() else {
        return;
    };
    let Some(front_slot) = queue.ring.consumer().front() else {
        return;
    };
    let frame = *queue.frame(front_slot);
    match outcome {
        FrameOutcome::SentAck => {
            conn.lqi.record_sent(true);
            conn.arq_tx.acknowledge();
            if conn.credit_flow_ctrl && conn.credit_available > 0 {
                conn.credit_available -= 1;
            }
            queue.ring.consumer().commit_dequeue();
            conn.stats.tx_success_count += 1;
            conn.stats.tx_byte_count += frame.size as u64;
            // Fragmented messages report once, on the last fragment.
            if frame.frag_last {
                cbq.push(conn_id, CallbackKind::TxSuccess);
            }
        }
        FrameOutcome::SentNack => {
            conn.lqi.record_sent(false);
            conn.arq_tx.record_attempt(tick);
            if !conn.arq_enabled {
                queue.ring.consumer().commit_dequeue();
                conn.stats.tx_fail_count += 1;
                cbq.push(conn_id, CallbackKind::TxFail);
            } else if conn.arq_tx.verdict(tick) == RetryVerdict::Drop {
                conn.arq_tx.abandon();
                queue.ring.consumer().commit_dequeue();
                conn.stats.tx_dropped_count += 1;
                cbq.push(conn_id, CallbackKind::TxDropped);
            }
            // Retry verdict: the frame stays at the front for the next slot.
        }
        FrameOutcome::NotSent => match conn.cca.fail_action {
            CcaFailAction::Abort => {
                conn.stats.cca_abort_count += 1;
            }
            // A forced transmission never reports NotSent; getting here
            // anyway counts as an abort.
            CcaFailAction::Force => {
                conn.stats.cca_abort_count += 1;
            }
        },
        _ => {}
    }
}

/// What to do with the frame body after header processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RxDisposition {
    /// Frame published, rx-success queued.
    Delivered,
    /// Fragment stashed, waiting for the rest of the message.
    Stashed,
    /// Frame discarded (duplicate or broken fragment run).
    Discarded,
}

/// Apply a received frame to the owning connection.
///
/// The frame body already sits in the RX queue slot the PHY wrote into;
/// `queue_slot` names it. `payload_len` excludes the header.
pub(crate) fn handle_rx_frame(
    conn_id: ConnectionId,
    conn: &mut Connection,
    queue_slot: u16,
    values: HeaderValues,
    payload_len: u16,
    rssi_code: u8,
    rnsi_code: u8,
    cbq: &mut CallbackQueue,
) -> RxDisposition {
    conn.lqi.record_received(rssi_code, rnsi_code);
    if let Some(event) = conn.track_link(true) {
        cbq.push(conn_id, CallbackKind::Event(event));
    }
    if conn.credit_flow_ctrl {
        conn.credit_available = values.credit;
    }
    if (conn.ack_enabled || conn.arq_enabled)
        && conn.arq_rx.check(values.seq) == RxVerdict::Duplicate
    {
        conn.lqi.record_duplicated();
        conn.stats.duplicate_count += 1;
        return RxDisposition::Discarded;
    }
    let Some(queue) = conn.rx_queue.as_mut() else {
        return RxDisposition::Discarded;
    };
    queue.frame_mut(queue_slot).size = payload_len;
    if !conn.fragmentation {
        queue.ring.producer().commit_enqueue();
        conn.stats.rx_success_count += 1;
        conn.stats.rx_byte_count += payload_len as u64;
        cbq.push(conn_id, CallbackKind::RxSuccess);
        return RxDisposition::Delivered;
    }
    match conn.frag_rx.on_fragment(values.frag_index, values.frag_last) {
        FragRxAction::Stash => RxDisposition::Stashed,
        FragRxAction::Complete { pending } => {
            let producer = queue.ring.producer();
            for _ in 0..=pending {
                producer.commit_enqueue();
            }
            conn.stats.rx_success_count += 1;
            cbq.push(conn_id, CallbackKind::RxSuccess);
            RxDisposition::Delivered
        }
        FragRxAction::Discard => {
            conn.stats.rejected_count += 1;
            conn.lqi.record_rejected();
            RxDisposition::Discarded
        }
    }
}

/// Apply a missed or rejected RX slot.
pub(crate) fn handle_rx_miss(
    conn_id: ConnectionId,
    conn: &mut Connection,
    outcome: FrameOutcome,
    cbq: &mut CallbackQueue,
) {
    match outcome {
        FrameOutcome::Rejected => {
            conn.lqi.record_rejected();
            conn.stats.rejected_count += 1;
        }
        _ => conn.lqi.record_lost(),
    }
    if let Some(event) = conn.track_link(false) {
        cbq.push(conn_id, CallbackKind::Event(event));
    }
}
