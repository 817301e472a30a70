//! # Fragmentation
//!
//! Application payloads larger than the connection MTU are split into MTU
//! sized frames, each tagged with a fragment index and a last flag in the
//! `Seq` header field. The receive side stashes fragments in the RX queue
//! without publishing them and publishes the whole run atomically when the
//! last fragment lands, so the application only ever observes complete
//! messages. A gap, an index going backwards, or a queue overrun discards
//! the partial message and counts one reject.

use crate::error::{Error, Result};
use crate::protocol::FRAG_INDEX_MAX;

/// Number of MTU-sized fragments needed for `size` payload bytes.
///
/// Zero-byte messages still occupy one frame.
pub fn fragment_count(size: u16, mtu: u16) -> Result<u16> {
    let count = if size == 0 { 1 } else { size.div_ceil(mtu) };
    if count > FRAG_INDEX_MAX as u16 + 1 {
        return Err(Error::PayloadTooBig);
    }
    Ok(count)
}

/// Payload byte range of fragment `index` inside the full message.
pub fn fragment_span(index: u16, size: u16, mtu: u16) -> (u16, u16) {
    let begin = index * mtu;
    (begin, (begin + mtu).min(size))
}

/// Receive-side verdict for one arriving fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FragRxAction {
    /// Stash the fragment without publishing it.
    Stash,
    /// Last fragment: publish this many stashed frames plus this one.
    Complete { pending: u16 },
    /// Sequence broken: drop the stashed frames and this fragment.
    Discard,
}

/// Reassembly tracker for one RX connection.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FragRx {
    expected_index: u8,
    pending: u16,
}

impl FragRx {
    /// Frames stashed for the in-progress message.
    pub fn pending(&self) -> u16 {
        self.pending
    }

    /// Classify one received fragment and advance the tracker.
    pub fn on_fragment(&mut self, index: u8, last: bool) -> FragRxAction {
        if index != self.expected_index {
            self.reset();
            return FragRxAction::Discard;
        }
        if last {
            let pending = self.pending;
            self.reset();
            FragRxAction::Complete { pending }
        } else {
            self.expected_index += 1;
            self.pending += 1;
            FragRxAction::Stash
        }
    }

    /// Abandon the in-progress message (overrun or disconnect).
    pub fn reset(&mut self) {
        self.expected_index = 0;
        self.pending = 0;
    }
}
