//! # Pairing procedure
//!
//! A short reliable request/response exchange run on a reserved network
//! (PAN `0x000`, coordinator `0x01`, node `0x02`, one region channel)
//! before the application network exists. The coordinator authenticates
//! the node with a shared 64-bit application code, learns its radio
//! serial and role, derives fresh network addresses from the serials and
//! hands them over. Both sides run mirror state machines; reliability
//! comes from the engine's acknowledge/ARQ underneath.
//!
//! After a successful exchange the caller re-initializes the normal stack
//! with the learned addresses.

pub mod address;
pub mod message;

pub use address::DiscoveryEntry;
pub use message::{Message, PAIRING_PAYLOAD_MAX};

use embassy_time::Duration;

use crate::connection::ConnectionCfg;
use crate::error::{Error, Result};
use crate::hal::{RadioId, WirelessHal};
use crate::node::{NetworkRole, NodeCfg};
use crate::radio::ChipRate;
use crate::schedule::TimeslotId;
use crate::{ChannelCfg, Stack, StackCfg};
use address::{
    available_node_id, extract_device_address, extract_pan_id, generate_serialized_address,
};

/// Reserved pairing network.
const PAIRING_PAN_ID: u16 = 0x000;
const PAIRING_COORDINATOR_ADDRESS: u8 = 0x01;
const PAIRING_NODE_ADDRESS: u8 = 0x02;
/// Region channel used for the exchange.
const PAIRING_CHANNEL_MHZ: u16 = 7987;
/// Two slots: coordinator to node, node to coordinator.
const PAIRING_TIMESLOTS_US: [u32; 2] = [1000, 1000];
/// Grace period before tearing the pairing link down.
const DISCONNECT_GRACE: Duration = Duration::from_millis(100);

/// Terminal pairing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PairingEvent {
    Success,
    Timeout,
    InvalidAppCode,
    WirelessError,
    Aborted,
}

/// Addresses assigned by a successful exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AssignedAddress {
    pub pan_id: u16,
    pub coordinator_address: u8,
    pub node_address: u8,
}

/// Result of a pairing run.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PairingOutcome {
    pub event: PairingEvent,
    pub assigned: AssignedAddress,
}

/// Pairing parameters shared by both roles.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PairingCfg {
    /// Shared application code both ends must present.
    pub app_code: u64,
    /// Overall procedure timeout, at least five seconds.
    pub timeout: Duration,
    /// Role index of the device being paired, an index into the
    /// coordinator's discovery list.
    pub device_role: u8,
}

impl PairingCfg {
    pub fn validate(&self) -> Result<()> {
        if self.timeout < Duration::from_secs(5) {
            return Err(Error::InvalidParameter);
        }
        Ok(())
    }
}

/// Coordinator-side state machine.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum CoordinatorState {
    WaitAuthResponse,
    WaitIdentification,
    WaitAddressingResponse,
    Done,
}

pub struct CoordinatorSession<'a> {
    app_code: u64,
    serial_number: u64,
    discovery: &'a mut [DiscoveryEntry],
    state: CoordinatorState,
    outbox: heapless::Deque<Message, 2>,
    assigned: AssignedAddress,
    event: Option<PairingEvent>,
}

impl<'a> CoordinatorSession<'a> {
    pub fn new(app_code: u64, serial_number: u64, discovery: &'a mut [DiscoveryEntry]) -> Self {
        let mut outbox = heapless::Deque::new();
        let _ = outbox.push_back(Message::AuthenticationMessage { app_code });
        Self {
            app_code,
            serial_number,
            discovery,
            state: CoordinatorState::WaitAuthResponse,
            outbox,
            assigned: AssignedAddress::default(),
            event: None,
        }
    }

    /// Next message to transmit, if any.
    pub fn take_message(&mut self) -> Option<Message> {
        self.outbox.pop_front()
    }

    pub fn event(&self) -> Option<PairingEvent> {
        self.event
    }

    pub fn assigned(&self) -> AssignedAddress {
        self.assigned
    }

    fn finish(&mut self, event: PairingEvent) {
        self.state = CoordinatorState::Done;
        self.event = Some(event);
    }

    /// Feed one received message.
    pub fn on_message(&mut self, message: Message) {
        match (self.state, message) {
            (
                CoordinatorState::WaitAuthResponse,
                Message::AuthenticationResponse { accepted },
            ) => {
                if accepted {
                    self.state = CoordinatorState::WaitIdentification;
                } else {
                    self.finish(PairingEvent::InvalidAppCode);
                }
            }
            (
                CoordinatorState::WaitIdentification,
                Message::IdentificationMessage { serial_number, device_role },
            ) => {
                // The coordinator derives the network identity from its
                // own serial and the node address from the node's.
                let own = generate_serialized_address(self.serial_number);
                let pan_id = extract_pan_id(own);
                let coordinator_address = extract_device_address(own);
                let node_word = generate_serialized_address(serial_number);
                let node_address =
                    available_node_id(extract_device_address(node_word), self.discovery);
                if let Some(entry) = self.discovery.get_mut(device_role as usize) {
                    *entry = DiscoveryEntry { node_address, unique_id: serial_number };
                }
                self.assigned =
                    AssignedAddress { pan_id, coordinator_address, node_address };
                let _ = self.outbox.push_back(Message::AddressingMessage {
                    pan_id,
                    coordinator_address,
                    node_address,
                });
                self.state = CoordinatorState::WaitAddressingResponse;
            }
            (
                CoordinatorState::WaitAddressingResponse,
                Message::AddressingResponse { accepted },
            ) => {
                if accepted {
                    self.finish(PairingEvent::Success);
                } else {
                    self.finish(PairingEvent::Aborted);
                }
            }
            // Retransmissions of a stage already passed are ignored.
            _ => {}
        }
    }

    /// Shared secret check helper, kept together with its user.
    pub fn app_code_matches(&self, code: u64) -> bool {
        self.app_code == code
    }
}

/// Node-side state machine.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum NodeState {
    WaitAuthentication,
    WaitAddressing,
    Done,
}

pub struct NodeSession {
    app_code: u64,
    serial_number: u64,
    device_role: u8,
    state: NodeState,
    outbox: heapless::Deque<Message, 2>,
    assigned: AssignedAddress,
    event: Option<PairingEvent>,
}

impl NodeSession {
    pub fn new(app_code: u64, serial_number: u64, device_role: u8) -> Self {
        Self {
            app_code,
            serial_number,
            device_role,
            state: NodeState::WaitAuthentication,
            outbox: heapless::Deque::new(),
            assigned: AssignedAddress::default(),
            event: None,
        }
    }

    pub fn take_message(&mut self) -> Option<Message> {
        self.outbox.pop_front()
    }

    pub fn event(&self) -> Option<PairingEvent> {
        self.event
    }

    pub fn assigned(&self) -> AssignedAddress {
        self.assigned
    }

    fn finish(&mut self, event: PairingEvent) {
        self.state = NodeState::Done;
        self.event = Some(event);
    }

    pub fn on_message(&mut self, message: Message) {
        match (self.state, message) {
            (NodeState::WaitAuthentication, Message::AuthenticationMessage { app_code }) => {
                let accepted = app_code == self.app_code;
                let _ = self.outbox.push_back(Message::AuthenticationResponse { accepted });
                if accepted {
                    let _ = self.outbox.push_back(Message::IdentificationMessage {
                        serial_number: self.serial_number,
                        device_role: self.device_role,
                    });
                    self.state = NodeState::WaitAddressing;
                } else {
                    self.finish(PairingEvent::InvalidAppCode);
                }
            }
            (
                NodeState::WaitAddressing,
                Message::AddressingMessage { pan_id, coordinator_address, node_address },
            ) => {
                self.assigned = AssignedAddress { pan_id, coordinator_address, node_address };
                let _ = self.outbox.push_back(Message::AddressingResponse { accepted: true });
                self.finish(PairingEvent::Success);
            }
            _ => {}
        }
    }
}

/// Configure the reserved pairing network on a stopped stack.
///
/// `local` / `remote` are the reserved addresses for this side.
fn setup_pairing_link<H: WirelessHal>(
    stack: &mut Stack<'_, H>,
    role: NetworkRole,
) -> Result<(crate::ConnectionId, crate::ConnectionId)> {
    let (local, remote) = match role {
        NetworkRole::Coordinator => (PAIRING_COORDINATOR_ADDRESS, PAIRING_NODE_ADDRESS),
        NetworkRole::Node => (PAIRING_NODE_ADDRESS, PAIRING_COORDINATOR_ADDRESS),
    };
    stack.reserved_address_unlock();
    stack.reconfigure(StackCfg::new(
        &PAIRING_TIMESLOTS_US,
        &[0],
        ChipRate::Rate20M48,
    ))?;
    stack.node_init(NodeCfg {
        pan_id: PAIRING_PAN_ID,
        local_address: local,
        coordinator_address: PAIRING_COORDINATOR_ADDRESS,
        role,
    })?;
    stack.radio_module_init(RadioId::Radio1, false)?;
    // Coordinator transmits on slot 0, node answers on slot 1.
    let (tx_slot, rx_slot) = match role {
        NetworkRole::Coordinator => (0u8, 1u8),
        NetworkRole::Node => (1u8, 0u8),
    };
    let tx = stack.connection_init(
        ConnectionCfg::new("pairing-tx", local, remote)
            .with_payload(PAIRING_PAYLOAD_MAX as u16, 2)
            .with_timeslots(&[TimeslotId::main(tx_slot)]),
    )?;
    let rx = stack.connection_init(
        ConnectionCfg::new("pairing-rx", remote, local)
            .with_payload(PAIRING_PAYLOAD_MAX as u16, 2)
            .with_timeslots(&[TimeslotId::main(rx_slot)]),
    )?;
    for conn in [tx, rx] {
        stack.connection_add_channel(conn, ChannelCfg::new(PAIRING_CHANNEL_MHZ, 2, 5, 3, 2))?;
    }
    stack.set_retransmission(tx, true, 0, Duration::from_millis(0))?;
    stack.setup()?;
    stack.connect()?;
    Ok((tx, rx))
}

/// Drive one session over the connected pairing link until it finishes
/// or the deadline passes.
fn pump<H: WirelessHal, F, G>(
    stack: &mut Stack<'_, H>,
    tx: crate::ConnectionId,
    rx: crate::ConnectionId,
    deadline: u64,
    mut take: F,
    mut feed: G,
    done: impl Fn() -> bool,
) -> Result<bool>
where
    F: FnMut() -> Option<Message>,
    G: FnMut(Message),
{
    let mut buf = [0u8; PAIRING_PAYLOAD_MAX];
    loop {
        if let Some(message) = take() {
            let len = message.encode(&mut buf);
            stack.send(tx, &buf[..len])?;
        }
        match stack.receive(rx) {
            Ok(payload) => {
                let message = Message::decode(payload)?;
                stack.receive_complete(rx)?;
                feed(message);
            }
            Err(Error::ReceiveQueueEmpty) => {}
            Err(err) => return Err(err),
        }
        if done() {
            return Ok(true);
        }
        if stack.hal_tick() > deadline {
            return Ok(false);
        }
    }
}

fn grace_delay<H: WirelessHal>(stack: &Stack<'_, H>) {
    let ticks =
        DISCONNECT_GRACE.as_micros() * stack.hal_tick_frequency_hz() as u64 / 1_000_000;
    let end = stack.hal_tick() + ticks;
    while stack.hal_tick() < end {}
}

fn deadline_tick<H: WirelessHal>(stack: &Stack<'_, H>, timeout: Duration) -> u64 {
    stack.hal_tick() + timeout.as_micros() * stack.hal_tick_frequency_hz() as u64 / 1_000_000
}

/// Run the pairing procedure as the coordinator.
///
/// The stack is reconfigured for the reserved network, driven to
/// completion, then disconnected and left stopped; on success the caller
/// rebuilds its application network with the returned assignment and the
/// updated `discovery` list.
pub fn run_coordinator<H: WirelessHal>(
    stack: &mut Stack<'_, H>,
    cfg: PairingCfg,
    serial_number: u64,
    discovery: &mut [DiscoveryEntry],
) -> Result<PairingOutcome> {
    cfg.validate()?;
    let (tx, rx) = setup_pairing_link(stack, NetworkRole::Coordinator)?;
    let deadline = deadline_tick(stack, cfg.timeout);
    let session = core::cell::RefCell::new(CoordinatorSession::new(
        cfg.app_code,
        serial_number,
        discovery,
    ));
    let completed = pump(
        stack,
        tx,
        rx,
        deadline,
        || session.borrow_mut().take_message(),
        |m| session.borrow_mut().on_message(m),
        || session.borrow().event().is_some(),
    )?;
    let session = session.into_inner();
    let event = if completed {
        session.event().unwrap_or(PairingEvent::Aborted)
    } else {
        PairingEvent::Timeout
    };
    let assigned = session.assigned();
    grace_delay(stack);
    stack.disconnect(Duration::from_millis(100))?;
    stack.reserved_address_lock();
    Ok(PairingOutcome { event, assigned })
}

/// Run the pairing procedure as the node being paired.
pub fn run_node<H: WirelessHal>(
    stack: &mut Stack<'_, H>,
    cfg: PairingCfg,
    serial_number: u64,
) -> Result<PairingOutcome> {
    cfg.validate()?;
    let (tx, rx) = setup_pairing_link(stack, NetworkRole::Node)?;
    let deadline = deadline_tick(stack, cfg.timeout);
    let session =
        core::cell::RefCell::new(NodeSession::new(cfg.app_code, serial_number, cfg.device_role));
    let completed = pump(
        stack,
        tx,
        rx,
        deadline,
        || session.borrow_mut().take_message(),
        |m| session.borrow_mut().on_message(m),
        || session.borrow().event().is_some(),
    )?;
    let session = session.into_inner();
    let event = if completed {
        session.event().unwrap_or(PairingEvent::Aborted)
    } else {
        PairingEvent::Timeout
    };
    let assigned = session.assigned();
    grace_delay(stack);
    stack.disconnect(Duration::from_millis(100))?;
    stack.reserved_address_lock();
    Ok(PairingOutcome { event, assigned })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Wire two sessions back to back, draining each outbox in turn.
    fn exchange(
        coord: &mut CoordinatorSession<'_>,
        node: &mut NodeSession,
        max_rounds: usize,
    ) {
        for _ in 0..max_rounds {
            while let Some(m) = coord.take_message() {
                node.on_message(m);
            }
            while let Some(m) = node.take_message() {
                coord.on_message(m);
            }
            if coord.event().is_some() && node.event().is_some() {
                break;
            }
        }
    }

    #[test]
    fn matching_app_code_pairs_both_sides() {
        let mut discovery = [DiscoveryEntry::default(); 2];
        let mut coord = CoordinatorSession::new(0x111, 0xAAAA_BBBB_CCCC_DDDD, &mut discovery);
        let mut node = NodeSession::new(0x111, 0x1234_5678_9ABC_DEF0, 1);
        exchange(&mut coord, &mut node, 8);
        assert_eq!(coord.event(), Some(PairingEvent::Success));
        assert_eq!(node.event(), Some(PairingEvent::Success));
        let a = coord.assigned();
        assert_eq!(a, node.assigned());
        // Assignment obeys the address generator and reserved-value
        // rules.
        assert_ne!(a.pan_id & 0x0FF, 0x000);
        assert!(a.coordinator_address != 0x00 && a.coordinator_address != 0xFF);
        assert!(a.node_address != 0x00 && a.node_address != 0xFF);
    }

    #[test]
    fn mismatched_app_code_aborts_both_sides() {
        let mut discovery = [DiscoveryEntry::default(); 2];
        let mut coord = CoordinatorSession::new(0x111, 1, &mut discovery);
        let mut node = NodeSession::new(0xDEAD, 2, 0);
        exchange(&mut coord, &mut node, 8);
        assert_eq!(coord.event(), Some(PairingEvent::InvalidAppCode));
        assert_eq!(node.event(), Some(PairingEvent::InvalidAppCode));
    }

    #[test]
    fn discovery_list_records_the_paired_node() {
        let mut discovery = [DiscoveryEntry::default(); 3];
        let serial = 0x5555_6666_7777_8888u64;
        let mut coord = CoordinatorSession::new(7, 1, &mut discovery);
        let mut node = NodeSession::new(7, serial, 2);
        exchange(&mut coord, &mut node, 8);
        let assigned = coord.assigned();
        assert_eq!(discovery[2].unique_id, serial);
        assert_eq!(discovery[2].node_address, assigned.node_address);
    }

    #[test]
    fn second_node_gets_a_distinct_address() {
        let mut discovery = [DiscoveryEntry::default(); 2];
        let serial = 0x0101_0202_0303_0404u64;
        {
            let mut coord = CoordinatorSession::new(7, 1, &mut discovery);
            let mut node = NodeSession::new(7, serial, 0);
            exchange(&mut coord, &mut node, 8);
        }
        let first = discovery[0].node_address;
        {
            // Same serial pairing again under a different role must probe
            // past the taken address.
            let mut coord = CoordinatorSession::new(7, 1, &mut discovery);
            let mut node = NodeSession::new(7, serial, 1);
            exchange(&mut coord, &mut node, 8);
        }
        assert_ne!(discovery[1].node_address, first);
    }

    #[test]
    fn duplicate_messages_are_tolerated() {
        let mut discovery = [DiscoveryEntry::default(); 1];
        let mut coord = CoordinatorSession::new(9, 1, &mut discovery);
        let mut node = NodeSession::new(9, 2, 0);
        let auth = coord.take_message().unwrap();
        node.on_message(auth);
        node.on_message(auth);
        let response = node.take_message().unwrap();
        coord.on_message(response);
        coord.on_message(response);
        let ident = node.take_message().unwrap();
        coord.on_message(ident);
        coord.on_message(ident);
        let addressing = coord.take_message().unwrap();
        node.on_message(addressing);
        let confirm = node.take_message().unwrap();
        coord.on_message(confirm);
        assert_eq!(coord.event(), Some(PairingEvent::Success));
        assert_eq!(node.event(), Some(PairingEvent::Success));
        // Only one identification was produced despite the duplicates.
        assert!(node.take_message().is_none());
    }

    #[test]
    fn short_timeout_rejected() {
        let cfg = PairingCfg {
            app_code: 1,
            timeout: Duration::from_secs(4),
            device_role: 0,
        };
        assert!(cfg.validate().is_err());
    }
}
