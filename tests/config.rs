//! Configuration, validation and queue-level data-path behavior through
//! the public API. Nothing here connects, so no interrupt wiring is
//! involved.

mod common;

use common::MockHal;
use embassy_time::Duration;
use uwblink::concurrency::{CcaCfg, FallbackTier};
use uwblink::node::{NetworkRole, NodeCfg};
use uwblink::radio::ChipRate;
use uwblink::schedule::TimeslotId;
use uwblink::{ChannelCfg, ConnectionCfg, Error, RadioId, Stack, StackCfg};

fn node_cfg(local: u8) -> NodeCfg {
    NodeCfg {
        pan_id: 0x0ABC,
        local_address: local,
        coordinator_address: 0x01,
        role: if local == 0x01 { NetworkRole::Coordinator } else { NetworkRole::Node },
    }
}

fn channel() -> ChannelCfg {
    ChannelCfg::new(7987, 2, 5, 3, 2)
}

fn coordinator_stack(arena: &mut [u8]) -> Stack<'_, MockHal> {
    let cfg = StackCfg::new(&[500, 500], &[0], ChipRate::Rate20M48);
    let mut stack = Stack::new(MockHal::new(), cfg, arena).unwrap();
    stack.node_init(node_cfg(0x01)).unwrap();
    stack.radio_module_init(RadioId::Radio1, false).unwrap();
    stack
}

fn tx_conn_cfg() -> ConnectionCfg {
    ConnectionCfg::new("tx", 0x01, 0x02)
        .with_payload(64, 2)
        .with_timeslots(&[TimeslotId::main(0)])
}

#[test]
fn reserved_addresses_rejected_until_unlocked() {
    let mut arena = [0u8; 2048];
    let cfg = StackCfg::new(&[500], &[0], ChipRate::Rate20M48);
    let mut stack = Stack::new(MockHal::new(), cfg, &mut arena).unwrap();

    let mut bad = node_cfg(0x01);
    bad.pan_id = 0x000;
    assert_eq!(stack.node_init(bad).unwrap_err(), Error::PanId);

    let mut bad = node_cfg(0x01);
    bad.local_address = 0x00;
    assert_eq!(stack.node_init(bad).unwrap_err(), Error::LocalAddress);

    let mut bad = node_cfg(0x01);
    bad.local_address = 0xFF;
    assert_eq!(stack.node_init(bad).unwrap_err(), Error::LocalAddress);

    stack.reserved_address_unlock();
    let mut pairing = node_cfg(0x01);
    pairing.pan_id = 0x000;
    assert!(stack.node_init(pairing).is_ok());
    stack.reserved_address_lock();
    assert_eq!(stack.node_init(pairing).unwrap_err(), Error::PanId);
}

#[test]
fn connection_must_involve_the_local_address() {
    let mut arena = [0u8; 2048];
    let mut stack = coordinator_stack(&mut arena);
    let foreign = ConnectionCfg::new("other", 0x05, 0x06)
        .with_payload(32, 2)
        .with_timeslots(&[TimeslotId::main(0)]);
    assert_eq!(stack.connection_init(foreign).unwrap_err(), Error::ConnectionAddress);
    // Broadcast destinations are receivable by anyone.
    let bcast = ConnectionCfg::new("bcast", 0x05, 0xFF)
        .with_payload(32, 2)
        .with_timeslots(&[TimeslotId::main(0)]);
    assert!(stack.connection_init(bcast).is_ok());
}

#[test]
fn policy_conflicts_surface_the_right_errors() {
    let mut arena = [0u8; 4096];
    let mut stack = coordinator_stack(&mut arena);
    let tx = stack.connection_init(tx_conn_cfg()).unwrap();

    stack.set_acknowledgement(tx, false).unwrap();
    assert_eq!(
        stack.set_retransmission(tx, true, 5, Duration::from_millis(0)).unwrap_err(),
        Error::ArqWithAckDisabled
    );
    assert_eq!(
        stack.set_credit_flow_ctrl(tx, true).unwrap_err(),
        Error::CreditFlowCtrlWithAckDisabled
    );
    stack.set_acknowledgement(tx, true).unwrap();
    stack.set_retransmission(tx, true, 5, Duration::from_millis(0)).unwrap();
    stack.set_credit_flow_ctrl(tx, true).unwrap();

    assert_eq!(stack.set_connection_priority(tx, 8).unwrap_err(), Error::MaxConnPriority);
    stack.set_connection_priority(tx, 2).unwrap();

    // Throttling is a transmit-side feature.
    let rx = stack
        .connection_init(
            ConnectionCfg::new("rx", 0x02, 0x01)
                .with_payload(64, 2)
                .with_timeslots(&[TimeslotId::main(1)]),
        )
        .unwrap();
    assert_eq!(stack.set_throttling(rx).unwrap_err(), Error::ThrottlingOnRxConnection);
    assert_eq!(
        stack.set_throttling_active_ratio(tx, 50).unwrap_err(),
        Error::ThrottlingNotSupported
    );
    stack.set_throttling(tx).unwrap();
    stack.set_throttling_active_ratio(tx, 50).unwrap();
    assert_eq!(
        stack.set_throttling_active_ratio(tx, 101).unwrap_err(),
        Error::InvalidParameter
    );
}

#[test]
fn auto_reply_connections_reject_channels_and_ack() {
    let mut arena = [0u8; 2048];
    let mut stack = coordinator_stack(&mut arena);
    let auto = stack
        .connection_init(
            ConnectionCfg::new("auto", 0x01, 0x02)
                .with_payload(16, 2)
                .with_timeslots(&[TimeslotId::auto(1)]),
        )
        .unwrap();
    assert_eq!(
        stack.connection_add_channel(auto, channel()).unwrap_err(),
        Error::AddChannelOnInvalidConnection
    );
    assert_eq!(
        stack.set_acknowledgement(auto, true).unwrap_err(),
        Error::AckNotSupportedInAutoReplyConnection
    );
}

#[test]
fn fallback_tiers_must_strictly_descend() {
    let mut arena = [0u8; 2048];
    let mut stack = coordinator_stack(&mut arena);
    let tx = stack.connection_init(tx_conn_cfg()).unwrap();
    let tier = |threshold| FallbackTier {
        payload_threshold: threshold,
        tx_pulse_count: 3,
        tx_pulse_width: 6,
        tx_pulse_gain: 2,
        cca_try_count: 2,
    };
    stack.connection_add_fallback_channel(tx, tier(48)).unwrap();
    stack.connection_add_fallback_channel(tx, tier(16)).unwrap();
    assert_eq!(
        stack.connection_add_fallback_channel(tx, tier(16)).unwrap_err(),
        Error::InvalidParameter
    );
}

#[test]
fn cca_parameters_validated_at_set_time() {
    let mut arena = [0u8; 2048];
    let mut stack = coordinator_stack(&mut arena);
    let tx = stack.connection_init(tx_conn_cfg()).unwrap();
    let bad = CcaCfg { enabled: true, try_count: 0, ..Default::default() };
    assert_eq!(stack.set_cca(tx, bad).unwrap_err(), Error::CcaInvalidParameters);
}

#[test]
fn setup_requires_channels_and_is_idempotent() {
    let mut arena = [0u8; 4096];
    let mut stack = coordinator_stack(&mut arena);
    let tx = stack.connection_init(tx_conn_cfg()).unwrap();
    assert_eq!(stack.setup().unwrap_err(), Error::NoChannelInit);
    stack.connection_add_channel(tx, channel()).unwrap();
    stack.setup().unwrap();
    let first = stack.allocated_bytes();
    assert!(first > 0);
    // Running setup again without touching the configuration changes
    // nothing.
    stack.setup().unwrap();
    assert_eq!(stack.allocated_bytes(), first);
}

#[test]
fn setup_rejects_mismatched_ack_on_shared_timeslot() {
    let mut arena = [0u8; 8192];
    let mut stack = coordinator_stack(&mut arena);
    let a = stack.connection_init(tx_conn_cfg()).unwrap();
    let b = stack
        .connection_init(
            ConnectionCfg::new("tx2", 0x01, 0x03)
                .with_payload(64, 2)
                .with_timeslots(&[TimeslotId::main(0)]),
        )
        .unwrap();
    stack.connection_add_channel(a, channel()).unwrap();
    stack.connection_add_channel(b, channel()).unwrap();
    stack.set_acknowledgement(b, false).unwrap();
    assert_eq!(stack.setup().unwrap_err(), Error::NonMatchingSameTimeslotConnField);
    stack.set_acknowledgement(b, true).unwrap();
    // Priority must be enabled on all or none.
    stack.set_connection_priority(a, 1).unwrap();
    assert_eq!(stack.setup().unwrap_err(), Error::PrioNotEnableOnAllConn);
    stack.set_connection_priority(b, 0).unwrap();
    stack.setup().unwrap();
}

#[test]
fn send_path_enforces_direction_size_and_capacity() {
    let mut arena = [0u8; 4096];
    let mut stack = coordinator_stack(&mut arena);
    let tx = stack.connection_init(tx_conn_cfg()).unwrap();
    let rx = stack
        .connection_init(
            ConnectionCfg::new("rx", 0x02, 0x01)
                .with_payload(64, 2)
                .with_timeslots(&[TimeslotId::main(1)]),
        )
        .unwrap();
    stack.connection_add_channel(tx, channel()).unwrap();
    stack.connection_add_channel(rx, channel()).unwrap();
    stack.setup().unwrap();

    assert_eq!(stack.send(rx, b"nope").unwrap_err(), Error::SendOnRxConn);
    assert_eq!(stack.send(tx, &[0u8; 65]).unwrap_err(), Error::SizeTooBig);

    stack.send(tx, b"one").unwrap();
    stack.with_tx_buffer(tx, 4, |buf| buf.copy_from_slice(b"four")).unwrap();
    assert_eq!(stack.enqueued_count(tx).unwrap(), 2);
    assert_eq!(stack.send(tx, b"three").unwrap_err(), Error::SendQueueFull);

    assert_eq!(stack.receive(rx).unwrap_err(), Error::ReceiveQueueEmpty);
    assert_eq!(stack.receive_complete(rx).unwrap_err(), Error::ReceiveQueueEmpty);
}

#[test]
fn fragmentation_splits_large_sends() {
    let mut arena = [0u8; 8192];
    let mut stack = coordinator_stack(&mut arena);
    let tx = stack
        .connection_init(
            ConnectionCfg::new("frag", 0x01, 0x02)
                .with_payload(124, 8)
                .with_timeslots(&[TimeslotId::main(0)]),
        )
        .unwrap();
    stack.connection_add_channel(tx, channel()).unwrap();
    stack.set_fragmentation(tx).unwrap();
    stack.setup().unwrap();

    let mut payload = vec![0u8; 500];
    common::forge_pseudo(&mut payload, 1);
    stack.send(tx, &payload).unwrap();
    // 500 bytes over a 124-byte MTU is five frames on the air.
    assert_eq!(stack.enqueued_count(tx).unwrap(), 5);
    // A second large message does not fit the remaining three slots.
    assert_eq!(stack.send(tx, &payload).unwrap_err(), Error::SendQueueFull);
    // Zero-copy access is a single-frame interface.
    assert_eq!(
        stack.with_tx_buffer(tx, 10, |_| {}).unwrap_err(),
        Error::FragmentationNotSupported
    );
}

#[test]
fn config_locked_after_setup_until_touched() {
    let mut arena = [0u8; 4096];
    let mut stack = coordinator_stack(&mut arena);
    let tx = stack.connection_init(tx_conn_cfg()).unwrap();
    stack.connection_add_channel(tx, channel()).unwrap();
    stack.setup().unwrap();
    // A configuration change drops the engine back to stopped, so connect
    // without a fresh setup is refused.
    stack.set_connection_priority(tx, 1).unwrap();
    assert_eq!(stack.connect().unwrap_err(), Error::NotInitialized);
}

#[test]
fn certification_mode_excludes_concurrency() {
    let mut arena = [0u8; 2048];
    let mut stack = coordinator_stack(&mut arena);
    stack.set_certification_mode(true).unwrap();
    assert_eq!(stack.set_rdo(96, 7).unwrap_err(), Error::InvalidParameter);
    assert_eq!(stack.set_ddcm(32, 100_000).unwrap_err(), Error::InvalidParameter);
    stack.set_certification_mode(false).unwrap();
    stack.set_rdo(96, 7).unwrap();
    // Re-enabling certification forces them back off.
    stack.set_certification_mode(true).unwrap();
    stack.set_certification_mode(false).unwrap();
    stack.set_ddcm(32, 100_000).unwrap();
}

#[test]
fn pseudo_data_round_trip() {
    let mut data = [0u8; 64];
    common::forge_pseudo(&mut data, 7);
    assert!(common::validate_pseudo(&data));
    data[10] ^= 0x01;
    assert!(!common::validate_pseudo(&data));
}
