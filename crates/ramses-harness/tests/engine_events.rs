//! Dispatcher behavior through the full engine: subscriptions, one-shot
//! hooks, codec-reject diagnostics, and packet-log replay.

mod common;

use common::{addr, frame, gateway_config, spawn_engine};
use ramses_core::{Engine, EngineError, EngineEvent, PacketFilter, ReplayTransport};
use ramses_proto::{Address, Code, Verb};
use std::time::Duration;

async fn next_packet(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<EngineEvent>,
) -> ramses_proto::Packet {
    loop {
        match tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
            Ok(Some(EngineEvent::Packet(pkt))) => return pkt,
            Ok(Some(EngineEvent::Diagnostic(_))) => continue,
            other => panic!("expected a packet event, got {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn subscribers_see_spontaneous_traffic_in_order() {
    let (radio, handle, _task) = spawn_engine(gateway_config());
    let fan = addr("32:022222");

    let mut all = handle.subscribe(PacketFilter::any()).await.unwrap();
    let mut vents = handle.subscribe(PacketFilter::for_code(Code::VENT_STATE)).await.unwrap();

    radio.inject_frame(&frame(Verb::I, fan, Address::NONE, Code::FAN_STATE, vec![0x00, 0x00]));
    radio.inject_frame(&frame(Verb::I, fan, Address::NONE, Code::VENT_STATE, vec![0x00, 0x01]));

    assert_eq!(next_packet(&mut all).await.code(), Code::FAN_STATE);
    assert_eq!(next_packet(&mut all).await.code(), Code::VENT_STATE);
    // the filtered subscriber only sees its code
    assert_eq!(next_packet(&mut vents).await.code(), Code::VENT_STATE);
}

/// The once-subscription is the lazy feature-detection hook: one
/// matching packet, then silence.
#[tokio::test(start_paused = true)]
async fn once_subscription_fires_exactly_once() {
    let (radio, handle, _task) = spawn_engine(gateway_config());
    let fan = addr("32:022222");

    let mut hook = handle
        .subscribe_once(PacketFilter::for_code(Code::DEVICE_INFO).with_src(fan))
        .await
        .unwrap();

    let identity = hex::decode(common::VASCO_REM_10E0).unwrap();
    radio.inject_frame(&frame(Verb::I, fan, Address::ALL, Code::DEVICE_INFO, identity.clone()));
    radio.inject_frame(&frame(Verb::I, fan, Address::ALL, Code::DEVICE_INFO, identity));

    assert_eq!(next_packet(&mut hook).await.code(), Code::DEVICE_INFO);
    // channel closed after the single delivery
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(hook.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn codec_rejects_are_counted_not_fatal() {
    let (radio, handle, _task) = spawn_engine(gateway_config());
    let fan = addr("32:022222");

    let mut events = handle.subscribe(PacketFilter::any()).await.unwrap();

    radio.inject("this is not a frame");
    radio.inject(
        "2025-06-01T12:30:45.000000 072  I --- 32:022222 --:------ 32:022222 31D9 005 0000",
    );
    // comments and firmware chatter are not rejects
    radio.inject("# packet log comment");
    radio.inject("!V evofw3 0.7.1");
    // and the engine keeps decoding afterwards
    radio.inject_frame(&frame(Verb::I, fan, Address::NONE, Code::VENT_STATE, vec![0x00]));

    assert_eq!(next_packet(&mut events).await.code(), Code::VENT_STATE);

    let counters = handle.counters().await.unwrap();
    assert_eq!(counters.malformed, 1);
    assert_eq!(counters.length, 1);
    assert_eq!(counters.total(), 2);
}

/// A recorded log replays through the engine in listen-only mode; the
/// end of the log reads as the transport closing.
#[tokio::test(start_paused = true)]
async fn replay_log_drives_the_engine() {
    let log = "\
# evofw3 capture\n\
2025-06-01T12:30:45.000000 072  I --- 29:091138 --:------ 29:091138 1FC9 024 0022F17564020022F37564026610E0756402001FC9756402\n\
2025-06-01T12:30:45.250000 068  W --- 32:022222 29:091138 --:------ 1FC9 012 0031D98056CE0031DA8056CE\n\
2025-06-01T12:30:45.450000 072  I --- 29:091138 32:022222 --:------ 1FC9 001 00\n";
    let transport = ReplayTransport::from_log(log);
    let (engine, _handle) = Engine::new(transport, gateway_config().listen_only());

    let result = tokio::spawn(engine.run()).await.unwrap();
    assert!(matches!(result, Err(EngineError::Transport(_))));
}
