//! Engine lifecycle and exchange behavior against a scripted terminal.

mod common;

use std::sync::Arc;

use tokio::sync::mpsc;

use common::{ack_event, closed_event, frame_event, MockFactory};
use poslink::core::framing;
use poslink::pos::IntegradoProfile;
use poslink::{ConnectionEngine, EngineConfig, EngineError, EngineState, PortEvent, ResponseEnvelope};

fn engine_with(factory: Arc<MockFactory>) -> ConnectionEngine {
    ConnectionEngine::with_factory(
        Arc::new(IntegradoProfile),
        EngineConfig::default(),
        factory,
    )
}

#[tokio::test]
async fn test_connect_polls_and_announces() {
    let factory = MockFactory::new();
    let line = factory.line("COM3");
    line.ack_everything();

    let engine = engine_with(factory);
    let (_id, mut events) = engine.subscribe_events();

    engine.connect("COM3", 115200).await.unwrap();

    assert_eq!(engine.state(), EngineState::Connected);
    assert_eq!(engine.connected_port().as_deref(), Some("COM3"));
    assert_eq!(line.sent_payloads(), vec!["0100".to_string()]);
    assert_eq!(
        events.recv().await.unwrap(),
        PortEvent::Opened {
            port: "COM3".into()
        }
    );
}

#[tokio::test]
async fn test_connect_open_failure() {
    let factory = MockFactory::new();
    factory.line("COM3").refuse_open();

    let engine = engine_with(factory);
    let (_id, mut events) = engine.subscribe_events();

    assert!(matches!(
        engine.connect("COM3", 115200).await,
        Err(EngineError::ConnectFailed(_))
    ));
    assert_eq!(engine.state(), EngineState::Disconnected);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_connect_silent_device_is_not_a_terminal() {
    let factory = MockFactory::new();
    // The port opens fine but nothing ever answers the poll.
    let _line = factory.line("COM3");

    let engine = engine_with(factory);
    let (_id, mut events) = engine.subscribe_events();

    assert!(matches!(
        engine.connect("COM3", 115200).await,
        Err(EngineError::ConnectFailed(_))
    ));
    assert_eq!(engine.state(), EngineState::Disconnected);
    assert_eq!(engine.connected_port(), None);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_connect_is_rejected() {
    let factory = MockFactory::new();
    let _line = factory.line("COM3");

    let engine = Arc::new(engine_with(factory));
    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.connect("COM3", 115200).await })
    };
    tokio::task::yield_now().await;

    assert!(matches!(
        engine.connect("COM4", 115200).await,
        Err(EngineError::AlreadyConnecting)
    ));

    // The silent first attempt eventually fails on its own.
    assert!(matches!(
        first.await.unwrap(),
        Err(EngineError::ConnectFailed(_))
    ));
}

#[tokio::test]
async fn test_reconnect_replaces_session() {
    let factory = MockFactory::new();
    factory.line("COM3").ack_everything();
    factory.line("COM4").ack_everything();

    let engine = engine_with(factory);
    let (_id, mut events) = engine.subscribe_events();

    engine.connect("COM3", 115200).await.unwrap();
    engine.connect("COM4", 115200).await.unwrap();

    assert_eq!(engine.connected_port().as_deref(), Some("COM4"));
    assert_eq!(
        events.recv().await.unwrap(),
        PortEvent::Opened {
            port: "COM3".into()
        }
    );
    assert_eq!(events.recv().await.unwrap(), PortEvent::Closed);
    assert_eq!(
        events.recv().await.unwrap(),
        PortEvent::Opened {
            port: "COM4".into()
        }
    );
}

#[tokio::test]
async fn test_send_roundtrip_with_courtesy_ack() {
    let factory = MockFactory::new();
    let line = factory.line("COM3");
    line.ack_everything();

    let engine = engine_with(factory);
    engine.connect("COM3", 115200).await.unwrap();

    line.ack_then_reply(vec!["0710|0|5|12500"]);
    let envelope = engine.send("0700||").await.unwrap();

    assert_eq!(envelope.function_code, "0710");
    assert_eq!(envelope.fields().int(2), 5);
    assert_eq!(envelope.fields().int(3), 12500);

    // The data frame got a courtesy ACK back.
    let acks = line
        .sent_raw()
        .iter()
        .filter(|write| write.as_slice() == [framing::ACK])
        .count();
    assert_eq!(acks, 1);
}

#[tokio::test]
async fn test_fire_and_forget_resolves_on_ack() {
    let factory = MockFactory::new();
    let line = factory.line("COM3");
    line.ack_everything();

    let engine = engine_with(factory);
    engine.connect("COM3", 115200).await.unwrap();

    engine.send_no_response("0300").await.unwrap();
    assert_eq!(
        line.sent_payloads(),
        vec!["0100".to_string(), "0300".to_string()]
    );
}

#[tokio::test]
async fn test_second_request_rejected_while_first_pending() {
    let factory = MockFactory::new();
    let line = factory.line("COM3");
    line.ack_everything();

    let engine = Arc::new(engine_with(factory));
    engine.connect("COM3", 115200).await.unwrap();

    // First request gets its ACK but no response yet.
    let pending = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.send("0700||").await })
    };
    tokio::task::yield_now().await;

    assert!(matches!(
        engine.send("0250|").await,
        Err(EngineError::RequestInFlight)
    ));

    // Resolving the first request frees the slot again.
    line.emit(frame_event("0710|0|0|0"));
    assert!(pending.await.unwrap().is_ok());

    line.ack_then_reply(vec!["0260|0|0|0"]);
    assert!(engine.send("0250|").await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_ack_timeout() {
    let factory = MockFactory::new();
    let line = factory.line("COM3");
    line.ack_everything();

    let engine = engine_with(factory);
    engine.connect("COM3", 115200).await.unwrap();

    line.on_write(|_| Vec::new());
    assert!(matches!(
        engine.send("0700||").await,
        Err(EngineError::AckTimeout(_))
    ));

    // The failed exchange released the in-flight slot.
    line.ack_then_reply(vec!["0710|0|0|0"]);
    assert!(engine.send("0700||").await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_response_timeout_after_ack() {
    let factory = MockFactory::new();
    let line = factory.line("COM3");
    line.ack_everything();

    let engine = engine_with(factory);
    engine.connect("COM3", 115200).await.unwrap();

    // The terminal acknowledges, then goes quiet: the short ACK timer must
    // not fire, only the long response timer.
    assert!(matches!(
        engine.send("0700||").await,
        Err(EngineError::ResponseTimeout(_))
    ));
}

#[tokio::test]
async fn test_intermediate_frames_do_not_resolve_the_request() {
    let factory = MockFactory::new();
    let line = factory.line("COM3");
    line.ack_everything();

    let engine = engine_with(factory);
    engine.connect("COM3", 115200).await.unwrap();

    line.on_write(|data| {
        if data == [framing::ACK] {
            return Vec::new();
        }
        vec![
            ack_event(),
            frame_event("0900|80|"),
            frame_event("0900|82|"),
            frame_event("0210|0|597029414300|ABC1234C|000001|AUTH1|1000"),
        ]
    });

    let (tx, mut status) = mpsc::unbounded_channel::<ResponseEnvelope>();
    let envelope = engine.send_with_status("0200|000001000|000001|||1", Some(&tx)).await.unwrap();

    assert_eq!(envelope.function_code, "0210");
    assert_eq!(status.try_recv().unwrap().fields().int(1), 80);
    assert_eq!(status.try_recv().unwrap().fields().int(1), 82);
    assert!(status.try_recv().is_err());

    // Every data frame was acknowledged, intermediates included.
    let acks = line
        .sent_raw()
        .iter()
        .filter(|write| write.as_slice() == [framing::ACK])
        .count();
    assert_eq!(acks, 3);
}

#[tokio::test]
async fn test_unsolicited_close_fails_pending_request() {
    let factory = MockFactory::new();
    let line = factory.line("COM3");
    line.ack_everything();

    let engine = engine_with(factory);
    let (_id, mut events) = engine.subscribe_events();
    engine.connect("COM3", 115200).await.unwrap();

    // The line drops right after the ACK, mid-request.
    line.on_write(|data| {
        if data == [framing::ACK] {
            return Vec::new();
        }
        vec![ack_event(), closed_event()]
    });

    assert!(matches!(
        engine.send("0700||").await,
        Err(EngineError::Disconnected)
    ));

    assert_eq!(
        events.recv().await.unwrap(),
        PortEvent::Opened {
            port: "COM3".into()
        }
    );
    assert_eq!(events.recv().await.unwrap(), PortEvent::Closed);
    assert_eq!(engine.state(), EngineState::Disconnected);
    assert_eq!(engine.connected_port(), None);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let factory = MockFactory::new();
    factory.line("COM3").ack_everything();

    let engine = engine_with(factory);
    let (_id, mut events) = engine.subscribe_events();
    engine.connect("COM3", 115200).await.unwrap();

    assert!(engine.disconnect().await.unwrap());
    assert!(engine.disconnect().await.unwrap());
    assert_eq!(engine.state(), EngineState::Disconnected);

    assert_eq!(
        events.recv().await.unwrap(),
        PortEvent::Opened {
            port: "COM3".into()
        }
    );
    assert_eq!(events.recv().await.unwrap(), PortEvent::Closed);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_autoconnect_first_responsive_port_wins() {
    let factory = MockFactory::new();
    let bad = factory.add_port("COM1");
    bad.refuse_open();
    let good = factory.add_port("COM2");
    good.ack_everything();
    let untouched = factory.add_port("COM3");

    let engine = engine_with(factory);
    let found = engine.autoconnect(115200).await.unwrap().unwrap();

    assert_eq!(found.name, "COM2");
    assert_eq!(engine.connected_port().as_deref(), Some("COM2"));
    assert_eq!(bad.open_attempts(), 1);
    assert_eq!(untouched.open_attempts(), 0);
}

#[tokio::test]
async fn test_autoconnect_without_ports() {
    let engine = engine_with(MockFactory::new());
    assert!(engine.autoconnect(115200).await.unwrap().is_none());
    assert_eq!(engine.state(), EngineState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_autoconnect_exhausts_silent_ports() {
    let factory = MockFactory::new();
    factory.add_port("COM1");
    factory.add_port("COM2");

    let engine = engine_with(factory);
    assert!(engine.autoconnect(115200).await.unwrap().is_none());
    assert_eq!(engine.state(), EngineState::Disconnected);
}
