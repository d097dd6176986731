use std::time::Duration;

use pretty_assertions::assert_eq;
use swfdbg::value::attributes::IS_DYNAMIC;
use swfdbg::value::{BASE_ID, THIS_ID};
use swfdbg::{DebugEvent, Session, SessionConfig, SessionError};
use swfdbg_wire::mock::{MockPlayer, MockPlayerConfig};
use swfdbg_wire::{InboundKind, OutboundKind, PointerWidth, Transport, TransportConfig, WireError};

use crate::harness::{attach, eventually, player_with_options, write_object};

#[tokio::test]
async fn bind_configures_the_player_then_turns_squelch_on() {
    let harness = attach(MockPlayerConfig::default()).await;

    let received = harness.player.received();
    let options: Vec<(String, String)> = received
        .iter()
        .filter(|cmd| cmd.kind == OutboundKind::SetOption)
        .map(|cmd| {
            let mut r = cmd.reader();
            (r.read_string().unwrap(), r.read_string().unwrap())
        })
        .collect();
    let names: Vec<&str> = options.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "disable_script_stuck_dialog",
            "disable_script_stuck",
            "break_on_fault",
            "enumerate_override",
            "notify_on_failure",
            "invoke_setters",
            "swf_load_messages",
            "getter_timeout",
            "setter_timeout",
        ]
    );
    assert_eq!(options[7].1, "1500");
    assert_eq!(options[8].1, "5000");
    assert_eq!(received.last().map(|cmd| cmd.kind), Some(OutboundKind::SetSquelch));

    assert!(harness.session.is_connected());
    assert_eq!(harness.session.player_version(), 10);
}

#[tokio::test(start_paused = true)]
async fn player_without_squelch_reply_is_a_version_mismatch() {
    let (_player, stream) = MockPlayer::spawn_with_config(MockPlayerConfig {
        answer_squelch: false,
        ..MockPlayerConfig::default()
    })
    .await
    .unwrap();
    let session = Session::new(Transport::new(stream, TransportConfig::default()), SessionConfig::default());

    let err = session.bind().await.unwrap_err();
    assert!(matches!(err, SessionError::VersionMismatch), "{err:?}");
}

#[tokio::test]
async fn binding_twice_is_rejected() {
    let harness = attach(MockPlayerConfig::default()).await;
    let err = harness.session.bind().await.unwrap_err();
    assert!(matches!(err, SessionError::Wire(WireError::AlreadyBound)), "{err:?}");
}

#[tokio::test]
async fn eight_byte_pointers_carry_full_object_ids() {
    const ID: i64 = 0x1_0000_1000;
    let harness = attach(MockPlayerConfig {
        version: Some(11),
        pointer_size: 8,
        ..MockPlayerConfig::default()
    })
    .await;
    assert_eq!(harness.session.pointer_width(), PointerWidth::Eight);
    assert_eq!(harness.session.player_version(), 11);

    harness.halt().await;
    harness.respond_with(OutboundKind::GetVariable, InboundKind::GetVariable, |cmd, w| {
        let id = cmd.reader().read_ptr()?;
        write_object(w, id, "", 0, id, "flash.display::Sprite")
    });

    let value = harness.session.value(ID).await.unwrap().unwrap();
    assert_eq!(value.id(), ID);
    assert_eq!(value.type_name(), "flash.display::Sprite");

    let request = harness.player.wait_for(OutboundKind::GetVariable).await;
    assert_eq!(request.reader().read_ptr().unwrap(), ID);
    assert_eq!(harness.session.raw_value(ID).map(|v| v.id()), Some(ID));
}

#[tokio::test]
async fn object_from_a_wide_stack_is_updated_in_place() {
    const ID: i64 = 0x1000;
    let harness = attach(MockPlayerConfig {
        version: Some(11),
        pointer_size: 8,
        stack: vec![(0x0001_0001, ID, "Main/run()".to_string())],
        ..MockPlayerConfig::default()
    })
    .await;
    harness.halt().await;
    assert_eq!(harness.session.frames()[0].this_id, ID);

    harness.respond_with(OutboundKind::GetFrame, InboundKind::Frame, |cmd, w| {
        w.write_u32(cmd.reader().read_u32()?)?;
        w.write_u32(0)?;
        write_object(w, BASE_ID, "", 0, 0x99, "Frame")?;
        write_object(w, BASE_ID, "this", 0, ID, "Main")
    });
    harness.session.variable_list().await.unwrap();
    let main = harness.session.main();
    let cached = main.cached_value_count();
    assert_eq!(harness.session.raw_value(ID).unwrap().type_name(), "Main");

    harness
        .send(InboundKind::GetVariable, |w| {
            write_object(w, ID, "", IS_DYNAMIC, ID, "flash.display::Sprite")
        })
        .await;
    let session = harness.session.clone();
    eventually(move || {
        session
            .raw_value(ID)
            .is_some_and(|value| value.type_name() == "flash.display::Sprite")
    })
    .await;

    assert_eq!(main.cached_value_count(), cached);
    let updated = harness.session.raw_value(ID).unwrap();
    assert!(updated.is_attribute_set(IS_DYNAMIC));

    let this = harness.session.raw_value(THIS_ID).unwrap();
    assert_eq!(this.id(), ID);
    assert_eq!(this.type_name(), "flash.display::Sprite");

    let frame = &harness.session.frames()[0];
    let from_frame = harness.session.variable_value(frame.this().unwrap()).unwrap();
    assert_eq!(from_frame.type_name(), "flash.display::Sprite");
    let root = main.frame_root(0).unwrap();
    assert_eq!(root.find_member("this").map(|var| var.value_id()), Some(ID));
}

#[tokio::test]
async fn tag_notifications_are_acknowledged() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness.send(InboundKind::ProcessTag, |_| Ok(())).await;
    tokio::time::timeout(Duration::from_secs(5), harness.player.wait_for(OutboundKind::ProcessedTag))
        .await
        .expect("ProcessedTag was never sent");
}

#[tokio::test]
async fn trace_output_is_queued_as_an_event() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness
        .send(InboundKind::Trace, |w| w.write_string("hello"))
        .await;

    harness.session.wait_for_event().await.unwrap();
    assert_eq!(harness.session.event_count(), 1);
    assert_eq!(
        harness.session.next_event(),
        Some(DebugEvent::Trace {
            isolate: 0,
            text: "hello".to_string(),
        })
    );
    assert_eq!(harness.session.next_event(), None);
}

#[tokio::test]
async fn undecodable_message_is_dropped_without_disconnecting() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness
        .send(InboundKind::Trace, |w| w.write_bytes(b"no terminator"))
        .await;
    harness
        .send(InboundKind::Trace, |w| w.write_string("still here"))
        .await;

    harness.session.wait_for_event().await.unwrap();
    assert!(harness.session.is_connected());
    assert_eq!(
        harness.session.next_event(),
        Some(DebugEvent::Trace {
            isolate: 0,
            text: "still here".to_string(),
        })
    );
}

#[tokio::test]
async fn hang_up_releases_event_waiters() {
    let harness = attach(MockPlayerConfig::default()).await;
    let waiter = {
        let session = harness.session.clone();
        tokio::spawn(async move { session.wait_for_event().await })
    };
    harness.player.hang_up().await;

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter was not released")
        .unwrap();
    assert!(matches!(result, Err(SessionError::NotConnected)), "{result:?}");
    assert!(!harness.session.is_connected());
    assert!(matches!(harness.session.resume().await, Err(SessionError::NotConnected)));
}

#[tokio::test]
async fn exit_message_disconnects() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness.send(InboundKind::Exit, |_| Ok(())).await;
    let session = harness.session.clone();
    eventually(move || !session.is_connected()).await;
}

#[tokio::test]
async fn terminate_needs_player_support() {
    let harness = attach(player_with_options(&[("can_terminate", "true")])).await;
    assert!(harness.session.terminate().await);
    let exit = harness.player.wait_for(OutboundKind::Exit).await;
    assert_eq!(exit.reader().read_u8().unwrap(), 1);
    assert!(!harness.session.is_connected());

    let harness = attach(MockPlayerConfig::default()).await;
    assert!(!harness.session.terminate().await);
    let exit = harness.player.wait_for(OutboundKind::Exit).await;
    assert_eq!(exit.reader().read_u8().unwrap(), 0);
}

#[tokio::test]
async fn capabilities_are_asked_once() {
    let harness = attach(player_with_options(&[("can_call_functions", "true")])).await;
    assert!(harness.session.can_call_functions().await.unwrap());
    assert!(harness.session.can_call_functions().await.unwrap());
    assert!(!harness.session.supports_watchpoints().await.unwrap());
    assert_eq!(harness.count_received(OutboundKind::GetOption), 2);

    assert_eq!(
        harness.session.option("can_call_functions").await.unwrap().as_deref(),
        Some("true")
    );
}

#[tokio::test]
async fn workers_need_a_concurrent_player() {
    let harness = attach(MockPlayerConfig {
        isolates: vec![3, 2],
        ..player_with_options(&[("concurrent_player", "true")])
    })
    .await;
    assert_eq!(harness.session.refresh_workers().await.unwrap(), vec![2, 3]);
    assert_eq!(harness.session.isolate(2).label(), "Worker 2");
    assert_eq!(harness.session.main().label(), "Main");

    let harness = attach(MockPlayerConfig::default()).await;
    let err = harness.session.refresh_workers().await.unwrap_err();
    assert!(matches!(err, SessionError::NotSupported(_)), "{err:?}");
}
