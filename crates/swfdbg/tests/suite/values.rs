use std::time::Duration;

use pretty_assertions::assert_eq;
use swfdbg::value::attributes::IS_EXCEPTION;
use swfdbg::value::BASE_ID;
use swfdbg::{DebugEvent, Evaluation, Payload, SessionError, Value, VariableType};
use swfdbg_wire::inbound::FaultKind;
use swfdbg_wire::mock::MockPlayerConfig;
use swfdbg_wire::{InboundKind, OutboundKind};

use crate::harness::{
    attach, eventually, player_with_options, write_boolean, write_number, write_object, write_text,
    Harness,
};

fn sprite(id: i64) -> Value {
    Value::new(
        VariableType::Object,
        "flash.display::Sprite",
        "Sprite",
        0,
        Payload::Object(id),
        0,
    )
}

fn answer_binary_ops(harness: &Harness, build: fn(&mut swfdbg_wire::WireWriter) -> swfdbg_wire::Result<()>) {
    harness.respond_with(OutboundKind::BinaryOp, InboundKind::BinaryOp, move |cmd, w| {
        w.write_u32(cmd.reader().read_u32()?)?;
        build(w)
    });
}

async fn callable() -> Harness {
    let harness = attach(player_with_options(&[("can_call_functions", "true")])).await;
    harness.halt().await;
    harness
}

#[tokio::test]
async fn variable_list_reads_the_top_frame() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness.halt().await;
    harness.respond_with(OutboundKind::GetFrame, InboundKind::Frame, |cmd, w| {
        let depth = cmd.reader().read_u32()?;
        w.write_u32(depth)?;
        w.write_u32(0)?;
        write_object(w, BASE_ID, "", 0, 0x99, "Frame")?;
        write_object(w, BASE_ID, "this", 0, 0x10, "Main")?;
        write_number(w, BASE_ID, "count", 0, 3.0)
    });

    let vars = harness.session.variable_list().await.unwrap();
    let names: Vec<&str> = vars.iter().map(|var| var.name()).collect();
    assert_eq!(names, vec!["count", "this"]);

    let count = harness.session.variable_value(&vars[0]).unwrap();
    assert_eq!(count.payload(), &Payload::Number(3.0));
    assert_eq!(harness.session.raw_value(-1).map(|v| v.id()), Some(0x10));

    let again = harness.session.variable_list().await.unwrap();
    assert_eq!(again.len(), 2);
    assert_eq!(harness.count_received(OutboundKind::GetFrame), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_getter_yields_an_exception_value() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness.halt().await;

    let value = harness.session.member_value(0x10, "slow").await.unwrap();
    assert_eq!(value.kind(), VariableType::String);
    assert!(value.is_attribute_set(IS_EXCEPTION));
    assert_eq!(harness.count_received(OutboundKind::GetVariableWhichInvokesGetter), 1);
}

#[tokio::test]
async fn abandoned_getter_leaves_fault_reporting_intact() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness.halt().await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        harness.session.member_value(0x10, "slow"),
    )
    .await;
    assert!(abandoned.is_err());
    harness.player.wait_for(OutboundKind::GetVariable).await;

    harness
        .send(InboundKind::ErrorConsole, |w| w.write_string("boom"))
        .await;
    let session = harness.session.clone();
    eventually(move || session.event_count() == 1).await;
    let event = harness.session.next_event();
    assert!(
        matches!(&event, Some(DebugEvent::Fault(fault)) if fault.message == "boom"),
        "{event:?}"
    );

    harness
        .send(InboundKind::GetVariable, |w| {
            write_object(w, 0x10, "", 0, 0x10, "Main")?;
            write_number(w, 0x10, "count", 0, 3.0)
        })
        .await;
    let session = harness.session.clone();
    eventually(move || {
        session
            .raw_value(0x10)
            .is_some_and(|value| value.find_member("count").is_some())
    })
    .await;
}

#[tokio::test]
async fn fault_stashed_by_an_abandoned_call_is_queued() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness.halt().await;

    let pending = harness.session.member_value(0x10, "slow");
    tokio::pin!(pending);
    tokio::select! {
        result = &mut pending => panic!("getter finished early: {result:?}"),
        _ = harness.player.wait_for(OutboundKind::GetVariable) => {}
    }

    harness
        .send(InboundKind::ErrorConsole, |w| w.write_string("during"))
        .await;
    harness
        .send(InboundKind::Trace, |w| w.write_string("after"))
        .await;
    // Both arrive in order; once the trace is queued the fault was stashed.
    let session = harness.session.clone();
    eventually(move || session.event_count() == 1).await;
    assert!(matches!(harness.session.next_event(), Some(DebugEvent::Trace { .. })));

    drop(pending);
    let event = harness.session.next_event();
    assert!(
        matches!(&event, Some(DebugEvent::Fault(fault)) if fault.message == "during"),
        "{event:?}"
    );
}

#[tokio::test]
async fn obj_pseudo_function_reads_the_cache() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness.halt().await;
    harness.respond_with(OutboundKind::GetVariable, InboundKind::GetVariable, |cmd, w| {
        let id = cmd.reader().read_ptr()?;
        write_object(w, id, "", 0, id, "Main")
    });
    harness.session.value(0x42).await.unwrap().unwrap();

    let result = harness
        .session
        .call_function(
            &Value::undefined(0),
            "$obj",
            &[Value::primitive(Payload::Number(66.0), 0)],
        )
        .await
        .unwrap();
    let Evaluation::Ok(value) = result else {
        panic!("unexpected fault: {result:?}");
    };
    assert_eq!(value.id(), 0x42);
    assert_eq!(harness.count_received(OutboundKind::CallFunction), 0);
}

#[tokio::test]
async fn calls_need_player_support() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness.halt().await;
    let err = harness
        .session
        .call_function(&sprite(0x10), "toString", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotSupported(_)), "{err:?}");
}

#[tokio::test]
async fn call_function_returns_the_player_result() {
    let harness = callable().await;
    harness.respond_with(OutboundKind::CallFunction, InboundKind::CallFunction, |_, w| {
        write_text(w, 0, "", 0, "hi")
    });

    let result = harness
        .session
        .call_function(&sprite(0x10), "toString", &[])
        .await
        .unwrap();
    let Evaluation::Ok(value) = result else {
        panic!("unexpected fault: {result:?}");
    };
    assert_eq!(value.value_as_string(), "hi");

    let request = harness.player.wait_for(OutboundKind::CallFunction).await;
    let mut r = request.reader();
    assert_eq!(r.read_u32().unwrap(), 0);
}

#[tokio::test]
async fn in_operator_is_evaluated_by_the_player() {
    let harness = callable().await;
    answer_binary_ops(&harness, |w| write_boolean(w, 0, "", true));

    let result = harness
        .session
        .eval_in(
            &Value::primitive(Payload::String("x".into()), 0),
            &sprite(0x10),
        )
        .await
        .unwrap();
    assert_eq!(result, Evaluation::Ok(true));
}

#[tokio::test]
async fn type_checks_are_cached() {
    let harness = callable().await;
    answer_binary_ops(&harness, |w| write_boolean(w, 0, "", true));
    let class = Value::new(VariableType::Object, "Class", "Class", 0, Payload::Object(0x20), 0);

    for _ in 0..2 {
        let result = harness.session.eval_is(&sprite(0x10), &class).await.unwrap();
        assert_eq!(result, Evaluation::Ok(true));
    }
    assert_eq!(harness.count_received(OutboundKind::BinaryOp), 1);
}

#[tokio::test]
async fn thrown_operator_result_is_a_fault() {
    let harness = callable().await;
    answer_binary_ops(&harness, |w| write_text(w, 0, "", IS_EXCEPTION, "boom"));

    let result = harness
        .session
        .eval_as(&sprite(0x10), &sprite(0x20))
        .await
        .unwrap();
    let Evaluation::Fault(fault) = result else {
        panic!("expected a fault: {result:?}");
    };
    assert_eq!(fault.kind, FaultKind::Exception);
    assert_eq!(fault.message, "boom");
}

#[tokio::test]
async fn assignment_is_bracketed_by_squelch() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness.halt().await;
    harness.respond_with(OutboundKind::SetVariable, InboundKind::SetVariable2, |_, _| Ok(()));

    let fault = harness
        .session
        .set_scalar_member(0x10, "count", VariableType::Number, "4")
        .await
        .unwrap();
    assert_eq!(fault, None);

    let kinds: Vec<OutboundKind> = harness
        .player
        .received_kinds()
        .into_iter()
        .filter(|kind| matches!(kind, OutboundKind::SetSquelch | OutboundKind::SetVariable))
        .collect();
    assert_eq!(
        kinds[kinds.len() - 3..],
        [OutboundKind::SetSquelch, OutboundKind::SetVariable, OutboundKind::SetSquelch]
    );

    let request = harness.player.wait_for(OutboundKind::SetVariable).await;
    let mut r = request.reader();
    assert_eq!(r.read_ptr().unwrap(), 0x10);
    assert_eq!(r.read_string().unwrap(), "count");
    assert_eq!(r.read_string().unwrap(), "number");
    assert_eq!(r.read_string().unwrap(), "4");
}
