use std::time::Duration;

use pretty_assertions::assert_eq;
use swfdbg::{SessionConfig, SessionError};
use swfdbg_wire::mock::MockPlayerConfig;
use swfdbg_wire::{InboundKind, OutboundKind};
use tokio::time::Instant;

use crate::harness::{attach, attach_with, eventually, worker_break};

#[tokio::test]
async fn suspend_records_the_stack() {
    let harness = attach(MockPlayerConfig::default()).await;
    assert!(!harness.session.is_suspended().unwrap());

    harness.halt().await;
    assert!(harness.session.is_suspended().unwrap());
    let frames = harness.session.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].signature, "Main/run()");
    assert_eq!(frames[0].location.module, 0x0001);
    assert_eq!(frames[0].location.line, 0x0001);
}

#[tokio::test]
async fn resume_forgets_the_stack() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness.halt().await;
    harness.session.resume().await.unwrap();

    assert!(!harness.session.is_suspended().unwrap());
    assert!(harness.session.frames().is_empty());
}

#[tokio::test]
async fn run_control_checks_the_halt_state() {
    let harness = attach(MockPlayerConfig::default()).await;
    assert!(matches!(harness.session.resume().await, Err(SessionError::NotSuspended)));
    assert!(matches!(harness.session.step_into().await, Err(SessionError::NotSuspended)));

    harness.halt().await;
    assert!(matches!(harness.session.suspend().await, Err(SessionError::AlreadySuspended)));
    harness.session.step_over().await.unwrap();
    assert!(!harness.session.is_suspended().unwrap());
}

#[tokio::test(start_paused = true)]
async fn unanswered_resume_times_out() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness.halt().await;
    harness.player.silence(OutboundKind::Continue);

    let started = Instant::now();
    let err = harness.session.resume().await.unwrap_err();
    assert!(matches!(err, SessionError::NoResponse { .. }), "{err:?}");
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(750) && waited < Duration::from_millis(800), "{waited:?}");
    assert!(harness.session.is_suspended().unwrap());
}

#[tokio::test(start_paused = true)]
async fn unrelated_traffic_extends_the_wait() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness.halt().await;
    harness.player.silence(OutboundKind::Continue);

    let trace = harness.frame(InboundKind::Trace, |w| w.write_string("still busy"));
    let player = harness.player.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        player.send(trace).await.unwrap();
    });

    let started = Instant::now();
    let err = harness.session.resume().await.unwrap_err();
    assert!(matches!(err, SessionError::NoResponse { .. }), "{err:?}");
    assert!(started.elapsed() >= Duration::from_millis(1250), "{:?}", started.elapsed());
}

#[tokio::test(start_paused = true)]
async fn worker_traffic_does_not_extend_the_wait() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness.halt().await;
    harness.player.silence(OutboundKind::Continue);

    let trace = harness
        .frame(InboundKind::Trace, |w| w.write_string("worker busy"))
        .for_isolate(2);
    let player = harness.player.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        player.send(trace).await.unwrap();
    });

    let started = Instant::now();
    let err = harness.session.resume().await.unwrap_err();
    assert!(matches!(err, SessionError::NoResponse { .. }), "{err:?}");
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(750) && waited < Duration::from_millis(800), "{waited:?}");
}

#[tokio::test(start_paused = true)]
async fn suspend_gives_up_after_the_suspend_wait() {
    let config = SessionConfig {
        suspend_wait_ms: 200,
        ..SessionConfig::default()
    };
    let harness = attach_with(MockPlayerConfig::default(), config).await;
    harness.player.silence(OutboundKind::StopDebug);

    let err = harness.session.suspend().await.unwrap_err();
    assert!(matches!(err, SessionError::NoResponse { .. }), "{err:?}");
    assert!(harness.count_received(OutboundKind::StopDebug) >= 3);
    assert!(!harness.session.is_suspended().unwrap());
}

#[tokio::test]
async fn workers_halt_and_step_independently() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness.player.send(worker_break(&harness, 2)).await.unwrap();

    let worker = harness.session.isolate(2);
    {
        let worker = worker.clone();
        eventually(move || worker.is_suspended().unwrap_or(false)).await;
    }
    assert!(!harness.session.is_suspended().unwrap());

    worker.step_over().await.unwrap();
    assert!(!worker.is_suspended().unwrap());

    let step = harness.player.wait_for(OutboundKind::StepOver).await;
    assert_eq!(step.isolate, 2);
}
