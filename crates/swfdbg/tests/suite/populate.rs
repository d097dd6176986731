use pretty_assertions::assert_eq;
use swfdbg::{DebugEvent, SessionConfig};
use swfdbg_wire::mock::MockPlayerConfig;
use swfdbg_wire::{InboundKind, OutboundKind, WireWriter};

use crate::harness::{attach, attach_with, eventually, Harness};

fn write_swf_info(w: &mut WireWriter, index: u32, vm_version: u8) -> swfdbg_wire::Result<()> {
    w.write_u16(1)?;
    w.write_u32(index)?;
    w.write_ptr(0x5000)?;
    w.write_bool(true)?;
    w.write_u8(vm_version)?;
    w.write_u16(0)?;
    w.write_u32(100)?;
    w.write_u32(40)?;
    w.write_u32(1)?;
    w.write_u32(0)?;
    w.write_u32(0)?;
    w.write_u32(7935)?;
    w.write_string("/tmp/movie.swf")?;
    w.write_string("file:///tmp/movie.swf")?;
    w.write_string("localhost")?;
    w.write_u32(0)
}

async fn wait_until_populated(harness: &Harness, index: u32) {
    let main = harness.session.main();
    eventually(move || main.unit(index).is_some_and(|unit| unit.is_populated())).await;
}

#[tokio::test]
async fn avm1_units_are_fetched_in_the_background() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness.respond_with(OutboundKind::GetSwf, InboundKind::GetSwf, |_, w| {
        w.write_bytes(b"FWS\x06")
    });
    harness.respond_with(OutboundKind::GetSwd, InboundKind::GetSwd, |_, w| {
        w.write_bytes(b"FWD\x06")
    });

    harness.send(InboundKind::SwfInfo, |w| write_swf_info(w, 0, 0)).await;
    wait_until_populated(&harness, 0).await;

    let unit = harness.session.main().unit(0).unwrap();
    assert_eq!(unit.swf(), Some(&b"FWS\x06"[..]));
    assert_eq!(unit.swd(), Some(&b"FWD\x06"[..]));

    let loaded = harness.session.next_event();
    assert!(
        matches!(loaded, Some(DebugEvent::SwfLoaded { index: 0, swf_size: 100, .. })),
        "{loaded:?}"
    );
}

#[tokio::test]
async fn avm_plus_units_need_no_fetch() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness.send(InboundKind::SwfInfo, |w| write_swf_info(w, 1, 3)).await;
    wait_until_populated(&harness, 1).await;

    assert!(harness.session.main().unit(1).unwrap().is_avm_plus());
    assert_eq!(harness.count_received(OutboundKind::GetSwf), 0);
}

#[tokio::test(start_paused = true)]
async fn unanswered_units_are_retried_then_abandoned() {
    let config = SessionConfig {
        populate_attempts: 2,
        populate_retry_ms: 100,
        swf_swd_load_timeout_ms: 200,
        ..SessionConfig::default()
    };
    let harness = attach_with(MockPlayerConfig::default(), config).await;

    harness.send(InboundKind::SwfInfo, |w| write_swf_info(w, 0, 0)).await;
    wait_until_populated(&harness, 0).await;

    assert_eq!(harness.count_received(OutboundKind::GetSwf), 2);
    assert_eq!(harness.count_received(OutboundKind::GetSwd), 0);
    assert_eq!(harness.session.main().unit(0).unwrap().swf(), None);
}
