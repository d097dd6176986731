use pretty_assertions::assert_eq;
use swfdbg::{Location, SessionError, WatchKind};
use swfdbg_wire::mock::MockPlayerConfig;
use swfdbg_wire::{InboundKind, OutboundKind};

use crate::harness::{attach, player_with_options};

#[tokio::test]
async fn breakpoint_in_unknown_module_is_not_kept() {
    let harness = attach(MockPlayerConfig::default()).await;
    assert_eq!(harness.session.set_breakpoint(9, 3).await.unwrap(), None);
    assert!(harness.session.breakpoints().is_empty());
}

#[tokio::test]
async fn breakpoints_can_be_cleared_and_set_again() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness.load_script(1, "Main.as", "a\nb\nc\n").await;

    let location = harness.session.set_breakpoint(1, 2).await.unwrap().unwrap();
    assert_eq!(location, Location::new(1, 2, 0));
    assert_eq!(harness.session.breakpoints(), vec![location]);

    let request = harness.player.wait_for(OutboundKind::SetBreakpoints).await;
    let mut r = request.reader();
    assert_eq!(r.read_u32().unwrap(), 1);
    assert_eq!(r.read_u32().unwrap(), (2 << 16) | 1);

    assert_eq!(harness.session.clear_breakpoint(&location).await.unwrap(), Some(location));
    assert!(harness.session.breakpoints().is_empty());
    assert_eq!(harness.session.clear_breakpoint(&location).await.unwrap(), None);

    assert_eq!(harness.session.set_breakpoint(1, 2).await.unwrap(), Some(location));
    assert_eq!(harness.session.breakpoints(), vec![location]);
    assert_eq!(harness.count_received(OutboundKind::SetBreakpoints), 2);
    assert_eq!(harness.count_received(OutboundKind::RemoveBreakpoints), 1);
}

#[tokio::test]
async fn watchpoints_need_player_support() {
    let harness = attach(MockPlayerConfig::default()).await;
    harness.halt().await;
    let err = harness
        .session
        .set_watch(0x10, "count", WatchKind::Write)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotSupported(_)), "{err:?}");
    assert_eq!(harness.count_received(OutboundKind::AddWatch2), 0);
}

#[tokio::test]
async fn watchpoints_follow_the_player_reply() {
    let harness = attach(player_with_options(&[("can_set_watchpoints", "true")])).await;
    harness.halt().await;
    harness.respond_with(OutboundKind::AddWatch2, InboundKind::Watch2, |cmd, w| {
        let mut r = cmd.reader();
        let id = r.read_ptr()?;
        let name = r.read_string()?;
        let kind = r.read_u16()?;
        let tag = r.read_u16()?;
        w.write_u16(1)?;
        w.write_u16(0)?;
        w.write_u16(0)?;
        w.write_u16(kind)?;
        w.write_u16(tag)?;
        w.write_ptr(id)?;
        w.write_string(&name)
    });
    harness.respond_with(OutboundKind::RemoveWatch2, InboundKind::Watch2, |cmd, w| {
        let mut r = cmd.reader();
        let id = r.read_ptr()?;
        let name = r.read_string()?;
        w.write_u16(1)?;
        w.write_u16(0)?;
        w.write_u16(1)?;
        w.write_u16(0)?;
        w.write_u16(0)?;
        w.write_ptr(id)?;
        w.write_string(&name)
    });

    let watch = harness
        .session
        .set_watch(0x10, "count", WatchKind::Write)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(watch.value_id, 0x10);
    assert_eq!(watch.member_name, "count");
    assert_eq!(watch.kind, WatchKind::Write);
    assert_eq!(watch.tag, 1);
    assert_eq!(harness.session.watches(), vec![watch.clone()]);

    assert_eq!(harness.session.clear_watch(&watch).await.unwrap(), Some(watch));
    assert!(harness.session.watches().is_empty());
}

#[tokio::test]
async fn exception_breakpoints_track_the_player_result() {
    let harness = attach(MockPlayerConfig::default()).await;
    for (out, reply) in [
        (OutboundKind::SetExceptionBreakpoint, InboundKind::SetExceptionBreakpoint),
        (OutboundKind::RemoveExceptionBreakpoint, InboundKind::RemoveExceptionBreakpoint),
    ] {
        harness.respond_with(out, reply, |cmd, w| {
            let class = cmd.reader().read_string()?;
            w.write_u32(1)?;
            w.write_string(&class)
        });
    }

    let main = harness.session.main();
    assert!(main.set_exception_breakpoint("RangeError").await.unwrap());
    assert_eq!(main.exception_breakpoints(), vec!["RangeError".to_string()]);
    assert!(main.clear_exception_breakpoint("RangeError").await.unwrap());
    assert!(main.exception_breakpoints().is_empty());
}
