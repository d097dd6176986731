//! Background fetch of SWF and SWD blobs for newly announced AVM1 units.
//!
//! The receive loop must never block on a request of its own, so units are
//! handed to this task instead. A unit whose blobs do not arrive is retried
//! after a pause and eventually given up on, so one stuck unit cannot keep
//! the queue busy forever.

use std::collections::HashMap;

use swfdbg_wire::IsolateId;
use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::session::Session;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct PopulateRequest {
    pub(crate) isolate: IsolateId,
    pub(crate) index: u32,
}

enum Outcome {
    Done,
    Retry,
    Stop,
}

pub(crate) async fn run(session: Session, mut rx: mpsc::UnboundedReceiver<PopulateRequest>) {
    let shutdown = session.transport().shutdown_token();
    let mut attempts: HashMap<PopulateRequest, u32> = HashMap::new();

    loop {
        let request = tokio::select! {
            _ = shutdown.cancelled() => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        match populate(&session, request).await {
            Outcome::Done => {
                attempts.remove(&request);
            }
            Outcome::Stop => break,
            Outcome::Retry => {
                let tries = attempts.entry(request).or_insert(0);
                *tries += 1;
                if *tries >= session.config().populate_attempts {
                    tracing::warn!(
                        target: "swfdbg.populate",
                        isolate = request.isolate,
                        index = request.index,
                        attempts = *tries,
                        "giving up on program unit"
                    );
                    attempts.remove(&request);
                    mark_populated(&session, request);
                    continue;
                }
                let retry = session.clone();
                let delay = session.config().populate_retry();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    retry.shared().enqueue_populate(request);
                });
            }
        }
    }
    tracing::debug!(target: "swfdbg.populate", "populate queue stopped");
}

async fn populate(session: &Session, request: PopulateRequest) -> Outcome {
    let pending = {
        let state = session.shared().state.lock();
        state
            .isolate(request.isolate)
            .and_then(|isolate| isolate.units.get(&request.index))
            .is_some_and(|unit| !unit.is_unloaded() && !unit.is_populated())
    };
    if !pending {
        return Outcome::Done;
    }
    let Ok(index) = u16::try_from(request.index) else {
        mark_populated(session, request);
        return Outcome::Done;
    };

    let isolate = session.isolate(request.isolate);
    let fetched = async {
        let swf = isolate.request_swf(index).await?;
        let swd = isolate.request_swd(index).await?;
        Ok::<_, SessionError>((swf, swd))
    }
    .await;

    match fetched {
        Ok((swf, swd)) => {
            tracing::debug!(
                target: "swfdbg.populate",
                isolate = request.isolate,
                index = request.index,
                swf_len = swf.len(),
                swd_len = swd.len(),
                "program unit populated"
            );
            let mut state = session.shared().state.lock();
            let unit = state.isolate_mut(request.isolate).unit_mut(request.index);
            unit.set_swf(swf);
            unit.set_swd(swd);
            unit.set_populated();
            Outcome::Done
        }
        Err(SessionError::NoResponse { .. }) => Outcome::Retry,
        Err(SessionError::NotConnected | SessionError::BrokenPipe) => Outcome::Stop,
        Err(err) => {
            tracing::warn!(
                target: "swfdbg.populate",
                isolate = request.isolate,
                index = request.index,
                error = %err,
                "could not populate program unit"
            );
            mark_populated(session, request);
            Outcome::Done
        }
    }
}

fn mark_populated(session: &Session, request: PopulateRequest) {
    let mut state = session.shared().state.lock();
    if let Some(unit) = state
        .isolates
        .get_mut(&request.isolate)
        .and_then(|isolate| isolate.units.get_mut(&request.index))
    {
        unit.set_populated();
    }
}
