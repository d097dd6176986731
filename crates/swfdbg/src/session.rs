//! Request/response coordination on top of a bound [`Transport`].
//!
//! The transport's receive loop feeds every inbound message to a
//! [`SessionListener`], which decodes it and applies it to the shared
//! [`SessionState`]. Callers send a command and then wait until the message
//! counter shows the expected reply for their isolate, the connection drops,
//! or the reply window closes. Any inbound traffic while waiting extends the
//! window, since a busy player is still a live one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use swfdbg_wire::inbound::Inbound;
use swfdbg_wire::outbound::Command;
use swfdbg_wire::{
    InboundKind, IsolateId, ListenerIndex, Message, MessageCounter, MessageListener, PointerWidth,
    Transport, WeakTransport, WireError, PRIMORDIAL_ISOLATE,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::error::{Evaluation, Result, SessionError};
use crate::events::{DebugEvent, EventQueue, FaultEvent};
use crate::isolate::IsolateSession;
use crate::model::{Location, ProgramUnit, SourceModule, StackFrame, SuspendInfo, Watch, WatchKind};
use crate::populate::{self, PopulateRequest};
use crate::state::SessionState;
use crate::value::{Value, ValueId, Variable, VariableType};

/// Options sent on bind, in order, before squelch is switched on.
const BIND_OPTIONS: &[(&str, &str)] = &[
    ("disable_script_stuck_dialog", "on"),
    ("disable_script_stuck", "on"),
    ("break_on_fault", "on"),
    ("enumerate_override", "on"),
    ("notify_on_failure", "on"),
    ("invoke_setters", "on"),
    ("swf_load_messages", "on"),
];

pub const CAN_SET_WATCHPOINTS: &str = "can_set_watchpoints";
pub const CAN_BREAK_ON_ALL_EXCEPTIONS: &str = "can_break_on_all_exceptions";
pub const CAN_CALL_FUNCTIONS: &str = "can_call_functions";
pub const CAN_TERMINATE: &str = "can_terminate";
pub const CONCURRENT_PLAYER: &str = "concurrent_player";

/// State shared between the session handles and the receive loop.
pub(crate) struct Shared {
    pub(crate) state: Mutex<SessionState>,
    pub(crate) events: EventQueue,
    connected: AtomicBool,
    /// Inbound messages seen per isolate, tag notifications excluded. A
    /// pending request restarts its window when its isolate's count moves.
    traffic: Mutex<HashMap<IsolateId, u64>>,
    /// `is`/`instanceof` results keyed by isolate and type names. Any change
    /// to the loaded code invalidates it.
    pub(crate) type_checks: Mutex<HashMap<(IsolateId, String), bool>>,
    populate: mpsc::UnboundedSender<PopulateRequest>,
}

impl Shared {
    fn new(populate: mpsc::UnboundedSender<PopulateRequest>) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            events: EventQueue::default(),
            connected: AtomicBool::new(false),
            traffic: Mutex::new(HashMap::new()),
            type_checks: Mutex::new(HashMap::new()),
            populate,
        }
    }

    fn traffic(&self, isolate: IsolateId) -> u64 {
        self.traffic.lock().get(&isolate).copied().unwrap_or(0)
    }

    fn note_traffic(&self, isolate: IsolateId) {
        *self.traffic.lock().entry(isolate).or_default() += 1;
    }

    pub(crate) fn enqueue_populate(&self, request: PopulateRequest) {
        // The receiver only goes away once the session is shutting down.
        let _ = self.populate.send(request);
    }
}

/// Applies inbound messages to the shared state. Registered ahead of the
/// message counter so waiters always observe the updated state.
struct SessionListener {
    shared: Arc<Shared>,
    transport: WeakTransport,
}

impl SessionListener {
    fn acknowledge_tag(&self, isolate: IsolateId) {
        let Some(transport) = self.transport.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(err) = transport.send_command(isolate, &Command::ProcessedTag).await {
                tracing::debug!(target: "swfdbg.session", error = %err, "could not acknowledge tag");
            }
        });
    }
}

impl MessageListener for SessionListener {
    fn message_arrived(&self, msg: &Message) {
        let Some(kind) = msg.inbound_kind() else {
            return;
        };
        let isolate = msg.isolate();
        let inbound = match Inbound::decode(msg) {
            Ok(inbound) => inbound,
            Err(err) => {
                tracing::warn!(
                    target: "swfdbg.session",
                    %kind,
                    isolate,
                    error = %err,
                    "dropping undecodable message"
                );
                self.shared.note_traffic(isolate);
                return;
            }
        };

        let new_units: Vec<u32> = match &inbound {
            Inbound::SwfInfo(entries) => entries
                .iter()
                .filter(|entry| entry.details.as_ref().is_some_and(|d| d.vm_version == 0))
                .map(|entry| entry.index)
                .collect(),
            _ => Vec::new(),
        };

        let events = self.shared.state.lock().apply(isolate, inbound);
        self.shared.events.extend(events);

        for index in new_units {
            self.shared
                .enqueue_populate(PopulateRequest { isolate, index });
        }

        match kind {
            InboundKind::Exit => {
                self.shared.connected.store(false, Ordering::SeqCst);
                self.shared.events.wake();
            }
            InboundKind::ProcessTag => self.acknowledge_tag(isolate),
            InboundKind::SwfInfo | InboundKind::Script | InboundKind::RemoveScript => {
                self.shared.type_checks.lock().clear();
            }
            _ => {}
        }
        if kind != InboundKind::ProcessTag {
            self.shared.note_traffic(isolate);
        }
    }

    fn disconnected(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        for isolate in self.shared.state.lock().isolates.values_mut() {
            isolate.halted = false;
        }
        self.shared.events.wake();
    }
}

struct Inner {
    transport: Transport,
    counter: Arc<MessageCounter>,
    shared: Arc<Shared>,
    config: SessionConfig,
    capabilities: Mutex<HashMap<&'static str, bool>>,
    populate_rx: Mutex<Option<mpsc::UnboundedReceiver<PopulateRequest>>>,
    watch_tag: AtomicU16,
    binary_op_id: AtomicU32,
}

/// A debugging session with one player connection.
///
/// Cheap to clone; every clone talks to the same connection. Per-isolate
/// operations on `Session` act on the primordial isolate; use
/// [`Session::isolate`] for workers.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connected", &self.is_connected())
            .field("player_version", &self.player_version())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(transport: Transport, config: SessionConfig) -> Self {
        let (populate_tx, populate_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(populate_tx));
        let counter = Arc::new(MessageCounter::new());

        transport.add_listener(
            ListenerIndex::Session,
            Arc::new(SessionListener {
                shared: shared.clone(),
                transport: transport.downgrade(),
            }),
        );
        transport.add_listener(ListenerIndex::Counter, counter.clone());

        Self {
            inner: Arc::new(Inner {
                transport,
                counter,
                shared,
                config,
                capabilities: Mutex::new(HashMap::new()),
                populate_rx: Mutex::new(Some(populate_rx)),
                watch_tag: AtomicU16::new(1),
                binary_op_id: AtomicU32::new(1),
            }),
        }
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub fn message_counter(&self) -> &MessageCounter {
        &self.inner.counter
    }

    /// Starts receiving, configures the player and checks that it answers.
    ///
    /// A player that never acknowledges squelch does not speak this
    /// protocol revision; the session stays bound but `VersionMismatch` is
    /// returned.
    pub async fn bind(&self) -> Result<()> {
        if self.shared().connected.swap(true, Ordering::SeqCst) {
            return Err(SessionError::Wire(WireError::AlreadyBound));
        }
        if let Err(err) = self.inner.transport.bind() {
            self.shared().connected.store(false, Ordering::SeqCst);
            return Err(err.into());
        }

        for (name, value) in BIND_OPTIONS {
            self.set_option(name, value).await?;
        }
        let getter_timeout = self.inner.config.getvar_response_timeout_ms.to_string();
        self.set_option("getter_timeout", &getter_timeout).await?;
        let setter_timeout = self.inner.config.setvar_response_timeout_ms.to_string();
        self.set_option("setter_timeout", &setter_timeout).await?;

        let responded = self.send_squelch(PRIMORDIAL_ISOLATE, true).await?;

        if let Some(rx) = self.inner.populate_rx.lock().take() {
            tokio::spawn(populate::run(self.clone(), rx));
        }

        if !responded {
            tracing::debug!(target: "swfdbg.session", "player did not acknowledge squelch");
            return Err(SessionError::VersionMismatch);
        }
        tracing::debug!(
            target: "swfdbg.session",
            version = self.player_version(),
            pointer_width = self.pointer_width().size(),
            "session bound"
        );
        Ok(())
    }

    /// Tells the player to detach and closes the connection.
    pub async fn unbind(&self) {
        self.detach(false).await;
    }

    /// Like [`Session::unbind`], but asks players that support it to exit.
    /// Returns whether the player was told to terminate.
    pub async fn terminate(&self) -> bool {
        let terminate = self.is_connected() && self.can_terminate().await.unwrap_or(false);
        self.detach(terminate).await;
        terminate
    }

    async fn detach(&self, terminate: bool) {
        if let Err(err) = self
            .send(PRIMORDIAL_ISOLATE, &Command::Exit { terminate })
            .await
        {
            tracing::debug!(target: "swfdbg.session", error = %err, "exit not delivered");
        }
        self.inner.transport.close().await;
        self.shared().connected.store(false, Ordering::SeqCst);
        for isolate in self.shared().state.lock().isolates.values_mut() {
            isolate.halted = false;
        }
        self.shared().events.wake();
    }

    pub fn is_connected(&self) -> bool {
        self.shared().connected.load(Ordering::SeqCst) && self.inner.transport.is_connected()
    }

    pub fn disconnect_cause(&self) -> Option<Arc<WireError>> {
        self.inner.transport.disconnect_cause()
    }

    pub fn player_version(&self) -> u32 {
        self.shared().state.lock().player_version
    }

    pub fn pointer_width(&self) -> PointerWidth {
        self.inner.transport.pointer_width()
    }

    /// The movie URI the player reported, with `|` drive separators fixed.
    pub fn uri(&self) -> Option<String> {
        self.shared().state.lock().uri.clone()
    }

    pub fn params(&self) -> HashMap<String, String> {
        self.shared().state.lock().params.clone()
    }

    pub(crate) fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    pub(crate) async fn send(&self, isolate: IsolateId, command: &Command) -> Result<()> {
        tracing::debug!(target: "swfdbg.session", kind = %command.kind(), isolate, "request");
        self.inner
            .transport
            .send_command(isolate, command)
            .await
            .map_err(SessionError::from_send)
    }

    /// Sends `command` and waits for one more `expected` message from
    /// `isolate` than had arrived before sending.
    ///
    /// Returns `false` when the window closes or the connection drops
    /// first. Any inbound traffic from `isolate` other than a tag
    /// notification restarts the window. A reply that arrives late is still applied to the state.
    pub async fn request(
        &self,
        isolate: IsolateId,
        command: &Command,
        expected: InboundKind,
        timeout: Duration,
    ) -> Result<bool> {
        let counter = &self.inner.counter;
        let mut generation = counter.subscribe();
        let target = counter.in_count(isolate, expected) + 1;
        let mut seen = self.shared().traffic(isolate);
        self.send(isolate, command).await?;

        let shutdown = self.inner.transport.shutdown_token();
        let mut deadline = Instant::now() + timeout;
        loop {
            if counter.in_count(isolate, expected) >= target {
                return Ok(true);
            }
            if !self.is_connected() {
                return Ok(false);
            }
            tokio::select! {
                changed = generation.changed() => {
                    if changed.is_err() {
                        return Ok(counter.in_count(isolate, expected) >= target);
                    }
                    let traffic = self.shared().traffic(isolate);
                    if traffic != seen {
                        seen = traffic;
                        deadline = Instant::now() + timeout;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    let arrived = counter.in_count(isolate, expected) >= target;
                    if !arrived {
                        tracing::debug!(
                            target: "swfdbg.session",
                            kind = %command.kind(),
                            %expected,
                            isolate,
                            ?timeout,
                            "request timed out"
                        );
                    }
                    return Ok(arrived);
                }
                _ = shutdown.cancelled() => {
                    return Ok(counter.in_count(isolate, expected) >= target);
                }
            }
        }
    }

    /// [`Session::request`] with a missing reply turned into `NoResponse`.
    pub(crate) async fn expect(
        &self,
        isolate: IsolateId,
        command: &Command,
        expected: InboundKind,
        timeout: Duration,
    ) -> Result<()> {
        if self.request(isolate, command, expected, timeout).await? {
            Ok(())
        } else {
            Err(SessionError::no_response(timeout))
        }
    }

    pub(crate) async fn send_squelch(&self, isolate: IsolateId, on: bool) -> Result<bool> {
        self.request(
            isolate,
            &Command::SetSquelch(on),
            InboundKind::Squelch,
            self.inner.config.response_timeout(),
        )
        .await
    }

    pub(crate) fn next_watch_tag(&self) -> u16 {
        self.inner.watch_tag.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_binary_op_id(&self) -> u32 {
        self.inner.binary_op_id.fetch_add(1, Ordering::Relaxed)
    }

    // ---- options and capabilities ----

    /// Reads a player option. `None` when the player did not answer.
    pub async fn option(&self, name: &str) -> Result<Option<String>> {
        let answered = self
            .request(
                PRIMORDIAL_ISOLATE,
                &Command::GetOption {
                    name: name.to_string(),
                },
                InboundKind::Option,
                self.inner.config.response_timeout(),
            )
            .await?;
        if !answered {
            return Ok(None);
        }
        Ok(self.shared().state.lock().options.get(name).cloned())
    }

    /// Sets a player option, returning whether the player acknowledged it.
    pub async fn set_option(&self, name: &str, value: &str) -> Result<bool> {
        self.request(
            PRIMORDIAL_ISOLATE,
            &Command::SetOption {
                name: name.to_string(),
                value: value.to_string(),
            },
            InboundKind::Option,
            self.inner.config.response_timeout(),
        )
        .await
    }

    pub async fn option_bool(&self, name: &str, default: bool) -> Result<bool> {
        Ok(match self.option(name).await? {
            Some(value) => value.eq_ignore_ascii_case("true"),
            None => default,
        })
    }

    /// A boolean option, asked once per connection.
    async fn capability(&self, name: &'static str) -> Result<bool> {
        if let Some(known) = self.inner.capabilities.lock().get(name) {
            return Ok(*known);
        }
        let value = self.option_bool(name, false).await?;
        self.inner.capabilities.lock().insert(name, value);
        Ok(value)
    }

    pub async fn supports_watchpoints(&self) -> Result<bool> {
        self.capability(CAN_SET_WATCHPOINTS).await
    }

    pub async fn can_break_on_all_exceptions(&self) -> Result<bool> {
        self.capability(CAN_BREAK_ON_ALL_EXCEPTIONS).await
    }

    pub async fn can_call_functions(&self) -> Result<bool> {
        self.capability(CAN_CALL_FUNCTIONS).await
    }

    pub async fn can_terminate(&self) -> Result<bool> {
        self.capability(CAN_TERMINATE).await
    }

    /// Whether the player runs workers and answers isolate commands.
    pub async fn is_concurrent(&self) -> Result<bool> {
        self.capability(CONCURRENT_PLAYER).await
    }

    // ---- isolates ----

    /// A handle for per-isolate operations on `isolate`.
    pub fn isolate(&self, isolate: IsolateId) -> IsolateSession {
        IsolateSession::new(self.clone(), isolate)
    }

    pub fn main(&self) -> IsolateSession {
        self.isolate(PRIMORDIAL_ISOLATE)
    }

    /// Workers reported by the last enumeration or create notifications.
    pub fn workers(&self) -> Vec<IsolateId> {
        let state = self.shared().state.lock();
        let mut workers: Vec<IsolateId> = state
            .isolates
            .keys()
            .copied()
            .filter(|id| *id != PRIMORDIAL_ISOLATE)
            .collect();
        for worker in &state.workers {
            if *worker != PRIMORDIAL_ISOLATE && !workers.contains(worker) {
                workers.push(*worker);
            }
        }
        workers.sort_unstable();
        workers
    }

    /// Asks the player for its current workers.
    pub async fn refresh_workers(&self) -> Result<Vec<IsolateId>> {
        self.ensure_connected()?;
        if !self.is_concurrent().await? {
            return Err(SessionError::NotSupported("workers".to_string()));
        }
        self.expect(
            PRIMORDIAL_ISOLATE,
            &Command::IsolateEnumerate,
            InboundKind::IsolateEnumerate,
            self.inner.config.response_timeout(),
        )
        .await?;
        Ok(self.workers())
    }

    // ---- events ----

    /// Waits until an event is queued. Fails with `NotConnected` only when
    /// the queue is empty and the player is gone.
    pub async fn wait_for_event(&self) -> Result<()> {
        let events = &self.shared().events;
        loop {
            let notified = events.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !events.is_empty() {
                return Ok(());
            }
            if !self.is_connected() {
                return Err(SessionError::NotConnected);
            }
            notified.await;
        }
    }

    pub fn next_event(&self) -> Option<DebugEvent> {
        self.shared().events.pop()
    }

    pub fn event_count(&self) -> usize {
        self.shared().events.len()
    }
}

/// Operations on the primordial isolate.
impl Session {
    pub fn is_suspended(&self) -> Result<bool> {
        self.main().is_suspended()
    }

    pub async fn resume(&self) -> Result<()> {
        self.main().resume().await
    }

    pub async fn suspend(&self) -> Result<()> {
        self.main().suspend().await
    }

    pub async fn step_into(&self) -> Result<()> {
        self.main().step_into().await
    }

    pub async fn step_over(&self) -> Result<()> {
        self.main().step_over().await
    }

    pub async fn step_out(&self) -> Result<()> {
        self.main().step_out().await
    }

    pub async fn step_continue(&self) -> Result<()> {
        self.main().step_continue().await
    }

    pub async fn suspend_info(&self) -> Result<SuspendInfo> {
        self.main().suspend_info().await
    }

    pub async fn set_breakpoint(&self, module: u32, line: u32) -> Result<Option<Location>> {
        self.main().set_breakpoint(module, line).await
    }

    pub async fn clear_breakpoint(&self, location: &Location) -> Result<Option<Location>> {
        self.main().clear_breakpoint(location).await
    }

    pub fn breakpoints(&self) -> Vec<Location> {
        self.main().breakpoints()
    }

    pub async fn set_watch(&self, value_id: ValueId, member: &str, kind: WatchKind) -> Result<Option<Watch>> {
        self.main().set_watch(value_id, member, kind).await
    }

    pub async fn clear_watch(&self, watch: &Watch) -> Result<Option<Watch>> {
        self.main().clear_watch(watch).await
    }

    pub fn watches(&self) -> Vec<Watch> {
        self.main().watches()
    }

    pub fn frames(&self) -> Vec<StackFrame> {
        self.main().frames()
    }

    pub async fn request_frame(&self, depth: usize) -> Result<()> {
        self.main().request_frame(depth).await
    }

    pub async fn variable_list(&self) -> Result<Vec<Variable>> {
        self.main().variable_list().await
    }

    pub async fn value(&self, id: ValueId) -> Result<Option<Value>> {
        self.main().value(id).await
    }

    pub fn raw_value(&self, id: ValueId) -> Option<Value> {
        self.main().raw_value(id)
    }

    pub fn previous_value(&self, id: ValueId) -> Option<Value> {
        self.main().previous_value(id)
    }

    pub fn variable_value(&self, var: &Variable) -> Option<Value> {
        self.main().variable_value(var)
    }

    pub async fn obtain_members(&self, id: ValueId) -> Result<()> {
        self.main().obtain_members(id).await
    }

    pub async fn member_value(&self, parent: ValueId, name: &str) -> Result<Value> {
        self.main().member_value(parent, name).await
    }

    pub async fn global(&self, name: &str) -> Result<Option<Value>> {
        self.main().global(name).await
    }

    pub async fn set_scalar_member(
        &self,
        parent: ValueId,
        member: &str,
        kind: VariableType,
        value: &str,
    ) -> Result<Option<FaultEvent>> {
        self.main().set_scalar_member(parent, member, kind, value).await
    }

    pub async fn call_function(&self, this: &Value, name: &str, args: &[Value]) -> Result<Evaluation<Value>> {
        self.main().call_function(this, name, args).await
    }

    pub async fn call_constructor(&self, name: &str, args: &[Value]) -> Result<Evaluation<Value>> {
        self.main().call_constructor(name, args).await
    }

    pub async fn eval_is(&self, value: &Value, type_value: &Value) -> Result<Evaluation<bool>> {
        self.main().eval_is(value, type_value).await
    }

    pub async fn eval_instanceof(&self, value: &Value, type_value: &Value) -> Result<Evaluation<bool>> {
        self.main().eval_instanceof(value, type_value).await
    }

    pub async fn eval_in(&self, property: &Value, object: &Value) -> Result<Evaluation<bool>> {
        self.main().eval_in(property, object).await
    }

    pub async fn eval_as(&self, value: &Value, type_value: &Value) -> Result<Evaluation<Value>> {
        self.main().eval_as(value, type_value).await
    }

    pub async fn swfs(&self) -> Result<Vec<ProgramUnit>> {
        self.main().swfs().await
    }

    pub fn modules(&self) -> Vec<SourceModule> {
        self.main().modules()
    }

    pub fn module(&self, id: u32) -> Option<SourceModule> {
        self.main().module(id)
    }

    pub async fn break_on_caught_exceptions(&self, on: bool) -> Result<()> {
        self.main().break_on_caught_exceptions(on).await
    }
}
