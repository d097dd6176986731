//! Operations scoped to one isolate.

use std::time::Duration;

use swfdbg_wire::outbound::{
    BinaryOperator, Command, TypedText, GET_VARIABLE_ALSO_GET_CHILDREN,
    GET_VARIABLE_DONT_GET_FUNCTIONS, GET_VARIABLE_GET_CLASS_HIERARCHY, GET_VARIABLE_INVOKE_GETTER,
};
use swfdbg_wire::inbound::FaultKind;
use swfdbg_wire::{InboundKind, IsolateId, PRIMORDIAL_ISOLATE};

use crate::error::{Evaluation, Result, SessionError};
use crate::events::{DebugEvent, FaultEvent};
use crate::model::{Location, ProgramUnit, SourceModule, StackFrame, SuspendInfo, Watch, WatchKind};
use crate::session::Session;
use crate::state::IsolateState;
use crate::value::attributes::IS_EXCEPTION;
use crate::value::{
    frame_root_id, is_pseudo_id, Payload, Value, ValueId, Variable, VariableType, VariableValue,
    BASE_ID, GLOBAL_ID, LEVEL_ID, ROOT_ID, THIS_ID,
};

/// How often `suspend` re-sends its stop request.
const SUSPEND_POLL: Duration = Duration::from_millis(50);

/// Extra wait on top of the getter timeout, so the player can report its
/// own timeout first.
const PLAYER_CODE_GRACE: Duration = Duration::from_millis(500);

/// Deepest `_levelN` probed by [`IsolateSession::variable_list`].
const MAX_LEVELS: i64 = 128;

/// Lowest player version that answers function-name requests.
const FUNCTION_NAMES_VERSION: u32 = 9;

/// A [`Session`] with the isolate fixed.
#[derive(Clone, Debug)]
pub struct IsolateSession {
    session: Session,
    id: IsolateId,
}

impl IsolateSession {
    pub(crate) fn new(session: Session, id: IsolateId) -> Self {
        Self { session, id }
    }

    pub fn id(&self) -> IsolateId {
        self.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// `Main` for the primordial isolate, `Worker N` otherwise.
    pub fn label(&self) -> String {
        if self.id == PRIMORDIAL_ISOLATE {
            "Main".to_string()
        } else {
            format!("Worker {}", self.id)
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut IsolateState) -> R) -> R {
        let mut state = self.session.shared().state.lock();
        f(state.isolate_mut(self.id))
    }

    fn halted(&self) -> bool {
        self.with_state(|state| state.halted)
    }

    fn require_suspended(&self) -> Result<()> {
        self.session.ensure_connected()?;
        if self.halted() {
            Ok(())
        } else {
            Err(SessionError::NotSuspended)
        }
    }

    fn response_timeout(&self) -> Duration {
        self.session.config().response_timeout()
    }

    fn context_timeout(&self) -> Duration {
        self.session.config().context_response_timeout()
    }

    fn player_code_timeout(&self) -> Duration {
        self.session.config().getvar_response_timeout() + PLAYER_CODE_GRACE
    }

    // ---- run control ----

    pub fn is_suspended(&self) -> Result<bool> {
        self.session.ensure_connected()?;
        Ok(self.halted())
    }

    pub async fn resume(&self) -> Result<()> {
        self.run(Command::Continue).await
    }

    /// Asks the player to stop, repeating the request until it halts or
    /// the suspend wait runs out.
    pub async fn suspend(&self) -> Result<()> {
        self.session.ensure_connected()?;
        if self.halted() {
            return Err(SessionError::AlreadySuspended);
        }
        let wait = self.session.config().suspend_wait();
        let deadline = tokio::time::Instant::now() + wait;
        while !self.halted() && tokio::time::Instant::now() < deadline {
            self.session.ensure_connected()?;
            self.session
                .request(self.id, &Command::StopDebug, InboundKind::BreakAtExt, SUSPEND_POLL)
                .await?;
        }
        if self.halted() {
            Ok(())
        } else {
            Err(SessionError::no_response(wait))
        }
    }

    pub async fn step_into(&self) -> Result<()> {
        self.run(Command::StepInto).await
    }

    pub async fn step_over(&self) -> Result<()> {
        self.run(Command::StepOver).await
    }

    pub async fn step_out(&self) -> Result<()> {
        self.run(Command::StepOut).await
    }

    pub async fn step_continue(&self) -> Result<()> {
        self.run(Command::StepContinue).await
    }

    async fn run(&self, command: Command) -> Result<()> {
        self.require_suspended()?;
        self.session
            .expect(self.id, &command, InboundKind::Continue, self.response_timeout())
            .await
    }

    /// Why the isolate is halted. Falls back to an empty record when the
    /// player does not say.
    pub async fn suspend_info(&self) -> Result<SuspendInfo> {
        self.session.ensure_connected()?;
        if let Some(info) = self.with_state(|state| state.suspend_info) {
            return Ok(info);
        }
        self.session
            .request(
                self.id,
                &Command::GetBreakReason,
                InboundKind::BreakReason,
                self.response_timeout(),
            )
            .await?;
        Ok(self
            .with_state(|state| state.suspend_info)
            .unwrap_or_default())
    }

    // ---- breakpoints and watches ----

    /// Returns the breakpoint once the player confirmed it. `None` when the
    /// player refused it or the module is unknown.
    pub async fn set_breakpoint(&self, module: u32, line: u32) -> Result<Option<Location>> {
        self.session.ensure_connected()?;
        let location = Location::new(module, line, self.id);
        let id = location.id();
        self.with_state(|state| state.removed_breakpoints.remove(&id));
        self.session
            .request(
                self.id,
                &Command::SetBreakpoints(vec![id]),
                InboundKind::SetBreakpoint,
                self.response_timeout(),
            )
            .await?;
        Ok(self.with_state(|state| state.breakpoints.get(&id).copied()))
    }

    /// Forgets the breakpoint at once; the player's acknowledgement is not
    /// awaited.
    pub async fn clear_breakpoint(&self, location: &Location) -> Result<Option<Location>> {
        self.session.ensure_connected()?;
        let id = location.id();
        let removed = self.with_state(|state| {
            let removed = state.breakpoints.remove(&id);
            if removed.is_some() {
                state.removed_breakpoints.insert(id);
            }
            removed
        });
        if removed.is_some() {
            self.session
                .send(self.id, &Command::RemoveBreakpoints(vec![id]))
                .await?;
        }
        Ok(removed)
    }

    pub fn breakpoints(&self) -> Vec<Location> {
        self.with_state(|state| state.breakpoints.values().copied().collect())
    }

    pub async fn set_exception_breakpoint(&self, class: &str) -> Result<bool> {
        self.session.ensure_connected()?;
        self.session
            .request(
                self.id,
                &Command::SetExceptionBreakpoint {
                    class: class.to_string(),
                },
                InboundKind::SetExceptionBreakpoint,
                self.response_timeout(),
            )
            .await?;
        Ok(self.with_state(|state| state.exception_breakpoints.contains(class)))
    }

    pub async fn clear_exception_breakpoint(&self, class: &str) -> Result<bool> {
        self.session.ensure_connected()?;
        self.session
            .request(
                self.id,
                &Command::RemoveExceptionBreakpoint {
                    class: class.to_string(),
                },
                InboundKind::RemoveExceptionBreakpoint,
                self.response_timeout(),
            )
            .await?;
        Ok(!self.with_state(|state| state.exception_breakpoints.contains(class)))
    }

    pub fn exception_breakpoints(&self) -> Vec<String> {
        self.with_state(|state| state.exception_breakpoints.iter().cloned().collect())
    }

    /// Watches `member` of `value_id`. `None` when the player rejected it.
    pub async fn set_watch(&self, value_id: ValueId, member: &str, kind: WatchKind) -> Result<Option<Watch>> {
        self.session.ensure_connected()?;
        if !self.session.supports_watchpoints().await? {
            return Err(SessionError::NotSupported("watchpoints".to_string()));
        }
        let name = self.raw_member_name(value_id, member);
        let tag = self.session.next_watch_tag();
        self.session
            .request(
                self.id,
                &Command::AddWatch2 {
                    id: value_id,
                    name,
                    kind: kind.flags(),
                    tag,
                },
                InboundKind::Watch2,
                self.session.config().getvar_response_timeout(),
            )
            .await?;
        Ok(self.with_state(|state| state.last_watch.clone().filter(|watch| watch.tag == tag)))
    }

    /// Returns the watch once the player dropped it.
    pub async fn clear_watch(&self, watch: &Watch) -> Result<Option<Watch>> {
        self.session.ensure_connected()?;
        self.session
            .request(
                self.id,
                &Command::RemoveWatch2 {
                    id: watch.value_id,
                    name: watch.member_name.clone(),
                },
                InboundKind::Watch2,
                self.session.config().getvar_response_timeout(),
            )
            .await?;
        let gone = self.with_state(|state| !state.watches.contains_key(&watch.tag));
        Ok(gone.then(|| watch.clone()))
    }

    pub fn watches(&self) -> Vec<Watch> {
        self.with_state(|state| state.watches.values().cloned().collect())
    }

    // ---- frames and values ----

    pub fn frames(&self) -> Vec<StackFrame> {
        self.with_state(|state| state.frames.clone())
    }

    /// Fetches the variables of the frame at `depth`, including the
    /// members of any closure activation objects, which are then shown as
    /// the frame's own arguments and locals.
    pub async fn request_frame(&self, depth: usize) -> Result<()> {
        self.require_suspended()?;
        let wire_depth = u32::try_from(depth).unwrap_or(u32::MAX);
        self.session
            .request(
                self.id,
                &Command::GetFrame { depth: wire_depth },
                InboundKind::Frame,
                self.context_timeout(),
            )
            .await?;

        let pending = self.with_state(|state| state.activation_objects(depth));
        for (id, obtained) in pending {
            if !obtained {
                self.obtain_members(id).await?;
            }
        }
        self.with_state(|state| state.pull_up_activation_objects(depth));
        Ok(())
    }

    /// Everything in scope at the top frame: locals, `this`, `_global`,
    /// `_root` and the `_levelN` clips.
    pub async fn variable_list(&self) -> Result<Vec<Variable>> {
        self.require_suspended()?;
        if !self.top_frame_cached() {
            self.request_frame(0).await?;
        }

        self.value(GLOBAL_ID).await?;
        self.value(THIS_ID).await?;
        self.value(ROOT_ID).await?;
        for level in 0..MAX_LEVELS {
            if self.value(LEVEL_ID - level).await?.is_none() {
                break;
            }
        }

        self.with_state(|state| {
            state
                .values
                .get(BASE_ID)
                .map(|base| base.members().into_iter().cloned().collect())
        })
        .ok_or(SessionError::VersionMismatch)
    }

    /// Whether the top frame's variables were fetched during this halt.
    fn top_frame_cached(&self) -> bool {
        self.with_state(|state| {
            state
                .values
                .get(BASE_ID)
                .is_some_and(Value::members_obtained)
        })
    }

    /// The cached value for `id`, fetched from the player on a miss.
    pub async fn value(&self, id: ValueId) -> Result<Option<Value>> {
        self.require_suspended()?;
        if let Some(value) = self.raw_value(id) {
            return Ok(Some(value));
        }
        if id < 0 {
            if !self.top_frame_cached() {
                self.request_frame(0).await?;
            }
        } else if id > 0 {
            self.request_variable(id, None, false, false).await?;
        }
        Ok(self.raw_value(id))
    }

    /// The current cache entry only; never asks the player.
    pub fn raw_value(&self, id: ValueId) -> Option<Value> {
        self.with_state(|state| state.values.get(id).cloned())
    }

    /// Distinct values cached for the current halt; aliases such as
    /// `THIS_ID` are not counted.
    pub fn cached_value_count(&self) -> usize {
        self.with_state(|state| state.values.len())
    }

    /// The value `id` had at the previous halt.
    pub fn previous_value(&self, id: ValueId) -> Option<Value> {
        self.with_state(|state| state.previous_values.get(id).cloned())
    }

    pub fn variable_value(&self, var: &Variable) -> Option<Value> {
        self.with_state(|state| state.resolve(var))
    }

    pub fn has_value_changed(&self, var: &Variable) -> bool {
        self.with_state(|state| state.has_value_changed(var))
    }

    /// The frame variables of `depth`, as cached.
    pub fn frame_root(&self, depth: usize) -> Option<Value> {
        self.raw_value(frame_root_id(depth))
    }

    /// Fetches the members of `id` unless they are already known.
    pub async fn obtain_members(&self, id: ValueId) -> Result<()> {
        let needed = self.with_state(|state| {
            state
                .values
                .get(id)
                .is_some_and(|value| !value.members_obtained())
        });
        if needed {
            self.request_variable(id, None, false, true).await?;
        }
        Ok(())
    }

    /// Reads one member, running its getter when getters are enabled. The
    /// parent's cached member list is left as it was.
    pub async fn member_value(&self, parent: ValueId, name: &str) -> Result<Value> {
        self.require_suspended()?;
        let invoke_getters = self.session.config().invoke_getters;
        let _detached = DetachedChildren::new(self);

        let outcome = self
            .request_variable(parent, Some(name), invoke_getters, false)
            .await;
        match outcome {
            Ok(()) => Ok(self.with_state(|state| {
                state
                    .last_variable
                    .clone()
                    .and_then(|var| state.resolve(&var))
                    .unwrap_or_else(|| Value::undefined(self.id))
            })),
            Err(err @ SessionError::NoResponse { .. }) if invoke_getters => {
                // A getter that runs too long still yields something to show.
                let value = Value::new(
                    VariableType::String,
                    "String",
                    "String",
                    IS_EXCEPTION,
                    Payload::String(err.to_string()),
                    self.id,
                );
                if parent != 0 {
                    let var = Variable::new(
                        name,
                        0,
                        VariableValue::Inline(Box::new(value.clone())),
                        self.id,
                    );
                    self.with_state(|state| {
                        state.attach_children = true;
                        state.add_variable_member(parent, var);
                    });
                }
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }

    /// A global by name; `None` when it is undefined.
    pub async fn global(&self, name: &str) -> Result<Option<Value>> {
        let value = self.member_value(0, name).await?;
        Ok((value.kind() != VariableType::Undefined).then_some(value))
    }

    async fn request_variable(
        &self,
        id: ValueId,
        name: Option<&str>,
        invoke_getter: bool,
        children: bool,
    ) -> Result<()> {
        self.require_suspended()?;
        let name = name
            .map(|name| self.raw_member_name(id, name))
            .unwrap_or_default();
        let mut flags = GET_VARIABLE_DONT_GET_FUNCTIONS;
        if invoke_getter {
            flags |= GET_VARIABLE_INVOKE_GETTER;
        }
        if children {
            flags |= GET_VARIABLE_ALSO_GET_CHILDREN | GET_VARIABLE_GET_CLASS_HIERARCHY;
        }

        let timeout = self.player_code_timeout();
        let running = PlayerCode::begin(self);
        let answered = self
            .session
            .request(
                self.id,
                &Command::GetVariable { id, name, flags },
                InboundKind::GetVariable,
                timeout,
            )
            .await;
        running.end();
        if answered? {
            Ok(())
        } else {
            Err(SessionError::no_response(timeout))
        }
    }

    /// Resolves `name`, possibly written as `ns::name`, to the raw name the
    /// parent's member list carries for it.
    fn raw_member_name(&self, parent: ValueId, name: &str) -> String {
        let short = name.rsplit_once("::").map_or(name, |(_, short)| short);
        self.with_state(|state| {
            state
                .values
                .get(parent)
                .and_then(|value| value.find_member(short))
                .map(|member| member.raw_name().to_string())
        })
        .unwrap_or_else(|| name.to_string())
    }

    /// Assigns a scalar to `member` of `parent`. Returns the fault a setter
    /// raised, if any.
    pub async fn set_scalar_member(
        &self,
        parent: ValueId,
        member: &str,
        kind: VariableType,
        value: &str,
    ) -> Result<Option<FaultEvent>> {
        self.require_suspended()?;

        // Closures keep a frame's locals on its activation object.
        let mut target = parent;
        if parent <= BASE_ID && parent > LEVEL_ID {
            let depth = (BASE_ID - parent) as usize;
            if let Some(activation) = self.with_state(|state| {
                state
                    .frames
                    .get(depth)
                    .and_then(StackFrame::activation_object)
                    .map(Variable::value_id)
            }) {
                target = activation;
            }
        }
        let name = self.raw_member_name(target, member);
        let pseudo = is_pseudo_id(target);
        let command = Command::SetVariable {
            id: if pseudo { 0 } else { target },
            name,
            type_name: kind.wire_name().to_string(),
            value: value.to_string(),
        };
        let expected = if kind == VariableType::String {
            InboundKind::SetVariable
        } else {
            InboundKind::SetVariable2
        };
        let timeout = self.session.config().setvar_response_timeout();

        let running = PlayerCode::begin(self);
        let answered = self.assign(&command, expected, timeout).await;
        let fault = running.end();
        self.with_state(|state| {
            state.free_value_cache();
            if pseudo && !state.frames.is_empty() {
                state.frames[0].mark_stale();
            } else if let Some(parent) = state.values.get_mut(target) {
                parent.remove_all_members();
            }
        });
        if !answered? {
            return Err(SessionError::no_response(timeout));
        }
        Ok(fault)
    }

    async fn assign(&self, command: &Command, expected: InboundKind, timeout: Duration) -> Result<bool> {
        // Squelch hides the reply to an assignment.
        self.session.send_squelch(self.id, false).await?;
        let answered = self.session.request(self.id, command, expected, timeout).await;
        let restored = self.session.send_squelch(self.id, true).await;
        let answered = answered?;
        restored?;
        Ok(answered)
    }

    // ---- running player code ----

    /// Calls `name` on `this` inside the player.
    ///
    /// `$obj(id)` called on `null` or `undefined` is answered locally with
    /// the cached value for `id`.
    pub async fn call_function(&self, this: &Value, name: &str, args: &[Value]) -> Result<Evaluation<Value>> {
        if let Some(value) = self.call_pseudo_function(this, name, args) {
            return Ok(Evaluation::Ok(value));
        }
        self.invoke(false, this, name, args).await
    }

    pub async fn call_constructor(&self, name: &str, args: &[Value]) -> Result<Evaluation<Value>> {
        let this = Value::primitive(Payload::Null, self.id);
        self.invoke(true, &this, name, args).await
    }

    fn call_pseudo_function(&self, this: &Value, name: &str, args: &[Value]) -> Option<Value> {
        if !matches!(this.kind(), VariableType::Undefined | VariableType::Null) || name != "$obj" {
            return None;
        }
        let undefined = Value::undefined(self.id);
        let [arg] = args else {
            return Some(undefined);
        };
        let number = arg.to_number();
        if number.fract() != 0.0 || !number.is_finite() {
            return Some(undefined);
        }
        Some(self.raw_value(number as ValueId).unwrap_or(undefined))
    }

    async fn invoke(&self, constructor: bool, this: &Value, name: &str, args: &[Value]) -> Result<Evaluation<Value>> {
        self.require_suspended()?;
        if !self.session.can_call_functions().await? {
            return Err(SessionError::NotSupported("function calls".to_string()));
        }
        let command = Command::CallFunction {
            constructor,
            this: typed_text(this),
            name: name.to_string(),
            args: args.iter().map(typed_text).collect(),
        };
        let timeout = self.player_code_timeout();

        self.with_state(|state| state.last_call = None);
        let running = PlayerCode::begin(self);
        let answered = self
            .session
            .request(self.id, &command, InboundKind::CallFunction, timeout)
            .await;
        let fault = running.end();
        if !answered? {
            return Err(SessionError::no_response(timeout));
        }
        if let Some(fault) = fault {
            return Ok(Evaluation::Fault(fault));
        }
        Ok(Evaluation::Ok(self.with_state(|state| {
            state
                .last_call
                .clone()
                .and_then(|var| state.resolve(&var))
                .unwrap_or_else(|| Value::undefined(self.id))
        })))
    }

    pub async fn eval_is(&self, value: &Value, type_value: &Value) -> Result<Evaluation<bool>> {
        self.eval_type_check(BinaryOperator::Is, value, type_value).await
    }

    pub async fn eval_instanceof(&self, value: &Value, type_value: &Value) -> Result<Evaluation<bool>> {
        self.eval_type_check(BinaryOperator::Instanceof, value, type_value)
            .await
    }

    /// `value is <type>`, with the type looked up as a global.
    pub async fn eval_is_type(&self, value: &Value, type_name: &str) -> Result<Evaluation<bool>> {
        self.eval_named_type_check(BinaryOperator::Is, value, type_name)
            .await
    }

    pub async fn eval_instanceof_type(&self, value: &Value, type_name: &str) -> Result<Evaluation<bool>> {
        self.eval_named_type_check(BinaryOperator::Instanceof, value, type_name)
            .await
    }

    pub async fn eval_in(&self, property: &Value, object: &Value) -> Result<Evaluation<bool>> {
        Ok(self
            .eval_binary_op(BinaryOperator::In, property, object)
            .await?
            .map(|value| value.to_boolean()))
    }

    pub async fn eval_as(&self, value: &Value, type_value: &Value) -> Result<Evaluation<Value>> {
        self.eval_binary_op(BinaryOperator::As, value, type_value)
            .await
    }

    async fn eval_type_check(&self, op: BinaryOperator, value: &Value, type_value: &Value) -> Result<Evaluation<bool>> {
        let key = type_check_key(value, op, type_value.type_name());
        if let Some(known) = self.cached_type_check(&key) {
            return Ok(Evaluation::Ok(known));
        }
        let result = self
            .eval_binary_op(op, value, type_value)
            .await?
            .map(|value| value.to_boolean());
        if let Evaluation::Ok(known) = result {
            self.cache_type_check(key, known);
        }
        Ok(result)
    }

    async fn eval_named_type_check(&self, op: BinaryOperator, value: &Value, type_name: &str) -> Result<Evaluation<bool>> {
        let key = type_check_key(value, op, type_name);
        if let Some(known) = self.cached_type_check(&key) {
            return Ok(Evaluation::Ok(known));
        }
        let result = match self.global(type_name).await? {
            None => Evaluation::Ok(false),
            Some(type_value) => self
                .eval_binary_op(op, value, &type_value)
                .await?
                .map(|value| value.to_boolean()),
        };
        if let Evaluation::Ok(known) = result {
            self.cache_type_check(key, known);
        }
        Ok(result)
    }

    fn cached_type_check(&self, key: &str) -> Option<bool> {
        self.session
            .shared()
            .type_checks
            .lock()
            .get(&(self.id, key.to_string()))
            .copied()
    }

    fn cache_type_check(&self, key: String, known: bool) {
        self.session
            .shared()
            .type_checks
            .lock()
            .insert((self.id, key), known);
    }

    async fn eval_binary_op(&self, op: BinaryOperator, lhs: &Value, rhs: &Value) -> Result<Evaluation<Value>> {
        self.require_suspended()?;
        if !self.session.can_call_functions().await? {
            return Err(SessionError::NotSupported(format!("operator {}", op.keyword())));
        }
        let command = Command::BinaryOp {
            id: self.session.next_binary_op_id(),
            op,
            lhs: typed_text(lhs),
            rhs: typed_text(rhs),
        };
        let timeout = self.player_code_timeout();

        self.with_state(|state| state.last_binary_op = None);
        let running = PlayerCode::begin(self);
        let answered = self
            .session
            .request(self.id, &command, InboundKind::BinaryOp, timeout)
            .await;
        let stashed = running.end();
        if !answered? {
            return Err(SessionError::no_response(timeout));
        }

        let value = self.with_state(|state| {
            state
                .last_binary_op
                .clone()
                .and_then(|var| state.resolve(&var))
                .unwrap_or_else(|| Value::undefined(self.id))
        });
        if value.is_attribute_set(IS_EXCEPTION) {
            let mut fault = FaultEvent::new(self.id, FaultKind::Exception, value.value_as_string());
            fault.thrown = Some(value);
            return Ok(Evaluation::Fault(fault));
        }
        if let Some(fault) = stashed {
            return Ok(Evaluation::Fault(fault));
        }
        Ok(Evaluation::Ok(value))
    }

    // ---- program units and modules ----

    /// Loaded program units, asking the player for them if none are known.
    pub async fn swfs(&self) -> Result<Vec<ProgramUnit>> {
        self.session.ensure_connected()?;
        if self.with_state(|state| state.units.is_empty()) {
            self.request_swf_info(0).await?;
        }
        Ok(self.with_state(|state| state.units.values().cloned().collect()))
    }

    pub async fn request_swf_info(&self, index: u16) -> Result<()> {
        self.session
            .request(
                self.id,
                &Command::SwfInfo { index },
                InboundKind::SwfInfo,
                self.context_timeout(),
            )
            .await?;
        Ok(())
    }

    pub fn unit(&self, index: u32) -> Option<ProgramUnit> {
        self.with_state(|state| state.units.get(&index).cloned())
    }

    /// Raw action bytes of unit `which` starting at `at`.
    pub async fn actions(&self, which: u16, at: u32, len: u32) -> Result<Option<Vec<u8>>> {
        self.session.ensure_connected()?;
        self.with_state(|state| state.actions = None);
        self.session
            .request(
                self.id,
                &Command::GetActions { which, at, len },
                InboundKind::GetActions,
                self.context_timeout(),
            )
            .await?;
        Ok(self.with_state(|state| state.actions.clone()))
    }

    pub async fn constant_pool(&self) -> Result<Vec<String>> {
        self.require_suspended()?;
        self.session
            .expect(
                self.id,
                &Command::ConstantPool,
                InboundKind::ConstantPool,
                self.context_timeout(),
            )
            .await?;
        Ok(self.with_state(|state| state.constant_pool.clone()))
    }

    /// Asks for the function table of `module`. Older players do not have
    /// one.
    pub async fn request_function_names(&self, module: u32, line: u32) -> Result<bool> {
        self.session.ensure_connected()?;
        if self.session.player_version() < FUNCTION_NAMES_VERSION {
            return Err(SessionError::VersionMismatch);
        }
        let answered = self
            .session
            .request(
                self.id,
                &Command::GetFncNames { module, line },
                InboundKind::GetFncNames,
                self.context_timeout(),
            )
            .await?;
        if answered {
            self.with_state(|state| {
                if let Some(source) = state.modules.get_mut(&module) {
                    source.mark_function_table();
                }
            });
        }
        Ok(answered)
    }

    /// The function names of `module`, fetching its table on first use.
    pub async fn function_names(&self, module: u32) -> Result<Vec<String>> {
        let needs_table = self.with_state(|state| {
            state
                .modules
                .get(&module)
                .is_some_and(|source| !source.has_function_table())
        });
        if needs_table && self.session.player_version() >= FUNCTION_NAMES_VERSION {
            self.request_function_names(module, 0).await?;
        }
        Ok(self.with_state(|state| {
            state
                .modules
                .get(&module)
                .map(|source| {
                    source
                        .function_names()
                        .into_iter()
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        }))
    }

    pub async fn request_swf(&self, index: u16) -> Result<Vec<u8>> {
        self.session.ensure_connected()?;
        self.with_state(|state| state.last_swf = None);
        self.session
            .expect(
                self.id,
                &Command::GetSwf { index },
                InboundKind::GetSwf,
                self.session.config().swf_swd_load_timeout(),
            )
            .await?;
        Ok(self
            .with_state(|state| state.last_swf.take())
            .unwrap_or_default())
    }

    pub async fn request_swd(&self, index: u16) -> Result<Vec<u8>> {
        self.session.ensure_connected()?;
        self.with_state(|state| state.last_swd = None);
        self.session
            .expect(
                self.id,
                &Command::GetSwd { index },
                InboundKind::GetSwd,
                self.session.config().swf_swd_load_timeout(),
            )
            .await?;
        Ok(self
            .with_state(|state| state.last_swd.take())
            .unwrap_or_default())
    }

    /// Known source modules. Reading the list re-arms the
    /// file-list-modified notification.
    pub fn modules(&self) -> Vec<SourceModule> {
        self.with_state(|state| {
            state.take_source_list_modified();
            state.modules.values().cloned().collect()
        })
    }

    pub fn module(&self, id: u32) -> Option<SourceModule> {
        self.with_state(|state| state.modules.get(&id).cloned())
    }

    pub async fn break_on_caught_exceptions(&self, on: bool) -> Result<()> {
        self.session.ensure_connected()?;
        if !self.session.can_break_on_all_exceptions().await? {
            return Err(SessionError::NotSupported(
                "breaking on caught exceptions".to_string(),
            ));
        }
        self.session
            .expect(
                self.id,
                &Command::PassAllExceptionsToDebugger(on),
                InboundKind::PassAllExceptionsToDebugger,
                self.response_timeout(),
            )
            .await
    }
}

/// Holds the isolate in player-code mode. Dropping it without [`Self::end`],
/// as happens when the caller abandons the request, queues any fault that
/// was stashed in the meantime.
struct PlayerCode<'a> {
    isolate: &'a IsolateSession,
    ended: bool,
}

impl<'a> PlayerCode<'a> {
    fn begin(isolate: &'a IsolateSession) -> Self {
        isolate.with_state(IsolateState::begin_player_code);
        Self {
            isolate,
            ended: false,
        }
    }

    /// Leaves player-code mode and hands back the stashed fault.
    fn end(mut self) -> Option<FaultEvent> {
        self.ended = true;
        self.isolate.with_state(IsolateState::end_player_code)
    }
}

impl Drop for PlayerCode<'_> {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        tracing::debug!(target: "swfdbg.session", isolate = self.isolate.id, "player code abandoned");
        if let Some(fault) = self.isolate.with_state(IsolateState::end_player_code) {
            self.isolate
                .session
                .shared()
                .events
                .push(DebugEvent::Fault(fault));
        }
    }
}

/// Stops `GetVariable` replies from being attached to their parents while
/// alive; a single member read must leave the parent's list alone.
struct DetachedChildren<'a> {
    isolate: &'a IsolateSession,
}

impl<'a> DetachedChildren<'a> {
    fn new(isolate: &'a IsolateSession) -> Self {
        isolate.with_state(|state| {
            state.last_variable = None;
            state.attach_children = false;
        });
        Self { isolate }
    }
}

impl Drop for DetachedChildren<'_> {
    fn drop(&mut self) {
        self.isolate.with_state(|state| state.attach_children = true);
    }
}

fn typed_text(value: &Value) -> TypedText {
    TypedText::new(value.kind().wire_name(), value.value_as_string())
}

fn type_check_key(value: &Value, op: BinaryOperator, type_name: &str) -> String {
    format!("{} {} {}", value.type_name(), op.keyword(), type_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_check_keys_name_both_sides() {
        let value = Value::new(VariableType::Object, "flash.display::Sprite", "", 0, Payload::Object(7), 0);
        assert_eq!(
            type_check_key(&value, BinaryOperator::Instanceof, "Object"),
            "flash.display::Sprite instanceof Object"
        );
    }

    #[test]
    fn operands_are_sent_with_wire_type_names() {
        let text = typed_text(&Value::primitive(Payload::Number(2.5), 0));
        assert_eq!(text, TypedText::new("number", "2.5"));
        let text = typed_text(&Value::undefined(0));
        assert_eq!(text, TypedText::new("undefined", "undefined"));
    }
}
