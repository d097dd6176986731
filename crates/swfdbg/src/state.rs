//! The session's model of the player, updated from inbound messages.
//!
//! Everything is partitioned by isolate. The receive loop is the only
//! writer; callers read through the same lock the listener holds while it
//! applies a message.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use swfdbg_wire::inbound::{
    Atom, FunctionName, Inbound, MemberEntry, RawFault, RawVariable, StackEntry, SwfInfoEntry,
    WatchReply,
};
use swfdbg_wire::{class_name_for, IsolateId, PRIMORDIAL_ISOLATE};

use crate::events::{DebugEvent, FaultEvent};
use crate::model::{
    Location, ProgramUnit, SourceModule, StackFrame, SuspendInfo, SuspendReason, Watch, WatchKind,
};
use crate::value::{
    attributes::*, frame_root_id, primitive_description, Payload, Value, ValueId, Variable,
    VariableType, VariableValue, BASE_ID, THIS_ID, TRAITS_TYPE_NAME, UNKNOWN_ID,
};

const ARGUMENTS_MARKER: &str = "$arguments";
const SCOPE_CHAIN_MARKER: &str = "$scopechain";

fn activation_object_name() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^.*\$\d+$").expect("valid regex"))
}

/// Values by id. Some pseudo ids (`THIS_ID`) name another entry rather
/// than holding their own.
#[derive(Debug, Default, Clone)]
pub(crate) struct ValueTable {
    values: HashMap<ValueId, Value>,
    aliases: HashMap<ValueId, ValueId>,
}

impl ValueTable {
    fn canonical(&self, id: ValueId) -> ValueId {
        self.aliases.get(&id).copied().unwrap_or(id)
    }

    pub(crate) fn get(&self, id: ValueId) -> Option<&Value> {
        self.values.get(&self.canonical(id))
    }

    pub(crate) fn get_mut(&mut self, id: ValueId) -> Option<&mut Value> {
        let id = self.canonical(id);
        self.values.get_mut(&id)
    }

    pub(crate) fn contains(&self, id: ValueId) -> bool {
        self.values.contains_key(&self.canonical(id))
    }

    fn insert(&mut self, id: ValueId, value: Value) {
        self.aliases.remove(&id);
        self.values.insert(id, value);
    }

    fn alias(&mut self, id: ValueId, target: ValueId) {
        self.values.remove(&id);
        self.aliases.insert(id, target);
    }

    fn remove(&mut self, id: ValueId) -> Option<Value> {
        self.aliases.remove(&id);
        self.values.remove(&id)
    }

    fn get_or_create(&mut self, id: ValueId, isolate: IsolateId) -> &mut Value {
        let id = self.canonical(id);
        self.values
            .entry(id)
            .or_insert_with(|| Value::placeholder(id, isolate))
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Placement {
    Member,
    PublicMember,
    InheritedPrivate,
    Keep,
}

/// What to do when a parent already has a member with the incoming
/// child's name. Subclass members arrive before base-class ones.
fn placement(existing_scope: u32, new_scope: u32) -> Placement {
    if existing_scope == NAMESPACE_SCOPE && new_scope == PUBLIC_SCOPE {
        Placement::Member
    } else if existing_scope == PUBLIC_SCOPE && new_scope == NAMESPACE_SCOPE {
        Placement::PublicMember
    } else if existing_scope != PRIVATE_SCOPE && existing_scope == new_scope {
        Placement::Member
    } else if existing_scope == PRIVATE_SCOPE && new_scope == PRIVATE_SCOPE {
        Placement::InheritedPrivate
    } else {
        Placement::Keep
    }
}

/// One isolate's share of the model.
#[derive(Debug)]
pub(crate) struct IsolateState {
    pub(crate) id: IsolateId,
    pub(crate) halted: bool,
    pub(crate) values: ValueTable,
    pub(crate) previous_values: ValueTable,
    pub(crate) frames: Vec<StackFrame>,
    pub(crate) previous_frames: Vec<StackFrame>,
    pub(crate) suspend_info: Option<SuspendInfo>,
    pub(crate) modules: BTreeMap<u32, SourceModule>,
    pub(crate) units: BTreeMap<u32, ProgramUnit>,
    last_unit: Option<u32>,
    source_list_modified: bool,
    pub(crate) breakpoints: BTreeMap<u32, Location>,
    pub(crate) removed_breakpoints: HashSet<u32>,
    pub(crate) watches: BTreeMap<u16, Watch>,
    pub(crate) last_watch: Option<Watch>,
    pub(crate) last_variable: Option<Variable>,
    pub(crate) last_call: Option<Variable>,
    pub(crate) last_binary_op: Option<Variable>,
    pub(crate) attach_children: bool,
    executing_player_code: bool,
    stashed_fault: Option<FaultEvent>,
    pub(crate) constant_pool: Vec<String>,
    pub(crate) actions: Option<Vec<u8>>,
    pub(crate) last_swf: Option<Vec<u8>>,
    pub(crate) last_swd: Option<Vec<u8>>,
    pub(crate) exception_breakpoints: BTreeSet<String>,
}

impl IsolateState {
    pub(crate) fn new(id: IsolateId) -> Self {
        Self {
            id,
            halted: false,
            values: ValueTable::default(),
            previous_values: ValueTable::default(),
            frames: Vec::new(),
            previous_frames: Vec::new(),
            suspend_info: None,
            modules: BTreeMap::new(),
            units: BTreeMap::new(),
            last_unit: None,
            source_list_modified: false,
            breakpoints: BTreeMap::new(),
            removed_breakpoints: HashSet::new(),
            watches: BTreeMap::new(),
            last_watch: None,
            last_variable: None,
            last_call: None,
            last_binary_op: None,
            attach_children: true,
            executing_player_code: false,
            stashed_fault: None,
            constant_pool: Vec::new(),
            actions: None,
            last_swf: None,
            last_swd: None,
            exception_breakpoints: BTreeSet::new(),
        }
    }

    fn apply(&mut self, msg: Inbound, events: &mut Vec<DebugEvent>) {
        match msg {
            Inbound::Trace(text) => events.push(DebugEvent::Trace {
                isolate: self.id,
                text,
            }),
            Inbound::Script {
                module,
                bitmap,
                name,
                text,
                swf_index,
            } => {
                let swf_index = swf_index.filter(|index| *index != u32::MAX);
                if self.put_source(swf_index, module, bitmap, name, text) {
                    self.note_source_list_change(events);
                }
            }
            Inbound::RemoveScript { module } => {
                if let Some(removed) = self.modules.remove(&module) {
                    if let Some(unit) = removed.unit().and_then(|i| self.units.get_mut(&i)) {
                        unit.remove_source(module);
                    }
                    self.note_source_list_change(events);
                }
            }
            Inbound::NumScript { count, swf_index } => {
                let index = match swf_index {
                    Some(index) => {
                        self.unit_mut(index);
                        self.last_unit = Some(index);
                        index
                    }
                    None => self.active_unit(),
                };
                self.unit_mut(index).set_expected_source_count(count);
            }
            Inbound::AskBreakpoints => {
                if self.suspend_info.is_none() {
                    self.suspend_info = Some(SuspendInfo {
                        reason: SuspendReason::ScriptLoaded,
                        ..SuspendInfo::default()
                    });
                }
            }
            Inbound::BreakAt { location, .. } => {
                let location = Location::from_id(location, self.id);
                events.push(DebugEvent::Break {
                    isolate: self.id,
                    module: location.module,
                    line: location.line,
                });
            }
            Inbound::BreakAtExt { frames, .. } => self.set_frames(&frames),
            Inbound::Continue => {
                self.continuing();
                self.halted = false;
            }
            Inbound::SetBreakpoint(ids) => {
                for id in ids {
                    let location = Location::from_id(id, self.id);
                    if self.removed_breakpoints.contains(&id) {
                        tracing::debug!(
                            target: "swfdbg.session",
                            isolate = self.id,
                            id,
                            "ignoring late acknowledgement for a cleared breakpoint"
                        );
                    } else if self.modules.contains_key(&location.module) {
                        self.breakpoints.insert(id, location);
                    }
                }
            }
            Inbound::RemoveBreakpoint(ids) => {
                for id in ids {
                    self.breakpoints.remove(&id);
                    self.removed_breakpoints.remove(&id);
                }
            }
            Inbound::Frame {
                depth,
                registers,
                entries,
            } => self.apply_frame(depth, &registers, &entries),
            Inbound::GetVariable(entries) => {
                self.last_variable = self.apply_members(&entries);
            }
            Inbound::CallFunction(entries) => {
                self.last_call = self.apply_members(&entries);
            }
            Inbound::BinaryOp { entries, .. } => {
                self.last_binary_op = self.apply_members(&entries);
            }
            Inbound::Watch(reply) => self.apply_watch(reply),
            Inbound::BreakReason {
                reason,
                swf_index,
                offset,
                previous_offset,
                next_offset,
            } => {
                self.suspend_info = Some(SuspendInfo {
                    reason: SuspendReason::from_code(reason),
                    swf_index,
                    offset,
                    previous_offset,
                    next_offset,
                });
                if let Some(frame) = self.frames.first_mut() {
                    frame.offset = offset;
                    frame.swf_index = Some(swf_index);
                }
            }
            Inbound::GetActions { actions, .. } => {
                self.actions = (!actions.is_empty()).then_some(actions);
            }
            Inbound::SwfInfo(entries) => {
                for entry in entries {
                    self.apply_swf_info(entry, events);
                }
            }
            Inbound::ConstantPool { entries, .. } => {
                let pool = entries
                    .iter()
                    .map(|entry| {
                        let var = self.variable_from_raw(&entry.variable);
                        self.resolve(&var)
                            .map(|value| value.value_as_string())
                            .unwrap_or_default()
                    })
                    .collect();
                self.constant_pool = pool;
            }
            Inbound::GetFncNames { module, functions } => self.apply_function_names(module, &functions),
            Inbound::GetSwf(bytes) => self.last_swf = Some(bytes),
            Inbound::GetSwd(bytes) => self.last_swd = Some(bytes),
            Inbound::Fault(raw) => self.apply_fault(raw, events),
            Inbound::SetExceptionBreakpoint { result, class } => {
                if result != 0 {
                    self.exception_breakpoints.insert(class.clone());
                }
                events.push(DebugEvent::ExceptionBreakpointChanged {
                    isolate: self.id,
                    class,
                    added: true,
                    result,
                });
            }
            Inbound::RemoveExceptionBreakpoint { result, class } => {
                if result != 0 {
                    self.exception_breakpoints.remove(&class);
                }
                events.push(DebugEvent::ExceptionBreakpointChanged {
                    isolate: self.id,
                    class,
                    added: false,
                    result,
                });
            }
            _ => {}
        }
    }

    fn note_source_list_change(&mut self, events: &mut Vec<DebugEvent>) {
        if !self.source_list_modified {
            events.push(DebugEvent::FileListModified { isolate: self.id });
        }
        self.source_list_modified = true;
    }

    /// Reading the module list re-arms the change notification.
    pub(crate) fn take_source_list_modified(&mut self) -> bool {
        std::mem::take(&mut self.source_list_modified)
    }

    // ---- program units and modules ----

    pub(crate) fn unit_mut(&mut self, index: u32) -> &mut ProgramUnit {
        let isolate = self.id;
        self.units
            .entry(index)
            .or_insert_with(|| ProgramUnit::new(index, isolate))
    }

    /// The unit that scripts without an explicit index belong to: the one
    /// seen last, or a fresh one when that is already complete.
    fn active_unit(&mut self) -> u32 {
        let next = self.units.keys().next_back().map_or(0, |last| last + 1);
        let index = self
            .last_unit
            .or_else(|| self.units.keys().next_back().copied())
            .unwrap_or(0);
        if self.unit_mut(index).has_all_source() {
            self.unit_mut(next);
            next
        } else {
            index
        }
    }

    fn put_source(&mut self, swf_index: Option<u32>, module: u32, bitmap: u32, name: String, text: String) -> bool {
        if self.modules.contains_key(&module) {
            return false;
        }
        let index = match swf_index {
            Some(index) => index,
            None => self.active_unit(),
        };
        let mut source = SourceModule::new(module, bitmap, name, text, self.id);
        source.set_unit(index);
        self.modules.insert(module, source);
        self.unit_mut(index).add_source(module);
        true
    }

    /// Attaches already-known modules that fall in the unit's global id
    /// range.
    fn tie_scripts_to_unit(&mut self, index: u32) {
        let Some(unit) = self.units.get_mut(&index) else {
            return;
        };
        if unit.has_all_source() {
            return;
        }
        let Some((first, last)) = unit.source_id_range() else {
            return;
        };
        for (id, module) in self.modules.range_mut(first..=last) {
            unit.add_source(*id);
            module.set_unit(index);
        }
    }

    fn apply_swf_info(&mut self, entry: SwfInfoEntry, events: &mut Vec<DebugEvent>) {
        let isolate = self.id;
        self.last_unit = Some(entry.index);
        let unit = self.unit_mut(entry.index);
        match entry.details {
            Some(details) => {
                let just_created = unit.swf_size == 0;
                unit.freshen(entry.id, &details);
                if details.vm_version > 0 {
                    unit.debug_coming = false;
                    unit.vm_version = details.vm_version;
                    unit.set_populated();
                }
                self.tie_scripts_to_unit(entry.index);
                if just_created {
                    events.push(DebugEvent::SwfLoaded {
                        isolate,
                        index: entry.index,
                        id: entry.id,
                        path: details.path,
                        url: details.url,
                        host: details.host,
                        port: details.port,
                        swf_size: details.swf_size,
                    });
                }
            }
            None => {
                let already_unloaded = unit.is_unloaded();
                unit.set_unloaded();
                if !already_unloaded {
                    events.push(DebugEvent::SwfUnloaded {
                        isolate,
                        index: entry.index,
                        id: unit.id,
                        path: unit.path.clone(),
                    });
                }
            }
        }
    }

    fn apply_function_names(&mut self, module: u32, functions: &[FunctionName]) {
        let Some(source) = self.modules.get_mut(&module) else {
            return;
        };
        for function in functions {
            source.add_function(
                function.offset,
                function.first_line,
                function.last_line,
                &function.name,
            );
        }
    }

    // ---- values ----

    /// Builds the value for a decoded atom, reusing the cached entry for
    /// an object id the isolate already knows.
    fn value_from_atom(&mut self, atom: &Atom, flags: u32) -> VariableValue {
        let (kind, type_name, class_name, payload) = describe_atom(atom);
        let id = match payload {
            Payload::Object(id) => id,
            _ => UNKNOWN_ID,
        };
        if id != UNKNOWN_ID {
            if let Some(existing) = self.values.get_mut(id) {
                existing.refresh(kind, type_name, class_name, flags, payload);
                return VariableValue::Ref(id);
            }
        }
        let value = Value::new(kind, type_name, class_name, flags, payload, self.id);
        if id != UNKNOWN_ID && flags & HAS_GETTER == 0 {
            self.values.insert(id, value);
            VariableValue::Ref(id)
        } else {
            VariableValue::Inline(Box::new(value))
        }
    }

    fn variable_from_raw(&mut self, raw: &RawVariable) -> Variable {
        let value = self.value_from_atom(&raw.atom, raw.flags);
        Variable::new(raw.name.clone(), raw.flags, value, self.id)
    }

    /// The value a variable names, looked up in the current generation and
    /// then the previous one.
    pub(crate) fn resolve(&self, var: &Variable) -> Option<Value> {
        match var.value() {
            VariableValue::Inline(value) => Some((**value).clone()),
            VariableValue::Ref(id) => self
                .values
                .get(*id)
                .or_else(|| self.previous_values.get(*id))
                .cloned(),
        }
    }

    fn resolve_previous(&self, var: &Variable) -> Option<Value> {
        match var.value() {
            VariableValue::Inline(value) => Some((**value).clone()),
            VariableValue::Ref(id) => self.previous_values.get(*id).cloned(),
        }
    }

    fn is_traits(&self, var: &Variable) -> bool {
        match var.value() {
            VariableValue::Inline(value) => value.is_traits(),
            VariableValue::Ref(id) => self.values.get(*id).is_some_and(Value::is_traits),
        }
    }

    /// Attaches `child` to the parent's member list and registers the
    /// child's value under its id.
    pub(crate) fn add_variable_member(&mut self, parent_id: ValueId, mut child: Variable) {
        if !self.attach_children {
            return;
        }
        if let Some(parent) = self.values.get_mut(parent_id) {
            let placement = match parent.find_member(child.name()) {
                None => Placement::Member,
                Some(existing) => placement(existing.scope(), child.scope()),
            };
            if placement == Placement::PublicMember {
                child.make_public();
            }
            let owner = parent.child_non_proto_id(&child);
            match placement {
                Placement::Member | Placement::PublicMember => parent.add_member(child.clone()),
                Placement::InheritedPrivate => parent.add_inherited_private(child.clone()),
                Placement::Keep => {}
            }
            if placement != Placement::Keep {
                if let VariableValue::Ref(id) = child.value() {
                    if let Some(value) = self.values.get_mut(*id) {
                        value.set_non_proto_id(owner);
                    }
                }
            }
        }

        let child_id = child.value_id();
        if child_id != UNKNOWN_ID && !self.values.contains(child_id) {
            if let VariableValue::Inline(value) = child.value() {
                self.values.insert(child_id, (**value).clone());
            }
        }
    }

    /// GetVariable, CallFunction and BinaryOp replies: the requested
    /// variable followed by the parent's members, grouped by the class
    /// that declares them.
    fn apply_members(&mut self, entries: &[MemberEntry]) -> Option<Variable> {
        let (first, rest) = entries.split_first()?;
        let requested = self.variable_from_raw(&first.variable);
        let parent_id = first.parent;
        self.values.get_or_create(parent_id, self.id);

        let mut defining_class: Option<String> = None;
        let mut level = 0usize;
        let mut levels_with_members = 0usize;
        let mut classes: Vec<String> = Vec::new();

        for entry in rest {
            let mut child = self.variable_from_raw(&entry.variable);
            if self.is_traits(&child) {
                let mut class = child.qualified_name();
                level = classes.len();
                // `Cls$` carries the statics of `Cls`.
                if let Some(stripped) = class.strip_suffix('$') {
                    if let Some(at) = classes.iter().position(|c| c == stripped) {
                        level = at;
                        class = stripped.to_string();
                    }
                }
                if level == classes.len() {
                    classes.push(class.clone());
                }
                defining_class = Some(class);
                continue;
            }

            if child.is_attribute_set(IS_DYNAMIC) {
                if let Some(top) = classes.first() {
                    child.set_defining_class(0, Some(top.clone()));
                    levels_with_members = levels_with_members.max(1);
                }
            } else {
                child.set_defining_class(level, defining_class.clone());
                if defining_class.is_some() {
                    levels_with_members = levels_with_members.max(level + 1);
                }
            }
            self.add_variable_member(parent_id, child);
        }

        if let Some(parent) = self.values.get_mut(parent_id) {
            if !parent.has_class_hierarchy() {
                parent.set_class_hierarchy(classes, levels_with_members);
            }
        }
        Some(requested)
    }

    // ---- frames ----

    fn set_frames(&mut self, entries: &[StackEntry]) {
        self.clear_frames();
        let isolate = self.id;
        self.frames = entries
            .iter()
            .enumerate()
            .map(|(depth, entry)| StackFrame::from_entry(depth, entry, isolate))
            .collect();
        self.map_old_frames_to_new();
    }

    fn clear_frames(&mut self) {
        if !self.frames.is_empty() {
            self.previous_frames = std::mem::take(&mut self.frames);
        }
    }

    /// Carries old frame roots over to the depth the same call now sits
    /// at, matching from the outermost frame inward by call signature.
    /// Identical recursive frames are indistinguishable.
    fn map_old_frames_to_new(&mut self) {
        let old_roots: Vec<Option<Value>> = (0..self.previous_frames.len())
            .map(|depth| self.previous_values.remove(frame_root_id(depth)))
            .collect();

        for (old_depth, new_depth) in (0..self.previous_frames.len())
            .rev()
            .zip((0..self.frames.len()).rev())
        {
            if self.previous_frames[old_depth].signature != self.frames[new_depth].signature {
                continue;
            }
            if let Some(root) = &old_roots[old_depth] {
                self.previous_values
                    .insert(frame_root_id(new_depth), root.clone());
            }
        }
    }

    pub(crate) fn free_value_cache(&mut self) {
        self.previous_values = std::mem::take(&mut self.values);
        for frame in &mut self.frames {
            frame.mark_stale();
        }
    }

    fn continuing(&mut self) {
        self.clear_frames();
        self.free_value_cache();
        for frame in &mut self.previous_frames {
            frame.mark_stale();
        }
        self.suspend_info = None;
    }

    fn apply_frame(&mut self, depth: i32, registers: &[RawVariable], entries: &[MemberEntry]) {
        let registers: Vec<Variable> = registers
            .iter()
            .map(|raw| self.variable_from_raw(raw))
            .collect();

        let mut vars = Vec::new();
        let mut current_arg: i64 = -1;
        let mut in_scope_chain = false;
        let mut entries = entries.iter();
        if let Some(first) = entries.next() {
            self.values.get_or_create(first.parent, self.id);
            self.variable_from_raw(&first.variable);
        }
        for entry in entries {
            let mut child = self.variable_from_raw(&entry.variable);
            if current_arg == -1 && child.name() == ARGUMENTS_MARKER {
                current_arg = 0;
            } else if child.name() == SCOPE_CHAIN_MARKER {
                current_arg = -1;
                in_scope_chain = true;
            } else if current_arg >= 0 {
                current_arg += 1;
                // Compilers sometimes name unnamed parameters `undefined`.
                if child.name() == "undefined" {
                    child.set_name(format!("_arg{current_arg}"));
                }
            }
            if !in_scope_chain {
                self.add_variable_member(entry.parent, child.clone());
            }
            vars.push(child);
        }

        let Ok(depth) = usize::try_from(depth) else {
            tracing::debug!(target: "swfdbg.session", depth, "ignoring frame reply without a depth");
            return;
        };
        if let Some(frame) = self.frames.get_mut(depth) {
            frame.set_registers(registers);
        }
        self.populate_frame(depth, vars);
        if depth == 0 {
            self.values
                .get_or_create(BASE_ID, self.id)
                .set_members_obtained(true);
        }
    }

    /// Sorts a frame's variables into `this`, arguments, locals and scope
    /// chain, and hangs everything but the scope chain off the frame root.
    fn populate_frame(&mut self, depth: usize, vars: Vec<Variable>) {
        let root = frame_root_id(depth);
        self.values.get_or_create(root, self.id);
        if let Some(frame) = self.frames.get_mut(depth) {
            frame.clear_variables();
        }

        let mut in_args = false;
        let mut remaining_args: i64 = -1;
        let mut in_scope_chain = false;

        for mut var in vars {
            var.clear_attribute(IS_LOCAL);
            var.clear_attribute(IS_ARGUMENT);
            match var.name() {
                "this" => {
                    var.set_attribute(IS_ARGUMENT);
                    if let Some(frame) = self.frames.get_mut(depth) {
                        frame.set_this(var.clone());
                    }
                    if depth == 0 {
                        match var.value() {
                            VariableValue::Ref(id) => self.values.alias(THIS_ID, *id),
                            VariableValue::Inline(value) => {
                                self.values.insert(THIS_ID, (**value).clone())
                            }
                        }
                    }
                    self.add_variable_member(root, var);
                }
                "super" => in_args = false,
                ARGUMENTS_MARKER => {
                    in_args = true;
                    if let Some(Payload::Number(n)) = self.resolve(&var).map(|v| v.payload().clone()) {
                        if n.is_finite() {
                            remaining_args = n as i64;
                        }
                    }
                }
                SCOPE_CHAIN_MARKER => {
                    in_args = false;
                    in_scope_chain = true;
                }
                _ => {
                    if in_args {
                        var.set_attribute(IS_ARGUMENT);
                        if let Some(frame) = self.frames.get_mut(depth) {
                            frame.add_argument(var.clone());
                        }
                        if remaining_args > -1 {
                            remaining_args -= 1;
                            if remaining_args <= 0 {
                                in_args = false;
                            }
                        }
                    } else if in_scope_chain {
                        if let Some(frame) = self.frames.get_mut(depth) {
                            frame.add_scope_chain_entry(var.clone());
                        }
                    } else {
                        var.set_attribute(IS_LOCAL);
                        if let Some(frame) = self.frames.get_mut(depth) {
                            frame.add_local(var.clone());
                        }
                    }
                    if !in_scope_chain {
                        self.add_variable_member(root, var);
                    }
                }
            }
        }
    }

    /// Frame members that are closure activation objects and whose own
    /// members have not been fetched yet.
    pub(crate) fn activation_objects(&self, depth: usize) -> Vec<(ValueId, bool)> {
        let Some(root) = self.values.get(frame_root_id(depth)) else {
            return Vec::new();
        };
        root.members()
            .into_iter()
            .filter(|var| activation_object_name().is_match(var.name()))
            .map(|var| {
                let obtained = self
                    .resolve(var)
                    .map_or(true, |value| value.members_obtained());
                (var.value_id(), obtained)
            })
            .collect()
    }

    /// Replaces a frame's arguments and locals with the members of its
    /// activation objects, which is where closures keep them.
    pub(crate) fn pull_up_activation_objects(&mut self, depth: usize) {
        let root_id = frame_root_id(depth);
        let Some(root) = self.values.get(root_id) else {
            return;
        };
        let (activations, others): (Vec<Variable>, Vec<Variable>) = root
            .members()
            .into_iter()
            .cloned()
            .partition(|var| activation_object_name().is_match(var.name()));
        if activations.is_empty() {
            return;
        }

        let mut pulled: Vec<Variable> = others;
        for activation in &activations {
            let Some(value) = self.resolve(activation) else {
                continue;
            };
            for member in value.members() {
                if member.is_attribute_set(IS_STATIC) {
                    continue;
                }
                let kind = pulled
                    .iter()
                    .find(|var| var.name() == member.name())
                    .map_or(IS_LOCAL, |old| old.attributes() & (IS_ARGUMENT | IS_LOCAL));
                let mut member = member.clone();
                member.set_attributes((member.attributes() & !SCOPE_MASK) | kind);
                match pulled.iter_mut().find(|var| var.name() == member.name()) {
                    Some(slot) => *slot = member,
                    None => pulled.push(member),
                }
            }
            if let Some(frame) = self.frames.get_mut(depth) {
                frame.convert_local_to_activation_object(activation.name());
            }
        }

        for var in pulled {
            if let Some(root) = self.values.get_mut(root_id) {
                root.add_member(var.clone());
            }
            let Some(frame) = self.frames.get_mut(depth) else {
                continue;
            };
            if var.is_attribute_set(IS_LOCAL) {
                frame.add_local(var);
            } else if var.is_attribute_set(IS_ARGUMENT) {
                if var.name() == "this" {
                    frame.set_this(var);
                } else {
                    frame.add_argument(var);
                }
            }
        }
    }

    /// Whether a variable's value differs from the one it had at the
    /// previous halt. Getters are never run for this.
    pub(crate) fn has_value_changed(&self, var: &Variable) -> bool {
        let Some(old) = self
            .previous_values
            .get(var.parent_id())
            .and_then(|parent| parent.find_member(var.name()))
        else {
            return false;
        };
        if old.needs_to_invoke_getter() || var.needs_to_invoke_getter() {
            return false;
        }
        let old = self.resolve_previous(old).map(|v| v.value_as_string());
        let new = self.resolve(var).map(|v| v.value_as_string());
        old != new
    }

    // ---- watches and faults ----

    fn apply_watch(&mut self, reply: WatchReply) {
        if !reply.success {
            return;
        }
        self.watches.remove(&reply.old_tag);
        if reply.flags == 0 {
            return;
        }
        let watch = Watch {
            value_id: reply.value_id,
            member_name: reply.name,
            kind: WatchKind::from_flags(reply.flags).unwrap_or(WatchKind::ReadWrite),
            tag: reply.tag,
            isolate: self.id,
        };
        self.watches.insert(watch.tag, watch.clone());
        self.last_watch = Some(watch);
    }

    fn apply_fault(&mut self, raw: RawFault, events: &mut Vec<DebugEvent>) {
        let mut fault = FaultEvent::new(self.id, raw.kind, raw.message.unwrap_or_default());
        fault.offset = raw.offset;
        if let Some(thrown) = raw.thrown {
            let var = self.variable_from_raw(&thrown.variable);
            fault.thrown = self.resolve(&var);
            fault.will_be_caught = thrown.will_be_caught;
        }

        if self.executing_player_code {
            if self.stashed_fault.is_none() {
                self.stashed_fault = Some(fault);
            }
        } else {
            events.push(DebugEvent::Fault(fault));
        }
    }

    /// Faults raised from here until [`Self::end_player_code`] are kept
    /// for the caller instead of being queued.
    pub(crate) fn begin_player_code(&mut self) {
        self.executing_player_code = true;
        self.stashed_fault = None;
    }

    pub(crate) fn end_player_code(&mut self) -> Option<FaultEvent> {
        self.executing_player_code = false;
        self.stashed_fault.take()
    }
}

fn describe_atom(atom: &Atom) -> (VariableType, String, String, Payload) {
    match atom {
        Atom::Number(n) => with_payload(Payload::Number(*n)),
        Atom::Boolean(b) => with_payload(Payload::Boolean(*b)),
        Atom::String(s) => with_payload(Payload::String(s.clone())),
        Atom::Null => with_payload(Payload::Null),
        Atom::Undefined => with_payload(Payload::Undefined),
        Atom::Object {
            id,
            class_type,
            is_function,
            type_name,
        } => {
            let kind = if *is_function {
                VariableType::Function
            } else {
                VariableType::Object
            };
            (
                kind,
                type_name.clone(),
                class_name_for(*class_type, false),
                object_payload(*id),
            )
        }
        Atom::MovieClip {
            id,
            class_type,
            type_name,
        } => (
            VariableType::MovieClip,
            type_name.clone(),
            class_name_for(*class_type, true),
            object_payload(*id),
        ),
        Atom::Traits => (
            VariableType::Unknown,
            TRAITS_TYPE_NAME.to_string(),
            String::new(),
            Payload::Null,
        ),
        Atom::Unsupported(_) => (VariableType::Unknown, String::new(), String::new(), Payload::Null),
    }
}

fn with_payload(payload: Payload) -> (VariableType, String, String, Payload) {
    let (kind, type_name, class_name) = primitive_description(&payload);
    (kind, type_name, class_name, payload)
}

/// `-1` is the player's "no object"; it never names a cache entry.
fn object_payload(id: i64) -> Payload {
    if id == -1 {
        Payload::Null
    } else {
        Payload::Object(id)
    }
}

/// Connection-wide facts plus the per-isolate partitions.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) isolates: BTreeMap<IsolateId, IsolateState>,
    pub(crate) player_version: u32,
    pub(crate) squelch: bool,
    pub(crate) params: HashMap<String, String>,
    pub(crate) uri: Option<String>,
    pub(crate) options: HashMap<String, String>,
    pub(crate) workers: Vec<IsolateId>,
    pub(crate) active_isolate: IsolateId,
}

impl Default for SessionState {
    fn default() -> Self {
        let mut isolates = BTreeMap::new();
        isolates.insert(PRIMORDIAL_ISOLATE, IsolateState::new(PRIMORDIAL_ISOLATE));
        Self {
            isolates,
            player_version: 0,
            squelch: false,
            params: HashMap::new(),
            uri: None,
            options: HashMap::new(),
            workers: Vec::new(),
            active_isolate: PRIMORDIAL_ISOLATE,
        }
    }
}

impl SessionState {
    pub(crate) fn isolate(&self, id: IsolateId) -> Option<&IsolateState> {
        self.isolates.get(&id)
    }

    pub(crate) fn isolate_mut(&mut self, id: IsolateId) -> &mut IsolateState {
        self.isolates
            .entry(id)
            .or_insert_with(|| IsolateState::new(id))
    }

    /// Applies one decoded message that arrived tagged with `isolate`,
    /// returning the events it raised.
    pub(crate) fn apply(&mut self, isolate: IsolateId, msg: Inbound) -> Vec<DebugEvent> {
        let mut events = Vec::new();
        match msg {
            Inbound::Version { version, .. } => self.player_version = version,
            Inbound::Squelch(on) => self.squelch = on,
            Inbound::Param { name, value } => {
                if name.starts_with("movie") {
                    self.uri = Some(convert_to_uri(&value));
                }
                self.params.insert(name, value);
            }
            Inbound::Option { name, value } => {
                self.options.insert(name, value);
            }
            Inbound::IsolateCreate(id) => {
                self.isolate_mut(id);
                events.push(DebugEvent::IsolateCreated { isolate: id });
            }
            Inbound::IsolateExit(id) => {
                self.isolates.remove(&id);
                self.workers.retain(|worker| *worker != id);
                events.push(DebugEvent::IsolateExited { isolate: id });
            }
            Inbound::IsolateEnumerate(ids) => {
                for id in &ids {
                    self.isolate_mut(*id);
                }
                self.workers = ids;
            }
            Inbound::SetActiveIsolate { isolate: id, success } => {
                if success {
                    self.active_isolate = id;
                }
            }
            Inbound::Exit
            | Inbound::ProcessTag
            | Inbound::Isolate(_)
            | Inbound::SetVariable
            | Inbound::SetVariable2
            | Inbound::PassAllExceptionsToDebugger => {}
            Inbound::Ignored(kind) => {
                tracing::trace!(target: "swfdbg.session", %kind, "ignored message");
            }
            Inbound::Unknown(id) => {
                tracing::debug!(target: "swfdbg.session", id, "unknown message");
            }
            other => {
                let state = self.isolate_mut(isolate);
                if matches!(
                    other,
                    Inbound::AskBreakpoints | Inbound::BreakAt { .. } | Inbound::BreakAtExt { .. }
                ) {
                    state.halted = true;
                }
                state.apply(other, &mut events);
            }
        }
        events
    }
}

/// Players report URLs with `|` standing in for the drive colon.
fn convert_to_uri(url: &str) -> String {
    url.char_indices()
        .map(|(at, c)| if c == '|' && at > 0 { ':' } else { c })
        .collect()
}
