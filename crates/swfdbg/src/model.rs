//! Program units, source modules, breakpoints, watches and stack frames.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use swfdbg_wire::inbound::{StackEntry, SwfDetails};
use swfdbg_wire::IsolateId;

use crate::value::{ValueId, Variable};

/// A `(module, line)` pair. On the wire it is packed as
/// `(line << 16) | module`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub module: u32,
    pub line: u32,
    pub isolate: IsolateId,
}

impl Location {
    pub fn new(module: u32, line: u32, isolate: IsolateId) -> Self {
        Self {
            module,
            line,
            isolate,
        }
    }

    pub fn from_id(id: u32, isolate: IsolateId) -> Self {
        Self {
            module: id & 0xffff,
            line: id >> 16,
            isolate,
        }
    }

    pub fn id(&self) -> u32 {
        (self.line << 16) | (self.module & 0xffff)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WatchKind {
    Read = 1,
    Write = 2,
    ReadWrite = 3,
}

impl WatchKind {
    pub fn from_flags(flags: u16) -> Option<Self> {
        match flags {
            1 => Some(Self::Read),
            2 => Some(Self::Write),
            3 => Some(Self::ReadWrite),
            _ => None,
        }
    }

    pub fn flags(self) -> u16 {
        self as u16
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Watch {
    pub value_id: ValueId,
    pub member_name: String,
    pub kind: WatchKind,
    pub tag: u16,
    pub isolate: IsolateId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SuspendReason {
    #[default]
    Unknown,
    Breakpoint,
    Watch,
    Fault,
    StopRequest,
    Step,
    HaltOpcode,
    ScriptLoaded,
}

impl SuspendReason {
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Self::Breakpoint,
            2 => Self::Watch,
            3 => Self::Fault,
            4 => Self::StopRequest,
            5 => Self::Step,
            6 => Self::HaltOpcode,
            7 => Self::ScriptLoaded,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SuspendInfo {
    pub reason: SuspendReason,
    pub swf_index: u16,
    pub offset: u32,
    pub previous_offset: u32,
    pub next_offset: u32,
}

/// One function-table row as reported by the player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionInfo {
    pub offset: u32,
    pub first_line: u32,
    pub last_line: u32,
    pub name: String,
}

/// A script the player loaded.
///
/// Names arrive as `basepath;package;filename` for compiled sources and as
/// free text (`Actions for ...`, `<anonymous>`) for timeline scripts.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceModule {
    id: u32,
    bitmap: u32,
    raw_name: String,
    base_path: Option<String>,
    package: Option<String>,
    short_name: String,
    path: String,
    text: String,
    unit: Option<u32>,
    functions: Vec<FunctionInfo>,
    line_to_offset: BTreeMap<u32, u32>,
    line_to_functions: BTreeMap<u32, Vec<String>>,
    function_first_line: HashMap<String, u32>,
    function_last_line: HashMap<String, u32>,
    anonymous_functions: u32,
    has_function_table: bool,
    isolate: IsolateId,
}

impl SourceModule {
    pub fn new(id: u32, bitmap: u32, raw_name: impl Into<String>, text: impl Into<String>, isolate: IsolateId) -> Self {
        let raw_name = raw_name.into();
        let parts = split_name(&raw_name);
        let short_name = short_name(&raw_name, parts.as_ref());
        let path = full_path(&raw_name, parts.as_ref());
        let (base_path, package) = match parts {
            Some((base, package, _)) => (Some(base.to_string()), Some(package.to_string())),
            None => (None, None),
        };
        Self {
            id,
            bitmap,
            raw_name,
            base_path,
            package,
            short_name,
            path,
            text: text.into(),
            unit: None,
            functions: Vec::new(),
            line_to_offset: BTreeMap::new(),
            line_to_functions: BTreeMap::new(),
            function_first_line: HashMap::new(),
            function_last_line: HashMap::new(),
            anonymous_functions: 0,
            has_function_table: false,
            isolate,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn bitmap(&self) -> u32 {
        self.bitmap
    }

    pub fn raw_name(&self) -> &str {
        &self.raw_name
    }

    /// File name without directories.
    pub fn name(&self) -> &str {
        &self.short_name
    }

    /// Path with the `;` separators turned back into slashes; empty for
    /// names that carry no path.
    pub fn full_path(&self) -> &str {
        &self.path
    }

    pub fn base_path(&self) -> Option<&str> {
        self.base_path.as_deref()
    }

    pub fn package_name(&self) -> &str {
        self.package.as_deref().unwrap_or("")
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn line_count(&self) -> usize {
        self.text.lines().count()
    }

    /// 1-based source line.
    pub fn line(&self, line: usize) -> Option<&str> {
        line.checked_sub(1).and_then(|i| self.text.lines().nth(i))
    }

    /// The program unit the module was loaded with.
    pub fn unit(&self) -> Option<u32> {
        self.unit
    }

    pub(crate) fn set_unit(&mut self, index: u32) {
        self.unit = Some(index);
    }

    pub fn isolate(&self) -> IsolateId {
        self.isolate
    }

    pub fn functions(&self) -> &[FunctionInfo] {
        &self.functions
    }

    /// Whether the player's function table has been asked for.
    pub fn has_function_table(&self) -> bool {
        self.has_function_table
    }

    pub(crate) fn mark_function_table(&mut self) {
        self.has_function_table = true;
    }

    pub fn offset_for_line(&self, line: u32) -> u32 {
        self.line_to_offset.get(&line).copied().unwrap_or(0)
    }

    pub fn line_for_function(&self, name: &str) -> Option<u32> {
        self.function_first_line.get(name).copied()
    }

    pub fn function_names_for_line(&self, line: u32) -> &[String] {
        self.line_to_functions
            .get(&line)
            .map_or(&[], Vec::as_slice)
    }

    /// The enclosing function, when exactly one covers `line`.
    pub fn function_name_for_line(&self, line: u32) -> Option<&str> {
        match self.function_names_for_line(line) {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Function names ordered by their first line.
    pub fn function_names(&self) -> Vec<&str> {
        let mut names: Vec<(&str, u32)> = self
            .function_first_line
            .iter()
            .map(|(name, line)| (name.as_str(), *line))
            .collect();
        names.sort_by_key(|(name, line)| (*line, *name));
        names.into_iter().map(|(name, _)| name).collect()
    }

    pub fn function_range(&self, name: &str) -> Option<(u32, u32)> {
        Some((
            *self.function_first_line.get(name)?,
            *self.function_last_line.get(name)?,
        ))
    }

    /// Appends one row of the player's function table.
    pub(crate) fn add_function(&mut self, offset: u32, first_line: u32, last_line: u32, name: &str) {
        let name = if name.is_empty() {
            self.anonymous_functions += 1;
            format!("<anonymous${}>", self.anonymous_functions)
        } else {
            // AS3 names come qualified, as in `pkg:Cls/method` or `core::fn`.
            let cut = match (name.rfind(':'), name.rfind('/')) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            match cut {
                Some(at) => name[at + 1..].to_string(),
                None => match name.rfind('.') {
                    Some(dot) => {
                        self.package = Some(name[..dot].to_string());
                        name[dot + 1..].to_string()
                    }
                    None => name.to_string(),
                },
            }
        };

        self.line_to_offset.insert(first_line, offset);
        for line in first_line..=last_line {
            self.line_to_functions
                .entry(line)
                .or_default()
                .push(name.clone());
        }
        self.function_first_line
            .entry(name.clone())
            .or_insert(first_line);
        self.function_last_line
            .entry(name.clone())
            .or_insert(last_line);
        self.functions.push(FunctionInfo {
            offset,
            first_line,
            last_line,
            name,
        });
    }
}

fn split_name(name: &str) -> Option<(&str, &str, &str)> {
    let mut parts = name.split(';');
    let base = parts.next()?;
    let package = parts.next()?;
    let file = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((base, package, file))
}

fn short_name(name: &str, parts: Option<&(&str, &str, &str)>) -> String {
    if let Some((_, _, file)) = parts {
        return file.trim().to_string();
    }
    match name.rfind('.') {
        Some(dot) if dot > 1 => {
            let head = &name[..dot];
            let slash = head.rfind(['\\', '/']).map_or(0, |at| at + 1);
            name[slash..].trim().to_string()
        }
        _ => name.trim().to_string(),
    }
}

fn full_path(name: &str, parts: Option<&(&str, &str, &str)>) -> String {
    if let Some(colon) = name.find(':') {
        if colon > 1 && !name.starts_with("Actions for") {
            let rest = &name[colon + 1..];
            return match rest.strip_prefix(' ') {
                Some(stripped) => stripped.trim().to_string(),
                None => name.trim().to_string(),
            };
        }
    }
    if name.contains('.') && !name.starts_with('<') {
        return match parts {
            Some(_) => {
                let slash = if name.contains('\\') { '\\' } else { '/' };
                name.replace(";;", ";").replace(';', &slash.to_string())
            }
            None => name.to_string(),
        }
        .trim()
        .to_string();
    }
    String::new()
}

/// A loaded SWF and what the player told us about it.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ProgramUnit {
    pub index: u32,
    pub id: i64,
    pub path: String,
    pub url: String,
    pub host: String,
    pub port: u32,
    pub swf_size: u32,
    pub swd_size: u32,
    pub script_count: u32,
    pub offset_count: u32,
    pub breakpoint_count: u32,
    pub debug_coming: bool,
    pub vm_version: u8,
    local_to_global: HashMap<i64, u32>,
    global_range: Option<(u32, u32)>,
    expected_sources: Option<u32>,
    sources: BTreeSet<u32>,
    swf: Option<Vec<u8>>,
    swd: Option<Vec<u8>>,
    populated: bool,
    unloaded: bool,
    pub isolate: IsolateId,
}

impl ProgramUnit {
    pub fn new(index: u32, isolate: IsolateId) -> Self {
        Self {
            index,
            isolate,
            ..Self::default()
        }
    }

    pub(crate) fn freshen(&mut self, id: i64, details: &SwfDetails) {
        self.id = id;
        self.path = details.path.clone();
        self.url = details.url.clone();
        self.host = details.host.clone();
        self.port = details.port;
        self.debug_coming = details.debug_coming;
        self.swf_size = details.swf_size;
        self.swd_size = details.swd_size;
        self.script_count = details.script_count;
        self.offset_count = details.offset_count;
        self.breakpoint_count = details.breakpoint_count;
        self.local_to_global = details.local_to_global.iter().copied().collect();
        self.global_range = details
            .local_to_global
            .iter()
            .map(|(_, global)| *global)
            .fold(None, |range, global| match range {
                None => Some((global, global)),
                Some((min, max)) => Some((min.min(global), max.max(global))),
            });
    }

    /// `(first, last)` global module id declared by the unit's debug map.
    pub fn source_id_range(&self) -> Option<(u32, u32)> {
        self.global_range
    }

    pub fn global_id_for(&self, local: i64) -> Option<u32> {
        self.local_to_global.get(&local).copied()
    }

    pub fn source_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.sources.iter().copied()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn contains_source(&self, module: u32) -> bool {
        self.sources.contains(&module)
    }

    pub fn expected_source_count(&self) -> Option<u32> {
        self.expected_sources
    }

    pub(crate) fn set_expected_source_count(&mut self, count: u32) {
        self.expected_sources = Some(count);
    }

    /// Every script the player announced for this unit has arrived.
    pub fn has_all_source(&self) -> bool {
        matches!(self.expected_sources, Some(n) if self.sources.len() >= n as usize)
    }

    pub(crate) fn add_source(&mut self, module: u32) {
        self.sources.insert(module);
    }

    pub(crate) fn remove_source(&mut self, module: u32) {
        self.sources.remove(&module);
    }

    pub fn swf(&self) -> Option<&[u8]> {
        self.swf.as_deref()
    }

    pub fn swd(&self) -> Option<&[u8]> {
        self.swd.as_deref()
    }

    pub(crate) fn set_swf(&mut self, bytes: Vec<u8>) {
        self.swf = Some(bytes);
    }

    pub(crate) fn set_swd(&mut self, bytes: Vec<u8>) {
        self.swd = Some(bytes);
    }

    /// ActionScript 3 units are described completely by their announcement.
    pub fn is_avm_plus(&self) -> bool {
        self.vm_version > 0
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub(crate) fn set_populated(&mut self) {
        self.populated = true;
    }

    pub fn is_unloaded(&self) -> bool {
        self.unloaded
    }

    pub(crate) fn set_unloaded(&mut self) {
        self.unloaded = true;
    }
}

/// One frame of the halted call stack.
#[derive(Clone, Debug, PartialEq)]
pub struct StackFrame {
    pub depth: usize,
    pub location: Location,
    pub signature: String,
    pub this_id: ValueId,
    pub offset: u32,
    pub swf_index: Option<u16>,
    this: Option<Variable>,
    arguments: Vec<Variable>,
    locals: Vec<Variable>,
    scope_chain: Vec<Variable>,
    activation_object: Option<Variable>,
    registers: Vec<Variable>,
    stale: bool,
}

impl StackFrame {
    pub(crate) fn from_entry(depth: usize, entry: &StackEntry, isolate: IsolateId) -> Self {
        Self {
            depth,
            location: Location::from_id(entry.location, isolate),
            signature: entry.signature.clone(),
            this_id: entry.this_id,
            offset: 0,
            swf_index: None,
            this: None,
            arguments: Vec::new(),
            locals: Vec::new(),
            scope_chain: Vec::new(),
            activation_object: None,
            registers: Vec::new(),
            stale: false,
        }
    }

    pub fn module(&self) -> u32 {
        self.location.module
    }

    pub fn line(&self) -> u32 {
        self.location.line
    }

    pub fn this(&self) -> Option<&Variable> {
        self.this.as_ref()
    }

    pub fn arguments(&self) -> &[Variable] {
        &self.arguments
    }

    pub fn locals(&self) -> &[Variable] {
        &self.locals
    }

    pub fn scope_chain(&self) -> &[Variable] {
        &self.scope_chain
    }

    /// The object holding this frame's locals when the function captured
    /// them in a closure.
    pub fn activation_object(&self) -> Option<&Variable> {
        self.activation_object.as_ref()
    }

    /// Set once the player resumed; the frame's variables then describe a
    /// past halt.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub(crate) fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub(crate) fn clear_variables(&mut self) {
        self.this = None;
        self.arguments.clear();
        self.locals.clear();
        self.scope_chain.clear();
        self.activation_object = None;
        self.stale = false;
    }

    pub(crate) fn set_this(&mut self, var: Variable) {
        self.this = Some(var);
    }

    /// Adds or replaces the argument with `var`'s name.
    pub(crate) fn add_argument(&mut self, var: Variable) {
        upsert(&mut self.arguments, var);
    }

    /// Adds or replaces the local with `var`'s name.
    pub(crate) fn add_local(&mut self, var: Variable) {
        upsert(&mut self.locals, var);
    }

    pub fn registers(&self) -> &[Variable] {
        &self.registers
    }

    pub(crate) fn set_registers(&mut self, registers: Vec<Variable>) {
        self.registers = registers;
    }

    pub(crate) fn add_scope_chain_entry(&mut self, var: Variable) {
        self.scope_chain.push(var);
    }

    /// Moves `name` out of the locals and records it as the activation
    /// object.
    pub(crate) fn convert_local_to_activation_object(&mut self, name: &str) {
        if let Some(at) = self.locals.iter().position(|v| v.name() == name) {
            self.activation_object = Some(self.locals.remove(at));
        }
    }

}

fn upsert(vars: &mut Vec<Variable>, var: Variable) {
    match vars.iter_mut().find(|v| v.name() == var.name()) {
        Some(slot) => *slot = var,
        None => vars.push(var),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn location_packing() {
        let loc = Location::new(3, 42, 0);
        assert_eq!(loc.id(), (42 << 16) | 3);
        assert_eq!(Location::from_id(loc.id(), 0), loc);
    }

    #[test]
    fn compiled_source_names_split_into_parts() {
        let module = SourceModule::new(1, 0, "C:\\src;com\\example;Main.as", "", 0);
        assert_eq!(module.name(), "Main.as");
        assert_eq!(module.base_path(), Some("C:\\src"));
        assert_eq!(module.package_name(), "com\\example");
        assert_eq!(module.full_path(), "C:\\src\\com\\example\\Main.as");

        let unix = SourceModule::new(2, 0, "/home/me/src;;Main.as", "", 0);
        assert_eq!(unix.name(), "Main.as");
        assert_eq!(unix.full_path(), "/home/me/src/Main.as");
    }

    #[test]
    fn timeline_names_have_no_path() {
        let module = SourceModule::new(1, 0, "Actions for Scene 1: Frame 1 of Layer Name Layer 1", "", 0);
        assert_eq!(module.full_path(), "");
        assert_eq!(module.base_path(), None);
    }

    #[test]
    fn function_table_normalises_names() {
        let mut module = SourceModule::new(1, 0, "src;;Main.as", "a\nb\nc\nd", 0);
        module.add_function(10, 1, 2, "");
        module.add_function(20, 3, 4, "com.example:Main/run");
        module.add_function(30, 4, 4, "util.helper");
        module.add_function(40, 5, 5, "");

        assert_eq!(
            module.function_names(),
            vec!["<anonymous$1>", "run", "helper", "<anonymous$2>"]
        );
        assert_eq!(module.package_name(), "util");
        assert_eq!(module.offset_for_line(3), 20);
        assert_eq!(module.offset_for_line(9), 0);
        assert_eq!(module.function_name_for_line(3), Some("run"));
        assert_eq!(module.function_name_for_line(4), None);
        assert_eq!(module.function_names_for_line(4), &["run".to_string(), "helper".to_string()]);
        assert_eq!(module.function_range("run"), Some((3, 4)));
        assert_eq!(module.line(2), Some("b"));
        assert_eq!(module.line(0), None);
    }

    #[test]
    fn unit_tracks_declared_sources() {
        let mut unit = ProgramUnit::new(0, 0);
        assert!(!unit.has_all_source());
        unit.set_expected_source_count(2);
        unit.add_source(5);
        assert!(!unit.has_all_source());
        unit.add_source(6);
        assert!(unit.has_all_source());
        assert_eq!(unit.source_ids().collect::<Vec<_>>(), vec![5, 6]);
    }
}
