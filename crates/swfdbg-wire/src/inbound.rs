//! Typed decoding of inbound frames.
//!
//! Decoding is pure: values come out as [`Atom`]s carrying raw object ids.
//! Resolving ids against the session's value cache happens later, in the
//! order the entries appear here.

use super::{
    codec::WireReader,
    error::{Result, WireError},
    kinds::{AtomTag, InboundKind},
    message::{IsolateId, Message},
};

/// A decoded value.
#[derive(Clone, Debug, PartialEq)]
pub enum Atom {
    Number(f64),
    Boolean(bool),
    String(String),
    Null,
    Undefined,
    /// Object or namespace reference. `id == -1` means "no object" and
    /// carries no further fields.
    Object {
        id: i64,
        class_type: u32,
        is_function: bool,
        type_name: String,
    },
    MovieClip {
        id: i64,
        class_type: u32,
        type_name: String,
    },
    /// Marks that the following siblings are declared by the class named
    /// in the enclosing variable.
    Traits,
    /// A tag the player sends without a payload we understand.
    Unsupported(u16),
}

impl Atom {
    pub fn object_id(&self) -> Option<i64> {
        match self {
            Self::Object { id, .. } | Self::MovieClip { id, .. } => Some(*id),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RawVariable {
    pub name: String,
    pub flags: u32,
    pub atom: Atom,
}

/// `(ptr parent, variable)`: the shape of frame, get-variable, call and
/// constant-pool entries.
#[derive(Clone, Debug, PartialEq)]
pub struct MemberEntry {
    pub parent: i64,
    pub variable: RawVariable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackEntry {
    /// Packed breakpoint location, `(line << 16) | module`.
    pub location: u32,
    pub this_id: i64,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwfDetails {
    pub debug_coming: bool,
    pub vm_version: u8,
    pub swf_size: u32,
    pub swd_size: u32,
    pub script_count: u32,
    pub offset_count: u32,
    pub breakpoint_count: u32,
    pub port: u32,
    pub path: String,
    pub url: String,
    pub host: String,
    /// `(local module id, global module id)`.
    pub local_to_global: Vec<(i64, u32)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwfInfoEntry {
    pub index: u32,
    pub id: i64,
    /// `None` when `id == 0`, which announces an unload.
    pub details: Option<SwfDetails>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionName {
    pub offset: u32,
    pub first_line: u32,
    pub last_line: u32,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultKind {
    ExecLimit,
    With,
    ProtoLimit,
    ScriptStuck,
    UrlOpen,
    Target,
    Console,
    Exception,
    StackUnderflow,
    ZeroDivide,
}

impl FaultKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::ExecLimit => "recursion_limit",
            Self::With => "invalid_with",
            Self::ProtoLimit => "proto_limit",
            Self::ScriptStuck => "script_timeout",
            Self::UrlOpen => "invalid_url",
            Self::Target => "invalid_target",
            Self::Console => "console_error",
            Self::Exception => "exception",
            Self::StackUnderflow => "stack_underflow",
            Self::ZeroDivide => "divide_by_zero",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ThrownValue {
    pub will_be_caught: bool,
    pub parent: i64,
    pub variable: RawVariable,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RawFault {
    pub kind: FaultKind,
    pub message: Option<String>,
    pub offset: Option<u32>,
    pub thrown: Option<ThrownValue>,
}

impl RawFault {
    fn bare(kind: FaultKind) -> Self {
        Self {
            kind,
            message: None,
            offset: None,
            thrown: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WatchReply {
    pub success: bool,
    pub old_flags: u16,
    pub old_tag: u16,
    pub flags: u16,
    pub tag: u16,
    pub value_id: i64,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Version {
        version: u32,
        pointer_size: u8,
    },
    Exit,
    ProcessTag,
    Trace(String),
    Squelch(bool),
    Param {
        name: String,
        value: String,
    },
    Option {
        name: String,
        value: String,
    },
    Script {
        module: u32,
        bitmap: u32,
        name: String,
        text: String,
        swf_index: Option<u32>,
    },
    RemoveScript {
        module: u32,
    },
    NumScript {
        count: u32,
        swf_index: Option<u32>,
    },
    AskBreakpoints,
    BreakAt {
        location: u32,
        this_id: i64,
        stack: String,
    },
    BreakAtExt {
        location: u32,
        frames: Vec<StackEntry>,
    },
    Continue,
    SetBreakpoint(Vec<u32>),
    RemoveBreakpoint(Vec<u32>),
    Frame {
        depth: i32,
        registers: Vec<RawVariable>,
        entries: Vec<MemberEntry>,
    },
    GetVariable(Vec<MemberEntry>),
    CallFunction(Vec<MemberEntry>),
    BinaryOp {
        id: u32,
        entries: Vec<MemberEntry>,
    },
    SetVariable,
    SetVariable2,
    Watch(WatchReply),
    BreakReason {
        reason: u16,
        swf_index: u16,
        offset: u32,
        previous_offset: u32,
        next_offset: u32,
    },
    GetActions {
        item: u16,
        at: u32,
        actions: Vec<u8>,
    },
    SwfInfo(Vec<SwfInfoEntry>),
    ConstantPool {
        item: u16,
        entries: Vec<MemberEntry>,
    },
    GetFncNames {
        module: u32,
        functions: Vec<FunctionName>,
    },
    GetSwf(Vec<u8>),
    GetSwd(Vec<u8>),
    Fault(RawFault),
    PassAllExceptionsToDebugger,
    IsolateCreate(IsolateId),
    IsolateExit(IsolateId),
    IsolateEnumerate(Vec<IsolateId>),
    SetActiveIsolate {
        isolate: IsolateId,
        success: bool,
    },
    Isolate(IsolateId),
    SetExceptionBreakpoint {
        result: u32,
        class: String,
    },
    RemoveExceptionBreakpoint {
        result: u32,
        class: String,
    },
    /// Parsed for framing but carries nothing the session keeps.
    Ignored(InboundKind),
    Unknown(u32),
}

impl Inbound {
    pub fn decode(msg: &Message) -> Result<Self> {
        let Some(kind) = msg.inbound_kind() else {
            return Err(WireError::MalformedMessage(
                "outbound message passed to inbound decoder".to_string(),
            ));
        };
        let mut r = msg.reader();
        decode_kind(kind, &mut r)
    }
}

fn decode_kind(kind: InboundKind, r: &mut WireReader<'_>) -> Result<Inbound> {
    use InboundKind as K;

    let decoded = match kind {
        K::Version => {
            let version = r.read_u32()?;
            let pointer_size = if r.has_remaining() { r.read_u8()? } else { 4 };
            Inbound::Version {
                version,
                pointer_size,
            }
        }
        K::Exit => Inbound::Exit,
        K::ProcessTag => Inbound::ProcessTag,
        K::Trace => Inbound::Trace(r.read_string()?),
        K::Squelch => Inbound::Squelch(r.read_u32()? != 0),
        K::Param => Inbound::Param {
            name: r.read_string()?,
            value: r.read_string()?,
        },
        K::Option => Inbound::Option {
            name: r.read_string()?,
            value: r.read_string()?,
        },

        K::ErrorExecLimit => Inbound::Fault(RawFault::bare(FaultKind::ExecLimit)),
        K::ErrorWith => Inbound::Fault(RawFault::bare(FaultKind::With)),
        K::ErrorProtoLimit => Inbound::Fault(RawFault::bare(FaultKind::ProtoLimit)),
        K::ErrorScriptStuck => Inbound::Fault(RawFault::bare(FaultKind::ScriptStuck)),
        K::ErrorUrlOpen => fault_with_message(FaultKind::UrlOpen, r)?,
        K::ErrorTarget => fault_with_message(FaultKind::Target, r)?,
        K::ErrorConsole => fault_with_message(FaultKind::Console, r)?,
        K::ErrorStackUnderflow => fault_at_offset(FaultKind::StackUnderflow, r)?,
        K::ErrorZeroDivide => fault_at_offset(FaultKind::ZeroDivide, r)?,
        K::ErrorException => {
            let offset = r.read_u32()?;
            let mut fault = RawFault::bare(FaultKind::Exception);
            fault.offset = Some(offset);
            if r.has_remaining() {
                fault.message = Some(r.read_string()?);
                if r.has_remaining() && r.read_u8()? != 0 {
                    let will_be_caught = r.read_bool()?;
                    let parent = r.read_ptr()?;
                    let variable = read_variable(r)?;
                    fault.thrown = Some(ThrownValue {
                        will_be_caught,
                        parent,
                        variable,
                    });
                }
            }
            Inbound::Fault(fault)
        }

        K::PlaceObject => {
            r.read_ptr()?;
            r.read_string()?;
            Inbound::Ignored(kind)
        }
        K::SetProperty => {
            r.read_ptr()?;
            r.read_u16()?;
            r.read_string()?;
            Inbound::Ignored(kind)
        }
        K::NewObject | K::RemoveObject | K::SetLocalVariables => {
            r.read_ptr()?;
            Inbound::Ignored(kind)
        }
        K::DeleteVariable => {
            r.read_ptr()?;
            r.read_string()?;
            Inbound::Ignored(kind)
        }
        K::SetVariable => {
            // Echo of an assignment: ptr, name, u16 type, u32 flags, value.
            if r.has_remaining() {
                r.read_ptr()?;
                r.read_string()?;
                r.read_u16()?;
                r.read_u32()?;
                r.read_string()?;
            }
            Inbound::SetVariable
        }
        K::SetVariable2 => Inbound::SetVariable2,

        K::Script => {
            let module = r.read_u32()?;
            let bitmap = r.read_u32()?;
            let name = r.read_string()?;
            let text = r.read_string()?;
            let swf_index = optional_u32(r)?;
            Inbound::Script {
                module,
                bitmap,
                name,
                text,
                swf_index,
            }
        }
        K::RemoveScript => Inbound::RemoveScript {
            module: r.read_u32()?,
        },
        K::NumScript => {
            let count = r.read_u32()?;
            let swf_index = optional_u32(r)?;
            Inbound::NumScript { count, swf_index }
        }

        K::AskBreakpoints => Inbound::AskBreakpoints,
        K::BreakAt => Inbound::BreakAt {
            location: r.read_u32()?,
            this_id: r.read_ptr()?,
            stack: r.read_string()?,
        },
        K::BreakAtExt => {
            let location = r.read_u32()?;
            let count = r.read_u32()?;
            let mut frames = Vec::with_capacity(bounded(count, r));
            for _ in 0..count {
                frames.push(StackEntry {
                    location: r.read_u32()?,
                    this_id: r.read_ptr()?,
                    signature: r.read_string()?,
                });
            }
            Inbound::BreakAtExt { location, frames }
        }
        K::Continue => Inbound::Continue,
        K::SetBreakpoint => Inbound::SetBreakpoint(read_u32_list(r)?),
        K::RemoveBreakpoint => Inbound::RemoveBreakpoint(read_u32_list(r)?),

        K::Frame => {
            let depth = r.read_i32()?;
            let mut registers = Vec::new();
            if depth >= 0 {
                let count = r.read_u32()?;
                for number in 1..=count {
                    let tag = r.read_u16()?;
                    let atom = read_atom(tag, r)?;
                    registers.push(RawVariable {
                        name: format!("${number}"),
                        flags: 0,
                        atom,
                    });
                }
            }
            Inbound::Frame {
                depth,
                registers,
                entries: read_member_entries(r)?,
            }
        }
        K::GetVariable => Inbound::GetVariable(read_member_entries(r)?),
        K::CallFunction => Inbound::CallFunction(read_member_entries(r)?),
        K::BinaryOp => {
            let id = r.read_u32()?;
            Inbound::BinaryOp {
                id,
                entries: read_member_entries(r)?,
            }
        }

        K::Watch | K::Watch2 => {
            let success = r.read_u16()? != 0;
            let old_flags = r.read_u16()?;
            let old_tag = r.read_u16()?;
            let flags = r.read_u16()?;
            let tag = r.read_u16()?;
            let value_id = if kind == K::Watch2 {
                r.read_ptr()?
            } else {
                i64::from(r.read_u16()?)
            };
            let name = r.read_string()?;
            Inbound::Watch(WatchReply {
                success,
                old_flags,
                old_tag,
                flags,
                tag,
                value_id,
                name,
            })
        }

        K::BreakReason => Inbound::BreakReason {
            reason: r.read_u16()?,
            swf_index: r.read_u16()?,
            offset: r.read_u32()?,
            previous_offset: r.read_u32()?,
            next_offset: r.read_u32()?,
        },
        K::GetActions => {
            let item = r.read_u16()?;
            let _reserved = r.read_u16()?;
            let at = r.read_u32()?;
            let len = r.read_u32()? as usize;
            let actions = r.read_bytes(len)?.to_vec();
            Inbound::GetActions { item, at, actions }
        }
        K::SwfInfo => {
            let count = r.read_u16()?;
            let mut entries = Vec::with_capacity(usize::from(count));
            for _ in 0..count {
                entries.push(read_swf_info_entry(r)?);
            }
            Inbound::SwfInfo(entries)
        }
        K::ConstantPool => {
            let item = r.read_u16()?;
            let count = r.read_u32()?;
            let mut entries = Vec::with_capacity(bounded(count, r));
            for _ in 0..count {
                let parent = r.read_ptr()?;
                entries.push(MemberEntry {
                    parent,
                    variable: read_variable(r)?,
                });
            }
            Inbound::ConstantPool { item, entries }
        }
        K::GetFncNames => {
            let module = r.read_u32()?;
            let count = r.read_u32()?;
            let mut functions = Vec::with_capacity(bounded(count, r));
            for _ in 0..count {
                functions.push(FunctionName {
                    offset: r.read_u32()?,
                    first_line: r.read_u32()?,
                    last_line: r.read_u32()?,
                    name: r.read_string()?,
                });
            }
            Inbound::GetFncNames { module, functions }
        }
        K::GetSwf => Inbound::GetSwf(r.read_rest().to_vec()),
        K::GetSwd => Inbound::GetSwd(r.read_rest().to_vec()),

        K::PassAllExceptionsToDebugger => Inbound::PassAllExceptionsToDebugger,
        K::IsolateCreate => Inbound::IsolateCreate(r.read_u32()?),
        K::IsolateExit => Inbound::IsolateExit(r.read_u32()?),
        K::IsolateEnumerate => Inbound::IsolateEnumerate(read_u32_list(r)?),
        K::SetActiveIsolate => Inbound::SetActiveIsolate {
            isolate: r.read_u32()?,
            success: !r.has_remaining() || r.read_bool()?,
        },
        K::Isolate => Inbound::Isolate(r.read_u32()?),
        K::SetExceptionBreakpoint => Inbound::SetExceptionBreakpoint {
            result: r.read_u32()?,
            class: r.read_string()?,
        },
        K::RemoveExceptionBreakpoint => Inbound::RemoveExceptionBreakpoint {
            result: r.read_u32()?,
            class: r.read_string()?,
        },

        K::SetMenuState | K::NotSynced => Inbound::Ignored(kind),
        K::Unknown(id) => Inbound::Unknown(id),
    };
    Ok(decoded)
}

/// Reads `name, u16 tag, u32 flags, atom`.
pub fn read_variable(r: &mut WireReader<'_>) -> Result<RawVariable> {
    let name = r.read_string()?;
    read_named_variable(name, r)
}

fn read_named_variable(name: String, r: &mut WireReader<'_>) -> Result<RawVariable> {
    let tag = r.read_u16()?;
    let flags = r.read_u32()?;
    let atom = read_atom(tag, r)?;
    Ok(RawVariable { name, flags, atom })
}

pub fn read_atom(tag: u16, r: &mut WireReader<'_>) -> Result<Atom> {
    let atom = match AtomTag::from_u16(tag) {
        Some(AtomTag::Number) => {
            let text = r.read_string()?;
            Atom::Number(text.trim().parse::<f64>().unwrap_or(f64::NAN))
        }
        Some(AtomTag::Boolean) => Atom::Boolean(r.read_bool()?),
        Some(AtomTag::String) => Atom::String(r.read_string()?),
        Some(AtomTag::Null) => Atom::Null,
        Some(AtomTag::Undefined) => Atom::Undefined,
        Some(AtomTag::Object | AtomTag::Namespace) => {
            let id = r.read_ptr()?;
            if id == -1 {
                Atom::Object {
                    id,
                    class_type: 0,
                    is_function: false,
                    type_name: String::new(),
                }
            } else {
                let class_type = r.read_u32()?;
                let is_function = r.read_u16()? != 0;
                let _reserved = r.read_u16()?;
                let type_name = r.read_string()?;
                Atom::Object {
                    id,
                    class_type,
                    is_function,
                    type_name,
                }
            }
        }
        Some(AtomTag::MovieClip) => {
            let id = r.read_ptr()?;
            if id == -1 {
                Atom::MovieClip {
                    id,
                    class_type: 0,
                    type_name: String::new(),
                }
            } else {
                let class_type = r.read_u32()?;
                let _reserved = r.read_u32()?;
                let type_name = r.read_string()?;
                Atom::MovieClip {
                    id,
                    class_type,
                    type_name,
                }
            }
        }
        Some(AtomTag::Traits) => Atom::Traits,
        _ => Atom::Unsupported(tag),
    };
    Ok(atom)
}

fn read_member_entries(r: &mut WireReader<'_>) -> Result<Vec<MemberEntry>> {
    let mut entries = Vec::new();
    while r.has_remaining() {
        let parent = r.read_ptr()?;
        entries.push(MemberEntry {
            parent,
            variable: read_variable(r)?,
        });
    }
    Ok(entries)
}

fn read_swf_info_entry(r: &mut WireReader<'_>) -> Result<SwfInfoEntry> {
    let index = r.read_u32()?;
    let id = r.read_ptr()?;
    if id == 0 {
        return Ok(SwfInfoEntry {
            index,
            id,
            details: None,
        });
    }

    let debug_coming = r.read_bool()?;
    let vm_version = r.read_u8()?;
    let _reserved = r.read_u16()?;
    let swf_size = r.read_u32()?;
    let swd_size = r.read_u32()?;
    let script_count = r.read_u32()?;
    let offset_count = r.read_u32()?;
    let breakpoint_count = r.read_u32()?;
    let port = r.read_u32()?;
    let path = r.read_string()?;
    let url = r.read_string()?;
    let host = r.read_string()?;
    let count = r.read_u32()?;
    let mut local_to_global = Vec::with_capacity(bounded(count, r));
    for _ in 0..count {
        let local = r.read_ptr()?;
        let global = r.read_u32()?;
        local_to_global.push((local, global));
    }

    Ok(SwfInfoEntry {
        index,
        id,
        details: Some(SwfDetails {
            debug_coming,
            vm_version,
            swf_size,
            swd_size,
            script_count,
            offset_count,
            breakpoint_count,
            port,
            path,
            url,
            host,
            local_to_global,
        }),
    })
}

fn fault_with_message(kind: FaultKind, r: &mut WireReader<'_>) -> Result<Inbound> {
    let mut fault = RawFault::bare(kind);
    fault.message = Some(r.read_string()?);
    Ok(Inbound::Fault(fault))
}

fn fault_at_offset(kind: FaultKind, r: &mut WireReader<'_>) -> Result<Inbound> {
    let mut fault = RawFault::bare(kind);
    fault.offset = Some(r.read_u32()?);
    Ok(Inbound::Fault(fault))
}

fn optional_u32(r: &mut WireReader<'_>) -> Result<Option<u32>> {
    if r.remaining() >= 4 {
        Ok(Some(r.read_u32()?))
    } else {
        Ok(None)
    }
}

fn read_u32_list(r: &mut WireReader<'_>) -> Result<Vec<u32>> {
    let count = r.read_u32()?;
    let mut out = Vec::with_capacity(bounded(count, r));
    for _ in 0..count {
        out.push(r.read_u32()?);
    }
    Ok(out)
}

// A hostile count must not turn into a huge allocation before the reads fail.
fn bounded(count: u32, r: &WireReader<'_>) -> usize {
    (count as usize).min(r.remaining())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::codec::{PointerWidth, WireWriter};

    fn inbound(kind: InboundKind, width: PointerWidth, build: impl FnOnce(&mut WireWriter)) -> Inbound {
        let mut w = WireWriter::growable(width);
        build(&mut w);
        let msg = Message::inbound(kind, 0, width, w.into_vec());
        Inbound::decode(&msg).unwrap()
    }

    #[test]
    fn version_defaults_to_four_byte_pointers() {
        let decoded = inbound(InboundKind::Version, PointerWidth::Four, |w| {
            w.write_u32(9).unwrap();
        });
        assert_eq!(
            decoded,
            Inbound::Version {
                version: 9,
                pointer_size: 4
            }
        );
    }

    #[test]
    fn object_atom_without_id_has_no_fields() {
        let decoded = inbound(InboundKind::GetVariable, PointerWidth::Four, |w| {
            w.write_ptr(0x20).unwrap();
            w.write_string("child").unwrap();
            w.write_u16(AtomTag::Object.as_u16()).unwrap();
            w.write_u32(0).unwrap();
            w.write_ptr(-1).unwrap();
        });
        assert_eq!(
            decoded,
            Inbound::GetVariable(vec![MemberEntry {
                parent: 0x20,
                variable: RawVariable {
                    name: "child".to_string(),
                    flags: 0,
                    atom: Atom::Object {
                        id: -1,
                        class_type: 0,
                        is_function: false,
                        type_name: String::new(),
                    },
                },
            }])
        );
    }

    #[test]
    fn number_atoms_fall_back_to_nan() {
        let decoded = inbound(InboundKind::GetVariable, PointerWidth::Four, |w| {
            w.write_ptr(1).unwrap();
            w.write_string("n").unwrap();
            w.write_u16(AtomTag::Number.as_u16()).unwrap();
            w.write_u32(0).unwrap();
            w.write_string("not a number").unwrap();
        });
        let Inbound::GetVariable(entries) = decoded else {
            panic!("expected GetVariable");
        };
        assert!(matches!(entries[0].variable.atom, Atom::Number(n) if n.is_nan()));
    }

    #[test]
    fn frame_reads_registers_before_members() {
        let decoded = inbound(InboundKind::Frame, PointerWidth::Eight, |w| {
            w.write_u32(0).unwrap();
            w.write_u32(1).unwrap();
            w.write_u16(AtomTag::Boolean.as_u16()).unwrap();
            w.write_u8(1).unwrap();
            w.write_ptr(0x1_0000_0000).unwrap();
            w.write_string("x").unwrap();
            w.write_u16(AtomTag::String.as_u16()).unwrap();
            w.write_u32(0x20).unwrap();
            w.write_string("hi").unwrap();
        });
        assert_eq!(
            decoded,
            Inbound::Frame {
                depth: 0,
                registers: vec![RawVariable {
                    name: "$1".to_string(),
                    flags: 0,
                    atom: Atom::Boolean(true),
                }],
                entries: vec![MemberEntry {
                    parent: 0x1_0000_0000,
                    variable: RawVariable {
                        name: "x".to_string(),
                        flags: 0x20,
                        atom: Atom::String("hi".to_string()),
                    },
                }],
            }
        );
    }

    #[test]
    fn exception_fault_carries_thrown_value() {
        let decoded = inbound(InboundKind::ErrorException, PointerWidth::Four, |w| {
            w.write_u32(12).unwrap();
            w.write_string("boom").unwrap();
            w.write_u8(1).unwrap();
            w.write_u8(0).unwrap();
            w.write_ptr(0).unwrap();
            w.write_string("").unwrap();
            w.write_u16(AtomTag::String.as_u16()).unwrap();
            w.write_u32(0).unwrap();
            w.write_string("Error #1009").unwrap();
        });
        let Inbound::Fault(fault) = decoded else {
            panic!("expected fault");
        };
        assert_eq!(fault.kind, FaultKind::Exception);
        assert_eq!(fault.offset, Some(12));
        assert_eq!(fault.message.as_deref(), Some("boom"));
        let thrown = fault.thrown.unwrap();
        assert!(!thrown.will_be_caught);
        assert_eq!(thrown.variable.atom, Atom::String("Error #1009".to_string()));
    }

    #[test]
    fn swf_info_unload_entry_has_no_details() {
        let decoded = inbound(InboundKind::SwfInfo, PointerWidth::Four, |w| {
            w.write_u16(1).unwrap();
            w.write_u32(3).unwrap();
            w.write_ptr(0).unwrap();
        });
        assert_eq!(
            decoded,
            Inbound::SwfInfo(vec![SwfInfoEntry {
                index: 3,
                id: 0,
                details: None
            }])
        );
    }

    #[test]
    fn truncated_breakpoint_list_is_malformed() {
        let mut w = WireWriter::growable(PointerWidth::Four);
        w.write_u32(3).unwrap();
        w.write_u32(0x0001_0002).unwrap();
        let msg = Message::inbound(InboundKind::SetBreakpoint, 0, PointerWidth::Four, w.into_vec());
        assert!(matches!(
            Inbound::decode(&msg),
            Err(WireError::MalformedMessage(_))
        ));
    }

    #[test]
    fn unknown_ids_decode_to_unknown() {
        let msg = Message::inbound(InboundKind::Unknown(50), 0, PointerWidth::Four, vec![1, 2]);
        assert_eq!(Inbound::decode(&msg).unwrap(), Inbound::Unknown(50));
    }
}
