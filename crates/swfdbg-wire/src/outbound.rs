//! Outbound command encoding.

use super::{
    codec::WireWriter,
    error::Result,
    kinds::OutboundKind,
};

pub const GET_VARIABLE_INVOKE_GETTER: u32 = 0x1;
pub const GET_VARIABLE_ALSO_GET_CHILDREN: u32 = 0x2;
pub const GET_VARIABLE_DONT_GET_FUNCTIONS: u32 = 0x4;
pub const GET_VARIABLE_GET_CLASS_HIERARCHY: u32 = 0x8;

/// Operator codes for [`Command::BinaryOp`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Is,
    Instanceof,
    In,
    As,
}

impl BinaryOperator {
    pub fn code(self) -> u8 {
        match self {
            Self::Is => 0,
            Self::Instanceof => 1,
            Self::In => 2,
            Self::As => 3,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Is => "is",
            Self::Instanceof => "instanceof",
            Self::In => "in",
            Self::As => "as",
        }
    }
}

/// A `(type name, value text)` pair as function arguments and operands are
/// sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypedText {
    pub type_name: String,
    pub value: String,
}

impl TypedText {
    pub fn new(type_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Exit { terminate: bool },
    Continue,
    StopDebug,
    StepOver,
    StepInto,
    StepOut,
    StepContinue,
    ProcessedTag,
    SetSquelch(bool),
    SetBreakpoints(Vec<u32>),
    RemoveBreakpoints(Vec<u32>),
    RemoveAllBreakpoints,
    GetFrame { depth: u32 },
    GetVariable {
        id: i64,
        name: String,
        flags: u32,
    },
    SetVariable {
        id: i64,
        name: String,
        type_name: String,
        value: String,
    },
    AddWatch2 {
        id: i64,
        name: String,
        kind: u16,
        tag: u16,
    },
    RemoveWatch2 { id: i64, name: String },
    GetOption { name: String },
    SetOption { name: String, value: String },
    GetSwf { index: u16 },
    GetSwd { index: u16 },
    GetBreakReason,
    GetActions { which: u16, at: u32, len: u32 },
    SwfInfo { index: u16 },
    ConstantPool,
    GetFncNames { module: u32, line: u32 },
    CallFunction {
        constructor: bool,
        this: TypedText,
        name: String,
        args: Vec<TypedText>,
    },
    PassAllExceptionsToDebugger(bool),
    BinaryOp {
        id: u32,
        op: BinaryOperator,
        lhs: TypedText,
        rhs: TypedText,
    },
    IsolateEnumerate,
    SetActiveIsolate(u32),
    SetExceptionBreakpoint { class: String },
    RemoveExceptionBreakpoint { class: String },
}

impl Command {
    pub fn kind(&self) -> OutboundKind {
        use OutboundKind as K;

        match self {
            Self::Exit { .. } => K::Exit,
            Self::Continue => K::Continue,
            Self::StopDebug => K::StopDebug,
            Self::StepOver => K::StepOver,
            Self::StepInto => K::StepInto,
            Self::StepOut => K::StepOut,
            Self::StepContinue => K::StepContinue,
            Self::ProcessedTag => K::ProcessedTag,
            Self::SetSquelch(_) => K::SetSquelch,
            Self::SetBreakpoints(_) => K::SetBreakpoints,
            Self::RemoveBreakpoints(_) => K::RemoveBreakpoints,
            Self::RemoveAllBreakpoints => K::RemoveAllBreakpoints,
            Self::GetFrame { .. } => K::GetFrame,
            Self::GetVariable { flags, .. } if flags & GET_VARIABLE_INVOKE_GETTER != 0 => {
                K::GetVariableWhichInvokesGetter
            }
            Self::GetVariable { .. } => K::GetVariable,
            Self::SetVariable { .. } => K::SetVariable,
            Self::AddWatch2 { .. } => K::AddWatch2,
            Self::RemoveWatch2 { .. } => K::RemoveWatch2,
            Self::GetOption { .. } => K::GetOption,
            Self::SetOption { .. } => K::SetOption,
            Self::GetSwf { .. } => K::GetSwf,
            Self::GetSwd { .. } => K::GetSwd,
            Self::GetBreakReason => K::GetBreakReason,
            Self::GetActions { .. } => K::GetActions,
            Self::SwfInfo { .. } => K::SwfInfo,
            Self::ConstantPool => K::ConstantPool,
            Self::GetFncNames { .. } => K::GetFncNames,
            Self::CallFunction { .. } => K::CallFunction,
            Self::PassAllExceptionsToDebugger(_) => K::PassAllExceptionsToDebugger,
            Self::BinaryOp { .. } => K::BinaryOp,
            Self::IsolateEnumerate => K::IsolateEnumerate,
            Self::SetActiveIsolate(_) => K::SetActiveIsolate,
            Self::SetExceptionBreakpoint { .. } => K::SetExceptionBreakpoint,
            Self::RemoveExceptionBreakpoint { .. } => K::RemoveExceptionBreakpoint,
        }
    }

    pub fn encode(&self, w: &mut WireWriter) -> Result<()> {
        match self {
            Self::Exit { terminate } => w.write_bool(*terminate)?,
            Self::Continue
            | Self::StopDebug
            | Self::StepOver
            | Self::StepInto
            | Self::StepOut
            | Self::StepContinue
            | Self::ProcessedTag
            | Self::RemoveAllBreakpoints
            | Self::GetBreakReason
            | Self::ConstantPool
            | Self::IsolateEnumerate => {}
            Self::SetSquelch(on) => w.write_u32(u32::from(*on))?,
            Self::SetBreakpoints(ids) | Self::RemoveBreakpoints(ids) => {
                w.write_u32(ids.len() as u32)?;
                for id in ids {
                    w.write_u32(*id)?;
                }
            }
            Self::GetFrame { depth } => w.write_u32(*depth)?,
            Self::GetVariable { id, name, flags } => {
                w.write_ptr(*id)?;
                w.write_string(name)?;
                w.write_u32(*flags)?;
            }
            Self::SetVariable {
                id,
                name,
                type_name,
                value,
            } => {
                w.write_ptr(*id)?;
                w.write_string(name)?;
                w.write_string(type_name)?;
                w.write_string(value)?;
            }
            Self::AddWatch2 { id, name, kind, tag } => {
                w.write_ptr(*id)?;
                w.write_string(name)?;
                w.write_u16(*kind)?;
                w.write_u16(*tag)?;
            }
            Self::RemoveWatch2 { id, name } => {
                w.write_ptr(*id)?;
                w.write_string(name)?;
            }
            Self::GetOption { name } => w.write_string(name)?,
            Self::SetOption { name, value } => {
                w.write_string(name)?;
                w.write_string(value)?;
            }
            Self::GetSwf { index } | Self::GetSwd { index } => w.write_u16(*index)?,
            Self::GetActions { which, at, len } => {
                w.write_u16(*which)?;
                w.write_u16(0)?;
                w.write_u32(*at)?;
                w.write_u32(*len)?;
            }
            Self::SwfInfo { index } => {
                w.write_u16(*index)?;
                w.write_u16(0)?;
            }
            Self::GetFncNames { module, line } => {
                w.write_u32(*module)?;
                w.write_u32(*line)?;
            }
            Self::CallFunction {
                constructor,
                this,
                name,
                args,
            } => {
                w.write_u32(u32::from(*constructor))?;
                // Frame selector; the player only supports the top frame.
                w.write_u32(0)?;
                write_typed(w, this)?;
                w.write_string(name)?;
                w.write_u32(args.len() as u32)?;
                for arg in args {
                    write_typed(w, arg)?;
                }
            }
            Self::PassAllExceptionsToDebugger(on) => w.write_bool(*on)?,
            Self::BinaryOp { id, op, lhs, rhs } => {
                w.write_u32(*id)?;
                w.write_u8(op.code())?;
                write_typed(w, lhs)?;
                write_typed(w, rhs)?;
            }
            Self::SetActiveIsolate(isolate) => w.write_u32(*isolate)?,
            Self::SetExceptionBreakpoint { class } | Self::RemoveExceptionBreakpoint { class } => {
                w.write_string(class)?
            }
        }
        Ok(())
    }
}

fn write_typed(w: &mut WireWriter, typed: &TypedText) -> Result<()> {
    w.write_string(&typed.type_name)?;
    w.write_string(&typed.value)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::codec::{PointerWidth, WireReader};

    fn encode(cmd: &Command, width: PointerWidth) -> Vec<u8> {
        let mut w = WireWriter::growable(width);
        cmd.encode(&mut w).unwrap();
        w.into_vec()
    }

    #[test]
    fn getter_flag_selects_invoking_variant() {
        let plain = Command::GetVariable {
            id: 1,
            name: "x".into(),
            flags: GET_VARIABLE_DONT_GET_FUNCTIONS,
        };
        let invoking = Command::GetVariable {
            id: 1,
            name: "x".into(),
            flags: GET_VARIABLE_DONT_GET_FUNCTIONS | GET_VARIABLE_INVOKE_GETTER,
        };
        assert_eq!(plain.kind(), OutboundKind::GetVariable);
        assert_eq!(invoking.kind(), OutboundKind::GetVariableWhichInvokesGetter);
    }

    #[test]
    fn call_function_layout() {
        let bytes = encode(
            &Command::CallFunction {
                constructor: false,
                this: TypedText::new("Object", "#1"),
                name: "f".into(),
                args: vec![TypedText::new("Number", "2")],
            },
            PointerWidth::Four,
        );
        let mut r = WireReader::new(&bytes, PointerWidth::Four);
        assert_eq!(r.read_u32().unwrap(), 0);
        assert_eq!(r.read_u32().unwrap(), 0);
        assert_eq!(r.read_string().unwrap(), "Object");
        assert_eq!(r.read_string().unwrap(), "#1");
        assert_eq!(r.read_string().unwrap(), "f");
        assert_eq!(r.read_u32().unwrap(), 1);
        assert_eq!(r.read_string().unwrap(), "Number");
        assert_eq!(r.read_string().unwrap(), "2");
        assert!(!r.has_remaining());
    }

    #[test]
    fn pseudo_ids_encode_at_pointer_width() {
        let cmd = Command::GetVariable {
            id: -3,
            name: String::new(),
            flags: 0,
        };
        assert_eq!(encode(&cmd, PointerWidth::Four)[..4], [0xfd, 0xff, 0xff, 0xff]);
        assert_eq!(encode(&cmd, PointerWidth::Eight)[..8], [0xfd, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn swf_info_pads_index() {
        assert_eq!(
            encode(&Command::SwfInfo { index: 2 }, PointerWidth::Four),
            vec![2, 0, 0, 0]
        );
    }
}
