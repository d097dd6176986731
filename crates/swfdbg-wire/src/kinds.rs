//! Command-id tables.
//!
//! Inbound and outbound ids overlap numerically, so they are separate types.
//! Ids the table does not know survive as `Unknown(id)` so they can still be
//! counted and logged.

macro_rules! command_kinds {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $id:literal,)* }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant,)*
            Unknown(u32),
        }

        impl $name {
            pub fn from_u32(id: u32) -> Self {
                match id {
                    $($id => Self::$variant,)*
                    other => Self::Unknown(other),
                }
            }

            pub fn as_u32(self) -> u32 {
                match self {
                    $(Self::$variant => $id,)*
                    Self::Unknown(id) => id,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant),)*
                    Self::Unknown(_) => "Unknown",
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    Self::Unknown(id) => write!(f, "Unknown({id})"),
                    other => f.write_str(other.name()),
                }
            }
        }
    };
}

command_kinds! {
    /// Player to debugger.
    InboundKind {
        SetMenuState = 0,
        SetProperty = 1,
        Exit = 2,
        NewObject = 3,
        RemoveObject = 4,
        Trace = 5,
        ErrorTarget = 6,
        ErrorExecLimit = 7,
        ErrorWith = 8,
        ErrorProtoLimit = 9,
        SetVariable = 10,
        DeleteVariable = 11,
        Param = 12,
        PlaceObject = 13,
        Script = 14,
        AskBreakpoints = 15,
        BreakAt = 16,
        Continue = 17,
        SetLocalVariables = 18,
        SetBreakpoint = 19,
        NumScript = 20,
        RemoveScript = 21,
        RemoveBreakpoint = 22,
        NotSynced = 23,
        ErrorUrlOpen = 24,
        ProcessTag = 25,
        Version = 26,
        BreakAtExt = 27,
        SetVariable2 = 28,
        Squelch = 29,
        GetVariable = 30,
        Frame = 31,
        Option = 32,
        Watch = 33,
        GetSwf = 34,
        GetSwd = 35,
        ErrorException = 36,
        ErrorStackUnderflow = 37,
        ErrorZeroDivide = 38,
        ErrorScriptStuck = 39,
        BreakReason = 40,
        GetActions = 41,
        SwfInfo = 42,
        ConstantPool = 43,
        ErrorConsole = 44,
        GetFncNames = 45,
        CallFunction = 54,
        Watch2 = 55,
        PassAllExceptionsToDebugger = 56,
        BinaryOp = 57,
        IsolateCreate = 58,
        IsolateExit = 59,
        IsolateEnumerate = 60,
        SetActiveIsolate = 61,
        Isolate = 62,
        SetExceptionBreakpoint = 63,
        RemoveExceptionBreakpoint = 64,
    }
}

command_kinds! {
    /// Debugger to player.
    OutboundKind {
        ZoomIn = 0,
        ZoomOut = 1,
        Zoom100 = 2,
        Home = 3,
        SetQuality = 4,
        Play = 5,
        Loop = 6,
        Rewind = 7,
        Forward = 8,
        Back = 9,
        Print = 10,
        SetVariable = 11,
        SetProperty = 12,
        Exit = 13,
        SetFocus = 14,
        Continue = 15,
        StopDebug = 16,
        SetBreakpoints = 17,
        RemoveBreakpoints = 18,
        RemoveAllBreakpoints = 19,
        StepOver = 20,
        StepInto = 21,
        StepOut = 22,
        ProcessedTag = 23,
        SetSquelch = 24,
        GetVariable = 25,
        GetFrame = 26,
        GetOption = 27,
        SetOption = 28,
        AddWatch = 29,
        RemoveWatch = 30,
        StepContinue = 31,
        GetSwf = 32,
        GetSwd = 33,
        GetVariableWhichInvokesGetter = 34,
        GetBreakReason = 35,
        GetActions = 36,
        SetActions = 37,
        SwfInfo = 38,
        ConstantPool = 39,
        GetFncNames = 40,
        CallFunction = 48,
        AddWatch2 = 49,
        RemoveWatch2 = 50,
        PassAllExceptionsToDebugger = 51,
        BinaryOp = 52,
        IsolateEnumerate = 53,
        SetActiveIsolate = 54,
        SetExceptionBreakpoint = 55,
        RemoveExceptionBreakpoint = 56,
    }
}

impl InboundKind {
    /// Messages that announce the player has stopped.
    pub fn halts(self) -> bool {
        matches!(self, Self::AskBreakpoints | Self::BreakAt | Self::BreakAtExt)
    }
}

/// Positional type tag that precedes every value on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AtomTag {
    Number,
    Boolean,
    String,
    Object,
    MovieClip,
    Null,
    Undefined,
    Reference,
    Array,
    ObjectEnd,
    StrictArray,
    Date,
    LongString,
    Unsupported,
    RecordSet,
    Xml,
    TypedObject,
    AvmPlusObject,
    Namespace,
    Traits,
}

impl AtomTag {
    const ALL: [AtomTag; 20] = [
        Self::Number,
        Self::Boolean,
        Self::String,
        Self::Object,
        Self::MovieClip,
        Self::Null,
        Self::Undefined,
        Self::Reference,
        Self::Array,
        Self::ObjectEnd,
        Self::StrictArray,
        Self::Date,
        Self::LongString,
        Self::Unsupported,
        Self::RecordSet,
        Self::Xml,
        Self::TypedObject,
        Self::AvmPlusObject,
        Self::Namespace,
        Self::Traits,
    ];

    pub fn from_u16(tag: u16) -> Option<Self> {
        Self::ALL.get(usize::from(tag)).copied()
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}
