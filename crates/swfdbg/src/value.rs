//! The value graph the session caches while the player is halted.
//!
//! Values live in a per-isolate table keyed by the player's object id. A
//! [`Variable`] names a value either inline (scalars, and objects that must
//! not be shared) or by id, so updating the table entry for an id is seen by
//! every variable that refers to it.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use swfdbg_wire::IsolateId;

pub type ValueId = i64;

pub const UNKNOWN_ID: ValueId = 0;
pub const THIS_ID: ValueId = -1;
pub const ROOT_ID: ValueId = -2;
pub const GLOBAL_ID: ValueId = -3;
/// Frame roots: depth `d` lives at `BASE_ID - d`.
pub const BASE_ID: ValueId = -10;
/// `_level0` lives here, further levels below it.
pub const LEVEL_ID: ValueId = -300;

/// Type name the player gives the class markers inside member lists.
pub const TRAITS_TYPE_NAME: &str = "traits";

/// Ids the debugger invents for frames, `this` and the like.
pub fn is_pseudo_id(id: ValueId) -> bool {
    id < 0 && id > -65535
}

pub fn frame_root_id(depth: usize) -> ValueId {
    BASE_ID - depth as ValueId
}

/// Variable and value attribute bits.
pub mod attributes {
    pub const DONT_ENUMERATE: u32 = 0x0000_0001;
    pub const READ_ONLY: u32 = 0x0000_0004;
    pub const IS_LOCAL: u32 = 0x0000_0020;
    pub const IS_DYNAMIC: u32 = 0x0000_0200;
    pub const IS_ARGUMENT: u32 = 0x0001_0000;
    /// Value attribute: the value is the text of an exception rather than a
    /// real result.
    pub const IS_EXCEPTION: u32 = 0x0004_0000;
    pub const HAS_GETTER: u32 = 0x0008_0000;
    pub const HAS_SETTER: u32 = 0x0010_0000;
    pub const IS_STATIC: u32 = 0x0020_0000;
    pub const IS_CONST: u32 = 0x0040_0000;

    pub const PUBLIC_SCOPE: u32 = 0x0000_0000;
    pub const PRIVATE_SCOPE: u32 = 0x0080_0000;
    pub const PROTECTED_SCOPE: u32 = 0x0100_0000;
    pub const INTERNAL_SCOPE: u32 = 0x0180_0000;
    pub const NAMESPACE_SCOPE: u32 = 0x0200_0000;
    pub const SCOPE_MASK: u32 =
        PUBLIC_SCOPE | PRIVATE_SCOPE | PROTECTED_SCOPE | INTERNAL_SCOPE | NAMESPACE_SCOPE;
}

use attributes::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VariableType {
    Number,
    Boolean,
    String,
    Object,
    Function,
    MovieClip,
    Null,
    Undefined,
    Unknown,
}

impl VariableType {
    /// The lowercase name the player expects in set-variable, call and
    /// operator messages.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Object => "object",
            Self::Function => "function",
            Self::MovieClip => "movieclip",
            Self::Null => "null",
            Self::Undefined | Self::Unknown => "undefined",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Number(f64),
    Boolean(bool),
    String(String),
    Null,
    Undefined,
    /// The player's id for a non-scalar value.
    Object(ValueId),
}

impl Payload {
    pub fn as_string(&self) -> String {
        match self {
            Self::Number(n) => number_to_string(*n),
            Self::Boolean(b) => b.to_string(),
            Self::String(s) => s.clone(),
            Self::Null => "null".to_string(),
            Self::Undefined => "undefined".to_string(),
            Self::Object(id) => id.to_string(),
        }
    }
}

fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        (n as i64).to_string()
    } else {
        n.to_string()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Value {
    kind: VariableType,
    type_name: String,
    class_name: String,
    attributes: u32,
    payload: Payload,
    members: Option<BTreeMap<String, Variable>>,
    inherited_privates: Option<BTreeMap<String, Vec<Variable>>>,
    class_hierarchy: Option<Vec<String>>,
    levels_with_members: usize,
    non_proto_id: ValueId,
    isolate: IsolateId,
}

impl Value {
    pub fn new(
        kind: VariableType,
        type_name: impl Into<String>,
        class_name: impl Into<String>,
        attributes: u32,
        payload: Payload,
        isolate: IsolateId,
    ) -> Self {
        let non_proto_id = match payload {
            Payload::Object(id) => id,
            _ => UNKNOWN_ID,
        };
        Self {
            kind,
            type_name: type_name.into(),
            class_name: class_name.into(),
            attributes,
            payload,
            members: None,
            inherited_privates: None,
            class_hierarchy: None,
            levels_with_members: 0,
            non_proto_id,
            isolate,
        }
    }

    /// A placeholder for an id nothing has described yet.
    pub fn placeholder(id: ValueId, isolate: IsolateId) -> Self {
        Self::new(
            VariableType::Unknown,
            "",
            "",
            0,
            Payload::Object(id),
            isolate,
        )
    }

    /// A scalar with the type the payload implies.
    pub fn primitive(payload: Payload, isolate: IsolateId) -> Self {
        let (kind, type_name) = primitive_type(&payload);
        Self::new(kind, type_name, "", 0, payload, isolate)
    }

    pub fn undefined(isolate: IsolateId) -> Self {
        Self::primitive(Payload::Undefined, isolate)
    }

    pub fn id(&self) -> ValueId {
        match self.payload {
            Payload::Object(id) => id,
            _ => UNKNOWN_ID,
        }
    }

    pub fn kind(&self) -> VariableType {
        self.kind
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn attributes(&self) -> u32 {
        self.attributes
    }

    pub fn is_attribute_set(&self, attribute: u32) -> bool {
        self.attributes & attribute != 0
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn isolate(&self) -> IsolateId {
        self.isolate
    }

    pub fn value_as_string(&self) -> String {
        self.payload.as_string()
    }

    pub fn is_traits(&self) -> bool {
        self.kind == VariableType::Unknown && self.type_name == TRAITS_TYPE_NAME
    }

    /// Overwrites everything the player describes about the value, leaving
    /// members and class hierarchy in place.
    pub(crate) fn refresh(
        &mut self,
        kind: VariableType,
        type_name: String,
        class_name: String,
        attributes: u32,
        payload: Payload,
    ) {
        self.kind = kind;
        self.type_name = type_name;
        self.class_name = class_name;
        self.attributes = attributes;
        self.payload = payload;
    }

    pub(crate) fn set_attributes(&mut self, attributes: u32) {
        self.attributes = attributes;
    }

    pub(crate) fn non_proto_id(&self) -> ValueId {
        self.non_proto_id
    }

    pub(crate) fn set_non_proto_id(&mut self, id: ValueId) {
        self.non_proto_id = id;
    }

    /// Values without an id have nothing to fetch.
    pub fn members_obtained(&self) -> bool {
        self.id() == UNKNOWN_ID || self.members.is_some()
    }

    pub(crate) fn set_members_obtained(&mut self, obtained: bool) {
        if obtained {
            self.members.get_or_insert_with(BTreeMap::new);
            self.inherited_privates.get_or_insert_with(BTreeMap::new);
        } else {
            self.members = None;
            self.inherited_privates = None;
        }
    }

    /// Members sorted by name, ignoring case.
    pub fn members(&self) -> Vec<&Variable> {
        let mut members: Vec<&Variable> = self
            .members
            .as_ref()
            .map(|m| m.values().collect())
            .unwrap_or_default();
        members.sort_by(|a, b| compare_names(a.name(), b.name()));
        members
    }

    pub fn member_count(&self) -> usize {
        self.members.as_ref().map_or(0, BTreeMap::len)
    }

    pub fn find_member(&self, name: &str) -> Option<&Variable> {
        self.members.as_ref()?.get(name)
    }

    pub(crate) fn find_member_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.members.as_mut()?.get_mut(name)
    }

    /// Same-named private members declared by base classes.
    pub fn inherited_privates(&self, name: &str) -> &[Variable] {
        self.inherited_privates
            .as_ref()
            .and_then(|m| m.get(name))
            .map_or(&[], Vec::as_slice)
    }

    /// Inserts or replaces the member with `var`'s name. The caller keeps
    /// the non-proto id of a referenced child in sync.
    pub(crate) fn add_member(&mut self, mut var: Variable) {
        self.adopt(&mut var);
        self.members
            .get_or_insert_with(BTreeMap::new)
            .insert(var.name.clone(), var);
    }

    pub(crate) fn add_inherited_private(&mut self, mut var: Variable) {
        self.adopt(&mut var);
        self.inherited_privates
            .get_or_insert_with(BTreeMap::new)
            .entry(var.name.clone())
            .or_default()
            .push(var);
    }

    fn adopt(&self, var: &mut Variable) {
        var.parent_id = self.non_proto_id;
        let child_non_proto = self.child_non_proto_id(var);
        if let VariableValue::Inline(value) = &mut var.value {
            value.non_proto_id = child_non_proto;
        }
    }

    /// `__proto__` chains resolve to the object that owns them, so members
    /// found through a prototype still report their real owner.
    pub(crate) fn child_non_proto_id(&self, var: &Variable) -> ValueId {
        if var.name == "__proto__" {
            self.non_proto_id
        } else {
            var.value_id()
        }
    }

    pub(crate) fn remove_all_members(&mut self) {
        self.members = None;
        self.inherited_privates = None;
    }

    /// The class chain from most to least derived. Without `all_levels`
    /// only the classes that declared members are returned.
    pub fn class_hierarchy(&self, all_levels: bool) -> &[String] {
        match &self.class_hierarchy {
            Some(classes) if all_levels => classes,
            Some(classes) => &classes[..self.levels_with_members.min(classes.len())],
            None => &[],
        }
    }

    pub fn has_class_hierarchy(&self) -> bool {
        self.class_hierarchy.is_some()
    }

    pub(crate) fn set_class_hierarchy(&mut self, classes: Vec<String>, levels_with_members: usize) {
        self.class_hierarchy = Some(classes);
        self.levels_with_members = levels_with_members;
    }

    /// ECMAScript `ToBoolean`.
    pub fn to_boolean(&self) -> bool {
        match &self.payload {
            Payload::Boolean(b) => *b,
            Payload::Number(n) => *n != 0.0 && !n.is_nan(),
            Payload::String(s) => !s.is_empty(),
            Payload::Null | Payload::Undefined => false,
            Payload::Object(_) => true,
        }
    }

    /// ECMAScript `ToNumber` for scalars; objects convert to `NaN`.
    pub fn to_number(&self) -> f64 {
        match &self.payload {
            Payload::Number(n) => *n,
            Payload::Boolean(b) => f64::from(u8::from(*b)),
            Payload::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Payload::Null => 0.0,
            Payload::Undefined | Payload::Object(_) => f64::NAN,
        }
    }
}

fn primitive_type(payload: &Payload) -> (VariableType, &'static str) {
    match payload {
        Payload::Number(_) => (VariableType::Number, "Number"),
        Payload::Boolean(_) => (VariableType::Boolean, "Boolean"),
        Payload::String(_) => (VariableType::String, "String"),
        Payload::Null => (VariableType::Null, "null"),
        Payload::Undefined => (VariableType::Undefined, "undefined"),
        Payload::Object(_) => (VariableType::Object, "Object"),
    }
}

pub(crate) fn primitive_description(payload: &Payload) -> (VariableType, String, String) {
    let (kind, type_name) = primitive_type(payload);
    (kind, type_name.to_string(), String::new())
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// How a variable holds its value.
#[derive(Clone, Debug, PartialEq)]
pub enum VariableValue {
    Inline(Box<Value>),
    /// An entry of the isolate's value table.
    Ref(ValueId),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    name: String,
    raw_name: String,
    namespace: String,
    attributes: u32,
    defining_class: Option<String>,
    level: u8,
    parent_id: ValueId,
    value: VariableValue,
    fired_getter: bool,
    isolate: IsolateId,
}

impl Variable {
    /// Builds a variable from its wire name. Non-public names arrive as
    /// `namespace::name`; the namespace is cut at its first `@`.
    pub fn new(raw_name: impl Into<String>, attributes: u32, value: VariableValue, isolate: IsolateId) -> Self {
        let raw_name = raw_name.into();
        let mut name = raw_name.clone();
        let mut namespace = String::new();
        if attributes & SCOPE_MASK != PUBLIC_SCOPE {
            if let Some(split) = raw_name.rfind("::") {
                let ns = &raw_name[..split];
                namespace = match ns.find('@') {
                    Some(at) => ns[..at].to_string(),
                    None => ns.to_string(),
                };
                name = raw_name[split + 2..].to_string();
            }
        }
        Self {
            name,
            raw_name,
            namespace,
            attributes,
            defining_class: None,
            level: 0,
            parent_id: UNKNOWN_ID,
            value,
            fired_getter: false,
            isolate,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// The name as the player spelled it, needed when talking back to it.
    pub fn raw_name(&self) -> &str {
        &self.raw_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn qualified_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.namespace, self.name)
        }
    }

    pub fn attributes(&self) -> u32 {
        self.attributes
    }

    pub(crate) fn set_attributes(&mut self, attributes: u32) {
        self.attributes = attributes;
        if let VariableValue::Inline(value) = &mut self.value {
            value.set_attributes(attributes);
        }
    }

    pub fn scope(&self) -> u32 {
        self.attributes & SCOPE_MASK
    }

    /// Scope constants compare as a whole; other bits as a mask.
    pub fn is_attribute_set(&self, attribute: u32) -> bool {
        if attribute & SCOPE_MASK == attribute {
            self.scope() == attribute
        } else {
            self.attributes & attribute == attribute
        }
    }

    pub(crate) fn set_attribute(&mut self, attribute: u32) {
        if attribute & SCOPE_MASK == attribute {
            self.attributes = (self.attributes & !SCOPE_MASK) | attribute;
        } else {
            self.attributes |= attribute;
        }
    }

    pub(crate) fn clear_attribute(&mut self, attribute: u32) {
        if attribute & SCOPE_MASK == attribute {
            self.attributes = (self.attributes & !SCOPE_MASK) | PUBLIC_SCOPE;
        } else {
            self.attributes &= !attribute;
        }
    }

    pub(crate) fn make_public(&mut self) {
        self.attributes = (self.attributes & !SCOPE_MASK) | PUBLIC_SCOPE;
        self.namespace.clear();
    }

    pub fn defining_class(&self) -> Option<&str> {
        self.defining_class.as_deref()
    }

    /// Inheritance depth of the declaring class; 0 is the object's own
    /// class.
    pub fn level(&self) -> u8 {
        self.level
    }

    pub(crate) fn set_defining_class(&mut self, level: usize, class: Option<String>) {
        self.level = level.min(usize::from(u8::MAX)) as u8;
        self.defining_class = class;
    }

    /// The object this variable was attached to, skipping `__proto__` hops.
    pub fn parent_id(&self) -> ValueId {
        self.parent_id
    }

    pub fn value(&self) -> &VariableValue {
        &self.value
    }

    pub fn value_id(&self) -> ValueId {
        match &self.value {
            VariableValue::Inline(value) => value.id(),
            VariableValue::Ref(id) => *id,
        }
    }

    pub fn isolate(&self) -> IsolateId {
        self.isolate
    }

    pub fn needs_to_invoke_getter(&self) -> bool {
        self.is_attribute_set(HAS_GETTER) && self.value_id() != UNKNOWN_ID && !self.fired_getter
    }

    pub(crate) fn mark_getter_fired(&mut self, value: Value) {
        self.value = VariableValue::Inline(Box::new(value));
        self.fired_getter = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn object(id: ValueId) -> VariableValue {
        VariableValue::Ref(id)
    }

    #[test]
    fn pseudo_ids() {
        assert!(is_pseudo_id(THIS_ID));
        assert!(is_pseudo_id(frame_root_id(3)));
        assert!(is_pseudo_id(LEVEL_ID));
        assert!(!is_pseudo_id(UNKNOWN_ID));
        assert!(!is_pseudo_id(-65535));
        assert!(!is_pseudo_id(0x1000));
        assert_eq!(frame_root_id(2), -12);
    }

    #[test]
    fn numbers_print_like_the_player() {
        assert_eq!(Payload::Number(3.0).as_string(), "3");
        assert_eq!(Payload::Number(-0.5).as_string(), "-0.5");
        assert_eq!(Payload::Number(f64::NAN).as_string(), "NaN");
        assert_eq!(Payload::Number(f64::NEG_INFINITY).as_string(), "-Infinity");
        assert_eq!(Payload::Object(0x1000).as_string(), "4096");
        assert_eq!(Payload::Null.as_string(), "null");
    }

    #[test]
    fn wire_type_names() {
        assert_eq!(VariableType::MovieClip.wire_name(), "movieclip");
        assert_eq!(VariableType::Unknown.wire_name(), "undefined");
        let v = Value::primitive(Payload::Boolean(true), 0);
        assert_eq!(v.kind(), VariableType::Boolean);
        assert_eq!(v.type_name(), "Boolean");
        assert!(v.to_boolean());
    }

    #[test]
    fn namespaced_names_are_split_unless_public() {
        let private = Variable::new("pkg.Foo@123::secret", PRIVATE_SCOPE, object(5), 0);
        assert_eq!(private.name(), "secret");
        assert_eq!(private.namespace(), "pkg.Foo");
        assert_eq!(private.raw_name(), "pkg.Foo@123::secret");
        assert_eq!(private.qualified_name(), "pkg.Foo::secret");

        let public = Variable::new("a::b", PUBLIC_SCOPE, object(5), 0);
        assert_eq!(public.name(), "a::b");
        assert_eq!(public.namespace(), "");
    }

    #[test]
    fn scope_attributes_compare_whole() {
        let mut var = Variable::new("x", PROTECTED_SCOPE | IS_LOCAL, object(1), 0);
        assert!(var.is_attribute_set(PROTECTED_SCOPE));
        assert!(!var.is_attribute_set(PRIVATE_SCOPE));
        assert!(var.is_attribute_set(IS_LOCAL));

        var.clear_attribute(PROTECTED_SCOPE);
        assert!(var.is_attribute_set(PUBLIC_SCOPE));
        var.set_attribute(INTERNAL_SCOPE);
        assert_eq!(var.scope(), INTERNAL_SCOPE);
        var.clear_attribute(IS_LOCAL);
        assert!(!var.is_attribute_set(IS_LOCAL));
    }

    #[test]
    fn members_sort_case_insensitively_and_track_owner() {
        let mut parent = Value::placeholder(7, 0);
        assert!(!parent.members_obtained());
        parent.add_member(Variable::new("b", 0, object(8), 0));
        parent.add_member(Variable::new("A", 0, object(9), 0));
        parent.add_member(Variable::new(
            "c",
            0,
            VariableValue::Inline(Box::new(Value::primitive(Payload::Number(1.0), 0))),
            0,
        ));

        let names: Vec<&str> = parent.members().iter().map(|v| v.name()).collect();
        assert_eq!(names, vec!["A", "b", "c"]);
        assert!(parent.members_obtained());
        assert_eq!(parent.find_member("b").unwrap().parent_id(), 7);

        parent.remove_all_members();
        assert!(!parent.members_obtained());
        assert_eq!(parent.member_count(), 0);
    }

    #[test]
    fn partial_class_hierarchy() {
        let mut value = Value::placeholder(7, 0);
        assert!(value.class_hierarchy(true).is_empty());
        value.set_class_hierarchy(vec!["B".into(), "A".into(), "Object".into()], 2);
        assert_eq!(value.class_hierarchy(false), &["B".to_string(), "A".to_string()]);
        assert_eq!(value.class_hierarchy(true).len(), 3);
    }
}
