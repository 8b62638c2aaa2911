use std::collections::HashMap;

/// A property value of a DBusMenu entry, as far as the tray understands them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuValue {
    Str(String),
    Bool(bool),
    Int(i32),
    Bytes(Vec<u8>),
}

impl MenuValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MenuValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MenuValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            MenuValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

pub type PropertyMap = HashMap<String, MenuValue>;

/// One `(ia{sv}av)` node of a `GetLayout` reply, decoded but not yet interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LayoutNode {
    pub id: i32,
    pub properties: PropertyMap,
    pub children: Vec<LayoutNode>,
}

impl LayoutNode {
    pub fn new(id: i32, properties: PropertyMap, children: Vec<LayoutNode>) -> Self {
        LayoutNode { id, properties, children }
    }
}
