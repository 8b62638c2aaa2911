//! Turning zvariant values from the wire into the tray's own types.

use std::collections::HashMap;

use zbus::zvariant::{OwnedValue, Value};

use crate::{
    bus::Signal,
    item::{ItemProperty, Pixmap, PropertyValue},
    menu::{LayoutNode, MenuValue, PropertyMap},
};

/// `GetLayout` replies with `(u(ia{sv}av))`.
pub(super) type RawLayout = (u32, (i32, HashMap<String, OwnedValue>, Vec<OwnedValue>));

type RawPropertiesUpdated = (Vec<(i32, HashMap<String, OwnedValue>)>, Vec<(i32, Vec<String>)>);

/// Strip any number of variant wrappers.
fn unwrap_variant<'a>(value: &'a Value<'a>) -> &'a Value<'a> {
    match value {
        Value::Value(inner) => unwrap_variant(inner),
        other => other,
    }
}

fn string(value: &Value<'_>) -> Option<String> {
    match unwrap_variant(value) {
        Value::Str(s) => Some(s.to_string()),
        Value::ObjectPath(path) => Some(path.to_string()),
        _ => None,
    }
}

fn bytes(value: &Value<'_>) -> Option<Vec<u8>> {
    match unwrap_variant(value) {
        Value::Array(array) => array
            .inner()
            .iter()
            .map(|byte| match byte {
                Value::U8(b) => Some(*b),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

pub(super) fn strings(value: &Value<'_>) -> Option<Vec<String>> {
    match unwrap_variant(value) {
        Value::Array(array) => Some(array.inner().iter().filter_map(string).collect()),
        _ => None,
    }
}

fn pixmaps(value: &Value<'_>) -> Option<Vec<Pixmap>> {
    let array = match unwrap_variant(value) {
        Value::Array(array) => array,
        _ => return None,
    };
    let pixmaps = array
        .inner()
        .iter()
        .filter_map(|entry| {
            let fields = match unwrap_variant(entry) {
                Value::Structure(s) => s.fields(),
                _ => return None,
            };
            match fields {
                [Value::I32(width), Value::I32(height), data] => {
                    let pixmap = Pixmap::from_network_bytes(*width, *height, &bytes(data)?);
                    if pixmap.is_none() {
                        log::debug!("skipping {}x{} pixmap", width, height);
                    }
                    pixmap
                }
                _ => None,
            }
        })
        .collect();
    Some(pixmaps)
}

/// Decode the value of an item property. `None` means the value had an unexpected type.
pub(super) fn property(property: ItemProperty, value: &Value<'_>) -> Option<PropertyValue> {
    match property {
        ItemProperty::ItemIsMenu => match unwrap_variant(value) {
            Value::Bool(b) => Some(PropertyValue::Flag(*b)),
            _ => None,
        },
        ItemProperty::IconPixmap | ItemProperty::AttentionIconPixmap => pixmaps(value).map(PropertyValue::Pixmaps),
        ItemProperty::Status
        | ItemProperty::Title
        | ItemProperty::IconName
        | ItemProperty::AttentionIconName
        | ItemProperty::IconThemePath
        | ItemProperty::Menu => string(value).map(PropertyValue::Text),
    }
}

pub(super) fn menu_value(value: &Value<'_>) -> Option<MenuValue> {
    match unwrap_variant(value) {
        Value::Str(s) => Some(MenuValue::Str(s.to_string())),
        Value::Bool(b) => Some(MenuValue::Bool(*b)),
        Value::I32(i) => Some(MenuValue::Int(*i)),
        Value::Array(_) => bytes(value).map(MenuValue::Bytes),
        _ => None,
    }
}

fn property_map<'a>(entries: impl Iterator<Item = (&'a str, &'a Value<'a>)>) -> PropertyMap {
    entries
        .filter_map(|(key, value)| match menu_value(value) {
            Some(value) => Some((key.to_owned(), value)),
            None => {
                log::debug!("ignoring menu property {:?} of unsupported type", key);
                None
            }
        })
        .collect()
}

/// Decode one `(ia{sv}av)` child of a layout.
fn layout_node(value: &Value<'_>) -> Option<LayoutNode> {
    let fields = match unwrap_variant(value) {
        Value::Structure(s) => s.fields(),
        _ => return None,
    };
    let (id, properties, children) = match fields {
        [Value::I32(id), properties, children] => (*id, properties, children),
        _ => return None,
    };
    let properties = match properties {
        Value::Dict(dict) => property_map(dict.iter().filter_map(|(key, value)| match key {
            Value::Str(key) => Some((key.as_str(), value)),
            _ => None,
        })),
        _ => PropertyMap::new(),
    };
    let children = match children {
        Value::Array(array) => array.inner().iter().filter_map(layout_node).collect(),
        _ => Vec::new(),
    };
    Some(LayoutNode::new(id, properties, children))
}

pub(super) fn layout((revision, (id, properties, children)): &RawLayout) -> (u32, LayoutNode) {
    let properties = property_map(properties.iter().map(|(key, value)| (key.as_str(), &**value)));
    let children = children.iter().filter_map(|child| layout_node(child)).collect();
    (*revision, LayoutNode::new(*id, properties, children))
}

fn properties_updated((updated, removed): RawPropertiesUpdated) -> Signal {
    let updated = updated
        .into_iter()
        .map(|(id, properties)| (id, property_map(properties.iter().map(|(key, value)| (key.as_str(), &**value)))))
        .collect();
    Signal::ItemsPropertiesUpdated { updated, removed }
}

/// Decode a signal we subscribed to. Unknown members and malformed bodies give `None`.
pub(super) fn signal(msg: &zbus::Message) -> Option<Signal> {
    let header = msg.header();
    let member = header.member()?;
    let body = msg.body();
    let signal = match member.as_str() {
        "StatusNotifierItemRegistered" => body.deserialize::<String>().map(Signal::ItemRegistered),
        "StatusNotifierItemUnregistered" => body.deserialize::<String>().map(Signal::ItemUnregistered),
        "NameOwnerChanged" => body
            .deserialize::<(String, String, String)>()
            .map(|(name, old_owner, new_owner)| Signal::NameOwnerChanged { name, old_owner, new_owner }),
        "NewIcon" => Ok(Signal::NewIcon),
        "NewAttentionIcon" => Ok(Signal::NewAttentionIcon),
        "NewTitle" => Ok(Signal::NewTitle),
        "NewStatus" => body.deserialize::<String>().map(Signal::NewStatus),
        "LayoutUpdated" => {
            body.deserialize::<(u32, i32)>().map(|(revision, parent)| Signal::LayoutUpdated { revision, parent })
        }
        "ItemsPropertiesUpdated" => body.deserialize::<RawPropertiesUpdated>().map(properties_updated),
        _ => return None,
    };
    match signal {
        Ok(signal) => Some(signal),
        Err(e) => {
            log::warn!("malformed {} signal: {}", member, e);
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::hashmap;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_menu_values() {
        assert_eq!(menu_value(&Value::from("Open")), Some(MenuValue::Str("Open".to_string())));
        assert_eq!(menu_value(&Value::from(false)), Some(MenuValue::Bool(false)));
        assert_eq!(menu_value(&Value::from(1i32)), Some(MenuValue::Int(1)));
        assert_eq!(menu_value(&Value::from(vec![1u8, 2, 3])), Some(MenuValue::Bytes(vec![1, 2, 3])));
        assert_eq!(menu_value(&Value::Value(Box::new(Value::from(true)))), Some(MenuValue::Bool(true)));
        assert_eq!(menu_value(&Value::from(1.5f64)), None);
    }

    #[test]
    fn test_item_properties() {
        assert_eq!(
            property(ItemProperty::Status, &Value::from("Active")),
            Some(PropertyValue::Text("Active".to_string()))
        );
        assert_eq!(property(ItemProperty::ItemIsMenu, &Value::from(true)), Some(PropertyValue::Flag(true)));
        assert_eq!(property(ItemProperty::ItemIsMenu, &Value::from("yes")), None);
        assert_eq!(
            property(ItemProperty::Menu, &Value::from(zbus::zvariant::ObjectPath::from_static_str_unchecked("/Menu"))),
            Some(PropertyValue::Text("/Menu".to_string()))
        );
    }

    #[test]
    fn test_pixmaps_keep_square_entries() {
        let value = Value::from(vec![(2i32, 2i32, vec![0xffu8, 0, 0, 0x10].repeat(4)), (2i32, 1i32, vec![0u8; 8])]);
        let decoded = property(ItemProperty::IconPixmap, &value).unwrap();
        assert_eq!(decoded, PropertyValue::Pixmaps(vec![Pixmap { size: 2, pixels: vec![0xff000010; 4] }]));
    }

    #[test]
    fn test_layout_children() {
        let child = Value::from((
            3i32,
            hashmap! { "label".to_string() => Value::from("_Quit") },
            Vec::<Value>::new(),
        ));
        let raw: RawLayout = (
            7,
            (
                0,
                hashmap! { "children-display".to_string() => OwnedValue::try_from(Value::from("submenu")).unwrap() },
                vec![OwnedValue::try_from(child).unwrap()],
            ),
        );
        let (revision, root) = layout(&raw);
        assert_eq!(revision, 7);
        assert_eq!(root.id, 0);
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].id, 3);
        assert_eq!(root.children[0].properties, hashmap! { "label".to_string() => MenuValue::Str("_Quit".to_string()) });
    }
}
