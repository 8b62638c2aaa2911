use serde::Deserialize;
use zbus::fdo::IntrospectableProxy;

use crate::{item::ItemAddress, names::Protocol};

#[derive(Deserialize)]
struct DBusNode {
    #[serde(default)]
    interface: Vec<DBusInterface>,

    #[serde(default)]
    node: Vec<DBusNode>,

    #[serde(rename = "@name")]
    name: Option<String>,
}

#[derive(Deserialize)]
struct DBusInterface {
    #[serde(rename = "@name")]
    name: String,
}

/// Which item interface, if any, a node of introspection data implements.
fn item_interface(node: &DBusNode) -> Option<&'static str> {
    Protocol::ALL
        .iter()
        .map(|protocol| protocol.item_interface())
        .find(|wanted| node.interface.iter().any(|interface| interface.name == *wanted))
}

fn parse(xml: &str) -> zbus::Result<DBusNode> {
    quick_xml::de::from_str::<DBusNode>(xml).map_err(|err| zbus::Error::Failure(err.to_string()))
}

/// Walk the object tree of `service` from `/`, depth first, looking for an object that implements
/// a StatusNotifierItem interface.
pub(super) async fn resolve_pathless_address(con: &zbus::Connection, service: &str) -> zbus::Result<Option<ItemAddress>> {
    resolve_below(con, service, "/".to_owned()).await
}

async fn resolve_below(con: &zbus::Connection, service: &str, path: String) -> zbus::Result<Option<ItemAddress>> {
    let introspection_xml =
        IntrospectableProxy::builder(con).destination(service)?.path(path.as_str())?.build().await?.introspect().await?;
    let dbus_node = parse(&introspection_xml)?;

    if let Some(interface) = item_interface(&dbus_node) {
        return Ok(Some(ItemAddress { service: service.to_owned(), path, interface }));
    }

    for node in dbus_node.node {
        if let Some(name) = node.name {
            if name == "StatusNotifierItem" {
                // If this exists, then there's a good chance DBus may not think anything
                // implements the desired interface, so just bubble this up instead.
                return Ok(Some(ItemAddress {
                    service: service.to_owned(),
                    path: join_to_path(&path, &name),
                    interface: Protocol::Kde.item_interface(),
                }));
            }

            let found = Box::pin(resolve_below(con, service, join_to_path(&path, &name))).await?;
            if found.is_some() {
                return Ok(found);
            }
        }
    }

    Ok(None)
}

fn join_to_path(path: &str, name: &str) -> String {
    // Make sure we don't double-up on the leading slash
    format!("{path}/{name}", path = if path == "/" { "" } else { path })
}

#[cfg(test)]
mod test {
    use super::*;

    const XML: &str = r#"<!DOCTYPE node PUBLIC "-//freedesktop//DTD D-BUS Object Introspection 1.0//EN"
 "http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd">
<node>
  <interface name="org.freedesktop.DBus.Introspectable">
    <method name="Introspect"><arg name="xml_data" type="s" direction="out"/></method>
  </interface>
  <interface name="org.freedesktop.StatusNotifierItem">
    <property name="Status" type="s" access="read"/>
  </interface>
  <node name="MenuBar"/>
</node>"#;

    #[test]
    fn test_parse_introspection() {
        let node = parse(XML).unwrap();
        assert_eq!(item_interface(&node), Some("org.freedesktop.StatusNotifierItem"));
        assert_eq!(node.node.len(), 1);
        assert_eq!(node.node[0].name.as_deref(), Some("MenuBar"));
        assert_eq!(item_interface(&node.node[0]), None);
    }

    #[test]
    fn test_join_to_path() {
        assert_eq!(join_to_path("/", "org"), "/org");
        assert_eq!(join_to_path("/org", "ayatana"), "/org/ayatana");
    }
}
