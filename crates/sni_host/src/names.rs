//! Well known bus names, object paths and interfaces used by the tray.

pub const WATCHER_OBJECT: &str = "/StatusNotifierWatcher";
pub const ITEM_OBJECT: &str = "/StatusNotifierItem";

pub const MENU_INTERFACE: &str = "com.canonical.dbusmenu";
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

pub const DBUS_BUS: &str = "org.freedesktop.DBus";
pub const DBUS_OBJECT: &str = "/org/freedesktop/DBus";
pub const DBUS_INTERFACE: &str = "org.freedesktop.DBus";

/// The two vendor namespaces the StatusNotifier protocol is published under. Both are served and
/// watched side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    Kde,
    Freedesktop,
}

impl Protocol {
    pub const ALL: [Protocol; 2] = [Protocol::Kde, Protocol::Freedesktop];

    pub fn namespace(self) -> &'static str {
        match self {
            Protocol::Kde => "org.kde",
            Protocol::Freedesktop => "org.freedesktop",
        }
    }

    /// Bus name of the watcher, which is also the name of its interface.
    pub fn watcher_bus(self) -> &'static str {
        match self {
            Protocol::Kde => "org.kde.StatusNotifierWatcher",
            Protocol::Freedesktop => "org.freedesktop.StatusNotifierWatcher",
        }
    }

    pub fn item_interface(self) -> &'static str {
        match self {
            Protocol::Kde => "org.kde.StatusNotifierItem",
            Protocol::Freedesktop => "org.freedesktop.StatusNotifierItem",
        }
    }

    /// From <https://www.freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierHost/>:
    ///
    /// Instances of this service are registered on the Dbus session bus, under a name on the
    /// form org.freedesktop.StatusNotifierHost-id where id is an unique identifier, that keeps
    /// the names unique on the bus, such as the process-id of the application.
    pub fn host_service(self, pid: u32) -> String {
        format!("{}.StatusNotifierHost-{}", self.namespace(), pid)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_host_service_names() {
        assert_eq!(Protocol::Kde.host_service(42), "org.kde.StatusNotifierHost-42");
        assert_eq!(Protocol::Freedesktop.host_service(7), "org.freedesktop.StatusNotifierHost-7");
        assert_eq!(Protocol::Kde.to_string(), "kde");
    }
}
