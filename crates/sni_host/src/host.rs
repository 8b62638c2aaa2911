//! Host side bookkeeping: the list of live tray items, and where each protocol namespace stands
//! in registering us with its watcher.

use std::collections::HashMap;

use crate::{
    item::{canonical_id, id_belongs_to, TrayItem},
    names::Protocol,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPhase {
    /// Waiting for the reply to our request for the host name.
    RequestingName,
    /// Name acquired, `RegisterStatusNotifierHost` in flight.
    Registering,
    Registered,
    /// Registration failed, likely because no watcher is running. Retried when a watcher appears.
    WaitingForWatcher,
    /// The host name could not be acquired. This namespace stays unavailable.
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostState {
    pub protocol: Protocol,
    pub name: Option<String>,
    pub phase: HostPhase,
}

/// The canonical list of tray items.
///
/// Items of both namespaces share one list, in registration order. No two entries ever share an
/// id, and every removal tolerates ids that are already gone, since explicit unregistration and
/// owner loss routinely race each other.
#[derive(Debug)]
pub struct Registry {
    items: Vec<TrayItem>,
    hosts: HashMap<Protocol, HostState>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let hosts = Protocol::ALL
            .into_iter()
            .map(|protocol| (protocol, HostState { protocol, name: None, phase: HostPhase::RequestingName }))
            .collect();
        Registry { items: Vec::new(), hosts }
    }

    /// Add an item announced by the watcher of `protocol`. Returns the id if the item is new, and
    /// `None` if it was already known or could not be understood.
    pub fn register_item(&mut self, protocol: Protocol, service: &str) -> Option<String> {
        let id = match canonical_id(protocol, None, service) {
            Some(id) => id,
            None => {
                log::warn!("ignoring item registration {:?} from {} watcher", service, protocol);
                return None;
            }
        };
        if self.contains(&id) {
            log::debug!("item {} is already registered", id);
            return None;
        }
        log::info!("new item: {}", id);
        self.items.push(TrayItem::new(&id));
        Some(id)
    }

    pub fn unregister_item(&mut self, id: &str) -> Option<TrayItem> {
        let pos = self.items.iter().position(|item| item.id == id)?;
        log::info!("gone item: {}", id);
        Some(self.items.remove(pos))
    }

    /// Remove every item owned by a bus name that just disappeared.
    pub fn on_owner_lost(&mut self, service: &str) -> Vec<TrayItem> {
        let (gone, kept): (Vec<TrayItem>, Vec<TrayItem>) =
            std::mem::take(&mut self.items).into_iter().partition(|item| id_belongs_to(&item.id, service));
        self.items = kept;
        for item in &gone {
            log::info!("gone item: {} (owner {} left the bus)", item.id, service);
        }
        gone
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&TrayItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TrayItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    pub fn items(&self) -> &[TrayItem] {
        &self.items
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut TrayItem> {
        self.items.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn host(&self, protocol: Protocol) -> &HostState {
        // unwrap: every protocol gets a state in `new`
        &self.hosts[&protocol]
    }

    pub fn host_mut(&mut self, protocol: Protocol) -> &mut HostState {
        self.hosts.entry(protocol).or_insert(HostState { protocol, name: None, phase: HostPhase::RequestingName })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(registry: &Registry) -> Vec<&str> {
        registry.items().iter().map(|item| item.id.as_str()).collect()
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = Registry::new();
        assert_eq!(registry.register_item(Protocol::Kde, ":1.5"), Some(":1.5/StatusNotifierItem".to_string()));
        assert_eq!(registry.register_item(Protocol::Kde, ":1.5"), None);
        assert_eq!(registry.register_item(Protocol::Kde, ":1.5/StatusNotifierItem"), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_tolerates_absent_ids() {
        let mut registry = Registry::new();
        assert!(registry.unregister_item("org.example.Nope").is_none());
        registry.register_item(Protocol::Freedesktop, "org.example.App");
        assert!(registry.unregister_item("org.example.App").is_some());
        assert!(registry.unregister_item("org.example.App").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ids_stay_unique_under_any_sequence() {
        let mut registry = Registry::new();
        let ops: &[(bool, &str)] = &[
            (false, ":1.9"),
            (true, ":1.9"),
            (true, ":1.9"),
            (true, ":1.10"),
            (false, ":1.9"),
            (false, ":1.9"),
            (true, ":1.9"),
            (true, ":1.10"),
        ];
        for &(register, id) in ops {
            if register {
                registry.register_item(Protocol::Freedesktop, id);
            } else {
                registry.unregister_item(id);
            }
            let mut seen = ids(&registry);
            let before = seen.len();
            seen.sort();
            seen.dedup();
            assert_eq!(seen.len(), before);
        }
        assert_eq!(ids(&registry), vec![":1.10", ":1.9"]);
    }

    #[test]
    fn test_owner_lost_matches_exact_and_path_forms() {
        let mut registry = Registry::new();
        registry.register_item(Protocol::Freedesktop, ":1.5");
        registry.register_item(Protocol::Kde, ":1.5/org/example/Item");
        registry.register_item(Protocol::Kde, ":1.50/StatusNotifierItem");
        registry.register_item(Protocol::Freedesktop, ":1.51");

        let gone: Vec<String> = registry.on_owner_lost(":1.5").into_iter().map(|item| item.id).collect();

        assert_eq!(gone, vec![":1.5".to_string(), ":1.5/org/example/Item".to_string()]);
        assert_eq!(ids(&registry), vec![":1.50/StatusNotifierItem", ":1.51"]);
        assert!(registry.on_owner_lost(":1.5").is_empty());
    }

    #[test]
    fn test_hosts_start_requesting_names() {
        let registry = Registry::new();
        for protocol in Protocol::ALL {
            assert_eq!(registry.host(protocol).phase, HostPhase::RequestingName);
        }
    }
}
