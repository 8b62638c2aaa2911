//! The `StatusNotifierWatcher` service, served under both vendor namespaces.
//!
//! A watcher only tracks what tray items and hosts exist. It doesn't have any logic for displaying
//! items (for that, see [`Tray`][`crate::Tray`]). If some other process already owns the watcher
//! name, we defer to it and our instance just sits in the queue.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use zbus::{interface, Interface};

use crate::{
    item::{canonical_id, id_belongs_to},
    names::{self, Protocol},
};

/// Result of registering an item with a [`WatcherState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    New(String),
    Known(String),
}

/// What a watcher dropped after a bus name lost its owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lost {
    pub items: Vec<String>,
    pub hosts: Vec<String>,
}

/// The bookkeeping of one watcher, without any bus plumbing.
#[derive(Debug)]
pub struct WatcherState {
    protocol: Protocol,
    items: Vec<String>,
    hosts: Vec<String>,
}

impl WatcherState {
    pub fn new(protocol: Protocol) -> Self {
        WatcherState { protocol, items: Vec::new(), hosts: Vec::new() }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn has_hosts(&self) -> bool {
        !self.hosts.is_empty()
    }

    /// Track the item `service`, as sent by `sender`. Returns `None` if no id can be made of it.
    pub fn register_item(&mut self, sender: Option<&str>, service: &str) -> Option<Registration> {
        let id = canonical_id(self.protocol, sender, service)?;
        if self.items.contains(&id) {
            return Some(Registration::Known(id));
        }
        self.items.push(id.clone());
        Some(Registration::New(id))
    }

    /// Returns `false` if the host was already known.
    pub fn register_host(&mut self, name: &str) -> bool {
        if name.is_empty() || self.hosts.iter().any(|host| host == name) {
            return false;
        }
        self.hosts.push(name.to_owned());
        true
    }

    pub fn on_owner_lost(&mut self, name: &str) -> Lost {
        let (items, kept): (Vec<String>, Vec<String>) =
            self.items.drain(..).partition(|id| id_belongs_to(id, name));
        self.items = kept;
        let (hosts, kept): (Vec<String>, Vec<String>) = self.hosts.drain(..).partition(|host| host == name);
        self.hosts = kept;
        Lost { items, hosts }
    }
}

fn lock(state: &Mutex<WatcherState>) -> MutexGuard<'_, WatcherState> {
    // the state is always left consistent, so a poisoned lock is still usable
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Both namespaces serve the exact same interface under a different name.
macro_rules! watcher_interface {
    ($(#[$meta:meta])* $watcher:ident, $protocol:expr, $interface:tt) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $watcher {
            tasks: tokio::task::JoinSet<()>,

            // Intentionally using std::sync::Mutex instead of tokio's async mutex, since we don't
            // need to hold the mutex across an await.
            state: Arc<Mutex<WatcherState>>,
        }

        impl Default for $watcher {
            fn default() -> Self {
                $watcher { tasks: tokio::task::JoinSet::new(), state: Arc::new(Mutex::new(WatcherState::new($protocol))) }
            }
        }

        #[interface(name = $interface)]
        impl $watcher {
            /// RegisterStatusNotifierHost method
            async fn register_status_notifier_host(
                &self,
                service: &str,
                #[zbus(signal_context)] ctxt: zbus::SignalContext<'_>,
            ) -> zbus::fdo::Result<()> {
                let added_first = {
                    let mut state = lock(&self.state);
                    if !state.register_host(service) {
                        return Ok(());
                    }
                    state.hosts.len() == 1
                };
                log::info!("{} watcher: new host {}", $protocol, service);

                if added_first {
                    self.is_status_notifier_host_registered_changed(&ctxt).await?;
                }
                Self::status_notifier_host_registered(&ctxt).await?;
                Ok(())
            }

            /// StatusNotifierHostRegistered signal.
            #[zbus(signal)]
            async fn status_notifier_host_registered(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()>;

            /// StatusNotifierHostUnregistered signal
            #[zbus(signal)]
            async fn status_notifier_host_unregistered(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()>;

            /// IsStatusNotifierHostRegistered property
            #[zbus(property)]
            async fn is_status_notifier_host_registered(&self) -> bool {
                lock(&self.state).has_hosts()
            }

            // ------------------------------------------------------------------------

            /// RegisterStatusNotifierItem method
            async fn register_status_notifier_item(
                &self,
                service: &str,
                #[zbus(header)] hdr: zbus::message::Header<'_>,
                #[zbus(signal_context)] ctxt: zbus::SignalContext<'_>,
            ) -> zbus::fdo::Result<()> {
                let sender = hdr.sender().map(|sender| sender.as_str());
                let registration = lock(&self.state).register_item(sender, service);
                match registration {
                    None => {
                        log::warn!("{} watcher: cannot register item {:?} from {:?}", $protocol, service, sender);
                        Err(zbus::fdo::Error::InvalidArgs(format!("invalid item {:?}", service)))
                    }
                    Some(Registration::Known(id)) => {
                        log::debug!("{} watcher: new item {} (duplicate)", $protocol, id);
                        Ok(())
                    }
                    Some(Registration::New(id)) => {
                        log::info!("{} watcher: new item {}", $protocol, id);
                        self.registered_status_notifier_items_changed(&ctxt).await?;
                        Self::status_notifier_item_registered(&ctxt, &id).await?;
                        Ok(())
                    }
                }
            }

            /// StatusNotifierItemRegistered signal
            #[zbus(signal)]
            async fn status_notifier_item_registered(ctxt: &zbus::SignalContext<'_>, service: &str) -> zbus::Result<()>;

            /// StatusNotifierItemUnregistered signal
            #[zbus(signal)]
            async fn status_notifier_item_unregistered(ctxt: &zbus::SignalContext<'_>, service: &str) -> zbus::Result<()>;

            /// RegisteredStatusNotifierItems property
            #[zbus(property)]
            async fn registered_status_notifier_items(&self) -> Vec<String> {
                lock(&self.state).items().to_vec()
            }

            // ------------------------------------------------------------------------

            /// ProtocolVersion property
            #[zbus(property)]
            fn protocol_version(&self) -> i32 {
                0
            }
        }

        impl $watcher {
            pub fn new() -> Self {
                Default::default()
            }

            /// Attach and run the watcher (in the background) on a connection. Returns whether we
            /// became the owner of the watcher name right away.
            pub async fn attach_to(mut self, con: &zbus::Connection) -> zbus::Result<bool> {
                self.tasks.spawn(Self::track_owners(con.clone(), self.state.clone()));

                if !con.object_server().at(names::WATCHER_OBJECT, self).await? {
                    return Err(zbus::Error::Failure(format!(
                        "Object already exists at {} on this connection -- is {} already running?",
                        names::WATCHER_OBJECT,
                        $interface
                    )));
                }

                // not AllowReplacement, not ReplaceExisting, not DoNotQueue
                let flags: [zbus::fdo::RequestNameFlags; 0] = [];
                match con.request_name_with_flags($protocol.watcher_bus(), flags.into_iter().collect()).await {
                    Ok(zbus::fdo::RequestNameReply::PrimaryOwner) => {
                        log::info!("{} watcher: serving {}", $protocol, $protocol.watcher_bus());
                        Ok(true)
                    }
                    Ok(_) | Err(zbus::Error::NameTaken) => {
                        log::info!("{} watcher: {} is already owned, deferring", $protocol, $protocol.watcher_bus());
                        Ok(false)
                    }
                    Err(e) => Err(e),
                }
            }

            /// Drop items and hosts whose bus name went away, for as long as the connection lives.
            async fn track_owners(con: zbus::Connection, state: Arc<Mutex<WatcherState>>) {
                if let Err(e) = Self::watch_owners(&con, &state).await {
                    log::error!("{} watcher: stopped tracking name owners: {}", $protocol, e);
                }
            }

            async fn watch_owners(con: &zbus::Connection, state: &Mutex<WatcherState>) -> zbus::Result<()> {
                let ctxt = zbus::SignalContext::new(con, names::WATCHER_OBJECT)?;
                let dbus = zbus::fdo::DBusProxy::new(con).await?;
                let mut owner_changes = dbus.receive_name_owner_changed().await?;
                while let Some(signal) = owner_changes.next().await {
                    let args = match signal.args() {
                        Ok(args) => args,
                        Err(e) => {
                            log::warn!("{} watcher: malformed NameOwnerChanged: {}", $protocol, e);
                            continue;
                        }
                    };
                    if args.new_owner().is_some() {
                        continue;
                    }
                    let lost = lock(state).on_owner_lost(args.name().as_str());
                    if let Err(e) = Self::announce_lost(&ctxt, &lost).await {
                        log::error!("failed to signal Watcher: {}", e);
                    }
                }
                Ok(())
            }

            async fn announce_lost(ctxt: &zbus::SignalContext<'_>, lost: &Lost) -> zbus::Result<()> {
                for item in &lost.items {
                    log::info!("{} watcher: gone item {}", $protocol, item);
                    Self::status_notifier_item_unregistered(ctxt, item).await?;
                }
                if !lost.items.is_empty() {
                    Self::refresh(ctxt, "RegisteredStatusNotifierItems").await?;
                }
                for host in &lost.hosts {
                    log::info!("{} watcher: lost host {}", $protocol, host);
                    Self::status_notifier_host_unregistered(ctxt).await?;
                }
                if !lost.hosts.is_empty() {
                    Self::refresh(ctxt, "IsStatusNotifierHostRegistered").await?;
                }
                Ok(())
            }

            /// Equivalent to the generated `*_invalidate` methods, but without requiring `self`.
            async fn refresh(ctxt: &zbus::SignalContext<'_>, property: &str) -> zbus::Result<()> {
                zbus::fdo::Properties::properties_changed(
                    ctxt,
                    Self::name(),
                    &std::collections::HashMap::new(),
                    &[property],
                )
                .await
            }
        }
    };
}

watcher_interface!(
    /// An instance of [`org.kde.StatusNotifierWatcher`].
    ///
    /// [`org.kde.StatusNotifierWatcher`]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierWatcher/
    KdeWatcher,
    Protocol::Kde,
    "org.kde.StatusNotifierWatcher"
);

watcher_interface!(
    /// An instance of `org.freedesktop.StatusNotifierWatcher`.
    FreedesktopWatcher,
    Protocol::Freedesktop,
    "org.freedesktop.StatusNotifierWatcher"
);

/// Serve a watcher for both namespaces on `con`. Each namespace is attached on its own, so one
/// failing is logged and leaves the other in place. Returns the namespaces whose watcher name we own.
pub async fn attach_watchers(con: &zbus::Connection) -> Vec<Protocol> {
    let kde = KdeWatcher::new().attach_to(con).await;
    let freedesktop = FreedesktopWatcher::new().attach_to(con).await;
    owned_namespaces([(Protocol::Kde, kde), (Protocol::Freedesktop, freedesktop)])
}

fn owned_namespaces(results: impl IntoIterator<Item = (Protocol, zbus::Result<bool>)>) -> Vec<Protocol> {
    results
        .into_iter()
        .filter_map(|(protocol, result)| match result {
            Ok(owned) => owned.then_some(protocol),
            Err(e) => {
                log::error!("{} watcher: failed to attach: {}", protocol, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_failed_namespace_does_not_stop_the_other() {
        let results = [
            (Protocol::Kde, Err(zbus::Error::Failure("object already exists".to_string()))),
            (Protocol::Freedesktop, Ok(true)),
        ];
        assert_eq!(owned_namespaces(results), vec![Protocol::Freedesktop]);
        assert_eq!(owned_namespaces([(Protocol::Kde, Ok(true)), (Protocol::Freedesktop, Ok(false))]), vec![Protocol::Kde]);
    }

    #[test]
    fn test_kde_ids() {
        let mut state = WatcherState::new(Protocol::Kde);
        assert_eq!(
            state.register_item(Some(":1.5"), "/org/ayatana/NotificationItem/nm"),
            Some(Registration::New(":1.5/org/ayatana/NotificationItem/nm".to_string()))
        );
        assert_eq!(
            state.register_item(Some(":1.9"), "org.example.App"),
            Some(Registration::New("org.example.App/StatusNotifierItem".to_string()))
        );
        assert_eq!(
            state.register_item(Some(":1.9"), "org.example.App/StatusNotifierItem"),
            Some(Registration::Known("org.example.App/StatusNotifierItem".to_string()))
        );
        assert_eq!(state.items().len(), 2);
    }

    #[test]
    fn test_freedesktop_ids() {
        let mut state = WatcherState::new(Protocol::Freedesktop);
        assert_eq!(state.register_item(Some(":1.5"), ":1.5"), Some(Registration::New(":1.5".to_string())));
        assert_eq!(state.register_item(Some(":1.5"), ":1.5"), Some(Registration::Known(":1.5".to_string())));
        assert_eq!(state.register_item(None, "/StatusNotifierItem"), None);
        assert_eq!(state.register_item(Some(":1.5"), ""), None);
    }

    #[test]
    fn test_owner_lost() {
        let mut state = WatcherState::new(Protocol::Kde);
        state.register_item(Some(":1.5"), "/a");
        state.register_item(Some(":1.5"), "/b");
        state.register_item(Some(":1.50"), "/a");
        assert!(state.register_host("org.kde.StatusNotifierHost-1"));
        assert!(!state.register_host("org.kde.StatusNotifierHost-1"));

        let lost = state.on_owner_lost(":1.5");
        assert_eq!(lost, Lost { items: vec![":1.5/a".to_string(), ":1.5/b".to_string()], hosts: vec![] });
        assert_eq!(state.items(), &[":1.50/a".to_string()]);

        let lost = state.on_owner_lost("org.kde.StatusNotifierHost-1");
        assert_eq!(lost.hosts, vec!["org.kde.StatusNotifierHost-1".to_string()]);
        assert!(!state.has_hosts());
        assert_eq!(state.on_owner_lost(":1.5"), Lost::default());
    }
}
