//! # The session bus, through zbus
//!
//! [`ZbusBus`] implements [`Bus`] on top of a [`zbus::Connection`]. Every call runs as its own
//! tokio task and reports back through an unbounded channel, which the owner of the
//! [`Tray`][crate::Tray] drains on its own thread.

use std::collections::HashMap;

use futures::StreamExt;
use tokio::{
    sync::mpsc,
    task::{AbortHandle, JoinSet},
};
use zbus::zvariant::{OwnedValue, Value};

use crate::{
    bus::{Bus, BusCall, BusEvent, BusSend, Reply, SignalMatch, SubscriptionId, Token},
    error::BusError,
    names::{self, Protocol},
};

mod decode;
mod introspect;

pub struct ZbusBus {
    con: zbus::Connection,
    events: mpsc::UnboundedSender<BusEvent>,
    calls: HashMap<Token, AbortHandle>,
    subscriptions: HashMap<SubscriptionId, AbortHandle>,
    sends: JoinSet<()>,
}

impl ZbusBus {
    /// Wrap `con`. Replies and signals show up on the returned receiver.
    pub fn new(con: zbus::Connection) -> (Self, mpsc::UnboundedReceiver<BusEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let bus = ZbusBus { con, events, calls: HashMap::new(), subscriptions: HashMap::new(), sends: JoinSet::new() };
        (bus, receiver)
    }

    pub fn connection(&self) -> &zbus::Connection {
        &self.con
    }

    /// Wait for every fire and forget call sent so far to go out.
    pub async fn flush(&mut self) {
        while self.sends.join_next().await.is_some() {}
    }
}

impl Bus for ZbusBus {
    fn call(&mut self, token: Token, call: BusCall) {
        self.calls.retain(|_, handle| !handle.is_finished());
        log::debug!("{}: {:?}", token, call);
        let con = self.con.clone();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let result = perform(&con, call).await;
            if let Err(e) = &result {
                log::debug!("{} failed: {}", token, e);
            }
            // the receiver only goes away when the tray is shutting down
            let _ = events.send(BusEvent::Reply { token, result });
        });
        self.calls.insert(token, handle.abort_handle());
    }

    fn send(&mut self, send: BusSend) {
        let con = self.con.clone();
        self.sends.spawn(async move {
            log::debug!("sending {:?}", send);
            if let Err(e) = deliver(&con, &send).await {
                log::warn!("{:?} failed: {}", send, BusError::from(e));
            }
        });
        // reap what already went out
        while let Some(done) = self.sends.try_join_next() {
            if let Err(e) = done {
                log::warn!("send task failed: {}", e);
            }
        }
    }

    fn subscribe(&mut self, id: SubscriptionId, rule: SignalMatch) {
        let con = self.con.clone();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let ends_connection = rule == SignalMatch::NameOwnerChanged;
            if let Err(e) = listen(&con, id, &rule, &events).await {
                log::warn!("{} ({:?}) stopped: {}", id, rule, e);
            }
            if ends_connection {
                let _ = events.send(BusEvent::Disconnected);
            }
        });
        if let Some(previous) = self.subscriptions.insert(id, handle.abort_handle()) {
            previous.abort();
        }
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        if let Some(handle) = self.subscriptions.remove(&id) {
            handle.abort();
        }
    }

    fn cancel(&mut self, token: Token) {
        if let Some(handle) = self.calls.remove(&token) {
            handle.abort();
        }
    }
}

impl Drop for ZbusBus {
    fn drop(&mut self) {
        for handle in self.calls.values().chain(self.subscriptions.values()) {
            handle.abort();
        }
    }
}

async fn get_property(
    con: &zbus::Connection,
    service: &str,
    path: &str,
    interface: &str,
    property: &str,
) -> zbus::Result<OwnedValue> {
    let msg = con
        .call_method(Some(service), path, Some(names::PROPERTIES_INTERFACE), "Get", &(interface, property))
        .await?;
    msg.body().deserialize::<OwnedValue>()
}

async fn perform(con: &zbus::Connection, call: BusCall) -> Result<Reply, BusError> {
    match call {
        BusCall::RequestName { name } => {
            match con.request_name_with_flags(name.as_str(), zbus::fdo::RequestNameFlags::DoNotQueue.into()).await {
                Ok(reply) => Ok(Reply::NameAcquired(matches!(
                    reply,
                    zbus::fdo::RequestNameReply::PrimaryOwner | zbus::fdo::RequestNameReply::AlreadyOwner
                ))),
                Err(zbus::Error::NameTaken) => Ok(Reply::NameAcquired(false)),
                Err(e) => Err(e.into()),
            }
        }
        BusCall::RegisterHost { protocol, host } => {
            con.call_method(
                Some(protocol.watcher_bus()),
                names::WATCHER_OBJECT,
                Some(protocol.watcher_bus()),
                "RegisterStatusNotifierHost",
                &(host.as_str(),),
            )
            .await?;
            Ok(Reply::Done)
        }
        BusCall::RegisteredItems { protocol } => {
            let value = registered_items(con, protocol).await?;
            decode::strings(&value)
                .map(Reply::Items)
                .ok_or_else(|| BusError::Malformed("RegisteredStatusNotifierItems is not a string array".to_string()))
        }
        BusCall::GetProperty { address, property } => {
            let value =
                get_property(con, &address.service, &address.path, address.interface, property.as_ref()).await?;
            let decoded = decode::property(property, &value);
            if decoded.is_none() {
                log::warn!("{}{}: unexpected value for {}: {:?}", address.service, address.path, property, value);
            }
            Ok(Reply::Property(decoded))
        }
        BusCall::ResolveItemPath { service } => {
            Ok(Reply::ItemPath(introspect::resolve_pathless_address(con, &service).await?))
        }
        BusCall::GetLayout { service, path, parent } => {
            let msg = con
                .call_method(
                    Some(service.as_str()),
                    path.as_str(),
                    Some(names::MENU_INTERFACE),
                    "GetLayout",
                    &(parent, -1i32, Vec::<String>::new()),
                )
                .await?;
            let raw = msg.body().deserialize::<decode::RawLayout>()?;
            let (revision, root) = decode::layout(&raw);
            Ok(Reply::Layout { revision, root })
        }
        BusCall::AboutToShow { service, path, id } => {
            let msg = con
                .call_method(Some(service.as_str()), path.as_str(), Some(names::MENU_INTERFACE), "AboutToShow", &(id,))
                .await?;
            Ok(Reply::NeedsUpdate(msg.body().deserialize::<bool>()?))
        }
        BusCall::MenuIconThemePath { service, path } => {
            let value = get_property(con, &service, &path, names::MENU_INTERFACE, "IconThemePath").await?;
            decode::strings(&value)
                .map(Reply::ThemePaths)
                .ok_or_else(|| BusError::Malformed("IconThemePath is not a string array".to_string()))
        }
    }
}

async fn registered_items(con: &zbus::Connection, protocol: Protocol) -> zbus::Result<OwnedValue> {
    get_property(
        con,
        protocol.watcher_bus(),
        names::WATCHER_OBJECT,
        protocol.watcher_bus(),
        "RegisteredStatusNotifierItems",
    )
    .await
}

async fn deliver(con: &zbus::Connection, send: &BusSend) -> zbus::Result<()> {
    match send {
        BusSend::MenuEvent { service, path, id, kind, timestamp } => {
            con.call_method(
                Some(service.as_str()),
                path.as_str(),
                Some(names::MENU_INTERFACE),
                "Event",
                &(*id, kind.as_ref(), Value::I32(0), *timestamp),
            )
            .await?;
        }
        BusSend::ItemMethod { address, method, x, y } => {
            con.call_method(
                Some(address.service.as_str()),
                address.path.as_str(),
                Some(address.interface),
                method.as_ref(),
                &(*x, *y),
            )
            .await?;
        }
        BusSend::Scroll { address, delta, orientation } => {
            con.call_method(
                Some(address.service.as_str()),
                address.path.as_str(),
                Some(address.interface),
                "Scroll",
                &(*delta, orientation.as_ref()),
            )
            .await?;
        }
    }
    Ok(())
}

fn match_rule(rule: &SignalMatch) -> zbus::Result<zbus::MatchRule<'_>> {
    let builder = zbus::MatchRule::builder().msg_type(zbus::message::Type::Signal);
    let rule = match rule {
        SignalMatch::Watcher { protocol } => builder
            .sender(protocol.watcher_bus())?
            .path(names::WATCHER_OBJECT)?
            .interface(protocol.watcher_bus())?
            .build(),
        SignalMatch::NameOwnerChanged => builder
            .sender(names::DBUS_BUS)?
            .path(names::DBUS_OBJECT)?
            .interface(names::DBUS_INTERFACE)?
            .member("NameOwnerChanged")?
            .build(),
        SignalMatch::Item { address } => builder
            .sender(address.service.as_str())?
            .path(address.path.as_str())?
            .interface(address.interface)?
            .build(),
        SignalMatch::Menu { service, path } => builder
            .sender(service.as_str())?
            .path(path.as_str())?
            .interface(names::MENU_INTERFACE)?
            .build(),
    };
    Ok(rule)
}

/// Forward the signals matching `rule` until the stream ends.
async fn listen(
    con: &zbus::Connection,
    id: SubscriptionId,
    rule: &SignalMatch,
    events: &mpsc::UnboundedSender<BusEvent>,
) -> zbus::Result<()> {
    let mut stream = zbus::MessageStream::for_match_rule(match_rule(rule)?, con, None).await?;
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("{}: {}", id, e);
                continue;
            }
        };
        if let Some(signal) = decode::signal(&msg) {
            if events.send(BusEvent::Signal { subscription: id, signal }).is_err() {
                break;
            }
        }
    }
    Ok(())
}
