//! Tables of in-flight calls and live subscriptions, and what each of them is for.
//!
//! Every entry that concerns a tray item is indexed by that item, so tearing the item down can
//! detach all of them at once. A reply arriving for a token that is no longer in the table is
//! simply dropped.

use std::collections::HashMap;

use crate::{
    bus::{SubscriptionId, Token},
    item::ItemProperty,
    names::Protocol,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Purpose {
    HostName { protocol: Protocol },
    RegisterHost { protocol: Protocol },
    WatcherItems { protocol: Protocol },
    ItemProperty { item: String, property: ItemProperty },
    ResolvePath { item: String },
    Layout { item: String, parent: i32 },
    AboutToShow { item: String, id: i32 },
    MenuThemePath { item: String },
}

impl Purpose {
    pub fn item(&self) -> Option<&str> {
        match self {
            Purpose::ItemProperty { item, .. }
            | Purpose::ResolvePath { item }
            | Purpose::Layout { item, .. }
            | Purpose::AboutToShow { item, .. }
            | Purpose::MenuThemePath { item } => Some(item),
            Purpose::HostName { .. } | Purpose::RegisterHost { .. } | Purpose::WatcherItems { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct PendingOps {
    next: u64,
    ops: HashMap<Token, Purpose>,
    by_item: HashMap<String, Vec<Token>>,
}

impl PendingOps {
    pub fn issue(&mut self, purpose: Purpose) -> Token {
        self.next += 1;
        let token = Token(self.next);
        if let Some(item) = purpose.item() {
            self.by_item.entry(item.to_owned()).or_default().push(token);
        }
        self.ops.insert(token, purpose);
        token
    }

    /// Take the purpose of a finished call. `None` if the call was detached in the meantime.
    pub fn complete(&mut self, token: Token) -> Option<Purpose> {
        let purpose = self.ops.remove(&token)?;
        if let Some(item) = purpose.item() {
            if let Some(tokens) = self.by_item.get_mut(item) {
                tokens.retain(|t| *t != token);
                if tokens.is_empty() {
                    self.by_item.remove(item);
                }
            }
        }
        Some(purpose)
    }

    /// Forget every call made on behalf of `item`, returning their tokens.
    pub fn detach_item(&mut self, item: &str) -> Vec<Token> {
        let tokens = self.by_item.remove(item).unwrap_or_default();
        for token in &tokens {
            self.ops.remove(token);
        }
        tokens
    }

    pub fn for_item(&self, item: &str) -> usize {
        self.by_item.get(item).map_or(0, Vec::len)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Who a subscription belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listener {
    NameOwner,
    Watcher(Protocol),
    Item(String),
    Menu(String),
}

impl Listener {
    fn item(&self) -> Option<&str> {
        match self {
            Listener::Item(item) | Listener::Menu(item) => Some(item),
            Listener::NameOwner | Listener::Watcher(_) => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Subscriptions {
    next: u64,
    listeners: HashMap<SubscriptionId, Listener>,
}

impl Subscriptions {
    pub fn add(&mut self, listener: Listener) -> SubscriptionId {
        self.next += 1;
        let id = SubscriptionId(self.next);
        self.listeners.insert(id, listener);
        id
    }

    pub fn get(&self, id: SubscriptionId) -> Option<&Listener> {
        self.listeners.get(&id)
    }

    /// Remove the subscriptions matching `predicate`, returning their ids.
    pub fn remove_where(&mut self, predicate: impl Fn(&Listener) -> bool) -> Vec<SubscriptionId> {
        let ids: Vec<SubscriptionId> =
            self.listeners.iter().filter(|(_, listener)| predicate(listener)).map(|(id, _)| *id).collect();
        for id in &ids {
            self.listeners.remove(id);
        }
        ids
    }

    /// Remove every subscription made for `item`.
    pub fn remove_item(&mut self, item: &str) -> Vec<SubscriptionId> {
        self.remove_where(|listener| listener.item() == Some(item))
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn property(item: &str) -> Purpose {
        Purpose::ItemProperty { item: item.to_string(), property: ItemProperty::Status }
    }

    #[test]
    fn test_complete_returns_purpose_once() {
        let mut pending = PendingOps::default();
        let token = pending.issue(property("a"));
        assert_eq!(pending.for_item("a"), 1);
        assert_eq!(pending.complete(token), Some(property("a")));
        assert_eq!(pending.complete(token), None);
        assert_eq!(pending.for_item("a"), 0);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_detach_item_drops_its_calls_only() {
        let mut pending = PendingOps::default();
        let a1 = pending.issue(property("a"));
        let b = pending.issue(property("b"));
        let a2 = pending.issue(Purpose::Layout { item: "a".to_string(), parent: 0 });
        let host = pending.issue(Purpose::HostName { protocol: Protocol::Kde });

        assert_eq!(pending.detach_item("a"), vec![a1, a2]);
        assert_eq!(pending.complete(a1), None);
        assert_eq!(pending.complete(a2), None);
        assert_eq!(pending.complete(b), Some(property("b")));
        assert_eq!(pending.complete(host), Some(Purpose::HostName { protocol: Protocol::Kde }));
        assert!(pending.detach_item("a").is_empty());
    }

    #[test]
    fn test_subscriptions_remove_item() {
        let mut subs = Subscriptions::default();
        let owner = subs.add(Listener::NameOwner);
        let item = subs.add(Listener::Item("a".to_string()));
        let menu = subs.add(Listener::Menu("a".to_string()));
        subs.add(Listener::Item("b".to_string()));

        let mut removed = subs.remove_item("a");
        removed.sort();
        assert_eq!(removed, vec![item, menu]);
        assert_eq!(subs.get(owner), Some(&Listener::NameOwner));
        assert_eq!(subs.len(), 2);
    }
}
