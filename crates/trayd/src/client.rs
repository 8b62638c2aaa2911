use std::time::Duration;

use anyhow::{bail, Context, Result};
use sni_host::{
    bus::{BusEvent, MenuEventKind},
    config::TrayConfig,
    dbus::ZbusBus,
    Status, Tray, TrayChange, TrayItem,
};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    headless::{CellMeasure, LogWindowing},
    opts::Action,
};

/// How long to wait for the next reply before giving up on the rest.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(3);

type HeadlessTray = Tray<ZbusBus, LogWindowing>;

pub async fn run(action: Action, config: TrayConfig) -> Result<()> {
    let con = zbus::Connection::session().await.context("Failed to connect to the session bus")?;
    if action == Action::Daemon {
        if sni_host::attach_watchers(&con).await.is_empty() {
            log::info!("Not serving a StatusNotifierWatcher, relying on the one already running");
        }
    }

    let (bus, mut events) = ZbusBus::new(con);
    let mut tray = Tray::new(config, bus, LogWindowing::default(), Box::new(CellMeasure));
    tray.start();

    match action {
        Action::Daemon => daemon(&mut tray, &mut events).await?,
        Action::List => {
            settle(&mut tray, &mut events).await?;
            for item in tray.items() {
                println!("{}", describe(item));
            }
        }
        Action::Menu { item } => {
            settle(&mut tray, &mut events).await?;
            if !tray.refresh_menu(&item) {
                bail!("There is no item {} with a menu", item);
            }
            settle(&mut tray, &mut events).await?;
            match tray.menu(&item) {
                Some(menu) => print!("{}", menu),
                None => bail!("Failed to fetch the menu of {}", item),
            }
        }
        Action::Click { item, id } => {
            settle(&mut tray, &mut events).await?;
            if !tray.send_menu_event(&item, id, MenuEventKind::Clicked) {
                bail!("There is no item {} with a menu", item);
            }
        }
    }
    tray.bus_mut().flush().await;
    Ok(())
}

/// Handle bus events until no call is in flight anymore.
async fn settle(tray: &mut HeadlessTray, events: &mut UnboundedReceiver<BusEvent>) -> Result<()> {
    while !tray.is_settled() {
        match tokio::time::timeout(SETTLE_TIMEOUT, events.recv()).await {
            Ok(Some(event)) => tray.handle_bus_event(event)?,
            Ok(None) => bail!("Lost the connection to the session bus"),
            Err(_) => {
                log::warn!("Some items did not reply within {:?}, continuing without them", SETTLE_TIMEOUT);
                break;
            }
        }
    }
    Ok(())
}

async fn daemon(tray: &mut HeadlessTray, events: &mut UnboundedReceiver<BusEvent>) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => tray.handle_bus_event(event)?,
                None => bail!("Lost the connection to the session bus"),
            },
            result = &mut ctrl_c => {
                result.context("Failed to listen for ctrl-c")?;
                log::info!("Shutting down");
                return Ok(());
            }
        }
        for change in tray.take_changes() {
            match change {
                TrayChange::Added(id) => log::info!("+ {}", id),
                TrayChange::Removed(id) => log::info!("- {}", id),
                TrayChange::Updated(id) => {
                    if let Some(item) = tray.registry().get(&id) {
                        log::info!("~ {}", describe(item));
                    }
                }
            }
        }
    }
}

/// One line summary of an item, as printed by `trayd list`.
fn describe(item: &TrayItem) -> String {
    let status = match item.status {
        Some(Status::Passive) => "passive",
        Some(Status::Active) => "active",
        Some(Status::NeedsAttention) => "needs-attention",
        None => "unknown",
    };
    let icon = match (item.current_icon_name(), item.current_pixmaps().len()) {
        (Some(name), _) => name.to_owned(),
        (None, 0) => "-".to_owned(),
        (None, n) => format!("{} pixmaps", n),
    };
    format!(
        "{} [{}] icon: {} title: {}{}",
        item.id,
        status,
        icon,
        item.title.as_deref().unwrap_or("-"),
        if item.menu_path.is_some() { " (menu)" } else { "" }
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_describe() {
        let mut item = TrayItem::new(":1.5/StatusNotifierItem");
        assert_eq!(describe(&item), ":1.5/StatusNotifierItem [unknown] icon: - title: -");

        item.status = Some(Status::NeedsAttention);
        item.icon_name = Some("audio-volume-high".to_string());
        item.attention_icon_name = Some("audio-volume-muted".to_string());
        item.title = Some("Volume".to_string());
        item.menu_path = Some("/Menu".to_string());
        assert_eq!(
            describe(&item),
            ":1.5/StatusNotifierItem [needs-attention] icon: audio-volume-muted title: Volume (menu)"
        );
    }
}
