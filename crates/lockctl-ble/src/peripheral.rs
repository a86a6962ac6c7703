//! GATT link to a lock.

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::StreamExt;
use lockctl_core::transport::{
    self, Channel, Notification, NotificationStream, TransportError, NOTIFICATION_BUFFER,
};
use lockctl_core::wire;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{transport_error, uuid};

/// A lock found by [`crate::scan`].
#[derive(Clone)]
pub struct BlePeripheral {
    inner: Peripheral,
    address: String,
}

impl BlePeripheral {
    pub(crate) fn new(inner: Peripheral, address: String) -> Self {
        Self { inner, address }
    }
}

struct Characteristics {
    command_write: Characteristic,
    command_notify: Characteristic,
    secure_write: Characteristic,
    secure_notify: Characteristic,
}

impl Characteristics {
    fn resolve(peripheral: &Peripheral) -> Result<Self, TransportError> {
        let all = peripheral.characteristics();
        let find = |value: u128| {
            let wanted = uuid(value);
            all.iter()
                .find(|c| c.uuid == wanted)
                .cloned()
                .ok_or_else(|| TransportError::NotFound(format!("characteristic {wanted}")))
        };
        Ok(Self {
            command_write: find(wire::COMMAND_WRITE)?,
            command_notify: find(wire::COMMAND_NOTIFY)?,
            secure_write: find(wire::SECURE_WRITE)?,
            secure_notify: find(wire::SECURE_NOTIFY)?,
        })
    }
}

#[async_trait]
impl transport::Peripheral for BlePeripheral {
    type Link = BleLink;

    fn address(&self) -> String {
        self.address.clone()
    }

    async fn open(&self) -> Result<BleLink, TransportError> {
        // Covers the caller giving up mid-open, e.g. on a connect timeout.
        let guard = DisconnectGuard::new({
            let peripheral = self.inner.clone();
            move || spawn_disconnect(peripheral)
        });

        self.inner.connect().await.map_err(transport_error)?;
        debug!(address = %self.address, "connected, discovering services");

        match self.attach().await {
            Ok(link) => {
                guard.defuse();
                Ok(link)
            }
            Err(e) => {
                guard.defuse();
                if let Err(disconnect) = self.inner.disconnect().await {
                    debug!(error = %disconnect, "disconnect after failed attach");
                }
                Err(e)
            }
        }
    }
}

/// Runs its action on drop unless defused.
struct DisconnectGuard<F: FnOnce()> {
    on_drop: Option<F>,
}

impl<F: FnOnce()> DisconnectGuard<F> {
    fn new(on_drop: F) -> Self {
        Self { on_drop: Some(on_drop) }
    }

    fn defuse(mut self) {
        self.on_drop = None;
    }
}

impl<F: FnOnce()> Drop for DisconnectGuard<F> {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

/// Disconnect from a spawned task; used where no await is possible.
fn spawn_disconnect(peripheral: Peripheral) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                debug!(error = %e, "background disconnect failed");
            }
        });
    }
}

impl BlePeripheral {
    async fn attach(&self) -> Result<BleLink, TransportError> {
        self.inner.discover_services().await.map_err(transport_error)?;
        let chars = Characteristics::resolve(&self.inner)?;

        let mut stream = self.inner.notifications().await.map_err(transport_error)?;
        self.inner.subscribe(&chars.secure_notify).await.map_err(transport_error)?;
        self.inner.subscribe(&chars.command_notify).await.map_err(transport_error)?;

        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let secure_uuid = chars.secure_notify.uuid;
        let command_uuid = chars.command_notify.uuid;
        let forwarder = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                let Some(channel) = channel_for(notification.uuid, secure_uuid, command_uuid) else {
                    continue;
                };
                let notification = Notification {
                    channel,
                    data: notification.value,
                };
                if tx.send(notification).await.is_err() {
                    break;
                }
            }
            debug!("notification stream ended");
        });

        Ok(BleLink {
            peripheral: self.inner.clone(),
            chars,
            notifications: Some(rx),
            forwarder: Some(forwarder),
            closed: false,
        })
    }
}

fn channel_for(from: Uuid, secure: Uuid, command: Uuid) -> Option<Channel> {
    if from == secure {
        Some(Channel::Secure)
    } else if from == command {
        Some(Channel::Command)
    } else {
        None
    }
}

/// Open GATT connection with both notify characteristics subscribed.
///
/// Dropping the link without [`close`](transport::Link::close) still
/// disconnects, from a spawned task.
pub struct BleLink {
    peripheral: Peripheral,
    chars: Characteristics,
    notifications: Option<NotificationStream>,
    forwarder: Option<JoinHandle<()>>,
    closed: bool,
}

#[async_trait]
impl transport::Link for BleLink {
    async fn write(&mut self, channel: Channel, frame: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Link("link closed".to_string()));
        }
        let target = match channel {
            Channel::Secure => &self.chars.secure_write,
            Channel::Command => &self.chars.command_write,
        };
        self.peripheral
            .write(target, frame, WriteType::WithResponse)
            .await
            .map_err(|e| TransportError::Link(e.to_string()))
    }

    fn subscribe(&mut self) -> Result<NotificationStream, TransportError> {
        self.notifications.take().ok_or(TransportError::AlreadySubscribed)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for characteristic in [&self.chars.secure_notify, &self.chars.command_notify] {
            if let Err(e) = self.peripheral.unsubscribe(characteristic).await {
                debug!(error = %e, "unsubscribe failed");
            }
        }
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Err(e) = self.peripheral.disconnect().await {
            warn!(error = %e, "disconnect failed");
        }
    }
}

impl Drop for BleLink {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        spawn_disconnect(self.peripheral.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_channel_routing() {
        let secure = uuid(wire::SECURE_NOTIFY);
        let command = uuid(wire::COMMAND_NOTIFY);
        assert_eq!(channel_for(secure, secure, command), Some(Channel::Secure));
        assert_eq!(channel_for(command, secure, command), Some(Channel::Command));
        assert_eq!(channel_for(uuid(wire::LOCK_SERVICE), secure, command), None);
    }

    #[test]
    fn test_guard_fires_unless_defused() {
        let fired = Cell::new(0);
        drop(DisconnectGuard::new(|| fired.set(fired.get() + 1)));
        assert_eq!(fired.get(), 1);

        DisconnectGuard::new(|| fired.set(fired.get() + 1)).defuse();
        assert_eq!(fired.get(), 1);
    }

    #[tokio::test]
    async fn test_guard_fires_when_open_is_abandoned() {
        let fired = Arc::new(AtomicBool::new(false));
        let opening = {
            let fired = Arc::clone(&fired);
            async move {
                let guard = DisconnectGuard::new(move || fired.store(true, Ordering::SeqCst));
                std::future::pending::<()>().await;
                guard.defuse();
            }
        };

        let abandoned = tokio::time::timeout(std::time::Duration::from_millis(10), opening).await;
        assert!(abandoned.is_err());
        assert!(fired.load(Ordering::SeqCst));
    }
}
