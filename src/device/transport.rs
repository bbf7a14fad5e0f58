use async_trait::async_trait;
use futures::channel::mpsc::Sender;
use uuid::Uuid;

use crate::device::types::{DeviceDescriptor, TransportEvent};
use crate::error::TransportError;

/// The capabilities the recorder needs from a BLE stack.
///
/// A transport talks to at most one peripheral at a time: the one passed to the last successful
/// [`Transport::connect`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Scan for advertising peripherals and list the ones that are visible.
    async fn discover(&self) -> Result<Vec<DeviceDescriptor>, TransportError>;

    async fn connect(&self, device: &DeviceDescriptor) -> Result<(), TransportError>;

    async fn is_connected(&self) -> Result<bool, TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn write_characteristic(&self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError>;

    /// Subscribe to `characteristic`. Notifications, and a `Disconnected` event when the
    /// peripheral drops the link, are forwarded to `events` until unsubscribed.
    async fn subscribe_notify(&self, characteristic: Uuid, events: Sender<TransportEvent>) -> Result<(), TransportError>;

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError>;
}
