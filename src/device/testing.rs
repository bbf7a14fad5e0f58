use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use async_trait::async_trait;
use futures::channel::mpsc::Sender;
use uuid::Uuid;

use crate::device::transport::Transport;
use crate::device::types::{DeviceDescriptor, TransportEvent};
use crate::error::TransportError;

/// In-memory [`Transport`]. On subscribe it delivers `script`, in order, into the event channel
/// and then keeps the channel open.
#[derive(Default)]
pub struct FakeTransport {
    pub devices: Vec<DeviceDescriptor>,
    pub script: Mutex<Vec<TransportEvent>>,
    pub fail_discover: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_subscribe: AtomicBool,
    pub connected: AtomicBool,
    pub discover_calls: AtomicUsize,
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub unsubscribe_calls: AtomicUsize,
    pub connected_to: Mutex<Vec<DeviceDescriptor>>,
    pub writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    subscriber: Mutex<Option<Sender<TransportEvent>>>,
}

pub fn device(name: &str, address: &str) -> DeviceDescriptor {
    DeviceDescriptor { name: Some(name.to_string()), address: address.to_string() }
}

impl FakeTransport {
    pub fn with_devices(devices: Vec<DeviceDescriptor>) -> Self {
        FakeTransport { devices, ..Default::default() }
    }

    pub fn set_script(&self, events: Vec<TransportEvent>) {
        *self.script.lock().unwrap() = events;
    }

    /// The sender handed to the last subscribe, for pushing events while connected.
    pub fn subscriber(&self) -> Option<Sender<TransportEvent>> {
        self.subscriber.lock().unwrap().clone()
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn discover(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_discover.load(Ordering::SeqCst) {
            return Err(TransportError::NoAdapter);
        }
        Ok(self.devices.clone())
    }

    async fn connect(&self, device: &DeviceDescriptor) -> Result<(), TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::UnknownDevice { address: device.address.clone() });
        }

        self.connected_to.lock().unwrap().push(device.clone());
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, TransportError> {
        Ok(self.connected.load(Ordering::SeqCst))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }

    async fn write_characteristic(&self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.writes.lock().unwrap().push((characteristic, value.to_vec()));
        Ok(())
    }

    async fn subscribe_notify(&self, _characteristic: Uuid, mut events: Sender<TransportEvent>) -> Result<(), TransportError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(TransportError::MissingCharacteristic);
        }
        let script: Vec<TransportEvent> = self.script.lock().unwrap().drain(..).collect();
        for event in script {
            if event == TransportEvent::Disconnected {
                self.connected.store(false, Ordering::SeqCst);
            }
            events.try_send(event).expect("FakeTransport script exceeds the event channel");
        }
        *self.subscriber.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn unsubscribe(&self, _characteristic: Uuid) -> Result<(), TransportError> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }
}
