use std::collections::HashMap;
use std::sync::Mutex;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use futures::channel::mpsc::Sender;
use btleplug::api::{Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::constants::{IS_CONNECTED_DEADLINE, WRITE_DEADLINE};
use crate::device::transport::Transport;
use crate::device::types::{DeviceDescriptor, TransportEvent};
use crate::error::TransportError;

#[derive(Clone)]
struct Session {
    adapter: Adapter,
    peripheral: Peripheral,
}

/// [`Transport`] backed by the platform bluetooth stack.
pub struct BtleTransport {
    manager: Manager,
    scan_duration: Duration,
    // peripherals seen by the last discovery, by address
    discovered: Mutex<HashMap<String, Session>>,
    session: Mutex<Option<Session>>,
    forwarder_cancel: Mutex<Option<CancellationToken>>,
}

impl BtleTransport {
    pub async fn new(scan_duration: Duration) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;

        Ok(BtleTransport {
            manager,
            scan_duration,
            discovered: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            forwarder_cancel: Mutex::new(None),
        })
    }

    fn session(&self) -> Result<Session, TransportError> {
        self.session.lock().expect("Failed to lock BtleTransport session")
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    fn stop_forwarder(&self) {
        let cancel = self.forwarder_cancel.lock().expect("Failed to lock BtleTransport forwarder").take();
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
    }
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic, TransportError> {
    peripheral.characteristics()
        .into_iter()
        .find(|characteristic| characteristic.uuid.eq(&uuid))
        .ok_or(TransportError::MissingCharacteristic)
}

async fn start_scanning(manager: &Manager) -> Result<Vec<Adapter>, TransportError> {
    let adapters = manager.adapters().await?;
    if adapters.is_empty() {
        return Err(TransportError::NoAdapter);
    }

    for adapter in &adapters {
        info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        adapter.start_scan(ScanFilter::default()).await?;
    }

    Ok(adapters)
}

async fn list_peripherals(adapters: &Vec<Adapter>) -> Vec<(DeviceDescriptor, Session)> {
    let mut found = Vec::new();

    for adapter in adapters {
        if let Err(err) = adapter.stop_scan().await {
            warn!("Failed to stop scanning: {}", err);
        }

        let peripherals = match adapter.peripherals().await {
            Ok(v) => v,
            Err(err) => {
                warn!("Failed to query BLE adapter for peripherals: {}", err);
                continue;
            },
        };

        for peripheral in peripherals {
            match peripheral.properties().await {
                Err(err) => {
                    warn!("Could not query peripheral for properties: {:?}", err);
                },
                Ok(None) => {
                    warn!("Peripheral has no properties");
                },
                Ok(Some(properties)) => {
                    debug!(
                        "Found peripheral {} {:?} {:?}",
                        properties.address,
                        properties.local_name,
                        properties.rssi,
                    );
                    let device = DeviceDescriptor {
                        name: properties.local_name,
                        address: properties.address.to_string(),
                    };
                    found.push((device, Session { adapter: adapter.clone(), peripheral }));
                }
            }
        }
    }

    found
}

#[async_trait]
impl Transport for BtleTransport {
    async fn discover(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let adapters = start_scanning(&self.manager).await?;
        sleep(self.scan_duration).await;

        let found = list_peripherals(&adapters).await;
        let devices = found.iter().map(|(device, _)| device.clone()).collect();

        let mut discovered = self.discovered.lock().expect("Failed to lock BtleTransport discovered");
        discovered.clear();
        discovered.extend(found.into_iter().map(|(device, session)| (device.address, session)));

        Ok(devices)
    }

    async fn connect(&self, device: &DeviceDescriptor) -> Result<(), TransportError> {
        let session = self.discovered.lock().expect("Failed to lock BtleTransport discovered")
            .get(&device.address)
            .cloned()
            .ok_or_else(|| TransportError::UnknownDevice { address: device.address.clone() })?;

        info!("Connecting to peripheral {}...", device.address);
        session.peripheral.connect().await?;

        info!("Connected; Discovering services...");
        session.peripheral.discover_services().await?;

        *self.session.lock().expect("Failed to lock BtleTransport session") = Some(session);
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, TransportError> {
        let session = match self.session() {
            Ok(session) => session,
            Err(TransportError::NotConnected) => return Ok(false),
            Err(err) => return Err(err),
        };

        tokio::select! {
            _ = sleep(Duration::from_millis(IS_CONNECTED_DEADLINE)) => {
                // macOS
                warn!("Checking for connection status took too long");
                Ok(false)
            }
            result = session.peripheral.is_connected() => Ok(result?),
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.stop_forwarder();
        let session = self.session.lock().expect("Failed to lock BtleTransport session")
            .take()
            .ok_or(TransportError::NotConnected)?;

        session.peripheral.disconnect().await?;
        Ok(())
    }

    async fn write_characteristic(&self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError> {
        let session = self.session()?;
        let characteristic = find_characteristic(&session.peripheral, characteristic)?;
        let write_type = if characteristic.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        tokio::select! {
            _ = sleep(Duration::from_millis(WRITE_DEADLINE)) => Err(TransportError::WriteTimeout),
            result = session.peripheral.write(&characteristic, value, write_type) => Ok(result?),
        }
    }

    async fn subscribe_notify(&self, characteristic: Uuid, mut events: Sender<TransportEvent>) -> Result<(), TransportError> {
        let session = self.session()?;
        let characteristic = find_characteristic(&session.peripheral, characteristic)?;

        info!("Subscribing to characteristic {:?}", characteristic.uuid);
        session.peripheral.subscribe(&characteristic).await?;

        let mut notification_stream = session.peripheral.notifications().await?;
        let mut central_events = session.adapter.events().await?;
        let peripheral_id = session.peripheral.id();

        self.stop_forwarder();
        let cancel = CancellationToken::new();
        *self.forwarder_cancel.lock().expect("Failed to lock BtleTransport forwarder") = Some(cancel.clone());

        spawn(async move {
            'mainloop: loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break 'mainloop;
                    },
                    Some(data) = notification_stream.next() => {
                        if data.uuid.eq(&characteristic.uuid) {
                            let event = TransportEvent::Notification { sender: data.uuid, value: data.value };
                            if events.send(event).await.is_err() {
                                break 'mainloop;
                            }
                        }
                    },
                    Some(event) = central_events.next() => {
                        if let CentralEvent::DeviceDisconnected(id) = event {
                            if id == peripheral_id {
                                let _ = events.send(TransportEvent::Disconnected).await;
                                break 'mainloop;
                            }
                        }
                    },
                    else => break 'mainloop,
                }
            }
            debug!("Notification forwarder stopped");
        });

        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        self.stop_forwarder();
        let session = self.session()?;
        let characteristic = find_characteristic(&session.peripheral, characteristic)?;
        session.peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }
}
