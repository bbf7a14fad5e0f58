use std::sync::Arc;
use chrono::{DateTime, Local};
use futures::StreamExt;
use futures::channel::mpsc::{channel, Sender};
use log::{debug, info, trace, warn};
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::console::input::Console;
use crate::device::batch::SampleBatch;
use crate::device::constants::EVENT_CHANNEL_SIZE;
use crate::device::transport::Transport;
use crate::device::types::{ConnectionState, DeviceDescriptor, TransportEvent};
use crate::error::{ManagerError, SelectionError, SinkError, TransportError};
use crate::sink::csv::BatchHandler;

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub read_characteristic: Uuid,
    pub batch_size: usize,
    pub connect_delay: Duration,
    pub poll_delay: Duration,
    pub warm_up_delay: Duration,
}

/// What other tasks may see of the connection: a snapshot of its state, and the transport to
/// write through.
#[derive(Clone)]
pub struct DeviceLink {
    transport: Arc<dyn Transport>,
    state: watch::Receiver<ConnectionState>,
}

impl DeviceLink {
    pub fn new(transport: Arc<dyn Transport>, state: watch::Receiver<ConnectionState>) -> Self {
        DeviceLink { transport, state }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub async fn write(&self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError> {
        self.transport.write_characteristic(characteristic, value).await
    }
}

/// Parse an operator's device selection as an index into a list of `count` devices.
pub fn parse_selection(input: &str, count: usize) -> Result<usize, SelectionError> {
    let value: i64 = input.trim().parse().map_err(|_| SelectionError::NotANumber)?;

    usize::try_from(value)
        .ok()
        .filter(|index| *index < count)
        .ok_or(SelectionError::OutOfRange { value, count })
}

/// Owns the connection to the selected peripheral and the samples it sends.
///
/// This is a polling supervisor: every iteration either discovers and selects a device, or
/// (re)connects to the selected one and stays there until the link drops. A failed connection is
/// retried after a constant delay, forever. After a disconnect the same device is reconnected,
/// discovery only runs again when nothing was ever selected.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    console: Console,
    settings: ManagerSettings,
    handler: Box<dyn BatchHandler>,
    selected: Option<DeviceDescriptor>,
    batch: SampleBatch,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        console: Console,
        settings: ManagerSettings,
        handler: Box<dyn BatchHandler>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        ConnectionManager {
            transport,
            console,
            settings,
            handler,
            selected: None,
            batch: SampleBatch::new(Local::now()),
            state,
        }
    }

    pub fn link(&self) -> DeviceLink {
        DeviceLink::new(self.transport.clone(), self.state.subscribe())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub async fn run_manager_loop(&mut self, cancel: CancellationToken) -> Result<(), ManagerError> {
        info!("Starting connection manager");

        while !cancel.is_cancelled() {
            self.run_iteration(&cancel).await?;
        }

        info!("Connection manager stopped");
        Ok(())
    }

    pub async fn run_iteration(&mut self, cancel: &CancellationToken) -> Result<(), ManagerError> {
        if self.selected.is_some() {
            self.connect(cancel).await?;
        } else {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = self.discover_and_select() => result?,
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {},
            _ = sleep(self.settings.connect_delay) => {},
        }
        Ok(())
    }

    pub async fn discover_and_select(&mut self) -> Result<(), ManagerError> {
        info!("Bluetooth LE hardware warming up...");
        sleep(self.settings.warm_up_delay).await;
        let devices = self.transport.discover().await?;

        if devices.is_empty() {
            warn!("No devices found");
            return Ok(());
        }

        println!("Please select device: ");
        for (i, device) in devices.iter().enumerate() {
            println!("{}: {}", i, device);
        }

        let index = loop {
            let input = self.console.prompt("Select device: ").await?;
            match parse_selection(&input, devices.len()) {
                Ok(index) => break index,
                Err(err) => {
                    debug!("Invalid selection {:?}: {}", input, err);
                    println!("Please make valid selection.");
                },
            }
        };

        let device = devices[index].clone();
        info!("Connecting to {} ({})", device, device.address);
        self.selected = Some(device);
        Ok(())
    }

    async fn open_session(&self, device: &DeviceDescriptor, events: Sender<TransportEvent>) -> Result<(), TransportError> {
        self.transport.connect(device).await?;
        self.transport.subscribe_notify(self.settings.read_characteristic, events).await?;
        Ok(())
    }

    /// Connect to the selected device and handle its events until it disconnects. Connection
    /// errors are logged and swallowed; only a failure to persist samples is returned.
    pub async fn connect(&mut self, cancel: &CancellationToken) -> Result<(), ManagerError> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        let device = match &self.selected {
            Some(device) => device.clone(),
            None => return Ok(()),
        };

        self.set_state(ConnectionState::Connecting);
        let (sender, mut events) = channel::<TransportEvent>(EVENT_CHANNEL_SIZE);

        if let Err(err) = self.open_session(&device, sender).await {
            warn!("Failed to connect to {}: {}", device, err);
            // connect may have succeeded before subscribing failed
            if let Err(err) = self.transport.disconnect().await {
                debug!("Disconnect after failed connect failed: {}", err);
            }
            self.set_state(ConnectionState::Disconnected);
            return Ok(());
        }

        self.set_state(ConnectionState::Connected);
        info!("Connected to {}", device);

        let mut next_check = Instant::now() + self.settings.poll_delay;

        'mainloop: loop {
            let event = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                _ = sleep_until(next_check) => None,
                event = events.next() => Some(event),
            };

            // checked before every event, so a steady stream of notifications can not delay it
            if Instant::now() >= next_check {
                next_check = Instant::now() + self.settings.poll_delay;
                if !self.is_still_connected().await {
                    self.on_disconnect(&device);
                    break 'mainloop;
                }
            }

            match event {
                None => {},
                Some(Some(TransportEvent::Notification { sender, value })) => {
                    self.on_notification(sender, value)?;
                },
                Some(Some(TransportEvent::Disconnected)) | Some(None) => {
                    self.on_disconnect(&device);
                    break 'mainloop;
                },
            }
        }

        Ok(())
    }

    async fn is_still_connected(&self) -> bool {
        match self.transport.is_connected().await {
            Ok(connected) => connected,
            Err(err) => {
                warn!("Error checking for connection state: {:?}", err);
                false
            },
        }
    }

    pub fn on_notification(&mut self, sender: Uuid, payload: Vec<u8>) -> Result<(), SinkError> {
        self.on_notification_at(sender, payload, Local::now())
    }

    fn on_notification_at(&mut self, sender: Uuid, payload: Vec<u8>, now: DateTime<Local>) -> Result<(), SinkError> {
        trace!("Notification from {}: {:?}", sender, payload);
        self.batch.push(payload, now);

        if let Some(samples) = self.batch.take_if_full(self.settings.batch_size) {
            self.handler.flush(&samples.payloads, &samples.timestamps, &samples.delays)?;
        }

        Ok(())
    }

    pub fn on_disconnect(&mut self, device: &DeviceDescriptor) {
        self.set_state(ConnectionState::Disconnected);
        info!("Disconnected from {}!", device);
    }

    /// Unsubscribe and disconnect, ignoring failures. Does nothing if no device was ever selected.
    pub async fn cleanup(&mut self) {
        if self.selected.is_none() {
            return;
        }

        if let Err(err) = self.transport.unsubscribe(self.settings.read_characteristic).await {
            debug!("Unsubscribe during cleanup failed: {}", err);
        }
        if let Err(err) = self.transport.disconnect().await {
            debug!("Disconnect during cleanup failed: {}", err);
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;
    use chrono::TimeZone;
    use tempfile::TempDir;

    use crate::console::input::testing::ScriptedLines;
    use crate::device::batch::Samples;
    use crate::device::constants::make_read_characteristic_uuid;
    use crate::device::testing::{device, FakeTransport};
    use crate::sink::csv::SampleSink;
    use super::*;

    #[derive(Clone, Default)]
    struct Recorder {
        flushed: Arc<Mutex<Vec<Samples>>>,
    }

    impl BatchHandler for Recorder {
        fn flush(&mut self, payloads: &[Vec<u8>], timestamps: &[DateTime<Local>], delays: &[i64]) -> Result<(), SinkError> {
            self.flushed.lock().unwrap().push(Samples {
                payloads: payloads.to_vec(),
                timestamps: timestamps.to_vec(),
                delays: delays.to_vec(),
            });
            Ok(())
        }
    }

    fn settings(batch_size: usize) -> ManagerSettings {
        ManagerSettings {
            read_characteristic: make_read_characteristic_uuid(),
            batch_size,
            connect_delay: Duration::from_secs(5),
            poll_delay: Duration::from_secs(3),
            warm_up_delay: Duration::from_secs(2),
        }
    }

    fn three_devices() -> Vec<DeviceDescriptor> {
        vec![device("alpha", "00:00:00:00:00:01"), device("beta", "00:00:00:00:00:02"), device("gamma", "00:00:00:00:00:03")]
    }

    fn manager(transport: &Arc<FakeTransport>, lines: &[&str], handler: Box<dyn BatchHandler>, batch_size: usize) -> ConnectionManager {
        ConnectionManager::new(transport.clone(), ScriptedLines::console(lines), settings(batch_size), handler)
    }

    fn notification(value: u8) -> TransportEvent {
        TransportEvent::Notification { sender: make_read_characteristic_uuid(), value: vec![value] }
    }

    #[test]
    fn parse_selection_accepts_only_indexes_in_range() {
        assert_eq!(parse_selection("2", 3), Ok(2));
        assert_eq!(parse_selection(" 0\n", 3), Ok(0));
        assert_eq!(parse_selection("abc", 3), Err(SelectionError::NotANumber));
        assert_eq!(parse_selection("", 3), Err(SelectionError::NotANumber));
        assert_eq!(parse_selection("-1", 3), Err(SelectionError::OutOfRange { value: -1, count: 3 }));
        assert_eq!(parse_selection("999", 3), Err(SelectionError::OutOfRange { value: 999, count: 3 }));
        assert_eq!(parse_selection("3", 3), Err(SelectionError::OutOfRange { value: 3, count: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_selection_reprompts() {
        let transport = Arc::new(FakeTransport::with_devices(three_devices()));
        let mut manager = manager(&transport, &["abc", "-1", "999", "2"], Box::new(Recorder::default()), 100);

        manager.run_iteration(&CancellationToken::new()).await.unwrap();

        assert_eq!(manager.selected.as_ref(), Some(&three_devices()[2]));
        assert_eq!(FakeTransport::calls(&transport.discover_calls), 1);
        assert_eq!(FakeTransport::calls(&transport.connect_calls), 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_console_during_selection_is_returned() {
        let transport = Arc::new(FakeTransport::with_devices(three_devices()));
        let mut manager = manager(&transport, &["abc"], Box::new(Recorder::default()), 100);

        let result = manager.run_iteration(&CancellationToken::new()).await;

        assert!(matches!(result, Err(ManagerError::Console { .. })));
        assert!(manager.selected.as_ref().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn no_devices_means_discovery_runs_again() {
        let transport = Arc::new(FakeTransport::with_devices(vec![]));
        let mut manager = manager(&transport, &[], Box::new(Recorder::default()), 100);
        let cancel = CancellationToken::new();

        manager.run_iteration(&cancel).await.unwrap();
        manager.run_iteration(&cancel).await.unwrap();

        assert!(manager.selected.as_ref().is_none());
        assert_eq!(FakeTransport::calls(&transport.discover_calls), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_to_selected_device_after_disconnect() {
        let transport = Arc::new(FakeTransport::with_devices(three_devices()));
        let recorder = Recorder::default();
        let mut manager = manager(&transport, &["1"], Box::new(recorder.clone()), 100);
        let link = manager.link();
        let cancel = CancellationToken::new();

        manager.run_iteration(&cancel).await.unwrap();

        transport.set_script(vec![notification(1), notification(0), TransportEvent::Disconnected]);
        manager.run_iteration(&cancel).await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert_eq!(manager.batch.len(), 2);

        transport.set_script(vec![TransportEvent::Disconnected]);
        manager.run_iteration(&cancel).await.unwrap();

        assert_eq!(FakeTransport::calls(&transport.discover_calls), 1);
        assert_eq!(FakeTransport::calls(&transport.connect_calls), 2);
        assert_eq!(*transport.connected_to.lock().unwrap(), vec![three_devices()[1].clone(), three_devices()[1].clone()]);
        assert!(recorder.flushed.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_is_retried_with_same_device() {
        let transport = Arc::new(FakeTransport::with_devices(three_devices()));
        transport.fail_connect.store(true, Ordering::SeqCst);
        let mut manager = manager(&transport, &["0"], Box::new(Recorder::default()), 100);
        let cancel = CancellationToken::new();

        manager.run_iteration(&cancel).await.unwrap();
        manager.run_iteration(&cancel).await.unwrap();
        manager.run_iteration(&cancel).await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(FakeTransport::calls(&transport.connect_calls), 2);
        assert_eq!(FakeTransport::calls(&transport.discover_calls), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_detects_lost_connection() {
        let transport = Arc::new(FakeTransport::with_devices(three_devices()));
        let mut manager = manager(&transport, &["0"], Box::new(Recorder::default()), 100);
        let cancel = CancellationToken::new();
        manager.run_iteration(&cancel).await.unwrap();

        let link = manager.link();
        let watcher = {
            let transport = transport.clone();
            let mut state = link.state.clone();
            tokio::spawn(async move {
                state.wait_for(|state| *state == ConnectionState::Connected).await.unwrap();
                transport.connected.store(false, Ordering::SeqCst);
            })
        };

        manager.connect(&cancel).await.unwrap();
        watcher.await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_failure_ends_the_manager_loop() {
        let transport = Arc::new(FakeTransport::with_devices(three_devices()));
        transport.fail_discover.store(true, Ordering::SeqCst);
        let mut manager = manager(&transport, &["0"], Box::new(Recorder::default()), 100);

        let result = manager.run_manager_loop(CancellationToken::new()).await;

        assert!(matches!(result, Err(ManagerError::Discovery { source: TransportError::NoAdapter })));
        assert!(manager.selected.is_none());

        manager.cleanup().await;

        assert_eq!(FakeTransport::calls(&transport.unsubscribe_calls), 0);
        assert_eq!(FakeTransport::calls(&transport.disconnect_calls), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_failure_disconnects_before_retrying() {
        let transport = Arc::new(FakeTransport::with_devices(three_devices()));
        transport.fail_subscribe.store(true, Ordering::SeqCst);
        let mut manager = manager(&transport, &["1"], Box::new(Recorder::default()), 100);
        let cancel = CancellationToken::new();
        manager.run_iteration(&cancel).await.unwrap();

        manager.run_iteration(&cancel).await.unwrap();

        assert_eq!(FakeTransport::calls(&transport.connect_calls), 1);
        assert_eq!(FakeTransport::calls(&transport.disconnect_calls), 1);
        assert!(!transport.connected.load(Ordering::SeqCst));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_check_is_not_starved_by_notifications() {
        let transport = Arc::new(FakeTransport::with_devices(three_devices()));
        let mut manager = manager(&transport, &["0"], Box::new(Recorder::default()), 100);
        let cancel = CancellationToken::new();
        manager.run_iteration(&cancel).await.unwrap();

        let flooder = {
            let transport = transport.clone();
            let mut state = manager.link().state;
            tokio::spawn(async move {
                state.wait_for(|state| *state == ConnectionState::Connected).await.unwrap();
                let mut events = transport.subscriber().unwrap();
                for _ in 0..10 {
                    events.try_send(notification(1)).unwrap();
                }
                transport.connected.store(false, Ordering::SeqCst);
                tokio::time::advance(Duration::from_secs(3)).await;
            })
        };

        manager.connect(&cancel).await.unwrap();
        flooder.await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        // the overdue check ran before any queued notification was handled
        assert!(manager.batch.is_empty());
    }

    #[test]
    fn flushes_once_threshold_is_reached() {
        let transport = Arc::new(FakeTransport::default());
        let recorder = Recorder::default();
        let mut manager = manager(&transport, &[], Box::new(recorder.clone()), 3);
        let start = Local.timestamp_opt(1_700_000_000, 0).unwrap();
        manager.batch = SampleBatch::new(start);
        let sender = make_read_characteristic_uuid();

        let t0 = start + chrono::Duration::milliseconds(10);
        let t1 = t0 + chrono::Duration::microseconds(1_250);
        let t2 = t1 + chrono::Duration::microseconds(800);

        manager.on_notification_at(sender, vec![0x01], t0).unwrap();
        manager.on_notification_at(sender, vec![0x00], t1).unwrap();
        assert!(recorder.flushed.lock().unwrap().is_empty());

        manager.on_notification_at(sender, vec![0x01], t2).unwrap();

        let flushed = recorder.flushed.lock().unwrap();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].payloads, vec![vec![0x01], vec![0x00], vec![0x01]]);
        assert_eq!(flushed[0].timestamps, vec![t0, t1, t2]);
        assert_eq!(flushed[0].delays, vec![10_000, 1_250, 800]);
        assert!(manager.batch.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn decode_error_while_connected_is_fatal() {
        let dir = TempDir::new().unwrap();
        let sink = SampleSink::open(dir.path().join("data_dump0.csv")).unwrap();
        let transport = Arc::new(FakeTransport::with_devices(three_devices()));
        let mut manager = manager(&transport, &["0"], Box::new(sink), 2);
        let cancel = CancellationToken::new();
        manager.run_iteration(&cancel).await.unwrap();

        transport.set_script(vec![
            notification(1),
            TransportEvent::Notification { sender: make_read_characteristic_uuid(), value: vec![1, 2] },
        ]);
        let result = manager.run_iteration(&cancel).await;

        assert!(matches!(result, Err(ManagerError::Sink { source: SinkError::Decode { index: 1, len: 2 } })));
    }

    #[tokio::test(start_paused = true)]
    async fn samples_are_written_while_connected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data_dump0.csv");
        let transport = Arc::new(FakeTransport::with_devices(three_devices()));
        let mut manager = manager(&transport, &["0"], Box::new(SampleSink::open(path.clone()).unwrap()), 2);
        let cancel = CancellationToken::new();
        manager.run_iteration(&cancel).await.unwrap();

        transport.set_script(vec![notification(1), notification(0), notification(1), TransportEvent::Disconnected]);
        manager.run_iteration(&cancel).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<&str> = content.lines().skip(1).filter(|line| !line.is_empty()).collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].ends_with(", True, "));
        assert!(rows[1].ends_with(", False, "));
        assert_eq!(manager.batch.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_without_selection_does_nothing() {
        let transport = Arc::new(FakeTransport::default());
        let mut manager = manager(&transport, &[], Box::new(Recorder::default()), 100);

        manager.cleanup().await;

        assert_eq!(FakeTransport::calls(&transport.unsubscribe_calls), 0);
        assert_eq!(FakeTransport::calls(&transport.disconnect_calls), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_connected_then_cleanup_disconnects() {
        let transport = Arc::new(FakeTransport::with_devices(three_devices()));
        let mut manager = manager(&transport, &["2"], Box::new(Recorder::default()), 100);
        let cancel = CancellationToken::new();
        manager.run_iteration(&cancel).await.unwrap();

        let canceller = {
            let cancel = cancel.clone();
            let mut state = manager.link().state;
            tokio::spawn(async move {
                state.wait_for(|state| *state == ConnectionState::Connected).await.unwrap();
                cancel.cancel();
            })
        };

        manager.run_manager_loop(cancel.clone()).await.unwrap();
        canceller.await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);

        manager.cleanup().await;

        assert_eq!(FakeTransport::calls(&transport.unsubscribe_calls), 1);
        assert_eq!(FakeTransport::calls(&transport.disconnect_calls), 1);
        assert!(!transport.connected.load(Ordering::SeqCst));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_after_disconnect_fails_silently() {
        let transport = Arc::new(FakeTransport::with_devices(three_devices()));
        let mut manager = manager(&transport, &["0"], Box::new(Recorder::default()), 100);
        let cancel = CancellationToken::new();
        manager.run_iteration(&cancel).await.unwrap();
        transport.set_script(vec![TransportEvent::Disconnected]);
        manager.run_iteration(&cancel).await.unwrap();

        manager.cleanup().await;

        assert_eq!(FakeTransport::calls(&transport.unsubscribe_calls), 1);
        assert_eq!(FakeTransport::calls(&transport.disconnect_calls), 1);
    }
}
