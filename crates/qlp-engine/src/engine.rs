//! The protocol engine: lifecycle, receive loop, discovery and dispatch.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use qlp_frame::discovery::is_discovery_request;
use qlp_frame::{
    command_name, decode_frame, Announcement, ChipId, Command, ControlPayload, Frame, FrameKind,
    Response, ResponseCode, ANYBODY_HERE,
};
use qlp_transport::{DatagramTransport, TransportError, UdpBroadcast};
use tokio::sync::{broadcast, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::correlator::{Correlator, Dispatch, Disposition, Resolution};
use crate::device::{Device, Registry, Upsert};
use crate::error::{EngineError, Result};
use crate::handle::DeviceHandle;

const EVENT_CAPACITY: usize = 64;

/// Lifecycle of the receive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Listening,
    /// `stop()` was called; the loop exits at its next poll boundary.
    Stopping,
}

impl EngineState {
    pub fn name(self) -> &'static str {
        match self {
            EngineState::Stopped => "stopped",
            EngineState::Listening => "listening",
            EngineState::Stopping => "stopping",
        }
    }
}

/// Notifications published by the receive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// First announcement from a chip.
    DeviceDiscovered(Device),
    /// A known chip announced itself again.
    DeviceUpdated(Device),
    /// A reply matched the command in flight for a device.
    CommandResolved {
        device_id: String,
        sequence: u8,
        code: ResponseCode,
    },
    /// A reply from an unknown chip, or from a device with nothing in flight.
    UnexpectedReply {
        chip_id: ChipId,
        sequence: u8,
        code: ResponseCode,
    },
}

/// Everything the engine puts on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Discovery request.
    Discover,
    /// A command addressed to one chip.
    Command {
        chip_id: ChipId,
        sequence: u8,
        command: Command,
    },
}

impl Outbound {
    pub fn into_frame(self, version: u8) -> Frame {
        let frame = match self {
            Outbound::Discover => Frame::discovery(Bytes::from_static(ANYBODY_HERE)),
            Outbound::Command {
                chip_id,
                sequence,
                command,
            } => Frame::control(sequence, ControlPayload::new(chip_id, &command).to_bytes()),
        };
        frame.with_version(version)
    }
}

/// Handle to a running (or stopped) protocol engine.
///
/// Cloning is cheap; all clones share one receive loop, one registry and one
/// correlator. Construct it once and pass it to whatever needs it.
pub struct Engine<T: DatagramTransport = UdpBroadcast> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    transport: T,
    config: EngineConfig,
    registry: Registry,
    correlator: Correlator,
    events: broadcast::Sender<EngineEvent>,
    state: watch::Sender<EngineState>,
    cancel: Mutex<Option<CancellationToken>>,
    last_sent: Mutex<Option<Bytes>>,
}

impl<T: DatagramTransport> Clone for Engine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: DatagramTransport> fmt::Debug for Engine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state())
            .field("devices", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

impl Engine<UdpBroadcast> {
    /// Bind the UDP socket described by `config.udp`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(config: EngineConfig) -> Result<Self> {
        let transport = UdpBroadcast::bind(&config.udp)?;
        info!(
            local = %config.udp.local_addr(),
            target = %transport.target(),
            "udp transport bound"
        );
        Ok(Self::with_transport(transport, config))
    }
}

impl<T: DatagramTransport> Engine<T> {
    pub fn with_transport(transport: T, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, _) = watch::channel(EngineState::Stopped);
        Self {
            inner: Arc::new(Inner {
                transport,
                registry: Registry::new(),
                correlator: Correlator::new(config.response_timeout),
                config,
                events,
                state,
                cancel: Mutex::new(None),
                last_sent: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.borrow()
    }

    /// Spawn the receive loop on the current Tokio runtime.
    ///
    /// Fails with [`EngineError::NoRuntime`] when called outside a runtime,
    /// leaving the engine stopped.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(EngineError::NoRuntime)?;
        let mut cancel = self.inner.lock_cancel();
        self.inner.transition(|state| match state {
            EngineState::Stopped => Ok(EngineState::Listening),
            EngineState::Listening | EngineState::Stopping => Err(EngineError::AlreadyStarted),
        })?;
        let token = CancellationToken::new();
        *cancel = Some(token.clone());
        drop(cancel);

        runtime.spawn(Arc::clone(&self.inner).receive_loop(token));
        Ok(())
    }

    /// Ask the receive loop to exit. Returns immediately; use
    /// [`wait_stopped`](Self::wait_stopped) to wait for the loop to finish.
    ///
    /// Commands waiting on a device are not cancelled.
    pub fn stop(&self) -> Result<()> {
        let mut cancel = self.inner.lock_cancel();
        self.inner.transition(|state| match state {
            EngineState::Listening => Ok(EngineState::Stopping),
            EngineState::Stopping => Err(EngineError::AlreadyStopping),
            EngineState::Stopped => Err(EngineError::AlreadyStopped),
        })?;
        if let Some(token) = cancel.take() {
            token.cancel();
        }
        info!("engine stopping");
        Ok(())
    }

    pub async fn wait_stopped(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|state| *state == EngineState::Stopped).await;
    }

    /// Broadcast a discovery request, collect announcements for `window`, and
    /// return the registry.
    ///
    /// Best effort: devices answering after the window are still registered
    /// but are not part of this call's result.
    pub async fn discover_all(&self, window: Duration) -> Result<Vec<Device>> {
        if self.state() != EngineState::Listening {
            return Err(EngineError::NotListening);
        }
        self.inner.transmit(Outbound::Discover).await?;
        info!(window = ?window, "discovery request sent");
        time::sleep(window).await;

        let devices = self.devices();
        info!(count = devices.len(), "discovery window closed");
        Ok(devices)
    }

    /// [`discover_all`](Self::discover_all) with the configured window.
    pub async fn discover(&self) -> Result<Vec<Device>> {
        self.discover_all(self.inner.config.discovery_timeout).await
    }

    pub fn lookup(&self, device_id: &str) -> Option<Device> {
        self.inner.registry.lookup(device_id)
    }

    pub fn lookup_chip(&self, chip_id: ChipId) -> Option<Device> {
        self.inner.registry.lookup_chip(chip_id)
    }

    /// Registry snapshot ordered by chip id.
    pub fn devices(&self) -> Vec<Device> {
        self.inner.registry.snapshot()
    }

    /// Add a device known by other means than discovery.
    pub fn register(&self, device: Device) -> Upsert {
        let upsert = self.inner.registry.insert(device);
        self.inner.emit(match &upsert {
            Upsert::Discovered(device) => EngineEvent::DeviceDiscovered(device.clone()),
            Upsert::Updated {
                device,
                previous_id,
            } => {
                self.inner.rekey(previous_id, device);
                EngineEvent::DeviceUpdated(device.clone())
            }
        });
        upsert
    }

    /// A handle bound to the registered device `device_id`.
    pub fn handle(&self, device_id: &str) -> Result<DeviceHandle<T>> {
        let device = self
            .lookup(device_id)
            .ok_or_else(|| EngineError::UnknownDevice(device_id.to_string()))?;
        Ok(DeviceHandle::new(self.clone(), device.chip_id))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Send `command` to `device`, first waiting for the device's previous
    /// command to be answered or to time out.
    ///
    /// Returns [`EngineError::NotListening`] unless the receive loop is running.
    pub async fn send_command(&self, device: &Device, command: Command) -> Result<Dispatch> {
        if self.state() != EngineState::Listening {
            return Err(EngineError::NotListening);
        }
        let inner = &*self.inner;
        let chip_id = device.chip_id;
        let name = command.name();
        let dispatch = inner
            .correlator
            .send(&device.device_id, move |sequence| async move {
                inner
                    .transmit(Outbound::Command {
                        chip_id,
                        sequence,
                        command,
                    })
                    .await
            })
            .await?;
        debug!(
            device_id = %device.device_id,
            command = name,
            sequence = dispatch.sequence,
            prior = dispatch.prior.name(),
            "command sent"
        );
        Ok(dispatch)
    }

    /// Wait for the command in flight for `device_id`, if any.
    pub async fn settle(&self, device_id: &str) -> Disposition {
        self.inner.correlator.settle(device_id).await
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.inner.registry
    }
}

impl<T: DatagramTransport> Inner<T> {
    fn lock_cancel(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn last_sent(&self) -> MutexGuard<'_, Option<Bytes>> {
        self.last_sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(
        &self,
        next: impl FnOnce(EngineState) -> Result<EngineState>,
    ) -> Result<()> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| match next(*state) {
            Ok(next) => {
                *state = next;
                true
            }
            Err(err) => {
                outcome = Err(err);
                false
            }
        });
        outcome
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn transmit(&self, outbound: Outbound) -> Result<()> {
        let datagram = outbound
            .into_frame(self.config.protocol_version)
            .to_bytes();
        trace!(len = datagram.len(), data = %hex::encode(&datagram), "tx");
        *self.last_sent() = Some(datagram.clone());
        self.transport.broadcast(&datagram).await?;
        Ok(())
    }

    fn is_echo(&self, datagram: &[u8]) -> bool {
        self.last_sent().as_deref() == Some(datagram)
    }

    async fn receive_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!(poll_interval = ?self.config.poll_interval, "receive loop started");
        let mut buf = vec![0u8; self.config.max_datagram];

        while !cancel.is_cancelled() {
            let received =
                time::timeout(self.config.poll_interval, self.transport.recv_from(&mut buf)).await;
            match received {
                Err(_elapsed) => continue,
                Ok(Ok((len, from))) => self.handle_datagram(&buf[..len], from),
                Ok(Err(TransportError::Closed)) => {
                    warn!("transport closed, receive loop exiting");
                    break;
                }
                Ok(Err(err)) => {
                    debug!(error = %err, "receive failed");
                    time::sleep(self.config.poll_interval / 4).await;
                }
            }
        }

        self.state.send_replace(EngineState::Stopped);
        info!("receive loop stopped");
    }

    fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        if self.is_echo(datagram) {
            trace!(%from, "ignoring local echo");
            return;
        }
        trace!(%from, len = datagram.len(), data = %hex::encode(datagram), "rx");

        let frame = match decode_frame(datagram) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(%from, error = %err, "dropping malformed datagram");
                return;
            }
        };
        if frame.version != self.config.protocol_version {
            debug!(%from, version = frame.version, "dropping frame with foreign version");
            return;
        }

        match frame.kind {
            FrameKind::Discovery => self.on_discovery(&frame.payload, from),
            FrameKind::Control { sequence } => self.on_control(sequence, &frame.payload, from),
            FrameKind::None | FrameKind::Broadcast => {
                debug!(%from, packet_type = frame.packet_type().name(), "ignoring frame");
            }
        }
    }

    fn on_discovery(&self, payload: &[u8], from: SocketAddr) {
        if is_discovery_request(payload) {
            trace!(%from, "discovery request from another client");
            return;
        }
        let announcement = match Announcement::parse(payload) {
            Ok(announcement) => announcement,
            Err(err) => {
                debug!(%from, error = %err, "dropping discovery payload");
                return;
            }
        };

        match self.registry.announce(announcement, from.ip()) {
            Upsert::Discovered(device) => {
                info!(
                    chip_id = %device.chip_id,
                    device_id = %device.device_id,
                    address = %device.address,
                    name = %device.name,
                    "device discovered"
                );
                self.emit(EngineEvent::DeviceDiscovered(device));
            }
            Upsert::Updated {
                device,
                previous_id,
            } => {
                debug!(
                    chip_id = %device.chip_id,
                    device_id = %device.device_id,
                    address = %device.address,
                    "device announced again"
                );
                self.rekey(&previous_id, &device);
                self.emit(EngineEvent::DeviceUpdated(device));
            }
        }
    }

    /// Keep a command in flight under a device's old id answerable after the
    /// device re-announces with a new one.
    fn rekey(&self, previous_id: &str, device: &Device) {
        if previous_id != device.device_id
            && self.correlator.rekey(previous_id, &device.device_id)
        {
            info!(
                chip_id = %device.chip_id,
                previous_id,
                device_id = %device.device_id,
                "device id changed"
            );
        }
    }

    fn on_control(&self, sequence: u8, payload: &[u8], from: SocketAddr) {
        let control = match ControlPayload::decode(payload) {
            Ok(control) => control,
            Err(err) => {
                debug!(%from, error = %err, "dropping control payload");
                return;
            }
        };
        if !control.is_response() {
            debug!(
                %from,
                chip_id = %control.chip_id,
                command = command_name(control.command_id),
                "ignoring command from another client"
            );
            return;
        }
        let response = match Response::from_payload(&control) {
            Ok(response) => response,
            Err(err) => {
                debug!(%from, error = %err, "dropping reply");
                return;
            }
        };

        let unexpected = EngineEvent::UnexpectedReply {
            chip_id: response.chip_id,
            sequence,
            code: response.code,
        };
        let Some(device) = self.registry.lookup_chip(response.chip_id) else {
            warn!(%from, chip_id = %response.chip_id, sequence, "reply from unregistered chip");
            self.emit(unexpected);
            return;
        };

        match self
            .correlator
            .resolve(&device.device_id, sequence, response.code)
        {
            Ok(Resolution::Matched) => {
                if response.code.is_ok() {
                    debug!(device_id = %device.device_id, sequence, "command acknowledged");
                } else {
                    warn!(
                        device_id = %device.device_id,
                        sequence,
                        code = %response.code,
                        text = response.text.as_deref().unwrap_or(""),
                        "device rejected command"
                    );
                }
                self.emit(EngineEvent::CommandResolved {
                    device_id: device.device_id,
                    sequence,
                    code: response.code,
                });
            }
            Ok(Resolution::Mismatch { .. }) => {}
            Err(err) => {
                warn!(%from, error = %err, "unexpected reply");
                self.emit(unexpected);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use qlp_frame::command::COMMON_RESPONSE;
    use qlp_frame::{Color, PacketType};
    use qlp_transport::memory::{self, MemoryNetwork, MemoryTransport};
    use qlp_transport::QLP_PORT;
    use tokio::time::Instant;

    use super::*;

    const LAMP: ChipId = ChipId(0xABCD1234);

    fn peer(last: u8) -> SocketAddr {
        SocketAddr::from(([192, 168, 1, last], QLP_PORT))
    }

    fn announcement(chip: u32, device_id: &str) -> Bytes {
        let payload = Announcement::new(ChipId(chip), device_id, "strip")
            .unwrap()
            .to_bytes();
        Frame::discovery(payload).to_bytes()
    }

    fn reply(sequence: u8, chip_id: ChipId, code: ResponseCode) -> Bytes {
        let payload = Response::new(chip_id, code).to_payload().to_bytes();
        Frame::control(sequence, payload).to_bytes()
    }

    fn engine(transport: MemoryTransport) -> Engine<MemoryTransport> {
        let engine = Engine::with_transport(transport, EngineConfig::default());
        engine.start().unwrap();
        engine
    }

    fn started() -> (Engine<MemoryTransport>, MemoryNetwork) {
        let (transport, network) = memory::pair();
        (engine(transport), network)
    }

    fn register_lamp<T: DatagramTransport>(engine: &Engine<T>) -> Device {
        let device = Device::new(LAMP, "0000BEEF", peer(20).ip(), "lamp");
        engine.register(device.clone());
        device
    }

    async fn next_frame(network: &mut MemoryNetwork) -> Frame {
        decode_frame(&network.next_broadcast().await.unwrap()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_collects_each_chip_once() {
        let (engine, mut network) = started();
        let scan = tokio::spawn({
            let engine = engine.clone();
            async move { engine.discover_all(Duration::from_millis(1500)).await }
        });

        let request = next_frame(&mut network).await;
        assert_eq!(request.packet_type(), PacketType::Discovery);
        assert_eq!(request.payload.as_ref(), b"ABH");

        network.inject(announcement(0x11111111, "00000001"), peer(11)).unwrap();
        network.inject(announcement(0x22222222, "00000002"), peer(12)).unwrap();
        network.inject(announcement(0x33333333, "00000003"), peer(13)).unwrap();
        network.inject(announcement(0x22222222, "FFFFFFFF"), peer(99)).unwrap();

        let devices = scan.await.unwrap().unwrap();
        assert_eq!(devices.len(), 3);

        let updated = engine.lookup_chip(ChipId(0x22222222)).unwrap();
        assert_eq!(updated.device_id, "FFFFFFFF");
        assert_eq!(updated.address, peer(99).ip());
        assert!(engine.lookup("00000002").is_none());
        assert_eq!(engine.lookup("00000003").unwrap().chip_id, ChipId(0x33333333));
    }

    #[tokio::test(start_paused = true)]
    async fn late_announcement_is_registered_but_not_returned() {
        let (engine, mut network) = started();
        let scan = tokio::spawn({
            let engine = engine.clone();
            async move { engine.discover_all(Duration::from_millis(500)).await }
        });
        next_frame(&mut network).await;
        network.inject(announcement(1, "00000001"), peer(1)).unwrap();
        let devices = scan.await.unwrap().unwrap();
        assert_eq!(devices.len(), 1);

        let mut events = engine.subscribe();
        network.inject(announcement(2, "00000002"), peer(2)).unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            EngineEvent::DeviceDiscovered(device) if device.chip_id == ChipId(2)
        ));
        assert_eq!(engine.devices().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_needs_the_receive_loop() {
        let (transport, mut network) = memory::pair();
        let engine = Engine::with_transport(transport, EngineConfig::default());
        assert!(matches!(
            engine.discover().await,
            Err(EngineError::NotListening)
        ));
        assert!(network.try_next_broadcast().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_transitions() {
        let (transport, _network) = memory::pair();
        let engine = Engine::with_transport(transport, EngineConfig::default());
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(matches!(engine.stop(), Err(EngineError::AlreadyStopped)));

        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Listening);
        assert!(matches!(engine.start(), Err(EngineError::AlreadyStarted)));

        engine.stop().unwrap();
        assert_eq!(engine.state(), EngineState::Stopping);
        assert!(matches!(engine.stop(), Err(EngineError::AlreadyStopping)));
        assert!(matches!(engine.start(), Err(EngineError::AlreadyStarted)));

        engine.wait_stopped().await;
        assert_eq!(engine.state(), EngineState::Stopped);
        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Listening);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_takes_at_most_one_poll_interval() {
        let (engine, _network) = started();
        // Let the loop park in its receive.
        time::sleep(Duration::from_millis(50)).await;

        let began = Instant::now();
        engine.stop().unwrap();
        engine.wait_stopped().await;
        assert!(began.elapsed() <= engine.config().poll_interval);
    }

    #[tokio::test(start_paused = true)]
    async fn second_command_waits_for_reply() {
        let (engine, mut network) = started();
        let lamp = register_lamp(&engine);
        let mut events = engine.subscribe();

        let first = engine
            .send_command(&lamp, Command::Fill(Color::new(3, 1, 4)))
            .await
            .unwrap();
        assert_eq!(first.prior, Disposition::Idle);
        let frame = next_frame(&mut network).await;
        assert_eq!(frame.sequence(), Some(first.sequence));
        let payload = ControlPayload::decode(&frame.payload).unwrap();
        assert_eq!(payload.chip_id, LAMP);
        assert_eq!(payload.args.as_ref(), &[3, 1, 4]);

        let second = tokio::spawn({
            let engine = engine.clone();
            let lamp = lamp.clone();
            async move { engine.send_command(&lamp, Command::Reboot).await }
        });

        time::sleep(Duration::from_millis(100)).await;
        assert!(network.try_next_broadcast().is_none());

        network
            .inject(reply(first.sequence, LAMP, ResponseCode::OK), peer(20))
            .unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(second.prior, Disposition::Resolved(ResponseCode::OK));
        assert!(second.waited >= Duration::from_millis(100));
        assert_eq!(next_frame(&mut network).await.sequence(), Some(second.sequence));

        assert_eq!(
            events.recv().await.unwrap(),
            EngineEvent::CommandResolved {
                device_id: "0000BEEF".to_string(),
                sequence: first.sequence,
                code: ResponseCode::OK,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn new_device_id_keeps_command_in_flight() {
        let (engine, mut network) = started();
        let lamp = register_lamp(&engine);
        let mut events = engine.subscribe();

        let first = engine
            .send_command(&lamp, Command::Fill(Color::new(0, 0, 9)))
            .await
            .unwrap();
        next_frame(&mut network).await;

        network.inject(announcement(LAMP.0, "12345678"), peer(20)).unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            EngineEvent::DeviceUpdated(device) if device.device_id == "12345678"
        ));
        let lamp = engine.lookup_chip(LAMP).unwrap();
        assert!(engine.inner.correlator.is_in_flight("12345678"));

        let second = tokio::spawn({
            let engine = engine.clone();
            async move { engine.send_command(&lamp, Command::Reboot).await }
        });
        time::sleep(Duration::from_millis(100)).await;
        assert!(network.try_next_broadcast().is_none());

        network
            .inject(reply(first.sequence, LAMP, ResponseCode::OK), peer(20))
            .unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(second.prior, Disposition::Resolved(ResponseCode::OK));
        assert!(second.waited >= Duration::from_millis(100));
        assert_eq!(
            events.recv().await.unwrap(),
            EngineEvent::CommandResolved {
                device_id: "12345678".to_string(),
                sequence: first.sequence,
                code: ResponseCode::OK,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_engine_sends_nothing() {
        let (transport, mut network) = memory::pair();
        let engine = Engine::with_transport(transport, EngineConfig::default());
        let lamp = register_lamp(&engine);

        assert!(matches!(
            engine.send_command(&lamp, Command::Reboot).await,
            Err(EngineError::NotListening)
        ));
        assert!(network.try_next_broadcast().is_none());
        assert!(!engine.inner.correlator.is_in_flight("0000BEEF"));
    }

    #[test]
    fn start_outside_runtime_fails() {
        let (transport, _network) = memory::pair();
        let engine = Engine::with_transport(transport, EngineConfig::default());
        assert!(matches!(engine.start(), Err(EngineError::NoRuntime(_))));
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn different_devices_do_not_wait() {
        let (engine, mut network) = started();
        let lamp = register_lamp(&engine);
        let shelf = Device::new(ChipId(0x00000042), "0000CAFE", peer(21).ip(), "shelf");
        engine.register(shelf.clone());

        engine.send_command(&lamp, Command::Reboot).await.unwrap();
        let other = engine.send_command(&shelf, Command::Reboot).await.unwrap();
        assert_eq!(other.prior, Disposition::Idle);
        assert_eq!(other.waited, Duration::ZERO);

        next_frame(&mut network).await;
        next_frame(&mut network).await;
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_command_is_abandoned() {
        let (engine, mut network) = started();
        let lamp = register_lamp(&engine);
        let mut events = engine.subscribe();

        let first = engine.send_command(&lamp, Command::Reboot).await.unwrap();
        let second = engine.send_command(&lamp, Command::Reboot).await.unwrap();
        assert_eq!(
            second.prior,
            Disposition::TimedOut {
                sequence: first.sequence
            }
        );
        assert!(second.waited >= engine.config().response_timeout);
        next_frame(&mut network).await;
        next_frame(&mut network).await;

        // A late answer to the abandoned command matches nothing.
        network
            .inject(reply(first.sequence, LAMP, ResponseCode::OK), peer(20))
            .unwrap();
        network
            .inject(reply(second.sequence, LAMP, ResponseCode::OK), peer(20))
            .unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            EngineEvent::CommandResolved {
                device_id: "0000BEEF".to_string(),
                sequence: second.sequence,
                code: ResponseCode::OK,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reply_without_command_is_reported() {
        let (engine, network) = started();
        register_lamp(&engine);
        let mut events = engine.subscribe();

        network
            .inject(reply(9, LAMP, ResponseCode::OK), peer(20))
            .unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            EngineEvent::UnexpectedReply {
                chip_id: LAMP,
                sequence: 9,
                code: ResponseCode::OK,
            }
        );

        network
            .inject(reply(3, ChipId(0x77), ResponseCode::CRC_ERROR), peer(77))
            .unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            EngineEvent::UnexpectedReply {
                chip_id: ChipId(0x77),
                sequence: 3,
                code: ResponseCode::CRC_ERROR,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_and_foreign_frames_are_dropped() {
        let (engine, network) = started();
        let mut events = engine.subscribe();

        network.inject(&b"garbage"[..], peer(1)).unwrap();
        let mut tampered = announcement(1, "00000001").to_vec();
        *tampered.last_mut().unwrap() ^= 0xFF;
        network.inject(tampered, peer(1)).unwrap();
        let foreign = Frame::discovery(
            Announcement::new(ChipId(2), "00000002", "v2")
                .unwrap()
                .to_bytes(),
        )
        .with_version(2)
        .to_bytes();
        network.inject(foreign, peer(2)).unwrap();
        let other_client = Frame::control(
            0,
            ControlPayload::new(ChipId(4), &Command::Reboot).to_bytes(),
        )
        .to_bytes();
        network.inject(other_client, peer(4)).unwrap();
        network.inject(announcement(3, "00000003"), peer(3)).unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            EngineEvent::DeviceDiscovered(device) if device.chip_id == ChipId(3)
        ));
        assert_eq!(engine.devices().len(), 1);
        assert_eq!(engine.state(), EngineState::Listening);
    }

    #[tokio::test(start_paused = true)]
    async fn local_echo_is_ignored() {
        let (transport, mut network) = memory::pair_with_loopback();
        let engine = engine(transport);
        let lamp = register_lamp(&engine);
        let mut events = engine.subscribe();

        // Shaped like an acknowledgement from the lamp; only echo suppression
        // keeps it from resolving itself.
        let command = Command::Raw {
            id: COMMON_RESPONSE,
            args: Bytes::from_static(&[0x00]),
        };
        engine.send_command(&lamp, command).await.unwrap();
        next_frame(&mut network).await;
        time::sleep(Duration::from_millis(50)).await;

        assert!(engine.inner.correlator.is_in_flight("0000BEEF"));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn register_emits_events() {
        let (engine, _network) = started();
        let mut events = engine.subscribe();
        let device = Device::new(LAMP, "0000BEEF", IpAddr::from([10, 0, 0, 1]), "lamp");

        assert!(matches!(engine.register(device.clone()), Upsert::Discovered(_)));
        assert!(matches!(engine.register(device), Upsert::Updated { .. }));
        assert!(matches!(events.recv().await.unwrap(), EngineEvent::DeviceDiscovered(_)));
        assert!(matches!(events.recv().await.unwrap(), EngineEvent::DeviceUpdated(_)));
    }

    #[test]
    fn outbound_is_always_a_frame() {
        let discover = Outbound::Discover.into_frame(1);
        assert_eq!(discover.kind, FrameKind::Discovery);
        assert_eq!(discover.payload.as_ref(), b"ABH");

        let command = Outbound::Command {
            chip_id: LAMP,
            sequence: 4,
            command: Command::Length(30),
        }
        .into_frame(1);
        assert_eq!(command.sequence(), Some(4));
        assert_eq!(command.payload.as_ref(), &[0xAB, 0xCD, 0x12, 0x34, 0x01, 30]);
    }
}
