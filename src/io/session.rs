//! Device session: handshake, command dispatch and acquisition polling
//!
//! [`CrDevice::connect`] opens the TCP connection and spawns the session
//! engine as a single task that owns the socket, both buffers, the token
//! table, the command queue and the in-flight slot. Control requests flow in
//! over a channel; [`DeviceEvent`]s flow out over another. There is no
//! reconnect logic: a transport failure terminates the session.

use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior, Sleep};
use tracing::{debug, info, trace, warn};

use crate::error::{CrError, Result};
use crate::image::stream::{parse_image, ImageFrame, MARKER_IMAGE_END};
use crate::io::queue::{CommandQueue, InFlightSlot, COMMAND_TICK, RESPONSE_TIMEOUT};
use crate::protocol::command::{encode_command, encode_read_data, encode_read_token};
use crate::protocol::frame::extract_payload;
use crate::protocol::header::{InboundHeader, HEADER_SIZE};
use crate::protocol::modelist::parse_mode_list;
use crate::protocol::{ClientId, Command, PacketKind, PayloadValue, TokenTable, TOKEN_NAMES};

/// Default device IPv4 address
pub const DEFAULT_ADDRESS: &str = "192.168.177.101";

/// Default device TCP port
pub const DEFAULT_PORT: u16 = 2006;

/// Interval between image-data polls while acquiring
pub const POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Fixed login credential expected by the device
const USER_ID: &str = "user@BACKUP";

/// Connection parameters and timing configuration
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Device IP address or hostname
    pub address: String,
    /// Device TCP port
    pub port: u16,
    /// How long a sent command may wait for its response
    pub response_timeout: Duration,
    /// One-shot delay between image-data polls
    pub poll_interval: Duration,
    /// Command queue dispatch tick
    pub queue_interval: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            response_timeout: RESPONSE_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            queue_interval: COMMAND_TICK,
        }
    }
}

impl DeviceConfig {
    /// Configuration for a device at `address:port` with default timing
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        DeviceConfig {
            address: address.into(),
            port,
            ..DeviceConfig::default()
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Device operational states as reported by SystemState
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    /// State not yet reported or unrecognized
    #[default]
    Unknown,
    /// Idle, ready to scan
    Ready,
    /// Plate scan in progress
    Scanning,
    /// Scan winding down
    Stopping,
    /// Waiting for plate handling
    Waiting,
}

impl DeviceState {
    /// Map a wire state word onto a known state
    pub fn from_u32(value: u32) -> Self {
        match value {
            2 => DeviceState::Ready,
            4 => DeviceState::Scanning,
            5 => DeviceState::Stopping,
            6 => DeviceState::Waiting,
            _ => DeviceState::Unknown,
        }
    }
}

/// Notifications emitted by the session engine
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Transport connected; emitted before the handshake completes
    Connected,
    /// Session ended and the socket is closed
    Disconnected,
    /// Transport or session failure, with a human-readable description
    Error(String),
    /// Acquisition started
    Started,
    /// Acquisition stopped
    Stopped,
    /// Mode list received from the device
    ModeList(Vec<String>),
    /// A substantial image-data payload arrived
    DataReceived,
    /// A complete image frame was reassembled
    Frame(ImageFrame),
}

/// Control requests from the handle to the engine
enum Control {
    Start(u32),
    Stop,
    Disconnect,
}

/// Handle to a running device session
///
/// # Examples
///
/// ```no_run
/// use crlink::io::{CrDevice, DeviceConfig, DeviceEvent};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let (device, mut events) = CrDevice::connect(DeviceConfig::default()).await?;
///
///     device.start(5)?;
///     while let Some(event) = events.recv().await {
///         if let DeviceEvent::Frame(frame) = event {
///             println!("frame: {}x{}", frame.width, frame.height);
///             break;
///         }
///     }
///     device.disconnect().await?;
///     Ok(())
/// }
/// ```
pub struct CrDevice {
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

impl CrDevice {
    /// Connect to the device and spawn the session engine
    ///
    /// Returns the control handle and the event stream. A `Connected` event
    /// is emitted as soon as the transport is up; the token handshake and
    /// login sequence run in the background afterwards.
    ///
    /// # Errors
    ///
    /// - [`CrError::Io`] - TCP connection failed
    pub async fn connect(config: DeviceConfig) -> Result<(Self, mpsc::UnboundedReceiver<DeviceEvent>)> {
        let endpoint = config.endpoint();
        info!(endpoint = %endpoint, "Connecting to device");
        let stream = TcpStream::connect(&endpoint).await?;
        info!(
            local_addr = ?stream.local_addr().ok(),
            endpoint = %endpoint,
            "Connected to device"
        );

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let session = Session::new(config, stream, control_rx, event_tx);
        let task = tokio::spawn(session.run());

        Ok((
            CrDevice {
                control: control_tx,
                task,
            },
            event_rx,
        ))
    }

    /// Start acquisition with the given mode id
    ///
    /// No-op on the device side if acquisition is already running.
    pub fn start(&self, mode: u32) -> Result<()> {
        self.control
            .send(Control::Start(mode))
            .map_err(|_| CrError::SessionClosed)
    }

    /// Stop a running acquisition
    pub fn stop(&self) -> Result<()> {
        self.control
            .send(Control::Stop)
            .map_err(|_| CrError::SessionClosed)
    }

    /// Disconnect from the device
    ///
    /// If acquisition is running, a stop sequence is issued first and the
    /// engine waits up to the response timeout for the device to confirm
    /// before the socket is closed. Safe to call when idle.
    pub async fn disconnect(self) -> Result<()> {
        // An error here means the session already terminated on its own.
        let _ = self.control.send(Control::Disconnect);
        let _ = self.task.await;
        Ok(())
    }

    /// Tear the session down without the stop handshake
    pub fn abort(self) {
        self.task.abort();
    }
}

/// The session engine; owns every mutable piece of protocol state
struct Session {
    config: DeviceConfig,
    stream: TcpStream,
    control: mpsc::UnboundedReceiver<Control>,
    events: mpsc::UnboundedSender<DeviceEvent>,

    client_id: ClientId,
    tokens: TokenTable,
    queue: CommandQueue,
    in_flight: InFlightSlot,

    receive_buf: Vec<u8>,
    image_buf: Vec<u8>,

    state: DeviceState,
    started: bool,
    was_scanning: bool,
    disconnecting: bool,

    poll_timer: Option<Pin<Box<Sleep>>>,
    stop_deadline: Option<Pin<Box<Sleep>>>,
}

/// Await an armed one-shot timer, or park forever when disarmed
async fn armed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

impl Session {
    fn new(
        config: DeviceConfig,
        stream: TcpStream,
        control: mpsc::UnboundedReceiver<Control>,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Self {
        Session {
            config,
            stream,
            control,
            events,
            client_id: ClientId::random(),
            tokens: TokenTable::new(),
            queue: CommandQueue::new(),
            in_flight: InFlightSlot::default(),
            receive_buf: Vec::new(),
            image_buf: Vec::new(),
            state: DeviceState::Unknown,
            started: false,
            was_scanning: false,
            disconnecting: false,
            poll_timer: None,
            stop_deadline: None,
        }
    }

    /// Engine main loop; runs until disconnect or transport failure
    async fn run(mut self) {
        self.emit(DeviceEvent::Connected);
        self.enqueue_handshake();

        let mut tick = time::interval(self.config.queue_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut chunk = vec![0u8; 16 * 1024];

        let failure: Option<String> = loop {
            tokio::select! {
                read = self.stream.read(&mut chunk) => match read {
                    Ok(0) => break Some("connection closed by device".to_string()),
                    Ok(n) => {
                        trace!(bytes = n, "received bytes");
                        self.on_bytes(&chunk[..n]);
                    }
                    Err(e) => break Some(e.to_string()),
                },

                _ = tick.tick() => {
                    if let Err(e) = self.pump_queue().await {
                        break Some(e.to_string());
                    }
                }

                _ = armed(&mut self.poll_timer) => {
                    self.poll_timer = None;
                    self.request_poll();
                }

                _ = armed(&mut self.stop_deadline) => {
                    warn!("Timed out waiting for acquisition stop during disconnect");
                    break None;
                }

                // Once wind-down begins the control channel is done; polling
                // a closed channel would spin the loop.
                ctrl = self.control.recv(), if !self.disconnecting => match ctrl {
                    Some(Control::Start(mode)) => self.start_acquisition(mode),
                    Some(Control::Stop) => self.stop_acquisition(),
                    // A dropped handle disconnects like an explicit request.
                    Some(Control::Disconnect) | None => self.begin_disconnect(),
                },
            }

            if self.disconnecting && !self.started {
                break None;
            }
        };

        if let Some(error) = failure {
            warn!(error = %error, "Device session terminated");
            self.emit(DeviceEvent::Error(error));
        } else {
            debug!(pending_commands = self.queue.len(), "Session wind-down");
            info!("Disconnecting from device");
        }

        let _ = self.stream.shutdown().await;
        self.emit(DeviceEvent::Disconnected);
    }

    fn emit(&self, event: DeviceEvent) {
        // The receiver may be gone during teardown; nothing to do then.
        let _ = self.events.send(event);
    }

    /// Queue the token requests and the login sequence
    fn enqueue_handshake(&mut self) {
        for name in TOKEN_NAMES {
            if !self.tokens.contains(name) {
                self.queue.enqueue(Command::read_token(name));
            }
        }

        self.queue
            .enqueue(Command::command("Connect", PayloadValue::U16(1)));
        self.queue
            .enqueue(Command::command("UserId", PayloadValue::Text(USER_ID.to_string())));
        let system_date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        self.queue
            .enqueue(Command::command("SystemDate", PayloadValue::Text(system_date)));
        self.queue.enqueue(Command::read_data("ModeList"));
        self.queue.enqueue(Command::read_data("SystemState"));
    }

    /// Send the next queued command when the in-flight slot allows it
    async fn pump_queue(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }

        if let Some(current) = self.in_flight.command() {
            if !self.in_flight.expired(self.config.response_timeout) {
                return Ok(());
            }
            warn!(command = %current.name, "Command response timeout");
        }

        let Some(command) = self.queue.pop() else {
            return Ok(());
        };

        let packet = match command.kind {
            PacketKind::ReadToken => encode_read_token(&command.name, &self.client_id),
            PacketKind::ReadData => encode_read_data(&command, &self.tokens, &self.client_id),
            PacketKind::Command => encode_command(&command, &self.tokens),
        };

        debug!(command = %command.name, bytes = packet.len(), "Sending packet");
        trace!(data = ?packet, "packet bytes");

        self.in_flight.begin(command);
        self.stream.write_all(&packet).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Ingest transport bytes and process a completed response, if any
    fn on_bytes(&mut self, bytes: &[u8]) {
        self.receive_buf.extend_from_slice(bytes);
        if self.receive_buf.len() < HEADER_SIZE {
            return;
        }
        let Some(header) = InboundHeader::decode(&self.receive_buf) else {
            return;
        };

        // A token response is not a framed payload: the header's token field
        // is the assigned id itself.
        let token_request = match self.in_flight.command() {
            Some(command) if command.kind == PacketKind::ReadToken => Some(command.name.clone()),
            _ => None,
        };
        if let Some(name) = token_request {
            debug!(name = %name, token = header.token, "Token assigned");
            self.tokens.insert(name, header.token);
            self.finish_response(&header);
            return;
        }

        let Some(payload) = extract_payload(&self.receive_buf, &header) else {
            return; // wait for more data
        };
        self.dispatch(&header, &payload);
        self.finish_response(&header);
    }

    /// Clear the in-flight slot and drain the receive buffer
    fn finish_response(&mut self, header: &InboundHeader) {
        trace!(
            flags = header.flags,
            packet_type = header.packet_type,
            block = header.block,
            token = header.token,
            size = header.size,
            mode = header.mode,
            "Response processed"
        );
        self.in_flight.take();
        self.receive_buf.clear();
    }

    /// Route a completed payload by its response token
    fn dispatch(&mut self, header: &InboundHeader, payload: &[u8]) {
        let token = header.token;

        if token == self.tokens.get("ModeList") {
            let modes = parse_mode_list(payload);
            info!(modes = modes.len(), "Received mode list");
            debug!(modes = ?modes, "Available modes");
            self.emit(DeviceEvent::ModeList(modes));
        } else if token == self.tokens.get("ImageData") {
            self.on_image_data(payload);
        } else if token == self.tokens.get("SystemState") {
            self.on_system_state(payload);
        } else if token == self.tokens.get("Start") {
            info!("Acquisition started");
            self.started = true;
            self.emit(DeviceEvent::Started);
            self.arm_poll_timer();
        } else if token == self.tokens.get("Stop") {
            info!("Acquisition stopped");
            self.started = false;
            self.emit(DeviceEvent::Stopped);
            self.queue.enqueue(Command::read_data("SystemState"));
        } else {
            debug!(token, bytes = payload.len(), "Unhandled response payload");
        }
    }

    /// Accumulate image-data payloads and detect end of image
    fn on_image_data(&mut self, payload: &[u8]) {
        debug!(bytes = payload.len(), "Received image data");
        self.image_buf.extend_from_slice(payload);

        // Heartbeat-sized payloads carry no pixels worth announcing.
        if payload.len() > 32 {
            self.emit(DeviceEvent::DataReceived);
        }

        if self.state == DeviceState::Waiting && self.was_scanning && self.image_buf.len() >= 2 {
            let tail = [
                self.image_buf[self.image_buf.len() - 2],
                self.image_buf[self.image_buf.len() - 1],
            ];
            if u16::from_le_bytes(tail) == MARKER_IMAGE_END {
                self.finish_frame();
            }
        }

        if self.started {
            self.arm_poll_timer();
        }
    }

    /// Decode a SystemState word and apply state transitions
    fn on_system_state(&mut self, payload: &[u8]) {
        if payload.len() != 4 {
            warn!(bytes = payload.len(), "Unexpected SystemState payload size");
            return;
        }
        let raw = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let state = DeviceState::from_u32(raw);
        info!(state = ?state, raw, "System state");
        self.state = state;

        if state == DeviceState::Scanning {
            self.was_scanning = true;
        } else if state == DeviceState::Stopping && self.was_scanning {
            // The device wound down mid-stream; emit what was captured.
            self.finish_frame();
        }
    }

    /// Run the stream parser over the accumulated image data and emit a frame
    fn finish_frame(&mut self) {
        self.was_scanning = false;
        if self.image_buf.is_empty() {
            return;
        }

        info!(bytes = self.image_buf.len(), "Processing completed image stream");
        if let Some(frame) = parse_image(&self.image_buf) {
            info!(
                width = frame.width,
                height = frame.height,
                pix_line = frame.pix_line,
                "Image frame assembled"
            );
            self.emit(DeviceEvent::Frame(frame));
        }
        self.image_buf.clear();
    }

    /// Queue the acquisition start sequence
    fn start_acquisition(&mut self, mode: u32) {
        if self.started {
            return;
        }
        info!(mode, "Starting acquisition");

        self.queue
            .enqueue(Command::command("Mode", PayloadValue::U32(mode)));
        self.queue
            .enqueue(Command::command("PollingOnly", PayloadValue::U32(1)));
        self.queue
            .enqueue(Command::command("Start", PayloadValue::U16(1)));

        self.image_buf.clear();
    }

    /// Queue the acquisition stop sequence
    fn stop_acquisition(&mut self) {
        if !self.started {
            return;
        }
        info!("Stopping acquisition");
        self.poll_timer = None;

        self.queue
            .enqueue(Command::command("StopRequest", PayloadValue::U16(1)));
        self.queue
            .enqueue(Command::command("Stop", PayloadValue::U16(1)));
    }

    /// Request state and image data for the current poll cycle
    fn request_poll(&mut self) {
        if !self.started {
            return;
        }
        self.queue.enqueue(Command::read_data("SystemState"));
        self.queue.enqueue(Command::read_data("ImageData"));
    }

    /// Re-arm the one-shot poll timer
    fn arm_poll_timer(&mut self) {
        self.poll_timer = Some(Box::pin(time::sleep(self.config.poll_interval)));
    }

    /// Initiate session wind-down, stopping acquisition first if needed
    fn begin_disconnect(&mut self) {
        if self.disconnecting {
            return;
        }
        self.disconnecting = true;

        if self.started {
            self.stop_acquisition();
            // Bounded wait for the device to confirm the stop.
            self.stop_deadline = Some(Box::pin(time::sleep(self.config.response_timeout)));
        }
    }
}
