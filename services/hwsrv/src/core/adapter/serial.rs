//! Line-based serial adapter
//!
//! Commands go out as one compact JSON line; the firmware answers with one
//! line terminated by `\r\n`. There is no correlation id on the wire, so the
//! adapter keeps exactly one command in flight: the link mutex is held from
//! the write until the answer (or the timeout) arrives. Lines that show up
//! while nobody is waiting are counted and logged as late responses.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error, info, warn};

use super::traits::{AdapterStats, ConnectionResult, ConnectionState, ControllerAdapter, Protocol};
use crate::error::{HwError, Result};
use crate::model::{Command, Controller, Response};

/// Longest line accepted from the firmware
const MAX_LINE_LENGTH: usize = 4096;
/// Buffered lines between the reader task and the command path
const LINE_BUFFER: usize = 64;

// ============================================================================
// Stream plumbing
// ============================================================================

/// Anything that behaves like an open serial port
pub trait SerialStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SerialStream for T {}

pub type BoxedSerialStream = Box<dyn SerialStream>;

/// Opens serial paths; swapped for an in-memory duplex in tests
#[async_trait]
pub trait SerialOpener: Send + Sync + fmt::Debug {
    async fn open(&self, settings: &SerialSettings) -> Result<BoxedSerialStream>;
}

/// Real hardware opener backed by tokio-serial
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSerialOpener;

#[async_trait]
impl SerialOpener for TokioSerialOpener {
    async fn open(&self, settings: &SerialSettings) -> Result<BoxedSerialStream> {
        let stream = tokio_serial::new(&settings.port, settings.baud_rate)
            .data_bits(settings.parse_data_bits())
            .parity(settings.parse_parity())
            .stop_bits(settings.parse_stop_bits())
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| HwError::connection(format!("Failed to open {}: {}", settings.port, e)))?;
        Ok(Box::new(stream))
    }
}

// ============================================================================
// Settings
// ============================================================================

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_parity() -> String {
    "None".to_string()
}

/// Serial settings taken from `communicationConfig`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialSettings {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_parity")]
    pub parity: String,
}

impl SerialSettings {
    pub fn from_controller(controller: &Controller) -> Result<Self> {
        let config = &controller.communication_config;
        let has_port = config
            .get("port")
            .and_then(Value::as_str)
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false);
        if !has_port {
            return Err(HwError::config(format!(
                "No serial port configuration found for controller {}",
                controller.label()
            )));
        }
        serde_json::from_value(Value::Object(config.clone())).map_err(|e| {
            HwError::config(format!(
                "Invalid serial configuration for controller {}: {}",
                controller.label(),
                e
            ))
        })
    }

    fn parse_parity(&self) -> tokio_serial::Parity {
        match self.parity.as_str() {
            "Even" | "even" => tokio_serial::Parity::Even,
            "Odd" | "odd" => tokio_serial::Parity::Odd,
            _ => tokio_serial::Parity::None,
        }
    }

    fn parse_data_bits(&self) -> tokio_serial::DataBits {
        match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }

    fn parse_stop_bits(&self) -> tokio_serial::StopBits {
        match self.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        }
    }
}

/// Timing budget for the serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialTimings {
    /// Wait for the unsolicited ready line after opening
    pub handshake_timeout: Duration,
    /// Pause after the ready line before accepting commands
    pub settle_delay: Duration,
    /// Wait for the answer to one command
    pub response_timeout: Duration,
}

impl Default for SerialTimings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_secs(2),
            response_timeout: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// Link
// ============================================================================

/// One open port: framed writer plus a reader task feeding complete lines
struct SerialLink {
    writer: FramedWrite<WriteHalf<BoxedSerialStream>, LinesCodec>,
    lines: mpsc::Receiver<String>,
    reader: JoinHandle<()>,
}

impl SerialLink {
    fn spawn(stream: BoxedSerialStream, controller_id: String) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut framed = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let (tx, rx) = mpsc::channel(LINE_BUFFER);

        let reader = tokio::spawn(async move {
            while let Some(frame) = framed.next().await {
                match frame {
                    Ok(line) => {
                        let line = line.trim_end_matches('\r').trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    },
                    Err(tokio_util::codec::LinesCodecError::MaxLineLengthExceeded) => {
                        warn!(
                            "Controller {}: discarded serial line longer than {} bytes",
                            controller_id, MAX_LINE_LENGTH
                        );
                    },
                    Err(e) => {
                        error!("Controller {}: serial read failed: {}", controller_id, e);
                        break;
                    },
                }
            }
            debug!("Controller {}: serial reader stopped", controller_id);
        });

        Self {
            writer: FramedWrite::new(write_half, LinesCodec::new()),
            lines: rx,
            reader,
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// Serial adapter for USB-attached microcontrollers
pub struct SerialAdapter {
    controller_id: String,
    opener: Arc<dyn SerialOpener>,
    timings: SerialTimings,
    /// Held across write + answer: the single-in-flight guarantee
    link: Mutex<Option<SerialLink>>,
    state: RwLock<ConnectionState>,
    settings: RwLock<Option<SerialSettings>>,
    stats: RwLock<AdapterStats>,
}

impl fmt::Debug for SerialAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialAdapter")
            .field("controller_id", &self.controller_id)
            .field("state", &*self.state.read())
            .field("settings", &*self.settings.read())
            .finish()
    }
}

impl SerialAdapter {
    pub fn new(
        controller_id: impl Into<String>,
        opener: Arc<dyn SerialOpener>,
        timings: SerialTimings,
    ) -> Self {
        Self {
            controller_id: controller_id.into(),
            opener,
            timings,
            link: Mutex::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
            settings: RwLock::new(None),
            stats: RwLock::new(AdapterStats::default()),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    async fn open_and_handshake(&self, controller: &Controller) -> Result<SerialSettings> {
        let settings = SerialSettings::from_controller(controller)?;

        let mut guard = self.link.lock().await;
        // Re-initialize closes any previous port first
        guard.take();

        self.set_state(ConnectionState::Opening);
        info!(
            "Controller {}: opening {} at {} baud",
            self.controller_id, settings.port, settings.baud_rate
        );
        let stream = self.opener.open(&settings).await?;
        let mut link = SerialLink::spawn(stream, self.controller_id.clone());

        self.set_state(ConnectionState::AwaitingHandshake);
        match tokio::time::timeout(self.timings.handshake_timeout, link.lines.recv()).await {
            Ok(Some(line)) => {
                info!("Controller {}: device ready ({})", self.controller_id, line);
            },
            Ok(None) => {
                return Err(HwError::connection(format!(
                    "Serial port {} closed before the device reported ready",
                    settings.port
                )));
            },
            Err(_) => {
                return Err(HwError::connection(format!(
                    "No ready message from {} within {}ms",
                    settings.port,
                    self.timings.handshake_timeout.as_millis()
                )));
            },
        }

        // Let the boot banner finish before the first command
        tokio::time::sleep(self.timings.settle_delay).await;
        while let Ok(line) = link.lines.try_recv() {
            debug!("Controller {}: boot output: {}", self.controller_id, line);
        }

        *guard = Some(link);
        Ok(settings)
    }

    /// Discard lines nobody asked for; they belong to an earlier, timed-out call
    fn drain_late_responses(&self, link: &mut SerialLink) {
        while let Ok(line) = link.lines.try_recv() {
            self.stats.write().record_late_response();
            warn!(
                "Controller {}: late response discarded: {}",
                self.controller_id, line
            );
        }
    }

    async fn exchange(&self, link: &mut SerialLink, command: &Command) -> Result<Response> {
        let wire = command.to_wire()?;
        debug!("Controller {}: >> {}", self.controller_id, wire);

        link.writer
            .send(wire)
            .await
            .map_err(|e| HwError::IoError(format!("Serial write failed: {}", e)))?;

        match tokio::time::timeout(self.timings.response_timeout, link.lines.recv()).await {
            Ok(Some(line)) => {
                debug!("Controller {}: << {}", self.controller_id, line);
                Ok(Response::parse_line(&line))
            },
            Ok(None) => Err(HwError::connection(format!(
                "Serial link closed for controller {}",
                self.controller_id
            ))),
            Err(_) => Err(HwError::timeout(format!(
                "No response from controller {} within {}ms",
                self.controller_id,
                self.timings.response_timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl ControllerAdapter for SerialAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::RawSerial
    }

    fn controller_id(&self) -> &str {
        &self.controller_id
    }

    fn is_connected(&self) -> bool {
        *self.state.read() == ConnectionState::Connected
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    async fn initialize(&self, controller: &Controller) -> ConnectionResult {
        match self.open_and_handshake(controller).await {
            Ok(settings) => {
                let info = json!({
                    "port": settings.port,
                    "baudRate": settings.baud_rate,
                });
                *self.settings.write() = Some(settings);
                self.set_state(ConnectionState::Connected);
                info!("Controller {}: serial adapter initialized", self.controller_id);
                ConnectionResult::connected(&self.controller_id, Protocol::RawSerial, info)
            },
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                error!(
                    "Controller {}: serial initialization failed: {}",
                    self.controller_id, e
                );
                ConnectionResult::failed(&self.controller_id, Protocol::RawSerial, e.to_string())
            },
        }
    }

    async fn send_command(&self, command: &Command) -> Response {
        let mut guard = self.link.lock().await;

        let link = match guard.as_mut() {
            Some(link) if self.is_connected() => link,
            _ => {
                return Response::failure(format!(
                    "Serial port not connected for controller {}",
                    self.controller_id
                ))
            },
        };

        self.drain_late_responses(link);
        self.stats.write().record_sent();

        match self.exchange(link, command).await {
            Ok(response) => response,
            Err(e) => {
                self.stats.write().record_failure(&e);
                error!(
                    "Controller {}: serial command {} failed: {}",
                    self.controller_id, command.cmd, e
                );
                if matches!(e, HwError::ConnectionError(_) | HwError::IoError(_)) {
                    guard.take();
                    self.set_state(ConnectionState::Disconnected);
                }
                Response::failure(e.to_string())
            },
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let mut guard = self.link.lock().await;
        match guard.take() {
            Some(mut link) => {
                if let Err(e) = SinkExt::<String>::close(&mut link.writer).await {
                    warn!(
                        "Controller {}: error while closing serial port: {}",
                        self.controller_id, e
                    );
                }
                info!("Controller {}: serial connection closed", self.controller_id);
            },
            None => debug!(
                "Controller {}: serial port already closed",
                self.controller_id
            ),
        }
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.is_connected()
    }

    async fn ping(&self) -> bool {
        self.send_command(&Command::new("PING")).await.is_ok()
    }

    fn connection_info(&self) -> Option<Value> {
        let settings = self.settings.read();
        settings.as_ref().map(|s| {
            json!({
                "port": s.port,
                "baudRate": s.baud_rate,
                "isConnected": self.is_connected(),
                "protocol": Protocol::RawSerial.as_str(),
            })
        })
    }

    fn stats(&self) -> AdapterStats {
        self.stats.read().clone()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::model::ControllerStatus;
    use serde_json::Map;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    /// Hands out one end of a duplex pipe; the test drives the other end
    struct DuplexOpener {
        device_end: parking_lot::Mutex<Option<BoxedSerialStream>>,
    }

    impl fmt::Debug for DuplexOpener {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("DuplexOpener").finish_non_exhaustive()
        }
    }

    #[async_trait]
    impl SerialOpener for DuplexOpener {
        async fn open(&self, _settings: &SerialSettings) -> Result<BoxedSerialStream> {
            self.device_end
                .lock()
                .take()
                .ok_or_else(|| HwError::connection("port busy"))
        }
    }

    fn fast_timings() -> SerialTimings {
        SerialTimings {
            handshake_timeout: Duration::from_millis(200),
            settle_delay: Duration::from_millis(10),
            response_timeout: Duration::from_millis(200),
        }
    }

    fn serial_controller(port: Option<&str>) -> Controller {
        let mut config = Map::new();
        if let Some(port) = port {
            config.insert("port".into(), json!(port));
        }
        Controller {
            id: "uno-1".into(),
            name: "Bench Uno".into(),
            board: Some("Arduino_Uno".into()),
            communication_type: "raw_serial".into(),
            communication_config: config,
            status: ControllerStatus::Online,
            is_active: true,
            available_ports: vec![],
        }
    }

    fn adapter_with_pipe() -> (SerialAdapter, DuplexStream) {
        let (host, device) = tokio::io::duplex(1024);
        let opener = DuplexOpener {
            device_end: parking_lot::Mutex::new(Some(Box::new(host))),
        };
        (
            SerialAdapter::new("uno-1", Arc::new(opener), fast_timings()),
            device,
        )
    }

    #[test]
    fn test_settings_require_port() {
        let err = SerialSettings::from_controller(&serial_controller(None)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: No serial port configuration found for controller Bench Uno"
        );

        let settings = SerialSettings::from_controller(&serial_controller(Some("/dev/ttyACM0"))).unwrap();
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.data_bits, 8);
    }

    #[tokio::test]
    async fn test_not_connected_initially() {
        let (adapter, _device) = adapter_with_pipe();
        assert!(!adapter.is_connected());
        assert_eq!(adapter.connection_state(), ConnectionState::Disconnected);

        let resp = adapter.send_command(&Command::new("PING")).await;
        assert_eq!(resp.ok, 0);
        assert!(resp.error_text().contains("not connected"));
    }

    #[tokio::test]
    async fn test_handshake_and_command_round() {
        let (adapter, device) = adapter_with_pipe();
        let (read_half, mut write_half) = tokio::io::split(device);

        write_half.write_all(b"Arduino ready\r\n").await.unwrap();
        let result = adapter.initialize(&serial_controller(Some("/dev/ttyACM0"))).await;
        assert!(result.success, "{:?}", result.error);
        assert!(adapter.is_connected());

        let firmware = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            write_half
                .write_all(b"{\"ok\":1,\"value\":612}\r\n")
                .await
                .unwrap();
            line
        });

        let resp = adapter.send_command(&Command::new("ANALOG").with_pin("A0")).await;
        assert!(resp.is_ok());
        assert_eq!(resp.numeric_value(), Some(612.0));
        assert_eq!(firmware.await.unwrap(), r#"{"cmd":"ANALOG","pin":"A0"}"#);
    }

    #[tokio::test]
    async fn test_missing_ready_line_fails_and_closes() {
        let (adapter, _device) = adapter_with_pipe();
        let result = adapter.initialize(&serial_controller(Some("/dev/ttyACM0"))).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("No ready message"));
        assert_eq!(adapter.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_response_timeout_reports_failure() {
        let (adapter, device) = adapter_with_pipe();
        let (_read_half, mut write_half) = tokio::io::split(device);
        write_half.write_all(b"ready\n").await.unwrap();
        assert!(adapter.initialize(&serial_controller(Some("/dev/ttyACM0"))).await.success);

        let resp = adapter.send_command(&Command::new("READ").with_pin(2)).await;
        assert_eq!(resp.ok, 0);
        assert!(resp.error_text().starts_with("Timeout error"));
        assert_eq!(adapter.stats().timeouts, 1);
        // Timeouts keep the link; the device may just be slow
        assert!(adapter.is_connected());
    }

    #[tokio::test]
    async fn test_non_json_line_is_wrapped() {
        let (adapter, device) = adapter_with_pipe();
        let (read_half, mut write_half) = tokio::io::split(device);
        write_half.write_all(b"ready\r\n").await.unwrap();
        assert!(adapter.initialize(&serial_controller(Some("/dev/ttyACM0"))).await.success);

        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            let _ = lines.next_line().await;
            write_half.write_all(b"PONG\r\n").await.unwrap();
        });

        let resp = adapter.send_command(&Command::new("PING")).await;
        assert!(resp.is_ok());
        assert_eq!(resp.message.as_deref(), Some("PONG"));
        assert_eq!(resp.value, Some(json!("PONG")));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_late_line_is_not_taken_as_the_next_answer() {
        let (adapter, device) = adapter_with_pipe();
        let (read_half, mut write_half) = tokio::io::split(device);
        write_half.write_all(b"ready\n").await.unwrap();
        assert!(adapter.initialize(&serial_controller(Some("/dev/ttyACM0"))).await.success);

        let firmware = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            let _ = lines.next_line().await;
            tokio::time::sleep(Duration::from_millis(300)).await;
            write_half.write_all(b"{\"ok\":1,\"value\":1}\n").await.unwrap();
            let _ = lines.next_line().await;
            write_half.write_all(b"{\"ok\":1,\"value\":2}\n").await.unwrap();
        });

        let first = adapter.send_command(&Command::new("READ").with_pin(2)).await;
        assert_eq!(first.ok, 0);

        // Let the slow answer land before the next command goes out
        tokio::time::sleep(Duration::from_millis(200)).await;
        let second = adapter.send_command(&Command::new("READ").with_pin(3)).await;
        assert_eq!(second.numeric_value(), Some(2.0));

        firmware.await.unwrap();
        assert_eq!(adapter.stats().late_responses, 1);
        assert!(logs_contain("late response discarded"));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (adapter, device) = adapter_with_pipe();
        let (_read_half, mut write_half) = tokio::io::split(device);
        write_half.write_all(b"ready\n").await.unwrap();
        assert!(adapter.initialize(&serial_controller(Some("/dev/ttyACM0"))).await.success);

        adapter.disconnect().await.unwrap();
        adapter.disconnect().await.unwrap();
        assert!(!adapter.is_connected());
        assert_eq!(adapter.send_command(&Command::new("PING")).await.ok, 0);
    }
}
