//! Mock adapter for tests and dry runs
//!
//! Records every command and answers from, in order: the queued responses,
//! the handler closure, the default response.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::factory::AdapterConstructor;
use super::traits::{AdapterStats, ConnectionResult, ConnectionState, ControllerAdapter, Protocol};
use crate::error::Result;
use crate::model::{Command, Controller, Response};

type Handler = Arc<dyn Fn(&Command) -> Response + Send + Sync>;

struct MockState {
    connected: bool,
    fail_initialize: Option<String>,
    ping_result: bool,
    sent: Vec<Command>,
    queue: VecDeque<Response>,
    handler: Option<Handler>,
    default_response: Response,
    response_delay: Duration,
    stats: AdapterStats,
}

pub struct MockAdapter {
    controller_id: String,
    protocol: Protocol,
    state: Mutex<MockState>,
}

impl fmt::Debug for MockAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockAdapter")
            .field("controller_id", &self.controller_id)
            .field("connected", &state.connected)
            .field("sent", &state.sent.len())
            .finish()
    }
}

impl MockAdapter {
    pub fn new(controller_id: impl Into<String>) -> Self {
        Self {
            controller_id: controller_id.into(),
            protocol: Protocol::RawSerial,
            state: Mutex::new(MockState {
                connected: false,
                fail_initialize: None,
                ping_result: true,
                sent: Vec::new(),
                queue: VecDeque::new(),
                handler: None,
                default_response: Response::success("ok"),
                response_delay: Duration::ZERO,
                stats: AdapterStats::default(),
            }),
        }
    }

    /// Already connected, answering `ok:1` to everything
    pub fn connected(controller_id: impl Into<String>) -> Self {
        let adapter = Self::new(controller_id);
        adapter.set_connected(true);
        adapter
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&Command) -> Response + Send + Sync + 'static,
    {
        self.state.lock().handler = Some(Arc::new(handler));
    }

    pub fn set_default_response(&self, response: Response) {
        self.state.lock().default_response = response;
    }

    pub fn push_response(&self, response: Response) {
        self.state.lock().queue.push_back(response);
    }

    pub fn set_fail_initialize(&self, error: Option<&str>) {
        self.state.lock().fail_initialize = error.map(str::to_string);
    }

    pub fn set_ping_result(&self, result: bool) {
        self.state.lock().ping_result = result;
    }

    pub fn set_response_delay(&self, delay: Duration) {
        self.state.lock().response_delay = delay;
    }

    pub fn sent_commands(&self) -> Vec<Command> {
        self.state.lock().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }
}

#[async_trait]
impl ControllerAdapter for MockAdapter {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn controller_id(&self) -> &str {
        &self.controller_id
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn connection_state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    async fn initialize(&self, _controller: &Controller) -> ConnectionResult {
        let mut state = self.state.lock();
        match state.fail_initialize.clone() {
            Some(error) => {
                state.connected = false;
                ConnectionResult::failed(&self.controller_id, self.protocol, error)
            },
            None => {
                state.connected = true;
                ConnectionResult::connected(&self.controller_id, self.protocol, json!({"mock": true}))
            },
        }
    }

    async fn send_command(&self, command: &Command) -> Response {
        let (response, delay) = {
            let mut state = self.state.lock();
            if !state.connected {
                return Response::failure(format!(
                    "Mock controller {} not connected",
                    self.controller_id
                ));
            }
            state.sent.push(command.clone());
            state.stats.record_sent();
            let response = match state.queue.pop_front() {
                Some(queued) => queued,
                None => match state.handler.clone() {
                    Some(handler) => handler(command),
                    None => state.default_response.clone(),
                },
            };
            if !response.is_ok() {
                state.stats.commands_failed += 1;
            }
            (response, state.response_delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        response
    }

    async fn disconnect(&self) -> Result<()> {
        self.set_connected(false);
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.is_connected()
    }

    async fn ping(&self) -> bool {
        let state = self.state.lock();
        state.connected && state.ping_result
    }

    fn connection_info(&self) -> Option<Value> {
        Some(json!({
            "isConnected": self.is_connected(),
            "protocol": self.protocol.as_str(),
        }))
    }

    async fn update_config(&self, _settings: &Map<String, Value>) -> Result<bool> {
        Ok(self.ping().await)
    }

    fn stats(&self) -> AdapterStats {
        self.state.lock().stats.clone()
    }
}

/// Hands out pre-built mocks so tests can keep a handle on each adapter
pub struct MockConstructor {
    names: &'static [&'static str],
    adapters: Mutex<VecDeque<Arc<MockAdapter>>>,
}

impl MockConstructor {
    pub fn new(names: &'static [&'static str]) -> Self {
        Self {
            names,
            adapters: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue the adapter returned by the next `create`
    pub fn enqueue(&self, adapter: Arc<MockAdapter>) {
        self.adapters.lock().push_back(adapter);
    }
}

impl AdapterConstructor for MockConstructor {
    fn protocol_names(&self) -> &'static [&'static str] {
        self.names
    }

    fn create(&self, controller: &Controller) -> Arc<dyn ControllerAdapter> {
        match self.adapters.lock().pop_front() {
            Some(adapter) => adapter,
            None => Arc::new(MockAdapter::new(&controller.id)),
        }
    }
}
