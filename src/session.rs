//! Session state machine: orchestrates the DAP handshake and exposes
//! high-level debugger operations.
//!
//! Grounded on `debug::session::DebugSessionManager` (event enum shape,
//! `broadcast` channel for session events) and `debug::client::DebugClient`
//! (handshake step ordering, capability storage), generalized to the
//! exact ordering this core requires — `initialize` → wait for
//! `initialized` → `configurationDone` → `launch`/`attach` — which the
//! synchronous client this is grounded on never implemented (it sent no
//! `configurationDone` at all).

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, oneshot};

use crate::breakpoints::BreakpointState;
use crate::broker::{Broker, EventHandler, RequestHandler};
use crate::error::{Error, Result};
use crate::host_delegate::HostDelegate;
use crate::manifest::ManifestDescriptor;
use crate::protocol::{
    self, Capabilities, CompletionItem, DisassembledInstruction, ExceptionInfo, LaunchConfig, MemoryRead, Module,
    RunInTerminalRequest, Scope, StackTraceBody, StartDebuggingRequest, StepInTarget, SteppingOptions, Thread,
    Variable,
};

/// Session lifecycle. Strictly monotone forward; no back-transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Terminated,
}

/// High-level session events, delivered in adapter-delivery order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Initialized,
    Stopped(protocol::StoppedBody),
    Continued(protocol::ContinuedBody),
    Terminated,
    Output(protocol::OutputBody),
    Thread(protocol::ThreadEventBody),
    Module(protocol::ModuleEventBody),
}

/// The DAP client runtime's session: owns the [`Broker`] exclusively and
/// drives the handshake, runtime operations, and reverse-request
/// servicing for one debug adapter connection.
pub struct Session {
    broker: Arc<Broker>,
    state: Mutex<SessionState>,
    capabilities: Mutex<Capabilities>,
    manifest: ManifestDescriptor,
    host_delegate: Option<Arc<dyn HostDelegate>>,
    events: broadcast::Sender<SessionEvent>,
    breakpoints: Mutex<BreakpointState>,
}

impl Session {
    pub fn new<R, W>(
        manifest: ManifestDescriptor,
        host_delegate: Option<Arc<dyn HostDelegate>>,
        reader: R,
        writer: W,
    ) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let broker = Broker::spawn(reader, writer);
        let (events, _) = broadcast::channel(256);
        let session = Arc::new(Self {
            broker,
            state: Mutex::new(SessionState::Idle),
            capabilities: Mutex::new(Capabilities::default()),
            manifest,
            host_delegate,
            events,
            breakpoints: Mutex::new(BreakpointState {
                pending_source_sync: true,
                pending_exception_sync: true,
                ..Default::default()
            }),
        });
        session.register_runtime_handlers();
        session
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub(crate) fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub(crate) fn breakpoints_state(&self) -> &Mutex<BreakpointState> {
        &self.breakpoints
    }

    pub(crate) fn capabilities(&self) -> Capabilities {
        self.capabilities.lock().clone()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    fn require_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::SessionNotActive)
        }
    }

    pub(crate) fn require_capability(&self, name: &str) -> Result<()> {
        if self.capabilities().supports(name) {
            Ok(())
        } else {
            Err(Error::UnsupportedFeature(name.to_string()))
        }
    }

    fn register_runtime_handlers(self: &Arc<Self>) {
        self.broker.register_request_handler(
            "runInTerminal",
            Arc::new(RunInTerminalHandler {
                session: Arc::downgrade(self),
            }),
        );
        self.broker.register_request_handler(
            "startDebugging",
            Arc::new(StartDebuggingHandler {
                session: Arc::downgrade(self),
            }),
        );
        for event in ["stopped", "continued", "terminated", "output", "thread", "module"] {
            self.broker.register_event_handler(
                event,
                Arc::new(RuntimeEventHandler {
                    session: Arc::downgrade(self),
                    event: event.to_string(),
                }),
            );
        }
    }

    /// Performs the DAP handshake: `initialize` → wait for `initialized`
    /// → `configurationDone` → `launch`/`attach`.
    pub async fn start(self: &Arc<Self>, configuration: serde_json::Map<String, Value>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != SessionState::Idle {
                return Err(Error::SessionNotActive);
            }
            *state = SessionState::Starting;
        }
        info!("starting debug session for adapter `{}`", self.manifest.identifier);

        let launch_config = LaunchConfig::from_value(configuration);
        let launch_arguments = Value::Object(launch_config.arguments);

        let (completion_tx, completion_rx) = oneshot::channel();
        self.broker.register_event_handler(
            "initialized",
            Arc::new(InitializedHandler {
                session: Arc::downgrade(self),
                completion: Mutex::new(Some(completion_tx)),
                launch_command: launch_config.request,
                launch_arguments,
            }),
        );

        let init_arguments = serde_json::json!({
            "adapterID": self.manifest.identifier,
            "pathFormat": "path",
            "supportsVariableType": true,
            "supportsVariablePaging": true,
        });

        let response = match self.broker.send_request("initialize", Some(init_arguments)).await {
            Ok(r) => r,
            Err(e) => {
                *self.state.lock() = SessionState::Terminated;
                return Err(Error::AdapterUnavailable(e.to_string()));
            }
        };
        if !response.success {
            *self.state.lock() = SessionState::Terminated;
            return Err(Error::AdapterUnavailable(
                response.message.unwrap_or_else(|| "initialize failed".into()),
            ));
        }

        *self.capabilities.lock() = Capabilities::from_body(response.body.as_ref());

        match completion_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                *self.state.lock() = SessionState::Terminated;
                Err(e)
            }
            Err(_) => {
                *self.state.lock() = SessionState::Terminated;
                Err(Error::AdapterUnavailable(
                    "adapter never sent an `initialized` event".into(),
                ))
            }
        }
    }

    /// Steps 6-8 of the handshake, run from the `initialized` event
    /// handler once the adapter signals readiness.
    async fn complete_handshake(&self, launch_command: &str, launch_arguments: Value) -> Result<()> {
        let configuration_done = self.broker.send_request("configurationDone", Some(serde_json::json!({}))).await;
        match configuration_done {
            Ok(r) if r.success => {}
            Ok(r) => {
                return Err(Error::AdapterUnavailable(
                    r.message.unwrap_or_else(|| "configurationDone failed".into()),
                ))
            }
            Err(e) => return Err(Error::AdapterUnavailable(e.to_string())),
        }

        let launch = self.broker.send_request(launch_command, Some(launch_arguments)).await;
        match launch {
            Ok(r) if r.success => {}
            Ok(r) => {
                return Err(Error::AdapterUnavailable(
                    r.message.unwrap_or_else(|| format!("{launch_command} failed")),
                ))
            }
            Err(e) => return Err(Error::AdapterUnavailable(e.to_string())),
        }

        *self.state.lock() = SessionState::Running;
        info!("debug session running");
        let _ = self.events.send(SessionEvent::Initialized);

        if let Err(e) = self.flush_source_breakpoints().await {
            warn!("initial source breakpoint flush failed: {e}");
        }
        if let Err(e) = self.flush_exception_breakpoints().await {
            warn!("initial exception breakpoint flush failed: {e}");
        }

        Ok(())
    }

    /// `stop()`: send `disconnect`, close the broker, transition to
    /// `Terminated`. Errors during `disconnect` are logged but never
    /// block the transition.
    pub async fn stop(&self) -> Result<()> {
        if self.state() != SessionState::Running {
            return Err(Error::SessionNotActive);
        }
        info!("stopping debug session");
        *self.state.lock() = SessionState::Stopping;

        let disconnect = self
            .broker
            .send_request("disconnect", Some(serde_json::json!({"restart": false})))
            .await;
        if let Err(e) = disconnect {
            debug!("disconnect request failed during stop: {e}");
        }

        self.broker.close().await;
        *self.state.lock() = SessionState::Terminated;
        info!("debug session terminated");
        let _ = self.events.send(SessionEvent::Terminated);
        Ok(())
    }

    // ---- Runtime operations (require `Running`) ----

    pub async fn r#continue(&self, thread: i64) -> Result<()> {
        self.require_running()?;
        let response = self
            .broker
            .send_request("continue", Some(serde_json::json!({"threadId": thread})))
            .await?;
        self.ok_or_adapter_error(response, "continue")
    }

    pub async fn pause(&self, thread: i64) -> Result<()> {
        self.require_running()?;
        let response = self
            .broker
            .send_request("pause", Some(serde_json::json!({"threadId": thread})))
            .await?;
        self.ok_or_adapter_error(response, "pause")
    }

    pub async fn step_in(&self, thread: i64, target: Option<i64>, options: SteppingOptions) -> Result<()> {
        self.require_running()?;
        if target.is_some() {
            self.require_capability("supportsStepInTargetsRequest")?;
        }
        let mut arguments = serde_json::Map::new();
        arguments.insert("threadId".into(), Value::from(thread));
        if let Some(target) = target {
            arguments.insert("targetId".into(), Value::from(target));
        }
        options.merge_into(&mut arguments);
        let response = self.broker.send_request("stepIn", Some(Value::Object(arguments))).await?;
        self.ok_or_adapter_error(response, "stepIn")
    }

    pub async fn step_out(&self, thread: i64, options: SteppingOptions) -> Result<()> {
        self.require_running()?;
        let mut arguments = serde_json::Map::new();
        arguments.insert("threadId".into(), Value::from(thread));
        options.merge_into(&mut arguments);
        let response = self.broker.send_request("stepOut", Some(Value::Object(arguments))).await?;
        self.ok_or_adapter_error(response, "stepOut")
    }

    pub async fn step_over(&self, thread: i64, options: SteppingOptions) -> Result<()> {
        self.require_running()?;
        let mut arguments = serde_json::Map::new();
        arguments.insert("threadId".into(), Value::from(thread));
        options.merge_into(&mut arguments);
        let response = self.broker.send_request("next", Some(Value::Object(arguments))).await?;
        self.ok_or_adapter_error(response, "next")
    }

    pub async fn step_back(&self, thread: i64, options: SteppingOptions) -> Result<()> {
        self.require_running()?;
        self.require_capability("supportsStepBack")?;
        let mut arguments = serde_json::Map::new();
        arguments.insert("threadId".into(), Value::from(thread));
        options.merge_into(&mut arguments);
        let response = self.broker.send_request("stepBack", Some(Value::Object(arguments))).await?;
        self.ok_or_adapter_error(response, "stepBack")
    }

    pub async fn fetch_threads(&self) -> Result<Vec<Thread>> {
        self.require_running()?;
        let response = self.broker.send_request("threads", None).await?;
        let body = self.require_body(response, "threads")?;
        protocol::parse_threads(&body)
    }

    pub async fn fetch_stack_trace(&self, thread: i64, start: Option<i64>, levels: Option<i64>) -> Result<StackTraceBody> {
        self.require_running()?;
        let mut arguments = serde_json::Map::new();
        arguments.insert("threadId".into(), Value::from(thread));
        if let Some(start) = start {
            arguments.insert("startFrame".into(), Value::from(start));
        }
        if let Some(levels) = levels {
            arguments.insert("levels".into(), Value::from(levels));
        }
        let response = self
            .broker
            .send_request("stackTrace", Some(Value::Object(arguments)))
            .await?;
        let body = self.require_body(response, "stackTrace")?;
        protocol::parse_stack_trace(&body)
    }

    pub async fn fetch_scopes(&self, frame: i64) -> Result<Vec<Scope>> {
        self.require_running()?;
        let response = self
            .broker
            .send_request("scopes", Some(serde_json::json!({"frameId": frame})))
            .await?;
        let body = self.require_body(response, "scopes")?;
        protocol::parse_scopes(&body)
    }

    pub async fn fetch_variables(&self, reference: i64) -> Result<Vec<Variable>> {
        self.require_running()?;
        let response = self
            .broker
            .send_request("variables", Some(serde_json::json!({"variablesReference": reference})))
            .await?;
        let body = self.require_body(response, "variables")?;
        protocol::parse_variables(&body)
    }

    pub async fn fetch_loaded_sources(&self) -> Result<Vec<protocol::LoadedSource>> {
        self.require_running()?;
        self.require_capability("supportsLoadedSourcesRequest")?;
        let response = self.broker.send_request("loadedSources", Some(serde_json::json!({}))).await?;
        let body = self.require_body(response, "loadedSources")?;
        protocol::parse_loaded_sources(&body)
    }

    pub async fn fetch_modules(&self) -> Result<Vec<Module>> {
        self.require_running()?;
        self.require_capability("supportsModulesRequest")?;
        let response = self.broker.send_request("modules", Some(serde_json::json!({}))).await?;
        let body = self.require_body(response, "modules")?;
        protocol::parse_modules(&body)
    }

    pub async fn fetch_completions(&self, text: &str, column: i64, line: Option<i64>, frame: Option<i64>) -> Result<Vec<CompletionItem>> {
        self.require_running()?;
        self.require_capability("supportsCompletionsRequest")?;
        let mut arguments = serde_json::Map::new();
        arguments.insert("text".into(), Value::String(text.to_string()));
        arguments.insert("column".into(), Value::from(column));
        if let Some(line) = line {
            arguments.insert("line".into(), Value::from(line));
        }
        if let Some(frame) = frame {
            arguments.insert("frameId".into(), Value::from(frame));
        }
        let response = self
            .broker
            .send_request("completions", Some(Value::Object(arguments)))
            .await?;
        let body = self.require_body(response, "completions")?;
        protocol::parse_completions(&body)
    }

    pub async fn fetch_step_in_targets(&self, frame: i64) -> Result<Vec<StepInTarget>> {
        self.require_running()?;
        self.require_capability("supportsStepInTargetsRequest")?;
        let response = self
            .broker
            .send_request("stepInTargets", Some(serde_json::json!({"frameId": frame})))
            .await?;
        let body = self.require_body(response, "stepInTargets")?;
        protocol::parse_step_in_targets(&body)
    }

    pub async fn read_memory(&self, memory_reference: &str, offset: Option<i64>, count: i64) -> Result<MemoryRead> {
        self.require_running()?;
        self.require_capability("supportsReadMemoryRequest")?;
        let mut arguments = serde_json::Map::new();
        arguments.insert("memoryReference".into(), Value::String(memory_reference.to_string()));
        if let Some(offset) = offset {
            arguments.insert("offset".into(), Value::from(offset));
        }
        arguments.insert("count".into(), Value::from(count));
        let response = self
            .broker
            .send_request("readMemory", Some(Value::Object(arguments)))
            .await?;
        let body = self.require_body(response, "readMemory")?;
        protocol::parse_read_memory(&body)
    }

    pub async fn write_memory(&self, memory_reference: &str, offset: Option<i64>, data: &[u8]) -> Result<()> {
        self.require_running()?;
        self.require_capability("supportsWriteMemoryRequest")?;
        let mut arguments = serde_json::Map::new();
        arguments.insert("memoryReference".into(), Value::String(memory_reference.to_string()));
        if let Some(offset) = offset {
            arguments.insert("offset".into(), Value::from(offset));
        }
        arguments.insert("data".into(), Value::String(protocol::encode_memory(data)));
        let response = self
            .broker
            .send_request("writeMemory", Some(Value::Object(arguments)))
            .await?;
        self.ok_or_adapter_error(response, "writeMemory")
    }

    pub async fn set_expression(&self, expression: &str, value: &str, frame: Option<i64>, format: Option<Value>) -> Result<()> {
        self.require_running()?;
        self.require_capability("supportsSetExpression")?;
        let mut arguments = serde_json::Map::new();
        arguments.insert("expression".into(), Value::String(expression.to_string()));
        arguments.insert("value".into(), Value::String(value.to_string()));
        if let Some(frame) = frame {
            arguments.insert("frameId".into(), Value::from(frame));
        }
        if let Some(format) = format {
            arguments.insert("format".into(), format);
        }
        let response = self
            .broker
            .send_request("setExpression", Some(Value::Object(arguments)))
            .await?;
        self.ok_or_adapter_error(response, "setExpression")
    }

    pub async fn set_variable(&self, container_reference: i64, name: &str, value: &str, format: Option<Value>) -> Result<()> {
        self.require_running()?;
        self.require_capability("supportsSetVariable")?;
        let mut arguments = serde_json::Map::new();
        arguments.insert("variablesReference".into(), Value::from(container_reference));
        arguments.insert("name".into(), Value::String(name.to_string()));
        arguments.insert("value".into(), Value::String(value.to_string()));
        if let Some(format) = format {
            arguments.insert("format".into(), format);
        }
        let response = self
            .broker
            .send_request("setVariable", Some(Value::Object(arguments)))
            .await?;
        self.ok_or_adapter_error(response, "setVariable")
    }

    /// Ordinary DAP relay operations not named individually in the
    /// component design above but implied by "runtime operations" —
    /// `restart`/`terminate`/`goto`/`exceptionInfo`/`disassemble`/
    /// `restartFrame` follow the identical request/response shape as
    /// the operations above.
    pub async fn restart(&self, arguments: Option<Value>) -> Result<()> {
        self.require_running()?;
        self.require_capability("supportsRestartRequest")?;
        let response = self.broker.send_request("restart", arguments).await?;
        self.ok_or_adapter_error(response, "restart")
    }

    pub async fn terminate(&self, restart: bool) -> Result<()> {
        self.require_running()?;
        self.require_capability("supportsTerminateRequest")?;
        let response = self
            .broker
            .send_request("terminate", Some(serde_json::json!({"restart": restart})))
            .await?;
        self.ok_or_adapter_error(response, "terminate")
    }

    pub async fn goto(&self, thread: i64, target: i64) -> Result<()> {
        self.require_running()?;
        self.require_capability("supportsGotoTargetsRequest")?;
        let response = self
            .broker
            .send_request("goto", Some(serde_json::json!({"threadId": thread, "targetId": target})))
            .await?;
        self.ok_or_adapter_error(response, "goto")
    }

    pub async fn exception_info(&self, thread: i64) -> Result<ExceptionInfo> {
        self.require_running()?;
        self.require_capability("supportsExceptionInfoRequest")?;
        let response = self
            .broker
            .send_request("exceptionInfo", Some(serde_json::json!({"threadId": thread})))
            .await?;
        let body = self.require_body(response, "exceptionInfo")?;
        protocol::parse_exception_info(&body)
    }

    pub async fn disassemble(&self, memory_reference: &str, offset: Option<i64>, instruction_count: i64) -> Result<Vec<DisassembledInstruction>> {
        self.require_running()?;
        self.require_capability("supportsDisassembleRequest")?;
        let mut arguments = serde_json::Map::new();
        arguments.insert("memoryReference".into(), Value::String(memory_reference.to_string()));
        if let Some(offset) = offset {
            arguments.insert("instructionOffset".into(), Value::from(offset));
        }
        arguments.insert("instructionCount".into(), Value::from(instruction_count));
        let response = self
            .broker
            .send_request("disassemble", Some(Value::Object(arguments)))
            .await?;
        let body = self.require_body(response, "disassemble")?;
        protocol::parse_disassemble(&body)
    }

    pub async fn restart_frame(&self, frame: i64) -> Result<()> {
        self.require_running()?;
        self.require_capability("supportsRestartFrame")?;
        let response = self
            .broker
            .send_request("restartFrame", Some(serde_json::json!({"frameId": frame})))
            .await?;
        self.ok_or_adapter_error(response, "restartFrame")
    }

    fn ok_or_adapter_error(&self, response: crate::message::Response, command: &str) -> Result<()> {
        if response.success {
            Ok(())
        } else {
            Err(Error::AdapterUnavailable(
                response.message.unwrap_or_else(|| format!("{command} failed")),
            ))
        }
    }

    fn require_body(&self, response: crate::message::Response, command: &str) -> Result<Value> {
        if !response.success {
            return Err(Error::AdapterUnavailable(
                response.message.unwrap_or_else(|| format!("{command} failed")),
            ));
        }
        response
            .body
            .ok_or_else(|| Error::InvalidResponse(format!("{command}: missing body")))
    }
}

struct InitializedHandler {
    session: Weak<Session>,
    completion: Mutex<Option<oneshot::Sender<Result<()>>>>,
    launch_command: String,
    launch_arguments: Value,
}

#[async_trait]
impl EventHandler for InitializedHandler {
    async fn handle(&self, _body: Option<Value>) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        let result = session
            .complete_handshake(&self.launch_command, self.launch_arguments.clone())
            .await;
        if let Some(tx) = self.completion.lock().take() {
            let _ = tx.send(result);
        }
    }
}

struct RunInTerminalHandler {
    session: Weak<Session>,
}

#[async_trait]
impl RequestHandler for RunInTerminalHandler {
    async fn handle(&self, arguments: Option<Value>) -> Result<Value> {
        let request = RunInTerminalRequest::parse(arguments.as_ref())?;
        let Some(session) = self.session.upgrade() else {
            return Err(Error::SessionNotActive);
        };
        let Some(delegate) = session.host_delegate.clone() else {
            return Err(Error::UnsupportedFeature("runInTerminal: no host delegate configured".into()));
        };
        let result = delegate.run_in_terminal(request).await?;
        serde_json::to_value(result).map_err(Error::from)
    }
}

struct StartDebuggingHandler {
    session: Weak<Session>,
}

#[async_trait]
impl RequestHandler for StartDebuggingHandler {
    async fn handle(&self, arguments: Option<Value>) -> Result<Value> {
        let request = StartDebuggingRequest::parse(arguments.as_ref())?;
        let Some(session) = self.session.upgrade() else {
            return Err(Error::SessionNotActive);
        };
        let Some(delegate) = session.host_delegate.clone() else {
            return Err(Error::UnsupportedFeature("startDebugging: no host delegate configured".into()));
        };
        let result = delegate.start_debugging(request).await?;
        serde_json::to_value(result).map_err(Error::from)
    }
}

struct RuntimeEventHandler {
    session: Weak<Session>,
    event: String,
}

#[async_trait]
impl EventHandler for RuntimeEventHandler {
    async fn handle(&self, body: Option<Value>) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        let dispatched = match self.event.as_str() {
            "stopped" => body
                .as_ref()
                .and_then(|b| serde_json::from_value::<protocol::StoppedBody>(b.clone()).ok())
                .map(SessionEvent::Stopped),
            "continued" => body
                .as_ref()
                .and_then(|b| serde_json::from_value::<protocol::ContinuedBody>(b.clone()).ok())
                .map(SessionEvent::Continued),
            "terminated" => {
                *session.state.lock() = SessionState::Terminated;
                info!("debug session terminated by adapter");
                Some(SessionEvent::Terminated)
            }
            "output" => body
                .as_ref()
                .and_then(|b| serde_json::from_value::<protocol::OutputBody>(b.clone()).ok())
                .map(SessionEvent::Output),
            "thread" => body
                .as_ref()
                .and_then(|b| serde_json::from_value::<protocol::ThreadEventBody>(b.clone()).ok())
                .map(SessionEvent::Thread),
            "module" => body
                .as_ref()
                .and_then(|b| serde_json::from_value::<protocol::ModuleEventBody>(b.clone()).ok())
                .map(SessionEvent::Module),
            _ => None,
        };
        match dispatched {
            Some(event) => {
                let _ = session.events.send(event);
            }
            None => {
                error!("malformed `{}` event body, dropping", self.event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestDescriptor;
    use crate::message::{Message, Request as WireRequest, Response as WireResponse};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn test_manifest() -> ManifestDescriptor {
        ManifestDescriptor {
            identifier: "mock".into(),
            executable: "mock-adapter".into(),
            arguments: Vec::new(),
            working_directory: None,
            environment: Default::default(),
        }
    }

    fn encode(message: &Message) -> Vec<u8> {
        let body = serde_json::to_vec(message).unwrap();
        let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
        out.extend_from_slice(&body);
        out
    }

    async fn read_message(stream: &mut (impl tokio::io::AsyncRead + Unpin)) -> Message {
        let mut buf = vec![0u8; 8192];
        let n = stream.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        let body_start = text.find("\r\n\r\n").unwrap() + 4;
        serde_json::from_str(&text[body_start..]).unwrap()
    }

    fn init_logging() {
        let _ = env_logger::try_init();
    }

    #[tokio::test]
    async fn default_launch_follows_handshake_order() {
        init_logging();
        let (mut adapter, client) = duplex(16384);
        let (read_half, write_half) = tokio::io::split(client);
        let session = Session::new(test_manifest(), None, read_half, write_half);

        let session_for_start = session.clone();
        let driver = tokio::spawn(async move {
            let init = read_message(&mut adapter).await;
            assert_eq!(init.seq(), 1);
            if let Message::Request(r) = &init {
                assert_eq!(r.command, "initialize");
            }
            let init_response = Message::Response(WireResponse::success(
                100,
                init.seq(),
                "initialize",
                Some(serde_json::json!({"capabilities": {}})),
            ));
            adapter.write_all(&encode(&init_response)).await.unwrap();

            let initialized_event = Message::Event(crate::message::Event {
                seq: 101,
                event: "initialized".into(),
                body: None,
            });
            adapter.write_all(&encode(&initialized_event)).await.unwrap();

            let config_done = read_message(&mut adapter).await;
            if let Message::Request(r) = &config_done {
                assert_eq!(r.command, "configurationDone");
            }
            let config_done_response =
                Message::Response(WireResponse::success(102, config_done.seq(), "configurationDone", None));
            adapter.write_all(&encode(&config_done_response)).await.unwrap();

            let launch = read_message(&mut adapter).await;
            let launch_seq = launch.seq();
            match &launch {
                Message::Request(r) => {
                    assert_eq!(r.command, "launch");
                    assert_eq!(r.arguments, Some(serde_json::json!({"program": "/tmp/app"})));
                }
                _ => panic!("expected launch request"),
            }
            let launch_response = Message::Response(WireResponse::success(103, launch_seq, "launch", None));
            adapter.write_all(&encode(&launch_response)).await.unwrap();

            let exception_bp = read_message(&mut adapter).await;
            match &exception_bp {
                Message::Request(r) => {
                    assert_eq!(r.command, "setExceptionBreakpoints");
                    assert_eq!(r.arguments, Some(serde_json::json!({"filters": []})));
                }
                _ => panic!("expected setExceptionBreakpoints request"),
            }
            let exception_response =
                Message::Response(WireResponse::success(104, exception_bp.seq(), "setExceptionBreakpoints", None));
            adapter.write_all(&encode(&exception_response)).await.unwrap();
        });

        let mut configuration = serde_json::Map::new();
        configuration.insert("program".into(), Value::String("/tmp/app".into()));
        session_for_start.start(configuration).await.unwrap();

        assert_eq!(session.state(), SessionState::Running);
        driver.await.unwrap();
    }

    #[tokio::test]
    async fn attach_strips_request_key() {
        init_logging();
        let (mut adapter, client) = duplex(16384);
        let (read_half, write_half) = tokio::io::split(client);
        let session = Session::new(test_manifest(), None, read_half, write_half);

        let driver = tokio::spawn(async move {
            let init = read_message(&mut adapter).await;
            let response = Message::Response(WireResponse::success(
                100,
                init.seq(),
                "initialize",
                Some(serde_json::json!({"capabilities": {}})),
            ));
            adapter.write_all(&encode(&response)).await.unwrap();
            adapter
                .write_all(&encode(&Message::Event(crate::message::Event {
                    seq: 101,
                    event: "initialized".into(),
                    body: None,
                })))
                .await
                .unwrap();

            let config_done = read_message(&mut adapter).await;
            adapter
                .write_all(&encode(&Message::Response(WireResponse::success(
                    102,
                    config_done.seq(),
                    "configurationDone",
                    None,
                ))))
                .await
                .unwrap();

            let attach = read_message(&mut adapter).await;
            match &attach {
                Message::Request(r) => {
                    assert_eq!(r.command, "attach");
                    assert_eq!(r.arguments, Some(serde_json::json!({"processId": 42})));
                }
                _ => panic!("expected attach request"),
            }
            adapter
                .write_all(&encode(&Message::Response(WireResponse::success(
                    103,
                    attach.seq(),
                    "attach",
                    None,
                ))))
                .await
                .unwrap();

            let exception_bp = read_message(&mut adapter).await;
            adapter
                .write_all(&encode(&Message::Response(WireResponse::success(
                    104,
                    exception_bp.seq(),
                    "setExceptionBreakpoints",
                    None,
                ))))
                .await
                .unwrap();
        });

        let mut configuration = serde_json::Map::new();
        configuration.insert("request".into(), Value::String("attach".into()));
        configuration.insert("processId".into(), Value::from(42));
        session.start(configuration).await.unwrap();
        driver.await.unwrap();
    }

    #[tokio::test]
    async fn step_back_without_capability_fails_with_unsupported_feature() {
        init_logging();
        let (mut adapter, client) = duplex(16384);
        let (read_half, write_half) = tokio::io::split(client);
        let session = Session::new(test_manifest(), None, read_half, write_half);

        let driver = tokio::spawn(async move {
            let init = read_message(&mut adapter).await;
            adapter
                .write_all(&encode(&Message::Response(WireResponse::success(
                    100,
                    init.seq(),
                    "initialize",
                    Some(serde_json::json!({"capabilities": {}})),
                ))))
                .await
                .unwrap();
            adapter
                .write_all(&encode(&Message::Event(crate::message::Event {
                    seq: 101,
                    event: "initialized".into(),
                    body: None,
                })))
                .await
                .unwrap();
            let config_done = read_message(&mut adapter).await;
            adapter
                .write_all(&encode(&Message::Response(WireResponse::success(
                    102,
                    config_done.seq(),
                    "configurationDone",
                    None,
                ))))
                .await
                .unwrap();
            let launch = read_message(&mut adapter).await;
            adapter
                .write_all(&encode(&Message::Response(WireResponse::success(
                    103,
                    launch.seq(),
                    "launch",
                    None,
                ))))
                .await
                .unwrap();
            let exception_bp = read_message(&mut adapter).await;
            adapter
                .write_all(&encode(&Message::Response(WireResponse::success(
                    104,
                    exception_bp.seq(),
                    "setExceptionBreakpoints",
                    None,
                ))))
                .await
                .unwrap();
            adapter
        });

        session.start(serde_json::Map::new()).await.unwrap();
        let mut adapter = driver.await.unwrap();

        let err = session.step_back(1, SteppingOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedFeature(_)));

        // No further bytes should have been written for the rejected call.
        let mut probe = [0u8; 1];
        let result = tokio::time::timeout(std::time::Duration::from_millis(20), adapter.read(&mut probe)).await;
        assert!(result.is_err(), "adapter should not have received any bytes");
    }

    #[tokio::test]
    async fn reverse_request_without_delegate_fails_unsupported() {
        let (mut adapter, client) = duplex(16384);
        let (read_half, write_half) = tokio::io::split(client);
        let _session = Session::new(test_manifest(), None, read_half, write_half);

        let request = Message::Request(WireRequest {
            seq: 1,
            command: "runInTerminal".into(),
            arguments: Some(serde_json::json!({"args": ["echo", "hi"], "cwd": "/tmp"})),
        });
        adapter.write_all(&encode(&request)).await.unwrap();

        let reply = read_message(&mut adapter).await;
        match reply {
            Message::Response(r) => assert!(!r.success),
            _ => panic!("expected response"),
        }
    }

    #[tokio::test]
    async fn starting_twice_fails_with_session_not_active() {
        let (mut adapter, client) = duplex(16384);
        let (read_half, write_half) = tokio::io::split(client);
        let session = Session::new(test_manifest(), None, read_half, write_half);

        let driver = tokio::spawn(async move {
            let init = read_message(&mut adapter).await;
            adapter
                .write_all(&encode(&Message::Response(WireResponse::success(
                    100,
                    init.seq(),
                    "initialize",
                    Some(serde_json::json!({"capabilities": {}})),
                ))))
                .await
                .unwrap();
            adapter
                .write_all(&encode(&Message::Event(crate::message::Event {
                    seq: 101,
                    event: "initialized".into(),
                    body: None,
                })))
                .await
                .unwrap();
            let config_done = read_message(&mut adapter).await;
            adapter
                .write_all(&encode(&Message::Response(WireResponse::success(
                    102,
                    config_done.seq(),
                    "configurationDone",
                    None,
                ))))
                .await
                .unwrap();
            let launch = read_message(&mut adapter).await;
            adapter
                .write_all(&encode(&Message::Response(WireResponse::success(
                    103,
                    launch.seq(),
                    "launch",
                    None,
                ))))
                .await
                .unwrap();
            let exception_bp = read_message(&mut adapter).await;
            adapter
                .write_all(&encode(&Message::Response(WireResponse::success(
                    104,
                    exception_bp.seq(),
                    "setExceptionBreakpoints",
                    None,
                ))))
                .await
                .unwrap();
        });

        session.start(serde_json::Map::new()).await.unwrap();
        driver.await.unwrap();

        let err = session.start(serde_json::Map::new()).await.unwrap_err();
        assert!(matches!(err, Error::SessionNotActive));
    }
}
