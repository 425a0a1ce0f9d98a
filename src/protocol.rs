//! Typed protocol model: request/response/event bodies built on top of the
//! raw [`crate::message`] wire types, with fail-fast parsers from
//! [`serde_json::Value`].
//!
//! Field shapes mirror `debug::types` (`Capabilities`, `Thread`,
//! `StackFrame`, `Scope`, `Variable`, `LaunchRequestArguments`) almost
//! one for one; `Capabilities` itself is reshaped from a struct of
//! `Option<bool>` fields into a presence set, since this core treats
//! "the key is present in the body" as the capability signal regardless
//! of its boolean value.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Adapter-advertised capability names, captured at handshake as a
/// presence set and immutable thereafter.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    names: HashSet<String>,
}

impl Capabilities {
    pub fn from_body(body: Option<&Value>) -> Self {
        let names = body
            .and_then(|b| b.get("capabilities"))
            .and_then(Value::as_object)
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default();
        Self { names }
    }

    pub fn supports(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

fn require_object<'a>(body: &'a Value, command: &str) -> Result<&'a serde_json::Map<String, Value>> {
    body.as_object()
        .ok_or_else(|| Error::InvalidResponse(format!("{command} response body is not an object")))
}

fn require_field<'a>(obj: &'a serde_json::Map<String, Value>, field: &str, command: &str) -> Result<&'a Value> {
    obj.get(field)
        .ok_or_else(|| Error::InvalidResponse(format!("{command} response missing field `{field}`")))
}

/// `launch`/`attach` configuration, with the DAP-mandated `request` key
/// already stripped by the session handshake.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub request: String,
    pub arguments: serde_json::Map<String, Value>,
}

impl LaunchConfig {
    pub fn from_value(mut configuration: serde_json::Map<String, Value>) -> Self {
        let request = configuration
            .remove("request")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "launch".to_string());
        Self {
            request,
            arguments: configuration,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: i64,
    pub name: String,
}

pub fn parse_threads(body: &Value) -> Result<Vec<Thread>> {
    let obj = require_object(body, "threads")?;
    let threads = require_field(obj, "threads", "threads")?;
    serde_json::from_value(threads.clone())
        .map_err(|e| Error::InvalidResponse(format!("threads: {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub source: Option<crate::message::Source>,
    pub line: i64,
    pub column: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub instruction_pointer_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceBody {
    pub stack_frames: Vec<StackFrame>,
    #[serde(default)]
    pub total_frames: Option<i64>,
}

pub fn parse_stack_trace(body: &Value) -> Result<StackTraceBody> {
    serde_json::from_value(body.clone()).map_err(|e| Error::InvalidResponse(format!("stackTrace: {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub name: String,
    pub variables_reference: i64,
    #[serde(default)]
    pub expensive: bool,
    #[serde(default)]
    pub source: Option<crate::message::Source>,
}

pub fn parse_scopes(body: &Value) -> Result<Vec<Scope>> {
    let obj = require_object(body, "scopes")?;
    let scopes = require_field(obj, "scopes", "scopes")?;
    serde_json::from_value(scopes.clone()).map_err(|e| Error::InvalidResponse(format!("scopes: {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VariablePresentationHint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub variables_reference: i64,
    #[serde(default)]
    pub presentation_hint: Option<VariablePresentationHint>,
}

pub fn parse_variables(body: &Value) -> Result<Vec<Variable>> {
    let obj = require_object(body, "variables")?;
    let variables = require_field(obj, "variables", "variables")?;
    serde_json::from_value(variables.clone()).map_err(|e| Error::InvalidResponse(format!("variables: {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedSource {
    #[serde(flatten)]
    pub source: crate::message::Source,
}

pub fn parse_loaded_sources(body: &Value) -> Result<Vec<LoadedSource>> {
    let obj = require_object(body, "loadedSources")?;
    let sources = require_field(obj, "sources", "loadedSources")?;
    serde_json::from_value(sources.clone()).map_err(|e| Error::InvalidResponse(format!("loadedSources: {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: Value,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

pub fn parse_modules(body: &Value) -> Result<Vec<Module>> {
    let obj = require_object(body, "modules")?;
    let modules = require_field(obj, "modules", "modules")?;
    serde_json::from_value(modules.clone()).map_err(|e| Error::InvalidResponse(format!("modules: {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_text: Option<String>,
}

pub fn parse_completions(body: &Value) -> Result<Vec<CompletionItem>> {
    let obj = require_object(body, "completions")?;
    let targets = require_field(obj, "targets", "completions")?;
    serde_json::from_value(targets.clone()).map_err(|e| Error::InvalidResponse(format!("completions: {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInTarget {
    pub id: i64,
    pub label: String,
}

pub fn parse_step_in_targets(body: &Value) -> Result<Vec<StepInTarget>> {
    let obj = require_object(body, "stepInTargets")?;
    let targets = require_field(obj, "targets", "stepInTargets")?;
    serde_json::from_value(targets.clone()).map_err(|e| Error::InvalidResponse(format!("stepInTargets: {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointLocation {
    pub line: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<i64>,
}

pub fn parse_breakpoint_locations(body: &Value) -> Result<Vec<BreakpointLocation>> {
    let obj = require_object(body, "breakpointLocations")?;
    let locations = require_field(obj, "breakpoints", "breakpointLocations")?;
    serde_json::from_value(locations.clone())
        .map_err(|e| Error::InvalidResponse(format!("breakpointLocations: {e}")))
}

/// Decoded `readMemory` result: start address plus tolerant base-64 decode.
#[derive(Debug, Clone)]
pub struct MemoryRead {
    pub address: String,
    pub unreadable_bytes: Option<i64>,
    pub data: Vec<u8>,
}

pub fn parse_read_memory(body: &Value) -> Result<MemoryRead> {
    let obj = require_object(body, "readMemory")?;
    let address = require_field(obj, "address", "readMemory")?
        .as_str()
        .ok_or_else(|| Error::InvalidResponse("readMemory: address is not a string".into()))?
        .to_string();
    let unreadable_bytes = obj
        .get("unreadableBytes")
        .map(|v| crate::json::Value::from(v.clone()))
        .and_then(|v| v.exact_int());
    let data = match obj.get("data").and_then(Value::as_str) {
        Some(encoded) => {
            let stripped: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, stripped)
                .map_err(|e| Error::InvalidResponse(format!("readMemory: invalid base64: {e}")))?
        }
        None => Vec::new(),
    };
    Ok(MemoryRead {
        address,
        unreadable_bytes,
        data,
    })
}

pub fn encode_memory(data: &[u8]) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, data)
}

/// Stepping options shared by `stepIn`/`stepOut`/`next`/`stepBack`.
#[derive(Debug, Clone, Default)]
pub struct SteppingOptions {
    pub single_thread: Option<bool>,
    pub granularity: Option<String>,
}

impl SteppingOptions {
    /// Merges `singleThread`/`granularity` into an existing arguments map
    /// when present.
    pub fn merge_into(&self, arguments: &mut serde_json::Map<String, Value>) {
        if let Some(single_thread) = self.single_thread {
            arguments.insert("singleThread".into(), Value::Bool(single_thread));
        }
        if let Some(granularity) = &self.granularity {
            arguments.insert("granularity".into(), Value::String(granularity.clone()));
        }
    }
}

/// Arguments accepted by an adapter-initiated `runInTerminal` request.
#[derive(Debug, Clone)]
pub struct RunInTerminalRequest {
    pub kind: Option<String>,
    pub title: Option<String>,
    pub cwd: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl RunInTerminalRequest {
    pub fn parse(arguments: Option<&Value>) -> Result<Self> {
        let arguments = arguments
            .ok_or_else(|| Error::InvalidMessage("runInTerminal: missing arguments".into()))?;
        let tagged: crate::json::Value = arguments.clone().into();
        let obj = tagged
            .as_object()
            .ok_or_else(|| Error::InvalidMessage("runInTerminal: arguments is not an object".into()))?;

        let args: Vec<String> = tagged
            .pointer("/args")
            .and_then(crate::json::Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if args.is_empty() {
            return Err(Error::InvalidMessage(
                "runInTerminal: args must be a non-empty array".into(),
            ));
        }

        let cwd = tagged
            .pointer("/cwd")
            .and_then(crate::json::Value::as_str)
            .unwrap_or_default()
            .to_string();

        // Non-string env entries are silently dropped, matching the
        // tolerance preserved from the source this runtime generalizes.
        let env = obj
            .get("env")
            .and_then(crate::json::Value::as_object)
            .map(|e| {
                e.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            kind: obj.get("kind").and_then(crate::json::Value::as_str).map(str::to_string),
            title: obj.get("title").and_then(crate::json::Value::as_str).map(str::to_string),
            cwd,
            args,
            env,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInTerminalResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell_process_id: Option<i64>,
}

/// Arguments accepted by an adapter-initiated `startDebugging` request.
#[derive(Debug, Clone)]
pub struct StartDebuggingRequest {
    pub configuration: serde_json::Map<String, Value>,
    pub request: String,
}

impl StartDebuggingRequest {
    pub fn parse(arguments: Option<&Value>) -> Result<Self> {
        let arguments = arguments
            .ok_or_else(|| Error::InvalidMessage("startDebugging: missing arguments".into()))?;
        let obj = arguments
            .as_object()
            .ok_or_else(|| Error::InvalidMessage("startDebugging: arguments is not an object".into()))?;

        let configuration = obj
            .get("configuration")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                Error::InvalidMessage("startDebugging: missing `configuration` object".into())
            })?
            .clone();

        let tagged: crate::json::Value = arguments.clone().into();
        let request = tagged
            .pointer("/request")
            .and_then(crate::json::Value::as_str)
            .unwrap_or("launch")
            .to_string();

        Ok(Self {
            configuration,
            request,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartDebuggingResult {}

/// Parsed body of a `stopped` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedBody {
    pub reason: String,
    #[serde(default)]
    pub thread_id: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub all_threads_stopped: bool,
}

/// Parsed body of a `continued` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuedBody {
    #[serde(default)]
    pub thread_id: Option<i64>,
    #[serde(default)]
    pub all_threads_continued: bool,
}

/// Parsed body of a `terminated` event.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TerminatedBody {
    #[serde(default)]
    pub restart: Option<Value>,
}

/// Parsed body of an `output` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputBody {
    #[serde(default)]
    pub category: Option<String>,
    pub output: String,
}

/// Parsed body of a `thread` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadEventBody {
    pub reason: String,
    pub thread_id: i64,
}

/// Parsed body of a `module` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleEventBody {
    pub reason: String,
    pub module: Module,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfo {
    pub exception_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ExceptionDetails>,
}

pub fn parse_exception_info(body: &Value) -> Result<ExceptionInfo> {
    serde_json::from_value(body.clone()).map_err(|e| Error::InvalidResponse(format!("exceptionInfo: {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisassembledInstruction {
    pub address: String,
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

pub fn parse_disassemble(body: &Value) -> Result<Vec<DisassembledInstruction>> {
    let obj = require_object(body, "disassemble")?;
    let instructions = require_field(obj, "instructions", "disassemble")?;
    serde_json::from_value(instructions.clone())
        .map_err(|e| Error::InvalidResponse(format!("disassemble: {e}")))
}
