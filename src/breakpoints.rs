//! Breakpoint reconciliation: keeps adapter-side breakpoint state equal
//! to client-side desired state.
//!
//! Grounded on `debug::breakpoints::BreakpointManager` for the
//! per-file grouping and `HitOperator`/`parse_hit_condition` shape, and
//! `debug::client.rs`'s `setBreakpoints` wire calls for the request
//! shape. The diff-and-clear algorithm (union of last-synchronized and
//! currently-desired files, so a file that drops to zero breakpoints is
//! still pushed with an empty list) is new: nothing upstream ever cleared
//! a file, only ever replaced it.

use std::collections::{HashMap, HashSet};

use futures_util::future::try_join_all;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::message::{Breakpoint, DataBreakpoint, FunctionBreakpoint, InstructionBreakpoint, Source, SourceBreakpoint};
use crate::protocol::BreakpointLocation;
use crate::session::Session;

/// A client-desired source breakpoint. Identity is positional (file +
/// line); `file_path` is carried on the value itself even though it is
/// also the map key the reconciler groups by.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalBreakpoint {
    pub file_path: String,
    pub line: i64,
    pub condition: String,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitOperator {
    Equal,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    MultipleOf,
}

impl HitOperator {
    pub fn evaluate(&self, current: u32, target: u32) -> bool {
        match self {
            HitOperator::Equal => current == target,
            HitOperator::GreaterThan => current > target,
            HitOperator::GreaterThanOrEqual => current >= target,
            HitOperator::LessThan => current < target,
            HitOperator::MultipleOf => target != 0 && current % target == 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitCondition {
    pub count: u32,
    pub operator: HitOperator,
}

/// Parses a DAP `hitCondition` string (`"5"`, `"==5"`, `">=3"`, `"%2"`, ...).
pub fn parse_hit_condition(s: &str) -> Option<HitCondition> {
    let s = s.trim();
    if let Some(count) = s.strip_prefix(">=") {
        Some(HitCondition {
            count: count.trim().parse().ok()?,
            operator: HitOperator::GreaterThanOrEqual,
        })
    } else if let Some(count) = s.strip_prefix('>') {
        Some(HitCondition {
            count: count.trim().parse().ok()?,
            operator: HitOperator::GreaterThan,
        })
    } else if let Some(count) = s.strip_prefix("==") {
        Some(HitCondition {
            count: count.trim().parse().ok()?,
            operator: HitOperator::Equal,
        })
    } else if let Some(count) = s.strip_prefix('=') {
        Some(HitCondition {
            count: count.trim().parse().ok()?,
            operator: HitOperator::Equal,
        })
    } else if let Some(count) = s.strip_prefix('<') {
        Some(HitCondition {
            count: count.trim().parse().ok()?,
            operator: HitOperator::LessThan,
        })
    } else if let Some(count) = s.strip_prefix('%') {
        Some(HitCondition {
            count: count.trim().parse().ok()?,
            operator: HitOperator::MultipleOf,
        })
    } else {
        s.parse().ok().map(|count| HitCondition {
            count,
            operator: HitOperator::Equal,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExceptionFilterOptions {
    pub filter_id: String,
    pub condition: Option<String>,
}

/// Reconciler state, owned by [`Session`] and mutated only under its
/// serialization discipline (the session's internal lock).
#[derive(Debug, Default)]
pub struct BreakpointState {
    pub desired_source_breakpoints: HashMap<String, Vec<ConditionalBreakpoint>>,
    pub last_synchronized_files: HashSet<String>,
    pub desired_exception_filters: Vec<String>,
    pub desired_filter_options: Vec<ExceptionFilterOptions>,
    pub desired_exception_options: Vec<Value>,
    pub pending_source_sync: bool,
    pub pending_exception_sync: bool,
}

fn to_wire(bp: &ConditionalBreakpoint) -> SourceBreakpoint {
    SourceBreakpoint {
        line: bp.line,
        column: None,
        condition: if bp.condition.is_empty() {
            None
        } else {
            Some(bp.condition.clone())
        },
        hit_condition: bp.hit_condition.clone(),
        log_message: bp.log_message.clone(),
    }
}

impl Session {
    /// Replaces the desired breakpoint set for `file_path` and marks a
    /// source sync pending. Does not push to the adapter directly;
    /// callers flush via [`Session::flush_source_breakpoints`].
    pub fn set_desired_source_breakpoints(&self, file_path: &str, breakpoints: Vec<ConditionalBreakpoint>) {
        let mut state = self.breakpoints_state().lock();
        if breakpoints.is_empty() {
            state.desired_source_breakpoints.remove(file_path);
        } else {
            state
                .desired_source_breakpoints
                .insert(file_path.to_string(), breakpoints);
        }
        state.pending_source_sync = true;
    }

    /// Diffs desired breakpoint state against `last_synchronized_files`
    /// and pushes a `setBreakpoints` per affected file, concurrently.
    pub async fn flush_source_breakpoints(&self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }

        let (grouped, files_to_update) = {
            let mut state = self.breakpoints_state().lock();
            if !state.pending_source_sync {
                return Ok(());
            }
            state.pending_source_sync = false;
            let grouped = state.desired_source_breakpoints.clone();
            let files_to_update: HashSet<String> = state
                .last_synchronized_files
                .union(&grouped.keys().cloned().collect())
                .cloned()
                .collect();
            (grouped, files_to_update)
        };

        let futures = files_to_update.iter().map(|file| {
            let wire_breakpoints: Vec<SourceBreakpoint> = grouped
                .get(file)
                .map(|bps| bps.iter().map(to_wire).collect())
                .unwrap_or_default();
            self.push_source_breakpoints(file.clone(), wire_breakpoints)
        });

        match try_join_all(futures).await {
            Ok(_) => {
                let mut state = self.breakpoints_state().lock();
                state.last_synchronized_files = grouped.keys().cloned().collect();
                Ok(())
            }
            Err(e) => {
                self.breakpoints_state().lock().pending_source_sync = true;
                Err(e)
            }
        }
    }

    async fn push_source_breakpoints(&self, file: String, breakpoints: Vec<SourceBreakpoint>) -> Result<Vec<Breakpoint>> {
        let arguments = serde_json::json!({
            "source": Source::for_path(&file),
            "breakpoints": breakpoints,
        });
        let response = self.broker().send_request("setBreakpoints", Some(arguments)).await?;
        if !response.success {
            return Err(Error::AdapterUnavailable(
                response
                    .message
                    .unwrap_or_else(|| "setBreakpoints failed".into()),
            ));
        }
        let body = response
            .body
            .ok_or_else(|| Error::InvalidResponse("setBreakpoints: missing body".into()))?;
        let breakpoints = body
            .get("breakpoints")
            .ok_or_else(|| Error::InvalidResponse("setBreakpoints: missing `breakpoints`".into()))?;
        serde_json::from_value(breakpoints.clone())
            .map_err(|e| Error::InvalidResponse(format!("setBreakpoints: {e}")))
    }

    /// Sets desired exception-breakpoint state and marks a sync pending.
    pub fn set_desired_exception_filters(
        &self,
        filters: Vec<String>,
        filter_options: Vec<ExceptionFilterOptions>,
        exception_options: Vec<Value>,
    ) {
        let mut state = self.breakpoints_state().lock();
        state.desired_exception_filters = filters;
        state.desired_filter_options = filter_options;
        state.desired_exception_options = exception_options;
        state.pending_exception_sync = true;
    }

    /// Exception-breakpoint reconciliation: one `setExceptionBreakpoints`
    /// covering filters, filter options, and exception options.
    pub async fn flush_exception_breakpoints(&self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }

        let (filters, filter_options, exception_options) = {
            let mut state = self.breakpoints_state().lock();
            if !state.pending_exception_sync {
                return Ok(());
            }
            state.pending_exception_sync = false;
            (
                state.desired_exception_filters.clone(),
                state.desired_filter_options.clone(),
                state.desired_exception_options.clone(),
            )
        };

        if !filter_options.is_empty() && !self.capabilities().supports("supportsExceptionFilterOptions") {
            self.breakpoints_state().lock().pending_exception_sync = true;
            return Err(Error::UnsupportedFeature("supportsExceptionFilterOptions".into()));
        }
        if !exception_options.is_empty() && !self.capabilities().supports("supportsExceptionOptions") {
            self.breakpoints_state().lock().pending_exception_sync = true;
            return Err(Error::UnsupportedFeature("supportsExceptionOptions".into()));
        }

        let mut arguments = serde_json::Map::new();
        arguments.insert("filters".into(), serde_json::json!(filters));
        if !filter_options.is_empty() {
            let encoded: Vec<Value> = filter_options
                .iter()
                .map(|o| {
                    let mut m = serde_json::Map::new();
                    m.insert("filterId".into(), Value::String(o.filter_id.clone()));
                    if let Some(condition) = &o.condition {
                        m.insert("condition".into(), Value::String(condition.clone()));
                    }
                    Value::Object(m)
                })
                .collect();
            arguments.insert("filterOptions".into(), Value::Array(encoded));
        }
        if !exception_options.is_empty() {
            arguments.insert("exceptionOptions".into(), Value::Array(exception_options));
        }

        let response = self
            .broker()
            .send_request("setExceptionBreakpoints", Some(Value::Object(arguments)))
            .await;

        match response {
            Ok(r) if r.success => Ok(()),
            Ok(r) => {
                self.breakpoints_state().lock().pending_exception_sync = true;
                Err(Error::AdapterUnavailable(
                    r.message.unwrap_or_else(|| "setExceptionBreakpoints failed".into()),
                ))
            }
            Err(e) => {
                self.breakpoints_state().lock().pending_exception_sync = true;
                Err(e)
            }
        }
    }

    /// One-shot, not reconciled: `setFunctionBreakpoints`.
    pub async fn set_function_breakpoints(&self, breakpoints: Vec<FunctionBreakpoint>) -> Result<Vec<Breakpoint>> {
        self.require_capability("supportsFunctionBreakpoints")?;
        let arguments = serde_json::json!({ "breakpoints": breakpoints });
        let response = self.broker().send_request("setFunctionBreakpoints", Some(arguments)).await?;
        self.parse_required_breakpoints(response, "setFunctionBreakpoints")
    }

    /// One-shot, not reconciled: `setInstructionBreakpoints`.
    pub async fn set_instruction_breakpoints(&self, breakpoints: Vec<InstructionBreakpoint>) -> Result<Vec<Breakpoint>> {
        self.require_capability("supportsInstructionBreakpoints")?;
        let arguments = serde_json::json!({ "breakpoints": breakpoints });
        let response = self
            .broker()
            .send_request("setInstructionBreakpoints", Some(arguments))
            .await?;
        self.parse_required_breakpoints(response, "setInstructionBreakpoints")
    }

    /// One-shot, not reconciled: `setDataBreakpoints`.
    pub async fn set_data_breakpoints(&self, breakpoints: Vec<DataBreakpoint>) -> Result<Vec<Breakpoint>> {
        self.require_capability("supportsDataBreakpoints")?;
        let arguments = serde_json::json!({ "breakpoints": breakpoints });
        let response = self.broker().send_request("setDataBreakpoints", Some(arguments)).await?;
        self.parse_required_breakpoints(response, "setDataBreakpoints")
    }

    fn parse_required_breakpoints(&self, response: crate::message::Response, command: &str) -> Result<Vec<Breakpoint>> {
        if !response.success {
            return Err(Error::AdapterUnavailable(
                response.message.unwrap_or_else(|| format!("{command} failed")),
            ));
        }
        let body = response
            .body
            .ok_or_else(|| Error::InvalidResponse(format!("{command}: missing body")))?;
        let breakpoints = body
            .get("breakpoints")
            .ok_or_else(|| Error::InvalidResponse(format!("{command}: missing `breakpoints`")))?;
        serde_json::from_value(breakpoints.clone())
            .map_err(|e| Error::InvalidResponse(format!("{command}: {e}")))
    }

    /// `breakpointLocations(source, line, column?, endLine?, endColumn?)`.
    pub async fn breakpoint_locations(
        &self,
        source_path: &str,
        line: i64,
        column: Option<i64>,
        end_line: Option<i64>,
        end_column: Option<i64>,
    ) -> Result<Vec<BreakpointLocation>> {
        self.require_capability("supportsBreakpointLocationsRequest")?;
        let mut arguments = serde_json::Map::new();
        arguments.insert("source".into(), serde_json::to_value(Source::for_path(source_path))?);
        arguments.insert("line".into(), Value::from(line));
        if let Some(column) = column {
            arguments.insert("column".into(), Value::from(column));
        }
        if let Some(end_line) = end_line {
            arguments.insert("endLine".into(), Value::from(end_line));
        }
        if let Some(end_column) = end_column {
            arguments.insert("endColumn".into(), Value::from(end_column));
        }
        let response = self
            .broker()
            .send_request("breakpointLocations", Some(Value::Object(arguments)))
            .await?;
        if !response.success {
            return Err(Error::AdapterUnavailable(
                response
                    .message
                    .unwrap_or_else(|| "breakpointLocations failed".into()),
            ));
        }
        let body = response
            .body
            .ok_or_else(|| Error::InvalidResponse("breakpointLocations: missing body".into()))?;
        crate::protocol::parse_breakpoint_locations(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_hit_condition_operator() {
        assert_eq!(
            parse_hit_condition("5"),
            Some(HitCondition { count: 5, operator: HitOperator::Equal })
        );
        assert_eq!(
            parse_hit_condition("==5"),
            Some(HitCondition { count: 5, operator: HitOperator::Equal })
        );
        assert_eq!(
            parse_hit_condition(">=3"),
            Some(HitCondition { count: 3, operator: HitOperator::GreaterThanOrEqual })
        );
        assert_eq!(
            parse_hit_condition(">3"),
            Some(HitCondition { count: 3, operator: HitOperator::GreaterThan })
        );
        assert_eq!(
            parse_hit_condition("<3"),
            Some(HitCondition { count: 3, operator: HitOperator::LessThan })
        );
        assert_eq!(
            parse_hit_condition("%2"),
            Some(HitCondition { count: 2, operator: HitOperator::MultipleOf })
        );
        assert_eq!(parse_hit_condition("not a number"), None);
    }

    #[test]
    fn hit_operator_evaluates_correctly() {
        assert!(HitOperator::MultipleOf.evaluate(6, 2));
        assert!(!HitOperator::MultipleOf.evaluate(5, 2));
        assert!(HitOperator::GreaterThanOrEqual.evaluate(3, 3));
        assert!(!HitOperator::LessThan.evaluate(3, 3));
    }
}
