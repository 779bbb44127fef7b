/*
[INPUT]:  Session + per-operation parameters
[OUTPUT]: One async flow per engine RPC, yielding state updates or typed outcomes
[POS]:    Flow layer - request/response operations
[UPDATE]: When the engine renames a method or changes a reply shape
*/

use anyhow::{Context as _, Result, anyhow};
use serde_json::Value;
use taskpanel_session::{
    CreateTaskPayload, RestartReply, SaveTaskPresetRequest, Session, SessionError, Task,
    TaskPreset,
};
use tracing::{debug, info, warn};

use crate::store::StateUpdate;

/// Substring of the engine's restart failure text that means the requestor
/// cannot pay for the task. Case-sensitive.
pub const INSUFFICIENT_FUNDS_MARKER: &str = "Not enough";

/// Engine procedures used by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    EstimatedCost,
    TaskDetails,
    TaskPresets,
    SaveTaskPreset,
    DeleteTaskPreset,
    CreateTask,
    DeleteTask,
    RestartTask,
    RunTestTask,
}

impl RpcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::EstimatedCost => "comp.tasks.estimated.cost",
            RpcMethod::TaskDetails => "comp.task",
            RpcMethod::TaskPresets => "env.preset.get",
            RpcMethod::SaveTaskPreset => "env.preset.save",
            RpcMethod::DeleteTaskPreset => "env.preset.delete",
            RpcMethod::CreateTask => "comp.task.create",
            RpcMethod::DeleteTask => "comp.task.delete",
            RpcMethod::RestartTask => "comp.task.restart",
            RpcMethod::RunTestTask => "comp.task.test.run",
        }
    }
}

/// Result of a restart request as the host sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    Success,
    InsufficientFunds,
    OtherFailure(String),
}

impl RestartOutcome {
    pub fn from_failure(message: &str) -> Self {
        if message.contains(INSUFFICIENT_FUNDS_MARKER) {
            RestartOutcome::InsufficientFunds
        } else {
            RestartOutcome::OtherFailure(message.to_string())
        }
    }
}

/// Classify a restart round trip. The engine reports refusals either as an
/// `[false, message]` reply or as an error response.
pub fn classify_restart(result: std::result::Result<Value, SessionError>) -> RestartOutcome {
    match result {
        Ok(value) => {
            let reply = RestartReply::from_value(&value);
            if reply.ok {
                RestartOutcome::Success
            } else {
                RestartOutcome::from_failure(reply.message.as_deref().unwrap_or_default())
            }
        }
        Err(err) => RestartOutcome::from_failure(&err.failure_message()),
    }
}

async fn call(session: &Session, method: RpcMethod, args: Vec<Value>) -> Result<Value> {
    debug!(method = method.as_str(), "rpc call");
    session
        .call(method.as_str(), args)
        .await
        .with_context(|| format!("rpc {}", method.as_str()))
}

pub async fn estimated_cost(session: &Session, payload: Value) -> Result<StateUpdate> {
    let reply = call(session, RpcMethod::EstimatedCost, vec![payload]).await?;
    let cost = parse_cost(&reply)?;
    info!(cost, "estimated cost received");
    Ok(StateUpdate::SetEstimatedCost(cost))
}

pub async fn task_details(session: &Session, task_id: &str) -> Result<StateUpdate> {
    let method = RpcMethod::TaskDetails.as_str();
    debug!(method, "rpc call");
    let task: Task = session
        .call_as(method, vec![Value::from(task_id)])
        .await
        .with_context(|| format!("rpc {method} task_id={task_id}"))?;
    Ok(StateUpdate::SetTaskDetails(task))
}

pub async fn task_presets(session: &Session, task_type: &str) -> Result<StateUpdate> {
    let reply = call(session, RpcMethod::TaskPresets, vec![Value::from(task_type)]).await?;
    let presets = parse_presets(reply, task_type)?;
    debug!(task_type, count = presets.len(), "task presets received");
    Ok(StateUpdate::SetTaskPresets(presets))
}

pub async fn save_task_preset(session: &Session, request: SaveTaskPresetRequest) -> Result<()> {
    let name = request.preset_name.clone();
    call(session, RpcMethod::SaveTaskPreset, request.into_args()).await?;
    info!(preset = %name, "task preset saved");
    Ok(())
}

pub async fn delete_task_preset(session: &Session, preset_name: &str) -> Result<()> {
    call(session, RpcMethod::DeleteTaskPreset, vec![Value::from(preset_name)]).await?;
    info!(preset = preset_name, "task preset deleted");
    Ok(())
}

/// Submit a real build. Dry runs never reach the engine's create method.
pub async fn create_task(session: &Session, payload: CreateTaskPayload) -> Result<()> {
    if !payload.is_build() {
        return Err(anyhow!("create_task requires resolved build options"));
    }
    let args = vec![serde_json::to_value(&payload).context("encode create payload")?];
    let reply = call(session, RpcMethod::CreateTask, args).await?;
    info!(reply = %reply, "task created");
    Ok(())
}

pub async fn delete_task(session: &Session, task_id: &str) -> Result<()> {
    call(session, RpcMethod::DeleteTask, vec![Value::from(task_id)]).await?;
    info!(task_id, "task deleted");
    Ok(())
}

pub async fn restart_task(session: &Session, task_id: &str) -> RestartOutcome {
    let result = session
        .call(RpcMethod::RestartTask.as_str(), vec![Value::from(task_id)])
        .await;
    let outcome = classify_restart(result);
    match &outcome {
        RestartOutcome::Success => info!(task_id, "task restarted"),
        RestartOutcome::InsufficientFunds => warn!(task_id, "task restart refused: insufficient funds"),
        RestartOutcome::OtherFailure(message) => warn!(task_id, message = %message, "task restart failed"),
    }
    outcome
}

pub async fn run_test_task(session: &Session, payload: Value) -> Result<Value> {
    let reply = call(session, RpcMethod::RunTestTask, vec![payload]).await?;
    info!(reply = %reply, "test task started");
    Ok(reply)
}

fn parse_cost(reply: &Value) -> Result<f64> {
    match reply {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| anyhow!("estimated cost is not numeric: {reply}"))
}

/// Presets arrive either as a list of records or as a `name -> data` map
/// scoped to the requested task type.
fn parse_presets(reply: Value, task_type: &str) -> Result<Vec<TaskPreset>> {
    match reply {
        Value::Null => Ok(Vec::new()),
        Value::Array(_) => serde_json::from_value(reply).context("decode preset list"),
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(name, data)| TaskPreset {
                name,
                task_type: Some(task_type.to_string()),
                data,
            })
            .collect()),
        other => Err(anyhow!("unexpected presets reply: {other}")),
    }
}
