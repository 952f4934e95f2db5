pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::commands::{AppState, PlanStateResponse};
pub use application::plan_store::PlanStore;
pub use application::plan_sync::{PlanSyncService, RetryPolicy};
pub use domain::models::{EffectiveRange, Plan, PlanMode, PlanSnapshot, Repeat, ResolvePolicy, TieBreak};
pub use domain::period::{plans_for_period, Period};
pub use infrastructure::error::InfraError;

use application::commands::{
    clear_plans_impl, complete_plan_impl, create_plan_impl, delete_plan_impl, exit_plan_impl,
    fetch_plans_impl, get_plan_state_impl, list_plans_impl, pause_plan_impl, resolve_current_plan_impl,
    save_access_token_impl, start_once_plan_impl,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerCommand {
    Resolve { sync: bool },
    State,
    List { period: Option<String> },
    Once { minutes: u16, mode: PlanMode },
    Create {
        start: String,
        end: String,
        days: String,
        mode: PlanMode,
        name: Option<String>,
    },
    Delete { plan_id: String },
    Exit { plan_id: String },
    Pause,
    Resume,
    Complete,
    Clear,
    Login { token: String },
}

#[derive(Debug, Serialize)]
struct ResolveOutput {
    synced: Option<bool>,
    #[serde(flatten)]
    snapshot: PlanSnapshot,
    focus_mode: bool,
}

pub async fn run(workspace_root: PathBuf, command: RunnerCommand) -> Result<String, String> {
    let state = AppState::new(workspace_root).map_err(|error| error.to_string())?;

    let output = match command {
        RunnerCommand::Resolve { sync } => {
            let synced = if sync {
                Some(fetch_plans_impl(&state).await.is_some())
            } else {
                None
            };
            let snapshot = resolve_current_plan_impl(&state)
                .map_err(|error| state.command_error("resolve_current_plan", &error))?;
            let focus_mode = snapshot
                .current_plan
                .as_ref()
                .is_some_and(|plan| plan.mode == PlanMode::Focus);
            to_json(&ResolveOutput {
                synced,
                snapshot,
                focus_mode,
            })
        }
        RunnerCommand::State => to_json(
            &get_plan_state_impl(&state).map_err(|error| state.command_error("get_plan_state", &error))?,
        ),
        RunnerCommand::List { period } => to_json(
            &list_plans_impl(&state, period).map_err(|error| state.command_error("list_plans", &error))?,
        ),
        RunnerCommand::Once { minutes, mode } => to_json(
            &start_once_plan_impl(&state, minutes, mode)
                .map_err(|error| state.command_error("start_once_plan", &error))?,
        ),
        RunnerCommand::Create {
            start,
            end,
            days,
            mode,
            name,
        } => {
            let mut plan = Plan::from_times("", &start, &end, Repeat::parse(&days), mode)
                .map_err(|error| state.command_error("create_plan", &InfraError::InvalidPlan(error)))?;
            plan.name = name;
            let created = create_plan_impl(&state, plan)
                .await
                .ok_or_else(|| "create_plan failed; see logs/commands.log".to_string())?;
            to_json(&created)
        }
        RunnerCommand::Delete { plan_id } => {
            if !delete_plan_impl(&state, plan_id.clone()).await {
                return Err("delete_plan failed; see logs/commands.log".to_string());
            }
            to_json(&serde_json::json!({ "deleted": plan_id }))
        }
        RunnerCommand::Pause => to_json(&pause_output(&state, true)?),
        RunnerCommand::Resume => to_json(&pause_output(&state, false)?),
        RunnerCommand::Complete => to_json(
            &complete_plan_impl(&state).map_err(|error| state.command_error("complete_plan", &error))?,
        ),
        RunnerCommand::Exit { plan_id } => to_json(
            &exit_plan_impl(&state, plan_id).map_err(|error| state.command_error("exit_plan", &error))?,
        ),
        RunnerCommand::Clear => {
            clear_plans_impl(&state).map_err(|error| state.command_error("clear_plans", &error))?;
            to_json(&serde_json::json!({ "cleared": true }))
        }
        RunnerCommand::Login { token } => {
            save_access_token_impl(&state, token)
                .map_err(|error| state.command_error("save_access_token", &error))?;
            to_json(&serde_json::json!({ "saved": true }))
        }
    };
    output.map_err(|error| state.command_error("run", &InfraError::from(error)))
}

fn pause_output(state: &AppState, paused: bool) -> Result<serde_json::Value, String> {
    let changed = pause_plan_impl(state, paused).map_err(|error| state.command_error("pause_plan", &error))?;
    Ok(serde_json::json!({ "paused": paused, "changed": changed }))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}
