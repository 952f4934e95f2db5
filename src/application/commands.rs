use crate::application::bootstrap::{bootstrap_workspace, BootstrapResult};
use crate::application::plan_store::PlanStore;
use crate::application::plan_sync::{PlanSyncService, RetryPolicy};
use crate::domain::models::{EffectiveRange, Plan, PlanMode, PlanSnapshot};
use crate::domain::period::{plans_for_period, Period};
use crate::domain::time::local_now_provider;
use crate::infrastructure::config::{
    load_api_settings_from_env, load_api_settings_from_lookup, parse_timezone, ApiSettings,
};
use crate::infrastructure::credential_store::{CredentialStore, KeyringCredentialStore};
use crate::infrastructure::enforcement_sink::FileEnforcementSink;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::kv_store::SqliteKeyValueStore;
use crate::infrastructure::plan_api_client::{PlanApiClient, ReqwestPlanApiClient};
use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type RuntimeStore = PlanStore<SqliteKeyValueStore, FileEnforcementSink>;

pub struct AppState {
    logs_dir: PathBuf,
    api_settings: ApiSettings,
    credentials: Arc<dyn CredentialStore>,
    sync_service: PlanSyncService<dyn PlanApiClient>,
    runtime: Mutex<RuntimeStore>,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let api_settings = load_api_settings_from_env(&bootstrap.config)?;
        let client = ReqwestPlanApiClient::new(
            &api_settings.base_url,
            Duration::from_millis(api_settings.timeout_ms),
            api_settings.platform.clone(),
        )?;
        Self::assemble(
            bootstrap,
            api_settings,
            Arc::new(client),
            Arc::new(KeyringCredentialStore::default()),
        )
    }

    // Environment overrides are not consulted here.
    pub fn with_components(
        workspace_root: &Path,
        client: Arc<dyn PlanApiClient>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(workspace_root)?;
        let api_settings = load_api_settings_from_lookup(&bootstrap.config, |_| None)?;
        Self::assemble(bootstrap, api_settings, client, credentials)
    }

    fn assemble(
        bootstrap: BootstrapResult,
        api_settings: ApiSettings,
        client: Arc<dyn PlanApiClient>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, InfraError> {
        let timezone = parse_timezone(bootstrap.config.app.timezone.as_deref())?;
        let mut store = PlanStore::new(
            Arc::new(SqliteKeyValueStore::new(&bootstrap.database_path)),
            Arc::new(FileEnforcementSink::new(&bootstrap.enforcement_path)),
        )
        .with_policy(bootstrap.config.policies.resolution)
        .with_now_provider(local_now_provider(timezone));
        store.load();

        let sync_service = PlanSyncService::new(client).with_retry_policy(RetryPolicy {
            max_retries: api_settings.max_retries,
            base_delay_ms: api_settings.base_delay_ms,
        });

        Ok(Self {
            logs_dir: bootstrap.logs_dir,
            api_settings,
            credentials,
            sync_service,
            runtime: Mutex::new(store),
            log_guard: Mutex::new(()),
        })
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        log::info!("{command}: {message}");
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        log::error!("{command}: {message}");
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    fn access_token(&self) -> Result<String, InfraError> {
        if let Some(token) = self.api_settings.access_token.as_deref() {
            return Ok(token.to_string());
        }
        self.credentials
            .load_token()?
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or(InfraError::Unauthorized)
    }

    // A rejected keyring token is removed; an environment token is left to
    // whoever set it.
    fn swallow<T>(&self, command: &str, result: Result<T, InfraError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                if matches!(error, InfraError::Unauthorized) && self.api_settings.access_token.is_none() {
                    if let Err(delete_error) = self.credentials.delete_token() {
                        self.log_error(command, &format!("failed to forget access token: {delete_error}"));
                    }
                }
                self.command_error(command, &error);
                None
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlanStateResponse {
    pub current_plan: Option<Plan>,
    pub next_plan: Option<Plan>,
    pub elapsed_minutes: u32,
    pub focus_mode: bool,
    pub recurring_plans: Vec<Plan>,
    pub once_plans: Vec<Plan>,
    pub exit_plan_ids: Vec<String>,
    pub is_paused: bool,
}

pub fn save_access_token_impl(state: &AppState, token: String) -> Result<(), InfraError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(InfraError::Credential("access token must not be empty".to_string()));
    }
    state.credentials.save_token(token)?;
    state.log_info("save_access_token", "stored plan api access token");
    Ok(())
}

pub fn resolve_current_plan_impl(state: &AppState) -> Result<PlanSnapshot, InfraError> {
    let snapshot = lock_runtime(state)?.resolve_current_plan();
    if !snapshot.purged_plan_ids.is_empty() {
        state.log_info(
            "resolve_current_plan",
            &format!("purged expired one-time plans {}", snapshot.purged_plan_ids.join(",")),
        );
    }
    Ok(snapshot)
}

pub fn get_plan_state_impl(state: &AppState) -> Result<PlanStateResponse, InfraError> {
    let store = lock_runtime(state)?;
    Ok(PlanStateResponse {
        current_plan: store.current_plan().cloned(),
        next_plan: store.next_plan().cloned(),
        elapsed_minutes: store.elapsed_minutes(),
        focus_mode: store.is_focus_mode(),
        recurring_plans: store.recurring_plans().to_vec(),
        once_plans: store.once_plans().to_vec(),
        exit_plan_ids: store.exit_plan_ids().to_vec(),
        is_paused: store.is_paused(),
    })
}

pub fn list_plans_impl(state: &AppState, period: Option<String>) -> Result<Vec<Plan>, InfraError> {
    let period = period
        .as_deref()
        .unwrap_or_default()
        .parse::<Period>()
        .map_err(InfraError::InvalidConfig)?;
    let store = lock_runtime(state)?;
    Ok(plans_for_period(store.recurring_plans(), period, store.today()))
}

pub fn add_once_plan_impl(state: &AppState, plan: Plan) -> Result<(), InfraError> {
    let plan_id = plan.id.clone();
    lock_runtime(state)?.add_once_plan(plan)?;
    state.log_info("add_once_plan", &format!("added one-time plan_id={plan_id}"));
    Ok(())
}

pub fn start_once_plan_impl(
    state: &AppState,
    minutes: u16,
    mode: PlanMode,
) -> Result<PlanSnapshot, InfraError> {
    let plan_id = format!("once-{}", Utc::now().timestamp_millis());
    let (plan, snapshot) = {
        let mut store = lock_runtime(state)?;
        let plan = store.start_once_plan(&plan_id, minutes, mode)?;
        (plan, store.resolve_current_plan())
    };
    state.log_info(
        "start_once_plan",
        &format!("started one-time plan_id={} {}-{}", plan.id, plan.start, plan.end),
    );
    Ok(snapshot)
}

pub fn remove_once_plan_impl(state: &AppState, plan_id: String) -> Result<bool, InfraError> {
    let removed = lock_runtime(state)?.remove_once_plan(&plan_id);
    if removed {
        state.log_info("remove_once_plan", &format!("removed one-time plan_id={plan_id}"));
    }
    Ok(removed)
}

pub fn clear_plans_impl(state: &AppState) -> Result<(), InfraError> {
    lock_runtime(state)?.clear_all_plans();
    state.log_info("clear_plans", "cleared all plans");
    Ok(())
}

pub fn exit_plan_impl(state: &AppState, plan_id: String) -> Result<PlanSnapshot, InfraError> {
    let plan_id = plan_id.trim();
    if plan_id.is_empty() {
        return Err(InfraError::InvalidPlan("plan id must not be empty".to_string()));
    }
    let snapshot = {
        let mut store = lock_runtime(state)?;
        store.exit_plan(plan_id);
        store.resolve_current_plan()
    };
    state.log_info("exit_plan", &format!("exited plan_id={plan_id} for today"));
    Ok(snapshot)
}

pub fn pause_plan_impl(state: &AppState, paused: bool) -> Result<bool, InfraError> {
    let (changed, plan_id) = {
        let mut store = lock_runtime(state)?;
        let changed = store.pause_current_plan(paused);
        (changed, store.current_plan().map(|plan| plan.id.clone()))
    };
    if let (true, Some(plan_id)) = (changed, plan_id) {
        let action = if paused { "paused" } else { "resumed" };
        state.log_info("pause_plan", &format!("{action} plan_id={plan_id}"));
    }
    Ok(changed)
}

pub fn complete_plan_impl(state: &AppState) -> Result<PlanSnapshot, InfraError> {
    let (completed, snapshot) = {
        let mut store = lock_runtime(state)?;
        let completed = store.current_plan().map(|plan| plan.id.clone());
        (completed, store.complete_plan())
    };
    if let Some(plan_id) = completed {
        state.log_info("complete_plan", &format!("completed plan_id={plan_id}"));
    }
    Ok(snapshot)
}

pub fn set_elapsed_minutes_impl(state: &AppState, minutes: u32) -> Result<(), InfraError> {
    lock_runtime(state)?.set_elapsed_minutes(minutes);
    Ok(())
}

pub fn effective_ranges_impl(state: &AppState) -> Result<Vec<EffectiveRange>, InfraError> {
    Ok(lock_runtime(state)?.recompute_effective_ranges())
}

// Resolves only when nothing is current.
pub async fn fetch_plans_impl(state: &AppState) -> Option<Vec<Plan>> {
    const COMMAND: &str = "fetch_plans";
    let token = state.swallow(COMMAND, state.access_token())?;
    let plans = state.swallow(COMMAND, state.sync_service.fetch_plans(&token).await)?;

    {
        let mut store = state.swallow(COMMAND, lock_runtime(state))?;
        store.set_recurring_plans(plans.clone());
        if store.current_plan().is_none() {
            store.resolve_current_plan();
        }
    }

    state.log_info(COMMAND, &format!("fetched {} recurring plan(s)", plans.len()));
    Some(plans)
}

pub async fn create_plan_impl(state: &AppState, plan: Plan) -> Option<Plan> {
    const COMMAND: &str = "create_plan";
    let token = state.swallow(COMMAND, state.access_token())?;
    let created = state.swallow(COMMAND, state.sync_service.create_plan(&token, &plan).await)?;
    let created = created.unwrap_or(plan);
    state.log_info(COMMAND, &format!("created plan_id={}", created.id));
    fetch_plans_impl(state).await;
    Some(created)
}

pub async fn update_plan_impl(state: &AppState, plan_id: String, plan: Plan) -> bool {
    const COMMAND: &str = "update_plan";
    let Some(token) = state.swallow(COMMAND, state.access_token()) else {
        return false;
    };
    let result = state.sync_service.update_plan(&token, &plan_id, &plan).await;
    if state.swallow(COMMAND, result).is_none() {
        return false;
    }
    state.log_info(COMMAND, &format!("updated plan_id={plan_id}"));
    fetch_plans_impl(state).await;
    true
}

pub async fn delete_plan_impl(state: &AppState, plan_id: String) -> bool {
    const COMMAND: &str = "delete_plan";
    let Some(token) = state.swallow(COMMAND, state.access_token()) else {
        return false;
    };
    let result = state.sync_service.delete_plan(&token, &plan_id).await;
    if state.swallow(COMMAND, result).is_none() {
        return false;
    }
    state.log_info(COMMAND, &format!("deleted plan_id={plan_id}"));
    fetch_plans_impl(state).await;
    true
}

fn lock_runtime(state: &AppState) -> Result<MutexGuard<'_, RuntimeStore>, InfraError> {
    state
        .runtime
        .lock()
        .map_err(|error| InfraError::InvalidConfig(format!("runtime lock poisoned: {error}")))
}
