use crate::domain::models::{EffectiveRange, Plan, PlanMode, PlanSnapshot, ResolvePolicy, TieBreak};
use crate::domain::time::{current_minute, local_now_provider, NowProvider};
use crate::infrastructure::enforcement_sink::EnforcementSink;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::kv_store::KeyValueStore;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

pub const RECURRING_PLANS_KEY: &str = "recurring_plans";
pub const ONCE_PLANS_KEY: &str = "once_plans";
pub const EXIT_PLAN_IDS_KEY: &str = "exit_plan_ids";
pub const PAUSED_PLAN_ID_KEY: &str = "paused_plan_id";

/// Mutations and resolution are separate calls: after changing the lists,
/// call [`PlanStore::resolve_current_plan`] to refresh the current and next
/// plan. Storage and sink failures are logged, never returned.
pub struct PlanStore<K, E>
where
    K: KeyValueStore,
    E: EnforcementSink,
{
    storage: Arc<K>,
    sink: Arc<E>,
    policy: ResolvePolicy,
    now_provider: NowProvider,
    recurring_plans: Vec<Plan>,
    once_plans: Vec<Plan>,
    current_plan: Option<Plan>,
    next_plan: Option<Plan>,
    elapsed_minutes: u32,
    exit_plan_ids: Vec<String>,
    paused_plan_id: Option<String>,
}

impl<K, E> PlanStore<K, E>
where
    K: KeyValueStore,
    E: EnforcementSink,
{
    pub fn new(storage: Arc<K>, sink: Arc<E>) -> Self {
        Self {
            storage,
            sink,
            policy: ResolvePolicy::default(),
            now_provider: local_now_provider(None),
            recurring_plans: Vec::new(),
            once_plans: Vec::new(),
            current_plan: None,
            next_plan: None,
            elapsed_minutes: 0,
            exit_plan_ids: Vec::new(),
            paused_plan_id: None,
        }
    }

    pub fn with_policy(mut self, policy: ResolvePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn set_now_provider(&mut self, now_provider: NowProvider) {
        self.now_provider = now_provider;
    }

    pub fn load(&mut self) {
        self.recurring_plans = self.load_list(RECURRING_PLANS_KEY);
        self.once_plans = self.load_list(ONCE_PLANS_KEY);
        let today_prefix = exit_prefix(self.today());
        self.exit_plan_ids = self
            .load_list::<String>(EXIT_PLAN_IDS_KEY)
            .into_iter()
            .filter(|entry| entry.starts_with(&today_prefix))
            .collect();
        self.paused_plan_id = match self.storage.get(PAUSED_PLAN_ID_KEY) {
            Ok(value) => value
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            Err(error) => {
                log::warn!("failed to read {PAUSED_PLAN_ID_KEY}: {error}");
                None
            }
        };
        log::info!(
            "loaded {} recurring and {} one-time plan(s)",
            self.recurring_plans.len(),
            self.once_plans.len()
        );
        self.recompute_effective_ranges();
    }

    pub fn today(&self) -> NaiveDate {
        (self.now_provider)().date()
    }

    pub fn recurring_plans(&self) -> &[Plan] {
        &self.recurring_plans
    }

    pub fn once_plans(&self) -> &[Plan] {
        &self.once_plans
    }

    pub fn all_plans(&self) -> Vec<Plan> {
        self.recurring_plans
            .iter()
            .chain(self.once_plans.iter())
            .cloned()
            .collect()
    }

    pub fn current_plan(&self) -> Option<&Plan> {
        self.current_plan.as_ref()
    }

    pub fn next_plan(&self) -> Option<&Plan> {
        self.next_plan.as_ref()
    }

    pub fn is_focus_mode(&self) -> bool {
        self.current_plan
            .as_ref()
            .is_some_and(|plan| plan.mode == PlanMode::Focus)
    }

    pub fn elapsed_minutes(&self) -> u32 {
        self.elapsed_minutes
    }

    pub fn set_elapsed_minutes(&mut self, minutes: u32) {
        self.elapsed_minutes = minutes;
    }

    pub fn exit_plan_ids(&self) -> &[String] {
        &self.exit_plan_ids
    }

    pub fn is_paused(&self) -> bool {
        match (&self.current_plan, &self.paused_plan_id) {
            (Some(plan), Some(paused)) => plan.id == *paused,
            _ => false,
        }
    }

    pub fn set_paused(&mut self, plan_id: Option<&str>) {
        self.paused_plan_id = plan_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ToOwned::to_owned);
        let result = match self.paused_plan_id.as_deref() {
            Some(id) => self.storage.set(PAUSED_PLAN_ID_KEY, id),
            None => self.storage.delete(PAUSED_PLAN_ID_KEY),
        };
        if let Err(error) = result {
            log::warn!("failed to persist {PAUSED_PLAN_ID_KEY}: {error}");
        }
    }

    pub fn pause_current_plan(&mut self, paused: bool) -> bool {
        let Some(plan_id) = self.current_plan.as_ref().map(|plan| plan.id.clone()) else {
            return false;
        };
        if paused {
            self.set_paused(Some(&plan_id));
        } else {
            self.set_paused(None);
        }
        true
    }

    pub fn complete_plan(&mut self) -> PlanSnapshot {
        self.pause_current_plan(false);
        self.elapsed_minutes = 0;
        self.resolve_current_plan()
    }

    pub fn snapshot(&self) -> PlanSnapshot {
        PlanSnapshot {
            current_plan: self.current_plan.clone(),
            next_plan: self.next_plan.clone(),
            elapsed_minutes: self.elapsed_minutes,
            purged_plan_ids: Vec::new(),
        }
    }

    pub fn set_recurring_plans(&mut self, plans: Vec<Plan>) {
        self.recurring_plans = plans;
        self.persist(RECURRING_PLANS_KEY, &self.recurring_plans);
        self.recompute_effective_ranges();
    }

    pub fn set_once_plans(&mut self, plans: Vec<Plan>) {
        self.once_plans = plans;
        self.persist(ONCE_PLANS_KEY, &self.once_plans);
        self.recompute_effective_ranges();
    }

    pub fn add_once_plan(&mut self, mut plan: Plan) -> Result<(), InfraError> {
        plan.validate().map_err(InfraError::InvalidPlan)?;
        if !plan.is_once() {
            return Err(InfraError::InvalidPlan(
                "one-time plans must use repeat \"once\"".to_string(),
            ));
        }
        plan.id = plan.id.trim().to_string();
        log::info!("adding one-time plan id={} {}-{}", plan.id, plan.start, plan.end);
        self.once_plans.push(plan);
        self.persist(ONCE_PLANS_KEY, &self.once_plans);
        self.recompute_effective_ranges();
        Ok(())
    }

    pub fn start_once_plan(&mut self, plan_id: &str, minutes: u16, mode: PlanMode) -> Result<Plan, InfraError> {
        let plan = Plan::once_starting_at((self.now_provider)(), plan_id, minutes, mode)
            .map_err(InfraError::InvalidPlan)?;
        self.add_once_plan(plan.clone())?;
        Ok(plan)
    }

    pub fn remove_once_plan(&mut self, plan_id: &str) -> bool {
        let plan_id = plan_id.trim();
        let before = self.once_plans.len();
        self.once_plans.retain(|plan| plan.id != plan_id);
        let removed = self.once_plans.len() != before;
        if removed {
            self.persist(ONCE_PLANS_KEY, &self.once_plans);
        }
        self.recompute_effective_ranges();
        removed
    }

    pub fn clear_all_plans(&mut self) {
        self.recurring_plans.clear();
        self.once_plans.clear();
        self.persist(RECURRING_PLANS_KEY, &self.recurring_plans);
        self.persist(ONCE_PLANS_KEY, &self.once_plans);
        self.set_paused(None);
        self.recompute_effective_ranges();
    }

    pub fn exit_plan(&mut self, plan_id: &str) {
        let plan_id = plan_id.trim();
        let prefix = exit_prefix(self.today());
        let entry = format!("{prefix}{plan_id}");
        self.exit_plan_ids.retain(|existing| existing.starts_with(&prefix));
        if !self.exit_plan_ids.contains(&entry) {
            self.exit_plan_ids.push(entry);
        }
        if self.current_plan.as_ref().is_some_and(|plan| plan.id == plan_id) {
            self.elapsed_minutes = 0;
        }
        if self.paused_plan_id.as_deref() == Some(plan_id) {
            self.set_paused(None);
        }
        self.persist(EXIT_PLAN_IDS_KEY, &self.exit_plan_ids);
    }

    pub fn recompute_effective_ranges(&self) -> Vec<EffectiveRange> {
        let ranges = self
            .recurring_plans
            .iter()
            .chain(self.once_plans.iter())
            .map(Plan::effective_range)
            .collect::<Vec<_>>();

        match serde_json::to_string(&ranges) {
            Ok(payload) => {
                log::debug!("publishing {} effective range(s)", ranges.len());
                if let Err(error) = self.sink.update(&payload) {
                    log::warn!("failed to publish enforcement schedule: {error}");
                }
            }
            Err(error) => log::warn!("failed to serialize enforcement schedule: {error}"),
        }
        ranges
    }

    /// Current plan: first candidate whose half-open `[start_min, end_min)`
    /// window contains the current minute. Next plan: first candidate starting
    /// later. Expired one-time plans are purged afterwards.
    pub fn resolve_current_plan(&mut self) -> PlanSnapshot {
        let minute = current_minute(&self.now_provider, false);
        let today = self.today();

        let (current_plan, next_plan) = {
            let exited = self.exited_today(today);
            let candidates = self
                .ordered_plans()
                .filter(|plan| self.is_candidate(plan, today))
                .collect::<Vec<_>>();
            let current = candidates
                .iter()
                .find(|plan| plan.contains_minute(minute) && !exited.contains(plan.id.as_str()))
                .map(|plan| (*plan).clone());
            let next = candidates
                .iter()
                .find(|plan| plan.start_min > minute)
                .map(|plan| (*plan).clone());
            (current, next)
        };

        let previous_id = self.current_plan.as_ref().map(|plan| plan.id.clone());
        if previous_id != current_plan.as_ref().map(|plan| plan.id.clone()) {
            self.elapsed_minutes = 0;
        }
        self.current_plan = current_plan;
        self.next_plan = next_plan;

        let purged_plan_ids = self.purge_expired_once_plans(minute);
        PlanSnapshot {
            purged_plan_ids,
            ..self.snapshot()
        }
    }

    fn ordered_plans(&self) -> Box<dyn Iterator<Item = &Plan> + '_> {
        match self.policy.tie_break {
            TieBreak::RecurringFirst => Box::new(self.recurring_plans.iter().chain(self.once_plans.iter())),
            TieBreak::OnceFirst => Box::new(self.once_plans.iter().chain(self.recurring_plans.iter())),
        }
    }

    fn is_candidate(&self, plan: &Plan, today: NaiveDate) -> bool {
        !self.policy.respect_weekdays || plan.applies_on(today)
    }

    fn exited_today(&self, today: NaiveDate) -> HashSet<&str> {
        let prefix = exit_prefix(today);
        self.exit_plan_ids
            .iter()
            .filter_map(|entry| entry.strip_prefix(prefix.as_str()))
            .collect()
    }

    fn purge_expired_once_plans(&mut self, minute: u16) -> Vec<String> {
        let (expired, remaining): (Vec<Plan>, Vec<Plan>) = std::mem::take(&mut self.once_plans)
            .into_iter()
            .partition(|plan| plan.end_min <= minute);
        self.once_plans = remaining;
        if expired.is_empty() {
            return Vec::new();
        }

        let purged = expired.into_iter().map(|plan| plan.id).collect::<Vec<_>>();
        log::info!("purged expired one-time plan(s): {}", purged.join(","));
        self.persist(ONCE_PLANS_KEY, &self.once_plans);
        self.recompute_effective_ranges();
        purged
    }

    fn persist<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let result = serde_json::to_string(value)
            .map_err(InfraError::from)
            .and_then(|raw| self.storage.set(key, &raw));
        if let Err(error) = result {
            log::warn!("failed to persist {key}: {error}");
        }
    }

    fn load_list<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        match self.storage.get(key) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|error| {
                log::warn!("discarding malformed {key}: {error}");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(error) => {
                log::warn!("failed to read {key}: {error}");
                Vec::new()
            }
        }
    }
}

fn exit_prefix(day: NaiveDate) -> String {
    format!("{}:", day.format("%Y-%m-%d"))
}
