use crate::domain::models::{Plan, PlanForm};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::plan_api_client::PlanApiClient;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Duration as TokioDuration};

const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 500,
        }
    }
}

// Results go back to the caller; the local store is not touched here.
pub struct PlanSyncService<C>
where
    C: PlanApiClient + ?Sized,
{
    client: Arc<C>,
    retry_policy: RetryPolicy,
}

impl<C> PlanSyncService<C>
where
    C: PlanApiClient + ?Sized,
{
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    // One-time plans are local-only.
    pub async fn fetch_plans(&self, access_token: &str) -> Result<Vec<Plan>, InfraError> {
        let client = &self.client;
        let plans = self
            .with_retry("listing plans", move || client.list_plans(access_token))
            .await?;
        let total = plans.len();
        let recurring = plans
            .into_iter()
            .filter(|plan| !plan.is_once())
            .collect::<Vec<_>>();
        if recurring.len() != total {
            log::warn!("ignored {} one-time plan(s) from plan list", total - recurring.len());
        }
        Ok(recurring)
    }

    pub async fn create_plan(&self, access_token: &str, plan: &Plan) -> Result<Option<Plan>, InfraError> {
        plan.validate().map_err(InfraError::InvalidPlan)?;
        let mut form = PlanForm::from(plan);
        form.id = None;
        let form = &form;
        let client = &self.client;
        self.with_retry("creating plan", move || client.create_plan(access_token, form))
            .await
    }

    pub async fn update_plan(&self, access_token: &str, plan_id: &str, plan: &Plan) -> Result<(), InfraError> {
        if plan_id.trim().is_empty() {
            return Err(InfraError::InvalidPlan("plan id must not be empty".to_string()));
        }
        plan.validate().map_err(InfraError::InvalidPlan)?;
        let mut form = PlanForm::from(plan);
        form.id = Some(plan_id.trim().to_string());
        let form = &form;
        let client = &self.client;
        self.with_retry("updating plan", move || client.update_plan(access_token, plan_id, form))
            .await
    }

    pub async fn delete_plan(&self, access_token: &str, plan_id: &str) -> Result<(), InfraError> {
        if plan_id.trim().is_empty() {
            return Err(InfraError::InvalidPlan("plan id must not be empty".to_string()));
        }
        let client = &self.client;
        self.with_retry("deleting plan", move || client.delete_plan(access_token, plan_id))
            .await
    }

    async fn with_retry<T, F, Fut>(&self, action: &str, mut operation: F) -> Result<T, InfraError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InfraError>>,
    {
        let mut attempt: u8 = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if should_retry(&error) && attempt < self.retry_policy.max_retries => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    log::warn!("{action} failed ({error}); retrying in {delay}ms");
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

pub fn should_retry(error: &InfraError) -> bool {
    match error {
        InfraError::Network(_) => true,
        InfraError::Api { status, .. } => RETRYABLE_STATUSES.contains(status),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{PlanMode, Repeat};
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    enum FakeResponse {
        Plans(Vec<Plan>),
        NetworkError,
        Status(u16),
        Rejected(u16),
        Unauthorized,
    }

    #[derive(Debug, Default)]
    struct FakePlanApiClient {
        responses: Mutex<VecDeque<FakeResponse>>,
        calls: AtomicUsize,
        forms: Mutex<Vec<PlanForm>>,
    }

    impl FakePlanApiClient {
        fn with_responses(responses: Vec<FakeResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ..Self::default()
            }
        }

        fn next(&self) -> Result<Vec<Plan>, InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self
                .responses
                .lock()
                .expect("response lock poisoned")
                .pop_front()
                .unwrap_or(FakeResponse::Plans(Vec::new()));
            match response {
                FakeResponse::Plans(plans) => Ok(plans),
                FakeResponse::NetworkError => Err(InfraError::Network("network error while listing plans".to_string())),
                FakeResponse::Status(status) => Err(InfraError::Api {
                    status,
                    message: format!("http {status}"),
                }),
                FakeResponse::Rejected(status) => Err(InfraError::ApiRejected {
                    status,
                    message: "plan limit reached".to_string(),
                }),
                FakeResponse::Unauthorized => Err(InfraError::Unauthorized),
            }
        }
    }

    #[async_trait]
    impl PlanApiClient for FakePlanApiClient {
        async fn list_plans(&self, _access_token: &str) -> Result<Vec<Plan>, InfraError> {
            self.next()
        }

        async fn create_plan(&self, _access_token: &str, form: &PlanForm) -> Result<Option<Plan>, InfraError> {
            self.forms.lock().expect("form lock poisoned").push(form.clone());
            Ok(self.next()?.into_iter().next())
        }

        async fn update_plan(&self, _access_token: &str, _plan_id: &str, form: &PlanForm) -> Result<(), InfraError> {
            self.forms.lock().expect("form lock poisoned").push(form.clone());
            self.next().map(|_| ())
        }

        async fn delete_plan(&self, _access_token: &str, _plan_id: &str) -> Result<(), InfraError> {
            self.next().map(|_| ())
        }
    }

    fn plan(id: &str, repeat: Repeat) -> Plan {
        Plan::from_times(id, "09:00", "10:00", repeat, PlanMode::Shield).expect("valid plan")
    }

    fn retrying(max_retries: u8) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn fetch_retries_on_network_error() {
        let client = Arc::new(FakePlanApiClient::with_responses(vec![
            FakeResponse::NetworkError,
            FakeResponse::Plans(vec![plan("1", Repeat::Weekdays(vec![1]))]),
        ]));
        let service = PlanSyncService::new(Arc::clone(&client)).with_retry_policy(retrying(2));

        let plans = service.fetch_plans("token").await.expect("fetch after retry");
        assert_eq!(plans.len(), 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn default_policy_does_not_retry() {
        let client = Arc::new(FakePlanApiClient::with_responses(vec![
            FakeResponse::Status(503),
            FakeResponse::Plans(Vec::new()),
        ]));
        let service = PlanSyncService::new(Arc::clone(&client));

        let result = service.fetch_plans("token").await;
        assert!(matches!(result, Err(InfraError::Api { status: 503, .. })));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unauthorized_and_client_errors_are_not_retried() {
        let client = Arc::new(FakePlanApiClient::with_responses(vec![FakeResponse::Unauthorized]));
        let service = PlanSyncService::new(Arc::clone(&client)).with_retry_policy(retrying(3));
        assert!(matches!(service.fetch_plans("token").await, Err(InfraError::Unauthorized)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        let client = Arc::new(FakePlanApiClient::with_responses(vec![FakeResponse::Status(400)]));
        let service = PlanSyncService::new(Arc::clone(&client)).with_retry_policy(retrying(3));
        assert!(service.delete_plan("token", "7").await.is_err());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_stop_after_max_retries() {
        let client = Arc::new(FakePlanApiClient::with_responses(vec![
            FakeResponse::Status(502),
            FakeResponse::Status(502),
            FakeResponse::Status(502),
        ]));
        let service = PlanSyncService::new(Arc::clone(&client)).with_retry_policy(retrying(1));
        assert!(service.fetch_plans("token").await.is_err());
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn envelope_rejections_are_not_retried() {
        let client = Arc::new(FakePlanApiClient::with_responses(vec![
            FakeResponse::Rejected(500),
            FakeResponse::Plans(vec![plan("server-1", Repeat::Weekdays(vec![1]))]),
        ]));
        let service = PlanSyncService::new(Arc::clone(&client)).with_retry_policy(retrying(3));

        let result = service
            .create_plan("token", &plan("local", Repeat::Weekdays(vec![1])))
            .await;
        assert!(matches!(result, Err(InfraError::ApiRejected { status: 500, .. })));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_drops_one_time_plans() {
        let client = Arc::new(FakePlanApiClient::with_responses(vec![FakeResponse::Plans(vec![
            plan("1", Repeat::Weekdays(vec![1])),
            plan("2", Repeat::Once),
        ])]));
        let service = PlanSyncService::new(client);
        let plans = service.fetch_plans("token").await.expect("fetch");
        assert_eq!(plans.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["1"]);
    }

    #[tokio::test]
    async fn create_sends_form_without_id_and_rejects_invalid_plans() {
        let client = Arc::new(FakePlanApiClient::with_responses(vec![FakeResponse::Plans(vec![plan(
            "server-9",
            Repeat::Weekdays(vec![1, 3]),
        )])]));
        let service = PlanSyncService::new(Arc::clone(&client));

        let created = service
            .create_plan("token", &plan("local", Repeat::Weekdays(vec![1, 3])))
            .await
            .expect("create")
            .expect("created plan");
        assert_eq!(created.id, "server-9");
        let forms = client.forms.lock().expect("form lock").clone();
        assert_eq!(forms[0].id, None);
        assert_eq!(forms[0].repeat, "1,3");

        let mut invalid = plan("bad", Repeat::Weekdays(vec![1]));
        invalid.end_min = 500;
        assert!(matches!(
            service.create_plan("token", &invalid).await,
            Err(InfraError::InvalidPlan(_))
        ));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn update_carries_path_id_and_requires_one() {
        let client = Arc::new(FakePlanApiClient::default());
        let service = PlanSyncService::new(Arc::clone(&client));

        service
            .update_plan("token", " 42 ", &plan("", Repeat::Weekdays(vec![2])))
            .await
            .expect("update");
        let forms = client.forms.lock().expect("form lock").clone();
        assert_eq!(forms[0].id.as_deref(), Some("42"));

        assert!(service
            .update_plan("token", "  ", &plan("", Repeat::Weekdays(vec![2])))
            .await
            .is_err());
        assert!(service.delete_plan("token", "").await.is_err());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #[test]
        fn only_transient_statuses_are_retryable(status in 400u16..600) {
            let error = InfraError::Api { status, message: String::new() };
            let expected = matches!(status, 408 | 429 | 500 | 502 | 503 | 504);
            prop_assert_eq!(should_retry(&error), expected);
            let rejected = InfraError::ApiRejected { status, message: String::new() };
            prop_assert!(!should_retry(&rejected));
        }
    }
}
