use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use application::{
    CapacityLedger, CapacityLedgerDependencies, Channel, ConfirmationDispatcher,
    ConfirmationPolicy, DeliveryPipeline, DeliveryReceipt, InMemoryStore, MockNotificationSender,
    RequestRateGuard, SystemClock,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Days, NaiveDate, Utc};
use domain::{Project, ProjectId};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use web_api::{router, AppState};

pub struct TestApp {
    pub router: Router,
    pub store: InMemoryStore,
    pub dispatcher: ConfirmationDispatcher,
    pub emails: Arc<AtomicUsize>,
    pub texts: Arc<AtomicUsize>,
}

fn counting_sender(channel: Channel, counter: Arc<AtomicUsize>) -> MockNotificationSender {
    let mut sender = MockNotificationSender::new();
    sender.expect_send().returning(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(DeliveryReceipt {
            channel,
            provider_message_id: Some("msg-1".to_owned()),
        })
    });
    sender
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_rate_limit(1000.0, 1000)
    }

    pub fn with_rate_limit(requests_per_second: f64, burst: u32) -> Self {
        let store = InMemoryStore::new();
        let emails = Arc::new(AtomicUsize::new(0));
        let texts = Arc::new(AtomicUsize::new(0));

        let ledger = Arc::new(CapacityLedger::new(CapacityLedgerDependencies {
            project_repository: Arc::new(store.clone()),
            volunteer_repository: Arc::new(store.clone()),
            registration_repository: Arc::new(store.clone()),
            clock: Arc::new(SystemClock),
        }));
        let pipeline = DeliveryPipeline::new(
            Arc::new(counting_sender(Channel::Email, emails.clone())),
            Arc::new(counting_sender(Channel::Sms, texts.clone())),
        );
        let dispatcher = ConfirmationDispatcher::new(
            pipeline,
            ConfirmationPolicy::new(Duration::from_secs(60), Duration::from_secs(24 * 60 * 60)),
        );
        let rate_guard = Arc::new(RequestRateGuard::new(requests_per_second, burst));

        let state = AppState::new(ledger, dispatcher.clone(), rate_guard);
        Self {
            router: router(state),
            store,
            dispatcher,
            emails,
            texts,
        }
    }

    pub async fn seed_project(&self, capacity: i64) -> ProjectId {
        let event_date: NaiveDate = Utc::now()
            .date_naive()
            .checked_add_days(Days::new(30))
            .unwrap();
        let project = Project::new(
            ProjectId::from(Uuid::new_v4()),
            "Food Pantry Sort",
            "Sort donated food for distribution",
            "East",
            "12 Market St",
            event_date,
            "10:00 AM",
            capacity,
            Utc::now(),
        )
        .unwrap()
        .with_serve_lead("Sam Lead", "sam@example.org");
        let id = project.id;
        self.store.insert_project(project).await;
        id
    }

    /// 等待后台通知任务全部结束
    pub async fn drain_notifications(&self) {
        assert!(self.dispatcher.shutdown(Duration::from_secs(5)).await);
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub async fn post_json(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn post(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }
}
