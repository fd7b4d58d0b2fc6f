//! 提醒调度器
//!
//! 两个状态：`Idle` 等待下一次触发，`Running` 执行一轮提醒。启动后立即执行一轮，
//! 之后按固定周期触发。收到停止信号后完成当前条目即退出，不再开始新的一轮。

use std::sync::Arc;
use std::time::Duration;

use config::NotificationConfig;
use domain::{RegistrationDetails, RegistrationRepository};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{DeliveryPipeline, MessagePayload, NotificationJob, NotificationKind, ReminderPolicy};
use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// 一轮提醒的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    /// 查询失败的提前天数
    pub failed_offsets: Vec<i64>,
}

pub struct ReminderScheduler {
    registrations: Arc<dyn RegistrationRepository>,
    pipeline: DeliveryPipeline,
    policy: ReminderPolicy,
    clock: Arc<dyn Clock>,
    offsets: Vec<i64>,
    period: Duration,
    state: watch::Sender<SchedulerState>,
}

impl ReminderScheduler {
    pub fn new(
        registrations: Arc<dyn RegistrationRepository>,
        pipeline: DeliveryPipeline,
        policy: ReminderPolicy,
        clock: Arc<dyn Clock>,
        offsets: Vec<i64>,
        period: Duration,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            registrations,
            pipeline,
            policy,
            clock,
            offsets,
            period,
            state,
        }
    }

    pub fn from_config(
        registrations: Arc<dyn RegistrationRepository>,
        pipeline: DeliveryPipeline,
        clock: Arc<dyn Clock>,
        config: &NotificationConfig,
    ) -> Self {
        Self::new(
            registrations,
            pipeline,
            ReminderPolicy::from_config(config),
            clock,
            config.reminder_offsets_days.clone(),
            config.scheduler_period(),
        )
    }

    pub fn state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            offsets = ?self.offsets,
            period_secs = self.period.as_secs(),
            "提醒调度器已启动"
        );

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.state.send_replace(SchedulerState::Running);
            let report = self.run_cycle(&cancel).await;
            self.state.send_replace(SchedulerState::Idle);

            tracing::info!(
                sent = report.sent,
                failed = report.failed,
                skipped = report.skipped,
                failed_offsets = ?report.failed_offsets,
                "本轮提醒完成"
            );
        }

        tracing::info!("提醒调度器已停止");
    }

    /// 依次处理每个提前天数；某个天数查询失败只记录日志，不影响其他天数。
    /// 上一个天数的批次全部发完后才开始下一个。
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let today = self.clock.today();
        let mut report = CycleReport::default();
        // 整轮共用，相邻两个天数的批次之间也保持发送间隔
        let mut last_call = None;

        for &days in &self.offsets {
            if cancel.is_cancelled() {
                break;
            }

            let Some(event_date) = today.checked_add_signed(chrono::Duration::days(days)) else {
                tracing::error!(days, "提醒日期超出范围");
                report.failed_offsets.push(days);
                continue;
            };

            let due = match self
                .registrations
                .list_active_for_event_date(event_date)
                .await
            {
                Ok(due) => due,
                Err(err) => {
                    tracing::error!(days, %event_date, error = %err, "查询待提醒报名失败");
                    report.failed_offsets.push(days);
                    continue;
                }
            };

            if due.is_empty() {
                tracing::info!(days, %event_date, "没有需要提醒的报名");
                continue;
            }

            let jobs = build_jobs(NotificationKind::Reminder { days }, &due);
            tracing::info!(days, %event_date, registrations = due.len(), jobs = jobs.len(), "开始发送提醒");

            let batch = self
                .policy
                .dispatch_batch(&self.pipeline, &jobs, &mut last_call, cancel)
                .await;
            report.sent += batch.sent;
            report.failed += batch.failed;
            report.skipped += batch.skipped;
        }

        report
    }
}

/// 未同意短信的志愿者在构建批次时就被过滤掉
fn build_jobs(kind: NotificationKind, due: &[RegistrationDetails]) -> Vec<NotificationJob> {
    let mut jobs = Vec::with_capacity(due.len() * 2);
    for details in due {
        let payload = MessagePayload::for_registration(
            &details.volunteer,
            &details.project,
            details.registration.guest_count.value(),
        );
        jobs.push(NotificationJob::email(kind, &details.volunteer, payload.clone()));
        jobs.extend(NotificationJob::sms(kind, &details.volunteer, payload));
    }
    jobs
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{NaiveDate, Utc};
    use domain::{
        GuestCount, NewRegistration, Project, ProjectId, Registration, RegistrationFuture,
        RegistrationId, RepositoryError, RepositoryFuture, Timestamp, VolunteerId,
        VolunteerRepository,
    };
    use uuid::Uuid;

    use super::super::test_support::*;
    use super::super::{Channel, DeliveryError, MockNotificationSender};
    use super::*;
    use crate::clock::FixedClock;
    use crate::memory::InMemoryStore;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 1).unwrap()
    }

    async fn seed(store: &InMemoryStore, event_date: NaiveDate, email: &str, sms: bool) -> Project {
        let project = project(event_date, 10);
        store.insert_project(project.clone()).await;
        let volunteer = volunteer(email, sms);
        store.create(volunteer.clone()).await.unwrap();
        store
            .seed_registration(Registration::new(
                RegistrationId::from(Uuid::new_v4()),
                project.id,
                volunteer.id,
                GuestCount::parse(0).unwrap(),
                false,
                Utc::now(),
            ))
            .await;
        project
    }

    fn scheduler(
        registrations: Arc<dyn RegistrationRepository>,
        email: MockNotificationSender,
        sms: MockNotificationSender,
    ) -> ReminderScheduler {
        ReminderScheduler::new(
            registrations,
            DeliveryPipeline::new(Arc::new(email), Arc::new(sms)),
            ReminderPolicy::new(Duration::from_secs(24)),
            Arc::new(FixedClock::on(today())),
            vec![14, 7],
            Duration::from_secs(86_400),
        )
    }

    fn recording_sender(channel: Channel) -> (MockNotificationSender, Arc<Mutex<Vec<String>>>) {
        let subjects = Arc::new(Mutex::new(Vec::new()));
        let recorded = subjects.clone();
        let mut sender = MockNotificationSender::new();
        sender.expect_send().returning(move |message| {
            recorded.lock().unwrap().push(message.subject.clone());
            Ok(receipt(channel))
        });
        (sender, subjects)
    }

    /// 对指定日期的查询返回存储错误，其余委托给内存存储
    struct FailingForDate {
        inner: InMemoryStore,
        failing: NaiveDate,
    }

    impl RegistrationRepository for FailingForDate {
        fn register(&self, registration: NewRegistration) -> RegistrationFuture {
            self.inner.register(registration)
        }

        fn cancel(
            &self,
            volunteer_id: VolunteerId,
            project_id: ProjectId,
            now: Timestamp,
        ) -> RepositoryFuture<Registration> {
            self.inner.cancel(volunteer_id, project_id, now)
        }

        fn find_active_by_volunteer(
            &self,
            volunteer_id: VolunteerId,
        ) -> RepositoryFuture<Option<Registration>> {
            self.inner.find_active_by_volunteer(volunteer_id)
        }

        fn list_active_for_event_date(
            &self,
            event_date: NaiveDate,
        ) -> RepositoryFuture<Vec<RegistrationDetails>> {
            if event_date == self.failing {
                return Box::pin(async { Err(RepositoryError::storage("connection reset")) });
            }
            self.inner.list_active_for_event_date(event_date)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_covers_every_offset_and_filters_sms_opt_out() {
        let store = InMemoryStore::new();
        seed(&store, today() + chrono::Duration::days(14), "a@example.com", true).await;
        seed(&store, today() + chrono::Duration::days(7), "b@example.com", false).await;
        seed(&store, today() + chrono::Duration::days(3), "c@example.com", true).await;

        let (email, email_subjects) = recording_sender(Channel::Email);
        let (sms, sms_bodies) = recording_sender(Channel::Sms);
        let report = scheduler(Arc::new(store), email, sms)
            .run_cycle(&CancellationToken::new())
            .await;

        assert_eq!(report.sent, 3);
        assert_eq!(report.failed, 0);
        let subjects = email_subjects.lock().unwrap();
        assert_eq!(subjects.len(), 2);
        assert!(subjects[0].starts_with("2 Weeks Until"));
        assert!(subjects[1].starts_with("1 Week Until"));
        assert_eq!(sms_bodies.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_holds_across_offset_boundaries() {
        let store = InMemoryStore::new();
        seed(&store, today() + chrono::Duration::days(14), "a@example.com", false).await;
        seed(&store, today() + chrono::Duration::days(7), "b@example.com", false).await;

        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let mut email = MockNotificationSender::new();
        email.expect_send().times(2).returning(move |_| {
            recorded.lock().unwrap().push(tokio::time::Instant::now());
            Ok(receipt(Channel::Email))
        });

        let report = scheduler(Arc::new(store), email, MockNotificationSender::new())
            .run_cycle(&CancellationToken::new())
            .await;

        assert_eq!(report.sent, 2);
        let calls = calls.lock().unwrap();
        assert!(calls[1] - calls[0] >= Duration::from_secs(24));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_offset_does_not_suppress_other_offsets() {
        let store = InMemoryStore::new();
        seed(&store, today() + chrono::Duration::days(14), "a@example.com", false).await;
        seed(&store, today() + chrono::Duration::days(7), "b@example.com", false).await;

        let repo = FailingForDate {
            inner: store,
            failing: today() + chrono::Duration::days(14),
        };
        let (email, subjects) = recording_sender(Channel::Email);
        let report = scheduler(Arc::new(repo), email, MockNotificationSender::new())
            .run_cycle(&CancellationToken::new())
            .await;

        assert_eq!(report.failed_offsets, vec![14]);
        assert_eq!(report.sent, 1);
        assert!(subjects.lock().unwrap()[0].starts_with("1 Week Until"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_counted_and_batch_continues() {
        let store = InMemoryStore::new();
        let date = today() + chrono::Duration::days(7);
        seed(&store, date, "a@example.com", false).await;
        seed(&store, date, "b@example.com", false).await;

        let mut email = MockNotificationSender::new();
        let mut calls = 0;
        email.expect_send().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(DeliveryError::Transient("timeout".into()))
            } else {
                Ok(receipt(Channel::Email))
            }
        });

        let report = scheduler(Arc::new(store), email, MockNotificationSender::new())
            .run_cycle(&CancellationToken::new())
            .await;
        assert_eq!((report.sent, report.failed), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn runs_immediately_then_stops_on_cancel() {
        let store = InMemoryStore::new();
        seed(&store, today() + chrono::Duration::days(7), "a@example.com", false).await;

        let (email, subjects) = recording_sender(Channel::Email);
        let scheduler = Arc::new(scheduler(
            Arc::new(store),
            email,
            MockNotificationSender::new(),
        ));
        let state = scheduler.state();
        let cancel = CancellationToken::new();
        let handle = scheduler.clone().spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(subjects.lock().unwrap().len(), 1);
        assert_eq!(*state.borrow(), SchedulerState::Idle);

        cancel.cancel();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(3 * 86_400)).await;
        assert_eq!(subjects.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fires_again_after_period() {
        let store = InMemoryStore::new();
        seed(&store, today() + chrono::Duration::days(7), "a@example.com", false).await;

        let (email, subjects) = recording_sender(Channel::Email);
        let scheduler = Arc::new(scheduler(
            Arc::new(store),
            email,
            MockNotificationSender::new(),
        ));
        let cancel = CancellationToken::new();
        let handle = scheduler.spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(86_400 + 1)).await;
        assert_eq!(subjects.lock().unwrap().len(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }
}
