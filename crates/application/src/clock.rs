use chrono::NaiveDate;
use domain::Timestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    /// 服务日期按本地日历计算
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now()
    }

    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// 固定时间的时钟，用于测试
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Timestamp,
    today: NaiveDate,
}

impl FixedClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now,
            today: now.date_naive(),
        }
    }

    pub fn on(today: NaiveDate) -> Self {
        let now = today
            .and_hms_opt(8, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(chrono::Utc::now);
        Self { now, today }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.now
    }

    fn today(&self) -> NaiveDate {
        self.today
    }
}
