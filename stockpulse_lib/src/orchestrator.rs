//! Daily fan-out: one analysis task per eligible user onto the queue.
//!
//! The schedule is a fixed UTC cron, `0 14 * * MON-FRI`. That is 09:00 in New
//! York during standard time and 10:00 during daylight time; the one-hour
//! summer drift is accepted rather than tracking the exchange timezone.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};

use crate::clock::Clock;
use crate::db::Db;
use crate::error::StockPulseError;
use crate::models::UserPreference;
use crate::queue::{AnalysisQueue, AnalysisTask, MAX_BATCH_ENTRIES};

/// Hour (UTC) of the daily run.
pub const DAILY_RUN_HOUR_UTC: u32 = 14;

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// `ingest_meta` key holding the UTC date of the last completed fan-out.
pub const LAST_FANOUT_KEY: &str = "last_fanout_date";

fn run_time() -> NaiveTime {
    NaiveTime::from_hms_opt(DAILY_RUN_HOUR_UTC, 0, 0).unwrap_or_default()
}

/// Today's tick if `now` is a weekday, whether or not it has passed.
pub fn daily_tick_on(now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        return None;
    }
    Some(now.date_naive().and_time(run_time()).and_utc())
}

/// Next weekday 14:00 UTC strictly after `now`.
pub fn next_daily_run_after(now: DateTime<Utc>) -> DateTime<Utc> {
    let run_time = run_time();
    let mut date = now.date_naive();
    if now.time() >= run_time {
        date += Duration::days(1);
    }
    while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        date += Duration::days(1);
    }
    date.and_time(run_time).and_utc()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOutReport {
    pub users_scanned: usize,
    pub eligible: usize,
    pub enqueued: usize,
    /// `(user_id, reason)` for every task the queue did not accept.
    pub failed: Vec<(String, String)>,
}

pub struct DailyAnalysisOrchestrator {
    db: Arc<Db>,
    queue: Arc<AnalysisQueue>,
    clock: Arc<dyn Clock>,
    page_size: usize,
}

impl DailyAnalysisOrchestrator {
    pub fn new(db: Arc<Db>, queue: Arc<AnalysisQueue>, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            queue,
            clock,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn task_for(&self, pref: &UserPreference) -> AnalysisTask {
        AnalysisTask {
            user_id: pref.user_id.clone(),
            email: pref.email.clone(),
            selected_stocks: pref.selected_symbols.iter().cloned().collect(),
            alert_preferences: pref.alert_preferences.clone(),
            timestamp: self.clock.now(),
        }
    }

    /// Pages through opted-in users and enqueues a task for each eligible
    /// one. Rejected entries are logged and reported; they do not stop the
    /// run. Failing to read users does.
    pub fn run(&self) -> Result<FanOutReport, StockPulseError> {
        let mut report = FanOutReport::default();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .db
                .list_opted_in_users(cursor.as_deref(), self.page_size)?;
            report.users_scanned += page.items.len();

            let tasks: Vec<AnalysisTask> = page
                .items
                .iter()
                .filter(|p| p.is_eligible())
                .map(|p| self.task_for(p))
                .collect();
            report.eligible += tasks.len();

            for chunk in tasks.chunks(MAX_BATCH_ENTRIES) {
                match self.queue.send_batch(chunk) {
                    Ok(result) => {
                        report.enqueued += result.successful.len();
                        for failure in result.failed {
                            tracing::warn!(
                                "Failed to enqueue analysis for {}: {}",
                                failure.user_id,
                                failure.reason
                            );
                            report.failed.push((failure.user_id, failure.reason));
                        }
                    }
                    Err(e) => {
                        tracing::error!("Batch send of {} tasks failed: {}", chunk.len(), e);
                        for task in chunk {
                            report.failed.push((task.user_id.clone(), e.to_string()));
                        }
                    }
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let today = self.clock.now().date_naive();
        self.db
            .set_meta(LAST_FANOUT_KEY, &today.format("%Y-%m-%d").to_string())?;
        tracing::info!(
            "Fan-out complete: {} users scanned, {} eligible, {} enqueued, {} failed",
            report.users_scanned,
            report.eligible,
            report.enqueued,
            report.failed.len()
        );
        Ok(report)
    }

    /// True if a fan-out has already completed for today's UTC date.
    pub fn ran_today(&self) -> Result<bool, StockPulseError> {
        let today = self.clock.now().date_naive().format("%Y-%m-%d").to_string();
        Ok(self.db.get_meta(LAST_FANOUT_KEY)?.as_deref() == Some(today.as_str()))
    }

    /// True once today's tick has passed without a completed fan-out. A tick
    /// that elapsed while the caller was busy is still due until midnight UTC.
    pub fn is_due(&self) -> Result<bool, StockPulseError> {
        let now = self.clock.now();
        match daily_tick_on(now) {
            Some(tick) if now >= tick => Ok(!self.ran_today()?),
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::queue::QueueConfig;
    use crate::symbols::Symbol;
    use chrono::TimeZone;

    fn setup() -> (Arc<Db>, Arc<AnalysisQueue>, DailyAnalysisOrchestrator) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap(),
        ));
        let db = Arc::new(Db::open_in_memory().unwrap());
        db.init().unwrap();
        let queue = Arc::new(AnalysisQueue::open_in_memory(QueueConfig::default(), clock.clone()).unwrap());
        queue.init().unwrap();
        let orch = DailyAnalysisOrchestrator::new(db.clone(), queue.clone(), clock).with_page_size(3);
        (db, queue, orch)
    }

    fn save(db: &Db, user: &str, opt_in: bool, symbols: &[&str]) {
        db.save_preference(
            &UserPreference {
                user_id: user.to_string(),
                email: format!("{}@example.com", user),
                selected_symbols: symbols.iter().map(|s| Symbol::parse(s).unwrap()).collect(),
                daily_insights_opt_in: opt_in,
                last_analysis_date: None,
                alert_preferences: None,
            },
            Utc::now(),
        )
        .unwrap();
    }

    #[test]
    fn schedule_is_weekday_fourteen_utc() {
        let at = |y, m, d, h, min| Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap();
        // Monday before the tick
        assert_eq!(next_daily_run_after(at(2024, 6, 3, 13, 59)), at(2024, 6, 3, 14, 0));
        // exactly at the tick moves to the next day
        assert_eq!(next_daily_run_after(at(2024, 6, 3, 14, 0)), at(2024, 6, 4, 14, 0));
        // Friday afternoon skips the weekend
        assert_eq!(next_daily_run_after(at(2024, 6, 7, 15, 0)), at(2024, 6, 10, 14, 0));
        // Saturday
        assert_eq!(next_daily_run_after(at(2024, 6, 8, 9, 0)), at(2024, 6, 10, 14, 0));
    }

    #[test]
    fn missed_tick_stays_due_until_fan_out_completes() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 3, 13, 55, 0).unwrap(),
        ));
        let db = Arc::new(Db::open_in_memory().unwrap());
        db.init().unwrap();
        let queue = Arc::new(AnalysisQueue::open_in_memory(QueueConfig::default(), clock.clone()).unwrap());
        queue.init().unwrap();
        let orch = DailyAnalysisOrchestrator::new(db.clone(), queue, clock.clone());
        save(&db, "a", true, &["AAPL"]);

        assert!(!orch.is_due().unwrap());

        // a refresh started at 13:55 returns at 14:04, after the tick
        clock.set(Utc.with_ymd_and_hms(2024, 6, 3, 14, 4, 0).unwrap());
        assert!(orch.is_due().unwrap());
        assert_eq!(
            next_daily_run_after(clock.now()),
            Utc.with_ymd_and_hms(2024, 6, 4, 14, 0, 0).unwrap()
        );

        orch.run().unwrap();
        assert!(!orch.is_due().unwrap());

        // late evening on the same day: already done
        clock.set(Utc.with_ymd_and_hms(2024, 6, 3, 23, 30, 0).unwrap());
        assert!(!orch.is_due().unwrap());

        // next day before its tick
        clock.set(Utc.with_ymd_and_hms(2024, 6, 4, 9, 0, 0).unwrap());
        assert!(!orch.is_due().unwrap());
    }

    #[test]
    fn weekends_are_never_due() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 8, 15, 0, 0).unwrap(),
        ));
        let db = Arc::new(Db::open_in_memory().unwrap());
        db.init().unwrap();
        let queue = Arc::new(AnalysisQueue::open_in_memory(QueueConfig::default(), clock.clone()).unwrap());
        queue.init().unwrap();
        let orch = DailyAnalysisOrchestrator::new(db, queue, clock);
        assert!(!orch.is_due().unwrap());
        assert_eq!(daily_tick_on(Utc.with_ymd_and_hms(2024, 6, 9, 14, 0, 0).unwrap()), None);
    }

    #[test]
    fn only_eligible_users_are_enqueued() {
        let (db, queue, orch) = setup();
        save(&db, "a", true, &["AAPL"]);
        save(&db, "b", false, &["AAPL"]);
        save(&db, "c", true, &[]);
        save(&db, "d", true, &["MSFT", "NVDA"]);

        let report = orch.run().unwrap();
        assert_eq!(report.eligible, 2);
        assert_eq!(report.enqueued, 2);
        assert!(report.failed.is_empty());

        let mut users = Vec::new();
        while let Some(d) = queue.receive().unwrap() {
            users.push(d.task.user_id.clone());
            if d.task.user_id == "d" {
                assert_eq!(d.task.selected_stocks.len(), 2);
            }
        }
        users.sort();
        assert_eq!(users, vec!["a", "d"]);
        assert!(orch.ran_today().unwrap());
    }

    #[test]
    fn paginates_past_many_pages_and_chunks_batches() {
        let (db, queue, orch) = setup();
        for i in 0..25 {
            save(&db, &format!("user{:02}", i), true, &["AAPL"]);
        }
        let report = orch.run().unwrap();
        assert_eq!(report.users_scanned, 25);
        assert_eq!(report.enqueued, 25);
        assert_eq!(queue.stats().unwrap().visible, 25);
    }

    #[test]
    fn rejected_entries_are_reported_individually() {
        let (db, _queue, orch) = setup();
        save(&db, "good", true, &["AAPL"]);
        db.save_preference(
            &UserPreference {
                user_id: "bad".into(),
                email: "not-an-address".into(),
                selected_symbols: [Symbol::parse("AAPL").unwrap()].into_iter().collect(),
                daily_insights_opt_in: true,
                last_analysis_date: None,
                alert_preferences: None,
            },
            Utc::now(),
        )
        .unwrap();

        let report = orch.run().unwrap();
        assert_eq!(report.enqueued, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "bad");
    }

    #[test]
    fn no_users_is_a_clean_no_op() {
        let (_db, queue, orch) = setup();
        assert_eq!(orch.run().unwrap(), FanOutReport::default());
        assert!(queue.receive().unwrap().is_none());
    }
}
