//! Per-user daily analysis and the bounded-concurrency queue consumer.
//!
//! Uses the Semaphore + JoinSet pattern: at most `concurrency` tasks run at
//! once, each under its own deadline. SQLite calls made from those tasks run
//! on the blocking pool via `spawn_blocking`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::advisor::{self, Advisor, RecommendationSource};
use crate::clock::Clock;
use crate::db::{Db, DbError};
use crate::error::StockPulseError;
use crate::mailer::{render_daily_email, Mailer, SMTP_TIMEOUT};
use crate::models::AnalysisHistoryRecord;
use crate::queue::{AnalysisQueue, AnalysisTask, Delivery, QueueError};
use crate::stats::PortfolioStats;

pub const DEFAULT_CONCURRENCY: usize = 50;

/// Deadline for one task end to end. Shorter than the queue's visibility
/// timeout so a slow task is abandoned before its message reappears.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    /// None of the user's symbols had a stored quote.
    NothingToAnalyze,
    Sent {
        history_id: i64,
        source: RecommendationSource,
    },
}

pub struct DailyAnalysisWorker {
    db: Arc<Db>,
    advisor: Option<Arc<dyn Advisor>>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    advisor_timeout: Duration,
    mail_timeout: Duration,
}

impl DailyAnalysisWorker {
    pub fn new(
        db: Arc<Db>,
        advisor: Option<Arc<dyn Advisor>>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            advisor,
            mailer,
            clock,
            advisor_timeout: advisor::client::DEFAULT_TIMEOUT,
            mail_timeout: SMTP_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, advisor_timeout: Duration, mail_timeout: Duration) -> Self {
        self.advisor_timeout = advisor_timeout;
        self.mail_timeout = mail_timeout;
        self
    }

    async fn on_store<T, F>(&self, f: F) -> Result<T, StockPulseError>
    where
        T: Send + 'static,
        F: FnOnce(&Db) -> Result<T, DbError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let result = tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StockPulseError::Task(format!("store call: {}", e)))?;
        Ok(result?)
    }

    /// Handles one task. Any error means the message must not be deleted.
    pub async fn process(&self, task: &AnalysisTask) -> Result<WorkerOutcome, StockPulseError> {
        let symbols = task.selected_stocks.clone();
        let quotes = self.on_store(move |db| db.get_quotes(&symbols)).await?;
        let Some(stats) = PortfolioStats::compute(&quotes, &task.selected_stocks) else {
            tracing::info!(
                "No stored quotes for any of {}'s {} symbols; nothing to analyze",
                task.user_id,
                task.selected_stocks.len()
            );
            return Ok(WorkerOutcome::NothingToAnalyze);
        };

        let advice = advisor::advise(self.advisor.as_deref(), &stats, self.advisor_timeout).await;
        let rec = &advice.recommendation;
        let now = self.clock.now();

        let record = AnalysisHistoryRecord {
            id: 0,
            user_id: task.user_id.clone(),
            timestamp: now,
            stocks_analyzed: stats.analyzed(),
            top_gainer: Some(stats.top_gainer.clone()),
            top_loser: Some(stats.top_loser.clone()),
            average_change_pct: stats.average_change_pct,
            analysis_text: rec.reasoning.clone(),
            recommendation: rec.action,
            confidence: rec.confidence,
            risk_level: rec.risk_level,
            source: advice.source,
            email_sent: false,
        };
        let history_id = self.on_store(move |db| db.append_history(&record)).await?;

        let email = render_daily_email(
            &task.email,
            &stats,
            &advice,
            task.alert_preferences.as_ref(),
            &now.format("%Y-%m-%d").to_string(),
        );
        match tokio::time::timeout(self.mail_timeout, self.mailer.send_email(&email)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StockPulseError::Timeout(format!(
                    "email to {} after {:?}",
                    task.user_id, self.mail_timeout
                )))
            }
        }

        // The email is out; bookkeeping failures must not trigger a resend.
        if let Err(e) = self.on_store(move |db| db.mark_email_sent(history_id)).await {
            tracing::error!("Sent email but could not mark history {}: {}", history_id, e);
        }
        let user_id = task.user_id.clone();
        let today = now.date_naive();
        if let Err(e) = self
            .on_store(move |db| db.set_last_analysis_date(&user_id, today))
            .await
        {
            tracing::warn!("Could not record last analysis date for {}: {}", task.user_id, e);
        }

        tracing::info!(
            "Sent {} analysis to {} ({} symbols, {})",
            rec.action,
            task.user_id,
            stats.symbols.len(),
            advice.source
        );
        Ok(WorkerOutcome::Sent {
            history_id,
            source: advice.source,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DrainOptions {
    pub concurrency: usize,
    /// Stop receiving after this many messages. `None` drains until empty.
    pub max_messages: Option<usize>,
    pub task_timeout: Duration,
}

impl Default for DrainOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_messages: None,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub received: usize,
    pub sent: usize,
    pub nothing_to_analyze: usize,
    pub failed: usize,
}

enum TaskResult {
    Done(WorkerOutcome),
    Failed(String),
}

async fn receive_blocking(queue: &Arc<AnalysisQueue>) -> Result<Option<Delivery>, StockPulseError> {
    let queue = Arc::clone(queue);
    let delivery = tokio::task::spawn_blocking(move || queue.receive())
        .await
        .map_err(|e| StockPulseError::Task(format!("queue receive: {}", e)))?;
    Ok(delivery?)
}

async fn delete_blocking(queue: &Arc<AnalysisQueue>, receipt_handle: String) -> Result<(), StockPulseError> {
    let queue = Arc::clone(queue);
    let deleted: Result<(), QueueError> = tokio::task::spawn_blocking(move || queue.delete(&receipt_handle))
        .await
        .map_err(|e| StockPulseError::Task(format!("queue delete: {}", e)))?;
    Ok(deleted?)
}

/// Receives and processes messages until the queue is empty (or
/// `max_messages` is reached). Successful messages are deleted; failed ones
/// are left for redelivery.
///
/// If receiving fails, no further messages are taken but every task already
/// running is awaited before the error is returned.
pub async fn drain_queue(
    queue: Arc<AnalysisQueue>,
    worker: Arc<DailyAnalysisWorker>,
    opts: DrainOptions,
) -> Result<DrainReport, StockPulseError> {
    let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let mut join_set: JoinSet<TaskResult> = JoinSet::new();
    let mut report = DrainReport::default();
    let mut receive_error = None;

    loop {
        if opts.max_messages.is_some_and(|max| report.received >= max) {
            break;
        }
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                receive_error = Some(StockPulseError::Task(format!("worker pool closed: {}", e)));
                break;
            }
        };

        let delivery = match receive_blocking(&queue).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(
                    "Receive failed with {} tasks still running; waiting for them: {}",
                    join_set.len(),
                    e
                );
                receive_error = Some(e);
                break;
            }
        };
        report.received += 1;

        let queue = Arc::clone(&queue);
        let worker = Arc::clone(&worker);
        let task_timeout = opts.task_timeout;
        join_set.spawn(async move {
            let _permit = permit;
            let user = delivery.task.user_id.clone();
            let result = match tokio::time::timeout(task_timeout, worker.process(&delivery.task)).await {
                Ok(result) => result,
                Err(_) => Err(StockPulseError::Timeout(format!(
                    "analysis for {} exceeded {:?}",
                    user, task_timeout
                ))),
            };
            match result {
                Ok(outcome) => {
                    if let Err(e) = delete_blocking(&queue, delivery.receipt_handle).await {
                        tracing::warn!("Processed {} but could not delete message: {}", user, e);
                    }
                    TaskResult::Done(outcome)
                }
                Err(e) => {
                    tracing::error!(
                        "Analysis for {} failed (attempt {}): {}",
                        user,
                        delivery.receive_count,
                        e
                    );
                    TaskResult::Failed(e.to_string())
                }
            }
        });

        // Reap whatever has already finished so the set stays small.
        while let Some(done) = join_set.try_join_next() {
            tally(&mut report, done);
        }
    }

    while let Some(done) = join_set.join_next().await {
        tally(&mut report, done);
    }

    tracing::info!(
        "Drained {} messages: {} sent, {} with nothing to analyze, {} failed",
        report.received,
        report.sent,
        report.nothing_to_analyze,
        report.failed
    );
    match receive_error {
        Some(e) => Err(e),
        None => Ok(report),
    }
}

fn tally(report: &mut DrainReport, done: Result<TaskResult, tokio::task::JoinError>) {
    match done {
        Ok(TaskResult::Done(WorkerOutcome::Sent { .. })) => report.sent += 1,
        Ok(TaskResult::Done(WorkerOutcome::NothingToAnalyze)) => report.nothing_to_analyze += 1,
        Ok(TaskResult::Failed(_)) => report.failed += 1,
        Err(e) => {
            tracing::error!("Worker task panicked: {}", e);
            report.failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::{Action, AdvisorError, Recommendation, RiskLevel};
    use crate::clock::ManualClock;
    use crate::mailer::{Email, MailError};
    use crate::models::UserPreference;
    use crate::quotes::{Quote, QuotePrices};
    use crate::queue::QueueConfig;
    use crate::symbols::Symbol;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<Email>>,
        fail: bool,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send_email(&self, email: &Email) -> Result<(), MailError> {
            if self.fail {
                return Err(MailError::Smtp("connection refused".into()));
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    struct CountingAdvisor {
        calls: AtomicUsize,
        answer: Result<Recommendation, AdvisorError>,
    }

    #[async_trait]
    impl Advisor for CountingAdvisor {
        async fn recommend(&self, _: &PortfolioStats) -> Result<Recommendation, AdvisorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 3, 14, 5, 0).unwrap(),
        ))
    }

    fn db_with_quotes(prices: &[(&str, f64)]) -> Arc<Db> {
        let db = Arc::new(Db::open_in_memory().unwrap());
        db.init().unwrap();
        for (s, current) in prices {
            let q = Quote::from_prices(
                sym(s),
                QuotePrices {
                    current: *current,
                    open: 100.0,
                    high: current.max(100.0),
                    low: current.min(100.0),
                    previous_close: 100.0,
                },
                0,
            );
            db.create_quote(&q, Utc::now()).unwrap();
        }
        db
    }

    fn task(user: &str, symbols: &[&str]) -> AnalysisTask {
        AnalysisTask {
            user_id: user.to_string(),
            email: format!("{}@example.com", user),
            selected_stocks: symbols.iter().map(|s| sym(s)).collect(),
            alert_preferences: None,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap(),
        }
    }

    fn save_user(db: &Db, user: &str, symbols: &[&str]) {
        db.save_preference(
            &UserPreference {
                user_id: user.to_string(),
                email: format!("{}@example.com", user),
                selected_symbols: symbols.iter().map(|s| sym(s)).collect(),
                daily_insights_opt_in: true,
                last_analysis_date: None,
                alert_preferences: None,
            },
            Utc::now(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn no_quotes_means_nothing_to_do() {
        let db = db_with_quotes(&[]);
        let advisor = Arc::new(CountingAdvisor {
            calls: AtomicUsize::new(0),
            answer: Err(AdvisorError::EmptyReply),
        });
        let mailer = Arc::new(RecordingMailer::default());
        let worker = DailyAnalysisWorker::new(db.clone(), Some(advisor.clone()), mailer.clone(), clock());

        let outcome = worker.process(&task("u1", &["AAPL"])).await.unwrap();
        assert_eq!(outcome, WorkerOutcome::NothingToAnalyze);
        assert_eq!(advisor.calls.load(Ordering::SeqCst), 0);
        assert!(mailer.sent.lock().unwrap().is_empty());
        assert!(db.history_for_user("u1", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn llm_answer_is_recorded_and_emailed() {
        let db = db_with_quotes(&[("AAPL", 103.0), ("MSFT", 99.0)]);
        save_user(&db, "u1", &["AAPL", "MSFT"]);
        let advisor = Arc::new(CountingAdvisor {
            calls: AtomicUsize::new(0),
            answer: Ok(Recommendation {
                action: Action::Buy,
                confidence: 77,
                reasoning: "Steady gains.".into(),
                risk_level: RiskLevel::Low,
                price_target: None,
                stop_loss: None,
            }),
        });
        let mailer = Arc::new(RecordingMailer::default());
        let worker = DailyAnalysisWorker::new(db.clone(), Some(advisor.clone()), mailer.clone(), clock());

        let outcome = worker.process(&task("u1", &["AAPL", "MSFT"])).await.unwrap();
        let WorkerOutcome::Sent { history_id, source } = outcome else {
            panic!("expected Sent");
        };
        assert_eq!(source, RecommendationSource::Llm);
        assert_eq!(advisor.calls.load(Ordering::SeqCst), 1);

        let history = db.history_for_user("u1", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, history_id);
        assert!(history[0].email_sent);
        assert_eq!(history[0].recommendation, Action::Buy);
        assert_eq!(history[0].top_gainer.as_ref().unwrap().symbol.as_str(), "AAPL");
        assert_eq!(history[0].top_loser.as_ref().unwrap().symbol.as_str(), "MSFT");

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "u1@example.com");
        assert!(sent[0].html.contains("Steady gains."));

        let pref = db.get_preference("u1").unwrap().unwrap();
        assert_eq!(
            pref.last_analysis_date,
            Some(chrono::NaiveDate::from_ymd_opt(2024, 6, 3).unwrap())
        );
    }

    #[tokio::test]
    async fn advisor_failure_uses_rule_fallback() {
        let db = db_with_quotes(&[("AAPL", 107.0), ("MSFT", 105.5)]);
        let advisor = Arc::new(CountingAdvisor {
            calls: AtomicUsize::new(0),
            answer: Err(AdvisorError::Decode("not json".into())),
        });
        let mailer = Arc::new(RecordingMailer::default());
        let worker = DailyAnalysisWorker::new(db.clone(), Some(advisor), mailer, clock());

        worker.process(&task("u1", &["AAPL", "MSFT"])).await.unwrap();
        let history = db.history_for_user("u1", 10).unwrap();
        assert_eq!(history[0].source, RecommendationSource::RuleBased);
        assert_eq!(history[0].recommendation, Action::Sell);
    }

    #[tokio::test]
    async fn email_failure_fails_the_task_after_history_is_written() {
        let db = db_with_quotes(&[("AAPL", 101.0)]);
        let mailer = Arc::new(RecordingMailer {
            sent: Mutex::new(Vec::new()),
            fail: true,
        });
        let worker = DailyAnalysisWorker::new(db.clone(), None, mailer, clock());

        let err = worker.process(&task("u1", &["AAPL"])).await.unwrap_err();
        assert!(matches!(err, StockPulseError::Mail(_)));
        let history = db.history_for_user("u1", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].email_sent);
    }

    #[tokio::test]
    async fn drain_deletes_successes_and_dead_letters_repeated_failures() {
        let clock = clock();
        let db = db_with_quotes(&[("AAPL", 101.0)]);
        let queue = Arc::new(AnalysisQueue::open_in_memory(QueueConfig::default(), clock.clone()).unwrap());
        queue.init().unwrap();
        queue.send(&task("u1", &["AAPL"])).unwrap();
        queue.send(&task("u2", &["ZZZZ"])).unwrap();

        let ok_worker = Arc::new(DailyAnalysisWorker::new(
            db.clone(),
            None,
            Arc::new(RecordingMailer::default()),
            clock.clone(),
        ));
        let report = drain_queue(queue.clone(), ok_worker, DrainOptions::default())
            .await
            .unwrap();
        assert_eq!(
            report,
            DrainReport {
                received: 2,
                sent: 1,
                nothing_to_analyze: 1,
                failed: 0
            }
        );
        assert_eq!(queue.stats().unwrap().in_flight, 0);

        queue.send(&task("u3", &["AAPL"])).unwrap();
        let failing_worker = Arc::new(DailyAnalysisWorker::new(
            db,
            None,
            Arc::new(RecordingMailer {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }),
            clock.clone(),
        ));
        for _ in 0..3 {
            let r = drain_queue(queue.clone(), failing_worker.clone(), DrainOptions::default())
                .await
                .unwrap();
            assert_eq!(r.failed, 1);
            clock.advance(chrono::Duration::minutes(6));
        }
        let r = drain_queue(queue.clone(), failing_worker, DrainOptions::default())
            .await
            .unwrap();
        assert_eq!(r.received, 0);
        assert_eq!(queue.dead_letters().unwrap().len(), 1);
    }

    /// Breaks the queue's table when the first user's email goes out and
    /// holds the second user's send open for a while.
    struct TableDroppingMailer {
        queue_path: std::path::PathBuf,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Mailer for TableDroppingMailer {
        async fn send_email(&self, email: &Email) -> Result<(), MailError> {
            if email.to == "u1@example.com" {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let conn = rusqlite::Connection::open(&self.queue_path).unwrap();
                conn.execute_batch("DROP TABLE queue_messages").unwrap();
            } else {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            self.sent.lock().unwrap().push(email.to.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn receive_failure_waits_for_running_tasks() {
        let clock = clock();
        let db = db_with_quotes(&[("AAPL", 101.0)]);
        let queue_path = std::env::temp_dir().join(format!(
            "stockpulse-drain-{}-{}.db",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let queue = Arc::new(AnalysisQueue::open(&queue_path, QueueConfig::default(), clock.clone()).unwrap());
        queue.init().unwrap();
        for user in ["u1", "u2", "u3"] {
            queue.send(&task(user, &["AAPL"])).unwrap();
        }

        let mailer = Arc::new(TableDroppingMailer {
            queue_path: queue_path.clone(),
            sent: Mutex::new(Vec::new()),
        });
        let worker = Arc::new(DailyAnalysisWorker::new(db.clone(), None, mailer.clone(), clock));
        let opts = DrainOptions {
            concurrency: 2,
            ..DrainOptions::default()
        };

        // u1 and u2 start; the third receive runs after u1 broke the table
        let err = drain_queue(queue, worker, opts).await.unwrap_err();
        assert!(matches!(err, StockPulseError::Queue(_)), "{}", err);

        let mut sent = mailer.sent.lock().unwrap().clone();
        sent.sort();
        assert_eq!(sent, vec!["u1@example.com", "u2@example.com"]);
        let u2 = db.history_for_user("u2", 10).unwrap();
        assert_eq!(u2.len(), 1);
        assert!(u2[0].email_sent);
        assert!(db.history_for_user("u3", 10).unwrap().is_empty());

        let _ = std::fs::remove_file(&queue_path);
    }

    #[tokio::test]
    async fn drain_respects_max_messages() {
        let clock = clock();
        let db = db_with_quotes(&[]);
        let queue = Arc::new(AnalysisQueue::open_in_memory(QueueConfig::default(), clock.clone()).unwrap());
        queue.init().unwrap();
        for i in 0..5 {
            queue.send(&task(&format!("u{}", i), &["AAPL"])).unwrap();
        }
        let worker = Arc::new(DailyAnalysisWorker::new(
            db,
            None,
            Arc::new(RecordingMailer::default()),
            clock,
        ));
        let report = drain_queue(
            queue.clone(),
            worker,
            DrainOptions {
                concurrency: 2,
                max_messages: Some(3),
                ..DrainOptions::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(report.received, 3);
        assert_eq!(queue.stats().unwrap().visible, 2);
    }
}
