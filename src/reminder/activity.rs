//! The reminder tick loop as a coordinator activity.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::warn;

use super::{DisplayState, FiredTrigger, SharedEngine};
use crate::clock::ClockSource;
use crate::notify::{Notifier, Presenter};
use crate::scheduler::PeriodicActivity;

/// Polls the clock, ticks the engine, and hands results to the presenter
/// and notifier.
pub struct ReminderActivity {
    engine: SharedEngine,
    clock: Arc<dyn ClockSource>,
    notifier: Arc<dyn Notifier>,
    presenter: Arc<dyn Presenter>,
    interval: Duration,
    last_display: Option<DisplayState>,
    /// Most recent status render; the next one waits for it.
    render: Option<JoinHandle<()>>,
}

impl ReminderActivity {
    pub fn new(
        engine: SharedEngine,
        clock: Arc<dyn ClockSource>,
        notifier: Arc<dyn Notifier>,
        presenter: Arc<dyn Presenter>,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            clock,
            notifier,
            presenter,
            interval,
            last_display: None,
            render: None,
        }
    }
}

#[async_trait]
impl PeriodicActivity for ReminderActivity {
    fn name(&self) -> &str {
        "reminders"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_once(&mut self) -> anyhow::Result<()> {
        let now = self.clock.now();
        let outcome = self.engine.lock().await.tick(now);

        if self.last_display.as_ref() != Some(&outcome.display) {
            // Off the tick loop like notifications, chained so renders stay
            // in order.
            let previous = self.render.take();
            let presenter = self.presenter.clone();
            let state = outcome.display.clone();
            self.render = Some(tokio::spawn(async move {
                if let Some(previous) = previous {
                    let _ = previous.await;
                }
                presenter.render_status(&state).await;
            }));
            self.last_display = Some(outcome.display);
        }

        if !outcome.fired.is_empty() {
            // Off the tick loop: a notifier may wait for acknowledgement.
            tokio::spawn(dispatch(self.notifier.clone(), outcome.fired));
        }
        Ok(())
    }
}

/// Deliver fired triggers in order. One failure does not stop the rest.
async fn dispatch(notifier: Arc<dyn Notifier>, fired: Vec<FiredTrigger>) {
    for trigger in fired {
        if let Err(e) = notifier.fire(&trigger.label, trigger.action_url.as_ref()).await {
            warn!(trigger = %trigger.label, error = %e, "Notifier failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::CheckoutRecord;
    use crate::notify::{CheckinDecision, CheckoutDecision, Notice};
    use crate::reminder::{ActiveWindow, ReminderEngine, TriggerDefinition};
    use chrono::{NaiveDate, NaiveDateTime};
    use std::sync::Mutex;
    use url::Url;

    #[derive(Default)]
    struct Recorder {
        fired: Mutex<Vec<(String, Option<String>)>>,
        statuses: Mutex<Vec<DisplayState>>,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn fire(&self, label: &str, action_url: Option<&Url>) -> anyhow::Result<()> {
            self.fired
                .lock()
                .unwrap()
                .push((label.to_string(), action_url.map(|u| u.to_string())));
            Ok(())
        }
    }

    #[async_trait]
    impl Presenter for Recorder {
        async fn render_status(&self, state: &DisplayState) {
            self.statuses.lock().unwrap().push(state.clone());
        }
        async fn render_checkout_prompt(&self, _id: &str, _record: Option<&CheckoutRecord>) -> CheckoutDecision {
            CheckoutDecision::Cancel
        }
        async fn render_checkin_prompt(&self, _record: &CheckoutRecord) -> CheckinDecision {
            CheckinDecision::Cancel
        }
        async fn show_notice(&self, _notice: &Notice) {}
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn activity(clock: &ManualClock, recorder: &Arc<Recorder>) -> ReminderActivity {
        let triggers = vec![
            TriggerDefinition::new(55, "One hour check")
                .unwrap()
                .with_action_url(Url::parse("https://example.com/hourly").unwrap()),
            TriggerDefinition::new(30, "Half hour check").unwrap(),
        ];
        let engine = ReminderEngine::new(triggers, Some(ActiveWindow::new(10, 18).unwrap()), 5)
            .unwrap()
            .into_shared();
        ReminderActivity::new(
            engine,
            Arc::new(clock.clone()),
            recorder.clone(),
            recorder.clone(),
            Duration::from_secs(1),
        )
    }

    async fn drain() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_fires_through_notifier_once() {
        let clock = ManualClock::new(at(10, 29));
        let recorder = Arc::new(Recorder::default());
        let mut act = activity(&clock, &recorder);

        act.run_once().await.unwrap();
        clock.set(at(10, 30));
        act.run_once().await.unwrap();
        act.run_once().await.unwrap();
        clock.set(at(10, 31));
        act.run_once().await.unwrap();
        drain().await;

        let fired = recorder.fired.lock().unwrap().clone();
        assert_eq!(fired, vec![("Half hour check".to_string(), None)]);
    }

    #[tokio::test]
    async fn test_action_url_is_forwarded() {
        let clock = ManualClock::new(at(11, 55));
        let recorder = Arc::new(Recorder::default());
        let mut act = activity(&clock, &recorder);
        act.run_once().await.unwrap();
        drain().await;

        let fired = recorder.fired.lock().unwrap().clone();
        assert_eq!(
            fired,
            vec![(
                "One hour check".to_string(),
                Some("https://example.com/hourly".to_string())
            )]
        );
    }

    /// Presenter whose status output never completes.
    struct StuckScreen;

    #[async_trait]
    impl Presenter for StuckScreen {
        async fn render_status(&self, _state: &DisplayState) {
            std::future::pending::<()>().await;
        }
        async fn render_checkout_prompt(&self, _id: &str, _record: Option<&CheckoutRecord>) -> CheckoutDecision {
            CheckoutDecision::Cancel
        }
        async fn render_checkin_prompt(&self, _record: &CheckoutRecord) -> CheckinDecision {
            CheckinDecision::Cancel
        }
        async fn show_notice(&self, _notice: &Notice) {}
    }

    #[tokio::test]
    async fn test_blocked_presenter_does_not_stall_firing() {
        let clock = ManualClock::new(at(10, 29));
        let recorder = Arc::new(Recorder::default());
        let engine = ReminderEngine::new(
            vec![TriggerDefinition::new(30, "Half hour check").unwrap()],
            None,
            5,
        )
        .unwrap()
        .into_shared();
        let mut act = ReminderActivity::new(
            engine,
            Arc::new(clock.clone()),
            recorder.clone(),
            Arc::new(StuckScreen),
            Duration::from_secs(1),
        );

        let on_time = tokio::time::timeout(Duration::from_secs(5), async {
            act.run_once().await.unwrap();
            clock.set(at(10, 30));
            act.run_once().await.unwrap();
        })
        .await;
        assert!(on_time.is_ok());
        drain().await;

        assert_eq!(
            *recorder.fired.lock().unwrap(),
            vec![("Half hour check".to_string(), None)]
        );
    }

    #[tokio::test]
    async fn test_status_rendered_only_on_change() {
        let clock = ManualClock::new(at(10, 10));
        let recorder = Arc::new(Recorder::default());
        let mut act = activity(&clock, &recorder);

        act.run_once().await.unwrap();
        act.run_once().await.unwrap();
        clock.set(at(10, 26));
        act.run_once().await.unwrap();
        clock.set(at(20, 0));
        act.run_once().await.unwrap();
        drain().await;

        let statuses = recorder.statuses.lock().unwrap().clone();
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses[0], DisplayState::Idle);
        assert!(matches!(statuses[1], DisplayState::Pending { minutes_until: 4, .. }));
        assert_eq!(statuses[2], DisplayState::Inactive);
    }
}
