//! mentor-kiosk -- reminder scheduler and exam checkout desk for a mentor
//! kiosk.
//!
//! Two cores share one process: a minute-of-hour reminder engine that fires
//! each trigger at most once per cycle inside an active window, and a
//! CSV-backed ledger recording who has which exam checked out. Both are
//! driven through the [`notify::Notifier`] and [`notify::Presenter`] traits.

pub mod clock;
pub mod config;
pub mod console;
pub mod desk;
pub mod ledger;
pub mod notify;
pub mod reminder;
pub mod scheduler;

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{info, warn};

use crate::clock::{ClockSource, SystemClock};
use crate::config::KioskConfig;
use crate::console::ConsolePresenter;
use crate::desk::CheckoutDesk;
use crate::ledger::{CheckoutLedger, CsvLedgerStore};
use crate::notify::{LogNotifier, Presenter};
use crate::reminder::ReminderActivity;
use crate::scheduler::{Coordinator, RunningFlag};

/// Run the kiosk: reminder loop in the background, checkout desk reading
/// scanned ids from stdin in the foreground.
///
/// Returns when stdin closes or on Ctrl-C. A fatal ledger error stops the
/// kiosk and is returned.
pub async fn run(config: KioskConfig) -> Result<()> {
    let engine = config.reminder_engine()?.into_shared();
    info!(path = %config.ledger.path.display(), "Opening checkout ledger");
    let ledger = Arc::new(CheckoutLedger::open(CsvLedgerStore::new(&config.ledger.path)));
    info!(records = ledger.len()?, "Ledger ready");

    let clock: Arc<dyn ClockSource> = Arc::new(SystemClock);
    let console = Arc::new(ConsolePresenter::new(
        console::stdin_lines(),
        tokio::io::stdout(),
        config.display.banner_text.clone(),
    ));
    let presenter: Arc<dyn Presenter> = console.clone();
    console.show_banner().await;

    let coordinator = Coordinator::new(config.schedule.max_consecutive_failures);
    coordinator.start(vec![Box::new(ReminderActivity::new(
        engine,
        clock.clone(),
        Arc::new(LogNotifier),
        presenter.clone(),
        config.tick_interval(),
    ))]);

    let desk = CheckoutDesk::new(ledger, presenter, clock);
    let result = tokio::select! {
        r = desk_loop(&console, &desk, coordinator.flag()) => r,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received");
            Ok(())
        }
    };

    coordinator.stop();
    coordinator.join().await;
    for (name, status) in coordinator.health().snapshot() {
        info!(activity = %name, ?status, "Final activity status");
    }
    if coordinator.health().any_degraded() {
        warn!("One or more activities ended degraded");
    }
    result
}

/// Feed scanned ids to the desk until input ends or the kiosk stops.
async fn desk_loop<R, W>(console: &ConsolePresenter<R, W>, desk: &CheckoutDesk, flag: RunningFlag) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    while flag.is_running() {
        let Some(id) = console.read_line().await? else {
            info!("Input closed, shutting down");
            break;
        };
        desk.handle_scan(&id).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::{LedgerError, LedgerStore};
    use chrono::NaiveDate;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_desk_loop_processes_scans_until_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        let ledger = Arc::new(CheckoutLedger::open(CsvLedgerStore::new(&path)));

        let input = "id1\nAlice\na@x.com\nexamA\nCS-101\n\nid1\ny\n";
        let console = Arc::new(ConsolePresenter::new(
            BufReader::new(input.as_bytes()),
            Vec::new(),
            "desk",
        ));
        let clock = ManualClock::new(
            NaiveDate::from_ymd_opt(2025, 3, 4)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        );
        let desk = CheckoutDesk::new(ledger.clone(), console.clone(), Arc::new(clock));
        let coordinator = Coordinator::new(1);

        desk_loop(&console, &desk, coordinator.flag()).await.unwrap();

        let record = ledger.lookup("id1").unwrap();
        assert_eq!(record.name, "Alice");
        assert_eq!(record.exam_checked_out, None);
        let on_disk = CsvLedgerStore::new(&path).load().unwrap();
        assert_eq!(on_disk, vec![record]);
    }

    #[tokio::test]
    async fn test_desk_loop_stops_on_poisoned_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(CheckoutLedger::open(CsvLedgerStore::new(dir.path().join("l.csv"))));
        ledger.poison();
        let console = Arc::new(ConsolePresenter::new(
            BufReader::new("id1\nid2\n".as_bytes()),
            Vec::new(),
            "desk",
        ));
        let desk = CheckoutDesk::new(ledger, console.clone(), Arc::new(SystemClock));
        let coordinator = Coordinator::new(1);

        let err = desk_loop(&console, &desk, coordinator.flag()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::LockPoisoned)
        ));
        assert_eq!(console.read_line().await.unwrap().as_deref(), Some("id2"));
    }

    #[tokio::test]
    async fn test_desk_loop_exits_when_stopped() {
        let ledger = Arc::new(CheckoutLedger::open(CsvLedgerStore::new(
            tempfile::tempdir().unwrap().path().join("l.csv"),
        )));
        let console = Arc::new(ConsolePresenter::new(
            BufReader::new("id1\n".as_bytes()),
            Vec::new(),
            "desk",
        ));
        let desk = CheckoutDesk::new(ledger.clone(), console.clone(), Arc::new(SystemClock));
        let coordinator = Coordinator::new(1);
        coordinator.stop();

        desk_loop(&console, &desk, coordinator.flag()).await.unwrap();
        assert!(ledger.is_empty().unwrap());
    }
}
