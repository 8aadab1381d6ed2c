//! Checkout desk: turns a scanned id into the right prompt and ledger call.

use std::sync::Arc;

use tracing::{debug, error};

use crate::clock::ClockSource;
use crate::ledger::{CheckoutLedger, CheckoutRecord, CheckoutRequest, LedgerError, RecordState};
use crate::notify::{CheckinDecision, CheckoutDecision, Notice, Presenter};

/// What a scan ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeskOutcome {
    CheckedOut(CheckoutRecord),
    CheckedIn(CheckoutRecord),
    Registered(CheckoutRecord),
    Cancelled,
    /// The ledger refused the change; the presenter was told why.
    Rejected,
}

pub struct CheckoutDesk {
    ledger: Arc<CheckoutLedger>,
    presenter: Arc<dyn Presenter>,
    clock: Arc<dyn ClockSource>,
}

impl CheckoutDesk {
    pub fn new(ledger: Arc<CheckoutLedger>, presenter: Arc<dyn Presenter>, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            ledger,
            presenter,
            clock,
        }
    }

    /// Handle one scanned id.
    ///
    /// Unknown ids get the registration/checkout prompt, available records
    /// the checkout prompt, and checked-out records the check-in prompt.
    /// Only fatal ledger errors are returned; everything else becomes a
    /// notice on the presenter.
    pub async fn handle_scan(&self, id: &str) -> Result<DeskOutcome, LedgerError> {
        let id = id.trim();
        if id.is_empty() {
            return Ok(DeskOutcome::Cancelled);
        }

        let existing = match self.ledger.lookup(id) {
            Ok(record) => Some(record),
            Err(LedgerError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        match existing {
            Some(record) if record.state() == RecordState::CheckedOut => self.check_in_flow(record).await,
            other => self.check_out_flow(id, other).await,
        }
    }

    async fn check_out_flow(&self, id: &str, record: Option<CheckoutRecord>) -> Result<DeskOutcome, LedgerError> {
        debug!(id = %id, known = record.is_some(), "Prompting for checkout");
        match self.presenter.render_checkout_prompt(id, record.as_ref()).await {
            CheckoutDecision::Submit(form) => {
                let request = CheckoutRequest {
                    id: id.to_string(),
                    name: form.name,
                    email: form.email,
                    exam: form.exam,
                    class_number: form.class_number,
                    date: self.clock.now().date(),
                };
                let result = self.ledger.check_out(request);
                self.settle(result, DeskOutcome::CheckedOut, |r| {
                    format!(
                        "{} checked out {}",
                        r.name,
                        r.exam_checked_out.as_deref().unwrap_or("an exam")
                    )
                })
                .await
            }
            CheckoutDecision::Register { name, email } => {
                let result = self.ledger.register(id, &name, &email);
                self.settle(result, DeskOutcome::Registered, |r| format!("Registered {}", r.name))
                    .await
            }
            CheckoutDecision::Cancel => Ok(DeskOutcome::Cancelled),
        }
    }

    async fn check_in_flow(&self, record: CheckoutRecord) -> Result<DeskOutcome, LedgerError> {
        debug!(id = %record.id, "Prompting for check-in");
        match self.presenter.render_checkin_prompt(&record).await {
            CheckinDecision::Confirm => {
                let result = self.ledger.check_in(&record.id);
                let exam = record.exam_checked_out.clone().unwrap_or_default();
                self.settle(result, DeskOutcome::CheckedIn, move |r| {
                    format!("{} returned {}", r.name, exam)
                })
                .await
            }
            CheckinDecision::Cancel => Ok(DeskOutcome::Cancelled),
        }
    }

    async fn settle(
        &self,
        result: Result<CheckoutRecord, LedgerError>,
        wrap: fn(CheckoutRecord) -> DeskOutcome,
        describe: impl FnOnce(&CheckoutRecord) -> String,
    ) -> Result<DeskOutcome, LedgerError> {
        match result {
            Ok(record) => {
                self.presenter.show_notice(&Notice::info(describe(&record))).await;
                Ok(wrap(record))
            }
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Ledger unusable");
                Err(e)
            }
            Err(e) => {
                self.presenter.show_notice(&notice_for(&e)).await;
                Ok(DeskOutcome::Rejected)
            }
        }
    }
}

fn notice_for(err: &LedgerError) -> Notice {
    match err {
        LedgerError::Conflict { id, exam } => {
            Notice::warning(format!("{id} already has {exam} checked out. Check it in first."))
        }
        LedgerError::AlreadyAvailable(id) => Notice::info(format!("{id} has nothing to check in.")),
        LedgerError::NotFound(id) => Notice::info(format!("{id} is not registered.")),
        LedgerError::PersistenceFailure { .. } => Notice::warning(format!(
            "The ledger could not be saved, so nothing was changed. {err}"
        )),
        LedgerError::InvalidRecord { reason, .. } => Notice::warning(format!("Not saved: {reason}.")),
        LedgerError::LockPoisoned => Notice::warning(err.to_string()),
    }
}
