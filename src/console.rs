//! Line-oriented presenter for a terminal kiosk.
//!
//! Scanned ids and prompt answers arrive one per line on the input; status
//! changes, prompts and notices are written to the output.

use std::io::BufRead;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::ledger::CheckoutRecord;
use crate::notify::{CheckinDecision, CheckoutDecision, CheckoutForm, Notice, NoticeLevel, Presenter};
use crate::reminder::DisplayState;

/// Process stdin as an async line source.
///
/// Lines are pumped from a plain thread rather than a runtime blocking
/// task, so a read that never completes does not hold up shutdown. Must be
/// called inside a tokio runtime.
pub fn stdin_lines() -> BufReader<DuplexStream> {
    let (reader, mut writer) = tokio::io::duplex(4096);
    let handle = Handle::current();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(mut line) = line else { break };
            line.push('\n');
            if handle.block_on(writer.write_all(line.as_bytes())).is_err() {
                break;
            }
        }
        debug!("stdin closed");
    });
    BufReader::new(reader)
}

pub struct ConsolePresenter<R, W> {
    input: Mutex<Lines<R>>,
    output: Mutex<W>,
    banner: String,
}

impl<R, W> ConsolePresenter<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(input: R, output: W, banner: impl Into<String>) -> Self {
        Self {
            input: Mutex::new(input.lines()),
            output: Mutex::new(output),
            banner: banner.into(),
        }
    }

    /// Next input line, trimmed. `None` at end of input.
    pub async fn read_line(&self) -> std::io::Result<Option<String>> {
        let line = self.input.lock().await.next_line().await?;
        Ok(line.map(|l| l.trim().to_string()))
    }

    pub async fn show_banner(&self) {
        let banner = format!("{}\n", self.banner);
        self.write(&banner).await;
    }

    async fn write(&self, text: &str) {
        let mut out = self.output.lock().await;
        let result = async {
            out.write_all(text.as_bytes()).await?;
            out.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!(error = %e, "Console write failed");
        }
    }

    /// Prompt and read one answer. `None` at end of input.
    async fn ask(&self, question: &str, default: Option<&str>) -> Option<String> {
        let prompt = match default {
            Some(d) => format!("{question} [{d}]: "),
            None => format!("{question}: "),
        };
        self.write(&prompt).await;

        let answer = match self.read_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Console read failed");
                return None;
            }
        };
        match default {
            Some(d) if answer.is_empty() => Some(d.to_string()),
            _ => Some(answer),
        }
    }
}

#[async_trait]
impl<R, W> Presenter for ConsolePresenter<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn render_status(&self, state: &DisplayState) {
        self.write(&format!("== {state} ==\n")).await;
    }

    async fn render_checkout_prompt(&self, id: &str, record: Option<&CheckoutRecord>) -> CheckoutDecision {
        let (name, email) = match record {
            Some(r) => {
                self.write(&format!("{id}: {} <{}>, nothing checked out.\n", r.name, r.email))
                    .await;
                let Some(name) = self.ask("Name", Some(&r.name)).await else {
                    return CheckoutDecision::Cancel;
                };
                let Some(email) = self.ask("Email", Some(&r.email)).await else {
                    return CheckoutDecision::Cancel;
                };
                (name, email)
            }
            None => {
                self.write(&format!("{id} is not registered yet.\n")).await;
                let Some(name) = self.ask("Name", None).await else {
                    return CheckoutDecision::Cancel;
                };
                let Some(email) = self.ask("Email", None).await else {
                    return CheckoutDecision::Cancel;
                };
                (name, email)
            }
        };

        let exam_question = if record.is_some() {
            "Exam (blank to cancel)"
        } else {
            "Exam (blank to only register)"
        };
        let exam = match self.ask(exam_question, None).await {
            Some(exam) if !exam.is_empty() => exam,
            Some(_) if record.is_none() => return CheckoutDecision::Register { name, email },
            _ => return CheckoutDecision::Cancel,
        };
        let Some(class_number) = self.ask("Class number", None).await else {
            return CheckoutDecision::Cancel;
        };

        CheckoutDecision::Submit(CheckoutForm {
            name,
            email,
            exam,
            class_number,
        })
    }

    async fn render_checkin_prompt(&self, record: &CheckoutRecord) -> CheckinDecision {
        let since = record
            .date_checked_out
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        self.write(&format!(
            "{} has {} (class {}) since {}.\n",
            record.name,
            record.exam_checked_out.as_deref().unwrap_or_default(),
            record.class_number.as_deref().unwrap_or_default(),
            since
        ))
        .await;

        match self.ask("Check it in? (y/n)", Some("y")).await {
            Some(answer) if answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes") => {
                CheckinDecision::Confirm
            }
            _ => CheckinDecision::Cancel,
        }
    }

    async fn show_notice(&self, notice: &Notice) {
        let prefix = match notice.level {
            NoticeLevel::Info => "",
            NoticeLevel::Warning => "WARNING: ",
        };
        self.write(&format!("{prefix}{}\n", notice.message)).await;
    }
}
