//! Built-in job handlers.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::core::dispatcher::{Attachment, HandlerRegistry, JobHandler, RenderError, Rendered};
use crate::core::error::ParkingError;
use crate::core::job::{Job, JobKind};
use crate::core::model::UserId;
use crate::core::registry::LotRegistry;

/// Column header of the history export.
pub const HISTORY_CSV_HEADER: &str =
    "Reservation ID,User,Location,Spot ID,Parking Time,Leaving Time,Parking Cost";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn payload<T: DeserializeOwned>(job: &Job) -> Result<T, RenderError> {
    serde_json::from_value(job.payload.clone()).map_err(|e| RenderError::InvalidPayload(e.to_string()))
}

fn checked_recipient(recipient: String) -> Result<String, RenderError> {
    let trimmed = recipient.trim();
    if trimmed.is_empty() || !trimmed.contains('@') {
        return Err(RenderError::InvalidPayload(format!("bad recipient `{recipient}`")));
    }
    Ok(trimmed.to_string())
}

fn unavailable(err: ParkingError) -> RenderError {
    RenderError::DataUnavailable(err.to_string())
}

#[derive(Deserialize)]
struct ReminderPayload {
    recipient: String,
    name: String,
}

/// Daily "come park with us" reminder.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReminderHandler;

impl JobHandler for ReminderHandler {
    fn render(&self, job: &Job) -> Result<Rendered, RenderError> {
        let p: ReminderPayload = payload(job)?;
        Ok(Rendered {
            recipient: checked_recipient(p.recipient)?,
            subject: "Daily Reminder".into(),
            body: format!(
                "Hello {},\n\nThis is your daily reminder that parking spots are available. \
                 Reserve one whenever you need it.\n",
                p.name
            ),
            attachment: None,
        })
    }
}

#[derive(Deserialize)]
struct ReportPayload {
    recipient: String,
    name: String,
    #[serde(default)]
    user_id: Option<UserId>,
}

/// Monthly usage report with a plain-text attachment.
#[derive(Clone)]
pub struct MonthlyReportHandler {
    lots: LotRegistry,
}

impl MonthlyReportHandler {
    /// Handler reading usage from `lots`.
    pub const fn new(lots: LotRegistry) -> Self {
        Self { lots }
    }

    fn user_report(&self, name: &str, user: UserId) -> Result<String, RenderError> {
        let usage = self.lots.monthly_usage(user).map_err(unavailable)?;
        let mut out = format!("Monthly parking report for {name}\n\n");
        let _ = writeln!(out, "{:<10}{:>14}{:>10}{:>12}", "Month", "Reservations", "Hours", "Amount");
        for m in &usage.months {
            let _ = writeln!(
                out,
                "{:<10}{:>14}{:>10}{:>12}",
                m.month,
                m.reservations,
                m.hours.to_string(),
                m.amount.to_string()
            );
        }
        let _ = writeln!(out, "\nTotal hours: {}", usage.total_hours);
        let _ = writeln!(out, "Total amount: {}", usage.total_amount);
        Ok(out)
    }

    fn occupancy_report(&self, name: &str) -> Result<String, RenderError> {
        let summaries = self.lots.lot_summaries().map_err(unavailable)?;
        let mut out = format!("Monthly occupancy report for {name}\n\n");
        let _ = writeln!(out, "{:<24}{:>8}{:>11}{:>10}", "Lot", "Spots", "Available", "Occupied");
        for s in &summaries {
            let _ = writeln!(out, "{:<24}{:>8}{:>11}{:>10}", s.lot.name, s.total, s.available, s.occupied);
        }
        Ok(out)
    }
}

impl JobHandler for MonthlyReportHandler {
    fn render(&self, job: &Job) -> Result<Rendered, RenderError> {
        let p: ReportPayload = payload(job)?;
        let recipient = checked_recipient(p.recipient)?;
        let report = match p.user_id {
            Some(user) => self.user_report(&p.name, user)?,
            None => self.occupancy_report(&p.name)?,
        };
        Ok(Rendered {
            recipient,
            subject: "Monthly Parking Report".into(),
            body: format!("Hello {},\n\nYour monthly parking report is attached.\n", p.name),
            attachment: Some(Attachment {
                filename: "Monthly_Report.txt".into(),
                mime_type: "text/plain".into(),
                bytes: report.into_bytes(),
            }),
        })
    }
}

#[derive(Deserialize)]
struct ExportPayload {
    recipient: String,
}

/// Full reservation history as CSV.
#[derive(Clone)]
pub struct HistoryExportHandler {
    lots: LotRegistry,
}

impl HistoryExportHandler {
    /// Handler reading history from `lots`.
    pub const fn new(lots: LotRegistry) -> Self {
        Self { lots }
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl JobHandler for HistoryExportHandler {
    fn render(&self, job: &Job) -> Result<Rendered, RenderError> {
        let p: ExportPayload = payload(job)?;
        let recipient = checked_recipient(p.recipient)?;
        let history = self.lots.history().map_err(unavailable)?;

        let mut csv = String::from(HISTORY_CSV_HEADER);
        csv.push('\n');
        for view in &history {
            let r = &view.reservation;
            let row = [
                r.id.to_string(),
                r.user_id.to_string(),
                csv_field(view.location.as_deref().unwrap_or("")),
                r.spot_id.to_string(),
                r.started_at.format(TIMESTAMP_FORMAT).to_string(),
                r.ended_at
                    .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
                    .unwrap_or_default(),
                r.cost.to_string(),
            ];
            csv.push_str(&row.join(","));
            csv.push('\n');
        }

        Ok(Rendered {
            recipient,
            subject: "Reservation History Export".into(),
            body: format!("Attached are {} reservation records.\n", history.len()),
            attachment: Some(Attachment {
                filename: "Reservation_History.csv".into(),
                mime_type: "text/csv".into(),
                bytes: csv.into_bytes(),
            }),
        })
    }
}

#[derive(Deserialize)]
struct GenericPayload {
    recipient: String,
    subject: String,
    message: String,
}

/// Free-form message, also used for release receipts.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericHandler;

impl JobHandler for GenericHandler {
    fn render(&self, job: &Job) -> Result<Rendered, RenderError> {
        let p: GenericPayload = payload(job)?;
        Ok(Rendered {
            recipient: checked_recipient(p.recipient)?,
            subject: p.subject,
            body: p.message,
            attachment: None,
        })
    }
}

/// Handler table covering every [`JobKind`].
pub fn default_handlers(lots: &LotRegistry) -> HandlerRegistry {
    HandlerRegistry::new()
        .with(JobKind::ReminderEmail, Arc::new(ReminderHandler))
        .with(JobKind::MonthlyReport, Arc::new(MonthlyReportHandler::new(lots.clone())))
        .with(JobKind::HistoryExport, Arc::new(HistoryExportHandler::new(lots.clone())))
        .with(JobKind::Generic, Arc::new(GenericHandler))
}
