//! Class sessions and the money derived from them: durations, per-session
//! amounts, monthly bills, tutor payouts, revenue totals and UPI links.
//!
//! Amounts are whole rupees. A session's amount is its exact duration times
//! the hourly rate, rounded half up.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::model::SubjectName;

pub const DEFAULT_RATE_PER_HOUR: u32 = 500;
pub const CURRENCY: &str = "INR";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid timestamp {value:?}, expected RFC 3339")]
    BadTimestamp { value: String },

    #[error("invalid month {value:?}, expected YYYY-MM")]
    BadMonth { value: String },

    #[error("session must end after it starts")]
    EndNotAfterStart,

    #[error("hourly rate must be greater than zero")]
    ZeroRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Unpaid => "UNPAID",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PAID" => Some(PaymentStatus::Paid),
            "UNPAID" => Some(PaymentStatus::Unpaid),
            _ => None,
        }
    }
}

/// Direction of a recorded money movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    StudentToAdmin,
    AdminToTutor,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::StudentToAdmin => "student_to_admin",
            PaymentKind::AdminToTutor => "admin_to_tutor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "student_to_admin" => Some(PaymentKind::StudentToAdmin),
            "admin_to_tutor" => Some(PaymentKind::AdminToTutor),
            _ => None,
        }
    }
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>, SessionError> {
    DateTime::parse_from_rfc3339(value.trim()).map_err(|_| SessionError::BadTimestamp {
        value: value.to_string(),
    })
}

fn rfc3339<S: Serializer>(dt: &DateTime<FixedOffset>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&dt.to_rfc3339())
}

/// A calendar month, `YYYY-MM`. Sessions belong to the month of their start
/// time in the offset they were recorded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    year: i32,
    month: u32,
}

impl Month {
    pub fn parse(value: &str) -> Result<Self, SessionError> {
        let bad = || SessionError::BadMonth {
            value: value.to_string(),
        };
        let (y, m) = value.trim().split_once('-').ok_or_else(bad)?;
        if y.len() != 4 || m.len() != 2 {
            return Err(bad());
        }
        let year: i32 = y.parse().map_err(|_| bad())?;
        let month: u32 = m.parse().map_err(|_| bad())?;
        NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(bad)?;
        Ok(Self { year, month })
    }

    pub fn of(dt: &DateTime<FixedOffset>) -> Self {
        Self {
            year: dt.year(),
            month: dt.month(),
        }
    }

    pub fn contains(&self, dt: &DateTime<FixedOffset>) -> bool {
        Self::of(dt) == *self
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for Month {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub student_id: String,
    pub tutor_id: String,
    pub subject: SubjectName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(serialize_with = "rfc3339")]
    pub start_time: DateTime<FixedOffset>,
    #[serde(serialize_with = "rfc3339")]
    pub end_time: DateTime<FixedOffset>,
    /// Billed to the student.
    pub rate_per_hour: u32,
    /// Owed to the tutor.
    pub tutor_rate_per_hour: u32,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<String>,
}

fn round_amount(seconds: i64, rate: u32) -> u64 {
    let seconds = seconds.max(0) as u64;
    (seconds * rate as u64 + 1800) / 3600
}

impl Session {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.end_time <= self.start_time {
            return Err(SessionError::EndNotAfterStart);
        }
        if self.rate_per_hour == 0 || self.tutor_rate_per_hour == 0 {
            return Err(SessionError::ZeroRate);
        }
        Ok(())
    }

    fn seconds(&self) -> i64 {
        (self.end_time - self.start_time).num_seconds()
    }

    pub fn duration_minutes(&self) -> i64 {
        self.seconds() / 60
    }

    /// `2h`, `1h 30m`, `0h 45m`.
    pub fn duration_label(&self) -> String {
        let minutes = self.duration_minutes().max(0);
        let (h, m) = (minutes / 60, minutes % 60);
        if m > 0 {
            format!("{h}h {m}m")
        } else {
            format!("{h}h")
        }
    }

    pub fn hours(&self) -> f64 {
        self.seconds().max(0) as f64 / 3600.0
    }

    pub fn amount(&self) -> u64 {
        round_amount(self.seconds(), self.rate_per_hour)
    }

    pub fn tutor_amount(&self) -> u64 {
        round_amount(self.seconds(), self.tutor_rate_per_hour)
    }

    pub fn month(&self) -> Month {
        Month::of(&self.start_time)
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }
}

/// List filter; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub tutor_id: Option<String>,
    pub student_id: Option<String>,
    pub payment_status: Option<PaymentStatus>,
    pub subject: Option<String>,
    pub month: Option<Month>,
}

impl SessionFilter {
    pub fn matches(&self, s: &Session) -> bool {
        self.tutor_id.as_deref().map_or(true, |t| s.tutor_id == t)
            && self.student_id.as_deref().map_or(true, |t| s.student_id == t)
            && self.payment_status.map_or(true, |p| s.payment_status == p)
            && self.subject.as_deref().map_or(true, |t| s.subject == t)
            && self.month.map_or(true, |m| m.contains(&s.start_time))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectLine {
    pub subject: SubjectName,
    pub sessions: usize,
    pub minutes: i64,
    pub hours: f64,
    pub amount: u64,
}

/// One party's month: a student's bill or a tutor's earnings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bill {
    pub party_id: String,
    pub month: Month,
    pub total_sessions: usize,
    pub total_minutes: i64,
    pub total_hours: f64,
    pub total_amount: u64,
    pub paid_amount: u64,
    pub outstanding_amount: u64,
    pub subject_breakdown: Vec<SubjectLine>,
}

fn build_bill<'a, I>(party_id: &str, month: Month, sessions: I, amount: fn(&Session) -> u64) -> Bill
where
    I: IntoIterator<Item = &'a Session>,
{
    let mut by_subject: BTreeMap<&str, SubjectLine> = BTreeMap::new();
    let mut seconds = 0i64;
    for s in sessions {
        seconds += s.seconds().max(0);
        let line = by_subject.entry(s.subject.as_str()).or_insert_with(|| SubjectLine {
            subject: s.subject.clone(),
            sessions: 0,
            minutes: 0,
            hours: 0.0,
            amount: 0,
        });
        line.sessions += 1;
        line.minutes += s.duration_minutes();
        line.hours += s.hours();
        line.amount += amount(s);
    }
    let subject_breakdown: Vec<SubjectLine> = by_subject.into_values().collect();
    Bill {
        party_id: party_id.to_string(),
        month,
        total_sessions: subject_breakdown.iter().map(|l| l.sessions).sum(),
        total_minutes: seconds / 60,
        total_hours: seconds as f64 / 3600.0,
        total_amount: subject_breakdown.iter().map(|l| l.amount).sum(),
        paid_amount: 0,
        outstanding_amount: 0,
        subject_breakdown,
    }
}

/// Everything `student_id` was taught in `month`. Paid sessions count toward
/// `paid_amount`.
pub fn student_bill<'a, I>(student_id: &str, month: Month, sessions: I) -> Bill
where
    I: IntoIterator<Item = &'a Session>,
{
    let mine: Vec<&Session> = sessions
        .into_iter()
        .filter(|s| s.student_id == student_id && month.contains(&s.start_time))
        .collect();
    let mut bill = build_bill(student_id, month, mine.iter().copied(), Session::amount);
    bill.paid_amount = mine.iter().filter(|s| s.is_paid()).map(|s| s.amount()).sum();
    bill.outstanding_amount = bill.total_amount.saturating_sub(bill.paid_amount);
    bill
}

/// What `tutor_id` earned in `month` at their session rates, less payouts
/// already recorded for that month.
pub fn tutor_earnings<'a, I>(tutor_id: &str, month: Month, sessions: I, paid_out: u64) -> Bill
where
    I: IntoIterator<Item = &'a Session>,
{
    let mine = sessions
        .into_iter()
        .filter(|s| s.tutor_id == tutor_id && month.contains(&s.start_time));
    let mut bill = build_bill(tutor_id, month, mine, Session::tutor_amount);
    bill.paid_amount = paid_out;
    bill.outstanding_amount = bill.total_amount.saturating_sub(paid_out);
    bill
}

/// A recorded money movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub kind: PaymentKind,
    pub party_id: String,
    pub month: Month,
    pub amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<Month>,
    pub total_sessions: usize,
    pub total_hours: f64,
    pub billed_amount: u64,
    pub outstanding_amount: u64,
    pub tutor_cost: u64,
    pub student_payments: u64,
    pub tutor_payouts: u64,
    pub net_revenue: i64,
}

/// Revenue totals over every session and payment, or one month of them.
pub fn summarize(
    month: Option<Month>,
    sessions: &[Session],
    payments: &[Payment],
) -> RevenueSummary {
    let mut out = RevenueSummary {
        month,
        ..RevenueSummary::default()
    };
    let mut seconds = 0i64;
    for s in sessions
        .iter()
        .filter(|s| month.map_or(true, |m| m.contains(&s.start_time)))
    {
        out.total_sessions += 1;
        seconds += s.seconds().max(0);
        out.billed_amount += s.amount();
        out.tutor_cost += s.tutor_amount();
        if !s.is_paid() {
            out.outstanding_amount += s.amount();
        }
    }
    out.total_hours = seconds as f64 / 3600.0;
    for p in payments.iter().filter(|p| month.map_or(true, |m| p.month == m)) {
        match p.kind {
            PaymentKind::StudentToAdmin => out.student_payments += p.amount,
            PaymentKind::AdminToTutor => out.tutor_payouts += p.amount,
        }
    }
    out.net_revenue = out.student_payments as i64 - out.tutor_payouts as i64;
    out
}

pub fn tuition_note(student_name: &str, month: Month) -> String {
    format!("Tuition fee for {student_name} - {month}")
}

/// `upi://pay` deep link for a collect request. Nothing is sent anywhere.
pub fn upi_url(
    payee_vpa: &str,
    payee_name: &str,
    amount: u64,
    note: &str,
) -> Result<String, serde_urlencoded::ser::Error> {
    let amount = amount.to_string();
    let query = serde_urlencoded::to_string([
        ("pa", payee_vpa),
        ("pn", payee_name),
        ("am", amount.as_str()),
        ("tn", note),
        ("cu", CURRENCY),
    ])?;
    Ok(format!("upi://pay?{query}"))
}
