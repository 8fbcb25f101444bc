// 📣 Notifications - message templates and channel stubs
//
// No channel talks to a real gateway. Every notifier logs the message and
// reports it as queued; the service records each message in the
// `notifications` table so operators can see what would have gone out.

use crate::db::{self, Borrower, Notification};
use crate::normalize::format_ugx;
use crate::reports::{self, OverdueLoan};
use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

// ============================================================================
// CHANNELS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    WhatsApp,
    Sms,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::WhatsApp => "whatsapp",
            Channel::Sms => "sms",
            Channel::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Option<Channel> {
        match s.trim().to_lowercase().as_str() {
            "whatsapp" | "wa" => Some(Channel::WhatsApp),
            "sms" | "text" => Some(Channel::Sms),
            "email" | "mail" => Some(Channel::Email),
            _ => None,
        }
    }

    /// Phone for WhatsApp/SMS, email address for email
    pub fn recipient_for(&self, borrower: &Borrower) -> Option<String> {
        match self {
            Channel::WhatsApp | Channel::Sms => borrower.phone.clone(),
            Channel::Email => borrower.email.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Queued,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Failed => "failed",
        }
    }
}

pub trait Notifier {
    fn channel(&self) -> Channel;

    fn send(&self, recipient: &str, message: &str) -> Result<DeliveryStatus>;
}

pub struct WhatsAppNotifier;

impl Notifier for WhatsAppNotifier {
    fn channel(&self) -> Channel {
        Channel::WhatsApp
    }

    fn send(&self, recipient: &str, message: &str) -> Result<DeliveryStatus> {
        tracing::info!(channel = "whatsapp", to = recipient, chars = message.len(), "📱 message queued");
        Ok(DeliveryStatus::Queued)
    }
}

pub struct SmsNotifier;

impl Notifier for SmsNotifier {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn send(&self, recipient: &str, message: &str) -> Result<DeliveryStatus> {
        tracing::info!(channel = "sms", to = recipient, chars = message.len(), "📱 message queued");
        Ok(DeliveryStatus::Queued)
    }
}

pub struct EmailNotifier;

impl Notifier for EmailNotifier {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn send(&self, recipient: &str, message: &str) -> Result<DeliveryStatus> {
        if !recipient.contains('@') {
            tracing::warn!(to = recipient, "⚠️ not an email address");
            return Ok(DeliveryStatus::Failed);
        }
        tracing::info!(channel = "email", to = recipient, chars = message.len(), "📧 message queued");
        Ok(DeliveryStatus::Queued)
    }
}

pub fn notifier_for(channel: Channel) -> Box<dyn Notifier> {
    match channel {
        Channel::WhatsApp => Box::new(WhatsAppNotifier),
        Channel::Sms => Box::new(SmsNotifier),
        Channel::Email => Box::new(EmailNotifier),
    }
}

// ============================================================================
// TEMPLATES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum MessageTemplate {
    RepaymentReminder {
        loan_number: String,
        amount_due: f64,
        due_date: NaiveDate,
    },
    PaymentReceived {
        loan_number: String,
        amount: f64,
        balance: f64,
    },
    LoanApproved {
        loan_number: String,
        amount: f64,
    },
    ApplicationRejected {
        application_number: String,
    },
    OverdueNotice {
        loan_number: String,
        balance: f64,
        days_overdue: i64,
    },
    DepositReceipt {
        account_number: String,
        amount: f64,
        balance: f64,
    },
}

impl MessageTemplate {
    pub fn kind(&self) -> &'static str {
        match self {
            MessageTemplate::RepaymentReminder { .. } => "repayment_reminder",
            MessageTemplate::PaymentReceived { .. } => "payment_received",
            MessageTemplate::LoanApproved { .. } => "loan_approved",
            MessageTemplate::ApplicationRejected { .. } => "application_rejected",
            MessageTemplate::OverdueNotice { .. } => "overdue_notice",
            MessageTemplate::DepositReceipt { .. } => "deposit_receipt",
        }
    }

    pub fn render(&self, first_name: &str) -> String {
        match self {
            MessageTemplate::RepaymentReminder {
                loan_number,
                amount_due,
                due_date,
            } => format!(
                "Dear {}, a repayment of {} on loan {} is due on {}. Thank you.",
                first_name,
                format_ugx(*amount_due),
                loan_number,
                due_date.format("%d/%m/%Y")
            ),
            MessageTemplate::PaymentReceived {
                loan_number,
                amount,
                balance,
            } => format!(
                "Dear {}, we have received {} for loan {}. Remaining balance: {}.",
                first_name,
                format_ugx(*amount),
                loan_number,
                format_ugx(*balance)
            ),
            MessageTemplate::LoanApproved { loan_number, amount } => format!(
                "Congratulations {}! Your loan {} of {} has been approved.",
                first_name,
                loan_number,
                format_ugx(*amount)
            ),
            MessageTemplate::ApplicationRejected { application_number } => format!(
                "Dear {}, we regret that application {} was not approved at this time.",
                first_name, application_number
            ),
            MessageTemplate::OverdueNotice {
                loan_number,
                balance,
                days_overdue,
            } => format!(
                "Dear {}, loan {} is {} day{} overdue with {} outstanding. Please pay as soon as possible.",
                first_name,
                loan_number,
                days_overdue,
                if *days_overdue == 1 { "" } else { "s" },
                format_ugx(*balance)
            ),
            MessageTemplate::DepositReceipt {
                account_number,
                amount,
                balance,
            } => format!(
                "Dear {}, deposit of {} to savings {} received. New balance: {}.",
                first_name,
                format_ugx(*amount),
                account_number,
                format_ugx(*balance)
            ),
        }
    }
}

// ============================================================================
// SERVICE
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifySummary {
    pub sent: usize,
    pub failed: usize,
    pub no_recipient: usize,
}

pub struct NotificationService<'a> {
    conn: &'a Connection,
    notifier: Box<dyn Notifier>,
}

impl<'a> NotificationService<'a> {
    pub fn new(conn: &'a Connection, channel: Channel) -> Self {
        NotificationService {
            conn,
            notifier: notifier_for(channel),
        }
    }

    pub fn with_notifier(conn: &'a Connection, notifier: Box<dyn Notifier>) -> Self {
        NotificationService { conn, notifier }
    }

    pub fn channel(&self) -> Channel {
        self.notifier.channel()
    }

    /// Render, dispatch, record. `None` when the borrower has no address
    /// for this channel.
    pub fn notify(&self, borrower: &Borrower, template: &MessageTemplate) -> Result<Option<Notification>> {
        let channel = self.channel();
        let recipient = match channel.recipient_for(borrower) {
            Some(r) => r,
            None => {
                tracing::warn!(
                    borrower = %borrower.borrower_code,
                    channel = channel.as_str(),
                    "⚠️ no recipient on file"
                );
                return Ok(None);
            }
        };

        let message = template.render(&borrower.first_name);
        let status = match self.notifier.send(&recipient, &message) {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(borrower = %borrower.borrower_code, "❌ send failed: {}", e);
                DeliveryStatus::Failed
            }
        };

        let mut notification = Notification {
            id: 0,
            borrower_id: Some(borrower.id),
            channel: channel.as_str().to_string(),
            kind: template.kind().to_string(),
            recipient,
            message,
            status: status.as_str().to_string(),
            created_at: Utc::now(),
        };
        notification.id = db::insert_notification(self.conn, &notification)?;

        Ok(Some(notification))
    }

    /// One overdue notice per overdue loan as of `as_of`
    pub fn notify_overdue(&self, as_of: NaiveDate) -> Result<NotifySummary> {
        let overdue = reports::overdue_loans(self.conn, as_of)?;
        let mut summary = NotifySummary::default();

        for loan in &overdue {
            let borrower = match db::get_borrower(self.conn, loan.borrower_id)? {
                Some(b) => b,
                None => bail!("loan {} points at a missing borrower", loan.loan_number),
            };

            match self.notify(&borrower, &overdue_notice(loan))? {
                Some(n) if n.status == DeliveryStatus::Queued.as_str() => summary.sent += 1,
                Some(_) => summary.failed += 1,
                None => summary.no_recipient += 1,
            }
        }

        tracing::info!(
            overdue = overdue.len(),
            sent = summary.sent,
            failed = summary.failed,
            no_recipient = summary.no_recipient,
            "overdue notices done"
        );
        Ok(summary)
    }
}

fn overdue_notice(loan: &OverdueLoan) -> MessageTemplate {
    MessageTemplate::OverdueNotice {
        loan_number: loan.loan_number.clone(),
        balance: loan.outstanding_balance,
        days_overdue: loan.days_overdue,
    }
}
