//! Outbound notifications for new leads.
//!
//! Delivery (email, SMS) is an external service behind [`Notifier`]. The
//! bundled [`LoggingNotifier`] only writes a log record.

use async_trait::async_trait;

use crate::api::storage::{Contact, StarterKitDownload};
use crate::observability::logging::mask_email;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tell the operator about a new consultation request.
    async fn contact_received(&self, contact: &Contact) -> Result<(), NotifyError>;

    /// Send the starter kit to the requester.
    async fn send_starter_kit(&self, download: &StarterKitDownload) -> Result<(), NotifyError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn contact_received(&self, contact: &Contact) -> Result<(), NotifyError> {
        tracing::info!(
            contact_id = %contact.id,
            email = %mask_email(&contact.submission.email),
            service_type = %contact.submission.service_type,
            active_incident = contact.submission.is_active_incident.unwrap_or(false),
            "New contact submission"
        );
        Ok(())
    }

    async fn send_starter_kit(&self, download: &StarterKitDownload) -> Result<(), NotifyError> {
        tracing::info!(
            download_id = %download.id,
            email = %mask_email(&download.request.email),
            "Starter kit requested"
        );
        Ok(())
    }
}
