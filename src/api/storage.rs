//! In-memory persistence for form submissions.

use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::api::forms::{ContactSubmission, StarterKitRequest};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: Uuid,
    #[serde(flatten)]
    pub submission: ContactSubmission,
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsletterSubscriber {
    pub id: Uuid,
    pub email: String,
    pub subscribed_at_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StarterKitDownload {
    pub id: Uuid,
    #[serde(flatten)]
    pub request: StarterKitRequest,
    pub downloaded_at_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStorage {
    contacts: DashMap<Uuid, Contact>,
    subscribers: DashMap<String, NewsletterSubscriber>,
    downloads: DashMap<Uuid, StarterKitDownload>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_contact(&self, submission: ContactSubmission) -> Contact {
        let contact = Contact {
            id: Uuid::new_v4(),
            submission,
            created_at_ms: now_ms(),
        };
        self.contacts.insert(contact.id, contact.clone());
        contact
    }

    pub fn contact(&self, id: &Uuid) -> Option<Contact> {
        self.contacts.get(id).map(|c| c.clone())
    }

    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    /// Subscribe `email`, returning the existing subscriber if already present.
    pub fn subscribe(&self, email: &str) -> NewsletterSubscriber {
        self.subscribers
            .entry(email.to_string())
            .or_insert_with(|| NewsletterSubscriber {
                id: Uuid::new_v4(),
                email: email.to_string(),
                subscribed_at_ms: now_ms(),
            })
            .clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn create_download(&self, request: StarterKitRequest) -> StarterKitDownload {
        let download = StarterKitDownload {
            id: Uuid::new_v4(),
            request,
            downloaded_at_ms: now_ms(),
        };
        self.downloads.insert(download.id, download.clone());
        download
    }

    pub fn download_count(&self) -> usize {
        self.downloads.len()
    }
}
