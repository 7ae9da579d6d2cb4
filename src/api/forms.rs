//! Lead-capture form handlers and their validation.

use std::sync::LazyLock;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::ApiState;
use crate::http::response::{ApiError, FieldError};
use crate::observability::logging::mask_email;

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex is valid"));

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContactForm {
    pub name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub service_type: Option<String>,
    pub compliance_frameworks: Option<Vec<String>>,
    pub is_active_incident: Option<bool>,
    pub timeline: Option<String>,
    pub message: Option<String>,
}

/// A contact form that passed validation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSubmission {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub service_type: String,
    pub compliance_frameworks: Option<Vec<String>>,
    pub is_active_incident: Option<bool>,
    pub timeline: Option<String>,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NewsletterForm {
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StarterKitForm {
    pub email: Option<String>,
    pub name: Option<String>,
    pub company: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StarterKitRequest {
    pub email: String,
    pub name: Option<String>,
    pub company: Option<String>,
}

fn valid_email(raw: Option<&str>, message: &'static str, errors: &mut Vec<FieldError>) -> String {
    let email = raw.unwrap_or_default().trim().to_lowercase();
    if !EMAIL.is_match(&email) {
        errors.push(FieldError {
            field: "email",
            message,
        });
    }
    email
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl ContactForm {
    pub fn validate(self) -> Result<ContactSubmission, Vec<FieldError>> {
        let mut errors = Vec::new();

        let name = self.name.unwrap_or_default().trim().to_string();
        if name.chars().count() < 2 {
            errors.push(FieldError {
                field: "name",
                message: "Please enter your full name",
            });
        }
        let email = valid_email(
            self.email.as_deref(),
            "Please enter a valid work email",
            &mut errors,
        );
        let service_type = self.service_type.unwrap_or_default();
        if service_type.is_empty() {
            errors.push(FieldError {
                field: "serviceType",
                message: "Please choose the closest fit so I can route this quickly",
            });
        }
        let message = self.message.unwrap_or_default();
        if message.chars().count() < 10 {
            errors.push(FieldError {
                field: "message",
                message: "A brief description helps me prepare the right next step",
            });
        }

        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(ContactSubmission {
            name,
            email,
            company: non_blank(self.company),
            phone: non_blank(self.phone),
            service_type,
            compliance_frameworks: self.compliance_frameworks,
            is_active_incident: self.is_active_incident,
            timeline: non_blank(self.timeline),
            message,
        })
    }
}

impl StarterKitForm {
    pub fn validate(self) -> Result<StarterKitRequest, Vec<FieldError>> {
        let mut errors = Vec::new();
        let email = valid_email(
            self.email.as_deref(),
            "Please enter a valid email address",
            &mut errors,
        );
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(StarterKitRequest {
            email,
            name: non_blank(self.name),
            company: non_blank(self.company),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    pub success: bool,
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_sent: Option<bool>,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(form)| form)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

pub async fn submit_contact(
    State(state): State<ApiState>,
    payload: Result<Json<ContactForm>, JsonRejection>,
) -> Result<Json<SubmissionResponse>, ApiError> {
    let submission = body(payload)?.validate().map_err(ApiError::Validation)?;
    let contact = state.storage.create_contact(submission);

    let email_sent = match state.notifier.contact_received(&contact).await {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(contact_id = %contact.id, error = %err, "Contact saved but notification failed");
            false
        }
    };

    Ok(Json(SubmissionResponse {
        success: true,
        id: contact.id,
        email_sent: Some(email_sent),
    }))
}

pub async fn subscribe_newsletter(
    State(state): State<ApiState>,
    payload: Result<Json<NewsletterForm>, JsonRejection>,
) -> Result<Json<SubmissionResponse>, ApiError> {
    let form = body(payload)?;
    let mut errors = Vec::new();
    let email = valid_email(
        form.email.as_deref(),
        "Please enter a valid email address",
        &mut errors,
    );
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let subscriber = state.storage.subscribe(&email);
    tracing::info!(email = %mask_email(&email), "Newsletter subscription");
    Ok(Json(SubmissionResponse {
        success: true,
        id: subscriber.id,
        email_sent: None,
    }))
}

pub async fn request_starter_kit(
    State(state): State<ApiState>,
    payload: Result<Json<StarterKitForm>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = body(payload)?.validate().map_err(ApiError::Validation)?;
    let download = state.storage.create_download(request);

    if let Err(err) = state.notifier.send_starter_kit(&download).await {
        tracing::error!(download_id = %download.id, error = %err, "Starter kit delivery failed");
        return Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "success": false,
                "error": "Failed to send starter kit email",
            })),
        )
            .into_response());
    }

    Ok(Json(SubmissionResponse {
        success: true,
        id: download.id,
        email_sent: Some(true),
    })
    .into_response())
}
