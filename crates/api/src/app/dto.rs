use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use devboard_core::{OutboxRecordId, TenantId};
use devboard_outbox::{OutboxRecord, PageRequest, RecordStatus};

// -------------------------
// Query DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl PageQuery {
    pub fn to_page_request(&self) -> PageRequest {
        let default = PageRequest::default();
        PageRequest::new(
            self.page.unwrap_or(default.page).max(1),
            self.page_size.unwrap_or(default.page_size).clamp(1, 500),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    #[serde(default = "default_cleanup_days")]
    pub days: u32,
}

fn default_cleanup_days() -> u32 {
    7
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct OutboxRecordResponse {
    pub id: OutboxRecordId,
    pub tenant_id: TenantId,
    pub event_type: String,
    pub status: RecordStatus,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl From<OutboxRecord> for OutboxRecordResponse {
    fn from(r: OutboxRecord) -> Self {
        // Payload text that is not valid JSON is still shown, as a string.
        let payload = serde_json::from_str(&r.payload).unwrap_or_else(|_| serde_json::Value::String(r.payload.clone()));
        Self {
            status: r.status(),
            id: r.id,
            tenant_id: r.tenant_id,
            event_type: r.event_type,
            payload,
            occurred_at: r.occurred_at,
            processed_at: r.processed_at,
            retry_count: r.retry_count,
            error: r.error,
            locked_until: r.locked_until,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecordPageResponse {
    pub page: u32,
    pub page_size: u32,
    pub items: Vec<OutboxRecordResponse>,
}

impl RecordPageResponse {
    pub fn new(page: PageRequest, records: Vec<OutboxRecord>) -> Self {
        Self {
            page: page.page,
            page_size: page.page_size,
            items: records.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub deleted_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_query_defaults_and_bounds() {
        let q = PageQuery { page: None, page_size: None };
        assert_eq!(q.to_page_request(), PageRequest::new(1, 20));

        let q = PageQuery { page: Some(0), page_size: Some(10_000) };
        assert_eq!(q.to_page_request(), PageRequest::new(1, 500));
    }

    #[test]
    fn record_response_embeds_json_payload() {
        let record = OutboxRecord::new(TenantId::new(), "board.created", r#"{"name":"Sprint 1"}"#, Utc::now());
        let response = OutboxRecordResponse::from(record);
        assert_eq!(response.status, RecordStatus::Pending);
        assert_eq!(response.payload["name"], "Sprint 1");
    }
}
