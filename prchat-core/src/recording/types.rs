use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecordedEvent {
    pub timestamp: String,      // RFC 3339
    pub correlation_id: String, // groups the calls made while handling one event
    pub event_type: EventType,
    pub direction: Direction,
    pub operation: String,       // e.g. "webhook", "GET /conversations.list"
    pub data: serde_json::Value, // sanitised request/response data
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum EventType {
    WebhookReceived,
    SlashCommandReceived,
    GitHubApiCall,
    SlackApiCall,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Direction {
    Request,
    Response,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    GitHub,
    Slack,
}

impl ServiceType {
    pub fn event_type(self) -> EventType {
        match self {
            ServiceType::GitHub => EventType::GitHubApiCall,
            ServiceType::Slack => EventType::SlackApiCall,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";
