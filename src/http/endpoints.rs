//! Typed convenience calls built on [`HttpClient::request`].

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use crate::http::client::{HttpClient, HttpError};

/// Body of a channel message.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct MessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Value>,
}

impl MessagePayload {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()).filter(|content: &String| !content.is_empty()),
            ..Self::default()
        }
    }
}

#[derive(Serialize)]
struct InteractionResponse<'a> {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
}

impl HttpClient {
    pub async fn get_channel(&self, channel_id: u64) -> Result<Value, HttpError> {
        self.request(Method::GET, &format!("/channels/{channel_id}"), None, &[])
            .await
    }

    pub async fn send_message(
        &self,
        channel_id: u64,
        message: &MessagePayload,
    ) -> Result<Value, HttpError> {
        let body = serde_json::to_value(message)?;
        self.request(
            Method::POST,
            &format!("/channels/{channel_id}/messages"),
            Some(&body),
            &[],
        )
        .await
    }

    pub async fn create_interaction_response(
        &self,
        interaction_id: u64,
        interaction_token: &str,
        response_type: u8,
        data: Option<&Value>,
    ) -> Result<Value, HttpError> {
        let body = serde_json::to_value(InteractionResponse {
            kind: response_type,
            data,
        })?;
        self.request(
            Method::POST,
            &format!("/interactions/{interaction_id}/{interaction_token}/callback"),
            Some(&body),
            &[],
        )
        .await
    }

    pub async fn get_guild(&self, guild_id: u64) -> Result<Value, HttpError> {
        self.request(Method::GET, &format!("/guilds/{guild_id}"), None, &[])
            .await
    }

    pub async fn get_user(&self, user_id: u64) -> Result<Value, HttpError> {
        self.request(Method::GET, &format!("/users/{user_id}"), None, &[])
            .await
    }
}
