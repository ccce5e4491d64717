//! Graph API client for the managed page.
//!
//! Implements both the pull listings used by the poll cycle and the reply
//! dispatch used by the pipeline. The access token is always sent as a query
//! parameter.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::{Dispatcher, PageSource, SourceError};

pub const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com/v18.0";

const POST_FIELDS_TEMPLATE: &str =
    "id,message,created_time,comments.limit({limit}){id,message,from,created_time,is_hidden}";
const COMMENT_FIELDS: &str = "id,message,from,created_time,is_hidden,parent";
const REPLY_FIELDS: &str = "id,message,from,created_time";
const CONVERSATION_FIELDS: &str =
    "id,participants,messages.limit(10){id,message,from,created_time}";
const MESSAGE_FIELDS: &str = "id,message,from,created_time";

/// Configuration for the Graph client
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub api_base: String,
    pub page_id: String,
    pub access_token: String,
    pub timeout: Duration,
    /// Comments embedded per post in the post listing
    pub comments_per_post: usize,
}

/// Page identity resolved from the access token
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PageIdentity {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Graph REST client
pub struct GraphClient {
    config: GraphConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl GraphClient {
    /// Create a new client
    pub fn new(config: GraphConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    pub fn page_id(&self) -> &str {
        &self.config.page_id
    }

    /// Build API URL
    fn api_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_base.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    async fn into_json(response: reqwest::Response) -> Result<Value, SourceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(SourceError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, SourceError> {
        let response = self
            .client
            .get(self.api_url(endpoint))
            .query(&[("access_token", self.config.access_token.as_str())])
            .query(params)
            .send()
            .await?;
        Self::into_json(response).await
    }

    async fn list(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<Value>, SourceError> {
        let value = self.get(endpoint, params).await?;
        let list: ListResponse = serde_json::from_value(value)
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;
        Ok(list.data)
    }

    async fn post(&self, endpoint: &str, body: &Value) -> Result<Value, SourceError> {
        let response = self
            .client
            .post(self.api_url(endpoint))
            .query(&[("access_token", self.config.access_token.as_str())])
            .json(body)
            .send()
            .await?;
        Self::into_json(response).await
    }

    /// Resolve which page the access token belongs to
    pub async fn verify_token(&self) -> Result<PageIdentity, SourceError> {
        let value = self.get("me", &[("fields", "id,name".to_string())]).await?;
        let identity: PageIdentity = serde_json::from_value(value)
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;

        if identity.id != self.config.page_id {
            warn!(
                configured = %self.config.page_id,
                actual = %identity.id,
                "Configured page id does not match the access token; using the token's page"
            );
        }
        info!(
            page = identity.name.as_deref().unwrap_or("Unknown"),
            id = %identity.id,
            "Access token verified"
        );
        Ok(identity)
    }
}

#[async_trait]
impl PageSource for GraphClient {
    async fn recent_posts(&self, limit: usize) -> Result<Vec<Value>, SourceError> {
        let fields =
            POST_FIELDS_TEMPLATE.replace("{limit}", &self.config.comments_per_post.to_string());
        self.list(
            &format!("{}/posts", self.config.page_id),
            &[("fields", fields), ("limit", limit.to_string())],
        )
        .await
    }

    async fn post_comments(&self, post_id: &str, limit: usize) -> Result<Vec<Value>, SourceError> {
        self.list(
            &format!("{}/comments", post_id),
            &[
                ("fields", COMMENT_FIELDS.to_string()),
                ("limit", limit.to_string()),
                ("filter", "stream".to_string()),
            ],
        )
        .await
    }

    async fn comment_replies(&self, comment_id: &str) -> Result<Vec<Value>, SourceError> {
        self.list(
            &format!("{}/comments", comment_id),
            &[("fields", REPLY_FIELDS.to_string())],
        )
        .await
    }

    async fn conversations(&self, limit: usize) -> Result<Vec<Value>, SourceError> {
        self.list(
            &format!("{}/conversations", self.config.page_id),
            &[
                ("fields", CONVERSATION_FIELDS.to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn conversation_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Value>, SourceError> {
        self.list(
            &format!("{}/messages", conversation_id),
            &[
                ("fields", MESSAGE_FIELDS.to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }
}

#[async_trait]
impl Dispatcher for GraphClient {
    async fn reply_to_thread(&self, comment_id: &str, text: &str) -> bool {
        match self
            .post(&format!("{}/comments", comment_id), &json!({ "message": text }))
            .await
        {
            Ok(_) => {
                info!(%comment_id, "Replied to comment");
                true
            }
            Err(e) => {
                error!(%comment_id, error = %e, "Failed to reply to comment");
                false
            }
        }
    }

    async fn send_direct(&self, recipient_id: &str, text: &str) -> bool {
        let body = json!({
            "recipient": { "id": recipient_id },
            "message": { "text": text },
            "messaging_type": "RESPONSE",
        });
        match self
            .post(&format!("{}/messages", self.config.page_id), &body)
            .await
        {
            Ok(_) => {
                info!(%recipient_id, "Sent message");
                true
            }
            Err(e) => {
                error!(%recipient_id, error = %e, "Failed to send message");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client_for(server: &MockServer) -> GraphClient {
        GraphClient::new(GraphConfig {
            api_base: server.base_url(),
            page_id: "page-1".to_string(),
            access_token: "tok".to_string(),
            timeout: Duration::from_secs(5),
            comments_per_post: 100,
        })
        .unwrap()
    }

    #[test]
    fn test_api_url() {
        let client = GraphClient::new(GraphConfig {
            api_base: "https://graph.example/v18.0/".to_string(),
            page_id: "p".to_string(),
            access_token: "t".to_string(),
            timeout: Duration::from_secs(1),
            comments_per_post: 100,
        })
        .unwrap();
        assert_eq!(client.api_url("/me"), "https://graph.example/v18.0/me");
    }

    #[tokio::test]
    async fn test_recent_posts_projects_fields() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/page-1/posts")
                .query_param("access_token", "tok")
                .query_param("limit", "10")
                .query_param(
                    "fields",
                    "id,message,created_time,comments.limit(100){id,message,from,created_time,is_hidden}",
                );
            then.status(200)
                .json_body(json!({ "data": [{ "id": "page-1_post-1" }] }));
        });

        let posts = client_for(&server).recent_posts(10).await.unwrap();

        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0]["id"], "page-1_post-1");
        mock.assert();
    }

    #[tokio::test]
    async fn test_api_error_message_is_surfaced() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/page-1/conversations");
            then.status(400)
                .json_body(json!({ "error": { "message": "Invalid OAuth access token." } }));
        });

        let err = client_for(&server).conversations(25).await.unwrap_err();

        match err {
            SourceError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid OAuth access token.");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_reports_bool() {
        let server = MockServer::start();
        let reply = server.mock(|when, then| {
            when.method(POST)
                .path("/c1/comments")
                .json_body(json!({ "message": "Thanks!" }));
            then.status(200).json_body(json!({ "id": "c1_r1" }));
        });
        let direct = server.mock(|when, then| {
            when.method(POST)
                .path("/page-1/messages")
                .json_body_includes(json!({ "messaging_type": "RESPONSE" }).to_string());
            then.status(500).body("boom");
        });

        let client = client_for(&server);
        assert!(client.reply_to_thread("c1", "Thanks!").await);
        assert!(!client.send_direct("u1", "Hello").await);

        reply.assert();
        direct.assert();
    }

    #[tokio::test]
    async fn test_verify_token_returns_identity() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/me").query_param("fields", "id,name");
            then.status(200)
                .json_body(json!({ "id": "page-2", "name": "Chicken Place" }));
        });

        let identity = client_for(&server).verify_token().await.unwrap();

        assert_eq!(identity.id, "page-2");
        assert_eq!(identity.name.as_deref(), Some("Chicken Place"));
    }
}
