//! Huawei Cloud LTS REST adapter.
//!
//! Requests are authenticated with a pre-issued IAM token sent as
//! `X-Auth-Token`; obtaining that token is left to the deployment.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use super::{
    Labels, ListEntriesRequest, ListEntriesResponse, LogEntry, LogGroup, LogServiceClient,
    LogStream, Tags, UpsertTagsRequest,
};
use crate::{Error, Result};

/// Regions whose LTS endpoint is not yet known to the public region list.
const ADDITIONAL_REGIONS: &[(&str, &str)] = &[(
    "ap-southeast-4",
    "https://lts.ap-southeast-4.myhuaweicloud.com",
)];

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Connection settings for [`LtsClient`].
#[derive(Debug, Clone)]
pub struct LtsConfig {
    pub endpoint: Url,
    pub project_id: String,
    pub auth_token: String,
    /// Per-request timeout; zero disables it.
    pub request_timeout: Duration,
}

/// Resolve the LTS endpoint for a region.
pub fn endpoint_for_region(region_id: &str) -> Result<Url> {
    let raw = ADDITIONAL_REGIONS
        .iter()
        .find(|(id, _)| *id == region_id)
        .map(|(_, url)| (*url).to_string())
        .unwrap_or_else(|| format!("https://lts.{}.myhuaweicloud.com", region_id));

    Url::parse(&raw)
        .map_err(|e| Error::config(format!("invalid LTS endpoint for region {region_id}: {e}")))
}

fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

// ========== Wire types ==========

#[derive(Debug, Deserialize)]
struct ListLogGroupsBody {
    #[serde(default)]
    log_groups: Vec<WireLogGroup>,
}

#[derive(Debug, Deserialize)]
struct WireLogGroup {
    log_group_id: String,
    #[serde(default)]
    log_group_name: String,
    #[serde(default)]
    tag: Option<Tags>,
}

#[derive(Debug, Deserialize)]
struct ListLogStreamBody {
    #[serde(default)]
    log_streams: Vec<WireLogStream>,
}

#[derive(Debug, Deserialize)]
struct WireLogStream {
    log_stream_id: String,
    #[serde(default)]
    log_stream_name: String,
    #[serde(default)]
    tag: Option<Tags>,
}

#[derive(Debug, Serialize)]
struct QueryLogsBody<'a> {
    start_time: String,
    end_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    line_num: Option<&'a str>,
    limit: u32,
    is_desc: bool,
}

#[derive(Debug, Deserialize)]
struct ListLogsBody {
    #[serde(default)]
    logs: Option<Vec<WireLogContent>>,
}

#[derive(Debug, Deserialize)]
struct WireLogContent {
    #[serde(default)]
    content: String,
    #[serde(default)]
    line_num: Option<String>,
    #[serde(default)]
    labels: Option<Labels>,
}

#[derive(Debug, Serialize)]
struct CreateTagsBody<'a> {
    action: &'a str,
    is_open: bool,
    tags: Vec<TagBody<'a>>,
}

#[derive(Debug, Serialize)]
struct TagBody<'a> {
    key: &'a str,
    value: &'a str,
}

// ========== Client ==========

/// [`LogServiceClient`] backed by the LTS REST API.
#[derive(Debug, Clone)]
pub struct LtsClient {
    client: Client,
    base: String,
    project_id: String,
    auth_token: String,
}

impl LtsClient {
    pub fn new(config: LtsConfig) -> Result<Self> {
        install_rustls_provider();

        let mut builder = Client::builder();
        if config.request_timeout > Duration::ZERO {
            builder = builder.timeout(config.request_timeout);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            base: config.endpoint.as_str().trim_end_matches('/').to_string(),
            project_id: config.project_id,
            auth_token: config.auth_token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base, path);
        trace!(%method, %url, "LTS request");
        self.client
            .request(method, url)
            .header(AUTH_TOKEN_HEADER, &self.auth_token)
    }

    async fn check(operation: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::provider(operation, format!("{} - {}", status, body)))
    }

    async fn send_json<T: DeserializeOwned>(operation: &str, request: RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::from(e).context(operation))?;
        let response = Self::check(operation, response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::from(e).context(operation))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::from(e).context(operation))
    }
}

#[async_trait]
impl LogServiceClient for LtsClient {
    async fn list_groups(&self) -> Result<Vec<LogGroup>> {
        let path = format!("v2/{}/groups", self.project_id);
        let body: ListLogGroupsBody =
            Self::send_json("ListLogGroups", self.request(Method::GET, &path)).await?;

        Ok(body
            .log_groups
            .into_iter()
            .map(|g| LogGroup {
                id: g.log_group_id,
                name: g.log_group_name,
                tags: g.tag.unwrap_or_default(),
            })
            .collect())
    }

    async fn list_streams(&self, group_id: &str) -> Result<Vec<LogStream>> {
        let path = format!("v2/{}/groups/{}/streams", self.project_id, group_id);
        let body: ListLogStreamBody =
            Self::send_json("ListLogStream", self.request(Method::GET, &path)).await?;

        Ok(body
            .log_streams
            .into_iter()
            .map(|s| LogStream {
                id: s.log_stream_id,
                name: s.log_stream_name,
                tags: s.tag.unwrap_or_default(),
            })
            .collect())
    }

    async fn list_entries(&self, request: &ListEntriesRequest) -> Result<ListEntriesResponse> {
        let path = format!(
            "v2/{}/groups/{}/streams/{}/content/query",
            self.project_id, request.group_id, request.stream_id
        );
        let query = QueryLogsBody {
            start_time: request.start_millis.to_string(),
            end_time: request.end_millis.to_string(),
            line_num: request.line_num.as_deref(),
            limit: request.limit,
            is_desc: false,
        };
        let body: ListLogsBody =
            Self::send_json("ListLogs", self.request(Method::POST, &path).json(&query)).await?;

        let entries = body
            .logs
            .unwrap_or_default()
            .into_iter()
            .map(|l| LogEntry {
                content: l.content,
                labels: l.labels.unwrap_or_default(),
                line_num: l.line_num,
            })
            .collect();
        Ok(ListEntriesResponse { entries })
    }

    async fn upsert_tags(&self, request: &UpsertTagsRequest) -> Result<()> {
        let path = format!(
            "v1/{}/{}/{}/tags/action",
            self.project_id, request.resource_type, request.resource_id
        );
        let body = CreateTagsBody {
            action: request.action.as_str(),
            is_open: false,
            tags: request
                .tags
                .iter()
                .map(|(key, value)| TagBody { key, value })
                .collect(),
        };

        let response = self
            .request(Method::POST, &path)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::from(e).context("CreateTags"))?;
        Self::check("CreateTags", response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_override_table() {
        let url = endpoint_for_region("ap-southeast-4").unwrap();
        assert_eq!(url.host_str(), Some("lts.ap-southeast-4.myhuaweicloud.com"));
    }

    #[test]
    fn test_endpoint_derived_from_region() {
        let url = endpoint_for_region("cn-north-4").unwrap();
        assert_eq!(url.as_str(), "https://lts.cn-north-4.myhuaweicloud.com/");
    }

    #[test]
    fn test_query_body_shape() {
        let body = QueryLogsBody {
            start_time: "1000".to_string(),
            end_time: "2000".to_string(),
            line_num: Some("1000000000"),
            limit: 100,
            is_desc: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["start_time"], "1000");
        assert_eq!(json["end_time"], "2000");
        assert_eq!(json["line_num"], "1000000000");
        assert_eq!(json["limit"], 100);
    }

    #[test]
    fn test_query_body_omits_missing_line_num() {
        let body = QueryLogsBody {
            start_time: "1".to_string(),
            end_time: "2".to_string(),
            line_num: None,
            limit: 10,
            is_desc: false,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("line_num"));
    }

    #[test]
    fn test_list_logs_body_parses_provider_response() {
        let raw = r#"{
            "count": 2,
            "isQueryComplete": true,
            "logs": [
                {
                    "content": "hello",
                    "line_num": "1700000000000000001",
                    "labels": {"hostName": "a"}
                },
                {"content": "world", "line_num": "1700000000000000002"}
            ]
        }"#;
        let body: ListLogsBody = serde_json::from_str(raw).unwrap();
        let logs = body.logs.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].labels.as_ref().unwrap()["hostName"], "a");
        assert!(logs[1].labels.is_none());
    }

    #[test]
    fn test_stream_listing_parses_tags() {
        let raw = r#"{"log_streams": [
            {"log_stream_id": "s1", "log_stream_name": "app", "tag": {"team": "core"}},
            {"log_stream_id": "s2", "log_stream_name": "db"}
        ]}"#;
        let body: ListLogStreamBody = serde_json::from_str(raw).unwrap();
        assert_eq!(body.log_streams[0].tag.as_ref().unwrap()["team"], "core");
        assert!(body.log_streams[1].tag.is_none());
    }

    #[test]
    fn test_create_tags_body_shape() {
        let mut tags = Tags::new();
        tags.insert("x-hwc-logstream-pos".to_string(), "42".to_string());
        let body = CreateTagsBody {
            action: "create",
            is_open: false,
            tags: tags
                .iter()
                .map(|(key, value)| TagBody { key, value })
                .collect(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["action"], "create");
        assert_eq!(json["is_open"], false);
        assert_eq!(json["tags"][0]["key"], "x-hwc-logstream-pos");
        assert_eq!(json["tags"][0]["value"], "42");
    }
}
