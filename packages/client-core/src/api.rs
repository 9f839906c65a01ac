//! 云端 API 客户端
//!
//! [`crate::sync::RemoteStore`] 的生产实现：JSON over HTTPS，
//! Bearer 令牌认证。不做内部重试，失败以类型化错误交给调用方。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::{UserProfile, WordEntry, Wordbook};
use crate::progress::ProgressState;
use crate::sync::{RemoteSectionProgress, RemoteStore, RemoteVisibility, SyncError};

/// API 客户端配置
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// API 基础 URL
    pub base_url: String,
    /// 连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 整体请求超时（秒）
    pub timeout_secs: u64,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout_secs: 30,
            timeout_secs: 60,
        }
    }
}

/// 云端 API 客户端
pub struct ApiClient {
    config: ApiConfig,
    client: reqwest::Client,
    token: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[allow(dead_code)]
    success: bool,
    data: T,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WordbookBody<'a> {
    id: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subtitle: Option<&'a str>,
    target_passes: u32,
    words: Vec<EntryBody<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EntryBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    word: &'a str,
    meaning: &'a str,
    ordinal: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SectionProgressBody<'a> {
    word_book_id: &'a str,
    completed_pages: u32,
    completed_passes: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VisibilityBatchBody<'a> {
    entries: &'a [RemoteVisibility],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DailyProgressBody<'a> {
    date: &'a str,
    words_learned: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar_emoji: Option<&'a str>,
}

impl ApiClient {
    /// 创建客户端
    pub fn new(config: ApiConfig, token: impl Into<String>) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            config,
            client,
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(&self.token)
    }

    async fn expect_data<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SyncError> {
        let status = response.status();
        if status.is_success() {
            let envelope: Envelope<T> = response.json().await?;
            return Ok(envelope.data);
        }
        Err(Self::error_from(status, response).await)
    }

    async fn expect_ok(response: reqwest::Response) -> Result<(), SyncError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(Self::error_from(status, response).await)
    }

    async fn error_from(status: reqwest::StatusCode, response: reqwest::Response) -> SyncError {
        let message = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.error)
            .unwrap_or_else(|_| status.to_string());

        if status == reqwest::StatusCode::NOT_FOUND {
            return SyncError::NotFound(message);
        }
        SyncError::Api {
            status: status.as_u16(),
            message,
        }
    }

    fn wordbook_body<'a>(book: &'a Wordbook) -> WordbookBody<'a> {
        WordbookBody {
            id: &book.id,
            title: &book.title,
            subtitle: book.subtitle.as_deref(),
            target_passes: book.target_passes,
            words: book.words.iter().map(Self::entry_body).collect(),
        }
    }

    fn entry_body(entry: &WordEntry) -> EntryBody<'_> {
        EntryBody {
            id: Some(&entry.id),
            word: &entry.word,
            meaning: &entry.meaning,
            ordinal: entry.ordinal,
        }
    }

    // ========== 用户资料 ==========

    /// 获取用户资料（缺省时服务端返回默认值）
    pub async fn fetch_profile(&self) -> Result<UserProfile, SyncError> {
        let response = self
            .request(reqwest::Method::GET, "/api/profile")
            .send()
            .await?;
        Self::expect_data(response).await
    }

    /// 更新用户资料
    pub async fn update_profile(
        &self,
        display_name: Option<&str>,
        avatar_emoji: Option<&str>,
    ) -> Result<UserProfile, SyncError> {
        let response = self
            .request(reqwest::Method::PATCH, "/api/profile")
            .json(&UpdateProfileBody {
                display_name,
                avatar_emoji,
            })
            .send()
            .await?;
        Self::expect_data(response).await
    }
}

impl RemoteStore for ApiClient {
    async fn fetch_wordbooks(&self) -> Result<Vec<Wordbook>, SyncError> {
        let response = self
            .request(reqwest::Method::GET, "/api/wordbooks")
            .send()
            .await?;
        Self::expect_data(response).await
    }

    async fn update_wordbook(&self, book: &Wordbook) -> Result<(), SyncError> {
        let response = self
            .request(
                reqwest::Method::PATCH,
                &format!("/api/wordbooks/{}", book.id),
            )
            .json(&Self::wordbook_body(book))
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    async fn create_wordbook(&self, book: &Wordbook) -> Result<(), SyncError> {
        let response = self
            .request(reqwest::Method::POST, "/api/wordbooks")
            .json(&Self::wordbook_body(book))
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    async fn fetch_section_progress(&self) -> Result<Vec<RemoteSectionProgress>, SyncError> {
        let response = self
            .request(reqwest::Method::GET, "/api/progress/sections")
            .send()
            .await?;
        Self::expect_data(response).await
    }

    async fn upsert_section_progress(
        &self,
        book_id: &str,
        state: ProgressState,
    ) -> Result<(), SyncError> {
        let response = self
            .request(reqwest::Method::POST, "/api/progress/sections")
            .json(&SectionProgressBody {
                word_book_id: book_id,
                completed_pages: state.completed_pages,
                completed_passes: state.completed_passes,
            })
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    async fn fetch_visibility(&self) -> Result<Vec<RemoteVisibility>, SyncError> {
        let response = self
            .request(reqwest::Method::GET, "/api/visibility")
            .send()
            .await?;
        Self::expect_data(response).await
    }

    async fn upsert_visibility(&self, entries: &[RemoteVisibility]) -> Result<(), SyncError> {
        let response = self
            .request(reqwest::Method::POST, "/api/visibility")
            .json(&VisibilityBatchBody { entries })
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    async fn upsert_daily_progress(&self, date: &str, words_learned: i64) -> Result<(), SyncError> {
        let response = self
            .request(reqwest::Method::POST, "/api/progress/daily")
            .json(&DailyProgressBody {
                date,
                words_learned,
            })
            .send()
            .await?;
        Self::expect_ok(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = ApiClient::new(ApiConfig::new("https://api.example.com/"), "t").unwrap();
        assert_eq!(
            client.url("/api/wordbooks"),
            "https://api.example.com/api/wordbooks"
        );
    }

    #[test]
    fn test_wordbook_body_serializes_camel_case() {
        let book = Wordbook {
            id: "b-1".to_string(),
            title: "词书".to_string(),
            subtitle: None,
            target_passes: 2,
            is_template: false,
            words: vec![WordEntry {
                id: "e-1".to_string(),
                word: "abandon".to_string(),
                meaning: "放弃".to_string(),
                ordinal: 0,
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let value = serde_json::to_value(ApiClient::wordbook_body(&book)).unwrap();
        assert_eq!(value["targetPasses"], 2);
        assert_eq!(value["words"][0]["word"], "abandon");
        assert_eq!(value["words"][0]["id"], "e-1");
        assert!(value.get("subtitle").is_none());
    }
}
