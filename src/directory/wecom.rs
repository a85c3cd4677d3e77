// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP client for the Directory's contact-way and external-contact API.
//!
//! Access tokens are fetched with corp credentials, cached until shortly
//! before expiry, and refreshed once when the API reports them invalid.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use super::{ContactApi, ContactWay, ContactWayRequest, DirectoryError, ExternalContact};
use crate::config::ContactApiConfig;
use crate::metrics;

/// Token is refreshed this long before its advertised expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(300);

/// errcodes meaning the access token is invalid or expired
const TOKEN_ERRCODES: [i64; 3] = [40014, 42001, 42009];

/// Contact-way type: single staff member
const CONTACT_WAY_SINGLE: u8 = 1;
/// Contact-way scene: QR code
const CONTACT_WAY_QR: u8 = 2;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct ContactWayResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    config_id: String,
    #[serde(default)]
    qr_code: String,
}

#[derive(Debug, Deserialize)]
struct ExternalContactResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    external_contact: Option<RawExternalContact>,
}

#[derive(Debug, Deserialize)]
struct RawExternalContact {
    external_userid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    avatar: String,
    #[serde(default)]
    gender: u8,
    #[serde(default)]
    unionid: String,
    #[serde(default)]
    external_profile: Option<Value>,
}

impl RawExternalContact {
    fn into_contact(self) -> ExternalContact {
        ExternalContact {
            external_user_id: self.external_userid,
            name: self.name,
            avatar: self.avatar,
            gender: self.gender,
            union_id: self.unionid,
            external_profile: self.external_profile.filter(profile_has_content),
        }
    }
}

/// A profile counts only when it names a corp or carries attributes.
fn profile_has_content(profile: &Value) -> bool {
    let corp = profile
        .get("external_corp_name")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty());
    let attrs = profile
        .get("external_attr")
        .and_then(Value::as_array)
        .is_some_and(|a| !a.is_empty());
    corp || attrs
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct WeComContactApi {
    client: Client,
    config: ContactApiConfig,
    token: RwLock<Option<CachedToken>>,
}

impl WeComContactApi {
    pub fn new(config: ContactApiConfig) -> Result<Self, DirectoryError> {
        if config.corp_id.is_empty() || config.secret.is_empty() {
            return Err(DirectoryError::Api {
                code: -1,
                message: "contact API corp_id and secret are required".into(),
            });
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DirectoryError::Transport(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<String, DirectoryError> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref() {
                if token.expires_at > Instant::now() {
                    return Ok(token.value.clone());
                }
            }
        }

        let response: TokenResponse = self
            .client
            .get(self.url("/gettoken"))
            .query(&[("corpid", &self.config.corp_id), ("corpsecret", &self.config.secret)])
            .send()
            .await?
            .json()
            .await?;

        if response.errcode != 0 || response.access_token.is_empty() {
            return Err(DirectoryError::Api {
                code: response.errcode,
                message: response.errmsg,
            });
        }

        let ttl = Duration::from_secs(response.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        let mut guard = self.token.write().await;
        *guard = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + ttl,
        });
        debug!(expires_in = response.expires_in, "Fetched directory access token");
        Ok(response.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }

    async fn post_contact_way(&self, token: &str, request: &ContactWayRequest) -> Result<ContactWayResponse, DirectoryError> {
        let body = json!({
            "type": CONTACT_WAY_SINGLE,
            "scene": CONTACT_WAY_QR,
            "user": [request.staff_id],
            "state": request.state,
            "skip_verify": request.skip_verify,
        });
        Ok(self
            .client
            .post(self.url("/externalcontact/add_contact_way"))
            .query(&[("access_token", token)])
            .json(&body)
            .send()
            .await?
            .json()
            .await?)
    }

    async fn fetch_external_contact(&self, token: &str, external_user_id: &str) -> Result<ExternalContactResponse, DirectoryError> {
        Ok(self
            .client
            .get(self.url("/externalcontact/get"))
            .query(&[("access_token", token), ("external_userid", external_user_id)])
            .send()
            .await?
            .json()
            .await?)
    }
}

#[async_trait]
impl ContactApi for WeComContactApi {
    #[instrument(skip(self, request), fields(staff_id = %request.staff_id))]
    async fn add_contact_way(&self, request: &ContactWayRequest) -> Result<ContactWay, DirectoryError> {
        let token = self.access_token().await?;
        let mut response = self.post_contact_way(&token, request).await?;

        if TOKEN_ERRCODES.contains(&response.errcode) {
            self.invalidate_token().await;
            let token = self.access_token().await?;
            response = self.post_contact_way(&token, request).await?;
        }

        if response.errcode != 0 {
            metrics::record_directory_call("contact_api", "add_contact_way", "error");
            return Err(DirectoryError::Api {
                code: response.errcode,
                message: response.errmsg,
            });
        }

        metrics::record_directory_call("contact_api", "add_contact_way", "success");
        info!(config_id = %response.config_id, "Contact way created");
        Ok(ContactWay {
            config_id: response.config_id,
            qr_code: response.qr_code,
        })
    }

    #[instrument(skip(self))]
    async fn get_external_contact(&self, external_user_id: &str) -> Result<ExternalContact, DirectoryError> {
        let token = self.access_token().await?;
        let mut response = self.fetch_external_contact(&token, external_user_id).await?;

        if TOKEN_ERRCODES.contains(&response.errcode) {
            self.invalidate_token().await;
            let token = self.access_token().await?;
            response = self.fetch_external_contact(&token, external_user_id).await?;
        }

        if response.errcode != 0 {
            metrics::record_directory_call("contact_api", "get_external_contact", "error");
            return Err(DirectoryError::Api {
                code: response.errcode,
                message: response.errmsg,
            });
        }

        metrics::record_directory_call("contact_api", "get_external_contact", "success");
        response
            .external_contact
            .map(RawExternalContact::into_contact)
            .ok_or_else(|| DirectoryError::Decode("response without external_contact".into()))
    }
}
