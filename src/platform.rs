use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::config::Config;
use crate::errors::ServiceError;

/// QR tickets and scenes expire together; the store TTL defaults to the
/// same value so a poller never outlives its QR code.
const QR_TICKET_EXPIRE_SECS: u64 = 600;
const SHOW_QR_BASE: &str = "https://mp.weixin.qq.com/cgi-bin/showqrcode";

/// Provider tokens are refreshed this long before their stated expiry.
const TOKEN_EXPIRY_SKEW_SECS: u64 = 60;

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Client for the external platform's own API: access-token fetch with a
/// process-wide lazy cache, and QR-ticket creation. In stub mode (dummy
/// credentials) nothing goes over the network.
pub struct PlatformClient {
    http: reqwest::Client,
    app_id: String,
    app_secret: String,
    api_base: String,
    local_port: u16,
    stub: bool,
    cached_token: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    errcode: Option<i64>,
    errmsg: Option<String>,
}

#[derive(Deserialize)]
struct QrTicketResponse {
    ticket: Option<String>,
    errcode: Option<i64>,
    errmsg: Option<String>,
}

impl PlatformClient {
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.platform_timeout_secs))
            .build()
            .expect("platform http client");

        Self {
            http,
            app_id: config.app_id.clone(),
            app_secret: config.app_secret.clone(),
            api_base: config.platform_api_base.clone(),
            local_port: config.port,
            stub: config.stub_mode(),
            cached_token: Mutex::new(None),
        }
    }

    pub fn stub_mode(&self) -> bool {
        self.stub
    }

    /// Current platform access token, fetched lazily and cached until just
    /// before the provider-stated expiry. The cache lock is never held
    /// across the network call; concurrent cold-start refreshes may race.
    pub async fn access_token(&self) -> Result<String, ServiceError> {
        {
            let cached = self.cached_token.lock().expect("token cache lock");
            if let Some(entry) = cached.as_ref() {
                if Instant::now() < entry.expires_at {
                    return Ok(entry.token.clone());
                }
            }
        }

        let url = format!(
            "{}/cgi-bin/token?grant_type=client_credential&appid={}&secret={}",
            self.api_base, self.app_id, self.app_secret
        );
        let resp: TokenResponse = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ServiceError::PlatformToken(e.to_string()))?
            .json()
            .await
            .map_err(|e| ServiceError::PlatformToken(e.to_string()))?;

        match (resp.access_token, resp.expires_in) {
            (Some(token), Some(expires_in)) => {
                let expires_at = Instant::now()
                    + Duration::from_secs(expires_in.saturating_sub(TOKEN_EXPIRY_SKEW_SECS));
                let mut cached = self.cached_token.lock().expect("token cache lock");
                *cached = Some(CachedToken {
                    token: token.clone(),
                    expires_at,
                });
                Ok(token)
            }
            _ => {
                error!(
                    errcode = resp.errcode,
                    errmsg = resp.errmsg.as_deref(),
                    "platform access token fetch failed"
                );
                Err(ServiceError::PlatformToken(format!(
                    "errcode {:?}: {}",
                    resp.errcode,
                    resp.errmsg.unwrap_or_default()
                )))
            }
        }
    }

    /// Creates a QR ticket for a scene and returns the display URL. In stub
    /// mode this is a locally-built placeholder pointing at the mock-scan
    /// endpoint, so the whole login flow works without live credentials.
    pub async fn qr_url(&self, scene_id: &str) -> Result<String, ServiceError> {
        if self.stub {
            return Ok(format!(
                "https://api.qrserver.com/v1/create-qr-code/?size=150x150&data=http://localhost:{}/login/mock-scan%3Fscene_id%3D{}",
                self.local_port, scene_id
            ));
        }

        let token = self.access_token().await?;
        let url = format!(
            "{}/cgi-bin/qrcode/create?access_token={}",
            self.api_base, token
        );

        // Temporary QR scenes on test accounts only take integer ids;
        // anything non-numeric goes through the string variant.
        let payload = match scene_id.parse::<u64>() {
            Ok(numeric) => json!({
                "expire_seconds": QR_TICKET_EXPIRE_SECS,
                "action_name": "QR_SCENE",
                "action_info": {"scene": {"scene_id": numeric}},
            }),
            Err(_) => json!({
                "expire_seconds": QR_TICKET_EXPIRE_SECS,
                "action_name": "QR_STR_SCENE",
                "action_info": {"scene": {"scene_str": scene_id}},
            }),
        };

        let resp: QrTicketResponse = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ServiceError::PlatformQr(e.to_string()))?
            .json()
            .await
            .map_err(|e| ServiceError::PlatformQr(e.to_string()))?;

        match resp.ticket {
            Some(ticket) => Ok(format!("{SHOW_QR_BASE}?ticket={ticket}")),
            None => {
                error!(
                    errcode = resp.errcode,
                    errmsg = resp.errmsg.as_deref(),
                    "platform qr ticket creation failed"
                );
                Err(ServiceError::PlatformQr(format!(
                    "errcode {:?}: {}",
                    resp.errcode,
                    resp.errmsg.unwrap_or_default()
                )))
            }
        }
    }
}
