use std::{env, fmt::Display, str::FromStr};

use tracing::{info, warn};

/// App id sentinel for dummy credentials. With this id the platform client
/// never goes over the network and the mock-scan endpoint is enabled.
pub const STUB_APP_ID: &str = "wx_test_appid";

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub secret_key: String,
    pub access_token_expire_minutes: u64,
    pub app_id: String,
    pub app_secret: String,
    pub callback_token: String,
    pub platform_api_base: String,
    pub scene_ttl_secs: u64,
    pub platform_timeout_secs: u64,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("AURA_AUTH_PORT", "8000"),
            secret_key: try_load("SECRET_KEY", "aura_hackathon_stable_secret_key_2026_FIXED"),
            access_token_expire_minutes: try_load("ACCESS_TOKEN_EXPIRE_MINUTES", "11520"),
            app_id: try_load("WECHAT_APP_ID", STUB_APP_ID),
            app_secret: try_load("WECHAT_APP_SECRET", "wx_test_secret"),
            callback_token: try_load("WECHAT_TOKEN", "vibebuild_token"),
            platform_api_base: try_load("WECHAT_API_BASE", "https://api.weixin.qq.com"),
            scene_ttl_secs: try_load("QR_SCENE_TTL_SECS", "600"),
            platform_timeout_secs: try_load("PLATFORM_TIMEOUT_SECS", "10"),
        }
    }

    pub fn stub_mode(&self) -> bool {
        self.app_id == STUB_APP_ID
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        info!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}
