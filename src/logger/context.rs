//! 日志上下文
//!
//! 调用方上下文之外，按配置附加用户信息、运行环境和应用状态快照。

use crate::common::{ContextMap, TelemetryConfig};
use crate::logger::listeners::panic_message;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

/// 应用状态快照提供者
pub type AppStateProvider = Arc<dyn Fn() -> Value + Send + Sync>;

/// 运行环境信息，进程内只计算一次
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentInfo {
    pub app_name: &'static str,
    pub app_version: &'static str,
    pub os: &'static str,
    pub os_family: &'static str,
    pub arch: &'static str,
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub started_at: DateTime<Utc>,
}

static ENVIRONMENT: Lazy<EnvironmentInfo> = Lazy::new(|| EnvironmentInfo {
    app_name: env!("CARGO_PKG_NAME"),
    app_version: env!("CARGO_PKG_VERSION"),
    os: std::env::consts::OS,
    os_family: std::env::consts::FAMILY,
    arch: std::env::consts::ARCH,
    pid: std::process::id(),
    hostname: std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .filter(|h| !h.is_empty()),
    started_at: Utc::now(),
});

pub fn environment_info() -> &'static EnvironmentInfo {
    &ENVIRONMENT
}

#[derive(Default)]
pub struct ContextProviders {
    user: RwLock<Option<ContextMap>>,
    app_state: RwLock<Option<AppStateProvider>>,
}

impl ContextProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_user_context(&self, user: ContextMap) {
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = Some(user);
    }

    pub fn clear_user_context(&self) {
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn user_context(&self) -> Option<ContextMap> {
        self.user.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_app_state_provider<F>(&self, provider: F)
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        *self.app_state.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(provider));
    }

    pub fn clear_app_state_provider(&self) {
        *self.app_state.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// 合并上下文：调用方的键在前，随后是 `user`、`environment`、`app_state`
    pub fn merge(&self, caller: ContextMap, config: &TelemetryConfig) -> ContextMap {
        let mut merged = caller;

        if config.include_user_context {
            if let Some(user) = self.user_context() {
                merged.insert("user".to_string(), Value::Object(user));
            }
        }

        if config.include_environment_info {
            if let Ok(env) = serde_json::to_value(environment_info()) {
                merged.insert("environment".to_string(), env);
            }
        }

        if config.include_app_state {
            let provider = self.app_state.read().unwrap_or_else(|e| e.into_inner()).clone();
            if let Some(provider) = provider {
                match catch_unwind(AssertUnwindSafe(|| provider())) {
                    Ok(state) => {
                        merged.insert("app_state".to_string(), state);
                    }
                    Err(payload) => {
                        eprintln!("[Error Logger] 获取应用状态失败: {}", panic_message(payload.as_ref()));
                    }
                }
            }
        }

        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> TelemetryConfig {
        TelemetryConfig {
            include_user_context: true,
            include_environment_info: true,
            include_app_state: true,
            ..TelemetryConfig::default()
        }
    }

    #[test]
    fn test_merge_all_sources() {
        let providers = ContextProviders::new();
        let mut user = ContextMap::new();
        user.insert("id".to_string(), json!("u-42"));
        providers.set_user_context(user);
        providers.set_app_state_provider(|| json!({"route": "/viewer"}));

        let mut caller = ContextMap::new();
        caller.insert("model_id".to_string(), json!(7));
        let merged = providers.merge(caller, &config());

        assert_eq!(merged["model_id"], json!(7));
        assert_eq!(merged["user"]["id"], json!("u-42"));
        assert_eq!(merged["environment"]["os"], json!(std::env::consts::OS));
        assert_eq!(merged["app_state"]["route"], json!("/viewer"));
    }

    #[test]
    fn test_flags_disable_sources() {
        let providers = ContextProviders::new();
        let mut user = ContextMap::new();
        user.insert("id".to_string(), json!("u-1"));
        providers.set_user_context(user);
        providers.set_app_state_provider(|| json!(1));

        let config = TelemetryConfig {
            include_user_context: false,
            include_environment_info: false,
            include_app_state: false,
            ..TelemetryConfig::default()
        };
        assert!(providers.merge(ContextMap::new(), &config).is_empty());
    }

    #[test]
    fn test_panicking_provider_is_skipped() {
        let providers = ContextProviders::new();
        providers.set_app_state_provider(|| panic!("state unavailable"));
        let merged = providers.merge(ContextMap::new(), &config());
        assert!(merged.get("app_state").is_none());
        assert!(merged.get("environment").is_some());
    }

    #[test]
    fn test_environment_computed_once() {
        let a = environment_info().started_at;
        let b = environment_info().started_at;
        assert_eq!(a, b);
        assert_eq!(environment_info().pid, std::process::id());
    }
}
