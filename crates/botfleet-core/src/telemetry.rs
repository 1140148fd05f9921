// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resilient telemetry fetching.
//!
//! Telemetry lives on an external source of unknown schema and unreliable
//! reachability. Each fetch resolves the endpoint template for the target,
//! then tries an ordered chain of access-path transforms; every attempt is
//! cache-busted and bounded by a strict timeout that aborts the transfer.
//! The first attempt that yields a usable result short-circuits the rest.
//! Exhausting the chain yields "no data", never an error: stale values are
//! for the caller to keep, not for this module to clear.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::CoreConfig;
use crate::endpoint::{AccessPath, cache_bust, is_direct_image, resolve_template};
use crate::error::{FleetError, Result};
use crate::extract::{field, find_value, parse_metric, parse_percent};
use crate::types::{LevelSnapshot, ProfileSnapshot, TelemetryKind};

static BANNER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i).*(banner|background|cover|wall|header).*").unwrap());
static AVATAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i).*(avatar|icon|image|pic|photo|profile).*").unwrap());
static NICKNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(nickname|name|user_name|username|ign|player_name)$").unwrap()
});

/// Fetches progress and profile telemetry for instances.
#[derive(Debug, Clone)]
pub struct TelemetryClient {
    http: reqwest::Client,
    level_url: String,
    profile_url: String,
    level_chain: Vec<AccessPath>,
    profile_chain: Vec<AccessPath>,
    level_timeout: Duration,
    profile_timeout: Duration,
}

impl TelemetryClient {
    /// Create a client from the engine configuration, with the default
    /// access-path chains.
    pub fn new(config: &CoreConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| FleetError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            level_url: config.level_url.clone(),
            profile_url: config.profile_url.clone(),
            level_chain: AccessPath::level_chain(),
            profile_chain: AccessPath::profile_chain(),
            level_timeout: config.level_timeout,
            profile_timeout: config.profile_timeout,
        })
    }

    /// Replace the progress telemetry access-path chain.
    pub fn with_level_chain(mut self, chain: Vec<AccessPath>) -> Self {
        self.level_chain = chain;
        self
    }

    /// Replace the profile telemetry access-path chain.
    pub fn with_profile_chain(mut self, chain: Vec<AccessPath>) -> Self {
        self.profile_chain = chain;
        self
    }

    /// Fetch a progress snapshot for a target.
    ///
    /// Returns `None` when every access path failed; the caller must treat
    /// that as "stale, unknown" rather than an instance error.
    pub async fn fetch_level(&self, target_uid: &str) -> Option<LevelSnapshot> {
        let url = match resolve_template(&self.level_url, target_uid) {
            Ok(url) => url,
            Err(e) => {
                warn!(target_uid, error = %e, "level telemetry template unusable");
                return None;
            }
        };

        for path in &self.level_chain {
            match self.attempt_json(&path.apply(&url), self.level_timeout).await {
                Ok(doc) => return Some(parse_level_snapshot(&doc)),
                Err(e) => {
                    debug!(
                        target_uid,
                        kind = TelemetryKind::Level.as_str(),
                        path = path.name(),
                        error = %e,
                        "telemetry attempt failed, advancing chain"
                    );
                }
            }
        }

        None
    }

    /// Fetch a profile snapshot for a target.
    ///
    /// A resolved URL that already looks like an image resource is used
    /// directly without any network call. When every access path fails,
    /// the resolved URL itself is returned as the banner so the caller
    /// still has something to render.
    pub async fn fetch_profile(&self, target_uid: &str) -> Option<ProfileSnapshot> {
        let url = match resolve_template(&self.profile_url, target_uid) {
            Ok(url) => url,
            Err(e) => {
                warn!(target_uid, error = %e, "profile telemetry template unusable");
                return None;
            }
        };

        if is_direct_image(&url) {
            return Some(ProfileSnapshot {
                banner: url,
                ..Default::default()
            });
        }

        for path in &self.profile_chain {
            match self.attempt_text(&path.apply(&url), self.profile_timeout).await {
                Ok(body) => {
                    if let Some(profile) = parse_profile_body(&body) {
                        return Some(profile);
                    }
                    debug!(
                        target_uid,
                        kind = TelemetryKind::Profile.as_str(),
                        path = path.name(),
                        "profile body unusable, advancing chain"
                    );
                }
                Err(e) => {
                    debug!(
                        target_uid,
                        kind = TelemetryKind::Profile.as_str(),
                        path = path.name(),
                        error = %e,
                        "telemetry attempt failed, advancing chain"
                    );
                }
            }
        }

        Some(ProfileSnapshot {
            banner: url,
            ..Default::default()
        })
    }

    /// One attempt expecting a JSON object body.
    async fn attempt_json(&self, url: &str, timeout: Duration) -> Result<Value> {
        let body = self.attempt_text(url, timeout).await?;
        let doc: Value = serde_json::from_str(&body)?;
        if doc.is_object() {
            Ok(doc)
        } else {
            Err(FleetError::Parse("telemetry body is not an object".to_string()))
        }
    }

    /// One attempt yielding the raw body text on a success status.
    async fn attempt_text(&self, url: &str, timeout: Duration) -> Result<String> {
        let busted = cache_bust(url, Utc::now().timestamp_millis());
        let response = self
            .http
            .get(&busted)
            .timeout(timeout)
            .header("cache-control", "no-store")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(FleetError::Remote {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

/// Interpret a progress telemetry document.
///
/// Every field is looked up under the spellings observed in the wild;
/// all of them are optional.
pub fn parse_level_snapshot(doc: &Value) -> LevelSnapshot {
    LevelSnapshot {
        level: field(doc, &["level", "lvl", "current_level"]).and_then(parse_metric),
        current_metric: field(doc, &["current_exp", "curr_exp", "currentexp", "cur_xp"])
            .and_then(parse_metric),
        start_metric: field(doc, &["exp_for_current_level", "start_exp", "start_point"])
            .and_then(parse_metric),
        target_metric: field(doc, &["exp_for_next_level", "next_exp"]).and_then(parse_metric),
        needed_metric: field(doc, &["exp_needed", "needed_exp"]).and_then(parse_metric),
        percent: field(doc, &["progress_percentage", "percent", "percentage"])
            .and_then(parse_percent),
        nickname: field(doc, &["nickname", "name", "user_name"])
            .and_then(|v| v.as_str())
            .map(str::to_string),
        eta: field(doc, &["eta"]).and_then(|v| v.as_str()).map(str::to_string),
    }
}

/// Interpret a profile telemetry body.
///
/// Accepts either a JSON document (searched schema-agnostically) or plain
/// text carrying a direct resource locator. Returns `None` when the body
/// holds neither.
pub fn parse_profile_body(body: &str) -> Option<ProfileSnapshot> {
    if let Ok(doc) = serde_json::from_str::<Value>(body)
        && doc.is_object()
    {
        let banner = find_value(&doc, &BANNER_RE, true);
        let avatar = find_value(&doc, &AVATAR_RE, true);
        let nickname = find_value(&doc, &NICKNAME_RE, false);

        if banner.is_some() || avatar.is_some() || nickname.is_some() {
            return Some(ProfileSnapshot {
                banner: banner.unwrap_or_default(),
                avatar: avatar.unwrap_or_default(),
                nickname: nickname.unwrap_or_default(),
            });
        }
        return None;
    }

    let trimmed = body.trim();
    if trimmed.starts_with("http") {
        return Some(ProfileSnapshot {
            banner: trimmed.to_string(),
            ..Default::default()
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(level_url: &str, profile_url: &str) -> TelemetryClient {
        let config = CoreConfig::new()
            .with_level_url(level_url)
            .with_profile_url(profile_url);
        TelemetryClient::new(&config).unwrap()
    }

    #[test]
    fn test_parse_level_snapshot_variants() {
        let snap = parse_level_snapshot(&json!({
            "lvl": 7,
            "cur_xp": "1,200",
            "next_exp": 2000,
            "nickname": "Rogue"
        }));
        assert_eq!(snap.level, Some(7));
        assert_eq!(snap.current_metric, Some(1200));
        assert_eq!(snap.target_metric, Some(2000));
        assert_eq!(snap.nickname.as_deref(), Some("Rogue"));
        assert!(snap.percent.is_none());
    }

    #[test]
    fn test_parse_profile_body_json() {
        let profile = parse_profile_body(
            r#"{"player":{"Banner":"https://img.example/b.png","nickname":"Rogue"}}"#,
        )
        .unwrap();
        assert_eq!(profile.banner, "https://img.example/b.png");
        assert_eq!(profile.nickname, "Rogue");
    }

    #[test]
    fn test_parse_profile_body_plain_url() {
        let profile = parse_profile_body("  https://img.example/direct.png \n").unwrap();
        assert_eq!(profile.banner, "https://img.example/direct.png");
        assert!(profile.avatar.is_empty());
    }

    #[test]
    fn test_parse_profile_body_garbage() {
        assert!(parse_profile_body("not a url and not json").is_none());
        assert!(parse_profile_body(r#"{"unrelated": 1}"#).is_none());
    }

    #[tokio::test]
    async fn test_fetch_level_direct_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/level/123"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"level": 9, "current_exp": 500})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&format!("{}/level/{{uid}}", server.uri()), "https://x/p")
            .with_level_chain(vec![AccessPath::Direct]);

        let snap = client.fetch_level("123").await.unwrap();
        assert_eq!(snap.level, Some(9));
        assert_eq!(snap.current_metric, Some(500));
    }

    #[tokio::test]
    async fn test_fetch_level_chain_stops_at_first_success() {
        let server = MockServer::start().await;

        // Direct endpoint fails, first proxy serves invalid text, second
        // proxy answers properly. The third proxy must never be attempted.
        Mock::given(method("GET"))
            .and(path("/level/7"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/proxy-a"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/proxy-b"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"lvl": 7, "cur_xp": "1,200"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/proxy-c"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"lvl": 1})))
            .expect(0)
            .mount(&server)
            .await;

        let client = test_client(&format!("{}/level/{{uid}}", server.uri()), "https://x/p")
            .with_level_chain(vec![
                AccessPath::Direct,
                AccessPath::Encoded {
                    prefix: format!("{}/proxy-a?u=", server.uri()),
                },
                AccessPath::Encoded {
                    prefix: format!("{}/proxy-b?u=", server.uri()),
                },
                AccessPath::Encoded {
                    prefix: format!("{}/proxy-c?u=", server.uri()),
                },
            ]);

        let snap = client.fetch_level("7").await.unwrap();
        assert_eq!(snap.level, Some(7));
        assert_eq!(snap.current_metric, Some(1200));
    }

    #[tokio::test]
    async fn test_fetch_level_exhausted_chain_is_no_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = test_client(&format!("{}/level/{{uid}}", server.uri()), "https://x/p")
            .with_level_chain(vec![AccessPath::Direct]);

        assert!(client.fetch_level("7").await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_level_timeout_advances_chain() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/level/7"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"level": 1}))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/proxy"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"level": 3})))
            .mount(&server)
            .await;

        let config = CoreConfig::new()
            .with_level_url(format!("{}/level/{{uid}}", server.uri()))
            .with_profile_url("https://x/p");
        let mut client = TelemetryClient::new(&config).unwrap().with_level_chain(vec![
            AccessPath::Direct,
            AccessPath::Encoded {
                prefix: format!("{}/proxy?u=", server.uri()),
            },
        ]);
        client.level_timeout = Duration::from_millis(250);

        let snap = client.fetch_level("7").await.unwrap();
        assert_eq!(snap.level, Some(3));
    }

    #[tokio::test]
    async fn test_fetch_profile_extension_shortcut_makes_no_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = test_client(
            "https://x/level/{uid}",
            &format!("{}/banners/{{uid}}.png", server.uri()),
        );

        let profile = client.fetch_profile("55").await.unwrap();
        assert_eq!(profile.banner, format!("{}/banners/55.png", server.uri()));
    }

    #[tokio::test]
    async fn test_fetch_profile_falls_back_to_resolved_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let profile_url = format!("{}/profile?uid={{uid}}", server.uri());
        let client = test_client("https://x/level/{uid}", &profile_url)
            .with_profile_chain(vec![AccessPath::Direct]);

        let profile = client.fetch_profile("55").await.unwrap();
        assert_eq!(profile.banner, format!("{}/profile?uid=55", server.uri()));
    }

    #[tokio::test]
    async fn test_fetch_profile_plain_text_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/profile"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("https://img.example/banner.png"),
            )
            .mount(&server)
            .await;

        let client = test_client(
            "https://x/level/{uid}",
            &format!("{}/profile?uid={{uid}}", server.uri()),
        )
        .with_profile_chain(vec![AccessPath::Direct]);

        let profile = client.fetch_profile("55").await.unwrap();
        assert_eq!(profile.banner, "https://img.example/banner.png");
    }
}
