// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Endpoint templates and access-path transforms.
//!
//! Job-control and telemetry endpoints are configured as URL patterns with
//! a placeholder for the target id, resolved at call time. Telemetry URLs
//! may additionally be routed through an ordered list of access-path
//! transforms (indirection services) for fallback.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{FleetError, Result};

static IMAGE_EXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(jpg|jpeg|png|gif|webp|svg)$").unwrap());

/// Resolve an endpoint template against a target id.
///
/// Trims the template, defaults the scheme to `https://`, substitutes every
/// `{target_uid}` and `{uid}` placeholder, and validates the result as a
/// URL. A template that fails validation after substitution is a
/// configuration error; no network call may be attempted with it.
pub fn resolve_template(template: &str, target_uid: &str) -> Result<String> {
    let mut url = template.trim().to_string();
    if !url.starts_with("http") {
        url = format!("https://{}", url);
    }
    url = url
        .replace("{target_uid}", target_uid)
        .replace("{uid}", target_uid);

    url::Url::parse(&url)
        .map_err(|_| FleetError::Config(format!("invalid endpoint template: {}", template)))?;

    Ok(url)
}

/// Append a fresh cache-busting query parameter.
///
/// Telemetry sources sit behind caches that would otherwise serve stale
/// progress; every attempt gets its own buster.
pub fn cache_bust(url: &str, now_ms: i64) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}_t={}", url, sep, now_ms)
}

/// Whether the resolved URL already points at an image resource.
///
/// Checked by file-extension pattern; such URLs are used directly without
/// any network call.
pub fn is_direct_image(url: &str) -> bool {
    IMAGE_EXT_RE.is_match(url)
}

/// One way of turning a target URL into a reachable URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPath {
    /// Use the resolved URL as-is.
    Direct,
    /// Prepend an indirection service, URL-encoding the target.
    Encoded {
        /// Service prefix the encoded target is appended to.
        prefix: String,
    },
    /// Prepend an indirection service, passing the target verbatim.
    Plain {
        /// Service prefix the target is appended to.
        prefix: String,
    },
}

impl AccessPath {
    /// The corsproxy.io indirection service.
    pub fn cors_proxy() -> Self {
        AccessPath::Encoded {
            prefix: "https://corsproxy.io/?".to_string(),
        }
    }

    /// The allorigins raw indirection service.
    pub fn all_origins() -> Self {
        AccessPath::Encoded {
            prefix: "https://api.allorigins.win/raw?url=".to_string(),
        }
    }

    /// The thingproxy indirection service.
    pub fn thing_proxy() -> Self {
        AccessPath::Plain {
            prefix: "https://thingproxy.freeboard.io/fetch/".to_string(),
        }
    }

    /// Default chain for progress telemetry, highest priority first.
    pub fn level_chain() -> Vec<Self> {
        vec![
            AccessPath::Direct,
            Self::cors_proxy(),
            Self::all_origins(),
            Self::thing_proxy(),
        ]
    }

    /// Default chain for profile telemetry, highest priority first.
    pub fn profile_chain() -> Vec<Self> {
        vec![AccessPath::Direct, Self::cors_proxy(), Self::all_origins()]
    }

    /// Apply this transform to a resolved target URL.
    pub fn apply(&self, url: &str) -> String {
        match self {
            AccessPath::Direct => url.to_string(),
            AccessPath::Encoded { prefix } => {
                format!("{}{}", prefix, urlencoding::encode(url))
            }
            AccessPath::Plain { prefix } => format!("{}{}", prefix, url),
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &str {
        match self {
            AccessPath::Direct => "direct",
            AccessPath::Encoded { prefix } | AccessPath::Plain { prefix } => prefix,
        }
    }
}
