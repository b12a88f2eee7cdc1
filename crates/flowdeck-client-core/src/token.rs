//! Publish-token resolution and caching.
//!
//! The deep link that opens a published workflow carries a short-lived
//! publish token out-of-band: in the navigation history state, in a
//! server-injected page global, or as a `?token=` query parameter. The
//! store resolves the token once, caches it for the lifetime of the page,
//! and scrubs a query-delivered token from the visible address so it does
//! not survive copy/paste or reloads.

use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// Primary history-state key carrying the publish token.
pub const HISTORY_STATE_KEY: &str = "chatkitPublishToken";
/// Legacy history-state key still honored as a fallback.
pub const HISTORY_STATE_KEY_FALLBACK: &str = "publishToken";
/// Well-known page global for server-rendered token injection.
pub const PAGE_GLOBAL_KEY: &str = "flowdeckPublishToken";
/// Query parameter carrying the token on deep links.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Rejected in-place history replacement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("history replace rejected: {reason}")]
pub struct UrlReplaceError {
    pub reason: String,
}

impl UrlReplaceError {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Access to the hosting page's navigation state.
///
/// The browser-backed implementation lives with the host shell; tests use
/// fakes. All accessors are fallible-by-absence so restricted embeds
/// (no history access, opaque location) degrade to "source absent".
pub trait TokenEnvironment {
    /// Current navigation history state, when readable.
    fn history_state(&self) -> Option<Value>;
    /// Value of the well-known page global, when set.
    fn page_global(&self) -> Option<String>;
    /// Current location, when readable.
    fn current_url(&self) -> Option<Url>;
    /// Replace the visible address in place without a new history entry.
    fn replace_url(&self, url: &Url) -> Result<(), UrlReplaceError>;
}

/// Where a resolved token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// Already cached by an earlier resolution.
    Cache,
    HistoryState,
    PageGlobal,
    QueryString,
}

impl TokenSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::HistoryState => "history_state",
            Self::PageGlobal => "page_global",
            Self::QueryString => "query_string",
        }
    }
}

/// Description of the URL mutation performed while consuming a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlScrub {
    /// The token did not come from the query string; nothing to rewrite.
    NotNeeded,
    /// The visible address was replaced; `search` is the remaining query
    /// string (empty when no other parameters survived).
    Replaced { search: String },
    /// The environment refused the rewrite. The token itself is kept.
    Failed { reason: String },
}

/// Outcome of one [`PublishTokenStore::ensure`] pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResolution {
    pub token: Option<String>,
    pub source: Option<TokenSource>,
    pub scrub: UrlScrub,
}

impl TokenResolution {
    fn absent() -> Self {
        Self {
            token: None,
            source: None,
            scrub: UrlScrub::NotNeeded,
        }
    }
}

/// Tab-lifetime cache of the publish token.
///
/// Cloning shares the underlying cell, so the host panel and the fetch
/// adapter observe the same value. At most one token value is held at a
/// time; `ensure` never re-derives once a value is cached.
#[derive(Debug, Clone, Default)]
pub struct PublishTokenStore {
    value: Arc<RwLock<Option<String>>>,
}

impl PublishTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently cached token, if any. No side effects.
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.value.read().ok().and_then(|lock| lock.clone())
    }

    /// Replace the cache unconditionally. Blank input clears it.
    pub fn set(&self, value: Option<&str>) {
        let normalized = value.and_then(normalize_token);
        if let Ok(mut lock) = self.value.write() {
            *lock = normalized;
        }
    }

    /// Equivalent to `set(None)`.
    pub fn clear(&self) {
        self.set(None);
    }

    /// Return the cached token, or resolve one from the environment.
    ///
    /// Resolution precedence is strict: history state (either recognized
    /// key) over the page global over the URL query. A token consumed from
    /// the query string is deleted from the visible address via an
    /// in-place history replacement; other query parameters, the path, and
    /// the fragment are preserved. The resolved value (including absence)
    /// is cached before returning, and a cached value short-circuits the
    /// whole walk, so a second call performs no further URL mutation.
    pub fn ensure(&self, env: &dyn TokenEnvironment) -> TokenResolution {
        if let Some(cached) = self.get() {
            return TokenResolution {
                token: Some(cached),
                source: Some(TokenSource::Cache),
                scrub: UrlScrub::NotNeeded,
            };
        }

        let resolution = resolve_from_environment(env);
        self.set(resolution.token.as_deref());
        if let (Some(source), Some(_)) = (resolution.source, resolution.token.as_ref()) {
            debug!(source = source.as_str(), "publish token resolved");
        }
        resolution
    }
}

fn resolve_from_environment(env: &dyn TokenEnvironment) -> TokenResolution {
    if let Some(token) = token_from_history_state(env.history_state().as_ref()) {
        return TokenResolution {
            token: Some(token),
            source: Some(TokenSource::HistoryState),
            scrub: UrlScrub::NotNeeded,
        };
    }

    if let Some(token) = env.page_global().as_deref().and_then(normalize_token) {
        return TokenResolution {
            token: Some(token),
            source: Some(TokenSource::PageGlobal),
            scrub: UrlScrub::NotNeeded,
        };
    }

    let Some(url) = env.current_url() else {
        return TokenResolution::absent();
    };
    let Some(token) = token_from_query(&url) else {
        return TokenResolution::absent();
    };

    let scrub = scrub_token_param(env, &url);
    TokenResolution {
        token: Some(token),
        source: Some(TokenSource::QueryString),
        scrub,
    }
}

fn token_from_history_state(state: Option<&Value>) -> Option<String> {
    let object = state?.as_object()?;
    for key in [HISTORY_STATE_KEY, HISTORY_STATE_KEY_FALLBACK] {
        if let Some(token) = object.get(key).and_then(Value::as_str).and_then(normalize_token) {
            return Some(token);
        }
    }
    None
}

fn token_from_query(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == TOKEN_QUERY_PARAM)
        .and_then(|(_, value)| normalize_token(&value))
}

/// Delete the consumed `token` parameter and replace the visible address.
///
/// The surviving segments are spliced back in their original
/// serialization (valueless flags stay valueless, percent-encoding is
/// not normalized); only the `token` segment is removed.
fn scrub_token_param(env: &dyn TokenEnvironment, url: &Url) -> UrlScrub {
    let remaining: Vec<&str> = url
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|segment| !segment.is_empty() && !is_token_segment(segment))
        .collect();

    let mut scrubbed = url.clone();
    if remaining.is_empty() {
        scrubbed.set_query(None);
    } else {
        scrubbed.set_query(Some(&remaining.join("&")));
    }

    match env.replace_url(&scrubbed) {
        Ok(()) => UrlScrub::Replaced {
            search: scrubbed
                .query()
                .map(|query| format!("?{query}"))
                .unwrap_or_default(),
        },
        Err(error) => {
            warn!(reason = %error.reason, "token consumed but URL scrub failed");
            UrlScrub::Failed {
                reason: error.reason,
            }
        }
    }
}

fn is_token_segment(segment: &str) -> bool {
    url::form_urlencoded::parse(segment.as_bytes())
        .next()
        .is_some_and(|(key, _)| key == TOKEN_QUERY_PARAM)
}

fn normalize_token(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct FakeEnvironment {
        history_state: Option<Value>,
        page_global: Option<String>,
        url: Option<String>,
        reject_replace: bool,
        replaced: RefCell<Vec<Url>>,
    }

    impl FakeEnvironment {
        fn with_url(url: &str) -> Self {
            Self {
                url: Some(url.to_string()),
                ..Self::default()
            }
        }

        fn replace_count(&self) -> usize {
            self.replaced.borrow().len()
        }

        fn last_replaced(&self) -> Option<Url> {
            self.replaced.borrow().last().cloned()
        }
    }

    impl TokenEnvironment for FakeEnvironment {
        fn history_state(&self) -> Option<Value> {
            self.history_state.clone()
        }

        fn page_global(&self) -> Option<String> {
            self.page_global.clone()
        }

        fn current_url(&self) -> Option<Url> {
            let raw = self.url.as_deref()?;
            Url::parse(raw).ok()
        }

        fn replace_url(&self, url: &Url) -> Result<(), UrlReplaceError> {
            if self.reject_replace {
                return Err(UrlReplaceError::new("history access denied"));
            }
            self.replaced.borrow_mut().push(url.clone());
            Ok(())
        }
    }

    #[test]
    fn history_state_wins_over_global_and_query() {
        for key in [HISTORY_STATE_KEY, HISTORY_STATE_KEY_FALLBACK] {
            let env = FakeEnvironment {
                history_state: Some(json!({ key: "from-history" })),
                page_global: Some("from-global".to_string()),
                url: Some("https://app.example.com/chat/workflow-123?token=from-query".to_string()),
                ..FakeEnvironment::default()
            };
            let store = PublishTokenStore::new();

            let resolution = store.ensure(&env);

            assert_eq!(resolution.token.as_deref(), Some("from-history"));
            assert_eq!(resolution.source, Some(TokenSource::HistoryState));
            assert_eq!(resolution.scrub, UrlScrub::NotNeeded);
            assert_eq!(env.replace_count(), 0, "URL must not be touched");
        }
    }

    #[test]
    fn page_global_wins_over_query() {
        let env = FakeEnvironment {
            page_global: Some("from-global".to_string()),
            url: Some("https://app.example.com/chat?token=from-query".to_string()),
            ..FakeEnvironment::default()
        };
        let store = PublishTokenStore::new();

        let resolution = store.ensure(&env);

        assert_eq!(resolution.token.as_deref(), Some("from-global"));
        assert_eq!(resolution.source, Some(TokenSource::PageGlobal));
        assert_eq!(env.replace_count(), 0);
    }

    #[test]
    fn query_token_is_consumed_and_scrubbed_in_place() {
        let env =
            FakeEnvironment::with_url("https://app.example.com/chat/workflow-123?token=secret&foo=bar");
        let store = PublishTokenStore::new();

        let resolution = store.ensure(&env);

        assert_eq!(resolution.token.as_deref(), Some("secret"));
        assert_eq!(resolution.source, Some(TokenSource::QueryString));
        assert_eq!(
            resolution.scrub,
            UrlScrub::Replaced {
                search: "?foo=bar".to_string()
            }
        );

        let replaced = env.last_replaced().expect("address replaced");
        assert_eq!(replaced.path(), "/chat/workflow-123");
        assert_eq!(replaced.query(), Some("foo=bar"));
    }

    #[test]
    fn scrub_leaves_other_segments_byte_identical() {
        let env = FakeEnvironment::with_url(
            "https://app.example.com/chat?a&token=secret&b%20c=1+2&flag",
        );
        let store = PublishTokenStore::new();

        let resolution = store.ensure(&env);

        assert_eq!(resolution.token.as_deref(), Some("secret"));
        assert_eq!(
            resolution.scrub,
            UrlScrub::Replaced {
                search: "?a&b%20c=1+2&flag".to_string()
            }
        );
        let replaced = env.last_replaced().expect("address replaced");
        assert_eq!(replaced.query(), Some("a&b%20c=1+2&flag"));
    }

    #[test]
    fn scrub_preserves_fragment_and_drops_empty_query() {
        let env = FakeEnvironment::with_url("https://app.example.com/chat?token=secret#composer");
        let store = PublishTokenStore::new();

        let resolution = store.ensure(&env);

        assert_eq!(resolution.token.as_deref(), Some("secret"));
        assert_eq!(
            resolution.scrub,
            UrlScrub::Replaced {
                search: String::new()
            }
        );
        let replaced = env.last_replaced().expect("address replaced");
        assert_eq!(replaced.query(), None);
        assert_eq!(replaced.fragment(), Some("composer"));
    }

    #[test]
    fn second_ensure_returns_cache_without_url_mutation() {
        let env = FakeEnvironment::with_url("https://app.example.com/chat?token=secret");
        let store = PublishTokenStore::new();

        let first = store.ensure(&env);
        assert_eq!(first.token.as_deref(), Some("secret"));
        assert_eq!(store.get().as_deref(), Some("secret"));
        assert_eq!(env.replace_count(), 1);

        let second = store.ensure(&env);
        assert_eq!(second.token.as_deref(), Some("secret"));
        assert_eq!(second.source, Some(TokenSource::Cache));
        assert_eq!(env.replace_count(), 1, "no further mutation");
    }

    #[test]
    fn replace_failure_is_tolerated_and_token_kept() {
        let env = FakeEnvironment {
            url: Some("https://app.example.com/chat?token=secret".to_string()),
            reject_replace: true,
            ..FakeEnvironment::default()
        };
        let store = PublishTokenStore::new();

        let resolution = store.ensure(&env);

        assert_eq!(resolution.token.as_deref(), Some("secret"));
        assert_eq!(
            resolution.scrub,
            UrlScrub::Failed {
                reason: "history access denied".to_string()
            }
        );
        assert_eq!(store.get().as_deref(), Some("secret"));
    }

    #[test]
    fn blank_values_are_absent_at_every_source() {
        let env = FakeEnvironment {
            history_state: Some(json!({ HISTORY_STATE_KEY: "   " })),
            page_global: Some(String::new()),
            url: Some("https://app.example.com/chat?token=%20%20".to_string()),
            ..FakeEnvironment::default()
        };
        let store = PublishTokenStore::new();

        let resolution = store.ensure(&env);

        assert_eq!(resolution.token, None);
        assert_eq!(resolution.source, None);
        assert_eq!(env.replace_count(), 0, "blank token is not consumed");
        assert_eq!(store.get(), None);
    }

    #[test]
    fn history_state_without_recognized_keys_falls_through() {
        let env = FakeEnvironment {
            history_state: Some(json!({ "unrelated": "value" })),
            page_global: Some("from-global".to_string()),
            ..FakeEnvironment::default()
        };
        let store = PublishTokenStore::new();

        let resolution = store.ensure(&env);
        assert_eq!(resolution.token.as_deref(), Some("from-global"));
        assert_eq!(resolution.source, Some(TokenSource::PageGlobal));
    }

    #[test]
    fn set_normalizes_and_clear_allows_re_resolution() {
        let store = PublishTokenStore::new();
        store.set(Some("  padded  "));
        assert_eq!(store.get().as_deref(), Some("padded"));

        store.set(Some("   "));
        assert_eq!(store.get(), None);

        store.set(Some("value"));
        store.clear();
        assert_eq!(store.get(), None);

        let env = FakeEnvironment {
            page_global: Some("fresh".to_string()),
            ..FakeEnvironment::default()
        };
        let resolution = store.ensure(&env);
        assert_eq!(resolution.token.as_deref(), Some("fresh"));
        assert_eq!(resolution.source, Some(TokenSource::PageGlobal));
    }

    #[test]
    fn clones_share_the_same_cell() {
        let store = PublishTokenStore::new();
        let shared = store.clone();
        store.set(Some("shared-token"));
        assert_eq!(shared.get().as_deref(), Some("shared-token"));
    }

    #[test]
    fn restricted_environment_resolves_to_absent() {
        let env = FakeEnvironment::default();
        let store = PublishTokenStore::new();

        let resolution = store.ensure(&env);
        assert_eq!(resolution, TokenResolution::absent());
    }
}
