use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::debug;
use uuid::Uuid;

use crate::workflow::Session;

pub const COOKIE_NAME: &str = "facecap_session";

pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

struct Entry {
    session: SessionHandle,
    last_seen: Instant,
}

/// Per-browser workflow state, keyed by the session cookie.
pub struct SessionStore {
    entries: Mutex<HashMap<Uuid, Entry>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Look up the session for `id`, or start a fresh one from `fresh`.
    /// Returns the id to use, the session and whether it was just created.
    pub fn resolve(
        &self,
        id: Option<Uuid>,
        fresh: impl FnOnce() -> Session,
    ) -> (Uuid, SessionHandle, bool) {
        self.resolve_at(id, fresh, Instant::now())
    }

    fn resolve_at(
        &self,
        id: Option<Uuid>,
        fresh: impl FnOnce() -> Session,
        now: Instant,
    ) -> (Uuid, SessionHandle, bool) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(id) = id {
            if let Some(entry) = entries.get_mut(&id) {
                if now.duration_since(entry.last_seen) <= self.ttl {
                    entry.last_seen = now;
                    return (id, Arc::clone(&entry.session), false);
                }
            }
        }

        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, e| now.duration_since(e.last_seen) <= ttl);
        if entries.len() < before {
            debug!(expired = before - entries.len(), "purged idle sessions");
        }

        let id = Uuid::new_v4();
        let session = Arc::new(tokio::sync::Mutex::new(fresh()));
        entries.insert(
            id,
            Entry {
                session: Arc::clone(&session),
                last_seen: now,
            },
        );
        debug!(%id, live = entries.len(), "new session");
        (id, session, true)
    }

    /// An existing, unexpired session. Never creates one.
    pub fn get(&self, id: Uuid) -> Option<SessionHandle> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let entry = entries.get_mut(&id)?;
        if now.duration_since(entry.last_seen) > self.ttl {
            return None;
        }
        entry.last_seen = now;
        Some(Arc::clone(&entry.session))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

/// Session id from the request cookies, if present and well-formed.
pub fn session_id(jar: &CookieJar) -> Option<Uuid> {
    jar.get(COOKIE_NAME)
        .and_then(|c| Uuid::parse_str(c.value()).ok())
}

pub fn session_cookie(id: Uuid) -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::COOKIE;
    use axum::http::{HeaderMap, HeaderValue};
    use facecap_common::params::DetectionParams;

    fn fresh() -> Session {
        Session::new(DetectionParams::default())
    }

    #[test]
    fn unknown_id_creates_session() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (id, _, created) = store.resolve(Some(Uuid::new_v4()), fresh);
        assert!(created);
        let (again, _, created) = store.resolve(Some(id), fresh);
        assert_eq!(again, id);
        assert!(!created);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn get_never_creates() {
        let store = SessionStore::new(Duration::from_secs(60));
        assert!(store.get(Uuid::new_v4()).is_none());
        assert_eq!(store.len(), 0);
        let (id, session, _) = store.resolve(None, fresh);
        assert!(Arc::ptr_eq(&store.get(id).unwrap(), &session));
    }

    #[test]
    fn sessions_are_isolated() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (a, sa, _) = store.resolve(None, fresh);
        let (b, sb, _) = store.resolve(None, fresh);
        assert_ne!(a, b);
        assert!(!Arc::ptr_eq(&sa, &sb));
    }

    #[test]
    fn idle_sessions_expire() {
        let store = SessionStore::new(Duration::from_secs(10));
        let start = Instant::now();
        let (old, _, _) = store.resolve_at(None, fresh, start);
        let later = start + Duration::from_secs(11);
        let (id, _, created) = store.resolve_at(Some(old), fresh, later);
        assert!(created);
        assert_ne!(id, old);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn cookie_parsing() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {COOKIE_NAME}={id}; x=1")).unwrap(),
        );
        assert_eq!(session_id(&CookieJar::from_headers(&headers)), Some(id));

        let mut bad = HeaderMap::new();
        bad.insert(COOKIE, HeaderValue::from_static("facecap_session=not-a-uuid"));
        assert_eq!(session_id(&CookieJar::from_headers(&bad)), None);
        assert_eq!(session_id(&CookieJar::new()), None);
    }

    #[test]
    fn session_cookie_is_scoped_and_http_only() {
        let id = Uuid::new_v4();
        let cookie = session_cookie(id);
        assert_eq!(cookie.name(), COOKIE_NAME);
        assert_eq!(cookie.value(), id.to_string());
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    }
}
