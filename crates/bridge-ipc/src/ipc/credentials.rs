//! Auth token and session stamping for outbound requests.

use parking_lot::RwLock;
use serde_json::{Map, Value};

/// Source of the credentials attached to outbound requests
pub trait CredentialProvider: Send + Sync {
    /// Current auth token, if signed in
    fn token(&self) -> Option<String>;

    /// Current session id, if any
    fn session_id(&self) -> Option<String> {
        None
    }
}

/// Credentials set and cleared by the embedding application
#[derive(Debug, Default)]
pub struct StaticCredentials {
    token: RwLock<Option<String>>,
    session_id: RwLock<Option<String>>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let creds = Self::default();
        creds.set_token(token);
        creds
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn set_session_id(&self, session_id: impl Into<String>) {
        *self.session_id.write() = Some(session_id.into());
    }

    /// Forget both token and session
    pub fn clear(&self) {
        *self.token.write() = None;
        *self.session_id.write() = None;
    }
}

impl CredentialProvider for StaticCredentials {
    fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }
}

/// Merge the token into params.
///
/// Object params gain a `token` field; anything else is wrapped as
/// `{ token, params }`.
pub fn stamp_token(params: Option<Value>, token: Option<String>) -> Option<Value> {
    let Some(token) = token else {
        return params;
    };
    match params {
        Some(Value::Object(mut map)) => {
            map.insert("token".to_string(), Value::String(token));
            Some(Value::Object(map))
        }
        Some(other) => {
            let mut map = Map::new();
            map.insert("token".to_string(), Value::String(token));
            map.insert("params".to_string(), other);
            Some(Value::Object(map))
        }
        None => {
            let mut map = Map::new();
            map.insert("token".to_string(), Value::String(token));
            Some(Value::Object(map))
        }
    }
}

/// Build request meta carrying the session id, if any
pub fn session_meta(session_id: Option<String>) -> Option<Map<String, Value>> {
    session_id.map(|sid| {
        let mut meta = Map::new();
        meta.insert("session_id".to_string(), Value::String(sid));
        meta
    })
}
