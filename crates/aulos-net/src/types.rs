use std::collections::HashMap;
use std::time::Duration;

/// User agent sent with every transfer unless overridden via [`NetOptions`].
pub const DEFAULT_USER_AGENT: &str = "aulos HttpDataStream";

/// Request headers keyed by name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Headers {
    inner: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<HashMap<String, String>> for Headers {
    fn from(map: HashMap<String, String>) -> Self {
        Self { inner: map }
    }
}

#[derive(Clone, Debug)]
pub struct NetOptions {
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Whole-request budget. `None` because a media transfer legitimately
    /// lives as long as the track it carries.
    pub request_timeout: Option<Duration>,
    /// Max idle time between body chunks. This is also the bound on how long
    /// an interrupted transfer can linger on a stalled connection.
    pub read_timeout: Option<Duration>,
    pub verify_tls: bool,
    pub max_redirects: usize,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            read_timeout: Some(Duration::from_secs(30)),
            verify_tls: true,
            max_redirects: 10,
        }
    }
}
