use std::{collections::BTreeMap, time::Duration};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::{
    error::{LoaderError, LoaderResult},
    request::DEFAULT_TIMEOUT,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderOptions {
    /// Per request timeout in seconds. `0` disables it.
    pub timeout_secs: u64,
    /// Forward media bytes while they are still arriving.
    pub progressive: bool,
    /// Extra headers sent with every request.
    pub headers: BTreeMap<String, String>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            progressive: false,
            headers: BTreeMap::new(),
        }
    }
}

impl LoaderOptions {
    pub fn from_toml_str(data: &str) -> LoaderResult<Self> {
        Ok(toml::from_str(data)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn header_map(&self) -> LoaderResult<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| LoaderError::InvalidHeader(name.clone()))?;
            let value =
                HeaderValue::from_str(value).map_err(|_| LoaderError::InvalidHeader(value.clone()))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}
