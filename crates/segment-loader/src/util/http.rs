use std::{ops::Deref, sync::Arc};

use reqwest::{Client, ClientBuilder, IntoUrl};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};

use crate::error::LoaderResult;

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    cookies_store: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> LoaderResult<Self> {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = builder.cookie_provider(cookies_store.clone()).build()?;

        Ok(Self {
            client,
            cookies_store,
        })
    }

    /// Parses `cookies` as `Set-Cookie` values scoped to `url`.
    ///
    /// Cookies that fail to parse are skipped.
    pub fn add_cookies(&self, cookies: Vec<String>, url: impl IntoUrl) -> LoaderResult<()> {
        let url = url.into_url()?;
        let Ok(mut lock) = self.cookies_store.lock() else {
            tracing::warn!("Cookie store poisoned, cookies ignored.");
            return Ok(());
        };
        for cookie in cookies {
            _ = lock.parse(&cookie, &url);
        }
        Ok(())
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = Client::builder()
            .cookie_provider(cookies_store.clone())
            .build()
            .unwrap_or_default();

        Self {
            client,
            cookies_store,
        }
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
