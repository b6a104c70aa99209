use futures::{future::BoxFuture, FutureExt, StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, RANGE};

use super::{RequestOptions, Transport, TransportResponse};
use crate::{error::TransportError, util::http::HttpClient};

/// [`Transport`] backed by reqwest.
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: HttpClient,
}

impl HttpTransport {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }
}

impl Transport for HttpTransport {
    fn fetch(
        &self,
        options: &RequestOptions,
    ) -> BoxFuture<'static, Result<TransportResponse, TransportError>> {
        let mut request = self
            .client
            .get(options.uri.clone())
            .header(ACCEPT, "*/*")
            .headers(options.headers.clone());
        if let Some(byte_range) = &options.byte_range {
            request = request.header(RANGE, byte_range.to_http_range());
        }

        async move {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                if let Ok(body) = response.text().await {
                    tracing::warn!("Error body: {body}");
                }
                return Err(TransportError::Status(status.as_u16()));
            }

            Ok(TransportResponse {
                status: status.as_u16(),
                body: response.bytes_stream().map_err(TransportError::from).boxed(),
            })
        }
        .boxed()
    }
}
