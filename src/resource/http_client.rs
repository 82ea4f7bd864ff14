//! Named HTTP clients.
//!
//! Clients are built on first use from `[http_clients.<name>]` sections of
//! the configuration. The `"default"` client, when configured, is made
//! eagerly by [`provider`] so consumers can depend on it directly.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::AppConfig;
use crate::lifecycle::{Provided, Provider};
use crate::resource::factory::{Factory, Pair};
use crate::resource::keyed::{Instrument, Interceptor, KeyedFactoryBuilder};
use crate::BoxError;

/// Name of the client made eagerly at provisioning.
pub const DEFAULT_CLIENT: &str = "default";

const FAMILY: &str = "http_client";

/// Per-name client options.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpClientOptions {
    /// Base URL relative paths are joined onto.
    pub base_url: Option<String>,

    /// Whole-request timeout in milliseconds.
    pub timeout_ms: u64,

    pub user_agent: Option<String>,

    /// Headers sent with every request.
    pub default_headers: HashMap<String, String>,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: 10_000,
            user_agent: None,
            default_headers: HashMap::new(),
        }
    }
}

/// A configured `reqwest` client and the name it was made under.
#[derive(Debug, Clone)]
pub struct HttpClient {
    name: String,
    base_url: Option<Url>,
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn connect(name: &str, options: &HttpClientOptions) -> Result<Self, BoxError> {
        let base_url = options.base_url.as_deref().map(Url::parse).transpose()?;

        let mut headers = HeaderMap::new();
        for (key, value) in &options.default_headers {
            headers.insert(HeaderName::from_bytes(key.as_bytes())?, HeaderValue::from_str(value)?);
        }

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_millis(options.timeout_ms))
            .default_headers(headers);
        if let Some(agent) = &options.user_agent {
            builder = builder.user_agent(agent.clone());
        }

        Ok(Self {
            name: name.to_string(),
            base_url,
            inner: builder.build()?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    /// Resolve `path` against the base URL, or parse it as absolute.
    pub fn url(&self, path: &str) -> Result<Url, BoxError> {
        match &self.base_url {
            Some(base) => Ok(base.join(path)?),
            None => Ok(Url::parse(path)?),
        }
    }

    pub fn get(&self, path: &str) -> Result<reqwest::RequestBuilder, BoxError> {
        Ok(self.inner.get(self.url(path)?))
    }

    pub fn post(&self, path: &str) -> Result<reqwest::RequestBuilder, BoxError> {
        Ok(self.inner.post(self.url(path)?))
    }
}

/// Factory of named [`HttpClient`]s.
pub type HttpClientFactory = Factory<HttpClient>;

/// Adjusts options right before a client is built.
#[derive(Clone)]
pub struct HttpClientInterceptor(pub Interceptor<HttpClientOptions>);

/// Wraps every client after it is built.
#[derive(Clone)]
pub struct HttpClientInstrument(pub Instrument<HttpClient>);

/// The eagerly made `"default"` client, if it could be made.
#[derive(Debug, Clone)]
pub struct DefaultHttpClient(pub Option<HttpClient>);

/// Build the client factory over `configs`.
pub fn factory(
    configs: HashMap<String, HttpClientOptions>,
    interceptor: Option<HttpClientInterceptor>,
    instrument: Option<HttpClientInstrument>,
) -> HttpClientFactory {
    KeyedFactoryBuilder::new(FAMILY, configs)
        .interceptor(interceptor.map(|i| i.0))
        .instrument(instrument.map(|i| i.0))
        .build(|name, options: HttpClientOptions| async move {
            let client = HttpClient::connect(&name, &options)?;
            tracing::debug!(client = %name, base_url = ?options.base_url, "HTTP client ready");
            Ok(Pair::without_closer(client))
        })
}

/// Provider for the client family.
///
/// Reads [`AppConfig`], optionally an [`HttpClientInterceptor`] and an
/// [`HttpClientInstrument`]; provides [`HttpClientFactory`] and
/// [`DefaultHttpClient`]. The factory is closed on shutdown.
pub fn provider() -> Provider {
    Provider::new(FAMILY)
        .requires::<AppConfig>()
        .optional::<HttpClientInterceptor>()
        .optional::<HttpClientInstrument>()
        .provides::<HttpClientFactory>()
        .provides::<DefaultHttpClient>()
        .build(|inputs| async move {
            let config = inputs.required::<AppConfig>()?;
            let interceptor = inputs.optional::<HttpClientInterceptor>().map(|i| (*i).clone());
            let instrument = inputs.optional::<HttpClientInstrument>().map(|i| (*i).clone());

            let factory = factory(config.http_clients.clone(), interceptor, instrument);
            let default = match factory.make(DEFAULT_CLIENT).await {
                Ok(client) => Some(client),
                Err(e) if e.is_configuration() => None,
                Err(e) => {
                    tracing::warn!(error = %e, "Default HTTP client unavailable");
                    None
                }
            };

            Ok(Provided::new()
                .with(DefaultHttpClient(default))
                .with(factory.clone())
                .closer(factory.closer()))
        })
}

impl std::fmt::Debug for HttpClientInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HttpClientInterceptor")
    }
}

impl std::fmt::Debug for HttpClientInstrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HttpClientInstrument")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::OrchestratorBuilder;
    use crate::resource::Maker;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn configs() -> HashMap<String, HttpClientOptions> {
        HashMap::from([(
            "billing".to_string(),
            HttpClientOptions {
                base_url: Some("http://billing.internal/api/".to_string()),
                ..HttpClientOptions::default()
            },
        )])
    }

    #[tokio::test]
    async fn test_make_resolves_relative_urls() {
        let factory = factory(configs(), None, None);
        let client = factory.make("billing").await.unwrap();

        assert_eq!(client.name(), "billing");
        assert_eq!(
            client.url("invoices/7").unwrap().as_str(),
            "http://billing.internal/api/invoices/7"
        );
        assert!(factory.make("ghost").await.unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn test_hooks_apply_per_construction() {
        let interceptor = HttpClientInterceptor(Arc::new(|_: &str, opts: &mut HttpClientOptions| {
            opts.base_url = Some("http://override.internal/".to_string());
        }));
        let wrapped = Arc::new(AtomicUsize::new(0));
        let w = wrapped.clone();
        let instrument = HttpClientInstrument(Arc::new(move |_: &str, client: HttpClient| {
            w.fetch_add(1, Ordering::SeqCst);
            client
        }));

        let factory = factory(configs(), Some(interceptor), Some(instrument));
        let maker: &dyn Maker<HttpClient> = &factory;
        let client = maker.make("billing").await.unwrap();
        maker.make("billing").await.unwrap();

        assert_eq!(client.base_url().unwrap().as_str(), "http://override.internal/");
        assert_eq!(wrapped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bad_options_fail_construction() {
        let configs = HashMap::from([(
            "broken".to_string(),
            HttpClientOptions {
                base_url: Some("::not a url::".to_string()),
                ..HttpClientOptions::default()
            },
        )]);
        let err = factory(configs, None, None).make("broken").await.unwrap_err();
        assert!(!err.is_configuration());
        assert_eq!(err.key(), "broken");
    }

    #[tokio::test]
    async fn test_provider_without_default_client() {
        let mut config = AppConfig::default();
        config.http_clients = configs();

        let orchestrator = OrchestratorBuilder::new()
            .handle_signals(false)
            .supply(config)
            .provide(provider())
            .build()
            .unwrap();

        let (default, made) = orchestrator
            .invoke(|container| async move {
                let default = container.get::<DefaultHttpClient>().unwrap();
                let factory = container.get::<HttpClientFactory>().unwrap();
                let made = factory.make("billing").await.is_ok();
                (default.0.is_none(), made)
            })
            .await
            .unwrap();

        assert!(default);
        assert!(made);
    }
}
