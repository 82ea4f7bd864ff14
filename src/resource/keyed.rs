//! Factories built from per-key configuration.
//!
//! A resource family is described by a map of key -> options record. The
//! builder turns that map plus a connect function into a [`Factory`],
//! applying the optional interceptor and instrumentation hooks around every
//! construction.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::resource::error::ResourceError;
use crate::resource::factory::{Factory, Pair};
use crate::BoxError;

/// Amends a per-key options record right before the handle is constructed.
///
/// Useful for settings that cannot be written in a config file, such as
/// callbacks.
pub type Interceptor<C> = Arc<dyn Fn(&str, &mut C) + Send + Sync>;

/// Wraps a freshly constructed handle, e.g. to attach tracing.
pub type Instrument<T> = Arc<dyn Fn(&str, T) -> T + Send + Sync>;

/// Builder for a configuration-driven [`Factory`].
pub struct KeyedFactoryBuilder<C, T> {
    family: String,
    configs: HashMap<String, C>,
    interceptor: Option<Interceptor<C>>,
    instrument: Option<Instrument<T>>,
}

impl<C, T> KeyedFactoryBuilder<C, T>
where
    C: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new(family: impl Into<String>, configs: HashMap<String, C>) -> Self {
        Self {
            family: family.into(),
            configs,
            interceptor: None,
            instrument: None,
        }
    }

    pub fn interceptor(mut self, interceptor: impl Into<Option<Interceptor<C>>>) -> Self {
        self.interceptor = interceptor.into();
        self
    }

    pub fn instrument(mut self, instrument: impl Into<Option<Instrument<T>>>) -> Self {
        self.instrument = instrument.into();
        self
    }

    /// Finish the factory. `connect` turns a key and its (intercepted)
    /// options into a handle.
    pub fn build<F, Fut>(self, connect: F) -> Factory<T>
    where
        F: Fn(String, C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Pair<T>, BoxError>> + Send + 'static,
    {
        let configs = Arc::new(self.configs);
        let connect = Arc::new(connect);
        let interceptor = self.interceptor;
        let instrument = self.instrument;
        let family = self.family.clone();

        Factory::new(self.family, move |key: String| {
            let configs = configs.clone();
            let connect = connect.clone();
            let interceptor = interceptor.clone();
            let instrument = instrument.clone();
            let family = family.clone();

            async move {
                let Some(mut options) = configs.get(&key).cloned() else {
                    return Err(ResourceError::Configuration { family, key });
                };
                if let Some(intercept) = &interceptor {
                    intercept(&key, &mut options);
                }

                let pair = connect(key.clone(), options)
                    .await
                    .map_err(|source| ResourceError::Construction {
                        family,
                        key: key.clone(),
                        source,
                    })?;

                Ok(match &instrument {
                    Some(wrap) => pair.map(|conn| wrap(&key, conn)),
                    None => pair,
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Options {
        addr: String,
        db: u8,
    }

    fn configs() -> HashMap<String, Options> {
        HashMap::from([(
            "default".to_string(),
            Options {
                addr: "127.0.0.1:6379".into(),
                db: 0,
            },
        )])
    }

    #[tokio::test]
    async fn test_unconfigured_key() {
        let factory = KeyedFactoryBuilder::new("cache", configs())
            .build(|_, opts: Options| async move { Ok(Pair::without_closer(opts.addr)) });

        let err = factory.make("ghost").await.unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(err.key(), "ghost");
        assert!(err.to_string().contains("ghost"));
        assert!(!factory.contains("ghost"));
        assert!(factory.is_empty());
    }

    #[tokio::test]
    async fn test_interceptor_mutates_options() {
        let interceptor: Interceptor<Options> = Arc::new(|key: &str, opts: &mut Options| {
            assert_eq!(key, "default");
            opts.db = 3;
        });
        let factory = KeyedFactoryBuilder::new("cache", configs())
            .interceptor(interceptor)
            .build(|_, opts: Options| async move { Ok(Pair::without_closer(opts.db)) });

        assert_eq!(factory.make("default").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_instrument_wraps_handle() {
        let instrument: Instrument<String> = Arc::new(|key: &str, conn: String| format!("{key}@{conn}"));
        let factory = KeyedFactoryBuilder::new("cache", configs())
            .instrument(instrument)
            .build(|_, opts: Options| async move { Ok(Pair::without_closer(opts.addr)) });

        assert_eq!(factory.make("default").await.unwrap(), "default@127.0.0.1:6379");
    }

    #[tokio::test]
    async fn test_connect_failure_is_construction_error() {
        let factory: Factory<String> = KeyedFactoryBuilder::new("cache", configs())
            .build(|_, _opts: Options| async move { Err::<Pair<String>, _>("unreachable".into()) });

        let err = factory.make("default").await.unwrap_err();
        assert!(matches!(err, ResourceError::Construction { .. }));
        assert!(!factory.contains("default"));
    }
}
