//! Exchange implementations - Pluggable exchange adapters

pub mod bitfinex;
pub mod bittrex;
mod credentials;

pub use bitfinex::Bitfinex;
pub use bittrex::Bittrex;

use crate::core::{Error, Exchange, ExchangeConfig, Result};

/// Names accepted by [`connect`]
pub const SUPPORTED: &[&str] = &["bitfinex", "bittrex"];

/// Builds the adapter for `name` (case-insensitive); authenticates right away
/// when the config carries credentials.
pub async fn connect(name: &str, config: &ExchangeConfig) -> Result<Box<dyn Exchange>> {
    let exchange: Box<dyn Exchange> = match name.to_ascii_lowercase().as_str() {
        "bitfinex" => Box::new(Bitfinex::new(config)?),
        "bittrex" => Box::new(Bittrex::new(config)?),
        other => {
            return Err(Error::Config(format!(
                "unknown exchange {:?} (supported: {})",
                other,
                SUPPORTED.join(", ")
            )));
        }
    };

    if let Some((key, secret)) = config.credentials()? {
        exchange.authenticate(key, secret).await?;
    }
    Ok(exchange)
}

#[cfg(test)]
pub(crate) mod test_support {
    use parking_lot::Mutex;
    use std::io::Write;
    use std::sync::Arc;

    /// Formatted log output collected while the guard is alive
    #[derive(Clone, Default)]
    pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Routes this thread's `tracing` events into a buffer
    pub fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        (buffer, tracing::subscriber::set_default(subscriber))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn test_connect_by_name() {
        let config = ExchangeConfig::new("bitfinex");
        let exchange = connect("BITFINEX", &config).await.unwrap();
        assert_eq!(exchange.name(), "Bitfinex");
        assert!(!exchange.is_authenticated());

        let exchange = connect("bittrex", &config).await.unwrap();
        assert_eq!(exchange.name(), "Bittrex");
    }

    #[tokio::test]
    async fn test_connect_unknown() {
        let err = connect("mtgox", &ExchangeConfig::new("mtgox")).await.err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_connect_with_credentials_authenticates() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/balances")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let config = ExchangeConfig {
            api_key: Some("key".to_string()),
            api_secret: Some("secret".to_string()),
            base_url: Some(server.url()),
            ..ExchangeConfig::new("bitfinex")
        };
        let exchange = connect("bitfinex", &config).await.unwrap();
        assert!(exchange.is_authenticated());
        mock.assert_async().await;
    }
}
