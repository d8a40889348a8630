//! Credential state shared by the adapters

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::{Error, Result};
use crate::signer::{Digest, HmacSigner};

/// Staged credentials plus the flag set once the exchange accepted them
pub(crate) struct Credentials {
    digest: Digest,
    signer: RwLock<Option<HmacSigner>>,
    authenticated: AtomicBool,
}

impl Credentials {
    pub fn new(digest: Digest) -> Self {
        Self {
            digest,
            signer: RwLock::new(None),
            authenticated: AtomicBool::new(false),
        }
    }

    /// Installs a signer ahead of the validation request.
    ///
    /// The write lock is held across the check, so only one of several
    /// concurrent callers gets to stage.
    pub fn stage(&self, api_key: &str, api_secret: &str) -> Result<()> {
        if api_key.is_empty() || api_secret.is_empty() {
            return Err(Error::Auth("API key and secret must be non-empty".to_string()));
        }
        let mut signer = self.signer.write();
        if self.is_authenticated() {
            return Err(Error::Auth("already authenticated".to_string()));
        }
        if signer.is_some() {
            return Err(Error::Auth("authentication already in progress".to_string()));
        }
        *signer = Some(HmacSigner::new(api_key, api_secret, self.digest));
        Ok(())
    }

    pub fn confirm(&self) {
        self.authenticated.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.authenticated.store(false, Ordering::Release);
        *self.signer.write() = None;
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn require(&self) -> Result<()> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(Error::Auth("client not authenticated".to_string()))
        }
    }

    /// Snapshot of the signer; the lock is released before any I/O
    pub fn signer(&self) -> Result<HmacSigner> {
        self.signer
            .read()
            .clone()
            .ok_or_else(|| Error::Auth("no credentials".to_string()))
    }
}

/// Runs `check` with staged credentials, keeping them only if it succeeds
pub(crate) async fn validate<F, T>(creds: &Credentials, exchange: &str, check: F) -> Result<()>
where
    F: std::future::Future<Output = Result<T>>,
{
    match check.await {
        Ok(_) => {
            creds.confirm();
            tracing::info!("Authenticated with {}", exchange);
            Ok(())
        }
        Err(e) => {
            creds.clear();
            if e.is_rejection() {
                tracing::warn!("{} rejected credentials: {}", exchange, e);
                Err(Error::Auth("invalid credentials".to_string()))
            } else {
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_before_confirm() {
        let creds = Credentials::new(Digest::Sha384);
        assert!(creds.require().is_err());

        creds.stage("key", "secret").unwrap();
        assert!(creds.signer().is_ok());
        assert!(creds.require().is_err());

        creds.confirm();
        assert!(creds.require().is_ok());
        assert!(matches!(creds.stage("key", "secret"), Err(Error::Auth(_))));

        creds.clear();
        assert!(!creds.is_authenticated());
        assert!(creds.signer().is_err());
    }

    #[test]
    fn test_second_stage_rejected_while_validating() {
        let creds = Credentials::new(Digest::Sha384);
        creds.stage("first", "secret").unwrap();

        match creds.stage("second", "other") {
            Err(Error::Auth(msg)) => assert_eq!(msg, "authentication already in progress"),
            other => panic!("expected Auth error, got {:?}", other),
        }
        assert_eq!(creds.signer().unwrap().key_id(), "first");

        creds.clear();
        assert!(creds.stage("second", "other").is_ok());
    }

    #[test]
    fn test_empty_credentials_rejected() {
        let creds = Credentials::new(Digest::Sha512);
        assert!(creds.stage("", "secret").is_err());
        assert!(creds.stage("key", "").is_err());
    }

    #[tokio::test]
    async fn test_validate_maps_rejection() {
        let creds = Credentials::new(Digest::Sha384);
        creds.stage("key", "bad").unwrap();

        let result = validate(&creds, "test", async {
            Err::<(), _>(Error::Exchange("Invalid API key".to_string()))
        })
        .await;

        match result {
            Err(Error::Auth(msg)) => assert_eq!(msg, "invalid credentials"),
            other => panic!("expected Auth error, got {:?}", other),
        }
        assert!(creds.signer().is_err());
    }

    #[tokio::test]
    async fn test_validate_passes_through_other_errors() {
        let creds = Credentials::new(Digest::Sha384);
        creds.stage("key", "secret").unwrap();

        let result = validate(&creds, "test", async {
            Err::<(), _>(Error::Http { status: 502, body: String::new() })
        })
        .await;

        assert!(matches!(result, Err(Error::Http { status: 502, .. })));
        assert!(!creds.is_authenticated());
    }
}
