//! One-time crypto readiness barrier.
//!
//! Every store and cipher entry point awaits [`CryptoReady::wait`] before
//! touching key material. The first caller runs a self test (RNG draw plus an
//! AEAD round trip and tamper check); concurrent callers wait on the same
//! run. A failed self test is not latched, so the next call retries.

use std::sync::Arc;

use tokio::sync::OnceCell;

use ircx_core::{E2eeError, E2eeResult};
use ircx_crypto::{aead, generate_key, Aad};

#[derive(Debug, Clone, Default)]
pub struct CryptoReady {
    cell: Arc<OnceCell<()>>,
}

impl CryptoReady {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the crypto backend has passed its self test.
    pub async fn wait(&self) -> E2eeResult<()> {
        self.cell
            .get_or_try_init(|| async {
                self_test()?;
                tracing::debug!("crypto self test passed");
                Ok::<(), E2eeError>(())
            })
            .await
            .map(|_| ())
    }

    pub fn is_ready(&self) -> bool {
        self.cell.initialized()
    }
}

fn self_test() -> E2eeResult<()> {
    let not_ready = |what: &str| E2eeError::LibraryNotReady(format!("self test: {what}"));

    let key = generate_key();
    if key.as_bytes().iter().all(|b| *b == 0) {
        return Err(not_ready("RNG returned zeros"));
    }

    let aad = Aad::label("self-test");
    let probe = b"ircx self test";
    let mut frame = aead::seal_frame(&key, probe, &aad).map_err(|_| not_ready("seal"))?;
    let opened = aead::open_frame(&key, &frame, &aad).map_err(|_| not_ready("open"))?;
    if opened != probe {
        return Err(not_ready("round trip mismatch"));
    }

    let last = frame.len() - 1;
    frame[last] ^= 0x01;
    if aead::open_frame(&key, &frame, &aad).is_ok() {
        return Err(not_ready("tampered frame accepted"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_latches() {
        let ready = CryptoReady::new();
        assert!(!ready.is_ready());
        ready.wait().await.unwrap();
        assert!(ready.is_ready());

        let clone = ready.clone();
        assert!(clone.is_ready(), "clones share the barrier");
    }

    #[tokio::test]
    async fn test_concurrent_waiters() {
        let ready = CryptoReady::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = ready.clone();
                tokio::spawn(async move { r.wait().await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(ready.is_ready());
    }
}
