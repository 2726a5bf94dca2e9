//! Provider failover — serial retry across an ordered client list.
//!
//! A transient start error retries the same client up to `max_retries` times
//! with linearly spaced delays; a permanent error advances to the next
//! client. Mid-stream errors are never retried here — they surface to the
//! engine, which owns that recovery path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use ariadne_core::{ChatRequest, ProviderClient, ProviderError, StreamChunk};

pub struct FailoverClient {
    clients: Vec<Arc<dyn ProviderClient>>,
    max_retries: u32,
    retry_delay: Duration,
}

impl FailoverClient {
    pub fn new(clients: Vec<Arc<dyn ProviderClient>>, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            clients,
            max_retries,
            retry_delay,
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl ProviderClient for FailoverClient {
    fn name(&self) -> &str {
        "failover"
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderError> {
        let mut last_error = ProviderError::NotConfigured("no providers in failover chain".into());
        let attempts = self.max_retries.max(1);

        for (i, client) in self.clients.iter().enumerate() {
            if i > 0 {
                info!(provider = client.name(), position = i + 1, "Trying fallback provider");
            }

            for attempt in 1..=attempts {
                if attempt > 1 {
                    tokio::time::sleep(self.retry_delay * (attempt - 1)).await;
                }

                match client.stream_chat(request.clone()).await {
                    Ok(rx) => return Ok(rx),
                    Err(e) => {
                        let transient = client.is_transient_error(&e);
                        warn!(
                            provider = client.name(),
                            attempt,
                            max = attempts,
                            transient,
                            error = %e,
                            "Provider start failed"
                        );
                        last_error = e;
                        if transient && attempt < attempts {
                            continue;
                        }
                        break;
                    }
                }
            }
        }

        Err(ProviderError::Exhausted {
            last: Box::new(last_error),
        })
    }

    /// The aggregate failing means every child already failed; the engine
    /// should not re-drive the whole chain.
    fn is_transient_error(&self, _err: &ProviderError) -> bool {
        false
    }

    fn set_debug(&self, enabled: bool) {
        for client in &self.clients {
            client.set_debug(enabled);
        }
    }
}
