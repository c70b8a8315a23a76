//! Forwards inbound envelopes to the configured webhook.
//!
//! Delivery is fire-and-forget and at-most-once: each POST runs on its own task,
//! failures are logged, nothing is retried.

use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};

use crate::{domain::InboundEnvelope, errors::Error, webhook::WebhookStore, Result};

pub struct InboundRelay {
    webhook: Arc<dyn WebhookStore>,
    http: reqwest::Client,
}

impl InboundRelay {
    pub fn new(webhook: Arc<dyn WebhookStore>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("webhook http client: {e}")))?;
        Ok(Self { webhook, http })
    }

    /// Consume envelopes until the connection side hangs up.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundEnvelope>) {
        while let Some(envelope) = inbound.recv().await {
            self.relay(envelope);
        }
        tracing::debug!("inbound channel closed; relay stopped");
    }

    /// Start delivery of one envelope. Returns `None` when no webhook is set.
    pub fn relay(&self, envelope: InboundEnvelope) -> Option<JoinHandle<()>> {
        let Some(url) = self.webhook.get() else {
            tracing::debug!("no webhook configured; inbound message dropped");
            return None;
        };

        let http = self.http.clone();
        Some(tokio::spawn(async move {
            match deliver(&http, &url, &envelope).await {
                Ok(()) => tracing::debug!(url = %url, "inbound message relayed"),
                Err(e) => tracing::warn!(url = %url, error = %e, "webhook delivery failed"),
            }
        }))
    }
}

/// POST one envelope as the JSON body. Non-2xx responses are errors.
pub async fn deliver(http: &reqwest::Client, url: &str, envelope: &InboundEnvelope) -> Result<()> {
    let resp = http
        .post(url)
        .json(envelope)
        .send()
        .await
        .map_err(|e| Error::External(format!("webhook request error: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(Error::External(format!("webhook returned {status}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::InMemoryWebhookStore;
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn relay_with(url: Option<String>) -> (InboundRelay, Arc<InMemoryWebhookStore>) {
        let store = Arc::new(InMemoryWebhookStore::new(url));
        let relay = InboundRelay::new(store.clone(), Duration::from_secs(2)).unwrap();
        (relay, store)
    }

    #[tokio::test]
    async fn no_webhook_means_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (relay, _) = relay_with(None);
        assert!(relay.relay(json!({"key": {"id": "1"}})).is_none());
    }

    #[tokio::test]
    async fn each_message_is_posted_once_verbatim() {
        let server = MockServer::start().await;
        let envelope = json!({
            "key": {"remoteJid": "5511999999999@s.whatsapp.net", "id": "ABC"},
            "message": {"conversation": "oi"}
        });
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(envelope.clone()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (relay, _) = relay_with(Some(format!("{}/hook", server.uri())));
        relay.relay(envelope).unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn failed_delivery_does_not_block_the_next_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let (relay, _) = relay_with(Some(format!("{}/hook", server.uri())));
        relay.relay(json!({"n": 1})).unwrap().await.unwrap();
        relay.relay(json!({"n": 2})).unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = deliver(
            &reqwest::Client::new(),
            &format!("{}/missing", server.uri()),
            &json!({}),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn unreachable_webhook_is_swallowed() {
        let (relay, _) = relay_with(Some("http://127.0.0.1:9/hook".to_string()));
        // The task finishes normally; the error only reaches the log.
        relay.relay(json!({"n": 1})).unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn relay_follows_the_latest_webhook() {
        let first = MockServer::start().await;
        let second = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&first)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&second)
            .await;

        let (relay, store) = relay_with(Some(first.uri()));
        relay.relay(json!({"n": 1})).unwrap().await.unwrap();
        store.set(second.uri());
        relay.relay(json!({"n": 2})).unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn run_drains_the_channel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let (relay, _) = relay_with(Some(server.uri()));
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(Arc::new(relay).run(rx));
        for n in 0..3 {
            tx.send(json!({ "n": n })).await.unwrap();
        }
        drop(tx);
        task.await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let seen = server.received_requests().await.unwrap_or_default().len();
                if seen == 3 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
