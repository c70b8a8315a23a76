//! Outbound sends requested through the control API.
//!
//! Every call validates first, then takes the current link; nothing is queued.
//! An upload backing the call is removed before the call returns, whatever the
//! outcome.

use std::sync::Arc;

use crate::{
    connection::Connection,
    domain::Recipient,
    errors::Error,
    link::{MessageKind, NetworkLink, OutboundPayload},
    upload::UploadArtifact,
    Result,
};

/// Encoding tag attached to every audio send.
pub const AUDIO_MIMETYPE: &str = "audio/mp4";
pub const DEFAULT_IMAGE_MIMETYPE: &str = "image/jpeg";
pub const DEFAULT_DOCUMENT_MIMETYPE: &str = "application/octet-stream";
const DEFAULT_DOCUMENT_NAME: &str = "file";

/// Source of the live link for a send.
pub trait LinkProvider: Send + Sync {
    fn current_link(&self) -> Result<Arc<dyn NetworkLink>>;
}

impl LinkProvider for Connection {
    fn current_link(&self) -> Result<Arc<dyn NetworkLink>> {
        Connection::current_link(self)
    }
}

/// One send request; lives for a single dispatch call.
#[derive(Debug)]
pub struct OutboundRequest {
    pub to: Option<String>,
    pub kind: MessageKind,
    pub message: Option<String>,
    pub caption: Option<String>,
    pub filename: Option<String>,
    pub artifact: Option<UploadArtifact>,
}

impl OutboundRequest {
    pub fn new(kind: MessageKind, to: Option<String>) -> Self {
        Self {
            to,
            kind,
            message: None,
            caption: None,
            filename: None,
            artifact: None,
        }
    }
}

pub struct OutboundDispatcher {
    links: Arc<dyn LinkProvider>,
}

impl OutboundDispatcher {
    pub fn new(links: Arc<dyn LinkProvider>) -> Self {
        Self { links }
    }

    pub async fn send_text(&self, to: Option<String>, message: Option<String>) -> Result<()> {
        self.dispatch(OutboundRequest {
            message,
            ..OutboundRequest::new(MessageKind::Text, to)
        })
        .await
    }

    pub async fn send_image(
        &self,
        to: Option<String>,
        caption: Option<String>,
        image: Option<UploadArtifact>,
    ) -> Result<()> {
        self.dispatch(OutboundRequest {
            caption,
            artifact: image,
            ..OutboundRequest::new(MessageKind::Image, to)
        })
        .await
    }

    pub async fn send_audio(&self, to: Option<String>, audio: Option<UploadArtifact>) -> Result<()> {
        self.dispatch(OutboundRequest {
            artifact: audio,
            ..OutboundRequest::new(MessageKind::Audio, to)
        })
        .await
    }

    pub async fn send_file(
        &self,
        to: Option<String>,
        filename: Option<String>,
        caption: Option<String>,
        file: Option<UploadArtifact>,
    ) -> Result<()> {
        self.dispatch(OutboundRequest {
            filename,
            caption,
            artifact: file,
            ..OutboundRequest::new(MessageKind::Document, to)
        })
        .await
    }

    pub async fn dispatch(&self, mut req: OutboundRequest) -> Result<()> {
        let artifact = req.artifact.take();
        let kind = req.kind;
        let outcome = self.try_dispatch(req, artifact.as_ref()).await;

        if let Some(artifact) = artifact {
            let path = artifact.path().to_path_buf();
            if let Err(e) = artifact.remove().await {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove upload");
            }
        }

        match &outcome {
            Ok(()) => tracing::info!(?kind, "message sent"),
            Err(e) if e.is_client_error() => tracing::debug!(?kind, error = %e, "send rejected"),
            Err(e) => tracing::warn!(?kind, error = %e, "send failed"),
        }
        outcome
    }

    async fn try_dispatch(
        &self,
        req: OutboundRequest,
        artifact: Option<&UploadArtifact>,
    ) -> Result<()> {
        let OutboundRequest {
            to,
            kind,
            message,
            caption,
            filename,
            ..
        } = req;

        let to = Recipient::parse(to.as_deref().unwrap_or_default())?;
        let caption = caption.filter(|c| !c.trim().is_empty());

        let body = match kind {
            MessageKind::Text => Some(
                message
                    .filter(|m| !m.is_empty())
                    .ok_or_else(|| Error::validation("message is required"))?,
            ),
            _ => None,
        };
        let artifact = match kind {
            MessageKind::Text => None,
            MessageKind::Image => Some(artifact.ok_or_else(|| Error::validation("image is required"))?),
            MessageKind::Audio => Some(artifact.ok_or_else(|| Error::validation("audio is required"))?),
            MessageKind::Document => Some(artifact.ok_or_else(|| Error::validation("file is required"))?),
        };

        let link = self.links.current_link()?;

        let payload = match (kind, body, artifact) {
            (MessageKind::Text, Some(body), _) => OutboundPayload::Text { body },
            (MessageKind::Image, _, Some(a)) => OutboundPayload::Image {
                data: a.read().await?,
                mimetype: a
                    .content_type()
                    .unwrap_or(DEFAULT_IMAGE_MIMETYPE)
                    .to_string(),
                caption,
            },
            (MessageKind::Audio, _, Some(a)) => OutboundPayload::Audio {
                data: a.read().await?,
                mimetype: AUDIO_MIMETYPE.to_string(),
            },
            (MessageKind::Document, _, Some(a)) => OutboundPayload::Document {
                data: a.read().await?,
                mimetype: a
                    .content_type()
                    .unwrap_or(DEFAULT_DOCUMENT_MIMETYPE)
                    .to_string(),
                file_name: filename
                    .filter(|f| !f.trim().is_empty())
                    .or_else(|| a.original_name().map(str::to_string))
                    .unwrap_or_else(|| DEFAULT_DOCUMENT_NAME.to_string()),
                caption,
            },
            _ => return Err(Error::validation("incomplete send request")),
        };

        link.send(&to, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeLink;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        link: Option<Arc<FakeLink>>,
        lookups: AtomicUsize,
    }

    impl FakeProvider {
        fn connected() -> (Arc<Self>, Arc<FakeLink>) {
            let link = Arc::new(FakeLink::default());
            let p = Arc::new(Self {
                link: Some(link.clone()),
                lookups: AtomicUsize::new(0),
            });
            (p, link)
        }

        fn disconnected() -> Arc<Self> {
            Arc::new(Self {
                link: None,
                lookups: AtomicUsize::new(0),
            })
        }

        fn lookups(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    impl LinkProvider for FakeProvider {
        fn current_link(&self) -> Result<Arc<dyn NetworkLink>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            match &self.link {
                Some(l) => Ok(l.clone()),
                None => Err(Error::NotConnected),
            }
        }
    }

    async fn artifact(
        dir: &tempfile::TempDir,
        name: &str,
        content_type: Option<&str>,
    ) -> (UploadArtifact, PathBuf) {
        let a = UploadArtifact::from_bytes(
            dir.path(),
            Some(name.to_string()),
            content_type.map(str::to_string),
            b"bytes",
        )
        .await
        .unwrap();
        let p = a.path().to_path_buf();
        (a, p)
    }

    #[tokio::test]
    async fn text_is_forwarded_once() {
        let (p, link) = FakeProvider::connected();
        let d = OutboundDispatcher::new(p);
        d.send_text(Some("5511999999999".into()), Some("Hi".into()))
            .await
            .unwrap();

        let sent = link.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.as_str(), "5511999999999@s.whatsapp.net");
        assert_eq!(sent[0].1, OutboundPayload::Text { body: "Hi".into() });
    }

    #[tokio::test]
    async fn missing_fields_never_touch_the_link() {
        let (p, link) = FakeProvider::connected();
        let d = OutboundDispatcher::new(p.clone());

        for (to, msg) in [
            (None, Some("Hi".to_string())),
            (Some("".to_string()), Some("Hi".to_string())),
            (Some("5511".to_string()), None),
            (Some("5511".to_string()), Some(String::new())),
        ] {
            let err = d.send_text(to, msg).await.unwrap_err();
            assert!(err.is_client_error(), "{err}");
        }
        let err = d.send_image(Some("5511".into()), None, None).await.unwrap_err();
        assert!(err.is_client_error());
        let err = d.send_audio(Some("5511".into()), None).await.unwrap_err();
        assert!(err.is_client_error());
        let err = d.send_file(Some("5511".into()), None, None, None).await.unwrap_err();
        assert!(err.is_client_error());

        assert_eq!(p.lookups(), 0);
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn disconnected_sends_are_dispatch_errors() {
        let p = FakeProvider::disconnected();
        let d = OutboundDispatcher::new(p.clone());
        let err = d
            .send_text(Some("5511999999999".into()), Some("Hi".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn image_carries_caption_and_upload_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let (p, link) = FakeProvider::connected();
        let d = OutboundDispatcher::new(p);
        let (a, path) = artifact(&dir, "cat.png", Some("image/png")).await;

        d.send_image(Some("5511".into()), Some("look".into()), Some(a))
            .await
            .unwrap();

        assert!(!path.exists());
        assert_eq!(
            link.sent()[0].1,
            OutboundPayload::Image {
                data: b"bytes".to_vec(),
                mimetype: "image/png".into(),
                caption: Some("look".into()),
            }
        );
    }

    #[tokio::test]
    async fn audio_uses_the_fixed_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let (p, link) = FakeProvider::connected();
        let d = OutboundDispatcher::new(p);
        let (a, path) = artifact(&dir, "note.ogg", Some("audio/ogg")).await;

        d.send_audio(Some("5511".into()), Some(a)).await.unwrap();

        assert!(!path.exists());
        match &link.sent()[0].1 {
            OutboundPayload::Audio { mimetype, .. } => assert_eq!(mimetype, AUDIO_MIMETYPE),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn document_name_falls_back_to_the_upload_name() {
        let dir = tempfile::tempdir().unwrap();
        let (p, link) = FakeProvider::connected();
        let d = OutboundDispatcher::new(p);

        let (a, _) = artifact(&dir, "exam.pdf", None).await;
        d.send_file(Some("5511".into()), None, None, Some(a))
            .await
            .unwrap();
        let (b, _) = artifact(&dir, "exam.pdf", Some("application/pdf")).await;
        d.send_file(Some("5511".into()), Some("laudo.pdf".into()), Some("".into()), Some(b))
            .await
            .unwrap();

        let sent = link.sent();
        match (&sent[0].1, &sent[1].1) {
            (
                OutboundPayload::Document {
                    file_name: first,
                    mimetype: first_mime,
                    ..
                },
                OutboundPayload::Document {
                    file_name: second,
                    mimetype: second_mime,
                    caption,
                    ..
                },
            ) => {
                assert_eq!(first, "exam.pdf");
                assert_eq!(first_mime, DEFAULT_DOCUMENT_MIMETYPE);
                assert_eq!(second, "laudo.pdf");
                assert_eq!(second_mime, "application/pdf");
                assert_eq!(caption, &None);
            }
            other => panic!("unexpected payloads {other:?}"),
        }
    }

    #[tokio::test]
    async fn uploads_are_removed_on_every_failure_path() {
        let dir = tempfile::tempdir().unwrap();

        // Validation failure.
        let (p, _) = FakeProvider::connected();
        let d = OutboundDispatcher::new(p.clone());
        let (a, path) = artifact(&dir, "x.png", None).await;
        assert!(d.send_image(None, None, Some(a)).await.is_err());
        assert!(!path.exists());
        assert_eq!(p.lookups(), 0);

        // No live link.
        let d = OutboundDispatcher::new(FakeProvider::disconnected());
        let (a, path) = artifact(&dir, "x.ogg", None).await;
        assert!(d.send_audio(Some("5511".into()), Some(a)).await.is_err());
        assert!(!path.exists());

        // Send rejected by the network.
        let (p, link) = FakeProvider::connected();
        link.fail_sends("media upload failed");
        let d = OutboundDispatcher::new(p);
        let (a, path) = artifact(&dir, "x.pdf", None).await;
        let err = d
            .send_file(Some("5511".into()), None, None, Some(a))
            .await
            .unwrap_err();
        assert!(!err.is_client_error());
        assert!(!path.exists());

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
