use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::models::Image;

/// Receives catalog mutations after they are committed. Failures are logged by the
/// caller and never undo the mutation.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn on_image_created(&self, image: &Image) -> Result<()>;

    async fn on_image_updated(&self, image: &Image) -> Result<()>;

    async fn on_image_deleted(&self, image: &Image) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn on_image_created(&self, _image: &Image) -> Result<()> {
        Ok(())
    }

    async fn on_image_updated(&self, _image: &Image) -> Result<()> {
        Ok(())
    }

    async fn on_image_deleted(&self, _image: &Image) -> Result<()> {
        Ok(())
    }
}

/// Emits one structured `tracing` event per mutation under the `catalog_events` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPublisher;

#[async_trait]
impl EventPublisher for LoggingPublisher {
    async fn on_image_created(&self, image: &Image) -> Result<()> {
        info!(
            target: "catalog_events",
            image_id = image.id,
            filename = %image.filename,
            tags = ?image.tag_names(),
            "Image created"
        );
        Ok(())
    }

    async fn on_image_updated(&self, image: &Image) -> Result<()> {
        info!(target: "catalog_events", image_id = image.id, tags = ?image.tag_names(), "Image updated");
        Ok(())
    }

    async fn on_image_deleted(&self, image: &Image) -> Result<()> {
        info!(target: "catalog_events", image_id = image.id, filename = %image.filename, "Image deleted");
        Ok(())
    }
}
