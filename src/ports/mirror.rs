use color_eyre::eyre::Result;

/// Remote object storage holding a best-effort copy of the history file.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ObjectMirror: Send + Sync {
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<()>;

    /// `None` when the object does not exist remotely.
    async fn download(&self, name: &str) -> Result<Option<Vec<u8>>>;
}
