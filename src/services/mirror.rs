use std::time::Duration;

use color_eyre::eyre::{Result, WrapErr};
use reqwest::{Client, StatusCode};

use crate::config::MirrorConfig;
use crate::history::{HISTORY_FILE_NAME, RecordStore};
use crate::ports::mirror::ObjectMirror;

/// Object storage reached with plain `PUT`/`GET {base_url}/{name}`.
pub struct HttpObjectMirror {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpObjectMirror {
    pub fn new(config: &MirrorConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token.clone().filter(|t| !t.is_empty()),
        }
    }

    fn object_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(name))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait::async_trait]
impl ObjectMirror for HttpObjectMirror {
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<()> {
        self.authorize(self.client.put(self.object_url(name)))
            .timeout(Duration::from_secs(60))
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn download(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .authorize(self.client.get(self.object_url(name)))
            .timeout(Duration::from_secs(60))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = response.error_for_status()?.bytes().await?;
        Ok(Some(bytes.to_vec()))
    }
}

/// Restores the history file from the mirror when there is no local copy.
///
/// Failures are logged; the run continues with whatever is on disk.
pub async fn pull_if_missing(store: &mut RecordStore, mirror: &dyn ObjectMirror) {
    if store.exists() {
        return;
    }
    match download_into(store, mirror).await {
        Ok(Some(rows)) => tracing::info!("Pulled history from mirror ({} rows)", rows),
        Ok(None) => tracing::info!("No history in mirror, starting empty"),
        Err(error) => tracing::warn!("Failed to pull history from mirror: {:?}", error),
    }
}

async fn download_into(store: &mut RecordStore, mirror: &dyn ObjectMirror) -> Result<Option<usize>> {
    let Some(bytes) = mirror.download(HISTORY_FILE_NAME).await? else {
        return Ok(None);
    };
    let rows = store
        .install_raw(&bytes)
        .wrap_err("Mirror copy is not a valid history file")?;
    Ok(Some(rows))
}

async fn upload_from(store: &RecordStore, mirror: &dyn ObjectMirror) -> Result<Option<usize>> {
    let Some(bytes) = store.raw_bytes()? else {
        return Ok(None);
    };
    let size = bytes.len();
    mirror.upload(HISTORY_FILE_NAME, bytes).await?;
    Ok(Some(size))
}

/// Uploads the local history file. Failures are logged and ignored.
pub async fn push(store: &RecordStore, mirror: &dyn ObjectMirror) {
    match upload_from(store, mirror).await {
        Ok(Some(size)) => tracing::info!("Pushed history to mirror ({} bytes)", size),
        Ok(None) => tracing::debug!("No local history to push"),
        Err(error) => tracing::warn!("Failed to push history to mirror: {:?}", error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryTable;
    use crate::ports::mirror::MockObjectMirror;
    use crate::test_utils::{event, temp_store};
    use color_eyre::eyre::eyre;

    #[tokio::test]
    async fn test_pull_installs_mirror_copy() {
        let (_src_dir, mut source) = temp_store();
        source
            .append(HistoryTable::from_events(vec![event(
                "t1",
                "pl1",
                "2024-01-01 00:00:00",
            )]))
            .unwrap();
        let remote = source.raw_bytes().unwrap().unwrap();

        let mut mirror = MockObjectMirror::new();
        mirror
            .expect_download()
            .withf(|name| name == HISTORY_FILE_NAME)
            .times(1)
            .returning(move |_| Ok(Some(remote.clone())));

        let (_dir, mut store) = temp_store();
        pull_if_missing(&mut store, &mirror).await;
        assert_eq!(store.read(None, false).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pull_skipped_when_local_file_exists() {
        let (_dir, mut store) = temp_store();
        store
            .append(HistoryTable::from_events(vec![event(
                "t1",
                "pl1",
                "2024-01-01 00:00:00",
            )]))
            .unwrap();

        let mut mirror = MockObjectMirror::new();
        mirror.expect_download().never();
        pull_if_missing(&mut store, &mirror).await;
    }

    #[tokio::test]
    async fn test_pull_failure_leaves_store_empty() {
        let mut mirror = MockObjectMirror::new();
        mirror
            .expect_download()
            .returning(|_| Ok(Some(b"not a history file".to_vec())));

        let (_dir, mut store) = temp_store();
        pull_if_missing(&mut store, &mirror).await;
        assert!(!store.exists());
        assert!(store.read(None, true).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pull_rejects_copy_declaring_huge_payload() {
        use flate2::{Compression, write::GzEncoder};
        use std::io::Write;

        let header = br#"{"playlist_id":"pl1","playlist_names":[],"sources":[],"rows":0,"payload_len":9223372036854775807}"#;
        let mut raw = b"CSHIST\x01".to_vec();
        raw.extend_from_slice(&(header.len() as u32).to_le_bytes());
        raw.extend_from_slice(header);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        let remote = encoder.finish().unwrap();

        let mut mirror = MockObjectMirror::new();
        mirror
            .expect_download()
            .times(1)
            .returning(move |_| Ok(Some(remote.clone())));

        let (_dir, mut store) = temp_store();
        pull_if_missing(&mut store, &mirror).await;
        assert!(!store.exists());
    }

    #[tokio::test]
    async fn test_push_failure_is_not_fatal() {
        let (_dir, mut store) = temp_store();
        store
            .append(HistoryTable::from_events(vec![event(
                "t1",
                "pl1",
                "2024-01-01 00:00:00",
            )]))
            .unwrap();

        let mut mirror = MockObjectMirror::new();
        mirror
            .expect_upload()
            .times(1)
            .returning(|_, _| Err(eyre!("connection refused")));
        push(&store, &mirror).await;
    }

    #[tokio::test]
    async fn test_push_without_history_uploads_nothing() {
        let (_dir, store) = temp_store();
        let mut mirror = MockObjectMirror::new();
        mirror.expect_upload().never();
        push(&store, &mirror).await;
    }
}
