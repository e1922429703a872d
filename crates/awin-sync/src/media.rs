use awin_core::CampaignRecord;
use awin_storage::{MediaFetcher, NotesStore};
use tracing::{debug, warn};

/// Download a record's content images into the vault and fill `image_paths`.
/// Must run before the record is persisted; a failed download is skipped.
pub async fn attach_media<S: NotesStore + ?Sized>(
    store: &S,
    fetcher: &MediaFetcher,
    record: &mut CampaignRecord,
) -> usize {
    let mut paths = Vec::new();
    for (index, url) in record.image_urls.iter().enumerate() {
        let bytes = match fetcher.fetch_bytes(&record.slug, url).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(slug = %record.slug, url = %url, error = %err, "image download failed");
                continue;
            }
        };
        match store.store_media(&record.slug, index, url, &bytes).await {
            Ok(path) => paths.push(path),
            Err(err) => warn!(slug = %record.slug, error = %err, "storing image failed"),
        }
    }
    debug!(slug = %record.slug, stored = paths.len(), "media attached");
    let stored = paths.len();
    record.image_paths = paths;
    stored
}
