//! Directory listing over a flat key space.

use crate::codec::Attributes;
use crate::error::FsError;
use crate::fs::Shared;
use crate::info::ObjectInfo;
use crate::path::object_key;
use metrics::counter;
use tracing::debug;

/// Every entry below `dir_path`, fetched page by page until the listing ends.
///
/// Entries are named relative to the directory. The listing stops on an
/// empty page even when the store claims more keys remain.
pub(crate) fn read_all<T: Attributes>(
    shared: &Shared<T>,
    dir_path: &str,
) -> Result<Vec<ObjectInfo<T>>, FsError> {
    let prefix = object_key(dir_path);
    let ctx = shared.io_context();
    let page_size = shared.config.list_limit;

    let mut entries = Vec::new();
    let mut start_after: Option<String> = None;

    loop {
        let page = shared
            .store
            .list_objects(&ctx, prefix, page_size, start_after.as_deref())
            .map_err(|e| FsError::io("readdir", dir_path, e))?;
        counter!("streamfs_list_pages_total").increment(1);
        debug!(prefix, keys = page.key_count(), "listed page");

        for object in &page.objects {
            let name = relative_name(prefix, &object.key);
            if name.is_empty() {
                continue;
            }
            entries.push(ObjectInfo::entry(name, object.size, object.last_modified));
        }

        match (page.last_key(), page.next_marker.is_some()) {
            (Some(last), true) => start_after = Some(last.to_string()),
            _ => return Ok(entries),
        }
    }
}

/// Key with the directory prefix removed.
fn relative_name<'a>(prefix: &str, key: &'a str) -> &'a str {
    key.strip_prefix(prefix).unwrap_or(key)
}
