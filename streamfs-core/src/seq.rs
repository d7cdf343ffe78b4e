//! Lazy cursor over a prefix listing.
//!
//! A [`Seq`] fetches pages only as the consumer advances. In streaming mode it
//! keeps requesting pages until the store reports the end; after
//! [`Seq::limit`] it fetches a single page and stops, handing out
//! [`Seq::cursor`] so a later call can resume with [`Seq::continue_from`].
//!
//! ```no_run
//! # fn demo(fs: &streamfs_core::FileSystem) -> Result<(), streamfs_core::FsError> {
//! let mut seq = fs.matching("/logs/")?.limit(100);
//! while seq.tail() {
//!     println!("{}", seq.head()?);
//! }
//! let resume = seq.cursor();
//! # Ok(()) }
//! ```

use crate::error::FsError;
use crate::key::ObjectKey;
use metrics::counter;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use streamfs_storage::{IoContext, ObjectStore};
use tracing::debug;

pub struct Seq {
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
    prefix: String,
    page_size: usize,
    start_after: Option<String>,
    items: Option<Vec<String>>,
    at: usize,
    streaming: bool,
    end_of_stream: bool,
    err: Option<FsError>,
    err_reported: bool,
}

impl fmt::Debug for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seq")
            .field("prefix", &self.prefix)
            .field("page_size", &self.page_size)
            .field("start_after", &self.start_after)
            .field("at", &self.at)
            .field("streaming", &self.streaming)
            .field("end_of_stream", &self.end_of_stream)
            .finish()
    }
}

enum Seed {
    Page,
    End,
}

impl Seq {
    pub(crate) fn new(
        store: Arc<dyn ObjectStore>,
        timeout: Duration,
        prefix: impl Into<String>,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            timeout,
            prefix: prefix.into(),
            page_size,
            start_after: None,
            items: None,
            at: 0,
            streaming: true,
            end_of_stream: false,
            err: None,
            err_reported: false,
        }
    }

    /// Fetch at most `n` keys in one page and never fetch another.
    pub fn limit(mut self, n: usize) -> Self {
        self.page_size = n.max(1);
        self.streaming = false;
        self
    }

    /// Resume after `cursor`, as returned by [`Seq::cursor`] of an earlier sequence.
    pub fn continue_from(mut self, cursor: &ObjectKey) -> Self {
        if !cursor.is_empty() {
            self.start_after = Some(cursor.to_key());
        }
        self
    }

    fn seed(&mut self) -> Result<Seed, FsError> {
        if self.items.is_some() && self.start_after.is_none() {
            return Ok(Seed::End);
        }

        let ctx = IoContext::new(self.timeout);
        let page = self
            .store
            .list_objects(&ctx, &self.prefix, self.page_size, self.start_after.as_deref())
            .map_err(|e| FsError::io("match", format!("/{}", self.prefix), e))?;
        counter!("streamfs_list_pages_total").increment(1);
        debug!(prefix = %self.prefix, keys = page.key_count(), "seeded page");

        if page.key_count() == 0 {
            return Ok(Seed::End);
        }

        self.start_after = match page.next_marker {
            Some(_) => page.last_key().map(str::to_string),
            None => None,
        };
        self.items = Some(page.objects.into_iter().map(|o| o.key).collect());
        self.at = 0;
        Ok(Seed::Page)
    }

    fn advance_page(&mut self) -> bool {
        match self.seed() {
            Ok(Seed::Page) => true,
            Ok(Seed::End) => {
                self.end_of_stream = true;
                false
            }
            Err(err) => {
                self.err = Some(err);
                false
            }
        }
    }

    /// Move to the next element, fetching a page if needed.
    ///
    /// Returns `false` at the end of the sequence or on error; both are
    /// final, and no further listing calls are made.
    pub fn tail(&mut self) -> bool {
        if self.err.is_some() || self.end_of_stream {
            return false;
        }
        let len = match &self.items {
            None => return self.advance_page(),
            Some(items) => items.len(),
        };
        self.at += 1;
        if self.at < len {
            return true;
        }
        if !self.streaming {
            self.end_of_stream = true;
            return false;
        }
        self.advance_page()
    }

    /// Current element; seeds the first page if nothing was fetched yet.
    pub fn head(&mut self) -> Result<ObjectKey, FsError> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        if self.items.is_none() && !self.end_of_stream && !self.advance_page() {
            if let Some(err) = &self.err {
                return Err(err.clone());
            }
        }
        match &self.items {
            Some(items) if !items.is_empty() => {
                let key = &items[self.at.min(items.len() - 1)];
                Ok(ObjectKey::parse(key))
            }
            _ => Err(FsError::NotExist {
                op: "match",
                path: format!("/{}", self.prefix),
            }),
        }
    }

    /// Last key seen, for resuming with [`Seq::continue_from`]. Empty before the first fetch.
    pub fn cursor(&self) -> ObjectKey {
        match &self.items {
            Some(items) if !items.is_empty() => {
                ObjectKey::parse(&items[self.at.min(items.len() - 1)])
            }
            _ => self
                .start_after
                .as_deref()
                .map(ObjectKey::parse)
                .unwrap_or_default(),
        }
    }

    /// Error that ended the sequence, if any.
    pub fn error(&self) -> Option<&FsError> {
        self.err.as_ref()
    }
}

impl Iterator for Seq {
    type Item = Result<ObjectKey, FsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.tail() {
            return Some(self.head());
        }
        match &self.err {
            Some(err) if !self.err_reported => {
                self.err_reported = true;
                Some(Err(err.clone()))
            }
            _ => None,
        }
    }
}
