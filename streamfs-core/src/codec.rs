//! Typed object metadata.
//!
//! A caller-defined attribute type describes itself once through
//! [`Attributes::schema`]; the resulting [`Codec`] is a list of field lenses
//! that moves values between the typed struct and the wire-level
//! [`ObjectAttributes`] without any per-call inspection.
//!
//! ```
//! use streamfs_core::{Attributes, SchemaBuilder, SystemAttr};
//!
//! #[derive(Debug, Default, Clone)]
//! struct Note {
//!     content_type: String,
//!     author: String,
//! }
//!
//! impl Attributes for Note {
//!     fn schema(schema: &mut SchemaBuilder<Self>) {
//!         schema.system(SystemAttr::ContentType, |n| &n.content_type, |n| &mut n.content_type);
//!         schema.user("Author", |n| &n.author, |n| &mut n.author);
//!     }
//! }
//! ```

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use streamfs_storage::{GetObjectOutput, HeadObjectOutput, ObjectAttributes};
use tracing::debug;

/// Well-known attributes carried in dedicated request/response fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemAttr {
    CacheControl,
    ContentEncoding,
    ContentLanguage,
    ContentType,
    Expires,
    ETag,
    LastModified,
    StorageClass,
}

impl SystemAttr {
    pub const ALL: [SystemAttr; 8] = [
        SystemAttr::CacheControl,
        SystemAttr::ContentEncoding,
        SystemAttr::ContentLanguage,
        SystemAttr::ContentType,
        SystemAttr::Expires,
        SystemAttr::ETag,
        SystemAttr::LastModified,
        SystemAttr::StorageClass,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SystemAttr::CacheControl => "CacheControl",
            SystemAttr::ContentEncoding => "ContentEncoding",
            SystemAttr::ContentLanguage => "ContentLanguage",
            SystemAttr::ContentType => "ContentType",
            SystemAttr::Expires => "Expires",
            SystemAttr::ETag => "ETag",
            SystemAttr::LastModified => "LastModified",
            SystemAttr::StorageClass => "StorageClass",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|attr| attr.name() == name)
    }

    /// Timestamps bind to `Option<DateTime<Utc>>` fields, the rest to `String`.
    pub fn is_timestamp(&self) -> bool {
        matches!(self, SystemAttr::Expires | SystemAttr::LastModified)
    }

    /// Set by the store, never sent on writes.
    pub fn is_read_only(&self) -> bool {
        matches!(self, SystemAttr::ETag | SystemAttr::LastModified)
    }
}

impl fmt::Display for SystemAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Metadata type attached to objects of a file system.
pub trait Attributes: Default + Clone + Send + Sync + 'static {
    /// Register the fields that travel with the object.
    fn schema(schema: &mut SchemaBuilder<Self>);
}

impl Attributes for () {
    fn schema(_: &mut SchemaBuilder<Self>) {}
}

type Get<T, V> = Arc<dyn for<'a> Fn(&'a T) -> &'a V + Send + Sync>;
type GetMut<T, V> = Arc<dyn for<'a> Fn(&'a mut T) -> &'a mut V + Send + Sync>;

fn getter<T, V, F>(f: F) -> Get<T, V>
where
    F: for<'a> Fn(&'a T) -> &'a V + Send + Sync + 'static,
{
    Arc::new(f)
}

fn setter<T, V, F>(f: F) -> GetMut<T, V>
where
    F: for<'a> Fn(&'a mut T) -> &'a mut V + Send + Sync + 'static,
{
    Arc::new(f)
}

enum Field<T> {
    Text {
        attr: SystemAttr,
        get: Get<T, String>,
        get_mut: GetMut<T, String>,
    },
    Time {
        attr: SystemAttr,
        get: Get<T, Option<DateTime<Utc>>>,
        get_mut: GetMut<T, Option<DateTime<Utc>>>,
    },
    User {
        key: String,
        get: Get<T, String>,
        get_mut: GetMut<T, String>,
    },
}

impl<T: 'static> Field<T> {
    /// Re-root a field of `U` onto a `T` that embeds a `U`.
    fn lift<U: 'static>(field: Field<U>, outer: Get<T, U>, outer_mut: GetMut<T, U>) -> Field<T> {
        match field {
            Field::Text { attr, get, get_mut } => {
                let o = outer.clone();
                let om = outer_mut.clone();
                Field::Text {
                    attr,
                    get: getter(move |t: &T| get(o(t))),
                    get_mut: setter(move |t: &mut T| get_mut(om(t))),
                }
            }
            Field::Time { attr, get, get_mut } => {
                let o = outer.clone();
                let om = outer_mut.clone();
                Field::Time {
                    attr,
                    get: getter(move |t: &T| get(o(t))),
                    get_mut: setter(move |t: &mut T| get_mut(om(t))),
                }
            }
            Field::User { key, get, get_mut } => {
                let o = outer.clone();
                let om = outer_mut.clone();
                Field::User {
                    key,
                    get: getter(move |t: &T| get(o(t))),
                    get_mut: setter(move |t: &mut T| get_mut(om(t))),
                }
            }
        }
    }
}

/// Collects the field lenses of an attribute type.
pub struct SchemaBuilder<T> {
    fields: Vec<Field<T>>,
    presigned_url: Option<GetMut<T, String>>,
}

impl<T: Attributes> SchemaBuilder<T> {
    fn new() -> Self {
        Self {
            fields: Vec::new(),
            presigned_url: None,
        }
    }

    /// Bind a `String` field to a textual system attribute.
    pub fn system(
        &mut self,
        attr: SystemAttr,
        get: fn(&T) -> &String,
        get_mut: fn(&mut T) -> &mut String,
    ) -> &mut Self {
        if attr.is_timestamp() {
            debug!(%attr, "timestamp attribute bound to a text field, skipped");
            return self;
        }
        self.fields.push(Field::Text {
            attr,
            get: getter(get),
            get_mut: setter(get_mut),
        });
        self
    }

    /// Bind an optional timestamp field to `Expires` or `LastModified`.
    pub fn timestamp(
        &mut self,
        attr: SystemAttr,
        get: fn(&T) -> &Option<DateTime<Utc>>,
        get_mut: fn(&mut T) -> &mut Option<DateTime<Utc>>,
    ) -> &mut Self {
        if !attr.is_timestamp() {
            debug!(%attr, "text attribute bound to a timestamp field, skipped");
            return self;
        }
        self.fields.push(Field::Time {
            attr,
            get: getter(get),
            get_mut: setter(get_mut),
        });
        self
    }

    /// Bind a `String` field to user metadata under the lower-cased `name`.
    pub fn user(
        &mut self,
        name: &str,
        get: fn(&T) -> &String,
        get_mut: fn(&mut T) -> &mut String,
    ) -> &mut Self {
        self.fields.push(Field::User {
            key: name.to_lowercase(),
            get: getter(get),
            get_mut: setter(get_mut),
        });
        self
    }

    /// Field receiving pre-signed URLs; it is never stored with the object.
    pub fn presigned_url(&mut self, get_mut: fn(&mut T) -> &mut String) -> &mut Self {
        self.presigned_url = Some(setter(get_mut));
        self
    }

    /// Splice in the schema of an embedded attribute struct.
    pub fn embed<U: Attributes>(&mut self, get: fn(&T) -> &U, get_mut: fn(&mut T) -> &mut U) -> &mut Self {
        let mut inner = SchemaBuilder::<U>::new();
        U::schema(&mut inner);

        let outer: Get<T, U> = getter(get);
        let outer_mut: GetMut<T, U> = setter(get_mut);
        for field in inner.fields {
            self.fields
                .push(Field::lift(field, outer.clone(), outer_mut.clone()));
        }
        if let Some(url) = inner.presigned_url {
            let om = outer_mut.clone();
            self.presigned_url = Some(setter(move |t: &mut T| url(om(t))));
        }
        self
    }

    fn build(self) -> Codec<T> {
        Codec {
            fields: self.fields,
            presigned_url: self.presigned_url,
        }
    }
}

/// Moves attribute values between a typed struct and [`ObjectAttributes`].
///
/// Built once per file system and shared by all of its descriptors.
pub struct Codec<T> {
    fields: Vec<Field<T>>,
    presigned_url: Option<GetMut<T, String>>,
}

impl<T> fmt::Debug for Codec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("fields", &self.fields.len())
            .field("presigned_url", &self.presigned_url.is_some())
            .finish()
    }
}

impl<T: Attributes> Default for Codec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Attributes> Codec<T> {
    pub fn new() -> Self {
        let mut builder = SchemaBuilder::new();
        T::schema(&mut builder);
        builder.build()
    }

    /// Wire attributes for a write. Blank fields are omitted.
    pub fn encode(&self, value: &T) -> ObjectAttributes {
        let mut out = ObjectAttributes::default();
        for field in &self.fields {
            match field {
                Field::Text { attr, get, .. } => {
                    let text = get(value);
                    if text.is_empty() || attr.is_read_only() {
                        continue;
                    }
                    let slot = match attr {
                        SystemAttr::CacheControl => &mut out.cache_control,
                        SystemAttr::ContentEncoding => &mut out.content_encoding,
                        SystemAttr::ContentLanguage => &mut out.content_language,
                        SystemAttr::ContentType => &mut out.content_type,
                        SystemAttr::StorageClass => &mut out.storage_class,
                        _ => continue,
                    };
                    *slot = Some(text.clone());
                }
                Field::Time { attr, get, .. } => {
                    if *attr == SystemAttr::Expires {
                        out.expires = *get(value);
                    }
                }
                Field::User { key, get, .. } => {
                    let text = get(value);
                    if !text.is_empty() {
                        out.metadata.insert(key.clone(), text.clone());
                    }
                }
            }
        }
        out
    }

    /// Typed attributes from wire attributes. Absent values stay at their default.
    pub fn decode(&self, attrs: &ObjectAttributes) -> T {
        let mut value = T::default();
        for field in &self.fields {
            match field {
                Field::Text { attr, get_mut, .. } => {
                    let source = match attr {
                        SystemAttr::CacheControl => &attrs.cache_control,
                        SystemAttr::ContentEncoding => &attrs.content_encoding,
                        SystemAttr::ContentLanguage => &attrs.content_language,
                        SystemAttr::ContentType => &attrs.content_type,
                        SystemAttr::ETag => &attrs.etag,
                        SystemAttr::StorageClass => &attrs.storage_class,
                        _ => continue,
                    };
                    if let Some(text) = source {
                        *get_mut(&mut value) = text.clone();
                    }
                }
                Field::Time { attr, get_mut, .. } => {
                    let source = match attr {
                        SystemAttr::Expires => attrs.expires,
                        _ => attrs.last_modified,
                    };
                    if source.is_some() {
                        *get_mut(&mut value) = source;
                    }
                }
                Field::User { key, get_mut, .. } => {
                    if let Some(text) = attrs.metadata.get(key) {
                        *get_mut(&mut value) = text.clone();
                    }
                }
            }
        }
        value
    }

    pub fn decode_head(&self, head: &HeadObjectOutput) -> T {
        self.decode(&with_last_modified(&head.attributes, head.last_modified))
    }

    pub fn decode_get(&self, get: &GetObjectOutput) -> T {
        self.decode(&with_last_modified(&get.attributes, get.last_modified))
    }

    /// True if the type declared a field for pre-signed URLs.
    pub fn has_presigned_url(&self) -> bool {
        self.presigned_url.is_some()
    }

    pub fn set_presigned_url(&self, value: &mut T, url: String) {
        if let Some(get_mut) = &self.presigned_url {
            *get_mut(value) = url;
        }
    }
}

fn with_last_modified(attrs: &ObjectAttributes, last_modified: Option<DateTime<Utc>>) -> ObjectAttributes {
    let mut attrs = attrs.clone();
    if attrs.last_modified.is_none() {
        attrs.last_modified = last_modified;
    }
    attrs
}

/// All eight system attributes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SystemMetadata {
    pub cache_control: String,
    pub content_encoding: String,
    pub content_language: String,
    pub content_type: String,
    pub expires: Option<DateTime<Utc>>,
    pub etag: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub storage_class: String,
}

impl Attributes for SystemMetadata {
    fn schema(schema: &mut SchemaBuilder<Self>) {
        schema
            .system(SystemAttr::CacheControl, |m| &m.cache_control, |m| &mut m.cache_control)
            .system(SystemAttr::ContentEncoding, |m| &m.content_encoding, |m| &mut m.content_encoding)
            .system(SystemAttr::ContentLanguage, |m| &m.content_language, |m| &mut m.content_language)
            .system(SystemAttr::ContentType, |m| &m.content_type, |m| &mut m.content_type)
            .timestamp(SystemAttr::Expires, |m| &m.expires, |m| &mut m.expires)
            .system(SystemAttr::ETag, |m| &m.etag, |m| &mut m.etag)
            .timestamp(SystemAttr::LastModified, |m| &m.last_modified, |m| &mut m.last_modified)
            .system(SystemAttr::StorageClass, |m| &m.storage_class, |m| &mut m.storage_class);
    }
}

/// Only the pre-signed URL side channel.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PreSignedUrl {
    pub url: String,
}

impl Attributes for PreSignedUrl {
    fn schema(schema: &mut SchemaBuilder<Self>) {
        schema.presigned_url(|p| &mut p.url);
    }
}
