//! File extension to media type lookup.

use dashmap::DashMap;
use mime::Mime;

const DEFAULT_TYPES: &[(&str, &str)] = &[
    ("html", "text/html; charset=utf-8"),
    ("htm", "text/html; charset=utf-8"),
    ("css", "text/css; charset=utf-8"),
    ("js", "text/javascript; charset=utf-8"),
    ("mjs", "text/javascript; charset=utf-8"),
    ("json", "application/json"),
    ("txt", "text/plain; charset=utf-8"),
    ("csv", "text/csv; charset=utf-8"),
    ("xml", "application/xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("ico", "image/x-icon"),
    ("webp", "image/webp"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("wasm", "application/wasm"),
    ("mp4", "video/mp4"),
    ("mp3", "audio/mpeg"),
];

/// Maps file extensions to media types, case-insensitively.
///
/// Created with a table of common web types; more can be registered at any
/// time through a shared reference.
#[derive(Debug)]
pub struct MimeProvider {
    types: DashMap<String, Mime>,
}

impl MimeProvider {
    pub fn new() -> Self {
        let types = DashMap::with_capacity(DEFAULT_TYPES.len());
        for (extension, media_type) in DEFAULT_TYPES {
            if let Ok(mime) = media_type.parse::<Mime>() {
                types.insert((*extension).to_string(), mime);
            }
        }
        Self { types }
    }

    pub fn register(&self, extension: &str, mime: Mime) {
        self.types.insert(extension.to_ascii_lowercase(), mime);
    }

    pub fn get(&self, extension: &str) -> Option<Mime> {
        self.types.get(&extension.to_ascii_lowercase()).map(|entry| entry.value().clone())
    }

    /// Media type of a path by its extension, `application/octet-stream`
    /// when unknown.
    pub fn for_path(&self, path: &str) -> Mime {
        path.rsplit_once('.')
            .filter(|(_, extension)| !extension.contains('/'))
            .and_then(|(_, extension)| self.get(extension))
            .unwrap_or(mime::APPLICATION_OCTET_STREAM)
    }
}

impl Default for MimeProvider {
    fn default() -> Self {
        Self::new()
    }
}
