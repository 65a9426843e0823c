//! Resource downloads
//!
//! Naming happens in two steps. Reference templates in the download spec
//! are substituted while the field is evaluated; the extension default and
//! the final path are settled once the response's content type is known.

use crate::crawler::fetcher::FetchError;
use crate::refs::Lookup;
use crate::rules::DownloadSpec;
use crate::CrawlError;
use futures::StreamExt;
use reqwest::Response;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

const INDEX_PLACEHOLDER: &str = "{{index}}";

/// Default directory for downloads
const DEFAULT_DIR: &str = "./";

/// Download spec of one resource with every reference substituted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceName {
    index: Option<usize>,
    dir: String,
    filename: Option<String>,
    extension: Option<String>,
    complete_path: Option<String>,
}

/// Replaces `{{index}}`, returning whether it occurred
fn fill_index(template: &str, index: Option<usize>) -> (String, bool) {
    if !template.contains(INDEX_PLACEHOLDER) {
        return (template.to_string(), false);
    }
    let index = index.map(|i| i.to_string()).unwrap_or_default();
    (template.replace(INDEX_PLACEHOLDER, &index), true)
}

/// Inserts `_<index>` before the extension of a path
fn suffix_path(path: &str, index: usize) -> String {
    let as_path = Path::new(path);
    match (as_path.extension(), as_path.file_stem()) {
        (Some(ext), Some(_)) => {
            let ext = ext.to_string_lossy();
            let stem = &path[..path.len() - ext.len() - 1];
            format!("{}_{}.{}", stem, index, ext)
        }
        _ => format!("{}_{}", path, index),
    }
}

/// Drops `.` components
fn clean_path(path: PathBuf) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

impl ResourceName {
    /// Substitutes `{{index}}` and then reference templates in every part
    /// of the spec
    ///
    /// `index` is the element index for list downloads and `None` for a
    /// single resource. In a list, a filename or complete path that does
    /// not use `{{index}}` gets `_<index>` so elements do not overwrite
    /// each other.
    pub async fn prepare(
        spec: &DownloadSpec,
        index: Option<usize>,
        lookup: &Lookup,
    ) -> Result<Self, CrawlError> {
        let dir = match &spec.path {
            Some(path) => lookup.substitute(&fill_index(path, index).0).await?,
            None => DEFAULT_DIR.to_string(),
        };

        let extension = match &spec.extension {
            Some(extension) => {
                let extension = lookup.substitute(&fill_index(extension, index).0).await?;
                if extension.is_empty() || extension.starts_with('.') {
                    Some(extension)
                } else {
                    Some(format!(".{}", extension))
                }
            }
            None => None,
        };

        let filename = match &spec.filename {
            Some(filename) => {
                let (filled, used_index) = fill_index(filename, index);
                let mut filename = lookup.substitute(&filled).await?;
                if let (false, Some(i)) = (used_index, index) {
                    filename = format!("{}_{}", filename, i);
                }
                Some(filename)
            }
            None => None,
        };

        let complete_path = match &spec.complete_path {
            Some(complete_path) => {
                let (filled, used_index) = fill_index(complete_path, index);
                let mut complete_path = lookup.substitute(&filled).await?;
                if let (false, Some(i)) = (used_index, index) {
                    complete_path = suffix_path(&complete_path, i);
                }
                Some(complete_path)
            }
            None => None,
        };

        Ok(Self {
            index,
            dir,
            filename,
            extension,
            complete_path,
        })
    }

    /// The file path to save to
    ///
    /// # Arguments
    ///
    /// * `content_type` - Response content type, for the default extension
    /// * `cwd` - Directory relative paths are resolved against
    /// * `now_ms` - Timestamp used as the default filename
    pub fn resolve(&self, content_type: &str, cwd: &Path, now_ms: i64) -> PathBuf {
        if let Some(complete_path) = &self.complete_path {
            return clean_path(cwd.join(complete_path));
        }

        let extension = self
            .extension
            .clone()
            .unwrap_or_else(|| extension_for(content_type));
        let filename = match (&self.filename, self.index) {
            (Some(filename), _) => filename.clone(),
            (None, Some(i)) => format!("{}_{}", now_ms, i),
            (None, None) => now_ms.to_string(),
        };

        clean_path(cwd.join(&self.dir).join(format!("{}{}", filename, extension)))
    }
}

/// Default file extension for a content type, with its leading dot
///
/// Parameters after `;` are ignored. When the type has several known
/// extensions, the one spelled like its subtype wins (`image/jpeg` gives
/// `.jpeg`, `image/svg+xml` gives `.svg`). Unknown or missing types give an
/// empty string.
pub fn extension_for(content_type: &str) -> String {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    let Some(extensions) = mime_guess::get_mime_extensions_str(&essence) else {
        return String::new();
    };

    let subtype = essence.split('/').nth(1).unwrap_or("");
    let subtype = subtype.split('+').next().unwrap_or(subtype);
    let subtype = subtype.strip_prefix("x-").unwrap_or(subtype);
    extensions
        .iter()
        .find(|ext| **ext == subtype)
        .or_else(|| extensions.first())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default()
}

/// Streams a response body to `path`
///
/// Parent directories are created. On a stream or write error the partial
/// file is removed.
pub async fn save_resource(response: Response, path: &Path) -> Result<(), FetchError> {
    let io_error =
        |e: std::io::Error| FetchError::Other(format!("failed to save {}: {}", path.display(), e));

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }
    let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;

    let mut stream = response.bytes_stream();
    let written: Result<(), FetchError> = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(io_error)?;
        }
        file.flush().await.map_err(io_error)?;
        Ok(())
    }
    .await;

    if let Err(e) = written {
        drop(file);
        if let Err(remove) = tokio::fs::remove_file(path).await {
            tracing::debug!("Could not remove partial file {}: {}", path.display(), remove);
        }
        return Err(e);
    }

    Ok(())
}
