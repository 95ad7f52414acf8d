//! Annotation store backed by a remote HTTP service.
//!
//! Pulls annotation documents from the remote database into an in-memory
//! mirror, so queries never hit the network. Packages load lazily and at
//! most once; `load_package` for an unknown or already-loaded package is a
//! no-op, so callers may invoke it freely before every query.

use std::rc::Rc;

use ahash::AHashMap;
use log::{debug, warn};

use crate::annotations::db::{Annotation, AnnotationDb, MemoryAnnotationDb, Query};
use crate::config::Config;
use crate::error::StoreError;

/// An in-memory annotation database that pulls from a remote server.
pub struct RemoteAnnotationDb {
    /// Base URL of the REST API supplying the annotations.
    api_url: String,
    inner: MemoryAnnotationDb,
    /// Load state per `(language, package)`; absent means the remote does
    /// not have the package.
    loaded: AHashMap<(String, String), bool>,
    initialized: bool,
}

impl RemoteAnnotationDb {
    #[must_use]
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            inner: MemoryAnnotationDb::new(),
            loaded: AHashMap::new(),
            initialized: false,
        }
    }

    /// Creates the store from the library configuration file.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.api_url.clone().unwrap_or_default())
    }

    fn api_get(&self, endpoint: &str) -> Result<serde_json::Value, StoreError> {
        let url = format!("{}{endpoint}", self.api_url);
        debug!("annotation store GET {url}");
        let response = ureq::get(&url).call().map_err(|error| StoreError::Remote {
            message: format!("GET {url}: {error}"),
        })?;
        response.into_json().map_err(|error| StoreError::Remote {
            message: format!("GET {url}: {error}"),
        })
    }

    /// Fetches the list of languages and packages the remote knows about.
    fn initialize(&mut self) -> Result<bool, StoreError> {
        self.loaded.clear();
        if self.api_url.is_empty() {
            return Ok(false);
        }

        let languages = self.api_get("/count/annotation")?;
        let Some(languages) = languages.as_object() else {
            return Err(StoreError::Remote {
                message: "language listing is not an object".to_owned(),
            });
        };
        for language in languages.keys() {
            let packages = self.api_get(&format!("/count/annotation/{language}"))?;
            let Some(packages) = packages.as_object() else {
                warn!("package listing for '{language}' is not an object");
                continue;
            };
            for package in packages.keys() {
                self.loaded
                    .insert((language.clone(), package.clone()), false);
            }
        }

        self.initialized = true;
        Ok(true)
    }

    fn prepare_load(&mut self) -> Result<bool, StoreError> {
        if self.initialized {
            Ok(true)
        } else {
            self.initialize()
        }
    }
}

impl AnnotationDb for RemoteAnnotationDb {
    fn get(&self, query: &Query) -> Result<Option<Rc<Annotation>>, StoreError> {
        self.inner.get(query)
    }

    fn filter(&self, query: &Query) -> Vec<Rc<Annotation>> {
        self.inner.filter(query)
    }

    fn load_package(&mut self, language: &str, package: &str) -> Result<bool, StoreError> {
        if !self.prepare_load()? {
            return Ok(false);
        }
        let key = (language.to_owned(), package.to_owned());
        // Unknown packages and already-loaded packages are both no-ops.
        if self.loaded.get(&key).copied() != Some(false) {
            return Ok(false);
        }

        let endpoint = format!("/annotations/{language}/{package}");
        let documents = self.api_get(&endpoint)?;
        let Some(documents) = documents.as_array() else {
            return Err(StoreError::Remote {
                message: format!("{endpoint}: expected a list of documents"),
            });
        };
        self.inner.load_documents(documents.clone())?;
        self.loaded.insert(key, true);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_url_never_touches_the_network() {
        let mut db = RemoteAnnotationDb::new("");
        assert!(!db.load_package("python", "anything").unwrap());
        assert!(db.filter(&Query::new().with("language", "python")).is_empty());
    }
}
