//! Library registry
//!
//! The loader hands out opaque [`LibraryHandle`]s and keeps the libraries
//! themselves. Handles are never reused, so a closed handle stays invalid.

use crate::library::Library;
use cl_core::config::Config;
use cl_core::error::{LoaderError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Destination for human-readable failure diagnostics
pub trait ErrorSink: Send + Sync {
    fn report(&self, message: &str);
}

/// Default sink, emitting each report as a `tracing` error event
///
/// Until a global subscriber is installed (see `cl_core::logging::init`)
/// reports are written to stderr instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, message: &str) {
        if tracing::dispatcher::has_been_set() {
            error!(target: "cafe_loader", "{}", message);
        } else {
            eprintln!("cafe-loader: {}", message);
        }
    }
}

/// Opaque reference to a library owned by a [`Loader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LibraryHandle(u64);

impl LibraryHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for LibraryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registry of open libraries
pub struct Loader {
    config: Config,
    libraries: Mutex<HashMap<LibraryHandle, Library>>,
    next_id: AtomicU64,
    sink: Arc<dyn ErrorSink>,
}

impl Loader {
    /// Create a loader reporting through [`TracingSink`]
    pub fn new(config: Config) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    pub fn with_sink(config: Config, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            config,
            libraries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            sink,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open and load an image, reporting any failure through the sink
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Option<LibraryHandle> {
        match self.try_open(path) {
            Ok(handle) => Some(handle),
            Err(e) => {
                self.report_error(&e.to_string());
                None
            }
        }
    }

    /// Open and load an image, returning the failure instead of reporting it
    pub fn try_open<P: AsRef<Path>>(&self, path: P) -> Result<LibraryHandle> {
        // Loading happens outside the lock; only registration is serialized
        let library = Library::open(path.as_ref(), &self.config)?;
        let handle = LibraryHandle(self.next_id.fetch_add(1, Ordering::Relaxed));

        self.libraries.lock().insert(handle, library);
        debug!("Registered {} for {}", handle, path.as_ref().display());

        Ok(handle)
    }

    /// Unload a library and invalidate its handle
    pub fn close(&self, handle: LibraryHandle) -> Result<()> {
        let library = self.libraries.lock().remove(&handle);

        match library {
            Some(library) => {
                info!("Closing {} ({})", handle, library.path().display());
                library.close();
                Ok(())
            }
            None => {
                let err = LoaderError::InvalidHandle(handle.id());
                self.report_error(&err.to_string());
                Err(err)
            }
        }
    }

    /// The single diagnostic sink for failures
    pub fn report_error(&self, message: &str) {
        self.sink.report(message);
    }

    /// Run `f` against an open library
    pub fn with_library<R>(&self, handle: LibraryHandle, f: impl FnOnce(&Library) -> R) -> Option<R> {
        self.libraries.lock().get(&handle).map(f)
    }

    /// Run `f` against an open library with mutable access to its region
    pub fn with_library_mut<R>(
        &self,
        handle: LibraryHandle,
        f: impl FnOnce(&mut Library) -> R,
    ) -> Option<R> {
        self.libraries.lock().get_mut(&handle).map(f)
    }

    pub fn contains(&self, handle: LibraryHandle) -> bool {
        self.libraries.lock().contains_key(&handle)
    }

    /// Handles of every open library, oldest first
    pub fn handles(&self) -> Vec<LibraryHandle> {
        let mut handles: Vec<_> = self.libraries.lock().keys().copied().collect();
        handles.sort();
        handles
    }

    pub fn len(&self) -> usize {
        self.libraries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.lock().is_empty()
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        let libraries = std::mem::take(self.libraries.get_mut());
        if !libraries.is_empty() {
            debug!("Releasing {} libraries still open", libraries.len());
        }
        for (_, library) in libraries {
            library.close();
        }
    }
}
