//! Applications and the executable catalog
//!
//! An application is a name, a version, and an executable payload that can be
//! set exactly once. Executables are Rust closures returning a future, so a
//! program can suspend (waiting for input) and be resumed by the run loop.
//!
//! Applications can be saved as files. A saved record never contains code:
//! it names a catalog id, and loading goes through `AppCatalog::instantiate`,
//! the single place where stored data is turned back into something runnable.

use super::process::ProcessContext;
use crate::vfs::{FsError, FsResult, Filesystem, NodeId};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::rc::Rc;

/// Exit code returned by an executable
pub type ExitCode = i32;

/// A runnable program body
pub type Executable = Rc<dyn Fn(ProcessContext) -> LocalBoxFuture<'static, ExitCode>>;

/// Wrap an async closure as an `Executable`
pub fn executable<F, Fut>(f: F) -> Executable
where
    F: Fn(ProcessContext) -> Fut + 'static,
    Fut: Future<Output = ExitCode> + 'static,
{
    Rc::new(move |ctx| f(ctx).boxed_local())
}

/// File extension used for saved applications
pub const APP_EXTENSION: &str = "app";

/// Application errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// The executable payload was already set
    AlreadyCompiled(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::AlreadyCompiled(name) => {
                write!(f, "application {} already has an executable", name)
            }
        }
    }
}

impl std::error::Error for AppError {}

/// A stored application record that cannot be turned into an application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidAppRecord {
    /// Not valid JSON, or required fields missing
    Malformed(String),
    /// A required field is present but empty
    EmptyField(&'static str),
    /// The record names an executable the catalog does not know
    UnknownExecutable(String),
    /// The node is not a file
    NotAFile,
}

impl std::fmt::Display for InvalidAppRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidAppRecord::Malformed(msg) => write!(f, "malformed application record: {}", msg),
            InvalidAppRecord::EmptyField(field) => {
                write!(f, "application record has an empty {}", field)
            }
            InvalidAppRecord::UnknownExecutable(id) => write!(f, "unknown executable: {}", id),
            InvalidAppRecord::NotAFile => write!(f, "not an application file"),
        }
    }
}

impl std::error::Error for InvalidAppRecord {}

struct Payload {
    /// Catalog id, when the executable came from the catalog
    id: Option<String>,
    exec: Executable,
}

/// A named, versioned program
pub struct Application {
    name: String,
    version: String,
    payload: OnceCell<Payload>,
}

impl Application {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            payload: OnceCell::new(),
        }
    }

    /// An application whose payload is fixed at construction
    fn with_payload(
        name: impl Into<String>,
        version: impl Into<String>,
        id: Option<String>,
        exec: Executable,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            payload: OnceCell::from(Payload { id, exec }),
        }
    }

    /// Builder form of `set_executable`. An application that already has a
    /// payload keeps it.
    pub fn with_executable<F, Fut>(self, f: F) -> Self
    where
        F: Fn(ProcessContext) -> Fut + 'static,
        Fut: Future<Output = ExitCode> + 'static,
    {
        if self.has_executable() {
            warn!(target: "aurora::kernel", "{} already has an executable", self.name);
            return self;
        }
        Self::with_payload(self.name, self.version, None, executable(f))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Set the executable payload. Only the first call succeeds.
    pub fn set_executable(&self, exec: Executable) -> Result<(), AppError> {
        self.payload
            .set(Payload { id: None, exec })
            .map_err(|_| AppError::AlreadyCompiled(self.name.clone()))
    }

    pub fn executable(&self) -> Option<Executable> {
        self.payload.get().map(|p| p.exec.clone())
    }

    pub fn has_executable(&self) -> bool {
        self.payload.get().is_some()
    }

    /// Catalog id of the payload, if it has one
    pub fn exec_id(&self) -> Option<&str> {
        self.payload.get()?.id.as_deref()
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("exec", &self.exec_id())
            .field("compiled", &self.has_executable())
            .finish()
    }
}

/// The persisted form of an application file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    pub name: String,
    pub version: String,
    /// Catalog id of the executable, `null` for an application without one
    pub exec: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl AppRecord {
    pub fn from_application(app: &Application, args: &[String]) -> Self {
        Self {
            name: app.name().to_string(),
            version: app.version().to_string(),
            exec: app.exec_id().map(str::to_string),
            args: args.to_vec(),
        }
    }

    pub fn to_json(&self) -> FsResult<String> {
        serde_json::to_string(self).map_err(|e| FsError::Corrupt(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, InvalidAppRecord> {
        let record: AppRecord =
            serde_json::from_str(json).map_err(|e| InvalidAppRecord::Malformed(e.to_string()))?;
        if record.name.trim().is_empty() {
            return Err(InvalidAppRecord::EmptyField("name"));
        }
        if record.version.trim().is_empty() {
            return Err(InvalidAppRecord::EmptyField("version"));
        }
        Ok(record)
    }
}

struct CatalogEntry {
    name: String,
    version: String,
    exec: Executable,
}

/// Statically linked executables, by stable id
#[derive(Default)]
pub struct AppCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl AppCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executable under `id`, with the identity applications
    /// created from it get by default. Re-registering an id replaces it.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        exec: Executable,
    ) {
        let id = id.into();
        debug!(target: "aurora::kernel", "catalog: registered {}", id);
        self.entries.insert(
            id,
            CatalogEntry {
                name: name.into(),
                version: version.into(),
                exec,
            },
        );
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A fresh application for a catalog entry, with its default identity
    pub fn application(&self, id: &str) -> Option<Application> {
        let entry = self.entries.get(id)?;
        Some(Application::with_payload(
            &entry.name,
            &entry.version,
            Some(id.to_string()),
            entry.exec.clone(),
        ))
    }

    /// Turn a stored record into an application.
    ///
    /// The record's name and version are kept; the payload is looked up by
    /// its catalog id. A record without an id gives an application that has
    /// no executable.
    pub fn instantiate(&self, record: &AppRecord) -> Result<Application, InvalidAppRecord> {
        let Some(id) = &record.exec else {
            return Ok(Application::new(&record.name, &record.version));
        };
        let entry = self.entries.get(id).ok_or_else(|| {
            warn!(target: "aurora::kernel", "record {} names unknown executable {}", record.name, id);
            InvalidAppRecord::UnknownExecutable(id.clone())
        })?;
        Ok(Application::with_payload(
            &record.name,
            &record.version,
            Some(id.clone()),
            entry.exec.clone(),
        ))
    }

    /// Decode and instantiate an application record
    pub fn decode(&self, json: &str) -> Result<(Application, Vec<String>), InvalidAppRecord> {
        let record = AppRecord::from_json(json)?;
        let app = self.instantiate(&record)?;
        Ok((app, record.args))
    }
}

/// Save `app` as `<name>.app` inside `dir`
pub fn save_application(
    fs: &mut Filesystem,
    dir: NodeId,
    app: &Application,
    args: &[String],
) -> FsResult<NodeId> {
    let record = AppRecord::from_application(app, args);
    let file = fs.create_file(app.name(), APP_EXTENSION, record.to_json()?);
    if let Err(e) = fs.add_child(dir, file) {
        // Do not leave a detached node behind
        if let Err(cleanup) = fs.delete(file) {
            warn!(target: "aurora::kernel", "leaked detached {}: {}", file, cleanup);
        }
        return Err(e);
    }
    Ok(file)
}

/// Load the application stored in `file`
pub fn load_application(
    fs: &Filesystem,
    file: NodeId,
    catalog: &AppCatalog,
) -> Result<(Application, Vec<String>), InvalidAppRecord> {
    let content = fs.content(file).ok_or(InvalidAppRecord::NotAFile)?;
    catalog.decode(content)
}
