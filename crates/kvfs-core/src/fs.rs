//! Public filesystem handle.

use std::sync::Arc;

use crate::config::{FsConfig, InitOptions};
use crate::error::FsResult;
use crate::lifecycle::{FsInner, InitState};
use crate::logger::{FsLogger, TracingLogger};
use crate::ops::{OpArgs, OpKind, OpOutput};
use crate::tracker::OpRecord;
use crate::types::{FileData, OpOptions, Stat};

/// A filesystem instance.
///
/// Cheap to clone; clones share one instance. Every file operation goes
/// through the same dispatcher, which waits for initialization, activates
/// the backend, tracks the call, and cleans up afterwards.
///
/// Options arguments take anything convertible into [`OpOptions`]: a full
/// options value, an `Option<OpOptions>`, or an encoding string such as
/// `"utf8"`.
#[derive(Debug, Clone)]
pub struct KvFs {
    inner: Arc<FsInner>,
}

impl KvFs {
    /// An uninitialized instance. Call [`init`](Self::init) before use.
    pub fn new(config: FsConfig) -> Self {
        Self::with_logger(config, Arc::new(TracingLogger::default()))
    }

    /// An uninitialized instance reporting through `logger`.
    pub fn with_logger(config: FsConfig, logger: Arc<dyn FsLogger>) -> Self {
        Self {
            inner: Arc::new(FsInner::new(config, logger)),
        }
    }

    /// Create and initialize an instance.
    pub async fn open(name: &str, config: FsConfig, options: InitOptions) -> FsResult<Self> {
        let logger = options
            .logger
            .clone()
            .unwrap_or_else(|| Arc::new(TracingLogger::new(name)));
        let fs = Self::with_logger(config, logger);
        fs.init(name, options).await?;
        Ok(fs)
    }

    /// Initialize, or re-initialize with a new backend.
    ///
    /// Runs under the initialization lock for `name`. In-flight calls on the
    /// previous backend finish first; the previous backend is then
    /// deactivated and destroyed. Unless `options.defer` is set, a root
    /// `stat` activates the new backend before this returns.
    pub async fn init(&self, name: &str, options: InitOptions) -> FsResult<()> {
        self.inner.initialize(name, options).await
    }

    /// Drain, deactivate and destroy the current backend. The instance can
    /// be initialized again afterwards.
    pub async fn close(&self) -> FsResult<()> {
        self.inner.close().await
    }

    /// Database name of the last successful init.
    pub fn name(&self) -> Option<String> {
        self.inner.name()
    }

    /// Whether an init has completed and no later one failed.
    pub fn is_ready(&self) -> bool {
        self.inner.state() == InitState::Ready
    }

    /// Whether the backend currently holds its runtime resources.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Whether an idle deactivation is scheduled.
    pub fn idle_timer_pending(&self) -> bool {
        self.inner.idle_timer_pending()
    }

    /// Calls currently running, for diagnostics.
    pub fn in_flight(&self) -> Vec<OpRecord> {
        self.inner.in_flight()
    }

    /// Run one operation by kind. The typed methods below are thin wrappers
    /// over this.
    pub async fn dispatch(&self, kind: OpKind, args: OpArgs) -> FsResult<OpOutput> {
        self.inner.dispatch(kind, args).await
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Read a file. With an encoding the content comes back as text.
    pub async fn read_file(&self, path: &str, opts: impl Into<OpOptions>) -> FsResult<FileData> {
        self.dispatch(OpKind::ReadFile, path_args(path, opts))
            .await?
            .into_data()
    }

    /// Read many files; unreadable ones are `None`.
    pub async fn read_files<P: AsRef<str>>(
        &self,
        paths: &[P],
        opts: impl Into<OpOptions>,
    ) -> FsResult<Vec<Option<FileData>>> {
        let args = OpArgs::Paths {
            paths: paths.iter().map(|p| p.as_ref().to_string()).collect(),
            opts: opts.into(),
        };
        self.dispatch(OpKind::ReadFiles, args)
            .await?
            .into_data_list()
    }

    pub async fn readdir(&self, path: &str, opts: impl Into<OpOptions>) -> FsResult<Vec<String>> {
        self.dispatch(OpKind::Readdir, path_args(path, opts))
            .await?
            .into_names()
    }

    pub async fn stat(&self, path: &str, opts: impl Into<OpOptions>) -> FsResult<Stat> {
        self.dispatch(OpKind::Stat, path_args(path, opts))
            .await?
            .into_stat()
    }

    pub async fn lstat(&self, path: &str, opts: impl Into<OpOptions>) -> FsResult<Stat> {
        self.dispatch(OpKind::Lstat, path_args(path, opts))
            .await?
            .into_stat()
    }

    pub async fn readlink(&self, path: &str, opts: impl Into<OpOptions>) -> FsResult<String> {
        self.dispatch(OpKind::Readlink, path_args(path, opts))
            .await?
            .into_target()
    }

    /// Bytes used by regular files at or below `path`.
    pub async fn du(&self, path: &str) -> FsResult<u64> {
        self.dispatch(OpKind::Du, path_args(path, OpOptions::default()))
            .await?
            .into_size()
    }

    // ========================================================================
    // Writing
    // ========================================================================

    pub async fn write_file(
        &self,
        path: &str,
        data: impl Into<FileData>,
        opts: impl Into<OpOptions>,
    ) -> FsResult<()> {
        let args = OpArgs::PathData {
            path: path.to_string(),
            data: data.into(),
            opts: opts.into(),
        };
        self.dispatch(OpKind::WriteFile, args).await?.into_unit()
    }

    pub async fn write_files<P, D>(
        &self,
        entries: impl IntoIterator<Item = (P, D)>,
        opts: impl Into<OpOptions>,
    ) -> FsResult<()>
    where
        P: Into<String>,
        D: Into<FileData>,
    {
        let args = OpArgs::PathsData {
            entries: entries
                .into_iter()
                .map(|(p, d)| (p.into(), d.into()))
                .collect(),
            opts: opts.into(),
        };
        self.dispatch(OpKind::WriteFiles, args).await?.into_unit()
    }

    pub async fn unlink(&self, path: &str, opts: impl Into<OpOptions>) -> FsResult<()> {
        self.dispatch(OpKind::Unlink, path_args(path, opts))
            .await?
            .into_unit()
    }

    pub async fn unlink_many<P: AsRef<str>>(
        &self,
        paths: &[P],
        opts: impl Into<OpOptions>,
    ) -> FsResult<()> {
        let args = OpArgs::Paths {
            paths: paths.iter().map(|p| p.as_ref().to_string()).collect(),
            opts: opts.into(),
        };
        self.dispatch(OpKind::UnlinkMany, args).await?.into_unit()
    }

    pub async fn mkdir(&self, path: &str, opts: impl Into<OpOptions>) -> FsResult<()> {
        self.dispatch(OpKind::Mkdir, path_args(path, opts))
            .await?
            .into_unit()
    }

    pub async fn rmdir(&self, path: &str, opts: impl Into<OpOptions>) -> FsResult<()> {
        self.dispatch(OpKind::Rmdir, path_args(path, opts))
            .await?
            .into_unit()
    }

    pub async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let args = OpArgs::PathPath {
            from: from.to_string(),
            to: to.to_string(),
        };
        self.dispatch(OpKind::Rename, args).await?.into_unit()
    }

    /// Create a symlink at `path` pointing to `target`.
    pub async fn symlink(&self, target: &str, path: &str) -> FsResult<()> {
        let args = OpArgs::PathPath {
            from: target.to_string(),
            to: path.to_string(),
        };
        self.dispatch(OpKind::Symlink, args).await?.into_unit()
    }

    /// Record a file whose content the backend fetches on first read.
    pub async fn back_file(&self, path: &str, opts: impl Into<OpOptions>) -> FsResult<()> {
        self.dispatch(OpKind::BackFile, path_args(path, opts))
            .await?
            .into_unit()
    }

    /// Persist pending metadata now.
    pub async fn flush(&self) -> FsResult<()> {
        self.dispatch(OpKind::Flush, OpArgs::None).await?.into_unit()
    }
}

fn path_args(path: &str, opts: impl Into<OpOptions>) -> OpArgs {
    OpArgs::Path {
        path: path.to_string(),
        opts: opts.into(),
    }
}
