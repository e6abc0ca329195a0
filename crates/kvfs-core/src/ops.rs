//! Operation table.
//!
//! Every public file operation is described by one [`OpDescriptor`]: how its
//! arguments are normalized and whether it mutates the tree. The dispatcher
//! reads this table instead of wrapping each operation by hand.

use std::fmt;
use strum::{EnumIter, EnumString};

use crate::backend::Backend;
use crate::error::{FsError, FsResult};
use crate::path;
use crate::types::{Encoding, FileData, OpOptions, Stat};

/// Public filesystem operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, EnumString)]
#[strum(serialize_all = "camelCase", ascii_case_insensitive)]
pub enum OpKind {
    ReadFile,
    ReadFiles,
    WriteFile,
    WriteFiles,
    Unlink,
    UnlinkMany,
    Readdir,
    Mkdir,
    Rmdir,
    Rename,
    Stat,
    Lstat,
    Readlink,
    Symlink,
    BackFile,
    Du,
    Flush,
}

/// Argument shapes, and how each is normalized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Normalizer {
    /// `(path, options)`
    PathOpts,
    /// `(paths, options)`
    PathsOpts,
    /// `(path, data, options)`
    PathDataOpts,
    /// `([(path, data)], options)`
    PathsDataOpts,
    /// `(path, path)`, both normalized
    PathPath,
    /// no arguments
    None,
}

/// Static description of one operation kind.
#[derive(Debug)]
pub struct OpDescriptor {
    pub kind: OpKind,
    pub name: &'static str,
    pub normalizer: Normalizer,
    /// Mutating operations request a checkpoint when they finish.
    pub mutating: bool,
}

const fn op(
    kind: OpKind,
    name: &'static str,
    normalizer: Normalizer,
    mutating: bool,
) -> OpDescriptor {
    OpDescriptor {
        kind,
        name,
        normalizer,
        mutating,
    }
}

/// Indexed by `OpKind as usize`.
static DESCRIPTORS: [OpDescriptor; 17] = [
    op(OpKind::ReadFile, "readFile", Normalizer::PathOpts, false),
    op(OpKind::ReadFiles, "readFiles", Normalizer::PathsOpts, false),
    op(OpKind::WriteFile, "writeFile", Normalizer::PathDataOpts, true),
    op(OpKind::WriteFiles, "writeFiles", Normalizer::PathsDataOpts, true),
    op(OpKind::Unlink, "unlink", Normalizer::PathOpts, true),
    op(OpKind::UnlinkMany, "unlinkMany", Normalizer::PathsOpts, true),
    op(OpKind::Readdir, "readdir", Normalizer::PathOpts, false),
    op(OpKind::Mkdir, "mkdir", Normalizer::PathOpts, true),
    op(OpKind::Rmdir, "rmdir", Normalizer::PathOpts, true),
    op(OpKind::Rename, "rename", Normalizer::PathPath, true),
    op(OpKind::Stat, "stat", Normalizer::PathOpts, false),
    op(OpKind::Lstat, "lstat", Normalizer::PathOpts, false),
    op(OpKind::Readlink, "readlink", Normalizer::PathOpts, false),
    op(OpKind::Symlink, "symlink", Normalizer::PathPath, true),
    op(OpKind::BackFile, "backFile", Normalizer::PathOpts, true),
    op(OpKind::Du, "du", Normalizer::PathOpts, false),
    op(OpKind::Flush, "flush", Normalizer::None, false),
];

impl OpKind {
    pub fn descriptor(self) -> &'static OpDescriptor {
        &DESCRIPTORS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    pub fn is_mutating(self) -> bool {
        self.descriptor().mutating
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arguments of one call.
#[derive(Debug, Clone, PartialEq)]
pub enum OpArgs {
    Path {
        path: String,
        opts: OpOptions,
    },
    Paths {
        paths: Vec<String>,
        opts: OpOptions,
    },
    PathData {
        path: String,
        data: FileData,
        opts: OpOptions,
    },
    PathsData {
        entries: Vec<(String, FileData)>,
        opts: OpOptions,
    },
    /// `rename(from, to)`, or `symlink(target, path)` as `from`/`to`.
    PathPath {
        from: String,
        to: String,
    },
    None,
}

impl OpArgs {
    fn shape(&self) -> Normalizer {
        match self {
            OpArgs::Path { .. } => Normalizer::PathOpts,
            OpArgs::Paths { .. } => Normalizer::PathsOpts,
            OpArgs::PathData { .. } => Normalizer::PathDataOpts,
            OpArgs::PathsData { .. } => Normalizer::PathsDataOpts,
            OpArgs::PathPath { .. } => Normalizer::PathPath,
            OpArgs::None => Normalizer::None,
        }
    }
}

/// Short form for diagnostics: paths, never file content.
impl fmt::Display for OpArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpArgs::Path { path, .. } => write!(f, "{path}"),
            OpArgs::Paths { paths, .. } => write!(f, "[{}]", paths.join(", ")),
            OpArgs::PathData { path, data, .. } => write!(f, "{path} ({} bytes)", data.len()),
            OpArgs::PathsData { entries, .. } => write!(f, "{} files", entries.len()),
            OpArgs::PathPath { from, to } => write!(f, "{from} -> {to}"),
            OpArgs::None => Ok(()),
        }
    }
}

fn check_opts(opts: &OpOptions) -> FsResult<()> {
    match &opts.encoding {
        Some(Encoding::Unsupported(name)) => Err(FsError::invalid_argument(format!(
            "unsupported encoding: {name}"
        ))),
        _ => Ok(()),
    }
}

impl Normalizer {
    /// Canonicalize `args`. Pure; fails only on malformed input.
    pub fn apply(self, args: OpArgs) -> FsResult<OpArgs> {
        if args.shape() != self {
            return Err(FsError::invalid_argument(format!(
                "expected {self:?} arguments, got {:?}",
                args.shape()
            )));
        }
        Ok(match args {
            OpArgs::Path { path, opts } => {
                check_opts(&opts)?;
                OpArgs::Path {
                    path: path::normalize(&path)?,
                    opts,
                }
            }
            OpArgs::Paths { paths, opts } => {
                check_opts(&opts)?;
                OpArgs::Paths {
                    paths: paths
                        .iter()
                        .map(|p| path::normalize(p))
                        .collect::<FsResult<_>>()?,
                    opts,
                }
            }
            OpArgs::PathData { path, data, opts } => {
                check_opts(&opts)?;
                OpArgs::PathData {
                    path: path::normalize(&path)?,
                    data,
                    opts,
                }
            }
            OpArgs::PathsData { entries, opts } => {
                check_opts(&opts)?;
                OpArgs::PathsData {
                    entries: entries
                        .into_iter()
                        .map(|(p, data)| Ok((path::normalize(&p)?, data)))
                        .collect::<FsResult<_>>()?,
                    opts,
                }
            }
            OpArgs::PathPath { from, to } => OpArgs::PathPath {
                from: path::normalize(&from)?,
                to: path::normalize(&to)?,
            },
            OpArgs::None => OpArgs::None,
        })
    }
}

/// Result of one call.
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutput {
    Unit,
    Data(FileData),
    DataList(Vec<Option<FileData>>),
    Names(Vec<String>),
    Stat(Stat),
    Target(String),
    Size(u64),
}

fn mismatch(expected: &str, got: &OpOutput) -> FsError {
    FsError::other(format!("expected {expected} output, got {got:?}"))
}

impl OpOutput {
    pub fn into_unit(self) -> FsResult<()> {
        match self {
            OpOutput::Unit => Ok(()),
            other => Err(mismatch("unit", &other)),
        }
    }

    pub fn into_data(self) -> FsResult<FileData> {
        match self {
            OpOutput::Data(data) => Ok(data),
            other => Err(mismatch("data", &other)),
        }
    }

    pub fn into_data_list(self) -> FsResult<Vec<Option<FileData>>> {
        match self {
            OpOutput::DataList(list) => Ok(list),
            other => Err(mismatch("data list", &other)),
        }
    }

    pub fn into_names(self) -> FsResult<Vec<String>> {
        match self {
            OpOutput::Names(names) => Ok(names),
            other => Err(mismatch("names", &other)),
        }
    }

    pub fn into_stat(self) -> FsResult<Stat> {
        match self {
            OpOutput::Stat(stat) => Ok(stat),
            other => Err(mismatch("stat", &other)),
        }
    }

    pub fn into_target(self) -> FsResult<String> {
        match self {
            OpOutput::Target(target) => Ok(target),
            other => Err(mismatch("link target", &other)),
        }
    }

    pub fn into_size(self) -> FsResult<u64> {
        match self {
            OpOutput::Size(size) => Ok(size),
            other => Err(mismatch("size", &other)),
        }
    }
}

/// Route a normalized call to the backend. Backend errors are returned
/// unchanged.
pub(crate) async fn invoke(
    backend: &dyn Backend,
    kind: OpKind,
    args: &OpArgs,
) -> FsResult<OpOutput> {
    use OpArgs as A;
    use OpKind as K;

    let out = match (kind, args) {
        (K::ReadFile, A::Path { path, opts }) => {
            OpOutput::Data(backend.read_file(path, opts).await?)
        }
        (K::ReadFiles, A::Paths { paths, opts }) => {
            OpOutput::DataList(backend.read_files(paths, opts).await?)
        }
        (K::WriteFile, A::PathData { path, data, opts }) => {
            backend.write_file(path, data, opts).await?;
            OpOutput::Unit
        }
        (K::WriteFiles, A::PathsData { entries, opts }) => {
            backend.write_files(entries, opts).await?;
            OpOutput::Unit
        }
        (K::Unlink, A::Path { path, opts }) => {
            backend.unlink(path, opts).await?;
            OpOutput::Unit
        }
        (K::UnlinkMany, A::Paths { paths, opts }) => {
            backend.unlink_many(paths, opts).await?;
            OpOutput::Unit
        }
        (K::Readdir, A::Path { path, opts }) => OpOutput::Names(backend.readdir(path, opts).await?),
        (K::Mkdir, A::Path { path, opts }) => {
            backend.mkdir(path, opts).await?;
            OpOutput::Unit
        }
        (K::Rmdir, A::Path { path, opts }) => {
            backend.rmdir(path, opts).await?;
            OpOutput::Unit
        }
        (K::Rename, A::PathPath { from, to }) => {
            backend.rename(from, to).await?;
            OpOutput::Unit
        }
        (K::Stat, A::Path { path, opts }) => OpOutput::Stat(backend.stat(path, opts).await?),
        (K::Lstat, A::Path { path, opts }) => OpOutput::Stat(backend.lstat(path, opts).await?),
        (K::Readlink, A::Path { path, opts }) => {
            OpOutput::Target(backend.readlink(path, opts).await?)
        }
        (K::Symlink, A::PathPath { from, to }) => {
            backend.symlink(from, to).await?;
            OpOutput::Unit
        }
        (K::BackFile, A::Path { path, opts }) => {
            backend.back_file(path, opts).await?;
            OpOutput::Unit
        }
        (K::Du, A::Path { path, .. }) => OpOutput::Size(backend.du(path).await?),
        (K::Flush, A::None) => {
            backend.flush().await?;
            OpOutput::Unit
        }
        (kind, args) => {
            return Err(FsError::invalid_argument(format!(
                "{kind} does not take {:?} arguments",
                args.shape()
            )));
        }
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_descriptor_table_is_indexed_by_kind() {
        for kind in OpKind::iter() {
            assert_eq!(kind.descriptor().kind, kind);
        }
        assert_eq!(OpKind::iter().count(), DESCRIPTORS.len());
    }

    #[test]
    fn test_mutating_classification() {
        let mutating: Vec<OpKind> = OpKind::iter().filter(|k| k.is_mutating()).collect();
        assert_eq!(
            mutating,
            vec![
                OpKind::WriteFile,
                OpKind::WriteFiles,
                OpKind::Unlink,
                OpKind::UnlinkMany,
                OpKind::Mkdir,
                OpKind::Rmdir,
                OpKind::Rename,
                OpKind::Symlink,
                OpKind::BackFile,
            ]
        );
    }

    #[test]
    fn test_names_parse_back() {
        for kind in OpKind::iter() {
            assert_eq!(OpKind::from_str(kind.name()).unwrap(), kind);
        }
        assert_eq!(OpKind::from_str("READFILE").unwrap(), OpKind::ReadFile);
        assert_eq!(OpKind::UnlinkMany.to_string(), "unlinkMany");
    }

    #[test]
    fn test_normalize_paths() {
        let args = Normalizer::PathsDataOpts
            .apply(OpArgs::PathsData {
                entries: vec![("a//b/".into(), "x".into()), ("/c/../d".into(), "y".into())],
                opts: OpOptions::default(),
            })
            .unwrap();
        let OpArgs::PathsData { entries, .. } = args else {
            panic!("shape changed");
        };
        assert_eq!(entries[0].0, "/a/b");
        assert_eq!(entries[1].0, "/d");

        let args = Normalizer::PathPath
            .apply(OpArgs::PathPath {
                from: "target".into(),
                to: "/dir/./link".into(),
            })
            .unwrap();
        assert_eq!(
            args,
            OpArgs::PathPath {
                from: "/target".into(),
                to: "/dir/link".into()
            }
        );
    }

    #[test]
    fn test_normalize_rejects_bad_input() {
        let err = Normalizer::PathOpts
            .apply(OpArgs::Path {
                path: "".into(),
                opts: OpOptions::default(),
            })
            .unwrap_err();
        assert!(matches!(err, FsError::InvalidPath(_)));

        let err = Normalizer::PathOpts
            .apply(OpArgs::Path {
                path: "/x".into(),
                opts: "latin1".into(),
            })
            .unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument(_)));

        let err = Normalizer::None
            .apply(OpArgs::Path {
                path: "/x".into(),
                opts: OpOptions::default(),
            })
            .unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument(_)));
    }

    #[test]
    fn test_args_display_omits_content() {
        let args = OpArgs::PathData {
            path: "/secret".into(),
            data: "hunter2".into(),
            opts: OpOptions::default(),
        };
        assert_eq!(args.to_string(), "/secret (7 bytes)");
    }

    #[test]
    fn test_output_conversions() {
        assert_eq!(OpOutput::Size(4).into_size().unwrap(), 4);
        assert!(OpOutput::Unit.into_stat().is_err());
    }
}
