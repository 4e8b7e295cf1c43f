//! Filesystem stages for rearranging the workspace.
//!
//! These cover the directory shuffling a release usually needs: copying
//! unmanaged files from the project into the build, moving bundled
//! directories around and deleting leftovers.

use super::Stage;
use crate::context::{is_symlink, StageContext};
use crate::core::StageOutput;
use async_trait::async_trait;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// A filesystem operation.
///
/// Paths are relative. `Copy::from` is resolved against the source
/// directory, every other path against the workspace. Paths whose
/// directories go through a symlink are refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsOperation {
    /// Recursively copy a file or directory from the source directory into
    /// the workspace. A trailing `/` on `to` (or an existing directory)
    /// copies *into* that directory. A `from` containing `*`, `?` or `[`
    /// is a wildcard pattern; every match is copied into `to`. Symlinks are
    /// copied as links.
    Copy {
        /// Source-relative path or pattern.
        from: String,
        /// Workspace-relative destination.
        to: String,
    },
    /// Move every entry of one workspace directory into another, replacing
    /// entries that already exist.
    MoveContents {
        /// Workspace-relative directory to empty.
        from: String,
        /// Workspace-relative destination directory.
        to: String,
    },
    /// Remove a file or directory. A missing path is not an error. A
    /// symlink is removed, never followed.
    Remove {
        /// Workspace-relative path.
        path: String,
    },
    /// Create a directory (and its parents).
    Mkdir {
        /// Workspace-relative path.
        path: String,
    },
}

/// A stage performing one [`FsOperation`].
#[derive(Debug, Clone)]
pub struct FsStage {
    name: String,
    operation: FsOperation,
}

impl FsStage {
    /// Creates a new filesystem stage.
    #[must_use]
    pub fn new(name: impl Into<String>, operation: FsOperation) -> Self {
        Self {
            name: name.into(),
            operation,
        }
    }

    /// Returns the operation.
    #[must_use]
    pub const fn operation(&self) -> &FsOperation {
        &self.operation
    }
}

#[async_trait]
impl Stage for FsStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        let guard = ctx.blocking_guard().await;
        let operation = self.operation.clone();
        let ctx = ctx.clone();

        let work = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            resolve(&operation, &ctx).and_then(|resolved| apply(&resolved, &ctx))
        });
        match work.await {
            Ok(Ok(summary)) => StageOutput::ok_with_output(summary),
            Ok(Err(e)) => StageOutput::fail(e),
            Err(e) => StageOutput::fail(format!("filesystem task failed: {e}")),
        }
    }
}

#[derive(Debug)]
enum Resolved {
    Copy { sources: Vec<PathBuf>, to: PathBuf, into: bool },
    MoveContents { from: PathBuf, to: PathBuf },
    Remove(PathBuf),
    Mkdir(PathBuf),
}

fn resolve(op: &FsOperation, ctx: &StageContext) -> Result<Resolved, String> {
    Ok(match op {
        FsOperation::Copy { from, to } => {
            let pattern = is_pattern(from);
            let sources = if pattern {
                expand_pattern(ctx, from)?
            } else {
                vec![ctx.source_path(from)?]
            };
            Resolved::Copy {
                sources,
                into: pattern || to.ends_with('/'),
                to: real_path(ctx.workspace_path(to)?)?,
            }
        }
        FsOperation::MoveContents { from, to } => Resolved::MoveContents {
            from: real_path(ctx.workspace_path(from)?)?,
            to: real_path(ctx.workspace_path(to)?)?,
        },
        FsOperation::Remove { path } => Resolved::Remove(ctx.workspace_path(path)?),
        FsOperation::Mkdir { path } => Resolved::Mkdir(real_path(ctx.workspace_path(path)?)?),
    })
}

fn is_pattern(path: &str) -> bool {
    path.contains(|c: char| matches!(c, '*' | '?' | '['))
}

/// Expands a source-relative pattern. Every match must be contained too.
fn expand_pattern(ctx: &StageContext, pattern: &str) -> Result<Vec<PathBuf>, String> {
    let base = ctx.source_dir();
    // Lexical check only; the pattern itself is not a real path.
    ctx.source_path(pattern)?;
    let full = Path::new(&glob::Pattern::escape(&base.to_string_lossy())).join(pattern);

    // glob drops leading `./` from its matches.
    let prefix: PathBuf = base
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();

    let mut matches = Vec::new();
    let paths = glob::glob(&full.to_string_lossy())
        .map_err(|e| format!("invalid pattern '{pattern}': {e}"))?;
    for entry in paths {
        let path = entry.map_err(|e| format!("reading matches of '{pattern}': {e}"))?;
        let relative = path
            .strip_prefix(&prefix)
            .map_err(|_| format!("match {} is outside {}", path.display(), base.display()))?;
        matches.push(ctx.source_path(&relative.to_string_lossy())?);
    }
    if matches.is_empty() {
        return Err(format!("no files match '{pattern}'"));
    }
    Ok(matches)
}

/// Refuses a symlink as the last component of a path that is written
/// through or read as a directory.
fn real_path(path: PathBuf) -> Result<PathBuf, String> {
    if is_symlink(&path) {
        Err(format!("refusing to follow symlink {}", path.display()))
    } else {
        Ok(path)
    }
}

fn apply(op: &Resolved, ctx: &StageContext) -> Result<String, String> {
    match op {
        Resolved::Copy { sources, to, into } => {
            let mut count = 0;
            for from in sources {
                let dest = if *into || to.is_dir() {
                    let name = from
                        .file_name()
                        .ok_or_else(|| format!("cannot copy {}: no file name", from.display()))?;
                    to.join(name)
                } else {
                    to.clone()
                };
                count += copy_recursive(from, &dest, ctx)
                    .map_err(|e| format!("copy {} -> {}: {e}", from.display(), dest.display()))?;
            }
            Ok(format!("copied {count} file(s) to {}", to.display()))
        }
        Resolved::MoveContents { from, to } => {
            let count = move_contents(from, to, ctx)
                .map_err(|e| format!("move {}/* -> {}: {e}", from.display(), to.display()))?;
            Ok(format!("moved {count} entries into {}", to.display()))
        }
        Resolved::Remove(path) => {
            let removed = remove_path(path).map_err(|e| format!("remove {}: {e}", path.display()))?;
            Ok(if removed {
                format!("removed {}", path.display())
            } else {
                format!("{} did not exist", path.display())
            })
        }
        Resolved::Mkdir(path) => {
            fs::create_dir_all(path).map_err(|e| format!("mkdir {}: {e}", path.display()))?;
            Ok(format!("created {}", path.display()))
        }
    }
}

fn ensure_running(ctx: &StageContext) -> io::Result<()> {
    if ctx.is_cancelled() {
        Err(io::Error::new(io::ErrorKind::Interrupted, "run cancelled"))
    } else {
        Ok(())
    }
}

/// Copies a file or directory tree, overwriting existing files.
/// Returns the number of files copied.
///
/// Links in the source are recreated, not followed. A link already at the
/// destination is replaced, never written through.
fn copy_recursive(from: &Path, to: &Path, ctx: &StageContext) -> io::Result<usize> {
    ensure_running(ctx)?;
    let file_type = fs::symlink_metadata(from)?.file_type();
    if is_symlink(to) {
        fs::remove_file(to)?;
    }

    if file_type.is_dir() {
        fs::create_dir_all(to)?;
        let mut count = 0;
        for entry in fs::read_dir(from)? {
            let entry = entry?;
            count += copy_recursive(&entry.path(), &to.join(entry.file_name()), ctx)?;
        }
        Ok(count)
    } else {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        if file_type.is_symlink() {
            remove_path(to)?;
            copy_link(from, to)?;
        } else {
            fs::copy(from, to)?;
        }
        Ok(1)
    }
}

#[cfg(unix)]
fn copy_link(from: &Path, to: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(from)?, to)
}

#[cfg(not(unix))]
fn copy_link(from: &Path, _to: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot copy symlink {}", from.display()),
    ))
}

fn move_contents(from: &Path, to: &Path, ctx: &StageContext) -> io::Result<usize> {
    fs::create_dir_all(to)?;
    let mut count = 0;
    for entry in fs::read_dir(from)? {
        ensure_running(ctx)?;
        let entry = entry?;
        let dest = to.join(entry.file_name());
        remove_path(&dest)?;
        fs::rename(entry.path(), &dest)?;
        count += 1;
    }
    Ok(count)
}

fn remove_path(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).map(|()| true),
        Ok(_) => fs::remove_file(path).map(|()| true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::context::{PipelineContext, RunIdentity};
    use crate::stages::test_support::stage_context;
    use std::sync::Arc;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn test_copy_directory_into_workspace() {
        let source = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        write(&source.path().join("web/app/plugins/extra/plugin.php"), "<?php");
        fs::create_dir_all(ws.path().join("web/app/plugins")).unwrap();

        let stage = FsStage::new(
            "copy",
            FsOperation::Copy {
                from: "web/app/plugins/extra".to_string(),
                to: "web/app/plugins/".to_string(),
            },
        );
        let output = stage.execute(&stage_context(ws.path(), source.path(), "copy")).await;

        assert!(output.is_success(), "{output:?}");
        assert!(ws.path().join("web/app/plugins/extra/plugin.php").exists());
    }

    #[tokio::test]
    async fn test_move_contents_replaces_existing() {
        let ws = tempfile::tempdir().unwrap();
        write(&ws.path().join("web/wp/wp-content/themes/twenty/style.css"), "new");
        write(&ws.path().join("web/wp/wp-content/themes/other/style.css"), "other");
        write(&ws.path().join("web/app/themes/twenty/style.css"), "old");

        let stage = FsStage::new(
            "themes",
            FsOperation::MoveContents {
                from: "web/wp/wp-content/themes".to_string(),
                to: "web/app/themes".to_string(),
            },
        );
        let output = stage.execute(&stage_context(ws.path(), ws.path(), "themes")).await;

        assert!(output.is_success(), "{output:?}");
        let moved = fs::read_to_string(ws.path().join("web/app/themes/twenty/style.css")).unwrap();
        assert_eq!(moved, "new");
        assert!(ws.path().join("web/app/themes/other/style.css").exists());
        assert_eq!(fs::read_dir(ws.path().join("web/wp/wp-content/themes")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_move_contents_missing_source_fails() {
        let ws = tempfile::tempdir().unwrap();
        let stage = FsStage::new(
            "plugins",
            FsOperation::MoveContents {
                from: "nope".to_string(),
                to: "web/app/plugins".to_string(),
            },
        );
        let output = stage.execute(&stage_context(ws.path(), ws.path(), "plugins")).await;
        assert!(output.is_failure());
    }

    #[tokio::test]
    async fn test_remove_is_forgiving() {
        let ws = tempfile::tempdir().unwrap();
        write(&ws.path().join("web/app/plugins/hello.php"), "<?php");
        let stage = FsStage::new(
            "hello",
            FsOperation::Remove {
                path: "web/app/plugins/hello.php".to_string(),
            },
        );
        let ctx = stage_context(ws.path(), ws.path(), "hello");

        assert!(stage.execute(&ctx).await.is_success());
        assert!(!ws.path().join("web/app/plugins/hello.php").exists());
        // Second run: already gone, still fine.
        assert!(stage.execute(&ctx).await.is_success());
    }

    #[tokio::test]
    async fn test_escaping_paths_fail() {
        let ws = tempfile::tempdir().unwrap();
        let stage = FsStage::new(
            "evil",
            FsOperation::Remove {
                path: "../outside".to_string(),
            },
        );
        let output = stage.execute(&stage_context(ws.path(), ws.path(), "evil")).await;
        assert!(output.error.unwrap().contains("must stay inside"));
    }

    #[tokio::test]
    async fn test_copy_wildcard_copies_every_match() {
        let source = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        write(&source.path().join("web/app/languages/de_DE.mo"), "de");
        write(&source.path().join("web/app/languages/fr_FR.mo"), "fr");
        write(&source.path().join("web/app/languages/plugins/akismet-de_DE.mo"), "ak");

        let stage = FsStage::new(
            "languages",
            FsOperation::Copy {
                from: "web/app/languages/*".to_string(),
                to: "web/app/languages".to_string(),
            },
        );
        let output = stage.execute(&stage_context(ws.path(), source.path(), "languages")).await;

        assert!(output.is_success(), "{output:?}");
        let dest = ws.path().join("web/app/languages");
        assert_eq!(fs::read_to_string(dest.join("fr_FR.mo")).unwrap(), "fr");
        assert!(dest.join("de_DE.mo").is_file());
        assert!(dest.join("plugins/akismet-de_DE.mo").is_file());
    }

    #[tokio::test]
    async fn test_copy_wildcard_without_matches_fails() {
        let source = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let stage = FsStage::new(
            "languages",
            FsOperation::Copy {
                from: "web/app/languages/*".to_string(),
                to: "web/app/languages/".to_string(),
            },
        );
        let output = stage.execute(&stage_context(ws.path(), source.path(), "languages")).await;
        assert!(output.error.unwrap().contains("no files match"));
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_filesystem_work() {
        let source = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        write(&source.path().join("web/app/uploads/a.jpg"), "a");

        let token = Arc::new(CancellationToken::new());
        let pipeline = PipelineContext::new(RunIdentity::new("test"), ws.path())
            .with_source_dir(source.path())
            .with_cancel_token(Arc::clone(&token));
        let ctx = StageContext::new(Arc::new(pipeline), "uploads");
        let stage = FsStage::new(
            "uploads",
            FsOperation::Copy {
                from: "web/app/uploads".to_string(),
                to: "web/app/".to_string(),
            },
        );
        token.cancel("stop");
        let output = stage.execute(&ctx).await;

        assert!(output.error.unwrap().contains("run cancelled"));
        assert!(!ws.path().join("web/app/uploads/a.jpg").exists());
    }

    #[cfg(unix)]
    mod symlinks {
        use super::*;
        use std::os::unix::fs::symlink;

        #[tokio::test]
        async fn test_remove_through_symlinked_directory_is_refused() {
            let ws = tempfile::tempdir().unwrap();
            let outside = tempfile::tempdir().unwrap();
            write(&outside.path().join("secret.txt"), "keep");
            symlink(outside.path(), ws.path().join("web")).unwrap();

            let stage = FsStage::new(
                "cleanup",
                FsOperation::Remove {
                    path: "web/secret.txt".to_string(),
                },
            );
            let output = stage.execute(&stage_context(ws.path(), ws.path(), "cleanup")).await;

            assert!(output.is_failure(), "{output:?}");
            assert!(outside.path().join("secret.txt").exists());
        }

        #[tokio::test]
        async fn test_remove_deletes_the_link_not_its_target() {
            let ws = tempfile::tempdir().unwrap();
            let outside = tempfile::tempdir().unwrap();
            write(&outside.path().join("secret.txt"), "keep");
            symlink(outside.path(), ws.path().join("web")).unwrap();

            let stage = FsStage::new("unlink", FsOperation::Remove { path: "web".to_string() });
            let output = stage.execute(&stage_context(ws.path(), ws.path(), "unlink")).await;

            assert!(output.is_success(), "{output:?}");
            assert!(fs::symlink_metadata(ws.path().join("web")).is_err());
            assert!(outside.path().join("secret.txt").exists());
        }

        #[tokio::test]
        async fn test_move_contents_into_symlink_is_refused() {
            let ws = tempfile::tempdir().unwrap();
            let outside = tempfile::tempdir().unwrap();
            write(&ws.path().join("web/wp/wp-content/themes/twenty/style.css"), "theme");
            fs::create_dir_all(ws.path().join("web/app")).unwrap();
            symlink(outside.path(), ws.path().join("web/app/themes")).unwrap();

            let stage = FsStage::new(
                "themes",
                FsOperation::MoveContents {
                    from: "web/wp/wp-content/themes".to_string(),
                    to: "web/app/themes".to_string(),
                },
            );
            let output = stage.execute(&stage_context(ws.path(), ws.path(), "themes")).await;

            assert!(output.error.unwrap().contains("symlink"));
            assert_eq!(fs::read_dir(outside.path()).unwrap().count(), 0);
            assert!(ws.path().join("web/wp/wp-content/themes/twenty").is_dir());
        }

        #[tokio::test]
        async fn test_copy_keeps_links_and_survives_cycles() {
            let source = tempfile::tempdir().unwrap();
            let ws = tempfile::tempdir().unwrap();
            write(&source.path().join("web/app/mu-plugins/loader.php"), "<?php");
            symlink("..", source.path().join("web/app/mu-plugins/parent")).unwrap();

            let stage = FsStage::new(
                "mu",
                FsOperation::Copy {
                    from: "web/app/mu-plugins".to_string(),
                    to: "web/app/".to_string(),
                },
            );
            let output = stage.execute(&stage_context(ws.path(), source.path(), "mu")).await;

            assert!(output.is_success(), "{output:?}");
            let link = ws.path().join("web/app/mu-plugins/parent");
            assert_eq!(fs::read_link(link).unwrap(), Path::new(".."));
            assert!(ws.path().join("web/app/mu-plugins/loader.php").is_file());
        }

        #[tokio::test]
        async fn test_copy_replaces_links_at_the_destination() {
            let source = tempfile::tempdir().unwrap();
            let ws = tempfile::tempdir().unwrap();
            let outside = tempfile::tempdir().unwrap();
            write(&source.path().join("config/app.php"), "new");
            write(&outside.path().join("app.php"), "outside");
            fs::create_dir_all(ws.path().join("config")).unwrap();
            symlink(outside.path().join("app.php"), ws.path().join("config/app.php")).unwrap();

            let stage = FsStage::new(
                "config",
                FsOperation::Copy {
                    from: "config/app.php".to_string(),
                    to: "config/".to_string(),
                },
            );
            let output = stage.execute(&stage_context(ws.path(), source.path(), "config")).await;

            assert!(output.is_success(), "{output:?}");
            assert_eq!(fs::read_to_string(outside.path().join("app.php")).unwrap(), "outside");
            assert_eq!(fs::read_to_string(ws.path().join("config/app.php")).unwrap(), "new");
            assert!(!is_symlink(&ws.path().join("config/app.php")));
        }
    }

    #[tokio::test]
    async fn test_mkdir() {
        let ws = tempfile::tempdir().unwrap();
        let stage = FsStage::new(
            "mkdir",
            FsOperation::Mkdir {
                path: "web/app/languages".to_string(),
            },
        );
        let output = stage.execute(&stage_context(ws.path(), ws.path(), "mkdir")).await;
        assert!(output.is_success());
        assert!(ws.path().join("web/app/languages").is_dir());
    }
}
