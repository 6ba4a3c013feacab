//! Build driver: pull one task, write it, repeat.

use std::path::Path;
use std::sync::Arc;

use crate::build::error::BuildError;
use crate::build::manifest::BuildManifest;
use crate::build::tasks::{write_task, BuildTasks};
use crate::config::AppConfig;
use crate::observability::metrics;
use crate::render::orchestrator::Renderer;
use crate::render::shell::ShellParts;

/// Render every static route into `config.output_dir()` and write the
/// manifest into the dist directory.
pub async fn run_build(
    config: &AppConfig,
    renderer: Arc<Renderer>,
    shell: Arc<ShellParts>,
) -> Result<BuildManifest, BuildError> {
    let output_dir = config.output_dir();
    tokio::fs::create_dir_all(&output_dir)
        .await
        .map_err(|e| BuildError::io(&output_dir, e))?;

    if config.build.copy_public && config.paths.public_dir.is_dir() {
        let copied = copy_dir(&config.paths.public_dir, &output_dir)?;
        tracing::info!(files = copied, from = %config.paths.public_dir.display(), "Public files copied");
    }

    let mut tasks = BuildTasks::new(renderer.clone(), shell, &output_dir, &config.payload.prefix)?;
    let mut written = 0usize;
    while let Some(task) = tasks.next().await? {
        write_task(&task).await?;
        metrics::record_build_task(task.kind.as_str());
        tracing::debug!(
            task = task.kind.as_str(),
            pathname = task.pathname.as_deref().unwrap_or("-"),
            target = %task.target.display(),
            bytes = task.body.len(),
            "Build task written"
        );
        written += 1;
    }

    let manifest = BuildManifest {
        static_routes: tasks.static_files()?,
        dynamic: renderer.table().dynamic_patterns(),
        modules: tasks.modules().to_vec(),
    };
    manifest.write(&config.paths.dist_dir).await?;
    tracing::info!(
        files = written,
        static_pathnames = manifest.static_routes.len(),
        dynamic_patterns = manifest.dynamic.len(),
        output = %output_dir.display(),
        "Build complete"
    );
    Ok(manifest)
}

/// Recursive copy. Returns the number of files copied.
fn copy_dir(from: &Path, to: &Path) -> Result<usize, BuildError> {
    std::fs::create_dir_all(to).map_err(|e| BuildError::io(to, e))?;
    let mut copied = 0;
    for entry in std::fs::read_dir(from).map_err(|e| BuildError::io(from, e))? {
        let entry = entry.map_err(|e| BuildError::io(from, e))?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        if source.is_dir() {
            copied += copy_dir(&source, &target)?;
        } else {
            std::fs::copy(&source, &target).map_err(|e| BuildError::io(&source, e))?;
            copied += 1;
        }
    }
    Ok(copied)
}
