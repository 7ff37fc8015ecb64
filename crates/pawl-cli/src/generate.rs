//! Story runner generation.
//!
//! Scans a stories root for `.story` files and writes one runner per story,
//! each a `pawl::web_story!` invocation named after the file
//! (`checkout/long_loaded_demo.story` becomes `checkout.LongLoadedDemoIT`),
//! plus a `runners.rs` index including them all. Output is deterministic:
//! files are visited in sorted order and only rewritten when their content
//! changes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CliError, CliResult};

/// Extension of story files
pub const STORY_EXTENSION: &str = "story";

/// Name of the generated index file
pub const INDEX_FILE: &str = "runners.rs";

const HEADER: &str = "// Generated by `pawl generate`. Do not edit.\n";

const RUNNER_SUFFIX: &str = "IT";

/// A runner written (or already up to date) for one story
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedRunner {
    /// Story path relative to the stories root
    pub story: PathBuf,
    /// Dotted name, e.g. `checkout.LongLoadedDemoIT`
    pub qualified_name: String,
    /// Runner file relative to the output directory
    pub file: PathBuf,
    /// False when the file already had this content
    pub written: bool,
}

/// A story that got no runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedStory {
    /// Story path relative to the stories root
    pub story: PathBuf,
    /// Why it was skipped
    pub reason: String,
}

/// Outcome of a generation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationReport {
    /// Runners, in story order
    pub generated: Vec<GeneratedRunner>,
    /// Stories skipped on collisions or write errors
    pub skipped: Vec<SkippedStory>,
}

impl GenerationReport {
    /// Number of files rewritten by this run
    #[must_use]
    pub fn written_count(&self) -> usize {
        self.generated.iter().filter(|r| r.written).count()
    }
}

/// `.story` files under `root`, relative to it and sorted
pub fn find_stories(root: &Path) -> CliResult<Vec<PathBuf>> {
    let mut stories = Vec::new();
    collect_stories(root, Path::new(""), &mut stories)?;
    stories.sort();
    Ok(stories)
}

fn collect_stories(root: &Path, relative: &Path, out: &mut Vec<PathBuf>) -> CliResult<()> {
    let mut entries: Vec<_> = fs::read_dir(root.join(relative))?
        .filter_map(Result::ok)
        .collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = relative.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_stories(root, &path, out)?;
        } else if path.extension().is_some_and(|ext| ext == STORY_EXTENSION) {
            out.push(path);
        }
    }
    Ok(())
}

/// Dotted package of a story path, with a trailing `.` when non-empty
#[must_use]
pub fn package_of(story: &Path) -> String {
    let parent = story
        .parent()
        .map(|p| p.to_string_lossy().replace(['/', '\\'], "."))
        .unwrap_or_default();
    if parent.is_empty() {
        parent
    } else {
        format!("{parent}.")
    }
}

/// `long_loaded_demo.story` becomes `LongLoadedDemo`
#[must_use]
pub fn class_name(file_name: &str) -> String {
    let stem = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem);
    stem.split('_').filter(|t| !t.is_empty()).map(capitalize).collect()
}

/// Package, class name and `IT` suffix of a story path
#[must_use]
pub fn qualified_name(story: &Path) -> String {
    let file_name = story
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(
        "{}{}{RUNNER_SUFFIX}",
        package_of(story),
        class_name(&file_name)
    )
}

/// Rust identifier for `name`: characters invalid in identifiers separate
/// title-cased words and a leading non-letter gets a `_` prefix
#[must_use]
pub fn rust_ident(name: &str) -> String {
    let mut words = name.split(|c: char| !(c.is_alphanumeric() || c == '_'));
    let first = words.next().unwrap_or_default().to_string();
    let ident: String = std::iter::once(first)
        .chain(words.filter(|w| !w.is_empty()).map(capitalize))
        .collect();
    match ident.chars().next() {
        None => "_".to_string(),
        Some(c) if !(c.is_alphabetic() || c == '_') => format!("_{ident}"),
        Some(_) => ident,
    }
}

fn capitalize(token: &str) -> String {
    let mut chars = token.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Module of a runner in the index: sanitised directories and the runner
/// identifier joined with `__`
fn module_name(dir: &Path, ident: &str) -> String {
    dir.components()
        .map(|c| rust_ident(&c.as_os_str().to_string_lossy()))
        .chain(std::iter::once(ident.to_string()))
        .collect::<Vec<_>>()
        .join("__")
}

fn runner_source(ident: &str, story: &Path) -> String {
    let story = story.to_string_lossy().replace('\\', "/");
    format!("{HEADER}\npawl::web_story!({ident}, {story:?});\n")
}

fn index_source(modules: &[(String, String)]) -> String {
    let mut source = String::from(HEADER);
    for (module, file) in modules {
        source.push_str(&format!(
            "\n#[allow(non_snake_case)]\n#[path = {file:?}]\nmod {module};\n"
        ));
    }
    source
}

/// Write `content` unless `path` already holds it; true if written
fn write_if_changed(path: &Path, content: &str) -> std::io::Result<bool> {
    if fs::read_to_string(path).is_ok_and(|existing| existing == content) {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(true)
}

/// Generate one runner per story under `stories` into `output`
pub fn generate(stories: &Path, output: &Path) -> CliResult<GenerationReport> {
    if !stories.is_dir() {
        return Err(CliError::generation(format!(
            "stories directory not found: {}",
            stories.display()
        )));
    }

    let mut report = GenerationReport::default();
    let mut seen: HashMap<String, String> = HashMap::new();
    let mut modules = Vec::new();

    for story in find_stories(stories)? {
        let qualified = qualified_name(&story);
        let file_name = story
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ident = rust_ident(&format!("{}{RUNNER_SUFFIX}", class_name(&file_name)));
        let dir = story.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        let file = dir.join(format!("{ident}.rs"));
        let module = module_name(&dir, &ident);

        if let Some(previous) = seen.get(&module) {
            let reason =
                format!("runner {qualified} already generated for {previous} as module {module}");
            tracing::error!(story = %story.display(), "{reason}");
            report.skipped.push(SkippedStory { story, reason });
            continue;
        }

        let source = runner_source(&ident, &story);
        match write_if_changed(&output.join(&file), &source) {
            Ok(written) => {
                tracing::debug!(runner = %qualified, written, "story runner");
                seen.insert(module.clone(), story.display().to_string());
                modules.push((module, file.to_string_lossy().replace('\\', "/")));
                report.generated.push(GeneratedRunner {
                    story,
                    qualified_name: qualified,
                    file,
                    written,
                });
            }
            Err(e) => {
                let reason = format!("cannot write {}: {e}", file.display());
                tracing::error!(story = %story.display(), "{reason}");
                report.skipped.push(SkippedStory { story, reason });
            }
        }
    }

    write_if_changed(&output.join(INDEX_FILE), &index_source(&modules))?;
    tracing::info!("Test source directory: {} added.", output.display());
    Ok(report)
}
