//! Architecture enforcement tests.
//!
//! The crate is layered: `core` at the bottom, then `cache`, then the
//! `engine` that routes layer edits into a cache, with `edit` builders on
//! the side. These tests keep the layering honest by scanning sources.
//!
//! # Test Categories
//!
//! 1. **Layer Imports** - Lower modules must not import upper ones
//! 2. **Edit Builders** - Builders compute edits and never author them
//! 3. **Library Panics** - No `unwrap()` outside tests

use std::fs;
use std::path::{Path, PathBuf};

/// Every `.rs` file under `dir`, recursively, in a stable order.
fn rust_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(next) = pending.pop() {
        for entry in fs::read_dir(&next).unwrap_or_else(|_| panic!("Failed to read {}", next.display())) {
            let path = entry.expect("Failed to read entry").path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().map(|e| e == "rs").unwrap_or(false) {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

/// Source lines that are code, up to the first test module.
fn code_lines(path: &Path) -> Vec<(usize, String)> {
    let content = fs::read_to_string(path).unwrap_or_else(|_| panic!("Failed to read {}", path.display()));
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .filter(|(_, line)| !line.trim_start().starts_with("//"))
        .map(|(i, line)| (i + 1, line.to_string()))
        .collect()
}

fn violations(dir: &str, forbidden: &[&str]) -> Vec<String> {
    let mut found = Vec::new();
    for file in rust_files(Path::new(dir)) {
        for (line_no, line) in code_lines(&file) {
            for pattern in forbidden {
                if line.contains(pattern) {
                    found.push(format!("{}:{}: uses `{}`", file.display(), line_no, pattern));
                }
            }
        }
    }
    found
}

// =============================================================================
// Layer Imports
// =============================================================================

#[test]
fn core_does_not_import_upper_layers() {
    let found = violations("src/core", &["crate::cache", "crate::engine", "crate::edit"]);
    assert!(found.is_empty(), "core reaches up:\n{}", found.join("\n"));
}

#[test]
fn cache_does_not_import_edit_builders() {
    let found = violations("src/cache", &["crate::edit"]);
    assert!(found.is_empty(), "cache depends on edit builders:\n{}", found.join("\n"));
}

#[test]
fn edit_builders_do_not_process_changes() {
    let found = violations("src/edit", &["crate::engine"]);
    assert!(found.is_empty(), "edit builders reach into the engine:\n{}", found.join("\n"));
}

// =============================================================================
// Edit Builders
// =============================================================================

/// Builders hand edits back to the caller; authoring them is the caller's
/// job, and so is sending the change lists through a change scope.
#[test]
fn edit_builders_never_author_layers() {
    let authoring = [
        ".set_relocates(",
        ".add_sublayer(",
        ".remove_sublayer(",
        ".create_prim_spec(",
        ".remove_prim_spec(",
    ];
    let found = violations("src/edit", &authoring);
    assert!(found.is_empty(), "edit builders author layers:\n{}", found.join("\n"));
}

// =============================================================================
// Library Panics
// =============================================================================

/// Library code propagates errors instead of unwrapping them.
#[test]
fn library_code_does_not_unwrap() {
    let mut found = Vec::new();
    for dir in ["src/core", "src/cache", "src/engine", "src/edit"] {
        found.extend(violations(dir, &[".unwrap()", ".expect(\""]));
    }
    assert!(found.is_empty(), "unwrap in library code:\n{}", found.join("\n"));
}

#[test]
fn lint_sees_every_module() {
    for dir in ["src/core", "src/cache", "src/engine", "src/edit"] {
        assert!(
            !rust_files(Path::new(dir)).is_empty(),
            "{dir} has no sources; the lint would pass vacuously"
        );
    }
}
