//! Textual patch executor.
//!
//! Patches arrive through the shell tool as `["apply_patch", <text>]`.
//! The envelope format:
//!
//! ```text
//! *** Begin Patch
//! *** Add File: path/new.rs
//! +line
//! *** Update File: path/existing.rs
//! @@ anchor line
//!  context
//! -removed
//! +added
//! *** Delete File: path/old.rs
//! *** End Patch
//! ```
//!
//! On success the caller reports exit code 0 with a per-file summary; any
//! parse or application failure maps to a non-zero exit with the
//! diagnostic.

use std::path::{Path, PathBuf};

use tether_domain::error::{Error, Result};

const BEGIN_MARKER: &str = "*** Begin Patch";
const END_MARKER: &str = "*** End Patch";
const ADD_PREFIX: &str = "*** Add File: ";
const UPDATE_PREFIX: &str = "*** Update File: ";
const DELETE_PREFIX: &str = "*** Delete File: ";

#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    Add { path: String, content: String },
    Update { path: String, hunks: Vec<Hunk> },
    Delete { path: String },
}

impl PatchOp {
    pub fn path(&self) -> &str {
        match self {
            PatchOp::Add { path, .. } | PatchOp::Update { path, .. } | PatchOp::Delete { path } => {
                path
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hunk {
    /// Optional `@@` anchor line narrowing where the hunk applies.
    pub anchor: Option<String>,
    pub lines: Vec<HunkLine>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse the patch envelope into file operations.
pub fn parse_patch(input: &str) -> Result<Vec<PatchOp>> {
    let start = input
        .find(BEGIN_MARKER)
        .ok_or_else(|| Error::Other(format!("'{BEGIN_MARKER}' not found")))?;
    let end = input
        .find(END_MARKER)
        .ok_or_else(|| Error::Other(format!("'{END_MARKER}' not found")))?;
    if end < start {
        return Err(Error::Other(format!(
            "'{END_MARKER}' appears before '{BEGIN_MARKER}'"
        )));
    }

    let body = &input[start + BEGIN_MARKER.len()..end];
    let lines: Vec<&str> = body.lines().collect();
    let mut ops = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if line.trim().is_empty() {
            i += 1;
        } else if let Some(path) = line.strip_prefix(ADD_PREFIX) {
            i += 1;
            let mut content = String::new();
            while i < lines.len() {
                match lines[i].strip_prefix('+') {
                    Some(added) => {
                        content.push_str(added);
                        content.push('\n');
                        i += 1;
                    }
                    None => break,
                }
            }
            ops.push(PatchOp::Add {
                path: path.trim().to_string(),
                content,
            });
        } else if let Some(path) = line.strip_prefix(DELETE_PREFIX) {
            i += 1;
            ops.push(PatchOp::Delete {
                path: path.trim().to_string(),
            });
        } else if let Some(path) = line.strip_prefix(UPDATE_PREFIX) {
            i += 1;
            let mut hunks = Vec::new();
            while i < lines.len() && !lines[i].starts_with("*** ") {
                if lines[i].trim().is_empty() {
                    i += 1;
                    continue;
                }
                let anchor = if let Some(rest) = lines[i].strip_prefix("@@") {
                    i += 1;
                    let anchor = rest.trim();
                    (!anchor.is_empty()).then(|| anchor.to_string())
                } else {
                    None
                };
                let mut hunk_lines = Vec::new();
                while i < lines.len() {
                    let l = lines[i];
                    if l.starts_with("@@") || l.starts_with("*** ") {
                        break;
                    }
                    if let Some(text) = l.strip_prefix('+') {
                        hunk_lines.push(HunkLine::Add(text.to_string()));
                    } else if let Some(text) = l.strip_prefix('-') {
                        hunk_lines.push(HunkLine::Remove(text.to_string()));
                    } else if let Some(text) = l.strip_prefix(' ') {
                        hunk_lines.push(HunkLine::Context(text.to_string()));
                    } else if l.is_empty() {
                        hunk_lines.push(HunkLine::Context(String::new()));
                    } else {
                        return Err(Error::Other(format!(
                            "unrecognized hunk line: {l:?}"
                        )));
                    }
                    i += 1;
                }
                if hunk_lines.is_empty() && anchor.is_none() {
                    break;
                }
                hunks.push(Hunk {
                    anchor,
                    lines: hunk_lines,
                });
            }
            if hunks.is_empty() {
                return Err(Error::Other(format!("update for {path} has no hunks")));
            }
            ops.push(PatchOp::Update {
                path: path.trim().to_string(),
                hunks,
            });
        } else {
            return Err(Error::Other(format!("unrecognized patch line: {line:?}")));
        }
    }

    if ops.is_empty() {
        return Err(Error::Other("patch contains no file operations".into()));
    }
    Ok(ops)
}

/// The write targets of a patch, resolved against `root`. Used by the
/// approval layer's writable-roots check.
pub fn patch_targets(input: &str, root: &Path) -> Result<Vec<PathBuf>> {
    Ok(parse_patch(input)?
        .iter()
        .map(|op| {
            let p = Path::new(op.path());
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                root.join(p)
            }
        })
        .collect())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Application
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse and apply a patch under `root`. Returns the human-readable
/// summary of changes.
pub fn apply_patch(input: &str, root: &Path) -> Result<String> {
    let ops = parse_patch(input)?;
    let mut summary = vec!["Applied patch:".to_string()];

    for op in &ops {
        let path = {
            let p = Path::new(op.path());
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                root.join(p)
            }
        };
        match op {
            PatchOp::Add { content, .. } => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                std::fs::write(&path, content)?;
                summary.push(format!("  A {}", op.path()));
            }
            PatchOp::Delete { .. } => {
                if !path.exists() {
                    return Err(Error::Other(format!(
                        "cannot delete {}: file does not exist",
                        op.path()
                    )));
                }
                std::fs::remove_file(&path)?;
                summary.push(format!("  D {}", op.path()));
            }
            PatchOp::Update { hunks, .. } => {
                let original = std::fs::read_to_string(&path)
                    .map_err(|e| Error::Other(format!("cannot read {}: {e}", op.path())))?;
                let updated = apply_hunks(&original, hunks)
                    .map_err(|e| Error::Other(format!("hunk failed for {}: {e}", op.path())))?;
                std::fs::write(&path, updated)?;
                summary.push(format!("  M {}", op.path()));
            }
        }
    }

    Ok(summary.join("\n"))
}

/// Apply update hunks to file content.
fn apply_hunks(original: &str, hunks: &[Hunk]) -> Result<String> {
    let had_trailing_newline = original.ends_with('\n');
    let mut lines: Vec<String> = original.lines().map(str::to_string).collect();
    let mut cursor = 0usize;

    for hunk in hunks {
        let old: Vec<&str> = hunk
            .lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(t) | HunkLine::Remove(t) => Some(t.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect();
        let new: Vec<String> = hunk
            .lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(t) | HunkLine::Add(t) => Some(t.clone()),
                HunkLine::Remove(_) => None,
            })
            .collect();

        let search_from = match &hunk.anchor {
            Some(anchor) => lines[cursor..]
                .iter()
                .position(|l| l.trim() == anchor.trim())
                .map(|p| cursor + p)
                .ok_or_else(|| Error::Other(format!("anchor not found: {anchor:?}")))?,
            None => cursor,
        };

        if old.is_empty() {
            // Pure insertion after the anchor (or at the end of the file).
            let at = match hunk.anchor {
                Some(_) => search_from + 1,
                None => lines.len(),
            };
            let at = at.min(lines.len());
            lines.splice(at..at, new.iter().cloned());
            cursor = at + new.len();
            continue;
        }

        let pos = find_subsequence(&lines, &old, search_from)
            .ok_or_else(|| Error::Other(format!("context not found: {:?}", old.join("\\n"))))?;
        lines.splice(pos..pos + old.len(), new.iter().cloned());
        cursor = pos + new.len();
    }

    let mut out = lines.join("\n");
    if had_trailing_newline || out.is_empty() {
        out.push('\n');
    }
    Ok(out)
}

fn find_subsequence(haystack: &[String], needle: &[&str], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| {
        needle
            .iter()
            .enumerate()
            .all(|(j, want)| haystack[i + j] == *want)
    })
}
