//! Line-window reads, exposed through the shell tool as the
//! `read_chunk` first-arg literal.

use std::path::Path;

use tether_domain::error::Result;

pub const EOF_MARKER: &str = "-----EOF-----";

/// Return a line-numbered window of `file_name` (1-indexed, inclusive).
/// A range that runs past the end of the file is suffixed with the EOF
/// marker.
pub fn read_chunk(root: &Path, file_name: &str, start_line: usize, end_line: usize) -> Result<String> {
    let path = if Path::new(file_name).is_absolute() {
        Path::new(file_name).to_path_buf()
    } else {
        root.join(file_name)
    };
    let raw = std::fs::read_to_string(&path)?;
    let lines: Vec<&str> = raw.lines().collect();

    let start = start_line.max(1);
    let mut out = String::new();
    if start <= lines.len() {
        let end = end_line.min(lines.len());
        for (offset, line) in lines[start - 1..end].iter().enumerate() {
            out.push_str(&format!("{}: {line}\n", start + offset));
        }
    }
    if end_line > lines.len() {
        out.push_str(EOF_MARKER);
        out.push('\n');
    }
    Ok(out)
}
