// ABOUTME: Path sanitization for user-supplied paths inside the sandbox
// ABOUTME: Normalizes segments and verifies resolved paths stay beneath their root

use crate::error::{Result, SandboxError};

/// Normalize a user-supplied relative path.
///
/// Leading `/` is stripped and empty, `.` and `..` segments are dropped.
/// Never fails; unusable input degrades to the empty (root) path.
pub fn sanitize(raw: &str) -> String {
    raw.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .map(|segment| segment.replace('\0', ""))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a sanitized path under `root`, rejecting anything that would escape it.
pub fn resolve(root: &str, raw: &str) -> Result<String> {
    let root = root.trim_end_matches('/');
    let relative = sanitize(raw);
    let joined = if relative.is_empty() {
        root.to_string()
    } else {
        format!("{}/{}", root, relative)
    };

    // Checked lexically on the joined result, independently of sanitize
    if !is_within(root, &joined) {
        return Err(SandboxError::PathTraversalRejected(raw.to_string()));
    }
    Ok(joined)
}

/// Lexical containment check after collapsing `.` and `..` segments
pub fn is_within(root: &str, candidate: &str) -> bool {
    let root = normalize(root);
    let candidate = normalize(candidate);
    if root.is_empty() {
        return true;
    }
    candidate == root || candidate.starts_with(&format!("{}/", root))
}

/// Parent directory of a sandbox path, if any
pub fn parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    trimmed.rfind('/').map(|idx| {
        if idx == 0 {
            "/"
        } else {
            &trimmed[..idx]
        }
    })
}

/// Restricted identifier used for user ids and project names
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('.')
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    let body = parts.join("/");
    if absolute {
        format!("/{}", body)
    } else {
        body
    }
}
