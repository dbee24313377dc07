//! Remote path normalization
//!
//! The Graph drive reports an item's location as a parent reference of the
//! form `/drive/root:/Documents/Work` plus the item name. The engine keys
//! items by a drive-relative path, so the drive identifier segment has to be
//! stripped before paths from either side can be compared.
//!
//! | parent path                 | name         | result                  |
//! |-----------------------------|--------------|-------------------------|
//! | `/drive/root:`              | `file1.txt`  | `/file1.txt`            |
//! | `/drive/root:/Documents`    | `file1.txt`  | `/Documents/file1.txt`  |
//! | `/drive/root:/`             | `a`          | `/a`                    |
//! | `/Documents` (no prefix)    | `file1.txt`  | `/Documents/file1.txt`  |
//! | `/drives/b!x/root:/Photos`  | `p.jpg`      | `/Photos/p.jpg`         |

use super::errors::DomainError;
use super::newtypes::RemotePath;

/// Prefix used by the default drive in parent references
const DRIVE_ROOT_PREFIX: &str = "/drive/root:";

/// Marker that ends the drive identifier segment for any drive
const ROOT_MARKER: &str = "/root:";

/// Strip the drive identifier segment from a parent reference path
///
/// Returns `/` for the drive root. Paths that carry no drive segment are
/// returned unchanged (minus any trailing slash).
#[must_use]
pub fn strip_drive_prefix(parent_path: &str) -> &str {
    let rest = if let Some(rest) = parent_path.strip_prefix(DRIVE_ROOT_PREFIX) {
        rest
    } else if parent_path.starts_with("/drives/") {
        match parent_path.find(ROOT_MARKER) {
            Some(idx) => &parent_path[idx + ROOT_MARKER.len()..],
            None => parent_path,
        }
    } else {
        parent_path
    };

    let trimmed = rest.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Build the drive-relative path of an item from its parent reference and name
///
/// # Errors
/// Returns `DomainError::InvalidRemotePath` if the name is empty or the
/// resulting path is not a valid [`RemotePath`]
pub fn normalize_remote_path(parent_path: &str, item_name: &str) -> Result<RemotePath, DomainError> {
    if item_name.is_empty() {
        return Err(DomainError::InvalidRemotePath(format!(
            "Empty item name under {parent_path}"
        )));
    }

    let parent = strip_drive_prefix(parent_path);
    let full = if parent == "/" {
        format!("/{item_name}")
    } else if parent.starts_with('/') {
        format!("{parent}/{item_name}")
    } else {
        format!("/{parent}/{item_name}")
    };

    RemotePath::new(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_parent() {
        let p = normalize_remote_path("/drive/root:", "file1.txt").unwrap();
        assert_eq!(p.as_str(), "/file1.txt");
    }

    #[test]
    fn test_root_parent_with_trailing_slash() {
        let p = normalize_remote_path("/drive/root:/", "a").unwrap();
        assert_eq!(p.as_str(), "/a");
    }

    #[test]
    fn test_nested_parent() {
        let p = normalize_remote_path("/drive/root:/Documents", "file1.txt").unwrap();
        assert_eq!(p.as_str(), "/Documents/file1.txt");

        let p = normalize_remote_path("/drive/root:/Documents/Work/2024", "q1.xlsx").unwrap();
        assert_eq!(p.as_str(), "/Documents/Work/2024/q1.xlsx");
    }

    #[test]
    fn test_parent_without_prefix_is_kept() {
        let p = normalize_remote_path("/Documents", "file1.txt").unwrap();
        assert_eq!(p.as_str(), "/Documents/file1.txt");
    }

    #[test]
    fn test_explicit_drive_id_prefix() {
        let p = normalize_remote_path("/drives/b!abc123/root:/Photos", "p.jpg").unwrap();
        assert_eq!(p.as_str(), "/Photos/p.jpg");

        let p = normalize_remote_path("/drives/b!abc123/root:", "top.txt").unwrap();
        assert_eq!(p.as_str(), "/top.txt");
    }

    #[test]
    fn test_prefix_only_matches_at_start() {
        // a folder literally named "drive" must not be stripped
        let p = normalize_remote_path("/Backup/drive/root:", "x").unwrap();
        assert_eq!(p.as_str(), "/Backup/drive/root:/x");
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(normalize_remote_path("/drive/root:", "").is_err());
    }

    #[test]
    fn test_name_with_separator_rejected() {
        assert!(normalize_remote_path("/drive/root:", "a//b").is_err());
    }

    #[test]
    fn test_strip_drive_prefix() {
        assert_eq!(strip_drive_prefix("/drive/root:"), "/");
        assert_eq!(strip_drive_prefix("/drive/root:/Music"), "/Music");
        assert_eq!(strip_drive_prefix("/Music/"), "/Music");
    }
}
