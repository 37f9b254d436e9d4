use std::path::Path;

pub const ENV_FILE_NAME: &str = ".env";

#[derive(Debug, thiserror::Error)]
pub enum EnvFileError {
    #[error("failed to read env file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write env file '{path}': {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2 {
        let bytes = s.as_bytes();
        if (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
        {
            return &s[1..s.len() - 1];
        }
    }
    s
}

fn port_assignment(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;
    if key.trim() != "PORT" {
        return None;
    }
    Some(strip_quotes(value.trim()))
}

/// First valid `PORT=<n>` assignment in the contents, if any.
pub fn port_from_contents(contents: &str) -> Option<u16> {
    contents
        .lines()
        .filter_map(port_assignment)
        .find_map(|value| value.parse().ok())
}

/// Rewrite every `PORT=` assignment line to the given port, or append one if
/// the contents carry none. Other lines, comments, and ordering are preserved.
pub fn upsert_port(contents: &str, port: u16) -> String {
    let assignment = format!("PORT={port}");
    let mut out = String::with_capacity(contents.len() + assignment.len() + 1);
    let mut replaced = false;

    for line in contents.lines() {
        if port_assignment(line).is_some() {
            out.push_str(&assignment);
            replaced = true;
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }

    if !replaced {
        out.push_str(&assignment);
        out.push('\n');
    }

    out
}

/// Read `<project>/.env` and return its PORT assignment. A missing file is
/// `Ok(None)`, not an error.
pub fn read_port(project_dir: &Path) -> Result<Option<u16>, EnvFileError> {
    let path = project_dir.join(ENV_FILE_NAME);
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(port_from_contents(&contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(EnvFileError::Read {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

/// Record the port in `<project>/.env`, creating the file when absent.
pub fn write_port(project_dir: &Path, port: u16) -> Result<(), EnvFileError> {
    let path = project_dir.join(ENV_FILE_NAME);
    let existing = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(EnvFileError::Read {
                path: path.display().to_string(),
                source: e,
            });
        }
    };

    std::fs::write(&path, upsert_port(&existing, port)).map_err(|e| EnvFileError::Write {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_basic() {
        assert_eq!(port_from_contents("PORT=3000"), Some(3000));
    }

    #[test]
    fn test_port_with_whitespace() {
        assert_eq!(port_from_contents("  PORT  =  8080  "), Some(8080));
    }

    #[test]
    fn test_port_quoted() {
        assert_eq!(port_from_contents("PORT=\"4000\""), Some(4000));
        assert_eq!(port_from_contents("PORT='5000'"), Some(5000));
    }

    #[test]
    fn test_port_among_other_keys() {
        let input = "# service config\nNODE_ENV=production\nPORT=3046\nDEBUG=app:*\n";
        assert_eq!(port_from_contents(input), Some(3046));
    }

    #[test]
    fn test_port_absent() {
        assert_eq!(port_from_contents("NODE_ENV=production\n"), None);
    }

    #[test]
    fn test_port_non_numeric_ignored() {
        assert_eq!(port_from_contents("PORT=auto\n"), None);
    }

    #[test]
    fn test_port_commented_out_ignored() {
        assert_eq!(port_from_contents("# PORT=3000\n"), None);
    }

    #[test]
    fn test_upsert_replaces_existing() {
        let input = "NODE_ENV=production\nPORT=3000\nDEBUG=app:*\n";
        assert_eq!(
            upsert_port(input, 4000),
            "NODE_ENV=production\nPORT=4000\nDEBUG=app:*\n"
        );
    }

    #[test]
    fn test_upsert_appends_when_absent() {
        let input = "NODE_ENV=production\n";
        assert_eq!(upsert_port(input, 4000), "NODE_ENV=production\nPORT=4000\n");
    }

    #[test]
    fn test_upsert_empty_contents() {
        assert_eq!(upsert_port("", 3000), "PORT=3000\n");
    }

    #[test]
    fn test_upsert_keeps_comments_and_blanks() {
        let input = "# config\n\nPORT=1\n# trailing\n";
        assert_eq!(upsert_port(input, 9000), "# config\n\nPORT=9000\n# trailing\n");
    }

    #[test]
    fn test_read_port_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_port(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_write_port_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        write_port(dir.path(), 3000).unwrap();
        let contents = std::fs::read_to_string(dir.path().join(ENV_FILE_NAME)).unwrap();
        assert_eq!(contents, "PORT=3000\n");
    }

    #[test]
    fn test_write_port_roundtrips_through_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ENV_FILE_NAME), "NODE_ENV=dev\nPORT=1234\n").unwrap();

        write_port(dir.path(), 4321).unwrap();
        assert_eq!(read_port(dir.path()).unwrap(), Some(4321));

        let contents = std::fs::read_to_string(dir.path().join(ENV_FILE_NAME)).unwrap();
        assert_eq!(contents, "NODE_ENV=dev\nPORT=4321\n");
    }
}
