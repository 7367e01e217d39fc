//! Managed-region splicing and atomic installation of the HBA file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use scopeguard::ScopeGuard;

pub const BEGIN_MARKER: &str = "# BEGIN TENANT PROVISIONER MANAGED RULES";
pub const END_MARKER: &str = "# END TENANT PROVISIONER MANAGED RULES";

/// Byte range strictly between the two marker lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagedRegion {
    pub start: usize,
    pub end: usize,
}

/// Locate the managed region. Each marker must appear exactly once as a whole
/// line, with BEGIN before END; the error is a human-readable reason.
///
/// Lines that merely mention a marker, such as operator comments, do not count.
pub fn locate_region(contents: &str) -> Result<ManagedRegion, String> {
    let mut begin: Option<(usize, &str)> = None;
    let mut end: Option<usize> = None;

    let mut offset = 0;
    for line in contents.split_inclusive('\n') {
        let text = line.trim();
        if text == BEGIN_MARKER {
            if begin.replace((offset, line)).is_some() {
                return Err(format!("marker '{BEGIN_MARKER}' appears more than once"));
            }
        } else if text == END_MARKER && end.replace(offset).is_some() {
            return Err(format!("marker '{END_MARKER}' appears more than once"));
        }
        offset += line.len();
    }

    let (begin, begin_line) = begin.ok_or_else(|| format!("missing marker '{BEGIN_MARKER}'"))?;
    let end = end.ok_or_else(|| format!("missing marker '{END_MARKER}'"))?;
    if begin > end {
        return Err("END marker appears before BEGIN marker".to_string());
    }

    Ok(ManagedRegion {
        start: begin + begin_line.len(),
        end,
    })
}

/// Replace the managed region, leaving every other byte untouched.
pub fn splice(contents: &str, managed: &str) -> Result<String, String> {
    let region = locate_region(contents)?;
    let mut out = String::with_capacity(contents.len() + managed.len());
    out.push_str(&contents[..region.start]);
    out.push_str(managed);
    out.push_str(&contents[region.end..]);
    Ok(out)
}

/// Current text of the managed region
pub fn managed_text(contents: &str) -> Result<&str, String> {
    let region = locate_region(contents)?;
    Ok(&contents[region.start..region.end])
}

/// Write `contents` over `path` atomically: temp file in the same directory
/// with the original's permissions, fsync, then rename.
///
/// The work runs as one blocking task. If the caller stops waiting, the task
/// still either installs the file or removes its temp file.
pub async fn install(path: &Path, contents: &str) -> io::Result<()> {
    let path = path.to_path_buf();
    let contents = contents.to_owned();
    tokio::task::spawn_blocking(move || install_blocking(&path, &contents))
        .await
        .map_err(|err| io::Error::other(format!("access-control install task failed: {err}")))?
}

fn install_blocking(path: &Path, contents: &str) -> io::Result<()> {
    let tmp = scopeguard::guard(temp_path(path), |tmp| {
        if let Err(err) = fs::remove_file(&tmp) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %tmp.display(), error = %err, "Could not remove temp access-control file");
            }
        }
    });

    let permissions = fs::metadata(path)?.permissions();
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&*tmp)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::set_permissions(&*tmp, permissions)?;
    fs::rename(&*tmp, path)?;
    ScopeGuard::into_inner(tmp);

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        match fs::File::open(dir) {
            Ok(handle) => {
                if let Err(err) = handle.sync_all() {
                    tracing::debug!(dir = %dir.display(), error = %err, "Directory fsync not supported");
                }
            }
            Err(err) => tracing::debug!(dir = %dir.display(), error = %err, "Could not open directory for fsync"),
        }
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pg_hba.conf".to_string());
    path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(managed: &str) -> String {
        format!(
            "local all postgres peer\n{BEGIN_MARKER}\n{managed}{END_MARKER}\nhost all all 0.0.0.0/0 scram-sha-256\n"
        )
    }

    #[test]
    fn splice_preserves_outside_bytes() {
        let original = sample("hostssl old old 1.1.1.1/32 scram-sha-256\n");
        let updated = splice(&original, "NEW\n").unwrap();
        assert_eq!(updated, sample("NEW\n"));
        assert_eq!(managed_text(&updated).unwrap(), "NEW\n");
    }

    #[test]
    fn splice_into_empty_region() {
        let original = sample("");
        assert_eq!(managed_text(&original).unwrap(), "");
        assert_eq!(splice(&original, "").unwrap(), original);
    }

    #[test]
    fn corrupted_markers_are_rejected() {
        let cases = [
            "no markers at all\n".to_string(),
            format!("{BEGIN_MARKER}\nonly begin\n"),
            format!("only end\n{END_MARKER}\n"),
            format!("{END_MARKER}\n{BEGIN_MARKER}\n"),
            format!("{BEGIN_MARKER}\n{BEGIN_MARKER}\n{END_MARKER}\n"),
            format!("{BEGIN_MARKER} {END_MARKER}\n"),
            format!("{BEGIN_MARKER}\nrule{END_MARKER}\n"),
        ];
        for contents in cases {
            assert!(splice(&contents, "x\n").is_err(), "{contents:?} accepted");
        }
    }

    #[test]
    fn markers_quoted_in_comments_are_ignored() {
        let contents = format!(
            "# rules between '{BEGIN_MARKER}' and '{END_MARKER}' are generated\n{}",
            sample("RULE\n")
        );
        assert_eq!(managed_text(&contents).unwrap(), "RULE\n");

        let updated = splice(&contents, "").unwrap();
        assert!(updated.starts_with("# rules between"));
        assert_eq!(managed_text(&updated).unwrap(), "");
    }

    #[test]
    fn indented_markers_still_match() {
        let contents = format!("  {BEGIN_MARKER}\nRULE\n\t{END_MARKER}\n");
        assert_eq!(managed_text(&contents).unwrap(), "RULE\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn install_keeps_permissions_and_leaves_no_temp_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pg_hba.conf");
        std::fs::write(&path, sample("")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();

        install(&path, &sample("RULE\n")).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), sample("RULE\n"));
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn install_fails_for_missing_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.conf");
        assert!(install(&path, "x").await.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // A directory at the target path lets the temp write succeed and the rename fail.
        let path = dir.path().join("pg_hba.conf");
        std::fs::create_dir(&path).unwrap();

        assert!(install(&path, "x").await.is_err());

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("pg_hba.conf")]);
    }

    #[tokio::test]
    async fn abandoned_install_still_completes_without_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pg_hba.conf");
        std::fs::write(&path, sample("")).unwrap();

        // Give up immediately, the way an expired operation timeout would.
        let abandoned =
            tokio::time::timeout(std::time::Duration::ZERO, install(&path, &sample("RULE\n"))).await;
        drop(abandoned);

        let mut settled = false;
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if std::fs::read_to_string(&path).unwrap() == sample("RULE\n") {
                settled = true;
                break;
            }
        }
        assert!(settled);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
