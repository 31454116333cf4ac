use glob::{glob, Pattern};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use super::Period;
use crate::config::DatasetKind;
use crate::error::{Error, Result};

/// All `<root>/**/<file_name>` batches of `kind`, oldest period first.
/// Files whose directory is not a period sort last, in path order, so the
/// driver can report them as skips.
pub fn discover(root: &Path, kind: &DatasetKind) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/**/{}",
        Pattern::escape(&root.to_string_lossy()),
        Pattern::escape(&kind.file_name)
    );
    let mut found = Vec::new();
    for entry in glob(&pattern).map_err(|e| Error::Config(format!("bad glob {}: {}", pattern, e)))? {
        match entry {
            Ok(path) if path.is_file() => found.push(path),
            Ok(_) => {}
            Err(e) => warn!("cannot read glob entry: {}", e),
        }
    }

    found.sort_by_cached_key(|p| {
        let ordinal = Period::from_source_path(p).ok().map(|period| period.ordinal());
        (ordinal.is_none(), ordinal, p.clone())
    });
    debug!(kind = %kind.kind, root = %root.display(), files = found.len(), "discovered batches");
    Ok(found)
}

/// Rename `<stem>*.csv` to `<file_name>` in every directory under `root`
/// for each kind, e.g. `household_income_20200131.csv` becomes
/// `household_income.csv`. A directory that already holds the canonical
/// name is left alone. Returns the number of files renamed.
pub fn canonicalize_file_names(root: &Path, kinds: &[DatasetKind]) -> Result<usize> {
    let mut renamed = 0;
    for kind in kinds {
        let stem = kind
            .file_name
            .strip_suffix(".csv")
            .unwrap_or(&kind.file_name);
        let pattern = format!(
            "{}/**/{}*.csv",
            Pattern::escape(&root.to_string_lossy()),
            Pattern::escape(stem)
        );

        let mut by_dir: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
        for entry in glob(&pattern).map_err(|e| Error::Config(format!("bad glob {}: {}", pattern, e)))? {
            let Ok(path) = entry else { continue };
            if let Some(dir) = path.parent() {
                by_dir.entry(dir.to_path_buf()).or_default().push(path);
            }
        }

        for (dir, mut candidates) in by_dir {
            let target = dir.join(&kind.file_name);
            if target.exists() {
                continue;
            }
            candidates.sort();
            let source = &candidates[0];
            if candidates.len() > 1 {
                warn!(
                    dir = %dir.display(),
                    "{} files match `{}*.csv`, renaming only {}",
                    candidates.len(),
                    stem,
                    source.display()
                );
            }
            fs::rename(source, &target).map_err(|e| Error::io(source, e))?;
            info!("renamed {} to {}", source.display(), target.display());
            renamed += 1;
        }
    }
    Ok(renamed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn touch(root: &Path, dir: &str, file: &str) -> Result<PathBuf> {
        let d = root.join(dir);
        fs::create_dir_all(&d)?;
        let p = d.join(file);
        fs::write(&p, "HH_ID\n1\n")?;
        Ok(p)
    }

    #[test]
    fn discovers_in_period_order_with_invalid_last() -> Result<()> {
        let root = tempdir()?;
        let kind = DatasetKind::new("household_income", "DIR_MONTH", "DIR_YEAR");
        touch(root.path(), "Feb 2020", "household_income.csv")?;
        touch(root.path(), "Dec 2019", "household_income.csv")?;
        touch(root.path(), "notes", "household_income.csv")?;
        touch(root.path(), "Jan 2020", "people_of_india.csv")?;

        let found = discover(root.path(), &kind)?;
        let dirs: Vec<String> = found
            .iter()
            .filter_map(|p| p.parent()?.file_name()?.to_str().map(str::to_string))
            .collect();
        assert_eq!(dirs, vec!["Dec 2019", "Feb 2020", "notes"]);
        Ok(())
    }

    #[test]
    fn renames_dated_files_to_canonical_names() -> Result<()> {
        let root = tempdir()?;
        let kind = DatasetKind::new("people_of_india", "month", "year");
        touch(root.path(), "Jan 2020", "people_of_india_20200131_MS.csv")?;
        touch(root.path(), "Feb 2020", "people_of_india.csv")?;

        let n = canonicalize_file_names(root.path(), &[kind])?;
        assert_eq!(n, 1);
        assert!(root.path().join("Jan 2020/people_of_india.csv").exists());
        assert!(!root.path().join("Jan 2020/people_of_india_20200131_MS.csv").exists());
        Ok(())
    }
}
