use std::{
    fs,
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

use super::store::TableSchema;
use crate::error::{Error, Result};

fn snapshot_path(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{}_columns.json", table))
}

/// Write `schema` to `<dir>/<table>_columns.json`, atomically: to a tmp file,
/// then renamed over the original.
pub fn write_snapshot<P: AsRef<Path>>(dir: P, schema: &TableSchema) -> Result<()> {
    let dir = dir.as_ref();
    let path = snapshot_path(dir, &schema.table);
    let tmp_path = dir.join(format!(".{}_columns.json.tmp", schema.table));

    let mut tmp = fs::File::create(&tmp_path).map_err(|e| Error::io(&tmp_path, e))?;
    serde_json::to_writer_pretty(&mut tmp, schema)
        .map_err(|e| Error::Export(format!("serializing {}: {}", path.display(), e)))?;
    tmp.write_all(b"\n").map_err(|e| Error::io(&tmp_path, e))?;
    fs::rename(&tmp_path, &path).map_err(|e| Error::io(&path, e))?;
    Ok(())
}

/// Read the snapshot for `table`, if one exists.
pub fn read_snapshot<P: AsRef<Path>>(dir: P, table: &str) -> Result<Option<TableSchema>> {
    let path = snapshot_path(dir.as_ref(), table);
    if !path.exists() {
        return Ok(None);
    }
    let f = fs::File::open(&path).map_err(|e| Error::io(&path, e))?;
    let schema = serde_json::from_reader(BufReader::new(f))
        .map_err(|e| Error::Config(format!("parsing {}: {}", path.display(), e)))?;
    Ok(Some(schema))
}
