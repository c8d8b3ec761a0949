use std::{
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
};

use flate2::read::GzDecoder;

use crate::ExecError;

/// Write the demo contained in `archive` to `dest`.
///
/// `.gz` archives are decompressed; anything else is copied as is.
pub async fn extract_demo(archive: &Path, dest: &Path) -> Result<(), ExecError> {
    let (archive, dest) = (archive.to_path_buf(), dest.to_path_buf());
    tokio::task::spawn_blocking(move || extract_blocking(&archive, &dest))
        .await
        .map_err(|e| ExecError::Extract(e.to_string()))?
}

fn extract_blocking(archive: &PathBuf, dest: &PathBuf) -> Result<(), ExecError> {
    let fail = |e: io::Error| ExecError::Extract(format!("{}: {e}", archive.display()));
    let gzipped = archive
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));

    let mut input = File::open(archive).map_err(fail)?;
    let mut output = File::create(dest).map_err(fail)?;
    if gzipped {
        io::copy(&mut GzDecoder::new(BufReader::new(input)), &mut output).map_err(fail)?;
    } else {
        io::copy(&mut input, &mut output).map_err(fail)?;
    }
    Ok(())
}
