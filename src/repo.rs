/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! Resolving cartridge references: `repo://` paths against the whitelisted
//! repository root, and `http(s)://` URLs.
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::debug;
use thiserror::Error;

/// Reference scheme for cartridges below the daemon's repository root.
pub const PREFIX_REPO_REF: &str = "repo://";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cartridge repository is not enabled")]
    RepoNotEnabled,
    #[error("reference leaves the cartridge repository: {0}")]
    OutsideRepo(String),
    #[error("loading by reference not supported: {0}")]
    Unsupported(String),
    #[error("cannot fetch {0}: {1}")]
    Fetch(String, String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Whether `r` looks like a cartridge reference rather than cartridge data.
pub fn is_reference(r: &str) -> bool {
    r.starts_with(PREFIX_REPO_REF) || r.starts_with("http://") || r.starts_with("https://")
}

/// Resolves `reference` into a reader for the cartridge bytes.
///
/// `repo://` paths resolve against `repository`; references escaping the
/// repository root are rejected. `http://` and `https://` URLs are fetched
/// and streamed.
pub fn resolve(
    reference: &str,
    repository: Option<&Path>,
) -> Result<Box<dyn Read>, ResolveError> {
    debug!("resolving reference {:?}", reference);

    if let Some(rel) = reference.strip_prefix(PREFIX_REPO_REF) {
        let root = repository.ok_or(ResolveError::RepoNotEnabled)?;
        let root = root.canonicalize()?;
        let file = root.join(rel).canonicalize()?;
        if !file.starts_with(&root) {
            return Err(ResolveError::OutsideRepo(reference.to_string()));
        }
        return Ok(Box::new(BufReader::new(File::open(file)?)));
    }

    if reference.starts_with("http://") || reference.starts_with("https://") {
        let resp = ureq::get(reference)
            .call()
            .map_err(|e| ResolveError::Fetch(reference.to_string(), e.to_string()))?;
        return Ok(Box::new(resp.into_reader()));
    }

    Err(ResolveError::Unsupported(reference.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn reference_detection() {
        assert!(is_reference("repo://games/demo.mdr"));
        assert!(is_reference("http://example.org/demo.mdr"));
        assert!(is_reference("https://example.org/demo.mdr"));
        assert!(!is_reference("just a bunch of bytes"));
    }

    #[test]
    fn repo_requires_root() {
        assert!(matches!(
            resolve("repo://demo.mdr", None),
            Err(ResolveError::RepoNotEnabled)
        ));
    }

    #[test]
    fn repo_resolves_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("games")).unwrap();
        fs::write(dir.path().join("games/demo.mdr"), b"cartridge").unwrap();

        let mut rd = resolve("repo://games/demo.mdr", Some(dir.path())).unwrap();
        let mut data = Vec::new();
        rd.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"cartridge");
    }

    #[test]
    fn path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        fs::create_dir(&root).unwrap();
        fs::write(dir.path().join("secret"), b"secret").unwrap();

        let err = match resolve("repo://../secret", Some(&root)) {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, ResolveError::OutsideRepo(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolve("repo://nope.mdr", Some(dir.path())),
            Err(ResolveError::Io(_))
        ));
    }

    #[test]
    fn unknown_scheme_rejected() {
        assert!(matches!(
            resolve("ftp://example.org/x", None),
            Err(ResolveError::Unsupported(_))
        ));
    }
}
