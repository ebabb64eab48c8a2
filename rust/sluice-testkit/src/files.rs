//! Temporary text corpora.

use std::path::PathBuf;

use tempfile::TempDir;

/// A temporary directory holding text files. Removed on drop.
pub struct TextCorpus {
    dir: TempDir,
    paths: Vec<PathBuf>,
}

impl TextCorpus {
    /// Writes each of `texts` to its own file (`doc-<index>.txt`).
    pub fn new<S: AsRef<str>>(texts: &[S]) -> anyhow::Result<TextCorpus> {
        let dir = tempfile::tempdir()?;
        let mut paths = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            let path = dir.path().join(format!("doc-{i}.txt"));
            std::fs::write(&path, text.as_ref())?;
            paths.push(path);
        }
        Ok(TextCorpus { dir, paths })
    }

    /// Generates `count` files of `len` random ASCII letters, spaces and
    /// punctuation.
    pub fn random(count: usize, len: usize, seed: u64) -> anyhow::Result<TextCorpus> {
        const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ .,;\n";
        let mut rng = fastrand::Rng::with_seed(seed);
        let texts = (0..count)
            .map(|_| {
                (0..len)
                    .map(|_| char::from(CHARSET[rng.usize(..CHARSET.len())]))
                    .collect::<String>()
            })
            .collect::<Vec<_>>();
        TextCorpus::new(&texts)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// A path inside the corpus directory that does not exist.
    pub fn missing_path(&self) -> PathBuf {
        self.dir.path().join("missing.txt")
    }

    pub fn dir(&self) -> &std::path::Path {
        self.dir.path()
    }
}
