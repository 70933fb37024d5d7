use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha256,
}

enum Accumulator {
    Md5(md5::Context),
    Sha256(Sha256),
}

impl Accumulator {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Accumulator::Md5(md5::Context::new()),
            HashAlgorithm::Sha256 => Accumulator::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            Accumulator::Md5(ctx) => ctx.consume(bytes),
            Accumulator::Sha256(hasher) => hasher.update(bytes),
        }
    }

    fn finish(self) -> String {
        match self {
            Accumulator::Md5(ctx) => format!("{:x}", ctx.compute()),
            Accumulator::Sha256(hasher) => hex::encode(hasher.finalize()),
        }
    }
}

/// Running digest over the payload, fed in file offset order.
pub struct StreamingHasher {
    algorithm: HashAlgorithm,
    accumulator: Option<Accumulator>,
    digest: Option<String>,
}

impl StreamingHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            accumulator: Some(Accumulator::new(algorithm)),
            digest: None,
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn reset(&mut self) {
        self.accumulator = Some(Accumulator::new(self.algorithm));
        self.digest = None;
    }

    pub fn update(&mut self, bytes: &[u8]) -> Result<()> {
        match self.accumulator.as_mut() {
            Some(acc) => {
                acc.update(bytes);
                Ok(())
            }
            None => Err(Error::HasherFinalized),
        }
    }

    /// Lowercase hex digest. Later calls return the cached value.
    pub fn finalize(&mut self) -> String {
        if let Some(acc) = self.accumulator.take() {
            self.digest = Some(acc.finish());
        }
        self.digest.clone().unwrap_or_default()
    }

    pub fn is_finalized(&self) -> bool {
        self.digest.is_some()
    }
}

/// Hashes a file already on disk.
pub async fn calculate_hash(filepath: &Path, algorithm: HashAlgorithm) -> Result<String> {
    let mut file = File::open(filepath).await?;
    let mut acc = Accumulator::new(algorithm);
    let mut buffer = [0; 8192];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        acc.update(&buffer[..n]);
    }

    Ok(acc.finish())
}
