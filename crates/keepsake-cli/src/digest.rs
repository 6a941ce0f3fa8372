//! Content digests of a logical disk
//!
//! Several algorithms are fed from one pass over the stream.

use md5::Md5;
use sha1::Sha1;
use sha2::digest::DynDigest;
use sha2::Sha256;
use std::io::{self, Read};

/// Read buffer size for digest passes
const BUFFER_SIZE: usize = 1024 * 1024;

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha1 => "SHA1",
            DigestAlgorithm::Sha256 => "SHA256",
        }
    }

    fn hasher(&self) -> Box<dyn DynDigest> {
        match self {
            DigestAlgorithm::Md5 => Box::new(Md5::default()),
            DigestAlgorithm::Sha1 => Box::new(Sha1::default()),
            DigestAlgorithm::Sha256 => Box::new(Sha256::default()),
        }
    }
}

/// One finished digest
#[derive(Debug, Clone)]
pub struct DigestValue {
    pub algorithm: DigestAlgorithm,
    pub hex: String,
}

/// Digests of a whole stream
#[derive(Debug, Clone)]
pub struct DigestReport {
    pub digests: Vec<DigestValue>,
    pub bytes: u64,
}

/// Read `reader` to the end, feeding every requested algorithm
///
/// Algorithms listed more than once are computed once.
pub fn digest_reader<R: Read + ?Sized>(
    reader: &mut R,
    algorithms: &[DigestAlgorithm],
) -> io::Result<DigestReport> {
    let mut hashers: Vec<(DigestAlgorithm, Box<dyn DynDigest>)> = Vec::new();
    for algorithm in algorithms {
        if !hashers.iter().any(|(a, _)| a == algorithm) {
            hashers.push((*algorithm, algorithm.hasher()));
        }
    }

    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut bytes = 0u64;
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        for (_, hasher) in hashers.iter_mut() {
            hasher.update(&buffer[..n]);
        }
        bytes += n as u64;
    }

    let digests = hashers
        .into_iter()
        .map(|(algorithm, hasher)| DigestValue {
            algorithm,
            hex: hex::encode(hasher.finalize()),
        })
        .collect();

    Ok(DigestReport { digests, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_known_digests() {
        let mut reader = Cursor::new(b"Hello, World!");
        let report = digest_reader(
            &mut reader,
            &[DigestAlgorithm::Md5, DigestAlgorithm::Sha1, DigestAlgorithm::Sha256],
        )
        .unwrap();

        assert_eq!(report.bytes, 13);
        assert_eq!(report.digests[0].hex, "65a8e27d8879283831b664bd8b7f0ad4");
        assert_eq!(report.digests[1].hex, "0a0a9f2a6772942557ab5355d76af442f8f65e01");
        assert_eq!(
            report.digests[2].hex,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_duplicates_collapse() {
        let mut reader = Cursor::new(Vec::new());
        let report = digest_reader(
            &mut reader,
            &[DigestAlgorithm::Sha256, DigestAlgorithm::Sha256],
        )
        .unwrap();

        assert_eq!(report.digests.len(), 1);
        assert_eq!(report.bytes, 0);
        assert_eq!(
            report.digests[0].hex,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_large_input_spans_buffers() {
        let data = vec![0u8; BUFFER_SIZE + 17];
        let report = digest_reader(&mut Cursor::new(&data), &[DigestAlgorithm::Md5]).unwrap();
        assert_eq!(report.bytes, data.len() as u64);
        assert_eq!(report.digests[0].algorithm.name(), "MD5");
    }
}
