//! File-side helpers: checksums, download naming, and the auxiliary-port
//! byte streams.

use chat_protocol::RelayRole;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const CHUNK: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of a completed download.
#[derive(Debug)]
pub struct Received {
    pub path: PathBuf,
    pub bytes: u64,
    /// Whether the recomputed SHA-256 matched the sender's declaration.
    pub checksum_ok: bool,
}

/// Hex SHA-256 of a file, streamed in chunks.
pub async fn sha256_hex(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Pick a non-clobbering destination for `filename` inside `dir`,
/// appending `(1)`, `(2)`, ... before the extension on collision.  Only
/// the final path component of `filename` is honored.
pub fn unique_destination(dir: &Path, filename: &str) -> PathBuf {
    let name = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_owned());
    let candidate = dir.join(&name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_owned(), Some(ext.to_owned())),
        _ => (name.clone(), None),
    };
    let mut n = 1u32;
    loop {
        let next = match &ext {
            Some(ext) => format!("{stem}({n}).{ext}"),
            None => format!("{stem}({n})"),
        };
        let candidate = dir.join(next);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

async fn connect_relay(relay_addr: &str, uuid: &str, role: RelayRole) -> io::Result<TcpStream> {
    let mut stream = TcpStream::connect(relay_addr).await?;
    stream.write_all(uuid.as_bytes()).await?;
    stream.write_all(&[role.as_byte()]).await?;
    Ok(stream)
}

/// Stream a local file to the relay as the sending half, then half-close.
/// Returns the number of bytes shipped.
pub async fn send_file(relay_addr: &str, uuid: &str, path: &Path) -> Result<u64, TransferError> {
    let mut file = File::open(path).await?;
    let mut stream = connect_relay(relay_addr, uuid, RelayRole::Sender).await?;
    let bytes = tokio::io::copy(&mut file, &mut stream).await?;
    stream.shutdown().await?;
    Ok(bytes)
}

/// Read the relayed bytes into `dir` under a collision-avoiding name,
/// hashing while writing, and compare against `expected_checksum`.
/// The file is kept on disk even when the checksum mismatches.
pub async fn receive_file(
    relay_addr: &str,
    uuid: &str,
    dir: &Path,
    filename: &str,
    expected_checksum: &str,
) -> Result<Received, TransferError> {
    let mut stream = connect_relay(relay_addr, uuid, RelayRole::Receiver).await?;
    let path = unique_destination(dir, filename);
    let mut file = File::create(&path).await?;
    let mut hasher = Sha256::new();
    let mut bytes = 0u64;
    let mut buf = [0u8; CHUNK];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n]).await?;
        bytes += n as u64;
    }
    file.flush().await?;
    let checksum = hex::encode(hasher.finalize());
    Ok(Received {
        path,
        bytes,
        checksum_ok: checksum == expected_checksum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sha256_hex_matches_a_known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        tokio::fs::write(&path, b"abc").await.unwrap();

        assert_eq!(
            sha256_hex(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn unique_destination_suffixes_before_the_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("a(1).txt"), b"x").unwrap();

        let picked = unique_destination(dir.path(), "a.txt");
        assert_eq!(picked, dir.path().join("a(2).txt"));
    }

    #[test]
    fn unique_destination_handles_extensionless_names() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            unique_destination(dir.path(), "notes"),
            dir.path().join("notes")
        );
        std::fs::write(dir.path().join("notes"), b"x").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "notes"),
            dir.path().join("notes(1)")
        );
    }

    #[test]
    fn unique_destination_strips_directory_components() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            unique_destination(dir.path(), "../../etc/passwd"),
            dir.path().join("passwd")
        );
    }

    #[tokio::test]
    async fn send_and_receive_round_trip_through_a_raw_relay() {
        use tokio::net::TcpListener;

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("payload.bin");
        let content = b"0123456789".repeat(1000);
        tokio::fs::write(&source, &content).await.unwrap();
        let checksum = sha256_hex(&source).await.unwrap();

        // Minimal relay stand-in: read both 37-byte headers, then pipe
        // sender bytes to the receiver.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let relay = tokio::spawn(async move {
            let (mut a, _) = listener.accept().await.unwrap();
            let (mut b, _) = listener.accept().await.unwrap();
            let mut header = [0u8; chat_protocol::RELAY_HEADER_LEN];
            a.read_exact(&mut header).await.unwrap();
            let a_is_sender = header[chat_protocol::TRANSFER_ID_LEN] == b's';
            b.read_exact(&mut header).await.unwrap();
            let (mut tx, mut rx) = if a_is_sender { (a, b) } else { (b, a) };
            tokio::io::copy(&mut tx, &mut rx).await.unwrap();
        });

        let uuid = "0e32d03e-6e8c-4d52-a2a8-52fa49bb60a6";
        let downloads = tempfile::tempdir().unwrap();
        let addr_clone = addr.clone();
        let source_clone = source.clone();
        let sender =
            tokio::spawn(async move { send_file(&addr_clone, uuid, &source_clone).await.unwrap() });
        let received = receive_file(&addr, uuid, downloads.path(), "payload.bin", &checksum)
            .await
            .unwrap();

        assert_eq!(sender.await.unwrap(), content.len() as u64);
        assert_eq!(received.bytes, content.len() as u64);
        assert!(received.checksum_ok);
        let on_disk = std::fs::read(received.path).unwrap();
        assert_eq!(on_disk, content);
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn checksum_mismatch_is_reported_and_the_file_kept() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut header = [0u8; chat_protocol::RELAY_HEADER_LEN];
            conn.read_exact(&mut header).await.unwrap();
            conn.write_all(b"tampered bytes").await.unwrap();
        });

        let downloads = tempfile::tempdir().unwrap();
        let received = receive_file(
            &addr,
            "0e32d03e-6e8c-4d52-a2a8-52fa49bb60a6",
            downloads.path(),
            "doc.txt",
            "doesnotmatch",
        )
        .await
        .unwrap();

        assert!(!received.checksum_ok);
        assert!(received.path.exists());
    }
}
