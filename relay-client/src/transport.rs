//! The abridged TCP link.
//!
//! A single lazy TCP connection per link. Writes are framed packets with
//! a 1- or 4-byte word-count header; reads are byte-granular — packet
//! boundaries disappear into an internal buffer, so the layers above can
//! pull exactly the spans they need.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

/// Largest word count the 3-byte length field can carry.
const MAX_PACKET_WORDS: usize = 0x7f_ffff;

/// Protocol marker sent once per TCP connection.
const ABRIDGED_INIT: u8 = 0xef;

struct ReadState {
    half: Option<OwnedReadHalf>,
    buffer: Vec<u8>,
}

struct WriteState {
    half: Option<OwnedWriteHalf>,
}

pub(crate) struct AbridgedLink {
    host: String,
    port: u16,
    connect_lock: Mutex<()>,
    alive: AtomicBool,
    read: Mutex<ReadState>,
    write: Mutex<WriteState>,
}

impl AbridgedLink {
    pub(crate) fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_lock: Mutex::new(()),
            alive: AtomicBool::new(false),
            read: Mutex::new(ReadState { half: None, buffer: Vec::new() }),
            write: Mutex::new(WriteState { half: None }),
        }
    }

    /// (Re)establish the TCP connection if the previous one is gone.
    ///
    /// The init byte goes out immediately after connecting; any stale
    /// bytes buffered from a dead connection are discarded.
    async fn reconnect_if_needed(&self) -> io::Result<()> {
        if self.alive.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.connect_lock.lock().await;
        if self.alive.load(Ordering::Acquire) {
            return Ok(());
        }

        log::info!("connecting to {}:{}", self.host, self.port);
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(&[ABRIDGED_INIT]).await?;

        {
            let mut w = self.write.lock().await;
            w.half = Some(write_half);
        }
        {
            let mut r = self.read.lock().await;
            r.half = Some(read_half);
            r.buffer.clear();
        }
        self.alive.store(true, Ordering::Release);
        Ok(())
    }

    fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Read exactly `n` bytes, transparently crossing packet boundaries.
    pub(crate) async fn read(&self, n: usize) -> io::Result<Vec<u8>> {
        self.reconnect_if_needed().await?;
        let mut state = self.read.lock().await;
        while state.buffer.len() < n {
            let half = state.half.as_mut().ok_or_else(connection_gone)?;
            match read_packet(half).await {
                Ok(packet) => state.buffer.extend_from_slice(&packet),
                Err(e) => {
                    state.half = None;
                    self.mark_dead();
                    return Err(e);
                }
            }
        }
        let rest = state.buffer.split_off(n);
        Ok(std::mem::replace(&mut state.buffer, rest))
    }

    /// Frame and send `data`, chunking anything larger than one packet.
    pub(crate) async fn write(&self, data: &[u8]) -> io::Result<()> {
        self.reconnect_if_needed().await?;
        let mut state = self.write.lock().await;
        let half = state.half.as_mut().ok_or_else(connection_gone)?;
        for chunk in data.chunks(MAX_PACKET_WORDS * 4) {
            if let Err(e) = write_packet(half, chunk).await {
                state.half = None;
                self.mark_dead();
                return Err(e);
            }
        }
        Ok(())
    }
}

fn connection_gone() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "link lost mid-operation")
}

async fn write_packet(half: &mut OwnedWriteHalf, data: &[u8]) -> io::Result<()> {
    let words = data.len() / 4;
    if words < 0x7f {
        half.write_all(&[words as u8]).await?;
    } else {
        let header = [
            0x7f,
            (words & 0xff) as u8,
            ((words >> 8) & 0xff) as u8,
            ((words >> 16) & 0xff) as u8,
        ];
        half.write_all(&header).await?;
    }
    half.write_all(data).await
}

async fn read_packet(half: &mut OwnedReadHalf) -> io::Result<Vec<u8>> {
    let mut head = [0u8; 1];
    half.read_exact(&mut head).await?;
    let words = match head[0] {
        w if w < 0x7f => w as usize,
        0x7f => {
            let mut len = [0u8; 3];
            half.read_exact(&mut len).await?;
            len[0] as usize | (len[1] as usize) << 8 | (len[2] as usize) << 16
        }
        marker => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad abridged length marker {marker:#04x}"),
            ));
        }
    };
    let mut packet = vec![0u8; words * 4];
    half.read_exact(&mut packet).await?;
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn init_byte_goes_out_once_and_frames_follow() {
        let (listener, port) = listener().await;
        let link = AbridgedLink::new("127.0.0.1", port);

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1 + 1 + 4 + 4 + 1024];
            sock.read_exact(&mut buf).await.unwrap();
            buf
        });

        // 4-byte payload: one word, short header.
        link.write(&[1, 2, 3, 4]).await.unwrap();
        // 1024-byte payload: 256 words, long header.
        link.write(&[0x03u8; 1024]).await.unwrap();

        let got = server.await.unwrap();
        assert_eq!(got[0], ABRIDGED_INIT);
        assert_eq!(got[1], 1);
        assert_eq!(&got[2..6], &[1, 2, 3, 4]);
        assert_eq!(&got[6..10], &[0x7f, 0x00, 0x01, 0x00]);
        assert_eq!(&got[10..], &[0x03u8; 1024]);
    }

    #[tokio::test]
    async fn reads_cross_packet_and_fragment_boundaries() {
        let (listener, port) = listener().await;
        let link = AbridgedLink::new("127.0.0.1", port);

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut init = [0u8; 1];
            sock.read_exact(&mut init).await.unwrap();

            // Two packets, delivered in deliberately awkward fragments.
            let mut wire = Vec::new();
            wire.push(2u8);
            wire.extend_from_slice(&[0xaa; 8]);
            wire.push(1u8);
            wire.extend_from_slice(&[0xbb; 4]);
            for fragment in wire.chunks(3) {
                sock.write_all(fragment).await.unwrap();
                sock.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
            sock
        });

        // Trigger the connection so the server sees the init byte.
        link.write(&[0u8; 4]).await.unwrap();

        let first = link.read(5).await.unwrap();
        assert_eq!(first, [0xaa; 5]);
        let rest = link.read(7).await.unwrap();
        assert_eq!(&rest[..3], &[0xaa; 3]);
        assert_eq!(&rest[3..], &[0xbb; 4]);

        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn abridged_write_read_roundtrip() {
        let (listener, port) = listener().await;
        let link = AbridgedLink::new("127.0.0.1", port);

        // Echo server: strips the init byte and loops frames back raw.
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut init = [0u8; 1];
            sock.read_exact(&mut init).await.unwrap();
            let mut buf = vec![0u8; 1 + 1024];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let payload = vec![0x03u8; 1024];
        link.write(&payload).await.unwrap();
        let got = link.read(1024).await.unwrap();
        assert_eq!(got, payload);
    }

    #[tokio::test]
    async fn oversized_length_marker_is_rejected() {
        let (listener, port) = listener().await;
        let link = AbridgedLink::new("127.0.0.1", port);

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut init = [0u8; 1];
            sock.read_exact(&mut init).await.unwrap();
            sock.write_all(&[0x81, 0, 0, 0]).await.unwrap();
            sock
        });

        link.write(&[0u8; 4]).await.unwrap();
        let err = link.read(4).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
