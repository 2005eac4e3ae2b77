use std::fmt;
use std::fmt::Write;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use mime::Mime;

use super::reader::StreamingEntity;

/// One named part of a composed entity.
#[derive(Debug)]
pub struct Part {
    name: String,
    filename: Option<String>,
    content_type: Option<Mime>,
    data: PartData,
}

#[derive(Debug)]
pub enum PartData {
    Bytes(Bytes),
    Streaming(StreamingEntity),
}

impl PartData {
    fn length(&self) -> Option<u64> {
        match self {
            PartData::Bytes(bytes) => Some(bytes.len() as u64),
            PartData::Streaming(entity) => entity.length(),
        }
    }
}

impl Part {
    pub fn bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self { name: name.into(), filename: None, content_type: None, data: PartData::Bytes(data.into()) }
    }

    pub fn streaming(name: impl Into<String>, entity: StreamingEntity) -> Self {
        Self { name: name.into(), filename: None, content_type: None, data: PartData::Streaming(entity) }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn content_type(mut self, content_type: Mime) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &PartData {
        &self.data
    }
}

/// Collaborator that frames parts on the wire.
///
/// The engine only needs the framing bytes around each part; everything
/// about the multipart format itself lives behind this trait.
pub trait PartEncoder: Send + Sync + fmt::Debug {
    fn content_type(&self, boundary: &str) -> String;

    fn part_header(&self, boundary: &str, part: &Part) -> Bytes;

    fn part_trailer(&self) -> Bytes {
        Bytes::from_static(b"\r\n")
    }

    fn closing(&self, boundary: &str) -> Bytes;
}

/// `multipart/form-data` framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormDataEncoder;

impl PartEncoder for FormDataEncoder {
    fn content_type(&self, boundary: &str) -> String {
        format!("multipart/form-data; boundary={boundary}")
    }

    fn part_header(&self, boundary: &str, part: &Part) -> Bytes {
        let mut header = String::with_capacity(128);
        let _ = write!(header, "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"", part.name);
        if let Some(filename) = &part.filename {
            let _ = write!(header, "; filename=\"{filename}\"");
        }
        header.push_str("\r\n");
        if let Some(content_type) = &part.content_type {
            let _ = write!(header, "Content-Type: {content_type}\r\n");
        }
        header.push_str("\r\n");
        Bytes::from(header)
    }

    fn closing(&self, boundary: &str) -> Bytes {
        Bytes::from(format!("--{boundary}--\r\n"))
    }
}

fn generate_boundary() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or_default();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("----micro-transfer-{:016x}{:04x}", nanos, seq & 0xffff)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Header(usize),
    Data(usize),
    Trailer(usize),
    Closing,
    Done,
}

/// An ordered set of parts encoded lazily through a [`PartEncoder`].
pub struct ComposedEntity {
    parts: Vec<Part>,
    encoder: Arc<dyn PartEncoder>,
    boundary: String,
    cursor: Cursor,
}

impl fmt::Debug for ComposedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposedEntity")
            .field("parts", &self.parts.len())
            .field("boundary", &self.boundary)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl ComposedEntity {
    pub fn new(parts: Vec<Part>) -> Self {
        Self::with_encoder(parts, Arc::new(FormDataEncoder))
    }

    pub fn with_encoder(parts: Vec<Part>, encoder: Arc<dyn PartEncoder>) -> Self {
        Self { parts, encoder, boundary: generate_boundary(), cursor: Cursor::Header(0) }
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        self.encoder.content_type(&self.boundary)
    }

    /// Encoded length, known only when every part's length is known.
    pub fn length(&self) -> Option<u64> {
        let mut total = self.encoder.closing(&self.boundary).len() as u64;
        let trailer = self.encoder.part_trailer().len() as u64;
        for part in &self.parts {
            let header = self.encoder.part_header(&self.boundary, part).len() as u64;
            total += header + part.data.length()? + trailer;
        }
        Some(total)
    }

    pub fn is_replayable(&mut self) -> bool {
        self.parts.iter_mut().all(|part| match &mut part.data {
            PartData::Bytes(_) => true,
            PartData::Streaming(entity) => entity.is_replayable(),
        })
    }

    pub fn reset(&mut self) -> io::Result<()> {
        for part in &mut self.parts {
            if let PartData::Streaming(entity) = &mut part.data {
                entity.reset()?;
            }
        }
        self.cursor = Cursor::Header(0);
        Ok(())
    }

    pub fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>> {
        loop {
            match self.cursor {
                Cursor::Header(index) => {
                    let Some(part) = self.parts.get(index) else {
                        self.cursor = Cursor::Closing;
                        continue;
                    };
                    self.cursor = Cursor::Data(index);
                    return Poll::Ready(Some(Ok(self.encoder.part_header(&self.boundary, part))));
                }
                Cursor::Data(index) => match &mut self.parts[index].data {
                    PartData::Bytes(bytes) => {
                        self.cursor = Cursor::Trailer(index);
                        if !bytes.is_empty() {
                            return Poll::Ready(Some(Ok(bytes.clone())));
                        }
                    }
                    PartData::Streaming(entity) => match entity.poll_chunk(cx) {
                        Poll::Ready(Some(result)) => return Poll::Ready(Some(result)),
                        Poll::Ready(None) => self.cursor = Cursor::Trailer(index),
                        Poll::Pending => return Poll::Pending,
                    },
                },
                Cursor::Trailer(index) => {
                    self.cursor = Cursor::Header(index + 1);
                    return Poll::Ready(Some(Ok(self.encoder.part_trailer())));
                }
                Cursor::Closing => {
                    self.cursor = Cursor::Done;
                    return Poll::Ready(Some(Ok(self.encoder.closing(&self.boundary))));
                }
                Cursor::Done => return Poll::Ready(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::entity::reader::StreamReader;
    use futures::future::poll_fn;

    async fn encode(entity: &mut ComposedEntity) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = poll_fn(|cx| entity.poll_chunk(cx)).await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn known_length_matches_encoding() {
        let mut entity = ComposedEntity::new(vec![
            Part::bytes("field", "value"),
            Part::bytes("file", "content").filename("a.txt").content_type(mime::TEXT_PLAIN),
        ]);
        let length = entity.length().unwrap();
        let encoded = encode(&mut entity).await;
        assert_eq!(encoded.len() as u64, length);

        let text = String::from_utf8(encoded).unwrap();
        let boundary = entity.boundary().to_string();
        assert!(text.starts_with(&format!("--{boundary}\r\nContent-Disposition: form-data; name=\"field\"\r\n\r\nvalue\r\n")));
        assert!(text.contains("filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\ncontent\r\n"));
        assert!(text.ends_with(&format!("--{boundary}--\r\n")));
    }

    #[test]
    fn unknown_part_length_makes_length_unknown() {
        let stream = futures::stream::iter(vec![Ok(Bytes::from_static(b"x"))]);
        let entity = ComposedEntity::new(vec![
            Part::bytes("a", "1"),
            Part::streaming("b", StreamingEntity::new(StreamReader::new(stream), None)),
        ]);
        assert_eq!(entity.length(), None);
    }

    #[test]
    fn boundaries_differ() {
        let a = ComposedEntity::new(Vec::new());
        let b = ComposedEntity::new(Vec::new());
        assert_ne!(a.boundary(), b.boundary());
    }
}
