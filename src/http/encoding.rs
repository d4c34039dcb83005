//! `Accept-Encoding` negotiation and chunked, compressed body framing.

use crate::limits::RespLimits;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use std::io::{self, Write};

/// Content coding chosen for a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    /// Sent as is, framed by `content-length`.
    Identity,
    /// Raw DEFLATE data, chunked.
    Deflate,
    /// gzip, chunked.
    Gzip,
}

impl ContentEncoding {
    /// Picks the coding for an `Accept-Encoding` value.
    ///
    /// `deflate` wins over `gzip` whatever order the client lists them in;
    /// a coding offered with `q=0` counts as refused.
    pub(crate) fn negotiate(accept: Option<&str>) -> Self {
        let Some(accept) = accept else {
            return ContentEncoding::Identity;
        };

        let offered: Vec<String> = accept
            .split(',')
            .filter_map(|token| {
                let mut parts = token.split(';');
                let name = parts.next()?.trim().to_ascii_lowercase();
                let refused = parts.any(|param| {
                    let param = param.trim();
                    param
                        .strip_prefix("q=")
                        .and_then(|q| q.trim().parse::<f32>().ok())
                        .is_some_and(|q| q <= 0.0)
                });

                (!name.is_empty() && !refused).then_some(name)
            })
            .collect();

        if offered.iter().any(|name| name == "deflate") {
            ContentEncoding::Deflate
        } else if offered.iter().any(|name| name == "gzip") {
            ContentEncoding::Gzip
        } else {
            ContentEncoding::Identity
        }
    }

    /// Value for the `content-encoding` header.
    pub const fn as_str(&self) -> Option<&'static str> {
        match self {
            ContentEncoding::Identity => None,
            ContentEncoding::Deflate => Some("deflate"),
            ContentEncoding::Gzip => Some("gzip"),
        }
    }

    /// Compresses `body` into `out` as a chunked message body, terminator included.
    pub(crate) fn write_chunked(
        self,
        body: &[u8],
        limits: &RespLimits,
        out: &mut Vec<u8>,
    ) -> io::Result<()> {
        let level = Compression::new(limits.compression_level.min(9));
        let chunked = ChunkedWriter::new(out, limits.chunk_size);

        let chunked = match self {
            ContentEncoding::Deflate => {
                let mut encoder = DeflateEncoder::new(chunked, level);
                encoder.write_all(body)?;
                encoder.finish()?
            }
            ContentEncoding::Gzip => {
                let mut encoder = GzEncoder::new(chunked, level);
                encoder.write_all(body)?;
                encoder.finish()?
            }
            ContentEncoding::Identity => {
                let mut chunked = chunked;
                chunked.write_all(body)?;
                chunked
            }
        };

        chunked.finish()
    }
}

/// `Write` adapter emitting `transfer-encoding: chunked` framing, with
/// chunks never larger than `chunk_size`.
pub(crate) struct ChunkedWriter<'a> {
    out: &'a mut Vec<u8>,
    pending: Vec<u8>,
    chunk_size: usize,
}

impl<'a> ChunkedWriter<'a> {
    pub(crate) fn new(out: &'a mut Vec<u8>, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);

        Self {
            out,
            pending: Vec::with_capacity(chunk_size),
            chunk_size,
        }
    }

    fn emit(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        write!(self.out, "{:x}\r\n", self.pending.len())?;
        self.out.extend_from_slice(&self.pending);
        self.out.extend_from_slice(b"\r\n");
        self.pending.clear();

        Ok(())
    }

    /// Emits the buffered tail and the zero-length terminating chunk.
    pub(crate) fn finish(mut self) -> io::Result<()> {
        self.emit()?;
        self.out.extend_from_slice(b"0\r\n\r\n");
        Ok(())
    }
}

impl Write for ChunkedWriter<'_> {
    fn write(&mut self, mut buf: &[u8]) -> io::Result<usize> {
        let total = buf.len();

        while !buf.is_empty() {
            let take = (self.chunk_size - self.pending.len()).min(buf.len());
            self.pending.extend_from_slice(&buf[..take]);
            buf = &buf[take..];

            if self.pending.len() == self.chunk_size {
                self.emit()?;
            }
        }

        Ok(total)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reassembles a chunked body, for tests.
#[cfg(test)]
pub(crate) fn dechunk(mut data: &[u8]) -> (Vec<Vec<u8>>, &[u8]) {
    let mut chunks = Vec::new();

    loop {
        let line_end = memchr::memmem::find(data, b"\r\n").unwrap();
        let size = usize::from_str_radix(std::str::from_utf8(&data[..line_end]).unwrap(), 16).unwrap();
        data = &data[line_end + 2..];

        if size == 0 {
            assert!(data.starts_with(b"\r\n"));
            return (chunks, &data[2..]);
        }

        chunks.push(data[..size].to_vec());
        assert_eq!(&data[size..size + 2], b"\r\n");
        data = &data[size + 2..];
    }
}
