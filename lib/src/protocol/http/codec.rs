//! Body framing
//!
//! Decoders turn the framed bytes read from a connection into payload bytes,
//! encoders do the reverse. The payload itself is never modified, only the
//! `Content-Length`, chunked or until-close delimitation changes.
use std::cmp;

use crate::{
    buffer::Buffer,
    protocol::http::BodyLength,
    socket::{SocketHandler, SocketResult},
    TransportError,
};

/// Reads a message body from a connection
pub trait ContentDecoder {
    /// move available payload bytes into `dst`, returns how many were moved
    fn read(&mut self, dst: &mut Buffer) -> Result<usize, TransportError>;
    /// the whole body was received
    fn is_completed(&self) -> bool;
}

/// Writes a message body to a connection
pub trait ContentEncoder {
    /// take as many payload bytes from `src` as the connection accepts,
    /// returns how many were taken
    fn write(&mut self, src: &[u8]) -> Result<usize, TransportError>;
    /// mark the end of the body
    fn complete(&mut self) -> Result<(), TransportError>;
    fn is_completed(&self) -> bool;
}

/// longest chunk size or trailer line we accept before the end of line
const MAX_CHUNK_LINE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoding {
    Length(u64),
    Chunked(ChunkState),
    UntilClose,
    Done,
}

/// Decoding state of one body, kept by the session between readiness events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyDecoder {
    decoding: Decoding,
    eof: bool,
}

impl BodyDecoder {
    pub fn new(body: BodyLength) -> Self {
        let decoding = match body {
            BodyLength::None | BodyLength::Length(0) => Decoding::Done,
            BodyLength::Length(length) => Decoding::Length(length),
            BodyLength::Chunked => Decoding::Chunked(ChunkState::Size),
            BodyLength::UntilClose => Decoding::UntilClose,
        };
        BodyDecoder {
            decoding,
            eof: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.decoding == Decoding::Done
    }

    /// the connection reached end of file
    pub fn set_eof(&mut self) {
        self.eof = true;
    }

    /// Move payload bytes from the raw `input` into `output`
    pub fn decode(&mut self, input: &mut Buffer, output: &mut Buffer) -> Result<usize, TransportError> {
        let mut decoded = 0;
        loop {
            let progress = match self.decoding {
                Decoding::Done => break,
                Decoding::Length(remaining) => {
                    let count = copy(input, output, remaining);
                    decoded += count;
                    if count as u64 == remaining {
                        self.decoding = Decoding::Done;
                    } else {
                        self.decoding = Decoding::Length(remaining - count as u64);
                    }
                    count > 0
                }
                Decoding::UntilClose => {
                    let count = copy(input, output, u64::MAX);
                    decoded += count;
                    count > 0
                }
                Decoding::Chunked(ChunkState::Data(remaining)) => {
                    let count = copy(input, output, remaining);
                    decoded += count;
                    self.decoding = if count as u64 == remaining {
                        Decoding::Chunked(ChunkState::DataEnd)
                    } else {
                        Decoding::Chunked(ChunkState::Data(remaining - count as u64))
                    };
                    count > 0
                }
                Decoding::Chunked(state) => match next_line(input)? {
                    None => false,
                    Some(line) => {
                        self.decoding = chunk_line(state, &line)?;
                        true
                    }
                },
            };

            if !progress {
                break;
            }
        }

        if self.eof && !self.is_done() && !output.is_full() {
            match self.decoding {
                Decoding::UntilClose if input.is_empty() => self.decoding = Decoding::Done,
                _ => return Err(TransportError::UnexpectedEof),
            }
        }
        Ok(decoded)
    }
}

fn copy(input: &mut Buffer, output: &mut Buffer, limit: u64) -> usize {
    let count = cmp::min(input.available_data() as u64, limit) as usize;
    let count = cmp::min(count, output.available_space());
    if count == 0 {
        return 0;
    }
    let count = output.extend_from_slice(&input.used()[..count]);
    input.consume(count);
    count
}

/// one line without its end of line, `None` if it is not complete yet
fn next_line(input: &mut Buffer) -> Result<Option<Vec<u8>>, TransportError> {
    match memchr::memchr(b'\n', input.used()) {
        Some(position) => {
            let mut line = input.used()[..position].to_vec();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            input.consume(position + 1);
            Ok(Some(line))
        }
        None if input.available_data() >= MAX_CHUNK_LINE || input.is_full() => Err(
            TransportError::InvalidChunk("chunk line too long".to_owned()),
        ),
        None => Ok(None),
    }
}

fn chunk_line(state: ChunkState, line: &[u8]) -> Result<Decoding, TransportError> {
    match state {
        ChunkState::Size => {
            let size = match memchr::memchr(b';', line) {
                Some(extension) => &line[..extension],
                None => line,
            };
            let size = std::str::from_utf8(size)
                .ok()
                .and_then(|size| u64::from_str_radix(size.trim(), 16).ok())
                .ok_or_else(|| {
                    TransportError::InvalidChunk(format!(
                        "invalid chunk size {:?}",
                        String::from_utf8_lossy(line)
                    ))
                })?;
            Ok(if size == 0 {
                Decoding::Chunked(ChunkState::Trailer)
            } else {
                Decoding::Chunked(ChunkState::Data(size))
            })
        }
        ChunkState::DataEnd if line.is_empty() => Ok(Decoding::Chunked(ChunkState::Size)),
        ChunkState::DataEnd => Err(TransportError::InvalidChunk(
            "missing end of line after chunk data".to_owned(),
        )),
        // trailers are not forwarded
        ChunkState::Trailer if line.is_empty() => Ok(Decoding::Done),
        ChunkState::Trailer => Ok(Decoding::Chunked(ChunkState::Trailer)),
        ChunkState::Data(remaining) => Ok(Decoding::Chunked(ChunkState::Data(remaining))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Length(u64),
    Chunked,
    Identity,
}

const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Encoding state of one body, kept by the session between readiness events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyEncoder {
    encoding: Encoding,
    completed: bool,
    /// framing bytes still to be written after completion
    pending: &'static [u8],
}

impl BodyEncoder {
    pub fn new(body: BodyLength) -> Self {
        let encoding = match body {
            BodyLength::None => Encoding::Length(0),
            BodyLength::Length(length) => Encoding::Length(length),
            BodyLength::Chunked => Encoding::Chunked,
            BodyLength::UntilClose => Encoding::Identity,
        };
        BodyEncoder {
            encoding,
            completed: false,
            pending: &[],
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// the end of the body is not fully in the output buffer yet
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// frame as much of `src` as fits in `output`, returns the number of
    /// payload bytes taken
    pub fn encode(&mut self, src: &[u8], output: &mut Buffer) -> Result<usize, TransportError> {
        if self.completed {
            return Err(TransportError::Framing(
                "body written after its end".to_owned(),
            ));
        }
        let space = output.available_space();
        match self.encoding {
            Encoding::Length(remaining) => {
                if remaining == 0 && !src.is_empty() {
                    return Err(TransportError::Framing(
                        "body longer than its content-length".to_owned(),
                    ));
                }
                let count = cmp::min(cmp::min(src.len() as u64, remaining) as usize, space);
                let count = output.extend_from_slice(&src[..count]);
                self.encoding = Encoding::Length(remaining - count as u64);
                Ok(count)
            }
            Encoding::Identity => Ok(output.extend_from_slice(&src[..cmp::min(src.len(), space)])),
            Encoding::Chunked => {
                let overhead = hex_len(space) + 4;
                let count = cmp::min(src.len(), space.saturating_sub(overhead));
                if count == 0 {
                    return Ok(0);
                }
                let size_line = format!("{count:x}\r\n");
                output.extend_from_slice(size_line.as_bytes());
                output.extend_from_slice(&src[..count]);
                output.extend_from_slice(b"\r\n");
                Ok(count)
            }
        }
    }

    /// end the body, the terminating framing is written when there is room
    pub fn finish(&mut self, output: &mut Buffer) -> Result<(), TransportError> {
        if self.completed {
            return Ok(());
        }
        match self.encoding {
            Encoding::Length(0) | Encoding::Identity => {}
            Encoding::Length(remaining) => {
                return Err(TransportError::Framing(format!(
                    "body ended {remaining} bytes before its content-length"
                )))
            }
            Encoding::Chunked => self.pending = LAST_CHUNK,
        }
        self.completed = true;
        self.write_pending(output);
        Ok(())
    }

    /// copy the pending framing in `output`, returns true when nothing is left
    pub fn write_pending(&mut self, output: &mut Buffer) -> bool {
        if !self.pending.is_empty() {
            let count = output.extend_from_slice(self.pending);
            self.pending = &self.pending[count..];
        }
        self.pending.is_empty()
    }
}

fn hex_len(mut value: usize) -> usize {
    let mut len = 1;
    while value >= 16 {
        value >>= 4;
        len += 1;
    }
    len
}

/// [`ContentDecoder`] reading from a socket through the session raw buffer
pub struct BodyReader<'a, S: SocketHandler> {
    socket: &'a mut S,
    input: &'a mut Buffer,
    decoder: &'a mut BodyDecoder,
    socket_result: Option<SocketResult>,
}

impl<'a, S: SocketHandler> BodyReader<'a, S> {
    pub fn new(socket: &'a mut S, input: &'a mut Buffer, decoder: &'a mut BodyDecoder) -> Self {
        BodyReader {
            socket,
            input,
            decoder,
            socket_result: None,
        }
    }

    /// result of the socket read done by the last call, if any
    pub fn socket_result(&self) -> Option<SocketResult> {
        self.socket_result
    }
}

impl<S: SocketHandler> ContentDecoder for BodyReader<'_, S> {
    fn read(&mut self, dst: &mut Buffer) -> Result<usize, TransportError> {
        let mut count = self.decoder.decode(self.input, dst)?;
        if self.decoder.is_done() || dst.is_full() || self.input.is_full() || self.decoder.eof {
            return Ok(count);
        }

        let (size, result) = self.socket.socket_read(self.input.space());
        self.input.fill(size);
        self.socket_result = Some(result);
        match result {
            SocketResult::Error => return Err(TransportError::Socket),
            SocketResult::Closed => self.decoder.set_eof(),
            SocketResult::Continue | SocketResult::WouldBlock => {}
        }

        count += self.decoder.decode(self.input, dst)?;
        Ok(count)
    }

    fn is_completed(&self) -> bool {
        self.decoder.is_done()
    }
}

/// [`ContentEncoder`] writing to a socket through the session raw buffer
pub struct BodyWriter<'a, S: SocketHandler> {
    socket: &'a mut S,
    output: &'a mut Buffer,
    encoder: &'a mut BodyEncoder,
    socket_result: Option<SocketResult>,
}

impl<'a, S: SocketHandler> BodyWriter<'a, S> {
    pub fn new(socket: &'a mut S, output: &'a mut Buffer, encoder: &'a mut BodyEncoder) -> Self {
        BodyWriter {
            socket,
            output,
            encoder,
            socket_result: None,
        }
    }

    pub fn socket_result(&self) -> Option<SocketResult> {
        self.socket_result
    }

    /// push the raw buffer to the socket
    pub fn flush(&mut self) -> Result<(), TransportError> {
        self.encoder.write_pending(self.output);
        if self.output.is_empty() {
            return Ok(());
        }
        let (size, result) = self.socket.socket_write(self.output.used());
        self.output.consume(size);
        self.socket_result = Some(result);
        match result {
            SocketResult::Closed | SocketResult::Error => Err(TransportError::Socket),
            SocketResult::Continue | SocketResult::WouldBlock => {
                self.encoder.write_pending(self.output);
                Ok(())
            }
        }
    }
}

impl<S: SocketHandler> ContentEncoder for BodyWriter<'_, S> {
    fn write(&mut self, src: &[u8]) -> Result<usize, TransportError> {
        self.flush()?;
        let count = self.encoder.encode(src, self.output)?;
        self.flush()?;
        Ok(count)
    }

    fn complete(&mut self) -> Result<(), TransportError> {
        self.encoder.finish(self.output)?;
        self.flush()
    }

    fn is_completed(&self) -> bool {
        self.encoder.is_completed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// socket serving a fixed input, accepting at most `write_limit` bytes
    /// per call
    struct MockSocket {
        input: Vec<u8>,
        read_position: usize,
        closed: bool,
        written: Vec<u8>,
        write_limit: usize,
    }

    impl MockSocket {
        fn new(input: &[u8], closed: bool) -> Self {
            MockSocket {
                input: input.to_vec(),
                read_position: 0,
                closed,
                written: Vec::new(),
                write_limit: usize::MAX,
            }
        }
    }

    impl SocketHandler for MockSocket {
        fn socket_read(&mut self, buf: &mut [u8]) -> (usize, SocketResult) {
            let count = cmp::min(buf.len(), self.input.len() - self.read_position);
            buf[..count].copy_from_slice(&self.input[self.read_position..self.read_position + count]);
            self.read_position += count;
            if self.read_position < self.input.len() {
                (count, SocketResult::Continue)
            } else if self.closed {
                (count, SocketResult::Closed)
            } else {
                (count, SocketResult::WouldBlock)
            }
        }

        fn socket_write(&mut self, buf: &[u8]) -> (usize, SocketResult) {
            let count = cmp::min(buf.len(), self.write_limit);
            self.written.extend_from_slice(&buf[..count]);
            if count < buf.len() {
                (count, SocketResult::WouldBlock)
            } else {
                (count, SocketResult::Continue)
            }
        }

        fn socket_close(&mut self) {}
    }

    fn buffer_with(data: &[u8]) -> Buffer {
        let mut buffer = Buffer::with_capacity(64);
        buffer.extend_from_slice(data);
        buffer
    }

    #[test]
    fn length_decoding_stops_at_the_end() {
        let mut decoder = BodyDecoder::new(BodyLength::Length(5));
        let mut input = buffer_with(b"helloHTTP/1.1");
        let mut output = Buffer::with_capacity(64);

        assert_eq!(decoder.decode(&mut input, &mut output).unwrap(), 5);
        assert!(decoder.is_done());
        assert_eq!(output.used(), b"hello");
        // the next message stays in the raw buffer
        assert_eq!(input.used(), b"HTTP/1.1");
    }

    #[test]
    fn length_decoding_respects_output_space() {
        let mut decoder = BodyDecoder::new(BodyLength::Length(10));
        let mut input = buffer_with(b"0123456789");
        let mut output = Buffer::with_capacity(4);

        assert_eq!(decoder.decode(&mut input, &mut output).unwrap(), 4);
        assert!(!decoder.is_done());
        output.clear();
        assert_eq!(decoder.decode(&mut input, &mut output).unwrap(), 4);
        output.clear();
        assert_eq!(decoder.decode(&mut input, &mut output).unwrap(), 2);
        assert!(decoder.is_done());
    }

    #[test]
    fn chunked_decoding_across_reads() {
        let mut decoder = BodyDecoder::new(BodyLength::Chunked);
        let mut output = Buffer::with_capacity(64);

        let mut input = buffer_with(b"5;ext=1\r\nhel");
        assert_eq!(decoder.decode(&mut input, &mut output).unwrap(), 3);
        input.extend_from_slice(b"lo\r\n6\r\n world\r");
        assert_eq!(decoder.decode(&mut input, &mut output).unwrap(), 8);
        input.extend_from_slice(b"\n0\r\nX-Trailer: 1\r\n\r\n");
        decoder.decode(&mut input, &mut output).unwrap();

        assert!(decoder.is_done());
        assert_eq!(output.used(), b"hello world");
        assert!(input.is_empty());
    }

    #[test]
    fn invalid_chunks() {
        let mut output = Buffer::with_capacity(64);

        let mut decoder = BodyDecoder::new(BodyLength::Chunked);
        let mut input = buffer_with(b"zz\r\n");
        assert!(decoder.decode(&mut input, &mut output).is_err());

        let mut decoder = BodyDecoder::new(BodyLength::Chunked);
        let mut input = buffer_with(b"2\r\nabc\r\n");
        assert!(decoder.decode(&mut input, &mut output).is_err());
    }

    #[test]
    fn until_close_completes_on_eof() {
        let mut socket = MockSocket::new(b"all of it", true);
        let mut input = Buffer::with_capacity(64);
        let mut decoder = BodyDecoder::new(BodyLength::UntilClose);
        let mut output = Buffer::with_capacity(64);

        let mut reader = BodyReader::new(&mut socket, &mut input, &mut decoder);
        assert_eq!(reader.read(&mut output).unwrap(), 9);
        assert!(reader.is_completed());
        assert_eq!(reader.socket_result(), Some(SocketResult::Closed));
        assert_eq!(output.used(), b"all of it");
    }

    #[test]
    fn early_eof_is_an_error() {
        let mut socket = MockSocket::new(b"short", true);
        let mut input = Buffer::with_capacity(64);
        let mut decoder = BodyDecoder::new(BodyLength::Length(100));
        let mut output = Buffer::with_capacity(64);

        let mut reader = BodyReader::new(&mut socket, &mut input, &mut decoder);
        assert!(matches!(
            reader.read(&mut output),
            Err(TransportError::UnexpectedEof)
        ));
    }

    #[test]
    fn reader_uses_buffered_bytes_first() {
        let mut socket = MockSocket::new(b"lo", false);
        let mut input = buffer_with(b"hel");
        let mut decoder = BodyDecoder::new(BodyLength::Length(5));
        let mut output = Buffer::with_capacity(64);

        let mut reader = BodyReader::new(&mut socket, &mut input, &mut decoder);
        assert_eq!(reader.read(&mut output).unwrap(), 5);
        assert!(reader.is_completed());
        assert_eq!(output.used(), b"hello");
    }

    #[test]
    fn chunked_encoding() {
        let mut socket = MockSocket::new(b"", false);
        let mut output = Buffer::with_capacity(64);
        let mut encoder = BodyEncoder::new(BodyLength::Chunked);

        let mut writer = BodyWriter::new(&mut socket, &mut output, &mut encoder);
        assert_eq!(writer.write(b"hello").unwrap(), 5);
        assert_eq!(writer.write(b"").unwrap(), 0);
        writer.complete().unwrap();
        assert!(writer.is_completed());

        assert_eq!(socket.written, b"5\r\nhello\r\n0\r\n\r\n");
    }

    #[test]
    fn chunked_encoding_respects_space() {
        let mut output = Buffer::with_capacity(16);
        let mut encoder = BodyEncoder::new(BodyLength::Chunked);
        let data = [b'x'; 32];

        // "a\r\n" + 10 bytes + "\r\n"
        let count = encoder.encode(&data, &mut output).unwrap();
        assert_eq!(count, 10);
        assert_eq!(output.available_data(), 15);
        assert_eq!(encoder.encode(&data, &mut output).unwrap(), 0);

        // the last chunk waits for room in the buffer
        encoder.finish(&mut output).unwrap();
        assert!(encoder.is_completed());
        assert!(encoder.has_pending());
        output.clear();
        assert!(encoder.write_pending(&mut output));
        assert_eq!(output.used(), &LAST_CHUNK[1..]);
    }

    #[test]
    fn length_encoding() {
        let mut output = Buffer::with_capacity(64);
        let mut encoder = BodyEncoder::new(BodyLength::Length(4));

        assert!(encoder.finish(&mut output).is_err());
        assert_eq!(encoder.encode(b"abcdef", &mut output).unwrap(), 4);
        assert!(encoder.encode(b"ef", &mut output).is_err());
        encoder.finish(&mut output).unwrap();
        assert!(encoder.is_completed());
        assert_eq!(output.used(), b"abcd");
    }

    #[test]
    fn writer_keeps_what_the_socket_refuses() {
        let mut socket = MockSocket::new(b"", false);
        socket.write_limit = 3;
        let mut output = Buffer::with_capacity(64);
        let mut encoder = BodyEncoder::new(BodyLength::UntilClose);

        let mut writer = BodyWriter::new(&mut socket, &mut output, &mut encoder);
        assert_eq!(writer.write(b"abcdef").unwrap(), 6);
        assert_eq!(writer.socket_result(), Some(SocketResult::WouldBlock));
        assert_eq!(output.used(), b"def");
        assert_eq!(socket.written, b"abc");
    }
}
