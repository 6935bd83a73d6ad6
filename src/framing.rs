// src/framing.rs
//! Bounded line framing for serial and socket streams

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Read the next non-empty line into `buf`, without its terminator.
///
/// Both `\n` and `\r` end a line, so `\r\n`, bare `\r` and bare `\n`
/// streams all frame the same. A trailing unterminated line is returned at
/// EOF. Returns `Ok(false)` at EOF with nothing buffered.
///
/// A line longer than `max_len` fails with `InvalidData`; whatever follows
/// the cut is read as the next line.
pub async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>, max_len: usize) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(!buf.is_empty());
        }

        let (consumed, complete) = match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
            Some(pos) => {
                buf.extend_from_slice(&available[..pos]);
                (pos + 1, true)
            }
            None => {
                buf.extend_from_slice(available);
                (available.len(), false)
            }
        };
        reader.consume(consumed);

        if buf.len() > max_len {
            let len = buf.len();
            buf.clear();
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line of {} bytes exceeds limit of {}", len, max_len),
            ));
        }

        if complete && !buf.is_empty() {
            return Ok(true);
        }
    }
}
