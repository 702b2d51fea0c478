//! Buffered line framing for IRC connections.
//!
//! IRC messages are separated by CR, LF, or CRLF, and bytes arrive from the
//! transport in arbitrary chunks that may split a message anywhere,
//! including in the middle of the terminator. [`LineBuffer`] absorbs that:
//! feed it whatever the socket handed you and drain the complete lines it
//! accumulated so far.

use memchr::memchr2;

/// Bytes buffered per connection beyond which we consider the peer
/// misbehaving rather than just slow. RFC 2812 lines are <= 512 bytes; this
/// gives a comfortable margin before framing is enforced.
pub const MAX_LINE_LENGTH: usize = 2048;

/// Accumulates bytes for one connection and yields complete, terminator-free
/// lines.
///
/// Consecutive terminators (`"\r\n\r\n"`, `"\n\n"`, …) collapse: an empty
/// segment between two terminators never produces a line.
#[derive(Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    overflowed: bool,
}

/// Returned by [`LineBuffer::push`] when appending bytes would exceed
/// [`MAX_LINE_LENGTH`] without ever completing a line. The buffer is reset;
/// the caller should close the connection.
#[derive(Debug, PartialEq, Eq)]
pub struct Overflow;

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` to the pending buffer and calls `on_line` for every
    /// complete line found, in order. The terminator bytes are never
    /// included in the line passed to `on_line`.
    ///
    /// Returns `Err(Overflow)` if the buffer would grow past
    /// [`MAX_LINE_LENGTH`] while still waiting for a terminator; the pending
    /// buffer is cleared in that case so the caller can decide to recycle
    /// the connection's slot.
    pub fn push(&mut self, mut chunk: &[u8], mut on_line: impl FnMut(&[u8])) -> Result<(), Overflow> {
        while !chunk.is_empty() {
            match memchr2(b'\r', b'\n', chunk) {
                Some(pos) => {
                    if pos != 0 {
                        self.buf.extend_from_slice(&chunk[..pos]);
                    }
                    if !self.buf.is_empty() {
                        on_line(&self.buf);
                        self.buf.clear();
                    }
                    chunk = &chunk[pos + 1..];
                }
                None => {
                    if self.buf.len() + chunk.len() > MAX_LINE_LENGTH {
                        self.buf.clear();
                        self.overflowed = true;
                        return Err(Overflow);
                    }
                    self.buf.extend_from_slice(chunk);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Whether a prior call to `push` returned `Overflow`. Sticky: once set,
    /// never cleared, since the connection should be closed.
    pub fn has_overflowed(&self) -> bool {
        self.overflowed
    }

    /// Bytes currently buffered while waiting for a terminator.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(input: &[u8]) -> Vec<Vec<u8>> {
        let mut buf = LineBuffer::new();
        let mut lines = Vec::new();
        buf.push(input, |line| lines.push(line.to_vec())).unwrap();
        lines
    }

    #[test]
    fn splits_on_crlf() {
        assert_eq!(frame(b"PING x\r\nPING y\r\n"), vec![b"PING x".to_vec(), b"PING y".to_vec()]);
    }

    #[test]
    fn collapses_consecutive_terminators() {
        // S4: "PING x\r\n\r\nPING y\n" produces exactly two commands.
        assert_eq!(frame(b"PING x\r\n\r\nPING y\n"), vec![b"PING x".to_vec(), b"PING y".to_vec()]);
    }

    #[test]
    fn bare_lf_terminates() {
        assert_eq!(frame(b"NICK bob\n"), vec![b"NICK bob".to_vec()]);
    }

    #[test]
    fn drops_empty_terminator_only_lines() {
        assert_eq!(frame(b"\r\n"), Vec::<Vec<u8>>::new());
        assert_eq!(frame(b"\n"), Vec::<Vec<u8>>::new());
    }

    #[test]
    fn partial_line_waits_for_more_input() {
        let mut buf = LineBuffer::new();
        let mut lines: Vec<Vec<u8>> = Vec::new();
        buf.push(b"NICK al", |line| lines.push(line.to_vec())).unwrap();
        assert!(lines.is_empty());
        assert_eq!(buf.pending_len(), 7);
        buf.push(b"ice\r\n", |line| lines.push(line.to_vec())).unwrap();
        assert_eq!(lines, vec![b"NICK alice".to_vec()]);
    }

    #[test]
    fn resumability_matches_one_shot_framing() {
        // Property 5: feeding a message in arbitrary splits yields the same
        // lines as feeding it in one shot.
        let whole = b"NICK alice\r\nUSER alice 0 * :Alice Cooper\r\nQUIT :bye\r\n";
        let one_shot = frame(whole);

        for split_at in 0..whole.len() {
            let mut buf = LineBuffer::new();
            let mut lines: Vec<Vec<u8>> = Vec::new();
            buf.push(&whole[..split_at], |line| lines.push(line.to_vec())).unwrap();
            buf.push(&whole[split_at..], |line| lines.push(line.to_vec())).unwrap();
            assert_eq!(lines, one_shot, "split at {}", split_at);
        }
    }

    #[test]
    fn overflow_resets_and_reports() {
        let mut buf = LineBuffer::new();
        let long = vec![b'a'; MAX_LINE_LENGTH + 1];
        let res = buf.push(&long, |_| panic!("no line should complete"));
        assert_eq!(res, Err(Overflow));
        assert!(buf.has_overflowed());
        assert_eq!(buf.pending_len(), 0);
    }
}
