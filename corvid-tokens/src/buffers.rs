use std::fmt::Write as _;

use crate::Command;

/// A growable buffer of one or more complete, CRLF-terminated IRC lines.
///
/// Replaces the source's fixed 128/256-byte `snprintf` buffers: nothing
/// written through [`MessageBuffer`] is ever truncated.
#[derive(Default)]
pub struct Buffer {
    buf: String,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new message with the given source prefix (may be empty to
    /// omit the `:prefix ` entirely) and command, returning a builder for
    /// its parameters.
    pub fn message(&mut self, prefix: &str, command: Command) -> MessageBuffer<'_> {
        if !prefix.is_empty() {
            self.buf.push(':');
            self.buf.push_str(prefix);
            self.buf.push(' ');
        }
        let _ = write!(self.buf, "{}", command);
        MessageBuffer { buf: &mut self.buf }
    }

    /// Appends an already-formatted line, adding the CRLF terminator.
    /// Used by the broadcaster to forward one formatted payload to many
    /// clients without re-building it per recipient.
    pub fn push_raw(&mut self, line: &str) {
        self.buf.push_str(line);
        self.buf.push_str("\r\n");
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

/// A reply-oriented [`Buffer`] that knows the server's domain and the
/// target client's current nickname, so every numeric reply can be built
/// with one call instead of re-threading those two strings everywhere.
#[derive(Default)]
pub struct ReplyBuffer {
    domain: String,
    nick: String,
    buf: Buffer,
}

impl ReplyBuffer {
    pub fn new(domain: &str, nick: &str) -> Self {
        ReplyBuffer { domain: domain.to_owned(), nick: nick.to_owned(), buf: Buffer::new() }
    }

    /// Starts a numeric reply: `:<domain> <numeric:03> <nick> `. `nick` is
    /// `*` while the client hasn't registered one yet, matching the
    /// convention clients expect from `ERR_NOTREGISTERED` and friends.
    pub fn reply(&mut self, numeric: u16) -> MessageBuffer<'_> {
        self.buf.buf.push(':');
        self.buf.buf.push_str(&self.domain);
        let _ = write!(self.buf.buf, " {:03} ", numeric);
        self.buf.buf.push_str(if self.nick.is_empty() { "*" } else { &self.nick });
        MessageBuffer { buf: &mut self.buf.buf }
    }

    /// Starts a message with an arbitrary prefix and command, for replies
    /// that are not numerics (e.g. `CAP`, echoed `PING`/`PONG`).
    pub fn message(&mut self, prefix: &str, command: Command) -> MessageBuffer<'_> {
        self.buf.message(prefix, command)
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_str(&self) -> &str {
        self.buf.as_str()
    }

    pub fn into_buffer(self) -> Buffer {
        self.buf
    }
}

/// Builder for one message's parameters. Every path out of this type — the
/// consuming [`MessageBuffer::trailing_param`], [`MessageBuffer::build`], or
/// simply letting it drop after a chain of [`MessageBuffer::param`] calls —
/// appends the CRLF terminator exactly once.
pub struct MessageBuffer<'a> {
    buf: &'a mut String,
}

impl<'a> MessageBuffer<'a> {
    /// Appends a middle parameter. Panics in debug builds if `p` contains a
    /// space or starts with `:`, since that would silently produce a
    /// different message than the one requested — callers that need
    /// arbitrary text must use [`MessageBuffer::trailing_param`].
    pub fn param(self, p: impl AsRef<str>) -> Self {
        let p = p.as_ref();
        debug_assert!(!p.is_empty() && !p.contains(' ') && !p.starts_with(':'),
            "{:?} is not a valid middle parameter", p);
        self.buf.push(' ');
        self.buf.push_str(p);
        self
    }

    /// Appends the trailing parameter and finishes the message.
    pub fn trailing_param(self, p: impl AsRef<str>) {
        self.buf.push_str(" :");
        self.buf.push_str(p.as_ref());
    }

    /// Starts the trailing parameter and hands back the raw buffer so the
    /// caller can push arbitrary text (e.g. a space-joined NAMES list)
    /// without going through `param`'s space-free restriction.
    pub fn raw_trailing_param(&mut self) -> &mut String {
        self.buf.push_str(" :");
        self.buf
    }

    /// Finishes the message without a trailing parameter.
    pub fn build(self) {}
}

impl<'a> Drop for MessageBuffer<'a> {
    fn drop(&mut self) {
        self.buf.push_str("\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_includes_nick_and_is_terminated() {
        let mut rb = ReplyBuffer::new("srv", "alice");
        rb.reply(crate::rpl::ERR_NOSUCHNICK).param("bob").trailing_param("No such nick/channel");
        assert_eq!(rb.as_str(), ":srv 401 alice bob :No such nick/channel\r\n");
    }

    #[test]
    fn reply_before_registration_uses_star() {
        let mut rb = ReplyBuffer::new("srv", "");
        rb.reply(crate::rpl::ERR_NOTREGISTERED).trailing_param("You have not registered");
        assert_eq!(rb.as_str(), ":srv 451 * :You have not registered\r\n");
    }

    #[test]
    fn message_with_empty_prefix_omits_colon() {
        let mut buf = Buffer::new();
        buf.message("", Command::Ping).param("x");
        assert_eq!(buf.as_str(), "PING x\r\n");
    }

    #[test]
    fn raw_trailing_param_finishes_on_drop() {
        let mut rb = ReplyBuffer::new("srv", "alice");
        {
            let mut msg = rb.reply(crate::rpl::NAMREPLY).param("=").param("#chan");
            let trailing = msg.raw_trailing_param();
            trailing.push_str("alice bob");
        }
        assert_eq!(rb.as_str(), ":srv 353 alice = #chan :alice bob\r\n");
    }
}
