//! Per-connection state: registration progress and the send primitives used
//! to push formatted replies out to the connection's writer task.

use std::sync::Arc;

use tokio::sync::mpsc;

use corvid_tokens::{Buffer, Command};

use crate::channel::ChannelId;
use crate::modes;

pub type ClientId = usize;

/// One line already terminated with CRLF, ready to hand to a connection's
/// writer task. `Arc<str>` so the broadcaster can clone it once per
/// recipient instead of re-formatting per recipient.
#[derive(Clone)]
pub struct OutboundItem(Arc<str>);

impl From<Buffer> for OutboundItem {
    fn from(buf: Buffer) -> Self {
        OutboundItem(buf.into_string().into())
    }
}

impl From<String> for OutboundItem {
    fn from(s: String) -> Self {
        OutboundItem(s.into())
    }
}

impl AsRef<str> for OutboundItem {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Registration progress, bit 0 = connection live, bit 1 = NICK received,
/// bit 2 = USER received.
const REGIS_ALIVE: u8 = 1;
const REGIS_NICK: u8 = 2;
const REGIS_USER: u8 = 4;
const REGIS_COMPLETE: u8 = REGIS_ALIVE | REGIS_NICK | REGIS_USER;

pub struct Client {
    id: ClientId,
    regis: u8,
    umodes: modes::Mask,
    nick: String,
    user: String,
    host: String,
    realname: String,
    pub channels: Vec<ChannelId>,
    pub away: Option<String>,
    pub last_activity: i64,
    outbox: mpsc::UnboundedSender<OutboundItem>,
}

impl Client {
    /// Initializes a (possibly recycled) slot for a freshly accepted
    /// connection. `id` must equal the slot's stable index.
    pub fn new(id: ClientId, host: String, outbox: mpsc::UnboundedSender<OutboundItem>) -> Client {
        Client {
            id,
            regis: REGIS_ALIVE,
            umodes: modes::default_user_modes(),
            nick: String::new(),
            user: String::new(),
            host,
            realname: String::new(),
            channels: Vec::new(),
            away: None,
            last_activity: 0,
            outbox,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.regis & REGIS_ALIVE != 0
    }

    pub fn is_registered(&self) -> bool {
        self.regis == REGIS_COMPLETE
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn realname(&self) -> &str {
        &self.realname
    }

    pub fn umodes(&self) -> modes::Mask {
        self.umodes
    }

    pub fn is_operator(&self) -> bool {
        self.umodes & modes::OPERATOR != 0
    }

    /// `nick!user@host`, used as the source prefix on messages the client
    /// itself originates.
    pub fn full_name(&self) -> String {
        format!("{}!{}@{}", self.nick, self.user, self.host)
    }

    /// Sets the nickname field directly. Name-map bookkeeping (`h_users`)
    /// is the registry's responsibility, not this type's: see
    /// [`crate::server::Server::change_nick`].
    pub(crate) fn set_nick(&mut self, nick: &str) -> bool {
        self.nick = nick.to_owned();
        let was_complete = self.is_registered();
        self.regis |= REGIS_NICK;
        !was_complete && self.is_registered()
    }

    /// Records USER-supplied identity, returning true the moment this
    /// completes registration (so the caller can fire the welcome
    /// sequence exactly once).
    pub(crate) fn set_user(&mut self, user: &str, realname: &str) -> bool {
        self.user = user.to_owned();
        self.realname = realname.to_owned();
        let was_complete = self.is_registered();
        self.regis |= REGIS_USER;
        !was_complete && self.is_registered()
    }

    pub(crate) fn apply_user_mode(&mut self, change: &modes::ModeChange) -> bool {
        let bit = match modes::user_char_to_bit(change.letter) {
            Some(bit) => bit,
            None => return false,
        };
        let had = self.umodes & bit != 0;
        if change.adding {
            self.umodes |= bit;
        } else {
            self.umodes &= !bit;
        }
        had != change.adding
    }

    /// Marks the slot dead so it can be recycled. Calling this on an
    /// already-dead slot is a programming error.
    pub(crate) fn disable(&mut self) {
        debug_assert!(self.is_alive(), "double-disable of client {}", self.id);
        self.regis = 0;
        self.nick.clear();
        self.user.clear();
        self.host.clear();
        self.realname.clear();
        self.channels.clear();
        self.away = None;
    }

    /// Emits `text + "\r\n"` unmodified onto this client's outbound queue.
    /// A failed send means the connection's writer task has already gone
    /// away; this is not this client's problem to report, the transport
    /// will close the connection and trigger `on_close` on its own.
    pub fn send_raw(&self, text: impl Into<OutboundItem>) {
        let _ = self.outbox.send(text.into());
    }

    /// `:<from> NNN <text>\r\n`.
    pub fn send_from(&self, from: &str, numeric: u16, text: &str) {
        let mut buf = Buffer::new();
        buf.message(from, Command::Reply(numeric)).trailing_param(text);
        self.send_raw(buf);
    }

    /// `send_from(domain, numeric, text)`.
    pub fn send_nonick(&self, domain: &str, numeric: u16, text: &str) {
        self.send_from(domain, numeric, text);
    }

    /// `send_from(domain, numeric, "<nick> <text>")`.
    pub fn send(&self, domain: &str, numeric: u16, text: &str) {
        let nick = if self.nick.is_empty() { "*" } else { &self.nick };
        self.send_from(domain, numeric, &format!("{} {}", nick, text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> (Client, mpsc::UnboundedReceiver<OutboundItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Client::new(0, "host".to_owned(), tx), rx)
    }

    #[test]
    fn registration_completes_only_after_both_nick_and_user() {
        let (mut c, _rx) = test_client();
        assert!(!c.set_nick("alice"));
        assert!(!c.is_registered());
        assert!(c.set_user("alice", "Alice Cooper"));
        assert!(c.is_registered());
    }

    #[test]
    fn set_user_then_nick_also_completes_exactly_once() {
        let (mut c, _rx) = test_client();
        assert!(!c.set_user("alice", "Alice Cooper"));
        assert!(c.set_nick("alice"));
        assert!(!c.set_nick("alice2"));
    }

    #[test]
    fn send_from_formats_numeric_with_crlf() {
        let (c, mut rx) = test_client();
        c.send_from("srv", 1, "Welcome");
        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.as_ref(), ":srv 001 Welcome\r\n");
    }

    #[test]
    fn send_prefixes_own_nick() {
        let (mut c, mut rx) = test_client();
        c.set_nick("alice");
        c.send("srv", 433, "bob :Nickname is already in use");
        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.as_ref(), ":srv 433 alice bob :Nickname is already in use\r\n");
    }

    #[test]
    fn send_uses_star_before_nick_is_set() {
        let (c, mut rx) = test_client();
        c.send("srv", 451, ":You have not registered");
        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.as_ref(), ":srv 451 * :You have not registered\r\n");
    }

    #[test]
    fn apply_user_mode_reports_whether_it_changed_anything() {
        let (mut c, _rx) = test_client();
        assert!(c.apply_user_mode(&modes::ModeChange { adding: true, letter: 'i' }));
        assert!(!c.apply_user_mode(&modes::ModeChange { adding: true, letter: 'i' }));
        assert!(c.apply_user_mode(&modes::ModeChange { adding: false, letter: 'i' }));
    }
}
