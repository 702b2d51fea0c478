//! The server registry: slot storage for clients and channels, the
//! case-insensitive name indices over them, and the broadcaster built on
//! top. Every mutation funnels through one logical owner — see the
//! concurrency note on [`crate::Shared`].

mod router;

use std::collections::HashMap;

use slab::Slab;
use tokio::sync::mpsc;

use corvid_tokens::{rpl, ReplyBuffer};
use corvid_unicase::UniCase;

use crate::channel::{Channel, ChannelId};
use crate::client::{Client, ClientId, OutboundItem};
use crate::config::Config;
use crate::counters::{self, Counters};
use crate::lines;
use crate::validate;

pub use router::RouterAction;

pub struct Server {
    clients: Slab<Client>,
    channels: Slab<Channel>,
    h_users: HashMap<UniCase<String>, ClientId>,
    h_channels: HashMap<UniCase<String>, ChannelId>,
    counters: Counters,
    config: Config,
    created_at: String,
}

impl Server {
    pub fn new(config: Config, created_at: String) -> Server {
        Server {
            clients: Slab::new(),
            channels: Slab::new(),
            h_users: HashMap::new(),
            h_channels: HashMap::new(),
            counters: Counters::new(),
            config,
            created_at,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn domain(&self) -> &str {
        &self.config.domain
    }

    // --- Registry: client slots -------------------------------------------------

    /// Accepts a new connection: allocates (or recycles) a client slot and
    /// bumps the connection counters.
    pub fn new_client(&mut self, host: String, outbox: mpsc::UnboundedSender<OutboundItem>) -> ClientId {
        let entry = self.clients.vacant_entry();
        let id = entry.key();
        entry.insert(Client::new(id, host, outbox));
        self.counters.note_connection_accepted();
        id
    }

    pub fn client(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(id)
    }

    fn client_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.clients.get_mut(id)
    }

    pub fn user_by_name(&self, nick: &str) -> Option<ClientId> {
        self.h_users.get(<&UniCase<str>>::from(nick)).copied()
    }

    /// Removes a client's nickname from the index, broadcasts its QUIT to
    /// every channel it shared with someone, and recycles its slot.
    /// Idempotent is not guaranteed past the first call: re-disabling an
    /// already-removed id is a programming error, matching the source's
    /// "debug-assert on re-entry" contract.
    pub fn disable_client(&mut self, id: ClientId) {
        if let Some(nick) = self.clients.get(id).map(|c| c.nick().to_owned()).filter(|n| !n.is_empty()) {
            self.h_users.remove(<&UniCase<str>>::from(nick.as_str()));
        }
        let channels = self.clients.get(id).map(|c| c.channels.clone()).unwrap_or_default();
        for chan_id in channels {
            self.part_channel(id, chan_id);
        }
        if let Some(client) = self.clients.get_mut(id) {
            let was_registered = client.is_registered();
            let was_operator = client.is_operator();
            client.disable();
            self.clients.remove(id);
            self.counters.decrement(counters::TOTAL_USERS);
            self.counters.decrement(counters::LOCAL_USERS);
            if was_registered {
                self.counters.decrement(counters::REGGED_USERS);
            }
            if was_operator {
                self.counters.decrement(counters::OPERATORS);
            }
        }
    }

    /// Broadcasts the client's QUIT line to everyone who could see it, then
    /// disables the slot. Idempotent in the sense the spec requires: a
    /// second call finds an empty channel list and an already-removed
    /// nickname, so it degrades to just recycling the (already-gone) slot.
    pub fn handle_quit(&mut self, id: ClientId, reason: &str) {
        if let Some(client) = self.clients.get(id) {
            if client.is_registered() {
                let mut buf = corvid_tokens::Buffer::new();
                buf.message(&client.full_name(), corvid_tokens::Command::Quit).trailing_param(reason);
                self.user_bcast_butone(id, buf.as_str());
            }
        }
        self.disable_client(id);
    }

    /// `NICK` handling: validates, checks availability, and swaps the name
    /// index entry. Returns `Err((numeric, text))` for the reply to send
    /// back to the client on failure; the caller is expected to still
    /// attach `new` itself as the numeric's leading parameter.
    pub fn change_nick(&mut self, id: ClientId, new: &str) -> Result<bool, (u16, &'static str)> {
        let minlen = self.config.nick_minlen as usize;
        let maxlen = self.config.nick_maxlen as usize;
        if new.len() < minlen {
            return Err((rpl::ERR_ERRONEUSNICKNAME, "Nickname too short"));
        }
        if new.len() > maxlen {
            return Err((rpl::ERR_ERRONEUSNICKNAME, "Nickname too long"));
        }
        if !validate::is_valid_nickname(new) {
            return Err((rpl::ERR_ERRONEUSNICKNAME, "Erroneous nickname"));
        }
        if let Some(existing) = self.user_by_name(new) {
            if existing != id {
                return Err((rpl::ERR_NICKNAMEINUSE, "Nickname is already in use"));
            }
        }
        let old_nick = self.clients[id].nick().to_owned();
        if !old_nick.is_empty() {
            self.h_users.remove(<&UniCase<str>>::from(old_nick.as_str()));
        }
        self.h_users.insert(UniCase::new(new.to_owned()), id);
        let became_registered = self.clients[id].set_nick(new);
        Ok(became_registered)
    }

    // --- Registry: channel slots -------------------------------------------------

    pub fn channel_by_name(&self, name: &str) -> Option<ChannelId> {
        self.h_channels.get(<&UniCase<str>>::from(name)).copied()
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(id)
    }

    fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(id)
    }

    /// Allocates and resets a channel slot. Registering the new channel's
    /// name in `h_channels` is the caller's job, once it has confirmed the
    /// name is free and valid (see `JOIN`'s handler).
    fn create_channel(&mut self, name: &str) -> ChannelId {
        let entry = self.channels.vacant_entry();
        let id = entry.key();
        let mut chan = Channel::default();
        chan.reset(name);
        entry.insert(chan);
        self.counters.increment(counters::CHANNELS);
        id
    }

    /// Joins `id` to the channel named `name`, creating it if it doesn't
    /// exist yet. Returns the channel id, or `Err` with the numeric/text to
    /// reply with if the client has already hit `client_maxchans`.
    pub fn join_channel(&mut self, id: ClientId, name: &str) -> Result<ChannelId, (u16, &'static str)> {
        if self.clients[id].channels.len() >= self.config.client_maxchans {
            return Err((rpl::ERR_CHANNELISFULL, "You have joined too many channels"));
        }
        let chan_id = match self.channel_by_name(name) {
            Some(id) => id,
            None => {
                let id = self.create_channel(name);
                self.h_channels.insert(UniCase::new(name.to_owned()), id);
                id
            }
        };
        self.channels[chan_id].add_member(id);
        self.clients[id].channels.push(chan_id);
        Ok(chan_id)
    }

    /// Removes `id` from the channel on both sides of the membership
    /// invariant, recycling the channel slot if it becomes empty.
    pub fn part_channel(&mut self, id: ClientId, chan_id: ChannelId) {
        if let Some(chan) = self.channels.get_mut(chan_id) {
            chan.remove_member(id);
            let empty = chan.is_empty();
            let name = chan.name.clone();
            if empty {
                self.h_channels.remove(<&UniCase<str>>::from(name.as_str()));
                self.channels.remove(chan_id);
                self.counters.decrement(counters::CHANNELS);
            }
        }
        if let Some(client) = self.clients.get_mut(id) {
            client.channels.retain(|&c| c != chan_id);
        }
    }

    // --- Broadcaster --------------------------------------------------------

    /// Union of the members of every channel `id` belongs to.
    fn visibility_set(&self, id: ClientId) -> Vec<ClientId> {
        let mut seen = std::collections::HashSet::new();
        let mut set = Vec::new();
        if let Some(client) = self.clients.get(id) {
            for &chan_id in &client.channels {
                if let Some(chan) = self.channels.get(chan_id) {
                    for member in chan.members() {
                        if seen.insert(member) {
                            set.push(member);
                        }
                    }
                }
            }
        }
        set
    }

    /// Sends `line` to every client that shares a channel with `id`,
    /// including `id` itself.
    pub fn user_bcast(&self, id: ClientId, line: &str) {
        let mut set = self.visibility_set(id);
        if !set.contains(&id) {
            set.push(id);
        }
        self.send_to_set(&set, line);
    }

    /// Same as [`Server::user_bcast`] but excludes `id`.
    pub fn user_bcast_butone(&self, id: ClientId, line: &str) {
        let set = self.visibility_set(id);
        self.send_to_set(&set.into_iter().filter(|&m| m != id).collect::<Vec<_>>(), line);
    }

    /// Sends `line` to every member of one channel.
    pub fn channel_bcast(&self, chan_id: ChannelId, line: &str) {
        if let Some(chan) = self.channels.get(chan_id) {
            let members: Vec<_> = chan.members().collect();
            self.send_to_set(&members, line);
        }
    }

    fn send_to_set(&self, set: &[ClientId], line: &str) {
        for &id in set {
            if let Some(client) = self.clients.get(id) {
                client.send_raw(line.to_owned());
            }
        }
    }

    // --- Welcome sequence -----------------------------------------------------

    /// Fires once, the moment a client completes registration.
    fn send_welcome(&mut self, id: ClientId) {
        self.counters.increment(counters::REGGED_USERS);
        let client = &self.clients[id];
        let mut rb = ReplyBuffer::new(self.domain(), client.nick());
        lines::welcome(rb.reply(rpl::WELCOME), &client.full_name());
        lines::your_host(rb.reply(rpl::YOURHOST), self.domain(), env!("CARGO_PKG_VERSION"));
        lines::created(rb.reply(rpl::CREATED), &self.created_at);
        rb.reply(rpl::MYINFO)
            .param(self.domain())
            .param(env!("CARGO_PKG_VERSION"))
            .param("iwso")
            .trailing_param("ov");
        self.write_i_support(&mut rb);
        self.write_lusers(&mut rb);
        self.write_motd(&mut rb);
        client.send_raw(rb.into_buffer());
    }

    fn write_i_support(&self, rb: &mut ReplyBuffer) {
        rb.reply(rpl::ISUPPORT)
            .param(format!("NICKLEN={}", self.config.nick_maxlen))
            .param(format!("CHANNELLEN={}", self.config.chan_maxlen))
            .param("CHANTYPES=#&")
            .param("PREFIX=(ov)@+")
            .trailing_param("are supported by this server");
    }

    fn write_lusers(&self, rb: &mut ReplyBuffer) {
        lines::luser_client(rb.reply(rpl::LUSERCLIENT), self.clients.len());
        rb.reply(rpl::LUSEROP)
            .param(&self.counters.get(counters::OPERATORS).to_string())
            .trailing_param("operator(s) online");
        rb.reply(rpl::LUSERCHANNELS)
            .param(&self.counters.get(counters::CHANNELS).to_string())
            .trailing_param("channels formed");
        lines::luser_me(rb.reply(rpl::LUSERME), self.clients.len());
    }

    fn write_motd(&self, rb: &mut ReplyBuffer) {
        match self.config.motd() {
            None => {
                rb.reply(rpl::ERR_NOMOTD).trailing_param(lines::NO_MOTD);
            }
            Some(motd_lines) => {
                lines::motd_start(rb.reply(rpl::MOTDSTART), self.domain());
                for line in &motd_lines {
                    rb.reply(rpl::MOTD).trailing_param(line);
                }
                rb.reply(rpl::ENDOFMOTD).trailing_param(lines::END_OF_MOTD);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_server() -> Server {
        Server::new(Config::default(), "Thu Jan 1 1970 at 00:00:00 UTC".to_owned())
    }

    fn add_client(server: &mut Server, host: &str) -> ClientId {
        let (tx, _rx) = mpsc::unbounded_channel();
        server.new_client(host.to_owned(), tx)
    }

    #[test]
    fn disable_client_is_idempotent_on_the_user_counters() {
        let mut server = test_server();
        let alice = add_client(&mut server, "host");
        assert_eq!(server.counters.get(counters::TOTAL_USERS), 1);
        server.disable_client(alice);
        assert_eq!(server.counters.get(counters::TOTAL_USERS), 0);
        assert_eq!(server.counters.get(counters::LOCAL_USERS), 0);
        // A second disable on an already-gone slot (the real-world shape of
        // handle_quit firing once from QUIT and once more from the
        // transport's connection-closed cleanup) must not double-decrement.
        server.disable_client(alice);
        assert_eq!(server.counters.get(counters::TOTAL_USERS), 0);
        assert_eq!(server.counters.get(counters::LOCAL_USERS), 0);
    }

    #[test]
    fn disable_client_decrements_regged_and_operator_counts() {
        let mut server = test_server();
        let alice = add_client(&mut server, "host");
        server.change_nick(alice, "alice").unwrap();
        server.client_mut(alice).unwrap().set_user("alice", "Alice Cooper");
        server.send_welcome(alice);
        server.client_mut(alice).unwrap().apply_user_mode(&crate::modes::ModeChange { adding: true, letter: 'o' });
        server.counters.increment(counters::OPERATORS);
        assert_eq!(server.counters.get(counters::REGGED_USERS), 1);
        assert_eq!(server.counters.get(counters::OPERATORS), 1);
        server.disable_client(alice);
        assert_eq!(server.counters.get(counters::REGGED_USERS), 0);
        assert_eq!(server.counters.get(counters::OPERATORS), 0);
    }

    #[test]
    fn new_client_slots_are_stable_and_recycled() {
        let mut server = test_server();
        let a = add_client(&mut server, "a.example");
        let b = add_client(&mut server, "b.example");
        assert_ne!(a, b);
        server.disable_client(a);
        let c = add_client(&mut server, "c.example");
        assert_eq!(c, a, "freed slot should be recycled before the vector grows");
    }

    #[test]
    fn change_nick_registers_and_rejects_collisions() {
        let mut server = test_server();
        let alice = add_client(&mut server, "host");
        let bob = add_client(&mut server, "host");
        assert!(server.change_nick(alice, "alice").is_ok());
        assert_eq!(server.user_by_name("ALICE"), Some(alice), "name lookups are case-insensitive");

        match server.change_nick(bob, "alice") {
            Err((numeric, _)) => assert_eq!(numeric, rpl::ERR_NICKNAMEINUSE),
            Ok(_) => panic!("expected a collision error"),
        }
    }

    #[test]
    fn change_nick_rejects_bad_names() {
        let mut server = test_server();
        let id = add_client(&mut server, "host");
        match server.change_nick(id, "9bad") {
            Err((numeric, _)) => assert_eq!(numeric, rpl::ERR_ERRONEUSNICKNAME),
            Ok(_) => panic!("leading digit should be rejected"),
        }
    }

    #[test]
    fn disable_client_frees_nickname_and_memberships() {
        let mut server = test_server();
        let alice = add_client(&mut server, "host");
        server.change_nick(alice, "alice").unwrap();
        let chan_id = server.join_channel(alice, "#rust").unwrap();
        server.disable_client(alice);
        assert_eq!(server.user_by_name("alice"), None);
        assert!(server.channel(chan_id).is_none(), "the last member leaving recycles the channel");
    }

    #[test]
    fn join_then_part_recycles_the_channel_slot() {
        let mut server = test_server();
        let alice = add_client(&mut server, "host");
        let chan_id = server.join_channel(alice, "#rust").unwrap();
        assert_eq!(server.channel_by_name("#rust"), Some(chan_id));
        server.part_channel(alice, chan_id);
        assert_eq!(server.channel_by_name("#rust"), None);
        assert!(server.client(alice).unwrap().channels.is_empty());
    }

    #[test]
    fn join_channel_enforces_the_per_client_cap() {
        let mut server = test_server();
        server.config.client_maxchans = 1;
        let alice = add_client(&mut server, "host");
        assert!(server.join_channel(alice, "#one").is_ok());
        match server.join_channel(alice, "#two") {
            Err((numeric, _)) => assert_eq!(numeric, rpl::ERR_CHANNELISFULL),
            Ok(_) => panic!("expected the per-client channel cap to trigger"),
        }
    }

    #[test]
    fn user_bcast_reaches_self_and_shared_channel_members_once() {
        let mut server = test_server();
        let alice = add_client(&mut server, "host");
        let bob = add_client(&mut server, "host");
        let chan_a = server.join_channel(alice, "#a").unwrap();
        server.join_channel(bob, "#a").unwrap();
        server.join_channel(alice, "#b").unwrap();
        server.join_channel(bob, "#b").unwrap();
        let _ = chan_a;

        let mut set = server.visibility_set(alice);
        set.sort_unstable();
        set.dedup();
        assert_eq!(set, vec![alice.min(bob), alice.max(bob)]);
    }
}
