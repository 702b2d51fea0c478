//! Channel member set and channel-level metadata.

use corvid_tokens::MessageBuffer;

use crate::client::ClientId;

pub type ChannelId = usize;

/// Per-member modes within one channel (RFC 2811 §4.1): operator `@` and
/// voice `+`.
#[derive(Clone, Copy, Default)]
pub struct MemberModes {
    pub operator: bool,
    pub voice: bool,
}

impl MemberModes {
    pub fn symbol(&self) -> Option<char> {
        if self.operator {
            Some('@')
        } else if self.voice {
            Some('+')
        } else {
            None
        }
    }
}

/// One channel. Lives in a recyclable slot of the server registry; `members`
/// is kept in insertion order (a plain `Vec`, since channels rarely grow
/// past a handful of members and the ordering is an observable invariant,
/// not an implementation convenience).
#[derive(Default)]
pub struct Channel {
    pub name: String,
    members: Vec<(ClientId, MemberModes)>,

    pub topic: Option<Topic>,
    pub key: Option<String>,
    pub user_limit: Option<usize>,
    pub invite_only: bool,
    pub moderated: bool,
    pub no_external_messages: bool,
    pub secret: bool,
    pub topic_restricted: bool,
}

pub struct Topic {
    pub text: String,
    pub set_by: String,
    pub set_at: i64,
}

impl Channel {
    /// Resets a (possibly recycled) slot to a freshly created channel.
    pub fn reset(&mut self, name: &str) {
        *self = Channel::default();
        self.name = name.to_owned();
    }

    /// Adds a member with the default mode, except the very first member to
    /// join an empty channel, who becomes its operator (creator bootstrap).
    pub fn add_member(&mut self, id: ClientId) {
        let modes = if self.members.is_empty() {
            MemberModes { operator: true, voice: false }
        } else {
            MemberModes::default()
        };
        self.members.push((id, modes));
    }

    pub fn remove_member(&mut self, id: ClientId) {
        self.members.retain(|&(member, _)| member != id);
    }

    pub fn is_member(&self, id: ClientId) -> bool {
        self.members.iter().any(|&(member, _)| member == id)
    }

    pub fn member_modes(&self, id: ClientId) -> Option<MemberModes> {
        self.members.iter().find(|&&(member, _)| member == id).map(|&(_, modes)| modes)
    }

    pub fn member_modes_mut(&mut self, id: ClientId) -> Option<&mut MemberModes> {
        self.members.iter_mut().find(|(member, _)| *member == id).map(|(_, modes)| modes)
    }

    pub fn members(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.members.iter().map(|&(id, _)| id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn can_talk(&self, id: ClientId) -> bool {
        if self.moderated {
            self.member_modes(id).map_or(false, |m| m.voice || m.operator)
        } else {
            !self.no_external_messages || self.is_member(id)
        }
    }

    /// `@` when secret, `=` otherwise, per the LIST/NAMES channel-visibility
    /// symbol convention.
    pub fn symbol(&self) -> &'static str {
        if self.secret {
            "@"
        } else {
            "="
        }
    }

    /// Writes `+<flags> [limit] [key]` into an in-progress MODE reply.
    pub fn write_modes(&self, mut msg: MessageBuffer<'_>, full_info: bool) {
        let trailing = msg.raw_trailing_param();
        trailing.push('+');
        if self.invite_only {
            trailing.push('i');
        }
        if self.moderated {
            trailing.push('m');
        }
        if self.no_external_messages {
            trailing.push('n');
        }
        if self.topic_restricted {
            trailing.push('t');
        }
        if self.user_limit.is_some() {
            trailing.push('l');
        }
        if self.key.is_some() {
            trailing.push('k');
        }
        if full_info {
            if let Some(limit) = self.user_limit {
                trailing.push(' ');
                trailing.push_str(&limit.to_string());
            }
            if let Some(ref key) = self.key {
                trailing.push(' ');
                trailing.push_str(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_member_becomes_operator() {
        let mut chan = Channel::default();
        chan.reset("#test");
        chan.add_member(1);
        chan.add_member(2);
        assert!(chan.member_modes(1).unwrap().operator);
        assert!(!chan.member_modes(2).unwrap().operator);
    }

    #[test]
    fn remove_member_keeps_others_in_order() {
        let mut chan = Channel::default();
        chan.reset("#test");
        chan.add_member(1);
        chan.add_member(2);
        chan.add_member(3);
        chan.remove_member(2);
        assert_eq!(chan.members().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn moderated_blocks_non_voiced_members() {
        let mut chan = Channel::default();
        chan.reset("#test");
        chan.moderated = true;
        chan.add_member(1);
        assert!(chan.can_talk(1));
        chan.add_member(2);
        assert!(!chan.can_talk(2));
    }

    #[test]
    fn no_external_messages_still_allows_members() {
        let mut chan = Channel::default();
        chan.reset("#test");
        chan.no_external_messages = true;
        chan.add_member(1);
        assert!(chan.can_talk(1));
        assert!(!chan.can_talk(99));
    }
}
