//! Command Router and the handler bodies built on top of the registry.

use corvid_tokens::{rpl, Buffer, Command, Message, ReplyBuffer};

use crate::channel::ChannelId;
use crate::client::ClientId;
use crate::{counters, lines, modes, util, validate};

use super::Server;

/// What the transport should do once `handle_message` returns.
pub enum RouterAction {
    Continue,
    Close,
}

/// Commands accepted before registration completes.
fn allowed_unregistered(command: Command) -> bool {
    matches!(command, Command::Nick | Command::User | Command::Pass | Command::Quit | Command::Cap)
}

impl Server {
    fn reply_buffer(&self, id: ClientId) -> ReplyBuffer {
        let nick = self.client(id).map(|c| c.nick()).unwrap_or("");
        ReplyBuffer::new(self.domain(), nick)
    }

    fn flush(&self, id: ClientId, rb: ReplyBuffer) {
        if rb.is_empty() {
            return;
        }
        if let Some(client) = self.client(id) {
            client.send_raw(rb.into_buffer());
        }
    }

    /// Parses one line and dispatches it. Parse failures and empty lines
    /// are silent no-ops, per the splitter's contract.
    pub fn handle_message(&mut self, id: ClientId, line: &str) -> RouterAction {
        let msg = match Message::parse(line) {
            Some(msg) => msg,
            None => return RouterAction::Continue,
        };
        if let Some(client) = self.client_mut(id) {
            client.last_activity = util::now();
        }

        let command = match msg.command {
            Ok(command) => command,
            Err(word) => {
                let mut rb = self.reply_buffer(id);
                if self.client(id).map_or(false, |c| c.is_registered()) {
                    rb.reply(rpl::ERR_UNKNOWNCOMMAND).param(word).trailing_param(lines::UNKNOWN_COMMAND);
                } else {
                    rb.reply(rpl::ERR_NOTREGISTERED).trailing_param(lines::NOT_REGISTERED);
                }
                self.flush(id, rb);
                return RouterAction::Continue;
            }
        };

        let registered = self.client(id).map_or(false, |c| c.is_registered());
        if !registered && !allowed_unregistered(command) {
            let mut rb = self.reply_buffer(id);
            rb.reply(rpl::ERR_NOTREGISTERED).trailing_param(lines::NOT_REGISTERED);
            self.flush(id, rb);
            return RouterAction::Continue;
        }

        if !msg.has_enough_params() {
            let mut rb = self.reply_buffer(id);
            lines::need_more_params(rb.reply(rpl::ERR_NEEDMOREPARAMS), &command.to_string());
            self.flush(id, rb);
            return RouterAction::Continue;
        }

        let params: Vec<&str> = msg.params[..msg.num_params].to_vec();

        match command {
            Command::Nick => { self.cmd_nick(id, &params); RouterAction::Continue }
            Command::User => { self.cmd_user(id, &params); RouterAction::Continue }
            Command::Pass => RouterAction::Continue,
            Command::Quit => { self.cmd_quit(id, &params); RouterAction::Close }
            Command::Cap => { self.cmd_cap(id, &params); RouterAction::Continue }
            Command::Ping => { self.cmd_ping(id, &params); RouterAction::Continue }
            Command::Pong => RouterAction::Continue,
            Command::Join => { self.cmd_join(id, &params); RouterAction::Continue }
            Command::Part => { self.cmd_part(id, &params); RouterAction::Continue }
            Command::PrivMsg => { self.cmd_privmsg(id, &params, false); RouterAction::Continue }
            Command::Notice => { self.cmd_privmsg(id, &params, true); RouterAction::Continue }
            Command::Topic => { self.cmd_topic(id, &params); RouterAction::Continue }
            Command::Names => { self.cmd_names(id, &params); RouterAction::Continue }
            Command::List => { self.cmd_list(id, &params); RouterAction::Continue }
            Command::Who => { self.cmd_who(id, &params); RouterAction::Continue }
            Command::Whois => { self.cmd_whois(id, &params); RouterAction::Continue }
            Command::Mode => { self.cmd_mode(id, &params); RouterAction::Continue }
            Command::Kill => { self.cmd_kill(id, &params); RouterAction::Continue }
            Command::Oper => { self.cmd_oper(id, &params); RouterAction::Continue }
            Command::Away => { self.cmd_away(id, &params); RouterAction::Continue }
            Command::Ison => { self.cmd_ison(id, &params); RouterAction::Continue }
            Command::UserHost => { self.cmd_userhost(id, &params); RouterAction::Continue }
            Command::Invite => { self.cmd_invite(id, &params); RouterAction::Continue }
            Command::Kick => { self.cmd_kick(id, &params); RouterAction::Continue }
            Command::Lusers => { self.cmd_lusers(id); RouterAction::Continue }
            Command::Motd => { self.cmd_motd(id); RouterAction::Continue }
            Command::Version => { self.cmd_version(id); RouterAction::Continue }
            Command::Time => { self.cmd_time(id); RouterAction::Continue }
            Command::Admin | Command::Info | Command::Stats => { self.cmd_canned(id); RouterAction::Continue }
            Command::Reply(_) => RouterAction::Continue,
            // `Command` is `#[non_exhaustive]`: every variant that exists
            // today is matched above, this only guards future additions.
            _ => RouterAction::Continue,
        }
    }

    fn cmd_nick(&mut self, id: ClientId, params: &[&str]) {
        let new = params[0];
        match self.change_nick(id, new) {
            Ok(became_registered) => {
                if became_registered {
                    self.send_welcome(id);
                }
            }
            Err((numeric, text)) => {
                let mut rb = self.reply_buffer(id);
                rb.reply(numeric).param(new).trailing_param(text);
                self.flush(id, rb);
            }
        }
    }

    fn cmd_user(&mut self, id: ClientId, params: &[&str]) {
        if self.client(id).map_or(false, |c| c.is_registered()) {
            let mut rb = self.reply_buffer(id);
            rb.reply(rpl::ERR_ALREADYREGISTRED).trailing_param(lines::ALREADY_REGISTERED);
            return self.flush(id, rb);
        }
        let user = params[0];
        let realname = params[3];
        let became_registered = self.client_mut(id).map_or(false, |c| c.set_user(user, realname));
        if became_registered {
            self.send_welcome(id);
        }
    }

    fn cmd_quit(&mut self, id: ClientId, params: &[&str]) {
        let reason = params.get(0).copied().unwrap_or("Client Quit");
        self.handle_quit(id, reason);
    }

    fn cmd_cap(&mut self, id: ClientId, params: &[&str]) {
        if params.get(0).map_or(false, |s| s.eq_ignore_ascii_case("LS")) {
            let mut buf = Buffer::new();
            buf.message(self.domain(), Command::Cap).param("*").param("LS").trailing_param("");
            if let Some(client) = self.client(id) {
                client.send_raw(buf);
            }
        }
    }

    fn cmd_ping(&mut self, id: ClientId, params: &[&str]) {
        if let Some(client) = self.client(id) {
            let mut buf = Buffer::new();
            buf.message(self.domain(), Command::Pong).param(self.domain()).trailing_param(params[0]);
            client.send_raw(buf);
        }
    }

    fn cmd_join(&mut self, id: ClientId, params: &[&str]) {
        let mut keys = params.get(1).map(|k| k.split(',')).into_iter().flatten();
        for name in params[0].split(',') {
            let key = keys.next();
            if !validate::is_valid_channel_name(name)
                || name.len() < self.config().chan_minlen as usize
                || name.len() > self.config().chan_maxlen as usize
            {
                let mut rb = self.reply_buffer(id);
                rb.reply(rpl::ERR_NOSUCHCHANNEL).param(name).trailing_param(lines::NO_SUCH_CHANNEL);
                self.flush(id, rb);
                continue;
            }
            if let Some(chan_id) = self.channel_by_name(name) {
                if let Some(reject) = self.check_join_allowed(chan_id, key) {
                    let mut rb = self.reply_buffer(id);
                    rb.reply(reject.0).param(name).trailing_param(reject.1);
                    self.flush(id, rb);
                    continue;
                }
            }
            match self.join_channel(id, name) {
                Ok(chan_id) => self.announce_join(id, chan_id),
                Err((numeric, text)) => {
                    let mut rb = self.reply_buffer(id);
                    rb.reply(numeric).param(name).trailing_param(text);
                    self.flush(id, rb);
                }
            }
        }
    }

    fn check_join_allowed(&self, chan_id: ChannelId, key: Option<&str>) -> Option<(u16, &'static str)> {
        let chan = self.channel(chan_id)?;
        if chan.invite_only {
            return Some((rpl::ERR_INVITEONLYCHAN, "Cannot join channel (+i)"));
        }
        if let Some(ref required) = chan.key {
            if key != Some(required.as_str()) {
                return Some((rpl::ERR_BADCHANNELKEY, "Cannot join channel (+k)"));
            }
        }
        if let Some(limit) = chan.user_limit {
            if chan.member_count() >= limit {
                return Some((rpl::ERR_CHANNELISFULL, "Cannot join channel (+l)"));
            }
        }
        None
    }

    fn announce_join(&mut self, id: ClientId, chan_id: ChannelId) {
        let full_name = self.client(id).map(|c| c.full_name()).unwrap_or_default();
        let name = self.channel(chan_id).map(|c| c.name.clone()).unwrap_or_default();
        let mut buf = Buffer::new();
        buf.message(&full_name, Command::Join).trailing_param(&name);
        self.channel_bcast(chan_id, buf.as_str());
        self.send_topic(id, chan_id, false);
        self.send_names(id, chan_id);
    }

    fn cmd_part(&mut self, id: ClientId, params: &[&str]) {
        let reason = params.get(1).copied().unwrap_or("");
        for name in params[0].split(',') {
            let chan_id = match self.channel_by_name(name) {
                Some(chan_id) => chan_id,
                None => {
                    let mut rb = self.reply_buffer(id);
                    rb.reply(rpl::ERR_NOSUCHCHANNEL).param(name).trailing_param(lines::NO_SUCH_CHANNEL);
                    self.flush(id, rb);
                    continue;
                }
            };
            if self.channel(chan_id).map_or(false, |c| !c.is_member(id)) {
                let mut rb = self.reply_buffer(id);
                rb.reply(rpl::ERR_NOTONCHANNEL).param(name).trailing_param(lines::NOT_ON_CHANNEL);
                self.flush(id, rb);
                continue;
            }
            let full_name = self.client(id).map(|c| c.full_name()).unwrap_or_default();
            let mut buf = Buffer::new();
            buf.message(&full_name, Command::Part).param(name).trailing_param(reason);
            self.channel_bcast(chan_id, buf.as_str());
            self.part_channel(id, chan_id);
        }
    }

    fn cmd_privmsg(&mut self, id: ClientId, params: &[&str], is_notice: bool) {
        let target = params[0];
        let text = params[1];
        let full_name = self.client(id).map(|c| c.full_name()).unwrap_or_default();
        let command = if is_notice { Command::Notice } else { Command::PrivMsg };

        if validate::is_valid_channel_name(target) {
            let chan_id = match self.channel_by_name(target) {
                Some(chan_id) => chan_id,
                None => return self.reply_no_target(id, target, is_notice),
            };
            if !self.channel(chan_id).map_or(false, |c| c.can_talk(id)) {
                if !is_notice {
                    let mut rb = self.reply_buffer(id);
                    rb.reply(rpl::ERR_CANNOTSENDTOCHAN).param(target).trailing_param("Cannot send to channel");
                    self.flush(id, rb);
                }
                return;
            }
            let mut buf = Buffer::new();
            buf.message(&full_name, command).param(target).trailing_param(text);
            let members: Vec<_> = self.channel(chan_id).map(|c| c.members().collect()).unwrap_or_default();
            for member in members {
                if member != id {
                    if let Some(client) = self.client(member) {
                        client.send_raw(buf.as_str().to_owned());
                    }
                }
            }
        } else {
            let target_id = match self.user_by_name(target) {
                Some(target_id) => target_id,
                None => return self.reply_no_target(id, target, is_notice),
            };
            let mut buf = Buffer::new();
            buf.message(&full_name, command).param(target).trailing_param(text);
            if let Some(client) = self.client(target_id) {
                client.send_raw(buf.as_str().to_owned());
            }
            if !is_notice {
                if let Some(away) = self.client(target_id).and_then(|c| c.away.clone()) {
                    let mut rb = self.reply_buffer(id);
                    rb.reply(rpl::AWAY).param(target).trailing_param(&away);
                    self.flush(id, rb);
                }
            }
        }
    }

    fn reply_no_target(&self, id: ClientId, target: &str, is_notice: bool) {
        if is_notice {
            return;
        }
        let mut rb = self.reply_buffer(id);
        rb.reply(rpl::ERR_NOSUCHNICK).param(target).trailing_param(lines::NO_SUCH_NICK);
        self.flush(id, rb);
    }

    fn cmd_topic(&mut self, id: ClientId, params: &[&str]) {
        let name = params[0];
        let chan_id = match self.channel_by_name(name) {
            Some(chan_id) => chan_id,
            None => {
                let mut rb = self.reply_buffer(id);
                rb.reply(rpl::ERR_NOSUCHCHANNEL).param(name).trailing_param(lines::NO_SUCH_CHANNEL);
                return self.flush(id, rb);
            }
        };
        if self.channel(chan_id).map_or(false, |c| !c.is_member(id)) {
            let mut rb = self.reply_buffer(id);
            rb.reply(rpl::ERR_NOTONCHANNEL).param(name).trailing_param(lines::NOT_ON_CHANNEL);
            return self.flush(id, rb);
        }
        if params.len() < 2 {
            return self.send_topic(id, chan_id, true);
        }
        let topic_restricted = self.channel(chan_id).map_or(false, |c| c.topic_restricted);
        let is_op = self.channel(chan_id).and_then(|c| c.member_modes(id)).map_or(false, |m| m.operator);
        if topic_restricted && !is_op {
            let mut rb = self.reply_buffer(id);
            rb.reply(rpl::ERR_CHANOPRIVSNEEDED).param(name).trailing_param(lines::CHANOP_PRIVS_NEEDED);
            return self.flush(id, rb);
        }
        let nick = self.client(id).map(|c| c.nick().to_owned()).unwrap_or_default();
        let text = params[1];
        if let Some(chan) = self.channel_mut(chan_id) {
            chan.topic = Some(crate::channel::Topic { text: text.to_owned(), set_by: nick, set_at: util::now() });
        }
        let full_name = self.client(id).map(|c| c.full_name()).unwrap_or_default();
        let mut buf = Buffer::new();
        buf.message(&full_name, Command::Topic).param(name).trailing_param(text);
        self.channel_bcast(chan_id, buf.as_str());
    }

    fn send_topic(&mut self, id: ClientId, chan_id: ChannelId, notify_if_absent: bool) {
        let name = self.channel(chan_id).map(|c| c.name.clone()).unwrap_or_default();
        let mut rb = self.reply_buffer(id);
        match self.channel(chan_id).and_then(|c| c.topic.as_ref()) {
            Some(topic) => {
                rb.reply(rpl::TOPIC).param(&name).trailing_param(&topic.text);
            }
            None if notify_if_absent => {
                rb.reply(rpl::NOTOPIC).param(&name).trailing_param(lines::NO_TOPIC);
            }
            None => {}
        }
        self.flush(id, rb);
    }

    fn cmd_names(&mut self, id: ClientId, params: &[&str]) {
        if let Some(chan_id) = self.channel_by_name(params[0]) {
            self.send_names(id, chan_id);
        }
    }

    fn send_names(&mut self, id: ClientId, chan_id: ChannelId) {
        let (name, symbol, members) = match self.channel(chan_id) {
            Some(c) => (c.name.clone(), c.symbol(), c.members().collect::<Vec<_>>()),
            None => return,
        };
        let mut rb = self.reply_buffer(id);
        {
            let mut msg = rb.reply(rpl::NAMREPLY).param(symbol).param(&name);
            let trailing = msg.raw_trailing_param();
            for member in &members {
                let symbol = self.channel(chan_id).and_then(|c| c.member_modes(*member)).and_then(|m| m.symbol());
                let nick = self.client(*member).map(|c| c.nick().to_owned());
                if let Some(nick) = nick {
                    if let Some(sym) = symbol {
                        trailing.push(sym);
                    }
                    trailing.push_str(&nick);
                    trailing.push(' ');
                }
            }
            if trailing.ends_with(' ') {
                trailing.pop();
            }
        }
        rb.reply(rpl::ENDOFNAMES).param(&name).trailing_param(lines::END_OF_NAMES);
        self.flush(id, rb);
    }

    fn cmd_list(&mut self, id: ClientId, params: &[&str]) {
        let mut rb = self.reply_buffer(id);
        let wanted: Option<Vec<&str>> = params.get(0).map(|s| s.split(',').collect());
        for (_, chan) in self.channels.iter() {
            if chan.secret {
                continue;
            }
            if let Some(ref wanted) = wanted {
                if !wanted.iter().any(|w| w.eq_ignore_ascii_case(&chan.name)) {
                    continue;
                }
            }
            rb.reply(rpl::LIST)
                .param(&chan.name)
                .param(chan.member_count().to_string())
                .trailing_param(chan.topic.as_ref().map(|t| t.text.as_str()).unwrap_or(""));
        }
        rb.reply(rpl::LISTEND).trailing_param("End of LIST");
        self.flush(id, rb);
    }

    fn cmd_who(&mut self, id: ClientId, params: &[&str]) {
        let mut rb = self.reply_buffer(id);
        if let Some(chan_id) = self.channel_by_name(params[0]) {
            let name = self.channel(chan_id).map(|c| c.name.clone()).unwrap_or_default();
            let members: Vec<_> = self.channel(chan_id).map(|c| c.members().collect()).unwrap_or_default();
            for member in members {
                if let Some(client) = self.client(member) {
                    rb.reply(rpl::WHOREPLY)
                        .param(&name)
                        .param(client.user())
                        .param(client.host())
                        .param(self.domain())
                        .param(client.nick())
                        .param("H")
                        .trailing_param(format!("0 {}", client.realname()));
                }
            }
        }
        rb.reply(rpl::ENDOFWHO).param(params[0]).trailing_param("End of WHO list");
        self.flush(id, rb);
    }

    fn cmd_whois(&mut self, id: ClientId, params: &[&str]) {
        let target = params[0];
        let mut rb = self.reply_buffer(id);
        match self.user_by_name(target) {
            Some(target_id) => {
                let client = &self.clients[target_id];
                rb.reply(rpl::WHOISUSER)
                    .param(client.nick())
                    .param(client.user())
                    .param(client.host())
                    .param("*")
                    .trailing_param(client.realname());
                rb.reply(rpl::WHOISSERVER).param(client.nick()).param(self.domain()).trailing_param("corvid");
                if client.is_operator() {
                    rb.reply(rpl::WHOISOPERATOR).param(client.nick()).trailing_param("is an IRC operator");
                }
                let channels = client.channels.iter()
                    .filter_map(|&c| self.channel(c).map(|c| c.name.clone()))
                    .collect::<Vec<_>>()
                    .join(" ");
                if !channels.is_empty() {
                    rb.reply(rpl::WHOISCHANNELS).param(client.nick()).trailing_param(&channels);
                }
                let idle = (util::now() - client.last_activity).max(0);
                rb.reply(rpl::WHOISIDLE).param(client.nick()).param(idle.to_string()).trailing_param("seconds idle");
                rb.reply(rpl::ENDOFWHOIS).param(target).trailing_param("End of WHOIS list");
            }
            None => {
                rb.reply(rpl::ERR_NOSUCHNICK).param(target).trailing_param(lines::NO_SUCH_NICK);
            }
        }
        self.flush(id, rb);
    }

    fn cmd_mode(&mut self, id: ClientId, params: &[&str]) {
        let target = params[0];
        if validate::is_valid_channel_name(target) {
            self.cmd_mode_channel(id, target, params);
        } else {
            self.cmd_mode_user(id, target, params);
        }
    }

    fn cmd_mode_user(&mut self, id: ClientId, target: &str, params: &[&str]) {
        let mut rb = self.reply_buffer(id);
        let self_nick = self.client(id).map(|c| c.nick().to_owned()).unwrap_or_default();
        if !target.eq_ignore_ascii_case(&self_nick) {
            rb.reply(rpl::ERR_USERSDONTMATCH).trailing_param("Cannot change mode for other users");
            return self.flush(id, rb);
        }
        match params.get(1) {
            None => {
                let mask = self.client(id).map(|c| c.umodes()).unwrap_or(0);
                rb.reply(rpl::UMODEIS).trailing_param(format!("+{}", modes::user_mode_string(mask)));
            }
            Some(flags) => {
                for change in modes::ModeQuery::new(flags) {
                    if modes::user_char_to_bit(change.letter).is_none() {
                        rb.reply(rpl::ERR_UMODEUNKNOWNFLAG).trailing_param(lines::UNKNOWN_MODE);
                        continue;
                    }
                    if let Some(client) = self.client_mut(id) {
                        client.apply_user_mode(&change);
                    }
                }
            }
        }
        self.flush(id, rb);
    }

    fn cmd_mode_channel(&mut self, id: ClientId, target: &str, params: &[&str]) {
        let mut rb = self.reply_buffer(id);
        let chan_id = match self.channel_by_name(target) {
            Some(chan_id) => chan_id,
            None => {
                rb.reply(rpl::ERR_NOSUCHCHANNEL).param(target).trailing_param(lines::NO_SUCH_CHANNEL);
                return self.flush(id, rb);
            }
        };
        if params.len() < 2 {
            if let Some(chan) = self.channel(chan_id) {
                chan.write_modes(rb.reply(rpl::CHANNELMODEIS).param(target), false);
            }
            return self.flush(id, rb);
        }
        let is_op = self.channel(chan_id).and_then(|c| c.member_modes(id)).map_or(false, |m| m.operator);
        if !is_op {
            rb.reply(rpl::ERR_CHANOPRIVSNEEDED).param(target).trailing_param(lines::CHANOP_PRIVS_NEEDED);
            return self.flush(id, rb);
        }

        let flags = params[1];
        let mut extra = params[2..].iter();
        let mut applied = String::new();
        let mut applied_args: Vec<String> = Vec::new();
        let mut last_sign = None;
        for change in modes::ModeQuery::new(flags) {
            if self.apply_one_channel_mode(chan_id, &change, &mut extra, &mut rb, &mut applied_args) {
                if last_sign != Some(change.adding) {
                    applied.push(if change.adding { '+' } else { '-' });
                    last_sign = Some(change.adding);
                }
                applied.push(change.letter);
            }
        }
        self.flush(id, rb);

        if !applied.is_empty() {
            let full_name = self.client(id).map(|c| c.full_name()).unwrap_or_default();
            let mut buf = Buffer::new();
            let mut msg = buf.message(&full_name, Command::Mode).param(target).param(&applied);
            for arg in &applied_args {
                msg = msg.param(arg);
            }
            msg.build();
            self.channel_bcast(chan_id, buf.as_str());
        }
    }

    /// Applies one `+x`/`-x` change, consuming its parameter from `extra` if
    /// the letter needs one. Returns whether the change actually took
    /// effect (so no-op toggles don't show up in the broadcast MODE line).
    fn apply_one_channel_mode<'p>(
        &mut self,
        chan_id: ChannelId,
        change: &modes::ModeChange,
        extra: &mut std::slice::Iter<'p, &str>,
        rb: &mut ReplyBuffer,
        applied_args: &mut Vec<String>,
    ) -> bool {
        let chan = match self.channel_mut(chan_id) {
            Some(chan) => chan,
            None => return false,
        };
        match change.letter {
            'i' => {
                if chan.invite_only == change.adding {
                    return false;
                }
                chan.invite_only = change.adding;
            }
            'm' => {
                if chan.moderated == change.adding {
                    return false;
                }
                chan.moderated = change.adding;
            }
            'n' => {
                if chan.no_external_messages == change.adding {
                    return false;
                }
                chan.no_external_messages = change.adding;
            }
            't' => {
                if chan.topic_restricted == change.adding {
                    return false;
                }
                chan.topic_restricted = change.adding;
            }
            's' => {
                if chan.secret == change.adding {
                    return false;
                }
                chan.secret = change.adding;
            }
            'k' => {
                if change.adding {
                    let key = match extra.next() {
                        Some(k) => (*k).to_owned(),
                        None => return false,
                    };
                    applied_args.push(key.clone());
                    chan.key = Some(key);
                } else {
                    if chan.key.is_none() {
                        return false;
                    }
                    chan.key = None;
                }
            }
            'l' => {
                if change.adding {
                    let limit: usize = match extra.next().and_then(|s| s.parse().ok()) {
                        Some(l) => l,
                        None => return false,
                    };
                    applied_args.push(limit.to_string());
                    chan.user_limit = Some(limit);
                } else {
                    if chan.user_limit.is_none() {
                        return false;
                    }
                    chan.user_limit = None;
                }
            }
            'o' | 'v' => {
                let nick = match extra.next() {
                    Some(n) => (*n).to_owned(),
                    None => return false,
                };
                let member_id = self.user_by_name(&nick);
                let chan = match self.channel_mut(chan_id) {
                    Some(chan) => chan,
                    None => return false,
                };
                let modes = match member_id.and_then(|m| chan.member_modes_mut(m)) {
                    Some(modes) => modes,
                    None => {
                        rb.reply(rpl::ERR_USERNOTINCHANNEL).param(&nick).trailing_param(lines::USER_NOT_IN_CHANNEL);
                        return false;
                    }
                };
                let changed = if change.letter == 'o' {
                    if modes.operator == change.adding {
                        false
                    } else {
                        modes.operator = change.adding;
                        true
                    }
                } else if modes.voice == change.adding {
                    false
                } else {
                    modes.voice = change.adding;
                    true
                };
                if changed {
                    applied_args.push(nick);
                }
                return changed;
            }
            other => {
                rb.reply(rpl::ERR_UNKNOWNMODE).param(other.to_string()).trailing_param(lines::UNKNOWN_MODE);
                return false;
            }
        }
        true
    }

    fn cmd_kill(&mut self, id: ClientId, params: &[&str]) {
        let mut rb = self.reply_buffer(id);
        if !self.client(id).map_or(false, |c| c.is_operator()) {
            rb.reply(rpl::ERR_NOPRIVILEGES).trailing_param(lines::NO_PRIVILEGES);
            return self.flush(id, rb);
        }
        let target = params[0];
        let reason = params.get(1).copied().unwrap_or("Killed");
        if let Some(target_id) = self.user_by_name(target) {
            self.handle_quit(target_id, &format!("Killed: {}", reason));
        } else {
            rb.reply(rpl::ERR_NOSUCHNICK).param(target).trailing_param(lines::NO_SUCH_NICK);
            self.flush(id, rb);
        }
    }

    fn cmd_oper(&mut self, id: ClientId, params: &[&str]) {
        let mut rb = self.reply_buffer(id);
        let (name, password) = (params[0], params[1]);
        let granted = self.config().operators.iter().any(|op| op.name == name && op.password == password);
        if granted {
            let became_operator =
                self.client_mut(id).map_or(false, |c| c.apply_user_mode(&modes::ModeChange { adding: true, letter: 'o' }));
            if became_operator {
                self.counters.increment(counters::OPERATORS);
            }
            rb.reply(rpl::YOUREOPER).trailing_param(lines::YOU_ARE_OPER);
        } else {
            rb.reply(rpl::ERR_PASSWDMISMATCH).trailing_param(lines::PASSWD_MISMATCH);
        }
        self.flush(id, rb);
    }

    fn cmd_away(&mut self, id: ClientId, params: &[&str]) {
        let mut rb = self.reply_buffer(id);
        match params.get(0) {
            Some(message) if !message.is_empty() => {
                if let Some(client) = self.client_mut(id) {
                    client.away = Some((*message).to_owned());
                }
                rb.reply(rpl::NOWAWAY).trailing_param("You have been marked as being away");
            }
            _ => {
                if let Some(client) = self.client_mut(id) {
                    client.away = None;
                }
                rb.reply(rpl::UNAWAY).trailing_param("You are no longer marked as being away");
            }
        }
        self.flush(id, rb);
    }

    fn cmd_ison(&mut self, id: ClientId, params: &[&str]) {
        let mut rb = self.reply_buffer(id);
        let online: Vec<&str> = params.iter()
            .filter_map(|&n| self.user_by_name(n).and_then(|tid| self.client(tid)).map(|c| c.nick()))
            .collect();
        rb.reply(rpl::ISON).trailing_param(online.join(" "));
        self.flush(id, rb);
    }

    fn cmd_userhost(&mut self, id: ClientId, params: &[&str]) {
        let mut rb = self.reply_buffer(id);
        let mut reply = Vec::new();
        for nick in params {
            if let Some(target_id) = self.user_by_name(nick) {
                let client = &self.clients[target_id];
                let away_flag = if client.away.is_some() { '-' } else { '+' };
                reply.push(format!("{}={}{}@{}", client.nick(), away_flag, client.user(), client.host()));
            }
        }
        rb.reply(rpl::USERHOST).trailing_param(reply.join(" "));
        self.flush(id, rb);
    }

    fn cmd_invite(&mut self, id: ClientId, params: &[&str]) {
        let nick = params[0];
        let chan_name = params[1];
        let mut rb = self.reply_buffer(id);
        let chan_id = match self.channel_by_name(chan_name) {
            Some(chan_id) => chan_id,
            None => {
                rb.reply(rpl::ERR_NOSUCHCHANNEL).param(chan_name).trailing_param(lines::NO_SUCH_CHANNEL);
                return self.flush(id, rb);
            }
        };
        if self.channel(chan_id).map_or(false, |c| !c.is_member(id)) {
            rb.reply(rpl::ERR_NOTONCHANNEL).param(chan_name).trailing_param(lines::NOT_ON_CHANNEL);
            return self.flush(id, rb);
        }
        let target_id = match self.user_by_name(nick) {
            Some(target_id) => target_id,
            None => {
                rb.reply(rpl::ERR_NOSUCHNICK).param(nick).trailing_param(lines::NO_SUCH_NICK);
                return self.flush(id, rb);
            }
        };
        let inviter_name = self.client(id).map(|c| c.full_name()).unwrap_or_default();
        if let Some(target) = self.client(target_id) {
            let mut buf = Buffer::new();
            buf.message(&inviter_name, Command::Invite).param(nick).trailing_param(chan_name);
            target.send_raw(buf);
        }
        rb.reply(rpl::INVITING).param(nick).trailing_param(chan_name);
        self.flush(id, rb);
    }

    fn cmd_kick(&mut self, id: ClientId, params: &[&str]) {
        let chan_name = params[0];
        let target_nick = params[1];
        let reason = params.get(2).copied().unwrap_or(target_nick);
        let mut rb = self.reply_buffer(id);
        let chan_id = match self.channel_by_name(chan_name) {
            Some(chan_id) => chan_id,
            None => {
                rb.reply(rpl::ERR_NOSUCHCHANNEL).param(chan_name).trailing_param(lines::NO_SUCH_CHANNEL);
                return self.flush(id, rb);
            }
        };
        let is_op = self.channel(chan_id).and_then(|c| c.member_modes(id)).map_or(false, |m| m.operator);
        if !is_op {
            rb.reply(rpl::ERR_CHANOPRIVSNEEDED).param(chan_name).trailing_param(lines::CHANOP_PRIVS_NEEDED);
            return self.flush(id, rb);
        }
        let target_id = match self.user_by_name(target_nick) {
            Some(tid) if self.channel(chan_id).map_or(false, |c| c.is_member(tid)) => tid,
            _ => {
                rb.reply(rpl::ERR_USERNOTINCHANNEL).param(target_nick).trailing_param(lines::USER_NOT_IN_CHANNEL);
                return self.flush(id, rb);
            }
        };
        let kicker_name = self.client(id).map(|c| c.full_name()).unwrap_or_default();
        let mut buf = Buffer::new();
        buf.message(&kicker_name, Command::Kick).param(chan_name).param(target_nick).trailing_param(reason);
        self.channel_bcast(chan_id, buf.as_str());
        self.part_channel(target_id, chan_id);
    }

    fn cmd_lusers(&mut self, id: ClientId) {
        let mut rb = self.reply_buffer(id);
        self.write_lusers(&mut rb);
        self.flush(id, rb);
    }

    fn cmd_motd(&mut self, id: ClientId) {
        let mut rb = self.reply_buffer(id);
        self.write_motd(&mut rb);
        self.flush(id, rb);
    }

    fn cmd_version(&mut self, id: ClientId) {
        let mut rb = self.reply_buffer(id);
        rb.reply(rpl::VERSION).param(env!("CARGO_PKG_VERSION")).param(self.domain()).trailing_param("corvid");
        self.flush(id, rb);
    }

    fn cmd_time(&mut self, id: ClientId) {
        let mut rb = self.reply_buffer(id);
        rb.reply(rpl::TIME).param(self.domain()).trailing_param(util::time_str(util::now()));
        self.flush(id, rb);
    }

    fn cmd_canned(&mut self, id: ClientId) {
        if let Some(client) = self.client(id) {
            let mut buf = Buffer::new();
            buf.message(self.domain(), Command::Notice).param(client.nick()).trailing_param("Not implemented");
            client.send_raw(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use crate::config::Config;

    use super::*;

    fn test_server() -> Server {
        Server::new(Config::default(), "Thu Jan 1 1970 at 00:00:00 UTC".to_owned())
    }

    fn add_client(server: &mut Server) -> (ClientId, mpsc::UnboundedReceiver<crate::client::OutboundItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = server.new_client("host".to_owned(), tx);
        (id, rx)
    }

    fn register(server: &mut Server, id: ClientId, nick: &str) {
        server.handle_message(id, &format!("NICK {}", nick));
        server.handle_message(id, &format!("USER {} 0 * :{}", nick, nick));
    }

    #[test]
    fn registration_sequence_sends_welcome_once() {
        let mut server = test_server();
        let (id, mut rx) = add_client(&mut server);
        register(&mut server, id, "alice");
        assert!(server.client(id).unwrap().is_registered());
        let welcome = rx.try_recv().expect("welcome buffer");
        assert!(welcome.as_ref().contains(" 001 "));
        assert!(welcome.as_ref().contains(&format!(" {} ", rpl::ERR_NOMOTD)), "no MOTD file configured, so the welcome sequence ends in ERR_NOMOTD");
        assert!(rx.try_recv().is_err(), "welcome is sent as a single combined buffer");
    }

    #[test]
    fn commands_before_registration_are_rejected() {
        let mut server = test_server();
        let (id, mut rx) = add_client(&mut server);
        server.handle_message(id, "JOIN #rust");
        let reply = rx.try_recv().expect("error reply");
        assert!(reply.as_ref().contains(&format!(" {} ", rpl::ERR_NOTREGISTERED)));
    }

    #[test]
    fn join_announces_and_sends_names() {
        let mut server = test_server();
        let (alice, mut alice_rx) = add_client(&mut server);
        let (bob, mut bob_rx) = add_client(&mut server);
        register(&mut server, alice, "alice");
        register(&mut server, bob, "bob");
        alice_rx.try_recv().unwrap();
        bob_rx.try_recv().unwrap();

        server.handle_message(alice, "JOIN #rust");
        let join_line = alice_rx.try_recv().unwrap();
        assert!(join_line.as_ref().contains("JOIN #rust"));
        // NAMES/topic reply is buffered separately from the JOIN broadcast.
        let names = alice_rx.try_recv().unwrap();
        assert!(names.as_ref().contains(&format!(" {} ", rpl::ENDOFNAMES)));

        server.handle_message(bob, "JOIN #rust");
        let bob_join = alice_rx.try_recv().unwrap();
        assert!(bob_join.as_ref().contains("bob!bob@host JOIN #rust"));
    }

    #[test]
    fn privmsg_to_channel_reaches_other_members_only() {
        let mut server = test_server();
        let (alice, mut alice_rx) = add_client(&mut server);
        let (bob, mut bob_rx) = add_client(&mut server);
        register(&mut server, alice, "alice");
        register(&mut server, bob, "bob");
        alice_rx.try_recv().unwrap();
        bob_rx.try_recv().unwrap();
        server.handle_message(alice, "JOIN #rust");
        alice_rx.try_recv().unwrap();
        alice_rx.try_recv().unwrap();
        server.handle_message(bob, "JOIN #rust");
        alice_rx.try_recv().unwrap();
        bob_rx.try_recv().unwrap();
        bob_rx.try_recv().unwrap();

        server.handle_message(alice, "PRIVMSG #rust :hello there");
        let received = bob_rx.try_recv().expect("bob should see the message");
        assert!(received.as_ref().contains("PRIVMSG #rust :hello there"));
        assert!(alice_rx.try_recv().is_err(), "the sender does not receive their own PRIVMSG");
    }

    #[test]
    fn privmsg_to_unknown_nick_replies_no_such_nick() {
        let mut server = test_server();
        let (alice, mut alice_rx) = add_client(&mut server);
        register(&mut server, alice, "alice");
        alice_rx.try_recv().unwrap();

        server.handle_message(alice, "PRIVMSG ghost :hi");
        let reply = alice_rx.try_recv().expect("error reply");
        assert!(reply.as_ref().contains(&format!(" {} ", rpl::ERR_NOSUCHNICK)));
    }

    #[test]
    fn mode_channel_grants_operator_and_broadcasts_once() {
        let mut server = test_server();
        let (alice, mut alice_rx) = add_client(&mut server);
        let (bob, mut bob_rx) = add_client(&mut server);
        register(&mut server, alice, "alice");
        register(&mut server, bob, "bob");
        alice_rx.try_recv().unwrap();
        bob_rx.try_recv().unwrap();
        server.handle_message(alice, "JOIN #rust");
        alice_rx.try_recv().unwrap();
        alice_rx.try_recv().unwrap();
        server.handle_message(bob, "JOIN #rust");
        alice_rx.try_recv().unwrap();
        bob_rx.try_recv().unwrap();
        bob_rx.try_recv().unwrap();

        server.handle_message(alice, "MODE #rust +v bob");
        let mode_line = alice_rx.try_recv().expect("MODE broadcast");
        assert!(mode_line.as_ref().contains("MODE #rust +v bob"));
        let chan_id = server.channel_by_name("#rust").unwrap();
        assert!(server.channel(chan_id).unwrap().member_modes(bob).unwrap().voice);
    }

    #[test]
    fn mode_channel_requires_operator_privilege() {
        let mut server = test_server();
        let (alice, mut alice_rx) = add_client(&mut server);
        let (bob, mut bob_rx) = add_client(&mut server);
        register(&mut server, alice, "alice");
        register(&mut server, bob, "bob");
        alice_rx.try_recv().unwrap();
        bob_rx.try_recv().unwrap();
        server.handle_message(alice, "JOIN #rust");
        alice_rx.try_recv().unwrap();
        alice_rx.try_recv().unwrap();
        server.handle_message(bob, "JOIN #rust");
        alice_rx.try_recv().unwrap();
        bob_rx.try_recv().unwrap();
        bob_rx.try_recv().unwrap();

        server.handle_message(bob, "MODE #rust +v bob");
        let reply = bob_rx.try_recv().expect("error reply");
        assert!(reply.as_ref().contains(&format!(" {} ", rpl::ERR_CHANOPRIVSNEEDED)));
    }

    #[test]
    fn quit_command_closes_the_connection_and_broadcasts() {
        let mut server = test_server();
        let (alice, mut alice_rx) = add_client(&mut server);
        let (bob, mut bob_rx) = add_client(&mut server);
        register(&mut server, alice, "alice");
        register(&mut server, bob, "bob");
        alice_rx.try_recv().unwrap();
        bob_rx.try_recv().unwrap();
        server.handle_message(alice, "JOIN #rust");
        alice_rx.try_recv().unwrap();
        alice_rx.try_recv().unwrap();
        server.handle_message(bob, "JOIN #rust");
        alice_rx.try_recv().unwrap();
        bob_rx.try_recv().unwrap();
        bob_rx.try_recv().unwrap();

        let action = server.handle_message(alice, "QUIT :goodbye");
        assert!(matches!(action, RouterAction::Close));
        let quit_line = bob_rx.try_recv().expect("bob sees the QUIT");
        assert!(quit_line.as_ref().contains("QUIT :goodbye"));
    }
}
