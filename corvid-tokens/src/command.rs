use std::convert::TryFrom;
use std::fmt;

/// The command token of an IRC message, the in-scope part of the Command
/// Router's vocabulary.
///
/// Unknown commands are kept as the raw uppercased string by [`Message`]
/// rather than stored in this enum (see [`crate::Message::command`]).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum Command {
    Admin,
    Away,
    Cap,
    Info,
    Invite,
    Ison,
    Join,
    Kick,
    Kill,
    List,
    Lusers,
    Mode,
    Motd,
    Names,
    Nick,
    Notice,
    Oper,
    Part,
    Pass,
    Ping,
    Pong,
    PrivMsg,
    Quit,
    Stats,
    Time,
    Topic,
    User,
    UserHost,
    Version,
    Who,
    Whois,
    /// A numeric reply (e.g. sent by another daemon we're relaying for, or
    /// echoed back in tests). Never produced by [`Command::try_from`] since
    /// clients never send numerics, but kept for symmetry with the reply
    /// side of the wire format.
    Reply(u16),
}

impl Command {
    pub fn as_str(self) -> &'static str {
        use Command::*;
        match self {
            Admin => "ADMIN",
            Away => "AWAY",
            Cap => "CAP",
            Info => "INFO",
            Invite => "INVITE",
            Ison => "ISON",
            Join => "JOIN",
            Kick => "KICK",
            Kill => "KILL",
            List => "LIST",
            Lusers => "LUSERS",
            Mode => "MODE",
            Motd => "MOTD",
            Names => "NAMES",
            Nick => "NICK",
            Notice => "NOTICE",
            Oper => "OPER",
            Part => "PART",
            Pass => "PASS",
            Ping => "PING",
            Pong => "PONG",
            PrivMsg => "PRIVMSG",
            Quit => "QUIT",
            Stats => "STATS",
            Time => "TIME",
            Topic => "TOPIC",
            User => "USER",
            UserHost => "USERHOST",
            Version => "VERSION",
            Who => "WHO",
            Whois => "WHOIS",
            Reply(_) => "",
        }
    }

    /// The minimum number of parameters this command needs to be handled at
    /// all (distinct from what each field *means*, which is the handler's
    /// business).
    pub fn min_params(self) -> usize {
        use Command::*;
        match self {
            Nick | Join | Part | Mode | Topic | Names | List | Who | Whois | Invite | Kick
            | UserHost | Ison => 1,
            User => 4,
            PrivMsg | Notice => 2,
            Pass | Oper | Ping | Pong | Kill => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Reply(n) => write!(f, "{:03}", n),
            cmd => f.write_str(cmd.as_str()),
        }
    }
}

impl<'a> TryFrom<&'a str> for Command {
    type Error = &'a str;

    /// Matches `word` case-insensitively, so the splitter never needs to
    /// allocate an uppercased copy of the command token just to dispatch it.
    fn try_from(word: &'a str) -> Result<Command, &'a str> {
        use Command::*;
        const NAMES: &[(&str, Command)] = &[
            ("ADMIN", Admin), ("AWAY", Away), ("CAP", Cap), ("INFO", Info),
            ("INVITE", Invite), ("ISON", Ison), ("JOIN", Join), ("KICK", Kick),
            ("KILL", Kill), ("LIST", List), ("LUSERS", Lusers), ("MODE", Mode),
            ("MOTD", Motd), ("NAMES", Names), ("NICK", Nick), ("NOTICE", Notice),
            ("OPER", Oper), ("PART", Part), ("PASS", Pass), ("PING", Ping),
            ("PONG", Pong), ("PRIVMSG", PrivMsg), ("QUIT", Quit), ("STATS", Stats),
            ("TIME", Time), ("TOPIC", Topic), ("USER", User), ("USERHOST", UserHost),
            ("VERSION", Version), ("WHO", Who), ("WHOIS", Whois),
        ];
        for (name, cmd) in NAMES {
            if word.eq_ignore_ascii_case(name) {
                return Ok(*cmd);
            }
        }
        if word.len() == 3 && word.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(Reply(word.parse().unwrap()));
        }
        Err(word)
    }
}
