//! Static and lightly-templated reply text, kept out of the command
//! handlers so their control flow reads as routing, not string literals.

use corvid_tokens::MessageBuffer;

pub const ALREADY_REGISTERED: &str = "You may not reregister";
pub const END_OF_MOTD: &str = "End of MOTD command";
pub const END_OF_NAMES: &str = "End of NAMES list";
pub const INPUT_TOO_LONG: &str = "Input line was too long";
pub const NEED_MORE_PARAMS: &str = "Not enough parameters";
pub const NO_MOTD: &str = "MOTD File is missing";
pub const NO_SUCH_CHANNEL: &str = "No such channel";
pub const NO_SUCH_NICK: &str = "No such nick/channel";
pub const NO_TOPIC: &str = "No topic is set";
pub const NOT_ON_CHANNEL: &str = "You're not on that channel";
pub const NOT_REGISTERED: &str = "You have not registered";
pub const UNKNOWN_COMMAND: &str = "Unknown command";
pub const UNKNOWN_MODE: &str = "is unknown mode char to me";
pub const USER_NOT_IN_CHANNEL: &str = "They aren't on that channel";
pub const USER_ON_CHANNEL: &str = "is already on channel";
pub const CHANOP_PRIVS_NEEDED: &str = "You're not channel operator";
pub const NO_PRIVILEGES: &str = "Permission Denied- You're not an IRC operator";
pub const PASSWD_MISMATCH: &str = "Password incorrect";
pub const YOU_ARE_OPER: &str = "You are now an IRC operator";

pub fn welcome(msg: MessageBuffer<'_>, full_name: &str) {
    msg.trailing_param(format!("Welcome to the Internet Relay Network {}", full_name));
}

pub fn your_host(msg: MessageBuffer<'_>, domain: &str, version: &str) {
    msg.trailing_param(format!("Your host is {}, running version {}", domain, version));
}

pub fn created(msg: MessageBuffer<'_>, created_at: &str) {
    msg.trailing_param(format!("This server was created {}", created_at));
}

pub fn luser_client(msg: MessageBuffer<'_>, num_clients: usize) {
    msg.trailing_param(format!("There are {} users and 0 services on 1 server", num_clients));
}

pub fn luser_me(msg: MessageBuffer<'_>, num_clients: usize) {
    msg.trailing_param(format!("I have {} clients and 1 server", num_clients));
}

pub fn motd_start(msg: MessageBuffer<'_>, domain: &str) {
    msg.trailing_param(format!("- {} Message of the day - ", domain));
}

pub fn need_more_params(msg: MessageBuffer<'_>, command: &str) {
    msg.param(command).trailing_param(NEED_MORE_PARAMS);
}

pub fn nickname_in_use(msg: MessageBuffer<'_>, nick: &str) {
    msg.param(nick).trailing_param("Nickname is already in use");
}

pub fn erroneous_nickname(msg: MessageBuffer<'_>, nick: &str, reason: &str) {
    msg.param(nick).trailing_param(reason);
}
