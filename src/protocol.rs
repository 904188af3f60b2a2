//! Wire protocol: line parsing and response formatting.
//!
//! Lines are UTF-8, CRLF-terminated, max 4096 bytes excluding the
//! terminator. The command token is case-insensitive; arguments are
//! space-separated except for the tail-of-line message bodies carried by
//! `MSG`/`PRIVMSG`.

use crate::error::ErrorCode;

pub const MAX_LINE_LEN: usize = 4096;
pub const MAX_BODY_LEN: usize = 2048;
const MAX_USERNAME_LEN: usize = 32;
const MAX_ROOM_LEN: usize = 64;

/// A parsed client command. Anything that doesn't fit one of these
/// shapes (including malformed arguments) parses to [`Command::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Hello { username: String },
    Auth { signature: String },
    Register { username: String, pubkey: String, token: String },
    Join { room: String },
    Leave { room: String },
    Msg { room: String, body: String },
    Privmsg { user: String, body: String },
    Who { room: String },
    List,
    Users,
    Ping,
    Quit,
    Unknown,
}

/// `true` iff `name` is 1-32 chars of `[A-Za-z0-9_]`.
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_USERNAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `true` iff `name` (already lowercased) starts with `#`/`&`, is at
/// most 64 chars, and the body is `[a-z0-9_-]`.
pub fn is_valid_room(name: &str) -> bool {
    if name.len() > MAX_ROOM_LEN || name.is_empty() {
        return false;
    }
    let mut chars = name.chars();
    let Some(prefix) = chars.next() else {
        return false;
    };
    if prefix != '#' && prefix != '&' {
        return false;
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Parses one line (without the trailing CRLF) into a [`Command`].
pub fn parse(line: &str) -> Command {
    let line = line.trim_end_matches(['\r', '\n']);
    let (verb, rest) = match line.split_once(' ') {
        Some((v, r)) => (v, r.trim_start()),
        None => (line, ""),
    };

    match verb.to_ascii_uppercase().as_str() {
        "HELLO" => {
            if is_valid_username(rest) {
                Command::Hello { username: rest.to_string() }
            } else {
                Command::Unknown
            }
        }
        "AUTH" => {
            if rest.is_empty() {
                Command::Unknown
            } else {
                Command::Auth { signature: rest.to_string() }
            }
        }
        "REGISTER" => {
            let parts: Vec<&str> = rest.split_whitespace().collect();
            if parts.len() != 3 || !is_valid_username(parts[0]) {
                Command::Unknown
            } else {
                Command::Register {
                    username: parts[0].to_string(),
                    pubkey: parts[1].to_string(),
                    token: parts[2].to_string(),
                }
            }
        }
        "JOIN" => {
            let room = rest.trim().to_ascii_lowercase();
            if is_valid_room(&room) {
                Command::Join { room }
            } else {
                Command::Unknown
            }
        }
        "LEAVE" => {
            let room = rest.trim().to_ascii_lowercase();
            if room.is_empty() {
                Command::Unknown
            } else {
                Command::Leave { room }
            }
        }
        "MSG" => match rest.split_once(' ') {
            Some((room, body)) if body.len() <= MAX_BODY_LEN => Command::Msg {
                room: room.trim().to_ascii_lowercase(),
                body: body.to_string(),
            },
            _ => Command::Unknown,
        },
        "PRIVMSG" => match rest.split_once(' ') {
            Some((user, body)) if body.len() <= MAX_BODY_LEN => {
                Command::Privmsg { user: user.trim().to_string(), body: body.to_string() }
            }
            _ => Command::Unknown,
        },
        "WHO" => {
            let room = rest.trim().to_ascii_lowercase();
            if room.is_empty() {
                Command::Unknown
            } else {
                Command::Who { room }
            }
        }
        "LIST" => Command::List,
        "USERS" => Command::Users,
        "PING" => Command::Ping,
        "QUIT" => Command::Quit,
        _ => Command::Unknown,
    }
}

/// A formatted response or notification line (without CRLF; callers
/// append it once when writing to the socket).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(Option<String>),
    Error(ErrorCode, Option<String>),
    Challenge(String),
    Welcome(String),
    Room { room: String, sender: String, body: String },
    Priv { sender: String, body: String },
    Joined { room: String, user: String },
    Left { room: String, user: String },
    Online(String),
    Quit(String),
    Pong,
    RoomList(Vec<String>),
    UserList(Vec<String>),
    WhoList { room: String, users: Vec<String> },
}

impl Response {
    pub fn ok(info: impl Into<String>) -> Self {
        Response::Ok(Some(info.into()))
    }

    pub fn err(code: ErrorCode) -> Self {
        Response::Error(code, None)
    }

    pub fn err_detail(code: ErrorCode, detail: impl Into<String>) -> Self {
        Response::Error(code, Some(detail.into()))
    }

    /// Renders the response as a CRLF-terminated line, ready to write
    /// to the socket.
    pub fn format(&self) -> String {
        let body = match self {
            Response::Ok(None) => "OK".to_string(),
            Response::Ok(Some(info)) => format!("OK {info}"),
            Response::Error(code, None) => format!("ERROR {code}"),
            Response::Error(code, Some(detail)) => format!("ERROR {code} {detail}"),
            Response::Challenge(nonce) => format!("CHALLENGE {nonce}"),
            Response::Welcome(user) => format!("WELCOME {user}"),
            Response::Room { room, sender, body } => format!("ROOM {room} {sender} {body}"),
            Response::Priv { sender, body } => format!("PRIV {sender} {body}"),
            Response::Joined { room, user } => format!("JOINED {room} {user}"),
            Response::Left { room, user } => format!("LEFT {room} {user}"),
            Response::Online(user) => format!("ONLINE {user}"),
            Response::Quit(user) => format!("QUIT {user}"),
            Response::Pong => "PONG".to_string(),
            Response::RoomList(rooms) => {
                if rooms.is_empty() {
                    "ROOMLIST".to_string()
                } else {
                    format!("ROOMLIST {}", rooms.join(" "))
                }
            }
            Response::UserList(users) => {
                if users.is_empty() {
                    "USERLIST".to_string()
                } else {
                    format!("USERLIST {}", users.join(" "))
                }
            }
            Response::WhoList { room, users } => {
                if users.is_empty() {
                    format!("WHOLIST {room}")
                } else {
                    format!("WHOLIST {room} {}", users.join(" "))
                }
            }
        };
        format!("{body}\r\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hello() {
        assert_eq!(parse("HELLO alice"), Command::Hello { username: "alice".into() });
    }

    #[test]
    fn hello_rejects_bad_username() {
        assert_eq!(parse("HELLO al ice"), Command::Unknown);
        assert_eq!(parse(&format!("HELLO {}", "a".repeat(33))), Command::Unknown);
        assert_eq!(parse("HELLO al-ice"), Command::Unknown);
    }

    #[test]
    fn parses_register_requires_three_fields() {
        assert_eq!(
            parse("REGISTER alice PUBKEY TOK1"),
            Command::Register {
                username: "alice".into(),
                pubkey: "PUBKEY".into(),
                token: "TOK1".into()
            }
        );
        assert_eq!(parse("REGISTER alice PUBKEY"), Command::Unknown);
        assert_eq!(parse("REGISTER alice PUBKEY TOK1 EXTRA"), Command::Unknown);
    }

    #[test]
    fn join_normalises_case() {
        assert_eq!(parse("JOIN #Lobby"), Command::Join { room: "#lobby".into() });
        assert_eq!(parse("join #lobby"), Command::Join { room: "#lobby".into() });
    }

    #[test]
    fn join_rejects_invalid_room() {
        assert_eq!(parse("JOIN lobby"), Command::Unknown);
        assert_eq!(parse(&format!("JOIN #{}", "a".repeat(64))), Command::Unknown);
        assert_eq!(parse("JOIN #lo$bby"), Command::Unknown);
    }

    #[test]
    fn leave_does_not_revalidate_charset() {
        // LEAVE only lowercases; it does not re-check the room
        // charset/prefix that JOIN enforces.
        assert_eq!(parse("LEAVE not-a-room!!"), Command::Leave { room: "not-a-room!!".into() });
    }

    #[test]
    fn msg_tail_may_contain_spaces() {
        assert_eq!(
            parse("MSG #lobby hello world"),
            Command::Msg { room: "#lobby".into(), body: "hello world".into() }
        );
    }

    #[test]
    fn msg_body_boundary() {
        let ok_body = "a".repeat(MAX_BODY_LEN);
        assert_eq!(
            parse(&format!("MSG #lobby {ok_body}")),
            Command::Msg { room: "#lobby".into(), body: ok_body }
        );
        let too_long = "a".repeat(MAX_BODY_LEN + 1);
        assert_eq!(parse(&format!("MSG #lobby {too_long}")), Command::Unknown);
    }

    #[test]
    fn unrecognised_verb_is_unknown() {
        assert_eq!(parse("DANCE now"), Command::Unknown);
    }

    #[test]
    fn format_round_trips_shapes() {
        assert_eq!(Response::Pong.format(), "PONG\r\n");
        assert_eq!(
            Response::err_detail(ErrorCode::UserNotFound, "bob").format(),
            "ERROR USER_NOT_FOUND bob\r\n"
        );
        assert_eq!(Response::RoomList(vec![]).format(), "ROOMLIST\r\n");
        assert_eq!(
            Response::RoomList(vec!["#a".into(), "#b".into()]).format(),
            "ROOMLIST #a #b\r\n"
        );
    }
}
