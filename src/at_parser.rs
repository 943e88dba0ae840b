//! Incremental AT response recognizer
//!
//! Fed one byte at a time, it never waits for the rest of a line. Lines that
//! match no known shape are skipped up to the next CR or LF.

use heapless::Vec;

/// Longest SSID echoed by the association query
pub const SSID_MAX: usize = 64;

/// One recognized modem line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Error,
    Fail,
    Busy,
    /// `>` data prompt
    Prompt,
    SendOk,
    /// SSID reported by `+CWJAP_CUR:"..."`, unescaped
    CurrentAp(Vec<u8, SSID_MAX>),
    Connect(u8),
    /// `CLOSED` or `CONNECT FAIL`
    Disconnect(u8),
    /// `+IPD` header; `len` payload bytes follow the colon
    Packet { link: u8, len: u16 },
}

#[derive(Debug, Clone, Copy)]
enum Tail {
    Ok,
    Error,
    Fail,
    SendOk,
    Busy,
    ConnectWord(u8),
    ConnectFail(u8),
    Closed(u8),
    BufferedSendWord,
    BufferedSendOk,
    BufferedSendFail,
    Ipd,
    CurrentAp,
}

#[derive(Debug, Clone)]
enum State {
    Start,
    SkipLine,
    Expect { rest: &'static [u8], tail: Tail },
    LinkComma(u8),
    LinkAfterComma(u8),
    LinkC(u8),
    ConnectTail(u8),
    BufferedSendDigits,
    BufferedSendVerdict,
    Plus,
    IpdLink,
    IpdComma(u8),
    IpdLength { link: u8, len: u16 },
    Ssid { ssid: Vec<u8, SSID_MAX>, escaped: bool },
}

/// Byte-driven line recognizer
#[derive(Debug, Clone)]
pub struct LineParser {
    state: State,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineParser {
    pub const fn new() -> Self {
        Self {
            state: State::Start,
        }
    }

    /// Forgets any partial line
    pub fn reset(&mut self) {
        self.state = State::Start;
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Start)
    }

    /// Advances by one byte, returning a response when a line completes
    pub fn feed(&mut self, b: u8) -> Option<Response> {
        let state = core::mem::replace(&mut self.state, State::Start);
        match state {
            State::Start => self.start(b),
            State::SkipLine => {
                if !is_eol(b) {
                    self.state = State::SkipLine;
                }
                None
            }
            State::Expect { rest, tail } => match rest.split_first() {
                Some((&want, rest)) if want == b => {
                    if rest.is_empty() {
                        self.finish(tail)
                    } else {
                        self.state = State::Expect { rest, tail };
                        None
                    }
                }
                _ => self.mismatch(b),
            },
            State::LinkComma(link) => match b {
                b',' => self.goto(State::LinkAfterComma(link)),
                _ => self.mismatch(b),
            },
            State::LinkAfterComma(link) => match b {
                b'C' => self.goto(State::LinkC(link)),
                b'0'..=b'9' => self.goto(State::BufferedSendDigits),
                _ => self.mismatch(b),
            },
            State::LinkC(link) => match b {
                b'O' => self.expect(b"NNECT", Tail::ConnectWord(link)),
                b'L' => self.expect(b"OSED\r", Tail::Closed(link)),
                _ => self.mismatch(b),
            },
            State::ConnectTail(link) => match b {
                b' ' => self.expect(b"FAIL\r", Tail::ConnectFail(link)),
                b'\r' => Some(Response::Connect(link)),
                _ => self.mismatch(b),
            },
            State::BufferedSendDigits => match b {
                b'0'..=b'9' => self.goto(State::BufferedSendDigits),
                b',' => self.expect(b"SEND ", Tail::BufferedSendWord),
                _ => self.mismatch(b),
            },
            State::BufferedSendVerdict => match b {
                b'O' => self.expect(b"K", Tail::BufferedSendOk),
                b'F' => self.expect(b"AIL\r", Tail::BufferedSendFail),
                _ => self.mismatch(b),
            },
            State::Plus => match b {
                b'I' => self.expect(b"PD,", Tail::Ipd),
                b'C' => self.expect(b"WJAP_CUR:\"", Tail::CurrentAp),
                _ => self.mismatch(b),
            },
            State::IpdLink => match b {
                b'0'..=b'9' => self.goto(State::IpdComma(b - b'0')),
                _ => self.mismatch(b),
            },
            State::IpdComma(link) => match b {
                b',' => self.goto(State::IpdLength { link, len: 0 }),
                _ => self.mismatch(b),
            },
            State::IpdLength { link, len } => match b {
                b'0'..=b'9' => {
                    match len.checked_mul(10).and_then(|l| l.checked_add((b - b'0') as u16)) {
                        Some(len) => self.goto(State::IpdLength { link, len }),
                        None => self.mismatch(b),
                    }
                }
                b':' if len > 0 => Some(Response::Packet { link, len }),
                _ => self.mismatch(b),
            },
            State::Ssid { mut ssid, escaped } => {
                if escaped {
                    if ssid.push(b).is_err() {
                        return self.mismatch(b);
                    }
                    return self.goto(State::Ssid {
                        ssid,
                        escaped: false,
                    });
                }
                match b {
                    b'"' => {
                        self.state = State::SkipLine;
                        Some(Response::CurrentAp(ssid))
                    }
                    b'\\' => self.goto(State::Ssid {
                        ssid,
                        escaped: true,
                    }),
                    b'\r' | b'\n' => None,
                    _ => {
                        if ssid.push(b).is_err() {
                            return self.mismatch(b);
                        }
                        self.goto(State::Ssid {
                            ssid,
                            escaped: false,
                        })
                    }
                }
            }
        }
    }

    fn start(&mut self, b: u8) -> Option<Response> {
        match b {
            b'>' => Some(Response::Prompt),
            b'O' => self.expect(b"K\r", Tail::Ok),
            b'E' => self.expect(b"RROR\r", Tail::Error),
            b'F' => self.expect(b"AIL\r", Tail::Fail),
            b'S' => self.expect(b"END OK\r", Tail::SendOk),
            b'b' => self.expect(b"usy ", Tail::Busy),
            b'0'..=b'9' => self.goto(State::LinkComma(b - b'0')),
            b'+' => self.goto(State::Plus),
            b'\r' | b'\n' => None,
            _ => self.goto(State::SkipLine),
        }
    }

    fn finish(&mut self, tail: Tail) -> Option<Response> {
        match tail {
            Tail::Ok => Some(Response::Ok),
            Tail::Error => Some(Response::Error),
            Tail::Fail | Tail::BufferedSendFail => Some(Response::Fail),
            Tail::SendOk | Tail::BufferedSendOk => Some(Response::SendOk),
            Tail::Busy => {
                self.state = State::SkipLine;
                Some(Response::Busy)
            }
            Tail::ConnectWord(link) => self.goto(State::ConnectTail(link)),
            Tail::ConnectFail(link) | Tail::Closed(link) => Some(Response::Disconnect(link)),
            Tail::BufferedSendWord => self.goto(State::BufferedSendVerdict),
            Tail::Ipd => self.goto(State::IpdLink),
            Tail::CurrentAp => self.goto(State::Ssid {
                ssid: Vec::new(),
                escaped: false,
            }),
        }
    }

    fn expect(&mut self, rest: &'static [u8], tail: Tail) -> Option<Response> {
        self.state = State::Expect { rest, tail };
        None
    }

    fn goto(&mut self, state: State) -> Option<Response> {
        self.state = state;
        None
    }

    fn mismatch(&mut self, b: u8) -> Option<Response> {
        self.state = if is_eol(b) {
            State::Start
        } else {
            State::SkipLine
        };
        None
    }
}

fn is_eol(b: u8) -> bool {
    b == b'\r' || b == b'\n'
}
