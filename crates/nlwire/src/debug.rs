//! Opt-in wire-level debugging, driven by the `NLDEBUG` environment variable.
//!
//! `NLDEBUG` holds comma-separated `key=value` pairs:
//!
//! - `level=<int>` — verbosity; anything below 1 silences the dumper.
//! - `format=mnl` — dump messages to stderr in the mnl binary layout,
//!   colorized iff stdout is a terminal. Any other value logs compact
//!   `tracing` events instead.
//!
//! Debugging is observational only; it never changes wire or state-machine
//! behavior.

use std::io::{self, IsTerminal, Write};

use colored::Colorize;

use crate::attr::{NLA_F_NESTED, NLA_F_NET_BYTEORDER, NLA_HDRLEN, NLA_TYPE_MASK, nla_align};
use crate::message::{
    Header, Message, MsgType, NLM_F_ACK, NLM_F_ECHO, NLM_F_MULTI, NLM_F_REQUEST, NLMSG_HDRLEN,
};
use crate::nlenc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Log,
    Mnl,
}

/// Renders messages crossing a connection when `NLDEBUG` asks for it.
#[derive(Debug)]
pub(crate) struct Debugger {
    level: i32,
    format: Format,
}

impl Debugger {
    /// Build a debugger from `NLDEBUG`, or `None` when the variable is
    /// absent.
    pub(crate) fn from_env() -> Option<Debugger> {
        let raw = std::env::var("NLDEBUG").ok()?;
        Some(Self::parse(&raw))
    }

    fn parse(raw: &str) -> Debugger {
        let mut d = Debugger {
            level: 1,
            format: Format::Mnl,
        };

        for arg in raw.split(',') {
            let mut kv = arg.splitn(2, '=');
            let (Some(k), Some(v)) = (kv.next(), kv.next()) else {
                continue;
            };
            match k {
                "level" => match v.parse() {
                    Ok(level) => d.level = level,
                    Err(_) => tracing::warn!(value = v, "ignoring invalid NLDEBUG level"),
                },
                "format" => {
                    d.format = if v == "mnl" { Format::Mnl } else { Format::Log };
                }
                _ => {}
            }
        }

        d
    }

    /// Render one message crossing the connection in direction `op`.
    pub(crate) fn message(&self, op: &'static str, m: &Message) {
        if self.level < 1 {
            return;
        }

        match self.format {
            Format::Mnl => {
                let colorize = io::stdout().is_terminal();
                let mut out = Vec::new();
                let _ = dump_message(&mut out, m, colorize);
                eprint!("nl: {}\n{}", op, String::from_utf8_lossy(&out));
            }
            Format::Log => {
                tracing::debug!(
                    op,
                    length = m.header.length,
                    message_type = m.header.message_type,
                    flags = m.header.flags,
                    sequence = m.header.sequence,
                    pid = m.header.pid,
                    "netlink message"
                );
            }
        }
    }
}

fn flag_marker(flags: u16, bit: u16, marker: &'static str) -> &'static str {
    if flags & bit != 0 { marker } else { "-" }
}

fn dump_header(w: &mut impl Write, h: &Header) -> io::Result<()> {
    writeln!(w, "----------------\t------------------")?;
    writeln!(w, "|  {:010}  |\t| message length |", h.length)?;
    writeln!(
        w,
        "| {:05} | {}{}{}{} |\t|  type | flags  |",
        h.message_type,
        flag_marker(h.flags, NLM_F_REQUEST, "R"),
        flag_marker(h.flags, NLM_F_MULTI, "M"),
        flag_marker(h.flags, NLM_F_ACK, "A"),
        flag_marker(h.flags, NLM_F_ECHO, "E"),
    )?;
    writeln!(w, "|  {:010}  |\t| sequence number|", h.sequence)?;
    writeln!(w, "|  {:010}  |\t|     port ID    |", h.pid)?;
    writeln!(w, "----------------\t------------------")
}

// Mirrors the layout mnl_nlmsg_fprintf produces: header box, extra header
// row, then one row per attribute header with a printable-byte gutter for
// payload words.
fn dump_message(w: &mut impl Write, m: &Message, colorize: bool) -> io::Result<()> {
    dump_header(w, &m.header)?;

    let has_header = if m.header.message_type == MsgType::ERROR {
        true
    } else {
        if m.header.message_type == MsgType::DONE && m.header.is_multi() && m.data.is_empty() {
            return Ok(());
        }
        false
    };

    if m.data.len() < 4 {
        return Ok(());
    }

    if nlenc::int32(&m.data[0..4]) != 0 {
        write!(
            w,
            "| {:02x} {:02x} {:02x} {:02x}  |\t",
            m.data[0], m.data[1], m.data[2], m.data[3]
        )?;
        writeln!(w, "|  extra header  |")?;
    }

    let off = if has_header {
        // The TLVs sit past the embedded header of the offending request.
        if m.data.len() < 4 + NLMSG_HDRLEN {
            return Ok(());
        }
        let Ok(h) = Header::from_bytes(&m.data[4..]) else {
            return Ok(());
        };
        let off = 4 + h.length as usize;
        if m.data.len() < off {
            return Ok(());
        }
        off
    } else {
        4
    };

    let data = &m.data[off..];
    let mut i = 0;
    while data.len().saturating_sub(i) >= NLA_HDRLEN {
        let l = nlenc::uint16(&data[i..i + 2]) as usize;
        let t = nlenc::uint16(&data[i + 2..i + 4]);

        let nested = flag_marker(t, NLA_F_NESTED, "N");
        let net_order = flag_marker(t, NLA_F_NET_BYTEORDER, "B");
        if colorize {
            write!(
                w,
                "|{}|{}{}|{}|\t",
                format!("{:05}", l).red().bold(),
                nested.green().bold(),
                net_order.green().bold(),
                format!("{:05}", t & NLA_TYPE_MASK).blue().bold(),
            )?;
        } else {
            write!(
                w,
                "|{:05}|{}{}|{:05}|\t",
                l,
                nested,
                net_order,
                t & NLA_TYPE_MASK
            )?;
        }
        writeln!(w, "|len |flags| type|")?;

        let next_attr = i + nla_align(l);
        i += NLA_HDRLEN;

        // Zero-length attributes carry nothing; nested payloads are dumped
        // as their own attribute rows.
        if l == 0 || t & NLA_F_NESTED != 0 {
            continue;
        }

        while i < next_attr && i + 4 <= data.len() {
            let word = &data[i..i + 4];
            write!(
                w,
                "| {:02x} {:02x} {:02x} {:02x}  |\t",
                word[0], word[1], word[2], word[3]
            )?;
            write!(w, "|      data      |")?;
            writeln!(
                w,
                "\t {} {} {} {}",
                printable(word[0]),
                printable(word[1]),
                printable(word[2]),
                printable(word[3]),
            )?;
            i += 4;
        }
    }

    writeln!(w, "----------------\t------------------")
}

fn printable(b: u8) -> char {
    if b.is_ascii_graphic() { b as char } else { ' ' }
}
