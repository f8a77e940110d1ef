use std::io::{Read, Write};

use crate::provider::Reply;
use crate::{Error, Result};

const PROTOCOL_VERSION: &str = "1";

// Limits enforced by the target's attach listener.
const ARG_COUNT_MAX: usize = 3;
const NAME_LENGTH_MAX: usize = 16;
const ARG_LENGTH_MAX: usize = 1024;

/// Encode one attach request: version, command and exactly three
/// arguments, each NUL-terminated. Missing arguments are sent empty.
pub(crate) fn encode_request(command: &str, args: &[&str]) -> Result<Vec<u8>> {
    if command.is_empty() || command.len() > NAME_LENGTH_MAX {
        return Err(Error::invalid_input(format_args!(
            "command name must be 1..={NAME_LENGTH_MAX} bytes: {command:?}"
        )));
    }
    if args.len() > ARG_COUNT_MAX {
        return Err(Error::invalid_input(format_args!(
            "at most {ARG_COUNT_MAX} arguments allowed, got {}",
            args.len()
        )));
    }

    let mut buf = Vec::with_capacity(64);
    push_field(&mut buf, PROTOCOL_VERSION, "version")?;
    push_field(&mut buf, command, "command")?;
    for idx in 0..ARG_COUNT_MAX {
        let arg = args.get(idx).copied().unwrap_or_default();
        if arg.len() > ARG_LENGTH_MAX {
            return Err(Error::invalid_input(format_args!(
                "argument {idx} exceeds {ARG_LENGTH_MAX} bytes"
            )));
        }
        push_field(&mut buf, arg, "argument")?;
    }
    Ok(buf)
}

fn push_field(buf: &mut Vec<u8>, value: &str, label: &'static str) -> Result<()> {
    if value.as_bytes().contains(&0) {
        return Err(Error::invalid_input(format_args!("{label} contains NUL")));
    }
    buf.extend_from_slice(value.as_bytes());
    buf.push(0);
    Ok(())
}

/// Split a raw reply into completion status and body.
pub(crate) fn parse_reply(raw: &str) -> Result<Reply> {
    if raw.is_empty() {
        return Err(Error::io("premature EOF reading reply from target VM"));
    }

    let (status_line, body) = raw.split_once('\n').unwrap_or((raw, ""));
    let status = status_line.trim().parse::<i32>().map_err(|_| {
        Error::io(format_args!(
            "non-numeric completion status from target VM: {status_line:?}"
        ))
    })?;

    Ok(Reply::new(status, body))
}

/// Send a request and read the reply until the target closes the stream.
pub(crate) fn round_trip<S: Read + Write>(stream: &mut S, request: &[u8]) -> Result<Reply> {
    stream
        .write_all(request)
        .and_then(|_| stream.flush())
        .map_err(|err| Error::io_context("writing attach request", err))?;

    let mut raw = Vec::new();
    stream
        .read_to_end(&mut raw)
        .map_err(|err| Error::io_context("reading attach reply", err))?;

    parse_reply(&String::from_utf8_lossy(&raw))
}
