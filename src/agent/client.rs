// Client side of the agent protocol: fetch a report or request a reset.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::debug;

use super::error::ClientError;
use super::protocol::{BlockType, DEFAULT_MAX_BLOCK_LEN, RESET_REPLY, read_block};

/// A report received in blocked framing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedReport {
    /// Concatenated label blocks.
    pub label: String,
    /// Concatenated report blocks.
    pub report: String,
}

fn connect<A: ToSocketAddrs + std::fmt::Display>(
    addr: A,
    timeout: Option<Duration>,
) -> Result<TcpStream, ClientError> {
    let stream = TcpStream::connect(&addr).map_err(|source| ClientError::Connect {
        addr: addr.to_string(),
        source,
    })?;
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;
    Ok(stream)
}

/// Request an export and read blocks until the terminator.
pub fn fetch<A: ToSocketAddrs + std::fmt::Display>(
    addr: A,
    timeout: Option<Duration>,
) -> Result<FetchedReport, ClientError> {
    let mut stream = connect(addr, timeout)?;
    // An empty line is an export request and spares the agent its timeout.
    stream.write_all(b"\n")?;

    let mut label = Vec::new();
    let mut report = Vec::new();
    let mut blocks = 0usize;
    loop {
        let Some(block) = read_block(&mut stream, DEFAULT_MAX_BLOCK_LEN)? else {
            return Err(if blocks == 0 {
                ClientError::NoPayload
            } else {
                ClientError::MissingTerminator
            });
        };
        blocks += 1;
        debug!("received block {:?} ({} bytes)", block.kind, block.payload.len());
        match block.kind {
            BlockType::Label => label.extend_from_slice(&block.payload),
            BlockType::Report => report.extend_from_slice(&block.payload),
            BlockType::End => break,
        }
    }

    Ok(FetchedReport {
        label: String::from_utf8(label)?,
        report: String::from_utf8(report)?,
    })
}

/// Request an export from an agent using raw framing.
///
/// Raw framing has no terminator, so an empty report and an export that
/// failed on the agent look the same on the wire. Both yield an empty string.
pub fn fetch_raw<A: ToSocketAddrs + std::fmt::Display>(
    addr: A,
    timeout: Option<Duration>,
) -> Result<String, ClientError> {
    let mut stream = connect(addr, timeout)?;
    stream.write_all(b"\n")?;
    let mut out = Vec::new();
    stream.read_to_end(&mut out)?;
    if out.is_empty() {
        debug!("agent closed the connection without data");
    }
    Ok(String::from_utf8(out)?)
}

/// Ask the agent to clear its counters.
pub fn reset<A: ToSocketAddrs + std::fmt::Display>(
    addr: A,
    timeout: Option<Duration>,
) -> Result<(), ClientError> {
    let mut stream = connect(addr, timeout)?;
    stream.write_all(b"RESET\n")?;
    let mut reply = Vec::new();
    (&mut stream).take(64).read_to_end(&mut reply)?;
    if reply != RESET_REPLY {
        return Err(ClientError::UnexpectedReply(
            String::from_utf8_lossy(&reply).into_owned(),
        ));
    }
    Ok(())
}
