// Agent wire protocol.
//
// Request: one plaintext line. `RESET` clears counters; anything else
// (including nothing before the read timeout) asks for an export.
//
// Response to RESET: the three bytes `OK\n`.
//
// Response to an export, blocked framing:
//
//   +------+----------------+-----------------+
//   | tag  | length (u32 BE)| payload         |
//   +------+----------------+-----------------+
//
//   0x01 label, 0x02 report, 0xFF terminator (always zero length).
//
// Raw framing writes the report bytes alone and closes.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Reply sent after a successful reset.
pub const RESET_REPLY: &[u8] = b"OK\n";

/// Tag byte plus big-endian length.
pub const BLOCK_HEADER_SIZE: usize = 5;

/// Longest command line the agent will read.
pub const MAX_COMMAND_LEN: u64 = 256;

/// Default cap on a single block payload read by the client (256 MiB).
pub const DEFAULT_MAX_BLOCK_LEN: u32 = 1 << 28;

/// Response block tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockType {
    Label = 0x01,
    Report = 0x02,
    End = 0xFF,
}

impl BlockType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::Label),
            0x02 => Some(Self::Report),
            0xFF => Some(Self::End),
            _ => None,
        }
    }
}

/// How an export response is put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// Report bytes only, end signalled by closing the connection.
    Raw,
    /// Label, report and terminator blocks.
    #[default]
    Blocked,
}

/// A parsed request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Export,
    Reset,
}

impl Command {
    /// Parse a request line. Surrounding whitespace is ignored; anything
    /// other than `RESET` is an export request.
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "RESET" => Self::Reset,
            _ => Self::Export,
        }
    }
}

/// Protocol violations seen while reading blocks.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown block tag {0:#04X}")]
    UnknownBlock(u8),

    #[error("block of {len} bytes exceeds limit of {max}")]
    Oversize { len: u32, max: u32 },

    #[error("terminator block carries {0} bytes of payload")]
    NonEmptyTerminator(u32),

    #[error("truncated block: {0}")]
    Io(#[from] io::Error),
}

/// One response block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockType,
    pub payload: Vec<u8>,
}

/// Write one block.
pub fn write_block<W: Write>(w: &mut W, kind: BlockType, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("block payload of {} bytes exceeds u32", payload.len()),
        )
    })?;
    let mut header = [0u8; BLOCK_HEADER_SIZE];
    header[0] = kind as u8;
    header[1..].copy_from_slice(&len.to_be_bytes());
    w.write_all(&header)?;
    w.write_all(payload)
}

/// Write a complete blocked export response: label, report, terminator.
pub fn write_report_blocks<W: Write>(w: &mut W, label: &str, report: &[u8]) -> io::Result<()> {
    write_block(w, BlockType::Label, label.as_bytes())?;
    write_block(w, BlockType::Report, report)?;
    write_block(w, BlockType::End, &[])
}

/// Read one block.
///
/// Returns `Ok(None)` on a clean end of stream before the tag byte.
pub fn read_block<R: Read>(r: &mut R, max_len: u32) -> Result<Option<Block>, ProtocolError> {
    let mut tag = [0u8; 1];
    loop {
        match r.read(&mut tag) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    let kind = BlockType::from_u8(tag[0]).ok_or(ProtocolError::UnknownBlock(tag[0]))?;

    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > max_len {
        return Err(ProtocolError::Oversize { len, max: max_len });
    }
    if kind == BlockType::End && len != 0 {
        return Err(ProtocolError::NonEmptyTerminator(len));
    }

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok(Some(Block { kind, payload }))
}

/// Parse `data` as a command line followed by a response stream.
#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_parse_exchange(data: &[u8]) {
    let split = data.iter().position(|&b| b == b'\n').map_or(data.len(), |i| i + 1);
    let (line, mut rest) = data.split_at(split);
    let _ = Command::parse(&String::from_utf8_lossy(line));
    while let Ok(Some(block)) = read_block(&mut rest, 1 << 16) {
        if block.kind == BlockType::End {
            break;
        }
    }
}
