//! Wire framing for the inverter's serial protocol.
//!
//! Requests sent by the host are framed as:
//!
//! ```text
//! ^ P <len:3> <command> \r
//! ```
//!
//! where `len` is the zero-padded decimal length of the command plus one.
//! Outbound frames carry no checksum.
//!
//! Responses sent by the inverter are framed as:
//!
//! ```text
//! ^ D <len:3> <payload> <crc:2> \r
//! ```
//!
//! where `len` is the payload length plus three and `crc` is a big-endian
//! CRC-16/XMODEM (polynomial `0x1021`, initial value `0`) computed over
//! every preceding byte of the frame.
//!
//! [`FrameDecoder`] reassembles response payloads from an arbitrarily
//! fragmented byte stream and drops corrupted frames without losing
//! synchronization.

use core::{
    fmt::{Display, Formatter},
    str,
};
use log::{debug, trace};

/// Byte marking the start of a frame.
pub const START: u8 = 0x5e;

/// Byte marking the end of a frame.
pub const END: u8 = 0x0d;

/// Direction tag of frames sent by the host.
const POLL: u8 = b'P';

/// Direction tag of frames sent by the inverter.
const DATA: u8 = b'D';

/// Largest value representable by the three length digits.
const MAX_DECLARED_LEN: usize = 999;

/// Reason for dropping a candidate frame.
///
/// Invalid frames are never reported to callers; they are logged and
/// skipped while the decoder resynchronizes on the next end marker.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
enum FrameError {
    /// An end marker was found before any start marker.
    MissingStart,
    /// The frame is not tagged as a data response.
    NotData,
    /// The length digits are missing or not decimal.
    InvalidLength,
    /// The frame size does not match its declared length.
    LengthMismatch,
    /// The frame's checksum does not match its contents.
    IncorrectChecksum,
}

impl Display for FrameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MissingStart => write!(f, "missing start marker"),
            Self::NotData => write!(f, "not a data frame"),
            Self::InvalidLength => write!(f, "invalid length field"),
            Self::LengthMismatch => write!(f, "length mismatch"),
            Self::IncorrectChecksum => write!(f, "incorrect checksum"),
        }
    }
}

/// Computes the CRC-16/XMODEM checksum used by response frames.
#[must_use]
pub fn checksum(data: &[u8]) -> u16 {
    crc16::State::<crc16::XMODEM>::calculate(data)
}

/// Encodes a request frame for the given command.
///
/// Returns [`None`] if the command contains a frame marker
/// or is too long for the three length digits.
#[must_use]
pub fn encode_request(cmd: &str) -> Option<Vec<u8>> {
    encode(POLL, cmd.as_bytes(), cmd.len() + 1, false)
}

/// Encodes a response frame carrying the given payload.
///
/// This is the inverter's side of the protocol and is
/// mostly useful for simulators and tests.
#[must_use]
pub fn encode_response(payload: &str) -> Option<Vec<u8>> {
    encode(DATA, payload.as_bytes(), payload.len() + 3, true)
}

fn encode(tag: u8, data: &[u8], declared_len: usize, with_checksum: bool) -> Option<Vec<u8>> {
    if declared_len > MAX_DECLARED_LEN || data.iter().any(|&b| b == START || b == END) {
        return None;
    }

    let mut frame = Vec::with_capacity(data.len() + 8);

    frame.push(START);
    frame.push(tag);
    frame.extend_from_slice(format!("{declared_len:03}").as_bytes());
    frame.extend_from_slice(data);

    if with_checksum {
        let crc = checksum(&frame);

        frame.extend_from_slice(&crc.to_be_bytes());
    }

    frame.push(END);

    Some(frame)
}

/// Validates a candidate frame spanning from its start to its end marker.
///
/// Returns the frame's payload on success.
fn parse_frame(frame: &[u8]) -> Result<String, FrameError> {
    if frame.get(1) != Some(&DATA) {
        return Err(FrameError::NotData);
    }

    let declared_len = frame
        .get(2..5)
        .filter(|digits| digits.iter().all(u8::is_ascii_digit))
        .and_then(|digits| str::from_utf8(digits).ok())
        .and_then(|digits| digits.parse::<usize>().ok())
        .ok_or(FrameError::InvalidLength)?;
    let payload_len = declared_len
        .checked_sub(3)
        .ok_or(FrameError::InvalidLength)?;

    if frame.len() != payload_len + 8 {
        return Err(FrameError::LengthMismatch);
    }

    let (body, trailer) = frame.split_at(frame.len() - 3);
    let actual = u16::from_be_bytes([trailer[0], trailer[1]]);

    if checksum(body) != actual {
        return Err(FrameError::IncorrectChecksum);
    }

    Ok(String::from_utf8_lossy(&body[5..]).into_owned())
}

/// Incremental decoder turning received bytes into response payloads.
///
/// Bytes are appended with [`FrameDecoder::push`] as they arrive and
/// payloads are taken out with [`FrameDecoder::next_payload`].
/// A candidate frame spans from the first start marker to the first
/// end marker in the pending bytes. Every candidate is consumed through
/// its end marker, whether it is valid or not, so garbage and truncated
/// frames never stall the stream.
///
/// # Examples
///
/// ```
/// use mppsolar::frame::FrameDecoder;
///
/// let mut decoder = FrameDecoder::new();
///
/// decoder.push(b"\x5eD00517");
/// assert_eq!(decoder.next_payload(), None);
///
/// decoder.push(&[0xca, 0xec, 0x0d]);
/// assert_eq!(decoder.next_payload().as_deref(), Some("17"));
/// ```
#[derive(Default, Debug)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    /// Constructs a new decoder with no pending bytes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends received bytes to the pending buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Returns the bytes not yet consumed into a frame.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Extracts the next valid payload from the pending bytes.
    ///
    /// Invalid frames encountered on the way are dropped.
    /// Returns [`None`] once no complete frame candidate remains.
    pub fn next_payload(&mut self) -> Option<String> {
        loop {
            let start = self.pending.iter().position(|&b| b == START)?;
            let end = self.pending.iter().position(|&b| b == END)?;
            let res = if start < end {
                parse_frame(&self.pending[start..=end])
            } else {
                Err(FrameError::MissingStart)
            };

            match res {
                Ok(payload) => {
                    trace!("Decoded payload: {payload:?}");
                    self.pending.drain(..=end);

                    return Some(payload);
                }
                Err(err) => {
                    debug!("Dropping frame ({err}): {:02x?}", &self.pending[..=end]);
                    self.pending.drain(..=end);
                }
            }
        }
    }
}
