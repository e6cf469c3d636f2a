/*!
 * Frame segmentation and reassembly.
 *
 * Lite-family breezers exchange messages larger than one characteristic
 * write. Each frame starts with a position marker:
 *
 * ```text
 * SINGLE 0x80  whole message in one frame
 * FIRST  0x00  first chunk of a multi-frame message
 * MIDDLE 0x40  interior chunk
 * END    0xc0  final chunk
 * ```
 *
 * The first byte of an outbound message is a placeholder that the marker
 * replaces. Inbound frames are stripped of their marker and concatenated.
 * A reassembled Lite-family message is a fixed [`Header`], a body and a
 * two byte trailer; see [`Envelope`].
 */
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, error, trace, warn};

use breezer_core::config::FramingConfig;

use crate::error::{DeviceError, Result};

/// Position marker carried in the first byte of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// The frame holds a complete message
    Single,
    /// First frame of a multi-frame message
    First,
    /// Interior frame
    Middle,
    /// Last frame of a multi-frame message
    End,
}

impl Marker {
    /// Wire value of the marker
    pub const fn byte(self) -> u8 {
        match self {
            Marker::Single => 0x80,
            Marker::First => 0x00,
            Marker::Middle => 0x40,
            Marker::End => 0xc0,
        }
    }

    /// Parse a marker byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x80 => Some(Marker::Single),
            0x00 => Some(Marker::First),
            0x40 => Some(Marker::Middle),
            0xc0 => Some(Marker::End),
            _ => None,
        }
    }
}

/// Splits outbound messages into marker-tagged frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    mtu: usize,
    single_limit: usize,
}

impl FrameCodec {
    /// Create a codec for the given MTU and small-message cutoff
    ///
    /// Messages whose length (leading byte included) is at most
    /// `single_limit` are sent as one SINGLE frame. The MTU is raised to 2
    /// and the cutoff kept between 1 and the MTU.
    pub fn new(mtu: usize, single_limit: usize) -> Self {
        let mtu = mtu.max(2);
        Self {
            mtu,
            single_limit: single_limit.clamp(1, mtu),
        }
    }

    /// Create a codec from the `[framing]` configuration section
    pub fn from_config(config: &FramingConfig) -> Self {
        Self::new(config.mtu, config.single_frame_limit)
    }

    /// Largest frame this codec produces
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Small-message cutoff
    pub fn single_limit(&self) -> usize {
        self.single_limit
    }

    /// Split a message into frames
    ///
    /// The leading byte of `message` is dropped and regenerated as the
    /// marker. An empty message yields no frames.
    pub fn segment(&self, message: &[u8]) -> Vec<Bytes> {
        let Some((_, payload)) = message.split_first() else {
            return Vec::new();
        };

        if message.len() <= self.single_limit {
            return vec![tagged(Marker::Single, payload)];
        }

        let chunks: Vec<&[u8]> = payload.chunks(self.mtu - 1).collect();
        let Some(last) = chunks.len().checked_sub(1) else {
            return vec![tagged(Marker::Single, payload)];
        };

        let mut frames: Vec<Bytes> = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let marker = match i {
                    0 => Marker::First,
                    i if i == last => Marker::End,
                    _ => Marker::Middle,
                };
                tagged(marker, chunk)
            })
            .collect();

        // One chunk only: the receiver still needs an END to finish.
        if frames.len() == 1 {
            frames.push(tagged(Marker::End, &[]));
        }

        trace!("Segmented {} bytes into {} frames", message.len(), frames.len());
        frames
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::from_config(&FramingConfig::default())
    }
}

fn tagged(marker: Marker, payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(payload.len() + 1);
    frame.put_u8(marker.byte());
    frame.extend_from_slice(payload);
    frame.freeze()
}

/// Reassembly buffer for inbound marker-tagged frames
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: BytesMut,
    accumulating: bool,
}

impl Reassembler {
    /// Create an empty reassembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame
    ///
    /// Returns the complete message (markers removed) once a SINGLE frame
    /// or the END of a FIRST..END sequence arrives. Out-of-sequence and
    /// unknown frames are logged and dropped.
    pub fn accept(&mut self, frame: &[u8]) -> Option<Bytes> {
        let Some((&marker, payload)) = frame.split_first() else {
            error!("Got an empty frame");
            return None;
        };

        match Marker::from_byte(marker) {
            Some(Marker::Single) => {
                if self.accumulating {
                    warn!(
                        "Got a single frame while collecting a message, dropping {} buffered bytes",
                        self.buffer.len()
                    );
                    self.reset();
                }
                Some(Bytes::copy_from_slice(payload))
            }
            Some(Marker::First) => {
                if self.accumulating {
                    warn!(
                        "Got a first frame while collecting a message, dropping {} buffered bytes",
                        self.buffer.len()
                    );
                }
                self.buffer.clear();
                self.buffer.extend_from_slice(payload);
                self.accumulating = true;
                None
            }
            Some(Marker::Middle) => {
                if !self.accumulating {
                    error!("Got a middle frame but waiting for a first");
                    return None;
                }
                self.buffer.extend_from_slice(payload);
                None
            }
            Some(Marker::End) => {
                if !self.accumulating {
                    error!("Got an end frame but waiting for a first");
                    return None;
                }
                self.buffer.extend_from_slice(payload);
                self.accumulating = false;
                let message = self.buffer.split().freeze();
                debug!("Reassembled a {} byte message", message.len());
                Some(message)
            }
            None => {
                error!("Unknown frame marker {:#04x}", marker);
                None
            }
        }
    }

    /// Discard any partial message
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.accumulating = false;
    }

    /// Whether a multi-frame message is being collected
    pub fn is_accumulating(&self) -> bool {
        self.accumulating
    }

    /// Number of buffered payload bytes
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// How a model puts messages on the air
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Every message is exactly one unmarked frame
    Raw,
    /// Messages are split and tagged with position markers
    Segmented(FrameCodec),
}

impl Framing {
    /// Frames to write for `message`
    pub fn segment(&self, message: &[u8]) -> Vec<Bytes> {
        match self {
            Framing::Raw if message.is_empty() => Vec::new(),
            Framing::Raw => vec![Bytes::copy_from_slice(message)],
            Framing::Segmented(codec) => codec.segment(message),
        }
    }

    /// Feed one inbound frame, returning a complete message if any
    pub fn accept(&self, reassembler: &mut Reassembler, frame: &[u8]) -> Option<Bytes> {
        match self {
            Framing::Raw if frame.is_empty() => {
                error!("Got an empty frame");
                None
            }
            Framing::Raw => Some(Bytes::copy_from_slice(frame)),
            Framing::Segmented(_) => reassembler.accept(frame),
        }
    }
}

/// Magic byte of every Lite-family header
pub const MAGIC: u8 = 0x3a;

/// Length of a Lite-family header
pub const HEADER_LEN: usize = 14;

/// Trailer appended to outbound Lite-family messages
pub const TRAILER: [u8; 2] = [0xbb, 0xaa];

/// Longest body whose message size still fits the 16-bit size field
pub const MAX_BODY_LEN: usize = u16::MAX as usize - HEADER_LEN - TRAILER.len();

/// Fixed prefix of a reassembled Lite-family message
///
/// ```text
/// 0..2   size (u16 LE, message length without marker)
/// 2      magic 0x3a
/// 3      flag
/// 4..6   command
/// 6..10  request id
/// 10..14 sequence
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Declared message size
    pub size: u16,
    /// Flag byte (random on set requests)
    pub flag: u8,
    /// Command type
    pub command: [u8; 2],
    /// Request id echoed by the device
    pub request_id: [u8; 4],
    /// Sequence number
    pub sequence: [u8; 4],
}

impl Header {
    /// Parse a header from the start of a message
    pub fn parse(message: &[u8]) -> Result<Self> {
        if message.len() < HEADER_LEN {
            return Err(DeviceError::Framing(format!(
                "message of {} bytes is shorter than the {} byte header",
                message.len(),
                HEADER_LEN
            )));
        }
        if message[2] != MAGIC {
            return Err(DeviceError::Framing(format!(
                "wrong magic number {:#04x}",
                message[2]
            )));
        }

        let mut header = Header {
            size: u16::from_le_bytes([message[0], message[1]]),
            flag: message[3],
            command: [0; 2],
            request_id: [0; 4],
            sequence: [0; 4],
        };
        header.command.copy_from_slice(&message[4..6]);
        header.request_id.copy_from_slice(&message[6..10]);
        header.sequence.copy_from_slice(&message[10..14]);
        Ok(header)
    }
}

/// A reassembled Lite-family message split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Message header
    pub header: Header,
    /// Message body
    pub body: Bytes,
    /// Checksum trailer
    pub trailer: [u8; 2],
}

impl Envelope {
    /// Split a reassembled message
    pub fn parse(message: &Bytes) -> Result<Self> {
        let header = Header::parse(message)?;
        if message.len() < HEADER_LEN + TRAILER.len() {
            return Err(DeviceError::Framing(format!(
                "message of {} bytes has no room for a trailer",
                message.len()
            )));
        }
        if usize::from(header.size) != message.len() {
            warn!(
                "Header declares {} bytes but the message has {}",
                header.size,
                message.len()
            );
        }

        let body_end = message.len() - TRAILER.len();
        Ok(Envelope {
            header,
            body: message.slice(HEADER_LEN..body_end),
            trailer: [message[body_end], message[body_end + 1]],
        })
    }

    /// Build an outbound message
    ///
    /// The result starts with a placeholder byte for the frame marker and
    /// declares its own size in the header. `body` must not exceed
    /// [`MAX_BODY_LEN`]; every command body is a few bytes long.
    pub fn build(
        flag: u8,
        command: [u8; 2],
        request_id: [u8; 4],
        sequence: [u8; 4],
        body: &[u8],
    ) -> Vec<u8> {
        debug_assert!(body.len() <= MAX_BODY_LEN, "envelope body too long");
        let size = HEADER_LEN + body.len() + TRAILER.len();
        let mut message = Vec::with_capacity(size + 1);
        message.push(Marker::First.byte());
        message.extend_from_slice(&(size as u16).to_le_bytes());
        message.push(MAGIC);
        message.push(flag);
        message.extend_from_slice(&command);
        message.extend_from_slice(&request_id);
        message.extend_from_slice(&sequence);
        message.extend_from_slice(body);
        message.extend_from_slice(&TRAILER);
        message
    }
}
