//! Bit-exact encode/decode for the common PTP header, Sync / Delay_Req /
//! Delay_Resp bodies, and the enclosing Ethernet + 802.1Q framing
//! (spec.md §4.1).
//!
//! Field access is by explicit byte offset over an unaligned slice —
//! no packed/bit-field struct is ever cast onto wire bytes, since that
//! relies on the target's in-memory field order, which is not portable
//! (spec.md §9 REDESIGN FLAGS).

/// EtherType carried by PTP frames, tagged or not.
pub const PTP_ETHERTYPE: u16 = 0x88F7;
/// EtherType of an 802.1Q VLAN tag.
pub const VLAN_ETHERTYPE: u16 = 0x8100;

const ETH_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;

/// Common PTP header length in octets.
pub const HEADER_LEN: usize = 34;
/// Sync / Delay_Req body length (10-octet origin timestamp).
pub const TIMESTAMP_BODY_LEN: usize = 10;
/// Delay_Resp body length (10-octet receive timestamp + 10-octet requesting port identity).
pub const DELAY_RESP_BODY_LEN: usize = 20;

/// Source MAC the slave stamps on outgoing Delay_Req frames.
pub const DELAY_REQ_SRC_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x20];

/// This deployment's single PTP domain.
pub const DOMAIN_NUMBER: u8 = 10;
/// Flags field the master expects on Delay_Req (two-step semantics).
pub const DELAY_REQ_FLAGS: u16 = 0x0102;
/// PTP control field value for Delay_Req.
pub const CONTROL_DELAY_REQ: u8 = 1;
/// log-message-interval the master expects (one request per 0.5s nominal).
pub const DELAY_REQ_LOG_INTERVAL: i8 = -1;
/// Message length the master expects to see advertised, despite the
/// standard minimum Delay_Req body being only 44 octets total. See
/// spec.md §9 Open Question: a conformant master may reject this; a
/// reimplementation for a broader master population should make it
/// configurable, which is why [`build_delay_req`] takes it as a
/// parameter rather than baking in the constant.
pub const DELAY_REQ_PADDED_LEN: usize = 106;

/// Recognized PTP message types (spec.md §4.1). Any other value is
/// accepted and carried as `Other` — it is ignored without counting as
/// an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtpMessageType {
    Sync,
    DelayReq,
    FollowUp,
    DelayResp,
    Announce,
    Other(u8),
}

impl From<u8> for PtpMessageType {
    fn from(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Self::Sync,
            0x1 => Self::DelayReq,
            0x8 => Self::FollowUp,
            0x9 => Self::DelayResp,
            0xB => Self::Announce,
            other => Self::Other(other),
        }
    }
}

impl PtpMessageType {
    fn to_nibble(self) -> u8 {
        match self {
            Self::Sync => 0x0,
            Self::DelayReq => 0x1,
            Self::FollowUp => 0x8,
            Self::DelayResp => 0x9,
            Self::Announce => 0xB,
            Self::Other(v) => v & 0x0F,
        }
    }
}

/// PTP clock identity (EUI-64 format, 8 octets).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockIdentity(pub [u8; 8]);

/// PTP port identity: 64-bit clock identity + 16-bit port number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortIdentity {
    pub clock_identity: ClockIdentity,
    pub port_number: u16,
}

impl PortIdentity {
    /// The fixed identity this deployment's slave MUST transmit (spec.md
    /// §3): the master echoes it verbatim in Delay_Resp, and a
    /// MAC-derived identity breaks that correlation.
    pub const SLAVE_FIXED: PortIdentity = PortIdentity {
        clock_identity: ClockIdentity([0x2C, 0x1A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
        port_number: 0,
    };

    fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 10 {
            return None;
        }
        let mut id = [0u8; 8];
        id.copy_from_slice(&bytes[0..8]);
        Some(Self {
            clock_identity: ClockIdentity(id),
            port_number: u16::from_be_bytes([bytes[8], bytes[9]]),
        })
    }

    fn write_to(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.clock_identity.0);
        out[8..10].copy_from_slice(&self.port_number.to_be_bytes());
    }
}

/// PTP timestamp: 16-bit seconds-high (ignored), 32-bit seconds-low,
/// 32-bit nanoseconds, all big-endian (spec.md §3).
///
/// The master in this deployment populates only seconds-low;
/// seconds-high MUST be ignored on decode and emitted as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PtpTimestamp {
    pub seconds_low: u32,
    pub nanoseconds: u32,
}

impl PtpTimestamp {
    fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 10 {
            return None;
        }
        // bytes[0..2] is seconds-high; ignored by design in this deployment.
        let seconds_low = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let nanoseconds = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        Some(Self {
            seconds_low,
            nanoseconds,
        })
    }

    fn write_to(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&[0, 0]);
        out[2..6].copy_from_slice(&self.seconds_low.to_be_bytes());
        out[6..10].copy_from_slice(&self.nanoseconds.to_be_bytes());
    }

    /// Decode to nanoseconds: `seconds_low * 1e9 + nanoseconds`.
    pub fn to_ns(self) -> i64 {
        self.seconds_low as i64 * 1_000_000_000 + self.nanoseconds as i64
    }

    /// Encode from nanoseconds. Seconds-high is dropped by construction
    /// (this deployment's epoch fits in seconds-low), so the round trip
    /// law is `to_ns(from_ns(x)) == (x / 1e9 mod 2^32) * 1e9 + x mod 1e9`
    /// for nonnegative `x`.
    pub fn from_ns(ns: i64) -> Self {
        let ns = ns.max(0) as u64;
        Self {
            seconds_low: (ns / 1_000_000_000) as u32,
            nanoseconds: (ns % 1_000_000_000) as u32,
        }
    }
}

/// Common PTP header, 34 octets (spec.md §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtpHeader {
    pub message_type: PtpMessageType,
    pub version: u8,
    pub message_length: u16,
    pub domain_number: u8,
    pub flags: u16,
    pub correction_field: i64,
    pub source_port_identity: PortIdentity,
    pub sequence_id: u16,
    pub control_field: u8,
    pub log_message_interval: i8,
}

impl PtpHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            message_type: PtpMessageType::from(data[0]),
            version: data[1] & 0x0F,
            message_length: u16::from_be_bytes([data[2], data[3]]),
            domain_number: data[4],
            flags: u16::from_be_bytes([data[6], data[7]]),
            correction_field: i64::from_be_bytes([
                data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
            ]),
            source_port_identity: PortIdentity::parse(&data[20..30])?,
            sequence_id: u16::from_be_bytes([data[30], data[31]]),
            control_field: data[32],
            log_message_interval: data[33] as i8,
        })
    }

    fn write_to(&self, out: &mut [u8]) {
        out[0] = self.message_type.to_nibble();
        out[1] = 2 | (self.version & 0xF0);
        out[2..4].copy_from_slice(&self.message_length.to_be_bytes());
        out[4] = self.domain_number;
        out[5] = 0;
        out[6..8].copy_from_slice(&self.flags.to_be_bytes());
        out[8..16].copy_from_slice(&self.correction_field.to_be_bytes());
        out[16..20].copy_from_slice(&[0, 0, 0, 0]);
        self.source_port_identity.write_to(&mut out[20..30]);
        out[30..32].copy_from_slice(&self.sequence_id.to_be_bytes());
        out[32] = self.control_field;
        out[33] = self.log_message_interval as u8;
    }
}

/// Sync message body (header already stripped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncBody {
    pub origin_timestamp: PtpTimestamp,
}

impl SyncBody {
    pub fn parse(body: &[u8]) -> Option<Self> {
        Some(Self {
            origin_timestamp: PtpTimestamp::parse(&body[0..TIMESTAMP_BODY_LEN.min(body.len())])?,
        })
    }
}

/// Delay_Req message body (header already stripped). Decoding is kept
/// for completeness and tests even though this slave never receives a
/// Delay_Req (it only builds one, see [`build_delay_req`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayReqBody {
    pub origin_timestamp: PtpTimestamp,
}

impl DelayReqBody {
    pub fn parse(body: &[u8]) -> Option<Self> {
        Some(Self {
            origin_timestamp: PtpTimestamp::parse(&body[0..TIMESTAMP_BODY_LEN.min(body.len())])?,
        })
    }
}

/// Delay_Resp message body (header already stripped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayRespBody {
    pub receive_timestamp: PtpTimestamp,
    pub requesting_port_identity: PortIdentity,
}

impl DelayRespBody {
    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.len() < DELAY_RESP_BODY_LEN {
            return None;
        }
        Some(Self {
            receive_timestamp: PtpTimestamp::parse(&body[0..10])?,
            requesting_port_identity: PortIdentity::parse(&body[10..20])?,
        })
    }
}

/// A PTP frame classified and parsed out of an Ethernet payload
/// (spec.md §4.1 framing rules).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtpFrame<'a> {
    /// `None` for an untagged frame.
    pub vlan_id: Option<u16>,
    pub header: PtpHeader,
    /// Bytes following the 34-octet common header.
    pub body: &'a [u8],
}

impl<'a> PtpFrame<'a> {
    /// Classify and parse a raw Ethernet frame. Returns `None` if the
    /// frame is not PTP, is malformed, or is too short for the body
    /// its header declares.
    pub fn parse(frame: &'a [u8]) -> Option<Self> {
        if frame.len() < ETH_HEADER_LEN + 2 {
            return None;
        }
        let outer_ethertype = u16::from_be_bytes([frame[12], frame[13]]);

        let (vlan_id, header_offset) = if outer_ethertype == PTP_ETHERTYPE {
            (None, ETH_HEADER_LEN)
        } else if outer_ethertype == VLAN_ETHERTYPE {
            if frame.len() < ETH_HEADER_LEN + VLAN_TAG_LEN {
                return None;
            }
            let tci = u16::from_be_bytes([frame[14], frame[15]]);
            let inner_ethertype = u16::from_be_bytes([frame[16], frame[17]]);
            if inner_ethertype != PTP_ETHERTYPE {
                return None;
            }
            (Some(tci & 0x0FFF), ETH_HEADER_LEN + VLAN_TAG_LEN)
        } else {
            return None;
        };

        let header = PtpHeader::parse(&frame[header_offset..])?;
        let body = &frame[header_offset + HEADER_LEN..];

        let min_body_len = match header.message_type {
            PtpMessageType::Sync | PtpMessageType::DelayReq | PtpMessageType::FollowUp => {
                TIMESTAMP_BODY_LEN
            }
            PtpMessageType::DelayResp => DELAY_RESP_BODY_LEN,
            PtpMessageType::Announce | PtpMessageType::Other(_) => 0,
        };
        if body.len() < min_body_len {
            return None;
        }

        Some(Self {
            vlan_id,
            header,
            body,
        })
    }

    /// Decode `body` according to `header.message_type` into a single
    /// sum type, so a caller that only wants "what is this" doesn't
    /// have to match on `message_type` and call the right body parser
    /// itself. Convenience entry point in the spirit of
    /// `bass-ptp/src/messages.rs`'s `PtpMessage`; `worker::dispatch`
    /// matches on `message_type` directly instead, since it needs to
    /// route Sync/Delay_Resp to different `Session` methods anyway.
    pub fn decode(&self) -> Option<PtpMessage> {
        match self.header.message_type {
            PtpMessageType::Sync => SyncBody::parse(self.body).map(PtpMessage::Sync),
            PtpMessageType::DelayReq => DelayReqBody::parse(self.body).map(PtpMessage::DelayReq),
            PtpMessageType::DelayResp => {
                DelayRespBody::parse(self.body).map(PtpMessage::DelayResp)
            }
            PtpMessageType::FollowUp => Some(PtpMessage::FollowUp),
            PtpMessageType::Announce => Some(PtpMessage::Announce),
            PtpMessageType::Other(code) => Some(PtpMessage::Other(code)),
        }
    }
}

/// Sum of the message bodies this deployment ever decodes. Follow_Up
/// and Announce carry no fields this core acts on (one-step only, no
/// BMCA — spec.md §1 non-goals), so they decode to unit variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtpMessage {
    Sync(SyncBody),
    DelayReq(DelayReqBody),
    DelayResp(DelayRespBody),
    FollowUp,
    Announce,
    Other(u8),
}

/// Build a one-step Delay_Req frame per the master-compat profile
/// (spec.md §4.1 encode rules, §4.7 emission steps).
///
/// Returns the full Ethernet + 802.1Q + PTP frame:
/// `14 + 4 + padded_len` octets, with the semantic 44 octets of PTP
/// content at the front of the padded region and the rest zeroed.
pub fn build_delay_req(
    source_port: PortIdentity,
    tx_vlan: u16,
    tx_vl_idx: u16,
    domain: u8,
    sequence_id: u16,
    padded_len: usize,
) -> Vec<u8> {
    let frame_len = ETH_HEADER_LEN + VLAN_TAG_LEN + padded_len;
    let mut frame = vec![0u8; frame_len];

    frame[0] = 0x03;
    frame[1] = 0x00;
    frame[2] = 0x00;
    frame[3] = 0x00;
    frame[4..6].copy_from_slice(&tx_vl_idx.to_be_bytes());

    frame[6..12].copy_from_slice(&DELAY_REQ_SRC_MAC);

    frame[12..14].copy_from_slice(&VLAN_ETHERTYPE.to_be_bytes());
    let tci = tx_vlan & 0x0FFF;
    frame[14..16].copy_from_slice(&tci.to_be_bytes());
    frame[16..18].copy_from_slice(&PTP_ETHERTYPE.to_be_bytes());

    let header = PtpHeader {
        message_type: PtpMessageType::DelayReq,
        version: 2,
        message_length: padded_len as u16,
        domain_number: domain,
        flags: DELAY_REQ_FLAGS,
        correction_field: 0,
        source_port_identity: source_port,
        sequence_id,
        control_field: CONTROL_DELAY_REQ,
        log_message_interval: DELAY_REQ_LOG_INTERVAL,
    };
    let header_start = ETH_HEADER_LEN + VLAN_TAG_LEN;
    header.write_to(&mut frame[header_start..header_start + HEADER_LEN]);

    // Origin timestamp left zero (the slave does not trust wire-encoded
    // timestamps for its own TX); remaining padding stays zero.
    let _ = PtpTimestamp::default();

    frame
}
