use std::collections::VecDeque;
use std::time::Duration;

use crate::abyssal::layout::{RawSample, RawTank, RecordBuilder};
use crate::abyssal::protocol::{
    encode_directory, encode_frame, parse_frame_header, verify_frame, DirEntry, Identity,
    ReadRequest, CMD_DIRECTORY, CMD_IDENTIFY, CMD_READ, HEADER_LEN, NAK, REPLY,
};
use crate::transport::{SerialConfig, Transport, TransportError};

const NAK_BAD_FRAME: u8 = 1;
const NAK_BAD_RANGE: u8 = 2;
const NAK_UNKNOWN: u8 = 3;
const NAK_REQUESTED: u8 = 4;

#[derive(Clone, Debug)]
pub struct MockDive {
    pub id: u16,
    pub data: Vec<u8>,
    pub in_use: bool,
}

/// A scripted Abyssal instrument. Each `write` must carry one complete
/// command packet; the reply is queued for the following reads.
#[derive(Clone, Debug)]
pub struct MockTransport {
    pub identity: Identity,
    /// Directory order, oldest first.
    pub dives: Vec<MockDive>,
    pub config: Option<SerialConfig>,
    pub timeout: Option<Duration>,
    pub reject_configure: bool,
    /// Never answer READ requests for this dive.
    pub timeout_on_dive: Option<u16>,
    /// Serve this dive with its last byte flipped.
    pub corrupt_dive: Option<u16>,
    /// Answer this command with a NAK.
    pub nak_command: Option<u8>,
    /// Serve this payload instead of the real directory.
    pub directory_override: Option<Vec<u8>>,
    /// Every READ request received, in order.
    pub reads: Vec<ReadRequest>,
    pending: VecDeque<u8>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            identity: Identity {
                model: 1,
                firmware: 0x0104,
                serial: 40_512,
                clock: 820_000_000,
            },
            dives: Vec::new(),
            config: None,
            timeout: None,
            reject_configure: false,
            timeout_on_dive: None,
            corrupt_dive: None,
            nak_command: None,
            directory_override: None,
            reads: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// Three logged dives, oldest first, followed by a free slot.
    pub fn with_sample_data() -> Self {
        let mut mock = Self::new();

        let mut reef = RecordBuilder::new(805_000_000);
        reef.divetime(2_700)
            .depths(1_420, 910)
            .temperatures(262, 281)
            .atmospheric(1_012)
            .interval(30)
            .gasmix(21, 0, 0);
        for depth in [300, 900, 1_420, 1_100, 800, 500, 300] {
            reef.sample(RawSample::new(depth, 265));
        }
        mock.push_dive(reef.build());

        let mut wreck = RecordBuilder::new(805_090_000);
        wreck
            .divetime(3_300)
            .depths(3_150, 2_210)
            .temperatures(171, 205)
            .deco_model(1, 0, 40, 85)
            .interval(20)
            .gasmix(28, 0, 0)
            .gasmix(50, 0, 0)
            .tank(RawTank {
                volume_dl: 240,
                work_pressure_bar: 232,
                begin_pressure_dbar: 2_200,
                end_pressure_dbar: 700,
                gasmix: 0,
                usage: 0,
            });
        for (i, depth) in [1_000, 2_500, 3_150, 3_000, 2_100, 600, 500].into_iter().enumerate() {
            let mut sample = RawSample::new(depth, 180);
            sample.pressure = Some((0, 2_200 - 200 * i as u16));
            if depth == 2_100 {
                sample.gasmix = Some(1);
            }
            if depth == 500 {
                sample.deco = Some((1, 500, 180));
            }
            wreck.sample(sample);
        }
        mock.push_dive(wreck.build());

        let mut trimix = RecordBuilder::new(805_400_000);
        trimix
            .divetime(4_800)
            .depths(6_200, 3_400)
            .temperatures(120, 190)
            .dive_mode(3)
            .deco_model(1, 1, 30, 70)
            .gasmix(10, 50, 2)
            .gasmix(100, 0, 1);
        for depth in [2_000, 6_200, 6_000, 2_100, 600] {
            let mut sample = RawSample::new(depth, 130);
            sample.ppo2_cbar = Some(130);
            sample.cns_percent = Some(20);
            trimix.sample(sample);
        }
        mock.push_dive(trimix.build());

        mock.dives.push(MockDive {
            id: 4,
            data: Vec::new(),
            in_use: false,
        });
        mock
    }

    /// Append a dive as the newest directory entry.
    pub fn push_dive(&mut self, data: Vec<u8>) -> u16 {
        let id = self.dives.iter().map(|d| d.id).max().unwrap_or(0) + 1;
        self.dives.push(MockDive {
            id,
            data,
            in_use: true,
        });
        id
    }

    fn reply(&mut self, cmd: u8, payload: &[u8]) {
        self.pending.extend(encode_frame(cmd | REPLY, payload));
    }

    fn nak(&mut self, code: u8) {
        self.pending.extend(encode_frame(NAK, &[code]));
    }

    fn handle(&mut self, cmd: u8, payload: &[u8]) {
        if self.nak_command == Some(cmd) {
            self.nak(NAK_REQUESTED);
            return;
        }
        match cmd {
            CMD_IDENTIFY => {
                let identity = self.identity.encode();
                self.reply(cmd, &identity);
            }
            CMD_DIRECTORY => {
                let directory = match &self.directory_override {
                    Some(payload) => payload.clone(),
                    None => {
                        let entries: Vec<DirEntry> = self
                            .dives
                            .iter()
                            .map(|d| DirEntry {
                                id: d.id,
                                length: d.data.len() as u32,
                                in_use: d.in_use,
                            })
                            .collect();
                        encode_directory(&entries)
                    }
                };
                self.reply(cmd, &directory);
            }
            CMD_READ => {
                let Ok(request) = ReadRequest::parse(payload) else {
                    self.nak(NAK_BAD_FRAME);
                    return;
                };
                self.reads.push(request);
                if self.timeout_on_dive == Some(request.id) {
                    return;
                }
                let Some(dive) = self.dives.iter().find(|d| d.id == request.id) else {
                    self.nak(NAK_BAD_RANGE);
                    return;
                };
                let start = request.offset as usize;
                let end = start + usize::from(request.size);
                if end > dive.data.len() {
                    self.nak(NAK_BAD_RANGE);
                    return;
                }
                let mut page = dive.data[start..end].to_vec();
                if self.corrupt_dive == Some(request.id) && end == dive.data.len() {
                    if let Some(last) = page.last_mut() {
                        *last ^= 0xFF;
                    }
                }
                self.reply(cmd, &page);
            }
            _ => self.nak(NAK_UNKNOWN),
        }
    }
}

impl Transport for MockTransport {
    fn configure(&mut self, config: &SerialConfig) -> Result<(), TransportError> {
        if self.reject_configure {
            return Err(TransportError::Rejected(format!(
                "{} baud not supported",
                config.baud_rate
            )));
        }
        self.config = Some(*config);
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.timeout = Some(timeout);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        if self.pending.len() < buf.len() {
            self.pending.clear();
            return Err(TransportError::Timeout);
        }
        let n = buf.len();
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *dst = src;
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if data.len() < HEADER_LEN {
            self.nak(NAK_BAD_FRAME);
            return Ok(());
        }
        let (header, body) = data.split_at(HEADER_LEN);
        let parsed = parse_frame_header(header).and_then(|h| {
            verify_frame(header, body).map(|payload| (h.cmd, payload.to_vec()))
        });
        match parsed {
            Ok((cmd, payload)) => self.handle(cmd, &payload),
            Err(_) => self.nak(NAK_BAD_FRAME),
        }
        Ok(())
    }
}
