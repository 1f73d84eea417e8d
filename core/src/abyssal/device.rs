//! Download driver.
//!
//! A session is IDENTIFY, DIRECTORY, then one READ per page of every dive,
//! newest dive first. Nothing is retried here; the first failure ends the
//! enumeration.

use chrono::Utc;
use log::{debug, error, warn};

use crate::abyssal::layout::MIN_RECORD_SIZE;
use crate::abyssal::protocol::{
    encode_frame, parse_directory, parse_frame_header, verify_frame, DirEntry, FrameHeader,
    Identity, ReadRequest, CMD_DIRECTORY, CMD_IDENTIFY, CMD_READ, CRC_LEN, HEADER_LEN, NAK,
    REPLY,
};
use crate::abyssal::{MAX_DIVE_SIZE, PAGE_SIZE, TIMEOUT};
use crate::checksum;
use crate::error::{DiveError, Result};
use crate::models::{DeviceEvent, DiveRecord, FINGERPRINT_SIZE};
use crate::transport::{SerialConfig, Transport, TransportError};

pub type EventHandler = Box<dyn FnMut(&DeviceEvent)>;

fn io_error(action: &'static str) -> impl FnOnce(TransportError) -> DiveError {
    move |err| {
        error!("Failed to {action}: {err}");
        DiveError::Io(err)
    }
}

pub struct AbyssalDevice<T: Transport> {
    transport: T,
    fingerprint: [u8; FINGERPRINT_SIZE],
    events: Option<EventHandler>,
}

impl<T: Transport> AbyssalDevice<T> {
    /// Configure the transport for 115200 8N1 with a 3000 ms timeout.
    ///
    /// Pass `&mut transport` to keep the transport when opening fails.
    pub fn open(mut transport: T) -> Result<Self> {
        let config = SerialConfig::DEFAULT_115200_8N1;
        transport.configure(&config).map_err(|err| {
            error!("Failed to set the terminal attributes: {err}");
            DiveError::Configure(err)
        })?;
        transport.set_timeout(TIMEOUT).map_err(|err| {
            error!("Failed to set the timeout: {err}");
            DiveError::Configure(err)
        })?;
        debug!(
            "opened transport at {} baud, timeout {} ms",
            config.baud_rate,
            TIMEOUT.as_millis()
        );

        Ok(Self {
            transport,
            fingerprint: [0; FINGERPRINT_SIZE],
            events: None,
        })
    }

    /// Install (4 bytes) or clear (empty slice) the deduplication filter.
    pub fn set_fingerprint(&mut self, data: &[u8]) -> Result<()> {
        match data.len() {
            0 => self.fingerprint = [0; FINGERPRINT_SIZE],
            FINGERPRINT_SIZE => self.fingerprint.copy_from_slice(data),
            n => {
                return Err(DiveError::InvalidArgs(format!(
                    "fingerprint must be 0 or {FINGERPRINT_SIZE} bytes, got {n}"
                )))
            }
        }
        debug!("fingerprint set to {:02x?}", self.fingerprint);
        Ok(())
    }

    pub fn fingerprint(&self) -> [u8; FINGERPRINT_SIZE] {
        self.fingerprint
    }

    pub fn set_event_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&DeviceEvent) + 'static,
    {
        self.events = Some(Box::new(handler));
    }

    fn emit(&mut self, event: DeviceEvent) {
        if let Some(handler) = self.events.as_mut() {
            handler(&event);
        }
    }

    /// Hand the transport back. It is not closed.
    pub fn close(self) -> T {
        self.transport
    }

    fn is_known(&self, leading: &[u8]) -> bool {
        self.fingerprint != [0; FINGERPRINT_SIZE] && leading == self.fingerprint
    }

    /// Send one command and return the verified reply payload.
    fn transfer(&mut self, cmd: u8, payload: &[u8]) -> Result<Vec<u8>> {
        self.transport
            .write(&encode_frame(cmd, payload))
            .map_err(io_error("send the command"))?;

        let mut header = [0u8; HEADER_LEN];
        self.transport
            .read(&mut header)
            .map_err(io_error("receive the reply header"))?;
        let FrameHeader { cmd: reply, len } = parse_frame_header(&header)?;

        let mut body = vec![0u8; len + CRC_LEN];
        self.transport
            .read(&mut body)
            .map_err(io_error("receive the reply"))?;
        let data = verify_frame(&header, &body).inspect_err(|err| {
            error!("Corrupt reply to command 0x{cmd:02x}: {err}");
        })?;

        if reply == NAK {
            let code = data.first().copied().unwrap_or(0);
            error!("Command 0x{cmd:02x} rejected with code {code}");
            return Err(DiveError::Nak { command: cmd, code });
        }
        if reply != cmd | REPLY {
            return Err(DiveError::data_format(format!(
                "unexpected reply 0x{reply:02x} to command 0x{cmd:02x}"
            )));
        }
        Ok(data.to_vec())
    }

    fn identify(&mut self) -> Result<Identity> {
        let identity = Identity::parse(&self.transfer(CMD_IDENTIFY, &[])?)?;
        debug!(
            "model {} firmware {:#06x} serial {}",
            identity.model, identity.firmware, identity.serial
        );
        self.emit(DeviceEvent::DevInfo {
            model: u32::from(identity.model),
            firmware: u32::from(identity.firmware),
            serial: identity.serial,
        });
        self.emit(DeviceEvent::Clock {
            devtime: identity.clock,
            systime: Utc::now().timestamp(),
        });
        Ok(identity)
    }

    /// In-use directory entries, oldest first.
    fn directory(&mut self) -> Result<Vec<DirEntry>> {
        let entries = parse_directory(&self.transfer(CMD_DIRECTORY, &[])?)?;
        let mut dives = Vec::with_capacity(entries.len());
        for entry in entries {
            if !entry.in_use {
                warn!("skipping free directory slot {}", entry.id);
                continue;
            }
            let length = entry.length as usize;
            if !(MIN_RECORD_SIZE..=MAX_DIVE_SIZE).contains(&length) {
                error!("Dive {} has an invalid length of {length} bytes", entry.id);
                return Err(DiveError::data_format(format!(
                    "dive {} has an invalid length of {length} bytes",
                    entry.id
                )));
            }
            dives.push(entry);
        }
        debug!("directory lists {} dives", dives.len());
        Ok(dives)
    }

    /// Download one dive. `None` means its fingerprint matched and the
    /// rest of the dive was not transferred.
    fn download(
        &mut self,
        entry: &DirEntry,
        progress: &mut (u32, u32),
    ) -> Result<Option<DiveRecord>> {
        let length = entry.length as usize;
        let mut data = Vec::new();
        data.try_reserve_exact(length).map_err(|_| {
            error!("Failed to allocate memory.");
            DiveError::NoMemory(length)
        })?;

        while data.len() < length {
            let size = PAGE_SIZE.min(length - data.len());
            let request = ReadRequest {
                id: entry.id,
                offset: data.len() as u32,
                size: size as u16,
            };
            let page = self.transfer(CMD_READ, &request.encode())?;
            if page.len() != size {
                return Err(DiveError::data_format(format!(
                    "asked for {size} bytes of dive {}, got {}",
                    entry.id,
                    page.len()
                )));
            }
            let first_page = data.is_empty();
            data.extend_from_slice(&page);

            progress.0 = progress.0.saturating_add(size as u32);
            self.emit(DeviceEvent::Progress {
                current: progress.0,
                maximum: progress.1,
            });

            if first_page && self.is_known(&data[..FINGERPRINT_SIZE]) {
                debug!("dive {} matches the fingerprint", entry.id);
                return Ok(None);
            }
        }

        checksum::verify_crc16_trailer(&data).inspect_err(|_| {
            error!("Dive {} failed its checksum", entry.id);
        })?;
        debug!("downloaded dive {} ({length} bytes)", entry.id);
        Ok(Some(DiveRecord::new(data)))
    }

    /// Download every dive newer than the fingerprint, newest first.
    ///
    /// Returning `false` from `callback` ends the enumeration successfully.
    pub fn foreach<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(DiveRecord) -> bool,
    {
        self.identify()?;
        let dives = self.directory()?;

        let maximum = dives
            .iter()
            .fold(0u32, |acc, entry| acc.saturating_add(entry.length));
        let mut progress = (0u32, maximum);
        self.emit(DeviceEvent::Progress {
            current: 0,
            maximum,
        });

        for entry in dives.iter().rev() {
            let Some(record) = self.download(entry, &mut progress)? else {
                break;
            };
            if !callback(record) {
                debug!("enumeration stopped by the caller");
                return Ok(());
            }
        }

        self.emit(DeviceEvent::Progress {
            current: maximum,
            maximum,
        });
        Ok(())
    }
}
