//! Construction-time dispatch over the supported dive computer families.

use chrono::NaiveDateTime;

use crate::abyssal::{AbyssalDevice, AbyssalParser, SampleIter as AbyssalSamples};
use crate::error::Result;
use crate::models::{DeviceEvent, DiveRecord, Field, FieldKind, Sample, FINGERPRINT_SIZE};
use crate::transport::Transport;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    Abyssal,
}

/// An open connection to an instrument of some [`Family`].
pub enum Device<T: Transport> {
    Abyssal(AbyssalDevice<T>),
}

impl<T: Transport> Device<T> {
    pub fn open(family: Family, transport: T) -> Result<Self> {
        match family {
            Family::Abyssal => AbyssalDevice::open(transport).map(Device::Abyssal),
        }
    }

    pub fn family(&self) -> Family {
        match self {
            Device::Abyssal(_) => Family::Abyssal,
        }
    }

    pub fn set_fingerprint(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Device::Abyssal(device) => device.set_fingerprint(data),
        }
    }

    pub fn fingerprint(&self) -> [u8; FINGERPRINT_SIZE] {
        match self {
            Device::Abyssal(device) => device.fingerprint(),
        }
    }

    pub fn set_event_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&DeviceEvent) + 'static,
    {
        match self {
            Device::Abyssal(device) => device.set_event_handler(handler),
        }
    }

    pub fn foreach<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(DiveRecord) -> bool,
    {
        match self {
            Device::Abyssal(device) => device.foreach(callback),
        }
    }

    pub fn close(self) -> T {
        match self {
            Device::Abyssal(device) => device.close(),
        }
    }
}

/// A decoder bound to one dive record of some [`Family`].
#[derive(Debug)]
pub enum Parser<'a> {
    Abyssal(AbyssalParser<'a>),
}

impl<'a> Parser<'a> {
    pub fn new(family: Family, data: &'a [u8]) -> Self {
        match family {
            Family::Abyssal => Parser::Abyssal(AbyssalParser::new(data)),
        }
    }

    pub fn family(&self) -> Family {
        match self {
            Parser::Abyssal(_) => Family::Abyssal,
        }
    }

    pub fn datetime(&self) -> Result<NaiveDateTime> {
        match self {
            Parser::Abyssal(parser) => parser.datetime(),
        }
    }

    pub fn field(&self, kind: FieldKind, index: u32) -> Result<Field> {
        match self {
            Parser::Abyssal(parser) => parser.field(kind, index),
        }
    }

    pub fn samples(&self) -> Samples<'a> {
        match self {
            Parser::Abyssal(parser) => Samples::Abyssal(parser.samples()),
        }
    }

    pub fn samples_foreach<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(&Sample),
    {
        match self {
            Parser::Abyssal(parser) => parser.samples_foreach(callback),
        }
    }
}

/// Sample iterator returned by [`Parser::samples`].
#[derive(Debug)]
pub enum Samples<'a> {
    Abyssal(AbyssalSamples<'a>),
}

impl Iterator for Samples<'_> {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Samples::Abyssal(samples) => samples.next(),
        }
    }
}
