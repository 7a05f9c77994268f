//! Shared event and subsession types

use eeplink_protocol::Destination;

/// The three communication styles a subsession can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubsessionStyle {
    Stream,
    Datagram,
    Raw,
}

impl SubsessionStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubsessionStyle::Stream => "STREAM",
            SubsessionStyle::Datagram => "DATAGRAM",
            SubsessionStyle::Raw => "RAW",
        }
    }
}

/// A received repliable datagram with its verified sender.
#[derive(Debug, Clone)]
pub struct ReceivedDatagram {
    pub source: Destination,
    pub from_port: u16,
    pub to_port: u16,
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_names() {
        assert_eq!(SubsessionStyle::Stream.as_str(), "STREAM");
        assert_eq!(SubsessionStyle::Datagram.as_str(), "DATAGRAM");
        assert_eq!(SubsessionStyle::Raw.as_str(), "RAW");
    }
}
