//! Classification of radio output into the frames the engine reacts to.

use crate::error::FrameError;
use crate::protocol::address::{NetworkAddress16, NetworkAddress64};
use crate::protocol::api::{ApiFrame, LocalFrame, TxStatus};
use crate::protocol::zcl::ZclFrame;
use crate::protocol::zdo::{ManagementFrame, ZDO_ENDPOINT, ZDO_PROFILE};

/// Source addressing of a received explicit frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Source {
    pub addr64: NetworkAddress64,
    pub addr16: NetworkAddress16,
    pub endpoint: u8,
}

/// A decoded frame produced by the radio.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Device management exchange.
    Management {
        source: Source,
        frame: ManagementFrame,
    },
    /// Application exchange.
    Application {
        source: Source,
        profile_id: u16,
        cluster_id: u16,
        frame: ZclFrame,
    },
    LocalResponse(LocalFrame),
    TxStatus(TxStatus),
    ModemStatus(u8),
}

impl InboundFrame {
    /// Decodes a link payload.
    ///
    /// Returns `Ok(None)` for host-to-radio frame types echoed back on the line.
    pub fn decode(payload: &[u8]) -> Result<Option<Self>, FrameError> {
        Self::from_api(ApiFrame::decode(payload)?)
    }

    /// Classifies a decoded API frame.
    pub fn from_api(frame: ApiFrame) -> Result<Option<Self>, FrameError> {
        Ok(Some(match frame {
            ApiFrame::LocalCommand(_) | ApiFrame::ExplicitTx(_) => return Ok(None),
            ApiFrame::LocalResponse(local) => Self::LocalResponse(local),
            ApiFrame::TxStatus(status) => Self::TxStatus(status),
            ApiFrame::ModemStatus(status) => Self::ModemStatus(status),
            ApiFrame::ExplicitRx(rx) => {
                let source = Source {
                    addr64: rx.addr64,
                    addr16: rx.addr16,
                    endpoint: rx.source_endpoint,
                };
                if rx.profile_id == ZDO_PROFILE && rx.destination_endpoint == ZDO_ENDPOINT {
                    Self::Management {
                        source,
                        frame: ManagementFrame::decode(rx.cluster_id, &rx.payload)?,
                    }
                } else {
                    Self::Application {
                        source,
                        profile_id: rx.profile_id,
                        cluster_id: rx.cluster_id,
                        frame: ZclFrame::decode(&rx.payload)?,
                    }
                }
            }
        }))
    }

    /// Returns the sender's 64-bit address for frames that carry one.
    #[must_use]
    pub const fn source(&self) -> Option<&Source> {
        match self {
            Self::Management { source, .. } | Self::Application { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Returns false when the frame carries a failure status.
    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            Self::Management { frame, .. } => frame.message.status().is_none_or(|s| s == 0),
            Self::Application { frame, .. } => frame.is_success(),
            Self::LocalResponse(local) => local.status == 0,
            Self::TxStatus(status) => status.delivery_status == 0,
            Self::ModemStatus(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::protocol::api::ExplicitFrame;
    use crate::protocol::zcl::{ZclCommand, status};
    use crate::protocol::zdo::ZdoMessage;

    fn rx(profile_id: u16, destination_endpoint: u8, cluster_id: u16, payload: &[u8]) -> ApiFrame {
        ApiFrame::ExplicitRx(ExplicitFrame {
            frame_id: 0,
            addr64: NetworkAddress64::new(0x0013_A200_4052_1F3B),
            addr16: NetworkAddress16::new(0x1A2B),
            source_endpoint: if destination_endpoint == 0 { 0 } else { 1 },
            destination_endpoint,
            cluster_id,
            profile_id,
            radius: 0,
            options: 0,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    #[test]
    fn test_management_classification() {
        let frame = InboundFrame::from_api(rx(0, 0, 0x8021, &[0x04, 0x84])).unwrap().unwrap();
        let InboundFrame::Management { frame, source } = &frame else {
            panic!("expected management frame");
        };
        assert_eq!(frame.tsn, 4);
        assert_eq!(frame.message, ZdoMessage::BindResponse { status: 0x84 });
        assert_eq!(source.addr16, NetworkAddress16::new(0x1A2B));
    }

    #[test]
    fn test_failed_bind_is_not_success() {
        let frame = InboundFrame::from_api(rx(0, 0, 0x8021, &[0x04, 0x84])).unwrap().unwrap();
        assert!(!frame.is_success());
    }

    #[test]
    fn test_application_classification() {
        let payload = [0x18, 0x03, 0x0B, 0x01, status::SUCCESS];
        let frame = InboundFrame::from_api(rx(0x0104, 1, 0x0006, &payload)).unwrap().unwrap();
        let InboundFrame::Application { cluster_id, frame, .. } = &frame else {
            panic!("expected application frame");
        };
        assert_eq!(*cluster_id, 0x0006);
        assert_eq!(
            frame.command,
            ZclCommand::DefaultResponse {
                command_id: 0x01,
                status: 0
            }
        );
    }

    #[test]
    fn test_echoed_transmit_is_ignored() {
        let local = ApiFrame::LocalCommand(LocalFrame {
            frame_id: 1,
            command: *b"EU",
            status: 0,
            data: Bytes::new(),
        });
        assert_eq!(InboundFrame::from_api(local).unwrap(), None);
    }

    #[test]
    fn test_unknown_management_kind_propagates() {
        assert!(matches!(
            InboundFrame::from_api(rx(0, 0, 0x8099, &[0x01, 0x00])),
            Err(FrameError::UnknownManagementKind { cluster: 0x8099, .. })
        ));
    }
}
