//! The generalized-incentives message envelope.
//!
//! `context:1 | messageIdentifier:32 | sourceApplication:65 | body…` where the
//! context byte selects the body layout. Any other context byte is a hard
//! parse error.

use {
    super::{read_u64_be, Bytes65, PayloadError},
    crate::domain::eth::H256,
};

pub const CONTEXT_SOURCE_TO_DESTINATION: u8 = 0x00;
pub const CONTEXT_DESTINATION_TO_SOURCE: u8 = 0x01;

const MESSAGE_IDENTIFIER_START: usize = 1;
const SOURCE_APPLICATION_START: usize = 33;
const BODY_START: usize = 98;

#[derive(Clone, Debug, PartialEq)]
pub struct IncentivesEnvelope {
    pub message_identifier: H256,
    pub source_application: Bytes65,
    pub message: IncentivesMessage,
}

#[derive(Clone, Debug, PartialEq)]
pub enum IncentivesMessage {
    /// A message travelling from the source chain to the destination chain.
    SourceToDestination {
        to_application: Bytes65,
        /// Maximum gas the relayer commits to for delivery (6 bytes).
        max_gas: u64,
        message: Vec<u8>,
    },
    /// The ack travelling back. Parsed for completeness; the underwriter
    /// core does not consume its fields.
    DestinationToSource {
        relayer_recipient: H256,
        gas_spent: u64,
        execution_time: u64,
        message: Vec<u8>,
    },
}

pub fn parse(raw: &[u8]) -> Result<IncentivesEnvelope, PayloadError> {
    if raw.len() < BODY_START {
        return Err(PayloadError::TooShort {
            expected: BODY_START,
            got: raw.len(),
        });
    }
    let message_identifier = H256::from_slice(&raw[MESSAGE_IDENTIFIER_START..SOURCE_APPLICATION_START]);
    let source_application = Bytes65::from_slice(&raw[SOURCE_APPLICATION_START..BODY_START])?;
    let body = &raw[BODY_START..];

    let message = match raw[0] {
        CONTEXT_SOURCE_TO_DESTINATION => {
            const TO_APPLICATION_LEN: usize = 65;
            const MAX_GAS_LEN: usize = 6;
            if body.len() < TO_APPLICATION_LEN + MAX_GAS_LEN {
                return Err(PayloadError::TooShort {
                    expected: BODY_START + TO_APPLICATION_LEN + MAX_GAS_LEN,
                    got: raw.len(),
                });
            }
            IncentivesMessage::SourceToDestination {
                to_application: Bytes65::from_slice(&body[..TO_APPLICATION_LEN])?,
                max_gas: read_u64_be(&body[TO_APPLICATION_LEN..TO_APPLICATION_LEN + MAX_GAS_LEN]),
                message: body[TO_APPLICATION_LEN + MAX_GAS_LEN..].to_vec(),
            }
        }
        CONTEXT_DESTINATION_TO_SOURCE => {
            const RECIPIENT_LEN: usize = 32;
            const GAS_SPENT_LEN: usize = 6;
            const EXECUTION_TIME_LEN: usize = 8;
            const FIXED: usize = RECIPIENT_LEN + GAS_SPENT_LEN + EXECUTION_TIME_LEN;
            if body.len() < FIXED {
                return Err(PayloadError::TooShort {
                    expected: BODY_START + FIXED,
                    got: raw.len(),
                });
            }
            IncentivesMessage::DestinationToSource {
                relayer_recipient: H256::from_slice(&body[..RECIPIENT_LEN]),
                gas_spent: read_u64_be(&body[RECIPIENT_LEN..RECIPIENT_LEN + GAS_SPENT_LEN]),
                execution_time: read_u64_be(
                    &body[RECIPIENT_LEN + GAS_SPENT_LEN..FIXED],
                ),
                message: body[FIXED..].to_vec(),
            }
        }
        context => return Err(PayloadError::UnknownContext(context)),
    };

    Ok(IncentivesEnvelope {
        message_identifier,
        source_application,
        message,
    })
}

/// Encodes a source-to-destination envelope. The counterpart of [`parse`],
/// used to produce wire fixtures.
pub fn encode_source_to_destination(
    message_identifier: H256,
    source_application: &Bytes65,
    to_application: &Bytes65,
    max_gas: u64,
    message: &[u8],
) -> Vec<u8> {
    let mut raw = Vec::with_capacity(BODY_START + 65 + 6 + message.len());
    raw.push(CONTEXT_SOURCE_TO_DESTINATION);
    raw.extend_from_slice(message_identifier.as_bytes());
    raw.extend_from_slice(source_application.as_bytes());
    raw.extend_from_slice(to_application.as_bytes());
    raw.extend_from_slice(&max_gas.to_be_bytes()[2..]);
    raw.extend_from_slice(message);
    raw
}

#[cfg(test)]
mod tests {
    use {super::*, crate::domain::eth::Address};

    #[test]
    fn round_trips_source_to_destination() {
        let identifier = H256::repeat_byte(0x42);
        let source = Bytes65::from_evm_address(Address::repeat_byte(0x01));
        let target = Bytes65::from_evm_address(Address::repeat_byte(0x02));
        let body = vec![0xaa, 0xbb, 0xcc];

        let raw = encode_source_to_destination(identifier, &source, &target, 300_000, &body);
        let envelope = parse(&raw).unwrap();

        assert_eq!(envelope.message_identifier, identifier);
        assert_eq!(envelope.source_application, source);
        assert_eq!(
            envelope.message,
            IncentivesMessage::SourceToDestination {
                to_application: target,
                max_gas: 300_000,
                message: body,
            }
        );
    }

    #[test]
    fn parses_destination_to_source() {
        let mut raw = vec![CONTEXT_DESTINATION_TO_SOURCE];
        raw.extend_from_slice(H256::repeat_byte(0x42).as_bytes());
        raw.extend_from_slice(Bytes65::from_evm_address(Address::repeat_byte(0x01)).as_bytes());
        raw.extend_from_slice(H256::repeat_byte(0x07).as_bytes());
        raw.extend_from_slice(&[0, 0, 0, 1, 0, 0]); // gasSpent = 65536
        raw.extend_from_slice(&2_000_u64.to_be_bytes());
        raw.extend_from_slice(&[0xff]);

        let envelope = parse(&raw).unwrap();
        assert_eq!(
            envelope.message,
            IncentivesMessage::DestinationToSource {
                relayer_recipient: H256::repeat_byte(0x07),
                gas_spent: 65_536,
                execution_time: 2_000,
                message: vec![0xff],
            }
        );
    }

    #[test]
    fn rejects_unknown_context() {
        let mut raw = vec![0x02];
        raw.resize(200, 0);
        assert_eq!(parse(&raw), Err(PayloadError::UnknownContext(0x02)));
    }

    #[test]
    fn rejects_truncated_envelope() {
        assert!(matches!(
            parse(&[0x00; 64]),
            Err(PayloadError::TooShort { .. })
        ));
    }
}
