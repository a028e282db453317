//! Property-based tests for ivy
//!
//! Uses proptest to verify invariants across large input spaces.

use proptest::prelude::*;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime")
        .block_on(future)
}

// ============================================================================
// Framing Properties
// ============================================================================

mod frame_properties {
    use super::*;
    use ivy_core::frame::{LENGTH_PREFIX_SIZE, read_frame, write_frame};
    use ivy_core::{Error, FramingError};

    const MAX: usize = 4096;

    proptest! {
        /// Any payload within the limit comes back byte for byte
        #[test]
        fn frame_roundtrip(payload in prop::collection::vec(any::<u8>(), 0..MAX)) {
            let mut wire = Vec::new();
            block_on(write_frame(&mut wire, &payload, MAX)).unwrap();

            prop_assert_eq!(wire.len(), LENGTH_PREFIX_SIZE + payload.len());
            prop_assert_eq!(&wire[..LENGTH_PREFIX_SIZE], &(payload.len() as u64).to_le_bytes()[..]);

            let mut reader = &wire[..];
            let decoded = block_on(read_frame(&mut reader, MAX)).unwrap();
            prop_assert_eq!(decoded, payload);
            prop_assert!(reader.is_empty());
        }

        /// Consecutive frames never bleed into each other
        #[test]
        fn frames_stay_delimited(
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..16),
        ) {
            let mut wire = Vec::new();
            for payload in &payloads {
                block_on(write_frame(&mut wire, payload, MAX)).unwrap();
            }

            let mut reader = &wire[..];
            for payload in &payloads {
                let decoded = block_on(read_frame(&mut reader, MAX)).unwrap();
                prop_assert_eq!(&decoded, payload);
            }
            prop_assert!(matches!(block_on(read_frame(&mut reader, MAX)), Err(Error::Closed)));
        }

        /// Cutting a frame anywhere short of its end is reported as truncation
        #[test]
        fn truncated_frame_rejected(
            payload in prop::collection::vec(any::<u8>(), 1..256),
            cut in any::<prop::sample::Index>(),
        ) {
            let mut wire = Vec::new();
            block_on(write_frame(&mut wire, &payload, MAX)).unwrap();

            // 1..len keeps at least one byte, so this is never a clean close
            let end = 1 + cut.index(wire.len() - 1);
            let mut reader = &wire[..end];
            let result = block_on(read_frame(&mut reader, MAX));
            prop_assert!(
                matches!(result, Err(Error::Framing(FramingError::Truncated { .. }))),
                "unexpected result: {:?}",
                result
            );
        }

        /// Declared lengths above the limit are refused
        #[test]
        fn oversized_length_rejected(len in (MAX as u64 + 1)..u64::MAX) {
            let wire = len.to_le_bytes();
            let mut reader = &wire[..];
            let rejected = matches!(
                block_on(read_frame(&mut reader, MAX)),
                Err(Error::Framing(FramingError::FrameTooLarge { .. }))
            );
            prop_assert!(rejected);
        }
    }
}

// ============================================================================
// Wire Codec Properties
// ============================================================================

mod codec_properties {
    use super::*;
    use ivy_core::{EncryptedPayload, HandshakeMessage, PeerMessage, WireMessage};

    fn wire_message() -> impl Strategy<Value = WireMessage> {
        let bytes = || prop::collection::vec(any::<u8>(), 0..96);
        prop_oneof![
            (bytes(), bytes(), bytes()).prop_map(|(signing, transport, signature)| {
                WireMessage::Handshake(HandshakeMessage {
                    signing_public_key: signing,
                    transport_public_key: transport,
                    signature,
                })
            }),
            bytes().prop_map(|ciphertext| WireMessage::Encrypted(EncryptedPayload { ciphertext })),
        ]
    }

    proptest! {
        /// Wire messages survive encode/decode unchanged
        #[test]
        fn wire_message_roundtrip(message in wire_message()) {
            let encoded = message.encode().unwrap();
            let decoded = WireMessage::decode(&encoded, encoded.len()).unwrap();
            prop_assert_eq!(decoded, message);
        }

        /// Trailing garbage after a message is refused
        #[test]
        fn trailing_bytes_rejected(message in wire_message(), extra in 1usize..8) {
            let mut encoded = message.encode().unwrap();
            encoded.extend(std::iter::repeat_n(0u8, extra));
            prop_assert!(WireMessage::decode(&encoded, encoded.len()).is_err());
        }

        /// Decoding arbitrary bytes returns an error instead of panicking
        #[test]
        fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
            let _ = WireMessage::decode(&bytes, 512);
        }

        /// Text payloads of any content survive the session encoding
        #[test]
        fn peer_text_roundtrip(text in ".*") {
            let message = PeerMessage::Text(text);
            let encoded = message.encode().unwrap();
            let decoded = PeerMessage::decode(&encoded, encoded.len()).unwrap();
            prop_assert_eq!(decoded, message);

            // One byte short of the encoding is over the limit
            prop_assert!(PeerMessage::decode(&encoded, encoded.len() - 1).is_err());
        }
    }
}

// ============================================================================
// Session Cipher Properties
// ============================================================================

mod cipher_properties {
    use super::*;
    use ivy_crypto::session::{Direction, SessionCipher};

    fn pair(key: [u8; 32]) -> (SessionCipher, SessionCipher) {
        (
            SessionCipher::from_key(key, Direction::InitiatorToResponder),
            SessionCipher::from_key(key, Direction::ResponderToInitiator),
        )
    }

    proptest! {
        /// Sealed messages open on the other side in order
        #[test]
        fn seal_open_in_order(
            key in any::<[u8; 32]>(),
            messages in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..128), 1..8),
        ) {
            let (mut initiator, mut responder) = pair(key);
            for message in &messages {
                let sealed = initiator.seal(message).unwrap();
                prop_assert_eq!(&responder.open(&sealed).unwrap(), message);
            }
        }

        /// Flipping any single bit makes the ciphertext unopenable
        #[test]
        fn bit_flip_rejected(
            key in any::<[u8; 32]>(),
            plaintext in prop::collection::vec(any::<u8>(), 0..128),
            position in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let (mut initiator, mut responder) = pair(key);
            let mut sealed = initiator.seal(&plaintext).unwrap();

            let index = position.index(sealed.len());
            sealed[index] ^= 1 << bit;

            prop_assert!(responder.open(&sealed).is_err());
        }
    }
}

// ============================================================================
// Identity Properties
// ============================================================================

mod identity_properties {
    use super::*;
    use ivy_core::{Identity, PeerId};
    use ivy_crypto::signatures::SigningKey;

    proptest! {
        /// The same key always yields the same peer ID, and it parses back
        #[test]
        fn peer_id_deterministic(seed in any::<[u8; 32]>()) {
            let first = Identity::from_signing_key(SigningKey::from_bytes(&seed));
            let second = Identity::from_signing_key(SigningKey::from_bytes(&seed));

            prop_assert_eq!(first.peer_id(), second.peer_id());
            // Standard base64 of 32 bytes, padded
            prop_assert_eq!(first.peer_id().as_str().len(), 44);
            prop_assert_eq!(PeerId::parse(first.peer_id().as_str()).unwrap(), first.peer_id());
        }

        /// Distinct keys yield distinct peer IDs
        #[test]
        fn peer_id_distinct(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            prop_assume!(a != b);
            let first = Identity::from_signing_key(SigningKey::from_bytes(&a));
            let second = Identity::from_signing_key(SigningKey::from_bytes(&b));
            prop_assert_ne!(first.peer_id(), second.peer_id());
        }
    }
}
