//! Property-based tests for the contract codec.
//!
//! Verifies:
//! - Unsigned top-encoding is minimal and decodes back to the same value
//! - Signed top-encoding carries no redundant sign bytes
//! - Call data has one `@` segment per argument, all lowercase hex
//! - Nested struct payloads decode field-for-field and reject trailing bytes
//! - Decoding arbitrary bytes never panics

use proptest::prelude::*;

use ballot_core::codec::{
    Address, ContractCall, TypedValue, top_decode_biguint, top_decode_u16, top_decode_u64,
};
use ballot_core::contract::{Candidate, ElectionData, ElectionType, Vote};

// ────────────────────────────────────────────────────────────────────
// Strategies
// ────────────────────────────────────────────────────────────────────

fn arb_address() -> impl Strategy<Value = Address> {
    any::<[u8; 32]>().prop_map(Address)
}

fn arb_election_type() -> impl Strategy<Value = ElectionType> {
    prop_oneof![
        Just(ElectionType::Plurality),
        Just(ElectionType::Approval),
        Just(ElectionType::SingleTransferableVote),
    ]
}

fn arb_typed_value() -> impl Strategy<Value = TypedValue> {
    prop_oneof![
        any::<u64>().prop_map(TypedValue::U64),
        any::<u16>().prop_map(TypedValue::U16),
        any::<u128>().prop_map(TypedValue::BigUint),
        any::<i128>().prop_map(TypedValue::BigInt),
        "[a-zA-Z0-9 ]{0,24}".prop_map(TypedValue::Bytes),
        any::<bool>().prop_map(TypedValue::Bool),
        arb_address().prop_map(TypedValue::Address),
    ]
}

fn nested_buffer(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn encode_election(data: &ElectionData) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&data.id.to_be_bytes());
    nested_buffer(&mut out, data.name.as_bytes());
    nested_buffer(&mut out, data.description.as_bytes());
    out.extend_from_slice(&data.start_time.to_be_bytes());
    out.extend_from_slice(&data.end_time.to_be_bytes());
    out.push(data.election_type.discriminant());
    out.push(u8::from(data.ended));
    out.extend_from_slice(&data.admin.0);
    out
}

fn encode_candidate(candidate: &Candidate) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&candidate.id.to_be_bytes());
    nested_buffer(&mut out, candidate.name.as_bytes());
    nested_buffer(&mut out, candidate.description.as_bytes());
    out.extend_from_slice(&candidate.creator.0);
    out
}

prop_compose! {
    fn arb_election()(
        id in any::<u64>(),
        name in "[a-zA-Z ]{0,20}",
        description in "[a-zA-Z .,]{0,40}",
        start_time in any::<u64>(),
        end_time in any::<u64>(),
        election_type in arb_election_type(),
        ended in any::<bool>(),
        admin in arb_address(),
    ) -> ElectionData {
        ElectionData { id, name, description, start_time, end_time, election_type, ended, admin }
    }
}

prop_compose! {
    fn arb_candidate()(
        id in any::<u16>(),
        name in "[a-zA-Z ]{0,20}",
        description in "[a-zA-Z .,]{0,40}",
        creator in arb_address(),
    ) -> Candidate {
        Candidate { id, name, description, creator }
    }
}

// ────────────────────────────────────────────────────────────────────
// Top encoding
// ────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Unsigned values never start with a zero byte; zero is empty.
    #[test]
    fn prop_unsigned_encoding_is_minimal(v in any::<u128>()) {
        let bytes = TypedValue::BigUint(v).top_encode();
        if v == 0 {
            prop_assert!(bytes.is_empty());
        } else {
            prop_assert_ne!(bytes[0], 0);
        }
        prop_assert_eq!(top_decode_biguint(&bytes).unwrap(), v);
    }

    #[test]
    fn prop_u64_and_u16_decode_back(a in any::<u64>(), b in any::<u16>()) {
        prop_assert_eq!(top_decode_u64(&TypedValue::U64(a).top_encode()).unwrap(), a);
        prop_assert_eq!(top_decode_u16(&TypedValue::U16(b).top_encode()).unwrap(), b);
    }

    /// A u64 and a u128 holding the same number encode identically.
    #[test]
    fn prop_u64_encoding_matches_biguint(v in any::<u64>()) {
        prop_assert_eq!(
            TypedValue::U64(v).top_encode(),
            TypedValue::BigUint(u128::from(v)).top_encode()
        );
    }

    /// Signed values keep the sign bit and drop every redundant leading byte.
    #[test]
    fn prop_signed_encoding_is_minimal(v in any::<i128>()) {
        let bytes = TypedValue::BigInt(v).top_encode();
        if v == 0 {
            prop_assert!(bytes.is_empty());
            return Ok(());
        }
        prop_assert_eq!(bytes[0] & 0x80 != 0, v < 0);
        if bytes.len() > 1 {
            let redundant = (bytes[0] == 0x00 && bytes[1] & 0x80 == 0)
                || (bytes[0] == 0xff && bytes[1] & 0x80 != 0);
            prop_assert!(!redundant, "redundant sign byte in {:02x?}", bytes);
        }
        let mut padded = [if v < 0 { 0xff } else { 0x00 }; 16];
        padded[16 - bytes.len()..].copy_from_slice(&bytes);
        prop_assert_eq!(i128::from_be_bytes(padded), v);
    }
}

// ────────────────────────────────────────────────────────────────────
// Call data
// ────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn prop_call_data_has_one_segment_per_arg(
        function in "[a-zA-Z][a-zA-Z0-9_]{0,15}",
        args in prop::collection::vec(arb_typed_value(), 0..6),
    ) {
        let call = ContractCall::new(function.clone(), args.clone());
        prop_assert!(call.validate().is_ok());

        let data = call.data();
        let segments: Vec<&str> = data.split('@').collect();
        prop_assert_eq!(segments.len(), args.len() + 1);
        prop_assert_eq!(segments[0], function.as_str());
        for (segment, arg) in segments[1..].iter().zip(&args) {
            prop_assert_eq!(segment.len() % 2, 0);
            prop_assert!(segment.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
            prop_assert_eq!(hex::decode(segment).unwrap(), arg.top_encode());
        }
        prop_assert_eq!(call.hex_args().len(), args.len());
    }
}

// ────────────────────────────────────────────────────────────────────
// Nested decoding
// ────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn prop_election_data_decodes_fields(data in arb_election()) {
        let bytes = encode_election(&data);
        prop_assert_eq!(ElectionData::decode(&bytes).unwrap(), data);
    }

    #[test]
    fn prop_candidate_rejects_trailing_bytes(candidate in arb_candidate(), extra in 1usize..8) {
        let mut bytes = encode_candidate(&candidate);
        prop_assert_eq!(Candidate::decode(&bytes).unwrap(), candidate);
        bytes.extend(vec![0u8; extra]);
        prop_assert!(Candidate::decode(&bytes).is_err());
    }

    #[test]
    fn prop_vote_decodes_preference_order(ids in prop::collection::vec(any::<u16>(), 0..16)) {
        let mut bytes = (ids.len() as u32).to_be_bytes().to_vec();
        for id in &ids {
            bytes.extend_from_slice(&id.to_be_bytes());
        }
        prop_assert_eq!(Vote::decode(&bytes).unwrap().candidates, ids);
    }

    /// Garbage in is an error out, never a panic.
    #[test]
    fn prop_decoders_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = ElectionData::decode(&bytes);
        let _ = Candidate::decode(&bytes);
        let _ = Vote::decode(&bytes);
    }
}
