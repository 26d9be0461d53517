use relay_mtproto::message::{MsgIdGen, plaintext_message};
use relay_mtproto::service::{self, ServiceMessage};
use relay_mtproto::handshake;
use relay_tl::Serializable;

#[test]
fn msg_ids_are_strictly_monotonic_multiples_of_four() {
    let mut ids = MsgIdGen::new();
    let mut prev = 0i64;
    for _ in 0..256 {
        let id = ids.next();
        assert_eq!(id % 4, 0, "low two bits are reserved");
        assert!(id >= prev + 4, "ids must advance by at least 4");
        prev = id;
    }
}

#[test]
fn plaintext_envelope_has_zeroed_ids() {
    let wire = plaintext_message(&[1, 2, 3, 4]);
    // auth_key_id (8) + msg_id (8) + length (4) + body
    assert_eq!(&wire[..16], &[0u8; 16]);
    assert_eq!(u32::from_le_bytes(wire[16..20].try_into().unwrap()), 4);
    assert_eq!(&wire[20..], &[1, 2, 3, 4]);
}

#[test]
fn step1_requests_differ_between_sessions() {
    let (a, _) = handshake::step1();
    let (b, _) = handshake::step1();
    assert_ne!(a.nonce, b.nonce, "nonces must be fresh per handshake");

    let wire = a.to_bytes();
    assert_eq!(wire.len(), 20);
    assert_eq!(
        u32::from_le_bytes(wire[..4].try_into().unwrap()),
        0x60469778
    );
}

#[test]
fn ack_bodies_roundtrip_through_the_service_decoder() {
    let ids = vec![1i64 << 33, 5i64 << 33];
    let body = service::msgs_ack(&ids);
    assert_eq!(
        ServiceMessage::parse(&body).unwrap(),
        ServiceMessage::MsgsAck { msg_ids: ids }
    );
}
