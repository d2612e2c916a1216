use rankwire::environment::{Config, DynamicProtocol};
use rankwire::traits::*;
use rankwire::transport::local::LocalUniverse;

fn pair(config: Config) -> Vec<rankwire::topology::Communicator> {
    LocalUniverse::with_config(2, config).communicators()
}

#[test]
fn unmatched_receive_is_cancelled() {
    let comms = pair(Config::default());
    let mut buffer = [1u32; 2];
    let mut request = comms[1]
        .process_at_rank(0)
        .immediate_receive_into(&mut buffer[..])
        .unwrap();
    request.cancel().unwrap();
    let status = request.wait().unwrap();
    assert!(status.cancelled());
    assert_eq!(status.count(), 0);
    assert!(!request.active());
    request.cancel().unwrap();
    drop(request);
    assert_eq!(buffer, [1, 1]);
}

#[test]
fn matched_receive_ignores_cancel() {
    let comms = pair(Config::default());
    comms[0].process_at_rank(1).send(&[8u32, 9][..]).unwrap();

    let mut buffer = [0u32; 2];
    let mut request = comms[1]
        .process_at_rank(0)
        .immediate_receive_into(&mut buffer[..])
        .unwrap();
    request.cancel().unwrap();
    let status = request.wait().unwrap();
    assert!(!status.cancelled());
    assert_eq!(status.count(), 2);
    drop(request);
    assert_eq!(buffer, [8, 9]);
}

#[test]
fn unmatched_rendezvous_send_is_cancelled() {
    let comms = pair(Config::default().with_eager_limit(4));
    let mut request = comms[0]
        .process_at_rank(1)
        .immediate_send(&[1u64, 2][..])
        .unwrap();
    request.cancel().unwrap();
    let status = request.wait().unwrap();
    assert!(status.cancelled());
    assert!(comms[1]
        .process_at_rank(0)
        .immediate_probe()
        .unwrap()
        .is_none());
}

#[test]
fn eager_send_has_already_completed() {
    let comms = pair(Config::default());
    let mut request = comms[0].process_at_rank(1).immediate_send(&3u8).unwrap();
    request.cancel().unwrap();
    assert!(!request.wait().unwrap().cancelled());
    let (value, _) = comms[1].process_at_rank(0).receive::<u8>().unwrap();
    assert_eq!(value, 3);
}

#[test]
fn probe_receive_becomes_inactive() {
    let comms = pair(Config::default().with_dynamic_protocol(DynamicProtocol::Probe));
    let from_zero = comms[1].process_at_rank(0);
    let mut values: Vec<u16> = vec![4];
    let mut request = from_zero.immediate_receive_vec_with_tag(&mut values, 0).unwrap();
    assert!(request.test().unwrap().is_none());
    request.cancel().unwrap();
    assert!(!request.active());
    let status = request.wait().unwrap();
    assert!(!status.cancelled());
    assert_eq!(status.count(), 0);
    drop(request);
    assert_eq!(values, vec![4]);

    comms[0].process_at_rank(1).send_vec(&[5u16, 6]).unwrap();
    let (received, _) = from_zero.receive_vec::<u16>().unwrap();
    assert_eq!(received, vec![5, 6]);
}

#[test]
fn size_prefixed_receive_cancels_before_the_announcement() {
    let comms = pair(Config::default().with_dynamic_protocol(DynamicProtocol::SizePrefix));
    let from_zero = comms[1].process_at_rank(0);
    let mut values: Vec<u16> = Vec::new();
    let mut request = from_zero.immediate_receive_vec_with_tag(&mut values, 2).unwrap();
    request.cancel().unwrap();
    let status = request.wait().unwrap();
    assert!(status.cancelled());
    drop(request);
    assert!(values.is_empty());

    comms[0].process_at_rank(1).send_vec_with_tag(&[1u16], 2).unwrap();
    let (received, _) = from_zero.receive_vec_with_tag::<u16>(2).unwrap();
    assert_eq!(received, vec![1]);
}

#[test]
fn size_prefixed_receive_is_committed_after_the_announcement() {
    let comms = pair(Config::default().with_dynamic_protocol(DynamicProtocol::SizePrefix));
    comms[0]
        .process_at_rank(1)
        .send_vec_with_tag(&[7u16, 7, 7], 2)
        .unwrap();

    let mut values: Vec<u16> = Vec::new();
    let mut request = comms[1]
        .process_at_rank(0)
        .immediate_receive_vec_with_tag(&mut values, 2)
        .unwrap();
    // Consumes the announcement and arms the payload receive.
    assert!(request.test().unwrap().is_none());
    request.cancel().unwrap();
    let status = request.wait().unwrap();
    assert!(!status.cancelled());
    assert_eq!((status.count(), status.tag()), (3, 2));
    drop(request);
    assert_eq!(values, vec![7, 7, 7]);
}

#[test]
fn size_prefixed_send_cancels_both_phases() {
    let config = Config::default()
        .with_dynamic_protocol(DynamicProtocol::SizePrefix)
        .with_eager_limit(0);
    let comms = pair(config);
    let mut request = comms[0]
        .process_at_rank(1)
        .immediate_send_serialized(&"never delivered")
        .unwrap();
    request.cancel().unwrap();
    let status = request.wait().unwrap();
    assert!(status.cancelled());
    assert_eq!(status.count(), 0);
    assert!(comms[1]
        .process_at_rank(0)
        .immediate_probe()
        .unwrap()
        .is_none());
}

#[test]
fn announced_size_prefixed_send_is_committed() {
    let config = Config::default()
        .with_dynamic_protocol(DynamicProtocol::SizePrefix)
        .with_eager_limit(4);
    let comms = pair(config);
    let mut text = String::new();
    let mut receive = comms[1]
        .process_at_rank(0)
        .immediate_receive_serialized_with_tag(&mut text, 3)
        .unwrap();

    let mut send = comms[0]
        .process_at_rank(1)
        .immediate_send_serialized_with_tag(&"already announced", 3)
        .unwrap();
    send.cancel().unwrap();

    let received = receive.wait().unwrap();
    assert!(!received.cancelled());
    assert_eq!(received.tag(), 3);
    let sent = send.wait().unwrap();
    assert!(!sent.cancelled());
    assert_eq!(sent.count(), 1);
    drop(receive);
    assert_eq!(text, "already announced");
}
