//! Request/reply tests against a live kernel: acknowledgements, dump
//! reassembly, and kernel error surfacing.

use nlwire::message::{MsgType, NLM_F_ACK, NLM_F_DUMP, NLM_F_REQUEST};
use nlwire::{ConnOption, Header, Message};

const RTM_GETLINK: u16 = 18;

/// A zeroed ifinfomsg header: dump every interface.
fn ifinfomsg() -> Vec<u8> {
    vec![0u8; 16]
}

#[tokio::test]
async fn execute_ack_round_trip() {
    let conn = require_netlink!();

    // The kernel skips control-range messages but still acknowledges them.
    let replies = conn
        .execute(Message {
            header: Header {
                message_type: MsgType::NOOP,
                flags: NLM_F_REQUEST | NLM_F_ACK,
                ..Default::default()
            },
            data: vec![],
        })
        .await
        .unwrap();

    assert_eq!(replies.len(), 1);
    let ack = &replies[0];
    assert!(ack.header.is_error());
    assert!(ack.data.len() >= 4);
    assert_eq!(i32::from_ne_bytes(ack.data[0..4].try_into().unwrap()), 0);
}

#[tokio::test]
async fn execute_link_dump() {
    let conn = require_netlink!();

    let request = Message {
        header: Header {
            message_type: RTM_GETLINK,
            flags: NLM_F_REQUEST | NLM_F_DUMP,
            ..Default::default()
        },
        data: ifinfomsg(),
    };

    let links = conn.execute(request).await.unwrap();

    // Every environment has at least a loopback interface, and the done
    // terminator never leaks into the results.
    assert!(!links.is_empty());
    for m in &links {
        assert!(!m.header.is_done());
        assert_eq!(m.header.message_type, 16); // RTM_NEWLINK
    }

    // All fragments belong to one sequence.
    let seq = links[0].header.sequence;
    assert!(links.iter().all(|m| m.header.sequence == seq));
}

#[tokio::test]
async fn dump_twice_on_one_connection() {
    let conn = require_netlink!();

    for _ in 0..2 {
        let request = Message {
            header: Header {
                message_type: RTM_GETLINK,
                flags: NLM_F_REQUEST | NLM_F_DUMP,
                ..Default::default()
            },
            data: ifinfomsg(),
        };
        assert!(!conn.execute(request).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn kernel_error_for_missing_device() {
    let conn = require_netlink!();

    // Extended acknowledgements are best-effort; the errno must surface
    // either way.
    let _ = conn.set_option(ConnOption::ExtendedAcknowledge, true);
    let _ = conn.set_option(ConnOption::CapAcknowledge, true);

    // ifinfomsg with an interface index nothing will ever use.
    let mut data = ifinfomsg();
    data[4..8].copy_from_slice(&0x7fff_fff0_i32.to_ne_bytes());

    let err = conn
        .execute(Message {
            header: Header {
                message_type: RTM_GETLINK,
                flags: NLM_F_REQUEST,
                ..Default::default()
            },
            data,
        })
        .await
        .unwrap_err();

    assert!(err.is_not_exist(), "unexpected error: {}", err);
}

#[tokio::test]
async fn send_batch_of_dumpless_requests() {
    let conn = require_netlink!();

    // Two acknowledged no-ops in one datagram; both replies arrive.
    let sent = conn
        .send_batch(vec![
            Message {
                header: Header {
                    message_type: MsgType::NOOP,
                    flags: NLM_F_REQUEST | NLM_F_ACK,
                    ..Default::default()
                },
                data: vec![],
            },
            Message {
                header: Header {
                    message_type: MsgType::NOOP,
                    flags: NLM_F_REQUEST | NLM_F_ACK,
                    ..Default::default()
                },
                data: vec![],
            },
        ])
        .await
        .unwrap();

    assert_eq!(sent[0].header.sequence + 1, sent[1].header.sequence);

    let mut acks = 0;
    while acks < 2 {
        let replies = conn.receive().await.unwrap();
        acks += replies.len();
    }
    assert_eq!(acks, 2);
}
