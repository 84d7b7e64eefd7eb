//! End-to-end tests: real queries over real UDP sockets against
//! `127.0.0.1`.  Servers are stopped individually; the registry-wide
//! shutdown has its own test binary because the registry is process
//! state.

use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use mockdns::protocol::types::*;
use mockdns::records::Records;
use mockdns::Error;

async fn send_raw(port: u16, octets: &[u8]) -> Message {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(octets, ("127.0.0.1", port)).await.unwrap();

    let mut buf = vec![0u8; 512];
    let (size, _) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for a response")
        .unwrap();

    Message::from_octets(&buf[..size]).unwrap()
}

async fn query(port: u16, name: &str, rtype: RecordType) -> Message {
    let message = Message::from_question(
        4660,
        Question {
            name: DomainName::from_dotted_string(name).unwrap(),
            qtype: QueryType::Record(rtype),
            qclass: QueryClass::Record(RecordClass::IN),
        },
    );

    send_raw(port, &message.to_octets().unwrap()).await
}

#[tokio::test]
async fn serves_a_records_on_the_default_port() {
    let mut records = Records::new();
    records.host("example.com").a = vec!["1.2.3.4".to_string()];

    let server = mockdns::start_server(&records, mockdns::DEFAULT_PORT, false)
        .await
        .unwrap();
    assert_eq!(mockdns::DEFAULT_PORT, server.port());

    let response = query(server.port(), "example.com", RecordType::A).await;

    assert_eq!(4660, response.header.id);
    assert!(response.header.is_response);
    assert_eq!(Rcode::NoError, response.header.rcode);
    assert_eq!(
        vec![ResourceRecord {
            name: DomainName::from_dotted_string("example.com").unwrap(),
            rtype_with_data: RecordTypeWithData::A {
                address: "1.2.3.4".parse().unwrap(),
            },
            rclass: RecordClass::IN,
            ttl: 1,
        }],
        response.answers
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn ephemeral_ports_are_read_back_from_the_kernel() {
    let server = mockdns::start_server(&Records::new(), 0, false)
        .await
        .unwrap();
    assert_ne!(0, server.port());
    server.stop().await.unwrap();
}

#[tokio::test]
async fn mx_preferences_mix_explicit_and_positional() {
    let mut records = Records::new();
    records.host("example.com").mx = vec![
        ".:0".into(),
        "mx1.domain.com:10".into(),
        "mx2.domain.com:10".into(),
        "mx3.domain.com".into(),
    ];

    let server = mockdns::start_server(&records, 0, false).await.unwrap();
    let response = query(server.port(), "example.com", RecordType::MX).await;

    let answers: Vec<(u16, String)> = response
        .answers
        .iter()
        .map(|rr| match &rr.rtype_with_data {
            RecordTypeWithData::MX {
                preference,
                exchange,
            } => (*preference, exchange.to_dotted_string()),
            other => panic!("expected MX, got {other:?}"),
        })
        .collect();

    assert_eq!(
        vec![
            (0, ".".to_string()),
            (10, "mx1.domain.com.".to_string()),
            (10, "mx2.domain.com.".to_string()),
            (40, "mx3.domain.com.".to_string()),
        ],
        answers
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn punycode_owners_answer_under_their_encoded_names() {
    let mut records = Records::new();
    records.host("mañana.com").mx = vec!["másletras.mañana.com".into()];

    let server = mockdns::start_server(&records, 0, false).await.unwrap();
    let response = query(server.port(), "xn--maana-pta.com", RecordType::MX).await;

    assert_eq!(1, response.answers.len());
    assert_eq!(
        RecordTypeWithData::MX {
            preference: 10,
            exchange: DomainName::from_dotted_string("xn--msletras-8ya.xn--maana-pta.com")
                .unwrap(),
        },
        response.answers[0].rtype_with_data
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn ptr_lookups_use_the_reverse_name() {
    let mut records = Records::new();
    records.host("1.2.3.4").ptr = vec!["domain_1.com".to_string(), "domain_2.com".to_string()];

    let server = mockdns::start_server(&records, 0, false).await.unwrap();
    let response = query(server.port(), "4.3.2.1.in-addr.arpa", RecordType::PTR).await;

    let targets: Vec<String> = response
        .answers
        .iter()
        .map(|rr| {
            assert_eq!(
                "4.3.2.1.in-addr.arpa.",
                rr.name.to_dotted_string(),
                "PTR answers must carry the reverse owner name"
            );
            match &rr.rtype_with_data {
                RecordTypeWithData::PTR { ptrdname } => ptrdname.to_dotted_string(),
                other => panic!("expected PTR, got {other:?}"),
            }
        })
        .collect();

    assert_eq!(
        vec!["domain_1.com.".to_string(), "domain_2.com.".to_string()],
        targets
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn queries_are_matched_case_insensitively() {
    let mut records = Records::new();
    records.host("example.com").a = vec!["1.2.3.4".to_string()];

    let server = mockdns::start_server(&records, 0, false).await.unwrap();

    // hand-rolled query so the QNAME keeps its mixed case on the wire
    #[rustfmt::skip]
    let octets = [
        0x12, 0x34, // ID
        0x00, 0x00, // flags
        0, 1, 0, 0, 0, 0, 0, 0, // counts
        7, b'E', b'X', b'A', b'M', b'P', b'L', b'E',
        3, b'c', b'o', b'm', 0,
        0, 1, // QTYPE A
        0, 1, // QCLASS IN
    ];

    let response = send_raw(server.port(), &octets).await;
    assert_eq!(1, response.answers.len());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn missing_records_get_empty_noerror() {
    let server = mockdns::start_server(&Records::new(), 0, false)
        .await
        .unwrap();

    let response = query(server.port(), "nowhere.example", RecordType::A).await;

    assert_eq!(Rcode::NoError, response.header.rcode);
    assert!(response.answers.is_empty());
    assert!(response.authority.is_empty());
    assert!(response.additional.is_empty());
    assert!(server.unmatched_queries().is_empty());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn strict_mode_answers_the_client_and_surfaces_the_miss() {
    let server = mockdns::start_server(&Records::new(), 0, true)
        .await
        .unwrap();

    let response = query(server.port(), "nowhere.example", RecordType::A).await;

    // the client never hangs: it sees a normal empty answer
    assert_eq!(Rcode::NoError, response.header.rcode);
    assert!(response.answers.is_empty());

    assert_eq!(
        vec![(
            DomainName::from_dotted_string("nowhere.example").unwrap(),
            QueryType::Record(RecordType::A),
        )],
        server.unmatched_queries()
    );

    assert_eq!(
        Err(Error::RecordNotFound {
            name: DomainName::from_dotted_string("nowhere.example").unwrap(),
            qtype: QueryType::Record(RecordType::A),
        }),
        server.stop().await
    );
}

#[tokio::test]
async fn assign_mocks_swaps_the_whole_dictionary() {
    let mut records = Records::new();
    records.host("example.com").a = vec!["1.2.3.4".to_string()];

    let server = mockdns::start_server(&records, 0, false).await.unwrap();

    let response = query(server.port(), "example.com", RecordType::A).await;
    assert_eq!(1, response.answers.len());

    let mut replacement = Records::new();
    replacement.host("other.com").txt = vec!["swapped".to_string()];
    server.assign_mocks(&replacement).await.unwrap();

    let response = query(server.port(), "example.com", RecordType::A).await;
    assert!(response.answers.is_empty(), "old records must be gone");

    let response = query(server.port(), "other.com", RecordType::TXT).await;
    assert_eq!(
        RecordTypeWithData::TXT {
            content: b"swapped".to_vec(),
        },
        response.answers[0].rtype_with_data
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn assign_mocks_rejects_bad_records_and_keeps_the_old_ones() {
    let mut records = Records::new();
    records.host("example.com").a = vec!["1.2.3.4".to_string()];

    let server = mockdns::start_server(&records, 0, false).await.unwrap();

    let mut bad = Records::new();
    bad.host("example.com").a = vec!["not-an-address".to_string()];
    assert_eq!(
        Err(Error::InvalidIpAddress {
            address: "not-an-address".to_string(),
        }),
        server.assign_mocks(&bad).await
    );

    let response = query(server.port(), "example.com", RecordType::A).await;
    assert_eq!(1, response.answers.len());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn garbage_datagrams_are_dropped_without_a_response() {
    let mut records = Records::new();
    records.host("example.com").a = vec!["1.2.3.4".to_string()];

    let server = mockdns::start_server(&records, 0, false).await.unwrap();

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket
        .send_to(&[0xff, 0x00, 0x01], ("127.0.0.1", server.port()))
        .await
        .unwrap();

    let mut buf = vec![0u8; 512];
    let response = timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await;
    assert!(response.is_err(), "malformed datagrams must not be answered");

    // and the server is still alive
    let response = query(server.port(), "example.com", RecordType::A).await;
    assert_eq!(1, response.answers.len());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn start_rejects_bad_records() {
    let mut records = Records::new();
    records.host("example.com").a = vec!["999.999.999.999".to_string()];

    let result = mockdns::start_server(&records, 0, false).await;
    assert!(matches!(result, Err(Error::InvalidIpAddress { .. })));
}
