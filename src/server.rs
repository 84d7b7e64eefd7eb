//! The mock server: one UDP socket, one accept task, and the record
//! dictionary behind a lock.
//!
//! The dictionary is locked once per datagram, so a whole request
//! sees a consistent dictionary even if `assign_mocks` swaps it in
//! the middle of processing.

use bytes::BytesMut;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::protocol::types::{
    DomainName, Message, Opcode, QueryClass, QueryType, Rcode, RecordClass,
};
use crate::records::{RecordSet, Records};
use crate::registry;
use crate::Error;

/// A running mock DNS server.  Servers are started with
/// [`crate::start_server`], owned by the process-wide registry, and
/// serve until stopped.
pub struct MockServer {
    port: u16,
    strict: bool,
    socket: Arc<UdpSocket>,
    records: Arc<RwLock<RecordSet>>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    unmatched: Mutex<Vec<(DomainName, QueryType)>>,
}

impl MockServer {
    /// Build the dictionary, bind the socket, and begin accepting
    /// datagrams on a background task.  Port 0 requests an
    /// OS-assigned ephemeral port; the port actually bound is read
    /// back from the kernel.
    ///
    /// # Errors
    ///
    /// Record build errors and socket bind errors.  No server is
    /// registered on failure.
    pub(crate) async fn start(
        records: &Records,
        port: u16,
        strict: bool,
    ) -> Result<Arc<Self>, Error> {
        let set = RecordSet::build(records)?;

        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(Error::Bind)?;
        let port = socket.local_addr().map_err(Error::Bind)?.port();

        tracing::info!(%port, %strict, "binding mock DNS UDP socket");

        let server = Arc::new(Self {
            port,
            strict,
            socket: Arc::new(socket),
            records: Arc::new(RwLock::new(set)),
            shutdown: CancellationToken::new(),
            worker: Mutex::new(None),
            unmatched: Mutex::new(Vec::new()),
        });

        let worker = tokio::spawn(listen_udp_task(server.clone()));
        *server.worker.lock().unwrap() = Some(worker);

        registry::register(server.clone());

        Ok(server)
    }

    /// The port this server is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Rebuild the dictionary from new declarations and swap it into
    /// place.  In-flight queries observe either the old or the new
    /// dictionary, never a mix.
    ///
    /// # Errors
    ///
    /// Record build errors; on failure the old dictionary stays in
    /// place.
    pub async fn assign_mocks(&self, records: &Records) -> Result<(), Error> {
        let set = RecordSet::build(records)?;
        *self.records.write().await = set;
        Ok(())
    }

    /// Stop the server: cancel the accept task, wait for it to exit,
    /// and unregister.
    ///
    /// # Errors
    ///
    /// In strict mode, the first query that found no record is
    /// surfaced as `Error::RecordNotFound`.
    pub async fn stop(&self) -> Result<(), Error> {
        self.shutdown.cancel();

        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            if let Err(error) = worker.await {
                tracing::debug!(?error, "accept worker exited abnormally");
            }
            tracing::info!(port = %self.port, "stopped mock DNS server");
        }

        registry::unregister(self);

        match self.unmatched.lock().unwrap().first() {
            Some((name, qtype)) => Err(Error::RecordNotFound {
                name: name.clone(),
                qtype: *qtype,
            }),
            None => Ok(()),
        }
    }

    /// The queries which found no record, in arrival order.  Only
    /// populated in strict mode.
    pub fn unmatched_queries(&self) -> Vec<(DomainName, QueryType)> {
        self.unmatched.lock().unwrap().clone()
    }

    async fn handle_datagram(&self, buf: &[u8], peer: SocketAddr) {
        let message = match Message::from_octets(buf) {
            Ok(message) => message,
            Err(error) => {
                // a malformed datagram must neither crash the server
                // nor get a reply
                tracing::warn!(?peer, ?error, "dropping unparseable datagram");
                return;
            }
        };

        if message.header.is_response {
            // do not respond to response messages: an inbound message
            // could spoof its source address / port to match another
            // server's, and so make the two respond to each other
            // endlessly
            return;
        }

        let (response, misses) = if message.header.opcode == Opcode::Standard {
            let records = self.records.read().await;
            build_response(&records, &message)
        } else {
            let mut response = message.make_response();
            response.header.rcode = Rcode::NotImplemented;
            (response, Vec::new())
        };

        match response.to_octets() {
            Ok(serialised) => {
                if let Err(error) = self.socket.send_to(&serialised, peer).await {
                    tracing::debug!(?peer, ?error, "UDP send error");
                }
            }
            Err(error) => tracing::warn!(?peer, ?error, "could not serialise response"),
        }

        // the client always gets its (empty) answer before the miss
        // is surfaced to the hosting process
        if self.strict && !misses.is_empty() {
            for (name, qtype) in &misses {
                tracing::warn!(%name, %qtype, "no record for query");
            }
            self.unmatched.lock().unwrap().extend(misses);
        }
    }
}

async fn listen_udp_task(server: Arc<MockServer>) {
    let mut buf = vec![0u8; 512];

    loop {
        tokio::select! {
            () = server.shutdown.cancelled() => break,

            result = server.socket.recv_from(&mut buf) => match result {
                Ok((size, peer)) => {
                    tracing::debug!(?peer, "UDP request");
                    let bytes = BytesMut::from(&buf[..size]);
                    server.handle_datagram(bytes.as_ref(), peer).await;
                }
                Err(error) => tracing::debug!(?error, "UDP receive error"),
            }
        }
    }
}

/// Answer a query from the dictionary.  Returns the response message
/// plus the `(name, qtype)` pairs that found no record, so the caller
/// can apply the not-found policy after replying.
fn build_response(records: &RecordSet, query: &Message) -> (Message, Vec<(DomainName, QueryType)>) {
    let mut response = query.make_response();
    let mut misses = Vec::new();

    for question in &query.questions {
        // the dictionary is IN-only by construction: a query in
        // another class is out of scope, not a missing record
        if question.qclass != QueryClass::Record(RecordClass::IN) {
            continue;
        }

        match question.qtype {
            QueryType::Record(rtype) => {
                if let Some(rrs) = records.get(&question.name, rtype) {
                    response.answers.extend(rrs.iter().cloned());
                } else {
                    misses.push((question.name.clone(), question.qtype));
                }
            }
            // AXFR / MAILB / MAILA / ANY are never stored
            _ => misses.push((question.name.clone(), question.qtype)),
        }
    }

    (response, misses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::test_util::*;
    use crate::protocol::types::{Header, Question, RecordType};

    fn query(name: &str, qtype: QueryType, qclass: QueryClass) -> Message {
        let mut message = Message::from_question(
            1234,
            Question {
                name: domain(name),
                qtype,
                qclass,
            },
        );
        message.header.recursion_desired = true;
        message
    }

    fn sample_records() -> RecordSet {
        let mut records = Records::new();
        records.host("example.com").a = vec!["1.2.3.4".to_string(), "5.6.7.8".to_string()];
        RecordSet::build(&records).unwrap()
    }

    #[test]
    fn hit_answers_in_stored_order() {
        let records = sample_records();
        let (response, misses) = build_response(
            &records,
            &query(
                "example.com.",
                QueryType::Record(RecordType::A),
                QueryClass::Record(RecordClass::IN),
            ),
        );

        assert_eq!(
            vec![
                a_record("example.com.", "1.2.3.4".parse().unwrap()),
                a_record("example.com.", "5.6.7.8".parse().unwrap()),
            ],
            response.answers
        );
        assert!(misses.is_empty());
    }

    #[test]
    fn response_header_echoes_the_question() {
        let records = sample_records();
        let q = query(
            "example.com.",
            QueryType::Record(RecordType::A),
            QueryClass::Record(RecordClass::IN),
        );
        let (response, _) = build_response(&records, &q);

        assert_eq!(
            Header {
                id: 1234,
                is_response: true,
                opcode: Opcode::Standard,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: true,
                recursion_available: false,
                rcode: Rcode::NoError,
            },
            response.header
        );
        assert_eq!(q.questions, response.questions);
        assert!(response.authority.is_empty());
        assert!(response.additional.is_empty());
    }

    #[test]
    fn miss_is_noerror_with_empty_answers() {
        let records = sample_records();
        let (response, misses) = build_response(
            &records,
            &query(
                "missing.com.",
                QueryType::Record(RecordType::A),
                QueryClass::Record(RecordClass::IN),
            ),
        );

        assert_eq!(Rcode::NoError, response.header.rcode);
        assert!(response.answers.is_empty());
        assert_eq!(
            vec![(domain("missing.com."), QueryType::Record(RecordType::A))],
            misses
        );
    }

    #[test]
    fn wrong_type_for_a_known_name_is_a_miss() {
        let records = sample_records();
        let (response, misses) = build_response(
            &records,
            &query(
                "example.com.",
                QueryType::Record(RecordType::MX),
                QueryClass::Record(RecordClass::IN),
            ),
        );

        assert!(response.answers.is_empty());
        assert_eq!(1, misses.len());
    }

    #[test]
    fn non_in_classes_get_empty_answers_and_no_miss() {
        let records = sample_records();
        let (response, misses) = build_response(
            &records,
            &query(
                "example.com.",
                QueryType::Record(RecordType::A),
                QueryClass::Wildcard,
            ),
        );

        assert_eq!(Rcode::NoError, response.header.rcode);
        assert!(response.answers.is_empty());
        assert!(misses.is_empty());
    }

    #[test]
    fn wildcard_qtype_is_a_miss() {
        let records = sample_records();
        let (response, misses) = build_response(
            &records,
            &query(
                "example.com.",
                QueryType::Wildcard,
                QueryClass::Record(RecordClass::IN),
            ),
        );

        assert!(response.answers.is_empty());
        assert_eq!(
            vec![(domain("example.com."), QueryType::Wildcard)],
            misses
        );
    }
}
