//! A small DNS server answering from an in-memory zone, for resolver tests.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::net::UdpSocket;
use trust_dns_proto::rr::rdata::SOA;
use trust_dns_server::authority::MessageResponseBuilder;
use trust_dns_server::client::op::{Header, ResponseCode};
use trust_dns_server::client::rr::rdata::TXT;
use trust_dns_server::client::rr::{LowerName, Name, RData, Record, RecordType};
use trust_dns_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use trust_dns_server::ServerFuture;

#[derive(Default)]
pub struct Zone {
    /// Names carrying an SOA record.
    pub apexes: HashSet<LowerName>,
    pub cnames: HashMap<LowerName, Name>,
    pub txt: HashMap<LowerName, Vec<String>>,
    /// Names answered with SERVFAIL.
    pub broken: HashSet<LowerName>,
}

impl Zone {
    pub fn add_apex(&mut self, name: &str) {
        self.apexes.insert(lower(name));
    }

    pub fn add_cname(&mut self, name: &str, target: &str) {
        self.cnames.insert(lower(name), Name::from_str(target).unwrap());
    }

    pub fn set_txt(&mut self, name: &str, values: Vec<String>) {
        self.txt.insert(lower(name), values);
    }

    pub fn remove_txt(&mut self, name: &str) {
        self.txt.remove(&lower(name));
    }

    fn is_known(&self, name: &LowerName) -> bool {
        self.txt.contains_key(name) || self.apexes.iter().any(|apex| apex.zone_of(name))
    }
}

pub fn lower(name: &str) -> LowerName {
    LowerName::from(Name::from_str(name).unwrap())
}

#[derive(Clone)]
pub struct Handler {
    pub zone: Arc<RwLock<Zone>>,
    pub queries: Arc<AtomicUsize>,
    soa_queries: Arc<AtomicUsize>,
}

impl Handler {
    pub fn soa_queries(&self) -> usize {
        self.soa_queries.load(Ordering::SeqCst)
    }

    fn answer(&self, request: &Request) -> (ResponseCode, Vec<Record>) {
        let name = request.query().name();
        let qtype = request.query().query_type();
        let owner: Name = name.into();
        let zone = self.zone.read().unwrap();

        if zone.broken.contains(name) {
            return (ResponseCode::ServFail, vec![]);
        }
        if let Some(target) = zone.cnames.get(name) {
            let cname = Record::from_rdata(owner, 60, RData::CNAME(target.clone()));
            return (ResponseCode::NoError, vec![cname]);
        }

        let rdata = match qtype {
            RecordType::SOA if zone.apexes.contains(name) => vec![RData::SOA(SOA::new(
                Name::from_str("ns1.example.com.").unwrap(),
                Name::from_str("hostmaster.example.com.").unwrap(),
                1,
                86_400,
                7_200,
                3_600_000,
                172_800,
            ))],
            RecordType::NS if zone.apexes.contains(name) => {
                vec![RData::NS(Name::from_str("ns1.example.com.").unwrap())]
            }
            RecordType::TXT => zone
                .txt
                .get(name)
                .map(|values| {
                    values
                        .iter()
                        .map(|v| RData::TXT(TXT::new(vec![v.clone()])))
                        .collect()
                })
                .unwrap_or_default(),
            _ => vec![],
        };

        if rdata.is_empty() && !zone.is_known(name) {
            return (ResponseCode::NXDomain, vec![]);
        }
        let records = rdata
            .into_iter()
            .map(|rd| Record::from_rdata(owner.clone(), 60, rd))
            .collect();
        (ResponseCode::NoError, records)
    }
}

#[async_trait::async_trait]
impl RequestHandler for Handler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if request.query().query_type() == RecordType::SOA {
            self.soa_queries.fetch_add(1, Ordering::SeqCst);
        }

        let (code, records) = self.answer(request);
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        header.set_response_code(code);
        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build(header, records.iter(), &[], &[], &[]);
        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(_) => {
                let mut header = Header::new();
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }
}

/// Start a UDP DNS server on a random local port.
pub async fn start(zone: Zone) -> (SocketAddr, Handler) {
    let handler = Handler {
        zone: Arc::new(RwLock::new(zone)),
        queries: Arc::default(),
        soa_queries: Arc::default(),
    };
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let mut server = ServerFuture::new(handler.clone());
    server.register_socket(socket);
    tokio::spawn(server.block_until_done());
    (addr, handler)
}
