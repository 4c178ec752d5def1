use crate::error::Error;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use trust_dns_client::client::{AsyncClient, ClientHandle};
use trust_dns_client::rr::{DNSClass, Name, RecordType};
use trust_dns_client::tcp::TcpClientStream;
use trust_dns_client::udp::UdpClientStream;
use trust_dns_proto::iocompat::AsyncIoTokioAsStd;
use trust_dns_proto::xfer::DnsResponse;

/// Query `nameservers` for `name`/`rtype`.
///
/// Makes up to N+1 attempts for N nameservers, walking the list and wrapping around once.
/// The first response with a non-empty answer section wins; otherwise the last response
/// received is returned. Errors are only surfaced when no nameserver answered at all.
pub(crate) async fn exchange(
    name: &Name,
    rtype: RecordType,
    nameservers: &[SocketAddr],
    timeout: Duration,
) -> Result<DnsResponse, Error> {
    let first = nameservers
        .first()
        .ok_or_else(|| Error::Config("empty list of nameservers".to_string()))?;

    let mut last_response = None;
    let mut last_err = None;
    for ns in nameservers.iter().chain(std::iter::once(first)) {
        match exchange_one(name, rtype, *ns, timeout).await {
            Ok(resp) if !resp.answers().is_empty() => return Ok(resp),
            Ok(resp) => last_response = Some(resp),
            Err(err) => {
                tracing::debug!("DNS query {name} {rtype} to {ns} failed: {err}");
                last_err = Some(err);
            }
        }
    }

    match (last_response, last_err) {
        (Some(resp), _) => Ok(resp),
        (None, Some(err)) => Err(err),
        (None, None) => Err(Error::Config("empty list of nameservers".to_string())),
    }
}

/// One query against one nameserver, over UDP first and TCP when the UDP answer is truncated.
async fn exchange_one(
    name: &Name,
    rtype: RecordType,
    ns: SocketAddr,
    timeout: Duration,
) -> Result<DnsResponse, Error> {
    let stream = UdpClientStream::<UdpSocket>::with_timeout(ns, timeout);
    let (mut client, bg) = AsyncClient::connect(stream).await?;
    let bg = tokio::spawn(bg);
    let resp = client.query(name.clone(), DNSClass::IN, rtype).await;
    bg.abort();
    let resp = resp?;
    if !resp.truncated() {
        return Ok(resp);
    }

    tracing::debug!("truncated UDP response from {ns} for {name} {rtype}, retrying over TCP");
    let (stream, sender) =
        TcpClientStream::<AsyncIoTokioAsStd<TcpStream>>::with_timeout(ns, timeout);
    let (mut client, bg) = AsyncClient::with_timeout(stream, sender, timeout, None).await?;
    let bg = tokio::spawn(bg);
    let resp = client.query(name.clone(), DNSClass::IN, rtype).await;
    bg.abort();
    Ok(resp?)
}
