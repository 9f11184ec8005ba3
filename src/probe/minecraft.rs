//! Minecraft server-list-ping probe.
//!
//! Speaks the post-1.7 status protocol: a handshake with next state 1, an
//! empty status request, then one length-prefixed response packet carrying
//! the server's JSON status. All integers on the wire are LEB128 VarInts.

use super::http::elapsed_ms;
use super::{PingOutcome, ProbeError};
use crate::db::{PlayerCounts, DEFAULT_GAME_SERVER_PORT};

use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use unsigned_varint::{decode as varint_decode, encode as varint_encode};

/// Protocol version -1 as a VarInt, meaning "just asking for status".
const STATUS_PROTOCOL_VERSION: u32 = u32::MAX;

const HANDSHAKE_PACKET_ID: u32 = 0x00;
const STATUS_REQUEST_PACKET_ID: u32 = 0x00;
const NEXT_STATE_STATUS: u32 = 1;

/// Upper bound on a status response we are willing to buffer.
const MAX_PACKET_LEN: usize = 1 << 20;

/// The subset of the status JSON we care about.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerStatus {
    #[serde(default)]
    pub version: Option<ServerVersion>,
    #[serde(default)]
    pub players: Option<ServerPlayers>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerVersion {
    pub name: String,
    #[serde(default)]
    pub protocol: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerPlayers {
    pub online: u32,
    pub max: u32,
}

/// Query a game server and turn the result into an outcome. Success means the
/// server answered the status query; there is no numeric code to compare.
pub async fn run_game_server_probe(address: &str, port: Option<u16>, timeout: Duration) -> PingOutcome {
    let (host, port) = split_host_port(address, port);
    let start = Instant::now();

    let result = match tokio::time::timeout(timeout, query_server(&host, port)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(timeout)),
    };
    let latency_ms = elapsed_ms(start);

    match result {
        Ok(status) => {
            match &status.version {
                Some(v) => tracing::debug!(
                    "Game server {}:{} online ({}, protocol {}) in {:.2}ms",
                    host,
                    port,
                    v.name,
                    v.protocol,
                    latency_ms
                ),
                None => tracing::debug!("Game server {}:{} online in {:.2}ms", host, port, latency_ms),
            }
            PingOutcome {
                success: true,
                status_code: None,
                latency_ms,
                error_message: None,
                players: status.players.map(|p| PlayerCounts {
                    online: p.online,
                    max: p.max,
                }),
            }
        }
        Err(e) => PingOutcome::failed(latency_ms, format!("Server offline: {}", e)),
    }
}

/// Resolve the host and port to dial. A port embedded in the address wins
/// over the target's port field, which wins over the default.
pub fn split_host_port(address: &str, port: Option<u16>) -> (String, u16) {
    let address = address.trim();

    if let Some(rest) = address.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let embedded = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host.to_string(), embedded.or(port).unwrap_or(DEFAULT_GAME_SERVER_PORT));
        }
    }

    if let Some((host, p)) = address.rsplit_once(':') {
        if !host.contains(':') {
            if let Ok(embedded) = p.parse::<u16>() {
                return (host.to_string(), embedded);
            }
        }
    }

    (address.to_string(), port.unwrap_or(DEFAULT_GAME_SERVER_PORT))
}

async fn query_server(host: &str, port: u16) -> Result<ServerStatus, ProbeError> {
    let mut stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| ProbeError::Network(format!("failed to connect to {}:{}: {}", host, port, e)))?;
    query_status(&mut stream, host, port).await
}

/// Run the status exchange over an established stream.
pub async fn query_status<S>(stream: &mut S, host: &str, port: u16) -> Result<ServerStatus, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut out = encode_handshake(host, port);
    out.extend_from_slice(&encode_status_request());
    stream.write_all(&out).await.map_err(io_error)?;
    stream.flush().await.map_err(io_error)?;

    let len = read_varint(stream).await? as usize;
    if len == 0 || len > MAX_PACKET_LEN {
        return Err(ProbeError::Protocol(format!("invalid packet length {}", len)));
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.map_err(io_error)?;

    let (packet_id, rest) = decode_varint(&body)?;
    if packet_id != STATUS_REQUEST_PACKET_ID {
        return Err(ProbeError::Protocol(format!("unexpected packet id {:#04x}", packet_id)));
    }

    let (json_len, rest) = decode_varint(rest)?;
    let json = rest
        .get(..json_len as usize)
        .ok_or_else(|| ProbeError::Protocol("status string truncated".to_string()))?;
    let json = std::str::from_utf8(json).map_err(|e| ProbeError::Protocol(format!("status is not UTF-8: {}", e)))?;

    parse_status(json)
}

/// Parse the JSON body of a status response.
pub fn parse_status(json: &str) -> Result<ServerStatus, ProbeError> {
    serde_json::from_str(json).map_err(|e| ProbeError::Protocol(format!("malformed status JSON: {}", e)))
}

fn encode_handshake(host: &str, port: u16) -> Vec<u8> {
    let mut body = Vec::with_capacity(host.len() + 16);
    write_varint(&mut body, HANDSHAKE_PACKET_ID);
    write_varint(&mut body, STATUS_PROTOCOL_VERSION);
    write_string(&mut body, host);
    body.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut body, NEXT_STATE_STATUS);
    frame(&body)
}

fn encode_status_request() -> Vec<u8> {
    let mut body = Vec::with_capacity(1);
    write_varint(&mut body, STATUS_REQUEST_PACKET_ID);
    frame(&body)
}

fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 5);
    write_varint(&mut out, body.len() as u32);
    out.extend_from_slice(body);
    out
}

fn write_varint(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(varint_encode::u32(value, &mut varint_encode::u32_buffer()));
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_varint(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn decode_varint(buf: &[u8]) -> Result<(u32, &[u8]), ProbeError> {
    varint_decode::u32(buf).map_err(|e| ProbeError::Protocol(format!("bad varint: {}", e)))
}

async fn read_varint<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32, ProbeError> {
    let mut buf = [0u8; 5];
    for i in 0..buf.len() {
        buf[i] = reader.read_u8().await.map_err(io_error)?;
        if buf[i] & 0x80 == 0 {
            return decode_varint(&buf[..=i]).map(|(v, _)| v);
        }
    }
    Err(ProbeError::Protocol("varint longer than 5 bytes".to_string()))
}

fn io_error(e: std::io::Error) -> ProbeError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProbeError::Protocol("connection closed before status response".to_string())
    } else {
        ProbeError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const STATUS_JSON: &str =
        r#"{"version":{"name":"1.20.4","protocol":765},"players":{"max":20,"online":3},"description":{"text":"hi"}}"#;

    /// Accept one connection, consume handshake + request, answer with `reply`.
    async fn fake_server(reply: Vec<u8>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            for _ in 0..2 {
                let len = read_varint(&mut socket).await.unwrap() as usize;
                let mut body = vec![0u8; len];
                socket.read_exact(&mut body).await.unwrap();
            }
            socket.write_all(&reply).await.unwrap();
        });

        port
    }

    fn status_packet(json: &str) -> Vec<u8> {
        let mut body = Vec::new();
        write_varint(&mut body, 0x00);
        write_string(&mut body, json);
        frame(&body)
    }

    #[test]
    fn test_handshake_layout() {
        let packet = encode_handshake("mc.example.com", 25565);
        // length, id 0, protocol -1 (5 bytes), host string, port, next state
        assert_eq!(packet[0] as usize, packet.len() - 1);
        assert_eq!(packet[1], 0x00);
        assert_eq!(&packet[2..7], &[0xff, 0xff, 0xff, 0xff, 0x0f]);
        assert_eq!(packet[7] as usize, "mc.example.com".len());
        assert_eq!(&packet[packet.len() - 3..packet.len() - 1], &25565u16.to_be_bytes());
        assert_eq!(*packet.last().unwrap(), 0x01);
        assert_eq!(encode_status_request(), vec![0x01, 0x00]);
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("mc.example.com", None), ("mc.example.com".to_string(), 25565));
        assert_eq!(split_host_port("mc.example.com", Some(25570)), ("mc.example.com".to_string(), 25570));
        assert_eq!(split_host_port("mc.example.com:19132", Some(25565)), ("mc.example.com".to_string(), 19132));
        assert_eq!(split_host_port("[::1]:25566", None), ("::1".to_string(), 25566));
        assert_eq!(split_host_port("::1", Some(25567)), ("::1".to_string(), 25567));
    }

    #[test]
    fn test_parse_status() {
        let status = parse_status(STATUS_JSON).unwrap();
        assert_eq!(status.version.unwrap().name, "1.20.4");
        let players = status.players.unwrap();
        assert_eq!((players.online, players.max), (3, 20));

        assert!(parse_status("not json").is_err());
        assert!(parse_status("{}").unwrap().players.is_none());
    }

    #[tokio::test]
    async fn test_probe_online_server() {
        let port = fake_server(status_packet(STATUS_JSON)).await;
        let outcome = run_game_server_probe("127.0.0.1", Some(port), Duration::from_secs(5)).await;

        assert!(outcome.success, "{:?}", outcome.error_message);
        assert_eq!(outcome.status_code, None);
        assert_eq!(outcome.players, Some(PlayerCounts { online: 3, max: 20 }));
    }

    #[tokio::test]
    async fn test_probe_malformed_response() {
        let port = fake_server(status_packet("{\"players\": oops")).await;
        let outcome = run_game_server_probe("127.0.0.1", Some(port), Duration::from_secs(5)).await;

        assert!(!outcome.success);
        let message = outcome.error_message.unwrap();
        assert!(message.starts_with("Server offline"), "{}", message);
        assert!(message.contains("malformed status JSON"), "{}", message);
    }

    #[tokio::test]
    async fn test_probe_connection_closed() {
        let port = fake_server(Vec::new()).await;
        let outcome = run_game_server_probe("127.0.0.1", Some(port), Duration::from_secs(5)).await;
        assert!(!outcome.success);
        assert!(outcome.error_message.unwrap().contains("connection closed"));
    }

    #[tokio::test]
    async fn test_probe_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let outcome = run_game_server_probe("127.0.0.1", Some(port), Duration::from_millis(100)).await;
        assert!(!outcome.success);
        assert!(outcome.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_query_status_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            for _ in 0..2 {
                let len = read_varint(&mut server).await.unwrap() as usize;
                let mut body = vec![0u8; len];
                server.read_exact(&mut body).await.unwrap();
            }
            server.write_all(&status_packet(STATUS_JSON)).await.unwrap();
        });

        let status = query_status(&mut client, "localhost", 25565).await.unwrap();
        assert_eq!(status.players.unwrap().online, 3);
    }
}
