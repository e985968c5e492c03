//! NDJSON line framing over the queue-owner's local socket, shared by the
//! server accept loop (`acpx-daemon`) and the submitter client
//! (`acpx-cli`). One JSON value per line, `\n`-terminated (§4.B, §4.G).

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[cfg(unix)]
pub type Conn = tokio::net::UnixStream;

/// Read one NDJSON line and parse it as `T`. Returns `Ok(None)` on clean
/// EOF so callers can distinguish "peer closed" from a parse error.
pub async fn read_frame<R, T>(reader: &mut BufReader<R>) -> io::Result<Option<T>>
where
    R: tokio::io::AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(['\n', '\r']);
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value: T = serde_json::from_str(trimmed)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

/// Read one NDJSON line as a raw [`Value`], for callers that need to peek
/// a `type` tag before committing to a concrete deserialization target.
pub async fn read_frame_value<R>(reader: &mut BufReader<R>) -> io::Result<Option<Value>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    read_frame(reader).await
}

pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
    T: Serialize,
{
    let mut json = serde_json::to_vec(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    json.push(b'\n');
    writer.write_all(&json).await?;
    writer.flush().await
}

/// Bind a fresh listener at `path`, removing any leftover socket file
/// first (the lease module already does this for the owner's own path,
/// but callers creating ad-hoc sockets — e.g. tests — use this too).
#[cfg(unix)]
pub fn bind_unix_listener(path: &std::path::Path) -> io::Result<tokio::net::UnixListener> {
    let _ = std::fs::remove_file(path);
    tokio::net::UnixListener::bind(path)
}

#[cfg(unix)]
pub async fn connect_unix(path: &std::path::Path) -> io::Result<Conn> {
    tokio::net::UnixStream::connect(path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn round_trips_a_json_value_over_a_pipe() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut reader = BufReader::new(server);

        write_frame(&mut client, &json!({"hello": "world"})).await.unwrap();
        drop(client);

        let value: Option<Value> = read_frame(&mut reader).await.unwrap();
        assert_eq!(value, Some(json!({"hello": "world"})));
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let mut reader = BufReader::new(server);
        let value: Option<Value> = read_frame(&mut reader).await.unwrap();
        assert_eq!(value, None);
    }
}
