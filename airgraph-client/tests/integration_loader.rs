use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use airgraph_client::{
    BulkLoader, ConnectionConfig, ErrorCategory, GraphClient, MalformedRecord, Query,
    TransportError,
};

/// Serve one client: accept the handshake, answer each eval, and return the
/// query texts received once the client disconnects.
async fn scripted_server() -> Result<(String, JoinHandle<Result<Vec<String>>>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = format!("tcp://{}", listener.local_addr()?);
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let mut received = Vec::new();

        while let Some(line) = lines.next_line().await? {
            let request: Value = serde_json::from_str(&line)?;
            let request_id = request["requestId"].clone();
            let mut frames = Vec::new();
            if request["op"] == "authentication" {
                frames.push(json!({
                    "requestId": request_id,
                    "status": {"code": 200, "message": "", "attributes": {}},
                    "result": {"data": null, "meta": {}},
                }));
            } else {
                let gremlin = request["args"]["gremlin"]
                    .as_str()
                    .ok_or_else(|| anyhow!("eval without gremlin"))?
                    .to_string();
                if gremlin.contains("'DUP'") {
                    frames.push(json!({
                        "requestId": request_id,
                        "status": {
                            "code": 500,
                            "message": "Resource with specified id or name already exists",
                            "attributes": {"x-ms-status-code": 409, "x-ms-total-request-charge": 1.0},
                        },
                        "result": {"data": null, "meta": {}},
                    }));
                } else {
                    frames.push(json!({
                        "requestId": request_id,
                        "status": {"code": 206, "message": "", "attributes": {}},
                        "result": {"data": {"@type": "g:List", "@value": [{"id": "partial"}]}, "meta": {}},
                    }));
                    frames.push(json!({
                        "requestId": request_id,
                        "status": {"code": 200, "message": "", "attributes": {"x-ms-total-request-charge": 2.0}},
                        "result": {"data": [{"id": "final"}], "meta": {}},
                    }));
                }
                received.push(gremlin);
            }
            for frame in frames {
                write_half.write_all(format!("{frame}\n").as_bytes()).await?;
            }
            write_half.flush().await?;
        }
        Ok(received)
    });
    Ok((endpoint, server))
}

#[tokio::test]
async fn integration_bulk_load_over_tcp() -> Result<()> {
    let (endpoint, server) = scripted_server().await?;
    let config = ConnectionConfig::new(endpoint, "/dbs/air/colls/routes", "test-key");
    let client = GraphClient::connect(&config).await?;

    let airports = vec![Some("SEA"), Some("DUP"), None, Some("LAX")];
    let report = BulkLoader::new(&client, "vertices")
        .run(airports, |code| {
            let code = code.ok_or_else(|| MalformedRecord::missing_field("code"))?;
            Ok(Query::new(format!("g.addV('airport').property('code', '{code}')")))
        })
        .await?;

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.malformed, 1);
    assert_eq!(report.failures(ErrorCategory::Conflict), 1);
    assert_eq!(report.loaded_records, 4);
    assert!((report.request_charge - 5.0).abs() < f64::EPSILON);

    let count = client.query("g.V().count()").await?;
    assert_eq!(count.records, vec![json!({"id": "partial"}), json!({"id": "final"})]);
    assert_eq!(count.request_charge(), Some(2.0));

    client.close().await;
    let received = server.await??;
    assert_eq!(received.len(), 4);
    assert!(received[0].contains("'SEA'"));
    assert!(received[2].contains("'LAX'"));
    Ok(())
}

/// Serve one WebSocket client: accept the handshake and answer each eval
/// with a single success frame carrying its query text.
async fn scripted_websocket_server() -> Result<(String, JoinHandle<Result<Vec<Vec<u8>>>>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = format!("ws://{}/gremlin", listener.local_addr()?);
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let mut socket = tokio_tungstenite::accept_async(stream).await?;
        let mut received = Vec::new();

        while let Some(message) = socket.next().await {
            let message = message?;
            if message.is_close() {
                break;
            }
            let data = message.into_data();
            let mime_len = usize::from(*data.first().ok_or_else(|| anyhow!("empty message"))?);
            let request: Value = serde_json::from_slice(&data[1 + mime_len..])?;
            let frame = json!({
                "requestId": request["requestId"],
                "status": {"code": 200, "message": "", "attributes": {"x-ms-total-request-charge": 0.5}},
                "result": {"data": [request["args"]["gremlin"]], "meta": {}},
            });
            socket.send(Message::Text(frame.to_string())).await?;
            received.push(data);
        }
        Ok(received)
    });
    Ok((endpoint, server))
}

#[tokio::test]
async fn integration_bulk_load_over_websocket() -> Result<()> {
    let (endpoint, server) = scripted_websocket_server().await?;
    let config = ConnectionConfig::new(endpoint, "/dbs/air/colls/routes", "test-key");
    let client = GraphClient::connect(&config).await?;

    let report = BulkLoader::new(&client, "edges")
        .run(["1", "2"], |id| Ok(Query::new(format!("g.V('{id}')"))))
        .await?;
    assert_eq!(report.succeeded, 2);
    assert!((report.request_charge - 1.0).abs() < f64::EPSILON);

    client.close().await;
    let received = server.await??;
    assert_eq!(received.len(), 3);
    let mime = b"application/vnd.gremlin-v2.0+json";
    for message in &received {
        assert_eq!(usize::from(message[0]), mime.len());
        assert_eq!(&message[1..=mime.len()], mime);
    }
    Ok(())
}

#[tokio::test]
async fn integration_connect_rejects_unknown_scheme() -> Result<()> {
    let config = ConnectionConfig::new(
        "https://account.gremlin.cosmos.azure.com:443/",
        "/dbs/air/colls/routes",
        "test-key",
    );
    let err = GraphClient::connect(&config)
        .await
        .err()
        .ok_or_else(|| anyhow!("https endpoint should be rejected"))?;
    assert!(matches!(err, TransportError::InvalidEndpoint(_)));
    assert!(err.to_string().contains("https"));
    Ok(())
}
