//! `HttpStatsService` against a stub HTTP server on a loopback port.

use fitcheck::payload::{build_generate_payload, build_histogram_payload};
use fitcheck::{
    Configuration, HttpStatsService, NumBins, Orchestrator, PipelineState, ServiceConfig,
    ServiceError, Session, StatsService,
};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// One request as the stub server saw it.
#[derive(Debug)]
struct Captured {
    method: String,
    path: String,
    body: Vec<u8>,
}

impl Captured {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

async fn read_request(stream: &mut TcpStream) -> Captured {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending a full request");
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut req = httparse::Request::new(&mut headers);
        if let httparse::Status::Complete(head_len) = req.parse(&buf).unwrap() {
            let content_length = req
                .headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case("content-length"))
                .map(|h| std::str::from_utf8(h.value).unwrap().parse::<usize>().unwrap())
                .unwrap_or(0);
            if buf.len() >= head_len + content_length {
                return Captured {
                    method: req.method.unwrap().to_string(),
                    path: req.path.unwrap().to_string(),
                    body: buf[head_len..head_len + content_length].to_vec(),
                };
            }
        }
    }
}

/// Serve `replies` in order, one connection each, and hand back what was received.
async fn stub_server(replies: Vec<(u16, String)>) -> (String, JoinHandle<Vec<Captured>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        for (status, body) in replies {
            let (mut stream, _) = listener.accept().await.unwrap();
            seen.push(read_request(&mut stream).await);
            let response = format!(
                "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        }
        seen
    });

    (base_url, handle)
}

fn service(base_url: &str) -> HttpStatsService {
    HttpStatsService::new(
        ServiceConfig::new(base_url)
            .connect_timeout(Duration::from_secs(2))
            .request_timeout(Duration::from_secs(10)),
    )
}

fn sample_body(n: usize) -> String {
    json!({ "random_numbers": vec![0.25; n], "sample_size": n, "distribution": "uniform" }).to_string()
}

fn histogram_body(n: u64) -> String {
    let mut rows: Vec<Value> = (0..10)
        .map(|i| {
            json!({
                "interval": format!("[{:.4}, {:.4})", i as f64 / 10.0, (i + 1) as f64 / 10.0),
                "frequency": 0,
                "relative_frequency": 0.0,
            })
        })
        .collect();
    rows[2]["frequency"] = json!(n);
    rows[2]["relative_frequency"] = json!(1.0);
    json!({ "frequency_table": rows }).to_string()
}

#[tokio::test]
async fn posts_payload_to_endpoint_path() {
    let (url, server) = stub_server(vec![(200, sample_body(3))]).await;
    let cfg = Configuration {
        sample_size: 3,
        ..Default::default()
    };
    let payload = build_generate_payload(&cfg);

    let value = service(&url).send(&payload).await.unwrap();
    assert_eq!(value["random_numbers"].as_array().unwrap().len(), 3);

    let seen = server.await.unwrap();
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].path, "/api/generate");
    assert_eq!(seen[0].json(), payload.body);
}

#[tokio::test]
async fn error_status_message_is_verbatim() {
    let body = json!({ "error": "El número de intervalos debe ser 10, 15, 20 o 25" }).to_string();
    let (url, server) = stub_server(vec![(400, body)]).await;
    let payload = build_histogram_payload(&[0.1, 0.2], NumBins::Ten);

    let err = service(&url).send(&payload).await.unwrap_err();
    assert_eq!(
        err,
        ServiceError::Rejected {
            status: 400,
            message: "El número de intervalos debe ser 10, 15, 20 o 25".to_string(),
        }
    );
    assert_eq!(server.await.unwrap()[0].path, "/api/histogram");
}

#[tokio::test]
async fn error_status_without_error_field_falls_back_to_status() {
    let (url, _server) = stub_server(vec![(500, "<h1>Internal Server Error</h1>".to_string())]).await;
    let payload = build_histogram_payload(&[0.1], NumBins::Ten);

    let err = service(&url).send(&payload).await.unwrap_err();
    assert_eq!(err.to_string(), "HTTP 500");
    assert_eq!(err.kind(), "server");
}

#[tokio::test]
async fn success_without_json_is_malformed() {
    let (url, _server) = stub_server(vec![(200, "not json".to_string())]).await;
    let payload = build_generate_payload(&Configuration::default());

    let err = service(&url).send(&payload).await.unwrap_err();
    assert!(matches!(err, ServiceError::Malformed(_)));
}

#[tokio::test]
async fn unreachable_service_is_transport_error() {
    // Bind then drop to get a port nobody is listening on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let payload = build_generate_payload(&Configuration::default());
    let err = service(&url).send(&payload).await.unwrap_err();
    match err {
        ServiceError::Transport { url: failed, .. } => {
            assert!(failed.ends_with("/api/generate"));
        }
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn describe_reads_index_banner() {
    let banner = json!({
        "message": "API de Simulación de Variables Aleatorias",
        "endpoints": {
            "/api/generate": "POST - Genera números aleatorios",
            "/api/ks-test": "POST - Prueba de Kolmogorov-Smirnov",
        }
    })
    .to_string();
    let (url, server) = stub_server(vec![(200, banner)]).await;

    let info = service(&url).describe().await.unwrap();
    assert!(info.message.starts_with("API"));
    assert_eq!(info.endpoints.len(), 2);

    let seen = server.await.unwrap();
    assert_eq!(seen[0].method, "GET");
    assert_eq!(seen[0].path, "/");
}

#[tokio::test]
async fn orchestrated_pipeline_over_http() {
    let chi = json!({
        "test_type": "Chi-cuadrado",
        "chi_square_stat": 3.1,
        "critical_value": 16.919,
        "p_value": 0.96,
        "decision": "No se rechaza H0",
        "conclusion": "No se rechaza H0",
    })
    .to_string();
    let (url, server) = stub_server(vec![
        (200, sample_body(5)),
        (200, histogram_body(5)),
        (200, chi),
    ])
    .await;

    let orc = Orchestrator::new(service(&url));
    let mut session = Session::new(Configuration {
        sample_size: 5,
        ..Default::default()
    });
    let report = orc.generate(&mut session).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(session.state(), PipelineState::HistogramReady);
    assert!(orc.run_test(&mut session).await.unwrap().is_applied());

    let seen = server.await.unwrap();
    let paths: Vec<_> = seen.iter().map(|c| c.path.as_str()).collect();
    assert_eq!(paths, ["/api/generate", "/api/histogram", "/api/chi-square-test"]);
    assert_eq!(seen[1].json()["num_bins"], 10);
    assert_eq!(seen[2].json()["distribution"], "uniform");
    assert_eq!(seen[2].json()["random_numbers"].as_array().unwrap().len(), 5);
}
