// =============================================================================
// server.rs — THE RAW-TCP FRONT DESK
// =============================================================================
//
// Two GET routes and a metrics page do not justify a web framework, so this
// is HTTP/1.1 over a tokio TcpListener: read the request head, parse one
// line, match on the path, write a JSON body back. The Rust equivalent of
// mounting a turret on a skateboard, and proud of it.
//
// Contract with callers: EVERY response is JSON with a stable shape. Errors
// are `{"erro": "<machine_readable_code>"}` — never a stack trace, never
// prose someone will be tempted to parse with a regex.
// =============================================================================

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::metrics::MetricsCollector;
use crate::models::DocKind;
use crate::normalizer;
use crate::session::LookupEngine;

/// Everything a request handler needs, explicitly bundled. Constructed once
/// in main, shared by Arc — the anti-global.
pub struct AppState {
    pub engine: Arc<LookupEngine>,
    pub metrics: Arc<MetricsCollector>,
}

/// A response about to be written: status + JSON body.
struct HttpResponse {
    status: u16,
    body: String,
}

impl HttpResponse {
    fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }

    fn erro(status: u16, code: &str) -> Self {
        Self::json(status, serde_json::json!({ "erro": code }))
    }
}

/// Run the HTTP server until the shutdown signal flips. Each connection is
/// handled in its own task because a /consulta can legitimately take three
/// minutes and the accept loop has other people to greet.
pub async fn run_http_server(
    state: Arc<AppState>,
    port: u16,
    shutdown: &mut watch::Receiver<bool>,
) {
    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind HTTP server on :{}: {}", port, e);
            return;
        }
    };

    info!("🌐 HTTP server listening on http://0.0.0.0:{}", port);

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, addr)) => {
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, state).await {
                                debug!(peer = %addr, "Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("HTTP accept error: {}", e);
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("HTTP server: shutting down");
                break;
            }
        }
    }
}

/// Read one request, answer it, hang up. Keep-alive is a luxury this
/// front desk does not offer.
async fn handle_connection(mut stream: TcpStream, state: Arc<AppState>) -> Result<()> {
    // Read until the end of the request head, bounded so a hostile peer
    // can't feed us a novel.
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > 8192 {
            let resp = HttpResponse::erro(400, "requisicao_grande_demais");
            write_response(&mut stream, resp).await?;
            return Ok(());
        }
    }

    let head = String::from_utf8_lossy(&buf);
    let request_line = head.lines().next().unwrap_or_default();
    let (method, target) = match parse_request_line(request_line) {
        Some(parts) => parts,
        None => {
            write_response(&mut stream, HttpResponse::erro(400, "requisicao_invalida")).await?;
            return Ok(());
        }
    };

    let started = std::time::Instant::now();
    let response = handle_request(&state, &method, &target).await;
    info!(
        method = %method,
        target = %target,
        status = response.status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request handled"
    );

    write_response(&mut stream, response).await
}

/// Split "GET /consulta?doc=x HTTP/1.1" into its method and target.
fn parse_request_line(line: &str) -> Option<(String, String)> {
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();
    Some((method, target))
}

/// Decode a query string into key/value pairs. Handles percent-encoding
/// and '+'-as-space; repeated keys keep the first value because nobody
/// sending ?doc=a&doc=b deserves a defined behavior.
fn parse_query(qs: &str) -> Vec<(String, String)> {
    qs.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(k), decode_component(v))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let plus_fixed = raw.replace('+', " ");
    urlencoding::decode(&plus_fixed)
        .map(|c| c.into_owned())
        .unwrap_or(plus_fixed)
}

fn query_param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Route one request. Pure-ish: all the I/O it does goes through the engine.
async fn handle_request(state: &AppState, method: &str, target: &str) -> HttpResponse {
    state.metrics.increment_requests();

    if method != "GET" {
        return HttpResponse::erro(405, "metodo_nao_suportado");
    }

    let (path, query) = target.split_once('?').unwrap_or((target, ""));

    match path {
        "/health" => {
            state.metrics.increment_health();
            HttpResponse::json(200, serde_json::json!({ "ok": true, "status": "online" }))
        }

        "/metrics" => {
            let snapshot = serde_json::json!({
                "engine": state.metrics.snapshot(),
                "cache": state.engine.cache().snapshot(),
                "slot": {
                    "capacity": state.engine.gate().capacity(),
                    "available": state.engine.gate().available(),
                    "acquisitions": state.engine.gate()
                        .acquisitions.load(portable_atomic::Ordering::Relaxed),
                },
            });
            HttpResponse::json(200, snapshot)
        }

        "/consulta" => handle_consulta(state, query).await,

        _ => HttpResponse::erro(404, "rota_desconhecida"),
    }
}

/// The main event: validate the document, run the lookup, map the outcome.
async fn handle_consulta(state: &AppState, query: &str) -> HttpResponse {
    let params = parse_query(query);

    // Canonical parameter is `doc`; `cpf` survives as an alias because the
    // first generation of callers was built against it.
    let raw_doc = match query_param(&params, "doc").or_else(|| query_param(&params, "cpf")) {
        Some(doc) if !doc.trim().is_empty() => doc,
        _ => {
            state.metrics.increment_invalid_documents();
            return HttpResponse::erro(400, "documento_invalido");
        }
    };

    let declared = match query_param(&params, "tipo") {
        None => None,
        Some("cpf") | Some("CPF") => Some(DocKind::Cpf),
        Some("cnpj") | Some("CNPJ") => Some(DocKind::Cnpj),
        Some(_) => {
            state.metrics.increment_invalid_documents();
            return HttpResponse::erro(400, "documento_invalido");
        }
    };

    let ident = match normalizer::normalize(raw_doc, declared) {
        Ok(ident) => ident,
        Err(e) => {
            state.metrics.increment_invalid_documents();
            return HttpResponse::erro(e.http_status(), e.reason_code());
        }
    };

    match state.engine.lookup(&ident).await {
        Ok(result) => match serde_json::to_value(&result) {
            Ok(body) => HttpResponse::json(200, body),
            Err(e) => {
                error!(error = %e, "Result serialization failed — this should be impossible");
                HttpResponse::erro(500, "erro_interno")
            }
        },
        Err(e) => HttpResponse::erro(e.http_status(), e.reason_code()),
    }
}

async fn write_response(stream: &mut TcpStream, response: HttpResponse) -> Result<()> {
    let status_text = match response.status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        504 => "Gateway Timeout",
        _ => "Unknown",
    };

    let raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nAccess-Control-Allow-Origin: *\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.status,
        status_text,
        response.body.len(),
        response.body,
    );

    stream.write_all(raw.as_bytes()).await?;
    if let Err(e) = stream.shutdown().await {
        warn!("Stream shutdown error (non-fatal): {}", e);
    }
    Ok(())
}

// =============================================================================
// Tests — the routing table plus full end-to-end scenarios, run
// against a scripted browser stub.
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::StubBrowser;
    use crate::config::Config;
    use std::time::Duration;

    fn state_with(stub: StubBrowser, deadline: Duration) -> AppState {
        let config = Arc::new(Config {
            base_url: "http://court.test/".into(),
            http_port: 0,
            cache_ttl: Duration::from_secs(300),
            slot_capacity: 1,
            lookup_deadline: deadline,
            initial_delay: Duration::from_millis(0),
            spinner_visible: Duration::from_millis(0),
            spinner_hidden: Duration::from_millis(0),
            grace_delay: Duration::from_millis(0),
            popup_timeout: Duration::from_millis(0),
            popup_settle: Duration::from_millis(0),
            type_delay: Duration::from_millis(0),
            chrome_path: None,
        });
        let metrics = Arc::new(MetricsCollector::new());
        AppState {
            engine: Arc::new(LookupEngine::new(
                config,
                Arc::new(stub),
                Arc::clone(&metrics),
            )),
            metrics,
        }
    }

    fn body_json(response: &HttpResponse) -> serde_json::Value {
        serde_json::from_str(&response.body).expect("response body is JSON")
    }

    #[test]
    fn test_parse_request_line() {
        let (method, target) = parse_request_line("GET /consulta?doc=1 HTTP/1.1").unwrap();
        assert_eq!(method, "GET");
        assert_eq!(target, "/consulta?doc=1");
        assert!(parse_request_line("").is_none());
    }

    #[test]
    fn test_parse_query_decodes_components() {
        let params = parse_query("doc=123.456.789-01&tipo=cpf&x=a%20b+c");
        assert_eq!(query_param(&params, "doc"), Some("123.456.789-01"));
        assert_eq!(query_param(&params, "tipo"), Some("cpf"));
        assert_eq!(query_param(&params, "x"), Some("a b c"));
        assert_eq!(query_param(&params, "missing"), None);
    }

    #[tokio::test]
    async fn test_health_route() {
        let state = state_with(StubBrowser::default(), Duration::from_secs(5));
        let resp = handle_request(&state, "GET", "/health").await;
        assert_eq!(resp.status, 200);
        let body = body_json(&resp);
        assert_eq!(body["ok"], true);
        assert_eq!(body["status"], "online");
    }

    #[tokio::test]
    async fn test_unknown_route_404() {
        let state = state_with(StubBrowser::default(), Duration::from_secs(5));
        let resp = handle_request(&state, "GET", "/nope").await;
        assert_eq!(resp.status, 404);
        assert_eq!(body_json(&resp)["erro"], "rota_desconhecida");
    }

    #[tokio::test]
    async fn test_post_is_rejected() {
        let state = state_with(StubBrowser::default(), Duration::from_secs(5));
        let resp = handle_request(&state, "POST", "/consulta?doc=12345678901").await;
        assert_eq!(resp.status, 405);
    }

    #[tokio::test]
    async fn test_scenario_malformed_doc_is_cpf_invalido() {
        // doc=abc declared as CPF strips to nothing → 400, reason cpf_invalido.
        let state = state_with(StubBrowser::default(), Duration::from_secs(5));
        let resp = handle_request(&state, "GET", "/consulta?doc=abc&tipo=cpf").await;
        assert_eq!(resp.status, 400);
        assert_eq!(body_json(&resp)["erro"], "cpf_invalido");
    }

    #[tokio::test]
    async fn test_missing_doc_is_documento_invalido() {
        let state = state_with(StubBrowser::default(), Duration::from_secs(5));
        let resp = handle_request(&state, "GET", "/consulta?tipo=cpf").await;
        assert_eq!(resp.status, 400);
        assert_eq!(body_json(&resp)["erro"], "documento_invalido");
    }

    #[tokio::test]
    async fn test_unknown_tipo_is_rejected() {
        let state = state_with(StubBrowser::default(), Duration::from_secs(5));
        let resp = handle_request(&state, "GET", "/consulta?doc=12345678901&tipo=rg").await;
        assert_eq!(resp.status, 400);
        assert_eq!(body_json(&resp)["erro"], "documento_invalido");
    }

    #[tokio::test]
    async fn test_scenario_zero_results_has_aviso() {
        // Zero case links → empty processos, non-null aviso,
        // HTTP 200.
        let stub = StubBrowser {
            page_text: "Nenhum resultado encontrado".into(),
            ..StubBrowser::default()
        };
        let state = state_with(stub, Duration::from_secs(5));
        let resp = handle_request(&state, "GET", "/consulta?doc=12345678901&tipo=cpf").await;
        assert_eq!(resp.status, 200);
        let body = body_json(&resp);
        assert_eq!(body["processos"].as_array().unwrap().len(), 0);
        assert!(body["aviso"].is_string());
        assert_eq!(body["tipo"], "cpf");
        assert_eq!(body["documento"], "12345678901");
    }

    #[tokio::test]
    async fn test_scenario_cnpj_with_one_case() {
        // One openable case whose detail shows
        // "Assunto: Cobrança".
        let stub = StubBrowser {
            anchors: vec!["1112223-44.2021.8.13.0024".into()],
            detail_text: "Assunto: Cobrança".into(),
            ..StubBrowser::default()
        };
        let state = state_with(stub, Duration::from_secs(5));
        let resp =
            handle_request(&state, "GET", "/consulta?doc=11222333000181&tipo=cnpj").await;
        assert_eq!(resp.status, 200);
        let body = body_json(&resp);
        let processos = body["processos"].as_array().unwrap();
        assert_eq!(processos.len(), 1);
        assert_eq!(processos[0]["assunto"], "Cobrança");
        assert_eq!(processos[0]["numero"], "1112223-44.2021.8.13.0024");
    }

    #[tokio::test]
    async fn test_scenario_hang_yields_504_then_next_request_succeeds() {
        // Backend hangs past the deadline → 504; a request
        // for a DIFFERENT key afterwards succeeds, proving the slot was
        // released despite the timeout.
        let stub = StubBrowser {
            hang_first_navigate: true,
            page_text: "Nenhum resultado encontrado".into(),
            ..StubBrowser::default()
        };
        let state = state_with(stub, Duration::from_millis(50));

        let resp = handle_request(&state, "GET", "/consulta?doc=12345678901&tipo=cpf").await;
        assert_eq!(resp.status, 504);
        assert_eq!(body_json(&resp)["erro"], "timeout_no_tribunal");

        let resp = handle_request(&state, "GET", "/consulta?doc=98765432109&tipo=cpf").await;
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn test_legacy_cpf_param_alias() {
        let stub = StubBrowser {
            page_text: "Nenhum resultado encontrado".into(),
            ..StubBrowser::default()
        };
        let state = state_with(stub, Duration::from_secs(5));
        let resp = handle_request(&state, "GET", "/consulta?cpf=123.456.789-01").await;
        assert_eq!(resp.status, 200);
        assert_eq!(body_json(&resp)["documento"], "12345678901");
    }

    #[tokio::test]
    async fn test_metrics_route_counts_cache_traffic() {
        let stub = StubBrowser {
            page_text: "Nenhum resultado encontrado".into(),
            ..StubBrowser::default()
        };
        let state = state_with(stub, Duration::from_secs(5));

        // Miss (runs the stub), then hit (cache).
        let _ = handle_request(&state, "GET", "/consulta?doc=12345678901").await;
        let _ = handle_request(&state, "GET", "/consulta?doc=12345678901").await;

        let resp = handle_request(&state, "GET", "/metrics").await;
        assert_eq!(resp.status, 200);
        let body = body_json(&resp);
        assert_eq!(body["engine"]["cache_hits"], 1);
        assert_eq!(body["engine"]["lookups_started"], 1);
        assert_eq!(body["cache"]["rows"], 1);
        assert_eq!(body["slot"]["capacity"], 1);
        assert_eq!(body["slot"]["available"], 1);
    }
}
