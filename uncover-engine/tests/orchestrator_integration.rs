//! Integration tests for the fan-out / fan-in pipeline.
//!
//! Scripted agents stand in for upstream APIs (no network calls) except where
//! a wiremock server backs a real agent. Live engine tests are marked
//! `#[ignore]` for manual/periodic validation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use uncover_engine::agents::ShodanAgent;
use uncover_engine::{
    Agent, AgentRegistry, CancellationToken, KeyPools, MemorySink, OutputWriter, Provider, Query,
    ResultStream, SearchResult, Service, ServiceOptions, Session, UncoverError,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Clone, Copy)]
enum Behaviour {
    /// Emit `n` results `10.0.0.0..n` on port 80.
    Emit(usize),
    /// Refuse unless the session carries a fofa key pair.
    NeedsFofaKeys,
    /// Never produce anything and never close.
    Hang,
}

struct ScriptedAgent {
    name: &'static str,
    behaviour: Behaviour,
    seen_keys: Arc<Mutex<HashSet<String>>>,
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn query(&self, session: &Session, _query: &Query) -> Result<ResultStream, UncoverError> {
        if let Ok(mut seen) = self.seen_keys.lock() {
            seen.insert(session.keys().shodan.clone());
        }
        let name = self.name;
        match self.behaviour {
            Behaviour::Emit(n) => {
                let items: Vec<SearchResult> = (0..n)
                    .map(|i| SearchResult {
                        ip: format!("10.0.0.{i}"),
                        port: 80,
                        ..SearchResult::new(name)
                    })
                    .collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Behaviour::NeedsFofaKeys => {
                if session.keys().fofa_key.is_empty() {
                    return Err(UncoverError::MissingCredentials { engine: name.into() });
                }
                Ok(Box::pin(futures::stream::empty()))
            }
            Behaviour::Hang => Ok(Box::pin(futures::stream::pending())),
        }
    }
}

struct Harness {
    registry: AgentRegistry,
    seen_keys: Arc<Mutex<HashSet<String>>>,
}

impl Harness {
    fn new(agents: &[(&'static str, Behaviour)]) -> Self {
        let seen_keys = Arc::new(Mutex::new(HashSet::new()));
        let mut registry = AgentRegistry::new();
        for &(name, behaviour) in agents {
            let seen = Arc::clone(&seen_keys);
            registry.register(name, move || {
                Arc::new(ScriptedAgent {
                    name,
                    behaviour,
                    seen_keys: Arc::clone(&seen),
                }) as Arc<dyn Agent>
            });
        }
        Self { registry, seen_keys }
    }

    fn service(&self, engines: &[&str], queries: &[&str], provider: Provider) -> Service {
        let options = ServiceOptions {
            engines: engines.iter().map(|e| e.to_string()).collect(),
            queries: queries.iter().map(|q| q.to_string()).collect(),
            ..Default::default()
        };
        Service::with_registry(options, provider, &self.registry).expect("service")
    }
}

fn shodan_provider(keys: &[&str]) -> Provider {
    Provider::new(KeyPools {
        shodan: keys.iter().map(|k| k.to_string()).collect(),
        ..Default::default()
    })
}

async fn collect(service: &Service) -> Vec<SearchResult> {
    service
        .execute(CancellationToken::new())
        .expect("stream")
        .collect()
        .await
}

// ── Isolation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn failing_agent_does_not_abort_run() {
    let harness = Harness::new(&[
        ("shodan", Behaviour::Emit(3)),
        ("fofa", Behaviour::NeedsFofaKeys),
    ]);
    let service = harness.service(&["shodan", "fofa"], &["port:22"], shodan_provider(&["k"]));

    let results = collect(&service).await;

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.source == "shodan"));
}

/// Log lines captured from a scoped subscriber.
#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut logged) = self.0.lock() {
            logged.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    fn lines(&self) -> Vec<String> {
        let logged = self.0.lock().map(|l| l.clone()).unwrap_or_default();
        String::from_utf8_lossy(&logged).lines().map(str::to_owned).collect()
    }
}

#[tokio::test]
async fn failing_agent_is_warned_about_exactly_once() {
    let capture = LogCapture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    // current-thread runtime: spawned workers log on this thread
    let _guard = tracing::subscriber::set_default(subscriber);

    let harness = Harness::new(&[
        ("shodan", Behaviour::Emit(5)),
        ("fofa", Behaviour::NeedsFofaKeys),
    ]);
    let service = harness.service(&["shodan", "fofa"], &["port:22"], shodan_provider(&["k"]));
    let results = collect(&service).await;

    assert_eq!(results.len(), 5);
    let warnings: Vec<String> = capture
        .lines()
        .into_iter()
        .filter(|line| line.contains("WARN"))
        .collect();
    assert_eq!(warnings.len(), 1, "warnings: {warnings:?}");
    assert!(warnings[0].contains("agent query failed"));
    assert!(warnings[0].contains("fofa"));
    assert!(!warnings[0].contains("source=shodan") && !warnings[0].contains("source=\"shodan\""));
}

#[tokio::test]
async fn credentialed_and_missing_engine_scenario_writes_three_lines() {
    let harness = Harness::new(&[
        ("shodan", Behaviour::Emit(3)),
        ("fofa", Behaviour::NeedsFofaKeys),
    ]);
    let service = harness.service(&["shodan", "fofa"], &["org:example"], shodan_provider(&["k"]));

    let writer = OutputWriter::new();
    let sink = MemorySink::new();
    writer.add_sink("mem", sink.clone());
    service
        .execute_with_callback(CancellationToken::new(), |result| {
            writer.write_json(&result);
        })
        .await
        .expect("run");

    let lines = sink.lines();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|l| l.contains(r#""source":"shodan""#)));
}

// ── Fan-in completion ────────────────────────────────────────────────────

#[tokio::test]
async fn stream_closes_after_every_pair_including_empty_ones() {
    let harness = Harness::new(&[
        ("shodan", Behaviour::Emit(4)),
        ("quake", Behaviour::Emit(0)),
        ("hunter", Behaviour::Emit(1)),
    ]);
    let service = harness.service(
        &["shodan", "quake", "hunter"],
        &["a", "b"],
        shodan_provider(&["k"]),
    );

    let results = tokio::time::timeout(Duration::from_secs(5), collect(&service))
        .await
        .expect("stream must close");

    // 2 queries × (4 + 0 + 1)
    assert_eq!(results.len(), 10);
    assert!(results.iter().all(|r| r.timestamp > 0));
}

#[tokio::test]
async fn every_worker_draws_its_own_keys() {
    let harness = Harness::new(&[("shodan", Behaviour::Emit(0))]);
    let queries: Vec<String> = (0..30).map(|i| format!("q{i}")).collect();
    let queries: Vec<&str> = queries.iter().map(String::as_str).collect();
    let service = harness.service(&["shodan"], &queries, shodan_provider(&["k1", "k2", "k3"]));

    collect(&service).await;

    let seen = harness.seen_keys.lock().expect("lock").clone();
    assert!(seen.len() > 1, "expected rotation across the pool, saw {seen:?}");
    assert!(seen.iter().all(|k| ["k1", "k2", "k3"].contains(&k.as_str())));
}

// ── Cancellation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn cancellation_ends_stream_despite_hanging_agent() {
    let harness = Harness::new(&[("shodan", Behaviour::Hang), ("quake", Behaviour::Emit(2))]);
    let service = harness.service(&["shodan", "quake"], &["q"], shodan_provider(&["k"]));

    let cancel = CancellationToken::new();
    let stream = service.execute(cancel.clone()).expect("stream");
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let results: Vec<SearchResult> = tokio::time::timeout(Duration::from_secs(2), stream.collect())
        .await
        .expect("cancelled run must finish promptly");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(results.len() <= 2);
}

#[tokio::test]
async fn cancelled_callback_run_returns() {
    let harness = Harness::new(&[("shodan", Behaviour::Hang)]);
    let service = harness.service(&["shodan"], &["q"], shodan_provider(&["k"]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut calls = 0;
    tokio::time::timeout(
        Duration::from_secs(2),
        service.execute_with_callback(cancel, |_| calls += 1),
    )
    .await
    .expect("returns promptly")
    .expect("no fatal error");
    assert_eq!(calls, 0);
}

// ── Dedup ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_assets_across_queries_written_once() {
    let harness = Harness::new(&[("shodan", Behaviour::Emit(2)), ("quake", Behaviour::Emit(2))]);
    let service = harness.service(&["shodan", "quake"], &["a", "b", "c"], shodan_provider(&["k"]));

    let writer = OutputWriter::new();
    let sink = MemorySink::new();
    writer.add_sink("mem", sink.clone());
    let mut merged = 0;
    service
        .execute_with_callback(CancellationToken::new(), |result| {
            merged += 1;
            writer.write_string(&result.ip_port());
        })
        .await
        .expect("run");

    assert_eq!(merged, 12);
    let mut lines = sink.lines();
    lines.sort();
    assert_eq!(lines, vec!["10.0.0.0:80", "10.0.0.1:80"]);
}

// ── Real agent against a mock upstream ───────────────────────────────────

#[tokio::test]
async fn global_rate_limit_paces_real_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/shodan/host/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "matches": [{"ip_str": "192.0.2.1", "port": 443}],
            "total": 1
        })))
        .expect(3)
        .mount(&server)
        .await;

    let uri = server.uri();
    let mut registry = AgentRegistry::new();
    registry.register("shodan", move || {
        Arc::new(ShodanAgent::with_base_url(uri.clone())) as Arc<dyn Agent>
    });
    let options = ServiceOptions {
        engines: vec!["shodan".into()],
        queries: vec!["a".into(), "b".into(), "c".into()],
        rate_limit: 1,
        rate_limit_window: Duration::from_millis(200),
        ..Default::default()
    };
    let service =
        Service::with_registry(options, shodan_provider(&["k"]), &registry).expect("service");

    let started = Instant::now();
    let results = collect(&service).await;

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.ip_port() == "192.0.2.1:443"));
    assert!(started.elapsed() >= Duration::from_millis(400));
}

// ── Live (network) ───────────────────────────────────────────────────────

#[tokio::test]
#[ignore]
async fn live_internetdb_lookup() {
    let options = ServiceOptions {
        engines: vec!["shodan-idb".into()],
        queries: vec!["1.1.1.1".into()],
        ..Default::default()
    };
    let results: Vec<SearchResult> =
        uncover_engine::execute(options, Provider::default(), CancellationToken::new())
            .expect("stream")
            .collect()
            .await;
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| !r.is_error()));
}
