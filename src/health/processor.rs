use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::model::types::{HealthCheckType, HealthChecker};

const MYSQL_PROTOCOL_V10: u8 = 10;
const MYSQL_ERR_PACKET: u8 = 0xff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ok,
    /// Counts toward the failure threshold.
    Fail,
    /// Marks the instance unhealthy without waiting for the threshold.
    FailNow,
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub outcome: ProbeOutcome,
    /// Observed response time; `None` when the probe timed out.
    pub rt: Option<Duration>,
    pub msg: String,
}

impl ProbeResult {
    fn new(outcome: ProbeOutcome, rt: Option<Duration>, msg: impl Into<String>) -> Self {
        Self {
            outcome,
            rt,
            msg: msg.into(),
        }
    }
}

/// One active probe kind.
#[async_trait]
pub trait HealthCheckProcessor: Send + Sync {
    fn kind(&self) -> HealthCheckType;

    async fn probe(&self, checker: &HealthChecker, ip: &str, port: u16, timeout: Duration) -> ProbeResult;
}

async fn connect(ip: &str, port: u16, timeout: Duration) -> std::result::Result<TcpStream, ProbeResult> {
    match tokio::time::timeout(timeout, TcpStream::connect((ip, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ProbeResult::new(ProbeOutcome::Fail, None, format!("tcp:error:{e}"))),
        Err(_) => Err(ProbeResult::new(ProbeOutcome::Fail, None, "tcp:timeout")),
    }
}

pub struct TcpHealthCheckProcessor;

#[async_trait]
impl HealthCheckProcessor for TcpHealthCheckProcessor {
    fn kind(&self) -> HealthCheckType {
        HealthCheckType::Tcp
    }

    async fn probe(&self, _checker: &HealthChecker, ip: &str, port: u16, timeout: Duration) -> ProbeResult {
        let started = Instant::now();
        match connect(ip, port, timeout).await {
            Ok(_) => ProbeResult::new(ProbeOutcome::Ok, Some(started.elapsed()), "tcp:ok"),
            Err(result) => result,
        }
    }
}

pub struct HttpHealthCheckProcessor {
    http: reqwest::Client,
}

impl HttpHealthCheckProcessor {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpHealthCheckProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// `Name:Value|Name:Value`
pub fn parse_headers(raw: &str) -> HashMap<String, String> {
    raw.split('|')
        .filter_map(|pair| pair.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

/// Expected status passes; 503 and 302 count toward the threshold; anything
/// else fails immediately.
pub fn classify_http_status(status: u16, expected: u16) -> ProbeOutcome {
    if status == expected {
        ProbeOutcome::Ok
    } else if status == 503 || status == 302 {
        ProbeOutcome::Fail
    } else {
        ProbeOutcome::FailNow
    }
}

#[async_trait]
impl HealthCheckProcessor for HttpHealthCheckProcessor {
    fn kind(&self) -> HealthCheckType {
        HealthCheckType::Http
    }

    async fn probe(&self, checker: &HealthChecker, ip: &str, port: u16, timeout: Duration) -> ProbeResult {
        let HealthChecker::Http {
            path,
            headers,
            expected_response_code,
        } = checker
        else {
            return ProbeResult::new(ProbeOutcome::Fail, None, "http:checker mismatch");
        };

        let path = if path.starts_with('/') {
            path.clone()
        } else {
            format!("/{path}")
        };
        let mut request = self
            .http
            .get(format!("http://{ip}:{port}{path}"))
            .timeout(timeout);
        for (name, value) in parse_headers(headers) {
            request = request.header(name, value);
        }

        let started = Instant::now();
        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                ProbeResult::new(
                    classify_http_status(status, *expected_response_code),
                    Some(started.elapsed()),
                    format!("http:{status}"),
                )
            }
            Err(e) if e.is_timeout() => ProbeResult::new(ProbeOutcome::Fail, None, "http:timeout"),
            Err(e) => ProbeResult::new(ProbeOutcome::Fail, Some(started.elapsed()), format!("http:error:{e}")),
        }
    }
}

/// Classify the first packet a MySQL server sends on connect.
pub fn classify_mysql_greeting(packet: &[u8]) -> ProbeOutcome {
    // 3-byte length, 1-byte sequence id, then the payload
    match packet.get(4) {
        Some(&MYSQL_PROTOCOL_V10) => ProbeOutcome::Ok,
        Some(&MYSQL_ERR_PACKET) => ProbeOutcome::FailNow,
        _ => ProbeOutcome::Fail,
    }
}

pub struct MysqlHealthCheckProcessor;

#[async_trait]
impl HealthCheckProcessor for MysqlHealthCheckProcessor {
    fn kind(&self) -> HealthCheckType {
        HealthCheckType::Mysql
    }

    async fn probe(&self, _checker: &HealthChecker, ip: &str, port: u16, timeout: Duration) -> ProbeResult {
        let started = Instant::now();
        let mut stream = match connect(ip, port, timeout).await {
            Ok(stream) => stream,
            Err(result) => return result,
        };

        let mut greeting = [0u8; 5];
        let remaining = timeout.saturating_sub(started.elapsed());
        match tokio::time::timeout(remaining, stream.read_exact(&mut greeting)).await {
            Ok(Ok(_)) => {
                let outcome = classify_mysql_greeting(&greeting);
                ProbeResult::new(outcome, Some(started.elapsed()), format!("mysql:{:?}", outcome))
            }
            Ok(Err(e)) => ProbeResult::new(ProbeOutcome::Fail, Some(started.elapsed()), format!("mysql:error:{e}")),
            Err(_) => ProbeResult::new(ProbeOutcome::Fail, None, "mysql:timeout"),
        }
    }
}

/// Processor per checker kind. `NONE` has no processor: such clusters are
/// never probed.
#[derive(Clone)]
pub struct ProcessorDelegate {
    processors: HashMap<HealthCheckType, Arc<dyn HealthCheckProcessor>>,
}

impl ProcessorDelegate {
    pub fn empty() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    pub fn register(mut self, processor: Arc<dyn HealthCheckProcessor>) -> Self {
        self.processors.insert(processor.kind(), processor);
        self
    }

    pub fn get(&self, kind: HealthCheckType) -> Option<Arc<dyn HealthCheckProcessor>> {
        self.processors.get(&kind).cloned()
    }
}

impl Default for ProcessorDelegate {
    fn default() -> Self {
        Self::empty()
            .register(Arc::new(TcpHealthCheckProcessor))
            .register(Arc::new(HttpHealthCheckProcessor::new()))
            .register(Arc::new(MysqlHealthCheckProcessor))
    }
}
