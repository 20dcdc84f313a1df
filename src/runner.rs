//! Wires a [`Service`] run to an [`OutputWriter`].
//!
//! Every merged result is rendered in the configured [`OutputMode`] and
//! written once. Results carrying an error are logged as warnings instead.

use std::sync::Arc;

use uncover_engine::{
    AgentRegistry, CancellationToken, OutputWriter, Provider, SearchResult, Service,
};

use crate::config::{OutputMode, UncoverConfig};
use crate::error::Result;

/// Counters for one finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Results received from the merged stream, errors included.
    pub received: usize,
    /// Lines written (after duplicate suppression).
    pub written: usize,
    /// Results that carried an error.
    pub errors: usize,
}

/// One configured command-line run.
pub struct Runner {
    service: Service,
    writer: Arc<OutputWriter>,
    mode: OutputMode,
    has_output_file: bool,
}

impl Runner {
    /// Build a runner with the built-in agents, writing to stdout and the
    /// configured output file.
    ///
    /// # Errors
    ///
    /// Invalid configuration, no keys for keyed-only engines, an unknown
    /// engine, or an output file that cannot be created.
    pub fn new(config: &UncoverConfig) -> Result<Self> {
        let writer = Arc::new(OutputWriter::new());
        writer.add_stdout();
        Self::with_parts(
            config,
            Provider::new(config.key_pools()),
            &AgentRegistry::builtin(),
            writer,
        )
    }

    /// Build a runner from explicit parts. The configured output file, if
    /// any, is added to `writer`.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_parts(
        config: &UncoverConfig,
        provider: Provider,
        registry: &AgentRegistry,
        writer: Arc<OutputWriter>,
    ) -> Result<Self> {
        let mode = config.output_mode()?;
        let service = Service::with_registry(config.service_options()?, provider, registry)?;
        if let Some(path) = &config.search.output {
            writer.add_file(path)?;
        }
        Ok(Self {
            service,
            writer,
            mode,
            has_output_file: config.search.output.is_some(),
        })
    }

    /// The orchestration service behind this runner.
    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Run every query to completion (or cancellation) and close the writer.
    ///
    /// # Errors
    ///
    /// Output flush failures.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary> {
        tracing::info!(
            engines = ?self.service.agent_names(),
            queries = self.service.options().queries.len(),
            "starting search"
        );

        let mut summary = RunSummary::default();
        self.service
            .execute_with_callback(cancel, |result| {
                summary.received += 1;
                if let Some(e) = &result.error {
                    summary.errors += 1;
                    tracing::warn!(source = %result.source, error = %e, "source reported an error");
                    return;
                }
                if self.write(&result) {
                    summary.written += 1;
                }
            })
            .await?;

        self.writer.close()?;
        tracing::info!(
            received = summary.received,
            written = summary.written,
            errors = summary.errors,
            "search finished"
        );
        Ok(summary)
    }

    fn write(&self, result: &SearchResult) -> bool {
        match &self.mode {
            OutputMode::Json => self.writer.write_json(result),
            OutputMode::Raw => self.writer.write_string(&result.raw_data()),
            OutputMode::Fields(template) => {
                match format_fields(template, result, self.has_output_file) {
                    Some(line) => self.writer.write_string(&line),
                    None => false,
                }
            }
        }
    }
}

/// Render `template` for `result`, or `None` if the line carries none of
/// the result's identifying values.
///
/// The tokens `ip`, `host`, `port` and `url` are substituted left to right.
/// If the result lacks an ip or a port and the template mentions either,
/// the template falls back to `host`. The host counts as identifying only
/// when it is set or when output also goes to a file.
pub fn format_fields(
    template: &str,
    result: &SearchResult,
    has_output_file: bool,
) -> Option<String> {
    let port = result.port.to_string();
    let template = if (result.ip.is_empty() || result.port == 0)
        && (template.contains("ip") || template.contains("port"))
    {
        "host"
    } else {
        template
    };

    let tokens: [(&str, &str); 4] = [
        ("ip", &result.ip),
        ("host", &result.host),
        ("port", &port),
        ("url", &result.url),
    ];
    let mut line = String::with_capacity(template.len() + 32);
    let mut rest = template;
    'scan: while !rest.is_empty() {
        for (token, value) in tokens {
            if let Some(after) = rest.strip_prefix(token) {
                line.push_str(value);
                rest = after;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            line.push(c);
        }
        rest = chars.as_str();
    }

    let mut identifying = vec![result.ip.as_str(), port.as_str()];
    if !result.host.is_empty() || has_output_file {
        identifying.push(result.host.as_str());
    }
    identifying
        .iter()
        .any(|value| !value.is_empty() && line.contains(value))
        .then_some(line)
}
